use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

pub mod expiry;

pub use expiry::{ExpirySweep, SweepFailure, SweepReport};

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        let sweep_interval = self.context.config.mailbox.sweep_interval_secs;
        if sweep_interval > 0 {
            tokio::spawn(Self::expiry_sweep_job(Arc::clone(&self), sweep_interval));
        } else {
            info!("In-process expiry sweep disabled, relying on /cron/expire");
        }

        tokio::spawn(Self::rate_limit_prune_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Expire overdue mailboxes on a fixed interval
    async fn expiry_sweep_job(scheduler: Arc<Self>, every_secs: u64) {
        let mut interval = interval(Duration::from_secs(every_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            info!("Running mailbox expiry sweep");

            match scheduler.context.sweep.run().await {
                Ok(report) => {
                    if report.failed > 0 {
                        error!("Expiry sweep left {} mailbox(es) active", report.failed);
                    }
                }
                Err(e) => error!("Expiry sweep failed: {}", e),
            }
        }
    }

    /// Drop closed rate-limit windows (runs every 10 minutes)
    async fn rate_limit_prune_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(600));

        loop {
            interval.tick().await;
            let limits = &scheduler.context.config.rate_limit;
            let widest = [limits.login, limits.redeem, limits.admin_login]
                .iter()
                .map(|w| w.window_secs)
                .max()
                .unwrap_or(60);
            scheduler.context.window_limiter.prune(widest);
        }
    }
}
