/// Mailbox expiry sweep
use crate::{
    clock::Clock,
    db::{MailboxStatus, RelationalStore},
    error::PortalResult,
    metrics::SWEEP_MAILBOXES_TOTAL,
    provision::{with_timeout, MailboxProvisioner},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One mailbox the sweep could not expire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub edu_email: String,
    pub error: String,
}

/// Summary of one sweep run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: u64,
    pub disabled: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failures: Vec<SweepFailure>,
}

/// Deactivates mailboxes past their term and marks their rows expired
pub struct ExpirySweep {
    store: Arc<dyn RelationalStore>,
    provisioner: Arc<dyn MailboxProvisioner>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl ExpirySweep {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        provisioner: Arc<dyn MailboxProvisioner>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            provisioner,
            clock,
            timeout,
        }
    }

    /// Run one pass. Rows are independent; a failed row stays eligible for the next run.
    pub async fn run(&self) -> PortalResult<SweepReport> {
        let now = self.clock.now();
        let due = self.store.list_expirable_mailboxes(now).await?;
        let mut report = SweepReport {
            scanned: due.len() as u64,
            ..Default::default()
        };

        for mailbox in due {
            let result = match with_timeout(
                self.timeout,
                self.provisioner.set_active(&mailbox.edu_email, false),
            )
            .await
            {
                Ok(()) => self
                    .store
                    .set_mailbox_status(&mailbox.identity_id, MailboxStatus::Expired, now)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(()) => {
                    report.disabled += 1;
                    SWEEP_MAILBOXES_TOTAL.with_label_values(&["disabled"]).inc();
                }
                Err(error) => {
                    tracing::warn!(edu_email = %mailbox.edu_email, "failed to expire mailbox: {}", error);
                    report.failed += 1;
                    SWEEP_MAILBOXES_TOTAL.with_label_values(&["failed"]).inc();
                    report.failures.push(SweepFailure {
                        edu_email: mailbox.edu_email,
                        error,
                    });
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            disabled = report.disabled,
            failed = report.failed,
            "expiry sweep finished"
        );
        Ok(report)
    }
}
