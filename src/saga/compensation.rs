/// Compensating actions for a failed redemption
///
/// Every forward step that mutates an external system pushes its inverse on
/// the stack. Unwinding pops in reverse order and runs each action in
/// isolation: a failing or panicking action is recorded and the next one
/// still runs.
use crate::{db::Mailbox, db::RelationalStore, identity::IdentityProvider};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

/// Inverse of one forward step
#[derive(Debug, Clone)]
pub enum CompensatingAction {
    /// Remove an identity created by this request
    DeleteIdentity { identity_id: String },
    /// Remove the account row created by this request
    DeleteAccountRow { identity_id: String },
    /// Put the redeemed code back to `unused`
    RevertCode { code: String },
    /// Put the mailbox row back the way it was (or remove it)
    RestoreMailbox {
        identity_id: String,
        previous: Option<Mailbox>,
    },
}

impl CompensatingAction {
    pub fn name(&self) -> &'static str {
        match self {
            CompensatingAction::DeleteIdentity { .. } => "delete_identity",
            CompensatingAction::DeleteAccountRow { .. } => "delete_account_row",
            CompensatingAction::RevertCode { .. } => "revert_code",
            CompensatingAction::RestoreMailbox { .. } => "restore_mailbox",
        }
    }

    async fn run(
        &self,
        store: &dyn RelationalStore,
        identity: &dyn IdentityProvider,
    ) -> Result<(), String> {
        match self {
            CompensatingAction::DeleteIdentity { identity_id } => identity
                .delete_account(identity_id)
                .await
                .map_err(|e| e.to_string()),
            CompensatingAction::DeleteAccountRow { identity_id } => store
                .delete_account(identity_id)
                .await
                .map_err(|e| e.to_string()),
            CompensatingAction::RevertCode { code } => {
                store.revert_code(code).await.map_err(|e| e.to_string())
            }
            CompensatingAction::RestoreMailbox {
                identity_id,
                previous,
            } => store
                .restore_mailbox(identity_id, previous.as_ref())
                .await
                .map_err(|e| e.to_string()),
        }
    }
}

/// Outcome of an unwind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub completed: Vec<&'static str>,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Aggregated diagnostic, `None` when every action succeeded
    pub fn summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            None
        } else {
            Some(self.failures.join("; "))
        }
    }
}

/// Stack of compensating actions
#[derive(Debug, Default)]
pub struct Compensation {
    actions: Vec<CompensatingAction>,
}

impl Compensation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: CompensatingAction) {
        self.actions.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Names in execution order
    pub fn planned(&self) -> Vec<&'static str> {
        self.actions.iter().rev().map(|a| a.name()).collect()
    }

    /// Run every action, last pushed first
    pub async fn unwind(
        self,
        store: &dyn RelationalStore,
        identity: &dyn IdentityProvider,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();

        for action in self.actions.into_iter().rev() {
            let name = action.name();
            let outcome = AssertUnwindSafe(action.run(store, identity))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(action = name, "compensation step done");
                    report.completed.push(name);
                }
                Ok(Err(e)) => {
                    tracing::warn!(action = name, "compensation step failed: {}", e);
                    report.failures.push(format!("{}: {}", name, e));
                }
                Err(_) => {
                    tracing::error!(action = name, "compensation step panicked");
                    report.failures.push(format!("{}: panicked", name));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;

    #[test]
    fn test_planned_order_is_reverse_of_push() {
        let mut stack = Compensation::new();
        stack.push(CompensatingAction::DeleteIdentity { identity_id: "id".into() });
        stack.push(CompensatingAction::DeleteAccountRow { identity_id: "id".into() });
        stack.push(CompensatingAction::RevertCode { code: "C".into() });
        stack.push(CompensatingAction::RestoreMailbox {
            identity_id: "id".into(),
            previous: None,
        });

        assert_eq!(
            stack.planned(),
            vec!["restore_mailbox", "revert_code", "delete_account_row", "delete_identity"]
        );
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_the_rest() {
        let harness = TestHarness::new().await;
        harness.seed_codes(&["CODE"]).await;
        harness.redeem_directly("CODE", "id-1", "alice").await;
        harness.identity.fail_deletes(true);

        let mut stack = Compensation::new();
        stack.push(CompensatingAction::DeleteIdentity { identity_id: "id-1".into() });
        stack.push(CompensatingAction::RevertCode { code: "CODE".into() });

        let report = stack.unwind(harness.store.as_ref(), harness.identity.as_ref()).await;
        assert_eq!(report.completed, vec!["revert_code"]);
        assert!(!report.is_clean());
        assert!(report.summary().unwrap().starts_with("delete_identity:"));
        assert_eq!(harness.code_status("CODE").await, Some(crate::db::CodeStatus::Unused));
    }

    #[test]
    fn test_clean_report_has_no_summary() {
        assert_eq!(CleanupReport::default().summary(), None);
    }
}
