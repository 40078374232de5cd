//! Idempotent redirect install/remove on top of a raw [`NatTable`]

use tracing::{debug, info};

use crate::Error;
use crate::nat::RuleSetFile;
use crate::rule::RedirectRule;
use crate::traits::NatTable;

/// Idempotent mutations of redirect rules
///
/// Every mutation first asks the table whether the target state already
/// holds. If it does, nothing is changed and the call still succeeds. This
/// makes restoration safe to repeat after a partially completed run.
pub struct RedirectToggle<'a> {
    table: &'a dyn NatTable,
    rules_file: Option<&'a RuleSetFile>,
}

impl<'a> RedirectToggle<'a> {
    /// Create a toggle over the given table
    pub fn new(table: &'a dyn NatTable, rules_file: Option<&'a RuleSetFile>) -> Self {
        Self { table, rules_file }
    }

    /// Make sure the rule is installed
    pub async fn install(&self, rule: &RedirectRule) -> Result<(), Error> {
        self.install_copies(rule, 1).await
    }

    /// Install `copies` copies of the rule unless it is already present
    pub async fn install_copies(&self, rule: &RedirectRule, copies: usize) -> Result<(), Error> {
        if self.table.exists(rule).await? {
            debug!("{} already installed", rule);
            return Ok(());
        }

        self.append_copies(rule, copies).await
    }

    /// Append `copies` copies of the rule without looking at the table first
    ///
    /// Only for putting back copies this process took out while others of
    /// the same rule are known to remain.
    pub async fn append_copies(&self, rule: &RedirectRule, copies: usize) -> Result<(), Error> {
        for _ in 0..copies {
            self.table.append(rule).await?;
        }
        info!("Installed redirect {} (x{})", rule, copies);
        Ok(())
    }

    /// Remove one copy of the rule if any is installed
    ///
    /// Returns whether a copy was removed. A rule can be installed more than
    /// once and a single delete only takes out the first match, so callers
    /// that need the rule gone repeat until this returns `false`.
    pub async fn remove(&self, rule: &RedirectRule) -> Result<bool, Error> {
        if !self.table.exists(rule).await? {
            debug!("{} already absent", rule);
            return Ok(false);
        }

        self.table.delete(rule).await?;
        info!("Removed redirect {}", rule);
        Ok(true)
    }

    /// Write the live rule set to durable storage
    ///
    /// Callers treat a failure here as best effort: the live table is
    /// already correct, only its survival across a reboot is at stake.
    pub async fn persist(&self) -> Result<(), Error> {
        match self.table.save().await? {
            Some(dump) => match self.rules_file {
                Some(file) => {
                    file.write(&dump).await?;
                    info!("Persisted rule set to {}", file.path().display());
                }
                None => {
                    debug!(
                        "No rules file configured, {} rule set not persisted",
                        self.table.backend_name()
                    );
                }
            },
            None => {
                info!("Rule set persisted by {} backend", self.table.backend_name());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nat::MemoryNatTable;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn install_is_noop_when_present() {
        let rule = RedirectRule::prerouting(80, 8000);
        let table = MemoryNatTable::with_rules(vec![rule.clone()]);
        let toggle = RedirectToggle::new(&table, None);

        assert_ok!(toggle.install(&rule).await);
        assert_eq!(table.rules(), vec![rule]);
        assert_eq!(table.append_count(), 0);
    }

    #[tokio::test]
    async fn remove_is_noop_when_absent() {
        let table = MemoryNatTable::new();
        let toggle = RedirectToggle::new(&table, None);

        assert!(!assert_ok!(toggle.remove(&RedirectRule::output(80, 8000)).await));
        assert_eq!(table.delete_count(), 0);
    }

    #[tokio::test]
    async fn install_then_remove_round_trips_live_state() {
        let rule = RedirectRule::output(80, 8000);
        let table = MemoryNatTable::new();
        let toggle = RedirectToggle::new(&table, None);

        assert_ok!(toggle.install(&rule).await);
        assert_ok!(toggle.install(&rule).await);
        assert!(table.contains(&rule));
        assert_eq!(table.rules().len(), 1);

        assert!(assert_ok!(toggle.remove(&rule).await));
        assert!(!assert_ok!(toggle.remove(&rule).await));
        assert!(table.rules().is_empty());
    }

    #[tokio::test]
    async fn remove_takes_out_one_copy_at_a_time() {
        let rule = RedirectRule::output(80, 8000);
        let table = MemoryNatTable::with_rules(vec![rule.clone(), rule.clone()]);
        let toggle = RedirectToggle::new(&table, None);

        assert!(assert_ok!(toggle.remove(&rule).await));
        assert!(table.contains(&rule));
        assert!(assert_ok!(toggle.remove(&rule).await));
        assert!(!table.contains(&rule));
    }

    #[tokio::test]
    async fn install_copies_skips_present_rule() {
        let rule = RedirectRule::output(80, 8000);
        let table = MemoryNatTable::new();
        let toggle = RedirectToggle::new(&table, None);

        assert_ok!(toggle.install_copies(&rule, 2).await);
        assert_ok!(toggle.install_copies(&rule, 2).await);
        assert_eq!(table.rules(), vec![rule.clone(), rule]);
    }

    #[tokio::test]
    async fn inspection_failure_blocks_mutation() {
        let rule = RedirectRule::output(80, 8000);
        let table = MemoryNatTable::new();
        table.deny_inspect(rule.clone());
        let toggle = RedirectToggle::new(&table, None);

        let err = assert_err!(toggle.install(&rule).await);
        assert!(err.is_permission_denied());
        assert_eq!(table.append_count(), 0);
    }

    #[tokio::test]
    async fn persist_writes_rules_file() {
        let dir = tempdir().unwrap();
        let file = RuleSetFile::new(dir.path().join("rules.v4"));
        let table = MemoryNatTable::with_rules(RedirectRule::defaults());
        let toggle = RedirectToggle::new(&table, Some(&file));

        assert_ok!(toggle.persist().await);
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("-A OUTPUT"));
        assert!(content.contains("-A PREROUTING"));
    }

    #[tokio::test]
    async fn persist_surfaces_save_failure() {
        let table = MemoryNatTable::new();
        table.fail_save();
        let toggle = RedirectToggle::new(&table, None);

        assert_err!(toggle.persist().await);
    }
}
