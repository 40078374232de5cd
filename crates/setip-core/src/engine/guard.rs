//! Scoped suspension of redirect rules
//!
//! [`SuspendedRedirect`] is the resource handle for "redirect rules taken out
//! of the NAT table". It is created by [`SuspendedRedirect::suspend`] and must
//! be released with [`SuspendedRedirect::restore`]. Restoration is async, so
//! it cannot run from `Drop`; a guard dropped unreleased logs an error naming
//! the rules it left behind instead.

use tracing::{debug, error};

use crate::engine::events::{EventSink, RunEvent};
use crate::error::Error;
use crate::nat::RedirectToggle;
use crate::rule::{RedirectRule, RedirectSnapshot};

/// Upper bound on copies of one rule removed during a single suspension
///
/// A table that keeps reporting the rule after this many deletions is not
/// honoring them.
const MAX_COPIES: usize = 32;

/// One rule taken out of the table
#[derive(Debug, Clone)]
struct Suspended {
    rule: RedirectRule,

    /// Copies this guard deleted
    copies: usize,

    /// False when removal stopped with copies still installed
    complete: bool,
}

/// Redirect rules currently taken out of the NAT table
#[must_use = "suspended redirect rules must be restored"]
pub struct SuspendedRedirect {
    suspended: Vec<Suspended>,
    released: bool,
}

impl SuspendedRedirect {
    /// Remove every copy of every rule the snapshot saw as present
    ///
    /// The guard is returned even when a removal fails, so the caller can
    /// restore whatever was already taken out. Removal stops at the first
    /// failure.
    pub async fn suspend(
        toggle: &RedirectToggle<'_>,
        snapshot: &RedirectSnapshot,
        events: &EventSink,
    ) -> (Self, Result<(), Error>) {
        let mut guard = Self {
            suspended: Vec::new(),
            released: false,
        };

        for rule in snapshot.present() {
            let mut copies = 0;
            let result = loop {
                match toggle.remove(&rule).await {
                    Ok(true) if copies + 1 >= MAX_COPIES => {
                        copies += 1;
                        break Err(Error::nat(format!(
                            "{} still installed after removing {} copies",
                            rule, copies
                        )));
                    }
                    Ok(true) => copies += 1,
                    Ok(false) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };

            if copies > 1 {
                debug!("Removed {} copies of {}", copies, rule);
            }
            if copies > 0 {
                guard.suspended.push(Suspended {
                    rule: rule.clone(),
                    copies,
                    complete: result.is_ok(),
                });
            }

            match result {
                Ok(()) => events.emit(RunEvent::RuleSuspended { rule }),
                Err(e) => {
                    error!("Failed to suspend redirect {}: {}", rule, e);
                    events.emit(RunEvent::SuspensionFailed {
                        rule,
                        error: e.to_string(),
                    });
                    return (guard, Err(e));
                }
            }
        }

        (guard, Ok(()))
    }

    /// Rules that will be reinstalled on release
    pub fn rules(&self) -> Vec<RedirectRule> {
        self.suspended.iter().map(|s| s.rule.clone()).collect()
    }

    /// Put back every copy this guard removed
    ///
    /// A fully removed rule is reinstalled only if it is still absent. A rule
    /// whose removal stopped partway still has copies installed, so the
    /// removed ones are appended next to them. Each rule is attempted
    /// independently. Returns the rules that could not be reinstalled.
    pub async fn restore(mut self, toggle: &RedirectToggle<'_>, events: &EventSink) -> Vec<RedirectRule> {
        self.released = true;
        let mut failed = Vec::new();

        for entry in &self.suspended {
            let result = if entry.complete {
                toggle.install_copies(&entry.rule, entry.copies).await
            } else {
                toggle.append_copies(&entry.rule, entry.copies).await
            };

            match result {
                Ok(()) => events.emit(RunEvent::RuleRestored {
                    rule: entry.rule.clone(),
                }),
                Err(e) => {
                    error!("Failed to restore redirect {}: {}", entry.rule, e);
                    events.emit(RunEvent::RestorationFailed {
                        rule: entry.rule.clone(),
                        error: e.to_string(),
                    });
                    failed.push(entry.rule.clone());
                }
            }
        }

        failed
    }
}

impl Drop for SuspendedRedirect {
    fn drop(&mut self) {
        if !self.released && !self.suspended.is_empty() {
            let rules: Vec<String> = self
                .suspended
                .iter()
                .map(|s| format!("{} (x{})", s.rule, s.copies))
                .collect();
            error!(
                "Redirect guard dropped without restoring; reinstall manually: {}",
                rules.join(", ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nat::MemoryNatTable;

    #[tokio::test]
    async fn suspend_then_restore_returns_table_to_snapshot() {
        let table = MemoryNatTable::with_rules(RedirectRule::defaults());
        let toggle = RedirectToggle::new(&table, None);
        let (events, _rx) = EventSink::channel(16);
        let snapshot = RedirectSnapshot::capture(&table, &RedirectRule::defaults()).await;

        let (guard, result) = SuspendedRedirect::suspend(&toggle, &snapshot, &events).await;
        assert!(result.is_ok());
        assert!(table.rules().is_empty());

        let failed = guard.restore(&toggle, &events).await;
        assert!(failed.is_empty());
        assert_eq!(
            RedirectSnapshot::capture(&table, &RedirectRule::defaults()).await,
            snapshot
        );
    }

    #[tokio::test]
    async fn failed_removal_still_yields_guard() {
        let [pre, out]: [RedirectRule; 2] = RedirectRule::defaults().try_into().unwrap();
        let table = MemoryNatTable::with_rules(vec![pre.clone(), out.clone()]);
        table.fail_delete(out.clone());
        let toggle = RedirectToggle::new(&table, None);
        let (events, _rx) = EventSink::channel(16);
        let snapshot = RedirectSnapshot::capture(&table, &RedirectRule::defaults()).await;

        let (guard, result) = SuspendedRedirect::suspend(&toggle, &snapshot, &events).await;
        assert!(result.is_err());
        assert!(!table.contains(&pre));

        assert_eq!(guard.rules(), vec![pre.clone()]);
        assert!(guard.restore(&toggle, &events).await.is_empty());
        assert!(table.contains(&pre));
        assert!(table.contains(&out));
    }

    #[tokio::test]
    async fn duplicated_rule_is_fully_suspended_and_restored() {
        let out = RedirectRule::output(80, 8000);
        let table = MemoryNatTable::with_rules(vec![out.clone(), out.clone()]);
        let toggle = RedirectToggle::new(&table, None);
        let (events, _rx) = EventSink::channel(16);
        let snapshot = RedirectSnapshot::capture(&table, &[out.clone()]).await;

        let (guard, result) = SuspendedRedirect::suspend(&toggle, &snapshot, &events).await;
        assert!(result.is_ok());
        assert!(!table.contains(&out));
        assert_eq!(table.delete_count(), 2);

        assert!(guard.restore(&toggle, &events).await.is_empty());
        assert_eq!(table.rules(), vec![out.clone(), out]);
    }

    #[tokio::test]
    async fn one_failed_restore_does_not_stop_the_other() {
        let [pre, out]: [RedirectRule; 2] = RedirectRule::defaults().try_into().unwrap();
        let table = MemoryNatTable::with_rules(vec![pre.clone(), out.clone()]);
        let toggle = RedirectToggle::new(&table, None);
        let (events, _rx) = EventSink::channel(16);
        let snapshot = RedirectSnapshot::capture(&table, &RedirectRule::defaults()).await;

        let (guard, _) = SuspendedRedirect::suspend(&toggle, &snapshot, &events).await;
        table.fail_append(pre.clone());

        let failed = guard.restore(&toggle, &events).await;
        assert_eq!(failed, vec![pre]);
        assert!(table.contains(&out));
    }
}
