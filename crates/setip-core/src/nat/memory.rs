// # Memory NAT Table
//
// In-memory implementation of NatTable.
//
// ## Purpose
//
// Stands in for the kernel's NAT table where touching the real one is not
// wanted: dry runs and tests. Rules live in an ordered list so duplicate
// installs behave the way iptables does (append adds another copy).
//
// ## Fault Injection
//
// Individual operations can be made to fail for a given rule, which is how
// the restoration contract tests simulate privilege loss or a flaky backend.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::Error;
use crate::rule::RedirectRule;
use crate::traits::{NatTable, RedirectInspector};

/// In-memory NAT table
///
/// Clones share the same underlying table, so a test can keep a handle while
/// the orchestrator owns another.
///
/// # Example
///
/// ```rust
/// use setip_core::nat::MemoryNatTable;
/// use setip_core::{NatTable, RedirectInspector, RedirectRule};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let table = MemoryNatTable::with_rules(RedirectRule::defaults());
///     let rule = RedirectRule::prerouting(80, 8000);
///
///     assert!(table.exists(&rule).await?);
///     table.delete(&rule).await?;
///     assert!(!table.exists(&rule).await?);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryNatTable {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rules: Vec<RedirectRule>,
    fail_inspect: HashSet<RedirectRule>,
    fail_append: HashSet<RedirectRule>,
    fail_delete: HashSet<RedirectRule>,
    fail_save: bool,
    appends: usize,
    deletes: usize,
    saves: usize,
}

impl MemoryNatTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the given rules installed
    pub fn with_rules(rules: Vec<RedirectRule>) -> Self {
        let table = Self::new();
        table.lock().rules = rules;
        table
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the table from the others
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Currently installed rules, in chain order
    pub fn rules(&self) -> Vec<RedirectRule> {
        self.lock().rules.clone()
    }

    /// Whether the rule is installed (synchronous peek for assertions)
    pub fn contains(&self, rule: &RedirectRule) -> bool {
        self.lock().rules.contains(rule)
    }

    /// Make `exists` report a permission failure for this rule
    pub fn deny_inspect(&self, rule: RedirectRule) {
        self.lock().fail_inspect.insert(rule);
    }

    /// Make `append` fail for this rule
    pub fn fail_append(&self, rule: RedirectRule) {
        self.lock().fail_append.insert(rule);
    }

    /// Make `delete` fail for this rule
    pub fn fail_delete(&self, rule: RedirectRule) {
        self.lock().fail_delete.insert(rule);
    }

    /// Make `save` fail
    pub fn fail_save(&self) {
        self.lock().fail_save = true;
    }

    /// Number of successful appends
    pub fn append_count(&self) -> usize {
        self.lock().appends
    }

    /// Number of successful deletes
    pub fn delete_count(&self) -> usize {
        self.lock().deletes
    }

    /// Number of save calls (successful or not)
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }
}

#[async_trait]
impl RedirectInspector for MemoryNatTable {
    async fn exists(&self, rule: &RedirectRule) -> Result<bool, Error> {
        let state = self.lock();
        if state.fail_inspect.contains(rule) {
            return Err(Error::permission_denied(format!("cannot inspect {}", rule)));
        }
        Ok(state.rules.contains(rule))
    }
}

#[async_trait]
impl NatTable for MemoryNatTable {
    async fn append(&self, rule: &RedirectRule) -> Result<(), Error> {
        let mut state = self.lock();
        if state.fail_append.contains(rule) {
            return Err(Error::nat(format!("append rejected for {}", rule)));
        }
        state.rules.push(rule.clone());
        state.appends += 1;
        Ok(())
    }

    async fn delete(&self, rule: &RedirectRule) -> Result<(), Error> {
        let mut state = self.lock();
        if state.fail_delete.contains(rule) {
            return Err(Error::nat(format!("delete rejected for {}", rule)));
        }
        let position = state
            .rules
            .iter()
            .position(|r| r == rule)
            .ok_or_else(|| Error::nat(format!("no such rule: {}", rule)))?;
        state.rules.remove(position);
        state.deletes += 1;
        Ok(())
    }

    async fn save(&self) -> Result<Option<String>, Error> {
        let mut state = self.lock();
        state.saves += 1;
        if state.fail_save {
            return Err(Error::nat("save rejected"));
        }

        let mut dump = String::from("*nat\n");
        for rule in &state.rules {
            dump.push_str(&format!("-A {} {}\n", rule.chain, rule.spec_args().join(" ")));
        }
        dump.push_str("COMMIT\n");
        Ok(Some(dump))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Factory for creating memory NAT tables
pub struct MemoryNatTableFactory;

impl crate::traits::NatTableFactory for MemoryNatTableFactory {
    fn create(&self, config: &crate::config::NatConfig) -> Result<Box<dyn NatTable>, Error> {
        match config {
            crate::config::NatConfig::Memory => Ok(Box::new(MemoryNatTable::new())),
            _ => Err(Error::config("Invalid config for memory NAT table")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_missing_rule_errors() {
        let table = MemoryNatTable::new();
        assert!(table.delete(&RedirectRule::output(80, 8000)).await.is_err());
    }

    #[tokio::test]
    async fn append_adds_duplicates_like_iptables() {
        let rule = RedirectRule::output(80, 8000);
        let table = MemoryNatTable::with_rules(vec![rule.clone()]);
        table.append(&rule).await.unwrap();
        assert_eq!(table.rules().len(), 2);
    }

    #[tokio::test]
    async fn denied_inspect_is_permission_error() {
        let rule = RedirectRule::prerouting(80, 8000);
        let table = MemoryNatTable::with_rules(vec![rule.clone()]);
        table.deny_inspect(rule.clone());

        let err = table.exists(&rule).await.unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn save_dumps_rules() {
        let table = MemoryNatTable::with_rules(vec![RedirectRule::prerouting(80, 8000)]);
        let dump = table.save().await.unwrap().unwrap();
        assert!(dump.contains("-A PREROUTING -p tcp --dport 80 -j REDIRECT --to-ports 8000"));
        assert!(dump.ends_with("COMMIT\n"));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let table = MemoryNatTable::new();
        let handle = table.clone();
        table.append(&RedirectRule::output(80, 8000)).await.unwrap();
        assert!(handle.contains(&RedirectRule::output(80, 8000)));
    }
}
