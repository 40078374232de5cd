//! Redirect rules and the snapshot of their live state
//!
//! The live NAT table is the only source of truth. A [`RedirectSnapshot`] is
//! captured once per run by querying it, and is only ever used to decide what
//! to put back at the end of that run.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::traits::RedirectInspector;

/// A NAT port redirect, identified by every field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RedirectRule {
    /// Netfilter table (normally "nat")
    pub table: String,
    /// Chain the rule lives in (e.g. "PREROUTING", "OUTPUT")
    pub chain: String,
    /// Transport protocol matched by the rule
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Destination port that gets rewritten
    pub dport: u16,
    /// Port the traffic is redirected to
    pub to_port: u16,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl RedirectRule {
    /// Create a rule in the `nat` table
    pub fn new(chain: impl Into<String>, dport: u16, to_port: u16) -> Self {
        Self {
            table: "nat".to_string(),
            chain: chain.into(),
            protocol: default_protocol(),
            dport,
            to_port,
        }
    }

    /// Redirect for traffic arriving from the network
    pub fn prerouting(dport: u16, to_port: u16) -> Self {
        Self::new("PREROUTING", dport, to_port)
    }

    /// Redirect for locally-originated traffic
    pub fn output(dport: u16, to_port: u16) -> Self {
        Self::new("OUTPUT", dport, to_port)
    }

    /// The two rules a web app on port 8000 uses to answer on port 80
    pub fn defaults() -> Vec<Self> {
        vec![Self::prerouting(80, 8000), Self::output(80, 8000)]
    }

    /// Rule specification as iptables arguments (without table and chain)
    pub fn spec_args(&self) -> Vec<String> {
        vec![
            "-p".to_string(),
            self.protocol.clone(),
            "--dport".to_string(),
            self.dport.to_string(),
            "-j".to_string(),
            "REDIRECT".to_string(),
            "--to-ports".to_string(),
            self.to_port.to_string(),
        ]
    }
}

impl fmt::Display for RedirectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {} {} -> {}",
            self.table, self.chain, self.protocol, self.dport, self.to_port
        )
    }
}

/// What the inspector reported for one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleState {
    /// Installed at capture time
    Present,
    /// Not installed at capture time
    Absent,
    /// The inspector could not tell (e.g. insufficient privilege)
    Undetermined(String),
}

/// Existence of every rule of interest at the start of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectSnapshot {
    entries: Vec<(RedirectRule, RuleState)>,
}

impl RedirectSnapshot {
    /// Query the inspector once per rule
    ///
    /// Inspection failures do not abort the capture: the rule is recorded as
    /// [`RuleState::Undetermined`] and treated as absent from then on.
    pub async fn capture<I>(inspector: &I, rules: &[RedirectRule]) -> Self
    where
        I: RedirectInspector + ?Sized,
    {
        let mut entries = Vec::with_capacity(rules.len());

        for rule in rules {
            let state = match inspector.exists(rule).await {
                Ok(true) => RuleState::Present,
                Ok(false) => RuleState::Absent,
                Err(e) => {
                    warn!("Could not determine whether {} is installed: {}", rule, e);
                    RuleState::Undetermined(e.to_string())
                }
            };
            debug!("Snapshot: {} is {:?}", rule, state);
            entries.push((rule.clone(), state));
        }

        Self { entries }
    }

    /// Build a snapshot from known states
    pub fn from_entries(entries: Vec<(RedirectRule, RuleState)>) -> Self {
        Self { entries }
    }

    /// All captured entries, in rule order
    pub fn entries(&self) -> &[(RedirectRule, RuleState)] {
        &self.entries
    }

    /// Rules that were installed when the snapshot was taken
    pub fn present(&self) -> Vec<RedirectRule> {
        self.entries
            .iter()
            .filter(|(_, state)| *state == RuleState::Present)
            .map(|(rule, _)| rule.clone())
            .collect()
    }

    /// Whether any rule needs suspending
    pub fn any_present(&self) -> bool {
        self.entries.iter().any(|(_, s)| *s == RuleState::Present)
    }

    /// Whether every rule's state is known
    pub fn is_determined(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|(_, s)| matches!(s, RuleState::Undetermined(_)))
    }

    /// Whether the given rule was present
    pub fn is_present(&self, rule: &RedirectRule) -> bool {
        self.entries
            .iter()
            .any(|(r, s)| r == rule && *s == RuleState::Present)
    }
}
