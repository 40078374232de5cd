// # iptables NAT Table
//
// This crate provides an `iptables`-backed NatTable for the setip system.
//
// ## Commands
//
// | Operation | Command                                  | Meaning of exit code    |
// |-----------|------------------------------------------|-------------------------|
// | exists    | `iptables -t nat -C <chain> <spec>`      | 0 present, 1 absent     |
// | append    | `iptables -t nat -A <chain> <spec>`      | 0 success               |
// | delete    | `iptables -t nat -D <chain> <spec>`      | 0 success               |
// | save      | `iptables-save`                          | 0 success, stdout dump  |
//
// ## Privilege
//
// Every command needs CAP_NET_ADMIN. A refusal is reported as
// `Error::PermissionDenied` so the orchestrator can tell "absent" from
// "could not look".
//
// ## Trust Level: Semi-Trusted
//
// - ✅ Run the configured iptables binaries
// - ❌ NO retries, NO decisions about which rules to touch

mod runner;

pub use runner::{CommandOutput, CommandRunner, SystemRunner};

use async_trait::async_trait;
use setip_core::ComponentRegistry;
use setip_core::config::NatConfig;
use setip_core::rule::RedirectRule;
use setip_core::traits::{NatTable, NatTableFactory, RedirectInspector};
use setip_core::{Error, Result};
use std::io;
use tracing::debug;

/// Why an iptables invocation did not do what was asked
#[derive(Debug, thiserror::Error)]
enum IptablesFailure {
    #[error("{program}: {message}")]
    PermissionDenied { program: String, message: String },

    #[error("{program} not found; is iptables installed?")]
    MissingBinary { program: String },

    #[error("{program} could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {code:?}: {message}")]
    Rejected {
        program: String,
        code: Option<i32>,
        message: String,
    },
}

impl From<IptablesFailure> for Error {
    fn from(failure: IptablesFailure) -> Self {
        match failure {
            IptablesFailure::PermissionDenied { .. } => Error::permission_denied(failure.to_string()),
            other => Error::nat(other.to_string()),
        }
    }
}

/// Whether stderr reports missing privileges
fn is_permission_message(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("permission denied") || lower.contains("must be root")
}

/// NatTable backed by the iptables command-line tools
pub struct IptablesNat<R = SystemRunner> {
    binary: String,
    save_binary: String,
    runner: R,
}

impl IptablesNat<SystemRunner> {
    /// Create a table using the given iptables and iptables-save binaries
    pub fn new(binary: impl Into<String>, save_binary: impl Into<String>) -> Self {
        Self::with_runner(binary, save_binary, SystemRunner)
    }
}

impl<R: CommandRunner> IptablesNat<R> {
    /// Create a table with a custom command runner
    pub fn with_runner(binary: impl Into<String>, save_binary: impl Into<String>, runner: R) -> Self {
        Self {
            binary: binary.into(),
            save_binary: save_binary.into(),
            runner,
        }
    }

    /// Arguments for one rule operation (`-C`, `-A` or `-D`)
    fn rule_args(flag: &str, rule: &RedirectRule) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            rule.table.clone(),
            flag.to_string(),
            rule.chain.clone(),
        ];
        args.extend(rule.spec_args());
        args
    }

    async fn invoke(&self, program: &str, args: &[String]) -> std::result::Result<CommandOutput, IptablesFailure> {
        debug!("Running {} {}", program, args.join(" "));

        let output = self.runner.run(program, args).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                IptablesFailure::MissingBinary {
                    program: program.to_string(),
                }
            } else if e.kind() == io::ErrorKind::PermissionDenied {
                IptablesFailure::PermissionDenied {
                    program: program.to_string(),
                    message: e.to_string(),
                }
            } else {
                IptablesFailure::Spawn {
                    program: program.to_string(),
                    source: e,
                }
            }
        })?;

        if is_permission_message(&output.stderr) {
            return Err(IptablesFailure::PermissionDenied {
                program: program.to_string(),
                message: output.stderr.trim().to_string(),
            });
        }

        Ok(output)
    }

    /// Run a mutation and require exit code 0
    async fn mutate(&self, flag: &str, rule: &RedirectRule) -> Result<()> {
        let args = Self::rule_args(flag, rule);
        let output = self.invoke(&self.binary, &args).await?;

        if output.success() {
            Ok(())
        } else {
            Err(IptablesFailure::Rejected {
                program: self.binary.clone(),
                code: output.code,
                message: output.stderr.trim().to_string(),
            }
            .into())
        }
    }
}

#[async_trait]
impl<R: CommandRunner> RedirectInspector for IptablesNat<R> {
    async fn exists(&self, rule: &RedirectRule) -> Result<bool> {
        let args = Self::rule_args("-C", rule);
        let output = self.invoke(&self.binary, &args).await?;

        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(IptablesFailure::Rejected {
                program: self.binary.clone(),
                code,
                message: output.stderr.trim().to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl<R: CommandRunner> NatTable for IptablesNat<R> {
    async fn append(&self, rule: &RedirectRule) -> Result<()> {
        self.mutate("-A", rule).await
    }

    async fn delete(&self, rule: &RedirectRule) -> Result<()> {
        self.mutate("-D", rule).await
    }

    async fn save(&self) -> Result<Option<String>> {
        let output = self.invoke(&self.save_binary, &[]).await?;

        if !output.success() {
            return Err(IptablesFailure::Rejected {
                program: self.save_binary.clone(),
                code: output.code,
                message: output.stderr.trim().to_string(),
            }
            .into());
        }
        if output.stdout.trim().is_empty() {
            return Err(Error::nat(format!("{} produced no output", self.save_binary)));
        }

        Ok(Some(output.stdout))
    }

    fn backend_name(&self) -> &'static str {
        "iptables"
    }
}

/// Factory for creating iptables NAT tables
pub struct IptablesFactory;

impl NatTableFactory for IptablesFactory {
    fn create(&self, config: &NatConfig) -> Result<Box<dyn NatTable>> {
        match config {
            NatConfig::Iptables {
                binary,
                save_binary,
                ..
            } => Ok(Box::new(IptablesNat::new(binary.clone(), save_binary.clone()))),
            _ => Err(Error::config("Invalid config for iptables NAT table")),
        }
    }
}

/// Register the iptables backend with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_nat_table("iptables", Box::new(IptablesFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio_test::{assert_err, assert_ok};

    /// Replays canned outputs and records every invocation
    #[derive(Clone, Default)]
    struct ScriptedRunner {
        replies: Arc<Mutex<VecDeque<io::Result<CommandOutput>>>>,
        calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    }

    impl ScriptedRunner {
        fn replying(replies: Vec<io::Result<CommandOutput>>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into())),
                calls: Arc::default(),
            }
        }

        fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::new(0, "", "")))
        }
    }

    fn table(runner: &ScriptedRunner) -> IptablesNat<ScriptedRunner> {
        IptablesNat::with_runner("iptables", "iptables-save", runner.clone())
    }

    #[tokio::test]
    async fn check_builds_full_rule_spec() {
        let runner = ScriptedRunner::replying(vec![Ok(CommandOutput::new(0, "", ""))]);

        assert!(assert_ok!(table(&runner).exists(&RedirectRule::prerouting(80, 8000)).await));

        let (program, args) = runner.calls()[0].clone();
        assert_eq!(program, "iptables");
        assert_eq!(
            args.join(" "),
            "-t nat -C PREROUTING -p tcp --dport 80 -j REDIRECT --to-ports 8000"
        );
    }

    #[tokio::test]
    async fn exit_one_means_absent() {
        let runner = ScriptedRunner::replying(vec![Ok(CommandOutput::new(
            1,
            "",
            "iptables: Bad rule (does a matching rule exist in that chain?).\n",
        ))]);

        assert!(!assert_ok!(table(&runner).exists(&RedirectRule::output(80, 8000)).await));
    }

    #[tokio::test]
    async fn not_root_is_permission_denied_not_absent() {
        let runner = ScriptedRunner::replying(vec![Ok(CommandOutput::new(
            4,
            "",
            "iptables v1.8.7 (nf_tables): Could not fetch rule set generation id: Permission denied (you must be root)\n",
        ))]);

        let err = assert_err!(table(&runner).exists(&RedirectRule::output(80, 8000)).await);
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn unexpected_exit_code_is_nat_error() {
        let runner = ScriptedRunner::replying(vec![Ok(CommandOutput::new(2, "", "iptables: No chain/target/match by that name.\n"))]);

        let err = assert_err!(table(&runner).exists(&RedirectRule::new("MISSING", 80, 8000)).await);
        assert!(matches!(err, Error::Nat(_)));
    }

    #[tokio::test]
    async fn append_and_delete_use_their_flags() {
        let runner = ScriptedRunner::default();
        let nat = table(&runner);
        let rule = RedirectRule::output(80, 8000);

        assert_ok!(nat.append(&rule).await);
        assert_ok!(nat.delete(&rule).await);

        let flags: Vec<String> = runner.calls().iter().map(|(_, args)| args[2].clone()).collect();
        assert_eq!(flags, vec!["-A", "-D"]);
    }

    #[tokio::test]
    async fn failed_delete_carries_stderr() {
        let runner = ScriptedRunner::replying(vec![Ok(CommandOutput::new(1, "", "iptables: Bad rule.\n"))]);

        let err = assert_err!(table(&runner).delete(&RedirectRule::output(80, 8000)).await);
        assert!(err.to_string().contains("Bad rule"));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let runner = ScriptedRunner::replying(vec![Err(io::Error::new(io::ErrorKind::NotFound, "no such file"))]);

        let err = assert_err!(table(&runner).append(&RedirectRule::output(80, 8000)).await);
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn save_returns_dump() {
        let dump = "*nat\n-A OUTPUT -p tcp -m tcp --dport 80 -j REDIRECT --to-ports 8000\nCOMMIT\n";
        let runner = ScriptedRunner::replying(vec![Ok(CommandOutput::new(0, dump, ""))]);

        assert_eq!(assert_ok!(table(&runner).save().await), Some(dump.to_string()));
        assert_eq!(runner.calls()[0].0, "iptables-save");
    }

    #[tokio::test]
    async fn empty_save_output_is_error() {
        let runner = ScriptedRunner::replying(vec![Ok(CommandOutput::new(0, "", ""))]);
        assert_err!(table(&runner).save().await);
    }

    #[test]
    fn factory_rejects_memory_config() {
        assert!(IptablesFactory.create(&NatConfig::Memory).is_err());
        let nat = IptablesFactory.create(&NatConfig::default()).unwrap();
        assert_eq!(nat.backend_name(), "iptables");
    }

    #[test]
    fn register_adds_iptables_type() {
        let registry = ComponentRegistry::new();
        register(&registry);
        assert!(registry.has_nat_table("iptables"));
    }
}
