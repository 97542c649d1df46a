//! Language runners
//!
//! A runner takes an injected program and produces a [`RunOutcome`] within
//! its deadline. Two strategies sit behind [`LanguageRunner`]:
//! - [`SandboxRunner`]: a fresh in-process JavaScript context per test case
//! - [`SubprocessRunner`]: an external interpreter scoped to the workspace
//!
//! Runners do not judge output; that is the evaluator's job.

mod sandbox;
mod subprocess;

pub use sandbox::SandboxRunner;
pub use subprocess::SubprocessRunner;

use crate::config::{ExecutionStrategy, LanguageConfig};
use crate::injector::InjectedProgram;
use crate::packages::ModuleTable;
use crate::workspace::Workspace;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// How a candidate program finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Returned normally; carries the rendered result
    Completed(String),
    /// Deadline hit; the sandbox was disposed or the process killed
    TimedOut { limit_ms: u64 },
    /// Uncaught exception or crash, with its message
    Threw(String),
    /// The candidate asked to exit
    ExitCalled(i32),
}

impl RunOutcome {
    /// Output text on success, failure message otherwise
    pub fn into_output(self) -> Result<String, String> {
        match self {
            RunOutcome::Completed(output) => Ok(output),
            RunOutcome::TimedOut { limit_ms } => Err(format!("Execution timed out after {}ms", limit_ms)),
            RunOutcome::Threw(message) => Err(message),
            RunOutcome::ExitCalled(code) => Err(format!("Process exited with code {}", code)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::TimedOut { .. } => "timed_out",
            RunOutcome::Threw(_) => "threw",
            RunOutcome::ExitCalled(_) => "exit_called",
        }
    }
}

/// Relational fixture the sandbox may query through `db.query`
#[derive(Debug, Clone)]
pub struct FixtureAccess {
    pub connection: String,
    pub path: PathBuf,
}

/// Everything a runner may touch for one test case
pub struct RunContext<'a> {
    pub workspace: &'a Workspace,
    /// Workspace-relative path of the entry-point file
    pub entry_path: &'a str,
    pub modules: Arc<ModuleTable>,
    pub fixture: Option<FixtureAccess>,
}

#[async_trait]
pub trait LanguageRunner: Send + Sync {
    /// Run one injected program. `Err` means the runner itself failed
    /// (could not spawn, could not write the entry file, ...).
    async fn run(&self, program: &InjectedProgram, ctx: &RunContext<'_>) -> Result<RunOutcome>;

    fn name(&self) -> &'static str;
}

/// Build the runner a language is configured for
pub fn runner_for(config: &LanguageConfig) -> Box<dyn LanguageRunner> {
    match config.strategy {
        ExecutionStrategy::Sandbox => Box::new(SandboxRunner::new(config.timeout(), config.memory_limit_mb)),
        ExecutionStrategy::Subprocess => Box::new(SubprocessRunner::new(
            config.command.clone(),
            config.args.clone(),
            config.timeout(),
            Some(config.memory_limit_mb).filter(|mb| *mb > 0),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_map_to_messages() {
        assert_eq!(RunOutcome::Completed("42".into()).into_output(), Ok("42".to_string()));
        assert_eq!(
            RunOutcome::TimedOut { limit_ms: 5000 }.into_output(),
            Err("Execution timed out after 5000ms".to_string())
        );
        assert_eq!(RunOutcome::ExitCalled(3).into_output(), Err("Process exited with code 3".to_string()));
        assert_eq!(RunOutcome::Threw("boom".into()).into_output(), Err("boom".to_string()));
    }

    #[test]
    fn test_runner_for_strategy() {
        let manager = crate::config::LanguageConfigManager::builtin();
        let js = manager.get_config(&verdict_common::types::Language::JavaScript).unwrap();
        let py = manager.get_config(&verdict_common::types::Language::Python).unwrap();
        assert_eq!(runner_for(js).name(), "sandbox");
        assert_eq!(runner_for(py).name(), "subprocess");
    }
}
