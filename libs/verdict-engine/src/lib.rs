//! Untrusted code execution and grading engine
//!
//! [`ExecutionEngine::execute_code`] is the single entry point. Everything
//! else is exposed for the binaries and for tests.

pub mod config;
pub mod error;
pub mod evaluator;
pub mod fixture;
pub mod injector;
pub mod orchestrator;
pub mod packages;
pub mod runner;
pub mod workspace;

pub use config::{EngineSettings, LanguageConfigManager};
pub use error::ExecutionError;
pub use orchestrator::ExecutionEngine;
