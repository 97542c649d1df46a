/// Execution Orchestrator - Request-Level Control Flow
///
/// **Responsibility:**
/// Validate a request, prepare its workspace and optional fixture, run every
/// test case in order and hand back one `TestResult` per case.
///
/// **Failure Split:**
/// - Request-level problems (bad shape, unauthorized package, unknown or
///   failing fixture) abort the call with an `ExecutionError`
/// - Anything that goes wrong inside one test case becomes that case's
///   failed result; later cases still run
///
/// **Cleanup:**
/// Fixture teardown and workspace removal run on every exit path once a
/// workspace exists. If the future is dropped mid-flight, the workspace's
/// `Drop` and the fixture process's kill-on-drop take over.

use crate::config::{EngineSettings, LanguageConfig, LanguageConfigManager};
use crate::error::ExecutionError;
use crate::evaluator;
use crate::fixture::{Fixture, FixtureProvider};
use crate::injector::inject;
use crate::packages::{ModuleTable, PackageRegistry};
use crate::runner::{runner_for, FixtureAccess, RunContext};
use crate::workspace::{validate_relative_path, ScratchRoot, Workspace, INTERNAL_DIR};
use anyhow::Context;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use verdict_common::limits::{MAX_SOURCE_CODE_BYTES, MAX_TEST_INPUT_BYTES};
use verdict_common::types::{
    DatabaseKind, ExecutionRequest, Language, SourceFile, TestCase, TestResult,
};

/// Shared, process-wide engine. Cheap to share behind an `Arc`; every
/// request gets its own workspace and fixture.
pub struct ExecutionEngine {
    scratch: ScratchRoot,
    registry: PackageRegistry,
    fixtures: FixtureProvider,
    languages: LanguageConfigManager,
}

/// A request that passed validation, borrowing from the original
struct ValidatedRequest<'a> {
    language: Language,
    config: &'a LanguageConfig,
    files: &'a [SourceFile],
    test_cases: &'a [TestCase],
    packages: &'a [String],
    database: Option<(DatabaseKind, Option<&'a Value>)>,
}

impl ExecutionEngine {
    /// Build the engine and create the scratch root. Call once at startup.
    pub fn new(settings: EngineSettings, languages: LanguageConfigManager) -> anyhow::Result<Self> {
        let scratch = ScratchRoot::init(&settings.scratch_root)
            .with_context(|| format!("Failed to prepare scratch root {}", settings.scratch_root.display()))?;

        info!(
            scratch_root = %scratch.path().display(),
            package_registry = %settings.package_registry.display(),
            languages = ?languages.list_languages(),
            "Execution engine initialized"
        );

        Ok(Self {
            scratch,
            registry: PackageRegistry::new(&settings.package_registry),
            fixtures: FixtureProvider::new(&settings),
            languages,
        })
    }

    /// Settings and language table from the environment
    pub fn from_env() -> anyhow::Result<Self> {
        let settings = EngineSettings::from_env()?;
        let languages = LanguageConfigManager::load_or_default(&settings.languages_config)?;
        Self::new(settings, languages)
    }

    pub fn registry(&self) -> &PackageRegistry {
        &self.registry
    }

    pub fn languages(&self) -> &LanguageConfigManager {
        &self.languages
    }

    /// Run every test case of `request` and return their verdicts in order
    pub async fn execute_code(&self, request: &ExecutionRequest) -> Result<Vec<TestResult>, ExecutionError> {
        let validated = self.validate(request)?;
        let request_id = Uuid::new_v4();
        let start_time = Instant::now();

        info!(
            request_id = %request_id,
            language = %validated.language,
            files = validated.files.len(),
            test_count = validated.test_cases.len(),
            packages = validated.packages.len(),
            database = ?validated.database.map(|(kind, _)| kind),
            "Starting execution"
        );

        let workspace = self.scratch.create().await?;
        let mut fixture: Option<Fixture> = None;

        let result = self
            .run_in_workspace(request_id, &validated, &workspace, &mut fixture)
            .await;

        if let Some(fixture) = fixture.take() {
            fixture.teardown().await;
        }
        workspace.destroy().await;

        match &result {
            Ok(results) => info!(
                request_id = %request_id,
                passed = results.iter().filter(|r| r.passed).count(),
                total = results.len(),
                execution_time_ms = start_time.elapsed().as_millis() as u64,
                "Execution finished"
            ),
            Err(e) => warn!(
                request_id = %request_id,
                error = %e,
                kind = e.kind(),
                "Execution aborted"
            ),
        }

        result
    }

    fn validate<'a>(&'a self, request: &'a ExecutionRequest) -> Result<ValidatedRequest<'a>, ExecutionError> {
        if request.files.is_empty() {
            return Err(ExecutionError::invalid("files must not be empty"));
        }

        let mut seen = HashSet::new();
        let mut total_bytes = 0usize;
        for (index, file) in request.files.iter().enumerate() {
            if file.path.trim().is_empty() {
                return Err(ExecutionError::invalid(format!("file {} has an empty path", index)));
            }
            if file.content.is_empty() {
                return Err(ExecutionError::invalid(format!("file {} has empty content", file.path)));
            }
            validate_relative_path(&file.path).map_err(ExecutionError::invalid)?;
            if Path::new(&file.path).components().any(|c| c.as_os_str() == INTERNAL_DIR) {
                return Err(ExecutionError::invalid(format!("file path {} is reserved", file.path)));
            }
            if !seen.insert(normalize(&file.path)) {
                return Err(ExecutionError::invalid(format!("duplicate file path {}", file.path)));
            }
            total_bytes += file.content.len();
        }
        if total_bytes > MAX_SOURCE_CODE_BYTES {
            return Err(ExecutionError::invalid(format!(
                "source code is {} bytes, limit is {}",
                total_bytes, MAX_SOURCE_CODE_BYTES
            )));
        }

        if request.language.trim().is_empty() {
            return Err(ExecutionError::invalid("language is required"));
        }
        let language = Language::from_str(&request.language)
            .ok_or_else(|| ExecutionError::invalid(format!("unsupported language {}", request.language)))?;
        let config = self
            .languages
            .get_config(&language)
            .map_err(|e| ExecutionError::invalid(e.to_string()))?;

        let test_cases = request
            .test_cases
            .as_deref()
            .ok_or_else(|| ExecutionError::invalid("testCases is required"))?;
        for (index, test_case) in test_cases.iter().enumerate() {
            let input_bytes = serde_json::to_vec(&test_case.input).map(|v| v.len()).unwrap_or(0);
            if input_bytes > MAX_TEST_INPUT_BYTES {
                return Err(ExecutionError::invalid(format!(
                    "input of test case {} is {} bytes, limit is {}",
                    index, input_bytes, MAX_TEST_INPUT_BYTES
                )));
            }
        }

        let database = match &request.database {
            Some(db) => Some((FixtureProvider::parse_kind(&db.kind)?, db.seed.as_ref())),
            None => None,
        };

        Ok(ValidatedRequest {
            language,
            config,
            files: &request.files,
            test_cases,
            packages: &request.packages,
            database,
        })
    }

    async fn run_in_workspace(
        &self,
        request_id: Uuid,
        request: &ValidatedRequest<'_>,
        workspace: &Workspace,
        fixture_slot: &mut Option<Fixture>,
    ) -> Result<Vec<TestResult>, ExecutionError> {
        for file in request.files {
            workspace.write_file(&file.path, &file.content).await?;
        }

        let staged: &[String] = if request.packages.is_empty() {
            &[]
        } else if request.config.allows_packages {
            self.registry.stage(workspace, request.packages).await?;
            request.packages
        } else {
            warn!(
                request_id = %request_id,
                language = %request.language,
                packages = ?request.packages,
                "Language does not support packages; ignoring them"
            );
            &[]
        };

        if let Some((kind, seed)) = request.database {
            *fixture_slot = Some(self.fixtures.provision(kind, seed, workspace).await?);
        }

        let entry = entry_point(request.config, request.files);
        debug!(request_id = %request_id, entry = %entry.path, "Entry point selected");

        let mut modules = ModuleTable::load_staged(workspace, staged).await;
        if request.language == Language::JavaScript {
            modules.add_local_files(request.files, &entry.path);
        }
        debug!(request_id = %request_id, modules = modules.len(), "Module table built");
        let modules = Arc::new(modules);

        let connection = fixture_slot.as_ref().map(|f| f.connection().to_string()).unwrap_or_default();
        let fixture_access = fixture_slot.as_ref().and_then(|f| {
            f.relational_path().map(|path| FixtureAccess {
                connection: f.connection().to_string(),
                path: path.to_path_buf(),
            })
        });

        let runner = runner_for(request.config);
        let ctx = RunContext {
            workspace,
            entry_path: &entry.path,
            modules,
            fixture: fixture_access,
        };

        let mut results = Vec::with_capacity(request.test_cases.len());

        for (test_index, test_case) in request.test_cases.iter().enumerate() {
            let start_time = Instant::now();

            let output = match inject(&entry.content, test_case, request.language, &connection) {
                Ok(program) => match runner.run(&program, &ctx).await {
                    Ok(outcome) => {
                        debug!(request_id = %request_id, test_index, outcome = outcome.label(), "Run finished");
                        outcome.into_output()
                    }
                    Err(e) => Err(format!("Execution failed: {:#}", e)),
                },
                Err(e) => Err(format!("Execution failed: {:#}", e)),
            };

            let result = match output {
                Ok(output) => {
                    let passed = evaluator::evaluate(&output, &test_case.expected);
                    TestResult::completed(test_case, output, passed)
                }
                Err(message) => {
                    warn!(request_id = %request_id, test_index, error = %message, "Test case failed to run");
                    TestResult::failed(test_case, message)
                }
            };

            info!(
                request_id = %request_id,
                test_index,
                passed = result.passed,
                execution_time_ms = start_time.elapsed().as_millis() as u64,
                "Test case evaluated"
            );

            results.push(result);
        }

        Ok(results)
    }
}

/// A validated relative path without `.` segments
fn normalize(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// First configured entry-file name present in the request, else the first file
fn entry_point<'a>(config: &LanguageConfig, files: &'a [SourceFile]) -> &'a SourceFile {
    config
        .entry_files
        .iter()
        .find_map(|name| files.iter().find(|f| f.path.trim_start_matches("./") == name))
        .unwrap_or(&files[0])
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
