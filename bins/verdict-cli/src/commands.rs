// CLI commands for running submissions and inspecting the local setup
use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::Path;
use verdict_common::types::{ExecutionRequest, Language, TestResult};
use verdict_engine::{EngineSettings, ExecutionEngine, LanguageConfigManager};

/// Read and parse a request file
fn load_request(path: &Path) -> Result<ExecutionRequest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request file {}", path.display()))
}

fn build_engine(timeout_ms: Option<u64>, python: Option<&str>) -> Result<ExecutionEngine> {
    let settings = EngineSettings::from_env()?;
    let mut languages = LanguageConfigManager::load_or_default(&settings.languages_config)?;

    if let Some(timeout_ms) = timeout_ms {
        languages = languages.with_timeout_ms(timeout_ms);
    }
    if let Some(python) = python {
        languages = languages.with_command(&Language::Python, python, vec!["-u".to_string()]);
    }

    ExecutionEngine::new(settings, languages)
}

/// One line per verdict
fn format_result(index: usize, result: &TestResult) -> String {
    let mark = if result.passed { "✅" } else { "❌" };
    match (&result.output, &result.error) {
        (_, Some(error)) => format!("  {} #{} error: {}", mark, index + 1, error),
        (Some(output), None) if result.passed => format!("  {} #{} {}", mark, index + 1, output),
        (Some(output), None) => format!(
            "  {} #{} got {} expected {}",
            mark,
            index + 1,
            output,
            result.expected
        ),
        (None, None) => format!("  {} #{}", mark, index + 1),
    }
}

/// Run a request file. Returns whether every test case passed.
pub async fn run_request(path: &Path, timeout_ms: Option<u64>, python: Option<&str>, as_json: bool) -> Result<bool> {
    let request = load_request(path)?;
    let engine = build_engine(timeout_ms, python)?;

    let results = engine
        .execute_code(&request)
        .await
        .context("Submission could not be run")?;
    let passed = results.iter().filter(|r| r.passed).count();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("🧪 {} ({} test cases)", path.display(), results.len());
        for (index, result) in results.iter().enumerate() {
            println!("{}", format_result(index, result));
        }
        println!("\n{}/{} passed", passed, results.len());
    }

    Ok(passed == results.len())
}

/// Print the package registry contents
pub async fn list_packages() -> Result<()> {
    let settings = EngineSettings::from_env()?;
    let registry = verdict_engine::packages::PackageRegistry::new(&settings.package_registry);
    let packages = registry.available().await?;

    println!("📦 Package registry: {}", registry.root().display());
    if packages.is_empty() {
        println!("  (empty)");
    }
    for name in packages {
        println!("  - {}", name);
    }

    Ok(())
}

/// Print the language table
pub fn list_languages() -> Result<()> {
    let settings = EngineSettings::from_env()?;
    let languages = LanguageConfigManager::load_or_default(&settings.languages_config)?;

    println!("🔧 Languages:");
    for config in languages.configs() {
        let runtime = if config.command.is_empty() {
            "in-process".to_string()
        } else {
            format!("{} {}", config.command, config.args.join(" ")).trim_end().to_string()
        };
        println!(
            "  - {} ({:?}, {}, {}ms, entry: {})",
            config.name,
            config.strategy,
            runtime,
            config.timeout_ms,
            config.entry_files.join(", ")
        );
    }

    Ok(())
}

/// Scaffold a config file, an empty package registry and a sample request
pub fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing Verdict project at: {}", path);

    let project_path = Path::new(path);

    let dirs = ["config", "preinstalled_modules", "requests"];
    for dir in &dirs {
        let dir_path = project_path.join(dir);
        fs::create_dir_all(&dir_path)
            .with_context(|| format!("Failed to create directory: {}", dir))?;
        println!("  ✅ Created: {}", dir);
    }

    let languages_json_path = project_path.join("config/languages.json");
    if !languages_json_path.exists() {
        fs::write(&languages_json_path, LanguageConfigManager::builtin().to_json()?)
            .context("Failed to write languages.json")?;
        println!("  ✅ Created: config/languages.json");
    }

    let example_path = project_path.join("requests/example.json");
    if !example_path.exists() {
        let example = json!({
            "files": [{ "path": "index.js", "content": "function solution(input) {\n  return input.a + input.b;\n}\n" }],
            "language": "javascript",
            "testCases": [
                { "input": { "a": 1, "b": 2 }, "expected": 3 },
                { "input": { "a": 5, "b": 5 }, "expected": 10 }
            ]
        });
        fs::write(&example_path, serde_json::to_string_pretty(&example)?)
            .context("Failed to write example request")?;
        println!("  ✅ Created: requests/example.json");
    }

    println!("✅ Project initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Copy approved packages into preinstalled_modules/");
    println!("  2. Try it: verdict-cli run --request requests/example.json");
    println!("  3. Serve it: verdict-api");

    Ok(())
}
