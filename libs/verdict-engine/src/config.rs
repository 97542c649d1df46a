// Runtime configuration for the execution engine
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use verdict_common::limits::{DEFAULT_SANDBOX_MEMORY_MB, DEFAULT_TIMEOUT_MS};
use verdict_common::types::Language;

/// How a language's programs are run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Fresh in-process JavaScript context per test case
    Sandbox,
    /// External interpreter with a wall-clock timeout
    Subprocess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub strategy: ExecutionStrategy,
    /// Interpreter binary; unused by the sandbox strategy
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Conventional main-file names, in preference order
    #[serde(default)]
    pub entry_files: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
    /// Whether requests may stage packages from the registry
    #[serde(default)]
    pub allows_packages: bool,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_memory_limit_mb() -> u32 {
    DEFAULT_SANDBOX_MEMORY_MB
}

impl LanguageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson = serde_json::from_str(content)?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            if Language::from_str(&lang.name).is_none() {
                bail!("Unknown language '{}' in language config", lang.name);
            }
            if lang.strategy == ExecutionStrategy::Subprocess && lang.command.is_empty() {
                bail!("Language '{}' uses a subprocess but has no command", lang.name);
            }
            configs.insert(lang.name.to_lowercase(), lang);
        }

        if configs.is_empty() {
            bail!("No languages configured");
        }

        Ok(Self { configs })
    }

    /// Load from `path` when it exists, otherwise fall back to the built-in table
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(path = %path.display(), "Language config not found, using built-in defaults");
            Ok(Self::builtin())
        }
    }

    /// Built-in table: JavaScript in the sandbox, Python through `python3`
    pub fn builtin() -> Self {
        let mut configs = HashMap::new();
        configs.insert(
            "javascript".to_string(),
            LanguageConfig {
                name: "javascript".to_string(),
                strategy: ExecutionStrategy::Sandbox,
                command: String::new(),
                args: Vec::new(),
                entry_files: vec!["index.js".to_string(), "main.js".to_string()],
                timeout_ms: DEFAULT_TIMEOUT_MS,
                memory_limit_mb: DEFAULT_SANDBOX_MEMORY_MB,
                allows_packages: true,
            },
        );
        configs.insert(
            "python".to_string(),
            LanguageConfig {
                name: "python".to_string(),
                strategy: ExecutionStrategy::Subprocess,
                command: "python3".to_string(),
                args: vec!["-u".to_string()],
                entry_files: vec!["main.py".to_string()],
                timeout_ms: DEFAULT_TIMEOUT_MS,
                memory_limit_mb: 256,
                allows_packages: false,
            },
        );
        Self { configs }
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig> {
        let lang_name = language.to_string();
        self.configs
            .get(&lang_name)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", lang_name))
    }

    /// Override the per-test timeout of every language
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        for config in self.configs.values_mut() {
            config.timeout_ms = timeout_ms;
        }
        self
    }

    /// Override the interpreter of one language
    pub fn with_command(mut self, language: &Language, command: &str, args: Vec<String>) -> Self {
        if let Some(config) = self.configs.get_mut(&language.to_string()) {
            config.command = command.to_string();
            config.args = args;
        }
        self
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every language config, sorted by name
    pub fn configs(&self) -> Vec<&LanguageConfig> {
        let mut configs: Vec<&LanguageConfig> = self.configs.values().collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    /// The table in the `languages.json` format
    pub fn to_json(&self) -> Result<String> {
        let languages_json = LanguagesJson {
            languages: self.configs().into_iter().cloned().collect(),
        };
        serde_json::to_string_pretty(&languages_json).context("Failed to serialize language config")
    }
}

/// Process-wide engine settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Parent of every per-request workspace
    pub scratch_root: PathBuf,
    /// Host-controlled directory of pre-approved packages
    pub package_registry: PathBuf,
    pub languages_config: PathBuf,
    pub mongod_bin: String,
    pub fixture_startup_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("verdict-scratch"),
            package_registry: PathBuf::from("preinstalled_modules"),
            languages_config: PathBuf::from("config/languages.json"),
            mongod_bin: "mongod".to_string(),
            fixture_startup_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by `VERDICT_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Ok(root) = std::env::var("VERDICT_SCRATCH_ROOT") {
            settings.scratch_root = PathBuf::from(root);
        }
        if let Ok(registry) = std::env::var("VERDICT_PACKAGE_REGISTRY") {
            settings.package_registry = PathBuf::from(registry);
        }
        if let Ok(path) = std::env::var("VERDICT_LANGUAGES_CONFIG") {
            settings.languages_config = PathBuf::from(path);
        }
        if let Ok(bin) = std::env::var("VERDICT_MONGOD_BIN") {
            settings.mongod_bin = bin;
        }
        if let Ok(ms) = std::env::var("VERDICT_FIXTURE_STARTUP_MS") {
            let ms: u64 = ms
                .parse()
                .with_context(|| format!("VERDICT_FIXTURE_STARTUP_MS is not a number: {}", ms))?;
            settings.fixture_startup_timeout = Duration::from_millis(ms);
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_every_language() {
        let manager = LanguageConfigManager::builtin();
        for language in Language::all() {
            assert!(manager.get_config(&language).is_ok(), "missing {}", language);
        }
        let js = manager.get_config(&Language::JavaScript).unwrap();
        assert_eq!(js.strategy, ExecutionStrategy::Sandbox);
        assert!(js.allows_packages);
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let manager = LanguageConfigManager::from_json(
            r#"{ "languages": [
                { "name": "python", "strategy": "subprocess", "command": "python3", "entry_files": ["main.py"] }
            ] }"#,
        )
        .unwrap();

        let py = manager.get_config(&Language::Python).unwrap();
        assert_eq!(py.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(!py.allows_packages);
        assert!(manager.get_config(&Language::JavaScript).is_err());
    }

    #[test]
    fn test_from_json_rejects_unknown_language() {
        let err = LanguageConfigManager::from_json(
            r#"{ "languages": [{ "name": "cobol", "strategy": "subprocess", "command": "cobc" }] }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cobol"));
    }

    #[test]
    fn test_subprocess_requires_command() {
        let result = LanguageConfigManager::from_json(
            r#"{ "languages": [{ "name": "python", "strategy": "subprocess" }] }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_written_table_loads_back() {
        let written = LanguageConfigManager::builtin().with_timeout_ms(750).to_json().unwrap();
        let manager = LanguageConfigManager::from_json(&written).unwrap();

        let names: Vec<&str> = manager.configs().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["javascript", "python"]);
        assert_eq!(manager.get_config(&Language::Python).unwrap().timeout_ms, 750);
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let manager =
            LanguageConfigManager::load_or_default(Path::new("/definitely/not/here.json")).unwrap();
        assert_eq!(manager.list_languages(), vec!["javascript", "python"]);
    }
}
