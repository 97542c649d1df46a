use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Languages the engine knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
}

impl Language {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "javascript" | "js" => Some(Language::JavaScript),
            "python" | "py" => Some(Language::Python),
            _ => None,
        }
    }

    pub fn all() -> [Language; 2] {
        [Language::JavaScript, Language::Python]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::JavaScript => write!(f, "javascript"),
            Language::Python => write!(f, "python"),
        }
    }
}

/// Ephemeral data store flavours a request may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// Document store backed by a throwaway `mongod`
    MongoDb,
    /// Embedded relational engine
    Sqlite,
    /// Emulated by the embedded relational engine; no dialect translation
    MySql,
}

impl DatabaseKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mongodb" | "mongo" => Some(DatabaseKind::MongoDb),
            "sqlite" => Some(DatabaseKind::Sqlite),
            "mysql" => Some(DatabaseKind::MySql),
            _ => None,
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(self, DatabaseKind::Sqlite | DatabaseKind::MySql)
    }

    /// URI scheme used in the connection descriptor handed to candidates
    pub fn scheme(&self) -> &'static str {
        match self {
            DatabaseKind::MongoDb => "mongodb",
            DatabaseKind::Sqlite => "sqlite",
            DatabaseKind::MySql => "mysql",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub expected: Value,
}

impl TestCase {
    pub fn new(input: Value, expected: Value) -> Self {
        Self { input, expected }
    }
}

/// Fixture request as sent by callers
///
/// `kind` stays a string so unknown kinds surface as a typed engine error
/// instead of a deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRequest {
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(default, alias = "testData", skip_serializing_if = "Option::is_none")]
    pub seed: Option<Value>,
}

/// Relational seed data: one schema statement, then row statements in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationalSeed {
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub rows: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    #[serde(default)]
    pub files: Vec<SourceFile>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub test_cases: Option<Vec<TestCase>>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseRequest>,
}

/// Verdict for one test case
///
/// Exactly one of `output` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    pub output: Option<String>,
    pub expected: Value,
    pub input: Value,
    pub error: Option<String>,
}

impl TestResult {
    pub fn completed(test_case: &TestCase, output: String, passed: bool) -> Self {
        Self {
            passed,
            output: Some(output),
            expected: test_case.expected.clone(),
            input: test_case.input.clone(),
            error: None,
        }
    }

    pub fn failed(test_case: &TestCase, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: None,
            expected: test_case.expected.clone(),
            input: test_case.input.clone(),
            error: Some(message.into()),
        }
    }
}
