//! Test harness injection
//!
//! The candidate defines `solution(input, connection)`. We append an epilogue
//! that calls it and turns the return value into text. Arguments travel over a
//! side channel as a JSON payload `{ "input": .., "connection": .. }` rather than
//! being spliced into the program as literals: the sandbox reads it from a
//! global, the subprocess reads it from standard input.
//!
//! Both epilogues render strings as-is and every other value as JSON, so the
//! evaluator sees the same text whichever language produced it.

use anyhow::{Context, Result};
use serde_json::json;
use verdict_common::types::{Language, TestCase};

/// Global the sandbox exposes the payload through
pub const PAYLOAD_GLOBAL: &str = "__VERDICT_PAYLOAD";

const JAVASCRIPT_EPILOGUE: &str = r#"

// verdict harness
(function () {
  const __verdict = JSON.parse(globalThis.__VERDICT_PAYLOAD);
  const result = solution(__verdict.input, __verdict.connection);
  if (typeof result === 'string') return result;
  const text = JSON.stringify(result);
  return text === undefined ? String(result) : text;
})();
"#;

const PYTHON_EPILOGUE: &str = r#"


def __verdict_main():
    import json
    import sys

    payload = json.loads(sys.stdin.read())
    try:
        result = solution(payload["input"], payload["connection"])
        print(result if isinstance(result, str) else json.dumps(result))
    except Exception as error:
        print(str(error), file=sys.stderr)
        sys.exit(1)


if __name__ == "__main__":
    __verdict_main()
"#;

/// Program text plus the arguments for one test case
#[derive(Debug, Clone, PartialEq)]
pub struct InjectedProgram {
    pub source: String,
    pub payload: String,
}

pub fn inject(
    source_code: &str,
    test_case: &TestCase,
    language: Language,
    connection: &str,
) -> Result<InjectedProgram> {
    let epilogue = match language {
        Language::JavaScript => JAVASCRIPT_EPILOGUE,
        Language::Python => PYTHON_EPILOGUE,
    };

    let payload = serde_json::to_string(&json!({
        "input": test_case.input,
        "connection": connection,
    }))
    .context("Failed to serialize test input")?;

    let mut source = String::with_capacity(source_code.len() + epilogue.len());
    source.push_str(source_code);
    source.push_str(epilogue);

    Ok(InjectedProgram { source, payload })
}
