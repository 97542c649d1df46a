// In-process JavaScript sandbox (QuickJS via rquickjs)
//
// Each run gets its own runtime with a heap ceiling and a wall-clock
// interrupt. Capability surface:
// - console.* forwarded to tracing
// - require() over a pre-resolved module table, no filesystem lookup
// - process.exit() reported as an exit outcome instead of ending the host
// - db.query() when a relational fixture is active, bounded by the same deadline
// The runtime is dropped before the outcome is returned, on every path.
//
// The interrupt handler only fires while bytecode runs; native work such as
// regex backtracking never checks it. Each job therefore runs on its own
// detached thread and the caller stops waiting shortly after the deadline.
// A job that overran is abandoned and finishes on its own.

use super::{FixtureAccess, LanguageRunner, RunContext, RunOutcome};
use crate::fixture::run_statement;
use crate::injector::{InjectedProgram, PAYLOAD_GLOBAL};
use crate::packages::ModuleTable;
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Runtime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Native stack allowed to candidate code; keeps deep recursion from
/// overflowing the blocking thread
const MAX_STACK_BYTES: usize = 512 * 1024;

/// How long past the deadline the caller keeps waiting for a job to report
const WATCHDOG_GRACE: Duration = Duration::from_millis(250);

const PRELUDE: &str = r#"
(function () {
  const render = (args) => args.map((a) => {
    if (typeof a === 'string') return a;
    try {
      const text = JSON.stringify(a);
      return text === undefined ? String(a) : text;
    } catch (_) {
      return String(a);
    }
  }).join(' ');

  globalThis.console = Object.freeze({
    log: (...args) => __verdict_log('log', render(args)),
    info: (...args) => __verdict_log('info', render(args)),
    warn: (...args) => __verdict_log('warn', render(args)),
    error: (...args) => __verdict_log('error', render(args)),
  });

  globalThis.process = Object.freeze({
    env: Object.freeze({}),
    exit: (code) => {
      const status = code === undefined ? 0 : (Number(code) | 0);
      __verdict_exit(status);
      throw new Error('Process exited with code ' + status);
    },
  });

  const factories = Object.create(null);
  const cache = Object.create(null);
  globalThis.__verdict_define = (name, factory) => { factories[name] = factory; };
  globalThis.require = (name) => {
    if (name in cache) return cache[name];
    const factory = factories[name];
    if (factory === undefined) throw new Error('Module not found: ' + name);
    const module = { exports: {} };
    cache[name] = module.exports;
    factory.call(module.exports, module, module.exports, globalThis.require);
    cache[name] = module.exports;
    return module.exports;
  };

  globalThis.db = Object.freeze({
    query: (connection, sql) => {
      if (typeof __verdict_query !== 'function') {
        throw new Error('No database fixture is attached to this run');
      }
      const reply = JSON.parse(__verdict_query(String(connection), String(sql)));
      if (reply.error !== undefined) throw new Error(reply.error);
      return reply.result;
    },
  });
})();
"#;

pub struct SandboxRunner {
    timeout: Duration,
    memory_limit_mb: u32,
}

impl SandboxRunner {
    pub fn new(timeout: Duration, memory_limit_mb: u32) -> Self {
        Self {
            timeout,
            memory_limit_mb,
        }
    }
}

#[async_trait]
impl LanguageRunner for SandboxRunner {
    async fn run(&self, program: &InjectedProgram, ctx: &RunContext<'_>) -> Result<RunOutcome> {
        let job = SandboxJob {
            source: program.source.clone(),
            payload: program.payload.clone(),
            modules: Arc::clone(&ctx.modules),
            fixture: ctx.fixture.clone(),
            timeout: self.timeout,
            memory_limit_mb: self.memory_limit_mb,
        };

        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::Builder::new()
            .name("verdict-sandbox".to_string())
            .spawn(move || {
                let _ = tx.send(job.execute());
            })
            .context("Failed to start sandbox thread")?;

        match tokio::time::timeout(self.timeout + WATCHDOG_GRACE, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(anyhow!("Sandbox thread panicked")),
            Err(_) => {
                warn!(
                    limit_ms = self.timeout.as_millis() as u64,
                    "Sandbox overran its deadline in native code; abandoning it"
                );
                Ok(RunOutcome::TimedOut {
                    limit_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    fn name(&self) -> &'static str {
        "sandbox"
    }
}

/// Owned inputs for one run on the blocking pool
struct SandboxJob {
    source: String,
    payload: String,
    modules: Arc<ModuleTable>,
    fixture: Option<FixtureAccess>,
    timeout: Duration,
    memory_limit_mb: u32,
}

impl SandboxJob {
    fn execute(self) -> Result<RunOutcome> {
        let started = Instant::now();
        let runtime = Runtime::new().context("Failed to create JavaScript runtime")?;
        runtime.set_memory_limit(self.memory_limit_mb as usize * 1024 * 1024);
        runtime.set_max_stack_size(MAX_STACK_BYTES);

        let deadline = started + self.timeout;
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&interrupted);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            if Instant::now() >= deadline {
                flag.store(true, Ordering::SeqCst);
                true
            } else {
                false
            }
        })));

        let exit_code: Arc<Mutex<Option<i32>>> = Arc::new(Mutex::new(None));
        let evaluated = {
            let context = Context::full(&runtime).context("Failed to create JavaScript context")?;
            context.with(|ctx| self.evaluate(&ctx, Arc::clone(&exit_code), deadline))
        };
        drop(runtime);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let outcome = if interrupted.load(Ordering::SeqCst) || Instant::now() >= deadline {
            RunOutcome::TimedOut {
                limit_ms: self.timeout.as_millis() as u64,
            }
        } else if let Some(code) = exit_code.lock().ok().and_then(|mut slot| slot.take()) {
            RunOutcome::ExitCalled(code)
        } else {
            match evaluated {
                Ok(output) => RunOutcome::Completed(output),
                Err(message) if message.contains("out of memory") => {
                    RunOutcome::Threw(format!("Memory limit of {}MB exceeded", self.memory_limit_mb))
                }
                Err(message) => RunOutcome::Threw(message),
            }
        };

        debug!(outcome = outcome.label(), elapsed_ms = elapsed_ms, "Sandbox run finished");
        Ok(outcome)
    }

    /// Install capabilities, define modules, run the program
    fn evaluate<'js>(
        &self,
        ctx: &Ctx<'js>,
        exit_code: Arc<Mutex<Option<i32>>>,
        deadline: Instant,
    ) -> Result<String, String> {
        self.install_capabilities(ctx, exit_code, deadline)
            .map_err(|e| format!("Failed to prepare sandbox: {}", e))?;

        if let Err(e) = ctx.eval::<(), _>(PRELUDE).catch(ctx) {
            return Err(format!("Failed to prepare sandbox: {}", describe(ctx, e)));
        }

        for (name, source) in self.modules.iter() {
            let definition = format!(
                "__verdict_define({}, function (module, exports, require) {{\n{}\n}});",
                serde_json::Value::String(name.clone()),
                source
            );
            if let Err(e) = ctx.eval::<(), _>(definition).catch(ctx) {
                warn!(module = %name, error = %describe(ctx, e), "Could not load module");
            }
        }

        ctx.eval::<String, _>(self.source.as_str())
            .catch(ctx)
            .map_err(|e| describe(ctx, e))
    }

    fn install_capabilities<'js>(
        &self,
        ctx: &Ctx<'js>,
        exit_code: Arc<Mutex<Option<i32>>>,
        deadline: Instant,
    ) -> rquickjs::Result<()> {
        let globals = ctx.globals();

        globals.set(PAYLOAD_GLOBAL, self.payload.clone())?;

        globals.set(
            "__verdict_log",
            Function::new(ctx.clone(), |level: String, line: String| {
                debug!(target: "verdict::sandbox", level = %level, "{}", line);
            })?,
        )?;

        globals.set(
            "__verdict_exit",
            Function::new(ctx.clone(), move |code: i32| {
                if let Ok(mut slot) = exit_code.lock() {
                    slot.get_or_insert(code);
                }
            })?,
        )?;

        if let Some(fixture) = self.fixture.clone() {
            globals.set(
                "__verdict_query",
                Function::new(ctx.clone(), move |connection: String, sql: String| {
                    query_fixture(&fixture, &connection, &sql, deadline)
                })?,
            )?;
        }

        Ok(())
    }
}

/// JSON envelope `{"result": ..}` or `{"error": ".."}` for the `db.query` shim
fn query_fixture(fixture: &FixtureAccess, connection: &str, sql: &str, deadline: Instant) -> String {
    if connection != fixture.connection {
        return serde_json::json!({ "error": format!("Unknown connection: {}", connection) }).to_string();
    }

    match run_statement(&fixture.path, sql, Some(deadline)) {
        Ok(result) => format!(r#"{{"result":{}}}"#, result),
        Err(e) => serde_json::json!({ "error": format!("{:#}", e) }).to_string(),
    }
}

fn describe<'js>(ctx: &Ctx<'js>, err: CaughtError<'js>) -> String {
    match err {
        CaughtError::Exception(exception) => exception
            .message()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Uncaught exception".to_string()),
        CaughtError::Value(value) => {
            if let Some(text) = value.as_string().and_then(|s| s.to_string().ok()) {
                return text;
            }
            ctx.json_stringify(value)
                .ok()
                .flatten()
                .and_then(|s| s.to_string().ok())
                .unwrap_or_else(|| "Uncaught exception".to_string())
        }
        CaughtError::Error(e) => e.to_string(),
    }
}
