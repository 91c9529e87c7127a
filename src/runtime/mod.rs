//! JavaScript runtime powered by the Boa engine
//!
//! A `Runtime` owns one engine context and doubles as the root of a worker
//! tree: running a script first evaluates it, then drains the thread's
//! receive port until every worker the script spawned has gone idle and
//! been reclaimed.
//!
//! Provided to script:
//! - Console API (console.log, console.error, etc.)
//! - Worker API (Worker, postMessage, terminate, onMessage, closing)
//!
//! Worker threads build their contexts through the same constructor as the
//! main thread, so the API surface is identical all the way down the tree.

use boa_engine::{Context, JsResult, JsValue, Source};
use boa_gc::{Finalize, Trace};
use boa_runtime::{register, ConsoleState, Logger, RegisterOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub mod port;
mod worker;

use port::Port;

/// Errors that can occur during runtime execution
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("JavaScript error: {0}")]
    JsError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Console logger printing to stdout/stderr
#[derive(Debug, Clone, Default, Trace, Finalize)]
pub struct KraitLogger;

impl Logger for KraitLogger {
    fn log(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        println!("{}", msg);
        Ok(())
    }

    fn info(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        println!("{}", msg);
        Ok(())
    }

    fn warn(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        eprintln!("{}", msg);
        Ok(())
    }

    fn error(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        eprintln!("{}", msg);
        Ok(())
    }
}

/// Build an engine context with the krait globals installed. Shared by the
/// main thread and every worker thread.
pub(crate) fn build_context() -> RuntimeResult<Context> {
    let mut context = Context::default();

    register(
        &mut context,
        RegisterOptions::new().with_console_logger(KraitLogger),
    )
    .map_err(|e| RuntimeError::JsError(e.to_string()))?;

    worker::register_worker_api(&mut context).map_err(|e| RuntimeError::JsError(e.to_string()))?;

    Ok(context)
}

/// Runtime configuration
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Base path against which relative script paths are resolved
    pub base_path: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// The krait JavaScript runtime: one engine context plus the root of the
/// worker tree.
pub struct Runtime {
    context: Context,
    receive_port: Arc<Port>,
    config: RuntimeConfig,
}

impl Runtime {
    /// Create a new runtime with default configuration
    pub fn new() -> RuntimeResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> RuntimeResult<Self> {
        let receive_port = worker::init_main_thread();
        let context = build_context()?;

        Ok(Self {
            context,
            receive_port,
            config,
        })
    }

    /// Evaluate a script fragment and return its completion value. Does not
    /// run the message loop; workers spawned by the fragment start running
    /// but their replies stay queued.
    pub fn eval(&mut self, code: &str) -> RuntimeResult<JsValue> {
        self.context
            .eval(Source::from_bytes(code.as_bytes()))
            .map_err(|e| RuntimeError::JsError(e.to_string()))
    }

    /// Evaluate code, then drain the message loop until the worker tree is
    /// quiescent.
    pub fn run(&mut self, code: &str) -> RuntimeResult<()> {
        self.eval(code)?;
        worker::run_message_loop(&mut self.context);
        Ok(())
    }

    /// Execute a script file as the root worker. A load or evaluation
    /// failure is returned without entering the message loop.
    pub fn run_file(&mut self, path: &Path) -> RuntimeResult<()> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.base_path.join(path)
        };
        let source = std::fs::read_to_string(&path)?;
        self.eval(&source)?;
        worker::run_message_loop(&mut self.context);
        Ok(())
    }

    /// Direct access to the engine context.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Terminate and join anything the script left running, so embedders
        // and tests do not leak worker threads.
        worker::teardown_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_runtime_creation() {
        let runtime = Runtime::new();
        assert!(runtime.is_ok());
    }

    #[test]
    fn test_basic_javascript() {
        let mut runtime = Runtime::new().unwrap();
        let result = runtime.eval("1 + 1").unwrap();
        assert_eq!(result.as_number(), Some(2.0));
    }

    #[test]
    fn test_console_log() {
        let mut runtime = Runtime::new().unwrap();
        assert!(runtime.eval("console.log('hello from krait')").is_ok());
    }

    #[test]
    fn test_worker_requires_new() {
        let mut runtime = Runtime::new().unwrap();
        let result = runtime
            .eval(
                r#"
                let kind = "no-throw";
                try { Worker("x.js"); } catch (e) {
                    kind = e instanceof TypeError ? "type-error" : "other";
                }
                kind
                "#,
            )
            .unwrap();
        assert_eq!(
            result.as_string().map(|s| s.to_std_string_escaped()),
            Some("type-error".to_string())
        );
    }

    #[test]
    fn test_worker_requires_string_path() {
        let mut runtime = Runtime::new().unwrap();
        let result = runtime
            .eval(
                r#"
                let kind = "no-throw";
                try { new Worker(42); } catch (e) {
                    kind = e instanceof TypeError ? "type-error" : "other";
                }
                kind
                "#,
            )
            .unwrap();
        assert_eq!(
            result.as_string().map(|s| s.to_std_string_escaped()),
            Some("type-error".to_string())
        );
    }

    #[test]
    fn test_worker_ping() {
        let dir = TempDir::new().unwrap();
        let ping = write_script(
            &dir,
            "ping.js",
            "onMessage = function (v) { postMessage(v + 1); };",
        );

        let mut runtime = Runtime::new().unwrap();
        runtime
            .run(&format!(
                r#"
                globalThis.result = -1;
                const w = new Worker("{}");
                w.onMessage = function (v) {{
                    globalThis.result = v;
                    this.terminate();
                }};
                w.postMessage(1);
                null;
                "#,
                ping.display()
            ))
            .unwrap();

        let result = runtime.eval("globalThis.result").unwrap();
        assert_eq!(result.as_number(), Some(2.0));
        // The handle is still referenced from script, so its slot survives
        // until the runtime is dropped.
        assert_eq!(worker::active_workers(), 1);
        assert!(runtime.receive_port.lock().is_empty());
    }

    #[test]
    fn test_worker_messages_are_fifo() {
        let dir = TempDir::new().unwrap();
        let collect = write_script(
            &dir,
            "collect.js",
            r#"
            const seen = [];
            onMessage = function (v) {
                seen.push(v);
                if (seen.length === 3) { postMessage(seen); }
            };
            "#,
        );

        let mut runtime = Runtime::new().unwrap();
        runtime
            .run(&format!(
                r#"
                globalThis.result = null;
                const w = new Worker("{}");
                w.onMessage = function (v) {{
                    globalThis.result = v;
                    this.terminate();
                }};
                w.postMessage(1);
                w.postMessage(2);
                w.postMessage(3);
                null;
                "#,
                collect.display()
            ))
            .unwrap();

        let result = runtime.eval("JSON.stringify(globalThis.result)").unwrap();
        assert_eq!(
            result.as_string().map(|s| s.to_std_string_escaped()),
            Some("[1,2,3]".to_string())
        );
    }

    #[test]
    fn test_worker_chain_of_three() {
        let dir = TempDir::new().unwrap();
        let leaf = write_script(
            &dir,
            "chain_c.js",
            "onMessage = function (v) { postMessage(v - 1); };",
        );
        let middle = write_script(
            &dir,
            "chain_b.js",
            &format!(
                r#"
                const c = new Worker("{}");
                c.onMessage = function (v) {{ postMessage(v - 1); }};
                onMessage = function (v) {{ c.postMessage(v - 1); }};
                "#,
                leaf.display()
            ),
        );

        let mut runtime = Runtime::new().unwrap();
        runtime
            .run(&format!(
                r#"
                globalThis.result = -1;
                (function () {{
                    const b = new Worker("{}");
                    b.onMessage = function (v) {{ globalThis.result = v; }};
                    b.postMessage(3);
                }})();
                "#,
                middle.display()
            ))
            .unwrap();

        let result = runtime.eval("globalThis.result").unwrap();
        assert_eq!(result.as_number(), Some(0.0));
        // The middle worker's handle was only reachable through the slot
        // array, so the rendezvous reclaimed it before the loop returned.
        assert_eq!(worker::active_workers(), 0);
    }

    #[test]
    fn test_orphan_worker_is_collected() {
        let dir = TempDir::new().unwrap();
        let orphan = write_script(&dir, "orphan.js", "onMessage = function () {};");

        let mut runtime = Runtime::new().unwrap();
        // Never referenced again; returning from run() at all proves the
        // rendezvous reclaimed it.
        runtime
            .run(&format!("new Worker(\"{}\"); null;", orphan.display()))
            .unwrap();
        assert_eq!(worker::active_workers(), 0);
    }

    #[test]
    fn test_terminate_while_busy() {
        let dir = TempDir::new().unwrap();
        let busy = write_script(&dir, "busy.js", "while (!closing) {}");

        let mut runtime = Runtime::new().unwrap();
        runtime
            .run(&format!(
                r#"
                const w = new Worker("{}");
                w.terminate();
                null;
                "#,
                busy.display()
            ))
            .unwrap();
    }

    #[test]
    fn test_bad_payload_raises_type_error() {
        let dir = TempDir::new().unwrap();
        let echo = write_script(
            &dir,
            "echo.js",
            "onMessage = function (v) { postMessage(v + 1); };",
        );

        let mut runtime = Runtime::new().unwrap();
        runtime
            .run(&format!(
                r#"
                globalThis.threw = false;
                globalThis.result = -1;
                (function () {{
                    const w = new Worker("{}");
                    w.onMessage = function (v) {{ globalThis.result = v; }};
                    const cycle = {{}};
                    cycle.cycle = cycle;
                    try {{
                        w.postMessage(cycle);
                    }} catch (e) {{
                        globalThis.threw = e instanceof TypeError;
                    }}
                    w.postMessage(41);
                }})();
                "#,
                echo.display()
            ))
            .unwrap();

        // The cyclic payload threw and was never enqueued; the worker stayed
        // responsive to the valid post that followed.
        let threw = runtime.eval("globalThis.threw").unwrap();
        assert_eq!(threw.as_boolean(), Some(true));
        let result = runtime.eval("globalThis.result").unwrap();
        assert_eq!(result.as_number(), Some(42.0));
    }

    #[test]
    fn test_uncaught_onmessage_error_keeps_worker_alive() {
        let dir = TempDir::new().unwrap();
        let flaky = write_script(
            &dir,
            "flaky.js",
            r#"
            let n = 0;
            onMessage = function (v) {
                n += 1;
                if (n === 1) { throw new Error("boom"); }
                postMessage(v);
            };
            "#,
        );

        let mut runtime = Runtime::new().unwrap();
        runtime
            .run(&format!(
                r#"
                globalThis.result = -1;
                const w = new Worker("{}");
                w.onMessage = function (v) {{
                    globalThis.result = v;
                    this.terminate();
                }};
                w.postMessage(1);
                w.postMessage(2);
                null;
                "#,
                flaky.display()
            ))
            .unwrap();

        // The first dispatch threw; the worker kept draining its port and
        // answered the second message.
        let result = runtime.eval("globalThis.result").unwrap();
        assert_eq!(result.as_number(), Some(2.0));
    }

    #[test]
    fn test_nested_idle_workers_are_reclaimed_leaf_first() {
        let dir = TempDir::new().unwrap();
        let leaf = write_script(&dir, "leaf.js", "onMessage = function () {};");
        let middle = write_script(
            &dir,
            "middle.js",
            &format!(
                "new Worker(\"{}\"); onMessage = function () {{}}; null;",
                leaf.display()
            ),
        );

        let mut runtime = Runtime::new().unwrap();
        // The middle worker cannot exit before the leaf releases its port,
        // so completing at all demonstrates leaf-first reclamation.
        runtime
            .run(&format!("new Worker(\"{}\"); null;", middle.display()))
            .unwrap();
        assert_eq!(worker::active_workers(), 0);
    }

    #[test]
    fn test_missing_worker_script_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does_not_exist.js");

        let mut runtime = Runtime::new().unwrap();
        // The child fails to load, shuts down immediately, and the next
        // rendezvous reclaims it.
        runtime
            .run(&format!("new Worker(\"{}\"); null;", missing.display()))
            .unwrap();
        assert_eq!(worker::active_workers(), 0);
    }

    #[test]
    fn test_run_file_missing_script_errors() {
        let mut runtime = Runtime::new().unwrap();
        let result = runtime.run_file(Path::new("/nonexistent/krait-main.js"));
        assert!(matches!(result, Err(RuntimeError::IoError(_))));
    }
}
