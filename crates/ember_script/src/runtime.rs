//! Script runtime management
//!
//! Each [`ScriptRuntime`] owns its own QuickJS runtime and context. The loader
//! creates a fresh one per unit, so a reloaded unit never observes globals
//! left behind by its previous version.

use parking_lot::Mutex;
use rquickjs::{Context, Ctx, Function, Runtime};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("script engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("{origin}: uncaught exception: {message}")]
    Exception { origin: String, message: String },

    #[error("{origin}: script exceeded its {limit:?} time budget")]
    Timeout { origin: String, limit: Duration },

    #[error("{origin}: script did not produce a value")]
    NoValue { origin: String },

    #[error("{origin}: script value is not JSON: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Resource bounds applied to every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    /// Wall-clock budget for one `evaluate` call.
    pub timeout: Duration,
    /// Heap ceiling for the runtime, in bytes.
    pub memory_limit: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            memory_limit: 64 * 1024 * 1024,
        }
    }
}

/// Script execution context
pub struct ScriptRuntime {
    #[allow(dead_code)] // Kept alive for context lifetime
    runtime: Runtime,
    context: Context,
    limits: ScriptLimits,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl ScriptRuntime {
    pub fn new() -> Result<Self, ScriptError> {
        Self::with_limits(ScriptLimits::default())
    }

    pub fn with_limits(limits: ScriptLimits) -> Result<Self, ScriptError> {
        let runtime = Runtime::new()?;
        runtime.set_memory_limit(limits.memory_limit);

        // QuickJS polls this periodically; returning true aborts the script.
        let deadline: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let watched = deadline.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            watched.lock().is_some_and(|deadline| Instant::now() >= deadline)
        })));

        let context = Context::full(&runtime)?;
        context.with(|ctx| install_print(&ctx))?;

        Ok(Self {
            runtime,
            context,
            limits,
            deadline,
        })
    }

    /// Read and evaluate a unit file.
    pub fn evaluate_file(&self, path: &Path) -> Result<Value, ScriptError> {
        let source = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.evaluate(&source, &path.display().to_string())
    }

    /// Evaluate `source` and return its completion value as JSON.
    ///
    /// `origin` names the unit in error messages.
    pub fn evaluate(&self, source: &str, origin: &str) -> Result<Value, ScriptError> {
        let literal = serde_json::to_string(source).map_err(|source| ScriptError::Json {
            origin: origin.to_string(),
            source,
        })?;
        // Indirect eval runs the unit in global scope and yields its
        // completion value; serialization happens inside the engine.
        let wrapped = format!(
            "(function () {{ const value = (0, eval)({literal}); \
             return value === undefined ? undefined : JSON.stringify(value); }})()"
        );

        let deadline = Instant::now() + self.limits.timeout;
        *self.deadline.lock() = Some(deadline);
        let result = self.context.with(|ctx| match ctx.eval::<Option<String>, _>(wrapped) {
            Ok(json) => Ok(json),
            Err(rquickjs::Error::Exception) => Err(ScriptError::Exception {
                origin: origin.to_string(),
                message: describe_exception(&ctx),
            }),
            Err(error) => Err(ScriptError::from(error)),
        });
        *self.deadline.lock() = None;

        let json = match result {
            Err(_) if Instant::now() >= deadline => {
                return Err(ScriptError::Timeout {
                    origin: origin.to_string(),
                    limit: self.limits.timeout,
                })
            }
            other => other?,
        };

        let json = json.ok_or_else(|| ScriptError::NoValue {
            origin: origin.to_string(),
        })?;
        serde_json::from_str(&json).map_err(|source| ScriptError::Json {
            origin: origin.to_string(),
            source,
        })
    }
}

/// Expose `print(message)` to scripts, routed to the log.
fn install_print(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let print = Function::new(ctx.clone(), |message: String| {
        tracing::info!(target: "ember::script", "{message}");
    })?;
    ctx.globals().set("print", print)?;
    Ok(())
}

fn describe_exception(ctx: &Ctx<'_>) -> String {
    let caught = ctx.catch();
    caught
        .as_exception()
        .and_then(|exception| exception.message())
        .unwrap_or_else(|| "non-error value thrown".to_string())
}
