//! Live script executions, driven one request at a time.
//!
//! Each execution runs its script on a blocking worker. A request returns as soon as the
//! run either finishes or stops at a `UI` window; a stopped run is parked under its id until
//! a continue request answers the window, its idle time runs out or its deadline passes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Span, debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::context::Context;
use crate::error::{ExecutorError, RunError};
use crate::instrument;
use crate::interaction::{InteractionState, Suspension, Window};
use crate::runner::{RunOptions, run_script};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecuteRequest {
    #[serde(alias = "scriptPath")]
    pub script_path: PathBuf,
    /// Initial UI values, shaped `{window_title: {field: value}}`.
    #[serde(default)]
    pub defaults: Map<String, Json>,
    #[serde(default, alias = "isSilent")]
    pub is_silent: bool,
    /// Directory a relative `script_path` is resolved against.
    #[serde(default, alias = "packageRoot")]
    pub package_root: Option<PathBuf>,
}

impl ExecuteRequest {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        ExecuteRequest {
            script_path: script_path.into(),
            defaults: Map::new(),
            is_silent: false,
            package_root: None,
        }
    }

    fn resolved_path(&self) -> PathBuf {
        match &self.package_root {
            Some(root) if self.script_path.is_relative() => root.join(&self.script_path),
            _ => self.script_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContinueRequest {
    #[serde(alias = "executionId")]
    pub execution_id: String,
    #[serde(default)]
    pub defaults: Map<String, Json>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TerminateRequest {
    #[serde(alias = "executionId")]
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvalidateRequest {
    #[serde(alias = "scriptPath")]
    pub script_path: PathBuf,
}

/// A request of the machine-facing interface.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    Execute(ExecuteRequest),
    Continue(ContinueRequest),
    Terminate(TerminateRequest),
    Invalidate(InvalidateRequest),
}

/// The state of a run after a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    /// The sheet rendered so far.
    pub html: String,
    pub is_completed: bool,
    /// The window waiting for input, or every window met by a silent run.
    pub windows: Vec<Window>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Execution(ExecutionResult),
    Terminated { terminated: bool },
    Invalidated { invalidated: usize },
}

struct Execution {
    id: String,
    suspensions: mpsc::UnboundedReceiver<Suspension>,
    /// Answers the window the run is waiting at.
    respond: Option<oneshot::Sender<Json>>,
    task: JoinHandle<Result<Context, RunError>>,
    cancel: Arc<AtomicBool>,
    deadline: Instant,
    generation: u64,
}

impl Drop for Execution {
    fn drop(&mut self) {
        // A worker blocked at a window wakes up once `respond` is dropped.
        self.cancel.store(true, Ordering::Relaxed);
    }
}

struct Inner {
    config: Config,
    executions: Mutex<FxHashMap<String, Execution>>,
    generations: AtomicU64,
}

/// Runs scripts on behalf of a client and keeps the ones waiting for input.
///
/// Cloning is cheap; clones share their executions.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    pub fn new(config: Config) -> Self {
        Executor {
            inner: Arc::new(Inner {
                config,
                executions: Mutex::new(FxHashMap::default()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The number of parked executions.
    pub fn len(&self) -> usize {
        self.inner.executions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn handle(&self, request: Request) -> Result<Response, ExecutorError> {
        Ok(match request {
            Request::Execute(request) => Response::Execution(self.execute(request).await?),
            Request::Continue(request) => Response::Execution(self.resume(request).await?),
            Request::Terminate(request) => Response::Terminated {
                terminated: self.terminate(&request.execution_id),
            },
            Request::Invalidate(request) => Response::Invalidated {
                invalidated: self.invalidate(&request.script_path),
            },
        })
    }

    /// Starts a run and waits until it finishes or reaches a window.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecutionResult, ExecutorError> {
        let id = Uuid::new_v4().to_string();
        let path = request.resolved_path();
        info!(%id, path = %path.display(), silent = request.is_silent, "starting execution");

        let (sender, suspensions) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let options = RunOptions {
            defaults: request.defaults,
            is_silent: request.is_silent,
            interaction: InteractionState::connected(sender, Arc::clone(&cancel)),
            ..RunOptions::default()
        };
        let config = self.inner.config.clone();
        let span = Span::current();
        let task = tokio::task::spawn_blocking(move || -> Result<Context, RunError> {
            let _guard = span.enter();
            let mut ctx = run_script(&path, &config, options)?;
            ctx.interaction = InteractionState::default();
            Ok(ctx)
        });

        let execution = Execution {
            id,
            suspensions,
            respond: None,
            task,
            cancel,
            deadline: Instant::now() + self.inner.config.execution_timeout(),
            generation: 0,
        };
        self.advance(execution).await
    }

    /// Answers the window a parked run is waiting at and waits for its next stop.
    pub async fn resume(&self, request: ContinueRequest) -> Result<ExecutionResult, ExecutorError> {
        let mut execution = self
            .inner
            .executions
            .lock()
            .remove(&request.execution_id)
            .ok_or_else(|| ExecutorError::ExecutionNotFound(request.execution_id.clone()))?;
        debug!(id = %execution.id, "continuing execution");
        if let Some(respond) = execution.respond.take()
            && respond.send(Json::Object(request.defaults)).is_err()
        {
            debug!(id = %execution.id, "worker stopped before the answer arrived");
        }
        self.advance(execution).await
    }

    /// Cancels a run. Returns whether it was known.
    pub fn terminate(&self, id: &str) -> bool {
        let execution = self.inner.executions.lock().remove(id);
        if execution.is_some() {
            info!(id, "terminated execution");
        }
        execution.is_some()
    }

    /// Drops the instrumented functions of `path`.
    pub fn invalidate(&self, path: &Path) -> usize {
        let dropped = instrument::invalidate(path);
        debug!(path = %path.display(), dropped, "invalidated instrumentation cache");
        dropped
    }

    async fn advance(&self, mut execution: Execution) -> Result<ExecutionResult, ExecutorError> {
        let stop = tokio::time::timeout_at(execution.deadline, async {
            tokio::select! {
                biased;
                Some(suspension) = execution.suspensions.recv() => Ok(suspension),
                finished = &mut execution.task => Err(finished),
            }
        })
        .await;

        let Ok(stop) = stop else {
            let secs = self.inner.config.execution_timeout_secs;
            warn!(id = %execution.id, secs, "execution timed out");
            return Err(ExecutorError::Timeout {
                id: execution.id.clone(),
                secs,
            });
        };

        match stop {
            Ok(Suspension {
                window,
                html,
                respond,
            }) => {
                debug!(id = %execution.id, title = %window.title, "waiting for input");
                execution.respond = Some(respond);
                let execution_id = execution.id.clone();
                self.park(execution);
                Ok(ExecutionResult {
                    execution_id,
                    html,
                    is_completed: false,
                    windows: vec![window],
                })
            }
            Err(finished) => {
                let mut ctx = finished??;
                info!(id = %execution.id, "execution completed");
                Ok(ExecutionResult {
                    execution_id: execution.id.clone(),
                    html: ctx.html_content(),
                    is_completed: true,
                    windows: std::mem::take(&mut ctx.ui_windows),
                })
            }
        }
    }

    /// Keeps a run waiting at a window until its idle time or its deadline runs out.
    fn park(&self, mut execution: Execution) {
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        execution.generation = generation;
        let wake = execution
            .deadline
            .min(Instant::now() + self.inner.config.idle_ttl());
        let id = execution.id.clone();
        self.inner.executions.lock().insert(id.clone(), execution);
        tokio::spawn(expire(Arc::downgrade(&self.inner), id, generation, wake));
    }
}

async fn expire(inner: Weak<Inner>, id: String, generation: u64, wake: Instant) {
    tokio::time::sleep_until(wake).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut executions = inner.executions.lock();
    if executions
        .get(&id)
        .is_some_and(|execution| execution.generation == generation)
    {
        executions.remove(&id);
        info!(%id, "dropped idle execution");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn requests_accept_both_key_styles() {
        let request: Request = serde_json::from_value(json!({
            "type": "execute",
            "script_path": "sheet.py",
            "defaults": {"Section": {"b": 300}},
            "isSilent": true,
        }))
        .unwrap();
        let Request::Execute(request) = request else {
            panic!("expected an execute request");
        };
        assert_eq!(request.script_path, PathBuf::from("sheet.py"));
        assert!(request.is_silent);
        assert_eq!(request.defaults["Section"]["b"], json!(300));

        let request: Request =
            serde_json::from_value(json!({"type": "continue", "executionId": "abc"})).unwrap();
        assert_eq!(
            request,
            Request::Continue(ContinueRequest {
                execution_id: "abc".to_string(),
                defaults: Map::new(),
            })
        );
    }

    #[test]
    fn relative_scripts_resolve_against_the_package_root() {
        let mut request = ExecuteRequest::new("calc/sheet.py");
        assert_eq!(request.resolved_path(), PathBuf::from("calc/sheet.py"));
        request.package_root = Some(PathBuf::from("/srv/reports"));
        assert_eq!(
            request.resolved_path(),
            PathBuf::from("/srv/reports/calc/sheet.py")
        );
    }

    #[test]
    fn results_serialize_in_camel_case() {
        let result = ExecutionResult {
            execution_id: "abc".to_string(),
            html: "<p>x</p>".to_string(),
            is_completed: true,
            windows: Vec::new(),
        };
        assert_eq!(
            serde_json::to_value(Response::Execution(result)).unwrap(),
            json!({"executionId": "abc", "html": "<p>x</p>", "isCompleted": true, "windows": []})
        );
        assert_eq!(
            serde_json::to_value(Response::Terminated { terminated: false }).unwrap(),
            json!({"terminated": false})
        );
    }

    #[tokio::test]
    async fn unknown_executions() {
        let executor = Executor::new(Config::default());
        let err = executor
            .resume(ContinueRequest {
                execution_id: "missing".to_string(),
                defaults: Map::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::ExecutionNotFound(id) if id == "missing"));
        assert!(!executor.terminate("missing"));
    }
}
