use std::path::{Path, PathBuf};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use uzon_calc::executor::{ContinueRequest, InvalidateRequest};
use uzon_calc::{Config, ExecuteRequest, Executor, ExecutorError, FieldType, Request, Response};

const SECTION: &str = "\
from uzoncalc import *

@uzon_calc('Section check')
async def sheet(ctx):
    doc_title('Section check')
    'Section'
    inputs = UI('Section', [Field('b', 'Width', FieldType.number, default=100)])
    b = inputs.b
";

fn script(dir: &TempDir, name: &str, source: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, source).unwrap();
    path
}

fn interactive(path: &Path) -> ExecuteRequest {
    ExecuteRequest::new(path)
}

fn answer(execution_id: &str, b: i64) -> ContinueRequest {
    ContinueRequest {
        execution_id: execution_id.to_string(),
        defaults: serde_json::from_value(json!({"Section": {"b": b}})).unwrap(),
    }
}

#[tokio::test]
async fn silent_runs_complete_at_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "silent.py", SECTION);
    let executor = Executor::new(Config::default());

    let request = ExecuteRequest {
        is_silent: true,
        ..ExecuteRequest::new(&path)
    };
    let result = executor.execute(request).await.unwrap();
    assert!(result.is_completed);
    assert_eq!(result.windows.len(), 1);
    assert_eq!(result.windows[0].fields[0].kind, FieldType::Number);
    assert!(result.html.contains("<mn>100</mn>"), "{}", result.html);
    assert!(executor.is_empty());
}

#[tokio::test]
async fn interactive_runs_stop_at_windows() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "interactive.py", SECTION);
    let executor = Executor::new(Config::default());

    let first = executor.execute(interactive(&path)).await.unwrap();
    assert!(!first.is_completed);
    assert_eq!(first.html, "<p>Section</p>");
    assert_eq!(first.windows.len(), 1);
    assert_eq!(first.windows[0].title, "Section");
    assert_eq!(executor.len(), 1);

    let second = executor
        .resume(answer(&first.execution_id, 400))
        .await
        .unwrap();
    assert!(second.is_completed);
    assert_eq!(second.execution_id, first.execution_id);
    assert!(second.html.starts_with("<p>Section</p>\n"));
    assert!(second.html.contains("<mn>400</mn>"), "{}", second.html);
    assert!(executor.is_empty());
}

#[tokio::test]
async fn terminated_runs_are_gone() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "terminate.py", SECTION);
    let executor = Executor::new(Config::default());

    let first = executor.execute(interactive(&path)).await.unwrap();
    let response = executor
        .handle(Request::Terminate(uzon_calc::executor::TerminateRequest {
            execution_id: first.execution_id.clone(),
        }))
        .await
        .unwrap();
    assert_eq!(response, Response::Terminated { terminated: true });

    let err = executor
        .resume(answer(&first.execution_id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::ExecutionNotFound(_)));
}

#[tokio::test]
async fn idle_runs_expire() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "idle.py", SECTION);
    let config = Config {
        idle_ttl_secs: 1,
        ..Config::default()
    };
    let executor = Executor::new(config);

    let first = executor.execute(interactive(&path)).await.unwrap();
    assert_eq!(executor.len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(executor.len(), 1);
    tokio::time::sleep(executor.config().idle_ttl()).await;
    assert!(executor.is_empty());
    let err = executor
        .resume(answer(&first.execution_id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::ExecutionNotFound(_)));
}

#[tokio::test]
async fn endless_runs_time_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(
        &dir,
        "endless.py",
        "\
from uzoncalc import *

@uzon_calc()
async def sheet(ctx):
    while True:
        pass
",
    );
    let config = Config {
        execution_timeout_secs: 1,
        ..Config::default()
    };
    let executor = Executor::new(config);

    let request = ExecuteRequest {
        is_silent: true,
        ..ExecuteRequest::new(&path)
    };
    let err = executor.execute(request).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Timeout { secs: 1, .. }), "{err}");
    assert!(executor.is_empty());
}

#[tokio::test]
async fn script_errors_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "broken.py", "x = 1\n");
    let executor = Executor::new(Config::default());

    let err = executor.execute(interactive(&path)).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::Run(uzon_calc::RunError::NoEntryPoint)
    ));
    assert_eq!(
        err.to_string(),
        "No entry point found. Please decorate a function with @uzon_calc"
    );
}

#[tokio::test]
async fn invalidation_drops_instrumented_functions() {
    let dir = tempfile::tempdir().unwrap();
    let path = script(&dir, "invalidate.py", SECTION);
    let executor = Executor::new(Config::default());

    let request = ExecuteRequest {
        is_silent: true,
        ..ExecuteRequest::new(&path)
    };
    executor.execute(request).await.unwrap();

    let response = executor
        .handle(Request::Invalidate(InvalidateRequest {
            script_path: path.clone(),
        }))
        .await
        .unwrap();
    assert_eq!(response, Response::Invalidated { invalidated: 1 });
    assert_eq!(executor.invalidate(&path), 0);
}
