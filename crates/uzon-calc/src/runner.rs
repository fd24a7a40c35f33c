//! Loading a script and running its entry function.
//!
//! The script module runs once to define its functions. The function decorated with
//! `@uzon_calc` is then instrumented, redefined in the same globals and called with the
//! context and the unit registry.

use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};
use tracing::{debug, info_span, warn};

use crate::config::Config;
use crate::context::Context;
use crate::error::{InstrumentationError, RunError};
use crate::instrument::{FunctionSource, instrument};
use crate::interaction::InteractionState;
use crate::interp::{Args, Entry, Exc, Function, Interpreter, Value};
use crate::syntax::ast::Stmt;
use crate::syntax::parse_module;

/// How a script is run.
#[derive(Debug)]
pub struct RunOptions {
    /// Initial UI values, shaped `{window_title: {field: value}}`.
    pub defaults: Map<String, Json>,
    /// Resolve `UI` windows from `defaults` instead of suspending.
    pub is_silent: bool,
    /// Extra keyword arguments for the entry function. Names it does not accept are dropped.
    pub kwargs: IndexMap<String, Json>,
    pub interaction: InteractionState,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            defaults: Map::new(),
            is_silent: true,
            kwargs: IndexMap::new(),
            interaction: InteractionState::default(),
        }
    }
}

/// Reads the script at `path` and runs it.
pub fn run_script(path: &Path, config: &Config, options: RunOptions) -> Result<Context, RunError> {
    let source = fs::read_to_string(path).map_err(|source| RunError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    run_source(path, source.into(), config, options)
}

/// Runs `source` as the script at `path`.
///
/// The context is retired whether the run succeeds or not; a failure to flush its JSON
/// cache is logged.
pub fn run_source(
    path: &Path,
    source: Arc<str>,
    config: &Config,
    options: RunOptions,
) -> Result<Context, RunError> {
    let _span = info_span!("run", path = %path.display()).entered();

    let body = parse_module(&source).map_err(|err| RunError::Parse {
        path: path.to_path_buf(),
        line: err.line(&source),
        source: err,
    })?;

    let mut ctx = Context::new(None, Some(path.to_path_buf()), config);
    ctx.set_silent(options.is_silent);
    ctx.vars = options.defaults;
    ctx.interaction = options.interaction;

    let mut interp = Interpreter::new(ctx, path);
    let result = run_entry(&mut interp, &body, &source, options.kwargs);
    let mut ctx = interp.into_context();
    if let Err(err) = ctx.exit() {
        warn!(%err, "failed to flush the json db");
    }
    result?;
    debug!(blocks = ctx.contents().len(), "run finished");
    Ok(ctx)
}

fn run_entry(
    interp: &mut Interpreter,
    body: &[Stmt],
    source: &Arc<str>,
    kwargs: IndexMap<String, Json>,
) -> Result<(), RunError> {
    let path = interp.path().to_path_buf();
    let script_error = |exc: Exc| RunError::Script {
        path: path.clone(),
        source: exc.into_script_error(),
    };

    interp.exec_module(body).map_err(script_error)?;
    let entry = interp.entry().ok_or(RunError::NoEntryPoint)?;
    interp.ctx.set_name(entry.display_name());

    let function = instrumented(interp, &entry, source)?;
    let args = entry_args(&function, kwargs);
    interp
        .call(&Value::Function(function), args)
        .map_err(script_error)?;
    Ok(())
}

fn instrumented(
    interp: &mut Interpreter,
    entry: &Entry,
    source: &Arc<str>,
) -> Result<Rc<Function>, RunError> {
    if entry.function.instrumented {
        return Ok(Rc::clone(&entry.function));
    }
    let def = &entry.def;
    let first_line = def
        .decorators
        .first()
        .map_or(def.line, |decorator| decorator.line);
    let function = FunctionSource::new(interp.path(), Arc::clone(source), &def.name, first_line);
    let def = instrument(&function)?;
    let rebuilt = interp
        .define_instrumented(def, entry.function.closure.clone())
        .map_err(|exc| InstrumentationError::new(&function.name, exc.into_script_error()))?;
    Ok(rebuilt)
}

/// `ctx` and `unit` plus the caller's keyword arguments the function accepts.
fn entry_args(function: &Function, kwargs: IndexMap<String, Json>) -> Args {
    let params = function.params();
    let accepts = |name: &str| {
        params.kwarg.is_some()
            || params
                .args
                .iter()
                .chain(&params.kwonly)
                .any(|param| param.name == name)
    };
    let mut args = Args::default();
    for (name, value) in kwargs {
        if accepts(&name) {
            args.keywords.insert(name, Value::from_json(&value));
        } else {
            debug!(%name, "dropping keyword argument");
        }
    }
    for (name, value) in [("ctx", Value::Context), ("unit", Value::UnitRegistry)] {
        if accepts(name) {
            args.keywords.insert(name.to_string(), value);
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::{Phase, ScriptError};

    fn run(name: &str, source: &str) -> Result<Context, RunError> {
        let path = PathBuf::from(format!("runner-{name}.py"));
        run_source(&path, source.into(), &Config::default(), RunOptions::default())
    }

    #[test]
    fn records_the_entry_function() {
        let ctx = run(
            "records",
            "\
from uzoncalc import *

@uzon_calc('Sheet')
async def sheet(ctx):
    a = 1 + 2
    'plain text'
",
        )
        .unwrap();
        assert_eq!(ctx.name(), "Sheet");
        assert_eq!(ctx.contents().len(), 2);
        assert!(ctx.contents()[0].starts_with("<p><math"));
        assert_eq!(ctx.contents()[1], "<p>plain text</p>");
    }

    #[test]
    fn missing_entry_point() {
        let err = run("missing", "x = 1\n").unwrap_err();
        assert!(matches!(err, RunError::NoEntryPoint));
    }

    #[test]
    fn parse_errors_carry_the_line() {
        match run("parse", "x = 1\ny = = 2\n").unwrap_err() {
            RunError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn runtime_errors_cite_script_lines() {
        let err = run(
            "lines",
            "\
from uzoncalc import *

@uzon_calc()
async def sheet(ctx):
    a = 1
    b = a / 0
",
        )
        .unwrap_err();
        match err {
            RunError::Script { source, .. } => {
                assert_eq!(source.kind(), "ZeroDivisionError");
                assert_eq!(source.line(), Some(6));
            }
            other => panic!("expected a script error, got {other:?}"),
        }
    }

    #[test]
    fn disallowed_statements_fail_instrumentation() {
        let err = run(
            "validate",
            "\
from uzoncalc import *
total = 0

@uzon_calc()
async def sheet(ctx):
    global total
    total = 1
",
        )
        .unwrap_err();
        match err {
            RunError::Instrumentation(err) => {
                assert_eq!(err.function, "sheet");
                assert_eq!(err.phase(), Phase::Validate);
            }
            other => panic!("expected an instrumentation error, got {other:?}"),
        }
    }

    #[test]
    fn defaults_become_vars_and_kwargs_are_filtered() {
        let source = "\
from uzoncalc import *

@uzon_calc()
async def sheet(ctx, scale=1):
    inputs = UI('Section', [Field('b', 'Width', FieldType.number, default=100)])
    width = inputs.b * scale
";
        let options = RunOptions {
            defaults: serde_json::from_str(r#"{"Section": {"b": 250}}"#).unwrap(),
            kwargs: IndexMap::from([
                ("scale".to_string(), Json::from(2)),
                ("unknown".to_string(), Json::from(true)),
            ]),
            ..RunOptions::default()
        };
        let ctx = run_source(
            Path::new("runner-defaults.py"),
            source.into(),
            &Config::default(),
            options,
        )
        .unwrap();
        assert_eq!(ctx.ui_windows.len(), 1);
        assert_eq!(ctx.ui_windows[0].fields[0].default, Json::from(250));
        let last = ctx.contents().last().unwrap();
        assert!(last.contains("<mn>500</mn>"), "{last}");
    }

    #[test]
    fn cancelled_runs_stop() {
        let interaction = InteractionState::default();
        interaction
            .cancel_flag()
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let options = RunOptions {
            interaction,
            ..RunOptions::default()
        };
        let err = run_source(
            Path::new("runner-cancel.py"),
            "x = 1\n".into(),
            &Config::default(),
            options,
        )
        .unwrap_err();
        assert!(err.is_cancelled());
        assert!(matches!(
            err,
            RunError::Script {
                source: ScriptError::Cancelled,
                ..
            }
        ));
    }
}
