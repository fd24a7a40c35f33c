//! Turn calculation scripts into typeset hand-calculation sheets.
//!
//! A calculation script is a small Python-style program with one `async` entry function
//! decorated with `@uzon_calc`. Every assignment and expression statement of that function
//! is recorded as a block of the sheet: the symbolic form of the right-hand side, the same
//! expression with the values plugged in, and the result, all rendered as MathML.
//!
//! # Usage
//!
//! ```rust
//! use std::path::Path;
//! use uzon_calc::{Config, RunOptions, run_source};
//!
//! let source = "\
//! from uzoncalc import *
//!
//! @uzon_calc('Beam')
//! async def sheet(ctx):
//!     span = 6 * unit.m
//!     'Simply supported beam'
//! ";
//! let ctx = run_source(
//!     Path::new("beam.py"),
//!     source.into(),
//!     &Config::default(),
//!     RunOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(ctx.name(), "Beam");
//! assert_eq!(ctx.contents().len(), 2);
//! ```
//!
//! Interactive runs, which stop at every `UI(...)` window until the client answers, are
//! driven through the [`Executor`].
//!
//! # Features
//!
//! - `ariadne`: Adds [`ParseError::to_report`] for pretty parse error reports.
//!
pub mod config;
pub mod context;
pub mod doc;
pub mod elements;
pub mod error;
pub mod executor;
pub mod instrument;
pub mod interaction;
pub mod interp;
pub mod json_db;
pub mod lower;
pub mod post_handlers;
pub mod runner;
pub mod steps;
pub mod syntax;
pub mod units;

pub use self::config::Config;
pub use self::context::{Context, ContextOptions};
pub use self::error::{
    AstConversionError, ExecutorError, InstrumentationError, ParseError, RunError, ScriptError,
    ValidationError,
};
pub use self::executor::{ExecuteRequest, ExecutionResult, Executor, Request, Response};
pub use self::interaction::{Field, FieldType, Window};
pub use self::runner::{RunOptions, run_script, run_source};
pub use self::units::{Quantity, UnitError, UnitExpr, UnitRegistry};

static_assertions::assert_impl_all!(Context: Send);
static_assertions::assert_impl_all!(Executor: Send, Sync, Clone);
