//! Turning script functions into recording functions.
//!
//! A function is cut out of its script, parsed, rewritten so that every recordable
//! statement is followed by a record statement, checked against the allow-list and cached.

mod cache;
mod call_filters;
mod driver;
mod rewriter;
mod validate;

use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHasher;

pub use cache::{cached_functions, instrument, invalidate};
pub use call_filters::{
    CallFilter, CallFilterRegistry, call_filters, is_hidden_call, register_call_filter,
    register_hidden_function, unregister_hidden_function,
};
pub use rewriter::{HIDE, Rewriter, SHOW};
pub use validate::validate;

/// A function inside a script module.
#[derive(Debug, Clone)]
pub struct FunctionSource {
    pub path: PathBuf,
    /// The whole script text.
    pub source: Arc<str>,
    pub name: String,
    /// The line of the first decorator, or of `def` when there is none.
    pub first_line: u32,
}

impl FunctionSource {
    pub fn new(
        path: impl Into<PathBuf>,
        source: impl Into<Arc<str>>,
        name: impl Into<String>,
        first_line: u32,
    ) -> Self {
        FunctionSource {
            path: path.into(),
            source: source.into(),
            name: name.into(),
            first_line,
        }
    }

    pub fn content_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.source.hash(&mut hasher);
        hasher.finish()
    }
}
