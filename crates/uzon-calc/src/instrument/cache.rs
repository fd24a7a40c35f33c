//! Process-wide cache of instrumented functions.
//!
//! Entries are keyed by script path, a hash of the script text and the function name. A
//! hit also compares the stored text, so two scripts with colliding hashes never share an
//! entry. Only the latest version of a function is kept. Failed attempts are not stored.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, debug_span};

use super::FunctionSource;
use super::driver;
use crate::error::InstrumentationError;
use crate::syntax::ast::FunctionDef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    hash: u64,
    name: String,
}

struct CacheEntry {
    source: Arc<str>,
    def: Arc<FunctionDef>,
}

static CACHE: LazyLock<Mutex<FxHashMap<CacheKey, CacheEntry>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

/// The instrumented definition of `function`, rewritten on first request.
///
/// The lock is held while rewriting, so concurrent requests for the same function do the
/// work once.
pub fn instrument(function: &FunctionSource) -> Result<Arc<FunctionDef>, InstrumentationError> {
    let key = CacheKey {
        path: function.path.clone(),
        hash: function.content_hash(),
        name: function.name.clone(),
    };
    let mut cache = CACHE.lock();
    if let Some(entry) = cache.get(&key)
        && entry.source == function.source
    {
        debug!(function = %function.name, "instrumentation cache hit");
        return Ok(Arc::clone(&entry.def));
    }
    let _span = debug_span!("instrument", function = %function.name).entered();
    let def = driver::rewrite(function)?;
    // An edited script replaces the stale versions of the function.
    cache.retain(|stale, _| stale.path != key.path || stale.name != key.name);
    cache.insert(
        key,
        CacheEntry {
            source: Arc::clone(&function.source),
            def: Arc::clone(&def),
        },
    );
    Ok(def)
}

/// Drops every cached function of the script at `path`; returns how many were dropped.
pub fn invalidate(path: &Path) -> usize {
    let mut cache = CACHE.lock();
    let before = cache.len();
    cache.retain(|key, _| key.path != path);
    let dropped = before - cache.len();
    debug!(path = %path.display(), dropped, "invalidated instrumentation cache");
    dropped
}

/// Number of cached functions.
pub fn cached_functions() -> usize {
    CACHE.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "def f(x):\n    y = x * 2\n    return y\n";

    #[test]
    fn hits_return_the_same_tree() {
        let function = FunctionSource::new("/cache/hit.py", SCRIPT, "f", 1);
        let first = instrument(&function).unwrap();
        let second = instrument(&function).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn edited_scripts_are_rewritten() {
        let before = FunctionSource::new("/cache/edit.py", SCRIPT, "f", 1);
        let after = FunctionSource::new(
            "/cache/edit.py",
            "def f(x):\n    y = x * 3\n    return y\n",
            "f",
            1,
        );
        let first = instrument(&before).unwrap();
        let second = instrument(&after).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn edits_replace_the_stale_entry() {
        let path = Path::new("/cache/grow.py");
        for factor in 1..=5 {
            let source = format!("def f(x):\n    y = x * {factor}\n    return y\n");
            instrument(&FunctionSource::new(path, source, "f", 1)).unwrap();
        }
        let other = FunctionSource::new(path, "def g():\n    return 1\n", "g", 1);
        instrument(&other).unwrap();
        assert_eq!(invalidate(path), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let path = Path::new("/cache/broken.py");
        let broken = FunctionSource::new(path, "def f():\n    global g\n", "f", 1);
        assert!(instrument(&broken).is_err());
        assert_eq!(invalidate(path), 0);

        let fixed = FunctionSource::new(path, "def f():\n    g = 1\n", "f", 1);
        instrument(&fixed).unwrap();
        assert_eq!(invalidate(path), 1);
        assert_eq!(invalidate(path), 0);
    }
}
