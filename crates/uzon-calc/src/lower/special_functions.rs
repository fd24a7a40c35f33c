//! Calls that lower to dedicated notation instead of `name(args)`.

use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use math_ir::{MathNode, mo, mrow, msqrt};
use parking_lot::RwLock;

/// Formats a call given the callee name and the lowered arguments. Returning `None` falls
/// back to the generic rendering.
pub type SpecialFunctionFormatter =
    Arc<dyn Fn(&str, &[MathNode]) -> Option<MathNode> + Send + Sync>;

pub struct SpecialFunctionRegistry {
    formatters: IndexMap<String, SpecialFunctionFormatter>,
}

impl SpecialFunctionRegistry {
    fn with_builtins() -> Self {
        let mut registry = SpecialFunctionRegistry {
            formatters: IndexMap::new(),
        };
        registry.register("abs", Arc::new(format_abs));
        let sqrt: SpecialFunctionFormatter = Arc::new(format_sqrt);
        registry.register("sqrt", sqrt.clone());
        registry.register("math.sqrt", sqrt);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, formatter: SpecialFunctionFormatter) {
        self.formatters.insert(name.into(), formatter);
    }

    pub fn unregister(&mut self, name: &str) {
        self.formatters.shift_remove(name);
    }

    pub fn format(&self, name: &str, args: &[MathNode]) -> Option<MathNode> {
        self.formatters.get(name).and_then(|f| f(name, args))
    }

    #[inline]
    pub fn is_special(&self, name: &str) -> bool {
        self.formatters.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.formatters.keys().cloned().collect()
    }
}

fn format_abs(_name: &str, args: &[MathNode]) -> Option<MathNode> {
    match args {
        [arg] => Some(mrow([mo("|"), arg.clone(), mo("|")])),
        _ => None,
    }
}

fn format_sqrt(_name: &str, args: &[MathNode]) -> Option<MathNode> {
    match args {
        [arg] => Some(msqrt(arg.clone())),
        _ => None,
    }
}

static REGISTRY: LazyLock<RwLock<SpecialFunctionRegistry>> =
    LazyLock::new(|| RwLock::new(SpecialFunctionRegistry::with_builtins()));

/// The process-wide registry.
pub fn special_functions() -> &'static RwLock<SpecialFunctionRegistry> {
    &REGISTRY
}

pub fn register_special_function(name: impl Into<String>, formatter: SpecialFunctionFormatter) {
    REGISTRY.write().register(name, formatter);
}

pub fn unregister_special_function(name: &str) {
    REGISTRY.write().unregister(name);
}

pub fn format_special_function(name: &str, args: &[MathNode]) -> Option<MathNode> {
    REGISTRY.read().format(name, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use math_ir::{mi, mn};

    #[test]
    fn builtins() {
        let registry = SpecialFunctionRegistry::with_builtins();
        assert_eq!(registry.names(), ["abs", "sqrt", "math.sqrt"]);
        assert_eq!(
            registry.format("abs", &[mi("x")]),
            Some(mrow([mo("|"), mi("x"), mo("|")]))
        );
        assert_eq!(registry.format("math.sqrt", &[mi("x")]), Some(msqrt(mi("x"))));
        assert_eq!(registry.format("sqrt", &[mi("x"), mi("y")]), None);
        assert_eq!(registry.format("max", &[mi("x")]), None);
    }

    #[test]
    fn register_and_unregister() {
        let mut registry = SpecialFunctionRegistry::with_builtins();
        registry.register(
            "half",
            Arc::new(|_: &str, args: &[MathNode]| {
                args.first().map(|x| math_ir::mfrac(x.clone(), mn(2i64)))
            }),
        );
        assert!(registry.is_special("half"));
        assert_eq!(
            registry.format("half", &[mi("x")]),
            Some(math_ir::mfrac(mi("x"), mn(2i64)))
        );
        registry.unregister("half");
        assert!(!registry.is_special("half"));
    }
}
