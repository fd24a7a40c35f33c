//! Calls whose statements stay out of the sheet without any wrapping.

use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

use crate::syntax::ast::{Expr, ExprKind};

/// Decides on a call expression whether it is hidden.
pub type CallFilter = Arc<dyn Fn(&Expr) -> bool + Send + Sync>;

pub struct CallFilterRegistry {
    names: FxHashSet<String>,
    filters: Vec<CallFilter>,
}

impl CallFilterRegistry {
    fn with_builtins() -> Self {
        let mut registry = CallFilterRegistry {
            names: FxHashSet::default(),
            filters: Vec::new(),
        };
        registry.register("UI");
        registry
    }

    pub fn register(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn unregister(&mut self, name: &str) {
        self.names.remove(name);
    }

    pub fn register_filter(&mut self, filter: CallFilter) {
        self.filters.push(filter);
    }

    /// Whether `expr`, a call or an awaited call, is hidden.
    pub fn is_hidden(&self, expr: &Expr) -> bool {
        let Some(call) = call_of(expr) else {
            return false;
        };
        if callee_name(call).is_some_and(|name| self.names.contains(name)) {
            return true;
        }
        self.filters.iter().any(|filter| filter(call))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.iter().cloned().collect();
        names.sort_unstable();
        names
    }
}

/// The call inside `f(...)` or `await f(...)`.
fn call_of(expr: &Expr) -> Option<&Expr> {
    match &expr.kind {
        ExprKind::Call { .. } => Some(expr),
        ExprKind::Await(inner) if matches!(inner.kind, ExprKind::Call { .. }) => Some(inner),
        _ => None,
    }
}

/// `f` for `f(...)`, `m` for `obj.m(...)`.
fn callee_name(call: &Expr) -> Option<&str> {
    let ExprKind::Call { func, .. } = &call.kind else {
        return None;
    };
    match &func.kind {
        ExprKind::Name(name) => Some(name),
        ExprKind::Attribute { attr, .. } => Some(attr),
        _ => None,
    }
}

static REGISTRY: LazyLock<RwLock<CallFilterRegistry>> =
    LazyLock::new(|| RwLock::new(CallFilterRegistry::with_builtins()));

pub fn call_filters() -> &'static RwLock<CallFilterRegistry> {
    &REGISTRY
}

pub fn register_hidden_function(name: impl Into<String>) {
    REGISTRY.write().register(name);
}

pub fn unregister_hidden_function(name: &str) {
    REGISTRY.write().unregister(name);
}

pub fn register_call_filter(filter: CallFilter) {
    REGISTRY.write().register_filter(filter);
}

pub fn is_hidden_call(expr: &Expr) -> bool {
    REGISTRY.read().is_hidden(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_expression;

    fn hidden(registry: &CallFilterRegistry, source: &str) -> bool {
        registry.is_hidden(&parse_expression(source).unwrap())
    }

    #[test]
    fn ui_calls_are_hidden() {
        let registry = CallFilterRegistry::with_builtins();
        assert!(hidden(&registry, "UI('Beam', fields)"));
        assert!(hidden(&registry, "await UI('Beam', fields)"));
        assert!(hidden(&registry, "forms.UI('Beam')"));
        assert!(!hidden(&registry, "print(x)"));
        assert!(!hidden(&registry, "UI"));
        assert_eq!(registry.names(), ["UI"]);
    }

    #[test]
    fn custom_filters() {
        let mut registry = CallFilterRegistry::with_builtins();
        registry.register("log_step");
        assert!(hidden(&registry, "log_step(1)"));
        registry.unregister("log_step");
        assert!(!hidden(&registry, "log_step(1)"));

        registry.register_filter(Arc::new(|call: &Expr| {
            matches!(&call.kind, ExprKind::Call { args, .. } if args.is_empty())
        }));
        assert!(hidden(&registry, "anything()"));
        assert!(!hidden(&registry, "anything(1)"));
    }
}
