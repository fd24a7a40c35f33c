//! Allow-list check over rewritten trees.

use crate::error::ValidationError;
use crate::syntax::ast::{
    ExceptHandler, Expr, MatchCase, NodeKind, Stmt, Visitor, walk_body, walk_case, walk_expr,
    walk_stmt,
};

const fn allowed(kind: NodeKind) -> bool {
    match kind {
        NodeKind::Global | NodeKind::Nonlocal => false,
        NodeKind::Module
        | NodeKind::FunctionDef
        | NodeKind::AsyncFunctionDef
        | NodeKind::ClassDef
        | NodeKind::Return
        | NodeKind::Delete
        | NodeKind::Assign
        | NodeKind::AugAssign
        | NodeKind::AnnAssign
        | NodeKind::Import
        | NodeKind::ImportFrom
        | NodeKind::For
        | NodeKind::AsyncFor
        | NodeKind::While
        | NodeKind::If
        | NodeKind::With
        | NodeKind::AsyncWith
        | NodeKind::Match
        | NodeKind::MatchCase
        | NodeKind::Raise
        | NodeKind::Try
        | NodeKind::ExceptHandler
        | NodeKind::Assert
        | NodeKind::Expr
        | NodeKind::Pass
        | NodeKind::Break
        | NodeKind::Continue
        | NodeKind::Record
        | NodeKind::BoolOp
        | NodeKind::NamedExpr
        | NodeKind::BinOp
        | NodeKind::UnaryOp
        | NodeKind::Lambda
        | NodeKind::IfExp
        | NodeKind::Dict
        | NodeKind::Set
        | NodeKind::ListComp
        | NodeKind::SetComp
        | NodeKind::DictComp
        | NodeKind::GeneratorExp
        | NodeKind::Await
        | NodeKind::Yield
        | NodeKind::YieldFrom
        | NodeKind::Compare
        | NodeKind::Call
        | NodeKind::FormattedValue
        | NodeKind::JoinedStr
        | NodeKind::Constant
        | NodeKind::Attribute
        | NodeKind::Subscript
        | NodeKind::Starred
        | NodeKind::Name
        | NodeKind::List
        | NodeKind::Tuple
        | NodeKind::Slice => true,
    }
}

struct Validator {
    error: Option<ValidationError>,
}

impl Validator {
    fn check(&mut self, kind: NodeKind, line: u32) -> bool {
        if self.error.is_some() {
            return false;
        }
        if !allowed(kind) {
            self.error = Some(ValidationError {
                kind: kind.as_str(),
                line,
            });
            return false;
        }
        true
    }
}

impl Visitor for Validator {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if self.check(stmt.kind.node_kind(), stmt.line) {
            walk_stmt(self, stmt);
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if self.check(expr.kind.node_kind(), expr.line) {
            walk_expr(self, expr);
        }
    }

    fn visit_handler(&mut self, handler: &ExceptHandler) {
        if self.check(NodeKind::ExceptHandler, handler.line) {
            walk_body(self, &handler.body);
        }
    }

    fn visit_case(&mut self, case: &MatchCase) {
        let line = case.body.first().map_or(0, |stmt| stmt.line);
        if self.check(NodeKind::MatchCase, line) {
            walk_case(self, case);
        }
    }
}

/// Checks every node of `body`; reports the first one outside the allow-list.
pub fn validate(body: &[Stmt]) -> Result<(), ValidationError> {
    let mut validator = Validator { error: None };
    walk_body(&mut validator, body);
    match validator.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_module;

    #[test]
    fn ordinary_code_passes() {
        let body = parse_module(
            "import math\nasync def f(ctx):\n    x = [i ** 2 for i in range(3)]\n    \
             match x:\n        case [0, *rest]:\n            pass\n    try:\n        \
             y = x[0:2]\n    except Exception as e:\n        raise ValueError(str(e)) from e\n",
        )
        .unwrap();
        assert_eq!(validate(&body), Ok(()));
    }

    #[test]
    fn scope_declarations_are_rejected() {
        let body = parse_module("def f():\n    x = 1\n    global total\n").unwrap();
        assert_eq!(
            validate(&body),
            Err(ValidationError {
                kind: "Global",
                line: 3,
            })
        );
        let body = parse_module("def f():\n    def g():\n        nonlocal y\n").unwrap();
        assert_eq!(validate(&body).unwrap_err().kind, "Nonlocal");
    }
}
