//! Inserts a record statement after every recordable statement of a function.
//!
//! `hide()` and `show()` switch recording off and on for the rest of the enclosing block.
//! Each block restores the state of its parent when it ends; if a directive inside a
//! compound statement changed the state, a synthetic directive call after the statement
//! restores the runtime state too.

use std::mem;
use std::sync::Arc;

use math_ir::mtext;

use super::call_filters::is_hidden_call;
use crate::error::AstConversionError;
use crate::lower::Lowerer;
use crate::steps::{EquationStep, ExprStep, FStringSegment, FStringStep, Step, TextStep};
use crate::syntax::ast::{
    ClassDef, Constant, Expr, ExprKind, FunctionDef, Record, Stmt, StmtKind,
};

pub const HIDE: &str = "hide";
pub const SHOW: &str = "show";

/// Rewrites function bodies parsed from `source`.
pub struct Rewriter<'source> {
    lowerer: Lowerer<'source>,
    enabled: bool,
    next_temp: usize,
}

impl<'source> Rewriter<'source> {
    pub fn new(source: &'source str) -> Self {
        Rewriter {
            lowerer: Lowerer::new(source),
            enabled: true,
            next_temp: 0,
        }
    }

    /// Rewrites the body of `def` with recording enabled at its start.
    pub fn rewrite_function(&mut self, def: &mut FunctionDef) -> Result<(), AstConversionError> {
        mark_docstring(&mut def.body);
        let saved = mem::replace(&mut self.enabled, true);
        let body = mem::take(&mut def.body);
        let result = self.block(body);
        self.enabled = saved;
        def.body = result?;
        Ok(())
    }

    /// Rewrites top-level statements.
    pub fn rewrite_module(&mut self, body: Vec<Stmt>) -> Result<Vec<Stmt>, AstConversionError> {
        let mut body = body;
        mark_docstring(&mut body);
        let saved = mem::replace(&mut self.enabled, true);
        let result = self.block(body);
        self.enabled = saved;
        result
    }

    fn block(&mut self, body: Vec<Stmt>) -> Result<Vec<Stmt>, AstConversionError> {
        let mut out = Vec::with_capacity(body.len() * 2);
        for mut stmt in body {
            if let Some(on) = directive(&stmt) {
                self.enabled = on;
                stmt.skip = true;
                out.push(stmt);
                continue;
            }
            if stmt.skip {
                out.push(stmt);
                continue;
            }
            self.stmt(stmt, &mut out)?;
        }
        Ok(out)
    }

    /// A nested block: the recording state is restored when it ends.
    ///
    /// Returns whether a directive in the block left the state changed.
    fn scoped(&mut self, body: &mut Vec<Stmt>) -> Result<bool, AstConversionError> {
        let saved = self.enabled;
        let result = self.block(mem::take(body));
        let changed = self.enabled != saved;
        self.enabled = saved;
        *body = result?;
        Ok(changed)
    }

    fn stmt(&mut self, mut stmt: Stmt, out: &mut Vec<Stmt>) -> Result<(), AstConversionError> {
        // Compound statements are walked even while hidden, a `show()` inside them
        // enables recording for the rest of their block.
        let mut changed = false;
        match &mut stmt.kind {
            StmtKind::FunctionDef(def) => {
                self.rewrite_function(Arc::make_mut(def))?;
            }
            StmtKind::ClassDef(class) => self.rewrite_class(class)?,
            StmtKind::For { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::If { body, orelse, .. } => {
                changed |= self.scoped(body)?;
                changed |= self.scoped(orelse)?;
            }
            StmtKind::With { body, .. } => changed |= self.scoped(body)?,
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                changed |= self.scoped(body)?;
                for handler in handlers {
                    changed |= self.scoped(&mut handler.body)?;
                }
                changed |= self.scoped(orelse)?;
                changed |= self.scoped(finalbody)?;
            }
            StmtKind::Match { cases, .. } => {
                for case in cases {
                    changed |= self.scoped(&mut case.body)?;
                }
            }
            _ => {}
        }
        if changed {
            let restore = directive_call(if self.enabled { SHOW } else { HIDE }, &stmt);
            out.push(stmt);
            out.push(restore);
            return Ok(());
        }
        if !self.enabled {
            out.push(stmt);
            return Ok(());
        }
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                let record = self.assignment(targets, value)?;
                let record = Stmt::synthetic(record, &stmt);
                stmt.skip = true;
                out.push(stmt);
                out.push(record);
            }
            StmtKind::AnnAssign {
                target,
                value: Some(value),
                ..
            } => {
                let record = self.assignment(std::slice::from_ref(target), value)?;
                let record = Stmt::synthetic(record, &stmt);
                stmt.skip = true;
                out.push(stmt);
                out.push(record);
            }
            StmtKind::Expr(expr) => self.expression(expr.clone(), stmt, out)?,
            _ => out.push(stmt),
        }
        Ok(())
    }

    fn rewrite_class(&mut self, class: &mut ClassDef) -> Result<(), AstConversionError> {
        mark_docstring(&mut class.body);
        let saved = mem::replace(&mut self.enabled, true);
        let result = self.block(mem::take(&mut class.body));
        self.enabled = saved;
        class.body = result?;
        Ok(())
    }

    fn assignment(&self, targets: &[Expr], value: &Expr) -> Result<StmtKind, AstConversionError> {
        let rhs = self.lowerer.lower(value)?;
        if let [target] = targets {
            if let ExprKind::Name(name) = &target.kind {
                return Ok(record(
                    Step::Equation(EquationStep {
                        lhs: self.lowerer.lower_target(target)?,
                        rhs: Some(rhs),
                    }),
                    Some(Expr::name(name.as_str(), target.span, target.line)),
                    true,
                ));
            }
        }
        let text = targets
            .iter()
            .map(|target| self.lowerer.source_text(target))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        Ok(record(
            Step::Equation(EquationStep {
                lhs: mtext(text),
                rhs: Some(rhs),
            }),
            None,
            true,
        ))
    }

    fn expression(
        &mut self,
        expr: Expr,
        mut stmt: Stmt,
        out: &mut Vec<Stmt>,
    ) -> Result<(), AstConversionError> {
        match &expr.kind {
            _ if is_hidden_call(&expr) => out.push(stmt),
            ExprKind::Call { .. } => out.push(stmt),
            ExprKind::Await(inner) if matches!(inner.kind, ExprKind::Call { .. }) => {
                out.push(stmt);
            }
            ExprKind::Constant(Constant::Str(text)) => {
                let step = Step::Text(TextStep { text: text.clone() });
                let record = Stmt::synthetic(record(step, None, false), &stmt);
                stmt.skip = true;
                out.push(stmt);
                out.push(record);
            }
            ExprKind::JoinedStr(parts) => self.fstring(parts, &expr, stmt, out)?,
            ExprKind::Name(name) => {
                let step = Step::Equation(EquationStep {
                    lhs: self.lowerer.lower_target(&expr)?,
                    rhs: None,
                });
                let value = Expr::name(name.as_str(), expr.span, expr.line);
                let record = Stmt::synthetic(record(step, Some(value), true), &stmt);
                stmt.skip = true;
                out.push(stmt);
                out.push(record);
            }
            _ => {
                // The record evaluates the expression itself, so the value is shown once
                // and the expression runs once.
                let step = Step::Expr(ExprStep {
                    expr: self.lowerer.lower(&expr)?,
                });
                out.push(Stmt::synthetic(record(step, Some(expr), true), &stmt));
            }
        }
        Ok(())
    }

    /// Binds every slot to a fresh temporary so the recorded step can read its value.
    fn fstring(
        &mut self,
        parts: &[Expr],
        expr: &Expr,
        mut stmt: Stmt,
        out: &mut Vec<Stmt>,
    ) -> Result<(), AstConversionError> {
        let mut temps = Vec::new();
        let mut segments = Vec::with_capacity(parts.len());
        for part in parts {
            match &part.kind {
                ExprKind::Constant(Constant::Str(text)) => {
                    segments.push(FStringSegment::Text(text.clone()));
                }
                ExprKind::FormattedValue {
                    value,
                    conversion: None,
                    format_spec,
                } => {
                    let Some(format_spec) = static_spec(format_spec.as_deref()) else {
                        return self.fstring_text(expr, stmt, out);
                    };
                    let value_var = format!("__fs_{}__", self.next_temp);
                    self.next_temp += 1;
                    temps.push(Stmt::synthetic(
                        StmtKind::Assign {
                            targets: vec![Expr::name(value_var.as_str(), part.span, part.line)],
                            value: (**value).clone(),
                        },
                        &stmt,
                    ));
                    segments.push(match &value.kind {
                        ExprKind::NamedExpr { target, value } => FStringSegment::NamedExpr {
                            lhs: self.lowerer.lower_target(target)?,
                            rhs: self.lowerer.lower(value)?,
                            value_var,
                            format_spec,
                        },
                        _ => FStringSegment::Expr {
                            expr: self.lowerer.lower(value)?,
                            value_var,
                            format_spec,
                        },
                    });
                }
                _ => return self.fstring_text(expr, stmt, out),
            }
        }
        let step = Step::FString(FStringStep { segments });
        let record = Stmt::synthetic(record(step, None, true), &stmt);
        stmt.skip = true;
        out.extend(temps);
        out.push(stmt);
        out.push(record);
        Ok(())
    }

    /// Conversions and computed format specs record the formatted string as text.
    fn fstring_text(
        &self,
        expr: &Expr,
        mut stmt: Stmt,
        out: &mut Vec<Stmt>,
    ) -> Result<(), AstConversionError> {
        let step = Step::Text(TextStep {
            text: String::new(),
        });
        let record = Stmt::synthetic(record(step, Some(expr.clone()), false), &stmt);
        stmt.skip = true;
        out.push(stmt);
        out.push(record);
        Ok(())
    }
}

fn record(step: Step, value: Option<Expr>, capture_locals: bool) -> StmtKind {
    StmtKind::Record(Box::new(Record {
        step: Arc::new(step),
        value,
        capture_locals,
    }))
}

/// `Some(false)` for `hide()`, `Some(true)` for `show()`.
fn directive(stmt: &Stmt) -> Option<bool> {
    let StmtKind::Expr(Expr {
        kind:
            ExprKind::Call {
                func,
                args,
                keywords,
            },
        ..
    }) = &stmt.kind
    else {
        return None;
    };
    if !args.is_empty() || !keywords.is_empty() {
        return None;
    }
    match func.as_name()? {
        HIDE => Some(false),
        SHOW => Some(true),
        _ => None,
    }
}

fn directive_call(name: &str, origin: &Stmt) -> Stmt {
    let func = Expr::name(name, origin.span, origin.line);
    let call = Expr::new(
        ExprKind::Call {
            func: Box::new(func),
            args: Vec::new(),
            keywords: Vec::new(),
        },
        origin.span,
        origin.line,
    );
    Stmt::synthetic(StmtKind::Expr(call), origin)
}

fn mark_docstring(body: &mut [Stmt]) {
    if let Some(first) = body.first_mut() {
        if matches!(
            &first.kind,
            StmtKind::Expr(Expr {
                kind: ExprKind::Constant(Constant::Str(_)),
                ..
            })
        ) {
            first.skip = true;
        }
    }
}

/// The text of a format spec without replacement fields.
fn static_spec(spec: Option<&Expr>) -> Option<String> {
    let Some(spec) = spec else {
        return Some(String::new());
    };
    match &spec.kind {
        ExprKind::JoinedStr(parts) => {
            let mut text = String::new();
            for part in parts {
                match &part.kind {
                    ExprKind::Constant(Constant::Str(s)) => text.push_str(s),
                    _ => return None,
                }
            }
            Some(text)
        }
        ExprKind::Constant(Constant::Str(s)) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use math_ir::{mi, mn, mo, mrow};

    use super::*;
    use crate::syntax::parse_module;

    fn rewrite(source: &str) -> Vec<Stmt> {
        let body = parse_module(source).unwrap();
        Rewriter::new(source).rewrite_module(body).unwrap()
    }

    /// One letter per statement: `r` record, `s` skipped, `.` anything else.
    fn shape(body: &[Stmt]) -> String {
        body.iter()
            .map(|stmt| match &stmt.kind {
                StmtKind::Record(_) => 'r',
                _ if stmt.skip => 's',
                _ => '.',
            })
            .collect()
    }

    fn step(stmt: &Stmt) -> &Step {
        match &stmt.kind {
            StmtKind::Record(record) => &record.step,
            other => panic!("not a record: {other:?}"),
        }
    }

    #[test]
    fn assignment_is_followed_by_its_record() {
        let body = rewrite("a = 1 + 2\n");
        assert_eq!(shape(&body), "sr");
        assert_eq!(
            step(&body[1]),
            &Step::Equation(EquationStep {
                lhs: mi("a"),
                rhs: Some(mrow([mn("1"), mo("+"), mn("2")])),
            })
        );
        let StmtKind::Record(record) = &body[1].kind else {
            unreachable!()
        };
        assert_eq!(record.value.as_ref().and_then(Expr::as_name), Some("a"));
        assert!(record.capture_locals);
        assert_eq!(body[1].line, 1);
    }

    #[test]
    fn tuple_targets_use_their_source_text() {
        let body = rewrite("a, b = 1, 2\n");
        let Step::Equation(step) = step(&body[1]) else {
            panic!("expected an equation");
        };
        assert_eq!(step.lhs, mtext("a, b"));
    }

    #[test]
    fn statement_kinds() {
        let body = rewrite(
            "\"doc\"\nprint(x)\nawait UI('t', [])\n\"text\"\nx\nx + 1\nimport math\n",
        );
        assert_eq!(shape(&body), "s..srsrr.");
        assert!(matches!(step(&body[4]), Step::Text(text) if text.text == "text"));
        assert!(matches!(step(&body[6]), Step::Equation(eq) if eq.rhs.is_none()));
        assert!(matches!(step(&body[7]), Step::Expr(_)));
    }

    #[test]
    fn hide_and_show() {
        let body = rewrite("a = 1\nhide()\nb = 2\nshow()\nc = 3\n");
        assert_eq!(shape(&body), "srs.ssr");
    }

    #[test]
    fn hide_inside_a_block_does_not_leak() {
        let body = rewrite("if cond:\n    a = 1\n    hide()\n    b = 2\nc = 3\n");
        assert_eq!(shape(&body), ".ssr");
        let StmtKind::If { body: inner, .. } = &body[0].kind else {
            panic!("expected an if statement");
        };
        assert_eq!(shape(inner), "srs.");
        let StmtKind::Expr(restore) = &body[1].kind else {
            panic!("expected a directive call");
        };
        assert_eq!(
            restore.kind.clone(),
            ExprKind::Call {
                func: Box::new(Expr::name(SHOW, restore.span, restore.line)),
                args: Vec::new(),
                keywords: Vec::new(),
            }
        );
    }

    #[test]
    fn nested_functions_have_their_own_scope() {
        let body = rewrite("hide()\ndef f():\n    x = 1\ny = 2\n");
        let StmtKind::FunctionDef(def) = &body[1].kind else {
            panic!("expected a function");
        };
        assert_eq!(shape(&def.body), "sr");
        assert_eq!(shape(&body), "s..");
    }

    #[test]
    fn fstring_slots_bind_temporaries() {
        let body = rewrite("f\"pi ≈ {pi:.3f} and {(d := 2 * r)}\"\n");
        assert_eq!(shape(&body), "sssr");
        let Step::FString(step) = step(&body[3]) else {
            panic!("expected an f-string step");
        };
        assert_eq!(step.segments[0], FStringSegment::Text("pi ≈ ".to_string()));
        assert!(matches!(
            &step.segments[1],
            FStringSegment::Expr { value_var, format_spec, .. }
                if value_var == "__fs_0__" && format_spec == ".3f"
        ));
        assert!(matches!(
            &step.segments[3],
            FStringSegment::NamedExpr { lhs, value_var, .. }
                if *lhs == mi("d") && value_var == "__fs_1__"
        ));
    }

    #[test]
    fn fstring_conversions_record_text() {
        let body = rewrite("f\"{x!r}\"\n");
        assert_eq!(shape(&body), "sr");
        assert!(matches!(step(&body[1]), Step::Text(_)));
    }

    #[test]
    fn rewriting_twice_changes_nothing() {
        let source = "a = 1\n\"t\"\nhide()\nb = 2\n";
        let once = rewrite(source);
        let twice = Rewriter::new(source).rewrite_module(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
