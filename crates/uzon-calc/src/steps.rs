//! Recorded steps and their rendering into sheet blocks.
//!
//! The rewriter builds one [`Step`] per recordable statement, with the math of the
//! statement already lowered. At runtime the step is handed the context, a snapshot of the
//! local bindings and the statement's value, and appends one block to the context.
//!
//! An equation block shows up to four parts joined by `=`:
//! the left-hand side, the symbolic right-hand side, the right-hand side with every bound
//! identifier replaced by its value, and the value itself. Parts that repeat an earlier
//! part are dropped.

use math_ir::html_utils::escaped;
use math_ir::{
    MathNode, equation, mi_array, mn, mo, mrow, mrow_array, mtext, mu, to_mathml,
};

use crate::context::{Context, ContextOptions};
use crate::interp::format::format_value;
use crate::interp::{Locals, OpError, Slice, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Text(TextStep),
    Expr(ExprStep),
    Equation(EquationStep),
    FString(FStringStep),
}

/// A plain paragraph.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStep {
    pub text: String,
}

/// `expr = substituted = value`
#[derive(Debug, Clone, PartialEq)]
pub struct ExprStep {
    pub expr: MathNode,
}

/// `lhs = rhs = substituted = value`
#[derive(Debug, Clone, PartialEq)]
pub struct EquationStep {
    pub lhs: MathNode,
    pub rhs: Option<MathNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FStringStep {
    pub segments: Vec<FStringSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringSegment {
    Text(String),
    Expr {
        expr: MathNode,
        /// The local holding the runtime value of the slot.
        value_var: String,
        format_spec: String,
    },
    /// A `(name := value)` slot.
    NamedExpr {
        lhs: MathNode,
        rhs: MathNode,
        value_var: String,
        format_spec: String,
    },
}

impl Step {
    /// Renders the step into `ctx`.
    ///
    /// A `None` value counts as no value.
    pub fn record(
        &self,
        ctx: &mut Context,
        locals: &Locals,
        value: Option<&Value>,
    ) -> Result<(), OpError> {
        if ctx.options().contains(ContextOptions::SKIP_CONTENT) {
            return Ok(());
        }
        let value = value.filter(|v| !v.is_none());
        match self {
            Step::Text(step) => {
                let text = match value {
                    Some(value) => value.to_str(),
                    None => step.text.clone(),
                };
                render_block(ctx, &escaped(&text));
            }
            Step::Expr(step) => {
                let parts = equation_parts(&step.expr, locals, value, ctx.options());
                render_block(ctx, &to_mathml(&equation(parts)));
            }
            Step::Equation(step) => {
                let lhs = prepare_lhs(&step.lhs, value, locals);
                if is_private(&lhs)
                    && ctx
                        .options()
                        .contains(ContextOptions::SUPPRESS_PRIVATE_ASSIGNMENTS)
                {
                    return Ok(());
                }
                let mut parts = vec![lhs];
                match &step.rhs {
                    Some(rhs) => {
                        let rhs = style_array_vars(rhs, locals);
                        let rest = equation_parts(&rhs, locals, value, ctx.options());
                        parts.push(rhs);
                        parts.extend(rest.into_iter().skip(1));
                    }
                    None => parts.extend(value.map(value_to_ir)),
                }
                render_block(ctx, &to_mathml(&equation(parts)));
            }
            Step::FString(step) => {
                let mut out = String::new();
                for segment in &step.segments {
                    match segment {
                        FStringSegment::Text(text) => out.push_str(&escaped(text)),
                        _ => out.push_str(&render_slot(segment, locals, ctx.options())?),
                    }
                }
                render_block(ctx, &out);
            }
        }
        Ok(())
    }
}

/// Wraps `content` in a paragraph, or a span while an inline group is open.
fn render_block(ctx: &mut Context, content: &str) {
    let tag = if ctx.is_inline_mode() { "span" } else { "p" };
    ctx.append_content(format!("<{tag}>{content}</{tag}>"));
}

fn is_private(lhs: &MathNode) -> bool {
    matches!(lhs, MathNode::Mi(name) if name.starts_with('_'))
}

fn is_array(value: Option<&Value>) -> bool {
    value.is_some_and(Value::is_array)
}

/// `[expr, substituted, value]` with repeated parts dropped.
fn equation_parts(
    expr: &MathNode,
    locals: &Locals,
    value: Option<&Value>,
    options: ContextOptions,
) -> Vec<MathNode> {
    let expr = style_array_vars(expr, locals);
    let substituted = options
        .contains(ContextOptions::ENABLE_SUBSTITUTION)
        .then(|| substitute_vars(&expr, locals));
    let mut parts = vec![expr];
    if let Some(substituted) = substituted.filter(|s| *s != parts[0]) {
        parts.push(substituted);
    }
    if let Some(value) = value {
        let value = value_to_ir(value);
        if !parts.contains(&value) {
            parts.push(value);
        }
    }
    parts
}

fn prepare_lhs(lhs: &MathNode, value: Option<&Value>, locals: &Locals) -> MathNode {
    if let MathNode::Mi(name) = lhs {
        if is_array(value) || is_array(locals.get(name)) {
            return mi_array(name.as_str());
        }
    }
    style_array_vars(lhs, locals)
}

/// Marks identifiers bound to lists and tuples.
pub fn style_array_vars(node: &MathNode, locals: &Locals) -> MathNode {
    node.transform(&mut |n| match n {
        MathNode::Mi(name) if is_array(locals.get(name)) => Some(mi_array(name.as_str())),
        _ => None,
    })
}

/// Replaces bound identifiers by their values.
///
/// The base of a subscript is kept, so `x_1` stays readable. A subscript of a bound list,
/// tuple or dict whose index can be read off the tree resolves to the element.
pub fn substitute_vars(node: &MathNode, locals: &Locals) -> MathNode {
    node.transform(&mut |n| match n {
        MathNode::Mi(name) | MathNode::MiArray(name) => locals.get(name).map(value_to_ir),
        MathNode::MSub(base, sub) => Some(resolve_subscript(base, sub, locals).unwrap_or_else(
            || MathNode::MSub(base.clone(), Box::new(substitute_vars(sub, locals))),
        )),
        _ => None,
    })
}

fn resolve_subscript(base: &MathNode, sub: &MathNode, locals: &Locals) -> Option<MathNode> {
    let (MathNode::Mi(name) | MathNode::MiArray(name)) = base else {
        return None;
    };
    let container = locals.get(name)?;
    if !matches!(container, Value::List(_) | Value::Tuple(_) | Value::Dict(_)) {
        return None;
    }
    let index = index_of(sub, locals)?;
    let element = match (&index, container) {
        // Successive indexing into nested sequences, as arrays do.
        (Value::Tuple(items), Value::List(_) | Value::Tuple(_)) => {
            if items.iter().any(|item| item.as_int().is_none()) {
                return None;
            }
            let mut current = container.clone();
            for item in items.iter() {
                current = current.get_item(item).ok()?;
            }
            current
        }
        _ => container.get_item(&index).ok()?,
    };
    Some(value_to_ir(&element))
}

fn index_of(node: &MathNode, locals: &Locals) -> Option<Value> {
    match node {
        MathNode::Mn(text) => parse_number(text),
        MathNode::Mi(name) | MathNode::MiArray(name) => locals.get(name).cloned(),
        MathNode::MText(text) => Some(Value::from(text.as_str())),
        MathNode::MRow(children) => row_index(children, locals),
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<Value> {
    let number: f64 = text.parse().ok()?;
    if number.fract() == 0.0 && number.abs() < 9.2e18 {
        Some(Value::Int(number as i64))
    } else {
        Some(Value::Float(number))
    }
}

fn has_symbol(children: &[MathNode], symbol: &str) -> bool {
    children
        .iter()
        .any(|child| matches!(child, MathNode::Mo(s) if s == symbol))
}

fn split_on<'a>(children: &'a [MathNode], symbol: &str) -> Vec<&'a [MathNode]> {
    children
        .split(|child| matches!(child, MathNode::Mo(s) if s == symbol))
        .collect()
}

fn nodes_index(nodes: &[MathNode], locals: &Locals) -> Option<Value> {
    match nodes {
        [] => None,
        [node] => index_of(node, locals),
        _ => row_index(nodes, locals),
    }
}

fn row_index(children: &[MathNode], locals: &Locals) -> Option<Value> {
    if has_symbol(children, ":") {
        let parts = split_on(children, ":");
        if !(2..=3).contains(&parts.len()) {
            return None;
        }
        let bound = |part: &[MathNode]| -> Option<Option<i64>> {
            if part.is_empty() {
                return Some(None);
            }
            nodes_index(part, locals)?.as_int().map(Some)
        };
        return Some(Value::Slice(Slice {
            lower: bound(parts[0])?,
            upper: bound(parts[1])?,
            step: match parts.get(2) {
                Some(part) => bound(part)?,
                None => None,
            },
        }));
    }
    if has_symbol(children, ",") {
        let items = split_on(children, ",")
            .into_iter()
            .map(|part| nodes_index(part, locals))
            .collect::<Option<Vec<_>>>()?;
        if items.iter().any(|item| matches!(item, Value::Slice(_))) {
            return None;
        }
        return Some(Value::Tuple(items.into()));
    }
    match children {
        [only] => index_of(only, locals),
        _ => None,
    }
}

/// The math rendering of a runtime value.
pub fn value_to_ir(value: &Value) -> MathNode {
    match value {
        Value::Int(i) => mn(*i),
        Value::Float(f) => mn(*f),
        Value::Str(s) => mtext(s.as_ref()),
        Value::List(items) => array_ir(&items.borrow()),
        Value::Tuple(items) => array_ir(items),
        Value::Quantity(q) => mrow([mn(q.magnitude), mo(""), mu(q.units.to_string())]),
        other => mtext(other.to_str()),
    }
}

fn array_ir(items: &[Value]) -> MathNode {
    let mut children = Vec::with_capacity(items.len() * 2 + 1);
    children.push(mo("["));
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            children.push(mo(","));
        }
        children.push(value_to_ir(item));
    }
    children.push(mo("]"));
    mrow_array(children)
}

/// The math of an f-string slot, or just its value when slot equations are off.
fn render_slot(
    segment: &FStringSegment,
    locals: &Locals,
    options: ContextOptions,
) -> Result<String, OpError> {
    let (value_var, format_spec) = match segment {
        FStringSegment::Expr {
            value_var,
            format_spec,
            ..
        }
        | FStringSegment::NamedExpr {
            value_var,
            format_spec,
            ..
        } => (value_var, format_spec),
        FStringSegment::Text(text) => return Ok(escaped(text)),
    };
    let value = locals.get(value_var).filter(|v| !v.is_none());
    if !options.contains(ContextOptions::ENABLE_FSTRING_EQUATION) {
        return Ok(match value {
            Some(value) => escaped(&format_value(value, format_spec)?),
            None => String::new(),
        });
    }
    let formatted = match value {
        Some(value) if !format_spec.is_empty() => Some(formatted_ir(value, format_spec)?),
        _ => None,
    };
    let parts = match segment {
        FStringSegment::NamedExpr { lhs, rhs, .. } => {
            let lhs = match lhs {
                MathNode::Mi(name) if is_array(value) => mi_array(name.as_str()),
                other => style_array_vars(other, locals),
            };
            let rhs = style_array_vars(rhs, locals);
            match formatted {
                Some(formatted) => vec![lhs, rhs, formatted],
                None => {
                    let mut parts = vec![lhs];
                    parts.extend(equation_parts(&rhs, locals, value, options));
                    parts
                }
            }
        }
        FStringSegment::Expr { expr, .. } => match formatted {
            Some(formatted) => vec![style_array_vars(expr, locals), formatted],
            None => equation_parts(expr, locals, value, options),
        },
        FStringSegment::Text(_) => Vec::new(),
    };
    Ok(to_mathml(&equation(parts)))
}

/// Applies a format spec; quantities keep their units outside the formatted magnitude.
fn formatted_ir(value: &Value, format_spec: &str) -> Result<MathNode, OpError> {
    Ok(match value {
        Value::Quantity(q) => {
            let magnitude = format_value(&Value::Float(q.magnitude), format_spec)?;
            mrow([mn(magnitude), mo(""), mu(q.units.to_string())])
        }
        Value::Int(_) | Value::Float(_) => mn(format_value(value, format_spec)?),
        other => mtext(format_value(other, format_spec)?),
    })
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use math_ir::{mfrac, mi, msub};

    use super::*;
    use crate::context::Context;
    use crate::units::{Quantity, registry};

    fn locals(pairs: &[(&str, Value)]) -> Locals {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().map(|i| Value::Int(*i)).collect())
    }

    fn record(step: Step, locals: &Locals, value: Option<&Value>) -> String {
        let mut ctx = Context::for_tests();
        step.record(&mut ctx, locals, value).unwrap();
        ctx.html_content()
    }

    #[test]
    fn assignment_shows_all_parts() {
        let step = Step::Equation(EquationStep {
            lhs: mi("a"),
            rhs: Some(mrow([mn(1i64), mo("+"), mn(2i64)])),
        });
        let html = record(step, &locals(&[("a", Value::Int(3))]), Some(&Value::Int(3)));
        insta::assert_snapshot!(html, @r#"<p><math xmlns="http://www.w3.org/1998/Math/MathML"><mrow><mrow><mi>a</mi></mrow><mo>=</mo><mrow><mn>1</mn><mo>+</mo><mn>2</mn></mrow><mo>=</mo><mrow><mn>3</mn></mrow></mrow></math></p>"#);
    }

    #[test]
    fn fraction_substitution() {
        let rhs = mfrac(
            mi("x"),
            mrow([mi("a"), mo("+"), mi("b")]),
        );
        let env = locals(&[
            ("x", Value::Int(6)),
            ("a", Value::Int(1)),
            ("b", Value::Int(2)),
        ]);
        let substituted = substitute_vars(&rhs, &env);
        assert_eq!(
            substituted,
            mfrac(mn(6i64), mrow([mn(1i64), mo("+"), mn(2i64)]))
        );
        let parts = equation_parts(&rhs, &env, Some(&Value::Float(2.0)), ContextOptions::default());
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], mn("2"));
    }

    #[test]
    fn value_repeating_a_part_is_dropped() {
        let q = Value::Quantity(Rc::new(Quantity::new(
            10.0,
            registry().parse_units("m").unwrap(),
        )));
        let rhs = mrow([mn("10"), mo(""), mu("meter")]);
        let parts = equation_parts(&rhs, &Locals::new(), Some(&q), ContextOptions::default());
        assert_eq!(parts, [rhs]);
    }

    #[test]
    fn subscript_base_is_not_substituted() {
        let env = locals(&[("x", Value::Int(5)), ("i", Value::Int(1))]);
        let node = msub(mi("x"), mi("i"));
        assert_eq!(substitute_vars(&node, &env), msub(mi("x"), mn(1i64)));
    }

    #[test]
    fn nested_index_resolves() {
        let arr = Value::list(vec![ints(&[1, 2, 3]), ints(&[4, 5, 6])]);
        let env = locals(&[("arr", arr)]);
        let pair = msub(mi("arr"), mrow([mn(0i64), mo(","), mn(1i64)]));
        assert_eq!(substitute_vars(&pair, &env), mn(2i64));
        let column = msub(
            mi("arr"),
            mrow([mrow([mo(":")]), mo(","), mn(1i64)]),
        );
        assert_eq!(substitute_vars(&column, &env), column);
    }

    #[test]
    fn slices_and_keys() {
        let env = locals(&[
            ("v", ints(&[1, 2, 3, 4])),
            (
                "d",
                Value::dict([(crate::interp::Key::str("k"), Value::Int(9))].into_iter().collect()),
            ),
        ]);
        let slice = msub(mi("v"), mrow([mn(1i64), mo(":"), mn(3i64)]));
        assert_eq!(
            substitute_vars(&slice, &env),
            mrow_array([mo("["), mn(2i64), mo(","), mn(3i64), mo("]")])
        );
        let key = msub(mi("d"), mtext("k"));
        assert_eq!(substitute_vars(&key, &env), mn(9i64));
        let missing = msub(mi("v"), mn(10i64));
        assert_eq!(substitute_vars(&missing, &env), missing);
    }

    #[test]
    fn array_lhs_is_styled() {
        let step = Step::Equation(EquationStep {
            lhs: mi("v"),
            rhs: None,
        });
        let v = ints(&[1, 2]);
        let html = record(step, &locals(&[("v", v.clone())]), Some(&v));
        assert!(html.contains(r#"<mi mathvariant="bold">v</mi>"#));
        assert!(html.contains("<mo>[</mo>"));
    }

    #[test]
    fn private_assignment_is_suppressed() {
        let step = Step::Equation(EquationStep {
            lhs: mi("_tmp"),
            rhs: Some(mn(1i64)),
        });
        assert_eq!(record(step, &Locals::new(), Some(&Value::Int(1))), "");
    }

    #[test]
    fn text_is_escaped() {
        let step = Step::Text(TextStep {
            text: "a < b & \"c\"".to_string(),
        });
        assert_eq!(
            record(step, &Locals::new(), None),
            "<p>a &lt; b &amp; &quot;c&quot;</p>"
        );
    }

    #[test]
    fn fstring_slot_with_format_spec() {
        let step = Step::FString(FStringStep {
            segments: vec![
                FStringSegment::Text("pi ≈ ".to_string()),
                FStringSegment::Expr {
                    expr: mi("pi"),
                    value_var: "__fs_0__".to_string(),
                    format_spec: ".3f".to_string(),
                },
            ],
        });
        let env = locals(&[
            ("pi", Value::Float(3.1415926)),
            ("__fs_0__", Value::Float(3.1415926)),
        ]);
        let html = record(step.clone(), &env, None);
        insta::assert_snapshot!(html, @r#"<p>pi ≈ <math xmlns="http://www.w3.org/1998/Math/MathML"><mrow><mrow><mi>pi</mi></mrow><mo>=</mo><mrow><mn>3.142</mn></mrow></mrow></math></p>"#);

        let mut ctx = Context::for_tests();
        ctx.set_option(ContextOptions::ENABLE_FSTRING_EQUATION, false);
        step.record(&mut ctx, &env, None).unwrap();
        assert_eq!(ctx.html_content(), "<p>pi ≈ 3.142</p>");
    }

    #[test]
    fn skipped_content_records_nothing() {
        let mut ctx = Context::for_tests();
        ctx.set_option(ContextOptions::SKIP_CONTENT, true);
        let step = Step::Text(TextStep {
            text: "hidden".to_string(),
        });
        step.record(&mut ctx, &Locals::new(), None).unwrap();
        assert_eq!(ctx.html_content(), "");
    }

    #[test]
    fn values() {
        assert_eq!(value_to_ir(&Value::Float(0.1 + 0.2)), mn("0.3"));
        assert_eq!(value_to_ir(&Value::from("x")), mtext("x"));
        assert_eq!(value_to_ir(&Value::None), mtext("None"));
        assert_eq!(value_to_ir(&Value::Int(-4)), mn("-4"));
    }
}
