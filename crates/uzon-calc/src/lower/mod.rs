//! Lowering of script expressions to Math IR.

mod special_functions;
mod unit_fold;

use math_ir::{MathNode, mfenced, mfrac, mi, mn, mo, mrow, msub, msup, mtext, mu};

use crate::error::AstConversionError;
use crate::syntax::ast::{BinOp, BoolOp, CmpOp, Constant, Expr, ExprKind, UnaryOp};

pub use special_functions::{
    SpecialFunctionFormatter, SpecialFunctionRegistry, format_special_function,
    register_special_function, special_functions, unregister_special_function,
};
pub use unit_fold::{UNIT_NAME, try_fold_units};

/// Binding strength of an expression, used to decide where parentheses are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Loose,
    Sum,
    Product,
    Unary,
    Atom,
}

fn precedence(expr: &Expr) -> Prec {
    match &expr.kind {
        ExprKind::BinOp {
            op: BinOp::Add | BinOp::Sub,
            ..
        } => Prec::Sum,
        ExprKind::BinOp {
            op: BinOp::Mult | BinOp::Mod | BinOp::FloorDiv,
            ..
        } => Prec::Product,
        ExprKind::UnaryOp {
            op: UnaryOp::UAdd | UnaryOp::USub | UnaryOp::Invert,
            ..
        } => Prec::Unary,
        ExprKind::BoolOp { .. }
        | ExprKind::Compare { .. }
        | ExprKind::UnaryOp { .. }
        | ExprKind::IfExp { .. }
        | ExprKind::Lambda(_)
        | ExprKind::NamedExpr { .. } => Prec::Loose,
        _ => Prec::Atom,
    }
}

/// Converts expressions to Math IR, reading fallback text from `source`.
pub struct Lowerer<'source> {
    source: &'source str,
}

impl<'source> Lowerer<'source> {
    pub fn new(source: &'source str) -> Self {
        Lowerer { source }
    }

    /// The source text an expression was parsed from.
    pub fn source_text(&self, expr: &Expr) -> Result<&'source str, AstConversionError> {
        self.source
            .get(expr.span.start..expr.span.end)
            .ok_or(AstConversionError::Malformed {
                kind: expr.kind.node_kind().as_str(),
                line: expr.line,
                reason: "span outside of the source text",
            })
    }

    fn fallback(&self, expr: &Expr) -> Result<MathNode, AstConversionError> {
        Ok(mtext(self.source_text(expr)?))
    }

    /// Assignment targets: a name becomes an identifier, anything else its source text.
    pub fn lower_target(&self, expr: &Expr) -> Result<MathNode, AstConversionError> {
        match &expr.kind {
            ExprKind::Name(name) => Ok(mi(name)),
            _ => self.fallback(expr),
        }
    }

    pub fn lower(&self, expr: &Expr) -> Result<MathNode, AstConversionError> {
        let node = match &expr.kind {
            ExprKind::Name(name) => mi(name),
            ExprKind::Constant(constant) => match constant {
                Constant::Int(value) => mn(*value),
                Constant::Float(value) => mn(*value),
                Constant::Str(text) => mtext(text),
                Constant::None => mtext("None"),
                Constant::Bool(true) => mtext("True"),
                Constant::Bool(false) => mtext("False"),
                Constant::Ellipsis => mtext("Ellipsis"),
            },
            ExprKind::UnaryOp { op, operand } => {
                let operand_node = if precedence(operand) < Prec::Product {
                    mfenced(self.lower(operand)?)
                } else {
                    self.lower(operand)?
                };
                mrow([mo(<&str>::from(*op)), operand_node])
            }
            ExprKind::BinOp { left, op, right } => {
                if let Some(folded) = try_fold_units(expr)? {
                    return Ok(folded);
                }
                return self.lower_binop(expr, left, *op, right);
            }
            ExprKind::BoolOp { op, values } => {
                let op = match op {
                    BoolOp::And => "and",
                    BoolOp::Or => "or",
                };
                let mut items = Vec::with_capacity(values.len() * 2);
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        items.push(mo(op));
                    }
                    items.push(self.lower(value)?);
                }
                mrow(items)
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut items = vec![self.lower(left)?];
                for (op, right) in ops.iter().zip(comparators) {
                    items.push(mo(comparison_symbol(*op)));
                    items.push(self.lower(right)?);
                }
                mrow(items)
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                let name = match func.dotted_name() {
                    Some(name) => name,
                    None => self.source_text(func)?.to_string(),
                };
                let mut lowered = Vec::with_capacity(args.len());
                for arg in args {
                    lowered.push(self.lower(arg)?);
                }
                if keywords.is_empty()
                    && let Some(special) = format_special_function(&name, &lowered)
                {
                    return Ok(special);
                }
                for keyword in keywords {
                    let value = self.lower(&keyword.value)?;
                    lowered.push(match &keyword.arg {
                        Some(arg) => mrow([mtext(arg), mo("="), value]),
                        None => mrow([mo("**"), value]),
                    });
                }
                let mut items = vec![mtext(name), mo("(")];
                for (idx, arg) in lowered.into_iter().enumerate() {
                    if idx > 0 {
                        items.push(mo(","));
                    }
                    items.push(arg);
                }
                items.push(mo(")"));
                mrow(items)
            }
            ExprKind::Attribute { value, attr } => {
                if value.as_name() == Some(UNIT_NAME) {
                    mu(attr)
                } else {
                    mi(self.source_text(expr)?)
                }
            }
            ExprKind::Subscript { value, slice } => {
                msub(self.lower(value)?, self.lower_index(slice)?)
            }
            _ => return self.fallback(expr),
        };
        Ok(node)
    }

    fn lower_binop(
        &self,
        expr: &Expr,
        left: &Expr,
        op: BinOp,
        right: &Expr,
    ) -> Result<MathNode, AstConversionError> {
        let symbol = match op {
            BinOp::Div => return Ok(mfrac(self.lower(left)?, self.lower(right)?)),
            BinOp::Pow => return Ok(msup(self.lower(left)?, self.lower(right)?)),
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mult => "·",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            _ => return self.fallback(expr),
        };
        let own = precedence(expr);
        let left_node = self.operand(left, precedence(left) < own)?;
        // Left-associative: the right operand needs parentheses at equal precedence too,
        // except for the associative `+` and `·`.
        let right_prec = precedence(right);
        let fence_right = right_prec < own
            || (right_prec == own && !matches!(op, BinOp::Add | BinOp::Mult));
        let right_node = self.operand(right, fence_right)?;
        Ok(mrow([left_node, mo(symbol), right_node]))
    }

    fn operand(&self, expr: &Expr, fenced: bool) -> Result<MathNode, AstConversionError> {
        let node = self.lower(expr)?;
        Ok(if fenced { mfenced(node) } else { node })
    }

    /// Subscript indices: a tuple becomes a `,`-separated row and a slice a `:`-separated
    /// row, so the index can be read back at render time.
    fn lower_index(&self, index: &Expr) -> Result<MathNode, AstConversionError> {
        match &index.kind {
            ExprKind::Tuple(items) => {
                let mut nodes = Vec::with_capacity(items.len() * 2);
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        nodes.push(mo(","));
                    }
                    nodes.push(self.lower_index(item)?);
                }
                Ok(mrow(nodes))
            }
            ExprKind::Slice { lower, upper, step } => {
                let mut nodes = Vec::new();
                if let Some(lower) = lower {
                    nodes.push(self.lower(lower)?);
                }
                nodes.push(mo(":"));
                if let Some(upper) = upper {
                    nodes.push(self.lower(upper)?);
                }
                if let Some(step) = step {
                    nodes.push(mo(":"));
                    nodes.push(self.lower(step)?);
                }
                Ok(mrow(nodes))
            }
            _ => self.lower(index),
        }
    }
}

fn comparison_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "=",
        CmpOp::NotEq => "≠",
        CmpOp::Lt => "<",
        CmpOp::LtE => "≤",
        CmpOp::Gt => ">",
        CmpOp::GtE => "≥",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
        CmpOp::Is => "is",
        CmpOp::IsNot => "is not",
    }
}

/// Lowers `expr`, parsed from `source`.
pub fn lower_expr(expr: &Expr, source: &str) -> Result<MathNode, AstConversionError> {
    Lowerer::new(source).lower(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_expression;
    use math_ir::{msqrt, to_mathml};

    fn lower(source: &str) -> MathNode {
        lower_expr(&parse_expression(source).unwrap(), source).unwrap()
    }

    #[test]
    fn leaves() {
        assert_eq!(lower("x"), mi("x"));
        assert_eq!(lower("3"), mn("3"));
        assert_eq!(lower("2.50"), mn("2.5"));
        assert_eq!(lower("'abc'"), mtext("abc"));
        assert_eq!(lower("None"), mtext("None"));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(lower("1 + 2"), mrow([mn("1"), mo("+"), mn("2")]));
        assert_eq!(lower("a * b"), mrow([mi("a"), mo("·"), mi("b")]));
        assert_eq!(
            lower("x / (a + b)"),
            mfrac(mi("x"), mrow([mi("a"), mo("+"), mi("b")]))
        );
        assert_eq!(lower("x ** 2"), msup(mi("x"), mn("2")));
        assert_eq!(lower("a % b"), mrow([mi("a"), mo("%"), mi("b")]));
        assert_eq!(lower("a // b"), mrow([mi("a"), mo("//"), mi("b")]));
        assert_eq!(lower("-x"), mrow([mo("-"), mi("x")]));
        assert_eq!(lower("not x"), mrow([mo("not"), mi("x")]));
    }

    #[test]
    fn parentheses_follow_precedence() {
        assert_eq!(
            lower("(a + b) * c"),
            mrow([mfenced(mrow([mi("a"), mo("+"), mi("b")])), mo("·"), mi("c")])
        );
        assert_eq!(
            lower("a - (b - c)"),
            mrow([mi("a"), mo("-"), mfenced(mrow([mi("b"), mo("-"), mi("c")]))])
        );
        assert_eq!(
            lower("a + (b + c)"),
            mrow([mi("a"), mo("+"), mrow([mi("b"), mo("+"), mi("c")])])
        );
        assert_eq!(
            lower("-(a + b)"),
            mrow([mo("-"), mfenced(mrow([mi("a"), mo("+"), mi("b")]))])
        );
    }

    #[test]
    fn comparisons_and_bool_ops() {
        assert_eq!(
            lower("a <= b != c"),
            mrow([mi("a"), mo("≤"), mi("b"), mo("≠"), mi("c")])
        );
        assert_eq!(
            lower("a and b or c"),
            mrow([mrow([mi("a"), mo("and"), mi("b")]), mo("or"), mi("c")])
        );
        assert_eq!(
            lower("x not in y"),
            mrow([mi("x"), mo("not in"), mi("y")])
        );
    }

    #[test]
    fn calls() {
        assert_eq!(lower("abs(x)"), mrow([mo("|"), mi("x"), mo("|")]));
        assert_eq!(lower("sqrt(x)"), msqrt(mi("x")));
        assert_eq!(lower("math.sqrt(x)"), msqrt(mi("x")));
        assert_eq!(
            lower("max(a, b)"),
            mrow([mtext("max"), mo("("), mi("a"), mo(","), mi("b"), mo(")")])
        );
        assert_eq!(
            lower("round(x, ndigits=2)"),
            mrow([
                mtext("round"),
                mo("("),
                mi("x"),
                mo(","),
                mrow([mtext("ndigits"), mo("="), mn("2")]),
                mo(")")
            ])
        );
    }

    #[test]
    fn attributes() {
        assert_eq!(lower("unit.meter"), mu("meter"));
        assert_eq!(lower("beam.length"), mi("beam.length"));
    }

    #[test]
    fn unit_folding_takes_precedence() {
        assert_eq!(
            lower("10 * unit.meter"),
            mrow([mn("10"), mo(""), mu("meter")])
        );
        assert_eq!(
            lower("F * unit.m"),
            mrow([mi("F"), mo("·"), mu("m")])
        );
    }

    #[test]
    fn subscripts() {
        assert_eq!(lower("arr[0]"), msub(mi("arr"), mn("0")));
        assert_eq!(
            lower("arr[0, 1]"),
            msub(mi("arr"), mrow([mn("0"), mo(","), mn("1")]))
        );
        assert_eq!(
            lower("arr[:, 1]"),
            msub(mi("arr"), mrow([mrow([mo(":")]), mo(","), mn("1")]))
        );
        assert_eq!(
            lower("arr[1:3]"),
            msub(mi("arr"), mrow([mn("1"), mo(":"), mn("3")]))
        );
    }

    #[test]
    fn fallback_uses_source_text() {
        assert_eq!(lower("[1, 2]"), mtext("[1, 2]"));
        assert_eq!(lower("a if b else c"), mtext("a if b else c"));
        assert_eq!(lower("a << 2"), mtext("a << 2"));
    }

    #[test]
    fn targets() {
        let lowerer = Lowerer::new("a.b");
        let attr = parse_expression("a.b").unwrap();
        assert_eq!(lowerer.lower_target(&attr).unwrap(), mtext("a.b"));
        let name = parse_expression("a").unwrap();
        assert_eq!(Lowerer::new("a").lower_target(&name).unwrap(), mi("a"));
    }

    #[test]
    fn fraction_mathml() {
        insta::assert_snapshot!(
            to_mathml(&lower("x / (a + b)")),
            @r#"<math xmlns="http://www.w3.org/1998/Math/MathML"><mrow><mfrac><mrow><mi>x</mi></mrow><mrow><mi>a</mi><mo>+</mo><mi>b</mi></mrow></mfrac></mrow></math>"#
        );
    }
}
