//! Collapses products and quotients of `unit.*` references and numbers into one unit atom.

use indexmap::IndexMap;
use math_ir::{MathNode, format_number, mn, mo, mrow, mu};

use crate::error::AstConversionError;
use crate::syntax::ast::{BinOp, Constant, Expr, ExprKind, UnaryOp};
use crate::units::registry;

/// Exponents closer to zero than this are dropped.
const EPSILON: f64 = 1e-12;

/// The reserved name of the unit registry handle in scripts.
pub const UNIT_NAME: &str = "unit";

#[derive(Debug, Default)]
struct UnitCollector {
    coeff: f64,
    powers: IndexMap<String, f64>,
}

impl UnitCollector {
    fn add_unit(&mut self, name: &str, power: f64) {
        let entry = self.powers.entry(name.to_string()).or_insert(0.0);
        *entry += power;
        if entry.abs() < EPSILON {
            self.powers.shift_remove(name);
        }
    }

    fn walk(&mut self, expr: &Expr, sign: f64) -> bool {
        match &expr.kind {
            ExprKind::BinOp {
                left,
                op: BinOp::Mult,
                right,
            } => self.walk(left, sign) && self.walk(right, sign),
            ExprKind::BinOp {
                left,
                op: BinOp::Div,
                right,
            } => self.walk(left, sign) && self.walk(right, -sign),
            ExprKind::BinOp {
                left,
                op: BinOp::Pow,
                right,
            } => match (unit_attribute(left), const_number(right)) {
                (Some(name), Some(exp)) => {
                    self.add_unit(name, sign * exp);
                    true
                }
                _ => false,
            },
            _ => {
                if let Some(name) = unit_attribute(expr) {
                    self.add_unit(name, sign);
                    return true;
                }
                let Some(num) = const_number(expr) else {
                    return false;
                };
                if sign < 0.0 {
                    if num == 0.0 {
                        return false;
                    }
                    self.coeff /= num;
                } else {
                    self.coeff *= num;
                }
                true
            }
        }
    }

    /// `name**exp` factors joined by `*`, with `**1` omitted.
    fn expression(&self) -> String {
        self.powers
            .iter()
            .map(|(name, power)| {
                if *power == 1.0 {
                    name.clone()
                } else {
                    format!("{name}**{}", format_number(*power))
                }
            })
            .collect::<Vec<_>>()
            .join("*")
    }
}

/// `unit.<name>`
pub(crate) fn unit_attribute(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Attribute { value, attr } if value.as_name() == Some(UNIT_NAME) => {
            Some(attr.as_str())
        }
        _ => None,
    }
}

/// A numeric literal, possibly with unary signs.
pub(crate) fn const_number(expr: &Expr) -> Option<f64> {
    match &expr.kind {
        ExprKind::Constant(Constant::Int(value)) => Some(*value as f64),
        ExprKind::Constant(Constant::Float(value)) => Some(*value),
        ExprKind::UnaryOp {
            op: UnaryOp::UAdd,
            operand,
        } => const_number(operand),
        ExprKind::UnaryOp {
            op: UnaryOp::USub,
            operand,
        } => const_number(operand).map(|v| -v),
        _ => None,
    }
}

/// Tries to fold `expr` into a single unit atom, optionally preceded by its coefficient.
///
/// Returns `Ok(None)` when `expr` is not a pure unit expression. Errors from the unit
/// registry on the assembled expression are not swallowed.
pub fn try_fold_units(expr: &Expr) -> Result<Option<MathNode>, AstConversionError> {
    if !matches!(
        expr.kind,
        ExprKind::BinOp {
            op: BinOp::Mult | BinOp::Div | BinOp::Pow,
            ..
        }
    ) {
        return Ok(None);
    }
    let mut collector = UnitCollector {
        coeff: 1.0,
        ..UnitCollector::default()
    };
    if !collector.walk(expr, 1.0) || collector.powers.is_empty() {
        return Ok(None);
    }
    let units = registry()
        .parse_units(&collector.expression())
        .map_err(|source| AstConversionError::Unit {
            line: expr.line,
            source,
        })?;
    let unit_node = mu(units.to_string());
    let coeff = format_number(collector.coeff);
    if coeff == "1" {
        return Ok(Some(unit_node));
    }
    Ok(Some(mrow([mn(coeff), mo(""), unit_node])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_expression;

    fn fold(source: &str) -> Option<MathNode> {
        try_fold_units(&parse_expression(source).unwrap()).unwrap()
    }

    #[test]
    fn coefficient_and_unit() {
        assert_eq!(
            fold("10 * unit.meter"),
            Some(mrow([mn("10"), mo(""), mu("meter")]))
        );
    }

    #[test]
    fn quotient_with_power() {
        assert_eq!(
            fold("10 * unit.m / unit.second ** 2"),
            Some(mrow([mn("10"), mo(""), mu("meter / second ** 2")]))
        );
        assert_eq!(fold("unit.m * unit.s ** -2"), Some(mu("meter / second ** 2")));
    }

    #[test]
    fn arrangement_does_not_matter() {
        let a = fold("unit.kN * unit.m / unit.s");
        let b = fold("unit.m / unit.s * unit.kN");
        let c = fold("unit.m * (unit.kN / unit.s)");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn cancelling_units() {
        assert_eq!(fold("2 * unit.m / unit.m"), None);
    }

    #[test]
    fn not_foldable() {
        assert_eq!(fold("x * unit.m"), None);
        assert_eq!(fold("unit.m + unit.m"), None);
        assert_eq!(fold("2 * 3"), None);
        assert_eq!(fold("unit.m / 0"), None);
        assert_eq!(fold("unit.m ** n"), None);
    }

    #[test]
    fn division_by_number() {
        assert_eq!(
            fold("unit.m / 4"),
            Some(mrow([mn("0.25"), mo(""), mu("meter")]))
        );
    }

    #[test]
    fn undefined_unit_is_an_error() {
        let expr = parse_expression("3 * unit.furlong").unwrap();
        assert!(matches!(
            try_fold_units(&expr),
            Err(AstConversionError::Unit { .. })
        ));
    }
}
