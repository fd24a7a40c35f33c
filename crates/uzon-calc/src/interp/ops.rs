//! Arithmetic, unit arithmetic and comparison operators.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexSet;

use super::error::OpError;
use super::value::Value;
use crate::syntax::ast::{BinOp, UnaryOp};
use crate::units::{Quantity, UnitExpr};

fn unsupported(op: BinOp, left: &Value, right: &Value) -> OpError {
    OpError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.as_str(),
        left.type_name(),
        right.type_name()
    ))
}

/// A value taking part in unit arithmetic.
enum Dimensional {
    Number(f64),
    Unit(UnitExpr),
    Quantity(Quantity),
}

impl Dimensional {
    fn of(value: &Value) -> Option<Dimensional> {
        match value {
            Value::Unit(units) => Some(Dimensional::Unit((**units).clone())),
            Value::Quantity(q) => Some(Dimensional::Quantity((**q).clone())),
            other => other.as_float().map(Dimensional::Number),
        }
    }

    fn into_quantity(self) -> Quantity {
        match self {
            Dimensional::Number(n) => Quantity::new(n, UnitExpr::dimensionless()),
            Dimensional::Unit(units) => Quantity::new(1.0, units),
            Dimensional::Quantity(q) => q,
        }
    }
}

fn unit_arithmetic(op: BinOp, left: &Value, right: &Value) -> Result<Option<Value>, OpError> {
    let is_dimensional = |v: &Value| matches!(v, Value::Unit(_) | Value::Quantity(_));
    if !is_dimensional(left) && !is_dimensional(right) {
        return Ok(None);
    }
    let (Some(a), Some(b)) = (Dimensional::of(left), Dimensional::of(right)) else {
        return Err(unsupported(op, left, right));
    };
    let value = match (op, a, b) {
        (BinOp::Mult, Dimensional::Unit(a), Dimensional::Unit(b)) => unit_value(a.mul(&b)),
        (BinOp::Div, Dimensional::Unit(a), Dimensional::Unit(b)) => unit_value(a.div(&b)),
        (BinOp::Pow, Dimensional::Unit(a), Dimensional::Number(exp)) => unit_value(a.powf(exp)),
        (BinOp::Mult, a, b) => Value::from(a.into_quantity().mul(&b.into_quantity())),
        (BinOp::Div, a, b) => {
            let b = b.into_quantity();
            if b.magnitude == 0.0 {
                return Err(OpError::zero_division("division by zero"));
            }
            Value::from(a.into_quantity().div(&b))
        }
        (BinOp::Pow, a, Dimensional::Number(exp)) => Value::from(a.into_quantity().powf(exp)),
        (BinOp::Add, a, b) => Value::from(a.into_quantity().add(&b.into_quantity())?),
        (BinOp::Sub, a, b) => Value::from(a.into_quantity().sub(&b.into_quantity())?),
        _ => return Err(unsupported(op, left, right)),
    };
    Ok(Some(value))
}

fn unit_value(units: UnitExpr) -> Value {
    if units.is_dimensionless() {
        Value::Float(1.0)
    } else {
        Value::Unit(Rc::new(units))
    }
}

fn checked(result: Option<i64>) -> Result<Value, OpError> {
    result.map(Value::Int).ok_or_else(OpError::overflow)
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value, OpError> {
    match op {
        BinOp::Add => checked(a.checked_add(b)),
        BinOp::Sub => checked(a.checked_sub(b)),
        BinOp::Mult => checked(a.checked_mul(b)),
        BinOp::Div => {
            if b == 0 {
                return Err(OpError::zero_division("division by zero"));
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(OpError::zero_division("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(OpError::overflow)?;
            let inexact = a % b != 0;
            Ok(Value::Int(if inexact && (a < 0) != (b < 0) { q - 1 } else { q }))
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(OpError::zero_division("integer division or modulo by zero"));
            }
            let r = a.checked_rem(b).ok_or_else(OpError::overflow)?;
            Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(OpError::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| OpError::overflow())?;
            checked(a.checked_pow(exp))
        }
        BinOp::LShift => {
            let shift = u32::try_from(b).map_err(|_| OpError::value_error("negative shift count"))?;
            let shifted = a.checked_shl(shift).ok_or_else(OpError::overflow)?;
            if shifted >> shift != a {
                return Err(OpError::overflow());
            }
            Ok(Value::Int(shifted))
        }
        BinOp::RShift => {
            let shift = u32::try_from(b).map_err(|_| OpError::value_error("negative shift count"))?;
            Ok(Value::Int(a >> shift.min(63)))
        }
        BinOp::BitAnd => Ok(Value::Int(a & b)),
        BinOp::BitOr => Ok(Value::Int(a | b)),
        BinOp::BitXor => Ok(Value::Int(a ^ b)),
        BinOp::MatMult => Err(unsupported(op, &Value::Int(a), &Value::Int(b))),
    }
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<Value, OpError> {
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mult => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(OpError::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(OpError::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(OpError::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(OpError::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            let result = a.powf(b);
            if result.is_nan() && !a.is_nan() && !b.is_nan() {
                return Err(OpError::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            result
        }
        _ => {
            return Err(unsupported(op, &Value::Float(a), &Value::Float(b)));
        }
    }))
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Vec<T> {
    let times = usize::try_from(times).unwrap_or(0);
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

/// `left <op> right`
pub fn binary_op(op: BinOp, left: &Value, right: &Value) -> Result<Value, OpError> {
    if let Some(value) = unit_arithmetic(op, left, right)? {
        return Ok(value);
    }
    match (left, right) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            let (Some(a), Some(b)) = (left.as_int(), right.as_int()) else {
                return Err(unsupported(op, left, right));
            };
            int_op(op, a, b)
        }
        (
            Value::Int(_) | Value::Bool(_) | Value::Float(_),
            Value::Int(_) | Value::Bool(_) | Value::Float(_),
        ) => {
            let (Some(a), Some(b)) = (left.as_float(), right.as_float()) else {
                return Err(unsupported(op, left, right));
            };
            float_op(op, a, b)
        }
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => {
            Ok(Value::from(format!("{a}{b}")))
        }
        (Value::Str(s), n) | (n, Value::Str(s)) if op == BinOp::Mult && n.as_int().is_some() => {
            Ok(Value::from(s.repeat(usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0))))
        }
        (Value::List(a), Value::List(b)) if op == BinOp::Add => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (Value::List(items), n) | (n, Value::List(items))
            if op == BinOp::Mult && n.as_int().is_some() =>
        {
            Ok(Value::list(repeat(&items.borrow(), n.as_int().unwrap_or(0))))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == BinOp::Add => {
            Ok(Value::Tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Value::Tuple(items), n) | (n, Value::Tuple(items))
            if op == BinOp::Mult && n.as_int().is_some() =>
        {
            Ok(Value::Tuple(repeat(items, n.as_int().unwrap_or(0)).into()))
        }
        (Value::Set(a), Value::Set(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            let set: IndexSet<_> = match op {
                BinOp::BitOr => a.union(&b).cloned().collect(),
                BinOp::BitAnd => a.intersection(&b).cloned().collect(),
                BinOp::Sub => a.difference(&b).cloned().collect(),
                BinOp::BitXor => a.symmetric_difference(&b).cloned().collect(),
                _ => return Err(unsupported(op, left, right)),
            };
            Ok(Value::Set(Rc::new(RefCell::new(set))))
        }
        (Value::Dict(a), Value::Dict(b)) if op == BinOp::BitOr => {
            let mut entries = a.borrow().entries.clone();
            for (key, value) in &b.borrow().entries {
                entries.insert(key.clone(), value.clone());
            }
            Ok(Value::dict(entries))
        }
        _ => Err(unsupported(op, left, right)),
    }
}

pub fn unary_op(op: UnaryOp, operand: &Value) -> Result<Value, OpError> {
    let bad = || {
        OpError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            <&str>::from(op),
            operand.type_name()
        ))
    };
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::USub, Value::Int(i)) => checked(i.checked_neg()),
        (UnaryOp::USub, Value::Bool(b)) => Ok(Value::Int(-i64::from(*b))),
        (UnaryOp::USub, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::USub, Value::Quantity(q)) => {
            Ok(Value::Quantity(Rc::new(Quantity::new(-q.magnitude, q.units.clone()))))
        }
        (UnaryOp::UAdd, Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        (UnaryOp::UAdd, Value::Int(_) | Value::Float(_) | Value::Quantity(_)) => {
            Ok(operand.clone())
        }
        (UnaryOp::Invert, value) => value.as_int().map(|i| Value::Int(!i)).ok_or_else(bad),
        _ => Err(bad()),
    }
}

/// `needle in haystack`
pub fn contains(haystack: &Value, needle: &Value) -> Result<bool, OpError> {
    match haystack {
        Value::Str(s) => match needle {
            Value::Str(n) => Ok(s.contains(&**n)),
            other => Err(OpError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Dict(dict) => Ok(dict.borrow().entries.contains_key(&needle.to_key()?)),
        Value::Set(set) => Ok(set.borrow().contains(&needle.to_key()?)),
        Value::Range(range) => Ok(needle.as_int().is_some_and(|i| {
            (0..range.len()).any(|index| range.get(index) == i)
        })),
        other => Ok(other.iterate()?.iter().any(|item| item.equals(needle))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::registry;

    fn meter() -> Value {
        Value::Unit(Rc::new(registry().parse_units("m").unwrap()))
    }

    #[test]
    fn integer_semantics() {
        let op = |op, a, b| binary_op(op, &Value::Int(a), &Value::Int(b)).unwrap().repr();
        assert_eq!(op(BinOp::FloorDiv, -7, 2), "-4");
        assert_eq!(op(BinOp::FloorDiv, 7, -2), "-4");
        assert_eq!(op(BinOp::Mod, -7, 2), "1");
        assert_eq!(op(BinOp::Mod, 7, -2), "-1");
        assert_eq!(op(BinOp::Div, 6, 3), "2.0");
        assert_eq!(op(BinOp::Pow, 2, -1), "0.5");
        let err = binary_op(BinOp::Pow, &Value::Int(10), &Value::Int(30)).unwrap_err();
        assert_eq!(err.kind, "OverflowError");
        let err = binary_op(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, "ZeroDivisionError");
    }

    #[test]
    fn quantities() {
        let length = binary_op(BinOp::Mult, &Value::Int(10), &meter()).unwrap();
        assert_eq!(length.repr(), "10 meter");
        let area = binary_op(BinOp::Mult, &length, &length).unwrap();
        assert_eq!(area.repr(), "100 meter ** 2");
        let ratio = binary_op(BinOp::Div, &length, &length).unwrap();
        assert_eq!(ratio.repr(), "1.0");
        let second = Value::Unit(Rc::new(registry().parse_units("s").unwrap()));
        let err = binary_op(BinOp::Add, &length, &second).unwrap_err();
        assert_eq!(err.kind, "DimensionalityError");
        let unit_ratio = binary_op(BinOp::Div, &meter(), &second).unwrap();
        assert_eq!(unit_ratio.repr(), "meter / second");
    }

    #[test]
    fn sequences() {
        let list = Value::list(vec![Value::Int(1)]);
        assert_eq!(
            binary_op(BinOp::Mult, &list, &Value::Int(3)).unwrap().repr(),
            "[1, 1, 1]"
        );
        assert_eq!(
            binary_op(BinOp::Add, &Value::from("a"), &Value::from("b"))
                .unwrap()
                .repr(),
            "'ab'"
        );
        assert!(binary_op(BinOp::Add, &Value::from("a"), &Value::Int(1)).is_err());
        assert!(contains(&list, &Value::Float(1.0)).unwrap());
    }
}
