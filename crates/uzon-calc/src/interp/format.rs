//! The format specification mini-language used by `format()` and f-strings.

use math_ir::{float_repr, format_general, format_general_with};

use super::error::OpError;
use super::value::Value;

#[derive(Debug, Clone, PartialEq)]
struct Spec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn invalid(spec: &str) -> OpError {
    OpError::value_error(format!("Invalid format specifier '{spec}'"))
}

fn parse_spec(text: &str) -> Result<Spec, OpError> {
    let chars: Vec<char> = text.chars().collect();
    let mut spec = Spec {
        fill: ' ',
        align: None,
        sign: '-',
        alternate: false,
        width: 0,
        grouping: None,
        precision: None,
        kind: None,
    };
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        spec.fill = chars[0];
        spec.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        spec.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        spec.sign = c;
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        spec.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        if spec.align.is_none() {
            spec.fill = '0';
            spec.align = Some('=');
        }
        i += 1;
    }
    let digits = |i: &mut usize| {
        let start = *i;
        while chars.get(*i).is_some_and(char::is_ascii_digit) {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>()
    };
    let width = digits(&mut i);
    if !width.is_empty() {
        spec.width = width.parse().map_err(|_| invalid(text))?;
    }
    if let Some(&c @ (',' | '_')) = chars.get(i) {
        spec.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let precision = digits(&mut i);
        if precision.is_empty() {
            return Err(OpError::value_error("Format specifier missing precision"));
        }
        spec.precision = Some(precision.parse().map_err(|_| invalid(text))?);
    }
    if let Some(&c) = chars.get(i) {
        spec.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid(text));
    }
    Ok(spec)
}

/// `format(value, spec)`.
pub fn format_value(value: &Value, spec: &str) -> Result<String, OpError> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let parsed = parse_spec(spec)?;
    match value {
        Value::Str(s) => format_str(s, &parsed),
        Value::Int(i) => format_int(*i, &parsed),
        Value::Bool(b) => format_int(i64::from(*b), &parsed),
        Value::Float(f) => format_float(*f, &parsed),
        Value::Quantity(q) => {
            let magnitude = format_float(q.magnitude, &parsed)?;
            Ok(format!("{magnitude} {}", q.units))
        }
        other => Err(OpError::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

fn unknown_code(kind: char, type_name: &str) -> OpError {
    OpError::value_error(format!(
        "Unknown format code '{kind}' for object of type '{type_name}'"
    ))
}

fn format_str(s: &str, spec: &Spec) -> Result<String, OpError> {
    if let Some(kind) = spec.kind.filter(|k| *k != 's') {
        return Err(unknown_code(kind, "str"));
    }
    if spec.sign != '-' || spec.align == Some('=') {
        return Err(OpError::value_error(
            "Sign not allowed in string format specifier",
        ));
    }
    let body: String = match spec.precision {
        Some(precision) => s.chars().take(precision).collect(),
        None => s.to_string(),
    };
    Ok(pad("", &body, spec, '<'))
}

fn format_int(value: i64, spec: &Spec) -> Result<String, OpError> {
    let magnitude = value.unsigned_abs();
    let body = match spec.kind {
        None | Some('d' | 'n') => group(&magnitude.to_string(), spec.grouping, 3),
        Some('b') => prefixed("0b", format!("{magnitude:b}"), spec),
        Some('o') => prefixed("0o", format!("{magnitude:o}"), spec),
        Some('x') => prefixed("0x", format!("{magnitude:x}"), spec),
        Some('X') => prefixed("0X", format!("{magnitude:X}"), spec),
        Some('c') => {
            let ch = u32::try_from(value)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| OpError::new("OverflowError", "%c arg not in range(0x110000)"))?;
            return Ok(pad("", &ch.to_string(), spec, '<'));
        }
        Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => {
            return format_float(value as f64, spec);
        }
        Some(kind) => return Err(unknown_code(kind, "int")),
    };
    Ok(pad(sign(value < 0, spec), &body, spec, '>'))
}

fn prefixed(prefix: &str, digits: String, spec: &Spec) -> String {
    let digits = group(&digits, spec.grouping, 4);
    if spec.alternate {
        format!("{prefix}{digits}")
    } else {
        digits
    }
}

fn format_float(value: f64, spec: &Spec) -> Result<String, OpError> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        match spec.kind {
            Some('E' | 'F' | 'G') => text.to_uppercase(),
            _ => text.to_string(),
        }
    } else {
        match spec.kind {
            None => match spec.precision {
                Some(precision) => format_general(magnitude, precision),
                None => float_repr(magnitude),
            },
            Some('f' | 'F') => fixed(magnitude, spec.precision.unwrap_or(6), spec),
            Some('e' | 'E') => {
                let text = scientific(magnitude, spec.precision.unwrap_or(6));
                if spec.kind == Some('E') {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            Some('g' | 'G' | 'n') => {
                let text =
                    format_general_with(magnitude, spec.precision.unwrap_or(6), spec.alternate);
                if spec.kind == Some('G') {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            Some('%') => fixed(magnitude * 100.0, spec.precision.unwrap_or(6), spec) + "%",
            Some(kind) => return Err(unknown_code(kind, "float")),
        }
    };
    Ok(pad(sign(negative, spec), &body, spec, '>'))
}

fn fixed(magnitude: f64, precision: usize, spec: &Spec) -> String {
    let text = format!("{magnitude:.precision$}");
    let (int, frac) = match text.split_once('.') {
        Some((int, frac)) => (int.to_string(), Some(frac.to_string())),
        None => (text, None),
    };
    let int = group(&int, spec.grouping, 3);
    match frac {
        Some(frac) => format!("{int}.{frac}"),
        None if spec.alternate => format!("{int}."),
        None => int,
    }
}

fn scientific(magnitude: f64, precision: usize) -> String {
    let text = format!("{magnitude:.precision$e}");
    let Some((mantissa, exponent)) = text.split_once('e') else {
        return text;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
}

fn sign(negative: bool, spec: &Spec) -> &'static str {
    match (negative, spec.sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    }
}

fn group(digits: &str, separator: Option<char>, every: usize) -> String {
    let Some(separator) = separator else {
        return digits.to_string();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / every);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % every == 0 {
            out.push(separator);
        }
        out.push(ch);
    }
    out
}

fn pad(sign: &str, body: &str, spec: &Spec, default_align: char) -> String {
    let len = sign.chars().count() + body.chars().count();
    if spec.width <= len {
        return format!("{sign}{body}");
    }
    let fill: String = std::iter::repeat_n(spec.fill, spec.width - len).collect();
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{sign}{body}{fill}"),
        '^' => {
            let left = (spec.width - len) / 2;
            let (before, after) = fill.split_at(fill.char_indices().nth(left).map_or(fill.len(), |(i, _)| i));
            format!("{before}{sign}{body}{after}")
        }
        '=' => format!("{sign}{fill}{body}"),
        _ => format!("{fill}{sign}{body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec).unwrap()
    }

    #[test]
    fn floats() {
        assert_eq!(fmt(Value::Float(3.1415926), ".3f"), "3.142");
        assert_eq!(fmt(Value::Float(3.1415926), ".3"), "3.14");
        assert_eq!(fmt(Value::Float(1234.5), ",.1f"), "1,234.5");
        assert_eq!(fmt(Value::Float(0.25), ".0%"), "25%");
        assert_eq!(fmt(Value::Float(12345.678), ".2e"), "1.23e+04");
        assert_eq!(fmt(Value::Float(-2.5), "+.1f"), "-2.5");
        assert_eq!(fmt(Value::Float(2.5), "+.1f"), "+2.5");
        assert_eq!(fmt(Value::Float(1e-7), "g"), "1e-07");
    }

    #[test]
    fn integers() {
        assert_eq!(fmt(Value::Int(42), "05d"), "00042");
        assert_eq!(fmt(Value::Int(-42), "05d"), "-0042");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Value::Int(3), ".2f"), "3.00");
    }

    #[test]
    fn alignment() {
        assert_eq!(fmt(Value::from("ab"), ">5"), "   ab");
        assert_eq!(fmt(Value::from("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::from("abcdef"), ".3"), "abc");
        assert_eq!(fmt(Value::Int(7), "<3"), "7  ");
    }

    #[test]
    fn errors() {
        assert!(format_value(&Value::Float(1.0), "d").is_err());
        assert!(format_value(&Value::from("x"), "+").is_err());
        assert!(format_value(&Value::Float(1.0), ".f").is_err());
        assert!(format_value(&Value::None, ">3").is_err());
    }

    #[test]
    fn empty_spec_is_str() {
        assert_eq!(fmt(Value::Float(2.0), ""), "2.0");
        assert_eq!(fmt(Value::None, ""), "None");
    }
}
