//! Number formatting shared by the IR and the interpreter.

/// Decimal places kept when cleaning floating point noise.
pub const FLOAT_PRECISION: i32 = 12;
/// Significant digits used when a value is not integral.
pub const FLOAT_FORMAT_PRECISION: usize = 15;

/// Formats a number for display in an equation.
///
/// The value is rounded to [`FLOAT_PRECISION`] decimals first. Integral results are printed
/// without a fractional part; everything else is printed with [`FLOAT_FORMAT_PRECISION`]
/// significant digits and no trailing zeros.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return non_finite(value).to_string();
    }
    let rounded = round_decimals(value, FLOAT_PRECISION);
    if rounded == 0.0 {
        return "0".to_string();
    }
    if rounded.fract() == 0.0 {
        return format!("{rounded:.0}");
    }
    format_general(rounded, FLOAT_FORMAT_PRECISION)
}

fn round_decimals(value: f64, places: i32) -> f64 {
    // Beyond this magnitude every representable double is already integral at `places`.
    if value.abs() >= 1e15 {
        return value;
    }
    let factor = 10f64.powi(places);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

fn non_finite(value: f64) -> &'static str {
    if value.is_nan() {
        "nan"
    } else if value > 0.0 {
        "inf"
    } else {
        "-inf"
    }
}

/// The `g` presentation type: `precision` significant digits, fixed notation for exponents
/// in `-4..precision`, scientific notation otherwise, trailing zeros removed.
pub fn format_general(value: f64, precision: usize) -> String {
    format_general_with(value, precision, false)
}

/// [`format_general`] with the alternate form (`#`), which keeps trailing zeros.
pub fn format_general_with(value: f64, precision: usize, keep_zeros: bool) -> String {
    if !value.is_finite() {
        return non_finite(value).to_string();
    }
    let precision = precision.max(1);
    let scientific = format!("{:.*e}", precision - 1, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..precision as i32).contains(&exponent) {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        let fixed = format!("{value:.decimals$}");
        if keep_zeros {
            fixed
        } else {
            strip_zeros(&fixed).to_string()
        }
    } else {
        let mantissa = if keep_zeros {
            mantissa
        } else {
            strip_zeros(mantissa)
        };
        format!("{mantissa}{}", exponent_suffix(exponent))
    }
}

/// Exponent in the style `e+05` / `e-07`.
pub(crate) fn exponent_suffix(exponent: i32) -> String {
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("e{sign}{:02}", exponent.unsigned_abs())
}

fn strip_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Shortest round-trip representation of a float, in the conventional `repr` layout:
/// `1.0`, `0.1`, `1e+16`, `1.5e-07`.
pub fn float_repr(value: f64) -> String {
    if !value.is_finite() {
        return non_finite(value).to_string();
    }
    let mut buffer = dtoa::Buffer::new();
    let (negative, digits, point) = decompose(buffer.format(value));
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if digits.is_empty() {
        out.push_str("0.0");
        return out;
    }
    let exponent = point - 1;
    let len = digits.len() as i32;
    if (-4..16).contains(&exponent) {
        if point <= 0 {
            out.push_str("0.");
            out.extend(std::iter::repeat_n('0', (-point) as usize));
            out.push_str(&digits);
        } else if point >= len {
            out.push_str(&digits);
            out.extend(std::iter::repeat_n('0', (point - len) as usize));
            out.push_str(".0");
        } else {
            let (int, frac) = digits.split_at(point as usize);
            out.push_str(int);
            out.push('.');
            out.push_str(frac);
        }
    } else {
        let (first, rest) = digits.split_at(1);
        out.push_str(first);
        if !rest.is_empty() {
            out.push('.');
            out.push_str(rest);
        }
        out.push_str(&exponent_suffix(exponent));
    }
    out
}

/// Splits a decimal string into sign, significant digits and the position of the decimal
/// point relative to the first digit.
fn decompose(text: &str) -> (bool, String, i32) {
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (mantissa, exponent) = match text.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (text, 0),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mut digits: String = int.chars().chain(frac.chars()).collect();
    let mut point = int.len() as i32 + exponent;
    let leading = digits.len() - digits.trim_start_matches('0').len();
    digits.drain(..leading);
    point -= leading as i32;
    let trimmed = digits.trim_end_matches('0').len();
    digits.truncate(trimmed);
    (negative, digits, point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_values() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-7.0), "-7");
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1e20), "100000000000000000000");
        // Noise below the rounding precision disappears.
        assert_eq!(format_number(2.0000000000001), "2");
    }

    #[test]
    fn fractional_values() {
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(3.1415926), "3.1415926");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(format_number(1.0 / 3.0), "0.333333333333");
    }

    #[test]
    fn non_finite_values() {
        assert_eq!(format_number(f64::INFINITY), "inf");
        assert_eq!(format_number(f64::NEG_INFINITY), "-inf");
        assert_eq!(format_number(f64::NAN), "nan");
    }

    #[test]
    fn general_format() {
        assert_eq!(format_general(1234.5, 15), "1234.5");
        assert_eq!(format_general(0.0001, 15), "0.0001");
        assert_eq!(format_general(0.00001234, 15), "1.234e-05");
        assert_eq!(format_general(1.5e20, 15), "1.5e+20");
        assert_eq!(format_general(3.14159, 3), "3.14");
        assert_eq!(format_general_with(2.5, 3, true), "2.50");
    }

    #[test]
    fn repr_format() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(123456.789), "123456.789");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(0.0), "0.0");
    }
}
