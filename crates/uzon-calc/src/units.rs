//! Unit registry, unit expressions and quantities.
//!
//! Unit names resolve to canonical full names (`m` → `meter`, `kN` → `kilonewton`), so two
//! spellings of the same unit always produce the same [`UnitExpr`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use rustc_hash::FxHashMap;
use thiserror::Error;

use math_ir::format_number;

/// Number of base dimensions: length, mass, time, current, temperature, amount, luminosity.
const DIMS: usize = 7;

/// Exponents of the base dimensions.
pub type Dimensions = [f64; DIMS];

const BASE_UNITS: [&str; DIMS] = [
    "meter", "kilogram", "second", "ampere", "kelvin", "mole", "candela",
];
const DIMENSION_NAMES: [&str; DIMS] = [
    "[length]",
    "[mass]",
    "[time]",
    "[current]",
    "[temperature]",
    "[substance]",
    "[luminosity]",
];

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("'{0}' is not defined in the unit registry")]
    Undefined(String),
    #[error("invalid unit expression '{expr}': {reason}")]
    Syntax { expr: String, reason: &'static str },
    #[error("cannot convert from '{from}' ({from_dims}) to '{to}' ({to_dims})")]
    Dimensionality {
        from: String,
        from_dims: String,
        to: String,
        to_dims: String,
    },
}

struct UnitDef {
    name: &'static str,
    aliases: &'static [&'static str],
    /// Scale to the coherent SI unit of the same dimension.
    factor: f64,
    dims: Dimensions,
}

struct Prefix {
    name: &'static str,
    symbol: &'static str,
    factor: f64,
}

const fn dims(l: f64, m: f64, t: f64, i: f64) -> Dimensions {
    [l, m, t, i, 0.0, 0.0, 0.0]
}

const NONE: Dimensions = [0.0; DIMS];
const LENGTH: Dimensions = dims(1.0, 0.0, 0.0, 0.0);
const TIME: Dimensions = dims(0.0, 0.0, 1.0, 0.0);
const MASS: Dimensions = dims(0.0, 1.0, 0.0, 0.0);
const FORCE: Dimensions = dims(1.0, 1.0, -2.0, 0.0);
const PRESSURE: Dimensions = dims(-1.0, 1.0, -2.0, 0.0);
const ENERGY: Dimensions = dims(2.0, 1.0, -2.0, 0.0);

static UNITS: &[UnitDef] = &[
    UnitDef { name: "meter", aliases: &["m", "metre"], factor: 1.0, dims: LENGTH },
    UnitDef { name: "second", aliases: &["s", "sec"], factor: 1.0, dims: TIME },
    UnitDef { name: "gram", aliases: &["g"], factor: 1e-3, dims: MASS },
    UnitDef { name: "ampere", aliases: &["A", "amp"], factor: 1.0, dims: dims(0.0, 0.0, 0.0, 1.0) },
    UnitDef { name: "kelvin", aliases: &["K"], factor: 1.0, dims: [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0] },
    UnitDef { name: "mole", aliases: &["mol"], factor: 1.0, dims: [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0] },
    UnitDef { name: "candela", aliases: &["cd"], factor: 1.0, dims: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0] },
    UnitDef { name: "radian", aliases: &["rad"], factor: 1.0, dims: NONE },
    UnitDef { name: "degree", aliases: &["deg"], factor: std::f64::consts::PI / 180.0, dims: NONE },
    UnitDef { name: "percent", aliases: &["pct"], factor: 0.01, dims: NONE },
    UnitDef { name: "minute", aliases: &["min"], factor: 60.0, dims: TIME },
    UnitDef { name: "hour", aliases: &["h", "hr"], factor: 3600.0, dims: TIME },
    UnitDef { name: "day", aliases: &["d"], factor: 86400.0, dims: TIME },
    UnitDef { name: "inch", aliases: &["in"], factor: 0.0254, dims: LENGTH },
    UnitDef { name: "foot", aliases: &["ft", "feet"], factor: 0.3048, dims: LENGTH },
    UnitDef { name: "mile", aliases: &["mi"], factor: 1609.344, dims: LENGTH },
    UnitDef { name: "liter", aliases: &["L", "l", "litre"], factor: 1e-3, dims: dims(3.0, 0.0, 0.0, 0.0) },
    UnitDef { name: "hectare", aliases: &["ha"], factor: 1e4, dims: dims(2.0, 0.0, 0.0, 0.0) },
    UnitDef { name: "tonne", aliases: &["t", "metric_ton"], factor: 1e3, dims: MASS },
    UnitDef { name: "newton", aliases: &["N"], factor: 1.0, dims: FORCE },
    UnitDef { name: "kilogram_force", aliases: &["kgf"], factor: 9.80665, dims: FORCE },
    UnitDef { name: "pascal", aliases: &["Pa"], factor: 1.0, dims: PRESSURE },
    UnitDef { name: "bar", aliases: &[], factor: 1e5, dims: PRESSURE },
    UnitDef { name: "joule", aliases: &["J"], factor: 1.0, dims: ENERGY },
    UnitDef { name: "watt", aliases: &["W"], factor: 1.0, dims: dims(2.0, 1.0, -3.0, 0.0) },
    UnitDef { name: "hertz", aliases: &["Hz"], factor: 1.0, dims: dims(0.0, 0.0, -1.0, 0.0) },
    UnitDef { name: "coulomb", aliases: &["C"], factor: 1.0, dims: dims(0.0, 0.0, 1.0, 1.0) },
    UnitDef { name: "volt", aliases: &["V"], factor: 1.0, dims: dims(2.0, 1.0, -3.0, -1.0) },
    UnitDef { name: "ohm", aliases: &["Ω"], factor: 1.0, dims: dims(2.0, 1.0, -3.0, -2.0) },
];

static PREFIXES: &[Prefix] = &[
    Prefix { name: "tera", symbol: "T", factor: 1e12 },
    Prefix { name: "giga", symbol: "G", factor: 1e9 },
    Prefix { name: "mega", symbol: "M", factor: 1e6 },
    Prefix { name: "kilo", symbol: "k", factor: 1e3 },
    Prefix { name: "hecto", symbol: "h", factor: 1e2 },
    Prefix { name: "deca", symbol: "da", factor: 1e1 },
    Prefix { name: "deci", symbol: "d", factor: 1e-1 },
    Prefix { name: "centi", symbol: "c", factor: 1e-2 },
    Prefix { name: "milli", symbol: "m", factor: 1e-3 },
    Prefix { name: "micro", symbol: "µ", factor: 1e-6 },
    Prefix { name: "micro", symbol: "μ", factor: 1e-6 },
    Prefix { name: "micro", symbol: "u", factor: 1e-6 },
    Prefix { name: "nano", symbol: "n", factor: 1e-9 },
    Prefix { name: "pico", symbol: "p", factor: 1e-12 },
];

/// A resolved unit: canonical name, SI scale and dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUnit {
    pub name: String,
    pub factor: f64,
    pub dims: Dimensions,
}

/// Resolves unit names and parses unit expressions.
pub struct UnitRegistry {
    by_name: FxHashMap<&'static str, &'static UnitDef>,
}

static REGISTRY: LazyLock<UnitRegistry> = LazyLock::new(UnitRegistry::new);

/// The process-wide unit registry.
#[inline]
pub fn registry() -> &'static UnitRegistry {
    &REGISTRY
}

impl UnitRegistry {
    fn new() -> Self {
        let mut by_name = FxHashMap::default();
        for def in UNITS {
            by_name.insert(def.name, def);
            for alias in def.aliases {
                by_name.insert(*alias, def);
            }
        }
        UnitRegistry { by_name }
    }

    /// Resolves a single unit name, with or without a prefix, to its canonical form.
    pub fn resolve(&self, name: &str) -> Result<ResolvedUnit, UnitError> {
        if let Some(def) = self.lookup_plain(name) {
            return Ok(ResolvedUnit {
                name: def.name.to_string(),
                factor: def.factor,
                dims: def.dims,
            });
        }
        // Longest prefixes first, so `da` wins over `d`.
        let mut prefixes: Vec<&Prefix> = PREFIXES.iter().collect();
        prefixes.sort_by_key(|p| std::cmp::Reverse(p.symbol.len()));
        for prefix in PREFIXES.iter().filter(|p| name.starts_with(p.name)) {
            if let Some(def) = self.lookup_full_name(&name[prefix.name.len()..]) {
                return Ok(prefixed(prefix, def));
            }
        }
        for prefix in prefixes {
            if let Some(rest) = name.strip_prefix(prefix.symbol)
                && let Some(def) = self.lookup_symbol(rest)
            {
                return Ok(prefixed(prefix, def));
            }
        }
        Err(UnitError::Undefined(name.to_string()))
    }

    fn lookup_plain(&self, name: &str) -> Option<&'static UnitDef> {
        if let Some(def) = self.by_name.get(name).copied() {
            return Some(def);
        }
        // Plural forms of full names: `meters`, `seconds`.
        name.strip_suffix('s')
            .filter(|stem| stem.len() > 2)
            .and_then(|stem| self.lookup_full_name(stem))
    }

    fn lookup_full_name(&self, name: &str) -> Option<&'static UnitDef> {
        self.by_name
            .get(name)
            .copied()
            .filter(|def| def.name == name)
            .or_else(|| {
                name.strip_suffix('s')
                    .and_then(|stem| self.by_name.get(stem).copied())
                    .filter(|def| def.name.len() + 1 == name.len())
            })
    }

    fn lookup_symbol(&self, symbol: &str) -> Option<&'static UnitDef> {
        self.by_name
            .get(symbol)
            .copied()
            .filter(|def| def.aliases.contains(&symbol))
    }

    /// Parses a unit expression such as `kN * m / s ** 2` into canonical form.
    pub fn parse_units(&self, expr: &str) -> Result<UnitExpr, UnitError> {
        let mut parser = UnitParser {
            registry: self,
            expr,
            chars: expr.char_indices().peekable(),
        };
        let units = parser.parse_product()?;
        parser.skip_whitespace();
        if parser.chars.peek().is_some() {
            return Err(parser.syntax("unexpected trailing input"));
        }
        Ok(units)
    }

    /// Overall SI scale factor and dimensions of a unit expression.
    pub fn factor_and_dims(&self, units: &UnitExpr) -> Result<(f64, Dimensions), UnitError> {
        let mut factor = 1.0;
        let mut total = NONE;
        for (name, exp) in &units.factors {
            let unit = self.resolve(name)?;
            factor *= unit.factor.powf(*exp);
            for (acc, d) in total.iter_mut().zip(unit.dims) {
                *acc += d * exp;
            }
        }
        Ok((factor, total))
    }
}

fn prefixed(prefix: &Prefix, def: &UnitDef) -> ResolvedUnit {
    ResolvedUnit {
        name: format!("{}{}", prefix.name, def.name),
        factor: prefix.factor * def.factor,
        dims: def.dims,
    }
}

struct UnitParser<'r, 'e> {
    registry: &'r UnitRegistry,
    expr: &'e str,
    chars: std::iter::Peekable<std::str::CharIndices<'e>>,
}

impl UnitParser<'_, '_> {
    fn syntax(&self, reason: &'static str) -> UnitError {
        UnitError::Syntax {
            expr: self.expr.to_string(),
            reason,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn parse_product(&mut self) -> Result<UnitExpr, UnitError> {
        let mut acc = self.parse_power()?;
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some((_, '*')) => {
                    self.chars.next();
                    let rhs = self.parse_power()?;
                    acc = acc.mul(&rhs);
                }
                Some((_, '/')) => {
                    self.chars.next();
                    let rhs = self.parse_power()?;
                    acc = acc.div(&rhs);
                }
                _ => return Ok(acc),
            }
        }
    }

    fn parse_power(&mut self) -> Result<UnitExpr, UnitError> {
        let base = self.parse_atom()?;
        self.skip_whitespace();
        let next = self.chars.peek().copied();
        let is_pow = match next {
            Some((_, '^')) => {
                self.chars.next();
                true
            }
            Some((idx, '*')) if self.expr[idx..].starts_with("**") => {
                self.chars.next();
                self.chars.next();
                true
            }
            _ => false,
        };
        if !is_pow {
            return Ok(base);
        }
        self.skip_whitespace();
        let exp = self.parse_number()?;
        Ok(base.powf(exp))
    }

    fn parse_atom(&mut self) -> Result<UnitExpr, UnitError> {
        self.skip_whitespace();
        match self.chars.peek().copied() {
            Some((_, '(')) => {
                self.chars.next();
                let inner = self.parse_product()?;
                self.skip_whitespace();
                if self.chars.next_if(|(_, c)| *c == ')').is_none() {
                    return Err(self.syntax("unclosed parenthesis"));
                }
                Ok(inner)
            }
            Some((_, c)) if c.is_ascii_digit() => {
                let value = self.parse_number()?;
                if value == 1.0 {
                    Ok(UnitExpr::dimensionless())
                } else {
                    Err(self.syntax("numeric factors are not units"))
                }
            }
            Some((start, c)) if c.is_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some((idx, ch)) =
                    self.chars.next_if(|(_, c)| c.is_alphanumeric() || *c == '_')
                {
                    end = idx + ch.len_utf8();
                }
                let unit = self.registry.resolve(&self.expr[start..end])?;
                Ok(UnitExpr::single(unit.name))
            }
            Some(_) => Err(self.syntax("unexpected character")),
            None => Err(self.syntax("unexpected end of expression")),
        }
    }

    fn parse_number(&mut self) -> Result<f64, UnitError> {
        let start = match self.chars.peek() {
            Some((idx, _)) => *idx,
            None => return Err(self.syntax("expected a number")),
        };
        let mut end = start;
        if let Some((idx, ch)) = self.chars.next_if(|(_, c)| *c == '-' || *c == '+') {
            end = idx + ch.len_utf8();
        }
        while let Some((idx, ch)) = self.chars.next_if(|(_, c)| c.is_ascii_digit() || *c == '.') {
            end = idx + ch.len_utf8();
        }
        self.expr[start..end]
            .parse()
            .map_err(|_| self.syntax("expected a number"))
    }
}

/// A product of canonical unit names raised to real exponents.
///
/// Zero exponents are never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitExpr {
    factors: BTreeMap<String, f64>,
}

impl UnitExpr {
    #[inline]
    pub fn dimensionless() -> Self {
        UnitExpr::default()
    }

    pub fn single(name: impl Into<String>) -> Self {
        let mut factors = BTreeMap::new();
        factors.insert(name.into(), 1.0);
        UnitExpr { factors }
    }

    #[inline]
    pub fn is_dimensionless(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn factors(&self) -> impl Iterator<Item = (&str, f64)> {
        self.factors.iter().map(|(name, exp)| (name.as_str(), *exp))
    }

    fn accumulate(&mut self, name: &str, exp: f64) {
        let entry = self.factors.entry(name.to_string()).or_insert(0.0);
        *entry += exp;
        if entry.abs() < EPSILON {
            self.factors.remove(name);
        }
    }

    pub fn mul(&self, other: &UnitExpr) -> UnitExpr {
        let mut out = self.clone();
        for (name, exp) in &other.factors {
            out.accumulate(name, *exp);
        }
        out
    }

    pub fn div(&self, other: &UnitExpr) -> UnitExpr {
        let mut out = self.clone();
        for (name, exp) in &other.factors {
            out.accumulate(name, -exp);
        }
        out
    }

    pub fn powf(&self, exp: f64) -> UnitExpr {
        let mut out = UnitExpr::default();
        for (name, e) in &self.factors {
            out.accumulate(name, e * exp);
        }
        out
    }
}

fn exponent_text(exp: f64) -> String {
    format_number(exp)
}

impl fmt::Display for UnitExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.factors.is_empty() {
            return f.write_str("dimensionless");
        }
        let mut wrote_numerator = false;
        for (name, exp) in self.factors.iter().filter(|(_, e)| **e > 0.0) {
            if wrote_numerator {
                f.write_str(" * ")?;
            }
            f.write_str(name)?;
            if *exp != 1.0 {
                write!(f, " ** {}", exponent_text(*exp))?;
            }
            wrote_numerator = true;
        }
        if !wrote_numerator {
            f.write_str("1")?;
        }
        for (name, exp) in self.factors.iter().filter(|(_, e)| **e < 0.0) {
            write!(f, " / {name}")?;
            if *exp != -1.0 {
                write!(f, " ** {}", exponent_text(-exp))?;
            }
        }
        Ok(())
    }
}

/// A magnitude with units.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub magnitude: f64,
    pub units: UnitExpr,
}

fn same_dims(a: &Dimensions, b: &Dimensions) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
}

/// Renders dimensions like `[length] / [time] ** 2`.
pub fn dimensions_text(dims: &Dimensions) -> String {
    let mut expr = UnitExpr::default();
    for (name, exp) in DIMENSION_NAMES.iter().zip(dims) {
        expr.accumulate(name, *exp);
    }
    expr.to_string()
}

impl Quantity {
    #[inline]
    pub fn new(magnitude: f64, units: UnitExpr) -> Self {
        Quantity { magnitude, units }
    }

    /// Converts to `target`, which must have the same dimensions.
    pub fn to(&self, target: &UnitExpr) -> Result<Quantity, UnitError> {
        let reg = registry();
        let (from_factor, from_dims) = reg.factor_and_dims(&self.units)?;
        let (to_factor, to_dims) = reg.factor_and_dims(target)?;
        if !same_dims(&from_dims, &to_dims) {
            return Err(UnitError::Dimensionality {
                from: self.units.to_string(),
                from_dims: dimensions_text(&from_dims),
                to: target.to_string(),
                to_dims: dimensions_text(&to_dims),
            });
        }
        Ok(Quantity::new(
            self.magnitude * from_factor / to_factor,
            target.clone(),
        ))
    }

    /// Converts to coherent SI base units.
    pub fn to_base_units(&self) -> Result<Quantity, UnitError> {
        let (factor, dims) = registry().factor_and_dims(&self.units)?;
        let mut units = UnitExpr::default();
        for (name, exp) in BASE_UNITS.iter().zip(dims) {
            units.accumulate(name, exp);
        }
        Ok(Quantity::new(self.magnitude * factor, units))
    }

    pub fn dimensionality(&self) -> Result<String, UnitError> {
        let (_, dims) = registry().factor_and_dims(&self.units)?;
        Ok(dimensions_text(&dims))
    }

    pub fn mul(&self, other: &Quantity) -> Quantity {
        Quantity::new(self.magnitude * other.magnitude, self.units.mul(&other.units))
    }

    pub fn div(&self, other: &Quantity) -> Quantity {
        Quantity::new(self.magnitude / other.magnitude, self.units.div(&other.units))
    }

    pub fn powf(&self, exp: f64) -> Quantity {
        Quantity::new(self.magnitude.powf(exp), self.units.powf(exp))
    }

    /// `self + other`, expressed in the units of `self`.
    pub fn add(&self, other: &Quantity) -> Result<Quantity, UnitError> {
        let other = other.to(&self.units)?;
        Ok(Quantity::new(self.magnitude + other.magnitude, self.units.clone()))
    }

    /// `self - other`, expressed in the units of `self`.
    pub fn sub(&self, other: &Quantity) -> Result<Quantity, UnitError> {
        let other = other.to(&self.units)?;
        Ok(Quantity::new(self.magnitude - other.magnitude, self.units.clone()))
    }

    /// Compares magnitudes after converting `other` into the units of `self`.
    pub fn compare(&self, other: &Quantity) -> Result<Option<std::cmp::Ordering>, UnitError> {
        let other = other.to(&self.units)?;
        Ok(self.magnitude.partial_cmp(&other.magnitude))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", format_number(self.magnitude), self.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(expr: &str) -> String {
        registry().parse_units(expr).unwrap().to_string()
    }

    #[test]
    fn resolves_symbols_and_prefixes() {
        let reg = registry();
        assert_eq!(reg.resolve("m").unwrap().name, "meter");
        assert_eq!(reg.resolve("meters").unwrap().name, "meter");
        assert_eq!(reg.resolve("kN").unwrap().name, "kilonewton");
        assert_eq!(reg.resolve("kilonewton").unwrap().name, "kilonewton");
        assert_eq!(reg.resolve("mm").unwrap().name, "millimeter");
        assert_eq!(reg.resolve("MPa").unwrap().name, "megapascal");
        assert_eq!(reg.resolve("ms").unwrap().name, "millisecond");
        assert_eq!(reg.resolve("min").unwrap().name, "minute");
        assert_eq!(reg.resolve("dam").unwrap().name, "decameter");
        assert_eq!(reg.resolve("kg").unwrap().name, "kilogram");
        assert!(matches!(reg.resolve("furlong"), Err(UnitError::Undefined(_))));
    }

    #[test]
    fn canonical_display() {
        assert_eq!(parse("m/second**2"), "meter / second ** 2");
        assert_eq!(parse("second**-2*m"), "meter / second ** 2");
        assert_eq!(parse("kN*m"), "kilonewton * meter");
        assert_eq!(parse("m*kN"), "kilonewton * meter");
        assert_eq!(parse("1/s"), "1 / second");
        assert_eq!(parse("m^0.5"), "meter ** 0.5");
        assert_eq!(parse("(kg*m)/(s*s)"), "kilogram * meter / second ** 2");
        assert_eq!(parse("m/m"), "dimensionless");
    }

    #[test]
    fn parse_errors() {
        let reg = registry();
        assert!(matches!(reg.parse_units("m *"), Err(UnitError::Syntax { .. })));
        assert!(matches!(reg.parse_units("(m"), Err(UnitError::Syntax { .. })));
        assert!(matches!(reg.parse_units("2*m"), Err(UnitError::Syntax { .. })));
        assert!(matches!(reg.parse_units("m $"), Err(UnitError::Syntax { .. })));
    }

    #[test]
    fn conversion() {
        let reg = registry();
        let q = Quantity::new(1500.0, reg.parse_units("mm").unwrap());
        let m = q.to(&reg.parse_units("m").unwrap()).unwrap();
        assert!((m.magnitude - 1.5).abs() < 1e-12);
        let err = q.to(&reg.parse_units("s").unwrap()).unwrap_err();
        assert!(err.to_string().contains("[length]"));
    }

    #[test]
    fn arithmetic() {
        let reg = registry();
        let a = Quantity::new(1.0, reg.parse_units("m").unwrap());
        let b = Quantity::new(50.0, reg.parse_units("cm").unwrap());
        let sum = a.add(&b).unwrap();
        assert!((sum.magnitude - 1.5).abs() < 1e-12);
        assert_eq!(sum.units.to_string(), "meter");
        let area = a.mul(&a);
        assert_eq!(area.to_string(), "1 meter ** 2");
        assert!(a.div(&a).units.is_dimensionless());
        let force = Quantity::new(2.0, reg.parse_units("kN").unwrap());
        let base = force.to_base_units().unwrap();
        assert_eq!(base.units.to_string(), "kilogram * meter / second ** 2");
        assert!((base.magnitude - 2000.0).abs() < 1e-9);
    }
}
