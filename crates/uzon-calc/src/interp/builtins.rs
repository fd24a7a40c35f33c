//! Builtin functions, exception classes, attribute lookup and the `math` module.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use tracing::info;

use super::error::{Exc, OpError};
use super::format::format_value;
use super::ops::binary_op;
use super::value::{Args, Builtin, BuiltinFn, Callee, Class, Key, Method, Module, Range, Value};
use super::{Interpreter, api};
use crate::context::ContextOptions;
use crate::syntax::ast::BinOp;
use crate::units::{Quantity, registry};

pub(super) fn builtin(name: &'static str, func: BuiltinFn) -> Value {
    Value::Builtin(Builtin { name, func })
}

fn method(receiver: &Value, name: &'static str, func: BuiltinFn) -> Value {
    Value::Method(Rc::new(Method {
        receiver: receiver.clone(),
        callee: Callee::Native(Builtin { name, func }),
    }))
}

/// Exception hierarchy as `(name, base)`, bases first.
const EXCEPTIONS: &[(&str, Option<&str>)] = &[
    ("BaseException", None),
    ("Exception", Some("BaseException")),
    ("ArithmeticError", Some("Exception")),
    ("ZeroDivisionError", Some("ArithmeticError")),
    ("OverflowError", Some("ArithmeticError")),
    ("LookupError", Some("Exception")),
    ("IndexError", Some("LookupError")),
    ("KeyError", Some("LookupError")),
    ("ValueError", Some("Exception")),
    ("TypeError", Some("Exception")),
    ("DimensionalityError", Some("TypeError")),
    ("NameError", Some("Exception")),
    ("UnboundLocalError", Some("NameError")),
    ("AttributeError", Some("Exception")),
    ("UndefinedUnitError", Some("AttributeError")),
    ("RuntimeError", Some("Exception")),
    ("NotImplementedError", Some("RuntimeError")),
    ("RecursionError", Some("RuntimeError")),
    ("AssertionError", Some("Exception")),
    ("ImportError", Some("Exception")),
    ("ModuleNotFoundError", Some("ImportError")),
    ("StopIteration", Some("Exception")),
    ("MemoryError", Some("Exception")),
    ("OSError", Some("Exception")),
    ("SyntaxError", Some("Exception")),
];

const FUNCTIONS: &[(&str, BuiltinFn)] = &[
    ("print", print),
    ("len", len),
    ("range", range),
    ("abs", abs),
    ("min", min),
    ("max", max),
    ("sum", sum),
    ("round", round),
    ("int", int),
    ("float", float),
    ("str", str),
    ("bool", bool_),
    ("list", list),
    ("tuple", tuple),
    ("dict", dict),
    ("set", set),
    ("enumerate", enumerate),
    ("zip", zip),
    ("sorted", sorted),
    ("reversed", reversed),
    ("isinstance", isinstance),
    ("repr", repr),
    ("format", format),
    ("any", any),
    ("all", all),
    ("map", map),
    ("filter", filter),
    ("pow", pow),
    ("divmod", divmod),
    ("hasattr", hasattr),
    ("getattr", getattr),
    ("setattr", setattr),
    ("hide", hide),
    ("show", show),
];

impl Interpreter {
    pub(super) fn install_builtins(&mut self) {
        for (name, base) in EXCEPTIONS {
            let bases = base
                .and_then(|base| self.exceptions.get(base).cloned())
                .into_iter()
                .collect();
            let class = Rc::new(Class {
                name: name.to_string(),
                bases,
                attrs: RefCell::default(),
            });
            self.builtins.insert(name, Value::Class(Rc::clone(&class)));
            self.exceptions.insert(name, class);
        }
        for (name, func) in FUNCTIONS {
            self.builtins.insert(name, builtin(name, *func));
        }
        self.builtins.insert("None", Value::None);
    }

    /// The class of exceptions named `kind`, created under `Exception` when unknown.
    pub(super) fn exception_class(&mut self, kind: &'static str) -> Rc<Class> {
        if let Some(class) = self.exceptions.get(kind) {
            return Rc::clone(class);
        }
        let bases = self.exceptions.get("Exception").cloned().into_iter().collect();
        let class = Rc::new(Class {
            name: kind.to_string(),
            bases,
            attrs: RefCell::default(),
        });
        self.exceptions.insert(kind, Rc::clone(&class));
        class
    }

    /// A user-defined method of an instance, bound to it.
    pub(super) fn special_method(&self, value: &Value, name: &str) -> Option<Value> {
        let Value::Instance(instance) = value else {
            return None;
        };
        match instance.class.lookup(name)? {
            Value::Function(function) => Some(Value::Method(Rc::new(Method {
                receiver: value.clone(),
                callee: Callee::Function(function),
            }))),
            _ => None,
        }
    }

    pub(super) fn import(&mut self, name: &str) -> Result<Rc<Module>, Exc> {
        let key: &'static str = match name {
            "math" => "math",
            "asyncio" => "asyncio",
            _ if name == "uzoncalc" || name.starts_with("uzoncalc.") => "uzoncalc",
            _ => {
                return Err(OpError::new(
                    "ModuleNotFoundError",
                    format!("No module named '{name}'"),
                )
                .into());
            }
        };
        if let Some(module) = self.modules.get(key) {
            return Ok(Rc::clone(module));
        }
        let module = Rc::new(match key {
            "math" => math_module(),
            "asyncio" => asyncio_module(),
            _ => api::module(),
        });
        self.modules.insert(key, Rc::clone(&module));
        Ok(module)
    }

    pub(crate) fn get_attr(&mut self, value: &Value, attr: &str) -> Result<Value, Exc> {
        let found = match value {
            Value::Module(module) => module.attrs.get(attr).cloned(),
            Value::Instance(instance) => {
                if let Some(value) = instance.attrs.borrow().get(attr) {
                    return Ok(value.clone());
                }
                match instance.class.lookup(attr) {
                    Some(Value::Function(function)) => Some(Value::Method(Rc::new(Method {
                        receiver: value.clone(),
                        callee: Callee::Function(function),
                    }))),
                    Some(other) => Some(other),
                    None if attr == "__class__" => Some(Value::Class(Rc::clone(&instance.class))),
                    None => None,
                }
            }
            Value::Class(class) => match attr {
                "__name__" => Some(Value::from(class.name.as_str())),
                _ => class.lookup(attr),
            },
            Value::Function(function) if attr == "__name__" => {
                Some(Value::from(function.name.as_str()))
            }
            Value::Entry(entry) if attr == "__name__" => Some(Value::from(entry.display_name())),
            Value::Dict(dict) => {
                let attr_access = dict.borrow().attr_access;
                let entry = dict.borrow().entries.get(&Key::str(attr)).cloned();
                match (attr_access, entry) {
                    (true, Some(entry)) => Some(entry),
                    _ => dict_method(attr).map(|(name, func)| method(value, name, func)),
                }
            }
            Value::Str(_) => str_method(attr).map(|(name, func)| method(value, name, func)),
            Value::List(_) => list_method(attr).map(|(name, func)| method(value, name, func)),
            Value::Tuple(_) => tuple_method(attr).map(|(name, func)| method(value, name, func)),
            Value::Set(_) => set_method(attr).map(|(name, func)| method(value, name, func)),
            Value::Float(f) => match attr {
                "real" => Some(Value::Float(*f)),
                "is_integer" => Some(method(value, "is_integer", float_is_integer)),
                _ => None,
            },
            Value::UnitRegistry => return unit_registry_attr(attr),
            Value::Quantity(quantity) => match attr {
                "magnitude" | "m" => Some(Value::Float(quantity.magnitude)),
                "units" | "u" => Some(Value::Unit(Rc::new(quantity.units.clone()))),
                "dimensionality" => Some(Value::from(quantity.dimensionality()?)),
                "to" => Some(method(value, "to", quantity_to)),
                "m_as" => Some(method(value, "m_as", quantity_m_as)),
                "to_base_units" => Some(method(value, "to_base_units", quantity_to_base_units)),
                _ => None,
            },
            Value::Field(field) => {
                let field = field.borrow();
                match attr {
                    "name" => Some(Value::from(field.name.as_str())),
                    "label" => Some(Value::from(field.label.as_str())),
                    "type" => Some(Value::from(field.kind.as_str())),
                    "placeholder" => Some(
                        field
                            .placeholder
                            .as_deref()
                            .map_or(Value::None, Value::from),
                    ),
                    "value" | "default" => Some(Value::from_json(&field.default)),
                    "options" => Some(field.options.as_ref().map_or(Value::None, |options| {
                        Value::list(options.iter().map(|o| Value::from(o.as_str())).collect())
                    })),
                    "vif" => Some(field.vif.as_deref().map_or(Value::None, Value::from)),
                    _ => None,
                }
            }
            Value::Context => match attr {
                "name" => Some(Value::from(self.ctx.name())),
                "is_silent" => Some(Value::Bool(self.ctx.is_silent())),
                "vars" => {
                    let vars = serde_json::Value::Object(self.ctx.vars.clone());
                    Some(Value::from_json(&vars))
                }
                "file_path" => Some(
                    self.ctx
                        .file_path()
                        .map_or(Value::None, |path| Value::from(path.display().to_string())),
                ),
                _ => None,
            },
            _ => None,
        };
        found.ok_or_else(|| OpError::attribute_error(value.type_name(), attr).into())
    }

    pub(crate) fn set_attr(&mut self, owner: &Value, attr: &str, value: Value) -> Result<(), Exc> {
        match owner {
            Value::Instance(instance) => {
                instance.attrs.borrow_mut().insert(attr.to_string(), value);
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(attr.to_string(), value);
            }
            Value::Dict(dict) if dict.borrow().attr_access => {
                dict.borrow_mut().entries.insert(Key::str(attr), value);
            }
            Value::Field(field) => {
                let mut field = field.borrow_mut();
                match attr {
                    "label" => field.label = value.expect_str("label")?.to_string(),
                    "placeholder" => {
                        field.placeholder = value.as_str().map(str::to_string);
                    }
                    "value" | "default" => field.default = value.to_json()?,
                    "vif" => field.vif = value.as_str().map(str::to_string),
                    "options" => {
                        field.options = match value {
                            Value::None => None,
                            value => Some(value.iterate()?.iter().map(Value::to_str).collect()),
                        };
                    }
                    _ => return Err(OpError::attribute_error("Field", attr).into()),
                }
            }
            other => return Err(OpError::attribute_error(other.type_name(), attr).into()),
        }
        Ok(())
    }

    /// Sorts `items`, comparing the results of `key` when given.
    pub(super) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> Result<Vec<Value>, Exc> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let sort_key = match key {
                Some(key) if !key.is_none() => self.call_value(key, Args::new(vec![item.clone()]))?,
                _ => item.clone(),
            };
            keyed.push((sort_key, item));
        }
        let mut error = None;
        keyed.sort_by(|(a, _), (b, _)| match a.compare(b) {
            Ok(ordering) => ordering,
            Err(err) => {
                error.get_or_insert(err);
                Ordering::Equal
            }
        });
        if let Some(err) = error {
            return Err(err.into());
        }
        let mut sorted: Vec<Value> = keyed.into_iter().map(|(_, item)| item).collect();
        if reverse {
            sorted.reverse();
        }
        Ok(sorted)
    }
}

/// Binds `args` to `names`; the first `required` must be present.
pub(super) fn bind<const N: usize>(
    args: Args,
    function: &str,
    names: &[&str; N],
    required: usize,
) -> Result<[Option<Value>; N], Exc> {
    let slots = args.bind_required(function, names, required)?;
    slots
        .try_into()
        .map_err(|_| OpError::type_error(format!("{function}() got the wrong arguments")).into())
}

fn receiver(args: Args) -> Result<(Value, Args), Exc> {
    let mut positional = args.positional.into_iter();
    let Some(receiver) = positional.next() else {
        return Err(OpError::type_error("method called without its receiver").into());
    };
    Ok((
        receiver,
        Args {
            positional: positional.collect(),
            keywords: args.keywords,
        },
    ))
}

/// Binds exactly two required positional arguments.
fn two(function: &str, args: Args) -> Result<(Value, Value), Exc> {
    let [a, b] = bind(args, function, &["a", "b"], 2)?;
    Ok((a.unwrap_or(Value::None), b.unwrap_or(Value::None)))
}

fn one(function: &str, args: Args) -> Result<Value, Exc> {
    let [value] = bind(args, function, &["x"], 1)?;
    Ok(value.unwrap_or(Value::None))
}

fn optional_iterable(function: &str, args: Args) -> Result<Vec<Value>, Exc> {
    let [value] = bind(args, function, &["iterable"], 0)?;
    match value {
        Some(value) => Ok(value.iterate()?),
        None => Ok(Vec::new()),
    }
}

fn print(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let sep = match args.keywords.get("sep") {
        Some(Value::Str(sep)) => sep.to_string(),
        _ => " ".to_string(),
    };
    let line = args
        .positional
        .iter()
        .map(Value::to_str)
        .collect::<Vec<_>>()
        .join(&sep);
    info!(target: "uzoncalc::script", "{line}");
    Ok(Value::None)
}

fn len(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let value = one("len", args)?;
    let len = value.len()?;
    Ok(Value::Int(i64::try_from(len).map_err(|_| OpError::overflow())?))
}

fn range(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let ints = args
        .positional
        .iter()
        .map(|value| value.expect_int("range() argument"))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints[..] {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step] => (start, stop, step),
        _ => {
            return Err(
                OpError::type_error(format!("range expected 1 to 3 arguments, got {}", ints.len()))
                    .into(),
            );
        }
    };
    if step == 0 {
        return Err(OpError::value_error("range() arg 3 must not be zero").into());
    }
    Ok(Value::Range(Range { start, stop, step }))
}

fn abs(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    Ok(match one("abs", args)? {
        Value::Bool(b) => Value::Int(i64::from(b)),
        Value::Int(i) => Value::Int(i.checked_abs().ok_or_else(OpError::overflow)?),
        Value::Float(f) => Value::Float(f.abs()),
        Value::Quantity(q) => {
            Value::Quantity(Rc::new(Quantity::new(q.magnitude.abs(), q.units.clone())))
        }
        other => {
            return Err(OpError::type_error(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))
            .into());
        }
    })
}

fn extreme(
    interp: &mut Interpreter,
    function: &str,
    mut args: Args,
    wanted: Ordering,
) -> Result<Value, Exc> {
    let key = args.keywords.shift_remove("key");
    let default = args.keywords.shift_remove("default");
    let items = match args.positional.len() {
        0 => {
            return Err(
                OpError::type_error(format!("{function} expected at least 1 argument")).into()
            );
        }
        1 => args.positional[0].iterate()?,
        _ => args.positional,
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let score = match &key {
            Some(key) if !key.is_none() => interp.call_value(key, Args::new(vec![item.clone()]))?,
            _ => item.clone(),
        };
        let better = match &best {
            None => true,
            Some((best, _)) => score.compare(best)? == wanted,
        };
        if better {
            best = Some((score, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => {
            Err(OpError::value_error(format!("{function}() arg is an empty sequence")).into())
        }
    }
}

fn min(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    extreme(interp, "min", args, Ordering::Less)
}

fn max(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    extreme(interp, "max", args, Ordering::Greater)
}

/// Without a start value the first item is the start, so quantities sum without a zero.
fn sum(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [iterable, start] = bind(args, "sum", &["iterable", "start"], 1)?;
    let mut items = iterable.unwrap_or(Value::None).iterate()?.into_iter();
    let mut total = match start {
        Some(start) => start,
        None => match items.next() {
            Some(first) => first,
            None => return Ok(Value::Int(0)),
        },
    };
    for item in items {
        total = binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn round_float(value: f64, ndigits: i64) -> f64 {
    let ndigits = ndigits.clamp(-308, 308) as i32;
    let factor = 10f64.powi(ndigits);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round_ties_even() / factor
}

fn round(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [number, ndigits] = bind(args, "round", &["number", "ndigits"], 1)?;
    let number = number.unwrap_or(Value::None);
    let ndigits = match ndigits {
        None | Some(Value::None) => None,
        Some(value) => Some(value.expect_int("ndigits")?),
    };
    Ok(match (number, ndigits) {
        (Value::Int(i), _) => Value::Int(i),
        (Value::Bool(b), _) => Value::Int(i64::from(b)),
        (Value::Float(f), None) => {
            let rounded = f.round_ties_even();
            if !rounded.is_finite() {
                return Err(OpError::new(
                    "OverflowError",
                    "cannot convert float infinity or NaN to integer",
                )
                .into());
            }
            Value::Int(rounded as i64)
        }
        (Value::Float(f), Some(n)) => Value::Float(round_float(f, n)),
        (Value::Quantity(q), n) => Value::Quantity(Rc::new(Quantity::new(
            round_float(q.magnitude, n.unwrap_or(0)),
            q.units.clone(),
        ))),
        (other, _) => {
            return Err(OpError::type_error(format!(
                "type {} doesn't define __round__ method",
                other.type_name()
            ))
            .into());
        }
    })
}

fn int(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [value] = bind(args, "int", &["x"], 0)?;
    Ok(match value {
        None => Value::Int(0),
        Some(Value::Int(i)) => Value::Int(i),
        Some(Value::Bool(b)) => Value::Int(i64::from(b)),
        Some(Value::Float(f)) => {
            if !f.is_finite() {
                return Err(OpError::value_error("cannot convert float NaN or infinity to integer").into());
            }
            Value::Int(f.trunc() as i64)
        }
        Some(Value::Str(s)) => {
            let cleaned = s.trim().replace('_', "");
            Value::Int(cleaned.parse().map_err(|_| {
                OpError::value_error(format!("invalid literal for int() with base 10: '{s}'"))
            })?)
        }
        Some(other) => {
            return Err(OpError::type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
            .into());
        }
    })
}

fn float(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [value] = bind(args, "float", &["x"], 0)?;
    Ok(match value {
        None => Value::Float(0.0),
        Some(Value::Str(s)) => {
            let text = s.trim().to_ascii_lowercase();
            let parsed = match text.trim_start_matches(['+', '-']) {
                "inf" | "infinity" | "nan" => text.parse::<f64>().ok(),
                _ => text.replace('_', "").parse::<f64>().ok(),
            };
            Value::Float(parsed.ok_or_else(|| {
                OpError::value_error(format!("could not convert string to float: '{s}'"))
            })?)
        }
        Some(Value::Quantity(q)) if q.units.is_dimensionless() => Value::Float(q.magnitude),
        Some(other) => Value::Float(other.expect_float("float() argument")?),
    })
}

fn str(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [value] = bind(args, "str", &["object"], 0)?;
    Ok(Value::from(value.map(|value| value.to_str()).unwrap_or_default()))
}

fn bool_(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [value] = bind(args, "bool", &["x"], 0)?;
    Ok(Value::Bool(value.is_some_and(|value| value.truthy())))
}

fn list(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    Ok(Value::list(optional_iterable("list", args)?))
}

fn tuple(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    Ok(Value::Tuple(optional_iterable("tuple", args)?.into()))
}

fn set(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let mut set = IndexSet::new();
    for item in optional_iterable("set", args)? {
        set.insert(item.to_key()?);
    }
    Ok(Value::Set(Rc::new(RefCell::new(set))))
}

fn pairs_into(entries: &mut IndexMap<Key, Value>, source: &Value) -> Result<(), Exc> {
    if let Value::Dict(dict) = source {
        for (key, value) in &dict.borrow().entries {
            entries.insert(key.clone(), value.clone());
        }
        return Ok(());
    }
    for pair in source.iterate()? {
        let [key, value]: [Value; 2] = pair.iterate()?.try_into().map_err(|_| {
            OpError::value_error("dictionary update sequence element has the wrong length")
        })?;
        entries.insert(key.to_key()?, value);
    }
    Ok(())
}

fn dict(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let mut entries = IndexMap::new();
    match &args.positional[..] {
        [] => {}
        [source] => pairs_into(&mut entries, source)?,
        _ => return Err(OpError::type_error("dict expected at most 1 argument").into()),
    }
    for (key, value) in args.keywords {
        entries.insert(Key::str(&key), value);
    }
    Ok(Value::dict(entries))
}

fn enumerate(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [iterable, start] = bind(args, "enumerate", &["iterable", "start"], 1)?;
    let start = match start {
        Some(start) => start.expect_int("start")?,
        None => 0,
    };
    let items = iterable.unwrap_or(Value::None).iterate()?;
    let mut out = Vec::with_capacity(items.len());
    for (index, item) in (start..).zip(items) {
        out.push(Value::Tuple(Rc::from([Value::Int(index), item])));
    }
    Ok(Value::list(out))
}

fn zip(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let columns = args
        .positional
        .iter()
        .map(Value::iterate)
        .collect::<Result<Vec<_>, _>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let out = (0..rows)
        .map(|row| Value::Tuple(columns.iter().map(|column| column[row].clone()).collect()))
        .collect();
    Ok(Value::list(out))
}

fn sorted(interp: &mut Interpreter, mut args: Args) -> Result<Value, Exc> {
    let key = args.keywords.shift_remove("key");
    let reverse = args
        .keywords
        .shift_remove("reverse")
        .is_some_and(|value| value.truthy());
    let items = one("sorted", args)?.iterate()?;
    Ok(Value::list(interp.sort_values(items, key.as_ref(), reverse)?))
}

fn reversed(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let mut items = one("reversed", args)?.iterate()?;
    items.reverse();
    Ok(Value::list(items))
}

fn is_instance_of(value: &Value, kind: &Value) -> Result<bool, OpError> {
    Ok(match kind {
        Value::Class(class) => match value {
            Value::Instance(instance) => instance.class.is_subclass_of(class),
            _ => false,
        },
        Value::Builtin(builtin) => match builtin.name {
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            "float" => matches!(value, Value::Float(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "str" => matches!(value, Value::Str(_)),
            "list" => matches!(value, Value::List(_)),
            "tuple" => matches!(value, Value::Tuple(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "set" => matches!(value, Value::Set(_)),
            "range" => matches!(value, Value::Range(_)),
            other => {
                return Err(OpError::type_error(format!(
                    "isinstance() arg 2 must be a type, not builtin '{other}'"
                )));
            }
        },
        Value::Tuple(kinds) => {
            for kind in kinds.iter() {
                if is_instance_of(value, kind)? {
                    return Ok(true);
                }
            }
            false
        }
        other => {
            return Err(OpError::type_error(format!(
                "isinstance() arg 2 must be a type, not '{}'",
                other.type_name()
            )));
        }
    })
}

fn isinstance(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (value, kind) = two("isinstance", args)?;
    Ok(Value::Bool(is_instance_of(&value, &kind)?))
}

fn repr(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    Ok(Value::from(one("repr", args)?.repr()))
}

fn format(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [value, spec] = bind(args, "format", &["value", "format_spec"], 1)?;
    let spec = match spec {
        Some(spec) => spec.expect_str("format_spec")?.to_string(),
        None => String::new(),
    };
    Ok(Value::from(format_value(&value.unwrap_or(Value::None), &spec)?))
}

fn any(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let items = one("any", args)?.iterate()?;
    Ok(Value::Bool(items.iter().any(Value::truthy)))
}

fn all(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let items = one("all", args)?.iterate()?;
    Ok(Value::Bool(items.iter().all(Value::truthy)))
}

fn map(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let mut positional = args.positional.into_iter();
    let Some(function) = positional.next() else {
        return Err(OpError::type_error("map() must have at least two arguments").into());
    };
    let columns = positional
        .map(|column| column.iterate())
        .collect::<Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err(OpError::type_error("map() must have at least two arguments").into());
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        let call = columns.iter().map(|column| column[row].clone()).collect();
        out.push(interp.call_value(&function, Args::new(call))?);
    }
    Ok(Value::list(out))
}

fn filter(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (function, iterable) = two("filter", args)?;
    let mut out = Vec::new();
    for item in iterable.iterate()? {
        let keep = match function {
            Value::None => item.truthy(),
            _ => interp
                .call_value(&function, Args::new(vec![item.clone()]))?
                .truthy(),
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn pow(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (base, exp) = two("pow", args)?;
    Ok(binary_op(BinOp::Pow, &base, &exp)?)
}

fn divmod(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (a, b) = two("divmod", args)?;
    let quotient = binary_op(BinOp::FloorDiv, &a, &b)?;
    let remainder = binary_op(BinOp::Mod, &a, &b)?;
    Ok(Value::Tuple(Rc::from([quotient, remainder])))
}

fn hasattr(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (value, name) = two("hasattr", args)?;
    let name = name.expect_str("attribute name")?;
    match interp.get_attr(&value, &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(Exc::Error { error, .. }) if error.kind == "AttributeError" => Ok(Value::Bool(false)),
        Err(err) => Err(err),
    }
}

fn getattr(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let mut positional = args.positional.into_iter();
    let (Some(value), Some(name)) = (positional.next(), positional.next()) else {
        return Err(OpError::type_error("getattr expected at least 2 arguments").into());
    };
    let default = positional.next();
    let name = name.expect_str("attribute name")?;
    match (interp.get_attr(&value, &name), default) {
        (Err(Exc::Error { error, .. }), Some(default)) if error.kind == "AttributeError" => {
            Ok(default)
        }
        (result, _) => result,
    }
}

fn setattr(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let Ok([owner, name, value]) = <[Value; 3]>::try_from(args.positional) else {
        return Err(OpError::type_error("setattr expected 3 arguments").into());
    };
    let name = name.expect_str("attribute name")?;
    interp.set_attr(&owner, &name, value)?;
    Ok(Value::None)
}

pub(super) fn hide(interp: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    interp.ctx.set_option(ContextOptions::SKIP_CONTENT, true);
    Ok(Value::None)
}

pub(super) fn show(interp: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    interp.ctx.set_option(ContextOptions::SKIP_CONTENT, false);
    Ok(Value::None)
}

fn float_is_integer(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (value, _) = receiver(args)?;
    Ok(Value::Bool(value.as_float().is_some_and(|f| f.fract() == 0.0)))
}

// str

fn str_method(name: &str) -> Option<(&'static str, BuiltinFn)> {
    Some(match name {
        "upper" => ("upper", str_upper),
        "lower" => ("lower", str_lower),
        "title" => ("title", str_title),
        "capitalize" => ("capitalize", str_capitalize),
        "strip" => ("strip", str_strip),
        "lstrip" => ("lstrip", str_lstrip),
        "rstrip" => ("rstrip", str_rstrip),
        "split" => ("split", str_split),
        "join" => ("join", str_join),
        "replace" => ("replace", str_replace),
        "startswith" => ("startswith", str_startswith),
        "endswith" => ("endswith", str_endswith),
        "find" => ("find", str_find),
        "count" => ("count", str_count),
        "format" => ("format", str_format),
        _ => return None,
    })
}

fn str_receiver(args: Args) -> Result<(std::rc::Rc<str>, Args), Exc> {
    let (receiver, args) = receiver(args)?;
    Ok((receiver.expect_str("str method receiver")?, args))
}

fn str_upper(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    Ok(Value::from(str_receiver(args)?.0.to_uppercase()))
}

fn str_lower(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    Ok(Value::from(str_receiver(args)?.0.to_lowercase()))
}

fn str_title(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, _) = str_receiver(args)?;
    let mut out = String::with_capacity(s.len());
    let mut start = true;
    for ch in s.chars() {
        if start {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }
        start = !ch.is_alphabetic();
    }
    Ok(Value::from(out))
}

fn str_capitalize(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, _) = str_receiver(args)?;
    let mut chars = s.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    Ok(Value::from(out))
}

fn strip_chars(args: Args) -> Result<(std::rc::Rc<str>, Option<Vec<char>>), Exc> {
    let (s, args) = str_receiver(args)?;
    let chars = match args.positional.first() {
        Some(Value::Str(chars)) => Some(chars.chars().collect()),
        _ => None,
    };
    Ok((s, chars))
}

fn str_strip(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, chars) = strip_chars(args)?;
    Ok(Value::from(match chars {
        Some(chars) => s.trim_matches(&chars[..]),
        None => s.trim(),
    }))
}

fn str_lstrip(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, chars) = strip_chars(args)?;
    Ok(Value::from(match chars {
        Some(chars) => s.trim_start_matches(&chars[..]),
        None => s.trim_start(),
    }))
}

fn str_rstrip(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, chars) = strip_chars(args)?;
    Ok(Value::from(match chars {
        Some(chars) => s.trim_end_matches(&chars[..]),
        None => s.trim_end(),
    }))
}

fn str_split(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, args) = str_receiver(args)?;
    let [sep, maxsplit] = bind(args, "split", &["sep", "maxsplit"], 0)?;
    let maxsplit = match maxsplit {
        Some(value) => value.expect_int("maxsplit")?,
        None => -1,
    };
    let limit = usize::try_from(maxsplit).map_or(usize::MAX, |n| n.saturating_add(1));
    let parts: Vec<Value> = match sep {
        Some(Value::Str(sep)) if sep.is_empty() => {
            return Err(OpError::value_error("empty separator").into());
        }
        Some(Value::Str(sep)) => s.splitn(limit, &*sep).map(Value::from).collect(),
        _ => {
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if parts.len() + 1 == limit {
                    parts.push(Value::from(rest));
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(Value::from(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            parts
        }
    };
    Ok(Value::list(parts))
}

fn str_join(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (sep, args) = str_receiver(args)?;
    let items = one("join", args)?.iterate()?;
    let mut parts = Vec::with_capacity(items.len());
    for item in &items {
        parts.push(item.expect_str("sequence item")?.to_string());
    }
    Ok(Value::from(parts.join(&sep)))
}

fn str_replace(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, args) = str_receiver(args)?;
    let (old, new) = two("replace", args)?;
    Ok(Value::from(
        s.replace(&*old.expect_str("old")?, &new.expect_str("new")?),
    ))
}

fn affixes(value: &Value) -> Result<Vec<std::rc::Rc<str>>, OpError> {
    match value {
        Value::Tuple(items) => items.iter().map(|item| item.expect_str("prefix")).collect(),
        other => Ok(vec![other.expect_str("prefix")?]),
    }
}

fn str_startswith(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, args) = str_receiver(args)?;
    let prefixes = affixes(&one("startswith", args)?)?;
    Ok(Value::Bool(prefixes.iter().any(|p| s.starts_with(&**p))))
}

fn str_endswith(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, args) = str_receiver(args)?;
    let suffixes = affixes(&one("endswith", args)?)?;
    Ok(Value::Bool(suffixes.iter().any(|p| s.ends_with(&**p))))
}

fn str_find(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, args) = str_receiver(args)?;
    let needle = one("find", args)?.expect_str("substring")?;
    Ok(Value::Int(match s.find(&*needle) {
        Some(byte) => s[..byte].chars().count() as i64,
        None => -1,
    }))
}

fn str_count(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (s, args) = str_receiver(args)?;
    let needle = one("count", args)?.expect_str("substring")?;
    let count = if needle.is_empty() {
        s.chars().count() + 1
    } else {
        s.matches(&*needle).count()
    };
    Ok(Value::Int(count as i64))
}

/// `str.format` with automatic, numbered and named fields.
fn str_format(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (template, args) = str_receiver(args)?;
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto = 0;
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                for ch in chars.by_ref() {
                    if ch == '}' {
                        break;
                    }
                    field.push(ch);
                }
                let (name, spec) = field.split_once(':').unwrap_or((&field, ""));
                let value = if name.is_empty() {
                    auto += 1;
                    args.positional.get(auto - 1)
                } else if let Ok(index) = name.parse::<usize>() {
                    args.positional.get(index)
                } else {
                    args.keywords.get(name)
                };
                let value = value.ok_or_else(|| {
                    OpError::new("IndexError", format!("replacement field '{name}' is missing"))
                })?;
                out.push_str(&format_value(value, spec)?);
            }
            ch => out.push(ch),
        }
    }
    Ok(Value::from(out))
}

// list

fn list_method(name: &str) -> Option<(&'static str, BuiltinFn)> {
    Some(match name {
        "append" => ("append", list_append),
        "extend" => ("extend", list_extend),
        "insert" => ("insert", list_insert),
        "pop" => ("pop", list_pop),
        "remove" => ("remove", list_remove),
        "index" => ("index", seq_index),
        "count" => ("count", seq_count),
        "sort" => ("sort", list_sort),
        "reverse" => ("reverse", list_reverse),
        "copy" => ("copy", list_copy),
        "clear" => ("clear", list_clear),
        _ => return None,
    })
}

type ListRef = Rc<RefCell<Vec<Value>>>;

fn list_receiver(args: Args) -> Result<(ListRef, Args), Exc> {
    match receiver(args)? {
        (Value::List(items), args) => Ok((items, args)),
        (other, _) => Err(OpError::attribute_error(other.type_name(), "list method").into()),
    }
}

fn list_append(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, args) = list_receiver(args)?;
    let value = one("append", args)?;
    items.borrow_mut().push(value);
    Ok(Value::None)
}

fn list_extend(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, args) = list_receiver(args)?;
    let extra = one("extend", args)?.iterate()?;
    items.borrow_mut().extend(extra);
    Ok(Value::None)
}

fn list_insert(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, args) = list_receiver(args)?;
    let (index, value) = two("insert", args)?;
    let index = index.expect_int("index")?;
    let mut items = items.borrow_mut();
    let len = items.len() as i64;
    let at = if index < 0 { (len + index).max(0) } else { index.min(len) };
    items.insert(at as usize, value);
    Ok(Value::None)
}

fn list_pop(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, args) = list_receiver(args)?;
    let mut items = items.borrow_mut();
    if items.is_empty() {
        return Err(OpError::new("IndexError", "pop from empty list").into());
    }
    let len = items.len() as i64;
    let index = match args.positional.first() {
        Some(index) => index.expect_int("index")?,
        None => -1,
    };
    let at = if index < 0 { len + index } else { index };
    if !(0..len).contains(&at) {
        return Err(OpError::new("IndexError", "pop index out of range").into());
    }
    Ok(items.remove(at as usize))
}

fn list_remove(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, args) = list_receiver(args)?;
    let value = one("remove", args)?;
    let mut items = items.borrow_mut();
    let Some(at) = items.iter().position(|item| item.equals(&value)) else {
        return Err(OpError::value_error("list.remove(x): x not in list").into());
    };
    items.remove(at);
    Ok(Value::None)
}

fn seq_index(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, args) = receiver(args)?;
    let value = one("index", args)?;
    let at = items.iterate()?.iter().position(|item| item.equals(&value));
    match at {
        Some(at) => Ok(Value::Int(at as i64)),
        None => Err(OpError::value_error(format!("{} is not in {}", value.repr(), items.type_name())).into()),
    }
}

fn seq_count(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, args) = receiver(args)?;
    let value = one("count", args)?;
    let count = items.iterate()?.iter().filter(|item| item.equals(&value)).count();
    Ok(Value::Int(count as i64))
}

fn list_sort(interp: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, mut args) = list_receiver(args)?;
    let key = args.keywords.shift_remove("key");
    let reverse = args
        .keywords
        .shift_remove("reverse")
        .is_some_and(|value| value.truthy());
    let current = items.borrow().clone();
    let sorted = interp.sort_values(current, key.as_ref(), reverse)?;
    *items.borrow_mut() = sorted;
    Ok(Value::None)
}

fn list_reverse(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, _) = list_receiver(args)?;
    items.borrow_mut().reverse();
    Ok(Value::None)
}

fn list_copy(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, _) = list_receiver(args)?;
    Ok(Value::list(items.borrow().clone()))
}

fn list_clear(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (items, _) = list_receiver(args)?;
    items.borrow_mut().clear();
    Ok(Value::None)
}

fn tuple_method(name: &str) -> Option<(&'static str, BuiltinFn)> {
    Some(match name {
        "index" => ("index", seq_index),
        "count" => ("count", seq_count),
        _ => return None,
    })
}

// dict

fn dict_method(name: &str) -> Option<(&'static str, BuiltinFn)> {
    Some(match name {
        "get" => ("get", dict_get),
        "keys" => ("keys", dict_keys),
        "values" => ("values", dict_values),
        "items" => ("items", dict_items),
        "update" => ("update", dict_update),
        "pop" => ("pop", dict_pop),
        "setdefault" => ("setdefault", dict_setdefault),
        "copy" => ("copy", dict_copy),
        "clear" => ("clear", dict_clear),
        _ => return None,
    })
}

type DictRef = Rc<RefCell<super::value::Dict>>;

fn dict_receiver(args: Args) -> Result<(DictRef, Args), Exc> {
    match receiver(args)? {
        (Value::Dict(dict), args) => Ok((dict, args)),
        (other, _) => Err(OpError::attribute_error(other.type_name(), "dict method").into()),
    }
}

fn dict_get(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (dict, args) = dict_receiver(args)?;
    let [key, default] = bind(args, "get", &["key", "default"], 1)?;
    let key = key.unwrap_or(Value::None).to_key()?;
    let found = dict.borrow().entries.get(&key).cloned();
    Ok(found.or(default).unwrap_or(Value::None))
}

fn dict_keys(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (dict, _) = dict_receiver(args)?;
    let keys = dict.borrow().entries.keys().map(Key::to_value).collect();
    Ok(Value::list(keys))
}

fn dict_values(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (dict, _) = dict_receiver(args)?;
    let values = dict.borrow().entries.values().cloned().collect();
    Ok(Value::list(values))
}

fn dict_items(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (dict, _) = dict_receiver(args)?;
    let items = dict
        .borrow()
        .entries
        .iter()
        .map(|(key, value)| Value::Tuple(Rc::from([key.to_value(), value.clone()])))
        .collect();
    Ok(Value::list(items))
}

fn dict_update(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (dict, args) = dict_receiver(args)?;
    let mut entries = IndexMap::new();
    if let Some(source) = args.positional.first() {
        pairs_into(&mut entries, source)?;
    }
    for (key, value) in args.keywords {
        entries.insert(Key::str(&key), value);
    }
    dict.borrow_mut().entries.extend(entries);
    Ok(Value::None)
}

fn dict_pop(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (dict, args) = dict_receiver(args)?;
    let [key, default] = bind(args, "pop", &["key", "default"], 1)?;
    let key = key.unwrap_or(Value::None);
    let removed = dict.borrow_mut().entries.shift_remove(&key.to_key()?);
    match (removed, default) {
        (Some(value), _) | (None, Some(value)) => Ok(value),
        (None, None) => Err(OpError::new("KeyError", key.repr()).into()),
    }
}

fn dict_setdefault(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (dict, args) = dict_receiver(args)?;
    let [key, default] = bind(args, "setdefault", &["key", "default"], 1)?;
    let key = key.unwrap_or(Value::None).to_key()?;
    let mut dict = dict.borrow_mut();
    Ok(dict
        .entries
        .entry(key)
        .or_insert_with(|| default.unwrap_or(Value::None))
        .clone())
}

fn dict_copy(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (dict, _) = dict_receiver(args)?;
    let dict = dict.borrow();
    let copy = if dict.attr_access {
        Value::dot_dict(dict.entries.clone())
    } else {
        Value::dict(dict.entries.clone())
    };
    Ok(copy)
}

fn dict_clear(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (dict, _) = dict_receiver(args)?;
    dict.borrow_mut().entries.clear();
    Ok(Value::None)
}

// set

fn set_method(name: &str) -> Option<(&'static str, BuiltinFn)> {
    Some(match name {
        "add" => ("add", set_add),
        "remove" => ("remove", set_remove),
        "discard" => ("discard", set_discard),
        "union" => ("union", set_union),
        "intersection" => ("intersection", set_intersection),
        "difference" => ("difference", set_difference),
        _ => return None,
    })
}

type SetRef = Rc<RefCell<IndexSet<Key>>>;

fn set_receiver(args: Args) -> Result<(SetRef, Value), Exc> {
    match receiver(args)? {
        (Value::Set(set), args) => Ok((set, one("set method", args)?)),
        (other, _) => Err(OpError::attribute_error(other.type_name(), "set method").into()),
    }
}

fn set_add(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (set, value) = set_receiver(args)?;
    set.borrow_mut().insert(value.to_key()?);
    Ok(Value::None)
}

fn set_remove(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (set, value) = set_receiver(args)?;
    if !set.borrow_mut().shift_remove(&value.to_key()?) {
        return Err(OpError::new("KeyError", value.repr()).into());
    }
    Ok(Value::None)
}

fn set_discard(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (set, value) = set_receiver(args)?;
    set.borrow_mut().shift_remove(&value.to_key()?);
    Ok(Value::None)
}

fn set_op(args: Args, op: BinOp) -> Result<Value, Exc> {
    let (set, other) = set_receiver(args)?;
    let mut keys = IndexSet::new();
    for item in other.iterate()? {
        keys.insert(item.to_key()?);
    }
    let other = Value::Set(Rc::new(RefCell::new(keys)));
    Ok(binary_op(op, &Value::Set(set), &other)?)
}

fn set_union(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    set_op(args, BinOp::BitOr)
}

fn set_intersection(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    set_op(args, BinOp::BitAnd)
}

fn set_difference(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    set_op(args, BinOp::Sub)
}

// units

fn unit_registry_attr(attr: &str) -> Result<Value, Exc> {
    Ok(match attr {
        "Quantity" => builtin("Quantity", make_quantity),
        "parse_units" => builtin("parse_units", parse_units),
        _ => {
            let resolved = registry().resolve(attr)?;
            Value::Unit(Rc::new(crate::units::UnitExpr::single(resolved.name)))
        }
    })
}

fn unit_arg(value: &Value) -> Result<crate::units::UnitExpr, Exc> {
    match value {
        Value::Unit(unit) => Ok((**unit).clone()),
        Value::Str(text) => Ok(registry().parse_units(text)?),
        Value::Quantity(q) if q.magnitude == 1.0 => Ok(q.units.clone()),
        other => Err(OpError::type_error(format!(
            "expected units, got '{}'",
            other.type_name()
        ))
        .into()),
    }
}

fn make_quantity(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [value, units] = bind(args, "Quantity", &["value", "units"], 1)?;
    let magnitude = value.unwrap_or(Value::None).expect_float("magnitude")?;
    let units = match units {
        Some(units) => unit_arg(&units)?,
        None => crate::units::UnitExpr::dimensionless(),
    };
    Ok(Value::Quantity(Rc::new(Quantity::new(magnitude, units))))
}

fn parse_units(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let text = one("parse_units", args)?.expect_str("units")?;
    Ok(Value::Unit(Rc::new(registry().parse_units(&text)?)))
}

fn quantity_receiver(args: Args) -> Result<(Rc<Quantity>, Args), Exc> {
    match receiver(args)? {
        (Value::Quantity(q), args) => Ok((q, args)),
        (other, _) => Err(OpError::attribute_error(other.type_name(), "to").into()),
    }
}

fn quantity_to(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (quantity, args) = quantity_receiver(args)?;
    let target = unit_arg(&one("to", args)?)?;
    Ok(Value::Quantity(Rc::new(quantity.to(&target)?)))
}

fn quantity_m_as(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (quantity, args) = quantity_receiver(args)?;
    let target = unit_arg(&one("m_as", args)?)?;
    Ok(Value::Float(quantity.to(&target)?.magnitude))
}

fn quantity_to_base_units(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (quantity, _) = quantity_receiver(args)?;
    Ok(Value::Quantity(Rc::new(quantity.to_base_units()?)))
}

// math

fn float_arg(function: &str, value: &Value) -> Result<f64, Exc> {
    match value {
        Value::Quantity(q) if q.units.is_dimensionless() => Ok(q.magnitude),
        other => Ok(other.expect_float(&format!("{function}() argument"))?),
    }
}

/// Applies `f`, reporting a NaN result from a finite input as a domain error.
fn checked_math(x: f64, f: fn(f64) -> f64) -> Result<Value, Exc> {
    let y = f(x);
    if y.is_nan() && !x.is_nan() {
        return Err(OpError::value_error("math domain error").into());
    }
    Ok(Value::Float(y))
}

macro_rules! float_functions {
    ($($name:ident => $f:expr),* $(,)?) => {
        $(
            fn $name(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
                let x = float_arg(stringify!($name), &one(stringify!($name), args)?)?;
                checked_math(x, $f)
            }
        )*
    };
}

float_functions! {
    math_exp => f64::exp,
    math_log10 => f64::log10,
    math_log2 => f64::log2,
    math_sin => f64::sin,
    math_cos => f64::cos,
    math_tan => f64::tan,
    math_asin => f64::asin,
    math_acos => f64::acos,
    math_atan => f64::atan,
    math_sinh => f64::sinh,
    math_cosh => f64::cosh,
    math_tanh => f64::tanh,
    math_degrees => f64::to_degrees,
    math_radians => f64::to_radians,
    math_fabs => f64::abs,
}

fn math_sqrt(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    match one("sqrt", args)? {
        Value::Quantity(q) if !q.units.is_dimensionless() => {
            if q.magnitude < 0.0 {
                return Err(OpError::value_error("math domain error").into());
            }
            Ok(Value::from(q.powf(0.5)))
        }
        value => checked_math(float_arg("sqrt", &value)?, f64::sqrt),
    }
}

fn math_log(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let [x, base] = bind(args, "log", &["x", "base"], 1)?;
    let x = float_arg("log", &x.unwrap_or(Value::None))?;
    if x <= 0.0 {
        return Err(OpError::value_error("math domain error").into());
    }
    match base {
        Some(base) => {
            let base = float_arg("log", &base)?;
            if base <= 0.0 || base == 1.0 {
                return Err(OpError::value_error("math domain error").into());
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
        None => Ok(Value::Float(x.ln())),
    }
}

fn to_int(function: &str, value: f64) -> Result<Value, Exc> {
    if !value.is_finite() {
        return Err(OpError::value_error(format!(
            "cannot convert float NaN or infinity to integer in {function}()"
        ))
        .into());
    }
    Ok(Value::Int(value as i64))
}

fn math_floor(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    match one("floor", args)? {
        Value::Int(i) => Ok(Value::Int(i)),
        value => to_int("floor", float_arg("floor", &value)?.floor()),
    }
}

fn math_ceil(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    match one("ceil", args)? {
        Value::Int(i) => Ok(Value::Int(i)),
        value => to_int("ceil", float_arg("ceil", &value)?.ceil()),
    }
}

fn math_trunc(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    match one("trunc", args)? {
        Value::Int(i) => Ok(Value::Int(i)),
        value => to_int("trunc", float_arg("trunc", &value)?.trunc()),
    }
}

fn math_atan2(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (y, x) = two("atan2", args)?;
    Ok(Value::Float(float_arg("atan2", &y)?.atan2(float_arg("atan2", &x)?)))
}

fn math_hypot(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let mut total = 0.0f64;
    for value in &args.positional {
        let x = float_arg("hypot", value)?;
        total += x * x;
    }
    Ok(Value::Float(total.sqrt()))
}

fn math_pow(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let (x, y) = two("pow", args)?;
    checked_math2(float_arg("pow", &x)?, float_arg("pow", &y)?)
}

fn checked_math2(x: f64, y: f64) -> Result<Value, Exc> {
    let z = x.powf(y);
    if z.is_nan() && !x.is_nan() && !y.is_nan() {
        return Err(OpError::value_error("math domain error").into());
    }
    Ok(Value::Float(z))
}

fn math_isclose(_: &mut Interpreter, mut args: Args) -> Result<Value, Exc> {
    let rel_tol = match args.keywords.shift_remove("rel_tol") {
        Some(value) => float_arg("isclose", &value)?,
        None => 1e-9,
    };
    let abs_tol = match args.keywords.shift_remove("abs_tol") {
        Some(value) => float_arg("isclose", &value)?,
        None => 0.0,
    };
    let (a, b) = two("isclose", args)?;
    let (a, b) = (float_arg("isclose", &a)?, float_arg("isclose", &b)?);
    let close = a == b || (a - b).abs() <= (rel_tol * a.abs().max(b.abs())).max(abs_tol);
    Ok(Value::Bool(close))
}

fn math_isnan(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    Ok(Value::Bool(float_arg("isnan", &one("isnan", args)?)?.is_nan()))
}

fn math_isinf(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    Ok(Value::Bool(float_arg("isinf", &one("isinf", args)?)?.is_infinite()))
}

fn math_factorial(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let n = one("factorial", args)?.expect_int("factorial() argument")?;
    if n < 0 {
        return Err(OpError::value_error("factorial() not defined for negative values").into());
    }
    let mut total: i64 = 1;
    for i in 2..=n {
        total = total.checked_mul(i).ok_or_else(OpError::overflow)?;
    }
    Ok(Value::Int(total))
}

fn math_gcd(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    let mut result: i64 = 0;
    for value in &args.positional {
        let mut a = result.abs();
        let mut b = value.expect_int("gcd() argument")?.abs();
        while b != 0 {
            (a, b) = (b, a % b);
        }
        result = a;
    }
    Ok(Value::Int(result))
}

fn math_module() -> Module {
    let mut attrs = IndexMap::new();
    attrs.insert("pi", Value::Float(std::f64::consts::PI));
    attrs.insert("e", Value::Float(std::f64::consts::E));
    attrs.insert("tau", Value::Float(std::f64::consts::TAU));
    attrs.insert("inf", Value::Float(f64::INFINITY));
    attrs.insert("nan", Value::Float(f64::NAN));
    let functions: &[(&'static str, BuiltinFn)] = &[
        ("sqrt", math_sqrt),
        ("exp", math_exp),
        ("log", math_log),
        ("log10", math_log10),
        ("log2", math_log2),
        ("sin", math_sin),
        ("cos", math_cos),
        ("tan", math_tan),
        ("asin", math_asin),
        ("acos", math_acos),
        ("atan", math_atan),
        ("atan2", math_atan2),
        ("sinh", math_sinh),
        ("cosh", math_cosh),
        ("tanh", math_tanh),
        ("degrees", math_degrees),
        ("radians", math_radians),
        ("fabs", math_fabs),
        ("floor", math_floor),
        ("ceil", math_ceil),
        ("trunc", math_trunc),
        ("hypot", math_hypot),
        ("pow", math_pow),
        ("isclose", math_isclose),
        ("isnan", math_isnan),
        ("isinf", math_isinf),
        ("factorial", math_factorial),
        ("gcd", math_gcd),
    ];
    for (name, func) in functions {
        attrs.insert(name, builtin(name, *func));
    }
    Module {
        name: "math",
        attrs,
    }
}

fn asyncio_run(_: &mut Interpreter, args: Args) -> Result<Value, Exc> {
    one("run", args)
}

fn asyncio_sleep(_: &mut Interpreter, _: Args) -> Result<Value, Exc> {
    Ok(Value::None)
}

/// Coroutines complete when called, so `asyncio.run` only passes the result through.
fn asyncio_module() -> Module {
    let mut attrs = IndexMap::new();
    attrs.insert("run", builtin("run", asyncio_run));
    attrs.insert("sleep", builtin("sleep", asyncio_sleep));
    Module {
        name: "asyncio",
        attrs,
    }
}
