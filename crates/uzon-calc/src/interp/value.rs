//! Runtime values of calculation scripts.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt::{self, Write};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use math_ir::float_repr;
use serde_json::Value as Json;

use super::Interpreter;
use super::error::{Exc, OpError};
use crate::interaction::Field;
use crate::syntax::ast::{FunctionDef, Lambda, Params};
use crate::units::{Quantity, UnitExpr};

/// A mutable name-to-value table: module globals, a call frame, a class body.
pub type Namespace = Rc<RefCell<IndexMap<String, Value>>>;

/// A snapshot of the local bindings of a frame.
pub type Locals = IndexMap<String, Value>;

pub type BuiltinFn = fn(&mut Interpreter, Args) -> Result<Value, Exc>;

pub fn namespace() -> Namespace {
    Rc::new(RefCell::new(IndexMap::new()))
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<IndexSet<Key>>>),
    Range(Range),
    Slice(Slice),
    Function(Rc<Function>),
    Builtin(Builtin),
    Method(Rc<Method>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Module(Rc<Module>),
    UnitRegistry,
    Unit(Rc<UnitExpr>),
    Quantity(Rc<Quantity>),
    Field(Rc<RefCell<Field>>),
    /// `@uzon_calc(name=...)` before it is applied to a function.
    EntryDecorator(Option<Rc<str>>),
    Entry(Rc<Entry>),
    /// The `ctx` handle passed to entry functions.
    Context,
}

/// A dict; `attr_access` makes `d.key` read `d["key"]`.
#[derive(Default)]
pub struct Dict {
    pub entries: IndexMap<Key, Value>,
    pub attr_access: bool,
}

impl Dict {
    pub fn new(entries: IndexMap<Key, Value>) -> Self {
        Dict {
            entries,
            attr_access: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let len = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        len as usize
    }

    #[inline]
    pub fn get(&self, index: usize) -> i64 {
        self.start + self.step * index as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

impl Slice {
    /// The selected indices of a sequence of length `len`.
    pub fn indices(&self, len: usize) -> Result<Vec<usize>, OpError> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(OpError::value_error("slice step cannot be zero"));
        }
        let len = len as i64;
        let clamp = |value: i64, low: i64, high: i64| {
            let value = if value < 0 { value + len } else { value };
            value.clamp(low, high)
        };
        let mut out = Vec::new();
        if step > 0 {
            let start = self.lower.map_or(0, |v| clamp(v, 0, len));
            let stop = self.upper.map_or(len, |v| clamp(v, 0, len));
            let mut i = start;
            while i < stop {
                out.push(i as usize);
                i += step;
            }
        } else {
            let start = self.lower.map_or(len - 1, |v| clamp(v, -1, len - 1));
            let stop = self.upper.map_or(-1, |v| clamp(v, -1, len - 1));
            let mut i = start;
            while i > stop {
                out.push(i as usize);
                i += step;
            }
        }
        Ok(out)
    }
}

pub enum FunctionBody {
    Def(Arc<FunctionDef>),
    Lambda(Arc<Lambda>),
}

/// Variables of an enclosing function, visible to closures defined inside it.
pub struct Env {
    pub vars: Namespace,
    pub parent: Option<Rc<Env>>,
}

pub struct Function {
    pub name: String,
    pub body: FunctionBody,
    /// Evaluated defaults, aligned with `params.args` and `params.kwonly`.
    pub defaults: Vec<Option<Value>>,
    pub kw_defaults: Vec<Option<Value>>,
    pub globals: Namespace,
    pub closure: Option<Rc<Env>>,
    pub instrumented: bool,
}

impl Function {
    pub fn params(&self) -> &Params {
        match &self.body {
            FunctionBody::Def(def) => &def.params,
            FunctionBody::Lambda(lambda) => &lambda.params,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(&self.body, FunctionBody::Def(def) if def.is_async)
    }
}

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

pub enum Callee {
    Native(Builtin),
    Function(Rc<Function>),
}

/// A callable bound to its receiver, which is passed as the first argument.
pub struct Method {
    pub receiver: Value,
    pub callee: Callee,
}

pub struct Class {
    pub name: String,
    pub bases: Vec<Rc<Class>>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl Class {
    /// Depth-first, left-to-right lookup through the bases.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attrs.borrow().get(name) {
            return Some(value.clone());
        }
        self.bases.iter().find_map(|base| base.lookup(name))
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        Rc::ptr_eq(self, other) || self.bases.iter().any(|base| base.is_subclass_of(other))
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || self.bases.iter().any(|base| base.is_named(name))
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl Instance {
    pub fn is_exception(&self) -> bool {
        self.class.is_named("BaseException")
    }

    /// `str()` of an exception instance: its single argument, or the argument tuple.
    pub fn exception_message(&self) -> String {
        match self.attrs.borrow().get("args") {
            Some(Value::Tuple(args)) => match &args[..] {
                [] => String::new(),
                [arg] => arg.to_str(),
                _ => Value::Tuple(args.clone()).repr(),
            },
            Some(other) => other.to_str(),
            None => String::new(),
        }
    }
}

pub struct Module {
    pub name: &'static str,
    pub attrs: IndexMap<&'static str, Value>,
}

/// The entry function of a script.
pub struct Entry {
    pub function: Rc<Function>,
    pub def: Arc<FunctionDef>,
    pub name: Option<Rc<str>>,
}

impl Entry {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.function.name)
    }
}

/// Positional and keyword arguments of a call.
#[derive(Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: IndexMap<String, Value>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Args {
            positional,
            keywords: IndexMap::new(),
        }
    }

    /// Matches the arguments against `names`, positionally first.
    ///
    /// The result has one slot per name; missing arguments are `None`.
    pub fn bind(self, function: &str, names: &[&str]) -> Result<Vec<Option<Value>>, OpError> {
        if self.positional.len() > names.len() {
            return Err(OpError::type_error(format!(
                "{function}() takes at most {} arguments ({} given)",
                names.len(),
                self.positional.len()
            )));
        }
        let mut slots: Vec<Option<Value>> = vec![None; names.len()];
        for (slot, value) in slots.iter_mut().zip(self.positional) {
            *slot = Some(value);
        }
        for (key, value) in self.keywords {
            let Some(index) = names.iter().position(|name| *name == key) else {
                return Err(OpError::type_error(format!(
                    "{function}() got an unexpected keyword argument '{key}'"
                )));
            };
            if slots[index].is_some() {
                return Err(OpError::type_error(format!(
                    "{function}() got multiple values for argument '{key}'"
                )));
            }
            slots[index] = Some(value);
        }
        Ok(slots)
    }

    /// Like [`Args::bind`], but the first `required` names must be present.
    pub fn bind_required(
        self,
        function: &str,
        names: &[&str],
        required: usize,
    ) -> Result<Vec<Option<Value>>, OpError> {
        let slots = self.bind(function, names)?;
        if let Some(missing) = slots[..required].iter().position(Option::is_none) {
            return Err(OpError::type_error(format!(
                "{function}() missing required argument '{}'",
                names[missing]
            )));
        }
        Ok(slots)
    }
}

/// A hashable projection of a value, used for dict keys and set members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Rc<[Key]>),
}

impl Key {
    pub fn to_value(&self) -> Value {
        match self {
            Key::None => Value::None,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Tuple(items) => Value::Tuple(items.iter().map(Key::to_value).collect()),
        }
    }

    pub fn str(s: &str) -> Key {
        Key::Str(Rc::from(s))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<Quantity> for Value {
    /// Quantities without units collapse to plain numbers.
    fn from(q: Quantity) -> Self {
        if q.units.is_dimensionless() {
            Value::Float(q.magnitude)
        } else {
            Value::Quantity(Rc::new(q))
        }
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(entries: IndexMap<Key, Value>) -> Value {
        Value::Dict(Rc::new(RefCell::new(Dict::new(entries))))
    }

    /// A dict whose keys can also be read as attributes.
    pub fn dot_dict(entries: IndexMap<Key, Value>) -> Value {
        Value::Dict(Rc::new(RefCell::new(Dict {
            entries,
            attr_access: true,
        })))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(_) => "range",
            Value::Slice(_) => "slice",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::Class(_) => "type",
            Value::Instance(instance) => &instance.class.name,
            Value::Module(_) => "module",
            Value::UnitRegistry => "UnitRegistry",
            Value::Unit(_) => "Unit",
            Value::Quantity(_) => "Quantity",
            Value::Field(_) => "Field",
            Value::EntryDecorator(_) => "uzon_calc",
            Value::Entry(_) => "function",
            Value::Context => "Context",
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Lists and tuples, which render as arrays.
    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Value::List(_) | Value::Tuple(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().entries.is_empty(),
            Value::Set(set) => !set.borrow().is_empty(),
            Value::Range(range) => range.len() > 0,
            Value::Quantity(q) => q.magnitude != 0.0,
            _ => true,
        }
    }

    /// Integers, including `bool`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn expect_int(&self, what: &str) -> Result<i64, OpError> {
        self.as_int().ok_or_else(|| {
            OpError::type_error(format!(
                "{what} must be an integer, not '{}'",
                self.type_name()
            ))
        })
    }

    pub fn expect_float(&self, what: &str) -> Result<f64, OpError> {
        self.as_float().ok_or_else(|| {
            OpError::type_error(format!(
                "{what} must be a real number, not '{}'",
                self.type_name()
            ))
        })
    }

    pub fn expect_str(&self, what: &str) -> Result<Rc<str>, OpError> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            _ => Err(OpError::type_error(format!(
                "{what} must be a string, not '{}'",
                self.type_name()
            ))),
        }
    }

    pub fn to_key(&self) -> Result<Key, OpError> {
        Ok(match self {
            Value::None => Key::None,
            Value::Bool(b) => Key::Bool(*b),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Key::Int(*f as i64),
            Value::Float(f) => Key::Float(f.to_bits()),
            Value::Str(s) => Key::Str(s.clone()),
            Value::Tuple(items) => Key::Tuple(
                items
                    .iter()
                    .map(Value::to_key)
                    .collect::<Result<Rc<[Key]>, _>>()?,
            ),
            other => {
                return Err(OpError::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )));
            }
        })
    }

    pub fn len(&self) -> Result<usize, OpError> {
        Ok(match self {
            Value::Str(s) => s.chars().count(),
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            Value::Dict(dict) => dict.borrow().entries.len(),
            Value::Set(set) => set.borrow().len(),
            Value::Range(range) => range.len(),
            other => {
                return Err(OpError::type_error(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                )));
            }
        })
    }

    /// Materializes the items of an iterable.
    pub fn iterate(&self) -> Result<Vec<Value>, OpError> {
        Ok(match self {
            Value::Str(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            Value::Dict(dict) => dict.borrow().entries.keys().map(Key::to_value).collect(),
            Value::Set(set) => set.borrow().iter().map(Key::to_value).collect(),
            Value::Range(range) => {
                const LIMIT: usize = 10_000_000;
                if range.len() > LIMIT {
                    return Err(OpError::new("MemoryError", "range is too large to materialize"));
                }
                (0..range.len()).map(|i| Value::Int(range.get(i))).collect()
            }
            other => {
                return Err(OpError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )));
            }
        })
    }

    pub fn get_item(&self, index: &Value) -> Result<Value, OpError> {
        match (self, index) {
            (Value::List(items), Value::Slice(slice)) => {
                let items = items.borrow();
                let picked = slice.indices(items.len())?;
                Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            (Value::Tuple(items), Value::Slice(slice)) => {
                let picked = slice.indices(items.len())?;
                Ok(Value::Tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            (Value::Str(s), Value::Slice(slice)) => {
                let chars: Vec<char> = s.chars().collect();
                let picked = slice.indices(chars.len())?;
                Ok(Value::from(picked.into_iter().map(|i| chars[i]).collect::<String>()))
            }
            (Value::List(_), Value::Tuple(indices)) => index_nested(self, indices),
            (Value::List(items), _) => {
                let items = items.borrow();
                let i = sequence_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            (Value::Tuple(items), _) => {
                let i = sequence_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            (Value::Str(s), _) => {
                let len = s.chars().count();
                let i = sequence_index(index, len, "string")?;
                Ok(Value::from(s.chars().nth(i).map(String::from).unwrap_or_default()))
            }
            (Value::Range(range), _) => {
                let i = sequence_index(index, range.len(), "range object")?;
                Ok(Value::Int(range.get(i)))
            }
            (Value::Dict(dict), _) => {
                let key = index.to_key()?;
                dict.borrow()
                    .entries
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| OpError::new("KeyError", index.repr()))
            }
            _ => Err(OpError::type_error(format!(
                "'{}' object is not subscriptable",
                self.type_name()
            ))),
        }
    }

    pub fn set_item(&self, index: &Value, value: Value) -> Result<(), OpError> {
        match self {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = sequence_index(index, items.len(), "list")?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(dict) => {
                let key = index.to_key()?;
                dict.borrow_mut().entries.insert(key, value);
                Ok(())
            }
            _ => Err(OpError::type_error(format!(
                "'{}' object does not support item assignment",
                self.type_name()
            ))),
        }
    }

    pub fn del_item(&self, index: &Value) -> Result<(), OpError> {
        match self {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = sequence_index(index, items.len(), "list")?;
                items.remove(i);
                Ok(())
            }
            Value::Dict(dict) => {
                let key = index.to_key()?;
                dict.borrow_mut()
                    .entries
                    .shift_remove(&key)
                    .map(|_| ())
                    .ok_or_else(|| OpError::new("KeyError", index.repr()))
            }
            _ => Err(OpError::type_error(format!(
                "'{}' object does not support item deletion",
                self.type_name()
            ))),
        }
    }

    /// Equality as `==` sees it.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (
                Value::Int(_) | Value::Float(_) | Value::Bool(_),
                Value::Int(_) | Value::Float(_) | Value::Bool(_),
            ) => self.as_float() == other.as_float(),
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_equals(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_equals(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.entries.len() == b.entries.len()
                    && a.entries.iter().all(|(key, value)| {
                        b.entries.get(key).is_some_and(|other| value.equals(other))
                    })
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|key| b.contains(key))
            }
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Slice(a), Value::Slice(b)) => a == b,
            (Value::Unit(a), Value::Unit(b)) => a == b,
            (Value::Quantity(a), Value::Quantity(b)) => {
                matches!(a.compare(b), Ok(Some(Ordering::Equal)))
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::Field(a), Value::Field(b)) => Rc::ptr_eq(a, b),
            (Value::Entry(a), Value::Entry(b)) => Rc::ptr_eq(a, b),
            (Value::UnitRegistry, Value::UnitRegistry) | (Value::Context, Value::Context) => true,
            _ => false,
        }
    }

    /// Identity as `is` sees it.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            _ => self.equals(other) && !matches!(self, Value::Float(_) | Value::Quantity(_)),
        }
    }

    /// Ordering as `<` sees it.
    pub fn compare(&self, other: &Value) -> Result<Ordering, OpError> {
        let unordered = || {
            OpError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))
        };
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (
                Value::Int(_) | Value::Float(_) | Value::Bool(_),
                Value::Int(_) | Value::Float(_) | Value::Bool(_),
            ) => {
                let (a, b) = (self.as_float(), other.as_float());
                a.partial_cmp(&b).ok_or_else(unordered)
            }
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => seq_compare(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => seq_compare(a, b),
            (Value::Quantity(a), Value::Quantity(b)) => a
                .compare(b)
                .map_err(OpError::from)?
                .ok_or_else(unordered),
            (Value::Quantity(q), _) if other.as_float().is_some() => {
                let other = Quantity::new(other.as_float().unwrap_or_default(), UnitExpr::dimensionless());
                q.compare(&other).map_err(OpError::from)?.ok_or_else(unordered)
            }
            (_, Value::Quantity(q)) if self.as_float().is_some() => {
                let this = Quantity::new(self.as_float().unwrap_or_default(), UnitExpr::dimensionless());
                this.compare(q).map_err(OpError::from)?.ok_or_else(unordered)
            }
            _ => Err(unordered()),
        }
    }

    /// `str(value)`
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Instance(instance) if instance.is_exception() => instance.exception_message(),
            _ => self.repr(),
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out);
        out
    }

    fn write_repr(&self, out: &mut String) {
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Str(s) => write_str_repr(out, s),
            Value::List(items) => {
                out.push('[');
                write_items(out, &items.borrow());
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                write_items(out, items);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(dict) => {
                out.push('{');
                for (i, (key, value)) in dict.borrow().entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.to_value().write_repr(out);
                    out.push_str(": ");
                    value.write_repr(out);
                }
                out.push('}');
            }
            Value::Set(set) => {
                let set = set.borrow();
                if set.is_empty() {
                    out.push_str("set()");
                    return;
                }
                out.push('{');
                let items: Vec<Value> = set.iter().map(Key::to_value).collect();
                write_items(out, &items);
                out.push('}');
            }
            Value::Range(range) => {
                let _ = write!(out, "range({}, {}", range.start, range.stop);
                if range.step != 1 {
                    let _ = write!(out, ", {}", range.step);
                }
                out.push(')');
            }
            Value::Slice(slice) => {
                let part = |v: Option<i64>| v.map_or("None".to_string(), |v| v.to_string());
                let _ = write!(
                    out,
                    "slice({}, {}, {})",
                    part(slice.lower),
                    part(slice.upper),
                    part(slice.step)
                );
            }
            Value::Function(function) => {
                let _ = write!(out, "<function {}>", function.name);
            }
            Value::Builtin(builtin) => {
                let _ = write!(out, "<built-in function {}>", builtin.name);
            }
            Value::Method(method) => {
                let name = match &method.callee {
                    Callee::Native(builtin) => builtin.name,
                    Callee::Function(function) => &function.name,
                };
                let _ = write!(out, "<bound method {name}>");
            }
            Value::Class(class) => {
                let _ = write!(out, "<class '{}'>", class.name);
            }
            Value::Instance(instance) => {
                if instance.is_exception() {
                    let _ = write!(out, "{}(", instance.class.name);
                    if let Some(Value::Tuple(args)) = instance.attrs.borrow().get("args") {
                        write_items(out, args);
                    }
                    out.push(')');
                } else {
                    let _ = write!(out, "<{} object>", instance.class.name);
                }
            }
            Value::Module(module) => {
                let _ = write!(out, "<module '{}'>", module.name);
            }
            Value::UnitRegistry => out.push_str("<UnitRegistry>"),
            Value::Unit(units) => {
                let _ = write!(out, "{units}");
            }
            Value::Quantity(q) => {
                let _ = write!(out, "{q}");
            }
            Value::Field(field) => {
                let field = field.borrow();
                let _ = write!(out, "Field(name='{}', type='{}')", field.name, field.kind);
            }
            Value::EntryDecorator(_) => out.push_str("<uzon_calc decorator>"),
            Value::Entry(entry) => {
                let _ = write!(out, "<entry {}>", entry.display_name());
            }
            Value::Context => out.push_str("<Context>"),
        }
    }

    /// Converts to JSON for the UI payload, the vars map and the JSON cache.
    pub fn to_json(&self) -> Result<Json, OpError> {
        Ok(match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.to_string()),
            Value::List(items) => Json::Array(
                items
                    .borrow()
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Tuple(items) => {
                Json::Array(items.iter().map(Value::to_json).collect::<Result<_, _>>()?)
            }
            Value::Dict(dict) => {
                let mut map = serde_json::Map::new();
                for (key, value) in &dict.borrow().entries {
                    map.insert(key.to_value().to_str(), value.to_json()?);
                }
                Json::Object(map)
            }
            Value::Quantity(q) => Json::String(q.to_string()),
            Value::Unit(units) => Json::String(units.to_string()),
            other => {
                return Err(OpError::type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                )));
            }
        })
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::from(s.as_str()),
            Json::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::dict(
                map.iter()
                    .map(|(key, value)| (Key::str(key), Value::from_json(value)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str())
    }
}

fn seq_equals(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

fn seq_compare(a: &[Value], b: &[Value]) -> Result<Ordering, OpError> {
    for (x, y) in a.iter().zip(b) {
        if !x.equals(y) {
            return x.compare(y);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// `arr[i, j]` on nested lists, with array semantics: a slice keeps every picked row
/// and applies the remaining indices to each of them.
fn index_nested(value: &Value, indices: &[Value]) -> Result<Value, OpError> {
    let Some((first, rest)) = indices.split_first() else {
        return Ok(value.clone());
    };
    let picked = value.get_item(first)?;
    if !matches!(first, Value::Slice(_)) {
        return index_nested(&picked, rest);
    }
    match picked {
        Value::List(rows) => {
            let rows = rows.borrow();
            let out = rows
                .iter()
                .map(|row| index_nested(row, rest))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::list(out))
        }
        Value::Tuple(rows) => Ok(Value::Tuple(
            rows.iter()
                .map(|row| index_nested(row, rest))
                .collect::<Result<_, _>>()?,
        )),
        other => index_nested(&other, rest),
    }
}

fn sequence_index(index: &Value, len: usize, what: &str) -> Result<usize, OpError> {
    let Some(i) = index.as_int() else {
        return Err(OpError::type_error(format!(
            "{what} indices must be integers, not '{}'",
            index.type_name()
        )));
    };
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(OpError::new("IndexError", format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

fn write_items(out: &mut String, items: &[Value]) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out);
    }
}

fn write_str_repr(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_and_str() {
        let list = Value::list(vec![
            Value::Int(1),
            Value::Float(2.5),
            Value::from("a'b"),
            Value::None,
        ]);
        assert_eq!(list.repr(), r#"[1, 2.5, "a'b", None]"#);
        assert_eq!(Value::Tuple(Rc::from([Value::Int(1)])).repr(), "(1,)");
        assert_eq!(Value::from("x").to_str(), "x");
        assert_eq!(Value::from("x").repr(), "'x'");
        assert_eq!(Value::Float(3.0).repr(), "3.0");
        assert_eq!(
            Value::Set(Rc::new(RefCell::new(IndexSet::new()))).repr(),
            "set()"
        );
    }

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::from("1").equals(&Value::Int(1)));
        assert_eq!(Value::Float(2.0).to_key().unwrap(), Key::Int(2));
    }

    #[test]
    fn indexing() {
        let list = Value::list(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        assert_eq!(list.get_item(&Value::Int(-1)).unwrap().repr(), "30");
        let err = list.get_item(&Value::Int(3)).unwrap_err();
        assert_eq!(err.kind, "IndexError");
        let slice = Slice {
            lower: Some(1),
            upper: None,
            step: None,
        };
        assert_eq!(list.get_item(&Value::Slice(slice)).unwrap().repr(), "[20, 30]");
        let reversed = Slice {
            lower: None,
            upper: None,
            step: Some(-1),
        };
        assert_eq!(
            list.get_item(&Value::Slice(reversed)).unwrap().repr(),
            "[30, 20, 10]"
        );
    }

    #[test]
    fn nested_lists_index_like_arrays() {
        let row = |a, b, c| Value::list(vec![Value::Int(a), Value::Int(b), Value::Int(c)]);
        let arr = Value::list(vec![row(1, 2, 3), row(4, 5, 6)]);
        let pair = Value::Tuple(vec![Value::Int(0), Value::Int(1)].into());
        assert_eq!(arr.get_item(&pair).unwrap().repr(), "2");
        let all = Slice {
            lower: None,
            upper: None,
            step: None,
        };
        let column = Value::Tuple(vec![Value::Slice(all), Value::Int(1)].into());
        assert_eq!(arr.get_item(&column).unwrap().repr(), "[2, 5]");
    }

    #[test]
    fn range_length() {
        let range = |start, stop, step| Range { start, stop, step }.len();
        assert_eq!(range(0, 5, 1), 5);
        assert_eq!(range(0, 5, 2), 3);
        assert_eq!(range(5, 0, -1), 5);
        assert_eq!(range(5, 0, 1), 0);
    }

    #[test]
    fn bind_arguments() {
        let mut args = Args::new(vec![Value::from("Beam")]);
        args.keywords.insert("caption".into(), Value::from("c"));
        let slots = args
            .bind_required("UI", &["title", "fields", "caption"], 1)
            .unwrap();
        assert!(slots[1].is_none());
        assert_eq!(slots[2].as_ref().unwrap().to_str(), "c");
        let err = Args::new(vec![])
            .bind_required("UI", &["title"], 1)
            .unwrap_err();
        assert_eq!(err.message, "UI() missing required argument 'title'");
    }

    #[test]
    fn json_conversion() {
        let json = serde_json::json!({"a": [1, 2.5, "x", null, true]});
        let value = Value::from_json(&json);
        assert_eq!(value.repr(), "{'a': [1, 2.5, 'x', None, True]}");
        assert_eq!(value.to_json().unwrap(), json);
    }
}
