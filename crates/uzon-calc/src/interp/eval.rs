use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::error::{Exc, OpError};
use super::format::format_value;
use super::ops::{binary_op, contains, unary_op};
use super::value::{Args, Callee, Class, Function, FunctionBody, Instance, Key, Slice, Value};
use super::{Flow, Frame, Interpreter, MAX_DEPTH, Scope, api};
use crate::syntax::ast::{
    BinOp, BoolOp, CmpOp, Comprehension, Constant, Expr, ExprKind, FunctionDef, Keyword, Params,
};

type Visit<'a> = dyn FnMut(&mut Interpreter, &Frame) -> Result<(), Exc> + 'a;

impl Interpreter {
    pub(crate) fn eval(&mut self, expr: &Expr, frame: &Frame) -> Result<Value, Exc> {
        match &expr.kind {
            ExprKind::BoolOp { op, values } => {
                let mut last = Value::None;
                for value in values {
                    last = self.eval(value, frame)?;
                    let done = match op {
                        BoolOp::And => !last.truthy(),
                        BoolOp::Or => last.truthy(),
                    };
                    if done {
                        break;
                    }
                }
                Ok(last)
            }
            ExprKind::NamedExpr { target, value } => {
                let value = self.eval(value, frame)?;
                self.assign(target, value.clone(), frame)?;
                Ok(value)
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left, frame)?;
                let right = self.eval(right, frame)?;
                Ok(binary_op(*op, &left, &right)?)
            }
            ExprKind::UnaryOp { op, operand } => {
                let operand = self.eval(operand, frame)?;
                Ok(unary_op(*op, &operand)?)
            }
            ExprKind::Lambda(lambda) => {
                let (defaults, kw_defaults) = self.eval_defaults(&lambda.params, frame)?;
                Ok(Value::Function(Rc::new(Function {
                    name: "<lambda>".to_string(),
                    body: FunctionBody::Lambda(Arc::clone(lambda)),
                    defaults,
                    kw_defaults,
                    globals: Rc::clone(&frame.globals),
                    closure: frame.closure(),
                    instrumented: false,
                })))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test, frame)?.truthy() {
                    self.eval(body, frame)
                } else {
                    self.eval(orelse, frame)
                }
            }
            ExprKind::Dict { keys, values } => {
                let mut entries = IndexMap::new();
                for (key, value) in keys.iter().zip(values) {
                    let value = self.eval(value, frame)?;
                    match key {
                        Some(key) => {
                            let key = self.eval(key, frame)?.to_key()?;
                            entries.insert(key, value);
                        }
                        None => match &value {
                            Value::Dict(other) => {
                                for (key, value) in &other.borrow().entries {
                                    entries.insert(key.clone(), value.clone());
                                }
                            }
                            other => {
                                return Err(OpError::type_error(format!(
                                    "'{}' object is not a mapping",
                                    other.type_name()
                                ))
                                .into());
                            }
                        },
                    }
                }
                Ok(Value::dict(entries))
            }
            ExprKind::Set(items) => {
                let mut set = IndexSet::new();
                for item in self.eval_items(items, frame)? {
                    set.insert(item.to_key()?);
                }
                Ok(Value::Set(Rc::new(RefCell::new(set))))
            }
            ExprKind::List(items) => Ok(Value::list(self.eval_items(items, frame)?)),
            ExprKind::Tuple(items) => Ok(Value::Tuple(self.eval_items(items, frame)?.into())),
            ExprKind::ListComp { elt, generators }
            | ExprKind::GeneratorExp { elt, generators } => {
                let mut items = Vec::new();
                self.comprehension(generators, frame, &mut |interp, inner| {
                    items.push(interp.eval(elt, inner)?);
                    Ok(())
                })?;
                Ok(Value::list(items))
            }
            ExprKind::SetComp { elt, generators } => {
                let mut set = IndexSet::new();
                self.comprehension(generators, frame, &mut |interp, inner| {
                    set.insert(interp.eval(elt, inner)?.to_key()?);
                    Ok(())
                })?;
                Ok(Value::Set(Rc::new(RefCell::new(set))))
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let mut entries = IndexMap::new();
                self.comprehension(generators, frame, &mut |interp, inner| {
                    let key = interp.eval(key, inner)?.to_key()?;
                    let value = interp.eval(value, inner)?;
                    entries.insert(key, value);
                    Ok(())
                })?;
                Ok(Value::dict(entries))
            }
            // Async functions run to completion when called.
            ExprKind::Await(value) => self.eval(value, frame),
            ExprKind::Yield(_) | ExprKind::YieldFrom(_) => {
                Err(OpError::runtime_error("generators are not supported in calculation scripts").into())
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut left = self.eval(left, frame)?;
                for (op, right) in ops.iter().zip(comparators) {
                    let right = self.eval(right, frame)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                let callee = self.eval(func, frame)?;
                let args = self.eval_args(args, keywords, frame)?;
                self.call_value(&callee, args)
            }
            ExprKind::FormattedValue { .. } | ExprKind::JoinedStr(_) => {
                let mut out = String::new();
                self.format_part(expr, frame, &mut out)?;
                Ok(Value::from(out))
            }
            ExprKind::Constant(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::from(s.as_str()),
                Constant::Ellipsis => Value::None,
            }),
            ExprKind::Attribute { value, attr } => {
                let value = self.eval(value, frame)?;
                self.get_attr(&value, attr)
            }
            ExprKind::Subscript { value, slice } => {
                let value = self.eval(value, frame)?;
                let index = self.eval(slice, frame)?;
                Ok(value.get_item(&index)?)
            }
            ExprKind::Starred(_) => {
                Err(OpError::new("SyntaxError", "can't use starred expression here").into())
            }
            ExprKind::Name(name) => self.load_name(name, frame),
            ExprKind::Slice { lower, upper, step } => {
                let mut bound = |expr: &Option<Box<Expr>>| -> Result<Option<i64>, Exc> {
                    match expr {
                        None => Ok(None),
                        Some(expr) => match self.eval(expr, frame)? {
                            Value::None => Ok(None),
                            value => Ok(Some(value.expect_int("slice indices")?)),
                        },
                    }
                };
                Ok(Value::Slice(Slice {
                    lower: bound(lower)?,
                    upper: bound(upper)?,
                    step: bound(step)?,
                }))
            }
        }
    }

    /// Items of a list, tuple or set display, with `*iterable` unpacked.
    fn eval_items(&mut self, items: &[Expr], frame: &Frame) -> Result<Vec<Value>, Exc> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match &item.kind {
                ExprKind::Starred(inner) => out.extend(self.eval(inner, frame)?.iterate()?),
                _ => out.push(self.eval(item, frame)?),
            }
        }
        Ok(out)
    }

    fn eval_args(
        &mut self,
        args: &[Expr],
        keywords: &[Keyword],
        frame: &Frame,
    ) -> Result<Args, Exc> {
        let positional = self.eval_items(args, frame)?;
        let mut out = Args::new(positional);
        for keyword in keywords {
            let value = self.eval(&keyword.value, frame)?;
            match &keyword.arg {
                Some(name) => {
                    out.keywords.insert(name.clone(), value);
                }
                None => {
                    let Value::Dict(dict) = &value else {
                        return Err(OpError::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            value.type_name()
                        ))
                        .into());
                    };
                    for (key, value) in &dict.borrow().entries {
                        let Key::Str(name) = key else {
                            return Err(OpError::type_error("keywords must be strings").into());
                        };
                        out.keywords.insert(name.to_string(), value.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    fn format_part(&mut self, expr: &Expr, frame: &Frame, out: &mut String) -> Result<(), Exc> {
        match &expr.kind {
            ExprKind::JoinedStr(parts) => {
                for part in parts {
                    self.format_part(part, frame, out)?;
                }
            }
            ExprKind::Constant(Constant::Str(text)) => out.push_str(text),
            ExprKind::FormattedValue {
                value,
                conversion,
                format_spec,
            } => {
                let mut value = self.eval(value, frame)?;
                match conversion {
                    Some('r' | 'a') => value = Value::from(value.repr()),
                    Some('s') => value = Value::from(value.to_str()),
                    _ => {}
                }
                let mut spec = String::new();
                if let Some(format_spec) = format_spec {
                    self.format_part(format_spec, frame, &mut spec)?;
                }
                out.push_str(&format_value(&value, &spec)?);
            }
            _ => out.push_str(&self.eval(expr, frame)?.to_str()),
        }
        Ok(())
    }

    /// Runs `visit` once per combination of the generators, in a scope of its own.
    fn comprehension(
        &mut self,
        generators: &[Comprehension],
        frame: &Frame,
        visit: &mut Visit<'_>,
    ) -> Result<(), Exc> {
        let inner = frame.child();
        self.generate(generators, &inner, visit)
    }

    fn generate(
        &mut self,
        generators: &[Comprehension],
        frame: &Frame,
        visit: &mut Visit<'_>,
    ) -> Result<(), Exc> {
        let Some((first, rest)) = generators.split_first() else {
            return visit(self, frame);
        };
        'items: for item in self.eval(&first.iter, frame)?.iterate()? {
            self.assign(&first.target, item, frame)?;
            for condition in &first.ifs {
                if !self.eval(condition, frame)?.truthy() {
                    continue 'items;
                }
            }
            self.generate(rest, frame, visit)?;
        }
        Ok(())
    }

    fn eval_defaults(
        &mut self,
        params: &Params,
        frame: &Frame,
    ) -> Result<(Vec<Option<Value>>, Vec<Option<Value>>), Exc> {
        let mut defaults = Vec::with_capacity(params.args.len());
        for param in &params.args {
            defaults.push(match &param.default {
                Some(default) => Some(self.eval(default, frame)?),
                None => None,
            });
        }
        let mut kw_defaults = Vec::with_capacity(params.kwonly.len());
        for param in &params.kwonly {
            kw_defaults.push(match &param.default {
                Some(default) => Some(self.eval(default, frame)?),
                None => None,
            });
        }
        Ok((defaults, kw_defaults))
    }

    pub(super) fn make_function(
        &mut self,
        def: &Arc<FunctionDef>,
        frame: &Frame,
        instrumented: bool,
    ) -> Result<Rc<Function>, Exc> {
        let (defaults, kw_defaults) = self.eval_defaults(&def.params, frame)?;
        Ok(Rc::new(Function {
            name: def.name.clone(),
            body: FunctionBody::Def(Arc::clone(def)),
            defaults,
            kw_defaults,
            globals: Rc::clone(&frame.globals),
            closure: frame.closure(),
            instrumented,
        }))
    }

    pub(crate) fn call_value(&mut self, callee: &Value, mut args: Args) -> Result<Value, Exc> {
        match callee {
            Value::Function(function) => self.call_function(function, args),
            Value::Builtin(builtin) => (builtin.func)(self, args),
            Value::Method(method) => {
                args.positional.insert(0, method.receiver.clone());
                match &method.callee {
                    Callee::Native(builtin) => (builtin.func)(self, args),
                    Callee::Function(function) => self.call_function(function, args),
                }
            }
            Value::Class(class) => self.instantiate(class, args),
            Value::EntryDecorator(name) => {
                let [Value::Function(function)] = &args.positional[..] else {
                    return Err(OpError::type_error("uzon_calc decorates a function").into());
                };
                api::make_entry(function, name.clone())
            }
            Value::Entry(entry) => self.call_function(&entry.function, args),
            other => Err(OpError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))
            .into()),
        }
    }

    fn instantiate(&mut self, class: &Rc<Class>, args: Args) -> Result<Value, Exc> {
        let mut attrs = IndexMap::new();
        if class.is_named("BaseException") {
            attrs.insert(
                "args".to_string(),
                Value::Tuple(args.positional.clone().into()),
            );
        }
        let instance = Value::Instance(Rc::new(Instance {
            class: Rc::clone(class),
            attrs: RefCell::new(attrs),
        }));
        match class.lookup("__init__") {
            Some(Value::Function(init)) => {
                let mut args = args;
                args.positional.insert(0, instance.clone());
                let result = self.call_function(&init, args)?;
                if !result.is_none() {
                    return Err(
                        OpError::type_error("__init__() should return None").into()
                    );
                }
            }
            Some(_) | None => {
                if !class.is_named("BaseException")
                    && (!args.positional.is_empty() || !args.keywords.is_empty())
                {
                    return Err(OpError::type_error(format!(
                        "{}() takes no arguments",
                        class.name
                    ))
                    .into());
                }
            }
        }
        Ok(instance)
    }

    pub(crate) fn call_function(&mut self, function: &Rc<Function>, args: Args) -> Result<Value, Exc> {
        if self.depth >= MAX_DEPTH {
            return Err(
                OpError::new("RecursionError", "maximum recursion depth exceeded").into()
            );
        }
        let locals = self.bind_params(function, args)?;
        let frame = Frame::new(
            Rc::new(RefCell::new(locals)),
            function.closure.clone(),
            Rc::clone(&function.globals),
            Scope::Function,
        );
        self.depth += 1;
        let result = match &function.body {
            FunctionBody::Def(def) => self.exec_body(&def.body, &frame).map(|flow| match flow {
                Flow::Return(value) => value,
                Flow::Normal | Flow::Break | Flow::Continue => Value::None,
            }),
            FunctionBody::Lambda(lambda) => self.eval(&lambda.body, &frame),
        };
        self.depth -= 1;
        result
    }

    fn bind_params(
        &self,
        function: &Function,
        args: Args,
    ) -> Result<IndexMap<String, Value>, Exc> {
        let params = function.params();
        let name = function.name.as_str();
        let mut locals = IndexMap::new();
        let mut positional = args.positional.into_iter();

        for param in &params.args {
            if let Some(value) = positional.next() {
                locals.insert(param.name.clone(), value);
            }
        }
        let extra: Vec<Value> = positional.collect();
        match &params.vararg {
            Some(vararg) => {
                locals.insert(vararg.clone(), Value::Tuple(extra.into()));
            }
            None if !extra.is_empty() => {
                return Err(OpError::type_error(format!(
                    "{name}() takes {} positional arguments but {} were given",
                    params.args.len(),
                    params.args.len() + extra.len()
                ))
                .into());
            }
            None => {}
        }

        let mut rest = IndexMap::new();
        for (key, value) in args.keywords {
            let known = params.args.iter().chain(&params.kwonly).any(|p| p.name == key);
            if known {
                if locals.contains_key(&key) {
                    return Err(OpError::type_error(format!(
                        "{name}() got multiple values for argument '{key}'"
                    ))
                    .into());
                }
                locals.insert(key, value);
            } else if params.kwarg.is_some() {
                rest.insert(Key::str(&key), value);
            } else {
                return Err(OpError::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                ))
                .into());
            }
        }
        if let Some(kwarg) = &params.kwarg {
            locals.insert(kwarg.clone(), Value::dict(rest));
        }

        let defaults = params
            .args
            .iter()
            .zip(&function.defaults)
            .chain(params.kwonly.iter().zip(&function.kw_defaults));
        for (param, default) in defaults {
            if locals.contains_key(&param.name) {
                continue;
            }
            match default {
                Some(default) => {
                    locals.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(OpError::type_error(format!(
                        "{name}() missing required argument '{}'",
                        param.name
                    ))
                    .into());
                }
            }
        }
        // Parameters first, in declaration order.
        let order: Vec<&str> = params.names().collect();
        locals.sort_by_cached_key(|key, _| {
            order
                .iter()
                .position(|name| name == key)
                .unwrap_or(order.len())
        });
        Ok(locals)
    }

    pub(crate) fn assign(&mut self, target: &Expr, value: Value, frame: &Frame) -> Result<(), Exc> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.store_name(name, value, frame);
                Ok(())
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let items = value.iterate()?;
                self.unpack(targets, items, frame)
            }
            ExprKind::Attribute { value: owner, attr } => {
                let owner = self.eval(owner, frame)?;
                self.set_attr(&owner, attr, value)
            }
            ExprKind::Subscript { value: owner, slice } => {
                let owner = self.eval(owner, frame)?;
                let index = self.eval(slice, frame)?;
                Ok(owner.set_item(&index, value)?)
            }
            ExprKind::Starred(inner) => self.assign(inner, value, frame),
            _ => Err(OpError::new("SyntaxError", "cannot assign to expression").into()),
        }
    }

    fn unpack(&mut self, targets: &[Expr], items: Vec<Value>, frame: &Frame) -> Result<(), Exc> {
        let star = targets
            .iter()
            .position(|target| matches!(target.kind, ExprKind::Starred(_)));
        let Some(star) = star else {
            if items.len() != targets.len() {
                let message = if items.len() > targets.len() {
                    format!("too many values to unpack (expected {})", targets.len())
                } else {
                    format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )
                };
                return Err(OpError::value_error(message).into());
            }
            for (target, item) in targets.iter().zip(items) {
                self.assign(target, item, frame)?;
            }
            return Ok(());
        };
        let after = targets.len() - star - 1;
        if items.len() < star + after {
            return Err(OpError::value_error(format!(
                "not enough values to unpack (expected at least {}, got {})",
                star + after,
                items.len()
            ))
            .into());
        }
        let mut items = items;
        let tail = items.split_off(items.len() - after);
        let middle = items.split_off(star);
        for (target, item) in targets[..star].iter().zip(items) {
            self.assign(target, item, frame)?;
        }
        self.assign(&targets[star], Value::list(middle), frame)?;
        for (target, item) in targets[star + 1..].iter().zip(tail) {
            self.assign(target, item, frame)?;
        }
        Ok(())
    }

    pub(crate) fn aug_assign(
        &mut self,
        target: &Expr,
        op: BinOp,
        value: &Expr,
        frame: &Frame,
    ) -> Result<(), Exc> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.load_name(name, frame)?;
                let value = self.eval(value, frame)?;
                let result = in_place(op, &current, &value)?;
                self.store_name(name, result, frame);
            }
            ExprKind::Attribute { value: owner, attr } => {
                let owner = self.eval(owner, frame)?;
                let current = self.get_attr(&owner, attr)?;
                let value = self.eval(value, frame)?;
                let result = in_place(op, &current, &value)?;
                self.set_attr(&owner, attr, result)?;
            }
            ExprKind::Subscript { value: owner, slice } => {
                let owner = self.eval(owner, frame)?;
                let index = self.eval(slice, frame)?;
                let current = owner.get_item(&index)?;
                let value = self.eval(value, frame)?;
                let result = in_place(op, &current, &value)?;
                owner.set_item(&index, result)?;
            }
            _ => {
                return Err(
                    OpError::new("SyntaxError", "illegal expression for augmented assignment")
                        .into(),
                );
            }
        }
        Ok(())
    }

    pub(crate) fn delete(&mut self, target: &Expr, frame: &Frame) -> Result<(), Exc> {
        match &target.kind {
            ExprKind::Name(name) => self.delete_name(name, frame),
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                for target in targets {
                    self.delete(target, frame)?;
                }
                Ok(())
            }
            ExprKind::Subscript { value, slice } => {
                let owner = self.eval(value, frame)?;
                let index = self.eval(slice, frame)?;
                Ok(owner.del_item(&index)?)
            }
            ExprKind::Attribute { value, attr } => {
                let owner = self.eval(value, frame)?;
                let removed = match &owner {
                    Value::Instance(instance) => instance.attrs.borrow_mut().shift_remove(attr),
                    Value::Class(class) => class.attrs.borrow_mut().shift_remove(attr),
                    _ => None,
                };
                match removed {
                    Some(_) => Ok(()),
                    None => Err(OpError::attribute_error(owner.type_name(), attr).into()),
                }
            }
            _ => Err(OpError::new("SyntaxError", "cannot delete expression").into()),
        }
    }
}

/// `+=` extends lists in place; every other operator rebinds.
fn in_place(op: BinOp, current: &Value, value: &Value) -> Result<Value, OpError> {
    if let (BinOp::Add, Value::List(items)) = (op, current) {
        let extra = value.iterate()?;
        items.borrow_mut().extend(extra);
        return Ok(current.clone());
    }
    binary_op(op, current, value)
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, OpError> {
    Ok(match op {
        CmpOp::Eq => left.equals(right),
        CmpOp::NotEq => !left.equals(right),
        CmpOp::Lt => left.compare(right)? == Ordering::Less,
        CmpOp::LtE => left.compare(right)? != Ordering::Greater,
        CmpOp::Gt => left.compare(right)? == Ordering::Greater,
        CmpOp::GtE => left.compare(right)? != Ordering::Less,
        CmpOp::Is => left.is(right),
        CmpOp::IsNot => !left.is(right),
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
    })
}
