//! Tree-walking interpreter for calculation scripts.
//!
//! A script module runs once to define its functions; its entry function then runs in
//! instrumented form. Values are reference counted without locking, so an interpreter and
//! everything it creates stay on one thread for the whole run.

mod api;
mod builtins;
mod error;
mod eval;
pub mod format;
mod ops;
mod value;

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::warn;

pub use error::{Exc, OpError};
pub use value::{
    Args, Builtin, BuiltinFn, Callee, Class, Dict, Entry, Env, Function, FunctionBody, Instance,
    Key, Locals, Method, Module, Namespace, Range, Slice, Value, namespace,
};

use crate::context::Context;
use crate::syntax::ast::{ExceptHandler, FunctionDef, MatchCase, Pattern, Stmt, StmtKind};

/// Calls nested deeper than this raise `RecursionError`.
const MAX_DEPTH: usize = 200;

/// How a statement left its block.
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Module,
    Function,
    Class,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Declared {
    Global,
    Nonlocal,
}

/// The bindings visible to running code.
pub(crate) struct Frame {
    locals: Namespace,
    env: Option<Rc<Env>>,
    globals: Namespace,
    scope: Scope,
    declared: RefCell<FxHashMap<String, Declared>>,
}

impl Frame {
    fn new(locals: Namespace, env: Option<Rc<Env>>, globals: Namespace, scope: Scope) -> Self {
        Frame {
            locals,
            env,
            globals,
            scope,
            declared: RefCell::default(),
        }
    }

    fn module(globals: Namespace) -> Self {
        Frame::new(Rc::clone(&globals), None, globals, Scope::Module)
    }

    /// The environment captured by functions defined in this frame.
    ///
    /// Class bodies are skipped, as are module globals, which functions reach directly.
    fn closure(&self) -> Option<Rc<Env>> {
        match self.scope {
            Scope::Function => Some(Rc::new(Env {
                vars: Rc::clone(&self.locals),
                parent: self.env.clone(),
            })),
            Scope::Module | Scope::Class => self.env.clone(),
        }
    }

    /// A frame for comprehensions and other nested scopes evaluated inline.
    fn child(&self) -> Frame {
        let env = match self.scope {
            Scope::Module => None,
            Scope::Function | Scope::Class => Some(Rc::new(Env {
                vars: Rc::clone(&self.locals),
                parent: self.env.clone(),
            })),
        };
        Frame::new(namespace(), env, Rc::clone(&self.globals), Scope::Function)
    }

    /// What `locals()` shows: enclosing function variables, then this frame's own.
    pub(crate) fn snapshot(&self) -> Locals {
        if self.scope == Scope::Module {
            return self.globals.borrow().clone();
        }
        let mut chain = Vec::new();
        let mut env = self.env.as_ref();
        while let Some(current) = env {
            chain.push(current);
            env = current.parent.as_ref();
        }
        let mut locals = Locals::new();
        for env in chain.into_iter().rev() {
            for (name, value) in env.vars.borrow().iter() {
                locals.insert(name.clone(), value.clone());
            }
        }
        for (name, value) in self.locals.borrow().iter() {
            locals.insert(name.clone(), value.clone());
        }
        locals
    }

    fn find_env(&self, name: &str) -> Option<&Rc<Env>> {
        let mut env = self.env.as_ref();
        while let Some(current) = env {
            if current.vars.borrow().contains_key(name) {
                return Some(current);
            }
            env = current.parent.as_ref();
        }
        None
    }
}

/// Runs one script and owns the context its sheet is written to.
pub struct Interpreter {
    pub ctx: Context,
    globals: Namespace,
    builtins: FxHashMap<&'static str, Value>,
    exceptions: FxHashMap<&'static str, Rc<Class>>,
    modules: FxHashMap<&'static str, Rc<Module>>,
    path: PathBuf,
    entry: Option<Rc<Entry>>,
    /// Exceptions whose handlers are running, innermost last.
    handling: Vec<Value>,
    depth: usize,
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("path", &self.path)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    pub fn new(ctx: Context, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let globals = namespace();
        {
            let mut globals = globals.borrow_mut();
            globals.insert("__name__".to_string(), Value::from("__uzoncalc__"));
            globals.insert(
                "__file__".to_string(),
                Value::from(path.display().to_string()),
            );
        }
        let mut interp = Interpreter {
            ctx,
            globals,
            builtins: FxHashMap::default(),
            exceptions: FxHashMap::default(),
            modules: FxHashMap::default(),
            path,
            entry: None,
            handling: Vec::new(),
            depth: 0,
        };
        interp.install_builtins();
        interp
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    /// The function marked with `@uzon_calc`, once the module has run.
    pub fn entry(&self) -> Option<Rc<Entry>> {
        self.entry.clone()
    }

    pub fn into_context(self) -> Context {
        self.ctx
    }

    /// Runs the top-level statements of a script.
    pub fn exec_module(&mut self, body: &[Stmt]) -> Result<(), Exc> {
        let frame = Frame::module(Rc::clone(&self.globals));
        match self.exec_body(body, &frame)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(OpError::new("SyntaxError", "'return' outside function").into()),
            Flow::Break | Flow::Continue => {
                Err(OpError::new("SyntaxError", "'break' outside loop").into())
            }
        }
    }

    /// Defines `def` as a function tagged instrumented, closing over `closure`.
    ///
    /// Parameter defaults are evaluated again, in the module globals.
    pub fn define_instrumented(
        &mut self,
        def: Arc<FunctionDef>,
        closure: Option<Rc<Env>>,
    ) -> Result<Rc<Function>, Exc> {
        let frame = Frame::new(
            namespace(),
            closure,
            Rc::clone(&self.globals),
            Scope::Class,
        );
        self.globals
            .borrow_mut()
            .entry("unit".to_string())
            .or_insert(Value::UnitRegistry);
        self.make_function(&def, &frame, true)
    }

    /// Calls a script value.
    pub fn call(&mut self, callee: &Value, args: Args) -> Result<Value, Exc> {
        self.call_value(callee, args)
    }

    fn check_cancelled(&self) -> Result<(), Exc> {
        if self.ctx.interaction.is_cancelled() {
            return Err(Exc::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn exec_body(&mut self, body: &[Stmt], frame: &Frame) -> Result<Flow, Exc> {
        for stmt in body {
            match self.exec_stmt(stmt, frame)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, frame: &Frame) -> Result<Flow, Exc> {
        self.check_cancelled()?;
        self.exec_kind(stmt, frame)
            .map_err(|exc| exc.at_line(stmt.line))
    }

    fn exec_kind(&mut self, stmt: &Stmt, frame: &Frame) -> Result<Flow, Exc> {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def, frame, false)?;
                let mut value = Value::Function(function);
                for decorator in def.decorators.iter().rev() {
                    let decorator = self.eval(decorator, frame)?;
                    value = self.call_value(&decorator, Args::new(vec![value]))?;
                }
                if let Value::Entry(entry) = &value {
                    self.register_entry(entry);
                }
                self.store_name(&def.name, value, frame);
            }
            StmtKind::ClassDef(class) => {
                let mut bases = Vec::with_capacity(class.bases.len());
                for base in &class.bases {
                    match self.eval(base, frame)? {
                        Value::Class(base) => bases.push(base),
                        other => {
                            return Err(OpError::type_error(format!(
                                "bases must be classes, not '{}'",
                                other.type_name()
                            ))
                            .into());
                        }
                    }
                }
                let body = Frame::new(
                    namespace(),
                    frame.closure(),
                    Rc::clone(&frame.globals),
                    Scope::Class,
                );
                self.exec_body(&class.body, &body)?;
                let attrs = body.locals.borrow().clone();
                let mut value = Value::Class(Rc::new(Class {
                    name: class.name.clone(),
                    bases,
                    attrs: RefCell::new(attrs),
                }));
                for decorator in class.decorators.iter().rev() {
                    let decorator = self.eval(decorator, frame)?;
                    value = self.call_value(&decorator, Args::new(vec![value]))?;
                }
                self.store_name(&class.name, value, frame);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value, frame)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, frame)?;
                }
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, frame)?;
                for target in targets {
                    self.assign(target, value.clone(), frame)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                self.aug_assign(target, *op, value, frame)?;
            }
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let value = self.eval(value, frame)?;
                    self.assign(target, value, frame)?;
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.import(&alias.name)?;
                    let bound = match &alias.asname {
                        Some(name) => name.as_str(),
                        None => alias.name.split('.').next().unwrap_or(&alias.name),
                    };
                    self.store_name(bound, Value::Module(module), frame);
                }
            }
            StmtKind::ImportFrom { module, names, .. } => {
                let module = self.import(module)?;
                for alias in names {
                    if alias.name == "*" {
                        for (name, value) in &module.attrs {
                            if !name.starts_with('_') {
                                self.store_name(name, value.clone(), frame);
                            }
                        }
                        continue;
                    }
                    let value = module.attrs.get(alias.name.as_str()).cloned().ok_or_else(|| {
                        OpError::new(
                            "ImportError",
                            format!(
                                "cannot import name '{}' from '{}'",
                                alias.name, module.name
                            ),
                        )
                    })?;
                    let bound = alias.asname.as_deref().unwrap_or(&alias.name);
                    self.store_name(bound, value, frame);
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => {
                let items = self.eval(iter, frame)?.iterate()?;
                for item in items {
                    self.assign(target, item, frame)?;
                    match self.exec_body(body, frame)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                return self.exec_body(orelse, frame);
            }
            StmtKind::While { test, body, orelse } => {
                while self.eval(test, frame)?.truthy() {
                    self.check_cancelled()?;
                    match self.exec_body(body, frame)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                return self.exec_body(orelse, frame);
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test, frame)?.truthy() {
                    body
                } else {
                    orelse
                };
                return self.exec_body(branch, frame);
            }
            StmtKind::With { items, body, .. } => {
                let mut managers = Vec::new();
                for item in items {
                    let manager = self.eval(&item.context, frame)?;
                    let value = match self.special_method(&manager, "__enter__") {
                        Some(enter) => {
                            let value = self.call_value(&enter, Args::default())?;
                            managers.push(manager);
                            value
                        }
                        None => manager,
                    };
                    if let Some(target) = &item.target {
                        self.assign(target, value, frame)?;
                    }
                }
                let result = self.exec_body(body, frame);
                for manager in managers.into_iter().rev() {
                    if let Some(exit) = self.special_method(&manager, "__exit__") {
                        let none = vec![Value::None, Value::None, Value::None];
                        self.call_value(&exit, Args::new(none))?;
                    }
                }
                return result;
            }
            StmtKind::Match { subject, cases } => {
                let subject = self.eval(subject, frame)?;
                return self.exec_match(&subject, cases, frame);
            }
            StmtKind::Raise { exc, cause } => {
                let Some(exc) = exc else {
                    return match self.handling.last() {
                        Some(value) => Err(Exc::Raised {
                            value: value.clone(),
                            line: None,
                        }),
                        None => Err(OpError::runtime_error("No active exception to reraise").into()),
                    };
                };
                let value = self.eval(exc, frame)?;
                let value = self.make_exception(value)?;
                if let (Some(cause), Value::Instance(instance)) = (cause, &value) {
                    let cause = self.eval(cause, frame)?;
                    instance
                        .attrs
                        .borrow_mut()
                        .insert("__cause__".to_string(), cause);
                }
                return Err(Exc::Raised { value, line: None });
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let outcome = match self.exec_body(body, frame) {
                    Ok(Flow::Normal) => self.exec_body(orelse, frame),
                    Ok(flow) => Ok(flow),
                    Err(Exc::Cancelled) => Err(Exc::Cancelled),
                    Err(exc) if handlers.is_empty() => Err(exc),
                    Err(exc) => self.handle(exc, handlers, frame),
                };
                if finalbody.is_empty() || matches!(outcome, Err(Exc::Cancelled)) {
                    return outcome;
                }
                return match self.exec_body(finalbody, frame)? {
                    Flow::Normal => outcome,
                    flow => Ok(flow),
                };
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test, frame)?.truthy() {
                    let message = match msg {
                        Some(msg) => self.eval(msg, frame)?.to_str(),
                        None => String::new(),
                    };
                    return Err(OpError::new("AssertionError", message).into());
                }
            }
            StmtKind::Global(names) => {
                let mut declared = frame.declared.borrow_mut();
                for name in names {
                    declared.insert(name.clone(), Declared::Global);
                }
            }
            StmtKind::Nonlocal(names) => {
                for name in names {
                    if frame.find_env(name).is_none() {
                        return Err(OpError::new(
                            "SyntaxError",
                            format!("no binding for nonlocal '{name}' found"),
                        )
                        .into());
                    }
                    frame
                        .declared
                        .borrow_mut()
                        .insert(name.clone(), Declared::Nonlocal);
                }
            }
            StmtKind::Expr(expr) => {
                self.eval(expr, frame)?;
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Record(record) => {
                let value = match &record.value {
                    Some(expr) => Some(self.eval(expr, frame)?),
                    None => None,
                };
                let locals = if record.capture_locals {
                    frame.snapshot()
                } else {
                    Locals::new()
                };
                record
                    .step
                    .record(&mut self.ctx, &locals, value.as_ref())?;
            }
        }
        Ok(Flow::Normal)
    }

    fn register_entry(&mut self, entry: &Rc<Entry>) {
        match &self.entry {
            Some(existing) if !Rc::ptr_eq(existing, entry) => {
                warn!(
                    kept = existing.display_name(),
                    ignored = entry.display_name(),
                    "a script has one entry point, ignoring the later one"
                );
            }
            _ => self.entry = Some(Rc::clone(entry)),
        }
    }

    fn handle(
        &mut self,
        exc: Exc,
        handlers: &[ExceptHandler],
        frame: &Frame,
    ) -> Result<Flow, Exc> {
        let (value, line) = self.exception_of(exc)?;
        for handler in handlers {
            let matched = match &handler.kind {
                None => true,
                Some(kind) => {
                    let kind = self.eval(kind, frame)?;
                    self.exception_matches(&value, &kind)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store_name(name, value.clone(), frame);
            }
            self.handling.push(value);
            let result = self.exec_body(&handler.body, frame);
            self.handling.pop();
            return result;
        }
        Err(Exc::Raised { value, line })
    }

    /// The exception object behind `exc`; cancellation stays an error.
    fn exception_of(&mut self, exc: Exc) -> Result<(Value, Option<u32>), Exc> {
        match exc {
            Exc::Error { error, line } => {
                let class = self.exception_class(error.kind);
                let value = Value::Instance(Rc::new(Instance {
                    class,
                    attrs: RefCell::new(
                        [(
                            "args".to_string(),
                            Value::Tuple(Rc::from([Value::from(error.message)])),
                        )]
                        .into_iter()
                        .collect(),
                    ),
                }));
                Ok((value, line))
            }
            Exc::Raised { value, line } => Ok((value, line)),
            Exc::Cancelled => Err(Exc::Cancelled),
        }
    }

    fn exception_matches(&self, value: &Value, kind: &Value) -> Result<bool, Exc> {
        match (value, kind) {
            (Value::Instance(instance), Value::Class(class)) => {
                Ok(instance.class.is_subclass_of(class))
            }
            (_, Value::Tuple(kinds)) => {
                for kind in kinds.iter() {
                    if self.exception_matches(value, kind)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(OpError::type_error(
                "catching classes that do not inherit from BaseException is not allowed",
            )
            .into()),
        }
    }

    fn make_exception(&mut self, value: Value) -> Result<Value, Exc> {
        match value {
            Value::Class(class) if class.is_named("BaseException") => {
                self.call_value(&Value::Class(class), Args::default())
            }
            Value::Instance(instance) if instance.is_exception() => {
                Ok(Value::Instance(instance))
            }
            _ => Err(OpError::type_error("exceptions must derive from BaseException").into()),
        }
    }

    fn exec_match(
        &mut self,
        subject: &Value,
        cases: &[MatchCase],
        frame: &Frame,
    ) -> Result<Flow, Exc> {
        for case in cases {
            let mut bindings = Vec::new();
            if !self.match_pattern(&case.pattern, subject, frame, &mut bindings)? {
                continue;
            }
            for (name, value) in bindings {
                self.store_name(&name, value, frame);
            }
            if let Some(guard) = &case.guard
                && !self.eval(guard, frame)?.truthy()
            {
                continue;
            }
            return self.exec_body(&case.body, frame);
        }
        Ok(Flow::Normal)
    }

    fn match_pattern(
        &mut self,
        pattern: &Pattern,
        subject: &Value,
        frame: &Frame,
        bindings: &mut Vec<(String, Value)>,
    ) -> Result<bool, Exc> {
        match pattern {
            Pattern::Wildcard | Pattern::Star(None) => Ok(true),
            Pattern::Capture(name) | Pattern::Star(Some(name)) => {
                bindings.push((name.clone(), subject.clone()));
                Ok(true)
            }
            Pattern::Value(expr) => Ok(self.eval(expr, frame)?.equals(subject)),
            Pattern::As(inner, name) => {
                if !self.match_pattern(inner, subject, frame, bindings)? {
                    return Ok(false);
                }
                bindings.push((name.clone(), subject.clone()));
                Ok(true)
            }
            Pattern::Or(alternatives) => {
                for alternative in alternatives {
                    let mut attempt = Vec::new();
                    if self.match_pattern(alternative, subject, frame, &mut attempt)? {
                        bindings.extend(attempt);
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Pattern::Sequence(items) => {
                let values = match subject {
                    Value::List(list) => list.borrow().clone(),
                    Value::Tuple(tuple) => tuple.to_vec(),
                    _ => return Ok(false),
                };
                let star = items.iter().position(|item| matches!(item, Pattern::Star(_)));
                let Some(star) = star else {
                    if values.len() != items.len() {
                        return Ok(false);
                    }
                    for (item, value) in items.iter().zip(&values) {
                        if !self.match_pattern(item, value, frame, bindings)? {
                            return Ok(false);
                        }
                    }
                    return Ok(true);
                };
                let after = items.len() - star - 1;
                if values.len() < star + after {
                    return Ok(false);
                }
                for (item, value) in items[..star].iter().zip(&values) {
                    if !self.match_pattern(item, value, frame, bindings)? {
                        return Ok(false);
                    }
                }
                let rest_end = values.len() - after;
                let rest = Value::list(values[star..rest_end].to_vec());
                self.match_pattern(&items[star], &rest, frame, bindings)?;
                for (item, value) in items[star + 1..].iter().zip(&values[rest_end..]) {
                    if !self.match_pattern(item, value, frame, bindings)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    pub(crate) fn load_name(&self, name: &str, frame: &Frame) -> Result<Value, Exc> {
        match frame.declared.borrow().get(name) {
            Some(Declared::Global) => {
                if let Some(value) = frame.globals.borrow().get(name) {
                    return Ok(value.clone());
                }
            }
            Some(Declared::Nonlocal) | None => {
                if let Some(value) = frame.locals.borrow().get(name) {
                    return Ok(value.clone());
                }
                if let Some(env) = frame.find_env(name)
                    && let Some(value) = env.vars.borrow().get(name)
                {
                    return Ok(value.clone());
                }
                if let Some(value) = frame.globals.borrow().get(name) {
                    return Ok(value.clone());
                }
            }
        }
        if let Some(value) = self.builtins.get(name) {
            return Ok(value.clone());
        }
        Err(OpError::new("NameError", format!("name '{name}' is not defined")).into())
    }

    pub(crate) fn store_name(&self, name: &str, value: Value, frame: &Frame) {
        let declared = frame.declared.borrow().get(name).copied();
        let target = match declared {
            Some(Declared::Global) => &frame.globals,
            Some(Declared::Nonlocal) => match frame.find_env(name) {
                Some(env) => &env.vars,
                None => &frame.locals,
            },
            None => &frame.locals,
        };
        target.borrow_mut().insert(name.to_string(), value);
    }

    fn delete_name(&self, name: &str, frame: &Frame) -> Result<(), Exc> {
        let target = match frame.declared.borrow().get(name) {
            Some(Declared::Global) => Rc::clone(&frame.globals),
            Some(Declared::Nonlocal) => match frame.find_env(name) {
                Some(env) => Rc::clone(&env.vars),
                None => Rc::clone(&frame.locals),
            },
            None => Rc::clone(&frame.locals),
        };
        let removed = target.borrow_mut().shift_remove(name);
        match removed {
            Some(_) => Ok(()),
            None => Err(OpError::new("NameError", format!("name '{name}' is not defined")).into()),
        }
    }
}

#[cfg(test)]
mod tests;
