//! Syntax tree of calculation scripts.
//!
//! The tree is a closed set of statement and expression kinds. Every node carries its byte
//! span in the source it was parsed from and a 1-based line number.

use std::sync::Arc;

use strum_macros::IntoStaticStr;

use super::token::Span;
use crate::steps::Step;

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
    pub line: u32,
    /// Set on directives and synthesized statements so that a second rewrite pass leaves
    /// them alone.
    pub skip: bool,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span, line: u32) -> Self {
        Stmt {
            kind,
            span,
            line,
            skip: false,
        }
    }

    /// A synthesized statement located at `origin`.
    pub fn synthetic(kind: StmtKind, origin: &Stmt) -> Self {
        Stmt {
            kind,
            span: origin.span,
            line: origin.line,
            skip: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    FunctionDef(Arc<FunctionDef>),
    ClassDef(Box<ClassDef>),
    Return(Option<Expr>),
    Delete(Vec<Expr>),
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    Import(Vec<Alias>),
    ImportFrom {
        module: String,
        names: Vec<Alias>,
        level: u32,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        is_async: bool,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
        is_async: bool,
    },
    Match {
        subject: Expr,
        cases: Vec<MatchCase>,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Expr(Expr),
    Pass,
    Break,
    Continue,
    /// Synthesized by the rewriter: hand `step` to the current context.
    Record(Box<Record>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub step: Arc<Step>,
    /// Evaluated after the preceding statement; its result is the recorded value.
    pub value: Option<Expr>,
    /// Whether a snapshot of the local bindings is passed along.
    pub capture_locals: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Params,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
    pub returns: Option<Expr>,
    pub is_async: bool,
    pub span: Span,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub args: Vec<Param>,
    pub vararg: Option<String>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<String>,
}

impl Params {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .chain(&self.kwonly)
            .map(|param| param.name.as_str())
            .chain(self.vararg.as_deref())
            .chain(self.kwarg.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub annotation: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub context: Expr,
    pub target: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `_`
    Wildcard,
    /// A bare name binds the subject.
    Capture(String),
    /// A literal or dotted name compared by equality.
    Value(Expr),
    /// `[p, q, *rest]` or `(p, q)`.
    Sequence(Vec<Pattern>),
    /// `*rest` inside a sequence pattern; `None` for `*_`.
    Star(Option<String>),
    Or(Vec<Pattern>),
    As(Box<Pattern>, String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub line: u32,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span, line: u32) -> Self {
        Expr { kind, span, line }
    }

    pub fn name(name: impl Into<String>, span: Span, line: u32) -> Self {
        Expr::new(ExprKind::Name(name.into()), span, line)
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }

    /// The dotted name of `a.b.c` style expressions.
    pub fn dotted_name(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Name(name) => Some(name.clone()),
            ExprKind::Attribute { value, attr } => {
                let mut base = value.dotted_name()?;
                base.push('.');
                base.push_str(attr);
                Some(base)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    NamedExpr {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Lambda(Arc<Lambda>),
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// A `None` key marks `**mapping` unpacking.
    Dict {
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
    },
    Set(Vec<Expr>),
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    Await(Box<Expr>),
    Yield(Option<Box<Expr>>),
    YieldFrom(Box<Expr>),
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    FormattedValue {
        value: Box<Expr>,
        conversion: Option<char>,
        format_spec: Option<Box<Expr>>,
    },
    /// Parts are string constants and formatted values.
    JoinedStr(Vec<Expr>),
    Constant(Constant),
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        slice: Box<Expr>,
    },
    Starred(Box<Expr>),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Params,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
    pub is_async: bool,
}

/// `name=value` in a call, or `**value` when `arg` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub arg: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ellipsis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BoolOp {
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mult,
    #[strum(serialize = "@")]
    MatMult,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "//")]
    FloorDiv,
}

impl BinOp {
    #[inline]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum UnaryOp {
    #[strum(serialize = "~")]
    Invert,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "+")]
    UAdd,
    #[strum(serialize = "-")]
    USub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum CmpOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    LtE,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    GtE,
    #[strum(serialize = "is")]
    Is,
    #[strum(serialize = "is not")]
    IsNot,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "not in")]
    NotIn,
}

/// Node kinds as reported by validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum NodeKind {
    Module,
    FunctionDef,
    AsyncFunctionDef,
    ClassDef,
    Return,
    Delete,
    Assign,
    AugAssign,
    AnnAssign,
    Import,
    ImportFrom,
    For,
    AsyncFor,
    While,
    If,
    With,
    AsyncWith,
    Match,
    MatchCase,
    Raise,
    Try,
    ExceptHandler,
    Assert,
    Global,
    Nonlocal,
    Expr,
    Pass,
    Break,
    Continue,
    Record,
    BoolOp,
    NamedExpr,
    BinOp,
    UnaryOp,
    Lambda,
    IfExp,
    Dict,
    Set,
    ListComp,
    SetComp,
    DictComp,
    GeneratorExp,
    Await,
    Yield,
    YieldFrom,
    Compare,
    Call,
    FormattedValue,
    JoinedStr,
    Constant,
    Attribute,
    Subscript,
    Starred,
    Name,
    List,
    Tuple,
    Slice,
}

impl NodeKind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl StmtKind {
    pub fn node_kind(&self) -> NodeKind {
        match self {
            StmtKind::FunctionDef(def) if def.is_async => NodeKind::AsyncFunctionDef,
            StmtKind::FunctionDef(_) => NodeKind::FunctionDef,
            StmtKind::ClassDef(_) => NodeKind::ClassDef,
            StmtKind::Return(_) => NodeKind::Return,
            StmtKind::Delete(_) => NodeKind::Delete,
            StmtKind::Assign { .. } => NodeKind::Assign,
            StmtKind::AugAssign { .. } => NodeKind::AugAssign,
            StmtKind::AnnAssign { .. } => NodeKind::AnnAssign,
            StmtKind::Import(_) => NodeKind::Import,
            StmtKind::ImportFrom { .. } => NodeKind::ImportFrom,
            StmtKind::For { is_async: true, .. } => NodeKind::AsyncFor,
            StmtKind::For { .. } => NodeKind::For,
            StmtKind::While { .. } => NodeKind::While,
            StmtKind::If { .. } => NodeKind::If,
            StmtKind::With { is_async: true, .. } => NodeKind::AsyncWith,
            StmtKind::With { .. } => NodeKind::With,
            StmtKind::Match { .. } => NodeKind::Match,
            StmtKind::Raise { .. } => NodeKind::Raise,
            StmtKind::Try { .. } => NodeKind::Try,
            StmtKind::Assert { .. } => NodeKind::Assert,
            StmtKind::Global(_) => NodeKind::Global,
            StmtKind::Nonlocal(_) => NodeKind::Nonlocal,
            StmtKind::Expr(_) => NodeKind::Expr,
            StmtKind::Pass => NodeKind::Pass,
            StmtKind::Break => NodeKind::Break,
            StmtKind::Continue => NodeKind::Continue,
            StmtKind::Record(_) => NodeKind::Record,
        }
    }
}

impl ExprKind {
    pub fn node_kind(&self) -> NodeKind {
        match self {
            ExprKind::BoolOp { .. } => NodeKind::BoolOp,
            ExprKind::NamedExpr { .. } => NodeKind::NamedExpr,
            ExprKind::BinOp { .. } => NodeKind::BinOp,
            ExprKind::UnaryOp { .. } => NodeKind::UnaryOp,
            ExprKind::Lambda(_) => NodeKind::Lambda,
            ExprKind::IfExp { .. } => NodeKind::IfExp,
            ExprKind::Dict { .. } => NodeKind::Dict,
            ExprKind::Set(_) => NodeKind::Set,
            ExprKind::ListComp { .. } => NodeKind::ListComp,
            ExprKind::SetComp { .. } => NodeKind::SetComp,
            ExprKind::DictComp { .. } => NodeKind::DictComp,
            ExprKind::GeneratorExp { .. } => NodeKind::GeneratorExp,
            ExprKind::Await(_) => NodeKind::Await,
            ExprKind::Yield(_) => NodeKind::Yield,
            ExprKind::YieldFrom(_) => NodeKind::YieldFrom,
            ExprKind::Compare { .. } => NodeKind::Compare,
            ExprKind::Call { .. } => NodeKind::Call,
            ExprKind::FormattedValue { .. } => NodeKind::FormattedValue,
            ExprKind::JoinedStr(_) => NodeKind::JoinedStr,
            ExprKind::Constant(_) => NodeKind::Constant,
            ExprKind::Attribute { .. } => NodeKind::Attribute,
            ExprKind::Subscript { .. } => NodeKind::Subscript,
            ExprKind::Starred(_) => NodeKind::Starred,
            ExprKind::Name(_) => NodeKind::Name,
            ExprKind::List(_) => NodeKind::List,
            ExprKind::Tuple(_) => NodeKind::Tuple,
            ExprKind::Slice { .. } => NodeKind::Slice,
        }
    }
}

/// Read-only traversal over statements and expressions.
///
/// The default methods walk into every child; implementors override the hooks they need
/// and call the matching `walk_*` function to continue.
pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_handler(&mut self, handler: &ExceptHandler) {
        walk_body(self, &handler.body);
    }

    fn visit_case(&mut self, case: &MatchCase) {
        walk_case(self, case);
    }
}

pub fn walk_body<V: Visitor + ?Sized>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        visitor.visit_stmt(stmt);
    }
}

fn walk_params<V: Visitor + ?Sized>(visitor: &mut V, params: &Params) {
    for param in params.args.iter().chain(&params.kwonly) {
        if let Some(default) = &param.default {
            visitor.visit_expr(default);
        }
        if let Some(annotation) = &param.annotation {
            visitor.visit_expr(annotation);
        }
    }
}

pub fn walk_case<V: Visitor + ?Sized>(visitor: &mut V, case: &MatchCase) {
    walk_pattern(visitor, &case.pattern);
    if let Some(guard) = &case.guard {
        visitor.visit_expr(guard);
    }
    walk_body(visitor, &case.body);
}

fn walk_pattern<V: Visitor + ?Sized>(visitor: &mut V, pattern: &Pattern) {
    match pattern {
        Pattern::Value(expr) => visitor.visit_expr(expr),
        Pattern::Sequence(items) | Pattern::Or(items) => {
            for item in items {
                walk_pattern(visitor, item);
            }
        }
        Pattern::As(inner, _) => walk_pattern(visitor, inner),
        Pattern::Wildcard | Pattern::Capture(_) | Pattern::Star(_) => {}
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::FunctionDef(def) => {
            for decorator in &def.decorators {
                visitor.visit_expr(decorator);
            }
            walk_params(visitor, &def.params);
            if let Some(returns) = &def.returns {
                visitor.visit_expr(returns);
            }
            walk_body(visitor, &def.body);
        }
        StmtKind::ClassDef(class) => {
            for expr in class.decorators.iter().chain(&class.bases) {
                visitor.visit_expr(expr);
            }
            for keyword in &class.keywords {
                visitor.visit_expr(&keyword.value);
            }
            walk_body(visitor, &class.body);
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::Delete(targets) => {
            for target in targets {
                visitor.visit_expr(target);
            }
        }
        StmtKind::Assign { targets, value } => {
            for target in targets {
                visitor.visit_expr(target);
            }
            visitor.visit_expr(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
        } => {
            visitor.visit_expr(target);
            visitor.visit_expr(annotation);
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
            ..
        } => {
            visitor.visit_expr(target);
            visitor.visit_expr(iter);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
            visitor.visit_expr(test);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::With { items, body, .. } => {
            for item in items {
                visitor.visit_expr(&item.context);
                if let Some(target) = &item.target {
                    visitor.visit_expr(target);
                }
            }
            walk_body(visitor, body);
        }
        StmtKind::Match { subject, cases } => {
            visitor.visit_expr(subject);
            for case in cases {
                visitor.visit_case(case);
            }
        }
        StmtKind::Raise { exc, cause } => {
            for expr in exc.iter().chain(cause) {
                visitor.visit_expr(expr);
            }
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            walk_body(visitor, body);
            for handler in handlers {
                if let Some(kind) = &handler.kind {
                    visitor.visit_expr(kind);
                }
                visitor.visit_handler(handler);
            }
            walk_body(visitor, orelse);
            walk_body(visitor, finalbody);
        }
        StmtKind::Assert { test, msg } => {
            visitor.visit_expr(test);
            if let Some(msg) = msg {
                visitor.visit_expr(msg);
            }
        }
        StmtKind::Expr(expr) => visitor.visit_expr(expr),
        StmtKind::Record(record) => {
            if let Some(value) = &record.value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::Import(_)
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

fn walk_generators<V: Visitor + ?Sized>(visitor: &mut V, generators: &[Comprehension]) {
    for generator in generators {
        visitor.visit_expr(&generator.target);
        visitor.visit_expr(&generator.iter);
        for cond in &generator.ifs {
            visitor.visit_expr(cond);
        }
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::BoolOp { values, .. } => {
            for value in values {
                visitor.visit_expr(value);
            }
        }
        ExprKind::NamedExpr { target, value } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        ExprKind::BinOp { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::UnaryOp { operand, .. } => visitor.visit_expr(operand),
        ExprKind::Lambda(lambda) => {
            walk_params(visitor, &lambda.params);
            visitor.visit_expr(&lambda.body);
        }
        ExprKind::IfExp { test, body, orelse } => {
            visitor.visit_expr(test);
            visitor.visit_expr(body);
            visitor.visit_expr(orelse);
        }
        ExprKind::Dict { keys, values } => {
            for key in keys.iter().flatten() {
                visitor.visit_expr(key);
            }
            for value in values {
                visitor.visit_expr(value);
            }
        }
        ExprKind::Set(items) | ExprKind::List(items) | ExprKind::Tuple(items) => {
            for item in items {
                visitor.visit_expr(item);
            }
        }
        ExprKind::ListComp { elt, generators }
        | ExprKind::SetComp { elt, generators }
        | ExprKind::GeneratorExp { elt, generators } => {
            walk_generators(visitor, generators);
            visitor.visit_expr(elt);
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => {
            walk_generators(visitor, generators);
            visitor.visit_expr(key);
            visitor.visit_expr(value);
        }
        ExprKind::Await(inner) | ExprKind::YieldFrom(inner) | ExprKind::Starred(inner) => {
            visitor.visit_expr(inner);
        }
        ExprKind::Yield(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        ExprKind::Compare {
            left, comparators, ..
        } => {
            visitor.visit_expr(left);
            for comparator in comparators {
                visitor.visit_expr(comparator);
            }
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            visitor.visit_expr(func);
            for arg in args {
                visitor.visit_expr(arg);
            }
            for keyword in keywords {
                visitor.visit_expr(&keyword.value);
            }
        }
        ExprKind::FormattedValue {
            value, format_spec, ..
        } => {
            visitor.visit_expr(value);
            if let Some(spec) = format_spec {
                visitor.visit_expr(spec);
            }
        }
        ExprKind::JoinedStr(parts) => {
            for part in parts {
                visitor.visit_expr(part);
            }
        }
        ExprKind::Attribute { value, .. } => visitor.visit_expr(value),
        ExprKind::Subscript { value, slice } => {
            visitor.visit_expr(value);
            visitor.visit_expr(slice);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        ExprKind::Constant(_) | ExprKind::Name(_) => {}
    }
}

/// Shifts every line number in `body` by `offset`, including nested function bodies.
pub fn shift_lines(body: &mut [Stmt], offset: u32) {
    for stmt in body {
        shift_stmt(stmt, offset);
    }
}

fn shift_stmt(stmt: &mut Stmt, offset: u32) {
    stmt.line += offset;
    match &mut stmt.kind {
        StmtKind::FunctionDef(def) => {
            let def = Arc::make_mut(def);
            def.line += offset;
            shift_lines(&mut def.body, offset);
        }
        StmtKind::ClassDef(class) => shift_lines(&mut class.body, offset),
        StmtKind::For { body, orelse, .. }
        | StmtKind::While { body, orelse, .. }
        | StmtKind::If { body, orelse, .. } => {
            shift_lines(body, offset);
            shift_lines(orelse, offset);
        }
        StmtKind::With { body, .. } => shift_lines(body, offset),
        StmtKind::Match { cases, .. } => {
            for case in cases {
                shift_lines(&mut case.body, offset);
            }
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            shift_lines(body, offset);
            for handler in handlers {
                handler.line += offset;
                shift_lines(&mut handler.body, offset);
            }
            shift_lines(orelse, offset);
            shift_lines(finalbody, offset);
        }
        _ => {}
    }
}
