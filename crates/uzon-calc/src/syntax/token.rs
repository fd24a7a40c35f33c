use std::ops::Range;

use strum_macros::{EnumString, IntoStaticStr};

/// Byte range of a token or node in its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[inline]
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// The smallest span covering both `self` and `other`.
    #[inline]
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    #[inline]
    pub fn shifted(self, offset: usize) -> Span {
        Span::new(self.start + offset, self.end + offset)
    }
}

impl From<Span> for Range<usize> {
    #[inline]
    fn from(span: Span) -> Self {
        span.start..span.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
pub enum Keyword {
    #[strum(serialize = "False")]
    False,
    #[strum(serialize = "None")]
    None,
    #[strum(serialize = "True")]
    True,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "as")]
    As,
    #[strum(serialize = "assert")]
    Assert,
    #[strum(serialize = "async")]
    Async,
    #[strum(serialize = "await")]
    Await,
    #[strum(serialize = "break")]
    Break,
    #[strum(serialize = "class")]
    Class,
    #[strum(serialize = "continue")]
    Continue,
    #[strum(serialize = "def")]
    Def,
    #[strum(serialize = "del")]
    Del,
    #[strum(serialize = "elif")]
    Elif,
    #[strum(serialize = "else")]
    Else,
    #[strum(serialize = "except")]
    Except,
    #[strum(serialize = "finally")]
    Finally,
    #[strum(serialize = "for")]
    For,
    #[strum(serialize = "from")]
    From,
    #[strum(serialize = "global")]
    Global,
    #[strum(serialize = "if")]
    If,
    #[strum(serialize = "import")]
    Import,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "is")]
    Is,
    #[strum(serialize = "lambda")]
    Lambda,
    #[strum(serialize = "nonlocal")]
    Nonlocal,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "pass")]
    Pass,
    #[strum(serialize = "raise")]
    Raise,
    #[strum(serialize = "return")]
    Return,
    #[strum(serialize = "try")]
    Try,
    #[strum(serialize = "while")]
    While,
    #[strum(serialize = "with")]
    With,
    #[strum(serialize = "yield")]
    Yield,
}

/// Operators and delimiters, longest spellings first in [`OPERATORS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum Op {
    #[strum(serialize = "**=")]
    PowAssign,
    #[strum(serialize = "//=")]
    FloorDivAssign,
    #[strum(serialize = ">>=")]
    RShiftAssign,
    #[strum(serialize = "<<=")]
    LShiftAssign,
    #[strum(serialize = "...")]
    Ellipsis,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">=")]
    GreaterEqual,
    #[strum(serialize = "==")]
    EqEqual,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "->")]
    Arrow,
    #[strum(serialize = ":=")]
    Walrus,
    #[strum(serialize = "+=")]
    PlusAssign,
    #[strum(serialize = "-=")]
    MinusAssign,
    #[strum(serialize = "*=")]
    StarAssign,
    #[strum(serialize = "/=")]
    SlashAssign,
    #[strum(serialize = "%=")]
    PercentAssign,
    #[strum(serialize = "&=")]
    AmpAssign,
    #[strum(serialize = "|=")]
    PipeAssign,
    #[strum(serialize = "^=")]
    CaretAssign,
    #[strum(serialize = "@=")]
    AtAssign,
    #[strum(serialize = "(")]
    LParen,
    #[strum(serialize = ")")]
    RParen,
    #[strum(serialize = "[")]
    LBracket,
    #[strum(serialize = "]")]
    RBracket,
    #[strum(serialize = "{")]
    LBrace,
    #[strum(serialize = "}")]
    RBrace,
    #[strum(serialize = ",")]
    Comma,
    #[strum(serialize = ":")]
    Colon,
    #[strum(serialize = ".")]
    Dot,
    #[strum(serialize = ";")]
    Semicolon,
    #[strum(serialize = "@")]
    At,
    #[strum(serialize = "=")]
    Assign,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "*")]
    Star,
    #[strum(serialize = "/")]
    Slash,
    #[strum(serialize = "%")]
    Percent,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = "~")]
    Tilde,
    #[strum(serialize = "&")]
    Amp,
    #[strum(serialize = "|")]
    Pipe,
    #[strum(serialize = "^")]
    Caret,
}

pub(crate) const OPERATORS: &[Op] = &[
    Op::PowAssign,
    Op::FloorDivAssign,
    Op::RShiftAssign,
    Op::LShiftAssign,
    Op::Ellipsis,
    Op::Pow,
    Op::FloorDiv,
    Op::LShift,
    Op::RShift,
    Op::LessEqual,
    Op::GreaterEqual,
    Op::EqEqual,
    Op::NotEqual,
    Op::Arrow,
    Op::Walrus,
    Op::PlusAssign,
    Op::MinusAssign,
    Op::StarAssign,
    Op::SlashAssign,
    Op::PercentAssign,
    Op::AmpAssign,
    Op::PipeAssign,
    Op::CaretAssign,
    Op::AtAssign,
    Op::LParen,
    Op::RParen,
    Op::LBracket,
    Op::RBracket,
    Op::LBrace,
    Op::RBrace,
    Op::Comma,
    Op::Colon,
    Op::Dot,
    Op::Semicolon,
    Op::At,
    Op::Assign,
    Op::Plus,
    Op::Minus,
    Op::Star,
    Op::Slash,
    Op::Percent,
    Op::Less,
    Op::Greater,
    Op::Tilde,
    Op::Amp,
    Op::Pipe,
    Op::Caret,
];

impl Op {
    #[inline]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// One piece of an f-string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPiece {
    /// Literal text with escapes and doubled braces already resolved.
    Literal(String),
    /// A replacement field `{expr!conv:spec}`.
    Field {
        /// The expression source, verbatim.
        expr: String,
        /// Byte offset of `expr` in the enclosing source.
        offset: usize,
        conversion: Option<char>,
        spec: Option<Vec<FStringPiece>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// End of input.
    Eoi,
    Newline,
    Indent,
    Dedent,
    Name(Box<str>),
    Int(i64),
    Float(f64),
    Str(String),
    FString(Vec<FStringPiece>),
    Keyword(Keyword),
    Op(Op),
}

impl Token {
    /// A short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Eoi => "end of input".to_string(),
            Token::Newline => "newline".to_string(),
            Token::Indent => "indent".to_string(),
            Token::Dedent => "dedent".to_string(),
            Token::Name(name) => format!("name '{name}'"),
            Token::Int(_) | Token::Float(_) => "number".to_string(),
            Token::Str(_) | Token::FString(_) => "string".to_string(),
            Token::Keyword(kw) => format!("'{}'", <&str>::from(*kw)),
            Token::Op(op) => format!("'{}'", op.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokSpan {
    pub token: Token,
    pub span: Span,
    /// 1-based line of the token start.
    pub line: u32,
}

impl TokSpan {
    #[inline]
    pub fn new(token: Token, span: Span, line: u32) -> Self {
        TokSpan { token, span, line }
    }
}
