//! Lexer, syntax tree and parser for calculation scripts.

pub mod ast;
mod lexer;
mod parser;
pub mod token;

pub use lexer::tokenize;
pub use parser::{parse_expression, parse_module};
