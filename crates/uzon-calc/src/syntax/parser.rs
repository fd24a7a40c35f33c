use std::sync::Arc;

use super::ast::*;
use super::lexer::tokenize;
use super::token::{FStringPiece, Keyword as Kw, Op, Span, TokSpan, Token};
use crate::error::{ParseErrKind, ParseError};

type PResult<T> = Result<T, ParseError>;

/// Recursive descent parser over a pre-lexed token vector.
pub(crate) struct Parser<'source> {
    tokens: Vec<TokSpan>,
    pos: usize,
    source: &'source str,
}

impl<'source> Parser<'source> {
    pub(crate) fn new(source: &'source str) -> PResult<Self> {
        Ok(Parser {
            tokens: tokenize(source)?,
            pos: 0,
            source,
        })
    }

    /// A parser for an expression embedded in `source` at byte `offset`, reported on
    /// `line`.
    fn embedded(source: &'source str, text: &str, offset: usize, line: u32) -> PResult<Self> {
        let tokens = tokenize(text)
            .map_err(|err| ParseError(err.0.start + offset..err.0.end + offset, err.1))?
            .into_iter()
            .map(|tok| TokSpan::new(tok.token, tok.span.shifted(offset), line))
            .collect();
        Ok(Parser {
            tokens,
            pos: 0,
            source,
        })
    }

    // region token access

    #[inline]
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    #[inline]
    fn peek_nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    #[inline]
    fn current(&self) -> &TokSpan {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    #[inline]
    fn span(&self) -> Span {
        self.current().span
    }

    #[inline]
    fn line(&self) -> u32 {
        self.current().line
    }

    fn prev_end(&self) -> usize {
        match self.pos.checked_sub(1) {
            Some(idx) => self.tokens[idx].span.end,
            None => 0,
        }
    }

    fn since(&self, start: Span) -> Span {
        Span::new(start.start, self.prev_end().max(start.start))
    }

    fn advance(&mut self) -> TokSpan {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_op(&self, op: Op) -> bool {
        matches!(self.peek(), Token::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: Kw) -> bool {
        matches!(self.peek(), Token::Keyword(k) if *k == kw)
    }

    fn at_soft_kw(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Name(name) if &**name == word)
    }

    fn eat_op(&mut self, op: Op) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Kw) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        let tok = self.current();
        let kind = match tok.token {
            Token::Eoi => ParseErrKind::UnexpectedEof(expected),
            Token::Indent => ParseErrKind::UnexpectedIndent,
            _ => ParseErrKind::UnexpectedToken {
                expected,
                got: tok.token.describe().into_boxed_str(),
            },
        };
        ParseError(tok.span.into(), kind)
    }

    fn expect_op(&mut self, op: Op, expected: &'static str) -> PResult<Span> {
        if self.at_op(op) {
            Ok(self.advance().span)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_kw(&mut self, kw: Kw, expected: &'static str) -> PResult<Span> {
        if self.at_kw(kw) {
            Ok(self.advance().span)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_name(&mut self, expected: &'static str) -> PResult<String> {
        match self.peek() {
            Token::Name(name) => {
                let name = name.to_string();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expect_newline(&mut self) -> PResult<()> {
        match self.peek() {
            Token::Newline => {
                self.advance();
                Ok(())
            }
            Token::Eoi => Ok(()),
            _ => Err(self.unexpected("end of line")),
        }
    }

    // endregion

    // region statements

    pub(crate) fn parse_module(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Token::Eoi => return Ok(body),
                Token::Newline => {
                    self.advance();
                }
                _ => self.parse_statement(&mut body)?,
            }
        }
    }

    fn parse_statement(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        let start = self.span();
        let line = self.line();
        let kind = match self.peek() {
            Token::Keyword(Kw::If) => {
                self.advance();
                self.parse_if_rest()?
            }
            Token::Keyword(Kw::While) => {
                self.advance();
                let test = self.parse_named_expr()?;
                let body = self.parse_block()?;
                let orelse = self.parse_else_block()?;
                StmtKind::While { test, body, orelse }
            }
            Token::Keyword(Kw::For) => {
                self.advance();
                self.parse_for_rest(false)?
            }
            Token::Keyword(Kw::Try) => {
                self.advance();
                self.parse_try_rest()?
            }
            Token::Keyword(Kw::With) => {
                self.advance();
                self.parse_with_rest(false)?
            }
            Token::Keyword(Kw::Def) => {
                self.advance();
                self.parse_def_rest(Vec::new(), false, start, line)?
            }
            Token::Keyword(Kw::Class) => {
                self.advance();
                self.parse_class_rest(Vec::new())?
            }
            Token::Keyword(Kw::Async) => {
                self.advance();
                match self.peek() {
                    Token::Keyword(Kw::Def) => {
                        self.advance();
                        self.parse_def_rest(Vec::new(), true, start, line)?
                    }
                    Token::Keyword(Kw::For) => {
                        self.advance();
                        self.parse_for_rest(true)?
                    }
                    Token::Keyword(Kw::With) => {
                        self.advance();
                        self.parse_with_rest(true)?
                    }
                    _ => return Err(self.unexpected("'def', 'for' or 'with' after 'async'")),
                }
            }
            Token::Op(Op::At) => self.parse_decorated(start)?,
            Token::Name(name) if &**name == "match" => match self.try_parse_match()? {
                Some(kind) => kind,
                None => return self.parse_simple_line(out),
            },
            Token::Indent => return Err(self.unexpected("statement")),
            _ => return self.parse_simple_line(out),
        };
        out.push(Stmt::new(kind, self.since(start), line));
        Ok(())
    }

    /// Small statements separated by `;`, terminated by a newline.
    fn parse_simple_line(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        loop {
            let start = self.span();
            let line = self.line();
            let kind = self.parse_small_statement()?;
            out.push(Stmt::new(kind, self.since(start), line));
            if !self.eat_op(Op::Semicolon) {
                break;
            }
            if matches!(self.peek(), Token::Newline | Token::Eoi) {
                break;
            }
        }
        self.expect_newline()
    }

    fn parse_small_statement(&mut self) -> PResult<StmtKind> {
        let kind = match self.peek() {
            Token::Keyword(Kw::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            Token::Keyword(Kw::Break) => {
                self.advance();
                StmtKind::Break
            }
            Token::Keyword(Kw::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            Token::Keyword(Kw::Return) => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_star_expressions()?))
                }
            }
            Token::Keyword(Kw::Raise) => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Raise {
                        exc: None,
                        cause: None,
                    }
                } else {
                    let exc = self.parse_test()?;
                    let cause = if self.eat_kw(Kw::From) {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    StmtKind::Raise {
                        exc: Some(exc),
                        cause,
                    }
                }
            }
            Token::Keyword(Kw::Global) => {
                self.advance();
                StmtKind::Global(self.parse_name_list()?)
            }
            Token::Keyword(Kw::Nonlocal) => {
                self.advance();
                StmtKind::Nonlocal(self.parse_name_list()?)
            }
            Token::Keyword(Kw::Del) => {
                self.advance();
                let mut targets = vec![self.parse_target()?];
                while self.eat_op(Op::Comma) {
                    if self.at_statement_end() {
                        break;
                    }
                    targets.push(self.parse_target()?);
                }
                StmtKind::Delete(targets)
            }
            Token::Keyword(Kw::Assert) => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat_op(Op::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Token::Keyword(Kw::Import) => {
                self.advance();
                let mut names = vec![self.parse_dotted_alias()?];
                while self.eat_op(Op::Comma) {
                    names.push(self.parse_dotted_alias()?);
                }
                StmtKind::Import(names)
            }
            Token::Keyword(Kw::From) => {
                self.advance();
                self.parse_from_import_rest()?
            }
            _ => self.parse_expression_statement()?,
        };
        Ok(kind)
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            Token::Newline | Token::Eoi | Token::Op(Op::Semicolon)
        )
    }

    fn parse_name_list(&mut self) -> PResult<Vec<String>> {
        let mut names = vec![self.expect_name("name")?];
        while self.eat_op(Op::Comma) {
            names.push(self.expect_name("name")?);
        }
        Ok(names)
    }

    fn parse_dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name("module name")?;
        while self.eat_op(Op::Dot) {
            name.push('.');
            name.push_str(&self.expect_name("name after '.'")?);
        }
        Ok(name)
    }

    fn parse_dotted_alias(&mut self) -> PResult<Alias> {
        let name = self.parse_dotted_name()?;
        let asname = if self.eat_kw(Kw::As) {
            Some(self.expect_name("name after 'as'")?)
        } else {
            None
        };
        Ok(Alias { name, asname })
    }

    fn parse_from_import_rest(&mut self) -> PResult<StmtKind> {
        let mut level = 0;
        loop {
            if self.eat_op(Op::Dot) {
                level += 1;
            } else if self.eat_op(Op::Ellipsis) {
                level += 3;
            } else {
                break;
            }
        }
        let module = if self.at_kw(Kw::Import) {
            String::new()
        } else {
            self.parse_dotted_name()?
        };
        self.expect_kw(Kw::Import, "'import'")?;
        let mut names = Vec::new();
        if self.eat_op(Op::Star) {
            names.push(Alias {
                name: "*".to_string(),
                asname: None,
            });
        } else {
            let parenthesized = self.eat_op(Op::LParen);
            loop {
                let name = self.expect_name("imported name")?;
                let asname = if self.eat_kw(Kw::As) {
                    Some(self.expect_name("name after 'as'")?)
                } else {
                    None
                };
                names.push(Alias { name, asname });
                if !self.eat_op(Op::Comma) {
                    break;
                }
                if parenthesized && self.at_op(Op::RParen) {
                    break;
                }
            }
            if parenthesized {
                self.expect_op(Op::RParen, "')'")?;
            }
        }
        Ok(StmtKind::ImportFrom {
            module,
            names,
            level,
        })
    }

    fn parse_expression_statement(&mut self) -> PResult<StmtKind> {
        let first = self.parse_star_expressions_or_yield()?;
        if self.at_op(Op::Assign) {
            let mut exprs = vec![first];
            while self.eat_op(Op::Assign) {
                exprs.push(self.parse_star_expressions_or_yield()?);
            }
            let value = exprs.pop().ok_or_else(|| self.unexpected("expression"))?;
            for target in &exprs {
                check_target(target)?;
            }
            return Ok(StmtKind::Assign {
                targets: exprs,
                value,
            });
        }
        if let Token::Op(op) = *self.peek() {
            if let Some(bin) = augmented_op(op) {
                self.advance();
                check_single_target(&first)?;
                let value = self.parse_star_expressions_or_yield()?;
                return Ok(StmtKind::AugAssign {
                    target: first,
                    op: bin,
                    value,
                });
            }
            if op == Op::Colon {
                self.advance();
                check_single_target(&first)?;
                let annotation = self.parse_test()?;
                let value = if self.eat_op(Op::Assign) {
                    Some(self.parse_star_expressions_or_yield()?)
                } else {
                    None
                };
                return Ok(StmtKind::AnnAssign {
                    target: first,
                    annotation,
                    value,
                });
            }
        }
        Ok(StmtKind::Expr(first))
    }

    /// `':' NEWLINE INDENT stmt+ DEDENT` or `':' simple_stmt`.
    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(Op::Colon, "':'")?;
        let mut body = Vec::new();
        if !matches!(self.peek(), Token::Newline) {
            self.parse_simple_line(&mut body)?;
            return Ok(body);
        }
        self.advance();
        if !matches!(self.peek(), Token::Indent) {
            return Err(self.unexpected("an indented block"));
        }
        self.advance();
        loop {
            match self.peek() {
                Token::Dedent => {
                    self.advance();
                    break;
                }
                Token::Eoi => break,
                Token::Newline => {
                    self.advance();
                }
                _ => self.parse_statement(&mut body)?,
            }
        }
        Ok(body)
    }

    fn parse_else_block(&mut self) -> PResult<Vec<Stmt>> {
        if self.eat_kw(Kw::Else) {
            self.parse_block()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_if_rest(&mut self) -> PResult<StmtKind> {
        let test = self.parse_named_expr()?;
        let body = self.parse_block()?;
        let orelse = if self.at_kw(Kw::Elif) {
            let start = self.span();
            let line = self.line();
            self.advance();
            let kind = self.parse_if_rest()?;
            vec![Stmt::new(kind, self.since(start), line)]
        } else {
            self.parse_else_block()?
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn parse_for_rest(&mut self, is_async: bool) -> PResult<StmtKind> {
        let target = self.parse_target_list()?;
        self.expect_kw(Kw::In, "'in'")?;
        let iter = self.parse_star_expressions()?;
        let body = self.parse_block()?;
        let orelse = self.parse_else_block()?;
        Ok(StmtKind::For {
            target,
            iter,
            body,
            orelse,
            is_async,
        })
    }

    fn parse_try_rest(&mut self) -> PResult<StmtKind> {
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.at_kw(Kw::Except) {
            let line = self.line();
            self.advance();
            let (kind, name) = if self.at_op(Op::Colon) {
                (None, None)
            } else {
                let kind = self.parse_test()?;
                let name = if self.eat_kw(Kw::As) {
                    Some(self.expect_name("name after 'as'")?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let body = self.parse_block()?;
            handlers.push(ExceptHandler {
                kind,
                name,
                body,
                line,
            });
        }
        let orelse = if handlers.is_empty() {
            Vec::new()
        } else {
            self.parse_else_block()?
        };
        let finalbody = if self.eat_kw(Kw::Finally) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.unexpected("'except' or 'finally'"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn parse_with_rest(&mut self, is_async: bool) -> PResult<StmtKind> {
        let mut items = Vec::new();
        loop {
            let context = self.parse_test()?;
            let target = if self.eat_kw(Kw::As) {
                Some(self.parse_target()?)
            } else {
                None
            };
            items.push(WithItem { context, target });
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(StmtKind::With {
            items,
            body,
            is_async,
        })
    }

    fn parse_decorated(&mut self, start: Span) -> PResult<StmtKind> {
        let mut decorators = Vec::new();
        while self.eat_op(Op::At) {
            decorators.push(self.parse_named_expr()?);
            self.expect_newline()?;
        }
        let def_line = self.line();
        match self.peek() {
            Token::Keyword(Kw::Def) => {
                self.advance();
                self.parse_def_rest(decorators, false, start, def_line)
            }
            Token::Keyword(Kw::Async) if matches!(self.peek_nth(1), Token::Keyword(Kw::Def)) => {
                self.advance();
                self.advance();
                self.parse_def_rest(decorators, true, start, def_line)
            }
            Token::Keyword(Kw::Class) => {
                self.advance();
                self.parse_class_rest(decorators)
            }
            _ => Err(self.unexpected("'def' or 'class' after decorators")),
        }
    }

    /// Parses a function definition after its `def` keyword. `line` is the line of `def`.
    fn parse_def_rest(
        &mut self,
        decorators: Vec<Expr>,
        is_async: bool,
        start: Span,
        line: u32,
    ) -> PResult<StmtKind> {
        let name = self.expect_name("function name")?;
        self.expect_op(Op::LParen, "'('")?;
        let params = self.parse_params(Op::RParen, true)?;
        self.expect_op(Op::RParen, "')'")?;
        let returns = if self.eat_op(Op::Arrow) {
            Some(self.parse_test()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(StmtKind::FunctionDef(Arc::new(FunctionDef {
            name,
            params,
            body,
            decorators,
            returns,
            is_async,
            span: self.since(start),
            line,
        })))
    }

    fn parse_class_rest(&mut self, decorators: Vec<Expr>) -> PResult<StmtKind> {
        let name = self.expect_name("class name")?;
        let (bases, keywords) = if self.eat_op(Op::LParen) {
            self.parse_call_args()?
        } else {
            (Vec::new(), Vec::new())
        };
        let body = self.parse_block()?;
        Ok(StmtKind::ClassDef(Box::new(ClassDef {
            name,
            bases,
            keywords,
            body,
            decorators,
        })))
    }

    fn parse_params(&mut self, closing: Op, annotations: bool) -> PResult<Params> {
        let mut params = Params::default();
        let mut keyword_only = false;
        while !self.at_op(closing) {
            if self.eat_op(Op::Slash) {
                // Positional-only marker; every parameter is accepted positionally anyway.
            } else if self.eat_op(Op::Pow) {
                params.kwarg = Some(self.expect_name("parameter name")?);
                self.skip_annotation(annotations)?;
            } else if self.eat_op(Op::Star) {
                keyword_only = true;
                if let Token::Name(_) = self.peek() {
                    params.vararg = Some(self.expect_name("parameter name")?);
                    self.skip_annotation(annotations)?;
                }
            } else {
                let name = self.expect_name("parameter name")?;
                let annotation = if annotations && self.eat_op(Op::Colon) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                let default = if self.eat_op(Op::Assign) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                let param = Param {
                    name,
                    default,
                    annotation,
                };
                if keyword_only {
                    params.kwonly.push(param);
                } else {
                    params.args.push(param);
                }
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn skip_annotation(&mut self, annotations: bool) -> PResult<()> {
        if annotations && self.eat_op(Op::Colon) {
            self.parse_test()?;
        }
        Ok(())
    }

    /// `match` is a soft keyword: when the line does not have the shape of a match
    /// statement the tokens are re-read as an ordinary statement.
    fn try_parse_match(&mut self) -> PResult<Option<StmtKind>> {
        let saved = self.pos;
        self.advance();
        let header = (|| -> PResult<Expr> {
            let subject = self.parse_star_named_expressions()?;
            self.expect_op(Op::Colon, "':'")?;
            if !matches!(self.peek(), Token::Newline)
                || !matches!(self.peek_nth(1), Token::Indent)
                || !matches!(self.peek_nth(2), Token::Name(name) if &**name == "case")
            {
                return Err(self.unexpected("'case' block"));
            }
            self.advance();
            self.advance();
            Ok(subject)
        })();
        let subject = match header {
            Ok(subject) => subject,
            Err(_) => {
                self.pos = saved;
                return Ok(None);
            }
        };
        let mut cases = Vec::new();
        loop {
            match self.peek() {
                Token::Dedent => {
                    self.advance();
                    break;
                }
                Token::Eoi => break,
                Token::Newline => {
                    self.advance();
                }
                _ if self.at_soft_kw("case") => {
                    self.advance();
                    let pattern = self.parse_open_pattern()?;
                    let guard = if self.eat_kw(Kw::If) {
                        Some(self.parse_named_expr()?)
                    } else {
                        None
                    };
                    let body = self.parse_block()?;
                    cases.push(MatchCase {
                        pattern,
                        guard,
                        body,
                    });
                }
                _ => return Err(self.unexpected("'case'")),
            }
        }
        Ok(Some(StmtKind::Match { subject, cases }))
    }

    fn parse_open_pattern(&mut self) -> PResult<Pattern> {
        let first = self.parse_as_pattern()?;
        if !self.at_op(Op::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::Colon) || self.at_kw(Kw::If) {
                break;
            }
            items.push(self.parse_as_pattern()?);
        }
        Ok(Pattern::Sequence(items))
    }

    fn parse_as_pattern(&mut self) -> PResult<Pattern> {
        let mut alternatives = vec![self.parse_closed_pattern()?];
        while self.eat_op(Op::Pipe) {
            alternatives.push(self.parse_closed_pattern()?);
        }
        let pattern = if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            Pattern::Or(alternatives)
        };
        if self.eat_kw(Kw::As) {
            let name = self.expect_name("name after 'as'")?;
            return Ok(Pattern::As(Box::new(pattern), name));
        }
        Ok(pattern)
    }

    fn parse_closed_pattern(&mut self) -> PResult<Pattern> {
        let start = self.span();
        match self.peek().clone() {
            Token::Name(name) => {
                if matches!(self.peek_nth(1), Token::Op(Op::Dot)) {
                    let value = self.parse_primary()?;
                    return Ok(Pattern::Value(value));
                }
                if matches!(self.peek_nth(1), Token::Op(Op::LParen)) {
                    return Err(ParseError(
                        start.into(),
                        ParseErrKind::Unsupported("class patterns"),
                    ));
                }
                self.advance();
                if &*name == "_" {
                    Ok(Pattern::Wildcard)
                } else {
                    Ok(Pattern::Capture(name.to_string()))
                }
            }
            Token::Op(Op::Star) => {
                self.advance();
                let name = self.expect_name("name after '*'")?;
                Ok(Pattern::Star((name != "_").then_some(name)))
            }
            Token::Op(Op::LBracket) => {
                self.advance();
                let items = self.parse_pattern_items(Op::RBracket)?;
                self.expect_op(Op::RBracket, "']'")?;
                Ok(Pattern::Sequence(items))
            }
            Token::Op(Op::LParen) => {
                self.advance();
                if self.eat_op(Op::RParen) {
                    return Ok(Pattern::Sequence(Vec::new()));
                }
                let first = self.parse_as_pattern()?;
                if self.eat_op(Op::RParen) {
                    return Ok(first);
                }
                self.expect_op(Op::Comma, "',' or ')'")?;
                let mut items = vec![first];
                items.extend(self.parse_pattern_items(Op::RParen)?);
                self.expect_op(Op::RParen, "')'")?;
                Ok(Pattern::Sequence(items))
            }
            Token::Op(Op::LBrace) => Err(ParseError(
                start.into(),
                ParseErrKind::Unsupported("mapping patterns"),
            )),
            Token::Op(Op::Minus)
            | Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::Keyword(Kw::None | Kw::True | Kw::False) => {
                let value = self.parse_factor()?;
                Ok(Pattern::Value(value))
            }
            _ => Err(self.unexpected("pattern")),
        }
    }

    fn parse_pattern_items(&mut self, closing: Op) -> PResult<Vec<Pattern>> {
        let mut items = Vec::new();
        while !self.at_op(closing) {
            items.push(self.parse_as_pattern()?);
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        Ok(items)
    }

    // endregion

    // region expressions

    fn parse_star_expressions_or_yield(&mut self) -> PResult<Expr> {
        if self.at_kw(Kw::Yield) {
            self.parse_yield()
        } else {
            self.parse_star_expressions()
        }
    }

    fn parse_yield(&mut self) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        self.expect_kw(Kw::Yield, "'yield'")?;
        if self.eat_kw(Kw::From) {
            let value = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::YieldFrom(Box::new(value)),
                self.since(start),
                line,
            ));
        }
        let value = if self.at_statement_end() || self.at_op(Op::RParen) || self.at_op(Op::Assign)
        {
            None
        } else {
            Some(Box::new(self.parse_star_expressions()?))
        };
        Ok(Expr::new(ExprKind::Yield(value), self.since(start), line))
    }

    /// Comma separated expressions (with `*` unpacking); more than one becomes a tuple.
    fn parse_star_expressions(&mut self) -> PResult<Expr> {
        self.parse_tuple_of(Self::parse_star_expression)
    }

    fn parse_star_named_expressions(&mut self) -> PResult<Expr> {
        self.parse_tuple_of(Self::parse_star_named_expression)
    }

    fn parse_tuple_of(&mut self, item: fn(&mut Self) -> PResult<Expr>) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        let first = item(self)?;
        if !self.at_op(Op::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(item(self)?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), self.since(start), line))
    }

    fn starts_expression(&self) -> bool {
        match self.peek() {
            Token::Name(_)
            | Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::FString(_) => true,
            Token::Keyword(kw) => matches!(
                kw,
                Kw::None | Kw::True | Kw::False | Kw::Not | Kw::Lambda | Kw::Await
            ),
            Token::Op(op) => matches!(
                op,
                Op::LParen
                    | Op::LBracket
                    | Op::LBrace
                    | Op::Minus
                    | Op::Plus
                    | Op::Tilde
                    | Op::Star
                    | Op::Ellipsis
            ),
            _ => false,
        }
    }

    fn parse_star_expression(&mut self) -> PResult<Expr> {
        if self.at_op(Op::Star) {
            let start = self.span();
            let line = self.line();
            self.advance();
            let value = self.parse_bitor()?;
            return Ok(Expr::new(
                ExprKind::Starred(Box::new(value)),
                self.since(start),
                line,
            ));
        }
        self.parse_test()
    }

    fn parse_star_named_expression(&mut self) -> PResult<Expr> {
        if self.at_op(Op::Star) {
            return self.parse_star_expression();
        }
        self.parse_named_expr()
    }

    /// `name := test` or a plain test.
    fn parse_named_expr(&mut self) -> PResult<Expr> {
        if matches!(self.peek(), Token::Name(_)) && matches!(self.peek_nth(1), Token::Op(Op::Walrus))
        {
            let start = self.span();
            let line = self.line();
            let name = self.expect_name("name")?;
            let target = Expr::name(name, start, line);
            self.advance();
            let value = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::NamedExpr {
                    target: Box::new(target),
                    value: Box::new(value),
                },
                self.since(start),
                line,
            ));
        }
        self.parse_test()
    }

    /// A full expression: lambda or conditional expression.
    pub(crate) fn parse_test(&mut self) -> PResult<Expr> {
        if self.at_kw(Kw::Lambda) {
            return self.parse_lambda();
        }
        let start = self.span();
        let line = self.line();
        let body = self.parse_or()?;
        if self.at_kw(Kw::If) {
            self.advance();
            let test = self.parse_or()?;
            self.expect_kw(Kw::Else, "'else'")?;
            let orelse = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                self.since(start),
                line,
            ));
        }
        Ok(body)
    }

    fn parse_test_no_cond(&mut self) -> PResult<Expr> {
        if self.at_kw(Kw::Lambda) {
            return self.parse_lambda();
        }
        self.parse_or()
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        self.expect_kw(Kw::Lambda, "'lambda'")?;
        let params = self.parse_params(Op::Colon, false)?;
        self.expect_op(Op::Colon, "':'")?;
        let body = self.parse_test()?;
        Ok(Expr::new(
            ExprKind::Lambda(Arc::new(Lambda { params, body })),
            self.since(start),
            line,
        ))
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        self.parse_bool_chain(Kw::Or, BoolOp::Or, Self::parse_and)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        self.parse_bool_chain(Kw::And, BoolOp::And, Self::parse_not)
    }

    fn parse_bool_chain(
        &mut self,
        kw: Kw,
        op: BoolOp,
        operand: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        let first = operand(self)?;
        if !self.at_kw(kw) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(kw) {
            values.push(operand(self)?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp { op, values },
            self.since(start),
            line,
        ))
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.at_kw(Kw::Not) {
            let start = self.span();
            let line = self.line();
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                self.since(start),
                line,
            ));
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek() {
            Token::Op(Op::EqEqual) => CmpOp::Eq,
            Token::Op(Op::NotEqual) => CmpOp::NotEq,
            Token::Op(Op::Less) => CmpOp::Lt,
            Token::Op(Op::LessEqual) => CmpOp::LtE,
            Token::Op(Op::Greater) => CmpOp::Gt,
            Token::Op(Op::GreaterEqual) => CmpOp::GtE,
            Token::Keyword(Kw::In) => CmpOp::In,
            Token::Keyword(Kw::Is) => {
                if matches!(self.peek_nth(1), Token::Keyword(Kw::Not)) {
                    self.advance();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            Token::Keyword(Kw::Not) if matches!(self.peek_nth(1), Token::Keyword(Kw::In)) => {
                self.advance();
                CmpOp::NotIn
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            self.since(start),
            line,
        ))
    }

    fn parse_binary_level(
        &mut self,
        operand: fn(&mut Self) -> PResult<Expr>,
        op_for: fn(&Token) -> Option<BinOp>,
    ) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        let mut left = operand(self)?;
        while let Some(op) = op_for(self.peek()) {
            self.advance();
            let right = operand(self)?;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                self.since(start),
                line,
            );
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_bitxor, |tok| {
            matches!(tok, Token::Op(Op::Pipe)).then_some(BinOp::BitOr)
        })
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_bitand, |tok| {
            matches!(tok, Token::Op(Op::Caret)).then_some(BinOp::BitXor)
        })
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_shift, |tok| {
            matches!(tok, Token::Op(Op::Amp)).then_some(BinOp::BitAnd)
        })
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_arith, |tok| match tok {
            Token::Op(Op::LShift) => Some(BinOp::LShift),
            Token::Op(Op::RShift) => Some(BinOp::RShift),
            _ => None,
        })
    }

    fn parse_arith(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_term, |tok| match tok {
            Token::Op(Op::Plus) => Some(BinOp::Add),
            Token::Op(Op::Minus) => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        self.parse_binary_level(Self::parse_factor, |tok| match tok {
            Token::Op(Op::Star) => Some(BinOp::Mult),
            Token::Op(Op::At) => Some(BinOp::MatMult),
            Token::Op(Op::Slash) => Some(BinOp::Div),
            Token::Op(Op::Percent) => Some(BinOp::Mod),
            Token::Op(Op::FloorDiv) => Some(BinOp::FloorDiv),
            _ => None,
        })
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Token::Op(Op::Plus) => UnaryOp::UAdd,
            Token::Op(Op::Minus) => UnaryOp::USub,
            Token::Op(Op::Tilde) => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        let start = self.span();
        let line = self.line();
        self.advance();
        let operand = self.parse_factor()?;
        Ok(Expr::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            self.since(start),
            line,
        ))
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        let base = self.parse_await_primary()?;
        if self.eat_op(Op::Pow) {
            let exponent = self.parse_factor()?;
            return Ok(Expr::new(
                ExprKind::BinOp {
                    left: Box::new(base),
                    op: BinOp::Pow,
                    right: Box::new(exponent),
                },
                self.since(start),
                line,
            ));
        }
        Ok(base)
    }

    fn parse_await_primary(&mut self) -> PResult<Expr> {
        if self.at_kw(Kw::Await) {
            let start = self.span();
            let line = self.line();
            self.advance();
            let value = self.parse_primary()?;
            return Ok(Expr::new(
                ExprKind::Await(Box::new(value)),
                self.since(start),
                line,
            ));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Token::Op(Op::Dot) => {
                    self.advance();
                    let attr = self.expect_name("attribute name")?;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        self.since(start),
                        line,
                    );
                }
                Token::Op(Op::LParen) => {
                    self.advance();
                    let (args, keywords) = self.parse_call_args()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            keywords,
                        },
                        self.since(start),
                        line,
                    );
                }
                Token::Op(Op::LBracket) => {
                    self.advance();
                    let slice = self.parse_subscript()?;
                    self.expect_op(Op::RBracket, "']'")?;
                    expr = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            slice: Box::new(slice),
                        },
                        self.since(start),
                        line,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Arguments after an opening parenthesis, consuming the closing one.
    fn parse_call_args(&mut self) -> PResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while !self.at_op(Op::RParen) {
            let start = self.span();
            let line = self.line();
            if self.eat_op(Op::Pow) {
                let value = self.parse_test()?;
                keywords.push(Keyword { arg: None, value });
            } else if self.at_op(Op::Star) {
                args.push(self.parse_star_expression()?);
            } else if matches!(self.peek(), Token::Name(_))
                && matches!(self.peek_nth(1), Token::Op(Op::Assign))
            {
                let arg = self.expect_name("keyword")?;
                self.advance();
                let value = self.parse_test()?;
                keywords.push(Keyword {
                    arg: Some(arg),
                    value,
                });
            } else {
                let value = self.parse_named_expr()?;
                if self.at_kw(Kw::For) || self.at_kw(Kw::Async) {
                    let generators = self.parse_comprehension_clauses()?;
                    args.push(Expr::new(
                        ExprKind::GeneratorExp {
                            elt: Box::new(value),
                            generators,
                        },
                        self.since(start),
                        line,
                    ));
                } else {
                    args.push(value);
                }
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        self.expect_op(Op::RParen, "')'")?;
        Ok((args, keywords))
    }

    fn parse_subscript(&mut self) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        let first = self.parse_slice_item()?;
        if !self.at_op(Op::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), self.since(start), line))
    }

    fn parse_slice_item(&mut self) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        if self.at_op(Op::Star) {
            return self.parse_star_expression();
        }
        let lower = if self.at_op(Op::Colon) {
            None
        } else {
            let expr = self.parse_named_expr()?;
            if !self.at_op(Op::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(Op::Colon, "':'")?;
        let upper = if self.at_op(Op::Colon) || self.at_op(Op::Comma) || self.at_op(Op::RBracket)
        {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat_op(Op::Colon) {
            if self.at_op(Op::Comma) || self.at_op(Op::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_test()?))
            }
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Slice { lower, upper, step },
            self.since(start),
            line,
        ))
    }

    fn parse_comprehension_clauses(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        loop {
            let is_async = if self.at_kw(Kw::Async) && matches!(self.peek_nth(1), Token::Keyword(Kw::For))
            {
                self.advance();
                true
            } else {
                false
            };
            if !self.eat_kw(Kw::For) {
                break;
            }
            let target = self.parse_target_list()?;
            self.expect_kw(Kw::In, "'in'")?;
            let iter = self.parse_or()?;
            let mut ifs = Vec::new();
            while self.eat_kw(Kw::If) {
                ifs.push(self.parse_test_no_cond()?);
            }
            generators.push(Comprehension {
                target,
                iter,
                ifs,
                is_async,
            });
        }
        Ok(generators)
    }

    /// Assignment targets of `for` loops and comprehensions: `a`, `a, b`, `(a, *b)`.
    fn parse_target_list(&mut self) -> PResult<Expr> {
        let expr = self.parse_tuple_of(Self::parse_target)?;
        check_target(&expr)?;
        Ok(expr)
    }

    fn parse_target(&mut self) -> PResult<Expr> {
        if self.at_op(Op::Star) {
            let start = self.span();
            let line = self.line();
            self.advance();
            let value = self.parse_bitor()?;
            return Ok(Expr::new(
                ExprKind::Starred(Box::new(value)),
                self.since(start),
                line,
            ));
        }
        self.parse_bitor()
    }

    fn parse_atom(&mut self) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        let kind = match self.peek().clone() {
            Token::Name(name) => {
                self.advance();
                ExprKind::Name(name.to_string())
            }
            Token::Int(value) => {
                self.advance();
                ExprKind::Constant(Constant::Int(value))
            }
            Token::Float(value) => {
                self.advance();
                ExprKind::Constant(Constant::Float(value))
            }
            Token::Str(_) | Token::FString(_) => return self.parse_strings(),
            Token::Keyword(Kw::None) => {
                self.advance();
                ExprKind::Constant(Constant::None)
            }
            Token::Keyword(Kw::True) => {
                self.advance();
                ExprKind::Constant(Constant::Bool(true))
            }
            Token::Keyword(Kw::False) => {
                self.advance();
                ExprKind::Constant(Constant::Bool(false))
            }
            Token::Op(Op::Ellipsis) => {
                self.advance();
                ExprKind::Constant(Constant::Ellipsis)
            }
            Token::Op(Op::LParen) => {
                self.advance();
                return self.parse_paren_rest(start, line);
            }
            Token::Op(Op::LBracket) => {
                self.advance();
                self.parse_list_rest()?
            }
            Token::Op(Op::LBrace) => {
                self.advance();
                self.parse_brace_rest()?
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, self.since(start), line))
    }

    fn parse_paren_rest(&mut self, start: Span, line: u32) -> PResult<Expr> {
        if self.eat_op(Op::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), self.since(start), line));
        }
        if self.at_kw(Kw::Yield) {
            let value = self.parse_yield()?;
            self.expect_op(Op::RParen, "')'")?;
            return Ok(value);
        }
        let first = self.parse_star_named_expression()?;
        if self.at_kw(Kw::For) || self.at_kw(Kw::Async) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect_op(Op::RParen, "')'")?;
            return Ok(Expr::new(
                ExprKind::GeneratorExp {
                    elt: Box::new(first),
                    generators,
                },
                self.since(start),
                line,
            ));
        }
        if self.eat_op(Op::RParen) {
            // Parentheses only group; the inner node keeps its own span.
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RParen) {
                break;
            }
            items.push(self.parse_star_named_expression()?);
        }
        self.expect_op(Op::RParen, "')'")?;
        Ok(Expr::new(ExprKind::Tuple(items), self.since(start), line))
    }

    fn parse_list_rest(&mut self) -> PResult<ExprKind> {
        if self.eat_op(Op::RBracket) {
            return Ok(ExprKind::List(Vec::new()));
        }
        let first = self.parse_star_named_expression()?;
        if self.at_kw(Kw::For) || self.at_kw(Kw::Async) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect_op(Op::RBracket, "']'")?;
            return Ok(ExprKind::ListComp {
                elt: Box::new(first),
                generators,
            });
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBracket) {
                break;
            }
            items.push(self.parse_star_named_expression()?);
        }
        self.expect_op(Op::RBracket, "']'")?;
        Ok(ExprKind::List(items))
    }

    fn parse_brace_rest(&mut self) -> PResult<ExprKind> {
        if self.eat_op(Op::RBrace) {
            return Ok(ExprKind::Dict {
                keys: Vec::new(),
                values: Vec::new(),
            });
        }
        let (first_key, first_value) = if self.eat_op(Op::Pow) {
            (None, Some(self.parse_bitor()?))
        } else {
            let item = self.parse_star_named_expression()?;
            if self.eat_op(Op::Colon) {
                (Some(item), Some(self.parse_test()?))
            } else {
                (Some(item), None)
            }
        };

        let Some(first_value) = first_value else {
            // A set display or set comprehension.
            let Some(first) = first_key else {
                return Err(self.unexpected("set element"));
            };
            if self.at_kw(Kw::For) || self.at_kw(Kw::Async) {
                let generators = self.parse_comprehension_clauses()?;
                self.expect_op(Op::RBrace, "'}'")?;
                return Ok(ExprKind::SetComp {
                    elt: Box::new(first),
                    generators,
                });
            }
            let mut items = vec![first];
            while self.eat_op(Op::Comma) {
                if self.at_op(Op::RBrace) {
                    break;
                }
                items.push(self.parse_star_named_expression()?);
            }
            self.expect_op(Op::RBrace, "'}'")?;
            return Ok(ExprKind::Set(items));
        };

        if let Some(key) = &first_key {
            if self.at_kw(Kw::For) || self.at_kw(Kw::Async) {
                let generators = self.parse_comprehension_clauses()?;
                self.expect_op(Op::RBrace, "'}'")?;
                return Ok(ExprKind::DictComp {
                    key: Box::new(key.clone()),
                    value: Box::new(first_value),
                    generators,
                });
            }
        }
        let mut keys = vec![first_key];
        let mut values = vec![first_value];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBrace) {
                break;
            }
            if self.eat_op(Op::Pow) {
                keys.push(None);
                values.push(self.parse_bitor()?);
            } else {
                keys.push(Some(self.parse_test()?));
                self.expect_op(Op::Colon, "':'")?;
                values.push(self.parse_test()?);
            }
        }
        self.expect_op(Op::RBrace, "'}'")?;
        Ok(ExprKind::Dict { keys, values })
    }

    /// Adjacent string literals concatenate; any f-string part makes the result a
    /// joined string.
    fn parse_strings(&mut self) -> PResult<Expr> {
        let start = self.span();
        let line = self.line();
        let mut parts: Vec<Expr> = Vec::new();
        let mut is_fstring = false;
        loop {
            let tok = self.current().clone();
            match tok.token {
                Token::Str(text) => {
                    self.advance();
                    push_literal(&mut parts, text, tok.span, line);
                }
                Token::FString(pieces) => {
                    self.advance();
                    is_fstring = true;
                    self.push_fstring_pieces(&mut parts, &pieces, tok.span, line)?;
                }
                _ => break,
            }
        }
        let span = self.since(start);
        if !is_fstring {
            let text = match parts.pop() {
                Some(Expr {
                    kind: ExprKind::Constant(Constant::Str(text)),
                    ..
                }) => text,
                _ => String::new(),
            };
            return Ok(Expr::new(ExprKind::Constant(Constant::Str(text)), span, line));
        }
        Ok(Expr::new(ExprKind::JoinedStr(parts), span, line))
    }

    fn push_fstring_pieces(
        &self,
        parts: &mut Vec<Expr>,
        pieces: &[FStringPiece],
        span: Span,
        line: u32,
    ) -> PResult<()> {
        for piece in pieces {
            match piece {
                FStringPiece::Literal(text) => push_literal(parts, text.clone(), span, line),
                FStringPiece::Field {
                    expr,
                    offset,
                    conversion,
                    spec,
                } => {
                    let value = parse_embedded_expr(self.source, expr, *offset, line)?;
                    let format_spec = match spec {
                        Some(spec) => {
                            let mut spec_parts = Vec::new();
                            self.push_fstring_pieces(&mut spec_parts, spec, span, line)?;
                            Some(Box::new(Expr::new(ExprKind::JoinedStr(spec_parts), span, line)))
                        }
                        None => None,
                    };
                    let field_span = Span::new(*offset, *offset + expr.len());
                    parts.push(Expr::new(
                        ExprKind::FormattedValue {
                            value: Box::new(value),
                            conversion: *conversion,
                            format_spec,
                        },
                        field_span,
                        line,
                    ));
                }
            }
        }
        Ok(())
    }

    // endregion
}

fn push_literal(parts: &mut Vec<Expr>, text: String, span: Span, line: u32) {
    if let Some(Expr {
        kind: ExprKind::Constant(Constant::Str(prev)),
        span: prev_span,
        ..
    }) = parts.last_mut()
    {
        prev.push_str(&text);
        *prev_span = prev_span.to(span);
        return;
    }
    parts.push(Expr::new(ExprKind::Constant(Constant::Str(text)), span, line));
}

fn parse_embedded_expr(source: &str, text: &str, offset: usize, line: u32) -> PResult<Expr> {
    let mut parser = Parser::embedded(source, text, offset, line)?;
    let expr = parser.parse_star_named_expressions()?;
    match parser.peek() {
        Token::Newline | Token::Eoi => Ok(expr),
        _ => Err(parser.unexpected("end of f-string expression")),
    }
}

fn augmented_op(op: Op) -> Option<BinOp> {
    Some(match op {
        Op::PlusAssign => BinOp::Add,
        Op::MinusAssign => BinOp::Sub,
        Op::StarAssign => BinOp::Mult,
        Op::SlashAssign => BinOp::Div,
        Op::PercentAssign => BinOp::Mod,
        Op::PowAssign => BinOp::Pow,
        Op::FloorDivAssign => BinOp::FloorDiv,
        Op::AmpAssign => BinOp::BitAnd,
        Op::PipeAssign => BinOp::BitOr,
        Op::CaretAssign => BinOp::BitXor,
        Op::LShiftAssign => BinOp::LShift,
        Op::RShiftAssign => BinOp::RShift,
        Op::AtAssign => BinOp::MatMult,
        _ => return None,
    })
}

fn check_target(expr: &Expr) -> PResult<()> {
    match &expr.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Starred(inner) => check_target(inner),
        ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().try_for_each(check_target),
        other => Err(ParseError(
            expr.span.into(),
            ParseErrKind::InvalidAssignTarget(other.node_kind().as_str()),
        )),
    }
}

fn check_single_target(expr: &Expr) -> PResult<()> {
    match &expr.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        other => Err(ParseError(
            expr.span.into(),
            ParseErrKind::InvalidAssignTarget(other.node_kind().as_str()),
        )),
    }
}

/// Parses a whole script module.
pub fn parse_module(source: &str) -> Result<Vec<Stmt>, ParseError> {
    Parser::new(source)?.parse_module()
}

/// Parses a single expression, such as the right-hand side of an assignment.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(source)?;
    let expr = parser.parse_star_expressions()?;
    match parser.peek() {
        Token::Newline | Token::Eoi => Ok(expr),
        _ => Err(parser.unexpected("end of expression")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        parse_expression(source).unwrap()
    }

    fn stmts(source: &str) -> Vec<Stmt> {
        parse_module(source).unwrap()
    }

    /// Fully parenthesized rendering for precedence checks.
    fn sexp(expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Name(name) => name.clone(),
            ExprKind::Constant(Constant::Int(v)) => v.to_string(),
            ExprKind::Constant(Constant::Float(v)) => format!("{v:?}"),
            ExprKind::Constant(Constant::Str(s)) => format!("{s:?}"),
            ExprKind::Constant(c) => format!("{c:?}"),
            ExprKind::BinOp { left, op, right } => {
                format!("({} {} {})", sexp(left), op.as_str(), sexp(right))
            }
            ExprKind::UnaryOp { op, operand } => {
                format!("({} {})", <&str>::from(*op), sexp(operand))
            }
            ExprKind::BoolOp { op, values } => format!(
                "({} {})",
                <&str>::from(*op),
                values.iter().map(sexp).collect::<Vec<_>>().join(" ")
            ),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut out = format!("(cmp {}", sexp(left));
                for (op, right) in ops.iter().zip(comparators) {
                    out.push_str(&format!(" {} {}", <&str>::from(*op), sexp(right)));
                }
                out.push(')');
                out
            }
            ExprKind::Attribute { value, attr } => format!("{}.{attr}", sexp(value)),
            ExprKind::Call { func, args, .. } => format!(
                "{}({})",
                sexp(func),
                args.iter().map(sexp).collect::<Vec<_>>().join(", ")
            ),
            ExprKind::Subscript { value, slice } => format!("{}[{}]", sexp(value), sexp(slice)),
            ExprKind::Tuple(items) => format!(
                "(tuple {})",
                items.iter().map(sexp).collect::<Vec<_>>().join(" ")
            ),
            other => other.node_kind().as_str().to_string(),
        }
    }

    #[test]
    fn operator_precedence() {
        let cases = [
            ("1 + 2 * 3", "(1 + (2 * 3))"),
            ("a - b - c", "((a - b) - c)"),
            ("-x ** 2", "(- (x ** 2))"),
            ("2 ** 3 ** 2", "(2 ** (3 ** 2))"),
            ("a / (b + c)", "(a / (b + c))"),
            ("not a and b or c", "(or (and (not a) b) c)"),
            ("a < b <= c", "(cmp a < b <= c)"),
            ("x not in y", "(cmp x not in y)"),
            ("x is not None", "(cmp x is not None)"),
            ("10 * unit.meter / unit.second ** 2", "((10 * unit.meter) / (unit.second ** 2))"),
            ("f(a, b)[0].c", "f(a, b)[0].c"),
            ("arr[0, 1]", "arr[(tuple 0 1)]"),
            ("a // b % c", "((a // b) % c)"),
        ];
        for (source, expected) in cases {
            assert_eq!(sexp(&expr(source)), expected, "source: {source}");
        }
    }

    #[test]
    fn spans_cover_source_text() {
        let source = "y = x / (a + b)";
        let body = stmts(source);
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(&source[value.span.start..value.span.end], "x / (a + b)");
        let ExprKind::BinOp { right, .. } = &value.kind else {
            panic!("expected binop");
        };
        assert_eq!(&source[right.span.start..right.span.end], "a + b");
    }

    #[test]
    fn assignment_forms() {
        let body = stmts("a = b = 1\nx, y = 1, 2\nz += 3\nw: float = 2.5\n");
        assert!(matches!(&body[0].kind, StmtKind::Assign { targets, .. } if targets.len() == 2));
        assert!(
            matches!(&body[1].kind, StmtKind::Assign { targets, .. } if matches!(targets[0].kind, ExprKind::Tuple(_)))
        );
        assert!(matches!(&body[2].kind, StmtKind::AugAssign { op: BinOp::Add, .. }));
        assert!(matches!(&body[3].kind, StmtKind::AnnAssign { value: Some(_), .. }));
    }

    #[test]
    fn invalid_assignment_target() {
        let err = parse_module("f() = 1").unwrap_err();
        assert!(matches!(err.1, ParseErrKind::InvalidAssignTarget("Call")));
    }

    #[test]
    fn compound_statements_and_lines() {
        let source = "\
@uzon_calc()
async def sheet():
    if a:
        b = 1
    elif c:
        pass
    else:
        d = 2
    for i in range(3):
        continue
    while False:
        break
    try:
        x = 1
    except ValueError as e:
        raise
    finally:
        pass
";
        let body = stmts(source);
        assert_eq!(body.len(), 1);
        let StmtKind::FunctionDef(def) = &body[0].kind else {
            panic!("expected a function");
        };
        assert!(def.is_async);
        assert_eq!(def.line, 2);
        assert_eq!(body[0].line, 1);
        assert_eq!(def.decorators.len(), 1);
        assert_eq!(def.body.len(), 4);
        assert_eq!(def.body[1].line, 9);
        let StmtKind::If { orelse, .. } = &def.body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn match_statement() {
        let source = "\
match cmd:
    case 1 | 2:
        pass
    case [a, *rest]:
        pass
    case Color.RED as c if c:
        pass
    case _:
        pass
";
        let body = stmts(source);
        let StmtKind::Match { cases, .. } = &body[0].kind else {
            panic!("expected match");
        };
        assert_eq!(cases.len(), 4);
        assert!(matches!(cases[0].pattern, Pattern::Or(_)));
        assert!(matches!(&cases[1].pattern, Pattern::Sequence(items) if items.len() == 2));
        assert!(matches!(cases[2].pattern, Pattern::As(..)));
        assert!(cases[2].guard.is_some());
        assert!(matches!(cases[3].pattern, Pattern::Wildcard));
    }

    #[test]
    fn match_as_identifier() {
        let body = stmts("match = 3\nmatch(x)\n");
        assert!(matches!(body[0].kind, StmtKind::Assign { .. }));
        assert!(matches!(body[1].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn fstring_expression() {
        let source = "f\"pi ≈ {pi:.3f}\"";
        let parsed = expr(source);
        let ExprKind::JoinedStr(parts) = &parsed.kind else {
            panic!("expected joined string");
        };
        assert_eq!(parts.len(), 2);
        let ExprKind::FormattedValue {
            value, format_spec, ..
        } = &parts[1].kind
        else {
            panic!("expected formatted value");
        };
        assert_eq!(&source[value.span.start..value.span.end], "pi");
        assert!(format_spec.is_some());
    }

    #[test]
    fn fstring_named_expression() {
        let parsed = expr("f'{(b := a * 2)}'");
        let ExprKind::JoinedStr(parts) = &parsed.kind else {
            panic!("expected joined string");
        };
        let ExprKind::FormattedValue { value, .. } = &parts[0].kind else {
            panic!("expected formatted value");
        };
        assert!(matches!(value.kind, ExprKind::NamedExpr { .. }));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            expr("'a' 'b'").kind,
            ExprKind::Constant(Constant::Str("ab".to_string()))
        );
    }

    #[test]
    fn comprehensions_and_displays() {
        assert!(matches!(expr("[x for x in y if x]").kind, ExprKind::ListComp { .. }));
        assert!(matches!(expr("{k: v for k, v in d}").kind, ExprKind::DictComp { .. }));
        assert!(matches!(expr("{1, 2}").kind, ExprKind::Set(_)));
        assert!(matches!(expr("{}").kind, ExprKind::Dict { .. }));
        assert!(matches!(expr("sum(x for x in y)").kind, ExprKind::Call { .. }));
        assert!(matches!(expr("(1,)").kind, ExprKind::Tuple(ref items) if items.len() == 1));
        assert!(matches!(expr("lambda x, y=1: x + y").kind, ExprKind::Lambda(_)));
        assert!(matches!(expr("a if b else c").kind, ExprKind::IfExp { .. }));
    }

    #[test]
    fn slices() {
        let parsed = expr("arr[:, 1]");
        let ExprKind::Subscript { slice, .. } = &parsed.kind else {
            panic!("expected subscript");
        };
        let ExprKind::Tuple(items) = &slice.kind else {
            panic!("expected tuple index");
        };
        assert!(matches!(items[0].kind, ExprKind::Slice { lower: None, upper: None, step: None }));
        assert!(matches!(expr("a[1:2:3]").kind, ExprKind::Subscript { .. }));
    }

    #[test]
    fn imports() {
        let body = stmts("from uzoncalc import *\nimport math as m\nfrom .x import (a, b as c)\n");
        assert!(
            matches!(&body[0].kind, StmtKind::ImportFrom { module, names, level: 0 } if module == "uzoncalc" && names[0].name == "*")
        );
        assert!(
            matches!(&body[1].kind, StmtKind::Import(names) if names[0].asname.as_deref() == Some("m"))
        );
        assert!(matches!(&body[2].kind, StmtKind::ImportFrom { level: 1, names, .. } if names.len() == 2));
    }

    #[test]
    fn semicolons_split_statements() {
        let body = stmts("a = 1; b = 2\n");
        assert_eq!(body.len(), 2);
        assert_eq!(body[1].line, 1);
    }

    #[test]
    fn error_positions() {
        let err = parse_module("x = (1 + )").unwrap_err();
        assert_eq!(err.0, 9..10);
        assert!(matches!(err.1, ParseErrKind::UnexpectedToken { expected: "expression", .. }));

        let err = parse_module("if x\n    pass").unwrap_err();
        assert!(matches!(err.1, ParseErrKind::UnexpectedToken { expected: "':'", .. }));

        let err = parse_module("def f():\nreturn 1").unwrap_err();
        assert!(matches!(err.1, ParseErrKind::UnexpectedToken { expected: "an indented block", .. }));
    }

    #[test]
    fn params() {
        let body = stmts("def f(a, b=2, *args, c, d=4, **kw):\n    pass\n");
        let StmtKind::FunctionDef(def) = &body[0].kind else {
            panic!("expected a function");
        };
        assert_eq!(def.params.args.len(), 2);
        assert_eq!(def.params.vararg.as_deref(), Some("args"));
        assert_eq!(def.params.kwonly.len(), 2);
        assert_eq!(def.params.kwarg.as_deref(), Some("kw"));
    }
}
