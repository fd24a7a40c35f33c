use std::collections::VecDeque;
use std::mem;
use std::str::{CharIndices, FromStr};

use super::token::{FStringPiece, Keyword, OPERATORS, Op, Span, TokSpan, Token};
use crate::error::{ParseErrKind, ParseError};

const TAB_SIZE: usize = 8;

/// Splits calculation script source into tokens.
///
/// Indentation is tracked with a stack of column widths; inside brackets newlines and
/// indentation are insignificant.
pub(crate) struct Lexer<'source> {
    input: CharIndices<'source>,
    peek: (usize, Option<char>),
    source: &'source str,
    line: u32,
    indents: Vec<usize>,
    brackets: Vec<(char, usize)>,
    at_line_start: bool,
    pending: VecDeque<TokSpan>,
    last_significant: Option<Token>,
    finished: bool,
}

impl<'source> Lexer<'source> {
    pub(crate) fn new(source: &'source str) -> Self {
        let mut lexer = Lexer {
            input: source.char_indices(),
            peek: (0, None),
            source,
            line: 1,
            indents: vec![0],
            brackets: Vec::new(),
            at_line_start: true,
            pending: VecDeque::new(),
            last_significant: None,
            finished: false,
        };
        lexer.read_char(); // Initialize `peek`.
        lexer
    }

    /// One character progresses.
    fn read_char(&mut self) -> (usize, Option<char>) {
        let next = self
            .input
            .next()
            .map(|(idx, ch)| (idx, Some(ch)))
            .unwrap_or((self.source.len(), None));
        let current = mem::replace(&mut self.peek, next);
        if current.1 == Some('\n') {
            self.line += 1;
        }
        current
    }

    #[inline]
    fn pos(&self) -> usize {
        self.peek.0
    }

    fn peek_second(&self) -> Option<char> {
        self.input.clone().next().map(|(_, ch)| ch)
    }

    fn error(&self, span: Span, kind: ParseErrKind) -> ParseError {
        ParseError(span.into(), kind)
    }

    /// Lexes the whole input.
    pub(crate) fn tokenize(mut self) -> Result<Vec<TokSpan>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = matches!(tok.token, Token::Eoi);
            tokens.push(tok);
            if done {
                return Ok(tokens);
            }
        }
    }

    pub(crate) fn next_token(&mut self) -> Result<TokSpan, ParseError> {
        loop {
            if let Some(tok) = self.pending.pop_front() {
                return Ok(self.remember(tok));
            }
            if self.finished {
                return Ok(TokSpan::new(
                    Token::Eoi,
                    Span::new(self.source.len(), self.source.len()),
                    self.line,
                ));
            }
            if self.at_line_start && self.brackets.is_empty() {
                self.handle_indentation()?;
                continue;
            }
            self.skip_insignificant()?;
            let (start, ch) = self.peek;
            let line = self.line;
            let Some(ch) = ch else {
                if let Some(&(close, open_at)) = self.brackets.last() {
                    return Err(self.error(
                        Span::new(open_at, open_at + 1),
                        ParseErrKind::UnclosedBracket(close),
                    ));
                }
                self.finish_input(start);
                continue;
            };
            if ch == '\n' || ch == '\r' {
                self.consume_line_end();
                if self.brackets.is_empty() {
                    self.at_line_start = true;
                    return Ok(self.remember(TokSpan::new(
                        Token::Newline,
                        Span::new(start, start + 1),
                        line,
                    )));
                }
                continue;
            }
            let tok = self.lex_token(start, ch, line)?;
            return Ok(self.remember(tok));
        }
    }

    fn remember(&mut self, tok: TokSpan) -> TokSpan {
        self.last_significant = Some(tok.token.clone());
        tok
    }

    fn finish_input(&mut self, end: usize) {
        let span = Span::new(end, end);
        let needs_newline = !matches!(
            self.last_significant,
            None | Some(Token::Newline | Token::Dedent)
        );
        if needs_newline {
            self.pending
                .push_back(TokSpan::new(Token::Newline, span, self.line));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.pending
                .push_back(TokSpan::new(Token::Dedent, span, self.line));
        }
        self.finished = true;
    }

    /// Measures the indentation of a new logical line and queues `Indent`/`Dedent` tokens.
    ///
    /// Blank lines and comment-only lines are consumed without producing tokens.
    fn handle_indentation(&mut self) -> Result<(), ParseError> {
        let start = self.pos();
        let mut width = 0usize;
        loop {
            match self.peek.1 {
                Some(' ') => width += 1,
                Some('\t') => width = (width / TAB_SIZE + 1) * TAB_SIZE,
                Some('\x0c') => width = 0,
                _ => break,
            }
            self.read_char();
        }
        match self.peek.1 {
            None => {
                self.at_line_start = false;
                return Ok(());
            }
            Some('#') => {
                self.skip_comment();
                self.consume_line_end();
                return Ok(());
            }
            Some('\n' | '\r') => {
                self.consume_line_end();
                return Ok(());
            }
            Some('\\') if matches!(self.peek_second(), Some('\n' | '\r')) => {
                // A continuation on an otherwise empty line joins the next line.
                self.read_char();
                self.consume_line_end();
                return Ok(());
            }
            _ => {}
        }
        self.at_line_start = false;
        let span = Span::new(start, self.pos());
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.pending
                .push_back(TokSpan::new(Token::Indent, span, self.line));
        } else if width < current {
            while self.indents.last().is_some_and(|&level| level > width) {
                self.indents.pop();
                self.pending
                    .push_back(TokSpan::new(Token::Dedent, span, self.line));
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(self.error(span, ParseErrKind::InconsistentDedent));
            }
        }
        Ok(())
    }

    fn consume_line_end(&mut self) {
        match self.peek.1 {
            Some('\r') => {
                self.read_char();
                if self.peek.1 == Some('\n') {
                    self.read_char();
                } else {
                    self.line += 1;
                }
            }
            Some('\n') => {
                self.read_char();
            }
            _ => {}
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek.1 {
            if ch == '\n' || ch == '\r' {
                break;
            }
            self.read_char();
        }
    }

    /// Skips spaces, comments and explicit line continuations.
    fn skip_insignificant(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek.1 {
                Some(' ' | '\t' | '\x0c') => {
                    self.read_char();
                }
                Some('#') => self.skip_comment(),
                Some('\\') => {
                    let (loc, _) = self.peek;
                    if matches!(self.peek_second(), Some('\n' | '\r')) {
                        self.read_char();
                        self.consume_line_end();
                    } else {
                        return Err(
                            self.error(Span::new(loc, loc + 1), ParseErrKind::UnexpectedChar('\\'))
                        );
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_token(&mut self, start: usize, ch: char, line: u32) -> Result<TokSpan, ParseError> {
        if ch.is_alphabetic() || ch == '_' {
            return self.lex_name_or_string(start, line);
        }
        if ch.is_ascii_digit() || (ch == '.' && self.peek_second().is_some_and(|c| c.is_ascii_digit()))
        {
            return self.lex_number(start, line);
        }
        if ch == '"' || ch == '\'' {
            return self.lex_string(start, line, StrPrefix::default());
        }
        let rest = &self.source[start..];
        let Some(op) = OPERATORS.iter().copied().find(|op| rest.starts_with(op.as_str())) else {
            let span = Span::new(start, start + ch.len_utf8());
            return Err(self.error(span, ParseErrKind::UnexpectedChar(ch)));
        };
        for _ in 0..op.as_str().len() {
            self.read_char();
        }
        let span = Span::new(start, self.pos());
        match op {
            Op::LParen => self.brackets.push((')', start)),
            Op::LBracket => self.brackets.push((']', start)),
            Op::LBrace => self.brackets.push(('}', start)),
            Op::RParen | Op::RBracket | Op::RBrace => {
                let close = op.as_str().chars().next().unwrap_or(')');
                match self.brackets.pop() {
                    Some((expected, _)) if expected == close => {}
                    _ => return Err(self.error(span, ParseErrKind::UnmatchedBracket(close))),
                }
            }
            _ => {}
        }
        Ok(TokSpan::new(Token::Op(op), span, line))
    }

    fn lex_name_or_string(&mut self, start: usize, line: u32) -> Result<TokSpan, ParseError> {
        while let Some(ch) = self.peek.1 {
            if ch.is_alphanumeric() || ch == '_' {
                self.read_char();
            } else {
                break;
            }
        }
        let end = self.pos();
        let source = self.source;
        let ident = &source[start..end];
        if matches!(self.peek.1, Some('"' | '\'')) {
            if let Some(prefix) = StrPrefix::parse(ident) {
                return self.lex_string(start, line, prefix);
            }
        }
        let token = match Keyword::from_str(ident) {
            Ok(kw) => Token::Keyword(kw),
            Err(_) => Token::Name(ident.into()),
        };
        Ok(TokSpan::new(token, Span::new(start, end), line))
    }

    fn lex_number(&mut self, start: usize, line: u32) -> Result<TokSpan, ParseError> {
        let radix = if self.peek.1 == Some('0') {
            match self.peek_second() {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            }
        } else {
            None
        };
        if let Some(radix) = radix {
            self.read_char();
            self.read_char();
            let digits_start = self.pos();
            while let Some(ch) = self.peek.1 {
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    self.read_char();
                } else {
                    break;
                }
            }
            let span = Span::new(start, self.pos());
            let digits: String = self.source[digits_start..span.end]
                .chars()
                .filter(|&c| c != '_')
                .collect();
            return match i64::from_str_radix(&digits, radix) {
                Ok(value) => Ok(TokSpan::new(Token::Int(value), span, line)),
                Err(err) => Err(self.number_error(span, &err)),
            };
        }

        let mut is_float = false;
        self.eat_digits();
        if self.peek.1 == Some('.') {
            is_float = true;
            self.read_char();
            self.eat_digits();
        }
        if matches!(self.peek.1, Some('e' | 'E')) {
            let mut lookahead = self.input.clone();
            let after = lookahead.next().map(|(_, c)| c);
            let digit_follows = match after {
                Some('+' | '-') => lookahead.next().is_some_and(|(_, c)| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if digit_follows {
                is_float = true;
                self.read_char();
                if matches!(self.peek.1, Some('+' | '-')) {
                    self.read_char();
                }
                self.eat_digits();
            }
        }
        if matches!(self.peek.1, Some('j' | 'J')) {
            self.read_char();
            let span = Span::new(start, self.pos());
            return Err(self.error(span, ParseErrKind::Unsupported("complex literals")));
        }
        let span = Span::new(start, self.pos());
        let text: String = self.source[span.start..span.end]
            .chars()
            .filter(|&c| c != '_')
            .collect();
        if is_float {
            match text.parse::<f64>() {
                Ok(value) => Ok(TokSpan::new(Token::Float(value), span, line)),
                Err(_) => Err(self.error(span, ParseErrKind::InvalidNumber(text.into()))),
            }
        } else {
            match text.parse::<i64>() {
                Ok(value) => Ok(TokSpan::new(Token::Int(value), span, line)),
                Err(err) => Err(self.number_error(span, &err)),
            }
        }
    }

    fn number_error(&self, span: Span, err: &std::num::ParseIntError) -> ParseError {
        let text: Box<str> = self.source[span.start..span.end].into();
        let kind = match err.kind() {
            std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => {
                ParseErrKind::IntegerTooLarge(text)
            }
            _ => ParseErrKind::InvalidNumber(text),
        };
        self.error(span, kind)
    }

    fn eat_digits(&mut self) {
        while let Some(ch) = self.peek.1 {
            if ch.is_ascii_digit() || ch == '_' {
                self.read_char();
            } else {
                break;
            }
        }
    }

    fn lex_string(
        &mut self,
        start: usize,
        line: u32,
        prefix: StrPrefix,
    ) -> Result<TokSpan, ParseError> {
        let (_, Some(quote)) = self.read_char() else {
            return Err(self.error(Span::new(start, self.pos()), ParseErrKind::UnterminatedString));
        };
        let triple = self.peek.1 == Some(quote) && self.peek_second() == Some(quote);
        if triple {
            self.read_char();
            self.read_char();
        }
        let body_start = self.pos();
        let body_end;
        loop {
            let (loc, ch) = self.read_char();
            match ch {
                None => {
                    return Err(
                        self.error(Span::new(start, loc), ParseErrKind::UnterminatedString)
                    );
                }
                Some('\\') => {
                    // The escaped character never closes the literal.
                    if self.peek.1.is_some() {
                        self.read_char();
                    }
                }
                Some('\n' | '\r') if !triple => {
                    return Err(
                        self.error(Span::new(start, loc), ParseErrKind::UnterminatedString)
                    );
                }
                Some(c) if c == quote => {
                    if !triple {
                        body_end = loc;
                        break;
                    }
                    if self.peek.1 == Some(quote) && self.peek_second() == Some(quote) {
                        self.read_char();
                        self.read_char();
                        body_end = loc;
                        break;
                    }
                }
                Some(_) => {}
            }
        }
        let span = Span::new(start, self.pos());
        let body = &self.source[body_start..body_end];
        let token = if prefix.format {
            Token::FString(parse_fstring_body(body, body_start, prefix.raw).map_err(
                |(offset, kind)| self.error(Span::new(offset, offset + 1), kind),
            )?)
        } else if prefix.raw {
            Token::Str(body.to_string())
        } else {
            Token::Str(
                unescape(body)
                    .map_err(|kind| self.error(span, kind))?,
            )
        };
        Ok(TokSpan::new(token, span, line))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StrPrefix {
    raw: bool,
    format: bool,
}

impl StrPrefix {
    fn parse(ident: &str) -> Option<StrPrefix> {
        if ident.len() > 2 {
            return None;
        }
        let mut prefix = StrPrefix::default();
        let mut bytes = false;
        for ch in ident.chars() {
            match ch.to_ascii_lowercase() {
                'r' if !prefix.raw => prefix.raw = true,
                'f' if !prefix.format && !bytes => prefix.format = true,
                'b' if !bytes && !prefix.format => bytes = true,
                'u' if ident.len() == 1 => {}
                _ => return None,
            }
        }
        Some(prefix)
    }
}

/// Resolves backslash escapes in a non-raw literal.
fn unescape(body: &str) -> Result<String, ParseErrKind> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut value = next.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'x' | 'u' | 'U' => {
                let len = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..len).filter_map(|_| chars.next()).collect();
                let decoded = u32::from_str_radix(&digits, 16)
                    .ok()
                    .filter(|_| digits.len() == len)
                    .and_then(char::from_u32);
                match decoded {
                    Some(c) => out.push(c),
                    None => {
                        let mut escape = String::from('\\');
                        escape.push(next);
                        escape.push_str(&digits);
                        return Err(ParseErrKind::InvalidEscape(escape.into()));
                    }
                }
            }
            other => {
                // Unknown escapes are kept verbatim.
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Splits the body of an f-string into literal text and replacement fields.
///
/// `base` is the byte offset of `body` in the enclosing source. Errors carry the offset of the
/// offending character.
fn parse_fstring_body(
    body: &str,
    base: usize,
    raw: bool,
) -> Result<Vec<FStringPiece>, (usize, ParseErrKind)> {
    let mut pieces = Vec::new();
    let end = parse_fstring_pieces(body, 0, base, raw, false, &mut pieces)?;
    debug_assert_eq!(end, body.len());
    Ok(pieces)
}

/// Parses pieces until the end of `body` or, when `nested`, until an unmatched `}`.
/// Returns the index where parsing stopped.
fn parse_fstring_pieces(
    body: &str,
    mut idx: usize,
    base: usize,
    raw: bool,
    nested: bool,
    pieces: &mut Vec<FStringPiece>,
) -> Result<usize, (usize, ParseErrKind)> {
    let bytes = body.as_bytes();
    let mut literal = String::new();
    let mut literal_start = idx;
    let flush = |literal: &mut String,
                 pieces: &mut Vec<FStringPiece>,
                 start: usize|
     -> Result<(), (usize, ParseErrKind)> {
        if literal.is_empty() {
            return Ok(());
        }
        let text = if raw {
            mem::take(literal)
        } else {
            let text = unescape(literal).map_err(|kind| (base + start, kind))?;
            literal.clear();
            text
        };
        pieces.push(FStringPiece::Literal(text));
        Ok(())
    };
    while idx < bytes.len() {
        match bytes[idx] {
            b'{' if !nested && bytes.get(idx + 1) == Some(&b'{') => {
                literal.push('{');
                idx += 2;
            }
            b'}' if !nested && bytes.get(idx + 1) == Some(&b'}') => {
                literal.push('}');
                idx += 2;
            }
            b'}' if nested => {
                flush(&mut literal, pieces, literal_start)?;
                return Ok(idx);
            }
            b'}' => {
                return Err((base + idx, ParseErrKind::InvalidFString("single '}' is not allowed")));
            }
            b'{' => {
                flush(&mut literal, pieces, literal_start)?;
                idx = parse_fstring_field(body, idx + 1, base, raw, pieces)?;
                literal_start = idx;
            }
            b'\\' if !raw => {
                // Keep the escape together so that `\{` is not read as a field.
                let ch_len = body[idx + 1..].chars().next().map_or(0, char::len_utf8);
                literal.push_str(&body[idx..idx + 1 + ch_len]);
                idx += 1 + ch_len;
            }
            _ => {
                let ch_len = body[idx..].chars().next().map_or(1, char::len_utf8);
                literal.push_str(&body[idx..idx + ch_len]);
                idx += ch_len;
            }
        }
    }
    if nested {
        return Err((base + idx, ParseErrKind::InvalidFString("expecting '}'")));
    }
    flush(&mut literal, pieces, literal_start)?;
    Ok(idx)
}

/// Parses one replacement field starting right after its `{`. Returns the index after the
/// closing `}`.
fn parse_fstring_field(
    body: &str,
    start: usize,
    base: usize,
    raw: bool,
    pieces: &mut Vec<FStringPiece>,
) -> Result<usize, (usize, ParseErrKind)> {
    let bytes = body.as_bytes();
    let mut idx = start;
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let expr_end = loop {
        let Some(&byte) = bytes.get(idx) else {
            return Err((base + start, ParseErrKind::InvalidFString("expecting '}'")));
        };
        if let Some(q) = quote {
            if byte == q {
                quote = None;
            }
            idx += 1;
            continue;
        }
        match byte {
            b'\'' | b'"' => quote = Some(byte),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b'}' if depth > 0 => depth -= 1,
            b'}' => break idx,
            b'!' if depth == 0 && bytes.get(idx + 1) != Some(&b'=') => break idx,
            b':' if depth == 0 => break idx,
            _ => {}
        }
        idx += 1;
    };
    let expr = &body[start..expr_end];
    if expr.trim().is_empty() {
        return Err((base + start, ParseErrKind::InvalidFString("empty expression")));
    }
    idx = expr_end;
    let mut conversion = None;
    if bytes.get(idx) == Some(&b'!') {
        let conv = body[idx + 1..].chars().next();
        match conv {
            Some(c @ ('r' | 's' | 'a')) => conversion = Some(c),
            _ => {
                return Err((base + idx, ParseErrKind::InvalidFString("invalid conversion character")));
            }
        }
        idx += 2;
    }
    let mut spec = None;
    if bytes.get(idx) == Some(&b':') {
        let mut spec_pieces = Vec::new();
        idx = parse_fstring_pieces(body, idx + 1, base, raw, true, &mut spec_pieces)?;
        spec = Some(spec_pieces);
    }
    if bytes.get(idx) != Some(&b'}') {
        return Err((base + idx, ParseErrKind::InvalidFString("expecting '}'")));
    }
    pieces.push(FStringPiece::Field {
        expr: expr.to_string(),
        offset: base + start,
        conversion,
        spec,
    });
    Ok(idx + 1)
}

/// Lexes `source` into a token vector terminated by [`Token::Eoi`].
pub fn tokenize(source: &str) -> Result<Vec<TokSpan>, ParseError> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|tok| tok.token)
            .collect()
    }

    fn describe(source: &str) -> String {
        tokenize(source)
            .unwrap()
            .iter()
            .map(|tok| match &tok.token {
                Token::Name(name) => name.to_string(),
                Token::Int(value) => value.to_string(),
                Token::Float(value) => format!("{value:?}"),
                Token::Str(text) => format!("{text:?}"),
                Token::FString(pieces) => format!("f{pieces:?}"),
                Token::Keyword(kw) => <&str>::from(*kw).to_string(),
                Token::Op(op) => op.as_str().to_string(),
                Token::Newline => "NL".to_string(),
                Token::Indent => "IN".to_string(),
                Token::Dedent => "DE".to_string(),
                Token::Eoi => "EOI".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn simple_assignment() {
        assert_eq!(describe("a = 1 + 2"), "a = 1 + 2 NL EOI");
    }

    #[test]
    fn indentation() {
        let source = "if x:\n    a = 1\n\n    # comment\n    b = 2\nc = 3\n";
        assert_eq!(
            describe(source),
            "if x : NL IN a = 1 NL b = 2 NL DE c = 3 NL EOI"
        );
    }

    #[test]
    fn dedent_at_end_of_input() {
        assert_eq!(
            describe("def f():\n    if a:\n        return 1"),
            "def f ( ) : NL IN if a : NL IN return 1 NL DE DE EOI"
        );
    }

    #[test]
    fn inconsistent_dedent() {
        let err = tokenize("if x:\n    a = 1\n  b = 2\n").unwrap_err();
        assert!(matches!(err.1, ParseErrKind::InconsistentDedent));
    }

    #[test]
    fn brackets_join_lines() {
        assert_eq!(
            describe("x = (1 +\n     2)\ny = [\n  1,\n]"),
            "x = ( 1 + 2 ) NL y = [ 1 , ] NL EOI"
        );
    }

    #[test]
    fn unmatched_bracket() {
        let err = tokenize("x = (1]").unwrap_err();
        assert!(matches!(err.1, ParseErrKind::UnmatchedBracket(']')));
    }

    #[test]
    fn backslash_continuation() {
        assert_eq!(describe("x = 1 + \\\n    2"), "x = 1 + 2 NL EOI");
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("1_000 0x1F 0b101 2.5 .5 1e3 3E-2"),
            vec![
                Token::Int(1000),
                Token::Int(31),
                Token::Int(5),
                Token::Float(2.5),
                Token::Float(0.5),
                Token::Float(1000.0),
                Token::Float(0.03),
                Token::Newline,
                Token::Eoi,
            ]
        );
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let err = tokenize("x = 99999999999999999999").unwrap_err();
        assert!(matches!(err.1, ParseErrKind::IntegerTooLarge(_)));
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(
            kinds(r#"'a\tb' "q\"uote" r'\d' '\x41\u00e9'"#)[..4],
            [
                Token::Str("a\tb".to_string()),
                Token::Str("q\"uote".to_string()),
                Token::Str("\\d".to_string()),
                Token::Str("Aé".to_string()),
            ]
        );
    }

    #[test]
    fn triple_quoted_string_counts_lines() {
        let tokens = tokenize("s = \"\"\"one\ntwo\"\"\"\nx = 1").unwrap();
        assert_eq!(tokens[2].token, Token::Str("one\ntwo".to_string()));
        let x = tokens
            .iter()
            .find(|tok| tok.token == Token::Name("x".into()))
            .unwrap();
        assert_eq!(x.line, 3);
    }

    #[test]
    fn unterminated_string() {
        let err = tokenize("s = 'abc").unwrap_err();
        assert!(matches!(err.1, ParseErrKind::UnterminatedString));
    }

    #[test]
    fn fstring_pieces() {
        let tokens = tokenize("f'pi ≈ {pi:.3f} {{x}} {a!r}'").unwrap();
        let Token::FString(pieces) = &tokens[0].token else {
            panic!("expected an f-string");
        };
        assert_eq!(
            pieces,
            &vec![
                FStringPiece::Literal("pi ≈ ".to_string()),
                FStringPiece::Field {
                    expr: "pi".to_string(),
                    offset: 10,
                    conversion: None,
                    spec: Some(vec![FStringPiece::Literal(".3f".to_string())]),
                },
                FStringPiece::Literal(" {x} ".to_string()),
                FStringPiece::Field {
                    expr: "a".to_string(),
                    offset: 25,
                    conversion: Some('r'),
                    spec: None,
                },
            ]
        );
    }

    #[test]
    fn fstring_nested_spec_field() {
        let tokens = tokenize("f'{x:.{n}f}'").unwrap();
        let Token::FString(pieces) = &tokens[0].token else {
            panic!("expected an f-string");
        };
        let FStringPiece::Field { spec: Some(spec), .. } = &pieces[0] else {
            panic!("expected a field with a spec");
        };
        assert_eq!(spec.len(), 3);
    }

    #[test]
    fn fstring_single_brace_error() {
        let err = tokenize("f'a } b'").unwrap_err();
        assert!(matches!(err.1, ParseErrKind::InvalidFString(_)));
    }

    #[test]
    fn keywords_and_unicode_names() {
        assert_eq!(
            describe("async def 计算(): pass"),
            "async def 计算 ( ) : pass NL EOI"
        );
    }

    #[test]
    fn string_prefixes() {
        assert!(matches!(kinds("rf'{x}'")[0], Token::FString(_)));
        assert!(matches!(kinds("b'x'")[0], Token::Str(_)));
        assert_eq!(kinds("fr")[0], Token::Name("fr".into()));
    }
}
