use std::sync::Arc;

use tracing::debug;

use super::FunctionSource;
use super::rewriter::Rewriter;
use super::validate::validate;
use crate::error::{InstrumentationCause, InstrumentationError};
use crate::syntax::ast::{FunctionDef, StmtKind, shift_lines};
use crate::syntax::parse_module;

/// Extracts, rewrites and validates one function. Lines of the result are script lines.
pub(super) fn rewrite(function: &FunctionSource) -> Result<Arc<FunctionDef>, InstrumentationError> {
    let name = function.name.as_str();
    let fail = |cause: InstrumentationCause| InstrumentationError::new(name, cause);

    let snippet = extract(&function.source, function.first_line)
        .map_err(|reason| fail(InstrumentationCause::Extract(reason)))?;
    let body = parse_module(&snippet).map_err(|err| fail(err.into()))?;
    let def = body
        .into_iter()
        .find_map(|stmt| match stmt.kind {
            StmtKind::FunctionDef(def) if def.name == name => Some(def),
            _ => None,
        })
        .ok_or_else(|| {
            fail(InstrumentationCause::Extract(format!(
                "no function named '{name}' starts at line {}",
                function.first_line
            )))
        })?;

    let mut def = Arc::unwrap_or_clone(def);
    // The decorators already ran on the original definition.
    def.decorators.clear();
    Rewriter::new(&snippet)
        .rewrite_function(&mut def)
        .map_err(|err| fail(err.into()))?;
    validate(&def.body).map_err(|err| fail(err.into()))?;

    let offset = function.first_line.saturating_sub(1);
    def.line += offset;
    shift_lines(&mut def.body, offset);
    debug!(
        function = name,
        path = %function.path.display(),
        statements = def.body.len(),
        "instrumented"
    );
    Ok(Arc::new(def))
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

fn is_blank(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Open brackets and triple-quoted strings carried from one line to the next.
#[derive(Debug, Default)]
struct LineScanner {
    depth: i32,
    triple: Option<u8>,
}

impl LineScanner {
    /// Whether the next line starts inside a triple-quoted string.
    fn in_string(&self) -> bool {
        self.triple.is_some()
    }

    fn scan(&mut self, line: &str) {
        // Quotes, brackets and `#` are ASCII and never match a UTF-8 continuation byte.
        let bytes = line.as_bytes();
        let mut quote: Option<u8> = None;
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if let Some(q) = self.triple {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if bytes[i..].starts_with(&[q; 3]) {
                    self.triple = None;
                    i += 3;
                    continue;
                }
            } else if let Some(q) = quote {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == q {
                    quote = None;
                }
            } else {
                match b {
                    b'#' => break,
                    b'\'' | b'"' if bytes[i..].starts_with(&[b; 3]) => {
                        self.triple = Some(b);
                        i += 3;
                        continue;
                    }
                    b'\'' | b'"' => quote = Some(b),
                    b'(' | b'[' | b'{' => self.depth += 1,
                    b')' | b']' | b'}' => self.depth -= 1,
                    _ => {}
                }
            }
            i += 1;
        }
    }
}

/// The dedented lines of the definition starting at `first_line`: its decorators, its
/// header and its indented body. Lines inside triple-quoted strings are kept verbatim.
pub(super) fn extract(source: &str, first_line: u32) -> Result<String, String> {
    let lines: Vec<&str> = source.lines().collect();
    let start = (first_line as usize)
        .checked_sub(1)
        .filter(|start| *start < lines.len())
        .ok_or_else(|| format!("line {first_line} is outside of the script"))?;
    let base = indent_of(lines[start]);

    let mut scanner = LineScanner::default();
    scanner.scan(lines[start]);
    let mut verbatim = vec![false];
    let mut end = start + 1;
    let mut in_header = !lines[start].trim_start().starts_with("def ")
        && !lines[start].trim_start().starts_with("async def ");
    while end < lines.len() {
        let line = lines[end];
        let in_string = scanner.in_string();
        let continues = in_string
            || scanner.depth > 0
            || in_header
            || is_blank(line)
            || indent_of(line) > base;
        if !continues {
            break;
        }
        if in_header
            && !in_string
            && scanner.depth == 0
            && !is_blank(line)
            && indent_of(line) == base
        {
            let trimmed = line.trim_start();
            in_header = !(trimmed.starts_with("def ") || trimmed.starts_with("async def "));
        }
        scanner.scan(line);
        verbatim.push(in_string);
        end += 1;
    }
    while end > start + 1 && !verbatim[end - 1 - start] && is_blank(lines[end - 1]) {
        end -= 1;
    }

    let mut out = String::new();
    for (line, verbatim) in lines[start..end].iter().zip(&verbatim) {
        let strip = if *verbatim {
            0
        } else {
            indent_of(line).min(base)
        };
        out.push_str(&line[strip..]);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Phase;

    const SCRIPT: &str = "\
from uzoncalc import *

class Beam:
    @uzon_calc()
    async def sheet(ctx):
        \"\"\"Design of a beam.\"\"\"
        b = 300

        h = b * 2
    # trailing comment

x = 1
";

    fn source(name: &str, first_line: u32) -> FunctionSource {
        FunctionSource::new("beam.py", SCRIPT, name, first_line)
    }

    #[test]
    fn extracts_the_indented_definition() {
        let snippet = extract(SCRIPT, 4).unwrap();
        insta::assert_snapshot!(snippet, @r#"
        @uzon_calc()
        async def sheet(ctx):
            """Design of a beam."""
            b = 300

            h = b * 2
        "#);
    }

    #[test]
    fn multi_line_headers() {
        let source = "@uzon_calc(\n    name='x',\n)\ndef f(\n    a,\n):\n    return a\ny = 2\n";
        let snippet = extract(source, 1).unwrap();
        assert!(snippet.ends_with("    return a\n"));
        assert!(!snippet.contains("y = 2"));
    }

    #[test]
    fn multi_line_strings_stay_inside_the_definition() {
        let source = "\
def f(ctx):
    note = \"\"\"
First line at column 0
(unbalanced
\"\"\"
    a = 1
    # done

b = 2
";
        let snippet = extract(source, 1).unwrap();
        assert!(snippet.ends_with("    a = 1\n"), "{snippet}");
        assert!(snippet.contains("\nFirst line at column 0\n(unbalanced\n"));
        assert!(!snippet.contains("b = 2"));

        let nested = "class C:\n    def f(self):\n        s = '''x\n  y'''\n        return s\n\nz = 1\n";
        assert_eq!(
            extract(nested, 2).unwrap(),
            "def f(self):\n    s = '''x\n  y'''\n    return s\n"
        );

        let def = rewrite(&FunctionSource::new("note.py", source, "f", 1)).unwrap();
        assert_eq!(def.body.first().map(|stmt| stmt.line), Some(2));
        assert!(def.body.iter().any(|stmt| stmt.line == 6));
    }

    #[test]
    fn lines_point_into_the_script() {
        let def = rewrite(&source("sheet", 4)).unwrap();
        assert!(def.decorators.is_empty());
        assert_eq!(def.line, 5);
        let lines: Vec<u32> = def.body.iter().map(|stmt| stmt.line).collect();
        assert_eq!(lines, [6, 7, 7, 9, 9]);
    }

    #[test]
    fn failures_name_the_phase() {
        let err = rewrite(&source("other", 4)).unwrap_err();
        assert_eq!(err.phase(), Phase::Extract);
        assert_eq!(err.function, "other");

        let err = rewrite(&source("sheet", 40)).unwrap_err();
        assert_eq!(err.phase(), Phase::Extract);

        let broken = FunctionSource::new("bad.py", "def f():\n    x = (1 +\n", "f", 1);
        assert_eq!(rewrite(&broken).unwrap_err().phase(), Phase::Parse);

        let global = FunctionSource::new("g.py", "def f():\n    global y\n", "f", 1);
        let err = rewrite(&global).unwrap_err();
        assert_eq!(err.phase(), Phase::Validate);
        assert_eq!(
            err.to_string(),
            "failed to instrument 'f' (validate): disallowed node 'Global' at line 2"
        );
    }
}
