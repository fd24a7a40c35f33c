use std::fmt::Write;

use crate::MathNode;
use crate::html_utils::escape_html_content;

pub const MATHML_NS: &str = "http://www.w3.org/1998/Math/MathML";

/// Serializes IR trees to MathML.
///
/// The output is a pure function of the tree: no whitespace is inserted and attributes are
/// emitted in a fixed order.
#[derive(Debug, Default)]
pub struct MathMLEmitter {
    s: String,
}

impl MathMLEmitter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn into_inner(self) -> String {
        self.s
    }

    /// Emits a complete `<math>` element.
    ///
    /// An `Equation` becomes a single row whose parts are separated by `=`; any other node
    /// is wrapped in a row.
    pub fn emit_math(&mut self, node: &MathNode) -> std::fmt::Result {
        write!(self.s, "<math xmlns=\"{MATHML_NS}\">")?;
        match node {
            MathNode::Equation(parts) => self.emit_equation_row(parts)?,
            other => self.emit_wrapped(other)?,
        }
        self.s.push_str("</math>");
        Ok(())
    }

    pub fn emit(&mut self, node: &MathNode) -> std::fmt::Result {
        match node {
            MathNode::Mi(name) => self.emit_leaf("<mi>", "</mi>", name),
            MathNode::MiArray(name) => self.emit_leaf("<mi mathvariant=\"bold\">", "</mi>", name),
            MathNode::Mn(text) => self.emit_leaf("<mn>", "</mn>", text),
            MathNode::Mo(symbol) => self.emit_leaf("<mo>", "</mo>", symbol),
            MathNode::MText(text) => self.emit_leaf("<mtext>", "</mtext>", text),
            MathNode::Mu(unit) => self.emit_leaf(
                "<mtext class=\"unit\" mathvariant=\"normal\">",
                "</mtext>",
                unit,
            ),
            MathNode::MRow(children) | MathNode::MRowArray(children) => {
                self.s.push_str("<mrow>");
                for child in children {
                    self.emit(child)?;
                }
                self.s.push_str("</mrow>");
            }
            MathNode::MFrac(num, den) => {
                self.s.push_str("<mfrac>");
                self.emit_wrapped(num)?;
                self.emit_wrapped(den)?;
                self.s.push_str("</mfrac>");
            }
            MathNode::MSup(base, exponent) => {
                self.s.push_str("<msup>");
                if base.is_leaf() {
                    self.emit_wrapped(base)?;
                } else {
                    // Composite bases get explicit parentheses: (a+b)^2, (5 m)^2.
                    self.s.push_str("<mrow><mo>(</mo>");
                    self.emit_wrapped(base)?;
                    self.s.push_str("<mo>)</mo></mrow>");
                }
                self.emit_wrapped(exponent)?;
                self.s.push_str("</msup>");
            }
            MathNode::MSub(base, subscript) => {
                self.s.push_str("<msub>");
                self.emit_wrapped(base)?;
                self.emit_wrapped(subscript)?;
                self.s.push_str("</msub>");
            }
            MathNode::MSqrt(body) => {
                self.s.push_str("<msqrt>");
                self.emit_wrapped(body)?;
                self.s.push_str("</msqrt>");
            }
            MathNode::MFenced { open, close, body } => {
                // Explicit operators instead of the deprecated <mfenced>.
                self.s.push_str("<mrow>");
                self.emit_leaf("<mo>", "</mo>", open);
                self.emit_wrapped(body)?;
                self.emit_leaf("<mo>", "</mo>", close);
                self.s.push_str("</mrow>");
            }
            MathNode::Equation(parts) => self.emit_equation_row(parts)?,
        }
        Ok(())
    }

    fn emit_leaf(&mut self, open: &str, close: &str, text: &str) {
        self.s.push_str(open);
        escape_html_content(&mut self.s, text);
        self.s.push_str(close);
    }

    /// Emits `node`, wrapping it in `<mrow>` unless it already renders as one.
    fn emit_wrapped(&mut self, node: &MathNode) -> std::fmt::Result {
        if renders_as_row(node) {
            self.emit(node)
        } else {
            self.s.push_str("<mrow>");
            self.emit(node)?;
            self.s.push_str("</mrow>");
            Ok(())
        }
    }

    fn emit_equation_row(&mut self, parts: &[MathNode]) -> std::fmt::Result {
        self.s.push_str("<mrow>");
        for (idx, part) in parts.iter().enumerate() {
            if idx > 0 {
                self.s.push_str("<mo>=</mo>");
            }
            self.emit_wrapped(part)?;
        }
        self.s.push_str("</mrow>");
        Ok(())
    }
}

fn renders_as_row(node: &MathNode) -> bool {
    matches!(
        node,
        MathNode::MRow(_) | MathNode::MRowArray(_) | MathNode::MFenced { .. } | MathNode::Equation(_)
    )
}

/// Renders `node` as a standalone `<math>` element.
pub fn to_mathml(node: &MathNode) -> String {
    let mut emitter = MathMLEmitter::new();
    // Writing into a `String` cannot fail.
    let _ = emitter.emit_math(node);
    emitter.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;

    fn render(node: &MathNode) -> String {
        let mut emitter = MathMLEmitter::new();
        emitter.emit(node).unwrap();
        emitter.into_inner()
    }

    #[test]
    fn render_leaves() {
        assert_eq!(render(&mi("x")), "<mi>x</mi>");
        assert_eq!(render(&mi_array("arr")), "<mi mathvariant=\"bold\">arr</mi>");
        assert_eq!(render(&mn(3.5)), "<mn>3.5</mn>");
        assert_eq!(render(&mo("≤")), "<mo>≤</mo>");
        assert_eq!(render(&mo("")), "<mo></mo>");
        assert_eq!(render(&mtext("a < b")), "<mtext>a &lt; b</mtext>");
        assert_eq!(
            render(&mu("meter / second ** 2")),
            "<mtext class=\"unit\" mathvariant=\"normal\">meter / second ** 2</mtext>"
        );
    }

    #[test]
    fn render_frac_wraps_children() {
        assert_eq!(
            render(&mfrac(mi("x"), mrow([mi("a"), mo("+"), mi("b")]))),
            "<mfrac><mrow><mi>x</mi></mrow><mrow><mi>a</mi><mo>+</mo><mi>b</mi></mrow></mfrac>"
        );
    }

    #[test]
    fn render_sup_parenthesizes_composite_base() {
        assert_eq!(
            render(&msup(mi("x"), mn(2i64))),
            "<msup><mrow><mi>x</mi></mrow><mrow><mn>2</mn></mrow></msup>"
        );
        assert_eq!(
            render(&msup(mrow([mi("a"), mo("+"), mi("b")]), mn(2i64))),
            "<msup><mrow><mo>(</mo><mrow><mi>a</mi><mo>+</mo><mi>b</mi></mrow><mo>)</mo></mrow><mrow><mn>2</mn></mrow></msup>"
        );
    }

    #[test]
    fn render_fenced_uses_operators() {
        assert_eq!(
            render(&mfenced_with(mi("x"), "[", "]")),
            "<mrow><mo>[</mo><mrow><mi>x</mi></mrow><mo>]</mo></mrow>"
        );
    }

    #[test]
    fn render_sub_and_sqrt() {
        assert_eq!(
            render(&msub(mi("x"), mn(1i64))),
            "<msub><mrow><mi>x</mi></mrow><mrow><mn>1</mn></mrow></msub>"
        );
        assert_eq!(render(&msqrt(mi("x"))), "<msqrt><mrow><mi>x</mi></mrow></msqrt>");
    }

    #[test]
    fn render_equation() {
        let eq = equation([
            mi("a"),
            mrow([mn(1i64), mo("+"), mn(2i64)]),
            mn(3i64),
        ]);
        insta::assert_snapshot!(
            to_mathml(&eq),
            @r#"<math xmlns="http://www.w3.org/1998/Math/MathML"><mrow><mrow><mi>a</mi></mrow><mo>=</mo><mrow><mn>1</mn><mo>+</mo><mn>2</mn></mrow><mo>=</mo><mrow><mn>3</mn></mrow></mrow></math>"#
        );
    }

    #[test]
    fn non_equation_is_wrapped() {
        assert_eq!(
            to_mathml(&mi("x")),
            "<math xmlns=\"http://www.w3.org/1998/Math/MathML\"><mrow><mi>x</mi></mrow></math>"
        );
    }

    #[test]
    fn serialization_is_deterministic() {
        let tree = equation([
            mi("y"),
            mfrac(mi("x"), mrow([mi("a"), mo("+"), mi("b")])),
            mrow([mn(10i64), mo(""), mu("meter")]),
        ]);
        let first = to_mathml(&tree);
        let second = to_mathml(&tree.clone());
        assert_eq!(first, second);
        assert_eq!(first.matches("<mo>=</mo>").count(), 2);
    }
}
