//! Math IR: a small tagged tree of MathML-like nodes.
//!
//! Producers (expression lowering, value lowering, substitution) build [`MathNode`] trees and
//! the [`emit`] module serializes them to MathML. The IR knows nothing about source syntax or
//! runtime values.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

pub mod emit;
pub mod html_utils;
pub mod number;

pub use emit::{MATHML_NS, MathMLEmitter, to_mathml};
pub use number::{float_repr, format_general, format_general_with, format_number};

/// A node of the Math IR.
///
/// Every node exclusively owns its children, so trees can be cloned and transformed freely.
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MathNode {
    /// `<mi>...</mi>`
    Mi(String),
    /// `<mi>...</mi>` for an identifier bound to a list, tuple or array.
    MiArray(String),
    /// `<mn>...</mn>`, holding the canonical rendering of the number.
    Mn(String),
    /// `<mo>...</mo>`. The empty operator is the invisible gap between magnitude and unit.
    Mo(String),
    /// `<mtext>...</mtext>`
    MText(String),
    /// A unit atom, rendered as `<mtext class="unit">`.
    Mu(String),
    /// `<mrow>...</mrow>`
    MRow(Vec<MathNode>),
    /// Like `MRow`, but known to be an array literal.
    MRowArray(Vec<MathNode>),
    /// `<mfrac>...</mfrac>`
    MFrac(Box<MathNode>, Box<MathNode>),
    /// `<msup>...</msup>`
    MSup(Box<MathNode>, Box<MathNode>),
    /// `<msub>...</msub>`
    MSub(Box<MathNode>, Box<MathNode>),
    /// `<msqrt>...</msqrt>`
    MSqrt(Box<MathNode>),
    /// A parenthesized group with configurable delimiters.
    MFenced {
        open: String,
        close: String,
        body: Box<MathNode>,
    },
    /// A single-line equation; parts are joined by `=` when rendered.
    Equation(Vec<MathNode>),
}

impl MathNode {
    /// Returns `true` for nodes that carry a single text payload and no children.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            MathNode::Mi(_)
                | MathNode::MiArray(_)
                | MathNode::Mn(_)
                | MathNode::Mo(_)
                | MathNode::MText(_)
                | MathNode::Mu(_)
        )
    }

    /// The variant name, e.g. `"MFrac"`.
    #[inline]
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Children in document order. Leaves have none.
    pub fn children(&self) -> Vec<&MathNode> {
        match self {
            MathNode::MRow(children)
            | MathNode::MRowArray(children)
            | MathNode::Equation(children) => children.iter().collect(),
            MathNode::MFrac(a, b) | MathNode::MSup(a, b) | MathNode::MSub(a, b) => {
                vec![a.as_ref(), b.as_ref()]
            }
            MathNode::MSqrt(body) | MathNode::MFenced { body, .. } => vec![body.as_ref()],
            _ => Vec::new(),
        }
    }

    /// Maps the tree pre-order.
    ///
    /// If `f` returns a replacement for a node, that replacement is used as-is and its
    /// subtree is not visited. Otherwise the children are mapped recursively and the node is
    /// rebuilt around them. `self` is never modified.
    pub fn transform<F>(&self, f: &mut F) -> MathNode
    where
        F: FnMut(&MathNode) -> Option<MathNode>,
    {
        if let Some(replacement) = f(self) {
            return replacement;
        }
        let map_all = |nodes: &[MathNode], f: &mut F| -> Vec<MathNode> {
            nodes.iter().map(|node| node.transform(f)).collect()
        };
        match self {
            MathNode::MRow(children) => MathNode::MRow(map_all(children, f)),
            MathNode::MRowArray(children) => MathNode::MRowArray(map_all(children, f)),
            MathNode::Equation(parts) => MathNode::Equation(map_all(parts, f)),
            MathNode::MFrac(num, den) => {
                MathNode::MFrac(Box::new(num.transform(f)), Box::new(den.transform(f)))
            }
            MathNode::MSup(base, exp) => {
                MathNode::MSup(Box::new(base.transform(f)), Box::new(exp.transform(f)))
            }
            MathNode::MSub(base, sub) => {
                MathNode::MSub(Box::new(base.transform(f)), Box::new(sub.transform(f)))
            }
            MathNode::MSqrt(body) => MathNode::MSqrt(Box::new(body.transform(f))),
            MathNode::MFenced { open, close, body } => MathNode::MFenced {
                open: open.clone(),
                close: close.clone(),
                body: Box::new(body.transform(f)),
            },
            leaf => leaf.clone(),
        }
    }
}

/// Values accepted by [`mn`].
pub trait MnValue {
    fn into_mn_text(self) -> String;
}

impl MnValue for f64 {
    #[inline]
    fn into_mn_text(self) -> String {
        format_number(self)
    }
}

impl MnValue for i64 {
    #[inline]
    fn into_mn_text(self) -> String {
        self.to_string()
    }
}

impl MnValue for i32 {
    #[inline]
    fn into_mn_text(self) -> String {
        self.to_string()
    }
}

/// Strings are taken to be canonical already.
impl MnValue for &str {
    #[inline]
    fn into_mn_text(self) -> String {
        self.to_string()
    }
}

impl MnValue for String {
    #[inline]
    fn into_mn_text(self) -> String {
        self
    }
}

#[inline]
pub fn mi(name: impl Into<String>) -> MathNode {
    MathNode::Mi(name.into())
}

#[inline]
pub fn mi_array(name: impl Into<String>) -> MathNode {
    MathNode::MiArray(name.into())
}

#[inline]
pub fn mn(value: impl MnValue) -> MathNode {
    MathNode::Mn(value.into_mn_text())
}

#[inline]
pub fn mo(symbol: impl Into<String>) -> MathNode {
    MathNode::Mo(symbol.into())
}

#[inline]
pub fn mtext(text: impl Into<String>) -> MathNode {
    MathNode::MText(text.into())
}

#[inline]
pub fn mu(name: impl Into<String>) -> MathNode {
    MathNode::Mu(name.into())
}

#[inline]
pub fn mrow(children: impl IntoIterator<Item = MathNode>) -> MathNode {
    MathNode::MRow(children.into_iter().collect())
}

#[inline]
pub fn mrow_array(children: impl IntoIterator<Item = MathNode>) -> MathNode {
    MathNode::MRowArray(children.into_iter().collect())
}

#[inline]
pub fn mfrac(num: MathNode, den: MathNode) -> MathNode {
    MathNode::MFrac(Box::new(num), Box::new(den))
}

#[inline]
pub fn msup(base: MathNode, exponent: MathNode) -> MathNode {
    MathNode::MSup(Box::new(base), Box::new(exponent))
}

#[inline]
pub fn msub(base: MathNode, subscript: MathNode) -> MathNode {
    MathNode::MSub(Box::new(base), Box::new(subscript))
}

#[inline]
pub fn msqrt(body: MathNode) -> MathNode {
    MathNode::MSqrt(Box::new(body))
}

/// A group fenced by `(` and `)`.
#[inline]
pub fn mfenced(body: MathNode) -> MathNode {
    mfenced_with(body, "(", ")")
}

#[inline]
pub fn mfenced_with(body: MathNode, open: &str, close: &str) -> MathNode {
    MathNode::MFenced {
        open: open.to_string(),
        close: close.to_string(),
        body: Box::new(body),
    }
}

#[inline]
pub fn equation(parts: impl IntoIterator<Item = MathNode>) -> MathNode {
    MathNode::Equation(parts.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MathNode {
        mfrac(mi("x"), mrow([mi("a"), mo("+"), mi("b")]))
    }

    #[test]
    fn mn_formats_numbers() {
        assert_eq!(mn(3.0), MathNode::Mn("3".into()));
        assert_eq!(mn(0.1 + 0.2), MathNode::Mn("0.3".into()));
        assert_eq!(mn(-2.5), MathNode::Mn("-2.5".into()));
        assert_eq!(mn(42i64), MathNode::Mn("42".into()));
        assert_eq!(mn("1e3"), MathNode::Mn("1e3".into()));
    }

    #[test]
    fn structural_equality() {
        assert_eq!(sample(), sample());
        assert_ne!(sample(), mfrac(mrow([mi("a"), mo("+"), mi("b")]), mi("x")));
        assert_ne!(mi("x"), mi_array("x"));
        assert_ne!(mrow([mi("a")]), mrow_array([mi("a")]));
        assert_eq!(mrow([]), MathNode::MRow(Vec::new()));
    }

    #[test]
    fn transform_replaces_and_stops() {
        let tree = sample();
        let mut visited = Vec::new();
        let out = tree.transform(&mut |node| {
            visited.push(node.kind());
            match node {
                MathNode::Mi(name) if name == "a" => Some(mn(1i64)),
                _ => None,
            }
        });
        assert_eq!(out, mfrac(mi("x"), mrow([mn(1i64), mo("+"), mi("b")])));
        // The input is untouched.
        assert_eq!(tree, sample());
        assert_eq!(
            visited,
            ["MFrac", "Mi", "MRow", "Mi", "Mo", "Mi"]
        );
    }

    #[test]
    fn transform_replacement_is_not_revisited() {
        let tree = mrow([mi("x")]);
        let mut calls = 0;
        let out = tree.transform(&mut |node| {
            calls += 1;
            match node {
                MathNode::MRow(_) => Some(mrow([mi("x"), mi("x")])),
                _ => None,
            }
        });
        assert_eq!(calls, 1);
        assert_eq!(out, mrow([mi("x"), mi("x")]));
    }

    #[test]
    fn leaves_and_children() {
        assert!(mu("meter").is_leaf());
        assert!(!msqrt(mi("x")).is_leaf());
        assert_eq!(sample().children().len(), 2);
        assert!(mo("=").children().is_empty());
    }
}
