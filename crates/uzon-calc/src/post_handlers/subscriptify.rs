use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{PostHandler, PostHandlerError};
use crate::context::Context;

static IDENTIFIER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"<mi>([^<]+)</mi>"));

/// Renders `<mi>a_b_c</mi>` as nested subscripts `((a)_b)_c`.
///
/// Names that start or end with `_`, or contain `__`, are left alone.
pub struct Subscriptify;

fn subscripted(name: &str) -> Option<String> {
    if !name.contains('_') || name.starts_with('_') || name.ends_with('_') {
        return None;
    }
    let mut parts = name.split('_');
    let base = parts.next()?;
    let mut out = format!("<mi>{base}</mi>");
    for part in parts {
        if part.is_empty() {
            return None;
        }
        out = format!("<msub>{out}<mtext>{part}</mtext></msub>");
    }
    Some(out)
}

impl PostHandler for Subscriptify {
    fn name(&self) -> &'static str {
        "Subscriptify"
    }

    fn handle(&self, data: &str, _: &Context) -> Result<String, PostHandlerError> {
        if !data.contains("<mi>") || !data.contains('_') {
            return Ok(data.to_string());
        }
        let re = IDENTIFIER
            .as_ref()
            .map_err(|err| PostHandlerError::new(self.name(), err.to_string()))?;
        let out = re.replace_all(data, |caps: &Captures<'_>| {
            subscripted(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        });
        Ok(out.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(data: &str) -> String {
        Subscriptify.handle(data, &Context::for_tests()).unwrap()
    }

    #[test]
    fn nested_subscripts() {
        insta::assert_snapshot!(
            run("<mi>x_1_2</mi>"),
            @"<msub><msub><mi>x</mi><mtext>1</mtext></msub><mtext>2</mtext></msub>"
        );
    }

    #[test]
    fn other_identifiers_are_preserved() {
        for name in ["<mi>abc</mi>", "<mi>_tmp</mi>", "<mi>tmp_</mi>", "<mi>a__b</mi>"] {
            assert_eq!(run(name), name);
        }
        assert_eq!(
            run(r#"<mi mathvariant="bold">a_b</mi>"#),
            r#"<mi mathvariant="bold">a_b</mi>"#
        );
    }
}
