use std::sync::LazyLock;

use regex::Regex;

use super::{PostHandler, PostHandlerError};
use crate::context::Context;

static BARE_NUMBER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"<mn>\(\s*(-?\d+(?:\.\d+)?)\s*\)</mn>"));

/// `<mn>(N)</mn>` becomes `<mn>N</mn>` for a plain number `N`.
pub struct ParenSimplify;

impl PostHandler for ParenSimplify {
    fn name(&self) -> &'static str {
        "ParenSimplify"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn handle(&self, data: &str, _: &Context) -> Result<String, PostHandlerError> {
        let re = BARE_NUMBER
            .as_ref()
            .map_err(|err| PostHandlerError::new(self.name(), err.to_string()))?;
        Ok(re.replace_all(data, "<mn>$1</mn>").into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simplify(data: &str) -> String {
        ParenSimplify.handle(data, &Context::for_tests()).unwrap()
    }

    #[test]
    fn numbers_lose_parentheses() {
        assert_eq!(simplify("<mn>( 12.5 )</mn>"), "<mn>12.5</mn>");
        assert_eq!(simplify("<mn>(-3)</mn>"), "<mn>-3</mn>");
    }

    #[test]
    fn prose_is_untouched() {
        assert_eq!(simplify("<p>(3)</p>"), "<p>(3)</p>");
        assert_eq!(simplify("<mn>(3+4)</mn>"), "<mn>(3+4)</mn>");
    }
}
