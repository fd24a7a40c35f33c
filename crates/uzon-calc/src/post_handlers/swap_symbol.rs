use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{PostHandler, PostHandlerError};
use crate::context::Context;

const GREEK: [(&str, &str); 48] = [
    ("alpha", "α"),
    ("Alpha", "Α"),
    ("beta", "β"),
    ("Beta", "Β"),
    ("gamma", "γ"),
    ("Gamma", "Γ"),
    ("delta", "δ"),
    ("Delta", "Δ"),
    ("epsilon", "ε"),
    ("Epsilon", "Ε"),
    ("zeta", "ζ"),
    ("Zeta", "Ζ"),
    ("eta", "η"),
    ("Eta", "Η"),
    ("theta", "θ"),
    ("Theta", "Θ"),
    ("iota", "ι"),
    ("Iota", "Ι"),
    ("kappa", "κ"),
    ("Kappa", "Κ"),
    ("lambda", "λ"),
    ("Lambda", "Λ"),
    ("mu", "μ"),
    ("Mu", "Μ"),
    ("nu", "ν"),
    ("Nu", "Ν"),
    ("xi", "ξ"),
    ("Xi", "Ξ"),
    ("omicron", "ο"),
    ("Omicron", "Ο"),
    ("pi", "π"),
    ("Pi", "Π"),
    ("rho", "ρ"),
    ("Rho", "Ρ"),
    ("sigma", "σ"),
    ("Sigma", "Σ"),
    ("tau", "τ"),
    ("Tau", "Τ"),
    ("upsilon", "υ"),
    ("Upsilon", "Υ"),
    ("phi", "φ"),
    ("Phi", "Φ"),
    ("chi", "χ"),
    ("Chi", "Χ"),
    ("psi", "ψ"),
    ("Psi", "Ψ"),
    ("omega", "ω"),
    ("Omega", "Ω"),
];

/// Quoted regions, including HTML-encoded quotes.
static QUOTED: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r#"'[^']*'|"[^"]*"|&#x27;.*?&#x27;|&quot;.*?&quot;|&#34;.*?&#34;"#)
});

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new("\x00QUOTE_([0-9]+)\x00"));

/// Longer names first, so `Omicron` is never read as `O` + `micron`.
static NAMES: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    let mut names: Vec<&str> = GREEK.iter().map(|(name, _)| *name).collect();
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));
    Regex::new(&format!(r"\b({})", names.join("|")))
});

fn glyph(name: &str) -> Option<&'static str> {
    GREEK
        .iter()
        .find_map(|(candidate, glyph)| (*candidate == name).then_some(*glyph))
}

/// Replaces Greek letter names with their glyphs outside of quoted text.
///
/// A name must end at `_`, whitespace, a non-word character or the end of the text, so
/// `alphabet` stays as it is while `alpha_1` becomes `α_1`.
pub struct SwapSymbol;

impl SwapSymbol {
    fn pattern(
        &self,
        re: &'static LazyLock<Result<Regex, regex::Error>>,
    ) -> Result<&'static Regex, PostHandlerError> {
        LazyLock::force(re)
            .as_ref()
            .map_err(|err| PostHandlerError::new(self.name(), err.to_string()))
    }
}

impl PostHandler for SwapSymbol {
    fn name(&self) -> &'static str {
        "SwapSymbol"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn handle(&self, data: &str, _: &Context) -> Result<String, PostHandlerError> {
        let quoted = self.pattern(&QUOTED)?;
        let names = self.pattern(&NAMES)?;
        let placeholder = self.pattern(&PLACEHOLDER)?;

        let mut quotes: Vec<String> = Vec::new();
        let protected = quoted.replace_all(data, |caps: &Captures<'_>| {
            quotes.push(caps[0].to_string());
            format!("\x00QUOTE_{}\x00", quotes.len() - 1)
        });

        let mut swapped = String::with_capacity(protected.len());
        let mut last = 0;
        for m in names.find_iter(&protected) {
            let ends_word = protected[m.end()..]
                .chars()
                .next()
                .is_none_or(|next| !next.is_alphanumeric());
            if !ends_word {
                continue;
            }
            let Some(glyph) = glyph(m.as_str()) else {
                continue;
            };
            swapped.push_str(&protected[last..m.start()]);
            swapped.push_str(glyph);
            last = m.end();
        }
        swapped.push_str(&protected[last..]);

        let restored = placeholder.replace_all(&swapped, |caps: &Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|index| quotes.get(index))
                .map_or_else(|| caps[0].to_string(), Clone::clone)
        });
        Ok(restored.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap(data: &str) -> String {
        SwapSymbol.handle(data, &Context::for_tests()).unwrap()
    }

    #[test]
    fn greek_names_become_glyphs() {
        assert_eq!(swap("<mi>alpha</mi>"), "<mi>α</mi>");
        assert_eq!(swap("<mi>Gamma_1</mi>"), "<mi>Γ_1</mi>");
        assert_eq!(swap("<mi>Omicron</mi>"), "<mi>Ο</mi>");
        assert_eq!(swap("theta phi"), "θ φ");
    }

    #[test]
    fn longer_words_are_untouched() {
        assert_eq!(swap("<mi>alphabet</mi>"), "<mi>alphabet</mi>");
        assert_eq!(swap("<mi>beta2</mi>"), "<mi>beta2</mi>");
        assert_eq!(swap("<mi>zbeta</mi>"), "<mi>zbeta</mi>");
    }

    #[test]
    fn quoted_regions_are_preserved() {
        assert_eq!(
            swap(r#"<mtext class="beta">'alpha' beta &quot;gamma&quot;</mtext>"#),
            r#"<mtext class="beta">'alpha' β &quot;gamma&quot;</mtext>"#
        );
        assert_eq!(swap("&#x27;pi&#x27; pi"), "&#x27;pi&#x27; π");
    }
}
