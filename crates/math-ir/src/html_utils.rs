/// Escapes `&`, `<` and `>` in `input` and appends the result to `output`.
///
/// This is the escaping used for MathML text nodes.
pub fn escape_html_content(output: &mut String, input: &str) {
    let mut rest = input;
    while let Some(index) = memchr::memchr3(b'&', b'<', b'>', rest.as_bytes()) {
        let (before, after) = rest.split_at(index);
        output.push_str(before);
        output.push_str(match after.as_bytes()[0] {
            b'&' => "&amp;",
            b'<' => "&lt;",
            _ => "&gt;",
        });
        rest = &after[1..];
    }
    output.push_str(rest);
}

/// Like [`escape_html_content`], but also escapes both quote characters
/// (`"` as `&quot;`, `'` as `&#x27;`), so the result is safe in any HTML context.
///
/// Plain text blocks of the sheet go through this function.
pub fn escape_html(output: &mut String, input: &str) {
    let mut start = 0;
    for (index, byte) in input.bytes().enumerate() {
        let replacement = match byte {
            b'&' => "&amp;",
            b'<' => "&lt;",
            b'>' => "&gt;",
            b'"' => "&quot;",
            b'\'' => "&#x27;",
            _ => continue,
        };
        // All replaced bytes are ASCII, so `index` is a char boundary.
        output.push_str(&input[start..index]);
        output.push_str(replacement);
        start = index + 1;
    }
    output.push_str(&input[start..]);
}

/// Convenience wrapper around [`escape_html`] returning a new string.
pub fn escaped(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    escape_html(&mut output, input);
    output
}

/// Escapes `&` and `"` for attribute values enclosed in double quotes.
pub fn escape_double_quoted_html_attribute(output: &mut String, input: &str) {
    for ch in input.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '"' => output.push_str("&quot;"),
            _ => output.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(input: &str) -> String {
        let mut output = String::new();
        escape_html_content(&mut output, input);
        output
    }

    #[test]
    fn content_escaping() {
        assert_eq!(content(""), "");
        assert_eq!(content("Hello, World!"), "Hello, World!");
        assert_eq!(content("a<b>c&d"), "a&lt;b&gt;c&amp;d");
        assert_eq!(content("&&<<>>"), "&amp;&amp;&lt;&lt;&gt;&gt;");
        assert_eq!(content("“quoted” 'kept'"), "“quoted” 'kept'");
        assert_eq!(content("混凝土 < C30"), "混凝土 &lt; C30");
    }

    #[test]
    fn full_escaping_covers_quotes() {
        assert_eq!(escaped(r#"say "hi" & 'bye'"#), "say &quot;hi&quot; &amp; &#x27;bye&#x27;");
        assert_eq!(escaped("σ < 1"), "σ &lt; 1");
    }

    #[test]
    fn appends_to_existing_output() {
        let mut output = "prefix: ".to_string();
        escape_html(&mut output, "<tag>");
        assert_eq!(output, "prefix: &lt;tag&gt;");
    }

    #[test]
    fn attribute_escaping() {
        let mut output = String::new();
        escape_double_quoted_html_attribute(&mut output, r#"a "b" & <c>"#);
        assert_eq!(output, "a &quot;b&quot; &amp; <c>");
    }
}
