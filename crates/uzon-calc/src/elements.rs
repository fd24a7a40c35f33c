//! HTML building blocks for scripts: headings, paragraphs, tables, images and the like.
//!
//! Children are inserted as markup, attribute values are escaped.

use indexmap::IndexMap;
use math_ir::html_utils::escape_double_quoted_html_attribute;

/// Attributes of an element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props {
    pub id: Option<String>,
    pub class: Option<String>,
    pub style: IndexMap<String, String>,
    /// Further attributes; `_` in names becomes `-`, so `data_value` is `data-value`.
    pub custom: IndexMap<String, String>,
}

impl Props {
    pub fn with_class(class: impl Into<String>) -> Self {
        Props {
            class: Some(class.into()),
            ..Props::default()
        }
    }

    pub fn attributes(&self) -> Vec<(String, String)> {
        let mut attrs = Vec::new();
        if let Some(id) = self.id.as_ref().filter(|id| !id.is_empty()) {
            attrs.push(("id".to_string(), id.clone()));
        }
        if let Some(class) = self.class.as_ref().filter(|class| !class.is_empty()) {
            attrs.push(("class".to_string(), class.clone()));
        }
        if !self.style.is_empty() {
            let style = self
                .style
                .iter()
                .map(|(key, value)| format!("{key}: {value}"))
                .collect::<Vec<_>>()
                .join("; ");
            attrs.push(("style".to_string(), style));
        }
        for (key, value) in &self.custom {
            attrs.push((key.replace('_', "-"), value.clone()));
        }
        attrs
    }
}

fn open_tag(out: &mut String, tag: &str, classes: Option<&str>, props: Option<&Props>) {
    let props = match (classes, props) {
        (Some(class), Some(props)) => Some(Props {
            class: Some(class.to_string()),
            ..props.clone()
        }),
        (Some(class), None) => Some(Props::with_class(class)),
        (None, props) => props.cloned(),
    };
    out.push('<');
    out.push_str(tag);
    for (key, value) in props.iter().flat_map(Props::attributes) {
        out.push(' ');
        out.push_str(&key);
        out.push_str("=\"");
        escape_double_quoted_html_attribute(out, &value);
        out.push('"');
    }
}

/// `<tag attrs>children</tag>`; `classes` overrides the class of `props`.
pub fn element(tag: &str, children: &str, classes: Option<&str>, props: Option<&Props>) -> String {
    let mut out = String::new();
    open_tag(&mut out, tag, classes, props);
    out.push('>');
    out.push_str(children);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
    out
}

/// `<tag attrs />`
pub fn void_element(tag: &str, classes: Option<&str>, props: Option<&Props>) -> String {
    let mut out = String::new();
    open_tag(&mut out, tag, classes, props);
    out.push_str(" />");
    out
}

pub fn br() -> String {
    void_element("br", None, None)
}

pub fn th(value: &str, classes: Option<&str>, rowspan: u32, colspan: u32) -> String {
    let props = Props {
        custom: IndexMap::from([
            ("rowspan".to_string(), rowspan.to_string()),
            ("colspan".to_string(), colspan.to_string()),
        ]),
        ..Props::default()
    };
    element("th", value, classes, Some(&props))
}

pub fn tr(value: &str, classes: Option<&str>) -> String {
    element("tr", value, classes, None)
}

pub fn td(value: &str, classes: Option<&str>) -> String {
    element("td", value, classes, None)
}

/// A table with header rows, body rows and an optional caption.
///
/// Cells that are already `<th>`/`<td>` elements are kept as they are.
pub fn table(
    headers: &[Vec<String>],
    rows: &[Vec<String>],
    title: Option<&str>,
    classes: Option<&str>,
    props: Option<&Props>,
) -> String {
    let mut children = String::new();
    if let Some(title) = title.filter(|title| !title.is_empty()) {
        children.push_str(&element("caption", title, None, None));
    }
    if !headers.is_empty() {
        let head: String = headers
            .iter()
            .map(|row| {
                let cells: String = row
                    .iter()
                    .map(|cell| {
                        if cell.starts_with("<th") {
                            cell.clone()
                        } else {
                            th(cell, None, 1, 1)
                        }
                    })
                    .collect();
                tr(&cells, None)
            })
            .collect();
        children.push_str(&element("thead", &head, None, None));
    }
    if !rows.is_empty() {
        let body: String = rows
            .iter()
            .map(|row| {
                let cells: String = row
                    .iter()
                    .map(|cell| {
                        if cell.starts_with("<td") {
                            cell.clone()
                        } else {
                            td(cell, None)
                        }
                    })
                    .collect();
                tr(&cells, None)
            })
            .collect();
        children.push_str(&element("tbody", &body, None, None));
    }
    element("table", &children, classes, props)
}

/// A code block; leading and trailing blank lines are dropped.
pub fn code(content: &str, language: Option<&str>) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let first = lines.iter().position(|line| !line.trim().is_empty());
    let last = lines.iter().rposition(|line| !line.trim().is_empty());
    let body = match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].join("\n"),
        _ => String::new(),
    };
    let class = language.map(|language| format!("language-{language}"));
    let code = element("code", &body, Some(class.as_deref().unwrap_or("")), None);
    element("pre", &code, None, None)
}

pub fn info(content: &str) -> String {
    element(
        "div",
        content,
        Some(
            "flex flex-row items-center bg-blue-100 border border-blue-400 text-blue-700 px-4 py-3 rounded relative",
        ),
        None,
    )
}

/// LaTeX source, converted to MathML by the page.
pub fn latex(content: &str) -> String {
    element("latex", content, None, None)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageOptions {
    pub alt: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub classes: Option<String>,
    pub props: Option<Props>,
}

/// A centered image with its alt text as a caption.
pub fn img(src: &str, options: &ImageOptions) -> String {
    let mut props = options.props.clone().unwrap_or_default();
    props.custom.insert("src".to_string(), src.to_string());
    for (key, value) in [
        ("alt", &options.alt),
        ("width", &options.width),
        ("height", &options.height),
    ] {
        if let Some(value) = value {
            props.custom.insert(key.to_string(), value.clone());
        }
    }
    let mut children = void_element("img", options.classes.as_deref(), Some(&props));
    if let Some(alt) = options.alt.as_ref().filter(|alt| !alt.is_empty()) {
        children.push_str(&element("div", alt, None, None));
    }
    element(
        "div",
        &children,
        Some("flex flex-col items-center justify-center"),
        None,
    )
}

/// A figure given as inline SVG markup or as an image URI.
pub fn plot(figure: &str) -> String {
    if figure.trim_start().starts_with("<svg") {
        element(
            "div",
            figure,
            Some("flex flex-col items-center justify-center"),
            None,
        )
    } else {
        img(figure, &ImageOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_are_escaped() {
        let props = Props {
            id: Some("t".to_string()),
            style: IndexMap::from([("color".to_string(), "red".to_string())]),
            custom: IndexMap::from([("data_note".to_string(), "a\"b".to_string())]),
            ..Props::default()
        };
        insta::assert_snapshot!(
            element("div", "x", Some("box"), Some(&props)),
            @r#"<div id="t" class="box" style="color: red" data-note="a&quot;b">x</div>"#
        );
        assert_eq!(br(), "<br />");
    }

    #[test]
    fn tables() {
        let out = table(
            &[vec!["a".to_string(), "<th>b</th>".to_string()]],
            &[vec!["1".to_string(), "2".to_string()]],
            Some("Loads"),
            None,
            None,
        );
        insta::assert_snapshot!(
            out,
            @r#"<table><caption>Loads</caption><thead><tr><th rowspan="1" colspan="1">a</th><th>b</th></tr></thead><tbody><tr><td>1</td><td>2</td></tr></tbody></table>"#
        );
    }

    #[test]
    fn code_blocks_trim_blank_lines() {
        assert_eq!(
            code("\n\nx = 1\n  \n", Some("python")),
            r#"<pre><code class="language-python">x = 1</code></pre>"#
        );
        assert_eq!(code("y", None), "<pre><code>y</code></pre>");
    }

    #[test]
    fn images_and_plots() {
        let out = img(
            "fig.png",
            &ImageOptions {
                alt: Some("Section".to_string()),
                ..ImageOptions::default()
            },
        );
        assert_eq!(
            out,
            r#"<div class="flex flex-col items-center justify-center"><img src="fig.png" alt="Section" /><div>Section</div></div>"#
        );
        assert!(plot("<svg></svg>").contains("<svg></svg>"));
        assert!(plot("data:image/png;base64,AA").contains(r#"src="data:image/png;base64,AA""#));
    }
}
