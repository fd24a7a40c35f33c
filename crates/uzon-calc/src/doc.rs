//! Document settings and writing the finished sheet as an HTML page.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use minijinja::{Environment, context};
use thiserror::Error;
use tracing::{info, warn};

use crate::context::Context;

const TEMPLATE: &str = include_str!("../assets/template.html");
const STYLESHEET: &str = include_str!("../assets/template.css");
const STYLESHEET_NAME: &str = "template.css";

pub const DEFAULT_FILE_STEM: &str = "UzonCalc Sheet";

#[derive(Debug, Error)]
pub enum DocError {
    #[error("cannot write '{}': {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("cannot render the page template: {0}")]
    Template(#[from] minijinja::Error),
}

/// Page settings collected while a script runs.
#[derive(Debug, Clone, PartialEq)]
pub struct DocSettings {
    pub title: Option<String>,
    pub page_size: String,
    pub page_margin: String,
    pub font_family: String,
    /// CSS rules as `selector -> {property: value}`.
    pub styles: IndexMap<String, IndexMap<String, String>>,
}

impl Default for DocSettings {
    fn default() -> Self {
        DocSettings {
            title: None,
            page_size: "A4".to_string(),
            page_margin: "20mm".to_string(),
            font_family: "\"Times New Roman\", \"SimSun\", serif".to_string(),
            styles: IndexMap::new(),
        }
    }
}

impl DocSettings {
    /// The printable width of the configured page size.
    pub fn page_width(&self) -> &'static str {
        match self.page_size.to_ascii_lowercase().as_str() {
            "a3" => "297mm",
            "a5" => "148mm",
            "letter" | "legal" => "8.5in",
            _ => "210mm",
        }
    }

    /// The custom rules as CSS text; `font_size` style names become `font-size`.
    pub fn custom_css(&self) -> String {
        let mut lines = Vec::new();
        for (selector, properties) in &self.styles {
            lines.push(format!("{selector} {{"));
            for (property, value) in properties {
                lines.push(format!("    {}: {value};", property.replace('_', "-")));
            }
            lines.push("}".to_string());
        }
        lines.join("\n")
    }

    /// The full HTML page around `content`.
    pub fn render(&self, content: &str) -> Result<String, DocError> {
        let mut env = Environment::new();
        env.add_template("sheet.html", TEMPLATE)?;
        let page = env.get_template("sheet.html")?.render(context! {
            title => self.title.as_deref().unwrap_or(DEFAULT_FILE_STEM),
            page_size => self.page_size,
            page_margin => self.page_margin,
            page_width => self.page_width(),
            font_family => self.font_family,
            custom_styles => self.custom_css(),
            content => content,
        })?;
        Ok(page)
    }
}

/// The placeholder block that the page script fills with a table of contents.
pub fn toc_block(title: &str) -> String {
    format!(
        "\n<div id='toc' style='page-break-before:always;page-break-after:always;'>\n    \
         <div class='text-center text-2xl font-semibold'>{title}</div>\n    \
         <div id='toc-container'></div>\n</div>\n"
    )
}

/// Resolves the output path of `save(filename)` for `ctx`.
pub fn output_path(ctx: &Context, filename: Option<&str>) -> PathBuf {
    let mut name = match filename.filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => ctx
            .doc
            .title
            .clone()
            .unwrap_or_else(|| DEFAULT_FILE_STEM.to_string()),
    };
    if !name.ends_with(".html") {
        name.push_str(".html");
    }
    let path = Path::new(&name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        ctx.location_dir().join(path)
    }
}

/// Writes the sheet of `ctx` to disk with its stylesheet next to it.
pub fn save(ctx: &Context, filename: Option<&str>) -> Result<PathBuf, DocError> {
    let path = output_path(ctx, filename);
    let page = ctx.doc.render(&ctx.html_content())?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| DocError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    fs::write(&path, page).map_err(|source| DocError::Io {
        path: path.clone(),
        source,
    })?;
    let stylesheet = path.with_file_name(STYLESHEET_NAME);
    if let Err(err) = fs::write(&stylesheet, STYLESHEET) {
        warn!(path = %stylesheet.display(), "unable to copy the stylesheet: {err}");
    }
    info!("Document saved to (open with browser): file:///{}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_styles_use_css_names() {
        let mut doc = DocSettings::default();
        doc.styles.insert(
            "body".to_string(),
            IndexMap::from([("font_size".to_string(), "14px".to_string())]),
        );
        insta::assert_snapshot!(doc.custom_css(), @r"
        body {
            font-size: 14px;
        }
        ");
    }

    #[test]
    fn render_fills_the_template() {
        let doc = DocSettings {
            title: Some("Beam <1>".to_string()),
            page_size: "A3".to_string(),
            ..DocSettings::default()
        };
        let page = doc.render("<p>a</p>").unwrap();
        assert!(page.contains("<title>Beam &lt;1&gt;</title>"));
        assert!(page.contains("size: A3;"));
        assert!(page.contains("max-width: 297mm;"));
        assert!(page.contains("<p>a</p>"));
    }

    #[test]
    fn save_writes_page_and_stylesheet() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("beam.py");
        let mut ctx = Context::for_script(&script);
        ctx.doc.title = Some("Beam".to_string());
        ctx.append_content("<p>x</p>".to_string());

        let path = save(&ctx, None).unwrap();
        assert_eq!(path, dir.path().join("Beam.html"));
        assert!(fs::read_to_string(&path).unwrap().contains("<p>x</p>"));
        assert!(dir.path().join("template.css").exists());

        let nested = save(&ctx, Some("out/report")).unwrap();
        assert_eq!(nested, dir.path().join("out").join("report.html"));
    }

    #[test]
    fn toc_placeholder() {
        assert!(toc_block("Contents").contains("<div class='text-center text-2xl font-semibold'>Contents</div>"));
    }
}
