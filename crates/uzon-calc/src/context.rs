//! The state of one sheet while its calculation runs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use indexmap::IndexMap;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::config::Config;
use crate::doc::DocSettings;
use crate::interaction::{InteractionState, Window};
use crate::json_db::{JsonDb, JsonDbError};
use crate::post_handlers::{self, SharedHandler};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextOptions: u8 {
        /// Drop every block instead of appending it.
        const SKIP_CONTENT = 1;
        /// Show the right-hand side with values plugged in.
        const ENABLE_SUBSTITUTION = 1 << 1;
        /// Do not record assignments to names starting with `_`.
        const SUPPRESS_PRIVATE_ASSIGNMENTS = 1 << 2;
        /// Render f-string slots as equations rather than bare values.
        const ENABLE_FSTRING_EQUATION = 1 << 3;
    }
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions::ENABLE_SUBSTITUTION
            | ContextOptions::SUPPRESS_PRIVATE_ASSIGNMENTS
            | ContextOptions::ENABLE_FSTRING_EQUATION
    }
}

#[derive(Debug)]
struct InlineGroup {
    separator: String,
    blocks: Vec<String>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Blocks, options and inputs of one sheet.
///
/// A context belongs to a single run and is never shared between threads.
pub struct Context {
    name: String,
    file_path: Option<PathBuf>,
    silent: bool,
    options: ContextOptions,
    aliases: IndexMap<String, Option<String>>,
    handlers: Vec<SharedHandler>,
    contents: Vec<String>,
    inline: Option<InlineGroup>,
    db: Option<JsonDb>,
    /// UI values, shaped `{window_title: {field: value}}`.
    pub vars: Map<String, Json>,
    /// Windows met in silent mode.
    pub ui_windows: Vec<Window>,
    pub doc: DocSettings,
    pub interaction: InteractionState,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("file_path", &self.file_path)
            .field("silent", &self.silent)
            .field("options", &self.options)
            .field("contents", &self.contents)
            .field("ui_windows", &self.ui_windows)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(name: Option<String>, file_path: Option<PathBuf>, config: &Config) -> Self {
        let name = name.unwrap_or_else(|| {
            format!("calc_ctx{:x}", NEXT_ID.fetch_add(1, Ordering::Relaxed))
        });
        Context {
            name,
            file_path,
            silent: true,
            options: config.context_options(),
            aliases: config
                .aliases
                .iter()
                .map(|(key, value)| (key.clone(), Some(value.clone())))
                .collect(),
            handlers: post_handlers::default_handlers(),
            contents: Vec::new(),
            inline: None,
            db: None,
            vars: Map::new(),
            ui_windows: Vec::new(),
            doc: DocSettings::default(),
            interaction: InteractionState::default(),
        }
    }

    /// A context without post handlers.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let mut ctx = Context::new(Some("test".to_string()), None, &Config::default());
        ctx.handlers.clear();
        ctx
    }

    #[cfg(test)]
    pub(crate) fn for_script(path: &Path) -> Self {
        let mut ctx = Context::for_tests();
        ctx.file_path = Some(path.to_path_buf());
        ctx
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[inline]
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    #[inline]
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    #[inline]
    pub fn options(&self) -> ContextOptions {
        self.options
    }

    pub fn set_option(&mut self, option: ContextOptions, on: bool) {
        self.options.set(option, on);
    }

    #[inline]
    pub fn aliases(&self) -> &IndexMap<String, Option<String>> {
        &self.aliases
    }

    /// Shows `name` as `value` in later blocks; `None` removes the alias.
    pub fn set_alias(&mut self, name: &str, value: Option<&str>) {
        if name.is_empty() {
            return;
        }
        self.aliases
            .insert(name.to_string(), value.map(str::to_string));
    }

    #[inline]
    pub fn post_handlers(&self) -> &[SharedHandler] {
        &self.handlers
    }

    pub fn set_post_handlers(&mut self, mut handlers: Vec<SharedHandler>) {
        post_handlers::sort_handlers(&mut handlers);
        self.handlers = handlers;
    }

    /// Runs `content` through the post handlers and appends it, to the open inline group
    /// if there is one.
    pub fn append_content(&mut self, content: String) {
        if self.options.contains(ContextOptions::SKIP_CONTENT) {
            return;
        }
        let content = post_handlers::apply(&self.handlers, content, self);
        match &mut self.inline {
            Some(group) => group.blocks.push(content),
            None => self.contents.push(content),
        }
    }

    /// Opens an inline group, or changes the separator of the open one.
    pub fn start_inline(&mut self, separator: &str) {
        match &mut self.inline {
            Some(group) => group.separator = separator.to_string(),
            None => {
                self.inline = Some(InlineGroup {
                    separator: separator.to_string(),
                    blocks: Vec::new(),
                });
            }
        }
    }

    /// Closes the inline group, appending its blocks as one paragraph.
    pub fn end_inline(&mut self) {
        let Some(group) = self.inline.take() else {
            return;
        };
        if !group.blocks.is_empty() {
            let combined = group.blocks.join(&group.separator);
            self.contents.push(format!("<p>{combined}</p>"));
        }
    }

    #[inline]
    pub fn is_inline_mode(&self) -> bool {
        self.inline.is_some()
    }

    #[inline]
    pub fn contents(&self) -> &[String] {
        &self.contents
    }

    /// The sheet body: all committed blocks, one per line.
    pub fn html_content(&self) -> String {
        self.contents.join("\n")
    }

    /// The directory of the script, or the working directory when there is none.
    pub fn location_dir(&self) -> PathBuf {
        let dir = self
            .file_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty());
        match dir {
            Some(dir) => std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf()),
            None => std::env::current_dir().unwrap_or_default(),
        }
    }

    /// The JSON cache at `<script dir>/data/db.json`, opened on first use.
    pub fn db(&mut self) -> Result<&mut JsonDb, JsonDbError> {
        let db = match self.db.take() {
            Some(db) => db,
            None => {
                let path = self.location_dir().join("data").join("db.json");
                debug!(path = %path.display(), "opening json db");
                JsonDb::open(path)?
            }
        };
        Ok(self.db.insert(db))
    }

    /// Retires the context: closes an open inline group and flushes the JSON cache.
    pub fn exit(&mut self) -> Result<(), JsonDbError> {
        self.end_inline();
        match &self.db {
            Some(db) => db.save(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::post_handlers::Subscriptify;

    #[test]
    fn inline_groups_join_blocks() {
        let mut ctx = Context::for_tests();
        ctx.append_content("<p>first</p>".to_string());
        ctx.start_inline(", ");
        ctx.append_content("<span>a</span>".to_string());
        ctx.append_content("<span>b</span>".to_string());
        assert!(ctx.is_inline_mode());
        ctx.end_inline();
        assert!(!ctx.is_inline_mode());
        assert_eq!(
            ctx.html_content(),
            "<p>first</p>\n<p><span>a</span>, <span>b</span></p>"
        );
    }

    #[test]
    fn empty_inline_group_adds_nothing() {
        let mut ctx = Context::for_tests();
        ctx.start_inline(" ");
        ctx.end_inline();
        assert!(ctx.contents().is_empty());
        assert!(!ctx.is_inline_mode());
    }

    #[test]
    fn skip_content_drops_blocks() {
        let mut ctx = Context::for_tests();
        ctx.set_option(ContextOptions::SKIP_CONTENT, true);
        ctx.append_content("<p>hidden</p>".to_string());
        ctx.set_option(ContextOptions::SKIP_CONTENT, false);
        ctx.append_content("<p>shown</p>".to_string());
        assert_eq!(ctx.html_content(), "<p>shown</p>");
    }

    #[test]
    fn blocks_pass_through_handlers() {
        let mut ctx = Context::for_tests();
        ctx.set_post_handlers(vec![Arc::new(Subscriptify)]);
        ctx.append_content("<mi>f_c</mi>".to_string());
        assert_eq!(
            ctx.contents(),
            ["<msub><mi>f</mi><mtext>c</mtext></msub>"]
        );
    }

    #[test]
    fn aliases_from_config() {
        let mut config = Config::default();
        config.aliases.insert("v_car".into(), "v_auto".into());
        let mut ctx = Context::new(None, None, &config);
        assert!(ctx.name().starts_with("calc_ctx"));
        assert_eq!(ctx.aliases()["v_car"].as_deref(), Some("v_auto"));
        ctx.set_alias("", Some("x"));
        assert_eq!(ctx.aliases().len(), 1);
    }

    #[test]
    fn json_db_is_flushed_on_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::for_script(&dir.path().join("sheet.py"));
        ctx.db()
            .unwrap()
            .set(&Json::from("k"), Json::from(1));
        ctx.exit().unwrap();
        let text = std::fs::read_to_string(dir.path().join("data").join("db.json")).unwrap();
        assert_eq!(text, "{\n  \"k\": 1\n}");
    }
}
