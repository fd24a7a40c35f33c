//! A small JSON file used by scripts to cache expensive results between runs.

use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHasher;
use serde_json::{Map, Value as Json};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum JsonDbError {
    #[error("cannot access '{}': {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("'{}' is not a JSON object: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Key-value store backed by one JSON object on disk.
///
/// The file is read once when opened and written back by [`JsonDb::save`].
#[derive(Debug)]
pub struct JsonDb {
    path: PathBuf,
    data: Map<String, Json>,
}

impl JsonDb {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JsonDbError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| JsonDbError::Json {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(JsonDbError::Io { path, source }),
        };
        Ok(JsonDb { path, data })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &Json) -> Option<&Json> {
        self.data.get(&Self::key_of(key))
    }

    pub fn set(&mut self, key: &Json, value: Json) {
        self.data.insert(Self::key_of(key), value);
    }

    pub fn save(&self) -> Result<(), JsonDbError> {
        let io_err = |source| JsonDbError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(&self.data).map_err(|source| JsonDbError::Json {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, text).map_err(io_err)?;
        debug!(path = %self.path.display(), entries = self.data.len(), "saved json db");
        Ok(())
    }

    /// The stored key for `key`.
    ///
    /// Strings, numbers and booleans are used as written. Anything else is hashed over
    /// its JSON text with object keys sorted.
    pub fn key_of(key: &Json) -> String {
        match key {
            Json::String(s) => s.clone(),
            Json::Number(n) => n.to_string(),
            Json::Bool(true) => "True".to_string(),
            Json::Bool(false) => "False".to_string(),
            other => {
                let mut canonical = String::new();
                write_canonical(&mut canonical, other);
                let mut hasher = FxHasher::default();
                canonical.hash(&mut hasher);
                format!("{:016x}", hasher.finish())
            }
        }
    }
}

fn write_canonical(out: &mut String, value: &Json) {
    match value {
        Json::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Json::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&Json::String(key.clone()).to_string());
                out.push_str(": ");
                write_canonical(out, item);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn scalar_keys_are_used_as_is() {
        assert_eq!(JsonDb::key_of(&json!("beam")), "beam");
        assert_eq!(JsonDb::key_of(&json!(3)), "3");
        assert_eq!(JsonDb::key_of(&json!(2.5)), "2.5");
    }

    #[test]
    fn structured_keys_ignore_field_order() {
        let a = JsonDb::key_of(&json!({"b": 1, "a": [1, 2]}));
        let b = JsonDb::key_of(&json!({"a": [1, 2], "b": 1}));
        assert_eq!(a, b);
        assert_ne!(a, JsonDb::key_of(&json!({"a": [2, 1], "b": 1})));
    }

    #[test]
    fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("db.json");
        let mut db = JsonDb::open(&path).unwrap();
        assert!(db.get(&json!("area")).is_none());
        db.set(&json!("area"), json!({"value": 1.5, "unit": "米"}));
        db.save().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"unit\": \"米\""));
        let reopened = JsonDb::open(&path).unwrap();
        assert_eq!(
            reopened.get(&json!("area")),
            Some(&json!({"value": 1.5, "unit": "米"}))
        );
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(JsonDb::open(&path), Err(JsonDbError::Json { .. })));
    }
}
