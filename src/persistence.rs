//! JSON document persistence for the stock and cooldown files.
//!
//! [`JsonFile::load`] is forgiving: a missing, empty or malformed file reads
//! as the document's empty value. [`JsonFile::try_load`] only forgives a
//! missing or empty file, so writers never replace a document they could
//! not parse. Saves return every failure so the caller can undo its
//! in-memory mutation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Errors from reading or writing a document on disk.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unreadable document {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A JSON document at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, falling back to `T::default()` on any problem.
    pub fn load<T: DeserializeOwned + Default>(&self) -> T {
        match self.try_load() {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "using empty document");
                T::default()
            }
        }
    }

    /// Read the document. A missing or zero-length file is `T::default()`;
    /// a file that exists but can't be read or doesn't match `T` is an error.
    pub fn try_load<T: DeserializeOwned + Default>(&self) -> Result<T, StoreError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "document missing, using empty");
                return Ok(T::default());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if data.trim().is_empty() {
            debug!(path = %self.path.display(), "document empty");
            return Ok(T::default());
        }

        serde_json::from_str(&data).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Write the document pretty-printed with 4-space indentation.
    ///
    /// The bytes go to a sibling `.tmp` file first and are renamed over the
    /// target, so a failed write leaves the previous document intact.
    pub fn save<T: Serialize>(&self, doc: &T) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        doc.serialize(&mut ser).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.tmp_path();
        fs::write(&tmp, &buf).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    /// Create the file as an empty object if it is missing or zero-length.
    pub fn ensure_exists(&self) -> Result<(), StoreError> {
        let present = fs::metadata(&self.path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !present {
            self.save(&serde_json::Map::new())?;
            debug!(path = %self.path.display(), "created empty document");
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        self.path.with_file_name(format!("{}.tmp", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    type Doc = BTreeMap<String, Vec<String>>;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let file = JsonFile::new(dir.path().join("stock.json"));
        let doc: Doc = file.load();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_zero_length_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stock.json");
        fs::write(&path, "").unwrap();
        let doc: Doc = JsonFile::new(&path).load();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_malformed_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stock.json");
        fs::write(&path, "{not json").unwrap();
        let doc: Doc = JsonFile::new(&path).load();
        assert!(doc.is_empty());

        // Valid JSON with the wrong shape is treated the same way
        fs::write(&path, "[1, 2, 3]").unwrap();
        let doc: Doc = JsonFile::new(&path).load();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_try_load_reports_unparseable_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stock.json");
        let file = JsonFile::new(&path);

        // Missing and empty files are still fine
        let doc: Doc = file.try_load().unwrap();
        assert!(doc.is_empty());
        fs::write(&path, "  \n").unwrap();
        let doc: Doc = file.try_load().unwrap();
        assert!(doc.is_empty());

        fs::write(&path, "{not json").unwrap();
        let err = file.try_load::<Doc>().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));

        // Valid JSON in another shape
        fs::write(&path, r#"{"k1": "user1:pass1"}"#).unwrap();
        let err = file.try_load::<Doc>().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn test_save_and_reload_keeps_order() {
        let dir = tempdir().unwrap();
        let file = JsonFile::new(dir.path().join("stock.json"));

        let mut doc = Doc::new();
        doc.insert("netflix".into(), vec!["c".into(), "a".into(), "b".into()]);
        doc.insert("spotify".into(), vec![]);
        file.save(&doc).unwrap();

        let loaded: Doc = file.load();
        assert_eq!(loaded, doc);
        assert!(!file.tmp_path().exists());
    }

    #[test]
    fn test_save_uses_four_space_indent() {
        let dir = tempdir().unwrap();
        let file = JsonFile::new(dir.path().join("cooldown.json"));
        let mut doc = BTreeMap::new();
        doc.insert("42".to_string(), 1.5_f64);
        file.save(&doc).unwrap();

        let raw = fs::read_to_string(file.path()).unwrap();
        assert_eq!(raw, "{\n    \"42\": 1.5\n}");
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let file = JsonFile::new(dir.path().join("data/nested/stock.json"));
        file.save(&Doc::new()).unwrap();
        assert!(file.path().exists());
    }

    #[test]
    fn test_save_failure_is_reported() {
        let dir = tempdir().unwrap();
        // A directory where the file should be makes the rename fail
        let path = dir.path().join("stock.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), "x").unwrap();

        let err = JsonFile::new(&path).save(&Doc::new()).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn test_ensure_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cooldown.json");
        let file = JsonFile::new(&path);

        file.ensure_exists().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");

        // Existing content is left alone
        fs::write(&path, "{\"1\": 2.0}").unwrap();
        file.ensure_exists().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"1\": 2.0}");

        // Zero-length files are reset
        fs::write(&path, "").unwrap();
        file.ensure_exists().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }
}
