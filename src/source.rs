//! Loading raw snippet blocks from disk.
//!
//! A document is a YAML (`.yaml`, `.yml`) or JSON (`.json`) file holding a
//! list of snippet blocks in document order:
//!
//! ```yaml
//! - code: "let count = 0;"
//!   heading: Counters
//! - code: "count++;\nconsole.log(count); // 1"
//!   chained: true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::errors::VerifyError;
use crate::snippet::RawSnippet;

/// One file's worth of snippet blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: PathBuf,
    pub snippets: Vec<RawSnippet>,
}

impl Document {
    /// Name used in report headers.
    pub fn display_name(&self) -> String {
        self.path.display().to_string()
    }
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext, "yaml" | "yml" | "json"))
        .unwrap_or(false)
}

/// Finds every document under `root`, sorted by path.
pub fn discover_documents<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_document(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Parses a document's text. JSON is picked by extension, YAML otherwise.
pub fn parse_document(path: &Path, text: &str) -> Result<Vec<RawSnippet>, VerifyError> {
    let decode = |message: String| VerifyError::Decode {
        path: path.display().to_string(),
        message,
    };
    let is_json = path.extension().map(|ext| ext == "json").unwrap_or(false);
    if is_json {
        serde_json::from_str(text).map_err(|e| decode(e.to_string()))
    } else if text.trim().is_empty() {
        Ok(Vec::new())
    } else {
        serde_yaml::from_str(text).map_err(|e| decode(e.to_string()))
    }
}

/// Reads and parses one document.
pub fn load_document(path: &Path) -> Result<Document, VerifyError> {
    let text = fs::read_to_string(path).map_err(|source| VerifyError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let snippets = parse_document(path, &text)?;
    debug!(path = %path.display(), snippets = snippets.len(), "loaded document");
    Ok(Document {
        path: path.to_path_buf(),
        snippets,
    })
}

/// Loads `path` itself, or every document beneath it when it is a directory.
pub fn load_documents(path: &Path) -> Result<Vec<Document>, VerifyError> {
    if path.is_dir() {
        discover_documents(path)
            .iter()
            .map(|file| load_document(file))
            .collect()
    } else {
        Ok(vec![load_document(path)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn yaml_and_json_documents_load_alike() {
        let yaml = parse_document(
            Path::new("doc.yaml"),
            "- code: \"console.log(1); // 1\"\n  heading: Basics\n",
        )
        .unwrap();
        let json = parse_document(
            Path::new("doc.json"),
            r#"[{"code": "console.log(1); // 1", "heading": "Basics"}]"#,
        )
        .unwrap();
        assert_eq!(yaml, json);
        assert_eq!(yaml[0].heading.as_deref(), Some("Basics"));
    }

    #[test]
    fn unknown_fields_are_decode_errors() {
        let err = parse_document(Path::new("doc.yml"), "- code: x\n  shout: true\n").unwrap_err();
        assert!(matches!(err, VerifyError::Decode { .. }));
    }

    #[test]
    fn directories_are_walked_in_path_order() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.yaml"), "- code: b\n").unwrap();
        fs::write(dir.path().join("a.json"), r#"[{"code": "a"}]"#).unwrap();
        fs::write(dir.path().join("nested/c.yml"), "- code: c\n").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let docs = load_documents(dir.path()).unwrap();
        let codes: Vec<&str> = docs.iter().map(|d| d.snippets[0].code.as_str()).collect();
        assert_eq!(codes, vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_files_are_io_errors() {
        let err = load_document(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, VerifyError::Io { .. }));
    }
}
