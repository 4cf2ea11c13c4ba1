//! Module Model - Graph Input and Content Loading
//!
//! The resolver owns graph construction. We only consume path, kind and
//! optionality, and load bytes through a `SourceLoader`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Script,
    Style,
    Asset,
}

impl ModuleKind {
    /// Detect kind from the file extension.
    pub fn detect(path: &str) -> Self {
        match extension_of(path).as_deref() {
            Some("js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx") => ModuleKind::Script,
            Some("css" | "less" | "scss" | "sass") => ModuleKind::Style,
            _ => ModuleKind::Asset,
        }
    }

    pub fn is_text(&self) -> bool {
        !matches!(self, ModuleKind::Asset)
    }
}

/// Module content. Text kinds are decoded once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
}

impl Content {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Content::Text(s) => s.as_bytes(),
            Content::Binary(b) => b,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            Content::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One entry of the resolver's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEntry {
    pub path: String,
    #[serde(default)]
    pub kind: Option<ModuleKind>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl GraphEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: None,
            optional: false,
            dependencies: vec![],
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind.unwrap_or_else(|| ModuleKind::detect(&self.path))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleGraph {
    pub modules: Vec<GraphEntry>,
}

impl ModuleGraph {
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            modules: paths.into_iter().map(GraphEntry::new).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// A module owned by the build cycle that discovered it.
#[derive(Debug, Clone)]
pub struct Module {
    pub path: String,
    pub kind: ModuleKind,
    pub content: Content,
}

impl Module {
    pub fn new(path: impl Into<String>, kind: ModuleKind, bytes: Vec<u8>) -> Result<Self> {
        let path = path.into();
        let content = if kind.is_text() {
            match String::from_utf8(bytes) {
                Ok(text) => Content::Text(text),
                Err(_) => {
                    return Err(BuildError::TransformFailure {
                        path,
                        transformer: "load".into(),
                        line: None,
                        message: "content is not valid UTF-8".into(),
                    })
                }
            }
        } else {
            Content::Binary(bytes)
        };
        Ok(Self {
            path,
            kind,
            content,
        })
    }

    /// File stem used for the `[name]` placeholder.
    pub fn name(&self) -> &str {
        let file = self.path.rsplit(['/', '\\']).next().unwrap_or(&self.path);
        match file.rfind('.') {
            Some(idx) if idx > 0 => &file[..idx],
            _ => file,
        }
    }

    pub fn extension(&self) -> String {
        extension_of(&self.path).unwrap_or_default()
    }
}

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// Supplies raw module bytes. `Ok(None)` means the path has no content.
#[async_trait]
pub trait SourceLoader: Send + Sync {
    async fn load(&self, path: &str) -> Result<Option<Vec<u8>>>;
}

/// Reads modules from disk; relative paths resolve against `root`.
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SourceLoader for FsLoader {
    async fn load(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.root.join(path);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BuildError::Io(e)),
        }
    }
}

/// In-memory loader for embedders and tests.
#[derive(Default)]
pub struct MemoryLoader {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), content.into());
    }
}

#[async_trait]
impl SourceLoader for MemoryLoader {
    async fn load(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files.get(path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_detection() {
        assert_eq!(ModuleKind::detect("/src/index.js"), ModuleKind::Script);
        assert_eq!(ModuleKind::detect("/src/App.JSX"), ModuleKind::Script);
        assert_eq!(ModuleKind::detect("/src/a.less"), ModuleKind::Style);
        assert_eq!(ModuleKind::detect("/img/logo.png"), ModuleKind::Asset);
        assert_eq!(ModuleKind::detect("LICENSE"), ModuleKind::Asset);
    }

    #[test]
    fn test_explicit_kind_wins() {
        let mut entry = GraphEntry::new("/src/data.txt");
        entry.kind = Some(ModuleKind::Script);
        assert_eq!(entry.kind(), ModuleKind::Script);
    }

    #[test]
    fn test_module_name_and_extension() {
        let m = Module::new("/src/assets/logo.min.png", ModuleKind::Asset, vec![1]).unwrap();
        assert_eq!(m.name(), "logo.min");
        assert_eq!(m.extension(), "png");

        let m = Module::new(".babelrc", ModuleKind::Asset, vec![]).unwrap();
        assert_eq!(m.name(), ".babelrc");
    }

    #[test]
    fn test_non_utf8_script_rejected() {
        let err = Module::new("/src/a.js", ModuleKind::Script, vec![0xff, 0xfe]).unwrap_err();
        assert_eq!(err.stage(), "transform");
    }

    #[test]
    fn test_graph_json_shape() {
        let graph: ModuleGraph = serde_json::from_str(
            r#"{"modules": [{"path": "/src/a.js", "dependencies": ["/src/b.js"]},
                            {"path": "/src/opt.css", "optional": true, "kind": "style"}]}"#,
        )
        .unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.modules[0].kind(), ModuleKind::Script);
        assert!(graph.modules[1].optional);
    }

    #[tokio::test]
    async fn test_memory_loader_miss_is_none() {
        let loader = MemoryLoader::new().with("/a.js", "x");
        assert_eq!(loader.load("/a.js").await.unwrap(), Some(b"x".to_vec()));
        assert_eq!(loader.load("/b.js").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_loader_reads_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "let a;").unwrap();
        let loader = FsLoader::new(dir.path());
        assert_eq!(loader.load("a.js").await.unwrap(), Some(b"let a;".to_vec()));
        assert_eq!(loader.load("missing.js").await.unwrap(), None);
    }
}
