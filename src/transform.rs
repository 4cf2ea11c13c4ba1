//! Transformer Contract - Content In, Content Out
//!
//! Transformers are pure with respect to build state: they see one module's
//! content plus read-only context and return new content and diagnostics.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::{BuildSettings, TransformerSpec};
use crate::error::{BuildError, Diagnostic, Result};
use crate::instrument::InstrumentationTransform;
use crate::module::{Content, ModuleKind};
use crate::provide::ProvideTransform;

/// Utilities handed explicitly to transformers instead of ambient globals.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// identifier -> module request, e.g. `_` -> `lodash`
    pub provided: BTreeMap<String, String>,
}

impl Capabilities {
    pub fn new(provided: BTreeMap<String, String>) -> Self {
        Self { provided }
    }
}

/// Read-only view of the module and cycle a transformer runs in.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub path: &'a str,
    pub kind: ModuleKind,
    pub settings: &'a BuildSettings,
    pub capabilities: &'a Capabilities,
}

#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub content: Content,
    pub diagnostics: Vec<Diagnostic>,
}

impl TransformOutput {
    pub fn new(content: Content) -> Self {
        Self {
            content,
            diagnostics: vec![],
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

/// Fatal error raised by a single transformer.
#[derive(Debug, Clone)]
pub struct TransformError {
    pub message: String,
    pub line: Option<usize>,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

/// One stage of a chain. May suspend (e.g. awaiting an external compiler).
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    async fn transform(
        &self,
        ctx: &TransformContext<'_>,
        content: Content,
    ) -> std::result::Result<TransformOutput, TransformError>;
}

type Factory = Arc<dyn Fn(&Value) -> Result<Arc<dyn Transformer>> + Send + Sync>;

/// Name -> factory lookup used when compiling rules.
pub struct TransformerRegistry {
    factories: HashMap<String, Factory>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in `instrument` and `provide` transformers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("instrument", |options| {
            Ok(Arc::new(InstrumentationTransform::from_options(options)?) as Arc<dyn Transformer>)
        });
        registry.register("provide", |_| Ok(Arc::new(ProvideTransform) as Arc<dyn Transformer>));
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Transformer>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Register an already-built transformer under its own name.
    pub fn register_instance(&mut self, transformer: Arc<dyn Transformer>) {
        let name = transformer.name().to_string();
        self.register(&name, move |_| Ok(Arc::clone(&transformer)));
    }

    pub fn build(&self, spec: &TransformerSpec) -> Result<Arc<dyn Transformer>> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| BuildError::UnknownTransformer(spec.name.clone()))?;
        factory(&spec.options)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
