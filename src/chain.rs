//! Transform Chain Executor
//!
//! CONTRACT: stages run in REVERSE declaration order. The last-declared
//! transformer sees the raw module content; the first-declared one produces
//! the final content. Each stage's output is the next stage's input.

use std::sync::Arc;
use tracing::debug;

use crate::error::{BuildError, Diagnostic};
use crate::module::Content;
use crate::transform::{TransformContext, Transformer};

/// Result of a chain that ran to completion.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub content: Content,
    pub diagnostics: Vec<Diagnostic>,
}

/// A fatal stage error plus whatever the stages before it reported.
#[derive(Debug)]
pub struct ChainFailure {
    pub error: BuildError,
    pub diagnostics: Vec<Diagnostic>,
}

impl From<ChainFailure> for BuildError {
    fn from(failure: ChainFailure) -> Self {
        failure.error
    }
}

/// Ordered list of transformers, kept in declaration order.
#[derive(Clone, Default)]
pub struct TransformChain {
    declared: Vec<Arc<dyn Transformer>>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage at the end of the declaration list.
    pub fn push(&mut self, transformer: Arc<dyn Transformer>) {
        self.declared.push(transformer);
    }

    pub fn with(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.push(transformer);
        self
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// Names in declaration order.
    pub fn declared_names(&self) -> Vec<&str> {
        self.declared.iter().map(|t| t.name()).collect()
    }

    /// Stages in the order they execute: last-declared first.
    pub fn execution_order(&self) -> impl Iterator<Item = &Arc<dyn Transformer>> {
        self.declared.iter().rev()
    }

    /// Run every stage over `content`. A fatal stage error aborts the chain
    /// and no partial content is returned.
    pub async fn execute(
        &self,
        ctx: &TransformContext<'_>,
        content: Content,
    ) -> Result<ChainOutput, ChainFailure> {
        let mut current = content;
        let mut diagnostics = vec![];

        for stage in self.execution_order() {
            debug!(path = ctx.path, transformer = stage.name(), "running stage");
            let output = match stage.transform(ctx, current).await {
                Ok(output) => output,
                Err(e) => {
                    return Err(ChainFailure {
                        error: BuildError::TransformFailure {
                            path: ctx.path.to_string(),
                            transformer: stage.name().to_string(),
                            line: e.line,
                            message: e.message,
                        },
                        diagnostics,
                    })
                }
            };
            diagnostics.extend(output.diagnostics);
            current = output.content;
        }

        Ok(ChainOutput {
            content: current,
            diagnostics,
        })
    }
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.declared_names()).finish()
    }
}
