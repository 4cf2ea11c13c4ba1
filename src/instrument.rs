//! Instrumentation Transform - Provenance for Logging Calls
//!
//! Line-based, no lexing. A line containing the call token anywhere (code,
//! string or comment) gets its first occurrence rewritten. Running the
//! transform twice nests the metadata twice; the chain must run it once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{BuildError, Result};
use crate::module::Content;
use crate::transform::{TransformContext, TransformError, TransformOutput, Transformer};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static INSTRUMENT_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_instrument_call_count() -> u32 {
    INSTRUMENT_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_instrument_call_count() {
    INSTRUMENT_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_call")]
    pub call: String,
    #[serde(default = "default_file_tag")]
    pub file_tag: String,
    #[serde(default = "default_line_tag")]
    pub line_tag: String,
    #[serde(default = "default_terminator")]
    pub terminator: String,
}

fn default_true() -> bool { true }
fn default_call() -> String { "console.log(".into() }
fn default_file_tag() -> String { "file".into() }
fn default_line_tag() -> String { "line".into() }
fn default_terminator() -> String { "\r\n".into() }

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            call: default_call(),
            file_tag: default_file_tag(),
            line_tag: default_line_tag(),
            terminator: default_terminator(),
        }
    }
}

/// Rewrite every line containing `options.call`, injecting the source path
/// and zero-based line index ahead of the original arguments.
///
/// The output always has exactly as many lines as the input, joined with
/// `options.terminator`.
pub fn instrument(content: &str, path: &str, options: &InstrumentOptions) -> String {
    let quoted_path = escape_single_quoted(path);
    let mut rewritten = 0usize;

    let lines: Vec<String> = content
        .split('\n')
        .enumerate()
        .map(|(idx, raw)| {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if options.call.is_empty() || !line.contains(&options.call) {
                return line.to_string();
            }
            rewritten += 1;
            let injected = format!(
                "{}'{}: {}', '{}: {}', ",
                options.call, options.file_tag, quoted_path, options.line_tag, idx
            );
            line.replacen(&options.call, &injected, 1)
        })
        .collect();

    debug!(path, lines = lines.len(), rewritten, "instrumented module");
    lines.join(&options.terminator)
}

fn escape_single_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

pub struct InstrumentationTransform {
    options: InstrumentOptions,
}

impl InstrumentationTransform {
    pub fn new(options: InstrumentOptions) -> Self {
        Self { options }
    }

    pub fn from_options(options: &Value) -> Result<Self> {
        if options.is_null() {
            return Ok(Self::new(InstrumentOptions::default()));
        }
        let options: InstrumentOptions = serde_json::from_value(options.clone())
            .map_err(|e| BuildError::Config(format!("instrument options: {}", e)))?;
        Ok(Self::new(options))
    }

    pub fn options(&self) -> &InstrumentOptions {
        &self.options
    }
}

impl Default for InstrumentationTransform {
    fn default() -> Self {
        Self::new(InstrumentOptions::default())
    }
}

#[async_trait]
impl Transformer for InstrumentationTransform {
    fn name(&self) -> &str {
        "instrument"
    }

    async fn transform(
        &self,
        ctx: &TransformContext<'_>,
        content: Content,
    ) -> std::result::Result<TransformOutput, TransformError> {
        #[cfg(feature = "test-hooks")]
        INSTRUMENT_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        if !self.options.enabled {
            return Ok(TransformOutput::new(content));
        }
        // Binary content has no lines to rewrite.
        let Content::Text(text) = content else {
            return Ok(TransformOutput::new(content));
        };
        Ok(TransformOutput::new(Content::Text(instrument(
            &text,
            ctx.path,
            &self.options,
        ))))
    }
}
