//! Provide Transform - Explicit Imports for Provided Identifiers
//!
//! Replaces ambient global injection. The identifier map arrives through
//! `Capabilities`; each referenced identifier gets an import prepended to the
//! first line so line numbering is unchanged.

use async_trait::async_trait;
use regex::Regex;

use crate::module::Content;
use crate::transform::{TransformContext, TransformError, TransformOutput, Transformer};

pub struct ProvideTransform;

/// True if `ident` appears as a standalone identifier (not a property access).
fn references(content: &str, ident: &str) -> Result<bool, regex::Error> {
    let pattern = format!(r"(^|[^\w$.]){}([^\w$]|$)", regex::escape(ident));
    Ok(Regex::new(&pattern)?.is_match(content))
}

/// True if the module already binds `ident` itself: an import, a
/// `const`/`let`/`var` declaration (e.g. `const _ = require("lodash")`),
/// or a function or class of that name.
fn declares(content: &str, ident: &str) -> Result<bool, regex::Error> {
    let ident = regex::escape(ident);
    let pattern = format!(
        r"(^|[^\w$.])(import\s+(\*\s+as\s+)?{ident}\s+from|(const|let|var|function|class)\s+{ident})([^\w$]|$)"
    );
    Ok(Regex::new(&pattern)?.is_match(content))
}

#[async_trait]
impl Transformer for ProvideTransform {
    fn name(&self) -> &str {
        "provide"
    }

    async fn transform(
        &self,
        ctx: &TransformContext<'_>,
        content: Content,
    ) -> Result<TransformOutput, TransformError> {
        let Content::Text(text) = content else {
            return Ok(TransformOutput::new(content));
        };

        let mut prefix = String::new();
        for (ident, request) in &ctx.capabilities.provided {
            let bad = |e: regex::Error| TransformError::new(format!("bad identifier '{}': {}", ident, e));
            if references(&text, ident).map_err(bad)? && !declares(&text, ident).map_err(bad)? {
                prefix.push_str(&format!("import {} from \"{}\"; ", ident, request));
            }
        }

        if prefix.is_empty() {
            return Ok(TransformOutput::new(Content::Text(text)));
        }
        Ok(TransformOutput::new(Content::Text(prefix + &text)))
    }
}
