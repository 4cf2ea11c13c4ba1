//! Rule Matcher - First Match Wins
//!
//! Rules are consulted in declaration order. A rule whose exclude pattern
//! matches is skipped entirely. At most one rule applies to a module.

use regex::Regex;
use serde::Serialize;

use crate::chain::TransformChain;
use crate::config::RuleConfig;
use crate::error::{BuildError, Result};
use crate::module::ModuleKind;
use crate::transform::TransformerRegistry;

#[derive(Debug)]
pub struct TransformRule {
    pub index: usize,
    test: Regex,
    exclude: Option<Regex>,
    pub chain: TransformChain,
    /// Output path template overriding the per-kind default.
    pub output: Option<String>,
    pub kind: Option<ModuleKind>,
}

impl TransformRule {
    pub fn compile(index: usize, config: &RuleConfig, registry: &TransformerRegistry) -> Result<Self> {
        let test = compile_pattern(&config.test)?;
        let exclude = config.exclude.as_deref().map(compile_pattern).transpose()?;

        let mut chain = TransformChain::new();
        for spec in &config.transformers {
            chain.push(registry.build(spec)?);
        }

        Ok(Self {
            index,
            test,
            exclude,
            chain,
            output: config.output.clone(),
            kind: config.kind,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.exclude.as_ref().is_some_and(|re| re.is_match(path)) {
            return false;
        }
        self.test.is_match(path)
    }

    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            index: self.index,
            test: self.test.as_str().to_string(),
            exclude: self.exclude.as_ref().map(|re| re.as_str().to_string()),
            declared: self.chain.declared_names().iter().map(|s| s.to_string()).collect(),
            execution_order: self.chain.execution_order().map(|t| t.name().to_string()).collect(),
            output: self.output.clone(),
        }
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| BuildError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Serializable view of a compiled rule, for listing.
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub index: usize,
    pub test: String,
    pub exclude: Option<String>,
    pub declared: Vec<String>,
    pub execution_order: Vec<String>,
    pub output: Option<String>,
}

/// Static, ordered rule list. Read-only during a cycle.
#[derive(Debug, Default)]
pub struct RuleMatcher {
    rules: Vec<TransformRule>,
}

impl RuleMatcher {
    pub fn new(rules: Vec<TransformRule>) -> Self {
        Self { rules }
    }

    pub fn compile(configs: &[RuleConfig], registry: &TransformerRegistry) -> Result<Self> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(idx, config)| TransformRule::compile(idx, config, registry))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// The single applicable rule, or `None` for pass-through.
    pub fn resolve(&self, path: &str) -> Option<&TransformRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn rules(&self) -> &[TransformRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
