//! Build Configuration - One File, Computed Once
//!
//! `BuildConfig` is the declarative file. `BuildSettings` is derived from it
//! once at startup and threaded through every component, so nothing re-reads
//! process state mid-cycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};
use crate::module::ModuleKind;
use crate::ENGINE_VERSION;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl Mode {
    /// Source-map verbosity label recorded in the build manifest.
    pub fn devtool(&self) -> &'static str {
        match self {
            Mode::Development => "eval-cheap-module-source-map",
            Mode::Production => "source-map",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(BuildError::Config(format!("unknown mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_context")]
    pub context: PathBuf,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub resolve: ResolveConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub assets: AssetConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub copy: CopyConfig,
    #[serde(default)]
    pub clean: CleanConfig,
    #[serde(default)]
    pub provide: BTreeMap<String, String>,
    #[serde(default)]
    pub hot: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub engine_min_version: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            context: default_context(),
            output: OutputConfig::default(),
            resolve: ResolveConfig::default(),
            rules: vec![],
            assets: AssetConfig::default(),
            optimization: OptimizationConfig::default(),
            copy: CopyConfig::default(),
            clean: CleanConfig::default(),
            provide: BTreeMap::new(),
            hot: false,
            concurrency: default_concurrency(),
            engine_min_version: None,
        }
    }
}

fn default_context() -> PathBuf { PathBuf::from(".") }
fn default_concurrency() -> usize { 16 }
fn default_true() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(default = "default_style_filename")]
    pub style_filename: String,
    #[serde(default = "default_public_path")]
    pub public_path: String,
}

fn default_output_path() -> PathBuf { PathBuf::from("dist") }
fn default_filename() -> String { "js/[name].js".into() }
fn default_style_filename() -> String { "css/[name].[contenthash].css".into() }
fn default_public_path() -> String { "/".into() }

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            filename: default_filename(),
            style_filename: default_style_filename(),
            public_path: default_public_path(),
        }
    }
}

/// Resolution aliasing, handed to the external resolver untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveConfig {
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub alias: BTreeMap<String, String>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub test: String,
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(default, rename = "use")]
    pub transformers: Vec<TransformerSpec>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub kind: Option<ModuleKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerSpec {
    pub name: String,
    #[serde(default)]
    pub options: Value,
}

impl TransformerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetConfig {
    #[serde(default = "default_inline_limit")]
    pub inline_limit: usize,
    #[serde(default = "default_asset_output_path")]
    pub output_path: String,
    #[serde(default = "default_asset_name")]
    pub name: String,
}

fn default_inline_limit() -> usize { 10240 }
fn default_asset_output_path() -> String { "assets/".into() }
fn default_asset_name() -> String { "[name]_[hash:6].[ext]".into() }

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            inline_limit: default_inline_limit(),
            output_path: default_asset_output_path(),
            name: default_asset_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationConfig {
    #[serde(default = "default_true")]
    pub minimize: bool,
    #[serde(default = "default_true")]
    pub no_emit_on_errors: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            minimize: true,
            no_emit_on_errors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPattern {
    pub from: String,
    pub to: PathBuf,
    #[serde(default = "default_context")]
    pub context: PathBuf,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub dot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    #[serde(default)]
    pub patterns: Vec<CopyPattern>,
    #[serde(default = "default_copy_concurrency")]
    pub concurrency: usize,
}

fn default_copy_concurrency() -> usize { 100 }

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            patterns: vec![],
            concurrency: default_copy_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub keep: Vec<String>,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep: vec![],
        }
    }
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: BuildConfig = serde_json::from_str(&raw)?;
        config.check_engine_version()?;
        Ok(config)
    }

    pub fn check_engine_version(&self) -> Result<()> {
        let Some(min) = &self.engine_min_version else {
            return Ok(());
        };
        let engine_ver = semver::Version::parse(ENGINE_VERSION)
            .map_err(|_| BuildError::Config("Invalid engine version".into()))?;
        let min_ver = semver::Version::parse(min)
            .map_err(|_| BuildError::Config(format!("Invalid engineMinVersion '{}'", min)))?;

        if engine_ver < min_ver {
            return Err(BuildError::EngineVersionMismatch(
                min.clone(),
                ENGINE_VERSION.to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolved settings for one process. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct BuildSettings {
    pub mode: Mode,
    pub minimize: bool,
    pub devtool: &'static str,
    pub hot: bool,
    pub no_emit_on_errors: bool,
    pub output_dir: PathBuf,
    pub public_path: String,
    pub script_filename: String,
    pub style_filename: String,
    pub inline_limit: usize,
    pub asset_output_path: String,
    pub asset_name: String,
    pub concurrency: usize,
    pub copy_concurrency: usize,
}

impl BuildSettings {
    /// Compute settings from the file, with `mode` overriding the file's mode
    /// when given (e.g. from the CLI).
    pub fn resolve(config: &BuildConfig, mode: Option<Mode>) -> Self {
        let mode = mode.unwrap_or(config.mode);
        Self {
            mode,
            minimize: mode == Mode::Production && config.optimization.minimize,
            devtool: mode.devtool(),
            hot: config.hot,
            no_emit_on_errors: config.optimization.no_emit_on_errors,
            output_dir: config.output.path.clone(),
            public_path: config.output.public_path.clone(),
            script_filename: config.output.filename.clone(),
            style_filename: config.output.style_filename.clone(),
            inline_limit: config.assets.inline_limit,
            asset_output_path: config.assets.output_path.clone(),
            asset_name: config.assets.name.clone(),
            concurrency: config.concurrency.max(1),
            copy_concurrency: config.copy.concurrency.max(1),
        }
    }

    /// Default output template for a module kind.
    pub fn output_template(&self, kind: ModuleKind) -> String {
        match kind {
            ModuleKind::Script => self.script_filename.clone(),
            ModuleKind::Style => self.style_filename.clone(),
            ModuleKind::Asset => format!(
                "{}/{}",
                self.asset_output_path.trim_end_matches('/'),
                self.asset_name
            ),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self::resolve(&BuildConfig::default(), None)
    }
}
