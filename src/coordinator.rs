//! Build Coordinator - Single Entry Point for a Build Cycle
//!
//! CRITICAL: nothing is written until every module has been transformed and
//! optimized. Under no-emit-on-error, one failed module means zero artifacts.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BuildConfig, BuildSettings, CopyPattern, Mode, ResolveConfig};
use crate::copy::{self, CopyReport};
use crate::emit::AssetEmitter;
use crate::error::{BuildError, Diagnostic, Result};
use crate::hashing::compute_manifest_hash;
use crate::hooks::{HookContext, HookPoint, PluginHookBus};
use crate::module::{Content, FsLoader, GraphEntry, Module, ModuleGraph, SourceLoader};
use crate::optimize::{Artifact, ArtifactCandidate, OptimizationStage};
use crate::plugins::{CleanOutputDir, ManifestWriter};
use crate::rules::RuleMatcher;
use crate::transform::{Capabilities, TransformContext, TransformerRegistry};
use crate::ENGINE_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub cycle_id: String,
    pub state: CycleState,
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub artifacts: Vec<Artifact>,
    pub written: Vec<PathBuf>,
    pub copied: CopyReport,
    pub diagnostics: Vec<Diagnostic>,
    pub manifest_hash: Option<String>,
}

impl BuildReport {
    fn start(cycle_id: String, mode: Mode) -> Self {
        let now = Utc::now();
        Self {
            cycle_id,
            state: CycleState::Succeeded,
            mode,
            started_at: now,
            finished_at: now,
            artifacts: vec![],
            written: vec![],
            copied: CopyReport::default(),
            diagnostics: vec![],
            manifest_hash: None,
        }
    }

    fn fail(&mut self, err: &BuildError) {
        error!(stage = err.stage(), error = %err, "build cycle failure");
        self.state = CycleState::Failed;
        self.diagnostics.push(err.to_diagnostic());
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        info!(
            cycle = %self.cycle_id,
            state = ?self.state,
            artifacts = self.artifacts.len(),
            written = self.written.len(),
            "build cycle finished"
        );
        self
    }

    pub fn is_success(&self) -> bool {
        self.state == CycleState::Succeeded
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

/// Manifest written after emission and hashed for reproducibility checks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest<'a> {
    pub cycle_id: &'a str,
    pub created_at: DateTime<Utc>,
    pub engine_version: &'static str,
    pub mode: Mode,
    pub devtool: &'static str,
    pub public_path: &'a str,
    pub hot: bool,
    pub resolve: &'a ResolveConfig,
    pub artifacts: &'a [Artifact],
    pub manifest_hash: String,
}

impl<'a> BuildManifest<'a> {
    /// The hash covers what was built, not when: cycle id and timestamps are
    /// left out so identical inputs hash identically across cycles.
    fn build(
        cycle_id: &'a str,
        settings: &'a BuildSettings,
        resolve: &'a ResolveConfig,
        artifacts: &'a [Artifact],
    ) -> Result<Self> {
        let manifest_hash = compute_manifest_hash(&json!({
            "engineVersion": ENGINE_VERSION,
            "mode": settings.mode,
            "artifacts": artifacts,
        }))?;
        Ok(Self {
            cycle_id,
            created_at: Utc::now(),
            engine_version: ENGINE_VERSION,
            mode: settings.mode,
            devtool: settings.devtool,
            public_path: &settings.public_path,
            hot: settings.hot,
            resolve,
            artifacts,
            manifest_hash,
        })
    }
}

enum ModuleOutcome {
    Produced(Artifact, Vec<Diagnostic>),
    Skipped(Diagnostic),
    Failed(BuildError, Vec<Diagnostic>),
}

pub struct BuildCoordinator {
    settings: BuildSettings,
    matcher: RuleMatcher,
    capabilities: Capabilities,
    hooks: PluginHookBus,
    optimizer: OptimizationStage,
    emitter: AssetEmitter,
    loader: Arc<dyn SourceLoader>,
    copy: Vec<CopyPattern>,
    resolve: ResolveConfig,
}

impl BuildCoordinator {
    pub fn new(settings: BuildSettings, matcher: RuleMatcher, loader: Arc<dyn SourceLoader>) -> Self {
        Self {
            optimizer: OptimizationStage::new(settings.clone()),
            emitter: AssetEmitter::new(settings.output_dir.clone(), settings.concurrency),
            settings,
            matcher,
            capabilities: Capabilities::default(),
            hooks: PluginHookBus::new(),
            loader,
            copy: vec![],
            resolve: ResolveConfig::default(),
        }
    }

    /// Wire a coordinator from the configuration file, including the
    /// built-in clean and manifest plugins.
    pub fn from_config(
        config: &BuildConfig,
        mode: Option<Mode>,
        registry: &TransformerRegistry,
    ) -> Result<Self> {
        config.check_engine_version()?;
        let settings = BuildSettings::resolve(config, mode);
        let matcher = RuleMatcher::compile(&config.rules, registry)?;
        let loader = Arc::new(FsLoader::new(config.context.clone()));

        let mut coordinator = Self::new(settings, matcher, loader)
            .with_capabilities(Capabilities::new(config.provide.clone()))
            .with_copy_patterns(config.copy.patterns.clone())
            .with_resolve(config.resolve.clone());

        if config.clean.enabled {
            let clean = CleanOutputDir::new(&config.clean.keep)?;
            coordinator.hooks_mut().register(HookPoint::Clean, Arc::new(clean));
        }
        coordinator
            .hooks_mut()
            .register(HookPoint::AfterEmit, Arc::new(ManifestWriter));
        Ok(coordinator)
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_copy_patterns(mut self, patterns: Vec<CopyPattern>) -> Self {
        self.copy = patterns;
        self
    }

    pub fn with_resolve(mut self, resolve: ResolveConfig) -> Self {
        self.resolve = resolve;
        self
    }

    /// Setup-time access to the hook bus. `run` only borrows it shared.
    pub fn hooks_mut(&mut self) -> &mut PluginHookBus {
        &mut self.hooks
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }

    /// Run one build cycle over `graph`.
    pub async fn run(&self, graph: &ModuleGraph) -> BuildReport {
        let cycle_id = Uuid::new_v4().to_string();
        let mut report = BuildReport::start(cycle_id.clone(), self.settings.mode);
        info!(
            cycle = %cycle_id,
            modules = graph.len(),
            mode = ?self.settings.mode,
            "starting build cycle"
        );

        for point in [HookPoint::Clean, HookPoint::BeforeBuild] {
            let ctx = self.hook_context(point, &cycle_id, &[], None);
            match self.hooks.fire(&ctx).await {
                Ok(diagnostics) => report.diagnostics.extend(diagnostics),
                Err(err) => {
                    report.fail(&err);
                    return report.finish();
                }
            }
        }

        let outcomes: Vec<ModuleOutcome> = stream::iter(&graph.modules)
            .map(|entry| self.process(entry))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let mut artifacts = vec![];
        for outcome in outcomes {
            match outcome {
                ModuleOutcome::Produced(artifact, diagnostics) => {
                    report.diagnostics.extend(diagnostics);
                    artifacts.push(artifact);
                }
                ModuleOutcome::Skipped(diagnostic) => report.diagnostics.push(diagnostic),
                ModuleOutcome::Failed(err, diagnostics) => {
                    report.diagnostics.extend(diagnostics);
                    report.fail(&err);
                }
            }
        }
        // Completion order is arbitrary; keep reports stable.
        artifacts.sort_by(|a, b| a.source.cmp(&b.source));

        if !report.is_success() && self.settings.no_emit_on_errors {
            warn!(cycle = %cycle_id, "module failures, emission suppressed for the whole cycle");
            return report.finish();
        }

        // Copy patterns are expanded up front so a bad glob or missing
        // context fails the cycle before anything is written.
        let copy_plan = match copy::plan_all(&self.copy, &self.settings.output_dir) {
            Ok(plan) => plan,
            Err(err) => {
                report.fail(&err);
                return report.finish();
            }
        };

        match self.emitter.emit(&artifacts).await {
            Ok(written) => report.written = written,
            Err(err) => {
                report.fail(&err);
                return report.finish();
            }
        }

        match copy::execute(copy_plan, self.settings.copy_concurrency).await {
            Ok(copied) => report.copied = copied,
            Err(err) => {
                report.fail(&err);
                return report.finish();
            }
        }

        report.artifacts = artifacts;
        let manifest = BuildManifest::build(&cycle_id, &self.settings, &self.resolve, &report.artifacts)
            .and_then(|m| Ok((m.manifest_hash.clone(), serde_json::to_value(&m)?)));
        let manifest_value = match manifest {
            Ok((hash, value)) => {
                report.manifest_hash = Some(hash);
                Some(value)
            }
            Err(err) => {
                report.fail(&err);
                None
            }
        };

        let ctx = self.hook_context(
            HookPoint::AfterEmit,
            &cycle_id,
            &report.artifacts,
            manifest_value.as_ref(),
        );
        match self.hooks.fire(&ctx).await {
            Ok(diagnostics) => report.diagnostics.extend(diagnostics),
            Err(err) => report.diagnostics.push(err.to_diagnostic()),
        }

        report.finish()
    }

    fn hook_context<'a>(
        &'a self,
        point: HookPoint,
        cycle_id: &'a str,
        artifacts: &'a [Artifact],
        manifest: Option<&'a serde_json::Value>,
    ) -> HookContext<'a> {
        HookContext {
            point,
            cycle_id,
            output_dir: &self.settings.output_dir,
            artifacts,
            manifest,
        }
    }

    async fn process(&self, entry: &GraphEntry) -> ModuleOutcome {
        let bytes = match self.loader.load(&entry.path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) if entry.optional => {
                warn!(path = %entry.path, "optional module not found, skipping");
                return ModuleOutcome::Skipped(Diagnostic::warning(
                    entry.path.clone(),
                    "resolve",
                    BuildError::ResolutionMiss(entry.path.clone()).to_string(),
                ));
            }
            Ok(None) => {
                return ModuleOutcome::Failed(BuildError::ResolutionMiss(entry.path.clone()), vec![])
            }
            Err(err) => return ModuleOutcome::Failed(err, vec![]),
        };

        let rule = self.matcher.resolve(&entry.path);
        let kind = rule.and_then(|r| r.kind).unwrap_or_else(|| entry.kind());
        let module = match Module::new(entry.path.clone(), kind, bytes) {
            Ok(module) => module,
            Err(err) => return ModuleOutcome::Failed(err, vec![]),
        };
        debug!(path = %module.path, ?kind, rule = ?rule.map(|r| r.index), "processing module");

        let (content, diagnostics) = match rule {
            Some(rule) => {
                let ctx = TransformContext {
                    path: &module.path,
                    kind,
                    settings: &self.settings,
                    capabilities: &self.capabilities,
                };
                match rule.chain.execute(&ctx, module.content.clone()).await {
                    Ok(output) => (output.content, output.diagnostics),
                    Err(failure) => return ModuleOutcome::Failed(failure.error, failure.diagnostics),
                }
            }
            None => (module.content.clone(), vec![]),
        };

        let template = rule
            .and_then(|r| r.output.clone())
            .unwrap_or_else(|| self.settings.output_template(kind));
        let candidate = ArtifactCandidate {
            name: module.name().to_string(),
            ext: module.extension(),
            source: module.path,
            kind,
            content,
            template,
        };

        match self.optimizer.optimize(candidate) {
            Ok(artifact) => ModuleOutcome::Produced(artifact, diagnostics),
            Err(err) => ModuleOutcome::Failed(err, diagnostics),
        }
    }
}

/// Convenience for callers holding text content they want to run through
/// the matching chain without a full cycle.
pub async fn transform_text(
    coordinator: &BuildCoordinator,
    path: &str,
    text: String,
) -> Result<Option<String>> {
    let Some(rule) = coordinator.matcher.resolve(path) else {
        return Ok(None);
    };
    let kind = rule.kind.unwrap_or_else(|| GraphEntry::new(path).kind());
    let ctx = TransformContext {
        path,
        kind,
        settings: &coordinator.settings,
        capabilities: &coordinator.capabilities,
    };
    let output = rule.chain.execute(&ctx, Content::Text(text)).await?;
    Ok(output.content.as_text().map(str::to_string))
}
