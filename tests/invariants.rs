//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};

use forgebundle_core::{
    config::{BuildConfig, CopyPattern, RuleConfig, TransformerSpec},
    coordinator::CycleState,
    hooks::HookContext,
    instrument, BuildCoordinator, BuildPlugin, BuildSettings, Content, GraphEntry,
    HookPoint, InstrumentOptions, Mode, ModuleGraph, ModuleKind, RuleMatcher, TransformChain,
    TransformContext, Transformer, TransformerRegistry, Capabilities,
    module::MemoryLoader,
    transform::{TransformError, TransformOutput},
};

/// Records the input it saw and appends its own tag.
struct Tagger {
    tag: &'static str,
    seen: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Transformer for Tagger {
    fn name(&self) -> &str {
        self.tag
    }

    async fn transform(
        &self,
        _ctx: &TransformContext<'_>,
        content: Content,
    ) -> Result<TransformOutput, TransformError> {
        let text = content.as_text().unwrap_or_default().to_string();
        self.seen.lock().unwrap().push((self.tag.to_string(), text.clone()));
        Ok(TransformOutput::new(Content::Text(format!("{}>{}", text, self.tag))))
    }
}

/// Fails on any content containing `syntax error`.
struct Strict;

#[async_trait]
impl Transformer for Strict {
    fn name(&self) -> &str {
        "strict"
    }

    async fn transform(
        &self,
        _ctx: &TransformContext<'_>,
        content: Content,
    ) -> Result<TransformOutput, TransformError> {
        match content.as_text() {
            Some(text) if text.contains("syntax error") => {
                Err(TransformError::new("syntax error").at_line(0))
            }
            _ => Ok(TransformOutput::new(content)),
        }
    }
}

fn registry_with_strict() -> TransformerRegistry {
    let mut registry = TransformerRegistry::with_builtins();
    registry.register_instance(Arc::new(Strict));
    registry
}

fn rule(test: &str, exclude: Option<&str>, names: &[&str], output: Option<&str>) -> RuleConfig {
    RuleConfig {
        test: test.into(),
        exclude: exclude.map(String::from),
        transformers: names.iter().map(|n| TransformerSpec::new(*n)).collect(),
        output: output.map(String::from),
        kind: None,
    }
}

fn build_coordinator(out: &Path, rules: Vec<RuleConfig>, loader: MemoryLoader, mode: Mode) -> BuildCoordinator {
    let mut config = BuildConfig::default();
    config.output.path = out.to_path_buf();
    config.assets.inline_limit = 16;
    config.rules = rules;
    let settings = BuildSettings::resolve(&config, Some(mode));
    let matcher = RuleMatcher::compile(&config.rules, &registry_with_strict()).unwrap();
    BuildCoordinator::new(settings, matcher, Arc::new(loader))
}

fn count_files(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count()
}

#[test]
fn invariant_line_count_preserved() {
    let inputs = [
        "",
        "\n",
        "console.log(1)",
        "a\nconsole.log(b)\n\n",
        "x\r\ny\r\nconsole.log(z)\r\n",
        "// console.log(\nconsole.log(console.log(1))",
    ];
    for input in inputs {
        let out = instrument(input, "/src/a.js", &InstrumentOptions::default());
        assert_eq!(
            out.split("\r\n").count(),
            input.split('\n').count(),
            "line count changed for {:?}",
            input
        );
    }
}

#[test]
fn invariant_selective_rewrite() {
    let input = "const a = 1;\nconsole.log(a, 2);\nreturn a;";
    let out = instrument(input, "/src/a.js", &InstrumentOptions::default());
    let lines: Vec<_> = out.split("\r\n").collect();

    // Untouched lines are byte-identical
    assert_eq!(lines[0], "const a = 1;");
    assert_eq!(lines[2], "return a;");

    // Matching line: original call, injected path, injected line, original args
    assert_eq!(lines[1], "console.log('file: /src/a.js', 'line: 1', a, 2);");
}

#[test]
fn invariant_example_scenario() {
    let input = "\n\n\n\nconsole.log(foo)";
    let out = instrument(input, "/src/a.js", &InstrumentOptions::default());
    assert_eq!(
        out.split("\r\n").nth(4),
        Some("console.log('file: /src/a.js', 'line: 4', foo)")
    );
}

#[test]
fn invariant_instrumentation_not_idempotent() {
    let options = InstrumentOptions::default();
    let once = instrument("console.log(x)", "/src/a.js", &options);
    let twice = instrument(&once, "/src/a.js", &options);
    assert_eq!(twice.matches("'file: /src/a.js'").count(), 2);
    assert_eq!(twice.matches("'line: 0'").count(), 2);
}

#[tokio::test]
async fn invariant_chain_runs_reverse_declaration_order() {
    let seen = Arc::new(Mutex::new(vec![]));
    let chain = TransformChain::new()
        .with(Arc::new(Tagger { tag: "A", seen: Arc::clone(&seen) }))
        .with(Arc::new(Tagger { tag: "B", seen: Arc::clone(&seen) }));

    let settings = BuildSettings::default();
    let caps = Capabilities::default();
    let ctx = TransformContext {
        path: "/src/a.js",
        kind: ModuleKind::Script,
        settings: &settings,
        capabilities: &caps,
    };
    let out = chain.execute(&ctx, Content::Text("src".into())).await.unwrap();

    // B's output is A's input
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], ("B".to_string(), "src".to_string()));
    assert_eq!(seen[1], ("A".to_string(), "src>B".to_string()));
    assert_eq!(out.content, Content::Text("src>B>A".into()));
}

#[tokio::test]
async fn invariant_rule_exclusivity() {
    let dir = tempfile::tempdir().unwrap();
    let loader = MemoryLoader::new()
        .with("/node_modules/lib/index.js", "console.log(1)")
        .with("/src/app.js", "console.log(2)");
    let coordinator = build_coordinator(
        dir.path(),
        vec![
            rule(r"\.js$", Some("node_modules"), &["instrument"], Some("app/[name].js")),
            rule(r"\.js$", None, &[], Some("vendor/[name].js")),
        ],
        loader,
        Mode::Development,
    );

    let report = coordinator
        .run(&ModuleGraph::from_paths(["/node_modules/lib/index.js", "/src/app.js"]))
        .await;
    assert!(report.is_success(), "{:?}", report.diagnostics);

    // Excluded module got only the second rule's (empty) chain
    let vendor = std::fs::read_to_string(dir.path().join("vendor/index.js")).unwrap();
    assert_eq!(vendor, "console.log(1)");
    let app = std::fs::read_to_string(dir.path().join("app/app.js")).unwrap();
    assert_eq!(app, "console.log('file: /src/app.js', 'line: 0', 2)");
}

#[tokio::test]
async fn invariant_whole_cycle_abort() {
    let dir = tempfile::tempdir().unwrap();
    let loader = MemoryLoader::new()
        .with("/src/m1.js", "ok()")
        .with("/src/m2.js", "syntax error")
        .with("/img/big.png", vec![1u8; 64]);
    let coordinator = build_coordinator(
        dir.path(),
        vec![rule(r"\.js$", None, &["strict"], None)],
        loader,
        Mode::Production,
    );

    let report = coordinator
        .run(&ModuleGraph::from_paths(["/src/m1.js", "/src/m2.js", "/img/big.png"]))
        .await;

    assert_eq!(report.state, CycleState::Failed);
    assert!(report.artifacts.is_empty());
    assert!(report.written.is_empty());
    assert_eq!(count_files(dir.path()), 0);

    let error = report.errors().next().unwrap();
    assert_eq!(error.path.as_deref(), Some("/src/m2.js"));
    assert_eq!(error.stage, "transform");
    assert!(error.message.contains("strict"));
}

#[tokio::test]
async fn invariant_optimization_failure_aborts_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let loader = MemoryLoader::new()
        .with("/src/ok.js", "ok()")
        .with("/src/broken.css", "a { color: red;");
    let coordinator = build_coordinator(dir.path(), vec![], loader, Mode::Production);

    let report = coordinator
        .run(&ModuleGraph::from_paths(["/src/ok.js", "/src/broken.css"]))
        .await;
    assert_eq!(report.state, CycleState::Failed);
    assert_eq!(count_files(dir.path()), 0);
    assert_eq!(report.errors().next().unwrap().stage, "optimize");
}

#[tokio::test]
async fn invariant_emit_on_error_when_policy_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BuildConfig::default();
    config.output.path = dir.path().to_path_buf();
    config.optimization.no_emit_on_errors = false;
    config.rules = vec![rule(r"\.js$", None, &["strict"], None)];
    let settings = BuildSettings::resolve(&config, Some(Mode::Development));
    let matcher = RuleMatcher::compile(&config.rules, &registry_with_strict()).unwrap();
    let loader = MemoryLoader::new()
        .with("/src/m1.js", "ok()")
        .with("/src/m2.js", "syntax error");
    let coordinator = BuildCoordinator::new(settings, matcher, Arc::new(loader));

    let report = coordinator.run(&ModuleGraph::from_paths(["/src/m1.js", "/src/m2.js"])).await;
    assert_eq!(report.state, CycleState::Failed);
    assert!(dir.path().join("js/m1.js").exists());
    assert!(!dir.path().join("js/m2.js").exists());
}

#[tokio::test]
async fn invariant_bad_copy_pattern_aborts_before_write() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("dist");
    let coordinator = build_coordinator(
        &out,
        vec![],
        MemoryLoader::new().with("/src/a.js", "a()"),
        Mode::Production,
    )
    .with_copy_patterns(vec![CopyPattern {
        from: "**/*".into(),
        to: "static".into(),
        context: dir.path().join("missing"),
        ignore: vec![],
        force: false,
        dot: false,
    }]);

    let report = coordinator.run(&ModuleGraph::from_paths(["/src/a.js"])).await;
    assert_eq!(report.state, CycleState::Failed);
    assert!(report.written.is_empty());
    assert!(!out.join("js/a.js").exists());
    assert_eq!(count_files(&out), 0);
}

#[tokio::test]
async fn invariant_hash_determinism() {
    let css = "body {\n  color: red;\n}\n";
    let mut names = vec![];
    for _ in 0..2 {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = build_coordinator(
            dir.path(),
            vec![],
            MemoryLoader::new().with("/src/main.css", css),
            Mode::Production,
        );
        let report = coordinator.run(&ModuleGraph::from_paths(["/src/main.css"])).await;
        assert!(report.is_success());
        let path = report.artifacts[0].output_path().unwrap().clone();
        assert!(dir.path().join(&path).exists());
        names.push((path, report.manifest_hash.clone().unwrap()));
    }
    assert_eq!(names[0], names[1]);

    let dir = tempfile::tempdir().unwrap();
    let coordinator = build_coordinator(
        dir.path(),
        vec![],
        MemoryLoader::new().with("/src/main.css", "body { color: blue }"),
        Mode::Production,
    );
    let report = coordinator.run(&ModuleGraph::from_paths(["/src/main.css"])).await;
    assert_ne!(report.artifacts[0].output_path().unwrap(), &names[0].0);
}

#[tokio::test]
async fn invariant_inlining_threshold() {
    let dir = tempfile::tempdir().unwrap();
    // inline limit is 16 bytes
    let loader = MemoryLoader::new()
        .with("/img/below.png", vec![0u8; 15])
        .with("/img/exact.png", vec![0u8; 16]);
    let coordinator = build_coordinator(dir.path(), vec![], loader, Mode::Production);

    let report = coordinator
        .run(&ModuleGraph::from_paths(["/img/below.png", "/img/exact.png"]))
        .await;
    assert!(report.is_success());

    let below = report.artifacts.iter().find(|a| a.source == "/img/below.png").unwrap();
    let exact = report.artifacts.iter().find(|a| a.source == "/img/exact.png").unwrap();
    assert!(below.is_inlined());
    assert!(!exact.is_inlined());
    assert!(dir.path().join(exact.output_path().unwrap()).exists());
    assert_eq!(report.written.len(), 1);
}

struct Failing(HookPoint);

#[async_trait]
impl BuildPlugin for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn call(&self, _ctx: &HookContext<'_>) -> Result<(), String> {
        Err(format!("refused at {}", self.0))
    }
}

#[tokio::test]
async fn invariant_clean_hook_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut coordinator = build_coordinator(
        dir.path(),
        vec![],
        MemoryLoader::new().with("/src/a.js", "a()"),
        Mode::Production,
    );
    coordinator
        .hooks_mut()
        .register(HookPoint::Clean, Arc::new(Failing(HookPoint::Clean)));

    let report = coordinator.run(&ModuleGraph::from_paths(["/src/a.js"])).await;
    assert_eq!(report.state, CycleState::Failed);
    assert_eq!(count_files(dir.path()), 0);
    assert_eq!(report.errors().next().unwrap().stage, "hook");
}

#[tokio::test]
async fn invariant_after_emit_failure_keeps_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let mut coordinator = build_coordinator(
        dir.path(),
        vec![],
        MemoryLoader::new().with("/src/a.js", "a()"),
        Mode::Production,
    );
    coordinator
        .hooks_mut()
        .register(HookPoint::AfterEmit, Arc::new(Failing(HookPoint::AfterEmit)));

    let report = coordinator.run(&ModuleGraph::from_paths(["/src/a.js"])).await;
    assert!(report.is_success());
    assert!(dir.path().join("js/a.js").exists());
    assert!(report.diagnostics.iter().any(|d| d.stage == "hook"));
}

#[tokio::test]
async fn invariant_from_config_writes_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("index.js"), "console.log(_.VERSION)\n").unwrap();

    let config: BuildConfig = serde_json::from_value(serde_json::json!({
        "mode": "development",
        "context": dir.path(),
        "output": { "path": dir.path().join("dist"), "publicPath": "https://cdn.example.com/" },
        "provide": { "_": "lodash" },
        "rules": [{
            "test": "\\.jsx?$",
            "exclude": "node_modules",
            "use": [{ "name": "provide" }, { "name": "instrument", "options": { "terminator": "\n" } }]
        }]
    }))
    .unwrap();
    let coordinator =
        BuildCoordinator::from_config(&config, None, &TransformerRegistry::with_builtins()).unwrap();

    let graph = ModuleGraph {
        modules: vec![GraphEntry::new("src/index.js")],
    };
    let report = coordinator.run(&graph).await;
    assert!(report.is_success(), "{:?}", report.diagnostics);

    let dist = dir.path().join("dist");
    let emitted = std::fs::read_to_string(dist.join("js/index.js")).unwrap();
    assert_eq!(
        emitted,
        "import _ from \"lodash\"; console.log('file: src/index.js', 'line: 0', _.VERSION)\n"
    );
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dist.join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["manifestHash"], report.manifest_hash.clone().unwrap());
    assert_eq!(manifest["devtool"], "eval-cheap-module-source-map");
    assert_eq!(manifest["publicPath"], "https://cdn.example.com/");
}
