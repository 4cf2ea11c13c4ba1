//! ForgeBundle Core - Module Transform Compiler
//!
//! # The Five Rules (Non-Negotiable)
//! 1. First Matching Rule Wins
//! 2. Chains Run Last-Declared First
//! 3. Instrumentation Never Changes Line Count
//! 4. Same Content, Same Name
//! 5. One Failure, No Output

pub mod chain;
pub mod config;
pub mod coordinator;
pub mod copy;
pub mod emit;
pub mod error;
pub mod hashing;
pub mod hooks;
pub mod instrument;
pub mod module;
pub mod naming;
pub mod optimize;
pub mod plugins;
pub mod provide;
pub mod rules;
pub mod transform;

pub use chain::{ChainFailure, ChainOutput, TransformChain};
pub use config::{BuildConfig, BuildSettings, Mode};
pub use coordinator::{BuildCoordinator, BuildReport, CycleState};
pub use error::{BuildError, Diagnostic, Severity};
pub use hashing::{canonical_json, compute_manifest_hash, content_hash};
pub use hooks::{BuildPlugin, HookHandle, HookPoint, PluginHookBus};
pub use instrument::{instrument, InstrumentOptions, InstrumentationTransform};
pub use module::{Content, GraphEntry, ModuleGraph, ModuleKind, SourceLoader};
pub use optimize::{Artifact, OptimizationStage, Placement};
pub use rules::{RuleMatcher, TransformRule};
pub use transform::{Capabilities, TransformContext, Transformer, TransformerRegistry};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
