//! Plugin Hook Bus - Typed Lifecycle Points
//!
//! One ordered callback list per `HookPoint`. Registration happens during
//! setup only; `fire` borrows the bus immutably so a running cycle cannot
//! change it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{BuildError, Diagnostic};
use crate::optimize::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPoint {
    Clean,
    BeforeBuild,
    AfterEmit,
}

impl HookPoint {
    /// Failures at fatal points abort the cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HookPoint::Clean | HookPoint::BeforeBuild)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPoint::Clean => "clean",
            HookPoint::BeforeBuild => "before-build",
            HookPoint::AfterEmit => "after-emit",
        }
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a plugin gets to see when it is invoked.
#[derive(Debug, Clone)]
pub struct HookContext<'a> {
    pub point: HookPoint,
    pub cycle_id: &'a str,
    pub output_dir: &'a Path,
    /// Empty before emission.
    pub artifacts: &'a [Artifact],
    pub manifest: Option<&'a serde_json::Value>,
}

#[async_trait]
pub trait BuildPlugin: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, ctx: &HookContext<'_>) -> Result<(), String>;
}

/// Returned by `register`; pass to `dispose` to detach the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookHandle {
    point: HookPoint,
    id: u64,
}

struct Registration {
    id: u64,
    plugin: Arc<dyn BuildPlugin>,
}

#[derive(Default)]
pub struct PluginHookBus {
    hooks: BTreeMap<HookPoint, Vec<Registration>>,
    next_id: u64,
}

impl PluginHookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, point: HookPoint, plugin: Arc<dyn BuildPlugin>) -> HookHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.hooks
            .entry(point)
            .or_default()
            .push(Registration { id, plugin });
        HookHandle { point, id }
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn dispose(&mut self, handle: HookHandle) -> bool {
        let Some(list) = self.hooks.get_mut(&handle.point) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != handle.id);
        list.len() != before
    }

    pub fn registered(&self, point: HookPoint) -> Vec<&str> {
        self.hooks
            .get(&point)
            .map(|list| list.iter().map(|r| r.plugin.name()).collect())
            .unwrap_or_default()
    }

    /// Invoke callbacks in registration order.
    ///
    /// At a fatal point the first failure stops the remaining callbacks and is
    /// returned as `Err`. Otherwise every callback runs and failures come back
    /// as warning diagnostics.
    pub async fn fire(&self, ctx: &HookContext<'_>) -> Result<Vec<Diagnostic>, BuildError> {
        let mut diagnostics = vec![];
        let Some(list) = self.hooks.get(&ctx.point) else {
            return Ok(diagnostics);
        };

        for registration in list {
            let name = registration.plugin.name();
            debug!(point = %ctx.point, plugin = name, "invoking plugin");
            if let Err(message) = registration.plugin.call(ctx).await {
                let err = BuildError::HookFailure {
                    point: ctx.point,
                    plugin: name.to_string(),
                    message,
                };
                if ctx.point.is_fatal() {
                    return Err(err);
                }
                warn!(point = %ctx.point, plugin = name, error = %err, "plugin failed");
                diagnostics.push(Diagnostic::warning(name, "hook", err.to_string()));
            }
        }
        Ok(diagnostics)
    }
}
