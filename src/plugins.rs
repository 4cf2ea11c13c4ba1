//! Built-in Plugins
//!
//! `CleanOutputDir` runs at the clean point; `ManifestWriter` after emission.

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::emit::write_atomic;
use crate::error::{BuildError, Result};
use crate::hooks::{BuildPlugin, HookContext};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Empties the output directory before a build, sparing `keep` globs.
pub struct CleanOutputDir {
    keep: GlobSet,
}

impl CleanOutputDir {
    pub fn new(keep: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in keep {
            let glob = Glob::new(pattern).map_err(|e| BuildError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        let keep = builder.build().map_err(|e| BuildError::InvalidPattern {
            pattern: keep.join(","),
            message: e.to_string(),
        })?;
        Ok(Self { keep })
    }

    fn clean(&self, dir: &Path) -> std::io::Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        // contents_first so directories are visited after their children
        for entry in WalkDir::new(dir).min_depth(1).contents_first(true) {
            let entry = entry?;
            let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            if entry.file_type().is_dir() {
                // Non-empty means something inside was kept.
                if fs::read_dir(entry.path())?.next().is_none() {
                    fs::remove_dir(entry.path())?;
                }
                continue;
            }
            if self.keep.is_match(rel) {
                debug!(path = %rel.display(), "keeping");
                continue;
            }
            fs::remove_file(entry.path())?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[async_trait]
impl BuildPlugin for CleanOutputDir {
    fn name(&self) -> &str {
        "clean-output-dir"
    }

    async fn call(&self, ctx: &HookContext<'_>) -> std::result::Result<(), String> {
        let removed = self.clean(ctx.output_dir).map_err(|e| e.to_string())?;
        info!(removed, dir = %ctx.output_dir.display(), "cleaned output directory");
        Ok(())
    }
}

/// Writes the build manifest next to the emitted artifacts.
pub struct ManifestWriter;

#[async_trait]
impl BuildPlugin for ManifestWriter {
    fn name(&self) -> &str {
        "manifest-writer"
    }

    async fn call(&self, ctx: &HookContext<'_>) -> std::result::Result<(), String> {
        let Some(manifest) = ctx.manifest else {
            return Err("no manifest available".into());
        };
        let body = serde_json::to_vec_pretty(manifest).map_err(|e| e.to_string())?;
        write_atomic(&ctx.output_dir.join(MANIFEST_FILE), &body).map_err(|e| e.to_string())
    }
}
