//! Asset Emitter - Atomic, Bounded, Exactly Once
//!
//! Every artifact path is checked for conflicts before the first byte is
//! written. Writes go through a temp file in the target directory and a
//! rename, with at most `concurrency` writes in flight.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{BuildError, Result};
use crate::optimize::Artifact;

pub struct AssetEmitter {
    output_dir: PathBuf,
    concurrency: usize,
}

impl AssetEmitter {
    pub fn new(output_dir: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            output_dir: output_dir.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Reject two artifacts claiming the same output path.
    pub fn check_conflicts(artifacts: &[Artifact]) -> Result<()> {
        let mut seen = HashSet::new();
        for path in artifacts.iter().filter_map(Artifact::output_path) {
            if !seen.insert(path) {
                return Err(BuildError::EmitConflict(path.clone()));
            }
        }
        Ok(())
    }

    /// Write all file-placed artifacts. Inlined ones are skipped.
    pub async fn emit(&self, artifacts: &[Artifact]) -> Result<Vec<PathBuf>> {
        Self::check_conflicts(artifacts)?;

        let jobs: Vec<(PathBuf, Vec<u8>)> = artifacts
            .iter()
            .filter_map(|a| {
                a.output_path()
                    .map(|rel| (self.output_dir.join(rel), a.bytes.clone()))
            })
            .collect();
        let count = jobs.len();

        let written: Vec<PathBuf> = stream::iter(jobs)
            .map(|(target, bytes)| async move {
                let dest = target.clone();
                tokio::task::spawn_blocking(move || write_atomic(&dest, &bytes))
                    .await
                    .map_err(|e| BuildError::Io(std::io::Error::other(e)))??;
                debug!(path = %target.display(), "emitted artifact");
                Ok::<_, BuildError>(target)
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        info!(count, dir = %self.output_dir.display(), "emission complete");
        Ok(written)
    }
}

/// Write via temp file + rename so readers never see a half-written file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| BuildError::Config(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
