//! Bulk Copy - Static Files Outside the Transform Pipeline
//!
//! Files matching `from` under `context` are copied into `to`, keeping their
//! path relative to `context`. Existing targets are left alone unless the
//! pattern sets `force`.
//!
//! Planning only reads the filesystem, so a bad pattern or missing context
//! is caught before the cycle writes anything.

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::CopyPattern;
use crate::error::{BuildError, Result};

#[derive(Debug, Clone, Default, Serialize)]
pub struct CopyReport {
    pub copied: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
struct CopyJob {
    from: PathBuf,
    to: PathBuf,
    force: bool,
}

/// Every copy a set of patterns expands to, resolved but not yet run.
#[derive(Debug, Clone, Default)]
pub struct CopyPlan {
    jobs: Vec<CopyJob>,
}

impl CopyPlan {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn glob_error(pattern: &str, e: globset::Error) -> BuildError {
    BuildError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    }
}

fn compile_from(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| glob_error(pattern, e))
}

fn compile_ignore(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| glob_error(pattern, e))?);
    }
    builder.build().map_err(|e| glob_error(&patterns.join(","), e))
}

fn is_hidden(rel: &Path) -> bool {
    rel.components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

/// Expand one pattern into concrete copy jobs.
fn plan(pattern: &CopyPattern, output_dir: &Path) -> Result<Vec<CopyJob>> {
    let from = compile_from(&pattern.from)?;
    let ignore = compile_ignore(&pattern.ignore)?;
    let to_root = if pattern.to.is_absolute() {
        pattern.to.clone()
    } else {
        output_dir.join(&pattern.to)
    };

    let mut jobs = vec![];
    for entry in WalkDir::new(&pattern.context).follow_links(false) {
        let entry = entry.map_err(|e| BuildError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(&pattern.context) else {
            continue;
        };
        if !from.is_match(rel) || ignore.is_match(rel) {
            continue;
        }
        if !pattern.dot && is_hidden(rel) {
            continue;
        }
        jobs.push(CopyJob {
            from: entry.path().to_path_buf(),
            to: to_root.join(rel),
            force: pattern.force,
        });
    }
    Ok(jobs)
}

/// Expand every pattern. Fails on the first invalid glob or unreadable context.
pub fn plan_all(patterns: &[CopyPattern], output_dir: &Path) -> Result<CopyPlan> {
    let mut jobs = vec![];
    for pattern in patterns {
        jobs.extend(plan(pattern, output_dir)?);
    }
    debug!(jobs = jobs.len(), "copy plan ready");
    Ok(CopyPlan { jobs })
}

/// Run every pattern with at most `concurrency` copies in flight.
pub async fn copy_patterns(
    patterns: &[CopyPattern],
    output_dir: &Path,
    concurrency: usize,
) -> Result<CopyReport> {
    execute(plan_all(patterns, output_dir)?, concurrency).await
}

/// Run a plan with at most `concurrency` copies in flight.
pub async fn execute(plan: CopyPlan, concurrency: usize) -> Result<CopyReport> {
    let jobs = plan.jobs;
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set = JoinSet::new();

    for job in jobs {
        let semaphore = Arc::clone(&semaphore);
        join_set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| BuildError::Io(std::io::Error::other(e)))?;
            if !job.force && tokio::fs::try_exists(&job.to).await? {
                debug!(path = %job.to.display(), "target exists, skipping");
                return Ok((job.to, false));
            }
            if let Some(parent) = job.to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&job.from, &job.to).await?;
            Ok::<_, BuildError>((job.to, true))
        });
    }

    let mut report = CopyReport::default();
    while let Some(joined) = join_set.join_next().await {
        let (path, copied) = joined.map_err(|e| BuildError::Io(std::io::Error::other(e)))??;
        if copied {
            report.copied.push(path);
        } else {
            report.skipped.push(path);
        }
    }
    report.copied.sort();
    report.skipped.sort();

    info!(copied = report.copied.len(), skipped = report.skipped.len(), "bulk copy complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let context = dir.path().join("public/lib");
        let out = dir.path().join("dist");
        fs::create_dir_all(context.join("ignore")).unwrap();
        fs::create_dir_all(context.join("nested")).unwrap();
        fs::write(context.join("a.js"), "a").unwrap();
        fs::write(context.join(".hidden.js"), "h").unwrap();
        fs::write(context.join("readme.md"), "r").unwrap();
        fs::write(context.join("ignore/b.js"), "b").unwrap();
        fs::write(context.join("nested/c.js"), "c").unwrap();
        (dir, context, out)
    }

    fn pattern(context: &Path, from: &str) -> CopyPattern {
        CopyPattern {
            from: from.into(),
            to: PathBuf::from("lib"),
            context: context.to_path_buf(),
            ignore: vec!["**/ignore/**".into()],
            force: false,
            dot: false,
        }
    }

    #[tokio::test]
    async fn test_top_level_glob_respects_ignore_and_dot() {
        let (_dir, context, out) = setup();
        let report = copy_patterns(&[pattern(&context, "*.js")], &out, 100).await.unwrap();
        assert_eq!(report.copied, vec![out.join("lib/a.js")]);
        assert!(!out.join("lib/.hidden.js").exists());
    }

    #[tokio::test]
    async fn test_recursive_glob_and_dot_option() {
        let (_dir, context, out) = setup();
        let mut p = pattern(&context, "**/*.js");
        p.dot = true;
        let report = copy_patterns(&[p], &out, 2).await.unwrap();
        assert_eq!(report.copied.len(), 3);
        assert!(out.join("lib/nested/c.js").exists());
        assert!(out.join("lib/.hidden.js").exists());
        assert!(!out.join("lib/ignore/b.js").exists());
    }

    #[tokio::test]
    async fn test_force_controls_overwrite() {
        let (_dir, context, out) = setup();
        fs::create_dir_all(out.join("lib")).unwrap();
        fs::write(out.join("lib/a.js"), "old").unwrap();

        let report = copy_patterns(&[pattern(&context, "*.js")], &out, 1).await.unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(fs::read_to_string(out.join("lib/a.js")).unwrap(), "old");

        let mut forced = pattern(&context, "*.js");
        forced.force = true;
        copy_patterns(&[forced], &out, 1).await.unwrap();
        assert_eq!(fs::read_to_string(out.join("lib/a.js")).unwrap(), "a");
    }

    #[test]
    fn test_plan_reads_without_writing() {
        let (_dir, context, out) = setup();
        let plan = plan_all(&[pattern(&context, "**/*.js")], &out).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(!out.exists());
    }

    #[test]
    fn test_plan_missing_context_fails() {
        let (dir, _context, out) = setup();
        let missing = dir.path().join("nope");
        assert!(matches!(
            plan_all(&[pattern(&missing, "*.js")], &out).unwrap_err(),
            BuildError::Io(_)
        ));
    }

    #[test]
    fn test_bad_glob() {
        assert!(matches!(
            compile_from("a[").unwrap_err(),
            BuildError::InvalidPattern { .. }
        ));
    }
}
