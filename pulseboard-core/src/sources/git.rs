//! Local git repository scanner
//!
//! Every non-hidden child directory of a scan path that contains `.git` is a
//! candidate. Repositories are scanned concurrently on the adapter's own
//! worker pool; one slow or broken repository is reported in `skipped` and
//! never fails the others.
//!
//! The scan phase ends at four fifths of the source deadline. Repositories
//! still running or queued at that point are skipped as `timeout`, and the
//! repositories already scanned are returned.

use super::{SourceAdapter, SourceError};
use crate::config::GitConfig;
use crate::pool::WorkerPool;
use crate::types::{GitOverview, RepoStatus, SkippedRepo, SourceData, SourceName};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;

pub struct GitAdapter {
    config: Arc<GitConfig>,
    pool: WorkerPool,
}

impl GitAdapter {
    pub fn new(config: GitConfig) -> Self {
        let pool = WorkerPool::new("git-scan", config.scan_workers);
        Self {
            config: Arc::new(config),
            pool,
        }
    }

    /// Time the scan phase may take, leaving room to assemble the overview
    fn scan_budget(&self) -> Duration {
        self.timeout() * 4 / 5
    }

    /// Time one repository may take: its four git commands, capped by the scan budget
    fn repo_budget(&self) -> Duration {
        (Duration::from_secs(self.config.command_timeout_secs) * 4).min(self.scan_budget())
    }
}

#[async_trait]
impl SourceAdapter for GitAdapter {
    fn source(&self) -> SourceName {
        SourceName::Git
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn is_configured(&self) -> bool {
        !self.config.scan_paths.is_empty()
    }

    async fn fetch(&self) -> Result<SourceData, SourceError> {
        let candidates = discover(&self.config.expanded_scan_paths()).await;
        tracing::debug!(candidates = candidates.len(), "Scanning git repositories");

        let config = Arc::clone(&self.config);
        let scan_deadline = Instant::now() + self.scan_budget();
        let repo_budget = self.repo_budget();
        let scans = self
            .pool
            .map(candidates.clone(), move |path| {
                let config = Arc::clone(&config);
                async move {
                    // Queued past the deadline: not started at all.
                    if Instant::now() >= scan_deadline {
                        return Err(timed_out(path));
                    }
                    let deadline = scan_deadline.min(Instant::now() + repo_budget);
                    match tokio::time::timeout_at(deadline, scan_repo(&config, path.clone())).await
                    {
                        Ok(scan) => scan,
                        Err(_) => Err(timed_out(path)),
                    }
                }
            })
            .await;

        let mut overview = GitOverview::default();
        for (path, scan) in candidates.into_iter().zip(scans) {
            match scan {
                Ok(Ok(repo)) => overview.repos.push(repo),
                Ok(Err(skipped)) => overview.skipped.push(skipped),
                Err(failure) => overview.skipped.push(SkippedRepo {
                    path,
                    reason: failure.to_string(),
                }),
            }
        }

        overview
            .repos
            .sort_by(|a, b| (b.is_dirty, b.commit_count).cmp(&(a.is_dirty, a.commit_count)));

        Ok(SourceData::Git(overview))
    }
}

fn timed_out(path: PathBuf) -> SkippedRepo {
    tracing::warn!(repo = %path.display(), "Repository scan timed out");
    SkippedRepo {
        path,
        reason: SourceError::Timeout.to_string(),
    }
}

/// Child directories of the scan paths that look like repositories, sorted
async fn discover(scan_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    for root in scan_paths {
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(path = %root.display(), error = %e, "Skipping scan path");
                continue;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !path.is_dir() {
                continue;
            }
            if path.join(".git").exists() {
                candidates.push(path);
            }
        }
    }

    candidates.sort();
    candidates
}

async fn scan_repo(config: &GitConfig, path: PathBuf) -> Result<RepoStatus, SkippedRepo> {
    let skip = |e: SourceError| {
        tracing::warn!(repo = %path.display(), error = %e, "Skipping repository");
        SkippedRepo {
            path: path.clone(),
            reason: e.to_string(),
        }
    };

    let since = (Utc::now() - chrono::Duration::days(i64::from(config.history_days)))
        .format("%Y-%m-%d")
        .to_string();

    let branch = git(config, &path, &["branch", "--show-current"])
        .await
        .map_err(skip)?;
    let log = git(
        config,
        &path,
        &["log", "--oneline", "--no-color", &format!("--since={since}")],
    )
    .await
    .map_err(skip)?;
    let status = git(config, &path, &["status", "--porcelain"])
        .await
        .map_err(skip)?;

    // No upstream is common; treat any failure as in sync.
    let (behind, ahead) = git(
        config,
        &path,
        &["rev-list", "--left-right", "--count", "@{u}...HEAD"],
    )
    .await
    .ok()
    .and_then(|out| parse_ahead_behind(&out))
    .unwrap_or((0, 0));

    let commits: Vec<String> = log
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();

    let branch = branch.trim();
    Ok(RepoStatus {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.clone(),
        branch: if branch.is_empty() { "HEAD" } else { branch }.to_string(),
        commit_count: commits.len() as u32,
        commits: commits.into_iter().take(config.max_commits).collect(),
        is_dirty: !status.trim().is_empty(),
        ahead,
        behind,
    })
}

/// Run one git command in `repo`, killing it if it outlives the command timeout.
async fn git(config: &GitConfig, repo: &Path, args: &[&str]) -> Result<String, SourceError> {
    let mut command = Command::new(&config.git_binary);
    command
        .arg("-C")
        .arg(repo)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env(
            "GIT_CEILING_DIRECTORIES",
            repo.parent().unwrap_or(repo).as_os_str(),
        )
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let deadline = Duration::from_secs(config.command_timeout_secs);
    let output = tokio::time::timeout(deadline, command.output())
        .await
        .map_err(|_| SourceError::Timeout)?
        .map_err(|e| SourceError::Subprocess(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SourceError::Subprocess(
            stderr.lines().next().unwrap_or("non-zero exit").trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `rev-list --left-right --count` output: `<behind>\t<ahead>`
fn parse_ahead_behind(output: &str) -> Option<(u32, u32)> {
    let mut parts = output.split_whitespace();
    let behind = parts.next()?.parse().ok()?;
    let ahead = parts.next()?.parse().ok()?;
    Some((behind, ahead))
}
