//! Git operations on a project checkout

use std::path::Path;

use tracing::{debug, info};

use crate::deploy::executor::{run_checked, CommandRunner, CommandSpec, LineSink};
use crate::errors::PanelError;

/// Commit state captured around a pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResult {
    pub commit_after: String,
    pub commit_message: String,
}

/// Current `HEAD` commit hash
pub async fn current_commit(
    runner: &dyn CommandRunner,
    repo_dir: &Path,
    on_line: LineSink<'_>,
) -> Result<String, PanelError> {
    let spec = CommandSpec::new("git", repo_dir).args(["rev-parse", "HEAD"]);
    let output = run_checked(runner, &spec, on_line).await?;
    Ok(output.stdout.trim().to_string())
}

/// Message of the `HEAD` commit
pub async fn head_commit_message(
    runner: &dyn CommandRunner,
    repo_dir: &Path,
    on_line: LineSink<'_>,
) -> Result<String, PanelError> {
    let spec = CommandSpec::new("git", repo_dir).args(["log", "-1", "--pretty=%B"]);
    let output = run_checked(runner, &spec, on_line).await?;
    Ok(output.stdout.trim().to_string())
}

/// Pull `branch` from origin and report the new head
pub async fn pull(
    runner: &dyn CommandRunner,
    repo_dir: &Path,
    branch: &str,
    on_line: LineSink<'_>,
) -> Result<PullResult, PanelError> {
    info!("Pulling branch {} in {}", branch, repo_dir.display());

    let spec = CommandSpec::new("git", repo_dir).args(["pull", "origin", branch]);
    run_checked(runner, &spec, &mut *on_line).await?;

    let commit_after = current_commit(runner, repo_dir, &mut *on_line).await?;
    let commit_message = head_commit_message(runner, repo_dir, &mut *on_line).await?;
    debug!("Pulled {} -> head {}", branch, commit_after);

    Ok(PullResult {
        commit_after,
        commit_message,
    })
}
