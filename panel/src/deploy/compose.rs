//! Docker Compose operations on a project stack

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::deploy::executor::{run_checked, CommandRunner, CommandSpec, LineSink};
use crate::errors::PanelError;

fn compose(project_dir: &Path) -> CommandSpec {
    CommandSpec::new("docker", project_dir).arg("compose")
}

/// Rebuild the stack images without layer cache
pub async fn build_no_cache(
    runner: &dyn CommandRunner,
    project_dir: &Path,
    on_line: LineSink<'_>,
) -> Result<(), PanelError> {
    info!("Building compose images in: {}", project_dir.display());
    let spec = compose(project_dir).args(["build", "--no-cache"]);
    run_checked(runner, &spec, on_line).await?;
    Ok(())
}

/// Bring the stack up detached
pub async fn up_detached(
    runner: &dyn CommandRunner,
    project_dir: &Path,
    on_line: LineSink<'_>,
) -> Result<(), PanelError> {
    info!("Starting compose stack in: {}", project_dir.display());
    let spec = compose(project_dir).args(["up", "-d"]);
    run_checked(runner, &spec, on_line).await?;
    Ok(())
}

/// One container record from `docker compose ps`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Service", default)]
    pub service: String,

    /// e.g. `running`, `exited`
    #[serde(rename = "State", default)]
    pub state: String,

    /// Empty when the container has no health check
    #[serde(rename = "Health", default)]
    pub health: String,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }

    pub fn has_health_check(&self) -> bool {
        !self.health.trim().is_empty()
    }

    /// Running, and healthy if a health check is configured
    pub fn is_ready(&self) -> bool {
        self.is_running()
            && (!self.has_health_check() || self.health.eq_ignore_ascii_case("healthy"))
    }

    /// Whether this container belongs to the application service
    pub fn matches_service(&self, app_service: &str) -> bool {
        self.service == app_service || self.name.contains(app_service)
    }
}

/// Parse `docker compose ps --format json` output.
///
/// Older Compose releases print one JSON array, newer ones one object per line.
pub fn parse_ps_output(output: &str) -> Result<Vec<ContainerStatus>, PanelError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(PanelError::from))
        .collect()
}

/// Query container statuses of the stack
pub async fn ps(
    runner: &dyn CommandRunner,
    project_dir: &Path,
) -> Result<Vec<ContainerStatus>, PanelError> {
    let spec = compose(project_dir).args(["ps", "--format", "json"]);
    // ps output is parsed, not part of the transcript
    let output = run_checked(runner, &spec, &mut |_, _| {}).await?;
    let containers = parse_ps_output(&output.stdout)?;
    debug!("compose ps reported {} containers", containers.len());
    Ok(containers)
}
