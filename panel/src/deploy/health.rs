//! Container health polling after `compose up`

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::deploy::compose;
use crate::deploy::executor::CommandRunner;
use crate::errors::PanelError;

/// Health poll settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPollSettings {
    /// Attempts before giving up, at least one
    #[serde(
        default = "default_max_attempts",
        deserialize_with = "deserialize_max_attempts"
    )]
    pub max_attempts: u32,

    /// Delay between attempts
    #[serde(default = "default_interval", with = "duration_secs")]
    pub interval: Duration,
}

fn default_max_attempts() -> u32 {
    24
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn deserialize_max_attempts<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match u32::deserialize(deserializer)? {
        0 => Err(D::Error::custom("max_attempts must be at least 1")),
        n => Ok(n),
    }
}

impl HealthPollSettings {
    /// Attempts actually made; the first query always runs
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for HealthPollSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval: default_interval(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Callback receiving human-readable progress lines
pub type ProgressSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Poll the stack until an app container is ready.
///
/// Returns the attempt number that succeeded. Query errors count as
/// "not ready yet"; only running out of attempts is an error.
pub async fn wait_until_healthy<S, F>(
    runner: &dyn CommandRunner,
    project_dir: &Path,
    app_service: &str,
    settings: &HealthPollSettings,
    sleep_fn: S,
    on_progress: ProgressSink<'_>,
) -> Result<u32, PanelError>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let max_attempts = settings.attempts();
    for attempt in 1..=max_attempts {
        let mut ready = false;

        match compose::ps(runner, project_dir).await {
            Ok(containers) => {
                for container in containers
                    .iter()
                    .filter(|c| c.matches_service(app_service))
                {
                    let health = if container.has_health_check() {
                        container.health.as_str()
                    } else {
                        "none"
                    };
                    on_progress(&format!(
                        "  {}: state={} health={}",
                        container.name, container.state, health
                    ));
                    ready |= container.is_ready();
                }
            }
            Err(e) => {
                debug!("Health query attempt {} failed: {}", attempt, e);
            }
        }

        if ready {
            info!(
                "Service {} healthy after {} attempt(s)",
                app_service, attempt
            );
            return Ok(attempt);
        }

        on_progress(&format!(
            "Health check attempt {}/{} - waiting...",
            attempt, max_attempts
        ));

        if attempt < max_attempts {
            sleep_fn(settings.interval).await;
        }
    }

    warn!(
        "Service {} not healthy after {} attempts",
        app_service, max_attempts
    );
    Err(PanelError::HealthCheckTimeout {
        attempts: max_attempts,
    })
}
