//! Per-run log buffer that mirrors every line onto the event bus

use std::sync::Arc;

use crate::deploy::executor::OutputStream;
use crate::events::bus::{DeployEvent, EventBus, LogLineEvent};

/// Log lines of one deployment run
pub struct Transcript {
    deployment_id: String,
    project_path: String,
    lines: Vec<String>,
    bus: Arc<dyn EventBus>,
}

impl Transcript {
    pub fn new(deployment_id: &str, project_path: &str, bus: Arc<dyn EventBus>) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            project_path: project_path.to_string(),
            lines: Vec::new(),
            bus,
        }
    }

    /// Append a line and publish it
    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        self.bus.publish(DeployEvent::Log(LogLineEvent {
            deployment_id: self.deployment_id.clone(),
            project_path: self.project_path.clone(),
            line: line.clone(),
        }));
        self.lines.push(line);
    }

    /// Append a command output line, prefixed with its stream name
    pub fn output(&mut self, stream: OutputStream, line: &str) {
        self.push(format!("[{}] {}", stream.as_str(), line));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Newline-joined transcript
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}
