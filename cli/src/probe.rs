use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

pub const OFFLINE: &str = "No data or node offline.";
pub const DEFAULT_TEMPLATE: &str = "docker exec {node} top -bn1 -i -c";

/// Fetches a node's resource usage by running a command template in which
/// `{node}` is replaced with the node name. Never fails: anything that goes
/// wrong renders as `OFFLINE`.
#[derive(Debug, Clone)]
pub struct NodeProbe {
    template: String,
    timeout: Duration,
    max_lines: usize,
}

impl NodeProbe {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
            timeout: Duration::from_secs(5),
            max_lines: 30,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The template is split on whitespace only; quotes are not interpreted.
    fn command_for(&self, node: &str) -> Option<(String, Vec<String>)> {
        let mut parts = self
            .template
            .split_whitespace()
            .map(|part| part.replace("{node}", node));
        let program = parts.next()?;
        Some((program, parts.collect()))
    }

    pub async fn probe(&self, node: &str) -> String {
        let Some((program, args)) = self.command_for(node) else {
            return OFFLINE.to_string();
        };

        let run = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => {
                let text = String::from_utf8_lossy(&output.stdout);
                if text.trim().is_empty() {
                    return OFFLINE.to_string();
                }
                text.lines().take(self.max_lines).collect::<Vec<_>>().join("\n")
            }
            Ok(Err(e)) => {
                log::debug!("Probe of {} failed to run {}: {}", node, program, e);
                OFFLINE.to_string()
            }
            Err(_) => {
                log::warn!("Probe of {} timed out", node);
                OFFLINE.to_string()
            }
        }
    }
}
