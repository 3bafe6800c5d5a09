//! Task file parser.
//!
//! A task file describes one workload and, optionally, its health check:
//!
//! ```toml
//! [task]
//! name = "web"
//! command = "python3 -m http.server 8080"
//!
//! [health_check]
//! kind = "http"
//! delay_seconds = 2
//! interval_seconds = 5
//!
//! [health_check.http]
//! port = 8080
//! path = "/"
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::types::{CommandCheck, HealthCheckSpec, TaskId};
use crate::validation::validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task: TaskSection,
    pub health_check: Option<HealthCheckSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSection {
    /// Defaults to `name` when omitted.
    pub id: Option<String>,
    pub name: String,
    /// Shell string, or the executable path when `shell = false`.
    pub command: String,
    /// argv for exec mode, starting with argv[0].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(default = "default_shell")]
    pub shell: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

fn default_shell() -> bool {
    true
}

impl TaskConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read task file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: TaskConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn task_id(&self) -> TaskId {
        self.task
            .id
            .clone()
            .unwrap_or_else(|| self.task.name.clone())
    }

    /// Reject a task file that must not be launched.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.task.command.trim().is_empty() {
            bail!("task '{}' has an empty command", self.task.name);
        }
        if let Some(check) = &self.health_check {
            validate(check)
                .with_context(|| format!("invalid health check for task '{}'", self.task.name))?;
        }
        Ok(())
    }

    /// Scaffold a task file with a command health check.
    pub fn scaffold(name: &str, command: &str) -> Self {
        TaskConfig {
            task: TaskSection {
                id: None,
                name: name.to_string(),
                command: command.to_string(),
                arguments: Vec::new(),
                shell: true,
                env: HashMap::new(),
            },
            health_check: Some(
                HealthCheckSpec::command(CommandCheck::shell("exit 0"))
                    .with_delay(0.0)
                    .with_interval(10.0)
                    .with_timeout(20.0),
            ),
        }
    }
}
