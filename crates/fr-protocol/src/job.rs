//! Command templates, jobs and capture policy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::roster::RemoteTarget;

/// Placeholders substituted per target when a template is rendered.
pub const PLACEHOLDERS: &[&str] = &["index", "address", "user"];

/// What to run on a host: change into `workdir`, run each `setup` step,
/// then the payload `command`. Steps are chained with `&&`, so a failing
/// `cd` or environment step fails the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// Remote working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    /// Environment steps, e.g. `source etc/hadoop/hadoop-env.sh`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<String>,
    /// The payload.
    pub command: String,
}

impl CommandTemplate {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            workdir: None,
            setup: Vec::new(),
            command: command.into(),
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_setup(mut self, step: impl Into<String>) -> Self {
        self.setup.push(step.into());
        self
    }

    /// Check the template before any host is contacted: the payload must be
    /// non-empty and every `{{name}}` must be a known placeholder.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::InvalidTemplate("empty command".into()));
        }
        if let Some(dir) = &self.workdir {
            scan_placeholders(dir)?;
        }
        for step in &self.setup {
            scan_placeholders(step)?;
        }
        scan_placeholders(&self.command)?;
        Ok(())
    }

    /// Render the full shell line for one target.
    pub fn render(&self, target: &RemoteTarget) -> String {
        let mut parts = Vec::with_capacity(self.setup.len() + 2);
        if let Some(dir) = &self.workdir {
            let dir = substitute(dir, target);
            parts.push(format!("cd {}", shell_words::quote(&dir)));
        }
        parts.extend(
            self.setup
                .iter()
                .filter(|s| !s.trim().is_empty())
                .map(|s| substitute(s, target)),
        );
        parts.push(substitute(&self.command, target));
        parts.join(" && ")
    }
}

/// Return the placeholder names in `text`, failing on unknown or unclosed ones.
fn scan_placeholders(text: &str) -> ConfigResult<Vec<&str>> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(ConfigError::InvalidTemplate(format!(
                "unclosed placeholder in {text:?}"
            )));
        };
        let name = after[..end].trim();
        if !PLACEHOLDERS.contains(&name) {
            return Err(ConfigError::InvalidTemplate(format!(
                "unknown placeholder {{{{{name}}}}} (expected one of {})",
                PLACEHOLDERS.join(", ")
            )));
        }
        names.push(name);
        rest = &after[end + 2..];
    }
    Ok(names)
}

fn substitute(text: &str, target: &RemoteTarget) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        match after[..end].trim() {
            "index" => out.push_str(&target.index.to_string()),
            "address" => out.push_str(&target.address),
            "user" => out.push_str(&target.user),
            other => {
                out.push_str("{{");
                out.push_str(other);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Whether the leader's combined output is mirrored to a local file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    #[default]
    None,
    File(PathBuf),
}

impl CapturePolicy {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::None => None,
            Self::File(path) => Some(path),
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

impl From<Option<PathBuf>> for CapturePolicy {
    fn from(path: Option<PathBuf>) -> Self {
        path.map_or(Self::None, Self::File)
    }
}

/// A named template plus its capture policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandJob {
    pub name: String,
    pub template: CommandTemplate,
    #[serde(default)]
    pub capture: CapturePolicy,
}

impl CommandJob {
    pub fn new(name: impl Into<String>, template: CommandTemplate) -> Self {
        Self {
            name: name.into(),
            template,
            capture: CapturePolicy::None,
        }
    }

    pub fn with_capture(mut self, capture: CapturePolicy) -> Self {
        self.capture = capture;
        self
    }
}
