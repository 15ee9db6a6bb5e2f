//! Per-invocation pipeline context
//!
//! A fresh context is assembled for every phase call. `configure` sees
//! neither `config` nor `build_path`; every later phase of the same
//! pipeline borrows the config `configure` produced.

use crate::cache::Cache;
use crate::error::{KeelError, KeelResult};
use crate::events::EventSink;
use crate::ledger::PhaseGroup;
use crate::pipeline::Phase;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Configuration produced by a pipeline's `configure` phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig(BTreeMap<String, String>);

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse `KEY=VALUE` lines as printed by a shell `configure` hook
    ///
    /// Blank lines and `#` comments are skipped, an `export ` prefix is
    /// allowed, and values may be wrapped in matching single or double quotes.
    pub fn from_env_lines(text: &str) -> KeelResult<Self> {
        let mut config = Self::new();
        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let expression = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = expression.split_once('=').ok_or_else(|| {
                KeelError::Hook(format!(
                    "configure output line {} is not KEY=VALUE: {line}",
                    number + 1
                ))
            })?;

            let key = key.trim();
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(KeelError::Hook(format!(
                    "configure output line {} has invalid key '{key}'",
                    number + 1
                )));
            }
            config.insert(key, unquote(value.trim()));
        }
        Ok(config)
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Variables available to `{{ name }}` placeholders in hook commands
/// and installed templates
#[derive(Debug, Clone, Default)]
pub struct TemplateEnv {
    vars: BTreeMap<String, String>,
}

impl TemplateEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Substitute every `{{ name }}` in `template`
    ///
    /// Unknown names and unterminated placeholders are errors so that a
    /// typo never silently renders as an empty string.
    pub fn render(&self, template: &str) -> KeelResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                KeelError::Template(format!("unterminated placeholder in: {template}"))
            })?;

            let name = after[..end].trim();
            let value = self
                .get(name)
                .ok_or_else(|| KeelError::Template(format!("unknown variable '{name}'")))?;
            out.push_str(value);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Inputs fixed for the whole invocation
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub snapshot: Snapshot,
    pub actor: String,
    pub repo_path: PathBuf,
    pub builds_path: PathBuf,
    pub db_path: PathBuf,
}

impl PipelineInputs {
    /// Build directory for this snapshot: `<builds_path>/<sha>`
    pub fn build_path(&self) -> PathBuf {
        self.builds_path.join(&self.snapshot.sha)
    }

    /// Template variables known before `configure` runs
    pub(crate) fn base_template_env(&self) -> TemplateEnv {
        TemplateEnv::new()
            .with("ref", &self.snapshot.reference)
            .with("sha", &self.snapshot.sha)
            .with("short_sha", self.snapshot.short_sha())
            .with("actor", &self.actor)
            .with("repo_path", self.repo_path.display().to_string())
            .with("builds_path", self.builds_path.display().to_string())
            .with("db_path", self.db_path.display().to_string())
    }

    /// Template variables for phases after `configure`
    pub(crate) fn configured_template_env(&self, config: &PipelineConfig) -> TemplateEnv {
        let mut env = self
            .base_template_env()
            .with("build_path", self.build_path().display().to_string());
        for (key, value) in config.iter() {
            env.set(format!("config.{key}"), value);
        }
        env
    }
}

/// What a hook sees when it is called
pub struct PhaseContext<'a> {
    pub phase: Phase,
    pub group: PhaseGroup,
    pub inputs: &'a PipelineInputs,
    /// `None` during `configure`
    pub build_path: Option<&'a Path>,
    /// `None` during `configure`
    pub config: Option<&'a PipelineConfig>,
    pub template_env: &'a TemplateEnv,
    pub cache: &'a Cache,
    pub events: &'a dyn EventSink,
}

impl<'a> PhaseContext<'a> {
    pub fn reference(&self) -> &str {
        &self.inputs.snapshot.reference
    }

    pub fn sha(&self) -> &str {
        &self.inputs.snapshot.sha
    }

    pub fn repo_path(&self) -> &Path {
        &self.inputs.repo_path
    }

    pub fn builds_path(&self) -> &Path {
        &self.inputs.builds_path
    }

    pub fn actor(&self) -> &str {
        &self.inputs.actor
    }

    /// Config for this pipeline run; an error inside `configure`
    pub fn require_config(&self) -> KeelResult<&'a PipelineConfig> {
        self.config
            .ok_or_else(|| KeelError::Hook(format!("config is not available during {}", self.phase)))
    }

    /// Build directory; an error inside `configure`
    pub fn require_build_path(&self) -> KeelResult<&'a Path> {
        self.build_path.ok_or_else(|| {
            KeelError::Hook(format!("build_path is not available during {}", self.phase))
        })
    }

    /// `KEEL_*` environment handed to shell hooks
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("KEEL_PHASE".to_string(), self.phase.to_string()),
            ("KEEL_GROUP".to_string(), self.group.to_string()),
            ("KEEL_REF".to_string(), self.reference().to_string()),
            ("KEEL_SHA".to_string(), self.sha().to_string()),
            ("KEEL_ACTOR".to_string(), self.actor().to_string()),
            ("KEEL_REPO_PATH".to_string(), self.repo_path().display().to_string()),
            ("KEEL_BUILDS_PATH".to_string(), self.builds_path().display().to_string()),
            ("KEEL_DB_PATH".to_string(), self.inputs.db_path.display().to_string()),
        ];
        if let Some(build_path) = self.build_path {
            vars.push(("KEEL_BUILD_PATH".to_string(), build_path.display().to_string()));
        }
        if let Some(config) = self.config {
            for (key, value) in config.iter() {
                vars.push((format!("KEEL_CONFIG_{}", key.to_ascii_uppercase()), value.to_string()));
            }
        }
        vars
    }
}
