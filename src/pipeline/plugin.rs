//! Shell-command plugins described by a TOML manifest
//!
//! ```toml
//! shell = "sh"
//!
//! [[hooks]]
//! phase = "configure"
//! run = "echo VENV={{ builds_path }}/venv"
//!
//! [[hooks]]
//! phase = "build"
//! run = "git -C {{ repo_path }} archive {{ sha }} | tar -x -C {{ build_path }}"
//! env = { PIP_NO_INPUT = "1" }
//! ```
//!
//! `run`, `cwd` and `env` values are rendered through the phase's template
//! environment. Each hook also receives the context as `KEEL_*` variables.
//! A `configure` hook returns its config by printing `KEY=VALUE` lines.

use crate::error::{KeelError, KeelResult};
use crate::pipeline::process::{run_streaming, Stream};
use crate::pipeline::{Hook, HookRegistry, Phase, PhaseContext, PipelineConfig};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

fn default_shell() -> String {
    "sh".to_string()
}

/// Parsed plugin manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default)]
    pub hooks: Vec<HookSpec>,
}

/// One `[[hooks]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookSpec {
    pub phase: Phase,
    pub run: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory; relative paths resolve against the build directory
    /// when one exists, otherwise against the manifest's directory
    #[serde(default)]
    pub cwd: Option<String>,
}

impl PluginManifest {
    /// Read and parse a manifest file
    pub fn load(path: &Path) -> KeelResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KeelError::PathNotFound(path.to_path_buf())
            } else {
                KeelError::io(format!("reading plugin {}", path.display()), e)
            }
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> KeelResult<Self> {
        toml::from_str(content).map_err(|e| KeelError::PluginInvalid {
            path: path.to_path_buf(),
            reason: e.to_string().trim().to_string(),
        })
    }
}

/// Runs one shell command for one phase
#[derive(Debug, Clone)]
pub struct CommandHook {
    phase: Phase,
    shell: String,
    run: String,
    env: BTreeMap<String, String>,
    cwd: Option<String>,
    plugin_dir: PathBuf,
    bin: PathBuf,
}

impl CommandHook {
    pub fn new(spec: HookSpec, shell: &str, plugin_dir: &Path, bin: &Path) -> Self {
        Self {
            phase: spec.phase,
            shell: shell.to_string(),
            run: spec.run,
            env: spec.env,
            cwd: spec.cwd,
            plugin_dir: plugin_dir.to_path_buf(),
            bin: bin.to_path_buf(),
        }
    }

    fn working_dir(&self, ctx: &PhaseContext<'_>, rendered: Option<String>) -> PathBuf {
        let base = ctx
            .build_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.plugin_dir.clone());
        match rendered {
            Some(cwd) => base.join(cwd),
            None => base,
        }
    }
}

#[async_trait]
impl Hook for CommandHook {
    async fn run(&self, ctx: &PhaseContext<'_>) -> KeelResult<Option<PipelineConfig>> {
        let template_env = ctx
            .template_env
            .clone()
            .with("plugin_dir", self.plugin_dir.display().to_string())
            .with("keel_bin", self.bin.display().to_string());

        let script = template_env.render(&self.run)?;
        let cwd = self
            .cwd
            .as_deref()
            .map(|cwd| template_env.render(cwd))
            .transpose()?;
        let cwd = self.working_dir(ctx, cwd);

        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(&script).current_dir(&cwd);
        for var in ["GIT_DIR", "GIT_WORK_TREE", "GIT_INDEX_FILE", "GIT_QUARANTINE_PATH"] {
            command.env_remove(var);
        }
        command.envs(ctx.env_vars());
        command.env("KEEL_BIN", &self.bin);
        for (key, value) in &self.env {
            command.env(key, template_env.render(value)?);
        }

        debug!("[{}] {} -c {:?} (cwd {})", self.phase, self.shell, script, cwd.display());

        let phase = self.phase;
        let on_line = move |stream: Stream, line: &str| match (phase, stream) {
            (Phase::Configure, Stream::Stdout) => debug!("[{}] {}", phase, line),
            (_, Stream::Stdout) => info!("[{}] {}", phase, line),
            (_, Stream::Stderr) => warn!("[{}] {}", phase, line),
        };
        let output = run_streaming(&mut command, &self.describe(), &on_line).await?;

        if !output.status.success() {
            let status = match output.status.code() {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            };
            let tail = output.error_tail();
            return Err(KeelError::Hook(if tail.is_empty() {
                status
            } else {
                format!("{status}\n{tail}")
            }));
        }

        if self.phase == Phase::Configure {
            let config = PipelineConfig::from_env_lines(&output.stdout.join("\n"))?;
            return Ok(Some(config));
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("{} -c {}", self.shell, self.run)
    }
}

/// Load a manifest and turn it into a validated registry
///
/// `bin` is the keel executable exported to hooks as `KEEL_BIN`.
pub fn load_registry(path: &Path, bin: &Path) -> KeelResult<HookRegistry> {
    let manifest = PluginManifest::load(path)?;
    registry_from_manifest(manifest, path, bin)
}

pub(crate) fn registry_from_manifest(
    manifest: PluginManifest,
    path: &Path,
    bin: &Path,
) -> KeelResult<HookRegistry> {
    let plugin_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut builder = HookRegistry::builder();
    for spec in manifest.hooks {
        let phase = spec.phase;
        let hook = CommandHook::new(spec, &manifest.shell, plugin_dir, bin);
        builder.register(phase, Arc::new(hook))?;
    }

    let registry = builder.build().map_err(|e| match e {
        KeelError::Registration(reason) => {
            KeelError::Registration(format!("{}: {reason}", path.display()))
        }
        other => other,
    })?;
    debug!("Loaded plugin {}: {:?}", path.display(), registry);
    Ok(registry)
}
