//! Build and release pipelines
//!
//! | Group   | Sequence                                            |
//! |---------|-----------------------------------------------------|
//! | build   | configure → pre_build → build → post_build          |
//! | release | configure → pre_release → release → post_release    |
//!
//! Hooks come from a [`HookRegistry`], either assembled in code from
//! closures or loaded from a shell-command manifest with [`load_registry`].

mod context;
mod executor;
mod hooks;
mod phase;
mod plugin;
pub(crate) mod process;

pub use context::{PhaseContext, PipelineConfig, PipelineInputs, TemplateEnv};
pub use executor::{PhaseTiming, PipelineExecutor, PipelineReport};
pub use hooks::{from_fn, step_fn, FnHook, Hook, HookRegistry, HookRegistryBuilder, NoopHook};
pub use phase::Phase;
pub use plugin::{load_registry, CommandHook, HookSpec, PluginManifest};
