//! Hook trait and the closed per-phase registry
//!
//! A registry holds exactly one hook per [`Phase`]. `configure`, `build` and
//! `release` must be supplied; every other phase falls back to [`NoopHook`].
//! All validation happens in [`HookRegistryBuilder::build`], before any
//! claim is made.

use crate::error::{KeelError, KeelResult};
use crate::pipeline::{Phase, PhaseContext, PipelineConfig};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A callback bound to one lifecycle phase
///
/// Returning `Ok(Some(config))` from `configure` supplies the config seen by
/// every later phase of the pipeline. The value is ignored for other phases.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, ctx: &PhaseContext<'_>) -> KeelResult<Option<PipelineConfig>>;

    /// Short description used in logs
    fn describe(&self) -> String {
        "hook".to_string()
    }
}

/// Hook that does nothing; fills unregistered optional phases
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl Hook for NoopHook {
    async fn run(&self, _ctx: &PhaseContext<'_>) -> KeelResult<Option<PipelineConfig>> {
        Ok(None)
    }

    fn describe(&self) -> String {
        "no-op".to_string()
    }
}

/// Hook backed by a synchronous closure
pub struct FnHook<F> {
    f: F,
}

/// Wrap a closure that may return a config
pub fn from_fn<F>(f: F) -> FnHook<F>
where
    F: Fn(&PhaseContext<'_>) -> KeelResult<Option<PipelineConfig>> + Send + Sync,
{
    FnHook { f }
}

/// Wrap a closure for a phase that produces no config
pub fn step_fn<F>(
    f: F,
) -> FnHook<impl Fn(&PhaseContext<'_>) -> KeelResult<Option<PipelineConfig>> + Send + Sync>
where
    F: Fn(&PhaseContext<'_>) -> KeelResult<()> + Send + Sync,
{
    from_fn(move |ctx: &PhaseContext<'_>| f(ctx).map(|()| None))
}

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&PhaseContext<'_>) -> KeelResult<Option<PipelineConfig>> + Send + Sync,
{
    async fn run(&self, ctx: &PhaseContext<'_>) -> KeelResult<Option<PipelineConfig>> {
        (self.f)(ctx)
    }

    fn describe(&self) -> String {
        "closure".to_string()
    }
}

/// Collects hooks before validation
pub struct HookRegistryBuilder {
    slots: Vec<Option<Arc<dyn Hook>>>,
}

impl Default for HookRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistryBuilder {
    pub fn new() -> Self {
        Self {
            slots: Phase::ALL.iter().map(|_| None).collect(),
        }
    }

    /// Bind `hook` to `phase`; a second hook for the same phase is rejected
    pub fn register(&mut self, phase: Phase, hook: Arc<dyn Hook>) -> KeelResult<&mut Self> {
        let slot = &mut self.slots[phase.index()];
        if slot.is_some() {
            return Err(KeelError::Registration(format!(
                "phase '{phase}' is registered more than once"
            )));
        }
        *slot = Some(hook);
        Ok(self)
    }

    /// Owned variant of [`register`](Self::register) for chaining
    pub fn with(mut self, phase: Phase, hook: impl Hook + 'static) -> KeelResult<Self> {
        self.register(phase, Arc::new(hook))?;
        Ok(self)
    }

    /// Validate and freeze the registry
    pub fn build(self) -> KeelResult<HookRegistry> {
        let slots = self.slots;

        let missing: Vec<&str> = Phase::ALL
            .iter()
            .filter(|phase| phase.is_mandatory() && slots[phase.index()].is_none())
            .map(Phase::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(KeelError::Registration(format!(
                "missing mandatory phase(s): {}",
                missing.join(", ")
            )));
        }

        let defaulted = slots.iter().map(Option::is_none).collect();
        let hooks = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Arc::new(NoopHook)))
            .collect();

        Ok(HookRegistry { hooks, defaulted })
    }
}

/// Validated phase → hook table
#[derive(Clone)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn Hook>>,
    defaulted: Vec<bool>,
}

impl HookRegistry {
    pub fn builder() -> HookRegistryBuilder {
        HookRegistryBuilder::new()
    }

    pub fn get(&self, phase: Phase) -> &dyn Hook {
        self.hooks[phase.index()].as_ref()
    }

    /// True when `phase` had no registration and runs as a no-op
    pub fn is_default(&self, phase: Phase) -> bool {
        self.defaulted[phase.index()]
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for phase in Phase::ALL {
            map.entry(&phase.as_str(), &self.get(phase).describe());
        }
        map.finish()
    }
}
