//! Hook registry for firing workflow extension points.

use std::sync::Arc;

use tracing::{debug, error, trace};

use super::{ExtensionPoint, HookCriticality, HookOutcome, HookPayload, WorkflowHook};

/// A listener stopped the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookVeto {
    pub hook: String,
    pub point: ExtensionPoint,
    pub reason: String,
}

impl std::fmt::Display for HookVeto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} vetoed {}: {}", self.hook, self.point, self.reason)
    }
}

/// Ordered set of [`WorkflowHook`]s, cheap to clone.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Arc<[Arc<dyn WorkflowHook>]>,
}

impl HookRegistry {
    /// Hooks are sorted by priority (lower values first).
    pub fn new(mut hooks: Vec<Arc<dyn WorkflowHook>>) -> Self {
        hooks.sort_by_key(|h| h.priority());
        Self {
            hooks: hooks.into(),
        }
    }

    pub fn with_hook(self, hook: Arc<dyn WorkflowHook>) -> Self {
        let mut hooks: Vec<_> = self.hooks.iter().cloned().collect();
        hooks.push(hook);
        Self::new(hooks)
    }

    /// Runs every hook listening on `point`; the first veto wins.
    ///
    /// # Error Handling
    ///
    /// - `Critical`: an error counts as a veto
    /// - `Important`: logs error and continues to next hook
    /// - `Optional`: logs at debug level and continues silently
    pub fn fire(&self, point: ExtensionPoint, payload: &HookPayload<'_>) -> Result<(), HookVeto> {
        let workflow = payload.workflow().id;
        for hook in self.hooks.iter().filter(|hook| hook.handles(point)) {
            match hook.call(point, payload) {
                HookOutcome::Continue => {
                    trace!(target: "runtime::hooks", hook = hook.name(), %point, %workflow, "continue");
                }
                HookOutcome::Veto(reason) => {
                    debug!(
                        target: "runtime::hooks",
                        hook = hook.name(),
                        %point,
                        %workflow,
                        reason = %reason,
                        "hook vetoed workflow"
                    );
                    return Err(HookVeto {
                        hook: hook.name().to_owned(),
                        point,
                        reason,
                    });
                }
                HookOutcome::Error(message) => {
                    self.handle_hook_error(hook.as_ref(), point, message)?;
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Returns an iterator over hook names and priorities (for debugging).
    pub fn hooks(&self) -> impl Iterator<Item = (&'static str, i32)> + '_ {
        self.hooks.iter().map(|h| (h.name(), h.priority()))
    }

    fn handle_hook_error(
        &self,
        hook: &dyn WorkflowHook,
        point: ExtensionPoint,
        message: String,
    ) -> Result<(), HookVeto> {
        match hook.criticality() {
            HookCriticality::Critical => {
                error!(
                    target: "runtime::hooks",
                    hook = hook.name(),
                    criticality = "critical",
                    %point,
                    error = %message,
                    "Critical hook failed, aborting workflow"
                );
                Err(HookVeto {
                    hook: hook.name().to_owned(),
                    point,
                    reason: message,
                })
            }
            HookCriticality::Important => {
                error!(
                    target: "runtime::hooks",
                    hook = hook.name(),
                    criticality = "important",
                    %point,
                    error = %message,
                    "Hook failed, continuing"
                );
                Ok(())
            }
            HookCriticality::Optional => {
                debug!(
                    target: "runtime::hooks",
                    hook = hook.name(),
                    criticality = "optional",
                    %point,
                    error = %message,
                    "Optional hook failed"
                );
                Ok(())
            }
        }
    }
}
