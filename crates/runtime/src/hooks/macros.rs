//! Item macros: user-authored callbacks named on the item.

use async_trait::async_trait;
use tracing::warn;

use super::{ExtensionPoint, HookOutcome};
use crate::workflow::{WorkflowState, WorkflowSummary};

/// Executes macros by name. The host decides what a name means.
#[async_trait]
pub trait MacroRunner: Send + Sync {
    async fn run(&self, name: &str, point: ExtensionPoint, workflow: &WorkflowSummary)
    -> HookOutcome;
}

/// Runner for hosts without macro support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMacros;

#[async_trait]
impl MacroRunner for NoMacros {
    async fn run(&self, _: &str, _: ExtensionPoint, _: &WorkflowSummary) -> HookOutcome {
        HookOutcome::Continue
    }
}

/// One `name@point` entry from an item's macro list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroSpec {
    pub name: String,
    pub point: ExtensionPoint,
}

impl MacroSpec {
    /// A bare name runs before cleanup.
    pub const DEFAULT_POINT: ExtensionPoint = ExtensionPoint::Pre(WorkflowState::Cleanup);

    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        let (name, point) = match entry.rsplit_once('@') {
            Some((name, point)) => match ExtensionPoint::parse(point) {
                Some(point) => (name.trim(), point),
                None => {
                    warn!(target: "runtime::hooks", entry, "unknown macro extension point, skipping");
                    return None;
                }
            },
            None => (entry, Self::DEFAULT_POINT),
        };
        (!name.is_empty()).then(|| Self {
            name: name.to_owned(),
            point,
        })
    }

    /// Entries of `list` bound to `point`, in declaration order.
    pub fn for_point(list: &[String], point: ExtensionPoint) -> Vec<Self> {
        list.iter()
            .filter_map(|entry| Self::parse(entry))
            .filter(|spec| spec.point == point)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_point_suffix_and_default() {
        assert_eq!(
            MacroSpec::parse("sneak@postCheckHits"),
            Some(MacroSpec {
                name: "sneak".into(),
                point: ExtensionPoint::Post(WorkflowState::CheckHits),
            })
        );
        assert_eq!(
            MacroSpec::parse("cleanupFx").map(|spec| spec.point),
            Some(MacroSpec::DEFAULT_POINT)
        );
        assert_eq!(MacroSpec::parse("x@nowhere"), None);
        assert_eq!(MacroSpec::parse("@isHit"), None);
    }

    #[test]
    fn filters_by_point() {
        let list = vec!["a@isHit".to_owned(), "b".to_owned(), "c@isHit".to_owned()];
        let names: Vec<_> = MacroSpec::for_point(&list, ExtensionPoint::IsHit)
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
