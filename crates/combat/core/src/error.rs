//! Common error infrastructure for combat-core.
//!
//! This module provides shared types and traits used across all error types in
//! combat-core. Domain-specific errors (e.g., `FormulaError`, `ExprError`) are
//! defined in their respective modules alongside the code that raises them.
//!
//! # Design Principles
//!
//! - **Type Safety**: Each subsystem has its own error type with specific variants
//! - **Rich Context**: Errors carry actor, item and workflow identity so a
//!   failure can be reconstructed from the log alone
//! - **Severity Classification**: Errors are categorized for recovery strategies

use serde::{Deserialize, Serialize};

use crate::ids::{ItemUuid, WorkflowId};

/// Severity level of an error, used for categorization and recovery strategies.
///
/// Errors are classified by their recoverability and expected handling:
/// - **Recoverable**: Conditions the workflow continues past with a safe default
/// - **Validation**: Invalid input that should be rejected without retry
/// - **Internal**: Unexpected state inconsistencies that require investigation
/// - **Fatal**: Unrecoverable errors indicating corrupted world state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Recoverable error - resolved to a default and the action continues.
    ///
    /// Examples: malformed condition expression, delegated call timed out
    Recoverable,

    /// Validation error - invalid input, should not retry without changes.
    ///
    /// Examples: no valid targets, conflicting live workflow
    Validation,

    /// Internal error - unexpected state inconsistency.
    ///
    /// Examples: workflow resumed with a payload it was not waiting for
    Internal,

    /// Fatal error - world state corrupted, cannot continue.
    Fatal,
}

impl ErrorSeverity {
    /// Returns a human-readable description of this severity level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recoverable => "recoverable",
            Self::Validation => "validation",
            Self::Internal => "internal",
            Self::Fatal => "fatal",
        }
    }

    /// Returns true if this error is potentially recoverable.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable)
    }

    /// Returns true if this error indicates an internal bug.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal | Self::Fatal)
    }
}

/// Contextual information attached to errors for debugging and diagnostics.
///
/// Context is captured at the point of error creation and names the action
/// that was in flight.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    /// Display name of the acting actor (if applicable).
    pub actor: Option<String>,

    /// Item being used (if applicable).
    pub item: Option<ItemUuid>,

    /// Workflow instance that was executing.
    pub workflow: Option<WorkflowId>,

    /// Optional static message providing additional context.
    pub message: Option<&'static str>,
}

impl ErrorContext {
    /// Creates an empty context.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            actor: None,
            item: None,
            workflow: None,
            message: None,
        }
    }

    /// Attaches an actor name to this context (builder pattern).
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Attaches an item uuid to this context (builder pattern).
    #[must_use]
    pub fn with_item(mut self, item: ItemUuid) -> Self {
        self.item = Some(item);
        self
    }

    /// Attaches a workflow id to this context (builder pattern).
    #[must_use]
    pub const fn with_workflow(mut self, workflow: WorkflowId) -> Self {
        self.workflow = Some(workflow);
        self
    }

    /// Attaches a static message to this context (builder pattern).
    #[must_use]
    pub const fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

impl core::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "actor={} item={} workflow={}",
            self.actor.as_deref().unwrap_or("-"),
            self.item.as_ref().map(ItemUuid::as_str).unwrap_or("-"),
            self.workflow
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_owned()),
        )?;
        if let Some(message) = self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

/// Common trait for all combat-core errors.
///
/// # Implementation Guidelines
///
/// - All error enums should implement this trait
/// - Use `#[derive(thiserror::Error)]` for Display/Error impl
/// - Include `ErrorContext` in variants that need debugging info
/// - Classify severity based on recoverability, not impact
pub trait GameError: core::fmt::Display + core::fmt::Debug {
    /// Returns the severity level of this error.
    fn severity(&self) -> ErrorSeverity;

    /// Returns the context information for this error, if available.
    fn context(&self) -> Option<&ErrorContext> {
        None
    }

    /// Returns a static string identifier for this error variant.
    fn error_code(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_display_names_every_identity() {
        let ctx = ErrorContext::new()
            .with_actor("Aria")
            .with_item(ItemUuid::from("Item.longsword"))
            .with_workflow(WorkflowId(7))
            .with_message("attack phase");

        assert_eq!(
            ctx.to_string(),
            "actor=Aria item=Item.longsword workflow=wf-7 (attack phase)"
        );
    }

    #[test]
    fn empty_context_uses_placeholders() {
        assert_eq!(
            ErrorContext::new().to_string(),
            "actor=- item=- workflow=-"
        );
    }

    #[test]
    fn severity_classification() {
        assert!(ErrorSeverity::Recoverable.is_recoverable());
        assert!(ErrorSeverity::Fatal.is_internal());
        assert!(!ErrorSeverity::Validation.is_internal());
    }
}
