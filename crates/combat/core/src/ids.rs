//! Document identifiers.
//!
//! Every document the engine touches is addressed by an opaque string uuid
//! issued by the host platform. The newtypes keep token, actor and item
//! identities from being mixed up at call sites.

use serde::{Deserialize, Serialize};

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

uuid_newtype!(
    /// Uuid of an actor document.
    ActorUuid
);
uuid_newtype!(
    /// Uuid of an item document (weapon, spell, feature).
    ItemUuid
);
uuid_newtype!(
    /// Uuid of a placed token.
    TokenUuid
);
uuid_newtype!(
    /// Id of an active effect, unique within its owning actor.
    EffectId
);
uuid_newtype!(
    /// Uuid of a placed measured template.
    TemplateUuid
);
uuid_newtype!(
    /// Id of a connected client user.
    UserId
);
uuid_newtype!(
    /// Id of a coordinator-owned chat card.
    ChatCardId
);

/// Process-local identity of one workflow instance.
///
/// Unlike the document uuids this is never shared with the host; it exists
/// so logs and the weak registry index can tell two successive workflows for
/// the same item apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub u64);

impl core::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "wf-{}", self.0)
    }
}
