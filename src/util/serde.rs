//! Serializable identifier and priority types shared across the crate.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Set of provisionable labels carried by workers and requests.
pub type LabelSet = BTreeSet<String>;

/// Build a [`LabelSet`] from anything yielding string-like items.
pub fn labels<I, S>(items: I) -> LabelSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True for the empty identifier.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifies a worker (bot) in the fleet.
    WorkerId
);
string_id!(
    /// Identifies a task request.
    RequestId
);
string_id!(
    /// Identifies a quota account that requests are charged against.
    AccountId
);

/// Priority class of a batched operation.
///
/// Lower classes are applied to state first within a batch, so lifecycle
/// notifications land before new assignment decisions are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Task lifecycle notifications and read-only queries.
    Notify = 0,
    /// Assignment of work to idle workers.
    Assign = 1,
}

impl Priority {
    /// Every priority class, in execution order.
    pub const ALL: [Self; 2] = [Self::Notify, Self::Assign];

    /// Position of this class in execution order.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}
