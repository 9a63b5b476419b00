//! Identifier newtypes.
//!
//! Identifiers are opaque strings supplied by the caller so that a retried
//! create carries the same key; `generate()` mints a fresh UUID when the caller
//! has none.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// Identifies a deal.
    DealId
);
string_id!(
    /// Identifies a marketplace listing; owned by the listing collaborator.
    ListingId
);
string_id!(
    /// Identifies a buyer, seller, advisor or system actor.
    PartyId
);
string_id!(MilestoneId);
string_id!(DocumentId);
string_id!(PaymentId);
string_id!(NdaRequestId);
string_id!(ActivityId);
string_id!(DisputeId);
