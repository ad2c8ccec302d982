use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

string_id!(PassengerId);
string_id!(DriverId);
string_id!(VehicleClassId);

/// Server-assigned reservation identifier.
///
/// The wire delivers this as either a JSON string or a bare integer depending
/// on the emitting service; both forms normalize to the same canonical
/// trimmed string, and all comparisons go through that canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ReservationId(String);

impl ReservationId {
    pub fn normalized(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ReservationId {
    fn from(value: String) -> Self {
        Self::normalized(value)
    }
}

impl From<&str> for ReservationId {
    fn from(value: &str) -> Self {
        Self::normalized(value)
    }
}

impl From<u64> for ReservationId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for ReservationId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for ReservationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ReservationIdVisitor;

        impl de::Visitor<'_> for ReservationIdVisitor {
            type Value = ReservationId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a reservation id as a string or integer")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(ReservationId::normalized(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(ReservationId::from(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                Ok(ReservationId::from(value))
            }
        }

        deserializer.deserialize_any(ReservationIdVisitor)
    }
}

/// Client-generated placeholder naming a trip whose reservation id is not
/// yet known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientTripToken(String);

impl ClientTripToken {
    pub fn generate() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity of the trip the session is orchestrating.
///
/// Starts unassigned while the creation call is in flight and becomes
/// assigned exactly once; an assigned identity never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripIdentity {
    Unassigned(ClientTripToken),
    Assigned(ReservationId),
}

impl TripIdentity {
    pub fn unassigned() -> Self {
        Self::Unassigned(ClientTripToken::generate())
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned(_))
    }

    pub fn reservation(&self) -> Option<&ReservationId> {
        match self {
            Self::Assigned(id) => Some(id),
            Self::Unassigned(_) => None,
        }
    }

    pub fn matches(&self, id: &ReservationId) -> bool {
        self.reservation().is_some_and(|own| own == id)
    }

    /// True while the identity is still the unassigned token the request was
    /// issued under. A bound identity, or another request's token, both fail.
    pub fn matches_token(&self, token: &ClientTripToken) -> bool {
        matches!(self, Self::Unassigned(own) if own == token)
    }
}
