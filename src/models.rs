use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One bookable room, owned by exactly one provider.
///
/// Identity is `(provider, id)`; the id is only unique within its provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Room {
    pub provider: String,
    pub id: String,
    #[serde(default)]
    pub seats: u32,
    #[serde(default)]
    pub campus: String,
}

impl Room {
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            id: id.into(),
            seats: 0,
            campus: String::new(),
        }
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.id)
    }
}

/// A reservation of a room for a time span. `id` is assigned by the provider
/// on creation and is what cancellation routes on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub room: Room,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub id: String,
}

impl Booking {
    /// Not every historical call site checked this, so the directory does.
    pub fn validate(&self) -> Result<(), String> {
        if self.end <= self.start {
            return Err(format!(
                "booking must end after it starts ({} .. {})",
                self.start, self.end
            ));
        }
        Ok(())
    }
}
