use serde::{Deserialize, Serialize};

/// A stored card record, as returned by `GET /cards` and accepted by `PUT /cards`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Assigned by the storage backend; never changes once set
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub level: i64,
    /// Open categorical text, not checked against a fixed vocabulary
    #[serde(default)]
    pub attribute: String,
    /// Open categorical text, not checked against a fixed vocabulary
    #[serde(default)]
    pub race: String,
    #[serde(default)]
    pub attack: i64,
    #[serde(default)]
    pub defense: i64,
    /// Free-form effect text, empty when the card has none
    #[serde(default)]
    pub effect: String,
}

/// Payload for `POST /cards`. Any `id` sent by the client is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCard {
    pub name: String,
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub attribute: String,
    #[serde(default)]
    pub race: String,
    #[serde(default)]
    pub attack: i64,
    #[serde(default)]
    pub defense: i64,
    #[serde(default)]
    pub effect: String,
}

impl NewCard {
    /// Attach a backend-assigned identifier, producing the persisted record
    pub fn with_id(self, id: i64) -> Card {
        Card {
            id,
            name: self.name,
            level: self.level,
            attribute: self.attribute,
            race: self.race,
            attack: self.attack,
            defense: self.defense,
            effect: self.effect,
        }
    }
}

/// Payload for `DELETE /cards`. Only the identifier is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardKey {
    pub id: i64,
}
