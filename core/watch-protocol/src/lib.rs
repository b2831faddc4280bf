//! Wire types and validation for the merchant push transport.
//!
//! This crate is shared by the engine and transport adapters so both sides
//! agree on payload shapes. Adapters parse and validate here; the engine
//! trusts payloads that reach it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Version this client reports when the server asks whether it is outdated.
pub const CLIENT_VERSION: u32 = 4;
pub const MAX_ZONE_LEN: usize = 128;
pub const MAX_SIGHTINGS_PER_GROUP: usize = 64;

/// Server-assigned identity of one merchant appearance.
pub type SightingId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "Common",
            Rarity::Uncommon => "Uncommon",
            Rarity::Rare => "Rare",
            Rarity::Epic => "Epic",
            Rarity::Legendary => "Legendary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Card {
    pub name: String,
    pub rarity: Rarity,
}

/// One reported merchant appearance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sighting {
    pub id: SightingId,
    pub zone: String,
    pub card: Card,
    #[serde(default)]
    pub rapport_rarity: Option<Rarity>,
    #[serde(default)]
    pub votes: i32,
}

impl Sighting {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.id.is_nil() {
            return Err(ErrorInfo::new("invalid_sighting_id", "sighting id is nil"));
        }
        require_string(&self.zone, "zone")?;
        if self.zone.len() > MAX_ZONE_LEN {
            return Err(ErrorInfo::new(
                "invalid_zone",
                format!("zone must be {} characters or fewer", MAX_ZONE_LEN),
            ));
        }
        require_string(&self.card.name, "card.name")?;
        Ok(())
    }
}

/// All sightings the server currently knows for one merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MerchantGroupPayload {
    pub merchant_name: String,
    #[serde(default)]
    pub sightings: Vec<Sighting>,
}

impl MerchantGroupPayload {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_string(&self.merchant_name, "merchant_name")?;
        if self.sightings.len() > MAX_SIGHTINGS_PER_GROUP {
            return Err(ErrorInfo::new(
                "too_many_sightings",
                format!(
                    "group carries {} sightings (max {})",
                    self.sightings.len(),
                    MAX_SIGHTINGS_PER_GROUP
                ),
            ));
        }
        for sighting in &self.sightings {
            sighting.validate()?;
        }
        Ok(())
    }
}

/// Messages pushed by the server to subscribed clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum PushMessage {
    UpdateMerchantGroup {
        server: String,
        group: MerchantGroupPayload,
    },
    UpdateVoteTotal {
        sighting_id: SightingId,
        vote_total: i32,
    },
}

impl PushMessage {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self {
            PushMessage::UpdateMerchantGroup { server, group } => {
                require_string(server, "server")?;
                group.validate()
            }
            PushMessage::UpdateVoteTotal { sighting_id, .. } => {
                if sighting_id.is_nil() {
                    return Err(ErrorInfo::new("invalid_sighting_id", "sighting id is nil"));
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

pub fn parse_push(value: Value) -> Result<PushMessage, ErrorInfo> {
    let message: PushMessage = serde_json::from_value(value).map_err(|err| {
        ErrorInfo::new(
            "invalid_payload",
            format!("push payload is invalid JSON: {}", err),
        )
    })?;
    message.validate()?;
    Ok(message)
}

pub fn parse_snapshot(value: Value) -> Result<Vec<MerchantGroupPayload>, ErrorInfo> {
    let groups: Vec<MerchantGroupPayload> = serde_json::from_value(value).map_err(|err| {
        ErrorInfo::new(
            "invalid_payload",
            format!("snapshot payload is invalid JSON: {}", err),
        )
    })?;
    for group in &groups {
        group.validate()?;
    }
    Ok(groups)
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}
