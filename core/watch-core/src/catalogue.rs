//! Static merchant and server-region catalogue.
//!
//! Loaded once before the engine starts and never mutated afterwards.
//! Appearance times are server-local wall-clock times; the owning region's
//! UTC offset turns them into instants.

use chrono::{FixedOffset, NaiveTime};
use merchant_watch_protocol::Card;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, WatchError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantDefinition {
    pub name: String,
    /// In-game continent the merchant roams. Used as the secondary sort key.
    pub region: String,
    #[serde(default)]
    pub cards: Vec<Card>,
    /// Server-local times of day at which an appearance window opens.
    pub appearance_times: Vec<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRegion {
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub servers: Vec<String>,
}

impl ServerRegion {
    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)
    }

    pub fn has_server(&self, server: &str) -> bool {
        self.servers.iter().any(|candidate| candidate == server)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalogue {
    #[serde(default)]
    pub merchants: BTreeMap<String, MerchantDefinition>,
    #[serde(default)]
    pub server_regions: BTreeMap<String, ServerRegion>,
}

impl Catalogue {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).map_err(|source| WatchError::Io {
            context: format!("reading catalogue {}", path.display()),
            source,
        })?;
        let catalogue: Catalogue =
            serde_json::from_str(&content).map_err(|err| WatchError::CatalogueMalformed {
                path: path.to_path_buf(),
                details: err.to_string(),
            })?;
        catalogue
            .validate()
            .map_err(|details| WatchError::CatalogueMalformed {
                path: path.to_path_buf(),
                details,
            })?;
        Ok(catalogue)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        for (key, merchant) in &self.merchants {
            if key != &merchant.name {
                return Err(format!(
                    "merchant key {} does not match name {}",
                    key, merchant.name
                ));
            }
            if merchant.appearance_times.is_empty() {
                return Err(format!("merchant {} has no appearance times", key));
            }
        }
        for (name, region) in &self.server_regions {
            if region.utc_offset().is_none() {
                return Err(format!(
                    "region {} has out-of-range utc offset {}",
                    name, region.utc_offset_minutes
                ));
            }
        }
        Ok(())
    }

    pub fn region(&self, name: &str) -> Result<&ServerRegion> {
        self.server_regions
            .get(name)
            .ok_or_else(|| WatchError::UnknownRegion(name.to_string()))
    }

    pub fn region_offset(&self, name: &str) -> Result<FixedOffset> {
        let region = self.region(name)?;
        region.utc_offset().ok_or_else(|| WatchError::ConfigInvalid {
            field: format!("server_regions.{}.utc_offset_minutes", name),
            reason: "out of range".to_string(),
        })
    }

    /// Confirms that `server` belongs to `region`.
    pub fn check_server(&self, region: &str, server: &str) -> Result<()> {
        if self.region(region)?.has_server(server) {
            Ok(())
        } else {
            Err(WatchError::UnknownServer {
                region: region.to_string(),
                server: server.to_string(),
            })
        }
    }

    pub fn merchants(&self) -> impl Iterator<Item = &MerchantDefinition> {
        self.merchants.values()
    }
}
