//! Notification policy: pure decisions over a group and the user's config.

use merchant_watch_protocol::Rarity;

use crate::settings::UserNotificationConfig;
use crate::store::AppearanceGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    None,
    Found,
    SpawnImminent,
}

/// Decides whether a newly admitted sighting in `group` is worth a "found"
/// notification. Call once per admitted id, after the sighting was appended.
pub fn decide_found(group: &AppearanceGroup, config: &UserNotificationConfig) -> Decision {
    if !config.notifications_enabled {
        return Decision::None;
    }
    let sightings = group.sightings();
    if sightings.is_empty() {
        return Decision::None;
    }

    let setting = config.merchant(group.name());
    if let Some(setting) = setting {
        if !setting.enabled {
            return Decision::None;
        }
        if sightings
            .iter()
            .any(|sighting| setting.cards.contains(&sighting.card.name))
        {
            return Decision::Found;
        }
    }

    if config.notify_legendary_rapport
        && sightings
            .iter()
            .any(|sighting| sighting.rapport_rarity == Some(Rarity::Legendary))
    {
        return Decision::Found;
    }

    Decision::None
}

/// Decides whether a predicted spawn of `group` should be announced.
/// Card and rapport play no part: nothing has been sighted yet.
pub fn decide_spawn(group: &AppearanceGroup, config: &UserNotificationConfig) -> Decision {
    if !config.notifications_enabled || !config.notify_merchant_appearance {
        return Decision::None;
    }
    // Merchants without an entry default to enabled.
    if config
        .merchant(group.name())
        .map(|setting| !setting.enabled)
        .unwrap_or(false)
    {
        return Decision::None;
    }
    Decision::SpawnImminent
}
