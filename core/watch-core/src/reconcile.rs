//! Merging server updates into the group store.
//!
//! Both entry points route every sighting through the store's admission
//! check, so replaying a payload never duplicates state. The `on_found`
//! callback runs synchronously right after each admission, in payload order.

use merchant_watch_protocol::{MerchantGroupPayload, SightingId};
use tracing::debug;

use crate::store::{Admission, AppearanceGroup, GroupStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub admitted: usize,
    pub duplicates: usize,
    pub unknown_groups: usize,
    /// True when the whole update was discarded (wrong server).
    pub rejected: bool,
}

/// Applies one pushed group update. Updates for any server other than
/// `current_server` are discarded, as are groups the catalogue does not know.
pub fn apply_group_update<F>(
    store: &mut GroupStore,
    current_server: Option<&str>,
    server: &str,
    group: &MerchantGroupPayload,
    mut on_found: F,
) -> ReconcileOutcome
where
    F: FnMut(&AppearanceGroup),
{
    if current_server != Some(server) {
        debug!(
            server = %server,
            current = ?current_server,
            merchant = %group.merchant_name,
            "Discarding update for non-current server"
        );
        return ReconcileOutcome {
            rejected: true,
            ..ReconcileOutcome::default()
        };
    }
    let mut outcome = ReconcileOutcome::default();
    admit_group(store, group, &mut outcome, &mut on_found);
    outcome
}

/// Replaces every group's sightings with the authoritative `snapshot`.
///
/// The seen-id index is cleared first, so every sighting in the snapshot is
/// new and passes through `on_found` exactly once, including sightings that
/// were already known before the resync.
pub fn synchronize<F>(
    store: &mut GroupStore,
    snapshot: &[MerchantGroupPayload],
    mut on_found: F,
) -> ReconcileOutcome
where
    F: FnMut(&AppearanceGroup),
{
    store.clear_sightings();
    let mut outcome = ReconcileOutcome::default();
    for group in snapshot {
        admit_group(store, group, &mut outcome, &mut on_found);
    }
    debug!(
        groups = snapshot.len(),
        admitted = outcome.admitted,
        duplicates = outcome.duplicates,
        "Synchronized with server snapshot"
    );
    outcome
}

/// Applies a vote total. Ids this client never admitted are ignored.
pub fn apply_vote_total(store: &mut GroupStore, sighting_id: &SightingId, total: i32) -> bool {
    let applied = store.update_votes(sighting_id, total);
    if !applied {
        debug!(sighting_id = %sighting_id, "Ignoring vote total for unknown sighting");
    }
    applied
}

fn admit_group<F>(
    store: &mut GroupStore,
    group: &MerchantGroupPayload,
    outcome: &mut ReconcileOutcome,
    on_found: &mut F,
) where
    F: FnMut(&AppearanceGroup),
{
    for sighting in &group.sightings {
        match store.admit(&group.merchant_name, sighting) {
            Admission::Admitted(key) => {
                outcome.admitted += 1;
                on_found(store.group_at(key));
            }
            Admission::Duplicate => outcome.duplicates += 1,
            Admission::UnknownGroup => {
                debug!(merchant = %group.merchant_name, "Ignoring unknown merchant group");
                outcome.unknown_groups += 1;
                return;
            }
        }
    }
}
