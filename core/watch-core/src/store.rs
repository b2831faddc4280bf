//! Appearance groups: one per known merchant, created at startup.
//!
//! The store is the single owner of group state and of the seen-id index.
//! Outside callers go through its operations; nothing mutates a group's
//! fields directly.
//!
//! Schedule and observation are independent. A group can sit inside its
//! window with no confirmed sightings, and sightings can arrive for a group
//! whose predicted window has not opened yet.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use merchant_watch_protocol::{Sighting, SightingId};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::catalogue::{Catalogue, MerchantDefinition};
use crate::dedup::{GroupKey, SeenIdIndex};
use crate::schedule::{next_window, AppearanceWindow};

#[derive(Debug, Clone)]
pub struct AppearanceGroup {
    merchant: Arc<MerchantDefinition>,
    window: Option<AppearanceWindow>,
    sightings: Vec<Sighting>,
    spawn_notified: bool,
}

impl AppearanceGroup {
    pub fn new(merchant: Arc<MerchantDefinition>) -> Self {
        Self {
            merchant,
            window: None,
            sightings: Vec::new(),
            spawn_notified: false,
        }
    }

    pub fn merchant(&self) -> &MerchantDefinition {
        &self.merchant
    }

    pub fn name(&self) -> &str {
        &self.merchant.name
    }

    pub fn next_appearance(&self) -> Option<DateTime<Utc>> {
        self.window.map(|window| window.starts_at)
    }

    pub fn appearance_expires(&self) -> Option<DateTime<Utc>> {
        self.window.map(|window| window.expires_at)
    }

    /// Sightings in discovery order.
    pub fn sightings(&self) -> &[Sighting] {
        &self.sightings
    }

    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        self.window.map(|window| window.contains(now)).unwrap_or(false)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.in_window(now) && !self.sightings.is_empty()
    }

    fn needs_reschedule(&self, now: DateTime<Utc>) -> bool {
        self.window
            .map(|window| window.expires_at <= now)
            .unwrap_or(true)
    }

    pub(crate) fn push_sighting(&mut self, sighting: Sighting) {
        self.sightings.push(sighting);
    }
}

/// Ordered, read-only projection of a group for presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupView {
    pub merchant_name: String,
    pub region: String,
    pub next_appearance: Option<DateTime<Utc>>,
    pub appearance_expires: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub sightings: Vec<Sighting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(GroupKey),
    Duplicate,
    UnknownGroup,
}

#[derive(Debug)]
pub struct GroupStore {
    groups: Vec<AppearanceGroup>,
    by_name: HashMap<String, GroupKey>,
    seen: SeenIdIndex,
    order: Vec<GroupKey>,
    dirty: bool,
    window_length: Duration,
}

impl GroupStore {
    pub fn new(catalogue: &Catalogue, window_length: Duration) -> Self {
        let groups: Vec<AppearanceGroup> = catalogue
            .merchants()
            .map(|merchant| AppearanceGroup::new(Arc::new(merchant.clone())))
            .collect();
        let by_name = groups
            .iter()
            .enumerate()
            .map(|(key, group)| (group.name().to_string(), key))
            .collect();
        let order = (0..groups.len()).collect();
        Self {
            groups,
            by_name,
            seen: SeenIdIndex::new(),
            order,
            dirty: false,
            window_length,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, name: &str) -> Option<&AppearanceGroup> {
        self.by_name.get(name).map(|key| &self.groups[*key])
    }

    pub fn group_at(&self, key: GroupKey) -> &AppearanceGroup {
        &self.groups[key]
    }

    pub fn seen(&self) -> &SeenIdIndex {
        &self.seen
    }

    /// Advances the schedule of every group whose window has expired (or was
    /// never computed), clearing its sightings. Returns the number of groups
    /// rescheduled; a second call before the next expiry returns 0.
    pub fn schedule_tick(&mut self, now: DateTime<Utc>, utc_offset: FixedOffset) -> usize {
        let mut rescheduled = 0;
        for key in 0..self.groups.len() {
            if self.groups[key].needs_reschedule(now) {
                self.reschedule(key, now, utc_offset);
                rescheduled += 1;
            }
        }
        rescheduled
    }

    /// Reschedules every group regardless of expiry. Used when the server
    /// region (and with it the UTC offset) changes.
    pub fn force_reschedule(&mut self, now: DateTime<Utc>, utc_offset: FixedOffset) {
        for key in 0..self.groups.len() {
            self.reschedule(key, now, utc_offset);
        }
    }

    fn reschedule(&mut self, key: GroupKey, now: DateTime<Utc>, utc_offset: FixedOffset) {
        let window_length = self.window_length;
        let group = &mut self.groups[key];
        group.window = next_window(&group.merchant, now, utc_offset, window_length);
        // A window we joined after it opened was never "imminent".
        group.spawn_notified = group
            .window
            .map(|window| window.starts_at <= now)
            .unwrap_or(true);
        for sighting in group.sightings.drain(..) {
            self.seen.forget(&sighting.id);
        }
        debug!(
            merchant = %group.merchant.name,
            next_appearance = ?group.window.map(|w| w.starts_at),
            "Group rescheduled"
        );
        self.dirty = true;
    }

    /// Returns and resets the "ordering may be stale" flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Re-sorts the visible ordering by next appearance, then merchant region.
    /// Unscheduled groups sort last.
    pub fn resort(&mut self) {
        let groups = &self.groups;
        self.order.sort_by(|left, right| {
            let (left, right) = (&groups[*left], &groups[*right]);
            compare_schedule(left.next_appearance(), right.next_appearance())
                .then_with(|| left.merchant.region.cmp(&right.merchant.region))
        });
    }

    pub fn ordered(&self) -> impl Iterator<Item = &AppearanceGroup> {
        self.order.iter().map(|key| &self.groups[*key])
    }

    pub fn views(&self, now: DateTime<Utc>) -> Vec<GroupView> {
        self.ordered()
            .map(|group| GroupView {
                merchant_name: group.merchant.name.clone(),
                region: group.merchant.region.clone(),
                next_appearance: group.next_appearance(),
                appearance_expires: group.appearance_expires(),
                is_active: group.is_active(now),
                sightings: group.sightings.clone(),
            })
            .collect()
    }

    /// Admits `sighting` into the group named `group_name` if its id is new.
    pub fn admit(&mut self, group_name: &str, sighting: &Sighting) -> Admission {
        let Some(key) = self.by_name.get(group_name).copied() else {
            return Admission::UnknownGroup;
        };
        if !self.seen.admit(sighting.id, key) {
            return Admission::Duplicate;
        }
        self.groups[key].push_sighting(sighting.clone());
        Admission::Admitted(key)
    }

    /// Applies a new vote total to an admitted sighting. Unknown ids are
    /// ignored and reported as false.
    pub fn update_votes(&mut self, id: &SightingId, total: i32) -> bool {
        let Some(key) = self.seen.owner(id) else {
            return false;
        };
        match self.groups[key]
            .sightings
            .iter_mut()
            .find(|sighting| &sighting.id == id)
        {
            Some(sighting) => {
                sighting.votes = total;
                true
            }
            None => false,
        }
    }

    /// Drops every sighting and the whole seen-id index. Schedules are kept.
    pub fn clear_sightings(&mut self) {
        self.seen.clear();
        for group in &mut self.groups {
            group.sightings.clear();
        }
    }

    /// Groups whose predicted window opens within `lookahead` of `now`, that
    /// are not active yet and have not been announced this cycle. Each
    /// returned group is latched so it is not returned again until its next
    /// reschedule.
    pub fn take_spawn_candidates(
        &mut self,
        now: DateTime<Utc>,
        lookahead: Duration,
    ) -> Vec<GroupKey> {
        let mut candidates = Vec::new();
        for key in self.order.iter().copied() {
            let group = &mut self.groups[key];
            if group.spawn_notified || group.is_active(now) {
                continue;
            }
            let Some(window) = group.window else { continue };
            if window.starts_at <= now + lookahead && now < window.expires_at {
                group.spawn_notified = true;
                candidates.push(key);
            }
        }
        candidates
    }
}

fn compare_schedule(left: Option<DateTime<Utc>>, right: Option<DateTime<Utc>>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
