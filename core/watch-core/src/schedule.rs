//! Appearance window prediction.

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

use crate::catalogue::MerchantDefinition;

/// Wandering merchants stay 25 minutes after they spawn.
pub const DEFAULT_WINDOW_MINUTES: i64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppearanceWindow {
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AppearanceWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now < self.expires_at
    }
}

/// Earliest window of `merchant` that has not yet expired at `now`.
///
/// A window already in progress is returned as-is, so a client joining
/// mid-window still attributes sightings to it. Once a window has expired
/// the result always starts strictly after `now` unless two windows of the
/// same merchant overlap.
pub fn next_window(
    merchant: &MerchantDefinition,
    now: DateTime<Utc>,
    utc_offset: FixedOffset,
    window: Duration,
) -> Option<AppearanceWindow> {
    let local_today = now.with_timezone(&utc_offset).date_naive();

    // Yesterday covers a window opened before local midnight that is still
    // running; tomorrow covers the wrap past the last time of the day.
    let mut best: Option<AppearanceWindow> = None;
    for day_offset in [-1i64, 0, 1] {
        let date = local_today + Duration::days(day_offset);
        for time in &merchant.appearance_times {
            let Some(starts_local) = utc_offset.from_local_datetime(&date.and_time(*time)).single()
            else {
                continue;
            };
            let starts_at = starts_local.with_timezone(&Utc);
            let expires_at = starts_at + window;
            if expires_at <= now {
                continue;
            }
            if best.map(|b| starts_at < b.starts_at).unwrap_or(true) {
                best = Some(AppearanceWindow {
                    starts_at,
                    expires_at,
                });
            }
        }
    }
    best
}
