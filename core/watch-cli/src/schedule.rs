//! `schedule` subcommand: one-shot appearance window listing.

use chrono::{DateTime, FixedOffset, Utc};
use merchant_watch_core::{Catalogue, GroupStore, GroupView, WatchConfig, WatchError};
use std::fmt::Write as _;

use crate::CliError;

pub fn run(
    catalogue: &Catalogue,
    config: &WatchConfig,
    region: &str,
    now: DateTime<Utc>,
    json: bool,
) -> Result<(), CliError> {
    let offset = catalogue.region_offset(region)?;
    let views = upcoming(catalogue, config, offset, now);

    if json {
        let rendered = serde_json::to_string_pretty(&views).map_err(|source| WatchError::Json {
            context: "rendering schedule".to_string(),
            source,
        })?;
        println!("{}", rendered);
    } else {
        print!("{}", render_table(&views, offset, now));
    }
    Ok(())
}

fn upcoming(
    catalogue: &Catalogue,
    config: &WatchConfig,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Vec<GroupView> {
    let mut store = GroupStore::new(catalogue, config.window_length());
    store.force_reschedule(now, offset);
    store.resort();
    store.views(now)
}

fn render_table(views: &[GroupView], offset: FixedOffset, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    for view in views {
        let window = match (view.next_appearance, view.appearance_expires) {
            (Some(starts), Some(expires)) => format!(
                "{} - {}",
                starts.with_timezone(&offset).format("%a %H:%M"),
                expires.with_timezone(&offset).format("%H:%M")
            ),
            _ => "no scheduled appearance".to_string(),
        };
        let marker = match view.next_appearance {
            Some(starts) if starts <= now => "  (open)",
            _ => "",
        };
        let _ = writeln!(
            out,
            "{:<24} {:<18} {}{}",
            view.merchant_name, view.region, window, marker
        );
    }
    out
}
