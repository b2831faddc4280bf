//! # merchant-watch-core
//!
//! Client-side engine that predicts wandering-merchant appearance windows,
//! merges crowd-sourced sightings pushed by a server, and decides which of
//! them deserve a notification.
//!
//! ## Design Principles
//!
//! - **Single owner**: One engine task owns every group and the session.
//!   Handles talk to it through commands; nothing else mutates state.
//! - **Idempotent merges**: Sightings are admitted through a seen-id index,
//!   so replays and resyncs never duplicate entries.
//! - **Graceful degradation**: Transport, notification and settings failures
//!   are logged and swallowed. The next tick or resync recovers.
//! - **Seams, not platforms**: Transport, notification sink, sound and
//!   settings storage are traits supplied by the host.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use merchant_watch_core::{start, EngineDeps};
//!
//! let (handle, task) = start(deps);
//! handle.select_server(Some("North America East"), Some("Azena"))?;
//! let groups = handle.groups().await?;
//! ```

pub mod catalogue;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod notify;
pub mod policy;
pub mod reconcile;
pub mod schedule;
pub mod session;
pub mod settings;
pub mod store;
pub mod ticker;
pub mod transport;

pub use catalogue::{Catalogue, MerchantDefinition, ServerRegion};
pub use config::{load_config, WatchConfig};
pub use engine::{start, EngineDeps, EngineExit, EngineHandle, TestNotification};
pub use error::{Result, WatchError};
pub use notify::{
    DiscardSink, NotificationRequest, NotificationSink, NotifyError, Silent, SoundError,
    SoundPlayer,
};
pub use policy::Decision;
pub use schedule::AppearanceWindow;
pub use settings::{
    FileSettings, MemorySettings, MerchantNotificationSetting, SettingsProvider,
    UserNotificationConfig, UserSettings,
};
pub use store::{AppearanceGroup, GroupStore, GroupView};
pub use ticker::{Clock, SystemClock};
pub use transport::{EventSender, Subscription, Transport, TransportError, TransportEvent};
