//! Presence: who is online, derived from bridge lifecycle events
//!
//! A user is online while at least one of their connections is open, and
//! for `offline_debounce` after the last one closes. Snapshots for a user
//! go out at most once per `rate_limit`; bursts coalesce to the latest state.

mod options;
mod service;
mod snapshot;
mod state;

pub use options::PresenceOptions;
pub use service::{PresenceService, PresenceView};
pub use snapshot::{ClientPresence, PresenceKind, PresenceSnapshot, StatusSnapshot, UserPresence};
pub use state::{PresenceEvent, PresenceState};
