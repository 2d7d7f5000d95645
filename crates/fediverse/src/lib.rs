//! fediverse-client: the small slice of the Mastodon API a reply bot needs.
//!
//! ## Core Types
//!
//! - [`MastodonClient`] - REST calls (credentials, lookups, timelines, posting)
//! - [`StreamingClient`] / [`StreamingSession`] - the `user` WebSocket stream
//! - [`ClientError`] - errors classified as transient or permanent

pub mod error;
pub mod model;
pub mod rest;
pub mod streaming;

pub use error::{ClientError, Result};
pub use model::{
    Account, Mention, NewStatus, Notification, NotificationType, Quote, Status, Visibility,
};
pub use rest::{InstanceConfig, MastodonClient};
pub use streaming::{StreamMessage, StreamingClient, StreamingSession, decode_frame};
