//! Requester notifications for the Sparkle worker.
//!
//! - [`Notifier`] -- the seam the worker loop talks to.
//! - [`delivery::discord`] -- edits the original Discord interaction
//!   message through the webhook API.

pub mod delivery;
pub mod notifier;

pub use delivery::discord::DiscordWebhook;
pub use notifier::{NotificationError, Notifier};
