//! External delivery channels for requester notifications.

pub mod discord;
