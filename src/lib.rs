//! Forum chat bridge library.
//!
//! A service that watches forum threads and sections for new activity,
//! notifies chat subscribers, and posts replies into the forum on their
//! behalf using an externally supplied authenticated session.

pub mod chat;
pub mod config;
pub mod db;
pub mod forum;
