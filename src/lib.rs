//! Core library for spotify-now-playing: OAuth token lifecycle, the
//! currently-playing query and the announce/dedup logic behind `+np`.
pub mod config;
pub mod models;
pub mod error;
pub mod credentials;
pub mod api;
pub mod retry;
pub mod announce;
pub mod format;
pub mod command;
pub mod poller;
