//! Baduk Arena Server Library
//!
//! Authoritative match sessions for Go and its playful variants, served
//! over WebTransport.
//!
//! # Features
//!
//! - `dos_ratelimit` - Per-command rate limiting on top of the connection caps (enabled by default)
//! - `ai_opponent` - Built-in random opponent for AI and tower sessions (enabled by default)

pub mod config;
pub mod engine;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod store;
pub mod util;
