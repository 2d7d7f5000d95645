//! scrabble-bot library crate.
//!
//! A Mastodon bot that answers single-word mentions with the word's Scrabble
//! score. The core (rate limiting, duplicate suppression, checkpointing,
//! classification, dispatch and stream supervision) is independent of Mastodon
//! and is exposed here for integration testing.

rust_i18n::i18n!("locales", fallback = "en");

pub mod app;
pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod lock;
pub mod logging;
pub mod mastodon;
pub mod messages;
pub mod panic_hook;
pub mod pipeline;
pub mod rate_limiter;
pub mod scoring;
pub mod shutdown;
pub mod stream;
pub mod supervisor;
pub mod text;
pub mod utils;

pub use error::{Error, Result};
