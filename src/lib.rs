#![allow(clippy::result_large_err)]

pub mod admin;
pub mod app;
pub mod auth;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod error;
pub mod feed;
pub mod logging;
pub mod retry;
pub mod store;
pub mod telemetry;

pub mod transport;

pub use app::FeedProvider;
pub use error::{Error, Result};
