//! Client-side gateway router and integrity verifier for `ar://` content
//! addresses.
//!
//! `wayfinder_core` resolves `ar://<name-or-id>[/path]` into a concrete
//! gateway URL, fetches it, and — when a [`verification::VerificationStrategy`]
//! is configured — tees the response body so the bytes handed to the caller
//! are cryptographically checked against independent trusted gateways while
//! they stream.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wayfinder_core::config::WayfinderConfigBuilder;
//! use wayfinder_core::gateway::Gateway;
//! use wayfinder_core::providers::StaticGatewaysProvider;
//! use wayfinder_core::routing::RandomStrategy;
//! use wayfinder_core::wayfinder::Wayfinder;
//!
//! # async fn run() -> wayfinder_core::error::Result<()> {
//! let provider = Arc::new(StaticGatewaysProvider::new(vec![
//!     Gateway::parse("https://arweave.net").unwrap(),
//! ]));
//! let config = WayfinderConfigBuilder::new()
//!     .routing_strategy(Arc::new(RandomStrategy::new(provider.clone())))
//!     .gateways_provider(provider)
//!     .build()?;
//! let wayfinder = Wayfinder::new(config);
//! let response = wayfinder.request("ar://some-arns-name").await?;
//! let _ = response.status;
//! # Ok(())
//! # }
//! ```
//!
//! Module map:
//! - [`providers`] — candidate gateway origin lists (C1)
//! - [`routing`] — single-gateway selection strategies (C2)
//! - [`identifier`], [`resolver`] — `ar://` parsing and URL building (C3)
//! - [`root_tx`] — nested data-item → root transaction resolution (C4)
//! - [`cdb64`] — the 64-bit constant-database reader/builder (C5)
//! - [`verification`], [`merkle`] — integrity verification strategies (C6)
//! - [`tap`] — the backpressured stream tee (C7)
//! - [`wayfinder`], [`events`] — the composed entry point (C8)
//! - [`config`] — typed, validated instance configuration
//! - [`dns`] — gasless ArNS name resolution via DNS-over-HTTPS
//! - [`error`] — the crate's single error type

pub mod cdb64;
pub mod config;
pub mod dns;
pub mod error;
pub mod events;
pub mod gateway;
pub mod identifier;
pub mod merkle;
pub mod providers;
pub mod resolver;
pub mod root_tx;
pub mod routing;
pub mod tap;
pub mod verification;
pub mod wayfinder;

pub use error::{Result, WayfinderError};
pub use wayfinder::{Wayfinder, WayfinderResponse};

/// `ar://` URI scheme prefix recognized by [`resolver::parse_ar_url`].
pub const AR_SCHEME_PREFIX: &str = "ar://";
