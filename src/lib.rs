//! cfscout discovers the running application instances of Cloud
//! Foundry style platforms and turns configured target patterns into
//! concrete, scrapeable endpoint URLs.
//!
//! The pipeline: configured [`config::Target`]s are expanded by the
//! [`discovery::TargetResolver`] against the (cached, rate-limited)
//! control-plane accessor, and the [`discovery::InstanceScanner`]
//! enumerates each resolved application's running instances with their
//! access URLs. The [`cache`] layer bounds upstream traffic, the
//! [`client`] layer provides the accessor trait, its HTTP
//! implementation and the fetch/batch machinery.

pub mod cache;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;

pub use error::{Error, Result};
