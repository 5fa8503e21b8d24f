//! torii - media source module engine and CORS streaming proxy gateway.
//!
//! Third-party "modules" (small JavaScript scripts plus a JSON manifest)
//! provide search, details, and stream resolution for one content source
//! each. This crate executes them in per-module QuickJS realms behind a
//! polyfilled native scraping API, collapses their two calling conventions
//! into one uniform handle, and serves the HTTP gateway that tunnels
//! browser-forbidden headers and rewrites HLS manifests so an in-browser
//! player can stream through it end to end.

pub mod config;
pub mod error;
pub mod modules;
pub mod proxy;

pub use config::GatewayConfig;
pub use error::ModuleError;
pub use modules::{LoadedModule, ModuleLoader};
pub use proxy::{ProxyClient, ProxyServer};
