// Proxy subsystem
//
// Handles:
// - The public CORS gateway (axum) with header tunneling and HLS rewriting
// - The engine-side client the module runtime fetches through
// - The shared header stripping/tunneling policy

pub mod client;
pub mod gateway;
pub mod headers;
pub mod hls;

pub use client::{ProxyClient, ProxyResponse};
pub use gateway::ProxyServer;
