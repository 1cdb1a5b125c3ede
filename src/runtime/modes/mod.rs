//! Mode routing
//!
//! - Server mode (HTTP server + in-process queue worker)
//! - CLI mode (single batch, cleanup, partner import, config generation)

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "server")]
pub use server::run_server;

#[cfg(feature = "cli")]
pub use cli::run_cli;
