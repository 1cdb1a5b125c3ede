//! postback-tracker - affiliate postback ingestion service
//!
//! Accepts conversion callbacks from affiliate networks, stores them in a durable
//! queue and applies them to per-partner statistics in a separate processing pass.
//!
//! # Features
//! - **server**: HTTP server mode (default)
//! - **cli**: Command-line interface
//!
//! # Architecture
//! - `api`: HTTP handlers (postback endpoint, health)
//! - `services`: Field extraction, ingestion gate, queue processor, notifier, sheet export
//! - `storage`: SeaORM-backed partner registry, queue and statistics stores
//! - `interfaces`: CLI commands
//! - `config`: Configuration management
//! - `runtime`: Application lifecycle and execution modes
//! - `system`: Logging and panic handling

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod interfaces;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod system;
pub mod utils;
