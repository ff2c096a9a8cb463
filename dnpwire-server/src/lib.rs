//! # dnpwire-server
//!
//! Outstation for the dnpwire protocol.
//!
//! This crate provides:
//! - A TCP accept loop with connection limits, idle timeouts and shutdown
//! - A point database of binary inputs and outputs, counters and analogs
//! - Request handlers for reads, writes, controls and restarts
//! - Per-connection sessions tracking select-before-operate state
//! - Layered YAML and environment configuration

pub mod config;
pub mod database;
pub mod error;
pub mod handler;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError, NetworkConfig, PointsConfig, StationConfig};
pub use database::{Database, PointKind};
pub use error::ServerError;
pub use handler::Handler;
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{Selection, Session};
