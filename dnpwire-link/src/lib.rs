//! # dnpwire-link
//!
//! Moves dnpwire messages over a byte stream.
//!
//! This crate provides:
//! - [`Link`], framing [`Message`](dnpwire_protocol::Message) values over any
//!   async stream, with receive timeouts and a bounded resync window
//! - TCP connection setup through [`ConnectionConfig`]
//! - [`Master`], a request/response API for polling and controlling an outstation

pub mod client;
pub mod connection;
pub mod error;

pub use client::Master;
pub use connection::{ConnectionConfig, Link};
pub use error::LinkError;
