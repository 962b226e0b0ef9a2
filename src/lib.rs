//! # prodxfer
//!
//! Sliding-window product transfer between a spooled-file producer
//! (`prodxfer-client`) and a persisting consumer (`prodxfer-server`)
//! over a single long-lived TCP connection.
//!
//! Modeled on NOAA's `ldm`-adjacent product transfer daemons: a
//! priority-ordered spool poller feeds a fixed-size product table that
//! tracks each product through send, ack, retry, and final disposition,
//! while the server side frames products back off the wire and persists
//! them through a pluggable output store.

pub mod ccb;
pub mod client;
pub mod config;
pub mod defaults;
pub mod disposition;
pub mod framing;
pub mod logging;
pub mod pidfile;
pub mod poller;
pub mod product;
pub mod server;
pub mod signals;
pub mod store;
pub mod table;
pub mod wmo;

/// The current version of prodxfer.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
