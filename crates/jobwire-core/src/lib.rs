//! Core domain + application logic for jobwire.
//!
//! This crate is intentionally framework-agnostic. The source platform
//! (MTProto), the outbound bot and the SQLite catalog/ledger live behind
//! ports (traits) implemented in adapter crates.

pub mod config;
pub mod cycle;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod ports;
pub mod render;
pub mod scan;
pub mod session;

pub use errors::{DeliveryError, Error, Result};
