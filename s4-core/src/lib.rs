//! The per-node server subsystem: routing, transfer jobs, admission pools,
//! the PUT/GET protocol, listing/delete, eval, the map family, and
//! garbage collection. Everything here is transport-agnostic; `s4-server`
//! is the thin binary that wires it to an HTTP surface.

pub mod checksum;
pub mod config;
pub mod error;
pub mod eval;
pub mod gc;
pub mod get;
pub mod jobs;
pub mod listing;
pub mod map;
pub mod node;
pub mod pipeline;
pub mod pool;
pub mod put;
pub mod routing;
