//! pgsage-core — shared library for the pgsage analyzer.
//!
//! Provides:
//! - `collector` — host and PostgreSQL fact collection
//! - `facts` — typed key/value facts with units
//! - `rules` — tuning rule catalog and evaluation
//! - `checks` — health checks over collected facts
//! - `locks` — lock wait graph and blocking chains
//! - `cost` — query cost estimation from EXPLAIN output
//! - `report` — report assembly
//! - `render` — text/JSON rendering and the ALTER SYSTEM script
//! - `fmt` — shared formatting helpers (bytes, duration, ms)
//!
//! With `ai` feature:
//! - `advisor` — chat-completion query advice

pub mod checks;
pub mod collector;
pub mod cost;
pub mod facts;
pub mod fmt;
pub mod locks;
pub mod render;
pub mod report;
pub mod rules;

#[cfg(feature = "ai")]
pub mod advisor;
