//! services/api/src/lib.rs
//!
//! The library service: Postgres persistence for the core's repository port,
//! and a thin HTTP surface over the core operations.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
