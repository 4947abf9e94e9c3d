//! services/api/src/adapters/mod.rs
//!
//! Declares the concrete implementations of the core crate's store ports.

pub mod db;
