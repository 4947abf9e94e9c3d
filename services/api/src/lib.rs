pub mod adapters;
pub mod config;
pub mod error;
pub mod reaper;
pub mod web;

pub use web::{router, ApiDoc};
