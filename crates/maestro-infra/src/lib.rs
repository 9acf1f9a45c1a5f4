//! Infrastructure implementations for maestro.
//!
//! Implements the ports defined in `maestro-core`: SQLite-backed agent and
//! execution stores, the HTTP agent invoker, and configuration loading.

pub mod config;
pub mod invoke;
pub mod sqlite;
