//! Observability bootstrap for maestro binaries.

pub mod tracing_setup;
