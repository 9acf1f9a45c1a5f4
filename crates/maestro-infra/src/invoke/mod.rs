//! Agent invoker implementations.

pub mod http;

pub use http::HttpAgentInvoker;
