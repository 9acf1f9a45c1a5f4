//! Run progress distribution.

pub mod bus;

pub use bus::EventBus;
