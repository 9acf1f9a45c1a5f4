//! SQLite persistence: split reader/writer pools plus the agent and
//! execution repositories.

pub mod agent;
pub mod execution;
pub mod pool;

pub use agent::SqliteAgentStore;
pub use execution::SqliteExecutionRepository;
pub use pool::DatabasePool;
