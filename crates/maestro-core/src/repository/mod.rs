//! Storage ports for execution records.
//!
//! `ExecutionRepository` is the trait the infrastructure layer implements;
//! `MemoryExecutionRepository` is the in-process implementation used when
//! durability is not needed (the engine's default posture -- a run lives and
//! dies within one orchestrating process).

pub mod execution;
pub mod memory;

pub use execution::ExecutionRepository;
pub use memory::MemoryExecutionRepository;
