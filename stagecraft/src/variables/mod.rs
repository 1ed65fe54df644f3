//! Variable slots and their resolution.
//!
//! This module provides:
//! - Slot declarations with roles, types and lazy defaults
//! - Valuables: literals or factories evaluated at bind time
//! - Data sources and sinks bound to slots
//! - Schema contracts for tabular variables
//! - The resolver that binds slots and writes results back

mod resolver;
mod schema;
mod slot;
mod source;
mod valuable;

pub use resolver::{StageBinding, VariableResolver};
pub use schema::{
    ColumnCheck, ColumnSpec, Discrepancy, SchemaContract, TableSchema, ValidationResult,
};
pub use slot::{SlotRole, VariableSlot};
pub use source::{DataSource, JsonFileSource, MemorySource, SourceMode};
pub use valuable::{StageFactory, StageRef, Valuable};
