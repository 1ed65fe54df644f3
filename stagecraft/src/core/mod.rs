//! Core domain model types for stagecraft.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Stage status and kind enums
//! - Declared variable types and JSON value helpers

mod status;
mod value;

pub use status::{StageKind, StageStatus};
pub use value::{is_truthy, json_type_name, VarType};
