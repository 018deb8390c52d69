//! openEHR reference model catalog for the AQL compiler
//!
//! This crate provides:
//! - RM type name constants and the ordered-value type families
//! - Structure RM types, their ancestors and database aliases
//! - Contribution change types
//! - Collaborator traits (template metadata, system identity) with in-memory implementations

pub mod change_type;
pub mod provider;
pub mod rm;

pub use change_type::*;
pub use provider::*;
pub use rm::*;
