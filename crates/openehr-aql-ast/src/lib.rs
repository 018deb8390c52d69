//! Analyzed AQL query definitions
//!
//! This crate defines the input contract of the ASL compiler: a query that has already
//! been parsed and structurally analyzed. It closely mirrors what the analysis stage
//! produces (containment chains, identified paths, path cohesion trees with join
//! annotations) while providing a clean Rust API for building such queries by hand.

mod cohesion;
mod contains;
mod literal;
mod operator;
mod path;
mod query;

pub use cohesion::*;
pub use contains::*;
pub use literal::*;
pub use operator::*;
pub use path::*;
pub use query::*;
