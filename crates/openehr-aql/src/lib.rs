//! openEHR AQL to ASL query compiler
//!
//! This crate ties the compiler together:
//! - The analyzed query model ([`ast`])
//! - The RM catalog and collaborator traits ([`model`])
//! - The query tree and its compiler ([`asl`])
//! - Error codes ([`diagnostics`])
//!
//! # Example
//!
//! ```
//! use openehr_aql::ast::{
//!     AqlQueryWrapper, ContainsChain, ContainsWrapper, Primitive, RmContainsWrapper, SelectWrapper,
//! };
//! use openehr_aql::{AqlEngine, EngineConfig};
//!
//! let config = EngineConfig::from_json_str(r#"{ "system_id": "node-a" }"#)?;
//! let engine = AqlEngine::new(config);
//!
//! let chain = ContainsChain::new([ContainsWrapper::from(RmContainsWrapper::new(0, "COMPOSITION").with_alias("c"))]);
//! let query = AqlQueryWrapper::new(chain).with_select(SelectWrapper::primitive(Primitive::Long(1)));
//! let root = engine.compile(&query)?;
//! assert_eq!(root.select.len(), 1);
//! # Ok::<(), openehr_aql::AqlError>(())
//! ```

mod config;
mod engine;

pub use openehr_aql_asl as asl;
pub use openehr_aql_ast as ast;
pub use openehr_aql_diagnostics as diagnostics;
pub use openehr_aql_model as model;

pub use config::{DEFAULT_SYSTEM_ID, EngineConfig};
pub use engine::{AqlEngine, AqlEngineBuilder};

// Convenience re-exports
pub use openehr_aql_asl::{AslPostProcessor, AslRootQuery, CleanupPostProcessor};
pub use openehr_aql_ast::AqlQueryWrapper;
pub use openehr_aql_diagnostics::{AqlError, Result};
pub use openehr_aql_model::{MetadataResolver, SystemIdentity, TemplateRegistry};
