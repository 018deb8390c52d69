//! AQL to ASL compiler
//!
//! Compiles an analyzed AQL query ([`openehr_aql_ast::AqlQueryWrapper`]) into the ASL,
//! a relational query tree a SQL renderer can walk without knowing AQL:
//!
//! - **FROM**: one structure query per containment, joined along the containment chain
//! - **Paths**: structure, JSON and extracted-column queries for every referenced path
//! - **SELECT / WHERE / ORDER BY**: fields and conditions over the resolved paths
//! - **Post-processing**: ordered stages rewriting the finished tree
//!
//! # Example
//!
//! ```
//! use openehr_aql_asl::AqlSqlLayer;
//! use openehr_aql_ast::{
//!     AqlQueryWrapper, ContainsChain, ContainsWrapper, Primitive, RmContainsWrapper, SelectWrapper,
//! };
//! use openehr_aql_model::TemplateRegistry;
//!
//! let chain = ContainsChain::new([ContainsWrapper::from(RmContainsWrapper::new(0, "COMPOSITION").with_alias("c"))]);
//! let query = AqlQueryWrapper::new(chain).with_select(SelectWrapper::primitive(Primitive::Long(1)));
//!
//! let registry = TemplateRegistry::new();
//! let root = AqlSqlLayer::new(&registry, "local.ehrbase.org")
//!     .build_asl_root_query(&query)
//!     .unwrap();
//! assert_eq!(root.select.len(), 1);
//! ```

mod alias;
pub mod condition;
mod extracted;
mod field;
mod from;
mod layer;
mod model;
pub mod ordered;
mod path;
mod postprocess;
pub mod structure;
pub mod temporal;

pub use alias::AliasProvider;
pub use condition::{AslCondition, AslConditionOperator, AslValue};
pub use extracted::AslExtractedColumn;
pub use field::{
    AggregatingField, AslField, ColumnField, ComplexExtractedColumnField, ConstantField, ConstantValue,
    FOLDER_ITEM_ID_FIELD, FieldSource, FieldType, FolderItemIdVirtualField, RmPathField, SubqueryField,
};
pub use from::{ContainsMap, FromCompiler, OwnerProvider, owner_provider};
pub use layer::AqlSqlLayer;
pub use model::{
    AUDIT_DETAILS_TABLE, AslChild, AslJoin, AslJoinCondition, AslOrderByField, AslQuery, AslRootQuery,
    COMP_DATA_TABLE, COMP_VERSION_TABLE, ContainerQuery, EHR_FOLDER_DATA_TABLE, EHR_FOLDER_VERSION_TABLE,
    EHR_STATUS_DATA_TABLE, EHR_STATUS_VERSION_TABLE, EHR_TABLE, FilteringQuery, JoinType, PathDataQuery, QueryId,
    QueryKind, RmObjectDataQuery, SourceRelation, StructureColumn, StructureQuery, Table,
};
pub use path::{PathCompiler, PathFieldMap, extracted_column_field};
pub use postprocess::{AslPostProcessor, CLEANUP_ORDER, CleanupPostProcessor};
