//! The ASL query tree
//!
//! All queries of one compilation live in an append-only arena owned by
//! [`AslRootQuery`]. Queries, fields, conditions and joins refer to queries by
//! [`QueryId`] only, so the tree has no cycles and no borrowed references.

use crate::{AslCondition, AslField, ColumnField, FieldSource, FieldType};
use indexmap::IndexMap;
use openehr_aql_ast::{IdentifiedPath, PathNode, SortDirection};
use openehr_aql_diagnostics::{ASL0009, AqlError, Result};
use openehr_aql_model::{AUDIT_DETAILS, COMPOSITION, EHR, EHR_STATUS, FOLDER, StructureRoot};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Handle of a query inside the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueryId(pub usize);

impl QueryId {
    /// The root query
    pub const ROOT: QueryId = QueryId(0);
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

// ============================================================================
// Physical relations
// ============================================================================

/// A physical table with the columns the compiler may reference
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Table {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub primary_key: &'static [&'static str],
}

impl Table {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(&name)
    }
}

pub static EHR_TABLE: Table = Table {
    name: "ehr",
    columns: &["id", "creation_date"],
    primary_key: &["id"],
};

pub static EHR_STATUS_VERSION_TABLE: Table = Table {
    name: "ehr_status_version",
    columns: &["vo_id", "ehr_id", "sys_version", "audit_id", "contribution_id", "sys_period_lower"],
    primary_key: &["vo_id"],
};

pub static EHR_STATUS_DATA_TABLE: Table = Table {
    name: "ehr_status_data",
    columns: &[
        "vo_id",
        "num",
        "ehr_id",
        "entity_concept",
        "entity_name",
        "rm_entity",
        "num_cap",
        "parent_num",
        "citem_num",
        "data",
        "entity_attribute",
    ],
    primary_key: &["vo_id", "num"],
};

pub static COMP_VERSION_TABLE: Table = Table {
    name: "comp_version",
    columns: &[
        "vo_id",
        "ehr_id",
        "template_id",
        "root_concept",
        "sys_version",
        "audit_id",
        "contribution_id",
        "sys_period_lower",
    ],
    primary_key: &["vo_id"],
};

pub static COMP_DATA_TABLE: Table = Table {
    name: "comp_data",
    columns: &[
        "vo_id",
        "num",
        "entity_concept",
        "entity_name",
        "rm_entity",
        "num_cap",
        "parent_num",
        "citem_num",
        "data",
        "entity_attribute",
    ],
    primary_key: &["vo_id", "num"],
};

pub static EHR_FOLDER_VERSION_TABLE: Table = Table {
    name: "ehr_folder_version",
    columns: &[
        "ehr_id",
        "ehr_folders_idx",
        "vo_id",
        "sys_version",
        "audit_id",
        "contribution_id",
        "sys_period_lower",
    ],
    primary_key: &["ehr_id", "ehr_folders_idx"],
};

pub static EHR_FOLDER_DATA_TABLE: Table = Table {
    name: "ehr_folder_data",
    columns: &[
        "ehr_id",
        "ehr_folders_idx",
        "vo_id",
        "num",
        "entity_concept",
        "entity_name",
        "rm_entity",
        "num_cap",
        "parent_num",
        "citem_num",
        "data",
        "entity_attribute",
    ],
    primary_key: &["ehr_id", "ehr_folders_idx", "num"],
};

pub static AUDIT_DETAILS_TABLE: Table = Table {
    name: "audit_details",
    columns: &["id", "description", "change_type"],
    primary_key: &["id"],
};

/// The relation a structure query reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SourceRelation {
    Ehr,
    EhrStatus,
    Composition,
    Folder,
    AuditDetails,
}

impl SourceRelation {
    pub fn from_structure_root(root: StructureRoot) -> Self {
        match root {
            StructureRoot::Composition => SourceRelation::Composition,
            StructureRoot::Folder => SourceRelation::Folder,
            StructureRoot::EhrStatus => SourceRelation::EhrStatus,
        }
    }

    pub fn rm_type(&self) -> &'static str {
        match self {
            SourceRelation::Ehr => EHR,
            SourceRelation::EhrStatus => EHR_STATUS,
            SourceRelation::Composition => COMPOSITION,
            SourceRelation::Folder => FOLDER,
            SourceRelation::AuditDetails => AUDIT_DETAILS,
        }
    }

    pub fn version_table(&self) -> Option<&'static Table> {
        match self {
            SourceRelation::EhrStatus => Some(&EHR_STATUS_VERSION_TABLE),
            SourceRelation::Composition => Some(&COMP_VERSION_TABLE),
            SourceRelation::Folder => Some(&EHR_FOLDER_VERSION_TABLE),
            SourceRelation::Ehr | SourceRelation::AuditDetails => None,
        }
    }

    pub fn data_table(&self) -> &'static Table {
        match self {
            SourceRelation::Ehr => &EHR_TABLE,
            SourceRelation::EhrStatus => &EHR_STATUS_DATA_TABLE,
            SourceRelation::Composition => &COMP_DATA_TABLE,
            SourceRelation::Folder => &EHR_FOLDER_DATA_TABLE,
            SourceRelation::AuditDetails => &AUDIT_DETAILS_TABLE,
        }
    }

    /// Primary key of the versioned object (version table if there is one)
    pub fn pkey_fields(&self) -> &'static [&'static str] {
        self.version_table().unwrap_or(self.data_table()).primary_key
    }
}

/// Columns shared by the version and data tables of the structure relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StructureColumn {
    VoId,
    Num,
    EhrId,
    EhrFoldersIdx,
    EntityConcept,
    EntityName,
    RmEntity,
    TemplateId,
    SysVersion,
    AuditId,
    ContributionId,
    SysPeriodLower,
    NumCap,
    ParentNum,
    CItemNum,
    Data,
}

impl StructureColumn {
    pub const ALL: [StructureColumn; 16] = [
        StructureColumn::VoId,
        StructureColumn::Num,
        StructureColumn::EhrId,
        StructureColumn::EhrFoldersIdx,
        StructureColumn::EntityConcept,
        StructureColumn::EntityName,
        StructureColumn::RmEntity,
        StructureColumn::TemplateId,
        StructureColumn::SysVersion,
        StructureColumn::AuditId,
        StructureColumn::ContributionId,
        StructureColumn::SysPeriodLower,
        StructureColumn::NumCap,
        StructureColumn::ParentNum,
        StructureColumn::CItemNum,
        StructureColumn::Data,
    ];

    pub fn field_name(&self) -> &'static str {
        match self {
            StructureColumn::VoId => "vo_id",
            StructureColumn::Num => "num",
            StructureColumn::EhrId => "ehr_id",
            StructureColumn::EhrFoldersIdx => "ehr_folders_idx",
            StructureColumn::EntityConcept => "entity_concept",
            StructureColumn::EntityName => "entity_name",
            StructureColumn::RmEntity => "rm_entity",
            StructureColumn::TemplateId => "template_id",
            StructureColumn::SysVersion => "sys_version",
            StructureColumn::AuditId => "audit_id",
            StructureColumn::ContributionId => "contribution_id",
            StructureColumn::SysPeriodLower => "sys_period_lower",
            StructureColumn::NumCap => "num_cap",
            StructureColumn::ParentNum => "parent_num",
            StructureColumn::CItemNum => "citem_num",
            StructureColumn::Data => "data",
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            StructureColumn::VoId
            | StructureColumn::EhrId
            | StructureColumn::TemplateId
            | StructureColumn::AuditId
            | StructureColumn::ContributionId => FieldType::Uuid,
            StructureColumn::Num
            | StructureColumn::EhrFoldersIdx
            | StructureColumn::SysVersion
            | StructureColumn::NumCap
            | StructureColumn::ParentNum
            | StructureColumn::CItemNum => FieldType::Integer,
            StructureColumn::SysPeriodLower => FieldType::OffsetDateTime,
            StructureColumn::Data => FieldType::Jsonb,
            StructureColumn::EntityConcept | StructureColumn::EntityName | StructureColumn::RmEntity => {
                FieldType::String
            }
        }
    }

    pub fn is_from_version_table(&self) -> bool {
        matches!(
            self,
            StructureColumn::VoId
                | StructureColumn::EhrId
                | StructureColumn::EhrFoldersIdx
                | StructureColumn::TemplateId
                | StructureColumn::SysVersion
                | StructureColumn::AuditId
                | StructureColumn::ContributionId
                | StructureColumn::SysPeriodLower
        )
    }

    pub fn is_from_data_table(&self) -> bool {
        !matches!(
            self,
            StructureColumn::TemplateId
                | StructureColumn::SysVersion
                | StructureColumn::AuditId
                | StructureColumn::ContributionId
                | StructureColumn::SysPeriodLower
        )
    }

    /// Column field without owner binding
    pub fn field(&self, source: FieldSource, version_table_field: bool) -> ColumnField {
        ColumnField::new(source, self.field_name(), self.field_type()).in_version_table(version_table_field)
    }
}

// ============================================================================
// Joins
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JoinType {
    Join,
    LeftOuterJoin,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AslJoinCondition {
    /// A plain condition
    Delegating(AslCondition),
    /// A path predicate of the left owner that only applies to some paths
    PathFilter {
        left_owner: QueryId,
        left_provider: QueryId,
        condition: AslCondition,
    },
    /// Composition referenced by a folder item
    FolderItem {
        left_owner: QueryId,
        left_provider: QueryId,
        right_owner: QueryId,
        right_provider: QueryId,
    },
}

impl AslJoinCondition {
    pub fn path_filter(owner: QueryId, condition: AslCondition) -> Self {
        AslJoinCondition::PathFilter {
            left_owner: owner,
            left_provider: owner,
            condition,
        }
    }

    /// Address the left side through `provider`
    pub fn with_left_provider(&self, provider: QueryId) -> Self {
        match self {
            AslJoinCondition::Delegating(c) => AslJoinCondition::Delegating(c.clone()),
            AslJoinCondition::PathFilter {
                left_owner, condition, ..
            } => AslJoinCondition::PathFilter {
                left_owner: *left_owner,
                left_provider: provider,
                condition: condition.clone(),
            },
            AslJoinCondition::FolderItem {
                left_owner,
                right_owner,
                right_provider,
                ..
            } => AslJoinCondition::FolderItem {
                left_owner: *left_owner,
                left_provider: provider,
                right_owner: *right_owner,
                right_provider: *right_provider,
            },
        }
    }

    /// The wrapped condition, if any
    pub fn condition(&self) -> Option<&AslCondition> {
        match self {
            AslJoinCondition::Delegating(c) => Some(c),
            AslJoinCondition::PathFilter { condition, .. } => Some(condition),
            AslJoinCondition::FolderItem { .. } => None,
        }
    }
}

/// Join of `right` to the query rows provided by `left`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AslJoin {
    pub left: QueryId,
    pub join_type: JoinType,
    pub right: QueryId,
    pub on: Vec<AslJoinCondition>,
}

impl AslJoin {
    pub fn new(left: QueryId, join_type: JoinType, right: QueryId, on: Vec<AslJoinCondition>) -> Self {
        Self {
            left,
            join_type,
            right,
            on,
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// A child of a container query; the first child has no join
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AslChild {
    pub query: QueryId,
    pub join: Option<AslJoin>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ContainerQuery {
    pub children: Vec<AslChild>,
}

/// Rows of one physical relation, restricted to a set of RM types
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureQuery {
    pub relation: SourceRelation,
    pub fields: Vec<AslField>,
    pub rm_types: Vec<String>,
    pub requires_version_table_join: bool,
    pub represents_original_version_expression: bool,
    /// Restricted to the root entity (`num = 0`) of the versioned object
    pub is_root: bool,
    /// Path predicates not folded into the join, keyed by the path they apply to
    #[serde(with = "indexmap::map::serde_seq")]
    pub join_conditions_for_filtering: IndexMap<IdentifiedPath, AslJoinCondition>,
}

/// A projection into the JSON data of `base`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathDataQuery {
    pub base: QueryId,
    pub base_provider: QueryId,
    pub path_in_json: Vec<PathNode>,
    /// Elements of a JSON array are unnested into rows
    pub multiple_valued: bool,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub dv_ordered_types: BTreeSet<String>,
    pub field_type: FieldType,
}

/// The RM object of a structure row, assembled from all its descendant rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RmObjectDataQuery {
    pub base: QueryId,
    pub base_provider: QueryId,
}

/// Re-applies path filters to a field after the fact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteringQuery {
    pub source_field: AslField,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QueryKind {
    Root(ContainerQuery),
    Encapsulating(ContainerQuery),
    Structure(StructureQuery),
    PathData(PathDataQuery),
    RmObjectData(RmObjectDataQuery),
    Filtering(FilteringQuery),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AslQuery {
    pub alias: String,
    pub condition: Option<AslCondition>,
    /// Conditions restricting structure rows (RM type, attribute)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub structure_conditions: Vec<AslCondition>,
    pub kind: QueryKind,
}

impl AslQuery {
    pub fn new(alias: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            alias: alias.into(),
            condition: None,
            structure_conditions: Vec::new(),
            kind,
        }
    }

    pub fn add_condition_and(&mut self, condition: AslCondition) {
        self.condition = Some(match self.condition.take() {
            None => condition,
            Some(AslCondition::And(mut operands)) => {
                operands.push(condition);
                AslCondition::And(operands)
            }
            Some(existing) => AslCondition::And(vec![existing, condition]),
        });
    }

    pub fn add_condition_or(&mut self, condition: AslCondition) {
        self.condition = Some(match self.condition.take() {
            None => condition,
            Some(AslCondition::Or(mut operands)) => {
                operands.push(condition);
                AslCondition::Or(operands)
            }
            Some(existing) => AslCondition::Or(vec![existing, condition]),
        });
    }

    pub fn container(&self) -> Option<&ContainerQuery> {
        match &self.kind {
            QueryKind::Root(c) | QueryKind::Encapsulating(c) => Some(c),
            _ => None,
        }
    }

    pub fn structure(&self) -> Option<&StructureQuery> {
        match &self.kind {
            QueryKind::Structure(s) => Some(s),
            _ => None,
        }
    }

    pub fn structure_mut(&mut self) -> Option<&mut StructureQuery> {
        match &mut self.kind {
            QueryKind::Structure(s) => Some(s),
            _ => None,
        }
    }
}

/// An ORDER BY item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AslOrderByField {
    pub field: AslField,
    pub direction: SortDirection,
    /// The ordering is evaluated after grouping
    pub group_by_scoped: bool,
}

// ============================================================================
// The arena
// ============================================================================

/// The compiled statement: the query arena plus the statement clauses of the root
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AslRootQuery {
    queries: Vec<AslQuery>,
    pub select: Vec<AslField>,
    pub group_by: Vec<AslField>,
    pub order_by: Vec<AslOrderByField>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Default for AslRootQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl AslRootQuery {
    /// An arena holding only the empty root query
    pub fn new() -> Self {
        Self {
            queries: vec![AslQuery::new("root", QueryKind::Root(ContainerQuery::default()))],
            select: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn queries(&self) -> &[AslQuery] {
        &self.queries
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.len() <= 1
    }

    pub fn query(&self, id: QueryId) -> &AslQuery {
        &self.queries[id.0]
    }

    pub fn query_mut(&mut self, id: QueryId) -> &mut AslQuery {
        &mut self.queries[id.0]
    }

    pub fn push(&mut self, query: AslQuery) -> QueryId {
        self.queries.push(query);
        QueryId(self.queries.len() - 1)
    }

    /// Push a query whose fields need to know its own id
    pub fn push_with(&mut self, build: impl FnOnce(QueryId) -> Result<AslQuery>) -> Result<QueryId> {
        let id = QueryId(self.queries.len());
        let query = build(id)?;
        Ok(self.push(query))
    }

    pub fn structure(&self, id: QueryId) -> Option<&StructureQuery> {
        self.query(id).structure()
    }

    pub fn children(&self, id: QueryId) -> &[AslChild] {
        self.query(id).container().map(|c| c.children.as_slice()).unwrap_or_default()
    }

    /// Append `child` to a root or encapsulating query
    pub fn add_child(&mut self, container: QueryId, child: QueryId, join: Option<AslJoin>) -> Result<()> {
        let alias = self.query(container).alias.clone();
        match &mut self.query_mut(container).kind {
            QueryKind::Root(c) | QueryKind::Encapsulating(c) => {
                c.children.push(AslChild { query: child, join });
                Ok(())
            }
            _ => Err(AqlError::unsupported(
                ASL0009,
                format!("Query {alias} cannot have children"),
            )),
        }
    }

    /// The fields a query exposes to its parent scope
    pub fn select(&self, id: QueryId) -> Vec<AslField> {
        let query = self.query(id);
        match &query.kind {
            QueryKind::Root(_) => self.select.clone(),
            QueryKind::Encapsulating(c) => c
                .children
                .iter()
                .flat_map(|child| self.select(child.query))
                .map(|f| f.with_provider(id))
                .collect(),
            QueryKind::Structure(s) => s.fields.clone(),
            QueryKind::PathData(pd) => vec![
                ColumnField::new(FieldSource::with_owner(id), "data", pd.field_type)
                    .with_dv_ordered_types(pd.dv_ordered_types.clone())
                    .into(),
            ],
            QueryKind::RmObjectData(_) => vec![AslField::column(FieldSource::with_owner(id), "data", FieldType::Jsonb)],
            QueryKind::Filtering(f) => vec![f.source_field.with_provider(id)],
        }
    }

    /// Fields exposed by the children of the root query
    pub fn available_fields(&self) -> Vec<AslField> {
        self.children(QueryId::ROOT)
            .iter()
            .flat_map(|child| self.select(child.query))
            .collect()
    }

    /// The deferred path filter of a structure query for `path`
    pub fn join_condition_for_filtering(&self, id: QueryId, path: &IdentifiedPath) -> Option<&AslJoinCondition> {
        self.structure(id)
            .and_then(|s| s.join_conditions_for_filtering.get(path))
    }
}
