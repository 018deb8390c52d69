//! Fields of the query tree
//!
//! Every field knows the query that defines it (the owner) and the query through which
//! the current scope addresses it (the provider). Rebinding a field into an enclosing
//! scope changes the provider and keeps the owner.

use crate::{AslExtractedColumn, AslJoinCondition, QueryId};
use openehr_aql_ast::{AggregateFunction, PathNode, Primitive};
use serde::Serialize;
use std::collections::BTreeSet;

/// SQL-level type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FieldType {
    Uuid,
    Integer,
    Long,
    String,
    Decimal,
    Boolean,
    OffsetDateTime,
    Jsonb,
}

impl FieldType {
    /// Whether a literal can be compared with a field of this type without coercion
    pub fn accepts(&self, value: &Primitive) -> bool {
        match self {
            FieldType::Jsonb => true,
            FieldType::String | FieldType::Uuid => {
                matches!(value, Primitive::String(_) | Primitive::Temporal(_))
            }
            FieldType::Integer | FieldType::Long => matches!(value, Primitive::Long(_)),
            FieldType::Decimal => matches!(value, Primitive::Decimal(_)),
            FieldType::Boolean => matches!(value, Primitive::Boolean(_)),
            FieldType::OffsetDateTime => false,
        }
    }

    /// Types a LIKE pattern can be applied to
    pub fn supports_like(&self) -> bool {
        matches!(self, FieldType::Jsonb | FieldType::String | FieldType::Uuid)
    }
}

/// Owner, internal provider and provider of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FieldSource {
    /// The query defining the field
    pub owner: QueryId,
    /// The provider one scope below `provider`
    pub internal_provider: QueryId,
    /// The query through which the field is addressed
    pub provider: QueryId,
}

impl FieldSource {
    pub fn new(owner: QueryId, internal_provider: QueryId, provider: QueryId) -> Self {
        Self {
            owner,
            internal_provider,
            provider,
        }
    }

    /// A field addressed directly through its owner
    pub fn with_owner(owner: QueryId) -> Self {
        Self::new(owner, owner, owner)
    }

    /// Rebind into the scope of `provider`
    pub fn with_provider(self, provider: QueryId) -> Self {
        Self {
            owner: self.owner,
            internal_provider: self.provider,
            provider,
        }
    }
}

/// A physical column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnField {
    pub source: FieldSource,
    pub column_name: String,
    pub field_type: FieldType,
    /// The column is read from the version table of the owner
    pub version_table_field: bool,
    pub extracted_column: Option<AslExtractedColumn>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub dv_ordered_types: BTreeSet<String>,
}

impl ColumnField {
    pub fn new(source: FieldSource, column_name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            source,
            column_name: column_name.into(),
            field_type,
            version_table_field: false,
            extracted_column: None,
            dv_ordered_types: BTreeSet::new(),
        }
    }

    pub fn in_version_table(mut self, version_table_field: bool) -> Self {
        self.version_table_field = version_table_field;
        self
    }

    pub fn with_extracted_column(mut self, extracted_column: AslExtractedColumn) -> Self {
        self.extracted_column = Some(extracted_column);
        self
    }

    pub fn with_dv_ordered_types(mut self, dv_ordered_types: BTreeSet<String>) -> Self {
        self.dv_ordered_types = dv_ordered_types;
        self
    }
}

/// A projection into the JSON document of a column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RmPathField {
    pub source: FieldSource,
    pub src_field: ColumnField,
    pub path_in_json: Vec<PathNode>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub dv_ordered_types: BTreeSet<String>,
    pub field_type: FieldType,
}

/// An aggregate function applied to a field; `COUNT(*)` has no base field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatingField {
    pub function: AggregateFunction,
    pub base_field: Option<Box<AslField>>,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConstantValue {
    String(String),
    Integer(i32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstantField {
    pub source: Option<FieldSource>,
    pub value: ConstantValue,
    pub extracted_column: Option<AslExtractedColumn>,
}

/// A value composed from several columns, e.g. the archetype node id from RM type and concept
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexExtractedColumnField {
    pub source: FieldSource,
    pub extracted_column: AslExtractedColumn,
}

/// A correlated scalar subquery producing a value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubqueryField {
    pub source: FieldSource,
    pub base_query: QueryId,
    pub filter_conditions: Vec<AslJoinCondition>,
    pub field_type: FieldType,
}

/// The ids of the compositions a folder refers to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderItemIdVirtualField {
    pub source: FieldSource,
    pub field_name: String,
}

/// Name of the virtual folder item id column
pub const FOLDER_ITEM_ID_FIELD: &str = "items_id_value";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AslField {
    Column(ColumnField),
    RmPath(RmPathField),
    Aggregating(AggregatingField),
    Constant(ConstantField),
    ComplexExtractedColumn(ComplexExtractedColumnField),
    Subquery(SubqueryField),
    FolderItemIdVirtual(FolderItemIdVirtualField),
}

impl AslField {
    /// A column without extracted column tag
    pub fn column(source: FieldSource, column_name: impl Into<String>, field_type: FieldType) -> Self {
        AslField::Column(ColumnField::new(source, column_name, field_type))
    }

    pub fn vo_id(source: FieldSource) -> Self {
        AslField::ComplexExtractedColumn(ComplexExtractedColumnField {
            source,
            extracted_column: AslExtractedColumn::VoId,
        })
    }

    pub fn archetype_node_id(source: FieldSource) -> Self {
        AslField::ComplexExtractedColumn(ComplexExtractedColumnField {
            source,
            extracted_column: AslExtractedColumn::ArchetypeNodeId,
        })
    }

    pub fn source(&self) -> Option<&FieldSource> {
        match self {
            AslField::Column(f) => Some(&f.source),
            AslField::RmPath(f) => Some(&f.source),
            AslField::Aggregating(f) => f.base_field.as_ref().and_then(|b| b.source()),
            AslField::Constant(f) => f.source.as_ref(),
            AslField::ComplexExtractedColumn(f) => Some(&f.source),
            AslField::Subquery(f) => Some(&f.source),
            AslField::FolderItemIdVirtual(f) => Some(&f.source),
        }
    }

    pub fn owner(&self) -> Option<QueryId> {
        self.source().map(|s| s.owner)
    }

    pub fn provider(&self) -> Option<QueryId> {
        self.source().map(|s| s.provider)
    }

    pub fn internal_provider(&self) -> Option<QueryId> {
        self.source().map(|s| s.internal_provider)
    }

    /// The same field addressed through `provider`
    pub fn with_provider(&self, provider: QueryId) -> AslField {
        let mut field = self.clone();
        match &mut field {
            AslField::Column(f) => f.source = f.source.with_provider(provider),
            AslField::RmPath(f) => f.source = f.source.with_provider(provider),
            AslField::Aggregating(f) => {
                if let Some(base) = f.base_field.take() {
                    f.base_field = Some(Box::new(base.with_provider(provider)));
                }
            }
            AslField::Constant(f) => f.source = f.source.map(|s| s.with_provider(provider)),
            AslField::ComplexExtractedColumn(f) => f.source = f.source.with_provider(provider),
            AslField::Subquery(f) => f.source = f.source.with_provider(provider),
            AslField::FolderItemIdVirtual(f) => f.source = f.source.with_provider(provider),
        }
        field
    }

    pub fn extracted_column(&self) -> Option<AslExtractedColumn> {
        match self {
            AslField::Column(f) => f.extracted_column,
            AslField::Constant(f) => f.extracted_column,
            AslField::ComplexExtractedColumn(f) => Some(f.extracted_column),
            AslField::FolderItemIdVirtual(_) => Some(AslExtractedColumn::FolderItemId),
            AslField::RmPath(_) | AslField::Aggregating(_) | AslField::Subquery(_) => None,
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            AslField::Column(f) => f.field_type,
            AslField::RmPath(f) => f.field_type,
            AslField::Aggregating(f) => match (f.function, &f.base_field) {
                (AggregateFunction::Count, _) | (_, None) => FieldType::Long,
                (_, Some(base)) => base.field_type(),
            },
            AslField::Constant(f) => match f.value {
                ConstantValue::String(_) => FieldType::String,
                ConstantValue::Integer(_) => FieldType::Integer,
            },
            AslField::ComplexExtractedColumn(_) => FieldType::String,
            AslField::Subquery(f) => f.field_type,
            AslField::FolderItemIdVirtual(_) => FieldType::Uuid,
        }
    }

    /// Ordered value types the field may hold; empty if the field is not type-ambiguous
    pub fn dv_ordered_types(&self) -> Option<&BTreeSet<String>> {
        let types = match self {
            AslField::Column(f) => &f.dv_ordered_types,
            AslField::RmPath(f) => &f.dv_ordered_types,
            _ => return None,
        };
        (!types.is_empty()).then_some(types)
    }

    /// Name of a plain column field
    pub fn column_name(&self) -> Option<&str> {
        match self {
            AslField::Column(f) => Some(&f.column_name),
            _ => None,
        }
    }

    /// The atomic fields to group by when this field is selected next to an aggregate
    pub fn fields_for_aggregation(&self) -> Vec<AslField> {
        match self {
            AslField::ComplexExtractedColumn(f) => f
                .extracted_column
                .columns()
                .iter()
                .map(|c| AslField::column(f.source, *c, FieldType::String))
                .collect(),
            AslField::Aggregating(_) => Vec::new(),
            other => vec![other.clone()],
        }
    }
}

impl From<ColumnField> for AslField {
    fn from(f: ColumnField) -> Self {
        AslField::Column(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn q(n: usize) -> QueryId {
        QueryId(n)
    }

    #[test]
    fn test_rebinding_keeps_owner() {
        let field = AslField::column(FieldSource::with_owner(q(3)), "vo_id", FieldType::Uuid);
        let outer = field.with_provider(q(2)).with_provider(QueryId::ROOT);
        let source = outer.source().unwrap();
        assert_eq!(source.owner, q(3));
        assert_eq!(source.internal_provider, q(2));
        assert_eq!(source.provider, QueryId::ROOT);
    }

    #[test]
    fn test_count_star_has_no_owner() {
        let count = AslField::Aggregating(AggregatingField {
            function: AggregateFunction::Count,
            base_field: None,
            distinct: false,
        });
        assert_eq!(count.owner(), None);
        assert_eq!(count.field_type(), FieldType::Long);
        assert_eq!(count.with_provider(q(1)), count);
    }

    #[test]
    fn test_complex_column_decomposes_for_grouping() {
        let field = AslField::archetype_node_id(FieldSource::with_owner(q(1)));
        let names: Vec<_> = field
            .fields_for_aggregation()
            .iter()
            .filter_map(|f| f.column_name().map(str::to_string))
            .collect();
        assert_eq!(names, vec!["rm_entity", "entity_concept"]);
    }

    #[rstest]
    #[case(FieldType::Jsonb, Primitive::Long(1), true)]
    #[case(FieldType::Uuid, Primitive::string("a"), true)]
    #[case(FieldType::String, Primitive::Long(1), false)]
    #[case(FieldType::Long, Primitive::Long(1), true)]
    #[case(FieldType::Boolean, Primitive::string("true"), false)]
    fn test_accepts(#[case] field_type: FieldType, #[case] value: Primitive, #[case] expected: bool) {
        assert_eq!(field_type.accepts(&value), expected);
    }
}
