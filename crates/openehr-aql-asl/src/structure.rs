//! Structure queries and the join conditions between them

use crate::condition::{
    archetype_node_id_condition_values, condition_value, root_concept_condition_values,
    template_id_condition_values,
};
use crate::{
    AslCondition, AslConditionOperator, AslExtractedColumn, AslField, AslJoinCondition, AslQuery, AslRootQuery,
    AslValue, ConstantField, ConstantValue, FieldSource, FieldType, QueryId, QueryKind, SourceRelation,
    StructureColumn, StructureQuery,
};
use indexmap::IndexMap;
use openehr_aql_ast::ComparisonOperatorPredicate;
use openehr_aql_diagnostics::{ASL0004, ASL0005, ASL0009, ASL0101, AqlError, Result};
use openehr_aql_model::{EHR, MetadataResolver, StructureRmType, attribute_alias, non_locatable_structure_aliases};

/// Column holding the attribute a structure row is stored under
pub const ENTITY_ATTRIBUTE: &str = "entity_attribute";

/// Primary key column of the `ehr` table
pub const EHR_ID_COLUMN: &str = "id";

/// Everything needed to create a structure query once its id is known
#[derive(Debug, Clone)]
pub struct StructureQueryDef {
    pub alias: String,
    pub relation: SourceRelation,
    /// Fields, already owned by the query being built
    pub fields: Vec<AslField>,
    pub rm_types: Vec<String>,
    /// RM types the rows are restricted to; empty for no restriction
    pub rm_types_constraint: Vec<String>,
    /// Attribute of the parent the rows must be stored under
    pub attribute: Option<String>,
    pub requires_version_table_join: bool,
    /// Built for a `VERSION` containment
    pub represents_original_version_expression: bool,
    pub is_root: bool,
}

impl StructureQueryDef {
    /// Build the query with id `id`, deriving the structure conditions
    pub fn build(self, id: QueryId) -> Result<AslQuery> {
        let mut structure_conditions = Vec::new();
        if !matches!(self.relation, SourceRelation::Ehr | SourceRelation::AuditDetails) {
            let non_locatable: Vec<&str> = non_locatable_structure_aliases().collect();
            if !self.rm_types.is_empty()
                && self
                    .rm_types
                    .iter()
                    .all(|t| non_locatable.contains(&StructureRmType::alias_or_type_name(t)))
            {
                structure_conditions.push(AslCondition::field_value(
                    find_field_for_owner(StructureColumn::EntityConcept.field_name(), &self.fields, id)?,
                    AslConditionOperator::IsNull,
                    Vec::new(),
                ));
            }
            if !self.rm_types_constraint.is_empty() {
                let aliased = self
                    .rm_types_constraint
                    .iter()
                    .map(|t| AslValue::String(StructureRmType::alias_or_type_name(t).to_string()))
                    .collect();
                structure_conditions.push(AslCondition::field_value(
                    find_field_for_owner(StructureColumn::RmEntity.field_name(), &self.fields, id)?,
                    AslConditionOperator::In,
                    aliased,
                ));
            }
            if let Some(attribute) = self.attribute.as_deref().filter(|a| !a.trim().is_empty()) {
                structure_conditions.push(AslCondition::field_value(
                    AslField::column(FieldSource::with_owner(id), ENTITY_ATTRIBUTE, FieldType::String),
                    AslConditionOperator::Eq,
                    vec![AslValue::String(attribute_alias(attribute).to_string())],
                ));
            }
        }

        let mut query = AslQuery::new(
            self.alias,
            QueryKind::Structure(StructureQuery {
                relation: self.relation,
                fields: self.fields,
                rm_types: self.rm_types,
                requires_version_table_join: self.requires_version_table_join,
                represents_original_version_expression: self.represents_original_version_expression,
                is_root: self.is_root,
                join_conditions_for_filtering: IndexMap::new(),
            }),
        );
        query.structure_conditions = structure_conditions;
        Ok(query)
    }
}

/// The first column field named `name` that is owned by `owner`
pub fn find_field_for_owner(name: &str, fields: &[AslField], owner: QueryId) -> Result<AslField> {
    fields
        .iter()
        .find(|f| matches!(f, AslField::Column(c) if c.source.owner == owner && c.column_name == name))
        .cloned()
        .ok_or_else(|| {
            AqlError::unresolved(
                ASL0101,
                format!("Field '{name}' does not exist for owner '{owner}'"),
                name,
            )
        })
}

/// [`find_field_for_owner`] over the fields `provider` exposes
pub fn provided_field(root: &AslRootQuery, provider: QueryId, owner: QueryId, name: &str) -> Result<AslField> {
    find_field_for_owner(name, &root.select(provider), owner)
}

pub(crate) fn structure_of(root: &AslRootQuery, id: QueryId) -> Result<&StructureQuery> {
    root.structure(id).ok_or_else(|| {
        AqlError::unsupported(
            ASL0009,
            format!("Query {} is no structure query", root.query(id).alias),
        )
    })
}

/// Condition of a containment predicate such as `[openEHR-EHR-COMPOSITION.report.v1]`
pub fn structure_predicate_condition(
    predicate: &ComparisonOperatorPredicate,
    id: QueryId,
    query: &StructureQuery,
    metadata: &dyn MetadataResolver,
) -> Result<AslCondition> {
    let candidates: Vec<&str> = if query.rm_types.is_empty() && query.relation == SourceRelation::Ehr {
        vec![EHR]
    } else {
        query.rm_types.iter().map(String::as_str).collect()
    };
    let unsupported = || {
        AqlError::unsupported(
            ASL0005,
            format!("Unsupported predicate {predicate} on {}", query.relation.rm_type()),
        )
    };
    let extracted_column = candidates
        .first()
        .and_then(|first| AslExtractedColumn::find(first, &predicate.path))
        .filter(|ec| candidates.iter().all(|t| ec.allows(t)))
        .ok_or_else(unsupported)?;

    let operator = predicate.operator;
    let values = std::slice::from_ref(&predicate.value);
    let source = FieldSource::with_owner(id);
    let (field, values) = match extracted_column {
        AslExtractedColumn::NameValue => (
            find_field_for_owner(StructureColumn::EntityName.field_name(), &query.fields, id)?,
            condition_value(values, operator, FieldType::String)?,
        ),
        AslExtractedColumn::VoId => (AslField::vo_id(source), condition_value(values, operator, FieldType::String)?),
        AslExtractedColumn::EhrId => (
            find_field_for_owner(EHR_ID_COLUMN, &query.fields, id)?,
            condition_value(values, operator, FieldType::String)?,
        ),
        AslExtractedColumn::ArchetypeNodeId => (
            AslField::archetype_node_id(source),
            archetype_node_id_condition_values(values, operator)?,
        ),
        AslExtractedColumn::RootConcept => (
            find_field_for_owner("root_concept", &query.fields, id)?,
            root_concept_condition_values(values, operator)?,
        ),
        AslExtractedColumn::TemplateId => (
            find_field_for_owner(StructureColumn::TemplateId.field_name(), &query.fields, id)?,
            template_id_condition_values(values, operator, metadata)?,
        ),
        _ => return Err(unsupported()),
    };

    let operator = AslConditionOperator::from(operator);
    if values.is_empty() {
        return empty_values_condition(operator);
    }
    Ok(AslCondition::field_value(field, operator, values))
}

/// Sentinel for a comparison whose operands all got lost during coercion
pub fn empty_values_condition(operator: AslConditionOperator) -> Result<AslCondition> {
    match operator {
        AslConditionOperator::In | AslConditionOperator::Eq | AslConditionOperator::Like => Ok(AslCondition::False),
        AslConditionOperator::Neq => Ok(AslCondition::True),
        other => Err(AqlError::unsupported(
            ASL0005,
            format!("Unexpected operator {other:?} without values"),
        )),
    }
}

// ============================================================================
// Join conditions
// ============================================================================

struct JoinSides<'a> {
    root: &'a AslRootQuery,
    left_select: Vec<AslField>,
    left_owner: QueryId,
    right_select: Vec<AslField>,
    right_owner: QueryId,
}

impl<'a> JoinSides<'a> {
    fn new(root: &'a AslRootQuery, left: QueryId, left_owner: QueryId, right: QueryId, right_owner: QueryId) -> Self {
        Self {
            root,
            left_select: root.select(left),
            left_owner,
            right_select: root.select(right),
            right_owner,
        }
    }

    fn left(&self, name: &str) -> Result<AslField> {
        find_field_for_owner(name, &self.left_select, self.left_owner)
    }

    fn right(&self, name: &str) -> Result<AslField> {
        find_field_for_owner(name, &self.right_select, self.right_owner)
    }

    fn column_eq(&self, column: StructureColumn) -> Result<AslJoinCondition> {
        self.columns_eq(column.field_name(), column.field_name())
    }

    fn columns_eq(&self, left: &str, right: &str) -> Result<AslJoinCondition> {
        Ok(AslJoinCondition::Delegating(AslCondition::field_field(
            self.left(left)?,
            AslConditionOperator::Eq,
            self.right(right)?,
        )))
    }

    /// `l.num < r.num <= l.num_cap`, unless the left side is a root entity
    fn num_cap_between(&self, left_is_root: bool) -> Result<Vec<AslJoinCondition>> {
        if left_is_root {
            return Ok(Vec::new());
        }
        let num = StructureColumn::Num.field_name();
        Ok(vec![
            AslJoinCondition::Delegating(AslCondition::field_field(
                self.left(num)?,
                AslConditionOperator::Lt,
                self.right(num)?,
            )),
            AslJoinCondition::Delegating(AslCondition::field_field(
                self.left(StructureColumn::NumCap.field_name())?,
                AslConditionOperator::GtEq,
                self.right(num)?,
            )),
        ])
    }

    fn relations(&self) -> Result<(&'a StructureQuery, &'a StructureQuery)> {
        Ok((
            structure_of(self.root, self.left_owner)?,
            structure_of(self.root, self.right_owner)?,
        ))
    }
}

fn unexpected_relation(role: &str, relation: SourceRelation) -> AqlError {
    AqlError::unsupported(
        ASL0004,
        format!("Unexpected {role} relation {}", relation.rm_type()),
    )
}

fn is_versioned_structure(relation: SourceRelation) -> bool {
    matches!(
        relation,
        SourceRelation::Composition | SourceRelation::EhrStatus | SourceRelation::Folder
    )
}

/// Conditions joining the rows of `right` contained somewhere below the rows of `left`.
///
/// `left`/`right` are the queries the fields are addressed through, the owners are the
/// structure queries defining them.
pub fn descendant_join_conditions(
    root: &AslRootQuery,
    left: QueryId,
    left_owner: QueryId,
    right: QueryId,
    right_owner: QueryId,
) -> Result<Vec<AslJoinCondition>> {
    let sides = JoinSides::new(root, left, left_owner, right, right_owner);
    let (parent, descendant) = sides.relations()?;
    if !is_versioned_structure(descendant.relation) {
        return Err(unexpected_relation("descendant", descendant.relation));
    }

    let mut conditions = match parent.relation {
        SourceRelation::Ehr => vec![sides.columns_eq(EHR_ID_COLUMN, StructureColumn::EhrId.field_name())?],
        SourceRelation::EhrStatus => vec![sides.column_eq(StructureColumn::EhrId)?],
        SourceRelation::Composition => vec![sides.column_eq(StructureColumn::VoId)?],
        SourceRelation::Folder => vec![
            sides.column_eq(StructureColumn::EhrId)?,
            sides.column_eq(StructureColumn::EhrFoldersIdx)?,
        ],
        SourceRelation::AuditDetails => return Err(unexpected_relation("parent", parent.relation)),
    };
    if parent.relation != SourceRelation::Ehr {
        conditions.extend(sides.num_cap_between(parent.is_root)?);
    }
    Ok(conditions)
}

/// Conditions joining the direct children (`right`) of the rows of `left` along a path
pub fn path_child_conditions(
    root: &AslRootQuery,
    left: QueryId,
    left_owner: QueryId,
    right: QueryId,
    right_owner: QueryId,
) -> Result<Vec<AslJoinCondition>> {
    let sides = JoinSides::new(root, left, left_owner, right, right_owner);
    let (parent, child) = sides.relations()?;
    if !is_versioned_structure(parent.relation) {
        return Err(unexpected_relation("parent", parent.relation));
    }
    if !is_versioned_structure(child.relation) {
        return Err(unexpected_relation("child", child.relation));
    }

    let mut conditions = match parent.relation {
        SourceRelation::Folder => vec![
            sides.column_eq(StructureColumn::EhrId)?,
            sides.column_eq(StructureColumn::EhrFoldersIdx)?,
        ],
        SourceRelation::EhrStatus => vec![sides.column_eq(StructureColumn::EhrId)?],
        _ => vec![sides.column_eq(StructureColumn::VoId)?],
    };

    let parent_num = StructureColumn::ParentNum.field_name();
    conditions.push(if parent.is_root {
        AslJoinCondition::Delegating(AslCondition::field_field(
            sides.right(parent_num)?,
            AslConditionOperator::Eq,
            AslField::Constant(ConstantField {
                source: None,
                value: ConstantValue::Integer(0),
                extracted_column: None,
            }),
        ))
    } else {
        sides.columns_eq(StructureColumn::Num.field_name(), parent_num)?
    });
    Ok(conditions)
}
