//! Translation of an analyzed AQL query into the query tree
//!
//! FROM and the path queries are built first; SELECT, WHERE and ORDER BY then refer to
//! the fields the path compiler resolved for each identified path.

use crate::condition::{
    ReduceOperator, archetype_node_id_condition_values, condition_value, reduce, root_concept_condition_values,
    template_id_condition_values,
};
use crate::ordered::ordered_value_condition;
use crate::structure::empty_values_condition;
use crate::temporal::to_offset_date_time;
use crate::{
    AggregatingField, AliasProvider, AslCondition, AslConditionOperator, AslExtractedColumn, AslField,
    AslOrderByField, AslRootQuery, AslValue, ContainsMap, FromCompiler, PathCompiler, PathFieldMap, QueryId,
    StructureColumn, owner_provider,
};
use log::{debug, trace};
use openehr_aql_ast::{
    AggregateFunction, AqlQueryWrapper, ComparisonCondition, ComparisonOperator, ConditionWrapper, IdentifiedPath,
    LogicalOperator, Primitive, SelectWrapper,
};
use openehr_aql_diagnostics::{ASL0007, ASL0009, ASL0100, ASL0103, AqlError, Result};
use openehr_aql_model::{ContributionChangeType, MetadataResolver};

/// Builds the query tree of one AQL query
pub struct AqlSqlLayer<'a> {
    metadata: &'a dyn MetadataResolver,
    system_id: &'a str,
}

impl<'a> AqlSqlLayer<'a> {
    pub fn new(metadata: &'a dyn MetadataResolver, system_id: &'a str) -> Self {
        Self { metadata, system_id }
    }

    /// Compile `query`.
    ///
    /// Every call starts with fresh aliases, so compiling the same query twice yields
    /// identical trees.
    pub fn build_asl_root_query(&self, query: &AqlQueryWrapper) -> Result<AslRootQuery> {
        let mut aliases = AliasProvider::new();
        let mut root = AslRootQuery::new();

        let contains = FromCompiler::new(&mut aliases, self.metadata).add_from_clause(&mut root, query)?;
        let fields =
            PathCompiler::new(&mut aliases, self.metadata, self.system_id).add_path_queries(&mut root, query, &contains)?;
        trace!("Resolved {} paths into {} queries", fields.len(), root.len());

        if query.non_primitive_selects().next().is_none() {
            add_synthetic_select(&mut root, query, &contains)?;
        } else {
            let aggregating = add_select(&mut root, query, &fields)?;
            add_order_by(&mut root, query, &fields, aggregating)?;
        }

        if let Some(condition) = &query.where_condition {
            if let Some(condition) = self.where_condition(condition, &fields)? {
                root.query_mut(QueryId::ROOT).add_condition_and(condition);
            }
        }

        root.limit = query.limit;
        root.offset = query.offset;
        debug!(
            "Built query tree with {} queries, {} selects and {} group by fields",
            root.len(),
            root.select.len(),
            root.group_by.len()
        );
        Ok(root)
    }

    // ========================================================================
    // WHERE
    // ========================================================================

    fn where_condition(&self, condition: &ConditionWrapper, fields: &PathFieldMap) -> Result<Option<AslCondition>> {
        match condition {
            ConditionWrapper::Logical { operator, operands } => {
                let mut translated = Vec::with_capacity(operands.len());
                for operand in operands {
                    translated.extend(self.where_condition(operand, fields)?);
                }
                Ok(match operator {
                    LogicalOperator::And => reduce(ReduceOperator::And, translated),
                    LogicalOperator::Or => reduce(ReduceOperator::Or, translated),
                    LogicalOperator::Not => translated
                        .into_iter()
                        .next()
                        .map(|c| AslCondition::Not(Box::new(c))),
                })
            }
            ConditionWrapper::Comparison(comparison) => {
                let field = field_of(fields, &comparison.left)?;
                match field.dv_ordered_types() {
                    Some(types) => {
                        ordered_value_condition(field, types, comparison.operator, &comparison.right).map(Some)
                    }
                    None => self.field_value_condition(field, comparison).map(Some),
                }
            }
        }
    }

    fn field_value_condition(&self, field: &AslField, comparison: &ComparisonCondition) -> Result<AslCondition> {
        let operator = comparison.operator;
        if operator == ComparisonOperator::Exists {
            // extracted columns are never absent
            return Ok(if field.extracted_column().is_some() {
                AslCondition::True
            } else {
                AslCondition::NotNull(field.clone())
            });
        }

        let values = self.where_condition_values(field, comparison)?;
        let operator = AslConditionOperator::from(operator);
        if values.is_empty() {
            return empty_values_condition(operator);
        }
        Ok(AslCondition::field_value(field.clone(), operator, values))
    }

    fn where_condition_values(&self, field: &AslField, comparison: &ComparisonCondition) -> Result<Vec<AslValue>> {
        let (values, operator) = (comparison.right.as_slice(), comparison.operator);
        let strings = || values.iter().filter_map(Primitive::as_str);
        Ok(match field.extracted_column() {
            Some(AslExtractedColumn::TemplateId) => template_id_condition_values(values, operator, self.metadata)?,
            Some(AslExtractedColumn::ArchetypeNodeId) => archetype_node_id_condition_values(values, operator)?,
            Some(AslExtractedColumn::RootConcept) => root_concept_condition_values(values, operator)?,
            Some(
                AslExtractedColumn::OvTimeCommittedDv
                | AslExtractedColumn::OvTimeCommitted
                | AslExtractedColumn::EhrTimeCreatedDv
                | AslExtractedColumn::EhrTimeCreated,
            ) => values
                .iter()
                .filter_map(to_offset_date_time)
                .map(AslValue::OffsetDateTime)
                .collect(),
            Some(AslExtractedColumn::AdChangeTypeCodeString) => strings()
                .filter_map(ContributionChangeType::by_code)
                .map(AslValue::ChangeType)
                .collect(),
            Some(AslExtractedColumn::AdChangeTypeValue | AslExtractedColumn::AdChangeTypePreferredTerm) => strings()
                .filter_map(ContributionChangeType::by_literal)
                .map(AslValue::ChangeType)
                .collect(),
            _ => condition_value(values, operator, field.field_type())?,
        })
    }
}

// ============================================================================
// SELECT and ORDER BY
// ============================================================================

fn field_of<'f>(fields: &'f PathFieldMap, path: &IdentifiedPath) -> Result<&'f AslField> {
    fields
        .get(path)
        .ok_or_else(|| AqlError::unresolved(ASL0100, format!("Unknown field: {path}"), path.to_string()))
}

/// Add the selects and return whether an aggregate function is used
fn add_select(root: &mut AslRootQuery, query: &AqlQueryWrapper, fields: &PathFieldMap) -> Result<bool> {
    let mut aggregating = false;
    let mut group_by_candidates = Vec::new();
    for select in query.non_primitive_selects() {
        let field = match select {
            SelectWrapper::Path { path, .. } => {
                let field = field_of(fields, path)?.clone();
                group_by_candidates.push(field.clone());
                field
            }
            SelectWrapper::Aggregate {
                function,
                path,
                distinct,
                ..
            } => {
                aggregating = true;
                let base_field = path
                    .as_ref()
                    .map(|p| field_of(fields, p).cloned().map(Box::new))
                    .transpose()?;
                AslField::Aggregating(AggregatingField {
                    function: *function,
                    base_field,
                    distinct: *distinct,
                })
            }
            SelectWrapper::Function { name, .. } => {
                return Err(AqlError::unsupported(
                    ASL0007,
                    format!("Function {name} is not supported in SELECT"),
                ));
            }
            SelectWrapper::Primitive { .. } => continue,
        };
        root.select.push(field);
    }

    if aggregating {
        root.group_by = group_by_fields(&group_by_candidates);
    } else if query.distinct {
        root.group_by = group_by_fields(&root.select);
    }
    Ok(aggregating)
}

fn group_by_fields(fields: &[AslField]) -> Vec<AslField> {
    let mut group_by: Vec<AslField> = Vec::new();
    for field in fields.iter().flat_map(AslField::fields_for_aggregation) {
        if !group_by.contains(&field) {
            group_by.push(field);
        }
    }
    group_by
}

/// Count the rows of the first containment if nothing but constants is selected
fn add_synthetic_select(root: &mut AslRootQuery, query: &AqlQueryWrapper, contains: &ContainsMap) -> Result<()> {
    let first = query
        .contains_chain
        .chain
        .first()
        .ok_or_else(|| AqlError::unsupported(ASL0009, "FROM clause without containment"))?;
    let owner = owner_provider(contains, first.id())?.owner;
    let key = root
        .available_fields()
        .into_iter()
        .filter(|f| f.owner() == Some(owner))
        .find(|f| matches!(f.column_name(), Some(name) if name == "id" || name == StructureColumn::VoId.field_name()))
        .ok_or_else(|| {
            AqlError::unresolved(
                ASL0103,
                format!("No key column to count rows of {}", root.query(owner).alias),
                first.id().to_string(),
            )
        })?;
    trace!("Only constants selected, counting rows of {}", root.query(owner).alias);
    root.select.push(AslField::Aggregating(AggregatingField {
        function: AggregateFunction::Count,
        base_field: Some(Box::new(key.with_provider(QueryId::ROOT))),
        distinct: false,
    }));
    Ok(())
}

fn add_order_by(root: &mut AslRootQuery, query: &AqlQueryWrapper, fields: &PathFieldMap, aggregating: bool) -> Result<()> {
    for order_by in &query.order_by {
        root.order_by.push(AslOrderByField {
            field: field_of(fields, &order_by.path)?.clone(),
            direction: order_by.direction,
            group_by_scoped: query.distinct || aggregating,
        });
    }
    Ok(())
}
