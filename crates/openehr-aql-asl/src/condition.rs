//! Conditions and the condition algebra
//!
//! [`reduce`] simplifies AND/OR lists with the identity and absorbing sentinels, so a
//! comparison that can never match collapses into [`AslCondition::False`] instead of
//! producing SQL over an empty value list.

use crate::{AslField, FieldType};
use chrono::{DateTime, FixedOffset};
use log::warn;
use openehr_aql_ast::{AndOperatorPredicate, ComparisonOperator, ComparisonOperatorPredicate, Primitive};
use openehr_aql_diagnostics::{ASL0006, ASL0200, ASL0201, AqlError, Result};
use openehr_aql_model::{ContributionChangeType, MetadataResolver, RmTypeAndConcept};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Operators of field conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AslConditionOperator {
    Eq,
    Neq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    Like,
    In,
    IsNull,
    IsNotNull,
}

impl From<ComparisonOperator> for AslConditionOperator {
    fn from(op: ComparisonOperator) -> Self {
        match op {
            ComparisonOperator::Eq => AslConditionOperator::Eq,
            ComparisonOperator::Neq => AslConditionOperator::Neq,
            ComparisonOperator::Gt => AslConditionOperator::Gt,
            ComparisonOperator::GtEq => AslConditionOperator::GtEq,
            ComparisonOperator::Lt => AslConditionOperator::Lt,
            ComparisonOperator::LtEq => AslConditionOperator::LtEq,
            ComparisonOperator::Like => AslConditionOperator::Like,
            ComparisonOperator::Matches => AslConditionOperator::In,
            ComparisonOperator::Exists => AslConditionOperator::IsNotNull,
        }
    }
}

/// A literal operand after coercion to the field it is compared with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AslValue {
    String(String),
    Long(i64),
    Integer(i32),
    Decimal(Decimal),
    Boolean(bool),
    Uuid(Uuid),
    OffsetDateTime(DateTime<FixedOffset>),
    RmTypeAndConcept(RmTypeAndConcept),
    ChangeType(ContributionChangeType),
}

impl From<&Primitive> for AslValue {
    fn from(p: &Primitive) -> Self {
        match p {
            Primitive::String(s) => AslValue::String(s.clone()),
            Primitive::Long(l) => AslValue::Long(*l),
            Primitive::Decimal(d) => AslValue::Decimal(*d),
            Primitive::Boolean(b) => AslValue::Boolean(*b),
            Primitive::Temporal(t) => AslValue::String(t.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AslCondition {
    And(Vec<AslCondition>),
    Or(Vec<AslCondition>),
    Not(Box<AslCondition>),
    True,
    False,
    FieldValue {
        field: AslField,
        operator: AslConditionOperator,
        values: Vec<AslValue>,
    },
    FieldField {
        left: AslField,
        operator: AslConditionOperator,
        right: AslField,
    },
    NotNull(AslField),
    /// Comparison of an ordered value by magnitude, restricted to the given RM types
    OrderedValue {
        types: BTreeSet<String>,
        field: AslField,
        operator: AslConditionOperator,
        values: Vec<Decimal>,
    },
}

impl AslCondition {
    pub fn field_value(field: AslField, operator: impl Into<AslConditionOperator>, values: Vec<AslValue>) -> Self {
        AslCondition::FieldValue {
            field,
            operator: operator.into(),
            values,
        }
    }

    pub fn field_field(left: AslField, operator: AslConditionOperator, right: AslField) -> Self {
        AslCondition::FieldField { left, operator, right }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, AslCondition::True)
    }

    /// All fields referenced by the condition tree
    pub fn fields(&self) -> Vec<&AslField> {
        let mut acc = Vec::new();
        self.collect_fields(&mut acc);
        acc
    }

    fn collect_fields<'a>(&'a self, acc: &mut Vec<&'a AslField>) {
        match self {
            AslCondition::And(ops) | AslCondition::Or(ops) => ops.iter().for_each(|c| c.collect_fields(acc)),
            AslCondition::Not(c) => c.collect_fields(acc),
            AslCondition::True | AslCondition::False => {}
            AslCondition::FieldValue { field, .. }
            | AslCondition::NotNull(field)
            | AslCondition::OrderedValue { field, .. } => acc.push(field),
            AslCondition::FieldField { left, right, .. } => {
                acc.push(left);
                acc.push(right);
            }
        }
    }
}

/// Operators [`reduce`] can combine with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOperator {
    And,
    Or,
}

impl ReduceOperator {
    fn is_identity(&self, c: &AslCondition) -> bool {
        match self {
            ReduceOperator::And => matches!(c, AslCondition::True),
            ReduceOperator::Or => matches!(c, AslCondition::False),
        }
    }

    fn is_absorbing(&self, c: &AslCondition) -> bool {
        match self {
            ReduceOperator::And => matches!(c, AslCondition::False),
            ReduceOperator::Or => matches!(c, AslCondition::True),
        }
    }

    fn build(&self, operands: Vec<AslCondition>) -> AslCondition {
        match self {
            ReduceOperator::And => AslCondition::And(operands),
            ReduceOperator::Or => AslCondition::Or(operands),
        }
    }
}

/// Combine conditions, dropping identities and short-circuiting on absorbing elements
pub fn reduce(operator: ReduceOperator, conditions: Vec<AslCondition>) -> Option<AslCondition> {
    let mut conditions = conditions.into_iter();
    let first = conditions.next()?;
    let remaining: Vec<AslCondition> = std::iter::once(first.clone())
        .chain(conditions)
        .filter(|c| !operator.is_identity(c))
        .collect();

    if remaining.is_empty() {
        return Some(first);
    }
    if remaining.len() == 1 {
        return remaining.into_iter().next();
    }
    if let Some(absorbing) = remaining.iter().find(|c| operator.is_absorbing(c)) {
        return Some(absorbing.clone());
    }
    Some(operator.build(remaining))
}

/// AND of the conditions without simplification; `None` if there are none
pub fn and(conditions: Vec<AslCondition>) -> Option<AslCondition> {
    match conditions.len() {
        0 => None,
        1 => conditions.into_iter().next(),
        _ => Some(AslCondition::And(conditions)),
    }
}

/// Translate predicate alternatives (OR of ANDs) into a condition
pub fn predicates<F>(or_predicates: &[AndOperatorPredicate], mut handler: F) -> Result<Option<AslCondition>>
where
    F: FnMut(&ComparisonOperatorPredicate) -> Result<AslCondition>,
{
    let mut alternatives = Vec::with_capacity(or_predicates.len());
    for and_predicate in or_predicates {
        let operands = and_predicate
            .operands
            .iter()
            .map(&mut handler)
            .collect::<Result<Vec<_>>>()?;
        if let Some(c) = reduce(ReduceOperator::And, operands) {
            alternatives.push(c);
        }
    }
    Ok(reduce(ReduceOperator::Or, alternatives))
}

/// Translate an AQL wildcard pattern (`*`, `?`, `\` escapes) into a SQL LIKE pattern
pub fn translate_like_pattern(pattern: &str) -> Result<String> {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            '?' => out.push('_'),
            '*' => out.push('%'),
            '\\' => match chars.next() {
                Some(escaped @ ('*' | '?')) => out.push(escaped),
                Some('\\') => out.push_str("\\\\"),
                _ => {
                    return Err(AqlError::invalid_value(
                        ASL0200,
                        "Invalid escape sequence in LIKE pattern",
                        pattern,
                    ));
                }
            },
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Literal operands usable against a field of `field_type`
pub fn condition_value(
    values: &[Primitive],
    operator: ComparisonOperator,
    field_type: FieldType,
) -> Result<Vec<AslValue>> {
    match operator {
        ComparisonOperator::Exists => Ok(Vec::new()),
        ComparisonOperator::Matches | ComparisonOperator::Eq | ComparisonOperator::Neq => Ok(values
            .iter()
            .filter(|v| field_type.accepts(v))
            .map(AslValue::from)
            .collect()),
        ComparisonOperator::Gt | ComparisonOperator::GtEq | ComparisonOperator::Lt | ComparisonOperator::LtEq => {
            Ok(values.iter().map(AslValue::from).collect())
        }
        ComparisonOperator::Like => {
            if !field_type.supports_like() {
                return Ok(Vec::new());
            }
            values
                .iter()
                .filter_map(Primitive::as_str)
                .map(|s| translate_like_pattern(s).map(AslValue::String))
                .collect()
        }
    }
}

/// Template ids resolved to their internal identifiers; unknown templates are dropped
pub fn template_id_condition_values(
    values: &[Primitive],
    operator: ComparisonOperator,
    metadata: &dyn MetadataResolver,
) -> Result<Vec<AslValue>> {
    if matches!(operator, ComparisonOperator::Like) || operator.is_ordering() {
        return Err(AqlError::unsupported(
            ASL0006,
            format!("{} is not supported for template_id", operator.symbol()),
        ));
    }
    Ok(condition_value(values, operator, FieldType::String)?
        .into_iter()
        .filter_map(|v| match v {
            AslValue::String(template_id) => {
                let uuid = metadata.find_uuid_by_template_id(&template_id);
                if uuid.is_none() {
                    warn!("Template {template_id} is unknown, the comparison matches nothing");
                }
                uuid.map(AslValue::Uuid)
            }
            _ => None,
        })
        .collect())
}

/// Archetype node ids split into aliased RM type and concept
pub fn archetype_node_id_condition_values(
    values: &[Primitive],
    operator: ComparisonOperator,
) -> Result<Vec<AslValue>> {
    condition_value(values, operator, FieldType::String)?
        .into_iter()
        .filter_map(|v| match v {
            AslValue::String(s) => Some(s),
            _ => None,
        })
        .map(|s| {
            RmTypeAndConcept::from_archetype_node_id(&s)
                .map(AslValue::RmTypeAndConcept)
                .ok_or_else(|| AqlError::invalid_value(ASL0201, "Invalid archetype node id", s))
        })
        .collect()
}

/// Root concepts of composition archetypes; other archetypes never match
pub fn root_concept_condition_values(values: &[Primitive], operator: ComparisonOperator) -> Result<Vec<AslValue>> {
    Ok(archetype_node_id_condition_values(values, operator)?
        .into_iter()
        .filter_map(|v| match v {
            AslValue::RmTypeAndConcept(RmTypeAndConcept {
                aliased_rm_type: Some(alias),
                concept,
            }) if alias == "CO" => Some(AslValue::String(concept)),
            _ => None,
        })
        .collect())
}
