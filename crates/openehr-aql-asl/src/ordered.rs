//! Comparisons of ordered values
//!
//! A path may hold a date, a time, a date-time, a duration or a numeric ordered value
//! depending on the data. Literal operands are partitioned into one bucket per type they
//! can be compared with, and each bucket becomes a magnitude comparison restricted to
//! its types.

use crate::condition::{ReduceOperator, reduce};
use crate::temporal::{date_magnitude, date_time_magnitude, duration_magnitude, parse_with_higher_precision, time_magnitude};
use crate::{AslCondition, AslField};
use chrono::NaiveTime;
use indexmap::IndexMap;
use openehr_aql_ast::{ComparisonOperator, Primitive, TemporalValue};
use openehr_aql_diagnostics::{ASL0001, AqlError, Result};
use openehr_aql_model::{DV_DATE, DV_DATE_TIME, DV_DURATION, DV_TIME, NUMERIC_DV_ORDERED_TYPES};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

/// Magnitudes of the numeric types and, per other ordered type, in order of first appearance
#[derive(Debug, Default)]
struct Buckets {
    numeric: Vec<Decimal>,
    by_type: IndexMap<&'static str, Vec<Decimal>>,
}

impl Buckets {
    fn add(&mut self, rm_type: &'static str, magnitude: Decimal) {
        let bucket = self.by_type.entry(rm_type).or_default();
        if !bucket.contains(&magnitude) {
            bucket.push(magnitude);
        }
    }

    fn add_numeric(&mut self, magnitude: Decimal) {
        if !self.numeric.contains(&magnitude) {
            self.numeric.push(magnitude);
        }
    }
}

/// Compare an ordered-value field with literal operands.
///
/// Yields [`AslCondition::False`] if no operand fits any of the allowed types.
pub fn ordered_value_condition(
    field: &AslField,
    allowed_types: &BTreeSet<String>,
    operator: ComparisonOperator,
    values: &[Primitive],
) -> Result<AslCondition> {
    if matches!(operator, ComparisonOperator::Exists | ComparisonOperator::Like) {
        return Err(AqlError::unsupported(
            ASL0001,
            format!("{} is not supported on ordered values", operator.symbol()),
        ));
    }

    let allowed = |t: &str| allowed_types.contains(t);
    let numeric_types: BTreeSet<String> = allowed_types
        .iter()
        .filter(|t| NUMERIC_DV_ORDERED_TYPES.contains(&t.as_str()))
        .cloned()
        .collect();
    let is_equality = operator.is_equality();

    let mut buckets = Buckets::default();
    for value in values {
        match value {
            Primitive::Temporal(t) => add_temporal(&mut buckets, t, is_equality, &allowed),
            Primitive::String(s) => {
                if [DV_DATE, DV_DATE_TIME, DV_TIME].iter().any(|t| allowed(t)) {
                    if let Some(t) = parse_with_higher_precision(s) {
                        add_temporal(&mut buckets, &t, is_equality, &allowed);
                    }
                }
                if allowed(DV_DURATION) {
                    if let Some(magnitude) = duration_magnitude(s) {
                        buckets.add(DV_DURATION, magnitude);
                    }
                }
            }
            Primitive::Long(_) | Primitive::Decimal(_) if !numeric_types.is_empty() => {
                if let Some(magnitude) = value.as_decimal() {
                    buckets.add_numeric(magnitude);
                }
            }
            Primitive::Long(_) | Primitive::Decimal(_) | Primitive::Boolean(_) => {}
        }
    }

    let mut conditions = Vec::new();
    if !buckets.numeric.is_empty() {
        conditions.push(AslCondition::OrderedValue {
            types: numeric_types,
            field: field.clone(),
            operator: operator.into(),
            values: buckets.numeric,
        });
    }
    for (rm_type, magnitudes) in buckets.by_type {
        if magnitudes.is_empty() {
            continue;
        }
        conditions.push(AslCondition::OrderedValue {
            types: BTreeSet::from([rm_type.to_string()]),
            field: field.clone(),
            operator: operator.into(),
            values: magnitudes,
        });
    }
    Ok(reduce(ReduceOperator::Or, conditions).unwrap_or(AslCondition::False))
}

fn add_temporal(buckets: &mut Buckets, value: &TemporalValue, is_equality: bool, allowed: &impl Fn(&str) -> bool) {
    match *value {
        TemporalValue::Date(date) => {
            if allowed(DV_DATE) {
                buckets.add(DV_DATE, date_magnitude(date));
            }
            if allowed(DV_DATE_TIME) {
                buckets.add(DV_DATE_TIME, date_time_magnitude(date.and_time(NaiveTime::MIN), None));
            }
        }
        TemporalValue::DateTime { date_time, offset } => {
            // a date-time only equals a date-time
            if !is_equality && allowed(DV_DATE) {
                buckets.add(DV_DATE, date_magnitude(date_time.date()));
            }
            if allowed(DV_DATE_TIME) {
                buckets.add(DV_DATE_TIME, date_time_magnitude(date_time, offset));
            }
        }
        TemporalValue::Time { time, .. } => {
            if allowed(DV_TIME) {
                buckets.add(DV_TIME, time_magnitude(time));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldSource, FieldType, QueryId};
    use chrono::NaiveDate;
    use openehr_aql_model::{DV_COUNT, DV_QUANTITY};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn field() -> AslField {
        AslField::column(FieldSource::with_owner(QueryId(2)), "data", FieldType::Jsonb)
    }

    fn types(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn bucket_types(condition: &AslCondition) -> Vec<Vec<String>> {
        let conditions = match condition {
            AslCondition::Or(ops) => ops.iter().collect(),
            other => vec![other],
        };
        conditions
            .into_iter()
            .filter_map(|c| match c {
                AslCondition::OrderedValue { types, .. } => Some(types.iter().cloned().collect()),
                _ => None,
            })
            .collect()
    }

    fn date(text: &str) -> Primitive {
        Primitive::Temporal(TemporalValue::parse(text).unwrap())
    }

    // === partitioning ===

    #[rstest]
    #[case(ComparisonOperator::Eq)]
    #[case(ComparisonOperator::Gt)]
    fn test_date_fills_date_and_date_time(#[case] op: ComparisonOperator) {
        let condition =
            ordered_value_condition(&field(), &types(&[DV_DATE, DV_DATE_TIME]), op, &[date("2021-05-01")]).unwrap();
        assert_eq!(
            bucket_types(&condition),
            vec![vec![DV_DATE.to_string()], vec![DV_DATE_TIME.to_string()]]
        );
    }

    #[test]
    fn test_date_time_equality_skips_date() {
        let all = types(&[DV_DATE, DV_DATE_TIME, DV_TIME]);
        let eq = ordered_value_condition(&field(), &all, ComparisonOperator::Eq, &[date("2021-05-01T10:00:00")]).unwrap();
        assert_eq!(bucket_types(&eq), vec![vec![DV_DATE_TIME.to_string()]]);

        let lt = ordered_value_condition(&field(), &all, ComparisonOperator::Lt, &[date("2021-05-01T10:00:00")]).unwrap();
        assert_eq!(
            bucket_types(&lt),
            vec![vec![DV_DATE.to_string()], vec![DV_DATE_TIME.to_string()]]
        );
    }

    #[test]
    fn test_time_goes_to_time_only() {
        let condition = ordered_value_condition(
            &field(),
            &types(&[DV_DATE, DV_DATE_TIME, DV_TIME]),
            ComparisonOperator::GtEq,
            &[date("10:30:00")],
        )
        .unwrap();
        assert_eq!(bucket_types(&condition), vec![vec![DV_TIME.to_string()]]);
    }

    #[test]
    fn test_numeric_bucket_shared_and_first() {
        let condition = ordered_value_condition(
            &field(),
            &types(&[DV_COUNT, DV_QUANTITY, DV_DURATION]),
            ComparisonOperator::Matches,
            &[Primitive::string("PT1H"), Primitive::Long(3), Primitive::Long(3)],
        )
        .unwrap();
        let AslCondition::Or(ops) = &condition else {
            panic!("expected OR, got {condition:?}");
        };
        assert_eq!(
            ops[0],
            AslCondition::OrderedValue {
                types: types(&[DV_COUNT, DV_QUANTITY]),
                field: field(),
                operator: crate::AslConditionOperator::In,
                values: vec![Decimal::from(3)],
            }
        );
        assert_eq!(bucket_types(&condition)[1], vec![DV_DURATION.to_string()]);
    }

    #[test]
    fn test_higher_precision_string() {
        let condition = ordered_value_condition(
            &field(),
            &types(&[DV_DATE_TIME]),
            ComparisonOperator::Gt,
            &[Primitive::string("2021-05-01T10:30:00.123456")],
        )
        .unwrap();
        let AslCondition::OrderedValue { values, .. } = condition else {
            panic!("expected a single bucket");
        };
        let expected = date_time_magnitude(
            NaiveDate::from_ymd_opt(2021, 5, 1)
                .unwrap()
                .and_hms_micro_opt(10, 30, 0, 123_456)
                .unwrap(),
            None,
        );
        assert_eq!(values, vec![expected]);
    }

    // === degenerate input ===

    #[test]
    fn test_no_compatible_value_is_false() {
        let condition = ordered_value_condition(
            &field(),
            &types(&[DV_DATE]),
            ComparisonOperator::Eq,
            &[Primitive::Long(1), Primitive::string("abc")],
        )
        .unwrap();
        assert_eq!(condition, AslCondition::False);
    }

    #[rstest]
    #[case(ComparisonOperator::Exists)]
    #[case(ComparisonOperator::Like)]
    fn test_rejected_operators(#[case] op: ComparisonOperator) {
        let err = ordered_value_condition(&field(), &types(&[DV_DATE]), op, &[]).unwrap_err();
        assert_eq!(err.code(), ASL0001);
    }
}
