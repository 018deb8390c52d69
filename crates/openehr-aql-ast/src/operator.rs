//! AQL operators

use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operators of WHERE conditions and path predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Equality (=)
    Eq,
    /// Inequality (!=)
    Neq,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    GtEq,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    LtEq,
    /// Wildcard pattern match
    Like,
    /// Membership in a value list
    Matches,
    /// Presence of a value
    Exists,
}

impl ComparisonOperator {
    /// Get the AQL symbol for this operator
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Neq => "!=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::GtEq => ">=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::LtEq => "<=",
            ComparisonOperator::Like => "LIKE",
            ComparisonOperator::Matches => "MATCHES",
            ComparisonOperator::Exists => "EXISTS",
        }
    }

    /// Whether the operator compares for equality (`=` or `MATCHES`)
    pub fn is_equality(&self) -> bool {
        matches!(self, ComparisonOperator::Eq | ComparisonOperator::Matches)
    }

    /// Whether the operator is one of the ordering comparisons
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::Gt | ComparisonOperator::GtEq | ComparisonOperator::Lt | ComparisonOperator::LtEq
        )
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Logical operators of the WHERE tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

/// Set operators combining containment chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainmentSetOperator {
    And,
    Or,
}

/// Aggregate functions allowed in SELECT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Count,
    Min,
    Max,
    Sum,
    Avg,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
        };
        f.write_str(name)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}
