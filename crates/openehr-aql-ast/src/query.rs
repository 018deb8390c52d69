//! The analyzed query: SELECT, WHERE, ORDER BY and FROM with their path references

use crate::{
    AggregateFunction, AndOperatorPredicate, AqlObjectPath, ComparisonOperator, ContainsChain, ContainsId,
    ContainsWrapper, LogicalOperator, PathInfo, Primitive, SortDirection,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A path rooted at a containment (`c/content[openEHR-EHR-SECTION.s.v1]/items`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifiedPath {
    pub root: ContainsId,
    pub root_predicate: Vec<AndOperatorPredicate>,
    /// `None` for the containment itself
    pub path: Option<AqlObjectPath>,
}

impl IdentifiedPath {
    pub fn new(root: ContainsId, path: Option<AqlObjectPath>) -> Self {
        Self {
            root,
            root_predicate: Vec::new(),
            path,
        }
    }

    /// A path below a containment
    pub fn of(root: u32, path: AqlObjectPath) -> Self {
        Self::new(ContainsId(root), Some(path))
    }

    /// Reference to the containment as a whole
    pub fn root_only(root: u32) -> Self {
        Self::new(ContainsId(root), None)
    }

    pub fn path_nodes(&self) -> &[crate::PathNode] {
        self.path.as_ref().map(|p| p.nodes()).unwrap_or_default()
    }
}

impl fmt::Display for IdentifiedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        if let Some(path) = &self.path {
            write!(f, "/{path}")?;
        }
        Ok(())
    }
}

/// A comparison of a path with literal operands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonCondition {
    pub left: IdentifiedPath,
    pub operator: ComparisonOperator,
    /// Operands; empty for EXISTS, several for MATCHES
    pub right: Vec<Primitive>,
}

/// WHERE tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConditionWrapper {
    Logical {
        operator: LogicalOperator,
        operands: Vec<ConditionWrapper>,
    },
    Comparison(ComparisonCondition),
}

impl ConditionWrapper {
    pub fn comparison(left: IdentifiedPath, operator: ComparisonOperator, right: Vec<Primitive>) -> Self {
        ConditionWrapper::Comparison(ComparisonCondition { left, operator, right })
    }

    pub fn and(operands: Vec<ConditionWrapper>) -> Self {
        ConditionWrapper::Logical {
            operator: LogicalOperator::And,
            operands,
        }
    }

    pub fn or(operands: Vec<ConditionWrapper>) -> Self {
        ConditionWrapper::Logical {
            operator: LogicalOperator::Or,
            operands,
        }
    }

    pub fn not(operand: ConditionWrapper) -> Self {
        ConditionWrapper::Logical {
            operator: LogicalOperator::Not,
            operands: vec![operand],
        }
    }
}

/// Kind of a select expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectType {
    Path,
    Primitive,
    AggregateFunction,
    Function,
}

/// A SELECT item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectWrapper {
    Path {
        path: IdentifiedPath,
        alias: Option<String>,
    },
    Aggregate {
        function: AggregateFunction,
        /// `None` for `COUNT(*)`
        path: Option<IdentifiedPath>,
        distinct: bool,
        alias: Option<String>,
    },
    Primitive {
        value: Primitive,
        alias: Option<String>,
    },
    Function {
        name: String,
        alias: Option<String>,
    },
}

impl SelectWrapper {
    pub fn path(path: IdentifiedPath) -> Self {
        SelectWrapper::Path { path, alias: None }
    }

    pub fn primitive(value: Primitive) -> Self {
        SelectWrapper::Primitive { value, alias: None }
    }

    pub fn aggregate(function: AggregateFunction, path: Option<IdentifiedPath>, distinct: bool) -> Self {
        SelectWrapper::Aggregate {
            function,
            path,
            distinct,
            alias: None,
        }
    }

    pub fn select_type(&self) -> SelectType {
        match self {
            SelectWrapper::Path { .. } => SelectType::Path,
            SelectWrapper::Aggregate { .. } => SelectType::AggregateFunction,
            SelectWrapper::Primitive { .. } => SelectType::Primitive,
            SelectWrapper::Function { .. } => SelectType::Function,
        }
    }

    /// The selected path, if any
    pub fn identified_path(&self) -> Option<&IdentifiedPath> {
        match self {
            SelectWrapper::Path { path, .. } => Some(path),
            SelectWrapper::Aggregate { path, .. } => path.as_ref(),
            SelectWrapper::Primitive { .. } | SelectWrapper::Function { .. } => None,
        }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            SelectWrapper::Path { alias, .. }
            | SelectWrapper::Aggregate { alias, .. }
            | SelectWrapper::Primitive { alias, .. }
            | SelectWrapper::Function { alias, .. } => alias.as_deref(),
        }
    }
}

/// An ORDER BY item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByWrapper {
    pub path: IdentifiedPath,
    pub direction: SortDirection,
}

/// The analyzed query handed to the compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AqlQueryWrapper {
    pub distinct: bool,
    pub selects: Vec<SelectWrapper>,
    pub contains_chain: ContainsChain,
    pub where_condition: Option<ConditionWrapper>,
    pub order_by: Vec<OrderByWrapper>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Path cohesion analysis per containment (EHR containments have none)
    pub path_infos: IndexMap<ContainsId, PathInfo>,
}

impl AqlQueryWrapper {
    pub fn new(contains_chain: ContainsChain) -> Self {
        Self {
            distinct: false,
            selects: Vec::new(),
            contains_chain,
            where_condition: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            path_infos: IndexMap::new(),
        }
    }

    pub fn with_select(mut self, select: SelectWrapper) -> Self {
        self.selects.push(select);
        self
    }

    pub fn with_where(mut self, condition: ConditionWrapper) -> Self {
        self.where_condition = Some(condition);
        self
    }

    pub fn with_order_by(mut self, path: IdentifiedPath, direction: SortDirection) -> Self {
        self.order_by.push(OrderByWrapper { path, direction });
        self
    }

    pub fn with_path_info(mut self, contains: u32, info: PathInfo) -> Self {
        self.path_infos.insert(ContainsId(contains), info);
        self
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn with_limit(mut self, limit: u64, offset: Option<u64>) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Select items that are not literal constants
    pub fn non_primitive_selects(&self) -> impl Iterator<Item = &SelectWrapper> {
        self.selects
            .iter()
            .filter(|s| s.select_type() != SelectType::Primitive)
    }

    /// Look up a containment of the FROM clause
    pub fn contains(&self, id: ContainsId) -> Option<&ContainsWrapper> {
        self.contains_chain.find(id)
    }
}
