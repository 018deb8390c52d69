//! Containment descriptors of the FROM clause

use crate::{AndOperatorPredicate, ContainmentSetOperator};
use openehr_aql_model::ORIGINAL_VERSION;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a containment within one query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainsId(pub u32);

impl fmt::Display for ContainsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A class containment (`COMPOSITION c[openEHR-EHR-COMPOSITION.report.v1]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmContainsWrapper {
    pub id: ContainsId,
    pub rm_type: String,
    pub alias: Option<String>,
    /// Predicate alternatives (OR of ANDs)
    pub predicate: Vec<AndOperatorPredicate>,
}

impl RmContainsWrapper {
    pub fn new(id: u32, rm_type: impl Into<String>) -> Self {
        Self {
            id: ContainsId(id),
            rm_type: rm_type.into(),
            alias: None,
            predicate: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_predicate(mut self, predicate: AndOperatorPredicate) -> Self {
        self.predicate.push(predicate);
        self
    }
}

/// A version containment (`VERSION v[LATEST_VERSION] CONTAINS COMPOSITION c`).
///
/// It stands in for itself and the class containment it wraps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionContainsWrapper {
    pub id: ContainsId,
    pub alias: Option<String>,
    pub predicate: Vec<AndOperatorPredicate>,
    pub child: RmContainsWrapper,
}

impl VersionContainsWrapper {
    pub fn new(id: u32, child: RmContainsWrapper) -> Self {
        Self {
            id: ContainsId(id),
            alias: None,
            predicate: Vec::new(),
            child,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// One element of a containment chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainsWrapper {
    Rm(RmContainsWrapper),
    Version(VersionContainsWrapper),
}

impl ContainsWrapper {
    pub fn id(&self) -> ContainsId {
        match self {
            ContainsWrapper::Rm(rm) => rm.id,
            ContainsWrapper::Version(v) => v.id,
        }
    }

    /// The RM type; `ORIGINAL_VERSION` for version containments
    pub fn rm_type(&self) -> &str {
        match self {
            ContainsWrapper::Rm(rm) => &rm.rm_type,
            ContainsWrapper::Version(_) => ORIGINAL_VERSION,
        }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            ContainsWrapper::Rm(rm) => rm.alias.as_deref(),
            ContainsWrapper::Version(v) => v.alias.as_deref(),
        }
    }

    pub fn predicate(&self) -> &[AndOperatorPredicate] {
        match self {
            ContainsWrapper::Rm(rm) => &rm.predicate,
            ContainsWrapper::Version(v) => &v.predicate,
        }
    }

    pub fn is_version(&self) -> bool {
        matches!(self, ContainsWrapper::Version(_))
    }

    /// The class containment wrapped by a version containment
    pub fn version_child(&self) -> Option<&RmContainsWrapper> {
        match self {
            ContainsWrapper::Version(v) => Some(&v.child),
            ContainsWrapper::Rm(_) => None,
        }
    }
}

impl From<RmContainsWrapper> for ContainsWrapper {
    fn from(rm: RmContainsWrapper) -> Self {
        ContainsWrapper::Rm(rm)
    }
}

impl From<VersionContainsWrapper> for ContainsWrapper {
    fn from(v: VersionContainsWrapper) -> Self {
        ContainsWrapper::Version(v)
    }
}

/// `A CONTAINS B CONTAINS (C OR D ...)`: a sequence of containments, optionally
/// followed by a set operation over nested chains
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainsChain {
    pub chain: Vec<ContainsWrapper>,
    pub trailing_set_operation: Option<ContainsSetOperation>,
}

/// AND/OR over nested containment chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainsSetOperation {
    pub operator: ContainmentSetOperator,
    pub operands: Vec<ContainsChain>,
}

impl ContainsChain {
    pub fn new(chain: impl IntoIterator<Item = ContainsWrapper>) -> Self {
        Self {
            chain: chain.into_iter().collect(),
            trailing_set_operation: None,
        }
    }

    pub fn with_set_operation(mut self, operator: ContainmentSetOperator, operands: Vec<ContainsChain>) -> Self {
        self.trailing_set_operation = Some(ContainsSetOperation { operator, operands });
        self
    }

    pub fn has_trailing_set_operation(&self) -> bool {
        self.trailing_set_operation.is_some()
    }

    /// Number of elements: the chained containments plus the trailing set operation
    pub fn size(&self) -> usize {
        self.chain.len() + usize::from(self.trailing_set_operation.is_some())
    }

    /// All containments in FROM order (depth first)
    pub fn all_contains(&self) -> Vec<&ContainsWrapper> {
        let mut all = Vec::new();
        self.collect_contains(&mut all);
        all
    }

    fn collect_contains<'a>(&'a self, acc: &mut Vec<&'a ContainsWrapper>) {
        acc.extend(self.chain.iter());
        if let Some(op) = &self.trailing_set_operation {
            for operand in &op.operands {
                operand.collect_contains(acc);
            }
        }
    }

    /// Find a containment by id anywhere below this chain
    pub fn find(&self, id: ContainsId) -> Option<&ContainsWrapper> {
        self.chain.iter().find(|c| c.id() == id).or_else(|| {
            self.trailing_set_operation
                .as_ref()
                .and_then(|op| op.operands.iter().find_map(|o| o.find(id)))
        })
    }
}
