//! Path cohesion trees
//!
//! The analysis stage groups all paths of one containment that share a structural
//! prefix into a tree. Each tree node carries the type information the analysis
//! derived for the attribute it stands for; the compiler decides from it how the node
//! is joined.

use crate::{IdentifiedPath, PathNode};
use openehr_aql_diagnostics::{ASL0009, AqlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a path node represents in the physical model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeCategory {
    /// A structure entity stored as its own row
    Structure,
    /// An abstract structure attribute that cannot be joined directly
    StructureIntermediate,
    /// A typed RM object inside the JSON data of a structure row
    RmType,
    /// A primitive attribute
    Foundation,
    /// Both RM object and primitive depending on the runtime type
    FoundationExtended,
}

impl NodeCategory {
    /// Whether the node is read from JSON data rather than joined as a structure row
    pub fn is_data(&self) -> bool {
        match self {
            NodeCategory::Structure | NodeCategory::StructureIntermediate => false,
            NodeCategory::RmType | NodeCategory::Foundation | NodeCategory::FoundationExtended => true,
        }
    }
}

/// How a node of the cohesion tree has to be joined
///
/// | root      | no child | one child | several children |
/// |-----------|----------|-----------|------------------|
/// | data      | ROOT     | ROOT      | ROOT             |
/// | no data   | -        | ROOT      | ROOT             |
///
/// | sub-node  | no child | one child             | several children |
/// |-----------|----------|-----------------------|------------------|
/// | data      | DATA     | DATA                  | DATA             |
/// | no data   | -        | INTERNAL_SINGLE_CHILD | INTERNAL_FORK    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinMode {
    /// Root node stemming from the FROM clause; all children are left joined
    Root,
    /// Node contributing data; children are left joined
    Data,
    /// Internal node with one child that must only yield rows if the child does
    InternalSingleChild,
    /// Internal node yielding rows if at least one of its children does
    InternalFork,
}

/// Type information for one tree node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    pub category: Option<NodeCategory>,
    /// Candidate RM types of the attribute
    pub target_types: BTreeSet<String>,
    /// Path nodes from the containment down to (and including) this node
    pub path_from_root: Vec<PathNode>,
    /// The attribute is a collection
    pub multiple_valued: bool,
    /// Target types that are ordered values
    pub dv_ordered_types: BTreeSet<String>,
    /// The structure node can reuse its parent's join
    pub skippable: bool,
    /// The node carries an archetype id predicate
    pub archetype_node: bool,
}

impl NodeInfo {
    pub fn new(category: NodeCategory) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    pub fn with_target_types<'a>(mut self, types: impl IntoIterator<Item = &'a str>) -> Self {
        self.target_types = types.into_iter().map(str::to_string).collect();
        self.dv_ordered_types = self
            .target_types
            .iter()
            .filter(|t| openehr_aql_model::is_dv_ordered(t))
            .cloned()
            .collect();
        self
    }

    pub fn with_path_from_root(mut self, nodes: Vec<PathNode>) -> Self {
        self.path_from_root = nodes;
        self
    }

    pub fn multiple_valued(mut self) -> Self {
        self.multiple_valued = true;
        self
    }

    pub fn skippable(mut self) -> Self {
        self.skippable = true;
        self
    }

    pub fn archetype_node(mut self) -> Self {
        self.archetype_node = true;
        self
    }
}

/// A node of the path cohesion tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCohesionTreeNode {
    /// The attribute this node stands for; `None` for the containment itself
    pub attribute: Option<PathNode>,
    /// All paths passing through this node
    pub paths: Vec<IdentifiedPath>,
    /// Paths ending exactly here
    pub paths_ending_at_node: Vec<IdentifiedPath>,
    pub children: Vec<PathCohesionTreeNode>,
    pub info: NodeInfo,
}

impl PathCohesionTreeNode {
    /// The tree root, standing for the containment
    pub fn root(target_types: &[&str]) -> Self {
        Self {
            attribute: None,
            paths: Vec::new(),
            paths_ending_at_node: Vec::new(),
            children: Vec::new(),
            info: NodeInfo::new(NodeCategory::Structure).with_target_types(target_types.iter().copied()),
        }
    }

    pub fn new(attribute: PathNode, info: NodeInfo) -> Self {
        Self {
            attribute: Some(attribute),
            paths: Vec::new(),
            paths_ending_at_node: Vec::new(),
            children: Vec::new(),
            info,
        }
    }

    /// Add a child; its paths also pass through this node
    pub fn with_child(mut self, child: PathCohesionTreeNode) -> Self {
        for p in &child.paths {
            if !self.paths.contains(p) {
                self.paths.push(p.clone());
            }
        }
        self.children.push(child);
        self
    }

    /// Register a path ending at this node
    pub fn with_path_ending(mut self, path: IdentifiedPath) -> Self {
        if !self.paths.contains(&path) {
            self.paths.push(path.clone());
        }
        self.paths_ending_at_node.push(path);
        self
    }

    pub fn is_root(&self) -> bool {
        self.attribute.is_none()
    }

    pub fn category(&self) -> Result<NodeCategory> {
        self.info.category.ok_or_else(|| {
            AqlError::unsupported(
                ASL0009,
                format!("Path node {} has no category", self.attribute_name()),
            )
        })
    }

    pub fn attribute_name(&self) -> &str {
        self.attribute.as_ref().map(|a| a.attribute.as_str()).unwrap_or("")
    }

    /// Determine how this node needs to be joined
    pub fn join_mode(&self) -> Result<JoinMode> {
        if self.is_root() {
            return Ok(JoinMode::Root);
        }
        let mut structure_children = 0;
        let mut has_data = !self.paths_ending_at_node.is_empty();
        for child in &self.children {
            if child.category()?.is_data() {
                has_data = true;
            } else {
                structure_children += 1;
            }
        }
        if has_data {
            return Ok(JoinMode::Data);
        }
        match structure_children {
            0 => Err(AqlError::unsupported(
                ASL0009,
                format!("Internal node without children: {}", self.attribute_name()),
            )),
            1 => Ok(JoinMode::InternalSingleChild),
            _ => Ok(JoinMode::InternalFork),
        }
    }
}

/// Path cohesion analysis of one containment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathInfo {
    pub cohesion_tree_root: PathCohesionTreeNode,
}

impl PathInfo {
    pub fn new(cohesion_tree_root: PathCohesionTreeNode) -> Self {
        Self { cohesion_tree_root }
    }
}
