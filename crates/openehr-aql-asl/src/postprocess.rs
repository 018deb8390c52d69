//! Post-processing of the built query tree
//!
//! Stages run in ascending [`AslPostProcessor::order`] after the tree is complete and
//! before it is rendered. Every stage must tolerate being applied more than once.

use crate::{
    AslCondition, AslField, AslJoinCondition, AslRootQuery, FOLDER_ITEM_ID_FIELD, QueryId, QueryKind,
    StructureColumn,
};
use log::trace;
use openehr_aql_ast::AqlQueryWrapper;
use openehr_aql_diagnostics::Result;
use std::collections::{BTreeMap, BTreeSet};

/// Order of [`CleanupPostProcessor`]; custom stages before it see all columns
pub const CLEANUP_ORDER: i32 = i32::MAX - 100;

/// A stage rewriting the query tree in place
pub trait AslPostProcessor: Send + Sync {
    /// Stages with a lower order run first
    fn order(&self) -> i32;

    fn after_build(&self, root: &mut AslRootQuery, query: &AqlQueryWrapper) -> Result<()>;
}

/// Removes the columns of structure queries that nothing refers to.
///
/// `vo_id` and `id` are always kept since an empty projection would select every column.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupPostProcessor;

impl AslPostProcessor for CleanupPostProcessor {
    fn order(&self) -> i32 {
        CLEANUP_ORDER
    }

    fn after_build(&self, root: &mut AslRootQuery, _query: &AqlQueryWrapper) -> Result<()> {
        let mut used = UsedFields::default();
        used.collect(root, QueryId::ROOT);

        for (id, names) in used.by_query {
            let alias = root.query(id).alias.clone();
            let Some(structure) = root.query_mut(id).structure_mut() else {
                continue;
            };
            let before = structure.fields.len();
            structure
                .fields
                .retain(|f| f.column_name().is_none_or(|name| names.contains(name)));
            let removed = before - structure.fields.len();
            if removed > 0 {
                trace!("Removed {removed} unused columns from {alias}");
            }
        }
        Ok(())
    }
}

/// Column names referenced per owning query
#[derive(Debug, Default)]
struct UsedFields {
    by_query: BTreeMap<QueryId, BTreeSet<String>>,
}

impl UsedFields {
    fn add_name(&mut self, owner: QueryId, name: &str) {
        self.by_query.entry(owner).or_default().insert(name.to_string());
    }

    fn add_field(&mut self, root: &AslRootQuery, field: &AslField) {
        let Some(owner) = owner_of(root, field) else {
            return;
        };
        let mut names = Vec::new();
        field_names(root, field, &mut names);
        self.by_query.entry(owner).or_default().extend(names);
    }

    fn add_condition(&mut self, root: &AslRootQuery, condition: &AslCondition) {
        for field in condition.fields() {
            self.add_field(root, field);
        }
    }

    fn add_join_condition(&mut self, root: &AslRootQuery, join_condition: &AslJoinCondition) {
        match join_condition {
            AslJoinCondition::Delegating(condition) | AslJoinCondition::PathFilter { condition, .. } => {
                self.add_condition(root, condition);
            }
            AslJoinCondition::FolderItem {
                left_owner,
                right_owner,
                ..
            } => {
                self.add_name(*right_owner, StructureColumn::VoId.field_name());
                self.add_name(*left_owner, FOLDER_ITEM_ID_FIELD);
            }
        }
    }

    fn collect(&mut self, root: &AslRootQuery, id: QueryId) {
        let query = root.query(id);
        match &query.kind {
            QueryKind::Root(container) | QueryKind::Encapsulating(container) => {
                if id == QueryId::ROOT {
                    for field in root
                        .select
                        .iter()
                        .chain(&root.group_by)
                        .chain(root.order_by.iter().map(|o| &o.field))
                    {
                        self.add_field(root, field);
                    }
                }
                for child in &container.children {
                    for on in child.join.iter().flat_map(|j| &j.on) {
                        self.add_join_condition(root, on);
                    }
                }
                for condition in query.condition.iter().chain(&query.structure_conditions) {
                    self.add_condition(root, condition);
                }
                for child in &container.children {
                    self.collect(root, child.query);
                }
            }
            QueryKind::Structure(structure) => {
                self.add_name(id, StructureColumn::VoId.field_name());
                self.add_name(id, "id");
                for join_condition in structure.join_conditions_for_filtering.values() {
                    self.add_join_condition(root, join_condition);
                }
            }
            QueryKind::PathData(pd) => self.add_name(pd.base, StructureColumn::Data.field_name()),
            QueryKind::Filtering(filtering) => self.add_field(root, &filtering.source_field),
            // only reachable through subquery fields
            QueryKind::RmObjectData(_) => {}
        }
    }
}

/// The query whose columns a field reads
fn owner_of(root: &AslRootQuery, field: &AslField) -> Option<QueryId> {
    match field {
        AslField::Subquery(subquery) => data_query_base(root, subquery.base_query),
        AslField::Aggregating(aggregating) => aggregating.base_field.as_deref().and_then(|b| owner_of(root, b)),
        other => other.owner(),
    }
}

fn data_query_base(root: &AslRootQuery, id: QueryId) -> Option<QueryId> {
    match &root.query(id).kind {
        QueryKind::PathData(pd) => Some(pd.base),
        QueryKind::RmObjectData(rod) => Some(rod.base),
        _ => None,
    }
}

fn field_names(root: &AslRootQuery, field: &AslField, acc: &mut Vec<String>) {
    match field {
        AslField::Column(column) => acc.push(column.column_name.clone()),
        AslField::RmPath(path) => acc.push(path.src_field.column_name.clone()),
        AslField::Constant(_) => {}
        AslField::Aggregating(aggregating) => {
            if let Some(base) = &aggregating.base_field {
                field_names(root, base, acc);
            }
        }
        AslField::ComplexExtractedColumn(complex) => {
            acc.extend(complex.extracted_column.columns().iter().map(|c| c.to_string()));
        }
        AslField::Subquery(subquery) => {
            // the subquery correlates on the key and the descendant range of its base row
            if let Some(structure) = data_query_base(root, subquery.base_query).and_then(|b| root.structure(b)) {
                acc.extend(structure.relation.pkey_fields().iter().map(|c| c.to_string()));
            }
            for field in subquery
                .filter_conditions
                .iter()
                .filter_map(AslJoinCondition::condition)
                .flat_map(AslCondition::fields)
            {
                field_names(root, field, acc);
            }
            acc.push(StructureColumn::Num.field_name().to_string());
            acc.push(StructureColumn::NumCap.field_name().to_string());
        }
        AslField::FolderItemIdVirtual(folder) => acc.push(folder.field_name.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AqlSqlLayer;
    use openehr_aql_ast::{
        AqlObjectPath, ContainsChain, ContainsWrapper, IdentifiedPath, NodeCategory, NodeInfo, PathCohesionTreeNode,
        PathInfo, PathNode, Primitive, RmContainsWrapper, SelectWrapper,
    };
    use openehr_aql_model::{COMPOSITION, EHR, STRING, TemplateRegistry};
    use pretty_assertions::assert_eq;

    fn column_names(root: &AslRootQuery, id: QueryId) -> Vec<String> {
        root.select(id)
            .iter()
            .filter_map(|f| f.column_name().map(str::to_string))
            .collect()
    }

    fn compile(query: &AqlQueryWrapper) -> AslRootQuery {
        AqlSqlLayer::new(&TemplateRegistry::new(), "local")
            .build_asl_root_query(query)
            .unwrap()
    }

    fn name_value_query() -> AqlQueryWrapper {
        let path = IdentifiedPath::of(0, AqlObjectPath::attributes(["name", "value"]));
        let tree = PathCohesionTreeNode::root(&[COMPOSITION]).with_child(
            PathCohesionTreeNode::new(
                PathNode::new("name"),
                NodeInfo::new(NodeCategory::RmType)
                    .with_target_types(["DV_TEXT"])
                    .with_path_from_root(vec![PathNode::new("name")]),
            )
            .with_child(
                PathCohesionTreeNode::new(
                    PathNode::new("value"),
                    NodeInfo::new(NodeCategory::Foundation)
                        .with_target_types([STRING])
                        .with_path_from_root(vec![PathNode::new("name"), PathNode::new("value")]),
                )
                .with_path_ending(path.clone()),
            ),
        );
        let chain = ContainsChain::new([ContainsWrapper::from(RmContainsWrapper::new(0, COMPOSITION).with_alias("c"))]);
        AqlQueryWrapper::new(chain)
            .with_path_info(0, PathInfo::new(tree))
            .with_select(SelectWrapper::path(path))
    }

    #[test]
    fn test_keeps_selected_and_key_columns() {
        let query = name_value_query();
        let mut root = compile(&query);
        assert!(column_names(&root, QueryId(1)).len() > 2);

        CleanupPostProcessor.after_build(&mut root, &query).unwrap();
        assert_eq!(column_names(&root, QueryId(1)), vec!["vo_id", "entity_name"]);
    }

    #[test]
    fn test_is_idempotent() {
        let query = name_value_query();
        let mut once = compile(&query);
        CleanupPostProcessor.after_build(&mut once, &query).unwrap();
        let mut twice = once.clone();
        CleanupPostProcessor.after_build(&mut twice, &query).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_join_columns_survive() {
        let chain = ContainsChain::new([
            ContainsWrapper::from(RmContainsWrapper::new(0, EHR).with_alias("e")),
            ContainsWrapper::from(RmContainsWrapper::new(1, COMPOSITION).with_alias("c")),
        ]);
        let query = AqlQueryWrapper::new(chain).with_select(SelectWrapper::primitive(Primitive::Long(1)));
        let mut root = compile(&query);
        CleanupPostProcessor.after_build(&mut root, &query).unwrap();

        assert_eq!(column_names(&root, QueryId(1)), vec!["id"]);
        assert_eq!(column_names(&root, QueryId(2)), vec!["vo_id", "ehr_id"]);
    }
}
