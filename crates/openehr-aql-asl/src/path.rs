//! Path compilation
//!
//! Every path cohesion tree is walked top-down. Structure nodes become structure queries
//! joined to their parent along the path; RM objects and primitives below a structure
//! node are read from the JSON data of that row, or from a dedicated column if the path
//! is an extracted column. The result maps each identified path to the field holding
//! its value.

use crate::condition::{ReduceOperator, predicates, reduce};
use crate::from::{ContainsMap, OwnerProvider, owner_provider};
use crate::structure::{
    ENTITY_ATTRIBUTE, StructureQueryDef, find_field_for_owner, path_child_conditions, provided_field,
    structure_of, structure_predicate_condition,
};
use crate::{
    AliasProvider, AslCondition, AslConditionOperator, AslExtractedColumn, AslField, AslJoin, AslJoinCondition,
    AslQuery, AslRootQuery, AslValue, ColumnField, ComplexExtractedColumnField, ConstantField, ConstantValue,
    ContainerQuery, FieldSource, FieldType, FilteringQuery, JoinType, PathDataQuery, QueryId, QueryKind,
    RmObjectDataQuery, RmPathField, SourceRelation, StructureColumn, SubqueryField,
};
use indexmap::{IndexMap, IndexSet};
use openehr_aql_ast::{
    AndOperatorPredicate, AqlObjectPath, AqlQueryWrapper, ComparisonOperatorPredicate, ConditionWrapper,
    IdentifiedPath, JoinMode, NodeCategory, PathCohesionTreeNode, PathNode, Primitive,
};
use openehr_aql_diagnostics::{
    ASL0002, ASL0003, ASL0005, ASL0009, ASL0100, ASL0101, ASL0102, ASL0103, ASL0201, AqlError, Result,
};
use openehr_aql_model::{AUDIT_DETAILS, EHR, MetadataResolver, ORIGINAL_VERSION, RmTypeAndConcept, STRING};
use std::collections::BTreeSet;

/// The field holding the value of each identified path
pub type PathFieldMap = IndexMap<IdentifiedPath, AslField>;

/// A tree node that yields a value, with the queries it is read from
#[derive(Debug)]
enum DataNodeInfo<'n> {
    /// The value is stored in a column of the parent structure query
    ExtractedColumn {
        node: &'n PathCohesionTreeNode,
        parent: OwnerProvider,
        provider: QueryId,
        extracted_column: AslExtractedColumn,
    },
    /// The value is part of the JSON data of the parent structure query
    JsonRm {
        node: &'n PathCohesionTreeNode,
        parent: Option<OwnerProvider>,
        provider: QueryId,
        path_in_json: Vec<PathNode>,
        multiple_valued: bool,
        /// Nodes read from the elements of this (multiple-valued) node
        dependents: Vec<DataNodeInfo<'n>>,
        dv_ordered_types: BTreeSet<String>,
        field_type: FieldType,
    },
    /// The whole RM object of a structure row
    StructureRm {
        node: &'n PathCohesionTreeNode,
        parent: OwnerProvider,
        provider: QueryId,
    },
}

impl<'n> DataNodeInfo<'n> {
    fn node(&self) -> &'n PathCohesionTreeNode {
        match self {
            DataNodeInfo::ExtractedColumn { node, .. }
            | DataNodeInfo::JsonRm { node, .. }
            | DataNodeInfo::StructureRm { node, .. } => node,
        }
    }

    fn provider(&self) -> QueryId {
        match self {
            DataNodeInfo::ExtractedColumn { provider, .. }
            | DataNodeInfo::JsonRm { provider, .. }
            | DataNodeInfo::StructureRm { provider, .. } => *provider,
        }
    }
}

/// Where a structure node of a cohesion tree is joined to
#[derive(Debug, Clone, Copy)]
struct StructureWalk {
    /// The container the node's queries are added to
    query: QueryId,
    parent: OwnerProvider,
    /// `None` for the tree root
    parent_join_mode: Option<JoinMode>,
    relation: SourceRelation,
    /// The query through which data of the node is addressed from the root query
    root_provider: QueryId,
    /// Index of the node's path segment; `None` for the tree root
    level: Option<usize>,
}

pub struct PathCompiler<'a> {
    aliases: &'a mut AliasProvider,
    metadata: &'a dyn MetadataResolver,
    system_id: &'a str,
}

impl<'a> PathCompiler<'a> {
    pub fn new(aliases: &'a mut AliasProvider, metadata: &'a dyn MetadataResolver, system_id: &'a str) -> Self {
        Self {
            aliases,
            metadata,
            system_id,
        }
    }

    /// Add the queries reading all paths of the query and return the field of each path
    pub fn add_path_queries(
        &mut self,
        root: &mut AslRootQuery,
        query: &AqlQueryWrapper,
        contains: &ContainsMap,
    ) -> Result<PathFieldMap> {
        let mut fields = PathFieldMap::new();
        self.add_ehr_fields(root, query, contains, &mut fields)?;

        let mut data_nodes = Vec::new();
        for (id, info) in &query.path_infos {
            let containment = query
                .contains(*id)
                .ok_or_else(|| AqlError::unresolved(ASL0102, format!("Unknown containment {id}"), id.to_string()))?;
            if containment.rm_type() == EHR {
                return Err(AqlError::unsupported(
                    ASL0002,
                    "Only paths within [EHR_STATUS,COMPOSITION,FOLDER,CLUSTER] are supported",
                ));
            }
            let parent = owner_provider(contains, *id)?;
            let relation = structure_of(root, parent.owner)?.relation;
            let walk = StructureWalk {
                query: QueryId::ROOT,
                parent,
                parent_join_mode: None,
                relation,
                root_provider: parent.provider,
                level: None,
            };
            self.join_path_structure_node(root, walk, &info.cohesion_tree_root, &mut data_nodes)?;
        }

        for node in data_nodes {
            self.add_queries_for_data_node(root, node, None, &mut fields)?;
        }
        Ok(fields)
    }

    fn add_ehr_fields(
        &mut self,
        root: &AslRootQuery,
        query: &AqlQueryWrapper,
        contains: &ContainsMap,
        fields: &mut PathFieldMap,
    ) -> Result<()> {
        let mut paths: Vec<&IdentifiedPath> = query
            .non_primitive_selects()
            .filter_map(|s| s.identified_path())
            .collect();
        if let Some(condition) = &query.where_condition {
            comparison_paths(condition, &mut paths);
        }
        paths.extend(query.order_by.iter().map(|o| &o.path));

        let ehr_paths: IndexSet<&IdentifiedPath> = paths
            .into_iter()
            .filter(|p| query.contains(p.root).is_some_and(|c| c.rm_type() == EHR))
            .collect();

        for path in ehr_paths {
            let extracted_column = path
                .path
                .as_ref()
                .and_then(|p| AslExtractedColumn::find(EHR, p))
                .ok_or_else(|| unknown_path(path))?;
            let ehr = owner_provider(contains, path.root)?;
            // the EHR is a direct child of the root query, its fields are read there
            let source = FieldSource::new(ehr.owner, ehr.provider, QueryId::ROOT);
            let field = extracted_column_field(root, extracted_column, source, self.system_id)?;
            fields.insert(path.clone(), field);
        }
        Ok(())
    }

    // ========================================================================
    // Structure nodes
    // ========================================================================

    fn join_path_structure_node<'n>(
        &mut self,
        root: &mut AslRootQuery,
        walk: StructureWalk,
        node: &'n PathCohesionTreeNode,
        data_nodes: &mut Vec<DataNodeInfo<'n>>,
    ) -> Result<()> {
        let join_mode = node.join_mode()?;
        let skippable = node.info.skippable;

        let (current, current_query, root_provider) = if join_mode == JoinMode::Root || skippable {
            (walk.parent, walk.query, walk.root_provider)
        } else {
            let sq = self.path_structure_sub_query(root, node, walk.relation)?;
            if walk.parent_join_mode == Some(JoinMode::InternalSingleChild) {
                let current_query = add_internal_path_node(root, walk.query, walk.parent, sq, node)?;
                (OwnerProvider::of(sq), current_query, walk.root_provider)
            } else {
                let eq = self.add_encapsulating_path_node(root, &walk, sq, node)?;
                let root_provider = if walk.parent_join_mode == Some(JoinMode::Root) {
                    eq
                } else {
                    walk.root_provider
                };
                (OwnerProvider::of(sq), eq, root_provider)
            }
        };

        if !skippable {
            self.add_filters_to_path_node_subquery(root, node, walk.level, current.owner)?;
        }

        let represents_version = root
            .structure(current.owner)
            .is_some_and(|s| s.represents_original_version_expression);
        for child in &node.children {
            if represents_version && child.info.target_types.contains(AUDIT_DETAILS) {
                // VERSION.commit_audit
                self.join_audit_details_paths(root, current_query, current, child, root_provider, data_nodes)?;
                continue;
            }
            match child.category()? {
                NodeCategory::Structure => {
                    let child_walk = StructureWalk {
                        query: current_query,
                        parent: current,
                        parent_join_mode: Some(join_mode),
                        relation: walk.relation,
                        root_provider,
                        level: Some(walk.level.map_or(0, |l| l + 1)),
                    };
                    self.join_path_structure_node(root, child_walk, child, data_nodes)?;
                }
                category @ (NodeCategory::StructureIntermediate | NodeCategory::FoundationExtended) => {
                    return Err(unexpected_category(child, category));
                }
                NodeCategory::RmType => {
                    data_nodes.extend(join_rm_type_node(root, child, Some(current), root_provider, 1)?);
                }
                NodeCategory::Foundation => {
                    data_nodes.extend(join_foundation_node(root, child, Some(current), root_provider, 1));
                }
            }
        }

        // the node only yields an RM object if a path actually ends here
        if matches!(join_mode, JoinMode::Root | JoinMode::Data) && !node.paths_ending_at_node.is_empty() {
            data_nodes.push(DataNodeInfo::StructureRm {
                node,
                parent: current,
                provider: root_provider,
            });
        }
        Ok(())
    }

    fn path_structure_sub_query(
        &mut self,
        root: &mut AslRootQuery,
        node: &PathCohesionTreeNode,
        relation: SourceRelation,
    ) -> Result<QueryId> {
        let attribute = node
            .attribute
            .as_ref()
            .ok_or_else(|| AqlError::unsupported(ASL0009, "Structure node without attribute"))?;
        let alias = self.aliases.unique_alias(&format!("p_{}_", attribute.attribute));

        root.push_with(|id| {
            let source = FieldSource::with_owner(id);
            let data_table = relation.data_table();
            let mut fields: Vec<AslField> = StructureColumn::ALL
                .iter()
                .filter(|c| data_table.has_column(c.field_name()))
                .map(|c| c.field(source, false).into())
                .collect();
            fields.push(AslField::column(source, ENTITY_ATTRIBUTE, FieldType::String));

            let mut query = StructureQueryDef {
                alias,
                relation,
                fields,
                rm_types: node.info.target_types.iter().cloned().collect(),
                rm_types_constraint: Vec::new(),
                attribute: Some(attribute.attribute.clone()),
                requires_version_table_join: false,
                represents_original_version_expression: false,
                is_root: false,
            }
            .build(id)?;

            let condition = match query.structure() {
                Some(structure) => predicates(&attribute.predicate_or_operands, |p| {
                    path_structure_predicate_condition(p, id, &structure.fields)
                })?,
                None => None,
            };
            if let Some(condition) = condition {
                query.add_condition_and(condition);
            }
            Ok(query)
        })
    }

    fn add_encapsulating_path_node(
        &mut self,
        root: &mut AslRootQuery,
        walk: &StructureWalk,
        sq: QueryId,
        node: &PathCohesionTreeNode,
    ) -> Result<QueryId> {
        let alias = self.aliases.unique_alias("p_eq");
        let eq = root.push(AslQuery::new(alias, QueryKind::Encapsulating(ContainerQuery::default())));
        root.add_child(eq, sq, None)?;

        let parent = walk.parent;
        let parent_provider = if walk.parent_join_mode == Some(JoinMode::Root) {
            parent.provider
        } else {
            parent.owner
        };
        let mut on = path_child_conditions(root, parent_provider, parent.owner, eq, sq)?;
        on.extend(parent_filters_as_join_condition(root, parent, node));
        root.add_child(
            walk.query,
            eq,
            Some(AslJoin::new(parent.provider, JoinType::LeftOuterJoin, eq, on)),
        )?;

        if walk.parent_join_mode == Some(JoinMode::InternalFork) {
            let vo_id = provided_field(root, eq, sq, StructureColumn::VoId.field_name())?;
            root.query_mut(walk.query).add_condition_or(AslCondition::NotNull(vo_id));
        }
        Ok(eq)
    }

    /// Record the predicates of `sq` per path if the paths through the node disagree on them
    fn add_filters_to_path_node_subquery(
        &self,
        root: &mut AslRootQuery,
        node: &PathCohesionTreeNode,
        level: Option<usize>,
        sq: QueryId,
    ) -> Result<()> {
        let attribute_predicate_count = node.attribute.as_ref().map_or(0, PathNode::predicate_count);
        let path_predicates: Vec<(&IdentifiedPath, &[AndOperatorPredicate])> = node
            .paths
            .iter()
            .map(|ip| {
                let predicates = match level {
                    None => ip.root_predicate.as_slice(),
                    Some(l) => ip
                        .path_nodes()
                        .get(l)
                        .map(|n| n.predicate_or_operands.as_slice())
                        .unwrap_or_default(),
                };
                (ip, predicates)
            })
            .collect();

        let count = |predicates: &[AndOperatorPredicate]| predicates.iter().map(|p| p.operands.len()).sum::<usize>();
        if path_predicates
            .iter()
            .all(|(_, p)| count(p) == attribute_predicate_count)
        {
            return Ok(());
        }

        let structure = structure_of(root, sq)?;
        let mut filters = Vec::with_capacity(path_predicates.len());
        for (ip, or_predicates) in path_predicates {
            let condition = predicates(or_predicates, |p| {
                structure_predicate_condition(p, sq, structure, self.metadata)
            })?
            .unwrap_or(AslCondition::True);
            filters.push((ip.clone(), AslJoinCondition::path_filter(sq, condition)));
        }
        if let Some(structure) = root.query_mut(sq).structure_mut() {
            structure.join_conditions_for_filtering.extend(filters);
        }
        Ok(())
    }

    // ========================================================================
    // VERSION.commit_audit
    // ========================================================================

    fn join_audit_details_paths<'n>(
        &mut self,
        root: &mut AslRootQuery,
        query: QueryId,
        parent: OwnerProvider,
        node: &'n PathCohesionTreeNode,
        root_provider: QueryId,
        data_nodes: &mut Vec<DataNodeInfo<'n>>,
    ) -> Result<()> {
        let mut audit_details: Option<OwnerProvider> = None;
        for ending in ending_nodes(node) {
            let Some(path) = ending.paths_ending_at_node.first() else {
                continue;
            };
            let object_path = path.path.as_ref().ok_or_else(|| unknown_path(path))?;
            let extracted_column = AslExtractedColumn::find(ORIGINAL_VERSION, object_path)
                .or_else(|| AslExtractedColumn::find_skipping(AUDIT_DETAILS, object_path, 1))
                .ok_or_else(|| unknown_path(path))?;

            let info = if extracted_column.allows(AUDIT_DETAILS) {
                let audit = match audit_details {
                    Some(audit) => audit,
                    None => {
                        let audit = self.add_audit_details_sub_query(root, query, parent)?;
                        audit_details = Some(audit);
                        audit
                    }
                };
                DataNodeInfo::ExtractedColumn {
                    node: ending,
                    parent: audit,
                    provider: audit.owner,
                    extracted_column,
                }
            } else {
                DataNodeInfo::ExtractedColumn {
                    node: ending,
                    parent,
                    provider: root_provider,
                    extracted_column,
                }
            };
            data_nodes.push(info);
        }
        Ok(())
    }

    fn add_audit_details_sub_query(
        &mut self,
        root: &mut AslRootQuery,
        query: QueryId,
        parent: OwnerProvider,
    ) -> Result<OwnerProvider> {
        let alias = self.aliases.unique_alias("p_ca");
        let audit = root.push_with(|id| {
            let source = FieldSource::with_owner(id);
            StructureQueryDef {
                alias,
                relation: SourceRelation::AuditDetails,
                fields: vec![
                    AslField::column(source, "id", FieldType::Uuid),
                    AslField::column(source, "description", FieldType::String),
                    AslField::column(source, "change_type", FieldType::String),
                ],
                rm_types: vec![AUDIT_DETAILS.to_string()],
                rm_types_constraint: vec![AUDIT_DETAILS.to_string()],
                attribute: None,
                requires_version_table_join: false,
                represents_original_version_expression: false,
                is_root: false,
            }
            .build(id)
        })?;

        let condition = AslCondition::field_field(
            provided_field(root, parent.owner, parent.owner, StructureColumn::AuditId.field_name())?,
            AslConditionOperator::Eq,
            provided_field(root, audit, audit, "id")?,
        );
        root.add_child(
            query,
            audit,
            Some(AslJoin::new(
                parent.provider,
                JoinType::Join,
                audit,
                vec![AslJoinCondition::Delegating(condition)],
            )),
        )?;
        Ok(OwnerProvider::of(audit))
    }

    // ========================================================================
    // Data nodes
    // ========================================================================

    fn add_queries_for_data_node(
        &mut self,
        root: &mut AslRootQuery,
        info: DataNodeInfo<'_>,
        parent_path_data: Option<QueryId>,
        fields: &mut PathFieldMap,
    ) -> Result<()> {
        let node = info.node();
        let provider = info.provider();
        match info {
            DataNodeInfo::ExtractedColumn {
                parent,
                provider,
                extracted_column,
                ..
            } => {
                let source = FieldSource::new(parent.owner, provider, QueryId::ROOT);
                let field = extracted_column_field(root, extracted_column, source, self.system_id)?;
                insert_for_ending_paths(fields, node, field);
            }
            DataNodeInfo::JsonRm {
                parent,
                provider,
                path_in_json,
                multiple_valued,
                dependents,
                dv_ordered_types,
                field_type,
                ..
            } => {
                let (base, provider) = match parent_path_data {
                    Some(pd) => (pd, pd),
                    None => {
                        let parent = parent.ok_or_else(|| {
                            AqlError::unsupported(ASL0009, "JSON path node without structure parent")
                        })?;
                        (parent.owner, provider)
                    }
                };
                let field = if multiple_valued {
                    let alias = self.aliases.unique_alias("pd");
                    let pd = if parent_path_data.is_none() {
                        // unnest only after structure based filters applied to the whole array
                        let array = root.push(AslQuery::new(
                            format!("{alias}_array"),
                            QueryKind::PathData(PathDataQuery {
                                base,
                                base_provider: provider,
                                path_in_json,
                                multiple_valued: false,
                                dv_ordered_types: dv_ordered_types.clone(),
                                field_type: FieldType::Jsonb,
                            }),
                        ));
                        root.add_child(
                            QueryId::ROOT,
                            array,
                            Some(AslJoin::new(provider, JoinType::LeftOuterJoin, array, Vec::new())),
                        )?;
                        let pd = root.push(AslQuery::new(
                            alias,
                            QueryKind::PathData(PathDataQuery {
                                base: array,
                                base_provider: array,
                                path_in_json: Vec::new(),
                                multiple_valued: true,
                                dv_ordered_types,
                                field_type,
                            }),
                        ));
                        root.add_child(
                            QueryId::ROOT,
                            pd,
                            Some(AslJoin::new(array, JoinType::LeftOuterJoin, pd, Vec::new())),
                        )?;
                        pd
                    } else {
                        let pd = root.push(AslQuery::new(
                            alias,
                            QueryKind::PathData(PathDataQuery {
                                base,
                                base_provider: provider,
                                path_in_json,
                                multiple_valued: true,
                                dv_ordered_types,
                                field_type,
                            }),
                        ));
                        root.add_child(
                            QueryId::ROOT,
                            pd,
                            Some(AslJoin::new(provider, JoinType::LeftOuterJoin, pd, Vec::new())),
                        )?;
                        pd
                    };
                    let field = root
                        .select(pd)
                        .into_iter()
                        .next()
                        .ok_or_else(|| AqlError::unsupported(ASL0009, "Path data query without field"))?;
                    for dependent in dependents {
                        self.add_queries_for_data_node(root, dependent, Some(pd), fields)?;
                    }
                    field
                } else if !dependents.is_empty() {
                    return Err(AqlError::unsupported(
                        ASL0009,
                        "Only multiple-valued JSON path nodes can have dependent nodes",
                    ));
                } else {
                    let AslField::Column(src_field) = find_field_for_owner("data", &root.select(provider), base)? else {
                        return Err(no_column("data"));
                    };
                    AslField::RmPath(RmPathField {
                        source: src_field.source.with_provider(QueryId::ROOT),
                        src_field,
                        path_in_json,
                        dv_ordered_types,
                        field_type,
                    })
                };
                insert_for_ending_paths(fields, node, field);
            }
            DataNodeInfo::StructureRm { parent, provider, .. } => {
                let alias = self.aliases.unique_alias("pd");
                let data_query = root.push(AslQuery::new(
                    alias,
                    QueryKind::RmObjectData(RmObjectDataQuery {
                        base: parent.owner,
                        base_provider: provider,
                    }),
                ));
                let field = AslField::Subquery(SubqueryField {
                    source: FieldSource::with_owner(data_query).with_provider(QueryId::ROOT),
                    base_query: data_query,
                    filter_conditions: Vec::new(),
                    field_type: FieldType::Jsonb,
                });
                insert_for_ending_paths(fields, node, field);
            }
        }

        for path in &node.paths_ending_at_node {
            self.add_filter_query_if_required(root, provider, path, fields)?;
        }
        Ok(())
    }

    /// Apply deferred path predicates to the field of `path`
    fn add_filter_query_if_required(
        &mut self,
        root: &mut AslRootQuery,
        provider: QueryId,
        path: &IdentifiedPath,
        fields: &mut PathFieldMap,
    ) -> Result<()> {
        let mut candidates: Vec<QueryId> = root
            .children(QueryId::ROOT)
            .iter()
            .filter(|c| c.query == provider)
            .filter_map(|c| c.join.as_ref().map(|j| j.left))
            .collect();
        candidates.push(provider);

        let mut conditions = Vec::new();
        for candidate in candidates {
            filtering_conditions(root, candidate, path, &mut conditions);
        }
        let conditions: Vec<AslJoinCondition> = conditions
            .into_iter()
            .filter(|jc| !jc.condition().is_some_and(AslCondition::is_true))
            .map(|jc| jc.with_left_provider(QueryId::ROOT))
            .collect();
        if conditions.is_empty() {
            return Ok(());
        }

        let Some(field) = fields.get_mut(path) else {
            return Ok(());
        };
        if let AslField::Subquery(subquery) = field {
            subquery.filter_conditions = conditions;
            return Ok(());
        }

        let (owner, internal_provider) = match field.source() {
            Some(source) => (source.owner, source.internal_provider),
            None => {
                return Err(AqlError::unsupported(
                    ASL0009,
                    format!("Cannot filter the ownerless field of {path}"),
                ));
            }
        };
        let alias = self.aliases.unique_alias(&format!("{}_f", root.query(owner).alias));
        let filtering = root.push(AslQuery::new(
            alias,
            QueryKind::Filtering(FilteringQuery {
                source_field: field.clone(),
            }),
        ));
        root.add_child(
            QueryId::ROOT,
            filtering,
            Some(AslJoin::new(
                internal_provider,
                JoinType::LeftOuterJoin,
                filtering,
                conditions,
            )),
        )?;
        if let Some(filtered) = root.select(filtering).into_iter().next() {
            *field = filtered;
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn unknown_path(path: &IdentifiedPath) -> AqlError {
    AqlError::unresolved(ASL0100, format!("Unsupported path {path}"), path.to_string())
}

fn no_column(name: &str) -> AqlError {
    AqlError::unresolved(ASL0103, format!("No column for {name}"), name)
}

fn unexpected_category(node: &PathCohesionTreeNode, category: NodeCategory) -> AqlError {
    AqlError::unsupported(
        ASL0003,
        format!("Unexpected {category:?} node {}", node.attribute_name()),
    )
}

/// Left operands of all comparisons in a WHERE tree
fn comparison_paths<'q>(condition: &'q ConditionWrapper, acc: &mut Vec<&'q IdentifiedPath>) {
    match condition {
        ConditionWrapper::Logical { operands, .. } => operands.iter().for_each(|c| comparison_paths(c, acc)),
        ConditionWrapper::Comparison(c) => acc.push(&c.left),
    }
}

/// Nodes of the subtree with paths ending at them, in pre-order
fn ending_nodes(node: &PathCohesionTreeNode) -> Vec<&PathCohesionTreeNode> {
    let mut acc = Vec::new();
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if !n.paths_ending_at_node.is_empty() {
            acc.push(n);
        }
        stack.extend(n.children.iter().rev());
    }
    acc
}

fn insert_for_ending_paths(fields: &mut PathFieldMap, node: &PathCohesionTreeNode, field: AslField) {
    for path in &node.paths_ending_at_node {
        fields.insert(path.clone(), field.clone());
    }
}

/// Deferred path filters of `id` for `path`, looking into encapsulated queries
fn filtering_conditions(root: &AslRootQuery, id: QueryId, path: &IdentifiedPath, acc: &mut Vec<AslJoinCondition>) {
    match &root.query(id).kind {
        QueryKind::Structure(s) => acc.extend(s.join_conditions_for_filtering.get(path).cloned()),
        QueryKind::Encapsulating(c) => {
            for child in &c.children {
                filtering_conditions(root, child.query, path, acc);
            }
        }
        _ => {}
    }
}

/// Deferred filters of the parent that apply to every path through `node`
fn parent_filters_as_join_condition(
    root: &AslRootQuery,
    parent: OwnerProvider,
    node: &PathCohesionTreeNode,
) -> Option<AslJoinCondition> {
    let structure = root.structure(parent.owner)?;
    let conditions: Vec<AslCondition> = structure
        .join_conditions_for_filtering
        .iter()
        .filter(|(path, _)| node.paths.contains(path))
        .filter_map(|(_, jc)| jc.condition().cloned())
        .collect();
    reduce(ReduceOperator::Or, conditions)
        .filter(|c| !c.is_true())
        .map(|c| AslJoinCondition::path_filter(parent.owner, c))
}

fn add_internal_path_node(
    root: &mut AslRootQuery,
    query: QueryId,
    parent: OwnerProvider,
    sq: QueryId,
    node: &PathCohesionTreeNode,
) -> Result<QueryId> {
    let mut on: Vec<AslJoinCondition> = parent_filters_as_join_condition(root, parent, node).into_iter().collect();
    on.extend(path_child_conditions(root, parent.provider, parent.owner, sq, sq)?);
    root.add_child(query, sq, Some(AslJoin::new(parent.provider, JoinType::Join, sq, on)))?;
    Ok(query)
}

fn path_structure_predicate_condition(
    predicate: &ComparisonOperatorPredicate,
    id: QueryId,
    fields: &[AslField],
) -> Result<AslCondition> {
    let unexpected = || {
        AqlError::unsupported(
            ASL0005,
            format!("Unexpected attribute predicate {predicate}"),
        )
    };
    let Primitive::String(value) = &predicate.value else {
        return Err(unexpected());
    };
    if predicate.path == AqlObjectPath::archetype_node_id() {
        let rm_type_and_concept = RmTypeAndConcept::from_archetype_node_id(value)
            .ok_or_else(|| AqlError::invalid_value(ASL0201, "Invalid archetype node id", value.as_str()))?;
        Ok(AslCondition::field_value(
            AslField::archetype_node_id(FieldSource::with_owner(id)),
            AslConditionOperator::Eq,
            vec![AslValue::RmTypeAndConcept(rm_type_and_concept)],
        ))
    } else if predicate.path == AqlObjectPath::name_value() {
        Ok(AslCondition::field_value(
            find_field_for_owner(StructureColumn::EntityName.field_name(), fields, id)?,
            AslConditionOperator::Eq,
            vec![AslValue::String(value.clone())],
        ))
    } else {
        Err(unexpected())
    }
}

/// Data nodes of an RM object node and its descendants
fn join_rm_type_node<'n>(
    root: &AslRootQuery,
    node: &'n PathCohesionTreeNode,
    parent: Option<OwnerProvider>,
    provider: QueryId,
    level_in_json: usize,
) -> Result<Vec<DataNodeInfo<'n>>> {
    let multiple_valued = node.info.multiple_valued;
    // elements of a multiple-valued node are addressed relative to the unnested element
    let (next_level, child_parent) = if multiple_valued {
        (1, None)
    } else {
        (level_in_json + 1, parent)
    };

    let mut children = Vec::new();
    for child in &node.children {
        match child.category()? {
            category @ (NodeCategory::Structure | NodeCategory::StructureIntermediate) => {
                return Err(unexpected_category(child, category));
            }
            NodeCategory::RmType | NodeCategory::FoundationExtended => {
                children.extend(join_rm_type_node(root, child, child_parent, provider, next_level)?);
            }
            NodeCategory::Foundation => {
                children.extend(join_foundation_node(root, child, child_parent, provider, next_level));
            }
        }
    }

    if multiple_valued {
        Ok(json_rm_data_node(node, parent, provider, children, level_in_json)
            .into_iter()
            .collect())
    } else {
        let mut nodes: Vec<DataNodeInfo<'n>> = json_rm_data_node(node, parent, provider, Vec::new(), level_in_json)
            .into_iter()
            .collect();
        nodes.extend(children);
        Ok(nodes)
    }
}

/// A primitive node, read from an extracted column if one matches all paths through it
fn join_foundation_node<'n>(
    root: &AslRootQuery,
    node: &'n PathCohesionTreeNode,
    parent: Option<OwnerProvider>,
    provider: QueryId,
    level_in_json: usize,
) -> Option<DataNodeInfo<'n>> {
    let extracted = parent.and_then(|parent| {
        let structure = root.structure(parent.owner)?;
        AslExtractedColumn::ALL
            .iter()
            .copied()
            .filter(|ec| {
                structure.rm_types.iter().any(|t| ec.allows(t))
                    || (structure.represents_original_version_expression && ec.allows(ORIGINAL_VERSION))
            })
            .filter(|ec| ec.path_len() == level_in_json)
            .find(|ec| {
                let ec_path = ec.path();
                node.paths
                    .iter()
                    .all(|p| p.path.as_ref().is_some_and(|path| path.ends_with(&ec_path)))
            })
            .map(|extracted_column| DataNodeInfo::ExtractedColumn {
                node,
                parent,
                provider,
                extracted_column,
            })
    });
    extracted.or_else(|| json_rm_data_node(node, parent, provider, Vec::new(), level_in_json))
}

fn json_rm_data_node<'n>(
    node: &'n PathCohesionTreeNode,
    parent: Option<OwnerProvider>,
    provider: QueryId,
    dependents: Vec<DataNodeInfo<'n>>,
    level_in_json: usize,
) -> Option<DataNodeInfo<'n>> {
    let multiple_valued = node.info.multiple_valued;
    if node.paths_ending_at_node.is_empty() && !multiple_valued {
        return None;
    }
    let path_to_node = &node.info.path_from_root;
    let start = path_to_node.len().saturating_sub(level_in_json);
    let field_type = if node.info.target_types.len() == 1 && node.info.target_types.contains(STRING) {
        FieldType::String
    } else {
        FieldType::Jsonb
    };
    Some(DataNodeInfo::JsonRm {
        node,
        parent,
        provider,
        path_in_json: path_to_node[start..].to_vec(),
        multiple_valued,
        dependents,
        dv_ordered_types: node.info.dv_ordered_types.clone(),
        field_type,
    })
}

/// The field of an extracted column addressed through `source`
pub fn extracted_column_field(
    root: &AslRootQuery,
    extracted_column: AslExtractedColumn,
    source: FieldSource,
    system_id: &str,
) -> Result<AslField> {
    let constant = |value: &str| {
        AslField::Constant(ConstantField {
            source: Some(source),
            value: ConstantValue::String(value.to_string()),
            extracted_column: Some(extracted_column),
        })
    };
    match extracted_column {
        AslExtractedColumn::AdChangeTypeTerminologyIdValue => Ok(constant("openehr")),
        AslExtractedColumn::AdSystemId | AslExtractedColumn::EhrSystemId | AslExtractedColumn::EhrSystemIdDv => {
            Ok(constant(system_id))
        }
        AslExtractedColumn::VoId | AslExtractedColumn::ArchetypeNodeId => {
            Ok(AslField::ComplexExtractedColumn(ComplexExtractedColumnField {
                source,
                extracted_column,
            }))
        }
        AslExtractedColumn::FolderItemId => root
            .select(source.internal_provider)
            .into_iter()
            .find(|f| matches!(f, AslField::FolderItemIdVirtual(v) if v.source.owner == source.owner))
            .map(|f| f.with_provider(source.provider))
            .ok_or_else(|| {
                AqlError::unresolved(
                    ASL0101,
                    format!("No folder item ids for owner '{}'", source.owner),
                    "items/id/value",
                )
            }),
        _ => {
            let name = extracted_column
                .columns()
                .first()
                .ok_or_else(|| no_column(&format!("{extracted_column:?}")))?;
            let field = find_field_for_owner(name, &root.select(source.internal_provider), source.owner)?
                .with_provider(source.provider);
            // a column shared by several extracted columns is tagged with the requested one
            Ok(match field {
                AslField::Column(c) if c.extracted_column.is_none() => {
                    ColumnField::with_extracted_column(c, extracted_column).into()
                }
                other => other,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FromCompiler;
    use openehr_aql_ast::{
        ContainsChain, ContainsWrapper, NodeInfo, PathInfo, RmContainsWrapper, SelectWrapper,
        VersionContainsWrapper,
    };
    use openehr_aql_model::{COMPOSITION, TemplateRegistry};
    use pretty_assertions::assert_eq;

    const SYSTEM_ID: &str = "local.ehrbase.org";

    fn compile(query: &AqlQueryWrapper) -> Result<(AslRootQuery, PathFieldMap)> {
        let mut root = AslRootQuery::new();
        let mut aliases = AliasProvider::new();
        let registry = TemplateRegistry::new();
        let contains = FromCompiler::new(&mut aliases, &registry).add_from_clause(&mut root, query)?;
        let fields = PathCompiler::new(&mut aliases, &registry, SYSTEM_ID).add_path_queries(&mut root, query, &contains)?;
        Ok((root, fields))
    }

    fn composition() -> ContainsChain {
        ContainsChain::new([ContainsWrapper::from(RmContainsWrapper::new(0, COMPOSITION).with_alias("c"))])
    }

    fn node(attribute: PathNode, category: NodeCategory, target: &str, path_from_root: &[PathNode]) -> PathCohesionTreeNode {
        PathCohesionTreeNode::new(
            attribute,
            NodeInfo::new(category)
                .with_target_types([target])
                .with_path_from_root(path_from_root.to_vec()),
        )
    }

    fn attr(name: &str) -> PathNode {
        PathNode::new(name)
    }

    fn observation(node_id: &str) -> PathNode {
        PathNode::new("content").with_predicate(AndOperatorPredicate::archetype_node_id(node_id))
    }

    fn ip(nodes: Vec<PathNode>) -> IdentifiedPath {
        IdentifiedPath::of(0, AqlObjectPath::new(nodes))
    }

    fn aliases_of(root: &AslRootQuery, container: QueryId) -> Vec<String> {
        root.children(container)
            .iter()
            .map(|c| root.query(c.query).alias.clone())
            .collect()
    }

    // === extracted columns and JSON data ===

    #[test]
    fn test_name_value_is_extracted_column() {
        let path = ip(vec![attr("name"), attr("value")]);
        let tree = PathCohesionTreeNode::root(&[COMPOSITION]).with_child(
            node(attr("name"), NodeCategory::RmType, "DV_TEXT", &[attr("name")]).with_child(
                node(attr("value"), NodeCategory::Foundation, STRING, &[attr("name"), attr("value")])
                    .with_path_ending(path.clone()),
            ),
        );
        let query = AqlQueryWrapper::new(composition()).with_path_info(0, PathInfo::new(tree));
        let (root, fields) = compile(&query).unwrap();

        let field = &fields[&path];
        assert_eq!(field.column_name(), Some("entity_name"));
        assert_eq!(field.extracted_column(), Some(AslExtractedColumn::NameValue));
        assert_eq!(field.source(), Some(&FieldSource::new(QueryId(1), QueryId(1), QueryId::ROOT)));
        assert_eq!(root.children(QueryId::ROOT).len(), 1);
    }

    #[test]
    fn test_uid_is_read_from_json() {
        let path = ip(vec![attr("uid")]);
        let tree = PathCohesionTreeNode::root(&[COMPOSITION])
            .with_child(node(attr("uid"), NodeCategory::RmType, "HIER_OBJECT_ID", &[attr("uid")]).with_path_ending(path.clone()));
        let query = AqlQueryWrapper::new(composition()).with_path_info(0, PathInfo::new(tree));
        let (_, fields) = compile(&query).unwrap();

        let AslField::RmPath(field) = &fields[&path] else {
            panic!("expected an RM path field, got {:?}", fields[&path]);
        };
        assert_eq!(field.src_field.column_name, "data");
        assert_eq!(field.path_in_json, vec![attr("uid")]);
        assert_eq!(field.field_type, FieldType::Jsonb);
        assert_eq!(field.source, FieldSource::new(QueryId(1), QueryId(1), QueryId::ROOT));
    }

    #[test]
    fn test_territory_code_is_text() {
        let code = [attr("territory"), attr("code_string")];
        let path = ip(code.to_vec());
        let tree = PathCohesionTreeNode::root(&[COMPOSITION]).with_child(
            node(attr("territory"), NodeCategory::RmType, "CODE_PHRASE", &code[..1])
                .with_child(node(attr("code_string"), NodeCategory::Foundation, STRING, &code).with_path_ending(path.clone())),
        );
        let query = AqlQueryWrapper::new(composition()).with_path_info(0, PathInfo::new(tree));
        let (_, fields) = compile(&query).unwrap();

        let AslField::RmPath(field) = &fields[&path] else {
            panic!("expected an RM path field, got {:?}", fields[&path]);
        };
        assert_eq!(fields[&path].extracted_column(), None);
        assert_eq!(field.path_in_json, code.to_vec());
        assert_eq!(field.field_type, FieldType::String);
    }

    #[test]
    fn test_multiple_valued_array_is_unnested() {
        let path = ip(vec![attr("links")]);
        let tree = PathCohesionTreeNode::root(&[COMPOSITION]).with_child(
            PathCohesionTreeNode::new(
                attr("links"),
                NodeInfo::new(NodeCategory::RmType)
                    .with_target_types(["LINK"])
                    .with_path_from_root(vec![attr("links")])
                    .multiple_valued(),
            )
            .with_path_ending(path.clone()),
        );
        let query = AqlQueryWrapper::new(composition()).with_path_info(0, PathInfo::new(tree));
        let (root, fields) = compile(&query).unwrap();

        assert_eq!(aliases_of(&root, QueryId::ROOT), vec!["sCO_c_0", "pd_0_array", "pd_0"]);
        let children = root.children(QueryId::ROOT);
        let array = children[1].query;
        assert!(matches!(&root.query(array).kind, QueryKind::PathData(pd) if !pd.multiple_valued));
        let unnested = children[2].join.as_ref().unwrap();
        assert_eq!(unnested.left, array);
        assert_eq!(unnested.join_type, JoinType::LeftOuterJoin);
        assert_eq!(fields[&path].owner(), Some(children[2].query));
    }

    #[test]
    fn test_dependent_path_reads_unnested_element() {
        let links = [attr("links")];
        let target = [attr("links"), attr("target")];
        let value = [attr("links"), attr("target"), attr("value")];
        let path = ip(value.to_vec());
        let tree = PathCohesionTreeNode::root(&[COMPOSITION]).with_child(
            PathCohesionTreeNode::new(
                attr("links"),
                NodeInfo::new(NodeCategory::RmType)
                    .with_target_types(["LINK"])
                    .with_path_from_root(links.to_vec())
                    .multiple_valued(),
            )
            .with_child(
                node(attr("target"), NodeCategory::RmType, "DV_EHR_URI", &target)
                    .with_child(node(attr("value"), NodeCategory::Foundation, STRING, &value).with_path_ending(path.clone())),
            ),
        );
        let query = AqlQueryWrapper::new(composition()).with_path_info(0, PathInfo::new(tree));
        let (root, fields) = compile(&query).unwrap();

        assert_eq!(aliases_of(&root, QueryId::ROOT), vec!["sCO_c_0", "pd_0_array", "pd_0"]);
        let element = root.children(QueryId::ROOT)[2].query;
        assert!(matches!(&root.query(element).kind,
            QueryKind::PathData(pd) if pd.multiple_valued && pd.path_in_json.is_empty()));

        let AslField::RmPath(field) = &fields[&path] else {
            panic!("expected an RM path field, got {:?}", fields[&path]);
        };
        assert_eq!(field.src_field.column_name, "data");
        assert_eq!(field.src_field.source.owner, element);
        assert_eq!(field.source, FieldSource::new(element, element, QueryId::ROOT));
        assert_eq!(field.path_in_json, vec![attr("target"), attr("value")]);
        assert_eq!(field.field_type, FieldType::String);
    }

    // === structure nodes ===

    #[test]
    fn test_structure_node_is_encapsulated() {
        let path = ip(vec![observation("openEHR-EHR-OBSERVATION.bp.v2")]);
        let tree = PathCohesionTreeNode::root(&[COMPOSITION]).with_child(
            node(
                observation("openEHR-EHR-OBSERVATION.bp.v2"),
                NodeCategory::Structure,
                "OBSERVATION",
                &[observation("openEHR-EHR-OBSERVATION.bp.v2")],
            )
            .with_path_ending(path.clone()),
        );
        let query = AqlQueryWrapper::new(composition()).with_path_info(0, PathInfo::new(tree));
        let (root, fields) = compile(&query).unwrap();

        assert_eq!(aliases_of(&root, QueryId::ROOT), vec!["sCO_c_0", "p_eq_0"]);
        let eq = root.children(QueryId::ROOT)[1].clone();
        let join = eq.join.unwrap();
        assert_eq!(join.left, QueryId(1));
        assert_eq!(join.join_type, JoinType::LeftOuterJoin);

        let sq = root.children(eq.query)[0].query;
        let content = root.query(sq);
        assert_eq!(content.alias, "p_content__0");
        assert!(content.structure_conditions.contains(&AslCondition::field_value(
            AslField::column(FieldSource::with_owner(sq), ENTITY_ATTRIBUTE, FieldType::String),
            AslConditionOperator::Eq,
            vec![AslValue::String("c".to_string())],
        )));
        assert_eq!(
            content.condition,
            Some(AslCondition::field_value(
                AslField::archetype_node_id(FieldSource::with_owner(sq)),
                AslConditionOperator::Eq,
                vec![AslValue::RmTypeAndConcept(
                    RmTypeAndConcept::from_archetype_node_id("openEHR-EHR-OBSERVATION.bp.v2").unwrap()
                )],
            ))
        );

        let AslField::Subquery(field) = &fields[&path] else {
            panic!("expected a subquery field");
        };
        assert_eq!(root.query(field.base_query).alias, "pd_0");
        assert!(matches!(&root.query(field.base_query).kind,
            QueryKind::RmObjectData(d) if d.base == sq && d.base_provider == eq.query));
    }

    #[test]
    fn test_internal_single_child_is_inner_joined() {
        let section = PathNode::new("content").with_predicate(AndOperatorPredicate::archetype_node_id(
            "openEHR-EHR-SECTION.vital_signs.v1",
        ));
        let items = PathNode::new("items").with_predicate(AndOperatorPredicate::archetype_node_id(
            "openEHR-EHR-OBSERVATION.bp.v2",
        ));
        let path = ip(vec![section.clone(), items.clone()]);
        let tree = PathCohesionTreeNode::root(&[COMPOSITION]).with_child(
            node(section.clone(), NodeCategory::Structure, "SECTION", &[section.clone()]).with_child(
                node(items.clone(), NodeCategory::Structure, "OBSERVATION", &[section, items])
                    .with_path_ending(path.clone()),
            ),
        );
        let query = AqlQueryWrapper::new(composition()).with_path_info(0, PathInfo::new(tree));
        let (root, _) = compile(&query).unwrap();

        let eq = root.children(QueryId::ROOT)[1].query;
        assert_eq!(aliases_of(&root, eq), vec!["p_content__0", "p_items__0"]);
        let inner = root.children(eq)[1].join.as_ref().unwrap();
        assert_eq!(inner.join_type, JoinType::Join);
        assert_eq!(inner.left, root.children(eq)[0].query);
    }

    #[test]
    fn test_fork_requires_one_branch() {
        let section = PathNode::new("content").with_predicate(AndOperatorPredicate::archetype_node_id(
            "openEHR-EHR-SECTION.vital_signs.v1",
        ));
        let items = |node_id: &str| {
            PathNode::new("items").with_predicate(AndOperatorPredicate::archetype_node_id(node_id))
        };
        let bp = items("openEHR-EHR-OBSERVATION.bp.v2");
        let pulse = items("openEHR-EHR-OBSERVATION.pulse.v1");
        let branch = |items: &PathNode| {
            node(items.clone(), NodeCategory::Structure, "OBSERVATION", &[section.clone(), items.clone()])
                .with_path_ending(ip(vec![section.clone(), items.clone()]))
        };
        let tree = PathCohesionTreeNode::root(&[COMPOSITION]).with_child(
            node(section.clone(), NodeCategory::Structure, "SECTION", &[section.clone()])
                .with_child(branch(&bp))
                .with_child(branch(&pulse)),
        );
        let query = AqlQueryWrapper::new(composition()).with_path_info(0, PathInfo::new(tree));
        let (root, _) = compile(&query).unwrap();

        let fork = root.children(QueryId::ROOT)[1].query;
        assert_eq!(aliases_of(&root, fork), vec!["p_content__0", "p_eq_1", "p_eq_2"]);
        let branches = &root.children(fork)[1..];
        for b in branches {
            assert_eq!(b.join.as_ref().map(|j| j.join_type), Some(JoinType::LeftOuterJoin));
        }
        let vo_id = |eq: QueryId| {
            let sq = root.children(eq)[0].query;
            AslCondition::NotNull(provided_field(&root, eq, sq, StructureColumn::VoId.field_name()).unwrap())
        };
        assert_eq!(
            root.query(fork).condition,
            Some(AslCondition::Or(vec![vo_id(branches[0].query), vo_id(branches[1].query)]))
        );
    }

    #[test]
    fn test_differing_predicates_add_filtering_query() {
        let bp = "openEHR-EHR-OBSERVATION.bp.v2";
        let named = PathNode::new("content").with_predicate(AndOperatorPredicate::new([
            ComparisonOperatorPredicate::archetype_node_id(bp),
            ComparisonOperatorPredicate::name_value("Blood pressure"),
        ]));
        let plain = ip(vec![observation(bp), attr("name"), attr("value")]);
        let filtered = ip(vec![named, attr("name"), attr("value")]);
        let tree = PathCohesionTreeNode::root(&[COMPOSITION]).with_child(
            node(observation(bp), NodeCategory::Structure, "OBSERVATION", &[observation(bp)]).with_child(
                node(attr("name"), NodeCategory::RmType, "DV_TEXT", &[observation(bp), attr("name")]).with_child(
                    node(
                        attr("value"),
                        NodeCategory::Foundation,
                        STRING,
                        &[observation(bp), attr("name"), attr("value")],
                    )
                    .with_path_ending(plain.clone())
                    .with_path_ending(filtered.clone()),
                ),
            ),
        );
        let query = AqlQueryWrapper::new(composition()).with_path_info(0, PathInfo::new(tree));
        let (root, fields) = compile(&query).unwrap();

        let provider_alias = |path: &IdentifiedPath| root.query(fields[path].provider().unwrap()).alias.clone();
        assert_eq!(provider_alias(&plain), "p_content__0_f_0");
        assert_eq!(provider_alias(&filtered), "p_content__0_f_1");

        let filtering = root.children(QueryId::ROOT).last().unwrap();
        let join = filtering.join.as_ref().unwrap();
        assert_eq!(root.query(join.left).alias, "p_eq_0");
        assert!(matches!(&join.on[0],
            AslJoinCondition::PathFilter { left_provider, condition: AslCondition::And(ops), .. }
                if *left_provider == QueryId::ROOT && ops.len() == 2));
    }

    // === VERSION and EHR ===

    #[test]
    fn test_commit_audit_paths() {
        let time_committed = IdentifiedPath::of(
            0,
            AqlObjectPath::attributes(["commit_audit", "time_committed", "value"]),
        );
        let change_type = IdentifiedPath::of(0, AqlObjectPath::attributes(["commit_audit", "change_type", "value"]));
        let audit = [attr("commit_audit")];
        let tree = PathCohesionTreeNode::root(&[ORIGINAL_VERSION]).with_child(
            node(attr("commit_audit"), NodeCategory::RmType, AUDIT_DETAILS, &audit)
                .with_child(
                    node(attr("time_committed"), NodeCategory::RmType, "DV_DATE_TIME", &[]).with_child(
                        node(attr("value"), NodeCategory::Foundation, STRING, &[]).with_path_ending(time_committed.clone()),
                    ),
                )
                .with_child(
                    node(attr("change_type"), NodeCategory::RmType, "DV_CODED_TEXT", &[]).with_child(
                        node(attr("value"), NodeCategory::Foundation, STRING, &[]).with_path_ending(change_type.clone()),
                    ),
                ),
        );
        let chain = ContainsChain::new([ContainsWrapper::from(
            VersionContainsWrapper::new(0, RmContainsWrapper::new(1, COMPOSITION).with_alias("c")).with_alias("v"),
        )]);
        let query = AqlQueryWrapper::new(chain).with_path_info(0, PathInfo::new(tree));
        let (root, fields) = compile(&query).unwrap();

        let committed = &fields[&time_committed];
        assert_eq!(committed.column_name(), Some("sys_period_lower"));
        assert_eq!(committed.extracted_column(), Some(AslExtractedColumn::OvTimeCommitted));
        assert_eq!(committed.owner(), Some(QueryId(1)));

        assert_eq!(aliases_of(&root, QueryId::ROOT), vec!["sCO_c_0", "p_ca_0"]);
        let changed = &fields[&change_type];
        assert_eq!(changed.column_name(), Some("change_type"));
        assert_eq!(changed.extracted_column(), Some(AslExtractedColumn::AdChangeTypeValue));
        let audit_join = root.children(QueryId::ROOT)[1].join.as_ref().unwrap();
        assert_eq!(audit_join.join_type, JoinType::Join);
        assert_eq!(audit_join.left, QueryId(1));
    }

    #[test]
    fn test_ehr_fields() {
        let ehr_id = IdentifiedPath::of(0, AqlObjectPath::attributes(["ehr_id", "value"]));
        let system_id = IdentifiedPath::of(0, AqlObjectPath::attributes(["system_id", "value"]));
        let chain = ContainsChain::new([
            ContainsWrapper::from(RmContainsWrapper::new(0, EHR).with_alias("e")),
            ContainsWrapper::from(RmContainsWrapper::new(1, COMPOSITION).with_alias("c")),
        ]);
        let query = AqlQueryWrapper::new(chain)
            .with_select(SelectWrapper::path(ehr_id.clone()))
            .with_where(ConditionWrapper::comparison(
                system_id.clone(),
                openehr_aql_ast::ComparisonOperator::Eq,
                vec![Primitive::string(SYSTEM_ID)],
            ));
        let (root, fields) = compile(&query).unwrap();

        let ehr = root.children(QueryId::ROOT)[0].query;
        assert_eq!(root.structure(ehr).map(|s| s.relation), Some(SourceRelation::Ehr));
        assert_eq!(fields[&ehr_id].source(), Some(&FieldSource::new(ehr, ehr, QueryId::ROOT)));
        assert_eq!(fields[&ehr_id].column_name(), Some("id"));
        assert_eq!(fields[&ehr_id].extracted_column(), Some(AslExtractedColumn::EhrId));
        assert!(matches!(&fields[&system_id],
            AslField::Constant(ConstantField { value: ConstantValue::String(s), .. }) if s == SYSTEM_ID));
    }

    #[test]
    fn test_paths_below_ehr_are_rejected() {
        let chain = ContainsChain::new([ContainsWrapper::from(RmContainsWrapper::new(0, EHR).with_alias("e"))]);
        let query = AqlQueryWrapper::new(chain).with_path_info(0, PathInfo::new(PathCohesionTreeNode::root(&[EHR])));
        assert_eq!(compile(&query).unwrap_err().code(), ASL0002);
    }

    #[test]
    fn test_unknown_ehr_path() {
        let chain = ContainsChain::new([ContainsWrapper::from(RmContainsWrapper::new(0, EHR).with_alias("e"))]);
        let query = AqlQueryWrapper::new(chain)
            .with_select(SelectWrapper::path(IdentifiedPath::of(0, AqlObjectPath::attributes(["ehr_status"]))));
        assert_eq!(compile(&query).unwrap_err().code(), ASL0100);
    }
}
