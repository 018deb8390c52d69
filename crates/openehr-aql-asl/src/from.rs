//! FROM clause compilation
//!
//! Every containment becomes a structure query joined to the query of its parent
//! containment. OR operands with nested chains are isolated in an encapsulating query
//! so the outer left join does not leak into them. Branches below an OR get explicit
//! existence conditions on the root query.

use crate::condition::{ReduceOperator, and, predicates, reduce};
use crate::structure::{
    EHR_ID_COLUMN, StructureQueryDef, descendant_join_conditions, find_field_for_owner, provided_field,
    structure_predicate_condition,
};
use crate::{
    AliasProvider, AslCondition, AslConditionOperator, AslExtractedColumn, AslField, AslJoin, AslJoinCondition,
    AslQuery, AslRootQuery, AslValue, ColumnField, ContainerQuery, FOLDER_ITEM_ID_FIELD, FieldSource, FieldType,
    FolderItemIdVirtualField, JoinType, QueryId, QueryKind, SourceRelation, StructureColumn,
};
use indexmap::IndexMap;
use openehr_aql_ast::{
    AqlQueryWrapper, ContainmentSetOperator, ContainsChain, ContainsId, ContainsSetOperation, ContainsWrapper,
    RmContainsWrapper,
};
use openehr_aql_diagnostics::{ASL0008, ASL0009, ASL0102, AqlError, Result};
use openehr_aql_model::{
    AncestorStructureRmType, COMPOSITION, EHR, EHR_STATUS, FOLDER, MetadataResolver, StructureRmType, rm_type_alias,
};
use serde::Serialize;

/// The structure query defining a containment and the query it is reachable through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OwnerProvider {
    pub owner: QueryId,
    pub provider: QueryId,
}

impl OwnerProvider {
    pub(crate) fn of(id: QueryId) -> Self {
        Self {
            owner: id,
            provider: id,
        }
    }
}

/// Owner and provider of every containment of the FROM clause
pub type ContainsMap = IndexMap<ContainsId, OwnerProvider>;

/// Look up a containment, failing for containments the FROM clause did not declare
pub fn owner_provider(map: &ContainsMap, id: ContainsId) -> Result<OwnerProvider> {
    map.get(&id)
        .copied()
        .ok_or_else(|| AqlError::unresolved(ASL0102, format!("Unknown containment {id}"), id.to_string()))
}

pub struct FromCompiler<'a> {
    aliases: &'a mut AliasProvider,
    metadata: &'a dyn MetadataResolver,
}

impl<'a> FromCompiler<'a> {
    pub fn new(aliases: &'a mut AliasProvider, metadata: &'a dyn MetadataResolver) -> Self {
        Self { aliases, metadata }
    }

    /// Add a structure query per containment to the root query
    pub fn add_from_clause(&mut self, root: &mut AslRootQuery, query: &AqlQueryWrapper) -> Result<ContainsMap> {
        let mut map = ContainsMap::new();
        let chain = &query.contains_chain;
        self.add_contains_chain(root, QueryId::ROOT, None, chain, false, &mut map)?;

        if let Some(condition) = contains_condition(root, chain, false, &map)? {
            root.query_mut(QueryId::ROOT).add_condition_and(condition);
        }
        Ok(map)
    }

    fn add_contains_chain(
        &mut self,
        root: &mut AslRootQuery,
        container: QueryId,
        last_parent: Option<QueryId>,
        chain: &ContainsChain,
        use_left_join: bool,
        map: &mut ContainsMap,
    ) -> Result<()> {
        let mut parent = last_parent;
        for (i, descriptor) in chain.chain.iter().enumerate() {
            let next = chain.chain.get(i + 1);
            parent = Some(self.add_contains_subquery(root, container, use_left_join, map, descriptor, next, parent)?);
        }

        if let Some(operation) = &chain.trailing_set_operation {
            let parent = parent.ok_or_else(|| {
                AqlError::unsupported(ASL0009, "Set operation in FROM without a containing class")
            })?;
            self.add_set_operation(root, container, operation, use_left_join, map, parent)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn add_contains_subquery(
        &mut self,
        root: &mut AslRootQuery,
        container: QueryId,
        use_left_join: bool,
        map: &mut ContainsMap,
        descriptor: &ContainsWrapper,
        next: Option<&ContainsWrapper>,
        parent: Option<QueryId>,
    ) -> Result<QueryId> {
        let (used, is_original_version) = match descriptor {
            ContainsWrapper::Rm(rm) => (rm, false),
            ContainsWrapper::Version(v) => (&v.child, true),
        };

        let parent_relation = parent.and_then(|p| root.structure(p)).map(|s| s.relation);
        let relation = source_relation(&used.rm_type, parent_relation)?;

        let requires_version_join = if is_original_version || parent_relation == Some(SourceRelation::Ehr) {
            true
        } else if parent_relation == Some(SourceRelation::Folder) && relation == SourceRelation::Composition {
            // a selected c/uid/value needs sys_version from the version table
            true
        } else if parent.is_some() || relation == SourceRelation::Ehr {
            false
        } else {
            StructureRmType::by_type_name(&used.rm_type).is_some_and(|t| t.is_structure_root())
        };
        let folder_contains_composition =
            matches!(next, Some(ContainsWrapper::Rm(rm)) if rm.rm_type == COMPOSITION);

        let id = self.contains_subquery(
            root,
            used,
            relation,
            requires_version_join,
            is_original_version,
            folder_contains_composition,
        )?;

        let join = match parent {
            Some(parent) if !root.children(container).is_empty() => {
                let join_type = if use_left_join {
                    JoinType::LeftOuterJoin
                } else {
                    JoinType::Join
                };
                Some(AslJoin::new(parent, join_type, id, join_conditions(root, parent, id)?))
            }
            _ => None,
        };
        root.add_child(container, id, join)?;

        map.insert(used.id, OwnerProvider::of(id));
        if is_original_version {
            map.insert(descriptor.id(), OwnerProvider::of(id));
        }
        Ok(id)
    }

    fn contains_subquery(
        &mut self,
        root: &mut AslRootQuery,
        contains: &RmContainsWrapper,
        relation: SourceRelation,
        requires_version_join: bool,
        is_original_version: bool,
        folder_contains_composition: bool,
    ) -> Result<QueryId> {
        let rm_type = contains.rm_type.as_str();
        // e.g. "sCO_c_0"
        let alias = self.aliases.unique_alias(&format!(
            "s{}{}",
            rm_type_alias(rm_type).unwrap_or(rm_type),
            contains.alias.as_deref().map(|a| format!("_{a}")).unwrap_or_default()
        ));

        let (rm_types, is_root) = if rm_type == EHR {
            (vec![EHR.to_string()], false)
        } else {
            let rm_types = match AncestorStructureRmType::by_type_name(rm_type) {
                Some(ancestor) => {
                    let mut names: Vec<String> = Vec::new();
                    for descendant in ancestor.descendants() {
                        if !names.iter().any(|n| n == descendant.name()) {
                            names.push(descendant.name().to_string());
                        }
                    }
                    names
                }
                None => vec![rm_type.to_string()],
            };
            // FOLDER may be root, but is recursive
            (rm_types, rm_type == EHR_STATUS || rm_type == COMPOSITION)
        };

        let metadata = self.metadata;
        root.push_with(|id| {
            let fields = contains_fields(contains, relation, requires_version_join, folder_contains_composition, id);
            let mut query = StructureQueryDef {
                alias,
                relation,
                fields,
                rm_types_constraint: if is_root { Vec::new() } else { rm_types.clone() },
                rm_types,
                attribute: None,
                requires_version_table_join: requires_version_join,
                represents_original_version_expression: is_original_version,
                is_root,
            }
            .build(id)?;

            let mut conditions = Vec::new();
            if let Some(structure) = query.structure() {
                if let Some(c) = predicates(&contains.predicate, |p| {
                    structure_predicate_condition(p, id, structure, metadata)
                })? {
                    conditions.push(c);
                }
                if is_root {
                    conditions.push(AslCondition::field_value(
                        find_field_for_owner(StructureColumn::Num.field_name(), &structure.fields, id)?,
                        AslConditionOperator::Eq,
                        vec![AslValue::Integer(0)],
                    ));
                }
            }
            for condition in conditions {
                query.add_condition_and(condition);
            }
            Ok(query)
        })
    }

    fn add_set_operation(
        &mut self,
        root: &mut AslRootQuery,
        container: QueryId,
        operation: &ContainsSetOperation,
        use_left_join: bool,
        map: &mut ContainsMap,
        parent: QueryId,
    ) -> Result<()> {
        let is_or = operation.operator == ContainmentSetOperator::Or;
        for operand in &operation.operands {
            if is_or && operand.size() > 1 {
                let or_query = self.or_operand_query(root, parent, operand, map)?;
                let first = root
                    .children(or_query)
                    .first()
                    .map(|c| c.query)
                    .ok_or_else(|| AqlError::unsupported(ASL0009, "Empty OR operand in FROM"))?;
                let on = descendant_join_conditions(root, parent, parent, or_query, first)?;
                root.add_child(
                    container,
                    or_query,
                    Some(AslJoin::new(parent, JoinType::LeftOuterJoin, or_query, on)),
                )?;
            } else {
                self.add_contains_chain(root, container, Some(parent), operand, use_left_join || is_or, map)?;
            }
        }
        Ok(())
    }

    fn or_operand_query(
        &mut self,
        root: &mut AslRootQuery,
        parent: QueryId,
        operand: &ContainsChain,
        map: &mut ContainsMap,
    ) -> Result<QueryId> {
        let alias = self.aliases.unique_alias("or_sq");
        let or_query = root.push(AslQuery::new(alias, QueryKind::Encapsulating(ContainerQuery::default())));

        let mut operand_map = ContainsMap::new();
        self.add_contains_chain(root, or_query, Some(parent), operand, false, &mut operand_map)?;
        if let Some(condition) = contains_condition(root, operand, false, &operand_map)? {
            root.query_mut(or_query).structure_conditions.push(condition);
        }

        for (contains, op) in operand_map {
            map.insert(
                contains,
                OwnerProvider {
                    owner: op.owner,
                    provider: or_query,
                },
            );
        }
        Ok(or_query)
    }
}

/// The relation a containment reads from; types that do not determine one inherit it from the parent
fn source_relation(rm_type: &str, parent: Option<SourceRelation>) -> Result<SourceRelation> {
    if rm_type == EHR {
        return Ok(SourceRelation::Ehr);
    }
    StructureRmType::by_type_name(rm_type)
        .and_then(|t| t.structure_root())
        .or_else(|| AncestorStructureRmType::by_type_name(rm_type).and_then(|a| a.structure_root()))
        .map(SourceRelation::from_structure_root)
        .or(parent)
        .ok_or_else(|| {
            AqlError::unsupported(
                ASL0008,
                format!("Cannot determine the source relation of {rm_type}"),
            )
        })
}

fn join_conditions(root: &AslRootQuery, parent: QueryId, child: QueryId) -> Result<Vec<AslJoinCondition>> {
    let relations = (
        root.structure(parent).map(|s| s.relation),
        root.structure(child).map(|s| s.relation),
    );
    if relations == (Some(SourceRelation::Folder), Some(SourceRelation::Composition)) {
        return Ok(vec![AslJoinCondition::FolderItem {
            left_owner: parent,
            left_provider: parent,
            right_owner: child,
            right_provider: child,
        }]);
    }
    descendant_join_conditions(root, parent, parent, child, child)
}

fn contains_fields(
    contains: &RmContainsWrapper,
    relation: SourceRelation,
    requires_version_join: bool,
    folder_contains_composition: bool,
    id: QueryId,
) -> Vec<AslField> {
    let source = FieldSource::with_owner(id);
    if contains.rm_type == EHR {
        return vec![
            ColumnField::new(source, EHR_ID_COLUMN, FieldType::Uuid)
                .with_extracted_column(AslExtractedColumn::EhrId)
                .into(),
            AslField::column(source, "creation_date", FieldType::OffsetDateTime),
        ];
    }

    let pkey = relation.pkey_fields();
    let mut fields: Vec<AslField> = StructureColumn::ALL
        .iter()
        .filter(|c| requires_version_join || c.is_from_data_table() || pkey.contains(&c.field_name()))
        .filter_map(|c| {
            let from_version_table = requires_version_join && c.is_from_version_table();
            let table = if from_version_table {
                relation.version_table()
            } else {
                Some(relation.data_table())
            };
            table
                .filter(|t| t.has_column(c.field_name()))
                .map(|_| c.field(source, from_version_table).into())
        })
        .collect();

    // the version's root_concept mirrors entity_concept of the COMPOSITION row
    if requires_version_join && contains.rm_type == COMPOSITION {
        fields.push(
            ColumnField::new(source, "root_concept", FieldType::String)
                .in_version_table(true)
                .with_extracted_column(AslExtractedColumn::RootConcept)
                .into(),
        );
    }
    if contains.rm_type == FOLDER && folder_contains_composition {
        fields.push(AslField::FolderItemIdVirtual(FolderItemIdVirtualField {
            source,
            field_name: FOLDER_ITEM_ID_FIELD.to_string(),
        }));
    }
    fields
}

/// Existence conditions for containments below an OR
fn contains_condition(
    root: &AslRootQuery,
    chain: &ContainsChain,
    below_or: bool,
    map: &ContainsMap,
) -> Result<Option<AslCondition>> {
    if !below_or && !chain.has_trailing_set_operation() {
        return Ok(None);
    }

    let mut conditions = Vec::new();
    if below_or {
        for contains in &chain.chain {
            let op = owner_provider(map, contains.id())?;
            // the first field of a structure query is its key
            let key = root.select(op.provider).into_iter().next().ok_or_else(|| {
                AqlError::unsupported(ASL0009, format!("Containment {} provides no fields", contains.id()))
            })?;
            conditions.push(AslCondition::NotNull(key));
        }
    }

    if let Some(operation) = &chain.trailing_set_operation {
        let is_or = operation.operator == ContainmentSetOperator::Or;
        let mut operand_conditions = Vec::new();
        for operand in &operation.operands {
            if is_or && operand.size() > 1 {
                let first = operand
                    .chain
                    .first()
                    .ok_or_else(|| AqlError::unsupported(ASL0009, "Empty OR operand in FROM"))?;
                let op = owner_provider(map, first.id())?;
                operand_conditions.push(AslCondition::NotNull(provided_field(
                    root,
                    op.provider,
                    op.owner,
                    StructureColumn::VoId.field_name(),
                )?));
            } else if let Some(c) = contains_condition(root, operand, below_or || is_or, map)? {
                operand_conditions.push(c);
            }
        }
        if is_or {
            conditions.extend(reduce(ReduceOperator::Or, operand_conditions));
        } else {
            conditions.extend(operand_conditions);
        }
    }
    Ok(and(conditions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openehr_aql_ast::{AndOperatorPredicate, RmContainsWrapper, VersionContainsWrapper};
    use openehr_aql_model::TemplateRegistry;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn compile(chain: ContainsChain) -> Result<(AslRootQuery, ContainsMap)> {
        let mut root = AslRootQuery::new();
        let mut aliases = AliasProvider::new();
        let registry = TemplateRegistry::new();
        let query = AqlQueryWrapper::new(chain);
        let map = FromCompiler::new(&mut aliases, &registry).add_from_clause(&mut root, &query)?;
        Ok((root, map))
    }

    fn rm(id: u32, rm_type: &str, alias: &str) -> ContainsWrapper {
        RmContainsWrapper::new(id, rm_type).with_alias(alias).into()
    }

    fn join_types(root: &AslRootQuery, container: QueryId) -> Vec<Option<JoinType>> {
        root.children(container)
            .iter()
            .map(|c| c.join.as_ref().map(|j| j.join_type))
            .collect()
    }

    fn has_field(root: &AslRootQuery, id: QueryId, name: &str) -> bool {
        root.select(id).iter().any(|f| f.column_name() == Some(name))
    }

    // === single containments ===

    #[test]
    fn test_composition_with_archetype() {
        let chain = ContainsChain::new([RmContainsWrapper::new(0, COMPOSITION)
            .with_alias("c")
            .with_predicate(AndOperatorPredicate::archetype_node_id("openEHR-EHR-COMPOSITION.report.v1"))
            .into()]);
        let (root, map) = compile(chain).unwrap();

        let op = map[&ContainsId(0)];
        assert_eq!(op, OwnerProvider::of(QueryId(1)));
        let query = root.query(op.owner);
        assert_eq!(query.alias, "sCO_c_0");
        let structure = root.structure(op.owner).unwrap();
        assert!(structure.is_root);
        assert!(structure.requires_version_table_join);
        assert!(has_field(&root, op.owner, "root_concept"));
        assert!(has_field(&root, op.owner, "template_id"));

        let Some(AslCondition::And(conditions)) = &query.condition else {
            panic!("expected predicate AND num condition, got {:?}", query.condition);
        };
        assert_eq!(conditions.len(), 2);
        assert!(matches!(&conditions[1], AslCondition::FieldValue { field, values, .. }
            if field.column_name() == Some("num") && values == &vec![AslValue::Integer(0)]));
        assert!(structure.rm_types.contains(&COMPOSITION.to_string()));
        assert!(root.query(QueryId::ROOT).condition.is_none());
    }

    #[test]
    fn test_ancestor_type_expands_to_descendants() {
        let chain = ContainsChain::new([rm(0, COMPOSITION, "c"), rm(1, "CARE_ENTRY", "e")]);
        let (root, map) = compile(chain).unwrap();
        let entry = root.structure(map[&ContainsId(1)].owner).unwrap();
        assert_eq!(entry.relation, SourceRelation::Composition);
        assert_eq!(entry.rm_types, vec!["ACTION", "EVALUATION", "INSTRUCTION", "OBSERVATION"]);
        assert!(!entry.is_root);
        assert!(!entry.requires_version_table_join);
    }

    #[test]
    fn test_cluster_inherits_parent_relation() {
        let chain = ContainsChain::new([rm(0, "EHR_STATUS", "s"), rm(1, "CLUSTER", "cl")]);
        let (root, map) = compile(chain).unwrap();
        let cluster = root.structure(map[&ContainsId(1)].owner).unwrap();
        assert_eq!(cluster.relation, SourceRelation::EhrStatus);
    }

    #[rstest]
    #[case("DV_TEXT")]
    #[case("ELEMENT_X")]
    fn test_unknown_relation(#[case] rm_type: &str) {
        let err = compile(ContainsChain::new([rm(0, rm_type, "x")])).unwrap_err();
        assert_eq!(err.code(), ASL0008);
    }

    #[test]
    fn test_version_maps_both_containments() {
        let chain = ContainsChain::new([VersionContainsWrapper::new(
            0,
            RmContainsWrapper::new(1, COMPOSITION).with_alias("c"),
        )
        .with_alias("v")
        .into()]);
        let (root, map) = compile(chain).unwrap();
        assert_eq!(map[&ContainsId(0)], map[&ContainsId(1)]);
        let structure = root.structure(map[&ContainsId(0)].owner).unwrap();
        assert!(structure.represents_original_version_expression);
        assert!(has_field(&root, map[&ContainsId(0)].owner, "audit_id"));
    }

    // === chains ===

    #[test]
    fn test_ehr_contains_composition() {
        let chain = ContainsChain::new([rm(0, EHR, "e"), rm(1, COMPOSITION, "c")]);
        let (root, map) = compile(chain).unwrap();
        assert_eq!(join_types(&root, QueryId::ROOT), vec![None, Some(JoinType::Join)]);

        let ehr = map[&ContainsId(0)].owner;
        assert_eq!(root.query(ehr).alias, "sEHR_e_0");
        assert!(has_field(&root, ehr, "id"));
        let comp = root.structure(map[&ContainsId(1)].owner).unwrap();
        assert!(comp.requires_version_table_join);
        assert!(root.query(ehr).condition.is_none());
    }

    #[test]
    fn test_folder_contains_composition() {
        let chain = ContainsChain::new([rm(0, FOLDER, "f"), rm(1, COMPOSITION, "c")]);
        let (root, map) = compile(chain).unwrap();
        let folder = map[&ContainsId(0)].owner;
        assert!(
            root.select(folder)
                .iter()
                .any(|f| matches!(f, AslField::FolderItemIdVirtual(_)))
        );
        let join = root.children(QueryId::ROOT)[1].join.as_ref().unwrap();
        assert!(matches!(join.on[..], [AslJoinCondition::FolderItem { .. }]));
        assert!(root.structure(map[&ContainsId(1)].owner).unwrap().requires_version_table_join);
    }

    // === set operations ===

    #[test]
    fn test_simple_or_operands_are_left_joined() {
        let chain = ContainsChain::new([rm(0, EHR, "e")]).with_set_operation(
            ContainmentSetOperator::Or,
            vec![
                ContainsChain::new([rm(1, COMPOSITION, "c1")]),
                ContainsChain::new([rm(2, COMPOSITION, "c2")]),
            ],
        );
        let (root, map) = compile(chain).unwrap();
        assert_eq!(
            join_types(&root, QueryId::ROOT),
            vec![None, Some(JoinType::LeftOuterJoin), Some(JoinType::LeftOuterJoin)]
        );

        let Some(AslCondition::Or(existence)) = &root.query(QueryId::ROOT).condition else {
            panic!("expected OR of existence checks");
        };
        let owners: Vec<_> = existence
            .iter()
            .map(|c| match c {
                AslCondition::NotNull(f) => f.owner(),
                _ => None,
            })
            .collect();
        assert_eq!(
            owners,
            vec![Some(map[&ContainsId(1)].owner), Some(map[&ContainsId(2)].owner)]
        );
    }

    #[test]
    fn test_chained_or_operand_is_encapsulated() {
        let chain = ContainsChain::new([rm(0, EHR, "e")]).with_set_operation(
            ContainmentSetOperator::Or,
            vec![
                ContainsChain::new([rm(1, COMPOSITION, "c1")]),
                ContainsChain::new([rm(2, FOLDER, "f"), rm(3, COMPOSITION, "c2")]),
            ],
        );
        let (root, map) = compile(chain).unwrap();

        let folder = map[&ContainsId(2)];
        let nested = map[&ContainsId(3)];
        assert_ne!(folder.owner, folder.provider);
        assert_eq!(folder.provider, nested.provider);
        let or_query = root.query(folder.provider);
        assert_eq!(or_query.alias, "or_sq_0");
        assert_eq!(
            join_types(&root, folder.provider),
            vec![None, Some(JoinType::Join)]
        );
        assert_eq!(
            join_types(&root, QueryId::ROOT),
            vec![None, Some(JoinType::LeftOuterJoin), Some(JoinType::LeftOuterJoin)]
        );

        let Some(AslCondition::Or(existence)) = &root.query(QueryId::ROOT).condition else {
            panic!("expected OR of existence checks");
        };
        assert!(matches!(&existence[1], AslCondition::NotNull(f)
            if f.owner() == Some(folder.owner) && f.provider() == Some(folder.provider)));
    }

    #[test]
    fn test_and_operands_are_inner_joined() {
        let chain = ContainsChain::new([rm(0, COMPOSITION, "c")]).with_set_operation(
            ContainmentSetOperator::And,
            vec![
                ContainsChain::new([rm(1, "OBSERVATION", "o")]),
                ContainsChain::new([rm(2, "EVALUATION", "ev")]),
            ],
        );
        let (root, _) = compile(chain).unwrap();
        assert_eq!(
            join_types(&root, QueryId::ROOT),
            vec![None, Some(JoinType::Join), Some(JoinType::Join)]
        );
        assert!(root.query(QueryId::ROOT).condition.is_none());
    }

    #[test]
    fn test_unknown_containment_lookup() {
        let err = owner_provider(&ContainsMap::new(), ContainsId(7)).unwrap_err();
        assert_eq!(err.code(), ASL0102);
    }
}
