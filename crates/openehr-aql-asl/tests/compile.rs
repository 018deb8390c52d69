//! End-to-end compilation tests
//!
//! Covers:
//! - FROM, SELECT, WHERE, ORDER BY and LIMIT on one query
//! - Template predicates resolved through the metadata resolver
//! - Column cleanup on a compiled tree
//! - JSON form of the compiled tree

use openehr_aql_asl::{
    AqlSqlLayer, AslCondition, AslPostProcessor, AslRootQuery, AslValue, CleanupPostProcessor, JoinType, QueryId,
    QueryKind,
};
use openehr_aql_ast::{
    AndOperatorPredicate, AqlObjectPath, AqlQueryWrapper, ComparisonOperator, ComparisonOperatorPredicate,
    ConditionWrapper, ContainsChain, ContainsWrapper, IdentifiedPath, NodeCategory, NodeInfo, PathCohesionTreeNode,
    PathInfo, PathNode, Primitive, RmContainsWrapper, SelectWrapper, SortDirection,
};
use openehr_aql_diagnostics::{ASL0006, ASL0102, Result};
use openehr_aql_model::{COMPOSITION, EHR, STRING, TemplateRegistry};
use pretty_assertions::assert_eq;
use uuid::Uuid;

const SYSTEM_ID: &str = "local.ehrbase.org";

fn name_value() -> IdentifiedPath {
    IdentifiedPath::of(1, AqlObjectPath::attributes(["name", "value"]))
}

fn name_value_tree() -> PathCohesionTreeNode {
    PathCohesionTreeNode::root(&[COMPOSITION]).with_child(
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
            .with_path_ending(name_value()),
        ),
    )
}

fn template_predicate(operator: ComparisonOperator, template_id: &str) -> AndOperatorPredicate {
    AndOperatorPredicate::new([ComparisonOperatorPredicate::new(
        AqlObjectPath::parse("archetype_details/template_id/value").unwrap(),
        operator,
        Primitive::string(template_id),
    )])
}

/// `SELECT c/name/value FROM EHR e CONTAINS COMPOSITION c[template] WHERE c/name/value = 'Report'
/// ORDER BY c/name/value DESC LIMIT 10 OFFSET 20`
fn report_query(predicate: AndOperatorPredicate) -> AqlQueryWrapper {
    let chain = ContainsChain::new([
        ContainsWrapper::from(RmContainsWrapper::new(0, EHR).with_alias("e")),
        ContainsWrapper::from(
            RmContainsWrapper::new(1, COMPOSITION)
                .with_alias("c")
                .with_predicate(predicate),
        ),
    ]);
    AqlQueryWrapper::new(chain)
        .with_path_info(1, PathInfo::new(name_value_tree()))
        .with_select(SelectWrapper::path(name_value()))
        .with_where(ConditionWrapper::comparison(
            name_value(),
            ComparisonOperator::Eq,
            vec![Primitive::string("Report")],
        ))
        .with_order_by(name_value(), SortDirection::Descending)
        .with_limit(10, Some(20))
}

fn compile(query: &AqlQueryWrapper, registry: &TemplateRegistry) -> Result<AslRootQuery> {
    AqlSqlLayer::new(registry, SYSTEM_ID).build_asl_root_query(query)
}

fn column_names(root: &AslRootQuery, id: QueryId) -> Vec<String> {
    root.select(id)
        .iter()
        .filter_map(|f| f.column_name().map(str::to_string))
        .collect()
}

// === Full Statement ===

#[test]
fn test_report_query_clauses() {
    let uuid = Uuid::new_v4();
    let registry = TemplateRegistry::from_entries([("report.v1".to_string(), uuid)]);
    let root = compile(&report_query(template_predicate(ComparisonOperator::Eq, "report.v1")), &registry).unwrap();

    let children = root.children(QueryId::ROOT);
    let ehr = children[0].query;
    let comp = children[1].query;
    assert!(children[0].join.is_none());
    let join = children[1].join.as_ref().unwrap();
    assert_eq!((join.left, join.join_type), (ehr, JoinType::Join));
    assert!(matches!(root.query(comp).kind, QueryKind::Structure(_)));

    assert_eq!(root.select.len(), 1);
    assert_eq!(root.select[0].column_name(), Some("entity_name"));
    assert_eq!(root.select[0].owner(), Some(comp));
    assert!(root.group_by.is_empty());
    assert_eq!(root.order_by.len(), 1);
    assert_eq!(root.order_by[0].direction, SortDirection::Descending);
    assert_eq!((root.limit, root.offset), (Some(10), Some(20)));

    let Some(AslCondition::FieldValue { field, values, .. }) = &root.query(QueryId::ROOT).condition else {
        panic!("expected the WHERE condition on the root");
    };
    assert_eq!(field.column_name(), Some("entity_name"));
    assert_eq!(values, &vec![AslValue::String("Report".into())]);

    let Some(AslCondition::And(conditions)) = &root.query(comp).condition else {
        panic!("expected predicate and version conditions on the composition");
    };
    assert!(matches!(&conditions[0], AslCondition::FieldValue { values, .. } if values == &vec![AslValue::Uuid(uuid)]));
}

#[test]
fn test_unknown_template_matches_nothing() {
    let root = compile(
        &report_query(template_predicate(ComparisonOperator::Eq, "missing.v1")),
        &TemplateRegistry::new(),
    )
    .unwrap();
    let comp = root.children(QueryId::ROOT)[1].query;
    let Some(AslCondition::And(conditions)) = &root.query(comp).condition else {
        panic!("expected predicate and version conditions on the composition");
    };
    assert_eq!(conditions[0], AslCondition::False);
}

#[test]
fn test_template_like_is_rejected() {
    let err = compile(
        &report_query(template_predicate(ComparisonOperator::Like, "report*")),
        &TemplateRegistry::new(),
    )
    .unwrap_err();
    assert_eq!(err.code(), ASL0006);
}

#[test]
fn test_paths_of_unknown_containment() {
    let query = report_query(AndOperatorPredicate::archetype_node_id("openEHR-EHR-COMPOSITION.report.v1"))
        .with_path_info(7, PathInfo::new(name_value_tree()));
    let err = compile(&query, &TemplateRegistry::new()).unwrap_err();
    assert_eq!(err.code(), ASL0102);
}

#[test]
fn test_compilation_is_deterministic() {
    let query = report_query(AndOperatorPredicate::archetype_node_id("openEHR-EHR-COMPOSITION.report.v1"));
    let registry = TemplateRegistry::new();
    assert_eq!(compile(&query, &registry).unwrap(), compile(&query, &registry).unwrap());
}

// === Cleanup ===

#[test]
fn test_cleanup_keeps_referenced_columns() {
    let query = report_query(AndOperatorPredicate::archetype_node_id("openEHR-EHR-COMPOSITION.report.v1"));
    let mut root = compile(&query, &TemplateRegistry::new()).unwrap();
    CleanupPostProcessor.after_build(&mut root, &query).unwrap();

    let children = root.children(QueryId::ROOT);
    let (ehr, comp) = (children[0].query, children[1].query);
    assert_eq!(column_names(&root, ehr), vec!["id"]);

    let comp_columns = column_names(&root, comp);
    for kept in ["vo_id", "ehr_id", "entity_name"] {
        assert!(comp_columns.iter().any(|c| c == kept), "{kept} missing from {comp_columns:?}");
    }
    assert!(!comp_columns.iter().any(|c| c == "template_id" || c == "sys_version"));
}

// === JSON ===

#[test]
fn test_tree_serializes_to_json() {
    let query = report_query(AndOperatorPredicate::archetype_node_id("openEHR-EHR-COMPOSITION.report.v1"));
    let root = compile(&query, &TemplateRegistry::new()).unwrap();
    let json = serde_json::to_value(&root).unwrap();

    assert_eq!(json["limit"], 10);
    assert_eq!(json["offset"], 20);
    assert_eq!(json["queries"][0]["alias"], "root");
    assert_eq!(json["queries"].as_array().map(Vec::len), Some(root.len()));
    assert_eq!(json["select"].as_array().map(Vec::len), Some(1));
}
