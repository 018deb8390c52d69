//! AQL object paths and their predicates
//!
//! An object path is a `/`-separated list of attributes, each optionally followed by a
//! bracketed predicate: `content[openEHR-EHR-SECTION.vital_signs.v1]/items[at0001, 'Pulse']`.

use crate::{ComparisonOperator, Primitive};
use openehr_aql_diagnostics::{ASL0202, AqlError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::fmt;
use std::str::FromStr;
use winnow::ascii::{Caseless, digit1, multispace0, multispace1};
use winnow::combinator::{alt, delimited, opt, separated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{literal, take_till, take_while};

/// Attribute holding the archetype node id of a LOCATABLE
pub const ARCHETYPE_NODE_ID: &str = "archetype_node_id";

/// An AQL object path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AqlObjectPath {
    nodes: Vec<PathNode>,
}

/// One `/`-separated segment of an object path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathNode {
    /// The RM attribute name
    pub attribute: String,
    /// Predicate alternatives (OR of ANDs); empty if the node has no predicate
    pub predicate_or_operands: Vec<AndOperatorPredicate>,
}

/// A conjunction of comparisons inside a predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AndOperatorPredicate {
    pub operands: SmallVec<[ComparisonOperatorPredicate; 2]>,
}

/// A single `path op value` comparison inside a predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComparisonOperatorPredicate {
    pub path: AqlObjectPath,
    pub operator: ComparisonOperator,
    pub value: Primitive,
}

impl AqlObjectPath {
    pub fn new(nodes: Vec<PathNode>) -> Self {
        Self { nodes }
    }

    /// Parse the textual form of an object path
    pub fn parse(text: &str) -> Result<Self> {
        let mut input = text;
        let nodes = object_path
            .parse_next(&mut input)
            .map_err(|_| AqlError::invalid_value(ASL0202, "Invalid object path", text))?;
        if !input.is_empty() {
            return Err(AqlError::invalid_value(
                ASL0202,
                format!("Unexpected input at '{input}'"),
                text,
            ));
        }
        Ok(Self { nodes })
    }

    /// The `archetype_node_id` path
    pub fn archetype_node_id() -> Self {
        Self::attributes([ARCHETYPE_NODE_ID])
    }

    /// The `name/value` path
    pub fn name_value() -> Self {
        Self::attributes(["name", "value"])
    }

    /// Build a predicate-free path from attribute names
    pub fn attributes<'a>(attributes: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            nodes: attributes.into_iter().map(PathNode::new).collect(),
        }
    }

    pub fn nodes(&self) -> &[PathNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the last nodes of this path equal `suffix`
    pub fn ends_with(&self, suffix: &AqlObjectPath) -> bool {
        self.nodes.ends_with(&suffix.nodes)
    }

    /// The path without its first `n` nodes
    pub fn skip(&self, n: usize) -> AqlObjectPath {
        Self {
            nodes: self.nodes.iter().skip(n).cloned().collect(),
        }
    }

    /// Render the textual form of the path
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl FromStr for AqlObjectPath {
    type Err = AqlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for AqlObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{node}")?;
        }
        Ok(())
    }
}

impl PathNode {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            predicate_or_operands: Vec::new(),
        }
    }

    pub fn with_predicate(mut self, predicate: AndOperatorPredicate) -> Self {
        self.predicate_or_operands.push(predicate);
        self
    }

    pub fn has_predicate(&self) -> bool {
        !self.predicate_or_operands.is_empty()
    }

    /// Total number of comparisons over all predicate alternatives
    pub fn predicate_count(&self) -> usize {
        self.predicate_or_operands.iter().map(|p| p.operands.len()).sum()
    }
}

impl fmt::Display for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.attribute)?;
        if self.has_predicate() {
            f.write_str("[")?;
            for (i, and) in self.predicate_or_operands.iter().enumerate() {
                if i > 0 {
                    f.write_str(" or ")?;
                }
                write!(f, "{and}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

impl AndOperatorPredicate {
    pub fn new(operands: impl IntoIterator<Item = ComparisonOperatorPredicate>) -> Self {
        Self {
            operands: operands.into_iter().collect(),
        }
    }

    /// `archetype_node_id = '<node_id>'`
    pub fn archetype_node_id(node_id: impl Into<String>) -> Self {
        Self {
            operands: smallvec![ComparisonOperatorPredicate::archetype_node_id(node_id)],
        }
    }
}

impl fmt::Display for AndOperatorPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.operands.as_slice();
        // node id shorthand, optionally followed by the name
        if let Some(node_id) = rest.first().and_then(|first| first.shorthand_node_id()) {
            f.write_str(node_id)?;
            rest = &rest[1..];
            if rest.first().is_some_and(|second| second.is_name_value_eq()) {
                write!(f, ", {}", rest[0].value)?;
                rest = &rest[1..];
            }
            if !rest.is_empty() {
                f.write_str(" and ")?;
            }
        }
        for (i, op) in rest.iter().enumerate() {
            if i > 0 {
                f.write_str(" and ")?;
            }
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

impl ComparisonOperatorPredicate {
    pub fn new(path: AqlObjectPath, operator: ComparisonOperator, value: Primitive) -> Self {
        Self { path, operator, value }
    }

    pub fn archetype_node_id(node_id: impl Into<String>) -> Self {
        Self::new(
            AqlObjectPath::archetype_node_id(),
            ComparisonOperator::Eq,
            Primitive::String(node_id.into()),
        )
    }

    pub fn name_value(name: impl Into<String>) -> Self {
        Self::new(
            AqlObjectPath::name_value(),
            ComparisonOperator::Eq,
            Primitive::String(name.into()),
        )
    }

    fn shorthand_node_id(&self) -> Option<&str> {
        (self.operator == ComparisonOperator::Eq && self.path == AqlObjectPath::archetype_node_id())
            .then(|| self.value.as_str())
            .flatten()
    }

    fn is_name_value_eq(&self) -> bool {
        self.operator == ComparisonOperator::Eq
            && self.path == AqlObjectPath::name_value()
            && matches!(self.value, Primitive::String(_))
    }
}

impl fmt::Display for ComparisonOperatorPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.path, self.operator, self.value)
    }
}

// ============================================================================
// Parser
// ============================================================================

fn object_path(input: &mut &str) -> ModalResult<Vec<PathNode>> {
    separated(1.., path_node, '/').parse_next(input)
}

fn path_node(input: &mut &str) -> ModalResult<PathNode> {
    let attribute = identifier.parse_next(input)?;
    let predicate = opt(delimited(('[', multispace0), or_predicate, (multispace0, ']'))).parse_next(input)?;
    Ok(PathNode {
        attribute: attribute.to_string(),
        predicate_or_operands: predicate.unwrap_or_default(),
    })
}

fn identifier<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)
}

fn or_predicate(input: &mut &str) -> ModalResult<Vec<AndOperatorPredicate>> {
    separated(1.., and_predicate, keyword("or")).parse_next(input)
}

fn and_predicate(input: &mut &str) -> ModalResult<AndOperatorPredicate> {
    let groups: Vec<Vec<ComparisonOperatorPredicate>> =
        separated(1.., predicate_atom, keyword("and")).parse_next(input)?;
    Ok(AndOperatorPredicate::new(groups.into_iter().flatten()))
}

fn keyword<'s>(word: &'static str) -> impl Parser<&'s str, &'s str, ErrMode<ContextError>> {
    delimited(multispace1, literal(Caseless(word)), multispace1)
}

fn predicate_atom(input: &mut &str) -> ModalResult<Vec<ComparisonOperatorPredicate>> {
    alt((comparison.map(|c| vec![c]), node_id_shorthand)).parse_next(input)
}

fn comparison(input: &mut &str) -> ModalResult<ComparisonOperatorPredicate> {
    let nodes = object_path.parse_next(input)?;
    let operator = delimited(multispace0, operator, multispace0).parse_next(input)?;
    let value = primitive.parse_next(input)?;
    Ok(ComparisonOperatorPredicate::new(AqlObjectPath::new(nodes), operator, value))
}

fn operator(input: &mut &str) -> ModalResult<ComparisonOperator> {
    alt((
        "<=".value(ComparisonOperator::LtEq),
        ">=".value(ComparisonOperator::GtEq),
        "!=".value(ComparisonOperator::Neq),
        "<>".value(ComparisonOperator::Neq),
        "=".value(ComparisonOperator::Eq),
        "<".value(ComparisonOperator::Lt),
        ">".value(ComparisonOperator::Gt),
    ))
    .parse_next(input)
}

/// `openEHR-EHR-OBSERVATION.bp.v1` or `at0001`, optionally followed by `, 'name'`
fn node_id_shorthand(input: &mut &str) -> ModalResult<Vec<ComparisonOperatorPredicate>> {
    let node_id = take_while(1.., |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .parse_next(input)?;
    let name = opt((multispace0, ',', multispace0, quoted_string).map(|(_, _, _, s)| s)).parse_next(input)?;
    let mut operands = vec![ComparisonOperatorPredicate::archetype_node_id(node_id)];
    if let Some(name) = name {
        operands.push(ComparisonOperatorPredicate::name_value(name));
    }
    Ok(operands)
}

fn primitive(input: &mut &str) -> ModalResult<Primitive> {
    alt((
        quoted_string.map(Primitive::String),
        literal(Caseless("true")).value(Primitive::Boolean(true)),
        literal(Caseless("false")).value(Primitive::Boolean(false)),
        number,
    ))
    .parse_next(input)
}

fn quoted_string(input: &mut &str) -> ModalResult<String> {
    alt((
        delimited('\'', take_till(0.., '\''), '\''),
        delimited('"', take_till(0.., '"'), '"'),
    ))
    .map(str::to_string)
    .parse_next(input)
}

fn number(input: &mut &str) -> ModalResult<Primitive> {
    alt((
        (opt('-'), digit1, '.', digit1)
            .take()
            .try_map(Decimal::from_str)
            .map(Primitive::Decimal),
        (opt('-'), digit1).take().try_map(str::parse::<i64>).map(Primitive::Long),
    ))
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_parse_simple_path() {
        let path = AqlObjectPath::parse("name/value").unwrap();
        assert_eq!(path, AqlObjectPath::name_value());
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn test_parse_archetype_shorthand() {
        let path = AqlObjectPath::parse("content[openEHR-EHR-SECTION.vital_signs.v1]/items").unwrap();
        let first = &path.nodes()[0];
        assert_eq!(first.attribute, "content");
        assert_eq!(
            first.predicate_or_operands,
            vec![AndOperatorPredicate::archetype_node_id("openEHR-EHR-SECTION.vital_signs.v1")]
        );
        assert!(!path.nodes()[1].has_predicate());
    }

    #[test]
    fn test_parse_node_id_with_name() {
        let path = AqlObjectPath::parse("items[at0001, 'Pulse']/value").unwrap();
        let node = &path.nodes()[0];
        assert_eq!(node.predicate_count(), 2);
        assert_eq!(
            node.predicate_or_operands[0].operands[1],
            ComparisonOperatorPredicate::name_value("Pulse")
        );
    }

    #[test]
    fn test_parse_boolean_combinations() {
        let path = AqlObjectPath::parse("items[at0001 and name/value='a' or archetype_node_id='at0002']").unwrap();
        let node = &path.nodes()[0];
        assert_eq!(node.predicate_or_operands.len(), 2);
        assert_eq!(node.predicate_or_operands[0].operands.len(), 2);
        assert_eq!(
            node.predicate_or_operands[1],
            AndOperatorPredicate::archetype_node_id("at0002")
        );
    }

    #[rstest]
    #[case("value/magnitude[x>=5]", Primitive::Long(5), ComparisonOperator::GtEq)]
    #[case("value[magnitude<2.5]", Primitive::Decimal(Decimal::new(25, 1)), ComparisonOperator::Lt)]
    #[case("value[null_flavour!=true]", Primitive::Boolean(true), ComparisonOperator::Neq)]
    fn test_parse_comparison_values(
        #[case] text: &str,
        #[case] value: Primitive,
        #[case] operator: ComparisonOperator,
    ) {
        let path = AqlObjectPath::parse(text).unwrap();
        let predicate = &path.nodes().last().unwrap().predicate_or_operands[0].operands[0];
        assert_eq!(predicate.value, value);
        assert_eq!(predicate.operator, operator);
    }

    #[rstest]
    #[case("")]
    #[case("content[")]
    #[case("a//b")]
    #[case("content[at0001]x")]
    fn test_parse_invalid(#[case] text: &str) {
        let err = AqlObjectPath::parse(text).unwrap_err();
        assert_eq!(err.code(), ASL0202);
    }

    #[rstest]
    #[case("content[openEHR-EHR-SECTION.vital_signs.v1]/items")]
    #[case("items[at0001, 'Pulse']/value/magnitude")]
    #[case("items[at0001 and value/magnitude>5 or at0002]")]
    fn test_render_round_trip(#[case] text: &str) {
        assert_eq!(AqlObjectPath::parse(text).unwrap().render(), text);
    }

    #[test]
    fn test_ends_with_and_skip() {
        let path = AqlObjectPath::parse("context/other_context[at0001]/name/value").unwrap();
        assert!(path.ends_with(&AqlObjectPath::name_value()));
        assert!(!path.ends_with(&AqlObjectPath::archetype_node_id()));
        assert_eq!(path.skip(2).render(), "name/value");
        assert!(path.skip(7).is_empty());
    }
}
