//! openEHR reference model catalog
//!
//! Type names, the structure types that are stored as rows of the versioned-object
//! tables, their abstract ancestors and the short aliases used in the database.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Type name constants
// ============================================================================

pub const EHR: &str = "EHR";
pub const EHR_STATUS: &str = "EHR_STATUS";
pub const COMPOSITION: &str = "COMPOSITION";
pub const FOLDER: &str = "FOLDER";
pub const ORIGINAL_VERSION: &str = "ORIGINAL_VERSION";
pub const AUDIT_DETAILS: &str = "AUDIT_DETAILS";
pub const STRING: &str = "STRING";

pub const DV_DATE: &str = "DV_DATE";
pub const DV_TIME: &str = "DV_TIME";
pub const DV_DATE_TIME: &str = "DV_DATE_TIME";
pub const DV_DURATION: &str = "DV_DURATION";
pub const DV_ORDINAL: &str = "DV_ORDINAL";
pub const DV_SCALE: &str = "DV_SCALE";
pub const DV_PROPORTION: &str = "DV_PROPORTION";
pub const DV_COUNT: &str = "DV_COUNT";
pub const DV_QUANTITY: &str = "DV_QUANTITY";

/// Ordered value types whose magnitude is numeric
pub const NUMERIC_DV_ORDERED_TYPES: [&str; 5] = [DV_ORDINAL, DV_SCALE, DV_PROPORTION, DV_COUNT, DV_QUANTITY];

/// Ordered value types whose magnitude is derived from a temporal value
pub const TEMPORAL_DV_ORDERED_TYPES: [&str; 4] = [DV_DATE, DV_TIME, DV_DATE_TIME, DV_DURATION];

/// Check if a type is a concrete ordered value type
pub fn is_dv_ordered(rm_type: &str) -> bool {
    NUMERIC_DV_ORDERED_TYPES.contains(&rm_type) || TEMPORAL_DV_ORDERED_TYPES.contains(&rm_type)
}

/// Check if a type is one of the numeric ordered value types
pub fn is_numeric_dv_ordered(rm_type: &str) -> bool {
    NUMERIC_DV_ORDERED_TYPES.contains(&rm_type)
}

// ============================================================================
// Structure roots
// ============================================================================

/// The versioned object types that own a tree of structure rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructureRoot {
    Composition,
    Folder,
    EhrStatus,
}

impl StructureRoot {
    pub fn type_name(&self) -> &'static str {
        match self {
            StructureRoot::Composition => COMPOSITION,
            StructureRoot::Folder => FOLDER,
            StructureRoot::EhrStatus => EHR_STATUS,
        }
    }
}

// ============================================================================
// Structure RM types
// ============================================================================

/// RM types that are stored as individual rows of a versioned object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructureRmType {
    Composition,
    Folder,
    EhrStatus,
    EventContext,
    Section,
    GenericEntry,
    AdminEntry,
    Observation,
    Instruction,
    Action,
    Evaluation,
    InstructionDetails,
    Activity,
    History,
    PointEvent,
    IntervalEvent,
    FeederAudit,
    FeederAuditDetails,
    ItemList,
    ItemSingle,
    ItemTable,
    ItemTree,
    Cluster,
    Element,
}

impl StructureRmType {
    /// All structure types in declaration order
    pub const ALL: [StructureRmType; 24] = [
        StructureRmType::Composition,
        StructureRmType::Folder,
        StructureRmType::EhrStatus,
        StructureRmType::EventContext,
        StructureRmType::Section,
        StructureRmType::GenericEntry,
        StructureRmType::AdminEntry,
        StructureRmType::Observation,
        StructureRmType::Instruction,
        StructureRmType::Action,
        StructureRmType::Evaluation,
        StructureRmType::InstructionDetails,
        StructureRmType::Activity,
        StructureRmType::History,
        StructureRmType::PointEvent,
        StructureRmType::IntervalEvent,
        StructureRmType::FeederAudit,
        StructureRmType::FeederAuditDetails,
        StructureRmType::ItemList,
        StructureRmType::ItemSingle,
        StructureRmType::ItemTable,
        StructureRmType::ItemTree,
        StructureRmType::Cluster,
        StructureRmType::Element,
    ];

    /// The RM type name
    pub fn name(&self) -> &'static str {
        match self {
            StructureRmType::Composition => COMPOSITION,
            StructureRmType::Folder => FOLDER,
            StructureRmType::EhrStatus => EHR_STATUS,
            StructureRmType::EventContext => "EVENT_CONTEXT",
            StructureRmType::Section => "SECTION",
            StructureRmType::GenericEntry => "GENERIC_ENTRY",
            StructureRmType::AdminEntry => "ADMIN_ENTRY",
            StructureRmType::Observation => "OBSERVATION",
            StructureRmType::Instruction => "INSTRUCTION",
            StructureRmType::Action => "ACTION",
            StructureRmType::Evaluation => "EVALUATION",
            StructureRmType::InstructionDetails => "INSTRUCTION_DETAILS",
            StructureRmType::Activity => "ACTIVITY",
            StructureRmType::History => "HISTORY",
            StructureRmType::PointEvent => "POINT_EVENT",
            StructureRmType::IntervalEvent => "INTERVAL_EVENT",
            StructureRmType::FeederAudit => "FEEDER_AUDIT",
            StructureRmType::FeederAuditDetails => "FEEDER_AUDIT_DETAILS",
            StructureRmType::ItemList => "ITEM_LIST",
            StructureRmType::ItemSingle => "ITEM_SINGLE",
            StructureRmType::ItemTable => "ITEM_TABLE",
            StructureRmType::ItemTree => "ITEM_TREE",
            StructureRmType::Cluster => "CLUSTER",
            StructureRmType::Element => "ELEMENT",
        }
    }

    /// The database alias stored in `rm_entity`
    pub fn alias(&self) -> &'static str {
        match self {
            StructureRmType::Composition => "CO",
            StructureRmType::Folder => "F",
            StructureRmType::EhrStatus => "ES",
            StructureRmType::EventContext => "EC",
            StructureRmType::Section => "SE",
            StructureRmType::GenericEntry => "GE",
            StructureRmType::AdminEntry => "AE",
            StructureRmType::Observation => "OB",
            StructureRmType::Instruction => "IN",
            StructureRmType::Action => "AN",
            StructureRmType::Evaluation => "EV",
            StructureRmType::InstructionDetails => "ID",
            StructureRmType::Activity => "AY",
            StructureRmType::History => "HI",
            StructureRmType::PointEvent => "PE",
            StructureRmType::IntervalEvent => "IE",
            StructureRmType::FeederAudit => "FA",
            StructureRmType::FeederAuditDetails => "FD",
            StructureRmType::ItemList => "IL",
            StructureRmType::ItemSingle => "IS",
            StructureRmType::ItemTable => "TA",
            StructureRmType::ItemTree => "TR",
            StructureRmType::Cluster => "CL",
            StructureRmType::Element => "E",
        }
    }

    /// The only versioned object type that can contain this structure, if unique.
    ///
    /// Types with a structure root may stand alone in a CONTAINS clause.
    pub fn structure_root(&self) -> Option<StructureRoot> {
        match self {
            StructureRmType::Composition
            | StructureRmType::EventContext
            | StructureRmType::Section
            | StructureRmType::GenericEntry
            | StructureRmType::AdminEntry
            | StructureRmType::Observation
            | StructureRmType::Instruction
            | StructureRmType::Action
            | StructureRmType::Evaluation
            | StructureRmType::InstructionDetails
            | StructureRmType::Activity
            | StructureRmType::History
            | StructureRmType::PointEvent
            | StructureRmType::IntervalEvent => Some(StructureRoot::Composition),
            StructureRmType::Folder => Some(StructureRoot::Folder),
            StructureRmType::EhrStatus => Some(StructureRoot::EhrStatus),
            StructureRmType::FeederAudit
            | StructureRmType::FeederAuditDetails
            | StructureRmType::ItemList
            | StructureRmType::ItemSingle
            | StructureRmType::ItemTable
            | StructureRmType::ItemTree
            | StructureRmType::Cluster
            | StructureRmType::Element => None,
        }
    }

    /// Whether this type is the root object of a versioned object
    pub fn is_structure_root(&self) -> bool {
        matches!(
            self,
            StructureRmType::Composition | StructureRmType::Folder | StructureRmType::EhrStatus
        )
    }

    /// Whether rows of this type are stored as separate structure entries
    pub fn is_structure_entry(&self) -> bool {
        !matches!(
            self,
            StructureRmType::InstructionDetails | StructureRmType::FeederAuditDetails
        )
    }

    /// Whether the RM type is a LOCATABLE (has archetype node id and name)
    pub fn is_locatable(&self) -> bool {
        !matches!(
            self,
            StructureRmType::EventContext
                | StructureRmType::FeederAudit
                | StructureRmType::InstructionDetails
                | StructureRmType::FeederAuditDetails
        )
    }

    /// Look up a structure type by its RM type name
    pub fn by_type_name(name: &str) -> Option<StructureRmType> {
        STRUCTURE_BY_NAME.get(name).copied()
    }

    /// Look up a structure type by its database alias
    pub fn by_alias(alias: &str) -> Option<StructureRmType> {
        Self::ALL.iter().copied().find(|t| t.alias() == alias)
    }

    /// Alias of a structure type name, or the name itself for other types
    pub fn alias_or_type_name(type_name: &str) -> &str {
        Self::by_type_name(type_name)
            .map(|t| t.alias())
            .unwrap_or(type_name)
    }
}

impl fmt::Display for StructureRmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static STRUCTURE_BY_NAME: Lazy<HashMap<&'static str, StructureRmType>> =
    Lazy::new(|| StructureRmType::ALL.iter().map(|t| (t.name(), *t)).collect());

/// Aliases of structure entries that are not LOCATABLE and therefore have no archetype node id
pub fn non_locatable_structure_aliases() -> impl Iterator<Item = &'static str> {
    StructureRmType::ALL
        .iter()
        .filter(|t| t.is_structure_entry() && !t.is_locatable())
        .map(|t| t.alias())
}

// ============================================================================
// Ancestor structure types
// ============================================================================

/// Abstract RM types whose concrete descendants are structure types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AncestorStructureRmType {
    ContentItem,
    Entry,
    CareEntry,
    Event,
    ItemStructure,
    Item,
}

impl AncestorStructureRmType {
    pub const ALL: [AncestorStructureRmType; 6] = [
        AncestorStructureRmType::ContentItem,
        AncestorStructureRmType::Entry,
        AncestorStructureRmType::CareEntry,
        AncestorStructureRmType::Event,
        AncestorStructureRmType::ItemStructure,
        AncestorStructureRmType::Item,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AncestorStructureRmType::ContentItem => "CONTENT_ITEM",
            AncestorStructureRmType::Entry => "ENTRY",
            AncestorStructureRmType::CareEntry => "CARE_ENTRY",
            AncestorStructureRmType::Event => "EVENT",
            AncestorStructureRmType::ItemStructure => "ITEM_STRUCTURE",
            AncestorStructureRmType::Item => "ITEM",
        }
    }

    /// Concrete structure descendants, ordered by type name
    pub fn descendants(&self) -> &'static [StructureRmType] {
        use StructureRmType as S;
        match self {
            AncestorStructureRmType::ContentItem => &[
                S::Action,
                S::AdminEntry,
                S::Evaluation,
                S::GenericEntry,
                S::Instruction,
                S::Observation,
                S::Section,
            ],
            AncestorStructureRmType::Entry => &[
                S::Action,
                S::AdminEntry,
                S::Evaluation,
                S::Instruction,
                S::Observation,
            ],
            AncestorStructureRmType::CareEntry => &[S::Action, S::Evaluation, S::Instruction, S::Observation],
            AncestorStructureRmType::Event => &[S::IntervalEvent, S::PointEvent],
            AncestorStructureRmType::ItemStructure => &[S::ItemList, S::ItemSingle, S::ItemTable, S::ItemTree],
            AncestorStructureRmType::Item => &[S::Cluster, S::Element],
        }
    }

    /// The structure root shared by all descendants, if there is exactly one
    pub fn structure_root(&self) -> Option<StructureRoot> {
        let mut roots = self.descendants().iter().map(|d| d.structure_root());
        let first = roots.next().flatten()?;
        roots.all(|r| r == Some(first)).then_some(first)
    }

    pub fn by_type_name(name: &str) -> Option<AncestorStructureRmType> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }
}

// ============================================================================
// Aliases
// ============================================================================

/// Database alias of an RM type, covering structure and common data value types
pub fn rm_type_alias(rm_type: &str) -> Option<&'static str> {
    if let Some(s) = StructureRmType::by_type_name(rm_type) {
        return Some(s.alias());
    }
    let alias = match rm_type {
        "ARCHETYPED" => "AR",
        "ARCHETYPE_ID" => "AX",
        "ATTESTATION" => "AT",
        AUDIT_DETAILS => "AD",
        "CODE_PHRASE" => "C",
        "DV_BOOLEAN" => "b",
        "DV_CODED_TEXT" => "c",
        DV_COUNT => "co",
        DV_DATE => "d",
        DV_DATE_TIME => "dt",
        DV_DURATION => "du",
        "DV_EHR_URI" => "eu",
        "DV_IDENTIFIER" => "id",
        "DV_INTERVAL" => "iv",
        "DV_MULTIMEDIA" => "mu",
        DV_ORDINAL => "o",
        "DV_PARAGRAPH" => "p",
        "DV_PARSABLE" => "pa",
        DV_PROPORTION => "pr",
        DV_QUANTITY => "q",
        DV_SCALE => "sc",
        "DV_STATE" => "st",
        "DV_TEXT" => "x",
        DV_TIME => "t",
        "DV_URI" => "u",
        "GENERIC_ID" => "GX",
        "HIER_OBJECT_ID" => "HX",
        "INTERNET_ID" => "IX",
        "INTERVAL" => "IV",
        "ISM_TRANSITION" => "IT",
        "LINK" => "LK",
        "LOCATABLE_REF" => "LR",
        "OBJECT_REF" => "OR",
        "OBJECT_VERSION_ID" => "OV",
        "PARTICIPATION" => "PA",
        "PARTY_IDENTIFIED" => "PI",
        "PARTY_REF" => "PF",
        "PARTY_RELATED" => "PR",
        "PARTY_SELF" => "PS",
        "REFERENCE_RANGE" => "RR",
        "TEMPLATE_ID" => "TP",
        "TERMINOLOGY_ID" => "T",
        "TERM_MAPPING" => "TM",
        "UUID" => "U",
        _ => return None,
    };
    Some(alias)
}

/// Alias of a structure attribute as stored in `entity_attribute`.
///
/// Attributes without a registered alias are stored under their own name.
pub fn attribute_alias(attribute: &str) -> &str {
    match attribute {
        "activities" => "a",
        "content" => "c",
        "context" => "x",
        "data" => "d",
        "description" => "t",
        "events" => "e",
        "instruction_details" => "n",
        "item" => "j",
        "items" => "i",
        "other_context" => "o",
        "protocol" => "p",
        "rows" => "r",
        "state" => "s",
        "summary" => "y",
        "wf_details" => "w",
        "feeder_audit" => "f",
        other => other,
    }
}

// ============================================================================
// Archetype node ids
// ============================================================================

const ARCHETYPE_ID_PREFIX: &str = "openEHR-EHR-";

/// An archetype node id split into the aliased RM type and the remaining concept.
///
/// `openEHR-EHR-OBSERVATION.blood_pressure.v2` becomes `(Some("OB"), ".blood_pressure.v2")`,
/// while a plain node id like `at0001` has no type part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RmTypeAndConcept {
    pub aliased_rm_type: Option<String>,
    pub concept: String,
}

impl RmTypeAndConcept {
    /// Split an archetype node id; `None` if an archetype id is malformed
    pub fn from_archetype_node_id(node_id: &str) -> Option<Self> {
        let Some(rest) = node_id.strip_prefix(ARCHETYPE_ID_PREFIX) else {
            return Some(Self {
                aliased_rm_type: None,
                concept: node_id.to_string(),
            });
        };
        let dot = rest.find('.')?;
        let (rm_type, concept) = rest.split_at(dot);
        if rm_type.is_empty() || concept.len() < 2 {
            return None;
        }
        let aliased = rm_type_alias(rm_type).unwrap_or(rm_type);
        Some(Self {
            aliased_rm_type: Some(aliased.to_string()),
            concept: concept.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("COMPOSITION", "CO")]
    #[case("EVENT_CONTEXT", "EC")]
    #[case("ITEM_TABLE", "TA")]
    #[case("ELEMENT", "E")]
    fn test_structure_alias(#[case] name: &str, #[case] alias: &str) {
        let t = StructureRmType::by_type_name(name).unwrap();
        assert_eq!(t.alias(), alias);
        assert_eq!(StructureRmType::by_alias(alias), Some(t));
    }

    #[test]
    fn test_alias_or_type_name() {
        assert_eq!(StructureRmType::alias_or_type_name("OBSERVATION"), "OB");
        assert_eq!(StructureRmType::alias_or_type_name("DV_TEXT"), "DV_TEXT");
    }

    #[test]
    fn test_non_locatable_structure_entries() {
        let mut aliases: Vec<_> = non_locatable_structure_aliases().collect();
        aliases.sort();
        assert_eq!(aliases, vec!["EC", "FA"]);
    }

    #[test]
    fn test_ancestor_descendants_sorted() {
        for ancestor in AncestorStructureRmType::ALL {
            let names: Vec<_> = ancestor.descendants().iter().map(|d| d.name()).collect();
            let mut sorted = names.clone();
            sorted.sort();
            assert_eq!(names, sorted, "{}", ancestor.name());
        }
    }

    #[rstest]
    #[case(AncestorStructureRmType::Entry, Some(StructureRoot::Composition))]
    #[case(AncestorStructureRmType::Event, Some(StructureRoot::Composition))]
    #[case(AncestorStructureRmType::ItemStructure, None)]
    #[case(AncestorStructureRmType::Item, None)]
    fn test_ancestor_structure_root(#[case] ancestor: AncestorStructureRmType, #[case] root: Option<StructureRoot>) {
        assert_eq!(ancestor.structure_root(), root);
    }

    #[test]
    fn test_split_archetype_node_id() {
        let tc = RmTypeAndConcept::from_archetype_node_id("openEHR-EHR-OBSERVATION.blood_pressure.v2").unwrap();
        assert_eq!(tc.aliased_rm_type.as_deref(), Some("OB"));
        assert_eq!(tc.concept, ".blood_pressure.v2");

        let tc = RmTypeAndConcept::from_archetype_node_id("at0001").unwrap();
        assert_eq!(tc.aliased_rm_type, None);
        assert_eq!(tc.concept, "at0001");

        assert!(RmTypeAndConcept::from_archetype_node_id("openEHR-EHR-OBSERVATION").is_none());
    }

    #[test]
    fn test_dv_ordered_sets() {
        assert!(is_dv_ordered(DV_DATE_TIME));
        assert!(is_numeric_dv_ordered(DV_COUNT));
        assert!(!is_numeric_dv_ordered(DV_DURATION));
        assert!(!is_dv_ordered("DV_TEXT"));
    }
}
