//! Extracted columns
//!
//! Well-known RM paths that are stored in dedicated columns (or are constant) and
//! therefore do not need to be read from the JSON data of a structure row.

use crate::FieldType;
use openehr_aql_ast::AqlObjectPath;
use openehr_aql_model::{
    AUDIT_DETAILS, AncestorStructureRmType, COMPOSITION, EHR, EHR_STATUS, FOLDER, ORIGINAL_VERSION,
    StructureRmType,
};
use serde::{Deserialize, Serialize};

/// Catalog entry mapping an RM path below a containment type onto physical columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AslExtractedColumn {
    NameValue,
    VoId,
    /// Same path as `ArchetypeNodeId`; used for compositions
    RootConcept,
    ArchetypeNodeId,
    TemplateId,

    EhrId,
    EhrSystemId,
    EhrSystemIdDv,
    EhrTimeCreatedDv,
    EhrTimeCreated,

    FolderItemId,

    OvContributionId,
    OvTimeCommittedDv,
    OvTimeCommitted,

    AdSystemId,
    AdDescriptionDv,
    AdDescriptionValue,
    AdChangeTypeDv,
    AdChangeTypeValue,
    AdChangeTypeCodeString,
    AdChangeTypePreferredTerm,
    AdChangeTypeTerminologyIdValue,
}

impl AslExtractedColumn {
    /// Catalog order; lookups return the first match
    pub const ALL: [AslExtractedColumn; 22] = [
        AslExtractedColumn::NameValue,
        AslExtractedColumn::VoId,
        AslExtractedColumn::RootConcept,
        AslExtractedColumn::ArchetypeNodeId,
        AslExtractedColumn::TemplateId,
        AslExtractedColumn::EhrId,
        AslExtractedColumn::EhrSystemId,
        AslExtractedColumn::EhrSystemIdDv,
        AslExtractedColumn::EhrTimeCreatedDv,
        AslExtractedColumn::EhrTimeCreated,
        AslExtractedColumn::FolderItemId,
        AslExtractedColumn::OvContributionId,
        AslExtractedColumn::OvTimeCommittedDv,
        AslExtractedColumn::OvTimeCommitted,
        AslExtractedColumn::AdSystemId,
        AslExtractedColumn::AdDescriptionDv,
        AslExtractedColumn::AdDescriptionValue,
        AslExtractedColumn::AdChangeTypeDv,
        AslExtractedColumn::AdChangeTypeValue,
        AslExtractedColumn::AdChangeTypeCodeString,
        AslExtractedColumn::AdChangeTypePreferredTerm,
        AslExtractedColumn::AdChangeTypeTerminologyIdValue,
    ];

    /// Attributes of the RM path, relative to the containment
    pub fn path_attributes(&self) -> &'static [&'static str] {
        match self {
            AslExtractedColumn::NameValue => &["name", "value"],
            AslExtractedColumn::VoId => &["uid", "value"],
            AslExtractedColumn::RootConcept | AslExtractedColumn::ArchetypeNodeId => &["archetype_node_id"],
            AslExtractedColumn::TemplateId => &["archetype_details", "template_id", "value"],
            AslExtractedColumn::EhrId => &["ehr_id", "value"],
            AslExtractedColumn::EhrSystemId => &["system_id", "value"],
            AslExtractedColumn::EhrSystemIdDv => &["system_id"],
            AslExtractedColumn::EhrTimeCreatedDv => &["time_created"],
            AslExtractedColumn::EhrTimeCreated => &["time_created", "value"],
            AslExtractedColumn::FolderItemId => &["items", "id", "value"],
            AslExtractedColumn::OvContributionId => &["contribution", "id", "value"],
            AslExtractedColumn::OvTimeCommittedDv => &["commit_audit", "time_committed"],
            AslExtractedColumn::OvTimeCommitted => &["commit_audit", "time_committed", "value"],
            AslExtractedColumn::AdSystemId => &["system_id"],
            AslExtractedColumn::AdDescriptionDv => &["description"],
            AslExtractedColumn::AdDescriptionValue => &["description", "value"],
            AslExtractedColumn::AdChangeTypeDv => &["change_type"],
            AslExtractedColumn::AdChangeTypeValue => &["change_type", "value"],
            AslExtractedColumn::AdChangeTypeCodeString => &["change_type", "defining_code", "code_string"],
            AslExtractedColumn::AdChangeTypePreferredTerm => &["change_type", "defining_code", "preferred_term"],
            AslExtractedColumn::AdChangeTypeTerminologyIdValue => {
                &["change_type", "defining_code", "terminology_id", "value"]
            }
        }
    }

    /// The RM path as an object path
    pub fn path(&self) -> AqlObjectPath {
        AqlObjectPath::attributes(self.path_attributes().iter().copied())
    }

    /// Number of path segments
    pub fn path_len(&self) -> usize {
        self.path_attributes().len()
    }

    /// Physical columns holding the value; empty for constants and virtual columns
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            AslExtractedColumn::NameValue => &["entity_name"],
            AslExtractedColumn::VoId => &["vo_id", "sys_version"],
            AslExtractedColumn::RootConcept => &["root_concept"],
            AslExtractedColumn::ArchetypeNodeId => &["rm_entity", "entity_concept"],
            AslExtractedColumn::TemplateId => &["template_id"],
            AslExtractedColumn::EhrId => &["id"],
            AslExtractedColumn::EhrTimeCreatedDv | AslExtractedColumn::EhrTimeCreated => &["creation_date"],
            AslExtractedColumn::OvContributionId => &["contribution_id"],
            AslExtractedColumn::OvTimeCommittedDv | AslExtractedColumn::OvTimeCommitted => &["sys_period_lower"],
            AslExtractedColumn::AdDescriptionDv | AslExtractedColumn::AdDescriptionValue => &["description"],
            AslExtractedColumn::AdChangeTypeDv
            | AslExtractedColumn::AdChangeTypeValue
            | AslExtractedColumn::AdChangeTypeCodeString
            | AslExtractedColumn::AdChangeTypePreferredTerm => &["change_type"],
            AslExtractedColumn::EhrSystemId
            | AslExtractedColumn::EhrSystemIdDv
            | AslExtractedColumn::FolderItemId
            | AslExtractedColumn::AdSystemId
            | AslExtractedColumn::AdChangeTypeTerminologyIdValue => &[],
        }
    }

    pub fn column_type(&self) -> FieldType {
        match self {
            AslExtractedColumn::EhrId | AslExtractedColumn::FolderItemId => FieldType::Uuid,
            _ => FieldType::String,
        }
    }

    /// Whether the columns live in the version table of the relation
    pub fn requires_version_table(&self) -> bool {
        matches!(
            self,
            AslExtractedColumn::VoId
                | AslExtractedColumn::RootConcept
                | AslExtractedColumn::TemplateId
                | AslExtractedColumn::OvContributionId
                | AslExtractedColumn::OvTimeCommittedDv
                | AslExtractedColumn::OvTimeCommitted
                | AslExtractedColumn::AdSystemId
                | AslExtractedColumn::AdDescriptionDv
                | AslExtractedColumn::AdDescriptionValue
                | AslExtractedColumn::AdChangeTypeDv
                | AslExtractedColumn::AdChangeTypeValue
                | AslExtractedColumn::AdChangeTypeCodeString
                | AslExtractedColumn::AdChangeTypePreferredTerm
                | AslExtractedColumn::AdChangeTypeTerminologyIdValue
        )
    }

    /// Whether the entry applies to containments of `rm_type`
    pub fn allows(&self, rm_type: &str) -> bool {
        match self {
            AslExtractedColumn::NameValue => is_structure_or_ancestor(rm_type),
            AslExtractedColumn::ArchetypeNodeId => rm_type != COMPOSITION && is_structure_or_ancestor(rm_type),
            AslExtractedColumn::VoId => matches!(rm_type, COMPOSITION | EHR_STATUS | ORIGINAL_VERSION),
            AslExtractedColumn::RootConcept | AslExtractedColumn::TemplateId => rm_type == COMPOSITION,
            AslExtractedColumn::EhrId
            | AslExtractedColumn::EhrSystemId
            | AslExtractedColumn::EhrSystemIdDv
            | AslExtractedColumn::EhrTimeCreatedDv
            | AslExtractedColumn::EhrTimeCreated => rm_type == EHR,
            AslExtractedColumn::FolderItemId => rm_type == FOLDER,
            AslExtractedColumn::OvContributionId
            | AslExtractedColumn::OvTimeCommittedDv
            | AslExtractedColumn::OvTimeCommitted => rm_type == ORIGINAL_VERSION,
            AslExtractedColumn::AdSystemId
            | AslExtractedColumn::AdDescriptionDv
            | AslExtractedColumn::AdDescriptionValue
            | AslExtractedColumn::AdChangeTypeDv
            | AslExtractedColumn::AdChangeTypeValue
            | AslExtractedColumn::AdChangeTypeCodeString
            | AslExtractedColumn::AdChangeTypePreferredTerm
            | AslExtractedColumn::AdChangeTypeTerminologyIdValue => rm_type == AUDIT_DETAILS,
        }
    }

    /// Whether `path` is exactly the path of this entry
    pub fn matches_path(&self, path: &AqlObjectPath) -> bool {
        let attributes = self.path_attributes();
        path.len() == attributes.len()
            && path
                .nodes()
                .iter()
                .zip(attributes)
                .all(|(node, attribute)| node.attribute == *attribute && !node.has_predicate())
    }

    pub fn matches(&self, containment_type: &str, path: &AqlObjectPath) -> bool {
        self.allows(containment_type) && self.matches_path(path)
    }

    /// First entry for a path below a containment of `containment_type`
    pub fn find(containment_type: &str, path: &AqlObjectPath) -> Option<AslExtractedColumn> {
        Self::ALL
            .iter()
            .copied()
            .find(|ec| ec.matches(containment_type, path))
    }

    /// Like [`find`](Self::find), ignoring the first `skip` path segments
    pub fn find_skipping(containment_type: &str, path: &AqlObjectPath, skip: usize) -> Option<AslExtractedColumn> {
        Self::find(containment_type, &path.skip(skip))
    }
}

fn is_structure_or_ancestor(rm_type: &str) -> bool {
    StructureRmType::by_type_name(rm_type).is_some() || AncestorStructureRmType::by_type_name(rm_type).is_some()
}
