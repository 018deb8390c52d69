//! Collaborator traits consumed by the compiler
//!
//! Both lookups are side-effect free and may be shared between concurrent
//! compilations; the compiler never mutates them.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Resolves template ids to the internal identifier stored in `template_id` columns
pub trait MetadataResolver: Send + Sync {
    /// Look up the internal identifier of a template; `None` if the template is unknown
    fn find_uuid_by_template_id(&self, template_id: &str) -> Option<Uuid>;
}

/// Provides the identifier of the local system
pub trait SystemIdentity: Send + Sync {
    fn system_id(&self) -> String;
}

/// In-memory template registry
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: Arc<RwLock<IndexMap<String, Uuid>>>,
}

impl TemplateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from template id / uuid pairs
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Uuid)>) -> Self {
        Self {
            templates: Arc::new(RwLock::new(entries.into_iter().collect())),
        }
    }

    /// Register (or replace) a template
    pub fn register(&self, template_id: impl Into<String>, uuid: Uuid) {
        self.templates.write().insert(template_id.into(), uuid);
    }

    /// Number of registered templates
    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }
}

impl MetadataResolver for TemplateRegistry {
    fn find_uuid_by_template_id(&self, template_id: &str) -> Option<Uuid> {
        self.templates.read().get(template_id).copied()
    }
}

/// A fixed system identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSystemIdentity(String);

impl StaticSystemIdentity {
    pub fn new(system_id: impl Into<String>) -> Self {
        Self(system_id.into())
    }
}

impl SystemIdentity for StaticSystemIdentity {
    fn system_id(&self) -> String {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let uuid = Uuid::new_v4();
        let registry = TemplateRegistry::new();
        assert!(registry.is_empty());
        registry.register("vital_signs.v1", uuid);

        assert_eq!(registry.find_uuid_by_template_id("vital_signs.v1"), Some(uuid));
        assert_eq!(registry.find_uuid_by_template_id("unknown"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_clones_share_state() {
        let registry = TemplateRegistry::new();
        let clone = registry.clone();
        let uuid = Uuid::new_v4();
        clone.register("t", uuid);
        assert_eq!(registry.find_uuid_by_template_id("t"), Some(uuid));
    }

    #[test]
    fn test_static_identity() {
        assert_eq!(StaticSystemIdentity::new("local.ehrbase.org").system_id(), "local.ehrbase.org");
    }
}
