//! The compilation entry point

use crate::EngineConfig;
use log::{debug, trace};
use openehr_aql_asl::{AqlSqlLayer, AslPostProcessor, AslRootQuery, CleanupPostProcessor, QueryId};
use openehr_aql_ast::AqlQueryWrapper;
use openehr_aql_diagnostics::Result;
use openehr_aql_model::{MetadataResolver, StaticSystemIdentity, SystemIdentity, TemplateRegistry};
use std::sync::Arc;

/// Compiles analyzed AQL queries into query trees.
///
/// An engine holds no per-query state and can be shared between threads.
pub struct AqlEngine {
    metadata: Arc<dyn MetadataResolver>,
    system_identity: Arc<dyn SystemIdentity>,
    post_processors: Vec<Arc<dyn AslPostProcessor>>,
}

impl AqlEngine {
    pub fn builder() -> AqlEngineBuilder {
        AqlEngineBuilder::new()
    }

    /// An engine using only what `config` provides
    pub fn new(config: EngineConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Compile `query` and run the post-processing stages over the result
    pub fn compile(&self, query: &AqlQueryWrapper) -> Result<AslRootQuery> {
        debug!(
            "Compiling query with {} selects over {} containments",
            query.selects.len(),
            query.contains_chain.size()
        );
        let system_id = self.system_identity.system_id();
        let mut root = AqlSqlLayer::new(self.metadata.as_ref(), &system_id).build_asl_root_query(query)?;

        for processor in &self.post_processors {
            trace!("Applying post processor with order {}", processor.order());
            processor.after_build(&mut root, query)?;
        }

        debug!(
            "Compiled query: {} root children, {} selects",
            root.children(QueryId::ROOT).len(),
            root.select.len()
        );
        Ok(root)
    }

    /// Number of post-processing stages, the built-in cleanup included
    pub fn post_processor_count(&self) -> usize {
        self.post_processors.len()
    }
}

impl Default for AqlEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Builder for [`AqlEngine`]
#[derive(Default)]
pub struct AqlEngineBuilder {
    config: EngineConfig,
    metadata: Option<Arc<dyn MetadataResolver>>,
    system_identity: Option<Arc<dyn SystemIdentity>>,
    post_processors: Vec<Arc<dyn AslPostProcessor>>,
}

impl AqlEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve template ids through `metadata` instead of the configured templates
    pub fn metadata_resolver(mut self, metadata: Arc<dyn MetadataResolver>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Take the local system id from `identity` instead of the configuration
    pub fn system_identity(mut self, identity: Arc<dyn SystemIdentity>) -> Self {
        self.system_identity = Some(identity);
        self
    }

    /// Add a post-processing stage
    pub fn post_processor(mut self, processor: Arc<dyn AslPostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    pub fn build(self) -> AqlEngine {
        let EngineConfig {
            system_id,
            cleanup_unused_columns,
            templates,
        } = self.config;

        let metadata: Arc<dyn MetadataResolver> = match self.metadata {
            Some(metadata) => metadata,
            None => Arc::new(TemplateRegistry::from_entries(templates)),
        };
        let system_identity: Arc<dyn SystemIdentity> = match self.system_identity {
            Some(identity) => identity,
            None => Arc::new(StaticSystemIdentity::new(system_id)),
        };

        let mut post_processors = self.post_processors;
        if cleanup_unused_columns {
            post_processors.push(Arc::new(CleanupPostProcessor));
        }
        // stable: stages with equal order keep their registration order
        post_processors.sort_by_key(|p| p.order());

        AqlEngine {
            metadata,
            system_identity,
            post_processors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openehr_aql_ast::{
        AqlObjectPath, ContainsChain, ContainsWrapper, IdentifiedPath, Primitive, RmContainsWrapper, SelectWrapper,
    };
    use openehr_aql_asl::{AslField, ConstantValue};
    use openehr_aql_model::EHR;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Records the order key of every stage that ran
    struct Recorder {
        order: i32,
        log: Arc<Mutex<Vec<i32>>>,
    }

    impl AslPostProcessor for Recorder {
        fn order(&self) -> i32 {
            self.order
        }

        fn after_build(&self, _root: &mut AslRootQuery, _query: &AqlQueryWrapper) -> Result<()> {
            self.log.lock().unwrap().push(self.order);
            Ok(())
        }
    }

    fn ehr_query(attributes: &[&str]) -> AqlQueryWrapper {
        let chain = ContainsChain::new([ContainsWrapper::from(RmContainsWrapper::new(0, EHR).with_alias("e"))]);
        AqlQueryWrapper::new(chain).with_select(SelectWrapper::path(IdentifiedPath::of(
            0,
            AqlObjectPath::attributes(attributes.iter().copied()),
        )))
    }

    #[test]
    fn test_stages_run_in_order() {
        let log: Arc<Mutex<Vec<i32>>> = Arc::default();
        let engine = AqlEngine::builder()
            .config(EngineConfig::default().with_cleanup(false))
            .post_processor(Arc::new(Recorder { order: 20, log: Arc::clone(&log) }))
            .post_processor(Arc::new(Recorder { order: -5, log: Arc::clone(&log) }))
            .post_processor(Arc::new(Recorder { order: 10, log: Arc::clone(&log) }))
            .build();

        engine.compile(&ehr_query(&["ehr_id", "value"])).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![-5, 10, 20]);
    }

    #[test]
    fn test_cleanup_is_registered_from_config() {
        assert_eq!(AqlEngine::default().post_processor_count(), 1);
        assert_eq!(AqlEngine::new(EngineConfig::default().with_cleanup(false)).post_processor_count(), 0);
    }

    #[test]
    fn test_system_id_from_config() {
        let engine = AqlEngine::new(EngineConfig::default().with_system_id("node-a"));
        let root = engine.compile(&ehr_query(&["system_id", "value"])).unwrap();
        assert!(matches!(&root.select[0],
            AslField::Constant(c) if c.value == ConstantValue::String("node-a".into())));
    }

    #[test]
    fn test_injected_identity_wins() {
        let engine = AqlEngine::builder()
            .config(EngineConfig::default().with_system_id("node-a"))
            .system_identity(Arc::new(StaticSystemIdentity::new("node-b")))
            .build();
        let root = engine.compile(&ehr_query(&["system_id", "value"])).unwrap();
        assert!(matches!(&root.select[0],
            AslField::Constant(c) if c.value == ConstantValue::String("node-b".into())));
    }

    #[test]
    fn test_constant_only_query() {
        let chain = ContainsChain::new([ContainsWrapper::from(RmContainsWrapper::new(0, EHR).with_alias("e"))]);
        let query = AqlQueryWrapper::new(chain).with_select(SelectWrapper::primitive(Primitive::Long(1)));
        let root = AqlEngine::default().compile(&query).unwrap();
        assert!(matches!(&root.select[..], [AslField::Aggregating(_)]));
    }
}
