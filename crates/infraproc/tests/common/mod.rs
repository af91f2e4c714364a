use infraproc::{Collaborators, InfraProcessor, NodeDescription, ProcessorConfig};
use infraproc_backend::{ResolverMap, UserDataStore};
use infraproc_memory::{
    MemoryCloud, MemoryCloudHandler, MemoryInfoBroker, MemoryServiceComposer, MemoryStore,
};
use std::sync::Arc;

/// A simulated cloud with `web` and `db` node types on backend `b1`
pub struct TestCloud {
    pub cloud: MemoryCloud,
}

impl TestCloud {
    pub fn new() -> Self {
        let cloud = MemoryCloud::new();
        cloud.define_cooked("web", "b1");
        cloud.define_cooked("db", "b1");
        Self { cloud }
    }

    pub fn collaborators(&self) -> Collaborators {
        self.collaborators_with_store(Arc::new(MemoryStore::new(self.cloud.clone())))
    }

    pub fn collaborators_with_store(&self, store: Arc<dyn UserDataStore>) -> Collaborators {
        Collaborators {
            store,
            cloud_handler: Arc::new(MemoryCloudHandler::new(self.cloud.clone())),
            service_composer: Arc::new(MemoryServiceComposer::new(self.cloud.clone())),
            info_broker: Arc::new(MemoryInfoBroker::new(self.cloud.clone())),
            resolver: Arc::new(ResolverMap::with_cooked()),
        }
    }

    /// Sequential processor with default options
    #[allow(dead_code)]
    pub fn processor(&self) -> InfraProcessor {
        InfraProcessor::new(self.collaborators())
    }

    #[allow(dead_code)]
    pub fn processor_with(&self, config: &ProcessorConfig) -> InfraProcessor {
        InfraProcessor::builder(self.collaborators())
            .config(config)
            .build()
    }
}

/// Description of a node of `node_type` in infrastructure `i1`
pub fn node(name: &str, node_type: &str) -> NodeDescription {
    NodeDescription::new("u1", "i1", name).with_type(node_type)
}

#[allow(dead_code)]
pub fn parallel_config() -> ProcessorConfig {
    ProcessorConfig {
        strategy: infraproc::StrategyKind::Parallel,
        ..ProcessorConfig::default()
    }
}
