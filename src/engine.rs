//! Wiring: builds every component from one [`Config`].

use std::sync::Arc;

use anyhow::Result;
use careguide_core::embedding::EmbeddingProvider;
use careguide_core::keyword::KeywordIndex;
use careguide_core::provider::LlmProvider;
use careguide_core::vector::{InMemoryVectorIndex, VectorIndex};

use crate::config::Config;
use crate::gateway::ProviderGateway;
use crate::ingest::Ingestor;
use crate::orchestrator::Orchestrator;
use crate::providers::{create_embedding_provider, create_llm_provider};
use crate::retrieval::HybridRetriever;

/// All long-lived components, shared across requests.
pub struct Engine {
    pub config: Config,
    pub keyword: Arc<KeywordIndex>,
    pub vectors: Arc<InMemoryVectorIndex>,
    pub gateway: Arc<ProviderGateway>,
    pub retriever: Arc<HybridRetriever>,
    pub ingestor: Ingestor,
    pub orchestrator: Orchestrator,
}

impl Engine {
    /// Build with the providers named in the configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedding_provider(&config.embedding)?;
        let llm = create_llm_provider(&config.llm)?;
        Self::with_providers(config, embedder, llm)
    }

    /// Build with explicit providers.
    pub fn with_providers(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let vectors = Arc::new(InMemoryVectorIndex::new());
        Self::with_vector_index(config, embedder, llm, vectors.clone(), vectors)
    }

    /// Build with a separate query-side vector index. Ingestion still
    /// publishes into `vectors`.
    pub fn with_vector_index(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        vectors: Arc<InMemoryVectorIndex>,
        vector_query: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        config.validate()?;

        let keyword = Arc::new(KeywordIndex::default());
        let gateway = Arc::new(ProviderGateway::new(embedder, llm, &config.gateway));
        let retriever = Arc::new(HybridRetriever::new(
            keyword.clone(),
            vector_query,
            gateway.clone(),
            &config,
        )?);
        let ingestor = Ingestor::new(keyword.clone(), vectors.clone(), gateway.clone(), &config)?;
        let orchestrator = Orchestrator::from_config(&config, gateway.clone(), retriever.clone())?;

        Ok(Self {
            config,
            keyword,
            vectors,
            gateway,
            retriever,
            ingestor,
            orchestrator,
        })
    }
}
