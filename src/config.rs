//! TOML configuration.
//!
//! Every section is optional and falls back to the defaults below, so a
//! minimal file only names what differs. [`load_config`] parses and then
//! validates the whole tree by building the core parameter types; a bad
//! value fails at startup, never mid-request.
//!
//! ```toml
//! [chunking]
//! max_chunk_size = 800
//! overlap = 100
//!
//! [retrieval]
//! alpha = 0.7
//! min_score = 0.4
//!
//! [agent]
//! max_rewrites = 2
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//! ```

use anyhow::{bail, Context, Result};
use careguide_core::agent::{AgentConfig, SafetyRules, DEFAULT_MAX_REWRITES};
use careguide_core::chunk::ChunkingParams;
use careguide_core::emergency::{EmergencyDetector, DEFAULT_EMERGENCY_KEYWORDS};
use careguide_core::error::ProviderOp;
use careguide_core::provider::GenerationParams;
use careguide_core::search::{MergeParams, DEFAULT_ALPHA, DEFAULT_MIN_SCORE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration. Immutable once loaded.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub emergency: EmergencyConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub corpus: Option<CorpusConfig>,
}

// ============ Chunking ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    800
}
fn default_overlap() -> usize {
    100
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            min_score: default_min_score(),
            final_limit: default_final_limit(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
        }
    }
}

fn default_alpha() -> f64 {
    DEFAULT_ALPHA
}
fn default_min_score() -> f64 {
    DEFAULT_MIN_SCORE
}
fn default_final_limit() -> usize {
    6
}
fn default_candidate_k() -> usize {
    40
}

// ============ Agent ============

#[derive(Debug, Deserialize, Clone)]
pub struct AgentSection {
    #[serde(default = "default_max_rewrites")]
    pub max_rewrites: u32,
    #[serde(default)]
    pub disclaimer: Option<String>,
    #[serde(default)]
    pub blocked_phrases: Option<Vec<String>>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_rewrites: default_max_rewrites(),
            disclaimer: None,
            blocked_phrases: None,
        }
    }
}

fn default_max_rewrites() -> u32 {
    DEFAULT_MAX_REWRITES
}

// ============ Emergency ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmergencyConfig {
    #[serde(default = "default_emergency_keywords")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            keywords: default_emergency_keywords(),
            patterns: Vec::new(),
        }
    }
}

fn default_emergency_keywords() -> Vec<String> {
    DEFAULT_EMERGENCY_KEYWORDS
        .iter()
        .map(|k| k.to_string())
        .collect()
}

// ============ Gateway ============

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_concurrent_calls: default_max_concurrent_calls(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    4000
}
fn default_max_concurrent_calls() -> usize {
    8
}

/// Per-op timeouts in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsConfig {
    #[serde(default = "default_embed_timeout")]
    pub embed: f64,
    #[serde(default = "default_generate_timeout")]
    pub generate: f64,
    #[serde(default = "default_short_timeout")]
    pub classify: f64,
    #[serde(default = "default_short_timeout")]
    pub grade: f64,
    #[serde(default = "default_short_timeout")]
    pub rewrite: f64,
    #[serde(default = "default_safety_timeout")]
    pub safety_check: f64,
    #[serde(default = "default_vector_timeout")]
    pub vector_search: f64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            embed: default_embed_timeout(),
            generate: default_generate_timeout(),
            classify: default_short_timeout(),
            grade: default_short_timeout(),
            rewrite: default_short_timeout(),
            safety_check: default_safety_timeout(),
            vector_search: default_vector_timeout(),
        }
    }
}

impl TimeoutsConfig {
    pub fn secs_for(&self, op: ProviderOp) -> f64 {
        match op {
            ProviderOp::Embed => self.embed,
            ProviderOp::Generate => self.generate,
            ProviderOp::Classify => self.classify,
            ProviderOp::Grade => self.grade,
            ProviderOp::Rewrite => self.rewrite,
            ProviderOp::SafetyCheck => self.safety_check,
            ProviderOp::VectorSearch => self.vector_search,
        }
    }

    pub fn for_op(&self, op: ProviderOp) -> Duration {
        Duration::from_secs_f64(self.secs_for(op))
    }
}

fn default_embed_timeout() -> f64 {
    10.0
}
fn default_generate_timeout() -> f64 {
    60.0
}
fn default_short_timeout() -> f64 {
    15.0
}
fn default_safety_timeout() -> f64 {
    20.0
}
fn default_vector_timeout() -> f64 {
    5.0
}

// ============ Providers ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    512
}

// ============ Corpus ============

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

// ============ Derived parameters ============

impl Config {
    pub fn chunking_params(&self) -> Result<ChunkingParams> {
        Ok(ChunkingParams::new(
            self.chunking.max_chunk_size,
            self.chunking.overlap,
        )?)
    }

    pub fn merge_params(&self) -> Result<MergeParams> {
        Ok(MergeParams::new(
            self.retrieval.alpha,
            self.retrieval.min_score,
            self.retrieval.final_limit,
        )?)
    }

    pub fn agent_config(&self) -> AgentConfig {
        let defaults = SafetyRules::default();
        AgentConfig {
            max_rewrites: self.agent.max_rewrites,
            safety: SafetyRules {
                disclaimer: self
                    .agent
                    .disclaimer
                    .clone()
                    .unwrap_or(defaults.disclaimer),
                blocked_phrases: self
                    .agent
                    .blocked_phrases
                    .clone()
                    .unwrap_or(defaults.blocked_phrases),
            },
        }
    }

    pub fn emergency_detector(&self) -> Result<EmergencyDetector> {
        Ok(EmergencyDetector::new(
            &self.emergency.keywords,
            &self.emergency.patterns,
        )?)
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
        }
    }

    /// Check every section. Called by [`load_config`] and [`parse_config`].
    pub fn validate(&self) -> Result<()> {
        self.chunking_params().context("invalid [chunking] section")?;
        self.merge_params().context("invalid [retrieval] section")?;
        self.emergency_detector()
            .context("invalid [emergency] section")?;

        if self.retrieval.candidate_k_keyword == 0 || self.retrieval.candidate_k_vector == 0 {
            bail!("retrieval.candidate_k_keyword and candidate_k_vector must be >= 1");
        }

        let gw = &self.gateway;
        if gw.max_attempts == 0 {
            bail!("gateway.max_attempts must be >= 1");
        }
        if gw.max_concurrent_calls == 0 {
            bail!("gateway.max_concurrent_calls must be >= 1");
        }
        if gw.base_delay_ms > gw.max_delay_ms {
            bail!("gateway.base_delay_ms must not exceed gateway.max_delay_ms");
        }
        for op in [
            ProviderOp::Embed,
            ProviderOp::Generate,
            ProviderOp::Classify,
            ProviderOp::Grade,
            ProviderOp::Rewrite,
            ProviderOp::SafetyCheck,
            ProviderOp::VectorSearch,
        ] {
            let secs = gw.timeouts.secs_for(op);
            if !(secs.is_finite() && secs > 0.0) {
                bail!("gateway.timeouts.{} must be > 0", op);
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }
        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.llm.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }
        if self.llm.is_enabled() && self.llm.model.is_none() {
            bail!(
                "llm.model must be specified when provider is '{}'",
                self.llm.provider
            );
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }
        if self.llm.max_tokens == 0 {
            bail!("llm.max_tokens must be > 0");
        }

        Ok(())
    }
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Read, parse, and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
