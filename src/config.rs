use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directories scanned for documents.
    pub dirs: Vec<PathBuf>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Format allow-list applied to paths relative to each scanned dir.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_recursive() -> bool {
    true
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for the snapshot and vector collection.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            collection: default_collection(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ragsync.sqlite")
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_collection() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters carried over from the end of one chunk into the next.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1024
}

fn default_chunk_overlap() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `ollama` or `openai`.
    pub provider: String,
    pub model: String,
    /// Vector dimensionality. Required for openai; ollama reports its own.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_batch_size() -> usize {
    64
}

fn default_max_retries() -> u32 {
    5
}

fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `ollama` or `openai`.
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.4
}

fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

impl Config {
    /// Validate the configuration before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.index.dirs.is_empty() {
            return Err(Error::Config("index.dirs must list at least one directory".into()));
        }
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config("chunking.chunk_size must be > 0".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(
                "chunking.chunk_overlap must be smaller than chunk_size".into(),
            ));
        }
        if self.retrieval.top_k < 1 {
            return Err(Error::Config("retrieval.top_k must be >= 1".into()));
        }

        match self.embedding.provider.as_str() {
            "ollama" | "openai" => {}
            other => {
                return Err(Error::Config(format!(
                    "unknown embedding provider: '{}'. Must be ollama or openai.",
                    other
                )))
            }
        }
        if self.embedding.model.is_empty() {
            return Err(Error::Config("embedding.model must be set".into()));
        }
        if self.embedding.provider == "openai" && self.embedding.dims.map_or(true, |d| d == 0) {
            return Err(Error::Config(
                "embedding.dims must be > 0 for the openai provider".into(),
            ));
        }

        match self.llm.provider.as_str() {
            "ollama" | "openai" => {}
            other => {
                return Err(Error::Config(format!(
                    "unknown llm provider: '{}'. Must be ollama or openai.",
                    other
                )))
            }
        }
        if self.llm.model.is_empty() {
            return Err(Error::Config("llm.model must be set".into()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::Config("llm.temperature must be in [0.0, 2.0]".into()));
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read config file {}: {}", path.display(), e)))?;

    let config: Config =
        toml::from_str(&content).map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
[index]
dirs = ["docs"]

[embedding]
provider = "ollama"
model = "nomic-embed-text"

[llm]
provider = "ollama"
model = "llama3.1"
"#
        .to_string()
    }

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = parse(&base_toml());
        assert!(cfg.index.recursive);
        assert_eq!(cfg.chunking.chunk_size, 1024);
        assert_eq!(cfg.chunking.chunk_overlap, 20);
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.storage.collection, "default");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_dirs_rejected() {
        let mut cfg = parse(&base_toml());
        cfg.index.dirs.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut cfg = parse(&base_toml());
        cfg.chunking.chunk_size = 100;
        cfg.chunking.chunk_overlap = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut cfg = parse(&base_toml());
        cfg.embedding.provider = "cohere".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_openai_requires_dims() {
        let mut cfg = parse(&base_toml());
        cfg.embedding.provider = "openai".into();
        cfg.embedding.dims = None;
        assert!(cfg.validate().is_err());
        cfg.embedding.dims = Some(1536);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_temperature_range() {
        let mut cfg = parse(&base_toml());
        cfg.llm.temperature = 2.5;
        assert!(cfg.validate().is_err());
    }
}
