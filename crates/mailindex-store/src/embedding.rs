use std::time::Duration;

use mailindex_core::config::{embedding as defaults, env_parse, env_string};

use crate::{StoreError, StoreResult};

/// Black-box text embedding function.
pub trait Embedder: Send {
    fn embed(&self, text: &str) -> StoreResult<Vec<f32>>;
    fn dimensions(&self) -> usize;
    fn label(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    Hash,
    Provider,
    Disabled,
}

impl EmbedderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hash" | "local" => Some(Self::Hash),
            "provider" | "openai" => Some(Self::Provider),
            "none" | "off" | "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Selects and configures the embedding backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedderConfig {
    pub kind: EmbedderKind,
    pub dimensions: usize,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::Hash,
            dimensions: defaults::DIMENSIONS,
            api_base: String::new(),
            api_key: String::new(),
            model: defaults::PROVIDER_DEFAULT_MODEL.to_string(),
            timeout_ms: defaults::PROVIDER_TIMEOUT_MS,
        }
    }
}

impl EmbedderConfig {
    /// Reads `MAILINDEX_EMBEDDER` and the `MAILINDEX_EMBEDDING_*` settings.
    ///
    /// An unrecognized or incomplete provider selection falls back to the hash embedder.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(raw) = env_string("MAILINDEX_EMBEDDER") {
            match EmbedderKind::parse(&raw) {
                Some(kind) => config.kind = kind,
                None => tracing::warn!(value = %raw, "unknown MAILINDEX_EMBEDDER, using hash"),
            }
        }
        if let Some(api_base) = env_string("MAILINDEX_EMBEDDING_API_BASE") {
            config.api_base = api_base;
        }
        if let Some(api_key) = env_string("MAILINDEX_EMBEDDING_API_KEY") {
            config.api_key = api_key;
        }
        if let Some(model) = env_string("MAILINDEX_EMBEDDING_MODEL") {
            config.model = model;
        }
        if let Some(timeout_ms) = env_parse::<u64>("MAILINDEX_EMBEDDING_TIMEOUT_MS") {
            config.timeout_ms = timeout_ms.max(1);
        }
        if config.kind == EmbedderKind::Provider && config.api_base.is_empty() {
            tracing::warn!("MAILINDEX_EMBEDDER=provider without MAILINDEX_EMBEDDING_API_BASE, using hash");
            config.kind = EmbedderKind::Hash;
        }
        config
    }

    pub fn disabled() -> Self {
        Self {
            kind: EmbedderKind::Disabled,
            ..Self::default()
        }
    }

    pub fn provider(api_base: &str, api_key: &str, model: &str) -> Self {
        Self {
            kind: EmbedderKind::Provider,
            api_base: api_base.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            ..Self::default()
        }
    }
}

/// Builds one embedder instance; each lane owns its own.
pub fn build_embedder(config: &EmbedderConfig) -> StoreResult<Option<Box<dyn Embedder>>> {
    match config.kind {
        EmbedderKind::Hash => Ok(Some(Box::new(HashEmbedder::new(config.dimensions)))),
        EmbedderKind::Provider => Ok(Some(Box::new(ProviderEmbedder::new(config)?))),
        EmbedderKind::Disabled => Ok(None),
    }
}

/// Deterministic token-hashing embedder (FNV-1a buckets with sign, L2 normalized).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
        let mut vector = vec![0.0_f32; self.dimensions];
        for token in tokenize_text(text) {
            let hash = fnv1a_hash(token.as_bytes());
            let index = (hash as usize) % self.dimensions;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        normalize(&mut vector);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn label(&self) -> &str {
        "hash"
    }
}

/// OpenAI-compatible `POST {api_base}/embeddings` client.
pub struct ProviderEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl ProviderEmbedder {
    pub fn new(config: &EmbedderConfig) -> StoreResult<Self> {
        let api_base = config.api_base.trim().trim_end_matches('/');
        if api_base.is_empty() {
            return Err(StoreError::Embedding(
                "embedding api_base must not be empty".to_string(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|error| {
                StoreError::Embedding(format!("failed to build embedding client: {error}"))
            })?;
        Ok(Self {
            client,
            endpoint: format!("{api_base}/embeddings"),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions.max(1),
        })
    }
}

impl Embedder for ProviderEmbedder {
    fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "input": [text],
        }));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request
            .send()
            .map_err(|error| StoreError::Embedding(format!("embedding request failed: {error}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(StoreError::Embedding(format!(
                "embedding request failed with status {}: {}",
                status.as_u16(),
                body.chars().take(240).collect::<String>()
            )));
        }

        let payload = response.json::<serde_json::Value>().map_err(|error| {
            StoreError::Embedding(format!("failed to parse embedding response json: {error}"))
        })?;
        let raw_embedding = payload
            .get("data")
            .and_then(serde_json::Value::as_array)
            .and_then(|data| data.first())
            .and_then(|item| item.get("embedding"))
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                StoreError::Embedding("embedding response missing data[0].embedding".to_string())
            })?;
        let parsed = raw_embedding
            .iter()
            .map(|component| {
                component.as_f64().map(|value| value as f32).ok_or_else(|| {
                    StoreError::Embedding("embedding component must be numeric".to_string())
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(resize_and_normalize(&parsed, self.dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn label(&self) -> &str {
        "provider"
    }
}

fn resize_and_normalize(values: &[f32], dimensions: usize) -> Vec<f32> {
    let mut resized = vec![0.0_f32; dimensions.max(1)];
    let buckets = resized.len();
    for (index, value) in values.iter().enumerate() {
        resized[index % buckets] += *value;
    }
    normalize(&mut resized);
    resized
}

fn normalize(vector: &mut [f32]) {
    let magnitude = vector
        .iter()
        .map(|component| component * component)
        .sum::<f32>()
        .sqrt();
    if magnitude > 0.0 {
        for component in vector.iter_mut() {
            *component /= magnitude;
        }
    }
}

fn tokenize_text(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
