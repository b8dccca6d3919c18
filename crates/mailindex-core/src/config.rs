//! Static host configuration and `MAILINDEX_*` environment lookups.

use std::str::FromStr;

/// Version reported by `hello` and compared by `updateCheck`.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol schema version reported by `hello`; bumped on incompatible changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Product label that prefixes every signed update message.
pub const PRODUCT: &str = "mailindex-host";

pub mod framing {
    /// Upper bound for a single length-prefixed frame.
    pub const MAX_FRAME_BYTES: u32 = 128 * 1024 * 1024;
}

pub mod logging {
    pub const LOG_DIR_REL: &str = ".mailindex/logs";
    pub const LOG_FILE_NAME: &str = "mailindex-host.log";
    pub const DEFAULT_FILTER: &str = "info";
}

pub mod sqlite {
    pub const DATA_DIR_NAME: &str = "mailindex";
    pub const EMAIL_DB_FILE: &str = "email.db";
    pub const MEMORY_DB_FILE: &str = "memory.db";

    pub const PRAGMA_BUSY_TIMEOUT_MS: u64 = 2_000;
    pub const PRAGMA_CACHE_SIZE_KIB_NEG: i64 = -64_000;

    pub const FTS_TOKENIZE: &str = "porter unicode61 remove_diacritics 2 tokenchars '-_.@'";
    pub const FTS_PREFIXES: &str = "2 3 4";
}

pub mod search {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 1_000;
    pub const SNIPPET_TOKENS: i64 = 16;
    pub const DEBUG_SAMPLE_LIMIT: i64 = 10;
    pub const DATE_RANGE_DEFAULT_LIMIT: i64 = 1_000;
    pub const MEMORY_READ_TOLERANCE_MS: i64 = 600_000;
    pub const MEMORY_READ_LIMIT: i64 = 50;
}

pub mod hybrid {
    pub const VECTOR_WEIGHT: f64 = 0.7;
    pub const TEXT_WEIGHT: f64 = 0.3;
    pub const CANDIDATE_MULTIPLIER: i64 = 4;
    /// Minimum hybrid score for candidates found only by vector similarity.
    pub const MIN_VECTOR_ONLY_SCORE: f64 = 0.1;
}

pub mod rebuild {
    pub const DEFAULT_TARGET: &str = "email";
    pub const DEFAULT_BATCH_SIZE: i64 = 500;
    pub const MAX_BATCH_SIZE: i64 = 5_000;
}

pub mod embedding {
    pub const DIMENSIONS: usize = 384;
    pub const EMAIL_BODY_MAX_WORDS: usize = 150;
    pub const MEMORY_CONTENT_MAX_WORDS: usize = 200;
    pub const PROVIDER_TIMEOUT_MS: u64 = 10_000;
    pub const PROVIDER_DEFAULT_MODEL: &str = "text-embedding-3-small";
}

pub mod update {
    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 30;
    pub const STAGED_SUFFIX: &str = ".new";
    pub const BACKUP_SUFFIX: &str = ".bak";
}

/// Reads a non-empty, trimmed environment variable.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Reads and parses an environment variable, ignoring unparsable values.
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|raw| raw.parse::<T>().ok())
}

/// Splits a comma-separated environment variable into trimmed, non-empty items.
pub fn env_list(name: &str) -> Vec<String> {
    env_string(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
