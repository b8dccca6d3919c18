use mailindex_core::config::PRODUCT;
use serde_json::Value;

use crate::{UpdateError, UpdateResult};

/// The parameters of an `updateRequest` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDescriptor {
    pub target_version: String,
    pub update_url: String,
    pub sha256: String,
    pub platform: String,
    pub signature: String,
}

impl UpdateDescriptor {
    /// Reads the call parameters. Signed fields are kept byte-for-byte as sent;
    /// whitespace only matters for the emptiness check.
    pub fn from_params(params: &Value) -> UpdateResult<Self> {
        let field = |name: &str| -> UpdateResult<String> {
            params
                .get(name)
                .and_then(Value::as_str)
                .filter(|value| !value.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| UpdateError::InvalidDescriptor(format!("missing or empty '{name}'")))
        };

        let descriptor = Self {
            target_version: field("targetVersion")?,
            update_url: field("updateUrl")?,
            sha256: field("sha256")?,
            platform: field("platform")?,
            signature: field("signature")?.trim().to_string(),
        };
        if descriptor.sha256.len() != 64
            || !descriptor.sha256.chars().all(|character| character.is_ascii_hexdigit())
        {
            return Err(UpdateError::InvalidDescriptor(
                "'sha256' must be 64 hex characters".to_string(),
            ));
        }
        Ok(descriptor)
    }

    /// The exact bytes the publisher signs.
    pub fn signed_message(&self) -> String {
        signed_message(&self.target_version, &self.platform, &self.sha256, &self.update_url)
    }
}

pub fn signed_message(version: &str, platform: &str, sha256: &str, url: &str) -> String {
    format!("{PRODUCT}|host_version={version}|platform={platform}|sha256={sha256}|url={url}")
}
