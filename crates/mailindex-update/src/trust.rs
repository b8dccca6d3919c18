use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey};
use mailindex_core::config::env_list;
use tracing::debug;

use crate::descriptor::UpdateDescriptor;
use crate::{UpdateError, UpdateResult};

/// Publisher keys compiled into the binary. Keep the outgoing key listed
/// alongside the new one while rotating.
pub const EMBEDDED_PUBLIC_KEYS: &[&str] = &["uPb2qGvclp88YLLaPEBbx2TyppW02AMGEsB5gmK9nfA="];

/// Comma-separated base64 keys that replace the embedded list when set.
pub const PUBLIC_KEYS_ENV: &str = "MAILINDEX_UPDATE_PUBLIC_KEYS_BASE64";

/// The set of base64 ed25519 public keys an update may be signed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedKeys {
    keys: Vec<String>,
}

impl TrustedKeys {
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(Into::into)
                .map(|key: String| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .collect(),
        }
    }

    pub fn embedded() -> Self {
        Self::new(EMBEDDED_PUBLIC_KEYS.iter().copied())
    }

    /// The environment override when present, otherwise the embedded keys.
    pub fn from_env() -> Self {
        let overridden = env_list(PUBLIC_KEYS_ENV);
        if overridden.is_empty() {
            Self::embedded()
        } else {
            debug!(count = overridden.len(), "using update keys from {PUBLIC_KEYS_ENV}");
            Self::new(overridden)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Accepts when any trusted key verifies the descriptor's signature.
    ///
    /// Keys that fail to decode are skipped rather than failing the whole check.
    pub fn verify(&self, descriptor: &UpdateDescriptor) -> UpdateResult<()> {
        if self.keys.is_empty() {
            return Err(UpdateError::NotConfigured);
        }
        let signature_bytes = decode_base64_fixed::<64>("signature", &descriptor.signature)?;
        let signature = Signature::from_bytes(&signature_bytes);
        let message = descriptor.signed_message();

        let mut usable_keys = 0_usize;
        for raw in &self.keys {
            let Ok(key_bytes) = decode_base64_fixed::<32>("public key", raw) else {
                continue;
            };
            let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
                continue;
            };
            usable_keys += 1;
            if verifying_key
                .verify_strict(message.as_bytes(), &signature)
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(UpdateError::Signature(format!(
            "no trusted key verified the signature ({usable_keys} of {} keys usable)",
            self.keys.len()
        )))
    }
}

fn decode_base64_fixed<const N: usize>(label: &str, raw: &str) -> UpdateResult<[u8; N]> {
    let decoded = BASE64
        .decode(raw.trim())
        .map_err(|error| UpdateError::Signature(format!("failed to decode base64 {label}: {error}")))?;
    let decoded_len = decoded.len();
    decoded.try_into().map_err(|_| {
        UpdateError::Signature(format!("{label} decoded to {decoded_len} bytes (expected {N})"))
    })
}
