use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::{UpdateError, UpdateResult};

/// Fetches the update artifact into memory.
pub fn download_artifact(url: &str, timeout: Duration) -> UpdateResult<Vec<u8>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| UpdateError::Download(format!("failed to construct HTTP client: {error}")))?;
    let response = client
        .get(url)
        .header(
            reqwest::header::USER_AGENT,
            concat!("mailindex-host/", env!("CARGO_PKG_VERSION")),
        )
        .send()
        .map_err(|error| UpdateError::Download(format!("request to '{url}' failed: {error}")))?;
    if !response.status().is_success() {
        return Err(UpdateError::Download(format!(
            "request to '{url}' returned status {}",
            response.status().as_u16()
        )));
    }
    let bytes = response
        .bytes()
        .map_err(|error| UpdateError::Download(format!("failed to read body from '{url}': {error}")))?;
    if bytes.is_empty() {
        return Err(UpdateError::Download(format!("'{url}' returned an empty body")));
    }
    info!(url, bytes = bytes.len(), "downloaded update artifact");
    Ok(bytes.to_vec())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Compares the artifact digest with the signed one, ignoring hex case.
pub fn verify_digest(bytes: &[u8], expected: &str) -> UpdateResult<()> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(UpdateError::HashMismatch {
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn unit_verify_digest_is_case_insensitive() {
        let digest = sha256_hex(b"binary");
        verify_digest(b"binary", &digest.to_ascii_uppercase()).expect("uppercase digest");
        let error = verify_digest(b"other", &digest).expect_err("mismatch");
        assert!(matches!(error, UpdateError::HashMismatch { .. }));
    }

    #[test]
    fn integration_download_artifact_returns_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/host");
            then.status(200).body("new-binary");
        });
        let bytes = download_artifact(&server.url("/host"), Duration::from_secs(5)).expect("download");
        mock.assert();
        assert_eq!(bytes, b"new-binary");
    }

    #[test]
    fn regression_download_artifact_rejects_error_status_and_empty_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404).body("not found");
        });
        server.mock(|when, then| {
            when.method(GET).path("/empty");
            then.status(200).body("");
        });

        let error = download_artifact(&server.url("/missing"), Duration::from_secs(5)).expect_err("404");
        assert!(error.to_string().contains("404"));
        let error = download_artifact(&server.url("/empty"), Duration::from_secs(5)).expect_err("empty");
        assert!(error.to_string().contains("empty body"));
    }
}
