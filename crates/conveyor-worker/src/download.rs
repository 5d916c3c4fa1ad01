//! Job payload contract and checksum-aware download (spec §4.7).
//!
//! A payload is `<script>|<url>[|<arg>]`, where `<url>` may carry a
//! `?checksum=<algo>:<digest>` query parameter, or the digest may appear
//! bare — its algorithm then inferred from its length (32 hex chars = MD5,
//! 40 = SHA-1, 64 = SHA-256). If the destination file already exists and
//! matches the checksum, the download is skipped.

use conveyor_core::ConveyorError;
use std::path::Path;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub script: String,
    pub url: String,
    pub arg: Option<String>,
    pub checksum: Option<Checksum>,
}

/// Infers a checksum's algorithm from its hex digest length.
fn algorithm_for_digest(digest: &str) -> Option<ChecksumAlgorithm> {
    match digest.len() {
        32 => Some(ChecksumAlgorithm::Md5),
        40 => Some(ChecksumAlgorithm::Sha1),
        64 => Some(ChecksumAlgorithm::Sha256),
        _ => None,
    }
}

fn parse_checksum(raw: &str) -> Option<Checksum> {
    if let Some((algo, digest)) = raw.split_once(':') {
        let algorithm = match algo {
            "md5" => ChecksumAlgorithm::Md5,
            "sha1" => ChecksumAlgorithm::Sha1,
            "sha256" => ChecksumAlgorithm::Sha256,
            _ => return None,
        };
        return Some(Checksum {
            algorithm,
            digest: digest.to_string(),
        });
    }
    algorithm_for_digest(raw).map(|algorithm| Checksum {
        algorithm,
        digest: raw.to_string(),
    })
}

/// Splits a `?checksum=...` query parameter off a URL, if present.
fn extract_checksum_param(url: &str) -> (String, Option<Checksum>) {
    let Some((base, query)) = url.split_once('?') else {
        return (url.to_string(), None);
    };
    let mut remaining = Vec::new();
    let mut checksum = None;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("checksum=") {
            checksum = parse_checksum(value);
        } else {
            remaining.push(pair);
        }
    }
    let base = if remaining.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{}", remaining.join("&"))
    };
    (base, checksum)
}

/// Parses a job payload string into its script, URL, optional argument and
/// optional checksum.
pub fn parse_payload(payload: &str) -> Result<Payload, ConveyorError> {
    let mut fields = payload.split('|');
    let script = fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConveyorError::BadRequest("payload is missing a script".into()))?
        .to_string();
    let raw_url = fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConveyorError::BadRequest("payload is missing a URL".into()))?;
    let arg = fields.next().map(str::to_string).filter(|s| !s.is_empty());

    let (url, checksum) = extract_checksum_param(raw_url);
    Ok(Payload {
        script,
        url,
        arg,
        checksum,
    })
}

fn hex_digest(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        ChecksumAlgorithm::Md5 => format!("{:x}", md5::compute(bytes)),
        ChecksumAlgorithm::Sha1 => {
            use sha1::{Digest, Sha1};
            hex::encode(Sha1::digest(bytes))
        }
        ChecksumAlgorithm::Sha256 => {
            use sha2::{Digest, Sha256};
            hex::encode(Sha256::digest(bytes))
        }
    }
}

/// Whether `path` already holds content matching `checksum`.
async fn matches_existing(path: &Path, checksum: &Checksum) -> bool {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return false;
    };
    hex_digest(checksum.algorithm, &bytes).eq_ignore_ascii_case(&checksum.digest)
}

/// Downloads `payload.url` to `dest` unless `dest` already matches the
/// payload's checksum. Verifies the downloaded content against the
/// checksum when one is present, failing terminally on mismatch.
pub async fn download_if_needed(
    http: &reqwest::Client,
    payload: &Payload,
    dest: &Path,
) -> Result<(), ConveyorError> {
    if let Some(checksum) = &payload.checksum {
        if dest.exists() && matches_existing(dest, checksum).await {
            tracing::debug!(url = %payload.url, "checksum matches, skipping download");
            return Ok(());
        }
    }

    let response = http
        .get(&payload.url)
        .send()
        .await
        .map_err(|e| ConveyorError::Transient(format!("download request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(ConveyorError::Transient(format!(
            "download returned {}",
            response.status()
        )));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| ConveyorError::Transient(format!("reading download body failed: {e}")))?;

    if let Some(checksum) = &payload.checksum {
        let actual = hex_digest(checksum.algorithm, &body);
        if !actual.eq_ignore_ascii_case(&checksum.digest) {
            return Err(ConveyorError::Terminal(format!(
                "checksum mismatch: expected {}, got {actual}",
                checksum.digest
            )));
        }
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| ConveyorError::Transient(format!("could not create {}: {e}", dest.display())))?;
    file.write_all(&body)
        .await
        .map_err(|e| ConveyorError::Transient(format!("could not write {}: {e}", dest.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_script_url_and_arg() {
        let payload = parse_payload("build.sh|https://example.org/build.sh|release").unwrap();
        assert_eq!(payload.script, "build.sh");
        assert_eq!(payload.url, "https://example.org/build.sh");
        assert_eq!(payload.arg.as_deref(), Some("release"));
        assert!(payload.checksum.is_none());
    }

    #[test]
    fn parses_explicit_algo_checksum() {
        let digest = "a".repeat(64);
        let payload = parse_payload(&format!(
            "build.sh|https://example.org/build.sh?checksum=sha256:{digest}"
        ))
        .unwrap();
        assert_eq!(payload.url, "https://example.org/build.sh");
        assert_eq!(
            payload.checksum,
            Some(Checksum {
                algorithm: ChecksumAlgorithm::Sha256,
                digest
            })
        );
    }

    #[test]
    fn infers_algorithm_from_bare_digest_length() {
        let md5_digest = "a".repeat(32);
        let payload =
            parse_payload(&format!("s|u?checksum={md5_digest}")).unwrap();
        assert_eq!(payload.checksum.unwrap().algorithm, ChecksumAlgorithm::Md5);

        let sha1_digest = "b".repeat(40);
        let payload =
            parse_payload(&format!("s|u?checksum={sha1_digest}")).unwrap();
        assert_eq!(payload.checksum.unwrap().algorithm, ChecksumAlgorithm::Sha1);
    }

    #[test]
    fn missing_url_is_rejected() {
        assert!(parse_payload("script-only").is_err());
    }

    #[tokio::test]
    async fn skips_download_when_existing_file_matches_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("script.sh");
        tokio::fs::write(&dest, b"hello").await.unwrap();
        let digest = hex_digest(ChecksumAlgorithm::Sha256, b"hello");

        let payload = Payload {
            script: "script.sh".into(),
            url: "https://unreachable.invalid/script.sh".into(),
            arg: None,
            checksum: Some(Checksum {
                algorithm: ChecksumAlgorithm::Sha256,
                digest,
            }),
        };
        let http = reqwest::Client::new();
        download_if_needed(&http, &payload, &dest).await.unwrap();
    }
}
