//! AWS Signature Version 4 request signing.
//!
//! Only the subset the SES client needs: a fixed set of signed headers
//! (`host`, `x-amz-content-sha256`, `x-amz-date`) and an empty or
//! pre-canonicalized query string.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Signing failed because a key could not be used for HMAC.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to derive request signature: {0}")]
pub struct SigningError(String);

/// Header values to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// `Authorization` header value.
    pub authorization: String,
    /// `x-amz-date` header value.
    pub amz_date: String,
    /// `x-amz-content-sha256` header value.
    pub payload_hash: String,
}

/// What is being signed.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    /// HTTP method, uppercase.
    pub method: &'a str,
    /// URI-encoded absolute path.
    pub canonical_uri: &'a str,
    /// Canonical query string, empty when there is none.
    pub canonical_query: &'a str,
    /// Host header value, including a non-default port.
    pub host: &'a str,
    /// Request body bytes.
    pub payload: &'a [u8],
}

/// Credentials and scope used to sign.
#[derive(Debug, Clone, Copy)]
pub struct SigningScope<'a> {
    /// Access key ID.
    pub access_key: &'a str,
    /// Secret access key.
    pub secret_key: &'a str,
    /// Region name, e.g. `us-east-1`.
    pub region: &'a str,
    /// Service name, e.g. `ses`.
    pub service: &'a str,
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SigningError(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Derives the per-day signing key.
pub fn signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SigningError> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Signs a request at the given instant.
pub fn sign(
    scope: &SigningScope<'_>,
    request: &RequestParts<'_>,
    now: DateTime<Utc>,
) -> Result<SignedRequest, SigningError> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(request.payload);

    let canonical_headers = format!(
        "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
        request.host.to_lowercase(),
        payload_hash,
        amz_date
    );
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.canonical_uri,
        request.canonical_query,
        canonical_headers,
        SIGNED_HEADERS,
        payload_hash
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, scope.region, scope.service
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(scope.secret_key, &date_stamp, scope.region, scope.service)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(SignedRequest {
        authorization: format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, scope.access_key, credential_scope, SIGNED_HEADERS, signature
        ),
        amz_date,
        payload_hash,
    })
}
