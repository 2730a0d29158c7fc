//! `bce-auth-v1` request signing for IAM access keys

use crate::api::{HttpRequest, QianfanError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Validity window written into each signature
pub const SIGNATURE_EXPIRATION_SECS: u64 = 1800;

/// Headers covered by the signature when present
const SIGNED_HEADERS: [&str; 3] = ["content-type", "host", "x-bce-date"];

/// Sign `request` in place, setting `host`, `x-bce-date` and `authorization`.
pub fn sign_request(
    request: &mut HttpRequest,
    access_key: &str,
    secret_key: &str,
    now: DateTime<Utc>,
    expiration_secs: u64,
) -> Result<(), QianfanError> {
    let url = Url::parse(&request.url)
        .map_err(|e| QianfanError::validation(format!("invalid URL {}: {}", request.url, e)))?;
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => {
            return Err(QianfanError::validation(format!(
                "URL has no host: {}",
                request.url
            )))
        }
    };
    let timestamp = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    request.set_header("host", host);
    request.set_header("x-bce-date", timestamp.clone());

    let mut query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    query.extend(request.query.iter().cloned());

    let (headers, signed_headers) = canonical_headers(request);
    let canonical_request = format!(
        "{}\n{}\n{}\n{}",
        request.method.as_str(),
        canonical_uri(url.path()),
        canonical_query(&query),
        headers
    );

    let auth_prefix = format!("bce-auth-v1/{}/{}/{}", access_key, timestamp, expiration_secs);
    let signing_key = hmac_hex(secret_key.as_bytes(), auth_prefix.as_bytes())?;
    let signature = hmac_hex(signing_key.as_bytes(), canonical_request.as_bytes())?;

    request.set_header(
        "authorization",
        format!("{}/{}/{}", auth_prefix, signed_headers, signature),
    );
    Ok(())
}

fn hmac_hex(key: &[u8], data: &[u8]) -> Result<String, QianfanError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| QianfanError::validation(format!("invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Path with every segment percent-encoded, slashes kept
fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            urlencoding::encode(&decoded).into_owned()
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<String> = pairs
        .iter()
        .filter(|(key, _)| !key.eq_ignore_ascii_case("authorization"))
        .map(|(key, value)| {
            format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
        })
        .collect();
    encoded.sort();
    encoded.join("&")
}

/// Canonical header block and the `;`-joined list of signed names
fn canonical_headers(request: &HttpRequest) -> (String, String) {
    let mut lines = Vec::new();
    let mut names = Vec::new();
    for name in SIGNED_HEADERS {
        if let Some(value) = request.header(name) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            lines.push(format!("{}:{}", name, urlencoding::encode(value)));
            names.push(name);
        }
    }
    lines.sort();
    names.sort_unstable();
    (lines.join("\n"), names.join(";"))
}
