//! Per-principal cache namespaces.
//!
//! The namespace suffix is an HMAC-SHA256 of the bearer credential under a
//! deployment key, hex-encoded and truncated. The credential itself never
//! appears in a cache name.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::domain::Request;
use crate::domain::http::AUTHORIZATION;

type HmacSha256 = Hmac<Sha256>;

pub const PUBLIC_SUFFIX: &str = "public";

const SUFFIX_LEN: usize = 16;

/// Extracts the token from `Authorization: Bearer <token>`.
///
/// The scheme is case-insensitive; an empty token or one containing
/// whitespace counts as absent.
pub fn bearer_credential(request: &Request) -> Option<&str> {
    let header = request.headers.get(AUTHORIZATION)?.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

#[derive(Clone)]
pub struct PrincipalNamespacer {
    key: Vec<u8>,
}

impl PrincipalNamespacer {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// `public` for anonymous requests, otherwise a stable digest of the credential.
    pub fn resolve(&self, request: &Request) -> String {
        match bearer_credential(request) {
            Some(token) => self.digest(token),
            None => PUBLIC_SUFFIX.to_string(),
        }
    }

    fn digest(&self, credential: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(credential.as_bytes());
        let mut encoded = hex::encode(mac.finalize().into_bytes());
        encoded.truncate(SUFFIX_LEN);
        encoded
    }
}
