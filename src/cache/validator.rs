//! Response eligibility for caching.

use std::fmt;

use crate::domain::{CachedResponse, Request};

use super::principal::bearer_credential;

/// Why a response was kept out of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Status(u16),
    TooLarge { declared: u64, limit: u64 },
    MissingContentType,
    HtmlForApi,
    PrivateWithoutPrincipal,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Status(status) => write!(f, "status {status} is not cacheable"),
            Rejection::TooLarge { declared, limit } => {
                write!(f, "content-length {declared} exceeds {limit} bytes")
            }
            Rejection::MissingContentType => f.write_str("missing content-type"),
            Rejection::HtmlForApi => f.write_str("html body on an api path"),
            Rejection::PrivateWithoutPrincipal => {
                f.write_str("private api response without a principal")
            }
        }
    }
}

/// Pure predicate over response metadata.
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    max_response_bytes: u64,
    api_prefix: String,
}

impl ResponseValidator {
    pub fn new(max_response_bytes: u64, api_prefix: impl Into<String>) -> Self {
        Self {
            max_response_bytes,
            api_prefix: api_prefix.into(),
        }
    }

    pub fn is_cacheable(&self, response: &CachedResponse, request: Option<&Request>) -> bool {
        self.check(response, request).is_ok()
    }

    pub fn check(
        &self,
        response: &CachedResponse,
        request: Option<&Request>,
    ) -> Result<(), Rejection> {
        if response.status != 200 {
            return Err(Rejection::Status(response.status));
        }

        if let Some(declared) = response.content_length()
            && declared > self.max_response_bytes
        {
            return Err(Rejection::TooLarge {
                declared,
                limit: self.max_response_bytes,
            });
        }

        let Some(content_type) = response.content_type() else {
            return Err(Rejection::MissingContentType);
        };

        let Some(request) = request.filter(|r| r.path().starts_with(&self.api_prefix)) else {
            return Ok(());
        };

        if content_type.to_ascii_lowercase().contains("text/html") {
            return Err(Rejection::HtmlForApi);
        }

        if response.is_private() && bearer_credential(request).is_none() {
            return Err(Rejection::PrivateWithoutPrincipal);
        }

        Ok(())
    }
}
