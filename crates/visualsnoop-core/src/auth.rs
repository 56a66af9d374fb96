//! VSHMAC request signing.
//!
//! Every request carries an `Authorization` header of the form
//!
//! ```text
//! VSHMAC <public_key>:<signature>
//! ```
//!
//! where `signature = Base64(HMAC-SHA1(secret_key, StringToSign))` and
//!
//! ```text
//! StringToSign = HTTP-Verb + "\n" +
//!                Path + "\n" +
//!                Date
//! ```
//!
//! Only the URL path is signed. The query string and fragment are left out,
//! so two requests that differ only in their query share a signature.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, DATE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Request, Url};
use sha1::Sha1;
use tracing::debug;

use crate::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

pub const AUTH_TYPE: &str = "VSHMAC";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CLIENT_VERSION_HEADER: HeaderName =
    HeaderName::from_static("x-visualsnoop-client-version");

/// Key pair issued for a collection.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub public_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(public_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &self.public_key)
            .field("secret_key", &"****")
            .finish()
    }
}

/// Outcome of signing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: Method,
    pub path: String,
    pub date: String,
    pub signature: String,
    pub authorization: String,
}

/// Attaches VSHMAC authentication headers to outgoing requests.
#[derive(Clone)]
pub struct HmacSigner {
    credentials: Credentials,
    client_version: Option<String>,
}

impl fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSigner")
            .field("credentials", &self.credentials)
            .field("client_version", &self.client_version)
            .finish()
    }
}

impl HmacSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            client_version: Some(CLIENT_VERSION.to_string()),
        }
    }

    /// Override the version advertised in `X-Visualsnoop-Client-Version`.
    /// `None` or an empty string suppresses the header.
    pub fn with_client_version(mut self, version: Option<String>) -> Self {
        self.client_version = version;
        self
    }

    pub fn public_key(&self) -> &str {
        &self.credentials.public_key
    }

    pub fn sign(&self, request: &mut Request) -> Result<SignedRequest> {
        let method = request.method().clone();
        let url = request.url().clone();
        self.sign_parts(&method, &url, request.headers_mut())
    }

    /// Sign a request given as its parts, mutating `headers` in place.
    ///
    /// A `Date` header already present is kept as-is, which is how callers
    /// pin the timestamp.
    pub fn sign_parts(
        &self,
        method: &Method,
        url: &Url,
        headers: &mut HeaderMap,
    ) -> Result<SignedRequest> {
        if !headers.contains_key(DATE) {
            headers.insert(DATE, header_value(&rfc1123_date(Utc::now()))?);
        }

        if let Some(version) = self.client_version.as_deref()
            && !version.is_empty()
        {
            headers.insert(CLIENT_VERSION_HEADER, header_value(version)?);
        }

        let date = headers
            .get(DATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Signing("Date header is not valid ASCII".into()))?
            .to_string();

        let path = url.path().to_string();
        let signature = compute_signature(&self.credentials.secret_key, method, &path, &date)?;
        let authorization = format!(
            "{AUTH_TYPE} {}:{signature}",
            self.credentials.public_key
        );
        headers.insert(AUTHORIZATION, header_value(&authorization)?);

        debug!(
            public_key = %self.credentials.public_key,
            method = %method,
            path = %path,
            date = %date,
            "Signed request"
        );

        Ok(SignedRequest {
            method: method.clone(),
            path,
            date,
            signature,
            authorization,
        })
    }
}

/// Base64(HMAC-SHA1(secret, "{method}\n{path}\n{date}")).
///
/// Surrounding whitespace on the secret is ignored.
pub fn compute_signature(
    secret_key: &str,
    method: &Method,
    path: &str,
    date: &str,
) -> Result<String> {
    let string_to_sign = format!("{}\n{path}\n{date}", method.as_str());
    let mut mac = HmacSha1::new_from_slice(secret_key.trim().as_bytes())
        .map_err(|err| Error::Signing(err.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(BASE64.encode(digest).trim_end().to_string())
}

/// RFC 1123 date, always expressed in GMT.
pub fn rfc1123_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Signing(format!("invalid header value: {value:?}")))
}
