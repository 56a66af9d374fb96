use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Identity of the collection bound to a key pair, as returned by
/// `GET /collection?session=init`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub collection_id: String,
    #[serde(default)]
    pub collection_name: String,
    #[serde(default)]
    pub user: String,
}

impl CollectionInfo {
    /// Interpret a handshake body.
    ///
    /// Falsy bodies (`null`, `false`, `0`, `""`, `[]`, `{}`) and bodies without
    /// a non-empty `collection_id` are rejected. The server's `message` field,
    /// when present, becomes the error text.
    pub fn from_handshake(body: &Value) -> Result<Self> {
        if is_falsy(body) {
            return Err(Error::unresolved_collection());
        }

        let collection_id = body
            .get("collection_id")
            .map(value_text)
            .filter(|id| !id.is_empty());
        let Some(collection_id) = collection_id else {
            let message = body
                .get("message")
                .map(value_text)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| Error::UNRESOLVED_COLLECTION.to_string());
            return Err(Error::CollectionResolution(message));
        };

        Ok(Self {
            collection_id,
            collection_name: body
                .get("collection_name")
                .map(value_text)
                .unwrap_or_default(),
            user: body.get("user").map(value_text).unwrap_or_default(),
        })
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Per-call timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Budget for the whole request.
    Total(Duration),
    /// `connect` bounds establishing the connection; `read` bounds each wait
    /// for response data once connected.
    Split { connect: Duration, read: Duration },
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::Total(d)
    }
}

impl From<(Duration, Duration)> for Timeout {
    fn from((connect, read): (Duration, Duration)) -> Self {
        Timeout::Split { connect, read }
    }
}

/// Proxy URLs keyed by scheme: `http`, `https` or `all`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxySettings(BTreeMap<String, String>);

impl ProxySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, scheme: impl Into<String>, url: impl Into<String>) -> Self {
        self.insert(scheme, url);
        self
    }

    pub fn insert(&mut self, scheme: impl Into<String>, url: impl Into<String>) {
        self.0.insert(scheme.into().to_ascii_lowercase(), url.into());
    }

    pub fn get(&self, scheme: &str) -> Option<&str> {
        self.0.get(scheme).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn to_proxies(&self) -> Result<Vec<reqwest::Proxy>> {
        self.0
            .iter()
            .map(|(scheme, url)| {
                let proxy = match scheme.as_str() {
                    "http" => reqwest::Proxy::http(url),
                    "https" => reqwest::Proxy::https(url),
                    "all" => reqwest::Proxy::all(url),
                    other => {
                        return Err(Error::InvalidConfig(format!(
                            "unsupported proxy scheme {other:?}"
                        )));
                    }
                };
                proxy.map_err(|err| Error::InvalidConfig(format!("invalid proxy {url}: {err}")))
            })
            .collect()
    }
}
