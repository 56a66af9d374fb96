use crate::auth::{Credentials, HmacSigner};
use crate::config::{Config, DEFAULT_ENDPOINT, DEFAULT_MAX_RETRIES};
use crate::error::{Error, Result};
use crate::images::{ImagePayload, ImageSource};
use crate::models::{CollectionInfo, ProxySettings, Timeout};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Method, Request, Response, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("visualsnoop-rust/", env!("CARGO_PKG_VERSION"));

/// Connection settings for a [`CollectionClient`].
#[derive(Debug, Clone)]
pub struct CollectionOptions {
    /// Base URL for API calls, including scheme, host and path prefix.
    pub endpoint: String,
    pub proxies: ProxySettings,
    /// Extra attempts for requests that fail before reaching the server
    /// (DNS lookup, refused connection, connect timeout).
    pub max_retries: u32,
    /// Applied to calls made without their own timeout.
    pub default_timeout: Option<Timeout>,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            proxies: ProxySettings::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            default_timeout: None,
        }
    }
}

impl CollectionOptions {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_proxies(mut self, proxies: ProxySettings) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Timeout>) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Handle to one remote collection.
///
/// Only obtainable through a successful handshake, so [`id`](Self::id) is
/// never empty.
#[derive(Debug, Clone)]
pub struct CollectionClient {
    http: Client,
    /// Clients configured with a connect/read timeout pair, keyed by that pair.
    phased: Arc<Mutex<HashMap<(Duration, Duration), Client>>>,
    proxies: ProxySettings,
    signer: HmacSigner,
    endpoint: String,
    info: CollectionInfo,
    max_retries: u32,
    default_timeout: Option<Timeout>,
}

impl CollectionClient {
    /// Bind to the collection owning `credentials`.
    ///
    /// Performs `GET {endpoint}/collection?session=init` and fails with
    /// [`Error::CollectionResolution`] unless it yields a collection id.
    pub async fn connect(credentials: Credentials, options: CollectionOptions) -> Result<Self> {
        let endpoint = normalize_endpoint(&options.endpoint)?;

        let http = build_http(&options.proxies, None)?;

        let mut client = Self {
            http,
            phased: Arc::new(Mutex::new(HashMap::new())),
            proxies: options.proxies,
            signer: HmacSigner::new(credentials),
            endpoint,
            info: CollectionInfo::default(),
            max_retries: options.max_retries,
            default_timeout: options.default_timeout,
        };

        client.info = client.fetch_collection(None).await?;
        debug!(
            collection_id = %client.info.collection_id,
            collection_name = %client.info.collection_name,
            "Resolved collection"
        );
        Ok(client)
    }

    /// Connect using credentials, endpoint, proxies, retries and timeout
    /// from a resolved [`Config`].
    pub async fn from_config(config: &Config) -> Result<Self> {
        let options = CollectionOptions {
            endpoint: config.endpoint.clone(),
            proxies: config.proxies.clone(),
            max_retries: config.max_retries,
            default_timeout: config.timeout.map(Timeout::Total),
        };
        Self::connect(config.credentials()?, options).await
    }

    pub fn id(&self) -> &str {
        &self.info.collection_id
    }

    pub fn name(&self) -> &str {
        &self.info.collection_name
    }

    pub fn user(&self) -> &str {
        &self.info.user
    }

    pub fn info(&self) -> &CollectionInfo {
        &self.info
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Metadata for an indexed image.
    pub async fn get_image(&self, image_id: &str, timeout: Option<Timeout>) -> Result<Value> {
        let url = self.url(&format!("image/{image_id}"))?;
        self.call(Method::GET, url, None, timeout).await
    }

    /// Add an image to the collection.
    ///
    /// Without `image_id` the server assigns one and returns it as
    /// `image_id` in the body. An existing image is only overwritten when an
    /// id is given and `update_existing` is set.
    pub async fn add_image(
        &self,
        image: impl Into<ImageSource>,
        image_id: Option<&str>,
        update_existing: bool,
        timeout: Option<Timeout>,
    ) -> Result<Value> {
        let payload = image.into().resolve().await?;
        let (method, path) = add_image_route(image_id, update_existing);
        let url = self.url(&path)?;
        self.call(method, url, Some(payload), timeout).await
    }

    pub async fn delete_image(&self, image_id: &str, timeout: Option<Timeout>) -> Result<Value> {
        let url = self.url(&format!("image/{image_id}"))?;
        self.call(Method::DELETE, url, None, timeout).await
    }

    /// Search the collection using one of its own images as the query.
    pub async fn search_images_by_id(
        &self,
        image_id: &str,
        timeout: Option<Timeout>,
    ) -> Result<Value> {
        let url = self.url(&format!("search/{image_id}"))?;
        self.call(Method::GET, url, None, timeout).await
    }

    /// Search the collection using image content sent in the request body.
    pub async fn search_images(
        &self,
        image: impl Into<ImageSource>,
        timeout: Option<Timeout>,
    ) -> Result<Value> {
        let payload = image.into().resolve().await?;
        let url = self.url("search")?;
        self.call(Method::POST, url, Some(payload), timeout).await
    }

    /// List images ordered by insertion time, starting after `start`.
    /// A `count` of zero is treated as absent.
    pub async fn get_images(
        &self,
        start: Option<&str>,
        count: Option<u32>,
        timeout: Option<Timeout>,
    ) -> Result<Value> {
        let mut url = self.url("images")?;
        append_listing_query(&mut url, start, count);
        self.call(Method::GET, url, None, timeout).await
    }

    async fn fetch_collection(&self, timeout: Option<Timeout>) -> Result<CollectionInfo> {
        let mut url = self.url("collection")?;
        url.query_pairs_mut().append_pair("session", "init");
        let body = self.execute(Method::GET, url, None, timeout).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::unresolved_collection());
        }
        let value: Value = serde_json::from_slice(&body)?;
        CollectionInfo::from_handshake(&value)
    }

    fn url(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{path}", self.endpoint);
        Url::parse(&raw).map_err(|err| Error::InvalidConfig(format!("invalid url {raw}: {err}")))
    }

    async fn call(
        &self,
        method: Method,
        url: Url,
        payload: Option<ImagePayload>,
        timeout: Option<Timeout>,
    ) -> Result<Value> {
        let body = self.execute(method, url, payload, timeout).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Build, sign and send one request, returning the raw response body.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        payload: Option<ImagePayload>,
        timeout: Option<Timeout>,
    ) -> Result<Vec<u8>> {
        let (http, deadline) = self.transport_for(timeout.or(self.default_timeout))?;
        let mut builder = http
            .request(method, url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(deadline) = deadline {
            builder = builder.timeout(deadline);
        }
        if let Some(payload) = payload {
            if let Some(content_type) = payload.content_type {
                builder = builder.header(CONTENT_TYPE, content_type);
            }
            builder = builder.body(payload.bytes);
        }

        let mut request = builder.build()?;
        let signed = self.signer.sign(&mut request)?;

        let response = self.send(&http, request).await?;
        let status = response.status();
        if status.is_success() {
            debug!(method = %signed.method, path = %signed.path, %status, "Request completed");
        } else {
            warn!(
                method = %signed.method,
                path = %signed.path,
                %status,
                "Request returned non-success status"
            );
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Client and whole-request deadline for a call. A connect/read pair is
    /// enforced by a client built with those timeouts, created once per pair.
    fn transport_for(&self, timeout: Option<Timeout>) -> Result<(Client, Option<Duration>)> {
        match timeout {
            None => Ok((self.http.clone(), None)),
            Some(Timeout::Total(deadline)) => Ok((self.http.clone(), Some(deadline))),
            Some(Timeout::Split { connect, read }) => {
                let mut phased = self.phased.lock();
                if let Some(http) = phased.get(&(connect, read)) {
                    return Ok((http.clone(), None));
                }
                let http = build_http(&self.proxies, Some((connect, read)))?;
                phased.insert((connect, read), http.clone());
                Ok((http, None))
            }
        }
    }

    /// Send a signed request, resending it only when the connection could not
    /// be established.
    async fn send(&self, http: &Client, mut request: Request) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            let replay = if attempt < self.max_retries {
                request.try_clone()
            } else {
                None
            };
            match http.execute(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_connect() => match replay {
                    Some(next) => {
                        attempt += 1;
                        warn!(
                            attempt,
                            max_retries = self.max_retries,
                            error = %err,
                            "Connection failed, retrying"
                        );
                        request = next;
                    }
                    None => return Err(err.into()),
                },
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn build_http(proxies: &ProxySettings, phases: Option<(Duration, Duration)>) -> Result<Client> {
    let mut builder = Client::builder().user_agent(USER_AGENT);
    if let Some((connect, read)) = phases {
        builder = builder.connect_timeout(connect).read_timeout(read);
    }
    for proxy in proxies.to_proxies()? {
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|err| Error::InvalidConfig(format!("failed to build client: {err}")))
}

/// Method and path for an upload: `POST image`, `PUT image/{id}` when
/// overwriting, otherwise `POST image/{id}`.
pub fn add_image_route(image_id: Option<&str>, update_existing: bool) -> (Method, String) {
    match image_id {
        None => (Method::POST, "image".to_string()),
        Some(id) if update_existing => (Method::PUT, format!("image/{id}")),
        Some(id) => (Method::POST, format!("image/{id}")),
    }
}

fn append_listing_query(url: &mut Url, start: Option<&str>, count: Option<u32>) {
    let count = count.filter(|c| *c > 0);
    if start.is_none() && count.is_none() {
        return;
    }
    let mut pairs = url.query_pairs_mut();
    if let Some(start) = start {
        pairs.append_pair("start", start);
    }
    if let Some(count) = count {
        pairs.append_pair("count", &count.to_string());
    }
}

fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed)
        .map_err(|err| Error::InvalidConfig(format!("invalid endpoint {endpoint:?}: {err}")))?;
    if parsed.cannot_be_a_base() || !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidConfig(format!(
            "endpoint must be an http(s) URL: {endpoint:?}"
        )));
    }
    Ok(trimmed.to_string())
}
