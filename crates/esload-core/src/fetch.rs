//! Network-only module fetching.
//!
//! Remote modules are fetched once per canonical URL. Redirects are followed
//! manually so that every hop is recorded and can be answered from the cache
//! later without touching the network.

use crate::error::LoaderError;
use crate::media_type::MediaType;
use crate::version::USER_AGENT;
use base64::Engine as _;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use percent_encoding::percent_decode_str;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{redirect, Client};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Maximum number of redirect hops followed for a single load.
pub const MAX_REDIRECTS: usize = 10;

/// A fetched module. Immutable once cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModule {
    /// Final URL after redirects.
    pub specifier: Url,
    pub media_type: MediaType,
    pub bytes: Bytes,
}

type InFlight = Shared<BoxFuture<'static, Result<(), LoaderError>>>;

#[derive(Default)]
struct State {
    modules: HashMap<String, CachedModule>,
    redirects: HashMap<String, Url>,
    failures: HashMap<String, LoaderError>,
    in_flight: HashMap<String, InFlight>,
}

struct Inner {
    http: Client,
    state: Mutex<State>,
}

/// Outcome of a single HTTP request.
enum Hop {
    Module(CachedModule),
    Redirect(Url),
}

/// Cache of remote modules with single-flight fetching.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone)]
pub struct RemoteFetchCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RemoteFetchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RemoteFetchCache")
            .field("modules", &state.modules.len())
            .field("redirects", &state.redirects.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

impl RemoteFetchCache {
    /// Create an empty cache with its own HTTP client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, LoaderError> {
        let http = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LoaderError::fetch("", format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(http))
    }

    /// Create an empty cache around an existing client.
    ///
    /// The client must not follow redirects itself, or hops go unrecorded.
    #[must_use]
    pub fn with_client(http: Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Load a module by URL, dispatching on its scheme.
    ///
    /// # Errors
    /// Returns an error if the scheme is unsupported or the load fails.
    pub async fn load(&self, specifier: &Url) -> Result<CachedModule, LoaderError> {
        match specifier.scheme() {
            "file" => self.load_local(specifier).await,
            "http" | "https" | "data" => self.load_remote(specifier).await,
            other => Err(LoaderError::fetch(
                specifier.as_str(),
                format!("Unsupported scheme '{other}'"),
            )),
        }
    }

    /// Load a remote (`http:`, `https:` or `data:`) module.
    ///
    /// Concurrent calls for the same URL share one request. Recorded
    /// redirects are followed before the content cache is consulted.
    ///
    /// # Errors
    /// Returns an error if the fetch fails, the server answers with a
    /// non-success status, or more than [`MAX_REDIRECTS`] hops are needed.
    pub async fn load_remote(&self, specifier: &Url) -> Result<CachedModule, LoaderError> {
        let mut current = specifier.clone();
        let mut hops = 0;

        loop {
            let pending = {
                let mut state = self.inner.lock();

                if let Some(next) = state.redirects.get(current.as_str()) {
                    hops += 1;
                    if hops > MAX_REDIRECTS {
                        return Err(LoaderError::RedirectLimit {
                            last: next.to_string(),
                        });
                    }
                    current = next.clone();
                    continue;
                }
                if let Some(module) = state.modules.get(current.as_str()) {
                    return Ok(module.clone());
                }
                if let Some(err) = state.failures.get(current.as_str()) {
                    return Err(err.clone());
                }

                if let Some(fut) = state.in_flight.get(current.as_str()) {
                    trace!(url = %current, "joining in-flight fetch");
                    fut.clone()
                } else {
                    let fut = self.spawn_hop(current.clone());
                    state
                        .in_flight
                        .insert(current.as_str().to_string(), fut.clone());
                    fut
                }
            };

            pending.await?;
        }
    }

    /// Read a `file:` module. Local files are not cached.
    ///
    /// # Errors
    /// Returns an error if the URL is not a file path or the file can't be read.
    pub async fn load_local(&self, specifier: &Url) -> Result<CachedModule, LoaderError> {
        let path = specifier
            .to_file_path()
            .map_err(|()| LoaderError::parse(specifier.as_str(), "not a local file URL"))?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| LoaderError::fs(&path, &e))?;

        Ok(CachedModule {
            specifier: specifier.clone(),
            media_type: MediaType::from_path(specifier.path()),
            bytes: Bytes::from(bytes),
        })
    }

    /// Where `from` was redirected to, if a redirect was recorded.
    #[must_use]
    pub fn redirect_target(&self, from: &Url) -> Option<Url> {
        self.inner.lock().redirects.get(from.as_str()).cloned()
    }

    /// Start one hop on a detached task so it completes even if every
    /// caller gives up, and publish its outcome to the shared state.
    fn spawn_hop(&self, url: Url) -> InFlight {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let outcome = if url.scheme() == "data" {
                decode_data_url(&url).map(Hop::Module)
            } else {
                inner.fetch_once(&url).await
            };

            let key = url.as_str().to_string();
            let mut state = inner.lock();
            state.in_flight.remove(&key);
            match outcome {
                Ok(Hop::Module(module)) => {
                    state.modules.insert(key, module);
                    Ok(())
                }
                Ok(Hop::Redirect(to)) => {
                    state.redirects.insert(key, to);
                    Ok(())
                }
                Err(err) => {
                    state.failures.insert(key, err.clone());
                    Err(err)
                }
            }
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(LoaderError::fetch("", format!("Fetch task failed: {e}"))),
            }
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn fetch_once(&self, url: &Url) -> Result<Hop, LoaderError> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "fetched");

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            // Drain so the connection can be reused.
            let _ = response.bytes().await;

            let location = location.ok_or_else(|| {
                LoaderError::fetch(url.as_str(), "Redirect response has no Location header")
            })?;
            let target = url.join(&location).map_err(|e| {
                LoaderError::fetch(url.as_str(), format!("Invalid redirect location '{location}': {e}"))
            })?;
            if !matches!(target.scheme(), "http" | "https") {
                return Err(LoaderError::fetch(
                    url.as_str(),
                    format!("Refusing to follow redirect to '{target}'"),
                ));
            }

            debug!(from = %url, to = %target, "redirect");
            return Ok(Hop::Redirect(target));
        }

        if !status.is_success() {
            let _ = response.bytes().await;
            return Err(LoaderError::status(url.as_str(), status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes().await?;

        Ok(Hop::Module(CachedModule {
            specifier: url.clone(),
            media_type: MediaType::classify(url.path(), content_type.as_deref()),
            bytes,
        }))
    }
}

/// Decode a `data:` URL in-process.
fn decode_data_url(url: &Url) -> Result<CachedModule, LoaderError> {
    let raw = url.as_str().strip_prefix("data:").unwrap_or(url.as_str());
    let (header, payload) = raw
        .split_once(',')
        .ok_or_else(|| LoaderError::parse(url.as_str(), "data URL has no ',' separator"))?;

    let (mime, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };

    let decoded: Vec<u8> = percent_decode_str(payload).collect();
    let bytes = if is_base64 {
        let compact: Vec<u8> = decoded
            .into_iter()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| LoaderError::parse(url.as_str(), format!("invalid base64 payload: {e}")))?
    } else {
        decoded
    };

    let mime = if mime.is_empty() { "text/plain" } else { mime };

    Ok(CachedModule {
        specifier: url.clone(),
        media_type: MediaType::classify("", Some(mime)),
        bytes: Bytes::from(bytes),
    })
}
