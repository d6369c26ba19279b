//! Batched, single-flight cache in front of the module-graph oracle.
//!
//! Misses that arrive within a short window are folded into one oracle
//! invocation: a synthetic `data:` module that side-effect imports every
//! requested specifier. Callers asking for the same specifier share one
//! pending batch.

use crate::config::DEFAULT_BATCH_DEBOUNCE;
use crate::error::LoaderError;
use crate::npm::NpmPackageSource;
use crate::oracle::{ModuleEntry, NpmPackage, Oracle, OracleResponse};
use futures::future::{BoxFuture, FutureExt, Shared};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Maximum number of redirect hops followed when looking up a specifier.
pub const MAX_INFO_REDIRECTS: usize = 10;

const BATCH_PREFIX: &str = "data:application/javascript,";

type BatchFuture = Shared<BoxFuture<'static, Result<(), LoaderError>>>;

struct PendingBatch {
    specifiers: Vec<String>,
    future: BatchFuture,
}

#[derive(Default)]
struct State {
    modules: HashMap<String, ModuleEntry>,
    redirects: HashMap<String, String>,
    npm_packages: HashMap<String, NpmPackage>,
    failures: HashMap<String, LoaderError>,
    pending: Option<PendingBatch>,
    in_flight: HashMap<String, BatchFuture>,
}

enum Lookup {
    Found(ModuleEntry),
    Failed(LoaderError),
    /// Not known yet; holds the end of the redirect chain.
    Missing(String),
}

impl State {
    fn lookup(&self, specifier: &str) -> Lookup {
        let mut current = specifier;
        let mut hops = 0;
        while let Some(next) = self.redirects.get(current) {
            hops += 1;
            if hops > MAX_INFO_REDIRECTS {
                return Lookup::Failed(LoaderError::RedirectLimit { last: next.clone() });
            }
            current = next;
        }

        if let Some(entry) = self.modules.get(current) {
            return Lookup::Found(entry.clone());
        }
        if let Some(err) = self
            .failures
            .get(specifier)
            .or_else(|| self.failures.get(current))
        {
            return Lookup::Failed(err.clone());
        }
        Lookup::Missing(current.to_string())
    }

    fn merge(&mut self, response: OracleResponse, synthetic: Option<&str>) {
        let skip = |s: &str| synthetic.is_some_and(|root| s == root || s.starts_with(BATCH_PREFIX));

        for entry in response.modules {
            if skip(entry.specifier()) {
                continue;
            }
            self.modules.insert(entry.specifier().to_string(), entry);
        }
        for (from, to) in response.redirects {
            if skip(&from) {
                continue;
            }
            self.redirects.insert(from, to);
        }
        self.npm_packages.extend(response.npm_packages);
    }
}

struct Inner {
    oracle: Arc<dyn Oracle>,
    debounce: Duration,
    state: Mutex<State>,
}

/// Module info cache.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone)]
pub struct ModuleInfoCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ModuleInfoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ModuleInfoCache")
            .field("modules", &state.modules.len())
            .field("npm_packages", &state.npm_packages.len())
            .field("debounce", &self.inner.debounce)
            .finish_non_exhaustive()
    }
}

impl ModuleInfoCache {
    /// Create a cache with the default batching window.
    #[must_use]
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self::with_debounce(oracle, DEFAULT_BATCH_DEBOUNCE)
    }

    /// Create a cache that waits `debounce` before closing a batch.
    #[must_use]
    pub fn with_debounce(oracle: Arc<dyn Oracle>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                oracle,
                debounce,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Get the module entry for `specifier`, querying the oracle on a miss.
    ///
    /// Redirects are followed, so the returned entry's specifier may differ
    /// from the one requested.
    ///
    /// # Errors
    /// Returns an error if the oracle fails, the redirect chain is too long,
    /// or the oracle never reports the module.
    pub async fn get(&self, specifier: &str) -> Result<ModuleEntry, LoaderError> {
        let pending = {
            let mut state = self.inner.lock();
            match state.lookup(specifier) {
                Lookup::Found(entry) => return Ok(entry),
                Lookup::Failed(err) => return Err(err),
                Lookup::Missing(_) => {}
            }
            if let Some(fut) = state.in_flight.get(specifier).cloned() {
                fut
            } else {
                self.enqueue(&mut state, specifier)
            }
        };

        pending.await?;

        match self.inner.lock().lookup(specifier) {
            Lookup::Found(entry) => Ok(entry),
            Lookup::Failed(err) => Err(err),
            Lookup::Missing(_) => Err(LoaderError::Unreachable(format!(
                "Module '{specifier}' missing after oracle query"
            ))),
        }
    }

    /// Get an npm package discovered by earlier queries.
    #[must_use]
    pub fn get_package(&self, id: &str) -> Option<NpmPackage> {
        self.inner.lock().npm_packages.get(id).cloned()
    }

    /// Add `specifier` to the forming batch, starting one if needed.
    fn enqueue(&self, state: &mut State, specifier: &str) -> BatchFuture {
        let future = if let Some(batch) = state.pending.as_mut() {
            batch.specifiers.push(specifier.to_string());
            batch.future.clone()
        } else {
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move { inner.run_batch().await });
            let future = async move {
                match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(LoaderError::oracle("", format!("Batch task failed: {e}"))),
                }
            }
            .boxed()
            .shared();

            state.pending = Some(PendingBatch {
                specifiers: vec![specifier.to_string()],
                future: future.clone(),
            });
            future
        };

        trace!(specifier, "queued for module info");
        state.in_flight.insert(specifier.to_string(), future.clone());
        future
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn run_batch(self: Arc<Self>) -> Result<(), LoaderError> {
        tokio::time::sleep(self.debounce).await;

        let specifiers = self
            .lock()
            .pending
            .take()
            .map(|batch| batch.specifiers)
            .unwrap_or_default();
        if specifiers.is_empty() {
            return Ok(());
        }

        let result = self.query(&specifiers).await;

        let mut state = self.lock();
        for specifier in &specifiers {
            state.in_flight.remove(specifier);
            if let Err(ref err) = result {
                state.failures.insert(specifier.clone(), err.clone());
            }
        }
        result
    }

    async fn query(&self, specifiers: &[String]) -> Result<(), LoaderError> {
        let root = if let [single] = specifiers {
            single.clone()
        } else {
            batch_module(specifiers)
        };

        let response = self.oracle.info(&root).await?;
        debug!(
            batch = specifiers.len(),
            modules = response.modules.len(),
            npm_packages = response.npm_packages.len(),
            "oracle batch complete"
        );
        let synthetic = (specifiers.len() > 1).then_some(root.as_str());
        self.lock().merge(response, synthetic);

        // The oracle sometimes records a redirect without the module it leads
        // to. Ask once more for the redirect target directly.
        for specifier in specifiers {
            let target = match self.lock().lookup(specifier) {
                Lookup::Missing(target) => target,
                Lookup::Found(_) | Lookup::Failed(_) => continue,
            };

            debug!(specifier = %specifier, target = %target, "re-querying oracle for missing module");
            match self.oracle.info(&target).await {
                Ok(response) => {
                    let mut state = self.lock();
                    state.merge(response, None);
                    if let Lookup::Missing(_) = state.lookup(specifier) {
                        state.failures.insert(
                            specifier.clone(),
                            LoaderError::Unreachable(format!(
                                "Module '{specifier}' not found in oracle output"
                            )),
                        );
                    }
                }
                Err(err) => {
                    warn!(specifier = %specifier, error = %err, "oracle re-query failed");
                    self.lock().failures.insert(specifier.clone(), err);
                }
            }
        }

        Ok(())
    }
}

impl NpmPackageSource for ModuleInfoCache {
    fn package(&self, id: &str) -> Option<NpmPackage> {
        self.get_package(id)
    }
}

/// A synthetic module importing every specifier for its side effects.
fn batch_module(specifiers: &[String]) -> String {
    let source: String = specifiers
        .iter()
        .map(|s| format!("import \"{}\";\n", s.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{BATCH_PREFIX}{}", utf8_percent_encode(&source, NON_ALPHANUMERIC))
}
