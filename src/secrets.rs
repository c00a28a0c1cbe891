//! Credentials for discovery sources. A [`SecretSource`] loads them from
//! wherever the deployment keeps them; the [`SecretCache`] gives fetchers a
//! cheap read view that a background loop keeps fresh.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Decoded key/value payload of one secret.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretData {
    entries: BTreeMap<String, Vec<u8>>,
}

impl SecretData {
    pub fn new(entries: BTreeMap<String, Vec<u8>>) -> Self {
        Self { entries }
    }

    /// Decodes store-style values where every entry is base64 encoded.
    pub fn from_base64<I, K, V>(encoded: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut entries = BTreeMap::new();
        for (key, value) in encoded {
            let key = key.into();
            let decoded = BASE64_STANDARD
                .decode(value.as_ref().trim())
                .with_context(|| format!("secret entry {key} is not valid base64"))?;
            entries.insert(key, decoded);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Values never reach logs.
impl fmt::Debug for SecretData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretData")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub type SecretFuture<'a> = BoxFuture<'a, Result<HashMap<String, SecretData>>>;

/// Loads the full set of secrets visible to the process.
pub trait SecretSource: Send + Sync + 'static {
    fn load(&self) -> SecretFuture<'_>;
}

#[derive(Debug, Default)]
pub struct SecretCache {
    secrets: RwLock<HashMap<String, Arc<SecretData>>>,
    generation: AtomicU64,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<SecretData>> {
        self.secrets
            .read()
            .expect("secret cache lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn replace_all(&self, secrets: HashMap<String, SecretData>) {
        let secrets = secrets
            .into_iter()
            .map(|(name, data)| (name, Arc::new(data)))
            .collect();
        *self.secrets.write().expect("secret cache lock poisoned") = secrets;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.secrets.read().expect("secret cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful refreshes so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Loads once and swaps the cache contents. On failure the previous snapshot
/// stays in place.
pub async fn refresh_once(source: &dyn SecretSource, cache: &SecretCache) -> Result<usize> {
    let secrets = source.load().await.context("failed to load secrets")?;
    let count = secrets.len();
    cache.replace_all(secrets);
    Ok(count)
}

/// Reloads `cache` from `source` every `every` until `shutdown` fires. The
/// caller is expected to have primed the cache already, so the first reload
/// happens one period after start.
pub fn spawn_refresh_loop(
    source: Arc<dyn SecretSource>,
    cache: Arc<SecretCache>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match refresh_once(source.as_ref(), &cache).await {
                        Ok(count) => tracing::debug!(secrets = count, "secrets refreshed"),
                        Err(err) => tracing::warn!(
                            error = %format!("{err:#}"),
                            "secret refresh failed; keeping previous snapshot"
                        ),
                    }
                }
            }
        }

        tracing::info!("secret refresher stopped");
    })
}
