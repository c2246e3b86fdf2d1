//! Quota ledger
//!
//! Per-user monthly document counters. A reservation is one atomic
//! read-modify-write: the per-user lock is held across load, rollover,
//! capacity check, increment and save, so two concurrent requests can never
//! both pass the check for the last unit.

use async_trait::async_trait;
use shorui_core::{Clock, QuotaCounter, Result, ShoruiError, UserId};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Storage for quota counters
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<QuotaCounter>>;
    async fn save(&self, counter: &QuotaCounter) -> Result<()>;
}

/// Counters kept in memory only
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    counters: Mutex<HashMap<UserId, QuotaCounter>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn load(&self, user_id: &str) -> Result<Option<QuotaCounter>> {
        Ok(self.counters.lock().await.get(user_id).cloned())
    }

    async fn save(&self, counter: &QuotaCounter) -> Result<()> {
        self.counters
            .lock()
            .await
            .insert(counter.user_id.clone(), counter.clone());
        Ok(())
    }
}

/// Counters mirrored to a JSON file keyed by user id.
///
/// Every save rewrites the whole file through a temp file and rename while
/// holding the map lock, so saves for different users cannot interleave.
#[derive(Debug)]
pub struct JsonFileQuotaStore {
    path: PathBuf,
    counters: Mutex<BTreeMap<UserId, QuotaCounter>>,
}

impl JsonFileQuotaStore {
    /// Open the ledger file, creating its directory if needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let counters = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ShoruiError::Storage(format!("corrupt quota file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Loaded {} quota counters from {:?}", counters.len(), path);
        Ok(Self {
            path,
            counters: Mutex::new(counters),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl QuotaStore for JsonFileQuotaStore {
    async fn load(&self, user_id: &str) -> Result<Option<QuotaCounter>> {
        Ok(self.counters.lock().await.get(user_id).cloned())
    }

    async fn save(&self, counter: &QuotaCounter) -> Result<()> {
        let mut counters = self.counters.lock().await;

        let mut updated = counters.clone();
        updated.insert(counter.user_id.clone(), counter.clone());
        let content = serde_json::to_vec_pretty(&updated)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &content))
            .await
            .map_err(|e| ShoruiError::Storage(format!("quota write task failed: {}", e)))??;

        // Only publish the new state once it is on disk
        *counters = updated;
        Ok(())
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Outcome of a reservation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// One unit consumed; carries the updated counter
    Allowed(QuotaCounter),
    /// Limit reached; carries the unchanged counter
    Denied(QuotaCounter),
}

impl Reservation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Reservation::Allowed(_))
    }

    pub fn counter(&self) -> &QuotaCounter {
        match self {
            Reservation::Allowed(c) | Reservation::Denied(c) => c,
        }
    }
}

pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
    default_limit: u32,
    clock: Arc<dyn Clock>,
    locks: std::sync::Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn QuotaStore>, default_limit: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            default_limit,
            clock,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load or create the counter and apply rollover. Caller holds the user lock.
    async fn load_current(&self, user_id: &str) -> Result<QuotaCounter> {
        let now = self.clock.now();

        match self.store.load(user_id).await? {
            Some(mut counter) => {
                if counter.roll_over(now) {
                    info!(
                        "Quota period rolled over for {}; next reset {}",
                        user_id, counter.reset_date
                    );
                    self.store.save(&counter).await?;
                }
                Ok(counter)
            }
            None => {
                let counter = QuotaCounter::new(user_id, self.default_limit, now);
                self.store.save(&counter).await?;
                debug!("Created quota counter for {}", user_id);
                Ok(counter)
            }
        }
    }

    /// Current counter for `user_id`, created with the default limit on first access
    pub async fn get(&self, user_id: &str) -> Result<QuotaCounter> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        self.load_current(user_id).await
    }

    /// Consume one unit if the user has capacity left
    pub async fn try_reserve(&self, user_id: &str) -> Result<Reservation> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut counter = self.load_current(user_id).await?;
        if !counter.has_capacity() {
            info!(
                "Quota denied for {} ({}/{})",
                user_id, counter.documents_generated, counter.monthly_limit
            );
            return Ok(Reservation::Denied(counter));
        }

        counter.documents_generated += 1;
        self.store.save(&counter).await?;
        debug!(
            "Quota reserved for {} ({}/{})",
            user_id, counter.documents_generated, counter.monthly_limit
        );
        Ok(Reservation::Allowed(counter))
    }
}
