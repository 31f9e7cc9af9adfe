//! Registry Contract and In-Process Store
//!
//! `Registry` is the collaborator both engines talk to. It must be safe to call
//! from many tasks at once; the engines never lock around it.
//!
//! `InMemoryRegistry` models one process's view of a shared substrate:
//! - **`DurableStore`**: the shared durable copy. Records are kept bincode-encoded
//!   and sync announcements travel over its broadcast channel.
//! - **View**: the decoded records this process currently knows about. Writes go
//!   through to both; `pull_all` rebuilds the view from the durable copy.

use super::types::*;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const SYNC_CHANNEL_CAPACITY: usize = 64;

/// Storage of registration records, indexed by service name then record key.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Creates a fresh record with a generated key. Nothing is stored yet.
    fn new_record(&self, name: &str, address: &str) -> Record;

    async fn insert(&self, record: Record) -> Result<()>;

    async fn remove(&self, records: &[Record]) -> Result<()>;

    /// Re-writes the owner's copy of every given record that is still stored.
    ///
    /// Extends the lease and clears any exclusion a consumer persisted.
    async fn refresh(&self, records: &[Record]) -> Result<()>;

    /// Resynchronizes the local view from the durable store.
    async fn pull_all(&self) -> Result<()>;

    /// Persists the mutable fields (exclusion flag) of a stored record.
    async fn update(&self, record: Record) -> Result<()>;

    /// Announces a human-readable change to every process sharing the store.
    async fn broadcast_sync(&self, message: &str) -> Result<()>;

    /// Snapshot of the local view for one service name.
    fn records_for(&self, name: &str) -> HashMap<RecordKey, Record>;
}

/// Durable copy shared by every `InMemoryRegistry` attached to it.
pub struct DurableStore {
    entries: DashMap<String, DashMap<RecordKey, Vec<u8>>>,
    sync_tx: broadcast::Sender<String>,
}

impl DurableStore {
    pub fn new() -> Arc<Self> {
        let (sync_tx, _) = broadcast::channel(SYNC_CHANNEL_CAPACITY);
        Arc::new(Self {
            entries: DashMap::new(),
            sync_tx,
        })
    }

    fn put(&self, record: &Record) -> Result<()> {
        let encoded = bincode::serialize(record)?;
        self.entries
            .entry(record.name.clone())
            .or_default()
            .insert(record.key.clone(), encoded);
        Ok(())
    }

    fn get(&self, name: &str, key: &RecordKey) -> Result<Option<Record>> {
        let Some(records) = self.entries.get(name) else {
            return Ok(None);
        };
        match records.get(key) {
            Some(encoded) => Ok(Some(bincode::deserialize(encoded.value())?)),
            None => Ok(None),
        }
    }

    fn delete(&self, record: &Record) {
        if let Some(records) = self.entries.get(&record.name) {
            records.remove(&record.key);
        }
        self.entries
            .remove_if(&record.name, |_, records| records.is_empty());
    }

    fn decode_all(&self) -> Vec<Record> {
        let mut decoded = Vec::new();
        for service in self.entries.iter() {
            for entry in service.value().iter() {
                match bincode::deserialize::<Record>(entry.value()) {
                    Ok(record) => decoded.push(record),
                    Err(e) => {
                        tracing::warn!("Skipping undecodable record {}: {}", entry.key(), e);
                    }
                }
            }
        }
        decoded
    }

    /// Total number of durable records across all service names.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|service| service.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local registry view backed by a shared `DurableStore`.
pub struct InMemoryRegistry {
    store: Arc<DurableStore>,
    view: DashMap<String, DashMap<RecordKey, Record>>,
    config: RegistryConfig,
}

impl InMemoryRegistry {
    /// Creates a registry over a private durable store.
    pub fn new() -> Arc<Self> {
        Self::attach(DurableStore::new(), RegistryConfig::default())
    }

    /// Creates a registry view over an existing (possibly shared) store.
    pub fn attach(store: Arc<DurableStore>, config: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            view: DashMap::new(),
            config,
        })
    }

    pub fn store(&self) -> Arc<DurableStore> {
        self.store.clone()
    }

    pub fn subscribe_sync(&self) -> broadcast::Receiver<String> {
        self.store.sync_tx.subscribe()
    }

    /// Spawns a task that pulls the whole store on every sync announcement.
    pub fn follow_sync(self: Arc<Self>) -> JoinHandle<()> {
        let mut announcements = self.subscribe_sync();

        tokio::spawn(async move {
            loop {
                match announcements.recv().await {
                    Ok(message) => {
                        tracing::debug!("Sync announcement received: {}", message);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!("Missed {} sync announcements", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }

                if let Err(e) = self.pull_all().await {
                    tracing::warn!("Failed to pull registry after sync announcement: {}", e);
                }
            }
        })
    }

    fn is_expired(&self, record: &Record, now: u64) -> bool {
        match self.config.lease_ttl {
            Some(ttl) => now.saturating_sub(record.refreshed_at) > ttl.as_millis() as u64,
            None => false,
        }
    }

    fn cache(&self, record: Record) {
        self.view
            .entry(record.name.clone())
            .or_default()
            .insert(record.key.clone(), record);
    }

    fn evict(&self, record: &Record) {
        if let Some(records) = self.view.get(&record.name) {
            records.remove(&record.key);
        }
        self.view
            .remove_if(&record.name, |_, records| records.is_empty());
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    fn new_record(&self, name: &str, address: &str) -> Record {
        Record::new(name, address)
    }

    async fn insert(&self, record: Record) -> Result<()> {
        self.store.put(&record)?;
        tracing::debug!("Inserted record {} for {}", record.key, record.name);
        self.cache(record);
        Ok(())
    }

    async fn remove(&self, records: &[Record]) -> Result<()> {
        for record in records {
            self.store.delete(record);
            self.evict(record);
        }
        tracing::debug!("Removed {} records", records.len());
        Ok(())
    }

    async fn refresh(&self, records: &[Record]) -> Result<()> {
        let now = now_ms();

        for record in records {
            match self.store.get(&record.name, &record.key)? {
                Some(stored) => {
                    if stored.excluded && !record.excluded {
                        tracing::debug!("Heartbeat of {} clears exclusion of {}", record.address, record.key);
                    }
                    let mut owned = record.clone();
                    owned.refreshed_at = now;
                    self.store.put(&owned)?;
                    self.cache(owned);
                }
                None => {
                    tracing::trace!("Record {} no longer stored, not refreshing", record.key);
                }
            }
        }

        Ok(())
    }

    async fn pull_all(&self) -> Result<()> {
        let now = now_ms();
        let mut live = 0;

        self.view.clear();
        for record in self.store.decode_all() {
            if self.is_expired(&record, now) {
                tracing::debug!("Lease of record {} for {} lapsed", record.key, record.name);
                continue;
            }
            live += 1;
            self.cache(record);
        }

        tracing::debug!("Pulled {} live records from the durable store", live);
        Ok(())
    }

    async fn update(&self, record: Record) -> Result<()> {
        match self.store.get(&record.name, &record.key)? {
            Some(mut stored) => {
                stored.excluded = record.excluded;
                self.store.put(&stored)?;
                self.cache(stored);
            }
            None => {
                tracing::debug!("Record {} for {} is gone, update skipped", record.key, record.name);
            }
        }
        Ok(())
    }

    async fn broadcast_sync(&self, message: &str) -> Result<()> {
        let receivers = self.store.sync_tx.send(message.to_string()).unwrap_or(0);
        tracing::info!("Sync announcement ({} listeners): {}", receivers, message);
        Ok(())
    }

    fn records_for(&self, name: &str) -> HashMap<RecordKey, Record> {
        self.view
            .get(name)
            .map(|records| {
                records
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
