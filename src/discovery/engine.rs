//! Discovery Engine
//!
//! Drives the searching -> verifying -> active cycle for each discovered service
//! as an explicit loop, plus one watchdog per service name that revives a halted
//! cycle when a liveness notification shows up.

use super::select::select_candidate;
use super::types::*;
use crate::common::interval::parse_interval;
use crate::common::net::local_address;
use crate::registry::store::Registry;
use crate::registry::types::{Record, RecordKey};
use crate::transport::types::{SubscribeOutcome, Transport, heartbeat_topic, resync_topic};

use anyhow::Result;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Per-service coordination state.
#[derive(Default)]
struct ServiceWatch {
    watchdog_started: AtomicBool,
    halted: AtomicBool,
    /// Wait timeout and handler of the latest `discover` call; revived cycles use them.
    latest: Mutex<Option<(Duration, DiscoveryHandler)>>,
}

/// Result of one pass through the cycle.
enum Step {
    Halted,
    /// The watchdog revived discovery while this cycle was still searching.
    Superseded,
    Retry(RetryReason),
}

enum Search {
    Found(Record),
    Halted,
    Superseded,
}

pub struct DiscoveryEngine {
    registry: Arc<dyn Registry>,
    transport: Arc<dyn Transport>,
    config: DiscoveryConfig,
    client_address: String,
    /// Working copy of the records per service; pruned locally, reloaded on a miss.
    cache: DashMap<String, HashMap<RecordKey, Record>>,
    watches: DashMap<String, Arc<ServiceWatch>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscoveryEngine {
    pub fn new(
        registry: Arc<dyn Registry>,
        transport: Arc<dyn Transport>,
        config: DiscoveryConfig,
    ) -> Arc<Self> {
        let client_address = config.client_address.clone().unwrap_or_else(local_address);

        Arc::new(Self {
            registry,
            transport,
            config,
            client_address,
            cache: DashMap::new(),
            watches: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts discovering `name` in the background.
    ///
    /// `handler` is invoked with the address of every instance that answered a
    /// heartbeat within `wait_timeout`; it is invoked again for the replacement
    /// whenever the watched instance is lost. Never reports back to the caller.
    ///
    /// Calling it again for the same name starts another cycle. A cycle revived
    /// after a halt uses the handler and timeout of the most recent call.
    pub fn discover<F, Fut>(self: &Arc<Self>, name: &str, wait_timeout: Duration, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: DiscoveryHandler = Arc::new(move |address: String| {
            Box::pin(handler(address)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
        });

        let watch = self.watch_for(name);
        {
            let mut latest = watch
                .latest
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *latest = Some((wait_timeout, handler.clone()));
        }
        if watch
            .watchdog_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.spawn_watchdog(name.to_string(), watch);
        }

        self.spawn_cycle(name.to_string(), wait_timeout, handler);
    }

    /// Whether discovery of `name` ran out of candidates and waits for a heartbeat.
    pub fn is_halted(&self, name: &str) -> bool {
        self.watches
            .get(name)
            .map(|watch| watch.halted.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Aborts every cycle and watchdog started by this engine.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        tracing::info!("Shutting down discovery ({} tasks)", tasks.len());
        for task in tasks {
            task.abort();
        }
    }

    fn watch_for(&self, name: &str) -> Arc<ServiceWatch> {
        self.watches
            .entry(name.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn spawn_cycle(self: &Arc<Self>, name: String, wait_timeout: Duration, handler: DiscoveryHandler) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            engine.run_cycle(name, wait_timeout, handler).await;
        });
        self.track(handle);
    }

    fn spawn_watchdog(self: &Arc<Self>, name: String, watch: Arc<ServiceWatch>) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            tracing::info!("Watching liveness notifications of {}", name);

            loop {
                let Some(address) = engine
                    .transport
                    .wait(&name, Some(engine.config.watchdog_timeout))
                    .await
                else {
                    continue;
                };

                if watch
                    .halted
                    .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }

                let latest = watch
                    .latest
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                if let Some((wait_timeout, handler)) = latest {
                    tracing::info!(
                        "Detected heartbeat of {} at {}, restarting discovery",
                        name,
                        address
                    );
                    engine.spawn_cycle(name.clone(), wait_timeout, handler);
                }
            }
        });
        self.track(handle);
    }

    async fn run_cycle(&self, name: String, wait_timeout: Duration, handler: DiscoveryHandler) {
        loop {
            match self.run_once(&name, wait_timeout, &handler).await {
                Step::Halted => {
                    tracing::warn!(
                        "No live instance of {} in the registry, discovery halted until its next heartbeat",
                        name
                    );
                    return;
                }
                Step::Superseded => {
                    tracing::debug!("Discovery of {} revived by a heartbeat, handing over", name);
                    return;
                }
                Step::Retry(reason) => {
                    tracing::debug!("Restarting discovery of {} after {}", name, reason);
                }
            }
        }
    }

    async fn run_once(&self, name: &str, wait_timeout: Duration, handler: &DiscoveryHandler) -> Step {
        let candidate = match self.find_candidate(name).await {
            Search::Found(candidate) => candidate,
            Search::Halted => return Step::Halted,
            Search::Superseded => return Step::Superseded,
        };

        // Subscribe before asking for a heartbeat so the answer cannot be missed.
        let mut heartbeats = self
            .transport
            .channel(&heartbeat_topic(&candidate.name, &candidate.address));
        if let Err(e) = self
            .transport
            .notify(
                &resync_topic(&candidate.name, &candidate.address),
                &self.client_address,
            )
            .await
        {
            tracing::warn!("Failed to request resync from {}: {}", candidate.address, e);
        }

        let mut payload = None;
        let outcome = self
            .transport
            .subscribe(&mut heartbeats, Some(wait_timeout), &mut |message: &str| {
                if message.is_empty() {
                    return false;
                }
                payload = Some(message.to_string());
                true
            })
            .await;

        let payload = match (outcome, payload) {
            (SubscribeOutcome::Delivered, Some(payload)) => payload,
            _ => {
                self.exclude(candidate, wait_timeout).await;
                return Step::Retry(RetryReason::HeartbeatTimeout);
            }
        };

        tracing::info!("Discovered service {}, monitoring its heartbeat", candidate.to_json());

        let interval = match parse_interval(&payload) {
            Ok(interval) if !interval.is_zero() => interval,
            Ok(_) => {
                tracing::warn!("Zero heartbeat interval from {}", candidate.address);
                return Step::Retry(RetryReason::MalformedHeartbeat);
            }
            Err(e) => {
                tracing::warn!("Bad heartbeat {:?} from {}: {}", payload, candidate.address, e);
                return Step::Retry(RetryReason::MalformedHeartbeat);
            }
        };

        if let Err(e) = handler(candidate.address.clone()).await {
            tracing::warn!(
                "Handler rejected {} at {}: {}, pulling another instance",
                candidate.name,
                candidate.address,
                e
            );
            return Step::Retry(RetryReason::HandlerFailed);
        }

        let silence = interval.saturating_mul(self.config.liveness_multiplier.max(1));
        loop {
            match heartbeats.next(Some(silence)).await {
                Some(token) if !token.is_empty() => {
                    tracing::trace!("Heartbeat {} from {}", token, candidate.address);
                }
                _ => break,
            }
        }

        tracing::warn!(
            "Lost connection to {} (no heartbeat for {:?}), pulling another instance",
            candidate.to_json(),
            silence
        );
        Step::Retry(RetryReason::ConnectionLost)
    }

    async fn find_candidate(&self, name: &str) -> Search {
        if let Some(candidate) = self.select_cached(name) {
            return Search::Found(candidate);
        }

        // Flagged before the pull: a heartbeat landing while it runs must revive us.
        let watch = self.watch_for(name);
        let already_halted = watch.halted.swap(true, Ordering::SeqCst);

        tracing::info!("No cached instance of {}, pulling the registry", name);
        if let Err(e) = self.registry.pull_all().await {
            tracing::warn!("Failed to pull registry: {}", e);
        }
        self.cache
            .insert(name.to_string(), self.registry.records_for(name));

        let Some(candidate) = self.select_cached(name) else {
            return Search::Halted;
        };
        // Another halted cycle of this name still waits for the watchdog.
        if already_halted {
            return Search::Found(candidate);
        }
        match watch
            .halted
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Search::Found(candidate),
            Err(_) => Search::Superseded,
        }
    }

    fn select_cached(&self, name: &str) -> Option<Record> {
        let mut records = self.cache.get_mut(name)?;
        select_candidate(records.value_mut())
    }

    async fn exclude(&self, mut candidate: Record, waited: Duration) {
        tracing::warn!(
            "{} at {} sent no heartbeat within {:?}, excluding record {}",
            candidate.name,
            candidate.address,
            waited,
            candidate.key
        );

        candidate.excluded = true;
        if let Some(mut records) = self.cache.get_mut(&candidate.name)
            && let Some(cached) = records.get_mut(&candidate.key)
        {
            cached.excluded = true;
        }

        if let Err(e) = self.registry.update(candidate).await {
            tracing::warn!("Failed to persist exclusion: {}", e);
        }
    }
}
