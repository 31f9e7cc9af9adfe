//! Registration Engine
//!
//! Turns a `(name, address, weight, interval)` announcement into records in the
//! registry plus the background tasks that keep them alive.
//!
//! ## Tasks per registration
//! - **Publisher**: drains the heartbeat queue onto the instance's heartbeat topic.
//! - **Ticker**: cycle task feeding the queue, the liveness channel and the lease refresh.
//! - **Resync listener**: answers consumer resync requests with an immediate heartbeat.
//! - **Shutdown watcher**: waits for the stop signal and tears everything down.
//! - **Interrupt hook**: on SIGINT/SIGTERM, stops through the same path and exits.

use super::cycle::cycle_task;
use super::types::*;
use crate::common::interval::format_interval;
use crate::common::signal::Termination;
use crate::registry::store::Registry;
use crate::registry::types::Record;
use crate::transport::types::{Transport, heartbeat_topic, resync_topic};

use anyhow::{Result, bail};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Registers service instances against a registry and transport pair.
pub struct RegistrationEngine {
    registry: Arc<dyn Registry>,
    transport: Arc<dyn Transport>,
    config: RegistrationConfig,
}

impl RegistrationEngine {
    pub fn new(
        registry: Arc<dyn Registry>,
        transport: Arc<dyn Transport>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            config,
        }
    }

    /// Registers `address` under `name` with `weight` replica records and starts
    /// heartbeating every `heartbeat_interval`.
    ///
    /// # Errors
    /// Rejects `weight == 0` and a zero interval, and propagates registry failures
    /// while inserting records or broadcasting the sync announcement.
    pub async fn register(
        &self,
        name: &str,
        address: &str,
        weight: usize,
        heartbeat_interval: Duration,
    ) -> Result<Registration> {
        if weight == 0 {
            bail!("weight of {} at {} must be at least 1", name, address);
        }
        if heartbeat_interval.is_zero() {
            bail!("heartbeat interval of {} at {} must be positive", name, address);
        }

        // Installed before any record exists so a failure leaves nothing behind.
        let termination = if self.config.deregister_on_interrupt {
            Some(Termination::listen()?)
        } else {
            None
        };

        let interval_text = format_interval(heartbeat_interval);
        tracing::info!(
            "Registering service {} at {} (weight={}, heartbeat={})",
            name,
            address,
            weight,
            interval_text
        );

        let mut records = Vec::with_capacity(weight);
        for _ in 0..weight {
            let record = self.registry.new_record(name, address);
            self.registry.insert(record.clone()).await?;
            records.push(record);
        }
        let records = Arc::new(records);

        self.registry
            .broadcast_sync(&format!(
                "published service {} at {} (weight={}, heartbeat={})",
                name, address, weight, interval_text
            ))
            .await?;

        let (heartbeat_tx, heartbeat_rx) = mpsc::channel::<String>(HEARTBEAT_QUEUE_CAPACITY);
        let (publish_shutdown_tx, publish_shutdown_rx) = oneshot::channel::<()>();
        let (ticker_shutdown_tx, ticker_shutdown_rx) = oneshot::channel::<()>();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let stop_slot: StopSlot = Arc::new(Mutex::new(Some(stop_tx)));
        let (stopped_tx, stopped_rx) = watch::channel(false);

        let publisher = {
            let transport = self.transport.clone();
            let topic = heartbeat_topic(name, address);
            tokio::spawn(async move {
                transport
                    .publish(&topic, heartbeat_rx, publish_shutdown_rx)
                    .await;
            })
        };

        let ticker = {
            let registry = self.registry.clone();
            let transport = self.transport.clone();
            let records = records.clone();
            let heartbeat_tx = heartbeat_tx.clone();
            let name = name.to_string();
            let address = address.to_string();
            let interval_text = interval_text.clone();

            tokio::spawn(cycle_task(
                heartbeat_interval,
                move || {
                    let registry = registry.clone();
                    let transport = transport.clone();
                    let records = records.clone();
                    let heartbeat_tx = heartbeat_tx.clone();
                    let name = name.clone();
                    let address = address.clone();
                    let token = interval_text.clone();

                    // Refresh first: a consumer woken by the liveness notification
                    // must find the records eligible again.
                    async move {
                        if let Err(e) = registry.refresh(&records).await {
                            tracing::warn!("Failed to refresh records of {} at {}: {}", name, address, e);
                        }
                        if heartbeat_tx.send(token).await.is_err() {
                            tracing::debug!("Heartbeat queue of {} at {} closed", name, address);
                        }
                        if let Err(e) = transport.notify(&name, &address).await {
                            tracing::warn!("Failed to notify liveness of {} at {}: {}", name, address, e);
                        }
                        tracing::trace!("Heartbeat tick for {} at {}", name, address);
                    }
                },
                ticker_shutdown_rx,
            ))
        };

        let resync_listener = {
            let transport = self.transport.clone();
            // Opened here so a consumer asking right after `register` returns is heard.
            let mut requests = transport.channel(&resync_topic(name, address));
            let heartbeat_tx = heartbeat_tx.clone();
            let token = interval_text.clone();

            tokio::spawn(async move {
                tracing::info!("Listening for resync requests on {}", requests.topic());
                transport
                    .subscribe(&mut requests, None, &mut |client: &str| {
                        tracing::debug!("Resync requested by {}", client);
                        // A full queue already holds a token that is about to go out.
                        let _ = heartbeat_tx.try_send(token.clone());
                        false
                    })
                    .await;
            })
        };
        drop(heartbeat_tx);

        if let Some(mut termination) = termination {
            let stop_slot = stop_slot.clone();
            let mut stopped = stopped_rx.clone();
            let mut torn_down = stopped_rx.clone();
            let exit = self.config.exit_on_interrupt;
            let name = name.to_string();
            let address = address.to_string();

            tokio::spawn(async move {
                tokio::select! {
                    signal = termination.recv() => {
                        tracing::info!("Received {}, deregistering {} at {}", signal, name, address);
                        send_stop(&stop_slot);
                        let _ = torn_down.wait_for(|done| *done).await;
                        if exit {
                            tracing::info!("Deregistered {} at {}, exiting", name, address);
                            std::process::exit(signal.exit_code());
                        }
                    }
                    // Stopped some other way; the hook has nothing left to do.
                    _ = async { let _ = stopped.wait_for(|done| *done).await; } => {}
                }
            });
        }

        {
            let registry = self.registry.clone();
            let records = records.clone();
            let name = name.to_string();
            let address = address.to_string();

            tokio::spawn(async move {
                if stop_rx.await.is_err() {
                    tracing::debug!("Registration handle of {} at {} dropped", name, address);
                }

                let _ = publish_shutdown_tx.send(());
                let _ = ticker_shutdown_tx.send(());
                resync_listener.abort();
                let _ = publisher.await;
                let _ = ticker.await;

                if let Err(e) = registry.remove(&records).await {
                    tracing::warn!("Failed to remove records of {} at {}: {}", name, address, e);
                }
                tracing::info!(
                    "Stopped registration of {} at {} (weight={})",
                    name,
                    address,
                    records.len()
                );
                let _ = stopped_tx.send(true);
            });
        }

        Ok(Registration {
            name: name.to_string(),
            address: address.to_string(),
            records,
            stop_slot,
            stopped_rx,
        })
    }
}

type StopSlot = Arc<Mutex<Option<oneshot::Sender<()>>>>;

/// Takes the stop sender out of `slot` and fires it. `false` if already taken.
fn send_stop(slot: &Mutex<Option<oneshot::Sender<()>>>) -> bool {
    let sender = slot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();

    match sender {
        Some(sender) => {
            let _ = sender.send(());
            true
        }
        None => false,
    }
}

/// Handle to one running registration.
///
/// Dropping the handle tears the registration down just like [`Registration::stop`].
pub struct Registration {
    name: String,
    address: String,
    records: Arc<Vec<Record>>,
    stop_slot: StopSlot,
    stopped_rx: watch::Receiver<bool>,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Records created for this registration, one per unit of weight.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Delivers the stop signal. Only the first call has an effect; it returns
    /// `true`, every later call returns `false`. A termination signal handled by
    /// the interrupt hook counts as that first call.
    pub fn stop(&self) -> bool {
        let sent = send_stop(&self.stop_slot);
        if sent {
            tracing::debug!("Stopping registration of {} at {}", self.name, self.address);
        }
        sent
    }

    /// Resolves once the tasks have exited and the records are removed.
    pub async fn stopped(&self) {
        let mut stopped = self.stopped_rx.clone();
        let _ = stopped.wait_for(|done| *done).await;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped_rx.borrow()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.stop();
    }
}
