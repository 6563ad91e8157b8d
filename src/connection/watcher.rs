//! Block watcher plumbing: debounce and log fan-out
//!
//! Block notifications are debounced on both edges: the first event in a
//! quiet period fires immediately, further events inside the window collapse
//! into a single trailing fire carrying the latest value.

use crate::contract::{ContractHandle, DecodedEvent};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

/// Invoked with the decoded arguments of a matching event.
pub type EventHandler = Box<dyn Fn(DecodedEvent) + Send + Sync>;

/// Handlers keyed by ABI event name. Events without a handler are skipped.
pub type EventHandlers = HashMap<String, EventHandler>;

/// Active contract-event subscription; dropping it does not stop the
/// watcher, call [`unsubscribe`](Self::unsubscribe).
pub struct ContractEventSubscription {
    pub(crate) task: JoinHandle<()>,
}

impl ContractEventSubscription {
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

/// Forward debounced values from `rx` into `on_fire`. Leading edge fires
/// immediately; values arriving within `window` of the last fire coalesce
/// into one trailing fire with the newest value. A pending trailing fire is
/// flushed when the channel closes.
pub(crate) async fn run_debounced<F, Fut>(
    mut rx: mpsc::Receiver<u64>,
    window: Duration,
    mut on_fire: F,
) where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut last_fire: Option<Instant> = None;
    let mut pending: Option<u64> = None;

    loop {
        let deadline = last_fire.map(|at| at + window);

        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(value) => {
                        let now = Instant::now();
                        match last_fire {
                            Some(at) if now.duration_since(at) < window => {
                                pending = Some(value);
                            }
                            _ => {
                                last_fire = Some(now);
                                on_fire(value).await;
                            }
                        }
                    }
                    None => {
                        if let Some(value) = pending.take() {
                            on_fire(value).await;
                        }
                        return;
                    }
                }
            }
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            }, if pending.is_some() => {
                if let Some(value) = pending.take() {
                    last_fire = Some(Instant::now());
                    on_fire(value).await;
                }
            }
        }
    }
}

/// Decode each log through the contract ABI and hand it to its handler.
/// Logs without a matching handler, and logs the ABI cannot decode, are
/// skipped. Handler panics are contained.
pub(crate) fn dispatch_logs(
    contract: &Arc<dyn ContractHandle>,
    handlers: &EventHandlers,
    logs: Vec<ethers::types::Log>,
) {
    for log in logs {
        let event = match contract.parse_log(&log) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Skipping undecodable log");
                continue;
            }
        };

        let Some(handler) = handlers.get(&event.name) else {
            continue;
        };

        let name = event.name.clone();
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event))).is_err() {
            error!(event = %name, "Event handler panicked");
        }
    }
}
