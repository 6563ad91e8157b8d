//! Retrying read-call dispatcher
//!
//! Composes the throttled queue with the retry envelope: the queue bounds
//! the rate at which the endpoint is hit, the retry loop makes a single
//! logical read durable against transient failures. Every retry is a fresh
//! enqueue, so retries wait their turn like any other call.

use crate::config::{
    CALL_QUEUE_CONCURRENCY, CALL_QUEUE_INTERVAL, CALL_QUEUE_RATE, RETRY_INITIAL_DELAY,
};
use crate::contract::ContractHandle;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use crate::queue::ThrottledQueue;
use crate::GatewaySettings;
use ethers::abi::Token;
use std::sync::Arc;
use tracing::debug;

pub struct ContractCaller {
    queue: Arc<ThrottledQueue>,
    max_retries: u32,
}

impl ContractCaller {
    /// Caller with the default queue shape (10 starts / 100ms, 20 in flight).
    pub fn new() -> GatewayResult<Self> {
        let queue =
            ThrottledQueue::new(CALL_QUEUE_RATE, CALL_QUEUE_INTERVAL, CALL_QUEUE_CONCURRENCY)?;
        Ok(Self {
            queue,
            max_retries: crate::config::DEFAULT_CALL_RETRIES,
        })
    }

    pub fn from_settings(settings: &GatewaySettings) -> GatewayResult<Self> {
        let queue = ThrottledQueue::new(
            settings.call_queue_rate,
            settings.call_queue_interval(),
            settings.call_queue_concurrency,
        )?;
        Ok(Self {
            queue,
            max_retries: settings.max_call_retries,
        })
    }

    /// Depth of the read-call queue.
    pub fn queued_calls(&self) -> usize {
        self.queue.size()
    }

    /// Dispatch an idempotent read call, retrying transient failures.
    /// Returns the first successful value or the last error.
    pub async fn make_call(
        &self,
        contract: Arc<dyn ContractHandle>,
        method: impl Into<String>,
        args: Vec<Token>,
    ) -> GatewayResult<Vec<Token>> {
        let method = method.into();
        let queue = self.queue.clone();

        crate::retry::call_with_retry(
            "contract_call",
            move |attempt| {
                let queue = queue.clone();
                let contract = contract.clone();
                let method = method.clone();
                let args = args.clone();
                async move {
                    let depth_probe = queue.clone();
                    let handle = queue.add(move || async move {
                        metrics::record_call(&method);
                        metrics::record_calls_in_queue(depth_probe.size());
                        let result = contract.call(&method, &args).await;
                        metrics::record_calls_in_queue(depth_probe.size());
                        result
                    });
                    debug!(attempt, queued = queue.size(), "Read call enqueued");
                    handle
                        .await
                        .map_err(|_| GatewayError::Internal("queued call dropped".to_string()))?
                }
            },
            |attempt, err| {
                debug!(attempt, error = %err, "Read call attempt failed");
            },
            self.max_retries,
            RETRY_INITIAL_DELAY,
        )
        .await
    }
}
