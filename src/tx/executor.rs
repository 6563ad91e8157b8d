//! Serialized transaction executor
//!
//! State-changing calls flow through an internal throttled queue with
//! concurrency 1, producing a total order over submissions. The executor
//! owns the account nonce: it is fetched from the chain when unknown or
//! stale, attached to each submission, and advanced by exactly one per
//! successful submission. The queue slot is released once submission
//! resolves; the receipt wait runs detached, so the nonce advances while
//! earlier transactions are still mining.

use crate::config::{
    NONCE_STALE_AFTER, TX_QUEUE_CONCURRENCY, TX_QUEUE_INTERVAL, TX_QUEUE_RATE, TX_SUBMIT_TIMEOUT,
};
use crate::contract::ContractHandle;
use crate::error::{GatewayError, GatewayResult};
use crate::gas_oracle::{gwei_to_wei, select_gas_price_gwei, AutoGasSetting, GasPrices};
use crate::metrics;
use crate::queue::ThrottledQueue;
use crate::tx::{PendingTransaction, TxOverrides, TxResponse, TxTrace};
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, TransactionReceipt, H256, U256};
use futures::future::BoxFuture;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What the executor needs from the connection layer
#[async_trait]
pub trait ExecutorChain: Send + Sync {
    /// Current account nonce from the chain.
    async fn transaction_count(&self) -> GatewayResult<U256>;

    /// Most recently fetched oracle prices.
    fn gas_prices(&self) -> GasPrices;

    /// Wait for a submitted transaction to be mined.
    async fn wait_for_transaction(&self, hash: H256) -> GatewayResult<TransactionReceipt>;

    fn rpc_endpoint(&self) -> String;

    fn user_address(&self) -> Option<Address>;
}

/// Supplies the auto-gas tier for each transaction at queue time.
pub type GasSettingProvider = Arc<dyn Fn() -> AutoGasSetting + Send + Sync>;

/// Awaited before every submission; an error aborts the task.
pub type BeforeTransactionHook =
    Arc<dyn Fn() -> BoxFuture<'static, GatewayResult<()>> + Send + Sync>;

/// Receives the instrumentation record once a transaction reaches a
/// terminal state.
pub type AfterTransactionHook = Arc<dyn Fn(&TxTrace) + Send + Sync>;

struct NonceState {
    /// Next nonce to attach, once known.
    next: Option<U256>,
    last_submission: Option<Instant>,
}

struct QueuedRequest {
    action_id: String,
    contract: Arc<dyn ContractHandle>,
    method: String,
    args: Vec<Token>,
    overrides: TxOverrides,
    submitted: oneshot::Sender<GatewayResult<TxResponse>>,
    confirmed: oneshot::Sender<GatewayResult<TransactionReceipt>>,
}

pub struct TransactionExecutor {
    chain: Arc<dyn ExecutorChain>,
    queue: Arc<ThrottledQueue>,
    nonce: Mutex<NonceState>,
    gas_setting: GasSettingProvider,
    before_transaction: Option<BeforeTransactionHook>,
    after_transaction: Option<AfterTransactionHook>,
}

impl TransactionExecutor {
    pub fn new(
        chain: Arc<dyn ExecutorChain>,
        gas_setting: GasSettingProvider,
    ) -> GatewayResult<Self> {
        let queue = ThrottledQueue::new(TX_QUEUE_RATE, TX_QUEUE_INTERVAL, TX_QUEUE_CONCURRENCY)?;
        Ok(Self {
            chain,
            queue,
            nonce: Mutex::new(NonceState {
                next: None,
                last_submission: None,
            }),
            gas_setting,
            before_transaction: None,
            after_transaction: None,
        })
    }

    pub fn on_before_transaction(mut self, hook: BeforeTransactionHook) -> Self {
        self.before_transaction = Some(hook);
        self
    }

    pub fn on_after_transaction(mut self, hook: AfterTransactionHook) -> Self {
        self.after_transaction = Some(hook);
        self
    }

    /// Transactions enqueued but not yet started.
    pub fn queued_transactions(&self) -> usize {
        self.queue.size()
    }

    /// Enqueue a state-changing call and return its two-phase completion
    /// handle immediately. A missing gas price is resolved here, from the
    /// cached oracle prices and the current auto-gas setting.
    pub fn queue_transaction(
        self: &Arc<Self>,
        action_id: impl Into<String>,
        contract: Arc<dyn ContractHandle>,
        method: impl Into<String>,
        args: Vec<Token>,
        mut overrides: TxOverrides,
    ) -> PendingTransaction {
        let action_id = action_id.into();
        let method = method.into();

        if overrides.gas_price.is_none() {
            let prices = self.chain.gas_prices();
            let gwei = select_gas_price_gwei(&prices, &(self.gas_setting)());
            overrides.gas_price = Some(gwei_to_wei(gwei));
        }

        let (submitted_tx, submitted) = oneshot::channel();
        let (confirmed_tx, confirmed) = oneshot::channel();

        let request = QueuedRequest {
            action_id,
            contract,
            method,
            args,
            overrides,
            submitted: submitted_tx,
            confirmed: confirmed_tx,
        };

        let executor = Arc::clone(self);
        // Outcomes flow through the two channels, not the queue handle.
        let _ = self.queue.add(move || async move {
            executor.execute(request).await;
        });

        PendingTransaction { submitted, confirmed }
    }

    /// Runs inside the internal queue, so strictly one at a time.
    async fn execute(self: Arc<Self>, request: QueuedRequest) {
        let QueuedRequest {
            action_id,
            contract,
            method,
            args,
            overrides,
            submitted,
            confirmed,
        } = request;

        let exec_started = Instant::now();
        let mut trace = TxTrace {
            action_id: action_id.clone(),
            tx_to: Some(contract.address()),
            tx_type: method.clone(),
            tx_hash: None,
            time_exec_called: unix_millis(),
            wait_submit_ms: 0,
            wait_confirm_ms: None,
            wait_error_ms: None,
            error: None,
            parsed_error: None,
            rpc_endpoint: self.chain.rpc_endpoint(),
            user_address: self.chain.user_address(),
        };

        let mut nonce = self.nonce.lock().await;

        // Refresh the nonce when unknown or idle past the staleness bound.
        let stale = nonce
            .last_submission
            .map_or(true, |at| at.elapsed() > NONCE_STALE_AFTER);
        if nonce.next.is_none() || stale {
            match self.chain.transaction_count().await {
                Ok(fresh) => {
                    debug!(action_id = %action_id, nonce = %fresh, "Adopted chain nonce");
                    nonce.next = Some(fresh);
                }
                Err(e) => {
                    warn!(action_id = %action_id, error = %e, "Nonce refresh failed, keeping local state");
                }
            }
        }

        if let Some(hook) = &self.before_transaction {
            if let Err(e) = hook().await {
                drop(nonce);
                let err = GatewayError::Submission {
                    action_id: action_id.clone(),
                    message: format!("before-transaction hook failed: {}", e),
                };
                trace.wait_submit_ms = exec_started.elapsed().as_millis() as u64;
                self.fail_submission(&method, trace, err, submitted, confirmed);
                return;
            }
        }

        // Defaults copied by value, caller overrides on top, nonce attached.
        let mut effective = TxOverrides::defaults().overlaid_with(&overrides);
        effective.nonce = nonce.next;

        let outcome =
            tokio::time::timeout(TX_SUBMIT_TIMEOUT, contract.send(&method, &args, &effective))
                .await;
        let wait_submit = exec_started.elapsed();
        trace.wait_submit_ms = wait_submit.as_millis() as u64;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                drop(nonce);
                let err = GatewayError::Submission {
                    action_id: action_id.clone(),
                    message: e.to_string(),
                };
                self.fail_submission(&method, trace, err, submitted, confirmed);
                return;
            }
            Err(_) => {
                drop(nonce);
                let err = GatewayError::SubmitTimeout {
                    action_id: action_id.clone(),
                    timeout_ms: TX_SUBMIT_TIMEOUT.as_millis() as u64,
                };
                self.fail_submission(&method, trace, err, submitted, confirmed);
                return;
            }
        };

        // Successful submission: advance the nonce (only if one was in
        // use) and stamp the idle clock.
        if let Some(n) = nonce.next {
            nonce.next = Some(n + U256::one());
        }
        nonce.last_submission = Some(Instant::now());
        drop(nonce);

        let tx_hash = response.hash;
        trace.tx_hash = Some(tx_hash);
        metrics::record_tx_submitted(&method);
        metrics::record_tx_submit_latency(wait_submit.as_secs_f64());
        info!(
            action_id = %action_id,
            method = %method,
            tx_hash = ?tx_hash,
            nonce = ?effective.nonce,
            "Transaction submitted"
        );

        let _ = submitted.send(Ok(response));

        // Detached receipt wait: the queue slot frees as soon as this
        // function returns.
        let executor = Arc::clone(&self);
        tokio::spawn(async move {
            let wait_started = Instant::now();
            match executor.chain.wait_for_transaction(tx_hash).await {
                Ok(receipt) => {
                    trace.wait_confirm_ms = Some(wait_started.elapsed().as_millis() as u64);
                    let reverted = receipt.status != Some(1.into());
                    let _ = confirmed.send(Ok(receipt));

                    if reverted {
                        trace.error = Some("transaction reverted".to_string());
                        metrics::record_tx_reverted(&method);
                        warn!(action_id = %trace.action_id, tx_hash = ?tx_hash, "Transaction reverted");
                    } else {
                        metrics::record_tx_confirmed(&method);
                    }
                }
                Err(e) => {
                    trace.wait_error_ms = Some(wait_started.elapsed().as_millis() as u64);
                    trace.error = Some(e.to_string());
                    trace.parsed_error = parse_error_body(&e.to_string());
                    metrics::record_tx_receipt_failed(&method);
                    warn!(action_id = %trace.action_id, tx_hash = ?tx_hash, error = %e, "Receipt wait failed");
                    let _ = confirmed.send(Err(e));
                }
            }
            executor.deliver_trace(trace);
        });
    }

    /// Terminal submission failure: the nonce is untouched and the
    /// `confirmed` channel is abandoned by dropping its sender.
    fn fail_submission(
        &self,
        method: &str,
        mut trace: TxTrace,
        err: GatewayError,
        submitted: oneshot::Sender<GatewayResult<TxResponse>>,
        confirmed: oneshot::Sender<GatewayResult<TransactionReceipt>>,
    ) {
        trace.error = Some(err.to_string());
        trace.parsed_error = parse_error_body(&err.to_string());
        metrics::record_tx_submit_failed(method);
        error!(action_id = %trace.action_id, method = %method, error = %err, "Submission failed");

        let _ = submitted.send(Err(err));
        drop(confirmed);
        self.deliver_trace(trace);
    }

    fn deliver_trace(&self, trace: TxTrace) {
        debug!(
            action_id = %trace.action_id,
            tx_hash = ?trace.tx_hash,
            wait_submit_ms = trace.wait_submit_ms,
            wait_confirm_ms = ?trace.wait_confirm_ms,
            error = ?trace.error,
            "Transaction trace"
        );
        if let Some(hook) = &self.after_transaction {
            if catch_unwind(AssertUnwindSafe(|| hook(&trace))).is_err() {
                error!(action_id = %trace.action_id, "After-transaction hook panicked");
            }
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Best-effort decode of a hex revert payload embedded in an error message.
fn parse_error_body(error_text: &str) -> Option<String> {
    let start = error_text.find("0x")?;
    let hex_digits: String = error_text[start + 2..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    if hex_digits.len() < 2 {
        return None;
    }
    let even = hex_digits.len() - hex_digits.len() % 2;
    let bytes = hex::decode(&hex_digits[..even]).ok()?;
    let text: String = String::from_utf8_lossy(&bytes)
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();
    let text = text.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::DecodedEvent;
    use ethers::types::Log;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct MockChain {
        chain_nonce: StdMutex<U256>,
        prices: GasPrices,
        receipt_status: Option<u64>,
        receipt_fails: bool,
    }

    impl MockChain {
        fn new(nonce: u64) -> Self {
            Self {
                chain_nonce: StdMutex::new(U256::from(nonce)),
                prices: GasPrices {
                    slow: 1.0,
                    average: 5.0,
                    fast: 10.0,
                },
                receipt_status: Some(1),
                receipt_fails: false,
            }
        }
    }

    #[async_trait]
    impl ExecutorChain for MockChain {
        async fn transaction_count(&self) -> GatewayResult<U256> {
            Ok(*self.chain_nonce.lock().unwrap())
        }

        fn gas_prices(&self) -> GasPrices {
            self.prices
        }

        async fn wait_for_transaction(&self, _hash: H256) -> GatewayResult<TransactionReceipt> {
            if self.receipt_fails {
                return Err(GatewayError::Receipt("no receipt".to_string()));
            }
            let mut receipt = TransactionReceipt::default();
            receipt.status = self.receipt_status.map(Into::into);
            Ok(receipt)
        }

        fn rpc_endpoint(&self) -> String {
            "http://localhost:8545".to_string()
        }

        fn user_address(&self) -> Option<Address> {
            Some(Address::repeat_byte(0x42))
        }
    }

    #[derive(Default)]
    struct MockContract {
        /// (method, attached nonce, gas price) per submission attempt.
        submissions: StdMutex<Vec<(String, Option<U256>, Option<U256>)>>,
        /// Methods whose submission is rejected.
        failing_methods: Vec<String>,
        /// Submission never resolves.
        hang: bool,
    }

    #[async_trait]
    impl ContractHandle for MockContract {
        fn address(&self) -> Address {
            Address::repeat_byte(0x99)
        }

        fn parse_log(&self, _log: &Log) -> GatewayResult<DecodedEvent> {
            Err(GatewayError::EventParsing("not used".to_string()))
        }

        async fn call(&self, _method: &str, _args: &[Token]) -> GatewayResult<Vec<Token>> {
            Ok(vec![])
        }

        async fn send(
            &self,
            method: &str,
            _args: &[Token],
            overrides: &TxOverrides,
        ) -> GatewayResult<TxResponse> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.submissions.lock().unwrap().push((
                method.to_string(),
                overrides.nonce,
                overrides.gas_price,
            ));
            if self.failing_methods.iter().any(|m| m == method) {
                return Err(GatewayError::Contract("execution rejected".to_string()));
            }
            Ok(TxResponse {
                hash: H256::repeat_byte(overrides.nonce.map_or(0, |n| n.as_u64() as u8)),
                to: Some(self.address()),
                nonce: overrides.nonce,
                gas_price: overrides.gas_price,
            })
        }
    }

    fn executor_with(
        chain: Arc<MockChain>,
        setting: AutoGasSetting,
    ) -> GatewayResult<TransactionExecutor> {
        TransactionExecutor::new(chain, Arc::new(move || setting.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn nonces_are_serialized_in_enqueue_order() {
        let chain = Arc::new(MockChain::new(42));
        let contract = Arc::new(MockContract::default());
        let executor = Arc::new(executor_with(chain, AutoGasSetting::Average).unwrap());

        let p1 = executor.queue_transaction("a1", contract.clone(), "m1", vec![], TxOverrides::default());
        let p2 = executor.queue_transaction("a2", contract.clone(), "m2", vec![], TxOverrides::default());
        let p3 = executor.queue_transaction("a3", contract.clone(), "m3", vec![], TxOverrides::default());

        let r1 = p1.submitted.await.unwrap().unwrap();
        let r2 = p2.submitted.await.unwrap().unwrap();
        let r3 = p3.submitted.await.unwrap().unwrap();

        assert_eq!(r1.nonce, Some(U256::from(42u64)));
        assert_eq!(r2.nonce, Some(U256::from(43u64)));
        assert_eq!(r3.nonce, Some(U256::from(44u64)));

        let submissions = contract.submissions.lock().unwrap();
        let order: Vec<&str> = submissions.iter().map(|s| s.0.as_str()).collect();
        assert_eq!(order, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_submission_does_not_advance_the_nonce() {
        let chain = Arc::new(MockChain::new(42));
        let contract = Arc::new(MockContract {
            failing_methods: vec!["m2".to_string()],
            ..Default::default()
        });
        let executor = Arc::new(executor_with(chain, AutoGasSetting::Average).unwrap());

        let p1 = executor.queue_transaction("a1", contract.clone(), "m1", vec![], TxOverrides::default());
        let p2 = executor.queue_transaction("a2", contract.clone(), "m2", vec![], TxOverrides::default());
        let p3 = executor.queue_transaction("a3", contract.clone(), "m3", vec![], TxOverrides::default());

        assert_eq!(
            p1.submitted.await.unwrap().unwrap().nonce,
            Some(U256::from(42u64))
        );
        assert!(p1.confirmed.await.unwrap().is_ok());

        let err = p2.submitted.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::Submission { .. }));
        // The abandoned confirmation channel reports closure, not an error.
        assert!(p2.confirmed.await.is_err());

        // M3 reuses the nonce M2 failed to consume.
        assert_eq!(
            p3.submitted.await.unwrap().unwrap().nonce,
            Some(U256::from(43u64))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn submit_timeout_carries_action_id_and_preserves_nonce() {
        let chain = Arc::new(MockChain::new(42));
        let hanging = Arc::new(MockContract {
            hang: true,
            ..Default::default()
        });
        let executor = Arc::new(executor_with(chain, AutoGasSetting::Average).unwrap());

        let pending = executor.queue_transaction(
            "deploy-77",
            hanging.clone(),
            "m1",
            vec![],
            TxOverrides::default(),
        );

        let err = pending.submitted.await.unwrap().unwrap_err();
        match &err {
            GatewayError::SubmitTimeout { action_id, timeout_ms } => {
                assert_eq!(action_id, "deploy-77");
                assert_eq!(*timeout_ms, 30_000);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(err.to_string().contains("deploy-77"));
        assert!(pending.confirmed.await.is_err());
        assert!(hanging.submissions.lock().unwrap().is_empty());

        // The nonce was not consumed by the timed-out attempt.
        let healthy = Arc::new(MockContract::default());
        let next = executor.queue_transaction("a2", healthy, "m2", vec![], TxOverrides::default());
        assert_eq!(
            next.submitted.await.unwrap().unwrap().nonce,
            Some(U256::from(42u64))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn revert_delivers_receipt_and_records_error() {
        let mut chain = MockChain::new(7);
        chain.receipt_status = Some(0);
        let chain = Arc::new(chain);
        let contract = Arc::new(MockContract::default());

        let traces = Arc::new(StdMutex::new(Vec::new()));
        let traces_hook = traces.clone();
        let executor = Arc::new(
            executor_with(chain, AutoGasSetting::Average)
                .unwrap()
                .on_after_transaction(Arc::new(move |trace: &TxTrace| {
                    traces_hook.lock().unwrap().push(trace.clone());
                })),
        );

        let pending =
            executor.queue_transaction("a1", contract, "m1", vec![], TxOverrides::default());

        assert!(pending.submitted.await.unwrap().is_ok());
        let receipt = pending.confirmed.await.unwrap().unwrap();
        assert_eq!(receipt.status, Some(0.into()));

        // The trace lands after the receipt; give the detached task a turn.
        tokio::task::yield_now().await;
        let traces = traces.lock().unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].error.as_deref(), Some("transaction reverted"));
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_failure_flows_to_confirmed_only() {
        let mut chain = MockChain::new(7);
        chain.receipt_fails = true;
        let chain = Arc::new(chain);
        let contract = Arc::new(MockContract::default());
        let executor = Arc::new(executor_with(chain, AutoGasSetting::Average).unwrap());

        let pending = executor.queue_transaction(
            "a1",
            contract.clone(),
            "m1",
            vec![],
            TxOverrides::default(),
        );
        assert!(pending.submitted.await.unwrap().is_ok());
        assert!(matches!(
            pending.confirmed.await.unwrap(),
            Err(GatewayError::Receipt(_))
        ));

        // Subsequent submissions are unaffected.
        let next =
            executor.queue_transaction("a2", contract, "m2", vec![], TxOverrides::default());
        assert_eq!(
            next.submitted.await.unwrap().unwrap().nonce,
            Some(U256::from(8u64))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_nonce_is_refreshed_from_chain() {
        let chain = Arc::new(MockChain::new(10));
        let contract = Arc::new(MockContract::default());
        let executor = Arc::new(executor_with(chain.clone(), AutoGasSetting::Average).unwrap());

        let first = executor.queue_transaction("a1", contract.clone(), "m1", vec![], TxOverrides::default());
        assert_eq!(
            first.submitted.await.unwrap().unwrap().nonce,
            Some(U256::from(10u64))
        );

        // Another sender moves the account nonce while this executor idles
        // past the staleness bound.
        *chain.chain_nonce.lock().unwrap() = U256::from(25u64);
        tokio::time::sleep(NONCE_STALE_AFTER + Duration::from_secs(1)).await;

        let second = executor.queue_transaction("a2", contract, "m2", vec![], TxOverrides::default());
        assert_eq!(
            second.submitted.await.unwrap().unwrap().nonce,
            Some(U256::from(25u64))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_gas_price_resolves_from_setting() {
        let chain = Arc::new(MockChain::new(0));
        let contract = Arc::new(MockContract::default());
        let executor = Arc::new(executor_with(chain, AutoGasSetting::Fast).unwrap());

        let pending = executor.queue_transaction(
            "a1",
            contract.clone(),
            "m1",
            vec![],
            TxOverrides::default(),
        );
        let response = pending.submitted.await.unwrap().unwrap();

        // Fast tier of the mock prices is 10 gwei.
        assert_eq!(response.gas_price, Some(U256::from(10_000_000_000u64)));
    }

    #[tokio::test(start_paused = true)]
    async fn caller_gas_price_is_kept() {
        let chain = Arc::new(MockChain::new(0));
        let contract = Arc::new(MockContract::default());
        let executor = Arc::new(executor_with(chain, AutoGasSetting::Fast).unwrap());

        let pending = executor.queue_transaction(
            "a1",
            contract.clone(),
            "m1",
            vec![],
            TxOverrides {
                gas_price: Some(U256::from(123u64)),
                ..Default::default()
            },
        );
        let response = pending.submitted.await.unwrap().unwrap();
        assert_eq!(response.gas_price, Some(U256::from(123u64)));
    }

    #[tokio::test(start_paused = true)]
    async fn before_hook_error_aborts_submission() {
        let chain = Arc::new(MockChain::new(0));
        let contract = Arc::new(MockContract::default());
        let executor = Arc::new(
            executor_with(chain, AutoGasSetting::Average)
                .unwrap()
                .on_before_transaction(Arc::new(|| {
                    Box::pin(async {
                        Err(GatewayError::Internal("not ready".to_string()))
                    })
                })),
        );

        let pending = executor.queue_transaction(
            "a1",
            contract.clone(),
            "m1",
            vec![],
            TxOverrides::default(),
        );

        let err = pending.submitted.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::Submission { .. }));
        assert!(contract.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn trace_captures_submission_metadata() {
        let chain = Arc::new(MockChain::new(3));
        let contract = Arc::new(MockContract::default());

        let traces = Arc::new(StdMutex::new(Vec::new()));
        let traces_hook = traces.clone();
        let executor = Arc::new(
            executor_with(chain, AutoGasSetting::Average)
                .unwrap()
                .on_after_transaction(Arc::new(move |trace: &TxTrace| {
                    traces_hook.lock().unwrap().push(trace.clone());
                })),
        );

        let pending = executor.queue_transaction(
            "swap-1",
            contract,
            "swapExactTokens",
            vec![],
            TxOverrides::default(),
        );
        assert!(pending.submitted.await.unwrap().is_ok());
        assert!(pending.confirmed.await.unwrap().is_ok());
        tokio::task::yield_now().await;

        let traces = traces.lock().unwrap();
        assert_eq!(traces.len(), 1);
        let trace = &traces[0];
        assert_eq!(trace.action_id, "swap-1");
        assert_eq!(trace.tx_type, "swapExactTokens");
        assert_eq!(trace.tx_to, Some(Address::repeat_byte(0x99)));
        assert!(trace.tx_hash.is_some());
        assert!(trace.wait_confirm_ms.is_some());
        assert_eq!(trace.rpc_endpoint, "http://localhost:8545");
        assert_eq!(trace.user_address, Some(Address::repeat_byte(0x42)));
        assert!(trace.error.is_none());
    }

    #[test]
    fn parse_error_body_decodes_ascii_payload() {
        let payload = hex::encode("execution reverted: balance too low");
        let error_text = format!("call failed, data: 0x{}", payload);
        let parsed = parse_error_body(&error_text).unwrap();
        assert!(parsed.contains("balance too low"));
    }

    #[test]
    fn parse_error_body_rejects_garbage() {
        assert_eq!(parse_error_body("plain failure"), None);
        assert_eq!(parse_error_body("0x"), None);
    }
}
