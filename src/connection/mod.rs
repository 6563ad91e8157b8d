//! Connection manager
//!
//! Owns the RPC connection, the optional signing key and the contract
//! registry, publishes chain state on replay-last buses, and runs the two
//! periodic polls (gas prices, signer balance). The registry keeps every
//! contract's loader so the whole set can be re-materialized against a new
//! provider or signer.

pub mod watcher;

pub use watcher::{ContractEventSubscription, EventHandler, EventHandlers};

use crate::bus::EventBus;
use crate::config::{BLOCK_DEBOUNCE, RETRY_INITIAL_DELAY};
use crate::contract::{ContractHandle, ContractLoader};
use crate::error::{GatewayError, GatewayResult};
use crate::gas_oracle::{fetch_auto_gas_prices, AutoGasSetting, GasPrices};
use crate::metrics;
use crate::provider::{self, RpcConnection};
use crate::retry::call_with_retry;
use crate::tx::executor::ExecutorChain;
use crate::tx::TransactionExecutor;
use crate::GatewaySettings;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Filter, Signature, TransactionReceipt, H256, U256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Point-in-time connection state for an embedding application's UI
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub rpc_url: String,
    pub block_number: u64,
    pub balance: U256,
    pub contracts_loaded: usize,
}

pub struct ConnectionManager {
    settings: GatewaySettings,
    conn: StdRwLock<Arc<RpcConnection>>,
    signer: StdRwLock<Option<LocalWallet>>,
    contracts: DashMap<Address, Arc<dyn ContractHandle>>,
    loaders: DashMap<Address, ContractLoader>,
    block_number: AtomicU64,
    balance: StdRwLock<U256>,
    gas_prices: StdRwLock<GasPrices>,
    /// Replay-last event streams.
    pub block_bus: EventBus<u64>,
    pub gas_price_bus: EventBus<GasPrices>,
    pub balance_bus: EventBus<U256>,
    pub rpc_url_bus: EventBus<String>,
    http: reqwest::Client,
    diagnostics: StdRwLock<Option<Arc<dyn Fn(Diagnostics) + Send + Sync>>>,
    poll_tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Connect to the configured endpoint and start the periodic polls.
    pub async fn new(settings: GatewaySettings) -> GatewayResult<Arc<Self>> {
        settings.validate()?;

        let conn = Arc::new(RpcConnection::connect(&settings.rpc_url).await?);
        let initial_block = conn.block_number().await.unwrap_or(0);

        let manager = Arc::new(Self {
            settings,
            conn: StdRwLock::new(conn),
            signer: StdRwLock::new(None),
            contracts: DashMap::new(),
            loaders: DashMap::new(),
            block_number: AtomicU64::new(initial_block),
            balance: StdRwLock::new(U256::zero()),
            gas_prices: StdRwLock::new(GasPrices::default()),
            block_bus: EventBus::new(true),
            gas_price_bus: EventBus::new(true),
            balance_bus: EventBus::new(true),
            rpc_url_bus: EventBus::new(true),
            http: reqwest::Client::new(),
            diagnostics: StdRwLock::new(None),
            poll_tasks: StdMutex::new(Vec::new()),
        });

        manager.spawn_polls();
        info!(rpc_url = %manager.settings.rpc_url, initial_block, "Connection manager started");
        Ok(manager)
    }

    /// Cancel the polling timers. In-flight work is left to finish.
    pub fn destroy(&self) {
        for task in self.poll_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        debug!("Connection manager destroyed");
    }

    fn spawn_polls(self: &Arc<Self>) {
        let gas = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let interval = manager.settings.gas_prices_interval();
                loop {
                    let prices =
                        fetch_auto_gas_prices(&manager.http, &manager.settings.gas_oracle_url)
                            .await;
                    *manager.gas_prices.write().unwrap() = prices;
                    manager.gas_price_bus.publish(prices);
                    manager.push_diagnostics();
                    tokio::time::sleep(interval).await;
                }
            })
        };

        let balance = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let interval = manager.settings.balance_interval();
                loop {
                    tokio::time::sleep(interval).await;
                    let Some(address) = manager.get_address() else {
                        continue;
                    };
                    if let Err(e) = manager.refresh_balance(address).await {
                        debug!(error = %e, "Balance refresh failed");
                    }
                }
            })
        };

        self.poll_tasks.lock().unwrap().extend([gas, balance]);
    }

    pub fn current_conn(&self) -> Arc<RpcConnection> {
        self.conn.read().unwrap().clone()
    }

    // --- contract registry ---

    /// Store `loader`, run it against the current provider and signer, and
    /// register the produced handle.
    pub async fn load_contract(
        &self,
        address: Address,
        loader: ContractLoader,
    ) -> GatewayResult<Arc<dyn ContractHandle>> {
        self.loaders.insert(address, loader.clone());
        let signer = self.signer.read().unwrap().clone();
        let handle = loader(address, self.current_conn(), signer).await?;
        self.contracts.insert(address, handle.clone());
        Ok(handle)
    }

    pub fn get_contract(&self, address: Address) -> GatewayResult<Arc<dyn ContractHandle>> {
        self.contracts
            .get(&address)
            .map(|entry| entry.clone())
            .ok_or(GatewayError::ContractNotLoaded { address })
    }

    /// Re-run every registered loader against the current provider and
    /// signer. Handles are committed all-or-nothing: if any loader fails,
    /// the registry is left exactly as it was.
    pub async fn reload_contracts(&self) -> GatewayResult<()> {
        self.reload_contracts_against(self.current_conn()).await
    }

    async fn reload_contracts_against(&self, conn: Arc<RpcConnection>) -> GatewayResult<()> {
        let signer = self.signer.read().unwrap().clone();
        let loaders: Vec<(Address, ContractLoader)> = self
            .loaders
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        // Stage every reload before committing any: a single failing loader
        // must not leave the registry split across two providers.
        let mut staged = Vec::with_capacity(loaders.len());
        let mut failed = Vec::new();
        for (address, loader) in loaders {
            match loader(address, conn.clone(), signer.clone()).await {
                Ok(handle) => staged.push((address, handle)),
                Err(e) => {
                    warn!(address = ?address, error = %e, "Contract reload failed");
                    failed.push((address, e));
                }
            }
        }

        if !failed.is_empty() {
            let addresses = failed
                .iter()
                .map(|(address, _)| format!("{:?}", address))
                .collect::<Vec<_>>()
                .join(", ");
            let (_, first_error) = failed.remove(0);
            return Err(GatewayError::Contract(format!(
                "reload failed for [{}]: {}",
                addresses, first_error
            )));
        }

        for (address, handle) in staged {
            self.contracts.insert(address, handle);
        }
        Ok(())
    }

    // --- endpoint and account ---

    /// Swap the RPC endpoint. Contracts are reloaded against the new
    /// provider before it becomes visible; work already in flight finishes
    /// against the old one.
    pub async fn set_rpc_url(&self, url: &str) -> GatewayResult<()> {
        let new_conn = Arc::new(RpcConnection::connect(url).await?);
        self.reload_contracts_against(new_conn.clone()).await?;
        self.rpc_url_bus.publish(url.to_string());
        *self.conn.write().unwrap() = new_conn;
        info!(rpc_url = %url, "RPC endpoint replaced");
        self.push_diagnostics();
        Ok(())
    }

    /// Install a signing key. Replaces any prior signer, refreshes the
    /// balance and reloads contracts so their handles carry the signer.
    pub async fn set_account(&self, private_key: &str) -> GatewayResult<Address> {
        let wallet: LocalWallet = private_key
            .parse()
            .map_err(|e| GatewayError::Wallet(format!("Invalid private key: {}", e)))?;
        let chain_id = self.current_conn().chain_id().await?;
        let wallet = wallet.with_chain_id(chain_id);
        let address = wallet.address();

        *self.signer.write().unwrap() = Some(wallet);
        info!(address = ?address, "Account configured");

        if let Err(e) = self.refresh_balance(address).await {
            warn!(error = %e, "Initial balance load failed");
        }
        self.reload_contracts().await?;
        Ok(address)
    }

    pub fn get_address(&self) -> Option<Address> {
        self.signer.read().unwrap().as_ref().map(|w| w.address())
    }

    pub fn get_private_key(&self) -> Option<String> {
        self.signer
            .read()
            .unwrap()
            .as_ref()
            .map(|w| hex::encode(w.signer().to_bytes()))
    }

    pub async fn sign_message(&self, message: &[u8]) -> GatewayResult<Signature> {
        let wallet = self
            .signer
            .read()
            .unwrap()
            .clone()
            .ok_or(GatewayError::NoSigner)?;
        wallet
            .sign_message(message)
            .await
            .map_err(|e| GatewayError::Wallet(e.to_string()))
    }

    // --- chain reads and writes ---

    /// Account nonce from the chain, retry-wrapped. Zero without a signer.
    pub async fn get_nonce(&self) -> GatewayResult<U256> {
        let Some(address) = self.get_address() else {
            return Ok(U256::zero());
        };
        let conn = self.current_conn();
        call_with_retry(
            "get_nonce",
            move |_| {
                let conn = conn.clone();
                async move { conn.transaction_count(address).await }
            },
            |_, _| {},
            self.settings.max_call_retries,
            RETRY_INITIAL_DELAY,
        )
        .await
    }

    /// Balance of an address, retry-wrapped.
    pub async fn load_balance(&self, address: Address) -> GatewayResult<U256> {
        let conn = self.current_conn();
        call_with_retry(
            "load_balance",
            move |_| {
                let conn = conn.clone();
                async move { conn.balance(address).await }
            },
            |_, _| {},
            self.settings.max_call_retries,
            RETRY_INITIAL_DELAY,
        )
        .await
    }

    async fn refresh_balance(&self, address: Address) -> GatewayResult<()> {
        let balance = self.load_balance(address).await?;
        *self.balance.write().unwrap() = balance;
        self.balance_bus.publish(balance);
        metrics::record_wallet_balance(balance.as_u128() as f64 / 1e18);
        self.push_diagnostics();
        Ok(())
    }

    pub async fn send_transaction(&self, tx: TypedTransaction) -> GatewayResult<H256> {
        let wallet = self
            .signer
            .read()
            .unwrap()
            .clone()
            .ok_or(GatewayError::NoSigner)?;
        self.current_conn().send_transaction(tx, wallet).await
    }

    pub async fn wait_for_transaction(&self, hash: H256) -> GatewayResult<TransactionReceipt> {
        provider::wait_for_transaction(&self.current_conn(), hash).await
    }

    // --- gas ---

    /// Most recently fetched oracle prices.
    pub fn get_auto_gas_prices(&self) -> GasPrices {
        *self.gas_prices.read().unwrap()
    }

    pub fn auto_gas_setting(&self) -> AutoGasSetting {
        AutoGasSetting::from(self.settings.gas_setting.as_str())
    }

    // --- block watcher ---

    pub fn block_number(&self) -> u64 {
        self.block_number.load(Ordering::SeqCst)
    }

    /// Watch new blocks (debounced on both edges of a 1s window) and fan
    /// matching logs out to the handlers, keyed by ABI event name.
    pub fn subscribe_to_contract_events(
        self: &Arc<Self>,
        contract: Arc<dyn ContractHandle>,
        handlers: EventHandlers,
        filter: Filter,
    ) -> ContractEventSubscription {
        let manager = Arc::clone(self);
        let handlers = Arc::new(handlers);

        let task = tokio::spawn(async move {
            let blocks = manager.current_conn().block_numbers();
            watcher::run_debounced(blocks, BLOCK_DEBOUNCE, move |latest| {
                let manager = manager.clone();
                let contract = contract.clone();
                let handlers = handlers.clone();
                let filter = filter.clone();
                async move {
                    manager
                        .process_block_fire(contract, handlers, filter, latest)
                        .await;
                }
            })
            .await;
        });

        ContractEventSubscription { task }
    }

    async fn process_block_fire(
        &self,
        contract: Arc<dyn ContractHandle>,
        handlers: Arc<EventHandlers>,
        filter: Filter,
        latest: u64,
    ) {
        let prev = self.block_number.swap(latest, Ordering::SeqCst);
        metrics::record_block_height(latest);
        self.block_bus.publish(latest);

        let from = if prev == 0 { latest } else { (prev + 1).min(latest) };
        let range = filter.from_block(from).to_block(latest);

        match self.current_conn().logs(&range).await {
            Ok(logs) => watcher::dispatch_logs(&contract, &handlers, logs),
            Err(e) => warn!(error = %e, from, to = latest, "Log fetch failed"),
        }
    }

    // --- diagnostics ---

    pub fn set_diagnostics_updater(&self, updater: Arc<dyn Fn(Diagnostics) + Send + Sync>) {
        *self.diagnostics.write().unwrap() = Some(updater);
    }

    fn push_diagnostics(&self) {
        let updater = self.diagnostics.read().unwrap().clone();
        if let Some(updater) = updater {
            updater(Diagnostics {
                rpc_url: self.current_conn().url().to_string(),
                block_number: self.block_number(),
                balance: *self.balance.read().unwrap(),
                contracts_loaded: self.contracts.len(),
            });
        }
    }

    /// Transaction executor wired to this connection.
    pub fn transaction_executor(self: &Arc<Self>) -> GatewayResult<Arc<TransactionExecutor>> {
        let chain: Arc<dyn ExecutorChain> = self.clone();
        let setting_source = Arc::clone(self);
        let executor = TransactionExecutor::new(
            chain,
            Arc::new(move || setting_source.auto_gas_setting()),
        )?;
        Ok(Arc::new(executor))
    }
}

#[async_trait]
impl ExecutorChain for ConnectionManager {
    async fn transaction_count(&self) -> GatewayResult<U256> {
        self.get_nonce().await
    }

    fn gas_prices(&self) -> GasPrices {
        self.get_auto_gas_prices()
    }

    async fn wait_for_transaction(&self, hash: H256) -> GatewayResult<TransactionReceipt> {
        ConnectionManager::wait_for_transaction(self, hash).await
    }

    fn rpc_endpoint(&self) -> String {
        self.current_conn().url().to_string()
    }

    fn user_address(&self) -> Option<Address> {
        self.get_address()
    }
}
