//! RPC connection wrapper
//!
//! Owns the underlying ethers provider. `wss://` URLs get a websocket
//! provider with native block subscriptions; everything else gets a
//! JSON-RPC HTTP provider polled at 8s.

use crate::config::{
    HTTP_POLL_INTERVAL, RECEIPT_ATTEMPT_TIMEOUT, RECEIPT_BACKOFF_FACTOR, RECEIPT_MAX_ATTEMPTS,
    RECEIPT_MAX_DELAY, RECEIPT_MIN_DELAY,
};
use crate::error::{GatewayError, GatewayResult};
use crate::retry::backoff_delay;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider, Ws};
use futures::StreamExt;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Filter, Log, TransactionReceipt, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

fn provider_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Provider(e.to_string())
}

/// A JSON-RPC endpoint, HTTP or websocket depending on the URL scheme
pub enum RpcConnection {
    Http { provider: Provider<Http>, url: String },
    Ws { provider: Provider<Ws>, url: String },
}

impl RpcConnection {
    /// Connect to `url`. `wss://` selects a websocket provider; all other
    /// schemes a polling HTTP provider.
    pub async fn connect(url: &str) -> GatewayResult<Self> {
        if url.starts_with("wss://") {
            let provider = Provider::<Ws>::connect(url).await.map_err(provider_err)?;
            Ok(RpcConnection::Ws {
                provider,
                url: url.to_string(),
            })
        } else {
            let provider = Provider::<Http>::try_from(url)
                .map_err(provider_err)?
                .interval(HTTP_POLL_INTERVAL);
            Ok(RpcConnection::Http {
                provider,
                url: url.to_string(),
            })
        }
    }

    pub fn url(&self) -> &str {
        match self {
            RpcConnection::Http { url, .. } => url,
            RpcConnection::Ws { url, .. } => url,
        }
    }

    pub async fn block_number(&self) -> GatewayResult<u64> {
        let number = match self {
            RpcConnection::Http { provider, .. } => {
                provider.get_block_number().await.map_err(provider_err)?
            }
            RpcConnection::Ws { provider, .. } => {
                provider.get_block_number().await.map_err(provider_err)?
            }
        };
        Ok(number.as_u64())
    }

    pub async fn chain_id(&self) -> GatewayResult<u64> {
        let id = match self {
            RpcConnection::Http { provider, .. } => {
                provider.get_chainid().await.map_err(provider_err)?
            }
            RpcConnection::Ws { provider, .. } => {
                provider.get_chainid().await.map_err(provider_err)?
            }
        };
        Ok(id.as_u64())
    }

    pub async fn transaction_count(&self, address: Address) -> GatewayResult<U256> {
        match self {
            RpcConnection::Http { provider, .. } => provider
                .get_transaction_count(address, None)
                .await
                .map_err(provider_err),
            RpcConnection::Ws { provider, .. } => provider
                .get_transaction_count(address, None)
                .await
                .map_err(provider_err),
        }
    }

    pub async fn balance(&self, address: Address) -> GatewayResult<U256> {
        match self {
            RpcConnection::Http { provider, .. } => provider
                .get_balance(address, None)
                .await
                .map_err(provider_err),
            RpcConnection::Ws { provider, .. } => provider
                .get_balance(address, None)
                .await
                .map_err(provider_err),
        }
    }

    pub async fn logs(&self, filter: &Filter) -> GatewayResult<Vec<Log>> {
        match self {
            RpcConnection::Http { provider, .. } => {
                provider.get_logs(filter).await.map_err(provider_err)
            }
            RpcConnection::Ws { provider, .. } => {
                provider.get_logs(filter).await.map_err(provider_err)
            }
        }
    }

    pub async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> GatewayResult<Option<TransactionReceipt>> {
        match self {
            RpcConnection::Http { provider, .. } => provider
                .get_transaction_receipt(hash)
                .await
                .map_err(provider_err),
            RpcConnection::Ws { provider, .. } => provider
                .get_transaction_receipt(hash)
                .await
                .map_err(provider_err),
        }
    }

    /// Sign and send a raw transaction request with the supplied wallet.
    pub async fn send_transaction(
        &self,
        tx: TypedTransaction,
        wallet: LocalWallet,
    ) -> GatewayResult<H256> {
        match self {
            RpcConnection::Http { provider, .. } => {
                let client = SignerMiddleware::new(provider.clone(), wallet);
                let pending = client
                    .send_transaction(tx, None)
                    .await
                    .map_err(provider_err)?;
                Ok(pending.tx_hash())
            }
            RpcConnection::Ws { provider, .. } => {
                let client = SignerMiddleware::new(provider.clone(), wallet);
                let pending = client
                    .send_transaction(tx, None)
                    .await
                    .map_err(provider_err)?;
                Ok(pending.tx_hash())
            }
        }
    }

    /// Stream of new block numbers: a native `newHeads` subscription on
    /// websocket connections, an 8s `eth_blockNumber` poll otherwise. The
    /// task stops when the receiver is dropped.
    pub fn block_numbers(self: &Arc<Self>) -> mpsc::Receiver<u64> {
        let (tx, rx) = mpsc::channel(64);
        let conn = Arc::clone(self);

        tokio::spawn(async move {
            let ws_provider = match &*conn {
                RpcConnection::Ws { provider, .. } => Some(provider.clone()),
                RpcConnection::Http { .. } => None,
            };
            match ws_provider {
                Some(provider) => stream_ws_blocks(provider, tx).await,
                None => poll_blocks(conn, tx).await,
            }
        });

        rx
    }
}

async fn stream_ws_blocks(provider: Provider<Ws>, tx: mpsc::Sender<u64>) {
    loop {
        match provider.subscribe_blocks().await {
            Ok(mut stream) => {
                while let Some(block) = stream.next().await {
                    let Some(number) = block.number else { continue };
                    if tx.send(number.as_u64()).await.is_err() {
                        return;
                    }
                }
                warn!("Block subscription ended, resubscribing");
            }
            Err(e) => {
                warn!(error = %e, "Block subscription failed, retrying");
            }
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

async fn poll_blocks(conn: Arc<RpcConnection>, tx: mpsc::Sender<u64>) {
    let mut last_seen: Option<u64> = None;
    loop {
        match conn.block_number().await {
            Ok(number) => {
                if last_seen.map_or(true, |last| number > last) {
                    last_seen = Some(number);
                    if tx.send(number).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Block number poll failed");
            }
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(HTTP_POLL_INTERVAL).await;
    }
}

/// Poll for a transaction receipt with per-attempt timeout and bounded
/// backoff. Fails if no receipt arrives within the attempt cap.
pub async fn wait_for_transaction(
    conn: &RpcConnection,
    hash: H256,
) -> GatewayResult<TransactionReceipt> {
    let mut attempt = 0;
    loop {
        attempt += 1;

        match tokio::time::timeout(RECEIPT_ATTEMPT_TIMEOUT, conn.transaction_receipt(hash)).await {
            Ok(Ok(Some(receipt))) => return Ok(receipt),
            Ok(Ok(None)) => {
                debug!(tx_hash = ?hash, attempt, "Receipt not yet available");
            }
            Ok(Err(e)) => {
                warn!(tx_hash = ?hash, attempt, error = %e, "Receipt poll failed");
            }
            Err(_) => {
                warn!(tx_hash = ?hash, attempt, "Receipt poll attempt timed out");
            }
        }

        if attempt >= RECEIPT_MAX_ATTEMPTS {
            return Err(GatewayError::Receipt(format!(
                "No receipt for {:?} after {} attempts",
                hash, attempt
            )));
        }

        let delay = backoff_delay(
            attempt,
            RECEIPT_MIN_DELAY,
            RECEIPT_BACKOFF_FACTOR,
            RECEIPT_MAX_DELAY,
        );
        tokio::time::sleep(delay).await;
    }
}
