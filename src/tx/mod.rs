//! Transaction types and the serialized executor

pub mod executor;

pub use executor::{ExecutorChain, TransactionExecutor};

use crate::config::DEFAULT_GAS_LIMIT;
use crate::error::GatewayResult;
use ethers::types::{Address, TransactionReceipt, H256, U256};
use serde::Serialize;
use tokio::sync::oneshot;

/// Optional per-transaction overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxOverrides {
    /// Gas price in wei.
    pub gas_price: Option<U256>,
    pub gas_limit: Option<U256>,
    pub nonce: Option<U256>,
    pub value: Option<U256>,
}

impl TxOverrides {
    /// Defaults layered under the caller's overrides at submission time.
    pub(crate) fn defaults() -> Self {
        Self {
            gas_limit: Some(U256::from(DEFAULT_GAS_LIMIT)),
            ..Default::default()
        }
    }

    /// Copy of `self` with set fields of `over` taking precedence. The
    /// defaults are copied by value so no call can mutate them for the next.
    pub(crate) fn overlaid_with(&self, over: &TxOverrides) -> TxOverrides {
        TxOverrides {
            gas_price: over.gas_price.or(self.gas_price),
            gas_limit: over.gas_limit.or(self.gas_limit),
            nonce: over.nonce.or(self.nonce),
            value: over.value.or(self.value),
        }
    }
}

/// Mempool acceptance record for a submitted transaction
#[derive(Debug, Clone)]
pub struct TxResponse {
    pub hash: H256,
    pub to: Option<Address>,
    pub nonce: Option<U256>,
    /// Gas price in wei, when one was attached.
    pub gas_price: Option<U256>,
}

/// Two-phase completion handle for a queued transaction
///
/// `submitted` resolves once the transaction is accepted into the mempool,
/// `confirmed` once it is mined. If submission fails, the `confirmed` sender
/// is dropped and awaiting it yields a channel-closed error.
pub struct PendingTransaction {
    pub submitted: oneshot::Receiver<GatewayResult<TxResponse>>,
    pub confirmed: oneshot::Receiver<GatewayResult<TransactionReceipt>>,
}

/// Per-transaction instrumentation record
#[derive(Debug, Clone, Serialize)]
pub struct TxTrace {
    pub action_id: String,
    pub tx_to: Option<Address>,
    /// Contract method name.
    pub tx_type: String,
    pub tx_hash: Option<H256>,
    /// Unix milliseconds at which execution started.
    pub time_exec_called: u64,
    /// Task start to submission outcome.
    pub wait_submit_ms: u64,
    /// Submission to receipt, when one arrived.
    pub wait_confirm_ms: Option<u64>,
    /// Submission to receipt-wait failure, when it failed.
    pub wait_error_ms: Option<u64>,
    pub error: Option<String>,
    /// Best-effort decode of a revert payload found in the error text.
    pub parsed_error: Option<String>,
    pub rpc_endpoint: String,
    pub user_address: Option<Address>,
}
