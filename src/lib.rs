//! Client-side networking layer for EVM JSON-RPC endpoints
//!
//! Turns a stream of application-level requests — read a contract view,
//! submit a state-changing transaction, observe new blocks — into a
//! well-behaved stream of RPC calls, hiding the endpoint's rate limits,
//! transient failures, nonce mechanics and gas-price dynamics.
//!
//! The three core pieces:
//! - [`queue::ThrottledQueue`]: rate- and concurrency-bounded task runner
//! - [`caller::ContractCaller`]: retrying read-call dispatcher on top of it
//! - [`tx::TransactionExecutor`]: serialized, nonce-ordered submission with
//!   a two-phase (submitted / confirmed) completion contract
//!
//! [`connection::ConnectionManager`] owns the provider, the signer and the
//! contract registry, and feeds block numbers, gas prices and balances to
//! the rest through replay-last event buses.

pub mod bulk;
pub mod bus;
pub mod caller;
pub mod config;
pub mod connection;
pub mod contract;
pub mod error;
pub mod gas_oracle;
pub mod metrics;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod tx;

pub use bulk::aggregate_bulk_getter;
pub use bus::EventBus;
pub use caller::ContractCaller;
pub use config::GatewaySettings;
pub use connection::{
    ConnectionManager, ContractEventSubscription, Diagnostics, EventHandler, EventHandlers,
};
pub use contract::{ContractHandle, ContractLoader, DecodedEvent, EthersContract};
pub use error::{GatewayError, GatewayResult};
pub use gas_oracle::{AutoGasSetting, GasPrices};
pub use provider::RpcConnection;
pub use queue::ThrottledQueue;
pub use tx::{PendingTransaction, TransactionExecutor, TxOverrides, TxResponse, TxTrace};
