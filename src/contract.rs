//! Contract handle seam
//!
//! The gateway talks to contracts through [`ContractHandle`], keeping the
//! executor and caller independent of the concrete middleware stack.
//! [`EthersContract`] is the production implementation over an ethers
//! `Contract`; tests substitute their own handles.

use crate::error::{GatewayError, GatewayResult};
use crate::provider::RpcConnection;
use crate::tx::{TxOverrides, TxResponse};
use async_trait::async_trait;
use ethers::abi::{Abi, LogParam, RawLog, Token};
use ethers::contract::Contract;
use ethers::middleware::SignerMiddleware;
use ethers::providers::Middleware;
use ethers::signers::LocalWallet;
use ethers::types::{Address, Log};
use futures::future::BoxFuture;
use std::sync::Arc;

/// A log decoded through a contract's ABI
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub name: String,
    pub params: Vec<LogParam>,
}

/// Live handle to a deployed contract
#[async_trait]
pub trait ContractHandle: Send + Sync {
    fn address(&self) -> Address;

    /// Decode a raw log through the contract ABI.
    fn parse_log(&self, log: &Log) -> GatewayResult<DecodedEvent>;

    /// Idempotent read call (`eth_call`).
    async fn call(&self, method: &str, args: &[Token]) -> GatewayResult<Vec<Token>>;

    /// State-changing call; resolves once the transaction is in the mempool.
    async fn send(
        &self,
        method: &str,
        args: &[Token],
        overrides: &TxOverrides,
    ) -> GatewayResult<TxResponse>;
}

/// Produces a contract handle against a given provider and optional signer.
/// Retained by the registry so every handle can be re-materialized after a
/// provider or signer swap.
pub type ContractLoader = Arc<
    dyn Fn(
            Address,
            Arc<RpcConnection>,
            Option<LocalWallet>,
        ) -> BoxFuture<'static, GatewayResult<Arc<dyn ContractHandle>>>
        + Send
        + Sync,
>;

/// [`ContractHandle`] backed by an ethers contract
pub struct EthersContract<M: Middleware> {
    inner: Contract<M>,
}

impl<M: Middleware + 'static> EthersContract<M> {
    pub fn new(address: Address, abi: Abi, client: Arc<M>) -> Self {
        Self {
            inner: Contract::new(address, abi, client),
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ContractHandle for EthersContract<M> {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn parse_log(&self, log: &Log) -> GatewayResult<DecodedEvent> {
        let topic0 = log
            .topics
            .first()
            .ok_or_else(|| GatewayError::EventParsing("log has no topics".to_string()))?;

        for event in self.inner.abi().events() {
            if &event.signature() == topic0 {
                let raw = RawLog {
                    topics: log.topics.clone(),
                    data: log.data.to_vec(),
                };
                let parsed = event
                    .parse_log(raw)
                    .map_err(|e| GatewayError::EventParsing(e.to_string()))?;
                return Ok(DecodedEvent {
                    name: event.name.clone(),
                    params: parsed.params,
                });
            }
        }

        Err(GatewayError::EventParsing(format!(
            "no ABI event matches topic {:?}",
            topic0
        )))
    }

    async fn call(&self, method: &str, args: &[Token]) -> GatewayResult<Vec<Token>> {
        let call = self
            .inner
            .method::<_, Vec<Token>>(method, args.to_vec())
            .map_err(|e| GatewayError::Contract(e.to_string()))?;
        call.call()
            .await
            .map_err(|e| GatewayError::Contract(e.to_string()))
    }

    async fn send(
        &self,
        method: &str,
        args: &[Token],
        overrides: &TxOverrides,
    ) -> GatewayResult<TxResponse> {
        let mut call = self
            .inner
            .method::<_, ()>(method, args.to_vec())
            .map_err(|e| GatewayError::Contract(e.to_string()))?;

        if let Some(gas_price) = overrides.gas_price {
            call.tx.set_gas_price(gas_price);
        }
        if let Some(gas_limit) = overrides.gas_limit {
            call.tx.set_gas(gas_limit);
        }
        if let Some(nonce) = overrides.nonce {
            call.tx.set_nonce(nonce);
        }
        if let Some(value) = overrides.value {
            call.tx.set_value(value);
        }

        let pending = call
            .send()
            .await
            .map_err(|e| GatewayError::Contract(e.to_string()))?;

        Ok(TxResponse {
            hash: pending.tx_hash(),
            to: Some(self.inner.address()),
            nonce: overrides.nonce,
            gas_price: overrides.gas_price,
        })
    }
}

/// Build an ethers-backed handle against the current connection, signing
/// through `SignerMiddleware` when a wallet is supplied.
pub fn load_ethers_contract(
    abi: Abi,
    address: Address,
    conn: Arc<RpcConnection>,
    signer: Option<LocalWallet>,
) -> Arc<dyn ContractHandle> {
    match (&*conn, signer) {
        (RpcConnection::Http { provider, .. }, Some(wallet)) => Arc::new(EthersContract::new(
            address,
            abi,
            Arc::new(SignerMiddleware::new(provider.clone(), wallet)),
        )),
        (RpcConnection::Http { provider, .. }, None) => {
            Arc::new(EthersContract::new(address, abi, Arc::new(provider.clone())))
        }
        (RpcConnection::Ws { provider, .. }, Some(wallet)) => Arc::new(EthersContract::new(
            address,
            abi,
            Arc::new(SignerMiddleware::new(provider.clone(), wallet)),
        )),
        (RpcConnection::Ws { provider, .. }, None) => {
            Arc::new(EthersContract::new(address, abi, Arc::new(provider.clone())))
        }
    }
}
