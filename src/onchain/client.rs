//! Read-only node client for the trap contracts.
//!
//! Holds one WebSocket provider shared between the log subscription and
//! contract calls. The subscription reconnects automatically with exponential
//! backoff (see [`reconnect`]); calls are bounded by a timeout and drop the
//! cached connection on failure so the next call reconnects.

use crate::config::{Config, ConfigError, ContractAddresses};
use crate::onchain::abi::{self, IDustRecorder, IDustTrap};
use crate::onchain::reconnect::{self, BackoffPolicy, SessionEnd};
use crate::onchain::types::{RawEvent, RecordedTx, StatusReading, TrapSettings};
use crate::onchain::ChainError;
use crate::service::{MonitorInput, SourceStatus};

use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, TransactionInput, TransactionRequest};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Push side of the chain connection: delivers raw logs until cancelled.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stream logs into `tx` until `cancel` fires. Only returns an error when
    /// the reconnect budget is exhausted.
    async fn run(
        &self,
        tx: mpsc::Sender<MonitorInput>,
        cancel: CancellationToken,
    ) -> Result<(), ChainError>;
}

/// Pull side of the chain connection: view calls against the trap contracts.
#[async_trait]
pub trait ContractReader: Send + Sync {
    /// getStatus() stamped with the current head block.
    async fn get_status(&self) -> Result<StatusReading, ChainError>;

    async fn trap_settings(&self) -> Result<TrapSettings, ChainError>;

    async fn get_entry_count(&self) -> Result<U256, ChainError>;

    /// The `k` most recent recorder entries, oldest first.
    async fn get_last(&self, k: u64) -> Result<Vec<RecordedTx>, ChainError>;
}

pub struct ChainClient {
    rpc_url: String,
    addresses: ContractAddresses,
    call_timeout: Duration,
    backoff: BackoffPolicy,
    provider: Mutex<Option<DynProvider>>,
}

impl ChainClient {
    pub fn new(
        rpc_url: String,
        addresses: ContractAddresses,
        call_timeout: Duration,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            rpc_url,
            addresses,
            call_timeout,
            backoff,
            provider: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let addresses = config.validate()?;
        let backoff = BackoffPolicy {
            initial: Duration::from_millis(config.monitor.reconnect_initial_ms),
            max: Duration::from_millis(config.monitor.reconnect_max_ms),
            max_attempts: config.monitor.max_reconnect_attempts,
        };
        Ok(Self::new(
            config.chain.rpc_url.clone(),
            addresses,
            config.monitor.call_timeout(),
            backoff,
        ))
    }

    pub fn addresses(&self) -> &ContractAddresses {
        &self.addresses
    }

    /// Log filter covering every watched contract and event topic.
    pub fn build_filter(&self) -> Filter {
        Filter::new()
            .address(self.addresses.watched())
            .event_signature(abi::watched_topics())
    }

    /// Open a fresh connection and make it the shared one.
    async fn connect(&self) -> Result<DynProvider, ChainError> {
        let ws = WsConnect::new(self.rpc_url.clone());
        let provider = tokio::time::timeout(self.call_timeout, ProviderBuilder::new().connect_ws(ws))
            .await
            .map_err(|_| ChainError::Timeout {
                method: "connect",
                timeout: self.call_timeout,
            })?
            .map_err(|e| ChainError::Connection(e.to_string()))?
            .erased();

        *self.provider.lock().await = Some(provider.clone());
        Ok(provider)
    }

    async fn provider(&self) -> Result<DynProvider, ChainError> {
        let cached = self.provider.lock().await.clone();
        match cached {
            Some(p) => Ok(p),
            None => self.connect().await,
        }
    }

    async fn invalidate(&self) {
        *self.provider.lock().await = None;
    }

    /// eth_call `call` against `to`, decoding the return data.
    async fn call<C>(&self, to: Address, method: &'static str, call: C) -> Result<C::Return, ChainError>
    where
        C: SolCall + Send,
    {
        let provider = self.provider().await?;
        let request = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(call.abi_encode().into()));

        let output = match tokio::time::timeout(self.call_timeout, async {
            provider.call(request).await
        })
        .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                self.invalidate().await;
                return Err(ChainError::Connection(format!("{method}: {e}")));
            }
            Err(_) => {
                return Err(ChainError::Timeout {
                    method,
                    timeout: self.call_timeout,
                });
            }
        };

        C::abi_decode_returns(&output).map_err(|e| ChainError::Decode {
            method,
            reason: e.to_string(),
        })
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let provider = self.provider().await?;
        match tokio::time::timeout(self.call_timeout, async { provider.get_block_number().await }).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => {
                self.invalidate().await;
                Err(ChainError::Connection(format!("eth_blockNumber: {e}")))
            }
            Err(_) => Err(ChainError::Timeout {
                method: "eth_blockNumber",
                timeout: self.call_timeout,
            }),
        }
    }

    /// A single subscription session: connect, subscribe, forward live logs.
    async fn session(
        &self,
        tx: &mpsc::Sender<MonitorInput>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        info!(url = %self.rpc_url, "connecting to node WebSocket");

        let provider = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            res = self.connect() => match res {
                Ok(p) => p,
                Err(e) => return SessionEnd::ConnectFailed(e),
            },
        };

        let head_block = match reconnect::setup_step(
            cancel,
            self.call_timeout,
            "eth_blockNumber",
            provider.get_block_number(),
        )
        .await
        {
            Ok(n) => Some(n),
            Err(SessionEnd::Cancelled) => return SessionEnd::Cancelled,
            Err(e) => {
                debug!(error = ?e, "could not read head block");
                None
            }
        };

        let filter = self.build_filter();
        let sub = match reconnect::setup_step(
            cancel,
            self.call_timeout,
            "eth_subscribe",
            provider.subscribe_logs(&filter),
        )
        .await
        {
            Ok(s) => s,
            Err(end) => return end,
        };
        let sub_id = *sub.local_id();

        info!(
            contracts = self.addresses.watched().len(),
            head_block = ?head_block,
            "subscribed to trap events"
        );
        let _ = tx
            .send(MonitorInput::Source(SourceStatus::Connected { head_block }))
            .await;

        let mut stream = sub.into_stream();
        let end = loop {
            tokio::select! {
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                next = stream.next() => match next {
                    Some(log) => {
                        if log.removed {
                            debug!(block = ?log.block_number, "skipping log removed by reorg");
                            continue;
                        }
                        if tx.send(MonitorInput::Log(RawEvent::from_rpc(&log))).await.is_err() {
                            // Reconciler is gone; treat as shutdown.
                            break SessionEnd::Cancelled;
                        }
                    }
                    None => break SessionEnd::StreamEnded,
                },
            }
        };

        if matches!(end, SessionEnd::Cancelled) {
            match provider.unsubscribe(sub_id).await {
                Ok(()) => info!("unsubscribed from trap events"),
                Err(e) => warn!(error = %e, "failed to unsubscribe"),
            }
        }

        end
    }
}

#[async_trait]
impl EventSource for ChainClient {
    async fn run(
        &self,
        tx: mpsc::Sender<MonitorInput>,
        cancel: CancellationToken,
    ) -> Result<(), ChainError> {
        let tx = &tx;
        let cancel = &cancel;
        reconnect::supervise(&self.backoff, cancel, tx, move || self.session(tx, cancel)).await
    }
}

#[async_trait]
impl ContractReader for ChainClient {
    async fn get_status(&self) -> Result<StatusReading, ChainError> {
        let block_number = self.block_number().await?;
        let status = self
            .call(self.addresses.trap, "getStatus", IDustTrap::getStatusCall {})
            .await?;
        Ok(StatusReading {
            dust_count: status.dustCount,
            threshold: status.threshold,
            would_trigger: status.wouldTrigger,
            block_number,
        })
    }

    async fn trap_settings(&self) -> Result<TrapSettings, ChainError> {
        let trap = self.addresses.trap;
        let dust_threshold_wei = self
            .call(trap, "DUST_THRESHOLD", IDustTrap::DUST_THRESHOLDCall {})
            .await?;
        let count_threshold = self
            .call(trap, "COUNT_THRESHOLD", IDustTrap::COUNT_THRESHOLDCall {})
            .await?;
        let block_window = self
            .call(trap, "BLOCK_WINDOW", IDustTrap::BLOCK_WINDOWCall {})
            .await?;
        Ok(TrapSettings {
            dust_threshold_wei,
            count_threshold,
            block_window,
        })
    }

    async fn get_entry_count(&self) -> Result<U256, ChainError> {
        self.call(
            self.addresses.recorder,
            "getEntryCount",
            IDustRecorder::getEntryCountCall {},
        )
        .await
    }

    async fn get_last(&self, k: u64) -> Result<Vec<RecordedTx>, ChainError> {
        let records = self
            .call(
                self.addresses.recorder,
                "getLast",
                IDustRecorder::getLastCall { k: U256::from(k) },
            )
            .await?;
        Ok(records
            .into_iter()
            .map(|r| RecordedTx {
                sender: r.sender,
                amount: r.amount,
                block_number: r.blockNumber,
            })
            .collect())
    }
}
