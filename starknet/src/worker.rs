//! Unit of work of the indexer: fetch one block and match it against the
//! datasources handlers.
use std::sync::Arc;

use error_stack::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::{
    abi::AbiDecoder,
    block::{Log, NormalizedBlock, Transaction},
    calldata::DecodedCall,
    core::{Felt, Header, Height},
    datasource::{Datasource, HandlerKind},
    filter::{matches_block, matches_log, matches_transaction, MatchOptions},
    provider::{ApiService, ConnectionPool, ProviderError, StarknetApi},
};

/// A log with its named values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedLog {
    pub index: usize,
    pub address: Felt,
    pub transaction_hash: Felt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
}

/// Data passed to a matching handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HandlerInput {
    Block { height: Height },
    #[serde(rename_all = "camelCase")]
    Transaction {
        index: usize,
        hash: Felt,
        calls: Vec<DecodedCall>,
        logs: Vec<DecodedLog>,
    },
    Log(DecodedLog),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerMatch {
    /// Index of the datasource in the list passed to the worker.
    pub datasource: usize,
    pub handler: String,
    pub input: HandlerInput,
}

/// Handlers to run for a block, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub header: Header,
    pub matches: Vec<HandlerMatch>,
}

pub struct Worker<P> {
    api: Arc<ApiService<P>>,
    decoder: AbiDecoder<ConnectionPool<P>>,
    options: MatchOptions,
}

impl<P: StarknetApi> Worker<P> {
    pub fn new(api: Arc<ApiService<P>>, options: MatchOptions) -> Self {
        let decoder = AbiDecoder::new(api.pool().clone());
        Self {
            api,
            decoder,
            options,
        }
    }

    pub fn decoder(&self) -> &AbiDecoder<ConnectionPool<P>> {
        &self.decoder
    }

    #[instrument(skip(self), err(Debug))]
    pub async fn fetch_chain_block(&self, height: Height) -> Result<NormalizedBlock, ProviderError> {
        self.api.fetch_block(height).await
    }

    /// Matches the block against the datasources.
    ///
    /// Block handlers come first, then for each transaction its transaction
    /// handlers followed by the log handlers of the logs it emitted.
    pub async fn process_fetched_block(
        &self,
        block: &NormalizedBlock,
        datasources: &[Datasource],
    ) -> ProcessResult {
        let mut matches = Vec::new();

        for (ds_index, ds) in datasources.iter().enumerate() {
            for handler in &ds.handlers {
                if let HandlerKind::Block { filter } = &handler.kind {
                    if matches_block(block, filter) {
                        matches.push(HandlerMatch {
                            datasource: ds_index,
                            handler: handler.handler.clone(),
                            input: HandlerInput::Block {
                                height: block.height(),
                            },
                        });
                    }
                }
            }
        }

        for tx in block.transactions() {
            self.process_transaction(block, tx, datasources, &mut matches)
                .await;

            for log in block.transaction_logs(tx) {
                self.process_log(log, datasources, &mut matches).await;
            }
        }

        // Logs of transactions missing from the block.
        for log in block.logs().iter().filter(|log| log.transaction_index.is_none()) {
            self.process_log(log, datasources, &mut matches).await;
        }

        debug!(
            height = block.height(),
            matches = matches.len(),
            "processed block"
        );

        ProcessResult {
            header: block.header(),
            matches,
        }
    }

    async fn process_transaction(
        &self,
        block: &NormalizedBlock,
        tx: &Transaction,
        datasources: &[Datasource],
        matches: &mut Vec<HandlerMatch>,
    ) {
        for (ds_index, ds) in datasources.iter().enumerate() {
            for handler in &ds.handlers {
                let HandlerKind::Call { filter } = &handler.kind else {
                    continue;
                };

                if !matches_transaction(tx, filter, ds.address.as_deref(), &self.options) {
                    continue;
                }

                let calls = self.decoder.decode_transaction_calls(tx, ds).await;
                let mut logs = Vec::new();
                for log in block.transaction_logs(tx) {
                    logs.push(self.decode_log(log, ds).await);
                }

                matches.push(HandlerMatch {
                    datasource: ds_index,
                    handler: handler.handler.clone(),
                    input: HandlerInput::Transaction {
                        index: tx.index,
                        hash: tx.hash,
                        calls,
                        logs,
                    },
                });
            }
        }
    }

    async fn process_log(&self, log: &Log, datasources: &[Datasource], matches: &mut Vec<HandlerMatch>) {
        for (ds_index, ds) in datasources.iter().enumerate() {
            for handler in &ds.handlers {
                let HandlerKind::Event { filter } = &handler.kind else {
                    continue;
                };

                if !matches_log(log, filter, ds.address.as_deref(), &self.options) {
                    continue;
                }

                matches.push(HandlerMatch {
                    datasource: ds_index,
                    handler: handler.handler.clone(),
                    input: HandlerInput::Log(self.decode_log(log, ds).await),
                });
            }
        }
    }

    async fn decode_log(&self, log: &Log, ds: &Datasource) -> DecodedLog {
        DecodedLog {
            index: log.index,
            address: log.address,
            transaction_hash: log.transaction_hash,
            args: self.decoder.decode_log(log, ds).await,
        }
    }
}
