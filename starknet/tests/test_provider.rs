mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use strata_starknet::{
    core::{Felt, Height},
    dictionary::{dictionary_range, finalized_bound},
    finality::{
        FinalityError, FinalizedLocatorOptions, ForkCheckMode, MemoryCheckpointStore,
        UnfinalizedBlocks, UnfinalizedOptions,
    },
    provider::{
        models::{FieldElement, FunctionCall},
        ApiOptions, ApiService, ConnectionPool, HistoricalApi, ProviderError, ProviderErrorExt,
    },
};

use common::{block_json, event_json, invoke_json, MockChain};

async fn service(chains: &[MockChain]) -> ApiService<MockChain> {
    let endpoints = chains
        .iter()
        .enumerate()
        .map(|(i, chain)| (format!("mock-{i}"), chain.clone()))
        .collect();
    let pool = ConnectionPool::new(endpoints).await.unwrap();
    ApiService::new(pool, ApiOptions::default(), FinalizedLocatorOptions::default())
}

#[tokio::test]
async fn test_pool_rejects_endpoints_of_different_chains() {
    let mainnet = MockChain::with_blocks(2);
    let testnet = MockChain::with_blocks(2);
    testnet.set_chain_id(Felt::from(0x5345504f4c4941));

    let err = ConnectionPool::new(vec![
        ("mainnet".to_string(), mainnet),
        ("testnet".to_string(), testnet),
    ])
    .await
    .err()
    .unwrap();

    assert_matches!(err.current_context(), ProviderError::Configuration);
    let debug = format!("{err:?}");
    assert!(debug.contains("Value of chain id does not match across all endpoints"));
}

#[tokio::test]
async fn test_pool_rejects_endpoints_with_different_genesis() {
    let chain = MockChain::with_blocks(2);
    let other = MockChain::with_blocks(2);
    let mut block = block_json(1, vec![]);
    block["block_hash"] = json!("0x1234");
    other.insert_block(block);

    let err = ConnectionPool::new(vec![("a".to_string(), chain), ("b".to_string(), other)])
        .await
        .err()
        .unwrap();
    assert!(format!("{err:?}").contains("Value of genesis hash does not match"));
}

#[tokio::test]
async fn test_fetch_blocks_keeps_input_order() {
    let chain = MockChain::with_blocks(20);
    let api = service(&[chain]).await;

    let heights: Vec<Height> = vec![9, 3, 15, 4];
    let blocks = api.fetch_blocks(&heights).await.unwrap();
    let fetched: Vec<Height> = blocks.iter().map(|block| block.height()).collect();
    assert_eq!(fetched, heights);
}

#[tokio::test]
async fn test_fetch_blocks_settled_reports_each_failure() {
    let chain = MockChain::with_blocks(5);
    let api = service(&[chain]).await;

    let results = api.fetch_blocks_settled(&[1, 50, 2]).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].as_ref().err().unwrap().is_not_found());
    assert!(results[2].is_ok());

    let err = api.fetch_blocks(&[1, 50, 2]).await.err().unwrap();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_failed_request_moves_to_next_endpoint() {
    let first = MockChain::with_blocks(5);
    let second = MockChain::with_blocks(5);
    let api = service(&[first.clone(), second.clone()]).await;

    first.fail_next([ProviderError::Network, ProviderError::Network]);
    second.fail_next([ProviderError::Network]);

    let block = api.fetch_block(3).await.unwrap();
    assert_eq!(block.height(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let chain = MockChain::with_blocks(5);
    let api = service(&[chain.clone()]).await;

    chain.fail_next(std::iter::repeat(ProviderError::Timeout).take(20));
    let before = chain.calls();
    let err = api.fetch_block(3).await.err().unwrap();

    assert_matches!(err.current_context(), ProviderError::RetriesExhausted);
    assert_eq!(chain.calls() - before, 5);
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    let chain = MockChain::with_blocks(5);
    let api = service(&[chain.clone()]).await;

    chain.fail_next([ProviderError::BadRequest]);
    let before = chain.calls();
    let err = api.fetch_block(3).await.err().unwrap();

    assert_matches!(err.current_context(), ProviderError::BadRequest);
    assert_eq!(chain.calls() - before, 1);
}

#[tokio::test]
async fn test_block_logs_are_paginated_and_linked() {
    let chain = MockChain::with_blocks(5);
    chain.insert_block(block_json(
        3,
        vec![
            invoke_json(0xa1, "0x5", vec!["0x0".to_string()]),
            invoke_json(0xa2, "0x5", vec!["0x0".to_string()]),
        ],
    ));
    let events = (0..5)
        .map(|i| {
            let tx_hash = if i < 3 { 0xa1 } else { 0xa2 };
            event_json(3, tx_hash, "0x99", vec![format!("0x{i}")], vec![])
        })
        .collect();
    chain.insert_events(3, events);
    chain.set_event_page_size(2);

    let api = service(&[chain]).await;
    let block = api.fetch_block(3).await.unwrap();

    assert_eq!(block.logs().len(), 5);
    let txs = block.transactions();
    assert_eq!(block.transaction_logs(&txs[0]).count(), 3);
    assert_eq!(block.transaction_logs(&txs[1]).count(), 2);

    let last = &block.logs()[4];
    assert_eq!(last.index, 4);
    assert_eq!(last.topics, vec![Felt::from(4)]);
    assert_eq!(block.log_transaction(last).map(|tx| tx.hash), Some(Felt::from(0xa2)));
}

#[tokio::test]
async fn test_transaction_receipt_is_fetched_once() {
    let chain = MockChain::with_blocks(5);
    chain.insert_block(block_json(2, vec![invoke_json(0xa1, "0x5", vec!["0x0".to_string()])]));
    let api = service(&[chain.clone()]).await;

    let block = api.fetch_block(2).await.unwrap();
    let tx = &block.transactions()[0];

    let before = chain.calls();
    let receipt = tx.receipt(api.pool()).await.unwrap();
    assert_eq!(Felt::from(*receipt.transaction_hash()), Felt::from(0xa1));
    tx.receipt(api.pool()).await.unwrap();
    assert_eq!(chain.calls() - before, 1);
}

#[tokio::test]
async fn test_finalized_header_from_block_status() {
    let chain = MockChain::new();
    for height in 0..=10 {
        let mut block = block_json(height, vec![]);
        if height <= 7 {
            block["status"] = json!("ACCEPTED_ON_L1");
        }
        chain.insert_block(block);
    }

    let api = service(&[chain]).await;
    let finalized = api.fetch_finalized_header().await.unwrap();
    assert_eq!(finalized.block_height, 7);
}

#[tokio::test]
async fn test_finalized_header_falls_back_to_fixed_depth() {
    let chain = MockChain::with_blocks(300);
    let api = service(&[chain]).await;

    let finalized = api.fetch_finalized_header().await.unwrap();
    assert_eq!(finalized.block_height, 100);
}

#[tokio::test]
async fn test_finalized_header_provider_error() {
    let chain = MockChain::with_blocks(10);
    let api = service(&[chain.clone()]).await;

    chain.fail_next([ProviderError::BadRequest]);
    let err = api.fetch_finalized_header().await.err().unwrap();
    assert_matches!(err.current_context(), FinalityError::Provider);
}

#[tokio::test]
async fn test_linkage_mode_bounds_dictionary_with_fixed_depth() {
    let chain = MockChain::with_blocks(300);
    let api = Arc::new(service(&[chain]).await);

    let mut tracker = UnfinalizedBlocks::new(
        api.clone(),
        MemoryCheckpointStore::new(),
        UnfinalizedOptions {
            block_fork_reindex: 1000,
            mode: ForkCheckMode::Linkage,
        },
    );
    tracker.init().await.unwrap();
    assert!(tracker.finalized_header().is_none());

    let finalized = finalized_bound(tracker.finalized_header(), api.as_ref()).await;
    assert_eq!(finalized, Some(100));
    assert_eq!(dictionary_range(0, 300, 100), Some((0, 100)));
}

#[tokio::test]
async fn test_dictionary_disabled_without_finalized_block() {
    let chain = MockChain::with_blocks(10);
    let api = service(&[chain.clone()]).await;

    chain.fail_next([ProviderError::BadRequest]);
    assert_eq!(finalized_bound(None, &api).await, None);
}

#[tokio::test]
async fn test_safe_api_is_scoped_to_height() {
    let chain = MockChain::with_blocks(10);
    let api = service(&[chain]).await;

    let safe = api.safe_api_at(4);
    assert_eq!(safe.block_height(), 4);

    let result = safe
        .call(&FunctionCall {
            contract_address: FieldElement::from(1u64),
            entry_point_selector: FieldElement::from(2u64),
            calldata: vec![],
        })
        .await
        .unwrap();
    assert_eq!(result, vec![FieldElement::ONE]);

    let err = safe.get_block_with_txs().await.err().unwrap();
    assert_matches!(err.current_context(), ProviderError::Unsupported);
}
