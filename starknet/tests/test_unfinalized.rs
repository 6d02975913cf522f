mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use strata_starknet::{
    core::{Header, Height},
    finality::{
        Checkpoint, CheckpointStore, FinalityError, ForkCheckMode, MemoryCheckpointStore,
        TrackerState, UnfinalizedBlocks, UnfinalizedOptions, LAST_FINALIZED_VERIFIED_HEIGHT_KEY,
        UNFINALIZED_BLOCKS_KEY,
    },
};

use common::{canonical, canonical_header, stale, stale_header, MockHeaders};

fn finalized_options(block_fork_reindex: u64) -> UnfinalizedOptions {
    UnfinalizedOptions {
        block_fork_reindex,
        mode: ForkCheckMode::Finalized,
    }
}

fn linkage_options() -> UnfinalizedOptions {
    UnfinalizedOptions {
        block_fork_reindex: 1000,
        mode: ForkCheckMode::Linkage,
    }
}

fn checkpoint(height: Height) -> Checkpoint {
    Checkpoint {
        height,
        hash: canonical(height),
    }
}

async fn store_with_window(window: &[Header], last_verified: Option<Height>) -> MemoryCheckpointStore {
    let store = MemoryCheckpointStore::with_checkpoints([checkpoint(99)]);
    store
        .set(UNFINALIZED_BLOCKS_KEY, serde_json::to_string(window).unwrap())
        .await
        .unwrap();
    if let Some(height) = last_verified {
        store
            .set(LAST_FINALIZED_VERIFIED_HEIGHT_KEY, height.to_string())
            .await
            .unwrap();
    }
    store
}

#[tokio::test]
async fn test_no_fork_on_canonical_chain() {
    let mut tracker = UnfinalizedBlocks::new(
        MockHeaders::new(105),
        MemoryCheckpointStore::new(),
        finalized_options(1000),
    );
    assert_eq!(tracker.init().await.unwrap(), None);

    for height in 106..=110 {
        let rewind = tracker
            .process_unfinalized_block_header(Some(canonical_header(height)))
            .await
            .unwrap();
        assert_eq!(rewind, None);
    }

    assert_eq!(tracker.unfinalized_blocks().len(), 5);
    assert_eq!(tracker.state(), TrackerState::Tracking);
}

#[tokio::test]
async fn test_blocks_below_finalized_are_ignored() {
    let mut tracker = UnfinalizedBlocks::new(
        MockHeaders::new(105),
        MemoryCheckpointStore::new(),
        finalized_options(1000),
    );
    tracker.init().await.unwrap();

    tracker
        .process_unfinalized_block_header(Some(canonical_header(104)))
        .await
        .unwrap();
    assert!(tracker.unfinalized_blocks().is_empty());
}

#[tokio::test]
async fn test_fork_rewinds_to_last_matching_block() {
    let mut tracker = UnfinalizedBlocks::new(
        MockHeaders::new(110),
        MemoryCheckpointStore::with_checkpoints([checkpoint(99)]),
        finalized_options(1000),
    );

    for height in 100..=110 {
        let header = if height == 103 {
            canonical_header(height)
        } else {
            stale_header(height)
        };
        tracker.register_unfinalized_block(header).unwrap();
    }

    let rewind = tracker
        .process_unfinalized_block_header(Some(canonical_header(111)))
        .await
        .unwrap();

    assert_eq!(rewind, Some(103));
    let last = tracker.unfinalized_blocks().last().unwrap();
    assert_eq!(last.block_height, 103);
    assert_eq!(tracker.state(), TrackerState::Tracking);
}

#[tokio::test]
async fn test_fork_rewinds_to_checkpoint() {
    let mut tracker = UnfinalizedBlocks::new(
        MockHeaders::new(110),
        MemoryCheckpointStore::with_checkpoints([checkpoint(50), checkpoint(99)]),
        finalized_options(1000),
    );

    for height in 100..=110 {
        tracker
            .register_unfinalized_block(stale_header(height))
            .unwrap();
    }

    let rewind = tracker
        .process_unfinalized_block_header(Some(canonical_header(111)))
        .await
        .unwrap();
    assert_eq!(rewind, Some(99));
    assert!(tracker.unfinalized_blocks().is_empty());
}

#[tokio::test]
async fn test_fork_rewinds_fixed_depth_without_checkpoints() {
    let mut tracker = UnfinalizedBlocks::new(
        MockHeaders::new(110),
        MemoryCheckpointStore::new(),
        finalized_options(10),
    );

    for height in 100..=110 {
        tracker
            .register_unfinalized_block(stale_header(height))
            .unwrap();
    }

    let rewind = tracker
        .process_unfinalized_block_header(None)
        .await
        .unwrap();
    assert_eq!(rewind, Some(100));
}

#[tokio::test]
async fn test_fixed_depth_rewind_stops_at_zero() {
    let mut tracker = UnfinalizedBlocks::new(
        MockHeaders::new(110),
        MemoryCheckpointStore::new(),
        finalized_options(1000),
    );
    tracker
        .register_unfinalized_block(stale_header(110))
        .unwrap();

    let rewind = tracker
        .process_unfinalized_block_header(None)
        .await
        .unwrap();
    assert_eq!(rewind, Some(0));
}

#[tokio::test]
async fn test_unresolvable_fork_is_fatal() {
    let mut tracker = UnfinalizedBlocks::new(
        MockHeaders::new(110),
        MemoryCheckpointStore::new(),
        finalized_options(0),
    );

    for height in 105..=110 {
        tracker
            .register_unfinalized_block(stale_header(height))
            .unwrap();
    }

    let err = tracker
        .process_unfinalized_block_header(None)
        .await
        .unwrap_err();
    assert_matches!(err.current_context(), FinalityError::UnresolvableFork);
    assert_eq!(tracker.state(), TrackerState::Fatal);

    let err = tracker
        .process_unfinalized_block_header(Some(canonical_header(111)))
        .await
        .unwrap_err();
    assert_matches!(err.current_context(), FinalityError::UnresolvableFork);
}

#[tokio::test]
async fn test_init_detects_fork_in_persisted_window() {
    let window = [canonical_header(99), stale_header(100), stale_header(101)];
    let store = store_with_window(&window, Some(99)).await;

    let mut tracker = UnfinalizedBlocks::new(MockHeaders::new(110), store, finalized_options(1000));
    let rewind = tracker.init().await.unwrap();

    assert_eq!(rewind, Some(99));
    assert_eq!(tracker.unfinalized_blocks(), &[canonical_header(99)]);

    let saved = tracker.store().get(UNFINALIZED_BLOCKS_KEY).await.unwrap().unwrap();
    let saved: Vec<Header> = serde_json::from_str(&saved).unwrap();
    assert_eq!(saved, vec![canonical_header(99)]);
}

#[tokio::test]
async fn test_init_falls_back_to_checkpoint() {
    let window = [stale_header(110), stale_header(111), stale_header(112)];
    let store = store_with_window(&window, None).await;

    let mut tracker = UnfinalizedBlocks::new(MockHeaders::new(110), store, finalized_options(1000));
    assert_eq!(tracker.init().await.unwrap(), Some(99));
}

#[tokio::test]
async fn test_init_rejects_corrupted_window() {
    let store = MemoryCheckpointStore::new();
    store
        .set(UNFINALIZED_BLOCKS_KEY, "not json".to_string())
        .await
        .unwrap();

    let mut tracker = UnfinalizedBlocks::new(MockHeaders::new(110), store, finalized_options(1000));
    let err = tracker.init().await.unwrap_err();
    assert_matches!(err.current_context(), FinalityError::Store);
}

#[tokio::test]
async fn test_finalized_blocks_are_pruned_one_check_later() {
    let headers = Arc::new(MockHeaders::new(90));
    let mut tracker = UnfinalizedBlocks::new(
        headers.clone(),
        MemoryCheckpointStore::new(),
        finalized_options(1000),
    );
    tracker.init().await.unwrap();

    for height in 100..=104 {
        tracker
            .process_unfinalized_block_header(Some(canonical_header(height)))
            .await
            .unwrap();
    }

    headers.set_finalized(103);
    tracker
        .process_unfinalized_block_header(Some(canonical_header(105)))
        .await
        .unwrap();
    assert_eq!(tracker.unfinalized_blocks()[0].block_height, 100);
    assert_eq!(tracker.last_checked_height(), Some(103));

    headers.set_finalized(104);
    tracker
        .process_unfinalized_block_header(Some(canonical_header(106)))
        .await
        .unwrap();

    let heights: Vec<Height> = tracker
        .unfinalized_blocks()
        .iter()
        .map(|block| block.block_height)
        .collect();
    assert_eq!(heights, vec![104, 105, 106]);

    let last_verified = tracker
        .store()
        .get(LAST_FINALIZED_VERIFIED_HEIGHT_KEY)
        .await
        .unwrap();
    assert_eq!(last_verified.as_deref(), Some("103"));
}

#[tokio::test]
async fn test_linkage_detects_parent_mismatch() {
    let mut tracker = UnfinalizedBlocks::new(
        MockHeaders::new(0),
        MemoryCheckpointStore::new(),
        linkage_options(),
    );
    tracker.init().await.unwrap();

    for height in 100..=110 {
        let rewind = tracker
            .process_unfinalized_block_header(Some(canonical_header(height)))
            .await
            .unwrap();
        assert_eq!(rewind, None);
    }

    let forked = Header {
        block_height: 111,
        block_hash: stale(111),
        parent_hash: stale(110),
    };
    let rewind = tracker
        .process_unfinalized_block_header(Some(forked))
        .await
        .unwrap();

    assert_eq!(rewind, Some(109));
    assert_eq!(tracker.unfinalized_blocks().last(), Some(&canonical_header(109)));
}

#[tokio::test]
async fn test_linkage_checks_window_on_startup() {
    let window = [canonical_header(103), canonical_header(104), stale_header(105)];
    let store = store_with_window(&window, None).await;

    let mut tracker = UnfinalizedBlocks::new(MockHeaders::new(0), store, linkage_options());
    assert_eq!(tracker.init().await.unwrap(), Some(104));
}

#[tokio::test]
async fn test_linkage_window_is_bounded() {
    let options = UnfinalizedOptions {
        block_fork_reindex: 5,
        mode: ForkCheckMode::Linkage,
    };
    let mut tracker = UnfinalizedBlocks::new(MockHeaders::new(0), MemoryCheckpointStore::new(), options);
    tracker.init().await.unwrap();

    for height in 100..=120 {
        tracker
            .process_unfinalized_block_header(Some(canonical_header(height)))
            .await
            .unwrap();
    }

    assert_eq!(tracker.unfinalized_blocks().len(), 5);
    assert_eq!(tracker.unfinalized_blocks()[0].block_height, 116);
}
