use error_stack::{Result, ResultExt};
use tracing::{debug, info, warn};

use crate::core::{Header, Height};

use super::{
    store::{CheckpointStore, LAST_FINALIZED_VERIFIED_HEIGHT_KEY, UNFINALIZED_BLOCKS_KEY},
    FinalityError, HeaderSource,
};

/// How forks are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ForkCheckMode {
    /// Compare the window against the chain finalized block.
    #[default]
    Finalized,
    /// Compare hash and parent hash of consecutive headers, for chains
    /// without finality.
    Linkage,
}

#[derive(Debug, Clone)]
pub struct UnfinalizedOptions {
    /// Blocks to rewind when no verified block is found.
    ///
    /// Zero means an unresolved fork is fatal. In linkage mode it also caps the
    /// size of the window.
    pub block_fork_reindex: u64,
    pub mode: ForkCheckMode,
}

impl Default for UnfinalizedOptions {
    fn default() -> Self {
        Self {
            block_fork_reindex: 1000,
            mode: ForkCheckMode::Finalized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Uninitialized,
    Tracking,
    ForkDetected,
    Fatal,
}

/// Tracks the blocks that can still be replaced by a fork.
///
/// The window is owned by a single task, all methods take `&mut self`.
pub struct UnfinalizedBlocks<H, S> {
    headers: H,
    store: S,
    options: UnfinalizedOptions,
    state: TrackerState,
    blocks: Vec<Header>,
    finalized: Option<Header>,
    last_checked_height: Option<Height>,
    startup_check: bool,
}

impl<H, S> UnfinalizedBlocks<H, S>
where
    H: HeaderSource,
    S: CheckpointStore,
{
    pub fn new(headers: H, store: S, options: UnfinalizedOptions) -> Self {
        Self {
            headers,
            store,
            options,
            state: TrackerState::Uninitialized,
            blocks: Vec::new(),
            finalized: None,
            last_checked_height: None,
            startup_check: true,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn unfinalized_blocks(&self) -> &[Header] {
        &self.blocks
    }

    pub fn finalized_header(&self) -> Option<&Header> {
        self.finalized.as_ref()
    }

    pub fn last_checked_height(&self) -> Option<Height> {
        self.last_checked_height
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the persisted window and checks it against the chain.
    ///
    /// Returns the height to rewind to if the window is no longer valid.
    pub async fn init(&mut self) -> Result<Option<Height>, FinalityError> {
        self.blocks = self.load_window().await?;
        self.last_checked_height = self.load_last_verified_height().await?;

        if self.options.mode == ForkCheckMode::Finalized {
            self.refresh_finalized().await?;
        }

        self.state = TrackerState::Tracking;

        if self.blocks.is_empty() {
            return Ok(None);
        }

        info!(
            blocks = self.blocks.len(),
            last_verified = ?self.last_checked_height,
            "checking persisted unfinalized blocks"
        );
        self.process_unfinalized_block_header(None).await
    }

    /// Adds a header at the tip of the window.
    ///
    /// Headers at or below the finalized block are ignored.
    pub fn register_unfinalized_block(&mut self, header: Header) -> Result<(), FinalityError> {
        if let Some(finalized) = &self.finalized {
            if header.block_height <= finalized.block_height {
                return Ok(());
            }
        }

        if let Some(last) = self.blocks.last() {
            if last.block_height + 1 != header.block_height {
                self.state = TrackerState::Fatal;
                return Err(FinalityError::NonSequentialBlock).attach_printable_lazy(|| {
                    format!(
                        "expected block {}, got {}",
                        last.block_height + 1,
                        header.block_height
                    )
                });
            }
        }

        self.blocks.push(header);
        Ok(())
    }

    /// Registers the header, if any, and checks the window for forks.
    ///
    /// Returns the height to rewind to if a fork was detected.
    pub async fn process_unfinalized_block_header(
        &mut self,
        header: Option<Header>,
    ) -> Result<Option<Height>, FinalityError> {
        if self.state == TrackerState::Fatal {
            return Err(FinalityError::UnresolvableFork)
                .attach_printable("unfinalized blocks tracker stopped after a fatal error");
        }

        if self.options.mode == ForkCheckMode::Finalized {
            self.refresh_finalized().await?;
        }

        if let Some(header) = header {
            self.register_unfinalized_block(header)?;
        }

        let Some(forked) = self.has_forked().await? else {
            self.delete_finalized_blocks().await?;
            self.save_window().await?;
            return Ok(None);
        };

        self.state = TrackerState::ForkDetected;
        warn!(
            height = forked.block_height,
            hash = %forked.block_hash,
            "fork detected"
        );

        let target = match self.rewind_target(&forked).await {
            Ok(target) => target,
            Err(err) => {
                self.state = TrackerState::Fatal;
                return Err(err);
            }
        };

        info!(target, "rewinding unfinalized blocks");
        self.blocks.retain(|block| block.block_height <= target);
        self.last_checked_height = None;
        self.save_window().await?;
        self.state = TrackerState::Tracking;

        Ok(Some(target))
    }

    /// Returns the highest height known to be on the canonical chain, starting
    /// from the `forked` header.
    ///
    /// Walks the window backwards, then tries the integrity checkpoints and
    /// finally rewinds a fixed number of blocks.
    pub async fn rewind_target(&self, forked: &Header) -> Result<Height, FinalityError> {
        let bound = match self.options.mode {
            ForkCheckMode::Finalized => self
                .finalized
                .as_ref()
                .map_or(forked.block_height, |finalized| finalized.block_height),
            ForkCheckMode::Linkage => forked.block_height.saturating_sub(1),
        };

        let mut checking = forked.clone();
        for candidate in self
            .blocks
            .iter()
            .rev()
            .filter(|block| block.block_height <= bound)
        {
            if candidate.block_hash == checking.block_hash
                || candidate.block_hash == checking.parent_hash
            {
                return Ok(candidate.block_height);
            }
            checking = self.headers.header_for_hash(&checking.parent_hash).await?;
        }

        let checkpoints = self
            .store
            .integrity_checkpoints_before(checking.block_height)
            .await?;

        if let Some(checkpoints) = checkpoints {
            for checkpoint in checkpoints {
                let header = self.headers.header_for_height(checkpoint.height).await?;
                if header.block_hash == checkpoint.hash {
                    debug!(height = checkpoint.height, "found verified checkpoint");
                    return Ok(checkpoint.height);
                }
            }
        }

        if self.options.block_fork_reindex == 0 {
            return Err(FinalityError::UnresolvableFork).attach_printable_lazy(|| {
                format!(
                    "no verified block found before fork at {}",
                    forked.block_height
                )
            });
        }

        Ok(forked
            .block_height
            .saturating_sub(self.options.block_fork_reindex))
    }

    async fn has_forked(&mut self) -> Result<Option<Header>, FinalityError> {
        match self.options.mode {
            ForkCheckMode::Finalized => self.has_forked_finalized().await,
            ForkCheckMode::Linkage => self.has_forked_linkage().await,
        }
    }

    async fn has_forked_finalized(&self) -> Result<Option<Header>, FinalityError> {
        let Some(finalized) = &self.finalized else {
            return Ok(None);
        };

        let Some(verifiable) = self
            .blocks
            .iter()
            .rev()
            .find(|block| block.block_height <= finalized.block_height)
        else {
            return Ok(None);
        };

        let mut checking = finalized.clone();
        while checking.block_height > verifiable.block_height {
            checking = self.headers.header_for_hash(&checking.parent_hash).await?;
        }

        if checking.block_hash != verifiable.block_hash {
            return Ok(Some(checking));
        }

        Ok(None)
    }

    async fn has_forked_linkage(&mut self) -> Result<Option<Header>, FinalityError> {
        if self.startup_check {
            self.startup_check = false;
            if let Some(last) = self.blocks.last() {
                let fresh = self.headers.header_for_height(last.block_height).await?;
                if fresh.block_hash != last.block_hash {
                    return Ok(Some(fresh));
                }
            }
        }

        let [.., previous, newest] = self.blocks.as_slice() else {
            return Ok(None);
        };

        if newest.parent_hash != previous.block_hash {
            return Ok(Some(newest.clone()));
        }

        Ok(None)
    }

    /// Drops verified blocks from the window.
    ///
    /// Pruning lags one check behind the finalized block, so that the last
    /// finalized block is always compared once before being dropped.
    async fn delete_finalized_blocks(&mut self) -> Result<(), FinalityError> {
        match self.options.mode {
            ForkCheckMode::Finalized => {
                let Some(finalized_height) = self.finalized.as_ref().map(|f| f.block_height)
                else {
                    return Ok(());
                };

                if let Some(last_checked) = self.last_checked_height {
                    if last_checked < finalized_height {
                        self.blocks.retain(|block| block.block_height > last_checked);
                        self.store
                            .set(LAST_FINALIZED_VERIFIED_HEIGHT_KEY, last_checked.to_string())
                            .await?;
                    }
                }

                self.last_checked_height = Some(finalized_height);
            }
            ForkCheckMode::Linkage => {
                let capacity = self.options.block_fork_reindex.max(2) as usize;
                if self.blocks.len() > capacity {
                    let excess = self.blocks.len() - capacity;
                    self.blocks.drain(..excess);
                }
            }
        }

        Ok(())
    }

    async fn refresh_finalized(&mut self) -> Result<(), FinalityError> {
        let header = self.headers.finalized_header().await?;
        match &self.finalized {
            Some(current) if current.block_height >= header.block_height => {}
            _ => self.finalized = Some(header),
        }
        Ok(())
    }

    async fn load_window(&self) -> Result<Vec<Header>, FinalityError> {
        let Some(value) = self.store.get(UNFINALIZED_BLOCKS_KEY).await? else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&value)
            .change_context(FinalityError::Store)
            .attach_printable("failed to parse unfinalized blocks")
    }

    async fn load_last_verified_height(&self) -> Result<Option<Height>, FinalityError> {
        let Some(value) = self.store.get(LAST_FINALIZED_VERIFIED_HEIGHT_KEY).await? else {
            return Ok(None);
        };

        value
            .parse::<Height>()
            .map(Some)
            .change_context(FinalityError::Store)
            .attach_printable_lazy(|| format!("invalid last verified height: {value}"))
    }

    async fn save_window(&self) -> Result<(), FinalityError> {
        let value = serde_json::to_string(&self.blocks)
            .change_context(FinalityError::Store)
            .attach_printable("failed to serialize unfinalized blocks")?;
        self.store.set(UNFINALIZED_BLOCKS_KEY, value).await
    }
}
