use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand};
use error_stack::{Report, ResultExt};
use serde::Serialize;
use strata_observability::init_tracing;
use strata_starknet::{
    cli::{load_datasources, DictionaryArgs, FinalityArgs, RpcArgs},
    core::Height,
    dictionary::{self, DictionaryPlan},
    error::{IndexerError, ReportExt, Result},
    finality::{FinalityError, MemoryCheckpointStore, UnfinalizedBlocks},
    worker::Worker,
};
use tracing::{info, warn};

/// Delay between polls of the chain head once the indexer caught up.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    subcommand: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    FetchBlock(FetchBlockArgs),
    Finalized(FinalizedArgs),
    Plan(PlanArgs),
    ProcessBlock(ProcessBlockArgs),
    Index(IndexArgs),
}

/// Fetch a block and print a summary.
#[derive(Args, Debug)]
struct FetchBlockArgs {
    /// Block height.
    #[arg(long, env)]
    height: Height,
    #[command(flatten)]
    rpc: RpcArgs,
    #[command(flatten)]
    finality: FinalityArgs,
}

/// Print the latest finalized block.
#[derive(Args, Debug)]
struct FinalizedArgs {
    #[command(flatten)]
    rpc: RpcArgs,
    #[command(flatten)]
    finality: FinalityArgs,
}

/// Print the dictionary query for the datasources.
#[derive(Args, Debug)]
struct PlanArgs {
    /// Path to the datasources json file.
    #[arg(long, env)]
    datasources: PathBuf,
    /// Query the dictionary starting from this block.
    #[arg(long, env)]
    from_block: Option<Height>,
    /// Last block queried.
    #[arg(long, env)]
    to_block: Option<Height>,
    #[command(flatten)]
    dictionary: DictionaryArgs,
}

/// Fetch a block and print the handlers matching it.
#[derive(Args, Debug)]
struct ProcessBlockArgs {
    /// Block height.
    #[arg(long, env)]
    height: Height,
    /// Path to the datasources json file.
    #[arg(long, env)]
    datasources: PathBuf,
    #[command(flatten)]
    rpc: RpcArgs,
    #[command(flatten)]
    finality: FinalityArgs,
    #[command(flatten)]
    dictionary: DictionaryArgs,
}

/// Follow the chain, printing the handlers matching each block.
#[derive(Args, Debug)]
struct IndexArgs {
    /// Path to the datasources json file.
    #[arg(long, env)]
    datasources: PathBuf,
    /// First block indexed.
    #[arg(long, env, default_value = "0")]
    from_block: Height,
    /// Stop after this block. Follows the head if not set.
    #[arg(long, env)]
    to_block: Option<Height>,
    #[command(flatten)]
    rpc: RpcArgs,
    #[command(flatten)]
    finality: FinalityArgs,
    #[command(flatten)]
    dictionary: DictionaryArgs,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockSummary {
    height: Height,
    hash: String,
    parent_hash: String,
    timestamp: u64,
    transactions: usize,
    logs: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    run_with_args(args).await.to_exit_code()
}

async fn run_with_args(args: Cli) -> Result<()> {
    init_tracing()
        .change_context(IndexerError::Fatal)
        .attach_printable("failed to initialize tracing")?;

    match args.subcommand {
        Command::FetchBlock(args) => run_fetch_block(args).await,
        Command::Finalized(args) => run_finalized(args).await,
        Command::Plan(args) => run_plan(args).await,
        Command::ProcessBlock(args) => run_process_block(args).await,
        Command::Index(args) => run_index(args).await,
    }
}

async fn run_fetch_block(args: FetchBlockArgs) -> Result<()> {
    let api = args.rpc.to_api_service(&args.finality).await?;
    let block = api
        .fetch_block(args.height)
        .await
        .change_context(IndexerError::Provider)?;

    print_json(&BlockSummary {
        height: block.height(),
        hash: block.hash().to_hex(),
        parent_hash: block.parent_hash().to_hex(),
        timestamp: block.timestamp,
        transactions: block.transactions().len(),
        logs: block.logs().len(),
    })
}

async fn run_finalized(args: FinalizedArgs) -> Result<()> {
    let api = args.rpc.to_api_service(&args.finality).await?;
    let header = api
        .fetch_finalized_header()
        .await
        .map_err(finality_error)?;
    print_json(&header)
}

async fn run_plan(args: PlanArgs) -> Result<()> {
    let datasources = load_datasources(&args.datasources).await?;
    let options = args.dictionary.to_dictionary_options()?;
    let plan = dictionary::plan(&datasources, &options);

    match &plan {
        DictionaryPlan::FullScan => info!("dictionary can't be used, every block is scanned"),
        DictionaryPlan::Query { entries, .. } => print_json(entries)?,
    }

    let (Some(from_block), Some(to_block)) = (args.from_block, args.to_block) else {
        return Ok(());
    };
    let Some(client) = args.dictionary.to_dictionary_client()? else {
        return Ok(());
    };

    let candidates = client
        .candidate_heights(&plan, from_block, to_block)
        .await
        .change_context(IndexerError::Provider)?;

    match candidates {
        None => info!("dictionary has no data for the range"),
        Some(candidates) => print_json(&candidates.heights)?,
    }

    Ok(())
}

async fn run_process_block(args: ProcessBlockArgs) -> Result<()> {
    let datasources = load_datasources(&args.datasources).await?;
    let options = args.dictionary.to_dictionary_options()?;
    let api = Arc::new(args.rpc.to_api_service(&args.finality).await?);
    let worker = Worker::new(api, options.match_options());

    let block = worker
        .fetch_chain_block(args.height)
        .await
        .change_context(IndexerError::Provider)?;
    let result = worker.process_fetched_block(&block, &datasources).await;

    print_json(&result)
}

async fn run_index(args: IndexArgs) -> Result<()> {
    let datasources = load_datasources(&args.datasources).await?;
    let dictionary_options = args.dictionary.to_dictionary_options()?;
    let dictionary = args.dictionary.to_dictionary_client()?;
    let plan = dictionary::plan(&datasources, &dictionary_options);

    let api = Arc::new(args.rpc.to_api_service(&args.finality).await?);
    let worker = Worker::new(api.clone(), dictionary_options.match_options());
    let mut tracker = UnfinalizedBlocks::new(
        api.clone(),
        MemoryCheckpointStore::new(),
        args.finality.to_unfinalized_options(),
    );
    tracker.init().await.map_err(finality_error)?;

    let batch_size = args.rpc.batch_size.max(1) as u64;
    let mut next = args.from_block;
    let mut finalized: Option<Height> = None;

    info!(
        from_block = args.from_block,
        to_block = ?args.to_block,
        full_scan = plan.is_full_scan(),
        "start indexing"
    );

    loop {
        if args.to_block.is_some_and(|to_block| next > to_block) {
            info!(height = next - 1, "reached end block");
            return Ok(());
        }

        let head = api
            .fetch_latest_header()
            .await
            .change_context(IndexerError::Provider)?
            .block_height;
        let end = args.to_block.map_or(head, |to_block| to_block.min(head));

        if next > end {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        // Blocks above the finalized block are all tracked for forks, the
        // dictionary is only used below it.
        if dictionary.is_some() && finalized.map_or(true, |height| next > height) {
            finalized =
                dictionary::finalized_bound(tracker.finalized_header(), api.as_ref()).await;
        }

        let range = finalized.and_then(|height| dictionary::dictionary_range(next, end, height));
        let mut candidates = None;
        if let (Some(client), Some((from, to))) = (dictionary.as_ref(), range) {
            match client.candidate_heights(&plan, from, to).await {
                Ok(result) => candidates = result,
                Err(err) => warn!(error = ?err, "dictionary query failed, scanning all blocks"),
            }
        }

        let (heights, last) = match candidates {
            Some(candidates) => (candidates.heights, candidates.last_buffered_height),
            None => {
                let last = end.min(next + batch_size - 1);
                ((next..=last).collect::<Vec<_>>(), last)
            }
        };

        let mut rewind = None;
        for chunk in heights.chunks(batch_size as usize) {
            let blocks = api
                .fetch_blocks(chunk)
                .await
                .change_context(IndexerError::Provider)?;

            for block in blocks {
                let result = worker.process_fetched_block(&block, &datasources).await;
                if !result.matches.is_empty() {
                    print_json(&result)?;
                }

                if let Some(target) = tracker
                    .process_unfinalized_block_header(Some(block.header()))
                    .await
                    .map_err(finality_error)?
                {
                    rewind = Some(target);
                    break;
                }
            }

            if rewind.is_some() {
                break;
            }
        }

        next = match rewind {
            Some(target) => {
                warn!(target, "fork detected, reindexing");
                target + 1
            }
            None => last + 1,
        };
    }
}

fn finality_error(err: Report<FinalityError>) -> Report<IndexerError> {
    let context = IndexerError::from(*err.current_context());
    err.change_context(context)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string(value)
        .change_context(IndexerError::Fatal)
        .attach_printable("failed to serialize output")?;
    println!("{json}");
    Ok(())
}
