//! Command line arguments shared by the binary subcommands.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Args;
use error_stack::{Report, ResultExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::{
    datasource::{Datasource, Handler},
    dictionary::{DictionaryClient, DictionaryOptions},
    error::{IndexerError, Result},
    filter::{ToPrecedence, TopicMatching},
    finality::{ForkCheckMode, FinalizedLocatorOptions, UnfinalizedOptions},
    provider::{
        ApiOptions, ApiService, ConnectionPool, JsonRpcProvider, JsonRpcProviderOptions,
        ProviderError,
    },
};

#[derive(Debug, Args, Clone)]
pub struct RpcArgs {
    /// Starknet json-rpc url. Repeat the flag to use multiple endpoints.
    #[arg(long, env, required = true, value_delimiter = ',')]
    pub rpc_url: Vec<String>,
    /// Timeout of each request, in seconds.
    #[arg(long, env, default_value = "30")]
    pub rpc_timeout_sec: u64,
    /// Rate limit of each endpoint, in requests per second.
    #[arg(long, env, default_value = "1000")]
    pub rpc_rate_limit: u32,
    /// Extra request header, formatted as `key:value`.
    #[arg(long, env, value_delimiter = ',')]
    pub rpc_header: Vec<String>,
    /// Number of blocks fetched concurrently.
    #[arg(long, env, default_value = "10")]
    pub batch_size: usize,
    /// Page size used when fetching events.
    #[arg(long, env, default_value = "1000")]
    pub event_chunk_size: u64,
}

#[derive(Debug, Args, Clone)]
pub struct FinalityArgs {
    /// Blocks to rewind when a fork can't be traced back to a known block.
    /// Zero makes such forks fatal.
    #[arg(long, env, default_value = "1000")]
    pub block_fork_reindex: u64,
    /// Distance between sampled heights when looking for the first finalized block.
    #[arg(long, env, default_value = "1000")]
    pub finality_stride: u64,
    /// Distance from the head used as finalized block on chains without finality.
    #[arg(long, env, default_value = "200")]
    pub finality_fallback_depth: u64,
    /// Lowest block of the chain.
    #[arg(long, env, default_value = "0")]
    pub genesis_height: u64,
    /// How forks are detected.
    #[arg(long, env, value_enum, default_value_t = ForkCheckMode::Finalized)]
    pub fork_check_mode: ForkCheckMode,
}

#[derive(Debug, Args, Clone)]
pub struct DictionaryArgs {
    /// Url of the dictionary. If not set, every block is scanned.
    #[arg(long, env)]
    pub dictionary_url: Option<String>,
    /// Max number of blocks requested to the dictionary at once.
    #[arg(long, env, default_value = "10000")]
    pub dictionary_query_size: u64,
    /// Address lists longer than this are not sent to the dictionary.
    #[arg(long, env, default_value = "100")]
    pub query_address_limit: usize,
    /// How log topics are compared.
    #[arg(long, env, value_enum, default_value_t = TopicMatching::Permissive)]
    pub topic_matching: TopicMatching,
    /// Which address wins when a transaction filter `to` and the datasource address are both set.
    #[arg(long, env, value_enum, default_value_t = ToPrecedence::Filter)]
    pub to_precedence: ToPrecedence,
}

impl RpcArgs {
    pub fn to_provider_options(&self) -> Result<JsonRpcProviderOptions> {
        let mut headers = HeaderMap::new();
        for header in &self.rpc_header {
            let (name, value) = parse_header(header)?;
            headers.insert(name, value);
        }

        Ok(JsonRpcProviderOptions {
            timeout: Duration::from_secs(self.rpc_timeout_sec),
            headers,
            rate_limit: self.rpc_rate_limit,
        })
    }

    pub fn to_api_options(&self, finality: &FinalityArgs) -> ApiOptions {
        ApiOptions {
            batch_size: self.batch_size,
            event_chunk_size: self.event_chunk_size,
            finality_fallback_depth: finality.finality_fallback_depth,
        }
    }

    /// Connects to all endpoints.
    pub async fn to_connection_pool(&self) -> Result<ConnectionPool<JsonRpcProvider>> {
        let options = self.to_provider_options()?;

        let mut endpoints = Vec::with_capacity(self.rpc_url.len());
        for rpc_url in &self.rpc_url {
            let url = Url::parse(rpc_url)
                .change_context(IndexerError::Configuration)
                .attach_printable("failed to parse rpc url")?;

            // The query string can contain api keys, keep it out of the logs.
            let mut endpoint = url.clone();
            endpoint.set_query(None);

            let provider = JsonRpcProvider::new(url, options.clone())
                .change_context(IndexerError::Configuration)
                .attach_printable_lazy(|| format!("endpoint: {endpoint}"))?;
            endpoints.push((endpoint.to_string(), provider));
        }

        ConnectionPool::new(endpoints)
            .await
            .map_err(|err| {
                let context = match err.current_context() {
                    ProviderError::Configuration => IndexerError::Configuration,
                    _ => IndexerError::Provider,
                };
                err.change_context(context)
            })
            .attach_printable("failed to connect to rpc endpoints")
    }

    pub async fn to_api_service(
        &self,
        finality: &FinalityArgs,
    ) -> Result<ApiService<JsonRpcProvider>> {
        let pool = self.to_connection_pool().await?;
        info!(endpoints = pool.len(), "connection pool ready");
        Ok(ApiService::new(
            pool,
            self.to_api_options(finality),
            finality.to_locator_options(),
        ))
    }
}

impl FinalityArgs {
    pub fn to_unfinalized_options(&self) -> UnfinalizedOptions {
        UnfinalizedOptions {
            block_fork_reindex: self.block_fork_reindex,
            mode: self.fork_check_mode,
        }
    }

    pub fn to_locator_options(&self) -> FinalizedLocatorOptions {
        FinalizedLocatorOptions {
            stride: self.finality_stride,
            genesis_height: self.genesis_height,
        }
    }
}

impl DictionaryArgs {
    pub fn to_dictionary_options(&self) -> Result<DictionaryOptions> {
        let url = self
            .dictionary_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .change_context(IndexerError::Configuration)
            .attach_printable("failed to parse dictionary url")?;

        Ok(DictionaryOptions {
            url,
            query_size: self.dictionary_query_size,
            query_address_limit: self.query_address_limit,
            topic_matching: self.topic_matching,
            to_precedence: self.to_precedence,
        })
    }

    /// Returns the dictionary client, if a dictionary is configured.
    pub fn to_dictionary_client(&self) -> Result<Option<DictionaryClient>> {
        let options = self.to_dictionary_options()?;
        let Some(url) = options.url.clone() else {
            return Ok(None);
        };

        DictionaryClient::new(url, &options)
            .change_context(IndexerError::Configuration)
            .map(Some)
    }
}

fn parse_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let Some((name, value)) = header.split_once(':') else {
        return Err(Report::new(IndexerError::Configuration))
            .attach_printable_lazy(|| format!("invalid header, expected key:value: {header}"));
    };

    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .change_context(IndexerError::Configuration)
        .attach_printable_lazy(|| format!("invalid header name: {name}"))?;
    let value = HeaderValue::from_str(value.trim())
        .change_context(IndexerError::Configuration)
        .attach_printable_lazy(|| format!("invalid header value for {name}"))?;

    Ok((name, value))
}

/// Datasource as written in the datasources file, assets point to files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasourceManifest {
    kind: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    abi: Option<String>,
    #[serde(default)]
    assets: BTreeMap<String, AssetFile>,
    #[serde(default)]
    handlers: Vec<Handler>,
}

#[derive(Debug, Deserialize)]
struct AssetFile {
    file: PathBuf,
}

/// Loads the datasources from a json file.
///
/// Asset paths are relative to the file.
pub async fn load_datasources(path: &Path) -> Result<Vec<Datasource>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .change_context(IndexerError::Configuration)
        .attach_printable_lazy(|| format!("failed to read datasources file: {}", path.display()))?;

    let manifests: Vec<DatasourceManifest> = serde_json::from_str(&contents)
        .change_context(IndexerError::Configuration)
        .attach_printable_lazy(|| format!("invalid datasources file: {}", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut datasources = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        let mut assets = BTreeMap::new();
        for (name, asset) in manifest.assets {
            let asset_path = base.join(&asset.file);
            let contents = tokio::fs::read_to_string(&asset_path)
                .await
                .change_context(IndexerError::Configuration)
                .attach_printable_lazy(|| {
                    format!("failed to read asset {name}: {}", asset_path.display())
                })?;
            assets.insert(name, contents);
        }

        datasources.push(Datasource {
            kind: manifest.kind,
            address: manifest.address,
            abi: manifest.abi,
            assets,
            handlers: manifest.handlers,
        });
    }

    Ok(datasources)
}
