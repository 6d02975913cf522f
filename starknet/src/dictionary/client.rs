use std::time::Duration;

use error_stack::{Report, Result, ResultExt};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::core::Height;

use super::{DictionaryError, DictionaryOptions, DictionaryPlan, QueryEntry};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DictionaryRequest<'a> {
    from_block: Height,
    to_block: Height,
    limit: u64,
    query_entries: &'a [QueryEntry],
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryResponse {
    /// Heights with at least one entry matching.
    pub block_heights: Vec<Height>,
    /// Last height indexed by the dictionary in the requested range.
    pub last_buffered_height: Height,
}

/// Heights to fetch, up to and including `last_buffered_height`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateHeights {
    pub heights: Vec<Height>,
    pub last_buffered_height: Height,
}

pub struct DictionaryClient {
    client: reqwest::Client,
    url: Url,
    query_size: u64,
}

impl DictionaryClient {
    pub fn new(url: Url, options: &DictionaryOptions) -> Result<Self, DictionaryError> {
        let mut headers = HeaderMap::new();
        let user_agent = format!("strata-starknet/{}", env!("CARGO_PKG_VERSION"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&user_agent)
                .change_context(DictionaryError::Configuration)
                .attach_printable("failed to build user agent header")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .change_context(DictionaryError::Configuration)
            .attach_printable("failed to build http client")?;

        Ok(Self {
            client,
            url,
            query_size: options.query_size.max(1),
        })
    }

    /// Sends the query entries to the dictionary.
    #[instrument(skip(self, entries), err(Debug))]
    pub async fn query(
        &self,
        entries: &[QueryEntry],
        from_block: Height,
        to_block: Height,
    ) -> Result<DictionaryResponse, DictionaryError> {
        let request = DictionaryRequest {
            from_block,
            to_block,
            limit: self.query_size,
            query_entries: entries,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .change_context(DictionaryError::Request)
            .attach_printable_lazy(|| format!("dictionary: {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DictionaryError::Request)
                .attach_printable_lazy(|| format!("http status: {status}"))
                .attach_printable_lazy(|| format!("dictionary: {}", self.url));
        }

        response
            .json::<DictionaryResponse>()
            .await
            .change_context(DictionaryError::Response)
    }

    /// Returns the heights that may contain data for the plan, starting at
    /// `from_block`.
    ///
    /// Returns `None` if every block must be scanned, either because of the
    /// plan or because the dictionary has not indexed the range yet.
    pub async fn candidate_heights(
        &self,
        plan: &DictionaryPlan,
        from_block: Height,
        to_block: Height,
    ) -> Result<Option<CandidateHeights>, DictionaryError> {
        let DictionaryPlan::Query {
            entries,
            block_modulos,
        } = plan
        else {
            return Ok(None);
        };

        if to_block < from_block {
            return Err(Report::new(DictionaryError::Configuration))
                .attach_printable_lazy(|| format!("invalid range: {from_block}..={to_block}"));
        }

        let to_block = to_block.min(from_block.saturating_add(self.query_size - 1));

        let (mut heights, last_buffered_height) = if entries.is_empty() {
            (Vec::new(), to_block)
        } else {
            let response = self.query(entries, from_block, to_block).await?;
            if response.last_buffered_height < from_block {
                warn!(
                    from_block,
                    last_buffered_height = response.last_buffered_height,
                    "dictionary is behind, scanning all blocks"
                );
                return Ok(None);
            }

            let last = response.last_buffered_height.min(to_block);
            let heights = response
                .block_heights
                .into_iter()
                .filter(|height| (from_block..=last).contains(height))
                .collect();
            (heights, last)
        };

        for modulo in block_modulos {
            heights.extend(modulo_heights(*modulo, from_block, last_buffered_height));
        }

        heights.sort_unstable();
        heights.dedup();

        debug!(
            from_block,
            last_buffered_height,
            candidates = heights.len(),
            "dictionary candidate heights"
        );

        Ok(Some(CandidateHeights {
            heights,
            last_buffered_height,
        }))
    }
}

/// Multiples of `modulo` in `from..=to`.
fn modulo_heights(modulo: u64, from: Height, to: Height) -> impl Iterator<Item = Height> {
    let modulo = modulo.max(1);
    let first = match from % modulo {
        0 => from,
        rem => from.saturating_add(modulo - rem),
    };
    (first..=to).step_by(modulo as usize)
}
