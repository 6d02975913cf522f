use serde::{Deserialize, Serialize};

use crate::block::NormalizedBlock;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockFilter {
    /// Only blocks with height multiple of this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulo: Option<u64>,
    /// Only blocks with timestamp (in seconds) at or after this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

pub fn matches_block(block: &NormalizedBlock, filter: &BlockFilter) -> bool {
    if let Some(modulo) = filter.modulo.filter(|m| *m > 0) {
        if block.height() % modulo != 0 {
            return false;
        }
    }

    if let Some(timestamp) = filter.timestamp {
        if timestamp > block.timestamp {
            return false;
        }
    }

    true
}
