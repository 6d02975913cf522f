use serde::{Deserialize, Serialize};

use crate::{block::Log, core::Felt};

use super::{address_eq, MatchOptions, TopicMatching};

/// Topic value matching any non empty topic.
pub const NOT_NULL_FILTER: &str = "!null";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LogFilter {
    /// Event names or hex topics. `null` entries match anything.
    #[serde(default)]
    pub topics: Vec<Option<String>>,
}

impl LogFilter {
    /// Non null topics.
    pub fn topic_values(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().filter_map(|topic| topic.as_deref())
    }
}

pub fn matches_log(
    log: &Log,
    filter: &LogFilter,
    address: Option<&str>,
    options: &MatchOptions,
) -> bool {
    if let Some(address) = address {
        if !address_eq(address, &log.address) {
            return false;
        }
    }

    match options.topic_matching {
        TopicMatching::Permissive => matches_topics_any(log, filter),
        TopicMatching::Positional => matches_topics_positional(log, filter),
    }
}

fn matches_topics_any(log: &Log, filter: &LogFilter) -> bool {
    let mut topics = filter.topic_values().peekable();
    if topics.peek().is_none() {
        return true;
    }

    topics.any(|topic| {
        if topic == NOT_NULL_FILTER {
            return !log.topics.is_empty();
        }
        let expected = Felt::from_name_or_hex(topic);
        log.topics.contains(&expected)
    })
}

fn matches_topics_positional(log: &Log, filter: &LogFilter) -> bool {
    for (i, topic) in filter.topics.iter().take(4).enumerate() {
        let Some(topic) = topic else {
            continue;
        };

        let Some(log_topic) = log.topics.get(i) else {
            return false;
        };

        if topic == NOT_NULL_FILTER {
            return true;
        }

        if Felt::from_name_or_hex(topic) != *log_topic {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::{matches_log, LogFilter};
    use crate::{
        block::Log,
        core::{encode_selector, Felt},
        filter::{MatchOptions, TopicMatching},
    };

    fn log(topics: Vec<Felt>) -> Log {
        Log {
            index: 0,
            address: Felt::from(0xabc),
            topics,
            data: vec![],
            transaction_hash: Felt::from(1),
            transaction_index: Some(0),
            block_height: 1,
            block_hash: Felt::from(2),
        }
    }

    fn filter(topics: &[Option<&str>]) -> LogFilter {
        LogFilter {
            topics: topics.iter().map(|t| t.map(str::to_string)).collect(),
        }
    }

    fn positional() -> MatchOptions {
        MatchOptions {
            topic_matching: TopicMatching::Positional,
            ..MatchOptions::default()
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let options = MatchOptions::default();
        assert!(matches_log(&log(vec![]), &LogFilter::default(), None, &options));
        assert!(matches_log(&log(vec![Felt::from(1)]), &filter(&[]), None, &options));
        assert!(matches_log(&log(vec![]), &filter(&[None]), None, &positional()));
    }

    #[test]
    fn test_address_is_normalized() {
        let options = MatchOptions::default();
        let log = log(vec![]);
        assert!(matches_log(&log, &LogFilter::default(), Some("0x0000abc"), &options));
        assert!(matches_log(&log, &LogFilter::default(), Some("0xABC"), &options));
        assert!(!matches_log(&log, &LogFilter::default(), Some("0xabd"), &options));
        assert!(!matches_log(&log, &LogFilter::default(), Some("not an address"), &options));
    }

    #[test]
    fn test_permissive_topics_match_any_position() {
        let options = MatchOptions::default();
        let transfer = encode_selector("Transfer");
        let log = log(vec![transfer, Felt::from(5)]);

        assert!(matches_log(&log, &filter(&[Some("Transfer")]), None, &options));
        assert!(matches_log(&log, &filter(&[Some(&transfer.to_hex())]), None, &options));
        // second position only.
        assert!(matches_log(&log, &filter(&[None, Some("0x5")]), None, &options));
        assert!(matches_log(&log, &filter(&[Some("0x5")]), None, &options));
        assert!(!matches_log(&log, &filter(&[Some("Approval")]), None, &options));
    }

    #[test]
    fn test_positional_topics() {
        let transfer = encode_selector("Transfer");
        let log = log(vec![transfer, Felt::from(5)]);
        let options = positional();

        assert!(matches_log(&log, &filter(&[Some("Transfer"), Some("0x5")]), None, &options));
        assert!(!matches_log(&log, &filter(&[Some("0x5")]), None, &options));
        assert!(matches_log(&log, &filter(&[None, Some("0x5")]), None, &options));
        assert!(matches_log(&log, &filter(&[Some("!null")]), None, &options));
        // log has no third topic.
        assert!(!matches_log(&log, &filter(&[None, None, Some("0x1")]), None, &options));
    }
}
