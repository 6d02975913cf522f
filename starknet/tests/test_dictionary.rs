use std::collections::BTreeMap;

use assert_matches::assert_matches;
use serde_json::json;
use strata_starknet::{
    core::{encode_selector, Height},
    datasource::{Datasource, Handler, HandlerKind},
    dictionary::{plan, DictionaryClient, DictionaryError, DictionaryOptions, DictionaryPlan},
    filter::{BlockFilter, LogFilter},
};
use url::Url;
use wiremock::{
    matchers::{body_partial_json, method},
    Mock, MockServer, ResponseTemplate,
};

fn block_handler(modulo: Option<u64>) -> Handler {
    Handler {
        handler: "handleBlock".to_string(),
        kind: HandlerKind::Block {
            filter: BlockFilter {
                modulo,
                timestamp: None,
            },
        },
    }
}

fn transfer_handler() -> Handler {
    Handler {
        handler: "handleTransfer".to_string(),
        kind: HandlerKind::Event {
            filter: LogFilter {
                topics: vec![Some("Transfer".to_string())],
            },
        },
    }
}

fn datasource(handlers: Vec<Handler>) -> Datasource {
    Datasource {
        kind: "starknet/Runtime".to_string(),
        address: Some("0x7".to_string()),
        abi: None,
        assets: BTreeMap::new(),
        handlers,
    }
}

fn client(server: &MockServer, options: &DictionaryOptions) -> DictionaryClient {
    let url = Url::parse(&server.uri()).unwrap();
    DictionaryClient::new(url, options).unwrap()
}

#[tokio::test]
async fn test_candidate_heights_merge_block_modulos() {
    let server = MockServer::start().await;
    let options = DictionaryOptions::default();
    let datasources = vec![datasource(vec![
        transfer_handler(),
        block_handler(Some(10)),
    ])];
    let plan = plan(&datasources, &options);
    assert!(!plan.is_full_scan());

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "fromBlock": 100,
            "toBlock": 200,
            "limit": 10000,
            "queryEntries": [{
                "entity": "logs",
                "conditions": [
                    { "field": "address", "matcher": "equalTo", "value": "0x7" },
                    { "field": "topics", "matcher": "contains", "value": encode_selector("Transfer").to_hex() }
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "blockHeights": [99, 105, 150, 250],
            "lastBufferedHeight": 180
        })))
        .expect(1)
        .mount(&server)
        .await;

    let candidates = client(&server, &options)
        .candidate_heights(&plan, 100, 200)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(candidates.last_buffered_height, 180);
    assert_eq!(
        candidates.heights,
        vec![100, 105, 110, 120, 130, 140, 150, 160, 170, 180]
    );
}

#[tokio::test]
async fn test_range_is_capped_to_query_size() {
    let server = MockServer::start().await;
    let options = DictionaryOptions {
        query_size: 10,
        ..DictionaryOptions::default()
    };
    let plan = plan(&[datasource(vec![transfer_handler()])], &options);

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "fromBlock": 100, "toBlock": 109, "limit": 10 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "blockHeights": [103],
            "lastBufferedHeight": 109
        })))
        .expect(1)
        .mount(&server)
        .await;

    let candidates = client(&server, &options)
        .candidate_heights(&plan, 100, 5000)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(candidates.heights, vec![103]);
    assert_eq!(candidates.last_buffered_height, 109);
}

#[tokio::test]
async fn test_dictionary_behind_means_full_scan() {
    let server = MockServer::start().await;
    let options = DictionaryOptions::default();
    let plan = plan(&[datasource(vec![transfer_handler()])], &options);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "blockHeights": [],
            "lastBufferedHeight": 50
        })))
        .mount(&server)
        .await;

    let candidates = client(&server, &options)
        .candidate_heights(&plan, 100, 200)
        .await
        .unwrap();
    assert_eq!(candidates, None);
}

#[tokio::test]
async fn test_full_scan_plan_skips_the_dictionary() {
    let server = MockServer::start().await;
    let options = DictionaryOptions::default();
    let plan = plan(
        &[datasource(vec![transfer_handler(), block_handler(None)])],
        &options,
    );
    assert_matches!(plan, DictionaryPlan::FullScan);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let candidates = client(&server, &options)
        .candidate_heights(&plan, 100, 200)
        .await
        .unwrap();
    assert_eq!(candidates, None);
}

#[tokio::test]
async fn test_modulo_only_plan_needs_no_request() {
    let server = MockServer::start().await;
    let options = DictionaryOptions::default();
    let plan = plan(&[datasource(vec![block_handler(Some(25))])], &options);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let candidates = client(&server, &options)
        .candidate_heights(&plan, 10, 100)
        .await
        .unwrap()
        .unwrap();
    let expected: Vec<Height> = vec![25, 50, 75, 100];
    assert_eq!(candidates.heights, expected);
    assert_eq!(candidates.last_buffered_height, 100);
}

#[tokio::test]
async fn test_http_error_is_request_error() {
    let server = MockServer::start().await;
    let options = DictionaryOptions::default();
    let plan = plan(&[datasource(vec![transfer_handler()])], &options);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client(&server, &options)
        .candidate_heights(&plan, 100, 200)
        .await
        .unwrap_err();
    assert_matches!(err.current_context(), DictionaryError::Request);
    assert!(format!("{err:?}").contains("500"));
}

#[tokio::test]
async fn test_invalid_body_is_response_error() {
    let server = MockServer::start().await;
    let options = DictionaryOptions::default();
    let plan = plan(&[datasource(vec![transfer_handler()])], &options);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client(&server, &options)
        .candidate_heights(&plan, 100, 200)
        .await
        .unwrap_err();
    assert_matches!(err.current_context(), DictionaryError::Response);
}

#[tokio::test]
async fn test_reversed_range_is_rejected() {
    let server = MockServer::start().await;
    let options = DictionaryOptions::default();
    let plan = plan(&[datasource(vec![transfer_handler()])], &options);

    let err = client(&server, &options)
        .candidate_heights(&plan, 200, 100)
        .await
        .unwrap_err();
    assert_matches!(err.current_context(), DictionaryError::Configuration);
}
