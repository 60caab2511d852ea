//! HTTP broker client against a mock bridge: field mapping, query params,
//! and error classification.

use std::time::Duration;

use ata_broker::{BrokerApi, BrokerError, HttpBroker, OrderRequest};
use ata_schemas::{OrderType, TradeDirection};
use httpmock::prelude::*;

fn broker_for(server: &MockServer) -> HttpBroker {
    HttpBroker::new(&server.base_url(), Duration::from_secs(2)).expect("client")
}

#[tokio::test]
async fn account_fields_map_through() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/account");
        then.status(200).json_body(serde_json::json!({
            "net_liquidation": 100000.0,
            "buying_power": 200000.0,
            "currency": "USD"
        }));
    });

    let account = broker_for(&server).account().await.unwrap();
    mock.assert();
    assert_eq!(account.net_liquidation, 100_000.0);
    assert_eq!(account.buying_power, 200_000.0);
    assert_eq!(account.currency, "USD");
}

#[tokio::test]
async fn submit_order_posts_contract_fields() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/orders")
            .json_body(serde_json::json!({
                "symbol": "AAPL",
                "action": "BUY",
                "quantity": 133,
                "order_type": "LMT",
                "limit_price": 150.0
            }));
        then.status(200).json_body(serde_json::json!({
            "order_id": "ib-42",
            "status": "submitted"
        }));
    });

    let ack = broker_for(&server)
        .submit_order(&OrderRequest {
            symbol: "AAPL".to_string(),
            action: TradeDirection::Buy,
            quantity: 133,
            order_type: OrderType::Lmt,
            limit_price: Some(150.0),
        })
        .await
        .unwrap();

    mock.assert();
    assert_eq!(ack.order_id, "ib-42");
}

#[tokio::test]
async fn quote_timestamp_becomes_event_ts() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/quotes/AAPL");
        then.status(200).json_body(serde_json::json!({
            "symbol": "AAPL",
            "price": 150.25,
            "bid": 150.20,
            "ask": 150.30,
            "bid_size": 300,
            "ask_size": 200,
            "volume": 1000000,
            "timestamp": "2024-06-03T14:30:00Z",
            "exchange": "SMART"
        }));
    });

    let quote = broker_for(&server).quote("AAPL").await.unwrap();
    assert_eq!(quote.price, 150.25);
    assert_eq!(quote.event_ts.to_rfc3339(), "2024-06-03T14:30:00+00:00");
    assert_eq!(quote.exchange.as_deref(), Some("SMART"));
}

#[tokio::test]
async fn candles_carry_limit_and_timeframe_query() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/candles/SPY")
            .query_param("limit", "250")
            .query_param("timeframe", "1D");
        then.status(200).json_body(serde_json::json!([
            {"timestamp": "2024-06-03T00:00:00Z", "open": 100.0, "high": 105.0,
             "low": 99.0, "close": 103.0, "volume": 500},
            {"timestamp": "2024-06-04T00:00:00Z", "open": 103.0, "high": 106.0,
             "low": 102.0, "close": 104.0, "volume": 600}
        ]));
    });

    let candles = broker_for(&server).candles("SPY", 250, "1D").await.unwrap();
    mock.assert();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].symbol, "SPY");
    assert_eq!(candles[1].close, 104.0);
}

#[tokio::test]
async fn api_errors_carry_status_and_body() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/account");
        then.status(503).body("bridge restarting");
    });

    let err = broker_for(&server).account().await.unwrap_err();
    match &err {
        BrokerError::Api { status, message } => {
            assert_eq!(*status, 503);
            assert_eq!(message, "bridge restarting");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    assert!(err.is_retriable());
}

#[tokio::test]
async fn malformed_payload_is_a_decode_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/account");
        then.status(200).body("not json");
    });

    let err = broker_for(&server).account().await.unwrap_err();
    assert!(matches!(err, BrokerError::Decode(_)));
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn connection_refused_is_transport() {
    // Port 1 is never listening.
    let broker = HttpBroker::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
    let err = broker.account().await.unwrap_err();
    assert!(matches!(err, BrokerError::Transport(_)));
    assert!(err.is_retriable());
}
