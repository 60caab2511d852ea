//! HTTP broker bridge client.
//!
//! Endpoints consumed (JSON):
//! - `GET  /health`
//! - `GET  /account`
//! - `GET  /positions`
//! - `POST /orders`
//! - `GET  /orders/{order_id}`
//! - `GET  /quotes/{symbol}`
//! - `GET  /candles/{symbol}?limit=&timeframe=`

use std::time::Duration;

use async_trait::async_trait;
use ata_schemas::{Candle, Quote};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    BrokerAccount, BrokerApi, BrokerError, BrokerOrderStatus, BrokerPosition, OrderAck,
    OrderRequest,
};

pub struct HttpBroker {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBroker {
    /// Build a client with a per-call deadline. Fails only when the TLS/
    /// connector stack cannot initialize.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T, BrokerError> {
        let resp = resp.map_err(|e| BrokerError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrokerError::Api {
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Wire DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct QuoteDto {
    symbol: String,
    price: f64,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    bid_size: Option<i64>,
    #[serde(default)]
    ask_size: Option<i64>,
    #[serde(default)]
    volume: Option<i64>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    exchange: Option<String>,
}

impl QuoteDto {
    fn into_quote(self) -> Quote {
        Quote {
            symbol: self.symbol,
            price: self.price,
            bid: self.bid,
            ask: self.ask,
            bid_size: self.bid_size,
            ask_size: self.ask_size,
            volume: self.volume,
            event_ts: self.timestamp,
            exchange: self.exchange,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CandleDto {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: i64,
}

impl CandleDto {
    fn into_candle(self, symbol: &str) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            ts: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

// ---------------------------------------------------------------------------
// BrokerApi impl
// ---------------------------------------------------------------------------

#[async_trait]
impl BrokerApi for HttpBroker {
    async fn health(&self) -> Result<(), BrokerError> {
        let resp = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Api {
                status: resp.status().as_u16(),
                message: "health check failed".to_string(),
            });
        }
        Ok(())
    }

    async fn account(&self) -> Result<BrokerAccount, BrokerError> {
        Self::decode(self.client.get(self.url("/account")).send().await).await
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Self::decode(self.client.get(self.url("/positions")).send().await).await
    }

    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderAck, BrokerError> {
        Self::decode(self.client.post(self.url("/orders")).json(req).send().await).await
    }

    async fn order_status(&self, order_id: &str) -> Result<BrokerOrderStatus, BrokerError> {
        Self::decode(
            self.client
                .get(self.url(&format!("/orders/{order_id}")))
                .send()
                .await,
        )
        .await
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        let dto: QuoteDto = Self::decode(
            self.client
                .get(self.url(&format!("/quotes/{symbol}")))
                .send()
                .await,
        )
        .await?;
        Ok(dto.into_quote())
    }

    async fn candles(
        &self,
        symbol: &str,
        limit: u32,
        timeframe: &str,
    ) -> Result<Vec<Candle>, BrokerError> {
        let dtos: Vec<CandleDto> = Self::decode(
            self.client
                .get(self.url(&format!("/candles/{symbol}")))
                .query(&[("limit", limit.to_string()), ("timeframe", timeframe.to_string())])
                .send()
                .await,
        )
        .await?;
        Ok(dtos.into_iter().map(|d| d.into_candle(symbol)).collect())
    }
}
