//! Binance USDⓈ-M futures REST client.
//!
//! Signed requests carry all parameters in the query string plus an HMAC
//! SHA256 `signature` and a `timestamp`; the API key travels in the
//! `X-MBX-APIKEY` header. Wallet/transfer/snapshot endpoints live on the
//! spot (SAPI) host, trading endpoints on the futures host.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::models::*;
use crate::ports::ExchangeRest;
use crate::{endpoints, rate_limit, ConnectorError, Result};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Signed REST client for Binance futures + SAPI.
pub struct BinanceRest {
    client: Client,
    api_key: String,
    api_secret: String,
    futures_base: String,
    spot_base: String,
    last_used_weight: AtomicU32,
}

impl BinanceRest {
    /// Production client.
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self::with_bases(
            api_key,
            api_secret,
            endpoints::PROD_FUTURES_REST,
            endpoints::PROD_SPOT_REST,
        )
    }

    /// Testnet client.
    pub fn testnet(api_key: String, api_secret: String) -> Self {
        Self::with_bases(
            api_key,
            api_secret,
            endpoints::TEST_FUTURES_REST,
            endpoints::TEST_SPOT_REST,
        )
    }

    fn with_bases(api_key: String, api_secret: String, futures_base: &str, spot_base: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");

        Self {
            client,
            api_key,
            api_secret,
            futures_base: futures_base.to_string(),
            spot_base: spot_base.to_string(),
            last_used_weight: AtomicU32::new(0),
        }
    }

    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ConnectorError::Signature(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, mut params: Vec<(&str, String)>) -> Result<String> {
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        params.push(("recvWindow", "5000".to_string()));

        let query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let signature = self.sign(&query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        base: &str,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T> {
        let query = self.signed_query(params)?;
        let url = format!("{base}{path}?{query}");

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        self.decode(response).await
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        self.record_weight(&response);

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 418 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            warn!(retry_after_secs, "Rate limited by exchange");
            return Err(ConnectorError::RateLimited { retry_after_secs });
        }

        let body = response.text().await?;
        if !status.is_success() {
            // Error bodies are {"code": -1121, "msg": "Invalid symbol."}
            if let Ok(err) = serde_json::from_str::<serde_json::Value>(&body) {
                if let (Some(code), Some(msg)) = (
                    err.get("code").and_then(|c| c.as_i64()),
                    err.get("msg").and_then(|m| m.as_str()),
                ) {
                    return Err(ConnectorError::Api {
                        code,
                        msg: msg.to_string(),
                    });
                }
            }
            return Err(ConnectorError::Http(format!("HTTP {status}: {body}")));
        }

        serde_json::from_str(&body).map_err(|e| ConnectorError::Parse(format!("{e}: {body}")))
    }

    fn record_weight(&self, response: &Response) {
        if let Some(weight) = response
            .headers()
            .get("x-mbx-used-weight-1m")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
        {
            self.last_used_weight.store(weight, Ordering::Relaxed);
            if weight >= rate_limit::WEIGHT_WARN {
                warn!(weight, "Request weight nearing limit");
            }
        }
    }
}

#[async_trait]
impl ExchangeRest for BinanceRest {
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<OrderAck> {
        let mut params = vec![
            ("symbol", request.symbol.clone()),
            ("side", request.side.clone()),
            ("type", request.order_type.clone()),
            ("quantity", request.quantity.to_string()),
            ("newClientOrderId", request.client_order_id.clone()),
            ("positionSide", request.position_side.clone()),
        ];
        if let Some(price) = request.price {
            params.push(("price", price.to_string()));
            params.push(("timeInForce", request.time_in_force.clone()));
        }
        if request.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        debug!(
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            client_order_id = %request.client_order_id,
            "Placing order"
        );

        self.signed_request(Method::POST, &self.futures_base, "/fapi/v1/order", params)
            .await
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        order_id: Option<i64>,
        client_order_id: Option<&str>,
    ) -> Result<OrderAck> {
        let mut params = vec![("symbol", symbol.to_string())];
        match (order_id, client_order_id) {
            (Some(id), _) => params.push(("orderId", id.to_string())),
            (None, Some(cid)) => params.push(("origClientOrderId", cid.to_string())),
            (None, None) => {
                return Err(ConnectorError::Api {
                    code: -1102,
                    msg: "orderId or origClientOrderId required".into(),
                })
            }
        }

        self.signed_request(Method::DELETE, &self.futures_base, "/fapi/v1/order", params)
            .await
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        let _: serde_json::Value = self
            .signed_request(
                Method::DELETE,
                &self.futures_base,
                "/fapi/v1/allOpenOrders",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let _: serde_json::Value = self
            .signed_request(
                Method::POST,
                &self.futures_base,
                "/fapi/v1/leverage",
                vec![
                    ("symbol", symbol.to_string()),
                    ("leverage", leverage.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrderInfo>> {
        let mut params = Vec::new();
        if let Some(symbol) = symbol {
            params.push(("symbol", symbol.to_string()));
        }
        self.signed_request(Method::GET, &self.futures_base, "/fapi/v1/openOrders", params)
            .await
    }

    async fn futures_balances(&self) -> Result<Vec<FuturesBalance>> {
        self.signed_request(Method::GET, &self.futures_base, "/fapi/v2/balance", Vec::new())
            .await
    }

    async fn spot_balances(&self) -> Result<Vec<SpotBalance>> {
        #[derive(serde::Deserialize)]
        struct SpotAccount {
            balances: Vec<SpotBalance>,
        }

        let account: SpotAccount = self
            .signed_request(Method::GET, &self.spot_base, "/api/v3/account", Vec::new())
            .await?;

        Ok(account
            .balances
            .into_iter()
            .filter(|b| b.free + b.locked > Decimal::ZERO)
            .collect())
    }

    async fn position_risk(&self, symbol: Option<&str>) -> Result<Vec<PositionRisk>> {
        let mut params = Vec::new();
        if let Some(symbol) = symbol {
            params.push(("symbol", symbol.to_string()));
        }
        self.signed_request(Method::GET, &self.futures_base, "/fapi/v2/positionRisk", params)
            .await
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        // Public endpoint, no signature
        let url = format!(
            "{}/fapi/v1/klines?symbol={symbol}&interval={interval}&limit={limit}",
            self.futures_base
        );
        let response = self.client.get(&url).send().await?;
        let rows: Vec<serde_json::Value> = self.decode(response).await?;
        rows.iter().map(Kline::from_row).collect()
    }

    async fn ticker_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}/fapi/v1/ticker/price?symbol={symbol}", self.futures_base);
        let response = self.client.get(&url).send().await?;
        let ticker: TickerPrice = self.decode(response).await?;
        Ok(ticker.price)
    }

    async fn income_history(
        &self,
        start_time_ms: i64,
        end_time_ms: i64,
        limit: u32,
    ) -> Result<Vec<IncomeRecord>> {
        self.signed_request(
            Method::GET,
            &self.futures_base,
            "/fapi/v1/income",
            vec![
                ("startTime", start_time_ms.to_string()),
                ("endTime", end_time_ms.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn transfer_history(
        &self,
        direction: &str,
        start_time_ms: i64,
        end_time_ms: i64,
        page: u32,
        page_size: u32,
    ) -> Result<TransferPage> {
        self.signed_request(
            Method::GET,
            &self.spot_base,
            "/sapi/v1/asset/transfer",
            vec![
                ("type", direction.to_string()),
                ("startTime", start_time_ms.to_string()),
                ("endTime", end_time_ms.to_string()),
                ("current", page.to_string()),
                ("size", page_size.to_string()),
            ],
        )
        .await
    }

    async fn convert_history(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<ConvertRecord>> {
        let page: ConvertPage = self
            .signed_request(
                Method::GET,
                &self.spot_base,
                "/sapi/v1/convert/tradeFlow",
                vec![
                    ("startTime", start_time_ms.to_string()),
                    ("endTime", end_time_ms.to_string()),
                ],
            )
            .await?;
        Ok(page.list)
    }

    async fn deposit_history(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<DepositRecord>> {
        self.signed_request(
            Method::GET,
            &self.spot_base,
            "/sapi/v1/capital/deposit/hisrec",
            vec![
                ("startTime", start_time_ms.to_string()),
                ("endTime", end_time_ms.to_string()),
            ],
        )
        .await
    }

    async fn withdraw_history(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<WithdrawRecord>> {
        self.signed_request(
            Method::GET,
            &self.spot_base,
            "/sapi/v1/capital/withdraw/history",
            vec![
                ("startTime", start_time_ms.to_string()),
                ("endTime", end_time_ms.to_string()),
            ],
        )
        .await
    }

    async fn dust_log(&self, start_time_ms: i64, end_time_ms: i64) -> Result<Vec<DustRecord>> {
        let log: DustLog = self
            .signed_request(
                Method::GET,
                &self.spot_base,
                "/sapi/v1/asset/dribblet",
                vec![
                    ("startTime", start_time_ms.to_string()),
                    ("endTime", end_time_ms.to_string()),
                ],
            )
            .await?;

        Ok(log
            .user_asset_dribblets
            .into_iter()
            .flat_map(|d| d.user_asset_dribblet_details)
            .collect())
    }

    async fn account_snapshot(
        &self,
        account_type: &str,
        start_time_ms: i64,
        end_time_ms: i64,
        limit: u32,
    ) -> Result<AccountSnapshot> {
        self.signed_request(
            Method::GET,
            &self.spot_base,
            "/sapi/v1/accountSnapshot",
            vec![
                ("type", account_type.to_string()),
                ("startTime", start_time_ms.to_string()),
                ("endTime", end_time_ms.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn create_listen_key(&self) -> Result<String> {
        // listenKey endpoints take the API key header only, no signature
        let url = format!("{}/fapi/v1/listenKey", self.futures_base);
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let key: ListenKeyResponse = self.decode(response).await?;
        Ok(key.listen_key)
    }

    async fn keepalive_listen_key(&self, _listen_key: &str) -> Result<()> {
        let url = format!("{}/fapi/v1/listenKey", self.futures_base);
        let response = self
            .client
            .put(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let _: serde_json::Value = self.decode(response).await?;
        Ok(())
    }

    fn used_weight(&self) -> Option<u32> {
        match self.last_used_weight.load(Ordering::Relaxed) {
            0 => None,
            weight => Some(weight),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_known_vector() {
        // Example vector from the Binance API documentation
        let client = BinanceRest::new(
            "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A".into(),
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j".into(),
        );

        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let signature = client.sign(query).unwrap();
        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn signed_query_appends_timestamp_and_signature() {
        let client = BinanceRest::testnet("key".into(), "secret".into());
        let query = client
            .signed_query(vec![("symbol", "XRPUSDT".to_string())])
            .unwrap();

        assert!(query.starts_with("symbol=XRPUSDT&timestamp="));
        assert!(query.contains("&recvWindow=5000"));
        assert!(query.contains("&signature="));
    }

    #[test]
    fn testnet_uses_demo_hosts() {
        let client = BinanceRest::testnet("key".into(), "secret".into());
        assert_eq!(client.futures_base, endpoints::TEST_FUTURES_REST);
        assert_eq!(client.spot_base, endpoints::TEST_SPOT_REST);
        assert!(client.used_weight().is_none());
    }
}
