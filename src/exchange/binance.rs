use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;

use crate::exchange::ExchangeGateway;
use crate::helpers::now_ms;
use crate::models::{
    ExchangeOrder, HistoricalPrice, Order, OrderBook, OrderRequest, OrderStatus, OrderType,
    PriceLevel, Ticker, TradeRecord,
};
use crate::{Error, Result};

const BINANCE_API_BASE: &str = "https://api.binance.com";
const EXCHANGE_NAME: &str = "BINANCE";

type HmacSha256 = Hmac<Sha256>;

// Type alias for the rate limiter to simplify signatures
type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance REST credentials and limits
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BinanceConfig {
    pub api_key: String,
    pub secret_key: String,
    pub base_url: String,
    /// Milliseconds a signed request stays valid
    pub recv_window: u64,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            base_url: BINANCE_API_BASE.to_string(),
            recv_window: 5000,
            requests_per_minute: 600, // well under the 1200 weight/min IP limit
            timeout_secs: 10,
        }
    }
}

impl fmt::Debug for BinanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinanceConfig")
            .field("api_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("recv_window", &self.recv_window)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct BinanceTicker {
    price: String,
}

#[derive(Debug, Deserialize)]
struct BinanceOrderBook {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct BinanceKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    i64,    // 8: Number of trades
    String, // 9: Taker buy base asset volume
    String, // 10: Taker buy quote asset volume
    String, // 11: Ignore
);

#[derive(Debug, Deserialize)]
struct BinanceFill {
    price: String,
    qty: String,
    commission: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceOrderResponse {
    order_id: i64,
    status: String,
    transact_time: Option<i64>,
    time: Option<i64>,
    update_time: Option<i64>,
    price: Option<String>,
    orig_qty: Option<String>,
    #[serde(default)]
    fills: Vec<BinanceFill>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceTrade {
    symbol: String,
    order_id: i64,
    price: String,
    qty: String,
    commission: String,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i64,
    msg: String,
}

/// Binance spot REST client
#[derive(Clone)]
pub struct BinanceSpot {
    config: BinanceConfig,
    client: Client,
    rate_limiter: Arc<BinanceRateLimiter>,
}

impl BinanceSpot {
    pub fn new(config: BinanceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        let rpm = NonZeroU32::new(config.requests_per_minute)
            .ok_or_else(|| Error::Config("exchange.requests_per_minute must be > 0".to_string()))?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            config,
            client,
            rate_limiter,
        })
    }

    /// HMAC-SHA256 of the query string, hex encoded
    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.secret_key.as_bytes())
            .map_err(|e| Error::Config(format!("invalid secret key: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String> {
        let mut all_params = params.to_vec();
        all_params.push(("recvWindow", self.config.recv_window.to_string()));
        all_params.push(("timestamp", now_ms().to_string()));

        let query = Self::build_query(&all_params);
        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}{}?{}",
            self.config.base_url,
            endpoint,
            Self::build_query(params)
        );
        tracing::debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        Self::handle_response(response).await
    }

    async fn signed_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}{}?{}",
            self.config.base_url,
            endpoint,
            self.signed_query(params)?
        );
        tracing::debug!("{} (signed) {}", method, endpoint);

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                tracing::error!("Failed to parse Binance response: {} - Body: {}", e, body);
                Error::Decode(e)
            });
        }

        match serde_json::from_str::<BinanceError>(&body) {
            Ok(err) => Err(Error::Venue {
                code: err.code,
                message: err.msg,
            }),
            Err(_) => Err(Error::Venue {
                code: status.as_u16() as i64,
                message: body,
            }),
        }
    }

    async fn place_order(&self, params: Vec<(&'static str, String)>) -> Result<BinanceOrderResponse> {
        self.signed_request(reqwest::Method::POST, "/api/v3/order", &params)
            .await
    }

    fn order_params(request: &OrderRequest, response_type: &str) -> Vec<(&'static str, String)> {
        let o = &request.intent;
        vec![
            ("symbol", o.symbol.clone()),
            ("newClientOrderId", request.id.clone()),
            ("side", o.side.as_str().to_string()),
            ("type", o.order_type.as_str().to_string()),
            ("quantity", o.qty.to_string()),
            ("newOrderRespType", response_type.to_string()),
        ]
    }
}

/// Map a Binance order status onto the local lifecycle
fn parse_status(status: &str) -> Result<OrderStatus> {
    match status {
        "NEW" | "PARTIALLY_FILLED" | "PENDING_NEW" => Ok(OrderStatus::New),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "PENDING_CANCEL" => Ok(OrderStatus::Canceled),
        "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
        "REJECTED" => Ok(OrderStatus::Rejected),
        other => Err(Error::InvalidInput(format!("unknown Binance order status {}", other))),
    }
}

fn parse_f64(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

fn to_exchange_order(resp: &BinanceOrderResponse) -> Result<ExchangeOrder> {
    let status = parse_status(&resp.status)?;
    let open_time = resp.transact_time.or(resp.time).unwrap_or_else(now_ms);

    let (open_price, qty, commission) = if resp.fills.is_empty() {
        (
            resp.price.as_deref().map(parse_f64).unwrap_or(0.0),
            resp.orig_qty.as_deref().map(parse_f64).unwrap_or(0.0),
            0.0,
        )
    } else {
        // Volume-weighted fill price across partial fills
        let qty: f64 = resp.fills.iter().map(|f| parse_f64(&f.qty)).sum();
        let notional: f64 = resp
            .fills
            .iter()
            .map(|f| parse_f64(&f.price) * parse_f64(&f.qty))
            .sum();
        let commission: f64 = resp.fills.iter().map(|f| parse_f64(&f.commission)).sum();
        let price = if qty > 0.0 { notional / qty } else { 0.0 };
        (price, qty, commission)
    };

    Ok(ExchangeOrder {
        ref_id: resp.order_id.to_string(),
        status,
        open_price,
        qty,
        commission,
        open_time,
        update_time: resp.update_time.unwrap_or(open_time),
    })
}

#[async_trait]
impl ExchangeGateway for BinanceSpot {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let resp: BinanceTicker = self
            .public_get("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;

        Ok(Ticker {
            exchange: EXCHANGE_NAME.to_string(),
            symbol: symbol.to_string(),
            price: parse_f64(&resp.price),
            time: now_ms(),
        })
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        let resp: BinanceOrderBook = self
            .public_get(
                "/api/v3/depth",
                &[("symbol", symbol.to_string()), ("limit", depth.to_string())],
            )
            .await?;

        let levels = |side: &[[String; 2]]| -> Vec<PriceLevel> {
            side.iter()
                .map(|[p, q]| PriceLevel {
                    price: parse_f64(p),
                    qty: parse_f64(q),
                })
                .collect()
        };

        Ok(OrderBook {
            bids: levels(&resp.bids),
            asks: levels(&resp.asks),
        })
    }

    async fn get_historical_prices(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<HistoricalPrice>> {
        let resp: Vec<BinanceKline> = self
            .public_get(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", timeframe.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        Ok(resp
            .into_iter()
            .map(|k| HistoricalPrice {
                open: parse_f64(&k.1),
                high: parse_f64(&k.2),
                low: parse_f64(&k.3),
                close: parse_f64(&k.4),
                time: k.0,
            })
            .collect())
    }

    async fn open_limit_order(&self, request: &OrderRequest) -> Result<Option<ExchangeOrder>> {
        if request.intent.order_type != OrderType::Limit {
            return Ok(None);
        }

        let mut params = Self::order_params(request, "RESULT");
        params.push(("price", request.intent.open_price.to_string()));
        params.push(("timeInForce", "GTC".to_string()));

        let resp = self.place_order(params).await?;
        let exo = to_exchange_order(&resp)?;
        if !matches!(exo.status, OrderStatus::New | OrderStatus::Filled) {
            tracing::warn!(order_id = %request.id, status = %exo.status, "Limit order not accepted");
            return Ok(None);
        }
        Ok(Some(exo))
    }

    async fn open_stop_order(&self, request: &OrderRequest) -> Result<Option<ExchangeOrder>> {
        if !request.intent.order_type.is_protective() {
            return Ok(None);
        }

        let mut params = Self::order_params(request, "RESULT");
        params.push(("price", request.intent.open_price.to_string()));
        params.push(("stopPrice", request.intent.stop_price.to_string()));
        params.push(("timeInForce", "GTC".to_string()));

        let resp = self.place_order(params).await?;
        let exo = to_exchange_order(&resp)?;
        if exo.status.is_dead() {
            tracing::warn!(order_id = %request.id, status = %exo.status, "Stop order not accepted");
            return Ok(None);
        }
        Ok(Some(exo))
    }

    async fn open_market_order(&self, request: &OrderRequest) -> Result<Option<ExchangeOrder>> {
        if request.intent.order_type != OrderType::Market {
            return Ok(None);
        }

        let params = Self::order_params(request, "FULL");
        let resp = self.place_order(params).await?;
        let exo = to_exchange_order(&resp)?;
        if exo.status.is_dead() {
            tracing::warn!(order_id = %request.id, status = %exo.status, "Market order not filled");
            return Ok(None);
        }
        Ok(Some(exo))
    }

    async fn cancel_order(&self, order: &Order) -> Result<Option<ExchangeOrder>> {
        let params = vec![
            ("symbol", order.symbol.clone()),
            ("orderId", order.ref_id.clone()),
            ("origClientOrderId", order.id.clone()),
        ];
        let resp: BinanceOrderResponse = self
            .signed_request(reqwest::Method::DELETE, "/api/v3/order", &params)
            .await?;

        let mut exo = to_exchange_order(&resp)?;
        if exo.status != OrderStatus::Canceled {
            return Ok(None);
        }
        exo.update_time = now_ms();
        Ok(Some(exo))
    }

    async fn get_order(&self, order: &Order) -> Result<Option<ExchangeOrder>> {
        let params = vec![
            ("symbol", order.symbol.clone()),
            ("orderId", order.ref_id.clone()),
        ];
        let resp: BinanceOrderResponse = self
            .signed_request(reqwest::Method::GET, "/api/v3/order", &params)
            .await?;

        Ok(Some(to_exchange_order(&resp)?))
    }

    async fn get_commission(&self, symbol: &str, ref_id: &str) -> Result<Option<f64>> {
        let trades = self.get_trade_list(symbol, 10, 0, 0).await?;
        let commission: Vec<f64> = trades
            .iter()
            .filter(|t| t.ref_id == ref_id)
            .map(|t| t.commission)
            .collect();

        if commission.is_empty() {
            return Ok(None);
        }
        Ok(Some(commission.iter().sum()))
    }

    async fn get_trade_list(
        &self,
        symbol: &str,
        limit: usize,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<TradeRecord>> {
        let limit = if limit > 0 { limit } else { 10 };
        let mut params = vec![("symbol", symbol.to_string()), ("limit", limit.to_string())];
        if start_time > 0 {
            params.push(("startTime", start_time.to_string()));
        }
        if end_time > 0 {
            params.push(("endTime", end_time.to_string()));
        }

        let resp: Vec<BinanceTrade> = self
            .signed_request(reqwest::Method::GET, "/api/v3/myTrades", &params)
            .await?;

        Ok(resp
            .into_iter()
            .map(|t| TradeRecord {
                ref_id: t.order_id.to_string(),
                symbol: t.symbol,
                price: parse_f64(&t.price),
                qty: parse_f64(&t.qty),
                commission: parse_f64(&t.commission),
                time: t.time,
            })
            .collect())
    }
}
