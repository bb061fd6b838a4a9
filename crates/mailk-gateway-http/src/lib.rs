//! mailk-gateway-http
//!
//! Live [`FulfillmentAdapter`] over the provider's REST API:
//!
//! | Call   | Request                          |
//! |--------|----------------------------------|
//! | create | `POST   {base}/orders` multipart |
//! | fetch  | `GET    {base}/orders/{id}`      |
//! | cancel | `DELETE {base}/orders/{id}`      |
//!
//! Requests carry `Authorization: Bearer <api key>` when a key is configured;
//! create also carries `Idempotency-Key` so a retried create after a lost
//! response returns the original order.
//!
//! The client is blocking. The runtime calls it from `spawn_blocking`
//! threads only.

mod wire;

use std::time::Duration;

use mailk_execution::{
    FulfillmentAdapter, GatewayError, GatewayInvokeToken, GatewayResult, OrderPayload,
    OrderRecord,
};
use reqwest::blocking::{multipart, Client, RequestBuilder};
use tracing::debug;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Clone)]
pub struct HttpGatewayConfig {
    /// Provider API root, without trailing slash (`https://api.example.com/v1`).
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for HttpGatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGatewayConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<REDACTED>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct HttpFulfillment {
    // Option so Drop can move the client out.
    client: Option<Client>,
    base_url: String,
    api_key: Option<String>,
}

impl HttpFulfillment {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let timeout = config.timeout;
        let client = outside_async(move || Client::builder().timeout(timeout).build())
            .map_err(|e| GatewayError::Transport(format!("client build: {e}")))?;
        Ok(Self {
            client: Some(client),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client(&self) -> GatewayResult<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| GatewayError::Transport("client already shut down".to_string()))
    }

    fn order_url(&self, order_id: &str) -> String {
        format!("{}/orders/{}", self.base_url, order_id)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Send and return `(status, body)` for 2xx, or the classified error.
    fn send(&self, req: RequestBuilder, order_id: Option<&str>) -> GatewayResult<(u16, String)> {
        let resp = self
            .authorize(req)
            .send()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|e| GatewayError::Transport(format!("reading body: {e}")))?;
        if !(200..300).contains(&status) {
            return Err(wire::classify(status, body, order_id));
        }
        Ok((status, body))
    }
}

fn order_form(payload: &OrderPayload) -> GatewayResult<multipart::Form> {
    let mut form = multipart::Form::new();
    for (name, value) in payload.form_fields() {
        form = form.text(name, value);
    }
    if let Some(path) = &payload.file_path {
        form = form
            .file("file", path)
            .map_err(|e| GatewayError::Transport(format!("reading {path}: {e}")))?;
    }
    Ok(form)
}

impl FulfillmentAdapter for HttpFulfillment {
    fn create_order(
        &self,
        payload: &OrderPayload,
        idempotency_key: &str,
        _token: &GatewayInvokeToken,
    ) -> GatewayResult<OrderRecord> {
        let url = format!("{}/orders", self.base_url);
        let req = self
            .client()?
            .post(&url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .multipart(order_form(payload)?);
        let (status, body) = self.send(req, None)?;
        let order = wire::decode_order(status, &body)?;
        debug!(order_id = %order.order_id, "provider accepted order");
        Ok(order)
    }

    fn get_order(&self, order_id: &str, _token: &GatewayInvokeToken) -> GatewayResult<OrderRecord> {
        let req = self.client()?.get(self.order_url(order_id));
        let (status, body) = self.send(req, Some(order_id))?;
        wire::decode_order(status, &body)
    }

    fn cancel_order(&self, order_id: &str, _token: &GatewayInvokeToken) -> GatewayResult<()> {
        let req = self.client()?.delete(self.order_url(order_id));
        let (status, body) = self.send(req, Some(order_id))?;
        wire::decode_ack(status, &body)
    }
}

impl Drop for HttpFulfillment {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            outside_async(move || drop(client));
        }
    }
}

/// The blocking client owns a private runtime; building or dropping it on
/// an async worker thread panics. Run `f` via `block_in_place` there.
fn outside_async<T>(f: impl FnOnce() -> T) -> T {
    use tokio::runtime::{Handle, RuntimeFlavor};
    match Handle::try_current() {
        Ok(h) if h.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
