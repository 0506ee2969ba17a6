//! Warehouse API client for the remote order store

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::{ItemId, RequestId};
use crate::remote::{
    Actor, ItemQuantities, ItemStatus, OrderAmendment, OrderStore, RemoteLineItem,
};

/// HTTP implementation of [`OrderStore`] against the warehouse API
#[derive(Clone)]
pub struct HttpOrderStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpOrderStore {
    /// Create a client for the given API base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            client: reqwest::Client::builder().build()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl OrderStore for HttpOrderStore {
    async fn fetch_items(&self, request_id: &RequestId) -> Result<Vec<RemoteLineItem>> {
        let response = self
            .client
            .get(self.url(&format!("/api/requests/{request_id}/items")))
            .header("Accept", "application/json")
            .send()
            .await?;

        let response = ensure_success(response, request_id).await?;
        Ok(response.json::<Vec<RemoteLineItem>>().await?)
    }

    async fn record_pull(
        &self,
        item_id: &ItemId,
        pulled_qty: u32,
        status: ItemStatus,
        actor: &Actor,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.url("/api/item-pulls"))
            .json(&json!({
                "item_id": item_id,
                "qty_pulled": pulled_qty,
                "item_status": status.as_str(),
                "pulled_by": actor.as_str(),
            }))
            .send()
            .await?;

        ensure_success_unit(response).await
    }

    async fn fetch_quantities(&self, request_id: &RequestId) -> Result<Vec<ItemQuantities>> {
        let response = self
            .client
            .get(self.url(&format!("/api/requests/{request_id}/quantities")))
            .header("Accept", "application/json")
            .send()
            .await?;

        let response = ensure_success(response, request_id).await?;
        Ok(response.json::<Vec<ItemQuantities>>().await?)
    }

    async fn complete_pull(
        &self,
        request_id: &RequestId,
        has_shortages: bool,
        actor: &Actor,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/requests/{request_id}/complete")))
            .json(&json!({
                "has_shortages": has_shortages,
                "pulled_by": actor.as_str(),
            }))
            .send()
            .await?;

        ensure_success_unit(response).await
    }

    async fn amend_order_total(
        &self,
        request_id: &RequestId,
        amendment: &OrderAmendment,
        actor: &Actor,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/requests/{request_id}/amend-total")))
            .json(&json!({
                "item_id": amendment.item_id,
                "new_item_qty": amendment.new_item_qty,
                "delta": amendment.delta,
                "amended_by": actor.as_str(),
            }))
            .send()
            .await?;

        ensure_success_unit(response).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

async fn ensure_success(
    response: reqwest::Response,
    request_id: &RequestId,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(Error::NotFound(format!("request {request_id}")));
    }
    Err(Error::RemoteWrite(parse_api_error(status, &body)))
}

async fn ensure_success_unit(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::RemoteWrite(parse_api_error(status, &body)))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("API base URL must not be empty".into()));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(Error::Validation(
            "API base URL must include http:// or https://".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("warehouse.example.com".to_string()).is_err());
    }

    #[test]
    fn normalize_base_url_strips_trailing_slash() {
        let url = normalize_base_url("https://warehouse.example.com/".to_string()).unwrap();
        assert_eq!(url, "https://warehouse.example.com");
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        let body = r#"{"message": "item not updatable", "error": "ignored"}"#;
        let parsed = parse_api_error(StatusCode::CONFLICT, body);
        assert_eq!(parsed, "item not updatable (409)");
    }

    #[test]
    fn parse_api_error_falls_back_to_raw_body() {
        let parsed = parse_api_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(parsed, "upstream down (502)");

        let empty = parse_api_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(empty, "HTTP 502");
    }
}
