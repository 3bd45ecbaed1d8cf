//! HTTP client for the backend's method and resource endpoints.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{
  CreatedCustomer, RemoteService, CREATE_CUSTOMER, GET_PRICE_LIST_CURRENCY, PROCESS_POS_PAYMENT,
  SUBMIT_INVOICE, UPDATE_INVOICE,
};
use crate::error::{OfflineError, RemoteError, Result};

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct MethodEnvelope<T> {
  message: T,
}

#[derive(Deserialize)]
struct ResourceEnvelope<T> {
  data: T,
}

/// Backend client speaking `POST /api/method/<method>` and
/// `GET /api/resource/<doctype>/<name>`.
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base: Url,
}

impl HttpRemote {
  /// Build a client for `base_url`. With credentials every request carries
  /// `Authorization: token <key>:<secret>`.
  pub fn new(base_url: &str, credentials: Option<(&str, &str)>, timeout: Duration) -> Result<Self> {
    let base = Url::parse(base_url)
      .map_err(|e| OfflineError::Validation(format!("invalid remote url {base_url}: {e}")))?;

    let mut headers = HeaderMap::new();
    if let Some((key, secret)) = credentials {
      let value = HeaderValue::from_str(&format!("token {key}:{secret}"))
        .map_err(|e| OfflineError::Validation(format!("invalid api credentials: {e}")))?;
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(timeout)
      .build()
      .map_err(RemoteError::from)?;

    Ok(Self { client, base })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| RemoteError::Http(format!("{} cannot be a base url", self.base)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(RemoteError::Status {
        status: status.as_u16(),
        body,
      });
    }
    response.json::<T>().await.map_err(|e| RemoteError::Decode(e.to_string()))
  }

  /// Call a whitelisted method and unwrap its `message`.
  async fn call<T: DeserializeOwned>(&self, method: &str, args: &Value) -> Result<T, RemoteError> {
    let url = self.endpoint(&["api", "method", method])?;
    debug!(%method, "calling remote method");

    let response = self.client.post(url).json(args).send().await?;
    let envelope: MethodEnvelope<T> = Self::decode(response).await?;
    Ok(envelope.message)
  }
}

#[async_trait]
impl RemoteService for HttpRemote {
  async fn submit_invoice(&self, invoice: &Value, data: &Value) -> Result<Value, RemoteError> {
    self
      .call(SUBMIT_INVOICE, &json!({"invoice": invoice, "data": data}))
      .await
  }

  async fn update_invoice(&self, data: &Value) -> Result<Value, RemoteError> {
    self.call(UPDATE_INVOICE, &json!({"data": data})).await
  }

  async fn create_customer(&self, args: &Value) -> Result<CreatedCustomer, RemoteError> {
    self.call(CREATE_CUSTOMER, args).await
  }

  async fn process_pos_payment(&self, args: &Value) -> Result<Value, RemoteError> {
    self.call(PROCESS_POS_PAYMENT, args).await
  }

  async fn get_price_list_currency(&self, price_list: &str) -> Result<String, RemoteError> {
    self
      .call(GET_PRICE_LIST_CURRENCY, &json!({"price_list": price_list}))
      .await
  }

  async fn get_doc(&self, doctype: &str, name: &str) -> Result<Value, RemoteError> {
    let url = self.endpoint(&["api", "resource", doctype, name])?;
    debug!(%doctype, %name, "fetching remote record");

    let response = self.client.get(url).send().await?;
    let envelope: ResourceEnvelope<Value> = Self::decode(response).await?;
    Ok(envelope.data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_endpoints_are_built_under_the_base_path() {
    let remote = HttpRemote::new("https://pos.example.com/", None, DEFAULT_REMOTE_TIMEOUT).unwrap();
    assert_eq!(
      remote.endpoint(&["api", "method", SUBMIT_INVOICE]).unwrap().as_str(),
      "https://pos.example.com/api/method/posawesome.posawesome.api.invoices.submit_invoice"
    );

    let nested = HttpRemote::new("https://example.com/erp", None, DEFAULT_REMOTE_TIMEOUT).unwrap();
    assert_eq!(
      nested
        .endpoint(&["api", "resource", "Sales Taxes and Charges Template", "VAT 15%"])
        .unwrap()
        .as_str(),
      "https://example.com/erp/api/resource/Sales%20Taxes%20and%20Charges%20Template/VAT%2015%25"
    );
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    assert!(matches!(
      HttpRemote::new("not a url", None, DEFAULT_REMOTE_TIMEOUT),
      Err(OfflineError::Validation(_))
    ));
  }

  #[test]
  fn test_credentials_must_be_header_safe() {
    assert!(HttpRemote::new(
      "https://pos.example.com",
      Some(("key", "se\ncret")),
      DEFAULT_REMOTE_TIMEOUT
    )
    .is_err());
    assert!(HttpRemote::new(
      "https://pos.example.com",
      Some(("key", "secret")),
      DEFAULT_REMOTE_TIMEOUT
    )
    .is_ok());
  }
}
