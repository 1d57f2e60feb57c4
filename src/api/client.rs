use color_eyre::{eyre::eyre, Result};
use reqwest::{Response, StatusCode};
use rust_decimal::Decimal;
use std::time::Duration;
use url::Url;

use super::types::{BalanceResponse, SyncRequest, SyncResponse};
use crate::config::ServerConfig;
use crate::error::{WalletError, WalletResult};
use crate::wallet::round4;

const HEALTH_PATH: &str = "api/health";
const SYNC_PATH: &str = "api/users/wallet/sync";
const LEGACY_SYNC_PATH: &str = "api/transactions";
const BALANCE_PATH: &str = "api/users/wallet/balance";
const LEGACY_BALANCE_PATH: &str = "api/wallet/balance";

/// Wallet backend client
#[derive(Clone)]
pub struct WalletApi {
  client: reqwest::Client,
  base_url: Url,
  health_timeout: Duration,
  submit_timeout: Duration,
  balance_timeout: Duration,
}

impl WalletApi {
  pub fn new(config: &ServerConfig) -> Result<Self> {
    let mut base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid server base_url {}: {}", config.base_url, e))?;

    // Keep any path prefix when joining relative endpoint paths
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .user_agent(concat!("fare-wallet/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      health_timeout: config.health_timeout(),
      submit_timeout: config.submit_timeout(),
      balance_timeout: config.balance_timeout(),
    })
  }

  fn endpoint(&self, path: &str) -> WalletResult<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| WalletError::NetworkUnreachable(format!("bad endpoint {}: {}", path, e)))
  }

  /// Probe the health endpoint. Any status below 500 counts as reachable.
  pub async fn health(&self, token: Option<&str>) -> bool {
    let url = match self.endpoint(HEALTH_PATH) {
      Ok(url) => url,
      Err(_) => return false,
    };

    let mut request = self.client.get(url).timeout(self.health_timeout);
    if let Some(token) = token {
      request = request.bearer_auth(token);
    }

    match request.send().await {
      Ok(resp) => {
        let reachable = !resp.status().is_server_error();
        tracing::debug!(status = %resp.status(), reachable, "health probe");
        reachable
      }
      Err(e) => {
        tracing::debug!(error = %e, "health probe failed");
        false
      }
    }
  }

  /// Submit a transaction, retrying once on the legacy route if the primary
  /// route does not exist.
  pub async fn submit_transaction(
    &self,
    token: &str,
    request: &SyncRequest,
  ) -> WalletResult<SyncResponse> {
    match self.post_sync(SYNC_PATH, token, request).await {
      Err(WalletError::EndpointNotFound(path)) => {
        tracing::info!(path = %path, "sync endpoint missing, trying legacy route");
        self.post_sync(LEGACY_SYNC_PATH, token, request).await
      }
      other => other,
    }
  }

  async fn post_sync(
    &self,
    path: &str,
    token: &str,
    request: &SyncRequest,
  ) -> WalletResult<SyncResponse> {
    let resp = self
      .client
      .post(self.endpoint(path)?)
      .bearer_auth(token)
      .timeout(self.submit_timeout)
      .json(request)
      .send()
      .await?;

    let resp = check_status(resp, path)?;
    let body: SyncResponse = resp
      .json()
      .await
      .map_err(|e| WalletError::RemoteRejected(format!("{}: unreadable response: {}", path, e)))?;

    if !body.success {
      return Err(WalletError::RemoteRejected(format!(
        "{}: {}",
        path,
        body.message.as_deref().unwrap_or("success=false")
      )));
    }

    Ok(body)
  }

  /// Fetch the authoritative balance, falling back to the legacy route on any
  /// failure of the primary one.
  pub async fn fetch_balance(&self, token: &str) -> WalletResult<Decimal> {
    match self.get_balance(BALANCE_PATH, token).await {
      Ok(balance) => Ok(balance),
      Err(e) => {
        tracing::debug!(error = %e, "primary balance endpoint failed, trying legacy route");
        self.get_balance(LEGACY_BALANCE_PATH, token).await
      }
    }
  }

  async fn get_balance(&self, path: &str, token: &str) -> WalletResult<Decimal> {
    let resp = self
      .client
      .get(self.endpoint(path)?)
      .bearer_auth(token)
      .timeout(self.balance_timeout)
      .send()
      .await?;

    let resp = check_status(resp, path)?;
    let body: BalanceResponse = resp
      .json()
      .await
      .map_err(|e| WalletError::RemoteRejected(format!("{}: unreadable balance: {}", path, e)))?;

    Ok(round4(body.balance))
  }
}

/// Map HTTP status to the error taxonomy.
fn check_status(resp: Response, path: &str) -> WalletResult<Response> {
  let status = resp.status();
  if status == StatusCode::NOT_FOUND {
    return Err(WalletError::EndpointNotFound(path.to_string()));
  }
  if !status.is_success() {
    return Err(WalletError::RemoteRejected(format!(
      "{} returned {}",
      path, status
    )));
  }
  Ok(resp)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use mockito::Matcher;
  use std::str::FromStr;

  fn api(base_url: String) -> WalletApi {
    WalletApi::new(&ServerConfig {
      base_url,
      ..ServerConfig::default()
    })
    .unwrap()
  }

  fn request() -> SyncRequest {
    SyncRequest {
      kind: "transfer".to_string(),
      amount: Decimal::from(30),
      description: "x".to_string(),
      date: Utc::now(),
    }
  }

  #[tokio::test]
  async fn test_health_accepts_client_errors() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/health")
      .with_status(401)
      .create_async()
      .await;

    assert!(api(server.url()).health(None).await);
  }

  #[tokio::test]
  async fn test_health_rejects_server_errors() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/health")
      .with_status(502)
      .create_async()
      .await;

    assert!(!api(server.url()).health(Some("t")).await);
  }

  #[tokio::test]
  async fn test_health_unreachable_host() {
    // Port 9 (discard) on localhost is almost never listening
    assert!(!api("http://127.0.0.1:9".to_string()).health(None).await);
  }

  #[tokio::test]
  async fn test_submit_sends_bearer_and_body() {
    let mut server = mockito::Server::new_async().await;
    let sync = server
      .mock("POST", "/api/users/wallet/sync")
      .match_header("authorization", "Bearer secret")
      .match_body(Matcher::PartialJson(serde_json::json!({
        "type": "transfer",
        "amount": 30.0,
        "description": "x",
      })))
      .with_status(200)
      .with_body(r#"{"success": true, "newBalance": 70}"#)
      .create_async()
      .await;

    let resp = api(server.url())
      .submit_transaction("secret", &request())
      .await
      .unwrap();

    assert!(resp.success);
    assert_eq!(resp.new_balance, Some(Decimal::from(70)));
    sync.assert_async().await;
  }

  #[tokio::test]
  async fn test_submit_falls_back_on_404() {
    let mut server = mockito::Server::new_async().await;
    let primary = server
      .mock("POST", "/api/users/wallet/sync")
      .with_status(404)
      .expect(1)
      .create_async()
      .await;
    let legacy = server
      .mock("POST", "/api/transactions")
      .with_status(201)
      .with_body(r#"{"success": true}"#)
      .expect(1)
      .create_async()
      .await;

    api(server.url())
      .submit_transaction("t", &request())
      .await
      .unwrap();

    primary.assert_async().await;
    legacy.assert_async().await;
  }

  #[tokio::test]
  async fn test_submit_no_fallback_on_server_error() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/api/users/wallet/sync")
      .with_status(500)
      .create_async()
      .await;
    let legacy = server
      .mock("POST", "/api/transactions")
      .expect(0)
      .create_async()
      .await;

    let err = api(server.url())
      .submit_transaction("t", &request())
      .await
      .unwrap_err();

    assert!(matches!(err, WalletError::RemoteRejected(_)));
    legacy.assert_async().await;
  }

  #[tokio::test]
  async fn test_submit_success_false_is_rejection() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/api/users/wallet/sync")
      .with_status(200)
      .with_body(r#"{"success": false, "message": "duplicate"}"#)
      .create_async()
      .await;

    let err = api(server.url())
      .submit_transaction("t", &request())
      .await
      .unwrap_err();

    assert!(err.to_string().contains("duplicate"));
  }

  #[tokio::test]
  async fn test_balance_falls_back_to_legacy() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/api/users/wallet/balance")
      .with_status(500)
      .create_async()
      .await;
    server
      .mock("GET", "/api/wallet/balance")
      .with_status(200)
      .with_body(r#"{"balance": "12.34567"}"#)
      .create_async()
      .await;

    let balance = api(server.url()).fetch_balance("t").await.unwrap();
    assert_eq!(balance, Decimal::from_str("12.3457").unwrap());
  }

  #[tokio::test]
  async fn test_base_url_path_prefix_is_kept() {
    let mut server = mockito::Server::new_async().await;
    let health = server
      .mock("GET", "/v2/api/health")
      .with_status(200)
      .create_async()
      .await;

    assert!(api(format!("{}/v2", server.url())).health(None).await);
    health.assert_async().await;
  }
}
