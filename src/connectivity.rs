//! Connectivity oracle: is the device online right now?

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::config::ConnectivityConfig;

/// Raw network signals reported by an oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkState {
  /// A network interface with a usable route exists
  pub attached: bool,
  /// The internet answered a reachability check
  pub internet_reachable: bool,
}

impl NetworkState {
  pub fn is_online(&self) -> bool {
    self.attached && self.internet_reachable
  }
}

/// Source of connectivity information.
#[async_trait]
pub trait Connectivity: Send + Sync {
  /// Query the current network state. Never cached.
  async fn network_state(&self) -> Result<NetworkState>;

  /// True only if both signals are up. Any fault counts as offline.
  async fn is_online(&self) -> bool {
    match self.network_state().await {
      Ok(state) => state.is_online(),
      Err(e) => {
        tracing::warn!(error = %e, "connectivity check failed, assuming offline");
        false
      }
    }
  }
}

/// Oracle whose answer is set by hand (`--offline`, tests).
#[derive(Debug)]
pub struct ManualConnectivity {
  online: AtomicBool,
}

impl ManualConnectivity {
  pub fn new(online: bool) -> Self {
    Self {
      online: AtomicBool::new(online),
    }
  }

  #[cfg(test)]
  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

#[async_trait]
impl Connectivity for ManualConnectivity {
  async fn network_state(&self) -> Result<NetworkState> {
    let online = self.online.load(Ordering::SeqCst);
    Ok(NetworkState {
      attached: online,
      internet_reachable: online,
    })
  }
}

/// Address used only to ask the OS for a route; no packet is sent.
const ROUTE_PROBE_ADDR: &str = "1.1.1.1:53";

/// Oracle that checks for a route and then fetches a reachability URL.
pub struct ProbeConnectivity {
  client: reqwest::Client,
  check_url: String,
  timeout: Duration,
}

impl ProbeConnectivity {
  pub fn new(config: &ConnectivityConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create connectivity client: {}", e))?;

    Ok(Self {
      client,
      check_url: config.check_url.clone(),
      timeout: Duration::from_secs(config.timeout_secs),
    })
  }

  async fn has_route(&self) -> bool {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
      Ok(socket) => socket,
      Err(_) => return false,
    };
    socket.connect(ROUTE_PROBE_ADDR).await.is_ok()
  }

  async fn internet_reachable(&self) -> bool {
    match self
      .client
      .get(&self.check_url)
      .timeout(self.timeout)
      .send()
      .await
    {
      Ok(resp) => !resp.status().is_server_error(),
      Err(e) => {
        tracing::debug!(url = %self.check_url, error = %e, "reachability check failed");
        false
      }
    }
  }
}

#[async_trait]
impl Connectivity for ProbeConnectivity {
  async fn network_state(&self) -> Result<NetworkState> {
    let attached = self.has_route().await;
    // No point fetching anything without a route
    let internet_reachable = attached && self.internet_reachable().await;

    Ok(NetworkState {
      attached,
      internet_reachable,
    })
  }
}
