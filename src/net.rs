//! Online/offline detection.
//!
//! A watch channel holds the current connectivity flag; the sync engine
//! reads it before draining, and `run` mode watches it for offline→online
//! transitions. A background probe against the server's health endpoint
//! keeps the flag honest.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use url::Url;

#[derive(Clone)]
pub struct Connectivity {
  state: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self {
      state: Arc::new(tx),
    }
  }

  pub fn is_online(&self) -> bool {
    *self.state.borrow()
  }

  /// Flip the flag; transitions are logged, repeats are not.
  pub fn set_online(&self, online: bool) {
    let was = *self.state.borrow();
    if was != online {
      info!(online, "connectivity changed");
    }
    self.state.send_replace(online);
  }

  /// Receiver for transition watchers.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.state.subscribe()
  }
}

/// One probe against the server's health endpoint.
pub async fn probe_once(client: &reqwest::Client, base_url: &Url) -> bool {
  let target = base_url.join("/health").unwrap_or_else(|_| base_url.clone());
  match client.get(target).send().await {
    Ok(response) => response.status().is_success(),
    Err(_) => false,
  }
}

/// Periodically probe the server and update the flag. The first probe fires
/// immediately, so a freshly started agent settles its state right away.
pub fn spawn_probe(
  connectivity: Connectivity,
  base_url: Url,
  interval: Duration,
) -> tokio::task::JoinHandle<()> {
  let client = reqwest::Client::new();

  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    loop {
      ticker.tick().await;
      let online = probe_once(&client, &base_url).await;
      connectivity.set_online(online);
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_flag_roundtrip() {
    let connectivity = Connectivity::new(false);
    assert!(!connectivity.is_online());

    connectivity.set_online(true);
    assert!(connectivity.is_online());
  }

  #[tokio::test]
  async fn test_subscribers_see_transitions() {
    let connectivity = Connectivity::new(false);
    let mut rx = connectivity.subscribe();

    connectivity.set_online(true);

    rx.changed().await.unwrap();
    assert!(*rx.borrow());
  }
}
