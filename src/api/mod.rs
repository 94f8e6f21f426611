pub mod cloudinary;
pub mod tautulli;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{redirect, Client, ClientBuilder};

pub const USER_AGENT: &str = concat!("newzlettr/", env!("CARGO_PKG_VERSION"));

/// HTTP clients used to talk to the statistics server.
///
/// `manual` never follows redirects so the caller can inspect the first
/// response; `follow` uses reqwest's default policy for the single follow-up
/// request. Both accept self-signed certificates, which is how most Tautulli
/// installs ship.
#[derive(Clone, Debug)]
pub struct Transport {
    pub manual: Client,
    pub follow: Client,
    pub timeout: Duration,
    pinned: Arc<Mutex<HashMap<(String, SocketAddr), (Client, Client)>>>,
}

impl Transport {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            manual: base_builder(timeout)
                .redirect(redirect::Policy::none())
                .build()?,
            follow: base_builder(timeout).build()?,
            timeout,
            pinned: Arc::default(),
        })
    }

    /// Same clients, but with DNS for `host` pinned to `addr`. Used to present
    /// a different TLS server name than the one in the configured URL.
    /// Clients are built once per `(host, addr)` and shared afterwards.
    pub fn pinned(&self, host: &str, addr: SocketAddr) -> reqwest::Result<Self> {
        let mut cache = self.pinned.lock().unwrap_or_else(|e| e.into_inner());
        let key = (host.to_string(), addr);
        let (manual, follow) = match cache.get(&key) {
            Some(clients) => clients.clone(),
            None => {
                let clients = (
                    base_builder(self.timeout)
                        .redirect(redirect::Policy::none())
                        .resolve(host, addr)
                        .build()?,
                    base_builder(self.timeout).resolve(host, addr).build()?,
                );
                tracing::debug!(host, %addr, "built pinned tautulli clients");
                cache.insert(key, clients.clone());
                clients
            }
        };
        Ok(Self {
            manual,
            follow,
            timeout: self.timeout,
            pinned: Arc::clone(&self.pinned),
        })
    }

    /// Number of distinct pinned routes built so far.
    pub fn pinned_routes(&self) -> usize {
        self.pinned.lock().map(|c| c.len()).unwrap_or_else(|e| e.into_inner().len())
    }
}

fn base_builder(timeout: Duration) -> ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .danger_accept_invalid_certs(true)
}
