//! Common test utilities for integration tests.

use relay_client::AccountServiceClient;
use relay_provisioning::transport::{Keepalive, RelayPeer};
use relay_provisioning::{MemoryBacking, MemoryConnector, Provisioner, ProvisionerSettings, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const USER_ID: &str = "5c1b6a4e-0000-4000-8000-000000000001";

pub struct Harness {
    pub account_server: MockServer,
    pub signal_server: MockServer,
    pub backing: Arc<MemoryBacking>,
    pub provisioner: Provisioner,
    pub peers: mpsc::UnboundedReceiver<(String, RelayPeer)>,
}

impl Harness {
    pub async fn start() -> Self {
        let account_server = MockServer::start().await;
        let signal_server = MockServer::start().await;
        let backing = Arc::new(MemoryBacking::new());
        let (connector, peers) = MemoryConnector::new();

        let settings = ProvisionerSettings {
            account_url: account_server.uri(),
            account_token: Some("test-token".into()),
            keepalive: Keepalive {
                interval: Duration::ZERO,
                ..Keepalive::default()
            },
            pre_key_count: 5,
        };
        let provisioner = Provisioner::new(
            Storage::new(backing.clone()),
            Arc::new(connector),
            settings,
        );

        Self {
            account_server,
            signal_server,
            backing,
            provisioner,
            peers,
        }
    }

    pub fn account_client(&self) -> AccountServiceClient {
        AccountServiceClient::new(self.account_server.uri(), Some("test-token".into())).unwrap()
    }

    /// Serve `GET /v1/provision/account` with the given device list.
    pub async fn mount_account(&self, devices: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/v1/provision/account"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "userId": USER_ID,
                "devices": devices,
                "serverUrl": self.signal_server.uri(),
            })))
            .mount(&self.account_server)
            .await;
    }

    /// The relay side of the most recent connection.
    pub async fn next_peer(&mut self) -> (String, RelayPeer) {
        tokio::time::timeout(Duration::from_secs(5), self.peers.recv())
            .await
            .expect("no connection within timeout")
            .expect("connector dropped")
    }
}

/// Wait until `server` has seen a request matching `verb` and `route`.
pub async fn wait_for_request(server: &MockServer, verb: &str, route: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let seen = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .any(|r| r.method.to_string() == verb && r.url.path() == route);
        if seen {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} {} never arrived",
            verb,
            route
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
