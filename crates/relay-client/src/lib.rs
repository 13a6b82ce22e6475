//! HTTP clients for the relay account directory and message server.

mod account;
mod error;
mod service;
mod types;

pub use account::AccountServiceClient;
pub use error::RelayClientError;
pub use service::SignalServiceClient;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account_client(mock_server: &MockServer) -> AccountServiceClient {
        AccountServiceClient::new(mock_server.uri(), Some("test-token".into())).unwrap()
    }

    #[tokio::test]
    async fn test_get_account() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/provision/account"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "userId": "5c1b6a4e-0000-4000-8000-000000000001",
                "devices": [{"id": 1, "name": "laptop"}],
                "serverUrl": "https://textsecure.example.com"
            })))
            .mount(&mock_server)
            .await;

        let account = assert_ok!(account_client(&mock_server).get_account().await);

        assert_eq!(account.user_id, "5c1b6a4e-0000-4000-8000-000000000001");
        assert!(account.has_devices());
        assert_eq!(account.device_count(), 1);
        assert_eq!(account.server_url, "https://textsecure.example.com");
    }

    #[tokio::test]
    async fn test_get_account_without_devices() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/provision/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "userId": "user-1",
                "serverUrl": "https://textsecure.example.com"
            })))
            .mount(&mock_server)
            .await;

        let account = assert_ok!(account_client(&mock_server).get_account().await);
        assert!(!account.has_devices());
    }

    #[tokio::test]
    async fn test_get_account_with_null_devices() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/provision/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "userId": "user-1",
                "devices": null,
                "serverUrl": "https://textsecure.example.com"
            })))
            .mount(&mock_server)
            .await;

        let account = assert_ok!(account_client(&mock_server).get_account().await);
        assert!(!account.has_devices());
        assert_eq!(account.device_count(), 0);
    }

    #[tokio::test]
    async fn test_get_account_with_empty_devices() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/provision/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "userId": "user-1",
                "devices": [],
                "serverUrl": "https://textsecure.example.com"
            })))
            .mount(&mock_server)
            .await;

        let account = assert_ok!(account_client(&mock_server).get_account().await);
        assert!(!account.has_devices());
    }

    #[tokio::test]
    async fn test_get_account_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/provision/account"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&mock_server)
            .await;

        let err = assert_err!(account_client(&mock_server).get_account().await);

        assert_eq!(err.status(), Some(401));
        assert!(matches!(
            err,
            RelayClientError::Api { status: 401, ref body } if body == "bad token"
        ));
    }

    #[test]
    fn test_account_client_base_url() {
        let client = assert_ok!(AccountServiceClient::new("https://dir.example.com/", None));
        assert_eq!(client.base_url(), "https://dir.example.com");
    }

    #[tokio::test]
    async fn test_request_provisioning_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/provision/request"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&mock_server)
            .await;

        let err = assert_err!(
            account_client(&mock_server)
                .request_provisioning("link-uuid", "cHVia2V5")
                .await
        );
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_provision_account() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/v1/provision/account"))
            .and(body_partial_json(serde_json::json!({
                "supportsSms": false,
                "fetchesMessages": true,
                "name": "bot",
                "registrationId": 42
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "userId": "user-1",
                "deviceId": 1,
                "serverUrl": "https://textsecure.example.com"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = ProvisionAccountRequest {
            signaling_key: "c2lnbmFs".into(),
            supports_sms: false,
            fetches_messages: true,
            registration_id: 42,
            name: "bot".into(),
            password: "secret".into(),
        };
        let account = assert_ok!(account_client(&mock_server).provision_account(&request).await);

        assert_eq!(account.user_id, "user-1");
        assert_eq!(account.device_id, 1);
    }

    #[tokio::test]
    async fn test_request_provisioning() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/provision/request"))
            .and(body_partial_json(serde_json::json!({
                "uuid": "link-uuid",
                "key": "cHVia2V5"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        assert_ok!(
            account_client(&mock_server)
                .request_provisioning("link-uuid", "cHVia2V5")
                .await
        );
    }

    #[tokio::test]
    async fn test_register_device() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/v1/devices/123456"))
            .and(header_exists("authorization"))
            .and(body_partial_json(serde_json::json!({
                "supportsSms": false,
                "fetchesMessages": true,
                "name": "worker"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"deviceId": 2})),
            )
            .mount(&mock_server)
            .await;

        let client = SignalServiceClient::new(mock_server.uri()).unwrap();
        let request = DeviceRegistrationRequest {
            signaling_key: "c2lnbmFs".into(),
            supports_sms: false,
            fetches_messages: true,
            registration_id: 7,
            name: "worker".into(),
        };
        let device_id = client
            .register_device("123456", "user-1", "secret", &request)
            .await
            .unwrap();

        assert_eq!(device_id, 2);
    }

    #[tokio::test]
    async fn test_register_device_rejects_non_integer_device_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/v1/devices/123456"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"deviceId": "two"})),
            )
            .mount(&mock_server)
            .await;

        let client = SignalServiceClient::new(mock_server.uri()).unwrap();
        let request = DeviceRegistrationRequest {
            signaling_key: "c2lnbmFs".into(),
            supports_sms: false,
            fetches_messages: true,
            registration_id: 7,
            name: "worker".into(),
        };
        let err = assert_err!(
            client
                .register_device("123456", "user-1", "secret", &request)
                .await
        );

        assert!(matches!(err, RelayClientError::InvalidResponse(_)));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_register_keys_requires_credentials() {
        let client = SignalServiceClient::new("http://localhost:9999").unwrap();
        let upload = PreKeyUpload {
            identity_key: "aWQ=".into(),
            signed_pre_key: SignedPreKeyEntity {
                key_id: 1,
                public_key: "cGs=".into(),
                signature: "c2ln".into(),
            },
            pre_keys: vec![],
        };

        let err = assert_err!(client.register_keys(&upload).await);
        assert!(matches!(err, RelayClientError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_register_keys() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/v2/keys"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = SignalServiceClient::new(mock_server.uri())
            .unwrap()
            .with_credentials("user-1.2", "secret");
        let upload = PreKeyUpload {
            identity_key: "aWQ=".into(),
            signed_pre_key: SignedPreKeyEntity {
                key_id: 1,
                public_key: "cGs=".into(),
                signature: "c2ln".into(),
            },
            pre_keys: vec![PreKeyEntity {
                key_id: 1,
                public_key: "cGs=".into(),
            }],
        };

        assert_eq!(client.username(), Some("user-1.2"));
        assert_ok!(client.register_keys(&upload).await);
    }

    #[test]
    fn test_provisioning_socket_url() {
        let client = SignalServiceClient::new("https://textsecure.example.com/").unwrap();
        assert_eq!(
            client.provisioning_socket_url(),
            "wss://textsecure.example.com/v1/websocket/provisioning/"
        );

        let client = SignalServiceClient::new("http://localhost:8080").unwrap();
        assert_eq!(
            client.provisioning_socket_url(),
            "ws://localhost:8080/v1/websocket/provisioning/"
        );
    }
}
