//! `ZeppClient` against a mock server: request shapes and response handling
//! for each of the five remote calls.

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_string_contains, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stepsync::errors::RemoteError;
use stepsync::models::AccountIdentity;
use stepsync::remote::{RemoteService, ZeppClient, ZeppEndpoints};

const REDIRECT: &str = "https://s3-us-west-2.amazonaws.com/hm-registration/successsignin.html";

async fn client(server: &MockServer) -> ZeppClient {
    ZeppClient::with_endpoints(ZeppEndpoints::single(&server.uri()), Duration::from_secs(5)).unwrap()
}

mod login {
    use super::*;

    #[tokio::test]
    async fn test_access_token_read_from_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/registrations/.+/tokens$"))
            .and(body_string_contains("token=access"))
            .respond_with(ResponseTemplate::new(303).insert_header(
                "Location",
                format!("{REDIRECT}?region=us-west-2&access=ACCESS123&country_code=CN").as_str(),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .await
            .login_access_token(&AccountIdentity::parse("13800138000"), "secret")
            .await;
        assert_eq!(assert_ok!(token), "ACCESS123");
    }

    #[tokio::test]
    async fn test_error_redirect_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/registrations/.+/tokens$"))
            .respond_with(
                ResponseTemplate::new(303)
                    .insert_header("Location", format!("{REDIRECT}?error=401").as_str()),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .login_access_token(&AccountIdentity::parse("a@example.com"), "bad")
            .await;
        assert!(matches!(assert_err!(err), RemoteError::Rejected(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_missing_redirect_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/registrations/.+/tokens$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .login_access_token(&AccountIdentity::parse("a@example.com"), "pw")
            .await;
        assert!(matches!(assert_err!(err), RemoteError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_login_grant_uses_phone_flavour_and_device() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/client/login"))
            .and(body_string_contains("third_name=huami_phone"))
            .and(body_string_contains("device_id=dev-1"))
            .and(body_string_contains("code=ACCESS123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_info": {
                    "login_token": "LOGIN",
                    "app_token": "APP",
                    "user_id": 1188000
                },
                "result": "ok"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = assert_ok!(
            client(&server)
                .await
                .grant_login_tokens("ACCESS123", "dev-1", true)
                .await
        );
        assert_eq!(grant.login_token, "LOGIN");
        assert_eq!(grant.app_token, "APP");
        assert_eq!(grant.user_id, "1188000");
    }

    #[tokio::test]
    async fn test_login_grant_failure_carries_error_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/client/login"))
            .and(body_string_contains("third_name=huami&"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"result": "error", "error_code": "0106"})),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .grant_login_tokens("ACCESS123", "dev-1", false)
            .await;
        assert!(matches!(assert_err!(err), RemoteError::Rejected(code) if code == "0106"));
    }
}

mod app_token {
    use super::*;

    #[tokio::test]
    async fn test_grant_from_login_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/client/app_tokens"))
            .and(query_param("login_token", "LOGIN"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"token_info": {"app_token": "APP2"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server).await.grant_app_token("LOGIN").await;
        assert_eq!(assert_ok!(token), "APP2");
    }

    #[tokio::test]
    async fn test_check_accepts_success_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huami.health.getUserInfo.json"))
            .and(header("apptoken", "APP"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "success"})),
            )
            .mount(&server)
            .await;

        assert!(assert_ok!(client(&server).await.check_app_token("APP").await));
    }

    #[tokio::test]
    async fn test_check_unauthorized_means_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huami.health.getUserInfo.json"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(!assert_ok!(client(&server).await.check_app_token("OLD").await));
    }

    #[tokio::test]
    async fn test_server_error_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huami.health.getUserInfo.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).await.check_app_token("APP").await;
        assert!(matches!(assert_err!(err), RemoteError::Protocol(_)));
    }
}

mod submission {
    use super::*;

    #[tokio::test]
    async fn test_post_sends_step_total() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/data/band_data.json"))
            .and(header("apptoken", "APP"))
            .and(body_string_contains("userid=1188000"))
            .and(body_string_contains("20500"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "success"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ack = client(&server)
            .await
            .post_activity_data(20500, "APP", "1188000")
            .await;
        assert_eq!(assert_ok!(ack), "success");
    }

    #[tokio::test]
    async fn test_post_rejection_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/data/band_data.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"message": "invalid token"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).await.post_activity_data(1, "APP", "1").await;
        assert!(matches!(assert_err!(err), RemoteError::Rejected(msg) if msg == "invalid token"));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/data/band_data.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_json(serde_json::json!({"message": "success"})),
            )
            .mount(&server)
            .await;

        let client = ZeppClient::with_endpoints(
            ZeppEndpoints::single(&server.uri()),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = client.post_activity_data(1, "APP", "1").await;
        assert!(matches!(assert_err!(err), RemoteError::Timeout(_)));
    }
}
