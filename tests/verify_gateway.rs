//! Verification-gateway tests with a mocked data-tool service.

use als_lead_store::verify::{ContactVerificationGateway, DataToolGateway};
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(base_url: String) -> DataToolGateway {
    DataToolGateway::new(base_url, "test_key".to_string()).expect("client builds")
}

fn email_ok() -> serde_json::Value {
    serde_json::json!({
        "DtResponse": { "Result": [ { "StatusCode": "0" } ] }
    })
}

fn email_bad() -> serde_json::Value {
    serde_json::json!({
        "DtResponse": { "Result": [ { "StatusCode": "4" } ] }
    })
}

fn phone_ok() -> serde_json::Value {
    serde_json::json!({
        "DtResponse": { "Result": [ { "IsValid": "True" } ] }
    })
}

fn phone_bad() -> serde_json::Value {
    serde_json::json!({
        "DtResponse": { "Result": [ { "IsValid": "False" } ] }
    })
}

#[tokio::test]
async fn either_valid_channel_verifies_the_contact() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("Method", "EmailVerification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(email_bad()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("Method", "PhoneVerification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(phone_ok()))
        .mount(&server)
        .await;

    let gateway = gateway(server.uri());
    assert!(gateway.verify("jane@example.com", "3125550100").await);
}

#[tokio::test]
async fn both_channels_invalid_means_not_verified() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("Method", "EmailVerification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(email_bad()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("Method", "PhoneVerification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(phone_bad()))
        .mount(&server)
        .await;

    let gateway = gateway(server.uri());
    assert!(!gateway.verify("jane@example.com", "3125550100").await);
}

#[tokio::test]
async fn a_failing_channel_degrades_instead_of_erroring() {
    let server = MockServer::start().await;

    // Email channel blows up server-side; phone channel is healthy.
    Mock::given(method("GET"))
        .and(query_param("Method", "EmailVerification"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("Method", "PhoneVerification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(phone_ok()))
        .mount(&server)
        .await;

    let gateway = gateway(server.uri());
    assert!(gateway.verify("jane@example.com", "3125550100").await);
}

#[tokio::test]
async fn empty_values_skip_their_channel() {
    let server = MockServer::start().await;

    // Only the email call may arrive; an empty phone never hits the wire.
    Mock::given(method("GET"))
        .and(query_param("Method", "EmailVerification"))
        .and(query_param("EmailAddress", "jane@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(email_ok()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("Method", "PhoneVerification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(phone_ok()))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = gateway(server.uri());
    assert!(gateway.verify("jane@example.com", "").await);
}

#[tokio::test]
async fn both_channels_empty_verifies_false_without_any_call() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(email_ok()))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = gateway(server.uri());
    assert!(!gateway.verify("", "").await);
}

#[tokio::test]
async fn malformed_body_degrades_to_not_verified() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let gateway = gateway(server.uri());
    assert!(!gateway.verify("jane@example.com", "3125550100").await);
}
