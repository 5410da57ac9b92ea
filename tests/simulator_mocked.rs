/// Integration tests for simulated banking-data delivery with a mocked
/// webhook receiver, without touching a real database
use bigdecimal::BigDecimal;
use chrono::Utc;
use sqlx::types::Json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use credit_workflow_api::models::{Country, CreditApplication};
use credit_workflow_api::simulator::{generate_banking_data, post_banking_data};

fn application(id: i64, country: Country, full_name: &str) -> CreditApplication {
    CreditApplication {
        id,
        country: country.as_str().to_string(),
        full_name: full_name.to_string(),
        requested_amount: BigDecimal::from(500),
        application_date: Utc::now().date_naive(),
        status: "pending".to_string(),
        monthly_income: None,
        banking_data: None,
        validation_result: Json(vec![]),
        identity_document_filename: None,
        identity_document_content: None,
        user_id: 1,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn delivers_payload_to_webhook_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/webhooks/banking_data"))
        .and(body_partial_json(serde_json::json!({
            "reference_id": 42,
            "country": "mexico",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "received": true
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = application(42, Country::Mexico, "Juan Pérez");
    let payload = generate_banking_data(&app, Country::Mexico);

    let client = reqwest::Client::new();
    let result = post_banking_data(&client, &mock_server.uri(), &payload).await;
    assert!(result.is_ok(), "delivery should succeed: {:?}", result);
}

#[tokio::test]
async fn server_error_surfaces_as_delivery_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/webhooks/banking_data"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let app = application(7, Country::Mexico, "Ana Ruiz");
    let payload = generate_banking_data(&app, Country::Mexico);

    let client = reqwest::Client::new();
    let result = post_banking_data(&client, &mock_server.uri(), &payload).await;

    let err = result.expect_err("a 500 response must fail the delivery");
    assert!(
        err.to_string().contains("500"),
        "error should carry the status: {}",
        err
    );
}

#[tokio::test]
async fn trailing_slash_in_base_url_is_tolerated() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/webhooks/banking_data"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let app = application(3, Country::Portugal, "Maria Silva");
    let payload = generate_banking_data(&app, Country::Portugal);

    let client = reqwest::Client::new();
    let base = format!("{}/", mock_server.uri());
    assert!(post_banking_data(&client, &base, &payload).await.is_ok());
}

#[test]
fn generated_payload_matches_country_conventions() {
    let app = application(11, Country::Portugal, "Maria Joao Silva");
    let payload = generate_banking_data(&app, Country::Portugal);

    assert_eq!(payload["reference_id"], 11);
    assert_eq!(payload["country"], "portugal");
    assert_eq!(payload["name"], "Maria");
    assert_eq!(payload["lastname"], "Joao Silva");
    assert!(payload["contact"]["phone"]
        .as_str()
        .unwrap()
        .starts_with("+351 9"));

    let income = payload["monthly_data"]["income"].as_f64().unwrap();
    assert!((2000.0..=5000.0).contains(&income));
}
