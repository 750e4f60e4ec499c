//! Client and paygate talking over real HTTP.

#![cfg(all(feature = "client", feature = "server"))]

use std::sync::Arc;

use alloy_primitives::address;
use h402::codec;
use h402::config::NegotiatorConfig;
use h402::networks::Network;
use h402::proto::PaymentRequirements;
use h402::replay::ReplayGuard;
use h402::timestamp::{FixedClock, UnixTimestamp};
use h402::verify::Verifier;
use h402_evm::LocalKeySigner;
use h402_http::client::{
    NegotiationOutcome, Negotiator, PaymentMiddleware, ReqwestWithPayments, sign_requirements,
};
use h402_http::constants::{PAYMENT_HEADER, PAYMENT_REQUIREMENTS_HEADER};
use h402_http::error::NegotiationError;
use h402_http::server::Paygate;
use h402_http::transport::ReqwestTransport;
use http::{Request, StatusCode};
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

const NOW: u64 = 1_700_000_000;

/// Answers with the payer address, or with whatever the gate rejects.
struct PaygateResponder(Paygate);

impl Respond for PaygateResponder {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        match self.0.check(&request.headers) {
            Ok(payer) => ResponseTemplate::new(200).set_body_string(payer.to_string()),
            Err(err) => {
                let rejection = self.0.rejection(&err);
                let mut template = ResponseTemplate::new(rejection.status().as_u16())
                    .insert_header("content-type", "application/json")
                    .set_body_string(rejection.body());
                if let Some(requirements) = rejection.requirements_header() {
                    template =
                        template.insert_header(PAYMENT_REQUIREMENTS_HEADER, requirements.clone());
                }
                template
            }
        }
    }
}

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(UnixTimestamp::from_secs(NOW)))
}

fn paygate(clock: Arc<FixedClock>) -> Paygate {
    let verifier = Verifier::new(Arc::new(ReplayGuard::new())).with_clock(clock);
    let requirements = PaymentRequirements::new(
        1000u64.into(),
        address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C"),
        Network::BaseSepolia,
        "/data",
    )
    .with_description("premium data");
    Paygate::new(verifier, requirements).with_validity_secs(300)
}

async fn start(gate: Paygate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(path("/data"))
        .respond_with(PaygateResponder(gate))
        .mount(&server)
        .await;
    server
}

fn get(server: &MockServer) -> Request<Vec<u8>> {
    Request::builder()
        .uri(format!("{}/data", server.uri()))
        .body(Vec::new())
        .unwrap()
}

#[tokio::test]
async fn test_negotiator_pays_and_gets_the_resource() {
    let clock = clock();
    let server = start(paygate(clock.clone())).await;
    let signer = LocalKeySigner::generate();
    let negotiator = Negotiator::new(
        signer.clone(),
        ReqwestTransport::default(),
        NegotiatorConfig::default().with_max_amount(2000u64),
    )
    .with_clock(clock);

    for _ in 0..2 {
        let outcome = negotiator.execute(get(&server)).await.unwrap();
        let NegotiationOutcome::Completed { response, payment } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), signer.address().to_string().as_bytes());
        let payment = payment.unwrap().payment;
        assert_eq!(payment.chain_id, 84532);
        assert_eq!(payment.expires_at.as_secs(), NOW + 300);
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_over_budget_stops_after_first_402() {
    let clock = clock();
    let server = start(paygate(clock.clone())).await;
    let negotiator = Negotiator::new(
        LocalKeySigner::generate(),
        ReqwestTransport::default(),
        NegotiatorConfig::default().with_max_amount(500u64),
    )
    .with_clock(clock);

    let err = negotiator.execute(get(&server)).await.unwrap_err();
    assert!(matches!(err, NegotiationError::BudgetExceeded { .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_approval_then_pay() {
    let clock = clock();
    let server = start(paygate(clock.clone())).await;
    let negotiator = Negotiator::new(
        LocalKeySigner::generate(),
        ReqwestTransport::default(),
        NegotiatorConfig::default().with_auto_pay(false),
    )
    .with_clock(clock);

    let outcome = negotiator.execute(get(&server)).await.unwrap();
    let NegotiationOutcome::PaymentRequired { requirements, response } = outcome else {
        panic!("expected requirements");
    };
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(requirements.description.as_deref(), Some("premium data"));
    assert_eq!(requirements.expires_at, Some(UnixTimestamp::from_secs(NOW + 300)));

    let outcome = negotiator.pay(get(&server), &requirements).await.unwrap();
    assert_eq!(outcome.response().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_middleware_pays_transparently() {
    let clock = clock();
    let server = start(paygate(clock.clone())).await;
    let signer = LocalKeySigner::generate();
    let client = reqwest::Client::new()
        .with_payments(
            PaymentMiddleware::new(signer.clone(), NegotiatorConfig::default()).with_clock(clock),
        )
        .build();

    let response = client
        .get(format!("{}/data", server.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), signer.address().to_string());
}

#[tokio::test]
async fn test_middleware_passes_402_through_without_auto_pay() {
    let clock = clock();
    let server = start(paygate(clock.clone())).await;
    let client = reqwest::Client::new()
        .with_payments(
            PaymentMiddleware::new(
                LocalKeySigner::generate(),
                NegotiatorConfig::default().with_auto_pay(false),
            )
            .with_clock(clock),
        )
        .build();

    let response = client
        .get(format!("{}/data", server.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let header = response.headers()[PAYMENT_REQUIREMENTS_HEADER].to_str().unwrap();
    assert_eq!(codec::decode_requirements(header).unwrap().amount, 1000u64.into());
}

#[tokio::test]
async fn test_same_payment_sent_twice_concurrently_is_accepted_once() {
    let clock = clock();
    let gate = paygate(clock.clone());
    let requirements = gate.current_requirements();
    let server = start(gate).await;

    let signer = LocalKeySigner::generate();
    let config = NegotiatorConfig::default();
    let payment = sign_requirements(&signer, &requirements, UnixTimestamp::from_secs(NOW), &config)
        .await
        .unwrap();
    let header = codec::encode_payment(&payment).unwrap();

    let client = reqwest::Client::new();
    let send = || {
        client
            .get(format!("{}/data", server.uri()))
            .header(PAYMENT_HEADER, header.as_str())
            .send()
    };
    let (a, b) = tokio::join!(send(), send());
    let mut statuses = [a.unwrap().status(), b.unwrap().status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
}

#[tokio::test]
async fn test_expired_payment_is_refused() {
    let clock = clock();
    let gate = paygate(clock.clone());
    let requirements = gate.current_requirements();
    let server = start(gate).await;

    let signer = LocalKeySigner::generate();
    let config = NegotiatorConfig::default();
    let payment = sign_requirements(&signer, &requirements, UnixTimestamp::from_secs(NOW), &config)
        .await
        .unwrap();
    clock.advance(301);

    let response = reqwest::Client::new()
        .get(format!("{}/data", server.uri()))
        .header(PAYMENT_HEADER, codec::encode_payment(&payment).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "expired_payment");
}

#[tokio::test]
async fn test_middleware_reports_rejected_retry() {
    let server = MockServer::start().await;
    let requirements = paygate(clock()).current_requirements();
    Mock::given(path("/data"))
        .respond_with(
            ResponseTemplate::new(402)
                .insert_header(
                    PAYMENT_REQUIREMENTS_HEADER,
                    codec::encode_requirements(&requirements).unwrap(),
                )
                .set_body_string(r#"{"error":"invalid_signature"}"#),
        )
        .mount(&server)
        .await;
    let client = reqwest::Client::new()
        .with_payments(
            PaymentMiddleware::new(LocalKeySigner::generate(), NegotiatorConfig::default())
                .with_clock(clock()),
        )
        .build();

    let err = client
        .get(format!("{}/data", server.uri()))
        .send()
        .await
        .unwrap_err();
    let reqwest_middleware::Error::Middleware(err) = err else {
        panic!("expected a middleware error");
    };
    match err.downcast_ref::<NegotiationError>() {
        Some(NegotiationError::PaymentRejected { reason }) => {
            assert_eq!(reason, "invalid_signature");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
