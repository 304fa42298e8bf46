use anyhow::{Context, Result};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use base64ct::{Base64, Encoding};
use keygate::{
    auth::{
        ActionSink, AllowList, AuthenticationService, ChallengeError, ChallengeStore, Denial,
        MessageVerifier, Network, PrefixedMessage, SharedAllowList, SignatureVerifier,
        VerificationRequest, VerificationResult, VerifierError,
        challenge::ManualClock,
        verifier::p2pkh_address,
    },
    keygate::router,
};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde_json::{Value, json};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tower::ServiceExt;

const TTL: Duration = Duration::from_secs(300);

struct Wallet {
    secret: SecretKey,
    address: String,
}

impl Wallet {
    fn new(seed: u8) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[seed; 32])?;
        let public = PublicKey::from_secret_key(&secp, &secret);
        let address = p2pkh_address(&public, true, Network::Dogecoin.p2pkh_version());
        Ok(Self { secret, address })
    }

    /// Sign the way a wallet's "sign message" feature does.
    fn sign(&self, message: &str) -> String {
        let secp = Secp256k1::new();
        let prefixed = PrefixedMessage::new(Network::Dogecoin.message_prefix(), message);
        let digest = Message::from_digest(prefixed.signing_digest());
        let (recovery_id, compact) = secp
            .sign_ecdsa_recoverable(&digest, &self.secret)
            .serialize_compact();

        let mut signature = Vec::with_capacity(65);
        signature.push(31 + u8::try_from(recovery_id.to_i32()).unwrap_or_default());
        signature.extend_from_slice(&compact);
        Base64::encode_string(&signature)
    }
}

/// Real verifier that counts invocations.
struct CountingVerifier {
    inner: MessageVerifier,
    calls: AtomicUsize,
}

impl CountingVerifier {
    fn new() -> Self {
        Self {
            inner: MessageVerifier::new(Network::Dogecoin),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SignatureVerifier for CountingVerifier {
    fn verify(
        &self,
        address: &str,
        message: &PrefixedMessage,
        signature: &[u8],
    ) -> Result<bool, VerifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.verify(address, message, signature)
    }
}

#[derive(Default)]
struct RecordingSink {
    granted: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn granted(&self) -> Vec<String> {
        self.granted.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl ActionSink for RecordingSink {
    fn on_granted(&self, address: &str) {
        if let Ok(mut granted) = self.granted.lock() {
            granted.push(address.to_string());
        }
    }
}

struct Fixture {
    alice: Wallet,
    mallory: Wallet,
    service: Arc<AuthenticationService>,
    verifier: Arc<CountingVerifier>,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Result<Self> {
        let alice = Wallet::new(0x11)?;
        let mallory = Wallet::new(0x22)?;
        let clock = Arc::new(ManualClock::default());
        let verifier = Arc::new(CountingVerifier::new());
        let sink = Arc::new(RecordingSink::default());

        let service = AuthenticationService::new(
            ChallengeStore::with_clock(TTL, clock.clone()),
            SharedAllowList::new(AllowList::from_addresses([alice.address.as_str()])?),
            verifier.clone(),
            sink.clone(),
        );

        Ok(Self {
            alice,
            mallory,
            service: Arc::new(service),
            verifier,
            sink,
            clock,
        })
    }

    fn router(&self) -> Router {
        router(self.service.clone(), "access_granted")
    }
}

async fn call(app: Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

async fn get_challenge(app: Router) -> Result<(String, String)> {
    let (status, body) = call(
        app,
        Request::builder()
            .uri("/generate-challenge")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let token = body["token"].as_str().context("token")?.to_string();
    let message = body["message"].as_str().context("message")?.to_string();
    Ok((token, message))
}

async fn post_verify(app: Router, payload: &Value) -> Result<(StatusCode, Value)> {
    call(
        app,
        Request::builder()
            .method("POST")
            .uri("/verify-signature")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))?,
    )
    .await
}

#[tokio::test]
async fn signed_challenge_is_granted() -> Result<()> {
    let f = Fixture::new()?;
    let challenge = f.service.generate_challenge().await;

    let result = f
        .service
        .verify(VerificationRequest {
            address: f.alice.address.clone(),
            message: challenge.message.clone(),
            signature: f.alice.sign(&challenge.message),
            token: Some(challenge.token),
        })
        .await;

    assert_eq!(result, VerificationResult::Granted(f.alice.address.clone()));
    assert_eq!(f.sink.granted(), vec![f.alice.address.clone()]);
    assert_eq!(f.verifier.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn unlisted_wallet_is_denied_without_verification() -> Result<()> {
    let f = Fixture::new()?;
    let challenge = f.service.generate_challenge().await;

    let result = f
        .service
        .verify(VerificationRequest {
            address: f.mallory.address.clone(),
            message: challenge.message.clone(),
            signature: f.mallory.sign(&challenge.message),
            token: Some(challenge.token),
        })
        .await;

    assert_eq!(result, VerificationResult::Denied(Denial::UnauthorizedAddress));
    assert_eq!(f.verifier.calls(), 0);
    assert!(f.sink.granted().is_empty());
    Ok(())
}

#[tokio::test]
async fn signature_over_another_challenge_is_denied() -> Result<()> {
    let f = Fixture::new()?;
    let first = f.service.generate_challenge().await;
    let second = f.service.generate_challenge().await;

    let result = f
        .service
        .verify(VerificationRequest {
            address: f.alice.address.clone(),
            message: first.message.clone(),
            signature: f.alice.sign(&first.message),
            token: Some(second.token),
        })
        .await;

    assert_eq!(
        result,
        VerificationResult::Denied(Denial::ChallengeInvalid(ChallengeError::MessageMismatch))
    );
    assert!(f.sink.granted().is_empty());
    Ok(())
}

#[tokio::test]
async fn expired_challenge_is_denied_despite_valid_signature() -> Result<()> {
    let f = Fixture::new()?;
    let challenge = f.service.generate_challenge().await;

    f.clock.advance(TTL + Duration::from_secs(1));

    let result = f
        .service
        .verify(VerificationRequest {
            address: f.alice.address.clone(),
            message: challenge.message.clone(),
            signature: f.alice.sign(&challenge.message),
            token: Some(challenge.token),
        })
        .await;

    assert_eq!(
        result,
        VerificationResult::Denied(Denial::ChallengeInvalid(ChallengeError::Expired))
    );
    assert_eq!(f.verifier.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn wrong_key_for_listed_address_is_denied() -> Result<()> {
    let f = Fixture::new()?;
    let challenge = f.service.generate_challenge().await;

    let result = f
        .service
        .verify(VerificationRequest {
            address: f.alice.address.clone(),
            message: challenge.message.clone(),
            signature: f.mallory.sign(&challenge.message),
            token: None,
        })
        .await;

    assert_eq!(result, VerificationResult::Denied(Denial::InvalidSignature));
    assert_eq!(f.verifier.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn short_signature_is_a_verifier_failure() -> Result<()> {
    let f = Fixture::new()?;
    let challenge = f.service.generate_challenge().await;

    let result = f
        .service
        .verify(VerificationRequest {
            address: f.alice.address.clone(),
            message: challenge.message.clone(),
            signature: Base64::encode_string(&[7u8; 64]),
            token: None,
        })
        .await;

    assert_eq!(
        result,
        VerificationResult::Denied(Denial::VerifierFailure(VerifierError::SignatureLength(64)))
    );
    Ok(())
}

#[tokio::test]
async fn http_flow_grants_once() -> Result<()> {
    let f = Fixture::new()?;
    let (token, message) = get_challenge(f.router()).await?;

    let payload = json!({
        "address": f.alice.address,
        "message": message,
        "signature": f.alice.sign(&message),
        "token": token,
    });

    let (status, body) = post_verify(f.router(), &payload).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"status": "granted", "address": f.alice.address, "action": "access_granted"})
    );

    // Replaying the exact same request is denied.
    let (status, body) = post_verify(f.router(), &payload).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({"status": "denied", "error": "access denied"}));
    Ok(())
}

#[tokio::test]
async fn http_denials_are_indistinguishable() -> Result<()> {
    let f = Fixture::new()?;
    let mut responses = Vec::new();

    // Unknown address.
    let (_, message) = get_challenge(f.router()).await?;
    responses.push(
        post_verify(
            f.router(),
            &json!({
                "address": f.mallory.address,
                "message": message,
                "signature": f.mallory.sign(&message),
            }),
        )
        .await?,
    );

    // Wrong key.
    let (_, message) = get_challenge(f.router()).await?;
    responses.push(
        post_verify(
            f.router(),
            &json!({
                "address": f.alice.address,
                "message": message,
                "signature": f.mallory.sign(&message),
            }),
        )
        .await?,
    );

    // Never issued.
    let message = "1700000000-0123456789abcdef0123456789abcdef";
    responses.push(
        post_verify(
            f.router(),
            &json!({
                "address": f.alice.address,
                "message": message,
                "signature": f.alice.sign(message),
            }),
        )
        .await?,
    );

    // Undecodable signature.
    let (_, message) = get_challenge(f.router()).await?;
    responses.push(
        post_verify(
            f.router(),
            &json!({
                "address": f.alice.address,
                "message": message,
                "signature": "***",
            }),
        )
        .await?,
    );

    // Signature over another challenge's message.
    let (token, _) = get_challenge(f.router()).await?;
    let (_, other_message) = get_challenge(f.router()).await?;
    responses.push(
        post_verify(
            f.router(),
            &json!({
                "address": f.alice.address,
                "message": other_message,
                "signature": f.alice.sign(&other_message),
                "token": token,
            }),
        )
        .await?,
    );

    // Verifier failure: a 64-byte signature has no header byte.
    let (_, message) = get_challenge(f.router()).await?;
    responses.push(
        post_verify(
            f.router(),
            &json!({
                "address": f.alice.address,
                "message": message,
                "signature": Base64::encode_string(&[7u8; 64]),
            }),
        )
        .await?,
    );

    // Expired.
    let (token, message) = get_challenge(f.router()).await?;
    f.clock.advance(TTL * 2);
    responses.push(
        post_verify(
            f.router(),
            &json!({
                "address": f.alice.address,
                "message": message,
                "signature": f.alice.sign(&message),
                "challenge": token,
            }),
        )
        .await?,
    );

    assert_eq!(responses.len(), 7);
    for (status, body) in &responses {
        assert_eq!(*status, StatusCode::FORBIDDEN);
        assert_eq!(body, &json!({"status": "denied", "error": "access denied"}));
    }
    assert!(f.sink.granted().is_empty());
    // Only the wrong-key and 64-byte signatures reached the verifier.
    assert_eq!(f.verifier.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn http_malformed_requests_are_bad_request() -> Result<()> {
    let f = Fixture::new()?;

    let (status, body) = post_verify(f.router(), &json!({"address": f.alice.address})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "invalid request"}));

    let (status, body) = call(
        f.router(),
        Request::builder()
            .method("POST")
            .uri("/verify-signature")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "invalid request"}));

    let (status, _) = call(
        f.router(),
        Request::builder()
            .method("POST")
            .uri("/verify-signature")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn responses_carry_request_id() -> Result<()> {
    let f = Fixture::new()?;
    let response = f
        .router()
        .oneshot(
            Request::builder()
                .uri("/generate-challenge")
                .body(Body::empty())?,
        )
        .await?;

    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    Ok(())
}

#[tokio::test]
async fn health_reports_state() -> Result<()> {
    let f = Fixture::new()?;
    f.service.generate_challenge().await;

    let response = f
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(body["allowed_addresses"], 1);
    assert_eq!(body["pending_challenges"], 1);

    let (status, body) = call(
        f.router(),
        Request::builder()
            .method("OPTIONS")
            .uri("/health")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let f = Fixture::new()?;
    let (status, body) = call(
        f.router(),
        Request::builder()
            .uri("/api-docs/openapi.json")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/verify-signature"].is_object());
    assert!(body["paths"]["/generate-challenge"].is_object());
    Ok(())
}
