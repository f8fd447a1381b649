mod api;
mod clock;
mod config;
mod ebay;
mod error;
mod guard;
mod http;
mod idempotency;
mod llm;
mod metrics;
mod models;
mod oauth;
mod ratelimit;
mod revocation;
mod session;
mod state;
mod store;
#[cfg(test)]
mod testing;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use clock::SystemClock;
use config::AppConfig;
use eyre::WrapErr;
use idempotency::IdempotencyCache;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::json;
use state::AppState;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use store::{MemoryStore, Store, SupabaseStore};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "lister.api", "server crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env().wrap_err("loading configuration")?;
    let http = http::build_client(&config.http).wrap_err("building http client")?;

    let store: Arc<dyn Store> = match config.supabase.clone() {
        Some(supabase) => {
            info!(target = "lister.api", base_url = %supabase.base_url, "using supabase store");
            Arc::new(SupabaseStore::new(supabase, http.clone()))
        }
        None => {
            warn!(target = "lister.api", "SUPABASE_URL not set; state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let idempotency_ttl = Duration::from_secs(config.idempotency_ttl_secs);
    let idempotency = match config.redis_url.as_deref().map(redis::Client::open) {
        Some(Ok(client)) => IdempotencyCache::redis(client, idempotency_ttl),
        Some(Err(err)) => {
            warn!(target = "lister.api", error = %err, "invalid REDIS_URL; using in-process idempotency cache");
            IdempotencyCache::local(idempotency_ttl)
        }
        None => IdempotencyCache::local(idempotency_ttl),
    };

    let prometheus_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(target = "lister.api", error = %err, "prometheus recorder unavailable");
            None
        }
    };

    if config.ebay.verification_token.is_some() && config.ebay.webhook_endpoint.is_none() {
        warn!(
            target = "lister.webhook",
            "EBAY_WEBHOOK_ENDPOINT not set; challenge responses use the request host"
        );
    }
    let port = config.port;
    let state = AppState::assemble(
        config,
        store,
        Arc::new(SystemClock),
        http,
        idempotency,
        prometheus_handle,
    )
    .wrap_err("assembling application state")?;

    let limiter = state.limiter.clone();
    let idempotency = state.idempotency.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = limiter.prune().await;
            if removed > 0 {
                info!(target = "lister.ratelimit", removed, "pruned idle rate buckets");
            }
            let expired = idempotency.prune().await;
            if expired > 0 {
                info!(target = "lister.idempotency", expired, "pruned expired replay entries");
            }
        }
    });

    let app = router(state);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "lister.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);
    let body_limit = state.config.body_limit;

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(api::public_routes())
        .merge(api::session_routes(&state))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Liveness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "listing-ai-api",
    }))
}

/// Prometheus scrape endpoint, guarded by `X-Metrics-Key` when `METRICS_KEY` is set.
async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.config.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    match &state.prometheus_handle {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::lookup_from;
    use axum::{
        body::{Body, to_bytes},
        extract::ConnectInfo,
        http::{Request, header::COOKIE, header::SET_COOKIE},
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::Value;
    use tower::ServiceExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path, path_regex},
    };

    struct Harness {
        app: Router,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn harness(server_uri: &str, extra: &[(&str, &str)]) -> Harness {
        let token_url = format!("{server_uri}/identity/v1/oauth2/token");
        let mut pairs = vec![
            ("SESSION_SECRET", crate::testing::SECRET),
            ("SESSION_COOKIE_NAME", "sid"),
            ("EBAY_CLIENT_ID", "X"),
            ("EBAY_CLIENT_SECRET", "S"),
            ("EBAY_REDIRECT_URI", "https://app/cb"),
            ("EBAY_TOKEN_URL", token_url.as_str()),
            ("EBAY_API_ROOT", server_uri),
            ("EBAY_IDENTITY_ROOT", server_uri),
            ("EBAY_VERIFICATION_TOKEN", "verify-me"),
            ("GEMINI_API_KEY", "g-key"),
            ("GEMINI_BASE_URL", server_uri),
        ];
        pairs.extend_from_slice(extra);
        let config = AppConfig::from_lookup(&lookup_from(&pairs)).expect("config");

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = AppState::assemble(
            config,
            store.clone(),
            clock.clone(),
            reqwest::Client::new(),
            IdempotencyCache::local(Duration::from_secs(60)),
            None,
        )
        .expect("state");
        Harness {
            app: router(state),
            store,
            clock,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn session_cookie(headers: &HeaderMap) -> String {
        headers
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .expect("set-cookie")
            .to_string()
    }

    fn get_with(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(Body::empty()).expect("request")
    }

    fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    fn draft() -> Value {
        json!({
            "title": "Vintage Camera",
            "description": "Works well",
            "category": "Cameras",
            "condition": "Used",
            "price": "$40.00",
            "itemSpecifics": [{"name": "Brand", "value": "Canon"}]
        })
    }

    async fn mount_token_endpoint(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/identity/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "t1",
                "refresh_token": "r1",
                "expires_in": 7200,
                "token_type": "User Access Token"
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/commerce/identity/v1/user/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "userId": "ebay-123",
                "username": "seller1"
            })))
            .mount(server)
            .await;
    }

    /// Runs the consent callback and returns the session cookie it issued.
    async fn connect(harness: &Harness) -> String {
        let (_, headers, _) = send(&harness.app, get_with("/api/ebay/status", None)).await;
        let cookie = session_cookie(&headers);
        let (status, headers, _) = send(
            &harness.app,
            get_with("/api/ebay/callback?code=abc", Some(&cookie)),
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers.get("location").unwrap(), "/?connected=true");
        session_cookie(&headers)
    }

    #[tokio::test]
    async fn health_is_public() {
        let server = MockServer::start().await;
        let harness = harness(&server.uri(), &[]);
        let (status, headers, body) = send(&harness.app, get_with("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(headers.get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn anonymous_session_has_no_history() {
        let server = MockServer::start().await;
        let harness = harness(&server.uri(), &[]);
        let (status, _, body) = send(&harness.app, get_with("/api/ebay/listings", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "reauthenticate");
    }

    #[tokio::test]
    async fn metrics_require_key_when_configured() {
        let server = MockServer::start().await;
        let harness = harness(&server.uri(), &[("METRICS_KEY", "m")]);
        let (status, _, _) = send(&harness.app, get_with("/metrics", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn connect_post_and_expire() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/sell/inventory/v1/inventory_item/.+$"))
            .and(header("authorization", "Bearer t1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let harness = harness(&server.uri(), &[]);

        let (status, _, body) = send(&harness.app, get_with("/api/ebay/authUrl", None)).await;
        assert_eq!(status, StatusCode::OK);
        let auth_url = body["authUrl"].as_str().expect("authUrl");
        assert!(auth_url.contains("client_id=X"));
        assert!(auth_url.contains("redirect_uri=https%3A%2F%2Fapp%2Fcb"));

        let cookie = connect(&harness).await;
        let (_, _, body) = send(&harness.app, get_with("/api/ebay/status", Some(&cookie))).await;
        assert_eq!(body["connected"], true);

        let mut request = json_request("POST", "/api/ebay/postListing", Some(&cookie), draft());
        request
            .headers_mut()
            .insert("Idempotency-Key", "k-1".parse().unwrap());
        let (status, _, first) = send(&harness.app, request).await;
        assert_eq!(status, StatusCode::OK, "{first}");
        assert_eq!(first["success"], true);
        assert!(first["sku"].as_str().unwrap().starts_with("LAI-"));

        let mut replay = json_request("POST", "/api/ebay/postListing", Some(&cookie), draft());
        replay
            .headers_mut()
            .insert("Idempotency-Key", "k-1".parse().unwrap());
        let (_, _, second) = send(&harness.app, replay).await;
        assert_eq!(first, second);
        assert_eq!(harness.store.row_counts().await.listings, 1);

        let (status, _, history) =
            send(&harness.app, get_with("/api/ebay/listings", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history[0]["sku"], first["sku"]);
        assert_eq!(history[0]["title"], "Vintage Camera");

        harness.clock.advance(ChronoDuration::hours(3));
        let (_, _, body) = send(&harness.app, get_with("/api/ebay/status", Some(&cookie))).await;
        assert_eq!(body["connected"], false);
        let (status, _, body) = send(
            &harness.app,
            json_request("POST", "/api/ebay/postListing", Some(&cookie), draft()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "reauthenticate");
    }

    #[tokio::test]
    async fn declined_consent_redirects_without_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identity/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let harness = harness(&server.uri(), &[]);
        let (status, headers, _) = send(
            &harness.app,
            get_with("/api/ebay/callback?error=access_denied", None),
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers.get("location").unwrap(), "/?error=access_denied");

        let (status, _, _) = send(&harness.app, get_with("/api/ebay/callback", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_account_twice() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        let harness = harness(&server.uri(), &[]);
        let cookie = connect(&harness).await;

        let (status, headers, body) = send(
            &harness.app,
            json_request("DELETE", "/api/ebay/deleteAccount", Some(&cookie), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["deletedAt"].is_string());
        let cleared = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cleared.contains("Max-Age=0"));
        let counts = harness.store.row_counts().await;
        assert_eq!((counts.users, counts.credentials), (0, 0));

        let (status, _, body) = send(
            &harness.app,
            json_request("DELETE", "/api/ebay/deleteAccount", Some(&cookie), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "already_deleted");
    }

    #[tokio::test]
    async fn webhook_challenge_and_unknown_user() {
        let server = MockServer::start().await;
        let harness = harness(
            &server.uri(),
            &[("EBAY_WEBHOOK_ENDPOINT", "https://app/api/ebay/webhook")],
        );

        let (status, headers, body) = send(
            &harness.app,
            get_with("/api/ebay/webhook?challenge_code=abc", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(SET_COOKIE).is_none());
        assert_eq!(
            body["challengeResponse"],
            revocation::challenge_response("abc", "verify-me", "https://app/api/ebay/webhook")
        );

        let (status, _, _) = send(&harness.app, get_with("/api/ebay/webhook", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let notice = json!({
            "metadata": {"topic": "MARKETPLACE_ACCOUNT_DELETION"},
            "notification": {"data": {"userId": "nobody", "username": "ghost"}}
        });
        let (status, _, body) = send(
            &harness.app,
            json_request("POST", "/api/ebay/webhook", None, notice),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn webhook_info_reports_configuration() {
        let server = MockServer::start().await;
        let harness = harness(&server.uri(), &[]);
        let request = Request::builder()
            .uri("/api/ebay/webhookInfo")
            .header("host", "lister.test")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&harness.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["webhookUrl"], "https://lister.test/api/ebay/webhook");
        assert_eq!(body["verificationTokenConfigured"], true);
        assert_eq!(body["supportedNotifications"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn generate_listing_requires_images() {
        let server = MockServer::start().await;
        let harness = harness(&server.uri(), &[]);
        let (status, _, body) = send(
            &harness.app,
            json_request("POST", "/api/generateListing", None, json!({"imageParts": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn generate_listing_is_rate_limited_per_session() {
        let server = MockServer::start().await;
        let text = draft().to_string();
        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": text}]}}]
            })))
            .mount(&server)
            .await;
        let harness = harness(&server.uri(), &[("RATE_LIMIT_CAPACITY", "1")]);
        let payload = json!({"imageParts": [{"mimeType": "image/jpeg", "data": "aGVsbG8="}]});

        let (status, headers, body) = send(
            &harness.app,
            json_request("POST", "/api/generateListing", None, payload.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Vintage Camera");
        let cookie = session_cookie(&headers);

        let (status, headers, _) = send(
            &harness.app,
            json_request("POST", "/api/generateListing", Some(&cookie), payload),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(headers.get("retry-after").is_some());
    }

    #[tokio::test]
    async fn disconnect_ends_access_before_token_expiry() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        let harness = harness(&server.uri(), &[]);
        let cookie = connect(&harness).await;

        let (status, _, profile) = send(&harness.app, get_with("/api/ebay/user", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["username"], "seller1");

        let (status, _, body) = send(
            &harness.app,
            json_request("POST", "/api/ebay/disconnect", Some(&cookie), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _, body) = send(&harness.app, get_with("/api/ebay/user", Some(&cookie))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "reauthenticate");
        let (status, _, _) = send(
            &harness.app,
            json_request("POST", "/api/ebay/postListing", Some(&cookie), draft()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (_, _, body) = send(&harness.app, get_with("/api/ebay/status", Some(&cookie))).await;
        assert_eq!(body["connected"], false);
    }

    #[tokio::test]
    async fn cookieless_callers_share_a_bucket_per_address() {
        let server = MockServer::start().await;
        let text = draft().to_string();
        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": text}]}}]
            })))
            .mount(&server)
            .await;
        let harness = harness(&server.uri(), &[("RATE_LIMIT_CAPACITY", "1")]);
        let payload = json!({"imageParts": [{"mimeType": "image/jpeg", "data": "aGVsbG8="}]});
        let peer: SocketAddr = ([203, 0, 113, 7], 40000).into();

        let mut first = json_request("POST", "/api/generateListing", None, payload.clone());
        first.extensions_mut().insert(ConnectInfo(peer));
        let (status, _, _) = send(&harness.app, first).await;
        assert_eq!(status, StatusCode::OK);

        let mut second = json_request("POST", "/api/generateListing", None, payload.clone());
        second
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 40001))));
        let (status, _, _) = send(&harness.app, second).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let mut elsewhere = json_request("POST", "/api/generateListing", None, payload);
        elsewhere
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 1], 40000))));
        let (status, _, _) = send(&harness.app, elsewhere).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn challenge_without_configured_endpoint_hashes_host_and_path() {
        let server = MockServer::start().await;
        let harness = harness(&server.uri(), &[]);
        let request = Request::builder()
            .uri("/api/ebay/webhook?challenge_code=abc")
            .header("host", "lister.test")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&harness.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["challengeResponse"],
            revocation::challenge_response("abc", "verify-me", "https://lister.test/api/ebay/webhook")
        );
    }
}
