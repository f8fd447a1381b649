use crate::clock::Clock;
use crate::config::{AppConfig, ConfigError};
use crate::ebay::{Gateway, OAuthClient};
use crate::guard::TokenGuard;
use crate::idempotency::IdempotencyCache;
use crate::llm::{GeminiClient, ListingGenerator};
use crate::oauth::OAuthFlow;
use crate::ratelimit::TokenBuckets;
use crate::revocation::RevocationHandler;
use crate::session::SessionManager;
use crate::store::Store;
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use std::sync::Arc;

/// Everything handlers need, built once at startup and cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub sessions: SessionManager,
    pub oauth: OAuthFlow,
    pub guard: TokenGuard,
    pub revocation: RevocationHandler,
    pub gateway: Gateway,
    pub generator: Arc<dyn ListingGenerator>,
    pub limiter: TokenBuckets,
    pub idempotency: Arc<IdempotencyCache>,
    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn assemble(
        config: AppConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        http: Client,
        idempotency: IdempotencyCache,
        prometheus_handle: Option<PrometheusHandle>,
    ) -> Result<Self, ConfigError> {
        let sessions = SessionManager::new(&config.session, store.clone(), clock.clone())?;
        let gateway = Gateway::new(http.clone());
        let oauth_client = OAuthClient::new(http, config.ebay.clone());
        let oauth = OAuthFlow::new(
            store.clone(),
            oauth_client.clone(),
            gateway.clone(),
            clock.clone(),
        );
        let guard = TokenGuard::new(
            store.clone(),
            oauth_client.clone(),
            clock.clone(),
            config.refresh_policy,
        );
        let revocation = RevocationHandler::new(store.clone(), oauth_client, clock.clone());
        let generator: Arc<dyn ListingGenerator> =
            Arc::new(GeminiClient::new(gateway.clone(), config.llm.clone()));
        let limiter = TokenBuckets::new(config.rate_limit);
        Ok(Self {
            config: Arc::new(config),
            store,
            clock,
            sessions,
            oauth,
            guard,
            revocation,
            gateway,
            generator,
            limiter,
            idempotency: Arc::new(idempotency),
            prometheus_handle,
        })
    }
}
