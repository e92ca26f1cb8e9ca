use crate::{
    config::PaymentTerms,
    handlers::*,
    middleware::{access_gate_middleware, rate_limit_middleware, AccessGate, ClientRateLimiter},
    services::{Analytics, AgentBackend, AutoPayer, ChainClient, CreditLedger, PaymentVerifier},
};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};

#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AccessGate>,
    pub verifier: Arc<PaymentVerifier>,
    pub payer: Option<Arc<AutoPayer>>,
    pub ledger: Arc<dyn CreditLedger>,
    pub chain: Arc<dyn ChainClient>,
    pub analytics: Arc<Analytics>,
    pub terms: Arc<PaymentTerms>,
    pub agent: Arc<AgentBackend>,
    pub auto_pay_key: Option<String>,
}

impl AppState {
    /// Wires the gate and verifier over one ledger, chain and set of terms.
    /// Auto-pay stays disabled until `with_payer`.
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<dyn CreditLedger>,
        terms: Arc<PaymentTerms>,
        analytics: Arc<Analytics>,
        agent: Arc<AgentBackend>,
        rejection_ttl: Duration,
    ) -> Self {
        let gate = Arc::new(AccessGate::new(
            ledger.clone(),
            terms.clone(),
            analytics.clone(),
        ));
        let verifier = Arc::new(PaymentVerifier::new(
            chain.clone(),
            ledger.clone(),
            terms.clone(),
            analytics.clone(),
            rejection_ttl,
        ));

        Self {
            gate,
            verifier,
            payer: None,
            ledger,
            chain,
            analytics,
            terms,
            agent,
            auto_pay_key: None,
        }
    }

    pub fn with_payer(mut self, payer: Arc<AutoPayer>, api_key: Option<String>) -> Self {
        self.payer = Some(payer);
        self.auto_pay_key = api_key;
        self
    }
}

pub struct RateLimiters {
    pub global: Arc<ClientRateLimiter>,
    pub verify: Arc<ClientRateLimiter>,
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-wallet-address"),
            HeaderName::from_static("x-auto-pay-key"),
        ])
}

pub fn router(state: AppState, limiters: &RateLimiters, cors: CorsLayer) -> Router {
    let gate = state.gate.clone();
    let verify_limiter = limiters.verify.clone();
    let global_limiter = limiters.global.clone();

    // Paid endpoints (credit claimed before the handler runs)
    let gated = Router::new().route(
        "/api/agent/query",
        post(agent_query).layer(axum_middleware::from_fn(move |req, next| {
            let gate = gate.clone();
            async move { access_gate_middleware(gate, req, next).await }
        })),
    );

    let verification = Router::new().route(
        "/api/verify-payment",
        post(verify_payment).layer(axum_middleware::from_fn(move |req, next| {
            let limiter = verify_limiter.clone();
            async move { rate_limit_middleware(limiter, req, next).await }
        })),
    );

    Router::new()
        // Public endpoints
        .route("/api/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/api/payment-status", get(payment_status))
        .route("/api/agent-auto-pay", post(auto_pay))
        .route("/api/agent-wallet-info", get(wallet_info))
        .merge(gated)
        .merge(verification)
        .with_state(state)
        // Global middleware
        .layer(axum_middleware::from_fn(move |req, next| {
            let limiter = global_limiter.clone();
            async move { rate_limit_middleware(limiter, req, next).await }
        }))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(cors)
}
