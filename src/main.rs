use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use x402_agent::{
    app::{cors_layer, router, AppState, RateLimiters},
    config::{Config, LedgerBackend},
    middleware::ClientRateLimiter,
    services::*,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("x402_agent=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting x402 agent gateway v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    let terms = Arc::new(config.payment_terms()?);
    tracing::info!(
        network = %terms.network,
        chain_id = terms.chain_id,
        receiver = %terms.receiver,
        price = %terms.required_native,
        "Payment terms loaded"
    );

    // Initialize services
    let chain: Arc<dyn ChainClient> = Arc::new(EthereumChain::new(
        &config.rpc_url,
        config.chain_id,
        config.confirmation_timeout,
    )?);

    let ledger: Arc<dyn CreditLedger> = match config.ledger_backend {
        LedgerBackend::Redis => Arc::new(
            RedisLedger::connect(&config.redis_url, &config.ledger_key_prefix)
                .await
                .context("Failed to connect to the Redis ledger")?,
        ),
        LedgerBackend::Memory => {
            tracing::warn!("Using the in-memory ledger; credits are lost on restart");
            Arc::new(MemoryLedger::new())
        }
    };

    let analytics = Arc::new(Analytics::new());
    let agent = Arc::new(AgentBackend::new(config.agent_backend_url.clone())?);

    let mut state = AppState::new(
        chain.clone(),
        ledger,
        terms.clone(),
        analytics.clone(),
        agent,
        config.rejection_cache_ttl,
    );

    if let Some(private_key) = config.agent_private_key.as_deref() {
        let payer = AutoPayer::new(
            chain,
            private_key,
            AutoPayerSettings {
                recipient: config.payment_receiver_address,
                amount: terms.required_atomic,
                gas_buffer: config.gas_buffer()?,
                confirmations: config.auto_pay_confirmations,
                network: terms.network.clone(),
            },
            analytics,
        )?;
        state = state.with_payer(Arc::new(payer), config.auto_pay_api_key.clone());
    } else {
        tracing::info!("AGENT_PRIVATE_KEY not set, auto-pay disabled");
    }

    let proxies = config.proxy_allowlist();
    if !proxies.is_empty() {
        tracing::info!(?proxies, "Honouring x-forwarded-for from trusted proxies");
    }
    let limiters = RateLimiters {
        global: Arc::new(
            ClientRateLimiter::new("global", &config.global_rate_limit)
                .with_trusted_proxies(proxies.clone()),
        ),
        verify: Arc::new(
            ClientRateLimiter::new("verify", &config.verify_rate_limit)
                .with_trusted_proxies(proxies),
        ),
    };
    spawn_limiter_cleanup(&limiters);

    let app = router(state, &limiters, cors_layer(&config.cors_origins));

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/api/health", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

fn spawn_limiter_cleanup(limiters: &RateLimiters) {
    let global = limiters.global.clone();
    let verify = limiters.verify.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            global.retain_recent();
            verify.retain_recent();
            tracing::debug!(
                global = global.tracked_clients(),
                verify = verify.tracked_clients(),
                "Rate limiter state pruned"
            );
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl+c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gracefully...");
}
