use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod artifacts;
mod clock;
mod config;
mod error;
mod issuer;
mod middleware;
mod models;
mod provisioner;
mod rate_limiter;
mod repositories;
mod routes;
mod session;
mod sweep;
mod validation;
mod validator;

use common::cache::{RedisConfig, RedisPool};
use common::database;
use sqlx::SqlitePool;
use tokio::net::TcpListener;

use crate::artifacts::ArtifactStore;
use crate::clock::{Clock, SystemClock};
use crate::config::{AdminCredentials, AppConfig};
use crate::issuer::LinkIssuer;
use crate::provisioner::Provisioner;
use crate::rate_limiter::{AttemptStore, RateLimiter, RateLimiterConfig};
use crate::repositories::{CertLinkRepository, UserRepository};
use crate::session::{AdminSessions, SessionAuthorizationCache, SessionStore};
use crate::validator::AccessValidator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub admin: Arc<AdminCredentials>,
    pub clock: Arc<dyn Clock>,
    pub user_repository: UserRepository,
    pub link_repository: CertLinkRepository,
    pub issuer: LinkIssuer,
    pub validator: AccessValidator,
    pub artifacts: ArtifactStore,
    pub provisioner: Provisioner,
    pub session_store: SessionStore,
    pub admin_sessions: AdminSessions,
    pub login_limiter: RateLimiter,
    pub link_limiter: RateLimiter,
}

impl AppState {
    /// Wire every component from configuration
    pub fn new(
        config: AppConfig,
        db_pool: SqlitePool,
        redis_pool: Option<RedisPool>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let admin = config.admin_credentials()?;

        let session_store = match redis_pool {
            Some(pool) => SessionStore::redis(pool, clock.clone(), config.session_ttl()),
            None => SessionStore::in_memory(clock.clone(), config.session_ttl()),
        };

        let user_repository = UserRepository::new(db_pool.clone());
        let link_repository = CertLinkRepository::new(db_pool.clone());
        let issuer = LinkIssuer::new(link_repository.clone(), clock.clone(), config.link_ttl());
        let validator = AccessValidator::new(
            link_repository.clone(),
            SessionAuthorizationCache::new(session_store.clone()),
            clock.clone(),
            config.platform_policy,
            config.redemption_policy,
        );

        let artifacts = ArtifactStore::new(config.cert_dir.clone());
        let provisioner = Provisioner::new(
            config.provision_command.clone(),
            config.provision_output_dir.clone(),
            config.cert_dir.clone(),
        );

        let login_limiter = RateLimiter::new(
            RateLimiterConfig::login(),
            AttemptStore::sqlite(db_pool.clone()),
            clock.clone(),
        );
        let link_limiter = RateLimiter::new(
            RateLimiterConfig::link_password(),
            AttemptStore::sqlite(db_pool.clone()),
            clock.clone(),
        );

        Ok(Self {
            db_pool,
            config: Arc::new(config),
            admin: Arc::new(admin),
            clock,
            user_repository,
            link_repository,
            issuer,
            validator,
            artifacts,
            provisioner,
            admin_sessions: AdminSessions::new(session_store.clone()),
            session_store,
            login_limiter,
            link_limiter,
        })
    }
}

fn init_tracing(log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "admin=info,common=info".into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(config.log_json);

    info!("Starting VPN admin service");
    info!(?config, "Configuration loaded");

    // Initialize database connection pool
    let pool = database::init_pool(&config.database()).await?;
    database::run_migrations(&pool).await?;

    // Check database connectivity
    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    // Redis is optional; sessions stay in memory without it
    let redis_pool = match config.redis_url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => Some(RedisPool::new(&RedisConfig {
            url: url.to_string(),
        })?),
        None => {
            info!("REDIS_URL not set, keeping sessions in memory");
            None
        }
    };

    let state = AppState::new(config, pool, redis_pool, Arc::new(SystemClock))?;
    state.artifacts.ensure_dir().await?;

    tokio::spawn(sweep::run_expiry_sweep(
        state.clone(),
        std::time::Duration::from_secs(state.config.expiry_sweep_interval_seconds),
    ));

    // Start the web server
    let bind_address = state.config.bind_address.clone();
    let app = routes::create_router(state);

    let listener = TcpListener::bind(&bind_address).await?;
    info!("VPN admin service listening on {}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
