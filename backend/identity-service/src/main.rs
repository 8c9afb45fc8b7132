/// Commerce Identity Main Entry Point
///
/// Wires up and runs:
/// - PostgreSQL connection pool and migrations
/// - Redis connection manager (cache and notification streams)
/// - Email service (SMTP) and SMS service (AWS SNS)
/// - Email and phone notification consumers (background tasks)
///
/// The identity flows are served by whatever transport embeds
/// `IdentityService`; this binary keeps the delivery pipeline running.
use anyhow::{Context, Result};
use commerce_identity::{
    cache::{KeyValueCache, RedisCache},
    config::Settings,
    db::PgProfileRepository,
    messaging::{NotificationChannel, RedisStreamChannel, StreamChannelConfig},
    security::{SessionIssuer, TokenRevocationStore},
    services::{
        spawn_notification_consumer, EmailService, IdentityService, NotificationConsumerConfig,
        NotificationRoutes, PasswordResetStore, SmsService, VerificationCodeStore,
    },
};
use redis_utils::RedisPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "commerce_identity=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting Commerce Identity");

    // Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    info!(
        app = %settings.server.app_name,
        environment = %settings.server.environment,
        "Configuration loaded successfully"
    );

    let sessions =
        SessionIssuer::from_settings(&settings.session).context("Invalid session settings")?;
    info!(
        lifetime_hours = sessions.lifetime().num_hours(),
        "Session issuer initialized"
    );

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .min_connections(settings.database.min_connections)
        .idle_timeout(Duration::from_secs(settings.database.idle_timeout))
        .acquire_timeout(Duration::from_secs(settings.database.acquire_timeout))
        .connect(&settings.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!(
        "Database pool initialized with {} max connections",
        settings.database.max_connections
    );

    // Run database migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    // Initialize Redis connection pool
    let redis_pool = RedisPool::connect(&settings.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    let operation_timeout = settings.redis.operation_timeout();
    info!("Redis connection manager initialized");

    let cache: Arc<dyn KeyValueCache> =
        Arc::new(RedisCache::new(redis_pool.manager(), operation_timeout));

    let channel: Arc<dyn NotificationChannel> = Arc::new(RedisStreamChannel::new(
        redis_pool,
        StreamChannelConfig::from_settings(&settings.notifications, &settings.redis),
    ));
    for name in [
        &settings.notifications.email_channel,
        &settings.notifications.phone_channel,
    ] {
        channel
            .declare(name)
            .await
            .with_context(|| format!("Failed to declare notification channel {}", name))?;
    }
    info!(
        group = %settings.notifications.consumer_group,
        consumer = %settings.notifications.consumer_name,
        "Notification channels declared"
    );

    // Initialize email service
    let email_service =
        EmailService::new(&settings.email).context("Failed to initialize email service")?;

    if email_service.is_enabled() {
        info!("Email service initialized with SMTP");
    } else {
        info!("Email service running in no-op mode (SMTP not configured)");
    }

    // Initialize SMS service (AWS SNS, optional)
    let sms_service = SmsService::from_settings(&settings.sms).await;
    if sms_service.is_enabled() {
        info!("SMS service initialized with AWS SNS");
    } else {
        info!("AWS region not configured; SMS service running in no-op mode");
    }

    let codes = VerificationCodeStore::new(cache.clone(), &settings.verification);

    // Spawn notification consumers (background tasks)
    let consumers = vec![
        spawn_notification_consumer(
            channel.clone(),
            codes.clone(),
            Arc::new(email_service),
            NotificationConsumerConfig::email(&settings.notifications),
        ),
        spawn_notification_consumer(
            channel.clone(),
            codes.clone(),
            Arc::new(sms_service),
            NotificationConsumerConfig::phone(&settings.notifications),
        ),
    ];

    let identity = IdentityService::new(
        Arc::new(PgProfileRepository::new(db_pool.clone(), operation_timeout)),
        sessions,
        TokenRevocationStore::new(cache.clone()),
        codes,
        PasswordResetStore::new(cache, settings.verification.password_reset_ttl_secs),
        channel,
        NotificationRoutes::from_settings(&settings.notifications),
    );
    info!(
        session_lifetime_hours = identity.sessions().lifetime().num_hours(),
        "Identity service ready"
    );

    shutdown_signal().await;
    info!("Shutdown signal received, draining notification consumers");

    for consumer in consumers {
        let name = consumer.channel().to_string();
        consumer.shutdown().await;
        info!(channel = %name, "Notification consumer stopped");
    }

    db_pool.close().await;
    info!("Commerce identity shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
