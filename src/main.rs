//! Gatekeeper - chat-driven account registration with paced delivery

use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::{
    bot::{self, Dispatcher, DispatcherConfig, DispatcherDeps, Tutorials},
    config::Args,
    delivery::{DelayedPushScheduler, DeliveryFunnel, FunnelConfig, SchedulerConfig},
    limits::{spawn_cleanup_task, ConcurrencySemaphore, RateLimiter, RateLimiterConfig},
    membership::{spawn_purge_task, MembershipCache, MembershipCacheConfig},
    registration::{
        OrchestratorConfig, OrchestratorDeps, RandomIdentityGenerator, RegistrationOrchestrator,
        RegistrationStore,
    },
    server::{self, AppState},
    services::{
        AccountApiConfig, FastEntryLinks, HttpAccountApi, LoginTokenCache, TelegramClient,
        TelegramConfig,
    },
    signing::LinkBuilder,
};

/// How often idle rate-limiter windows are pruned
const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// How often expired membership entries are purged
const MEMBERSHIP_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    let Some(bot_token) = args.bot_token().map(str::to_string) else {
        error!("TELEGRAM_BOT_TOKEN is not set");
        std::process::exit(1);
    };
    if let Err(e) = args.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Gatekeeper");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Store: {}", args.registered_file().display());
    info!(
        "Registration: {}/{}s global, {}/{}s per user, {} concurrent",
        args.registration.global_points,
        args.registration.global_duration,
        args.registration.per_user_points,
        args.registration.per_user_duration,
        args.registration.max_concurrency
    );
    info!(
        "Delivery: {}/s global, {}/s per chat",
        args.delivery.global_per_sec, args.delivery.per_chat_per_sec
    );
    info!("Required groups: {}", args.required_chat_id_list().len());
    info!("======================================");

    let store = Arc::new(RegistrationStore::open(args.registered_file()).await?);
    info!("Loaded {} registration(s)", store.len());

    let telegram = Arc::new(TelegramClient::new(TelegramConfig {
        api_url: args.telegram_api_url.clone(),
        request_timeout: args.request_timeout(),
        ..TelegramConfig::new(bot_token)
    })?);
    let account_api = Arc::new(HttpAccountApi::new(AccountApiConfig {
        register_url: args.account.register_url.clone(),
        login_url: args.account.login_url.clone(),
        channel: args.account.channel.clone(),
        timeout: args.request_timeout(),
    })?);

    let funnel = DeliveryFunnel::new(
        FunnelConfig {
            global_per_sec: args.delivery.global_per_sec,
            per_recipient_per_sec: args.delivery.per_chat_per_sec,
        },
        telegram.clone(),
    );
    let tutorials = Arc::new(Tutorials::new(
        funnel.clone(),
        args.delivery.win_tutorial_images(),
        args.delivery.dana_form_url.clone(),
    ));
    let scheduler = DelayedPushScheduler::new(
        SchedulerConfig {
            delay_min: Duration::from_millis(args.delivery.tutorial_delay_min_ms),
            delay_max: Duration::from_millis(args.delivery.tutorial_delay_max_ms),
        },
        tutorials.clone(),
    );

    let global_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(
        args.registration.global_points,
        args.registration.global_duration,
    )));
    let user_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(
        args.registration.per_user_points,
        args.registration.per_user_duration,
    )));
    spawn_cleanup_task(
        vec![global_limiter.clone(), user_limiter.clone()],
        LIMITER_CLEANUP_INTERVAL,
    );

    let orchestrator = Arc::new(RegistrationOrchestrator::new(
        OrchestratorDeps {
            store: store.clone(),
            api: account_api.clone(),
            identity: Arc::new(RandomIdentityGenerator),
            global_limiter,
            user_limiter,
            semaphore: ConcurrencySemaphore::new(args.registration.max_concurrency),
        },
        OrchestratorConfig::default(),
    ));
    let membership = Arc::new(MembershipCache::new(
        MembershipCacheConfig {
            required_groups: args.required_chat_id_list(),
            ttl: Duration::from_secs(args.membership_cache_ttl_sec),
        },
        telegram.clone(),
    ));
    if membership.is_enabled() {
        spawn_purge_task(membership.clone(), MEMBERSHIP_PURGE_INTERVAL);
    }
    let links = LinkBuilder::new(&args.public_base_url, &args.one_tap_secret).map(Arc::new);
    let fast_entry = Arc::new(FastEntryLinks::new(
        store.clone(),
        account_api,
        LoginTokenCache::default(),
        args.main_site_url.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherDeps {
            api: telegram.clone(),
            store: store.clone(),
            orchestrator: orchestrator.clone(),
            membership: membership.clone(),
            funnel,
            scheduler: scheduler.clone(),
            tutorials,
            fast_entry,
            links: links.clone(),
        },
        DispatcherConfig {
            register_cooldown: Duration::from_millis(args.registration.cooldown_ms),
            show_test_links: args.show_test_links,
        },
    ));

    let state = Arc::new(AppState {
        args,
        store,
        orchestrator,
        membership,
        scheduler,
        links,
        started_at: Instant::now(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut http = tokio::spawn(server::run(state, shutdown_rx.clone()));

    if let Err(e) = telegram.delete_webhook(true).await {
        warn!("Could not delete webhook: {}", e);
    }
    let polling = tokio::spawn(bot::run_polling(dispatcher, shutdown_rx));
    info!("Bot running");

    let http_failure = tokio::select! {
        _ = shutdown_signal() => None,
        finished = &mut http => match finished {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(anyhow::anyhow!("HTTP server failed: {}", e)),
            Err(e) => Some(anyhow::anyhow!("HTTP server task failed: {}", e)),
        },
    };

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = polling.await {
        error!("Bot loop ended abnormally: {}", e);
    }
    if !http.is_finished() {
        let _ = http.await;
    }

    match http_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("gatekeeper={},info", args.log_level).into());
    let json = args.log_format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
