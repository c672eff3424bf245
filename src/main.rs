use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stepsync::cli::{Cli, Commands, RunArgs};
use stepsync::clock::{beijing, Clock, SystemClock};
use stepsync::config::{self, Config};
use stepsync::executor::AccountExecutor;
use stepsync::models::{AccountIdentity, Tier, TokenMap};
use stepsync::notification::{PushPlusReporter, ReportDispatcher, WebhookReporter};
use stepsync::remote::ZeppClient;
use stepsync::scheduler::Scheduler;
use stepsync::store::TokenStore;
use stepsync::vault::{TokenKey, VaultCrypto};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_once(&cli.args).await,
        Commands::Daemon { interval } => {
            run_daemon(&cli.args, Duration::from_secs(interval.max(1))).await
        }
        Commands::Tokens => show_tokens(&cli.args),
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    opentelemetry::global::shutdown_tracer_provider();
    result
}

/// fmt layer always; OTLP export only when an endpoint is configured.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "stepsync"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "stepsync=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
    Ok(())
}

fn load_config(args: &RunArgs) -> anyhow::Result<Config> {
    // Prompts read stdin synchronously.
    let cfg = tokio::task::block_in_place(|| config::load(args))?;
    tracing::debug!(config = ?cfg, "configuration resolved");
    Ok(cfg)
}

fn token_store(cfg: &Config) -> Option<TokenStore> {
    cfg.token_key
        .clone()
        .map(|key| TokenStore::new(cfg.token_file.clone(), Box::new(VaultCrypto::new(key))))
}

fn report_dispatcher(cfg: &Config) -> anyhow::Result<ReportDispatcher> {
    let mut dispatcher = ReportDispatcher::new(cfg.report_hour, cfg.push_max);
    if let Some(token) = &cfg.push_plus_token {
        dispatcher = dispatcher.add_reporter(Box::new(PushPlusReporter::new(token.clone())?));
    }
    if !cfg.webhook_urls.is_empty() {
        dispatcher = dispatcher.add_reporter(Box::new(WebhookReporter::new(
            cfg.webhook_urls.clone(),
            cfg.webhook_secret.clone(),
        )?));
    }
    Ok(dispatcher)
}

/// Build a scheduler for one batch. The step range is re-scaled per batch
/// when time-of-day scaling is on.
fn build_scheduler(cfg: &Config) -> anyhow::Result<Scheduler> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let remote = Arc::new(
        ZeppClient::new(cfg.request_timeout).context("failed to build remote service client")?,
    );

    let mut scheduler_cfg = cfg.scheduler_config();
    if cfg.scale_by_time {
        scheduler_cfg.steps = scheduler_cfg.steps.scaled_by_time_of_day(beijing(clock.now()));
        tracing::info!(steps = %scheduler_cfg.steps, "scaled step range by time of day");
    }

    let executor = AccountExecutor::new(remote, clock);
    let mut scheduler = Scheduler::new(scheduler_cfg, executor).with_reporter(report_dispatcher(cfg)?);
    if let Some(store) = token_store(cfg) {
        scheduler = scheduler.with_store(store);
    }
    Ok(scheduler)
}

fn initial_tokens(cfg: &Config) -> TokenMap {
    token_store(cfg).map(|store| store.load()).unwrap_or_default()
}

async fn run_once(args: &RunArgs) -> anyhow::Result<()> {
    let cfg = load_config(args)?;
    let mut tokens = initial_tokens(&cfg);
    let scheduler = build_scheduler(&cfg)?;

    let batch = scheduler
        .run(&cfg.identities, &cfg.secrets, &mut tokens)
        .await?;

    for result in &batch.results {
        println!(
            "{:<20} {:<8} {}",
            result.identity.redacted(),
            if result.success() { "ok" } else { "FAILED" },
            result.message()
        );
        tracing::debug!(
            account = %result.identity.redacted(),
            trace = ?result.trace_lines(),
            "token decisions"
        );
    }
    println!("{}", batch.summary());
    Ok(())
}

async fn run_daemon(args: &RunArgs, interval: Duration) -> anyhow::Result<()> {
    let cfg = load_config(args)?;
    let mut tokens = initial_tokens(&cfg);
    tracing::info!(interval_secs = interval.as_secs(), "daemon started");

    loop {
        let scheduler = build_scheduler(&cfg)?;
        match scheduler.run(&cfg.identities, &cfg.secrets, &mut tokens).await {
            Ok(batch) => {
                tracing::info!(summary = %batch.summary(), "batch complete, waiting for next run")
            }
            Err(e) if e.is_batch_fatal() => return Err(e.into()),
            Err(e) => tracing::error!(error = %e, "batch failed, waiting for next run"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping daemon");
                break;
            }
        }
    }
    Ok(())
}

fn show_tokens(args: &RunArgs) -> anyhow::Result<()> {
    let raw_key = std::env::var("AES_KEY")
        .ok()
        .or_else(|| args.aes_key.clone())
        .context("AES_KEY or --aes-key is required to read the token file")?;
    let key = TokenKey::parse(&raw_key)?;
    let store = TokenStore::new(args.token_file.clone(), Box::new(VaultCrypto::new(key)));

    let Some(tokens) = store
        .try_load()
        .with_context(|| format!("failed to read {}", store.path().display()))?
    else {
        println!("No token file at {}.", store.path().display());
        return Ok(());
    };

    if tokens.is_empty() {
        println!("No cached tokens.");
        return Ok(());
    }

    let now = SystemClock.now();
    let age = |bundle: &stepsync::models::CredentialBundle, tier: Tier| match bundle.tier(tier) {
        Some(token) => {
            let hours = token.age(now).num_hours();
            let mark = if token.is_fresh(tier, now) { "" } else { " (stale)" };
            format!("{hours}h{mark}")
        }
        None => "-".to_string(),
    };

    println!(
        "{:<20} {:<14} {:<14} {:<14} {:<8} DEVICE",
        "ACCOUNT", "ACCESS", "LOGIN", "APP", "USER_ID"
    );
    for (identity, bundle) in &tokens {
        println!(
            "{:<20} {:<14} {:<14} {:<14} {:<8} {}",
            AccountIdentity::parse(identity).redacted(),
            age(bundle, Tier::Access),
            age(bundle, Tier::Login),
            age(bundle, Tier::App),
            if bundle.user_id.is_some() { "yes" } else { "no" },
            bundle.device_id()
        );
    }
    Ok(())
}
