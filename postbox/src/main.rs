use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use postbox::auth::{CookieConfig, JwtConfig, TriggerSecrets};
use postbox::crypto::EncryptionKey;
use postbox::enrich::HttpCompanyLookup;
use postbox::mail::TransportPool;
use postbox::queue::{CronTrigger, Drain, Processor, Trigger, TriggerSource};
use postbox::state::AppState;
use postbox::store::PgStore;
use postbox::{routes, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "postbox", about = "Scheduled, encrypted bulk email delivery")]
struct Cli {
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API, the drain loop and the built-in cron trigger
    Serve {
        /// Rely on an external scheduler calling /api/cron/process
        #[arg(long, default_value_t = false)]
        no_cron: bool,
    },
    /// Run a single batch and print the report
    Process {
        /// Lift the retry ceiling and retry FAILED jobs
        #[arg(long, default_value_t = false)]
        manual: bool,
    },
    /// Print a fresh base64 ENCRYPTION_KEY
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Keygen => {
            println!("{}", EncryptionKey::generate_base64());
            Ok(())
        }
        Commands::Process { manual } => {
            let settings = Settings::load().context("failed to load settings")?;
            let (_, processor) = connect(&settings).await?;
            let trigger = if manual {
                Trigger::manual(TriggerSource::Cli)
            } else {
                Trigger::automatic(TriggerSource::Cli)
            };
            let report = processor
                .run_batch(trigger)
                .await
                .context("batch failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Serve { no_cron } => {
            let settings = Settings::load().context("failed to load settings")?;
            serve(settings, no_cron).await
        }
    }
}

async fn connect(settings: &Settings) -> Result<(Arc<PgStore>, Arc<Processor>)> {
    let store = Arc::new(
        PgStore::connect(&settings.database_url)
            .await
            .context("could not connect to database_url")?,
    );
    store.migrate().await.context("failed to run migrations")?;

    let lookup = HttpCompanyLookup::new().context("failed to build http client")?;
    let processor = Processor::new(
        store.clone(),
        Arc::new(TransportPool::new()),
        Arc::new(lookup),
        settings.encryption_key.clone(),
        settings.public_url.clone(),
    )
    .batch_size(settings.batch_size);

    Ok((store, Arc::new(processor)))
}

async fn serve(settings: Settings, no_cron: bool) -> Result<()> {
    let (store, processor) = connect(&settings).await?;

    let (drain, drain_handle) = Drain::new(processor.clone(), settings.max_continuations);
    drain.start();

    if no_cron {
        tracing::info!("built-in cron trigger disabled");
    } else {
        let mut cron = CronTrigger::new().await?;
        cron.every(&settings.cron_schedule, processor.clone(), drain_handle.clone())
            .await
            .context("invalid CRON_SCHEDULE")?;
        cron.start().await?;
    }

    let jwt = JwtConfig::new(&settings.hmac_key)
        .context("invalid HMAC_KEY")?
        .cookie_config(CookieConfig::default().secure(settings.is_production()))
        .build();

    if settings.is_production() && settings.cron_secret.is_none() {
        tracing::warn!("CRON_SECRET is not set, external schedulers cannot trigger the queue");
    }

    let state = AppState {
        campaigns: store.clone(),
        users: store,
        processor,
        drain: drain_handle,
        jwt,
        key: settings.encryption_key.clone(),
        secrets: TriggerSecrets {
            cron_secret: settings.cron_secret.clone(),
            bypass_secret: settings.bypass_secret.clone(),
            production: settings.is_production(),
        },
    };

    postbox::serve((Ipv4Addr::UNSPECIFIED, settings.port), routes::router(state))
        .await
        .context("error running HTTP server")?;
    Ok(())
}
