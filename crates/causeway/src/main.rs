//! Causeway - correlated event pipeline
//!
//! Builds correlated events, sanitizes them, and ships them to a collector.

use anyhow::Context;
use causeway_core::config::{CausewayConfig, ConfigLoader};
use causeway_core::{Actor, CorrelationManager, EventFactory, EventType, Platform, Subject};
use causeway_export::{DeliveryConfig, DeliveryEngine, MemorySink, SinkKind};
use causeway_process::{EventProcessor, ProcessError, ProcessorConfig};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "causeway")]
#[command(version)]
#[command(about = "Correlated event pipeline", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format (json, text)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "CAUSEWAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request -> database -> background job flow through the full pipeline
    Demo {
        /// Sink override (memory, http)
        #[arg(long)]
        sink: Option<String>,
    },

    /// Build, process, and deliver a single event
    Emit {
        /// Event type in domain.verb form
        #[arg(short = 't', long)]
        event_type: String,

        /// Human-readable description
        #[arg(short, long)]
        action: String,

        /// Actor type
        #[arg(long, default_value = "user")]
        actor_type: String,

        /// Actor id
        #[arg(long)]
        actor_id: String,

        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,

        /// Request id for the root correlation context
        #[arg(long)]
        request_id: Option<String>,

        /// Sink override (memory, http)
        #[arg(long)]
        sink: Option<String>,
    },

    /// Inspect or create configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Load and validate configuration, reporting errors
    Check,
    /// Write a default configuration file
    Init {
        /// Destination (defaults to the user config directory)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// The collaborators every pipeline run needs
struct Pipeline {
    factory: EventFactory,
    processor: Arc<EventProcessor>,
    engine: Arc<DeliveryEngine>,
    capture: Option<MemorySink>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { action } = &cli.command {
        init_logging(cli.verbose, "warn", &cli.format)?;
        return config_command(action, cli.config.clone());
    }

    let config = load_config(cli.config.clone());
    init_logging(cli.verbose, &config.service.log_level, &cli.format)?;

    match cli.command {
        Commands::Demo { sink } => demo_command(config, sink).await,
        Commands::Emit {
            event_type,
            action,
            actor_type,
            actor_id,
            metadata,
            request_id,
            sink,
        } => {
            let metadata = match metadata {
                Some(raw) => serde_json::from_str(&raw).context("--metadata must be valid JSON")?,
                None => serde_json::Value::Null,
            };
            emit_command(
                config,
                sink,
                EmitArgs {
                    event_type,
                    action,
                    actor: Actor::new(actor_type, actor_id),
                    metadata,
                    request_id,
                },
            )
            .await
        }
        Commands::Config { .. } => Ok(()),
    }
}

/// CLI verbose flag takes precedence, then config, then default
fn init_logging(verbose: u8, config_level: &str, format: &str) -> anyhow::Result<()> {
    let log_level = if verbose > 0 {
        match verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format.eq_ignore_ascii_case("json") {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn load_config(cli_path: Option<PathBuf>) -> CausewayConfig {
    let loader = ConfigLoader::new().with_cli_path(cli_path);
    match loader.load() {
        Ok(config) => config,
        Err(e) => {
            // logging is not up yet
            eprintln!("Failed to load configuration: {}, using defaults", e);
            CausewayConfig::default()
        }
    }
}

fn build_pipeline(config: &CausewayConfig, sink_override: Option<String>) -> anyhow::Result<Pipeline> {
    let manager = CorrelationManager::from_settings(&config.correlation);
    let factory = EventFactory::new(Platform::from_settings(&config.service), manager);
    let processor = EventProcessor::new(ProcessorConfig::from_settings(&config.processor))
        .context("Failed to build event processor")?;

    let mut delivery = DeliveryConfig::from_settings(&config.delivery);
    if let Some(sink) = sink_override {
        delivery.sink = SinkKind::parse(&sink)
            .with_context(|| format!("Unknown sink `{}` (expected memory or http)", sink))?;
    }

    let (engine, capture) = match delivery.sink {
        SinkKind::Memory => {
            let (engine, sink) = DeliveryEngine::with_memory_sink(delivery);
            (engine, Some(sink))
        }
        SinkKind::Http => {
            info!(endpoint = %delivery.endpoint, "Delivering to collector");
            (DeliveryEngine::from_config(delivery), None)
        }
    };
    engine.start();

    Ok(Pipeline {
        factory,
        processor: Arc::new(processor),
        engine: Arc::new(engine),
        capture,
    })
}

async fn demo_command(config: CausewayConfig, sink: Option<String>) -> anyhow::Result<()> {
    let sink = sink.or_else(|| Some("memory".to_string()));
    let pipeline = build_pipeline(&config, sink)?;
    let manager = pipeline.factory.manager().clone();

    println!();
    println!("  Causeway v{} - DEMO", env!("CARGO_PKG_VERSION"));
    println!("  request -> database -> background job");
    println!();

    let snapshot = manager
        .scope(async {
            manager.start_request_context("req_demo", Some("sess_demo".to_string()), HashMap::new());
            let web = pipeline
                .factory
                .event(EventType::HttpRequest, "POST /orders", Actor::user("42"))
                .metadata(serde_json::json!({
                    "path": "/orders",
                    "headers": { "Authorization": "Bearer abc123" },
                }))
                .build();
            submit(&pipeline, &web).await;

            manager.create_child_context("database", "update", HashMap::new())?;
            let db = pipeline
                .factory
                .event(EventType::DataChange, "Updated order 1001", Actor::user("42"))
                .subject(Subject::new("order", "1001"))
                .metadata(serde_json::json!({
                    "changes": { "status": ["pending", "paid"] },
                    "customer_note": "call me at 555-123-4567",
                }))
                .build();
            submit(&pipeline, &db).await;

            let snapshot = manager
                .extract_correlation_data()
                .context("database context vanished")?;
            Ok::<_, anyhow::Error>(snapshot)
        })
        .await?;

    // the job runs in its own task and only sees the snapshot
    let job = {
        let job_manager = manager.clone();
        let factory = pipeline.factory.clone();
        manager.spawn(async move {
            job_manager.inherit_context(&snapshot, "job", HashMap::new());
            factory
                .event(EventType::JobPerform, "Sent order confirmation", Actor::system("mailer"))
                .metadata(serde_json::json!({ "recipient": "jane@example.com" }))
                .build()
        })
    };
    let job = job.await.context("job task failed")?;
    submit(&pipeline, &job).await;

    let result = pipeline.engine.shutdown().await;
    info!(status = %result.status, events = result.events, "Final flush");

    if let Some(capture) = &pipeline.capture {
        for event in capture.events() {
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
    }

    println!();
    println!("Health:");
    println!("{}", serde_json::to_string_pretty(&pipeline.engine.health_status())?);
    println!("Metrics:");
    println!("{}", serde_json::to_string_pretty(&pipeline.engine.metrics().to_json())?);
    println!("Processor:");
    println!("{}", serde_json::to_string_pretty(&pipeline.processor.stats())?);
    Ok(())
}

struct EmitArgs {
    event_type: String,
    action: String,
    actor: Actor,
    metadata: serde_json::Value,
    request_id: Option<String>,
}

async fn emit_command(config: CausewayConfig, sink: Option<String>, args: EmitArgs) -> anyhow::Result<()> {
    let pipeline = build_pipeline(&config, sink)?;
    let factory = &pipeline.factory;
    let manager = factory.manager();

    let event = manager
        .scope(async move {
            let request_id = args.request_id.unwrap_or_else(|| "cli".to_string());
            manager.start_request_context(request_id, None, HashMap::new());
            factory
                .event(args.event_type, args.action, args.actor)
                .metadata(args.metadata)
                .build()
        })
        .await;

    if let Err(e) = event.validate() {
        anyhow::bail!("{}", e);
    }

    let processed = match pipeline.processor.process(&event) {
        Ok(Some(processed)) => processed,
        Ok(None) => {
            println!("Event {} sampled out", event.event_id());
            return Ok(());
        }
        Err(e) => anyhow::bail!("Event rejected: {}", e),
    };
    println!("{}", serde_json::to_string_pretty(&processed)?);

    pipeline.engine.deliver(processed).await;
    let result = pipeline.engine.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        warn!(status = %result.status, "Delivery failed");
    }
    Ok(())
}

/// Process and deliver, dropping the event on rejection the way an adapter would
async fn submit(pipeline: &Pipeline, event: &causeway_core::UniversalEvent) {
    match pipeline.processor.process(event) {
        Ok(Some(processed)) => {
            let result = pipeline.engine.deliver(processed).await;
            if !result.success {
                warn!(event_id = event.event_id(), status = %result.status, "Delivery failed");
            }
        }
        Ok(None) => info!(event_id = event.event_id(), "Sampled out"),
        Err(ProcessError::PayloadTooLarge { size, limit }) => {
            warn!(event_id = event.event_id(), size, limit, "Dropped oversized event")
        }
        Err(e) => error!(event_id = event.event_id(), "Dropped event: {}", e),
    }
}

fn config_command(action: &ConfigCommand, cli_path: Option<PathBuf>) -> anyhow::Result<()> {
    let loader = ConfigLoader::new().with_cli_path(cli_path);

    match action {
        ConfigCommand::Show => {
            let config = loader.load()?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommand::Check => match loader.load() {
            Ok(config) => {
                println!("Configuration OK");
                println!("  service:  {} ({})", config.service.name, config.service.environment);
                println!("  sink:     {}", config.delivery.sink);
                println!("  endpoint: {}", config.delivery.endpoint);
                println!("  sampling: {} @ {}", config.processor.sampling_mode, config.processor.sample_rate);
            }
            Err(e) => {
                error!("Configuration invalid: {}", e);
                anyhow::bail!("Configuration invalid: {}", e);
            }
        },
        ConfigCommand::Init { path, force } => {
            let path = match path.clone().or_else(ConfigLoader::default_config_path) {
                Some(path) => path,
                None => anyhow::bail!("No config directory found; pass a path"),
            };
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            loader.save(&CausewayConfig::default(), &path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
