//! Command-line driver for sluice subscriptions.
//!
//! # Usage
//!
//! ```bash
//! # Tick five times, one event every 200ms
//! sluice count --count 5 --interval-ms 200
//!
//! # Execute events strictly one after another
//! sluice count --max-in-flight 1
//!
//! # Make the upstream fail at the third event
//! sluice count --fail-at 3
//!
//! # Print the effective service configuration
//! sluice config --config sluice.json
//! ```

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use futures::{stream, StreamExt};
use indexmap::IndexMap;
use serde_json::json;
use sluice_runtime::{
    Field, FieldDef, ObjectDef, OperationDefinition, SchemaBuilder, TypeRef,
};
use sluice_sdk::{
    Context, Document, EventStream, EventStreamError, ResolverMap, ResponseStream, Schema,
    ServiceConfig, SubscriptionService,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// JSON service configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Subscribe to a demo ticker and print every response
    Count(CountArgs),

    /// Print the effective service configuration
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct CountArgs {
    /// Number of events the ticker emits
    #[arg(long, default_value = "3")]
    pub count: u64,

    /// Delay before each event
    #[arg(long, default_value = "250")]
    pub interval_ms: u64,

    /// Events executing at once (overrides the configuration)
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Fail the upstream instead of emitting this event
    #[arg(long)]
    pub fail_at: Option<u64>,
}

/// What a drained response stream produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub responses: usize,
    pub with_errors: usize,
    pub failure: Option<String>,
}

impl Summary {
    pub fn exit_code(&self) -> i32 {
        if self.failure.is_some() {
            1
        } else {
            0
        }
    }
}

pub async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Count(args) => {
            if cli.verbose {
                eprintln!("{} {}", "Config".blue(), serde_json::to_string(&config)?);
            }
            run_count(&args, config, cli.quiet).await
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(0)
        }
    }
}

/// Reads the configuration file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let source = std::fs::read_to_string(path)?;
            let config = ServiceConfig::from_json_str(&source)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => Ok(ServiceConfig::default()),
    }
}

async fn run_count(
    args: &CountArgs,
    mut config: ServiceConfig,
    quiet: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    if let Some(max) = args.max_in_flight {
        config = config.max_in_flight_events(max);
    }
    tracing::info!(
        count = args.count,
        interval_ms = args.interval_ms,
        max_in_flight_events = config.subscription.max_in_flight_events,
        "starting ticker subscription"
    );

    let service = count_service(args, config)?;
    let response = service
        .subscribe(count_document(), None, IndexMap::new(), Context::new())
        .await?;

    let Some(responses) = response.stream else {
        println!("{}", json!({ "data": null, "errors": response.errors }));
        return Ok(0);
    };

    let summary = drain(responses, quiet).await;
    if !quiet {
        match &summary.failure {
            Some(message) => eprintln!("{} {}", "Failed:".red().bold(), message),
            None => println!(
                "{} {} response(s), {} with errors",
                "Done:".green().bold(),
                summary.responses,
                summary.with_errors
            ),
        }
    }
    Ok(summary.exit_code())
}

/// Prints every response of `responses` as one JSON line.
pub async fn drain(mut responses: ResponseStream, quiet: bool) -> Summary {
    let mut summary = Summary::default();
    while let Some(item) = responses.next().await {
        match item {
            Ok(response) => {
                summary.responses += 1;
                let line = response.to_json().to_string();
                if response.is_ok() {
                    println!("{}", line);
                } else {
                    summary.with_errors += 1;
                    println!("{}", line.yellow());
                }
            }
            Err(error) => {
                if !quiet {
                    eprintln!("{} {}", "Error:".red().bold(), error);
                }
                summary.failure = Some(error.to_string());
            }
        }
    }
    summary
}

pub fn count_schema() -> Schema {
    SchemaBuilder::new()
        .subscription_type("Subscription")
        .object(
            ObjectDef::new("Subscription")
                .field(FieldDef::new("count", TypeRef::non_null(TypeRef::named("Int")))),
        )
        .build()
}

pub fn count_document() -> Document {
    Document::new().with_operation(OperationDefinition::subscription().select(Field::new("count")))
}

fn count_service(
    args: &CountArgs,
    config: ServiceConfig,
) -> Result<SubscriptionService, Box<dyn std::error::Error>> {
    let (count, interval, fail_at) = (
        args.count,
        Duration::from_millis(args.interval_ms),
        args.fail_at,
    );
    let mut resolvers = ResolverMap::new();
    resolvers.register_stream("Subscription", "count", move |_, _, _, _| {
        let events = ticker(count, interval, fail_at);
        async move { Ok(Some(events)) }
    });

    Ok(SubscriptionService::builder()
        .schema(count_schema())
        .resolvers(resolvers)
        .config(config)
        .build()?)
}

/// Emits `1..=count`, one every `interval`. At `fail_at` the ticker emits an
/// error and ends.
pub fn ticker(count: u64, interval: Duration, fail_at: Option<u64>) -> EventStream {
    Box::pin(stream::unfold(1u64, move |n| async move {
        if n > count {
            return None;
        }
        tokio::time::sleep(interval).await;
        if fail_at == Some(n) {
            let error = EventStreamError::new(format!("ticker failed at event {}", n));
            return Some((Err(error), count + 1));
        }
        Some((Ok(json!(n)), n + 1))
    }))
}
