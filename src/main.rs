//! VibeMQ KV - inspect broker state held in the key-value store
//!
//! Usage:
//!   vibemq-kv [OPTIONS] <COMMAND>
//!
//! Commands:
//!   count-offline              Offline client and subscription counters
//!   retained <PATTERN>         Retained messages matching a topic filter
//!   subscribers <TOPIC>        QoS > 0 subscriptions whose filter matches a topic
//!   subscriptions <CLIENT>     Subscriptions of a client
//!   outgoing <CLIENT>          Queued outgoing packets of a client
//!   wills [--live <BROKER>]... Wills owned by brokers that are not live
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use futures_util::TryStreamExt;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vibemq_kv::config::Config;
use vibemq_kv::persistence::{Packet, Persistence};
use vibemq_kv::topic::validate_topic_filter;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// VibeMQ KV - broker state in a key-value store
#[derive(Parser, Debug)]
#[command(name = "vibemq-kv")]
#[command(author = "VibeMQ Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Inspect VibeMQ broker state held in a key-value store")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Offline client and subscription counters
    CountOffline,
    /// Retained messages matching a topic filter
    Retained {
        /// Topic filter, may contain wildcards
        pattern: String,
    },
    /// QoS > 0 subscriptions whose filter matches a topic
    Subscribers {
        /// Topic, or a filter checked level by level against stored filters
        topic: String,
    },
    /// Subscriptions of a client
    Subscriptions {
        /// Client identifier
        client_id: String,
    },
    /// Queued outgoing packets of a client
    Outgoing {
        /// Client identifier
        client_id: String,
    },
    /// Wills owned by brokers that are not live
    Wills {
        /// Broker ids that are still alive (repeatable)
        #[arg(long = "live")]
        live: Vec<String>,
    },
}

fn print_packet(packet: &Packet) {
    println!(
        "{} qos={} retain={} mid={} broker={}:{} client={} payload={}",
        packet.topic,
        packet.qos as u8,
        packet.retain,
        packet
            .message_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        packet.broker_id.as_deref().unwrap_or("-"),
        packet.broker_counter,
        packet.client_id.as_deref().unwrap_or("-"),
        String::from_utf8_lossy(&packet.payload),
    );
}

async fn run(persistence: &Persistence, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::CountOffline => {
            let count = persistence.count_offline().await?;
            println!("clients={} subscriptions={}", count.clients, count.subscriptions);
        }
        Command::Retained { pattern } => {
            validate_topic_filter(&pattern)?;
            let mut stream = persistence.create_retained_stream(&pattern);
            while let Some(packet) = stream.try_next().await? {
                print_packet(&packet);
            }
        }
        Command::Subscribers { topic } => {
            validate_topic_filter(&topic)?;
            for sub in persistence.subscriptions_by_topic(&topic).await? {
                println!("{} {} qos={}", sub.client_id, sub.topic, sub.qos as u8);
            }
        }
        Command::Subscriptions { client_id } => {
            match persistence.subscriptions_by_client(&client_id).await? {
                Some(subs) => {
                    for sub in subs {
                        println!("{} qos={}", sub.topic, sub.qos as u8);
                    }
                }
                None => println!("no subscriptions for {}", client_id),
            }
        }
        Command::Outgoing { client_id } => {
            let mut stream = persistence.outgoing_stream(&client_id);
            while let Some(packet) = stream.try_next().await? {
                print_packet(&packet);
            }
        }
        Command::Wills { live } => {
            let mut stream = persistence.stream_will(live);
            while let Some(packet) = stream.try_next().await? {
                print_packet(&packet);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise env overrides only
    let config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (warn)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let persistence = Persistence::open(&config)?;
    let result = run(&persistence, args.command).await;
    persistence.destroy().await?;
    result
}
