//! Exchange server entry point.
//!
//! Wires up the three pinned workers and their queues:
//! - OrderGateway: TCP front door for client order flow
//! - MatchingEngine: per-ticker books, matching, responses
//! - MarketDataPublisher: sequenced UDP multicast of market updates
//!
//! Exit codes: 0 on normal shutdown, 1 on configuration or startup
//! failure, 2 on a fatal invariant violation at runtime.

use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use matchbook_common::logging::{self, LogLevel};
use matchbook_common::{log_error, log_info};
use matchbook_exchange::market_data::{MarketDataPublisher, MarketDataPublisherConfig};
use matchbook_exchange::matching_engine::MatchingEngine;
use matchbook_exchange::order_gateway::OrderGateway;
use matchbook_exchange::protocol::{ClientRequestQueue, ClientResponseQueue, MarketUpdateQueue};

/// Low-latency trading exchange server
#[derive(Parser, Debug)]
#[command(name = "matchbook-exchange")]
#[command(about = "Order matching engine and client order gateway")]
struct Args {
    /// Interface address to listen on for client connections
    #[arg(short, long, default_value = "0.0.0.0")]
    interface: String,

    /// TCP port for client connections
    #[arg(short, long, default_value_t = 12345)]
    port: u16,

    /// CPU core to pin the gateway thread to
    #[arg(long)]
    gateway_cpu: Option<usize>,

    /// CPU core to pin the matching engine thread to
    #[arg(long)]
    engine_cpu: Option<usize>,

    /// Multicast group address for market data
    #[arg(long, default_value = "239.255.0.1")]
    md_addr: String,

    /// Multicast port for market data
    #[arg(long, default_value_t = 5000)]
    md_port: u16,

    /// Multicast TTL (1 = local network only)
    #[arg(long, default_value_t = 1)]
    md_ttl: u32,

    /// Minimum log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let Some(log_level) = LogLevel::parse(&args.log_level) else {
        eprintln!("invalid log level: {}", args.log_level);
        std::process::exit(1);
    };
    logging::init(log_level);

    // A fatal invariant violation panics on the violating thread; refuse
    // to continue in an inconsistent state.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        logging::logger().flush();
        std::process::exit(2);
    }));

    let requests: Arc<ClientRequestQueue> = Arc::from(ClientRequestQueue::new_boxed());
    let responses: Arc<ClientResponseQueue> = Arc::from(ClientResponseQueue::new_boxed());
    let updates: Arc<MarketUpdateQueue> = Arc::from(MarketUpdateQueue::new_boxed());

    let engine = MatchingEngine::new(
        Arc::clone(&requests),
        Arc::clone(&responses),
        Arc::clone(&updates),
    );

    let gateway = match OrderGateway::new(
        &args.interface,
        args.port,
        Arc::clone(&requests),
        Arc::clone(&responses),
    ) {
        Ok(gateway) => gateway,
        Err(e) => {
            log_error!("failed to start order gateway on {}:{}: {}", args.interface, args.port, e);
            logging::logger().flush();
            std::process::exit(1);
        }
    };

    let md_config = MarketDataPublisherConfig {
        multicast_addr: args.md_addr.clone(),
        port: args.md_port,
        interface: args.interface.clone(),
        ttl: args.md_ttl,
        ..Default::default()
    };
    let publisher = match MarketDataPublisher::new(md_config, Arc::clone(&updates)) {
        Ok(publisher) => publisher,
        Err(e) => {
            log_error!("failed to create market data publisher: {}", e);
            logging::logger().flush();
            std::process::exit(1);
        }
    };

    log_info!(
        "starting exchange: orders on {}:{}, market data on {}:{}",
        args.interface,
        args.port,
        args.md_addr,
        args.md_port
    );

    let mut engine_handle = engine.start(args.engine_cpu);
    let mut gateway_handle = gateway.start(args.gateway_cpu);
    let mut publisher_handle = publisher.start(None);

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrlc = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        running_ctrlc.store(false, Ordering::SeqCst);
    }) {
        log_error!("failed to install signal handler: {}", e);
        logging::logger().flush();
        std::process::exit(1);
    }

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    log_info!("shutdown signal received");
    gateway_handle.stop();
    engine_handle.stop();
    publisher_handle.stop();

    log_info!("exchange stopped");
    logging::logger().flush();
}
