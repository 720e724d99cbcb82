use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ethereal_adapter::{AdapterConfig, Ethereal, OrderParams};
use ethereal_core::{OrderPurpose, OrderType, Side};
use ethereal_rounding::parse_decimal;
use ethereal_simulated::{SimulatedVenue, SimulatedVenueConfig};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ethereal")]
#[command(about = "Ethereal perpetuals venue: markets, account state and order normalization")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "ETHEREAL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Run against an in-memory venue instead of the REST API
    #[arg(long)]
    simulated: bool,

    /// REST API base URL
    #[arg(long, env = "ETHEREAL_BASE_URL")]
    base_url: Option<String>,

    /// Wallet address whose subaccounts are used
    #[arg(long, env = "ETHEREAL_WALLET_ADDRESS")]
    wallet_address: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Snap a price and quantity onto a market's grid
    Normalize {
        /// Unified symbol (e.g. "BTC/USD:USD")
        #[arg(short, long)]
        symbol: String,

        /// buy or sell
        #[arg(long)]
        side: Side,

        /// Limit or trigger price; omit for market orders
        #[arg(short, long, value_parser = parse_decimal)]
        price: Option<Decimal>,

        #[arg(short, long, value_parser = parse_decimal)]
        amount: Decimal,

        /// Round as a closing (reduce-only, TP/SL) order
        #[arg(long)]
        close: bool,
    },

    /// List markets and their trading rules
    Markets {
        /// Bypass the market cache
        #[arg(long)]
        reload: bool,
    },

    /// Show best bid/ask and oracle price
    Ticker {
        /// Symbols to show; all markets when omitted
        symbols: Vec<String>,
    },

    /// Show subaccount balances
    Balance,

    /// Show open positions
    Positions {
        symbols: Vec<String>,
    },

    /// List orders
    Orders {
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Show projected funding rates
    Funding {
        symbols: Vec<String>,
    },

    /// Place an order
    Order {
        #[arg(short, long)]
        symbol: String,

        #[arg(long)]
        side: Side,

        #[arg(short, long, value_parser = parse_decimal)]
        amount: Decimal,

        /// Limit price; places a market order when omitted
        #[arg(short, long, value_parser = parse_decimal)]
        price: Option<Decimal>,

        #[arg(long, conflicts_with_all = ["stop_loss", "price"], value_parser = parse_decimal)]
        take_profit: Option<Decimal>,

        #[arg(long, conflicts_with = "price", value_parser = parse_decimal)]
        stop_loss: Option<Decimal>,

        #[arg(long)]
        reduce_only: bool,
    },

    /// Cancel an order, or every open order with --all
    Cancel {
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        #[arg(long)]
        all: bool,

        /// Limit --all to one market
        #[arg(short, long, requires = "all")]
        symbol: Option<String>,
    },
}

/// Config file layout: the adapter settings at the top level plus an
/// optional `[simulated]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    #[serde(flatten)]
    adapter: AdapterConfig,
    simulated: SimulatedVenueConfig,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let exchange = connect(&cli, file)?;
    let result = run(&exchange, cli.command);
    if let Err(e) = exchange.close() {
        tracing::warn!(error = %e, "Close failed");
    }
    result
}

fn connect(cli: &Cli, file: FileConfig) -> Result<Ethereal> {
    let mut config = file.adapter;
    if let Some(url) = &cli.base_url {
        config.rest.base_url = url.clone();
    }
    if let Some(address) = &cli.wallet_address {
        config.wallet_address = Some(address.clone());
    }

    if cli.simulated {
        // The simulated venue accepts any key from its own account.
        config.wallet_address.get_or_insert_with(|| file.simulated.account.clone());
        config.private_key.get_or_insert_with(|| "simulated".to_string());
        tracing::info!(account = ?config.wallet_address, "Using simulated venue");
        let venue = SimulatedVenue::with_demo_markets(file.simulated);
        return Ok(Ethereal::new(config, Arc::new(venue))?);
    }

    tracing::info!(base_url = %config.rest.base_url, "Connecting to Ethereal");
    Ok(Ethereal::connect(config)?)
}

fn symbol_filter(symbols: &[String]) -> Option<Vec<&str>> {
    (!symbols.is_empty()).then(|| symbols.iter().map(String::as_str).collect())
}

fn show(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn run(exchange: &Ethereal, command: Commands) -> Result<()> {
    match command {
        Commands::Normalize {
            symbol,
            side,
            price,
            amount,
            close,
        } => {
            let purpose = if close { OrderPurpose::Close } else { OrderPurpose::Open };
            let market = exchange.market(&symbol)?;
            let normalized = exchange.normalize_order(&symbol, side, price, amount, purpose)?;
            println!("Market:    {} (tick {}, lot {})", market.symbol, market.rules.price_tick, market.rules.lot_size);
            println!("Price:     {} -> {}", show(price), show(normalized.price));
            println!("Quantity:  {} -> {}", amount, normalized.quantity);
            if let Err(violation) = market.rules.check_quantity(normalized.quantity) {
                println!("Rejected:  {}", violation);
            }
        }
        Commands::Markets { reload } => {
            let markets = exchange.load_markets(reload)?;
            println!("{:<16} {:>12} {:>12} {:>12} {:>12}", "SYMBOL", "TICK", "LOT", "MIN", "MAX");
            for m in &markets {
                println!(
                    "{:<16} {:>12} {:>12} {:>12} {:>12}",
                    m.symbol,
                    m.rules.price_tick,
                    m.rules.lot_size,
                    m.rules.min_quantity,
                    show(m.rules.max_quantity)
                );
            }
        }
        Commands::Ticker { symbols } => {
            let filter = symbol_filter(&symbols);
            let tickers = exchange.fetch_tickers(filter.as_deref())?;
            println!(
                "{:<16} {:>14} {:>14} {:>14} {:>14}",
                "SYMBOL", "BID", "ASK", "MID", "ORACLE"
            );
            for (symbol, t) in &tickers {
                println!(
                    "{:<16} {:>14} {:>14} {:>14} {:>14}",
                    symbol,
                    show(t.bid),
                    show(t.ask),
                    show(t.mid()),
                    show(t.last)
                );
            }
        }
        Commands::Balance => {
            let balances = exchange.fetch_balance()?;
            println!("{:<8} {:>18} {:>18} {:>18}", "ASSET", "FREE", "USED", "TOTAL");
            for (asset, b) in &balances.assets {
                println!("{:<8} {:>18} {:>18} {:>18}", asset, b.free, b.used, b.total);
            }
        }
        Commands::Positions { symbols } => {
            let filter = symbol_filter(&symbols);
            let positions = exchange.fetch_positions(filter.as_deref())?;
            if positions.is_empty() {
                println!("No open positions");
            }
            for p in &positions {
                println!(
                    "{:<16} {:?} {} @ {} mark {} uPnL {}",
                    p.symbol,
                    p.side,
                    p.contracts,
                    show(p.entry_price),
                    show(p.mark_price),
                    show(p.unrealized_pnl)
                );
            }
        }
        Commands::Orders { symbol } => {
            let orders = exchange.fetch_orders(symbol.as_deref())?;
            for o in &orders {
                println!(
                    "{} {:<16} {:<5} {:?} {} @ {} filled {}",
                    o.id,
                    o.symbol.as_deref().unwrap_or("?"),
                    o.side.map(|s| s.as_str()).unwrap_or("?"),
                    o.status,
                    show(o.amount),
                    show(o.price.or(o.stop_price)),
                    show(o.filled)
                );
            }
        }
        Commands::Funding { symbols } => {
            let filter = symbol_filter(&symbols);
            let rates = exchange.fetch_funding_rates(filter.as_deref())?;
            println!("{:<16} {:>14} {:>12}", "SYMBOL", "RATE (1h)", "ANNUALIZED");
            for (symbol, r) in &rates {
                println!("{:<16} {:>14} {:>12}", symbol, r.funding_rate, r.annualized);
            }
        }
        Commands::Order {
            symbol,
            side,
            amount,
            price,
            take_profit,
            stop_loss,
            reduce_only,
        } => {
            let order_type = if price.is_some() { OrderType::Limit } else { OrderType::Market };
            let params = OrderParams {
                take_profit_price: take_profit,
                stop_loss_price: stop_loss,
                reduce_only,
                client_order_id: None,
            };
            let order = exchange.create_order(&symbol, order_type, side, amount, price, &params)?;
            println!(
                "Order {} {:?}: {} {} @ {}",
                order.id,
                order.status,
                side,
                show(order.amount),
                show(order.price.or(order.stop_price))
            );
        }
        Commands::Cancel { id, all, symbol } => {
            if all {
                let cancelled = exchange.cancel_all_orders(symbol.as_deref())?;
                println!("Cancelled {} orders", cancelled.len());
            } else if let Some(id) = id {
                exchange.cancel_order(&id)?;
                println!("Cancelled {}", id);
            }
        }
    }
    Ok(())
}
