//! Production Fund CLI
//!
//! Runs one engine operation per invocation against a data directory.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use prodfund_core::{format_units, parse_units, Amount, Clock, ManualClock, ParticipantId, SystemClock, Timestamp};
use prodfund_engine::{BalanceBook, CallContext, EngineConfig, ProductionEngine, ValueLedger};
use prodfund_storage::{SledStore, StateStore, WriteBatch};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "prodfund")]
#[command(version)]
#[command(about = "Production fund - time-weighted reward accounting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "prodfund.toml", env = "PRODFUND_CONFIG")]
    config: PathBuf,

    /// Data directory (overrides the configuration file)
    #[arg(short, long, global = true, env = "PRODFUND_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Evaluate at this unix time instead of the wall clock
    #[arg(long, global = true)]
    at: Option<Timestamp>,

    /// Submit through this relayer on behalf of the participant
    #[arg(long, global = true)]
    via: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the data directory
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Credit spendable units to a participant from outside the fund
    Deposit {
        /// Participant (64-hex id or label)
        who: String,
        /// Amount in whole units, decimals allowed
        #[arg(value_parser = parse_amount)]
        amount: Amount,
    },

    /// Lock principal into a tier
    Open {
        who: String,
        #[arg(value_parser = parse_amount)]
        amount: Amount,
        /// Tier index (see `tiers`)
        tier: usize,
    },

    /// Close an unlocked position
    Close {
        who: String,
        /// Position index; the last position moves into this slot
        index: usize,
    },

    /// Claim pending yield
    Claim { who: String },

    /// Add units to the yield pool
    Fund {
        who: String,
        #[arg(value_parser = parse_amount)]
        amount: Amount,
    },

    /// Suspend state changes (admin only)
    Pause { who: String },

    /// Resume state changes (admin only)
    Unpause { who: String },

    /// Show fund state, or one participant
    Status {
        who: Option<String>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// List the tier catalog
    Tiers,
}

fn parse_amount(s: &str) -> Result<Amount, String> {
    parse_units(s).map_err(|e| e.to_string())
}

fn init_logging(verbose: bool, level: &str, json: bool) {
    let env_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
        }))
        .init();
}

/// File settings, then `PRODFUND_<SECTION>__<KEY>` overrides
fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    let settings = config::Config::builder()
        .add_source(
            config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(false),
        )
        .add_source(
            config::Environment::with_prefix("PRODFUND")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(settings.try_deserialize()?)
}

fn format_time(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// One engine bound to the data directory for a single command
struct Session {
    engine: ProductionEngine<Arc<BalanceBook>, ManualClock>,
    book: Arc<BalanceBook>,
    store: Arc<SledStore>,
    relayer: Option<ParticipantId>,
}

impl Session {
    fn open(config: &EngineConfig, data_dir: &Path, now: Timestamp, via: Option<&str>) -> anyhow::Result<Self> {
        let store = Arc::new(SledStore::open(data_dir)?);
        let book = Arc::new(BalanceBook::load(store.as_ref())?);
        let engine = ProductionEngine::restore(
            config.settings()?,
            book.clone(),
            ManualClock::new(now),
            store.clone(),
        )?;
        Ok(Self {
            engine,
            book,
            store,
            relayer: via.map(ParticipantId::resolve),
        })
    }

    fn ctx(&self, who: &str) -> CallContext {
        let id = ParticipantId::resolve(who);
        match self.relayer {
            Some(relayer) => CallContext::relayed(relayer, id, &[]),
            None => CallContext::direct(id),
        }
    }

    /// Credit a participant and persist the new balance
    fn deposit(&self, who: &ParticipantId, amount: Amount) -> anyhow::Result<()> {
        self.book.deposit(who, amount)?;
        let mut batch = WriteBatch::new();
        self.book.stage_records(who, &mut batch)?;
        self.store.write(batch)?;
        Ok(())
    }

    /// Run a state change and print its events
    fn apply<T>(&self, op: impl FnOnce(&Self) -> prodfund_core::Result<T>) -> anyhow::Result<T> {
        let mut events = self.engine.subscribe();
        let value = op(self)?;
        while let Ok(event) = events.try_recv() {
            tracing::debug!("{:?}", event);
            println!("event: {} by {} at {}", event.name(), event.participant(), format_time(event.timestamp()));
        }
        Ok(value)
    }
}

#[derive(Serialize)]
struct FundReport {
    balance: String,
    total_reputation: String,
    total_principal: String,
    reserved_yield: String,
    accumulated_yield_per_reputation: String,
    last_update: String,
    paused: bool,
    admin: String,
    annual_rate: String,
    custody: String,
}

#[derive(Serialize)]
struct PositionReport {
    index: usize,
    amount: String,
    tier: u8,
    reputation: String,
    unlocks_at: String,
    unlocked: bool,
}

#[derive(Serialize)]
struct ParticipantReport {
    id: String,
    spendable: String,
    reputation: String,
    accrued_yield: String,
    pending_yield: String,
    positions: Vec<PositionReport>,
}

fn fund_report(session: &Session) -> FundReport {
    let engine = &session.engine;
    let fund = engine.get_fund();
    FundReport {
        balance: format_units(fund.balance),
        total_reputation: format_units(fund.total_reputation),
        total_principal: format_units(fund.total_principal),
        reserved_yield: format_units(fund.reserved_yield),
        accumulated_yield_per_reputation: fund.accumulated_yield_per_reputation.to_string(),
        last_update: format_time(fund.last_update_time),
        paused: engine.is_paused(),
        admin: engine.admin().to_hex(),
        annual_rate: format!("{}%", format_units(engine.annual_rate() * 100)),
        custody: format_units(session.book.custody()),
    }
}

fn participant_report(session: &Session, who: &ParticipantId) -> anyhow::Result<ParticipantReport> {
    let engine = &session.engine;
    let now = engine.clock().now();
    let account = engine.get_participant(who);
    let positions = engine
        .get_positions(who)
        .into_iter()
        .enumerate()
        .map(|(index, p)| PositionReport {
            index,
            amount: format_units(p.amount),
            tier: p.tier_index,
            reputation: format_units(p.reputation),
            unlocks_at: format_time(p.unlock_time()),
            unlocked: p.is_unlocked(now),
        })
        .collect();
    Ok(ParticipantReport {
        id: who.to_hex(),
        spendable: format_units(session.book.balance_of(who)),
        reputation: format_units(account.total_reputation),
        accrued_yield: format_units(account.accrued_yield),
        pending_yield: format_units(engine.get_pending_yield(who)?),
        positions,
    })
}

fn print_fund(report: &FundReport) {
    println!("Production Fund");
    println!("  Pool balance:      {}", report.balance);
    println!("  Reserved yield:    {}", report.reserved_yield);
    println!("  Total reputation:  {}", report.total_reputation);
    println!("  Locked principal:  {}", report.total_principal);
    println!("  Custody:           {}", report.custody);
    println!("  Annual rate:       {}", report.annual_rate);
    println!("  Last update:       {}", report.last_update);
    println!("  Paused:            {}", report.paused);
    println!("  Admin:             {}", report.admin);
}

fn print_participant(report: &ParticipantReport) {
    println!("Participant {}", report.id);
    println!("  Spendable:      {}", report.spendable);
    println!("  Reputation:     {}", report.reputation);
    println!("  Accrued yield:  {}", report.accrued_yield);
    println!("  Pending yield:  {}", report.pending_yield);
    if report.positions.is_empty() {
        println!("  No open positions");
    }
    for p in &report.positions {
        println!(
            "  [{}] {} in tier {} -> {} reputation, unlocks {}{}",
            p.index,
            p.amount,
            p.tier,
            p.reputation,
            p.unlocks_at,
            if p.unlocked { " (unlocked)" } else { "" }
        );
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.display().to_string();
    }
    init_logging(cli.verbose, &config.logging.level, config.logging.json);

    let data_dir = PathBuf::from(&config.storage.data_dir);
    let now = cli.at.unwrap_or_else(|| SystemClock.now());
    tracing::debug!("Using data directory {:?} at t={}", data_dir, now);

    match cli.command {
        Commands::Init { force } => init(&cli.config, &config, &data_dir, force),
        command => {
            let session = Session::open(&config, &data_dir, now, cli.via.as_deref())?;
            run(&session, command)
        }
    }
}

fn init(path: &Path, config: &EngineConfig, data_dir: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config.settings()?;
    std::fs::write(path, toml::to_string_pretty(config)?)?;
    std::fs::create_dir_all(data_dir)?;

    println!("Configuration written to {:?}", path);
    println!("Data directory: {:?}", data_dir);
    println!("Admin: {}", config.admin_id().to_hex());
    Ok(())
}

fn run(session: &Session, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init { .. } => bail!("init does not take a session"),

        Commands::Deposit { who, amount } => {
            let id = ParticipantId::resolve(&who);
            session.deposit(&id, amount)?;
            println!("Deposited {} to {}", format_units(amount), id);
        }

        Commands::Open { who, amount, tier } => {
            let position = session.apply(|s| s.engine.open_position(&s.ctx(&who), amount, tier))?;
            println!(
                "Opened {} in tier {}: {} reputation, unlocks {}",
                format_units(position.amount),
                position.tier_index,
                format_units(position.reputation),
                format_time(position.unlock_time())
            );
        }

        Commands::Close { who, index } => {
            let position = session.apply(|s| s.engine.close_position(&s.ctx(&who), index))?;
            println!("Closed position {}: returned {}", index, format_units(position.amount));
        }

        Commands::Claim { who } => {
            let paid = session.apply(|s| s.engine.claim_yield(&s.ctx(&who)))?;
            println!("Claimed {}", format_units(paid));
        }

        Commands::Fund { who, amount } => {
            session.apply(|s| s.engine.fund_pool(&s.ctx(&who), amount))?;
            println!("Pool balance now {}", format_units(session.engine.get_fund().balance));
        }

        Commands::Pause { who } => {
            session.apply(|s| s.engine.pause(&s.ctx(&who)))?;
            println!("Fund paused");
        }

        Commands::Unpause { who } => {
            session.apply(|s| s.engine.unpause(&s.ctx(&who)))?;
            println!("Fund unpaused");
        }

        Commands::Status { who, json } => match who {
            Some(who) => {
                let report = participant_report(&session, &ParticipantId::resolve(&who))?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_participant(&report);
                }
            }
            None => {
                let report = fund_report(&session);
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_fund(&report);
                }
            }
        },

        Commands::Tiers => {
            println!("{:>5}  {:>10}  {:>10}", "tier", "lock days", "multiplier");
            for (index, tier) in session.engine.tiers().iter().enumerate() {
                println!(
                    "{:>5}  {:>10}  {:>10}",
                    index,
                    tier.lock_days(),
                    format_units(tier.reputation_multiplier)
                );
            }
        }
    }

    Ok(())
}
