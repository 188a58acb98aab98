use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use core_logic::{
    setup_logger, setup_quiet_logger, ConcurrencyLimiter, CooldownStore, LoggerConfig,
    ProxyAssignment, ProxyManager, WalletManager, WorkerRunner,
};
use dialoguer::{theme::ColorfulTheme, Input, Select};
use dotenv::dotenv;
use pharos_project::config::PharosConfig;
use pharos_project::faucet::FaucetContext;
use pharos_project::onchain::iterations::IterationSettings;
use pharos_project::onchain::EvmOnchainRunner;
use pharos_project::{HttpTransport, Identity, RunMode, WalletTaskScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/config.toml")]
    config: String,

    /// Identities processed at once (1-100). Prompted for when omitted.
    #[arg(short, long)]
    threads: Option<usize>,

    #[arg(short, long)]
    quiet: bool,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Claim the daily faucet for every wallet
    Faucet,
    /// Faucet, then mixed swaps and liquidity over several cycles
    Daily {
        #[arg(short, long, default_value = "10")]
        iterations: u32,
    },
    /// Mixed swaps and liquidity over several cycles, no faucet
    Full {
        #[arg(short, long, default_value = "10")]
        iterations: u32,
    },
    /// Swaps only
    Swap {
        #[arg(short, long, default_value = "10")]
        iterations: u32,
    },
    /// Liquidity additions only
    Liquidity {
        #[arg(short, long, default_value = "10")]
        iterations: u32,
    },
}

impl Commands {
    fn mode(&self) -> RunMode {
        match *self {
            Commands::Faucet => RunMode::Faucet,
            Commands::Daily { iterations } => RunMode::Daily { iterations },
            Commands::Full { iterations } => RunMode::Full { iterations },
            Commands::Swap { iterations } => RunMode::Swap { iterations },
            Commands::Liquidity { iterations } => RunMode::Liquidity { iterations },
        }
    }
}

fn prompt_number(prompt: &str, default: u32, min: u32, max: u32) -> Result<u32> {
    let value: u32 = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("{} ({}-{})", prompt, min, max))
        .default(default)
        .validate_with(|v: &u32| {
            if (min..=max).contains(v) {
                Ok(())
            } else {
                Err(format!("Enter a number between {} and {}", min, max))
            }
        })
        .interact_text()?;
    Ok(value)
}

fn prompt_mode() -> Result<RunMode> {
    let choices = [
        "Daily faucet + swaps and liquidity",
        "Swaps and liquidity (no faucet)",
        "Add liquidity only",
        "Swaps only",
        "Daily faucet only",
    ];
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select mode")
        .default(0)
        .items(&choices)
        .interact()?;

    let mode = match selection {
        0 => RunMode::Daily {
            iterations: prompt_number("Iterations per cycle", 10, 5, 25)?,
        },
        1 => RunMode::Full {
            iterations: prompt_number("Iterations per cycle", 10, 5, 25)?,
        },
        2 => RunMode::Liquidity {
            iterations: prompt_number("Liquidity additions", 10, 1, 100)?,
        },
        3 => RunMode::Swap {
            iterations: prompt_number("Swaps", 10, 1, 100)?,
        },
        _ => RunMode::Faucet,
    };
    Ok(mode)
}

fn load_identities(path: &str) -> Result<Vec<Identity>> {
    let manager = WalletManager::load(path)?;
    let mut identities = Vec::with_capacity(manager.count());
    for (i, key) in manager.keys().iter().enumerate() {
        match Identity::from_key(key) {
            Ok(identity) => identities.push(identity),
            Err(e) => warn!("Skipping key #{}: {:#}", i + 1, e),
        }
    }
    Ok(identities)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let mut config = PharosConfig::load(&args.config).context("Failed to load config")?;

    // Dropping the guard at the end of main flushes the file writer.
    let _log_guard = if args.quiet {
        setup_quiet_logger();
        None
    } else {
        setup_logger(&LoggerConfig {
            dir: PathBuf::from(&config.files.log_dir),
            verbose: args.verbose,
        })
    };

    let mode = match &args.command {
        Some(command) => command.mode(),
        None => prompt_mode()?,
    };

    let threads = match args.threads {
        Some(t) => t,
        None if args.command.is_none() => {
            prompt_number("Threads", config.limits.workflow_threads as u32, 1, 100)? as usize
        }
        None => config.limits.workflow_threads,
    };
    config.limits.workflow_threads = threads;
    config.validate()?;

    let identities = match load_identities(&config.files.private_keys) {
        Ok(ids) if !ids.is_empty() => ids,
        Ok(_) => {
            error!("No usable private keys in {}", config.files.private_keys);
            return Ok(());
        }
        Err(e) => {
            error!("Failed to load private keys: {:#}", e);
            return Ok(());
        }
    };

    let proxies = ProxyManager::load_proxies(&config.files.proxies)?;
    if proxies.is_empty() {
        warn!(target: "task_result", "No proxies loaded, running direct");
    } else {
        info!(target: "task_result", "Loaded {} proxies", proxies.len());
    }
    info!(
        target: "task_result",
        "Loaded {} wallets | threads: {} | RPC: {}",
        identities.len(),
        threads,
        config.chain.rpc_url
    );

    let config = Arc::new(config);
    let cancel = WorkerRunner::shutdown_token();

    let faucet = FaucetContext {
        transport: Arc::new(HttpTransport::new(config.api.clone())),
        config: config.clone(),
        limiter: ConcurrencyLimiter::new(config.limiter_config()),
        cooldowns: CooldownStore::new(),
    };
    let settings = IterationSettings {
        attempts_per_iteration: config.retry.attempts_per_iteration,
        policy: config.onchain_policy(),
        delay_min_ms: config.timing.iteration_delay_min_ms,
        delay_max_ms: config.timing.iteration_delay_max_ms,
    };
    let onchain = Arc::new(EvmOnchainRunner::new(
        Arc::new(config.chain.clone()),
        settings,
    ));

    let scheduler =
        WalletTaskScheduler::new(faucet, onchain, ProxyAssignment::new(proxies), cancel);
    scheduler.run(identities, mode).await;

    Ok(())
}
