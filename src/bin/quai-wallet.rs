#![forbid(unsafe_code)]
//! Command-line front end for quaiwallet

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use quaiwallet::config::{load_config, Config};
use quaiwallet::hdnode::CoinType;
use quaiwallet::network::{ShardConnectionManager, ShardRpcLedger, WsConnector};
use quaiwallet::provider::Ledger;
use quaiwallet::wallet::{HdWallet, PaymentCode};
use quaiwallet::zone::Zone;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "quaiwallet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Coin {
    Quai,
    Qi,
}

impl From<Coin> for CoinType {
    fn from(coin: Coin) -> Self {
        match coin {
            Coin::Quai => CoinType::Quai,
            Coin::Qi => CoinType::Qi,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Creates a wallet from a fresh mnemonic
    Generate {
        #[arg(long, value_enum, default_value = "quai")]
        coin: Coin,
        /// Where to write the serialized wallet
        #[arg(long)]
        out: PathBuf,
    },
    /// Restores a wallet from a phrase and a BIP-44 path
    Restore {
        phrase: String,
        /// m/44'/994'... for Quai, m/44'/969'... for Qi
        #[arg(long, default_value = "m/44'/994'")]
        path: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Derives the next address of an account in a zone
    Address {
        #[arg(long)]
        wallet: PathBuf,
        /// Zone nickname ("cyprus1") or hex id ("0x00")
        #[arg(long)]
        zone: String,
        #[arg(long, default_value_t = 0)]
        account: u32,
    },
    /// Prints the extended public key of an account
    Xpub {
        #[arg(long)]
        wallet: PathBuf,
        #[arg(long, default_value_t = 0)]
        account: u32,
    },
    /// Prints the payment code of a Qi account, or opens a channel to a remote one
    PaymentCode {
        #[arg(long)]
        wallet: PathBuf,
        #[arg(long, default_value_t = 0)]
        account: u32,
        #[arg(long)]
        open: Option<String>,
    },
    /// Scans a zone for Qi outpoints and prints the balance
    Balance {
        #[arg(long)]
        wallet: PathBuf,
        #[arg(long)]
        zone: String,
        #[arg(long, default_value_t = 0)]
        account: u32,
    },
    /// Lists the chains the configured node is running
    Shards,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config);

    match cli.command {
        Commands::Generate { coin, out } => generate(coin.into(), &out)?,
        Commands::Restore { phrase, path, out } => restore(&phrase, &path, &out)?,
        Commands::Address {
            wallet,
            zone,
            account,
        } => next_address(&wallet, &zone, account)?,
        Commands::Xpub { wallet, account } => {
            let wallet = HdWallet::load(&wallet)?;
            println!("{}", wallet.xpub(account)?.bright_green());
        }
        Commands::PaymentCode {
            wallet,
            account,
            open,
        } => payment_code(&wallet, account, open.as_deref())?,
        Commands::Balance {
            wallet,
            zone,
            account,
        } => balance(&config, &wallet, &zone, account).await?,
        Commands::Shards => shards(&config).await?,
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn generate(coin: CoinType, out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let wallet = HdWallet::create_random(coin)?;
    wallet.save(out)?;
    println!("{}", "Wallet created".bright_green().bold());
    println!("Coin type: {}", coin.value());
    println!("Saved to:  {}", out.display());
    println!();
    println!("{}", "Recovery phrase (write it down):".yellow());
    println!("  {}", wallet.core().phrase()?);
    Ok(())
}

fn restore(phrase: &str, path: &str, out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let wallet = HdWallet::from_phrase(phrase, path)?;
    wallet.save(out)?;
    println!(
        "{} (coin type {}) -> {}",
        "Wallet restored".bright_green(),
        wallet.coin_type().value(),
        out.display()
    );
    Ok(())
}

fn next_address(path: &Path, zone: &str, account: u32) -> Result<(), Box<dyn std::error::Error>> {
    let zone = Zone::from_str(zone)?;
    let wallet = HdWallet::load(path)?;
    let info = wallet.get_next_address(account, zone)?;
    wallet.save(path)?;
    println!("{} {}", "•".bright_yellow(), info.address.to_string().bright_green());
    println!("  zone:    {}", info.zone);
    println!("  account: {}", info.account);
    println!("  index:   {}", info.index);
    Ok(())
}

fn payment_code(
    path: &Path,
    account: u32,
    open: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let wallet = HdWallet::load(path)?;
    let qi = wallet
        .as_qi()
        .ok_or("payment codes are only available for Qi wallets")?;
    match open {
        Some(remote) => {
            let remote = PaymentCode::from_str(remote)?;
            qi.open_channel(&remote, account)?;
            wallet.save(path)?;
            println!("{} {}", "Channel opened with".bright_green(), remote);
        }
        None => println!("{}", qi.payment_code(account)?.to_string().bright_green()),
    }
    Ok(())
}

async fn connect_ledger(config: &Config) -> Result<Arc<ShardRpcLedger>, Box<dyn std::error::Error>> {
    let manager =
        ShardConnectionManager::connect(config.network.clone(), Arc::new(WsConnector)).await?;
    Ok(Arc::new(ShardRpcLedger::new(manager)))
}

async fn balance(
    config: &Config,
    path: &Path,
    zone: &str,
    account: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let zone = Zone::from_str(zone)?;
    let mut wallet = match HdWallet::load(path)? {
        HdWallet::Qi(qi) => qi,
        HdWallet::Quai(_) => return Err("balance scanning is only available for Qi wallets".into()),
    };
    wallet.configure(&config.wallet)?;
    let ledger = connect_ledger(config).await?;
    wallet.connect(ledger.clone());

    println!("{}", format!("Scanning {}...", zone).bright_cyan());
    let summary = wallet.scan(zone, account).await?;
    wallet.save(path)?;
    println!("Addresses: {}", summary.addresses);
    println!("Outpoints: {}", summary.outpoints);
    println!(
        "{} {}",
        "Balance:".bright_green().bold(),
        wallet.balance_for_account(zone, account)?
    );
    ledger.manager().destroy().await;
    Ok(())
}

async fn shards(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let ledger = connect_ledger(config).await?;
    println!("{}", "Running chains".bright_cyan().underline());
    for shard in ledger.running_shards().await? {
        println!("  {} {} ({})", "•".bright_yellow(), shard, shard.as_hex());
    }
    ledger.manager().destroy().await;
    Ok(())
}
