use std::{path::PathBuf, process, sync::Arc};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use envconfig::Envconfig;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use fundledger::{
    amount::{self, Lamports},
    config::{Config, EnvConfig, Overrides},
    error::ClientError,
    gateway::{CampaignDraft, LedgerGateway},
    ledger::{CampaignId, CampaignRecord, MemoryLedger, RemoteLedger, TransactionRecord},
    rpc::HttpLedger,
    store::{CampaignUpdate, FileFallback, SettingsUpdate, SyncPhase, SyncStore},
    wallet::{Disconnected, KeypairWallet, Wallet},
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Ledger JSON-RPC endpoint [env: FUNDLEDGER_RPC_URL]
    #[clap(long, global = true)]
    pub rpc_url: Option<String>,
    /// Program id, 64 hex chars [env: FUNDLEDGER_PROGRAM_ID]
    #[clap(long, global = true)]
    pub program_id: Option<String>,
    /// Hex secret key file [env: FUNDLEDGER_KEYPAIR]
    #[clap(long, global = true)]
    pub keypair: Option<PathBuf>,
    /// Directory for the saved snapshot [env: FUNDLEDGER_STATE_DIR]
    #[clap(long, global = true)]
    pub state_dir: Option<PathBuf>,
    /// Use a ledger kept in this JSON file instead of the RPC endpoint
    #[clap(long, global = true)]
    pub local: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[clap(name = "fundledger", version = VERSION, about = "Crowdfunding ledger client")]
pub struct Opts {
    #[clap(flatten)]
    pub global: GlobalOptions,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List campaigns
    List,
    /// Show one campaign
    Show { cid: CampaignId },
    /// List closed campaigns
    Completed,
    Create {
        #[clap(long)]
        title: String,
        #[clap(long)]
        description: String,
        #[clap(long)]
        image_url: Option<String>,
        /// Goal in display units
        #[clap(long)]
        target: f64,
    },
    Update {
        cid: CampaignId,
        #[clap(long)]
        title: String,
        #[clap(long)]
        description: String,
        #[clap(long)]
        image_url: Option<String>,
        #[clap(long)]
        target: f64,
        #[clap(long)]
        completion_message: Option<String>,
    },
    /// Close a campaign
    Delete { cid: CampaignId },
    Donate { cid: CampaignId, amount: f64 },
    /// Withdraw an amount, or the full balance when omitted
    Withdraw { cid: CampaignId, amount: Option<f64> },
    /// Donations and withdrawals of a campaign, newest first
    Transactions { cid: CampaignId },
    /// Show or change platform settings
    Settings {
        #[clap(long)]
        currency: Option<String>,
        #[clap(long)]
        min_donation: Option<f64>,
        #[clap(long)]
        fee: Option<u64>,
    },
    /// Generate a keypair at the configured path
    Keygen {
        #[clap(long)]
        force: bool,
    },
}

type CliStore = SyncStore<Arc<dyn RemoteLedger>, Box<dyn Wallet>, FileFallback>;

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    if let Err(err) = entry(opts).await {
        match err.downcast_ref::<ClientError>() {
            Some(client) => {
                debug!("{client}");
                eprintln!("error: {}", client.user_message());
            }
            None => eprintln!("error: {err:#}"),
        }
        process::exit(1);
    }
}

async fn entry(opts: Opts) -> Result<()> {
    dotenv().ok();

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        );
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::resolve(
        EnvConfig::init_from_env()?,
        Overrides {
            rpc_url: opts.global.rpc_url,
            program_id: opts.global.program_id,
            keypair: opts.global.keypair,
            state_dir: opts.global.state_dir,
            local_ledger: opts.global.local,
        },
    )?;
    debug!("Config -> {:#?}", &config);

    if let Command::Keygen { force } = opts.command {
        return keygen(&config, force);
    }

    let store = open_store(&config)?;
    if store.load().await? == SyncPhase::Degraded {
        eprintln!("warning: ledger unreachable, showing saved data (changes disabled)");
    }
    run(&store, opts.command).await
}

fn keygen(config: &Config, force: bool) -> Result<()> {
    let path = &config.keypair_path;
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    let wallet = KeypairWallet::generate();
    wallet.write(path)?;
    info!(path = %path.display(), "keypair written");
    println!("{}", wallet.public_identity());
    Ok(())
}

fn open_store(config: &Config) -> Result<CliStore> {
    let remote: Arc<dyn RemoteLedger> = match &config.local_ledger {
        Some(path) => Arc::new(MemoryLedger::open(config.program_id, path)?),
        None => Arc::new(HttpLedger::new(config.rpc_url.clone())),
    };
    let wallet: Box<dyn Wallet> = if config.keypair_path.exists() {
        Box::new(KeypairWallet::read(&config.keypair_path)?)
    } else {
        debug!(path = %config.keypair_path.display(), "no keypair, running read-only");
        Box::new(Disconnected)
    };
    let gateway = LedgerGateway::new(remote, wallet, config.program_id);
    Ok(SyncStore::new(gateway, FileFallback::new(&config.state_dir)))
}

async fn run(store: &CliStore, command: Command) -> Result<()> {
    let symbol = store.settings().currency_symbol;
    match command {
        Command::List => {
            for campaign in store.campaigns() {
                print_summary(&campaign, &symbol);
            }
        }
        Command::Completed => {
            for campaign in store.completed_campaigns() {
                print_summary(&campaign, &symbol);
            }
        }
        Command::Show { cid } => match store.campaign(cid) {
            Some(campaign) => print_detail(&campaign, &symbol),
            None => return Err(ClientError::NotFound(format!("campaign {cid}")).into()),
        },
        Command::Create {
            title,
            description,
            image_url,
            target,
        } => {
            let created = store
                .create(&CampaignDraft {
                    title,
                    description,
                    image_url,
                    target,
                })
                .await?;
            println!("created campaign {} ({})", created.cid, created.signature);
        }
        Command::Update {
            cid,
            title,
            description,
            image_url,
            target,
            completion_message,
        } => {
            let update = CampaignUpdate {
                draft: CampaignDraft {
                    title,
                    description,
                    image_url,
                    target,
                },
                completion_message,
            };
            let signature = store.update(cid, &update).await?;
            println!("updated campaign {cid} ({signature})");
        }
        Command::Delete { cid } => {
            let signature = store.delete(cid).await?;
            println!("closed campaign {cid} ({signature})");
        }
        Command::Donate { cid, amount } => {
            let receipt = store.donate(cid, amount).await?;
            println!(
                "donated {} to campaign {cid} ({})",
                money(receipt.amount, &symbol),
                receipt.signature
            );
        }
        Command::Withdraw { cid, amount } => {
            let receipt = store.withdraw(cid, amount).await?;
            let (state, _) = store.gateway().ensure_global_state().await?;
            let (creator, platform) = state.split(receipt.amount);
            println!(
                "withdrew {} from campaign {cid}: {} to creator, {} platform fee ({})",
                money(receipt.amount, &symbol),
                money(creator, &symbol),
                money(platform, &symbol),
                receipt.signature
            );
        }
        Command::Transactions { cid } => {
            for tx in store.transactions(cid).await? {
                print_transaction(&tx, &symbol);
            }
        }
        Command::Settings {
            currency,
            min_donation,
            fee,
        } => {
            let settings = if currency.is_none() && min_donation.is_none() && fee.is_none() {
                store.settings()
            } else {
                store
                    .update_settings(SettingsUpdate {
                        currency_symbol: currency,
                        min_donation,
                        platform_fee_percent: fee,
                    })
                    .await?
            };
            println!("currency:      {}", settings.currency_symbol);
            println!("min donation:  {}", settings.min_donation);
            println!("platform fee:  {}%", settings.platform_fee_percent);
        }
        Command::Keygen { .. } => {}
    }
    Ok(())
}

fn money(base: Lamports, symbol: &str) -> String {
    format!("{} {symbol}", amount::format_display(base))
}

fn print_summary(campaign: &CampaignRecord, symbol: &str) {
    println!(
        "#{:<4} {:<9} {} / {}  {}",
        campaign.cid,
        format!("{:?}", campaign.status()).to_lowercase(),
        money(campaign.amount_raised, symbol),
        money(campaign.goal, symbol),
        campaign.title
    );
}

fn print_detail(campaign: &CampaignRecord, symbol: &str) {
    println!("campaign     #{}", campaign.cid);
    println!("title        {}", campaign.title);
    println!("description  {}", campaign.description);
    if let Some(image) = campaign.image_ref() {
        println!("image        {image}");
    }
    println!("creator      {}", campaign.creator);
    println!("goal         {}", money(campaign.goal, symbol));
    println!("raised       {}", money(campaign.amount_raised, symbol));
    println!("balance      {}", money(campaign.balance, symbol));
    println!("donors       {}", campaign.donors);
    println!("withdrawals  {}", campaign.withdrawals);
    println!("created      {}", campaign.timestamp);
    println!("status       {:?}", campaign.status());
    if let Some(message) = &campaign.completion_message {
        println!("message      {message}");
    }
}

fn print_transaction(tx: &TransactionRecord, symbol: &str) {
    println!(
        "{}  {:?}  {}  {}",
        tx.timestamp,
        tx.kind(),
        money(tx.amount, symbol),
        tx.owner
    );
}
