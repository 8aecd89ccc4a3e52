use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use hsm_custody::{
    api::{AddressRequest, BitcoinScriptType, Chain},
    CustodyConfig, Secrets,
};

#[derive(Parser, Debug)]
#[command(name = "hsm-custody")]
#[command(about = "PKCS#11 backed key custody for Bitcoin and Ethereum", version)]
pub struct Cli {
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// TOML configuration file. Defaults apply when omitted
    #[arg(long, env = "HSM_CUSTODY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Security officer PIN, used when initializing the token
    #[arg(long, env = "HSM_SO_PIN", hide_env_values = true)]
    pub so_pin: Option<String>,

    /// Normal user PIN
    #[arg(long, env = "HSM_USER_PIN", hide_env_values = true)]
    pub user_pin: Option<String>,

    /// BIP39 mnemonic the master key is created from
    #[arg(long, env = "HSM_SEED_PHRASE", hide_env_values = true)]
    pub seed_phrase: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the token and create the master key if missing
    Bootstrap,

    /// Print the address of the key at a path
    Address {
        /// Key path, e.g. m/44'/0'/0'/0/0
        key_path: String,

        #[arg(long, default_value = "bitcoin")]
        chain: ChainArg,

        /// Bitcoin network (main, test, signet, regtest). Defaults to the configured one
        #[arg(long)]
        network: Option<String>,

        /// Bitcoin script type. Defaults to legacy
        #[arg(long)]
        script_type: Option<ScriptTypeArg>,
    },

    /// Sign a Bitcoin transfer request read as JSON from stdin
    SignBitcoin,

    /// Sign a prepared Bitcoin transaction request read as JSON from stdin
    SignBitcoinRaw,

    /// Sign an Ethereum transaction request read as JSON from stdin
    SignEthereum,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ChainArg {
    Bitcoin,
    Ethereum,
}

impl From<ChainArg> for Chain {
    fn from(arg: ChainArg) -> Self {
        match arg {
            ChainArg::Bitcoin => Chain::Bitcoin,
            ChainArg::Ethereum => Chain::Ethereum,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScriptTypeArg {
    Legacy,
    Segwit,
    SegwitP2sh,
    Taproot,
}

impl From<ScriptTypeArg> for BitcoinScriptType {
    fn from(arg: ScriptTypeArg) -> Self {
        match arg {
            ScriptTypeArg::Legacy => BitcoinScriptType::Legacy,
            ScriptTypeArg::Segwit => BitcoinScriptType::Segwit,
            ScriptTypeArg::SegwitP2sh => BitcoinScriptType::SegwitP2sh,
            ScriptTypeArg::Taproot => BitcoinScriptType::Taproot,
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CustodyConfig> {
    let config = match path {
        Some(path) => CustodyConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => CustodyConfig::default(),
    };
    Ok(config.with_library_from_env())
}

fn load_secrets(cli: &Cli) -> anyhow::Result<Secrets> {
    let user_pin = cli
        .user_pin
        .as_deref()
        .context("user PIN missing: pass --user-pin or set HSM_USER_PIN")?;
    Ok(Secrets::new(
        cli.so_pin.as_deref(),
        user_pin,
        cli.seed_phrase.as_deref(),
    )?)
}

fn read_stdin() -> anyhow::Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read request from stdin")?;
    Ok(input)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let secrets = load_secrets(&cli)?;
    let service =
        hsm_custody::connect(config, secrets).context("failed to open the security token")?;

    let output = match cli.command {
        Commands::Bootstrap => {
            let report = service.bootstrap().context("bootstrap failed")?;
            serde_json::to_string(&report)?
        }
        Commands::Address {
            key_path,
            chain,
            network,
            script_type,
        } => {
            let request = AddressRequest {
                key_path,
                chain: chain.into(),
                network,
                script_type: script_type.map(Into::into),
            };
            service
                .get_address(&request)
                .context("failed to derive address")?
        }
        Commands::SignBitcoin => service
            .sign_bitcoin_json(&read_stdin()?)
            .context("failed to sign Bitcoin transfer")?,
        Commands::SignBitcoinRaw => service
            .sign_bitcoin_raw_json(&read_stdin()?)
            .context("failed to sign Bitcoin transaction")?,
        Commands::SignEthereum => service
            .sign_ethereum_json(&read_stdin()?)
            .context("failed to sign Ethereum transaction")?,
    };

    println!("{}", output);
    Ok(())
}
