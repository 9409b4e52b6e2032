use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pki-revocation")]
#[command(version = "1.0.0")]
#[command(about = "Revocation ledger, CRL and tidy tool for a PKI backend")]
#[command(long_about = None)]
pub struct Cli {
    /// Config file path (default: ~/.config/pki-revocation/config.yaml)
    #[arg(long, env = "PKI_REVOCATION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Storage root, overrides the config file
    #[arg(long, env = "PKI_REVOCATION_STORAGE")]
    pub storage: Option<PathBuf>,

    /// CA private key (PKCS#8 PEM), overrides the config file
    #[arg(long, env = "PKI_REVOCATION_CA_KEY")]
    pub ca_key: Option<PathBuf>,

    /// Enable verbose logging (repeat for more verbosity: -v INFO, -vv DEBUG, -vvv TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output raw tab-separated values (no formatting)
    #[arg(short, long)]
    pub raw: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Revoke a certificate by serial number and rebuild the CRL
    Revoke {
        /// Serial number (colon, dash or plain hex)
        serial: String,
    },
    /// Remove expired certificates and revocation records
    Tidy(TidyArgs),
    /// CRL operations
    Crl {
        #[command(subcommand)]
        command: CrlCommands,
    },
    /// Certificate store operations
    Cert {
        #[command(subcommand)]
        command: CertCommands,
    },
    /// Revocation ledger operations
    Revoked {
        #[command(subcommand)]
        command: RevokedCommands,
    },
    /// Run the periodic tidy scheduler until interrupted
    Serve {
        /// Seconds between scheduler ticks, overrides the config file
        #[arg(long)]
        tick: Option<u64>,
    },
    /// Generate shell completion scripts
    Completion {
        #[command(subcommand)]
        command: CompletionCommands,
    },
    /// Internal completion helpers (hidden)
    #[command(hide = true)]
    CompletionHelper {
        #[command(subcommand)]
        command: CompletionHelperCommands,
    },
}

#[derive(clap::Args, Clone, Debug)]
pub struct TidyArgs {
    /// Skip the certificate store
    #[arg(long)]
    pub no_cert_store: bool,

    /// Skip the revocation ledger
    #[arg(long)]
    pub no_revoked: bool,

    /// Seconds past expiry before an entry may be removed
    #[arg(long)]
    pub safety_buffer: Option<u64>,

    /// Milliseconds to wait after each deletion
    #[arg(long, default_value = "0")]
    pub pause_ms: u64,

    /// Stop at the first storage error instead of collecting them
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Subcommand)]
pub enum CrlCommands {
    /// Rebuild and re-sign the CRL now
    Rotate,
    /// Show the current CRL
    Show,
    /// Write the current CRL to stdout or a file
    Export {
        /// Output format
        #[arg(long, value_enum, default_value = "pem")]
        format: CrlFormat,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CrlFormat {
    Pem,
    Der,
}

#[derive(Subcommand)]
pub enum CertCommands {
    /// Record an issued certificate from a PEM file
    Import {
        /// PEM file, or '-' for stdin
        path: PathBuf,
        /// Issuing role recorded with the entry
        #[arg(long, default_value = "default")]
        role: String,
    },
    /// List the certificate store
    List,
}

#[derive(Subcommand)]
pub enum RevokedCommands {
    /// List revocation records
    List,
}

#[derive(Subcommand)]
pub enum CompletionCommands {
    /// Generate bash completion script
    Bash,
    /// Generate zsh completion script
    Zsh,
    /// Generate fish completion script
    Fish,
    /// Generate PowerShell completion script
    PowerShell,
}

impl CompletionCommands {
    pub fn shell(&self) -> Shell {
        match self {
            CompletionCommands::Bash => Shell::Bash,
            CompletionCommands::Zsh => Shell::Zsh,
            CompletionCommands::Fish => Shell::Fish,
            CompletionCommands::PowerShell => Shell::PowerShell,
        }
    }
}

#[derive(Subcommand)]
pub enum CompletionHelperCommands {
    /// List certificate-store serials for completion
    Serials,
}
