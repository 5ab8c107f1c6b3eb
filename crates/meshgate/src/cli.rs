//! Clap derive structures for the `meshgate` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// meshgate -- reachability policy for Headscale and WireGuard clients
#[derive(Debug, Parser)]
#[command(
    name = "meshgate",
    version,
    about = "Decide and enforce which VPN clients may reach each other",
    long_about = "Keeps one client list across a Headscale mesh and a WireGuard\n\
        server, stores per-client ACL policy, and pushes the resolved\n\
        reachability to both enforcement layers.\n\n\
        Run `meshgate serve` for the management API, or use the one-shot\n\
        commands below against the same state file.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "MESHGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Deployment profile to use
    #[arg(long, short = 'p', env = "MESHGATE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "MESHGATE_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "MESHGATE_INSECURE", global = true)]
    pub insecure: bool,

    /// Backend request timeout in seconds (overrides profile)
    #[arg(long, env = "MESHGATE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the engine with background sync and the management HTTP API
    Serve(ServeArgs),

    /// List and inspect VPN clients
    #[command(alias = "cl")]
    Clients(ClientsArgs),

    /// View and edit per-client ACL policy
    Acl(AclArgs),

    /// Show who a client can reach and who can reach it
    Reach {
        /// Client ID, IP, backend ID, or name
        client: String,
    },

    /// Refresh the client list from every backend
    Sync,

    /// Push the stored policy to the enforcement layers
    Apply(ApplyArgs),

    /// Show sync, enforcement, and bridge status
    Status,

    /// Toggle DNS rewriting for a client
    Dns(DnsArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Serve ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address for the management API (overrides config)
    #[arg(long, short = 'l', env = "MESHGATE_LISTEN")]
    pub listen: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

// ── Clients ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ClientsArgs {
    #[command(subcommand)]
    pub command: ClientsCommand,
}

#[derive(Debug, Subcommand)]
pub enum ClientsCommand {
    /// List every known client
    #[command(alias = "ls")]
    List {
        /// Only clients from this backend
        #[arg(long, short = 'b')]
        backend: Option<BackendFilter>,
    },

    /// Show one client with its rules
    Get {
        /// Client ID, IP, backend ID, or name
        client: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BackendFilter {
    Headscale,
    Wireguard,
}

// ── ACL ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AclArgs {
    #[command(subcommand)]
    pub command: AclCommand,
}

#[derive(Debug, Subcommand)]
pub enum AclCommand {
    /// Show a client's mode and annotated rules
    Show {
        /// Client ID, IP, backend ID, or name
        client: String,
    },

    /// Set a client's mode and/or replace its rules
    #[command(
        after_help = "Rules given with --allow/--mutual replace all stored rules.\n\
            Without them only the mode changes and stored rules are kept."
    )]
    Set {
        /// Client ID, IP, backend ID, or name
        client: String,

        /// block_all, selected, or allow_all
        #[arg(long, short = 'm')]
        policy: Option<String>,

        /// One-way rule target (repeatable)
        #[arg(long, short = 'a')]
        allow: Vec<String>,

        /// Rule target that may also connect back (repeatable)
        #[arg(long)]
        mutual: Vec<String>,

        /// Remove every stored rule
        #[arg(long, conflicts_with_all = ["allow", "mutual"])]
        clear: bool,

        /// Push to enforcement right after saving
        #[arg(long)]
        apply: bool,
    },

    /// Flip the bidirectional flag on one rule
    Toggle {
        /// Rule owner
        client: String,
        /// Rule target
        target: String,
    },

    /// List clients eligible as rule targets
    Targets {
        /// Client ID, IP, backend ID, or name
        client: String,
    },
}

// ── Apply ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Print the rule documents without submitting them
    #[arg(long, short = 'n')]
    pub dry_run: bool,
}

// ── DNS ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DnsArgs {
    /// Client ID, IP, backend ID, or name
    pub client: String,

    /// New state
    #[arg(value_enum)]
    pub state: Switch,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Print the config file location
    Path,

    /// List configured profiles
    Profiles,

    /// Make a profile the default
    Use {
        /// Profile name
        name: String,
    },

    /// Store a backend secret in the system keyring
    SetSecret {
        /// Which secret to store
        #[arg(value_enum)]
        service: SecretKind,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SecretKind {
    Headscale,
    Wireguard,
    Dns,
}

impl SecretKind {
    /// Keyring account suffix.
    pub fn service(self) -> &'static str {
        match self {
            Self::Headscale => "headscale",
            Self::Wireguard => "wireguard",
            Self::Dns => "dns",
        }
    }
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
