use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::store::DEFAULT_TOKEN_FILE;

/// stepsync: submit daily step counts for one or more accounts
#[derive(Parser, Debug)]
#[command(name = "stepsync", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub args: RunArgs,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum Commands {
    /// Run one batch over every configured account (default)
    Run,

    /// Run a batch on a fixed interval until interrupted
    Daemon {
        /// Seconds between batch starts
        #[arg(long, default_value = "86400")]
        interval: u64,
    },

    /// Show the cached credential bundles from the encrypted token file
    Tokens,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Account identities (phone or email), '#'-separated
    #[arg(short, long, global = true, env = "STEPSYNC_USER")]
    pub user: Option<String>,

    /// Account secrets, '#'-separated, in the same order as --user
    #[arg(short, long, global = true, env = "STEPSYNC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Fixed step count; a random value in [min, max] is used when absent
    #[arg(long, global = true)]
    pub step: Option<String>,

    #[arg(long, global = true)]
    pub min_step: Option<u32>,

    #[arg(long, global = true)]
    pub max_step: Option<u32>,

    /// 16-character key for the encrypted token file (AES_KEY wins if set)
    #[arg(long, global = true)]
    pub aes_key: Option<String>,

    #[arg(long, global = true, env = "STEPSYNC_TOKEN_FILE", default_value = DEFAULT_TOKEN_FILE)]
    pub token_file: PathBuf,

    #[arg(long, global = true, env = "PUSH_PLUS_TOKEN", hide_env_values = true)]
    pub push_plus_token: Option<String>,

    /// Only send reports when the Beijing hour equals this value
    #[arg(long, global = true)]
    pub push_plus_hour: Option<u32>,

    /// Omit per-account lines once this many accounts ran
    #[arg(long, global = true)]
    pub push_plus_max: Option<usize>,

    /// Webhook endpoint for run summaries (repeatable)
    #[arg(long = "webhook-url", global = true)]
    pub webhook_urls: Vec<String>,

    /// HMAC-SHA256 signing secret for webhook deliveries
    #[arg(long, global = true, env = "STEPSYNC_WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// Seconds to wait between accounts in sequential mode
    #[arg(long, global = true)]
    pub sleep_gap: Option<f64>,

    /// Run accounts concurrently
    #[arg(long, global = true)]
    pub concurrent: bool,

    #[arg(long, global = true)]
    pub max_workers: Option<usize>,

    /// Minimum seconds between account launches in concurrent mode
    #[arg(long, global = true)]
    pub launch_spacing: Option<f64>,

    /// Trust cached app tokens by age alone, without asking the remote service
    #[arg(long, global = true)]
    pub skip_token_check: bool,

    /// Scale the random step range by how much of the day has passed
    #[arg(long, global = true)]
    pub scale_by_time: bool,

    /// Per-request timeout for remote calls, in seconds
    #[arg(long, global = true, default_value = "15")]
    pub request_timeout: u64,

    /// Prompt for accounts, secrets, and step count
    #[arg(short, long, global = true)]
    pub interactive: bool,
}
