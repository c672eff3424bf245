//! Run configuration.
//!
//! Sources, highest priority first: the `CONFIG` environment variable (a JSON
//! object, as used by scheduled CI jobs), command-line flags with their env
//! fallbacks, then interactive prompts for whatever is still missing.

use std::fmt;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::executor::StepSpec;
use crate::scheduler::{RunMode, SchedulerConfig};
use crate::vault::TokenKey;

pub const DEFAULT_MIN_STEP: u32 = 18000;
pub const DEFAULT_MAX_STEP: u32 = 25000;
pub const DEFAULT_SLEEP_GAP_SECS: f64 = 5.0;
pub const DEFAULT_PUSH_MAX: usize = crate::notification::DEFAULT_PUSH_MAX;
const MAX_DEFAULT_WORKERS: usize = 32;

/// Separator for multi-account identity and secret lists.
pub const LIST_SEPARATOR: char = '#';

pub struct Config {
    pub identities: Vec<String>,
    pub secrets: Vec<String>,
    pub steps: StepSpec,
    pub scale_by_time: bool,
    pub mode: RunMode,
    pub account_delay: Duration,
    pub max_workers: usize,
    pub launch_spacing: Duration,
    pub skip_remote_verify: bool,
    /// `None` disables token persistence.
    pub token_key: Option<TokenKey>,
    pub token_file: PathBuf,
    pub request_timeout: Duration,
    pub push_plus_token: Option<String>,
    pub report_hour: Option<u32>,
    pub push_max: usize,
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
}

impl Config {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            mode: self.mode,
            account_delay: self.account_delay,
            max_workers: self.max_workers,
            launch_spacing: self.launch_spacing,
            steps: self.steps,
            skip_remote_verify: self.skip_remote_verify,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("accounts", &self.identities.len())
            .field("steps", &self.steps)
            .field("scale_by_time", &self.scale_by_time)
            .field("mode", &self.mode)
            .field("account_delay", &self.account_delay)
            .field("max_workers", &self.max_workers)
            .field("launch_spacing", &self.launch_spacing)
            .field("skip_remote_verify", &self.skip_remote_verify)
            .field("persistence", &self.token_key.is_some())
            .field("token_file", &self.token_file)
            .field("request_timeout", &self.request_timeout)
            .field("push_plus", &self.push_plus_token.is_some())
            .field("report_hour", &self.report_hour)
            .field("push_max", &self.push_max)
            .field("webhooks", &self.webhook_urls.len())
            .finish()
    }
}

/// Available parallelism plus a few extra slots for I/O-bound work.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_add(4)
        .min(MAX_DEFAULT_WORKERS)
}

/// The `CONFIG` JSON object. Values may be JSON strings or scalars.
#[derive(Debug, Default)]
pub struct JsonConfig(Map<String, Value>);

impl JsonConfig {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .context("CONFIG is not valid JSON; quote every key and value with double quotes")?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => bail!("CONFIG must be a JSON object"),
        }
    }

    /// Non-empty textual value of `key`.
    fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn number<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.text(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(key, value = %raw, "ignoring non-numeric CONFIG value");
                None
            }
        }
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.text(key).map(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Read the environment and prompt if needed, then resolve.
pub fn load(args: &RunArgs) -> anyhow::Result<Config> {
    let json = match std::env::var("CONFIG") {
        Ok(raw) => Some(JsonConfig::parse(&raw)?),
        Err(_) => None,
    };

    let mut args = args.clone();
    if json.is_none() && (args.interactive || args.user.is_none() || args.password.is_none()) {
        if io::stdin().is_terminal() {
            prompt_missing(&mut args)?;
        } else {
            warn!("stdin is not a terminal, skipping interactive prompts");
        }
    }

    let aes_env = std::env::var("AES_KEY").ok();
    resolve(&args, json.as_ref(), aes_env.as_deref())
}

/// Merge the sources without touching the process environment.
pub fn resolve(
    args: &RunArgs,
    json: Option<&JsonConfig>,
    aes_key_env: Option<&str>,
) -> anyhow::Result<Config> {
    let empty = JsonConfig::default();
    let json = json.unwrap_or(&empty);

    let users = json
        .text("USER")
        .or_else(|| args.user.clone())
        .context("no account identities configured (CONFIG.USER or --user)")?;
    let passwords = json
        .text("PWD")
        .or_else(|| args.password.clone())
        .context("no account secrets configured (CONFIG.PWD or --password)")?;

    let min = json
        .number("MIN_STEP")
        .or(args.min_step)
        .unwrap_or(DEFAULT_MIN_STEP);
    let max = json
        .number("MAX_STEP")
        .or(args.max_step)
        .unwrap_or(DEFAULT_MAX_STEP);
    let steps = match json.text("STEP").or_else(|| args.step.clone()) {
        Some(raw) if !raw.trim().is_empty() => match raw.trim().parse::<u32>() {
            Ok(fixed) => StepSpec::Fixed(fixed),
            Err(_) => {
                warn!(value = %raw, "step is not a number, using the random range");
                StepSpec::range(min, max)?
            }
        },
        _ => StepSpec::range(min, max)?,
    };

    let concurrent = json.flag("USE_CONCURRENT").unwrap_or(false) || args.concurrent;
    let max_workers = json
        .number("MAX_WORKERS")
        .or(args.max_workers)
        .unwrap_or_else(default_workers)
        .max(1);

    let account_delay = seconds(
        json.number("SLEEP_GAP")
            .or(args.sleep_gap)
            .unwrap_or(DEFAULT_SLEEP_GAP_SECS),
        DEFAULT_SLEEP_GAP_SECS,
    );
    let launch_spacing = seconds(args.launch_spacing.unwrap_or(0.0), 0.0);

    let skip_remote_verify = json.flag("SKIP_TOKEN_CHECK").unwrap_or(false) || args.skip_token_check;

    let push_plus_token = json
        .text("PUSH_PLUS_TOKEN")
        .or_else(|| args.push_plus_token.clone())
        .filter(|t| !t.is_empty() && t != "NO");
    let report_hour = match json.number::<u32>("PUSH_PLUS_HOUR").or(args.push_plus_hour) {
        Some(hour) if hour < 24 => Some(hour),
        Some(hour) => {
            warn!(hour, "report hour must be 0-23, reporting every run");
            None
        }
        None => None,
    };
    let push_max = json
        .number("PUSH_PLUS_MAX")
        .or(args.push_plus_max)
        .unwrap_or(DEFAULT_PUSH_MAX);

    let mut webhook_urls: Vec<String> = json
        .text("WEBHOOK_URLS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    webhook_urls.extend(args.webhook_urls.iter().cloned());

    let token_key = match aes_key_env.or(args.aes_key.as_deref()) {
        Some(raw) => match TokenKey::parse(raw) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "token persistence disabled");
                None
            }
        },
        None => {
            info!("AES_KEY not set, tokens will not be saved");
            None
        }
    };

    Ok(Config {
        identities: split_list(&users),
        secrets: split_list(&passwords),
        steps,
        scale_by_time: args.scale_by_time,
        mode: if concurrent {
            RunMode::Concurrent
        } else {
            RunMode::Sequential
        },
        account_delay,
        max_workers,
        launch_spacing,
        skip_remote_verify,
        token_key,
        token_file: args.token_file.clone(),
        request_timeout: Duration::from_secs(args.request_timeout.max(1)),
        push_plus_token,
        report_hour,
        push_max,
        webhook_urls,
        webhook_secret: args.webhook_secret.clone().filter(|s| !s.is_empty()),
    })
}

/// Split a `#`-separated list, keeping positions so identities and secrets
/// still pair up.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(LIST_SEPARATOR)
        .map(|s| s.trim().to_string())
        .collect()
}

fn seconds(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0))
        .unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

fn prompt_missing(args: &mut RunArgs) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let read_line = |prompt: &str| -> anyhow::Result<String> {
        eprint!("{prompt}");
        io::stderr().flush().ok();
        let mut line = String::new();
        stdin.lock().read_line(&mut line).context("failed to read from stdin")?;
        Ok(line.trim().to_string())
    };

    if args.user.is_none() {
        let users = read_line("Accounts (phone or email, '#'-separated): ")?;
        args.user = Some(users).filter(|s| !s.is_empty());
    }
    if args.step.is_none() {
        let step = read_line("Step count (empty for random): ")?;
        args.step = Some(step).filter(|s| !s.is_empty());
    }
    if args.password.is_none() {
        let secrets = rpassword::prompt_password("Passwords ('#'-separated): ")
            .context("failed to read password")?;
        args.password = Some(secrets.trim().to_string()).filter(|s| !s.is_empty());
    }
    Ok(())
}
