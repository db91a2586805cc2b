//! Command-line interface definitions for the notiflow client.
//!
//! Configuration flags come before the subcommand and are layered by
//! `ortho_config` (defaults, `.notiflow.toml`, `NOTIFLOW_*` environment,
//! flags); the subcommand itself is parsed by clap.

#![expect(
    non_snake_case,
    reason = "Clap/OrthoConfig derive macros generate helper modules with uppercase names"
)]
#![allow(
    missing_docs,
    reason = "OrthoConfig and Clap derive macros generate items that cannot be documented"
)]
#![allow(
    unfulfilled_lint_expectations,
    reason = "derive macros conditionally generate items"
)]

use std::{ffi::OsString, time::Duration};

use clap::{Args, CommandFactory, Parser, Subcommand};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use crate::{
    poller::MAX_POLL_INTERVAL,
    push::Backoff,
    session::{RacePolicy, SyncSettings},
};

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api";

/// Client configuration shared by every subcommand.
#[expect(
    missing_docs,
    reason = "OrthoConfig derive macro generates items that cannot be documented"
)]
#[derive(Args, OrthoConfig, Serialize, Deserialize, Default, Debug, Clone)]
#[ortho_config(prefix = "NOTIFLOW_")]
pub struct ClientConfig {
    /// Base URL of the notification REST API.
    #[ortho_config(default = DEFAULT_API_URL.to_owned())]
    #[arg(long, default_value_t = String::from(DEFAULT_API_URL))]
    pub api_url: String,
    /// `host:port` of the push channel; without it the client only polls.
    #[arg(long)]
    pub channel_addr: Option<String>,
    /// Bearer token sent with every REST request.
    #[arg(long)]
    pub token: Option<String>,
    /// Seconds between polls while the push channel is down.
    #[ortho_config(default = 60)]
    #[arg(long, default_value_t = 60)]
    pub poll_interval_secs: u64,
    /// Records fetched per page.
    #[ortho_config(default = 50)]
    #[arg(long, default_value_t = 50)]
    pub page_size: u32,
    /// Upper bound on the push reconnect delay, in seconds.
    #[ortho_config(default = 30)]
    #[arg(long, default_value_t = 30)]
    pub reconnect_max_secs: u64,
    /// Skip poll ticks while a mutation awaits confirmation.
    #[ortho_config(default = false)]
    #[arg(long, default_value_t = false)]
    pub defer_poll_during_mutations: bool,
}

impl ClientConfig {
    /// Session settings derived from this configuration.
    #[must_use]
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            page_size: self.page_size.max(1),
            poll_interval: Duration::from_secs(
                self.poll_interval_secs
                    .clamp(1, MAX_POLL_INTERVAL.as_secs()),
            ),
            race_policy: if self.defer_poll_during_mutations {
                RacePolicy::DeferWhileMutating
            } else {
                RacePolicy::LastWriteWins
            },
        }
    }

    /// Push reconnect backoff derived from this configuration.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        let max = Duration::from_secs(self.reconnect_max_secs.max(1));
        Backoff {
            initial: Backoff::default().initial.min(max),
            max,
        }
    }
}

/// Identifies one notification.
#[derive(Args, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NotificationArgs {
    /// Notification identifier.
    pub id: String,
}

/// CLI subcommands exposed by `notiflow`.
#[derive(Subcommand, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Follow notifications live until interrupted.
    #[command(name = "watch")]
    Watch,
    /// Print the first page of notifications.
    #[command(name = "list")]
    List,
    /// Mark one notification read.
    #[command(name = "mark-read")]
    MarkRead(NotificationArgs),
    /// Mark every notification read.
    #[command(name = "mark-all-read")]
    MarkAllRead,
    /// Archive one notification.
    #[command(name = "archive")]
    Archive(NotificationArgs),
    /// Delete one notification.
    #[command(name = "delete")]
    Delete(NotificationArgs),
}

/// Top-level CLI entry point.
#[derive(Parser, Deserialize, Serialize, Debug, Clone)]
#[command(name = "notiflow", version, about)]
pub struct Cli {
    /// Client configuration.
    #[command(flatten)]
    pub config: ClientConfig,
    /// Optional subcommand; defaults to `watch`.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Fully merged configuration plus the command to run.
#[derive(Debug, Clone)]
pub struct ResolvedCli {
    /// Layered client configuration.
    pub config: ClientConfig,
    /// Command to run.
    pub command: Commands,
}

/// Parse `args` and layer the configuration.
///
/// # Errors
///
/// Returns the clap error for invalid arguments (including `--help`), or the
/// configuration loading failure.
pub fn load_cli<I, T>(args: I) -> anyhow::Result<ResolvedCli>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let argv: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let cli = Cli::try_parse_from(&argv)?;
    let split = subcommand_index(&argv);
    let config = ClientConfig::load_from_iter(argv.iter().take(split).cloned())?;
    Ok(ResolvedCli {
        config,
        command: cli.command.unwrap_or(Commands::Watch),
    })
}

/// Index of the first positional argument, which clap treats as the
/// subcommand, or `args.len()` when there is none.
fn subcommand_index(args: &[OsString]) -> usize {
    let command = Cli::command();
    let switches: Vec<String> = command
        .get_arguments()
        .filter(|arg| !arg.get_action().takes_values())
        .filter_map(|arg| arg.get_long().map(|long| format!("--{long}")))
        .collect();
    let mut rest = args.iter().enumerate().skip(1);
    while let Some((index, arg)) = rest.next() {
        let text = arg.to_string_lossy();
        if !text.starts_with('-') {
            return index;
        }
        let takes_value = text.starts_with("--")
            && !text.contains('=')
            && !switches.iter().any(|switch| *switch == text);
        if takes_value {
            rest.next();
        }
    }
    args.len()
}
