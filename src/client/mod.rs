//! Command-line client.
//!
//! This module exposes the command-line interface and the runtime that drives
//! a [`NotificationSession`] from it, so the binary stays a thin wrapper that
//! only needs to call [`run`].

pub mod cli;

use std::{
    ffi::OsString,
    io::{self, Write},
    sync::Arc,
};

use anyhow::{Context, Result};
pub use cli::{Cli, ClientConfig, Commands, NotificationArgs, ResolvedCli, load_cli};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    models::{NotificationId, NotificationRecord},
    push::{LinesPushChannel, NoopPushChannel, PushChannel},
    session::NotificationSession,
    source::{NotificationSource, RestNotificationSource},
};

/// Parse process arguments and execute the requested command.
///
/// # Errors
///
/// Returns any failure while loading configuration, talking to the server or
/// confirming a mutation.
pub async fn run() -> Result<()> {
    let args: Vec<OsString> = std::env::args_os().collect();
    let resolved = match load_cli(args) {
        Ok(resolved) => resolved,
        Err(error) => match error.downcast::<clap::Error>() {
            Ok(usage) => usage.exit(),
            Err(other) => return Err(other),
        },
    };
    init_tracing();
    dispatch(resolved).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
    {
        debug!(%error, "tracing subscriber already installed");
    }
}

/// Execute an already resolved command line.
///
/// # Errors
///
/// See [`run`].
pub async fn dispatch(resolved: ResolvedCli) -> Result<()> {
    let ResolvedCli { config, command } = resolved;
    let source: Arc<dyn NotificationSource> = Arc::new(
        RestNotificationSource::new(&config.api_url, config.token.clone())
            .with_context(|| format!("invalid API URL {}", config.api_url))?,
    );
    match command {
        Commands::Watch => watch(&config, source).await,
        Commands::List => list(&config, source).await,
        Commands::MarkRead(args) => {
            let id = NotificationId::from(args.id);
            mutate(&config, source, |session| async move {
                session.mark_as_read(&id).await
            })
            .await
        }
        Commands::MarkAllRead => {
            mutate(&config, source, |session| async move {
                session.mark_all_as_read().await
            })
            .await
        }
        Commands::Archive(args) => {
            let id = NotificationId::from(args.id);
            mutate(&config, source, |session| async move { session.archive(&id).await }).await
        }
        Commands::Delete(args) => {
            let id = NotificationId::from(args.id);
            mutate(&config, source, |session| async move { session.delete(&id).await }).await
        }
    }
}

async fn rest_session(
    config: &ClientConfig,
    source: Arc<dyn NotificationSource>,
) -> Arc<NotificationSession> {
    Arc::new(
        NotificationSession::builder(source, Arc::new(NoopPushChannel))
            .settings(config.sync_settings())
            .start()
            .await,
    )
}

async fn close(session: Arc<NotificationSession>) {
    match Arc::try_unwrap(session) {
        Ok(session) => session.shutdown().await,
        Err(_) => warn!("session still shared at exit; dropping"),
    }
}

async fn list(config: &ClientConfig, source: Arc<dyn NotificationSource>) -> Result<()> {
    let session = rest_session(config, source).await;
    let state = session.snapshot();
    close(session).await;
    if let Some(fault) = state.last_error() {
        anyhow::bail!("failed to fetch notifications: {}", fault.message);
    }
    let mut out = io::stdout().lock();
    writeln!(out, "{} unread", state.unread_count())?;
    for record in state.records() {
        writeln!(out, "{}", render(record))?;
    }
    Ok(())
}

fn render(record: &NotificationRecord) -> String {
    let marker = if record.is_read() { ' ' } else { '*' };
    format!(
        "{marker} {id}  {title}  [{kind:?}/{priority:?}]  {created}",
        id = record.id,
        title = record.title,
        kind = record.kind,
        priority = record.priority,
        created = record.created_at.to_rfc3339(),
    )
}

async fn mutate<F, Fut>(
    config: &ClientConfig,
    source: Arc<dyn NotificationSource>,
    action: F,
) -> Result<()>
where
    F: FnOnce(Arc<NotificationSession>) -> Fut,
    Fut: Future<Output = Result<(), crate::gateway::MutationError>>,
{
    let session = rest_session(config, source).await;
    let result = action(Arc::clone(&session)).await;
    let unread = session.snapshot().unread_count();
    close(session).await;
    result?;
    writeln!(io::stdout().lock(), "ok ({unread} unread)")?;
    Ok(())
}

async fn watch(config: &ClientConfig, source: Arc<dyn NotificationSource>) -> Result<()> {
    let channel: Arc<dyn PushChannel> = match &config.channel_addr {
        Some(addr) => Arc::new(LinesPushChannel::new(addr.clone(), config.backoff())),
        None => {
            info!("no push channel configured; polling only");
            Arc::new(NoopPushChannel)
        }
    };
    let session = NotificationSession::builder(source, channel)
        .settings(config.sync_settings())
        .toast(|record| {
            info!(
                notification_id = %record.id,
                title = %record.title,
                priority = ?record.priority,
                "new notification"
            );
        })
        .start()
        .await;
    session.on_projection_changed(|state| {
        info!(
            unread_count = state.unread_count(),
            shown = state.records().len(),
            "notifications updated"
        );
    });
    shutdown_signal().await;
    info!("shutdown signal received");
    session.shutdown().await;
    Ok(())
}

/// Waits for a shutdown signal, completing when termination is requested.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(error) = res {
                            warn!(%error, "failed to listen for Ctrl-C");
                        }
                    },
                    _ = term.recv() => {},
                }
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
}

async fn wait_for_ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for Ctrl-C");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::models::NotificationPriority;

    #[rstest]
    fn renders_unread_marker_and_metadata() {
        let created = chrono::Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp");
        let record = NotificationRecord::new("n1", "Disk full", created)
            .with_priority(NotificationPriority::High);

        assert_eq!(
            render(&record),
            "* n1  Disk full  [System/High]  2024-05-01T12:00:00+00:00"
        );
        assert!(render(&record.read(created)).starts_with("  n1"));
    }

    #[rstest]
    #[tokio::test]
    async fn invalid_api_url_is_reported() {
        let resolved = ResolvedCli {
            config: ClientConfig {
                api_url: "not a url".to_owned(),
                ..ClientConfig::default()
            },
            command: Commands::List,
        };

        let err = dispatch(resolved).await.expect_err("bad url");

        assert!(err.to_string().contains("invalid API URL"));
    }
}
