use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::Instant;

use execwatch_api_client::{ApiClient, RetryConfig};
use execwatch_core::ExecutionId;
use execwatch_live::{
    ApiFeed, ConnectionState, CoordinatorOptions, ExecutionFeed, TrackerUpdate,
    TrackingCoordinator,
};
use execwatch_runtime_config::{TransportPreference, WatchConfig};

use crate::config;
use crate::output::{connection_badge, print_summary, status_badge};

/// How long to wait for the post-finish detail refresh before exiting.
const RECONCILE_GRACE: Duration = Duration::from_secs(5);

pub fn build_client(config: &WatchConfig) -> Result<ApiClient> {
    let mut api = ApiClient::new(&config.server.url, config.tracking.request_timeout())
        .with_context(|| format!("Failed to create client for {}", config.server.url))?;
    api.set_auth(config.server.api_key.clone());
    Ok(api)
}

pub fn retry_config(config: &WatchConfig) -> RetryConfig {
    RetryConfig::with_max_retries(config.tracking.max_retries as usize)
}

/// Writes buffer lines that have not been written yet.
#[derive(Debug, Default)]
struct LinePrinter {
    printed: usize,
}

impl LinePrinter {
    fn flush(&mut self, lines: &[String], out: &mut impl Write) -> std::io::Result<()> {
        for line in lines.get(self.printed..).unwrap_or_default() {
            writeln!(out, "{line}")?;
        }
        self.printed = lines.len();
        out.flush()
    }
}

pub async fn run_watch(
    id: ExecutionId,
    transport: Option<TransportPreference>,
    no_follow: bool,
) -> Result<()> {
    let config = config::load_config()?;
    let mut settings = config.tracking.clone();
    if let Some(transport) = transport {
        settings.transport = transport;
    }
    if no_follow {
        settings.follow = false;
    }

    let feed: Arc<dyn ExecutionFeed> =
        Arc::new(ApiFeed::new(build_client(&config)?, retry_config(&config)));
    let mut coordinator = TrackingCoordinator::new(feed, CoordinatorOptions::from(&settings));

    coordinator.track(id.clone());
    let result = watch_until_done(&mut coordinator, &id).await;
    coordinator.untrack();
    result
}

async fn watch_until_done(coordinator: &mut TrackingCoordinator, id: &ExecutionId) -> Result<()> {
    let mut printer = LinePrinter::default();
    let mut stdout = std::io::stdout();
    let mut deadline: Option<Instant> = None;

    loop {
        let grace = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let updates = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted.");
                break;
            }
            _ = grace => break,
            updates = coordinator.recv() => updates,
        };

        let mut done = false;
        for update in &updates {
            match update {
                TrackerUpdate::Loaded {
                    execution,
                    transport,
                } => match transport {
                    Some(transport) => eprintln!(
                        "{} {} via {}",
                        execution.id,
                        status_badge(execution.status),
                        transport.name()
                    ),
                    None => {
                        printer.flush(coordinator.lines(), &mut stdout)?;
                        print_summary(execution);
                        done = true;
                    }
                },
                TrackerUpdate::LoadFailed(reason) => {
                    bail!("Could not load execution {id}: {reason}")
                }
                TrackerUpdate::Connected => {
                    eprintln!("{}", connection_badge(&coordinator.connection()))
                }
                TrackerUpdate::StatusChanged(status) => {
                    eprintln!("status -> {}", status_badge(*status))
                }
                TrackerUpdate::Finished | TrackerUpdate::Disconnected(_) => {
                    eprintln!("{}", connection_badge(&coordinator.connection()));
                    deadline.get_or_insert_with(|| Instant::now() + RECONCILE_GRACE);
                }
                TrackerUpdate::Reconciled(execution) => {
                    printer.flush(coordinator.lines(), &mut stdout)?;
                    print_summary(execution);
                    done = true;
                }
                TrackerUpdate::LinesAppended { .. } => {}
            }
        }

        if coordinator.take_scroll_request() {
            printer.flush(coordinator.lines(), &mut stdout)?;
        }
        if done {
            break;
        }
    }

    // Without follow, nothing was written live.
    printer.flush(coordinator.lines(), &mut stdout)?;

    if let ConnectionState::Disconnected(reason) = coordinator.connection() {
        bail!("Live log for {id} disconnected: {reason}");
    }
    Ok(())
}
