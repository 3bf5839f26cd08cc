use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use tracing::{info, warn};

use crate::args::ServerArgs;
use crate::engine::{EngineRunner, RunnerSettings};
use crate::error::AppResult;
use crate::hub::BroadcastHub;
use crate::report::JsonReportSink;
use crate::scripts::DirectoryScriptStore;
use crate::server::{self, serve_control, serve_stream};
use crate::session::{SessionManager, SessionSettings};
use crate::shutdown_handlers::{setup_signal_shutdown_handler, shutdown_channel};

/// Extra time a stop request may take beyond the engine kill timeout.
const STOP_RESPONSE_SLACK: Duration = Duration::from_secs(5);

/// Parse arguments and config, then serve until Ctrl+C or SIGTERM.
///
/// # Errors
///
/// Returns an error for invalid arguments or config, when a listener cannot
/// be bound, or when a server task panics.
pub fn run() -> AppResult<()> {
    let matches = ServerArgs::command().get_matches();
    let mut args = ServerArgs::from_arg_matches(&matches)?;
    if let Some(config) = crate::config::load_config(args.config.as_deref())? {
        crate::config::apply_config(&mut args, &matches, &config)?;
    }

    crate::logger::init_logging(args.verbose, args.no_color);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(serve(args))
}

async fn serve(args: ServerArgs) -> AppResult<()> {
    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);

    if !args.scripts_dir.is_dir() {
        warn!(
            "Scripts directory {} does not exist; every start-test will fail until it does.",
            args.scripts_dir.display()
        );
    }

    let (hub, _hub_task) = BroadcastHub::spawn(args.publish_interval);
    let runner = EngineRunner::new(RunnerSettings {
        program: args.engine.clone(),
        extra_args: args.engine_args.clone(),
        kill_timeout: args.kill_timeout,
        output_capacity: args.output_capacity.get(),
        scratch_dir: std::env::temp_dir(),
    });
    let manager = SessionManager::new(
        runner,
        Arc::new(DirectoryScriptStore::new(args.scripts_dir.clone())),
        Arc::new(JsonReportSink::new(args.reports_dir.clone())),
        hub.clone(),
        SessionSettings {
            sampling_interval: args.sampling_interval,
            completion_grace: args.completion_grace,
            retention: args.retention,
            history_capacity: args.history_capacity.get(),
        },
    );

    let control_listener = server::bind(&args.control_listen, "Control API").await?;
    let stream_listener = server::bind(&args.stream_listen, "Metrics stream").await?;
    let stop_timeout = args.kill_timeout.saturating_add(STOP_RESPONSE_SLACK);
    let control = tokio::spawn(serve_control(
        control_listener,
        manager.clone(),
        stop_timeout,
        shutdown_tx.subscribe(),
    ));
    let stream = tokio::spawn(serve_stream(stream_listener, hub, shutdown_tx.subscribe()));
    info!(
        "Engine '{}', scripts from {}, reports to {}.",
        args.engine,
        args.scripts_dir.display(),
        args.reports_dir.display()
    );

    if shutdown_rx.recv().await.is_err() {
        // All senders dropped; treat as shutdown.
    }
    manager.stop_all().await;
    control.await?;
    stream.await?;
    signal_handle.await?;
    info!("Shutdown complete.");
    Ok(())
}
