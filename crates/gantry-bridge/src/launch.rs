use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::events::{pump_output, OutputSink, PumpEnd};

/// Run one command line through the configured shell in a fresh terminal,
/// streaming its output to `sink` until it exits.
///
/// Used for installer and updater runs whose progress the frontend shows in
/// a terminal view. The session is closed afterwards and the child's exit
/// code returned.
pub async fn run_in_terminal<S: OutputSink + ?Sized>(
    bridge: &Bridge,
    command_line: &str,
    sink: Arc<S>,
) -> Result<Option<u32>, BridgeError> {
    let info = bridge.open(Some(command_line), None, None)?;
    let session = bridge.resolve(Some(info.session))?;
    log::info!("session {}: running `{command_line}`", info.session);

    // Held for the whole run; dropping it would stop the pump.
    let (_stop_tx, stop_rx) = mpsc::channel::<()>(1);
    let code = match pump_output(Arc::clone(&session), sink, stop_rx).await {
        PumpEnd::Exited(code) => code,
        PumpEnd::Stopped | PumpEnd::SinkClosed => session.wait_exit().await,
    };

    bridge.registry().close(info.session);
    Ok(code)
}
