use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gantry_bridge::{
    handle_stdin, pump_output, run_in_terminal, Bridge, BridgeError, BridgeResponse,
    ExitedPayload, OutputSink, PumpEnd, SinkError, StdoutPayload,
};
use gantry_pty::SessionId;
use tokio::sync::mpsc;

const RAW_CAT: &str = "stty raw -echo; printf READY; exec cat";

#[derive(Default)]
struct CollectingSink {
    stdout: Mutex<Vec<StdoutPayload>>,
    exited: Mutex<Vec<ExitedPayload>>,
}

impl CollectingSink {
    fn text(&self) -> String {
        self.stdout
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.data.as_str())
            .collect()
    }
}

impl OutputSink for CollectingSink {
    fn emit_stdout(&self, payload: &StdoutPayload) -> Result<(), SinkError> {
        self.stdout.lock().unwrap().push(payload.clone());
        Ok(())
    }

    fn emit_exited(&self, payload: &ExitedPayload) -> Result<(), SinkError> {
        self.exited.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

struct ClosedSink;

impl OutputSink for ClosedSink {
    fn emit_stdout(&self, _: &StdoutPayload) -> Result<(), SinkError> {
        Err("window closed".into())
    }

    fn emit_exited(&self, _: &ExitedPayload) -> Result<(), SinkError> {
        Err("window closed".into())
    }
}

/// Poll until the accumulated text ends with `marker`.
fn poll_until(bridge: &Bridge, session: SessionId, marker: &str) -> String {
    let mut text = String::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !text.ends_with(marker) {
        assert!(Instant::now() < deadline, "timed out waiting for {marker:?}, got {text:?}");
        match bridge.read(Some(session)) {
            Ok(Some(chunk)) => text.push_str(&chunk),
            Ok(None) => thread::sleep(Duration::from_millis(5)),
            Err(e) => panic!("read failed: {e}"),
        }
    }
    text
}

fn open_raw_cat(bridge: &Bridge) -> SessionId {
    let session = bridge.open(Some(RAW_CAT), None, None).unwrap().session;
    poll_until(bridge, session, "READY");
    session
}

#[test]
fn test_polling_echo() {
    let bridge = Bridge::default();
    let session = open_raw_cat(&bridge);

    bridge.write(Some(session), "hello\n").unwrap();
    assert_eq!(poll_until(&bridge, session, "hello\n"), "hello\n");
}

#[test]
fn test_json_commands_end_to_end() {
    let bridge = Bridge::default();
    let opened = bridge
        .dispatch_json(&format!(
            r#"{{ "command": "open_terminal", "command_line": "{RAW_CAT}", "cols": 90, "rows": 20 }}"#
        ))
        .unwrap();
    let session = match opened {
        BridgeResponse::Opened(info) => {
            assert_eq!((info.cols, info.rows), (90, 20));
            info.session
        }
        other => panic!("unexpected response {other:?}"),
    };
    poll_until(&bridge, session, "READY");

    // The frontend's polling loop never names a session.
    assert_eq!(
        bridge
            .dispatch_json(r#"{ "command": "async_write_to_pty", "data": "ping" }"#)
            .unwrap(),
        BridgeResponse::Written
    );
    assert_eq!(poll_until(&bridge, session, "ping"), "ping");
    assert_eq!(
        bridge
            .dispatch_json(r#"{ "command": "async_read_from_pty" }"#)
            .unwrap(),
        BridgeResponse::Output { data: None }
    );

    assert_eq!(
        bridge
            .dispatch_json(r#"{ "command": "resize_terminal", "cols": 120, "rows": 40 }"#)
            .unwrap(),
        BridgeResponse::Resized {
            cols: 120,
            rows: 40
        }
    );

    assert_eq!(
        bridge
            .dispatch_json(r#"{ "command": "close_terminal" }"#)
            .unwrap(),
        BridgeResponse::Closed { existed: true }
    );
    let err = bridge
        .dispatch_json(r#"{ "command": "async_read_from_pty" }"#)
        .unwrap_err();
    assert!(matches!(err, BridgeError::SessionClosed));
}

#[test]
fn test_stdin_event_reaches_latest_session() {
    let bridge = Bridge::default();
    let session = open_raw_cat(&bridge);

    handle_stdin(&bridge, r#""abc""#).unwrap();
    handle_stdin(&bridge, &format!(r#"{{ "session": {session}, "data": "def" }}"#)).unwrap();
    assert_eq!(poll_until(&bridge, session, "abcdef"), "abcdef");
}

fn wait_finished(bridge: &Bridge, session: SessionId) {
    let handle = bridge.resolve(Some(session)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !handle.is_finished() {
        assert!(Instant::now() < deadline, "child never exited");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_write_after_exit_is_session_closed() {
    let bridge = Bridge::default();
    let session = bridge.open(Some("true"), None, None).unwrap().session;
    wait_finished(&bridge, session);

    let err = bridge.write(Some(session), "late").unwrap_err();
    assert!(err.is_termination());
}

#[test]
fn test_implicit_calls_stay_on_ended_newest_session() {
    let bridge = Bridge::default();
    let older = open_raw_cat(&bridge);
    let newer = bridge.open(Some("true"), None, None).unwrap().session;
    wait_finished(&bridge, newer);

    let err = bridge.write(None, "typed-into-ended-terminal").unwrap_err();
    assert!(err.is_termination());
    assert!(matches!(bridge.read(None), Err(BridgeError::SessionClosed)));
    assert!(matches!(bridge.read(None), Err(BridgeError::SessionClosed)));
    assert!(!bridge.close(None));

    // The older shell saw none of it and is still running.
    assert_eq!(bridge.read(Some(older)).unwrap(), None);
    let ids: Vec<SessionId> = bridge.list().iter().map(|t| t.session).collect();
    assert_eq!(ids, vec![older]);
}

#[test]
fn test_fully_read_session_is_released() {
    let bridge = Bridge::default();
    let session = bridge.open(Some("printf done"), None, None).unwrap().session;
    wait_finished(&bridge, session);

    // Output left after exit is still delivered first.
    assert_eq!(bridge.read(Some(session)).unwrap().as_deref(), Some("done"));
    assert!(bridge.list().iter().any(|t| t.session == session));

    assert!(matches!(
        bridge.read(Some(session)),
        Err(BridgeError::SessionClosed)
    ));
    assert!(bridge.list().is_empty());
    assert!(matches!(
        bridge.resolve(Some(session)),
        Err(BridgeError::SessionClosed)
    ));
}

#[test]
fn test_close_then_write() {
    let bridge = Bridge::default();
    let session = bridge.open(Some("cat"), None, None).unwrap().session;
    let handle = bridge.resolve(Some(session)).unwrap();

    assert!(bridge.close(Some(session)));
    assert!(!bridge.close(Some(session)));
    assert!(matches!(
        bridge.write(Some(session), "x"),
        Err(BridgeError::SessionClosed)
    ));
    // A handle kept from before the close reports the same thing.
    assert!(handle.write(b"x").is_err());
}

#[tokio::test]
async fn test_run_in_terminal_streams_and_reports_exit() {
    let bridge = Bridge::default();
    let sink = Arc::new(CollectingSink::default());

    let code = run_in_terminal(&bridge, "printf 'one\\ntwo'; exit 4", Arc::clone(&sink))
        .await
        .unwrap();

    assert_eq!(code, Some(4));
    // The terminal turns LF into CRLF.
    assert_eq!(sink.text(), "one\r\ntwo");
    let exited = sink.exited.lock().unwrap().clone();
    assert_eq!(exited.len(), 1);
    assert_eq!(exited[0].code, Some(4));
    assert!(bridge.list().is_empty());
}

#[tokio::test]
async fn test_run_in_terminal_spawn_failure_is_surfaced() {
    let bridge = Bridge::new(gantry_pty::BridgeConfig {
        shell: Some("/nonexistent/gantry-shell".to_string()),
        ..gantry_pty::BridgeConfig::default()
    });
    let sink = Arc::new(CollectingSink::default());

    let err = run_in_terminal(&bridge, "true", sink).await.unwrap_err();
    assert!(matches!(err, BridgeError::Spawn(_)));
    assert!(!err.is_termination());
}

#[tokio::test]
async fn test_pump_stop_leaves_session_running() {
    let bridge = Bridge::default();
    let session = bridge.open(Some("cat"), None, None).unwrap().session;
    let handle = bridge.resolve(Some(session)).unwrap();
    let sink = Arc::new(CollectingSink::default());

    let (stop_tx, stop_rx) = mpsc::channel(1);
    let pump = tokio::spawn(pump_output(Arc::clone(&handle), sink, stop_rx));
    stop_tx.send(()).await.unwrap();

    assert_eq!(pump.await.unwrap(), PumpEnd::Stopped);
    assert!(handle.is_alive());
    bridge.write(Some(session), "still here\n").unwrap();
}

#[tokio::test]
async fn test_pump_returns_when_sink_closes() {
    let bridge = Bridge::default();
    let session = bridge.open(Some("printf output"), None, None).unwrap().session;
    let handle = bridge.resolve(Some(session)).unwrap();

    let (_stop_tx, stop_rx) = mpsc::channel(1);
    let end = pump_output(handle, Arc::new(ClosedSink), stop_rx).await;
    assert_eq!(end, PumpEnd::SinkClosed);
}

#[tokio::test]
async fn test_session_released_after_pump_reports_exit() {
    let bridge = Bridge::default();
    let session = bridge.open(Some("printf bye"), None, None).unwrap().session;
    let handle = bridge.resolve(Some(session)).unwrap();
    let sink = Arc::new(CollectingSink::default());

    let (_stop_tx, stop_rx) = mpsc::channel(1);
    let end = pump_output(handle, Arc::clone(&sink), stop_rx).await;
    assert_eq!(end, PumpEnd::Exited(Some(0)));
    assert_eq!(sink.text(), "bye");

    assert!(bridge.release_finished(session));
    assert!(bridge.list().is_empty());
    assert!(matches!(bridge.read(None), Err(BridgeError::SessionClosed)));
    assert!(!bridge.release_finished(session));
}

#[test]
fn test_running_session_is_not_released() {
    let bridge = Bridge::default();
    let session = bridge.open(Some("cat"), None, None).unwrap().session;
    assert!(!bridge.release_finished(session));
    assert_eq!(bridge.list().len(), 1);
}

#[tokio::test]
async fn test_pump_on_closed_session_reports_exit() {
    let bridge = Bridge::default();
    let session = bridge.open(Some("cat"), None, None).unwrap().session;
    let handle = bridge.resolve(Some(session)).unwrap();
    handle.close();
    let sink = Arc::new(CollectingSink::default());

    let (_stop_tx, stop_rx) = mpsc::channel(1);
    let end = pump_output(Arc::clone(&handle), Arc::clone(&sink), stop_rx).await;

    assert!(matches!(end, PumpEnd::Exited(_)));
    let exited = sink.exited.lock().unwrap().clone();
    assert_eq!(exited.len(), 1);
    assert_eq!(exited[0].session, session);
    assert!(sink.stdout.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_pump_after_close_reports_exit() {
    let bridge = Bridge::default();
    let session = bridge.open(Some("cat"), None, None).unwrap().session;
    let handle = bridge.resolve(Some(session)).unwrap();
    let sink = Arc::new(CollectingSink::default());

    let (_stop_tx, stop_rx) = mpsc::channel(1);
    let pump = tokio::spawn(pump_output(Arc::clone(&handle), Arc::clone(&sink), stop_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    bridge.close(Some(session));

    assert!(matches!(pump.await.unwrap(), PumpEnd::Exited(_)));
    assert_eq!(sink.exited.lock().unwrap().len(), 1);
}
