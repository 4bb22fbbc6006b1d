// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod commands;
mod ipc;
mod state;

use std::path::PathBuf;

use gantry_bridge::{handle_stdin, STDIN_EVENT};
use gantry_pty::BridgeConfig;
use state::AppState;
use tauri::{Listener, Manager, RunEvent};
use tauri_plugin_log::{Target, TargetKind};

fn main() {
    // Set up the global ~/.gantry directory structure.
    let gantry_home = home_dir().join(".gantry");
    let log_dir = gantry_home.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("warning: could not create {}: {e}", log_dir.display());
    }

    // Logging is not up yet, so config problems go to stderr.
    let config_path = gantry_home.join("terminal.json");
    let config = BridgeConfig::load_or_default(&config_path).unwrap_or_else(|e| {
        eprintln!(
            "warning: ignoring {}: {e}; using defaults",
            config_path.display()
        );
        BridgeConfig::default()
    });

    let app = tauri::Builder::default()
        .plugin(
            tauri_plugin_log::Builder::new()
                .clear_targets()
                .targets([
                    Target::new(TargetKind::Stdout),
                    Target::new(TargetKind::Folder {
                        path: log_dir,
                        file_name: Some("gantry".to_string()),
                    }),
                ])
                .level(log::LevelFilter::Info)
                .build(),
        )
        .manage(AppState::new(config))
        .setup(|app| {
            let handle = app.handle().clone();
            app.listen(STDIN_EVENT, move |event| {
                let state = handle.state::<AppState>();
                match handle_stdin(&state.bridge, event.payload()) {
                    Ok(()) => {}
                    // Typing into a terminal that just ended.
                    Err(e) if e.is_termination() => log::debug!("stdin dropped: {e}"),
                    Err(e) => log::warn!("stdin event failed: {e}"),
                }
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::terminal::open_terminal,
            commands::terminal::async_write_to_pty,
            commands::terminal::async_read_from_pty,
            commands::terminal::resize_terminal,
            commands::terminal::close_terminal,
            commands::terminal::list_terminals,
            commands::terminal::subscribe_output,
            commands::terminal::unsubscribe_output,
            commands::terminal::run_in_terminal,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(|app, event| {
        if let RunEvent::Exit = event {
            log::info!("shutting down, closing all terminals");
            app.state::<AppState>().bridge.registry().close_all();
        }
    });
}

/// The user's home directory, or the working directory if unknown.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
