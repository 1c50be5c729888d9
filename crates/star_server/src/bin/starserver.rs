//! Dedicated server
//!
//! Run with: starserver [config.toml]
//!
//! Lines typed on stdin run as console commands with full privileges.
//! `quit` or Ctrl+C stops the server.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver};
use star_server::{ServerConfig, ServerHost};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .skip(1)
        .find(|arg| !arg.starts_with("--"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("starserver.toml"));

    let config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let mut host = match ServerHost::new(config) {
        Ok(host) => host,
        Err(e) => {
            log::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);
    }) {
        log::warn!("Failed to set Ctrl+C handler: {}", e);
    }

    let lines = spawn_console_reader();
    run(&mut host, &running, &lines);
    log::info!("Server stopped after {} steps", host.world().current_step());
}

/// Read stdin on its own thread so the tick loop never blocks on it
fn spawn_console_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let spawned = thread::Builder::new().name("console".to_string()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
        log::debug!("Console input closed");
    });
    if let Err(e) = spawned {
        log::warn!("No console input: {}", e);
    }
    rx
}

fn run(host: &mut ServerHost, running: &AtomicBool, lines: &Receiver<String>) {
    let interval = Duration::from_secs_f64(1.0 / host.config().tick_rate);
    let ticker = crossbeam_channel::tick(interval);
    let mut last_status = Instant::now();
    let closed = crossbeam_channel::never();
    let mut console_open = true;

    log::info!("Server running at {} ticks/s. Type 'help' for commands.", host.config().tick_rate);

    while running.load(Ordering::SeqCst) {
        let console = if console_open { lines } else { &closed };
        select! {
            recv(ticker) -> _ => {
                host.tick();
                if last_status.elapsed() >= STATUS_INTERVAL {
                    log::info!("{}", host.status());
                    last_status = Instant::now();
                }
            }
            recv(console) -> line => match line {
                Ok(line) => console_line(host, running, line.trim()),
                Err(_) => console_open = false,
            }
        }

        for (connection, reason) in host.take_disconnected() {
            log::info!("Closing connection {}: {}", connection, reason);
        }
    }
}

fn console_line(host: &mut ServerHost, running: &AtomicBool, line: &str) {
    match line {
        "" => {}
        "quit" | "exit" => running.store(false, Ordering::SeqCst),
        _ => println!("{}", host.console_command(line)),
    }
}
