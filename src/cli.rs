use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::lifecycle::Coordinator;
use crate::logging::init_logger;
use crate::store::read_snapshot;
use crate::util::parse_duration;

#[derive(Parser, Debug)]
#[command(
    name = "quivermarks",
    version,
    about = "Bookmark store over HTTP with periodic JSON snapshots",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Запустить HTTP-сервер до SIGINT/SIGTERM.
    Serve {
        /// JSON config file (defaults < file < QM_* env < flags)
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        store_file: Option<PathBuf>,
        /// Basic-auth password; empty disables auth
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        log_level: Option<String>,
        #[arg(long)]
        log_json: bool,
        /// e.g. 500ms, 1s, 1m30s
        #[arg(long, value_parser = parse_duration)]
        snapshot_interval: Option<Duration>,
        #[arg(long, value_parser = parse_duration)]
        shutdown_timeout: Option<Duration>,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Прочитать снапшот офлайн (тот же декодер, что и при старте).
    Inspect {
        #[arg(long)]
        store_file: PathBuf,
        /// Вывести всю коллекцию как JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Serve {
            config,
            host,
            port,
            store_file,
            password,
            log_level,
            log_json,
            snapshot_interval,
            shutdown_timeout,
            workers,
        } => {
            let mut cfg = ServerConfig::default();
            if let Some(path) = &config {
                cfg = cfg.apply_file(path)?;
            }
            cfg = cfg.apply_env()?;

            if let Some(v) = host {
                cfg = cfg.with_host(v);
            }
            if let Some(v) = port {
                cfg = cfg.with_port(v);
            }
            if let Some(v) = store_file {
                cfg = cfg.with_store_file(v);
            }
            if password.is_some() {
                cfg = cfg.with_auth_password(password);
            }
            if let Some(v) = log_level {
                cfg = cfg.with_log_level(v);
            }
            if log_json {
                cfg = cfg.with_log_json(true);
            }
            if let Some(d) = snapshot_interval {
                cfg = cfg.with_snapshot_interval(d);
            }
            if let Some(d) = shutdown_timeout {
                cfg = cfg.with_shutdown_timeout(d);
            }
            if let Some(n) = workers {
                cfg = cfg.with_workers(n);
            }
            cfg.validate()?;

            init_logger(&cfg.log_level, cfg.log_json)?;
            info!("{}", cfg);
            serve(cfg)?;
        }
        Cmd::Inspect { store_file, json } => {
            let coll = read_snapshot(&store_file)
                .with_context(|| format!("inspect {}", store_file.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&coll)?);
            } else {
                let size = std::fs::metadata(&store_file).map(|m| m.len()).unwrap_or(0);
                let tagged = coll.records.values().filter(|b| !b.tags.is_empty()).count();
                println!("Snapshot {}", store_file.display());
                println!("  file_size   = {} bytes", size);
                println!("  records     = {}", coll.records.len());
                println!("  tagged      = {}", tagged);
                println!("  idx_counter = {}", coll.id_counter);
                if let Some((first, _)) = coll.records.first_key_value() {
                    println!("  min_id      = {}", first);
                }
                if let Some((last, _)) = coll.records.last_key_value() {
                    println!("  max_id      = {}", last);
                }
            }
        }
    }
    Ok(())
}

fn serve(cfg: ServerConfig) -> Result<()> {
    // обработчик ставится до старта: SIGINT во время загрузки не теряется
    let signal = Arc::new(ShutdownSignal::default());
    let on_signal = signal.clone();
    ctrlc::set_handler(move || {
        info!("signal received");
        on_signal.notify();
    })
    .map_err(|e| anyhow!("install signal handler: {}", e))?;

    let coord = Coordinator::new(cfg)?;
    signal.attach(&coord);

    // итог shutdown отдаётся start() в основном потоке
    coord
        .start()
        .map_err(|e| anyhow!("shutdown: {}", e))
}

/// Связка сигнала с Coordinator, который может быть ещё не готов.
/// Сигнал до attach запоминается; attach тогда сразу запускает shutdown.
#[derive(Default)]
struct ShutdownSignal {
    slot: Mutex<SignalSlot>,
}

#[derive(Default)]
struct SignalSlot {
    coord: Option<Coordinator>,
    pending: bool,
}

impl ShutdownSignal {
    fn notify(&self) {
        let coord = {
            let mut slot = self.lock();
            slot.pending = true;
            slot.coord.clone()
        };
        if let Some(coord) = coord {
            let _ = coord.trigger_shutdown();
        }
    }

    fn attach(&self, coord: &Coordinator) {
        let pending = {
            let mut slot = self.lock();
            slot.coord = Some(coord.clone());
            slot.pending
        };
        if pending {
            info!("signal arrived during startup, shutting down");
            let _ = coord.trigger_shutdown();
        }
    }

    fn lock(&self) -> MutexGuard<'_, SignalSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
