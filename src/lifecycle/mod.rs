//! lifecycle — Coordinator: старт, обслуживание, graceful shutdown.
//!
//! Старт:
//!   config.validate → parent dir → lock <store_file>.lock → Store::open
//!   → SnapshotScheduler::start → bind HTTP.
//!   Запросы принимаются только после start(), т.е. после загрузки Store.
//!
//! Shutdown (ровно один раз, параллельные вызовы ждут и получают тот же итог):
//!   1) scheduler.stop()
//!   2) финальный store.snapshot()
//!   3) accepting=false + unblock каждого воркера, ожидание воркеров не
//!      дольше shutdown_timeout, освобождение listener.
//! Ошибка финального снапшота не прерывает шаг 3, но становится результатом.
//! Паника внутри последовательности превращается в `Aborted`: результат
//! всё равно сохраняется, и start() не зависает в ожидании.

mod gate;
mod inflight;

pub use gate::RunOnce;
pub use inflight::{join_with_deadline, DrainReport, InFlight, InFlightGuard};

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::ServerConfig;
use crate::lock::{try_lock_store_file, LockGuard};
use crate::scheduler::SnapshotScheduler;
use crate::server::{http, middleware, Handler};
use crate::store::Store;
use crate::util::{format_duration, panic_message};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownError {
    /// Финальный снапшот не записан: данные на диске могут быть устаревшими.
    #[error("final snapshot failed: {0}")]
    FinalSnapshot(String),

    #[error("{in_flight} request(s) still running after drain timeout {timeout:?}")]
    DrainTimeout { in_flight: usize, timeout: Duration },

    #[error("shutdown aborted: {0}")]
    Aborted(String),
}

struct Inner {
    config: ServerConfig,
    store: Arc<Store>,
    scheduler: SnapshotScheduler,
    http: Mutex<Option<Arc<tiny_http::Server>>>,
    local_addr: Option<SocketAddr>,
    handler: Handler,
    accepting: Arc<AtomicBool>,
    inflight: Arc<InFlight>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    gate: RunOnce<Result<(), ShutdownError>>,
    _lock: Option<LockGuard>,
}

impl Drop for Inner {
    // без shutdown воркеры иначе так и крутили бы recv_timeout
    fn drop(&mut self) {
        self.accepting.store(false, Ordering::Release);
    }
}

/// Дёшево клонируется: обработчик сигнала и основной поток держат один Inner.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Полный старт из конфига: каталог, lock-файл, загрузка Store, scheduler, bind.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        if let Some(parent) = config
            .store_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data dir {}", parent.display()))?;
        }
        let lock = try_lock_store_file(&config.store_file)?;

        let store = Store::open(&config.store_file)
            .with_context(|| format!("load store {}", config.store_file.display()))?;
        Self::assemble(config, Arc::new(store), Some(lock))
    }

    /// Поверх уже открытого Store (без lock-файла).
    pub fn with_store(config: ServerConfig, store: Arc<Store>) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        Self::assemble(config, store, None)
    }

    fn assemble(config: ServerConfig, store: Arc<Store>, lock: Option<LockGuard>) -> Result<Self> {
        let scheduler = SnapshotScheduler::start(store.clone(), config.snapshot_interval)
            .context("start snapshot scheduler")?;

        let server = http::bind(&config.addr())?;
        let local_addr = server.server_addr().to_ip();
        let handler = middleware::build(store.clone(), &config);

        info!(
            "coordinator ready: addr={}, auth={}, snapshot_interval={}, shutdown_timeout={}",
            local_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| config.addr()),
            if config.auth_enabled() { "enabled" } else { "disabled" },
            format_duration(config.snapshot_interval),
            format_duration(config.shutdown_timeout),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                scheduler,
                http: Mutex::new(Some(Arc::new(server))),
                local_addr,
                handler,
                accepting: Arc::new(AtomicBool::new(true)),
                inflight: Arc::new(InFlight::new()),
                workers: Mutex::new(Vec::new()),
                gate: RunOnce::new(),
                _lock: lock,
            }),
        })
    }

    /// Запустить воркеры и блокироваться до завершения shutdown.
    /// Возвращает результат shutdown. Если shutdown уже прошёл, новых воркеров нет.
    pub fn start(&self) -> Result<(), ShutdownError> {
        if let Err(e) = self.spawn_workers() {
            // воркеры не поднялись: дальше обслуживать нечем
            error!("start http workers: {:#}", e);
            return self.trigger_shutdown();
        }
        self.inner.gate.wait()
    }

    fn spawn_workers(&self) -> Result<()> {
        let mut workers = lock(&self.inner.workers);
        if !workers.is_empty() || self.inner.gate.is_triggered() {
            return Ok(());
        }
        let Some(server) = lock(&self.inner.http).clone() else {
            return Ok(());
        };
        let handles = http::spawn_workers(
            &server,
            self.inner.handler.clone(),
            self.inner.config.workers,
            self.inner.accepting.clone(),
            self.inner.inflight.clone(),
        )?;
        info!(
            "serving on {} with {} worker(s)",
            self.local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|| self.inner.config.addr()),
            handles.len()
        );
        *workers = handles;
        Ok(())
    }

    /// Выполнить shutdown. Повторный или параллельный вызов не перезапускает
    /// последовательность и возвращает тот же результат.
    pub fn trigger_shutdown(&self) -> Result<(), ShutdownError> {
        self.inner.gate.run(|| contain_panic(|| self.shutdown_sequence()))
    }

    pub fn is_shutdown_triggered(&self) -> bool {
        self.inner.gate.is_triggered()
    }

    fn shutdown_sequence(&self) -> Result<(), ShutdownError> {
        let inner = &self.inner;
        let started = Instant::now();
        info!("shutting down");

        inner.scheduler.stop();

        info!("saving final snapshot");
        let snapshot_err = match inner.store.snapshot() {
            Ok(bytes) => {
                info!("final snapshot saved: {} bytes", bytes);
                None
            }
            Err(e) => {
                error!("final snapshot failed: {}", e);
                Some(ShutdownError::FinalSnapshot(e.to_string()))
            }
        };

        inner.accepting.store(false, Ordering::Release);
        let workers = std::mem::take(&mut *lock(&inner.workers));
        // будим idle-воркеры сразу, не дожидаясь ACCEPT_POLL
        if let Some(server) = lock(&inner.http).as_ref() {
            for _ in 0..workers.len() {
                server.unblock();
            }
        }
        let report = join_with_deadline(workers, inner.config.shutdown_timeout);
        let in_flight = inner.inflight.current();

        // воркеры держат только Weak: это последний Arc, listener закрывается
        drop(lock(&inner.http).take());

        let drain_err = if report.abandoned > 0 {
            warn!(
                "drain timeout after {}: {} worker(s) abandoned, {} request(s) in flight",
                format_duration(inner.config.shutdown_timeout),
                report.abandoned,
                in_flight
            );
            Some(ShutdownError::DrainTimeout {
                in_flight,
                timeout: inner.config.shutdown_timeout,
            })
        } else {
            None
        };

        info!(
            "shutdown complete in {}ms: workers_joined={}",
            started.elapsed().as_millis(),
            report.joined
        );

        match snapshot_err.or(drain_err) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Фактический адрес listener (полезно при port=0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn in_flight(&self) -> usize {
        self.inner.inflight.current()
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("local_addr", &self.inner.local_addr)
            .field("store", &self.inner.store)
            .field("shutdown", &self.inner.gate.is_triggered())
            .finish()
    }
}

fn contain_panic(f: impl FnOnce() -> Result<(), ShutdownError>) -> Result<(), ShutdownError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let msg = panic_message(&*payload);
        error!("shutdown sequence panicked: {}", msg);
        Err(ShutdownError::Aborted(msg))
    })
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
