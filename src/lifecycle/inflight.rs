//! lifecycle/inflight — учёт запросов «в полёте» и ожидание воркеров на shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Счётчик запросов, которые воркеры взяли, но ещё не ответили.
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// RAII: +1 сейчас, -1 при drop (в том числе при панике).
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard { owner: self }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Итог ожидания воркеров.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub joined: usize,
    /// Воркеры, не успевшие завершиться до дедлайна (отцеплены).
    pub abandoned: usize,
}

/// Ждать завершения воркеров не дольше `timeout`, затем join готовых.
/// Незавершённые отцепляются: их JoinHandle просто отбрасывается.
/// `timeout`, не представимый как Instant, означает «без дедлайна».
pub fn join_with_deadline(workers: Vec<JoinHandle<()>>, timeout: Duration) -> DrainReport {
    let deadline = Instant::now().checked_add(timeout);
    let before_deadline = || deadline.map_or(true, |d| Instant::now() < d);
    while workers.iter().any(|h| !h.is_finished()) && before_deadline() {
        std::thread::sleep(DRAIN_POLL);
    }

    let mut report = DrainReport::default();
    for h in workers {
        if h.is_finished() {
            if h.join().is_err() {
                log::error!("http worker panicked");
            }
            report.joined += 1;
        } else {
            report.abandoned += 1;
        }
    }
    report
}
