//! lifecycle/gate — «выполнить ровно один раз» с ожиданием результата.
//!
//! run(f):
//! - первый вызов выполняет f и запоминает результат;
//! - параллельные вызовы ждут его завершения и получают тот же результат;
//! - последующие вызовы сразу возвращают сохранённый результат.
//! wait() ждёт результата, не запуская f.
//!
//! Если f паникует, гейт возвращается в Idle и будит ожидающих:
//! следующий run() может повторить попытку. wait() при этом продолжает
//! ждать Done, поэтому Coordinator передаёт сюда f, которая не паникует.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

enum GateState<T> {
    Idle,
    Running,
    Done(T),
}

pub struct RunOnce<T: Clone> {
    state: Mutex<GateState<T>>,
    cv: Condvar,
}

impl<T: Clone> Default for RunOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> RunOnce<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
            cv: Condvar::new(),
        }
    }

    pub fn run<F: FnOnce() -> T>(&self, f: F) -> T {
        let mut st = self.lock();
        loop {
            if let GateState::Done(v) = &*st {
                return v.clone();
            }
            if matches!(&*st, GateState::Idle) {
                break;
            }
            st = self.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
        *st = GateState::Running;
        drop(st);

        let mut reset = ResetOnUnwind { gate: self, armed: true };
        let value = f();
        reset.armed = false;
        drop(reset);

        let mut st = self.lock();
        *st = GateState::Done(value.clone());
        drop(st);
        self.cv.notify_all();
        value
    }

    /// Дождаться результата run(), не запуская его самому.
    pub fn wait(&self) -> T {
        let mut st = self.lock();
        loop {
            if let GateState::Done(v) = &*st {
                return v.clone();
            }
            st = self.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn get(&self) -> Option<T> {
        match &*self.lock() {
            GateState::Done(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// run() уже запущен или завершён.
    pub fn is_triggered(&self) -> bool {
        !matches!(&*self.lock(), GateState::Idle)
    }

    fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ResetOnUnwind<'a, T: Clone> {
    gate: &'a RunOnce<T>,
    armed: bool,
}

impl<T: Clone> Drop for ResetOnUnwind<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            *self.gate.lock() = GateState::Idle;
            self.gate.cv.notify_all();
        }
    }
}
