use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;

use QuiverMarks::{Bookmark, SchedulerError, SnapshotScheduler, Store};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("qmtest-sched-{prefix}-{pid}-{t}-{id}"))
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn zero_interval_is_rejected() -> Result<()> {
    let root = unique_root("zero");
    fs::create_dir_all(&root)?;
    let store = Arc::new(Store::open(root.join("bookmarks.json"))?);
    let err = SnapshotScheduler::start(store, Duration::ZERO).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidInterval));
    Ok(())
}

#[test]
fn periodic_snapshot_reaches_disk() -> Result<()> {
    let root = unique_root("tick");
    fs::create_dir_all(&root)?;
    let path = root.join("bookmarks.json");
    let store = Arc::new(Store::open(&path)?);
    store.add(Bookmark::new("https://a", "A", "", vec![]));

    let sched = SnapshotScheduler::start(store.clone(), Duration::from_millis(30))?;
    assert!(wait_until(Duration::from_secs(5), || store.snapshots_written() >= 2));
    sched.stop();

    let reopened = Store::open(&path)?;
    assert_eq!(reopened.len(), 1);
    Ok(())
}

#[test]
fn failed_tick_does_not_stop_the_loop() -> Result<()> {
    let root = unique_root("fail");
    let path = root.join("bookmarks.json");
    // каталога ещё нет: первые тики падают
    let store = Arc::new(Store::open(&path)?);
    store.add(Bookmark::new("https://a", "A", "", vec![]));

    let sched = SnapshotScheduler::start(store.clone(), Duration::from_millis(20))?;
    thread::sleep(Duration::from_millis(120));
    assert_eq!(store.snapshots_written(), 0);
    assert!(sched.is_running());

    fs::create_dir_all(&root)?;
    assert!(wait_until(Duration::from_secs(5), || store.snapshots_written() >= 1));
    assert!(path.exists());
    sched.stop();
    Ok(())
}

#[test]
fn stop_is_idempotent_and_final() -> Result<()> {
    let root = unique_root("stop");
    fs::create_dir_all(&root)?;
    let store = Arc::new(Store::open(root.join("bookmarks.json"))?);

    let sched = Arc::new(SnapshotScheduler::start(store.clone(), Duration::from_millis(15))?);
    assert!(wait_until(Duration::from_secs(5), || store.snapshots_written() >= 1));

    // stop из другого потока, потом повторно из этого
    let other = {
        let sched = sched.clone();
        thread::spawn(move || sched.stop())
    };
    other.join().expect("stop panicked");
    sched.stop();
    assert!(!sched.is_running());

    let after = store.snapshots_written();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(store.snapshots_written(), after, "no snapshot after stop()");
    Ok(())
}

#[test]
fn stop_does_not_wait_for_a_full_interval() -> Result<()> {
    let root = unique_root("fast-stop");
    fs::create_dir_all(&root)?;
    let store = Arc::new(Store::open(root.join("bookmarks.json"))?);

    let sched = SnapshotScheduler::start(store.clone(), Duration::from_secs(3600))?;
    let t0 = Instant::now();
    sched.stop();
    assert!(t0.elapsed() < Duration::from_secs(2));
    assert_eq!(store.snapshots_written(), 0);
    Ok(())
}
