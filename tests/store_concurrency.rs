use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use QuiverMarks::{Bookmark, Store};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("qmtest-conc-{prefix}-{pid}-{t}-{id}"))
}

#[test]
fn readers_and_writers_on_one_record() -> Result<()> {
    const READERS: usize = 50;
    const WRITERS: usize = 5;
    const OPS: usize = 300;

    let root = unique_root("rw");
    fs::create_dir_all(&root)?;
    let store = Arc::new(Store::open(root.join("bookmarks.json"))?);
    let id = store.add(Bookmark::new("https://start", "start", "", vec![]));

    let barrier = Arc::new(Barrier::new(READERS + WRITERS));
    let mut handles = Vec::new();

    for w in 0..WRITERS {
        let store = store.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..OPS {
                let b = Bookmark::new(format!("https://w{w}/{i}"), format!("w{w}"), "", vec![]);
                // ни одного потерянного update
                store.update(id, b).expect("update must succeed");
            }
        }));
    }
    for _ in 0..READERS {
        let store = store.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..OPS {
                let b = store.get(id).expect("record must stay present");
                // запись всегда целиком от одного писателя
                assert!(b.title == "start" || b.location.starts_with(&format!("https://{}/", b.title)));
                assert_eq!(store.list().len(), 1);
            }
        }));
    }
    for h in handles {
        h.join().expect("thread panicked");
    }

    let last = store.get(id)?;
    let writer: usize = last.title.trim_start_matches('w').parse()?;
    assert!(writer < WRITERS);
    assert_eq!(last.location, format!("https://w{writer}/{}", OPS - 1));
    assert_eq!(store.id_counter(), 1);
    Ok(())
}

#[test]
fn concurrent_adds_get_unique_consecutive_ids() -> Result<()> {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;

    let root = unique_root("adds");
    fs::create_dir_all(&root)?;
    let store = Arc::new(Store::open(root.join("bookmarks.json"))?);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                let mut ids = Vec::with_capacity(PER_THREAD);
                for i in 0..PER_THREAD {
                    ids.push(store.add(Bookmark::new("https://x", format!("{t}-{i}"), "", vec![])));
                }
                ids
            })
        })
        .collect();

    let mut all = BTreeSet::new();
    for h in handles {
        let ids = h.join().expect("thread panicked");
        // внутри одного потока id строго растут
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        for id in ids {
            assert!(all.insert(id), "duplicate id {id}");
        }
    }

    let total = (THREADS * PER_THREAD) as u64;
    assert_eq!(all.len() as u64, total);
    assert_eq!(all.first().copied(), Some(1));
    assert_eq!(all.last().copied(), Some(total));
    assert_eq!(store.id_counter(), total);
    Ok(())
}

#[test]
fn snapshots_during_mutation_always_reload() -> Result<()> {
    let root = unique_root("snapmut");
    fs::create_dir_all(&root)?;
    let path = root.join("bookmarks.json");
    let store = Arc::new(Store::open(&path)?);

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..500 {
                let id = store.add(Bookmark::new("https://m", format!("m{i}"), "", vec![]));
                if i % 3 == 0 {
                    let _ = store.delete(id);
                }
            }
        })
    };

    for _ in 0..20 {
        store.snapshot()?;
        // каждый промежуточный файл — целостная коллекция
        let reopened = Store::open(&path)?;
        assert!(reopened.list().keys().all(|id| *id <= reopened.id_counter()));
    }
    writer.join().expect("writer panicked");
    Ok(())
}
