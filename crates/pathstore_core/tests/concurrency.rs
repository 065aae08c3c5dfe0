use pathstore_core::{AttrMap, AttrValue, AttributeStore, StoreError, StoreOptions};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn attrs(pairs: &[(&str, AttrValue)]) -> AttrMap {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect()
}

fn file_store(dir: &tempfile::TempDir) -> AttributeStore {
    AttributeStore::open(dir.path().join("store.db")).unwrap()
}

#[test]
fn concurrent_writers_get_distinct_stamps() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(file_store(&dir));

    let handles = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..20)
                    .map(|n| {
                        store
                            .update(
                                &format!("/w={worker}/n={n}"),
                                &attrs(&[("k", n.into())]),
                                None,
                            )
                            .unwrap()
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>();

    let mut stamps = BTreeSet::new();
    for handle in handles {
        let local = handle.join().unwrap();
        assert!(local.windows(2).all(|pair| pair[0] < pair[1]));
        stamps.extend(local);
    }

    assert_eq!(stamps.len(), 160);
    assert_eq!(stamps.last().copied(), Some(160));
    assert_eq!(store.get_timestamp().unwrap(), 160);
    assert_eq!(store.feed(0, None).count(), 160);
}

#[test]
fn readers_run_alongside_writer() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(file_store(&dir));
    store.update("/seed", &attrs(&[("k", 0.into())]), None).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for n in 1..=50 {
                store
                    .update(&format!("/p/n={n}"), &attrs(&[("k", n.into())]), None)
                    .unwrap();
            }
        })
    };

    let readers = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut last_seen = 0;
                for _ in 0..50 {
                    let clock = store.get_timestamp().unwrap();
                    assert!(clock >= last_seen);
                    last_seen = clock;

                    let visible = store.feed(0, None).count() as i64;
                    assert!(visible >= clock);
                    assert!(store.browse("/p").all(|child| child.is_ok()));
                }
            })
        })
        .collect::<Vec<_>>();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(store.browse("/p").count(), 50);
}

#[test]
fn open_write_scope_is_invisible_to_readers_until_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);

    store
        .write(|writer| {
            writer.update("/x", &attrs(&[("k", 1.into())]), None)?;
            assert_eq!(store.get("/x", "k")?, None);
            assert_eq!(store.get_timestamp()?, 0);
            Ok(())
        })
        .unwrap();

    assert_eq!(store.get("/x", "k").unwrap(), Some(AttrValue::Integer(1)));
    assert_eq!(store.get_timestamp().unwrap(), 1);
}

#[test]
fn second_handle_sees_committed_writes() {
    let dir = tempfile::tempdir().unwrap();
    let first = file_store(&dir);
    let second = file_store(&dir);

    first.update("/x", &attrs(&[("k", 1.into())]), None).unwrap();
    assert_eq!(second.get("/x", "k").unwrap(), Some(AttrValue::Integer(1)));

    assert_eq!(second.update("/y", &attrs(&[("k", 1.into())]), None).unwrap(), Some(2));
    assert_eq!(first.get_timestamp().unwrap(), 2);
}

#[test]
fn competing_handle_surfaces_write_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let holder = file_store(&dir);
    let impatient = AttributeStore::open_with_options(
        dir.path().join("store.db"),
        StoreOptions {
            busy_timeout: Duration::from_millis(50),
            ..StoreOptions::default()
        },
    )
    .unwrap();

    holder
        .write(|writer| {
            writer.update("/x", &attrs(&[("k", 1.into())]), None)?;
            let err = impatient
                .update("/y", &attrs(&[("k", 1.into())]), None)
                .unwrap_err();
            assert!(matches!(err, StoreError::WriteConflict(_)));
            Ok(())
        })
        .unwrap();

    assert_eq!(impatient.get("/x", "k").unwrap(), Some(AttrValue::Integer(1)));
    assert_eq!(impatient.get("/y", "k").unwrap(), None);
}
