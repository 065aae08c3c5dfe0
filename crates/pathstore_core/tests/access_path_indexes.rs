use pathstore_core::{AttrMap, AttrValue, AttributeStore, FeedEvent, SearchQuery};
use rusqlite::Connection;
use std::path::Path;

fn attrs(pairs: &[(&str, AttrValue)]) -> AttrMap {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect()
}

fn index_names(path: &Path) -> Vec<String> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND tbl_name = 'item' AND name LIKE 'item_%'
             ORDER BY name;",
        )
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap()
}

fn assert_queries_answer_correctly(store: &AttributeStore) {
    let events = store
        .feed(1, Some(&["series"]))
        .collect::<Result<Vec<FeedEvent>, _>>()
        .unwrap();
    assert_eq!(
        events.iter().map(|event| event.path.as_str()).collect::<Vec<_>>(),
        vec!["/s/id=2"]
    );

    let query = SearchQuery::new().with("series", "b");
    assert_eq!(store.search(&query).unwrap(), vec!["/s/id=2"]);

    let children = store.browse("/s").collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(children, vec!["id=1", "id=2"]);
}

#[test]
fn bulk_import_without_indexes_then_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let store = AttributeStore::open(&path).unwrap();
    assert_eq!(index_names(&path).len(), 3);

    assert_eq!(store.drop_indexes().unwrap(), 3);
    assert_eq!(store.drop_indexes().unwrap(), 0);
    assert!(index_names(&path).is_empty());

    store
        .update("/s/id=1", &attrs(&[("series", "a".into())]), None)
        .unwrap();
    store
        .update("/s/id=2", &attrs(&[("series", "b".into())]), None)
        .unwrap();
    assert_queries_answer_correctly(&store);

    assert_eq!(store.ensure_indexes().unwrap(), 3);
    assert_eq!(store.ensure_indexes().unwrap(), 0);
    assert_eq!(
        index_names(&path),
        vec!["item_key_updated_at", "item_key_value", "item_updated_at"]
    );
    assert_queries_answer_correctly(&store);
}

#[test]
fn dropped_indexes_survive_reopen_until_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    {
        let store = AttributeStore::open(&path).unwrap();
        store.drop_indexes().unwrap();
    }

    let reopened = AttributeStore::open(&path).unwrap();
    assert!(index_names(&path).is_empty());
    assert_eq!(reopened.ensure_indexes().unwrap(), 3);
}
