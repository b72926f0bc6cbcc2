use super::*;
use shared::domain::{CategoryId, DistributionMethod, ProjectId, WalletAddress};

#[tokio::test]
async fn memory_store_sets_reads_and_removes() {
    let store = MemoryLocalStore::new();
    assert!(store.get("missing").await.expect("get").is_none());

    store.set("k", "v1").await.expect("set");
    store.set("k", "v2").await.expect("overwrite");
    assert_eq!(store.get("k").await.expect("get").as_deref(), Some("v2"));
    assert_eq!(store.len().await, 1);

    store.remove("k").await.expect("remove");
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("ballot.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    {
        let store = SqliteLocalStore::new(&database_url).await.expect("db");
        store.health_check().await.expect("health check");
        store.set("distributionMethod_0xabc", "\"CUSTOM\"").await.expect("set");
        store.set("distributionMethod_0xabc", "\"TOP_TO_BOTTOM\"").await.expect("upsert");
    }

    assert!(db_path.exists(), "database file should exist: {}", db_path.display());

    let reopened = SqliteLocalStore::new(&database_url).await.expect("reopen");
    let method: Option<DistributionMethod> =
        read_json(&reopened, "distributionMethod_0xabc").await.expect("read");
    assert_eq!(method, Some(DistributionMethod::TopToBottom));

    reopened.remove("distributionMethod_0xabc").await.expect("remove");
    assert!(reopened
        .get("distributionMethod_0xabc")
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn in_memory_sqlite_store_keeps_values_on_single_connection() {
    let store = SqliteLocalStore::new("sqlite::memory:").await.expect("db");
    store.set("a", "1").await.expect("set");
    assert_eq!(store.get("a").await.expect("get").as_deref(), Some("1"));
}

#[tokio::test]
async fn malformed_json_reads_as_absent() {
    let store = MemoryLocalStore::new();
    store.set("bad", "{not json").await.expect("set");
    let value: Option<Vec<ProjectId>> = read_json(&store, "bad").await.expect("read");
    assert!(value.is_none());
}

#[tokio::test]
async fn flags_round_trip_and_clear() {
    let store = MemoryLocalStore::new();
    let key = keys::unlock_dialog_shown(&WalletAddress::new("0xabc"));
    assert!(!read_flag(&store, &key).await.expect("read"));

    write_flag(&store, &key, true).await.expect("write");
    assert!(read_flag(&store, &key).await.expect("read"));

    write_flag(&store, &key, false).await.expect("clear");
    assert!(store.get(&key).await.expect("get").is_none());
}

#[test]
fn keys_are_scoped_by_wallet_and_category() {
    let address = WalletAddress::new("0xabc");
    let category = CategoryId::new("ETHEREUM_CORE_CONTRIBUTIONS");
    assert_eq!(keys::distribution_method(&address), "distributionMethod_0xabc");
    assert_eq!(keys::ballot_unlocked(&address), "ballot_unlocked_0xabc");
    assert_eq!(
        keys::skipped_projects(&category, &address),
        "skipped_projects_ETHEREUM_CORE_CONTRIBUTIONS_0xabc"
    );
}

#[test]
fn sqlite_path_ignores_memory_urls() {
    assert!(sqlite_path("sqlite::memory:").is_none());
    assert_eq!(
        sqlite_path("sqlite://./data/ballot.db?mode=rwc"),
        Some(PathBuf::from("./data/ballot.db"))
    );
}
