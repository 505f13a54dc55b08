//! Change Log Module Tests
//!
//! ## Test Scopes
//! - **Id allocation**: Monotonic, unique ids under concurrent commits.
//! - **Lookup**: `get_by_id` returns exactly what was appended.
//! - **Replay**: `load_all` rebuilds the index and the high-water mark from disk,
//!   regardless of line order or of a stale marker file.
//! - **Encoding**: The tagged JSON form of `DatabaseChange`.

#[cfg(test)]
mod tests {
    use crate::changelog::log::ChangeLog;
    use crate::changelog::types::{CollectionElement, DatabaseChange};
    use crate::config::ChangeLogSettings;
    use crate::error::StoreError;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn open_log(dir: &std::path::Path) -> ChangeLog {
        ChangeLog::open(ChangeLogSettings::in_dir(dir))
            .await
            .expect("Failed to open change log")
    }

    // ============================================================
    // ID ALLOCATION
    // ============================================================

    #[tokio::test]
    async fn test_commit_assigns_increasing_ids() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path()).await;

        let first = log
            .commit(|id| DatabaseChange::collection_creation("books", id))
            .await
            .unwrap();
        let second = log
            .commit(|id| DatabaseChange::element_deletion("books", "k", id))
            .await
            .unwrap();

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(log.last_id(), 2);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_commits_never_share_an_id() {
        let dir = tempdir().unwrap();
        let log = Arc::new(open_log(dir.path()).await);

        let mut handles = Vec::new();
        for i in 0..32 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.commit(|id| DatabaseChange::collection_flush(format!("c{}", i), id))
                    .await
                    .unwrap()
                    .id()
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }

        // Gapless and unique: exactly 1..=32
        assert_eq!(ids, (1..=32).collect::<HashSet<_>>());
        assert_eq!(log.last_id(), 32);
    }

    #[tokio::test]
    async fn test_append_with_leader_id_moves_allocator() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path()).await;

        log.append(&DatabaseChange::collection_creation("books", 7))
            .await
            .unwrap();

        assert_eq!(log.last_id(), 7);
        assert_eq!(log.next_id(), 8, "A promoted replica continues the sequence");
    }

    // ============================================================
    // LOOKUP
    // ============================================================

    #[tokio::test]
    async fn test_get_by_id_returns_appended_change() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path()).await;

        let change = log
            .commit(|id| {
                DatabaseChange::element_upsert(
                    "books",
                    "dune",
                    CollectionElement::new("herbert", Some(1_700_000_000_000)),
                    id,
                )
            })
            .await
            .unwrap();

        assert_eq!(log.get_by_id(change.id()).unwrap(), change);
        assert!(log.contains(1));
    }

    #[tokio::test]
    async fn test_get_by_id_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let log = open_log(dir.path()).await;

        assert!(matches!(log.get_by_id(42), Err(StoreError::NotFound(_))));
    }

    // ============================================================
    // REPLAY
    // ============================================================

    #[tokio::test]
    async fn test_load_all_replays_in_file_order() {
        let dir = tempdir().unwrap();
        {
            let log = open_log(dir.path()).await;
            log.commit(|id| DatabaseChange::collection_creation("books", id))
                .await
                .unwrap();
            log.commit(|id| {
                DatabaseChange::element_upsert("books", "k", CollectionElement::new("v", None), id)
            })
            .await
            .unwrap();
            log.commit(|id| DatabaseChange::element_deletion("books", "k", id))
                .await
                .unwrap();
        }

        let restarted = open_log(dir.path()).await;
        let replayed = restarted.load_all().await.unwrap();

        let ids: Vec<u64> = replayed.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(replayed[1].kind(), "element-upsert");
        assert_eq!(restarted.last_id(), 3);
        assert_eq!(restarted.next_id(), 4);
    }

    #[tokio::test]
    async fn test_load_all_uses_maximum_id_not_last_line() {
        let dir = tempdir().unwrap();
        {
            let log = open_log(dir.path()).await;
            for id in [3, 9, 5] {
                log.append(&DatabaseChange::collection_flush("books", id))
                    .await
                    .unwrap();
            }
        }

        let restarted = open_log(dir.path()).await;
        let replayed = restarted.load_all().await.unwrap();

        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed.last().unwrap().id(), 5);
        assert_eq!(restarted.last_id(), 9);
    }

    #[tokio::test]
    async fn test_marker_is_advisory() {
        let dir = tempdir().unwrap();
        let settings = ChangeLogSettings::in_dir(dir.path());
        {
            let log = open_log(dir.path()).await;
            log.commit(|id| DatabaseChange::collection_creation("a", id))
                .await
                .unwrap();
            log.commit(|id| DatabaseChange::collection_creation("b", id))
                .await
                .unwrap();
        }

        // A stale or lying marker must not win over the log content
        std::fs::write(&settings.last_change_id_file, "1000").unwrap();

        let restarted = open_log(dir.path()).await;
        restarted.load_all().await.unwrap();
        assert_eq!(restarted.last_id(), 2);
    }

    #[tokio::test]
    async fn test_marker_tracks_high_water_mark() {
        let dir = tempdir().unwrap();
        let settings = ChangeLogSettings::in_dir(dir.path());
        let log = open_log(dir.path()).await;

        log.append(&DatabaseChange::collection_creation("a", 4))
            .await
            .unwrap();
        log.append(&DatabaseChange::collection_creation("b", 2))
            .await
            .unwrap();

        let marker = std::fs::read_to_string(&settings.last_change_id_file).unwrap();
        assert_eq!(marker.trim(), "4");
    }

    #[tokio::test]
    async fn test_load_all_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let log = open_log(&dir.path().join("fresh")).await;

        assert!(log.load_all().await.unwrap().is_empty());
        assert_eq!(log.last_id(), 0);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_load_all_drops_torn_tail_and_keeps_appending() {
        let dir = tempdir().unwrap();
        let settings = ChangeLogSettings::in_dir(dir.path());
        {
            let log = open_log(dir.path()).await;
            log.commit(|id| DatabaseChange::collection_creation("books", id))
                .await
                .unwrap();
        }

        // Simulate a crash in the middle of writing the second line
        let mut content = std::fs::read_to_string(&settings.changes_file).unwrap();
        content.push_str("{\"type\":\"collection-fl");
        std::fs::write(&settings.changes_file, content).unwrap();

        let restarted = open_log(dir.path()).await;
        assert_eq!(restarted.load_all().await.unwrap().len(), 1);

        restarted
            .commit(|id| DatabaseChange::collection_flush("books", id))
            .await
            .unwrap();

        let again = open_log(dir.path()).await;
        let replayed = again.load_all().await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(again.last_id(), 2);
    }

    #[tokio::test]
    async fn test_load_all_rejects_unknown_tag_mid_file() {
        let dir = tempdir().unwrap();
        let settings = ChangeLogSettings::in_dir(dir.path());
        std::fs::write(
            &settings.changes_file,
            "{\"type\":\"collection-rename\",\"collection_name\":\"a\",\"change_time\":0,\"id\":1}\n\
             {\"type\":\"collection-creation\",\"collection_name\":\"a\",\"change_time\":0,\"id\":2}\n",
        )
        .unwrap();

        let log = open_log(dir.path()).await;
        assert!(matches!(
            log.load_all().await,
            Err(StoreError::Unexpected(_))
        ));
    }

    #[tokio::test]
    async fn test_durability_failure_keeps_change_in_memory() {
        let dir = tempdir().unwrap();
        // Point the log file at a directory so opening it for append fails
        let settings = ChangeLogSettings {
            changes_file: dir.path().to_path_buf(),
            last_change_id_file: dir.path().join("marker"),
        };
        let log = ChangeLog::open(settings).await.unwrap();

        let result = log
            .commit(|id| DatabaseChange::collection_creation("books", id))
            .await;

        assert!(matches!(result, Err(StoreError::Unexpected(_))));
        assert_eq!(log.last_id(), 1);
        assert!(log.get_by_id(1).is_ok());
    }

    // ============================================================
    // ENCODING
    // ============================================================

    #[test]
    fn test_change_json_shape() {
        let change = DatabaseChange::ElementUpsert {
            collection_name: "c".to_string(),
            key: "k".to_string(),
            element: CollectionElement::new("v", None),
            change_time: 10,
            id: 1,
        };

        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["type"], "element-upsert");
        assert_eq!(json["collection_name"], "c");
        assert_eq!(json["element"]["value"], "v");
        assert!(json["element"].get("expiration_time").is_none());
        assert_eq!(json["id"], 1);
    }

    #[test]
    fn test_unknown_tag_fails_to_decode() {
        let result = serde_json::from_str::<DatabaseChange>(
            r#"{"type":"element-rename","collection_name":"c","change_time":0,"id":1}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_element_expiry() {
        let element = CollectionElement::new("v", Some(100));
        assert!(!element.is_expired(99));
        assert!(element.is_expired(100));
        assert!(!CollectionElement::new("v", None).is_expired(u64::MAX));
    }
}
