mod common;

use common::{dates, repo, seed_sheet, user, FlakyStore, Op};
use std::time::Duration;
use timebox_core::store::{CollectionPath, DocumentPath, DocumentStore};
use timebox_core::{
    BlockColor, NewTimeBlock, RepoError, SheetId, SheetPatch, SheetValidationError, WriteOp,
    WriteOutcome,
};

#[tokio::test(start_paused = true)]
async fn create_derives_id_from_date_and_persists() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();

    let sheet = repo.create(&uid, "2024-03-01", None).await.unwrap();
    assert_eq!(sheet.id.as_str(), "sheet-2024-03-01");
    assert_eq!(sheet.title, "Friday, March 1");
    assert!(sheet.priorities.is_empty() && sheet.notes.is_empty() && sheet.schedule.is_empty());

    let stored = store
        .inner()
        .get_document(&DocumentPath::sheet(&uid, &sheet.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["date"], "2024-03-01");
}

#[tokio::test(start_paused = true)]
async fn creating_the_same_date_twice_overwrites_one_document() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();

    let first = repo.create(&uid, "2024-03-01", Some("first")).await.unwrap();
    let second = repo.create(&uid, "2024-03-01", Some("second")).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.id.as_str(), "sheet-2024-03-01");

    let documents = store
        .inner()
        .query_collection(&CollectionPath::sheets(&uid), None, None)
        .await
        .unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].fields["title"], "second");
}

#[tokio::test(start_paused = true)]
async fn recreating_a_date_discards_the_edit_armed_for_it() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let sheet = repo.create(&uid, "2024-03-01", Some("A")).await.unwrap();
    let pending = repo.update(&uid, &sheet.id, SheetPatch::title("edited")).unwrap();

    repo.create(&uid, "2024-03-01", Some("B")).await.unwrap();
    assert_eq!(pending.await.unwrap(), WriteOutcome::Cancelled);
    assert!(!repo.has_pending_write(&uid, &sheet.id));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.calls(Op::Update), 0);
    let cached = repo.get(&uid, &sheet.id).await.unwrap().unwrap();
    let stored = store
        .inner()
        .get_document(&DocumentPath::sheet(&uid, &sheet.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.title, "B");
    assert_eq!(stored["title"], "B");
}

#[tokio::test(start_paused = true)]
async fn create_rejects_invalid_dates_before_any_write() {
    let store = FlakyStore::shared();
    let repo = repo(&store);

    let err = repo.create(&user(), "2024-02-30", None).await.unwrap_err();
    assert!(matches!(
        err,
        RepoError::InvalidInput(SheetValidationError::InvalidDate(_))
    ));
    assert_eq!(store.calls(Op::Set), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_create_invalidates_the_optimistic_list() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    seed_sheet(&store, &uid, "2024-01-01", "seeded").await;
    repo.preload(&uid).await;
    assert!(repo
        .cache_stats()
        .keys
        .contains(&"user-1-timeboxes".to_string()));

    store.fail(Op::Set);
    let err = repo.create(&uid, "2024-03-01", None).await.unwrap_err();
    assert!(matches!(
        err,
        RepoError::WriteFailure {
            op: WriteOp::Create,
            ..
        }
    ));
    let keys = repo.cache_stats().keys;
    assert!(!keys.contains(&"user-1-timeboxes".to_string()));
    assert!(!keys.iter().any(|key| key.ends_with("sheet-2024-03-01")));

    store.heal();
    let listed = repo.list(&uid).await.unwrap();
    assert_eq!(dates(&listed), vec!["2024-01-01"]);
}

#[tokio::test(start_paused = true)]
async fn get_is_cache_first() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    seed_sheet(&store, &uid, "2024-03-01", "seeded").await;
    let sheet_id = SheetId::for_date("2024-03-01");

    let first = repo.get(&uid, &sheet_id).await.unwrap().unwrap();
    let second = repo.get(&uid, &sheet_id).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(store.calls(Op::Get), 1);
}

#[tokio::test(start_paused = true)]
async fn get_of_missing_sheet_is_none() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let missing = repo
        .get(&user(), &SheetId::for_date("1999-01-01"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test(start_paused = true)]
async fn read_failure_is_not_cached() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    seed_sheet(&store, &uid, "2024-03-01", "seeded").await;
    let sheet_id = SheetId::for_date("2024-03-01");

    store.fail(Op::Get);
    assert!(matches!(
        repo.get(&uid, &sheet_id).await,
        Err(RepoError::ReadFailure(_))
    ));
    assert_eq!(repo.cache_stats().size, 0);

    store.heal();
    let loaded = repo.get(&uid, &sheet_id).await.unwrap().unwrap();
    assert_eq!(loaded.title, "seeded");
    assert_eq!(store.calls(Op::Get), 2);
}

#[tokio::test(start_paused = true)]
async fn update_is_visible_immediately_and_written_after_quiet_period() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let sheet = repo.create(&uid, "2024-03-01", Some("Original")).await.unwrap();

    let pending = repo
        .update(&uid, &sheet.id, SheetPatch::title("Renamed"))
        .unwrap();
    let cached = repo.get(&uid, &sheet.id).await.unwrap().unwrap();
    assert_eq!(cached.title, "Renamed");
    assert!(cached.updated_at > sheet.updated_at);
    assert_eq!(store.calls(Op::Update), 0);
    assert!(repo.has_pending_write(&uid, &sheet.id));

    tokio::time::sleep(Duration::from_millis(999)).await;
    assert_eq!(store.calls(Op::Update), 0);

    assert_eq!(pending.await.unwrap(), WriteOutcome::Flushed);
    assert_eq!(store.calls(Op::Update), 1);
    assert!(!repo.has_pending_write(&uid, &sheet.id));
    let stored = store
        .inner()
        .get_document(&DocumentPath::sheet(&uid, &sheet.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["title"], "Renamed");
}

#[tokio::test(start_paused = true)]
async fn failed_update_forces_the_next_get_to_refetch() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let sheet = repo.create(&uid, "2024-03-01", Some("Original")).await.unwrap();

    store.fail(Op::Update);
    let pending = repo.update(&uid, &sheet.id, SheetPatch::title("X")).unwrap();
    assert_eq!(repo.get(&uid, &sheet.id).await.unwrap().unwrap().title, "X");

    let err = pending.await.unwrap_err();
    assert!(err.is_write_failure());

    let gets_before = store.calls(Op::Get);
    let reread = repo.get(&uid, &sheet.id).await.unwrap().unwrap();
    assert_eq!(reread.title, "Original");
    assert_eq!(store.calls(Op::Get), gets_before + 1);
}

#[tokio::test(start_paused = true)]
async fn update_of_a_sheet_deleted_elsewhere_is_a_write_failure() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let sheet = repo.create(&uid, "2024-03-01", None).await.unwrap();
    store
        .inner()
        .delete_document(&DocumentPath::sheet(&uid, &sheet.id))
        .await
        .unwrap();

    let pending = repo.update(&uid, &sheet.id, SheetPatch::title("late")).unwrap();
    let err = pending.await.unwrap_err();
    assert!(matches!(
        err,
        RepoError::WriteFailure {
            op: WriteOp::Update,
            ..
        }
    ));
    assert!(err.is_not_found());
    assert!(repo.get(&uid, &sheet.id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn edits_within_one_quiet_period_merge_into_one_write() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let sheet = repo.create(&uid, "2024-03-01", None).await.unwrap();

    let rename = repo.update(&uid, &sheet.id, SheetPatch::title("Deep work")).unwrap();
    let cached = repo.get(&uid, &sheet.id).await.unwrap().unwrap();
    let add_priority = cached.add_priority("Ship release").unwrap();
    let prioritise = repo.update(&uid, &sheet.id, add_priority).unwrap();

    assert_eq!(rename.await.unwrap(), WriteOutcome::Superseded);
    assert_eq!(prioritise.await.unwrap(), WriteOutcome::Flushed);
    assert_eq!(store.calls(Op::Update), 1);

    let fresh = common::repo(&store);
    let stored = fresh.get(&uid, &sheet.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Deep work");
    assert_eq!(stored.priorities.len(), 1);
    assert_eq!(stored.priorities[0].text, "Ship release");
}

#[tokio::test(start_paused = true)]
async fn update_rejects_malformed_schedule_times() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let sheet = repo.create(&uid, "2024-03-01", None).await.unwrap();

    let mut block = sheet
        .add_time_block(NewTimeBlock {
            start_time: "09:00".to_string(),
            end_time: "10:00".to_string(),
            activity: "Standup".to_string(),
            color: BlockColor::Primary,
        })
        .unwrap();
    if let Some(schedule) = block.schedule.as_mut() {
        schedule[0].start_time = "9:00".to_string();
    }

    assert!(matches!(
        repo.update(&uid, &sheet.id, block),
        Err(RepoError::InvalidInput(SheetValidationError::InvalidTime(_)))
    ));
    assert!(!repo.has_pending_write(&uid, &sheet.id));
}

#[tokio::test(start_paused = true)]
async fn flush_pending_writes_without_waiting_for_the_quiet_period() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let sheet = repo.create(&uid, "2024-03-01", None).await.unwrap();
    let started = tokio::time::Instant::now();

    let _pending = repo.update(&uid, &sheet.id, SheetPatch::title("now")).unwrap();
    repo.flush_pending().await;

    assert_eq!(store.calls(Op::Update), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn delete_purges_cache_and_discards_the_armed_write() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let sheet = repo.create(&uid, "2024-03-01", None).await.unwrap();
    let pending = repo.update(&uid, &sheet.id, SheetPatch::title("late")).unwrap();

    repo.delete(&uid, &sheet.id).await.unwrap();
    assert_eq!(pending.await.unwrap(), WriteOutcome::Cancelled);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.calls(Op::Update), 0);
    assert!(repo.cache_stats().keys.is_empty());
    assert!(repo.get(&uid, &sheet.id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_delete_reports_write_failure_and_keeps_cache() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let sheet = repo.create(&uid, "2024-03-01", None).await.unwrap();

    store.fail(Op::Delete);
    assert!(matches!(
        repo.delete(&uid, &sheet.id).await,
        Err(RepoError::WriteFailure {
            op: WriteOp::Delete,
            ..
        })
    ));
    assert!(repo
        .cache_stats()
        .keys
        .contains(&"user-1-timebox-sheet-2024-03-01".to_string()));
}

#[tokio::test(start_paused = true)]
async fn failed_delete_after_discarding_an_edit_refetches() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let sheet = repo.create(&uid, "2024-03-01", Some("Original")).await.unwrap();
    let pending = repo.update(&uid, &sheet.id, SheetPatch::title("Dropped")).unwrap();

    store.fail(Op::Delete);
    assert!(repo.delete(&uid, &sheet.id).await.is_err());
    assert_eq!(pending.await.unwrap(), WriteOutcome::Cancelled);

    let current = repo.get(&uid, &sheet.id).await.unwrap().unwrap();
    assert_eq!(current.title, "Original");
}

#[tokio::test(start_paused = true)]
async fn delete_many_reports_partial_failure_per_id() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    let mut ids = Vec::new();
    for date in ["2024-01-01", "2024-01-02", "2024-01-03"] {
        ids.push(repo.create(&uid, date, None).await.unwrap().id);
    }
    store.fail_doc(Op::Delete, ids[1].as_str());

    let report = repo.delete_many(&uid, &ids).await;
    assert_eq!(report.deleted, vec![ids[0].clone(), ids[2].clone()]);
    assert_eq!(report.failed_ids(), vec![&ids[1]]);
    assert!(!report.is_complete());

    let keys = repo.cache_stats().keys;
    assert!(!keys.contains(&format!("user-1-timebox-{}", ids[0])));
    assert!(!keys.contains(&format!("user-1-timebox-{}", ids[2])));
    assert!(keys.contains(&format!("user-1-timebox-{}", ids[1])));

    store.heal();
    let remaining = common::repo(&store).list(&uid).await.unwrap();
    assert_eq!(dates(&remaining), vec!["2024-01-02"]);
}

#[tokio::test(start_paused = true)]
async fn list_is_ordered_by_date_descending() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    for date in ["2024-01-01", "2024-03-05", "2024-02-10"] {
        repo.create(&uid, date, None).await.unwrap();
    }

    let listed = repo.list(&uid).await.unwrap();
    assert_eq!(dates(&listed), vec!["2024-03-05", "2024-02-10", "2024-01-01"]);
}

#[tokio::test(start_paused = true)]
async fn list_is_cache_first_and_starts_a_live_subscription() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    seed_sheet(&store, &uid, "2024-01-01", "a").await;

    repo.list(&uid).await.unwrap();
    repo.list(&uid).await.unwrap();
    assert_eq!(store.calls(Op::Query), 1);
    assert!(repo.subscriptions().is_active(&uid));
}

#[tokio::test(start_paused = true)]
async fn exists_for_date_queries_when_cold_and_scans_when_warm() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    seed_sheet(&store, &uid, "2024-03-01", "a").await;

    assert!(repo.exists_for_date(&uid, "2024-03-01").await.unwrap());
    assert!(!repo.exists_for_date(&uid, "2024-03-02").await.unwrap());
    assert_eq!(store.calls(Op::Query), 2);

    repo.preload(&uid).await;
    let queries = store.calls(Op::Query);
    assert!(repo.exists_for_date(&uid, "2024-03-01").await.unwrap());
    assert_eq!(store.calls(Op::Query), queries);

    assert!(matches!(
        repo.exists_for_date(&uid, "03/01/2024").await,
        Err(RepoError::InvalidInput(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn exists_for_date_surfaces_read_failure() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    store.fail(Op::Query);
    assert!(matches!(
        repo.exists_for_date(&user(), "2024-03-01").await,
        Err(RepoError::ReadFailure(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn preload_warms_list_and_settings() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    seed_sheet(&store, &uid, "2024-03-01", "a").await;
    store
        .inner()
        .set_document(
            &DocumentPath::user(&uid),
            common::into_document(serde_json::json!({
                "settings": {"preferences": {"darkMode": true}}
            })),
        )
        .await
        .unwrap();

    repo.preload(&uid).await;
    let settings = repo.cached_settings(&uid).unwrap();
    assert!(settings.preferences.dark_mode);
    assert_eq!(settings.preferences.start_time, "08:00");
    assert!(settings.notifications.email);

    let queries = store.calls(Op::Query);
    assert_eq!(dates(&repo.list(&uid).await.unwrap()), vec!["2024-03-01"]);
    assert_eq!(store.calls(Op::Query), queries);
}

#[tokio::test(start_paused = true)]
async fn preload_swallows_failures() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    store.fail(Op::Query);
    store.fail(Op::Get);

    repo.preload(&uid).await;
    assert!(repo.cached_settings(&uid).is_none());
    assert_eq!(repo.cache_stats().size, 0);
}

#[tokio::test(start_paused = true)]
async fn clear_cache_drops_every_entry() {
    let store = FlakyStore::shared();
    let repo = repo(&store);
    let uid = user();
    repo.create(&uid, "2024-03-01", None).await.unwrap();
    repo.preload(&uid).await;
    assert_eq!(repo.cache_stats().size, 3);

    repo.clear_cache();
    assert_eq!(repo.cache_stats().size, 0);
}
