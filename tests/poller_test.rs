use std::sync::Arc;
use std::time::Duration;

use taskline::db::SqliteStore;
use taskline::models::{ChangeEvent, NewTask, Principal, TaskPatch};
use taskline::remote::{ChangePoller, Notification, RecordStore, Scope, Subscription};

async fn next_change(sub: &mut Subscription) -> ChangeEvent {
    match tokio::time::timeout(Duration::from_secs(2), sub.recv()).await {
        Ok(Some(Notification::Change(event))) => event,
        other => panic!("expected a change event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_poller_reports_changes_since_baseline() {
    let store = SqliteStore::in_memory()
        .await
        .expect("Failed to create store");
    let existing = store.insert(&Scope::All, &NewTask::new("existing")).await.unwrap();

    let poller = ChangePoller::new(
        Arc::new(store.clone()),
        Scope::All,
        Duration::from_millis(20),
    );
    let mut sub = poller.spawn().await.expect("Failed to start poller");

    let added = store.insert(&Scope::All, &NewTask::new("added")).await.unwrap();
    match next_change(&mut sub).await {
        ChangeEvent::Insert { new } => assert_eq!(new.id, added.id),
        other => panic!("expected INSERT, got {:?}", other),
    }

    store
        .update(&Scope::All, existing.id, &TaskPatch::completed(true))
        .await
        .unwrap();
    match next_change(&mut sub).await {
        ChangeEvent::Update { new } => {
            assert_eq!(new.id, existing.id);
            assert!(new.completed);
        }
        other => panic!("expected UPDATE, got {:?}", other),
    }

    store.delete(&Scope::All, added.id).await.unwrap();
    match next_change(&mut sub).await {
        ChangeEvent::Delete { old } => assert_eq!(old.id, added.id),
        other => panic!("expected DELETE, got {:?}", other),
    }

    sub.unsubscribe();
}

#[tokio::test]
async fn test_poller_respects_owner_scope() {
    let store = SqliteStore::in_memory().await.unwrap();
    let alice = Principal::new("alice", "alice@example.com");
    let bob = Principal::new("bob", "bob@example.com");

    let poller = ChangePoller::new(
        Arc::new(store.clone()),
        Scope::Owner(alice.clone()),
        Duration::from_millis(20),
    );
    let mut sub = poller.spawn().await.unwrap();

    store.insert(&Scope::Owner(bob), &NewTask::new("bob's")).await.unwrap();
    store.insert(&Scope::Owner(alice.clone()), &NewTask::new("alice's")).await.unwrap();

    match next_change(&mut sub).await {
        ChangeEvent::Insert { new } => {
            assert_eq!(new.title, "alice's");
            assert_eq!(new.user_id.as_deref(), Some(alice.id.as_str()));
        }
        other => panic!("expected INSERT, got {:?}", other),
    }
}
