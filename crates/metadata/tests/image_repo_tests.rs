//! Record store state machine tests, run against SQLite and (when Docker is
//! available) PostgreSQL.

mod common;

use almanac_core::ImageDate;
use almanac_metadata::{
    ClaimOutcome, ClaimToken, ImageRepo, MetadataError, MetadataStore, RecordState,
};
use common::{TestMetadata, postgres_or_skip};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

fn day(s: &str) -> ImageDate {
    ImageDate::parse(s).unwrap()
}

/// Claim `date` and return the token, failing the test if the claim is lost.
async fn claim(store: &Arc<dyn MetadataStore>, date: ImageDate, at: OffsetDateTime) -> ClaimToken {
    match store.claim_image(date, at).await.unwrap() {
        ClaimOutcome::Claimed(token) => token,
        ClaimOutcome::AlreadyClaimed => panic!("expected to win the claim on {date}"),
    }
}

async fn check_claim_resolve_lifecycle(store: Arc<dyn MetadataStore>) {
    let date = day("2024-01-01");
    let now = OffsetDateTime::now_utc();

    assert_eq!(store.get_image(date).await.unwrap(), RecordState::Absent);

    let token = claim(&store, date, now).await;
    assert_eq!(store.get_image(date).await.unwrap(), RecordState::Pending);

    // A second claim on a pending row loses.
    assert_eq!(
        store.claim_image(date, now).await.unwrap(),
        ClaimOutcome::AlreadyClaimed
    );

    let locator = "http://store/images/0b1c.jpg";
    store.resolve_image(date, token, locator, now).await.unwrap();
    assert_eq!(
        store.get_image(date).await.unwrap(),
        RecordState::Resolved(locator.to_string())
    );

    // Claims on a resolved row lose too.
    assert_eq!(
        store.claim_image(date, now).await.unwrap(),
        ClaimOutcome::AlreadyClaimed
    );

    let row = store.get_image_row(date).await.unwrap().unwrap();
    assert_eq!(row.date(), date);
    assert_eq!(row.claim_token(), token);
    assert!(row.resolved_at.is_some());
}

async fn check_resolve_is_idempotent_but_never_diverges(store: Arc<dyn MetadataStore>) {
    let date = day("2024-02-02");
    let now = OffsetDateTime::now_utc();
    let token = claim(&store, date, now).await;

    let locator = "http://store/images/first.png";
    store.resolve_image(date, token, locator, now).await.unwrap();
    store.resolve_image(date, token, locator, now).await.unwrap();

    let err = store
        .resolve_image(date, token, "http://store/images/second.png", now)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::Constraint(_)), "got {err:?}");

    assert_eq!(
        store.get_image(date).await.unwrap(),
        RecordState::Resolved(locator.to_string())
    );
}

async fn check_resolve_without_claim_is_not_found(store: Arc<dyn MetadataStore>) {
    let date = day("2024-03-03");
    let other = day("2024-03-02");
    let token = claim(&store, other, OffsetDateTime::now_utc()).await;

    let err = store
        .resolve_image(date, token, "http://store/images/x.jpg", OffsetDateTime::now_utc())
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound(_)), "got {err:?}");
    assert_eq!(store.get_image(date).await.unwrap(), RecordState::Absent);
}

async fn check_empty_locator_is_rejected(store: Arc<dyn MetadataStore>) {
    let date = day("2024-03-04");
    let now = OffsetDateTime::now_utc();
    let token = claim(&store, date, now).await;

    let err = store.resolve_image(date, token, "", now).await.unwrap_err();
    assert!(matches!(err, MetadataError::Constraint(_)), "got {err:?}");
    assert_eq!(store.get_image(date).await.unwrap(), RecordState::Pending);
}

async fn check_unclaim(store: Arc<dyn MetadataStore>) {
    let date = day("2024-04-04");
    let now = OffsetDateTime::now_utc();

    let token = claim(&store, date, now).await;
    store.unclaim_image(date, token).await.unwrap();
    assert_eq!(store.get_image(date).await.unwrap(), RecordState::Absent);

    // Absent is fine.
    store.unclaim_image(date, token).await.unwrap();

    // The date can be claimed again after a rollback.
    let token = claim(&store, date, now).await;
    store
        .resolve_image(date, token, "http://store/images/y.gif", now)
        .await
        .unwrap();

    // Resolved rows are never rolled back.
    let err = store.unclaim_image(date, token).await.unwrap_err();
    assert!(
        matches!(err, MetadataError::InvalidStateTransition { .. }),
        "got {err:?}"
    );
    assert!(matches!(
        store.get_image(date).await.unwrap(),
        RecordState::Resolved(_)
    ));
}

async fn check_released_claim_cannot_touch_successor(store: Arc<dyn MetadataStore>) {
    let date = day("2024-01-04");
    let now = OffsetDateTime::now_utc();

    let released = claim(&store, date, now - Duration::hours(2)).await;
    assert_eq!(
        store
            .release_stale_claims(now - Duration::hours(1))
            .await
            .unwrap(),
        1
    );
    let successor = claim(&store, date, now).await;
    assert_ne!(released, successor);

    // The old owner's rollback leaves the new pending row in place.
    store.unclaim_image(date, released).await.unwrap();
    assert_eq!(store.get_image(date).await.unwrap(), RecordState::Pending);

    // Nor can it resolve the new row.
    let err = store
        .resolve_image(date, released, "http://store/images/old.jpg", now)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::ClaimSuperseded(_)), "got {err:?}");
    assert_eq!(store.get_image(date).await.unwrap(), RecordState::Pending);

    store
        .resolve_image(date, successor, "http://store/images/new.jpg", now)
        .await
        .unwrap();
    assert_eq!(
        store.get_image(date).await.unwrap(),
        RecordState::Resolved("http://store/images/new.jpg".to_string())
    );

    // Once resolved, the stale token still has nothing to roll back.
    store.unclaim_image(date, released).await.unwrap();
    assert!(matches!(
        store.get_image(date).await.unwrap(),
        RecordState::Resolved(_)
    ));
}

async fn check_list_resolved_excludes_pending(store: Arc<dyn MetadataStore>) {
    let now = OffsetDateTime::now_utc();
    let later = day("2024-05-10");
    let earlier = day("2024-05-01");
    let pending = day("2024-05-05");

    let later_token = claim(&store, later, now).await;
    let earlier_token = claim(&store, earlier, now).await;
    claim(&store, pending, now).await;
    store
        .resolve_image(later, later_token, "http://store/images/later.jpg", now)
        .await
        .unwrap();
    store
        .resolve_image(earlier, earlier_token, "http://store/images/earlier.jpg", now)
        .await
        .unwrap();

    let listed = store.list_resolved_images().await.unwrap();
    let dates: Vec<ImageDate> = listed.iter().map(|row| row.date()).collect();
    assert_eq!(dates, vec![earlier, later]);
    assert_eq!(listed[0].locator, "http://store/images/earlier.jpg");
}

async fn check_release_stale_claims(store: Arc<dyn MetadataStore>) {
    let now = OffsetDateTime::now_utc();
    let stale = day("2024-06-01");
    let fresh = day("2024-06-02");
    let resolved = day("2024-06-03");

    claim(&store, stale, now - Duration::hours(2)).await;
    claim(&store, fresh, now).await;
    let token = claim(&store, resolved, now - Duration::hours(3)).await;
    store
        .resolve_image(resolved, token, "http://store/images/kept.jpg", now)
        .await
        .unwrap();

    let released = store
        .release_stale_claims(now - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(released, 1);

    assert_eq!(store.get_image(stale).await.unwrap(), RecordState::Absent);
    assert_eq!(store.get_image(fresh).await.unwrap(), RecordState::Pending);
    assert!(matches!(
        store.get_image(resolved).await.unwrap(),
        RecordState::Resolved(_)
    ));
}

async fn check_concurrent_claims_have_one_winner(store: Arc<dyn MetadataStore>) {
    let date = day("2024-07-04");
    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .claim_image(date, OffsetDateTime::now_utc())
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_claimed() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

macro_rules! both_backends {
    ($($name:ident => $check:ident),* $(,)?) => {
        mod sqlite {
            use super::*;
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $name() {
                    let metadata = TestMetadata::new().await.unwrap();
                    $check(metadata.store()).await;
                }
            )*
        }

        mod postgres {
            use super::*;
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $name() {
                    let Some(metadata) = postgres_or_skip().await else {
                        return;
                    };
                    $check(metadata.store()).await;
                }
            )*
        }
    };
}

both_backends! {
    claim_resolve_lifecycle => check_claim_resolve_lifecycle,
    resolve_is_idempotent_but_never_diverges => check_resolve_is_idempotent_but_never_diverges,
    resolve_without_claim_is_not_found => check_resolve_without_claim_is_not_found,
    empty_locator_is_rejected => check_empty_locator_is_rejected,
    unclaim => check_unclaim,
    released_claim_cannot_touch_successor => check_released_claim_cannot_touch_successor,
    list_resolved_excludes_pending => check_list_resolved_excludes_pending,
    release_stale_claims => check_release_stale_claims,
    concurrent_claims_have_one_winner => check_concurrent_claims_have_one_winner,
}

#[tokio::test]
async fn test_sqlite_store_reopens_existing_database() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("nested").join("records.db");
    let date = day("2024-08-08");

    {
        let store = almanac_metadata::SqliteStore::new(&path, None).await.unwrap();
        store
            .claim_image(date, OffsetDateTime::now_utc())
            .await
            .unwrap();
    }

    let reopened = almanac_metadata::SqliteStore::new(&path, None).await.unwrap();
    assert_eq!(reopened.get_image(date).await.unwrap(), RecordState::Pending);
}
