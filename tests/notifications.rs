mod common;

use common::*;

use wedding_guest_bot::db::{self, Pool};
use wedding_guest_bot::notify::{self, DispatchReport};

async fn sent_flags(pool: &Pool, guest_id: i64) -> Vec<(i64, bool)> {
    sqlx::query_as(
        "SELECT notification_id, is_sent FROM personal_notifications \
         WHERE guest_id = ? ORDER BY id",
    )
    .bind(guest_id)
    .fetch_all(pool)
    .await
    .unwrap()
}

async fn store() -> MemoryBlobStore {
    MemoryBlobStore::with(&[
        ("n/schedule.html", "Ceremony starts at 15:00"),
        ("n/dress_code.html", "Dress code: pastel"),
        ("n/seating.html", "Your table is 4"),
    ])
    .await
}

#[tokio::test]
async fn public_notifications_are_assigned_once() {
    let pool = setup_pool().await;
    let anna = insert_guest(&pool, "Anna", "79990000001").await;
    let oleg = insert_guest(&pool, "Oleg", "79990000002").await;
    let schedule = insert_notification(&pool, "schedule", false).await;
    let dress_code = insert_notification(&pool, "dress_code", false).await;
    let seating = insert_notification(&pool, "seating", true).await;

    let inserted = notify::assign_public_notifications(&pool, &[anna, oleg])
        .await
        .unwrap();
    assert_eq!(inserted, 4);
    let again = notify::assign_public_notifications(&pool, &[anna, oleg])
        .await
        .unwrap();
    assert_eq!(again, 0);

    let assigned = db::notifications::assigned_notification_ids(&pool, anna)
        .await
        .unwrap();
    assert_eq!(assigned.len(), 2);
    assert!(assigned.contains(&schedule) && assigned.contains(&dress_code));
    assert!(!assigned.contains(&seating));
}

#[tokio::test]
async fn delivered_notifications_are_not_resent() {
    let pool = setup_pool().await;
    let anna = insert_guest(&pool, "Anna", "79990000001").await;
    link_telegram_user(&pool, anna, 1001).await;
    let schedule = insert_notification(&pool, "schedule", false).await;
    let dress_code = insert_notification(&pool, "dress_code", false).await;
    notify::assign_public_notifications(&pool, &[anna]).await.unwrap();

    let factory = factory(store().await);
    let transport = RecordingTransport::default();

    let report = notify::send_notifications(&pool, &factory, &transport, &[anna], Some(1))
        .await
        .unwrap();
    assert_eq!(
        report,
        DispatchReport {
            guests_processed: 1,
            messages_sent: 1,
            guests_failed: 0,
        }
    );
    assert_eq!(sent_flags(&pool, anna).await, vec![(schedule, true), (dress_code, false)]);

    notify::send_notifications(&pool, &factory, &transport, &[anna], None)
        .await
        .unwrap();
    let report = notify::send_notifications(&pool, &factory, &transport, &[anna], None)
        .await
        .unwrap();
    assert_eq!(report.messages_sent, 0);
    assert_eq!(
        transport.calls().await,
        vec![
            Call::Send {
                chat_id: 1001,
                text: "Ceremony starts at 15:00".into()
            },
            Call::Send {
                chat_id: 1001,
                text: "Dress code: pastel".into()
            },
        ]
    );
}

#[tokio::test]
async fn one_unreachable_guest_does_not_block_others() {
    let pool = setup_pool().await;
    let anna = insert_guest(&pool, "Anna", "79990000001").await;
    let oleg = insert_guest(&pool, "Oleg", "79990000002").await;
    let unlinked = insert_guest(&pool, "Ivan", "79990000003").await;
    link_telegram_user(&pool, anna, 1001).await;
    link_telegram_user(&pool, oleg, 1002).await;
    let schedule = insert_notification(&pool, "schedule", false).await;
    let guests = [anna, oleg, unlinked];
    notify::assign_public_notifications(&pool, &guests).await.unwrap();

    let factory = factory(store().await);
    let transport = RecordingTransport::failing_for(1001);
    let report = notify::send_notifications(&pool, &factory, &transport, &guests, None)
        .await
        .unwrap();
    assert_eq!(
        report,
        DispatchReport {
            guests_processed: 2,
            messages_sent: 1,
            guests_failed: 1,
        }
    );
    assert_eq!(sent_flags(&pool, anna).await, vec![(schedule, false)]);
    assert_eq!(sent_flags(&pool, oleg).await, vec![(schedule, true)]);
    assert_eq!(sent_flags(&pool, unlinked).await, vec![(schedule, false)]);

    let healthy = RecordingTransport::default();
    let report = notify::send_notifications(&pool, &factory, &healthy, &guests, None)
        .await
        .unwrap();
    assert_eq!(report.messages_sent, 1);
    assert_eq!(
        healthy.calls().await,
        vec![Call::Send {
            chat_id: 1001,
            text: "Ceremony starts at 15:00".into()
        }]
    );
}

#[tokio::test]
async fn public_commands_are_granted_once() {
    let pool = setup_pool().await;
    let anna = insert_guest(&pool, "Anna", "79990000001").await;
    let oleg = insert_guest(&pool, "Oleg", "79990000002").await;
    let menu = insert_command(&pool, "Menu", Some("menu"), None, false, false).await;
    insert_command(&pool, "Afterparty", Some("afterparty"), None, true, false).await;
    insert_command(
        &pool,
        "Coming",
        Some("accept"),
        Some(("form_stage", "awaiting_answer")),
        false,
        false,
    )
    .await;

    assert_eq!(
        notify::update_available_commands(&pool, &[anna, oleg]).await.unwrap(),
        2
    );
    assert_eq!(
        notify::update_available_commands(&pool, &[anna, oleg]).await.unwrap(),
        0
    );
    assert_eq!(
        db::commands::granted_command_ids(&pool, oleg).await.unwrap(),
        vec![menu]
    );
}
