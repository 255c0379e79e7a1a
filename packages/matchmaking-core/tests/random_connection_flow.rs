use std::sync::Arc;
use std::time::Duration;

use matchmaking_core::models::events::ConnectionEvent;
use matchmaking_core::models::profile::UserProfile;
use matchmaking_core::models::session::SessionStatus;
use matchmaking_core::repositories::memory::{
    InMemoryProfileRepository, InMemoryQueueRepository, InMemorySessionRepository,
};
use matchmaking_core::services::notification_service::BroadcastEventPublisher;
use matchmaking_core::services::queue_sweeper::spawn_queue_sweeper;
use matchmaking_core::services::random_connection_service::{
    ConnectionSettings, JoinQueueOutcome, RandomConnectionService,
};
use tokio::sync::broadcast::Receiver;

struct Harness {
    service: RandomConnectionService,
    queue: Arc<InMemoryQueueRepository>,
    sessions: Arc<InMemorySessionRepository>,
    events: Receiver<(String, ConnectionEvent)>,
}

fn harness(settings: ConnectionSettings) -> Harness {
    let queue = Arc::new(InMemoryQueueRepository::new());
    let sessions = Arc::new(InMemorySessionRepository::new());
    let profiles = Arc::new(InMemoryProfileRepository::new());
    profiles.insert(UserProfile::new("alice", "Alice", Some("avatars/alice.png")));
    profiles.insert(UserProfile::new("bob", "Bob", Some("avatars/bob.png")));
    let publisher = Arc::new(BroadcastEventPublisher::default());
    let events = publisher.subscribe();

    Harness {
        service: RandomConnectionService::new(
            queue.clone(),
            sessions.clone(),
            profiles,
            publisher,
            settings,
        ),
        queue,
        sessions,
        events,
    }
}

fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        requeue_delay: Duration::from_millis(10),
        ..ConnectionSettings::default()
    }
}

fn drain(events: &mut Receiver<(String, ConnectionEvent)>) -> Vec<(String, &'static str)> {
    let mut received = Vec::new();
    while let Ok((user_id, event)) = events.try_recv() {
        received.push((user_id, event.name()));
    }
    received
}

#[tokio::test]
async fn test_full_session_lifecycle() {
    let mut h = harness(fast_settings());

    let first = h.service.join_queue("alice", "Valorant", true).await.unwrap();
    assert!(matches!(first, JoinQueueOutcome::Waiting(_)));

    let JoinQueueOutcome::Matched(session) =
        h.service.join_queue("bob", "Valorant", false).await.unwrap()
    else {
        panic!("bob should have been matched with alice");
    };
    assert_eq!(session.participants[0].display_name, "Alice");
    assert!(session.participants[0].video_enabled);
    assert_eq!(session.participants[1].display_name, "Bob");
    assert!(!session.participants[1].video_enabled);

    let message = h
        .service
        .send_message("bob", &session.room_id, "hi alice")
        .await
        .unwrap();
    let ended = h.service.disconnect("alice", &session.room_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(ended.status, SessionStatus::Disconnected);
    assert_eq!(ended.messages, vec![message]);
    assert_eq!(
        drain(&mut h.events),
        vec![
            ("alice".to_string(), "connection-matched"),
            ("bob".to_string(), "connection-matched"),
            ("alice".to_string(), "random-connection-message"),
            ("bob".to_string(), "partner-disconnected"),
            ("bob".to_string(), "rejoined-queue"),
        ]
    );

    let history = h.service.history("alice", 1, 10).await.unwrap();
    assert_eq!(history.total, 1);
    assert_eq!(history.sessions[0].room_id, session.room_id);
    assert!(!history.has_more);

    let status = h.service.queue_status("bob").await.unwrap();
    assert_eq!(status.position, 1);
    assert!(!status.entry.video_enabled);
}

#[tokio::test]
async fn test_user_never_holds_two_open_sessions() {
    let h = harness(fast_settings());

    h.service.join_queue("alice", "Valorant", true).await.unwrap();
    h.service.join_queue("bob", "Valorant", true).await.unwrap();
    h.service.join_queue("carol", "Valorant", true).await.unwrap();
    // alice abandons bob for carol.
    h.service.join_queue("alice", "Valorant", true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    for user in ["alice", "bob", "carol"] {
        let open = h
            .sessions
            .all_sessions()
            .into_iter()
            .filter(|s| s.is_open() && s.has_participant(user))
            .count();
        assert!(open <= 1, "{} has {} open sessions", user, open);
        let waiting = h.queue.snapshot().iter().filter(|e| e.user_id == user).count();
        assert!(waiting + open <= 1, "{} is both waiting and in a session", user);
    }
}

#[tokio::test]
async fn test_sweeper_purges_expired_entries() {
    let h = harness(ConnectionSettings {
        queue_entry_ttl: chrono::Duration::milliseconds(20),
        ..fast_settings()
    });
    h.service.join_queue("alice", "Valorant", true).await.unwrap();

    let sweeper = spawn_queue_sweeper(h.service.clone(), Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(80)).await;
    sweeper.abort();

    assert!(h.queue.snapshot().is_empty());
}

#[tokio::test]
async fn test_logout_cleanup_leaves_partner_idle() {
    let mut h = harness(fast_settings());
    h.service.join_queue("alice", "BGMI", true).await.unwrap();
    h.service.join_queue("bob", "BGMI", true).await.unwrap();
    drain(&mut h.events);

    h.service.cleanup_current("bob").await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(
        drain(&mut h.events),
        vec![("alice".to_string(), "partner-disconnected")]
    );
    assert!(h.queue.snapshot().is_empty());
    assert!(h.service.current_connection("alice").await.is_err());
}
