//! Room, board and room-queue projections, and the observer feeds built on them.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::TimeDelta;
use futures::{Stream, StreamExt};
use queuedesk_core::environment::Clock;
use queuedesk_core::notification::{Envelope, RawNotification};
use queuedesk_core::projection::ProjectionError;
use queuedesk_core::ticket::{Ticket, TicketId};
use queuedesk_projections::{
    ObserverFeed, RoomProjection, RoomQueue, RoomQueueProjection, RoomState, WaitingBoard,
    WaitingBoardProjection,
};
use queuedesk_runtime::{Broker, DispatchService, Notification};
use queuedesk_testing::{
    InMemoryScheduleDirectory, InMemoryTicketStore, ManualClock, fixtures, init_test_tracing,
    test_clock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Fixtures
// ============================================================================

struct World {
    dispatch: DispatchService,
    store: InMemoryTicketStore,
    schedule: InMemoryScheduleDirectory,
    clock: ManualClock,
    broker: Broker<Notification>,
}

fn world() -> World {
    init_test_tracing();
    let schedule = InMemoryScheduleDirectory::new();
    let store = InMemoryTicketStore::with_schedule(schedule.clone());
    let clock = ManualClock::new(test_clock().now());
    let dispatch = DispatchService::new(
        Arc::new(store.clone()),
        Arc::new(fixtures::categories()),
        Arc::new(clock.clone()),
    );
    World {
        dispatch,
        store,
        schedule,
        clock,
        broker: Broker::new(16),
    }
}

impl World {
    fn room(&self) -> Arc<RoomProjection> {
        Arc::new(RoomProjection::new(
            Arc::new(self.store.clone()),
            Arc::new(self.schedule.clone()),
            Arc::new(self.clock.clone()),
        ))
    }

    fn board(&self) -> Arc<WaitingBoardProjection> {
        Arc::new(WaitingBoardProjection::new(
            Arc::new(self.store.clone()),
            Arc::new(self.clock.clone()),
        ))
    }

    fn queue(&self) -> Arc<RoomQueueProjection> {
        Arc::new(RoomQueueProjection::new(
            Arc::new(self.store.clone()),
            Arc::new(self.schedule.clone()),
            Arc::new(self.clock.clone()),
        ))
    }

    /// Create a ticket, book it into `slot_id` and hand it to the doctor's room.
    async fn registered(&self, slot_id: i64) -> Ticket {
        let ticket = self.dispatch.create_ticket("consultation").await.unwrap();
        self.schedule.book(ticket.id, slot_id);
        self.dispatch.call_specific(ticket.id, 1).await.unwrap();
        self.dispatch.register(ticket.id).await.unwrap()
    }

    fn notify(&self, channel: &str, envelope: &Envelope) {
        self.notify_raw(channel, &envelope.encode().unwrap());
    }

    fn notify_raw(&self, channel: &str, payload: &str) {
        self.broker
            .publish(&Arc::new(RawNotification::new(channel, payload)));
    }
}

const QUIET: Duration = Duration::from_millis(100);

async fn next<S: Stream + Unpin>(stream: &mut S) -> S::Item {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("no item within 1s")
        .expect("stream ended")
}

async fn assert_quiet<S: Stream + Unpin>(stream: &mut S) {
    assert!(
        tokio::time::timeout(QUIET, stream.next()).await.is_err(),
        "unexpected refresh"
    );
}

// ============================================================================
// Room projection
// ============================================================================

#[tokio::test]
async fn room_moves_from_no_session_to_ready_to_serving() {
    let w = world();
    let room = w.room();

    assert_eq!(
        room.current_state(12).await.unwrap(),
        RoomState::NoSession { room_number: 12 }
    );

    let slot = fixtures::slot(1, 12, w.clock.now() - TimeDelta::minutes(5), 30);
    w.schedule.add_slot(slot.clone());
    assert_eq!(
        room.current_state(12).await.unwrap(),
        RoomState::Ready {
            room_number: 12,
            schedule: slot.clone(),
        }
    );

    let ticket = w.dispatch.create_ticket("consultation").await.unwrap();
    w.schedule.book(ticket.id, slot.id);
    w.dispatch.call_specific(ticket.id, 12).await.unwrap();
    // Invited is not yet served.
    assert!(room.current_state(12).await.unwrap().ticket().is_none());

    let started = w.dispatch.start_appointment(ticket.id).await.unwrap();
    let state = room.current_state(12).await.unwrap();
    assert_eq!(state.ticket(), Some(&started));
    assert_eq!(state.room_number(), 12);

    w.dispatch.complete_appointment(ticket.id).await.unwrap();
    assert!(matches!(
        room.current_state(12).await.unwrap(),
        RoomState::Ready { .. }
    ));
}

#[tokio::test]
async fn room_ignores_tickets_booked_elsewhere() {
    let w = world();
    let now = w.clock.now();
    w.schedule.add_slot(fixtures::slot(1, 12, now - TimeDelta::minutes(5), 30));
    w.schedule.add_slot(fixtures::slot(2, 14, now - TimeDelta::minutes(5), 30));

    let ticket = w.dispatch.create_ticket("consultation").await.unwrap();
    w.schedule.book(ticket.id, 2);
    w.dispatch.call_specific(ticket.id, 14).await.unwrap();
    w.dispatch.start_appointment(ticket.id).await.unwrap();

    let room = w.room();
    assert!(matches!(
        room.current_state(12).await.unwrap(),
        RoomState::Ready { room_number: 12, .. }
    ));
    assert!(room.current_state(14).await.unwrap().ticket().is_some());
}

#[tokio::test]
async fn room_state_serializes_with_state_tag() {
    let json = serde_json::to_value(RoomState::NoSession { room_number: 3 }).unwrap();
    assert_eq!(json, serde_json::json!({"state": "no_session", "room_number": 3}));
}

#[tokio::test]
async fn room_lookup_failure_is_an_error() {
    let w = world();
    w.schedule
        .add_slot(fixtures::slot(1, 12, w.clock.now() - TimeDelta::minutes(5), 30));
    w.store.set_unavailable(true);
    assert!(w.room().current_state(12).await.is_err());
}

// ============================================================================
// Waiting board
// ============================================================================

#[tokio::test]
async fn board_splits_called_and_waiting_in_call_order() {
    let w = world();
    let a1 = w.dispatch.create_ticket("consultation").await.unwrap();
    w.clock.advance(TimeDelta::minutes(1));
    let b1 = w.dispatch.create_ticket("analysis").await.unwrap();
    w.clock.advance(TimeDelta::minutes(1));
    let a2 = w.dispatch.create_ticket("consultation").await.unwrap();
    w.dispatch.call_next(2, None).await.unwrap();

    let board = w.board().current_board(None).await.unwrap();
    let called: Vec<_> = board.called.iter().map(|t| t.id).collect();
    let waiting: Vec<_> = board.waiting.iter().map(|t| t.id).collect();
    assert_eq!(called, vec![a1.id]);
    assert_eq!(waiting, vec![b1.id, a2.id]);

    let only_b = w.board().current_board(Some("B")).await.unwrap();
    assert_eq!(only_b.called, Vec::new());
    assert_eq!(only_b.waiting.len(), 1);
}

#[tokio::test]
async fn board_treats_blank_filters_as_all_and_rejects_wildcards() {
    let w = world();
    w.dispatch.create_ticket("consultation").await.unwrap();
    w.dispatch.create_ticket("analysis").await.unwrap();

    let board = w.board();
    assert_eq!(board.current_board(Some("  ")).await.unwrap().waiting.len(), 2);
    assert_eq!(board.current_board(Some(" B ")).await.unwrap().waiting.len(), 1);
    for filter in ["_", "%", "A_"] {
        assert!(matches!(
            board.current_board(Some(filter)).await,
            Err(ProjectionError::InvalidKey(_))
        ));
    }
}

// ============================================================================
// Room queue
// ============================================================================

fn queued_ids(queue: &RoomQueue) -> Vec<TicketId> {
    queue.entries.iter().map(|e| e.ticket.id).collect()
}

#[tokio::test]
async fn room_queue_lists_the_patient_inside_then_registered_by_slot() {
    let w = world();
    let now = w.clock.now();
    w.schedule.add_slot(fixtures::slot(1, 12, now + TimeDelta::minutes(30), 15));
    w.schedule.add_slot(fixtures::slot(2, 12, now + TimeDelta::minutes(10), 15));
    w.schedule.add_slot(fixtures::slot(3, 12, now + TimeDelta::minutes(60), 15));
    w.schedule.add_slot(fixtures::slot(4, 14, now, 15));
    w.schedule.add_slot(fixtures::slot(5, 12, now - TimeDelta::days(1), 15));

    let late = w.registered(1).await;
    let early = w.registered(2).await;
    let elsewhere = w.registered(4).await;
    let yesterday = w.registered(5).await;

    let inside = w.dispatch.create_ticket("analysis").await.unwrap();
    w.schedule.book(inside.id, 3);
    w.dispatch.call_specific(inside.id, 12).await.unwrap();
    w.dispatch.start_appointment(inside.id).await.unwrap();

    // Waiting tickets are not on the doctor's list yet.
    let waiting = w.dispatch.create_ticket("consultation").await.unwrap();
    w.schedule.book(waiting.id, 2);

    let queue = w.queue().current_queue(12).await.unwrap();
    assert_eq!(queue.room_number, 12);
    assert_eq!(queued_ids(&queue), vec![inside.id, early.id, late.id]);
    assert_eq!(queue.entries[1].appointment_at, now + TimeDelta::minutes(10));
    assert!(!queued_ids(&queue).contains(&elsewhere.id));
    assert!(!queued_ids(&queue).contains(&yesterday.id));

    assert_eq!(w.queue().rooms().await.unwrap(), vec![12, 14]);
    assert!(w.queue().current_queue(99).await.unwrap().entries.is_empty());
}

#[tokio::test]
async fn room_queue_feed_refreshes_when_a_patient_is_registered() {
    let w = world();
    w.schedule
        .add_slot(fixtures::slot(1, 12, w.clock.now() + TimeDelta::minutes(10), 15));
    let mut views = Box::pin(ObserverFeed::new(w.queue(), 12, w.broker.subscribe()).views());
    assert!(next(&mut views).await.entries.is_empty());

    let ticket = w.registered(1).await;
    w.notify("ticket_changed", &Envelope::TicketRegistered(ticket.clone()));

    let queue = next(&mut views).await;
    assert_eq!(queued_ids(&queue), vec![ticket.id]);
}

#[tokio::test]
async fn room_queue_lookup_failure_is_an_error() {
    let w = world();
    w.store.set_unavailable(true);
    assert!(matches!(
        w.queue().current_queue(12).await,
        Err(ProjectionError::Storage(_))
    ));
}

// ============================================================================
// Observer feeds
// ============================================================================

#[tokio::test]
async fn feed_starts_with_a_snapshot_and_refreshes_on_ticket_changes() {
    let w = world();
    let mut views = Box::pin(ObserverFeed::new(w.board(), None, w.broker.subscribe()).views());

    assert_eq!(next(&mut views).await, WaitingBoard::default());

    let ticket = w.dispatch.create_ticket("consultation").await.unwrap();
    w.notify("ticket_changed", &Envelope::TicketCreated(ticket.clone()));

    let board = next(&mut views).await;
    assert_eq!(board.waiting, vec![ticket]);
}

#[tokio::test]
async fn unknown_and_malformed_notifications_are_dropped() {
    let w = world();
    let mut views = Box::pin(ObserverFeed::new(w.board(), None, w.broker.subscribe()).views());
    next(&mut views).await;

    w.notify_raw("ticket_changed", r#"{"action":"ticket_archived","data":{}}"#);
    w.notify_raw("ticket_changed", "not json");
    w.notify_raw(
        "ticket_changed",
        r#"{"action":"ticket_called","data":{"id":"x"}}"#,
    );
    assert_quiet(&mut views).await;

    // The feed is still alive afterwards.
    let ticket = w.dispatch.create_ticket("analysis").await.unwrap();
    w.notify("ticket_changed", &Envelope::TicketCreated(ticket));
    assert_eq!(next(&mut views).await.waiting.len(), 1);
}

#[tokio::test]
async fn board_ignores_schedule_changes_but_room_does_not() {
    let w = world();
    let slot = fixtures::slot(1, 12, w.clock.now() - TimeDelta::minutes(5), 30);

    let mut board = Box::pin(ObserverFeed::new(w.board(), None, w.broker.subscribe()).views());
    let mut room = Box::pin(ObserverFeed::new(w.room(), 12, w.broker.subscribe()).views());
    next(&mut board).await;
    assert_eq!(
        next(&mut room).await,
        RoomState::NoSession { room_number: 12 }
    );

    w.schedule.add_slot(slot.clone());
    w.notify("schedule_changed", &Envelope::ScheduleCreated(slot));

    assert!(matches!(next(&mut room).await, RoomState::Ready { .. }));
    assert_quiet(&mut board).await;
}

#[tokio::test]
async fn frames_are_named_after_the_projection() {
    let w = world();
    let mut frames = Box::pin(ObserverFeed::new(w.room(), 7, w.broker.subscribe()).frames());

    let frame = next(&mut frames).await;
    assert_eq!(
        frame,
        "event: room_screen\ndata: {\"state\":\"no_session\",\"room_number\":7}\n\n"
    );
}

#[tokio::test(start_paused = true)]
async fn idle_frames_carry_keepalive_comments() {
    let w = world();
    let mut frames = Box::pin(
        ObserverFeed::new(w.board(), None, w.broker.subscribe())
            .keepalive(Duration::from_millis(500))
            .frames(),
    );
    assert!(next(&mut frames).await.starts_with("event: waiting_board\n"));

    let idle_since = tokio::time::Instant::now();
    assert_eq!(next(&mut frames).await, ": keepalive\n\n");
    assert!(idle_since.elapsed() >= Duration::from_millis(500));

    let ticket = w.dispatch.create_ticket("consultation").await.unwrap();
    w.notify("ticket_changed", &Envelope::TicketCreated(ticket));
    assert!(next(&mut frames).await.starts_with("event: waiting_board\n"));
}

#[tokio::test]
async fn frames_without_keepalive_stay_quiet() {
    let w = world();
    let mut frames = Box::pin(ObserverFeed::new(w.board(), None, w.broker.subscribe()).frames());
    next(&mut frames).await;
    assert_quiet(&mut frames).await;
}

#[tokio::test]
async fn feed_ends_on_cancel_and_unsubscribes() {
    let w = world();
    let cancel = CancellationToken::new();
    let mut views = Box::pin(
        ObserverFeed::new(w.board(), None, w.broker.subscribe())
            .cancel_on(cancel.clone())
            .views(),
    );
    next(&mut views).await;
    assert_eq!(w.broker.subscriber_count(), 1);

    cancel.cancel();
    let ended = tokio::time::timeout(Duration::from_secs(1), views.next())
        .await
        .unwrap();
    assert!(ended.is_none());

    drop(views);
    assert_eq!(w.broker.subscriber_count(), 0);
}

#[tokio::test]
async fn feed_ends_when_unsubscribed() {
    let w = world();
    let subscription = w.broker.subscribe();
    let id = subscription.id();
    let mut views = Box::pin(ObserverFeed::new(w.board(), None, subscription).views());
    next(&mut views).await;

    assert!(w.broker.unsubscribe(id));
    let ended = tokio::time::timeout(Duration::from_secs(1), views.next())
        .await
        .unwrap();
    assert!(ended.is_none());
}
