use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use koinonia_attendance::{
    AttendanceCommand, AttendanceSheet, AttendanceSource, AttendanceStatus, RecordAttendance,
};
use koinonia_core::{AggregateId, ParishId, RecorderId};
use koinonia_events::{EventEnvelope, InMemoryEventBus};
use koinonia_infra::command_dispatcher::CommandDispatcher;
use koinonia_infra::event_store::InMemoryEventStore;
use koinonia_registry::{ActivityId, ParticipantId};

/// Naive CRUD simulation: direct key-value upserts (no events, no history).
/// Baseline to keep the event-sourced write path's overhead visible.
#[derive(Debug, Clone)]
struct NaiveCrudStore {
    inner: Arc<RwLock<HashMap<(ParishId, ActivityId, ParticipantId), AttendanceStatus>>>,
}

impl NaiveCrudStore {
    fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn record(
        &self,
        parish_id: ParishId,
        activity_id: ActivityId,
        participant_id: ParticipantId,
        status: AttendanceStatus,
    ) {
        let mut map = self.inner.write().unwrap();
        map.insert((parish_id, activity_id, participant_id), status);
    }
}

fn setup_event_sourcing() -> (
    CommandDispatcher<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>>,
    ParishId,
    ActivityId,
) {
    let store = InMemoryEventStore::new();
    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> =
        Arc::new(InMemoryEventBus::new());
    let dispatcher = CommandDispatcher::new(store, bus);
    let parish_id = ParishId::new();
    let activity_id = ActivityId::new(AggregateId::new());
    (dispatcher, parish_id, activity_id)
}

fn record_command(
    parish_id: ParishId,
    activity_id: ActivityId,
    participant_id: ParticipantId,
) -> AttendanceCommand {
    let now = Utc::now();
    AttendanceCommand::RecordAttendance(RecordAttendance {
        parish_id,
        activity_id,
        participant_id,
        status: AttendanceStatus::Present,
        source: AttendanceSource::QrScan,
        arrived_at: Some(now),
        recorded_by: RecorderId::new(),
        occurred_at: now,
    })
}

fn bench_attendance_write_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("attendance_write_latency");
    group.throughput(Throughput::Elements(1));

    group.bench_function("event_sourced_dispatch", |b| {
        let (dispatcher, parish_id, activity_id) = setup_event_sourcing();
        b.iter(|| {
            let participant_id = ParticipantId::new(AggregateId::new());
            let committed = dispatcher
                .dispatch::<AttendanceSheet>(
                    parish_id,
                    activity_id.0,
                    "attendance.sheet",
                    record_command(parish_id, activity_id, participant_id),
                    |_p, aggregate_id| AttendanceSheet::empty(ActivityId::new(aggregate_id)),
                )
                .unwrap();
            black_box(committed.len())
        });
    });

    group.bench_function("naive_crud_upsert", |b| {
        let store = NaiveCrudStore::new();
        let parish_id = ParishId::new();
        let activity_id = ActivityId::new(AggregateId::new());
        b.iter(|| {
            let participant_id = ParticipantId::new(AggregateId::new());
            store.record(
                parish_id,
                activity_id,
                participant_id,
                AttendanceStatus::Present,
            );
            black_box(())
        });
    });

    group.finish();
}

fn bench_sheet_rehydration(c: &mut Criterion) {
    let mut group = c.benchmark_group("sheet_rehydration");

    // Cost of replaying a sheet that has accumulated N corrections: the
    // dispatch path reloads the full stream on every write.
    for stream_len in [10u64, 100, 500] {
        let (dispatcher, parish_id, activity_id) = setup_event_sourcing();
        let participant_id = ParticipantId::new(AggregateId::new());
        for _ in 0..stream_len {
            dispatcher
                .dispatch::<AttendanceSheet>(
                    parish_id,
                    activity_id.0,
                    "attendance.sheet",
                    record_command(parish_id, activity_id, participant_id),
                    |_p, aggregate_id| AttendanceSheet::empty(ActivityId::new(aggregate_id)),
                )
                .unwrap();
        }

        group.throughput(Throughput::Elements(stream_len));
        group.bench_function(format!("replay_{stream_len}_events"), |b| {
            b.iter(|| {
                let committed = dispatcher
                    .dispatch::<AttendanceSheet>(
                        parish_id,
                        activity_id.0,
                        "attendance.sheet",
                        record_command(parish_id, activity_id, participant_id),
                        |_p, aggregate_id| AttendanceSheet::empty(ActivityId::new(aggregate_id)),
                    )
                    .unwrap();
                black_box(committed.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_attendance_write_latency, bench_sheet_rehydration);
criterion_main!(benches);
