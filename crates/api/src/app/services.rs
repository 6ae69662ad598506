use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use koinonia_checkin::{RosterLookup, ScanOutcome, ScanSession};
use koinonia_contributions::{DayKey, ReceiptId};
use koinonia_core::{AggregateId, Currency, DomainError, DomainResult, Money, ParishId};
use koinonia_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use koinonia_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{InMemoryEventStore, PostgresEventStore, StoredEvent},
    projections::{
        activities::{ActivityDirectoryProjection, ActivityReadModel},
        attendance::{AttendanceReadModel, AttendanceSheetProjection},
        contributions::{ContributionLedgerProjection, PaymentReadModel},
        participants::{ParticipantDirectoryProjection, ParticipantReadModel},
        treasury::{TreasuryBalancesProjection, TreasuryEntryReadModel},
    },
    read_model::InMemoryParishStore,
    receipts::{InMemoryReceiptSequencer, PostgresReceiptSequencer, ReceiptError, ReceiptSequencer},
};
use koinonia_registry::{ActivityId, ParticipantId};
use koinonia_treasury::CurrencyBalance;

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub parish_id: ParishId,
    pub topic: String,
    pub payload: serde_json::Value,
}

// Type-erased dispatchers for the two wiring modes.
type InMemoryDispatcher =
    CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;
type PersistentDispatcher =
    CommandDispatcher<Arc<PostgresEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

type ActivitiesProjection =
    ActivityDirectoryProjection<Arc<InMemoryParishStore<ActivityId, ActivityReadModel>>>;
type ParticipantsProjection =
    ParticipantDirectoryProjection<Arc<InMemoryParishStore<ParticipantId, ParticipantReadModel>>>;
type AttendanceProjection = AttendanceSheetProjection<
    Arc<InMemoryParishStore<(ActivityId, ParticipantId), AttendanceReadModel>>,
>;
type ContributionsProjection =
    ContributionLedgerProjection<Arc<InMemoryParishStore<ReceiptId, PaymentReadModel>>>;
type TreasuryProjection =
    TreasuryBalancesProjection<Arc<InMemoryParishStore<uuid::Uuid, TreasuryEntryReadModel>>>;

/// Wiring shared by both service modes: bus, read models, scan sessions,
/// realtime feed. Only the event store and the receipt sequencer differ
/// between in-memory and Postgres deployments.
pub struct SharedServices {
    event_bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    activities_projection: Arc<ActivitiesProjection>,
    participants_projection: Arc<ParticipantsProjection>,
    attendance_projection: Arc<AttendanceProjection>,
    contributions_projection: Arc<ContributionsProjection>,
    treasury_projection: Arc<TreasuryProjection>,
    default_cash_book_id: AggregateId,
    scan_sessions: Mutex<HashMap<(ParishId, ActivityId), ScanSession>>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

pub enum AppServices {
    InMemory {
        dispatcher: Arc<InMemoryDispatcher>,
        event_store: Arc<InMemoryEventStore>,
        receipts: Arc<InMemoryReceiptSequencer>,
        shared: SharedServices,
    },
    Persistent {
        dispatcher: Arc<PersistentDispatcher>,
        event_store: Arc<PostgresEventStore>,
        receipts: Arc<PostgresReceiptSequencer>,
        shared: SharedServices,
    },
}

pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        build_persistent_services().await
    } else {
        build_in_memory_services()
    }
}

fn build_shared() -> SharedServices {
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());

    let activities_projection: Arc<ActivitiesProjection> = Arc::new(
        ActivityDirectoryProjection::new(Arc::new(InMemoryParishStore::new())),
    );
    let participants_projection: Arc<ParticipantsProjection> = Arc::new(
        ParticipantDirectoryProjection::new(Arc::new(InMemoryParishStore::new())),
    );
    let attendance_projection: Arc<AttendanceProjection> = Arc::new(
        AttendanceSheetProjection::new(Arc::new(InMemoryParishStore::new())),
    );
    let contributions_projection: Arc<ContributionsProjection> = Arc::new(
        ContributionLedgerProjection::new(Arc::new(InMemoryParishStore::new())),
    );
    let treasury_projection: Arc<TreasuryProjection> = Arc::new(TreasuryBalancesProjection::new(
        Arc::new(InMemoryParishStore::new()),
    ));

    // Realtime channel (SSE): lossy broadcast, parish-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    let shared = SharedServices {
        event_bus: bus,
        activities_projection,
        participants_projection,
        attendance_projection,
        contributions_projection,
        treasury_projection,
        default_cash_book_id: AggregateId::new(),
        scan_sessions: Mutex::new(HashMap::new()),
        realtime_tx,
    };

    spawn_projection_pump(&shared);
    shared
}

/// Background subscriber: bus -> projections -> realtime feed.
fn spawn_projection_pump(shared: &SharedServices) {
    let sub: Subscription<EventEnvelope<JsonValue>> = shared.event_bus.subscribe();
    let activities = shared.activities_projection.clone();
    let participants = shared.participants_projection.clone();
    let attendance = shared.attendance_projection.clone();
    let contributions = shared.contributions_projection.clone();
    let treasury = shared.treasury_projection.clone();
    let realtime_tx = shared.realtime_tx.clone();

    tokio::task::spawn_blocking(move || {
        loop {
            match sub.recv() {
                Ok(env) => {
                    let at = env.aggregate_type().to_string();

                    // Apply to the relevant projection(s) only.
                    let apply_ok = match at.as_str() {
                        "registry.activity" => {
                            activities.apply_envelope(&env).map_err(|e| e.to_string())
                        }
                        "registry.participant" => {
                            participants.apply_envelope(&env).map_err(|e| e.to_string())
                        }
                        "attendance.sheet" => {
                            attendance.apply_envelope(&env).map_err(|e| e.to_string())
                        }
                        "contributions.sheet" => {
                            if let Err(e) = contributions.apply_envelope(&env) {
                                Err(e.to_string())
                            } else if let Err(e) = treasury.apply_envelope(&env) {
                                Err(e.to_string())
                            } else {
                                Ok(())
                            }
                        }
                        "treasury.book" => treasury.apply_envelope(&env).map_err(|e| e.to_string()),
                        _ => Ok(()),
                    };

                    if let Err(e) = apply_ok {
                        tracing::warn!("projection apply failed: {e}");
                        continue;
                    }

                    // Broadcast projection update (lossy; no backpressure on core).
                    let _ = realtime_tx.send(RealtimeMessage {
                        parish_id: env.parish_id(),
                        topic: format!("{at}.projection_updated"),
                        payload: serde_json::json!({
                            "kind": "projection_update",
                            "aggregate_type": at,
                            "aggregate_id": env.aggregate_id().to_string(),
                            "sequence_number": env.sequence_number(),
                        }),
                    });
                }
                Err(_) => break,
            }
        }
    });
}

fn build_in_memory_services() -> AppServices {
    let shared = build_shared();
    let store = Arc::new(InMemoryEventStore::new());
    let dispatcher: Arc<InMemoryDispatcher> = Arc::new(CommandDispatcher::new(
        store.clone(),
        shared.event_bus.clone(),
    ));

    AppServices::InMemory {
        dispatcher,
        event_store: store,
        receipts: Arc::new(InMemoryReceiptSequencer::new()),
        shared,
    }
}

async fn build_persistent_services() -> AppServices {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");

    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    let shared = build_shared();
    let store = Arc::new(PostgresEventStore::new(pool.clone()));
    let dispatcher: Arc<PersistentDispatcher> = Arc::new(CommandDispatcher::new(
        store.clone(),
        shared.event_bus.clone(),
    ));

    AppServices::Persistent {
        dispatcher,
        event_store: store,
        receipts: Arc::new(PostgresReceiptSequencer::new(pool)),
        shared,
    }
}

impl AppServices {
    fn shared(&self) -> &SharedServices {
        match self {
            AppServices::InMemory { shared, .. } => shared,
            AppServices::Persistent { shared, .. } => shared,
        }
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.shared().realtime_tx
    }

    pub fn default_cash_book_id(&self) -> AggregateId {
        self.shared().default_cash_book_id
    }

    pub fn dispatch<A>(
        &self,
        parish_id: ParishId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(ParishId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: koinonia_core::Aggregate<Error = DomainError>,
        A::Event: koinonia_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        match self {
            AppServices::InMemory { dispatcher, .. } => dispatcher.dispatch::<A>(
                parish_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
            // The Postgres store bridges to async internally with
            // Handle::block_on; block_in_place keeps that legal on the
            // multi-threaded runtime axum handlers run on.
            AppServices::Persistent { dispatcher, .. } => tokio::task::block_in_place(|| {
                dispatcher.dispatch::<A>(
                    parish_id,
                    aggregate_id,
                    aggregate_type,
                    command,
                    make_aggregate,
                )
            }),
        }
    }

    /// Allocate the next receipt sequence for a parish/day.
    pub fn allocate_receipt(
        &self,
        parish_id: ParishId,
        day_key: DayKey,
    ) -> Result<u32, ReceiptError> {
        match self {
            AppServices::InMemory { receipts, .. } => receipts.allocate(parish_id, day_key),
            AppServices::Persistent { receipts, .. } => {
                tokio::task::block_in_place(|| receipts.allocate(parish_id, day_key))
            }
        }
    }

    // ---- registry reads ----

    pub fn activities_get(
        &self,
        parish_id: ParishId,
        activity_id: &ActivityId,
    ) -> Option<ActivityReadModel> {
        self.shared().activities_projection.get(parish_id, activity_id)
    }

    pub fn activities_list(&self, parish_id: ParishId) -> Vec<ActivityReadModel> {
        self.shared().activities_projection.list(parish_id)
    }

    pub fn participants_get(
        &self,
        parish_id: ParishId,
        participant_id: &ParticipantId,
    ) -> Option<ParticipantReadModel> {
        self.shared()
            .participants_projection
            .get(parish_id, participant_id)
    }

    pub fn participants_list(&self, parish_id: ParishId) -> Vec<ParticipantReadModel> {
        self.shared().participants_projection.list(parish_id)
    }

    // ---- ledger reads ----

    pub fn attendance_get(
        &self,
        parish_id: ParishId,
        activity_id: ActivityId,
        participant_id: ParticipantId,
    ) -> Option<AttendanceReadModel> {
        self.shared()
            .attendance_projection
            .get(parish_id, activity_id, participant_id)
    }

    pub fn attendance_list(
        &self,
        parish_id: ParishId,
        activity_id: ActivityId,
    ) -> Vec<AttendanceReadModel> {
        self.shared()
            .attendance_projection
            .list_for_activity(parish_id, activity_id)
    }

    pub fn contributions_list(
        &self,
        parish_id: ParishId,
        activity_id: ActivityId,
        participant_id: ParticipantId,
    ) -> Vec<PaymentReadModel> {
        self.shared()
            .contributions_projection
            .list_for_pair(parish_id, activity_id, participant_id)
    }

    pub fn contributions_get_by_receipt(
        &self,
        parish_id: ParishId,
        receipt_id: &ReceiptId,
    ) -> Option<PaymentReadModel> {
        self.shared()
            .contributions_projection
            .get_by_receipt(parish_id, receipt_id)
    }

    pub fn contributions_total_paid(
        &self,
        parish_id: ParishId,
        activity_id: ActivityId,
        participant_id: ParticipantId,
        currency: Currency,
    ) -> DomainResult<Money> {
        self.shared().contributions_projection.total_paid(
            parish_id,
            activity_id,
            participant_id,
            currency,
        )
    }

    pub fn treasury_entries(
        &self,
        parish_id: ParishId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Vec<TreasuryEntryReadModel> {
        self.shared()
            .treasury_projection
            .entries(parish_id, period_start, period_end)
    }

    pub fn treasury_balance(
        &self,
        parish_id: ParishId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> std::collections::BTreeMap<Currency, CurrencyBalance> {
        self.shared()
            .treasury_projection
            .balance(parish_id, period_start, period_end)
    }

    // ---- scan sessions ----

    /// Feed one scanned frame through the per-station protocol session.
    ///
    /// The station (parish, activity) keeps one session for the lifetime of
    /// the device being held open; the session's window debounces a camera
    /// re-reporting the badge it is pointed at.
    pub fn scan_observe(
        &self,
        parish_id: ParishId,
        activity_id: ActivityId,
        code: &str,
        now: DateTime<Utc>,
    ) -> ScanOutcome {
        let shared = self.shared();
        let roster = ProjectionRoster {
            projection: shared.participants_projection.as_ref(),
            parish_id,
        };

        let mut sessions = match shared.scan_sessions.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let session = sessions
            .entry((parish_id, activity_id))
            .or_insert_with(ScanSession::new);
        session.observe(code, now, &roster)
    }

    /// Tear a scan station down (device released). Returns whether a
    /// session existed. No attendance write is implied.
    pub fn scan_release(&self, parish_id: ParishId, activity_id: ActivityId) -> bool {
        let mut sessions = match self.shared().scan_sessions.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.remove(&(parish_id, activity_id)).is_some()
    }
}

/// Roster lookup backed by the participant directory read model.
struct ProjectionRoster<'a> {
    projection: &'a ParticipantsProjection,
    parish_id: ParishId,
}

impl RosterLookup for ProjectionRoster<'_> {
    fn is_enrolled(&self, participant_id: ParticipantId) -> bool {
        self.projection.is_enrolled(self.parish_id, participant_id)
    }
}

/// Build an SSE stream for a parish (used by `/stream`).
pub fn parish_sse_stream(
    services: Arc<AppServices>,
    parish_id: ParishId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.parish_id == parish_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
