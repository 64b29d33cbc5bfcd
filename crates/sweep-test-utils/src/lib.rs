//! Testing utilities for the sweep workspace
//!
//! In-memory implementations of every capability the engine consumes, plus
//! a `TestWorld` bundle that wires them together around a manual clock.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use sweep_core::{
    Capabilities, Clock, DiagnosticsSink, Environment, EphemeralStore, EventBus, Order,
    OrderQuery, OrderStore, ScheduleError, SinceField, StoreError, TimerSubsystem,
    TransitionEvent, TransitionGate,
};

/// Fixed epoch all test fixtures are seeded around
pub const TEST_NOW: i64 = 1_700_000_000;

const DAY_SECS: i64 = 86_400;

/// Manually advanced clock shared across the world
#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// One seeded order with per-field timestamps and a note log
pub struct TestOrder {
    id: String,
    status: Mutex<String>,
    modified: i64,
    created: i64,
    completed: i64,
    paid: i64,
    notes: Mutex<Vec<String>>,
    reject_transitions: AtomicBool,
}

impl TestOrder {
    /// Order whose every timestamp field is `age_days` old relative to `now`
    #[must_use]
    pub fn aged(id: impl Into<String>, status: impl Into<String>, age_days: i64, now: i64) -> Self {
        let ts = now - age_days * DAY_SECS;
        Self::with_timestamps(id, status, ts, ts, ts, ts)
    }

    /// Order with explicit per-field timestamps
    #[must_use]
    pub fn with_timestamps(
        id: impl Into<String>,
        status: impl Into<String>,
        modified: i64,
        created: i64,
        completed: i64,
        paid: i64,
    ) -> Self {
        Self {
            id: id.into(),
            status: Mutex::new(status.into()),
            modified,
            created,
            completed,
            paid,
            notes: Mutex::new(Vec::new()),
            reject_transitions: AtomicBool::new(false),
        }
    }

    /// Make the store reject every transition for this order
    pub fn reject_transitions(&self) {
        self.reject_transitions.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().clone()
    }

    #[must_use]
    pub fn timestamp(&self, field: SinceField) -> i64 {
        match field {
            SinceField::Modified => self.modified,
            SinceField::Created => self.created,
            SinceField::Completed => self.completed,
            SinceField::Paid => self.paid,
        }
    }
}

#[async_trait]
impl Order for TestOrder {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn status(&self) -> String {
        self.status.lock().clone()
    }

    async fn update_status(&self, new_status: &str, note: &str) -> Result<(), StoreError> {
        if self.reject_transitions.load(Ordering::Relaxed) {
            return Err(StoreError::TransitionRejected {
                id: self.id.clone(),
                status: new_status.to_string(),
            });
        }
        *self.status.lock() = new_status.to_string();
        self.notes.lock().push(note.to_string());
        Ok(())
    }
}

/// In-memory order store preserving insertion order
pub struct InMemoryOrderStore {
    orders: RwLock<Vec<Arc<TestOrder>>>,
    active: AtomicBool,
    failing: AtomicBool,
    queries: Mutex<Vec<OrderQuery>>,
}

impl InMemoryOrderStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(Vec::new()),
            active: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn seed(&self, order: TestOrder) -> Arc<TestOrder> {
        let order = Arc::new(order);
        self.orders.write().push(order.clone());
        order
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Make every query error until switched back
    pub fn fail_queries(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Queries the engine has issued, oldest first
    #[must_use]
    pub fn queries(&self) -> Vec<OrderQuery> {
        self.queries.lock().clone()
    }

    /// Orders currently carrying the status
    #[must_use]
    pub fn count_with_status(&self, status: &str) -> usize {
        self.orders
            .read()
            .iter()
            .filter(|o| o.status() == status)
            .count()
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    async fn query(&self, query: OrderQuery) -> Result<Vec<Arc<dyn Order>>, StoreError> {
        self.queries.lock().push(query.clone());
        if self.failing.load(Ordering::Relaxed) {
            return Err(StoreError::QueryFailed("store outage".to_string()));
        }
        let matches = self
            .orders
            .read()
            .iter()
            .filter(|o| {
                query.statuses.contains(&o.status()) && o.timestamp(query.since) <= query.cutoff
            })
            .take(query.limit)
            .map(|o| o.clone() as Arc<dyn Order>)
            .collect();
        Ok(matches)
    }
}

#[derive(Debug, Clone)]
struct Registration {
    next_fire: i64,
    frequency: String,
}

/// In-memory timer subsystem with call logs
pub struct InMemoryTimer {
    events: DashMap<String, Registration>,
    intervals: Vec<String>,
    schedules: Mutex<Vec<(String, i64, String)>>,
    clears: Mutex<Vec<String>>,
}

impl InMemoryTimer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            intervals: vec!["hourly".to_string(), "daily".to_string(), "weekly".to_string()],
            schedules: Mutex::new(Vec::new()),
            clears: Mutex::new(Vec::new()),
        }
    }

    /// Overwrite the next firing for an already-registered event
    pub fn set_next_fire(&self, event: &str, next_fire: i64) {
        if let Some(mut registration) = self.events.get_mut(event) {
            registration.next_fire = next_fire;
        }
    }

    /// Frequency of a registered event
    #[must_use]
    pub fn frequency_of(&self, event: &str) -> Option<String> {
        self.events.get(event).map(|r| r.frequency.clone())
    }

    #[must_use]
    pub fn schedules(&self) -> Vec<(String, i64, String)> {
        self.schedules.lock().clone()
    }

    #[must_use]
    pub fn clears(&self) -> Vec<String> {
        self.clears.lock().clone()
    }
}

impl Default for InMemoryTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimerSubsystem for InMemoryTimer {
    async fn next_fire_time(&self, event: &str) -> Option<i64> {
        self.events.get(event).map(|r| r.next_fire)
    }

    async fn schedule(
        &self,
        event: &str,
        start: i64,
        frequency: &str,
    ) -> Result<(), ScheduleError> {
        self.schedules
            .lock()
            .push((event.to_string(), start, frequency.to_string()));
        self.events.insert(
            event.to_string(),
            Registration {
                next_fire: start,
                frequency: frequency.to_string(),
            },
        );
        Ok(())
    }

    async fn clear(&self, event: &str) {
        self.clears.lock().push(event.to_string());
        self.events.remove(event);
    }

    fn known_intervals(&self) -> Vec<String> {
        self.intervals.clone()
    }
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: String,
    expires_at: i64,
}

/// In-memory ephemeral store honoring TTLs against the shared clock
pub struct InMemoryKv {
    entries: DashMap<String, KvEntry>,
    clock: Arc<ManualClock>,
}

impl InMemoryKv {
    #[must_use]
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn expired(&self, entry: &KvEntry) -> bool {
        entry.expires_at <= self.clock.now()
    }

    /// Remaining TTL of a live key, for expiry assertions
    #[must_use]
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        if self.expired(&entry) {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        Some(Duration::from_secs(
            (entry.expires_at - self.clock.now()) as u64,
        ))
    }
}

#[async_trait]
impl EphemeralStore for InMemoryKv {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let now = self.clock.now();
        if let Some(existing) = self.entries.get(key) {
            if !self.expired(&existing) {
                return false;
            }
        }
        #[allow(clippy::cast_possible_wrap)]
        self.entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: now + ttl.as_secs() as i64,
            },
        );
        true
    }

    async fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        if self.expired(&entry) {
            return None;
        }
        Some(entry.value.clone())
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Bus that records every published event
#[derive(Default)]
pub struct CollectingBus {
    events: Mutex<Vec<(String, TransitionEvent)>>,
}

impl CollectingBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<(String, TransitionEvent)> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventBus for CollectingBus {
    async fn publish(&self, event: &str, payload: TransitionEvent) {
        self.events.lock().push((event.to_string(), payload));
    }
}

/// Gate that vetoes every transition
#[derive(Debug, Default, Clone, Copy)]
pub struct VetoAllGate;

#[async_trait]
impl TransitionGate for VetoAllGate {
    async fn should_skip(
        &self,
        _order: &dyn Order,
        _previous_status: &str,
        _new_status: &str,
        _days: u32,
    ) -> bool {
        true
    }
}

/// Sink that records logs and notices
pub struct RecordingSink {
    pub environment: Environment,
    logs: Mutex<Vec<String>>,
    notices: Mutex<Vec<String>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            logs: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }

    #[must_use]
    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().clone()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn log(&self, message: &str) {
        self.logs.lock().push(message.to_string());
    }

    fn notice(&self, message: &str) {
        self.notices.lock().push(message.to_string());
    }

    fn environment(&self) -> Environment {
        self.environment
    }
}

/// Everything a test needs, wired around one manual clock
pub struct TestWorld {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryOrderStore>,
    pub timer: Arc<InMemoryTimer>,
    pub kv: Arc<InMemoryKv>,
    pub bus: Arc<CollectingBus>,
    pub sink: Arc<RecordingSink>,
}

impl TestWorld {
    #[must_use]
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(TEST_NOW));
        Self {
            store: Arc::new(InMemoryOrderStore::new()),
            timer: Arc::new(InMemoryTimer::new()),
            kv: Arc::new(InMemoryKv::new(clock.clone())),
            bus: Arc::new(CollectingBus::new()),
            sink: Arc::new(RecordingSink::new(Environment::Development)),
            clock,
        }
    }

    /// Capabilities bundle over this world
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::new(
            self.store.clone(),
            self.timer.clone(),
            self.kv.clone(),
            self.bus.clone(),
        )
        .with_clock(self.clock.clone())
        .with_sink(self.sink.clone())
    }

    /// Seed `count` orders with the given status and age
    pub fn seed_aged(&self, status: &str, age_days: i64, count: usize) -> Vec<Arc<TestOrder>> {
        (0..count)
            .map(|i| {
                self.store.seed(TestOrder::aged(
                    format!("{status}-{age_days}d-{i}"),
                    status,
                    age_days,
                    self.clock.now(),
                ))
            })
            .collect()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
