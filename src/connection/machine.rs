//! Connection State Machine
//!
//! Tracks the lifecycle of every client and validates transitions
//! against the fixed table in [`ConnectionState`].
//!
//! Each client has its own mutex, so transitions on one client are
//! linearizable while different clients never contend. Observers run
//! under the client's mutex, which keeps notification order equal to
//! acceptance order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::core::ids::ClientId;
use crate::telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};
use super::observer::{ConnectionObserver, ObserverId};
use super::state::{ConnectionState, StateTransition};

/// Observer batching configuration.
#[derive(Debug, Clone)]
pub struct BatchingConfig {
    /// Coalesce bursts of transitions per client.
    pub enabled: bool,
    /// Burst window measured from the first buffered transition.
    pub window: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: Duration::from_millis(50),
        }
    }
}

impl BatchingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("CARD_SYNC_BATCHING")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.enabled),
            window: std::env::var("CARD_SYNC_BATCH_WINDOW_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.window),
        }
    }
}

/// Per-client lifecycle record.
#[derive(Debug)]
pub struct ClientSession {
    /// Client identifier.
    pub client_id: ClientId,
    /// Current state.
    pub state: ConnectionState,
    /// Sequence number of the last accepted transition (0 = none yet).
    pub sequence: u64,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// When the session was (re)initialized.
    pub created_at: DateTime<Utc>,
    /// When the last transition was accepted.
    pub last_transition_at: Option<DateTime<Utc>>,
    /// Transitions buffered for the current batch.
    pending: Vec<StateTransition>,
    /// Start of the current batch window.
    batch_started: Option<Instant>,
    /// Set once the session left the registry.
    removed: bool,
}

impl ClientSession {
    fn new(client_id: ClientId, state: ConnectionState) -> Self {
        Self {
            client_id,
            state,
            sequence: 0,
            reconnect_attempts: 0,
            created_at: Utc::now(),
            last_transition_at: None,
            pending: Vec::new(),
            batch_started: None,
            removed: false,
        }
    }

    /// Time spent in `Disconnected`, or `None` in any other state.
    fn disconnected_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.state != ConnectionState::Disconnected {
            return None;
        }
        let since = self.last_transition_at.unwrap_or(self.created_at);
        Some((now - since).to_std().unwrap_or(Duration::ZERO))
    }

    fn take_pending(&mut self) -> Vec<StateTransition> {
        self.batch_started = None;
        std::mem::take(&mut self.pending)
    }
}

/// Concurrent per-client connection state machine.
pub struct ConnectionStateMachine {
    /// Client sessions.
    clients: DashMap<ClientId, Arc<Mutex<ClientSession>>>,
    /// Subscribers in registration order.
    observers: RwLock<Vec<(ObserverId, Arc<dyn ConnectionObserver>)>>,
    /// Next observer handle.
    next_observer_id: AtomicU64,
    /// Batching mode.
    batching: BatchingConfig,
    /// Telemetry sink.
    telemetry: Arc<dyn TelemetrySink>,
}

impl ConnectionStateMachine {
    /// Create a state machine with batching disabled and no telemetry.
    pub fn new() -> Self {
        Self::with_config(BatchingConfig::default(), Arc::new(NoopTelemetry))
    }

    /// Create a state machine with explicit batching and telemetry.
    pub fn with_config(batching: BatchingConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            clients: DashMap::new(),
            observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            batching,
            telemetry,
        }
    }

    /// Check the legal-transition table.
    pub fn is_valid_transition(from: ConnectionState, to: Option<ConnectionState>) -> bool {
        to.map(|to| from.can_transition_to(to)).unwrap_or(false)
    }

    /// Create or reset the session for `client_id`.
    ///
    /// Re-initializing an existing client flushes any buffered batch, then
    /// resets its state and sequence counter.
    pub fn initialize_client(&self, client_id: ClientId, initial_state: ConnectionState) {
        let existing = match self.clients.entry(client_id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(ClientSession::new(client_id, initial_state))));
                debug!(client = %client_id, state = initial_state.as_str(), "client initialized");
                self.record_entry(client_id, initial_state);
                return;
            }
        };

        let mut session = existing.lock();
        if session.removed {
            // Lost a race with removal; start over with a fresh entry.
            drop(session);
            self.clients.remove_if(&client_id, |_, s| Arc::ptr_eq(s, &existing));
            return self.initialize_client(client_id, initial_state);
        }
        let pending = session.take_pending();
        self.notify(&pending);
        *session = ClientSession::new(client_id, initial_state);
        debug!(client = %client_id, state = initial_state.as_str(), "client re-initialized");
        self.record_entry(client_id, initial_state);
    }

    /// Attempt a transition for `client_id`.
    ///
    /// Returns `true` and notifies observers if the move is in the table;
    /// otherwise returns `false` with no side effects.
    pub fn transition_state(&self, client_id: ClientId, target: Option<ConnectionState>) -> bool {
        let Some(target) = target else {
            debug!(client = %client_id, "rejected transition to unspecified state");
            return false;
        };

        let Some(session) = self.session(&client_id) else {
            debug!(client = %client_id, "rejected transition for unknown client");
            return false;
        };

        let mut session = session.lock();
        if session.removed {
            debug!(client = %client_id, "rejected transition for removed client");
            return false;
        }
        let from = session.state;
        if !from.can_transition_to(target) {
            debug!(
                client = %client_id,
                from = from.as_str(),
                to = target.as_str(),
                "rejected illegal transition"
            );
            return false;
        }

        session.sequence += 1;
        let transition = StateTransition::new(client_id, from, target, session.sequence);
        session.state = target;
        session.last_transition_at = Some(transition.timestamp());
        match target {
            ConnectionState::Reconnecting => session.reconnect_attempts += 1,
            ConnectionState::Connected => session.reconnect_attempts = 0,
            _ => {}
        }
        let reconnect_attempts = session.reconnect_attempts;

        #[cfg(feature = "debug-tracing")]
        tracing::trace!(
            client = %client_id,
            from = from.as_str(),
            to = target.as_str(),
            sequence = transition.sequence(),
            "transition accepted"
        );

        self.record_transition(&transition, reconnect_attempts);

        if !self.batching.enabled {
            self.notify(std::slice::from_ref(&transition));
            return true;
        }

        let now = Instant::now();
        match session.batch_started {
            Some(started) if now.duration_since(started) >= self.batching.window => {
                let mut batch = session.take_pending();
                batch.push(transition);
                self.notify(&batch);
            }
            Some(_) => session.pending.push(transition),
            None => {
                session.batch_started = Some(now);
                session.pending.push(transition);
            }
        }

        true
    }

    /// Current state of a client.
    pub fn current_state(&self, client_id: &ClientId) -> Option<ConnectionState> {
        self.session(client_id).map(|s| s.lock().state)
    }

    /// Sequence number of the last accepted transition.
    pub fn sequence_number(&self, client_id: &ClientId) -> Option<u64> {
        self.session(client_id).map(|s| s.lock().sequence)
    }

    /// Number of tracked clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Clients currently in `state`.
    pub fn clients_in_state(&self, state: ConnectionState) -> Vec<ClientId> {
        let sessions: Vec<_> = self.clients.iter().map(|e| e.value().clone()).collect();
        let mut ids: Vec<ClientId> = sessions
            .iter()
            .filter_map(|s| {
                let s = s.lock();
                (s.state == state).then_some(s.client_id)
            })
            .collect();
        ids.sort();
        ids
    }

    /// Destroy a client session, delivering any buffered batch first.
    ///
    /// Returns the final state, or `None` if the client was unknown.
    pub fn remove_client(&self, client_id: &ClientId) -> Option<ConnectionState> {
        let (_, session) = self.clients.remove(client_id)?;
        let mut session = session.lock();
        session.removed = true;
        let pending = session.take_pending();
        self.notify(&pending);
        debug!(client = %client_id, "client removed");
        Some(session.state)
    }

    /// Whether a `Disconnected` client is still inside its reconnect window.
    pub fn can_reconnect(&self, client_id: &ClientId, window: Duration) -> bool {
        self.session(client_id)
            .and_then(|s| s.lock().disconnected_for(Utc::now()))
            .map(|elapsed| elapsed < window)
            .unwrap_or(false)
    }

    /// Remove clients that stayed `Disconnected` for at least `window`.
    ///
    /// Returns the removed ids, sorted.
    pub fn expire_disconnected(&self, window: Duration) -> Vec<ClientId> {
        let now = Utc::now();
        let mut expired = Vec::new();
        for entry in self.all_sessions() {
            let mut session = entry.lock();
            let timed_out = !session.removed
                && session
                    .disconnected_for(now)
                    .map(|elapsed| elapsed >= window)
                    .unwrap_or(false);
            if !timed_out {
                continue;
            }
            session.removed = true;
            let client_id = session.client_id;
            let pending = session.take_pending();
            self.notify(&pending);
            drop(session);

            self.clients.remove_if(&client_id, |_, s| Arc::ptr_eq(s, &entry));
            debug!(client = %client_id, "reconnect window expired");
            expired.push(client_id);
        }
        expired.sort();
        expired
    }

    /// Subscribe an observer. Observers are called in registration order.
    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Unsubscribe an observer. Notifications already in flight complete.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    /// Deliver the buffered batch for one client.
    pub fn flush(&self, client_id: &ClientId) {
        if let Some(session) = self.session(client_id) {
            let mut session = session.lock();
            let pending = session.take_pending();
            self.notify(&pending);
        }
    }

    /// Deliver buffered batches for every client.
    pub fn flush_all(&self) {
        for session in self.all_sessions() {
            let mut session = session.lock();
            let pending = session.take_pending();
            self.notify(&pending);
        }
    }

    /// Deliver batches whose window has elapsed.
    pub fn flush_expired(&self) {
        let now = Instant::now();
        for session in self.all_sessions() {
            let mut session = session.lock();
            let expired = session
                .batch_started
                .map(|started| now.duration_since(started) >= self.batching.window)
                .unwrap_or(false);
            if expired {
                let pending = session.take_pending();
                self.notify(&pending);
            }
        }
    }

    fn session(&self, client_id: &ClientId) -> Option<Arc<Mutex<ClientSession>>> {
        self.clients.get(client_id).map(|e| e.value().clone())
    }

    fn all_sessions(&self) -> Vec<Arc<Mutex<ClientSession>>> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    fn notify(&self, batch: &[StateTransition]) {
        if batch.is_empty() {
            return;
        }

        let observers: Vec<Arc<dyn ConnectionObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();

        for observer in observers {
            let result = catch_unwind(AssertUnwindSafe(|| {
                if let [single] = batch {
                    observer.on_state_transition(single);
                } else {
                    observer.on_state_transitions(batch);
                }
            }));
            if result.is_err() {
                error!(client = %batch[0].client_id(), "connection observer panicked");
            }
        }
    }

    fn record_entry(&self, client_id: ClientId, state: ConnectionState) {
        if state == ConnectionState::Connecting {
            self.telemetry.record(TelemetryEvent::ConnectionAttempt { client_id });
        }
    }

    fn record_transition(&self, transition: &StateTransition, reconnect_attempts: u32) {
        let client_id = transition.client_id();
        let event = match transition.to() {
            ConnectionState::Connecting => TelemetryEvent::ConnectionAttempt { client_id },
            ConnectionState::Connected => TelemetryEvent::Connected { client_id },
            ConnectionState::Disconnected => TelemetryEvent::Disconnection { client_id },
            ConnectionState::Reconnecting => TelemetryEvent::ReconnectAttempt {
                client_id,
                attempt: reconnect_attempts,
            },
        };
        self.telemetry.record(event);
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::observer::TransitionLog;
    use crate::telemetry::MetricsCollector;
    use proptest::prelude::*;

    fn client(n: u8) -> ClientId {
        ClientId::new([n; 16])
    }

    fn machine_with_log() -> (ConnectionStateMachine, Arc<TransitionLog>) {
        let machine = ConnectionStateMachine::new();
        let log = Arc::new(TransitionLog::new());
        machine.add_observer(log.clone());
        (machine, log)
    }

    #[test]
    fn test_every_legal_transition() {
        for from in ConnectionState::ALL {
            for &to in from.allowed_targets() {
                let (machine, log) = machine_with_log();
                let id = client(1);
                machine.initialize_client(id, from);

                assert!(machine.transition_state(id, Some(to)), "{:?} -> {:?}", from, to);
                assert_eq!(machine.current_state(&id), Some(to));

                let seen = log.transitions();
                assert_eq!(seen.len(), 1);
                assert_eq!(seen[0].from(), from);
                assert_eq!(seen[0].to(), to);
                assert_eq!(seen[0].sequence(), 1);
                assert_eq!(seen[0].client_id(), id);
            }
        }
    }

    #[test]
    fn test_every_illegal_transition() {
        for from in ConnectionState::ALL {
            for to in ConnectionState::ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                let (machine, log) = machine_with_log();
                let id = client(1);
                machine.initialize_client(id, from);

                assert!(!machine.transition_state(id, Some(to)));
                assert_eq!(machine.current_state(&id), Some(from));
                assert_eq!(machine.sequence_number(&id), Some(0));
                assert!(log.is_empty());
            }
        }
    }

    #[test]
    fn test_transition_to_none_rejected() {
        for from in ConnectionState::ALL {
            let (machine, log) = machine_with_log();
            let id = client(1);
            machine.initialize_client(id, from);

            assert!(!machine.transition_state(id, None));
            assert_eq!(machine.current_state(&id), Some(from));
            assert!(log.is_empty());
        }
        assert!(!ConnectionStateMachine::is_valid_transition(ConnectionState::Connected, None));
    }

    #[test]
    fn test_unknown_client_rejected() {
        let (machine, log) = machine_with_log();
        assert!(!machine.transition_state(client(9), Some(ConnectionState::Connected)));
        assert_eq!(machine.current_state(&client(9)), None);
        assert!(log.is_empty());
    }

    #[test]
    fn test_sequence_numbers_are_gapless() {
        let (machine, log) = machine_with_log();
        let id = client(1);
        machine.initialize_client(id, ConnectionState::Connecting);

        assert!(machine.transition_state(id, Some(ConnectionState::Connected)));
        // Rejected transition must not consume a sequence number.
        assert!(!machine.transition_state(id, Some(ConnectionState::Connecting)));
        assert!(machine.transition_state(id, Some(ConnectionState::Reconnecting)));
        assert!(machine.transition_state(id, Some(ConnectionState::Connected)));

        let sequences: Vec<u64> = log.transitions().iter().map(|t| t.sequence()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn test_reinitialize_resets_state() {
        let machine = ConnectionStateMachine::new();
        let id = client(1);
        machine.initialize_client(id, ConnectionState::Connecting);
        machine.transition_state(id, Some(ConnectionState::Connected));
        assert_eq!(machine.sequence_number(&id), Some(1));

        machine.initialize_client(id, ConnectionState::Disconnected);
        assert_eq!(machine.current_state(&id), Some(ConnectionState::Disconnected));
        assert_eq!(machine.sequence_number(&id), Some(0));
        assert_eq!(machine.client_count(), 1);
    }

    #[test]
    fn test_observers_called_in_registration_order() {
        let machine = ConnectionStateMachine::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            machine.add_observer(Arc::new(move |_: &StateTransition| {
                order.lock().push(tag);
            }));
        }

        let id = client(1);
        machine.initialize_client(id, ConnectionState::Connecting);
        machine.transition_state(id, Some(ConnectionState::Connected));

        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_remove_observer() {
        let machine = ConnectionStateMachine::new();
        let log = Arc::new(TransitionLog::new());
        let handle = machine.add_observer(log.clone());

        let id = client(1);
        machine.initialize_client(id, ConnectionState::Connecting);
        machine.transition_state(id, Some(ConnectionState::Connected));
        assert!(machine.remove_observer(handle));
        assert!(!machine.remove_observer(handle));
        machine.transition_state(id, Some(ConnectionState::Disconnected));

        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_panicking_observer_does_not_block_others() {
        let machine = ConnectionStateMachine::new();
        machine.add_observer(Arc::new(|_: &StateTransition| panic!("boom")));
        let log = Arc::new(TransitionLog::new());
        machine.add_observer(log.clone());

        let id = client(1);
        machine.initialize_client(id, ConnectionState::Connecting);
        assert!(machine.transition_state(id, Some(ConnectionState::Connected)));
        assert_eq!(log.len(), 1);
        assert_eq!(machine.current_state(&id), Some(ConnectionState::Connected));
    }

    #[test]
    fn test_remove_client() {
        let machine = ConnectionStateMachine::new();
        let id = client(1);
        machine.initialize_client(id, ConnectionState::Connected);
        assert_eq!(machine.remove_client(&id), Some(ConnectionState::Connected));
        assert_eq!(machine.remove_client(&id), None);
        assert_eq!(machine.client_count(), 0);
    }

    #[test]
    fn test_removed_session_rejects_transitions() {
        let (machine, log) = machine_with_log();
        let id = client(1);
        machine.initialize_client(id, ConnectionState::Connecting);
        // A caller that looked the session up before removal.
        let stale = machine.session(&id).unwrap();
        machine.remove_client(&id);

        assert!(stale.lock().removed);
        assert!(!machine.transition_state(id, Some(ConnectionState::Connected)));
        assert_eq!(stale.lock().state, ConnectionState::Connecting);
        assert!(log.is_empty());
    }

    #[test]
    fn test_expire_disconnected() {
        let (machine, log) = machine_with_log();
        machine.initialize_client(client(1), ConnectionState::Connecting);
        machine.transition_state(client(1), Some(ConnectionState::Connected));
        machine.transition_state(client(1), Some(ConnectionState::Disconnected));
        machine.initialize_client(client(2), ConnectionState::Connecting);
        machine.transition_state(client(2), Some(ConnectionState::Connected));

        // Inside a long window nothing is removed.
        assert!(machine.expire_disconnected(Duration::from_secs(60)).is_empty());
        assert!(machine.can_reconnect(&client(1), Duration::from_secs(60)));
        assert!(!machine.can_reconnect(&client(2), Duration::from_secs(60)));

        assert!(!machine.can_reconnect(&client(1), Duration::ZERO));
        assert_eq!(machine.expire_disconnected(Duration::ZERO), vec![client(1)]);
        assert_eq!(machine.current_state(&client(1)), None);
        assert_eq!(machine.current_state(&client(2)), Some(ConnectionState::Connected));
        assert_eq!(machine.client_count(), 1);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_expired_client_can_start_over() {
        let machine = ConnectionStateMachine::new();
        let id = client(1);
        machine.initialize_client(id, ConnectionState::Disconnected);
        assert_eq!(machine.expire_disconnected(Duration::ZERO), vec![id]);

        machine.initialize_client(id, ConnectionState::Connecting);
        assert!(machine.transition_state(id, Some(ConnectionState::Connected)));
        assert_eq!(machine.sequence_number(&id), Some(1));
    }

    #[test]
    fn test_clients_in_state() {
        let machine = ConnectionStateMachine::new();
        machine.initialize_client(client(1), ConnectionState::Connecting);
        machine.initialize_client(client(2), ConnectionState::Connecting);
        machine.initialize_client(client(3), ConnectionState::Connecting);
        machine.transition_state(client(2), Some(ConnectionState::Connected));

        assert_eq!(machine.clients_in_state(ConnectionState::Connecting), vec![client(1), client(3)]);
        assert_eq!(machine.clients_in_state(ConnectionState::Connected), vec![client(2)]);
    }

    #[test]
    fn test_batching_coalesces_burst() {
        let machine = ConnectionStateMachine::with_config(
            BatchingConfig { enabled: true, window: Duration::from_secs(60) },
            Arc::new(NoopTelemetry),
        );
        let log = Arc::new(TransitionLog::new());
        machine.add_observer(log.clone());

        let id = client(1);
        machine.initialize_client(id, ConnectionState::Connecting);
        machine.transition_state(id, Some(ConnectionState::Connected));
        machine.transition_state(id, Some(ConnectionState::Reconnecting));
        machine.transition_state(id, Some(ConnectionState::Disconnected));

        // State is exact even while notifications are buffered.
        assert_eq!(machine.current_state(&id), Some(ConnectionState::Disconnected));
        assert!(log.is_empty());

        machine.flush(&id);
        assert_eq!(log.deliveries(), 1);
        let sequences: Vec<u64> = log.transitions().iter().map(|t| t.sequence()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn test_batching_flushes_after_window() {
        let machine = ConnectionStateMachine::with_config(
            BatchingConfig { enabled: true, window: Duration::ZERO },
            Arc::new(NoopTelemetry),
        );
        let log = Arc::new(TransitionLog::new());
        machine.add_observer(log.clone());

        let id = client(1);
        machine.initialize_client(id, ConnectionState::Connecting);
        machine.transition_state(id, Some(ConnectionState::Connected));
        assert!(log.is_empty());

        // Window already elapsed: the next transition delivers both.
        machine.transition_state(id, Some(ConnectionState::Disconnected));
        assert_eq!(log.deliveries(), 1);
        assert_eq!(log.len(), 2);

        machine.transition_state(id, Some(ConnectionState::Connecting));
        machine.flush_expired();
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_telemetry_events() {
        let metrics = Arc::new(MetricsCollector::new());
        let machine = ConnectionStateMachine::with_config(BatchingConfig::default(), metrics.clone());
        let id = client(1);

        machine.initialize_client(id, ConnectionState::Connecting);
        machine.transition_state(id, Some(ConnectionState::Connected));
        machine.transition_state(id, Some(ConnectionState::Reconnecting));
        machine.transition_state(id, Some(ConnectionState::Disconnected));

        let snap = metrics.snapshot();
        assert_eq!(snap.connection_attempts, 1);
        assert_eq!(snap.connections, 1);
        assert_eq!(snap.reconnect_attempts, 1);
        assert_eq!(snap.disconnections, 1);
    }

    #[test]
    fn test_concurrent_clients_independent() {
        let (machine, log) = machine_with_log();
        let ids: Vec<ClientId> = (0..10).map(client).collect();
        for id in &ids {
            machine.initialize_client(*id, ConnectionState::Connecting);
        }

        std::thread::scope(|scope| {
            for id in &ids {
                let machine = &machine;
                scope.spawn(move || {
                    assert!(machine.transition_state(*id, Some(ConnectionState::Connected)));
                    assert!(machine.transition_state(*id, Some(ConnectionState::Reconnecting)));
                    assert!(machine.transition_state(*id, Some(ConnectionState::Disconnected)));
                });
            }
        });

        assert_eq!(log.len(), 30);
        for id in &ids {
            assert_eq!(machine.current_state(id), Some(ConnectionState::Disconnected));
            let sequences: Vec<u64> = log
                .transitions()
                .iter()
                .filter(|t| t.client_id() == *id)
                .map(|t| t.sequence())
                .collect();
            assert_eq!(sequences, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_racing_transitions_single_winner() {
        let (machine, log) = machine_with_log();
        let id = client(1);
        machine.initialize_client(id, ConnectionState::Connecting);

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let machine = &machine;
                    scope.spawn(move || machine.transition_state(id, Some(ConnectionState::Connected)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
        });

        assert_eq!(winners, 1);
        assert_eq!(log.len(), 1);
        assert_eq!(machine.sequence_number(&id), Some(1));
    }

    fn arb_target() -> impl Strategy<Value = Option<ConnectionState>> {
        prop_oneof![
            Just(None),
            Just(Some(ConnectionState::Connecting)),
            Just(Some(ConnectionState::Connected)),
            Just(Some(ConnectionState::Disconnected)),
            Just(Some(ConnectionState::Reconnecting)),
        ]
    }

    proptest! {
        #[test]
        fn prop_machine_matches_table(targets in prop::collection::vec(arb_target(), 0..40)) {
            let (machine, log) = machine_with_log();
            let id = client(1);
            machine.initialize_client(id, ConnectionState::Connecting);

            let mut model = ConnectionState::Connecting;
            let mut accepted = 0u64;
            for target in targets {
                let expected = ConnectionStateMachine::is_valid_transition(model, target);
                prop_assert_eq!(machine.transition_state(id, target), expected);
                if expected {
                    model = target.unwrap();
                    accepted += 1;
                }
                prop_assert_eq!(machine.current_state(&id), Some(model));
            }

            prop_assert_eq!(machine.sequence_number(&id), Some(accepted));
            let sequences: Vec<u64> = log.transitions().iter().map(|t| t.sequence()).collect();
            let expected_sequences: Vec<u64> = (1..=accepted).collect();
            prop_assert_eq!(sequences, expected_sequences);
        }
    }
}
