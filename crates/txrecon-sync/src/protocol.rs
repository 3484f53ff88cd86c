//! Reconciliation driver.
//!
//! Runs both flows over a [`Transport`]:
//!
//! - [`ReconciliationDriver::reconcile_with`]: the partitioned round
//!   protocol driven by a [`ReconciliationSession`];
//! - [`ReconciliationDriver::reconcile_single`]: one sketch of the
//!   configured [`SketchKind`](txrecon_core::SketchKind), answered by a
//!   `Response` and an optional `Challenge`.
//!
//! Every incoming message goes through one dispatcher. A reply from a peer
//! this node is waiting on is handed to the waiting session; everything
//! else is answered as the responding side. So a node can run a responder
//! task and initiate sessions over the same transport.
//!
//! Responder-side partitioned sessions live in the driver, keyed by peer,
//! until they finish or go idle for `session_timeout`. Items learned from
//! a peer go straight into the store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex};

use txrecon_core::{CompactClock, ItemId, PeerClock, PeerId, PeerPair, ReconciliationConfig};
use txrecon_sketch::{BankDigest, CompactSketch};
use txrecon_store::{ItemStore, ItemStoreExt};

use crate::clocks::ClockBook;
use crate::error::{Result, SyncError};
use crate::manager::ReconciliationSetsManager;
use crate::messages::{ErrorCode, ReconMessage};
use crate::reconcile::CompactReconciliationSet;
use crate::session::ReconciliationSession;
use crate::transport::Transport;

/// Result of one reconciliation with a peer, from the initiator's side.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Rounds used (1 for the single-sketch flow).
    pub rounds: u64,
    /// Items found that the peer lacks.
    pub local_only: Vec<ItemId>,
    /// Items found that were missing here.
    pub remote_only: Vec<ItemId>,
    /// Items newly written to the local store.
    pub inserted: usize,
    /// True when the full symmetric difference was found.
    pub exhaustive: bool,
    /// Partitions escalated to an explicit id exchange.
    pub fallback_partitions: usize,
}

/// Configuration for driver behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Timeout for waiting for peer messages.
    pub message_timeout: std::time::Duration,
    /// Whether to check incoming messages against the size limits.
    pub validate_limits: bool,
    /// Responder sessions idle for longer than this are dropped.
    pub session_timeout: std::time::Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_secs(30),
            validate_limits: true,
            session_timeout: Duration::from_secs(120),
        }
    }
}

/// A responder-side session and when it last saw a message.
struct OpenSession {
    session: ReconciliationSession,
    touched: Instant,
}

pub struct ReconciliationDriver<S: ItemStore, T: Transport> {
    store: S,
    transport: T,
    config: ReconciliationConfig,
    sync: SyncConfig,
    clocks: Mutex<ClockBook>,
    sets: Mutex<ReconciliationSetsManager>,
    sessions: Mutex<HashMap<PeerId, OpenSession>>,
    /// Initiator sessions waiting for a reply, keyed by the peer asked.
    pending: Mutex<HashMap<PeerId, oneshot::Sender<ReconMessage>>>,
}

impl<S: ItemStore, T: Transport> ReconciliationDriver<S, T> {
    pub fn new(store: S, transport: T, config: ReconciliationConfig, sync: SyncConfig) -> Self {
        let me = transport.local_peer_id();
        Self {
            store,
            transport,
            sets: Mutex::new(ReconciliationSetsManager::new(me, config.clone())),
            config,
            sync,
            clocks: Mutex::new(ClockBook::new()),
            sessions: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.transport.local_peer_id()
    }

    /// Store a new local item and feed it to every partner's set.
    pub async fn add_item(&self, item: ItemId) -> Result<bool> {
        let inserted = self.store.insert_item(item).await?.is_inserted();
        if inserted {
            self.sets.lock().await.populate_tx(item);
        }
        Ok(inserted)
    }

    /// Store full transaction bytes. Returns the derived id and whether it
    /// was new.
    pub async fn add_transaction(&self, tx: Bytes) -> Result<(ItemId, bool)> {
        let (item, result) = self.store.insert_transaction(tx).await?;
        let inserted = result.is_inserted();
        if inserted {
            self.sets.lock().await.populate_tx(item);
        }
        Ok((item, inserted))
    }

    /// Whether the last clock seen from `peer` suggests a session is useful.
    pub async fn should_reconcile(&self, peer: &PeerId) -> Result<bool> {
        let mine = self.store.clock().await?;
        Ok(self.clocks.lock().await.should_reconcile(&mine, peer))
    }

    /// Number of responder sessions still open.
    pub async fn open_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Drop responder sessions idle for longer than `session_timeout`.
    /// Returns how many were dropped.
    pub async fn evict_stale_sessions(&self) -> usize {
        let timeout = self.sync.session_timeout;
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|peer, open| {
            let keep = open.touched.elapsed() <= timeout;
            if !keep {
                tracing::debug!(%peer, round = open.session.round(), "evicting idle session");
            }
            keep
        });
        before - sessions.len()
    }

    /// Run the partitioned round protocol with `peer` as initiator.
    ///
    /// If the session fails on this side, the peer is told with an `Error`
    /// so it can drop its half.
    pub async fn reconcile_with(&self, peer: &PeerId) -> Result<SyncReport> {
        let result = self.run_partitioned(peer).await;
        if let Err(e) = &result {
            self.abandon(peer, e).await;
        }
        result
    }

    async fn run_partitioned(&self, peer: &PeerId) -> Result<SyncReport> {
        let pair = PeerPair::new(self.local_peer_id(), *peer);
        let snapshot = self.store.all_items().await?;
        let mut session = ReconciliationSession::new(pair, snapshot, &self.config);
        let mut report = SyncReport::default();

        loop {
            let round = session.round();
            let bank = session.digest()?;
            let clock = self.compact_clock().await?;
            let request = ReconMessage::BankRequest { round, clock, bank };

            let (clock, bank, txs) = match self.request(peer, request).await? {
                ReconMessage::BankResponse {
                    round: r,
                    clock,
                    bank,
                    txs,
                } if r == round => (clock, bank, txs),
                ReconMessage::BankResponse { round: r, .. } => {
                    return Err(SyncError::RoundMismatch {
                        expected: round,
                        actual: r,
                    })
                }
                other => return Err(unexpected("BankResponse", &other)),
            };
            self.record_clock(*peer, &clock).await;

            let outcome = session.decode(&bank)?;
            report.inserted += self.absorb(&outcome.new_remote).await?;

            if outcome.done {
                if !outcome.fallback.is_empty() {
                    let learned = session.absorb_fallback(&txs)?;
                    report.inserted += self.absorb(&learned).await?;
                    self.transport
                        .send(
                            peer,
                            ReconMessage::Fallback {
                                round,
                                txs: session.fallback_ids(),
                            },
                        )
                        .await?;
                }
                report.fallback_partitions = outcome.fallback.len();
                break;
            }
            session.advance()?;
        }

        report.rounds = session.round() + 1;
        report.local_only = session.local_only();
        report.remote_only = session.remote_only();
        report.exhaustive = session.unresolved() == 0;
        tracing::debug!(
            %peer,
            rounds = report.rounds,
            local_only = report.local_only.len(),
            remote_only = report.remote_only.len(),
            "partitioned reconciliation finished"
        );
        Ok(report)
    }

    /// Run the single-sketch flow with `peer` as initiator.
    ///
    /// The partner's set is rotated to a fresh seed first, so a Bloom false
    /// positive does not hide the same item twice in a row.
    pub async fn reconcile_single(&self, peer: &PeerId) -> Result<SyncReport> {
        let result = self.run_single(peer).await;
        if let Err(e) = &result {
            self.abandon(peer, e).await;
        }
        result
    }

    async fn run_single(&self, peer: &PeerId) -> Result<SyncReport> {
        let sketch = {
            let mut sets = self.sets.lock().await;
            if sets.set_for(peer).is_none() {
                let items = self.store.all_items().await?;
                sets.initialize(*peer, &items)?;
            } else {
                sets.iterate(peer, &[])?;
            }
            sets.set_for(peer)
                .map(CompactReconciliationSet::to_compact)
                .ok_or(SyncError::InvalidState("partner set missing"))?
        };
        let clock = self.compact_clock().await?;
        let request = ReconMessage::Request { clock, sketch };

        let (clock, theirs, txs) = match self.request(peer, request).await? {
            ReconMessage::Response { clock, sketch, txs } => (clock, sketch, txs),
            other => return Err(unexpected("Response", &other)),
        };
        self.record_clock(*peer, &clock).await;

        let mut report = SyncReport {
            rounds: 1,
            ..Default::default()
        };
        report.inserted += self.absorb(&txs).await?;

        let result = {
            let sets = self.sets.lock().await;
            let set = sets
                .set_for(peer)
                .ok_or(SyncError::InvalidState("partner set missing"))?;
            set.reconcile(&theirs)?
        };
        report.inserted += self.absorb(&result.remote_only).await?;
        if !result.local_only.is_empty() {
            self.transport
                .send(
                    peer,
                    ReconMessage::Challenge {
                        txs: result.local_only.clone(),
                    },
                )
                .await?;
        }

        report.local_only = result.local_only;
        report.remote_only = txs;
        report.remote_only.extend(result.remote_only);
        report.remote_only.sort();
        report.remote_only.dedup();
        report.exhaustive = result.exhaustive;
        Ok(report)
    }

    /// Wait for one message and dispatch it. Returns false on timeout.
    pub async fn serve_one(&self) -> Result<bool> {
        match self.transport.recv_timeout(self.sync.message_timeout).await? {
            Some((from, message)) => {
                self.dispatch(from, message).await?;
                Ok(true)
            }
            None => {
                self.evict_stale_sessions().await;
                Ok(false)
            }
        }
    }

    /// Route one incoming message: a reply goes to the session waiting on
    /// its sender, anything else to [`Self::handle_message`].
    pub async fn dispatch(&self, from: PeerId, message: ReconMessage) -> Result<()> {
        let is_reply = matches!(
            message,
            ReconMessage::Response { .. } | ReconMessage::BankResponse { .. } | ReconMessage::Error { .. }
        );
        if is_reply {
            let waiter = self.pending.lock().await.remove(&from);
            if let Some(waiter) = waiter {
                if let Err(message) = waiter.send(message) {
                    tracing::debug!(peer = %from, message = message.name(), "reply arrived after its session gave up");
                }
                return Ok(());
            }
        }
        self.handle_message(from, message).await
    }

    /// Handle one unsolicited message as the responding side.
    ///
    /// Failures are reported back to the peer as an `Error` message.
    pub async fn handle_message(&self, from: PeerId, message: ReconMessage) -> Result<()> {
        let name = message.name();
        if let Err(e) = self.respond(from, message).await {
            tracing::warn!(peer = %from, message = name, error = %e, "failed to handle message");
            let reply = ReconMessage::Error {
                code: error_code(&e),
                message: e.to_string(),
            };
            if let Err(send) = self.transport.send(&from, reply).await {
                tracing::warn!(peer = %from, error = %send, "failed to report error");
            }
            self.sessions.lock().await.remove(&from);
        }
        Ok(())
    }

    async fn respond(&self, from: PeerId, message: ReconMessage) -> Result<()> {
        self.check_limits(&message)?;
        let name = message.name();
        match message {
            ReconMessage::Request { clock, sketch } => {
                self.record_clock(from, &clock).await;
                let reply = self.answer_request(&sketch).await?;
                self.transport.send(&from, reply).await
            }
            ReconMessage::Challenge { txs } => {
                self.absorb(&txs).await?;
                Ok(())
            }
            ReconMessage::BankRequest { round, clock, bank } => {
                self.record_clock(from, &clock).await;
                let reply = self.answer_round(from, round, &bank).await?;
                self.transport.send(&from, reply).await
            }
            ReconMessage::Fallback { round, txs } => {
                let open = self.sessions.lock().await.remove(&from);
                let mut session = open
                    .map(|open| open.session)
                    .ok_or(SyncError::InvalidState("no session awaiting a fallback"))?;
                if session.round() != round {
                    return Err(SyncError::RoundMismatch {
                        expected: session.round(),
                        actual: round,
                    });
                }
                let learned = session.absorb_fallback(&txs)?;
                self.absorb(&learned).await?;
                Ok(())
            }
            ReconMessage::Error { code, message } => {
                tracing::warn!(peer = %from, ?code, %message, "peer reported an error");
                self.sessions.lock().await.remove(&from);
                Ok(())
            }
            ReconMessage::Response { .. } | ReconMessage::BankResponse { .. } => {
                Err(SyncError::InvalidMessage(format!("unsolicited {}", name)))
            }
        }
    }

    async fn answer_request(&self, theirs: &CompactSketch) -> Result<ReconMessage> {
        let mut set = CompactReconciliationSet::new(theirs.kind, &self.config, theirs.seed)?;
        for item in self.store.all_items().await? {
            set.add_transaction(item);
        }
        let result = set.reconcile(theirs)?;
        self.absorb(&result.remote_only).await?;
        Ok(ReconMessage::Response {
            clock: self.compact_clock().await?,
            sketch: set.to_compact(),
            txs: result.local_only,
        })
    }

    async fn answer_round(&self, from: PeerId, round: u64, theirs: &BankDigest) -> Result<ReconMessage> {
        self.evict_stale_sessions().await;
        let mut sessions = self.sessions.lock().await;
        if round == 0 {
            let pair = PeerPair::new(self.local_peer_id(), from);
            let snapshot = self.store.all_items().await?;
            let session = ReconciliationSession::new(pair, snapshot, &self.config);
            sessions.insert(
                from,
                OpenSession {
                    session,
                    touched: Instant::now(),
                },
            );
        }
        let open = sessions
            .get_mut(&from)
            .ok_or(SyncError::InvalidState("no session for this round"))?;
        open.touched = Instant::now();
        let session = &mut open.session;
        if session.round() + 1 == round {
            session.advance()?;
        }
        session.mirror(round, theirs)?;
        let bank = session.digest()?;
        let outcome = session.decode(theirs)?;
        let txs = session.fallback_ids();

        if outcome.done && outcome.fallback.is_empty() {
            sessions.remove(&from);
        }
        drop(sessions);

        self.absorb(&outcome.new_remote).await?;
        Ok(ReconMessage::BankResponse {
            round,
            clock: self.compact_clock().await?,
            bank,
            txs,
        })
    }

    /// Send `message` to `peer` and wait for its reply.
    ///
    /// The reply may be read off the transport here or by a concurrent
    /// [`Self::serve_one`]; either way [`Self::dispatch`] delivers it.
    async fn request(&self, peer: &PeerId, message: ReconMessage) -> Result<ReconMessage> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(peer) {
                return Err(SyncError::SessionInFlight(*peer));
            }
            pending.insert(*peer, tx);
        }

        let reply = match self.transport.send(peer, message).await {
            Ok(()) => self.await_reply(peer, rx).await,
            Err(e) => Err(e),
        };
        if reply.is_err() {
            self.pending.lock().await.remove(peer);
        }

        let reply = reply?;
        self.check_limits(&reply)?;
        if let ReconMessage::Error { code, message } = reply {
            return Err(SyncError::PeerError { code, message });
        }
        Ok(reply)
    }

    /// Read and dispatch incoming messages until the reply lands in `rx`.
    async fn await_reply(&self, peer: &PeerId, rx: oneshot::Receiver<ReconMessage>) -> Result<ReconMessage> {
        tokio::time::timeout(self.sync.message_timeout, self.pump_until(rx))
            .await
            .map_err(|_| SyncError::Timeout(format!("waiting for {}", peer)))?
    }

    async fn pump_until(&self, mut rx: oneshot::Receiver<ReconMessage>) -> Result<ReconMessage> {
        loop {
            tokio::select! {
                reply = &mut rx => {
                    return reply.map_err(|_| SyncError::InvalidState("reply channel closed"));
                }
                received = self.transport.recv_timeout(self.sync.message_timeout) => {
                    if let Some((from, message)) = received? {
                        self.dispatch(from, message).await?;
                    }
                }
            }
        }
    }

    /// Tell `peer` this side gave up, unless the peer reported the failure
    /// or another session with it is still running.
    async fn abandon(&self, peer: &PeerId, error: &SyncError) {
        if matches!(error, SyncError::PeerError { .. } | SyncError::SessionInFlight(_)) {
            return;
        }
        let notice = ReconMessage::Error {
            code: error_code(error),
            message: error.to_string(),
        };
        if let Err(send) = self.transport.send(peer, notice).await {
            tracing::debug!(%peer, error = %send, "failed to report abandoned session");
        }
    }

    fn check_limits(&self, message: &ReconMessage) -> Result<()> {
        if self.sync.validate_limits {
            message
                .validate_limits(self.config.max_sections)
                .map_err(|reason| SyncError::InvalidMessage(reason.into()))?;
        }
        Ok(())
    }

    async fn compact_clock(&self) -> Result<CompactClock> {
        Ok(self.store.clock().await?.compact()?)
    }

    async fn record_clock(&self, peer: PeerId, clock: &CompactClock) {
        let clock = PeerClock::from_compact(clock);
        if let Err(e) = self.clocks.lock().await.update(peer, clock) {
            tracing::debug!(%peer, error = %e, "clock not recorded");
        }
    }

    /// Insert learned items, returning how many were new.
    async fn absorb(&self, items: &[ItemId]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let added = self.store.insert_all(items).await?;
        let mut sets = self.sets.lock().await;
        for &item in &added {
            sets.populate_tx(item);
        }
        Ok(added.len())
    }
}

fn unexpected(expected: &str, got: &ReconMessage) -> SyncError {
    SyncError::InvalidMessage(format!("expected {}, got {}", expected, got.name()))
}

fn error_code(error: &SyncError) -> ErrorCode {
    match error {
        SyncError::InvalidMessage(_) | SyncError::Encoding(_) => ErrorCode::InvalidMessage,
        SyncError::RoundMismatch { .. } | SyncError::InvalidState(_) => ErrorCode::RoundMismatch,
        SyncError::Sketch(_) => ErrorCode::ParameterMismatch,
        _ => ErrorCode::InternalError,
    }
}
