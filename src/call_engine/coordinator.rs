//! Connection Coordinator
//!
//! Ein Actor pro Session. Signale, Benutzeraktionen und Callbacks der
//! Verbindung werden nacheinander in einer Schleife verarbeitet, es gibt
//! keine gleichzeitigen Zugriffe auf den Call-Zustand.
//!
//! Capture und Offer/Answer-Erzeugung laufen in eigenen Tasks. Ihr Ergebnis
//! kommt als [`Internal::Prepared`] zurück und trägt die Generation des
//! Anrufversuchs. Jeder beendete Versuch erhöht die Generation; Ergebnisse
//! und Events älterer Generationen werden verworfen und ihre Ressourcen
//! freigegeben.
//!
//! Endet ein Anruf während sein Setup noch läuft, wird der Task abgebrochen
//! und alles, was er bis dahin belegt hat, noch im selben Schritt
//! freigegeben.

use super::connection::{
    ConnectionEvent, ConnectionEvents, NegotiationError, PeerConnection, PeerConnectionFactory,
};
use super::session::CallError;
use super::state::{CallEvent, CallSnapshot, CallState, EndReason, IncomingCallInfo};
use crate::capture::{CaptureManager, DeviceError, LocalMedia, RemoteMedia};
use crate::config::{CallConfig, CollisionPolicy};
use crate::signaling::{
    IceCandidate, ParticipantId, SdpType, SessionDescription, SessionId, Signal, SignalMessage,
    SignalingTransport, Subscription,
};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Benutzeraktionen aus der [`CallSession`](super::CallSession)
#[derive(Debug)]
pub(crate) enum Command {
    Start(Reply<Result<(), CallError>>),
    Accept(Reply<Result<(), CallError>>),
    Decline(Reply<()>),
    End(Reply<()>),
    /// Antwortet, sobald alle bis dahin zugestellten Signale verarbeitet sind
    Flush(Reply<()>),
    Leave(Reply<()>),
}

enum Internal {
    Prepared {
        generation: u64,
        outcome: Result<Prepared, SetupError>,
    },
    Connection {
        generation: u64,
        event: ConnectionEvent,
    },
    RingTimeout {
        generation: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Offerer,
    Answerer,
}

/// Alles, was ein Coordinator von seiner Session braucht
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub session_id: SessionId,
    pub local_id: ParticipantId,
    pub config: CallConfig,
    pub transport: Arc<dyn SignalingTransport>,
    pub capture: CaptureManager,
    pub factory: Arc<dyn PeerConnectionFactory>,
}

impl SessionContext {
    pub fn channel(&self) -> String {
        self.session_id.channel_name(&self.config.channel_prefix)
    }
}

// ============================================================================
// CALL SETUP (läuft außerhalb des Actors)
// ============================================================================

struct Prepared {
    media: LocalMedia,
    connection: Arc<dyn PeerConnection>,
    description: SessionDescription,
}

enum SetupError {
    Device(DeviceError),
    Negotiation(NegotiationError),
    /// Der Versuch wurde während des Setups beendet, alles ist schon freigegeben
    Superseded,
}

impl From<NegotiationError> for SetupError {
    fn from(e: NegotiationError) -> Self {
        SetupError::Negotiation(e)
    }
}

/// Was ein laufendes Setup bereits belegt hat
#[derive(Default)]
struct Claimed {
    media: Option<LocalMedia>,
    connection: Option<Arc<dyn PeerConnection>>,
}

/// Laufendes Setup eines Anrufversuchs
struct SetupAttempt {
    task: JoinHandle<()>,
    claimed: Arc<Mutex<Claimed>>,
    reply: Option<Reply<Result<(), CallError>>>,
}

struct CallSetup {
    generation: u64,
    current: Arc<AtomicU64>,
    capture: CaptureManager,
    factory: Arc<dyn PeerConnectionFactory>,
    events: ConnectionEvents,
    claimed: Arc<Mutex<Claimed>>,
}

impl CallSetup {
    fn check(&self) -> Result<(), SetupError> {
        if self.current.load(Ordering::Acquire) == self.generation {
            Ok(())
        } else {
            Err(SetupError::Superseded)
        }
    }

    /// Capture holen (falls nicht mitgegeben), Verbindung bauen, Offer oder
    /// Answer erzeugen. Bei jedem Fehler wird alles wieder freigegeben.
    async fn run(
        &self,
        remote_offer: Option<SessionDescription>,
        media: Option<LocalMedia>,
    ) -> Result<Prepared, SetupError> {
        let media = match media {
            Some(media) => media,
            None => {
                let media = self.capture.acquire().await.map_err(SetupError::Device)?;
                self.claimed.lock().media = Some(media.clone());
                media
            }
        };
        if let Err(e) = self.check() {
            self.capture.release(&media);
            return Err(e);
        }

        let connection = match self.factory.create(self.events.clone()).await {
            Ok(connection) => {
                self.claimed.lock().connection = Some(Arc::clone(&connection));
                connection
            }
            Err(e) => {
                self.capture.release(&media);
                return Err(e.into());
            }
        };

        match self.negotiate(connection.as_ref(), &media, remote_offer).await {
            Ok(description) => Ok(Prepared {
                media,
                connection,
                description,
            }),
            Err(e) => {
                connection.close().await;
                self.capture.release(&media);
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        connection: &dyn PeerConnection,
        media: &LocalMedia,
        remote_offer: Option<SessionDescription>,
    ) -> Result<SessionDescription, SetupError> {
        if let Some(offer) = &remote_offer {
            connection.set_remote_description(offer).await?;
        }
        for track in media.tracks() {
            connection.add_track(track).await?;
        }
        self.check()?;

        let description = match remote_offer {
            Some(_) => connection.create_answer().await?,
            None => connection.create_offer().await?,
        };
        connection.set_local_description(&description).await?;
        self.check()?;

        Ok(description)
    }
}

// ============================================================================
// PER-CALL STATE
// ============================================================================

/// Zustand eines Anrufversuchs; wird beim Beenden komplett verworfen
#[derive(Default)]
struct ActiveCall {
    state: CallState,
    role: Option<Role>,
    peer_id: Option<ParticipantId>,
    pending_offer: Option<SessionDescription>,
    incoming: Option<IncomingCallInfo>,
    /// Offer der Gegenseite, das nach dem eigenen Setup beantwortet wird
    collision_offer: Option<SessionDescription>,
    setup: Option<SetupAttempt>,
    connection: Option<Arc<dyn PeerConnection>>,
    media: Option<LocalMedia>,
    remote_media: Option<RemoteMedia>,
    local_published: bool,
    remote_applied: bool,
    local_candidates: Vec<IceCandidate>,
    remote_candidates: VecDeque<IceCandidate>,
}

// ============================================================================
// COORDINATOR
// ============================================================================

pub(crate) struct Coordinator {
    ctx: SessionContext,
    channel: String,
    subscription: Option<Subscription>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    snapshot: Arc<RwLock<CallSnapshot>>,
    events: broadcast::Sender<CallEvent>,
    generation: Arc<AtomicU64>,
    last_end_reason: Option<EndReason>,
    call: ActiveCall,
}

impl Coordinator {
    pub fn new(
        ctx: SessionContext,
        subscription: Subscription,
        commands: mpsc::UnboundedReceiver<Command>,
        snapshot: Arc<RwLock<CallSnapshot>>,
        events: broadcast::Sender<CallEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            channel: ctx.channel(),
            ctx,
            subscription: Some(subscription),
            commands,
            internal_tx,
            internal_rx,
            snapshot,
            events,
            generation: Arc::new(AtomicU64::new(0)),
            last_end_reason: None,
            call: ActiveCall::default(),
        }
    }

    pub async fn run(mut self) {
        tracing::debug!("Coordinator for {} running", self.channel);

        loop {
            tokio::select! {
                biased;

                signal = next_signal(&mut self.subscription) => match signal {
                    Some(message) => self.on_signal(message).await,
                    None => {
                        tracing::warn!("Signaling channel {} closed by transport", self.channel);
                        self.subscription = None;
                    }
                },

                Some(internal) = self.internal_rx.recv() => self.on_internal(internal).await,

                command = self.commands.recv() => match command {
                    Some(Command::Leave(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if !self.call.state.is_idle() {
            self.finish_call(EndReason::LocalHangup, true).await;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        // Droppen meldet das Abo beim Transport ab
        self.subscription = None;
        tracing::info!("Left session {}", self.ctx.session_id);
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                if !self.call.state.is_idle() {
                    let _ = reply.send(Err(CallError::InvalidState(self.call.state)));
                    return;
                }
                tracing::info!("Starting call on session {}", self.ctx.session_id);
                self.call.role = Some(Role::Offerer);
                self.set_state(CallState::OutgoingPending);
                self.spawn_setup(None, None, Some(reply));
            }
            Command::Accept(reply) => {
                let offer = match self.call.state {
                    CallState::IncomingPending => self.call.pending_offer.take(),
                    _ => None,
                };
                let Some(offer) = offer else {
                    tracing::debug!("Accept without pending call, ignoring");
                    let _ = reply.send(Ok(()));
                    return;
                };
                tracing::info!("Accepting call from {:?}", self.call.peer_id);
                self.call.role = Some(Role::Answerer);
                self.spawn_setup(Some(offer), None, Some(reply));
            }
            Command::Decline(reply) => {
                if !self.call.state.is_idle() {
                    let reason = if self.call.state == CallState::IncomingPending {
                        EndReason::Declined
                    } else {
                        EndReason::LocalHangup
                    };
                    self.finish_call(reason, true).await;
                }
                let _ = reply.send(());
            }
            Command::End(reply) => {
                if !self.call.state.is_idle() {
                    self.finish_call(EndReason::LocalHangup, true).await;
                }
                let _ = reply.send(());
            }
            Command::Flush(reply) => {
                let _ = reply.send(());
            }
            Command::Leave(reply) => {
                // wird in `run` behandelt
                let _ = reply.send(());
            }
        }
    }

    // ========================================================================
    // SIGNALS
    // ========================================================================

    async fn on_signal(&mut self, message: SignalMessage) {
        if message.is_from(&self.ctx.local_id) {
            tracing::trace!("Ignoring own {:?}", message.signal.kind());
            return;
        }

        let SignalMessage { signal, sender_id } = message;
        match signal {
            Signal::Offer(offer) => self.on_offer(offer, sender_id).await,
            Signal::Answer(answer) => self.on_answer(answer, sender_id).await,
            Signal::IceCandidate(candidate) => self.on_remote_candidate(candidate).await,
            Signal::EndCall => self.on_end_call(sender_id).await,
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription, sender: ParticipantId) {
        if offer.sdp_type != SdpType::Offer {
            tracing::warn!("Offer from {} carries an {:?} description", sender, offer.sdp_type);
            return;
        }

        match self.call.state {
            CallState::Idle => {
                let info = IncomingCallInfo {
                    session_id: self.ctx.session_id.clone(),
                    caller_id: sender.clone(),
                    received_at: chrono::Utc::now(),
                };
                tracing::info!("Incoming call from {} on session {}", sender, self.ctx.session_id);

                self.call.pending_offer = Some(offer);
                self.call.peer_id = Some(sender);
                self.call.incoming = Some(info.clone());
                self.set_state(CallState::IncomingPending);
                self.emit(CallEvent::IncomingCall(info));
            }
            CallState::OutgoingPending if self.wins_collision(&sender) => {
                self.resolve_collision(offer, sender).await;
            }
            state => {
                tracing::debug!("Dropping offer from {} while {:?}", sender, state);
            }
        }
    }

    /// Bei gleichzeitigem Anruf gewinnt das Offer der kleineren Participant-Id
    fn wins_collision(&self, sender: &ParticipantId) -> bool {
        self.ctx.config.collision_policy == CollisionPolicy::IdentityOrdered
            && self.call.role == Some(Role::Offerer)
            && sender < &self.ctx.local_id
    }

    async fn resolve_collision(&mut self, offer: SessionDescription, sender: ParticipantId) {
        tracing::info!("Call collision with {}, answering their offer", sender);
        self.call.peer_id = Some(sender);
        self.call.role = Some(Role::Answerer);

        if self.call.setup.is_some() {
            self.call.collision_offer = Some(offer);
        } else {
            self.answer_with_own_media(offer).await;
        }
    }

    /// Verwirft die eigene Verbindung, behält die Capture und beantwortet `offer`
    async fn answer_with_own_media(&mut self, offer: SessionDescription) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(connection) = self.call.connection.take() {
            connection.close().await;
        }
        self.call.local_published = false;
        self.call.remote_applied = false;
        self.call.local_candidates.clear();

        let media = self.call.media.clone();
        self.spawn_setup(Some(offer), media, None);
    }

    async fn on_answer(&mut self, answer: SessionDescription, sender: ParticipantId) {
        if self.call.state != CallState::OutgoingPending || self.call.role != Some(Role::Offerer) {
            tracing::debug!("Dropping answer from {} while {:?}", sender, self.call.state);
            return;
        }
        let Some(connection) = self.call.connection.clone() else {
            tracing::debug!("Dropping answer from {}: no offer sent yet", sender);
            return;
        };
        if !connection.expects_answer() {
            tracing::debug!(
                "Dropping stale answer from {} in {:?}",
                sender,
                connection.negotiation_state()
            );
            return;
        }

        match connection.set_remote_description(&answer).await {
            Ok(()) => {
                tracing::info!("Call answered by {}", sender);
                self.call.remote_applied = true;
                self.call.peer_id = Some(sender);
                self.flush_remote_candidates(connection.as_ref()).await;
                self.set_state(CallState::Active);
            }
            Err(e) => tracing::warn!("Rejected answer from {}: {}", sender, e),
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        match self.call.connection.clone() {
            Some(connection) if self.call.remote_applied => {
                if let Err(e) = connection.add_ice_candidate(&candidate).await {
                    tracing::warn!("Ignoring remote ICE candidate: {}", e);
                }
            }
            _ => {
                let limit = self.ctx.config.candidate_buffer_limit;
                if limit == 0 {
                    return;
                }
                if self.call.remote_candidates.len() >= limit {
                    tracing::warn!("Candidate buffer full ({}), dropping oldest", limit);
                    self.call.remote_candidates.pop_front();
                }
                self.call.remote_candidates.push_back(candidate);
            }
        }
    }

    async fn on_end_call(&mut self, sender: ParticipantId) {
        if self.call.state.is_idle() {
            self.call.remote_candidates.clear();
            tracing::debug!("End-call from {} while idle", sender);
            return;
        }
        tracing::info!("Call ended by {}", sender);
        self.finish_call(EndReason::RemoteHangup, false).await;
    }

    // ========================================================================
    // INTERNAL EVENTS
    // ========================================================================

    async fn on_internal(&mut self, internal: Internal) {
        let current = self.generation.load(Ordering::Acquire);
        match internal {
            Internal::Prepared {
                generation,
                outcome,
            } if generation == current => {
                let reply = self.call.setup.take().and_then(|attempt| attempt.reply);
                let result = self.on_prepared(outcome).await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Internal::Prepared { outcome, .. } => self.discard_prepared(outcome).await,
            Internal::Connection { generation, event } if generation == current => {
                self.on_connection_event(event).await;
            }
            Internal::Connection { event, .. } => {
                tracing::trace!("Dropping event of a previous call: {:?}", event);
            }
            Internal::RingTimeout { generation } => {
                if generation == current && self.call.state == CallState::OutgoingPending {
                    tracing::info!("No answer on session {}, giving up", self.ctx.session_id);
                    self.finish_call(EndReason::NoAnswer, true).await;
                }
            }
        }
    }

    /// Ergebnis eines abgebrochenen Versuchs; der Aufrufer hat seine Antwort
    /// schon beim Beenden bekommen
    async fn discard_prepared(&mut self, outcome: Result<Prepared, SetupError>) {
        if let Ok(prepared) = outcome {
            tracing::debug!("Releasing resources of an abandoned call attempt");
            prepared.connection.close().await;
            self.ctx.capture.release(&prepared.media);
        }
    }

    async fn on_prepared(&mut self, outcome: Result<Prepared, SetupError>) -> Result<(), CallError> {
        let notify_peer = self.call.role == Some(Role::Answerer);

        let prepared = match outcome {
            Ok(prepared) => prepared,
            Err(SetupError::Device(e)) => {
                tracing::warn!("Call setup failed: {}", e);
                self.finish_call(EndReason::SetupFailed, notify_peer).await;
                return Err(e.into());
            }
            Err(SetupError::Negotiation(e)) => {
                tracing::warn!("Call negotiation failed: {}", e);
                self.finish_call(EndReason::SetupFailed, notify_peer).await;
                return Ok(());
            }
            Err(SetupError::Superseded) => return Ok(()),
        };

        let Prepared {
            media,
            connection,
            description,
        } = prepared;
        self.call.media = Some(media);
        self.call.connection = Some(Arc::clone(&connection));

        if let Some(offer) = self.call.collision_offer.take() {
            // Eigenes Offer ist nie rausgegangen
            self.sync_snapshot();
            self.answer_with_own_media(offer).await;
            return Ok(());
        }

        match description.sdp_type {
            SdpType::Offer => {
                self.send(Signal::Offer(description)).await;
                self.call.local_published = true;
                self.flush_local_candidates().await;
                self.start_ring_timer();
                self.sync_snapshot();
            }
            SdpType::Answer => {
                self.call.remote_applied = true;
                self.call.pending_offer = None;
                self.call.incoming = None;
                self.send(Signal::Answer(description)).await;
                self.call.local_published = true;
                self.flush_local_candidates().await;
                self.flush_remote_candidates(connection.as_ref()).await;
                self.set_state(CallState::Active);
            }
        }
        Ok(())
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::TrackAdded(track) => {
                let remote = self.call.remote_media.get_or_insert_with(RemoteMedia::default);
                if remote.add(track.clone()) {
                    tracing::info!("Remote {:?} track {} added", track.kind, track.id);
                    self.sync_snapshot();
                    self.emit(CallEvent::RemoteTrackAdded(track));
                }
            }
            ConnectionEvent::CandidateDiscovered(candidate) => {
                if self.call.local_published {
                    self.send(Signal::IceCandidate(candidate)).await;
                } else {
                    self.call.local_candidates.push(candidate);
                }
            }
            ConnectionEvent::ConnectivityChanged(state) => {
                self.emit(CallEvent::ConnectivityChanged(state));
                if state.is_lost() && !self.call.state.is_idle() {
                    tracing::warn!("Connection {:?}, ending call", state);
                    self.finish_call(EndReason::ConnectivityLost, true).await;
                }
            }
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn spawn_setup(
        &mut self,
        remote_offer: Option<SessionDescription>,
        media: Option<LocalMedia>,
        reply: Option<Reply<Result<(), CallError>>>,
    ) {
        let generation = self.generation.load(Ordering::Acquire);
        let claimed = Arc::new(Mutex::new(Claimed::default()));
        let setup = CallSetup {
            generation,
            current: Arc::clone(&self.generation),
            capture: self.ctx.capture.clone(),
            factory: Arc::clone(&self.ctx.factory),
            events: self.connection_events(generation),
            claimed: Arc::clone(&claimed),
        };
        let internal = self.internal_tx.clone();

        let task = tokio::spawn(async move {
            let outcome = setup.run(remote_offer, media).await;
            let message = Internal::Prepared {
                generation,
                outcome,
            };
            if let Err(mpsc::error::SendError(Internal::Prepared {
                outcome: Ok(prepared),
                ..
            })) = internal.send(message)
            {
                // Session ist schon weg
                prepared.connection.close().await;
                setup.capture.release(&prepared.media);
            }
        });

        self.call.setup = Some(SetupAttempt {
            task,
            claimed,
            reply,
        });
    }

    /// Bricht ein laufendes Setup ab und gibt frei, was es schon belegt hat
    async fn cancel_setup(&self, attempt: SetupAttempt) {
        let SetupAttempt {
            task,
            claimed,
            reply,
        } = attempt;

        task.abort();
        match task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => tracing::debug!("Call setup cancelled"),
            Err(e) => tracing::warn!("Call setup task failed: {}", e),
        }

        let claimed = std::mem::take(&mut *claimed.lock());
        if let Some(connection) = claimed.connection {
            connection.close().await;
        }
        if let Some(media) = claimed.media {
            self.ctx.capture.release(&media);
        }
        if let Some(reply) = reply {
            let _ = reply.send(Ok(()));
        }
    }

    /// Events der Verbindung mit der Generation markiert an den Actor weiterleiten
    fn connection_events(&self, generation: u64) -> ConnectionEvents {
        let (tx, mut rx) = mpsc::unbounded_channel::<ConnectionEvent>();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if internal.send(Internal::Connection { generation, event }).is_err() {
                    break;
                }
            }
        });
        tx
    }

    fn start_ring_timer(&self) {
        let Some(timeout) = self.ctx.config.ring_timeout() else {
            return;
        };
        let generation = self.generation.load(Ordering::Acquire);
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = internal.send(Internal::RingTimeout { generation });
        });
    }

    async fn flush_local_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.call.local_candidates) {
            self.send(Signal::IceCandidate(candidate)).await;
        }
    }

    async fn flush_remote_candidates(&mut self, connection: &dyn PeerConnection) {
        let buffered = std::mem::take(&mut self.call.remote_candidates);
        if !buffered.is_empty() {
            tracing::debug!("Applying {} buffered remote candidate(s)", buffered.len());
        }
        for candidate in buffered {
            if let Err(e) = connection.add_ice_candidate(&candidate).await {
                tracing::warn!("Ignoring buffered ICE candidate: {}", e);
            }
        }
    }

    /// Beendet den Anruf: End-Call senden (optional), Verbindung schließen,
    /// Capture freigeben, `Ended` und sofort zurück auf `Idle`.
    async fn finish_call(&mut self, reason: EndReason, notify_peer: bool) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if notify_peer {
            self.send(Signal::EndCall).await;
        }

        let call = std::mem::take(&mut self.call);
        if let Some(attempt) = call.setup {
            self.cancel_setup(attempt).await;
        }
        if let Some(connection) = call.connection {
            connection.close().await;
        }
        if let Some(media) = call.media {
            self.ctx.capture.release(&media);
        }

        self.last_end_reason = Some(reason);
        self.set_state(CallState::Ended);
        self.set_state(CallState::Idle);
        self.emit(CallEvent::CallEnded { reason });
        tracing::info!("Call on session {} ended: {:?}", self.ctx.session_id, reason);
    }

    async fn send(&self, signal: Signal) {
        let kind = signal.kind();
        let message = SignalMessage::new(signal, self.ctx.local_id.clone());
        match self.ctx.transport.publish(&self.channel, &message).await {
            Ok(()) => tracing::debug!("Sent {:?} on {}", kind, self.channel),
            Err(e) => tracing::warn!("Failed to send {:?} on {}: {}", kind, self.channel, e),
        }
    }

    fn set_state(&mut self, state: CallState) {
        self.call.state = state;
        self.sync_snapshot();
        tracing::debug!("Call state: {:?}", state);
        self.emit(CallEvent::StateChanged(state));
    }

    fn sync_snapshot(&self) {
        let mut snapshot = self.snapshot.write();
        snapshot.state = self.call.state;
        snapshot.local_media = self.call.media.clone();
        snapshot.remote_media = self.call.remote_media.clone();
        snapshot.incoming_call = self.call.incoming.clone();
        snapshot.peer_id = self.call.peer_id.clone();
        snapshot.last_end_reason = self.last_end_reason;
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }
}

async fn next_signal(subscription: &mut Option<Subscription>) -> Option<SignalMessage> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
