//! Session Registry - höchstens eine CallSession pro Session-Id
//!
//! Alle Sessions eines Endpunkts teilen sich Transport, Capture und
//! Connection-Factory. Da die Capture exklusiv ist, kann immer nur eine
//! Session gleichzeitig einen Anruf mit Media führen.

use super::connection::PeerConnectionFactory;
use super::session::{CallError, CallSession};
use crate::capture::CaptureManager;
use crate::config::CallConfig;
use crate::signaling::{ParticipantId, SessionId, SignalingTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SessionRegistry {
    local_id: ParticipantId,
    transport: Arc<dyn SignalingTransport>,
    capture: CaptureManager,
    factory: Arc<dyn PeerConnectionFactory>,
    config: CallConfig,
    sessions: Mutex<HashMap<SessionId, Arc<CallSession>>>,
}

impl SessionRegistry {
    pub fn new(
        local_id: ParticipantId,
        transport: Arc<dyn SignalingTransport>,
        capture: CaptureManager,
        factory: Arc<dyn PeerConnectionFactory>,
        config: CallConfig,
    ) -> Self {
        Self {
            local_id,
            transport,
            capture,
            factory,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn capture(&self) -> &CaptureManager {
        &self.capture
    }

    /// Bestehende Session oder neu beitreten
    pub async fn join(&self, session_id: impl Into<SessionId>) -> Result<Arc<CallSession>, CallError> {
        let session_id = session_id.into();
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&session_id) {
            return Ok(Arc::clone(session));
        }

        let session = Arc::new(
            CallSession::join(
                session_id.clone(),
                self.local_id.clone(),
                Arc::clone(&self.transport),
                self.capture.clone(),
                Arc::clone(&self.factory),
                self.config.clone(),
            )
            .await?,
        );
        sessions.insert(session_id, Arc::clone(&session));
        Ok(session)
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<Arc<CallSession>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Session mit laufendem oder wartendem Anruf
    pub async fn active_session(&self) -> Option<Arc<CallSession>> {
        self.sessions
            .lock()
            .await
            .values()
            .find(|s| !s.state().is_idle())
            .cloned()
    }

    /// Verlässt eine Session; `false` wenn sie nicht bekannt war
    pub async fn leave(&self, session_id: &SessionId) -> bool {
        let session = self.sessions.lock().await.remove(session_id);
        match session {
            Some(session) => {
                session.leave().await;
                true
            }
            None => false,
        }
    }

    pub async fn leave_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.leave().await;
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("local_id", &self.local_id)
            .field("capture", &self.capture)
            .finish()
    }
}
