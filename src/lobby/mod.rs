//! Lobby - routes connecting peers into sessions
//!
//! Pairing policy is first-two-joiners: a peer takes the free seat in the
//! oldest open session, or a fresh session is spun up for them. Occupancy is
//! capped here, before a join ever reaches the session core.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::{GameSession, PeerEvent, SessionRegistry};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Lobby service
pub struct LobbyService {
    registry: Arc<SessionRegistry>,
}

impl LobbyService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Seat a peer in a session with a free slot, creating a session when
    /// none is open. Returns the session's input channel and a subscription
    /// to its replication stream.
    pub async fn join_or_create(
        &self,
        peer_id: Uuid,
        display_name: &str,
    ) -> (mpsc::Sender<PeerEvent>, broadcast::Receiver<ServerMsg>) {
        loop {
            let handle = match self.registry.find_available_session() {
                // Reserve before routing so two peers cannot race into the
                // same last seat
                Some(handle) if handle.try_reserve_seat() => handle,
                Some(_) => continue,
                None => self.spawn_session(),
            };

            // Subscribe before the join is queued so the forced first-state
            // snapshot cannot be missed
            let snapshot_rx = handle.snapshot_tx.subscribe();

            let join = PeerEvent {
                peer_id,
                msg: ClientMsg::Join {
                    name: display_name.to_string(),
                },
            };

            if handle.input_tx.send(join).await.is_err() {
                // Session ended between lookup and join; look again
                warn!(
                    session_id = %handle.id,
                    peer_id = %peer_id,
                    "Session closed before join, retrying"
                );
                continue;
            }

            info!(
                session_id = %handle.id,
                peer_id = %peer_id,
                "Peer routed to session"
            );

            return (handle.input_tx.clone(), snapshot_rx);
        }
    }

    /// Create a session, register it, and spawn its tick loop. The first
    /// seat is reserved for the caller.
    fn spawn_session(&self) -> crate::game::SessionHandle {
        let session_id = Uuid::new_v4();
        let seed = rand::random::<u64>();
        let (session, handle) = GameSession::new(session_id, seed);

        handle.try_reserve_seat();
        self.registry.insert(handle.clone());

        let registry = self.registry.clone();
        tokio::spawn(async move {
            session.run().await;
            registry.remove(&session_id);
            info!(session_id = %session_id, "Session removed from registry");
        });

        info!(session_id = %session_id, "Created new session");
        handle
    }
}
