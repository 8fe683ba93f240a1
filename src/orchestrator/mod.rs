//! Session concurrency orchestration.
//!
//! Fans one request/response cycle per client out across parallel tasks
//! and joins them all before returning. Every client owns its session
//! pair exclusively inside its own task; the only shared resources are
//! the context's state store and cache key, which support concurrent
//! access from different clients. One client's failure is recorded in
//! its own outcome slot and never cancels the others.

use std::sync::Arc;

use rand::Rng;
use tokio::task::JoinSet;
use tracing::warn;
use uuid::Uuid;

use crate::core::{HandshakeError, SessionError, TransformFactory};
use crate::session::SessionManager;
use crate::transport::Transport;

/// Result slot for one client's round.
#[derive(Debug)]
pub struct ClientOutcome {
    /// The client this outcome belongs to.
    pub client_id: String,
    /// Trips completed before success or failure.
    pub completed: u32,
    /// Decoded reply for each completed trip, in order.
    pub replies: Vec<String>,
    /// The error that stopped this client, if any.
    pub error: Option<SessionError>,
}

impl ClientOutcome {
    /// Whether every trip completed.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs rounds of concurrent client cycles over a shared
/// [`SessionManager`].
pub struct Orchestrator<F: TransformFactory, T: Transport> {
    manager: Arc<SessionManager<F, T>>,
}

impl<F, T> Orchestrator<F, T>
where
    F: TransformFactory + 'static,
    T: Transport + 'static,
{
    /// Create an orchestrator over `manager`.
    pub fn new(manager: Arc<SessionManager<F, T>>) -> Self {
        Self { manager }
    }

    /// The shared session manager.
    pub fn manager(&self) -> &Arc<SessionManager<F, T>> {
        &self.manager
    }

    /// Create `count` clients with fresh identifiers and perform each
    /// one's initial handshake.
    pub async fn provision(&self, count: usize) -> Result<Vec<String>, HandshakeError> {
        let mut clients = Vec::with_capacity(count);
        for _ in 0..count {
            let client_id = Uuid::new_v4().to_string();
            self.manager.handshake(&client_id).await?;
            clients.push(client_id);
        }
        Ok(clients)
    }

    /// Run one round: every client performs a random number of trips
    /// (1..=`max_trips`), all clients concurrently.
    pub async fn run_round(&self, clients: &[String], max_trips: u32) -> Vec<ClientOutcome> {
        let max_trips = max_trips.max(1);
        let plan: Vec<(String, u32)> = clients
            .iter()
            .map(|id| (id.clone(), rand::thread_rng().gen_range(1..=max_trips)))
            .collect();
        self.run_cycles(plan).await
    }

    /// Run one round with an explicit per-client trip count, returning
    /// outcomes in plan order once every client has finished.
    pub async fn run_cycles(&self, plan: Vec<(String, u32)>) -> Vec<ClientOutcome> {
        let mut tasks = JoinSet::new();
        let ids: Vec<String> = plan.iter().map(|(id, _)| id.clone()).collect();

        for (index, (client_id, trips)) in plan.into_iter().enumerate() {
            let manager = Arc::clone(&self.manager);
            tasks.spawn(async move {
                let mut outcome = ClientOutcome {
                    client_id: client_id.clone(),
                    completed: 0,
                    replies: Vec::with_capacity(trips as usize),
                    error: None,
                };
                for trip in 1..=trips {
                    let message = trip_message(&client_id, trip);
                    match manager.exchange(&client_id, &message).await {
                        Ok(reply) => {
                            outcome.replies.push(reply);
                            outcome.completed = trip;
                        }
                        Err(error) => {
                            outcome.error = Some(error);
                            break;
                        }
                    }
                }
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<ClientOutcome>> = ids.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(error) => warn!(%error, "round worker did not run to completion"),
            }
        }

        outcomes
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| ClientOutcome {
                    client_id: ids[index].clone(),
                    completed: 0,
                    replies: Vec::new(),
                    error: Some(SessionError::Task("worker panicked".to_string())),
                })
            })
            .collect()
    }
}

/// The message a client sends on a given trip.
pub fn trip_message(client_id: &str, trip: u32) -> String {
    format!("Hello from client {client_id} for trip {trip}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineFactory;
    use crate::transport::echo::EchoTransport;

    fn orchestrator() -> Orchestrator<EngineFactory, EchoTransport<EngineFactory>> {
        let factory = EngineFactory::default();
        let transport = EchoTransport::new(factory.clone());
        Orchestrator::new(Arc::new(SessionManager::new(factory, transport)))
    }

    #[tokio::test]
    async fn test_provision_assigns_unique_ids() {
        let orchestrator = orchestrator();
        let clients = orchestrator.provision(3).await.unwrap();

        assert_eq!(clients.len(), 3);
        assert_ne!(clients[0], clients[1]);
        assert_ne!(clients[1], clients[2]);
    }

    #[tokio::test]
    async fn test_concurrent_round_echoes_every_trip() {
        let orchestrator = orchestrator();
        let clients = orchestrator.provision(4).await.unwrap();

        let plan: Vec<(String, u32)> = clients.iter().map(|id| (id.clone(), 3)).collect();
        let outcomes = orchestrator.run_cycles(plan).await;

        assert_eq!(outcomes.len(), 4);
        for outcome in &outcomes {
            assert!(outcome.is_success(), "client {} failed", outcome.client_id);
            assert_eq!(outcome.completed, 3);
            for (i, reply) in outcome.replies.iter().enumerate() {
                assert_eq!(*reply, trip_message(&outcome.client_id, i as u32 + 1));
            }
        }
    }

    #[tokio::test]
    async fn test_randomized_round_stays_in_bounds() {
        let orchestrator = orchestrator();
        let clients = orchestrator.provision(2).await.unwrap();

        let outcomes = orchestrator.run_round(&clients, 5).await;
        for outcome in &outcomes {
            assert!(outcome.is_success());
            assert!((1..=5).contains(&outcome.completed));
        }
    }

    #[tokio::test]
    async fn test_outcomes_follow_plan_order() {
        let orchestrator = orchestrator();
        let clients = orchestrator.provision(3).await.unwrap();

        let plan: Vec<(String, u32)> = clients.iter().map(|id| (id.clone(), 1)).collect();
        let outcomes = orchestrator.run_cycles(plan).await;

        for (client_id, outcome) in clients.iter().zip(&outcomes) {
            assert_eq!(client_id, &outcome.client_id);
        }
    }
}
