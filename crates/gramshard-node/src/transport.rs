//! Transport seam between cluster endpoints.
//!
//! The core never manages connection lifecycle or wire framing; it sends
//! envelopes to endpoint ids and consumes an inbound delivery stream. The
//! [`LoopbackNetwork`] implementation wires endpoints of one process
//! together over unbounded channels - what tests and single-process
//! clusters run on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use gramshard_common::{EndpointId, Result, ShardError};
use gramshard_messages::Envelope;

/// Outbound half of the transport collaborator.
pub trait Transport: Send + Sync {
    /// Endpoint id messages from this transport originate from.
    fn local_endpoint(&self) -> EndpointId;

    /// Deliver an envelope to another endpoint.
    fn send(&self, dest: EndpointId, envelope: Envelope) -> Result<()>;
}

/// In-process endpoint registry delivering over unbounded channels.
///
/// Delivery preserves per-sender order and is exactly-once, which is more
/// than the protocol requires of a real transport.
pub struct LoopbackNetwork {
    endpoints: Mutex<HashMap<EndpointId, mpsc::UnboundedSender<Envelope>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    /// Register an endpoint, returning its outbound handle and inbound
    /// delivery stream. Re-attaching an id replaces the previous stream.
    pub fn attach(
        self: &Arc<Self>,
        id: EndpointId,
    ) -> (Arc<LocalEndpoint>, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints
            .lock()
            .expect("endpoint registry poisoned")
            .insert(id, tx);
        (
            Arc::new(LocalEndpoint {
                id,
                network: Arc::clone(self),
            }),
            rx,
        )
    }

    fn deliver(&self, dest: EndpointId, envelope: Envelope) -> Result<()> {
        let endpoints = self.endpoints.lock().expect("endpoint registry poisoned");
        let sender = endpoints
            .get(&dest)
            .ok_or_else(|| ShardError::Transport(format!("unknown endpoint {dest}")))?;
        sender
            .send(envelope)
            .map_err(|_| ShardError::Transport(format!("endpoint {dest} is closed")))
    }
}

/// One endpoint's outbound handle into a [`LoopbackNetwork`].
pub struct LocalEndpoint {
    id: EndpointId,
    network: Arc<LoopbackNetwork>,
}

impl Transport for LocalEndpoint {
    fn local_endpoint(&self) -> EndpointId {
        self.id
    }

    fn send(&self, dest: EndpointId, envelope: Envelope) -> Result<()> {
        self.network.deliver(dest, envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gramshard_common::StepId;
    use gramshard_messages::{Ack, Payload, Target, TrainingOutcome};

    fn ack_envelope(origin: EndpointId) -> Envelope {
        Envelope::new(
            origin,
            Target::None,
            Payload::Ack(Ack {
                step: StepId::new(),
                outcome: TrainingOutcome::Applied,
            }),
        )
    }

    #[tokio::test]
    async fn delivers_between_endpoints() {
        let net = LoopbackNetwork::new();
        let (a, _rx_a) = net.attach(0);
        let (_b, mut rx_b) = net.attach(1);
        let env = ack_envelope(0);
        a.send(1, env.clone()).unwrap();
        let got = rx_b.recv().await.unwrap();
        assert_eq!(got, env);
    }

    #[tokio::test]
    async fn preserves_per_sender_order() {
        let net = LoopbackNetwork::new();
        let (a, _rx_a) = net.attach(0);
        let (_b, mut rx_b) = net.attach(1);
        let first = ack_envelope(0);
        let second = ack_envelope(0);
        a.send(1, first.clone()).unwrap();
        a.send(1, second.clone()).unwrap();
        assert_eq!(rx_b.recv().await.unwrap().id, first.id);
        assert_eq!(rx_b.recv().await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn unknown_endpoint_is_transport_error() {
        let net = LoopbackNetwork::new();
        let (a, _rx_a) = net.attach(0);
        let err = a.send(9, ack_envelope(0)).unwrap_err();
        assert!(matches!(err, ShardError::Transport(_)));
    }
}
