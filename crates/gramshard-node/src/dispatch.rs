//! Kind-to-driver dispatch.
//!
//! Each shard resolves its driver table once at startup: message kind →
//! driver instance, every driver constructed with its collaborators
//! injected explicitly. No ambient lookup, no runtime type casts - the
//! payload enum is the contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use gramshard_common::{MessageKind, Result, ShardError};
use gramshard_messages::{Envelope, Payload};

use crate::row_locks::{RowGuard, RowKey};

/// One training algorithm hosted by a shard.
#[async_trait]
pub trait TrainingDriver: Send + Sync {
    /// The message kind this driver consumes.
    fn kind(&self) -> MessageKind;

    /// Local rows a step of this payload touches. Claimed by the node in
    /// dispatch order, before the step is spawned.
    fn rows_to_lock(&self, payload: &Payload) -> Result<Vec<RowKey>>;

    /// Execute one training step with its local row guards held.
    ///
    /// This is the only place a shard's training state is mutated for the
    /// message, and no mutation may happen before every expected partial
    /// has arrived - a timed-out step must leave the rows untouched.
    async fn process(&self, envelope: Envelope, guards: Vec<RowGuard>) -> Result<()>;
}

/// Immutable kind → driver table, built once at node startup.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<MessageKind, Arc<dyn TrainingDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, driver: Arc<dyn TrainingDriver>) -> Self {
        self.drivers.insert(driver.kind(), driver);
        self
    }

    pub fn get(&self, kind: MessageKind) -> Result<Arc<dyn TrainingDriver>> {
        self.drivers
            .get(&kind)
            .cloned()
            .ok_or(ShardError::KindMismatch(kind))
    }

    pub fn kinds(&self) -> Vec<MessageKind> {
        self.drivers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDriver(MessageKind);

    #[async_trait]
    impl TrainingDriver for StubDriver {
        fn kind(&self) -> MessageKind {
            self.0
        }

        fn rows_to_lock(&self, _payload: &Payload) -> Result<Vec<RowKey>> {
            Ok(Vec::new())
        }

        async fn process(&self, _envelope: Envelope, _guards: Vec<RowGuard>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn resolves_registered_kind() {
        let registry = DriverRegistry::new().with(Arc::new(StubDriver(MessageKind::SkipGram)));
        assert!(registry.get(MessageKind::SkipGram).is_ok());
    }

    #[test]
    fn unregistered_kind_is_mismatch() {
        let registry = DriverRegistry::new();
        let err = registry.get(MessageKind::Cbow).err().unwrap();
        assert!(matches!(err, ShardError::KindMismatch(MessageKind::Cbow)));
    }
}
