//! Publisher and projection-store doubles.

use std::sync::Mutex;

use async_trait::async_trait;
use eventrelay_core::error::DomainError;
use eventrelay_core::event::IntegrationEvent;
use eventrelay_core::ports::{ProjectionStore, Publisher};

/// A publisher that records every batch it is asked to publish.
#[derive(Debug)]
pub struct RecordingPublisher<K> {
    batches: Mutex<Vec<Vec<IntegrationEvent<K>>>>,
}

impl<K> Default for RecordingPublisher<K> {
    fn default() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }
}

impl<K: Clone> RecordingPublisher<K> {
    /// Creates an empty recording publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every published batch, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches(&self) -> Vec<Vec<IntegrationEvent<K>>> {
        self.batches.lock().unwrap().clone()
    }

    /// Returns every published event, flattened across batches.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<IntegrationEvent<K>> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl<K: Clone + Send + Sync> Publisher<K> for RecordingPublisher<K> {
    async fn publish(&self, events: &[IntegrationEvent<K>]) -> Result<(), DomainError> {
        self.batches.lock().unwrap().push(events.to_vec());
        Ok(())
    }
}

/// A publisher whose broker is always unavailable.
#[derive(Debug, Default)]
pub struct FailingPublisher;

#[async_trait]
impl<K: Send + Sync> Publisher<K> for FailingPublisher {
    async fn publish(&self, _events: &[IntegrationEvent<K>]) -> Result<(), DomainError> {
        Err(DomainError::Publish("broker unavailable".into()))
    }
}

/// A projection store that records every saved projection.
#[derive(Debug)]
pub struct RecordingProjectionStore<P> {
    saved: Mutex<Vec<P>>,
}

impl<P> Default for RecordingProjectionStore<P> {
    fn default() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
        }
    }
}

impl<P: Clone> RecordingProjectionStore<P> {
    /// Creates an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every saved projection, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved(&self) -> Vec<P> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl<P: Clone + Send + Sync> ProjectionStore<P> for RecordingProjectionStore<P> {
    async fn save(&self, projection: &P) -> Result<(), DomainError> {
        self.saved.lock().unwrap().push(projection.clone());
        Ok(())
    }
}

/// A projection store that always fails.
#[derive(Debug, Default)]
pub struct FailingProjectionStore;

#[async_trait]
impl<P: Sync> ProjectionStore<P> for FailingProjectionStore {
    async fn save(&self, _projection: &P) -> Result<(), DomainError> {
        Err(DomainError::Persistence("document store unavailable".into()))
    }
}
