//! Test and helper sinks for shot_core

use std::sync::{Arc, Mutex};

use shot_traits::Sink;

use crate::router::ShotEvent;

/// A sink that records every event; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ShotEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<ShotEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<ShotEvent> {
        self.events
            .lock()
            .map(|mut g| std::mem::take(&mut *g))
            .unwrap_or_default()
    }
}

impl Sink<ShotEvent> for RecordingSink {
    fn publish(&mut self, item: &ShotEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events
            .lock()
            .map_err(|_| crate::error::ShotError::State("recording sink poisoned".into()))?
            .push(item.clone());
        Ok(())
    }
}
