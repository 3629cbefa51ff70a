//! Endpoint Directory
//!
//! Name-keyed lookup of locally-owned endpoints. The directory never knows
//! about endpoints living in other processes; those are only reachable by
//! name through the relay.

use crate::endpoint::Endpoint;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of local endpoints; clones share the same entries
#[derive(Debug, Clone, Default)]
pub struct EndpointDirectory {
    endpoints: Arc<RwLock<HashMap<String, Endpoint>>>,
}

impl EndpointDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `endpoint` under its name.
    ///
    /// Names are not checked for uniqueness: a later registration silently
    /// replaces an earlier one, which is returned to the caller.
    pub fn register(&self, endpoint: Endpoint) -> Option<Endpoint> {
        debug!("Registering endpoint: {}", endpoint.name());
        self.endpoints
            .write()
            .insert(endpoint.name().to_string(), endpoint)
    }

    /// Local endpoint registered under `name`, if any
    pub fn lookup(&self, name: &str) -> Option<Endpoint> {
        self.endpoints.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.read().contains_key(name)
    }

    /// Remove an entry without stopping it
    pub fn remove(&self, name: &str) -> Option<Endpoint> {
        self.endpoints.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drain the directory and stop every endpoint's poll loop
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<Endpoint> = self.endpoints.write().drain().map(|(_, ep)| ep).collect();
        let count = drained.len();

        for endpoint in drained {
            endpoint.stop().await;
        }

        info!("Directory shut down, {} endpoints stopped", count);
        count
    }
}
