use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::error::TransportError;
use crate::core::model::Response;
use crate::core::naming::ResourceName;
use crate::plugins::registry::Transport;

enum Entry {
    Content { name: ResourceName, payload: Bytes },
    Fail(TransportError),
}

/// In-process transport serving a fixed table of names. Unknown names time
/// out, as nothing would ever answer them. Every request is recorded.
pub struct MemoryTransport {
    table: Mutex<HashMap<ResourceName, Entry>>,
    requests: Mutex<Vec<ResourceName>>,
    strip: Option<ResourceName>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self { table: Mutex::new(HashMap::new()), requests: Mutex::new(Vec::new()), strip: None }
    }

    /// Requests under `prefix` are answered as if the prefix were absent,
    /// and the response carries the shortened name.
    pub fn strip_prefix(mut self, prefix: ResourceName) -> Self {
        self.strip = Some(prefix);
        self
    }

    pub fn publish(&self, name: ResourceName, payload: impl Into<Bytes>) {
        let entry = Entry::Content { name: name.clone(), payload: payload.into() };
        self.table.lock().unwrap_or_else(|p| p.into_inner()).insert(name, entry);
    }

    /// Answers `request` with content published under a different name.
    pub fn respond_as(&self, request: ResourceName, name: ResourceName, payload: impl Into<Bytes>) {
        let entry = Entry::Content { name, payload: payload.into() };
        self.table.lock().unwrap_or_else(|p| p.into_inner()).insert(request, entry);
    }

    pub fn fail(&self, name: ResourceName, err: TransportError) {
        self.table.lock().unwrap_or_else(|p| p.into_inner()).insert(name, Entry::Fail(err));
    }

    pub fn requests(&self) -> Vec<ResourceName> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn lookup_key(&self, name: &ResourceName) -> ResourceName {
        match &self.strip {
            Some(prefix) if name.starts_with(prefix) => {
                ResourceName::from_components(name.components()[prefix.len()..].iter().cloned())
            }
            _ => name.clone(),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str { "memory-transport" }

    async fn express(&self, name: &ResourceName) -> Result<Response, TransportError> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).push(name.clone());

        let key = self.lookup_key(name);
        let table = self.table.lock().unwrap_or_else(|p| p.into_inner());
        match table.get(&key) {
            Some(Entry::Content { name, payload }) => Ok(Response::new(name.clone(), payload.clone())),
            Some(Entry::Fail(e)) => Err(e.clone()),
            None => Err(TransportError::Timeout),
        }
    }
}
