//! Remote authority abstraction.
//!
//! The remote authority is the server that owns the canonical copy of every
//! record and assigns real identifiers. Larder only consumes it; the
//! transport behind it (HTTP, RPC, ...) is the implementor's concern.

use crate::entity::Record;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors reported by a remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote could not be reached.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("remote call timed out")]
    Timeout,

    /// The target record does not exist remotely.
    #[error("remote record not found: {0}")]
    NotFound(String),

    /// The remote refused the mutation; retrying cannot help.
    #[error("rejected by remote: {0}")]
    Rejected(String),

    /// The remote failed while handling the call.
    #[error("remote server error: {0}")]
    Server(String),
}

impl RemoteError {
    /// Returns true if a later attempt of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// The server that owns canonical records.
///
/// Calls are at-least-once: the engine may repeat a call whose outcome it
/// never observed, so implementations should tolerate duplicates.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Creates `record` remotely and returns the identifier it was assigned.
    async fn create_entity(&self, entity_type: &str, record: &Record) -> RemoteResult<String>;

    /// Overwrites the record `id` with `record`.
    async fn update_entity(&self, entity_type: &str, id: &str, record: &Record)
        -> RemoteResult<()>;

    /// Deletes the record `id`.
    async fn delete_entity(&self, entity_type: &str, id: &str) -> RemoteResult<()>;

    /// Returns every record of `entity_type` owned by `owner_id`.
    async fn fetch_all(&self, entity_type: &str, owner_id: &str) -> RemoteResult<Vec<Record>>;
}

#[async_trait]
impl<R: RemoteAuthority + ?Sized> RemoteAuthority for Arc<R> {
    async fn create_entity(&self, entity_type: &str, record: &Record) -> RemoteResult<String> {
        (**self).create_entity(entity_type, record).await
    }

    async fn update_entity(
        &self,
        entity_type: &str,
        id: &str,
        record: &Record,
    ) -> RemoteResult<()> {
        (**self).update_entity(entity_type, id, record).await
    }

    async fn delete_entity(&self, entity_type: &str, id: &str) -> RemoteResult<()> {
        (**self).delete_entity(entity_type, id).await
    }

    async fn fetch_all(&self, entity_type: &str, owner_id: &str) -> RemoteResult<Vec<Record>> {
        (**self).fetch_all(entity_type, owner_id).await
    }
}

/// A call observed by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// `create_entity`, with the id the record carried when sent.
    Create {
        /// Entity type.
        entity_type: String,
        /// Local id of the submitted record.
        local_id: String,
    },
    /// `update_entity`.
    Update {
        /// Entity type.
        entity_type: String,
        /// Target id.
        id: String,
    },
    /// `delete_entity`.
    Delete {
        /// Entity type.
        entity_type: String,
        /// Target id.
        id: String,
    },
    /// `fetch_all`.
    FetchAll {
        /// Entity type.
        entity_type: String,
        /// Owner filter.
        owner_id: String,
    },
}

#[derive(Debug)]
struct MemoryRemoteState {
    collections: BTreeMap<String, BTreeMap<String, Record>>,
    next_id: u64,
    online: bool,
    failures: Vec<RemoteError>,
    latency: Option<Duration>,
    calls: Vec<RemoteCall>,
}

/// An in-process remote authority for tests and demos.
///
/// Assigns identifiers `srv_1`, `srv_2`, ... and supports failure
/// injection: an offline switch, a queue of scripted failures consumed one
/// per call, and an artificial latency.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<MemoryRemoteState>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Creates an empty, online remote.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryRemoteState {
                collections: BTreeMap::new(),
                next_id: 1,
                online: true,
                failures: Vec::new(),
                latency: None,
                calls: Vec::new(),
            }),
        }
    }

    /// Switches the remote on or offline. Offline calls fail with
    /// [`RemoteError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    /// Returns whether the remote is online.
    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Makes the next `count` calls fail with `error`.
    pub fn fail_next(&self, count: usize, error: RemoteError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.failures.push(error.clone());
        }
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Stores `record` as if it had been created remotely.
    pub fn seed(&self, entity_type: &str, record: Record) {
        let mut state = self.state.lock();
        if let Some(n) = record
            .id
            .strip_prefix("srv_")
            .and_then(|n| n.parse::<u64>().ok())
        {
            state.next_id = state.next_id.max(n + 1);
        }
        state
            .collections
            .entry(entity_type.to_string())
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// Returns every stored record of `entity_type`, ordered by id.
    pub fn records(&self, entity_type: &str) -> Vec<Record> {
        self.state
            .lock()
            .collections
            .get(entity_type)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a stored record.
    pub fn get(&self, entity_type: &str, id: &str) -> Option<Record> {
        self.state
            .lock()
            .collections
            .get(entity_type)
            .and_then(|c| c.get(id).cloned())
    }

    /// Returns every call received so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Forgets the call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Logs `call`, waits out the latency, then applies failure injection.
    async fn enter(&self, call: RemoteCall) -> RemoteResult<()> {
        let latency = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if !state.online {
            return Err(RemoteError::Unavailable("remote is offline".into()));
        }
        if !state.failures.is_empty() {
            return Err(state.failures.remove(0));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteAuthority for MemoryRemote {
    async fn create_entity(&self, entity_type: &str, record: &Record) -> RemoteResult<String> {
        self.enter(RemoteCall::Create {
            entity_type: entity_type.to_string(),
            local_id: record.id.clone(),
        })
        .await?;

        let mut state = self.state.lock();
        let id = format!("srv_{}", state.next_id);
        state.next_id += 1;
        let mut stored = record.clone();
        stored.id = id.clone();
        state
            .collections
            .entry(entity_type.to_string())
            .or_default()
            .insert(id.clone(), stored);
        Ok(id)
    }

    async fn update_entity(
        &self,
        entity_type: &str,
        id: &str,
        record: &Record,
    ) -> RemoteResult<()> {
        self.enter(RemoteCall::Update {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        })
        .await?;

        let mut state = self.state.lock();
        let slot = state
            .collections
            .get_mut(entity_type)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        *slot = record.clone();
        slot.id = id.to_string();
        Ok(())
    }

    async fn delete_entity(&self, entity_type: &str, id: &str) -> RemoteResult<()> {
        self.enter(RemoteCall::Delete {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        })
        .await?;

        self.state
            .lock()
            .collections
            .get_mut(entity_type)
            .and_then(|c| c.remove(id))
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn fetch_all(&self, entity_type: &str, owner_id: &str) -> RemoteResult<Vec<Record>> {
        self.enter(RemoteCall::FetchAll {
            entity_type: entity_type.to_string(),
            owner_id: owner_id.to_string(),
        })
        .await?;

        Ok(self
            .records(entity_type)
            .into_iter()
            .filter(|r| r.owner_id == owner_id)
            .collect())
    }
}
