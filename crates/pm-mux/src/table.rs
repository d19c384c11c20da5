//! Stream registry for one connection

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use pm_core::{MuxError, Role};
use pm_protocol::{ProtocolError, StreamId};

use crate::stream::StreamShared;

/// Maps stream identifiers to the shared state of live streams.
///
/// The reader task routes frames through `lookup`; caller tasks create,
/// close and reset streams concurrently.
pub struct StreamTable {
    /// Which identifier range this side allocates from
    role: Role,
    /// Live streams indexed by ID
    streams: DashMap<StreamId, Arc<StreamShared>>,
    /// Next stream ID to allocate
    next_stream_id: AtomicU32,
    /// Highest ID the peer has opened so far
    last_peer_id: AtomicU32,
}

impl StreamTable {
    /// Create an empty table
    pub fn new(role: Role) -> Self {
        Self {
            role,
            streams: DashMap::new(),
            next_stream_id: AtomicU32::new(role.first_stream_id().as_u32()),
            last_peer_id: AtomicU32::new(0),
        }
    }

    /// Allocate a fresh identifier and register a new stream under it
    pub fn create(&self) -> Result<Arc<StreamShared>, MuxError> {
        let id = self
            .next_stream_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(2))
            .map_err(|_| MuxError::StreamIdsExhausted)?;
        let id = StreamId::new(id);

        let shared = Arc::new(StreamShared::new(id));
        self.streams.insert(id, Arc::clone(&shared));
        Ok(shared)
    }

    /// Register a stream opened by the peer.
    ///
    /// The ID must come from the peer's range and be higher than every ID
    /// the peer opened before, so an ID is never live twice on one
    /// connection.
    pub fn accept(&self, id: StreamId) -> Result<Arc<StreamShared>, MuxError> {
        if id.as_u32() == 0 || self.role.owns(id) {
            return Err(ProtocolError::StreamIdOutOfRange(id).into());
        }

        match self.streams.entry(id) {
            Entry::Occupied(_) => Err(MuxError::DuplicateStream(id)),
            Entry::Vacant(entry) => {
                let previous = self.last_peer_id.fetch_max(id.as_u32(), Ordering::SeqCst);
                if id.as_u32() <= previous {
                    return Err(ProtocolError::StreamIdReused(id).into());
                }
                let shared = Arc::new(StreamShared::new(id));
                entry.insert(Arc::clone(&shared));
                Ok(shared)
            }
        }
    }

    /// Find a live stream
    pub fn lookup(&self, id: StreamId) -> Option<Arc<StreamShared>> {
        self.streams.get(&id).map(|r| Arc::clone(&r))
    }

    /// Remove a stream regardless of its state
    pub fn remove(&self, id: StreamId) -> Option<Arc<StreamShared>> {
        self.streams.remove(&id).map(|(_, shared)| shared)
    }

    /// Remove `stream` if it is still the one registered under its ID
    pub fn remove_stream(&self, stream: &Arc<StreamShared>) -> bool {
        self.streams
            .remove_if(&stream.id(), |_, current| Arc::ptr_eq(current, stream))
            .is_some()
    }

    /// Remove `stream` once it is reset, or closed with nothing left to read
    pub fn remove_if_finished(&self, stream: &Arc<StreamShared>) -> bool {
        let removed = self
            .streams
            .remove_if(&stream.id(), |_, current| {
                Arc::ptr_eq(current, stream) && current.is_finished()
            })
            .is_some();
        if removed {
            tracing::debug!("Removed finished {}", stream.id());
        }
        removed
    }

    /// Remove every stream, resetting each one locally.
    ///
    /// Returns the number of streams that were still live.
    pub fn reset_all(&self) -> usize {
        let ids: Vec<StreamId> = self.streams.iter().map(|r| *r.key()).collect();
        let mut count = 0;
        for id in ids {
            if let Some(shared) = self.remove(id) {
                shared.reset();
                count += 1;
            }
        }
        count
    }

    /// Side this table allocates for
    pub fn role(&self) -> Role {
        self.role
    }

    /// Number of live streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
