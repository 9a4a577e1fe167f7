//! Per-execution-context storage of withheld debug records.
//!
//! Each execution identifier owns at most one [`ContextBuffer`]: a JSON text sequence where every
//! serialized [`LogRecord`] is preceded by [`RECORD_SEPARATOR`]. `serde_json` always escapes
//! control characters inside strings and the compact formatter emits no raw whitespace, so the
//! separator never occurs within a serialized record.

use std::sync::{Mutex, PoisonError, RwLock};

use rustc_hash::FxHashMap;

use crate::record::LogRecord;

/// Separator written before each record in a buffer (ASCII RS, as in RFC 7464).
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// An ordered sequence of serialized records belonging to one execution context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextBuffer {
    contents: String,
    count: usize,
}

impl ContextBuffer {
    /// Number of records appended to this buffer.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if no records were appended.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends a record, serializing it compactly.
    pub fn push(&mut self, record: &LogRecord) -> Result<(), serde_json::Error> {
        let serialized = serde_json::to_string(record)?;
        self.push_segment(&serialized);
        Ok(())
    }

    pub(crate) fn push_segment(&mut self, segment: &str) {
        self.contents.push(RECORD_SEPARATOR);
        self.contents.push_str(segment);
        self.count += 1;
    }

    /// Iterates over the raw serialized segments in append order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.contents
            .split(RECORD_SEPARATOR)
            .filter(|segment| !segment.is_empty())
    }

    /// Parses every segment independently, in append order.
    ///
    /// A segment that fails to parse yields an `Err` without affecting its neighbours.
    pub fn records(&self) -> impl Iterator<Item = Result<LogRecord, serde_json::Error>> + '_ {
        self.segments().map(serde_json::from_str)
    }
}

/// A handle to the buffer of one execution identifier.
#[derive(Debug)]
pub struct BufferHandle<'r> {
    registry: &'r BufferRegistry,
    id: String,
}

impl BufferHandle<'_> {
    /// The execution identifier this handle refers to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Appends a record to the buffer.
    pub fn append(&self, record: &LogRecord) -> Result<(), serde_json::Error> {
        self.registry.append(&self.id, record)
    }

    /// Returns `true` if the buffer currently holds any records.
    pub fn has_pending(&self) -> bool {
        self.registry.has_pending(&self.id)
    }
}

/// Owns the [`ContextBuffer`]s of all execution contexts.
///
/// Appends for distinct identifiers only share a read lock on the map, while each buffer is
/// guarded by its own mutex. Creating and draining a buffer take the write lock, so a drain never
/// races with an append into the same buffer.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: RwLock<FxHashMap<String, Mutex<ContextBuffer>>>,
}

impl BufferRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the buffer for `id`, creating an empty buffer if none exists.
    pub fn ensure(&self, id: &str) -> BufferHandle<'_> {
        let exists = self
            .buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id);

        if !exists {
            self.buffers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(id.to_owned())
                .or_default();
        }

        BufferHandle {
            registry: self,
            id: id.to_owned(),
        }
    }

    /// Appends `record` to the buffer for `id`, creating the buffer if necessary.
    ///
    /// Fails only if the record cannot be serialized, in which case the buffer is left
    /// unchanged.
    pub fn append(&self, id: &str, record: &LogRecord) -> Result<(), serde_json::Error> {
        let serialized = serde_json::to_string(record)?;
        self.append_segment(id, &serialized);
        Ok(())
    }

    pub(crate) fn append_segment(&self, id: &str, segment: &str) {
        {
            let buffers = self.buffers.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(buffer) = buffers.get(id) {
                buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_segment(segment);
                return;
            }
        }

        self.buffers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_owned())
            .or_default()
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push_segment(segment);
    }

    /// Returns `true` if a buffer exists for `id` and holds at least one record.
    pub fn has_pending(&self, id: &str) -> bool {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|buffer| !buffer.lock().unwrap_or_else(PoisonError::into_inner).is_empty())
    }

    /// Removes the buffer for `id` and returns its contents.
    ///
    /// Returns an empty buffer if none exists. No buffer exists for `id` afterwards.
    pub fn drain(&self, id: &str) -> ContextBuffer {
        self.buffers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .map(|buffer| buffer.into_inner().unwrap_or_else(PoisonError::into_inner))
            .unwrap_or_default()
    }

    /// Removes and discards the buffer for `id`, if any.
    pub fn delete(&self, id: &str) {
        self.buffers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Returns `true` if a buffer, possibly empty, exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of live buffers.
    ///
    /// Buffers are only released by a flush or an explicit delete, so a steadily growing count
    /// points to contexts that ended without cleanup.
    pub fn len(&self) -> usize {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no buffers are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
