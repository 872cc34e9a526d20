use std::sync::Mutex;

use crate::gpu::ResourceId;
use crate::staging::StagedBuffer;
use crate::sync::lock;

/// One pending staging → GPU-local copy.
pub(crate) struct DirtyEntry {
    pub buffer: StagedBuffer,
    /// Staging companion holding the new contents.
    pub companion: ResourceId,
}

/// Resources written on the CPU since the last copy pass.
#[derive(Default)]
pub struct UploadQueue {
    entries: Mutex<Vec<DirtyEntry>>,
}

impl UploadQueue {
    pub(crate) fn register(&self, entry: DirtyEntry) {
        lock(&self.entries).push(entry);
    }

    /// Drains the set; the caller records the copies.
    pub(crate) fn take(&self) -> Vec<DirtyEntry> {
        std::mem::take(&mut *lock(&self.entries))
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}
