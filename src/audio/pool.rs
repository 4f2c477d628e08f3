//! # Output Buffer Pool
//!
//! Owns a fixed set of reusable, fixed-capacity buffers and brokers exclusive
//! access to them. Each slot is backed by one platform buffer in the output
//! queue; the slot index is the handle both sides share.
//!
//! ## Slot Lifecycle:
//! 1. **Free**: available to `acquire`
//! 2. **Reserved**: handed out by `acquire`, never handed out again until
//!    written or released
//! 3. **Busy**: filled by `write` and submitted to the output queue
//! 4. **Free** again once the output reports it consumed (`release`)
//!
//! ## Thread Safety:
//! The pool itself is not synchronized. The player keeps it inside the same
//! mutex as its lifecycle state, so the caller thread and the output thread
//! never touch it concurrently.

use tracing::{debug, warn};

use crate::audio::output::OutputQueue;
use crate::error::PlayerError;

/// One reusable buffer.
#[derive(Debug)]
pub struct BufferSlot {
    pub index: usize,

    /// Allocated once, never resized
    storage: Box<[u8]>,

    /// Valid bytes in `storage` for the current submission
    len: usize,

    /// Handed out by `acquire`, not yet written
    reserved: bool,

    pub busy: bool,
}

impl BufferSlot {
    pub fn is_free(&self) -> bool {
        !self.busy && !self.reserved
    }

    /// Bytes of the current (or last) submission.
    pub fn data(&self) -> &[u8] {
        &self.storage[..self.len]
    }
}

/// Fixed-size pool of output buffers with first-fit acquisition.
#[derive(Debug, Default)]
pub struct BufferPool {
    slots: Vec<BufferSlot>,

    /// Capacity of every slot in bytes
    capacity: usize,

    /// Number of slots flagged busy
    busy: usize,
}

impl BufferPool {
    /// Create an empty pool. Nothing is allocated until `allocate`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `count` slots of `bytes_per_slot` bytes each, all free.
    ///
    /// ## Failure Handling:
    /// If any storage reservation or any `allocate_buffer` call fails, every
    /// buffer created so far is released before the error is returned, so a
    /// half-initialized pool is never left behind.
    pub fn allocate(
        &mut self,
        count: usize,
        bytes_per_slot: usize,
        output: &mut dyn OutputQueue,
    ) -> Result<(), PlayerError> {
        if !self.slots.is_empty() {
            return Err(PlayerError::Allocation("pool is already allocated".to_string()));
        }
        if count == 0 || bytes_per_slot == 0 {
            return Err(PlayerError::Allocation(format!(
                "cannot allocate {} buffers of {} bytes",
                count, bytes_per_slot
            )));
        }

        let mut slots = Vec::new();
        if let Err(err) = slots.try_reserve_exact(count) {
            return Err(PlayerError::Allocation(err.to_string()));
        }

        for index in 0..count {
            let result = reserve_storage(bytes_per_slot).and_then(|storage| {
                output
                    .allocate_buffer(index, bytes_per_slot)
                    .map(|_| storage)
                    .map_err(|e| PlayerError::Allocation(e.0))
            });

            match result {
                Ok(storage) => slots.push(BufferSlot {
                    index,
                    storage,
                    len: 0,
                    reserved: false,
                    busy: false,
                }),
                Err(err) => {
                    warn!(index, count, "Buffer allocation failed, releasing {} buffers", slots.len());
                    for slot in &slots {
                        output.free_buffer(slot.index);
                    }
                    return Err(err);
                }
            }
        }

        debug!(count, bytes_per_slot, "Allocated output buffers");
        self.slots = slots;
        self.capacity = bytes_per_slot;
        self.busy = 0;
        Ok(())
    }

    /// Reserve the lowest free slot and return its index.
    ///
    /// The slot is not handed out again until `write` consumes the
    /// reservation or `release` drops it.
    pub fn acquire(&mut self) -> Result<usize, PlayerError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_free())
            .ok_or(PlayerError::NoFreeBuffer { accepted: 0 })?;
        slot.reserved = true;
        Ok(slot.index)
    }

    /// Copy `bytes` into slot `index`, mark it busy and submit it.
    ///
    /// Consumes any reservation on the slot. If the span does not fit, or the
    /// output queue rejects the submission, the slot goes back to free since
    /// no completion will ever arrive for it.
    pub fn write(
        &mut self,
        index: usize,
        bytes: &[u8],
        output: &mut dyn OutputQueue,
    ) -> Result<(), PlayerError> {
        let capacity = self.capacity;
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(PlayerError::SlotUnavailable { index })?;
        if slot.busy {
            return Err(PlayerError::SlotUnavailable { index });
        }
        slot.reserved = false;

        if bytes.len() > capacity {
            return Err(PlayerError::BufferTooLarge {
                len: bytes.len(),
                capacity,
            });
        }

        slot.storage[..bytes.len()].copy_from_slice(bytes);
        slot.len = bytes.len();
        slot.busy = true;
        self.busy += 1;

        if let Err(err) = output.enqueue_buffer(index, &slot.storage[..slot.len]) {
            // Roll back: nothing downstream will release this slot.
            slot.busy = false;
            self.busy -= 1;
            return Err(PlayerError::Enqueue(err.0));
        }
        Ok(())
    }

    /// Mark slot `index` free. Returns whether a busy or reserved slot was
    /// actually freed.
    ///
    /// Idempotent: releasing a free slot, or any index after `free`, changes nothing.
    pub fn release(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.busy => {
                slot.busy = false;
                self.busy -= 1;
                true
            }
            Some(slot) if slot.reserved => {
                slot.reserved = false;
                true
            }
            _ => false,
        }
    }

    /// Release every platform buffer and clear the slot sequence.
    ///
    /// Only valid once the output has stopped; the player guarantees that.
    pub fn free(&mut self, output: &mut dyn OutputQueue) {
        for slot in &self.slots {
            output.free_buffer(slot.index);
        }
        debug!(count = self.slots.len(), "Freed output buffers");
        self.slots.clear();
        self.busy = 0;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn busy_count(&self) -> usize {
        self.busy
    }

    /// Slots neither busy nor reserved.
    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_free()).count()
    }

    pub fn slot(&self, index: usize) -> Option<&BufferSlot> {
        self.slots.get(index)
    }
}

fn reserve_storage(bytes: usize) -> Result<Box<[u8]>, PlayerError> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(bytes)
        .map_err(|e| PlayerError::Allocation(e.to_string()))?;
    storage.resize(bytes, 0u8);
    Ok(storage.into_boxed_slice())
}
