use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use super::{HostBackend, HostMemory};
use crate::backend::{CommandQueue, StatusResult};
use crate::status::Status;

/// A transfer recorded but not yet executed.
enum PendingOp {
    Write { memory: HostMemory, offset: usize, len: usize, src: *const u8 },
    Read { memory: HostMemory, offset: usize, len: usize, dst: *mut u8 },
}

impl PendingOp {
    /// # Safety
    ///
    /// The host pointer recorded at enqueue time must still be valid.
    unsafe fn execute(self) {
        match self {
            // SAFETY: bounds checked at enqueue, pointer validity is the enqueuer's contract.
            PendingOp::Write { memory, offset, len, src } => unsafe { memory.write_from(offset, len, src) },
            PendingOp::Read { memory, offset, len, dst } => unsafe { memory.read_into(offset, len, dst) },
        }
    }
}

/// In-order queue of the host backend.
///
/// Enqueued transfers are only recorded; they run in FIFO order on
/// [`CommandQueue::flush`] or [`CommandQueue::finish`], which makes the
/// asynchronous contract observable.
pub struct HostQueue {
    device: String,
    pending: Mutex<VecDeque<PendingOp>>,
}

impl HostQueue {
    pub(crate) fn new(device: String) -> Self {
        Self { device, pending: Mutex::new(VecDeque::new()) }
    }

    /// Number of recorded operations not yet executed.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn push(&self, op: PendingOp) {
        self.pending.lock().push_back(op);
    }
}

impl fmt::Debug for HostQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostQueue").field("device", &self.device).field("pending", &self.pending()).finish()
    }
}

impl CommandQueue<HostBackend> for HostQueue {
    unsafe fn enqueue_write(&self, memory: &HostMemory, offset: usize, len: usize, src: *const u8) -> StatusResult<()> {
        if src.is_null() || !memory.in_bounds(offset, len) {
            return Err(Status::INVALID_VALUE);
        }
        self.push(PendingOp::Write { memory: memory.clone(), offset, len, src });
        Ok(())
    }

    unsafe fn enqueue_read(&self, memory: &HostMemory, offset: usize, len: usize, dst: *mut u8) -> StatusResult<()> {
        if dst.is_null() || !memory.in_bounds(offset, len) {
            return Err(Status::INVALID_VALUE);
        }
        self.push(PendingOp::Read { memory: memory.clone(), offset, len, dst });
        Ok(())
    }

    fn flush(&self) -> StatusResult<()> {
        let ops: Vec<PendingOp> = self.pending.lock().drain(..).collect();
        if !ops.is_empty() {
            tracing::trace!(queue.device = %self.device, ops = ops.len(), "executing pending transfers");
        }
        for op in ops {
            // SAFETY: callers of the enqueue functions keep host memory valid until the queue finishes.
            unsafe { op.execute() };
        }
        Ok(())
    }

    fn finish(&self) -> StatusResult<()> {
        self.flush()
    }
}
