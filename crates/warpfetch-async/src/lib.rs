//! warpfetch async primitives.
//!
//! Everything here is runtime-agnostic: suspension goes through
//! [`std::task::Waker`], so the types work under any executor.
//!
//! # Building blocks
//!
//! - [`AsyncGate`]: one-shot wakeup that is either fired or cancelled.
//! - [`AsyncMutex`]: FIFO mutex whose waiters are gates; a dropped waiter
//!   never strands the lock.
//! - [`BroadcastStream`]: replayable append-only log with any number of
//!   independent [`Subscriber`]s.
//! - [`SequentialQueue`]: single-consumer FIFO with a latched failure.
//!
//! # Bodies
//!
//! Uploads are cut into bounded fragments by [`ChunkedBodySequence`].
//! Downloads are re-framed into records by [`RecordDownloadBuffer`] and
//! broadcast to every reader.

pub mod body;
pub mod broadcast;
pub mod gate;
pub mod mutex;
pub mod queue;
pub mod record;

pub use body::{ByteStream, ChunkedBodySequence, PROGRESS_STEPS, default_fragment_size};
pub use broadcast::{BroadcastStream, Subscriber};
pub use gate::{AsyncGate, GateOutcome, Wait};
pub use mutex::{AsyncMutex, AsyncMutexGuard, Lock};
pub use queue::SequentialQueue;
pub use record::{Framing, RecordDownloadBuffer, RecordFramer};
