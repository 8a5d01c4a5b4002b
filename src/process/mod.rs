//! C7/C8 — the real-time audio/event path: the zero-allocation process
//! context, the UMP input dispatcher, and the lock-free event queue.

pub mod context;
pub mod queue;
pub mod ump;
