//! Multi-threaded frame recording.
//!
//! A [`FrameDriver`] owns N worker threads and one reusable barrier. Each
//! frame, the committing thread runs the backend's `pioneer`, every worker
//! records its own command list, and the barrier leader runs the `assembler`
//! that submits and presents.

mod backend;
mod driver;

pub use backend::{Backend, BackendKind, FrameHook, create_backend};
pub use driver::{DriverState, FrameDriver};
