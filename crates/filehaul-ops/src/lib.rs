//! Filesystem mutation engine for filehaul.
//!
//! Each [`Task`] owns one worker thread that walks the requested trees,
//! reporting progress through a shared, mutex-guarded state that the
//! caller can snapshot at any time. Collisions are resolved through the
//! caller's [`TaskObserver`]; abort and pause are cooperative flags
//! checked at every recursion boundary.
//!
//! Exec tasks are dispatched to the `filehaul-exec` orchestrator, which
//! carries its own watcher threads; `run()` returns as soon as the child
//! is spawned.

mod chmod;
mod context;
mod copy;
mod delete;
mod link;
mod move_op;
mod resolve;
mod size;
mod task;

pub use task::{Flow, SilentObserver, Task, TaskObserver};
