//! Cross-thread command boundary between an application thread that records
//! work and a rendering thread that executes it.
//!
//! The [`CommandQueue`] is the recording surface: every method appends a
//! tag-led record to a shared byte stream (side-car object streams carry
//! payloads, names, and callbacks) and returns immediately, handing back an
//! opaque handle where one is minted. The paired [`CommandServer`] drains
//! the stream on its own thread, owns the real resources behind every
//! handle, and posts reply messages that [`CommandQueue::process_messages`]
//! later delivers to registered listeners on the application thread.
//!
//! Single producer, single consumer: one thread records into a queue
//! instance (plus [`CommandQueue::create_draw_key`], callable from
//! anywhere), and exactly one server drains it. Ordering is the protocol —
//! commands execute in recording order, and replies produced by one drain
//! are delivered before replies of the next.

mod data;
mod handle;
mod listener;
mod protocol;
mod queue;
mod server;

pub use data::{ViewModelInstanceData, ViewModelValue};
pub use handle::{
    ArtboardHandle, AudioSourceHandle, DrawKey, FileHandle, FontHandle, RenderImageHandle,
    StateMachineHandle, ViewModelInstanceHandle,
};
pub use listener::{
    ArtboardEvents, ArtboardListener, AudioSourceEvents, AudioSourceListener, FileEvents,
    FileListener, FontEvents, FontListener, RenderImageEvents, RenderImageListener,
    StateMachineEvents, StateMachineListener, ViewModelInstanceEvents, ViewModelInstanceListener,
};
pub use queue::{CommandQueue, PointerEvent, ServerCallback, ServerDrawCallback};
pub use server::{CommandServer, SubscriptionKey};
