//! Opaque resource identities, one newtype per category.
//!
//! A handle is a 64-bit value minted by the recording side and resolved by
//! the executing side with a map lookup. Handles are never reused: every
//! category has its own monotonic counter, so a stale handle held past a
//! delete resolves to nothing rather than colliding with a newer resource.
//! Null is unrepresentable — the newtypes wrap `NonZeroU64`.

use core_stream::Pod;
use std::num::NonZeroU64;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// The raw 64-bit identity. Stable for the life of the queue.
            pub fn as_raw(self) -> u64 {
                self.0.get()
            }
        }

        impl Pod for $name {
            const WIDTH: usize = 8;

            fn encode(self, dst: &mut [u8]) {
                self.0.get().encode(dst);
            }

            fn decode(src: &[u8]) -> Self {
                match NonZeroU64::new(u64::decode(src)) {
                    Some(raw) => Self(raw),
                    None => panic!(concat!("corrupt stream: null ", stringify!($name))),
                }
            }
        }
    };
}

define_handle!(
    /// A loaded (or failed-to-load) file.
    FileHandle
);
define_handle!(
    /// An instantiated artboard.
    ArtboardHandle
);
define_handle!(
    /// An instantiated state machine.
    StateMachineHandle
);
define_handle!(
    /// A view-model instance binding.
    ViewModelInstanceHandle
);
define_handle!(
    /// A decoded or externally supplied render image.
    RenderImageHandle
);
define_handle!(
    /// A decoded or externally supplied audio source.
    AudioSourceHandle
);
define_handle!(
    /// A decoded or externally supplied font.
    FontHandle
);
define_handle!(
    /// De-duplication key for per-frame draw callbacks.
    DrawKey
);

/// Per-category monotonic counters. Live behind the command mutex so handle
/// allocation is totally ordered with the commands that first reference the
/// handles.
#[derive(Default)]
pub(crate) struct HandleCounters {
    file: u64,
    artboard: u64,
    state_machine: u64,
    view_model: u64,
    image: u64,
    audio: u64,
    font: u64,
    draw_key: u64,
}

impl HandleCounters {
    fn bump(slot: &mut u64) -> NonZeroU64 {
        *slot += 1;
        NonZeroU64::new(*slot).expect("handle counter wrapped")
    }

    pub(crate) fn file(&mut self) -> FileHandle {
        FileHandle(Self::bump(&mut self.file))
    }

    pub(crate) fn artboard(&mut self) -> ArtboardHandle {
        ArtboardHandle(Self::bump(&mut self.artboard))
    }

    pub(crate) fn state_machine(&mut self) -> StateMachineHandle {
        StateMachineHandle(Self::bump(&mut self.state_machine))
    }

    pub(crate) fn view_model(&mut self) -> ViewModelInstanceHandle {
        ViewModelInstanceHandle(Self::bump(&mut self.view_model))
    }

    pub(crate) fn image(&mut self) -> RenderImageHandle {
        RenderImageHandle(Self::bump(&mut self.image))
    }

    pub(crate) fn audio(&mut self) -> AudioSourceHandle {
        AudioSourceHandle(Self::bump(&mut self.audio))
    }

    pub(crate) fn font(&mut self) -> FontHandle {
        FontHandle(Self::bump(&mut self.font))
    }

    pub(crate) fn draw_key(&mut self) -> DrawKey {
        DrawKey(Self::bump(&mut self.draw_key))
    }
}
