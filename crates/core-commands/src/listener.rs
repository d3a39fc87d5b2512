//! Listener registration and delivery.
//!
//! A listener is the recorder-side receiver for one handle's replies. The
//! listener object owns a shared core; the queue's registry holds only a
//! weak reference to that core. The consequences fall out for free:
//!
//! - Moving a listener moves the owning `Arc` — the core's address never
//!   changes, so the registration follows the move.
//! - Dropping a listener drops the last strong reference and removes the
//!   registry entry, so no reply is ever delivered to a dead receiver.
//! - A registered core holds a strong reference *back* to its queue, so a
//!   listener outliving the application's own queue handle can still
//!   unregister itself on drop.
//!
//! Event traits have default-empty methods; receivers override what they
//! care about. A listener is bound to at most one handle at a time —
//! registering it for a second handle moves the registration. Global
//! listeners receive every reply of their category, in addition to (not
//! instead of) any per-handle listener.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::data::ViewModelInstanceData;
use crate::handle::{
    ArtboardHandle, AudioSourceHandle, FileHandle, FontHandle, RenderImageHandle,
    StateMachineHandle, ViewModelInstanceHandle,
};
use crate::queue::CommandQueue;
use core_scene::{PropertyData, ViewModelEnum};

/// Replies scoped to a file handle.
pub trait FileEvents {
    fn on_file_loaded(&mut self, _handle: FileHandle, _request_id: u64) {}
    fn on_file_error(&mut self, _handle: FileHandle, _request_id: u64, _error: String) {}
    fn on_file_deleted(&mut self, _handle: FileHandle, _request_id: u64) {}
    fn on_artboards_listed(&mut self, _handle: FileHandle, _request_id: u64, _names: Vec<String>) {}
    fn on_view_models_listed(
        &mut self,
        _handle: FileHandle,
        _request_id: u64,
        _names: Vec<String>,
    ) {
    }
    fn on_view_model_instance_names_listed(
        &mut self,
        _handle: FileHandle,
        _request_id: u64,
        _view_model: String,
        _names: Vec<String>,
    ) {
    }
    fn on_view_model_properties_listed(
        &mut self,
        _handle: FileHandle,
        _request_id: u64,
        _view_model: String,
        _properties: Vec<PropertyData>,
    ) {
    }
    fn on_view_model_enums_listed(
        &mut self,
        _handle: FileHandle,
        _request_id: u64,
        _enums: Vec<ViewModelEnum>,
    ) {
    }
}

/// Replies scoped to an artboard handle.
pub trait ArtboardEvents {
    fn on_artboard_deleted(&mut self, _handle: ArtboardHandle, _request_id: u64) {}
    fn on_artboard_error(&mut self, _handle: ArtboardHandle, _request_id: u64, _error: String) {}
    fn on_state_machines_listed(
        &mut self,
        _handle: ArtboardHandle,
        _request_id: u64,
        _names: Vec<String>,
    ) {
    }
    fn on_default_view_model_info(
        &mut self,
        _handle: ArtboardHandle,
        _request_id: u64,
        _view_model: String,
        _instance: String,
    ) {
    }
}

/// Replies scoped to a state machine handle.
pub trait StateMachineEvents {
    fn on_state_machine_deleted(&mut self, _handle: StateMachineHandle, _request_id: u64) {}
    fn on_state_machine_error(
        &mut self,
        _handle: StateMachineHandle,
        _request_id: u64,
        _error: String,
    ) {
    }
    /// `request_id` is the id of the advance that caused settlement.
    fn on_state_machine_settled(&mut self, _handle: StateMachineHandle, _request_id: u64) {}
}

/// Replies scoped to a view-model instance handle.
pub trait ViewModelInstanceEvents {
    fn on_view_model_deleted(&mut self, _handle: ViewModelInstanceHandle, _request_id: u64) {}
    fn on_view_model_error(
        &mut self,
        _handle: ViewModelInstanceHandle,
        _request_id: u64,
        _error: String,
    ) {
    }
    fn on_view_model_data(
        &mut self,
        _handle: ViewModelInstanceHandle,
        _request_id: u64,
        _data: ViewModelInstanceData,
    ) {
    }
    fn on_view_model_list_size(
        &mut self,
        _handle: ViewModelInstanceHandle,
        _request_id: u64,
        _path: String,
        _size: u64,
    ) {
    }
}

/// Replies scoped to a render image handle.
pub trait RenderImageEvents {
    fn on_render_image_decoded(&mut self, _handle: RenderImageHandle, _request_id: u64) {}
    fn on_render_image_deleted(&mut self, _handle: RenderImageHandle, _request_id: u64) {}
    fn on_render_image_error(
        &mut self,
        _handle: RenderImageHandle,
        _request_id: u64,
        _error: String,
    ) {
    }
}

/// Replies scoped to an audio source handle.
pub trait AudioSourceEvents {
    fn on_audio_source_decoded(&mut self, _handle: AudioSourceHandle, _request_id: u64) {}
    fn on_audio_source_deleted(&mut self, _handle: AudioSourceHandle, _request_id: u64) {}
    fn on_audio_source_error(
        &mut self,
        _handle: AudioSourceHandle,
        _request_id: u64,
        _error: String,
    ) {
    }
}

/// Replies scoped to a font handle.
pub trait FontEvents {
    fn on_font_decoded(&mut self, _handle: FontHandle, _request_id: u64) {}
    fn on_font_deleted(&mut self, _handle: FontHandle, _request_id: u64) {}
    fn on_font_error(&mut self, _handle: FontHandle, _request_id: u64, _error: String) {}
}

/// Shared state between a listener object and the queue's registry.
pub(crate) struct ListenerCore<H: Copy, E: ?Sized> {
    pub(crate) binding: Mutex<Binding<H>>,
    events: Mutex<Option<Box<E>>>,
}

pub(crate) struct Binding<H> {
    pub(crate) queue: Option<CommandQueue>,
    pub(crate) handle: Option<H>,
}

impl<H: Copy, E: ?Sized> ListenerCore<H, E> {
    fn empty() -> Self {
        Self {
            binding: Mutex::new(Binding {
                queue: None,
                handle: None,
            }),
            events: Mutex::new(None),
        }
    }

    fn with_events(events: Box<E>) -> Self {
        Self {
            binding: Mutex::new(Binding {
                queue: None,
                handle: None,
            }),
            events: Mutex::new(Some(events)),
        }
    }

    /// Runs `f` against the receiver, if one was attached. Called on the
    /// recording thread only, with no stream mutex held.
    pub(crate) fn deliver(&self, f: impl FnOnce(&mut E)) {
        if let Some(events) = self.events.lock().as_mut() {
            f(&mut **events);
        }
    }
}

macro_rules! define_listener {
    (
        $(#[$meta:meta])*
        $listener:ident, $events:ident, $handle:ty, $core_alias:ident, $unregister:ident
    ) => {
        pub(crate) type $core_alias = ListenerCore<$handle, dyn $events + Send>;

        $(#[$meta])*
        pub struct $listener {
            pub(crate) core: Arc<$core_alias>,
        }

        impl $listener {
            /// A listener that discards every reply. Useful when only the
            /// registration side effects matter.
            pub fn new() -> Self {
                Self {
                    core: Arc::new(ListenerCore::empty()),
                }
            }

            /// A listener delivering replies to `events` on the thread that
            /// calls `process_messages`.
            pub fn with_events(events: impl $events + Send + 'static) -> Self {
                Self {
                    core: Arc::new(ListenerCore::with_events(Box::new(events))),
                }
            }

            /// The handle this listener was last registered to.
            pub fn handle(&self) -> Option<$handle> {
                self.core.binding.lock().handle
            }
        }

        impl Default for $listener {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Drop for $listener {
            fn drop(&mut self) {
                let (queue, handle) = {
                    let mut binding = self.core.binding.lock();
                    (binding.queue.take(), binding.handle.take())
                };
                if let (Some(queue), Some(handle)) = (queue, handle) {
                    queue.$unregister(handle, &self.core);
                }
            }
        }
    };
}

define_listener!(
    /// Receiver for file-scoped replies.
    FileListener,
    FileEvents,
    FileHandle,
    FileListenerCore,
    unregister_file_listener
);
define_listener!(
    /// Receiver for artboard-scoped replies.
    ArtboardListener,
    ArtboardEvents,
    ArtboardHandle,
    ArtboardListenerCore,
    unregister_artboard_listener
);
define_listener!(
    /// Receiver for state-machine-scoped replies.
    StateMachineListener,
    StateMachineEvents,
    StateMachineHandle,
    StateMachineListenerCore,
    unregister_state_machine_listener
);
define_listener!(
    /// Receiver for view-model-instance-scoped replies.
    ViewModelInstanceListener,
    ViewModelInstanceEvents,
    ViewModelInstanceHandle,
    ViewModelListenerCore,
    unregister_view_model_listener
);
define_listener!(
    /// Receiver for render-image-scoped replies.
    RenderImageListener,
    RenderImageEvents,
    RenderImageHandle,
    RenderImageListenerCore,
    unregister_render_image_listener
);
define_listener!(
    /// Receiver for audio-source-scoped replies.
    AudioSourceListener,
    AudioSourceEvents,
    AudioSourceHandle,
    AudioSourceListenerCore,
    unregister_audio_source_listener
);
define_listener!(
    /// Receiver for font-scoped replies.
    FontListener,
    FontEvents,
    FontHandle,
    FontListenerCore,
    unregister_font_listener
);

/// Recorder-side registry: per-handle weak cores plus one optional global
/// core per category. Mutated only from the recording thread.
#[derive(Default)]
pub(crate) struct Registries {
    pub(crate) files: HashMap<FileHandle, Weak<FileListenerCore>>,
    pub(crate) artboards: HashMap<ArtboardHandle, Weak<ArtboardListenerCore>>,
    pub(crate) state_machines: HashMap<StateMachineHandle, Weak<StateMachineListenerCore>>,
    pub(crate) view_models: HashMap<ViewModelInstanceHandle, Weak<ViewModelListenerCore>>,
    pub(crate) images: HashMap<RenderImageHandle, Weak<RenderImageListenerCore>>,
    pub(crate) audio: HashMap<AudioSourceHandle, Weak<AudioSourceListenerCore>>,
    pub(crate) fonts: HashMap<FontHandle, Weak<FontListenerCore>>,
    pub(crate) global_file: Option<Weak<FileListenerCore>>,
    pub(crate) global_artboard: Option<Weak<ArtboardListenerCore>>,
    pub(crate) global_state_machine: Option<Weak<StateMachineListenerCore>>,
    pub(crate) global_view_model: Option<Weak<ViewModelListenerCore>>,
    pub(crate) global_image: Option<Weak<RenderImageListenerCore>>,
    pub(crate) global_audio: Option<Weak<AudioSourceListenerCore>>,
    pub(crate) global_font: Option<Weak<FontListenerCore>>,
}
