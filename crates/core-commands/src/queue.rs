//! The recording side of the command boundary.
//!
//! A [`CommandQueue`] is a cheap cloneable handle to shared channel state.
//! The application thread records commands through it; the server thread
//! drains them through its clone. Each recording method takes the command
//! mutex, appends one tag-led record (plus side-car objects), and signals
//! the command condition variable exactly once before releasing the lock so
//! a server blocked in `wait_commands` wakes.
//!
//! Threading contract: recording methods and [`CommandQueue::process_messages`]
//! belong to one application thread. The exception is
//! [`CommandQueue::create_draw_key`], which only touches the handle counters
//! under the command mutex and may be called from anywhere.
//!
//! Lock order, where it matters: command mutex before listener registry,
//! never the reverse; the message mutex is never held across either. No
//! stream mutex is ever held while a listener callback runs, so callbacks
//! are free to record new commands. Callbacks must not re-enter
//! `process_messages` itself.

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};

use crate::data::ViewModelInstanceData;
use crate::handle::{
    ArtboardHandle, AudioSourceHandle, DrawKey, FileHandle, FontHandle, HandleCounters,
    RenderImageHandle, StateMachineHandle, ViewModelInstanceHandle,
};
use crate::listener::{
    ArtboardListener, ArtboardListenerCore, AudioSourceListener, AudioSourceListenerCore,
    FileListener, FileListenerCore, FontListener, FontListenerCore, Registries,
    RenderImageListener, RenderImageListenerCore, StateMachineListener, StateMachineListenerCore,
    ViewModelInstanceListener, ViewModelListenerCore,
};
use crate::protocol::{CommandTag, MessageTag};
use crate::server::CommandServer;
use core_scene::{
    AudioSource, DataType, FileAssetLoader, Fit, Font, PropertyData, RenderImage, Vec2D,
    ViewModelEnum,
};
use core_stream::{ObjectStream, PodStream};

/// One-shot work executed on the server thread.
pub type ServerCallback = Box<dyn FnOnce(&mut CommandServer) + Send>;

/// Per-frame draw work executed on the server thread. Only the most recent
/// callback recorded for a given [`DrawKey`] runs per drain.
pub type ServerDrawCallback = Box<dyn FnOnce(DrawKey, &mut CommandServer) + Send>;

/// A pointer event in screen space, together with what the server needs to
/// map it into artboard space.
///
/// A zero (default) `screen_bounds` means the position is already in
/// artboard space. State machines should be primed with one zero-dt advance
/// before pointer events are recorded for them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointerEvent {
    pub fit: Fit,
    /// Size of the view rectangle the artboard is presented in.
    pub screen_bounds: Vec2D,
    pub position: Vec2D,
}

impl PointerEvent {
    pub fn at(position: Vec2D) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// Command-direction streams plus the handle counters, all behind one mutex.
pub(crate) struct CommandSink {
    pub(crate) stream: PodStream,
    pub(crate) byte_vectors: ObjectStream<Vec<u8>>,
    pub(crate) names: ObjectStream<String>,
    pub(crate) callbacks: ObjectStream<ServerCallback>,
    pub(crate) draw_callbacks: ObjectStream<ServerDrawCallback>,
    pub(crate) loaders: ObjectStream<Option<Arc<dyn FileAssetLoader>>>,
    pub(crate) external_images: ObjectStream<Arc<dyn RenderImage>>,
    pub(crate) external_audio: ObjectStream<Arc<dyn AudioSource>>,
    pub(crate) external_fonts: ObjectStream<Arc<dyn Font>>,
    pub(crate) handles: HandleCounters,
}

/// Message-direction streams behind their own mutex. The server writes,
/// `process_messages` reads; no condition variable — the recorder polls at
/// its own cadence.
pub(crate) struct MessageSink {
    pub(crate) stream: PodStream,
    pub(crate) names: ObjectStream<String>,
}

pub(crate) struct QueueShared {
    pub(crate) commands: Mutex<CommandSink>,
    pub(crate) commands_ready: Condvar,
    pub(crate) messages: Mutex<MessageSink>,
    pub(crate) listeners: Mutex<Registries>,
}

/// Client-side recorder for commands executed by a [`CommandServer`].
#[derive(Clone)]
pub struct CommandQueue {
    pub(crate) inner: Arc<QueueShared>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueShared {
                commands: Mutex::new(CommandSink {
                    stream: PodStream::new(),
                    byte_vectors: ObjectStream::new(),
                    names: ObjectStream::new(),
                    callbacks: ObjectStream::new(),
                    draw_callbacks: ObjectStream::new(),
                    loaders: ObjectStream::new(),
                    external_images: ObjectStream::new(),
                    external_audio: ObjectStream::new(),
                    external_fonts: ObjectStream::new(),
                    handles: HandleCounters::default(),
                }),
                commands_ready: Condvar::new(),
                messages: Mutex::new(MessageSink {
                    stream: PodStream::new(),
                    names: ObjectStream::new(),
                }),
                listeners: Mutex::new(Registries::default()),
            }),
        }
    }

    /// Appends one record under the command mutex and signals the server
    /// once before the lock is released.
    fn record<R>(&self, f: impl FnOnce(&mut CommandSink) -> R) -> R {
        let mut sink = self.inner.commands.lock();
        let out = f(&mut sink);
        self.inner.commands_ready.notify_one();
        out
    }

    // ---------------------------------------------------------------------
    // Files
    // ---------------------------------------------------------------------

    /// Records a file load and returns its handle immediately. The server
    /// replies with `on_file_loaded` or `on_file_error`; on failure the
    /// handle stays allocated but resolves to nothing.
    pub fn load_file(
        &self,
        bytes: Vec<u8>,
        loader: Option<Arc<dyn FileAssetLoader>>,
        listener: Option<&FileListener>,
        request_id: u64,
    ) -> FileHandle {
        self.record(|sink| {
            let handle = sink.handles.file();
            if let Some(listener) = listener {
                self.register_file_listener(handle, listener);
            }
            sink.stream.push(CommandTag::LoadFile);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.loaders.push(loader);
            sink.byte_vectors.push(bytes);
            tracing::trace!(target: "commands.queue", handle = handle.as_raw(), "loadFile");
            handle
        })
    }

    /// Recorded unconditionally; a delete of an already-dead handle is a
    /// no-op on the server.
    pub fn delete_file(&self, handle: FileHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::DeleteFile);
            sink.stream.push(handle);
            sink.stream.push(request_id);
        });
    }

    // ---------------------------------------------------------------------
    // Artboards
    // ---------------------------------------------------------------------

    /// An empty name requests the file's default artboard.
    pub fn instantiate_artboard_named(
        &self,
        file: FileHandle,
        name: impl Into<String>,
        listener: Option<&ArtboardListener>,
        request_id: u64,
    ) -> ArtboardHandle {
        let name = name.into();
        self.record(|sink| {
            let handle = sink.handles.artboard();
            if let Some(listener) = listener {
                self.register_artboard_listener(handle, listener);
            }
            sink.stream.push(CommandTag::InstantiateArtboard);
            sink.stream.push(handle);
            sink.stream.push(file);
            sink.stream.push(request_id);
            sink.names.push(name);
            handle
        })
    }

    pub fn instantiate_default_artboard(
        &self,
        file: FileHandle,
        listener: Option<&ArtboardListener>,
        request_id: u64,
    ) -> ArtboardHandle {
        self.instantiate_artboard_named(file, "", listener, request_id)
    }

    pub fn delete_artboard(&self, handle: ArtboardHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::DeleteArtboard);
            sink.stream.push(handle);
            sink.stream.push(request_id);
        });
    }

    // ---------------------------------------------------------------------
    // State machines
    // ---------------------------------------------------------------------

    /// An empty name requests the artboard's default state machine.
    pub fn instantiate_state_machine_named(
        &self,
        artboard: ArtboardHandle,
        name: impl Into<String>,
        listener: Option<&StateMachineListener>,
        request_id: u64,
    ) -> StateMachineHandle {
        let name = name.into();
        self.record(|sink| {
            let handle = sink.handles.state_machine();
            if let Some(listener) = listener {
                self.register_state_machine_listener(handle, listener);
            }
            sink.stream.push(CommandTag::InstantiateStateMachine);
            sink.stream.push(handle);
            sink.stream.push(artboard);
            sink.stream.push(request_id);
            sink.names.push(name);
            handle
        })
    }

    pub fn instantiate_default_state_machine(
        &self,
        artboard: ArtboardHandle,
        listener: Option<&StateMachineListener>,
        request_id: u64,
    ) -> StateMachineHandle {
        self.instantiate_state_machine_named(artboard, "", listener, request_id)
    }

    /// The reply `on_state_machine_settled` carries the `request_id` of the
    /// advance that crossed into the settled state.
    pub fn advance_state_machine(&self, handle: StateMachineHandle, dt: f32, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::AdvanceStateMachine);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.stream.push(dt);
        });
    }

    pub fn bind_view_model_instance(
        &self,
        handle: StateMachineHandle,
        instance: ViewModelInstanceHandle,
        request_id: u64,
    ) {
        self.record(|sink| {
            sink.stream.push(CommandTag::BindViewModel);
            sink.stream.push(handle);
            sink.stream.push(instance);
            sink.stream.push(request_id);
        });
    }

    pub fn delete_state_machine(&self, handle: StateMachineHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::DeleteStateMachine);
            sink.stream.push(handle);
            sink.stream.push(request_id);
        });
    }

    fn record_pointer(&self, tag: CommandTag, handle: StateMachineHandle, event: PointerEvent) {
        self.record(|sink| {
            sink.stream.push(tag);
            sink.stream.push(handle);
            sink.stream.push(event.fit as u8);
            sink.stream.push([event.screen_bounds.x, event.screen_bounds.y]);
            sink.stream.push([event.position.x, event.position.y]);
        });
    }

    pub fn pointer_move(&self, handle: StateMachineHandle, event: PointerEvent) {
        self.record_pointer(CommandTag::PointerMove, handle, event);
    }

    pub fn pointer_down(&self, handle: StateMachineHandle, event: PointerEvent) {
        self.record_pointer(CommandTag::PointerDown, handle, event);
    }

    pub fn pointer_up(&self, handle: StateMachineHandle, event: PointerEvent) {
        self.record_pointer(CommandTag::PointerUp, handle, event);
    }

    pub fn pointer_exit(&self, handle: StateMachineHandle, event: PointerEvent) {
        self.record_pointer(CommandTag::PointerExit, handle, event);
    }

    // ---------------------------------------------------------------------
    // View-model instances
    // ---------------------------------------------------------------------

    fn record_view_model_instantiation(
        &self,
        tag: CommandTag,
        file: FileHandle,
        artboard: Option<ArtboardHandle>,
        names: Vec<String>,
        listener: Option<&ViewModelInstanceListener>,
        request_id: u64,
    ) -> ViewModelInstanceHandle {
        self.record(|sink| {
            let handle = sink.handles.view_model();
            if let Some(listener) = listener {
                self.register_view_model_listener(handle, listener);
            }
            sink.stream.push(tag);
            sink.stream.push(handle);
            sink.stream.push(file);
            if let Some(artboard) = artboard {
                sink.stream.push(artboard);
            }
            sink.stream.push(request_id);
            for name in names {
                sink.names.push(name);
            }
            handle
        })
    }

    /// An empty instance name requests the view model's default instance.
    pub fn instantiate_view_model_instance_named(
        &self,
        file: FileHandle,
        view_model: impl Into<String>,
        instance: impl Into<String>,
        listener: Option<&ViewModelInstanceListener>,
        request_id: u64,
    ) -> ViewModelInstanceHandle {
        self.record_view_model_instantiation(
            CommandTag::InstantiateViewModel,
            file,
            None,
            vec![view_model.into(), instance.into()],
            listener,
            request_id,
        )
    }

    pub fn instantiate_default_view_model_instance(
        &self,
        file: FileHandle,
        view_model: impl Into<String>,
        listener: Option<&ViewModelInstanceListener>,
        request_id: u64,
    ) -> ViewModelInstanceHandle {
        self.instantiate_view_model_instance_named(file, view_model, "", listener, request_id)
    }

    /// Every property starts at its zero value.
    pub fn instantiate_blank_view_model_instance(
        &self,
        file: FileHandle,
        view_model: impl Into<String>,
        listener: Option<&ViewModelInstanceListener>,
        request_id: u64,
    ) -> ViewModelInstanceHandle {
        self.record_view_model_instantiation(
            CommandTag::InstantiateBlankViewModel,
            file,
            None,
            vec![view_model.into()],
            listener,
            request_id,
        )
    }

    /// Instantiates from the view model associated with `artboard`.
    pub fn instantiate_view_model_instance_for_artboard(
        &self,
        file: FileHandle,
        artboard: ArtboardHandle,
        instance: impl Into<String>,
        listener: Option<&ViewModelInstanceListener>,
        request_id: u64,
    ) -> ViewModelInstanceHandle {
        self.record_view_model_instantiation(
            CommandTag::InstantiateViewModelForArtboard,
            file,
            Some(artboard),
            vec![instance.into()],
            listener,
            request_id,
        )
    }

    pub fn instantiate_default_view_model_instance_for_artboard(
        &self,
        file: FileHandle,
        artboard: ArtboardHandle,
        listener: Option<&ViewModelInstanceListener>,
        request_id: u64,
    ) -> ViewModelInstanceHandle {
        self.instantiate_view_model_instance_for_artboard(file, artboard, "", listener, request_id)
    }

    pub fn instantiate_blank_view_model_instance_for_artboard(
        &self,
        file: FileHandle,
        artboard: ArtboardHandle,
        listener: Option<&ViewModelInstanceListener>,
        request_id: u64,
    ) -> ViewModelInstanceHandle {
        self.record_view_model_instantiation(
            CommandTag::InstantiateBlankViewModelForArtboard,
            file,
            Some(artboard),
            Vec::new(),
            listener,
            request_id,
        )
    }

    pub fn delete_view_model_instance(&self, handle: ViewModelInstanceHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::DeleteViewModel);
            sink.stream.push(handle);
            sink.stream.push(request_id);
        });
    }

    /// Returns a handle aliasing the view-model instance nested at `path`
    /// inside `parent`.
    pub fn reference_nested_view_model_instance(
        &self,
        parent: ViewModelInstanceHandle,
        path: impl Into<String>,
        listener: Option<&ViewModelInstanceListener>,
        request_id: u64,
    ) -> ViewModelInstanceHandle {
        let path = path.into();
        self.record(|sink| {
            let handle = sink.handles.view_model();
            if let Some(listener) = listener {
                self.register_view_model_listener(handle, listener);
            }
            sink.stream.push(CommandTag::ReferenceNestedViewModel);
            sink.stream.push(handle);
            sink.stream.push(parent);
            sink.stream.push(request_id);
            sink.names.push(path);
            handle
        })
    }

    /// Returns a handle aliasing the `index`th entry of the list at `path`
    /// inside `parent`.
    pub fn reference_list_view_model_instance(
        &self,
        parent: ViewModelInstanceHandle,
        path: impl Into<String>,
        index: u64,
        listener: Option<&ViewModelInstanceListener>,
        request_id: u64,
    ) -> ViewModelInstanceHandle {
        let path = path.into();
        self.record(|sink| {
            let handle = sink.handles.view_model();
            if let Some(listener) = listener {
                self.register_view_model_listener(handle, listener);
            }
            sink.stream.push(CommandTag::ReferenceListViewModel);
            sink.stream.push(handle);
            sink.stream.push(parent);
            sink.stream.push(request_id);
            sink.stream.push(index);
            sink.names.push(path);
            handle
        })
    }

    // ---------------------------------------------------------------------
    // Properties
    // ---------------------------------------------------------------------

    fn record_set_property(
        &self,
        handle: ViewModelInstanceHandle,
        path: String,
        data_type: DataType,
        request_id: u64,
        payload: impl FnOnce(&mut CommandSink),
    ) {
        self.record(|sink| {
            sink.stream.push(CommandTag::SetProperty);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.stream.push(data_type as u8);
            sink.names.push(path);
            payload(sink);
        });
    }

    pub fn set_view_model_instance_bool(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        value: bool,
        request_id: u64,
    ) {
        self.record_set_property(handle, path.into(), DataType::Boolean, request_id, |sink| {
            sink.stream.push(value)
        });
    }

    pub fn set_view_model_instance_number(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        value: f32,
        request_id: u64,
    ) {
        self.record_set_property(handle, path.into(), DataType::Number, request_id, |sink| {
            sink.stream.push(value)
        });
    }

    /// `value` is 32-bit ARGB.
    pub fn set_view_model_instance_color(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        value: u32,
        request_id: u64,
    ) {
        self.record_set_property(handle, path.into(), DataType::Color, request_id, |sink| {
            sink.stream.push(value)
        });
    }

    pub fn set_view_model_instance_string(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        value: impl Into<String>,
        request_id: u64,
    ) {
        let value = value.into();
        self.record_set_property(handle, path.into(), DataType::String, request_id, |sink| {
            sink.names.push(value)
        });
    }

    pub fn set_view_model_instance_enum(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        label: impl Into<String>,
        request_id: u64,
    ) {
        let label = label.into();
        self.record_set_property(handle, path.into(), DataType::EnumType, request_id, |sink| {
            sink.names.push(label)
        });
    }

    pub fn set_view_model_instance_image(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        value: RenderImageHandle,
        request_id: u64,
    ) {
        self.record_set_property(
            handle,
            path.into(),
            DataType::AssetImage,
            request_id,
            |sink| sink.stream.push(value),
        );
    }

    pub fn set_view_model_instance_artboard(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        value: ArtboardHandle,
        request_id: u64,
    ) {
        self.record_set_property(handle, path.into(), DataType::Artboard, request_id, |sink| {
            sink.stream.push(value)
        });
    }

    pub fn set_view_model_instance_nested_view_model(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        value: ViewModelInstanceHandle,
        request_id: u64,
    ) {
        self.record_set_property(
            handle,
            path.into(),
            DataType::ViewModel,
            request_id,
            |sink| sink.stream.push(value),
        );
    }

    pub fn fire_view_model_trigger(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        request_id: u64,
    ) {
        let path = path.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::FireTrigger);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.names.push(path);
        });
    }

    fn record_request_property(
        &self,
        handle: ViewModelInstanceHandle,
        path: String,
        data_type: DataType,
        request_id: u64,
    ) {
        self.record(|sink| {
            sink.stream.push(CommandTag::RequestProperty);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.stream.push(data_type as u8);
            sink.names.push(path);
        });
    }

    /// The server replies with one `on_view_model_data` carrying the
    /// property's current value.
    pub fn request_view_model_instance_bool(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        request_id: u64,
    ) {
        self.record_request_property(handle, path.into(), DataType::Boolean, request_id);
    }

    pub fn request_view_model_instance_number(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        request_id: u64,
    ) {
        self.record_request_property(handle, path.into(), DataType::Number, request_id);
    }

    pub fn request_view_model_instance_color(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        request_id: u64,
    ) {
        self.record_request_property(handle, path.into(), DataType::Color, request_id);
    }

    pub fn request_view_model_instance_string(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        request_id: u64,
    ) {
        self.record_request_property(handle, path.into(), DataType::String, request_id);
    }

    pub fn request_view_model_instance_enum(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        request_id: u64,
    ) {
        self.record_request_property(handle, path.into(), DataType::EnumType, request_id);
    }

    /// The server replies with one `on_view_model_list_size`.
    pub fn request_view_model_instance_list_size(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        request_id: u64,
    ) {
        let path = path.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::RequestListSize);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.names.push(path);
        });
    }

    // ---------------------------------------------------------------------
    // Lists
    // ---------------------------------------------------------------------

    pub fn insert_view_model_list_value(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        index: u64,
        value: ViewModelInstanceHandle,
        request_id: u64,
    ) {
        let path = path.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::ListInsert);
            sink.stream.push(handle);
            sink.stream.push(value);
            sink.stream.push(request_id);
            sink.stream.push(index);
            sink.names.push(path);
        });
    }

    pub fn append_view_model_list_value(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        value: ViewModelInstanceHandle,
        request_id: u64,
    ) {
        let path = path.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::ListAppend);
            sink.stream.push(handle);
            sink.stream.push(value);
            sink.stream.push(request_id);
            sink.names.push(path);
        });
    }

    pub fn remove_view_model_list_value(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        index: u64,
        request_id: u64,
    ) {
        let path = path.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::ListRemove);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.stream.push(index);
            sink.names.push(path);
        });
    }

    pub fn swap_view_model_list_values(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        a: u64,
        b: u64,
        request_id: u64,
    ) {
        let path = path.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::ListSwap);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.stream.push(a);
            sink.stream.push(b);
            sink.names.push(path);
        });
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    /// After every drain in which the property's value changed, the server
    /// posts one `on_view_model_data` for the subscription. A bad path or
    /// mismatched type yields one error reply and no subscription.
    pub fn subscribe_view_model_property(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        data_type: DataType,
        request_id: u64,
    ) {
        let path = path.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::Subscribe);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.stream.push(data_type as u8);
            sink.names.push(path);
        });
    }

    /// Unsubscribing something that was never subscribed is silently ignored.
    pub fn unsubscribe_view_model_property(
        &self,
        handle: ViewModelInstanceHandle,
        path: impl Into<String>,
        data_type: DataType,
        request_id: u64,
    ) {
        let path = path.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::Unsubscribe);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.stream.push(data_type as u8);
            sink.names.push(path);
        });
    }

    // ---------------------------------------------------------------------
    // Assets
    // ---------------------------------------------------------------------

    pub fn decode_image(
        &self,
        bytes: Vec<u8>,
        listener: Option<&RenderImageListener>,
        request_id: u64,
    ) -> RenderImageHandle {
        self.record(|sink| {
            let handle = sink.handles.image();
            if let Some(listener) = listener {
                self.register_render_image_listener(handle, listener);
            }
            sink.stream.push(CommandTag::DecodeImage);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.byte_vectors.push(bytes);
            handle
        })
    }

    pub fn decode_audio(
        &self,
        bytes: Vec<u8>,
        listener: Option<&AudioSourceListener>,
        request_id: u64,
    ) -> AudioSourceHandle {
        self.record(|sink| {
            let handle = sink.handles.audio();
            if let Some(listener) = listener {
                self.register_audio_source_listener(handle, listener);
            }
            sink.stream.push(CommandTag::DecodeAudio);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.byte_vectors.push(bytes);
            handle
        })
    }

    pub fn decode_font(
        &self,
        bytes: Vec<u8>,
        listener: Option<&FontListener>,
        request_id: u64,
    ) -> FontHandle {
        self.record(|sink| {
            let handle = sink.handles.font();
            if let Some(listener) = listener {
                self.register_font_listener(handle, listener);
            }
            sink.stream.push(CommandTag::DecodeFont);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.byte_vectors.push(bytes);
            handle
        })
    }

    /// Hands an already-decoded image to the server under a fresh handle.
    pub fn add_external_image(
        &self,
        image: Arc<dyn RenderImage>,
        listener: Option<&RenderImageListener>,
        request_id: u64,
    ) -> RenderImageHandle {
        self.record(|sink| {
            let handle = sink.handles.image();
            if let Some(listener) = listener {
                self.register_render_image_listener(handle, listener);
            }
            sink.stream.push(CommandTag::AddExternalImage);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.external_images.push(image);
            handle
        })
    }

    pub fn add_external_audio(
        &self,
        audio: Arc<dyn AudioSource>,
        listener: Option<&AudioSourceListener>,
        request_id: u64,
    ) -> AudioSourceHandle {
        self.record(|sink| {
            let handle = sink.handles.audio();
            if let Some(listener) = listener {
                self.register_audio_source_listener(handle, listener);
            }
            sink.stream.push(CommandTag::AddExternalAudio);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.external_audio.push(audio);
            handle
        })
    }

    pub fn add_external_font(
        &self,
        font: Arc<dyn Font>,
        listener: Option<&FontListener>,
        request_id: u64,
    ) -> FontHandle {
        self.record(|sink| {
            let handle = sink.handles.font();
            if let Some(listener) = listener {
                self.register_font_listener(handle, listener);
            }
            sink.stream.push(CommandTag::AddExternalFont);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.external_fonts.push(font);
            handle
        })
    }

    pub fn delete_image(&self, handle: RenderImageHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::DeleteImage);
            sink.stream.push(handle);
            sink.stream.push(request_id);
        });
    }

    pub fn delete_audio(&self, handle: AudioSourceHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::DeleteAudio);
            sink.stream.push(handle);
            sink.stream.push(request_id);
        });
    }

    pub fn delete_font(&self, handle: FontHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::DeleteFont);
            sink.stream.push(handle);
            sink.stream.push(request_id);
        });
    }

    /// Publishes `handle` under `name` for asset resolution during later
    /// file loads. If the handle resolves to nothing on the server (a failed
    /// decode, a deleted asset) the slot is silently left unset.
    pub fn add_global_image_asset(&self, name: impl Into<String>, handle: RenderImageHandle) {
        let name = name.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::AddGlobalImage);
            sink.stream.push(handle);
            sink.names.push(name);
        });
    }

    pub fn add_global_audio_asset(&self, name: impl Into<String>, handle: AudioSourceHandle) {
        let name = name.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::AddGlobalAudio);
            sink.stream.push(handle);
            sink.names.push(name);
        });
    }

    pub fn add_global_font_asset(&self, name: impl Into<String>, handle: FontHandle) {
        let name = name.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::AddGlobalFont);
            sink.stream.push(handle);
            sink.names.push(name);
        });
    }

    pub fn remove_global_image_asset(&self, name: impl Into<String>) {
        let name = name.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::RemoveGlobalImage);
            sink.names.push(name);
        });
    }

    pub fn remove_global_audio_asset(&self, name: impl Into<String>) {
        let name = name.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::RemoveGlobalAudio);
            sink.names.push(name);
        });
    }

    pub fn remove_global_font_asset(&self, name: impl Into<String>) {
        let name = name.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::RemoveGlobalFont);
            sink.names.push(name);
        });
    }

    // ---------------------------------------------------------------------
    // Metadata probes
    // ---------------------------------------------------------------------

    pub fn request_artboard_names(&self, file: FileHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::ListArtboards);
            sink.stream.push(file);
            sink.stream.push(request_id);
        });
    }

    pub fn request_state_machine_names(&self, artboard: ArtboardHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::ListStateMachines);
            sink.stream.push(artboard);
            sink.stream.push(request_id);
        });
    }

    pub fn request_view_model_names(&self, file: FileHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::ListViewModels);
            sink.stream.push(file);
            sink.stream.push(request_id);
        });
    }

    pub fn request_view_model_instance_names(
        &self,
        file: FileHandle,
        view_model: impl Into<String>,
        request_id: u64,
    ) {
        let view_model = view_model.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::ListViewModelInstanceNames);
            sink.stream.push(file);
            sink.stream.push(request_id);
            sink.names.push(view_model);
        });
    }

    pub fn request_view_model_property_definitions(
        &self,
        file: FileHandle,
        view_model: impl Into<String>,
        request_id: u64,
    ) {
        let view_model = view_model.into();
        self.record(|sink| {
            sink.stream.push(CommandTag::ListViewModelProperties);
            sink.stream.push(file);
            sink.stream.push(request_id);
            sink.names.push(view_model);
        });
    }

    pub fn request_view_model_enums(&self, file: FileHandle, request_id: u64) {
        self.record(|sink| {
            sink.stream.push(CommandTag::ListViewModelEnums);
            sink.stream.push(file);
            sink.stream.push(request_id);
        });
    }

    /// Asks for the view model (and instance) the artboard was designed
    /// against; replies on the artboard listener.
    pub fn request_default_view_model_info(
        &self,
        artboard: ArtboardHandle,
        file: FileHandle,
        request_id: u64,
    ) {
        self.record(|sink| {
            sink.stream.push(CommandTag::RequestDefaultViewModelInfo);
            sink.stream.push(artboard);
            sink.stream.push(file);
            sink.stream.push(request_id);
        });
    }

    // ---------------------------------------------------------------------
    // Server work
    // ---------------------------------------------------------------------

    /// Allocates a fresh draw key. Safe from any thread.
    pub fn create_draw_key(&self) -> DrawKey {
        self.record(|sink| sink.handles.draw_key())
    }

    /// Schedules `callback` for the draw pass at the end of the next drain.
    /// Re-recording the same key before that drain replaces the callback;
    /// only the latest runs, once.
    pub fn draw(
        &self,
        key: DrawKey,
        callback: impl FnOnce(DrawKey, &mut CommandServer) + Send + 'static,
    ) {
        self.record(|sink| {
            sink.stream.push(CommandTag::Draw);
            sink.stream.push(key);
            sink.draw_callbacks.push(Box::new(callback));
        });
    }

    /// Runs `callback` once on the server thread, in stream order.
    pub fn run_once(&self, callback: impl FnOnce(&mut CommandServer) + Send + 'static) {
        self.record(|sink| {
            sink.stream.push(CommandTag::RunOnce);
            sink.callbacks.push(Box::new(callback));
        });
    }

    /// Records the terminal command. Once drained, the server executes
    /// nothing further and every drain returns `false`.
    pub fn disconnect(&self) {
        tracing::info!(target: "commands.queue", "disconnect");
        self.record(|sink| {
            sink.stream.push(CommandTag::Disconnect);
        });
    }

    /// Makes the *current* drain return even if more commands are queued.
    /// The server is not shut down; the next drain resumes where this one
    /// stopped.
    pub fn testing_command_loop_break(&self) {
        self.record(|sink| {
            sink.stream.push(CommandTag::CommandLoopBreak);
        });
    }

    // ---------------------------------------------------------------------
    // Message delivery
    // ---------------------------------------------------------------------

    /// Delivers every queued reply to its listeners. A break-out sentinel is
    /// appended up front so replies arriving *during* delivery wait for the
    /// next call. The message mutex is never held while a listener runs.
    pub fn process_messages(&self) {
        {
            let mut sink = self.inner.messages.lock();
            if sink.stream.is_empty() {
                return;
            }
            sink.stream.push(MessageTag::MessageLoopBreak);
        }
        loop {
            let message = {
                let mut sink = self.inner.messages.lock();
                DecodedMessage::decode(&mut sink)
            };
            if !self.dispatch(message) {
                return;
            }
        }
    }

    /// Returns `false` when the loop-break sentinel was reached.
    fn dispatch(&self, message: DecodedMessage) -> bool {
        use DecodedMessage as M;
        match message {
            M::LoopBreak => return false,
            M::FileLoaded { handle, request_id } => {
                for core in self.file_targets(handle) {
                    core.deliver(|e| e.on_file_loaded(handle, request_id));
                }
            }
            M::FileError {
                handle,
                request_id,
                error,
            } => {
                for core in self.file_targets(handle) {
                    core.deliver(|e| e.on_file_error(handle, request_id, error.clone()));
                }
            }
            M::FileDeleted { handle, request_id } => {
                for core in self.file_targets(handle) {
                    core.deliver(|e| e.on_file_deleted(handle, request_id));
                }
                self.inner.listeners.lock().files.remove(&handle);
            }
            M::ArtboardsListed {
                handle,
                request_id,
                names,
            } => {
                for core in self.file_targets(handle) {
                    core.deliver(|e| e.on_artboards_listed(handle, request_id, names.clone()));
                }
            }
            M::ViewModelsListed {
                handle,
                request_id,
                names,
            } => {
                for core in self.file_targets(handle) {
                    core.deliver(|e| e.on_view_models_listed(handle, request_id, names.clone()));
                }
            }
            M::ViewModelInstanceNamesListed {
                handle,
                request_id,
                view_model,
                names,
            } => {
                for core in self.file_targets(handle) {
                    core.deliver(|e| {
                        e.on_view_model_instance_names_listed(
                            handle,
                            request_id,
                            view_model.clone(),
                            names.clone(),
                        )
                    });
                }
            }
            M::ViewModelPropertiesListed {
                handle,
                request_id,
                view_model,
                properties,
            } => {
                for core in self.file_targets(handle) {
                    core.deliver(|e| {
                        e.on_view_model_properties_listed(
                            handle,
                            request_id,
                            view_model.clone(),
                            properties.clone(),
                        )
                    });
                }
            }
            M::ViewModelEnumsListed {
                handle,
                request_id,
                enums,
            } => {
                for core in self.file_targets(handle) {
                    core.deliver(|e| {
                        e.on_view_model_enums_listed(handle, request_id, enums.clone())
                    });
                }
            }
            M::ArtboardDeleted { handle, request_id } => {
                for core in self.artboard_targets(handle) {
                    core.deliver(|e| e.on_artboard_deleted(handle, request_id));
                }
                self.inner.listeners.lock().artboards.remove(&handle);
            }
            M::ArtboardError {
                handle,
                request_id,
                error,
            } => {
                for core in self.artboard_targets(handle) {
                    core.deliver(|e| e.on_artboard_error(handle, request_id, error.clone()));
                }
            }
            M::StateMachinesListed {
                handle,
                request_id,
                names,
            } => {
                for core in self.artboard_targets(handle) {
                    core.deliver(|e| {
                        e.on_state_machines_listed(handle, request_id, names.clone())
                    });
                }
            }
            M::DefaultViewModelInfo {
                handle,
                request_id,
                view_model,
                instance,
            } => {
                for core in self.artboard_targets(handle) {
                    core.deliver(|e| {
                        e.on_default_view_model_info(
                            handle,
                            request_id,
                            view_model.clone(),
                            instance.clone(),
                        )
                    });
                }
            }
            M::StateMachineDeleted { handle, request_id } => {
                for core in self.state_machine_targets(handle) {
                    core.deliver(|e| e.on_state_machine_deleted(handle, request_id));
                }
                self.inner.listeners.lock().state_machines.remove(&handle);
            }
            M::StateMachineError {
                handle,
                request_id,
                error,
            } => {
                for core in self.state_machine_targets(handle) {
                    core.deliver(|e| e.on_state_machine_error(handle, request_id, error.clone()));
                }
            }
            M::StateMachineSettled { handle, request_id } => {
                for core in self.state_machine_targets(handle) {
                    core.deliver(|e| e.on_state_machine_settled(handle, request_id));
                }
            }
            M::ViewModelDeleted { handle, request_id } => {
                for core in self.view_model_targets(handle) {
                    core.deliver(|e| e.on_view_model_deleted(handle, request_id));
                }
                self.inner.listeners.lock().view_models.remove(&handle);
            }
            M::ViewModelError {
                handle,
                request_id,
                error,
            } => {
                for core in self.view_model_targets(handle) {
                    core.deliver(|e| e.on_view_model_error(handle, request_id, error.clone()));
                }
            }
            M::ViewModelData {
                handle,
                request_id,
                data,
            } => {
                for core in self.view_model_targets(handle) {
                    core.deliver(|e| e.on_view_model_data(handle, request_id, data.clone()));
                }
            }
            M::ViewModelListSize {
                handle,
                request_id,
                path,
                size,
            } => {
                for core in self.view_model_targets(handle) {
                    core.deliver(|e| {
                        e.on_view_model_list_size(handle, request_id, path.clone(), size)
                    });
                }
            }
            M::RenderImageDecoded { handle, request_id } => {
                for core in self.render_image_targets(handle) {
                    core.deliver(|e| e.on_render_image_decoded(handle, request_id));
                }
            }
            M::RenderImageDeleted { handle, request_id } => {
                for core in self.render_image_targets(handle) {
                    core.deliver(|e| e.on_render_image_deleted(handle, request_id));
                }
                self.inner.listeners.lock().images.remove(&handle);
            }
            M::RenderImageError {
                handle,
                request_id,
                error,
            } => {
                for core in self.render_image_targets(handle) {
                    core.deliver(|e| e.on_render_image_error(handle, request_id, error.clone()));
                }
            }
            M::AudioSourceDecoded { handle, request_id } => {
                for core in self.audio_source_targets(handle) {
                    core.deliver(|e| e.on_audio_source_decoded(handle, request_id));
                }
            }
            M::AudioSourceDeleted { handle, request_id } => {
                for core in self.audio_source_targets(handle) {
                    core.deliver(|e| e.on_audio_source_deleted(handle, request_id));
                }
                self.inner.listeners.lock().audio.remove(&handle);
            }
            M::AudioSourceError {
                handle,
                request_id,
                error,
            } => {
                for core in self.audio_source_targets(handle) {
                    core.deliver(|e| e.on_audio_source_error(handle, request_id, error.clone()));
                }
            }
            M::FontDecoded { handle, request_id } => {
                for core in self.font_targets(handle) {
                    core.deliver(|e| e.on_font_decoded(handle, request_id));
                }
            }
            M::FontDeleted { handle, request_id } => {
                for core in self.font_targets(handle) {
                    core.deliver(|e| e.on_font_deleted(handle, request_id));
                }
                self.inner.listeners.lock().fonts.remove(&handle);
            }
            M::FontError {
                handle,
                request_id,
                error,
            } => {
                for core in self.font_targets(handle) {
                    core.deliver(|e| e.on_font_error(handle, request_id, error.clone()));
                }
            }
        }
        true
    }
}

/// Registration plumbing, one block per listener category.
macro_rules! listener_plumbing {
    (
        $listener:ty, $core:ty, $handle:ty, $map:ident, $global:ident,
        $register:ident, $unregister:ident, $set_global:ident, $targets:ident,
        $testing_has:ident
    ) => {
        impl CommandQueue {
            pub(crate) fn $register(&self, handle: $handle, listener: &$listener) {
                let previous = {
                    let mut binding = listener.core.binding.lock();
                    let previous = binding.handle.take();
                    binding.queue = Some(self.clone());
                    binding.handle = Some(handle);
                    previous
                };
                let mut registries = self.inner.listeners.lock();
                // At most one handle per listener: a re-registration moves
                // the binding.
                if let Some(previous) = previous {
                    registries.$map.remove(&previous);
                }
                registries
                    .$map
                    .insert(handle, Arc::downgrade(&listener.core));
            }

            pub(crate) fn $unregister(&self, handle: $handle, core: &Arc<$core>) {
                let mut registries = self.inner.listeners.lock();
                if let Some(existing) = registries.$map.get(&handle)
                    && Weak::ptr_eq(existing, &Arc::downgrade(core))
                {
                    registries.$map.remove(&handle);
                }
            }

            /// Installs (or clears) the category's global listener, which
            /// receives every reply of the category alongside any per-handle
            /// listener.
            pub fn $set_global(&self, listener: Option<&$listener>) {
                self.inner.listeners.lock().$global =
                    listener.map(|l| Arc::downgrade(&l.core));
            }

            fn $targets(&self, handle: $handle) -> Vec<Arc<$core>> {
                let registries = self.inner.listeners.lock();
                let mut out = Vec::new();
                if let Some(core) = registries.$map.get(&handle).and_then(Weak::upgrade) {
                    out.push(core);
                }
                if let Some(core) = registries.$global.as_ref().and_then(Weak::upgrade) {
                    out.push(core);
                }
                out
            }

            /// Whether a live listener is registered for `handle`.
            pub fn $testing_has(&self, handle: $handle) -> bool {
                self.inner
                    .listeners
                    .lock()
                    .$map
                    .get(&handle)
                    .and_then(Weak::upgrade)
                    .is_some()
            }
        }
    };
}

listener_plumbing!(
    FileListener,
    FileListenerCore,
    FileHandle,
    files,
    global_file,
    register_file_listener,
    unregister_file_listener,
    set_global_file_listener,
    file_targets,
    testing_has_file_listener
);
listener_plumbing!(
    ArtboardListener,
    ArtboardListenerCore,
    ArtboardHandle,
    artboards,
    global_artboard,
    register_artboard_listener,
    unregister_artboard_listener,
    set_global_artboard_listener,
    artboard_targets,
    testing_has_artboard_listener
);
listener_plumbing!(
    StateMachineListener,
    StateMachineListenerCore,
    StateMachineHandle,
    state_machines,
    global_state_machine,
    register_state_machine_listener,
    unregister_state_machine_listener,
    set_global_state_machine_listener,
    state_machine_targets,
    testing_has_state_machine_listener
);
listener_plumbing!(
    ViewModelInstanceListener,
    ViewModelListenerCore,
    ViewModelInstanceHandle,
    view_models,
    global_view_model,
    register_view_model_listener,
    unregister_view_model_listener,
    set_global_view_model_instance_listener,
    view_model_targets,
    testing_has_view_model_instance_listener
);
listener_plumbing!(
    RenderImageListener,
    RenderImageListenerCore,
    RenderImageHandle,
    images,
    global_image,
    register_render_image_listener,
    unregister_render_image_listener,
    set_global_render_image_listener,
    render_image_targets,
    testing_has_render_image_listener
);
listener_plumbing!(
    AudioSourceListener,
    AudioSourceListenerCore,
    AudioSourceHandle,
    audio,
    global_audio,
    register_audio_source_listener,
    unregister_audio_source_listener,
    set_global_audio_source_listener,
    audio_source_targets,
    testing_has_audio_source_listener
);
listener_plumbing!(
    FontListener,
    FontListenerCore,
    FontHandle,
    fonts,
    global_font,
    register_font_listener,
    unregister_font_listener,
    set_global_font_listener,
    font_targets,
    testing_has_font_listener
);

/// One reply, fully detached from the streams so no lock is held while
/// listeners run.
enum DecodedMessage {
    LoopBreak,
    FileLoaded {
        handle: FileHandle,
        request_id: u64,
    },
    FileError {
        handle: FileHandle,
        request_id: u64,
        error: String,
    },
    FileDeleted {
        handle: FileHandle,
        request_id: u64,
    },
    ArtboardsListed {
        handle: FileHandle,
        request_id: u64,
        names: Vec<String>,
    },
    ViewModelsListed {
        handle: FileHandle,
        request_id: u64,
        names: Vec<String>,
    },
    ViewModelInstanceNamesListed {
        handle: FileHandle,
        request_id: u64,
        view_model: String,
        names: Vec<String>,
    },
    ViewModelPropertiesListed {
        handle: FileHandle,
        request_id: u64,
        view_model: String,
        properties: Vec<PropertyData>,
    },
    ViewModelEnumsListed {
        handle: FileHandle,
        request_id: u64,
        enums: Vec<ViewModelEnum>,
    },
    ArtboardDeleted {
        handle: ArtboardHandle,
        request_id: u64,
    },
    ArtboardError {
        handle: ArtboardHandle,
        request_id: u64,
        error: String,
    },
    StateMachinesListed {
        handle: ArtboardHandle,
        request_id: u64,
        names: Vec<String>,
    },
    DefaultViewModelInfo {
        handle: ArtboardHandle,
        request_id: u64,
        view_model: String,
        instance: String,
    },
    StateMachineDeleted {
        handle: StateMachineHandle,
        request_id: u64,
    },
    StateMachineError {
        handle: StateMachineHandle,
        request_id: u64,
        error: String,
    },
    StateMachineSettled {
        handle: StateMachineHandle,
        request_id: u64,
    },
    ViewModelDeleted {
        handle: ViewModelInstanceHandle,
        request_id: u64,
    },
    ViewModelError {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        error: String,
    },
    ViewModelData {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        data: ViewModelInstanceData,
    },
    ViewModelListSize {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
        size: u64,
    },
    RenderImageDecoded {
        handle: RenderImageHandle,
        request_id: u64,
    },
    RenderImageDeleted {
        handle: RenderImageHandle,
        request_id: u64,
    },
    RenderImageError {
        handle: RenderImageHandle,
        request_id: u64,
        error: String,
    },
    AudioSourceDecoded {
        handle: AudioSourceHandle,
        request_id: u64,
    },
    AudioSourceDeleted {
        handle: AudioSourceHandle,
        request_id: u64,
    },
    AudioSourceError {
        handle: AudioSourceHandle,
        request_id: u64,
        error: String,
    },
    FontDecoded {
        handle: FontHandle,
        request_id: u64,
    },
    FontDeleted {
        handle: FontHandle,
        request_id: u64,
    },
    FontError {
        handle: FontHandle,
        request_id: u64,
        error: String,
    },
}

impl DecodedMessage {
    fn decode(sink: &mut MessageSink) -> Self {
        use DecodedMessage as M;
        let tag = sink.stream.pop::<MessageTag>();
        match tag {
            MessageTag::MessageLoopBreak => M::LoopBreak,
            MessageTag::FileLoaded => M::FileLoaded {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::FileError => M::FileError {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                error: sink.names.pop(),
            },
            MessageTag::FileDeleted => M::FileDeleted {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::ArtboardsListed => {
                let handle = sink.stream.pop();
                let request_id = sink.stream.pop();
                let names = Self::decode_names(sink);
                M::ArtboardsListed {
                    handle,
                    request_id,
                    names,
                }
            }
            MessageTag::ViewModelsListed => {
                let handle = sink.stream.pop();
                let request_id = sink.stream.pop();
                let names = Self::decode_names(sink);
                M::ViewModelsListed {
                    handle,
                    request_id,
                    names,
                }
            }
            MessageTag::ViewModelInstanceNamesListed => {
                let handle = sink.stream.pop();
                let request_id = sink.stream.pop();
                let count = sink.stream.pop::<usize>();
                let view_model = sink.names.pop();
                let names = (0..count).map(|_| sink.names.pop()).collect();
                M::ViewModelInstanceNamesListed {
                    handle,
                    request_id,
                    view_model,
                    names,
                }
            }
            MessageTag::ViewModelPropertiesListed => {
                let handle = sink.stream.pop();
                let request_id = sink.stream.pop();
                let count = sink.stream.pop::<usize>();
                let view_model = sink.names.pop();
                let properties = (0..count)
                    .map(|_| {
                        let data_type = DataType::from_u8(sink.stream.pop::<u8>())
                            .unwrap_or_else(|| panic!("corrupt stream: unknown DataType"));
                        let name = sink.names.pop();
                        let meta = sink.names.pop();
                        PropertyData::with_meta(data_type, name, meta)
                    })
                    .collect();
                M::ViewModelPropertiesListed {
                    handle,
                    request_id,
                    view_model,
                    properties,
                }
            }
            MessageTag::ViewModelEnumsListed => {
                let handle = sink.stream.pop();
                let request_id = sink.stream.pop();
                let count = sink.stream.pop::<usize>();
                let enums = (0..count)
                    .map(|_| {
                        let name = sink.names.pop();
                        let enumerants = Self::decode_names(sink);
                        ViewModelEnum { name, enumerants }
                    })
                    .collect();
                M::ViewModelEnumsListed {
                    handle,
                    request_id,
                    enums,
                }
            }
            MessageTag::ArtboardDeleted => M::ArtboardDeleted {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::ArtboardError => M::ArtboardError {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                error: sink.names.pop(),
            },
            MessageTag::StateMachinesListed => {
                let handle = sink.stream.pop();
                let request_id = sink.stream.pop();
                let names = Self::decode_names(sink);
                M::StateMachinesListed {
                    handle,
                    request_id,
                    names,
                }
            }
            MessageTag::DefaultViewModelInfo => M::DefaultViewModelInfo {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                view_model: sink.names.pop(),
                instance: sink.names.pop(),
            },
            MessageTag::StateMachineDeleted => M::StateMachineDeleted {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::StateMachineError => M::StateMachineError {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                error: sink.names.pop(),
            },
            MessageTag::StateMachineSettled => M::StateMachineSettled {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::ViewModelDeleted => M::ViewModelDeleted {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::ViewModelError => M::ViewModelError {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                error: sink.names.pop(),
            },
            MessageTag::ViewModelData => {
                let handle = sink.stream.pop();
                let request_id = sink.stream.pop();
                let data = ViewModelInstanceData::decode(&mut sink.stream, &mut sink.names);
                M::ViewModelData {
                    handle,
                    request_id,
                    data,
                }
            }
            MessageTag::ViewModelListSize => M::ViewModelListSize {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                size: sink.stream.pop(),
                path: sink.names.pop(),
            },
            MessageTag::RenderImageDecoded => M::RenderImageDecoded {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::RenderImageDeleted => M::RenderImageDeleted {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::RenderImageError => M::RenderImageError {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                error: sink.names.pop(),
            },
            MessageTag::AudioSourceDecoded => M::AudioSourceDecoded {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::AudioSourceDeleted => M::AudioSourceDeleted {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::AudioSourceError => M::AudioSourceError {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                error: sink.names.pop(),
            },
            MessageTag::FontDecoded => M::FontDecoded {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::FontDeleted => M::FontDeleted {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            MessageTag::FontError => M::FontError {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                error: sink.names.pop(),
            },
        }
    }

    fn decode_names(sink: &mut MessageSink) -> Vec<String> {
        let count = sink.stream.pop::<usize>();
        (0..count).map(|_| sink.names.pop()).collect()
    }
}
