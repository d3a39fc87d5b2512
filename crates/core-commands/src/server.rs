//! The executing side of the command boundary.
//!
//! A [`CommandServer`] owns the real resources behind every handle and is
//! driven from exactly one thread: the one that constructed it. Each drain
//! pops one fully decoded command at a time — the command mutex is held only
//! while reading a single record, never while factory calls, scene advances,
//! or user callbacks run — executes it, and repeats until the stream is
//! empty, a break-out sentinel is hit, or a disconnect latches.
//!
//! Every drain that ran commands finishes with an epilogue: one sweep over
//! the subscription set (posting a reply for each property whose value
//! changed since the previous drain), then one pass over the coalesced draw
//! slots (running the latest callback recorded per key, exactly once). A
//! latched disconnect skips the epilogue and every later drain returns
//! `false` without executing anything.
//!
//! Operational errors never unwind: the server posts one category-scoped
//! error reply and moves on.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::data::ViewModelInstanceData;
use crate::handle::{
    ArtboardHandle, AudioSourceHandle, DrawKey, FileHandle, FontHandle, RenderImageHandle,
    StateMachineHandle, ViewModelInstanceHandle,
};
use crate::protocol::{CommandTag, MessageTag};
use crate::queue::{
    CommandQueue, CommandSink, MessageSink, PointerEvent, ServerCallback, ServerDrawCallback,
};
use core_scene::{
    Aabb, ArtboardInstance, AudioSource, DataType, Factory, FileAssetLoader, FileSource, Fit,
    Font, PropertyValue, RenderImage, StateMachineInstance, Vec2D, ViewModelRef, artboard_point,
};
use core_stream::Pod;

struct FileEntry {
    file: Box<dyn FileSource>,
}

struct ArtboardEntry {
    artboard: Box<dyn ArtboardInstance>,
    file: FileHandle,
}

struct StateMachineEntry {
    machine: Box<dyn StateMachineInstance>,
    artboard: ArtboardHandle,
    settled: bool,
}

struct ViewModelEntry {
    instance: ViewModelRef,
    file: FileHandle,
    /// Set for nested / list references so deleting the parent instance
    /// removes them too.
    parent: Option<ViewModelInstanceHandle>,
}

/// Identity of one standing change subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub handle: ViewModelInstanceHandle,
    pub path: String,
    pub data_type: DataType,
}

/// Server-side worker that executes commands recorded into a
/// [`CommandQueue`].
pub struct CommandServer {
    queue: CommandQueue,
    factory: Box<dyn Factory>,
    disconnected: bool,
    thread_id: ThreadId,

    files: HashMap<FileHandle, FileEntry>,
    artboards: HashMap<ArtboardHandle, ArtboardEntry>,
    state_machines: HashMap<StateMachineHandle, StateMachineEntry>,
    view_models: HashMap<ViewModelInstanceHandle, ViewModelEntry>,
    images: HashMap<RenderImageHandle, Arc<dyn RenderImage>>,
    audio: HashMap<AudioSourceHandle, Arc<dyn AudioSource>>,
    fonts: HashMap<FontHandle, Arc<dyn Font>>,

    global_images: HashMap<String, (RenderImageHandle, Arc<dyn RenderImage>)>,
    global_audio: HashMap<String, (AudioSourceHandle, Arc<dyn AudioSource>)>,
    global_fonts: HashMap<String, (FontHandle, Arc<dyn Font>)>,

    pending_draws: HashMap<DrawKey, ServerDrawCallback>,
    subscriptions: HashMap<SubscriptionKey, PropertyValue>,
}

impl CommandServer {
    /// The constructing thread becomes the server thread; every drain must
    /// run on it.
    pub fn new(queue: CommandQueue, factory: Box<dyn Factory>) -> Self {
        Self {
            queue,
            factory,
            disconnected: false,
            thread_id: thread::current().id(),
            files: HashMap::new(),
            artboards: HashMap::new(),
            state_machines: HashMap::new(),
            view_models: HashMap::new(),
            images: HashMap::new(),
            audio: HashMap::new(),
            fonts: HashMap::new(),
            global_images: HashMap::new(),
            global_audio: HashMap::new(),
            global_fonts: HashMap::new(),
            pending_draws: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    pub fn factory(&self) -> &dyn Factory {
        self.factory.as_ref()
    }

    pub fn was_disconnected(&self) -> bool {
        self.disconnected
    }

    // ---------------------------------------------------------------------
    // Handle resolution
    // ---------------------------------------------------------------------

    pub fn file(&self, handle: FileHandle) -> Option<&dyn FileSource> {
        self.files.get(&handle).map(|entry| entry.file.as_ref())
    }

    pub fn artboard(&self, handle: ArtboardHandle) -> Option<&dyn ArtboardInstance> {
        self.artboards
            .get(&handle)
            .map(|entry| entry.artboard.as_ref())
    }

    pub fn state_machine(&self, handle: StateMachineHandle) -> Option<&dyn StateMachineInstance> {
        self.state_machines
            .get(&handle)
            .map(|entry| entry.machine.as_ref())
    }

    pub fn view_model(&self, handle: ViewModelInstanceHandle) -> Option<ViewModelRef> {
        self.view_models
            .get(&handle)
            .map(|entry| entry.instance.clone())
    }

    pub fn image(&self, handle: RenderImageHandle) -> Option<Arc<dyn RenderImage>> {
        self.images.get(&handle).cloned()
    }

    pub fn audio_source(&self, handle: AudioSourceHandle) -> Option<Arc<dyn AudioSource>> {
        self.audio.get(&handle).cloned()
    }

    pub fn font(&self, handle: FontHandle) -> Option<Arc<dyn Font>> {
        self.fonts.get(&handle).cloned()
    }

    // ---------------------------------------------------------------------
    // Drain loops
    // ---------------------------------------------------------------------

    /// Drains every currently queued command without blocking. Returns
    /// `false` iff a disconnect has been drained.
    pub fn poll_commands(&mut self) -> bool {
        debug_assert_eq!(
            thread::current().id(),
            self.thread_id,
            "drains must run on the server thread"
        );
        if self.disconnected {
            return false;
        }
        loop {
            let command = {
                let mut sink = self.queue.inner.commands.lock();
                if sink.stream.is_empty() {
                    break;
                }
                Cmd::decode(&mut sink)
            };
            match command {
                Cmd::Disconnect => {
                    tracing::info!(target: "commands.server", "disconnect drained");
                    self.disconnected = true;
                    return false;
                }
                Cmd::LoopBreak => break,
                command => self.execute(command),
            }
        }
        self.sweep_subscriptions();
        self.flush_draws();
        true
    }

    /// Blocks until the command stream is non-empty, then drains it.
    pub fn wait_commands(&mut self) -> bool {
        debug_assert_eq!(
            thread::current().id(),
            self.thread_id,
            "drains must run on the server thread"
        );
        if self.disconnected {
            return false;
        }
        {
            let mut sink = self.queue.inner.commands.lock();
            while sink.stream.is_empty() {
                self.queue.inner.commands_ready.wait(&mut sink);
            }
        }
        self.poll_commands()
    }

    /// Serves drains until a disconnect is drained.
    pub fn serve_until_disconnect(&mut self) {
        while self.wait_commands() {}
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    fn execute(&mut self, command: Cmd) {
        match command {
            Cmd::LoopBreak | Cmd::Disconnect => unreachable!("handled by the drain loop"),
            Cmd::LoadFile {
                handle,
                request_id,
                loader,
                bytes,
            } => match self.factory.load_file(bytes, loader) {
                Ok(file) => {
                    self.files.insert(handle, FileEntry { file });
                    self.post_status(MessageTag::FileLoaded, handle, request_id);
                }
                Err(error) => {
                    self.post_error(MessageTag::FileError, handle, request_id, error.to_string())
                }
            },
            Cmd::DeleteFile { handle, request_id } => self.exec_delete_file(handle, request_id),
            Cmd::InstantiateArtboard {
                handle,
                file,
                request_id,
                name,
            } => self.exec_instantiate_artboard(handle, file, request_id, name),
            Cmd::DeleteArtboard { handle, request_id } => self.remove_artboard(handle, request_id),
            Cmd::InstantiateStateMachine {
                handle,
                artboard,
                request_id,
                name,
            } => self.exec_instantiate_state_machine(handle, artboard, request_id, name),
            Cmd::DeleteStateMachine { handle, request_id } => {
                self.remove_state_machine(handle, request_id)
            }
            Cmd::AdvanceStateMachine {
                handle,
                request_id,
                dt,
            } => self.exec_advance_state_machine(handle, request_id, dt),
            Cmd::BindViewModel {
                handle,
                instance,
                request_id,
            } => self.exec_bind_view_model(handle, instance, request_id),
            Cmd::Pointer {
                kind,
                handle,
                event,
            } => self.exec_pointer(kind, handle, event),
            Cmd::InstantiateViewModel {
                handle,
                file,
                request_id,
                view_model,
                instance,
            } => self.exec_instantiate_view_model(handle, file, request_id, view_model, instance),
            Cmd::InstantiateBlankViewModel {
                handle,
                file,
                request_id,
                view_model,
            } => self.exec_instantiate_blank_view_model(handle, file, request_id, view_model),
            Cmd::InstantiateViewModelForArtboard {
                handle,
                file,
                artboard,
                request_id,
                instance,
            } => self.exec_instantiate_view_model_for_artboard(
                handle, file, artboard, request_id, instance,
            ),
            Cmd::InstantiateBlankViewModelForArtboard {
                handle,
                file,
                artboard,
                request_id,
            } => self.exec_instantiate_blank_view_model_for_artboard(
                handle, file, artboard, request_id,
            ),
            Cmd::DeleteViewModel { handle, request_id } => {
                self.remove_view_model(handle, request_id)
            }
            Cmd::ReferenceNestedViewModel {
                handle,
                parent,
                request_id,
                path,
            } => self.exec_reference_nested(handle, parent, request_id, path),
            Cmd::ReferenceListViewModel {
                handle,
                parent,
                request_id,
                index,
                path,
            } => self.exec_reference_list(handle, parent, request_id, index, path),
            Cmd::SetProperty {
                handle,
                request_id,
                path,
                value,
            } => self.exec_set_property(handle, request_id, path, value),
            Cmd::FireTrigger {
                handle,
                request_id,
                path,
            } => self.exec_fire_trigger(handle, request_id, path),
            Cmd::RequestProperty {
                handle,
                request_id,
                data_type,
                path,
            } => self.exec_request_property(handle, request_id, data_type, path),
            Cmd::RequestListSize {
                handle,
                request_id,
                path,
            } => self.exec_request_list_size(handle, request_id, path),
            Cmd::ListInsert {
                handle,
                value,
                request_id,
                index,
                path,
            } => self.exec_list_insert(handle, value, request_id, index, path),
            Cmd::ListAppend {
                handle,
                value,
                request_id,
                path,
            } => self.exec_list_append(handle, value, request_id, path),
            Cmd::ListRemove {
                handle,
                request_id,
                index,
                path,
            } => self.exec_list_remove(handle, request_id, index, path),
            Cmd::ListSwap {
                handle,
                request_id,
                a,
                b,
                path,
            } => self.exec_list_swap(handle, request_id, a, b, path),
            Cmd::Subscribe {
                handle,
                request_id,
                data_type,
                path,
            } => self.exec_subscribe(handle, request_id, data_type, path),
            Cmd::Unsubscribe {
                handle,
                data_type,
                path,
                ..
            } => {
                self.subscriptions.remove(&SubscriptionKey {
                    handle,
                    path,
                    data_type,
                });
            }
            Cmd::DecodeImage {
                handle,
                request_id,
                bytes,
            } => match self.factory.decode_image(bytes) {
                Ok(image) => {
                    self.images.insert(handle, image);
                    self.post_status(MessageTag::RenderImageDecoded, handle, request_id);
                }
                Err(error) => self.post_error(
                    MessageTag::RenderImageError,
                    handle,
                    request_id,
                    error.to_string(),
                ),
            },
            Cmd::DecodeAudio {
                handle,
                request_id,
                bytes,
            } => match self.factory.decode_audio(bytes) {
                Ok(audio) => {
                    self.audio.insert(handle, audio);
                    self.post_status(MessageTag::AudioSourceDecoded, handle, request_id);
                }
                Err(error) => self.post_error(
                    MessageTag::AudioSourceError,
                    handle,
                    request_id,
                    error.to_string(),
                ),
            },
            Cmd::DecodeFont {
                handle,
                request_id,
                bytes,
            } => match self.factory.decode_font(bytes) {
                Ok(font) => {
                    self.fonts.insert(handle, font);
                    self.post_status(MessageTag::FontDecoded, handle, request_id);
                }
                Err(error) => self.post_error(
                    MessageTag::FontError,
                    handle,
                    request_id,
                    error.to_string(),
                ),
            },
            Cmd::AddExternalImage {
                handle,
                request_id,
                image,
            } => {
                self.images.insert(handle, image);
                self.post_status(MessageTag::RenderImageDecoded, handle, request_id);
            }
            Cmd::AddExternalAudio {
                handle,
                request_id,
                audio,
            } => {
                self.audio.insert(handle, audio);
                self.post_status(MessageTag::AudioSourceDecoded, handle, request_id);
            }
            Cmd::AddExternalFont {
                handle,
                request_id,
                font,
            } => {
                self.fonts.insert(handle, font);
                self.post_status(MessageTag::FontDecoded, handle, request_id);
            }
            Cmd::DeleteImage { handle, request_id } => {
                if self.images.remove(&handle).is_some() {
                    self.global_images.retain(|_, slot| slot.0 != handle);
                    self.post_status(MessageTag::RenderImageDeleted, handle, request_id);
                }
            }
            Cmd::DeleteAudio { handle, request_id } => {
                if self.audio.remove(&handle).is_some() {
                    self.global_audio.retain(|_, slot| slot.0 != handle);
                    self.post_status(MessageTag::AudioSourceDeleted, handle, request_id);
                }
            }
            Cmd::DeleteFont { handle, request_id } => {
                if self.fonts.remove(&handle).is_some() {
                    self.global_fonts.retain(|_, slot| slot.0 != handle);
                    self.post_status(MessageTag::FontDeleted, handle, request_id);
                }
            }
            // A slot only forms when the handle resolves; publishing a failed
            // decode is a silent no-op.
            Cmd::AddGlobalImage { handle, name } => {
                if let Some(image) = self.images.get(&handle).cloned() {
                    self.global_images.insert(name, (handle, image));
                }
            }
            Cmd::AddGlobalAudio { handle, name } => {
                if let Some(audio) = self.audio.get(&handle).cloned() {
                    self.global_audio.insert(name, (handle, audio));
                }
            }
            Cmd::AddGlobalFont { handle, name } => {
                if let Some(font) = self.fonts.get(&handle).cloned() {
                    self.global_fonts.insert(name, (handle, font));
                }
            }
            Cmd::RemoveGlobalImage { name } => {
                self.global_images.remove(&name);
            }
            Cmd::RemoveGlobalAudio { name } => {
                self.global_audio.remove(&name);
            }
            Cmd::RemoveGlobalFont { name } => {
                self.global_fonts.remove(&name);
            }
            Cmd::ListArtboards { file, request_id } => match self.files.get(&file) {
                Some(entry) => {
                    let names = entry.file.artboard_names();
                    self.post_names(MessageTag::ArtboardsListed, file, request_id, names);
                }
                None => self.post_dead_file(file, request_id),
            },
            Cmd::ListStateMachines {
                artboard,
                request_id,
            } => match self.artboards.get(&artboard) {
                Some(entry) => {
                    let names = entry.artboard.state_machine_names();
                    self.post_names(MessageTag::StateMachinesListed, artboard, request_id, names);
                }
                None => self.post_dead_artboard(artboard, request_id),
            },
            Cmd::ListViewModels { file, request_id } => match self.files.get(&file) {
                Some(entry) => {
                    let names = entry.file.view_model_names();
                    self.post_names(MessageTag::ViewModelsListed, file, request_id, names);
                }
                None => self.post_dead_file(file, request_id),
            },
            Cmd::ListViewModelInstanceNames {
                file,
                request_id,
                view_model,
            } => match self.files.get(&file) {
                Some(entry) => match entry.file.view_model_instance_names(&view_model) {
                    Ok(names) => self.post_view_model_instance_names(
                        file, request_id, view_model, names,
                    ),
                    Err(error) => self.post_error(
                        MessageTag::FileError,
                        file,
                        request_id,
                        error.to_string(),
                    ),
                },
                None => self.post_dead_file(file, request_id),
            },
            Cmd::ListViewModelProperties {
                file,
                request_id,
                view_model,
            } => match self.files.get(&file) {
                Some(entry) => match entry.file.view_model_properties(&view_model) {
                    Ok(properties) => self.post_view_model_properties(
                        file, request_id, view_model, properties,
                    ),
                    Err(error) => self.post_error(
                        MessageTag::FileError,
                        file,
                        request_id,
                        error.to_string(),
                    ),
                },
                None => self.post_dead_file(file, request_id),
            },
            Cmd::ListViewModelEnums { file, request_id } => match self.files.get(&file) {
                Some(entry) => {
                    let enums = entry.file.view_model_enums();
                    self.post_view_model_enums(file, request_id, enums);
                }
                None => self.post_dead_file(file, request_id),
            },
            Cmd::RequestDefaultViewModelInfo {
                artboard,
                request_id,
                ..
            } => match self.artboards.get(&artboard) {
                Some(entry) => match entry.artboard.default_view_model_info() {
                    Some((view_model, instance)) => {
                        self.post_message(|sink| {
                            sink.stream.push(MessageTag::DefaultViewModelInfo);
                            sink.stream.push(artboard);
                            sink.stream.push(request_id);
                            sink.names.push(view_model);
                            sink.names.push(instance);
                        });
                    }
                    None => self.post_error(
                        MessageTag::ArtboardError,
                        artboard,
                        request_id,
                        "artboard has no default view model".to_string(),
                    ),
                },
                None => self.post_dead_artboard(artboard, request_id),
            },
            Cmd::RunOnce { callback } => callback(self),
            Cmd::Draw { key, callback } => {
                // Latest per key wins; the slot drains once per poll.
                self.pending_draws.insert(key, callback);
            }
        }
    }

    fn exec_delete_file(&mut self, handle: FileHandle, request_id: u64) {
        if self.files.remove(&handle).is_none() {
            tracing::trace!(target: "commands.server", handle = handle.as_raw(), "deleteFile on dead handle");
            return;
        }
        let orphaned: Vec<ArtboardHandle> = self
            .artboards
            .iter()
            .filter(|(_, entry)| entry.file == handle)
            .map(|(artboard, _)| *artboard)
            .collect();
        for artboard in orphaned {
            self.remove_artboard(artboard, 0);
        }
        let orphaned: Vec<ViewModelInstanceHandle> = self
            .view_models
            .iter()
            .filter(|(_, entry)| entry.file == handle)
            .map(|(instance, _)| *instance)
            .collect();
        for instance in orphaned {
            self.remove_view_model(instance, 0);
        }
        self.post_status(MessageTag::FileDeleted, handle, request_id);
    }

    fn remove_artboard(&mut self, handle: ArtboardHandle, request_id: u64) {
        if self.artboards.remove(&handle).is_none() {
            return;
        }
        let orphaned: Vec<StateMachineHandle> = self
            .state_machines
            .iter()
            .filter(|(_, entry)| entry.artboard == handle)
            .map(|(machine, _)| *machine)
            .collect();
        for machine in orphaned {
            self.remove_state_machine(machine, 0);
        }
        self.post_status(MessageTag::ArtboardDeleted, handle, request_id);
    }

    fn remove_state_machine(&mut self, handle: StateMachineHandle, request_id: u64) {
        if self.state_machines.remove(&handle).is_some() {
            self.post_status(MessageTag::StateMachineDeleted, handle, request_id);
        }
    }

    fn remove_view_model(&mut self, handle: ViewModelInstanceHandle, request_id: u64) {
        if self.view_models.remove(&handle).is_none() {
            return;
        }
        self.subscriptions.retain(|key, _| key.handle != handle);
        let orphaned: Vec<ViewModelInstanceHandle> = self
            .view_models
            .iter()
            .filter(|(_, entry)| entry.parent == Some(handle))
            .map(|(child, _)| *child)
            .collect();
        for child in orphaned {
            self.remove_view_model(child, 0);
        }
        self.post_status(MessageTag::ViewModelDeleted, handle, request_id);
    }

    fn exec_instantiate_artboard(
        &mut self,
        handle: ArtboardHandle,
        file: FileHandle,
        request_id: u64,
        name: String,
    ) {
        let Some(entry) = self.files.get(&file) else {
            self.post_dead_file(file, request_id);
            return;
        };
        let result = if name.is_empty() {
            entry.file.artboard_default()
        } else {
            entry.file.artboard_named(&name)
        };
        match result {
            Ok(artboard) => {
                self.artboards.insert(handle, ArtboardEntry { artboard, file });
            }
            Err(error) => {
                self.post_error(MessageTag::FileError, file, request_id, error.to_string())
            }
        }
    }

    fn exec_instantiate_state_machine(
        &mut self,
        handle: StateMachineHandle,
        artboard: ArtboardHandle,
        request_id: u64,
        name: String,
    ) {
        let Some(entry) = self.artboards.get(&artboard) else {
            self.post_dead_artboard(artboard, request_id);
            return;
        };
        let result = if name.is_empty() {
            entry.artboard.default_state_machine()
        } else {
            entry.artboard.state_machine_named(&name)
        };
        match result {
            Ok(machine) => {
                self.state_machines.insert(
                    handle,
                    StateMachineEntry {
                        machine,
                        artboard,
                        settled: false,
                    },
                );
            }
            Err(error) => self.post_error(
                MessageTag::ArtboardError,
                artboard,
                request_id,
                error.to_string(),
            ),
        }
    }

    fn exec_advance_state_machine(&mut self, handle: StateMachineHandle, request_id: u64, dt: f32) {
        let Some(entry) = self.state_machines.get_mut(&handle) else {
            self.post_dead_state_machine(handle, request_id);
            return;
        };
        let was_settled = entry.settled;
        entry.settled = !entry.machine.advance_and_apply(dt);
        if entry.settled && !was_settled {
            self.post_status(MessageTag::StateMachineSettled, handle, request_id);
        }
    }

    fn exec_bind_view_model(
        &mut self,
        handle: StateMachineHandle,
        instance: ViewModelInstanceHandle,
        request_id: u64,
    ) {
        let Some(view_model) = self.view_models.get(&instance).map(|e| e.instance.clone()) else {
            self.post_error(
                MessageTag::StateMachineError,
                handle,
                request_id,
                format!("view model instance {} is not available", instance.as_raw()),
            );
            return;
        };
        let Some(entry) = self.state_machines.get_mut(&handle) else {
            self.post_dead_state_machine(handle, request_id);
            return;
        };
        entry.machine.bind_view_model(view_model);
        entry.settled = false;
    }

    fn exec_pointer(&mut self, kind: PointerKind, handle: StateMachineHandle, event: PointerEvent) {
        let Some(entry) = self.state_machines.get_mut(&handle) else {
            self.post_dead_state_machine(handle, 0);
            return;
        };
        let bounds = self
            .artboards
            .get(&entry.artboard)
            .map(|artboard| artboard.artboard.bounds())
            .unwrap_or_default();
        let position = artboard_point(event.fit, event.screen_bounds, event.position, &bounds);
        match kind {
            PointerKind::Move => entry.machine.pointer_move(position),
            PointerKind::Down => entry.machine.pointer_down(position),
            PointerKind::Up => entry.machine.pointer_up(position),
            PointerKind::Exit => entry.machine.pointer_exit(position),
        }
        // Input can wake a settled machine.
        entry.settled = false;
    }

    fn exec_instantiate_view_model(
        &mut self,
        handle: ViewModelInstanceHandle,
        file: FileHandle,
        request_id: u64,
        view_model: String,
        instance: String,
    ) {
        let Some(entry) = self.files.get(&file) else {
            self.post_dead_file(file, request_id);
            return;
        };
        match entry.file.instantiate_view_model(&view_model, &instance) {
            Ok(instance) => {
                self.view_models.insert(
                    handle,
                    ViewModelEntry {
                        instance,
                        file,
                        parent: None,
                    },
                );
            }
            Err(error) => {
                self.post_error(MessageTag::FileError, file, request_id, error.to_string())
            }
        }
    }

    fn exec_instantiate_blank_view_model(
        &mut self,
        handle: ViewModelInstanceHandle,
        file: FileHandle,
        request_id: u64,
        view_model: String,
    ) {
        let Some(entry) = self.files.get(&file) else {
            self.post_dead_file(file, request_id);
            return;
        };
        match entry.file.instantiate_blank_view_model(&view_model) {
            Ok(instance) => {
                self.view_models.insert(
                    handle,
                    ViewModelEntry {
                        instance,
                        file,
                        parent: None,
                    },
                );
            }
            Err(error) => {
                self.post_error(MessageTag::FileError, file, request_id, error.to_string())
            }
        }
    }

    /// Resolves the artboard's associated view model; an empty instance name
    /// falls back to the instance the artboard was designed against.
    fn artboard_view_model_source(
        &self,
        file: FileHandle,
        artboard: ArtboardHandle,
        request_id: u64,
    ) -> Option<(String, String)> {
        if !self.files.contains_key(&file) {
            self.post_dead_file(file, request_id);
            return None;
        }
        let Some(entry) = self.artboards.get(&artboard) else {
            self.post_dead_artboard(artboard, request_id);
            return None;
        };
        match entry.artboard.default_view_model_info() {
            Some(info) => Some(info),
            None => {
                self.post_error(
                    MessageTag::FileError,
                    file,
                    request_id,
                    "artboard has no associated view model".to_string(),
                );
                None
            }
        }
    }

    fn exec_instantiate_view_model_for_artboard(
        &mut self,
        handle: ViewModelInstanceHandle,
        file: FileHandle,
        artboard: ArtboardHandle,
        request_id: u64,
        instance: String,
    ) {
        let Some((view_model, default_instance)) =
            self.artboard_view_model_source(file, artboard, request_id)
        else {
            return;
        };
        let instance = if instance.is_empty() {
            default_instance
        } else {
            instance
        };
        self.exec_instantiate_view_model(handle, file, request_id, view_model, instance);
    }

    fn exec_instantiate_blank_view_model_for_artboard(
        &mut self,
        handle: ViewModelInstanceHandle,
        file: FileHandle,
        artboard: ArtboardHandle,
        request_id: u64,
    ) {
        let Some((view_model, _)) = self.artboard_view_model_source(file, artboard, request_id)
        else {
            return;
        };
        self.exec_instantiate_blank_view_model(handle, file, request_id, view_model);
    }

    fn exec_reference_nested(
        &mut self,
        handle: ViewModelInstanceHandle,
        parent: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
    ) {
        let Some(entry) = self.view_models.get(&parent) else {
            self.post_dead_view_model(parent, request_id);
            return;
        };
        let file = entry.file;
        match entry.instance.nested(&path) {
            Ok(instance) => {
                self.view_models.insert(
                    handle,
                    ViewModelEntry {
                        instance,
                        file,
                        parent: Some(parent),
                    },
                );
            }
            Err(error) => self.post_error(
                MessageTag::ViewModelError,
                parent,
                request_id,
                error.to_string(),
            ),
        }
    }

    fn exec_reference_list(
        &mut self,
        handle: ViewModelInstanceHandle,
        parent: ViewModelInstanceHandle,
        request_id: u64,
        index: u64,
        path: String,
    ) {
        let Some(entry) = self.view_models.get(&parent) else {
            self.post_dead_view_model(parent, request_id);
            return;
        };
        let file = entry.file;
        match entry.instance.list_at(&path, index as usize) {
            Ok(instance) => {
                self.view_models.insert(
                    handle,
                    ViewModelEntry {
                        instance,
                        file,
                        parent: Some(parent),
                    },
                );
            }
            Err(error) => self.post_error(
                MessageTag::ViewModelError,
                parent,
                request_id,
                error.to_string(),
            ),
        }
    }

    fn exec_set_property(
        &mut self,
        handle: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
        value: SetValue,
    ) {
        let Some(instance) = self.view_models.get(&handle).map(|e| e.instance.clone()) else {
            self.post_dead_view_model(handle, request_id);
            return;
        };
        let result = match value {
            SetValue::Bool(v) => instance.set_bool(&path, v),
            SetValue::Number(v) => instance.set_number(&path, v),
            SetValue::Color(v) => instance.set_color(&path, v),
            SetValue::Str(v) => instance.set_string(&path, &v),
            SetValue::EnumLabel(v) => instance.set_enum(&path, &v),
            SetValue::Image(image) => match self.images.get(&image) {
                Some(image) => instance.set_image(&path, image.clone()),
                None => {
                    self.post_error(
                        MessageTag::ViewModelError,
                        handle,
                        request_id,
                        format!("render image {} is not available", image.as_raw()),
                    );
                    return;
                }
            },
            SetValue::Artboard(artboard) => match self.artboards.get(&artboard) {
                Some(entry) => instance.set_artboard(&path, entry.artboard.as_ref()),
                None => {
                    self.post_error(
                        MessageTag::ViewModelError,
                        handle,
                        request_id,
                        format!("artboard {} is not available", artboard.as_raw()),
                    );
                    return;
                }
            },
            SetValue::Nested(nested) => match self.view_models.get(&nested) {
                Some(entry) => instance.set_nested(&path, entry.instance.clone()),
                None => {
                    self.post_error(
                        MessageTag::ViewModelError,
                        handle,
                        request_id,
                        format!("view model instance {} is not available", nested.as_raw()),
                    );
                    return;
                }
            },
        };
        if let Err(error) = result {
            self.post_error(
                MessageTag::ViewModelError,
                handle,
                request_id,
                error.to_string(),
            );
        }
    }

    fn exec_fire_trigger(&mut self, handle: ViewModelInstanceHandle, request_id: u64, path: String) {
        let Some(instance) = self.view_models.get(&handle).map(|e| e.instance.clone()) else {
            self.post_dead_view_model(handle, request_id);
            return;
        };
        if let Err(error) = instance.fire_trigger(&path) {
            self.post_error(
                MessageTag::ViewModelError,
                handle,
                request_id,
                error.to_string(),
            );
        }
    }

    fn exec_request_property(
        &mut self,
        handle: ViewModelInstanceHandle,
        request_id: u64,
        data_type: DataType,
        path: String,
    ) {
        let Some(instance) = self.view_models.get(&handle).map(|e| e.instance.clone()) else {
            self.post_dead_view_model(handle, request_id);
            return;
        };
        match instance.property(&path, data_type) {
            Ok(value) => {
                let data = ViewModelInstanceData::from_property(&path, value);
                self.post_message(|sink| {
                    sink.stream.push(MessageTag::ViewModelData);
                    sink.stream.push(handle);
                    sink.stream.push(request_id);
                    data.encode(&mut sink.stream, &mut sink.names);
                });
            }
            Err(error) => self.post_error(
                MessageTag::ViewModelError,
                handle,
                request_id,
                error.to_string(),
            ),
        }
    }

    fn exec_request_list_size(
        &mut self,
        handle: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
    ) {
        let Some(instance) = self.view_models.get(&handle).map(|e| e.instance.clone()) else {
            self.post_dead_view_model(handle, request_id);
            return;
        };
        match instance.list_size(&path) {
            Ok(size) => self.post_message(|sink| {
                sink.stream.push(MessageTag::ViewModelListSize);
                sink.stream.push(handle);
                sink.stream.push(request_id);
                sink.stream.push(size as u64);
                sink.names.push(path);
            }),
            Err(error) => self.post_error(
                MessageTag::ViewModelError,
                handle,
                request_id,
                error.to_string(),
            ),
        }
    }

    fn list_operands(
        &self,
        handle: ViewModelInstanceHandle,
        value: ViewModelInstanceHandle,
        request_id: u64,
    ) -> Option<(ViewModelRef, ViewModelRef)> {
        let Some(owner) = self.view_models.get(&handle).map(|e| e.instance.clone()) else {
            self.post_dead_view_model(handle, request_id);
            return None;
        };
        let Some(value) = self.view_models.get(&value).map(|e| e.instance.clone()) else {
            self.post_error(
                MessageTag::ViewModelError,
                handle,
                request_id,
                format!("view model instance {} is not available", value.as_raw()),
            );
            return None;
        };
        Some((owner, value))
    }

    fn exec_list_insert(
        &mut self,
        handle: ViewModelInstanceHandle,
        value: ViewModelInstanceHandle,
        request_id: u64,
        index: u64,
        path: String,
    ) {
        let Some((owner, value)) = self.list_operands(handle, value, request_id) else {
            return;
        };
        if let Err(error) = owner.list_insert(&path, index as usize, value) {
            self.post_error(
                MessageTag::ViewModelError,
                handle,
                request_id,
                error.to_string(),
            );
        }
    }

    fn exec_list_append(
        &mut self,
        handle: ViewModelInstanceHandle,
        value: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
    ) {
        let Some((owner, value)) = self.list_operands(handle, value, request_id) else {
            return;
        };
        if let Err(error) = owner.list_append(&path, value) {
            self.post_error(
                MessageTag::ViewModelError,
                handle,
                request_id,
                error.to_string(),
            );
        }
    }

    fn exec_list_remove(
        &mut self,
        handle: ViewModelInstanceHandle,
        request_id: u64,
        index: u64,
        path: String,
    ) {
        let Some(owner) = self.view_models.get(&handle).map(|e| e.instance.clone()) else {
            self.post_dead_view_model(handle, request_id);
            return;
        };
        if let Err(error) = owner.list_remove(&path, index as usize) {
            self.post_error(
                MessageTag::ViewModelError,
                handle,
                request_id,
                error.to_string(),
            );
        }
    }

    fn exec_list_swap(
        &mut self,
        handle: ViewModelInstanceHandle,
        request_id: u64,
        a: u64,
        b: u64,
        path: String,
    ) {
        let Some(owner) = self.view_models.get(&handle).map(|e| e.instance.clone()) else {
            self.post_dead_view_model(handle, request_id);
            return;
        };
        if let Err(error) = owner.list_swap(&path, a as usize, b as usize) {
            self.post_error(
                MessageTag::ViewModelError,
                handle,
                request_id,
                error.to_string(),
            );
        }
    }

    fn exec_subscribe(
        &mut self,
        handle: ViewModelInstanceHandle,
        request_id: u64,
        data_type: DataType,
        path: String,
    ) {
        let Some(instance) = self.view_models.get(&handle).map(|e| e.instance.clone()) else {
            self.post_dead_view_model(handle, request_id);
            return;
        };
        // Record the value at subscribe time; the sweep only replies on
        // change. A bad path or type never creates the subscription.
        match instance.property(&path, data_type) {
            Ok(value) => {
                self.subscriptions.insert(
                    SubscriptionKey {
                        handle,
                        path,
                        data_type,
                    },
                    value,
                );
            }
            Err(error) => self.post_error(
                MessageTag::ViewModelError,
                handle,
                request_id,
                error.to_string(),
            ),
        }
    }

    // ---------------------------------------------------------------------
    // Drain epilogue
    // ---------------------------------------------------------------------

    fn sweep_subscriptions(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        let keys: Vec<SubscriptionKey> = self.subscriptions.keys().cloned().collect();
        for key in keys {
            let Some(instance) = self.view_models.get(&key.handle).map(|e| e.instance.clone())
            else {
                continue;
            };
            let Ok(current) = instance.property(&key.path, key.data_type) else {
                continue;
            };
            if self.subscriptions.get(&key) != Some(&current) {
                let data = ViewModelInstanceData::from_property(&key.path, current.clone());
                self.post_message(|sink| {
                    sink.stream.push(MessageTag::ViewModelData);
                    sink.stream.push(key.handle);
                    sink.stream.push(0u64);
                    data.encode(&mut sink.stream, &mut sink.names);
                });
                self.subscriptions.insert(key, current);
            }
        }
    }

    fn flush_draws(&mut self) {
        if self.pending_draws.is_empty() {
            return;
        }
        let draws = std::mem::take(&mut self.pending_draws);
        for (key, callback) in draws {
            callback(key, self);
        }
    }

    // ---------------------------------------------------------------------
    // Replies
    // ---------------------------------------------------------------------

    fn post_message(&self, f: impl FnOnce(&mut MessageSink)) {
        let mut sink = self.queue.inner.messages.lock();
        f(&mut sink);
    }

    fn post_status<H: Pod>(&self, tag: MessageTag, handle: H, request_id: u64) {
        self.post_message(|sink| {
            sink.stream.push(tag);
            sink.stream.push(handle);
            sink.stream.push(request_id);
        });
    }

    fn post_error<H: Pod>(&self, tag: MessageTag, handle: H, request_id: u64, error: String) {
        tracing::debug!(target: "commands.server", ?tag, error = %error, "posting error reply");
        self.post_message(|sink| {
            sink.stream.push(tag);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.names.push(error);
        });
    }

    fn post_names<H: Pod>(
        &self,
        tag: MessageTag,
        handle: H,
        request_id: u64,
        names: Vec<String>,
    ) {
        self.post_message(|sink| {
            sink.stream.push(tag);
            sink.stream.push(handle);
            sink.stream.push(request_id);
            sink.stream.push(names.len());
            for name in names {
                sink.names.push(name);
            }
        });
    }

    fn post_view_model_instance_names(
        &self,
        file: FileHandle,
        request_id: u64,
        view_model: String,
        names: Vec<String>,
    ) {
        self.post_message(|sink| {
            sink.stream.push(MessageTag::ViewModelInstanceNamesListed);
            sink.stream.push(file);
            sink.stream.push(request_id);
            sink.stream.push(names.len());
            sink.names.push(view_model);
            for name in names {
                sink.names.push(name);
            }
        });
    }

    fn post_view_model_properties(
        &self,
        file: FileHandle,
        request_id: u64,
        view_model: String,
        properties: Vec<core_scene::PropertyData>,
    ) {
        self.post_message(|sink| {
            sink.stream.push(MessageTag::ViewModelPropertiesListed);
            sink.stream.push(file);
            sink.stream.push(request_id);
            sink.stream.push(properties.len());
            sink.names.push(view_model);
            for property in properties {
                sink.stream.push(property.data_type as u8);
                sink.names.push(property.name);
                sink.names.push(property.meta);
            }
        });
    }

    fn post_view_model_enums(
        &self,
        file: FileHandle,
        request_id: u64,
        enums: Vec<core_scene::ViewModelEnum>,
    ) {
        self.post_message(|sink| {
            sink.stream.push(MessageTag::ViewModelEnumsListed);
            sink.stream.push(file);
            sink.stream.push(request_id);
            sink.stream.push(enums.len());
            for definition in enums {
                sink.names.push(definition.name);
                sink.stream.push(definition.enumerants.len());
                for label in definition.enumerants {
                    sink.names.push(label);
                }
            }
        });
    }

    fn post_dead_file(&self, handle: FileHandle, request_id: u64) {
        self.post_error(
            MessageTag::FileError,
            handle,
            request_id,
            format!("file {} is not available", handle.as_raw()),
        );
    }

    fn post_dead_artboard(&self, handle: ArtboardHandle, request_id: u64) {
        self.post_error(
            MessageTag::ArtboardError,
            handle,
            request_id,
            format!("artboard {} is not available", handle.as_raw()),
        );
    }

    fn post_dead_state_machine(&self, handle: StateMachineHandle, request_id: u64) {
        self.post_error(
            MessageTag::StateMachineError,
            handle,
            request_id,
            format!("state machine {} is not available", handle.as_raw()),
        );
    }

    fn post_dead_view_model(&self, handle: ViewModelInstanceHandle, request_id: u64) {
        self.post_error(
            MessageTag::ViewModelError,
            handle,
            request_id,
            format!("view model instance {} is not available", handle.as_raw()),
        );
    }

    // ---------------------------------------------------------------------
    // Testing hooks. These exist so tests can pin invariants; production
    // code has no business calling them.
    // ---------------------------------------------------------------------

    /// The current subscription set, sorted for deterministic assertions.
    pub fn testing_subscriptions(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = self.subscriptions.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Draw keys with a callback pending for the next draw pass.
    pub fn testing_pending_draws(&self) -> Vec<DrawKey> {
        let mut keys: Vec<DrawKey> = self.pending_draws.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn testing_global_image_named(&self, name: &str) -> Option<RenderImageHandle> {
        self.global_images.get(name).map(|slot| slot.0)
    }

    pub fn testing_global_image_contains(&self, name: &str) -> bool {
        self.global_images.contains_key(name)
    }

    pub fn testing_global_audio_named(&self, name: &str) -> Option<AudioSourceHandle> {
        self.global_audio.get(name).map(|slot| slot.0)
    }

    pub fn testing_global_audio_contains(&self, name: &str) -> bool {
        self.global_audio.contains_key(name)
    }

    pub fn testing_global_font_named(&self, name: &str) -> Option<FontHandle> {
        self.global_fonts.get(name).map(|slot| slot.0)
    }

    pub fn testing_global_font_contains(&self, name: &str) -> bool {
        self.global_fonts.contains_key(name)
    }

    /// Where a pointer event would land in artboard space, or `None` for a
    /// dead handle. Pure with respect to server state.
    pub fn testing_cursor_pos_for_pointer_event(
        &self,
        handle: StateMachineHandle,
        event: PointerEvent,
    ) -> Option<Vec2D> {
        let entry = self.state_machines.get(&handle)?;
        let bounds: Aabb = self
            .artboards
            .get(&entry.artboard)
            .map(|artboard| artboard.artboard.bounds())
            .unwrap_or_default();
        Some(artboard_point(
            event.fit,
            event.screen_bounds,
            event.position,
            &bounds,
        ))
    }
}

#[derive(Debug, Clone, Copy)]
enum PointerKind {
    Move,
    Down,
    Up,
    Exit,
}

enum SetValue {
    Bool(bool),
    Number(f32),
    Color(u32),
    Str(String),
    EnumLabel(String),
    Image(RenderImageHandle),
    Artboard(ArtboardHandle),
    Nested(ViewModelInstanceHandle),
}

/// One command, fully detached from the streams. Decoding happens under the
/// command mutex; execution never does.
enum Cmd {
    LoadFile {
        handle: FileHandle,
        request_id: u64,
        loader: Option<Arc<dyn FileAssetLoader>>,
        bytes: Vec<u8>,
    },
    DeleteFile {
        handle: FileHandle,
        request_id: u64,
    },
    InstantiateArtboard {
        handle: ArtboardHandle,
        file: FileHandle,
        request_id: u64,
        name: String,
    },
    DeleteArtboard {
        handle: ArtboardHandle,
        request_id: u64,
    },
    InstantiateStateMachine {
        handle: StateMachineHandle,
        artboard: ArtboardHandle,
        request_id: u64,
        name: String,
    },
    DeleteStateMachine {
        handle: StateMachineHandle,
        request_id: u64,
    },
    AdvanceStateMachine {
        handle: StateMachineHandle,
        request_id: u64,
        dt: f32,
    },
    BindViewModel {
        handle: StateMachineHandle,
        instance: ViewModelInstanceHandle,
        request_id: u64,
    },
    Pointer {
        kind: PointerKind,
        handle: StateMachineHandle,
        event: PointerEvent,
    },
    InstantiateViewModel {
        handle: ViewModelInstanceHandle,
        file: FileHandle,
        request_id: u64,
        view_model: String,
        instance: String,
    },
    InstantiateBlankViewModel {
        handle: ViewModelInstanceHandle,
        file: FileHandle,
        request_id: u64,
        view_model: String,
    },
    InstantiateViewModelForArtboard {
        handle: ViewModelInstanceHandle,
        file: FileHandle,
        artboard: ArtboardHandle,
        request_id: u64,
        instance: String,
    },
    InstantiateBlankViewModelForArtboard {
        handle: ViewModelInstanceHandle,
        file: FileHandle,
        artboard: ArtboardHandle,
        request_id: u64,
    },
    DeleteViewModel {
        handle: ViewModelInstanceHandle,
        request_id: u64,
    },
    ReferenceNestedViewModel {
        handle: ViewModelInstanceHandle,
        parent: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
    },
    ReferenceListViewModel {
        handle: ViewModelInstanceHandle,
        parent: ViewModelInstanceHandle,
        request_id: u64,
        index: u64,
        path: String,
    },
    SetProperty {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
        value: SetValue,
    },
    FireTrigger {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
    },
    RequestProperty {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        data_type: DataType,
        path: String,
    },
    RequestListSize {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
    },
    ListInsert {
        handle: ViewModelInstanceHandle,
        value: ViewModelInstanceHandle,
        request_id: u64,
        index: u64,
        path: String,
    },
    ListAppend {
        handle: ViewModelInstanceHandle,
        value: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
    },
    ListRemove {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        index: u64,
        path: String,
    },
    ListSwap {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        a: u64,
        b: u64,
        path: String,
    },
    Subscribe {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        data_type: DataType,
        path: String,
    },
    Unsubscribe {
        handle: ViewModelInstanceHandle,
        request_id: u64,
        data_type: DataType,
        path: String,
    },
    DecodeImage {
        handle: RenderImageHandle,
        request_id: u64,
        bytes: Vec<u8>,
    },
    DecodeAudio {
        handle: AudioSourceHandle,
        request_id: u64,
        bytes: Vec<u8>,
    },
    DecodeFont {
        handle: FontHandle,
        request_id: u64,
        bytes: Vec<u8>,
    },
    AddExternalImage {
        handle: RenderImageHandle,
        request_id: u64,
        image: Arc<dyn RenderImage>,
    },
    AddExternalAudio {
        handle: AudioSourceHandle,
        request_id: u64,
        audio: Arc<dyn AudioSource>,
    },
    AddExternalFont {
        handle: FontHandle,
        request_id: u64,
        font: Arc<dyn Font>,
    },
    DeleteImage {
        handle: RenderImageHandle,
        request_id: u64,
    },
    DeleteAudio {
        handle: AudioSourceHandle,
        request_id: u64,
    },
    DeleteFont {
        handle: FontHandle,
        request_id: u64,
    },
    AddGlobalImage {
        handle: RenderImageHandle,
        name: String,
    },
    AddGlobalAudio {
        handle: AudioSourceHandle,
        name: String,
    },
    AddGlobalFont {
        handle: FontHandle,
        name: String,
    },
    RemoveGlobalImage {
        name: String,
    },
    RemoveGlobalAudio {
        name: String,
    },
    RemoveGlobalFont {
        name: String,
    },
    ListArtboards {
        file: FileHandle,
        request_id: u64,
    },
    ListStateMachines {
        artboard: ArtboardHandle,
        request_id: u64,
    },
    ListViewModels {
        file: FileHandle,
        request_id: u64,
    },
    ListViewModelInstanceNames {
        file: FileHandle,
        request_id: u64,
        view_model: String,
    },
    ListViewModelProperties {
        file: FileHandle,
        request_id: u64,
        view_model: String,
    },
    ListViewModelEnums {
        file: FileHandle,
        request_id: u64,
    },
    RequestDefaultViewModelInfo {
        artboard: ArtboardHandle,
        file: FileHandle,
        request_id: u64,
    },
    RunOnce {
        callback: ServerCallback,
    },
    Draw {
        key: DrawKey,
        callback: ServerDrawCallback,
    },
    Disconnect,
    LoopBreak,
}

impl Cmd {
    fn decode(sink: &mut CommandSink) -> Self {
        let tag = sink.stream.pop::<CommandTag>();
        match tag {
            CommandTag::LoadFile => Cmd::LoadFile {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                loader: sink.loaders.pop(),
                bytes: sink.byte_vectors.pop(),
            },
            CommandTag::DeleteFile => Cmd::DeleteFile {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::InstantiateArtboard => Cmd::InstantiateArtboard {
                handle: sink.stream.pop(),
                file: sink.stream.pop(),
                request_id: sink.stream.pop(),
                name: sink.names.pop(),
            },
            CommandTag::DeleteArtboard => Cmd::DeleteArtboard {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::InstantiateStateMachine => Cmd::InstantiateStateMachine {
                handle: sink.stream.pop(),
                artboard: sink.stream.pop(),
                request_id: sink.stream.pop(),
                name: sink.names.pop(),
            },
            CommandTag::DeleteStateMachine => Cmd::DeleteStateMachine {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::AdvanceStateMachine => Cmd::AdvanceStateMachine {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                dt: sink.stream.pop(),
            },
            CommandTag::BindViewModel => Cmd::BindViewModel {
                handle: sink.stream.pop(),
                instance: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::PointerMove => Self::decode_pointer(PointerKind::Move, sink),
            CommandTag::PointerDown => Self::decode_pointer(PointerKind::Down, sink),
            CommandTag::PointerUp => Self::decode_pointer(PointerKind::Up, sink),
            CommandTag::PointerExit => Self::decode_pointer(PointerKind::Exit, sink),
            CommandTag::InstantiateViewModel => Cmd::InstantiateViewModel {
                handle: sink.stream.pop(),
                file: sink.stream.pop(),
                request_id: sink.stream.pop(),
                view_model: sink.names.pop(),
                instance: sink.names.pop(),
            },
            CommandTag::InstantiateBlankViewModel => Cmd::InstantiateBlankViewModel {
                handle: sink.stream.pop(),
                file: sink.stream.pop(),
                request_id: sink.stream.pop(),
                view_model: sink.names.pop(),
            },
            CommandTag::InstantiateViewModelForArtboard => Cmd::InstantiateViewModelForArtboard {
                handle: sink.stream.pop(),
                file: sink.stream.pop(),
                artboard: sink.stream.pop(),
                request_id: sink.stream.pop(),
                instance: sink.names.pop(),
            },
            CommandTag::InstantiateBlankViewModelForArtboard => {
                Cmd::InstantiateBlankViewModelForArtboard {
                    handle: sink.stream.pop(),
                    file: sink.stream.pop(),
                    artboard: sink.stream.pop(),
                    request_id: sink.stream.pop(),
                }
            }
            CommandTag::DeleteViewModel => Cmd::DeleteViewModel {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::ReferenceNestedViewModel => Cmd::ReferenceNestedViewModel {
                handle: sink.stream.pop(),
                parent: sink.stream.pop(),
                request_id: sink.stream.pop(),
                path: sink.names.pop(),
            },
            CommandTag::ReferenceListViewModel => Cmd::ReferenceListViewModel {
                handle: sink.stream.pop(),
                parent: sink.stream.pop(),
                request_id: sink.stream.pop(),
                index: sink.stream.pop(),
                path: sink.names.pop(),
            },
            CommandTag::SetProperty => {
                let handle = sink.stream.pop();
                let request_id = sink.stream.pop();
                let data_type = Self::decode_data_type(sink);
                let path = sink.names.pop();
                let value = match data_type {
                    DataType::Boolean => SetValue::Bool(sink.stream.pop()),
                    DataType::Number => SetValue::Number(sink.stream.pop()),
                    DataType::Color => SetValue::Color(sink.stream.pop()),
                    DataType::String => SetValue::Str(sink.names.pop()),
                    DataType::EnumType => SetValue::EnumLabel(sink.names.pop()),
                    DataType::AssetImage => SetValue::Image(sink.stream.pop()),
                    DataType::Artboard => SetValue::Artboard(sink.stream.pop()),
                    DataType::ViewModel => SetValue::Nested(sink.stream.pop()),
                    other => panic!("corrupt stream: {other:?} is not a settable type"),
                };
                Cmd::SetProperty {
                    handle,
                    request_id,
                    path,
                    value,
                }
            }
            CommandTag::FireTrigger => Cmd::FireTrigger {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                path: sink.names.pop(),
            },
            CommandTag::RequestProperty => Cmd::RequestProperty {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                data_type: Self::decode_data_type(sink),
                path: sink.names.pop(),
            },
            CommandTag::RequestListSize => Cmd::RequestListSize {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                path: sink.names.pop(),
            },
            CommandTag::ListInsert => Cmd::ListInsert {
                handle: sink.stream.pop(),
                value: sink.stream.pop(),
                request_id: sink.stream.pop(),
                index: sink.stream.pop(),
                path: sink.names.pop(),
            },
            CommandTag::ListAppend => Cmd::ListAppend {
                handle: sink.stream.pop(),
                value: sink.stream.pop(),
                request_id: sink.stream.pop(),
                path: sink.names.pop(),
            },
            CommandTag::ListRemove => Cmd::ListRemove {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                index: sink.stream.pop(),
                path: sink.names.pop(),
            },
            CommandTag::ListSwap => Cmd::ListSwap {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                a: sink.stream.pop(),
                b: sink.stream.pop(),
                path: sink.names.pop(),
            },
            CommandTag::Subscribe => Cmd::Subscribe {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                data_type: Self::decode_data_type(sink),
                path: sink.names.pop(),
            },
            CommandTag::Unsubscribe => Cmd::Unsubscribe {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                data_type: Self::decode_data_type(sink),
                path: sink.names.pop(),
            },
            CommandTag::DecodeImage => Cmd::DecodeImage {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                bytes: sink.byte_vectors.pop(),
            },
            CommandTag::DecodeAudio => Cmd::DecodeAudio {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                bytes: sink.byte_vectors.pop(),
            },
            CommandTag::DecodeFont => Cmd::DecodeFont {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                bytes: sink.byte_vectors.pop(),
            },
            CommandTag::AddExternalImage => Cmd::AddExternalImage {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                image: sink.external_images.pop(),
            },
            CommandTag::AddExternalAudio => Cmd::AddExternalAudio {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                audio: sink.external_audio.pop(),
            },
            CommandTag::AddExternalFont => Cmd::AddExternalFont {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
                font: sink.external_fonts.pop(),
            },
            CommandTag::DeleteImage => Cmd::DeleteImage {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::DeleteAudio => Cmd::DeleteAudio {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::DeleteFont => Cmd::DeleteFont {
                handle: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::AddGlobalImage => Cmd::AddGlobalImage {
                handle: sink.stream.pop(),
                name: sink.names.pop(),
            },
            CommandTag::AddGlobalAudio => Cmd::AddGlobalAudio {
                handle: sink.stream.pop(),
                name: sink.names.pop(),
            },
            CommandTag::AddGlobalFont => Cmd::AddGlobalFont {
                handle: sink.stream.pop(),
                name: sink.names.pop(),
            },
            CommandTag::RemoveGlobalImage => Cmd::RemoveGlobalImage {
                name: sink.names.pop(),
            },
            CommandTag::RemoveGlobalAudio => Cmd::RemoveGlobalAudio {
                name: sink.names.pop(),
            },
            CommandTag::RemoveGlobalFont => Cmd::RemoveGlobalFont {
                name: sink.names.pop(),
            },
            CommandTag::ListArtboards => Cmd::ListArtboards {
                file: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::ListStateMachines => Cmd::ListStateMachines {
                artboard: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::ListViewModels => Cmd::ListViewModels {
                file: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::ListViewModelInstanceNames => Cmd::ListViewModelInstanceNames {
                file: sink.stream.pop(),
                request_id: sink.stream.pop(),
                view_model: sink.names.pop(),
            },
            CommandTag::ListViewModelProperties => Cmd::ListViewModelProperties {
                file: sink.stream.pop(),
                request_id: sink.stream.pop(),
                view_model: sink.names.pop(),
            },
            CommandTag::ListViewModelEnums => Cmd::ListViewModelEnums {
                file: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::RequestDefaultViewModelInfo => Cmd::RequestDefaultViewModelInfo {
                artboard: sink.stream.pop(),
                file: sink.stream.pop(),
                request_id: sink.stream.pop(),
            },
            CommandTag::RunOnce => Cmd::RunOnce {
                callback: sink.callbacks.pop(),
            },
            CommandTag::Draw => Cmd::Draw {
                key: sink.stream.pop(),
                callback: sink.draw_callbacks.pop(),
            },
            CommandTag::Disconnect => Cmd::Disconnect,
            CommandTag::CommandLoopBreak => Cmd::LoopBreak,
        }
    }

    fn decode_pointer(kind: PointerKind, sink: &mut CommandSink) -> Self {
        let handle = sink.stream.pop();
        let fit = Fit::from_u8(sink.stream.pop::<u8>())
            .unwrap_or_else(|| panic!("corrupt stream: unknown Fit"));
        let [bx, by] = sink.stream.pop::<[f32; 2]>();
        let [px, py] = sink.stream.pop::<[f32; 2]>();
        Cmd::Pointer {
            kind,
            handle,
            event: PointerEvent {
                fit,
                screen_bounds: Vec2D::new(bx, by),
                position: Vec2D::new(px, py),
            },
        }
    }

    fn decode_data_type(sink: &mut CommandSink) -> DataType {
        DataType::from_u8(sink.stream.pop::<u8>())
            .unwrap_or_else(|| panic!("corrupt stream: unknown DataType"))
    }
}
