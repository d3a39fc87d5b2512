//! Shared fixture for the command boundary tests: a scripted scene backend
//! (factory, files, artboards, state machines, view models), listener taps
//! that record delivered replies, and thread helpers for driving a live
//! server.
//!
//! Scene "files" are blueprints registered with the [`TestFactory`]; the
//! registered bytes stand in for real file contents, and anything else fails
//! to load the way a corrupt file would.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use core_commands::{
    ArtboardEvents, ArtboardHandle, AudioSourceEvents, AudioSourceHandle, CommandQueue,
    CommandServer, FileEvents, FileHandle, FontEvents, FontHandle, RenderImageEvents,
    RenderImageHandle, StateMachineEvents, StateMachineHandle, ViewModelInstanceData,
    ViewModelInstanceEvents, ViewModelInstanceHandle,
};
use core_scene::{
    Aabb, ArtboardInstance, AudioSource, DataType, Factory, FileAssetLoader, FileSource, Font,
    PropertyData, PropertyValue, RenderImage, RenderPaint, RenderPath, Renderer, SceneError,
    StateMachineInstance, Vec2D, ViewModelEnum, ViewModelInstance, ViewModelRef,
};

// -------------------------------------------------------------------------
// Blueprints
// -------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct Blueprint {
    pub artboards: Vec<ArtboardBlueprint>,
    pub view_models: Vec<ViewModelBlueprint>,
    pub enums: Vec<ViewModelEnum>,
}

#[derive(Clone)]
pub struct ArtboardBlueprint {
    pub name: String,
    pub width: f32,
    pub height: f32,
    pub state_machines: Vec<StateMachineBlueprint>,
    /// `(view_model_name, instance_name)` the artboard was designed against.
    pub default_view_model: Option<(String, String)>,
}

#[derive(Clone)]
pub struct StateMachineBlueprint {
    pub name: String,
    /// The machine settles once its accumulated advance time reaches this.
    pub settles_after: f32,
}

#[derive(Clone)]
pub struct ViewModelBlueprint {
    pub name: String,
    /// Named instances; the first is the default.
    pub instances: Vec<String>,
    pub properties: Vec<PropertyBlueprint>,
}

#[derive(Clone)]
pub struct PropertyBlueprint {
    pub name: String,
    pub data_type: DataType,
    /// Enum definition name for enum properties.
    pub meta: String,
    /// View-model name backing nested and list properties.
    pub nested: Option<String>,
}

impl PropertyBlueprint {
    pub fn plain(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            meta: String::new(),
            nested: None,
        }
    }

    pub fn enumeration(name: &str, definition: &str) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::EnumType,
            meta: definition.into(),
            nested: None,
        }
    }

    pub fn nested(name: &str, view_model: &str) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::ViewModel,
            meta: String::new(),
            nested: Some(view_model.into()),
        }
    }

    pub fn list(name: &str, view_model: &str) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::List,
            meta: String::new(),
            nested: Some(view_model.into()),
        }
    }
}

/// Two plain artboards and a state machine each; enough for handle
/// lifecycle and cascade tests.
pub fn two_artboards_blueprint() -> Blueprint {
    Blueprint {
        artboards: vec![
            ArtboardBlueprint {
                name: "One".into(),
                width: 500.0,
                height: 500.0,
                state_machines: vec![
                    StateMachineBlueprint {
                        name: "one".into(),
                        settles_after: f32::INFINITY,
                    },
                    StateMachineBlueprint {
                        name: "two".into(),
                        settles_after: f32::INFINITY,
                    },
                ],
                default_view_model: None,
            },
            ArtboardBlueprint {
                name: "Two".into(),
                width: 250.0,
                height: 250.0,
                state_machines: vec![StateMachineBlueprint {
                    name: "only".into(),
                    settles_after: f32::INFINITY,
                }],
                default_view_model: None,
            },
        ],
        ..Blueprint::default()
    }
}

/// One artboard bound to a fully populated view model; mirrors the shape the
/// data-binding tests need.
pub fn data_bind_blueprint() -> Blueprint {
    Blueprint {
        artboards: vec![ArtboardBlueprint {
            name: "Test Artboard".into(),
            width: 500.0,
            height: 500.0,
            state_machines: vec![StateMachineBlueprint {
                name: "SM".into(),
                settles_after: 25.0,
            }],
            default_view_model: Some(("Test All".into(), "Test Default".into())),
        }],
        view_models: vec![
            ViewModelBlueprint {
                name: "Test All".into(),
                instances: vec!["Test Default".into(), "Test Alternate".into()],
                properties: vec![
                    PropertyBlueprint::plain("Test Bool", DataType::Boolean),
                    PropertyBlueprint::plain("Test Num", DataType::Number),
                    PropertyBlueprint::plain("Test String", DataType::String),
                    PropertyBlueprint::plain("Test Color", DataType::Color),
                    PropertyBlueprint::enumeration("Test Enum", "Test Enum Values"),
                    PropertyBlueprint::plain("Test Trigger", DataType::Trigger),
                    PropertyBlueprint::plain("Test Image", DataType::AssetImage),
                    PropertyBlueprint::plain("Test Artboard", DataType::Artboard),
                    PropertyBlueprint::nested("Test Nested", "Nested VM"),
                    PropertyBlueprint::list("Test List", "Nested VM"),
                ],
            },
            ViewModelBlueprint {
                name: "Nested VM".into(),
                instances: vec!["Nested Default".into(), "Alternate Nested".into()],
                properties: vec![PropertyBlueprint::plain("Nested Number", DataType::Number)],
            },
            ViewModelBlueprint {
                name: "Empty VM".into(),
                instances: Vec::new(),
                properties: Vec::new(),
            },
        ],
        enums: vec![ViewModelEnum {
            name: "Test Enum Values".into(),
            enumerants: vec!["Value 1".into(), "Value 2".into()],
        }],
    }
}

// -------------------------------------------------------------------------
// Factory and decoded assets
// -------------------------------------------------------------------------

pub struct TestImage;
pub struct TestAudio;
pub struct TestFont;
pub struct TestRenderer;
pub struct TestPath;
pub struct TestPaint;

impl RenderImage for TestImage {}
impl AudioSource for TestAudio {}
impl Font for TestFont {}
impl Renderer for TestRenderer {}
impl RenderPath for TestPath {}
impl RenderPaint for TestPaint {}

pub fn good_image_bytes() -> Vec<u8> {
    b"IMG payload".to_vec()
}

pub fn good_audio_bytes() -> Vec<u8> {
    b"AUD payload".to_vec()
}

pub fn good_font_bytes() -> Vec<u8> {
    b"FNT payload".to_vec()
}

pub fn garbage_bytes() -> Vec<u8> {
    vec![0u8; 1024]
}

/// Scripted factory: file bytes are keys minted by [`TestFactory::register`],
/// asset bytes are recognised by magic prefix.
pub struct TestFactory {
    next_key: u64,
    files: HashMap<u64, Blueprint>,
}

impl TestFactory {
    pub fn new() -> Self {
        Self {
            next_key: 1,
            files: HashMap::new(),
        }
    }

    /// Registers a blueprint and returns the bytes that load it.
    pub fn register(&mut self, blueprint: Blueprint) -> Vec<u8> {
        let key = self.next_key;
        self.next_key += 1;
        self.files.insert(key, blueprint);
        key.to_le_bytes().to_vec()
    }
}

impl Factory for TestFactory {
    fn load_file(
        &self,
        bytes: Vec<u8>,
        _loader: Option<Arc<dyn FileAssetLoader>>,
    ) -> Result<Box<dyn FileSource>, SceneError> {
        let key: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SceneError::Decode("not a scene file".into()))?;
        let blueprint = self
            .files
            .get(&u64::from_le_bytes(key))
            .ok_or_else(|| SceneError::Decode("not a scene file".into()))?;
        Ok(Box::new(TestFile {
            blueprint: Rc::new(blueprint.clone()),
        }))
    }

    fn decode_image(&self, bytes: Vec<u8>) -> Result<Arc<dyn RenderImage>, SceneError> {
        if bytes.starts_with(b"IMG") {
            Ok(Arc::new(TestImage))
        } else {
            Err(SceneError::Decode("unrecognised image data".into()))
        }
    }

    fn decode_audio(&self, bytes: Vec<u8>) -> Result<Arc<dyn AudioSource>, SceneError> {
        if bytes.starts_with(b"AUD") {
            Ok(Arc::new(TestAudio))
        } else {
            Err(SceneError::Decode("unrecognised audio data".into()))
        }
    }

    fn decode_font(&self, bytes: Vec<u8>) -> Result<Arc<dyn Font>, SceneError> {
        if bytes.starts_with(b"FNT") {
            Ok(Arc::new(TestFont))
        } else {
            Err(SceneError::Decode("unrecognised font data".into()))
        }
    }

    fn make_render_path(&self) -> Box<dyn RenderPath> {
        Box::new(TestPath)
    }

    fn make_render_paint(&self) -> Box<dyn RenderPaint> {
        Box::new(TestPaint)
    }
}

// -------------------------------------------------------------------------
// File / artboard / state machine
// -------------------------------------------------------------------------

pub struct TestFile {
    blueprint: Rc<Blueprint>,
}

impl TestFile {
    fn view_model_blueprint(&self, name: &str) -> Result<&ViewModelBlueprint, SceneError> {
        self.blueprint
            .view_models
            .iter()
            .find(|vm| vm.name == name)
            .ok_or_else(|| SceneError::MissingViewModel(name.into()))
    }
}

impl FileSource for TestFile {
    fn artboard_names(&self) -> Vec<String> {
        self.blueprint
            .artboards
            .iter()
            .map(|artboard| artboard.name.clone())
            .collect()
    }

    fn artboard_default(&self) -> Result<Box<dyn ArtboardInstance>, SceneError> {
        let blueprint = self
            .blueprint
            .artboards
            .first()
            .ok_or_else(|| SceneError::MissingArtboard(String::new()))?;
        Ok(Box::new(TestArtboard {
            blueprint: blueprint.clone(),
        }))
    }

    fn artboard_named(&self, name: &str) -> Result<Box<dyn ArtboardInstance>, SceneError> {
        let blueprint = self
            .blueprint
            .artboards
            .iter()
            .find(|artboard| artboard.name == name)
            .ok_or_else(|| SceneError::MissingArtboard(name.into()))?;
        Ok(Box::new(TestArtboard {
            blueprint: blueprint.clone(),
        }))
    }

    fn view_model_names(&self) -> Vec<String> {
        self.blueprint
            .view_models
            .iter()
            .map(|vm| vm.name.clone())
            .collect()
    }

    fn view_model_instance_names(&self, view_model: &str) -> Result<Vec<String>, SceneError> {
        Ok(self.view_model_blueprint(view_model)?.instances.clone())
    }

    fn view_model_properties(&self, view_model: &str) -> Result<Vec<PropertyData>, SceneError> {
        Ok(self
            .view_model_blueprint(view_model)?
            .properties
            .iter()
            .map(|property| {
                PropertyData::with_meta(property.data_type, &property.name, &property.meta)
            })
            .collect())
    }

    fn view_model_enums(&self) -> Vec<ViewModelEnum> {
        self.blueprint.enums.clone()
    }

    fn instantiate_view_model(
        &self,
        view_model: &str,
        instance: &str,
    ) -> Result<ViewModelRef, SceneError> {
        let blueprint = self.view_model_blueprint(view_model)?;
        if !instance.is_empty() && !blueprint.instances.iter().any(|name| name == instance) {
            return Err(SceneError::MissingViewModelInstance(instance.into()));
        }
        Ok(build_view_model(&self.blueprint, blueprint))
    }

    fn instantiate_blank_view_model(&self, view_model: &str) -> Result<ViewModelRef, SceneError> {
        let blueprint = self.view_model_blueprint(view_model)?;
        Ok(build_view_model(&self.blueprint, blueprint))
    }
}

pub struct TestArtboard {
    blueprint: ArtboardBlueprint,
}

impl ArtboardInstance for TestArtboard {
    fn name(&self) -> &str {
        &self.blueprint.name
    }

    fn bounds(&self) -> Aabb {
        Aabb::from_size(self.blueprint.width, self.blueprint.height)
    }

    fn state_machine_names(&self) -> Vec<String> {
        self.blueprint
            .state_machines
            .iter()
            .map(|machine| machine.name.clone())
            .collect()
    }

    fn default_state_machine(&self) -> Result<Box<dyn StateMachineInstance>, SceneError> {
        let blueprint = self
            .blueprint
            .state_machines
            .first()
            .ok_or_else(|| SceneError::MissingStateMachine(String::new()))?;
        Ok(Box::new(TestStateMachine::new(blueprint, self.bounds())))
    }

    fn state_machine_named(&self, name: &str) -> Result<Box<dyn StateMachineInstance>, SceneError> {
        let blueprint = self
            .blueprint
            .state_machines
            .iter()
            .find(|machine| machine.name == name)
            .ok_or_else(|| SceneError::MissingStateMachine(name.into()))?;
        Ok(Box::new(TestStateMachine::new(blueprint, self.bounds())))
    }

    fn default_view_model_info(&self) -> Option<(String, String)> {
        self.blueprint.default_view_model.clone()
    }

    fn draw(&self, _renderer: &mut dyn Renderer) {}
}

/// Scripted state machine with three pointer hot-spots (one per corner of
/// the artboard) driving an `isDown` boolean:
/// - near `(0.85w, 0.85h)`: toggles on pointer down,
/// - near `(0.15w, 0.15h)`: toggles on pointer down or up,
/// - near `(0.85w, 0.15h)`: toggles when the pointer enters (hover).
pub struct TestStateMachine {
    name: String,
    settles_after: f32,
    elapsed: f32,
    is_down: bool,
    hovered: bool,
    bounds: Aabb,
    bound_view_model: Option<ViewModelRef>,
}

impl TestStateMachine {
    fn new(blueprint: &StateMachineBlueprint, bounds: Aabb) -> Self {
        Self {
            name: blueprint.name.clone(),
            settles_after: blueprint.settles_after,
            elapsed: 0.0,
            is_down: false,
            hovered: false,
            bounds,
            bound_view_model: None,
        }
    }

    fn hot_spot(&self, fx: f32, fy: f32) -> Aabb {
        let center = Vec2D::new(self.bounds.width() * fx, self.bounds.height() * fy);
        Aabb::new(
            Vec2D::new(center.x - 50.0, center.y - 50.0),
            Vec2D::new(center.x + 50.0, center.y + 50.0),
        )
    }

    fn toggle_on_down(&self) -> Aabb {
        self.hot_spot(0.85, 0.85)
    }

    fn toggle_on_down_or_up(&self) -> Aabb {
        self.hot_spot(0.15, 0.15)
    }

    fn toggle_on_hover(&self) -> Aabb {
        self.hot_spot(0.85, 0.15)
    }
}

impl StateMachineInstance for TestStateMachine {
    fn name(&self) -> &str {
        &self.name
    }

    fn advance_and_apply(&mut self, dt: f32) -> bool {
        self.elapsed += dt;
        self.elapsed < self.settles_after
    }

    fn pointer_down(&mut self, position: Vec2D) {
        if self.toggle_on_down().contains(position)
            || self.toggle_on_down_or_up().contains(position)
        {
            self.is_down = !self.is_down;
        }
    }

    fn pointer_up(&mut self, position: Vec2D) {
        if self.toggle_on_down_or_up().contains(position) {
            self.is_down = !self.is_down;
        }
    }

    fn pointer_move(&mut self, position: Vec2D) {
        let inside = self.toggle_on_hover().contains(position);
        if inside && !self.hovered {
            self.is_down = !self.is_down;
        }
        self.hovered = inside;
    }

    fn pointer_exit(&mut self, _position: Vec2D) {
        self.hovered = false;
    }

    fn bind_view_model(&mut self, instance: ViewModelRef) {
        self.bound_view_model = Some(instance);
    }

    fn get_bool(&self, input: &str) -> Option<bool> {
        (input == "isDown").then_some(self.is_down)
    }

    fn get_number(&self, input: &str) -> Option<f32> {
        (input == "elapsed").then_some(self.elapsed)
    }

    fn get_enum(&self, _input: &str) -> Option<String> {
        None
    }

    fn fire_trigger(&mut self, _input: &str) -> bool {
        false
    }
}

// -------------------------------------------------------------------------
// View models
// -------------------------------------------------------------------------

enum Slot {
    Bool(bool),
    Number(f32),
    Color(u32),
    Str(String),
    Enum {
        labels: Vec<String>,
        label: String,
    },
    Trigger {
        fired: u64,
    },
    Nested {
        revision: u64,
        instance: ViewModelRef,
    },
    Image {
        revision: u64,
        image: Option<Arc<dyn RenderImage>>,
    },
    ArtboardSlot {
        revision: u64,
        name: Option<String>,
    },
    List {
        revision: u64,
        items: Vec<ViewModelRef>,
    },
}

impl Slot {
    fn data_type(&self) -> DataType {
        match self {
            Slot::Bool(_) => DataType::Boolean,
            Slot::Number(_) => DataType::Number,
            Slot::Color(_) => DataType::Color,
            Slot::Str(_) => DataType::String,
            Slot::Enum { .. } => DataType::EnumType,
            Slot::Trigger { .. } => DataType::Trigger,
            Slot::Nested { .. } => DataType::ViewModel,
            Slot::Image { .. } => DataType::AssetImage,
            Slot::ArtboardSlot { .. } => DataType::Artboard,
            Slot::List { .. } => DataType::List,
        }
    }
}

pub struct TestViewModel {
    slots: RefCell<HashMap<String, Slot>>,
}

fn build_view_model(file: &Rc<Blueprint>, blueprint: &ViewModelBlueprint) -> ViewModelRef {
    let mut slots = HashMap::new();
    for property in &blueprint.properties {
        let slot = match property.data_type {
            DataType::Boolean => Slot::Bool(false),
            DataType::Number => Slot::Number(0.0),
            DataType::Color => Slot::Color(0),
            DataType::String => Slot::Str(String::new()),
            DataType::EnumType => {
                let labels = file
                    .enums
                    .iter()
                    .find(|definition| definition.name == property.meta)
                    .map(|definition| definition.enumerants.clone())
                    .unwrap_or_default();
                Slot::Enum {
                    label: labels.first().cloned().unwrap_or_default(),
                    labels,
                }
            }
            DataType::Trigger => Slot::Trigger { fired: 0 },
            DataType::ViewModel => {
                let nested_name = property.nested.as_deref().unwrap_or_default();
                let nested = file
                    .view_models
                    .iter()
                    .find(|vm| vm.name == nested_name)
                    .map(|vm| build_view_model(file, vm))
                    .unwrap_or_else(|| {
                        Rc::new(TestViewModel {
                            slots: RefCell::new(HashMap::new()),
                        })
                    });
                Slot::Nested {
                    revision: 0,
                    instance: nested,
                }
            }
            DataType::AssetImage => Slot::Image {
                revision: 0,
                image: None,
            },
            DataType::Artboard => Slot::ArtboardSlot {
                revision: 0,
                name: None,
            },
            DataType::List => Slot::List {
                revision: 0,
                items: Vec::new(),
            },
            other => panic!("blueprint uses unsupported property type {other:?}"),
        };
        slots.insert(property.name.clone(), slot);
    }
    Rc::new(TestViewModel {
        slots: RefCell::new(slots),
    })
}

enum PathStep {
    Leaf(String),
    Descend(ViewModelRef, String),
}

impl TestViewModel {
    /// Splits one path segment off; a multi-segment path descends through a
    /// nested slot and hands the remainder to the child.
    fn step(&self, path: &str) -> Result<PathStep, SceneError> {
        match path.split_once('/') {
            None => Ok(PathStep::Leaf(path.to_string())),
            Some((head, rest)) => {
                let slots = self.slots.borrow();
                match slots.get(head) {
                    Some(Slot::Nested { instance, .. }) => {
                        Ok(PathStep::Descend(instance.clone(), rest.to_string()))
                    }
                    _ => Err(SceneError::MissingProperty(path.to_string())),
                }
            }
        }
    }

    fn with_slot<T>(
        &self,
        path: &str,
        f: impl FnOnce(&mut Slot) -> Result<T, SceneError>,
    ) -> Result<T, SceneError> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots
            .get_mut(path)
            .ok_or_else(|| SceneError::MissingProperty(path.to_string()))?;
        f(slot)
    }
}

impl ViewModelInstance for TestViewModel {
    fn property_type(&self, path: &str) -> Result<DataType, SceneError> {
        match self.step(path)? {
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| Ok(slot.data_type())),
            PathStep::Descend(child, rest) => child.property_type(&rest),
        }
    }

    fn property(&self, path: &str, expected: DataType) -> Result<PropertyValue, SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.property(&rest, expected),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| {
                if slot.data_type() != expected {
                    return Err(SceneError::TypeMismatch {
                        path: leaf.clone(),
                        expected,
                    });
                }
                Ok(match slot {
                    Slot::Bool(value) => PropertyValue::Bool(*value),
                    Slot::Number(value) => PropertyValue::Number(*value),
                    Slot::Color(value) => PropertyValue::Color(*value),
                    Slot::Str(value) => PropertyValue::Str(value.clone()),
                    Slot::Enum { label, .. } => PropertyValue::EnumLabel(label.clone()),
                    Slot::Trigger { fired } => PropertyValue::Trigger(*fired),
                    Slot::Nested { revision, .. } => PropertyValue::ViewModel(*revision),
                    Slot::Image { revision, .. } => PropertyValue::Image(*revision),
                    Slot::List { revision, .. } => PropertyValue::List(*revision),
                    Slot::ArtboardSlot { .. } => {
                        return Err(SceneError::TypeMismatch {
                            path: leaf.clone(),
                            expected,
                        });
                    }
                })
            }),
        }
    }

    fn set_bool(&self, path: &str, value: bool) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.set_bool(&rest, value),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::Bool(current) => {
                    *current = value;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::Boolean,
                }),
            }),
        }
    }

    fn set_number(&self, path: &str, value: f32) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.set_number(&rest, value),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::Number(current) => {
                    *current = value;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::Number,
                }),
            }),
        }
    }

    fn set_color(&self, path: &str, value: u32) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.set_color(&rest, value),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::Color(current) => {
                    *current = value;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::Color,
                }),
            }),
        }
    }

    fn set_string(&self, path: &str, value: &str) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.set_string(&rest, value),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::Str(current) => {
                    *current = value.to_string();
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::String,
                }),
            }),
        }
    }

    fn set_enum(&self, path: &str, label: &str) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.set_enum(&rest, label),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::Enum {
                    labels,
                    label: current,
                } => {
                    if !labels.iter().any(|known| known == label) {
                        return Err(SceneError::MissingEnumLabel(label.to_string()));
                    }
                    *current = label.to_string();
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::EnumType,
                }),
            }),
        }
    }

    fn set_image(&self, path: &str, value: Arc<dyn RenderImage>) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.set_image(&rest, value),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::Image { revision, image } => {
                    *image = Some(value);
                    *revision += 1;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::AssetImage,
                }),
            }),
        }
    }

    fn set_artboard(&self, path: &str, artboard: &dyn ArtboardInstance) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.set_artboard(&rest, artboard),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::ArtboardSlot { revision, name } => {
                    *name = Some(artboard.name().to_string());
                    *revision += 1;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::Artboard,
                }),
            }),
        }
    }

    fn set_nested(&self, path: &str, instance: ViewModelRef) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.set_nested(&rest, instance),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::Nested { revision, instance: current } => {
                    *current = instance;
                    *revision += 1;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::ViewModel,
                }),
            }),
        }
    }

    fn fire_trigger(&self, path: &str) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.fire_trigger(&rest),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::Trigger { fired } => {
                    *fired += 1;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::Trigger,
                }),
            }),
        }
    }

    fn nested(&self, path: &str) -> Result<ViewModelRef, SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.nested(&rest),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::Nested { instance, .. } => Ok(instance.clone()),
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::ViewModel,
                }),
            }),
        }
    }

    fn list_size(&self, path: &str) -> Result<usize, SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.list_size(&rest),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::List { items, .. } => Ok(items.len()),
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::List,
                }),
            }),
        }
    }

    fn list_at(&self, path: &str, index: usize) -> Result<ViewModelRef, SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.list_at(&rest, index),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::List { items, .. } => items.get(index).cloned().ok_or_else(|| {
                    SceneError::OutOfRange {
                        index,
                        len: items.len(),
                    }
                }),
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::List,
                }),
            }),
        }
    }

    fn list_insert(
        &self,
        path: &str,
        index: usize,
        instance: ViewModelRef,
    ) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.list_insert(&rest, index, instance),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::List { revision, items } => {
                    if index > items.len() {
                        return Err(SceneError::OutOfRange {
                            index,
                            len: items.len(),
                        });
                    }
                    items.insert(index, instance);
                    *revision += 1;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::List,
                }),
            }),
        }
    }

    fn list_append(&self, path: &str, instance: ViewModelRef) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.list_append(&rest, instance),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::List { revision, items } => {
                    items.push(instance);
                    *revision += 1;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::List,
                }),
            }),
        }
    }

    fn list_remove(&self, path: &str, index: usize) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.list_remove(&rest, index),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::List { revision, items } => {
                    if index >= items.len() {
                        return Err(SceneError::OutOfRange {
                            index,
                            len: items.len(),
                        });
                    }
                    items.remove(index);
                    *revision += 1;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::List,
                }),
            }),
        }
    }

    fn list_swap(&self, path: &str, a: usize, b: usize) -> Result<(), SceneError> {
        match self.step(path)? {
            PathStep::Descend(child, rest) => child.list_swap(&rest, a, b),
            PathStep::Leaf(leaf) => self.with_slot(&leaf, |slot| match slot {
                Slot::List { revision, items } => {
                    if a >= items.len() || b >= items.len() {
                        return Err(SceneError::OutOfRange {
                            index: a.max(b),
                            len: items.len(),
                        });
                    }
                    items.swap(a, b);
                    *revision += 1;
                    Ok(())
                }
                _ => Err(SceneError::TypeMismatch {
                    path: leaf.clone(),
                    expected: DataType::List,
                }),
            }),
        }
    }
}

// -------------------------------------------------------------------------
// Listener taps
// -------------------------------------------------------------------------

/// Everything a tap observed, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    FileLoaded(FileHandle, u64),
    FileError(FileHandle, u64, String),
    FileDeleted(FileHandle, u64),
    ArtboardsListed(FileHandle, u64, Vec<String>),
    ViewModelsListed(FileHandle, u64, Vec<String>),
    ViewModelInstanceNamesListed(FileHandle, u64, String, Vec<String>),
    ViewModelPropertiesListed(FileHandle, u64, String, Vec<PropertyData>),
    ViewModelEnumsListed(FileHandle, u64, Vec<ViewModelEnum>),
    ArtboardDeleted(ArtboardHandle, u64),
    ArtboardError(ArtboardHandle, u64, String),
    StateMachinesListed(ArtboardHandle, u64, Vec<String>),
    DefaultViewModelInfo(ArtboardHandle, u64, String, String),
    StateMachineDeleted(StateMachineHandle, u64),
    StateMachineError(StateMachineHandle, u64, String),
    StateMachineSettled(StateMachineHandle, u64),
    ViewModelDeleted(ViewModelInstanceHandle, u64),
    ViewModelError(ViewModelInstanceHandle, u64, String),
    ViewModelData(ViewModelInstanceHandle, u64, ViewModelInstanceData),
    ViewModelListSize(ViewModelInstanceHandle, u64, String, u64),
    ImageDecoded(RenderImageHandle, u64),
    ImageDeleted(RenderImageHandle, u64),
    ImageError(RenderImageHandle, u64, String),
    AudioDecoded(AudioSourceHandle, u64),
    AudioDeleted(AudioSourceHandle, u64),
    AudioError(AudioSourceHandle, u64, String),
    FontDecoded(FontHandle, u64),
    FontDeleted(FontHandle, u64),
    FontError(FontHandle, u64, String),
}

/// Shared log the taps append to.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| f(e)).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// One receiver implementing every listener trait; attach it to whichever
/// listener a test needs.
pub struct Tap {
    log: EventLog,
}

impl Tap {
    pub fn new(log: &EventLog) -> Self {
        Self { log: log.clone() }
    }
}

impl FileEvents for Tap {
    fn on_file_loaded(&mut self, handle: FileHandle, request_id: u64) {
        self.log.push(Event::FileLoaded(handle, request_id));
    }
    fn on_file_error(&mut self, handle: FileHandle, request_id: u64, error: String) {
        self.log.push(Event::FileError(handle, request_id, error));
    }
    fn on_file_deleted(&mut self, handle: FileHandle, request_id: u64) {
        self.log.push(Event::FileDeleted(handle, request_id));
    }
    fn on_artboards_listed(&mut self, handle: FileHandle, request_id: u64, names: Vec<String>) {
        self.log.push(Event::ArtboardsListed(handle, request_id, names));
    }
    fn on_view_models_listed(&mut self, handle: FileHandle, request_id: u64, names: Vec<String>) {
        self.log.push(Event::ViewModelsListed(handle, request_id, names));
    }
    fn on_view_model_instance_names_listed(
        &mut self,
        handle: FileHandle,
        request_id: u64,
        view_model: String,
        names: Vec<String>,
    ) {
        self.log.push(Event::ViewModelInstanceNamesListed(
            handle, request_id, view_model, names,
        ));
    }
    fn on_view_model_properties_listed(
        &mut self,
        handle: FileHandle,
        request_id: u64,
        view_model: String,
        properties: Vec<PropertyData>,
    ) {
        self.log.push(Event::ViewModelPropertiesListed(
            handle, request_id, view_model, properties,
        ));
    }
    fn on_view_model_enums_listed(
        &mut self,
        handle: FileHandle,
        request_id: u64,
        enums: Vec<ViewModelEnum>,
    ) {
        self.log.push(Event::ViewModelEnumsListed(handle, request_id, enums));
    }
}

impl ArtboardEvents for Tap {
    fn on_artboard_deleted(&mut self, handle: ArtboardHandle, request_id: u64) {
        self.log.push(Event::ArtboardDeleted(handle, request_id));
    }
    fn on_artboard_error(&mut self, handle: ArtboardHandle, request_id: u64, error: String) {
        self.log.push(Event::ArtboardError(handle, request_id, error));
    }
    fn on_state_machines_listed(
        &mut self,
        handle: ArtboardHandle,
        request_id: u64,
        names: Vec<String>,
    ) {
        self.log.push(Event::StateMachinesListed(handle, request_id, names));
    }
    fn on_default_view_model_info(
        &mut self,
        handle: ArtboardHandle,
        request_id: u64,
        view_model: String,
        instance: String,
    ) {
        self.log.push(Event::DefaultViewModelInfo(
            handle, request_id, view_model, instance,
        ));
    }
}

impl StateMachineEvents for Tap {
    fn on_state_machine_deleted(&mut self, handle: StateMachineHandle, request_id: u64) {
        self.log.push(Event::StateMachineDeleted(handle, request_id));
    }
    fn on_state_machine_error(
        &mut self,
        handle: StateMachineHandle,
        request_id: u64,
        error: String,
    ) {
        self.log.push(Event::StateMachineError(handle, request_id, error));
    }
    fn on_state_machine_settled(&mut self, handle: StateMachineHandle, request_id: u64) {
        self.log.push(Event::StateMachineSettled(handle, request_id));
    }
}

impl ViewModelInstanceEvents for Tap {
    fn on_view_model_deleted(&mut self, handle: ViewModelInstanceHandle, request_id: u64) {
        self.log.push(Event::ViewModelDeleted(handle, request_id));
    }
    fn on_view_model_error(
        &mut self,
        handle: ViewModelInstanceHandle,
        request_id: u64,
        error: String,
    ) {
        self.log.push(Event::ViewModelError(handle, request_id, error));
    }
    fn on_view_model_data(
        &mut self,
        handle: ViewModelInstanceHandle,
        request_id: u64,
        data: ViewModelInstanceData,
    ) {
        self.log.push(Event::ViewModelData(handle, request_id, data));
    }
    fn on_view_model_list_size(
        &mut self,
        handle: ViewModelInstanceHandle,
        request_id: u64,
        path: String,
        size: u64,
    ) {
        self.log.push(Event::ViewModelListSize(handle, request_id, path, size));
    }
}

impl RenderImageEvents for Tap {
    fn on_render_image_decoded(&mut self, handle: RenderImageHandle, request_id: u64) {
        self.log.push(Event::ImageDecoded(handle, request_id));
    }
    fn on_render_image_deleted(&mut self, handle: RenderImageHandle, request_id: u64) {
        self.log.push(Event::ImageDeleted(handle, request_id));
    }
    fn on_render_image_error(&mut self, handle: RenderImageHandle, request_id: u64, error: String) {
        self.log.push(Event::ImageError(handle, request_id, error));
    }
}

impl AudioSourceEvents for Tap {
    fn on_audio_source_decoded(&mut self, handle: AudioSourceHandle, request_id: u64) {
        self.log.push(Event::AudioDecoded(handle, request_id));
    }
    fn on_audio_source_deleted(&mut self, handle: AudioSourceHandle, request_id: u64) {
        self.log.push(Event::AudioDeleted(handle, request_id));
    }
    fn on_audio_source_error(&mut self, handle: AudioSourceHandle, request_id: u64, error: String) {
        self.log.push(Event::AudioError(handle, request_id, error));
    }
}

impl FontEvents for Tap {
    fn on_font_decoded(&mut self, handle: FontHandle, request_id: u64) {
        self.log.push(Event::FontDecoded(handle, request_id));
    }
    fn on_font_deleted(&mut self, handle: FontHandle, request_id: u64) {
        self.log.push(Event::FontDeleted(handle, request_id));
    }
    fn on_font_error(&mut self, handle: FontHandle, request_id: u64, error: String) {
        self.log.push(Event::FontError(handle, request_id, error));
    }
}

// -------------------------------------------------------------------------
// Thread helpers
// -------------------------------------------------------------------------

/// Installs the fmt subscriber once so `RUST_LOG=commands.server=debug`
/// shows the protocol flow during a test run.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Spawns a server thread that serves until disconnect.
pub fn start_server(queue: CommandQueue, factory: TestFactory) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut server = CommandServer::new(queue, Box::new(factory));
        server.serve_until_disconnect();
    })
}

/// Blocks until the server has drained everything recorded before this call.
pub fn wait_for_server(queue: &CommandQueue) {
    with_server(queue, |_| ());
}

/// Runs `f` on the server thread and hands its result back.
pub fn with_server<T: Send + 'static>(
    queue: &CommandQueue,
    f: impl FnOnce(&mut CommandServer) -> T + Send + 'static,
) -> T {
    let (tx, rx) = crossbeam_channel::bounded(1);
    queue.run_once(move |server| {
        let _ = tx.send(f(server));
    });
    rx.recv().expect("server thread is gone")
}

/// Round-trips outstanding work: drain on the server, then deliver replies.
pub fn settle(queue: &CommandQueue) {
    wait_for_server(queue);
    queue.process_messages();
}
