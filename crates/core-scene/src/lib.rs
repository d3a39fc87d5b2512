//! Collaborator contracts for the command boundary.
//!
//! The command queue and its server move work between an application thread
//! and a rendering thread; everything they operate *on* — loaded files,
//! artboards, state machines, view-model instances, decoded assets — lives
//! behind the traits in this crate. The executor resolves opaque handles to
//! these objects and never looks inside them.
//!
//! Threading expectations:
//! - [`Factory`] is `Send`: it is handed to the server once and moves to the
//!   server thread with it.
//! - [`RenderImage`], [`AudioSource`], [`Font`], and [`FileAssetLoader`] are
//!   `Send + Sync`: externally created assets are recorded on the
//!   application thread and consumed on the server thread.
//! - Everything else is created, used, and dropped on the server thread and
//!   carries no `Send` bound. View-model instances are shared (nested
//!   references alias the same underlying instance), so they travel as
//!   [`ViewModelRef`] and take `&self`; interior mutability is the
//!   implementor's concern.

use std::rc::Rc;
use std::sync::Arc;

pub mod data;
pub mod geometry;

pub use data::{DataType, PropertyData, PropertyValue, SceneError, ViewModelEnum};
pub use geometry::{Aabb, Fit, Vec2D, artboard_point};

/// Shared handle to a view-model instance on the server thread.
pub type ViewModelRef = Rc<dyn ViewModelInstance>;

/// Decoded image resource. Opaque to the command boundary.
pub trait RenderImage: Send + Sync {}

/// Decoded audio resource. Opaque to the command boundary.
pub trait AudioSource: Send + Sync {}

/// Decoded font resource. Opaque to the command boundary.
pub trait Font: Send + Sync {}

/// Render target handed to draw callbacks by collaborator code. Opaque.
pub trait Renderer {}

/// Retained path geometry produced by the factory. Opaque.
pub trait RenderPath {}

/// Paint state produced by the factory. Opaque.
pub trait RenderPaint {}

/// Resolves out-of-band assets referenced by a file while it loads.
pub trait FileAssetLoader: Send + Sync {
    /// Returns the raw contents for the named asset, or `None` to let the
    /// file's embedded fallback (if any) stand.
    fn load_contents(&self, name: &str) -> Option<Vec<u8>>;
}

/// Produces scene resources from raw bytes. Provided once at server
/// construction; every decode and file load funnels through it.
pub trait Factory: Send {
    fn load_file(
        &self,
        bytes: Vec<u8>,
        loader: Option<Arc<dyn FileAssetLoader>>,
    ) -> Result<Box<dyn FileSource>, SceneError>;

    fn decode_image(&self, bytes: Vec<u8>) -> Result<Arc<dyn RenderImage>, SceneError>;
    fn decode_audio(&self, bytes: Vec<u8>) -> Result<Arc<dyn AudioSource>, SceneError>;
    fn decode_font(&self, bytes: Vec<u8>) -> Result<Arc<dyn Font>, SceneError>;

    fn make_render_path(&self) -> Box<dyn RenderPath>;
    fn make_render_paint(&self) -> Box<dyn RenderPaint>;
}

/// A loaded file: a bag of artboard definitions, view-model definitions, and
/// enum definitions.
pub trait FileSource {
    fn artboard_names(&self) -> Vec<String>;

    /// Instantiates the file's default artboard.
    fn artboard_default(&self) -> Result<Box<dyn ArtboardInstance>, SceneError>;

    /// Instantiates the named artboard. An empty name means the default.
    fn artboard_named(&self, name: &str) -> Result<Box<dyn ArtboardInstance>, SceneError>;

    fn view_model_names(&self) -> Vec<String>;
    fn view_model_instance_names(&self, view_model: &str) -> Result<Vec<String>, SceneError>;
    fn view_model_properties(&self, view_model: &str) -> Result<Vec<PropertyData>, SceneError>;
    fn view_model_enums(&self) -> Vec<ViewModelEnum>;

    /// Instantiates a named instance of a view model. An empty instance name
    /// means the default instance.
    fn instantiate_view_model(
        &self,
        view_model: &str,
        instance: &str,
    ) -> Result<ViewModelRef, SceneError>;

    /// Instantiates a view model with every property at its zero value.
    fn instantiate_blank_view_model(&self, view_model: &str) -> Result<ViewModelRef, SceneError>;
}

/// An instantiated artboard.
pub trait ArtboardInstance {
    fn name(&self) -> &str;
    fn bounds(&self) -> Aabb;

    fn state_machine_names(&self) -> Vec<String>;

    /// Instantiates the artboard's default state machine. Implementations
    /// may substitute a static fallback scene when the artboard has none.
    fn default_state_machine(&self) -> Result<Box<dyn StateMachineInstance>, SceneError>;

    /// Instantiates the named state machine. An empty name means the default.
    fn state_machine_named(&self, name: &str) -> Result<Box<dyn StateMachineInstance>, SceneError>;

    /// The artboard's associated view model and preferred instance, if it
    /// has one: `(view_model_name, instance_name)`.
    fn default_view_model_info(&self) -> Option<(String, String)>;

    fn draw(&self, renderer: &mut dyn Renderer);
}

/// An instantiated state machine.
pub trait StateMachineInstance {
    fn name(&self) -> &str;

    /// Advances by `dt` seconds and applies the result. Returns `false` once
    /// the machine has settled: further advances change nothing until an
    /// input or pointer event wakes it.
    fn advance_and_apply(&mut self, dt: f32) -> bool;

    /// Pointer events in artboard space.
    fn pointer_down(&mut self, position: Vec2D);
    fn pointer_up(&mut self, position: Vec2D);
    fn pointer_move(&mut self, position: Vec2D);
    fn pointer_exit(&mut self, position: Vec2D);

    /// Binds a view-model instance to the machine's data context.
    fn bind_view_model(&mut self, instance: ViewModelRef);

    fn get_bool(&self, input: &str) -> Option<bool>;
    fn get_number(&self, input: &str) -> Option<f32>;
    fn get_enum(&self, input: &str) -> Option<String>;
    fn fire_trigger(&mut self, input: &str) -> bool;
}

/// An instantiated view model.
///
/// Properties are addressed by slash-separated paths ("Nested/Inner Num")
/// resolved fresh on every call. All mutators report
/// [`SceneError::MissingProperty`] for a bad path and
/// [`SceneError::TypeMismatch`] for a live path of the wrong type, leaving
/// prior state untouched.
pub trait ViewModelInstance {
    /// The declared type of the property at `path`.
    fn property_type(&self, path: &str) -> Result<DataType, SceneError>;

    /// Reads the property at `path`, checking it against `expected`.
    fn property(&self, path: &str, expected: DataType) -> Result<PropertyValue, SceneError>;

    fn set_bool(&self, path: &str, value: bool) -> Result<(), SceneError>;
    fn set_number(&self, path: &str, value: f32) -> Result<(), SceneError>;
    /// `value` is 32-bit ARGB.
    fn set_color(&self, path: &str, value: u32) -> Result<(), SceneError>;
    fn set_string(&self, path: &str, value: &str) -> Result<(), SceneError>;
    fn set_enum(&self, path: &str, label: &str) -> Result<(), SceneError>;
    fn set_image(&self, path: &str, image: Arc<dyn RenderImage>) -> Result<(), SceneError>;
    fn set_artboard(&self, path: &str, artboard: &dyn ArtboardInstance) -> Result<(), SceneError>;
    fn set_nested(&self, path: &str, instance: ViewModelRef) -> Result<(), SceneError>;
    fn fire_trigger(&self, path: &str) -> Result<(), SceneError>;

    /// The view-model instance nested at `path`.
    fn nested(&self, path: &str) -> Result<ViewModelRef, SceneError>;

    fn list_size(&self, path: &str) -> Result<usize, SceneError>;
    fn list_at(&self, path: &str, index: usize) -> Result<ViewModelRef, SceneError>;
    fn list_insert(&self, path: &str, index: usize, instance: ViewModelRef)
    -> Result<(), SceneError>;
    fn list_append(&self, path: &str, instance: ViewModelRef) -> Result<(), SceneError>;
    fn list_remove(&self, path: &str, index: usize) -> Result<(), SceneError>;
    fn list_swap(&self, path: &str, a: usize, b: usize) -> Result<(), SceneError>;
}
