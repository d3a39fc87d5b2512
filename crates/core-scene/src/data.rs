//! Shared data model for view-model properties: type tags, property
//! definitions, enum definitions, and the comparable property values the
//! executor reads when sweeping subscriptions.

use thiserror::Error;

/// Type tag for a view-model property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataType {
    None = 0,
    String = 1,
    Number = 2,
    Boolean = 3,
    Color = 4,
    List = 5,
    EnumType = 6,
    Trigger = 7,
    ViewModel = 8,
    Integer = 9,
    SymbolListIndex = 10,
    AssetImage = 11,
    Artboard = 12,
}

impl DataType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(DataType::None),
            1 => Some(DataType::String),
            2 => Some(DataType::Number),
            3 => Some(DataType::Boolean),
            4 => Some(DataType::Color),
            5 => Some(DataType::List),
            6 => Some(DataType::EnumType),
            7 => Some(DataType::Trigger),
            8 => Some(DataType::ViewModel),
            9 => Some(DataType::Integer),
            10 => Some(DataType::SymbolListIndex),
            11 => Some(DataType::AssetImage),
            12 => Some(DataType::Artboard),
            _ => None,
        }
    }
}

/// One property definition as reported by a loaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyData {
    pub data_type: DataType,
    pub name: String,
    /// For enum properties, the name of the enum definition; empty otherwise.
    pub meta: String,
}

impl PropertyData {
    pub fn new(data_type: DataType, name: impl Into<String>) -> Self {
        Self {
            data_type,
            name: name.into(),
            meta: String::new(),
        }
    }

    pub fn with_meta(data_type: DataType, name: impl Into<String>, meta: impl Into<String>) -> Self {
        Self {
            data_type,
            name: name.into(),
            meta: meta.into(),
        }
    }
}

/// An enum definition: a name plus its ordered labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewModelEnum {
    pub name: String,
    pub enumerants: Vec<String>,
}

/// A property's current value as read on the executor side.
///
/// Payload-less property kinds (triggers, nested view models, images, lists)
/// carry a revision counter instead of a value so change detection still
/// works: implementations bump the revision every time the slot fires or is
/// reassigned.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Number(f32),
    /// 32-bit ARGB.
    Color(u32),
    Str(String),
    EnumLabel(String),
    Trigger(u64),
    ViewModel(u64),
    Image(u64),
    List(u64),
}

impl PropertyValue {
    pub fn data_type(&self) -> DataType {
        match self {
            PropertyValue::Bool(_) => DataType::Boolean,
            PropertyValue::Number(_) => DataType::Number,
            PropertyValue::Color(_) => DataType::Color,
            PropertyValue::Str(_) => DataType::String,
            PropertyValue::EnumLabel(_) => DataType::EnumType,
            PropertyValue::Trigger(_) => DataType::Trigger,
            PropertyValue::ViewModel(_) => DataType::ViewModel,
            PropertyValue::Image(_) => DataType::AssetImage,
            PropertyValue::List(_) => DataType::List,
        }
    }
}

/// Errors reported by scene collaborators. The executor converts these to
/// category-scoped error replies; the display strings surface verbatim in
/// listener callbacks.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("no property at path '{0}'")]
    MissingProperty(String),
    #[error("property '{path}' is not a {expected:?}")]
    TypeMismatch { path: String, expected: DataType },
    #[error("index {index} out of range for list of {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("no artboard named '{0}'")]
    MissingArtboard(String),
    #[error("no state machine named '{0}'")]
    MissingStateMachine(String),
    #[error("no view model named '{0}'")]
    MissingViewModel(String),
    #[error("no view model instance named '{0}'")]
    MissingViewModelInstance(String),
    #[error("no enum label '{0}'")]
    MissingEnumLabel(String),
    #[error("decode failed: {0}")]
    Decode(String),
}
