//! Listener-facing property payloads and their wire form.

use core_scene::{DataType, PropertyData, PropertyValue};
use core_stream::{ObjectStream, PodStream};

/// One property value as delivered to listeners: the property's metadata
/// plus exactly one active value arm. Kinds without a transportable payload
/// (nested view models, triggers, images, lists) travel as placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewModelInstanceData {
    pub property: PropertyData,
    pub value: ViewModelValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewModelValue {
    Bool(bool),
    Number(f32),
    /// 32-bit ARGB.
    Color(u32),
    Str(String),
    EnumLabel(String),
    ViewModel,
    Trigger,
    Image,
    List,
}

impl From<PropertyValue> for ViewModelValue {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Bool(v) => ViewModelValue::Bool(v),
            PropertyValue::Number(v) => ViewModelValue::Number(v),
            PropertyValue::Color(v) => ViewModelValue::Color(v),
            PropertyValue::Str(v) => ViewModelValue::Str(v),
            PropertyValue::EnumLabel(v) => ViewModelValue::EnumLabel(v),
            PropertyValue::ViewModel(_) => ViewModelValue::ViewModel,
            PropertyValue::Trigger(_) => ViewModelValue::Trigger,
            PropertyValue::Image(_) => ViewModelValue::Image,
            PropertyValue::List(_) => ViewModelValue::List,
        }
    }
}

impl ViewModelInstanceData {
    pub(crate) fn from_property(path: &str, value: PropertyValue) -> Self {
        let data_type = value.data_type();
        Self {
            property: PropertyData::new(data_type, path),
            value: value.into(),
        }
    }

    /// Writes the payload after the message's handle and request id. The
    /// reader picks the value arm from the type tag, so tag and arm can
    /// never disagree.
    pub(crate) fn encode(&self, stream: &mut PodStream, names: &mut ObjectStream<String>) {
        stream.push(self.property.data_type as u8);
        names.push(self.property.name.clone());
        match &self.value {
            ViewModelValue::Bool(v) => stream.push(*v),
            ViewModelValue::Number(v) => stream.push(*v),
            ViewModelValue::Color(v) => stream.push(*v),
            ViewModelValue::Str(v) => names.push(v.clone()),
            ViewModelValue::EnumLabel(v) => names.push(v.clone()),
            ViewModelValue::ViewModel
            | ViewModelValue::Trigger
            | ViewModelValue::Image
            | ViewModelValue::List => {}
        }
    }

    pub(crate) fn decode(stream: &mut PodStream, names: &mut ObjectStream<String>) -> Self {
        let data_type = DataType::from_u8(stream.pop::<u8>())
            .unwrap_or_else(|| panic!("corrupt stream: unknown DataType"));
        let name = names.pop();
        let value = match data_type {
            DataType::Boolean => ViewModelValue::Bool(stream.pop()),
            DataType::Number => ViewModelValue::Number(stream.pop()),
            DataType::Color => ViewModelValue::Color(stream.pop()),
            DataType::String => ViewModelValue::Str(names.pop()),
            DataType::EnumType => ViewModelValue::EnumLabel(names.pop()),
            DataType::ViewModel => ViewModelValue::ViewModel,
            DataType::Trigger => ViewModelValue::Trigger,
            DataType::AssetImage => ViewModelValue::Image,
            DataType::List => ViewModelValue::List,
            other => panic!("corrupt stream: {other:?} is not a property payload type"),
        };
        Self {
            property: PropertyData::new(data_type, name),
            value,
        }
    }
}
