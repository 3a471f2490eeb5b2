// Attributes
// A named slot on an object or type: a value plus one byte of property
// flags. The flag byte is part of the embedding ABI.

use crate::identifier::StringId;
use bitflags::bitflags;
use rustc_hash::FxHashMap;

use super::Object;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AttrFlags: u8 {
        /// Assignment is rejected with an exception.
        const CONST = 1 << 0;
        /// Accessible only with the owning object as `this`.
        const PRIVATE = 1 << 1;
        /// Shared by all instances; unset means object-attribute (copied
        /// into each new instance).
        const TYPE_ATTR = 1 << 2;
        /// Value is evaluated (instantiated or called) at object creation.
        const INIT = 1 << 3;
        /// Must shadow an inherited attribute; warns otherwise.
        const OVERRIDE = 1 << 4;
    }
}

/// The flag byte of a plain public object-attribute.
pub const ATTR_NORMAL_ATTRIBUTE: AttrFlags = AttrFlags::empty();

impl AttrFlags {
    /// The only flags consulted during assignment.
    pub const ASSIGNMENT_RELEVANT: AttrFlags =
        AttrFlags::from_bits_retain(AttrFlags::CONST.bits() | AttrFlags::PRIVATE.bits());
}

#[derive(Debug, Clone)]
pub struct Attribute {
    value: Object,
    properties: AttrFlags,
}

impl Attribute {
    pub fn new(value: Object, properties: AttrFlags) -> Self {
        Self { value, properties }
    }

    pub fn normal(value: Object) -> Self {
        Self::new(value, ATTR_NORMAL_ATTRIBUTE)
    }

    pub fn value(&self) -> &Object {
        &self.value
    }

    pub fn into_value(self) -> Object {
        self.value
    }

    pub fn properties(&self) -> AttrFlags {
        self.properties
    }

    pub fn set_value(&mut self, value: Object) {
        self.value = value;
    }

    pub fn is_const(&self) -> bool {
        self.properties.contains(AttrFlags::CONST)
    }

    pub fn is_private(&self) -> bool {
        self.properties.contains(AttrFlags::PRIVATE)
    }

    pub fn is_type_attribute(&self) -> bool {
        self.properties.contains(AttrFlags::TYPE_ATTR)
    }

    pub fn is_obj_attribute(&self) -> bool {
        !self.properties.contains(AttrFlags::TYPE_ATTR)
    }

    pub fn is_initializable(&self) -> bool {
        self.properties.contains(AttrFlags::INIT)
    }

    pub fn is_overriding(&self) -> bool {
        self.properties.contains(AttrFlags::OVERRIDE)
    }
}

/// Mapping identifier -> attribute; insertion order is irrelevant.
#[derive(Debug, Clone, Default)]
pub struct AttributeContainer {
    attributes: FxHashMap<StringId, Attribute>,
}

impl AttributeContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access(&self, id: StringId) -> Option<&Attribute> {
        self.attributes.get(&id)
    }

    pub fn access_mut(&mut self, id: StringId) -> Option<&mut Attribute> {
        self.attributes.get_mut(&id)
    }

    pub fn set(&mut self, id: StringId, attribute: Attribute) {
        self.attributes.insert(id, attribute);
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StringId, &Attribute)> {
        self.attributes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&StringId, &mut Attribute)> {
        self.attributes.iter_mut()
    }

    /// Copies every attribute of `other` into this container; values of
    /// call-by-value types are cloned, everything else is shared.
    pub fn clone_attributes_from(&mut self, other: &AttributeContainer) {
        for (&id, attribute) in other.attributes.iter() {
            self.set(
                id,
                Attribute::new(attribute.value().get_ref_or_copy(), attribute.properties()),
            );
        }
    }

    pub fn collect(&self) -> FxHashMap<StringId, Object> {
        self.attributes
            .iter()
            .map(|(&id, attribute)| (id, attribute.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_byte_layout_is_stable() {
        assert_eq!(ATTR_NORMAL_ATTRIBUTE.bits(), 0);
        assert_eq!(AttrFlags::CONST.bits(), 1);
        assert_eq!(AttrFlags::PRIVATE.bits(), 2);
        assert_eq!(AttrFlags::TYPE_ATTR.bits(), 4);
        assert_eq!(AttrFlags::INIT.bits(), 8);
        assert_eq!(AttrFlags::OVERRIDE.bits(), 16);
        assert_eq!(AttrFlags::ASSIGNMENT_RELEVANT.bits(), 3);
    }

    #[test]
    fn container_set_replaces() {
        let id = StringId::new("x");
        let mut container = AttributeContainer::new();
        container.set(id, Attribute::normal(Object::number(1.0)));
        container.set(id, Attribute::normal(Object::number(2.0)));
        assert_eq!(container.len(), 1);
        assert_eq!(container.access(id).unwrap().value().to_double(), 2.0);
    }

    #[test]
    fn obj_and_type_attributes_are_complementary() {
        let attribute = Attribute::new(Object::Void, AttrFlags::TYPE_ATTR);
        assert!(attribute.is_type_attribute());
        assert!(!attribute.is_obj_attribute());
        let attribute = Attribute::normal(Object::Void);
        assert!(attribute.is_obj_attribute());
    }
}
