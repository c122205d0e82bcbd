//! Dynamically typed actor messages.
//!
//! A [`Message`] is an ordered list of reference-counted elements of any
//! `Send + Sync` type. Compute actors match a message by the exact
//! [`TypeId`] sequence of its elements, so a `Vec<i32>` argument and a
//! `Vec<u32>` argument are different shapes.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// One element of a [`Message`].
#[derive(Clone)]
pub struct Element {
    value: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Element {
    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Type id of the wrapped value.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the wrapped value, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Check if the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrow the wrapped value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Shared handle to the wrapped value.
    ///
    /// Holding the handle keeps the value alive independently of the
    /// message it came from.
    pub fn shared(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.value)
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// An ordered, dynamically typed message.
#[derive(Clone, Default)]
pub struct Message {
    elements: Vec<Element>,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a message from elements.
    pub fn from_elements(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    /// Append a value, builder style.
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    /// Append a value.
    pub fn push<T: Any + Send + Sync>(&mut self, value: T) {
        self.elements.push(Element::new(value));
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the message has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element at `index`.
    pub fn element(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    /// All elements in order.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Borrow element `index` as `T`.
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.elements.get(index)?.downcast_ref::<T>()
    }

    /// Clone element `index` out as `T`.
    pub fn get_cloned<T: Any + Clone>(&self, index: usize) -> Option<T> {
        self.get::<T>(index).cloned()
    }

    /// Check that the element types are exactly `types`, in order.
    pub fn matches(&self, types: &[TypeId]) -> bool {
        self.elements.len() == types.len()
            && self
                .elements
                .iter()
                .zip(types)
                .all(|(element, expected)| element.type_id == *expected)
    }

    /// Type names of the elements, for diagnostics.
    pub fn type_names(&self) -> Vec<&'static str> {
        self.elements.iter().map(Element::type_name).collect()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Message").field(&self.type_names()).finish()
    }
}

/// Conversion into a [`Message`].
///
/// Implemented for `Message` itself and for tuples of up to eight values,
/// so `actor.send((vec![1i32, 2, 3],))` works without building a message
/// by hand.
pub trait IntoMessage {
    /// Perform the conversion.
    fn into_message(self) -> Message;
}

impl IntoMessage for Message {
    fn into_message(self) -> Message {
        self
    }
}

impl IntoMessage for () {
    fn into_message(self) -> Message {
        Message::new()
    }
}

macro_rules! impl_into_message_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: Any + Send + Sync),+> IntoMessage for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_message(self) -> Message {
                let ($($name,)+) = self;
                Message::from_elements(vec![$(Element::new($name)),+])
            }
        }
    };
}

impl_into_message_for_tuple!(A);
impl_into_message_for_tuple!(A, B);
impl_into_message_for_tuple!(A, B, C);
impl_into_message_for_tuple!(A, B, C, D);
impl_into_message_for_tuple!(A, B, C, D, E);
impl_into_message_for_tuple!(A, B, C, D, E, F);
impl_into_message_for_tuple!(A, B, C, D, E, F, G);
impl_into_message_for_tuple!(A, B, C, D, E, F, G, H);
