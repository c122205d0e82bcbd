//! Kernel argument descriptors.
//!
//! Each kernel argument of a compute actor is described by one [`Arg`]:
//! its element type and its data direction.
//!
//! | Descriptor | Message field | Buffer | Transfers |
//! |---|---|---|---|
//! | [`Arg::input`] | `Vec<T>` | read-only | host to device |
//! | [`Arg::in_out`] | `Vec<T>` | read-write | host to device, device to host |
//! | [`Arg::output`] | none | write-only | device to host |
//!
//! Output sizes are element counts. Unless an output carries its own size
//! calculator, it has one element per work-item.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use bytemuck::Pod;

use crate::backend::{HostBytes, MemAccess};
use crate::message::{Element, Message};

/// Element types that can be copied to and from device buffers.
pub trait Scalar: Pod + Send + Sync {}

impl<T: Pod + Send + Sync> Scalar for T {}

/// Computes the element count of an output from the (mapped) request.
pub type SizeCalculator = Arc<dyn Fn(&Message) -> usize + Send + Sync>;

/// Size policy of an output argument.
#[derive(Clone)]
pub enum OutputSize {
    /// One element per work-item.
    Default,
    /// Element count computed from the request.
    Custom(SizeCalculator),
}

impl OutputSize {
    /// Resolve the element count for `message`.
    pub fn resolve(&self, message: &Message, default: usize) -> usize {
        match self {
            OutputSize::Default => default,
            OutputSize::Custom(calculate) => calculate(message),
        }
    }
}

impl fmt::Debug for OutputSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSize::Default => f.write_str("Default"),
            OutputSize::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Data direction of an argument.
#[derive(Debug, Clone)]
pub enum ArgKind {
    /// Read from the message, copied to the device.
    Input,
    /// Read from the message, copied to the device and back.
    InputOutput,
    /// Produced by the kernel, copied back.
    Output(OutputSize),
}

/// Moves one element type between messages and device bytes.
#[derive(Clone, Copy)]
pub struct ElementCodec {
    type_id: TypeId,
    type_name: &'static str,
    element_size: usize,
    view: fn(&(dyn Any + Send + Sync)) -> Option<&[u8]>,
    decode: fn(Vec<u8>) -> Element,
}

fn view_vec<T: Scalar>(value: &(dyn Any + Send + Sync)) -> Option<&[u8]> {
    value
        .downcast_ref::<Vec<T>>()
        .map(|values| bytemuck::cast_slice(values.as_slice()))
}

fn decode_vec<T: Scalar>(bytes: Vec<u8>) -> Element {
    Element::new(bytemuck::pod_collect_to_vec::<u8, T>(&bytes))
}

impl ElementCodec {
    /// Codec for `Vec<T>` message fields.
    pub fn of<T: Scalar>() -> Self {
        Self {
            type_id: TypeId::of::<Vec<T>>(),
            type_name: type_name::<Vec<T>>(),
            element_size: size_of::<T>(),
            view: view_vec::<T>,
            decode: decode_vec::<T>,
        }
    }

    /// Type id of the message field.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the message field.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Bytes of a matching message element, sharing its ownership.
    pub fn host_bytes(&self, element: &Element) -> Option<HostBytes> {
        if element.type_id() != self.type_id {
            return None;
        }
        HostBytes::new(element.shared(), self.view)
    }

    /// Rebuild a `Vec<T>` element from device bytes.
    pub fn decode(&self, bytes: Vec<u8>) -> Element {
        (self.decode)(bytes)
    }
}

impl fmt::Debug for ElementCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Descriptor of one kernel argument.
///
/// The position of a descriptor in the actor's argument list is the kernel
/// argument index of its buffer.
#[derive(Debug, Clone)]
pub struct Arg {
    kind: ArgKind,
    codec: ElementCodec,
}

impl Arg {
    /// Input-only argument taken from a `Vec<T>` message field.
    pub fn input<T: Scalar>() -> Self {
        Self {
            kind: ArgKind::Input,
            codec: ElementCodec::of::<T>(),
        }
    }

    /// Argument copied to the device and returned after execution.
    pub fn in_out<T: Scalar>() -> Self {
        Self {
            kind: ArgKind::InputOutput,
            codec: ElementCodec::of::<T>(),
        }
    }

    /// Output-only argument with one element per work-item.
    pub fn output<T: Scalar>() -> Self {
        Self {
            kind: ArgKind::Output(OutputSize::Default),
            codec: ElementCodec::of::<T>(),
        }
    }

    /// Output-only argument whose element count is computed from the request.
    pub fn output_sized<T, F>(calculate: F) -> Self
    where
        T: Scalar,
        F: Fn(&Message) -> usize + Send + Sync + 'static,
    {
        Self {
            kind: ArgKind::Output(OutputSize::Custom(Arc::new(calculate))),
            codec: ElementCodec::of::<T>(),
        }
    }

    /// Data direction.
    pub fn kind(&self) -> &ArgKind {
        &self.kind
    }

    /// Element codec.
    pub fn codec(&self) -> &ElementCodec {
        &self.codec
    }

    /// Check if the argument is read from the request.
    pub fn is_input(&self) -> bool {
        matches!(self.kind, ArgKind::Input | ArgKind::InputOutput)
    }

    /// Check if the argument appears in the reply.
    pub fn is_output(&self) -> bool {
        matches!(self.kind, ArgKind::InputOutput | ArgKind::Output(_))
    }

    /// Device access mode of the argument's buffer.
    pub fn mem_access(&self) -> MemAccess {
        match self.kind {
            ArgKind::Input => MemAccess::ReadOnly,
            ArgKind::InputOutput => MemAccess::ReadWrite,
            ArgKind::Output(_) => MemAccess::WriteOnly,
        }
    }
}

/// The ordered argument list of one compute actor.
#[derive(Debug, Clone)]
pub struct ArgList {
    args: Vec<Arg>,
    input_types: Vec<TypeId>,
}

impl ArgList {
    /// Build from descriptors in kernel argument order.
    pub fn new(args: Vec<Arg>) -> Self {
        let input_types = args
            .iter()
            .filter(|arg| arg.is_input())
            .map(|arg| arg.codec.type_id)
            .collect();
        Self { args, input_types }
    }

    /// Descriptors in kernel argument order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arg> {
        self.args.iter()
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Check if there are no descriptors.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Expected message field types, in order.
    pub fn input_types(&self) -> &[TypeId] {
        &self.input_types
    }

    /// Number of reply elements.
    pub fn output_count(&self) -> usize {
        self.args.iter().filter(|arg| arg.is_output()).count()
    }

    /// Check that `message` carries exactly the input fields.
    pub fn accepts(&self, message: &Message) -> bool {
        message.matches(&self.input_types)
    }
}

impl<'a> IntoIterator for &'a ArgList {
    type Item = &'a Arg;
    type IntoIter = std::slice::Iter<'a, Arg>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::IntoMessage;

    #[test]
    fn test_kinds_and_access() {
        assert_eq!(Arg::input::<i32>().mem_access(), MemAccess::ReadOnly);
        assert_eq!(Arg::in_out::<i32>().mem_access(), MemAccess::ReadWrite);
        assert_eq!(Arg::output::<i32>().mem_access(), MemAccess::WriteOnly);

        assert!(Arg::in_out::<f32>().is_input());
        assert!(Arg::in_out::<f32>().is_output());
        assert!(!Arg::output::<f32>().is_input());
    }

    #[test]
    fn test_host_bytes() {
        let codec = ElementCodec::of::<u32>();
        let msg = (vec![1u32, 2],).into_message();
        let bytes = codec.host_bytes(msg.element(0).unwrap()).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes.as_slice(), bytemuck::cast_slice::<u32, u8>(&[1, 2]));

        let wrong = (vec![1i64],).into_message();
        assert!(codec.host_bytes(wrong.element(0).unwrap()).is_none());
    }

    #[test]
    fn test_decode() {
        let codec = ElementCodec::of::<f32>();
        let bytes = bytemuck::cast_slice::<f32, u8>(&[1.5, -2.0]).to_vec();
        let element = codec.decode(bytes);
        assert_eq!(element.downcast_ref::<Vec<f32>>(), Some(&vec![1.5, -2.0]));
    }

    #[test]
    fn test_output_size() {
        let msg = (vec![0i32; 10],).into_message();
        assert_eq!(OutputSize::Default.resolve(&msg, 64), 64);

        let arg = Arg::output_sized::<i32, _>(|m: &Message| m.get::<Vec<i32>>(0).map_or(0, Vec::len) / 2);
        match arg.kind() {
            ArgKind::Output(size) => assert_eq!(size.resolve(&msg, 64), 5),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_arg_list() {
        let list = ArgList::new(vec![
            Arg::input::<f32>(),
            Arg::output::<f32>(),
            Arg::in_out::<i32>(),
        ]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.output_count(), 2);
        assert_eq!(
            list.input_types(),
            &[TypeId::of::<Vec<f32>>(), TypeId::of::<Vec<i32>>()]
        );

        assert!(list.accepts(&(vec![1.0f32], vec![1i32]).into_message()));
        assert!(!list.accepts(&(vec![1i32], vec![1.0f32]).into_message()));
        assert!(!list.accepts(&(vec![1.0f32],).into_message()));
    }
}
