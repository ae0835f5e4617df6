//! Custom attribute values.
//!
//! A decoded value carries everything needed to write it back: integers keep
//! their width, enum values keep the enum name next to their underlying value,
//! and boxed values keep the type tag they were stored with.

use crate::model::MethodHandle;

/// `CorSerializationType` tags, ECMA-335 II.23.3
#[allow(non_snake_case, missing_docs)]
pub mod SERIALIZATION_TYPE {
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const SZARRAY: u8 = 0x1D;
    pub const TYPE: u8 = 0x50;
    pub const TAGGED_OBJECT: u8 = 0x51;
    pub const FIELD: u8 = 0x53;
    pub const PROPERTY: u8 = 0x54;
    pub const ENUM: u8 = 0x55;
}

/// The prolog every custom attribute blob starts with
pub const CUSTOM_ATTRIBUTE_PROLOG: u16 = 0x0001;

/// The type of a named argument or a boxed value, as serialized in the blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CustomAttributeType {
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// `sbyte`
    I1,
    /// `byte`
    U1,
    /// `short`
    I2,
    /// `ushort`
    U2,
    /// `int`
    I4,
    /// `uint`
    U4,
    /// `long`
    I8,
    /// `ulong`
    U8,
    /// `float`
    R4,
    /// `double`
    R8,
    /// `string`
    String,
    /// `System.Type`, serialized as a type name
    Type,
    /// `object`; the value carries its own type tag
    Object,
    /// An enum, by serialized type name
    Enum(String),
    /// A single-dimensional array
    SzArray(Box<CustomAttributeType>),
}

/// A single custom attribute argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomAttributeArgument {
    /// Boolean value
    Bool(bool),
    /// UTF-16 code unit
    Char(u16),
    /// Signed 8-bit integer
    I1(i8),
    /// Unsigned 8-bit integer
    U1(u8),
    /// Signed 16-bit integer
    I2(i16),
    /// Unsigned 16-bit integer
    U2(u16),
    /// Signed 32-bit integer
    I4(i32),
    /// Unsigned 32-bit integer
    U4(u32),
    /// Signed 64-bit integer
    I8(i64),
    /// Unsigned 64-bit integer
    U8(u64),
    /// 32-bit floating point
    R4(f32),
    /// 64-bit floating point
    R8(f64),
    /// String, `None` for null
    String(Option<String>),
    /// Serialized type name, `None` for null
    Type(Option<String>),
    /// Enum type name and underlying value
    Enum(String, Box<CustomAttributeArgument>),
    /// Array elements, `None` for a null array
    Array(Option<Vec<CustomAttributeArgument>>),
    /// A value stored in an `object` slot, with the type it was boxed as
    Boxed(CustomAttributeType, Box<CustomAttributeArgument>),
}

/// A named argument (field or property) of a custom attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeNamedArgument {
    /// Whether this is a field (true) or property (false)
    pub is_field: bool,
    /// Name of the field or property
    pub name: String,
    /// Type of the argument
    pub arg_type: CustomAttributeType,
    /// Value of the argument
    pub value: CustomAttributeArgument,
}

/// A decoded custom attribute blob.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomAttributeValue {
    /// Constructor arguments, in parameter order
    pub fixed_args: Vec<CustomAttributeArgument>,
    /// Field and property assignments
    pub named_args: Vec<CustomAttributeNamedArgument>,
}

/// Blob content of a custom attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomAttributeData {
    /// Fully decoded arguments
    Decoded(CustomAttributeValue),
    /// The blob, kept verbatim because it could not be decoded
    Raw(Vec<u8>),
}

/// A custom attribute attached to an entity of the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttribute {
    /// The attribute constructor
    pub constructor: MethodHandle,
    /// The arguments
    pub value: CustomAttributeData,
}
