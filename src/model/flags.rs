//! Attribute bit masks of the metadata tables.
//!
//! Flags are stored in the graph exactly as read, so unknown and reserved bits
//! survive a round trip. These constants name the bits the engine itself looks at.
//! Method flags live in [`crate::metadata::method`] as typed bitflags because the
//! body decoder needs them.

#[allow(non_snake_case)]
/// `TypeAttributes`, ECMA-335 II.23.1.15
pub mod TypeAttributes {
    /// Mask for the visibility bits
    pub const VISIBILITY_MASK: u32 = 0x0000_0007;
    /// Top-level type, not visible outside the assembly
    pub const NOT_PUBLIC: u32 = 0x0000_0000;
    /// Top-level type, visible everywhere
    pub const PUBLIC: u32 = 0x0000_0001;
    /// Nested type, visible wherever the enclosing type is
    pub const NESTED_PUBLIC: u32 = 0x0000_0002;
    /// Nested type, visible to the enclosing type only
    pub const NESTED_PRIVATE: u32 = 0x0000_0003;
    /// Nested type, visible to the enclosing type and subtypes
    pub const NESTED_FAMILY: u32 = 0x0000_0004;
    /// Nested type, visible inside the assembly
    pub const NESTED_ASSEMBLY: u32 = 0x0000_0005;
    /// Nested type, visible to subtypes inside the assembly
    pub const NESTED_FAM_AND_ASSEM: u32 = 0x0000_0006;
    /// Nested type, visible to subtypes or inside the assembly
    pub const NESTED_FAM_OR_ASSEM: u32 = 0x0000_0007;
    /// Mask for the layout bits
    pub const LAYOUT_MASK: u32 = 0x0000_0018;
    /// Fields are laid out sequentially
    pub const SEQUENTIAL_LAYOUT: u32 = 0x0000_0008;
    /// Field offsets are given explicitly
    pub const EXPLICIT_LAYOUT: u32 = 0x0000_0010;
    /// Type is an interface
    pub const INTERFACE: u32 = 0x0000_0020;
    /// Type is abstract
    pub const ABSTRACT: u32 = 0x0000_0080;
    /// Type cannot be derived from
    pub const SEALED: u32 = 0x0000_0100;
    /// Name has a special meaning
    pub const SPECIAL_NAME: u32 = 0x0000_0400;
    /// Type is imported from COM
    pub const IMPORT: u32 = 0x0000_1000;
    /// Type is serializable
    pub const SERIALIZABLE: u32 = 0x0000_2000;
    /// Static fields may be initialized lazily
    pub const BEFORE_FIELD_INIT: u32 = 0x0010_0000;
    /// The runtime interprets the name
    pub const RT_SPECIAL_NAME: u32 = 0x0000_0800;
    /// Type has security declarations
    pub const HAS_SECURITY: u32 = 0x0004_0000;
}

#[allow(non_snake_case)]
/// `FieldAttributes`, ECMA-335 II.23.1.5
pub mod FieldAttributes {
    /// Mask for the access bits
    pub const FIELD_ACCESS_MASK: u16 = 0x0007;
    /// Accessible only by the parent type
    pub const PRIVATE: u16 = 0x0001;
    /// Accessible inside the assembly
    pub const ASSEMBLY: u16 = 0x0003;
    /// Accessible by anyone
    pub const PUBLIC: u16 = 0x0006;
    /// Defined on the type, not per instance
    pub const STATIC: u16 = 0x0010;
    /// Only assigned in constructors
    pub const INIT_ONLY: u16 = 0x0020;
    /// Compile-time constant
    pub const LITERAL: u16 = 0x0040;
    /// Has an RVA with initial data
    pub const HAS_FIELD_RVA: u16 = 0x0100;
    /// Name has a special meaning
    pub const SPECIAL_NAME: u16 = 0x0200;
    /// The runtime interprets the name
    pub const RT_SPECIAL_NAME: u16 = 0x0400;
    /// Has marshalling information
    pub const HAS_FIELD_MARSHAL: u16 = 0x1000;
    /// Has a default value
    pub const HAS_DEFAULT: u16 = 0x8000;
}

#[allow(non_snake_case)]
/// `ParamAttributes`, ECMA-335 II.23.1.13
pub mod ParamAttributes {
    /// Input parameter
    pub const IN: u16 = 0x0001;
    /// Output parameter
    pub const OUT: u16 = 0x0002;
    /// Optional parameter
    pub const OPTIONAL: u16 = 0x0010;
    /// Has a default value
    pub const HAS_DEFAULT: u16 = 0x1000;
    /// Has marshalling information
    pub const HAS_FIELD_MARSHAL: u16 = 0x2000;
}

#[allow(non_snake_case)]
/// `MethodSemanticsAttributes`, ECMA-335 II.23.1.12
pub mod MethodSemanticsAttributes {
    /// Property setter
    pub const SETTER: u16 = 0x0001;
    /// Property getter
    pub const GETTER: u16 = 0x0002;
    /// Any other accessor
    pub const OTHER: u16 = 0x0004;
    /// Event add accessor
    pub const ADD_ON: u16 = 0x0008;
    /// Event remove accessor
    pub const REMOVE_ON: u16 = 0x0010;
    /// Event raise accessor
    pub const FIRE: u16 = 0x0020;
}

#[allow(non_snake_case)]
/// `ManifestResourceAttributes`, ECMA-335 II.23.1.9
pub mod ManifestResourceAttributes {
    /// Mask for the visibility bits
    pub const VISIBILITY_MASK: u32 = 0x0007;
    /// Exported from the assembly
    pub const PUBLIC: u32 = 0x0001;
    /// Private to the assembly
    pub const PRIVATE: u32 = 0x0002;
}

#[allow(non_snake_case)]
/// `AssemblyFlags`, ECMA-335 II.23.1.2
pub mod AssemblyFlags {
    /// The reference holds the full public key, not its token
    pub const PUBLIC_KEY: u32 = 0x0001;
    /// The assembly can be retargeted at runtime
    pub const RETARGETABLE: u32 = 0x0100;
}

#[allow(non_snake_case)]
/// `FileAttributes`, ECMA-335 II.23.1.6
pub mod FileAttributes {
    /// The file is a module with metadata
    pub const CONTAINS_METADATA: u32 = 0x0000;
    /// The file has no metadata
    pub const CONTAINS_NO_METADATA: u32 = 0x0001;
}
