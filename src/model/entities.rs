//! The entities of a module graph.
//!
//! Owners keep their children in id lists (`TypeDef::fields`, `TypeDef::nested_types`),
//! children point back at their owner (`FieldDef::declaring_type`). Only the owner
//! lists decide what the writer emits; the back references are kept in sync by the
//! builders in [`crate::model::ModuleGraph`].
//!
//! Every definition carries the [`Token`] it was read from. Tokens are diagnostic
//! only: the writer assigns fresh rows, and entities created by a builder have a
//! null token.

use crate::{
    assembly::MethodBody,
    metadata::{
        customattributes::CustomAttribute,
        method::{MethodAttributes, MethodImplAttributes},
        signatures::{FieldSig, MethodSig, PropertySig},
        token::Token,
    },
    model::{
        AssemblyRefId, EventId, FieldId, MemberDef, MemberRefParent, MethodHandle, MethodId,
        ModuleRefId, PropertyId, ResolutionScope, TypeHandle, TypeId,
    },
};

/// A four part assembly version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl std::fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// The `Assembly` row of a manifest module.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssemblyDef {
    /// Simple name
    pub name: String,
    /// Culture, empty for neutral
    pub culture: String,
    /// Version
    pub version: AssemblyVersion,
    /// `AssemblyFlags`
    pub flags: u32,
    /// Hash algorithm id used for `File` hashes
    pub hash_algorithm: u32,
    /// Full public key, empty when unsigned
    pub public_key: Vec<u8>,
    /// Declarative security on the assembly
    pub security: Vec<SecurityDecl>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// The `Module` row.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleDef {
    /// Module file name
    pub name: String,
    /// Module version id
    pub mvid: uguid::Guid,
    /// Edit-and-continue generation, normally zero
    pub generation: u16,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// A referenced assembly.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssemblyRef {
    /// Simple name
    pub name: String,
    /// Culture, empty for neutral
    pub culture: String,
    /// Version
    pub version: AssemblyVersion,
    /// `AssemblyFlags`; [`crate::model::flags::AssemblyFlags::PUBLIC_KEY`] says
    /// whether `public_key_or_token` is a full key
    pub flags: u32,
    /// Public key or its eight byte token
    pub public_key_or_token: Vec<u8>,
    /// Hash of the referenced assembly, rarely present
    pub hash_value: Vec<u8>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

impl AssemblyRef {
    /// Whether two references describe the same assembly.
    #[must_use]
    pub fn same_identity(&self, other: &AssemblyRef) -> bool {
        self.name == other.name
            && self.culture == other.culture
            && self.version == other.version
            && self.public_key_or_token == other.public_key_or_token
    }
}

/// A referenced module: a native library for P/Invoke, or another module of the assembly.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModuleRef {
    /// File name
    pub name: String,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// A type defined in another scope, described by name only.
///
/// Two references with the same scope, namespace and name are the same type; the
/// builders and the writer collapse such duplicates.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeRef {
    /// Where the type is defined
    pub scope: ResolutionScope,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Name
    pub name: String,
    /// The local type this reference names when it points back into this module,
    /// recorded by [`crate::model::ModuleGraph::link_references`]
    pub definition: Option<TypeId>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

impl TypeRef {
    /// Whether both references describe the same type.
    #[must_use]
    pub fn same_type(&self, other: &TypeRef) -> bool {
        self.scope == other.scope && self.namespace == other.namespace && self.name == other.name
    }
}

/// Signature of a member reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberRefSig {
    /// A method; call sites of vararg methods carry their extra arguments here
    Method(MethodSig),
    /// A field
    Field(FieldSig),
}

/// A method or field referenced by owner, name and signature.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberRef {
    /// Owner of the member
    pub parent: MemberRefParent,
    /// Member name
    pub name: String,
    /// Member signature
    pub signature: MemberRefSig,
    /// The local definition this reference names. The writer takes the name from the
    /// definition, so renaming it renames every reference bound to it.
    pub definition: Option<MemberDef>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// An interface implemented by a type.
#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceImpl {
    /// The interface
    pub interface: TypeHandle,
    /// Custom attributes on the implementation row
    pub custom_attributes: Vec<CustomAttribute>,
}

/// Explicit packing and size of a type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassLayout {
    /// Field alignment, a power of two up to 128, or zero for the default
    pub packing_size: u16,
    /// Total size, zero for the natural size
    pub class_size: u32,
}

/// An explicit override: `body` implements `declaration`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodImpl {
    /// The implementing method
    pub body: MethodHandle,
    /// The overridden interface or base method
    pub declaration: MethodHandle,
}

/// A generic parameter of a type or method.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericParam {
    /// Zero-based position in the owner's parameter list
    pub number: u16,
    /// `GenericParamAttributes`: variance and special constraints
    pub flags: u16,
    /// Name
    pub name: String,
    /// Type constraints
    pub constraints: Vec<GenericParamConstraint>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// A type constraint on a generic parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericParamConstraint {
    /// The required base type or interface
    pub constraint: TypeHandle,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// A declarative security blob.
#[derive(Clone, Debug, PartialEq)]
pub struct SecurityDecl {
    /// `SecurityAction`
    pub action: u16,
    /// The permission set blob, kept verbatim
    pub permission_set: Vec<u8>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// A default value of a field, parameter or property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constant {
    /// Element type of the value; `CLASS` for a null reference
    pub element_type: u8,
    /// Little-endian value bytes, UTF-16 for strings
    pub value: Vec<u8>,
}

/// A P/Invoke mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PInvokeMap {
    /// `PInvokeAttributes`
    pub flags: u16,
    /// Name of the native entry point
    pub import_name: String,
    /// The native library
    pub module: ModuleRefId,
}

/// A type definition.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDef {
    /// `TypeAttributes`
    pub flags: u32,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Name
    pub name: String,
    /// Base type; `None` for interfaces, `System.Object` and `<Module>`
    pub extends: Option<TypeHandle>,
    /// Enclosing type of a nested type
    pub declaring_type: Option<TypeId>,
    /// Nested types, in declaration order
    pub nested_types: Vec<TypeId>,
    /// Fields, in declaration order
    pub fields: Vec<FieldId>,
    /// Methods, in declaration order
    pub methods: Vec<MethodId>,
    /// Properties
    pub properties: Vec<PropertyId>,
    /// Events
    pub events: Vec<EventId>,
    /// Implemented interfaces
    pub interfaces: Vec<InterfaceImpl>,
    /// Generic parameters, in position order
    pub generic_params: Vec<GenericParam>,
    /// Explicit layout
    pub layout: Option<ClassLayout>,
    /// Explicit method overrides
    pub method_impls: Vec<MethodImpl>,
    /// Declarative security
    pub security: Vec<SecurityDecl>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Token this type was read from
    pub token: Token,
}

impl TypeDef {
    /// A type with no members.
    #[must_use]
    pub fn new(namespace: &str, name: &str, flags: u32, extends: Option<TypeHandle>) -> TypeDef {
        TypeDef {
            flags,
            namespace: namespace.to_string(),
            name: name.to_string(),
            extends,
            declaring_type: None,
            nested_types: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            layout: None,
            method_impls: Vec::new(),
            security: Vec::new(),
            custom_attributes: Vec::new(),
            token: Token(0),
        }
    }
}

/// A field definition.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    /// `FieldAttributes`
    pub flags: u16,
    /// Name
    pub name: String,
    /// Signature
    pub signature: FieldSig,
    /// Owning type
    pub declaring_type: Option<TypeId>,
    /// Default value
    pub constant: Option<Constant>,
    /// Marshalling descriptor blob
    pub marshal: Option<Vec<u8>>,
    /// Offset under explicit layout
    pub offset: Option<u32>,
    /// Initial data placed at the field's RVA
    pub initial_value: Option<Vec<u8>>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Token this field was read from
    pub token: Token,
}

/// A parameter row: name, flags and default value of one parameter or the return value.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamDef {
    /// Position, 0 for the return value
    pub sequence: u16,
    /// `ParamAttributes`
    pub flags: u16,
    /// Name
    pub name: String,
    /// Default value
    pub constant: Option<Constant>,
    /// Marshalling descriptor blob
    pub marshal: Option<Vec<u8>>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// A method definition.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodDef {
    /// `MethodAttributes`
    pub flags: MethodAttributes,
    /// `MethodImplAttributes`
    pub impl_flags: MethodImplAttributes,
    /// Name
    pub name: String,
    /// Signature
    pub signature: MethodSig,
    /// Owning type
    pub declaring_type: Option<TypeId>,
    /// Parameter rows, sorted by sequence
    pub params: Vec<ParamDef>,
    /// Generic parameters, in position order
    pub generic_params: Vec<GenericParam>,
    /// The CIL body; `None` for abstract, runtime and P/Invoke methods
    pub body: Option<MethodBody>,
    /// P/Invoke mapping
    pub pinvoke: Option<PInvokeMap>,
    /// Declarative security
    pub security: Vec<SecurityDecl>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Token this method was read from
    pub token: Token,
}

/// A property: a name, a signature and its accessor methods.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyDef {
    /// `PropertyAttributes`
    pub flags: u16,
    /// Name
    pub name: String,
    /// Signature
    pub signature: PropertySig,
    /// Owning type
    pub declaring_type: Option<TypeId>,
    /// `get` accessor
    pub getter: Option<MethodId>,
    /// `set` accessor
    pub setter: Option<MethodId>,
    /// Other accessors
    pub others: Vec<MethodId>,
    /// Default value
    pub constant: Option<Constant>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Token this property was read from
    pub token: Token,
}

/// An event: a name, a delegate type and its accessor methods.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDef {
    /// `EventAttributes`
    pub flags: u16,
    /// Name
    pub name: String,
    /// Delegate type
    pub event_type: Option<TypeHandle>,
    /// Owning type
    pub declaring_type: Option<TypeId>,
    /// `add` accessor
    pub add_method: Option<MethodId>,
    /// `remove` accessor
    pub remove_method: Option<MethodId>,
    /// `raise` accessor
    pub fire_method: Option<MethodId>,
    /// Other accessors
    pub others: Vec<MethodId>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
    /// Token this event was read from
    pub token: Token,
}

/// Where the data of a manifest resource lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceData {
    /// Embedded in this image
    Embedded(Vec<u8>),
    /// In another file of the assembly, by index into [`crate::model::ModuleGraph::files`]
    File {
        /// Index of the file
        file: usize,
        /// Offset inside the file
        offset: u32,
    },
    /// In another assembly
    Assembly(AssemblyRefId),
}

/// A manifest resource.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestResource {
    /// Name
    pub name: String,
    /// `ManifestResourceAttributes`
    pub flags: u32,
    /// Content or location
    pub data: ResourceData,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// A file of a multi-file assembly.
#[derive(Clone, Debug, PartialEq)]
pub struct FileDef {
    /// `FileAttributes`
    pub flags: u32,
    /// File name
    pub name: String,
    /// Hash of the file
    pub hash_value: Vec<u8>,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// Where an exported type is defined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportedTypeImplementation {
    /// Another module, by index into [`crate::model::ModuleGraph::files`]
    File(usize),
    /// Another assembly (a type forwarder)
    AssemblyRef(AssemblyRefId),
    /// Nested in another exported type, by index into
    /// [`crate::model::ModuleGraph::exported_types`]
    Enclosing(usize),
}

/// A type exported from another module of the assembly, or forwarded to another assembly.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportedType {
    /// `TypeAttributes`
    pub flags: u32,
    /// `TypeDef` row hint in the defining module
    pub type_def_id: u32,
    /// Name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Where the type lives
    pub implementation: ExportedTypeImplementation,
    /// Custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// The unmanaged resource section of the original image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Win32Resources {
    /// RVA the section was loaded at; data entries inside are relative to it
    pub rva: u32,
    /// Raw section content
    pub data: Vec<u8>,
}

/// PE-level properties of the image the graph was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    /// COFF machine type
    pub machine: u16,
    /// COFF characteristics
    pub characteristics: u16,
    /// PE32+ optional header
    pub pe32_plus: bool,
    /// Preferred load address
    pub image_base: u64,
    /// Windows subsystem
    pub subsystem: u16,
    /// DLL characteristics
    pub dll_characteristics: u16,
    /// CLI header flags
    pub cor_flags: u32,
    /// Metadata runtime version string
    pub runtime_version: String,
    /// Unmanaged resources
    pub win32_resources: Option<Win32Resources>,
}

impl Default for ImageInfo {
    fn default() -> Self {
        ImageInfo {
            machine: crate::file::MACHINE_I386,
            characteristics: 0x0102,
            pe32_plus: false,
            image_base: 0x0040_0000,
            subsystem: 3,
            dll_characteristics: 0x8540,
            cor_flags: crate::metadata::cor20header::COMIMAGE_FLAGS_ILONLY,
            runtime_version: crate::metadata::root::DEFAULT_RUNTIME_VERSION.to_string(),
            win32_resources: None,
        }
    }
}

impl ImageInfo {
    /// Whether the image is a DLL rather than an executable.
    #[must_use]
    pub fn is_dll(&self) -> bool {
        self.characteristics & crate::file::CHARACTERISTICS_DLL != 0
    }
}
