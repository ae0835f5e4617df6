//! Arena identifiers.
//!
//! Every entity of a [`crate::model::ModuleGraph`] lives in one of its arenas and is
//! addressed by a typed index. Ids are never reused: an entity that is detached from
//! its owner stays in the arena but is no longer reachable, and the writer skips it.

macro_rules! define_ids {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
            pub struct $name(u32);

            impl $name {
                /// Wrap an arena index.
                #[must_use]
                #[allow(clippy::cast_possible_truncation)]
                pub const fn new(index: usize) -> Self {
                    $name(index as u32)
                }

                /// The arena index.
                #[must_use]
                pub const fn index(self) -> usize {
                    self.0 as usize
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}#{}", stringify!($name), self.0)
                }
            }
        )*
    };
}

define_ids! {
    /// A type definition
    TypeId,
    /// A method definition
    MethodId,
    /// A field definition
    FieldId,
    /// A property definition
    PropertyId,
    /// An event definition
    EventId,
    /// A reference to a type of another scope
    TypeRefId,
    /// A reference to a method or field by name and signature
    MemberRefId,
    /// A referenced assembly
    AssemblyRefId,
    /// A referenced module (native DLLs for P/Invoke, or other modules of the assembly)
    ModuleRefId,
}
