//! Method attribute flags and method body framing flags.
//!
//! # Key Types
//! - [`MethodAttributes`], [`MethodImplAttributes`]: the `Flags` and `ImplFlags` columns of `MethodDef`
//! - [`MethodBodyFlags`], [`SectionFlags`]: method header and extra data section flags

use bitflags::bitflags;

/// Bitmask for member access extraction
pub const METHOD_ACCESS_MASK: u16 = 0x0007;
/// Bitmask for `CODE_TYPE` extraction
pub const METHOD_IMPL_CODE_TYPE_MASK: u16 = 0x0003;

bitflags! {
    /// `MethodAttributes` of ECMA-335 II.23.1.10
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAttributes: u16 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this Assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessibly by anyone in the Assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessibly by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessibly by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
        /// Method can only be overriden if also accessible
        const STRICT = 0x0200;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// CLI provides 'special' behavior, dpending upon the name of the method
        const RTSPECIAL_NAME = 0x1000;
        /// Implementation is forwarded through PInvoke
        const PINVOKE_IMPL = 0x2000;
        /// Method has security associate with it
        const HAS_SECURITY = 0x4000;
        /// Method calls another method containing security code
        const REQUIRE_SEC_OBJECT = 0x8000;
    }
}

impl MethodAttributes {
    /// The access bits alone.
    #[must_use]
    pub fn access(self) -> u16 {
        self.bits() & METHOD_ACCESS_MASK
    }
}

bitflags! {
    /// `MethodImplAttributes` of ECMA-335 II.23.1.11
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodImplAttributes: u16 {
        /// Method impl is native
        const NATIVE = 0x0001;
        /// Method impl is OPTIL
        const OPTIL = 0x0002;
        /// Method impl is provided by the runtime
        const RUNTIME = 0x0003;
        /// Method impl is unmanaged, otherwise managed
        const UNMANAGED = 0x0004;
        /// Method cannot be inlined
        const NO_INLINING = 0x0008;
        /// Method is defined; used primarily in merge scenarios
        const FORWARD_REF = 0x0010;
        /// Method is a synchronized method
        const SYNCHRONIZED = 0x0020;
        /// Method must not be optimized
        const NO_OPTIMIZATION = 0x0040;
        /// Method signature is exported as declared
        const PRESERVE_SIG = 0x0080;
        /// Method should be inlined aggressively
        const AGGRESSIVE_INLINING = 0x0100;
        /// Runtime shall check all types of parameters
        const INTERNAL_CALL = 0x1000;
    }
}

impl MethodImplAttributes {
    /// Whether the body is CIL, as opposed to native, OPTIL or runtime provided.
    #[must_use]
    pub fn is_il(self) -> bool {
        self.bits() & METHOD_IMPL_CODE_TYPE_MASK == 0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flags that a method body can have
    pub struct MethodBodyFlags: u16 {
        /// Tiny method header format
        const TINY_FORMAT = 0x2;
        /// Fat method header format
        const FAT_FORMAT = 0x3;
        /// Flag of the fat method header, showing that there are more data sections appended to the header
        const MORE_SECTS = 0x8;
        /// Flag to indicate that this method should call the default constructor on all local variables
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flags that a method body section can have
    pub struct SectionFlags: u8 {
        /// Indicates that this section contains exception handling data
        const EHTABLE = 0x1;
        /// Reserved, shall be 0
        const OPT_ILTABLE = 0x2;
        /// Indicates that the data section format is fat
        const FAT_FORMAT = 0x40;
        /// Indicates that the data section is followed by another one
        const MORE_SECTS = 0x80;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_access() {
        let flags = MethodAttributes::from_bits_truncate(0x0096);
        assert_eq!(flags.access(), 0x0006);
        assert!(flags.contains(MethodAttributes::STATIC));
        assert!(flags.contains(MethodAttributes::HIDE_BY_SIG));
    }

    #[test]
    fn impl_code_type() {
        assert!(MethodImplAttributes::empty().is_il());
        assert!(!MethodImplAttributes::RUNTIME.is_il());
        assert!(MethodImplAttributes::NO_INLINING.is_il());
    }
}
