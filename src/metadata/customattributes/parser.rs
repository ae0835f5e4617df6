//! Custom attribute blob parsing, ECMA-335 II.23.3.
//!
//! Fixed arguments are not tagged in the blob; their types come from the
//! constructor signature. Named arguments and boxed values carry a
//! `FieldOrPropType` tag. Enums are the one case where the blob is not
//! self-describing: the width of an enum value is that of the enum's underlying
//! type, which has to be looked up through a [`CustomAttributeTypeResolver`].

use crate::{
    file::parser::Parser,
    metadata::{
        customattributes::{
            CustomAttributeArgument, CustomAttributeNamedArgument, CustomAttributeType,
            CustomAttributeValue, CUSTOM_ATTRIBUTE_PROLOG, SERIALIZATION_TYPE,
        },
        signatures::{MethodSig, TypeSig, ELEMENT_TYPE, MAX_RECURSION_DEPTH},
    },
    model::TypeHandle,
    Error::RecursionLimit,
    Result,
};

/// Type information the blob itself does not contain.
pub trait CustomAttributeTypeResolver {
    /// Serialized name (`Namespace.Outer+Inner`) of a type used in a constructor signature.
    fn type_name(&mut self, handle: &TypeHandle) -> Option<String>;

    /// Underlying `ELEMENT_TYPE` of the enum with the given serialized name, or
    /// `None` if the type is unknown or not an enum.
    fn enum_underlying(&mut self, name: &str) -> Option<u8>;
}

/// A resolver that knows no types; enum arguments fail to decode.
pub struct NoTypes;

impl CustomAttributeTypeResolver for NoTypes {
    fn type_name(&mut self, _handle: &TypeHandle) -> Option<String> {
        None
    }

    fn enum_underlying(&mut self, _name: &str) -> Option<u8> {
        None
    }
}

/// Parse a custom attribute blob against its constructor signature.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for a missing prolog, unknown tags,
/// unknown enums and constructor parameter types that cannot appear in a custom
/// attribute, and [`crate::Error::OutOfBounds`] for truncated blobs.
pub fn parse_custom_attribute(
    data: &[u8],
    constructor: &MethodSig,
    resolver: &mut dyn CustomAttributeTypeResolver,
) -> Result<CustomAttributeValue> {
    CustomAttributeParser::new(data, resolver).parse_custom_attribute(constructor)
}

/// Parser state for one custom attribute blob.
pub struct CustomAttributeParser<'a, 'r> {
    parser: Parser<'a>,
    resolver: &'r mut dyn CustomAttributeTypeResolver,
    depth: usize,
}

impl<'a, 'r> CustomAttributeParser<'a, 'r> {
    /// Create a parser over `data`.
    pub fn new(data: &'a [u8], resolver: &'r mut dyn CustomAttributeTypeResolver) -> Self {
        CustomAttributeParser {
            parser: Parser::new(data),
            resolver,
            depth: 0,
        }
    }

    /// Parse the complete blob.
    ///
    /// # Errors
    /// See [`parse_custom_attribute`].
    pub fn parse_custom_attribute(
        &mut self,
        constructor: &MethodSig,
    ) -> Result<CustomAttributeValue> {
        let prolog = self.parser.read_le::<u16>()?;
        if prolog != CUSTOM_ATTRIBUTE_PROLOG {
            return Err(malformed_error!(
                "Invalid custom attribute prolog - expected 0x0001, got 0x{:04X}",
                prolog
            ));
        }

        let mut fixed_args = Vec::with_capacity(constructor.params.len());
        for param in &constructor.params {
            let arg_type = self.fixed_type(param)?;
            fixed_args.push(self.parse_value(&arg_type)?);
        }

        // Blobs written by some compilers stop right after the fixed arguments.
        let named_args = if self.parser.remaining() >= 2 {
            let count = self.parser.read_le::<u16>()?;
            let mut args = Vec::with_capacity(usize::from(count).min(self.parser.remaining()));
            for _ in 0..count {
                args.push(self.parse_named_argument()?);
            }
            args
        } else {
            Vec::new()
        };

        Ok(CustomAttributeValue {
            fixed_args,
            named_args,
        })
    }

    /// Map a constructor parameter type to its serialization type.
    fn fixed_type(&mut self, param: &TypeSig) -> Result<CustomAttributeType> {
        let arg_type = match param.strip_modifiers() {
            TypeSig::Boolean => CustomAttributeType::Boolean,
            TypeSig::Char => CustomAttributeType::Char,
            TypeSig::I1 => CustomAttributeType::I1,
            TypeSig::U1 => CustomAttributeType::U1,
            TypeSig::I2 => CustomAttributeType::I2,
            TypeSig::U2 => CustomAttributeType::U2,
            TypeSig::I4 => CustomAttributeType::I4,
            TypeSig::U4 => CustomAttributeType::U4,
            TypeSig::I8 => CustomAttributeType::I8,
            TypeSig::U8 => CustomAttributeType::U8,
            TypeSig::R4 => CustomAttributeType::R4,
            TypeSig::R8 => CustomAttributeType::R8,
            TypeSig::String => CustomAttributeType::String,
            TypeSig::Object => CustomAttributeType::Object,
            TypeSig::SzArray(element) => {
                CustomAttributeType::SzArray(Box::new(self.fixed_type(element)?))
            }
            TypeSig::Class(handle) => match self.resolver.type_name(handle).as_deref() {
                Some("System.Type") => CustomAttributeType::Type,
                Some("System.Object") => CustomAttributeType::Object,
                Some("System.String") => CustomAttributeType::String,
                name => {
                    return Err(malformed_error!(
                        "Class parameter {} cannot appear in a custom attribute",
                        name.unwrap_or("<unknown>")
                    ))
                }
            },
            TypeSig::ValueType(handle) => match self.resolver.type_name(handle) {
                Some(name) => CustomAttributeType::Enum(name),
                None => {
                    return Err(malformed_error!(
                        "Value type parameter {:?} cannot be resolved",
                        handle
                    ))
                }
            },
            other => {
                return Err(malformed_error!(
                    "Parameter type {:?} cannot appear in a custom attribute",
                    other
                ))
            }
        };
        Ok(arg_type)
    }

    fn parse_named_argument(&mut self) -> Result<CustomAttributeNamedArgument> {
        let field_or_prop = self.parser.read_le::<u8>()?;
        let is_field = match field_or_prop {
            SERIALIZATION_TYPE::FIELD => true,
            SERIALIZATION_TYPE::PROPERTY => false,
            _ => {
                return Err(malformed_error!(
                    "Invalid field/property indicator: 0x{:02X}",
                    field_or_prop
                ))
            }
        };

        let arg_type = self.parse_type_tag()?;
        let Some(name) = self.parser.read_ser_string()? else {
            return Err(malformed_error!("Named argument without a name"));
        };
        let value = self.parse_value(&arg_type)?;

        Ok(CustomAttributeNamedArgument {
            is_field,
            name,
            arg_type,
            value,
        })
    }

    /// Read a `FieldOrPropType`.
    fn parse_type_tag(&mut self) -> Result<CustomAttributeType> {
        let tag = self.parser.read_le::<u8>()?;
        let arg_type = match tag {
            SERIALIZATION_TYPE::BOOLEAN => CustomAttributeType::Boolean,
            SERIALIZATION_TYPE::CHAR => CustomAttributeType::Char,
            SERIALIZATION_TYPE::I1 => CustomAttributeType::I1,
            SERIALIZATION_TYPE::U1 => CustomAttributeType::U1,
            SERIALIZATION_TYPE::I2 => CustomAttributeType::I2,
            SERIALIZATION_TYPE::U2 => CustomAttributeType::U2,
            SERIALIZATION_TYPE::I4 => CustomAttributeType::I4,
            SERIALIZATION_TYPE::U4 => CustomAttributeType::U4,
            SERIALIZATION_TYPE::I8 => CustomAttributeType::I8,
            SERIALIZATION_TYPE::U8 => CustomAttributeType::U8,
            SERIALIZATION_TYPE::R4 => CustomAttributeType::R4,
            SERIALIZATION_TYPE::R8 => CustomAttributeType::R8,
            SERIALIZATION_TYPE::STRING => CustomAttributeType::String,
            SERIALIZATION_TYPE::TYPE => CustomAttributeType::Type,
            SERIALIZATION_TYPE::TAGGED_OBJECT => CustomAttributeType::Object,
            SERIALIZATION_TYPE::ENUM => {
                let Some(name) = self.parser.read_ser_string()? else {
                    return Err(malformed_error!("Enum type tag without a type name"));
                };
                CustomAttributeType::Enum(name)
            }
            SERIALIZATION_TYPE::SZARRAY => {
                self.enter()?;
                let element = self.parse_type_tag();
                self.depth -= 1;
                CustomAttributeType::SzArray(Box::new(element?))
            }
            _ => {
                return Err(malformed_error!(
                    "Unsupported custom attribute type tag: 0x{:02X}",
                    tag
                ))
            }
        };
        Ok(arg_type)
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    /// Read one value of the given type.
    fn parse_value(&mut self, arg_type: &CustomAttributeType) -> Result<CustomAttributeArgument> {
        self.enter()?;
        let value = self.parse_value_inner(arg_type);
        self.depth -= 1;
        value
    }

    fn parse_value_inner(
        &mut self,
        arg_type: &CustomAttributeType,
    ) -> Result<CustomAttributeArgument> {
        let value = match arg_type {
            CustomAttributeType::Boolean => {
                CustomAttributeArgument::Bool(self.parser.read_le::<u8>()? != 0)
            }
            CustomAttributeType::Char => CustomAttributeArgument::Char(self.parser.read_le()?),
            CustomAttributeType::I1 => CustomAttributeArgument::I1(self.parser.read_le()?),
            CustomAttributeType::U1 => CustomAttributeArgument::U1(self.parser.read_le()?),
            CustomAttributeType::I2 => CustomAttributeArgument::I2(self.parser.read_le()?),
            CustomAttributeType::U2 => CustomAttributeArgument::U2(self.parser.read_le()?),
            CustomAttributeType::I4 => CustomAttributeArgument::I4(self.parser.read_le()?),
            CustomAttributeType::U4 => CustomAttributeArgument::U4(self.parser.read_le()?),
            CustomAttributeType::I8 => CustomAttributeArgument::I8(self.parser.read_le()?),
            CustomAttributeType::U8 => CustomAttributeArgument::U8(self.parser.read_le()?),
            CustomAttributeType::R4 => CustomAttributeArgument::R4(self.parser.read_le()?),
            CustomAttributeType::R8 => CustomAttributeArgument::R8(self.parser.read_le()?),
            CustomAttributeType::String => {
                CustomAttributeArgument::String(self.parser.read_ser_string()?)
            }
            CustomAttributeType::Type => {
                CustomAttributeArgument::Type(self.parser.read_ser_string()?)
            }
            CustomAttributeType::Object => {
                let boxed_type = self.parse_type_tag()?;
                let value = self.parse_value(&boxed_type)?;
                CustomAttributeArgument::Boxed(boxed_type, Box::new(value))
            }
            CustomAttributeType::Enum(name) => {
                let underlying = self.underlying_type(name)?;
                let value = self.parse_value(&underlying)?;
                CustomAttributeArgument::Enum(name.clone(), Box::new(value))
            }
            CustomAttributeType::SzArray(element) => {
                let count = self.parser.read_le::<u32>()?;
                if count == u32::MAX {
                    CustomAttributeArgument::Array(None)
                } else {
                    if count as usize > self.parser.remaining() {
                        return Err(out_of_bounds_error!());
                    }
                    let mut elements = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        elements.push(self.parse_value(element)?);
                    }
                    CustomAttributeArgument::Array(Some(elements))
                }
            }
        };
        Ok(value)
    }

    fn underlying_type(&mut self, name: &str) -> Result<CustomAttributeType> {
        let type_name = name.split(',').next().unwrap_or(name).trim();
        let underlying = match self.resolver.enum_underlying(type_name) {
            Some(ELEMENT_TYPE::BOOLEAN) => CustomAttributeType::Boolean,
            Some(ELEMENT_TYPE::CHAR) => CustomAttributeType::Char,
            Some(ELEMENT_TYPE::I1) => CustomAttributeType::I1,
            Some(ELEMENT_TYPE::U1) => CustomAttributeType::U1,
            Some(ELEMENT_TYPE::I2) => CustomAttributeType::I2,
            Some(ELEMENT_TYPE::U2) => CustomAttributeType::U2,
            Some(ELEMENT_TYPE::I4) => CustomAttributeType::I4,
            Some(ELEMENT_TYPE::U4) => CustomAttributeType::U4,
            Some(ELEMENT_TYPE::I8) => CustomAttributeType::I8,
            Some(ELEMENT_TYPE::U8) => CustomAttributeType::U8,
            _ => {
                return Err(malformed_error!(
                    "Cannot determine the underlying type of enum '{}'",
                    name
                ))
            }
        };
        Ok(underlying)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TypeRefId;

    /// Knows `System.Type` (row 0) and the enum `Test.Color : byte` (row 1).
    struct TestTypes;

    impl CustomAttributeTypeResolver for TestTypes {
        fn type_name(&mut self, handle: &TypeHandle) -> Option<String> {
            match handle {
                TypeHandle::Ref(id) if id.index() == 0 => Some("System.Type".to_string()),
                TypeHandle::Ref(id) if id.index() == 1 => Some("Test.Color".to_string()),
                _ => None,
            }
        }

        fn enum_underlying(&mut self, name: &str) -> Option<u8> {
            (name == "Test.Color").then_some(ELEMENT_TYPE::U1)
        }
    }

    fn ctor(params: Vec<TypeSig>) -> MethodSig {
        MethodSig::new_instance(TypeSig::Void, params)
    }

    #[test]
    fn parse_empty_attribute() {
        let value = parse_custom_attribute(&[0x01, 0x00, 0x00, 0x00], &ctor(vec![]), &mut NoTypes)
            .unwrap();
        assert_eq!(value, CustomAttributeValue::default());

        // No named argument count at all
        let value = parse_custom_attribute(&[0x01, 0x00], &ctor(vec![]), &mut NoTypes).unwrap();
        assert!(value.named_args.is_empty());
    }

    #[test]
    fn parse_invalid_prolog() {
        assert!(parse_custom_attribute(&[0x02, 0x00], &ctor(vec![]), &mut NoTypes).is_err());
        assert!(parse_custom_attribute(&[], &ctor(vec![]), &mut NoTypes).is_err());
    }

    #[test]
    fn parse_fixed_primitives_and_strings() {
        let data = [
            0x01, 0x00, // prolog
            0x01, // true
            0x2A, 0x00, 0x00, 0x00, // 42
            0x05, b'H', b'e', b'l', b'l', b'o', // "Hello"
            0xFF, // null string
            0x00, 0x00, // no named args
        ];
        let sig = ctor(vec![TypeSig::Boolean, TypeSig::I4, TypeSig::String, TypeSig::String]);
        let value = parse_custom_attribute(&data, &sig, &mut NoTypes).unwrap();
        assert_eq!(
            value.fixed_args,
            vec![
                CustomAttributeArgument::Bool(true),
                CustomAttributeArgument::I4(42),
                CustomAttributeArgument::String(Some("Hello".to_string())),
                CustomAttributeArgument::String(None),
            ]
        );
    }

    #[test]
    fn parse_type_and_enum_arguments() {
        let data = [
            0x01, 0x00, // prolog
            0x0C, b'S', b'y', b's', b't', b'e', b'm', b'.', b'I', b'n', b't', b'3', b'2',
            0x02, // Color = 2 (byte)
            0x00, 0x00,
        ];
        let sig = ctor(vec![
            TypeSig::Class(TypeHandle::Ref(TypeRefId::new(0))),
            TypeSig::ValueType(TypeHandle::Ref(TypeRefId::new(1))),
        ]);
        let value = parse_custom_attribute(&data, &sig, &mut TestTypes).unwrap();
        assert_eq!(
            value.fixed_args,
            vec![
                CustomAttributeArgument::Type(Some("System.Int32".to_string())),
                CustomAttributeArgument::Enum(
                    "Test.Color".to_string(),
                    Box::new(CustomAttributeArgument::U1(2))
                ),
            ]
        );

        // Without type knowledge the enum width is unknown.
        assert!(parse_custom_attribute(&data, &sig, &mut NoTypes).is_err());
    }

    #[test]
    fn parse_arrays_and_boxed_values() {
        let data = [
            0x01, 0x00, // prolog
            0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, // short[] { 1, 2 }
            0xFF, 0xFF, 0xFF, 0xFF, // null int[]
            0x08, 0x07, 0x00, 0x00, 0x00, // (object)7
            0x00, 0x00,
        ];
        let sig = ctor(vec![
            TypeSig::SzArray(Box::new(TypeSig::I2)),
            TypeSig::SzArray(Box::new(TypeSig::I4)),
            TypeSig::Object,
        ]);
        let value = parse_custom_attribute(&data, &sig, &mut NoTypes).unwrap();
        assert_eq!(
            value.fixed_args,
            vec![
                CustomAttributeArgument::Array(Some(vec![
                    CustomAttributeArgument::I2(1),
                    CustomAttributeArgument::I2(2)
                ])),
                CustomAttributeArgument::Array(None),
                CustomAttributeArgument::Boxed(
                    CustomAttributeType::I4,
                    Box::new(CustomAttributeArgument::I4(7))
                ),
            ]
        );
    }

    #[test]
    fn parse_named_arguments() {
        let data = [
            0x01, 0x00, // prolog
            0x02, 0x00, // two named args
            0x54, 0x0E, 0x04, b'N', b'a', b'm', b'e', 0x03, b'a', b'b', b'c', // property string Name = "abc"
            0x53, 0x55, 0x0A, b'T', b'e', b's', b't', b'.', b'C', b'o', b'l', b'o', b'r', 0x04,
            b'K', b'i', b'n', b'd', 0x01, // field Test.Color Kind = 1
        ];
        let value = parse_custom_attribute(&data, &ctor(vec![]), &mut TestTypes).unwrap();
        assert_eq!(value.named_args.len(), 2);
        assert_eq!(
            value.named_args[0],
            CustomAttributeNamedArgument {
                is_field: false,
                name: "Name".to_string(),
                arg_type: CustomAttributeType::String,
                value: CustomAttributeArgument::String(Some("abc".to_string())),
            }
        );
        assert!(value.named_args[1].is_field);
        assert_eq!(
            value.named_args[1].arg_type,
            CustomAttributeType::Enum("Test.Color".to_string())
        );
        assert_eq!(
            value.named_args[1].value,
            CustomAttributeArgument::Enum(
                "Test.Color".to_string(),
                Box::new(CustomAttributeArgument::U1(1))
            )
        );
    }

    #[test]
    fn parse_malformed_data() {
        // invalid field/property indicator
        let data = [0x01, 0x00, 0x01, 0x00, 0x99];
        assert!(parse_custom_attribute(&data, &ctor(vec![]), &mut NoTypes).is_err());

        // truncated fixed argument
        let data = [0x01, 0x00, 0x2A, 0x00];
        assert!(parse_custom_attribute(&data, &ctor(vec![TypeSig::I4]), &mut NoTypes).is_err());

        // array count larger than the blob
        let data = [0x01, 0x00, 0x00, 0x00, 0x01, 0x00];
        let sig = ctor(vec![TypeSig::SzArray(Box::new(TypeSig::U1))]);
        assert!(parse_custom_attribute(&data, &sig, &mut NoTypes).is_err());

        // pointer parameters cannot appear in attributes
        let sig = ctor(vec![TypeSig::Ptr(Box::new(TypeSig::I4))]);
        assert!(parse_custom_attribute(&[0x01, 0x00], &sig, &mut NoTypes).is_err());
    }
}
