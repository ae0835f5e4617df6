//! Custom attribute blob encoding.
//!
//! Values are written from their own variants; the constructor signature is not
//! consulted. Every decoded value therefore encodes back to the bytes it came from.

use crate::{
    file::io::{write_compressed_uint, write_le},
    metadata::customattributes::{
        CustomAttributeArgument, CustomAttributeNamedArgument, CustomAttributeType,
        CustomAttributeValue, CUSTOM_ATTRIBUTE_PROLOG, SERIALIZATION_TYPE,
    },
    Result,
};

/// Encode a custom attribute value into a blob.
///
/// # Errors
/// Returns [`crate::Error::Encode`] if there are more than 65535 named arguments
/// or a string is too long for a compressed length.
pub fn encode_custom_attribute(value: &CustomAttributeValue) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_le(&mut buffer, CUSTOM_ATTRIBUTE_PROLOG);

    for argument in &value.fixed_args {
        encode_argument(argument, &mut buffer)?;
    }

    let count = u16::try_from(value.named_args.len()).map_err(|_| {
        encode_error!(
            "custom attribute",
            "{} named arguments do not fit the count field",
            value.named_args.len()
        )
    })?;
    write_le(&mut buffer, count);
    for named in &value.named_args {
        encode_named_argument(named, &mut buffer)?;
    }

    Ok(buffer)
}

fn encode_named_argument(named: &CustomAttributeNamedArgument, buffer: &mut Vec<u8>) -> Result<()> {
    buffer.push(if named.is_field {
        SERIALIZATION_TYPE::FIELD
    } else {
        SERIALIZATION_TYPE::PROPERTY
    });
    encode_type_tag(&named.arg_type, buffer)?;
    write_ser_string(Some(&named.name), buffer)?;
    encode_argument(&named.value, buffer)
}

/// Append a `FieldOrPropType`.
pub fn encode_type_tag(arg_type: &CustomAttributeType, buffer: &mut Vec<u8>) -> Result<()> {
    let tag = match arg_type {
        CustomAttributeType::Boolean => SERIALIZATION_TYPE::BOOLEAN,
        CustomAttributeType::Char => SERIALIZATION_TYPE::CHAR,
        CustomAttributeType::I1 => SERIALIZATION_TYPE::I1,
        CustomAttributeType::U1 => SERIALIZATION_TYPE::U1,
        CustomAttributeType::I2 => SERIALIZATION_TYPE::I2,
        CustomAttributeType::U2 => SERIALIZATION_TYPE::U2,
        CustomAttributeType::I4 => SERIALIZATION_TYPE::I4,
        CustomAttributeType::U4 => SERIALIZATION_TYPE::U4,
        CustomAttributeType::I8 => SERIALIZATION_TYPE::I8,
        CustomAttributeType::U8 => SERIALIZATION_TYPE::U8,
        CustomAttributeType::R4 => SERIALIZATION_TYPE::R4,
        CustomAttributeType::R8 => SERIALIZATION_TYPE::R8,
        CustomAttributeType::String => SERIALIZATION_TYPE::STRING,
        CustomAttributeType::Type => SERIALIZATION_TYPE::TYPE,
        CustomAttributeType::Object => SERIALIZATION_TYPE::TAGGED_OBJECT,
        CustomAttributeType::Enum(name) => {
            buffer.push(SERIALIZATION_TYPE::ENUM);
            return write_ser_string(Some(name), buffer);
        }
        CustomAttributeType::SzArray(element) => {
            buffer.push(SERIALIZATION_TYPE::SZARRAY);
            return encode_type_tag(element, buffer);
        }
    };
    buffer.push(tag);
    Ok(())
}

fn encode_argument(argument: &CustomAttributeArgument, buffer: &mut Vec<u8>) -> Result<()> {
    match argument {
        CustomAttributeArgument::Bool(value) => buffer.push(u8::from(*value)),
        CustomAttributeArgument::Char(value) => write_le(buffer, *value),
        CustomAttributeArgument::I1(value) => write_le(buffer, *value),
        CustomAttributeArgument::U1(value) => write_le(buffer, *value),
        CustomAttributeArgument::I2(value) => write_le(buffer, *value),
        CustomAttributeArgument::U2(value) => write_le(buffer, *value),
        CustomAttributeArgument::I4(value) => write_le(buffer, *value),
        CustomAttributeArgument::U4(value) => write_le(buffer, *value),
        CustomAttributeArgument::I8(value) => write_le(buffer, *value),
        CustomAttributeArgument::U8(value) => write_le(buffer, *value),
        CustomAttributeArgument::R4(value) => write_le(buffer, *value),
        CustomAttributeArgument::R8(value) => write_le(buffer, *value),
        CustomAttributeArgument::String(value) | CustomAttributeArgument::Type(value) => {
            write_ser_string(value.as_deref(), buffer)?;
        }
        CustomAttributeArgument::Enum(_, value) => encode_argument(value, buffer)?,
        CustomAttributeArgument::Array(None) => write_le(buffer, u32::MAX),
        CustomAttributeArgument::Array(Some(elements)) => {
            let count = u32::try_from(elements.len())
                .ok()
                .filter(|count| *count != u32::MAX)
                .ok_or_else(|| encode_error!("custom attribute", "array too large"))?;
            write_le(buffer, count);
            for element in elements {
                encode_argument(element, buffer)?;
            }
        }
        CustomAttributeArgument::Boxed(arg_type, value) => {
            encode_type_tag(arg_type, buffer)?;
            encode_argument(value, buffer)?;
        }
    }
    Ok(())
}

/// Append a `SerString`; `None` is written as the null marker `0xFF`.
///
/// # Errors
/// Returns [`crate::Error::Encode`] if the string exceeds the compressed length range.
pub fn write_ser_string(value: Option<&str>, buffer: &mut Vec<u8>) -> Result<()> {
    let Some(value) = value else {
        buffer.push(0xFF);
        return Ok(());
    };
    let length = u32::try_from(value.len())
        .ok()
        .filter(|length| *length <= 0x1FFF_FFFF)
        .ok_or_else(|| encode_error!("custom attribute", "string of {} bytes", value.len()))?;
    write_compressed_uint(length, buffer);
    buffer.extend_from_slice(value.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        customattributes::{parse_custom_attribute, CustomAttributeTypeResolver},
        signatures::{MethodSig, TypeSig, ELEMENT_TYPE},
    };
    use crate::model::TypeHandle;

    struct ColorEnum;

    impl CustomAttributeTypeResolver for ColorEnum {
        fn type_name(&mut self, _handle: &TypeHandle) -> Option<String> {
            None
        }

        fn enum_underlying(&mut self, name: &str) -> Option<u8> {
            (name == "Test.Color").then_some(ELEMENT_TYPE::I4)
        }
    }

    #[test]
    fn encode_fixed_arguments() {
        let value = CustomAttributeValue {
            fixed_args: vec![
                CustomAttributeArgument::String(Some("Hi".to_string())),
                CustomAttributeArgument::String(None),
                CustomAttributeArgument::U2(0x1234),
            ],
            named_args: vec![],
        };
        assert_eq!(
            encode_custom_attribute(&value).unwrap(),
            [0x01, 0x00, 0x02, b'H', b'i', 0xFF, 0x34, 0x12, 0x00, 0x00]
        );
    }

    #[test]
    fn encode_named_enum_array() {
        let value = CustomAttributeValue {
            fixed_args: vec![],
            named_args: vec![CustomAttributeNamedArgument {
                is_field: false,
                name: "C".to_string(),
                arg_type: CustomAttributeType::SzArray(Box::new(CustomAttributeType::Enum(
                    "Test.Color".to_string(),
                ))),
                value: CustomAttributeArgument::Array(Some(vec![CustomAttributeArgument::Enum(
                    "Test.Color".to_string(),
                    Box::new(CustomAttributeArgument::I4(3)),
                )])),
            }],
        };
        let blob = encode_custom_attribute(&value).unwrap();
        let mut expected = vec![0x01, 0x00, 0x01, 0x00, 0x54, 0x1D, 0x55, 0x0A];
        expected.extend_from_slice(b"Test.Color");
        expected.extend_from_slice(&[0x01, b'C', 0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00]);
        assert_eq!(blob, expected);

        let ctor = MethodSig::new_instance(TypeSig::Void, vec![]);
        let decoded = parse_custom_attribute(&blob, &ctor, &mut ColorEnum).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn decoded_blobs_reencode_identically() {
        let blob = [
            0x01, 0x00, // prolog
            0x08, 0x01, 0x00, 0x00, 0x00, // (object)1
            0xFF, 0xFF, 0xFF, 0xFF, // null string[]
            0x01, 0x00, // one named arg
            0x53, 0x50, 0x01, b'T', 0x0D, b'S', b'y', b's', b't', b'e', b'm', b'.', b'S', b't',
            b'r', b'i', b'n', b'g', // field Type T = typeof(string)
        ];
        let ctor = MethodSig::new_instance(
            TypeSig::Void,
            vec![TypeSig::Object, TypeSig::SzArray(Box::new(TypeSig::String))],
        );
        let decoded = parse_custom_attribute(&blob, &ctor, &mut ColorEnum).unwrap();
        assert_eq!(encode_custom_attribute(&decoded).unwrap(), blob);
    }
}
