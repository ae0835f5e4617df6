//! Signature blob encoding.
//!
//! The inverse of [`crate::metadata::signatures::SignatureParser`]: every
//! [`TypeSig`] shape the parser produces can be written back. Type handles are
//! turned into tokens by a [`TypeTokenEmitter`], which is where the writer assigns
//! `TypeRef` and `TypeSpec` rows.

use crate::{
    file::io::{compressed_uint_fits, write_compressed_int, write_compressed_uint},
    metadata::{
        signatures::{
            FieldSig, LocalVarSig, MethodSig, MethodSpecSig, PropertySig, TypeSig,
            CALLING_CONVENTION, ELEMENT_TYPE, MAX_RECURSION_DEPTH, SIGNATURE_HEADER,
        },
        tables::CodedIndexType,
        token::Token,
    },
    model::TypeHandle,
    Error::RecursionLimit,
    Result,
};

/// Supplies tokens for the type handles of a signature being encoded.
pub trait TypeTokenEmitter {
    /// The `TypeDef`, `TypeRef` or `TypeSpec` token for `handle`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Encode`] if the handle names a detached or
    /// missing entity.
    fn type_token(&mut self, handle: &TypeHandle) -> Result<Token>;

    /// Whether `handle` is known to be a value type.
    ///
    /// Used to pick `VALUETYPE` or `CLASS` for generic instances. `None` keeps the
    /// flag stored in the signature.
    fn is_value_type(&mut self, _handle: &TypeHandle) -> Option<bool> {
        None
    }
}

/// Writes signatures into a byte buffer.
pub struct SignatureEncoder<'e> {
    emitter: &'e mut dyn TypeTokenEmitter,
    buffer: Vec<u8>,
    depth: usize,
}

impl<'e> SignatureEncoder<'e> {
    /// Create an encoder with an empty buffer.
    #[must_use]
    pub fn new(emitter: &'e mut dyn TypeTokenEmitter) -> Self {
        SignatureEncoder {
            emitter,
            buffer: Vec::new(),
            depth: 0,
        }
    }

    /// The encoded bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }

    fn count(&mut self, value: usize, what: &str) -> Result<()> {
        match u32::try_from(value) {
            Ok(value) if compressed_uint_fits(value) => {
                write_compressed_uint(value, &mut self.buffer);
                Ok(())
            }
            _ => Err(encode_error!("signature", "{} {} is too large", what, value)),
        }
    }

    fn type_handle(&mut self, handle: &TypeHandle) -> Result<()> {
        let token = self.emitter.type_token(handle)?;
        let coded = CodedIndexType::TypeDefOrRef.encode_token(token)?;
        if !compressed_uint_fits(coded) {
            return Err(encode_error!(token, "row too large for a signature"));
        }
        write_compressed_uint(coded, &mut self.buffer);
        Ok(())
    }

    /// Append one type.
    ///
    /// # Errors
    /// Returns an error if a handle cannot be emitted or the nesting exceeds
    /// [`MAX_RECURSION_DEPTH`].
    pub fn encode_type(&mut self, sig: &TypeSig) -> Result<()> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }
        let result = self.encode_type_inner(sig);
        self.depth -= 1;
        result
    }

    fn encode_type_inner(&mut self, sig: &TypeSig) -> Result<()> {
        if let Some(element_type) = sig.primitive_element_type() {
            self.buffer.push(element_type);
            return Ok(());
        }

        match sig {
            TypeSig::Class(handle) => {
                self.buffer.push(ELEMENT_TYPE::CLASS);
                self.type_handle(handle)
            }
            TypeSig::ValueType(handle) => {
                self.buffer.push(ELEMENT_TYPE::VALUETYPE);
                self.type_handle(handle)
            }
            TypeSig::SzArray(inner) => {
                self.buffer.push(ELEMENT_TYPE::SZARRAY);
                self.encode_type(inner)
            }
            TypeSig::Ptr(inner) => {
                self.buffer.push(ELEMENT_TYPE::PTR);
                self.encode_type(inner)
            }
            TypeSig::ByRef(inner) => {
                self.buffer.push(ELEMENT_TYPE::BYREF);
                self.encode_type(inner)
            }
            TypeSig::Pinned(inner) => {
                self.buffer.push(ELEMENT_TYPE::PINNED);
                self.encode_type(inner)
            }
            TypeSig::Array(inner, shape) => {
                if shape.sizes.len() > shape.rank as usize
                    || shape.lower_bounds.len() > shape.rank as usize
                {
                    return Err(encode_error!(
                        "signature",
                        "array shape lists more dimensions than its rank {}",
                        shape.rank
                    ));
                }
                self.buffer.push(ELEMENT_TYPE::ARRAY);
                self.encode_type(inner)?;
                self.count(shape.rank as usize, "array rank")?;
                self.count(shape.sizes.len(), "array size count")?;
                for size in &shape.sizes {
                    self.count(*size as usize, "array size")?;
                }
                self.count(shape.lower_bounds.len(), "array bound count")?;
                for bound in &shape.lower_bounds {
                    if !(-0x1000_0000..=0x0FFF_FFFF).contains(bound) {
                        return Err(encode_error!(
                            "signature",
                            "array lower bound {} is out of range",
                            bound
                        ));
                    }
                    write_compressed_int(*bound, &mut self.buffer);
                }
                Ok(())
            }
            TypeSig::GenericInst {
                is_value_type,
                base,
                args,
            } => {
                if args.is_empty() {
                    return Err(encode_error!(
                        "signature",
                        "generic instance without type arguments"
                    ));
                }
                let is_value_type = self
                    .emitter
                    .is_value_type(base)
                    .unwrap_or(*is_value_type);

                self.buffer.push(ELEMENT_TYPE::GENERICINST);
                self.buffer.push(if is_value_type {
                    ELEMENT_TYPE::VALUETYPE
                } else {
                    ELEMENT_TYPE::CLASS
                });
                self.type_handle(base)?;
                self.count(args.len(), "type argument count")?;
                for arg in args {
                    self.encode_type(arg)?;
                }
                Ok(())
            }
            TypeSig::Var(number) => {
                self.buffer.push(ELEMENT_TYPE::VAR);
                self.count(*number as usize, "generic parameter")
            }
            TypeSig::MVar(number) => {
                self.buffer.push(ELEMENT_TYPE::MVAR);
                self.count(*number as usize, "generic parameter")
            }
            TypeSig::Modified {
                required,
                modifier,
                inner,
            } => {
                self.buffer.push(if *required {
                    ELEMENT_TYPE::CMOD_REQD
                } else {
                    ELEMENT_TYPE::CMOD_OPT
                });
                self.type_handle(modifier)?;
                self.encode_type(inner)
            }
            TypeSig::FnPtr(method) => {
                self.buffer.push(ELEMENT_TYPE::FNPTR);
                self.encode_method(method)
            }
            _ => Err(encode_error!("signature", "unencodable type {:?}", sig)),
        }
    }

    /// Append a method signature.
    ///
    /// # Errors
    /// Returns an error if a contained type cannot be encoded, or the sentinel
    /// position lies past the parameter list.
    pub fn encode_method(&mut self, sig: &MethodSig) -> Result<()> {
        let generic = sig.generic_param_count > 0;
        let mut calling_convention = sig.calling_convention & !CALLING_CONVENTION::GENERIC;
        if generic {
            calling_convention |= CALLING_CONVENTION::GENERIC;
        }
        if let Some(sentinel) = sig.sentinel {
            if sentinel > sig.params.len() {
                return Err(encode_error!(
                    "signature",
                    "vararg sentinel at {} past {} parameters",
                    sentinel,
                    sig.params.len()
                ));
            }
        }

        self.buffer.push(calling_convention);
        if generic {
            self.count(sig.generic_param_count as usize, "generic parameter count")?;
        }
        self.count(sig.params.len(), "parameter count")?;
        self.encode_type(&sig.ret)?;
        for (index, param) in sig.params.iter().enumerate() {
            if sig.sentinel == Some(index) {
                self.buffer.push(ELEMENT_TYPE::SENTINEL);
            }
            self.encode_type(param)?;
        }
        if sig.sentinel == Some(sig.params.len()) {
            self.buffer.push(ELEMENT_TYPE::SENTINEL);
        }
        Ok(())
    }

    /// Append a field signature.
    ///
    /// # Errors
    /// Returns an error if the field type cannot be encoded.
    pub fn encode_field(&mut self, sig: &FieldSig) -> Result<()> {
        self.buffer.push(SIGNATURE_HEADER::FIELD);
        self.encode_type(&sig.ty)
    }

    /// Append a property signature.
    ///
    /// # Errors
    /// Returns an error if a contained type cannot be encoded.
    pub fn encode_property(&mut self, sig: &PropertySig) -> Result<()> {
        let mut header = SIGNATURE_HEADER::PROPERTY;
        if sig.has_this {
            header |= CALLING_CONVENTION::HASTHIS;
        }
        self.buffer.push(header);
        self.count(sig.params.len(), "parameter count")?;
        self.encode_type(&sig.ty)?;
        for param in &sig.params {
            self.encode_type(param)?;
        }
        Ok(())
    }

    /// Append a local variable signature.
    ///
    /// # Errors
    /// Returns an error if a local type cannot be encoded.
    pub fn encode_locals(&mut self, sig: &LocalVarSig) -> Result<()> {
        self.buffer.push(SIGNATURE_HEADER::LOCAL_SIG);
        self.count(sig.locals.len(), "local count")?;
        for local in &sig.locals {
            self.encode_type(local)?;
        }
        Ok(())
    }

    /// Append a method instantiation signature.
    ///
    /// # Errors
    /// Returns an error if a type argument cannot be encoded.
    pub fn encode_method_spec(&mut self, sig: &MethodSpecSig) -> Result<()> {
        self.buffer.push(SIGNATURE_HEADER::METHOD_SPEC);
        self.count(sig.args.len(), "type argument count")?;
        for arg in &sig.args {
            self.encode_type(arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::signatures::{ArrayShape, SignatureParser, TypeTokenResolver},
        model::{TypeId, TypeRefId},
    };

    /// Emits TypeDef/TypeRef tokens from arena indices and inverts them on parse.
    struct RowMapping {
        value_types: Vec<TypeRefId>,
    }

    impl TypeTokenEmitter for RowMapping {
        fn type_token(&mut self, handle: &TypeHandle) -> Result<Token> {
            match handle {
                TypeHandle::Def(id) => Ok(Token::from_parts(0x02, id.index() as u32 + 1)),
                TypeHandle::Ref(id) => Ok(Token::from_parts(0x01, id.index() as u32 + 1)),
                TypeHandle::Spec(_) => Err(encode_error!("test", "no specs")),
            }
        }

        fn is_value_type(&mut self, handle: &TypeHandle) -> Option<bool> {
            match handle {
                TypeHandle::Ref(id) => Some(self.value_types.contains(id)),
                _ => None,
            }
        }
    }

    impl TypeTokenResolver for RowMapping {
        fn resolve_type(&mut self, token: Token, _depth: usize) -> Result<TypeHandle> {
            let index = token.row() as usize - 1;
            match token.table() {
                0x02 => Ok(TypeHandle::Def(TypeId::new(index))),
                _ => Ok(TypeHandle::Ref(TypeRefId::new(index))),
            }
        }
    }

    fn mapping() -> RowMapping {
        RowMapping {
            value_types: vec![TypeRefId::new(4)],
        }
    }

    #[test]
    fn method_signature_bytes() {
        // instance void (string, class TypeRef#2)
        let sig = MethodSig::new_instance(
            TypeSig::Void,
            vec![
                TypeSig::String,
                TypeSig::Class(TypeHandle::Ref(TypeRefId::new(1))),
            ],
        );
        let mut emitter = mapping();
        let mut encoder = SignatureEncoder::new(&mut emitter);
        encoder.encode_method(&sig).unwrap();
        assert_eq!(encoder.finish(), [0x20, 0x02, 0x01, 0x0E, 0x12, 0x09]);
    }

    #[test]
    fn vararg_call_site_survives() {
        let sig = MethodSig {
            calling_convention: CALLING_CONVENTION::VARARG,
            generic_param_count: 0,
            ret: TypeSig::Void,
            params: vec![TypeSig::I4, TypeSig::String],
            sentinel: Some(1),
        };
        let mut emitter = mapping();
        let mut encoder = SignatureEncoder::new(&mut emitter);
        encoder.encode_method(&sig).unwrap();
        let bytes = encoder.finish();
        assert_eq!(bytes, [0x05, 0x02, 0x01, 0x08, 0x41, 0x0E]);

        let mut resolver = mapping();
        let decoded = SignatureParser::new(&bytes, &mut resolver)
            .parse_method_signature()
            .unwrap();
        assert_eq!(decoded, sig);
    }

    #[test]
    fn complex_types_survive() {
        let cases = vec![
            TypeSig::Array(
                Box::new(TypeSig::R8),
                ArrayShape {
                    rank: 3,
                    sizes: vec![4],
                    lower_bounds: vec![-5, 0],
                },
            ),
            TypeSig::Modified {
                required: false,
                modifier: TypeHandle::Ref(TypeRefId::new(0)),
                inner: Box::new(TypeSig::Ptr(Box::new(TypeSig::Void))),
            },
            TypeSig::FnPtr(Box::new(MethodSig::new_static(
                TypeSig::I4,
                vec![TypeSig::MVar(0)],
            ))),
            TypeSig::GenericInst {
                is_value_type: false,
                base: TypeHandle::Def(TypeId::new(7)),
                args: vec![TypeSig::Var(1), TypeSig::Object],
            },
        ];

        for sig in cases {
            let mut emitter = mapping();
            let mut encoder = SignatureEncoder::new(&mut emitter);
            encoder.encode_type(&sig).unwrap();
            let bytes = encoder.finish();

            let mut resolver = mapping();
            let decoded = SignatureParser::new(&bytes, &mut resolver)
                .parse_type()
                .unwrap();
            assert_eq!(decoded, sig);
        }
    }

    #[test]
    fn rank_one_array_stays_distinct_from_vector() {
        let general = [0x14, 0x08, 0x01, 0x00, 0x00];
        let vector = [0x1D, 0x08];

        let mut resolver = mapping();
        let decoded = SignatureParser::new(&general, &mut resolver)
            .parse_type()
            .unwrap();
        assert_eq!(
            decoded,
            TypeSig::Array(
                Box::new(TypeSig::I4),
                ArrayShape {
                    rank: 1,
                    sizes: Vec::new(),
                    lower_bounds: Vec::new(),
                },
            )
        );
        let mut resolver = mapping();
        let szarray = SignatureParser::new(&vector, &mut resolver)
            .parse_type()
            .unwrap();
        assert_eq!(szarray, TypeSig::SzArray(Box::new(TypeSig::I4)));
        assert_ne!(decoded, szarray);

        for (sig, bytes) in [(decoded, &general[..]), (szarray, &vector[..])] {
            let mut emitter = mapping();
            let mut encoder = SignatureEncoder::new(&mut emitter);
            encoder.encode_type(&sig).unwrap();
            assert_eq!(encoder.finish(), bytes);
        }
    }

    #[test]
    fn generic_instance_flag_follows_emitter() {
        // TypeRef#5 is a value type according to the emitter, even though the
        // signature says class.
        let sig = TypeSig::GenericInst {
            is_value_type: false,
            base: TypeHandle::Ref(TypeRefId::new(4)),
            args: vec![TypeSig::I4],
        };
        let mut emitter = mapping();
        let mut encoder = SignatureEncoder::new(&mut emitter);
        encoder.encode_type(&sig).unwrap();
        assert_eq!(encoder.finish(), [0x15, 0x11, 0x15, 0x01, 0x08]);

        // A local definition is unknown to this emitter; the stored flag is kept.
        let sig = TypeSig::GenericInst {
            is_value_type: true,
            base: TypeHandle::Def(TypeId::new(0)),
            args: vec![TypeSig::I4],
        };
        let mut emitter = mapping();
        let mut encoder = SignatureEncoder::new(&mut emitter);
        encoder.encode_type(&sig).unwrap();
        assert_eq!(encoder.finish(), [0x15, 0x11, 0x04, 0x01, 0x08]);
    }

    #[test]
    fn other_signature_headers() {
        let mut emitter = mapping();
        let mut encoder = SignatureEncoder::new(&mut emitter);
        encoder
            .encode_field(&FieldSig {
                ty: TypeSig::SzArray(Box::new(TypeSig::U1)),
            })
            .unwrap();
        encoder
            .encode_property(&PropertySig {
                has_this: true,
                ty: TypeSig::I4,
                params: vec![TypeSig::String],
            })
            .unwrap();
        encoder
            .encode_locals(&LocalVarSig {
                locals: vec![TypeSig::Pinned(Box::new(TypeSig::ByRef(Box::new(
                    TypeSig::Char,
                ))))],
            })
            .unwrap();
        encoder
            .encode_method_spec(&MethodSpecSig {
                args: vec![TypeSig::Boolean],
            })
            .unwrap();
        assert_eq!(
            encoder.finish(),
            [
                0x06, 0x1D, 0x05, // field
                0x28, 0x01, 0x08, 0x0E, // property
                0x07, 0x01, 0x45, 0x10, 0x03, // locals
                0x0A, 0x01, 0x02, // method spec
            ]
        );
    }

    #[test]
    fn unencodable_shapes() {
        let mut emitter = mapping();
        let mut encoder = SignatureEncoder::new(&mut emitter);
        let sig = TypeSig::GenericInst {
            is_value_type: false,
            base: TypeHandle::Ref(TypeRefId::new(0)),
            args: vec![],
        };
        assert!(matches!(
            encoder.encode_type(&sig),
            Err(crate::Error::Encode { .. })
        ));

        let sig = TypeSig::Class(TypeHandle::Spec(Box::new(TypeSig::I4)));
        assert!(encoder.encode_type(&sig).is_err());
    }
}
