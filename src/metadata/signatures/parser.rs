use crate::{
    file::parser::Parser,
    metadata::{
        signatures::{
            ArrayShape, FieldSig, LocalVarSig, MethodSig, MethodSpecSig, PropertySig, TypeSig,
            CALLING_CONVENTION, ELEMENT_TYPE, SIGNATURE_HEADER,
        },
        token::Token,
    },
    model::TypeHandle,
    Error::RecursionLimit,
    Result,
};

/// Maximum nesting depth for signatures, including nested `TypeSpec` blobs
pub const MAX_RECURSION_DEPTH: usize = 50;

/// Turns the `TypeDefOrRefOrSpecEncoded` tokens of a blob into handles.
///
/// `TypeSpec` tokens name another blob; implementors decode it with
/// [`SignatureParser::with_depth`] and the depth they were given, so that cyclic or
/// very deep specifications hit [`MAX_RECURSION_DEPTH`].
pub trait TypeTokenResolver {
    /// Resolve a `TypeDef`, `TypeRef` or `TypeSpec` token found at nesting `depth`.
    ///
    /// # Errors
    /// Returns an error if the token does not name an existing row.
    fn resolve_type(&mut self, token: Token, depth: usize) -> Result<TypeHandle>;
}

/// Signature parser that handles all signature kinds of ECMA-335 II.23.2
///
/// # Example
///
/// ```rust
/// use cilweave::metadata::{signatures::{SignatureParser, TypeSig, TypeTokenResolver}, token::Token};
/// use cilweave::model::{TypeHandle, TypeRefId};
///
/// struct ByRow;
/// impl TypeTokenResolver for ByRow {
///     fn resolve_type(&mut self, token: Token, _depth: usize) -> cilweave::Result<TypeHandle> {
///         Ok(TypeHandle::Ref(TypeRefId::new(token.row() as usize - 1)))
///     }
/// }
///
/// let data = &[0x20, 0x01, 0x01, 0x0E];
/// let sig = SignatureParser::new(data, &mut ByRow).parse_method_signature()?;
/// assert_eq!(sig.params, vec![TypeSig::String]);
/// # Ok::<(), cilweave::Error>(())
/// ```
///
/// A parser decodes exactly one signature; create a new one per blob.
pub struct SignatureParser<'a, 'r> {
    parser: Parser<'a>,
    resolver: &'r mut dyn TypeTokenResolver,
    depth: usize,
}

impl<'a, 'r> SignatureParser<'a, 'r> {
    /// Create a new `SignatureParser` for one blob.
    #[must_use]
    pub fn new(data: &'a [u8], resolver: &'r mut dyn TypeTokenResolver) -> Self {
        Self::with_depth(data, resolver, 0)
    }

    /// Create a parser for a blob that is nested `depth` levels deep.
    #[must_use]
    pub fn with_depth(
        data: &'a [u8],
        resolver: &'r mut dyn TypeTokenResolver,
        depth: usize,
    ) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            resolver,
            depth,
        }
    }

    fn type_handle(&mut self) -> Result<TypeHandle> {
        let token = self.parser.read_compressed_token()?;
        self.resolver.resolve_type(token, self.depth)
    }

    /// Parse a single type from the signature blob.
    ///
    /// # Errors
    /// Returns an error for unknown element types, unresolvable tokens, truncated
    /// data, and nesting beyond [`MAX_RECURSION_DEPTH`].
    pub fn parse_type(&mut self) -> Result<TypeSig> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }
        let result = self.parse_type_inner();
        self.depth -= 1;
        result
    }

    fn parse_type_inner(&mut self) -> Result<TypeSig> {
        let current_byte = self.parser.read_le::<u8>()?;
        if let Some(primitive) = TypeSig::from_primitive(current_byte) {
            return Ok(primitive);
        }

        match current_byte {
            ELEMENT_TYPE::PTR => Ok(TypeSig::Ptr(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::BYREF => Ok(TypeSig::ByRef(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::PINNED => Ok(TypeSig::Pinned(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::SZARRAY => Ok(TypeSig::SzArray(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::VALUETYPE => Ok(TypeSig::ValueType(self.type_handle()?)),
            ELEMENT_TYPE::CLASS => Ok(TypeSig::Class(self.type_handle()?)),
            ELEMENT_TYPE::VAR => Ok(TypeSig::Var(self.parser.read_compressed_uint()?)),
            ELEMENT_TYPE::MVAR => Ok(TypeSig::MVar(self.parser.read_compressed_uint()?)),
            ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                let modifier = self.type_handle()?;
                Ok(TypeSig::Modified {
                    required: current_byte == ELEMENT_TYPE::CMOD_REQD,
                    modifier,
                    inner: Box::new(self.parse_type()?),
                })
            }
            ELEMENT_TYPE::ARRAY => {
                let elem_type = self.parse_type()?;
                let rank = self.parser.read_compressed_uint()?;

                let num_sizes = self.parser.read_compressed_uint()?;
                if num_sizes > rank {
                    return Err(malformed_error!(
                        "ARRAY - {} sizes for rank {}",
                        num_sizes,
                        rank
                    ));
                }
                let mut sizes = Vec::with_capacity(num_sizes as usize);
                for _ in 0..num_sizes {
                    sizes.push(self.parser.read_compressed_uint()?);
                }

                let num_lo_bounds = self.parser.read_compressed_uint()?;
                if num_lo_bounds > rank {
                    return Err(malformed_error!(
                        "ARRAY - {} lower bounds for rank {}",
                        num_lo_bounds,
                        rank
                    ));
                }
                let mut lower_bounds = Vec::with_capacity(num_lo_bounds as usize);
                for _ in 0..num_lo_bounds {
                    lower_bounds.push(self.parser.read_compressed_int()?);
                }

                Ok(TypeSig::Array(
                    Box::new(elem_type),
                    ArrayShape {
                        rank,
                        sizes,
                        lower_bounds,
                    },
                ))
            }
            ELEMENT_TYPE::GENERICINST => {
                let kind = self.parser.read_le::<u8>()?;
                if kind != ELEMENT_TYPE::CLASS && kind != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        kind
                    ));
                }

                let base = self.type_handle()?;
                let arg_count = self.parser.read_compressed_uint()?;
                if arg_count == 0 {
                    return Err(malformed_error!("GENERICINST - no type arguments"));
                }

                let mut args = Vec::with_capacity(arg_count.min(64) as usize);
                for _ in 0..arg_count {
                    args.push(self.parse_type()?);
                }

                Ok(TypeSig::GenericInst {
                    is_value_type: kind == ELEMENT_TYPE::VALUETYPE,
                    base,
                    args,
                })
            }
            ELEMENT_TYPE::FNPTR => Ok(TypeSig::FnPtr(Box::new(self.parse_method_signature()?))),
            _ => Err(malformed_error!(
                "Unsupported ELEMENT_TYPE - {}",
                current_byte
            )),
        }
    }

    /// Parse a method signature from the blob - `MethodDefSig`, `MethodRefSig`, `StandAloneMethodSig`
    ///
    /// # Errors
    /// Returns an error if the signature data is malformed or if reading beyond the buffer bounds.
    pub fn parse_method_signature(&mut self) -> Result<MethodSig> {
        let calling_convention = self.parser.read_le::<u8>()?;
        if calling_convention & CALLING_CONVENTION::KIND_MASK > CALLING_CONVENTION::VARARG {
            return Err(malformed_error!(
                "MethodSig - invalid calling convention - {}",
                calling_convention
            ));
        }

        let generic_param_count = if calling_convention & CALLING_CONVENTION::GENERIC != 0 {
            self.parser.read_compressed_uint()?
        } else {
            0
        };
        let param_count = self.parser.read_compressed_uint()?;
        let ret = self.parse_type()?;

        let mut params = Vec::with_capacity(param_count.min(256) as usize);
        let mut sentinel = None;
        for index in 0..param_count as usize {
            if sentinel.is_none() && self.parser.peek_byte()? == ELEMENT_TYPE::SENTINEL {
                self.parser.advance()?;
                sentinel = Some(index);
            }
            params.push(self.parse_type()?);
        }
        if sentinel.is_none()
            && self.parser.has_more_data()
            && self.parser.peek_byte()? == ELEMENT_TYPE::SENTINEL
        {
            self.parser.advance()?;
            sentinel = Some(params.len());
        }

        Ok(MethodSig {
            calling_convention,
            generic_param_count,
            ret,
            params,
            sentinel,
        })
    }

    /// Parse a field signature from the blob (II.23.2.4)
    ///
    /// # Errors
    /// Returns an error if the signature header is invalid or if the field type cannot be parsed.
    pub fn parse_field_signature(&mut self) -> Result<FieldSig> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::FIELD {
            return Err(malformed_error!("FieldSig - invalid start - {}", head_byte));
        }

        Ok(FieldSig {
            ty: self.parse_type()?,
        })
    }

    /// Parse a property signature from the blob (II.23.2.5)
    ///
    /// # Errors
    /// Returns an error if the property signature header is invalid or if the property type cannot be parsed.
    pub fn parse_property_signature(&mut self) -> Result<PropertySig> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte & !CALLING_CONVENTION::HASTHIS != SIGNATURE_HEADER::PROPERTY {
            return Err(malformed_error!(
                "PropertySig - invalid start - {}",
                head_byte
            ));
        }

        let param_count = self.parser.read_compressed_uint()?;
        let ty = self.parse_type()?;

        let mut params = Vec::with_capacity(param_count.min(256) as usize);
        for _ in 0..param_count {
            params.push(self.parse_type()?);
        }

        Ok(PropertySig {
            has_this: head_byte & CALLING_CONVENTION::HASTHIS != 0,
            ty,
            params,
        })
    }

    /// Parse a local variable signature from the blob (II.23.2.6)
    ///
    /// # Errors
    /// Returns an error if the local variable signature header is invalid or if variable types cannot be parsed.
    pub fn parse_local_var_signature(&mut self) -> Result<LocalVarSig> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::LOCAL_SIG {
            return Err(malformed_error!(
                "LocalVarSig - invalid start - {}",
                head_byte
            ));
        }

        let count = self.parser.read_compressed_uint()?;
        let mut locals = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            locals.push(self.parse_type()?);
        }

        Ok(LocalVarSig { locals })
    }

    /// Parse a type specification signature from the blob (II.23.2.14)
    ///
    /// # Errors
    /// Returns an error if the type specification cannot be parsed.
    pub fn parse_type_spec_signature(&mut self) -> Result<TypeSig> {
        self.parse_type()
    }

    /// Parse a method specification signature from the blob (II.23.2.15)
    ///
    /// # Errors
    /// Returns an error if the method specification header is invalid or if the type arguments cannot be parsed.
    pub fn parse_method_spec_signature(&mut self) -> Result<MethodSpecSig> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::METHOD_SPEC {
            return Err(malformed_error!(
                "MethodSpecSig - invalid start - {}",
                head_byte
            ));
        }

        let arg_count = self.parser.read_compressed_uint()?;
        let mut args = Vec::with_capacity(arg_count.min(64) as usize);
        for _ in 0..arg_count {
            args.push(self.parse_type()?);
        }

        Ok(MethodSpecSig { args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TypeId, TypeRefId};

    /// Maps TypeDef rows to `Def`, TypeRef rows to `Ref`, and rejects TypeSpecs.
    struct RowResolver;

    impl TypeTokenResolver for RowResolver {
        fn resolve_type(&mut self, token: Token, _depth: usize) -> Result<TypeHandle> {
            let index = token.row() as usize - 1;
            match token.table() {
                0x02 => Ok(TypeHandle::Def(TypeId::new(index))),
                0x01 => Ok(TypeHandle::Ref(TypeRefId::new(index))),
                _ => Err(crate::Error::InvalidToken(token)),
            }
        }
    }

    /// Every TypeSpec token names the same self-referencing blob.
    struct CyclicSpecResolver;

    impl TypeTokenResolver for CyclicSpecResolver {
        fn resolve_type(&mut self, token: Token, depth: usize) -> Result<TypeHandle> {
            if token.table() != 0x1B {
                return RowResolver.resolve_type(token, depth);
            }
            // GENERICINST CLASS TypeSpec#1 <1 arg: I4>
            let blob = [0x15, 0x12, 0x06, 0x01, 0x08];
            let sig = SignatureParser::with_depth(&blob, self, depth).parse_type_spec_signature()?;
            Ok(TypeHandle::Spec(Box::new(sig)))
        }
    }

    fn parse_type(data: &[u8]) -> Result<TypeSig> {
        SignatureParser::new(data, &mut RowResolver).parse_type()
    }

    #[test]
    fn test_parse_primitive_types() {
        let test_cases = [
            (vec![0x01], TypeSig::Void),
            (vec![0x02], TypeSig::Boolean),
            (vec![0x03], TypeSig::Char),
            (vec![0x08], TypeSig::I4),
            (vec![0x0D], TypeSig::R8),
            (vec![0x0E], TypeSig::String),
            (vec![0x1C], TypeSig::Object),
            (vec![0x18], TypeSig::I),
            (vec![0x19], TypeSig::U),
        ];

        for (bytes, expected_type) in test_cases {
            assert_eq!(parse_type(&bytes).unwrap(), expected_type);
        }
    }

    #[test]
    fn test_parse_class_and_valuetype() {
        // Class, TypeRef row 0x10
        assert_eq!(
            parse_type(&[0x12, 0x41]).unwrap(),
            TypeSig::Class(TypeHandle::Ref(TypeRefId::new(0x0F)))
        );

        // ValueType, TypeDef row 0x0D
        assert_eq!(
            parse_type(&[0x11, 0x34]).unwrap(),
            TypeSig::ValueType(TypeHandle::Def(TypeId::new(0x0C)))
        );

        assert_eq!(parse_type(&[0x13, 0x03]).unwrap(), TypeSig::Var(3));
        assert_eq!(parse_type(&[0x1E, 0x00]).unwrap(), TypeSig::MVar(0));
    }

    #[test]
    fn test_parse_arrays() {
        assert_eq!(
            parse_type(&[0x1D, 0x08]).unwrap(),
            TypeSig::SzArray(Box::new(TypeSig::I4))
        );

        // int[2,3] with lower bounds -1, 0
        let result = parse_type(&[
            0x14, // ARRAY
            0x08, // I4
            0x02, // rank 2
            0x02, // num_sizes 2
            0x02, 0x03, // sizes
            0x02, // num_lo_bounds 2
            0x7F, // -1
            0x00, // 0
        ])
        .unwrap();

        let TypeSig::Array(elem, shape) = result else {
            panic!("expected an array");
        };
        assert_eq!(*elem, TypeSig::I4);
        assert_eq!(shape.rank, 2);
        assert_eq!(shape.sizes, vec![2, 3]);
        assert_eq!(shape.lower_bounds, vec![-1, 0]);

        // more sizes than dimensions
        assert!(parse_type(&[0x14, 0x08, 0x01, 0x02, 0x01, 0x01, 0x00]).is_err());
    }

    #[test]
    fn test_parse_generic_instance() {
        // List<int> with List at TypeRef row 2
        let result = parse_type(&[0x15, 0x12, 0x09, 0x01, 0x08]).unwrap();
        assert_eq!(
            result,
            TypeSig::GenericInst {
                is_value_type: false,
                base: TypeHandle::Ref(TypeRefId::new(1)),
                args: vec![TypeSig::I4],
            }
        );

        // KeyValuePair<string, int>, a value type
        let result = parse_type(&[0x15, 0x11, 0x09, 0x02, 0x0E, 0x08]).unwrap();
        assert!(matches!(
            result,
            TypeSig::GenericInst {
                is_value_type: true,
                ..
            }
        ));

        // must be followed by CLASS or VALUETYPE
        assert!(parse_type(&[0x15, 0x08, 0x01, 0x08]).is_err());
    }

    #[test]
    fn test_parse_custom_mods() {
        // modreq(IsVolatile) int32, modifier at TypeRef row 3
        let result = parse_type(&[0x1F, 0x0D, 0x08]).unwrap();
        assert_eq!(
            result,
            TypeSig::Modified {
                required: true,
                modifier: TypeHandle::Ref(TypeRefId::new(2)),
                inner: Box::new(TypeSig::I4),
            }
        );
        assert_eq!(result.strip_modifiers(), &TypeSig::I4);
    }

    #[test]
    fn test_complex_signature() {
        // Dictionary<List<int>, string[]> Method<T>(ref T arg1, List<int>[] arg2)
        let data = [
            0x30, // HASTHIS | GENERIC
            0x01, // 1 generic parameter
            0x02, // 2 parameters
            0x15, 0x12, 0x2D, 0x02, // Dictionary (TypeRef 11), 2 args
            0x15, 0x12, 0x49, 0x01, 0x08, // List<int> (TypeRef 18)
            0x1D, 0x0E, // string[]
            0x10, 0x1E, 0x00, // ref !!0
            0x1D, 0x15, 0x12, 0x49, 0x01, 0x08, // List<int>[]
        ];

        let result = SignatureParser::new(&data, &mut RowResolver)
            .parse_method_signature()
            .unwrap();

        assert!(result.has_this());
        assert!(result.is_generic());
        assert_eq!(result.generic_param_count, 1);
        assert_eq!(result.params.len(), 2);
        assert!(matches!(result.ret, TypeSig::GenericInst { .. }));
        assert_eq!(result.params[0], TypeSig::ByRef(Box::new(TypeSig::MVar(0))));
        assert!(matches!(result.params[1], TypeSig::SzArray(_)));
    }

    #[test]
    fn test_vararg_sentinel() {
        // vararg void(int32, ..., string)
        let data = [0x05, 0x02, 0x01, 0x08, 0x41, 0x0E];
        let result = SignatureParser::new(&data, &mut RowResolver)
            .parse_method_signature()
            .unwrap();
        assert!(result.is_vararg());
        assert_eq!(result.params, vec![TypeSig::I4, TypeSig::String]);
        assert_eq!(result.sentinel, Some(1));
    }

    #[test]
    fn test_other_signatures() {
        let field = SignatureParser::new(&[0x06, 0x0E], &mut RowResolver)
            .parse_field_signature()
            .unwrap();
        assert_eq!(field.ty, TypeSig::String);

        let property = SignatureParser::new(&[0x28, 0x01, 0x08, 0x0E], &mut RowResolver)
            .parse_property_signature()
            .unwrap();
        assert!(property.has_this);
        assert_eq!(property.ty, TypeSig::I4);
        assert_eq!(property.params, vec![TypeSig::String]);

        // int32, pinned ref uint8
        let locals = SignatureParser::new(&[0x07, 0x02, 0x08, 0x45, 0x10, 0x05], &mut RowResolver)
            .parse_local_var_signature()
            .unwrap();
        assert_eq!(
            locals.locals,
            vec![
                TypeSig::I4,
                TypeSig::Pinned(Box::new(TypeSig::ByRef(Box::new(TypeSig::U1))))
            ]
        );

        let spec = SignatureParser::new(&[0x0A, 0x01, 0x0E], &mut RowResolver)
            .parse_method_spec_signature()
            .unwrap();
        assert_eq!(spec.args, vec![TypeSig::String]);
    }

    #[test]
    fn test_error_handling() {
        let mut resolver = RowResolver;
        assert!(matches!(
            SignatureParser::new(&[0x20, 0x01], &mut resolver).parse_method_signature(),
            Err(crate::Error::OutOfBounds)
        ));
        assert!(SignatureParser::new(&[0x07, 0x08], &mut resolver)
            .parse_field_signature()
            .is_err());
        assert!(parse_type(&[0x21]).is_err());
    }

    #[test]
    fn test_recursion_limit() {
        // 60 nested pointers
        let mut data = vec![0x0F; 60];
        data.push(0x08);
        assert!(matches!(
            parse_type(&data),
            Err(crate::Error::RecursionLimit(MAX_RECURSION_DEPTH))
        ));

        // A TypeSpec that contains itself
        let result = SignatureParser::new(&[0x12, 0x06], &mut CyclicSpecResolver).parse_type();
        assert!(matches!(result, Err(crate::Error::RecursionLimit(_))));

        // Long but flat signatures are fine
        let mut data = vec![0x00, 100, 0x01];
        data.extend(std::iter::repeat(0x08).take(100));
        let sig = SignatureParser::new(&data, &mut RowResolver)
            .parse_method_signature()
            .unwrap();
        assert_eq!(sig.params.len(), 100);
    }
}
