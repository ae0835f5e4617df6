//! Benchmarks for the codec paths a rewrite pass exercises:
//! - Signature parsing and encoding
//! - Instruction decoding
//! - Writing a module and loading it back

extern crate cilweave;

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use widestring::U16String;

use cilweave::{
    assembly::{decode_instructions, MethodBody, NoOperands, OpCode, Operand},
    loader::load,
    metadata::{
        method::MethodAttributes,
        signatures::{
            MethodSig, SignatureEncoder, SignatureParser, TypeSig, TypeTokenEmitter,
            TypeTokenResolver,
        },
        tables::TableId,
        token::Token,
    },
    model::{flags::TypeAttributes, ModuleGraph, TypeHandle, TypeRefId},
    writer::{write, WriterOptions},
    Result,
};

/// Maps `TypeRef` rows to arena indices and back.
struct ByRow;

impl TypeTokenResolver for ByRow {
    fn resolve_type(&mut self, token: Token, _depth: usize) -> Result<TypeHandle> {
        Ok(TypeHandle::Ref(TypeRefId::new(token.row() as usize - 1)))
    }
}

impl TypeTokenEmitter for ByRow {
    fn type_token(&mut self, handle: &TypeHandle) -> Result<Token> {
        match handle {
            TypeHandle::Ref(id) => Ok(Token::from_parts(
                TableId::TypeRef as u8,
                id.index() as u32 + 1,
            )),
            _ => Err(cilweave::Error::NotSupported),
        }
    }
}

/// Signature: `Dictionary<string, List<int>> Method(int[], ref Foo)`
const GENERIC_METHOD: &[u8] = &[
    0x20, 0x02, // HASTHIS, 2 params
    0x15, 0x12, 0x05, 0x02, 0x0E, 0x15, 0x12, 0x09, 0x01, 0x08, // return
    0x1D, 0x08, // int[]
    0x10, 0x11, 0x0D, // ref valuetype Foo
];

fn bench_signature_parse(c: &mut Criterion) {
    c.bench_function("sig_parse_generic_method", |b| {
        b.iter(|| {
            let sig = SignatureParser::new(black_box(GENERIC_METHOD), &mut ByRow)
                .parse_method_signature()
                .unwrap();
            black_box(sig)
        });
    });
}

fn bench_signature_encode(c: &mut Criterion) {
    let sig = SignatureParser::new(GENERIC_METHOD, &mut ByRow)
        .parse_method_signature()
        .unwrap();

    c.bench_function("sig_encode_generic_method", |b| {
        b.iter(|| {
            let mut emitter = ByRow;
            let mut encoder = SignatureEncoder::new(&mut emitter);
            encoder.encode_method(black_box(&sig)).unwrap();
            black_box(encoder.finish())
        });
    });
}

/// Straight-line arithmetic with a loop back edge, repeated to a realistic size.
fn arithmetic_code() -> Vec<u8> {
    let mut code = Vec::new();
    for _ in 0..64 {
        // ldarg.0; ldc.i4.1; add; starg.s 0; ldarg.0; ldc.i4.s 100; blt.s -10
        code.extend_from_slice(&[0x02, 0x17, 0x58, 0x10, 0x00, 0x02, 0x1F, 0x64, 0x32, 0xF6]);
    }
    code.push(0x2A);
    code
}

fn bench_decode_instructions(c: &mut Criterion) {
    let code = arithmetic_code();

    c.bench_function("decode_instructions_arithmetic", |b| {
        b.iter(|| {
            let instructions =
                decode_instructions(black_box(&code), &mut NoOperands, false).unwrap();
            black_box(instructions)
        });
    });
}

fn sample_module(types: usize, methods: usize) -> ModuleGraph {
    let mut graph = ModuleGraph::new("Bench.dll");
    let object = graph.object_type();
    for t in 0..types {
        let owner = graph.add_type(
            "Bench",
            &format!("Type{t}"),
            TypeAttributes::PUBLIC,
            Some(object.clone()),
        );
        for m in 0..methods {
            let method = graph.add_method(
                owner,
                &format!("Method{m}"),
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                MethodSig::new_static(TypeSig::I4, vec![TypeSig::I4]),
            );
            let mut body = MethodBody::new();
            body.push(OpCode::LDARG_0, Operand::None);
            body.push(OpCode::LDSTR, Operand::String(U16String::from_str(&format!("m{m}"))));
            body.push(OpCode::POP, Operand::None);
            body.push(OpCode::RET, Operand::None);
            graph[method].body = Some(body);
        }
    }
    graph
}

fn bench_write(c: &mut Criterion) {
    let graph = sample_module(50, 20);
    let options = WriterOptions::default();

    c.bench_function("write_50_types_1000_methods", |b| {
        b.iter(|| black_box(write(black_box(&graph), &options).unwrap()));
    });
}

fn bench_load(c: &mut Criterion) {
    let image = write(&sample_module(50, 20), &WriterOptions::default()).unwrap();

    c.bench_function("load_50_types_1000_methods", |b| {
        b.iter(|| black_box(load(black_box(&image.bytes)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_signature_parse,
    bench_signature_encode,
    bench_decode_instructions,
    bench_write,
    bench_load
);
criterion_main!(benches);
