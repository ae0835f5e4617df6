//! Integration tests for writing graphs and loading them back.
//!
//! Each test assembles a module in memory, writes it, reloads the image and checks
//! that the reloaded graph describes the same module.

use cilweave::{
    metadata::{
        customattributes::{
            CustomAttribute, CustomAttributeArgument, CustomAttributeData, CustomAttributeValue,
        },
        signatures::PropertySig,
    },
    model::{
        AssemblyDef, Constant, GenericParamOwner, InterfaceImpl, ManifestResource,
        MemberRefParent, MemberRefSig, ResourceData,
    },
    prelude::*,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn library() -> ModuleGraph {
    let mut graph = ModuleGraph::new("Library.dll");
    graph.assembly = Some(AssemblyDef {
        name: "Library".to_string(),
        ..Default::default()
    });
    graph.image.characteristics |= 0x2000;

    let object = graph.object_type();
    let shape = graph.add_type(
        "Library",
        "IShape",
        TypeAttributes::PUBLIC | TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
        None,
    );
    graph.add_method(
        shape,
        "Area",
        MethodAttributes::PUBLIC
            | MethodAttributes::VIRTUAL
            | MethodAttributes::ABSTRACT
            | MethodAttributes::NEW_SLOT
            | MethodAttributes::HIDE_BY_SIG,
        MethodSig::new_instance(TypeSig::I4, vec![]),
    );

    let square = graph.add_type(
        "Library",
        "Square",
        TypeAttributes::PUBLIC,
        Some(object.clone()),
    );
    graph[square].interfaces.push(InterfaceImpl {
        interface: TypeHandle::Def(shape),
        custom_attributes: Vec::new(),
    });

    let side = graph.add_field(
        square,
        "DefaultSide",
        FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::LITERAL,
        FieldSig { ty: TypeSig::I4 },
    );
    graph[side].constant = Some(Constant {
        element_type: 0x08,
        value: 3_i32.to_le_bytes().to_vec(),
    });
    let table = graph.add_field(
        square,
        "Table",
        FieldAttributes::ASSEMBLY | FieldAttributes::STATIC,
        FieldSig { ty: TypeSig::I8 },
    );
    graph[table].initial_value = Some(0x0102_0304_0506_0708_u64.to_le_bytes().to_vec());

    let getter = graph.add_method(
        square,
        "get_Side",
        MethodAttributes::PUBLIC | MethodAttributes::SPECIAL_NAME | MethodAttributes::HIDE_BY_SIG,
        MethodSig::new_instance(TypeSig::I4, vec![]),
    );
    let mut body = MethodBody::new();
    body.push(OpCode::LDC_I4_3, Operand::None);
    body.push(OpCode::RET, Operand::None);
    graph[getter].body = Some(body);

    let property = graph.add_property(
        square,
        "Side",
        PropertySig {
            has_this: true,
            ty: TypeSig::I4,
            params: vec![],
        },
    );
    graph[property].getter = Some(getter);

    let builder = graph.add_nested_type(
        square,
        "Builder",
        TypeAttributes::NESTED_PUBLIC,
        Some(object),
    );
    graph.add_field(
        builder,
        "count",
        FieldAttributes::PRIVATE,
        FieldSig { ty: TypeSig::I4 },
    );

    let obsolete = graph.core_type("System", "ObsoleteAttribute");
    let constructor = graph.add_member_ref(
        MemberRefParent::Type(obsolete),
        ".ctor",
        MemberRefSig::Method(MethodSig::new_instance(TypeSig::Void, vec![TypeSig::String])),
    );
    graph[square].custom_attributes.push(CustomAttribute {
        constructor: MethodHandle::Ref(constructor),
        value: CustomAttributeData::Decoded(CustomAttributeValue {
            fixed_args: vec![CustomAttributeArgument::String(Some("use IShape".to_string()))],
            named_args: vec![],
        }),
    });

    graph.resources.push(ManifestResource {
        name: "Library.data.bin".to_string(),
        flags: 1,
        data: ResourceData::Embedded(vec![0xCA, 0xFE, 0xBA, 0xBE, 0x01]),
        custom_attributes: Vec::new(),
    });

    graph
}

#[test]
fn declarations_survive_a_round_trip() -> Result<()> {
    init_logging();
    let image = write(&library(), &WriterOptions::default())?;
    let graph = load(&image.bytes)?;

    let shape = graph.find_type("Library", "IShape").unwrap();
    let square = graph.find_type("Library", "Square").unwrap();
    assert_eq!(graph[square].interfaces.len(), 1);
    assert_eq!(graph[square].interfaces[0].interface, TypeHandle::Def(shape));
    assert!(graph[graph[shape].methods[0]].body.is_none());

    let builder = graph[square].nested_types[0];
    assert_eq!(graph.full_name(builder), "Library.Square/Builder");
    assert_eq!(graph[builder].declaring_type, Some(square));

    let fields: Vec<&str> = graph[square]
        .fields
        .iter()
        .map(|id| graph[*id].name.as_str())
        .collect();
    assert_eq!(fields, ["DefaultSide", "Table"]);
    let side = graph[square].fields[0];
    assert_eq!(
        graph[side].constant.as_ref().map(|c| c.value.clone()),
        Some(vec![3, 0, 0, 0])
    );
    let table = graph[square].fields[1];
    assert_eq!(
        graph[table].initial_value,
        Some(vec![0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01])
    );

    let property = graph[square].properties[0];
    let getter = graph[property].getter.unwrap();
    assert_eq!(graph[getter].name, "get_Side");
    assert_eq!(graph[getter].declaring_type, Some(square));
    Ok(())
}

#[test]
fn attributes_and_resources_survive_a_round_trip() -> Result<()> {
    init_logging();
    let image = write(&library(), &WriterOptions::default())?;
    let graph = load(&image.bytes)?;

    let square = graph.find_type("Library", "Square").unwrap();
    let attribute = graph
        .custom_attribute(&graph[square].custom_attributes, "System", "ObsoleteAttribute")
        .unwrap();
    match &attribute.value {
        CustomAttributeData::Decoded(value) => assert_eq!(
            value.fixed_args,
            vec![CustomAttributeArgument::String(Some("use IShape".to_string()))]
        ),
        CustomAttributeData::Raw(blob) => panic!("attribute left undecoded: {blob:02X?}"),
    }

    assert_eq!(graph.resources.len(), 1);
    assert_eq!(graph.resources[0].name, "Library.data.bin");
    assert_eq!(
        graph.resources[0].data,
        ResourceData::Embedded(vec![0xCA, 0xFE, 0xBA, 0xBE, 0x01])
    );
    Ok(())
}

#[test]
fn rewriting_a_loaded_graph_keeps_it_loadable() -> Result<()> {
    init_logging();
    let first = write(&library(), &WriterOptions::deterministic())?;
    let mut graph = load(&first.bytes)?;

    let square = graph.find_type("Library", "Square").unwrap();
    graph[square].name = "Quad".to_string();
    let table = graph[square].fields[1];
    graph.detach_field(table);

    let second = write(&graph, &WriterOptions::deterministic())?;
    let reloaded = load(&second.bytes)?;
    assert!(reloaded.find_type("Library", "Square").is_none());
    let quad = reloaded.find_type("Library", "Quad").unwrap();
    assert_eq!(reloaded[quad].fields.len(), 1);
    assert_eq!(reloaded.full_name(reloaded[quad].nested_types[0]), "Library.Quad/Builder");
    Ok(())
}

#[test]
fn deterministic_writes_are_byte_identical() -> Result<()> {
    let graph = library();
    let first = write(&graph, &WriterOptions::deterministic())?;
    let second = write(&graph, &WriterOptions::deterministic())?;
    assert_eq!(first.bytes, second.bytes);
    Ok(())
}

#[test]
fn strong_name_space_is_reserved() -> Result<()> {
    let options = WriterOptions::default().with_strong_name(vec![0x42; 160], 128);
    let image = write(&library(), &options)?;

    let (offset, size) = image.strong_name.unwrap();
    assert_eq!(size, 128);
    assert!(image.bytes[offset..offset + size].iter().all(|byte| *byte == 0));

    let graph = load(&image.bytes)?;
    assert_eq!(graph.assembly.unwrap().public_key, vec![0x42; 160]);
    Ok(())
}

/// `Demo.Box`1::Get(!0)` returns its argument; `Demo.Program::Run` calls it through
/// `Box<string>`, which needs a `MemberRef` on a `TypeSpec` parent.
fn generic_call_site() -> ModuleGraph {
    let mut graph = ModuleGraph::new("Demo.dll");
    let object = graph.object_type();

    let boxed = graph.add_type("Demo", "Box`1", TypeAttributes::PUBLIC, Some(object.clone()));
    GenericParamOwner::Type(boxed).add_generic_param(&mut graph, "T");
    let get_sig = MethodSig::new_static(TypeSig::Var(0), vec![TypeSig::Var(0)]);
    let get = graph.add_method(
        boxed,
        "Get",
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        get_sig.clone(),
    );
    let mut body = MethodBody::new();
    body.push(OpCode::LDARG_0, Operand::None);
    body.push(OpCode::RET, Operand::None);
    graph[get].body = Some(body);

    let instance = TypeSig::generic_instance(TypeHandle::Def(boxed), vec![TypeSig::String], None);
    let get_string = graph.add_member_ref(
        MemberRefParent::Type(TypeHandle::Spec(Box::new(instance))),
        "Get",
        MemberRefSig::Method(get_sig),
    );

    let program = graph.add_type("Demo", "Program", TypeAttributes::PUBLIC, Some(object));
    let run = graph.add_method(
        program,
        "Run",
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        MethodSig::new_static(TypeSig::String, vec![]),
    );
    let mut body = MethodBody::new();
    body.push(
        OpCode::LDSTR,
        Operand::String(widestring::U16String::from_str("x")),
    );
    body.push(OpCode::CALL, Operand::Method(MethodHandle::Ref(get_string)));
    body.push(OpCode::RET, Operand::None);
    graph[run].body = Some(body);
    graph
}

#[test]
fn renamed_generic_methods_rename_their_call_sites() -> Result<()> {
    init_logging();
    let mut graph = load(&write(&generic_call_site(), &WriterOptions::default())?.bytes)?;

    let boxed = graph.find_type("Demo", "Box`1").unwrap();
    let get = graph[boxed].methods[0];
    let call_site = graph
        .member_refs()
        .find(|(_, member)| member.name == "Get")
        .map(|(id, _)| id)
        .unwrap();
    assert_eq!(graph.resolve_member_ref(call_site), Some(MemberDef::Method(get)));

    graph[get].name = "a".to_string();
    assert_eq!(graph.resolve_member_ref(call_site), Some(MemberDef::Method(get)));

    let reloaded = load(&write(&graph, &WriterOptions::default())?.bytes)?;
    assert!(reloaded.member_refs().all(|(_, member)| member.name != "Get"));

    let boxed = reloaded.find_type("Demo", "Box`1").unwrap();
    let renamed = reloaded[boxed].methods[0];
    assert_eq!(reloaded[renamed].name, "a");

    let program = reloaded.find_type("Demo", "Program").unwrap();
    let run = reloaded[program].methods[0];
    let body = reloaded[run].body.as_ref().unwrap();
    let Operand::Method(MethodHandle::Ref(call)) = &body.instructions[1].operand else {
        panic!("the call through Box<string> is no longer a member reference");
    };
    assert_eq!(reloaded[*call].name, "a");
    assert_eq!(reloaded.resolve_member_ref(*call), Some(MemberDef::Method(renamed)));
    Ok(())
}
