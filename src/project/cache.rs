//! Facts about types of other assemblies.
//!
//! A module's metadata does not say whether a referenced type is a value type or
//! which integer type backs a referenced enum. Both matter for byte-exact signature
//! and custom attribute round trips, so the loader and writer consult a
//! [`ResolutionCache`] filled from the other assemblies of a batch.
//!
//! The cache is shared between worker threads. It is written while warming up and
//! only read afterwards.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;

use crate::{
    metadata::signatures::ELEMENT_TYPE,
    model::{ModuleGraph, TypeHandle, CORE_LIBRARIES},
};

/// What the engine needs to know about a type it cannot see.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TypeFacts {
    /// The type derives from `System.ValueType`
    pub is_value_type: bool,
    /// `ELEMENT_TYPE` of the `value__` field, for enums
    pub enum_underlying: Option<u8>,
}

/// Type facts keyed by assembly name, then by serialized type name (`Ns.Outer+Inner`).
///
/// Cloning is cheap; all clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct ResolutionCache {
    assemblies: Arc<DashMap<String, HashMap<String, TypeFacts>>>,
}

impl ResolutionCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> ResolutionCache {
        ResolutionCache::default()
    }

    /// A cache that knows the enums core library attributes use most.
    ///
    /// Covers the constructor arguments of `DebuggableAttribute`,
    /// `AttributeUsageAttribute`, `StructLayoutAttribute`, the security attributes
    /// and friends, which otherwise stay undecoded.
    #[must_use]
    pub fn with_core_library() -> ResolutionCache {
        let cache = ResolutionCache::new();
        let enums: &[(&str, u8)] = &[
            ("System.AttributeTargets", ELEMENT_TYPE::I4),
            ("System.Diagnostics.DebuggableAttribute+DebuggingModes", ELEMENT_TYPE::I4),
            ("System.Diagnostics.DebuggerBrowsableState", ELEMENT_TYPE::I4),
            ("System.ComponentModel.EditorBrowsableState", ELEMENT_TYPE::I4),
            ("System.Runtime.InteropServices.LayoutKind", ELEMENT_TYPE::I4),
            ("System.Runtime.InteropServices.CharSet", ELEMENT_TYPE::I4),
            ("System.Runtime.InteropServices.CallingConvention", ELEMENT_TYPE::I4),
            ("System.Runtime.InteropServices.ComInterfaceType", ELEMENT_TYPE::I4),
            ("System.Runtime.InteropServices.ClassInterfaceType", ELEMENT_TYPE::I4),
            ("System.Runtime.InteropServices.UnmanagedType", ELEMENT_TYPE::I4),
            ("System.Runtime.CompilerServices.MethodImplOptions", ELEMENT_TYPE::I4),
            ("System.Runtime.CompilerServices.CompilationRelaxations", ELEMENT_TYPE::I4),
            ("System.Security.Permissions.SecurityAction", ELEMENT_TYPE::I4),
            ("System.Security.Permissions.SecurityPermissionFlag", ELEMENT_TYPE::I4),
            ("System.Reflection.AssemblyNameFlags", ELEMENT_TYPE::I4),
            ("System.Runtime.Versioning.ResourceScope", ELEMENT_TYPE::I4),
        ];
        let value_types = [
            "System.Boolean",
            "System.Char",
            "System.SByte",
            "System.Byte",
            "System.Int16",
            "System.UInt16",
            "System.Int32",
            "System.UInt32",
            "System.Int64",
            "System.UInt64",
            "System.Single",
            "System.Double",
            "System.IntPtr",
            "System.UIntPtr",
            "System.Decimal",
            "System.DateTime",
            "System.TimeSpan",
            "System.Guid",
            "System.Nullable`1",
            "System.ValueTuple`2",
            "System.ValueTuple`3",
            "System.Collections.Generic.KeyValuePair`2",
            "System.Threading.CancellationToken",
            "System.Threading.Tasks.ValueTask`1",
            "System.Span`1",
            "System.ReadOnlySpan`1",
            "System.Runtime.CompilerServices.AsyncTaskMethodBuilder",
            "System.Runtime.CompilerServices.AsyncTaskMethodBuilder`1",
            "System.Runtime.CompilerServices.AsyncVoidMethodBuilder",
            "System.Runtime.CompilerServices.TaskAwaiter",
            "System.Runtime.CompilerServices.TaskAwaiter`1",
        ];

        for library in CORE_LIBRARIES {
            for (name, underlying) in enums {
                cache.insert(
                    library,
                    name,
                    TypeFacts {
                        is_value_type: true,
                        enum_underlying: Some(*underlying),
                    },
                );
            }
            for name in value_types {
                cache.insert(
                    library,
                    name,
                    TypeFacts {
                        is_value_type: true,
                        enum_underlying: None,
                    },
                );
            }
        }
        cache
    }

    /// Record the facts of one type.
    pub fn insert(&self, assembly: &str, type_name: &str, facts: TypeFacts) {
        self.assemblies
            .entry(assembly.to_string())
            .or_default()
            .insert(type_name.to_string(), facts);
    }

    /// Record every type of a loaded module under its assembly name (or module
    /// name, for a netmodule).
    pub fn register(&self, graph: &ModuleGraph) {
        let assembly = graph
            .assembly
            .as_ref()
            .map_or_else(|| graph.module.name.clone(), |assembly| assembly.name.clone());

        let mut types = HashMap::new();
        for id in graph.all_types() {
            if id == graph.module_type() {
                continue;
            }
            let facts = TypeFacts {
                is_value_type: graph.is_value_type(&TypeHandle::Def(id)).unwrap_or(false),
                enum_underlying: graph.enum_underlying_type(id),
            };
            types.insert(graph.serialized_name(id), facts);
        }
        log::debug!("Resolution cache: {} types from {}", types.len(), assembly);
        self.assemblies.entry(assembly).or_default().extend(types);
    }

    /// Facts about `type_name`, looked up in `assembly` when given, else in every
    /// known assembly. A miss in one core library falls through to the others,
    /// since types move between them.
    #[must_use]
    pub fn lookup(&self, assembly: Option<&str>, type_name: &str) -> Option<TypeFacts> {
        let Some(assembly) = assembly else {
            return self
                .assemblies
                .iter()
                .find_map(|entry| entry.value().get(type_name).copied());
        };

        if let Some(facts) = self
            .assemblies
            .get(assembly)
            .and_then(|types| types.get(type_name).copied())
        {
            return Some(facts);
        }
        if CORE_LIBRARIES.contains(&assembly) {
            return CORE_LIBRARIES.iter().find_map(|library| {
                self.assemblies
                    .get(*library)
                    .and_then(|types| types.get(type_name).copied())
            });
        }
        None
    }

    /// Underlying element type of an enum named the way custom attribute blobs name
    /// types: `Ns.Type` or the assembly-qualified `Ns.Type, Assembly, Version=...`.
    #[must_use]
    pub fn enum_underlying(&self, serialized: &str) -> Option<u8> {
        let mut parts = serialized.splitn(2, ',');
        let type_name = parts.next()?.trim();
        let assembly = parts
            .next()
            .and_then(|rest| rest.split(',').next())
            .map(str::trim);
        self.lookup(assembly, type_name)?.enum_underlying
    }

    /// Whether the named type of `assembly` is a value type, if known.
    #[must_use]
    pub fn is_value_type(&self, assembly: &str, type_name: &str) -> Option<bool> {
        self.lookup(Some(assembly), type_name)
            .map(|facts| facts.is_value_type)
    }

    /// Whether anything was registered for `assembly`.
    #[must_use]
    pub fn contains_assembly(&self, assembly: &str) -> bool {
        self.assemblies.contains_key(assembly)
    }

    /// Number of assemblies with registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assemblies.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::signatures::{FieldSig, TypeSig},
        model::flags::{FieldAttributes, TypeAttributes},
    };

    #[test]
    fn core_library_facts_cross_library_names() {
        let cache = ResolutionCache::with_core_library();
        assert_eq!(cache.is_value_type("System.Runtime", "System.Int32"), Some(true));
        assert_eq!(
            cache.enum_underlying("System.AttributeTargets, mscorlib, Version=4.0.0.0"),
            Some(ELEMENT_TYPE::I4)
        );
        assert_eq!(cache.enum_underlying("System.String"), None);
        assert_eq!(cache.is_value_type("Other", "System.Int32"), None);
    }

    #[test]
    fn register_collects_local_types() {
        let mut graph = ModuleGraph::new("Lib.dll");
        let enum_type = graph.core_type("System", "Enum");
        let color = graph.add_type("Lib", "Color", TypeAttributes::PUBLIC, Some(enum_type));
        graph.add_field(
            color,
            "value__",
            FieldAttributes::PUBLIC | FieldAttributes::RT_SPECIAL_NAME,
            FieldSig { ty: TypeSig::U1 },
        );
        let object = graph.object_type();
        let holder = graph.add_type("Lib", "Holder", TypeAttributes::PUBLIC, Some(object));
        graph.add_nested_type(holder, "Inner", TypeAttributes::NESTED_PUBLIC, None);

        let cache = ResolutionCache::new();
        cache.register(&graph);

        assert!(cache.contains_assembly("Lib.dll"));
        assert_eq!(cache.enum_underlying("Lib.Color"), Some(ELEMENT_TYPE::U1));
        assert_eq!(cache.is_value_type("Lib.dll", "Lib.Holder"), Some(false));
        assert!(cache.lookup(None, "Lib.Holder+Inner").is_some());
        assert_eq!(cache.len(), 1);
    }
}
