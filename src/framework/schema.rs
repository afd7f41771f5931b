//! # Schema Descriptor
//!
//! A versioned, serializable description of the exposed surface, used by
//! clients for discovery and code generation.
//!
//! [`SCHEMA_VERSION`] tracks the *format* of this descriptor. It changes only
//! when the descriptor shape changes incompatibly, never because an
//! application added a method.

use serde::{Deserialize, Serialize};

/// Current descriptor format version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSchema {
    pub name: String,
    /// Declared parameters, not counting the implicit context argument.
    pub param_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSchema {
    pub name: String,
    pub methods: Vec<MethodSchema>,
}

/// `{version, methods, namespaces}`. Both lists are always present, possibly empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub version: u32,
    pub methods: Vec<MethodSchema>,
    pub namespaces: Vec<NamespaceSchema>,
}

impl SchemaDescriptor {
    /// Builds a descriptor with members sorted by name.
    pub fn new(mut methods: Vec<MethodSchema>, mut namespaces: Vec<NamespaceSchema>) -> Self {
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        for ns in &mut namespaces {
            ns.methods.sort_by(|a, b| a.name.cmp(&b.name));
        }
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            version: SCHEMA_VERSION,
            methods,
            namespaces,
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodSchema> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn namespace(&self, name: &str) -> Option<&NamespaceSchema> {
        self.namespaces.iter().find(|n| n.name == name)
    }
}
