//! # Type Layouts
//!
//! Externally supplied structure layouts and global entry points.
//!
//! Layout is never inferred here. A [`TypeResolver`] (DWARF reader, debugger
//! type database, JSON file) hands out [`TypeDescriptor`]s, and walkers treat
//! them as immutable shared data for the duration of a query.
//!
//! Type names are compared after stripping C decoration, so `struct skmem_slab *`,
//! `struct skmem_slab` and `skmem_slab` name the same layout.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{WalkError, WalkResult};
use crate::types::Address;

/// What a field holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind
{
    /// Unsigned integer (width is the field size)
    Unsigned,
    /// Signed integer (width is the field size)
    Signed,
    /// Pointer; `pointee` is `None` for untyped pointers
    Pointer
    {
        #[serde(default)]
        pointee: Option<String>,
    },
    /// Embedded aggregate
    Struct
    {
        type_name: String,
    },
    /// Inline fixed-size array
    Array
    {
        element: Box<FieldKind>,
        element_size: u64,
        count: u64,
    },
    /// Opaque bytes (character arrays, padding, unions we don't look into)
    Bytes,
}

impl FieldKind
{
    /// Short human-readable description used in type mismatch errors.
    pub fn describe(&self) -> String
    {
        match self {
            FieldKind::Unsigned => "unsigned integer".to_string(),
            FieldKind::Signed => "signed integer".to_string(),
            FieldKind::Pointer { pointee: Some(name) } => format!("pointer to {name}"),
            FieldKind::Pointer { pointee: None } => "untyped pointer".to_string(),
            FieldKind::Struct { type_name } => format!("struct {type_name}"),
            FieldKind::Array { element, count, .. } => format!("array[{count}] of {}", element.describe()),
            FieldKind::Bytes => "bytes".to_string(),
        }
    }
}

/// One named member of an aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field
{
    pub name: String,
    /// Byte offset from the start of the enclosing aggregate
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl Field
{
    pub fn unsigned(name: &str, offset: u64, size: u64) -> Self
    {
        Self::new(name, offset, size, FieldKind::Unsigned)
    }

    pub fn signed(name: &str, offset: u64, size: u64) -> Self
    {
        Self::new(name, offset, size, FieldKind::Signed)
    }

    /// 8-byte pointer field. Use [`Field::new`] for other widths.
    pub fn pointer(name: &str, offset: u64, pointee: Option<&str>) -> Self
    {
        Self::new(
            name,
            offset,
            8,
            FieldKind::Pointer {
                pointee: pointee.map(str::to_string),
            },
        )
    }

    pub fn structure(name: &str, offset: u64, size: u64, type_name: &str) -> Self
    {
        Self::new(
            name,
            offset,
            size,
            FieldKind::Struct {
                type_name: type_name.to_string(),
            },
        )
    }

    pub fn array(name: &str, offset: u64, element: FieldKind, element_size: u64, count: u64) -> Self
    {
        Self::new(
            name,
            offset,
            element_size * count,
            FieldKind::Array {
                element: Box::new(element),
                element_size,
                count,
            },
        )
    }

    pub fn bytes(name: &str, offset: u64, size: u64) -> Self
    {
        Self::new(name, offset, size, FieldKind::Bytes)
    }

    pub fn new(name: &str, offset: u64, size: u64, kind: FieldKind) -> Self
    {
        Self {
            name: name.to_string(),
            offset,
            size,
            kind,
        }
    }
}

/// Layout of a named aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor
{
    pub name: String,
    /// Total size in bytes, including trailing padding
    pub size: u64,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl TypeDescriptor
{
    pub fn new(name: &str, size: u64) -> Self
    {
        Self {
            name: canonical_type_name(name).to_string(),
            size,
            fields: Vec::new(),
        }
    }

    /// Builder-style field append.
    #[must_use]
    pub fn with_field(mut self, field: Field) -> Self
    {
        self.fields.push(field);
        self
    }

    /// Look up a field by name.
    ///
    /// ## Errors
    ///
    /// `UnknownField` if no member has that name.
    pub fn field(&self, name: &str) -> WalkResult<&Field>
    {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| WalkError::UnknownField {
                type_name: self.name.clone(),
                field: name.to_string(),
            })
    }
}

/// A global well-known entry point (`skmem_cache_head`, `nx_head`, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol
{
    pub address: Address,
    pub type_name: String,
}

/// A field reached through a dotted path, with its offset from the outermost type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField
{
    pub offset: u64,
    pub field: Field,
}

/// Strip C decoration from a type name.
///
/// ```rust
/// use memwalk_core::layout::canonical_type_name;
///
/// assert_eq!(canonical_type_name("struct skmem_slab *"), "skmem_slab");
/// assert_eq!(canonical_type_name("kern_channel"), "kern_channel");
/// ```
pub fn canonical_type_name(name: &str) -> &str
{
    let mut name = name.trim();
    while let Some(stripped) = name.strip_suffix('*') {
        name = stripped.trim_end();
    }
    for prefix in ["struct ", "union ", "const "] {
        if let Some(stripped) = name.strip_prefix(prefix) {
            name = stripped.trim_start();
        }
    }
    name
}

/// Source of type layouts and global symbols
///
/// This is the boundary to whatever attaches to the target and understands its
/// debug information. A failed lookup is terminal for the query that made it.
pub trait TypeResolver
{
    /// Layout for a type name.
    fn resolve_type(&self, name: &str) -> WalkResult<Arc<TypeDescriptor>>;

    /// Address and declared type of a global.
    fn resolve_symbol(&self, name: &str) -> WalkResult<Symbol>;

    /// Resolve a dotted member path (`sl_link.tqe_next`) inside `type_name`.
    ///
    /// Every segment but the last must be an embedded struct. Offsets are
    /// summed so the result is relative to the start of `type_name`.
    fn resolve_path(&self, type_name: &str, path: &str) -> WalkResult<ResolvedField>
    {
        let mut ty = self.resolve_type(type_name)?;
        let mut offset = 0u64;
        let mut segments = path.split('.').peekable();

        while let Some(segment) = segments.next() {
            let field = ty.field(segment)?.clone();
            offset = offset.checked_add(field.offset).ok_or_else(|| {
                WalkError::InvalidArgument(format!("offset of `{type_name}.{path}` overflows at `{segment}`"))
            })?;

            if segments.peek().is_none() {
                return Ok(ResolvedField { offset, field });
            }

            ty = match &field.kind {
                FieldKind::Struct { type_name } => self.resolve_type(type_name)?,
                other => {
                    return Err(WalkError::TypeMismatch {
                        expected: format!("struct member for `{segment}` in path `{path}`"),
                        found: other.describe(),
                    })
                }
            };
        }

        Err(WalkError::InvalidArgument(format!("empty field path for type `{type_name}`")))
    }
}

/// In-memory [`TypeResolver`]
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry
{
    types: HashMap<String, Arc<TypeDescriptor>>,
    symbols: HashMap<String, Symbol>,
}

impl TypeRegistry
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Register a layout, replacing any previous one with the same name.
    pub fn insert_type(&mut self, descriptor: TypeDescriptor)
    {
        let name = canonical_type_name(&descriptor.name).to_string();
        self.types.insert(name, Arc::new(descriptor));
    }

    /// Register a global symbol.
    pub fn insert_symbol(&mut self, name: &str, address: Address, type_name: &str)
    {
        self.symbols.insert(
            name.to_string(),
            Symbol {
                address,
                type_name: canonical_type_name(type_name).to_string(),
            },
        );
    }

    pub fn type_count(&self) -> usize
    {
        self.types.len()
    }

    pub fn symbol_count(&self) -> usize
    {
        self.symbols.len()
    }
}

impl TypeResolver for TypeRegistry
{
    fn resolve_type(&self, name: &str) -> WalkResult<Arc<TypeDescriptor>>
    {
        self.types
            .get(canonical_type_name(name))
            .cloned()
            .ok_or_else(|| WalkError::UnknownType(name.to_string()))
    }

    fn resolve_symbol(&self, name: &str) -> WalkResult<Symbol>
    {
        self.symbols
            .get(name)
            .cloned()
            .ok_or_else(|| WalkError::UnknownSymbol(name.to_string()))
    }
}
