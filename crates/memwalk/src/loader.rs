//! Building a target from files on disk.
//!
//! - core files (ELF or Mach-O) become a [`SparseMemory`] of their loaded segments
//! - raw dumps are mapped at a caller-supplied address
//! - layouts come from a JSON file of type descriptors and symbols

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use memwalk_core::error::WalkError;
use memwalk_core::layout::{TypeDescriptor, TypeRegistry};
use memwalk_core::memory::{PointerWidth, SparseMemory};
use memwalk_core::types::Address;
use object::{Object, ObjectSegment};
use serde::Deserialize;
use tracing::{debug, info};

/// Failure while loading a target or its layouts
#[derive(Debug, thiserror::Error)]
pub enum LoadError
{
    #[error("failed to read {}: {source}", path.display())]
    Read
    {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse core file {}: {reason}", path.display())]
    Core
    {
        path: PathBuf,
        reason: String,
    },

    #[error("{} is big-endian; only little-endian targets are supported", path.display())]
    BigEndian
    {
        path: PathBuf
    },

    #[error("invalid layout file: {0}")]
    Layout(#[from] serde_json::Error),

    #[error("invalid dump argument '{0}', expected <address>=<file>")]
    DumpArgument(String),

    #[error(transparent)]
    Walk(#[from] WalkError),
}

fn read_file(path: &Path) -> Result<Vec<u8>, LoadError>
{
    fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Map every file-backed segment of a core file.
///
/// Only the bytes present in the file are mapped. The zero-filled tail of a
/// segment (`p_memsz > p_filesz`) was never dumped and reads as unmapped.
pub fn load_core(path: &Path) -> Result<SparseMemory, LoadError>
{
    let data = read_file(path)?;
    let file = object::File::parse(&*data).map_err(|err| LoadError::Core {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    if !file.is_little_endian() {
        return Err(LoadError::BigEndian {
            path: path.to_path_buf(),
        });
    }

    let width = if file.is_64() { PointerWidth::Bits64 } else { PointerWidth::Bits32 };
    let mut image = SparseMemory::with_pointer_width(width);

    for segment in file.segments() {
        let bytes = segment.data().map_err(|err| LoadError::Core {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        if bytes.is_empty() {
            continue;
        }
        let start = Address::new(segment.address());
        debug!(start = %start, len = bytes.len(), "mapping core segment");
        image.map(start, bytes.to_vec())?;
    }

    info!(
        path = %path.display(),
        regions = image.region_count(),
        bytes = image.mapped_bytes(),
        "loaded core file"
    );
    Ok(image)
}

/// Parse a `--dump` argument of the form `<address>=<file>`.
pub fn parse_dump_arg(arg: &str) -> Result<(Address, PathBuf), LoadError>
{
    let (address, file) = arg
        .split_once('=')
        .ok_or_else(|| LoadError::DumpArgument(arg.to_string()))?;
    if file.is_empty() {
        return Err(LoadError::DumpArgument(arg.to_string()));
    }
    Ok((Address::parse(address)?, PathBuf::from(file)))
}

/// Map a raw memory dump at `address`.
pub fn load_dump(image: &mut SparseMemory, address: Address, path: &Path) -> Result<(), LoadError>
{
    let bytes = read_file(path)?;
    debug!(address = %address, len = bytes.len(), path = %path.display(), "mapping raw dump");
    image.map(address, bytes)?;
    Ok(())
}

/// An address written either as a JSON number or as text (`"0xffffff80..."`)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AddressValue
{
    Number(u64),
    Text(String),
}

impl AddressValue
{
    fn resolve(&self) -> Result<Address, WalkError>
    {
        match self {
            AddressValue::Number(value) => Ok(Address::new(*value)),
            AddressValue::Text(text) => Address::parse(text),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SymbolEntry
{
    address: AddressValue,
    #[serde(rename = "type")]
    type_name: String,
}

#[derive(Debug, Deserialize)]
struct LayoutFile
{
    #[serde(default)]
    types: Vec<TypeDescriptor>,
    #[serde(default)]
    symbols: BTreeMap<String, SymbolEntry>,
}

/// Parse a layout document.
///
/// ```json
/// {
///   "types": [{ "name": "skmem_cache", "size": 128, "fields": [...] }],
///   "symbols": { "skmem_cache_head": { "address": "0xffffff8000a0b000", "type": "skmem_cache_head" } }
/// }
/// ```
pub fn parse_layout(json: &str) -> Result<TypeRegistry, LoadError>
{
    let file: LayoutFile = serde_json::from_str(json)?;
    let mut registry = TypeRegistry::new();

    for descriptor in file.types {
        registry.insert_type(descriptor);
    }
    for (name, entry) in &file.symbols {
        registry.insert_symbol(name, entry.address.resolve()?, &entry.type_name);
    }

    debug!(types = registry.type_count(), symbols = registry.symbol_count(), "parsed layout");
    Ok(registry)
}

/// Read and parse a layout file.
pub fn load_layout(path: &Path) -> Result<TypeRegistry, LoadError>
{
    let bytes = read_file(path)?;
    let text = String::from_utf8_lossy(&bytes);
    parse_layout(&text)
}

#[cfg(test)]
mod tests
{
    use memwalk_core::layout::TypeResolver;

    use super::*;

    #[test]
    fn test_parse_dump_arg()
    {
        let (address, file) = parse_dump_arg("0xffff8000=heap.bin").unwrap();
        assert_eq!(address, Address::new(0xffff_8000));
        assert_eq!(file, PathBuf::from("heap.bin"));

        assert!(matches!(parse_dump_arg("heap.bin"), Err(LoadError::DumpArgument(_))));
        assert!(matches!(parse_dump_arg("0x1000="), Err(LoadError::DumpArgument(_))));
        assert!(matches!(parse_dump_arg("zz=heap.bin"), Err(LoadError::Walk(_))));
    }

    #[test]
    fn test_parse_layout_types_and_symbols()
    {
        let json = r#"{
            "types": [
                { "name": "struct skmem_region", "size": 16, "fields": [
                    { "name": "skr_name", "offset": 0, "size": 16, "kind": "bytes" }
                ] }
            ],
            "symbols": {
                "skmem_region_head": { "address": "0xffffff8000100000", "type": "struct skmem_region_head" },
                "skmem_cache_head": { "address": 4096, "type": "skmem_cache_head" }
            }
        }"#;
        let registry = parse_layout(json).unwrap();

        assert_eq!(registry.resolve_type("skmem_region").unwrap().size, 16);
        let region_head = registry.resolve_symbol("skmem_region_head").unwrap();
        assert_eq!(region_head.address, Address::new(0xffff_ff80_0010_0000));
        assert_eq!(region_head.type_name, "skmem_region_head");
        assert_eq!(registry.resolve_symbol("skmem_cache_head").unwrap().address, Address::new(4096));
    }

    #[test]
    fn test_parse_layout_sections_are_optional()
    {
        let registry = parse_layout("{}").unwrap();
        assert_eq!(registry.type_count(), 0);
        assert_eq!(registry.symbol_count(), 0);
    }

    #[test]
    fn test_parse_layout_rejects_bad_address()
    {
        let json = r#"{ "symbols": { "x": { "address": "0xnope", "type": "t" } } }"#;
        assert!(matches!(parse_layout(json), Err(LoadError::Walk(WalkError::InvalidArgument(_)))));
        assert!(matches!(parse_layout("{ \"types\": 3 }"), Err(LoadError::Layout(_))));
    }

    #[test]
    fn test_load_dump_maps_bytes()
    {
        let path = std::env::temp_dir().join(format!("memwalk-dump-{}.bin", std::process::id()));
        fs::write(&path, [0x11u8, 0x22, 0x33, 0x44]).unwrap();

        let mut image = SparseMemory::new();
        load_dump(&mut image, Address::new(0x7000), &path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(image.mapped_bytes(), 4);
        assert!(matches!(
            load_dump(&mut image, Address::new(0x7000), Path::new("/nonexistent/memwalk.bin")),
            Err(LoadError::Read { .. })
        ));
    }
}
