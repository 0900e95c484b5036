//! KLC image format
//!
//! A KLC file is a compiled Koala package: a fixed 32-byte header, the
//! package name, a map directory of `(kind, offset, count)` entries, and
//! the atom-table pools serialized in kind order. All scalars are
//! little-endian; the package string is nul-terminated and padded to a
//! 4-byte multiple.

use std::path::Path;

use koala_types::{ProtoDesc, TypeDesc};
use thiserror::Error;

use crate::atoms::{
    flags, AtomTable, ClassItem, FieldItem, FuncItem, IMethodItem, Item, ItemKind, LocVarItem,
    MethodItem, TraitItem, VarItem,
};
use crate::writer::{DecodeError, ImageReader, ImageWriter};

/// Magic bytes of a KLC file
pub const MAGIC: [u8; 4] = *b"KLC\0";

/// Format version, four ASCII digits: major, minor, build-hi, build-lo
pub const VERSION: [u8; 4] = *b"0200";

/// Endianness check constant
pub const ENDIAN_TAG: u32 = 0x1a2b_3c4d;

const HEADER_SIZE: u32 = 32;
const MAP_ITEM_SIZE: u32 = 12;

/// Image encoding/decoding errors
#[derive(Debug, Error)]
pub enum ImageError {
    /// Underlying decode error
    #[error("image decode error: {0}")]
    Decode(#[from] DecodeError),

    /// I/O failure while reading or writing a file
    #[error("image i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid magic number
    #[error("invalid magic number {0:?}, expected \"KLC\"")]
    BadMagic([u8; 4]),

    /// Unsupported format version
    #[error("unsupported image version {0:?}")]
    BadVersion([u8; 4]),

    /// Endianness mismatch
    #[error("endian tag mismatch: {0:#x}")]
    BadEndianTag(u32),

    /// Header file size disagrees with the actual data length
    #[error("file size {header} in header, {actual} bytes of data")]
    SizeMismatch {
        /// Size recorded in the header
        header: u32,
        /// Actual data length
        actual: usize,
    },

    /// A map entry is malformed
    #[error("inconsistent map entry: kind {kind}, offset {offset}, count {count}")]
    InconsistentMap {
        /// Raw kind code
        kind: u16,
        /// Item offset
        offset: u32,
        /// Item count
        count: i32,
    },
}

/// One entry of the map directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapItem {
    /// Item kind code
    pub kind: u16,
    /// Absolute file offset of the first item
    pub offset: u32,
    /// Number of items of this kind
    pub count: i32,
}

/// In-memory KLC image: a package name plus the atom table
///
/// The same type serves as the builder (the compiler appends items through
/// the `add_*` methods) and as the loaded representation (the VM reads the
/// pools through the atom table).
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Package name, e.g. `koala/lang`
    pub package: String,
    /// The interned item pools
    pub atoms: AtomTable,
}

fn access_flag(private: bool) -> i32 {
    if private {
        flags::ACCESS_PRIVATE
    } else {
        0
    }
}

impl Image {
    /// Create an empty image for `package`
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            atoms: AtomTable::new(),
        }
    }

    // ===== Builder operations =====

    /// Add a module variable
    pub fn add_var(&mut self, name: &str, desc: &TypeDesc, konst: bool, private: bool) -> usize {
        let name_idx = self.atoms.intern_string(name);
        let type_idx = self.atoms.intern_type(desc);
        let mut item_flags = access_flag(private);
        if konst {
            item_flags |= flags::VAR_CONST;
        }
        self.atoms.insert(
            ItemKind::Var,
            Item::Var(VarItem {
                name_idx,
                type_idx,
                flags: item_flags,
            }),
            false,
        )
    }

    /// Add a module function with its encoded body
    pub fn add_func(
        &mut self,
        name: &str,
        proto: &ProtoDesc,
        locvars: u16,
        code: Vec<u8>,
        private: bool,
    ) -> usize {
        let name_idx = self.atoms.intern_string(name);
        let proto_idx = self.atoms.intern_proto(proto);
        let code_idx = self.atoms.insert(ItemKind::Code, Item::Code(code), false) as i32;
        self.atoms.insert(
            ItemKind::Func,
            Item::Func(FuncItem {
                name_idx,
                proto_idx,
                access: access_flag(private) as i16,
                locvars: locvars as i16,
                code_idx,
            }),
            false,
        )
    }

    /// Add a class; returns the Type item index identifying it
    pub fn add_class(
        &mut self,
        name: &str,
        super_: Option<&TypeDesc>,
        traits: &[TypeDesc],
        private: bool,
    ) -> i32 {
        let class_desc = TypeDesc::user_def("", name);
        let class_idx = self.atoms.intern_type(&class_desc);
        let super_idx = super_.map_or(-1, |d| self.atoms.intern_type(d));
        let traits_idx = self.atoms.intern_typelist(traits);
        self.atoms.insert(
            ItemKind::Class,
            Item::Class(ClassItem {
                class_idx,
                access: access_flag(private),
                super_idx,
                traits_idx,
            }),
            false,
        );
        class_idx
    }

    /// Add a field to the class identified by `class_idx`
    pub fn add_field(&mut self, class_idx: i32, name: &str, desc: &TypeDesc, private: bool) {
        let name_idx = self.atoms.intern_string(name);
        let type_idx = self.atoms.intern_type(desc);
        self.atoms.insert(
            ItemKind::Field,
            Item::Field(FieldItem {
                class_idx,
                name_idx,
                type_idx,
                access: access_flag(private),
            }),
            false,
        );
    }

    /// Add a concrete method to the class identified by `class_idx`
    pub fn add_method(
        &mut self,
        class_idx: i32,
        name: &str,
        proto: &ProtoDesc,
        locvars: u16,
        code: Vec<u8>,
        private: bool,
    ) -> usize {
        let name_idx = self.atoms.intern_string(name);
        let proto_idx = self.atoms.intern_proto(proto);
        let code_idx = self.atoms.insert(ItemKind::Code, Item::Code(code), false) as i32;
        self.atoms.insert(
            ItemKind::Method,
            Item::Method(MethodItem {
                class_idx,
                name_idx,
                proto_idx,
                access: access_flag(private) as i16,
                locvars: locvars as i16,
                code_idx,
            }),
            false,
        )
    }

    /// Add a trait; returns the Type item index identifying it
    pub fn add_trait(&mut self, name: &str, traits: &[TypeDesc], private: bool) -> i32 {
        let trait_desc = TypeDesc::user_def("", name);
        let class_idx = self.atoms.intern_type(&trait_desc);
        let traits_idx = self.atoms.intern_typelist(traits);
        self.atoms.insert(
            ItemKind::Trait,
            Item::Trait(TraitItem {
                class_idx,
                access: access_flag(private),
                traits_idx,
            }),
            false,
        );
        class_idx
    }

    /// Add an abstract method prototype to the trait at `class_idx`
    pub fn add_imethod(&mut self, class_idx: i32, name: &str, proto: &ProtoDesc, private: bool) {
        let name_idx = self.atoms.intern_string(name);
        let proto_idx = self.atoms.intern_proto(proto);
        self.atoms.insert(
            ItemKind::IMethod,
            Item::IMethod(IMethodItem {
                class_idx,
                name_idx,
                proto_idx,
                access: access_flag(private),
            }),
            false,
        );
    }

    /// Record a local variable of the function/method at `owner_idx`
    pub fn add_locvar(
        &mut self,
        name: &str,
        desc: &TypeDesc,
        pos: i32,
        method_owner: bool,
        owner_idx: i16,
    ) {
        let name_idx = self.atoms.intern_string(name);
        let type_idx = self.atoms.intern_type(desc);
        self.atoms.insert(
            ItemKind::LocVar,
            Item::LocVar(LocVarItem {
                name_idx,
                type_idx,
                pos,
                flags: if method_owner {
                    flags::LOCVAR_METHOD
                } else {
                    flags::LOCVAR_FUNC
                },
                owner_idx,
            }),
            false,
        );
    }

    // ===== Serialization =====

    /// Finalize and serialize the image
    ///
    /// Walks the pools in kind order, emits a map entry per non-empty
    /// kind, then the items; patches the final file size into the header.
    pub fn encode(&self) -> Vec<u8> {
        // Serialize each non-empty pool first so the map offsets are known.
        let mut pool_bytes: Vec<(ItemKind, Vec<u8>, i32)> = Vec::new();
        for kind in ItemKind::POOL_KINDS {
            let count = self.atoms.size(kind);
            if count == 0 {
                continue;
            }
            let mut pw = ImageWriter::new();
            for item in self.atoms.iter(kind) {
                item.encode(&mut pw);
            }
            pw.pad_to_4();
            pool_bytes.push((kind, pw.into_bytes(), count as i32));
        }

        let pkg_size = self.package.len() as u32 + 1;
        let pkg_padded = pkg_size.div_ceil(4) * 4;
        let map_offset = HEADER_SIZE + pkg_padded;
        let map_count = pool_bytes.len() as u32;

        let mut w = ImageWriter::new();
        w.emit_bytes(&MAGIC);
        w.emit_bytes(&VERSION);
        let file_size_at = w.offset();
        w.emit_u32(0); // file_size, patched below
        w.emit_u32(HEADER_SIZE);
        w.emit_u32(ENDIAN_TAG);
        w.emit_u32(map_offset);
        w.emit_u32(map_count);
        w.emit_u32(pkg_size);

        w.emit_bytes(self.package.as_bytes());
        w.emit_u8(0);
        w.pad_to_4();

        let mut offset = map_offset + map_count * MAP_ITEM_SIZE;
        for (kind, bytes, count) in &pool_bytes {
            w.emit_u16(*kind as u16);
            w.emit_u16(0);
            w.emit_u32(offset);
            w.emit_i32(*count);
            offset += bytes.len() as u32;
        }
        for (_, bytes, _) in &pool_bytes {
            w.emit_bytes(bytes);
        }

        let file_size = w.offset() as u32;
        w.patch_u32(file_size_at, file_size);
        w.into_bytes()
    }

    /// Deserialize an image from bytes
    pub fn decode(data: &[u8]) -> Result<Self, ImageError> {
        let mut r = ImageReader::new(data);

        let magic: [u8; 4] = r.read_bytes(4)?.try_into().unwrap();
        if magic != MAGIC {
            return Err(ImageError::BadMagic(magic));
        }
        let version: [u8; 4] = r.read_bytes(4)?.try_into().unwrap();
        if version != VERSION {
            return Err(ImageError::BadVersion(version));
        }
        let file_size = r.read_u32()?;
        let _header_size = r.read_u32()?;
        let endian_tag = r.read_u32()?;
        if endian_tag != ENDIAN_TAG {
            return Err(ImageError::BadEndianTag(endian_tag));
        }
        let map_offset = r.read_u32()?;
        let map_count = r.read_u32()?;
        let pkg_size = r.read_u32()?;
        if file_size as usize != data.len() {
            return Err(ImageError::SizeMismatch {
                header: file_size,
                actual: data.len(),
            });
        }

        let package = r.read_cstring(pkg_size as usize)?;

        r.seek(map_offset as usize)?;
        let mut map = Vec::with_capacity(map_count as usize);
        for _ in 0..map_count {
            let kind = r.read_u16()?;
            let _unused = r.read_u16()?;
            let offset = r.read_u32()?;
            let count = r.read_i32()?;
            map.push(MapItem {
                kind,
                offset,
                count,
            });
        }

        let mut atoms = AtomTable::new();
        for entry in &map {
            let kind = ItemKind::from_u16(entry.kind).filter(|k| *k != ItemKind::Map).ok_or(
                ImageError::InconsistentMap {
                    kind: entry.kind,
                    offset: entry.offset,
                    count: entry.count,
                },
            )?;
            if entry.count < 0 || entry.offset as usize > data.len() {
                return Err(ImageError::InconsistentMap {
                    kind: entry.kind,
                    offset: entry.offset,
                    count: entry.count,
                });
            }
            r.seek(entry.offset as usize)?;
            for _ in 0..entry.count {
                let item = Item::decode(kind, &mut r)?;
                atoms.insert(kind, item, kind.is_uniquable());
            }
        }

        Ok(Self { package, atoms })
    }

    /// Write the image to a file
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), ImageError> {
        std::fs::write(path, self.encode())?;
        Ok(())
    }

    /// Read an image from a file
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let data = std::fs::read(path)?;
        Self::decode(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koala_types::TypeDesc;

    #[test]
    fn test_empty_image_roundtrip() {
        let image = Image::new("demo");
        let bytes = image.encode();
        let back = Image::decode(&bytes).unwrap();
        assert_eq!(back.package, "demo");
        assert_eq!(back, image);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = Image::new("demo").encode();
        bytes[0] = b'X';
        assert!(matches!(Image::decode(&bytes), Err(ImageError::BadMagic(_))));
    }

    #[test]
    fn test_bad_endian_tag() {
        let mut bytes = Image::new("demo").encode();
        bytes[16] ^= 0xFF;
        assert!(matches!(
            Image::decode(&bytes),
            Err(ImageError::BadEndianTag(_))
        ));
    }

    #[test]
    fn test_truncated_file() {
        let bytes = Image::new("demo").encode();
        assert!(Image::decode(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_map_has_only_nonempty_kinds() {
        let mut image = Image::new("demo");
        image.add_var("Count", &TypeDesc::int(), false, false);
        let bytes = image.encode();
        let back = Image::decode(&bytes).unwrap();
        // String, Type and Var pools are populated; Func/Class/... are not.
        assert_eq!(back.atoms.size(ItemKind::Var), 1);
        assert_eq!(back.atoms.size(ItemKind::Func), 0);
        assert_eq!(back.atoms.size(ItemKind::Class), 0);
    }
}
