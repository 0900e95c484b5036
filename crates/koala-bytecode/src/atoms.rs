//! Interned atom table
//!
//! The atom table holds per-kind pools of immutable items. Items are
//! referenced by `(kind, index)` pairs; uniquable kinds (strings, types,
//! type lists, prototypes, constants) are deduplicated on insert through a
//! content-hash index, the rest are append-only. The image format
//! serializes the pools verbatim, so index stability is load-bearing.

use std::hash::{Hash, Hasher};

use koala_types::{PrimitiveKind, ProtoDesc, TypeDesc};
use rustc_hash::FxHashMap;

/// Item flag bits shared by the image format
pub mod flags {
    /// Access bit: set means private
    pub const ACCESS_PRIVATE: i32 = 1;
    /// Var flag: declared `const`
    pub const VAR_CONST: i32 = 2;
    /// LocVar owner is a function
    pub const LOCVAR_FUNC: i16 = 1;
    /// LocVar owner is a method
    pub const LOCVAR_METHOD: i16 = 2;
}

/// Item kind codes, fixed by the image format
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// Map directory (never stored in the pools)
    Map = 0,
    /// Interned string
    String = 1,
    /// Type descriptor
    Type = 2,
    /// List of type indices
    TypeList = 3,
    /// Function prototype
    Proto = 4,
    /// Literal constant
    Const = 5,
    /// Module variable
    Var = 6,
    /// Module function
    Func = 7,
    /// Raw code bytes
    Code = 8,
    /// Class definition
    Class = 9,
    /// Class field
    Field = 10,
    /// Class method
    Method = 11,
    /// Trait definition
    Trait = 12,
    /// Trait method prototype
    IMethod = 13,
    /// Local variable record
    LocVar = 14,
}

impl ItemKind {
    /// Number of kinds, including Map
    pub const COUNT: usize = 15;

    /// All pool kinds in serialization order (Map excluded)
    pub const POOL_KINDS: [ItemKind; 14] = [
        ItemKind::String,
        ItemKind::Type,
        ItemKind::TypeList,
        ItemKind::Proto,
        ItemKind::Const,
        ItemKind::Var,
        ItemKind::Func,
        ItemKind::Code,
        ItemKind::Class,
        ItemKind::Field,
        ItemKind::Method,
        ItemKind::Trait,
        ItemKind::IMethod,
        ItemKind::LocVar,
    ];

    /// Decode a kind code
    pub fn from_u16(v: u16) -> Option<Self> {
        Self::POOL_KINDS
            .iter()
            .copied()
            .find(|k| *k as u16 == v)
            .or(if v == 0 { Some(ItemKind::Map) } else { None })
    }

    /// Whether items of this kind are deduplicated on insert
    pub fn is_uniquable(self) -> bool {
        matches!(
            self,
            ItemKind::String
                | ItemKind::Type
                | ItemKind::TypeList
                | ItemKind::Proto
                | ItemKind::Const
        )
    }
}

/// Type item: the image encoding of a `TypeDesc`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeItem {
    /// Primitive type
    Primitive {
        /// Variadic marker (set on a prototype's trailing parameter)
        varg: bool,
        /// Array dimensions
        dims: u16,
        /// Primitive code character
        code: u8,
    },
    /// User-defined `path.name` type
    UserDef {
        /// Variadic marker
        varg: bool,
        /// Array dimensions
        dims: u16,
        /// String index of the module path, -1 for the current module
        path_idx: i32,
        /// String index of the type name
        name_idx: i32,
    },
    /// Function prototype reference
    Proto {
        /// Variadic marker
        varg: bool,
        /// Proto item index
        proto_idx: i32,
    },
}

const TYPE_KIND_PRIMITIVE: u8 = 1;
const TYPE_KIND_USERDEF: u8 = 2;
const TYPE_KIND_PROTO: u8 = 3;

/// Constant item
#[derive(Debug, Clone)]
pub enum ConstItem {
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// Boolean literal
    Bool(bool),
    /// String literal, by string item index
    Str(i32),
}

pub(crate) const CONST_INT: i32 = 1;
pub(crate) const CONST_FLOAT: i32 = 2;
pub(crate) const CONST_BOOL: i32 = 3;
pub(crate) const CONST_STRING: i32 = 4;

// Floats compare and hash by bit pattern so interning is exact.
impl PartialEq for ConstItem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstItem {}

impl Hash for ConstItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Int(v) => {
                state.write_u8(1);
                v.hash(state);
            }
            Self::Float(v) => {
                state.write_u8(2);
                v.to_bits().hash(state);
            }
            Self::Bool(v) => {
                state.write_u8(3);
                v.hash(state);
            }
            Self::Str(v) => {
                state.write_u8(4);
                v.hash(state);
            }
        }
    }
}

/// Function prototype item; indices point at TypeList items, -1 when empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtoItem {
    /// Return type list index
    pub rindex: i32,
    /// Parameter type list index
    pub pindex: i32,
}

/// Module variable item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarItem {
    /// Name string index
    pub name_idx: i32,
    /// Type item index
    pub type_idx: i32,
    /// bit0 = private, bit1 = const
    pub flags: i32,
}

/// Module function item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncItem {
    /// Name string index
    pub name_idx: i32,
    /// Proto item index
    pub proto_idx: i32,
    /// bit0 = private
    pub access: i16,
    /// Number of local variable slots
    pub locvars: i16,
    /// Code item index
    pub code_idx: i32,
}

/// Class item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassItem {
    /// Type item index of the class itself
    pub class_idx: i32,
    /// bit0 = private
    pub access: i32,
    /// Type item index of the super class, -1 when none
    pub super_idx: i32,
    /// TypeList index of mixed-in traits, -1 when none
    pub traits_idx: i32,
}

/// Class field item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldItem {
    /// Type item index of the owning class
    pub class_idx: i32,
    /// Name string index
    pub name_idx: i32,
    /// Type item index of the field type
    pub type_idx: i32,
    /// bit0 = private
    pub access: i32,
}

/// Class method item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodItem {
    /// Type item index of the owning class
    pub class_idx: i32,
    /// Name string index
    pub name_idx: i32,
    /// Proto item index
    pub proto_idx: i32,
    /// bit0 = private
    pub access: i16,
    /// Number of local variable slots
    pub locvars: i16,
    /// Code item index
    pub code_idx: i32,
}

/// Trait item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraitItem {
    /// Type item index of the trait itself
    pub class_idx: i32,
    /// bit0 = private
    pub access: i32,
    /// TypeList index of super traits, -1 when none
    pub traits_idx: i32,
}

/// Trait method prototype item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IMethodItem {
    /// Type item index of the owning trait
    pub class_idx: i32,
    /// Name string index
    pub name_idx: i32,
    /// Proto item index
    pub proto_idx: i32,
    /// bit0 = private
    pub access: i32,
}

/// Local variable record for debuggers and the loader's type binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocVarItem {
    /// Name string index
    pub name_idx: i32,
    /// Type item index
    pub type_idx: i32,
    /// Local slot position
    pub pos: i32,
    /// 1 = owner is a function, 2 = owner is a method
    pub flags: i16,
    /// Index of the owning Func or Method item
    pub owner_idx: i16,
}

/// An interned item of any kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Item {
    /// Interned string
    String(String),
    /// Type descriptor
    Type(TypeItem),
    /// Type index list
    TypeList(Vec<i32>),
    /// Prototype
    Proto(ProtoItem),
    /// Constant
    Const(ConstItem),
    /// Module variable
    Var(VarItem),
    /// Module function
    Func(FuncItem),
    /// Raw code bytes
    Code(Vec<u8>),
    /// Class definition
    Class(ClassItem),
    /// Class field
    Field(FieldItem),
    /// Class method
    Method(MethodItem),
    /// Trait definition
    Trait(TraitItem),
    /// Trait method prototype
    IMethod(IMethodItem),
    /// Local variable record
    LocVar(LocVarItem),
}

impl Item {
    /// The pool this item belongs to
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::String(_) => ItemKind::String,
            Item::Type(_) => ItemKind::Type,
            Item::TypeList(_) => ItemKind::TypeList,
            Item::Proto(_) => ItemKind::Proto,
            Item::Const(_) => ItemKind::Const,
            Item::Var(_) => ItemKind::Var,
            Item::Func(_) => ItemKind::Func,
            Item::Code(_) => ItemKind::Code,
            Item::Class(_) => ItemKind::Class,
            Item::Field(_) => ItemKind::Field,
            Item::Method(_) => ItemKind::Method,
            Item::Trait(_) => ItemKind::Trait,
            Item::IMethod(_) => ItemKind::IMethod,
            Item::LocVar(_) => ItemKind::LocVar,
        }
    }
}

/// Interned pools of immutable items, indexed by kind and position
#[derive(Debug, Clone)]
pub struct AtomTable {
    pools: Vec<Vec<Item>>,
    index: FxHashMap<Item, usize>,
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for AtomTable {
    fn eq(&self, other: &Self) -> bool {
        // The hash index is a cache; only pool contents define equality.
        self.pools == other.pools
    }
}

impl AtomTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            pools: (0..ItemKind::COUNT).map(|_| Vec::new()).collect(),
            index: FxHashMap::default(),
        }
    }

    fn pool(&self, kind: ItemKind) -> &Vec<Item> {
        &self.pools[kind as usize]
    }

    /// Number of items of `kind`
    pub fn size(&self, kind: ItemKind) -> usize {
        self.pool(kind).len()
    }

    /// Positional access
    pub fn get(&self, kind: ItemKind, index: usize) -> Option<&Item> {
        self.pool(kind).get(index)
    }

    /// Lookup without insert, by content hash
    pub fn index_of(&self, kind: ItemKind, item: &Item) -> Option<usize> {
        debug_assert_eq!(item.kind(), kind);
        self.index.get(item).copied()
    }

    /// Append `item`, returning its index
    ///
    /// With `unique` set the item is entered into the hash index, and a
    /// duplicate insert returns the existing index instead of appending.
    pub fn insert(&mut self, kind: ItemKind, item: Item, unique: bool) -> usize {
        debug_assert_eq!(item.kind(), kind);
        if unique {
            if let Some(&idx) = self.index.get(&item) {
                return idx;
            }
        }
        let pool = &mut self.pools[kind as usize];
        let idx = pool.len();
        if unique {
            self.index.insert(item.clone(), idx);
        }
        pool.push(item);
        idx
    }

    // ===== Interning helpers =====

    /// Intern a string, returning its index
    pub fn intern_string(&mut self, s: &str) -> i32 {
        self.insert(ItemKind::String, Item::String(s.to_string()), true) as i32
    }

    /// Intern a type descriptor, returning its Type item index
    pub fn intern_type(&mut self, desc: &TypeDesc) -> i32 {
        self.intern_type_varg(desc, false)
    }

    /// Intern a type descriptor with an explicit variadic marker
    pub fn intern_type_varg(&mut self, desc: &TypeDesc, varg: bool) -> i32 {
        let item = match desc {
            TypeDesc::Primitive { kind, dims } => TypeItem::Primitive {
                varg,
                dims: *dims as u16,
                code: kind.code() as u8,
            },
            TypeDesc::UserDef { path, name, dims } => {
                let path_idx = if path.is_empty() {
                    -1
                } else {
                    self.intern_string(path)
                };
                let name_idx = self.intern_string(name);
                TypeItem::UserDef {
                    varg,
                    dims: *dims as u16,
                    path_idx,
                    name_idx,
                }
            }
            TypeDesc::Proto(proto) => {
                let proto_idx = self.intern_proto(proto);
                TypeItem::Proto { varg, proto_idx }
            }
            TypeDesc::PkgPath { path } => {
                // Package paths never appear in images; encode as a
                // dimensionless user-defined type with no name.
                let path_idx = self.intern_string(path);
                TypeItem::UserDef {
                    varg,
                    dims: 0,
                    path_idx,
                    name_idx: -1,
                }
            }
        };
        self.insert(ItemKind::Type, Item::Type(item), true) as i32
    }

    /// Intern a type list; empty lists encode as -1
    pub fn intern_typelist(&mut self, descs: &[TypeDesc]) -> i32 {
        self.intern_typelist_varg(descs, false)
    }

    fn intern_typelist_varg(&mut self, descs: &[TypeDesc], varargs: bool) -> i32 {
        if descs.is_empty() {
            return -1;
        }
        let last = descs.len() - 1;
        let indices: Vec<i32> = descs
            .iter()
            .enumerate()
            .map(|(i, d)| self.intern_type_varg(d, varargs && i == last))
            .collect();
        self.insert(ItemKind::TypeList, Item::TypeList(indices), true) as i32
    }

    /// Intern a prototype, returning its Proto item index
    pub fn intern_proto(&mut self, proto: &ProtoDesc) -> i32 {
        let rindex = self.intern_typelist(&proto.returns);
        let pindex = self.intern_typelist_varg(&proto.params, proto.varargs);
        self.insert(
            ItemKind::Proto,
            Item::Proto(ProtoItem { rindex, pindex }),
            true,
        ) as i32
    }

    /// Intern an integer constant
    pub fn intern_const_int(&mut self, v: i64) -> i32 {
        self.insert(ItemKind::Const, Item::Const(ConstItem::Int(v)), true) as i32
    }

    /// Intern a float constant
    pub fn intern_const_float(&mut self, v: f64) -> i32 {
        self.insert(ItemKind::Const, Item::Const(ConstItem::Float(v)), true) as i32
    }

    /// Intern a boolean constant
    pub fn intern_const_bool(&mut self, v: bool) -> i32 {
        self.insert(ItemKind::Const, Item::Const(ConstItem::Bool(v)), true) as i32
    }

    /// Intern a string constant (interns the string item as well)
    pub fn intern_const_string(&mut self, s: &str) -> i32 {
        let sidx = self.intern_string(s);
        self.insert(ItemKind::Const, Item::Const(ConstItem::Str(sidx)), true) as i32
    }

    // ===== Readback helpers =====

    /// Resolve a string item index
    pub fn get_string(&self, idx: i32) -> Option<&str> {
        match self.get(ItemKind::String, usize::try_from(idx).ok()?) {
            Some(Item::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Resolve a constant item index
    pub fn get_const(&self, idx: i32) -> Option<&ConstItem> {
        match self.get(ItemKind::Const, usize::try_from(idx).ok()?) {
            Some(Item::Const(c)) => Some(c),
            _ => None,
        }
    }

    /// Rebuild a `TypeDesc` from a Type item index
    pub fn type_to_desc(&self, idx: i32) -> Option<TypeDesc> {
        match self.get(ItemKind::Type, usize::try_from(idx).ok()?)? {
            Item::Type(TypeItem::Primitive { dims, code, .. }) => {
                let kind = PrimitiveKind::from_code(*code as char)?;
                Some(TypeDesc::Primitive {
                    kind,
                    dims: *dims as u8,
                })
            }
            Item::Type(TypeItem::UserDef {
                dims,
                path_idx,
                name_idx,
                ..
            }) => {
                let path = if *path_idx < 0 {
                    String::new()
                } else {
                    self.get_string(*path_idx)?.to_string()
                };
                let name = self.get_string(*name_idx)?.to_string();
                Some(TypeDesc::UserDef {
                    path,
                    name,
                    dims: *dims as u8,
                })
            }
            Item::Type(TypeItem::Proto { proto_idx, .. }) => {
                self.proto_to_desc(*proto_idx).map(TypeDesc::proto)
            }
            _ => None,
        }
    }

    /// Rebuild the descriptors of a TypeList index (-1 yields an empty list)
    pub fn typelist_to_descs(&self, idx: i32) -> Option<Vec<TypeDesc>> {
        if idx < 0 {
            return Some(Vec::new());
        }
        match self.get(ItemKind::TypeList, idx as usize)? {
            Item::TypeList(indices) => indices.iter().map(|&i| self.type_to_desc(i)).collect(),
            _ => None,
        }
    }

    /// Whether a TypeList's trailing entry carries the variadic marker
    pub fn typelist_is_varargs(&self, idx: i32) -> bool {
        if idx < 0 {
            return false;
        }
        let Some(Item::TypeList(indices)) = self.get(ItemKind::TypeList, idx as usize) else {
            return false;
        };
        let Some(&last) = indices.last() else {
            return false;
        };
        matches!(
            self.get(ItemKind::Type, last as usize),
            Some(Item::Type(
                TypeItem::Primitive { varg: true, .. }
                    | TypeItem::UserDef { varg: true, .. }
                    | TypeItem::Proto { varg: true, .. }
            ))
        )
    }

    /// Rebuild a `ProtoDesc` from a Proto item index
    pub fn proto_to_desc(&self, idx: i32) -> Option<ProtoDesc> {
        match self.get(ItemKind::Proto, usize::try_from(idx).ok()?)? {
            Item::Proto(p) => {
                let returns = self.typelist_to_descs(p.rindex)?;
                let params = self.typelist_to_descs(p.pindex)?;
                let varargs = self.typelist_is_varargs(p.pindex);
                Some(ProtoDesc {
                    params,
                    returns,
                    varargs,
                })
            }
            _ => None,
        }
    }

    /// Iterate a pool in insertion order
    pub fn iter(&self, kind: ItemKind) -> impl Iterator<Item = &Item> {
        self.pool(kind).iter()
    }
}

// ===== Per-item serialization =====

use crate::writer::{DecodeError, ImageReader, ImageWriter};

impl Item {
    /// Encode this item in its fixed on-disk layout
    pub fn encode(&self, w: &mut ImageWriter) {
        match self {
            Item::String(s) => {
                // length includes the terminating nul
                w.emit_i32(s.len() as i32 + 1);
                w.emit_bytes(s.as_bytes());
                w.emit_u8(0);
            }
            Item::Type(t) => match t {
                TypeItem::Primitive { varg, dims, code } => {
                    w.emit_u8(TYPE_KIND_PRIMITIVE);
                    w.emit_u8(*varg as u8);
                    w.emit_u16(*dims);
                    w.emit_i32(*code as i32);
                    w.emit_i32(0);
                }
                TypeItem::UserDef {
                    varg,
                    dims,
                    path_idx,
                    name_idx,
                } => {
                    w.emit_u8(TYPE_KIND_USERDEF);
                    w.emit_u8(*varg as u8);
                    w.emit_u16(*dims);
                    w.emit_i32(*path_idx);
                    w.emit_i32(*name_idx);
                }
                TypeItem::Proto { varg, proto_idx } => {
                    w.emit_u8(TYPE_KIND_PROTO);
                    w.emit_u8(*varg as u8);
                    w.emit_u16(0);
                    w.emit_i32(*proto_idx);
                    w.emit_i32(0);
                }
            },
            Item::TypeList(indices) => {
                w.emit_i32(indices.len() as i32);
                for idx in indices {
                    w.emit_i32(*idx);
                }
            }
            Item::Proto(p) => {
                w.emit_i32(p.rindex);
                w.emit_i32(p.pindex);
            }
            Item::Const(c) => match c {
                ConstItem::Int(v) => {
                    w.emit_i32(CONST_INT);
                    w.emit_i64(*v);
                }
                ConstItem::Float(v) => {
                    w.emit_i32(CONST_FLOAT);
                    w.emit_f64(*v);
                }
                ConstItem::Bool(v) => {
                    w.emit_i32(CONST_BOOL);
                    w.emit_i64(*v as i64);
                }
                ConstItem::Str(idx) => {
                    w.emit_i32(CONST_STRING);
                    w.emit_i64(*idx as i64);
                }
            },
            Item::Var(v) => {
                w.emit_i32(v.name_idx);
                w.emit_i32(v.type_idx);
                w.emit_i32(v.flags);
            }
            Item::Func(f) => {
                w.emit_i32(f.name_idx);
                w.emit_i32(f.proto_idx);
                w.emit_i16(f.access);
                w.emit_i16(f.locvars);
                w.emit_i32(f.code_idx);
            }
            Item::Code(bytes) => {
                w.emit_i32(bytes.len() as i32);
                w.emit_bytes(bytes);
            }
            Item::Class(c) => {
                w.emit_i32(c.class_idx);
                w.emit_i32(c.access);
                w.emit_i32(c.super_idx);
                w.emit_i32(c.traits_idx);
            }
            Item::Field(f) => {
                w.emit_i32(f.class_idx);
                w.emit_i32(f.name_idx);
                w.emit_i32(f.type_idx);
                w.emit_i32(f.access);
            }
            Item::Method(m) => {
                w.emit_i32(m.class_idx);
                w.emit_i32(m.name_idx);
                w.emit_i32(m.proto_idx);
                w.emit_i16(m.access);
                w.emit_i16(m.locvars);
                w.emit_i32(m.code_idx);
            }
            Item::Trait(t) => {
                w.emit_i32(t.class_idx);
                w.emit_i32(t.access);
                w.emit_i32(t.traits_idx);
            }
            Item::IMethod(m) => {
                w.emit_i32(m.class_idx);
                w.emit_i32(m.name_idx);
                w.emit_i32(m.proto_idx);
                w.emit_i32(m.access);
            }
            Item::LocVar(l) => {
                w.emit_i32(l.name_idx);
                w.emit_i32(l.type_idx);
                w.emit_i32(l.pos);
                w.emit_i16(l.flags);
                w.emit_i16(l.owner_idx);
            }
        }
    }

    /// Decode one item of `kind` from the reader
    pub fn decode(kind: ItemKind, r: &mut ImageReader<'_>) -> Result<Item, DecodeError> {
        match kind {
            ItemKind::Map => Err(DecodeError::InvalidLength(0, r.position())),
            ItemKind::String => {
                let at = r.position();
                let len = r.read_i32()?;
                if len <= 0 {
                    return Err(DecodeError::InvalidLength(len as i64, at));
                }
                Ok(Item::String(r.read_cstring(len as usize)?))
            }
            ItemKind::Type => {
                let at = r.position();
                let kind_code = r.read_u8()?;
                let varg = r.read_u8()? != 0;
                let dims = r.read_u16()?;
                let a = r.read_i32()?;
                let b = r.read_i32()?;
                let item = match kind_code {
                    TYPE_KIND_PRIMITIVE => TypeItem::Primitive {
                        varg,
                        dims,
                        code: a as u8,
                    },
                    TYPE_KIND_USERDEF => TypeItem::UserDef {
                        varg,
                        dims,
                        path_idx: a,
                        name_idx: b,
                    },
                    TYPE_KIND_PROTO => TypeItem::Proto { varg, proto_idx: a },
                    _ => return Err(DecodeError::InvalidLength(kind_code as i64, at)),
                };
                Ok(Item::Type(item))
            }
            ItemKind::TypeList => {
                let at = r.position();
                let size = r.read_i32()?;
                if size < 0 {
                    return Err(DecodeError::InvalidLength(size as i64, at));
                }
                let mut indices = Vec::with_capacity(size as usize);
                for _ in 0..size {
                    indices.push(r.read_i32()?);
                }
                Ok(Item::TypeList(indices))
            }
            ItemKind::Proto => Ok(Item::Proto(ProtoItem {
                rindex: r.read_i32()?,
                pindex: r.read_i32()?,
            })),
            ItemKind::Const => {
                let at = r.position();
                let tag = r.read_i32()?;
                let item = match tag {
                    CONST_INT => ConstItem::Int(r.read_i64()?),
                    CONST_FLOAT => ConstItem::Float(r.read_f64()?),
                    CONST_BOOL => ConstItem::Bool(r.read_i64()? != 0),
                    CONST_STRING => ConstItem::Str(r.read_i64()? as i32),
                    _ => return Err(DecodeError::InvalidLength(tag as i64, at)),
                };
                Ok(Item::Const(item))
            }
            ItemKind::Var => Ok(Item::Var(VarItem {
                name_idx: r.read_i32()?,
                type_idx: r.read_i32()?,
                flags: r.read_i32()?,
            })),
            ItemKind::Func => Ok(Item::Func(FuncItem {
                name_idx: r.read_i32()?,
                proto_idx: r.read_i32()?,
                access: r.read_i16()?,
                locvars: r.read_i16()?,
                code_idx: r.read_i32()?,
            })),
            ItemKind::Code => {
                let at = r.position();
                let size = r.read_i32()?;
                if size < 0 {
                    return Err(DecodeError::InvalidLength(size as i64, at));
                }
                Ok(Item::Code(r.read_bytes(size as usize)?))
            }
            ItemKind::Class => Ok(Item::Class(ClassItem {
                class_idx: r.read_i32()?,
                access: r.read_i32()?,
                super_idx: r.read_i32()?,
                traits_idx: r.read_i32()?,
            })),
            ItemKind::Field => Ok(Item::Field(FieldItem {
                class_idx: r.read_i32()?,
                name_idx: r.read_i32()?,
                type_idx: r.read_i32()?,
                access: r.read_i32()?,
            })),
            ItemKind::Method => Ok(Item::Method(MethodItem {
                class_idx: r.read_i32()?,
                name_idx: r.read_i32()?,
                proto_idx: r.read_i32()?,
                access: r.read_i16()?,
                locvars: r.read_i16()?,
                code_idx: r.read_i32()?,
            })),
            ItemKind::Trait => Ok(Item::Trait(TraitItem {
                class_idx: r.read_i32()?,
                access: r.read_i32()?,
                traits_idx: r.read_i32()?,
            })),
            ItemKind::IMethod => Ok(Item::IMethod(IMethodItem {
                class_idx: r.read_i32()?,
                name_idx: r.read_i32()?,
                proto_idx: r.read_i32()?,
                access: r.read_i32()?,
            })),
            ItemKind::LocVar => Ok(Item::LocVar(LocVarItem {
                name_idx: r.read_i32()?,
                type_idx: r.read_i32()?,
                pos: r.read_i32()?,
                flags: r.read_i16()?,
                owner_idx: r.read_i16()?,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_idempotent() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern_string("hello");
        let b = atoms.intern_string("world");
        let c = atoms.intern_string("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(atoms.size(ItemKind::String), 2);
        assert_eq!(
            atoms.index_of(ItemKind::String, &Item::String("hello".into())),
            Some(a as usize)
        );
    }

    #[test]
    fn test_const_interning() {
        let mut atoms = AtomTable::new();
        let i1 = atoms.intern_const_int(42);
        let i2 = atoms.intern_const_int(42);
        let f1 = atoms.intern_const_float(1.5);
        let f2 = atoms.intern_const_float(1.5);
        let s1 = atoms.intern_const_string("x");
        let s2 = atoms.intern_const_string("x");
        assert_eq!(i1, i2);
        assert_eq!(f1, f2);
        assert_eq!(s1, s2);
        assert_eq!(atoms.size(ItemKind::Const), 3);
    }

    #[test]
    fn test_type_interning_roundtrip() {
        let mut atoms = AtomTable::new();
        let desc = TypeDesc::user_def("koala/lang", "String").with_dims(1);
        let idx = atoms.intern_type(&desc);
        let idx2 = atoms.intern_type(&desc);
        assert_eq!(idx, idx2);
        assert_eq!(atoms.type_to_desc(idx), Some(desc));
    }

    #[test]
    fn test_proto_interning_roundtrip() {
        let mut atoms = AtomTable::new();
        let proto = ProtoDesc::with_varargs(
            vec![TypeDesc::int(), TypeDesc::string()],
            vec![TypeDesc::int()],
        );
        let idx = atoms.intern_proto(&proto);
        let back = atoms.proto_to_desc(idx).unwrap();
        assert_eq!(back, proto);
        assert!(back.varargs);
    }

    #[test]
    fn test_append_only_items() {
        let mut atoms = AtomTable::new();
        let v = VarItem {
            name_idx: 0,
            type_idx: 0,
            flags: 0,
        };
        let a = atoms.insert(ItemKind::Var, Item::Var(v), false);
        let b = atoms.insert(ItemKind::Var, Item::Var(v), false);
        assert_eq!((a, b), (0, 1));
    }

    #[test]
    fn test_item_encode_decode() {
        let items = [
            Item::String("koala".into()),
            Item::Type(TypeItem::Primitive {
                varg: false,
                dims: 2,
                code: b'i',
            }),
            Item::TypeList(vec![0, 3, 5]),
            Item::Proto(ProtoItem {
                rindex: -1,
                pindex: 2,
            }),
            Item::Const(ConstItem::Int(-9)),
            Item::Const(ConstItem::Float(2.25)),
            Item::Const(ConstItem::Bool(true)),
            Item::Const(ConstItem::Str(4)),
            Item::Var(VarItem {
                name_idx: 1,
                type_idx: 2,
                flags: flags::VAR_CONST,
            }),
            Item::Func(FuncItem {
                name_idx: 1,
                proto_idx: 0,
                access: 0,
                locvars: 3,
                code_idx: 0,
            }),
            Item::Code(vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x0A]),
            Item::Class(ClassItem {
                class_idx: 0,
                access: 0,
                super_idx: -1,
                traits_idx: -1,
            }),
            Item::Field(FieldItem {
                class_idx: 0,
                name_idx: 1,
                type_idx: 2,
                access: flags::ACCESS_PRIVATE,
            }),
            Item::Method(MethodItem {
                class_idx: 0,
                name_idx: 1,
                proto_idx: 0,
                access: 0,
                locvars: 1,
                code_idx: 1,
            }),
            Item::Trait(TraitItem {
                class_idx: 0,
                access: 0,
                traits_idx: -1,
            }),
            Item::IMethod(IMethodItem {
                class_idx: 0,
                name_idx: 1,
                proto_idx: 0,
                access: 0,
            }),
            Item::LocVar(LocVarItem {
                name_idx: 1,
                type_idx: 2,
                pos: 0,
                flags: flags::LOCVAR_FUNC,
                owner_idx: 0,
            }),
        ];
        for item in &items {
            let mut w = ImageWriter::new();
            item.encode(&mut w);
            let bytes = w.into_bytes();
            let mut r = ImageReader::new(&bytes);
            let back = Item::decode(item.kind(), &mut r).unwrap();
            assert_eq!(&back, item);
            assert_eq!(r.position(), bytes.len());
        }
    }
}
