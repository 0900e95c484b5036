//! Core type descriptor definitions
//!
//! A `TypeDesc` is the compiler's and image format's view of a Koala type.
//! Descriptors have a compact string encoding used inside KLC images
//! (`i`, `[]`-prefixed arrays, `Opath.name;` for user-defined types) and a
//! canonical display form used in diagnostics (`int`, `[]int`,
//! `koala/lang.String`).

use std::fmt;
use thiserror::Error;

/// Errors produced by the descriptor string codec
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescError {
    /// Empty descriptor string
    #[error("empty type descriptor")]
    Empty,

    /// Unknown primitive code
    #[error("unknown primitive code '{0}'")]
    UnknownPrimitive(char),

    /// Unterminated user-defined descriptor (missing ';')
    #[error("unterminated user-defined type in '{0}'")]
    Unterminated(String),

    /// Trailing characters after a complete descriptor
    #[error("trailing characters in type descriptor '{0}'")]
    Trailing(String),
}

/// Primitive types of the Koala language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// 64-bit signed integer
    Int,
    /// 64-bit IEEE 754 float
    Float,
    /// Boolean
    Bool,
    /// Immutable string
    String,
    /// The dynamic top type; unifies with every other type
    Any,
}

impl PrimitiveKind {
    /// Single-character code used in image descriptors
    pub fn code(self) -> char {
        match self {
            Self::Int => 'i',
            Self::Float => 'f',
            Self::Bool => 'b',
            Self::String => 's',
            Self::Any => 'A',
        }
    }

    /// Decode an image descriptor code
    pub fn from_code(c: char) -> Option<Self> {
        match c {
            'i' => Some(Self::Int),
            'f' => Some(Self::Float),
            'b' => Some(Self::Bool),
            's' => Some(Self::String),
            'A' => Some(Self::Any),
            _ => None,
        }
    }

    /// Keyword spelling used in source and diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Any => "any",
        }
    }
}

/// Function prototype: parameter types, return types, varargs flag
///
/// `varargs` marks the last parameter as repeatable; a prototype with
/// `varargs` set always has at least one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ProtoDesc {
    /// Parameter types in declaration order
    pub params: Vec<TypeDesc>,
    /// Return types in declaration order
    pub returns: Vec<TypeDesc>,
    /// Whether the last parameter is variadic
    pub varargs: bool,
}

impl ProtoDesc {
    /// Create a prototype from parameter and return lists
    pub fn new(params: Vec<TypeDesc>, returns: Vec<TypeDesc>) -> Self {
        Self {
            params,
            returns,
            varargs: false,
        }
    }

    /// Create a variadic prototype; the last parameter is repeatable
    pub fn with_varargs(params: Vec<TypeDesc>, returns: Vec<TypeDesc>) -> Self {
        debug_assert!(!params.is_empty());
        Self {
            params,
            returns,
            varargs: true,
        }
    }

    /// Minimum number of arguments a call must supply
    pub fn min_args(&self) -> usize {
        if self.varargs {
            self.params.len() - 1
        } else {
            self.params.len()
        }
    }

    /// Check whether `argc` satisfies this prototype's arity
    pub fn check_arity(&self, argc: usize) -> bool {
        if self.varargs {
            argc >= self.min_args()
        } else {
            argc == self.params.len()
        }
    }

    /// Declared type of the argument at `pos`, accounting for varargs
    pub fn param_at(&self, pos: usize) -> Option<&TypeDesc> {
        if self.varargs && pos >= self.params.len() - 1 {
            self.params.last()
        } else {
            self.params.get(pos)
        }
    }
}

/// Language-level type descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    /// Primitive type, optionally an array (`dims` > 0)
    Primitive {
        /// Base primitive
        kind: PrimitiveKind,
        /// Array dimensions; 0 means scalar
        dims: u8,
    },
    /// User-defined type `path.name`; empty `path` means the current module
    UserDef {
        /// Module path, e.g. `koala/lang`
        path: String,
        /// Type name within the module
        name: String,
        /// Array dimensions; 0 means scalar
        dims: u8,
    },
    /// Function prototype; `dims` is always 0
    Proto(Box<ProtoDesc>),
    /// Symbol-table placeholder for an imported module alias
    PkgPath {
        /// Module path the alias stands for
        path: String,
    },
}

impl TypeDesc {
    /// `int`
    pub fn int() -> Self {
        Self::primitive(PrimitiveKind::Int)
    }

    /// `float`
    pub fn float() -> Self {
        Self::primitive(PrimitiveKind::Float)
    }

    /// `bool`
    pub fn bool() -> Self {
        Self::primitive(PrimitiveKind::Bool)
    }

    /// `string`
    pub fn string() -> Self {
        Self::primitive(PrimitiveKind::String)
    }

    /// `any`
    pub fn any() -> Self {
        Self::primitive(PrimitiveKind::Any)
    }

    /// Scalar primitive of the given kind
    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::Primitive { kind, dims: 0 }
    }

    /// Scalar user-defined type
    pub fn user_def(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UserDef {
            path: path.into(),
            name: name.into(),
            dims: 0,
        }
    }

    /// Function prototype descriptor
    pub fn proto(proto: ProtoDesc) -> Self {
        Self::Proto(Box::new(proto))
    }

    /// Array of `self` with `dims` added dimensions
    pub fn with_dims(self, extra: u8) -> Self {
        match self {
            Self::Primitive { kind, dims } => Self::Primitive {
                kind,
                dims: dims + extra,
            },
            Self::UserDef { path, name, dims } => Self::UserDef {
                path,
                name,
                dims: dims + extra,
            },
            other => other,
        }
    }

    /// Array dimensions of this descriptor
    pub fn dims(&self) -> u8 {
        match self {
            Self::Primitive { dims, .. } | Self::UserDef { dims, .. } => *dims,
            _ => 0,
        }
    }

    /// Whether this is scalar `bool`
    pub fn is_bool(&self) -> bool {
        matches!(
            self,
            Self::Primitive {
                kind: PrimitiveKind::Bool,
                dims: 0
            }
        )
    }

    /// Whether this is scalar `int`
    pub fn is_int(&self) -> bool {
        matches!(
            self,
            Self::Primitive {
                kind: PrimitiveKind::Int,
                dims: 0
            }
        )
    }

    /// Whether this is the dynamic `any` type
    pub fn is_any(&self) -> bool {
        matches!(
            self,
            Self::Primitive {
                kind: PrimitiveKind::Any,
                dims: 0
            }
        )
    }

    /// Type compatibility check
    ///
    /// `any` unifies with every type. Otherwise the kinds and dimensions
    /// must match: primitives by code, user-defined types by path and name
    /// (the analyzer normalizes empty paths before comparing descriptors
    /// from different modules), prototypes position-wise on parameters and
    /// returns plus the varargs flag.
    pub fn check(&self, other: &TypeDesc) -> bool {
        if self.is_any() || other.is_any() {
            return true;
        }
        match (self, other) {
            (
                Self::Primitive { kind: k1, dims: d1 },
                Self::Primitive { kind: k2, dims: d2 },
            ) => k1 == k2 && d1 == d2,
            (
                Self::UserDef {
                    path: p1,
                    name: n1,
                    dims: d1,
                },
                Self::UserDef {
                    path: p2,
                    name: n2,
                    dims: d2,
                },
            ) => p1 == p2 && n1 == n2 && d1 == d2,
            (Self::Proto(a), Self::Proto(b)) => {
                a.varargs == b.varargs
                    && a.params.len() == b.params.len()
                    && a.returns.len() == b.returns.len()
                    && a.params.iter().zip(&b.params).all(|(x, y)| x.check(y))
                    && a.returns.iter().zip(&b.returns).all(|(x, y)| x.check(y))
            }
            (Self::PkgPath { path: p1 }, Self::PkgPath { path: p2 }) => p1 == p2,
            _ => false,
        }
    }

    /// Compact image descriptor encoding
    ///
    /// Primitives are single characters; each array dimension prepends
    /// `[`; user-defined types render as `Opath.name;` (`Oname;` when the
    /// path is empty).
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut String) {
        match self {
            Self::Primitive { kind, dims } => {
                for _ in 0..*dims {
                    out.push('[');
                }
                out.push(kind.code());
            }
            Self::UserDef { path, name, dims } => {
                for _ in 0..*dims {
                    out.push('[');
                }
                out.push('O');
                if !path.is_empty() {
                    out.push_str(path);
                    out.push('.');
                }
                out.push_str(name);
                out.push(';');
            }
            Self::Proto(proto) => {
                out.push('(');
                for p in &proto.params {
                    p.encode_into(out);
                }
                if proto.varargs {
                    out.push('.');
                }
                out.push(')');
                out.push('(');
                for r in &proto.returns {
                    r.encode_into(out);
                }
                out.push(')');
            }
            Self::PkgPath { path } => {
                out.push('P');
                out.push_str(path);
                out.push(';');
            }
        }
    }

    /// Decode a single descriptor from its image encoding
    pub fn decode(s: &str) -> Result<TypeDesc, DescError> {
        let mut chars = s.char_indices().peekable();
        let desc = Self::decode_one(s, &mut chars)?;
        if chars.next().is_some() {
            return Err(DescError::Trailing(s.to_string()));
        }
        Ok(desc)
    }

    /// Decode a concatenated descriptor list, e.g. a proto's param string
    pub fn decode_list(s: &str) -> Result<Vec<TypeDesc>, DescError> {
        let mut chars = s.char_indices().peekable();
        let mut out = Vec::new();
        while chars.peek().is_some() {
            out.push(Self::decode_one(s, &mut chars)?);
        }
        Ok(out)
    }

    fn decode_one(
        src: &str,
        chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    ) -> Result<TypeDesc, DescError> {
        let mut dims = 0u8;
        loop {
            let (_, c) = chars.next().ok_or(DescError::Empty)?;
            match c {
                '[' => dims += 1,
                'O' => {
                    let mut body = String::new();
                    loop {
                        match chars.next() {
                            Some((_, ';')) => break,
                            Some((_, ch)) => body.push(ch),
                            None => return Err(DescError::Unterminated(src.to_string())),
                        }
                    }
                    let (path, name) = match body.rfind('.') {
                        Some(i) => (body[..i].to_string(), body[i + 1..].to_string()),
                        None => (String::new(), body),
                    };
                    return Ok(TypeDesc::UserDef { path, name, dims });
                }
                c => {
                    let kind =
                        PrimitiveKind::from_code(c).ok_or(DescError::UnknownPrimitive(c))?;
                    return Ok(TypeDesc::Primitive { kind, dims });
                }
            }
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive { kind, dims } => {
                for _ in 0..*dims {
                    write!(f, "[]")?;
                }
                write!(f, "{}", kind.name())
            }
            Self::UserDef { path, name, dims } => {
                for _ in 0..*dims {
                    write!(f, "[]")?;
                }
                if path.is_empty() {
                    write!(f, "{name}")
                } else {
                    write!(f, "{path}.{name}")
                }
            }
            Self::Proto(proto) => {
                write!(f, "(")?;
                for (i, p) in proto.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    if proto.varargs && i == proto.params.len() - 1 {
                        write!(f, "...")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")(")?;
                for (i, r) in proto.returns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{r}")?;
                }
                write!(f, ")")
            }
            Self::PkgPath { path } => write!(f, "{path}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_reflexive() {
        let descs = [
            TypeDesc::int(),
            TypeDesc::float(),
            TypeDesc::bool(),
            TypeDesc::string(),
            TypeDesc::any(),
            TypeDesc::int().with_dims(2),
            TypeDesc::user_def("koala/lang", "String"),
            TypeDesc::proto(ProtoDesc::new(
                vec![TypeDesc::int(), TypeDesc::string()],
                vec![TypeDesc::int()],
            )),
        ];
        for d in &descs {
            assert!(d.check(d), "check({d}, {d}) must hold");
        }
    }

    #[test]
    fn test_any_unifies_with_everything() {
        let any = TypeDesc::any();
        for d in [
            TypeDesc::int(),
            TypeDesc::string().with_dims(1),
            TypeDesc::user_def("", "Animal"),
            TypeDesc::proto(ProtoDesc::default()),
        ] {
            assert!(any.check(&d));
            assert!(d.check(&any));
        }
    }

    #[test]
    fn test_dims_must_match() {
        assert!(!TypeDesc::int().check(&TypeDesc::int().with_dims(1)));
        assert!(TypeDesc::int()
            .with_dims(2)
            .check(&TypeDesc::int().with_dims(2)));
    }

    #[test]
    fn test_userdef_path_and_name() {
        let a = TypeDesc::user_def("koala/lang", "String");
        let b = TypeDesc::user_def("koala/lang", "String");
        let c = TypeDesc::user_def("koala/io", "String");
        let d = TypeDesc::user_def("koala/lang", "Tuple");
        assert!(a.check(&b));
        assert!(!a.check(&c));
        assert!(!a.check(&d));
    }

    #[test]
    fn test_proto_positions_matter() {
        let p1 = TypeDesc::proto(ProtoDesc::new(
            vec![TypeDesc::int(), TypeDesc::string()],
            vec![TypeDesc::int()],
        ));
        let p2 = TypeDesc::proto(ProtoDesc::new(
            vec![TypeDesc::string(), TypeDesc::int()],
            vec![TypeDesc::int()],
        ));
        assert!(!p1.check(&p2));
    }

    #[test]
    fn test_proto_varargs_flag() {
        let plain = TypeDesc::proto(ProtoDesc::new(vec![TypeDesc::int()], vec![]));
        let varg = TypeDesc::proto(ProtoDesc::with_varargs(vec![TypeDesc::int()], vec![]));
        assert!(!plain.check(&varg));
    }

    #[test]
    fn test_arity_with_varargs() {
        // (i, ...s)
        let proto = ProtoDesc::with_varargs(vec![TypeDesc::int(), TypeDesc::string()], vec![]);
        assert!(proto.check_arity(1));
        assert!(proto.check_arity(3));
        assert!(!proto.check_arity(0));
        assert_eq!(proto.param_at(0), Some(&TypeDesc::int()));
        assert_eq!(proto.param_at(5), Some(&TypeDesc::string()));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let descs = [
            TypeDesc::int(),
            TypeDesc::string().with_dims(1),
            TypeDesc::any(),
            TypeDesc::user_def("koala/lang", "String"),
            TypeDesc::user_def("", "Animal").with_dims(2),
        ];
        for d in &descs {
            let s = d.encode();
            assert_eq!(&TypeDesc::decode(&s).unwrap(), d, "roundtrip of '{s}'");
        }
    }

    #[test]
    fn test_decode_list() {
        let list = TypeDesc::decode_list("is[i").unwrap();
        assert_eq!(
            list,
            vec![
                TypeDesc::int(),
                TypeDesc::string(),
                TypeDesc::int().with_dims(1)
            ]
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(TypeDesc::decode(""), Err(DescError::Empty));
        assert_eq!(TypeDesc::decode("x"), Err(DescError::UnknownPrimitive('x')));
        assert!(matches!(
            TypeDesc::decode("OAnimal"),
            Err(DescError::Unterminated(_))
        ));
        assert!(matches!(
            TypeDesc::decode("ii"),
            Err(DescError::Trailing(_))
        ));
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(TypeDesc::int().to_string(), "int");
        assert_eq!(TypeDesc::int().with_dims(1).to_string(), "[]int");
        assert_eq!(
            TypeDesc::user_def("koala/lang", "String").to_string(),
            "koala/lang.String"
        );
        let p = TypeDesc::proto(ProtoDesc::new(
            vec![TypeDesc::int(), TypeDesc::string()],
            vec![TypeDesc::int()],
        ));
        assert_eq!(p.to_string(), "(int,string)(int)");
    }
}
