//! Koala type descriptors
//!
//! This crate defines the language-level type model shared by the compiler,
//! the image format, and the VM: primitive types, user-defined `path.name`
//! types, function prototypes, and package-path placeholders.

pub mod desc;

pub use desc::{DescError, PrimitiveKind, ProtoDesc, TypeDesc};
