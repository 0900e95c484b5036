//! Koala bytecode and image format
//!
//! This crate defines the instruction set of the Koala VM, the compiler's
//! work-in-progress instruction blocks, the interned atom table, and the
//! KLC object-file format that ties them together on disk.

pub mod atoms;
pub mod code;
pub mod dis;
pub mod image;
pub mod opcode;
pub mod writer;

pub use atoms::{AtomTable, ConstItem, Item, ItemKind, TypeItem};
pub use code::{CodeBlock, InstArg, Instruction, JumpKind, JumpRef};
pub use image::{Image, ImageError, ENDIAN_TAG, MAGIC, VERSION};
pub use opcode::Opcode;
pub use writer::{DecodeError, ImageReader, ImageWriter};
