//! Koala compiler
//!
//! The pipeline: source text is tokenized (`lexer`) and parsed (`parser`)
//! into the AST (`ast`); the analyzer (`analyzer`) runs a symbol
//! discovery pass and an analysis-plus-emission pass over a scope stack
//! (`state`), producing code blocks (`codegen`) that the package driver
//! (`package`) serializes into a KLC image.

pub mod analyzer;
pub mod ast;
pub mod codegen;
pub mod diag;
pub mod lexer;
pub mod parser;
pub mod package;
pub mod state;
pub mod symbol;

pub use diag::{DiagBag, Span, MAX_ERRORS};
pub use package::{
    analyze_source, compile_package, compile_source, CompileError, Compilation, PathResolver,
    IMAGE_EXT, PATH_ENV, SOURCE_EXT,
};
pub use state::{ImportResolver, NoImports, ParserState};
