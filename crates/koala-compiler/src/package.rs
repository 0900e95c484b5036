//! Package compilation driver
//!
//! Compiles one package (a directory of `.kl` sources, or a single source
//! string) into a KLC image. The module symbol table is walked in
//! insertion order so variable slots and item indices are deterministic.

use std::path::{Path, PathBuf};

use koala_bytecode::{Image, ImageError};
use koala_types::TypeDesc;
use thiserror::Error;

use crate::diag::DiagBag;
use crate::parser::parse_source;
use crate::state::{ImportResolver, ParserState};
use crate::symbol::{Access, SymbolKind};

/// Source file extension
pub const SOURCE_EXT: &str = "kl";

/// Image file extension
pub const IMAGE_EXT: &str = "klc";

/// Environment variable holding the colon-separated image search path
pub const PATH_ENV: &str = "KOALA_PATH";

/// Errors from the package driver
#[derive(Debug, Error)]
pub enum CompileError {
    /// I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// No source files in the package directory
    #[error("no .{SOURCE_EXT} sources in {0:?}")]
    NoSources(PathBuf),

    /// Compilation produced errors; they were rendered to stderr
    #[error("{0} compile error(s)")]
    HadErrors(usize),

    /// Image serialization failure
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Result of compiling one module
pub struct Compilation {
    /// The built image; None when errors were reported
    pub image: Option<Image>,
    /// All diagnostics produced by the pipeline
    pub diags: DiagBag,
}

/// Run the full analysis over one source string, returning the state
/// with its symbol tables and compiled blocks for inspection
pub fn analyze_source<'a>(
    package: &str,
    source: &str,
    resolver: &'a dyn ImportResolver,
) -> ParserState<'a> {
    let mut ps = ParserState::new(package, resolver);
    let mut stmts = parse_source(source, &mut ps.diags);
    if !ps.diags.full() {
        ps.declare(&stmts);
    }
    if !ps.diags.full() {
        ps.parse_body(&mut stmts);
    }
    ps
}

/// Compile one source string as the module of `package`
pub fn compile_source(
    package: &str,
    source: &str,
    resolver: &dyn ImportResolver,
) -> Compilation {
    let ps = analyze_source(package, source, resolver);
    let image = if ps.diags.has_errors() {
        None
    } else {
        Some(build_image(&ps))
    };
    Compilation {
        image,
        diags: ps.diags,
    }
}

/// Serialize a compiled module table into an image
fn build_image(ps: &ParserState<'_>) -> Image {
    let mut image = Image::new(&ps.package);
    let ids: Vec<_> = ps.arena.traverse(ps.module_table).collect();

    for id in ids {
        let sym = ps.arena.sym(id);
        let private = sym.access == Access::Private;
        match sym.kind {
            SymbolKind::Var => {
                let desc = sym.desc.clone().unwrap_or_else(TypeDesc::any);
                image.add_var(&sym.name, &desc, sym.konst, private);
            }
            SymbolKind::Proto => {
                let (Some(proto), Some(block)) = (sym.proto(), sym.block.as_ref()) else {
                    continue;
                };
                let code = block.encode(&mut image.atoms);
                let func_idx = image.add_func(&sym.name, proto, sym.locvars, code, private);
                for rec in &sym.locals {
                    image.add_locvar(&rec.name, &rec.desc, rec.pos, false, func_idx as i16);
                }
            }
            SymbolKind::Class => {
                let super_desc = sym.super_.and_then(|sid| ps.arena.sym(sid).desc.clone());
                let trait_descs: Vec<TypeDesc> = sym
                    .traits
                    .iter()
                    .filter_map(|tid| ps.arena.sym(*tid).desc.clone())
                    .collect();
                let class_idx =
                    image.add_class(&sym.name, super_desc.as_ref(), &trait_descs, private);
                let Some(table) = sym.table else { continue };
                for member_id in ps.arena.traverse(table) {
                    let member = ps.arena.sym(member_id);
                    if member.inherited {
                        continue;
                    }
                    let member_private = member.access == Access::Private;
                    match member.kind {
                        SymbolKind::Var => {
                            let desc = member.desc.clone().unwrap_or_else(TypeDesc::any);
                            image.add_field(class_idx, &member.name, &desc, member_private);
                        }
                        SymbolKind::Proto => {
                            let (Some(proto), Some(block)) =
                                (member.proto(), member.block.as_ref())
                            else {
                                continue;
                            };
                            let code = block.encode(&mut image.atoms);
                            let method_idx = image.add_method(
                                class_idx,
                                &member.name,
                                proto,
                                member.locvars,
                                code,
                                member_private,
                            );
                            for rec in &member.locals {
                                image.add_locvar(
                                    &rec.name,
                                    &rec.desc,
                                    rec.pos,
                                    true,
                                    method_idx as i16,
                                );
                            }
                        }
                        _ => {}
                    }
                }
            }
            SymbolKind::Trait => {
                let trait_descs: Vec<TypeDesc> = sym
                    .traits
                    .iter()
                    .filter_map(|tid| ps.arena.sym(*tid).desc.clone())
                    .collect();
                let trait_idx = image.add_trait(&sym.name, &trait_descs, private);
                let Some(table) = sym.table else { continue };
                for member_id in ps.arena.traverse(table) {
                    let member = ps.arena.sym(member_id);
                    if member.inherited {
                        continue;
                    }
                    let member_private = member.access == Access::Private;
                    match member.kind {
                        SymbolKind::IProto => {
                            if let Some(proto) = member.proto() {
                                image.add_imethod(trait_idx, &member.name, proto, member_private);
                            }
                        }
                        SymbolKind::Proto => {
                            let (Some(proto), Some(block)) =
                                (member.proto(), member.block.as_ref())
                            else {
                                continue;
                            };
                            let code = block.encode(&mut image.atoms);
                            image.add_method(
                                trait_idx,
                                &member.name,
                                proto,
                                member.locvars,
                                code,
                                member_private,
                            );
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    image
}

/// Compile a directory of sources into one image file
///
/// All `.kl` files in `dir` belong to one package named after the
/// directory. Diagnostics are rendered to stderr; the image is written to
/// `out_dir/<package>.klc`.
pub fn compile_package(
    dir: &Path,
    out_dir: &Path,
    resolver: &dyn ImportResolver,
) -> Result<PathBuf, CompileError> {
    let package = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string());

    let mut sources: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXT))
        .collect();
    sources.sort();
    if sources.is_empty() {
        return Err(CompileError::NoSources(dir.to_path_buf()));
    }

    let mut combined = String::new();
    for path in &sources {
        combined.push_str(&std::fs::read_to_string(path)?);
        combined.push('\n');
    }

    let result = compile_source(&package, &combined, resolver);
    result.diags.emit(&format!("{package}.{SOURCE_EXT}"), &combined);
    let Some(image) = result.image else {
        return Err(CompileError::HadErrors(result.diags.error_count()));
    };

    std::fs::create_dir_all(out_dir)?;
    let out_path = out_dir.join(format!("{package}.{IMAGE_EXT}"));
    image.write_file(&out_path)?;
    Ok(out_path)
}

/// Import resolver over a list of search directories
///
/// An import of `demo/util` is satisfied by the first
/// `<dir>/demo/util.klc` that loads.
pub struct PathResolver {
    paths: Vec<PathBuf>,
}

impl PathResolver {
    /// Create a resolver over explicit directories
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// Build from the `KOALA_PATH` environment variable plus `extra`
    pub fn from_env(extra: Vec<PathBuf>) -> Self {
        let mut paths = extra;
        if let Ok(value) = std::env::var(PATH_ENV) {
            paths.extend(value.split(':').filter(|s| !s.is_empty()).map(PathBuf::from));
        }
        Self { paths }
    }
}

impl ImportResolver for PathResolver {
    fn resolve(&self, path: &str) -> Option<Image> {
        for dir in &self.paths {
            let candidate = dir.join(format!("{path}.{IMAGE_EXT}"));
            if candidate.is_file() {
                if let Ok(image) = Image::read_file(&candidate) {
                    return Some(image);
                }
            }
        }
        None
    }
}
