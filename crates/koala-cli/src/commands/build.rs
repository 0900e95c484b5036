//! `koala build` - compile a package directory

use std::path::Path;

use koala_compiler::{compile_package, PathResolver};

/// Compile the package in `dir`, writing the image to `out`
pub fn run(dir: &Path, out: &Path) -> Result<(), String> {
    let resolver = PathResolver::from_env(vec![out.to_path_buf()]);
    let out_path = compile_package(dir, out, &resolver).map_err(|e| e.to_string())?;
    println!("wrote {}", out_path.display());
    Ok(())
}
