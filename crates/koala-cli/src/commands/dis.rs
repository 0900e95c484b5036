//! `koala dis` - dump an image and disassemble its code

use std::path::Path;

use koala_bytecode::{dis, Image};

/// Print the image header summary, items and disassembled code
pub fn run(image: &Path) -> Result<(), String> {
    let loaded = Image::read_file(image).map_err(|e| e.to_string())?;
    let text = dis::dump(&loaded).map_err(|e| e.to_string())?;
    print!("{text}");
    Ok(())
}
