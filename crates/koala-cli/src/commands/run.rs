//! `koala run` - load and execute an image

use std::path::Path;

use koala_bytecode::Image;
use koala_core::{Interp, KoalaState, Value, VmResult};
use koala_types::{ProtoDesc, TypeDesc};

fn native_print(args: &[Value]) -> VmResult<Vec<Value>> {
    let line = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    println!("{line}");
    Ok(Vec::new())
}

/// Execute `image`: module initializers run at load, then `main` if
/// the module declares one
pub fn run(image: &Path) -> Result<(), String> {
    let loaded = Image::read_file(image).map_err(|e| e.to_string())?;

    let mut search = vec![std::path::PathBuf::from(".")];
    if let Some(parent) = image.parent() {
        search.push(parent.to_path_buf());
    }
    if let Ok(value) = std::env::var(koala_core::state::PATH_ENV) {
        search.extend(value.split(':').filter(|s| !s.is_empty()).map(Into::into));
    }

    let state = KoalaState::with_paths(search);
    state.register_native_module(
        "koala/io",
        vec![(
            "Print",
            ProtoDesc::with_varargs(vec![TypeDesc::any()], vec![]),
            native_print as koala_core::NativeFn,
        )],
    );

    let module = state.install_image(loaded).map_err(|e| e.to_string())?;
    let has_main = module.borrow().funcs.contains_key("main");
    if has_main {
        let interp = Interp { state: &state };
        let results = interp
            .call(&module, "main", Vec::new())
            .map_err(|e| e.to_string())?;
        for value in results {
            println!("{value}");
        }
    }
    Ok(())
}
