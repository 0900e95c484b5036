//! Image round-trip integration tests

use koala_bytecode::code::{CodeBlock, InstArg};
use koala_bytecode::{Image, ItemKind, Opcode};
use koala_types::{ProtoDesc, TypeDesc};

fn sample_image() -> Image {
    let mut image = Image::new("demo/app");

    image.add_var("Greeting", &TypeDesc::string(), true, false);

    let mut block = CodeBlock::new();
    block.append(Opcode::LoadK, InstArg::Int(2));
    block.append(Opcode::LoadK, InstArg::Int(1));
    block.append(Opcode::Add, InstArg::None);
    block.append(Opcode::Ret, InstArg::None);
    let code = block.encode(&mut image.atoms);

    let proto = ProtoDesc::new(vec![], vec![TypeDesc::int()]);
    image.add_func("Sum", &proto, 0, code, false);
    image
}

#[test]
fn roundtrip_preserves_every_item() {
    let image = sample_image();
    let bytes = image.encode();
    let back = Image::decode(&bytes).unwrap();

    assert_eq!(back.package, image.package);
    for kind in ItemKind::POOL_KINDS {
        assert_eq!(
            back.atoms.size(kind),
            image.atoms.size(kind),
            "pool {kind:?} size"
        );
        for idx in 0..image.atoms.size(kind) {
            assert_eq!(
                back.atoms.get(kind, idx),
                image.atoms.get(kind, idx),
                "item ({kind:?}, {idx})"
            );
        }
    }
}

#[test]
fn map_entries_match_nonempty_kinds() {
    let image = sample_image();
    let bytes = image.encode();
    let back = Image::decode(&bytes).unwrap();

    let nonempty = ItemKind::POOL_KINDS
        .iter()
        .filter(|k| image.atoms.size(**k) > 0)
        .count();
    let back_nonempty = ItemKind::POOL_KINDS
        .iter()
        .filter(|k| back.atoms.size(**k) > 0)
        .count();
    assert_eq!(nonempty, back_nonempty);
    // String, Type, TypeList, Proto, Const, Var, Func, Code are populated.
    assert_eq!(nonempty, 8);
}

#[test]
fn file_roundtrip() {
    let image = sample_image();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.klc");

    image.write_file(&path).unwrap();
    let back = Image::read_file(&path).unwrap();
    assert_eq!(back, image);
}

#[test]
fn interning_survives_reload() {
    let image = sample_image();
    let bytes = image.encode();
    let mut back = Image::decode(&bytes).unwrap();

    // Re-interning an existing string must return its original index.
    let before = back.atoms.size(ItemKind::String);
    let idx = back.atoms.intern_string("Greeting");
    assert_eq!(back.atoms.size(ItemKind::String), before);
    assert_eq!(back.atoms.get_string(idx), Some("Greeting"));
}
