//! Bytecode and image disassembly for debugging
//!
//! Renders code items as aligned `offset opcode argument` rows and whole
//! images as a header/map/item dump. Used by the `koala dis` command.

use std::fmt::Write as _;

use crate::atoms::{AtomTable, ConstItem, Item, ItemKind};
use crate::image::Image;
use crate::opcode::Opcode;
use crate::writer::{DecodeError, ImageReader};

fn render_const(atoms: &AtomTable, idx: i32) -> String {
    match atoms.get_const(idx) {
        Some(ConstItem::Int(v)) => v.to_string(),
        Some(ConstItem::Float(v)) => v.to_string(),
        Some(ConstItem::Bool(v)) => v.to_string(),
        Some(ConstItem::Str(sidx)) => match atoms.get_string(*sidx) {
            Some(s) => format!("\"{s}\""),
            None => format!("<str {sidx}>"),
        },
        None => format!("<const {idx}>"),
    }
}

/// Disassemble one code item into text rows
pub fn disassemble(code: &[u8], atoms: &AtomTable) -> Result<String, DecodeError> {
    let mut r = ImageReader::new(code);
    let mut out = String::new();
    while r.position() < code.len() {
        let at = r.position();
        let byte = r.read_u8()?;
        let Some(op) = Opcode::from_u8(byte) else {
            let _ = writeln!(out, "{at:6}  .byte {byte:#04x}");
            continue;
        };
        match op {
            Opcode::LoadK | Opcode::LoadM | Opcode::GetField | Opcode::SetField => {
                let idx = r.read_i32()?;
                let _ = writeln!(out, "{at:6}  {:<12}{} ; k{idx}", op.name(), render_const(atoms, idx));
            }
            Opcode::Call | Opcode::New => {
                let idx = r.read_i32()?;
                let argc = r.read_u16()?;
                let _ = writeln!(
                    out,
                    "{at:6}  {:<12}{}, {argc}",
                    op.name(),
                    render_const(atoms, idx)
                );
            }
            Opcode::Load | Opcode::Store | Opcode::Super => {
                let slot = r.read_u16()?;
                let _ = writeln!(out, "{at:6}  {:<12}{slot}", op.name());
            }
            Opcode::Jump | Opcode::JumpTrue | Opcode::JumpFalse => {
                let offset = r.read_i32()?;
                let target = r.position() as i64 + offset as i64;
                let _ = writeln!(out, "{at:6}  {:<12}{offset:+} -> {target}", op.name());
            }
            _ => {
                let _ = writeln!(out, "{at:6}  {}", op.name());
            }
        }
    }
    Ok(out)
}

/// Render a whole image: package, pool sizes, functions with their code
pub fn dump(image: &Image) -> Result<String, DecodeError> {
    let atoms = &image.atoms;
    let mut out = String::new();
    let _ = writeln!(out, "package: {}", image.package);
    for kind in ItemKind::POOL_KINDS {
        let count = atoms.size(kind);
        if count > 0 {
            let _ = writeln!(out, "  {kind:?}: {count} item(s)");
        }
    }

    for item in atoms.iter(ItemKind::Var) {
        if let Item::Var(v) = item {
            let name = atoms.get_string(v.name_idx).unwrap_or("?");
            let ty = atoms
                .type_to_desc(v.type_idx)
                .map_or_else(|| "?".to_string(), |d| d.to_string());
            let _ = writeln!(out, "\nvar {name} {ty}");
        }
    }

    let funcs: Vec<_> = atoms.iter(ItemKind::Func).cloned().collect();
    for item in funcs {
        if let Item::Func(f) = item {
            let name = atoms.get_string(f.name_idx).unwrap_or("?").to_string();
            let proto = atoms
                .proto_to_desc(f.proto_idx)
                .map(koala_types::TypeDesc::proto)
                .map_or_else(|| "?".to_string(), |d| d.to_string());
            let _ = writeln!(out, "\nfunc {name} {proto} ; locvars={}", f.locvars);
            if let Some(Item::Code(code)) = atoms.get(ItemKind::Code, f.code_idx as usize) {
                out.push_str(&disassemble(code, atoms)?);
            }
        }
    }

    let methods: Vec<_> = atoms.iter(ItemKind::Method).cloned().collect();
    for item in methods {
        if let Item::Method(m) = item {
            let class = atoms
                .type_to_desc(m.class_idx)
                .map_or_else(|| "?".to_string(), |d| d.to_string());
            let name = atoms.get_string(m.name_idx).unwrap_or("?").to_string();
            let _ = writeln!(out, "\nmethod {class}.{name} ; locvars={}", m.locvars);
            if let Some(Item::Code(code)) = atoms.get(ItemKind::Code, m.code_idx as usize) {
                out.push_str(&disassemble(code, atoms)?);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{CodeBlock, InstArg};

    #[test]
    fn test_disassemble_basic() {
        let mut atoms = AtomTable::new();
        let mut block = CodeBlock::new();
        block.append(Opcode::LoadK, InstArg::Int(2));
        block.append(Opcode::LoadK, InstArg::Int(1));
        block.append(Opcode::Add, InstArg::None);
        block.append(Opcode::Ret, InstArg::None);
        let code = block.encode(&mut atoms);

        let text = disassemble(&code, &atoms).unwrap();
        assert!(text.contains("LOADK"));
        assert!(text.contains("ADD"));
        assert!(text.contains("RET"));
        assert!(text.contains('2'));
    }

    #[test]
    fn test_disassemble_call_and_jump() {
        let mut atoms = AtomTable::new();
        let mut block = CodeBlock::new();
        block.append_call(Opcode::Call, InstArg::Str("hello".into()), 2);
        block.append(Opcode::Jump, InstArg::Int(-6));
        let code = block.encode(&mut atoms);

        let text = disassemble(&code, &atoms).unwrap();
        assert!(text.contains("CALL"));
        assert!(text.contains("\"hello\", 2"));
        assert!(text.contains("JUMP"));
        assert!(text.contains("-6"));
    }
}
