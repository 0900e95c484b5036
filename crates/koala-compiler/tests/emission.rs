//! Emission-shape tests
//!
//! These pin the exact instruction sequences the emitter produces for
//! representative sources: operand order, jump offsets, and the
//! synthesized module initializer.

use koala_bytecode::{ConstItem, Image, Item, ItemKind, Opcode};
use koala_compiler::{compile_source, NoImports};

fn compile(src: &str) -> Image {
    let result = compile_source("demo", src, &NoImports);
    assert!(
        !result.diags.has_errors(),
        "compile errors: {:?}",
        result
            .diags
            .iter()
            .map(|d| d.message.clone())
            .collect::<Vec<_>>()
    );
    result.image.expect("image")
}

fn func_code(image: &Image, name: &str) -> Vec<u8> {
    for item in image.atoms.iter(ItemKind::Func) {
        if let Item::Func(f) = item {
            if image.atoms.get_string(f.name_idx) == Some(name) {
                if let Some(Item::Code(code)) = image.atoms.get(ItemKind::Code, f.code_idx as usize)
                {
                    return code.clone();
                }
            }
        }
    }
    panic!("no function '{name}' in image");
}

/// Decoded instruction: opcode plus raw operands
fn decode(code: &[u8]) -> Vec<(Opcode, Vec<i64>)> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < code.len() {
        let op = Opcode::from_u8(code[pos]).expect("valid opcode");
        pos += 1;
        let mut args = Vec::new();
        match op {
            Opcode::Load | Opcode::Store | Opcode::Super => {
                args.push(u16::from_le_bytes([code[pos], code[pos + 1]]) as i64);
                pos += 2;
            }
            Opcode::LoadK
            | Opcode::LoadM
            | Opcode::GetField
            | Opcode::SetField
            | Opcode::Jump
            | Opcode::JumpTrue
            | Opcode::JumpFalse => {
                args.push(i32::from_le_bytes(code[pos..pos + 4].try_into().unwrap()) as i64);
                pos += 4;
            }
            Opcode::Call | Opcode::New => {
                args.push(i32::from_le_bytes(code[pos..pos + 4].try_into().unwrap()) as i64);
                pos += 4;
                args.push(u16::from_le_bytes([code[pos], code[pos + 1]]) as i64);
                pos += 2;
            }
            _ => {}
        }
        out.push((op, args));
    }
    out
}

fn const_int(image: &Image, index: i64) -> i64 {
    match image.atoms.get_const(index as i32) {
        Some(ConstItem::Int(v)) => *v,
        other => panic!("constant {index} is not an int: {other:?}"),
    }
}

fn const_str(image: &Image, index: i64) -> String {
    match image.atoms.get_const(index as i32) {
        Some(ConstItem::Str(sidx)) => image.atoms.get_string(*sidx).unwrap().to_string(),
        other => panic!("constant {index} is not a string: {other:?}"),
    }
}

#[test]
fn module_initializer_shape() {
    // The initializer pushes the right operand first, then the left, the
    // operator, the module receiver, and the field store.
    let image = compile("var x int = 1 + 2");
    let code = func_code(&image, "__init__");
    let insts = decode(&code);

    let ops: Vec<Opcode> = insts.iter().map(|(op, _)| *op).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::LoadK,
            Opcode::LoadK,
            Opcode::Add,
            Opcode::Load,
            Opcode::SetField,
            Opcode::Ret,
        ]
    );
    assert_eq!(const_int(&image, insts[0].1[0]), 2);
    assert_eq!(const_int(&image, insts[1].1[0]), 1);
    assert_eq!(insts[3].1[0], 0);
    assert_eq!(const_str(&image, insts[4].1[0]), "x");
}

#[test]
fn if_else_jump_offsets() {
    let image = compile(
        "func Choose(a int, b int) int {\n  if (a > b) { return 1 } else { return 2 }\n}",
    );
    let code = func_code(&image, "Choose");
    let insts = decode(&code);

    let ops: Vec<Opcode> = insts.iter().map(|(op, _)| *op).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::Load,      // b (right operand first)
            Opcode::Load,      // a
            Opcode::Gt,
            Opcode::JumpFalse, // over then-branch and the end jump
            Opcode::LoadK,     // 1
            Opcode::Ret,
            Opcode::Jump,      // over the else branch
            Opcode::LoadK,     // 2
            Opcode::Ret,
        ]
    );
    assert_eq!(insts[0].1[0], 2); // slot of b
    assert_eq!(insts[1].1[0], 1); // slot of a
    // JUMP_FALSE lands just past the end jump: LOADK(5) + RET(1) + JUMP(5).
    assert_eq!(insts[3].1[0], 11);
    // The end jump skips the else branch: LOADK(5) + RET(1).
    assert_eq!(insts[6].1[0], 6);
}

#[test]
fn while_break_jump_arithmetic() {
    let image = compile("func F(x bool) int {\n  while (true) { if (x) { break } }\n  return 7\n}");
    let code = func_code(&image, "F");
    let insts = decode(&code);

    let ops: Vec<Opcode> = insts.iter().map(|(op, _)| *op).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::Jump,      // to the test
            Opcode::Load,      // x
            Opcode::JumpFalse, // over the break
            Opcode::Jump,      // break -> loop end
            Opcode::LoadK,     // true
            Opcode::JumpTrue,  // back to the body
            Opcode::LoadK,     // 7
            Opcode::Ret,
        ]
    );
    // Loop block layout in bytes:
    //   0 JUMP(5) | 5 LOAD(3) | 8 JUMP_FALSE(5) | 13 JUMP(5)=break
    //   18 LOADK(5) | 23 JUMP_TRUE(5) | total 28
    assert_eq!(insts[0].1[0], 13); // entry jump: 5 + 13 = 18, the test
    assert_eq!(insts[2].1[0], 5); // skip the break jump
    assert_eq!(insts[3].1[0], 10); // break: 28 - 18 lands past the loop
    assert_eq!(insts[5].1[0], -23); // back edge: 28 - 23 = body start 5
}

#[test]
fn call_arguments_reverse_order() {
    let image = compile(
        "func Sink(a int, b int, c int) { }\nfunc Caller() { Sink(10, 20, 30) }",
    );
    let code = func_code(&image, "Caller");
    let insts = decode(&code);

    let ops: Vec<Opcode> = insts.iter().map(|(op, _)| *op).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::LoadK, // 30 first: rightmost argument
            Opcode::LoadK, // 20
            Opcode::LoadK, // 10
            Opcode::Load,  // module receiver
            Opcode::Call,
            Opcode::Ret,
        ]
    );
    assert_eq!(const_int(&image, insts[0].1[0]), 30);
    assert_eq!(const_int(&image, insts[1].1[0]), 20);
    assert_eq!(const_int(&image, insts[2].1[0]), 10);
    assert_eq!(const_str(&image, insts[4].1[0]), "Sink");
    assert_eq!(insts[4].1[1], 3); // argc
}

#[test]
fn code_length_matches_byte_accounting() {
    let image = compile(
        "var total int = 5\nfunc Bump(n int) int {\n  total = total + n\n  return total\n}",
    );
    for name in ["__init__", "Bump"] {
        let code = func_code(&image, name);
        let decoded = decode(&code);
        let sum: usize = decoded
            .iter()
            .map(|(op, _)| 1 + op.arg_size() as usize)
            .sum();
        assert_eq!(sum, code.len(), "byte accounting of '{name}'");
    }
}

#[test]
fn varargs_arity_checking() {
    // (i, ...s): one int then any number of strings.
    let header = "func Log(level int, parts ...string) { }\n";

    let ok = compile_source(
        "demo",
        &format!("{header}func F() {{ Log(1, \"a\", \"b\") }}"),
        &NoImports,
    );
    assert!(!ok.diags.has_errors());

    let ok_no_varargs = compile_source(
        "demo",
        &format!("{header}func F() {{ Log(1) }}"),
        &NoImports,
    );
    assert!(!ok_no_varargs.diags.has_errors());

    let missing_required = compile_source(
        "demo",
        &format!("{header}func F() {{ Log() }}"),
        &NoImports,
    );
    assert!(missing_required.diags.has_errors());
}

#[test]
fn short_circuit_lowering_uses_jumps() {
    let image = compile("func Both(a bool, b bool) bool { return a && b }");
    let code = func_code(&image, "Both");
    let ops: Vec<Opcode> = decode(&code).iter().map(|(op, _)| *op).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::Load,      // a
            Opcode::JumpFalse, // skip b
            Opcode::Load,      // b
            Opcode::Jump,      // past the constant
            Opcode::LoadK,     // false
            Opcode::Ret,
        ]
    );
}

#[test]
fn do_while_emits_post_test() {
    let image = compile("func F(n int) int {\n  do { n = n - 1 } while (n > 0)\n  return n\n}");
    let code = func_code(&image, "F");
    let insts = decode(&code);
    // Post-test shape: no entry jump, the body comes first and the back
    // edge returns to offset 0.
    assert_ne!(insts[0].0, Opcode::Jump);
    let (back_idx, back) = insts
        .iter()
        .enumerate()
        .find(|(_, (op, _))| *op == Opcode::JumpTrue)
        .map(|(i, (_, args))| (i, args[0]))
        .expect("back edge");
    assert!(back < 0, "back edge must be negative, got {back}");
    // The jump returns exactly to the start of the block.
    let bytes_through: i64 = insts[..=back_idx]
        .iter()
        .map(|(op, _)| 1 + op.arg_size() as i64)
        .sum();
    assert_eq!(back, -bytes_through);
}

#[test]
fn compound_assign_desugars() {
    let image = compile("func F(n int) int {\n  n += 3\n  return n\n}");
    let code = func_code(&image, "F");
    let ops: Vec<Opcode> = decode(&code).iter().map(|(op, _)| *op).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::LoadK, // 3
            Opcode::Load,  // n
            Opcode::Add,
            Opcode::Store, // n
            Opcode::Load,  // return n
            Opcode::Ret,
        ]
    );
}

#[test]
fn diagnostics_for_invalid_programs() {
    let cases = [
        ("func F() { missing() }", "cannot find symbol"),
        ("func F() { break }", "'break' outside of a loop"),
        ("func F() { if (1) { } }", "condition must be bool"),
        ("func F() int { return }", "returns 1 value(s), found 0"),
        ("var x int = 1\nvar x int = 2", "duplicate symbol"),
        ("func F() { self }", "'self' used outside"),
        ("func F() { 3 = 4 }", "cannot assign to a literal"),
        ("var y string = 5", "cannot assign"),
    ];
    for (src, expected) in cases {
        let result = compile_source("demo", src, &NoImports);
        assert!(
            result
                .diags
                .iter()
                .any(|d| d.message.contains(expected)),
            "source {src:?}: expected message containing {expected:?}, got {:?}",
            result
                .diags
                .iter()
                .map(|d| d.message.clone())
                .collect::<Vec<_>>()
        );
    }
}

#[test]
fn unused_warnings() {
    let result = compile_source("demo", "var hidden int = 1", &NoImports);
    assert!(!result.diags.has_errors());
    assert!(result
        .diags
        .iter()
        .any(|d| d.message.contains("unused private symbol 'hidden'")));
}
