//! Inheritance and trait-mixing tests over the analyzed symbol tables

use koala_compiler::state::INIT_NAME;
use koala_compiler::symbol::SymbolKind;
use koala_compiler::{analyze_source, compile_source, NoImports};

#[test]
fn subclass_copies_public_members() {
    let ps = analyze_source(
        "demo",
        "class A {\n  var N int\n  func Hello() string { return \"a\" }\n  func __init__() { }\n}\nclass B extends A { }",
        &NoImports,
    );
    assert!(
        !ps.diags.has_errors(),
        "{:?}",
        ps.diags.iter().map(|d| d.message.clone()).collect::<Vec<_>>()
    );

    let a_id = ps.arena.get(ps.module_table, "A").unwrap();
    let b_id = ps.arena.get(ps.module_table, "B").unwrap();
    let a_table = ps.arena.sym(a_id).table.unwrap();
    let b_table = ps.arena.sym(b_id).table.unwrap();

    // B links back to A.
    assert_eq!(ps.arena.sym(b_id).super_, Some(a_id));

    for name in ["N", "Hello"] {
        let copy = ps.arena.get(b_table, name).expect(name);
        let sym = ps.arena.sym(copy);
        assert!(sym.inherited, "'{name}' must be marked inherited");
        let orig = sym.super_.expect("super pointer");
        assert_eq!(orig, ps.arena.get(a_table, name).unwrap());
        assert_eq!(sym.index, ps.arena.sym(orig).index);
    }

    // __init__ is never copied.
    assert!(ps.arena.get(a_table, INIT_NAME).is_some());
    assert!(ps.arena.get(b_table, INIT_NAME).is_none());
}

#[test]
fn private_members_are_not_copied() {
    let ps = analyze_source(
        "demo",
        "class A {\n  var hidden int\n  var Shown int\n}\nclass B extends A { }",
        &NoImports,
    );
    let b_id = ps.arena.get(ps.module_table, "B").unwrap();
    let b_table = ps.arena.sym(b_id).table.unwrap();
    assert!(ps.arena.get(b_table, "hidden").is_none());
    assert!(ps.arena.get(b_table, "Shown").is_some());
}

#[test]
fn declared_members_shadow_inherited() {
    let ps = analyze_source(
        "demo",
        "class A {\n  func Speak() string { return \"a\" }\n}\nclass B extends A {\n  func Speak() string { return \"b\" }\n}",
        &NoImports,
    );
    assert!(!ps.diags.has_errors());
    let b_id = ps.arena.get(ps.module_table, "B").unwrap();
    let b_table = ps.arena.sym(b_id).table.unwrap();
    let speak = ps.arena.get(b_table, "Speak").unwrap();
    assert!(!ps.arena.sym(speak).inherited);
}

#[test]
fn grandparent_members_flow_through() {
    // The chain is walked through already-linked tables, so members of A
    // surface in C via B's copies.
    let ps = analyze_source(
        "demo",
        "class C extends B { }\nclass B extends A { }\nclass A {\n  func Root() int { return 1 }\n}",
        &NoImports,
    );
    assert!(!ps.diags.has_errors());
    let c_id = ps.arena.get(ps.module_table, "C").unwrap();
    let c_table = ps.arena.sym(c_id).table.unwrap();
    assert!(ps.arena.get(c_table, "Root").is_some());
}

#[test]
fn traits_mix_in_order_earlier_wins() {
    let ps = analyze_source(
        "demo",
        "trait Walker {\n  func Move() string { return \"walk\" }\n}\ntrait Swimmer {\n  func Move() string { return \"swim\" }\n  func Dive() int\n}\nclass Duck with Walker, Swimmer { }",
        &NoImports,
    );
    assert!(
        !ps.diags.has_errors(),
        "{:?}",
        ps.diags.iter().map(|d| d.message.clone()).collect::<Vec<_>>()
    );

    let duck = ps.arena.get(ps.module_table, "Duck").unwrap();
    let table = ps.arena.sym(duck).table.unwrap();

    // Walker contributes Move; Swimmer's Move does not shadow it.
    let move_id = ps.arena.get(table, "Move").unwrap();
    let walker = ps.arena.get(ps.module_table, "Walker").unwrap();
    let walker_table = ps.arena.sym(walker).table.unwrap();
    assert_eq!(
        ps.arena.sym(move_id).super_,
        Some(ps.arena.get(walker_table, "Move").unwrap())
    );

    // Swimmer's abstract prototype is carried over.
    let dive = ps.arena.get(table, "Dive").unwrap();
    assert_eq!(ps.arena.sym(dive).kind, SymbolKind::IProto);
}

#[test]
fn duplicate_trait_is_an_error() {
    let result = compile_source(
        "demo",
        "trait Walker {\n  func Move() int\n}\nclass Duck with Walker, Walker { }",
        &NoImports,
    );
    assert!(result
        .diags
        .iter()
        .any(|d| d.message.contains("duplicate trait")));
}

#[test]
fn inheritance_cycle_is_an_error() {
    let result = compile_source(
        "demo",
        "class A extends B { }\nclass B extends A { }",
        &NoImports,
    );
    assert!(result
        .diags
        .iter()
        .any(|d| d.message.contains("inheritance cycle")));
}

#[test]
fn subtype_assignable_to_supertype_slot() {
    let ok = compile_source(
        "demo",
        "class Animal { }\nclass Dog extends Animal { }\nfunc F() {\n  var a Animal = Dog()\n  a = a\n}",
        &NoImports,
    );
    assert!(
        !ok.diags.has_errors(),
        "{:?}",
        ok.diags.iter().map(|d| d.message.clone()).collect::<Vec<_>>()
    );

    let bad = compile_source(
        "demo",
        "class Animal { }\nclass Dog extends Animal { }\nfunc F() {\n  var d Dog = Animal()\n  d = d\n}",
        &NoImports,
    );
    assert!(bad.diags.has_errors());
}

#[test]
fn extending_a_non_class_is_an_error() {
    let result = compile_source(
        "demo",
        "trait Walker {\n  func Move() int\n}\nclass Duck extends Walker { }",
        &NoImports,
    );
    assert!(result
        .diags
        .iter()
        .any(|d| d.message.contains("is not a class")));
}
