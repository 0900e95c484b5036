//! End-to-end interpreter tests: compile Koala source, install the
//! image, and execute functions through the dispatch loop.

use koala_compiler::{compile_source, NoImports};
use koala_core::{Interp, KoalaState, Value, VmError};

fn install(state: &KoalaState, package: &str, src: &str) -> koala_core::ModuleRef {
    let result = compile_source(package, src, &NoImports);
    assert!(
        !result.diags.has_errors(),
        "compile errors: {:?}",
        result
            .diags
            .iter()
            .map(|d| d.message.clone())
            .collect::<Vec<_>>()
    );
    state.install_image(result.image.unwrap()).unwrap()
}

fn call(state: &KoalaState, module: &koala_core::ModuleRef, name: &str, args: Vec<Value>) -> Vec<Value> {
    Interp { state }.call(module, name, args).unwrap()
}

#[test]
fn arithmetic_function() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(&state, "demo", "func Add(a int, b int) int { return a + b }");
    let results = call(&state, &module, "Add", vec![Value::Int(2), Value::Int(3)]);
    assert!(matches!(results[..], [Value::Int(5)]));
}

#[test]
fn operand_order_of_sub_and_div() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "func Sub(a int, b int) int { return a - b }\nfunc Div(a int, b int) int { return a / b }",
    );
    let results = call(&state, &module, "Sub", vec![Value::Int(10), Value::Int(4)]);
    assert!(matches!(results[..], [Value::Int(6)]));
    let results = call(&state, &module, "Div", vec![Value::Int(9), Value::Int(2)]);
    assert!(matches!(results[..], [Value::Int(4)]));
}

#[test]
fn module_initializer_runs_at_install() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "var Counter int = 1 + 2\nfunc Get() int { return Counter }",
    );
    assert!(matches!(
        module.borrow().get_var("Counter").unwrap(),
        Value::Int(3)
    ));
    let results = call(&state, &module, "Get", Vec::new());
    assert!(matches!(results[..], [Value::Int(3)]));
}

#[test]
fn module_var_store_through_function() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "var Total int = 0\nfunc Bump(n int) int {\n  Total = Total + n\n  return Total\n}",
    );
    call(&state, &module, "Bump", vec![Value::Int(5)]);
    let results = call(&state, &module, "Bump", vec![Value::Int(7)]);
    assert!(matches!(results[..], [Value::Int(12)]));
}

#[test]
fn if_else_branches() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "func Max(a int, b int) int {\n  if (a > b) { return a } else { return b }\n}",
    );
    let results = call(&state, &module, "Max", vec![Value::Int(4), Value::Int(9)]);
    assert!(matches!(results[..], [Value::Int(9)]));
    let results = call(&state, &module, "Max", vec![Value::Int(12), Value::Int(9)]);
    assert!(matches!(results[..], [Value::Int(12)]));
}

#[test]
fn while_loop_sums() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "func Sum(n int) int {\n  var total int = 0\n  var i int = 1\n  while (i <= n) {\n    total = total + i\n    i = i + 1\n  }\n  return total\n}",
    );
    let results = call(&state, &module, "Sum", vec![Value::Int(10)]);
    assert!(matches!(results[..], [Value::Int(55)]));
}

#[test]
fn break_leaves_infinite_loop() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "func F(x bool) int {\n  while (true) { if (x) { break } }\n  return 7\n}",
    );
    let results = call(&state, &module, "F", vec![Value::Bool(true)]);
    assert!(matches!(results[..], [Value::Int(7)]));
}

#[test]
fn continue_skips_iterations() {
    let state = KoalaState::with_paths(Vec::new());
    // Sum of even numbers in 1..=10.
    let module = install(
        &state,
        "demo",
        "func Evens() int {\n  var total int = 0\n  var i int = 0\n  while (i < 10) {\n    i = i + 1\n    if (i % 2 == 1) { continue }\n    total = total + i\n  }\n  return total\n}",
    );
    let results = call(&state, &module, "Evens", Vec::new());
    assert!(matches!(results[..], [Value::Int(30)]));
}

#[test]
fn for_loop_with_step() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "func Count(n int) int {\n  var total int = 0\n  for (var i = 0; i < n; i = i + 1) {\n    total = total + 1\n  }\n  return total\n}",
    );
    let results = call(&state, &module, "Count", vec![Value::Int(6)]);
    assert!(matches!(results[..], [Value::Int(6)]));
}

#[test]
fn switch_selects_arm() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "func Name(n int) string {\n  switch (n) {\n  case 1: return \"one\"\n  case 2: return \"two\"\n  default: return \"many\"\n  }\n}",
    );
    let results = call(&state, &module, "Name", vec![Value::Int(2)]);
    assert!(matches!(&results[..], [Value::Str(s)] if &**s == "two"));
    let results = call(&state, &module, "Name", vec![Value::Int(5)]);
    assert!(matches!(&results[..], [Value::Str(s)] if &**s == "many"));
}

#[test]
fn multiple_returns() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "func MinMax(a int, b int) (int, int) {\n  if (a < b) { return a, b }\n  return b, a\n}",
    );
    let results = call(&state, &module, "MinMax", vec![Value::Int(9), Value::Int(3)]);
    assert!(matches!(results[..], [Value::Int(3), Value::Int(9)]));
}

#[test]
fn class_with_constructor_and_method() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "class Dog {\n  var Name string\n  func __init__(n string) { Name = n }\n  func Hello() string { return \"woof \" + Name }\n}\nfunc Make(n string) string {\n  var d Dog = Dog(n)\n  return d.Hello()\n}",
    );
    let results = call(&state, &module, "Make", vec![Value::Str("rex".into())]);
    assert!(matches!(&results[..], [Value::Str(s)] if &**s == "woof rex"));
}

#[test]
fn method_resolution_walks_super_chain() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "class Animal {\n  func Kind() string { return \"animal\" }\n}\nclass Dog extends Animal {\n}\nfunc F() string {\n  var d Dog = Dog()\n  return d.Kind()\n}",
    );
    let results = call(&state, &module, "F", Vec::new());
    assert!(matches!(&results[..], [Value::Str(s)] if &**s == "animal"));
}

#[test]
fn override_beats_inherited_method() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "class Animal {\n  func Kind() string { return \"animal\" }\n}\nclass Dog extends Animal {\n  func Kind() string { return \"dog\" }\n}\nfunc F() string {\n  var d Dog = Dog()\n  return d.Kind()\n}",
    );
    let results = call(&state, &module, "F", Vec::new());
    assert!(matches!(&results[..], [Value::Str(s)] if &**s == "dog"));
}

#[test]
fn super_call_reaches_base_method() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "class Animal {\n  func Kind() string { return \"animal\" }\n}\nclass Dog extends Animal {\n  func Kind() string { return \"dog\" }\n  func Parent() string { return super.Kind() }\n}\nfunc F() string {\n  var d Dog = Dog()\n  return d.Parent()\n}",
    );
    let results = call(&state, &module, "F", Vec::new());
    assert!(matches!(&results[..], [Value::Str(s)] if &**s == "animal"));
}

#[test]
fn inherited_field_shares_instance_slot() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "class Animal {\n  var Age int\n  func SetAge(n int) { Age = n }\n}\nclass Dog extends Animal {\n  func Twice() int { return Age + Age }\n}\nfunc F() int {\n  var d Dog = Dog()\n  d.SetAge(21)\n  return d.Twice()\n}",
    );
    let results = call(&state, &module, "F", Vec::new());
    assert!(matches!(results[..], [Value::Int(42)]));
}

#[test]
fn trait_method_mixes_in() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "trait Greeter {\n  func Greet() string { return \"hi\" }\n}\nclass Person with Greeter { }\nfunc F() string {\n  var p Person = Person()\n  return p.Greet()\n}",
    );
    let results = call(&state, &module, "F", Vec::new());
    assert!(matches!(&results[..], [Value::Str(s)] if &**s == "hi"));
}

#[test]
fn cross_module_import() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("demo")).unwrap();

    // Build and write the imported module first.
    let util = compile_source(
        "demo/util",
        "var Answer int = 42\nfunc Twice(n int) int { return n + n }",
        &NoImports,
    );
    assert!(!util.diags.has_errors());
    util.image
        .unwrap()
        .write_file(dir.path().join("demo/util.klc"))
        .unwrap();

    // The main module resolves the import at compile time from the same
    // directory and at run time through the state's search path.
    let resolver = koala_compiler::PathResolver::new(vec![dir.path().to_path_buf()]);
    let main = compile_source(
        "demo/app",
        "import \"demo/util\"\nfunc Use() int { return util.Twice(util.Answer) }",
        &resolver,
    );
    assert!(
        !main.diags.has_errors(),
        "{:?}",
        main.diags.iter().map(|d| d.message.clone()).collect::<Vec<_>>()
    );

    let state = KoalaState::with_paths(vec![dir.path().to_path_buf()]);
    let module = state.install_image(main.image.unwrap()).unwrap();
    let results = Interp { state: &state }
        .call(&module, "Use", Vec::new())
        .unwrap();
    assert!(matches!(results[..], [Value::Int(84)]));
}

#[test]
fn division_by_zero_aborts_routine() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(&state, "demo", "func Div(a int, b int) int { return a / b }");
    let err = Interp { state: &state }
        .call(&module, "Div", vec![Value::Int(1), Value::Int(0)])
        .unwrap_err();
    assert!(matches!(err, VmError::DivisionByZero { .. }));
}

#[test]
fn missing_method_is_reported() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(&state, "demo", "func F() int { return 1 }");
    let err = Interp { state: &state }
        .call(&module, "Nope", Vec::new())
        .unwrap_err();
    assert!(matches!(err, VmError::MissingMember { .. }));
}

#[test]
fn go_statement_runs_to_completion() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "var Done int = 0\nfunc work() { Done = 1 }\nfunc Main() int {\n  go work()\n  return Done\n}",
    );
    let results = call(&state, &module, "Main", Vec::new());
    // The cooperative reference scheduler runs a spawned routine to
    // completion before the spawner resumes.
    assert!(matches!(results[..], [Value::Int(1)]));
}

#[test]
fn recursion() {
    let state = KoalaState::with_paths(Vec::new());
    let module = install(
        &state,
        "demo",
        "func Fib(n int) int {\n  if (n < 2) { return n }\n  return Fib(n - 1) + Fib(n - 2)\n}",
    );
    let results = call(&state, &module, "Fib", vec![Value::Int(10)]);
    assert!(matches!(results[..], [Value::Int(55)]));
}
