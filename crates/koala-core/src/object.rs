//! Runtime object model
//!
//! Modules, classes and instances as rebuilt from a loaded image. A class
//! owns its declared fields and methods; lookups walk the trait list and
//! the super chain at dispatch time, so inherited members are never
//! copied at runtime. Instance slot layout is the concatenation of base
//! sizes along the inheritance chain, super-most first.

use std::cell::RefCell;
use std::rc::Rc;

use koala_bytecode::AtomTable;
use koala_types::{ProtoDesc, TypeDesc};
use rustc_hash::FxHashMap;

use crate::value::Value;
use crate::{VmError, VmResult};

/// Shared module reference
pub type ModuleRef = Rc<RefCell<ModuleObject>>;
/// Shared class reference
pub type ClassRef = Rc<ClassObject>;
/// Shared instance reference
pub type InstanceRef = Rc<RefCell<Instance>>;

/// Native function signature for CFunc code objects
pub type NativeFn = fn(&[Value]) -> VmResult<Vec<Value>>;

/// A loaded module: variable slots plus function and class tables
pub struct ModuleObject {
    /// Module path, e.g. `demo/app`
    pub name: String,
    /// The image's atom table, shared with every KFunc of the module
    pub atoms: Rc<AtomTable>,
    /// Variable slots in declaration order
    pub slots: Vec<Value>,
    /// Variable name to slot index
    pub var_map: FxHashMap<String, usize>,
    /// Declared variable types, by slot
    pub var_descs: Vec<TypeDesc>,
    /// Module functions by name
    pub funcs: FxHashMap<String, Rc<CodeObject>>,
    /// Classes and traits by name
    pub classes: FxHashMap<String, ClassRef>,
}

impl ModuleObject {
    /// Create an empty module around an atom table
    pub fn new(name: impl Into<String>, atoms: Rc<AtomTable>) -> Self {
        Self {
            name: name.into(),
            atoms,
            slots: Vec::new(),
            var_map: FxHashMap::default(),
            var_descs: Vec::new(),
            funcs: FxHashMap::default(),
            classes: FxHashMap::default(),
        }
    }

    /// Read a module variable by name
    pub fn get_var(&self, name: &str) -> VmResult<Value> {
        let idx = self.var_map.get(name).ok_or_else(|| VmError::MissingMember {
            owner: self.name.clone(),
            name: name.to_string(),
        })?;
        Ok(self.slots[*idx].clone())
    }

    /// Write a module variable by name
    pub fn set_var(&mut self, name: &str, value: Value) -> VmResult<()> {
        let idx = *self.var_map.get(name).ok_or_else(|| VmError::MissingMember {
            owner: self.name.clone(),
            name: name.to_string(),
        })?;
        self.slots[idx] = value;
        Ok(())
    }

    /// Look up a function by name
    pub fn get_func(&self, name: &str) -> VmResult<Rc<CodeObject>> {
        self.funcs
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::MissingMember {
                owner: self.name.clone(),
                name: name.to_string(),
            })
    }

    /// Look up a class by name
    pub fn get_class(&self, name: &str) -> VmResult<ClassRef> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::MissingMember {
                owner: self.name.clone(),
                name: name.to_string(),
            })
    }
}

/// A declared field of a class
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Declared type
    pub desc: TypeDesc,
}

/// A loaded class or trait
pub struct ClassObject {
    /// Class name
    pub name: String,
    /// Owning module
    pub module: ModuleRef,
    /// Super class, already linked
    pub super_: Option<ClassRef>,
    /// Mixed-in traits in declaration order
    pub traits: Vec<ClassRef>,
    /// Own declared fields, in slot order
    pub fields: Vec<FieldDef>,
    /// Own concrete methods by name
    pub methods: FxHashMap<String, Rc<CodeObject>>,
    /// Whether this is a trait (cannot be instantiated)
    pub is_trait: bool,
}

impl ClassObject {
    /// Number of own field slots
    pub fn base_size(&self) -> usize {
        self.fields.len()
    }

    /// Total instance size: base sizes summed along the super chain
    pub fn total_size(&self) -> usize {
        self.base_size() + self.super_.as_ref().map_or(0, |s| s.total_size())
    }

    /// Slot offset of a named field; super fields come first
    pub fn field_offset(&self, name: &str) -> Option<usize> {
        let base = self.super_.as_ref().map_or(0, |s| s.total_size());
        if let Some(idx) = self.fields.iter().position(|f| f.name == name) {
            return Some(base + idx);
        }
        self.super_.as_ref().and_then(|s| s.field_offset(name))
    }

    /// Declared type of a named field, walking the chain
    pub fn field_desc(&self, name: &str) -> Option<&TypeDesc> {
        if let Some(field) = self.fields.iter().find(|f| f.name == name) {
            return Some(&field.desc);
        }
        self.super_.as_ref().and_then(|s| s.field_desc(name))
    }

    /// Resolve a method by name
    ///
    /// The search order is: own methods, mixed-in traits in order, then
    /// the super chain. Returns the owning class so the caller can shift
    /// the receiver's dispatch view. `__init__` is looked up in the own
    /// methods only, never inherited.
    pub fn resolve_method(
        self: &Rc<Self>,
        name: &str,
    ) -> Option<(ClassRef, Rc<CodeObject>)> {
        if name == "__init__" {
            return self
                .methods
                .get(name)
                .map(|code| (self.clone(), code.clone()));
        }
        if let Some(code) = self.methods.get(name) {
            return Some((self.clone(), code.clone()));
        }
        for tr in &self.traits {
            if let Some(found) = tr.resolve_method(name) {
                return Some(found);
            }
        }
        self.super_.as_ref().and_then(|s| s.resolve_method(name))
    }

    /// Allocate an instance of this class
    pub fn instantiate(self: &Rc<Self>) -> VmResult<InstanceRef> {
        if self.is_trait {
            return Err(VmError::Runtime(format!(
                "trait '{}' cannot be instantiated",
                self.name
            )));
        }
        Ok(Rc::new(RefCell::new(Instance {
            class: self.clone(),
            slots: vec![Value::Nil; self.total_size()],
        })))
    }
}

/// An allocated object
pub struct Instance {
    /// The instance's own class
    pub class: ClassRef,
    /// Field slots, super-most fields first
    pub slots: Vec<Value>,
}

/// Executable code attached to a function or method symbol
pub enum CodeObject {
    /// Native function with a prototype
    CFunc {
        /// Function name, for diagnostics
        name: String,
        /// Declared prototype
        proto: ProtoDesc,
        /// The native entry point
        func: NativeFn,
    },
    /// Compiled Koala function
    KFunc {
        /// Function name, for diagnostics
        name: String,
        /// Declared prototype
        proto: ProtoDesc,
        /// Frame size
        locvars: u16,
        /// Declared local variable types by slot, for STORE checking
        local_descs: Vec<Option<TypeDesc>>,
        /// Bytecode
        code: Vec<u8>,
        /// The owning image's atom table
        atoms: Rc<AtomTable>,
    },
}

impl CodeObject {
    /// The code's name for diagnostics
    pub fn name(&self) -> &str {
        match self {
            CodeObject::CFunc { name, .. } | CodeObject::KFunc { name, .. } => name,
        }
    }

    /// The declared prototype
    pub fn proto(&self) -> &ProtoDesc {
        match self {
            CodeObject::CFunc { proto, .. } | CodeObject::KFunc { proto, .. } => proto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_module() -> ModuleRef {
        Rc::new(RefCell::new(ModuleObject::new(
            "test",
            Rc::new(AtomTable::new()),
        )))
    }

    fn class(
        name: &str,
        module: &ModuleRef,
        super_: Option<ClassRef>,
        fields: &[&str],
    ) -> ClassRef {
        Rc::new(ClassObject {
            name: name.to_string(),
            module: module.clone(),
            super_,
            traits: Vec::new(),
            fields: fields
                .iter()
                .map(|f| FieldDef {
                    name: f.to_string(),
                    desc: TypeDesc::any(),
                })
                .collect(),
            methods: FxHashMap::default(),
            is_trait: false,
        })
    }

    #[test]
    fn test_instance_size_sums_chain() {
        let module = test_module();
        let base = class("A", &module, None, &["x", "y"]);
        let derived = class("B", &module, Some(base), &["z"]);
        assert_eq!(derived.total_size(), 3);
        let instance = derived.instantiate().unwrap();
        assert_eq!(instance.borrow().slots.len(), 3);
    }

    #[test]
    fn test_field_offsets_super_first() {
        let module = test_module();
        let base = class("A", &module, None, &["x", "y"]);
        let derived = class("B", &module, Some(base), &["z"]);
        assert_eq!(derived.field_offset("x"), Some(0));
        assert_eq!(derived.field_offset("y"), Some(1));
        assert_eq!(derived.field_offset("z"), Some(2));
        assert_eq!(derived.field_offset("w"), None);
    }
}
