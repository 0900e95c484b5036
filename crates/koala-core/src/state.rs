//! Process-wide VM state and the module loader
//!
//! `KoalaState` owns the registry of loaded modules and the image search
//! path. Loading deserializes a KLC file, rebuilds the module's runtime
//! tables (variable slots, functions, classes), registers the module, and
//! runs its `__init__` when present. Lookups by name at call time stay
//! lazy; super-class links are resolved at install, loading the owning
//! module recursively when the super lives elsewhere.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use koala_bytecode::atoms::{flags, ClassItem, TraitItem};
use koala_bytecode::{AtomTable, Image, Item, ItemKind};
use koala_types::{ProtoDesc, TypeDesc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::interp::Interp;
use crate::object::{
    ClassObject, ClassRef, CodeObject, FieldDef, ModuleObject, ModuleRef, NativeFn,
};
use crate::routine::Routine;
use crate::value::Value;
use crate::{VmError, VmResult};

/// Environment variable holding the colon-separated image search path
pub const PATH_ENV: &str = "KOALA_PATH";

/// Image file extension
pub const IMAGE_EXT: &str = "klc";

/// Process-wide module registry and loader
pub struct KoalaState {
    modules: RwLock<FxHashMap<String, ModuleRef>>,
    search: Vec<PathBuf>,
}

impl KoalaState {
    /// Create a state whose search path comes from `KOALA_PATH`
    pub fn new() -> Self {
        let search = std::env::var(PATH_ENV)
            .map(|value| {
                value
                    .split(':')
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            modules: RwLock::new(FxHashMap::default()),
            search,
        }
    }

    /// Create a state with an explicit search path
    pub fn with_paths(search: Vec<PathBuf>) -> Self {
        Self {
            modules: RwLock::new(FxHashMap::default()),
            search,
        }
    }

    /// The module registered under `path`, if loaded
    pub fn get_module(&self, path: &str) -> Option<ModuleRef> {
        self.modules.read().get(path).cloned()
    }

    /// Load a module by path, reusing the registry
    pub fn load_module(&self, path: &str) -> VmResult<ModuleRef> {
        if let Some(module) = self.get_module(path) {
            return Ok(module);
        }
        for dir in &self.search {
            let candidate = dir.join(format!("{path}.{IMAGE_EXT}"));
            if candidate.is_file() {
                let image = Image::read_file(&candidate)?;
                return self.install_image(image);
            }
        }
        Err(VmError::ModuleNotFound(path.to_string()))
    }

    /// Install an already deserialized image as a module
    ///
    /// The module is registered before class linking so import cycles
    /// terminate; `__init__` runs last.
    pub fn install_image(&self, image: Image) -> VmResult<ModuleRef> {
        let package = image.package.clone();
        let atoms = Rc::new(image.atoms);
        let module = Rc::new(RefCell::new(ModuleObject::new(package.clone(), atoms.clone())));
        self.modules.write().insert(package, module.clone());

        self.install_vars(&module, &atoms);
        self.install_funcs(&module, &atoms)?;
        self.install_classes(&module, &atoms)?;

        let init = module.borrow().funcs.get("__init__").cloned();
        if let Some(init) = init {
            let mut routine = Routine::new();
            routine.push(Value::Module(module.clone()))?;
            routine.push_frame(init, 0)?;
            Interp { state: self }.run(&mut routine)?;
        }
        Ok(module)
    }

    fn install_vars(&self, module: &ModuleRef, atoms: &Rc<AtomTable>) {
        let mut m = module.borrow_mut();
        for item in atoms.iter(ItemKind::Var) {
            if let Item::Var(v) = item {
                let name = atoms.get_string(v.name_idx).unwrap_or_default().to_string();
                let desc = atoms.type_to_desc(v.type_idx).unwrap_or_else(TypeDesc::any);
                let slot = m.slots.len();
                m.slots.push(Value::Nil);
                m.var_map.insert(name, slot);
                m.var_descs.push(desc);
            }
        }
    }

    fn install_funcs(&self, module: &ModuleRef, atoms: &Rc<AtomTable>) -> VmResult<()> {
        // Local variable records are grouped by their owning function.
        let mut func_locals: FxHashMap<i16, Vec<(i32, TypeDesc)>> = FxHashMap::default();
        for item in atoms.iter(ItemKind::LocVar) {
            if let Item::LocVar(l) = item {
                if l.flags == flags::LOCVAR_FUNC {
                    if let Some(desc) = atoms.type_to_desc(l.type_idx) {
                        func_locals.entry(l.owner_idx).or_default().push((l.pos, desc));
                    }
                }
            }
        }

        let mut m = module.borrow_mut();
        for (fidx, item) in atoms.iter(ItemKind::Func).enumerate() {
            let Item::Func(f) = item else { continue };
            let name = atoms.get_string(f.name_idx).unwrap_or_default().to_string();
            let proto = atoms
                .proto_to_desc(f.proto_idx)
                .ok_or(VmError::BadConstant {
                    index: f.proto_idx,
                })?;
            let Some(Item::Code(code)) = atoms.get(ItemKind::Code, f.code_idx as usize) else {
                return Err(VmError::BadConstant { index: f.code_idx });
            };
            let local_descs = local_desc_slots(
                func_locals.get(&(fidx as i16)),
                f.locvars as usize,
            );
            m.funcs.insert(
                name.clone(),
                Rc::new(CodeObject::KFunc {
                    name,
                    proto,
                    locvars: f.locvars as u16,
                    local_descs,
                    code: code.clone(),
                    atoms: atoms.clone(),
                }),
            );
        }
        Ok(())
    }

    fn install_classes(&self, module: &ModuleRef, atoms: &Rc<AtomTable>) -> VmResult<()> {
        // Classes may extend one another within the module, so they are
        // built on demand with memoization; cross-module supers load the
        // owning module recursively.
        let mut class_items: FxHashMap<String, ClassItem> = FxHashMap::default();
        let mut trait_items: FxHashMap<String, TraitItem> = FxHashMap::default();
        for item in atoms.iter(ItemKind::Class) {
            if let Item::Class(c) = item {
                if let Some(TypeDesc::UserDef { name, .. }) = atoms.type_to_desc(c.class_idx) {
                    class_items.insert(name, *c);
                }
            }
        }
        for item in atoms.iter(ItemKind::Trait) {
            if let Item::Trait(t) = item {
                if let Some(TypeDesc::UserDef { name, .. }) = atoms.type_to_desc(t.class_idx) {
                    trait_items.insert(name, *t);
                }
            }
        }

        let names: Vec<String> = class_items
            .keys()
            .chain(trait_items.keys())
            .cloned()
            .collect();
        for name in names {
            self.build_class(&name, module, atoms, &class_items, &trait_items)?;
        }
        Ok(())
    }

    fn resolve_type_to_class(
        &self,
        desc: &TypeDesc,
        module: &ModuleRef,
        atoms: &Rc<AtomTable>,
        class_items: &FxHashMap<String, ClassItem>,
        trait_items: &FxHashMap<String, TraitItem>,
    ) -> VmResult<ClassRef> {
        let TypeDesc::UserDef { path, name, .. } = desc else {
            return Err(VmError::Runtime(format!("'{desc}' is not a class type")));
        };
        if path.is_empty() || *path == module.borrow().name {
            self.build_class(name, module, atoms, class_items, trait_items)
        } else {
            let other = self.load_module(path)?;
            let class = other.borrow().get_class(name)?;
            Ok(class)
        }
    }

    fn build_class(
        &self,
        name: &str,
        module: &ModuleRef,
        atoms: &Rc<AtomTable>,
        class_items: &FxHashMap<String, ClassItem>,
        trait_items: &FxHashMap<String, TraitItem>,
    ) -> VmResult<ClassRef> {
        if let Some(existing) = module.borrow().classes.get(name) {
            return Ok(existing.clone());
        }

        let (class_idx, super_idx, traits_idx, is_trait) = match class_items.get(name) {
            Some(c) => (c.class_idx, c.super_idx, c.traits_idx, false),
            None => match trait_items.get(name) {
                Some(t) => (t.class_idx, -1, t.traits_idx, true),
                None => {
                    return Err(VmError::MissingMember {
                        owner: module.borrow().name.clone(),
                        name: name.to_string(),
                    })
                }
            },
        };

        let super_ = if super_idx >= 0 {
            let desc = atoms
                .type_to_desc(super_idx)
                .ok_or(VmError::BadConstant { index: super_idx })?;
            Some(self.resolve_type_to_class(&desc, module, atoms, class_items, trait_items)?)
        } else {
            None
        };

        let mut traits = Vec::new();
        for desc in atoms.typelist_to_descs(traits_idx).unwrap_or_default() {
            traits.push(self.resolve_type_to_class(
                &desc,
                module,
                atoms,
                class_items,
                trait_items,
            )?);
        }

        let mut fields = Vec::new();
        for item in atoms.iter(ItemKind::Field) {
            if let Item::Field(f) = item {
                if f.class_idx == class_idx {
                    fields.push(FieldDef {
                        name: atoms.get_string(f.name_idx).unwrap_or_default().to_string(),
                        desc: atoms.type_to_desc(f.type_idx).unwrap_or_else(TypeDesc::any),
                    });
                }
            }
        }

        let mut method_locals: FxHashMap<i16, Vec<(i32, TypeDesc)>> = FxHashMap::default();
        for item in atoms.iter(ItemKind::LocVar) {
            if let Item::LocVar(l) = item {
                if l.flags == flags::LOCVAR_METHOD {
                    if let Some(desc) = atoms.type_to_desc(l.type_idx) {
                        method_locals
                            .entry(l.owner_idx)
                            .or_default()
                            .push((l.pos, desc));
                    }
                }
            }
        }

        let mut methods = FxHashMap::default();
        for (midx, item) in atoms.iter(ItemKind::Method).enumerate() {
            let Item::Method(m) = item else { continue };
            if m.class_idx != class_idx {
                continue;
            }
            let mname = atoms.get_string(m.name_idx).unwrap_or_default().to_string();
            let proto = atoms
                .proto_to_desc(m.proto_idx)
                .ok_or(VmError::BadConstant { index: m.proto_idx })?;
            let Some(Item::Code(code)) = atoms.get(ItemKind::Code, m.code_idx as usize) else {
                return Err(VmError::BadConstant { index: m.code_idx });
            };
            let local_descs =
                local_desc_slots(method_locals.get(&(midx as i16)), m.locvars as usize);
            methods.insert(
                mname.clone(),
                Rc::new(CodeObject::KFunc {
                    name: mname,
                    proto,
                    locvars: m.locvars as u16,
                    local_descs,
                    code: code.clone(),
                    atoms: atoms.clone(),
                }),
            );
        }

        let class = Rc::new(ClassObject {
            name: name.to_string(),
            module: module.clone(),
            super_,
            traits,
            fields,
            methods,
            is_trait,
        });
        module
            .borrow_mut()
            .classes
            .insert(name.to_string(), class.clone());
        Ok(class)
    }

    /// Register a module made of native functions
    pub fn register_native_module(
        &self,
        path: &str,
        funcs: Vec<(&str, ProtoDesc, NativeFn)>,
    ) -> ModuleRef {
        let module = Rc::new(RefCell::new(ModuleObject::new(
            path,
            Rc::new(AtomTable::new()),
        )));
        {
            let mut m = module.borrow_mut();
            for (name, proto, func) in funcs {
                m.funcs.insert(
                    name.to_string(),
                    Rc::new(CodeObject::CFunc {
                        name: name.to_string(),
                        proto,
                        func,
                    }),
                );
            }
        }
        self.modules.write().insert(path.to_string(), module.clone());
        module
    }
}

impl Default for KoalaState {
    fn default() -> Self {
        Self::new()
    }
}

fn local_desc_slots(
    recs: Option<&Vec<(i32, TypeDesc)>>,
    locvars: usize,
) -> Vec<Option<TypeDesc>> {
    let mut slots = vec![None; locvars];
    if let Some(recs) = recs {
        for (pos, desc) in recs {
            if let Ok(idx) = usize::try_from(*pos) {
                if idx < slots.len() {
                    slots[idx] = Some(desc.clone());
                }
            }
        }
    }
    slots
}
