//! Bytecode interpreter
//!
//! Decode-dispatch loop over the current frame. Binary operators pop the
//! left operand first (the emitter pushes right, then left); jumps apply
//! their offset after the operand has been consumed, so the offsets the
//! emitter computed against instruction-end positions land exactly.

use std::rc::Rc;

use koala_bytecode::{ConstItem, Opcode};
use koala_types::TypeDesc;

use crate::object::CodeObject;
use crate::routine::Routine;
use crate::state::KoalaState;
use crate::value::Value;
use crate::{VmError, VmResult};

/// The interpreter; borrows the process state for module access
pub struct Interp<'a> {
    /// Process-wide module registry
    pub state: &'a KoalaState,
}

impl Interp<'_> {
    /// Run a routine until its frame chain is empty
    pub fn run(&self, routine: &mut Routine) -> VmResult<()> {
        while !routine.done() {
            self.step(routine)?;
        }
        Ok(())
    }

    /// Call a module function and collect its return values
    pub fn call(
        &self,
        module: &crate::object::ModuleRef,
        name: &str,
        args: Vec<Value>,
    ) -> VmResult<Vec<Value>> {
        let code = module.borrow().get_func(name)?;
        let argc = args.len();
        let mut routine = Routine::new();
        for arg in args.into_iter().rev() {
            routine.push(arg)?;
        }
        routine.push(Value::Module(module.clone()))?;
        match code.as_ref() {
            CodeObject::CFunc { func, .. } => {
                routine.pop()?; // receiver
                let mut call_args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    call_args.push(routine.pop()?);
                }
                return func(&call_args);
            }
            CodeObject::KFunc { .. } => {
                routine.push_frame(code, argc)?;
                self.run(&mut routine)?;
            }
        }
        Ok(std::mem::take(&mut routine.stack))
    }

    /// Execute one instruction of the current frame
    fn step(&self, routine: &mut Routine) -> VmResult<()> {
        let frame = routine.frame().ok_or(VmError::StackUnderflow)?;
        let code_rc = frame.code.clone();
        let pc = frame.pc;
        let CodeObject::KFunc {
            code,
            atoms,
            local_descs,
            proto,
            name: fname,
            ..
        } = code_rc.as_ref()
        else {
            return Err(VmError::Runtime("native frame in dispatch loop".into()));
        };

        let byte = *code
            .get(pc)
            .ok_or_else(|| VmError::Runtime(format!("pc {pc} out of bounds in '{fname}'")))?;
        let op = Opcode::from_u8(byte).ok_or(VmError::InvalidOpcode { byte, pc })?;
        let mut next = pc + 1;

        macro_rules! set_pc {
            ($value:expr) => {
                routine
                    .frame_mut()
                    .ok_or(VmError::StackUnderflow)?
                    .pc = $value;
            };
        }

        match op {
            Opcode::Halt => {
                routine.frames.clear();
                routine.stack.clear();
            }
            Opcode::LoadK => {
                let index = read_i32(code, &mut next)?;
                let value = self.constant(atoms, index)?;
                set_pc!(next);
                routine.push(value)?;
            }
            Opcode::LoadM => {
                let index = read_i32(code, &mut next)?;
                let path = self.constant_str(atoms, index)?;
                let module = self.state.load_module(&path)?;
                set_pc!(next);
                routine.push(Value::Module(module))?;
            }
            Opcode::GetM => {
                set_pc!(next);
                let value = routine.pop()?;
                let module = match value {
                    Value::Module(m) => m,
                    Value::Object { view, .. } => view.module.clone(),
                    other => {
                        return Err(type_error("GETM", pc, "module or object", &other));
                    }
                };
                routine.push(Value::Module(module))?;
            }
            Opcode::Load => {
                let slot = read_u16(code, &mut next)? as usize;
                set_pc!(next);
                let frame = routine.frame().ok_or(VmError::StackUnderflow)?;
                let value = frame
                    .locals
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| VmError::Runtime(format!("bad local slot {slot}")))?;
                routine.push(value)?;
            }
            Opcode::Store => {
                let slot = read_u16(code, &mut next)? as usize;
                set_pc!(next);
                let value = routine.pop()?;
                if let Some(Some(desc)) = local_descs.get(slot) {
                    if !value.matches(desc) {
                        return Err(type_error("STORE", pc, &desc.to_string(), &value));
                    }
                }
                let frame = routine.frame_mut().ok_or(VmError::StackUnderflow)?;
                if slot >= frame.locals.len() {
                    return Err(VmError::Runtime(format!("bad local slot {slot}")));
                }
                frame.locals[slot] = value;
            }
            Opcode::GetField => {
                let index = read_i32(code, &mut next)?;
                let name = self.constant_str(atoms, index)?;
                set_pc!(next);
                let receiver = routine.pop()?;
                let value = match receiver {
                    Value::Module(m) => m.borrow().get_var(&name)?,
                    Value::Object { obj, view } => {
                        let offset =
                            view.field_offset(&name)
                                .ok_or_else(|| VmError::MissingMember {
                                    owner: view.name.clone(),
                                    name: name.clone(),
                                })?;
                        obj.borrow().slots[offset].clone()
                    }
                    other => return Err(type_error("GETFIELD", pc, "module or object", &other)),
                };
                routine.push(value)?;
            }
            Opcode::SetField => {
                let index = read_i32(code, &mut next)?;
                let name = self.constant_str(atoms, index)?;
                set_pc!(next);
                let receiver = routine.pop()?;
                let value = routine.pop()?;
                match receiver {
                    Value::Module(m) => m.borrow_mut().set_var(&name, value)?,
                    Value::Object { obj, view } => {
                        let offset =
                            view.field_offset(&name)
                                .ok_or_else(|| VmError::MissingMember {
                                    owner: view.name.clone(),
                                    name: name.clone(),
                                })?;
                        obj.borrow_mut().slots[offset] = value;
                    }
                    other => return Err(type_error("SETFIELD", pc, "module or object", &other)),
                }
            }
            Opcode::Call => {
                let index = read_i32(code, &mut next)?;
                let argc = read_u16(code, &mut next)? as usize;
                let name = self.constant_str(atoms, index)?;
                set_pc!(next);
                let receiver = routine.pop()?;
                let (receiver, callee) = match receiver {
                    Value::Module(m) => {
                        let code = m.borrow().get_func(&name)?;
                        (Value::Module(m), code)
                    }
                    Value::Object { obj, view } => {
                        let (owner, code) =
                            view.resolve_method(&name)
                                .ok_or_else(|| VmError::MissingMember {
                                    owner: view.name.clone(),
                                    name: name.clone(),
                                })?;
                        // Shift the receiver to the owning layer.
                        (Value::Object { obj, view: owner }, code)
                    }
                    other => return Err(type_error("CALL", pc, "module or object", &other)),
                };
                self.invoke(routine, receiver, callee, argc)?;
            }
            Opcode::New => {
                let index = read_i32(code, &mut next)?;
                let argc = read_u16(code, &mut next)? as usize;
                let name = self.constant_str(atoms, index)?;
                set_pc!(next);
                let receiver = routine.pop()?;
                let Value::Module(m) = receiver else {
                    return Err(type_error("NEW", pc, "module", &receiver));
                };
                let class = m.borrow().get_class(&name)?;
                let instance = class.instantiate()?;
                let value = Value::Object {
                    obj: instance,
                    view: class.clone(),
                };
                match class.resolve_method("__init__") {
                    Some((owner, init)) => {
                        let receiver = match value {
                            Value::Object { obj, .. } => Value::Object { obj, view: owner },
                            other => other,
                        };
                        self.invoke(routine, receiver, init, argc)?;
                    }
                    None => {
                        if argc != 0 {
                            return Err(VmError::Runtime(format!(
                                "class '{name}' has no '__init__' but was called with {argc} argument(s)"
                            )));
                        }
                        routine.push(value)?;
                    }
                }
            }
            Opcode::Ret => {
                // A method __init__ leaves its receiver as the implicit
                // return despite a zero-return prototype.
                let is_ctor = fname == "__init__"
                    && matches!(
                        routine.frame().map(|f| &f.locals[0]),
                        Some(Value::Object { .. })
                    );
                let nret = if is_ctor { 1 } else { proto.returns.len() };
                routine.pop_frame(nret)?;
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                set_pc!(next);
                let lhs = routine.pop()?;
                let rhs = routine.pop()?;
                routine.push(arith(op, lhs, rhs, pc)?)?;
            }
            Opcode::Gt | Opcode::Ge | Opcode::Lt | Opcode::Le | Opcode::Eq | Opcode::Neq => {
                set_pc!(next);
                let lhs = routine.pop()?;
                let rhs = routine.pop()?;
                routine.push(Value::Bool(relational(op, &lhs, &rhs, pc)?))?;
            }
            Opcode::Jump => {
                let offset = read_i32(code, &mut next)?;
                set_pc!((next as i64 + offset as i64) as usize);
            }
            Opcode::JumpTrue | Opcode::JumpFalse => {
                let offset = read_i32(code, &mut next)?;
                let cond = routine.pop()?;
                let Value::Bool(b) = cond else {
                    return Err(type_error(op.name(), pc, "bool", &cond));
                };
                let taken = b == (op == Opcode::JumpTrue);
                if taken {
                    set_pc!((next as i64 + offset as i64) as usize);
                } else {
                    set_pc!(next);
                }
            }
            Opcode::Minus => {
                set_pc!(next);
                let value = routine.pop()?;
                let result = match value {
                    Value::Int(v) => Value::Int(v.wrapping_neg()),
                    Value::Float(v) => Value::Float(-v),
                    other => return Err(type_error("MINUS", pc, "int or float", &other)),
                };
                routine.push(result)?;
            }
            Opcode::Bnot => {
                set_pc!(next);
                let value = routine.pop()?;
                let Value::Int(v) = value else {
                    return Err(type_error("BNOT", pc, "int", &value));
                };
                routine.push(Value::Int(!v))?;
            }
            Opcode::Lnot => {
                set_pc!(next);
                let value = routine.pop()?;
                let Value::Bool(b) = value else {
                    return Err(type_error("LNOT", pc, "bool", &value));
                };
                routine.push(Value::Bool(!b))?;
            }
            Opcode::Super => {
                let depth = read_u16(code, &mut next)? as usize;
                set_pc!(next);
                let value = routine.pop()?;
                let Value::Object { obj, mut view } = value else {
                    return Err(type_error("SUPER", pc, "object", &value));
                };
                for _ in 0..depth {
                    view = view.super_.clone().ok_or_else(|| {
                        VmError::Runtime(format!("class '{}' has no base class", view.name))
                    })?;
                }
                routine.push(Value::Object { obj, view })?;
            }
        }
        Ok(())
    }

    /// Dispatch into a code object with the receiver already shifted
    fn invoke(
        &self,
        routine: &mut Routine,
        receiver: Value,
        callee: Rc<CodeObject>,
        argc: usize,
    ) -> VmResult<()> {
        match callee.as_ref() {
            CodeObject::CFunc { func, .. } => {
                let mut args = Vec::with_capacity(argc);
                for _ in 0..argc {
                    args.push(routine.pop()?);
                }
                for value in func(&args)? {
                    routine.push(value)?;
                }
                Ok(())
            }
            CodeObject::KFunc { .. } => {
                routine.push(receiver)?;
                routine.push_frame(callee, argc)
            }
        }
    }

    fn constant(&self, atoms: &koala_bytecode::AtomTable, index: i32) -> VmResult<Value> {
        if index < 0 {
            return Ok(Value::Nil);
        }
        match atoms.get_const(index) {
            Some(ConstItem::Int(v)) => Ok(Value::Int(*v)),
            Some(ConstItem::Float(v)) => Ok(Value::Float(*v)),
            Some(ConstItem::Bool(v)) => Ok(Value::Bool(*v)),
            Some(ConstItem::Str(sidx)) => atoms
                .get_string(*sidx)
                .map(|s| Value::Str(Rc::from(s)))
                .ok_or(VmError::BadConstant { index: *sidx }),
            None => Err(VmError::BadConstant { index }),
        }
    }

    fn constant_str(&self, atoms: &koala_bytecode::AtomTable, index: i32) -> VmResult<String> {
        match self.constant(atoms, index)? {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(VmError::Runtime(format!(
                "constant {index} is not a string: {other:?}"
            ))),
        }
    }
}

fn type_error(op: &'static str, pc: usize, expected: &str, found: &Value) -> VmError {
    VmError::TypeError {
        op,
        pc,
        message: format!("expected {expected}, found {}", found.type_name()),
    }
}

fn read_u16(code: &[u8], pos: &mut usize) -> VmResult<u16> {
    let bytes = code
        .get(*pos..*pos + 2)
        .ok_or_else(|| VmError::Runtime("truncated operand".into()))?;
    *pos += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_i32(code: &[u8], pos: &mut usize) -> VmResult<i32> {
    let bytes = code
        .get(*pos..*pos + 4)
        .ok_or_else(|| VmError::Runtime("truncated operand".into()))?;
    *pos += 4;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Arithmetic dispatch; integer ops wrap, division checks for zero
fn arith(op: Opcode, lhs: Value, rhs: Value, pc: usize) -> VmResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let v = match op {
                Opcode::Add => a.wrapping_add(b),
                Opcode::Sub => a.wrapping_sub(b),
                Opcode::Mul => a.wrapping_mul(b),
                Opcode::Div => {
                    if b == 0 {
                        return Err(VmError::DivisionByZero { pc });
                    }
                    a.wrapping_div(b)
                }
                Opcode::Mod => {
                    if b == 0 {
                        return Err(VmError::DivisionByZero { pc });
                    }
                    a.wrapping_rem(b)
                }
                _ => unreachable!(),
            };
            Ok(Value::Int(v))
        }
        (Value::Float(a), Value::Float(b)) => {
            let v = match op {
                Opcode::Add => a + b,
                Opcode::Sub => a - b,
                Opcode::Mul => a * b,
                Opcode::Div => a / b,
                Opcode::Mod => a % b,
                _ => unreachable!(),
            };
            Ok(Value::Float(v))
        }
        (Value::Str(a), Value::Str(b)) if op == Opcode::Add => {
            Ok(Value::Str(Rc::from(format!("{a}{b}"))))
        }
        (lhs, rhs) => Err(VmError::TypeError {
            op: op.name(),
            pc,
            message: format!(
                "invalid operands {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ),
        }),
    }
}

/// Relational dispatch; EQ/NEQ are structural, the orderings require
/// matching numeric or string operands
fn relational(op: Opcode, lhs: &Value, rhs: &Value, pc: usize) -> VmResult<bool> {
    if matches!(op, Opcode::Eq | Opcode::Neq) {
        let eq = lhs.eq_value(rhs);
        return Ok(if op == Opcode::Eq { eq } else { !eq });
    }
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return Err(VmError::TypeError {
            op: op.name(),
            pc,
            message: format!(
                "cannot order {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ),
        });
    };
    Ok(match op {
        Opcode::Gt => ordering.is_gt(),
        Opcode::Ge => ordering.is_ge(),
        Opcode::Lt => ordering.is_lt(),
        Opcode::Le => ordering.is_le(),
        _ => unreachable!(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_int_arithmetic() {
        let v = arith(Opcode::Add, Value::Int(i64::MAX), Value::Int(1), 0).unwrap();
        assert!(matches!(v, Value::Int(i64::MIN)));
        let v = arith(Opcode::Sub, Value::Int(i64::MIN), Value::Int(1), 0).unwrap();
        assert!(matches!(v, Value::Int(i64::MAX)));
    }

    #[test]
    fn test_division_by_zero() {
        assert!(matches!(
            arith(Opcode::Div, Value::Int(1), Value::Int(0), 7),
            Err(VmError::DivisionByZero { pc: 7 })
        ));
        assert!(matches!(
            arith(Opcode::Mod, Value::Int(1), Value::Int(0), 7),
            Err(VmError::DivisionByZero { pc: 7 })
        ));
    }

    #[test]
    fn test_string_concat() {
        let v = arith(
            Opcode::Add,
            Value::Str("foo".into()),
            Value::Str("bar".into()),
            0,
        )
        .unwrap();
        assert!(matches!(v, Value::Str(s) if &*s == "foobar"));
    }

    #[test]
    fn test_relational() {
        assert!(relational(Opcode::Gt, &Value::Int(2), &Value::Int(1), 0).unwrap());
        assert!(relational(Opcode::Le, &Value::Int(1), &Value::Int(1), 0).unwrap());
        assert!(relational(Opcode::Eq, &Value::Nil, &Value::Nil, 0).unwrap());
        assert!(relational(Opcode::Neq, &Value::Int(1), &Value::Str("1".into()), 0).unwrap());
        assert!(relational(Opcode::Gt, &Value::Int(1), &Value::Str("1".into()), 0).is_err());
    }
}
