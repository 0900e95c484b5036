//! Bytecode opcodes for the Koala VM
//!
//! All opcodes are single-byte instructions. Some opcodes take operands
//! that follow the opcode byte in the bytecode stream; operand widths are
//! fixed per opcode and are part of the image format.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: halt, constants, module and local access, fields, calls
//! - 0x10-0x1F: arithmetic
//! - 0x20-0x2F: relational
//! - 0x30-0x3F: control flow
//! - 0x40-0x4F: unary

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Core (0x00-0x0F) =====
    /// Terminate execution
    Halt = 0x00,
    /// Push constant from pool (operand: u32 index)
    LoadK = 0x01,
    /// Load module by path constant and push it (operand: u32 index)
    LoadM = 0x02,
    /// Replace top-of-stack object by its owning module
    GetM = 0x03,
    /// Load local variable onto stack (operand: u16 index)
    Load = 0x04,
    /// Store top of stack to local variable (operand: u16 index)
    Store = 0x05,
    /// Load named field from popped receiver (operand: u32 name-constant)
    GetField = 0x06,
    /// Store value into named field of popped receiver (operand: u32 name-constant)
    SetField = 0x07,
    /// Call named function/method on popped receiver (operands: u32 name-constant, u16 argc)
    Call = 0x08,
    /// Allocate instance of named class from popped module (operands: u32 name-constant, u16 argc)
    New = 0x09,
    /// Return from the current frame
    Ret = 0x0A,
    /// Shift the receiver to a super-class layer (operand: u16 depth)
    Super = 0x0B,

    // ===== Arithmetic (0x10-0x1F) =====
    /// Pop rhs below lhs, push lhs + rhs
    Add = 0x10,
    /// Pop rhs below lhs, push lhs - rhs
    Sub = 0x11,
    /// Pop rhs below lhs, push lhs * rhs
    Mul = 0x12,
    /// Pop rhs below lhs, push lhs / rhs
    Div = 0x13,
    /// Pop rhs below lhs, push lhs % rhs
    Mod = 0x14,

    // ===== Relational (0x20-0x2F) =====
    /// Push lhs > rhs
    Gt = 0x20,
    /// Push lhs >= rhs
    Ge = 0x21,
    /// Push lhs < rhs
    Lt = 0x22,
    /// Push lhs <= rhs
    Le = 0x23,
    /// Push lhs == rhs
    Eq = 0x24,
    /// Push lhs != rhs
    Neq = 0x25,

    // ===== Control flow (0x30-0x3F) =====
    /// Unconditional relative jump (operand: i32 offset)
    Jump = 0x30,
    /// Pop condition; jump when true (operand: i32 offset)
    JumpTrue = 0x31,
    /// Pop condition; jump when false (operand: i32 offset)
    JumpFalse = 0x32,

    // ===== Unary (0x40-0x4F) =====
    /// Arithmetic negation of top of stack
    Minus = 0x40,
    /// Bitwise NOT of top of stack
    Bnot = 0x41,
    /// Logical NOT of top of stack
    Lnot = 0x42,
}

impl Opcode {
    /// Convert byte to opcode
    ///
    /// Returns None if the byte does not correspond to a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Halt),
            0x01 => Some(Self::LoadK),
            0x02 => Some(Self::LoadM),
            0x03 => Some(Self::GetM),
            0x04 => Some(Self::Load),
            0x05 => Some(Self::Store),
            0x06 => Some(Self::GetField),
            0x07 => Some(Self::SetField),
            0x08 => Some(Self::Call),
            0x09 => Some(Self::New),
            0x0A => Some(Self::Ret),
            0x0B => Some(Self::Super),
            0x10 => Some(Self::Add),
            0x11 => Some(Self::Sub),
            0x12 => Some(Self::Mul),
            0x13 => Some(Self::Div),
            0x14 => Some(Self::Mod),
            0x20 => Some(Self::Gt),
            0x21 => Some(Self::Ge),
            0x22 => Some(Self::Lt),
            0x23 => Some(Self::Le),
            0x24 => Some(Self::Eq),
            0x25 => Some(Self::Neq),
            0x30 => Some(Self::Jump),
            0x31 => Some(Self::JumpTrue),
            0x32 => Some(Self::JumpFalse),
            0x40 => Some(Self::Minus),
            0x41 => Some(Self::Bnot),
            0x42 => Some(Self::Lnot),
            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Operand width in bytes following the opcode byte
    pub fn arg_size(self) -> u32 {
        match self {
            Self::Halt
            | Self::GetM
            | Self::Ret
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::Gt
            | Self::Ge
            | Self::Lt
            | Self::Le
            | Self::Eq
            | Self::Neq
            | Self::Minus
            | Self::Bnot
            | Self::Lnot => 0,
            Self::Load | Self::Store | Self::Super => 2,
            Self::LoadK
            | Self::LoadM
            | Self::GetField
            | Self::SetField
            | Self::Jump
            | Self::JumpTrue
            | Self::JumpFalse => 4,
            // 4-byte name-constant index + 2-byte argc
            Self::Call | Self::New => 6,
        }
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Halt => "HALT",
            Self::LoadK => "LOADK",
            Self::LoadM => "LOADM",
            Self::GetM => "GETM",
            Self::Load => "LOAD",
            Self::Store => "STORE",
            Self::GetField => "GETFIELD",
            Self::SetField => "SETFIELD",
            Self::Call => "CALL",
            Self::New => "NEW",
            Self::Ret => "RET",
            Self::Super => "SUPER",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Eq => "EQ",
            Self::Neq => "NEQ",
            Self::Jump => "JUMP",
            Self::JumpTrue => "JUMP_TRUE",
            Self::JumpFalse => "JUMP_FALSE",
            Self::Minus => "MINUS",
            Self::Bnot => "BNOT",
            Self::Lnot => "LNOT",
        }
    }

    /// Check if this opcode is a jump instruction
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jump | Self::JumpTrue | Self::JumpFalse)
    }

    /// Check if this opcode ends a frame
    pub fn is_return(self) -> bool {
        matches!(self, Self::Ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        let opcodes = [
            Opcode::Halt,
            Opcode::LoadK,
            Opcode::LoadM,
            Opcode::GetM,
            Opcode::Load,
            Opcode::Store,
            Opcode::GetField,
            Opcode::SetField,
            Opcode::Call,
            Opcode::New,
            Opcode::Ret,
            Opcode::Super,
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mul,
            Opcode::Div,
            Opcode::Mod,
            Opcode::Gt,
            Opcode::Ge,
            Opcode::Lt,
            Opcode::Le,
            Opcode::Eq,
            Opcode::Neq,
            Opcode::Jump,
            Opcode::JumpTrue,
            Opcode::JumpFalse,
            Opcode::Minus,
            Opcode::Bnot,
            Opcode::Lnot,
        ];
        for opcode in &opcodes {
            let byte = opcode.to_u8();
            assert_eq!(Opcode::from_u8(byte), Some(*opcode));
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0x0C), None);
        assert_eq!(Opcode::from_u8(0x50), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_arg_sizes() {
        assert_eq!(Opcode::Halt.arg_size(), 0);
        assert_eq!(Opcode::LoadK.arg_size(), 4);
        assert_eq!(Opcode::Load.arg_size(), 2);
        assert_eq!(Opcode::Call.arg_size(), 6);
        assert_eq!(Opcode::New.arg_size(), 6);
        assert_eq!(Opcode::Jump.arg_size(), 4);
        assert_eq!(Opcode::Super.arg_size(), 2);
        assert_eq!(Opcode::Ret.arg_size(), 0);
    }

    #[test]
    fn test_jump_detection() {
        assert!(Opcode::Jump.is_jump());
        assert!(Opcode::JumpTrue.is_jump());
        assert!(Opcode::JumpFalse.is_jump());
        assert!(!Opcode::Call.is_jump());
        assert!(!Opcode::Ret.is_jump());
    }
}
