//! Koala VM core runtime
//!
//! This crate provides the runtime half of the pipeline:
//! - runtime values and the object model
//! - the process-wide module registry and KLC loader
//! - routines (evaluation stack + frame chain) and the interpreter
//! - the cooperative scheduler behind the `go` statement

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod interp;
pub mod object;
pub mod routine;
pub mod scheduler;
pub mod state;
pub mod value;

pub use interp::Interp;
pub use object::{ClassObject, ClassRef, CodeObject, Instance, ModuleObject, ModuleRef, NativeFn};
pub use routine::{Frame, Routine, STACK_SIZE};
pub use scheduler::Scheduler;
pub use state::KoalaState;
pub use value::Value;

use koala_bytecode::ImageError;

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Evaluation stack exceeded its bound
    #[error("stack overflow")]
    StackOverflow,

    /// Pop from an empty evaluation stack
    #[error("stack underflow")]
    StackUnderflow,

    /// Undecodable instruction byte
    #[error("invalid opcode {byte:#04x} at pc {pc}")]
    InvalidOpcode {
        /// Raw byte
        byte: u8,
        /// Program counter of the opcode
        pc: usize,
    },

    /// Operand type did not match the opcode's expectation
    #[error("type error at {op} (pc {pc}): {message}")]
    TypeError {
        /// Opcode name
        op: &'static str,
        /// Program counter of the opcode
        pc: usize,
        /// Details
        message: String,
    },

    /// Integer division or modulo by zero
    #[error("integer division by zero at pc {pc}")]
    DivisionByZero {
        /// Program counter of the opcode
        pc: usize,
    },

    /// Constant index out of range
    #[error("bad constant index {index}")]
    BadConstant {
        /// The offending index
        index: i32,
    },

    /// Named member lookup failed
    #[error("'{owner}' has no member '{name}'")]
    MissingMember {
        /// Module or class name
        owner: String,
        /// Looked-up member
        name: String,
    },

    /// Module not found on the search path
    #[error("cannot find module '{0}'")]
    ModuleNotFound(String),

    /// Image load failure
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Anything else
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
