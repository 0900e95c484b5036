//! Cooperative routine scheduler
//!
//! Single-threaded FIFO: `go` enqueues a routine with one initial frame;
//! `run` drains the ready queue, executing each routine to completion.
//! Suspension points exist only between opcodes, and the reference
//! behavior runs every routine straight through, so draining in order
//! preserves program-order semantics within each routine.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::interp::Interp;
use crate::object::CodeObject;
use crate::routine::Routine;
use crate::state::KoalaState;
use crate::value::Value;
use crate::VmResult;

/// FIFO scheduler over ready routines
#[derive(Default)]
pub struct Scheduler {
    ready: VecDeque<Routine>,
}

impl Scheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a routine targeting `code` with `args` and `receiver`
    ///
    /// The entry frame is laid out exactly as a CALL would: arguments
    /// rightmost-first, receiver on top.
    pub fn go(
        &mut self,
        receiver: Value,
        code: Rc<CodeObject>,
        args: Vec<Value>,
    ) -> VmResult<()> {
        let argc = args.len();
        let mut routine = Routine::new();
        for arg in args.into_iter().rev() {
            routine.push(arg)?;
        }
        routine.push(receiver)?;
        routine.push_frame(code, argc)?;
        self.ready.push_back(routine);
        Ok(())
    }

    /// Enqueue an already prepared routine
    pub fn spawn(&mut self, routine: Routine) {
        self.ready.push_back(routine);
    }

    /// Number of routines waiting to run
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    /// Drain the ready queue, running each routine to completion
    pub fn run(&mut self, state: &KoalaState) -> VmResult<()> {
        let interp = Interp { state };
        while let Some(mut routine) = self.ready.pop_front() {
            interp.run(&mut routine)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koala_bytecode::{AtomTable, Opcode};
    use koala_types::ProtoDesc;

    fn ret_only() -> Rc<CodeObject> {
        Rc::new(CodeObject::KFunc {
            name: "noop".to_string(),
            proto: ProtoDesc::default(),
            locvars: 1,
            local_descs: Vec::new(),
            code: vec![Opcode::Ret.to_u8()],
            atoms: Rc::new(AtomTable::new()),
        })
    }

    #[test]
    fn test_fifo_drain() {
        let state = KoalaState::with_paths(Vec::new());
        let mut scheduler = Scheduler::new();
        for _ in 0..3 {
            scheduler.go(Value::Nil, ret_only(), Vec::new()).unwrap();
        }
        assert_eq!(scheduler.pending(), 3);
        scheduler.run(&state).unwrap();
        assert_eq!(scheduler.pending(), 0);
    }
}
