//! Stack-machine interpreter for compiled guards, invariants and
//! statements.
//!
//! Programs operate on 64-bit integers. Running a program mutates the
//! integer-variable valuation and pushes clock constraints and clock
//! resets to the supplied containers as side effects; predicate programs
//! return `0` or `1`. The frame stack for local variables is per-instance
//! and never shared.

use crate::{ClockCmp, ClockConstraint, ClockId, ClockReset, IntVarId};

/// A bytecode instruction.
///
/// Jump offsets are relative to the next instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    /// Return the top of stack.
    Ret,
    /// Return the top of stack if it is zero, else continue.
    Retz,
    /// Fail unless the top of stack lies in `[lo, hi]`.
    FailNotIn(i64, i64),
    /// Unconditional relative jump.
    Jmp(i32),
    /// Relative jump when the popped top of stack is zero.
    Jmpz(i32),
    /// Push a constant.
    Push(i64),
    /// Push the value of an integer variable.
    Load(IntVarId),
    /// Pop a value into an integer variable.
    Store(IntVarId),
    /// Push the value of a frame local.
    LoadFrame(u32),
    /// Pop a value into a frame local.
    StoreFrame(u32),
    /// Pop a value initialising a frame local.
    InitFrame(u32),
    /// Push a frame of `n` locals.
    PushFrame(u32),
    /// Pop the innermost frame.
    PopFrame,
    /// Logical and (strict).
    Land,
    /// Logical or (strict).
    Lor,
    /// Logical not.
    Lnot,
    /// Arithmetic negation.
    Neg,
    /// Addition.
    Sum,
    /// Subtraction.
    Minus,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Mod,
    /// Equality test.
    Eq,
    /// Disequality test.
    Ne,
    /// Less-than test.
    Lt,
    /// Less-or-equal test.
    Le,
    /// Greater-than test.
    Gt,
    /// Greater-or-equal test.
    Ge,
    /// Pop `bound`, `y`, `x`; push the clock constraint `x - y cmp bound`
    /// and leave `1` on the stack.
    ClkConstr(ClockCmp),
    /// Pop `value`, `y`, `x`; push the clock reset `x := y + value`.
    ClkReset,
    /// No operation.
    Nop,
}

/// Runtime failures of the interpreter.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// An assigned value left the variable's declared bounds.
    #[error("value {value} outside declared bounds [{lo}, {hi}]")]
    OutOfBounds {
        /// Assigned value.
        value: i64,
        /// Declared minimum.
        lo: i64,
        /// Declared maximum.
        hi: i64,
    },
    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Integer overflow in an arithmetic instruction.
    #[error("arithmetic overflow")]
    Overflow,
    /// A program pushed a clock constraint where none is allowed
    /// (statements).
    #[error("clock constraint in a statement")]
    UnexpectedClockConstraint,
    /// A program pushed a clock reset where none is allowed
    /// (guards and invariants).
    #[error("clock reset in a guard or invariant")]
    UnexpectedClockReset,
    /// Access to an undeclared variable or frame local.
    #[error("access to undeclared variable {0}")]
    UndeclaredVariable(u32),
    /// A clock operand is not a valid clock id.
    #[error("invalid clock operand {0}")]
    InvalidClock(i64),
    /// Malformed bytecode (stack underflow, jump out of range, missing
    /// return).
    #[error("malformed bytecode")]
    Malformed,
}

/// Destination containers for the clock side effects of a run.
///
/// Guards and invariants accept constraints only; statements accept resets
/// only.
pub struct ClockSinks<'a> {
    /// Clock-constraint container, if constraints are allowed.
    pub constraints: Option<&'a mut Vec<ClockConstraint>>,
    /// Clock-reset container, if resets are allowed.
    pub resets: Option<&'a mut Vec<ClockReset>>,
}

/// The interpreter. Holds the evaluation and frame stacks, which are
/// reused across runs.
#[derive(Debug, Default)]
pub struct Vm {
    stack: Vec<i64>,
    frames: Vec<Vec<i64>>,
    clock_count: usize,
}

impl Vm {
    /// Interpreter for programs over `clock_count` clocks.
    pub fn new(clock_count: usize) -> Vm {
        Vm { stack: Vec::new(), frames: Vec::new(), clock_count }
    }

    /// Run a program.
    ///
    /// # Arguments
    /// * `code`: the program, which must end in a return.
    /// * `intvars`: the integer-variable valuation, mutated by stores.
    /// * `sinks`: clock-constraint/clock-reset containers.
    ///
    /// # Returns
    /// The value of the final return: `0` for predicate-false, non-zero
    /// (canonically `1`) for predicate-true.
    pub fn run(
        &mut self,
        code: &[Instr],
        intvars: &mut [i64],
        sinks: &mut ClockSinks<'_>,
    ) -> Result<i64, VmError> {
        debug_assert!(self.stack.is_empty() && self.frames.is_empty());
        let result = self.exec(code, intvars, sinks);
        self.stack.clear();
        self.frames.clear();
        result
    }

    fn exec(
        &mut self,
        code: &[Instr],
        intvars: &mut [i64],
        sinks: &mut ClockSinks<'_>,
    ) -> Result<i64, VmError> {
        let mut pc: usize = 0;
        loop {
            let instr = *code.get(pc).ok_or(VmError::Malformed)?;
            pc += 1;
            match instr {
                Instr::Ret => return self.pop(),
                Instr::Retz => {
                    let v = *self.stack.last().ok_or(VmError::Malformed)?;
                    if v == 0 {
                        return Ok(0);
                    }
                }
                Instr::FailNotIn(lo, hi) => {
                    let v = *self.stack.last().ok_or(VmError::Malformed)?;
                    if v < lo || v > hi {
                        return Err(VmError::OutOfBounds { value: v, lo, hi });
                    }
                }
                Instr::Jmp(offset) => {
                    pc = jump(pc, offset, code.len())?;
                }
                Instr::Jmpz(offset) => {
                    if self.pop()? == 0 {
                        pc = jump(pc, offset, code.len())?;
                    }
                }
                Instr::Push(v) => self.stack.push(v),
                Instr::Load(v) => {
                    let value = *intvars
                        .get(v as usize)
                        .ok_or(VmError::UndeclaredVariable(v))?;
                    self.stack.push(value);
                }
                Instr::Store(v) => {
                    let value = self.pop()?;
                    let slot = intvars
                        .get_mut(v as usize)
                        .ok_or(VmError::UndeclaredVariable(v))?;
                    *slot = value;
                }
                Instr::LoadFrame(v) => {
                    let frame = self.frames.last().ok_or(VmError::Malformed)?;
                    let value =
                        *frame.get(v as usize).ok_or(VmError::UndeclaredVariable(v))?;
                    self.stack.push(value);
                }
                Instr::StoreFrame(v) | Instr::InitFrame(v) => {
                    let value = self.pop()?;
                    let frame = self.frames.last_mut().ok_or(VmError::Malformed)?;
                    let slot =
                        frame.get_mut(v as usize).ok_or(VmError::UndeclaredVariable(v))?;
                    *slot = value;
                }
                Instr::PushFrame(n) => self.frames.push(vec![0; n as usize]),
                Instr::PopFrame => {
                    self.frames.pop().ok_or(VmError::Malformed)?;
                }
                Instr::Land => self.binop(|a, b| Ok(((a != 0) && (b != 0)) as i64))?,
                Instr::Lor => self.binop(|a, b| Ok(((a != 0) || (b != 0)) as i64))?,
                Instr::Lnot => {
                    let v = self.pop()?;
                    self.stack.push((v == 0) as i64);
                }
                Instr::Neg => {
                    let v = self.pop()?;
                    self.stack.push(v.checked_neg().ok_or(VmError::Overflow)?);
                }
                Instr::Sum => self.binop(|a, b| a.checked_add(b).ok_or(VmError::Overflow))?,
                Instr::Minus => self.binop(|a, b| a.checked_sub(b).ok_or(VmError::Overflow))?,
                Instr::Mul => self.binop(|a, b| a.checked_mul(b).ok_or(VmError::Overflow))?,
                Instr::Div => self.binop(|a, b| {
                    if b == 0 {
                        Err(VmError::DivisionByZero)
                    } else {
                        a.checked_div(b).ok_or(VmError::Overflow)
                    }
                })?,
                Instr::Mod => self.binop(|a, b| {
                    if b == 0 {
                        Err(VmError::DivisionByZero)
                    } else {
                        a.checked_rem(b).ok_or(VmError::Overflow)
                    }
                })?,
                Instr::Eq => self.binop(|a, b| Ok((a == b) as i64))?,
                Instr::Ne => self.binop(|a, b| Ok((a != b) as i64))?,
                Instr::Lt => self.binop(|a, b| Ok((a < b) as i64))?,
                Instr::Le => self.binop(|a, b| Ok((a <= b) as i64))?,
                Instr::Gt => self.binop(|a, b| Ok((a > b) as i64))?,
                Instr::Ge => self.binop(|a, b| Ok((a >= b) as i64))?,
                Instr::ClkConstr(cmp) => {
                    let bound = self.pop()?;
                    let y = self.clock_operand()?;
                    let x = self.clock_operand()?;
                    let value =
                        i32::try_from(bound).map_err(|_| VmError::Overflow)?;
                    match sinks.constraints.as_mut() {
                        Some(container) => {
                            container.push(ClockConstraint::new(x, y, cmp, value));
                        }
                        None => return Err(VmError::UnexpectedClockConstraint),
                    }
                    self.stack.push(1);
                }
                Instr::ClkReset => {
                    let value = self.pop()?;
                    let y = self.clock_operand()?;
                    let x = self.clock_operand()?;
                    let value =
                        i32::try_from(value).map_err(|_| VmError::Overflow)?;
                    match sinks.resets.as_mut() {
                        Some(container) => container.push(ClockReset { x, y, value }),
                        None => return Err(VmError::UnexpectedClockReset),
                    }
                }
                Instr::Nop => {}
            }
        }
    }

    fn pop(&mut self) -> Result<i64, VmError> {
        self.stack.pop().ok_or(VmError::Malformed)
    }

    fn binop(&mut self, f: impl FnOnce(i64, i64) -> Result<i64, VmError>) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.stack.push(f(a, b)?);
        Ok(())
    }

    fn clock_operand(&mut self) -> Result<ClockId, VmError> {
        let v = self.pop()?;
        if v < 0 || v as usize > self.clock_count {
            return Err(VmError::InvalidClock(v));
        }
        Ok(v as ClockId)
    }
}

fn jump(pc: usize, offset: i32, len: usize) -> Result<usize, VmError> {
    let target = pc as i64 + offset as i64;
    if target < 0 || target as usize > len {
        return Err(VmError::Malformed);
    }
    Ok(target as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{expr, stmt};

    fn run_guard(e: &expr::Expr, intvars: &mut [i64]) -> (Result<i64, VmError>, Vec<ClockConstraint>) {
        let code = e.compile_program().unwrap();
        let mut vm = Vm::new(4);
        let mut constraints = Vec::new();
        let mut sinks = ClockSinks { constraints: Some(&mut constraints), resets: None };
        let r = vm.run(&code, intvars, &mut sinks);
        (r, constraints)
    }

    #[test]
    fn integer_predicates_evaluate() {
        let e = expr::and(expr::le(expr::var(0), expr::int(5)), expr::lt(expr::int(1), expr::var(1)));
        let mut vals = [3, 2];
        assert_eq!(run_guard(&e, &mut vals).0, Ok(1));
        let mut vals = [3, 1];
        assert_eq!(run_guard(&e, &mut vals).0, Ok(0));
    }

    #[test]
    fn clock_atoms_push_constraints_and_hold() {
        let e = expr::and(expr::clock_le(1, 10), expr::clock_ge(2, 3));
        let (r, constraints) = run_guard(&e, &mut []);
        assert_eq!(r, Ok(1));
        assert_eq!(constraints.len(), 2);
        // x1 - 0 <= 10
        assert_eq!(constraints[0], ClockConstraint::new(1, 0, ClockCmp::Le, 10));
        // x2 >= 3 is 0 - x2 <= -3
        assert_eq!(constraints[1], ClockConstraint::new(0, 2, ClockCmp::Le, -3));
    }

    #[test]
    fn clock_equality_lowers_to_both_bounds() {
        let (r, constraints) = run_guard(&expr::clock_eq(1, 4), &mut []);
        assert_eq!(r, Ok(1));
        assert_eq!(
            constraints,
            vec![
                ClockConstraint::new(1, 0, ClockCmp::Le, 4),
                ClockConstraint::new(0, 1, ClockCmp::Le, -4),
            ]
        );
    }

    #[test]
    fn statement_updates_and_checks_bounds() {
        let s = stmt::seq(vec![
            stmt::assign(0, expr::add(expr::var(0), expr::int(1))),
            stmt::reset_clock(2, 0),
        ]);
        let code = s.compile_program(&[(0, 3)]).unwrap();
        let mut vm = Vm::new(4);
        let mut resets = Vec::new();
        let mut vals = [3i64];
        let mut sinks = ClockSinks { constraints: None, resets: Some(&mut resets) };
        // 3 + 1 = 4 violates the declared range [0, 3].
        assert_eq!(
            vm.run(&code, &mut vals, &mut sinks),
            Err(VmError::OutOfBounds { value: 4, lo: 0, hi: 3 })
        );

        let mut vals = [1i64];
        let mut resets = Vec::new();
        let mut sinks = ClockSinks { constraints: None, resets: Some(&mut resets) };
        assert_eq!(vm.run(&code, &mut vals, &mut sinks), Ok(1));
        assert_eq!(vals[0], 2);
        assert_eq!(resets, vec![ClockReset::to_value(2, 0)]);
    }

    #[test]
    fn guards_reject_resets_and_statements_reject_constraints() {
        let s = stmt::reset_clock(1, 0);
        let code = s.compile_program(&[]).unwrap();
        let mut vm = Vm::new(2);
        let mut constraints = Vec::new();
        let mut sinks = ClockSinks { constraints: Some(&mut constraints), resets: None };
        assert_eq!(vm.run(&code, &mut [], &mut sinks), Err(VmError::UnexpectedClockReset));

        let g = expr::clock_le(1, 5).compile_program().unwrap();
        let mut resets = Vec::new();
        let mut sinks = ClockSinks { constraints: None, resets: Some(&mut resets) };
        assert_eq!(vm.run(&g, &mut [], &mut sinks), Err(VmError::UnexpectedClockConstraint));
    }

    #[test]
    fn conditionals_branch_on_the_condition() {
        let s = stmt::if_else(
            expr::le(expr::var(0), expr::int(0)),
            stmt::assign(1, expr::int(10)),
            stmt::assign(1, expr::int(20)),
        );
        let code = s.compile_program(&[(0, 100), (0, 100)]).unwrap();
        let mut vm = Vm::new(1);
        let mut sinks = ClockSinks { constraints: None, resets: Some(&mut Vec::new()) };
        let mut vals = [0i64, 0];
        assert_eq!(vm.run(&code, &mut vals, &mut sinks), Ok(1));
        assert_eq!(vals[1], 10);
        let mut sinks = ClockSinks { constraints: None, resets: Some(&mut Vec::new()) };
        let mut vals = [1i64, 0];
        assert_eq!(vm.run(&code, &mut vals, &mut sinks), Ok(1));
        assert_eq!(vals[1], 20);
    }

    #[test]
    fn local_frames_are_scoped() {
        use crate::system::stmt::Stmt;
        let s = Stmt::WithLocals {
            inits: vec![expr::int(7)],
            body: Box::new(stmt::assign(0, expr::Expr::Local(0))),
        };
        let code = s.compile_program(&[(0, 100)]).unwrap();
        let mut vm = Vm::new(1);
        let mut sinks = ClockSinks { constraints: None, resets: Some(&mut Vec::new()) };
        let mut vals = [0i64];
        assert_eq!(vm.run(&code, &mut vals, &mut sinks), Ok(1));
        assert_eq!(vals[0], 7);
    }
}
