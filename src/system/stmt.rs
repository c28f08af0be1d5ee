//! Statements executed on transitions: integer-variable updates and clock
//! resets, compiled to bytecode.

use crate::system::expr::Expr;
use crate::vm::Instr;
use crate::{ClockId, ConfigError, IntVarId, REFERENCE_CLOCK};

/// A statement tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stmt {
    /// Do nothing.
    Nop,
    /// Execute statements in order.
    Seq(Vec<Stmt>),
    /// Assign an integer variable; the value is checked against the
    /// variable's declared bounds at runtime.
    AssignInt(IntVarId, Expr),
    /// Assign a local variable of the innermost frame.
    AssignLocal(u32, Expr),
    /// Reset a clock to `y + value` (`y = None` resets to the value alone).
    ResetClock {
        /// Reset clock.
        x: ClockId,
        /// Source clock, if any.
        y: Option<ClockId>,
        /// Offset or value expression.
        value: Expr,
    },
    /// Conditional execution. The condition must be clock-free.
    If {
        /// Condition.
        cond: Expr,
        /// Branch taken when the condition is non-zero.
        then_branch: Box<Stmt>,
        /// Branch taken when the condition is zero.
        else_branch: Box<Stmt>,
    },
    /// Execute the body with a fresh frame of local variables, initialised
    /// in order.
    WithLocals {
        /// Initial values of the frame's locals.
        inits: Vec<Expr>,
        /// Body statement.
        body: Box<Stmt>,
    },
}

/// The empty statement.
pub fn nop() -> Stmt {
    Stmt::Nop
}

/// Sequential composition.
pub fn seq(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Seq(stmts)
}

/// Integer assignment `var := value`.
pub fn assign(var: IntVarId, value: Expr) -> Stmt {
    Stmt::AssignInt(var, value)
}

/// Clock reset `x := value`.
pub fn reset_clock(x: ClockId, value: i64) -> Stmt {
    Stmt::ResetClock { x, y: None, value: Expr::Const(value) }
}

/// Clock copy `x := y`.
pub fn copy_clock(x: ClockId, y: ClockId) -> Stmt {
    Stmt::ResetClock { x, y: Some(y), value: Expr::Const(0) }
}

/// Clock reset `x := y + value`.
pub fn shift_clock(x: ClockId, y: ClockId, value: i64) -> Stmt {
    Stmt::ResetClock { x, y: Some(y), value: Expr::Const(value) }
}

/// Conditional statement.
pub fn if_else(cond: Expr, then_branch: Stmt, else_branch: Stmt) -> Stmt {
    Stmt::If { cond, then_branch: Box::new(then_branch), else_branch: Box::new(else_branch) }
}

impl Stmt {
    /// Visit every clock reset of the statement.
    pub fn for_each_clock_reset(&self, f: &mut impl FnMut(ClockId, Option<ClockId>, &Expr)) {
        match self {
            Stmt::Nop | Stmt::AssignInt(..) | Stmt::AssignLocal(..) => {}
            Stmt::Seq(stmts) => {
                for s in stmts {
                    s.for_each_clock_reset(f);
                }
            }
            Stmt::ResetClock { x, y, value } => f(*x, *y, value),
            Stmt::If { then_branch, else_branch, .. } => {
                then_branch.for_each_clock_reset(f);
                else_branch.for_each_clock_reset(f);
            }
            Stmt::WithLocals { body, .. } => body.for_each_clock_reset(f),
        }
    }

    /// Compile to bytecode, appended to `code`. `bounds[v]` gives the
    /// declared `(min, max)` range of integer variable `v`, enforced on
    /// every assignment.
    pub(crate) fn compile(
        &self,
        bounds: &[(i64, i64)],
        code: &mut Vec<Instr>,
    ) -> Result<(), ConfigError> {
        match self {
            Stmt::Nop => {}
            Stmt::Seq(stmts) => {
                for s in stmts {
                    s.compile(bounds, code)?;
                }
            }
            Stmt::AssignInt(v, e) => {
                let (min, max) = *bounds.get(*v as usize).ok_or(ConfigError::InvalidId {
                    kind: "integer variable",
                    id: *v,
                })?;
                e.compile(code)?;
                code.push(Instr::FailNotIn(min, max));
                code.push(Instr::Store(*v));
            }
            Stmt::AssignLocal(v, e) => {
                e.compile(code)?;
                code.push(Instr::StoreFrame(*v));
            }
            Stmt::ResetClock { x, y, value } => {
                code.push(Instr::Push(*x as i64));
                code.push(Instr::Push(y.unwrap_or(REFERENCE_CLOCK) as i64));
                value.compile(code)?;
                code.push(Instr::ClkReset);
            }
            Stmt::If { cond, then_branch, else_branch } => {
                if cond.has_clock_atom() {
                    return Err(ConfigError::InvalidId { kind: "clock atom in condition", id: 0 });
                }
                cond.compile(code)?;
                let jmpz_at = code.len();
                code.push(Instr::Nop); // patched to Jmpz below
                then_branch.compile(bounds, code)?;
                let jmp_at = code.len();
                code.push(Instr::Nop); // patched to Jmp below
                let else_start = code.len();
                else_branch.compile(bounds, code)?;
                let end = code.len();
                code[jmpz_at] = Instr::Jmpz((else_start - jmpz_at - 1) as i32);
                code[jmp_at] = Instr::Jmp((end - jmp_at - 1) as i32);
            }
            Stmt::WithLocals { inits, body } => {
                code.push(Instr::PushFrame(inits.len() as u32));
                for (i, init) in inits.iter().enumerate() {
                    init.compile(code)?;
                    code.push(Instr::InitFrame(i as u32));
                }
                body.compile(bounds, code)?;
                code.push(Instr::PopFrame);
            }
        }
        Ok(())
    }

    /// Compile into a standalone program returning `1` on success.
    pub(crate) fn compile_program(&self, bounds: &[(i64, i64)]) -> Result<Vec<Instr>, ConfigError> {
        let mut code = Vec::new();
        self.compile(bounds, &mut code)?;
        code.push(Instr::Push(1));
        code.push(Instr::Ret);
        Ok(code)
    }
}
