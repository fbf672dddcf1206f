//! Pieces of the execution contract shared by both sandboxed backends.
//!
//! Arithmetic, comparison, and operand-stack behavior live here once so the
//! interpreter and the compiled backend cannot drift apart: the differential
//! property ("same image, same entry, same arguments, same result on either
//! backend") holds by construction for everything in this module.

use crate::error::CallError;
use modtime_environ::Opcode;

/// Fixed operand-stack depth. Deep expression chains in real modules stay
/// far below this; hitting it is a guest fault.
pub(crate) const OP_STACK_DEPTH: usize = 256;

/// The implicit operand stack. Lives on the host side; the guest can neither
/// address it nor overflow it into anything.
pub(crate) struct OpStack {
    slots: Vec<i32>,
}

impl OpStack {
    pub(crate) fn new() -> OpStack {
        OpStack {
            slots: Vec::with_capacity(OP_STACK_DEPTH),
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, value: i32, pc: u32) -> Result<(), CallError> {
        if self.slots.len() == OP_STACK_DEPTH {
            return Err(CallError::OperandStack { pc });
        }
        self.slots.push(value);
        Ok(())
    }

    #[inline]
    pub(crate) fn pop(&mut self, pc: u32) -> Result<i32, CallError> {
        self.slots.pop().ok_or(CallError::OperandStack { pc })
    }

    /// The call's result: whatever the guest left on top, or zero for a
    /// guest that returned nothing.
    #[inline]
    pub(crate) fn pop_result(&mut self) -> i32 {
        self.slots.pop().unwrap_or(0)
    }
}

#[inline]
fn f(bits: i32) -> f32 {
    f32::from_bits(bits as u32)
}

#[inline]
fn bits(value: f32) -> i32 {
    value.to_bits() as i32
}

/// Applies a one-operand ALU opcode.
#[inline]
pub(crate) fn unop(op: Opcode, v: i32) -> i32 {
    match op {
        Opcode::Sext8 => i32::from(v as i8),
        Opcode::Sext16 => i32::from(v as i16),
        Opcode::Neg => v.wrapping_neg(),
        Opcode::Not => !v,
        Opcode::FNeg => bits(-f(v)),
        Opcode::I2F => bits(v as f32),
        // Saturating truncation; NaN converts to zero. Deterministic on
        // every host, unlike the C cast this replaces.
        Opcode::F2I => f(v) as i32,
        _ => unreachable!("{op:?} is not a unary ALU op"),
    }
}

/// Applies a two-operand ALU opcode: `a` was pushed first (NOS), `b` second
/// (TOS).
#[inline]
pub(crate) fn binop(op: Opcode, a: i32, b: i32, pc: u32) -> Result<i32, CallError> {
    Ok(match op {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        Opcode::Div => {
            if b == 0 {
                return Err(CallError::DivideByZero { pc });
            }
            a.wrapping_div(b)
        }
        Opcode::DivU => {
            if b == 0 {
                return Err(CallError::DivideByZero { pc });
            }
            ((a as u32) / (b as u32)) as i32
        }
        Opcode::Rem => {
            if b == 0 {
                return Err(CallError::DivideByZero { pc });
            }
            a.wrapping_rem(b)
        }
        Opcode::RemU => {
            if b == 0 {
                return Err(CallError::DivideByZero { pc });
            }
            ((a as u32) % (b as u32)) as i32
        }
        Opcode::And => a & b,
        Opcode::Or => a | b,
        Opcode::Xor => a ^ b,
        Opcode::Shl => a.wrapping_shl(b as u32),
        Opcode::Shr => a.wrapping_shr(b as u32),
        Opcode::ShrU => ((a as u32).wrapping_shr(b as u32)) as i32,
        Opcode::FAdd => bits(f(a) + f(b)),
        Opcode::FSub => bits(f(a) - f(b)),
        Opcode::FMul => bits(f(a) * f(b)),
        Opcode::FDiv => bits(f(a) / f(b)),
        _ => unreachable!("{op:?} is not a binary ALU op"),
    })
}

/// Whether a conditional branch is taken: `a` was pushed first (NOS), `b`
/// second (TOS). Float comparisons follow IEEE semantics (NaN compares
/// false, `!=` true).
#[inline]
pub(crate) fn branch_taken(op: Opcode, a: i32, b: i32) -> bool {
    match op {
        Opcode::Beq => a == b,
        Opcode::Bne => a != b,
        Opcode::Blt => a < b,
        Opcode::Ble => a <= b,
        Opcode::Bgt => a > b,
        Opcode::Bge => a >= b,
        Opcode::Bltu => (a as u32) < (b as u32),
        Opcode::Bleu => (a as u32) <= (b as u32),
        Opcode::Bgtu => (a as u32) > (b as u32),
        Opcode::Bgeu => (a as u32) >= (b as u32),
        Opcode::Beqf => f(a) == f(b),
        Opcode::Bnef => f(a) != f(b),
        Opcode::Bltf => f(a) < f(b),
        Opcode::Blef => f(a) <= f(b),
        Opcode::Bgtf => f(a) > f(b),
        Opcode::Bgef => f(a) >= f(b),
        _ => unreachable!("{op:?} is not a branch"),
    }
}

/// Per-call fuel. `None` means unmetered.
pub(crate) struct Fuel {
    remaining: Option<u64>,
    budget: u64,
}

impl Fuel {
    pub(crate) fn new(budget: Option<u64>) -> Fuel {
        Fuel {
            remaining: budget,
            budget: budget.unwrap_or(0),
        }
    }

    /// Charges one instruction; errs when the budget is spent.
    #[inline]
    pub(crate) fn charge(&mut self) -> Result<(), CallError> {
        match &mut self.remaining {
            None => Ok(()),
            Some(n) => {
                if *n == 0 {
                    Err(CallError::FuelExhausted {
                        budget: self.budget,
                    })
                } else {
                    *n -= 1;
                    Ok(())
                }
            }
        }
    }
}
