//! The compiled backend: a single ahead-of-time pass at load translates the
//! whole instruction stream into a dense table of decoded ops, and entry
//! calls dispatch straight over that table.
//!
//! Translation is one-to-one, so the resolved address of instruction `i` is
//! `i`; what the pass buys is that every operand is decoded, every static
//! branch target is validated, and `Call`'s return index is precomputed, so
//! none of that work remains on the execution path. This backend is also
//! where the version-2 jump-table whitelist is enforced: a computed `Jump`
//! may only land on an instruction the image explicitly listed, which is
//! what stops a hostile module from steering control flow into an arbitrary
//! mid-function index.
//!
//! Observable semantics are identical to the interpreter's; the two loops
//! share their ALU, comparison, and operand-stack implementations to keep it
//! that way.

use std::rc::Rc;
use std::sync::Arc;

use modtime_environ::{ImageError, InstructionStream, ModuleImage, Opcode};

use crate::bridge::{self, CallContext, RETURN_SENTINEL};
use crate::error::CallError;
use crate::exec::{binop, branch_taken, unop, Fuel, OpStack};
use crate::instance::{has_jump_table, BackendCode};

/// One translated instruction: opcode plus its fully-resolved operand
/// (branches carry their validated target, `Call` carries its return index).
#[derive(Copy, Clone)]
struct CompiledOp {
    op: Opcode,
    operand: u32,
}

/// The product of the load-time translation pass.
pub(crate) struct CompiledCode {
    /// One op per instruction, plus a trailing `Undef` trap so running off
    /// the end faults like any other illegal transfer.
    ops: Box<[CompiledOp]>,
    instruction_pointers: Arc<[u32]>,
    /// Sorted whitelist of computed-jump targets. `Some` exactly for v2
    /// images; a v2 image with an empty table permits no computed jumps.
    whitelist: Option<Box<[u32]>>,
    count: u32,
}

impl CompiledCode {
    pub(crate) fn instruction_pointers(&self) -> &Arc<[u32]> {
        &self.instruction_pointers
    }
}

/// Translates a validated image for the compiled backend.
pub(crate) fn translate(image: &ModuleImage) -> Result<CompiledCode, ImageError> {
    let count = image.header().instruction_count;
    let mut ops = Vec::with_capacity(count as usize + 1);

    for (index, inst) in InstructionStream::new(image.code()).enumerate() {
        let inst = inst?;
        let operand = if inst.opcode.is_branch() {
            if inst.operand >= count {
                return Err(ImageError::BadBranchTarget {
                    offset: inst.offset,
                    target: inst.operand,
                    count,
                });
            }
            inst.operand
        } else if inst.opcode == Opcode::Call {
            index as u32 + 1
        } else {
            inst.operand
        };
        ops.push(CompiledOp {
            op: inst.opcode,
            operand,
        });
    }
    if ops.len() != count as usize {
        return Err(ImageError::InstructionCountMismatch {
            declared: count,
            found: ops.len() as u32,
        });
    }
    ops.push(CompiledOp {
        op: Opcode::Undef,
        operand: 0,
    });

    let whitelist = if has_jump_table(image) {
        let mut targets = image.jump_targets().to_vec();
        targets.sort_unstable();
        targets.dedup();
        Some(targets.into_boxed_slice())
    } else {
        None
    };

    Ok(CompiledCode {
        ops: ops.into_boxed_slice(),
        instruction_pointers: (0..count).collect::<Vec<u32>>().into(),
        whitelist,
        count,
    })
}

enum Exit {
    Done(i32),
    Syscall(bridge::SyscallArgs),
}

pub(crate) fn run(ctx: &CallContext<'_>) -> Result<i32, CallError> {
    let (code, fuel_budget);
    let mut ps;
    {
        let inst = ctx.vm.borrow();
        code = match &inst.backend {
            BackendCode::Compiled(code) => Rc::clone(code),
            BackendCode::Interpreted => unreachable!("compiled run on interpreted instance"),
        };
        fuel_budget = inst.fuel;
        ps = inst.program_stack;
    }

    let mut stack = OpStack::new();
    let mut fuel = Fuel::new(fuel_budget);
    let mut pc: u32 = 0;

    loop {
        let exit = {
            let mut inst = ctx.vm.borrow_mut();
            step(&mut inst, &code, &mut stack, &mut fuel, &mut pc, &mut ps)?
        };
        match exit {
            Exit::Done(result) => return Ok(result),
            Exit::Syscall(args) => {
                let result = bridge::dispatch_syscall(ctx, &args)?;
                stack.push(result, pc)?;
                let ret = ctx.vm.borrow().memory.read_i32(ps);
                if ret < 0 || ret as u32 >= code.count {
                    return Err(CallError::BadTarget {
                        target: ret,
                        count: code.count,
                    });
                }
                pc = ret as u32;
            }
        }
    }
}

fn step(
    inst: &mut crate::instance::VmInstance,
    code: &CompiledCode,
    stack: &mut OpStack,
    fuel: &mut Fuel,
    pc: &mut u32,
    ps: &mut u32,
) -> Result<Exit, CallError> {
    let count = code.count;
    loop {
        fuel.charge()?;
        // `ops` has a trap op at index `count`, and every transfer below is
        // bounded by `count`, so this index never goes out of range.
        let CompiledOp { op, operand } = code.ops[*pc as usize];

        match op {
            Opcode::Undef | Opcode::Break => {
                return Err(CallError::IllegalInstruction { opcode: op, pc: *pc });
            }
            Opcode::Nop => {}

            Opcode::Enter => {
                *ps = ps
                    .checked_sub(operand)
                    .filter(|ps| *ps >= inst.stack_bottom)
                    .ok_or(CallError::StackOverflow {
                        ps: *ps,
                        bottom: inst.stack_bottom,
                    })?;
            }
            Opcode::Leave => {
                *ps = ps.wrapping_add(operand);
                let ret = inst.memory.read_i32(*ps);
                if ret == RETURN_SENTINEL {
                    return Ok(Exit::Done(stack.pop_result()));
                }
                if ret < 0 || ret as u32 >= count {
                    return Err(CallError::BadTarget { target: ret, count });
                }
                *pc = ret as u32;
                continue;
            }
            Opcode::Call => {
                let target = stack.pop(*pc)?;
                // The translated operand is this op's return index.
                inst.memory.write_i32(*ps, operand as i32);
                if target < 0 {
                    inst.program_stack = ps.wrapping_sub(4);
                    let args = bridge::marshal_syscall(&inst.memory, *ps, target);
                    return Ok(Exit::Syscall(args));
                }
                if target as u32 >= count {
                    return Err(CallError::BadTarget { target, count });
                }
                if inst.profiling {
                    inst.symbols.attribute(target as u32);
                }
                *pc = target as u32;
                continue;
            }
            Opcode::Jump => {
                let target = stack.pop(*pc)?;
                if target < 0 || target as u32 >= count {
                    return Err(CallError::BadTarget { target, count });
                }
                if let Some(whitelist) = &code.whitelist {
                    if whitelist.binary_search(&(target as u32)).is_err() {
                        return Err(CallError::JumpNotInTable {
                            target: target as u32,
                        });
                    }
                }
                *pc = target as u32;
                continue;
            }
            op if op.is_branch() => {
                let b = stack.pop(*pc)?;
                let a = stack.pop(*pc)?;
                if branch_taken(op, a, b) {
                    *pc = operand;
                    continue;
                }
            }

            Opcode::Push => stack.push(0, *pc)?,
            Opcode::Pop => {
                stack.pop(*pc)?;
            }
            Opcode::Const => stack.push(operand as i32, *pc)?,
            Opcode::Local => stack.push(ps.wrapping_add(operand) as i32, *pc)?,
            Opcode::Arg => {
                let value = stack.pop(*pc)?;
                inst.memory.write_i32(ps.wrapping_add(operand), value);
            }

            Opcode::Load8 => {
                let addr = stack.pop(*pc)? as u32;
                stack.push(i32::from(inst.memory.read_u8(addr)), *pc)?;
            }
            Opcode::Load16 => {
                let addr = stack.pop(*pc)? as u32;
                stack.push(i32::from(inst.memory.read_u16(addr)), *pc)?;
            }
            Opcode::Load32 => {
                let addr = stack.pop(*pc)? as u32;
                stack.push(inst.memory.read_i32(addr), *pc)?;
            }
            Opcode::Store8 => {
                let value = stack.pop(*pc)?;
                let addr = stack.pop(*pc)? as u32;
                inst.memory.write_u8(addr, value as u8);
            }
            Opcode::Store16 => {
                let value = stack.pop(*pc)?;
                let addr = stack.pop(*pc)? as u32;
                inst.memory.write_u16(addr, value as u16);
            }
            Opcode::Store32 => {
                let value = stack.pop(*pc)?;
                let addr = stack.pop(*pc)? as u32;
                inst.memory.write_i32(addr, value);
            }
            Opcode::Copy => {
                let src = stack.pop(*pc)? as u32;
                let dest = stack.pop(*pc)? as u32;
                inst.memory.block_copy(dest, src, operand)?;
            }

            Opcode::Sext8
            | Opcode::Sext16
            | Opcode::Neg
            | Opcode::Not
            | Opcode::FNeg
            | Opcode::I2F
            | Opcode::F2I => {
                let v = stack.pop(*pc)?;
                stack.push(unop(op, v), *pc)?;
            }
            _ => {
                let b = stack.pop(*pc)?;
                let a = stack.pop(*pc)?;
                stack.push(binop(op, a, b, *pc)?, *pc)?;
            }
        }
        *pc += 1;
    }
}
