//! The interpreted backend: walks the encoded instruction stream one guest
//! instruction at a time.
//!
//! Fully portable and needs no load-time translation beyond the scan pass
//! that builds the byte-offset instruction-pointer table. The loop releases
//! its borrow of the instance around every syscall so host code can re-enter
//! the VM; the resumption index travels through the guest frame, exactly as
//! it does for a guest-to-guest call.

use std::sync::Arc;

use modtime_environ::{Opcode, OperandKind};

use crate::bridge::{self, CallContext, RETURN_SENTINEL};
use crate::error::CallError;
use crate::exec::{binop, branch_taken, unop, Fuel, OpStack};
use crate::instance::VmInstance;

enum Exit {
    Done(i32),
    Syscall(bridge::SyscallArgs),
}

pub(crate) fn run(ctx: &CallContext<'_>) -> Result<i32, CallError> {
    let (code, offsets, count, fuel_budget);
    let mut ps;
    {
        let inst = ctx.vm.borrow();
        code = inst.image().code().clone();
        offsets = inst.instruction_pointers().clone();
        count = inst.instruction_count();
        fuel_budget = inst.fuel;
        ps = inst.program_stack;
    }

    let mut stack = OpStack::new();
    let mut fuel = Fuel::new(fuel_budget);
    let mut pc: u32 = 0;

    loop {
        let exit = {
            let mut inst = ctx.vm.borrow_mut();
            step(
                &mut inst, &code, &offsets, count, &mut stack, &mut fuel, &mut pc, &mut ps,
            )?
        };
        match exit {
            Exit::Done(result) => return Ok(result),
            Exit::Syscall(args) => {
                let result = bridge::dispatch_syscall(ctx, &args)?;
                stack.push(result, pc)?;
                // Resume through the return index saved in the guest frame,
                // like any other call return.
                let ret = ctx.vm.borrow().memory.read_i32(ps);
                if ret < 0 || ret as u32 >= count {
                    return Err(CallError::BadTarget { target: ret, count });
                }
                pc = ret as u32;
            }
        }
    }
}

/// Executes instructions until the call completes or a syscall needs the
/// instance borrow released.
fn step(
    inst: &mut VmInstance,
    code: &Arc<[u8]>,
    offsets: &Arc<[u32]>,
    count: u32,
    stack: &mut OpStack,
    fuel: &mut Fuel,
    pc: &mut u32,
    ps: &mut u32,
) -> Result<Exit, CallError> {
    loop {
        if *pc >= count {
            return Err(CallError::BadTarget {
                target: *pc as i32,
                count,
            });
        }
        fuel.charge()?;

        let off = offsets[*pc as usize] as usize;
        let opcode = Opcode::from_u8(code[off]).expect("code stream validated at load");
        let operand = match opcode.operand() {
            OperandKind::None => 0,
            OperandKind::Byte => u32::from(code[off + 1]),
            OperandKind::Word => u32::from_le_bytes(code[off + 1..off + 5].try_into().unwrap()),
        };

        match opcode {
            Opcode::Undef | Opcode::Break => {
                return Err(CallError::IllegalInstruction { opcode, pc: *pc });
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
                inst.memory.write_i32(*ps, (*pc + 1) as i32);
                if target < 0 {
                    // Publish the stack pointer below the saved-return cell
                    // so a nested entry into this VM lands under our frame.
                    inst.program_stack = ps.wrapping_sub(4);
                    let args = bridge::marshal_syscall(&inst.memory, *ps, target);
                    return Ok(Exit::Syscall(args));
                }
                if target as u32 >= count {
                    return Err(CallError::BadTarget { target, count });
                }
                if inst.profiling {
                    let address = offsets[target as usize];
                    inst.symbols.attribute(address);
                }
                *pc = target as u32;
                continue;
            }
            Opcode::Jump => {
                let target = stack.pop(*pc)?;
                if target < 0 || target as u32 >= count {
                    return Err(CallError::BadTarget { target, count });
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
                stack.push(unop(opcode, v), *pc)?;
            }
            _ => {
                let b = stack.pop(*pc)?;
                let a = stack.pop(*pc)?;
                stack.push(binop(opcode, a, b, *pc)?, *pc)?;
            }
        }
        *pc += 1;
    }
}
