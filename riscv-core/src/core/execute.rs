//! Per-opcode execution bodies for the base ISA plus the M and A extensions.
//!
//! Grounded on the teacher's `core/execute.rs`: a combinator-style `Executor` whose public methods
//! each read operands, call a small private helper (`reg_imm_op`, `reg_reg_op`, `load_op`, ...),
//! and let the helper take care of writing `rd` and advancing `pc`.

use log::trace;

use crate::bus::Bus;
use crate::core::csr;
use crate::core::csr::CsrFile;
use crate::core::status::Status;
use crate::core::trap::{Exception, Trap};
use crate::core::Counters;
use crate::instruction::CsrOp;
use crate::memory::{AccessSize, MemoryError, MemoryPort};
use crate::registers::{Registers, Specifier};
use crate::xlen::Xlen;

pub type ExecutionResult<T = ()> = Result<T, Exception>;

/// Bundles every piece of core state a single instruction may touch.
#[derive(Debug)]
pub struct Executor<'a> {
    pub registers: &'a mut Registers,
    pub bus: &'a mut Bus,
    pub status: &'a mut Status,
    pub trap: &'a mut Trap,
    pub csr_file: &'a mut CsrFile,
    pub reservation: &'a mut Option<u64>,
    pub counters: &'a mut Counters,
    pub xlen: Xlen,
    /// Length in bytes of the instruction currently executing (2 for compressed, 4 otherwise),
    /// used by [`increment_pc`].
    pub instr_len: u64,
}

impl<'a> Executor<'a> {
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing addi {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add(imm as u64))
    }

    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing slti {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| ((s as i64) < imm) as u64)
    }

    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing sltiu {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| (s < (imm as u64)) as u64)
    }

    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing andi {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s & (imm as u64))
    }

    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing ori {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s | (imm as u64))
    }

    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing xori {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ (imm as u64))
    }

    pub fn addiw(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing addiw {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            (s as i32).wrapping_add(imm as i32) as i64 as u64
        })
    }

    pub fn slli(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        trace!("Executing slli {dest} {src} {shift_amount}");
        self.check_shamt(shift_amount)?;
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| s << shamt)
    }

    pub fn srli(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        trace!("Executing srli {dest} {src} {shift_amount}");
        self.check_shamt(shift_amount)?;
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| s >> shamt)
    }

    pub fn srai(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        trace!("Executing srai {dest} {src} {shift_amount}");
        self.check_shamt(shift_amount)?;
        let xlen = self.xlen;
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            (xlen.to_signed(s) >> shamt) as u64
        })
    }

    pub fn slliw(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        trace!("Executing slliw {dest} {src} {shift_amount}");
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            ((s as u32) << shamt) as i32 as i64 as u64
        })
    }

    pub fn srliw(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        trace!("Executing srliw {dest} {src} {shift_amount}");
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            ((s as u32) >> shamt) as i32 as i64 as u64
        })
    }

    pub fn sraiw(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult {
        trace!("Executing sraiw {dest} {src} {shift_amount}");
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            ((s as i32) >> shamt) as i64 as u64
        })
    }

    pub fn lui(&mut self, dest: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing lui {dest} {immediate}");
        let result = self.xlen.mask(immediate as u64);
        self.registers.set_x(dest, result);
        self.increment_pc();
        Ok(())
    }

    pub fn auipc(&mut self, dest: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing auipc {dest} {immediate}");
        let result = self
            .xlen
            .mask(self.registers.pc().wrapping_add(immediate as u64));
        self.registers.set_x(dest, result);
        self.increment_pc();
        Ok(())
    }

    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing add {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sub {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing slt {dest} {src1} {src2}");
        let xlen = self.xlen;
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            (xlen.to_signed(s1) < xlen.to_signed(s2)) as u64
        })
    }

    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sltu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 < s2) as u64)
    }

    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing and {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing or {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing xor {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sll {dest} {src1} {src2}");
        let mask = self.xlen.shift_mask() as u64;
        self.reg_reg_op(dest, src1, src2, move |s1, s2| s1 << (s2 & mask))
    }

    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing srl {dest} {src1} {src2}");
        let mask = self.xlen.shift_mask() as u64;
        self.reg_reg_op(dest, src1, src2, move |s1, s2| s1 >> (s2 & mask))
    }

    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sra {dest} {src1} {src2}");
        let xlen = self.xlen;
        let mask = xlen.shift_mask() as u64;
        self.reg_reg_op(dest, src1, src2, move |s1, s2| {
            (xlen.to_signed(s1) >> (s2 & mask)) as u64
        })
    }

    pub fn addw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing addw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            (s1 as i32).wrapping_add(s2 as i32) as i64 as u64
        })
    }

    pub fn subw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing subw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            (s1 as i32).wrapping_sub(s2 as i32) as i64 as u64
        })
    }

    pub fn sllw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sllw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u32) << (s2 & 0x1F)) as i32 as i64 as u64
        })
    }

    pub fn srlw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing srlw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as u32) >> (s2 & 0x1F)) as i32 as i64 as u64
        })
    }

    pub fn sraw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sraw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) >> (s2 & 0x1F)) as i64 as u64
        })
    }

    //
    // M extension.
    //

    pub fn mul(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mul {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_mul(s2))
    }

    pub fn mulh(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulh {dest} {src1} {src2}");
        let xlen = self.xlen;
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let bits = xlen.bits();
            let product = (xlen.to_signed(s1) as i128) * (xlen.to_signed(s2) as i128);
            (product >> bits) as u64
        })
    }

    pub fn mulhsu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulhsu {dest} {src1} {src2}");
        let xlen = self.xlen;
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let bits = xlen.bits();
            let product = (xlen.to_signed(s1) as i128) * (s2 as u128 as i128);
            (product >> bits) as u64
        })
    }

    pub fn mulhu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulhu {dest} {src1} {src2}");
        let xlen = self.xlen;
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let bits = xlen.bits();
            let product = (s1 as u128) * (s2 as u128);
            (product >> bits) as u64
        })
    }

    pub fn div(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing div {dest} {src1} {src2}");
        let xlen = self.xlen;
        self.reg_reg_op(dest, src1, src2, move |s1, s2| {
            let (s1, s2) = (xlen.to_signed(s1), xlen.to_signed(s2));
            if s2 == 0 {
                xlen.mask(u64::MAX)
            } else {
                xlen.mask(s1.overflowing_div(s2).0 as u64)
            }
        })
    }

    pub fn divu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing divu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            s1.checked_div(s2).unwrap_or(u64::MAX)
        })
    }

    pub fn rem(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing rem {dest} {src1} {src2}");
        let xlen = self.xlen;
        self.reg_reg_op(dest, src1, src2, move |s1, s2| {
            let (s1s, s2s) = (xlen.to_signed(s1), xlen.to_signed(s2));
            if s2s == 0 {
                s1
            } else {
                xlen.mask(s1s.overflowing_rem(s2s).0 as u64)
            }
        })
    }

    pub fn remu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing remu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.checked_rem(s2).unwrap_or(s1))
    }

    pub fn mulw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing mulw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            (s1 as i32).wrapping_mul(s2 as i32) as i64 as u64
        })
    }

    pub fn divw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing divw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let (s1, s2) = (s1 as i32, s2 as i32);
            if s2 == 0 {
                u64::MAX
            } else {
                s1.overflowing_div(s2).0 as i64 as u64
            }
        })
    }

    pub fn divuw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing divuw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let (s1, s2) = (s1 as u32, s2 as u32);
            s1.checked_div(s2).map(|v| v as i32 as i64 as u64).unwrap_or(u64::MAX)
        })
    }

    pub fn remw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing remw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let (s1, s2) = (s1 as i32, s2 as i32);
            if s2 == 0 {
                s1 as i64 as u64
            } else {
                s1.overflowing_rem(s2).0 as i64 as u64
            }
        })
    }

    pub fn remuw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing remuw {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let (s1, s2) = (s1 as u32, s2 as u32);
            s1.checked_rem(s2).unwrap_or(s1) as i32 as i64 as u64
        })
    }

    //
    // Control transfer.
    //

    pub fn jal(&mut self, dest: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing jal {dest} {offset}");
        self.jump_op(dest, |registers, xlen| {
            xlen.mask(registers.pc().wrapping_add(offset as u64))
        })
    }

    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing jalr {dest} {base} {offset}");
        self.jump_op(dest, move |registers, xlen| {
            xlen.mask(registers.x(base).wrapping_add(offset as u64) & !1)
        })
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing beq {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bne {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing blt {src1} {src2} {offset}");
        let xlen = self.xlen;
        self.cond_branch(src1, src2, offset, move |s1, s2| {
            xlen.to_signed(s1) < xlen.to_signed(s2)
        })
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bltu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 < s2)
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bge {src1} {src2} {offset}");
        let xlen = self.xlen;
        self.cond_branch(src1, src2, offset, move |s1, s2| {
            xlen.to_signed(s1) >= xlen.to_signed(s2)
        })
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bgeu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 >= s2)
    }

    //
    // Loads/stores.
    //

    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lb {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessSize::Byte, |v| v as i8 as i64 as u64)
    }

    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lbu {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessSize::Byte, |v| v as u64)
    }

    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lh {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessSize::Half, |v| v as i16 as i64 as u64)
    }

    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lhu {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessSize::Half, |v| v as u64)
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lw {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessSize::Word, |v| v as i32 as i64 as u64)
    }

    pub fn lwu(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lwu {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessSize::Word, |v| v as u64)
    }

    pub fn ld(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing ld {dest} {offset}({base})");
        let address = self.registers.x(base).wrapping_add(offset as u64);
        let value = self.bus.read_data64(address).map_err(|err| {
            self.trap.write_mtval(self.xlen, address, u64::MAX);
            to_load_exception(err)
        })?;
        self.counters.data_memory_reads += 1;
        self.registers.set_x(dest, value);
        self.counters.register_writes += 1;
        self.increment_pc();
        Ok(())
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing sb {src} {offset}({base})");
        self.store_op(src, base, offset, AccessSize::Byte)
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing sh {src} {offset}({base})");
        self.store_op(src, base, offset, AccessSize::Half)
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing sw {src} {offset}({base})");
        self.store_op(src, base, offset, AccessSize::Word)
    }

    pub fn sd(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing sd {src} {offset}({base})");
        let address = self.registers.x(base).wrapping_add(offset as u64);
        let value = self.registers.x(src);
        self.counters.register_reads += 1;
        self.bus.write_data64(address, value).map_err(|err| {
            self.trap.write_mtval(self.xlen, address, u64::MAX);
            to_store_exception(err)
        })?;
        self.counters.data_memory_writes += 1;
        self.increment_pc();
        Ok(())
    }

    //
    // A extension.
    //

    pub fn lr_w(&mut self, dest: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing lr.w {dest}, ({addr})");
        let address = self.registers.x(addr);
        let value = self.bus.read_data(address, AccessSize::Word).map_err(|err| {
            self.trap.write_mtval(self.xlen, address, u64::MAX);
            to_load_exception(err)
        })?;
        self.counters.data_memory_reads += 1;
        self.registers.set_x(dest, value as i32 as i64 as u64);
        self.counters.register_writes += 1;
        *self.reservation = Some(address);
        self.increment_pc();
        Ok(())
    }

    pub fn sc_w(&mut self, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        trace!("Executing sc.w {dest}, {src}, ({addr})");
        let address = self.registers.x(addr);
        if *self.reservation == Some(address) {
            let value = self.registers.x(src) as u32;
            self.counters.register_reads += 1;
            self.bus.write_data(address, value, AccessSize::Word).map_err(|err| {
                self.trap.write_mtval(self.xlen, address, u64::MAX);
                to_store_exception(err)
            })?;
            self.counters.data_memory_writes += 1;
            *self.reservation = None;
            self.registers.set_x(dest, 0);
        } else {
            self.registers.set_x(dest, 1);
        }
        self.counters.register_writes += 1;
        self.increment_pc();
        Ok(())
    }

    pub fn amo_w<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(i32, i32) -> i32,
    {
        let address = self.registers.x(addr);
        let src_value = self.registers.x(src) as u32;
        self.counters.register_reads += 1;
        let mem_value = self.bus.read_data(address, AccessSize::Word).map_err(|err| {
            self.trap.write_mtval(self.xlen, address, u64::MAX);
            to_load_exception(err)
        })?;
        self.counters.data_memory_reads += 1;
        let new_value = op(mem_value as i32, src_value as i32) as u32;
        self.bus.write_data(address, new_value, AccessSize::Word).map_err(|err| {
            self.trap.write_mtval(self.xlen, address, u64::MAX);
            to_store_exception(err)
        })?;
        self.counters.data_memory_writes += 1;
        self.registers.set_x(dest, mem_value as i32 as i64 as u64);
        self.counters.register_writes += 1;
        self.increment_pc();
        Ok(())
    }

    pub fn amo_wu<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let address = self.registers.x(addr);
        let src_value = self.registers.x(src) as u32;
        self.counters.register_reads += 1;
        let mem_value = self.bus.read_data(address, AccessSize::Word).map_err(|err| {
            self.trap.write_mtval(self.xlen, address, u64::MAX);
            to_load_exception(err)
        })?;
        self.counters.data_memory_reads += 1;
        let new_value = op(mem_value, src_value);
        self.bus.write_data(address, new_value, AccessSize::Word).map_err(|err| {
            self.trap.write_mtval(self.xlen, address, u64::MAX);
            to_store_exception(err)
        })?;
        self.counters.data_memory_writes += 1;
        self.registers.set_x(dest, mem_value as i32 as i64 as u64);
        self.counters.register_writes += 1;
        self.increment_pc();
        Ok(())
    }

    //
    // System/control.
    //

    pub fn fence(&mut self) -> ExecutionResult {
        trace!("Executing fence");
        self.increment_pc();
        Ok(())
    }

    pub fn ecall(&mut self) -> ExecutionResult {
        trace!("Executing ecall");
        self.trap.write_mtval(self.xlen, 0, u64::MAX);
        Err(Exception::CallFromMMode)
    }

    pub fn ebreak(&mut self) -> ExecutionResult {
        trace!("Executing ebreak");
        self.trap.write_mtval(self.xlen, self.registers.pc(), u64::MAX);
        Err(Exception::Break)
    }

    pub fn sret(&mut self) -> ExecutionResult {
        trace!("Executing sret");
        self.registers.set_pc(self.trap.sepc());
        Ok(())
    }

    pub fn mret(&mut self) -> ExecutionResult {
        trace!("Executing mret");
        self.status.set_mie(self.status.mpie());
        self.status.set_mpie(true);
        self.registers.set_pc(self.trap.mepc());
        Ok(())
    }

    pub fn wfi(&mut self) -> ExecutionResult {
        trace!("Executing wfi");
        self.increment_pc();
        Ok(())
    }

    pub fn sfence_vma(&mut self) -> ExecutionResult {
        trace!("Executing sfence.vma");
        self.increment_pc();
        Ok(())
    }

    pub fn csrrw(&mut self, dest: Specifier, csr: u16, src: Specifier) -> ExecutionResult {
        trace!("Executing csrrw {dest} {csr} {src}");
        self.csr_op(CsrOp::ReadWrite, dest, csr, Some(self.registers.x(src)))
    }

    pub fn csrrs(&mut self, dest: Specifier, csr: u16, src: Specifier) -> ExecutionResult {
        trace!("Executing csrrs {dest} {csr} {src}");
        let src_value = (src != Specifier::X0).then(|| self.registers.x(src));
        self.csr_op(CsrOp::ReadSet, dest, csr, src_value)
    }

    pub fn csrrc(&mut self, dest: Specifier, csr: u16, src: Specifier) -> ExecutionResult {
        trace!("Executing csrrc {dest} {csr} {src}");
        let src_value = (src != Specifier::X0).then(|| self.registers.x(src));
        self.csr_op(CsrOp::ReadClear, dest, csr, src_value)
    }

    pub fn csrrwi(&mut self, dest: Specifier, csr: u16, immediate: u32) -> ExecutionResult {
        trace!("Executing csrrwi {dest} {csr} {immediate}");
        self.csr_op(CsrOp::ReadWrite, dest, csr, Some(immediate as u64))
    }

    pub fn csrrsi(&mut self, dest: Specifier, csr: u16, immediate: u32) -> ExecutionResult {
        trace!("Executing csrrsi {dest} {csr} {immediate}");
        self.csr_op(
            CsrOp::ReadSet,
            dest,
            csr,
            (immediate != 0).then_some(immediate as u64),
        )
    }

    pub fn csrrci(&mut self, dest: Specifier, csr: u16, immediate: u32) -> ExecutionResult {
        trace!("Executing csrrci {dest} {csr} {immediate}");
        self.csr_op(
            CsrOp::ReadClear,
            dest,
            csr,
            (immediate != 0).then_some(immediate as u64),
        )
    }

    //
    // Private combinators.
    //

    fn reg_imm_op<F>(&mut self, dest: Specifier, src: Specifier, immediate: i64, op: F) -> ExecutionResult
    where
        F: FnOnce(u64, i64) -> u64,
    {
        self.counters.register_reads += 1;
        let result = self.xlen.mask(op(self.registers.x(src), immediate));
        self.registers.set_x(dest, result);
        self.counters.register_writes += 1;
        self.increment_pc();
        Ok(())
    }

    /// `SLLI`/`SRLI`/`SRAI` decode a 6-bit `shamt` regardless of XLEN (RV64 needs the extra bit);
    /// on RV32 a `shamt` of 32..=63 (bit 25 set) is not a valid shift and must trap.
    fn check_shamt(&self, shamt: u32) -> ExecutionResult {
        if shamt >= self.xlen.bits() {
            return Err(Exception::IllegalInstruction);
        }
        Ok(())
    }

    fn reg_shamt_op<F>(&mut self, dest: Specifier, src: Specifier, shamt: u32, op: F) -> ExecutionResult
    where
        F: FnOnce(u64, u32) -> u64,
    {
        self.counters.register_reads += 1;
        let result = self.xlen.mask(op(self.registers.x(src), shamt));
        self.registers.set_x(dest, result);
        self.counters.register_writes += 1;
        self.increment_pc();
        Ok(())
    }

    fn reg_reg_op<F>(&mut self, dest: Specifier, src1: Specifier, src2: Specifier, op: F) -> ExecutionResult
    where
        F: FnOnce(u64, u64) -> u64,
    {
        self.counters.register_reads += 2;
        let result = self.xlen.mask(op(self.registers.x(src1), self.registers.x(src2)));
        self.registers.set_x(dest, result);
        self.counters.register_writes += 1;
        self.increment_pc();
        Ok(())
    }

    /// RV32 enforces 4-byte target alignment (`IALIGN=4`); RV64 only clears bit 0 of the target and
    /// never traps on it, per the open question resolved in favor of the unprivileged spec's literal
    /// RV32 behavior.
    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&Registers, Xlen) -> u64,
    {
        let new_pc = compute_target(self.registers, self.xlen);
        if self.xlen == Xlen::Rv32 && new_pc & 0b11 != 0 {
            self.trap.write_mtval(self.xlen, new_pc, u64::MAX);
            return Err(Exception::InstructionMisalign);
        }
        let old_pc = self.registers.pc();
        let return_address = self.xlen.mask(old_pc.wrapping_add(self.instr_len));
        self.registers.set_pc(new_pc);
        self.registers.set_x(dest, return_address);
        self.counters.register_writes += 1;
        Ok(())
    }

    fn cond_branch<P>(&mut self, src1: Specifier, src2: Specifier, offset: i64, predicate: P) -> ExecutionResult
    where
        P: FnOnce(u64, u64) -> bool,
    {
        if predicate(self.registers.x(src1), self.registers.x(src2)) {
            let new_pc = self.xlen.mask(self.registers.pc().wrapping_add(offset as u64));
            self.registers.set_pc(new_pc);
        } else {
            self.increment_pc();
        }
        Ok(())
    }

    fn load_op<F>(
        &mut self,
        dest: Specifier,
        base: Specifier,
        offset: i64,
        size: AccessSize,
        extend: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32) -> u64,
    {
        let address = self.registers.x(base).wrapping_add(offset as u64);
        let value = self.bus.read_data(address, size).map_err(|err| {
            self.trap.write_mtval(self.xlen, address, u64::MAX);
            to_load_exception(err)
        })?;
        self.counters.data_memory_reads += 1;
        self.registers.set_x(dest, self.xlen.mask(extend(value)));
        self.counters.register_writes += 1;
        self.increment_pc();
        Ok(())
    }

    fn store_op(&mut self, src: Specifier, base: Specifier, offset: i64, size: AccessSize) -> ExecutionResult {
        let address = self.registers.x(base).wrapping_add(offset as u64);
        let value = self.registers.x(src) as u32;
        self.counters.register_reads += 1;
        self.bus.write_data(address, value, size).map_err(|err| {
            self.trap.write_mtval(self.xlen, address, u64::MAX);
            to_store_exception(err)
        })?;
        self.counters.data_memory_writes += 1;
        self.increment_pc();
        Ok(())
    }

    fn csr_op(&mut self, op: CsrOp, dest: Specifier, specifier: u16, src_value: Option<u64>) -> ExecutionResult {
        if op != CsrOp::ReadWrite || dest != Specifier::X0 {
            let old_value = self.read_csr(specifier);
            self.registers.set_x(dest, old_value);
            self.counters.register_writes += 1;
        }
        if let Some(src_value) = src_value {
            if csr::is_read_only(specifier) {
                return Err(Exception::IllegalInstruction);
            }
            let (value, mask) = match op {
                CsrOp::ReadWrite => (src_value, u64::MAX),
                CsrOp::ReadSet => (u64::MAX, src_value),
                CsrOp::ReadClear => (0, src_value),
            };
            self.write_csr(specifier, value, mask);
        }
        self.increment_pc();
        Ok(())
    }

    fn read_csr(&self, specifier: u16) -> u64 {
        match specifier {
            csr::MSTATUS => self.status.read(),
            csr::MISA => crate::core::MISA.get(self.xlen),
            csr::MTVEC => self.trap.mtvec(),
            csr::MSCRATCH => self.trap.mscratch(),
            csr::MEPC => self.trap.mepc(),
            csr::MCAUSE => self.trap.mcause(),
            csr::MTVAL => self.trap.mtval(),
            csr::MIP => self.trap.mip(),
            csr::MEDELEG => self.csr_file.read_medeleg(),
            csr::MIDELEG => self.csr_file.read_mideleg(),
            csr::MIE => self.csr_file.read_mie(),
            csr::MCOUNTEREN => self.csr_file.read_mcounteren(),
            csr::STVEC => self.trap.stvec(),
            csr::SSCRATCH => self.trap.sscratch(),
            csr::SEPC => self.trap.sepc(),
            csr::SCAUSE => self.trap.scause(),
            csr::STVAL => self.trap.stval(),
            csr::SIP => self.trap.sip(),
            csr::CYCLE | csr::MCYCLE | csr::TIME => self.counters.elapsed_ns,
            csr::CYCLEH | csr::TIMEH => self.counters.elapsed_ns >> 32,
            csr::INSTRET | csr::MINSTRET => self.counters.instructions_retired,
            csr::INSTRETH => self.counters.instructions_retired >> 32,
            csr::MCYCLEH => self.counters.elapsed_ns >> 32,
            csr::MINSTRETH => self.counters.instructions_retired >> 32,
            _ => 0,
        }
    }

    fn write_csr(&mut self, specifier: u16, value: u64, mask: u64) {
        let xlen = self.xlen;
        match specifier {
            csr::MSTATUS => self.status.write(value, mask),
            csr::MISA => {}
            csr::MTVEC => self.trap.write_mtvec(xlen, value, mask),
            csr::MSCRATCH => self.trap.write_mscratch(xlen, value, mask),
            csr::MEPC => self.trap.write_mepc(xlen, value, mask),
            csr::MCAUSE => self.trap.write_mcause(xlen, value, mask),
            csr::MTVAL => self.trap.write_mtval(xlen, value, mask),
            csr::MIP => self.trap.write_mip(xlen, value, mask),
            csr::MEDELEG => self.csr_file.write_medeleg(value),
            csr::MIDELEG => self.csr_file.write_mideleg(value),
            csr::MIE => self.csr_file.write_mie(value),
            csr::MCOUNTEREN => self.csr_file.write_mcounteren(value),
            csr::STVEC => self.trap.write_stvec(xlen, value, mask),
            csr::SSCRATCH => self.trap.write_sscratch(xlen, value, mask),
            csr::SEPC => self.trap.write_sepc(xlen, value, mask),
            csr::SCAUSE => self.trap.write_scause(xlen, value, mask),
            csr::STVAL => self.trap.write_stval(xlen, value, mask),
            csr::SIP => self.trap.write_sip(xlen, value, mask),
            _ => {}
        }
    }

    fn increment_pc(&mut self) {
        let pc = self.registers.pc();
        self.registers.set_pc(self.xlen.mask(pc.wrapping_add(self.instr_len)));
    }
}

fn to_load_exception(err: MemoryError) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::LoadAddrMisalign,
        MemoryError::AccessFault => Exception::LoadAccessFault,
    }
}

fn to_store_exception(err: MemoryError) -> Exception {
    match err {
        MemoryError::MisalignedAccess => Exception::StoreAddrMisalign,
        MemoryError::AccessFault => Exception::StoreAccessFault,
    }
}
