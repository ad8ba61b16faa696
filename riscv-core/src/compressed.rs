//! Decoder and translation layer for the 16-bit compressed (`C`) instruction formats.
//!
//! The teacher's decoder has no `C` extension to draw from, so this module is written fresh from
//! the unprivileged spec's RVC chapter. Semantics mirror the uncompressed forms exactly (§4.3), so
//! rather than giving every opcode its own execution body, [`execute`] simply translates each
//! decoded compressed operation into a call on the same [`crate::core::execute::Executor`] used by
//! the base ISA, with `instr_len` set to 2 by the caller.

use crate::core::execute::{Executor, ExecutionResult};
use crate::instruction::DecodeError;
use crate::registers::Specifier;
use crate::xlen::Xlen;

const SP: Specifier = Specifier::from_u5(2);
const RA: Specifier = Specifier::from_u5(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CompressedInstruction {
    Addi4spn { dest: Specifier, nzuimm: u32 },
    Lw { dest: Specifier, base: Specifier, offset: u32 },
    Sw { src: Specifier, base: Specifier, offset: u32 },
    Ld { dest: Specifier, base: Specifier, offset: u32 },
    Sd { src: Specifier, base: Specifier, offset: u32 },
    Nop,
    Addi { dest: Specifier, imm: i64 },
    Jal { imm: i64 },
    Addiw { dest: Specifier, imm: i64 },
    Li { dest: Specifier, imm: i64 },
    Addi16sp { imm: i64 },
    Lui { dest: Specifier, imm: i64 },
    Srli { dest: Specifier, shamt: u32 },
    Srai { dest: Specifier, shamt: u32 },
    Andi { dest: Specifier, imm: i64 },
    Sub { dest: Specifier, src2: Specifier },
    Xor { dest: Specifier, src2: Specifier },
    Or { dest: Specifier, src2: Specifier },
    And { dest: Specifier, src2: Specifier },
    Subw { dest: Specifier, src2: Specifier },
    Addw { dest: Specifier, src2: Specifier },
    J { imm: i64 },
    Beqz { src: Specifier, imm: i64 },
    Bnez { src: Specifier, imm: i64 },
    Slli { dest: Specifier, shamt: u32 },
    Lwsp { dest: Specifier, offset: u32 },
    Ldsp { dest: Specifier, offset: u32 },
    Jr { src: Specifier },
    Mv { dest: Specifier, src2: Specifier },
    Ebreak,
    Jalr { src: Specifier },
    Add { dest: Specifier, src2: Specifier },
    Swsp { src: Specifier, offset: u32 },
    Sdsp { src: Specifier, offset: u32 },
}

impl CompressedInstruction {
    pub fn decode(instr: u16, xlen: Xlen) -> Result<Self, DecodeError> {
        use CompressedInstruction::*;

        let quadrant = instr & 0x3;
        let funct3 = (instr >> 13) & 0x7;

        match quadrant {
            0b00 => match funct3 {
                0b000 => {
                    let nzuimm = addi4spn_nzuimm(instr);
                    if nzuimm == 0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Addi4spn { dest: rd_prime(instr), nzuimm })
                }
                0b010 => Ok(Lw {
                    dest: rd_prime(instr),
                    base: rs1_prime(instr),
                    offset: lw_sw_offset(instr),
                }),
                0b011 if xlen == Xlen::Rv64 => Ok(Ld {
                    dest: rd_prime(instr),
                    base: rs1_prime(instr),
                    offset: ld_sd_offset(instr),
                }),
                0b110 => Ok(Sw {
                    src: rs2_prime_cs(instr),
                    base: rs1_prime(instr),
                    offset: lw_sw_offset(instr),
                }),
                0b111 if xlen == Xlen::Rv64 => Ok(Sd {
                    src: rs2_prime_cs(instr),
                    base: rs1_prime(instr),
                    offset: ld_sd_offset(instr),
                }),
                _ => Err(DecodeError::IllegalInstruction),
            },
            0b01 => match funct3 {
                0b000 => {
                    let imm = sext(ci_imm6(instr), 6);
                    if rd_full(instr) == Specifier::X0 && imm == 0 {
                        Ok(Nop)
                    } else {
                        Ok(Addi { dest: rd_full(instr), imm })
                    }
                }
                0b001 if xlen == Xlen::Rv32 => Ok(Jal { imm: sext(cj_imm(instr), 11) }),
                0b001 if xlen == Xlen::Rv64 => Ok(Addiw {
                    dest: rd_full(instr),
                    imm: sext(ci_imm6(instr), 6),
                }),
                0b010 => Ok(Li { dest: rd_full(instr), imm: sext(ci_imm6(instr), 6) }),
                0b011 => {
                    if rd_full(instr) == SP {
                        let imm = sext(addi16sp_imm(instr), 10);
                        if imm == 0 {
                            return Err(DecodeError::IllegalInstruction);
                        }
                        Ok(Addi16sp { imm })
                    } else {
                        let imm = sext(ci_imm6(instr), 6) << 12;
                        if imm == 0 || rd_full(instr) == Specifier::X0 {
                            return Err(DecodeError::IllegalInstruction);
                        }
                        Ok(Lui { dest: rd_full(instr), imm })
                    }
                }
                0b100 => {
                    let funct2 = (instr >> 10) & 0x3;
                    let dest = rs1_prime(instr);
                    match funct2 {
                        0b00 => Ok(Srli { dest, shamt: shift_shamt(instr) }),
                        0b01 => Ok(Srai { dest, shamt: shift_shamt(instr) }),
                        0b10 => Ok(Andi { dest, imm: sext(ci_imm6(instr), 6) }),
                        0b11 => {
                            let src2 = rs2_prime_cs(instr);
                            let bit12 = (instr >> 12) & 1;
                            let op2 = (instr >> 5) & 0x3;
                            match (bit12, op2) {
                                (0, 0b00) => Ok(Sub { dest, src2 }),
                                (0, 0b01) => Ok(Xor { dest, src2 }),
                                (0, 0b10) => Ok(Or { dest, src2 }),
                                (0, 0b11) => Ok(And { dest, src2 }),
                                (1, 0b00) if xlen == Xlen::Rv64 => Ok(Subw { dest, src2 }),
                                (1, 0b01) if xlen == Xlen::Rv64 => Ok(Addw { dest, src2 }),
                                _ => Err(DecodeError::IllegalInstruction),
                            }
                        }
                        _ => unreachable!(),
                    }
                }
                0b101 => Ok(J { imm: sext(cj_imm(instr), 11) }),
                0b110 => Ok(Beqz { src: rs1_prime(instr), imm: sext(cb_imm(instr), 9) }),
                0b111 => Ok(Bnez { src: rs1_prime(instr), imm: sext(cb_imm(instr), 9) }),
                _ => Err(DecodeError::IllegalInstruction),
            },
            0b10 => match funct3 {
                0b000 => Ok(Slli { dest: rd_full(instr), shamt: shift_shamt(instr) }),
                0b010 => {
                    let dest = rd_full(instr);
                    if dest == Specifier::X0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Lwsp { dest, offset: lwsp_offset(instr) })
                }
                0b011 if xlen == Xlen::Rv64 => {
                    let dest = rd_full(instr);
                    if dest == Specifier::X0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Ldsp { dest, offset: ldsp_offset(instr) })
                }
                0b100 => {
                    let bit12 = (instr >> 12) & 1 != 0;
                    let rd_rs1 = rd_full(instr);
                    let rs2 = rs2_full(instr);
                    match (bit12, rs2 == Specifier::X0) {
                        (false, true) => {
                            if rd_rs1 == Specifier::X0 {
                                return Err(DecodeError::IllegalInstruction);
                            }
                            Ok(Jr { src: rd_rs1 })
                        }
                        (false, false) => Ok(Mv { dest: rd_rs1, src2: rs2 }),
                        (true, true) if rd_rs1 == Specifier::X0 => Ok(Ebreak),
                        (true, true) => Ok(Jalr { src: rd_rs1 }),
                        (true, false) => Ok(Add { dest: rd_rs1, src2: rs2 }),
                    }
                }
                0b110 => Ok(Swsp { src: rs2_full(instr), offset: swsp_offset(instr) }),
                0b111 if xlen == Xlen::Rv64 => Ok(Sdsp { src: rs2_full(instr), offset: sdsp_offset(instr) }),
                _ => Err(DecodeError::IllegalInstruction),
            },
            _ => Err(DecodeError::IllegalInstruction),
        }
    }
}

/// Translates a decoded compressed instruction into the equivalent base-ISA [`Executor`] call.
pub fn execute(executor: &mut Executor, instr: CompressedInstruction) -> ExecutionResult {
    use CompressedInstruction::*;
    match instr {
        Addi4spn { dest, nzuimm } => executor.addi(dest, SP, nzuimm as i64),
        Lw { dest, base, offset } => executor.lw(dest, base, offset as i64),
        Sw { src, base, offset } => executor.sw(src, base, offset as i64),
        Ld { dest, base, offset } => executor.ld(dest, base, offset as i64),
        Sd { src, base, offset } => executor.sd(src, base, offset as i64),
        Nop => executor.addi(Specifier::X0, Specifier::X0, 0),
        Addi { dest, imm } => executor.addi(dest, dest, imm),
        Jal { imm } => executor.jal(RA, imm),
        Addiw { dest, imm } => executor.addiw(dest, dest, imm),
        Li { dest, imm } => executor.addi(dest, Specifier::X0, imm),
        Addi16sp { imm } => executor.addi(SP, SP, imm),
        Lui { dest, imm } => executor.lui(dest, imm),
        Srli { dest, shamt } => executor.srli(dest, dest, shamt),
        Srai { dest, shamt } => executor.srai(dest, dest, shamt),
        Andi { dest, imm } => executor.andi(dest, dest, imm),
        Sub { dest, src2 } => executor.sub(dest, dest, src2),
        Xor { dest, src2 } => executor.xor(dest, dest, src2),
        Or { dest, src2 } => executor.or(dest, dest, src2),
        And { dest, src2 } => executor.and(dest, dest, src2),
        Subw { dest, src2 } => executor.subw(dest, dest, src2),
        Addw { dest, src2 } => executor.addw(dest, dest, src2),
        J { imm } => executor.jal(Specifier::X0, imm),
        Beqz { src, imm } => executor.beq(src, Specifier::X0, imm),
        Bnez { src, imm } => executor.bne(src, Specifier::X0, imm),
        Slli { dest, shamt } => executor.slli(dest, dest, shamt),
        Lwsp { dest, offset } => executor.lw(dest, SP, offset as i64),
        Ldsp { dest, offset } => executor.ld(dest, SP, offset as i64),
        Jr { src } => executor.jalr(Specifier::X0, src, 0),
        Mv { dest, src2 } => executor.add(dest, Specifier::X0, src2),
        Ebreak => executor.ebreak(),
        Jalr { src } => executor.jalr(RA, src, 0),
        Add { dest, src2 } => executor.add(dest, dest, src2),
        Swsp { src, offset } => executor.sw(src, SP, offset as i64),
        Sdsp { src, offset } => executor.sd(src, SP, offset as i64),
    }
}

fn sext(value: u32, bits: u32) -> i64 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as i64
}

fn rd_full(instr: u16) -> Specifier {
    Specifier::from_u5(((instr >> 7) & 0x1f) as u8)
}

fn rs2_full(instr: u16) -> Specifier {
    Specifier::from_u5(((instr >> 2) & 0x1f) as u8)
}

fn rd_prime(instr: u16) -> Specifier {
    Specifier::from_compressed_u3(((instr >> 2) & 0x7) as u8)
}

fn rs1_prime(instr: u16) -> Specifier {
    Specifier::from_compressed_u3(((instr >> 7) & 0x7) as u8)
}

fn rs2_prime_cs(instr: u16) -> Specifier {
    Specifier::from_compressed_u3(((instr >> 2) & 0x7) as u8)
}

fn addi4spn_nzuimm(instr: u16) -> u32 {
    let i = instr as u32;
    ((i >> 1) & 0x3c0) | ((i >> 7) & 0x30) | ((i >> 2) & 0x8) | ((i >> 4) & 0x4)
}

fn lw_sw_offset(instr: u16) -> u32 {
    let i = instr as u32;
    ((i & 0x20) << 1) | ((i >> 7) & 0x38) | ((i >> 4) & 0x4)
}

fn ld_sd_offset(instr: u16) -> u32 {
    let i = instr as u32;
    ((i >> 7) & 0x38) | ((i << 1) & 0xc0)
}

fn ci_imm6(instr: u16) -> u32 {
    let i = instr as u32;
    (((i >> 12) & 1) << 5) | ((i >> 2) & 0x1f)
}

fn cj_imm(instr: u16) -> u32 {
    let i = instr as u32;
    ((i >> 1) & 0x800)
        | ((i << 2) & 0x400)
        | ((i >> 1) & 0x300)
        | ((i << 1) & 0x80)
        | ((i >> 1) & 0x40)
        | ((i << 3) & 0x20)
        | ((i >> 7) & 0x10)
        | ((i >> 2) & 0xe)
}

fn addi16sp_imm(instr: u16) -> u32 {
    let i = instr as u32;
    ((i >> 3) & 0x200) | ((i >> 2) & 0x10) | ((i << 1) & 0x40) | ((i << 4) & 0x180) | ((i << 3) & 0x20)
}

fn cb_imm(instr: u16) -> u32 {
    let i = instr as u32;
    ((i >> 4) & 0x100) | ((i >> 7) & 0x18) | ((i << 1) & 0xc0) | ((i >> 2) & 0x6) | ((i << 3) & 0x20)
}

/// 6-bit shift amount (`imm[5]` from bit 12, `imm[4:0]` from bits 6:2); decoding is XLEN-independent,
/// so on RV32 this can return a `shamt` with the top bit set — `Executor::check_shamt` rejects it
/// against the configured [`Xlen`] when `Srli`/`Slli`/`Srai` reach execution.
fn shift_shamt(instr: u16) -> u32 {
    let i = instr as u32;
    (((i >> 12) & 1) << 5) | ((i >> 2) & 0x1f)
}

fn lwsp_offset(instr: u16) -> u32 {
    let i = instr as u32;
    ((i >> 7) & 0x20) | ((i >> 2) & 0x1c) | ((i << 4) & 0xc0)
}

fn ldsp_offset(instr: u16) -> u32 {
    let i = instr as u32;
    ((i >> 7) & 0x20) | ((i >> 2) & 0x18) | ((i << 4) & 0x1c0)
}

fn swsp_offset(instr: u16) -> u32 {
    let i = instr as u32;
    ((i >> 7) & 0x3c) | ((i >> 1) & 0xc0)
}

fn sdsp_offset(instr: u16) -> u32 {
    let i = instr as u32;
    ((i >> 7) & 0x38) | ((i >> 1) & 0x1c0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_c_nop() {
        assert_eq!(CompressedInstruction::Nop, CompressedInstruction::decode(0x0001, Xlen::Rv32).unwrap());
    }

    #[test]
    fn test_decode_c_li() {
        // c.li a0, 5 -> funct3=010 imm[5]=0 rd=01010(a0=x10) imm[4:0]=00101 op=01
        let raw = 0b010_0_01010_00101_01u16;
        assert_eq!(
            CompressedInstruction::Li { dest: Specifier::from_u5(10), imm: 5 },
            CompressedInstruction::decode(raw, Xlen::Rv32).unwrap()
        );
    }

    #[test]
    fn test_decode_c_addi4spn_zero_is_illegal() {
        assert_eq!(
            Err(DecodeError::IllegalInstruction),
            CompressedInstruction::decode(0b000_00000000_000_00, Xlen::Rv32)
        );
    }

    #[test]
    fn test_decode_c_jr() {
        // c.jr ra -> funct4=1000, rs1=00001, rs2=00000
        let raw = 0b1000_00001_00000_10u16;
        assert_eq!(
            CompressedInstruction::Jr { src: Specifier::from_u5(1) },
            CompressedInstruction::decode(raw, Xlen::Rv32).unwrap()
        );
    }

    #[test]
    fn test_decode_c_ebreak() {
        let raw = 0b1001_00000_00000_10u16;
        assert_eq!(CompressedInstruction::Ebreak, CompressedInstruction::decode(raw, Xlen::Rv32).unwrap());
    }

    #[test]
    fn test_decode_c_ld_rv64_only() {
        let raw = 0b011_000_001_00_010_00u16;
        assert!(CompressedInstruction::decode(raw, Xlen::Rv32).is_err());
        assert!(CompressedInstruction::decode(raw, Xlen::Rv64).is_ok());
    }
}
