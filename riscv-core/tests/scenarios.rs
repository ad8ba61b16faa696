//! End-to-end scenarios: assemble a handful of raw instruction words into RAM and drive `Core`
//! through them directly, the same black-box "assemble a program, step it, inspect state" style
//! the teacher's `red-planet-test` driver uses against ELF binaries.

use riscv_core::bus::Bus;
use riscv_core::memory::{AccessSize, MemoryPort};
use riscv_core::registers::Specifier;
use riscv_core::resources::ram::Ram;
use riscv_core::resources::timer::Timer;
use riscv_core::{Config, Core, Xlen};

const ZERO: u32 = 0;
const RA: u32 = 1;
const SP: u32 = 2;
const T0: u32 = 5;
const T1: u32 = 6;
const T2: u32 = 7;
const A0: u32 = 10;
const A1: u32 = 11;
const A2: u32 = 12;

const OP_IMM: u32 = 0b0010011;
const LUI: u32 = 0b0110111;
const OP: u32 = 0b0110011;
const LOAD: u32 = 0b0000011;
const STORE: u32 = 0b0100011;
const SYSTEM: u32 = 0b1110011;
const AMO: u32 = 0b0101111;
const JAL: u32 = 0b1101111;

fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn i_type(imm: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (((imm as u32) & 0xFFF) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn s_type(imm: i32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = imm as u32 & 0xFFF;
    ((imm >> 5) << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | ((imm & 0x1F) << 7) | opcode
}

fn u_type(imm20: u32, rd: u32, opcode: u32) -> u32 {
    (imm20 << 12) | (rd << 7) | opcode
}

fn amo_type(funct5: u32, rs2: u32, rs1: u32, rd: u32) -> u32 {
    (funct5 << 27) | (rs2 << 20) | (rs1 << 15) | (0b010 << 12) | (rd << 7) | AMO
}

fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b000, rd, OP_IMM)
}

fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 0b000, rd, OP)
}

fn lui(rd: u32, imm20: u32) -> u32 {
    u_type(imm20, rd, LUI)
}

fn ld(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b011, rd, LOAD)
}

fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
    s_type(imm, rs2, rs1, 0b010, STORE)
}

fn sd(rs2: u32, rs1: u32, imm: i32) -> u32 {
    s_type(imm, rs2, rs1, 0b011, STORE)
}

fn lr_w(rd: u32, rs1: u32) -> u32 {
    amo_type(0b00010, 0, rs1, rd)
}

fn sc_w(rd: u32, rs1: u32, rs2: u32) -> u32 {
    amo_type(0b00011, rs2, rs1, rd)
}

fn csrrw(rd: u32, csr: u32, rs1: u32) -> u32 {
    i_type(csr as i32, rs1, 0b001, rd, SYSTEM)
}

fn csrrwi(rd: u32, csr: u32, zimm: u32) -> u32 {
    i_type(csr as i32, zimm, 0b101, rd, SYSTEM)
}

fn jal_self() -> u32 {
    (ZERO << 7) | JAL
}

const ECALL: u32 = 0x0000_0073;

fn c_li(rd: u32, imm: i32) -> u16 {
    let imm5 = (imm as u32) & 0x3F;
    let imm5_bit = (imm5 >> 5) & 1;
    let imm4_0 = imm5 & 0x1F;
    ((0b010 << 13) | (imm5_bit << 12) | (rd << 7) | (imm4_0 << 2) | 0b01) as u16
}

fn c_mv(rd: u32, rs2: u32) -> u16 {
    ((0b100 << 13) | (rd << 7) | (rs2 << 2) | 0b10) as u16
}

fn c_add(rd: u32, rs2: u32) -> u16 {
    ((0b100 << 13) | (1 << 12) | (rd << 7) | (rs2 << 2) | 0b10) as u16
}

fn c_jr(rs1: u32) -> u16 {
    ((0b100 << 13) | (rs1 << 7) | 0b10) as u16
}

fn core_with_words(xlen: Xlen, ram_size: usize, words: &[u32]) -> Core {
    let mut ram = Ram::new(ram_size).unwrap();
    for (i, word) in words.iter().enumerate() {
        ram.load(i * 4, &word.to_le_bytes()).unwrap();
    }
    let mut bus = Bus::new();
    bus.attach(0, ram_size as u64, Box::new(ram)).unwrap();
    Core::new(
        Config { xlen, reset_vector: 0, tick_ns: 1, halt_on_double_fence: false },
        bus,
    )
}

fn step_n(core: &mut Core, n: usize) {
    for _ in 0..n {
        core.step();
    }
}

fn specifier(num: u32) -> Specifier {
    Specifier::from_u5(num as u8)
}

/// S1: `li a0,6; li a1,7; add a2,a0,a1; ecall` traps with a2 = 13.
#[test]
fn test_s1_integer_add_traps_on_ecall() {
    let program = [addi(A0, ZERO, 6), addi(A1, ZERO, 7), add(A2, A0, A1), ECALL];
    let mut core = core_with_words(Xlen::Rv32, 256, &program);

    step_n(&mut core, 4);

    assert_eq!(13, core.registers().x(specifier(A2)));
    assert!(core.counters().instructions_retired >= 4);
    assert_eq!(11, core.trap().mcause());
}

/// S2: `c.li a0,5; c.li a1,7; c.mv a2,a0; c.add a2,a1; c.jr ra`, ra pre-set to a sink.
#[test]
fn test_s2_compressed_round_trip() {
    let instrs = [
        c_li(A0, 5),
        c_li(A1, 7),
        c_mv(A2, A0),
        c_add(A2, A1),
        c_jr(RA),
    ];
    let mut ram = Ram::new(256).unwrap();
    for (i, instr) in instrs.iter().enumerate() {
        ram.load(i * 2, &instr.to_le_bytes()).unwrap();
    }
    let mut bus = Bus::new();
    bus.attach(0, 256, Box::new(ram)).unwrap();
    let mut core = Core::new(
        Config { xlen: Xlen::Rv32, reset_vector: 0, tick_ns: 1, halt_on_double_fence: false },
        bus,
    );
    let sink = 0x81;
    core.registers_mut().set_x(specifier(RA), sink);

    step_n(&mut core, 5);

    assert_eq!(12, core.registers().x(specifier(A2)));
    assert_eq!(sink & !1, core.registers().pc());
}

/// S3: `lr.w t0,(a0); sc.w t1,t2,(a0)` succeeds: t0 = *a0, memory updated, t1 = 0.
#[test]
fn test_s3_load_reserved_store_conditional_succeeds() {
    let program = [lr_w(T0, A0), sc_w(T1, A0, T2)];
    let mut core = core_with_words(Xlen::Rv32, 256, &program);
    let addr = 128u64;
    core.registers_mut().set_x(specifier(A0), addr);
    core.registers_mut().set_x(specifier(T2), 0xDEAD_BEEF);
    core.bus_mut().write_data(addr, 0x1234_5678, AccessSize::Word).unwrap();

    step_n(&mut core, 2);

    assert_eq!(0x1234_5678, core.registers().x(specifier(T0)));
    assert_eq!(0, core.registers().x(specifier(T1)));
    assert_eq!(
        Ok(0xDEAD_BEEF),
        core.bus_mut().read_data(addr, AccessSize::Word)
    );
}

/// S4: `lr.w t0,(a0); sc.w t1,t2,(a1)` with a1 != a0 fails: memory at a1 unchanged, t1 = 1.
#[test]
fn test_s4_store_conditional_fails_on_mismatched_reservation() {
    let program = [lr_w(T0, A0), sc_w(T1, A1, T2)];
    let mut core = core_with_words(Xlen::Rv32, 256, &program);
    let addr_a = 128u64;
    let addr_b = 160u64;
    core.registers_mut().set_x(specifier(A0), addr_a);
    core.registers_mut().set_x(specifier(A1), addr_b);
    core.registers_mut().set_x(specifier(T2), 0xDEAD_BEEF);
    core.bus_mut().write_data(addr_b, 0x1111_1111, AccessSize::Word).unwrap();

    step_n(&mut core, 2);

    assert_eq!(1, core.registers().x(specifier(T1)));
    assert_eq!(
        Ok(0x1111_1111),
        core.bus_mut().read_data(addr_b, AccessSize::Word)
    );
}

/// S5: `sd a0,(sp); ld a1,(sp)` round-trips a 64-bit value byte-for-byte on RV64.
#[test]
fn test_s5_rv64_doubleword_store_load_round_trip() {
    let program = [sd(A0, SP, 0), ld(A1, SP, 0)];
    let mut core = core_with_words(Xlen::Rv64, 256, &program);
    let sp = 128u64;
    core.registers_mut().set_x(specifier(SP), sp);
    core.registers_mut().set_x(specifier(A0), 0x1122_3344_5566_7788);

    step_n(&mut core, 2);

    assert_eq!(0x1122_3344_5566_7788, core.registers().x(specifier(A1)));
}

/// S6: a timer interrupt vectors to `mtvec` with `mcause = 0x8000_0007` and `mepc` pointing at
/// the loop instruction that was interrupted.
#[test]
fn test_s6_timer_interrupt_vectors_to_mtvec() {
    const TIMER_BASE: u32 = 0x1000;
    const MTVEC_TARGET: i32 = 0x100;
    const MSTATUS: u32 = 0x300;
    const MTVEC: u32 = 0x305;

    let loop_pc = 7 * 4;
    let program = [
        lui(T1, TIMER_BASE >> 12),       // t1 = TIMER_BASE
        addi(T2, ZERO, 5),               // t2 = 5 ticks
        sw(T2, T1, 8),                   // mtimecmp.lo = 5
        sw(ZERO, T1, 12),                // mtimecmp.hi = 0 (arms the timer)
        addi(T0, ZERO, MTVEC_TARGET),    // t0 = trap handler address
        csrrw(ZERO, MTVEC, T0),          // mtvec = t0
        csrrwi(ZERO, MSTATUS, 0b1000),   // mstatus.MIE = 1
        jal_self(),                      // loop: j .
    ];
    let mut ram = Ram::new(4096).unwrap();
    for (i, word) in program.iter().enumerate() {
        ram.load(i * 4, &word.to_le_bytes()).unwrap();
    }
    let mut bus = Bus::new();
    bus.attach(0, 4096, Box::new(ram)).unwrap();
    bus.attach(u64::from(TIMER_BASE), 16, Box::new(Timer::new())).unwrap();
    let mut core = Core::new(
        Config { xlen: Xlen::Rv32, reset_vector: 0, tick_ns: 1, halt_on_double_fence: false },
        bus,
    );

    for _ in 0..50 {
        core.step();
        if core.registers().pc() == MTVEC_TARGET as u64 {
            break;
        }
    }

    assert_eq!(MTVEC_TARGET as u64, core.registers().pc());
    assert_eq!(0x8000_0007, core.trap().mcause());
    assert_eq!(loop_pc as u64, core.trap().mepc());
}
