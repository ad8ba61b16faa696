//! Specifiers for all supported CSRs.
//!
//! Unlike a hart meant for real hardware, this core only recognises the small set of CSRs named in
//! the data model: `mstatus`/`misa`/the trap-setup and trap-handling registers, their supervisor
//! analogs (storage only, no delegation), and the counter/timer aliases. Everything else reads as
//! zero and accepts writes silently, which is enough for software that merely probes for a CSR's
//! presence.

use thiserror::Error;

/// General 12-bit value representing a CSR specifier. Note that this can hold any 12-bit value,
/// even if the value represents an unrecognised CSR.
pub type CsrSpecifier = u16;

//
// Unprivileged counters/timers.
//
/// Cycle counter for RDCYCLE.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Timer for RDTIME.
pub const TIME: CsrSpecifier = 0xC01;
/// Instructions-retired counter for RDINSTRET.
pub const INSTRET: CsrSpecifier = 0xC02;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`TIME`], RV32 only.
pub const TIMEH: CsrSpecifier = 0xC81;
/// Upper 32 bits of [`INSTRET`], RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;

//
// Supervisor trap setup/handling (storage only).
//
/// Supervisor trap handler base address.
pub const STVEC: CsrSpecifier = 0x105;
/// Scratch register for supervisor trap handling.
pub const SSCRATCH: CsrSpecifier = 0x140;
/// Supervisor exception program counter.
pub const SEPC: CsrSpecifier = 0x141;
/// Supervisor trap cause.
pub const SCAUSE: CsrSpecifier = 0x142;
/// Supervisor bad address or instruction.
pub const STVAL: CsrSpecifier = 0x143;
/// Supervisor interrupt pending.
pub const SIP: CsrSpecifier = 0x144;

//
// Machine trap setup.
//
/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// ISA and extensions.
pub const MISA: CsrSpecifier = 0x301;
/// Machine exception delegation register.
pub const MEDELEG: CsrSpecifier = 0x302;
/// Machine interrupt delegation register.
pub const MIDELEG: CsrSpecifier = 0x303;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine trap-handler base address.
pub const MTVEC: CsrSpecifier = 0x305;
/// Machine counter enable.
pub const MCOUNTEREN: CsrSpecifier = 0x306;

//
// Machine trap handling.
//
/// Scratch register for machine trap handlers.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;

//
// Machine counters/timers.
//
/// Machine cycle counter.
pub const MCYCLE: CsrSpecifier = 0xB00;
/// Machine instructions-retired counter.
pub const MINSTRET: CsrSpecifier = 0xB02;
/// Upper 32 bits of [`MCYCLE`], RV32 only.
pub const MCYCLEH: CsrSpecifier = 0xB80;
/// Upper 32 bits of [`MINSTRET`], RV32 only.
pub const MINSTRETH: CsrSpecifier = 0xB82;

/// `mstatus.MIE`, the M-mode global interrupt enable bit.
pub const MSTATUS_MIE: u64 = 1 << 3;
/// `mstatus.MPIE`, the M-mode interrupt-enable-before-trap bit.
pub const MSTATUS_MPIE: u64 = 1 << 7;
/// `mstatus.MPP`, the M-mode previous privilege level field.
pub const MSTATUS_MPP: u64 = 3 << 11;
/// `mip.MEIP`, the machine external-interrupt pending bit.
pub const MIP_MEIP: u64 = 1 << 11;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CsrAccessError {
    #[error("csr {0:#05x} is not a supported CSR")]
    Unsupported(CsrSpecifier),
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CsrWriteError {
    #[error(transparent)]
    AccessError(#[from] CsrAccessError),
    #[error("attempted write to read-only csr {0:#05x}")]
    WriteToReadOnly(CsrSpecifier),
}

/// Backing store for every recognised CSR that isn't given special handling elsewhere (`mstatus`
/// lives in [`super::status::Status`], the trap-setup/handling registers live in
/// [`super::trap::Trap`]).
///
/// Unrecognised CSRs are not stored at all: they read as zero and silently discard writes, per the
/// data model.
#[derive(Debug, Clone)]
pub struct CsrFile {
    medeleg: u64,
    mideleg: u64,
    mie: u64,
    mcounteren: u64,
}

impl Default for CsrFile {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrFile {
    pub fn new() -> Self {
        Self {
            medeleg: 0,
            mideleg: 0,
            mie: 0,
            mcounteren: 0,
        }
    }

    pub fn read_medeleg(&self) -> u64 {
        self.medeleg
    }

    pub fn write_medeleg(&mut self, value: u64) {
        self.medeleg = value;
    }

    pub fn read_mideleg(&self) -> u64 {
        self.mideleg
    }

    pub fn write_mideleg(&mut self, value: u64) {
        self.mideleg = value;
    }

    pub fn read_mie(&self) -> u64 {
        self.mie
    }

    pub fn write_mie(&mut self, value: u64) {
        self.mie = value;
    }

    pub fn read_mcounteren(&self) -> u64 {
        self.mcounteren
    }

    pub fn write_mcounteren(&mut self, value: u64) {
        self.mcounteren = value;
    }
}

/// Returns `true` if `specifier` only supports read access (the top two bits of its 12-bit address
/// are `0b11`), per the unprivileged spec's CSR addressing convention.
pub fn is_read_only(specifier: CsrSpecifier) -> bool {
    specifier >> 10 == 0b11
}
