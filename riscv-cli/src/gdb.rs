//! GDB remote-serial debug stub.
//!
//! Grounded on the teacher's `red-planet-cli/src/gdb.rs` and its `gdb/` submodules (register
//! access, breakpoints, resume/step), adapted from their async `GdbStubStateMachine` loop (needed
//! there to interleave with a tokio TUI) to the simpler synchronous `run_blocking` quickstart the
//! `gdbstub` crate itself documents, since this CLI has no UI to interleave with.

use std::collections::HashSet;
use std::net::TcpStream;

use gdbstub::common::Signal;
use gdbstub::conn::ConnectionExt;
use gdbstub::stub::run_blocking::{BlockingEventLoop, Event, WaitForStopReasonError};
use gdbstub::stub::SingleThreadStopReason;
use gdbstub::target::ext::base::singlethread::{SingleThreadBase, SingleThreadResume};
use gdbstub::target::ext::breakpoints::{Breakpoints, BreakpointsOps, SwBreakpoint, SwBreakpointOps};
use gdbstub::target::{self, Target, TargetError, TargetResult};
use gdbstub_arch::riscv::reg::RiscvCoreRegs;
use gdbstub_arch::riscv::Riscv32;

use riscv_core::memory::{AccessSize, MemoryPort};
use riscv_core::registers::Specifier;
use riscv_core::Core;

/// What the client last asked us to do: keep stepping, or run until something stops us.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ExecMode {
    Step,
    Continue,
}

enum StopEvent {
    DoneStep,
    Break,
    Halted,
}

enum RunEvent {
    IncomingData,
    Stopped(StopEvent),
}

/// Owns the [`Core`] for the duration of a debug session, handing it back via [`SimTarget::into_core`]
/// once the client disconnects.
pub struct SimTarget {
    core: Core,
    breakpoints: HashSet<u32>,
    exec_mode: ExecMode,
}

impl SimTarget {
    pub fn new(core: Core) -> Self {
        Self {
            core,
            breakpoints: HashSet::new(),
            exec_mode: ExecMode::Step,
        }
    }

    pub fn into_core(self) -> Core {
        self.core
    }

    fn run(&mut self, mut poll_incoming_data: impl FnMut() -> bool) -> RunEvent {
        if self.core.is_halted() {
            return RunEvent::Stopped(StopEvent::Halted);
        }

        match self.exec_mode {
            ExecMode::Step => {
                self.core.step();
                RunEvent::Stopped(StopEvent::DoneStep)
            }
            ExecMode::Continue => loop {
                if poll_incoming_data() {
                    break RunEvent::IncomingData;
                }

                let outcome = self.core.step();
                if self.core.is_halted() {
                    break RunEvent::Stopped(StopEvent::Halted);
                }
                let pc = self.core.registers().pc() as u32;
                if outcome.hit_breakpoint || self.breakpoints.contains(&pc) {
                    break RunEvent::Stopped(StopEvent::Break);
                }
            },
        }
    }
}

impl Target for SimTarget {
    type Arch = Riscv32;
    type Error = &'static str;

    #[inline(always)]
    fn base_ops(&mut self) -> target::ext::base::BaseOps<'_, Self::Arch, Self::Error> {
        target::ext::base::BaseOps::SingleThread(self)
    }

    #[inline(always)]
    fn support_breakpoints(&mut self) -> Option<BreakpointsOps<'_, Self>> {
        Some(self)
    }
}

impl SingleThreadBase for SimTarget {
    fn read_registers(&mut self, regs: &mut RiscvCoreRegs<u32>) -> TargetResult<(), Self> {
        for specifier in Specifier::iter_all() {
            regs.x[usize::from(specifier)] = self.core.registers().x(specifier) as u32;
        }
        regs.pc = self.core.registers().pc() as u32;
        Ok(())
    }

    fn write_registers(&mut self, regs: &RiscvCoreRegs<u32>) -> TargetResult<(), Self> {
        for specifier in Specifier::iter_all() {
            self.core
                .registers_mut()
                .set_x(specifier, u64::from(regs.x[usize::from(specifier)]));
        }
        self.core.registers_mut().set_pc(u64::from(regs.pc));
        Ok(())
    }

    fn read_addrs(&mut self, start_addr: u32, data: &mut [u8]) -> TargetResult<usize, Self> {
        for (i, byte) in data.iter_mut().enumerate() {
            let addr = start_addr.wrapping_add(i as u32);
            *byte = match self.core.bus_mut().read_data(u64::from(addr), AccessSize::Byte) {
                Ok(value) => value as u8,
                Err(_) => return Ok(i),
            };
        }
        Ok(data.len())
    }

    fn write_addrs(&mut self, start_addr: u32, data: &[u8]) -> TargetResult<(), Self> {
        for (i, byte) in data.iter().enumerate() {
            let addr = start_addr.wrapping_add(i as u32);
            self.core
                .bus_mut()
                .write_data(u64::from(addr), u32::from(*byte), AccessSize::Byte)
                .map_err(|_| TargetError::NonFatal)?;
        }
        Ok(())
    }

    #[inline(always)]
    fn support_resume(
        &mut self,
    ) -> Option<target::ext::base::singlethread::SingleThreadResumeOps<'_, Self>> {
        Some(self)
    }
}

impl SingleThreadResume for SimTarget {
    fn resume(&mut self, signal: Option<Signal>) -> Result<(), Self::Error> {
        if signal.is_some() {
            return Err("no support for resuming with signal");
        }
        self.exec_mode = ExecMode::Continue;
        Ok(())
    }

    #[inline(always)]
    fn support_single_step(
        &mut self,
    ) -> Option<target::ext::base::singlethread::SingleThreadSingleStepOps<'_, Self>> {
        Some(self)
    }
}

impl target::ext::base::singlethread::SingleThreadSingleStep for SimTarget {
    fn step(&mut self, signal: Option<Signal>) -> Result<(), Self::Error> {
        if signal.is_some() {
            return Err("no support for stepping with signal");
        }
        self.exec_mode = ExecMode::Step;
        Ok(())
    }
}

impl Breakpoints for SimTarget {
    #[inline(always)]
    fn support_sw_breakpoint(&mut self) -> Option<SwBreakpointOps<'_, Self>> {
        Some(self)
    }
}

impl SwBreakpoint for SimTarget {
    fn add_sw_breakpoint(&mut self, addr: u32, _kind: usize) -> TargetResult<bool, Self> {
        Ok(self.breakpoints.insert(addr))
    }

    fn remove_sw_breakpoint(&mut self, addr: u32, _kind: usize) -> TargetResult<bool, Self> {
        Ok(self.breakpoints.remove(&addr))
    }
}

/// Drives [`SimTarget`] through `gdbstub`'s synchronous event loop.
pub enum SimEventLoop {}

impl BlockingEventLoop for SimEventLoop {
    type Target = SimTarget;
    type Connection = TcpStream;
    type StopReason = SingleThreadStopReason<u32>;

    fn wait_for_stop_reason(
        target: &mut Self::Target,
        conn: &mut Self::Connection,
    ) -> Result<
        Event<SingleThreadStopReason<u32>>,
        WaitForStopReasonError<
            <Self::Target as Target>::Error,
            <Self::Connection as gdbstub::conn::Connection>::Error,
        >,
    > {
        let poll_incoming_data = || conn.peek().map(|b| b.is_some()).unwrap_or(true);

        match target.run(poll_incoming_data) {
            RunEvent::IncomingData => {
                let byte = conn.read().map_err(WaitForStopReasonError::Connection)?;
                Ok(Event::IncomingData(byte))
            }
            RunEvent::Stopped(StopEvent::DoneStep) => {
                Ok(Event::TargetStopped(SingleThreadStopReason::DoneStep))
            }
            RunEvent::Stopped(StopEvent::Break) => {
                Ok(Event::TargetStopped(SingleThreadStopReason::SwBreak(())))
            }
            RunEvent::Stopped(StopEvent::Halted) => Ok(Event::TargetStopped(
                SingleThreadStopReason::Terminated(Signal::SIGSTOP),
            )),
        }
    }

    fn on_interrupt(
        _target: &mut Self::Target,
    ) -> Result<Option<SingleThreadStopReason<u32>>, <Self::Target as Target>::Error> {
        Ok(Some(SingleThreadStopReason::Signal(Signal::SIGINT)))
    }
}
