mod gdb;

use std::fs;
use std::io::Write;
use std::net::TcpListener;
use std::process::ExitCode;

use clap::Parser;
use gdbstub::stub::{DisconnectReason, GdbStub};
use log::{info, warn};

use riscv_core::bus::Bus;
use riscv_core::loader;
use riscv_core::memory::{AccessSize, MemoryPort};
use riscv_core::resources::ram::Ram;
use riscv_core::resources::timer::Timer;
use riscv_core::resources::trace::Trace;
use riscv_core::{Config, Core, Xlen};

const RAM_BASE: u64 = 0x8000_0000;
const RAM_SIZE: usize = 16 * 1024 * 1024;
const TRACE_BASE: u64 = 0x4000_0000;
const TIMER_BASE: u64 = 0x4000_4000;

/// A RISC-V RV32/RV64 instruction-set simulator.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Intel-HEX program to load into RAM.
    #[arg(short = 'f', long)]
    file: String,

    /// Core width: 32 or 64.
    #[arg(short = 'X', long, default_value_t = 32)]
    xlen: u32,

    /// Attach a GDB debug stub on TCP port 1234 instead of running to completion.
    #[arg(short = 'D', long)]
    debug: bool,

    /// Dump a signature region to stdout on exit.
    #[arg(short = 'T', long)]
    signature: bool,

    /// Start address (hex) of the signature dump.
    #[arg(short = 'B', long, value_parser = parse_hex)]
    dump_start: Option<u64>,

    /// End address (hex, exclusive) of the signature dump.
    #[arg(short = 'E', long, value_parser = parse_hex)]
    dump_end: Option<u64>,

    /// Log level: 0=warn, 1=info, 2=debug, 3=trace.
    #[arg(short = 'L', long, default_value_t = 0)]
    log_level: u8,
}

fn parse_hex(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.log_level {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let xlen = match args.xlen {
        32 => Xlen::Rv32,
        64 => Xlen::Rv64,
        other => {
            eprintln!("unsupported core width: {other} (expected 32 or 64)");
            return ExitCode::FAILURE;
        }
    };

    if args.debug && xlen != Xlen::Rv32 {
        eprintln!("the debug stub only supports RV32 cores");
        return ExitCode::FAILURE;
    }

    let source = match fs::read_to_string(&args.file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("failed to read {}: {err}", args.file);
            return ExitCode::FAILURE;
        }
    };

    let mut ram = Ram::new(RAM_SIZE).unwrap();
    let load_result = match loader::load(&source, &mut ram) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("failed to load {}: {err}", args.file);
            return ExitCode::FAILURE;
        }
    };

    let mut bus = Bus::new();
    bus.attach(RAM_BASE, RAM_SIZE as u64, Box::new(ram)).unwrap();
    bus.attach(TRACE_BASE, 4, Box::new(Trace::new())).unwrap();
    bus.attach(TIMER_BASE, 16, Box::new(Timer::new())).unwrap();

    let reset_vector = load_result
        .entry_point
        .map(|entry| RAM_BASE + u64::from(entry))
        .unwrap_or(RAM_BASE);

    let config = Config {
        xlen,
        reset_vector,
        tick_ns: 1,
        halt_on_double_fence: true,
    };
    let core = Core::new(config, bus);

    let mut core = if args.debug {
        run_debug_session(core)
    } else {
        run_to_completion(core)
    };

    if args.signature {
        dump_signature(&mut core, args.dump_start, args.dump_end);
    }

    ExitCode::SUCCESS
}

fn run_to_completion(mut core: Core) -> Core {
    while !core.is_halted() {
        core.step();
    }
    info!(
        "core halted after {} instructions",
        core.counters().instructions_retired
    );
    core
}

fn run_debug_session(core: Core) -> Core {
    let port = 1234;
    info!("waiting for a GDB connection on 127.0.0.1:{port}...");
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("failed to bind debug stub port {port}: {err}");
            return core;
        }
    };
    let (stream, addr) = match listener.accept() {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("failed to accept debug connection: {err}");
            return core;
        }
    };
    info!("debugger connected from {addr}");

    let mut target = gdb::SimTarget::new(core);
    let gdb_stub = GdbStub::new(stream);

    match gdb_stub.run_blocking::<gdb::SimEventLoop>(&mut target) {
        Ok(DisconnectReason::Disconnect) => warn!("client disconnected"),
        Ok(DisconnectReason::TargetExited(code)) => warn!("target exited with code {code}"),
        Ok(DisconnectReason::TargetTerminated(sig)) => {
            warn!("target terminated with signal {sig}")
        }
        Ok(DisconnectReason::Kill) => warn!("GDB sent a kill command"),
        Err(err) => warn!("gdbstub error: {err}"),
    }

    target.into_core()
}

fn dump_signature(core: &mut Core, start: Option<u64>, end: Option<u64>) {
    let (Some(start), Some(end)) = (start, end) else {
        eprintln!("signature dump requested but -B/-E were not both given");
        return;
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut addr = start;
    while addr < end {
        match core.bus_mut().read_data(addr, AccessSize::Word) {
            Ok(word) => {
                let _ = writeln!(out, "{word:08x}");
            }
            Err(_) => {
                let _ = writeln!(out, "--------");
            }
        }
        addr += 4;
    }
}
