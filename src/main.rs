//! src/main.rs

use std::io::{self, BufRead, IsTerminal, Write};
use std::panic;

use clap::Parser;

use dma_tester::config::{Cli, Commands, DeviceArgs, VerifyArgs};
use dma_tester::geometry::DeviceGeometry;
use dma_tester::logging::{self, current_timestamp, LogFile};
use dma_tester::report::ConsoleReporter;
use dma_tester::{
    open_device, prepare, verify_device, FatalError, Prepared, RunPlan, StopFlag,
    SystemAllocator,
};

enum Outcome {
    Done,
    Declined,
}

fn format_bytes(bytes: u64) -> (f64, &'static str) {
    const KIB_F: f64 = 1024.0;
    const MIB_F: f64 = KIB_F * 1024.0;
    const GIB_F: f64 = MIB_F * 1024.0;
    if bytes < 1024 {
        return (bytes as f64, "Bytes");
    }
    let bytes_f = bytes as f64;
    if bytes_f < MIB_F {
        (bytes_f / KIB_F, "KiB")
    } else if bytes_f < GIB_F {
        (bytes_f / MIB_F, "MiB")
    } else {
        (bytes_f / GIB_F, "GiB")
    }
}

fn describe(log_f: &LogFile, geometry: &DeviceGeometry, plan: &RunPlan) {
    let (size, unit) = format_bytes(geometry.total_bytes());
    logging::log_simple(log_f, None, format!("Bytes per sector: {}", geometry.sector_size));
    logging::log_simple(log_f, None, format!("Test start sector: {}", geometry.data_start_sector));
    logging::log_simple(
        log_f,
        None,
        format!("Test total sectors: {} ({:.2} {})", geometry.total_sectors, size, unit),
    );
    logging::log_simple(log_f, None, format!("Max sectors: {}", plan.max_chunk_sectors));
    logging::log_simple(
        log_f,
        None,
        format!(
            "Buffers: 2 x {} bytes, range [{},{}[ in {} chunks of {} ramp steps",
            plan.buffer_bytes,
            plan.start_sector,
            plan.end_sector,
            plan.chunk_count(),
            plan.ramp_steps()
        ),
    );
    let untested = geometry.end_sector() - plan.end_sector;
    if untested > 0 {
        logging::log_simple(
            log_f,
            None,
            format!("Trailing {} sectors are smaller than one chunk and stay untested.", untested),
        );
    }
}

fn prepare_device(log_f: &LogFile, args: &DeviceArgs) -> Result<Prepared, FatalError> {
    let provider = args.provider().map_err(|reason| FatalError::GeometryUnavailable {
        device: args.device.display().to_string(),
        reason,
    })?;
    let mut alloc = SystemAllocator::new(args.use_direct_io(), args.memory_limit);
    if args.verbose {
        let (size, unit) = format_bytes(alloc.limit());
        logging::log_simple(log_f, None, format!("Allocation limit: {:.2} {}", size, unit));
    }
    let prepared = prepare(provider.as_ref(), &mut alloc)?;
    if args.verbose {
        for bytes in &prepared.refused {
            logging::log_simple(
                log_f,
                None,
                format!("Could not allocate 2 x {} bytes, halving the chunk.", bytes / 2),
            );
        }
    }
    Ok(prepared)
}

fn confirm(device: &str) -> io::Result<bool> {
    eprintln!("WARNING - DESTRUCTIVE TEST");
    eprintln!("Any data saved on {} will be lost!", device);
    eprint!("Continue? [y/n] ");
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y"))
}

fn wait_for_ack() {
    eprint!("Press Enter to exit.");
    let _ = io::stderr().flush();
    let _ = io::stdin().lock().read_line(&mut String::new());
}

fn run_plan(args: DeviceArgs) -> Result<Outcome, FatalError> {
    let log_f: LogFile = None;
    let prepared = prepare_device(&log_f, &args)?;
    logging::log_simple(&log_f, None, format!("Device: {}", args.device.display()));
    describe(&log_f, &prepared.geometry, &prepared.plan);
    Ok(Outcome::Done)
}

fn run_verify(args: VerifyArgs) -> Result<Outcome, FatalError> {
    let log_f = logging::open_log_file(&args.log_file);
    let device = args.device.device.display().to_string();
    logging::log_simple(&log_f, None, format!("DMA test v{}", env!("CARGO_PKG_VERSION")));
    logging::log_simple(&log_f, None, format!("CLI arguments: {:?}", args));

    if !args.yes && !confirm(&device)? {
        logging::log_simple(&log_f, None, "User declined, medium left untouched.");
        return Ok(Outcome::Declined);
    }

    let prepared = prepare_device(&log_f, &args.device)?;
    logging::log_simple(&log_f, None, format!("Device: {}", device));
    describe(&log_f, &prepared.geometry, &prepared.plan);

    let transport = open_device(&args.device.device, &prepared, args.device.use_direct_io())?;
    logging::log_simple(
        &log_f,
        None,
        format!(
            "Opened {} for {} I/O.",
            transport.path().display(),
            if transport.is_direct() { "direct" } else { "buffered" }
        ),
    );

    let mut stop = StopFlag::new();
    if let Err(e) = stop.install_ctrlc() {
        logging::log_simple(&log_f, None, format!("Could not install Ctrl+C handler: {}", e));
    }
    if io::stdin().is_terminal() {
        stop = stop.with_stdin();
        logging::log_simple(
            &log_f,
            None,
            "Press Enter or Ctrl+C to interrupt the test (on-going I/O must complete though).",
        );
    } else {
        logging::log_simple(&log_f, None, "Press Ctrl+C to interrupt the test.");
    }

    let config = args.engine_config();
    logging::log_simple(&log_f, None, format!("Engine: {:?}", config));
    let mut reporter = ConsoleReporter::new(log_f.clone());
    let summary = verify_device(transport, prepared, stop, config, &mut reporter);
    if args.json {
        println!("{}", summary.to_json());
    }
    Ok(Outcome::Done)
}

fn main_logic(cli: Cli) -> Result<Outcome, FatalError> {
    match cli.command {
        Commands::Verify(args) => run_verify(args),
        Commands::Plan(args) => run_plan(args),
    }
}

fn main() {
    let cli = Cli::parse();
    let wait_on_fatal = match &cli.command {
        Commands::Verify(args) => !args.no_wait && io::stdin().is_terminal(),
        Commands::Plan(_) => false,
    };
    let main_result = panic::catch_unwind(panic::AssertUnwindSafe(|| main_logic(cli)));
    let exit_code = match main_result {
        Ok(Ok(Outcome::Done)) | Ok(Ok(Outcome::Declined)) => 0,
        Ok(Err(e)) => {
            eprintln!("[{}] {}", current_timestamp(), e);
            if wait_on_fatal {
                wait_for_ack();
            }
            1
        }
        Err(panic_payload) => {
            let mut panic_msg =
                format!("[{}] A critical error occurred: Test panicked!", current_timestamp());
            if let Some(s) = panic_payload.downcast_ref::<String>() {
                panic_msg.push_str(&format!("\nPanic message: {}", s));
            } else if let Some(s) = panic_payload.downcast_ref::<&str>() {
                panic_msg.push_str(&format!("\nPanic message: {}", s));
            }
            eprintln!("{}", panic_msg);
            101
        }
    };
    std::process::exit(exit_code);
}
