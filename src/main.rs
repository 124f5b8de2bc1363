use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use log::{error, info, warn};
use metcv::backend::BackendRegistry;
use metcv::param::{self, Param};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn start_logger(param: &Param) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    let logger = Logger::try_with_env_or_str(&param.general.log_level)?;
    if param.general.log_base.is_empty() {
        logger.start()
    } else {
        logger
            .log_to_file(
                FileSpec::default()
                    .basename(&param.general.log_base)
                    .suffix(&param.general.log_suffix),
            )
            .duplicate_to_stderr(Duplicate::Warn)
            .start()
    }
}

fn main() -> ExitCode {
    let param_file = std::env::args().nth(1).unwrap_or_else(|| "param.yaml".to_string());

    let param = match param::get(param_file.clone()) {
        Ok(param) => param,
        Err(e) => {
            eprintln!("Cannot use parameter file {}: {}", param_file, e);
            return ExitCode::FAILURE;
        }
    };

    let _logger = match start_logger(&param) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Cannot start logger: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("metcv {} | parameters from {}", metcv::result::version(), param_file);

    // SIGINT/SIGTERM stop scheduling new partitions; running ones finish
    let running = Arc::new(AtomicBool::new(true));
    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            let running = Arc::clone(&running);
            thread::spawn(move || {
                for sig in signals.forever() {
                    warn!("Received signal {}, cancelling remaining partitions...", sig);
                    running.store(false, Ordering::Relaxed);
                }
            });
        }
        Err(e) => warn!("Cannot register signal handlers: {}", e),
    }

    let registry = BackendRegistry::with_builtins();
    let result = match metcv::run(&param, &registry, running) {
        Ok(result) => result,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("{}", result);
    result.log_summary();
    info!("Cross-validation completed in {:.2}s", result.execution_time);

    if !param.general.save_result.is_empty() {
        if let Err(e) = result.save_auto(&param.general.save_result) {
            error!("Cannot save result to {}: {}", param.general.save_result, e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
