use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, LevelFilter};
use simplelog::{Config, WriteLogger};

use pfprof::control::endpoint::ControlEndpoint;
use pfprof::control::handler::ControlHandler;
use pfprof::core::buffer::{SampleBuffer, DEFAULT_BUFFER_BYTES};
use pfprof::procfs::source::ProcfsSource;
use pfprof::profiler::Profiler;
use pfprof::shm::ShmRegion;

/// Name of the shared memory object holding the sample buffer
const SHM_NAME: &str = "/pfprof_samples";
/// Path of the control protocol socket
const SOCKET_PATH: &str = "/tmp/pfprof.sock";

fn main() {
    setup_panic_logging();
    init_logging();

    if let Err(e) = run() {
        error!("{:?}", e);
        eprintln!("pfprof: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let region = ShmRegion::create(SHM_NAME, DEFAULT_BUFFER_BYTES)?;
    let buffer = SampleBuffer::new(region)?;
    let profiler = Arc::new(Profiler::new(ProcfsSource::new(), buffer));

    let endpoint = ControlEndpoint::launch(
        PathBuf::from(SOCKET_PATH),
        ControlHandler::new(Arc::clone(&profiler)),
    )?;

    info!(
        "pfprof started: {} sample slots in {:?}, control on {:?}",
        profiler.buffer().capacity(),
        SHM_NAME,
        endpoint.path()
    );

    wait_for_shutdown_signal()?;

    // Quiesce sampling before the buffer and its mapping are torn down
    profiler.shutdown();
    info!("pfprof stopped");

    Ok(())
}

fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])?;

    if let Some(signal) = signals.forever().next() {
        info!("Received signal {}, shutting down", signal);
    }

    Ok(())
}

fn setup_panic_logging() {
    // As panics are erased by the application exiting, log the panic as an error
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        error!("Panic occured: {:?}", info);
        default_hook(info);
    }))
}

fn init_logging() {
    let log_file = OpenOptions::new()
        .append(true)
        .create(true)
        .open("pfprof.log")
        .expect("Could not open log file");

    WriteLogger::init(LevelFilter::Debug, Config::default(), log_file)
        .expect("Could not initialize logging");
}
