mod cli;
mod ops;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use shutter_config::{Config, Logging};
use shutter_link::{SharedLink, ShutterCmdLink, SimulatedLink};
use shutter_traits::MotorLink;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, FILE_GUARD};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let cfg = shutter_config::load_path(&args.config)?;
    init_tracing(args.log_level.as_deref(), &cfg.logging);

    match args.cmd {
        Commands::CheckConfig => {
            println!(
                "OK: {} shutters, {} switch bindings",
                cfg.shutters.len(),
                cfg.switches.len()
            );
            Ok(())
        }
        Commands::Status => ops::print_status(&cfg),
        Commands::Run => {
            let stop = Arc::new(AtomicBool::new(false));
            let stop_flag = Arc::clone(&stop);
            ctrlc::set_handler(move || stop_flag.store(true, Ordering::Relaxed))
                .wrap_err("installing signal handler")?;
            ops::run_service(&cfg, build_link(&cfg, args.simulate), stop)
        }
        Commands::Drive { shutter, target } => {
            ops::drive_once(&cfg, build_link(&cfg, args.simulate), &shutter, target)
        }
    }
}

/// All workers share one bridge; the serial bus takes one command at a time.
fn build_link(cfg: &Config, simulate: bool) -> SharedLink<Box<dyn MotorLink + Send>> {
    let inner: Box<dyn MotorLink + Send> = if simulate {
        tracing::info!("simulated link: motor commands are logged, not sent");
        Box::new(SimulatedLink::new())
    } else {
        Box::new(ShutterCmdLink::new(
            cfg.link.command.as_str(),
            Duration::from_millis(cfg.link.send_delay_ms),
        ))
    };
    SharedLink::new(inner)
}

fn init_tracing(level_override: Option<&str>, logging: &Logging) {
    let level = level_override
        .or(logging.level.as_deref())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &logging.file {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "shutterd.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            builder.with_writer(writer).with_ansi(false).init();
        }
        None => builder.init(),
    }
}
