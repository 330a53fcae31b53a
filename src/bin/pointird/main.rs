mod cli;

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, error, info};

use pointir::calibration_store::CalibrationStore;
use pointir::controller::{ControlAction, Controller, HookListener};
use pointir::daemon_config::DaemonConfig;
use pointir::filter::{FilterChain, LimitNumberFilter, OffscreenFilter};
use pointir::processor::Processor;
use pointir::registry::Registries;

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();
    debug!("started; args: {:?}", cli);

    match run(cli) {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn config_from(cli: &Cli) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.device = cli.device.clone();
    config.width = cli.width;
    config.height = cli.height;
    config.fps = cli.fps;
    config.capture = cli.capture.clone();
    if !cli.outputs.is_empty() {
        config.outputs = cli.outputs.clone();
    }
    if !cli.controllers.is_empty() {
        config.controllers = cli.controllers.clone();
    }
    config.tracker = cli.tracker.clone();
    config.intensity_threshold = cli.intensity_threshold;
    config.point_limit = cli.point_limit;
    config.data_directory = PathBuf::from(&cli.data_directory);
    config.socket_directory = PathBuf::from(&cli.socket_directory);
    config.calibration_begin_hook = cli.calib_begin_hook.clone();
    config.calibration_end_hook = cli.calib_end_hook.clone();
    config
}

fn run(cli: Cli) -> Result<()> {
    let config = config_from(&cli);
    debug!(
        "effective config: {}",
        serde_json::to_string(&config).unwrap_or_default()
    );

    let registries = Registries::new();
    let store = CalibrationStore::new(config.data_directory.clone());

    let capture = registries
        .make_capture(&config.capture, &config)
        .context("capture setup failed")?;
    let detector = registries
        .make_detector("contour", &config)
        .context("detector setup failed")?;
    let mut unprojector = registries
        .make_unprojector("auto", &config)
        .context("unprojector setup failed")?;
    store.load(&mut unprojector);

    let mut processor = Processor::new(capture, detector, unprojector);
    processor.set_advance_timeout(config.advance_timeout_s);

    let mut filter = FilterChain::new();
    filter.append(Box::new(OffscreenFilter::new(config.offscreen_tolerance)));
    if let Some(limit) = config.point_limit {
        filter.append(Box::new(LimitNumberFilter::new(limit)));
    }
    processor.set_filter(filter);

    for name in &config.outputs {
        registries
            .add_outputs(&mut processor, name, &config)
            .context("output setup failed")?;
    }

    if config.calibration_begin_hook.is_some() || config.calibration_end_hook.is_some() {
        processor.add_calibration_listener(Box::new(HookListener::new(
            config.calibration_begin_hook.clone(),
            config.calibration_end_hook.clone(),
        )));
    }

    let mut controllers: Vec<Box<dyn Controller>> = Vec::new();
    for name in &config.controllers {
        controllers.push(
            registries
                .make_controller(name, &config)
                .context("controller setup failed")?,
        );
    }

    processor.start();

    let mut running = true;
    while running {
        for controller in controllers.iter_mut() {
            if controller.dispatch(&mut processor, &store) == ControlAction::Shutdown {
                info!("shutdown requested");
                running = false;
            }
        }
        if !running {
            break;
        }
        if processor.is_processing() {
            processor.tick();
        } else {
            thread::sleep(Duration::from_secs(1));
        }
    }

    processor.stop();
    Ok(())
}
