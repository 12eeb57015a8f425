use clap::{value_parser, Arg, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use spdlog::formatter::{pattern, PatternFormatter};
use spdlog::sink::{FileSink, StdStream, StdStreamSink};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use libxpcs_workflow::config::Config;
use libxpcs_workflow::detector_profile::DetectorProfiles;
use libxpcs_workflow::dispatcher::WorkflowDispatcher;
use libxpcs_workflow::exporter::MetadataExporter;
use libxpcs_workflow::instrument::Instrument;
use libxpcs_workflow::process::{process_series, SeriesPlan};
use libxpcs_workflow::series_status::SeriesPhase;
use libxpcs_workflow::soft::{SoftClient, SoftDetector};

fn init_logging() {
    let file_sink = Arc::new(
        FileSink::builder()
            .path(PathBuf::from("./xpcs_workflow.log"))
            .formatter(Box::new(PatternFormatter::new(pattern!(
                "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
            ))))
            .truncate(true)
            .build()
            .expect("Could not create log file!"),
    );
    let term_sink = Arc::new(
        StdStreamSink::builder()
            .std_stream(StdStream::Stdout)
            .formatter(Box::new(PatternFormatter::new(pattern!("[{^{level}}] {payload}{eol}"))))
            .build()
            .expect("Could not create terminal logger!"),
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .sink(term_sink)
            .build()
            .expect("Could not create logger!"),
    );
    spdlog::set_default_logger(logger);
}

fn make_template_config(path: &Path) {
    match Config::default().write_config_file(path) {
        Ok(()) => spdlog::info!("Done."),
        Err(e) => spdlog::error!("{e}"),
    }
}

/// A dispatcher outside of an instrument, for the stand-alone DM commands
fn standalone_dispatcher(config: &Config) -> Option<WorkflowDispatcher> {
    let profiles = match DetectorProfiles::new(config.detector_profiles_path.as_deref()) {
        Ok(p) => p,
        Err(e) => {
            spdlog::error!("{e}");
            return None;
        }
    };
    let exporter = MetadataExporter::new(config.mount_remap.clone(), profiles);
    match WorkflowDispatcher::new(config, exporter, None) {
        Ok(d) => Some(d),
        Err(e) => {
            spdlog::error!("Workflow names must be set in the config without registers: {e}");
            None
        }
    }
}

fn list_jobs(config: &Config) {
    let Some(dispatcher) = standalone_dispatcher(config) else {
        return;
    };
    if let Err(e) = dispatcher.list_jobs() {
        spdlog::error!("Listing DM jobs failed with error: {e}");
    }
}

fn submit(config: &Config, matches: &ArgMatches, analysis: bool) {
    let Some(mut dispatcher) = standalone_dispatcher(config) else {
        return;
    };
    let file = matches
        .get_one::<PathBuf>("file")
        .expect("File argument is required");
    let result = if analysis {
        if let Some(qmap) = matches.get_one::<String>("qmap") {
            dispatcher.set_xpcs_qmap_file(qmap);
        }
        dispatcher.data_analysis(file, None, None)
    } else {
        dispatcher.data_transfer(file)
    };
    match result {
        Ok(job) => spdlog::info!(
            "Submitted {} to {} in {:.2}s: {}",
            job.file_path.display(),
            job.workflow,
            job.elapsed.as_secs_f64(),
            job.stdout
        ),
        Err(e) => spdlog::error!("Submission failed with error: {e}"),
    }
}

/// Run an exposure series against soft channels
fn simulate(config: Config, matches: &ArgMatches) {
    let client = Arc::new(SoftClient::new());
    let mut instrument = match Instrument::connect(config, client) {
        Ok(i) => i,
        Err(e) => {
            spdlog::error!("{e}");
            return;
        }
    };
    if let Some(qmap) = matches.get_one::<String>("qmap") {
        instrument.dispatcher_mut().set_xpcs_qmap_file(qmap);
    }
    let trigger = instrument
        .catalog()
        .device(&instrument.config().detector_device)
        .and_then(|spec| spec.trigger.clone())
        .expect("Connected detector has a trigger");
    let busy = Duration::from_millis(*matches.get_one::<u64>("busy").unwrap_or(&200));
    if let Err(e) = SoftDetector::attach(instrument.detector().device(), &trigger, busy) {
        spdlog::error!("{e}");
        return;
    }
    let det_num = *matches.get_one::<u32>("det_num").unwrap_or(&25);
    if let Err(e) = instrument.registers().set("det_num", det_num) {
        spdlog::error!("{e}");
        return;
    }

    let root = matches
        .get_one::<String>("root")
        .cloned()
        .unwrap_or_else(|| String::from("./simulated/"));
    let plan = SeriesPlan {
        num_iter: *matches.get_one::<usize>("iterations").unwrap_or(&2),
        file_path: root,
        ..Default::default()
    };
    spdlog::info!("Simulating {} exposures into {}", plan.num_iter, plan.file_path);

    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}% {msg}") {
        pb.set_style(style);
    }
    let (tx, rx) = channel();
    let result = std::thread::scope(|scope| {
        let handle = scope.spawn(|| process_series(&instrument, &plan, &tx));
        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(status) => {
                    pb.set_position((status.progress() * 100.0) as u64);
                    match status.phase {
                        SeriesPhase::Acquiring => pb.set_message(status.file_name.clone()),
                        SeriesPhase::Stopped => pb.set_message("stopped"),
                        SeriesPhase::Done => pb.set_message("done"),
                        SeriesPhase::Submitted => (),
                    }
                }
                Err(_) if handle.is_finished() => break,
                Err(_) => (),
            }
        }
        handle.join()
    });
    pb.finish();

    match result {
        Ok(Ok(kickoffs)) => {
            for kickoff in kickoffs {
                let path = kickoff.path.clone();
                match kickoff.join() {
                    Some(job) => spdlog::info!("{} -> {}: {}", path.display(), job.workflow, job.stdout),
                    None => spdlog::error!("Workflow for {} could not be submitted", path.display()),
                }
            }
            spdlog::info!("Successfully ran exposure series!");
        }
        Ok(Err(e)) => spdlog::error!("Exposure series failed with error: {e}"),
        Err(_) => spdlog::error!("Failed to join exposure series task!"),
    }
}

fn main() {
    // Create a cli
    let file_arg = Arg::new("file")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Workflow file to submit");
    let matches = Command::new("xpcs_workflow_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("jobs").about("List the most recent DM processing jobs"))
        .subcommand(
            Command::new("transfer")
                .about("Submit a workflow file to the transfer workflow")
                .arg(file_arg.clone()),
        )
        .subcommand(
            Command::new("analysis")
                .about("Submit a workflow file to the XPCS analysis workflow")
                .arg(file_arg)
                .arg(
                    Arg::new("qmap")
                        .short('q')
                        .long("qmap")
                        .help("Qmap file name in the partition map library"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run an exposure series against a simulated beamline")
                .arg(
                    Arg::new("iterations")
                        .short('n')
                        .long("iterations")
                        .value_parser(value_parser!(usize))
                        .help("Number of exposures"),
                )
                .arg(
                    Arg::new("root")
                        .short('r')
                        .long("root")
                        .help("Root folder of the simulated data"),
                )
                .arg(
                    Arg::new("det_num")
                        .short('d')
                        .long("det-num")
                        .value_parser(value_parser!(u32))
                        .help("Detector profile number"),
                )
                .arg(
                    Arg::new("qmap")
                        .short('q')
                        .long("qmap")
                        .help("Qmap file name used by the analysis jobs"),
                )
                .arg(
                    Arg::new("busy")
                        .long("busy-ms")
                        .value_parser(value_parser!(u64))
                        .help("Simulated acquisition time in milliseconds"),
                ),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    init_logging();

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        spdlog::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        return;
    }

    // Load our config
    spdlog::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            return;
        }
    };
    spdlog::info!("Config successfully loaded.");
    spdlog::info!("Register device: {}", config.register_device);
    spdlog::info!("Detector device: {}", config.detector_device);
    spdlog::info!("Qmap root: {}", config.qmap_root.to_string_lossy());

    match matches.subcommand() {
        Some(("jobs", _)) => list_jobs(&config),
        Some(("transfer", sub)) => submit(&config, sub, false),
        Some(("analysis", sub)) => submit(&config, sub, true),
        Some(("simulate", sub)) => simulate(config, sub),
        _ => spdlog::error!("No command given, try --help"),
    }
    spdlog::info!("Done.");
}
