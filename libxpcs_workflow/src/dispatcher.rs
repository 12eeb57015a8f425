use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

use super::config::Config;
use super::error::{DispatchError, RegisterError};
use super::exporter::MetadataExporter;
use super::registers::Registers;

const QMAP_EXTENSION: &str = "h5";
const BANNER_WIDTH: usize = 30;

/// APS run cycle of a date: `YYYY-1` for January to April, `-2` for May to August,
/// `-3` for September to December
pub fn aps_cycle(date: Date) -> String {
    let month = u8::from(date.month());
    format!("{}-{}", date.year(), (month - 1) / 4 + 1)
}

/// Force the `.h5` extension on a qmap file name
pub fn xpcs_qmap_file_name(name: &str) -> String {
    if name.ends_with(".h5") {
        return name.to_string();
    }
    Path::new(name)
        .with_extension(QMAP_EXTENSION)
        .to_string_lossy()
        .to_string()
}

fn timestamp(when: OffsetDateTime) -> String {
    when.format(&Rfc3339).unwrap_or_else(|_| when.to_string())
}

fn workflow_from(
    configured: &Option<String>,
    registers: Option<&Registers>,
    register: &str,
) -> Result<String, RegisterError> {
    match (configured, registers) {
        (Some(name), _) => Ok(name.clone()),
        (None, Some(registers)) => registers.text(register),
        (None, None) => Err(RegisterError::UnknownRegister(register.to_string())),
    }
}

/// The record of one submission to the DM processing tools
#[derive(Debug, Clone)]
pub struct WorkflowJob {
    pub workflow: String,
    pub file_path: PathBuf,
    pub qmap_path: Option<PathBuf>,
    pub group_name: Option<String>,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub started: OffsetDateTime,
    pub elapsed: Duration,
}

/// Handle to a workflow submission running in the background.
///
/// Dropping the handle detaches the worker; it keeps running and logs its own result.
#[derive(Debug)]
pub struct WorkflowKickoff {
    pub path: PathBuf,
    pub handle: JoinHandle<Option<WorkflowJob>>,
}

impl WorkflowKickoff {
    /// Wait for the worker. None if the submission could not be run at all.
    pub fn join(self) -> Option<WorkflowJob> {
        match self.handle.join() {
            Ok(job) => job,
            Err(_) => {
                spdlog::error!("DM workflow worker for {} panicked", self.path.display());
                None
            }
        }
    }
}

/// WorkflowDispatcher hands workflow files to the APS Data Management tools.
///
/// Every DM tool is run through the configured shell, optionally after sourcing the
/// DM setup script. Job ids are not tracked; `list_jobs` is for diagnostics only.
#[derive(Debug, Clone)]
pub struct WorkflowDispatcher {
    transfer: String,
    analysis: String,
    qmap_folder: PathBuf,
    xpcs_qmap_file: String,
    xpcs_group_name: String,
    setup_script: Option<PathBuf>,
    shell: String,
    start_job_command: String,
    list_jobs_command: String,
    list_jobs_limit: usize,
    exporter: MetadataExporter,
}

impl WorkflowDispatcher {
    /// Create the dispatcher. Workflow names missing from the configuration are read
    /// from the `transfer` and `analysis` registers.
    pub fn new(
        config: &Config,
        exporter: MetadataExporter,
        registers: Option<&Registers>,
    ) -> Result<Self, RegisterError> {
        let transfer = workflow_from(&config.transfer_workflow, registers, "transfer")?;
        let analysis = workflow_from(&config.analysis_workflow, registers, "analysis")?;
        let cycle = match &config.aps_cycle {
            Some(cycle) => cycle.clone(),
            None => aps_cycle(OffsetDateTime::now_utc().date()),
        };
        spdlog::info!("Setting up DM workflow dispatcher for APS operating cycle {cycle}");
        Ok(Self {
            transfer,
            analysis,
            qmap_folder: config.qmap_root.join(cycle),
            xpcs_qmap_file: xpcs_qmap_file_name(&config.xpcs_qmap_file),
            xpcs_group_name: config.xpcs_group_name.clone(),
            setup_script: config.dm_setup_script.clone(),
            shell: config.shell.clone(),
            start_job_command: config.start_job_command.clone(),
            list_jobs_command: config.list_jobs_command.clone(),
            list_jobs_limit: config.list_jobs_limit,
            exporter,
        })
    }

    pub fn exporter(&self) -> &MetadataExporter {
        &self.exporter
    }

    pub fn workflow_name(&self, analysis: bool) -> &str {
        if analysis {
            &self.analysis
        } else {
            &self.transfer
        }
    }

    /// (Re)define the qmap file used by analysis jobs
    pub fn set_xpcs_qmap_file(&mut self, name: &str) {
        self.xpcs_qmap_file = xpcs_qmap_file_name(name);
    }

    pub fn default_qmap_path(&self) -> PathBuf {
        self.qmap_folder.join(&self.xpcs_qmap_file)
    }

    fn setup_prefix(&self) -> String {
        match &self.setup_script {
            Some(script) => format!("source {}; ", script.display()),
            None => String::new(),
        }
    }

    /// Run a command through the shell, returning its trimmed (stdout, stderr).
    ///
    /// Anything written to stderr is logged as an error, and returned as one if
    /// `raises` is set.
    pub fn unix(&self, command: &str, raises: bool) -> Result<(String, String), DispatchError> {
        if !cfg!(unix) {
            return Err(DispatchError::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            ));
        }
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            spdlog::error!("Command `{command}` returned error:\n{stderr}");
            if raises {
                return Err(DispatchError::Stderr {
                    command: command.to_string(),
                    stderr,
                });
            }
        }
        Ok((stdout, stderr))
    }

    pub fn transfer_command(&self, file_path: &Path) -> String {
        format!(
            "{}{} --workflow-name={} filePath:{}",
            self.setup_prefix(),
            self.start_job_command,
            self.transfer,
            file_path.display()
        )
    }

    pub fn analysis_command(&self, file_path: &Path, qmap_path: &Path, group_name: &str) -> String {
        format!(
            "{}{} --workflow-name={} filePath:{} qmapFile:{} xpcsGroupName:{}",
            self.setup_prefix(),
            self.start_job_command,
            self.analysis,
            file_path.display(),
            qmap_path.display(),
            group_name
        )
    }

    fn submit(
        &self,
        file_path: &Path,
        analysis: Option<(PathBuf, String)>,
        raises: bool,
    ) -> Result<WorkflowJob, DispatchError> {
        let started = OffsetDateTime::now_utc();
        let timer = Instant::now();
        let (workflow, command, qmap_path, group_name) = match analysis {
            Some((qmap, group)) => {
                spdlog::info!(
                    "DM workflow call is made for XPCS analysis: {}, {} ----{}",
                    file_path.display(),
                    qmap.display(),
                    timestamp(started)
                );
                (
                    self.analysis.clone(),
                    self.analysis_command(file_path, &qmap, &group),
                    Some(qmap),
                    Some(group),
                )
            }
            None => {
                spdlog::info!(
                    "DM workflow call is made for data transfer: {} ----{}",
                    file_path.display(),
                    timestamp(started)
                );
                (
                    self.transfer.clone(),
                    self.transfer_command(file_path),
                    None,
                    None,
                )
            }
        };
        let (stdout, stderr) = self.unix(&command, raises)?;
        Ok(WorkflowJob {
            workflow,
            file_path: file_path.to_path_buf(),
            qmap_path,
            group_name,
            command,
            stdout,
            stderr,
            started,
            elapsed: timer.elapsed(),
        })
    }

    /// Submit a transfer job for a workflow file. Blocks until the DM tool returns.
    pub fn data_transfer(&self, file_path: &Path) -> Result<WorkflowJob, DispatchError> {
        self.submit(file_path, None, true)
    }

    /// Submit an analysis job for a workflow file. Blocks until the DM tool returns.
    ///
    /// The qmap defaults to the configured file in the current cycle's partition map
    /// library, and the group to the configured XPCS group.
    pub fn data_analysis(
        &self,
        file_path: &Path,
        qmap_path: Option<&Path>,
        group_name: Option<&str>,
    ) -> Result<WorkflowJob, DispatchError> {
        let qmap = match qmap_path {
            Some(q) => q.to_path_buf(),
            None => self.default_qmap_path(),
        };
        let group = group_name.unwrap_or(&self.xpcs_group_name).to_string();
        self.submit(file_path, Some((qmap, group)), true)
    }

    /// Most recent processing jobs, newest first. Read-only.
    pub fn list_jobs(&self) -> Result<Vec<String>, DispatchError> {
        let command = format!(
            "{}{} | sort -r | head -n {}",
            self.setup_prefix(),
            self.list_jobs_command,
            self.list_jobs_limit
        );
        let (stdout, _) = self.unix(&command, true)?;
        let banner = "*".repeat(BANNER_WIDTH);
        spdlog::info!("{banner}");
        spdlog::info!("{stdout}");
        spdlog::info!("{banner}");
        Ok(stdout.lines().map(String::from).collect())
    }

    /// Write the workflow file for the current registers and submit it in the background.
    ///
    /// Returns once the file is written and the worker is running. Errors of the
    /// submission itself never reach the caller; the worker logs them.
    pub fn start_workflow(
        &self,
        registers: &Registers,
        analysis: bool,
    ) -> Result<WorkflowKickoff, DispatchError> {
        let workflow_kind = if analysis { "analysis" } else { "transfer" };
        spdlog::info!("Starting DM workflow: {workflow_kind}");
        let snapshot = registers.snapshot()?;
        let path = self.exporter.export(&snapshot)?;
        spdlog::info!("Created workflow file {}", path.display());

        let dispatcher = self.clone();
        let file_path = path.clone();
        let handle = std::thread::spawn(move || {
            spdlog::info!(
                "DM workflow starting: workflow:{workflow_kind} file:{}",
                file_path.display()
            );
            let job_analysis = if analysis {
                Some((
                    dispatcher.default_qmap_path(),
                    dispatcher.xpcs_group_name.clone(),
                ))
            } else {
                None
            };
            match dispatcher.submit(&file_path, job_analysis, false) {
                Ok(job) => {
                    spdlog::info!("{}", job.stdout);
                    spdlog::info!(
                        "DM workflow kickoff done: {:.3}s",
                        job.elapsed.as_secs_f64()
                    );
                    Some(job)
                }
                Err(e) => {
                    spdlog::error!("DM workflow {workflow_kind} failed: {e}");
                    None
                }
            }
        });
        Ok(WorkflowKickoff { path, handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeviceCatalog;
    use crate::detector_profile::DetectorProfiles;
    use crate::exporter::MountRemap;
    use crate::soft::SoftClient;
    use time::Month;

    fn registers(client: &SoftClient) -> Registers {
        let catalog = DeviceCatalog::new(None).unwrap();
        Registers::new(catalog.build("dm_pars", client).unwrap())
    }

    fn dispatcher(config: &Config, client: &SoftClient) -> WorkflowDispatcher {
        let exporter = MetadataExporter::new(
            vec![MountRemap::default()],
            DetectorProfiles::new(None).unwrap(),
        );
        WorkflowDispatcher::new(config, exporter, Some(&registers(client))).unwrap()
    }

    fn local_config() -> Config {
        Config {
            aps_cycle: Some(String::from("2019-2")),
            dm_setup_script: None,
            shell: String::from("sh"),
            ..Default::default()
        }
    }

    #[test]
    fn test_aps_cycle() {
        let date = |m| Date::from_calendar_date(2019, m, 15).unwrap();
        assert_eq!(aps_cycle(date(Month::January)), "2019-1");
        assert_eq!(aps_cycle(date(Month::April)), "2019-1");
        assert_eq!(aps_cycle(date(Month::May)), "2019-2");
        assert_eq!(aps_cycle(date(Month::August)), "2019-2");
        assert_eq!(aps_cycle(date(Month::September)), "2019-3");
        assert_eq!(aps_cycle(date(Month::December)), "2019-3");
    }

    #[test]
    fn test_qmap_extension() {
        assert_eq!(xpcs_qmap_file_name("Lambda_qmap.h5"), "Lambda_qmap.h5");
        assert_eq!(xpcs_qmap_file_name("Lambda_qmap.hdf"), "Lambda_qmap.h5");
        assert_eq!(xpcs_qmap_file_name("Lambda_qmap"), "Lambda_qmap.h5");
    }

    #[test]
    fn test_commands() {
        let client = SoftClient::new();
        let config = Config {
            aps_cycle: Some(String::from("2019-2")),
            ..Default::default()
        };
        let mut dm = dispatcher(&config, &client);
        let file = Path::new("/home/8-id-i/2019-2/A024/A024_0001-0100.hdf");
        assert_eq!(
            dm.transfer_command(file),
            "source /home/dm/etc/dm.setup.sh; dm-start-processing-job --workflow-name=xpcs8-01-Lambda filePath:/home/8-id-i/2019-2/A024/A024_0001-0100.hdf"
        );
        dm.set_xpcs_qmap_file("rigaku_qmap");
        assert_eq!(
            dm.default_qmap_path(),
            PathBuf::from("/home/8-id-i/partitionMapLibrary/2019-2/rigaku_qmap.h5")
        );
        assert!(dm
            .analysis_command(file, &dm.default_qmap_path(), "/xpcs")
            .ends_with(
                "--workflow-name=xpcs8-02-Lambda filePath:/home/8-id-i/2019-2/A024/A024_0001-0100.hdf qmapFile:/home/8-id-i/partitionMapLibrary/2019-2/rigaku_qmap.h5 xpcsGroupName:/xpcs"
            ));
    }

    #[test]
    fn test_workflow_names_fall_back_to_registers() {
        let client = SoftClient::new();
        let regs = registers(&client);
        regs.set("transfer", "xpcs8-01-Rigaku").unwrap();
        regs.set("analysis", "xpcs8-02-Rigaku").unwrap();
        let config = Config {
            transfer_workflow: None,
            analysis_workflow: None,
            ..local_config()
        };
        let dm = dispatcher(&config, &client);
        assert_eq!(dm.workflow_name(false), "xpcs8-01-Rigaku");
        assert_eq!(dm.workflow_name(true), "xpcs8-02-Rigaku");
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_stderr() {
        let client = SoftClient::new();
        let dm = dispatcher(&local_config(), &client);
        assert_eq!(
            dm.unix("echo hello", true).unwrap(),
            (String::from("hello"), String::new())
        );
        assert!(matches!(
            dm.unix("echo oops >&2", true),
            Err(DispatchError::Stderr { .. })
        ));
        let (_, stderr) = dm.unix("echo oops >&2", false).unwrap();
        assert_eq!(stderr, "oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_list_jobs_is_repeatable() {
        let client = SoftClient::new();
        let config = Config {
            list_jobs_command: String::from("printf 'a\\nc\\nb\\n'"),
            list_jobs_limit: 2,
            ..local_config()
        };
        let dm = dispatcher(&config, &client);
        let first = dm.list_jobs().unwrap();
        assert_eq!(first, vec![String::from("c"), String::from("b")]);
        assert_eq!(dm.list_jobs().unwrap(), first);
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_transfer() {
        let client = SoftClient::new();
        let config = Config {
            start_job_command: String::from("echo"),
            ..local_config()
        };
        let dm = dispatcher(&config, &client);
        let job = dm.data_transfer(Path::new("/tmp/A001.hdf")).unwrap();
        assert_eq!(job.stdout, "--workflow-name=xpcs8-01-Lambda filePath:/tmp/A001.hdf");
        assert_eq!(job.workflow, "xpcs8-01-Lambda");
        assert!(job.qmap_path.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_background_stderr_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let client = SoftClient::new();
        let regs = registers(&client);
        regs.set("root_folder", dir.path().to_string_lossy().to_string())
            .unwrap();
        regs.set("data_folder", "A001").unwrap();
        regs.set("data_end", 10u32).unwrap();
        regs.set("det_num", 25u32).unwrap();
        let config = Config {
            start_job_command: String::from(">&2 echo"),
            ..local_config()
        };
        let dm = dispatcher(&config, &client);

        let kickoff = dm.start_workflow(&regs, true).unwrap();
        assert!(kickoff.path.exists());
        let job = kickoff.join().unwrap();
        assert!(job.stderr.starts_with("--workflow-name=xpcs8-02-Lambda"));
        assert!(job.stdout.is_empty());
    }
}
