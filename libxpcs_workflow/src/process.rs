use std::sync::mpsc::Sender;
use std::time::Duration;

use super::dispatcher::WorkflowKickoff;
use super::error::ProcessError;
use super::instrument::Instrument;
use super::sequencer::{dm_stage_config, ExposureDescriptor};
use super::series_status::{SeriesPhase, SeriesStatus};

/// A repeated acquisition of one sample
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPlan {
    pub num_iter: usize,
    pub sample_name: String,
    pub sample_prefix: String,
    pub sample_suffix: String,
    /// Directory the detector writes into
    pub file_path: String,
    pub num_images: u32,
    pub exposure_time: f64,
    pub exposure_period: f64,
    pub submit_analysis: bool,
    /// How long to wait for each acquisition, None waits forever
    pub timeout: Option<Duration>,
}

impl Default for SeriesPlan {
    fn default() -> Self {
        Self {
            num_iter: 2,
            sample_name: String::from("test"),
            sample_prefix: String::from("A"),
            sample_suffix: String::from("Rq0"),
            file_path: String::from("/home/8-id-i/"),
            num_images: 100,
            exposure_time: 0.1,
            exposure_period: 0.1,
            submit_analysis: true,
            timeout: None,
        }
    }
}

impl SeriesPlan {
    /// File name of one exposure, `{prefix}{run:03}_{sample}_{suffix}_{iteration+1:05}`
    pub fn file_name(&self, run_number: f64, iteration: usize) -> String {
        format!(
            "{}{:03.0}_{}_{}_{:05}",
            self.sample_prefix,
            run_number,
            self.sample_name,
            self.sample_suffix,
            iteration + 1
        )
    }

    fn descriptor(&self, file_name: &str) -> ExposureDescriptor {
        ExposureDescriptor {
            file_path: self.file_path.clone(),
            file_name: file_name.to_string(),
            num_images: self.num_images,
            exposure_time: self.exposure_time,
            exposure_period: self.exposure_period,
            submit_analysis: self.submit_analysis,
        }
    }
}

/// Acquire one exposure and hand it to the DM workflow.
///
/// The detector is always unstaged, even if the acquisition failed. An acquisition that
/// times out is aborted, so the detector can be triggered again. The registers are
/// then updated with the exposure settings and the workflow is started in the
/// background.
pub fn acquire_exposure(
    instrument: &Instrument,
    descriptor: &ExposureDescriptor,
    timeout: Option<Duration>,
) -> Result<WorkflowKickoff, ProcessError> {
    let detector = instrument.detector();
    detector.stage(&dm_stage_config(descriptor))?;
    let acquired = detector
        .trigger()
        .map_err(ProcessError::from)
        .and_then(|status| {
            status.wait(timeout).map_err(|e| {
                // Frees the detector for the next trigger
                detector.abort(&e.to_string());
                ProcessError::from(e)
            })
        });
    let unstaged = detector.unstage();
    acquired?;
    unstaged?;
    spdlog::info!("Acquired {}", descriptor.file_name);

    let data_file_name = match detector.plugin_file_name()? {
        Some(name) if !name.is_empty() => name,
        _ => descriptor.file_name.clone(),
    };
    let registers = instrument.registers();
    registers.set("exposure_time", descriptor.exposure_time)?;
    registers.set("exposure_period", descriptor.exposure_period)?;
    registers.set("data_begin", 1u32)?;
    registers.set("data_end", descriptor.num_images)?;
    registers.set("root_folder", descriptor.file_path.as_str())?;
    registers.set("data_folder", descriptor.file_name.as_str())?;
    registers.set("datafilename", data_file_name)?;

    Ok(instrument
        .dispatcher()
        .start_workflow(registers, descriptor.submit_analysis)?)
}

/// The main loop of an exposure series.
///
/// Increments the run number once, then acquires `num_iter` exposures. Before each one,
/// a non-zero `stop_before_next_scan` register ends the series (and is reset). Returns
/// the kickoff of every submitted workflow.
pub fn process_series(
    instrument: &Instrument,
    plan: &SeriesPlan,
    tx: &Sender<SeriesStatus>,
) -> Result<Vec<WorkflowKickoff>, ProcessError> {
    let registers = instrument.registers();
    let run_number = registers.number("arun_number")? + 1.0;
    registers.set("arun_number", run_number)?;
    spdlog::info!("Starting series of {} for run {run_number}", plan.num_iter);

    let mut kickoffs = Vec::with_capacity(plan.num_iter);
    for iteration in 0..plan.num_iter {
        if registers.number("stop_before_next_scan")? != 0.0 {
            spdlog::info!("Received signal to stop before next scan");
            registers.set("stop_before_next_scan", 0u32)?;
            tx.send(SeriesStatus::new(
                iteration,
                plan.num_iter,
                SeriesPhase::Stopped,
                "",
            ))?;
            return Ok(kickoffs);
        }

        let file_name = plan.file_name(run_number, iteration);
        tx.send(SeriesStatus::new(
            iteration,
            plan.num_iter,
            SeriesPhase::Acquiring,
            &file_name,
        ))?;
        kickoffs.push(acquire_exposure(
            instrument,
            &plan.descriptor(&file_name),
            plan.timeout,
        )?);
        tx.send(SeriesStatus::new(
            iteration,
            plan.num_iter,
            SeriesPhase::Submitted,
            &file_name,
        ))?;
    }

    tx.send(SeriesStatus::new(
        plan.num_iter,
        plan.num_iter,
        SeriesPhase::Done,
        "",
    ))?;
    spdlog::info!("Series for run {run_number} done");
    Ok(kickoffs)
}
