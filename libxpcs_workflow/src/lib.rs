//! # xpcs_workflow
//!
//! xpcs_workflow binds the 8-ID-I XPCS beamline hardware to the APS Data Management (DM)
//! workflow, written in Rust. It drives an area detector through one acquisition
//! (stage, trigger, wait, unstage), writes the beamline metadata registers to an HDF5
//! workflow file, and submits that file to the DM processing tools for transfer or
//! XPCS analysis.
//!
//! ## Installation
//!
//! Currently the only method of install is from source.
//!
//! ### HDF5
//!
//! Before building, HDF5 must be installed. Typically this will be installed using a
//! package manager (homebrew, apt, etc), and the Rust libraries will auto detect the
//! location of the HDF install. If HDF5 lives in a custom location, write the following
//! snippet into the file `.cargo/config.toml` in the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Platform Support
//!
//! The DM tools are run through a Unix shell, so submitting jobs only works on Linux and
//! MacOS. Everything else builds on all platforms.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./xpcs_workflow_cli` from the
//! top level repository.
//!
//! ## Control System
//!
//! The crate does not speak any control-system protocol itself. Hardware is reached
//! through the [`channel::ControlClient`] and [`channel::Channel`] traits. The
//! [`soft`] module provides an in-memory implementation used by the tests and the
//! `simulate` command of the CLI.
//!
//! ## Configuration
//!
//! The YAML format of a configuration file is as follows (all fields are optional):
//!
//! ```yml
//! catalog_path: null
//! detector_profiles_path: null
//! register_device: dm_pars
//! detector_device: lambdadet
//! connect_timeout_secs: 10.0
//! transfer_workflow: xpcs8-01-Lambda
//! analysis_workflow: xpcs8-02-Lambda
//! qmap_root: /home/8-id-i/partitionMapLibrary
//! xpcs_qmap_file: Lambda_qmap.h5
//! xpcs_group_name: /xpcs
//! aps_cycle: null
//! mount_remap:
//! - from: /data
//!   to: /home/8-id-i
//! dm_setup_script: /home/dm/etc/dm.setup.sh
//! shell: bash
//! start_job_command: dm-start-processing-job
//! list_jobs_command: dm-list-processing-jobs --display-keys=startTime,endTime,sgeJobName,status,stage,runTime,id
//! list_jobs_limit: 10
//! ```
//!
//! If `catalog_path` or `detector_profiles_path` is `null`, the tables bundled with the
//! crate are used. Workflow names set to `null` are read from the `transfer` and
//! `analysis` registers.
//!
//! ## Output
//!
//! Each acquisition produces one workflow file named
//! `{root}/{data_folder}/{data_subfolder}/{data_folder}_{begin:04}-{end:04}.hdf`. An
//! existing file is never overwritten; `__001`, `__002`, ... is appended instead.
//!
//! ```text
//! hdf_metadata_version(dset)
//! measurement
//! |---- instrument
//! |    |---- acquisition - dark/data ranges, beam, stage, folders, geometry
//! |    |---- source_begin - beam intensities, current, energy, datetime
//! |    |---- source_end - current, datetime
//! |    |---- detector - hardware profile, exposure, flatfield, geometry, modes
//! |    |    |---- burst
//! |    |    |---- kinetics
//! |    |    |---- roi
//! |---- sample - thickness, temperatures, translation, orientation
//! ```
pub mod catalog;
pub mod channel;
pub mod config;
pub mod detector_profile;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod exporter;
pub mod instrument;
pub mod process;
pub mod registers;
pub mod sequencer;
pub mod series_status;
pub mod soft;
pub mod status;
pub mod temperature;
