//! Application-level orchestration.
//!
//! This module owns the session controller (upload, launch, polling, stop), the driver
//! task that runs it against UI commands, and post-run processing such as the summary
//! and result download. UI/CLI layers only talk to it through `UiCommand`s and
//! `ControllerEvent`s.

mod controller;
mod driver;
mod poller;
mod post_process;

pub(crate) use driver::{run_controller, UiCommand};
