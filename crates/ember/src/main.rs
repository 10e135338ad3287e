//! Ember: a textured plane drawn as a burst of fading, drifting particles.
//!
//! Keys: `M` swaps the texture, `Space` pauses or resumes the burst, `Escape`
//! quits.

mod config;
mod logging;
mod scene;

use std::fmt::Display;

use anyhow::Result;
use clap::Parser;
use geometry::Extent;
use shell::{Shell, WindowDesc};

use crate::{config::Args, logging::init_logging, scene::App};

const TITLE: &str = "Ember";
const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.logging());

    let shell = Shell::new(&WindowDesc {
        title: TITLE,
        size: Extent::new(WIDTH, HEIGHT),
    })?;

    let app = App::new(&args, shell.window())?;
    shell.run(app)
}

/// Engine failures are not recoverable. Logs the error and terminates the
/// process with a failure code.
pub(crate) fn fatal(error: impl Display) -> ! {
    log::error!("fatal: {error}");
    std::process::exit(1)
}
