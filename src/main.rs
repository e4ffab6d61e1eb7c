use std::process::ExitCode;
use clap::Parser;
use color_eyre::Result;
use pushconst_repro::app::{App, Args};

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    env_logger::init();

    let args = Args::parse();
    let app = App::new(args);

    app.run()
}
