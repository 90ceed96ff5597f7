//! Leasehold CLI - operator tooling for the profile-leased job engine
//!
//! Binary name: `leasehold`

use std::process;

mod cli;
mod commands;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::setup::init_tracing() {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Warning: {e}");
        }
    }

    let matches = cli::args::build_cli().get_matches();
    let json_mode = matches.get_flag("json");

    if let Err(err) = commands::dispatch(&matches).await {
        let core = err.downcast_ref::<leasehold_core::Error>();
        let code = core.map(leasehold_core::Error::exit_code).unwrap_or(1);
        let error_code = core.map(leasehold_core::Error::code).unwrap_or("ERROR");
        cli::setup::output_error(json_mode, error_code, &format!("{err:#}"));

        #[allow(clippy::exit)]
        process::exit(code);
    }
}
