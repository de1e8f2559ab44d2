// src/main.rs

use std::process::ExitCode;

use flowdispatch::{cli, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("flowdispatch: {err:#}");
        return ExitCode::FAILURE;
    }

    match flowdispatch::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("flowdispatch error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
