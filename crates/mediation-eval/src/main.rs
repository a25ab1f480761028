mod case;
mod cli;
mod engine;
mod fixture_io;
mod scripted;

use cli::{CliError, CliOptions};
use engine::run_eval;
use mediation::load_dotenv;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "mediation=warn,mediation_eval=info".to_string()),
        )
        .json()
        .flatten_event(true)
        .with_writer(std::io::stderr)
        .init();

    let options = match CliOptions::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(CliError::HelpRequested) => {
            print_usage();
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(err) = load_dotenv() {
        eprintln!("failed to load environment: {err}");
        std::process::exit(2);
    }

    match run_eval(&options).await {
        Ok(summary) => {
            summary.print();
            if summary.has_failures() {
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("failed to run mediation eval harness: {err}");
            std::process::exit(2);
        }
    }
}

fn print_usage() {
    eprintln!(
        "Usage: cargo run -p mediation-eval -- [--mode mocked|live] [--case <id>[,<id>...]]\n\
         \n\
         Modes:\n\
         - mocked (default): scripted provider replies from each case fixture\n\
         - live: OpenRouter smoke mode over cases marked include_in_live_smoke\n\
         \n\
         Options:\n\
         - --case <ids> Run only the listed cases (repeatable, comma-separated)\n\
         - --help       Show this help text"
    );
}
