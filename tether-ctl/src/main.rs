//! tether-ctl - run a test suite under resource limits and a real-time watchdog

mod cli;
mod logging;
mod runner;

use cli::Invocation;
use tether::{EXIT_CONFIG, EXIT_OK};

fn main() {
    let code = match cli::parse(std::env::args_os()) {
        Ok(Invocation::Help) => {
            eprintln!("{}", cli::usage());
            EXIT_OK
        }
        Ok(Invocation::Run(plan)) => {
            logging::init_logger(plan.config.debug);
            runner::run(plan)
        }
        Err(e) => {
            let _ = e.print();
            EXIT_CONFIG
        }
    };
    std::process::exit(code);
}
