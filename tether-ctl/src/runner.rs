use log::debug;
use nix::sys::signal::Signal;
use tether::{EXIT_CONFIG, EXIT_OK, Governor, SuiteOutcome, signal::reraise};

use crate::cli::{Plan, SuiteChoice};

/// Largest failure count an exit status can carry
const MAX_REPORTED_FAILURES: u32 = 255;

/// Run the plan under a governor and return the process exit status.
pub fn run(plan: Plan) -> i32 {
    let Plan {
        program,
        config,
        suite,
    } = plan;
    let mut governor = Governor::new(config).program(program);

    let outcome = match suite {
        SuiteChoice::Command(mut command) => governor.run(&mut command),
        SuiteChoice::Probes(probes) => {
            let mut suite = move || -> u32 { probes.iter().map(|probe| probe.run()).sum() };
            governor.run(&mut suite)
        }
        SuiteChoice::Nothing => governor.run(&mut || -> u32 { 0 }),
    };

    match outcome {
        Ok(outcome) => finish(outcome),
        Err(_) => EXIT_CONFIG,
    }
}

/// Exit status for `outcome`. A suite killed by a signal takes the governor
/// down with the same signal; the return value is only used if that fails.
pub fn finish(outcome: SuiteOutcome) -> i32 {
    match outcome {
        SuiteOutcome::Failures(n) => exit_status(n),
        SuiteOutcome::Skipped => EXIT_OK,
        SuiteOutcome::Signaled(sig) => match Signal::try_from(sig) {
            Ok(signal) => {
                debug!("suite killed by {}, re-raising", signal);
                reraise(signal)
            }
            Err(_) => 128 + sig,
        },
    }
}

/// Failure counts above 255 would wrap in the 8-bit exit status.
pub fn exit_status(failures: u32) -> i32 {
    failures.min(MAX_REPORTED_FAILURES) as i32
}
