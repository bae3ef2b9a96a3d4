use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    csref_runner::run()
}
