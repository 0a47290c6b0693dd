use std::process::ExitCode;

fn main() -> ExitCode {
    adviser_cli::run()
}
