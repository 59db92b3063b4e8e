use std::process::ExitCode;

fn main() -> ExitCode {
    ldpkit_cli::run()
}
