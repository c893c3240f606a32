use std::process::ExitCode;

fn main() -> ExitCode {
    ordersync_cli::run()
}
