use std::process::ExitCode;

fn main() -> ExitCode {
    club_dashboard_lib::run()
}
