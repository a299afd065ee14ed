use std::process::ExitCode;

fn main() -> ExitCode {
    match claim_freq::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error ({}): {err}", err.kind().code());
            ExitCode::from(err.exit_code())
        }
    }
}
