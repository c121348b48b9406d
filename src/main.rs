use std::process::ExitCode;

fn main() -> ExitCode {
    match dicom_rebuild::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}
