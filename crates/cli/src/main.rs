use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    lenda_cli::run().await
}
