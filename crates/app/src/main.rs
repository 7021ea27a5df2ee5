use std::process::ExitCode;
use std::sync::Arc;

use novaviz::{ClientSettings, TerminalPresenter, run_session};
use novaviz_chat::DiskFileSaver;
use tokio::io::{AsyncBufReadExt, BufReader};

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the transcript.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(error = %error, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(async {
        let settings = ClientSettings::load();
        tracing::info!(
            server_url = %settings.server_url,
            presenter = settings.presenter.name(),
            download_dir = ?settings.download_dir,
            "starting session"
        );

        let saver = Arc::new(DiskFileSaver::new(settings.download_dir.clone()));
        let lines = BufReader::new(tokio::io::stdin()).lines();
        let width = crossterm::terminal::size().ok().map(|(columns, _)| columns);
        let mut presenter =
            TerminalPresenter::from_settings(&settings, tokio::io::stdout()).with_width(width);

        match run_session(&settings, lines, &mut presenter, saver).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                tracing::error!(error = %error, "session ended with an error");
                ExitCode::FAILURE
            }
        }
    });

    // A pending stdin read must not hold the process open after the session ends.
    runtime.shutdown_background();
    code
}
