use clap::Parser;
use lookout::app::{handle_fatal_error, init_logging, AppConfig};
use lookout::cli::{run_watch_command, Cli};
use lookout::watch::codes;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Help and version are not errors; bad flags are configuration errors.
            std::process::exit(if e.use_stderr() {
                codes::CONFIG_ERROR
            } else {
                0
            });
        }
    };

    let config = AppConfig::new(cli.verbose);
    init_logging(&config);

    // Exit straight away: a detached child's reaper must not keep us alive.
    match run_watch_command(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => handle_fatal_error(e, config.verbose),
    }
}
