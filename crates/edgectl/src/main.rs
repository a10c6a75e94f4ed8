use edgectl::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());

    let cfg = match config::load(cli::config_path(&cli.command)) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("edgectl: {err}");
            std::process::exit(2);
        }
    };

    // Services log lifecycle at info even without -v.
    let verbosity = if cli::is_service(&cli.command) {
        cli.verbose.max(1)
    } else {
        cli.verbose
    };
    let _telemetry_guard = telemetry::init(telemetry::TelemetryConfig::new(
        verbosity,
        cfg.logging.clone(),
    ));

    let command = cli::command_name(&cli.command);
    let span = tracing::info_span!("cli_command", command = %command);
    let _guard = span.enter();

    if let Err(e) = cli::run(cli, cfg) {
        tracing::error!("error: {e}");
        eprintln!("edgectl: {e}");
        std::process::exit(1);
    }
}
