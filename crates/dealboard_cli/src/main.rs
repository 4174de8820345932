//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `dealboard_core` linkage and store bootstrap.
//! - Print integration counts as JSON when a database is configured.

use dealboard_core::db::{open_db, open_db_in_memory};
use dealboard_core::{
    init_from_config, CoreConfig, IntegrationFilter, IntegrationService,
    SqliteIntegrationRepository,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("dealboard_core ping={}", dealboard_core::ping());
    println!("dealboard_core version={}", dealboard_core::core_version());

    let config = match std::env::args().nth(1) {
        Some(path) => match CoreConfig::load(&path) {
            Ok(mut config) => {
                config.apply_overrides(|key| std::env::var(key).ok());
                config
            }
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        },
        None => CoreConfig::from_env(),
    };

    if let Err(err) = init_from_config(&config) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match print_counts(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("event=cli_counts module=cli status=error error={err}");
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn print_counts(config: &CoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    let conn = match config.db_path.as_ref() {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let service = IntegrationService::new(SqliteIntegrationRepository::try_new(&conn)?);
    let counts = service.aggregate_counts(&IntegrationFilter::default())?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}
