use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

use ride_filter::config::DEFAULT_CONFIG_FILE;
use ride_filter::{process_file, process_files, FilterError, FilterOutcome, Settings};

fn cli() -> Command {
    Command::new("ride-filter")
        .version("0.1.0")
        .about("Selects the rides which started in Manhattan and ended at JFK airport from NYC taxi trip records")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .num_args(1)
                .default_value(DEFAULT_CONFIG_FILE)
                .help("YAML configuration file"),
        )
        .arg(
            Arg::new("jobs")
                .short('j')
                .long("jobs")
                .num_args(1)
                .value_parser(clap::value_parser!(usize))
                .help("Number of files filtered in parallel (overrides files.jobs)"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("one")
                .about("Filter a single file of the data directory")
                .arg(Arg::new("file").help("File name inside PATH_DATA")),
        )
        .subcommand(Command::new("all").about("Filter every file of the data directory"))
}

fn run(matches: &ArgMatches) -> Result<(), FilterError> {
    // checked before any data is loaded
    let single_file = match matches.subcommand() {
        Some(("one", sub)) => Some(
            sub.get_one::<String>("file")
                .cloned()
                .ok_or(FilterError::MissingArgument)?,
        ),
        _ => None,
    };

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut settings = Settings::from_path(&config_path)?;
    if let Some(&jobs) = matches.get_one::<usize>("jobs") {
        settings.files.jobs = jobs;
        settings.validate()?;
    }

    match single_file {
        Some(file_name) => match process_file(settings, Some(&file_name))? {
            FilterOutcome::Skipped { .. } => {}
            FilterOutcome::Filtered(report) => {
                println!(
                    "{}: {} of {} rows kept, written to {}",
                    report.file_name,
                    report.rows_kept,
                    report.rows_read,
                    report.output.display()
                );
            }
        },
        None => {
            let summary = process_files(settings)?;
            println!(
                "{} files filtered, {} skipped; {} of {} rows kept",
                summary.filtered, summary.skipped, summary.rows_kept, summary.rows_read
            );
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let matches = cli().get_matches();

    if let Err(e) = run(&matches) {
        log::error!("{e}");
        if e.is_configuration() {
            eprintln!("Please check the configuration file and the boundary and zone sources it points to.");
        }
        std::process::exit(1);
    }
}
