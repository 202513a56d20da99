use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;

use offerline::{
    init_logging, log_inputs_loaded, log_output_written, log_run_failed, log_run_start,
    logging_config_from_env, normalize_transcript, parse_transcript, pipeline_config_from_env,
    write_training_table_file, ReferenceRepository, SnapshotPipeline,
};

const COMMAND: &str = "build_training_table";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start(COMMAND, &logging);

    if let Err(err) = run() {
        log_run_failed(COMMAND, err.as_ref());
        return Err(err);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();

    let portfolio_path = env_path("OFFERLINE_PORTFOLIO_PATH", "data/portfolio.json");
    let profile_path = env_path("OFFERLINE_PROFILE_PATH", "data/profile.json");
    let transcript_path = env_path("OFFERLINE_TRANSCRIPT_PATH", "data/transcript.json");
    let output_path = env_path("OFFERLINE_OUTPUT_PATH", "data/training_table.csv");

    let pipeline = SnapshotPipeline::from_files(
        &ReferenceRepository::new(),
        &portfolio_path,
        &profile_path,
        &pipeline_config_from_env(),
    )?;

    let records = parse_transcript(BufReader::new(File::open(&transcript_path)?))?;
    let events = normalize_transcript(&records)?;
    log_inputs_loaded(
        COMMAND,
        pipeline.catalog().len(),
        pipeline.profiles().len(),
        events.len(),
        pipeline.horizons(),
    );

    let log = pipeline.event_log(events)?;
    let table = pipeline.build_training_table(&log)?;
    let rows = write_training_table_file(&output_path, &table)?;

    log_output_written(
        COMMAND,
        &output_path,
        rows,
        Some(started.elapsed().as_millis()),
    );
    Ok(())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}
