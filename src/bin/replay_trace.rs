use std::env;
use std::path::PathBuf;
use theta_netphys::engine::replay::ReplayTrace;
use theta_netphys::network::replication::ReplicationConfig;

fn main() {
    if let Err(err) = run() {
        eprintln!("[replay] error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let trace_path = args
        .next()
        .map(PathBuf::from)
        .ok_or("usage: replay_trace <trace.json> [config.json]")?;

    let mut trace = ReplayTrace::from_path(&trace_path)?;
    if let Some(config_path) = args.next().map(PathBuf::from) {
        trace.config = ReplicationConfig::from_path(&config_path)?;
    }

    let summary = trace.run()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    eprintln!(
        "[replay] {} frames from {}: {} hard snaps, {} evictions, {} resimulations",
        summary.frames,
        trace_path.display(),
        summary.hard_snaps,
        summary.evictions,
        summary.resimulations
    );
    Ok(())
}
