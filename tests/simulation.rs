//! Whole runs with real worker threads

use log::LevelFilter;

use memsim::config::{Config, FreeFramePolicy};
use memsim::logging::FileLogger;
use memsim::oss::{Outcome, Simulation};

fn small_config() -> Config {
    Config {
        frames: 6,
        max_pages: 6,
        max_running: 4,
        max_launched: 8,
        min_references: 20,
        max_references: 30,
        max_fork_ns: 50_000_000,
        memory_map_interval_ns: 10_000_000,
        idle_sleep_us: 20,
        max_real_seconds: 60,
        seed: Some(11),
        ..Config::default()
    }
}

#[test]
fn test_weighted_run_under_memory_pressure() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("oss_log");
    FileLogger::create(&log_path, 100_000, LevelFilter::Info)
        .unwrap()
        .install()
        .unwrap();

    let config = Config {
        weighted: true,
        frames: 2,
        min_pages: 3,
        log_file: log_path.clone(),
        ..small_config()
    };
    let summary = Simulation::new(config).unwrap().run().unwrap();
    log::logger().flush();

    assert_eq!(summary.outcome, Outcome::Completed);
    let stats = &summary.stats;
    assert_eq!(stats.workers_launched, 8);
    assert_eq!(stats.workers_completed, 8);
    assert_eq!(stats.workers_killed, 0);
    assert!(stats.memory_accesses >= 8 * 20);
    assert!(stats.page_faults > 0);
    assert!(stats.page_faults <= stats.memory_accesses);
    // two frames shared by workers of at least three pages
    assert!(stats.swaps > 0);

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Master: Generating process"));
    assert!(log.contains("pagefault"));
    assert!(log.contains("Current memory layout"));
    assert!(log.contains("has terminated"));
    assert!(log.contains("STATS at time"));
}

#[test]
fn test_charge_io_run_completes() {
    let config = Config {
        free_frame_policy: FreeFramePolicy::ChargeIo,
        frames: 32,
        ..small_config()
    };
    let summary = Simulation::new(config).unwrap().run().unwrap();
    assert_eq!(summary.outcome, Outcome::Completed);
    assert_eq!(summary.stats.workers_completed, 8);
}

#[test]
fn test_real_time_limit_stops_run() {
    let config = Config {
        max_launched: 1000,
        max_fork_ns: 500_000_000,
        max_real_seconds: 0,
        ..small_config()
    };
    let summary = Simulation::new(config).unwrap().run().unwrap();
    assert_eq!(summary.outcome, Outcome::TimedOut);
    assert_eq!(summary.stats.workers_launched, 0);
}
