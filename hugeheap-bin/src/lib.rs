//! # Hugeheap tools
//!
//! Command line tools around the hugepage heap.
//!
//! ```sh
//! echo 64 | sudo tee /proc/sys/vm/nr_hugepages
//! HUGETLB_MORECORE=yes cargo run --release --bin=eval_morecore -- --size 64 --output results.json
//! ```
//!
//! `eval_morecore` installs the growth hook into a Rust global allocator,
//! allocates a workload on it and records how the heap and the hugepage pool
//! evolve.

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::LevelFilter;

/// Sets up `env_logger` behind the progress bars so log lines don't tear them.
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init_logging_with_progress(default_level: LevelFilter) -> anyhow::Result<MultiProgress> {
    let logger = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level.as_str()),
    )
    .build();
    // the bridge can't see per-module filters, take the level from env_logger
    let level = logger.filter();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    log::set_max_level(level);
    Ok(progress)
}
