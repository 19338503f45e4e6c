use std::{
    fs::File,
    io::{BufWriter, Write},
    time::Instant,
};

use anyhow::{Result, bail};
use clap::Parser;
use hugeheap_bin::init_logging_with_progress;
use hugeheap_core::maps::is_mapped;
use hugeheap_core::util::Size::{KB, MB};
use hugeheap_core::{Activation, HeapState, MorecoreConfig, setup_morecore};
use hugeheap_hugetlbfs::{HUGEPAGE_SIZE, HugepagePool, Hugetlbfs};
use hugeheap_llheap::{GrowableHeap, Tunables};
use indicatif::{ProgressBar, ProgressStyle};
use log::{LevelFilter, info, warn};
use serde::Serialize;

#[global_allocator]
static HEAP: GrowableHeap = GrowableHeap::new();

/// CLI arguments for the `eval_morecore` binary.
///
/// The heap is only moved onto hugepages if `HUGETLB_MORECORE` is set or
/// `--force` is given. Explicit arguments override the environment.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    /// Enable the hugepage heap even if `HUGETLB_MORECORE` is unset.
    #[clap(long = "force")]
    force: bool,
    /// Heap base address in hex, overriding `HUGETLB_MORECORE_HEAPBASE`.
    #[clap(long = "heapbase")]
    heapbase: Option<String>,
    /// Total size to allocate in MB.
    #[clap(long = "size", default_value = "16")]
    size_mb: usize,
    /// Size of each allocation in KB.
    #[clap(long = "chunk", default_value = "64")]
    chunk_kb: usize,
    /// Output file for results (JSON format).
    #[clap(long = "output")]
    output: Option<String>,
    /// Free every allocation once the workload is complete.
    #[clap(long = "deallocate")]
    deallocate: bool,
    /// Log level used when `RUST_LOG` is unset.
    #[clap(long = "log-level", default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Debug, Serialize, Clone)]
struct Snapshot {
    allocated_bytes: usize,
    heap: Option<HeapState>,
    /// Whether `[heapbase, heapbase + mapsize)` shows up in the process maps.
    backed: Option<bool>,
    pool: Option<HugepagePool>,
}

impl Snapshot {
    fn take(allocated_bytes: usize) -> Self {
        let heap = HEAP.state();
        let backed = heap
            .filter(|state| state.mapsize > 0)
            .and_then(|state| {
                is_mapped(state.heapbase, state.mapsize)
                    .map_err(|e| warn!("Failed to read process maps: {}", e))
                    .ok()
            });
        Snapshot {
            allocated_bytes,
            heap,
            backed,
            pool: HugepagePool::read()
                .map_err(|e| warn!("Failed to read hugepage pool: {}", e))
                .ok(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EvaluationResults {
    args: CliArgs,
    activation: Option<Activation>,
    setup_error: Option<String>,
    tunables: Tunables,
    chunks: usize,
    chunks_on_heap: usize,
    duration_ms: u64,
    snapshots: Vec<Snapshot>,
}

impl EvaluationResults {
    fn save_to_file(&self, filename: &str) -> Result<()> {
        let file = File::create(filename)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("Results saved to {}", filename);
        Ok(())
    }
}

fn config(args: &CliArgs) -> MorecoreConfig {
    let mut config = MorecoreConfig::from_env();
    config.enabled |= args.force;
    if args.heapbase.is_some() {
        config.heapbase = args.heapbase.clone();
    }
    config
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let progress = init_logging_with_progress(args.log_level)?;
    info!("CLI args: {:?}", args);
    if args.chunk_kb == 0 {
        bail!("Chunk size must be non-zero");
    }

    let config = config(&args);
    let (activation, setup_error) = match setup_morecore(&config, &Hugetlbfs::default(), &mut &HEAP)
    {
        Ok(activation) => (Some(activation), None),
        Err(e) => {
            warn!("Hugepage heap not available: {}", e);
            (None, Some(e.to_string()))
        }
    };
    info!("Hugepage size: {:?}", *HUGEPAGE_SIZE);
    info!("Activation: {:?}", activation);

    let chunk = KB(args.chunk_kb).bytes();
    let chunks = MB(args.size_mb).bytes() / chunk;
    let snapshot_every = (chunks / 16).max(1);

    let bar = progress.add(ProgressBar::new(chunks as u64));
    bar.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} chunks",
    )?);

    let start_time = Instant::now();
    let mut snapshots = vec![Snapshot::take(0)];
    let mut blocks: Vec<Vec<u8>> = Vec::with_capacity(chunks);
    for i in 0..chunks {
        // touch the memory so hugepages are actually faulted in
        blocks.push(vec![i as u8; chunk]);
        bar.inc(1);
        if (i + 1) % snapshot_every == 0 {
            snapshots.push(Snapshot::take((i + 1) * chunk));
        }
    }
    bar.finish();
    let chunks_on_heap = blocks.iter().filter(|b| HEAP.contains(b.as_ptr())).count();

    if args.deallocate {
        blocks.clear();
        snapshots.push(Snapshot::take(0));
    }
    let duration_ms = start_time.elapsed().as_millis() as u64;

    info!("=== EVALUATION SUMMARY ===");
    info!("Chunks on hugepage heap: {}/{}", chunks_on_heap, chunks);
    if let Some(state) = HEAP.state() {
        info!(
            "Heap: base 0x{:x}, top 0x{:x}, mapped {} bytes",
            state.heapbase, state.heaptop, state.mapsize
        );
    }
    info!("Total evaluation time: {}ms", duration_ms);

    let results = EvaluationResults {
        args: args.clone(),
        activation,
        setup_error,
        tunables: HEAP.tunables(),
        chunks,
        chunks_on_heap,
        duration_ms,
        snapshots,
    };
    if let Some(output_file) = &args.output {
        results.save_to_file(output_file)?;
    }
    Ok(())
}
