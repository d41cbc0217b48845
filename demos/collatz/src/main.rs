use taskloom_pool::{default_config, load_config, FnWorker, Pool, PoolControl, Processor};

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

// Define command-line arguments.
#[derive(Parser, Debug)]
struct Args {
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    config: Option<PathBuf>,
    /// Numbers to check, starting from 1.
    #[clap(short = 'n', long, default_value = "100000")]
    count: u64,
    /// Overrides the configured pool size.
    #[clap(short, long)]
    threads: Option<usize>,
    /// Shrink the pool to one worker after this many results.
    #[clap(long, value_name = "RESULTS")]
    shrink_after: Option<u64>,
}

/// Length of the Collatz sequence starting at `start`.
fn steps(start: u64) -> (u64, u32) {
    let mut n = start;
    let mut steps = 0;
    while n > 1 {
        n = if n % 2 == 0 { n / 2 } else { 3 * n + 1 };
        steps += 1;
    }
    (start, steps)
}

#[derive(Default)]
struct Longest {
    seen: u64,
    best: Option<(u64, u32)>,
    shrink_after: Option<u64>,
}

impl Processor<u64, (u64, u32)> for Longest {
    fn on_result(&mut self, (start, steps): (u64, u32), pool: &PoolControl<u64>) {
        self.seen += 1;
        if self.best.map_or(true, |(_, best)| steps > best) {
            log::info!("New longest: {} takes {} steps", start, steps);
            self.best = Some((start, steps));
        }
        if self.shrink_after == Some(self.seen) {
            log::info!("Shrinking pool after {} results", self.seen);
            if let Err(e) = pool.set_pool_size(1) {
                log::error!("Resize failed: {}", e);
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => default_config(),
    };
    if let Some(threads) = args.threads {
        config.pool_size = threads;
    }

    let processor = Longest {
        shrink_after: args.shrink_after,
        ..Default::default()
    };
    let pool = Pool::with_config(FnWorker::new(steps), processor, &config)?;
    pool.control().extend(1..=args.count)?;
    pool.wait_for_idle()?;

    let (seen, best) = pool.processor().with(|longest, _| (longest.seen, longest.best));
    match best {
        Some((start, steps)) => println!(
            "Done. Checked {} numbers; {} takes the longest at {} steps",
            seen, start, steps
        ),
        None => println!("Done. Nothing to check"),
    }
    pool.stats().print();
    pool.shutdown()?;
    Ok(())
}
