use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use std::error::Error;
use std::thread;
use std::time::Instant;

use shqueue::{map_region, QueueConfig, SharedQueue};

#[derive(Parser)]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shqueue.toml")]
    config: String,
    #[clap(long = "messages", default_value = "10000000")]
    messages: u64,
    /// Flag every item and retry refusals: lossless, for paired runs with
    /// consumer_bench.
    #[clap(long = "important")]
    important: bool,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct BenchConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opts: Opts = Opts::parse();
    let cfg: BenchConfig = confy::load_path(&opts.config)?;
    println!("{:?}", &cfg.queue);

    let shmem = map_region(&cfg.queue)?;
    let queue: SharedQueue<u64> = SharedQueue::attach(shmem.as_ptr(), shmem.len())?;
    println!("attached, capacity: {}", queue.capacity());
    run(&queue, &opts);
    Ok(())
}

fn run(queue: &SharedQueue<u64>, opts: &Opts) {
    let start = Instant::now();

    // Unflagged items are always admitted (the oldest is evicted when
    // full), so the default run measures the raw claim-loop throughput.
    for x in 0..opts.messages {
        if opts.important {
            while !queue.enqueue(x, true) {
                thread::yield_now();
            }
        } else {
            queue.enqueue(x, false);
        }
        if x % 1_000_000 == 0 {
            eprint!("\rTotal {} ops", x);
        }
    }

    let duration = start.elapsed();
    let iops = ((opts.messages as f64) / (duration.as_millis() as f64)) * 1_000f64;
    println!(
        "\n{:#?}K messages enqueue/s. Total time: {:#?}",
        (iops / 1000f64) as u64,
        duration
    );
}
