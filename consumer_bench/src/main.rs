use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use std::error::Error;
use std::thread;
use std::time::Instant;

use shqueue::{open_region, QueueConfig, SharedQueue};

#[derive(Parser)]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shqueue.toml")]
    config: String,
    #[clap(long = "messages", default_value = "10000000")]
    messages: u64,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct BenchConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opts: Opts = Opts::parse();
    let cfg: BenchConfig = confy::load_path(&opts.config)?;

    let shmem = open_region(&cfg.queue)?;
    let queue: SharedQueue<u64> = SharedQueue::attach(shmem.as_ptr(), shmem.len())?;
    println!("attached, capacity: {}", queue.capacity());
    run(&queue, &opts);
    Ok(())
}

fn run(queue: &SharedQueue<u64>, opts: &Opts) {
    let start = Instant::now();

    let mut received = 0u64;
    let mut polls = 0u64;
    while received < opts.messages {
        match queue.dequeue() {
            Some(_) => {
                received += 1;
                if received % 1_000_000 == 0 {
                    eprint!("\rTotal {} ops", received);
                }
            }
            None => {
                polls += 1;
                thread::yield_now();
            }
        }
    }

    let duration = start.elapsed();
    let iops = ((received as f64) / (duration.as_millis() as f64)) * 1_000f64;
    println!(
        "\n{:#?}K messages dequeue/s ({} empty polls). Total time: {:#?}",
        (iops / 1000f64) as u64,
        polls,
        duration
    );
}
