use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};

use shqueue::{open_region, QueueConfig, SharedQueue, Shutdown};

#[derive(Parser)]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shqueue.toml")]
    config: String,
    #[clap(long = "messages", default_value = "10000")]
    messages: u64,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ConsumerConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opts: Opts = Opts::parse();
    let cfg: ConsumerConfig = confy::load_path(&opts.config)?;

    // The producer creates the region; this side only opens it.
    let shmem = open_region(&cfg.queue)?;
    let queue: SharedQueue<u64> = SharedQueue::attach(shmem.as_ptr(), shmem.len())?;
    println!("attached, capacity: {}", queue.capacity());

    let shutdown = Shutdown::install()?;
    run(&queue, &shutdown, &opts);
    Ok(())
}

fn run(queue: &SharedQueue<u64>, shutdown: &Shutdown, opts: &Opts) {
    let start = Instant::now();
    let mut received = 0u64;
    let mut important_received = 0u64;

    while received < opts.messages {
        if shutdown.is_closing() {
            println!("interrupted at {}", received);
            break;
        }
        match queue.dequeue() {
            Some((value, important)) => {
                received += 1;
                if important {
                    important_received += 1;
                }
                if received % 1000 == 0 {
                    println!("{} received (latest {}, {} important)", received, value, important_received);
                }
            }
            None => thread::sleep(Duration::from_millis(1)),
        }
    }

    let duration = start.elapsed();
    let iops = ((received as f64) / (duration.as_millis() as f64)) * 1_000f64;
    println!(
        "IOPS : {:#?}K, time: {:#?}",
        (iops / 1000f64) as u64,
        duration
    );
}
