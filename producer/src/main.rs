use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use std::error::Error;
use std::thread;
use std::time::Duration;

use shqueue::{map_region, QueueConfig, SharedQueue, Shutdown};

#[derive(Parser)]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shqueue.toml")]
    config: String,
    #[clap(long = "messages", default_value = "10000")]
    messages: u64,
    /// Flag every Nth message as important (0 disables the flag entirely).
    #[clap(long = "important-every", default_value = "100")]
    important_every: u64,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ProducerConfig {
    queue: QueueConfig,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opts: Opts = Opts::parse();
    let cfg: ProducerConfig = confy::load_path(&opts.config)?;
    println!("{:?}", &cfg.queue);

    let shmem = map_region(&cfg.queue)?;
    let queue: SharedQueue<u64> = SharedQueue::attach(shmem.as_ptr(), shmem.len())?;
    println!("attached, capacity: {}", queue.capacity());

    let shutdown = Shutdown::install()?;
    run(&queue, &shutdown, &opts);
    Ok(())
}

fn run(queue: &SharedQueue<u64>, shutdown: &Shutdown, opts: &Opts) {
    let mut refused = 0u64;
    for x in 0..opts.messages {
        if shutdown.is_closing() {
            println!("interrupted at {}", x);
            break;
        }
        let important = opts.important_every > 0 && x % opts.important_every == 0;
        if !queue.enqueue(x, important) {
            // Full behind an important item; drop this one on the floor.
            refused += 1;
        }
        if x % 1000 == 0 {
            println!("{} enqueued, {} refused, depth {}", x, refused, queue.len());
        }
        thread::sleep(Duration::from_millis(2));
    }
    println!("done, {} refused", refused);
}
