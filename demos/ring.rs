//! Start a local network, publish a chunk from one node and read it from all others.
//!
//! Run: `cargo run --example ring -- --nodes 10 "Hello World!"`

use std::time::{Duration, Instant};

use chunkdht::{Session, Testnet};

use clap::Parser;

use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data to publish
    data: String,
    /// Number of sessions in the network
    #[arg(short, long, default_value_t = 10)]
    nodes: usize,
    /// Hand chunks off to the remaining peers while tearing down
    #[arg(long)]
    republish: bool,
    /// Log every request and lookup
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut builder = Session::builder();
    builder.request_timeout(Duration::from_millis(500));

    let start = Instant::now();
    let testnet = Testnet::ring_with(&builder, cli.nodes).expect("failed to start testnet");

    println!(
        "\nStarted {} sessions in {:?} seconds\n",
        testnet.nodes.len(),
        start.elapsed().as_secs_f32()
    );

    let mut nodes = testnet.nodes.into_iter();
    let Some(publisher) = nodes.next() else {
        return;
    };

    let key = publisher
        .set(cli.data.into_bytes())
        .expect("set failed");

    println!("Published chunk {key}\n");

    publisher.teardown(cli.republish);

    for session in nodes {
        let start = Instant::now();

        match session.get(&key) {
            Some(data) => println!(
                "{} got {:?} in {:?} seconds ({} peers, {} chunks)",
                session.key().short(),
                String::from_utf8_lossy(&data),
                start.elapsed().as_secs_f32(),
                session.info().routing_table_size(),
                session.info().chunk_count(),
            ),
            None => println!("{} found nothing", session.key().short()),
        }
    }
}
