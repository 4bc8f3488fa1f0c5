//! Closed-loop load generator: one connection, one outstanding
//! request, a configurable mix of reads, writes, and increments, and a
//! latency summary at the end.

use std::time::Instant;

use rand::Rng;
use structopt::StructOpt;

use tandem::socket;
use tandem::{Command, Op, Propose, ProposeReply, RmwOp, NIL};

#[derive(StructOpt)]
#[structopt(name = "client")]
struct Opt {
    /// Replica address to connect to
    #[structopt(short = "s", long = "server", default_value = "127.0.0.1:7070")]
    server: String,

    /// Number of requests to issue
    #[structopt(short = "n", long = "requests", default_value = "1000")]
    requests: u32,

    /// Number of distinct keys to spread requests over
    #[structopt(short = "k", long = "keys", default_value = "100")]
    keys: u64,

    /// Fraction of requests that are writes
    #[structopt(short = "w", long = "writes", default_value = "0.5")]
    writes: f64,

    /// Fraction of writes that are increments instead of blind puts
    #[structopt(short = "r", long = "rmws", default_value = "0.0")]
    rmws: f64,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[index]
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let opt = Opt::from_args();

    let stream = tokio::net::TcpStream::connect(&opt.server)
        .await
        .expect("failed to connect to replica");
    let (mut rx, mut tx) = socket::split::<ProposeReply, Propose>(stream);

    let mut rng = rand::thread_rng();
    let mut latencies = Vec::with_capacity(opt.requests as usize);
    let started = Instant::now();

    for cmd_id in 0..opt.requests {
        let key = rng.gen_range(0..opt.keys);
        let command = if rng.gen_bool(opt.writes) {
            if rng.gen_bool(opt.rmws) {
                Command { op: Op::Rmw(RmwOp::Increment), key, value: NIL }
            } else {
                Command { op: Op::Put, key, value: rng.gen_range(0..1_000_000) }
            }
        } else {
            Command { op: Op::Get, key, value: NIL }
        };

        let sent = Instant::now();
        tx.send(&Propose { cmd_id, command, timestamp: 0 })
            .await
            .expect("failed to send proposal");
        let reply = rx.recv().await.expect("replica closed the connection");
        if !reply.ok || reply.cmd_id != cmd_id {
            log::warn!("request {} failed: {:?}", cmd_id, reply);
            continue;
        }
        latencies.push(sent.elapsed().as_secs_f64() * 1000.0);
    }

    let elapsed = started.elapsed().as_secs_f64();
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mean = latencies.iter().sum::<f64>() / latencies.len().max(1) as f64;

    println!(
        "{} requests in {:.2}s ({:.0} req/s)",
        latencies.len(),
        elapsed,
        latencies.len() as f64 / elapsed,
    );
    println!(
        "latency ms: mean {:.3} p50 {:.3} p99 {:.3} max {:.3}",
        mean,
        percentile(&latencies, 0.50),
        percentile(&latencies, 0.99),
        percentile(&latencies, 1.0),
    );
}
