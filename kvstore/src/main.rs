use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "server")]
struct Opt {
    /// Unique replica ID
    #[structopt(short = "i", long = "id")]
    id: u32,

    /// Port to listen on for client requests
    #[structopt(short = "p", long = "port")]
    port: u16,

    /// Total number of replicas
    #[structopt(short = "c", long = "count")]
    count: usize,

    /// Append protocol checkpoints to stable storage
    #[structopt(short = "d", long = "durable")]
    durable: bool,

    /// Start out as the RMW leader
    #[structopt(short = "l", long = "leader")]
    leader: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let opt = Opt::from_args();

    let _handle = tandem::Config::new(opt.id, opt.port, opt.count)
        .with_durability(opt.durable)
        .with_leader(opt.leader)
        .run()
        .await;

    std::future::pending::<()>().await
}
