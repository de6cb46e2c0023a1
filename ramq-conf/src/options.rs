use std::net::SocketAddr;

use structopt::StructOpt;

#[derive(Debug, Clone, Default, StructOpt)]
#[structopt(name = "ramqd", about = "Message queue server with direct, fanout and topic exchanges")]
pub struct Options {
    /// Config file name
    #[structopt(short = "f", long = "cfg")]
    pub cfg_name: Option<String>,

    /// Listener address, for example: 0.0.0.0:15672
    #[structopt(long)]
    pub addr: Option<SocketAddr>,

    /// Root directory for queue logs and the topology snapshot
    #[structopt(long)]
    pub data_dir: Option<String>,
}
