#![deny(unsafe_code)]

use std::time::Duration;

use structopt::StructOpt;

use ramq::conf::{Options, Settings};
use ramq::context::ServerContext;
use ramq::logger::{config_logger, logger_init};
use ramq::net::{Builder, Listener};
use ramq::server::BrokerServer;
use ramq::Result;

#[tokio::main]
async fn main() {
    //init config
    let settings = Settings::init(Options::from_args()).expect("settings init failed").clone();

    //init log
    let logger = config_logger(settings.log.filename(), settings.log.to, settings.log.level);
    let _guard = logger_init(&logger, settings.log.level).expect("logger init failed");

    let _ = Settings::logs();

    //init server context, recover the durable state before listening
    let scx = ServerContext::new(settings.clone(), logger).build().await.expect("context init failed");

    let listener = bind_listener(&settings).expect("listener bind failed");
    BrokerServer::new(scx).listener(listener).build().start();

    tokio::signal::ctrl_c().await.expect("signal ctrl c");
    log::info!("ctrl_c, shutting down");
    tokio::time::sleep(Duration::from_secs(1)).await;
}

fn bind_listener(settings: &Settings) -> Result<Listener> {
    let l = &settings.listener;
    let mut builder = Builder::new()
        .name(&l.name)
        .laddr(l.addr)
        .backlog(l.backlog)
        .max_connections(l.max_connections)
        .max_frame_size(l.max_frame_size.as_usize() as u32);
    if l.nodelay {
        builder = builder.nodelay();
    }
    if l.reuseaddr.unwrap_or(false) {
        builder = builder.reuseaddr();
    }
    if l.reuseport.unwrap_or(false) {
        builder = builder.reuseport();
    }
    builder.bind()
}
