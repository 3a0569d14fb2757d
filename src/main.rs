use clap::Parser;
use color_print::cformat;
use lamport_mutex::{
    actor::Actor,
    config::Config,
    log,
    operation::{SharedFile, Writer},
    peer::{wait_for_peers, TcpTransport},
    poisson::Poisson,
    process::ProcessCore,
    server::Server,
    sink::FileSnapshotSink,
};
use std::{error::Error, process, sync::Arc, time::Duration};
use tokio::time::interval;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    log::init(&config.log);

    if let Err(e) = config.validate() {
        log::error(&e);
        process::exit(2);
    }

    if let Err(e) = run(config).await {
        log::error(&format!("{e}"));
        process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn Error + Send + Sync>> {
    let server = Server::bind(&config.listen_address()?).await?;
    log::info(&cformat!(
        "Process <bold>{}</bold> started on port <bold>{}</bold>.",
        config.id,
        config.listen_port()?
    ));
    if !config.use_dme() {
        log::warn(&cformat!(
            "<yellow, bold>Mutual exclusion is off:</yellow, bold> writes to the shared file may interleave."
        ));
    }

    let transport = Arc::new(TcpTransport::new(&config.peers));
    let sink = Arc::new(FileSnapshotSink::new(&config.snapshot_dir));
    let core = ProcessCore::new(config.id, config.peers.clone(), transport, sink);
    let (handle, _actor) = Actor::spawn(core);

    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(handle).await {
                log::error(&cformat!("<red, bold>Listener stopped:</red, bold> {e}"));
            }
        });
    }

    wait_for_peers(&config.peers, Duration::from_secs(1), Duration::from_secs(2)).await?;

    if config.is_initiator() {
        let handle = handle.clone();
        let mut ticker = interval(config.snapshot_interval());
        tokio::spawn(async move {
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if handle.initiate_snapshot().await.is_err() {
                    break;
                }
            }
        });
    }

    let writer = Writer {
        handle,
        file: SharedFile::new(&config.shared_file),
        think_time: Poisson::new(config.rate, &rand::random()),
        limit: config.writes,
        use_dme: config.use_dme(),
    };
    let completed = writer.run().await?;

    log::info(&cformat!(
        "Finished after <bold>{completed}</bold> critical section(s). Still answering peers until Ctrl-C."
    ));
    tokio::signal::ctrl_c().await?;
    Ok(())
}
