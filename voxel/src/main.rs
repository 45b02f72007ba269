use log::{error, info};
use std::{
    error::Error,
    io::{self, BufRead},
    sync::{atomic::Ordering, Arc},
    thread,
};
use tokio::runtime::Builder;
use voxel::{
    block::BlockRegistry,
    config::load_config,
    util::logging,
    world::chunk::FlatChunkSource,
    SyncServer,
};

fn main() -> Result<(), Box<dyn Error>> {
    logging::init_logger("voxel", "logs")?;

    let config = match load_config("./config.json") {
        Ok(cfg) => cfg,
        Err(error) => {
            error!("Failed to load config: {}", error);
            return Ok(());
        }
    };

    let rt = Builder::new_multi_thread().enable_all().build()?;
    let result = rt.block_on(async {
        let mut server = SyncServer::new(
            config,
            Arc::new(BlockRegistry::with_defaults()),
            Arc::new(FlatChunkSource::standard()),
            rt.handle().clone(),
        );
        server.bind().await?;

        // Typing "stop" on the console shuts the server down
        let running = server.running();
        thread::spawn(move || {
            for line in io::stdin().lock().lines().map_while(Result::ok) {
                match line.trim() {
                    "stop" => break,
                    "" => {}
                    other => info!("Unknown command: {}", other),
                }
            }
            running.store(false, Ordering::Release);
        });

        server.run().await;
        Ok::<_, io::Error>(())
    });

    if let Err(e) = result {
        error!("Server failed: {}", e);
    }

    logging::cleanup("logs");
    Ok(())
}
