use std::time::Duration;

use clap::Parser;
use cli::Cli;
use color_eyre::eyre::{Result, WrapErr, eyre};
use futures::executor;
use tokio::sync::mpsc;
use tracing::info;

use crate::{app::App, autosave::AutosaveHandle, config::Config, persist::SqliteStore};

mod action;
mod app;
mod autosave;
mod cli;
mod components;
mod config;
mod errors;
mod layout;
mod logging;
mod persist;
mod tui;

fn main() -> Result<()> {
    bootstrap(|| {
        let args = Cli::parse();
        let config = Config::new()?;
        let store = SqliteStore::open(&config.database_path(), &config.store)?;

        if args.list {
            return print_listing(&store);
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let worker = autosave::start_async(
            store,
            args.document,
            config.autosave.clone(),
            cmd_rx,
            evt_tx,
        )?;

        let app = App::new(
            args.tick_rate,
            args.frame_rate,
            AutosaveHandle::new(cmd_tx, evt_rx),
        )?;
        executor::block_on(app.run())?;

        worker
            .join()
            .map_err(|_| eyre!("Autosave worker panicked"))?;
        info!("Autosave worker finished");
        Ok(())
    })
}

fn print_listing(store: &SqliteStore) -> Result<()> {
    let documents = store.list()?;
    if documents.is_empty() {
        println!("No documents stored yet.");
    }
    for doc in documents {
        println!("{}\tv{}\t{}", doc.id, doc.version, doc.updated_at);
    }
    Ok(())
}

fn bootstrap(fn_do_run: fn() -> Result<()>) -> Result<()> {
    crate::errors::init()?;
    crate::logging::init()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err_with(|| "Failed to start Tokio runtime")?;
    let result = {
        let _guard = runtime.enter();
        fn_do_run()
    };
    runtime.shutdown_timeout(Duration::from_secs(5));

    result
}
