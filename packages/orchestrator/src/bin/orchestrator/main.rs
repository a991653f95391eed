#![deny(clippy::as_conversions)]

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

mod app;
mod cli;
pub(crate) mod config;
mod endpoints;
pub(crate) mod watcher;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let opt = cli::Opt::parse();

    opt.init_logger()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let listener = TcpListener::bind(&opt.bind).await.context(format!(
                "Cannot launch orchestrator HTTP service bound to {}",
                opt.bind
            ))?;
            opt.into_app_builder().await?.start(listener).await
        })
}
