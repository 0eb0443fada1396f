#![allow(clippy::doc_markdown)]
#![doc = include_str!("../README.md")]

mod api;
mod balancing;
mod cli;
mod config;
mod core;
mod error;
mod fmt;
mod manager;
mod plan;
mod prelude;
mod quantity;
mod store;
mod tables;
mod weather;

use clap::{Parser, crate_version};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{cli::Args, prelude::*};

fn main() -> Result {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().without_time().compact().with_filter(
            EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env()?,
        ))
        .init();

    info!(version = crate_version!(), "starting…");
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(args.command.run())
}
