// Copyright 2025 The Pigweed Authors
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License. You may obtain a copy of
// the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
// License for the specific language governing permissions and limitations under
// the License.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rsp_latency::{AckMode, Config, Session, harness, stub};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure round trip latency over a matrix of packet sizes
    Bench(BenchArgs),
    /// Issue a single speed test
    SpeedTest {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Bytes of filler sent with the request
        send_size: usize,

        /// Bytes requested in the reply
        recv_size: usize,
    },
    /// Run a stub that answers speed tests, as a loopback baseline
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "localhost:1234")]
        addr: String,
    },
}

#[derive(Args)]
struct ConnectionArgs {
    /// GDB server address (default: localhost:1234)
    #[arg(short, long, default_value = "localhost:1234")]
    addr: String,

    /// JSON5 configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read timeout in milliseconds (overrides the config file)
    #[arg(long)]
    read_timeout_ms: Option<u64>,
}

#[derive(Args)]
struct BenchArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Speed tests per size combination (overrides the config file)
    #[arg(short = 'n', long)]
    iterations: Option<u32>,

    /// Keep acknowledgments on while measuring
    #[arg(long)]
    no_negotiate: bool,
}

impl ConnectionArgs {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(read_timeout_ms) = self.read_timeout_ms {
            config.session.read_timeout_ms = read_timeout_ms;
        }
        Ok(config)
    }
}

async fn bench(args: BenchArgs) -> Result<()> {
    let mut config = args.connection.load_config()?;
    if let Some(iterations) = args.iterations {
        config.benchmark.iterations = iterations;
    }
    if args.no_negotiate {
        config.benchmark.negotiate_no_ack = false;
    }
    config.validate()?;

    let addr = &args.connection.addr;
    let mut session = Session::connect(addr.as_str(), &config.session)
        .await
        .context(format!("Failed to connect to GDB server at {}", addr))?;

    if config.benchmark.negotiate_no_ack
        && session.negotiate_no_ack().await? == AckMode::Enabled
    {
        println!("warning: server refused QStartNoAckMode, measuring with acks");
    }

    let measurements = harness::run(&mut session, &config.benchmark).await?;
    for measurement in &measurements {
        println!("{}", harness::format_measurement(measurement));
    }

    session.close().await?;
    Ok(())
}

async fn speed_test(connection: ConnectionArgs, send_size: usize, recv_size: usize) -> Result<()> {
    let config = connection.load_config()?;
    config.validate()?;

    let mut session = Session::connect(connection.addr.as_str(), &config.session)
        .await
        .context(format!(
            "Failed to connect to GDB server at {}",
            connection.addr
        ))?;
    if config.benchmark.negotiate_no_ack {
        session.negotiate_no_ack().await?;
    }

    let latency = session.speed_test(send_size, recv_size).await?;
    println!(
        "send={send_size}, recv={recv_size}: {} us",
        latency.as_micros()
    );

    session.close().await?;
    Ok(())
}

fn parse_cli() -> Cli {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    cli
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = parse_cli();

    match cli.command {
        Commands::Bench(args) => bench(args).await?,
        Commands::SpeedTest {
            connection,
            send_size,
            recv_size,
        } => speed_test(connection, send_size, recv_size).await?,
        Commands::Serve { addr } => stub::listen(addr.as_str())
            .await
            .context(format!("Stub failed on {}", addr))?,
    }

    Ok(())
}
