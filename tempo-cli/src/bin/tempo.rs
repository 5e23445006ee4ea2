//! Tempo CLI - key management and transport simulation
//!
//! `tempo keygen` mints a named long-lived key for distribution to both
//! endpoints; `tempo simulate` runs a two-endpoint exchange in memory over
//! a deterministic lossy channel and prints transport statistics.

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use ring::rand::SystemRandom;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use tempo_cli::config::{Config, SimulateConfig};
use tempo_cli::stats::{display_connection_stats, display_playout_stats, format_percent};
use tempo_crypto::{Base64Key, LongLivedKey, Session};
use tempo_io::time::ns_to_samples;
use tempo_playout::{
    Clock, ClockConfig, CorrectionPolicy, Cursor, CursorTuning, DiscreteNudge, FrameDecoder,
    FRAME_DURATION_NS,
};
use tempo_protocol::{AudioFrame, Connection, MediaFrame};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tempo")]
#[command(about = "Low-latency frame transport tools", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a named long-lived key
    Keygen {
        /// Name embedded in the key (up to 63 bytes)
        name: String,

        /// Write the key here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run an in-memory lossy exchange between two endpoints
    Simulate {
        /// TOML configuration file (defaults apply without one)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Command::Keygen { name, output } => run_keygen(&name, output.as_deref()),
        Command::Simulate { config } => {
            let config = match config {
                Some(path) => {
                    Config::from_file(&path).with_context(|| format!("reading {path:?}"))?
                }
                None => Config::default(),
            };
            run_simulation(&config.simulate)
        }
    }
}

fn run_keygen(name: &str, output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let rng = SystemRandom::new();
    let key = LongLivedKey::generate(name, &rng).context("generating key")?;
    let printable = BASE64.encode(key.encode());

    match output {
        Some(path) => {
            fs::write(path, format!("{printable}\n"))
                .with_context(|| format!("writing {path:?}"))?;
            eprintln!("wrote key '{name}' to {path:?}");
        }
        None => println!("{printable}"),
    }
    Ok(())
}

/// Stand-in for the audio codec: counts real and concealed frames.
#[derive(Default)]
struct CountingDecoder {
    decoded: u64,
    concealed: u64,
}

impl FrameDecoder<AudioFrame> for CountingDecoder {
    fn decode(&mut self, _frame: &AudioFrame) {
        self.decoded += 1;
    }

    fn decode_missing(&mut self) {
        self.concealed += 1;
    }
}

fn run_simulation(config: &SimulateConfig) -> anyhow::Result<()> {
    let rng = SystemRandom::new();
    let uplink = Base64Key::random(&rng).context("minting session keys")?;
    let downlink = Base64Key::random(&rng).context("minting session keys")?;

    let client_addr: SocketAddr = "127.0.0.1:9001".parse()?;
    let server_addr: SocketAddr = "127.0.0.1:9002".parse()?;

    let mut client: Connection<AudioFrame> = Connection::new(
        Session::new(&uplink, &downlink),
        1,
        2,
        Some(server_addr),
        false,
    );
    let mut server: Connection<AudioFrame> = Connection::new(
        Session::new(&downlink, &uplink),
        2,
        1,
        Some(client_addr),
        false,
    );

    let tuning = CursorTuning {
        initial_target_delay_ns: config.target_delay_ms * 1_000_000,
        ..CursorTuning::default()
    };
    let mut cursor = Cursor::new(tuning);
    let mut clock = Clock::new(ClockConfig::default(), 0);
    let mut decoder = CountingDecoder::default();
    let mut policy = DiscreteNudge;

    let payload = Bytes::from_static(&[0x55; 16]);
    let mut data_packets = 0u64;
    let mut ack_packets = 0u64;
    let mut data_dropped = 0u64;
    let mut ack_dropped = 0u64;

    let total_rounds = config.frames + config.drain_rounds;
    let mut rounds_run = 0u32;

    for round in 0..total_rounds {
        rounds_run = round + 1;
        let now_ns = u64::from(round) * FRAME_DURATION_NS;

        if round < config.frames {
            client
                .sender()
                .push_frame(AudioFrame::new(round, payload.clone(), payload.clone()));
        }

        // client -> server, dropping every Nth data packet
        let (wire, _) = client.send_packet(now_ns)?;
        data_packets += 1;
        if config.data_drop_interval != 0 && data_packets % config.data_drop_interval == 0 {
            data_dropped += 1;
        } else {
            server.receive_packet(&wire, client_addr, now_ns);
        }

        // server -> client acknowledgment, dropping every Nth
        let (wire, _) = server.send_packet(now_ns)?;
        ack_packets += 1;
        if config.ack_drop_interval != 0 && ack_packets % config.ack_drop_interval == 0 {
            ack_dropped += 1;
        } else {
            client.receive_packet(&wire, server_addr, now_ns);
        }

        // the peer clock is fed by receive progress
        let samples_received = u64::from(server.frames().next_frame_needed())
            * u64::from(AudioFrame::SAMPLES_PER_FRAME);
        clock.new_sample(ns_to_samples(now_ns), samples_received);

        run_playout(&mut server, &mut cursor, &mut decoder, &mut policy, now_ns)?;

        if round >= config.frames {
            let (outstanding, _) = client.sender().outstanding_counts();
            if outstanding == 0 {
                break;
            }
        }
    }

    let (outstanding, in_flight) = client.sender().outstanding_counts();
    println!(
        "simulated {} frames over {} rounds ({} data loss, {} ack loss)",
        config.frames,
        rounds_run,
        format_percent(data_dropped, data_packets),
        format_percent(ack_dropped, ack_packets),
    );
    println!("sender debt: {outstanding} outstanding, {in_flight} in flight");
    display_connection_stats("client", &client.stats());
    display_connection_stats("server", &server.stats());
    display_playout_stats(&cursor.stats(), &clock.stats());
    println!(
        "decoder: {} real, {} concealed",
        decoder.decoded, decoder.concealed
    );

    if outstanding > 0 {
        anyhow::bail!("{outstanding} frames never acknowledged");
    }
    Ok(())
}

fn run_playout(
    server: &mut Connection<AudioFrame>,
    cursor: &mut Cursor,
    decoder: &mut CountingDecoder,
    policy: &mut impl CorrectionPolicy,
    now_ns: u64,
) -> anyhow::Result<()> {
    cursor.tick(server.frames(), now_ns, decoder, policy);
    let safe = cursor.ok_to_pop(server.frames());
    if safe > 0 {
        server.pop_frames(safe)?;
    }
    Ok(())
}
