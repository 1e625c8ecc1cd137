//! # Player Simulation Client
//!
//! Simulates realistic player clients against a running Meridian server:
//! each simulated player connects, authenticates, joins a room, raises
//! events at a configurable rate and counts what it receives back. Used
//! for smoke-testing a deployment and for eyeballing fan-out behavior
//! under load.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use meridian_protocol::constants::{operation, param, return_code};
use meridian_protocol::{
    encode_packet, Command, CommandDecoder, CommandKind, FrameDecoder, Message, OperationRequest,
    Parameters, Value,
};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "game_client")]
#[command(about = "Meridian player simulation client")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:5055")]
    server: String,

    /// Number of simultaneous players to simulate
    #[arg(short, long, default_value = "4")]
    players: u32,

    /// Number of rooms to spread the players across
    #[arg(short, long, default_value = "1")]
    rooms: u32,

    /// Events raised per second per player
    #[arg(short, long, default_value = "2.0")]
    event_rate: f64,

    /// Simulation duration in seconds
    #[arg(short, long, default_value = "30")]
    duration: u64,
}

/// Counters shared by every simulated player.
#[derive(Debug, Default)]
struct SimStats {
    connected: AtomicU64,
    events_sent: AtomicU64,
    events_received: AtomicU64,
    failed_operations: AtomicU64,
    errors: AtomicU64,
}

/// One player's connection with just enough protocol plumbing to drive
/// the server.
struct SimClient {
    stream: TcpStream,
    decoder: FrameDecoder,
    pending: Vec<Command>,
    reliable_seq: u32,
}

impl SimClient {
    async fn connect(server: &str) -> Result<Self> {
        let stream = TcpStream::connect(server)
            .await
            .with_context(|| format!("connecting to {server}"))?;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(),
            pending: Vec::new(),
            reliable_seq: 0,
        })
    }

    async fn send_command(&mut self, command: &Command) -> Result<()> {
        let packet = encode_packet(0, &command.to_bytes()?);
        self.stream.write_all(&packet).await?;
        Ok(())
    }

    async fn send_request(&mut self, code: u8, params: Parameters) -> Result<()> {
        self.reliable_seq += 1;
        let message = Message::Request(OperationRequest { code, params });
        let command = Command::send(
            CommandKind::SendReliable,
            self.reliable_seq,
            0,
            message.to_value(),
        );
        self.send_command(&command).await
    }

    /// Pops the next buffered command, reading from the socket as
    /// needed. `None` on EOF.
    async fn recv_command(&mut self) -> Result<Option<Command>> {
        loop {
            if !self.pending.is_empty() {
                return Ok(Some(self.pending.remove(0)));
            }
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.extend(&buf[..n]);
            while let Some(packet) = self.decoder.next_packet()? {
                let mut commands = CommandDecoder::new(&packet.payload);
                while let Some(command) = commands.next()? {
                    self.pending.push(command);
                }
            }
        }
    }

    /// Waits for the next operation response, answering pings and
    /// dropping events along the way.
    async fn recv_response(&mut self) -> Result<meridian_protocol::OperationResponse> {
        loop {
            let Some(command) = self.recv_command().await? else {
                bail!("server closed the connection");
            };
            match command.kind {
                CommandKind::Ping => {
                    self.send_command(&Command::control(CommandKind::Ping, 0)).await?;
                }
                CommandKind::Disconnect => bail!("server sent Disconnect"),
                _ => {
                    if let Some(payload) = command.payload {
                        if let Message::Response(response) = Message::from_value(&payload)? {
                            return Ok(response);
                        }
                    }
                }
            }
        }
    }
}

async fn run_player(index: u32, args: Arc<Args>, stats: Arc<SimStats>) -> Result<()> {
    let mut client = SimClient::connect(&args.server).await?;

    // Handshake: the server speaks first.
    let first = timeout(Duration::from_secs(5), client.recv_command())
        .await
        .context("timed out waiting for VerifyConnect")??;
    match first {
        Some(command) if command.kind == CommandKind::VerifyConnect => {}
        other => bail!("expected VerifyConnect, got {other:?}"),
    }
    stats.connected.fetch_add(1, Ordering::Relaxed);

    client
        .send_request(
            operation::AUTHENTICATE,
            Parameters::new()
                .with(param::NICKNAME, Value::from(format!("sim_{index}")))
                .with(param::USER_ID, Value::from(format!("sim_user_{index}"))),
        )
        .await?;
    let auth = client.recv_response().await?;
    if auth.return_code != return_code::OK {
        stats.failed_operations.fetch_add(1, Ordering::Relaxed);
        bail!("authentication failed with {}", auth.return_code);
    }

    let room = format!("sim_room_{}", index % args.rooms.max(1));
    client
        .send_request(
            operation::JOIN,
            Parameters::new().with(param::ROOM_NAME, Value::from(room.as_str())),
        )
        .await?;
    let joined = client.recv_response().await?;
    if joined.return_code != return_code::OK {
        stats.failed_operations.fetch_add(1, Ordering::Relaxed);
        bail!("joining '{room}' failed with {}", joined.return_code);
    }
    info!("Player {} is in '{}'", index, room);

    // Hand the read half to its own task so the main loop can write
    // freely; inbound commands arrive through a channel.
    let SimClient {
        stream,
        decoder,
        pending,
        mut reliable_seq,
    } = client;
    let (read_half, mut write_half) = stream.into_split();
    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    tokio::spawn(reader_task(read_half, decoder, pending, inbound_tx));

    let tick_ms = ((1000.0 / args.event_rate.max(0.01)) as u64).max(1);
    let mut ticker = interval(Duration::from_millis(tick_ms));
    let deadline = sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    let mut payload_counter: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = ticker.tick() => {
                payload_counter += 1;
                reliable_seq += 1;
                let jitter: i64 = rand::thread_rng().gen_range(-50..=50);
                let params = Parameters::new()
                    .with(param::CODE, Value::integer(1))
                    .with(param::DATA, Value::Table(vec![
                        (Value::from("n"), Value::integer(payload_counter as i64)),
                        (Value::from("jitter"), Value::integer(jitter)),
                    ]));
                write_request(&mut write_half, reliable_seq, operation::RAISE_EVENT, params).await?;
                stats.events_sent.fetch_add(1, Ordering::Relaxed);
            }
            received = inbound_rx.recv() => {
                let Some(command) = received else {
                    bail!("server closed the connection mid-run");
                };
                match command.kind {
                    CommandKind::Ping => {
                        write_command(&mut write_half, &Command::control(CommandKind::Ping, 0)).await?;
                    }
                    CommandKind::Disconnect => bail!("server disconnected us mid-run"),
                    _ => {
                        if let Some(payload) = command.payload {
                            match Message::from_value(&payload)? {
                                Message::Event(_) => {
                                    stats.events_received.fetch_add(1, Ordering::Relaxed);
                                }
                                Message::Response(response)
                                    if response.return_code != return_code::OK =>
                                {
                                    stats.failed_operations.fetch_add(1, Ordering::Relaxed);
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
        }
    }

    // Polite exit: leave the room, then say goodbye.
    reliable_seq += 1;
    write_request(&mut write_half, reliable_seq, operation::CREATE_OR_LEAVE, Parameters::new())
        .await?;
    write_command(&mut write_half, &Command::control(CommandKind::Disconnect, 0)).await?;
    Ok(())
}

async fn write_command(write_half: &mut OwnedWriteHalf, command: &Command) -> Result<()> {
    let packet = encode_packet(0, &command.to_bytes()?);
    write_half.write_all(&packet).await?;
    Ok(())
}

async fn write_request(
    write_half: &mut OwnedWriteHalf,
    sequence: u32,
    code: u8,
    params: Parameters,
) -> Result<()> {
    let message = Message::Request(OperationRequest { code, params });
    let command = Command::send(CommandKind::SendReliable, sequence, 0, message.to_value());
    write_command(write_half, &command).await
}

/// Decodes inbound traffic and forwards complete commands. Exits on EOF,
/// a socket error, or a framing error.
async fn reader_task(
    mut read_half: OwnedReadHalf,
    mut decoder: FrameDecoder,
    pending: Vec<Command>,
    inbound_tx: mpsc::Sender<Command>,
) {
    for command in pending {
        if inbound_tx.send(command).await.is_err() {
            return;
        }
    }
    let mut buf = [0u8; 4096];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);
        loop {
            match decoder.next_packet() {
                Ok(Some(packet)) => {
                    let mut commands = CommandDecoder::new(&packet.payload);
                    while let Ok(Some(command)) = commands.next() {
                        if inbound_tx.send(command).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Dropping malformed server traffic: {}", e);
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Arc::new(Args::parse());
    let stats = Arc::new(SimStats::default());

    info!(
        "🎮 Simulating {} player(s) across {} room(s) against {} for {}s",
        args.players, args.rooms, args.server, args.duration
    );

    let mut handles = Vec::new();
    for index in 0..args.players {
        let args = Arc::clone(&args);
        let stats = Arc::clone(&stats);
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_player(index, args, Arc::clone(&stats)).await {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Player {} failed: {:#}", index, e);
            }
        }));
        // Stagger connections a little, like real clients would.
        sleep(Duration::from_millis(25)).await;
    }

    for handle in handles {
        let _ = handle.await;
    }

    info!("🧪 Simulation complete:");
    info!("   connected:         {}", stats.connected.load(Ordering::Relaxed));
    info!("   events sent:       {}", stats.events_sent.load(Ordering::Relaxed));
    info!("   events received:   {}", stats.events_received.load(Ordering::Relaxed));
    info!("   failed operations: {}", stats.failed_operations.load(Ordering::Relaxed));
    info!("   player errors:     {}", stats.errors.load(Ordering::Relaxed));

    Ok(())
}
