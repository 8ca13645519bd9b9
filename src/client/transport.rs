// src/client/transport.rs

//! One logical connection per session to the hub, with bounded reconnect.
//!
//! Outbound frames are fire-and-forget. While the link is down they are
//! dropped; the sync engine keeps unacked answers `Pending` and resends them
//! after the next `Connected`, so delivery is at-least-once and the
//! question id makes repeats harmless.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::{
    config::TransportConfig,
    error::ClientError,
    protocol::{self, ClientMessage, Hello, RejectReason, ServerMessage, Welcome},
};

type Wire = Framed<TcpStream, LinesCodec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    State(ConnectionState),
    Inbound(ServerMessage),
    /// The hub refused the session. Terminal for this transport.
    Rejected(RejectReason),
}

#[derive(Debug)]
enum Command {
    Send(ClientMessage),
    Reconnect,
    Close,
}

/// Result of the duplicate-session probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Available { remaining_seconds: i64 },
    Rejected(RejectReason),
}

/// Delay before reconnect attempt `attempt` (1-based): base doubling, capped.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

enum Handshake {
    Accepted(Wire, Welcome),
    Rejected(RejectReason),
}

async fn handshake(
    address: &str,
    hello: &Hello,
    timeout: Duration,
) -> Result<Handshake, ClientError> {
    let stream = time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| ClientError::Timeout)??;
    stream.set_nodelay(true)?;
    let mut wire = Framed::new(stream, protocol::codec());
    wire.send(protocol::encode(&ClientMessage::Hello(hello.clone()))?)
        .await?;

    let reply = time::timeout(timeout, wire.next())
        .await
        .map_err(|_| ClientError::Timeout)?;
    match reply {
        Some(line) => match protocol::decode::<ServerMessage>(&line?)? {
            ServerMessage::Welcome(welcome) => Ok(Handshake::Accepted(wire, welcome)),
            ServerMessage::Rejected(rejection) => Ok(Handshake::Rejected(rejection.reason)),
            _ => Err(ClientError::UnexpectedMessage),
        },
        None => Err(ClientError::ConnectionClosed),
    }
}

/// Asks the hub whether this session is free without binding it.
pub async fn probe(
    address: &str,
    hello: &Hello,
    timeout: Duration,
) -> Result<ProbeOutcome, ClientError> {
    let hello = Hello {
        probe: true,
        ..hello.clone()
    };
    match handshake(address, &hello, timeout).await? {
        Handshake::Accepted(_, welcome) => Ok(ProbeOutcome::Available {
            remaining_seconds: welcome.remaining_seconds,
        }),
        Handshake::Rejected(reason) => Ok(ProbeOutcome::Rejected(reason)),
    }
}

pub struct SessionTransport {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl SessionTransport {
    /// Starts connecting in the background. Events arrive on the returned receiver.
    pub fn spawn(
        address: String,
        hello: Hello,
        config: TransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let link = Link {
            address,
            hello: Hello {
                probe: false,
                ..hello
            },
            config,
            commands: command_rx,
            events: event_tx,
            state: state_tx,
        };
        let task = tokio::spawn(link.run());
        (
            Self {
                commands,
                state,
                task,
            },
            event_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn send(&self, msg: ClientMessage) {
        if self.commands.send(Command::Send(msg)).is_err() {
            debug!("transport task gone; dropping outbound frame");
        }
    }

    pub fn send_answer(&self, question_id: i64, order: i64, answer: String) {
        self.send(ClientMessage::SubmitAnswer(protocol::AnswerPayload {
            question_id,
            order,
            answer,
        }));
    }

    pub fn request_submit(&self, request: protocol::SubmitRequest) {
        self.send(ClientMessage::RequestSubmit(request));
    }

    /// Restarts the retry cycle after attempts were exhausted.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    pub async fn close(self) {
        let _ = self.commands.send(Command::Close);
        if let Err(err) = self.task.await {
            if err.is_panic() {
                warn!(?err, "transport task panicked");
            }
        }
    }
}

enum PumpEnd {
    /// Link lost; try again.
    Dropped,
    /// Owner asked to stop, or went away.
    Closed,
}

struct Link {
    address: String,
    hello: Hello,
    config: TransportConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
}

impl Link {
    fn set_state(&self, state: ConnectionState) {
        if *self.state.borrow() != state {
            self.state.send_replace(state);
            let _ = self.events.send(TransportEvent::State(state));
        }
    }

    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut was_connected = false;
        loop {
            match handshake(&self.address, &self.hello, self.config.connect_timeout).await {
                Ok(Handshake::Accepted(wire, welcome)) => {
                    info!(address = %self.address, "session transport connected");
                    attempt = 0;
                    was_connected = true;
                    self.set_state(ConnectionState::Connected);
                    let _ = self
                        .events
                        .send(TransportEvent::Inbound(ServerMessage::Welcome(welcome)));
                    match self.pump(wire).await {
                        PumpEnd::Closed => {
                            self.set_state(ConnectionState::Disconnected);
                            return;
                        }
                        PumpEnd::Dropped => warn!("session transport dropped"),
                    }
                }
                // Our previous connection may not have been released yet.
                Ok(Handshake::Rejected(RejectReason::AlreadyConnected)) if was_connected => {
                    debug!(attempt, "previous connection still bound; retrying");
                }
                Ok(Handshake::Rejected(reason)) => {
                    warn!(?reason, "session rejected by hub");
                    let _ = self.events.send(TransportEvent::Rejected(reason));
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                Err(err) => debug!(%err, attempt, "connect attempt failed"),
            }

            attempt += 1;
            if attempt > self.config.max_attempts {
                warn!(attempts = attempt - 1, "reconnect attempts exhausted");
                self.set_state(ConnectionState::Disconnected);
                if !self.wait_for_reconnect().await {
                    return;
                }
                attempt = 0;
                continue;
            }

            self.set_state(ConnectionState::Reconnecting);
            let delay = backoff_delay(attempt, self.config.backoff_base, self.config.backoff_max);
            if !self.sleep_offline(delay).await {
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        }
    }

    /// Waits out a backoff delay, discarding sends. False means stop.
    async fn sleep_offline(&mut self, delay: Duration) -> bool {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(_)) => debug!("offline; outbound frame dropped"),
                    Some(Command::Reconnect) => return true,
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    /// Parked after giving up. False means stop.
    async fn wait_for_reconnect(&mut self) -> bool {
        loop {
            match self.commands.recv().await {
                Some(Command::Send(_)) => debug!("disconnected; outbound frame dropped"),
                Some(Command::Reconnect) => return true,
                Some(Command::Close) | None => return false,
            }
        }
    }

    async fn pump(&mut self, mut wire: Wire) -> PumpEnd {
        let every = self.config.heartbeat_interval;
        let mut heartbeat = time::interval_at(Instant::now() + every, every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let idle = time::sleep(self.config.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                _ = &mut idle => {
                    warn!(timeout = ?self.config.idle_timeout, "hub went silent");
                    return PumpEnd::Dropped;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = write(&mut wire, &ClientMessage::Heartbeat).await {
                        warn!(%err, "write error");
                        return PumpEnd::Dropped;
                    }
                }
                frame = wire.next() => match frame {
                    Some(Ok(line)) => {
                        idle.as_mut().reset(Instant::now() + self.config.idle_timeout);
                        match protocol::decode::<ServerMessage>(&line) {
                            Ok(msg) => {
                                if self.events.send(TransportEvent::Inbound(msg)).is_err() {
                                    return PumpEnd::Closed;
                                }
                            }
                            Err(err) => warn!(%err, "undecodable frame from hub"),
                        }
                    }
                    Some(Err(err)) => {
                        warn!(%err, "read error");
                        return PumpEnd::Dropped;
                    }
                    None => return PumpEnd::Dropped,
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(msg)) => match write(&mut wire, &msg).await {
                        Ok(()) => {}
                        Err(ClientError::Decode(err)) => {
                            warn!(%err, "failed to encode outbound frame");
                        }
                        Err(err) => {
                            warn!(%err, "write error");
                            return PumpEnd::Dropped;
                        }
                    },
                    Some(Command::Reconnect) => {}
                    Some(Command::Close) | None => return PumpEnd::Closed,
                },
            }
        }
    }
}

async fn write(wire: &mut Wire, msg: &ClientMessage) -> Result<(), ClientError> {
    wire.send(protocol::encode(msg)?).await?;
    Ok(())
}
