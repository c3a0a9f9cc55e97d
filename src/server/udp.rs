//! UDP socket glue for the SRP server.
//!
//! Binds a port from the configured range, then drives the core from a
//! single `select!` loop: received datagrams, handler completions, and the
//! lease and outstanding-update timers all funnel into the shared
//! [`SrpServer`], and queued responses are flushed after every event. This
//! is the cooperative event loop the core assumes; nothing here blocks.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{sleep_until, Duration, Instant, Sleep};
use tracing::debug;

use crate::error::Error;
use crate::handler::{completion_channel, CompletionSender, ServiceUpdateId, UpdateResult};
use crate::server::SrpServer;
use crate::time::{Clock, TimeMilli};

/// An [`SrpServer`] shared between the UDP driver, the introspection API,
/// and anyone completing updates.
pub type SharedSrpServer = Arc<RwLock<SrpServer>>;

/// Largest datagram accepted: the mesh IPv6 minimum MTU.
const MAX_DATAGRAM_SIZE: usize = 1280;

/// Placeholder deadline when a timer has nothing scheduled.
const IDLE_TIMER: Duration = Duration::from_secs(3600);

/// The running UDP front-end of an [`SrpServer`].
pub struct UdpServer {
    server: SharedSrpServer,
    socket: UdpSocket,
    completions: mpsc::UnboundedReceiver<(ServiceUpdateId, UpdateResult)>,
    // Held so the completion channel never closes, even when no handler
    // keeps a sender around.
    _completions_tx: CompletionSender,
    clock: Clock,
}

/// Bind a socket in the server's port range and start the server on it.
///
/// The returned [`CompletionSender`] is what a service-update handler uses
/// to report results back into the event loop.
///
/// # Errors
///
/// Returns [`Error::InvalidState`] if the server is not enabled, or an IO
/// error when no port in the range can be bound.
pub async fn new(
    bind_addr: IpAddr,
    server: SharedSrpServer,
    clock: Clock,
) -> Result<(UdpServer, CompletionSender), Error> {
    let (socket, port) = bind_in_range(bind_addr, &server).await?;
    server.write().await.start(port)?;

    let (sender, completions) = completion_channel();
    Ok((
        UdpServer {
            server,
            socket,
            completions,
            _completions_tx: sender.clone(),
            clock,
        },
        sender,
    ))
}

async fn bind_in_range(
    bind_addr: IpAddr,
    server: &SharedSrpServer,
) -> Result<(UdpSocket, u16), Error> {
    let (preferred, port_min, port_max) = {
        let mut server = server.write().await;
        let preferred = server.select_port();
        let (port_min, port_max) = server.port_range();
        (preferred, port_min, port_max)
    };

    let candidates =
        std::iter::once(preferred).chain((port_min..=port_max).filter(move |p| *p != preferred));
    for port in candidates {
        match UdpSocket::bind((bind_addr, port)).await {
            Ok(socket) => return Ok((socket, port)),
            Err(error) => debug!(port, %error, "bind failed, trying next port in range"),
        }
    }
    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::AddrInUse,
        "no free UDP port in the configured range",
    )))
}

impl UdpServer {
    /// Drive the server until a socket error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if receiving or sending on the socket fails.
    pub async fn run(mut self) -> Result<(), Error> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (lease_sleep, transaction_sleep) = {
                let server = self.server.read().await;
                (
                    self.deadline_sleep(server.next_lease_fire()),
                    self.deadline_sleep(server.next_transaction_fire()),
                )
            };
            tokio::pin!(lease_sleep);
            tokio::pin!(transaction_sleep);

            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => {
                    let (len, src) = received?;
                    let now = self.clock.now();
                    self.server
                        .write()
                        .await
                        .handle_message(&buffer[..len], Some(src), now);
                }
                Some((id, result)) = self.completions.recv() => {
                    let now = self.clock.now();
                    self.server
                        .write()
                        .await
                        .handle_service_update_result(id, result, now);
                }
                () = &mut lease_sleep => {
                    let now = self.clock.now();
                    self.server.write().await.handle_lease_timer(now);
                }
                () = &mut transaction_sleep => {
                    let now = self.clock.now();
                    self.server.write().await.handle_outstanding_updates_timer(now);
                }
            }

            self.flush_outbound().await?;
        }
    }

    fn deadline_sleep(&self, at: Option<TimeMilli>) -> Sleep {
        let instant = match at {
            Some(at) => self.clock.instant_at(at),
            None => Instant::now() + IDLE_TIMER,
        };
        sleep_until(instant)
    }

    async fn flush_outbound(&mut self) -> Result<(), Error> {
        loop {
            let next = self.server.write().await.take_outbound();
            let Some(response) = next else {
                return Ok(());
            };
            self.socket.send_to(&response.payload, response.target).await?;
        }
    }
}
