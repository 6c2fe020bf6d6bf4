use std::{collections::HashSet, io, net::SocketAddr, time::Duration};

use comms::{
    OnoReceiver, OnoSender, WeightUpdate,
    msg::{Command, Msg, Payload},
};
use futures::future;
use log::{debug, info, warn};
use machine_learning::weights::Ownership;
use tokio::{
    io::{AsyncRead, AsyncWrite, Sink},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinSet,
    time,
};

use crate::{
    Result, TrainErr,
    broadcast::{WeightBroadcaster, WeightReceiver},
    reduce::PartialExchange,
};

/// How long to wait before dialing a peer that isn't listening yet.
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// What a peer's reader task forwards to the training loop.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PeerEvent {
    Partial(WeightUpdate),
    PartialsDone(usize),
    Update(WeightUpdate),
    UpdatesDone(usize),
    Disconnect,
    Failed(String),
}

/// The connection to a single remote host.
pub(crate) struct Peer<W: AsyncWrite + Unpin> {
    pub(crate) id: usize,
    pub(crate) tx: OnoSender<W>,
    pub(crate) events: UnboundedReceiver<PeerEvent>,
}

impl<W: AsyncWrite + Unpin> Peer<W> {
    /// Waits for the next event of this peer, a closed channel reads as a failure.
    pub(crate) async fn next_event(&mut self) -> PeerEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| PeerEvent::Failed("connection closed".into()))
    }
}

/// The full mesh of connections between this host and every other host of the
/// cluster. The local host is never one of its peers.
pub struct Mesh<W: AsyncWrite + Unpin> {
    host_id: usize,
    peers: Vec<Peer<W>>,
    readers: JoinSet<()>,
}

impl<W: AsyncWrite + Unpin> Mesh<W> {
    /// Creates a new `Mesh` from already established channels.
    ///
    /// # Arguments
    /// * `host_id` - The id of the local host.
    /// * `links` - The id of each peer with both ends of its channel.
    ///
    /// # Returns
    /// The mesh, or a `Configuration` error if a link points back to the local
    /// host or two links point to the same peer.
    pub fn new<R>(host_id: usize, links: Vec<(usize, OnoReceiver<R>, OnoSender<W>)>) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut seen = HashSet::new();
        let mut readers = JoinSet::new();
        let mut peers = Vec::with_capacity(links.len());

        for (id, rx, tx) in links {
            if id == host_id {
                return Err(TrainErr::configuration(format!(
                    "host {host_id} can't be its own peer"
                )));
            }

            if !seen.insert(id) {
                return Err(TrainErr::configuration(format!("duplicate peer {id}")));
            }

            let (events_tx, events) = mpsc::unbounded_channel();
            readers.spawn(read_peer(id, rx, events_tx));
            peers.push(Peer { id, tx, events });
        }

        peers.sort_by_key(|peer| peer.id);

        Ok(Self {
            host_id,
            peers,
            readers,
        })
    }

    #[inline]
    pub fn host_id(&self) -> usize {
        self.host_id
    }

    /// The size of the cluster, including the local host.
    #[inline]
    pub fn hosts(&self) -> usize {
        self.peers.len() + 1
    }

    /// The ids of every remote host, in ascending order.
    pub fn peer_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.peers.iter().map(|peer| peer.id)
    }

    pub fn exchange(&mut self, ownership: Ownership) -> PartialExchange<'_, W> {
        PartialExchange::new(&mut self.peers, ownership)
    }

    pub fn broadcaster(&mut self) -> WeightBroadcaster<'_, W> {
        WeightBroadcaster::new(&mut self.peers)
    }

    pub fn receiver(&mut self, ownership: Ownership) -> WeightReceiver<'_, W> {
        WeightReceiver::new(&mut self.peers, ownership)
    }

    /// Says goodbye to every peer and waits for their goodbyes.
    ///
    /// # Returns
    /// A `BroadcastDelivery` error if a peer couldn't be reached.
    pub async fn shutdown(&mut self) -> Result<()> {
        let msg = Msg::Control(Command::Disconnect);

        let futs = self.peers.iter_mut().map(async |peer| {
            peer.tx
                .send(&msg)
                .await
                .map_err(|source| TrainErr::BroadcastDelivery {
                    host: peer.id,
                    source,
                })?;

            loop {
                match peer.next_event().await {
                    PeerEvent::Disconnect => break,
                    PeerEvent::Failed(reason) => return Err(TrainErr::broadcast(peer.id, reason)),
                    event => warn!(peer = peer.id; "dropping {} while disconnecting", event.kind()),
                }
            }

            debug!(peer = peer.id; "peer disconnected");
            Ok(())
        });

        future::try_join_all(futs).await?;
        while self.readers.join_next().await.is_some() {}

        Ok(())
    }

    /// Stops every reader task without notifying the peers.
    pub fn abort(&mut self) {
        self.readers.abort_all();
        self.peers.clear();
    }
}

impl Mesh<Sink> {
    /// A mesh without peers, for a single host cluster.
    pub fn local() -> Self {
        Self {
            host_id: 0,
            peers: Vec::new(),
            readers: JoinSet::new(),
        }
    }
}

impl Mesh<OwnedWriteHalf> {
    /// Connects this host with every other host of the cluster over tcp.
    ///
    /// Each pair of hosts shares a single connection, dialed by the one with the
    /// lower id and announced with a `Connect` command.
    ///
    /// # Arguments
    /// * `host_id` - The id of the local host.
    /// * `hosts` - The address of every host, indexed by id.
    ///
    /// # Returns
    /// The connected mesh or an io error.
    pub async fn connect(host_id: usize, hosts: &[SocketAddr]) -> Result<Self> {
        let addr = hosts.get(host_id).ok_or_else(|| {
            TrainErr::configuration(format!("no address for host {host_id}"))
        })?;

        let listener = TcpListener::bind(addr).await?;
        info!(host_id = host_id; "listening for peers at {addr}");

        let dials = hosts
            .iter()
            .enumerate()
            .skip(host_id + 1)
            .map(|(id, addr)| dial(host_id, id, *addr));

        let (mut links, accepted) =
            tokio::try_join!(future::try_join_all(dials), accept(&listener, host_id))?;

        links.extend(accepted);
        info!(peers = links.len(); "mesh connected");

        Self::new(host_id, links)
    }
}

impl PeerEvent {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PeerEvent::Partial(_) => "partial",
            PeerEvent::PartialsDone(_) => "partials_done",
            PeerEvent::Update(_) => "update",
            PeerEvent::UpdatesDone(_) => "updates_done",
            PeerEvent::Disconnect => "disconnect",
            PeerEvent::Failed(_) => "failure",
        }
    }
}

type TcpLink = (
    usize,
    OnoReceiver<tokio::net::tcp::OwnedReadHalf>,
    OnoSender<OwnedWriteHalf>,
);

async fn dial(host_id: usize, peer: usize, addr: SocketAddr) -> Result<TcpLink> {
    let stream = loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => break stream,
            Err(e) => {
                debug!(peer = peer; "peer not reachable yet: {e}");
                time::sleep(RETRY_INTERVAL).await;
            }
        }
    };

    let (rx, tx) = stream.into_split();
    let (rx, mut tx) = comms::channel(rx, tx);
    tx.send(&Msg::Control(Command::Connect { host_id })).await?;

    debug!(peer = peer; "dialed peer");
    Ok((peer, rx, tx))
}

/// Accepts a connection from every host with a lower id than `host_id`.
async fn accept(listener: &TcpListener, host_id: usize) -> Result<Vec<TcpLink>> {
    let mut links = Vec::with_capacity(host_id);
    let mut buf = Vec::new();

    while links.len() < host_id {
        let (stream, addr) = listener.accept().await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, tx) = comms::channel(rx, tx);

        let peer = match rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Connect { host_id: peer }) if peer < host_id => peer,
            msg => {
                warn!("unexpected {} from {addr} while accepting peers", msg.kind());
                continue;
            }
        };

        debug!(peer = peer; "accepted peer from {addr}");
        links.push((peer, rx, tx));
    }

    Ok(links)
}

/// Forwards every message of a peer into its event channel until it disconnects.
async fn read_peer<R>(peer: usize, mut rx: OnoReceiver<R>, events: UnboundedSender<PeerEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        let event = match rx.recv_into(&mut buf).await {
            Ok(Msg::Data(Payload::Partial(partial))) => PeerEvent::Partial(partial),
            Ok(Msg::Data(Payload::Update(update))) => PeerEvent::Update(update),
            Ok(Msg::Control(Command::PartialsDone { iteration })) => {
                PeerEvent::PartialsDone(iteration)
            }
            Ok(Msg::Control(Command::UpdatesDone { iteration })) => {
                PeerEvent::UpdatesDone(iteration)
            }
            Ok(Msg::Control(Command::Disconnect)) => PeerEvent::Disconnect,
            Ok(Msg::Control(Command::Connect { .. })) => {
                warn!(peer = peer; "ignoring repeated connect");
                continue;
            }
            Ok(Msg::Err(detail)) => PeerEvent::Failed(format!("peer failed: {detail}")),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                PeerEvent::Failed("connection closed".into())
            }
            Err(e) => PeerEvent::Failed(e.to_string()),
        };

        let last = matches!(event, PeerEvent::Disconnect | PeerEvent::Failed(_));
        if events.send(event).is_err() || last {
            break;
        }
    }
}
