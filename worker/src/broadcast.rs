use comms::{
    WeightUpdate,
    msg::{Command, Msg, Payload},
};
use futures::future;
use log::{debug, warn};
use machine_learning::weights::{Ownership, WeightVector};
use tokio::io::AsyncWrite;

use crate::{
    Result, TrainErr,
    mesh::{Peer, PeerEvent},
};

/// Sends this host's freshly updated weights to every peer.
pub struct WeightBroadcaster<'m, W: AsyncWrite + Unpin> {
    peers: &'m mut [Peer<W>],
}

impl<'m, W: AsyncWrite + Unpin> WeightBroadcaster<'m, W> {
    pub(crate) fn new(peers: &'m mut [Peer<W>]) -> Self {
        Self { peers }
    }

    /// Sends every update to every peer, followed by the end of the iteration.
    ///
    /// # Arguments
    /// * `iteration` - The current iteration.
    /// * `updates` - The new values of the weights owned by this host.
    ///
    /// # Returns
    /// The amount of updates sent, or a `BroadcastDelivery` error.
    pub async fn broadcast(&mut self, iteration: usize, updates: &[WeightUpdate]) -> Result<usize> {
        let msgs: Vec<_> = updates
            .iter()
            .map(|update| Msg::Data(Payload::Update(*update)))
            .chain([Msg::Control(Command::UpdatesDone { iteration })])
            .collect();

        let futs = self.peers.iter_mut().map(async |peer| {
            for msg in &msgs {
                peer.tx
                    .send(msg)
                    .await
                    .map_err(|source| TrainErr::BroadcastDelivery {
                        host: peer.id,
                        source,
                    })?;
            }

            Ok::<_, TrainErr>(updates.len())
        });

        let sent: usize = future::try_join_all(futs).await?.into_iter().sum();
        debug!(iteration = iteration, sent = sent; "updates broadcast");
        Ok(sent)
    }
}

/// Applies the weights broadcast by the other hosts to the local replica.
pub struct WeightReceiver<'m, W: AsyncWrite + Unpin> {
    peers: &'m mut [Peer<W>],
    ownership: Ownership,
}

impl<'m, W: AsyncWrite + Unpin> WeightReceiver<'m, W> {
    pub(crate) fn new(peers: &'m mut [Peer<W>], ownership: Ownership) -> Self {
        Self { peers, ownership }
    }

    /// Waits until every peer finished broadcasting `iteration`, overwriting the
    /// local weights with each update on arrival.
    ///
    /// Updates for an index this host owns are dropped, the local write is the
    /// authoritative one.
    ///
    /// # Arguments
    /// * `iteration` - The current iteration.
    /// * `weights` - This host's replica of the weights.
    ///
    /// # Returns
    /// The amount of updates applied, or a `BroadcastDelivery` error if a peer
    /// vanished or sent something else.
    pub async fn receive(&mut self, iteration: usize, weights: &mut WeightVector) -> Result<usize> {
        let mut applied = 0;

        for peer in self.peers.iter_mut() {
            loop {
                match peer.next_event().await {
                    PeerEvent::Update(update) if self.ownership.owns(update.index) => {
                        warn!(
                            peer = peer.id,
                            index = update.index;
                            "ignoring update for a locally owned weight"
                        );
                    }
                    PeerEvent::Update(update) => {
                        weights
                            .overwrite(update)
                            .map_err(|e| TrainErr::broadcast(peer.id, e.to_string()))?;
                        applied += 1;
                    }
                    PeerEvent::UpdatesDone(k) if k == iteration => break,
                    PeerEvent::Failed(reason) => return Err(TrainErr::broadcast(peer.id, reason)),
                    event => {
                        return Err(TrainErr::broadcast(
                            peer.id,
                            format!("unexpected {} during iteration {iteration}", event.kind()),
                        ));
                    }
                }
            }
        }

        debug!(iteration = iteration, applied = applied; "updates received");
        Ok(applied)
    }
}
