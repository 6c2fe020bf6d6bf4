use comms::{
    WeightUpdate,
    msg::{Command, Msg, Payload},
};
use futures::future;
use log::debug;
use machine_learning::{gradient::AggregateGradient, weights::Ownership};
use tokio::io::AsyncWrite;

use crate::{
    Result, TrainErr,
    mesh::{Peer, PeerEvent},
};

/// Completes the cluster-wide reduction of an iteration's gradient.
///
/// Every host sends the partial sums of the indices it doesn't own to their owners,
/// and adds the partial sums it receives into the indices it does own.
pub struct PartialExchange<'m, W: AsyncWrite + Unpin> {
    peers: &'m mut [Peer<W>],
    ownership: Ownership,
}

impl<'m, W: AsyncWrite + Unpin> PartialExchange<'m, W> {
    pub(crate) fn new(peers: &'m mut [Peer<W>], ownership: Ownership) -> Self {
        Self { peers, ownership }
    }

    /// Exchanges the partial gradients of `iteration`.
    ///
    /// Once it returns, the entries of `aggregate` owned by this host hold the sum
    /// over the whole cluster. The rest only hold this host's share.
    ///
    /// # Arguments
    /// * `iteration` - The current iteration.
    /// * `aggregate` - This host's partial gradient.
    ///
    /// # Returns
    /// A `BroadcastDelivery` error if a partial couldn't be sent, or a
    /// `PartitionUnavailable` error if a peer's partials never arrived.
    pub async fn exchange(
        &mut self,
        iteration: usize,
        aggregate: &mut AggregateGradient,
    ) -> Result<()> {
        self.send_partials(iteration, aggregate).await?;

        let dimensions = aggregate.len();
        for peer in self.peers.iter_mut() {
            let mut received = 0;

            loop {
                match peer.next_event().await {
                    PeerEvent::Partial(partial)
                        if partial.index < dimensions && self.ownership.owns(partial.index) =>
                    {
                        aggregate.add(partial.index, partial.value);
                        received += 1;
                    }
                    PeerEvent::PartialsDone(k) if k == iteration => break,
                    PeerEvent::Partial(partial) => {
                        return Err(unavailable(
                            peer.id,
                            format!("partial for index {} isn't owned here", partial.index),
                        ));
                    }
                    PeerEvent::Failed(reason) => return Err(unavailable(peer.id, reason)),
                    event => {
                        return Err(unavailable(
                            peer.id,
                            format!("unexpected {} during iteration {iteration}", event.kind()),
                        ));
                    }
                }
            }

            debug!(peer = peer.id, partials = received; "partials received");
        }

        Ok(())
    }

    async fn send_partials(
        &mut self,
        iteration: usize,
        aggregate: &AggregateGradient,
    ) -> Result<()> {
        let hosts = self.ownership.hosts();
        let done = Msg::Control(Command::PartialsDone { iteration });

        let futs = self.peers.iter_mut().map(async |peer| {
            let owned = (peer.id..aggregate.len()).step_by(hosts);

            for index in owned {
                let partial = WeightUpdate::new(index, aggregate[index]);
                let msg = Msg::Data(Payload::Partial(partial));
                peer.tx.send(&msg).await.map_err(|source| TrainErr::BroadcastDelivery {
                    host: peer.id,
                    source,
                })?;
            }

            peer.tx
                .send(&done)
                .await
                .map_err(|source| TrainErr::BroadcastDelivery {
                    host: peer.id,
                    source,
                })
        });

        future::try_join_all(futs).await?;
        Ok(())
    }
}

fn unavailable(host: usize, reason: impl Into<String>) -> TrainErr {
    TrainErr::PartitionUnavailable {
        host,
        reason: reason.into(),
    }
}
