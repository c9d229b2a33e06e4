use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::warn;

use crate::message::Message;
use crate::{AGGREGATOR_RANK, FireError, Rank};

/// Point-to-point and broadcast messaging between named ranks.
pub trait TransportLike: Send + Sync {
    fn rank(&self) -> Rank;

    /// Number of ranks, aggregator included.
    fn size(&self) -> usize;

    fn send(&self, to: Rank, msg: &Message) -> Result<(), FireError>;

    /// Send to every worker rank (1..size).
    fn broadcast_workers(&self, msg: &Message) -> Result<(), FireError> {
        for rank in 1..self.size() {
            self.send(rank, msg)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Envelope {
    pub from: Rank,
    pub frame: Vec<u8>,
}

/// Sending half of one rank's view of the mesh.
#[derive(Clone)]
pub struct Outbox {
    rank: Rank,
    mailboxes: Arc<Vec<UnboundedSender<Envelope>>>,
}

impl TransportLike for Outbox {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.mailboxes.len()
    }

    fn send(&self, to: Rank, msg: &Message) -> Result<(), FireError> {
        let mailbox = self.mailboxes.get(to).ok_or(FireError::UnknownDestination {
            rank: to,
            size: self.mailboxes.len(),
        })?;
        let frame = msg.encode()?;
        mailbox
            .send(Envelope { from: self.rank, frame })
            .map_err(|_| FireError::Transport(format!("mailbox of rank {} is closed", to)))
    }
}

/// Receiving half. Supports "receive from a specific source" by holding
/// back messages from other ranks until they are asked for.
pub struct Inbox {
    rank: Rank,
    rx: UnboundedReceiver<Envelope>,
    held: FxHashMap<Rank, VecDeque<Message>>,
}

impl Inbox {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Next message from any rank; `None` once every sender is gone.
    /// Undecodable frames are logged and skipped.
    pub async fn recv(&mut self) -> Option<(Rank, Message)> {
        if let Some((&from, queue)) = self.held.iter_mut().find(|(_, q)| !q.is_empty()) {
            if let Some(msg) = queue.pop_front() {
                return Some((from, msg));
            }
        }
        loop {
            let envelope = self.rx.recv().await?;
            match Message::decode(&envelope.frame) {
                Ok(msg) => return Some((envelope.from, msg)),
                Err(e) => warn!(rank = self.rank, from = envelope.from, "dropping frame: {}", e),
            }
        }
    }

    /// Next message sent by `source`, holding back anything else.
    pub async fn recv_from(&mut self, source: Rank) -> Result<Message, FireError> {
        if let Some(msg) = self.held.get_mut(&source).and_then(|q| q.pop_front()) {
            return Ok(msg);
        }
        loop {
            let envelope = self.rx.recv().await.ok_or_else(|| {
                FireError::Transport(format!("rank {} mailbox closed waiting for rank {}", self.rank, source))
            })?;
            let msg = match Message::decode(&envelope.frame) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(rank = self.rank, from = envelope.from, "dropping frame: {}", e);
                    continue;
                }
            };
            if envelope.from == source {
                return Ok(msg);
            }
            self.held.entry(envelope.from).or_default().push_back(msg);
        }
    }
}

/// Build a fully connected mesh of `workers + 1` ranks; index 0 is the
/// aggregator.
pub fn mesh(workers: usize) -> Vec<(Outbox, Inbox)> {
    let size = workers + 1;
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded_channel::<Envelope>()).unzip();
    let mailboxes = Arc::new(senders);
    receivers
        .into_iter()
        .enumerate()
        .map(|(rank, rx)| {
            (
                Outbox {
                    rank,
                    mailboxes: Arc::clone(&mailboxes),
                },
                Inbox {
                    rank,
                    rx,
                    held: FxHashMap::default(),
                },
            )
        })
        .collect()
}

pub fn is_aggregator(rank: Rank) -> bool {
    rank == AGGREGATOR_RANK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_point_to_point_delivery() {
        let mut ranks = mesh(2);
        let (_, mut inbox2) = ranks.pop().unwrap();
        let (out1, _inbox1) = ranks.pop().unwrap();
        out1.send(2, &Message::FireStep(12)).unwrap();
        assert_eq!(inbox2.recv().await, Some((1, Message::FireStep(12))));
    }

    #[tokio::test]
    async fn test_out_of_range_rank_is_unknown_destination() {
        let ranks = mesh(2);
        let err = ranks[0].0.send(5, &Message::Kill).unwrap_err();
        assert!(matches!(err, FireError::UnknownDestination { rank: 5, size: 3 }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_recv_from_holds_back_other_sources() {
        let mut ranks = mesh(2);
        let mut inbox0 = {
            let (_, inbox) = ranks.remove(0);
            inbox
        };
        ranks[1].0.send(0, &Message::ResetAck { sample: 0 }).unwrap();
        ranks[0].0.send(0, &Message::ResetAck { sample: 1 }).unwrap();

        assert_eq!(inbox0.recv_from(1).await.unwrap(), Message::ResetAck { sample: 1 });
        assert_eq!(inbox0.held.values().map(|q| q.len()).sum::<usize>(), 1);
        assert_eq!(inbox0.recv_from(2).await.unwrap(), Message::ResetAck { sample: 0 });
        assert!(inbox0.held.values().all(|q| q.is_empty()));
    }

    #[tokio::test]
    async fn test_broadcast_skips_aggregator() {
        let mut ranks = mesh(3);
        let out0 = ranks[0].0.clone();
        out0.broadcast_workers(&Message::Continue).unwrap();
        for (rank, (_, inbox)) in ranks.iter_mut().enumerate().skip(1) {
            assert_eq!(inbox.recv().await, Some((0, Message::Continue)), "rank {}", rank);
        }
        assert!(is_aggregator(out0.rank()));
    }
}
