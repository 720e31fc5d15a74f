//! Relay plumbing and notification broadcast.
//!
//! The network layer is an external collaborator: it hands the node
//! serialized objects through the chain's submit entry points and receives
//! outbound traffic through [`RelayHooks`] callbacks. A dedicated task
//! drains a bounded channel of transaction hashes, relaying at most
//! `RELAY_BURST` per round and re-relaying every round until each
//! transaction has reached its peer target. Subscribers get parameterless
//! broadcasts for new blocks, height changes, and new miniblocks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::chain::Chain;
use crate::constants::{POOL_HOUSEKEEPING_MS, RELAY_BURST, RELAY_ROUND_MS};
use crate::Hash;

/// Outbound callbacks into the network layer. The defaults drop
/// everything, which is what tests and single-node simulators want.
pub struct RelayHooks {
    /// Relay a serialized complete block with a routing hint.
    pub relay_block: Box<dyn Fn(&[u8], &str) + Send + Sync>,
    /// Relay a 68-byte miniblock with a routing hint.
    pub relay_miniblock: Box<dyn Fn(&[u8], &str) + Send + Sync>,
    /// Relay a pooled transaction by hash; returns how many peers took it.
    pub relay_tx: Box<dyn Fn(&Hash) -> u32 + Send + Sync>,
}

impl Default for RelayHooks {
    fn default() -> Self {
        RelayHooks {
            relay_block: Box::new(|_, _| {}),
            relay_miniblock: Box::new(|_, _| {}),
            relay_tx: Box::new(|_| 0),
        }
    }
}

/// Parameterless broadcast channels for chain events.
pub struct Notifier {
    new_block: broadcast::Sender<()>,
    height_changed: broadcast::Sender<()>,
    new_miniblock: broadcast::Sender<()>,
}

impl Notifier {
    pub fn new() -> Self {
        let (new_block, _) = broadcast::channel(64);
        let (height_changed, _) = broadcast::channel(64);
        let (new_miniblock, _) = broadcast::channel(256);
        Notifier {
            new_block,
            height_changed,
            new_miniblock,
        }
    }

    pub fn subscribe_new_block(&self) -> broadcast::Receiver<()> {
        self.new_block.subscribe()
    }

    pub fn subscribe_height_changed(&self) -> broadcast::Receiver<()> {
        self.height_changed.subscribe()
    }

    pub fn subscribe_new_miniblock(&self) -> broadcast::Receiver<()> {
        self.new_miniblock.subscribe()
    }

    // send errors only mean nobody is listening
    pub fn notify_new_block(&self) {
        let _ = self.new_block.send(());
    }

    pub fn notify_height_changed(&self) {
        let _ = self.height_changed.send(());
    }

    pub fn notify_new_miniblock(&self) {
        let _ = self.new_miniblock.send(());
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain the relay queue and re-relay quiet pool entries until each
/// reaches the peer target. Returns promptly on cancellation.
pub async fn relay_task(
    chain: Arc<Chain>,
    mut queue: mpsc::Receiver<Hash>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(RELAY_ROUND_MS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut pending: Vec<Hash> = Vec::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("relay task stopping");
                return;
            }
            received = queue.recv() => {
                match received {
                    Some(hash) => {
                        if pending.len() < RELAY_BURST * 2 {
                            pending.push(hash);
                        }
                    }
                    None => return, // chain dropped
                }
            }
            _ = interval.tick() => {
                let now = crate::now_ms();
                let mut round: Vec<Hash> = pending.drain(..pending.len().min(RELAY_BURST)).collect();
                if round.len() < RELAY_BURST {
                    for hash in chain.relay_candidates(now, RELAY_BURST - round.len()) {
                        if !round.contains(&hash) {
                            round.push(hash);
                        }
                    }
                }
                if round.is_empty() {
                    continue;
                }
                tracing::debug!(count = round.len(), "relay round");
                for hash in round {
                    let peers = (chain.hooks.relay_tx)(&hash);
                    chain.note_relayed(&hash, peers, now);
                }
            }
        }
    }
}

/// Periodic pool housekeeping: evict mined or stale transfers and
/// registrations that landed on chain.
pub async fn housekeeping_task(chain: Arc<Chain>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_millis(POOL_HOUSEKEEPING_MS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("housekeeping task stopping");
                return;
            }
            _ = interval.tick() => {
                chain.housekeeping();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifier_delivers_to_subscribers() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe_new_block();
        notifier.notify_new_block();
        assert!(rx.try_recv().is_ok());
        // no subscribers is not an error
        notifier.notify_height_changed();
    }

    #[test]
    fn default_hooks_are_silent() {
        let hooks = RelayHooks::default();
        (hooks.relay_block)(&[1, 2, 3], "test");
        (hooks.relay_miniblock)(&[0u8; 68], "test");
        assert_eq!((hooks.relay_tx)(&[0u8; 32]), 0);
    }

    #[tokio::test]
    async fn relay_task_honours_cancellation() {
        let chain = Arc::new(
            crate::chain::Chain::with_defaults(crate::config::Config::simulator()).unwrap(),
        );
        let queue = chain.take_relay_receiver().expect("receiver available once");
        assert!(chain.take_relay_receiver().is_none());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(relay_task(chain, queue, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task exits promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn housekeeping_task_honours_cancellation() {
        let chain = Arc::new(
            crate::chain::Chain::with_defaults(crate::config::Config::simulator()).unwrap(),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(housekeeping_task(chain, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task exits promptly")
            .unwrap();
    }
}
