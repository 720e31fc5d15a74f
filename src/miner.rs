//! The mining surface: block templates and work acceptance.
//!
//! The integrator calls `create_block_template` to get a candidate block
//! plus the next miniblock to grind; miners return solved 68-byte records
//! through `accept_work`. Templates track the live mini-DAG: the first
//! template of an interval hands out a genesis miniblock anchored on the
//! block tips, later ones chain on the DAG's best tip, and once nine
//! miniblocks stand the final template carries the header binding. A
//! solved final miniblock closes the interval and the complete block goes
//! straight through the admission pipeline.

use crate::block::Block;
use crate::chain::{Chain, ChainError, Notices};
use crate::config::version_at_height;
use crate::consensus::difficulty::check_pow_target;
use crate::consensus::verify::CompleteBlock;
use crate::constants::{MINIBLOCKS_PER_BLOCK, TX_VALIDITY_HEIGHT};
use crate::crypto::Address;
use crate::miniblock::{MiniBlock, MiniBlockId};
use crate::transaction::Transaction;
use crate::Hash;

/// A mining job: the candidate block, the miniblock to solve, and the job
/// id `accept_work` wants back.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub block: Block,
    pub miniblock: MiniBlock,
    pub job_id: u64,
}

impl Chain {
    /// Build a mining job for the integrator address.
    pub fn create_block_template(&self, integrator: Address) -> Result<BlockTemplate, ChainError> {
        let mut inner = self.write();
        let top = Self::top_record(&inner);
        let height = top.height + 1;
        let tips = vec![top.block_hash];

        // pull work from the pools, registrations first
        let mut txs: Vec<Transaction> = inner.regpool.list();
        for tx in inner.mempool.list_sorted_by_fee() {
            if tx.height < height && height - tx.height < TX_VALIDITY_HEIGHT {
                txs.push(tx);
            }
        }
        let mut remaining = self.config.max_block_size;
        txs.retain(|tx| {
            let size = tx.size();
            if size < remaining {
                remaining -= size;
                true
            } else {
                false
            }
        });
        let tx_hashes: Vec<Hash> = txs.iter().map(|t| t.hash()).collect();

        let now = crate::now_ms();
        let parent_ts = Block::deserialize(&inner.blocks.read(&top.block_hash)?.bytes)?.timestamp;
        let block_ts = now.max(parent_ts + 1);

        // the proof field carries the balance root the block builds on
        let parent_root = self
            .store
            .snapshot(top.state_version)?
            .tree(&crate::state::balance_tree_name(&crate::ZERO_HASH))
            .map(|t| t.root())
            .unwrap_or(crate::ZERO_HASH);

        // miniblock side: anchor, extend, or close the interval
        let mini_tips = inner.dag.get_tips_at_height(height);
        let (chain_minis, mut miniblock) = if mini_tips.is_empty() {
            let mbl = MiniBlock {
                version: 1,
                genesis: true,
                past_count: tips.len() as u8,
                timestamp: now,
                past: [
                    u32::from_be_bytes([tips[0][0], tips[0][1], tips[0][2], tips[0][3]]),
                    0,
                ],
                key_hash: integrator.short_hash(),
                check: MiniBlock::genesis_check(height, &tips),
                nonce: [0u8; 5],
            };
            (Vec::new(), mbl)
        } else {
            let best = &mini_tips[0];
            let history = inner.dag.get_all_history(&best.mbl);
            let mut timestamp = now.max(best.mbl.timestamp);
            let mut past = [best.mbl.id(), 0];
            let mut past_count = 1u8;
            if let Some(second) = mini_tips.get(1) {
                if best.distance == second.distance {
                    past[1] = second.mbl.id();
                    past_count = 2;
                    timestamp = timestamp.max(second.mbl.timestamp);
                }
            }
            let mbl = MiniBlock {
                version: 1,
                genesis: false,
                past_count,
                timestamp,
                past,
                key_hash: integrator.short_hash(),
                check: [0u8; 32],
                nonce: [0u8; 5],
            };
            (history, mbl)
        };

        let block = Block {
            major_version: version_at_height(height),
            minor_version: 0,
            timestamp: block_ts,
            height,
            miner_tx: Transaction::coinbase(integrator),
            proof: parent_root,
            tips,
            miniblocks: chain_minis,
            tx_hashes,
        };

        // with nine miniblocks standing, the next one is final: it chains
        // on the single DAG tip and carries the header binding
        if block.miniblocks.len() == MINIBLOCKS_PER_BLOCK - 1 {
            let digest = crate::sha3(&block.serialize());
            miniblock.key_hash.copy_from_slice(&digest[..16]);
            miniblock.past_count = 1;
            miniblock.past[1] = 0;
        }

        let job_id = inner.job_counter;
        inner.job_counter += 1;
        inner.jobs.insert(job_id, block.clone());
        tracing::debug!(job_id, height, minis = block.miniblocks.len(), "template issued");
        Ok(BlockTemplate {
            block,
            miniblock,
            job_id,
        })
    }

    /// Accept a solved 68-byte miniblock for a job. Returns the miniblock
    /// id and, when the work closed the interval, the new block's hash.
    pub fn accept_work(
        &self,
        job_id: u64,
        bytes: &[u8],
    ) -> Result<(MiniBlockId, Option<Hash>), ChainError> {
        let mbl = MiniBlock::deserialize(bytes)?;
        let mut block_notices: Option<Notices> = None;
        let (id, formed) = {
            let mut inner = self.write();
            let job = inner
                .jobs
                .get(&job_id)
                .cloned()
                .ok_or(ChainError::InvalidBlock("unknown or expired job"))?;
            let difficulty = self.difficulty_for_tips(&mut inner, &job.tips)?;
            if !check_pow_target(&mbl.pow_hash(), difficulty) {
                return Err(ChainError::InvalidPow);
            }
            if inner.dag.is_collision(&mbl) {
                return Err(ChainError::AlreadyExists);
            }
            let distance = inner.dag.insert(mbl)?.distance;
            let id = mbl.id();

            let closes_interval = distance as usize == MINIBLOCKS_PER_BLOCK - 1
                && job.miniblocks.len() == MINIBLOCKS_PER_BLOCK - 1;
            let formed = if closes_interval {
                let mut complete = job.clone();
                complete.miniblocks.push(mbl);
                let txs = Self::resolve_txs(&inner, &complete)?;
                let cb = CompleteBlock {
                    block: complete,
                    txs,
                };
                let hash = cb.block.hash();
                block_notices = Some(self.add_complete_block_locked(&mut inner, &cb)?);
                Some(hash)
            } else {
                None
            };
            (id, formed)
        };

        if let Some(notices) = block_notices {
            self.notify(notices);
        }
        self.notify(Notices {
            new_miniblock: true,
            relay_miniblock: Some(mbl.serialize()),
            ..Default::default()
        });
        Ok((id, formed))
    }
}

/// Grind one block through the full template/accept-work loop. Test
/// support for simulator difficulty, where the first nonce always wins.
#[cfg(test)]
pub(crate) fn mine_block(chain: &Chain, integrator: Address) -> Hash {
    for _ in 0..MINIBLOCKS_PER_BLOCK {
        let template = chain
            .create_block_template(integrator)
            .expect("template available");
        let (_, formed) = chain
            .accept_work(template.job_id, &template.miniblock.serialize())
            .expect("work accepted");
        if let Some(hash) = formed {
            return hash;
        }
    }
    panic!("ten miniblocks did not close the interval");
}
