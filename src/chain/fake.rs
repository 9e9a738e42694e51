//! In-memory chain used by the scenario tests
//!
//! Mines a transaction the moment it is broadcast if its price clears the
//! threshold for its nonce; otherwise it sits in the pool until replaced.

use super::{ChainClient, ReceiptInfo, SendError, TransactionInfo};
use crate::error::PacerResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, H256, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const TX_TAG: u8 = 0x7a;
const BLOCK_TAG: u8 = 0xb1;

#[derive(Debug, Clone, PartialEq)]
pub struct SentTx {
    pub hash: H256,
    pub nonce: u64,
    pub gas_price: U256,
}

#[derive(Debug, Clone)]
struct FakeTx {
    nonce: u64,
    gas_price: U256,
    block: Option<H256>,
}

struct State {
    address: Address,
    head: u64,
    blocks: HashMap<H256, u64>,
    /// Blocks that left the chain but still back receipts
    orphaned: HashMap<H256, u64>,
    stale_receipts: bool,
    txs: HashMap<H256, FakeTx>,
    next_nonce: u64,
    stale_nonce_reads: u32,
    nonce_lags: VecDeque<u32>,
    default_min_price: U256,
    min_price_by_nonce: HashMap<u64, U256>,
    auto_advance: bool,
    send_errors: VecDeque<SendError>,
    block_polls: HashMap<H256, u32>,
    fork_after_polls: Option<(u32, bool)>,
    sent: Vec<SentTx>,
    counter: u64,
}

pub struct FakeChain {
    state: Mutex<State>,
}

fn make_hash(tag: u8, n: u64) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    H256(bytes)
}

impl State {
    fn new_block(&mut self) -> H256 {
        self.head += 1;
        self.counter += 1;
        let hash = make_hash(BLOCK_TAG, self.counter);
        self.blocks.insert(hash, self.head);
        hash
    }

    fn include(&mut self, tx_hash: H256) {
        let block = self.new_block();
        if let Some(tx) = self.txs.get_mut(&tx_hash) {
            tx.block = Some(block);
        }
        self.next_nonce += 1;
        self.stale_nonce_reads = self.nonce_lags.pop_front().unwrap_or(0);
    }

    fn drop_block(&mut self, block_hash: H256, remine: bool) {
        if let Some(number) = self.blocks.remove(&block_hash) {
            if self.stale_receipts {
                self.orphaned.insert(block_hash, number);
            }
        }
        let orphaned: Vec<H256> = self
            .txs
            .iter()
            .filter(|(_, tx)| tx.block == Some(block_hash))
            .map(|(hash, _)| *hash)
            .collect();

        for hash in orphaned {
            if !self.stale_receipts {
                if let Some(tx) = self.txs.get_mut(&hash) {
                    tx.block = None;
                }
            }
            self.next_nonce -= 1;
            if remine {
                self.include(hash);
            }
        }
    }

    fn min_price(&self, nonce: u64) -> U256 {
        self.min_price_by_nonce
            .get(&nonce)
            .copied()
            .unwrap_or(self.default_min_price)
    }
}

impl FakeChain {
    pub fn new(next_nonce: u64) -> Self {
        Self {
            state: Mutex::new(State {
                address: Address::repeat_byte(0xaa),
                head: 0,
                blocks: HashMap::new(),
                orphaned: HashMap::new(),
                stale_receipts: false,
                txs: HashMap::new(),
                next_nonce,
                stale_nonce_reads: 0,
                nonce_lags: VecDeque::new(),
                default_min_price: U256::zero(),
                min_price_by_nonce: HashMap::new(),
                auto_advance: true,
                send_errors: VecDeque::new(),
                block_polls: HashMap::new(),
                fork_after_polls: None,
                sent: Vec::new(),
                counter: 0,
            }),
        }
    }

    /// When set, every head query produces a new empty block
    pub fn set_auto_advance(&self, enabled: bool) {
        self.state.lock().unwrap().auto_advance = enabled;
    }

    /// Keep serving receipts for transactions whose block was reorganized away
    pub fn set_stale_receipts(&self, enabled: bool) {
        self.state.lock().unwrap().stale_receipts = enabled;
    }

    pub fn set_min_price(&self, price: u64) {
        self.state.lock().unwrap().default_min_price = U256::from(price);
    }

    pub fn set_min_price_for_nonce(&self, nonce: u64, price: u64) {
        self.state
            .lock()
            .unwrap()
            .min_price_by_nonce
            .insert(nonce, U256::from(price));
    }

    /// After the n-th mined transaction, the nonce query lags for `reads` calls
    pub fn push_nonce_lag(&self, reads: u32) {
        self.state.lock().unwrap().nonce_lags.push_back(reads);
    }

    pub fn push_send_error(&self, err: SendError) {
        self.state.lock().unwrap().send_errors.push_back(err);
    }

    /// The next block holding a transaction is reorganized away on its n-th lookup
    pub fn fork_after_polls(&self, polls: u32, remine: bool) {
        self.state.lock().unwrap().fork_after_polls = Some((polls, remine));
    }

    pub fn mine_empty_block(&self) -> H256 {
        self.state.lock().unwrap().new_block()
    }

    /// Include an already pooled transaction in a new block
    pub fn mine_pooled(&self, tx_hash: H256) {
        self.state.lock().unwrap().include(tx_hash);
    }

    pub fn drop_block(&self, block_hash: H256) {
        self.state.lock().unwrap().drop_block(block_hash, false);
    }

    pub fn block_polls(&self, block_hash: H256) -> u32 {
        self.state
            .lock()
            .unwrap()
            .block_polls
            .get(&block_hash)
            .copied()
            .unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn next_nonce(&self) -> u64 {
        self.state.lock().unwrap().next_nonce
    }

    /// Hashes currently included in a canonical block
    pub fn mined(&self) -> Vec<H256> {
        let state = self.state.lock().unwrap();
        let mut mined: Vec<H256> = state
            .txs
            .iter()
            .filter(|(_, tx)| tx.block.map_or(false, |b| state.blocks.contains_key(&b)))
            .map(|(hash, _)| *hash)
            .collect();
        mined.sort();
        mined
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn address(&self) -> Address {
        self.state.lock().unwrap().address
    }

    async fn transaction(&self, hash: H256) -> PacerResult<Option<TransactionInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state.txs.get(&hash).map(|tx| TransactionInfo {
            hash,
            nonce: tx.nonce,
            gas_price: tx.gas_price,
        }))
    }

    async fn transaction_receipt(&self, hash: H256) -> PacerResult<Option<ReceiptInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state.txs.get(&hash).and_then(|tx| {
            let block_hash = tx.block?;
            let block_number = *state
                .blocks
                .get(&block_hash)
                .or_else(|| state.orphaned.get(&block_hash))?;
            Some(ReceiptInfo {
                hash,
                block_hash,
                block_number,
            })
        }))
    }

    async fn block_number_by_hash(&self, block_hash: H256) -> PacerResult<Option<u64>> {
        let mut state = self.state.lock().unwrap();
        let polls = {
            let polls = state.block_polls.entry(block_hash).or_insert(0);
            *polls += 1;
            *polls
        };

        if let Some((after, remine)) = state.fork_after_polls {
            let holds_tx = state.txs.values().any(|tx| tx.block == Some(block_hash));
            if holds_tx && polls >= after {
                state.fork_after_polls = None;
                state.drop_block(block_hash, remine);
            }
        }

        Ok(state.blocks.get(&block_hash).copied())
    }

    async fn block_number(&self) -> PacerResult<u64> {
        let mut state = self.state.lock().unwrap();
        if state.auto_advance {
            state.new_block();
        }
        Ok(state.head)
    }

    async fn transaction_count(&self, _address: Address) -> PacerResult<u64> {
        let mut state = self.state.lock().unwrap();
        if state.stale_nonce_reads > 0 {
            state.stale_nonce_reads -= 1;
            return Ok(state.next_nonce.saturating_sub(1));
        }
        Ok(state.next_nonce)
    }

    async fn balance(&self, _address: Address) -> PacerResult<U256> {
        Ok(U256::exp10(18))
    }

    async fn gas_price(&self) -> PacerResult<U256> {
        Ok(U256::from(1_000))
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> Result<H256, SendError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.send_errors.pop_front() {
            return Err(err);
        }

        let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or(state.next_nonce);
        let gas_price = tx.gas_price().unwrap_or_default();

        if nonce < state.next_nonce {
            return Err(SendError::NonceTooLow);
        }

        let pooled = state
            .txs
            .values()
            .filter(|t| t.nonce == nonce && t.block.is_none());
        for existing in pooled {
            if existing.gas_price == gas_price {
                return Err(SendError::KnownTransaction);
            }
            if existing.gas_price > gas_price {
                return Err(SendError::ReplacementUnderpriced);
            }
        }

        state.counter += 1;
        let hash = make_hash(TX_TAG, state.counter);
        state.txs.insert(
            hash,
            FakeTx {
                nonce,
                gas_price,
                block: None,
            },
        );
        state.sent.push(SentTx {
            hash,
            nonce,
            gas_price,
        });

        if nonce == state.next_nonce && gas_price >= state.min_price(nonce) {
            state.include(hash);
        }

        Ok(hash)
    }
}
