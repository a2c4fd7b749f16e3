//! In-memory ledger.
//!
//! Enforces the ledger's rules (voucher checks, nonce reuse, the reset time
//! gate, the root-setter role, first-write-wins roots, one Merkle claim per
//! player per epoch) without a chain. State can be saved to and loaded from
//! a JSON snapshot so the CLI can drive multi-step scenarios; with autosave
//! on, every confirmed write rewrites the snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use chopshop_core::{ClaimVoucher, EpochWindow, StarsClaimedEvent};
use chopshop_crypto::{verify_voucher, VoucherDomain, VoucherError};
use chopshop_merkle::verify_allocation;

use crate::{LedgerError, LedgerReader, LedgerWriter, Result, StarClaimer, TxHash};

/// Parameters for a fresh mock ledger.
#[derive(Debug, Clone)]
pub struct MockLedgerConfig {
    pub chain_id: u64,
    pub contract: Address,
    /// Address whose signatures the ledger accepts on vouchers
    pub voucher_signer: Address,
    /// Initial holder of the root-setter role
    pub root_setter: Address,
    pub epoch_duration: u64,
    /// Pin the ledger clock; `None` follows the wall clock
    pub start_time: Option<u64>,
}

/// A confirmed write, recorded in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MockTransaction {
    ClaimStars { player: Address, epoch: u64, amount: U256 },
    ResetEpoch { new_epoch: u64 },
    SetEpochRoot { epoch: u64, root: B256 },
    ClaimChops { player: Address, epoch: u64, amount: U256 },
}

/// Full ledger state. Serializable as a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockLedgerState {
    pub chain_id: u64,
    pub contract: Address,
    pub voucher_signer: Address,
    pub root_setters: BTreeSet<Address>,
    pub current_epoch: u64,
    pub last_reset_timestamp: u64,
    pub epoch_duration: u64,
    pub fixed_time: Option<u64>,
    /// epoch -> player -> stars
    pub stars: BTreeMap<u64, BTreeMap<Address, U256>>,
    pub events: Vec<StarsClaimedEvent>,
    pub used_nonces: BTreeSet<U256>,
    pub epoch_roots: BTreeMap<u64, B256>,
    /// epoch -> players that already claimed chops
    pub chops_claimed: BTreeMap<u64, BTreeSet<Address>>,
    pub chops_balances: BTreeMap<Address, U256>,
    pub transactions: Vec<MockTransaction>,
    pub tx_counter: u64,
}

impl MockLedgerState {
    fn now(&self) -> u64 {
        self.fixed_time.unwrap_or_else(wall_clock)
    }

    fn window(&self) -> EpochWindow {
        EpochWindow {
            current_epoch: self.current_epoch,
            last_reset_timestamp: self.last_reset_timestamp,
            epoch_duration: self.epoch_duration,
        }
    }

    fn domain(&self) -> VoucherDomain {
        VoucherDomain {
            chain_id: self.chain_id,
            verifying_contract: self.contract,
        }
    }

    fn record(&mut self, tx: MockTransaction) -> TxHash {
        self.tx_counter += 1;
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&self.tx_counter.to_le_bytes());
        buf[8..16].copy_from_slice(b"mocktxn!");
        self.transactions.push(tx);
        keccak256(buf)
    }
}

#[derive(Debug, Default)]
struct Faults {
    reads: Option<String>,
    writes: Option<String>,
}

/// In-memory ledger shared by every handle cloned from it.
///
/// Each handle carries its own sender address, the way each on-chain call
/// carries `msg.sender`. Use [`MockLedger::connect`] to act as someone else.
#[derive(Debug, Clone)]
pub struct MockLedger {
    state: Arc<RwLock<MockLedgerState>>,
    faults: Arc<RwLock<Faults>>,
    /// Snapshot path rewritten after each write; the mutex orders the saves
    autosave: Arc<Mutex<Option<PathBuf>>>,
    sender: Address,
}

impl MockLedger {
    /// Fresh ledger at epoch 1. The sender defaults to the root setter.
    pub fn new(config: MockLedgerConfig) -> Self {
        let start = config.start_time.unwrap_or_else(wall_clock);
        let state = MockLedgerState {
            chain_id: config.chain_id,
            contract: config.contract,
            voucher_signer: config.voucher_signer,
            root_setters: BTreeSet::from([config.root_setter]),
            current_epoch: 1,
            last_reset_timestamp: start,
            epoch_duration: config.epoch_duration,
            fixed_time: config.start_time,
            stars: BTreeMap::new(),
            events: Vec::new(),
            used_nonces: BTreeSet::new(),
            epoch_roots: BTreeMap::new(),
            chops_claimed: BTreeMap::new(),
            chops_balances: BTreeMap::new(),
            transactions: Vec::new(),
            tx_counter: 0,
        };
        info!(
            "[MOCK] Ledger initialized: chain {}, contract {}, epoch duration {}s",
            config.chain_id, config.contract, config.epoch_duration
        );
        Self::from_state(state, config.root_setter)
    }

    pub fn from_state(state: MockLedgerState, sender: Address) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            faults: Arc::new(RwLock::new(Faults::default())),
            autosave: Arc::new(Mutex::new(None)),
            sender,
        }
    }

    /// Another handle on the same ledger, sending as `sender`.
    pub fn connect(&self, sender: Address) -> Self {
        Self {
            state: Arc::clone(&self.state),
            faults: Arc::clone(&self.faults),
            autosave: Arc::clone(&self.autosave),
            sender,
        }
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn snapshot(&self) -> MockLedgerState {
        self.state.read().expect("ledger lock poisoned").clone()
    }

    /// Load a snapshot written by [`MockLedger::save_to`].
    pub fn load_from(path: &Path, sender: Address) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| LedgerError::RpcError(format!("read {}: {}", path.display(), e)))?;
        let state: MockLedgerState = serde_json::from_slice(&bytes)
            .map_err(|e| LedgerError::SerializationError(e.to_string()))?;
        Ok(Self::from_state(state, sender))
    }

    /// Write the snapshot atomically (temp file + rename).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| LedgerError::SerializationError(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::TransactionFailed(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| LedgerError::TransactionFailed(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| LedgerError::TransactionFailed(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Rewrite the snapshot at `path` after every confirmed write, on every
    /// handle sharing this ledger.
    pub fn autosave_to(&self, path: impl Into<PathBuf>) {
        *self.autosave.lock().expect("autosave lock poisoned") = Some(path.into());
    }

    fn persist(&self) {
        let target = self.autosave.lock().expect("autosave lock poisoned");
        if let Some(path) = target.as_ref() {
            if let Err(e) = self.save_to(path) {
                warn!("[MOCK] Failed to persist ledger state to {}: {}", path.display(), e);
            }
        }
    }

    // ==================== Clock ====================

    pub fn now(&self) -> u64 {
        self.state.read().expect("ledger lock poisoned").now()
    }

    /// Pin the ledger clock.
    pub fn set_time(&self, timestamp: u64) {
        self.state.write().expect("ledger lock poisoned").fixed_time = Some(timestamp);
    }

    /// Move the ledger clock forward, pinning it if it was following the wall clock.
    pub fn advance_time(&self, secs: u64) {
        let mut state = self.state.write().expect("ledger lock poisoned");
        let now = state.now();
        state.fixed_time = Some(now.saturating_add(secs));
    }

    // ==================== Fault injection ====================

    /// Make every read fail with `reason` until cleared with `None`.
    pub fn fail_reads(&self, reason: Option<&str>) {
        self.faults.write().expect("ledger lock poisoned").reads = reason.map(str::to_string);
    }

    /// Make every submitted write fail with `reason` until cleared with `None`.
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.faults.write().expect("ledger lock poisoned").writes = reason.map(str::to_string);
    }

    fn check_read(&self) -> Result<()> {
        match &self.faults.read().expect("ledger lock poisoned").reads {
            Some(reason) => Err(LedgerError::RpcError(reason.clone())),
            None => Ok(()),
        }
    }

    fn check_write(&self) -> Result<()> {
        match &self.faults.read().expect("ledger lock poisoned").writes {
            Some(reason) => Err(LedgerError::TransactionFailed(reason.clone())),
            None => Ok(()),
        }
    }

    // ==================== Roles ====================

    pub fn grant_root_setter(&self, account: Address) -> Result<()> {
        let mut state = self.state.write().expect("ledger lock poisoned");
        if !state.root_setters.contains(&self.sender) {
            return Err(LedgerError::NotAuthorized(self.sender));
        }
        state.root_setters.insert(account);
        info!("[MOCK] Root setter granted to {}", account);
        drop(state);
        self.persist();
        Ok(())
    }

    // ==================== Player calls ====================

    /// Redeem a voucher as the current sender.
    pub fn claim_stars(&self, voucher: &ClaimVoucher) -> Result<TxHash> {
        let mut state = self.state.write().expect("ledger lock poisoned");
        if voucher.claimant != self.sender {
            return Err(LedgerError::VoucherRejected(format!(
                "claimant {} is not sender {}",
                voucher.claimant, self.sender
            )));
        }
        let now = state.now();
        if voucher.is_expired(now) {
            return Err(LedgerError::VoucherRejected(format!(
                "expired at {} (now {})",
                voucher.deadline, now
            )));
        }
        if state.used_nonces.contains(&voucher.nonce) {
            return Err(LedgerError::NonceUsed);
        }
        verify_voucher(voucher, &state.domain(), &state.voucher_signer, now).map_err(|e| match e {
            VoucherError::SignerMismatch { .. } => LedgerError::VoucherRejected("invalid signer".to_string()),
            other => LedgerError::VoucherRejected(other.to_string()),
        })?;

        let epoch = state.current_epoch;
        state.used_nonces.insert(voucher.nonce);
        let balance = state
            .stars
            .entry(epoch)
            .or_default()
            .entry(voucher.claimant)
            .or_insert(U256::ZERO);
        *balance = balance.saturating_add(voucher.amount);
        state.events.push(StarsClaimedEvent {
            player: voucher.claimant,
            epoch,
            amount: voucher.amount,
            nonce: voucher.nonce,
        });
        let tx = state.record(MockTransaction::ClaimStars {
            player: voucher.claimant,
            epoch,
            amount: voucher.amount,
        });
        info!(
            "[MOCK] {} claimed {} stars in epoch {}",
            voucher.claimant, voucher.amount, epoch
        );
        drop(state);
        self.persist();
        Ok(tx)
    }

    /// Redeem a chops allocation for a closed epoch as the current sender.
    pub fn claim_chops(&self, epoch: u64, amount: U256, proof: &[B256]) -> Result<TxHash> {
        let mut state = self.state.write().expect("ledger lock poisoned");
        let root = state
            .epoch_roots
            .get(&epoch)
            .copied()
            .ok_or(LedgerError::RootNotSet(epoch))?;
        if state
            .chops_claimed
            .get(&epoch)
            .is_some_and(|claimed| claimed.contains(&self.sender))
        {
            return Err(LedgerError::AlreadyClaimed);
        }
        if !verify_allocation(&root, &self.sender, amount, proof) {
            return Err(LedgerError::InvalidProof);
        }
        state.chops_claimed.entry(epoch).or_default().insert(self.sender);
        let balance = state.chops_balances.entry(self.sender).or_insert(U256::ZERO);
        *balance = balance.saturating_add(amount);
        let tx = state.record(MockTransaction::ClaimChops {
            player: self.sender,
            epoch,
            amount,
        });
        info!("[MOCK] {} claimed {} chops for epoch {}", self.sender, amount, epoch);
        drop(state);
        self.persist();
        Ok(tx)
    }

    pub fn chops_balance(&self, account: &Address) -> U256 {
        let state = self.state.read().expect("ledger lock poisoned");
        state.chops_balances.get(account).copied().unwrap_or(U256::ZERO)
    }

    pub fn transactions(&self) -> Vec<MockTransaction> {
        self.state.read().expect("ledger lock poisoned").transactions.clone()
    }

    /// Number of confirmed `set_epoch_root` writes.
    pub fn root_write_count(&self) -> usize {
        self.transactions()
            .iter()
            .filter(|tx| matches!(tx, MockTransaction::SetEpochRoot { .. }))
            .count()
    }
}

#[async_trait]
impl LedgerReader for MockLedger {
    async fn chain_time(&self) -> Result<u64> {
        self.check_read()?;
        Ok(self.now())
    }

    async fn epoch_window(&self) -> Result<EpochWindow> {
        self.check_read()?;
        Ok(self.state.read().expect("ledger lock poisoned").window())
    }

    async fn stars_balance(&self, player: Address, epoch: u64) -> Result<U256> {
        self.check_read()?;
        let state = self.state.read().expect("ledger lock poisoned");
        Ok(state
            .stars
            .get(&epoch)
            .and_then(|balances| balances.get(&player))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn star_claim_events(&self) -> Result<Vec<StarsClaimedEvent>> {
        self.check_read()?;
        Ok(self.state.read().expect("ledger lock poisoned").events.clone())
    }

    async fn chops_claimed(&self, epoch: u64, player: Address) -> Result<bool> {
        self.check_read()?;
        let state = self.state.read().expect("ledger lock poisoned");
        Ok(state
            .chops_claimed
            .get(&epoch)
            .is_some_and(|claimed| claimed.contains(&player)))
    }

    async fn epoch_root(&self, epoch: u64) -> Result<B256> {
        self.check_read()?;
        let state = self.state.read().expect("ledger lock poisoned");
        Ok(state.epoch_roots.get(&epoch).copied().unwrap_or(B256::ZERO))
    }
}

#[async_trait]
impl LedgerWriter for MockLedger {
    async fn reset_epoch(&self) -> Result<TxHash> {
        self.check_write()?;
        let mut state = self.state.write().expect("ledger lock poisoned");
        let now = state.now();
        let window = state.window();
        if !window.is_elapsed(now) {
            return Err(LedgerError::EpochNotElapsed {
                next_reset_at: window.next_reset_at(),
            });
        }
        state.current_epoch += 1;
        state.last_reset_timestamp = now;
        let new_epoch = state.current_epoch;
        let tx = state.record(MockTransaction::ResetEpoch { new_epoch });
        info!("[MOCK] Epoch reset: now epoch {} (at {})", new_epoch, now);
        drop(state);
        self.persist();
        Ok(tx)
    }

    async fn set_epoch_root(&self, epoch: u64, root: B256) -> Result<TxHash> {
        self.check_write()?;
        let mut state = self.state.write().expect("ledger lock poisoned");
        if !state.root_setters.contains(&self.sender) {
            return Err(LedgerError::NotAuthorized(self.sender));
        }
        if epoch == 0 || epoch >= state.current_epoch {
            return Err(LedgerError::EpochStillLive(epoch));
        }
        if root == B256::ZERO {
            return Err(LedgerError::InvalidRoot);
        }
        if state.epoch_roots.contains_key(&epoch) {
            return Err(LedgerError::RootAlreadySet(epoch));
        }
        state.epoch_roots.insert(epoch, root);
        let tx = state.record(MockTransaction::SetEpochRoot { epoch, root });
        info!("[MOCK] Epoch {} root set: {}", epoch, root);
        debug!("[MOCK] tx {}", tx);
        drop(state);
        self.persist();
        Ok(tx)
    }
}

#[async_trait]
impl StarClaimer for MockLedger {
    async fn submit_star_claim(&self, voucher: &ClaimVoucher) -> Result<TxHash> {
        self.check_write()?;
        self.connect(voucher.claimant).claim_stars(voucher)
    }
}

fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
