use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    AccountKind, CampaignId, CampaignRecord, GlobalLedgerState, LedgerAccount, LedgerInstruction,
    ProgramError, RemoteError, RemoteLedger, SignedTransaction, TransactionRecord, TxSignature,
};
use crate::{
    address::{self, Address, Identity, ProgramId},
    amount::Lamports,
};

pub const MAX_TITLE_LEN: usize = 64;
pub const MAX_DESCRIPTION_LEN: usize = 512;
pub const MAX_IMAGE_URL_LEN: usize = 256;
pub const MIN_GOAL: Lamports = 100_000_000;
pub const MIN_DONATION: Lamports = 100_000_000;
pub const MIN_WITHDRAWAL: Lamports = 100_000_000;
pub const DEFAULT_PLATFORM_FEE: u64 = 5;
pub const MAX_PLATFORM_FEE: u64 = 15;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryLedgerState {
    pub clock: u64,
    pub accounts: BTreeMap<Address, LedgerAccount>,
    pub payouts: BTreeMap<Identity, Lamports>,
    processed: BTreeSet<String>,
}

/// In-process implementation of the remote program's contract.
///
/// Accounts are created only at addresses that match their seeds, owner-only
/// instructions check the signer, and every transaction must carry a valid
/// signature. Each accepted transaction advances the clock by one second.
pub struct MemoryLedger {
    program: ProgramId,
    state: Mutex<MemoryLedgerState>,
    online: AtomicBool,
    persist_to: Option<PathBuf>,
}

impl MemoryLedger {
    pub fn new(program: ProgramId) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::with_clock(program, now)
    }

    pub fn with_clock(program: ProgramId, clock: u64) -> Self {
        Self {
            program,
            state: Mutex::new(MemoryLedgerState {
                clock,
                ..Default::default()
            }),
            online: AtomicBool::new(true),
            persist_to: None,
        }
    }

    /// Open a ledger persisted at `path`, starting empty if the file is absent.
    /// The state is written back after every accepted transaction.
    pub fn open(program: ProgramId, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut ledger = Self::new(program);
        if path.exists() {
            let raw = fs::read(&path)?;
            let state: MemoryLedgerState = serde_json::from_slice(&raw)?;
            ledger.state = Mutex::new(state);
        }
        ledger.persist_to = Some(path);
        Ok(ledger)
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    /// Simulate an outage: while offline every call fails with `Unavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Drop an account outright, leaving a gap in the id sequence.
    pub fn purge(&self, address: &Address) -> Option<LedgerAccount> {
        self.lock().accounts.remove(address)
    }

    /// Install an account directly, bypassing the instruction checks.
    pub fn insert(&self, address: Address, account: LedgerAccount) {
        self.lock().accounts.insert(address, account);
    }

    pub fn payouts_of(&self, identity: &Identity) -> Lamports {
        self.lock().payouts.get(identity).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> MemoryLedgerState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryLedgerState> {
        // A poisoned lock only means another test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_online(&self) -> Result<(), RemoteError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("ledger offline".into()))
        }
    }

    fn persist(&self, state: &MemoryLedgerState) {
        let Some(path) = &self.persist_to else {
            return;
        };
        let result = serde_json::to_vec_pretty(state)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, bytes)?;
                Ok(())
            });
        if let Err(err) = result {
            warn!(path = %path.display(), "failed to persist local ledger: {err}");
        }
    }

    fn process(
        &self,
        state: &mut MemoryLedgerState,
        signer: Identity,
        instruction: &LedgerInstruction,
    ) -> Result<(), RemoteError> {
        let program = &self.program;
        match instruction {
            LedgerInstruction::Initialize { state: state_addr } => {
                expect_address(*state_addr, address::global_state_address(program))?;
                if let Some(LedgerAccount::State(existing)) = state.accounts.get(state_addr) {
                    if existing.initialized {
                        return Err(RemoteError::AlreadyInitialized);
                    }
                }
                vacant(state, state_addr)?;
                state.accounts.insert(
                    *state_addr,
                    LedgerAccount::State(GlobalLedgerState {
                        initialized: true,
                        campaign_count: 0,
                        platform_fee: DEFAULT_PLATFORM_FEE,
                        platform_address: signer,
                    }),
                );
            }
            LedgerInstruction::CreateCampaign {
                state: state_addr,
                campaign,
                title,
                description,
                image_url,
                goal,
            } => {
                expect_address(*state_addr, address::global_state_address(program))?;
                let global = global_state(state, state_addr)?;
                vacant(state, campaign)?;
                let cid = global.next_campaign_id();
                expect_address(*campaign, address::campaign_address(program, cid))?;
                validate_campaign(title, description, image_url, *goal)?;

                let timestamp = tick(state);
                if let Some(LedgerAccount::State(global)) = state.accounts.get_mut(state_addr) {
                    global.campaign_count = cid;
                }
                state.accounts.insert(
                    *campaign,
                    LedgerAccount::Campaign(CampaignRecord {
                        cid,
                        creator: signer,
                        title: title.clone(),
                        description: description.clone(),
                        image_url: image_url.clone(),
                        goal: *goal,
                        amount_raised: 0,
                        balance: 0,
                        donors: 0,
                        withdrawals: 0,
                        timestamp,
                        active: true,
                        completion_message: None,
                    }),
                );
            }
            LedgerInstruction::UpdateCampaign {
                campaign,
                cid,
                title,
                description,
                image_url,
                goal,
            } => {
                let record = owned_campaign(state, program, campaign, *cid, signer)?;
                validate_campaign(title, description, image_url, *goal)?;
                let updated = CampaignRecord {
                    title: title.clone(),
                    description: description.clone(),
                    image_url: image_url.clone(),
                    goal: *goal,
                    ..record
                };
                state
                    .accounts
                    .insert(*campaign, LedgerAccount::Campaign(updated));
            }
            LedgerInstruction::DeleteCampaign { campaign, cid } => {
                let mut record = owned_campaign(state, program, campaign, *cid, signer)?;
                if !record.active {
                    return Err(RemoteError::Program(ProgramError::InactiveCampaign));
                }
                record.active = false;
                state
                    .accounts
                    .insert(*campaign, LedgerAccount::Campaign(record));
            }
            LedgerInstruction::Donate {
                campaign,
                transaction,
                cid,
                amount,
            } => {
                let mut record = campaign_at(state, program, campaign, *cid)?;
                vacant(state, transaction)?;
                expect_address(
                    *transaction,
                    address::donor_transaction_address(program, &signer, *cid, record.donors + 1),
                )?;
                if !record.active {
                    return Err(RemoteError::Program(ProgramError::InactiveCampaign));
                }
                if *amount < MIN_DONATION {
                    return Err(RemoteError::Program(ProgramError::InvalidDonationAmount));
                }
                if record.amount_raised >= record.goal {
                    return Err(RemoteError::Program(ProgramError::CampaignGoalActualized));
                }

                let timestamp = tick(state);
                record.amount_raised += amount;
                record.balance += amount;
                record.donors += 1;
                state
                    .accounts
                    .insert(*campaign, LedgerAccount::Campaign(record));
                state.accounts.insert(
                    *transaction,
                    LedgerAccount::Transaction(TransactionRecord {
                        cid: *cid,
                        owner: signer,
                        amount: *amount,
                        timestamp,
                        credited: true,
                    }),
                );
            }
            LedgerInstruction::Withdraw {
                campaign,
                transaction,
                state: state_addr,
                platform,
                cid,
                amount,
            } => {
                let mut record = campaign_at(state, program, campaign, *cid)?;
                vacant(state, transaction)?;
                expect_address(
                    *transaction,
                    address::withdraw_transaction_address(
                        program,
                        &signer,
                        *cid,
                        record.withdrawals + 1,
                    ),
                )?;
                expect_address(*state_addr, address::global_state_address(program))?;
                let global = global_state(state, state_addr)?;
                if record.creator != signer {
                    return Err(unauthorized("only the campaign creator may withdraw"));
                }
                if *amount < MIN_WITHDRAWAL {
                    return Err(RemoteError::Program(ProgramError::InvalidWithdrawalAmount));
                }
                if *amount > record.balance {
                    return Err(RemoteError::Program(ProgramError::InsufficientFund));
                }
                if *platform != global.platform_address {
                    return Err(RemoteError::Program(ProgramError::InvalidPlatformAddress));
                }

                let (creator_share, platform_share) = global.split(*amount);
                *state.payouts.entry(signer).or_default() += creator_share;
                *state.payouts.entry(*platform).or_default() += platform_share;

                let timestamp = tick(state);
                record.withdrawals += 1;
                record.balance -= amount;
                state
                    .accounts
                    .insert(*campaign, LedgerAccount::Campaign(record));
                state.accounts.insert(
                    *transaction,
                    LedgerAccount::Transaction(TransactionRecord {
                        cid: *cid,
                        owner: signer,
                        amount: *amount,
                        timestamp,
                        credited: false,
                    }),
                );
            }
            LedgerInstruction::UpdatePlatformSettings {
                state: state_addr,
                fee_percent,
            } => {
                expect_address(*state_addr, address::global_state_address(program))?;
                let mut global = global_state(state, state_addr)?;
                if global.platform_address != signer {
                    return Err(unauthorized("only the platform authority may change the fee"));
                }
                if !(1..=MAX_PLATFORM_FEE).contains(fee_percent) {
                    return Err(RemoteError::Program(ProgramError::InvalidPlatformFee));
                }
                global.platform_fee = *fee_percent;
                state
                    .accounts
                    .insert(*state_addr, LedgerAccount::State(global));
            }
        }
        Ok(())
    }
}

fn tick(state: &mut MemoryLedgerState) -> u64 {
    state.clock += 1;
    state.clock
}

fn unauthorized(reason: &str) -> RemoteError {
    RemoteError::Unauthorized(reason.to_string())
}

fn expect_address(supplied: Address, derived: Address) -> Result<(), RemoteError> {
    if supplied == derived {
        Ok(())
    } else {
        Err(RemoteError::SeedMismatch(supplied))
    }
}

fn vacant(state: &MemoryLedgerState, address: &Address) -> Result<(), RemoteError> {
    if state.accounts.contains_key(address) {
        Err(RemoteError::AccountInUse(*address))
    } else {
        Ok(())
    }
}

fn global_state(
    state: &MemoryLedgerState,
    address: &Address,
) -> Result<GlobalLedgerState, RemoteError> {
    match state.accounts.get(address) {
        Some(LedgerAccount::State(global)) => Ok(global.clone()),
        _ => Err(RemoteError::AccountNotFound(*address)),
    }
}

fn campaign_at(
    state: &MemoryLedgerState,
    program: &ProgramId,
    address: &Address,
    cid: CampaignId,
) -> Result<CampaignRecord, RemoteError> {
    expect_address(*address, address::campaign_address(program, cid))?;
    match state.accounts.get(address) {
        Some(LedgerAccount::Campaign(record)) if record.cid == cid => Ok(record.clone()),
        Some(LedgerAccount::Campaign(_)) => {
            Err(RemoteError::Program(ProgramError::CampaignNotFound))
        }
        _ => Err(RemoteError::AccountNotFound(*address)),
    }
}

fn owned_campaign(
    state: &MemoryLedgerState,
    program: &ProgramId,
    address: &Address,
    cid: CampaignId,
    signer: Identity,
) -> Result<CampaignRecord, RemoteError> {
    let record = campaign_at(state, program, address, cid)?;
    if record.creator != signer {
        return Err(unauthorized("only the campaign creator may modify it"));
    }
    Ok(record)
}

fn validate_campaign(
    title: &str,
    description: &str,
    image_url: &str,
    goal: Lamports,
) -> Result<(), RemoteError> {
    if title.len() > MAX_TITLE_LEN {
        return Err(RemoteError::Program(ProgramError::TitleTooLong));
    }
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(RemoteError::Program(ProgramError::DescriptionTooLong));
    }
    if image_url.len() > MAX_IMAGE_URL_LEN {
        return Err(RemoteError::Program(ProgramError::ImageUrlTooLong));
    }
    if goal < MIN_GOAL {
        return Err(RemoteError::Program(ProgramError::InvalidGoalAmount));
    }
    Ok(())
}

#[async_trait]
impl RemoteLedger for MemoryLedger {
    async fn get_account(&self, address: &Address) -> Result<Option<LedgerAccount>, RemoteError> {
        self.ensure_online()?;
        Ok(self.lock().accounts.get(address).cloned())
    }

    async fn scan_accounts(
        &self,
        kind: AccountKind,
    ) -> Result<Vec<(Address, LedgerAccount)>, RemoteError> {
        self.ensure_online()?;
        Ok(self
            .lock()
            .accounts
            .iter()
            .filter(|(_, account)| account.kind() == kind)
            .map(|(address, account)| (*address, account.clone()))
            .collect())
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxSignature, RemoteError> {
        self.ensure_online()?;
        tx.verify()?;
        let id = tx.id();
        let mut state = self.lock();
        if state.processed.contains(&id.0) {
            return Err(RemoteError::DuplicateTransaction);
        }
        // Work on a copy so a rejected instruction leaves no partial writes.
        let mut next = state.clone();
        self.process(&mut next, tx.transaction.signer, &tx.transaction.instruction)?;
        next.processed.insert(id.0.clone());
        *state = next;
        debug!(
            instruction = tx.transaction.instruction.name(),
            signer = %tx.transaction.signer,
            "transaction accepted"
        );
        self.persist(&state);
        Ok(id)
    }
}
