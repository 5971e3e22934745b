use std::{fmt, sync::Arc};

use async_trait::async_trait;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    address::{Address, Identity},
    amount::Lamports,
};

pub mod memory;

pub use memory::MemoryLedger;

pub type CampaignId = u64;

/// Singleton record holding the campaign counter and platform settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalLedgerState {
    pub initialized: bool,
    pub campaign_count: u64,
    pub platform_fee: u64,
    pub platform_address: Identity,
}

impl GlobalLedgerState {
    pub fn next_campaign_id(&self) -> CampaignId {
        self.campaign_count + 1
    }

    /// Split a withdrawal into (creator share, platform share). A fee above
    /// 100% is read as 100%.
    pub fn split(&self, amount: Lamports) -> (Lamports, Lamports) {
        let percent = self.platform_fee.min(100);
        let fee = (amount as u128 * percent as u128 / 100) as Lamports;
        (amount - fee, fee)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignRecord {
    pub cid: CampaignId,
    pub creator: Identity,
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub goal: Lamports,
    /// Cumulative donated.
    pub amount_raised: Lamports,
    /// Currently held; never exceeds `amount_raised`.
    pub balance: Lamports,
    pub donors: u64,
    pub withdrawals: u64,
    pub timestamp: u64,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_message: Option<String>,
}

impl CampaignRecord {
    pub fn status(&self) -> CampaignStatus {
        if self.active {
            CampaignStatus::Active
        } else {
            CampaignStatus::Completed
        }
    }

    pub fn image_ref(&self) -> Option<&str> {
        Some(self.image_url.as_str()).filter(|url| !url.is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Donation,
    Withdrawal,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub cid: CampaignId,
    pub owner: Identity,
    pub amount: Lamports,
    pub timestamp: u64,
    /// `true` for a donation, `false` for a withdrawal.
    pub credited: bool,
}

impl TransactionRecord {
    pub fn kind(&self) -> TransactionKind {
        if self.credited {
            TransactionKind::Donation
        } else {
            TransactionKind::Withdrawal
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerAccount {
    State(GlobalLedgerState),
    Campaign(CampaignRecord),
    Transaction(TransactionRecord),
}

impl LedgerAccount {
    pub fn kind(&self) -> AccountKind {
        match self {
            LedgerAccount::State(_) => AccountKind::State,
            LedgerAccount::Campaign(_) => AccountKind::Campaign,
            LedgerAccount::Transaction(_) => AccountKind::Transaction,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    State,
    Campaign,
    Transaction,
}

/// Instruction set of the remote program. Every variant names the accounts
/// it touches; new sub-records are created at the supplied address.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerInstruction {
    Initialize {
        state: Address,
    },
    CreateCampaign {
        state: Address,
        campaign: Address,
        title: String,
        description: String,
        image_url: String,
        goal: Lamports,
    },
    UpdateCampaign {
        campaign: Address,
        cid: CampaignId,
        title: String,
        description: String,
        image_url: String,
        goal: Lamports,
    },
    DeleteCampaign {
        campaign: Address,
        cid: CampaignId,
    },
    Donate {
        campaign: Address,
        transaction: Address,
        cid: CampaignId,
        amount: Lamports,
    },
    Withdraw {
        campaign: Address,
        transaction: Address,
        state: Address,
        platform: Identity,
        cid: CampaignId,
        amount: Lamports,
    },
    UpdatePlatformSettings {
        state: Address,
        fee_percent: u64,
    },
}

impl LedgerInstruction {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerInstruction::Initialize { .. } => "initialize",
            LedgerInstruction::CreateCampaign { .. } => "create_campaign",
            LedgerInstruction::UpdateCampaign { .. } => "update_campaign",
            LedgerInstruction::DeleteCampaign { .. } => "delete_campaign",
            LedgerInstruction::Donate { .. } => "donate",
            LedgerInstruction::Withdraw { .. } => "withdraw",
            LedgerInstruction::UpdatePlatformSettings { .. } => "update_platform_settings",
        }
    }
}

/// Unsigned transaction: one instruction plus the acting identity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub signer: Identity,
    pub nonce: u64,
    pub instruction: LedgerInstruction,
}

impl Transaction {
    pub fn new(signer: Identity, instruction: LedgerInstruction) -> Self {
        Self {
            signer,
            nonce: rand::random(),
            instruction,
        }
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"fundledger-tx");
        hasher.update(self.signer.as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        // Serializing a plain data enum cannot fail.
        hasher.update(serde_json::to_vec(&self.instruction).unwrap_or_default());
        hasher.finalize().into()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    pub fn id(&self) -> TxSignature {
        TxSignature(hex::encode(&self.signature))
    }

    pub fn verify(&self) -> Result<(), RemoteError> {
        let key = VerifyingKey::from_bytes(self.transaction.signer.as_bytes())
            .map_err(|_| RemoteError::InvalidSignature)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| RemoteError::InvalidSignature)?;
        key.verify_strict(&self.transaction.digest(), &signature)
            .map_err(|_| RemoteError::InvalidSignature)
    }
}

/// Confirmation handle returned for an accepted transaction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TxSignature(pub String);

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Program-level rejections (validation performed by the remote program).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ProgramError {
    #[error("title exceeds the maximum length of 64 characters")]
    TitleTooLong,
    #[error("description exceeds the maximum length of 512 characters")]
    DescriptionTooLong,
    #[error("image url exceeds the maximum length of 256 characters")]
    ImageUrlTooLong,
    #[error("goal must be at least 0.1")]
    InvalidGoalAmount,
    #[error("campaign not found")]
    CampaignNotFound,
    #[error("campaign is inactive")]
    InactiveCampaign,
    #[error("donation must be at least 0.1")]
    InvalidDonationAmount,
    #[error("campaign goal reached")]
    CampaignGoalActualized,
    #[error("withdrawal must be at least 0.1")]
    InvalidWithdrawalAmount,
    #[error("insufficient funds in the campaign")]
    InsufficientFund,
    #[error("the provided platform address is invalid")]
    InvalidPlatformAddress,
    #[error("platform fee must be between 1 and 15 percent")]
    InvalidPlatformFee,
}

/// What the remote reports back. Transported verbatim over RPC.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("account {0} already in use")]
    AccountInUse(Address),
    #[error("supplied address {0} does not match its seeds")]
    SeedMismatch(Address),
    #[error("account {0} not found")]
    AccountNotFound(Address),
    #[error("program state already initialized")]
    AlreadyInitialized,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("transaction signature is invalid")]
    InvalidSignature,
    #[error("transaction already processed")]
    DuplicateTransaction,
    #[error("program error: {0}")]
    Program(ProgramError),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// Request/response surface of the remote program.
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// `Ok(None)` when nothing lives at `address`.
    async fn get_account(&self, address: &Address) -> Result<Option<LedgerAccount>, RemoteError>;

    /// Every account of one kind; the remote offers no finer filter.
    async fn scan_accounts(
        &self,
        kind: AccountKind,
    ) -> Result<Vec<(Address, LedgerAccount)>, RemoteError>;

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxSignature, RemoteError>;
}

#[async_trait]
impl<T: RemoteLedger + ?Sized> RemoteLedger for Arc<T> {
    async fn get_account(&self, address: &Address) -> Result<Option<LedgerAccount>, RemoteError> {
        (**self).get_account(address).await
    }

    async fn scan_accounts(
        &self,
        kind: AccountKind,
    ) -> Result<Vec<(Address, LedgerAccount)>, RemoteError> {
        (**self).scan_accounts(kind).await
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxSignature, RemoteError> {
        (**self).send_transaction(tx).await
    }
}

/// Signature bytes travel as lowercase hex.
mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        hex::decode(String::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}
