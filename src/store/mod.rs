//! Client-resident cache of campaigns and settings.
//!
//! `SyncStore` mirrors the ledger with "remote wins" semantics on every
//! sync. Successful mutations patch the cache in place rather than
//! re-listing, so counters derived remotely (donor counts, completion) may
//! drift until the next `load`. Every transition is broadcast to
//! subscribers and written to the fallback store under [`STORAGE_KEY`].

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    amount::{self, Lamports},
    error::ClientError,
    gateway::{CampaignDraft, Created, LedgerGateway, Receipt},
    ledger::{CampaignId, CampaignRecord, RemoteLedger, TransactionRecord, TxSignature},
    wallet::Wallet,
};

pub const STORAGE_KEY: &str = "solfund-ui-state-v1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Uninitialized,
    Syncing,
    Synced,
    /// Serving the persisted snapshot; mutations are refused.
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlatformSettings {
    pub currency_symbol: String,
    /// Display units.
    pub min_donation: f64,
    pub platform_fee_percent: u64,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            currency_symbol: "SOL".into(),
            min_donation: 0.1,
            platform_fee_percent: 5,
        }
    }
}

/// Everything persisted to the fallback store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub campaigns: Vec<CampaignRecord>,
    pub settings: PlatformSettings,
}

/// What subscribers observe.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreView {
    pub phase: SyncPhase,
    pub state: AppState,
}

/// Edit of an existing campaign. `completion_message` is kept locally only.
#[derive(Clone, Debug, PartialEq)]
pub struct CampaignUpdate {
    pub draft: CampaignDraft,
    pub completion_message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SettingsUpdate {
    pub currency_symbol: Option<String>,
    pub min_donation: Option<f64>,
    pub platform_fee_percent: Option<u64>,
}

/// Single-key blob storage for the fallback snapshot.
pub trait FallbackStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, ClientError>;
    fn write(&self, key: &str, blob: &str) -> Result<(), ClientError>;
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Clone, Debug)]
pub struct FileFallback {
    dir: PathBuf,
}

impl FileFallback {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_of(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn persistence(path: &Path, err: std::io::Error) -> ClientError {
    ClientError::Persistence(format!("{}: {err}", path.display()))
}

impl FallbackStore for FileFallback {
    fn read(&self, key: &str) -> Result<Option<String>, ClientError> {
        let path = self.path_of(key);
        match fs::read_to_string(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(persistence(&path, err)),
        }
    }

    fn write(&self, key: &str, blob: &str) -> Result<(), ClientError> {
        let path = self.path_of(key);
        fs::create_dir_all(&self.dir).map_err(|e| persistence(&self.dir, e))?;
        fs::write(&path, blob).map_err(|e| persistence(&path, e))
    }
}

#[derive(Debug, Default)]
pub struct MemoryFallback {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryFallback {
    pub fn with_blob(key: &str, blob: impl Into<String>) -> Self {
        let fallback = Self::default();
        fallback.lock().insert(key.to_string(), blob.into());
        fallback
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FallbackStore for MemoryFallback {
    fn read(&self, key: &str) -> Result<Option<String>, ClientError> {
        Ok(self.lock().get(key).cloned())
    }

    fn write(&self, key: &str, blob: &str) -> Result<(), ClientError> {
        self.lock().insert(key.to_string(), blob.to_string());
        Ok(())
    }
}

pub struct SyncStore<R, W, F> {
    gateway: LedgerGateway<R, W>,
    fallback: F,
    view: watch::Sender<StoreView>,
}

impl<R: RemoteLedger, W: Wallet, F: FallbackStore> SyncStore<R, W, F> {
    pub fn new(gateway: LedgerGateway<R, W>, fallback: F) -> Self {
        let (view, _) = watch::channel(StoreView {
            phase: SyncPhase::Uninitialized,
            state: AppState::default(),
        });
        Self {
            gateway,
            fallback,
            view,
        }
    }

    pub fn gateway(&self) -> &LedgerGateway<R, W> {
        &self.gateway
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreView> {
        self.view.subscribe()
    }

    pub fn phase(&self) -> SyncPhase {
        self.view.borrow().phase
    }

    pub fn settings(&self) -> PlatformSettings {
        self.view.borrow().state.settings.clone()
    }

    pub fn campaigns(&self) -> Vec<CampaignRecord> {
        self.view.borrow().state.campaigns.clone()
    }

    pub fn completed_campaigns(&self) -> Vec<CampaignRecord> {
        self.view
            .borrow()
            .state
            .campaigns
            .iter()
            .filter(|c| !c.active)
            .cloned()
            .collect()
    }

    pub fn campaign(&self, cid: CampaignId) -> Option<CampaignRecord> {
        self.view
            .borrow()
            .state
            .campaigns
            .iter()
            .find(|c| c.cid == cid)
            .cloned()
    }

    /// Read straight from the ledger; transaction history is not cached.
    pub async fn transactions(
        &self,
        cid: CampaignId,
    ) -> Result<Vec<TransactionRecord>, ClientError> {
        self.gateway.list_transactions(cid).await
    }

    fn restore_snapshot(&self) -> Option<AppState> {
        let blob = match self.fallback.read(STORAGE_KEY) {
            Ok(blob) => blob?,
            Err(err) => {
                warn!("failed to read fallback snapshot: {err}");
                return None;
            }
        };
        match serde_json::from_str(&blob) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!("discarding unreadable fallback snapshot: {err}");
                None
            }
        }
    }

    fn persist(&self) {
        let blob = match serde_json::to_string(&self.view.borrow().state) {
            Ok(blob) => blob,
            Err(err) => {
                warn!("failed to encode fallback snapshot: {err}");
                return;
            }
        };
        if let Err(err) = self.fallback.write(STORAGE_KEY, &blob) {
            warn!("failed to persist fallback snapshot: {err}");
        }
    }

    fn transition(&self, phase: SyncPhase, state: Option<AppState>) {
        self.view.send_modify(|view| {
            if view.phase != phase {
                debug!(from = ?view.phase, to = ?phase, "store phase transition");
            }
            view.phase = phase;
            if let Some(state) = state {
                view.state = state;
            }
        });
        self.persist();
    }

    /// Replace the cached campaign `cid` with a patched copy.
    fn patch(&self, cid: CampaignId, edit: impl FnOnce(&mut CampaignRecord)) {
        self.view.send_modify(|view| {
            let campaigns = &mut view.state.campaigns;
            match campaigns.iter().position(|c| c.cid == cid) {
                Some(pos) => {
                    let mut next = campaigns[pos].clone();
                    edit(&mut next);
                    campaigns[pos] = next;
                }
                None => debug!(cid, "campaign not cached, patch skipped"),
            }
        });
        self.persist();
    }

    fn ensure_synced(&self) -> Result<(), ClientError> {
        match self.phase() {
            SyncPhase::Synced => Ok(()),
            SyncPhase::Degraded => Err(ClientError::RemoteUnavailable(
                "serving saved data, changes are disabled until the ledger is reachable".into(),
            )),
            SyncPhase::Uninitialized | SyncPhase::Syncing => {
                Err(ClientError::Precondition("store has not been loaded".into()))
            }
        }
    }

    fn check_minimum(&self, amount_display: f64, what: &str) -> Result<Lamports, ClientError> {
        let settings = self.settings();
        let amount = amount::to_base_units(amount_display)?;
        let minimum = amount::to_base_units(settings.min_donation)?;
        if amount < minimum {
            return Err(ClientError::Precondition(format!(
                "{what} must be at least {} {}",
                amount::format_display(minimum),
                settings.currency_symbol
            )));
        }
        Ok(amount)
    }

    /// Sync the cache with the ledger, or fall back to the persisted snapshot
    /// when the ledger is unreachable.
    ///
    /// Local-only data (currency, minimum donation, completion messages)
    /// survives a successful sync; everything else comes from the ledger.
    pub async fn load(&self) -> Result<SyncPhase, ClientError> {
        let previous = self.phase();
        // The snapshot seeds the cache while syncing and is what a failed
        // sync leaves behind.
        let saved = self.restore_snapshot();
        self.transition(SyncPhase::Syncing, saved);

        match self.gateway.list_campaigns().await {
            Ok(mut listing) => {
                let cached = self.view.borrow().state.clone();
                carry_local_fields(&mut listing.campaigns, &cached.campaigns);
                let mut settings = cached.settings;
                if let Some(global) = &listing.state {
                    settings.platform_fee_percent = global.platform_fee;
                }
                if !listing.skipped.is_empty() {
                    info!(skipped = ?listing.skipped, "some campaigns could not be read");
                }
                info!(campaigns = listing.campaigns.len(), "store synced");
                self.transition(
                    SyncPhase::Synced,
                    Some(AppState {
                        campaigns: listing.campaigns,
                        settings,
                    }),
                );
                Ok(SyncPhase::Synced)
            }
            Err(ClientError::RemoteUnavailable(reason)) => {
                warn!("ledger unreachable, serving saved data: {reason}");
                self.transition(SyncPhase::Degraded, None);
                Ok(SyncPhase::Degraded)
            }
            Err(err) => {
                self.transition(previous, None);
                Err(err)
            }
        }
    }

    pub async fn create(&self, draft: &CampaignDraft) -> Result<Created, ClientError> {
        self.ensure_synced()?;
        let created = self.gateway.create_campaign(draft).await?;
        let record = CampaignRecord {
            cid: created.cid,
            creator: created.creator,
            title: draft.title.clone(),
            description: draft.description.clone(),
            image_url: draft.image_url.clone().unwrap_or_default(),
            goal: created.goal,
            amount_raised: 0,
            balance: 0,
            donors: 0,
            withdrawals: 0,
            timestamp: now(),
            active: true,
            completion_message: None,
        };
        self.view.send_modify(|view| {
            let campaigns = &mut view.state.campaigns;
            match campaigns.iter().position(|c| c.cid == record.cid) {
                Some(pos) => campaigns[pos] = record,
                None => {
                    campaigns.push(record);
                    campaigns.sort_by_key(|c| c.cid);
                }
            }
        });
        self.persist();
        Ok(created)
    }

    pub async fn update(
        &self,
        cid: CampaignId,
        update: &CampaignUpdate,
    ) -> Result<TxSignature, ClientError> {
        self.ensure_synced()?;
        let signature = self.gateway.update_campaign(cid, &update.draft).await?;
        let goal = amount::to_base_units(update.draft.target)?;
        self.patch(cid, |record| {
            record.title = update.draft.title.clone();
            record.description = update.draft.description.clone();
            record.image_url = update.draft.image_url.clone().unwrap_or_default();
            record.goal = goal;
            record.completion_message = update.completion_message.clone();
        });
        Ok(signature)
    }

    pub async fn delete(&self, cid: CampaignId) -> Result<TxSignature, ClientError> {
        self.ensure_synced()?;
        let signature = self.gateway.delete_campaign(cid).await?;
        self.patch(cid, |record| record.active = false);
        Ok(signature)
    }

    pub async fn donate(
        &self,
        cid: CampaignId,
        amount_display: f64,
    ) -> Result<Receipt, ClientError> {
        self.ensure_synced()?;
        self.check_minimum(amount_display, "donation")?;
        let receipt = self.gateway.donate(cid, amount_display).await?;
        self.patch(cid, |record| {
            record.amount_raised += receipt.amount;
            record.balance += receipt.amount;
        });
        Ok(receipt)
    }

    /// Withdraw `amount_display`, or everything the campaign holds when `None`.
    pub async fn withdraw(
        &self,
        cid: CampaignId,
        amount_display: Option<f64>,
    ) -> Result<Receipt, ClientError> {
        self.ensure_synced()?;
        if let Some(requested) = amount_display {
            self.check_minimum(requested, "withdrawal")?;
        }
        let receipt = self.gateway.withdraw(cid, amount_display).await?;
        self.patch(cid, |record| {
            record.balance = record.balance.saturating_sub(receipt.amount);
        });
        Ok(receipt)
    }

    /// Apply a settings change. Only the platform fee lives on the ledger;
    /// it is sent first and the local fields change only if it is accepted.
    pub async fn update_settings(
        &self,
        update: SettingsUpdate,
    ) -> Result<PlatformSettings, ClientError> {
        self.ensure_synced()?;
        if let Some(min) = update.min_donation {
            if !min.is_finite() || min <= 0.0 {
                return Err(ClientError::Precondition(
                    "minimum donation must be a positive amount".into(),
                ));
            }
        }
        if let Some(fee) = update.platform_fee_percent {
            self.gateway.update_platform_fee(fee).await?;
        }
        self.view.send_modify(|view| {
            let settings = &mut view.state.settings;
            if let Some(symbol) = update.currency_symbol {
                settings.currency_symbol = symbol;
            }
            if let Some(min) = update.min_donation {
                settings.min_donation = min;
            }
            if let Some(fee) = update.platform_fee_percent {
                settings.platform_fee_percent = fee;
            }
        });
        self.persist();
        Ok(self.settings())
    }

    /// Drop the cache and settings back to their defaults.
    pub fn reset(&self) {
        info!("resetting store");
        self.transition(SyncPhase::Uninitialized, Some(AppState::default()));
    }
}

fn carry_local_fields(fresh: &mut [CampaignRecord], saved: &[CampaignRecord]) {
    for record in fresh.iter_mut().filter(|r| r.completion_message.is_none()) {
        record.completion_message = saved
            .iter()
            .find(|s| s.cid == record.cid)
            .and_then(|s| s.completion_message.clone());
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
