//! Bridge between the client and the remote ledger program.
//!
//! Every address the program expects is derived here; callers never build
//! addresses themselves. Sub-record indices come from counters read off the
//! campaign immediately before each mutation, and a collision with a record
//! written concurrently is retried with a fresh counter a bounded number of
//! times.

use std::{future::Future, sync::Mutex};

use tracing::{debug, info, warn};

use crate::{
    address::{self, Address, Identity, ProgramId},
    amount::{self, Lamports},
    error::ClientError,
    ledger::{
        AccountKind, CampaignId, CampaignRecord, GlobalLedgerState, LedgerAccount,
        LedgerInstruction, RemoteError, RemoteLedger, SignedTransaction, Transaction,
        TransactionRecord, TxSignature,
    },
    wallet::Wallet,
};

pub const MAX_SEQUENCE_ATTEMPTS: usize = 3;

/// Lifecycle of the singleton global record as seen by this gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapPhase {
    Unknown,
    Initializing,
    Ready,
}

/// Best-effort listing: the records that were found plus the ids skipped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    /// `None` when the ledger was never bootstrapped.
    pub state: Option<GlobalLedgerState>,
    pub campaigns: Vec<CampaignRecord>,
    pub skipped: Vec<CampaignId>,
}

impl Listing {
    /// Fold one fetch result into the listing. Only an unreachable remote
    /// aborts the fold; every other failure becomes a skipped id.
    fn absorb(
        mut self,
        cid: CampaignId,
        fetched: Result<CampaignRecord, ClientError>,
    ) -> Result<Self, ClientError> {
        match fetched {
            Ok(record) => self.campaigns.push(record),
            Err(err @ ClientError::RemoteUnavailable(_)) => return Err(err),
            Err(ClientError::NotFound(_)) => {
                debug!(cid, "campaign missing, skipping");
                self.skipped.push(cid);
            }
            Err(err) => {
                warn!(cid, "campaign fetch failed, skipping: {err}");
                self.skipped.push(cid);
            }
        }
        Ok(self)
    }
}

/// Campaign fields as entered by a user, target in display units.
#[derive(Clone, Debug, PartialEq)]
pub struct CampaignDraft {
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub target: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Created {
    /// Provisional until a full listing confirms it.
    pub cid: CampaignId,
    pub address: Address,
    pub goal: Lamports,
    pub creator: Identity,
    pub signature: TxSignature,
}

/// Outcome of a donation or withdrawal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub cid: CampaignId,
    pub amount: Lamports,
    pub index: u64,
    pub transaction: Address,
    pub signature: TxSignature,
}

pub struct LedgerGateway<R, W> {
    remote: R,
    wallet: W,
    program: ProgramId,
    bootstrap: Mutex<BootstrapPhase>,
}

impl<R: RemoteLedger, W: Wallet> LedgerGateway<R, W> {
    pub fn new(remote: R, wallet: W, program: ProgramId) -> Self {
        Self {
            remote,
            wallet,
            program,
            bootstrap: Mutex::new(BootstrapPhase::Unknown),
        }
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub fn bootstrap_phase(&self) -> BootstrapPhase {
        *self.bootstrap.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, next: BootstrapPhase) {
        let mut phase = self.bootstrap.lock().unwrap_or_else(|e| e.into_inner());
        if *phase != next {
            debug!(from = ?*phase, to = ?next, "bootstrap transition");
            *phase = next;
        }
    }

    fn actor(&self) -> Result<Identity, ClientError> {
        self.wallet
            .identity()
            .ok_or_else(|| ClientError::Precondition("connect a wallet first".into()))
    }

    fn sign(
        &self,
        actor: Identity,
        instruction: LedgerInstruction,
    ) -> Result<SignedTransaction, ClientError> {
        Ok(self
            .wallet
            .sign_transaction(Transaction::new(actor, instruction))?)
    }

    async fn submit(
        &self,
        actor: Identity,
        instruction: LedgerInstruction,
    ) -> Result<TxSignature, ClientError> {
        let name = instruction.name();
        let signed = self.sign(actor, instruction)?;
        debug!(instruction = name, "sending transaction");
        let signature = self.remote.send_transaction(&signed).await.map_err(|err| {
            warn!(instruction = name, "transaction rejected: {err}");
            ClientError::from(err)
        })?;
        info!(instruction = name, %signature, "transaction confirmed");
        Ok(signature)
    }

    async fn fetch_global_state(
        &self,
        address: &Address,
    ) -> Result<Option<GlobalLedgerState>, ClientError> {
        match self.remote.get_account(address).await? {
            Some(LedgerAccount::State(state)) => Ok(Some(state)),
            Some(other) => Err(ClientError::Rejected(format!(
                "expected global state at {address}, found {:?}",
                other.kind()
            ))),
            None => Ok(None),
        }
    }

    /// Fetch the singleton global record, creating it on first use.
    ///
    /// A losing racer sees its initialize rejected; that is fine, the re-fetch
    /// decides. Still absent after initializing means the remote is broken.
    pub async fn ensure_global_state(&self) -> Result<(GlobalLedgerState, Address), ClientError> {
        let address = address::global_state_address(&self.program);
        if let Some(state) = self.fetch_global_state(&address).await? {
            self.set_phase(BootstrapPhase::Ready);
            return Ok((state, address));
        }

        let actor = self.actor()?;
        self.set_phase(BootstrapPhase::Initializing);
        info!(%address, "global state absent, initializing");
        let signed = self.sign(actor, LedgerInstruction::Initialize { state: address })?;
        match self.remote.send_transaction(&signed).await {
            Ok(signature) => info!(%signature, "global state initialized"),
            Err(RemoteError::AlreadyInitialized | RemoteError::AccountInUse(_)) => {
                debug!("global state initialized concurrently")
            }
            Err(err) => {
                self.set_phase(BootstrapPhase::Unknown);
                return Err(err.into());
            }
        }

        match self.fetch_global_state(&address).await? {
            Some(state) => {
                self.set_phase(BootstrapPhase::Ready);
                Ok((state, address))
            }
            None => {
                self.set_phase(BootstrapPhase::Unknown);
                Err(ClientError::RemoteUnavailable(
                    "global state still absent after initialize".into(),
                ))
            }
        }
    }

    pub async fn fetch_campaign(&self, cid: CampaignId) -> Result<CampaignRecord, ClientError> {
        let address = address::campaign_address(&self.program, cid);
        match self.remote.get_account(&address).await? {
            Some(LedgerAccount::Campaign(record)) => Ok(record),
            Some(other) => Err(ClientError::Rejected(format!(
                "expected campaign {cid} at {address}, found {:?}",
                other.kind()
            ))),
            None => Err(ClientError::NotFound(format!("campaign {cid}"))),
        }
    }

    /// Campaigns `1..=count`, in id order, skipping ids that cannot be read.
    ///
    /// A read-only session against a ledger that was never bootstrapped lists
    /// nothing instead of failing.
    pub async fn list_campaigns(&self) -> Result<Listing, ClientError> {
        let state = match self.ensure_global_state().await {
            Ok((state, _)) => Some(state),
            Err(ClientError::Precondition(reason)) => {
                debug!("global state absent and cannot bootstrap: {reason}");
                None
            }
            Err(err) => return Err(err),
        };
        let count = state.as_ref().map_or(0, |s| s.campaign_count);

        let mut listing = Listing {
            state,
            ..Listing::default()
        };
        for cid in 1..=count {
            let fetched = self.fetch_campaign(cid).await;
            listing = listing.absorb(cid, fetched)?;
        }
        debug!(
            found = listing.campaigns.len(),
            skipped = listing.skipped.len(),
            "campaign listing complete"
        );
        Ok(listing)
    }

    async fn retry_on_collision<T, F, Fut>(
        &self,
        op: &'static str,
        mut attempt: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut tries = 1;
        loop {
            match attempt().await {
                Err(err) if err.is_collision() && tries < MAX_SEQUENCE_ATTEMPTS => {
                    warn!(op, attempt = tries, "derived address collided, re-reading counter");
                    tries += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn create_campaign(&self, draft: &CampaignDraft) -> Result<Created, ClientError> {
        let actor = self.actor()?;
        let goal = amount::to_base_units(draft.target)?;
        self.retry_on_collision("create_campaign", move || {
            self.create_once(actor, draft, goal)
        })
        .await
    }

    async fn create_once(
        &self,
        actor: Identity,
        draft: &CampaignDraft,
        goal: Lamports,
    ) -> Result<Created, ClientError> {
        let (state, state_address) = self.ensure_global_state().await?;
        let cid = state.next_campaign_id();
        let campaign = address::campaign_address(&self.program, cid);
        let signature = self
            .submit(
                actor,
                LedgerInstruction::CreateCampaign {
                    state: state_address,
                    campaign,
                    title: draft.title.clone(),
                    description: draft.description.clone(),
                    image_url: draft.image_url.clone().unwrap_or_default(),
                    goal,
                },
            )
            .await?;
        Ok(Created {
            cid,
            address: campaign,
            goal,
            creator: actor,
            signature,
        })
    }

    pub async fn update_campaign(
        &self,
        cid: CampaignId,
        draft: &CampaignDraft,
    ) -> Result<TxSignature, ClientError> {
        let actor = self.actor()?;
        let goal = amount::to_base_units(draft.target)?;
        self.submit(
            actor,
            LedgerInstruction::UpdateCampaign {
                campaign: address::campaign_address(&self.program, cid),
                cid,
                title: draft.title.clone(),
                description: draft.description.clone(),
                image_url: draft.image_url.clone().unwrap_or_default(),
                goal,
            },
        )
        .await
    }

    pub async fn delete_campaign(&self, cid: CampaignId) -> Result<TxSignature, ClientError> {
        let actor = self.actor()?;
        self.submit(
            actor,
            LedgerInstruction::DeleteCampaign {
                campaign: address::campaign_address(&self.program, cid),
                cid,
            },
        )
        .await
    }

    pub async fn donate(
        &self,
        cid: CampaignId,
        amount_display: f64,
    ) -> Result<Receipt, ClientError> {
        let actor = self.actor()?;
        let amount = positive_base_units(amount_display)?;
        self.retry_on_collision("donate", move || self.donate_once(actor, cid, amount))
            .await
    }

    async fn donate_once(
        &self,
        actor: Identity,
        cid: CampaignId,
        amount: Lamports,
    ) -> Result<Receipt, ClientError> {
        let record = self.fetch_campaign(cid).await?;
        let index = record.donors + 1;
        let transaction = address::donor_transaction_address(&self.program, &actor, cid, index);
        let signature = self
            .submit(
                actor,
                LedgerInstruction::Donate {
                    campaign: address::campaign_address(&self.program, cid),
                    transaction,
                    cid,
                    amount,
                },
            )
            .await?;
        Ok(Receipt {
            cid,
            amount,
            index,
            transaction,
            signature,
        })
    }

    /// Withdraw `amount_display`, or the whole live balance when `None`.
    pub async fn withdraw(
        &self,
        cid: CampaignId,
        amount_display: Option<f64>,
    ) -> Result<Receipt, ClientError> {
        let actor = self.actor()?;
        let explicit = amount_display.map(positive_base_units).transpose()?;
        self.retry_on_collision("withdraw", move || self.withdraw_once(actor, cid, explicit))
            .await
    }

    async fn withdraw_once(
        &self,
        actor: Identity,
        cid: CampaignId,
        explicit: Option<Lamports>,
    ) -> Result<Receipt, ClientError> {
        let record = self.fetch_campaign(cid).await?;
        let amount = explicit.unwrap_or(record.balance);
        if amount == 0 {
            return Err(ClientError::Precondition(format!(
                "campaign {cid} holds nothing to withdraw"
            )));
        }
        let (state, state_address) = self.ensure_global_state().await?;
        let index = record.withdrawals + 1;
        let transaction = address::withdraw_transaction_address(&self.program, &actor, cid, index);
        let signature = self
            .submit(
                actor,
                LedgerInstruction::Withdraw {
                    campaign: address::campaign_address(&self.program, cid),
                    transaction,
                    state: state_address,
                    platform: state.platform_address,
                    cid,
                    amount,
                },
            )
            .await?;
        Ok(Receipt {
            cid,
            amount,
            index,
            transaction,
            signature,
        })
    }

    pub async fn update_platform_fee(&self, fee_percent: u64) -> Result<TxSignature, ClientError> {
        let actor = self.actor()?;
        self.submit(
            actor,
            LedgerInstruction::UpdatePlatformSettings {
                state: address::global_state_address(&self.program),
                fee_percent,
            },
        )
        .await
    }

    /// Transactions of one campaign, newest first.
    ///
    /// Scans every transaction on the ledger and filters locally, so the cost
    /// grows with the total transaction count, not the campaign's.
    pub async fn list_transactions(
        &self,
        cid: CampaignId,
    ) -> Result<Vec<TransactionRecord>, ClientError> {
        let all = self.remote.scan_accounts(AccountKind::Transaction).await?;
        let mut rows: Vec<TransactionRecord> = all
            .into_iter()
            .filter_map(|(_, account)| match account {
                LedgerAccount::Transaction(tx) if tx.cid == cid => Some(tx),
                _ => None,
            })
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(rows)
    }
}

fn positive_base_units(display: f64) -> Result<Lamports, ClientError> {
    match amount::to_base_units(display)? {
        0 => Err(ClientError::Precondition("amount must be greater than zero".into())),
        base => Ok(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::{
        ledger::MemoryLedger,
        wallet::{Disconnected, KeypairWallet},
    };

    const PROGRAM: ProgramId = ProgramId::new([5u8; 32]);

    type TestGateway<R> = LedgerGateway<R, Arc<KeypairWallet>>;

    fn ledger() -> Arc<MemoryLedger> {
        Arc::new(MemoryLedger::with_clock(PROGRAM, 1_700_000_000))
    }

    fn gateway<R: RemoteLedger>(remote: R) -> TestGateway<R> {
        LedgerGateway::new(remote, Arc::new(KeypairWallet::generate()), PROGRAM)
    }

    fn draft(target: f64) -> CampaignDraft {
        CampaignDraft {
            title: "School roof".into(),
            description: "Fix the roof before the rains".into(),
            image_url: None,
            target,
        }
    }

    /// Reports the global record as absent on the first read, as a racer that
    /// lost the bootstrap would see it.
    struct StaleFirstRead {
        inner: Arc<MemoryLedger>,
        stale: AtomicBool,
    }

    #[async_trait]
    impl RemoteLedger for StaleFirstRead {
        async fn get_account(
            &self,
            address: &Address,
        ) -> Result<Option<LedgerAccount>, RemoteError> {
            if self.stale.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get_account(address).await
        }

        async fn scan_accounts(
            &self,
            kind: AccountKind,
        ) -> Result<Vec<(Address, LedgerAccount)>, RemoteError> {
            self.inner.scan_accounts(kind).await
        }

        async fn send_transaction(
            &self,
            tx: &SignedTransaction,
        ) -> Result<TxSignature, RemoteError> {
            self.inner.send_transaction(tx).await
        }
    }

    /// Never shows any account, but accepts every transaction.
    struct BlackHole;

    #[async_trait]
    impl RemoteLedger for BlackHole {
        async fn get_account(&self, _: &Address) -> Result<Option<LedgerAccount>, RemoteError> {
            Ok(None)
        }

        async fn scan_accounts(
            &self,
            _: AccountKind,
        ) -> Result<Vec<(Address, LedgerAccount)>, RemoteError> {
            Ok(vec![])
        }

        async fn send_transaction(
            &self,
            tx: &SignedTransaction,
        ) -> Result<TxSignature, RemoteError> {
            Ok(tx.id())
        }
    }

    /// Lets a twin of the first donation land just before it, the way a second
    /// tab of the same wallet would.
    struct SameWalletRace {
        inner: Arc<MemoryLedger>,
        wallet: Arc<KeypairWallet>,
        armed: AtomicBool,
    }

    #[async_trait]
    impl RemoteLedger for SameWalletRace {
        async fn get_account(
            &self,
            address: &Address,
        ) -> Result<Option<LedgerAccount>, RemoteError> {
            self.inner.get_account(address).await
        }

        async fn scan_accounts(
            &self,
            kind: AccountKind,
        ) -> Result<Vec<(Address, LedgerAccount)>, RemoteError> {
            self.inner.scan_accounts(kind).await
        }

        async fn send_transaction(
            &self,
            tx: &SignedTransaction,
        ) -> Result<TxSignature, RemoteError> {
            let is_donation =
                matches!(tx.transaction.instruction, LedgerInstruction::Donate { .. });
            if is_donation && self.armed.swap(false, Ordering::SeqCst) {
                let twin =
                    Transaction::new(tx.transaction.signer, tx.transaction.instruction.clone());
                let twin = self.wallet.sign_transaction(twin).expect("sign twin");
                self.inner.send_transaction(&twin).await?;
            }
            self.inner.send_transaction(tx).await
        }
    }

    /// Rejects every donation as colliding and counts the attempts.
    struct AlwaysCollide {
        inner: Arc<MemoryLedger>,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl RemoteLedger for AlwaysCollide {
        async fn get_account(
            &self,
            address: &Address,
        ) -> Result<Option<LedgerAccount>, RemoteError> {
            self.inner.get_account(address).await
        }

        async fn scan_accounts(
            &self,
            kind: AccountKind,
        ) -> Result<Vec<(Address, LedgerAccount)>, RemoteError> {
            self.inner.scan_accounts(kind).await
        }

        async fn send_transaction(
            &self,
            tx: &SignedTransaction,
        ) -> Result<TxSignature, RemoteError> {
            if let LedgerInstruction::Donate { transaction, .. } = &tx.transaction.instruction {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                return Err(RemoteError::AccountInUse(*transaction));
            }
            self.inner.send_transaction(tx).await
        }
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() -> anyhow::Result<()> {
        let gw = gateway(ledger());
        assert_eq!(gw.bootstrap_phase(), BootstrapPhase::Unknown);
        let (first, first_addr) = gw.ensure_global_state().await?;
        let (second, second_addr) = gw.ensure_global_state().await?;
        assert_eq!(first_addr, second_addr);
        assert_eq!(first, second);
        assert_eq!(first.platform_address, gw.wallet().public_identity());
        assert_eq!(gw.bootstrap_phase(), BootstrapPhase::Ready);
        Ok(())
    }

    #[tokio::test]
    async fn losing_the_bootstrap_race_still_succeeds() -> anyhow::Result<()> {
        let inner = ledger();
        let winner = gateway(inner.clone());
        let (winning_state, _) = winner.ensure_global_state().await?;

        let loser = gateway(StaleFirstRead {
            inner: inner.clone(),
            stale: AtomicBool::new(true),
        });
        let (state, address) = loser.ensure_global_state().await?;
        assert_eq!(state, winning_state);
        assert_eq!(address, address::global_state_address(&PROGRAM));
        assert_eq!(loser.bootstrap_phase(), BootstrapPhase::Ready);
        Ok(())
    }

    #[tokio::test]
    async fn bootstrap_that_never_materializes_is_fatal() {
        let gw = gateway(BlackHole);
        let err = gw.ensure_global_state().await.unwrap_err();
        assert_matches!(err, ClientError::RemoteUnavailable(_));
        assert_eq!(gw.bootstrap_phase(), BootstrapPhase::Unknown);
    }

    #[tokio::test]
    async fn listing_skips_missing_ids_in_order() -> anyhow::Result<()> {
        let inner = ledger();
        let gw = gateway(inner.clone());
        for _ in 0..5 {
            gw.create_campaign(&draft(10.0)).await?;
        }
        inner.purge(&address::campaign_address(&PROGRAM, 2));
        inner.purge(&address::campaign_address(&PROGRAM, 4));

        let listing = gw.list_campaigns().await?;
        let ids: Vec<_> = listing.campaigns.iter().map(|c| c.cid).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert_eq!(listing.skipped, vec![2, 4]);
        Ok(())
    }

    #[tokio::test]
    async fn read_only_session_on_fresh_ledger_lists_nothing() -> anyhow::Result<()> {
        let gw = LedgerGateway::new(ledger(), Disconnected, PROGRAM);
        assert_eq!(gw.list_campaigns().await?, Listing::default());
        Ok(())
    }

    #[tokio::test]
    async fn sequential_donations_take_consecutive_indices() -> anyhow::Result<()> {
        let gw = gateway(ledger());
        let created = gw.create_campaign(&draft(100.0)).await?;
        assert_eq!(created.cid, 1);

        let mut addresses = std::collections::HashSet::new();
        for n in 1..=5u64 {
            let receipt = gw.donate(created.cid, 0.5).await?;
            assert_eq!(receipt.index, n);
            assert!(addresses.insert(receipt.transaction));
        }
        assert_eq!(gw.fetch_campaign(1).await?.donors, 5);
        Ok(())
    }

    #[tokio::test]
    async fn same_wallet_race_is_retried_with_fresh_counter() -> anyhow::Result<()> {
        let inner = ledger();
        let wallet = Arc::new(KeypairWallet::generate());
        let setup = LedgerGateway::new(inner.clone(), wallet.clone(), PROGRAM);
        setup.create_campaign(&draft(100.0)).await?;

        let gw = LedgerGateway::new(
            SameWalletRace {
                inner: inner.clone(),
                wallet: wallet.clone(),
                armed: AtomicBool::new(true),
            },
            wallet.clone(),
            PROGRAM,
        );
        let receipt = gw.donate(1, 1.0).await?;
        assert_eq!(receipt.index, 2);

        let record = gw.fetch_campaign(1).await?;
        assert_eq!(record.donors, 2);
        assert_eq!(record.amount_raised, 2 * amount::LAMPORTS_PER_UNIT);
        Ok(())
    }

    #[tokio::test]
    async fn collision_retries_are_bounded() -> anyhow::Result<()> {
        let inner = ledger();
        let wallet = Arc::new(KeypairWallet::generate());
        LedgerGateway::new(inner.clone(), wallet.clone(), PROGRAM)
            .create_campaign(&draft(100.0))
            .await?;

        let remote = Arc::new(AlwaysCollide {
            inner,
            attempts: AtomicUsize::new(0),
        });
        let gw = LedgerGateway::new(remote.clone(), wallet, PROGRAM);
        let err = gw.donate(1, 1.0).await.unwrap_err();
        assert!(err.is_collision());
        assert_eq!(remote.attempts.load(Ordering::SeqCst), MAX_SEQUENCE_ATTEMPTS);
        Ok(())
    }

    #[tokio::test]
    async fn full_withdrawal_reads_the_live_balance() -> anyhow::Result<()> {
        let inner = ledger();
        let owner = gateway(inner.clone());
        owner.create_campaign(&draft(100.0)).await?;

        let donor = gateway(inner.clone());
        donor.donate(1, 1.0).await?;
        donor.donate(1, 0.5).await?;

        let receipt = owner.withdraw(1, None).await?;
        assert_eq!(receipt.amount, 1_500_000_000);
        assert_eq!(receipt.index, 1);
        assert_eq!(owner.fetch_campaign(1).await?.balance, 0);

        let err = owner.withdraw(1, None).await.unwrap_err();
        assert_matches!(err, ClientError::Precondition(_));
        Ok(())
    }

    #[tokio::test]
    async fn owner_checks_are_surfaced_verbatim() -> anyhow::Result<()> {
        let inner = ledger();
        let owner = gateway(inner.clone());
        owner.create_campaign(&draft(10.0)).await?;

        let stranger = gateway(inner.clone());
        let err = stranger.update_campaign(1, &draft(20.0)).await.unwrap_err();
        assert_matches!(
            err,
            ClientError::Authorization(ref reason)
                if reason == "only the campaign creator may modify it"
        );
        let err = stranger.delete_campaign(1).await.unwrap_err();
        assert_matches!(err, ClientError::Authorization(_));
        let err = stranger.update_platform_fee(3).await.unwrap_err();
        assert_matches!(err, ClientError::Authorization(_));

        owner.update_platform_fee(3).await?;
        assert_eq!(owner.ensure_global_state().await?.0.platform_fee, 3);
        Ok(())
    }

    #[tokio::test]
    async fn mutations_without_wallet_fail_before_any_remote_call() {
        let inner = ledger();
        let before = inner.snapshot();
        let gw = LedgerGateway::new(inner.clone(), Disconnected, PROGRAM);
        assert_matches!(
            gw.donate(1, 1.0).await.unwrap_err(),
            ClientError::Precondition(_)
        );
        assert_matches!(
            gw.create_campaign(&draft(1.0)).await.unwrap_err(),
            ClientError::Precondition(_)
        );
        assert_eq!(inner.snapshot(), before);
    }

    #[tokio::test]
    async fn donating_to_a_missing_campaign_is_not_found() {
        let gw = gateway(ledger());
        gw.ensure_global_state().await.unwrap();
        assert_matches!(gw.donate(42, 1.0).await.unwrap_err(), ClientError::NotFound(_));
    }

    #[tokio::test]
    async fn transactions_are_filtered_and_newest_first() -> anyhow::Result<()> {
        let inner = ledger();
        let owner = gateway(inner.clone());
        owner.create_campaign(&draft(100.0)).await?;
        owner.create_campaign(&draft(100.0)).await?;

        let donor = gateway(inner.clone());
        donor.donate(1, 1.0).await?;
        donor.donate(2, 2.0).await?;
        donor.donate(1, 3.0).await?;
        owner.withdraw(1, Some(0.5)).await?;

        let rows = owner.list_transactions(1).await?;
        let amounts: Vec<_> = rows.iter().map(|r| (r.amount, r.credited)).collect();
        assert_eq!(
            amounts,
            vec![
                (500_000_000, false),
                (3_000_000_000, true),
                (1_000_000_000, true),
            ]
        );
        assert!(rows.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        Ok(())
    }
}
