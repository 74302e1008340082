//! JSON-RPC access to a deployed auction contract.

use std::time::Duration;

use alloy::{
    contract::Error as CallError,
    network::EthereumWallet,
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use timeboost_types::{
    Address, AuctionResolution, ChainId, Round, RoundTimingInfo, Timestamp, U256,
};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::{
    AuctionContract, ContractError, ResolutionRequest,
    events::ResolutionScanner,
    sol_types::IExpressLaneAuction::{self, IExpressLaneAuctionInstance, RoundAlreadyResolved},
};

pub struct AlloyAuction {
    address: Address,
    account: Option<Address>,
    provider: DynProvider,
    contract: IExpressLaneAuctionInstance<DynProvider>,
    scanner: Mutex<ResolutionScanner>,
}

impl AlloyAuction {
    /// Read-only access to the contract at `address`.
    ///
    /// `from_block` is where the scan for `AuctionResolved` events starts.
    pub fn new(url: Url, address: Address, from_block: u64) -> Self {
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Self::with_provider(provider, None, address, from_block)
    }

    /// Access to the contract that can send transactions signed by `signer`.
    pub fn with_signer(url: Url, signer: PrivateKeySigner, address: Address, from_block: u64) -> Self {
        let account = Address::from(signer.address());
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();
        Self::with_provider(provider, Some(account), address, from_block)
    }

    fn with_provider(
        provider: DynProvider,
        account: Option<Address>,
        address: Address,
        from_block: u64,
    ) -> Self {
        Self {
            address,
            account,
            contract: IExpressLaneAuction::new(*address, provider.clone()),
            scanner: Mutex::new(ResolutionScanner::new(*address, from_block)),
            provider,
        }
    }

    fn signing_account(&self, a: Address) -> Result<(), ContractError> {
        if self.account == Some(a) {
            Ok(())
        } else {
            Err(ContractError::NotOwner(a))
        }
    }
}

#[async_trait]
impl AuctionContract for AlloyAuction {
    fn address(&self) -> Address {
        self.address
    }

    async fn chain_id(&self) -> Result<ChainId, ContractError> {
        let id = self
            .provider
            .get_chain_id()
            .await
            .map_err(|e| ContractError::Transport(e.to_string()))?;
        Ok(ChainId::from(id))
    }

    async fn round_timing_info(&self) -> Result<RoundTimingInfo, ContractError> {
        let info = self
            .contract
            .roundTimingInfo()
            .call()
            .await
            .map_err(|e| call_error(None, e))?;
        let t = RoundTimingInfo::new(
            Timestamp::from_secs(info.offsetTimestamp.max(0) as u64),
            Duration::from_secs(info.roundDurationSeconds),
            Duration::from_secs(info.auctionClosingSeconds),
            Duration::from_secs(info.reserveSubmissionSeconds),
        )?;
        Ok(t)
    }

    async fn reserve_price(&self) -> Result<U256, ContractError> {
        self.contract
            .reservePrice()
            .call()
            .await
            .map_err(|e| call_error(None, e))
    }

    async fn balance_of(&self, account: Address) -> Result<U256, ContractError> {
        self.contract
            .balanceOf(*account)
            .call()
            .await
            .map_err(|e| call_error(None, e))
    }

    async fn deposit(&self, account: Address, amount: U256) -> Result<(), ContractError> {
        self.signing_account(account)?;
        let receipt = self
            .contract
            .deposit(amount)
            .send()
            .await
            .map_err(|e| call_error(None, e))?
            .get_receipt()
            .await
            .map_err(|e| ContractError::Transport(e.to_string()))?;
        if !receipt.status() {
            return Err(ContractError::Rejected(format!(
                "deposit transaction {} reverted",
                receipt.transaction_hash
            )));
        }
        info!(%account, %amount, tx = %receipt.transaction_hash, "deposited");
        Ok(())
    }

    async fn resolve(&self, req: &ResolutionRequest) -> Result<(), ContractError> {
        let first = IExpressLaneAuction::Bid::from(&req.first);
        let call = match &req.second {
            Some(second) => {
                let second = IExpressLaneAuction::Bid::from(second);
                self.contract
                    .resolveMultiBidAuction(first, second)
                    .send()
                    .await
            }
            None => self.contract.resolveSingleBidAuction(first).send().await,
        };
        let receipt = call
            .map_err(|e| call_error(Some(req.round), e))?
            .get_receipt()
            .await
            .map_err(|e| ContractError::Transport(e.to_string()))?;
        if !receipt.status() {
            return Err(ContractError::Rejected(format!(
                "resolution transaction {} reverted",
                receipt.transaction_hash
            )));
        }
        debug!(round = %req.round, tx = %receipt.transaction_hash, "resolution submitted");
        Ok(())
    }

    async fn resolution(&self, round: Round) -> Result<Option<AuctionResolution>, ContractError> {
        let mut scanner = self.scanner.lock().await;
        scanner.scan(&self.provider).await?;
        Ok(scanner.get(round))
    }

    async fn resolutions_since(
        &self,
        round: Round,
    ) -> Result<Vec<AuctionResolution>, ContractError> {
        let mut scanner = self.scanner.lock().await;
        scanner.scan(&self.provider).await?;
        Ok(scanner.since(round))
    }
}

fn call_error(round: Option<Round>, e: CallError) -> ContractError {
    if let Some(err) = e.as_decoded_error::<RoundAlreadyResolved>() {
        return ContractError::AlreadyResolved(round.unwrap_or(Round::from(err.round)));
    }
    if e.as_revert_data().is_some() {
        return ContractError::Rejected(e.to_string());
    }
    ContractError::Transport(e.to_string())
}
