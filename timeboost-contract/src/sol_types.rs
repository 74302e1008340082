//! Solidity types for contract interaction

alloy::sol! {
    #[sol(rpc)]
    interface IExpressLaneAuction {
        struct Bid {
            address expressLaneController;
            uint256 amount;
            bytes signature;
        }

        struct ELCRound {
            address expressLaneController;
            uint64 round;
        }

        event AuctionResolved(
            bool indexed isMultiBidAuction,
            uint64 round,
            address indexed firstPriceBidder,
            address indexed firstPriceExpressLaneController,
            uint256 firstPriceAmount,
            uint256 price,
            uint64 roundStartTimestamp,
            uint64 roundEndTimestamp
        );

        error RoundAlreadyResolved(uint64 round);

        function roundTimingInfo()
            external
            view
            returns (
                int64 offsetTimestamp,
                uint64 roundDurationSeconds,
                uint64 auctionClosingSeconds,
                uint64 reserveSubmissionSeconds
            );

        function reservePrice() external view returns (uint256);

        function balanceOf(address account) external view returns (uint256);

        function deposit(uint256 amount) external;

        function resolveSingleBidAuction(Bid calldata firstPriceBid) external;

        function resolveMultiBidAuction(Bid calldata firstPriceBid, Bid calldata secondPriceBid)
            external;

        function resolvedRounds() external view returns (ELCRound memory, ELCRound memory);
    }
}

impl From<&timeboost_types::SignedBid> for IExpressLaneAuction::Bid {
    fn from(b: &timeboost_types::SignedBid) -> Self {
        Self {
            expressLaneController: *b.controller(),
            amount: b.amount(),
            signature: alloy::primitives::Bytes::copy_from_slice(&b.signature().to_bytes()),
        }
    }
}
