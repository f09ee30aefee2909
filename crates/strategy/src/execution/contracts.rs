//! Compile-time ABI definitions for on-chain contracts via Alloy `sol!`.

use alloy::sol;

// ---------------------------------------------------------------------------
// Chainlink
// ---------------------------------------------------------------------------

sol! {
    /// Chainlink aggregator: the price feed read for collateral and borrow
    /// asset prices.
    #[sol(rpc)]
    interface IAggregatorV3 {
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );

        function decimals() external view returns (uint8);

        function description() external view returns (string);
    }
}
