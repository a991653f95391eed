//! ABI bindings for the on-chain collaborators.
//!
//! The contracts themselves are out of scope; these interfaces are the
//! observable surface the orchestrator consumes. Ticks are carried as
//! `int32` and fee tiers as `uint32` to keep the Rust side on plain
//! integer types.

mod proxy;
mod vault;

use alloy::sol;

pub use proxy::{spoke_event_topics, ProxyContract, ProxyPosition};
pub use vault::{hub_event_topics, VaultContract, VaultPosition};

sol! {
    /// Custody vault on the hub chain: user balances and position
    /// accounting live here.
    interface IAssetHubVault {
        event InvestmentInitiated(bytes32 indexed fingerprint, address indexed user, uint256 amount);
        event Settled(bytes32 indexed fingerprint, uint256 amount);
        event PositionLiquidated(bytes32 indexed fingerprint, uint256 amount0, uint256 amount1);
        event Paused(address account);
        event Unpaused(address account);

        function dispatchInvestment(
            address user,
            uint64 chainId,
            address poolId,
            address baseAsset,
            uint256 amount,
            int32 lowerRangePercent,
            int32 upperRangePercent,
            bytes destinationEncodedLocation,
            bytes preBuiltCrossChainMessage
        ) external;

        function confirmExecution(bytes32 fingerprint, uint256 remotePositionId, uint128 liquidity) external;

        function settleLiquidation(bytes32 fingerprint, uint256 amount) external;

        function getPosition(bytes32 fingerprint) external view returns (uint8 status, uint256 amount, address user);

        function getUserBalance(address user) external view returns (uint256 balance);

        function supportedChains(uint64 chainId) external view returns (bool supported);
    }

    /// Execution proxy on a spoke chain: mints, burns and unwinds LP
    /// positions on the local DEX.
    interface ILiquidityProxy {
        event PositionExecuted(bytes32 indexed fingerprint, uint256 nftId, uint128 liquidity);
        event PositionLiquidated(uint256 indexed positionId, uint256 amount0, uint256 amount1);
        event AssetsReturned(address indexed token, uint256 amount, bytes32 indexed fingerprint);

        function executePendingInvestment(bytes32 fingerprint) external;

        function executeFullLiquidation(uint256 positionId) external;

        function swapAndReturn(
            uint256 positionId,
            address baseAsset,
            bytes destination,
            uint256 minOut0,
            uint256 minOut1,
            uint256 priceLimit
        ) external;

        function quoteExactInputSingle(
            address tokenIn,
            address tokenOut,
            uint32 fee,
            uint256 amountIn,
            uint256 sqrtPriceLimitX96
        ) external view returns (uint256 amountOut);

        function isPositionOutOfRange(uint256 positionId) external view returns (bool outOfRange);

        function positions(uint256 positionId) external view returns (
            bytes32 fingerprint,
            uint8 status,
            uint128 liquidity,
            int32 entryTick,
            uint256 amount0,
            uint256 amount1
        );
    }
}
