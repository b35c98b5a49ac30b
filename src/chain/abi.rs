//! ABI bindings for the ERC-8004 Identity Registry.
//!
//! Only the read-only surface is bound: the registry is an ERC-721, so
//! ownership and metadata come from the standard token views, and mint
//! discovery comes from `Transfer` logs with a zero `from`. The registry's
//! own `Registered` event carries no more than the mint does, so it is not
//! bound.

use alloy::sol;

sol! {
    /// ERC-8004 Identity Registry, read-only view.
    #[sol(rpc)]
    interface IIdentityRegistry {
        /// Number of identity tokens held by `owner`.
        function balanceOf(address owner) external view returns (uint256);

        /// Current holder of `agentId`. Reverts for unminted ids.
        function ownerOf(uint256 agentId) external view returns (address);

        /// URI of the agent's registration file.
        function tokenURI(uint256 agentId) external view returns (string memory);

        /// Standard ERC-721 transfer event; mints have `from == address(0)`.
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
    }
}
