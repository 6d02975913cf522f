//! Starknet indexing core.
//!
//! Fetches and normalizes blocks from json-rpc endpoints, matches them
//! against datasource filters and keeps track of unfinalized blocks to
//! recover from chain reorganizations.
pub mod abi;
pub mod block;
pub mod calldata;
pub mod cli;
pub mod core;
pub mod datasource;
pub mod dictionary;
pub mod error;
pub mod filter;
pub mod finality;
pub mod provider;
pub mod worker;
