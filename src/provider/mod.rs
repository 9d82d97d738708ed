//! Provider API Client (C4): talks to the Challonge-style JSON:API
//! bracket provider exclusively through C2's request gate.

pub mod client;
pub mod records;

pub use client::ProviderClient;
