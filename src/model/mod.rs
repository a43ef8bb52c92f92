//! Core data model types: message ids and metadata, attachment parts, senders.

pub mod address;
pub mod message;
pub mod part;
