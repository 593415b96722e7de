//! Ledger Sync Service - Bank transactions to accounting documents, each created exactly once.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
