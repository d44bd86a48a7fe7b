//! Two-tier durable caches (C3, C4) and the lock-retry wrapper they share.

pub mod history_cache;
pub mod quote_cache;
pub mod retry;

pub use history_cache::HistoryCache;
pub use quote_cache::QuoteCache;
