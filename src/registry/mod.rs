//! EDINET registry access.
//!
//! This module provides the registry API client and the date-range
//! document search built on top of it.

pub mod client;
pub mod search;

pub use client::{DocumentFetcher, EdinetClient, FilingLister, RegistryError};
pub use search::{search_filings, FilingFilter, SearchOrder};
