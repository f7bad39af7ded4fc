//! Scrip SDK for Rust
//!
//! Client-side engine for the Scrip reward currency: it holds the user's
//! tokens, balance, price catalog, and purchase ledger in a local datastore
//! and keeps them consistent with the remote authority.
//!
//! The engine never opens sockets itself; it builds requests and hands them
//! to an injected [`HttpRequester`]. A blocking `ureq`-backed requester is
//! provided behind the default `ureq-transport` feature.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use scrip_sdk::{Scrip, Status, UreqRequester};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! fn main() -> scrip_sdk::Result<()> {
//!     let scrip = Scrip::new(
//!         "my-app/1.2",
//!         Path::new("/path/to/app/data"),
//!         Arc::new(UreqRequester::new()),
//!     )?;
//!
//!     // Obtain tokens, the balance, and the price catalog.
//!     scrip.refresh_state(&["speed-boost".into()])?;
//!
//!     for price in scrip.get_purchase_prices()? {
//!         println!(
//!             "{} / {} costs {}",
//!             price.transaction_class, price.distinguisher, price.price
//!         );
//!     }
//!
//!     let response = scrip.new_expiring_purchase("speed-boost", "1hr", 100_000_000_000)?;
//!     if response.status == Status::Success {
//!         println!("purchased: {:?}", response.purchase);
//!     }
//!     Ok(())
//! }
//! ```

mod client;
pub mod envelope;
mod error;
pub mod http;
pub mod storage;
pub mod testing;
mod types;
mod userdata;

pub use client::{Scrip, ScripOptions, DEFAULT_BASE_URL};
pub use error::{Result, ScripError};
pub use http::{HttpParams, HttpRequester, HttpResult, Method};
pub use storage::{FileStorage, MemoryStorage, StorageAdapter};
pub use types::{
    decode_authorization, token_type, Authorization, NewExpiringPurchaseResponse, Purchase,
    PurchasePrice, Status, TransactionId,
};

#[cfg(feature = "ureq-transport")]
pub use http::UreqRequester;
