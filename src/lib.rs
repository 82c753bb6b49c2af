// src/lib.rs

//! Client library for a remote, centrally managed key/value configuration service:
//! address resolution and failover, request signing, a two-tier local cache
//! (operator-managed failover override + client-managed snapshot mirror), and a
//! long-polling watch pipeline that delivers change notifications to registered
//! callbacks.

pub mod client;
pub mod config;
pub mod core;
pub mod error;

pub use client::AcmClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use core::dispatch::NotifyParams;
pub use core::value_store::{ConfigItem, ConfigListing};
pub use core::watch::CallbackId;
pub use error::{AcmError, Result};
