//! MQTT broker link for the AgriPal bridge.
//!
//! Owns the session with the telemetry broker, subscribes to the device topic
//! namespace, decodes inbound payloads into [`DeviceSample`]s, and reconnects
//! on a fixed interval whenever the connection drops.
//!
//! The link never touches the store. Decoded samples leave through a bounded
//! channel as [`Ingested`] values, and connection health is published through
//! a [`LinkStatus`] watch handle.
//!
//! # Usage
//!
//! ```rust,ignore
//! use agripal_broker::{BrokerLink, BrokerSettings};
//! use tokio_util::sync::CancellationToken;
//!
//! let link = BrokerLink::new(BrokerSettings::default())?;
//! let status = link.status();
//! let (tx, mut rx) = tokio::sync::mpsc::channel(1024);
//! let shutdown = CancellationToken::new();
//! tokio::spawn(link.run(tx, shutdown.clone()));
//!
//! while let Some(ingested) = rx.recv().await {
//!     println!("{} -> {:?}", ingested.topic, ingested.sample);
//! }
//! ```
//!
//! [`DeviceSample`]: agripal_types::DeviceSample

mod codec;
mod error;
mod link;
mod settings;
mod state;

pub use codec::{decode_payload, Ingested};
pub use error::{DecodeError, SettingsError};
pub use link::BrokerLink;
pub use settings::BrokerSettings;
pub use state::{LinkEvent, LinkState, LinkStatus};
