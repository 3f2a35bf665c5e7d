// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Frame transports for connected devices
//!
//! Transports move fixed-size frames between the host and a device. Each
//! transport provides a [FrameLink] for writing frames, and reports received
//! frames and link loss / recovery to the owning connection via [LinkEvents].

use std::sync::Arc;

use async_trait::async_trait;

use ledger_dmk_apdu::frame::FrameConfig;
use ledger_dmk_core::TransportError;

#[cfg(feature = "transport_tcp")]
pub mod tcp;
#[cfg(feature = "transport_tcp")]
pub use tcp::{TcpLink, TcpOptions};

#[cfg(feature = "transport_hid")]
pub mod hid;
#[cfg(feature = "transport_hid")]
pub use hid::HidLink;

/// Writable side of a frame transport
#[async_trait]
pub trait FrameLink: Send + Sync {
    /// Frame layout used by this link
    fn frame_config(&self) -> FrameConfig;

    /// Write a single encoded frame
    async fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Close the link, no further events are reported once closed
    async fn close(&self);
}

/// Receiver for link events, implemented by the owning connection
pub trait LinkEvents: Send + Sync + 'static {
    /// Frame received from the device
    fn on_frame(&self, frame: &[u8]);

    /// Link lost (device unplugged, rebooted, socket closed)
    fn on_lost(&self);

    /// Link re-established with a new handle
    fn on_reconnected(&self, link: Arc<dyn FrameLink>);
}
