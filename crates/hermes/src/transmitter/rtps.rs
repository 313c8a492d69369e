// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network transmitter.

use bytes::Bytes;
use std::sync::Arc;

use super::{Transmitter, TransmitterBase};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::message::MessageInfo;
use crate::role::RoleAttributes;
use crate::transport::rtps::NetworkTransport;

/// Publishes through a [`NetworkTransport`]. Advertised while alive.
pub struct RtpsTransmitter {
    base: TransmitterBase,
    network: Arc<dyn NetworkTransport>,
}

impl RtpsTransmitter {
    /// Transmitter on `network`.
    pub fn new(attributes: RoleAttributes, network: Arc<dyn NetworkTransport>) -> Result<Self> {
        Transmitter::builder(attributes).network(network).rtps()
    }

    pub(crate) fn attach(endpoint: Endpoint, network: Arc<dyn NetworkTransport>) -> Result<Self> {
        network.advertise(&endpoint)?;
        log::debug!("[RtpsTransmitter] advertised {} on {}", endpoint, network.name());
        Ok(Self {
            base: TransmitterBase::new(endpoint),
            network,
        })
    }

    /// Endpoint of this transmitter.
    pub fn endpoint(&self) -> &Endpoint {
        self.base.endpoint()
    }

    /// Publish one payload. Fails with `PayloadTooLarge` above the
    /// network's datagram budget.
    pub fn transmit(&self, payload: impl Into<Bytes>) -> Result<MessageInfo> {
        let payload = payload.into();
        if payload.len() > self.max_payload() {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                capacity: self.max_payload(),
            });
        }
        let info = self.base.enqueue(payload, |_, _| {});
        self.base.flush(&info, |info, payload| self.send_stamped(info, payload))?;
        Ok(info)
    }

    pub(crate) fn send_stamped(&self, info: &MessageInfo, payload: &Bytes) -> Result<()> {
        self.network.publish(self.endpoint(), info, payload)
    }

    /// Sequence number the next `transmit` will use.
    pub fn next_seq(&self) -> u64 {
        self.base.next_seq()
    }

    /// Largest payload the network accepts.
    pub fn max_payload(&self) -> usize {
        self.network.max_payload()
    }
}

impl Drop for RtpsTransmitter {
    fn drop(&mut self) {
        self.network.withdraw(self.base.endpoint().id());
    }
}

impl std::fmt::Debug for RtpsTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpsTransmitter")
            .field("endpoint", self.endpoint())
            .field("network", &self.network.name())
            .field("next_seq", &self.next_seq())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::rtps::LoopbackNetwork;

    #[test]
    fn test_advertised_while_alive() {
        let net = LoopbackNetwork::new();
        let writer = RtpsTransmitter::new(RoleAttributes::local("adv"), net.clone()).expect("writer");
        assert_eq!(net.writer_count(), 1);
        drop(writer);
        assert_eq!(net.writer_count(), 0);
    }

    #[test]
    fn test_payload_over_datagram_rejected() {
        let net = LoopbackNetwork::new();
        let writer = RtpsTransmitter::new(RoleAttributes::local("big"), net.clone()).expect("writer");
        let too_big = vec![0u8; net.max_payload() + 1];
        assert!(matches!(writer.transmit(too_big), Err(Error::PayloadTooLarge { .. })));
    }
}
