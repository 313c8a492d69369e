// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Same-host transmitter over a shared-memory ring.
//!
//! The first transmitter of a channel in the host creates the ring and
//! notify segments; transmitters of the same process share one writer.
//! Writing never waits on readers.

use bytes::Bytes;
use std::sync::Arc;

use super::{Transmitter, TransmitterBase};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::message::MessageInfo;
use crate::role::RoleAttributes;
use crate::transport::shm::{shared_writer, ShmRingWriter, ShmSettings};

/// Publishes into the channel ring.
pub struct ShmTransmitter {
    base: TransmitterBase,
    writer: Arc<ShmRingWriter>,
}

impl ShmTransmitter {
    /// Transmitter with default shm settings.
    pub fn new(attributes: RoleAttributes) -> Result<Self> {
        Transmitter::builder(attributes).shm()
    }

    pub(crate) fn attach(endpoint: Endpoint, settings: &ShmSettings) -> Result<Self> {
        let names = settings.names_for(endpoint.channel());
        let writer = shared_writer(&names, settings.capacity, settings.slot_payload).map_err(|e| {
            log::warn!("[ShmTransmitter] cannot open {}: {}", names.ring, e);
            Error::from(e)
        })?;
        log::debug!(
            "[ShmTransmitter] {} writing to {} (owner={})",
            endpoint,
            names.ring,
            writer.is_owner()
        );
        Ok(Self {
            base: TransmitterBase::new(endpoint),
            writer,
        })
    }

    /// Endpoint of this transmitter.
    pub fn endpoint(&self) -> &Endpoint {
        self.base.endpoint()
    }

    /// Publish one payload. Fails with `PayloadTooLarge` above the slot size.
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
        self.writer.push(info, payload)?;
        Ok(())
    }

    /// Sequence number the next `transmit` will use.
    pub fn next_seq(&self) -> u64 {
        self.base.next_seq()
    }

    /// Largest payload accepted.
    pub fn max_payload(&self) -> usize {
        self.writer.slot_payload()
    }
}

impl std::fmt::Debug for ShmTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmTransmitter")
            .field("endpoint", self.endpoint())
            .field("ring", &self.writer.names().ring)
            .field("next_seq", &self.next_seq())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::shm::{ReadOutcome, ShmRingReader};

    fn settings() -> ShmSettings {
        ShmSettings::with_namespace(format!("tx{}", fastrand::u32(..)))
    }

    #[test]
    fn test_writes_stamped_slots() {
        let settings = settings();
        let writer = Transmitter::builder(RoleAttributes::local("shm_tx"))
            .shm_settings(settings.clone())
            .shm()
            .expect("writer");
        let mut reader = ShmRingReader::attach(&settings.names_for("shm_tx"), 0).expect("attach");

        let info = writer.transmit("payload").expect("transmit");
        match reader.try_read() {
            ReadOutcome::Message(read, payload) => {
                assert_eq!(read, info);
                assert_eq!(payload.as_ref(), b"payload");
            }
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let settings = ShmSettings {
            slot_payload: 64,
            ..settings()
        };
        let writer = Transmitter::builder(RoleAttributes::local("shm_big"))
            .shm_settings(settings)
            .shm()
            .expect("writer");
        let result = writer.transmit(vec![0u8; 65]);
        assert!(matches!(result, Err(Error::PayloadTooLarge { size: 65, capacity: 64 })));
    }
}
