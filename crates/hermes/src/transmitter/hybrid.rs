// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transmitter that publishes on every configured path.
//!
//! ```text
//! transmit ─> stamp once ─┬─> intra registry (same process)
//!                         ├─> shm ring       (same host, ShmPolicy::Prefer)
//!                         └─> network        (other hosts)
//! ```
//!
//! All paths carry the same `MessageInfo`, so a hybrid receiver accepts a
//! message once, from the path its locality routing selected.

use bytes::Bytes;
use std::sync::Arc;

use super::{IntraTransmitter, RtpsTransmitter, ShmTransmitter, Transmitter, TransmitterBase};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::message::MessageInfo;
use crate::role::RoleAttributes;
use crate::transport::intra::IntraRegistry;
use crate::transport::rtps::NetworkTransport;
use crate::transport::shm::{ShmPolicy, ShmSettings};

/// Fan-out transmitter over intra, shm and network paths.
pub struct HybridTransmitter {
    base: TransmitterBase,
    intra: Option<IntraTransmitter>,
    shm: Option<ShmTransmitter>,
    rtps: Option<RtpsTransmitter>,
}

impl HybridTransmitter {
    /// Transmitter on the process-wide registry and the default shm
    /// namespace, without network.
    pub fn new(attributes: RoleAttributes) -> Result<Self> {
        Transmitter::builder(attributes).hybrid()
    }

    pub(crate) fn attach(
        endpoint: Endpoint,
        registry: Option<Arc<IntraRegistry>>,
        network: Option<Arc<dyn NetworkTransport>>,
        shm_settings: &ShmSettings,
        shm_policy: ShmPolicy,
    ) -> Result<Self> {
        // Ring first: same-host receivers matching the registrations below
        // attach to it straight away
        let shm = match shm_policy {
            ShmPolicy::Prefer => match ShmTransmitter::attach(endpoint.clone(), shm_settings) {
                Ok(shm) => Some(shm),
                Err(e) => {
                    log::warn!("[HybridTransmitter] {} shm path disabled: {}", endpoint, e);
                    None
                }
            },
            ShmPolicy::Disable => None,
        };

        let intra = registry.map(|r| IntraTransmitter::attach(endpoint.clone(), r));

        let rtps = match network {
            Some(network) => match RtpsTransmitter::attach(endpoint.clone(), network) {
                Ok(rtps) => Some(rtps),
                Err(e) => {
                    log::warn!("[HybridTransmitter] {} network path disabled: {}", endpoint, e);
                    None
                }
            },
            None => None,
        };

        if intra.is_none() && shm.is_none() && rtps.is_none() {
            return Err(Error::TransportUnavailable(format!(
                "hybrid transmitter on '{}': no path available",
                endpoint.channel()
            )));
        }

        Ok(Self {
            base: TransmitterBase::new(endpoint),
            intra,
            shm,
            rtps,
        })
    }

    /// Endpoint of this transmitter.
    pub fn endpoint(&self) -> &Endpoint {
        self.base.endpoint()
    }

    /// Publish one payload on every path.
    ///
    /// A path that fails is logged; the call fails only if every path did.
    pub fn transmit(&self, payload: impl Into<Bytes>) -> Result<MessageInfo> {
        let payload = payload.into();
        if let Some(capacity) = self.max_payload().filter(|max| payload.len() > *max) {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                capacity,
            });
        }
        let info = self.base.enqueue(payload, |info, payload| {
            if let Some(intra) = &self.intra {
                intra.record(info, payload);
            }
        });
        self.base.flush(&info, |info, payload| self.fan_out(info, payload))?;
        Ok(info)
    }

    // Largest payload some path accepts, None when the intra path takes any
    fn max_payload(&self) -> Option<usize> {
        if self.intra.is_some() {
            return None;
        }
        let shm = self.shm.as_ref().map(ShmTransmitter::max_payload);
        let rtps = self.rtps.as_ref().map(RtpsTransmitter::max_payload);
        shm.max(rtps)
    }

    fn fan_out(&self, info: &MessageInfo, payload: &Bytes) -> Result<()> {
        let mut sent = 0;
        let mut last_error = None;
        if let Some(intra) = &self.intra {
            intra.dispatch(info, payload);
            sent += 1;
        }
        if let Some(shm) = &self.shm {
            match shm.send_stamped(info, payload) {
                Ok(()) => sent += 1,
                Err(e) => {
                    log::debug!("[HybridTransmitter] {} shm seq {}: {}", self.endpoint(), info.seq, e);
                    last_error = Some(e);
                }
            }
        }
        if let Some(rtps) = &self.rtps {
            match rtps.send_stamped(info, payload) {
                Ok(()) => sent += 1,
                Err(e) => {
                    log::debug!("[HybridTransmitter] {} rtps seq {}: {}", self.endpoint(), info.seq, e);
                    last_error = Some(e);
                }
            }
        }

        match (sent, last_error) {
            (0, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Sequence number the next `transmit` will use.
    pub fn next_seq(&self) -> u64 {
        self.base.next_seq()
    }

    /// Whether the shm path is open.
    pub fn has_shm(&self) -> bool {
        self.shm.is_some()
    }

    /// Whether the network path is open.
    pub fn has_network(&self) -> bool {
        self.rtps.is_some()
    }
}

impl std::fmt::Debug for HybridTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridTransmitter")
            .field("endpoint", self.endpoint())
            .field("intra", &self.intra.is_some())
            .field("shm", &self.shm.is_some())
            .field("rtps", &self.rtps.is_some())
            .field("next_seq", &self.next_seq())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::Receiver;
    use crate::transport::rtps::LoopbackNetwork;
    use parking_lot::Mutex;

    #[test]
    fn test_one_stamp_for_all_paths() {
        let registry = IntraRegistry::new();
        let net = LoopbackNetwork::new();

        let intra_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&intra_seen);
        let intra_rx = Receiver::builder(RoleAttributes::local("fan"))
            .registry(Arc::clone(&registry))
            .intra(move |_, info| sink.lock().push(info.clone()))
            .expect("intra receiver");
        intra_rx.enable().expect("enable");

        let net_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&net_seen);
        let net_rx = Receiver::builder(RoleAttributes::local("fan"))
            .network(net.clone())
            .rtps(move |_, info| sink.lock().push(info.clone()))
            .expect("rtps receiver");
        net_rx.enable().expect("enable");

        let writer = Transmitter::builder(RoleAttributes::local("fan"))
            .registry(Arc::clone(&registry))
            .network(net.clone())
            .shm_policy(ShmPolicy::Disable)
            .hybrid()
            .expect("writer");
        assert!(!writer.has_shm());
        assert!(writer.has_network());

        let info = writer.transmit("x").expect("transmit");
        assert_eq!(*intra_seen.lock(), vec![info.clone()]);
        assert_eq!(*net_seen.lock(), vec![info]);
    }

    #[test]
    fn test_no_path_is_unavailable() {
        let result = Transmitter::builder(RoleAttributes::local("nopath"))
            .without_intra()
            .shm_policy(ShmPolicy::Disable)
            .hybrid();
        assert!(matches!(result, Err(Error::TransportUnavailable(_))));
    }

    #[test]
    fn test_failing_path_does_not_fail_transmit() {
        let registry = IntraRegistry::new();
        let net = LoopbackNetwork::new();
        let writer = Transmitter::builder(RoleAttributes::local("partial"))
            .registry(registry)
            .network(net.clone())
            .shm_policy(ShmPolicy::Disable)
            .hybrid()
            .expect("writer");

        // Too large for a datagram, fine for the intra path
        let payload = vec![1u8; net.max_payload() + 1];
        assert!(writer.transmit(payload).is_ok());
    }
}
