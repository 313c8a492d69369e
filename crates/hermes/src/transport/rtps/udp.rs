// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP network transport.
//!
//! One socket per transport, bound to `0.0.0.0:port`, sending to the
//! multicast group and/or a static list of unicast peers.
//!
//! - Writers are announced every `announce_period`; a remote writer not
//!   heard from for `announce_period * lease_multiplier` is unmatched.
//! - Data frames from writers of this transport are delivered to local
//!   subscribers directly; their multicast loopback copies are ignored.
//! - Delivery is best-effort: a lost datagram is a sequence gap at the
//!   receiver.

use bytes::Bytes;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{DataHandler, Frame, NetworkTransport, SubscriptionId};
use crate::config::{
    env, ANNOUNCE_PERIOD_MS, LEASE_MULTIPLIER, MAX_DATAGRAM_SIZE, MULTICAST_GROUP, UDP_PORT_BASE,
    UDP_READ_TIMEOUT_MS,
};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::message::MessageInfo;
use crate::role::Reliability;
use crate::transport::{qos_compatible, MatchEvent, MatchHandler};

/// Bytes of a datagram reserved for the frame header and channel name.
const FRAME_HEADROOM: usize = 512;

/// Socket and discovery settings of a [`UdpTransport`].
#[derive(Clone, Debug)]
pub struct UdpConfig {
    /// Local port (0 = ephemeral).
    pub port: u16,
    /// Multicast group to join and send to, if any.
    pub multicast_group: Option<Ipv4Addr>,
    /// Static unicast peers.
    pub peers: Vec<SocketAddr>,
    /// Period between writer announcements.
    pub announce_period: Duration,
    /// Missed announcement periods before a remote writer expires.
    pub lease_multiplier: u32,
    /// Set `SO_REUSEPORT` (several processes on one host sharing the port).
    pub reuse_port: bool,
    /// Multicast TTL.
    pub multicast_ttl: u32,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            port: UDP_PORT_BASE,
            multicast_group: Some(Ipv4Addr::from(MULTICAST_GROUP)),
            peers: Vec::new(),
            announce_period: Duration::from_millis(ANNOUNCE_PERIOD_MS),
            lease_multiplier: LEASE_MULTIPLIER,
            reuse_port: std::env::var(env::REUSE_PORT).map(|v| v == "1").unwrap_or(false),
            multicast_ttl: 1,
        }
    }
}

impl UdpConfig {
    /// Unicast-only configuration.
    #[must_use]
    pub fn unicast(port: u16, peers: Vec<SocketAddr>) -> Self {
        Self {
            port,
            multicast_group: None,
            peers,
            ..Self::default()
        }
    }

    /// Time after which an unannounced remote writer expires.
    #[must_use]
    pub fn lease(&self) -> Duration {
        self.announce_period * self.lease_multiplier.max(1)
    }
}

struct RemoteWriter {
    endpoint: Endpoint,
    last_seen: Instant,
}

struct Shared {
    socket: UdpSocket,
    local_port: u16,
    destinations: RwLock<Vec<SocketAddr>>,
    running: AtomicBool,
    next_id: AtomicU64,
    lease: Duration,
    local_writers: RwLock<HashMap<Identity, Endpoint>>,
    readers: RwLock<BTreeMap<SubscriptionId, (Endpoint, DataHandler)>>,
    watchers: RwLock<BTreeMap<SubscriptionId, (String, MatchHandler)>>,
    remotes: Mutex<HashMap<Identity, RemoteWriter>>,
}

/// UDP unicast/multicast implementation of [`NetworkTransport`].
pub struct UdpTransport {
    shared: Arc<Shared>,
    shutdown: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Bind the socket and start the receive and announce threads.
    ///
    /// Bind or multicast join failures surface as `TransportUnavailable`.
    pub fn new(config: UdpConfig) -> Result<Self> {
        let socket = open_socket(&config).map_err(|e| {
            Error::TransportUnavailable(format!("UDP bind on port {} failed: {}", config.port, e))
        })?;
        let local_port = socket.local_addr()?.port();

        let mut destinations = config.peers.clone();
        if let Some(group) = config.multicast_group {
            destinations.push(SocketAddr::V4(SocketAddrV4::new(group, local_port)));
        }
        log::debug!(
            "[UDP] transport bound port={} destinations={:?}",
            local_port,
            destinations
        );

        let shared = Arc::new(Shared {
            socket,
            local_port,
            destinations: RwLock::new(destinations),
            running: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            lease: config.lease(),
            local_writers: RwLock::new(HashMap::new()),
            readers: RwLock::new(BTreeMap::new()),
            watchers: RwLock::new(BTreeMap::new()),
            remotes: Mutex::new(HashMap::new()),
        });

        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let rx_shared = Arc::clone(&shared);
        let rx = thread::Builder::new()
            .name("hermes-udp-rx".into())
            .spawn(move || rx_shared.receive_loop())?;

        let ann_shared = Arc::clone(&shared);
        let period = config.announce_period;
        let announce = thread::Builder::new()
            .name("hermes-udp-announce".into())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        ann_shared.announce_all();
                        ann_shared.expire_leases();
                    }
                    _ => break,
                }
            });
        let announce = match announce {
            Ok(handle) => handle,
            Err(e) => {
                shared.running.store(false, Ordering::Release);
                let _ = rx.join();
                return Err(e.into());
            }
        };

        Ok(Self {
            shared,
            shutdown: Mutex::new(Some(shutdown_tx)),
            threads: Mutex::new(vec![rx, announce]),
        })
    }

    /// Port the socket is bound to.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.shared.local_port
    }

    /// Add a unicast destination.
    pub fn add_peer(&self, peer: SocketAddr) {
        let mut destinations = self.shared.destinations.write();
        if !destinations.contains(&peer) {
            destinations.push(peer);
            log::debug!("[UDP] added peer {}", peer);
        }
    }

    /// Remote writers currently matched (not expired).
    #[must_use]
    pub fn remote_writers(&self) -> Vec<Endpoint> {
        self.shared
            .remotes
            .lock()
            .values()
            .map(|r| r.endpoint.clone())
            .collect()
    }

    /// Stop the threads and withdraw local writers. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let writers: Vec<Identity> = self.shared.local_writers.read().keys().cloned().collect();
        for id in writers {
            let _ = self.shared.send_frame(&Frame::Withdraw(id));
        }
        self.shutdown.lock().take();
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                log::warn!("[UDP] transport thread panicked");
            }
        }
        log::debug!("[UDP] transport on port {} shut down", self.shared.local_port);
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::TransportUnavailable("UDP transport shut down".into()))
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl NetworkTransport for UdpTransport {
    fn name(&self) -> &str {
        "udp"
    }

    fn advertise(&self, writer: &Endpoint) -> Result<()> {
        self.ensure_running()?;
        self.shared
            .local_writers
            .write()
            .insert(writer.id().clone(), writer.clone());
        if let Err(e) = self.shared.send_frame(&Frame::Announce(writer.clone())) {
            log::debug!("[UDP] initial announce of {} failed: {}", writer, e);
        }
        self.shared
            .notify(writer.channel(), &MatchEvent::Matched(writer.clone()));
        Ok(())
    }

    fn withdraw(&self, writer: &Identity) {
        let removed = self.shared.local_writers.write().remove(writer);
        if let Some(endpoint) = removed {
            let _ = self.shared.send_frame(&Frame::Withdraw(writer.clone()));
            self.shared
                .notify(endpoint.channel(), &MatchEvent::Unmatched(writer.clone()));
        }
    }

    fn publish(&self, writer: &Endpoint, info: &MessageInfo, payload: &Bytes) -> Result<()> {
        self.ensure_running()?;
        if payload.len() > self.max_payload() {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                capacity: self.max_payload(),
            });
        }
        let reliability = writer.attributes().qos.reliability;
        self.shared
            .deliver_local(writer.channel(), reliability, info, payload);
        self.shared.send_frame(&Frame::Data {
            reliability,
            channel: writer.channel().to_string(),
            info: info.clone(),
            payload: payload.clone(),
        })
    }

    fn subscribe(&self, reader: &Endpoint, handler: DataHandler) -> Result<SubscriptionId> {
        self.ensure_running()?;
        let id = self.shared.next_id();
        self.shared
            .readers
            .write()
            .insert(id, (reader.clone(), handler));
        log::debug!("[UDP] {} subscribed {}", id, reader);
        Ok(id)
    }

    fn watch(&self, channel: &str, handler: MatchHandler) -> Result<SubscriptionId> {
        self.ensure_running()?;
        let id = self.shared.next_id();
        self.shared
            .watchers
            .write()
            .insert(id, (channel.to_string(), Arc::clone(&handler)));

        let mut known: Vec<Endpoint> = self
            .shared
            .local_writers
            .read()
            .values()
            .filter(|w| w.channel() == channel)
            .cloned()
            .collect();
        known.extend(
            self.shared
                .remotes
                .lock()
                .values()
                .filter(|r| r.endpoint.channel() == channel)
                .map(|r| r.endpoint.clone()),
        );
        for writer in known {
            handler(&MatchEvent::Matched(writer));
        }
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.shared.readers.write().remove(&id).is_none() {
            self.shared.watchers.write().remove(&id);
        }
    }

    fn max_payload(&self) -> usize {
        MAX_DATAGRAM_SIZE - FRAME_HEADROOM
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("port", &self.shared.local_port)
            .field("destinations", &*self.shared.destinations.read())
            .finish()
    }
}

impl Shared {
    fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn send_frame(&self, frame: &Frame) -> Result<()> {
        let datagram = frame
            .encode()
            .map_err(|e| Error::InvalidConfig(format!("cannot encode frame: {}", e)))?;
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::PayloadTooLarge {
                size: datagram.len(),
                capacity: MAX_DATAGRAM_SIZE,
            });
        }

        let destinations = self.destinations.read().clone();
        let mut last_error = None;
        let mut sent = 0;
        for dest in &destinations {
            match self.socket.send_to(&datagram, dest) {
                Ok(_) => sent += 1,
                Err(e) => {
                    log::debug!("[UDP] send to {} failed: {}", dest, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if sent == 0 => Err(Error::IoError(e)),
            _ => Ok(()),
        }
    }

    fn notify(&self, channel: &str, event: &MatchEvent) {
        let handlers: Vec<MatchHandler> = self
            .watchers
            .read()
            .values()
            .filter(|(c, _)| c == channel)
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    fn deliver_local(&self, channel: &str, reliability: Reliability, info: &MessageInfo, payload: &Bytes) {
        let handlers: Vec<DataHandler> = self
            .readers
            .read()
            .values()
            .filter(|(reader, _)| reader.channel() == channel)
            .filter(|(reader, _)| qos_compatible(reliability, reader.attributes().qos.reliability))
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(info, payload);
        }
    }

    fn receive_loop(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        log::debug!("[UDP] receive thread started on port {}", self.local_port);
        while self.running.load(Ordering::Acquire) {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => self.handle_datagram(&buf[..len], from),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) => {
                    log::debug!("[UDP] recv error: {}", e);
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }
        log::debug!("[UDP] receive thread stopped on port {}", self.local_port);
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let frame = match Frame::decode(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("[UDP] dropping datagram from {}: {}", from, e);
                return;
            }
        };

        match frame {
            Frame::Data {
                reliability,
                channel,
                info,
                payload,
            } => {
                if self.local_writers.read().contains_key(&info.sender) {
                    return;
                }
                self.deliver_local(&channel, reliability, &info, &payload);
            }
            Frame::Announce(endpoint) => {
                if self.local_writers.read().contains_key(endpoint.id()) {
                    return;
                }
                let changed = {
                    let mut remotes = self.remotes.lock();
                    let now = Instant::now();
                    match remotes.get_mut(endpoint.id()) {
                        Some(known) if known.endpoint == endpoint => {
                            known.last_seen = now;
                            false
                        }
                        _ => {
                            remotes.insert(
                                endpoint.id().clone(),
                                RemoteWriter {
                                    endpoint: endpoint.clone(),
                                    last_seen: now,
                                },
                            );
                            true
                        }
                    }
                };
                if changed {
                    log::debug!("[UDP] matched remote writer {} from {}", endpoint, from);
                    self.notify(endpoint.channel(), &MatchEvent::Matched(endpoint.clone()));
                }
            }
            Frame::Withdraw(id) => {
                let removed = self.remotes.lock().remove(&id);
                if let Some(remote) = removed {
                    log::debug!("[UDP] remote writer {} withdrew", remote.endpoint);
                    self.notify(remote.endpoint.channel(), &MatchEvent::Unmatched(id));
                }
            }
        }
    }

    fn announce_all(&self) {
        let writers: Vec<Endpoint> = self.local_writers.read().values().cloned().collect();
        for writer in writers {
            if let Err(e) = self.send_frame(&Frame::Announce(writer)) {
                log::debug!("[UDP] announce failed: {}", e);
            }
        }
    }

    fn expire_leases(&self) {
        let expired: Vec<RemoteWriter> = {
            let mut remotes = self.remotes.lock();
            let lease = self.lease;
            let stale: Vec<Identity> = remotes
                .iter()
                .filter(|(_, r)| r.last_seen.elapsed() > lease)
                .map(|(id, _)| id.clone())
                .collect();
            stale.iter().filter_map(|id| remotes.remove(id)).collect()
        };
        for remote in expired {
            log::info!("[UDP] lease expired for remote writer {}", remote.endpoint);
            self.notify(
                remote.endpoint.channel(),
                &MatchEvent::Unmatched(remote.endpoint.id().clone()),
            );
        }
    }
}

fn open_socket(config: &UdpConfig) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    if config.reuse_port {
        set_reuseport(&socket)?;
        log::info!("[UDP] SO_REUSEPORT enabled (multi-process mode)");
    }
    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));
    socket.bind(&bind_addr.into())?;

    if let Some(group) = config.multicast_group {
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_multicast_ttl_v4(config.multicast_ttl)?;
        log::debug!("[UDP] joined multicast group {}", group);
    }
    socket.set_read_timeout(Some(Duration::from_millis(UDP_READ_TIMEOUT_MS)))?;
    Ok(socket.into())
}

#[cfg(unix)]
fn set_reuseport(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = socket.as_raw_fd();
    let optval: libc::c_int = 1;
    // SAFETY: setsockopt FFI with valid fd, standard socket option, and correctly sized optval pointer
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleAttributes;

    fn localhost(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    fn pair() -> (UdpTransport, UdpTransport) {
        let a = UdpTransport::new(UdpConfig::unicast(0, Vec::new())).expect("bind a");
        let b = UdpTransport::new(UdpConfig::unicast(0, vec![localhost(a.local_port())])).expect("bind b");
        a.add_peer(localhost(b.local_port()));
        (a, b)
    }

    #[test]
    fn test_data_crosses_sockets() {
        let (a, b) = pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        a.subscribe(
            &Endpoint::new(RoleAttributes::local("udp_data")),
            Arc::new(move |info: &MessageInfo, payload: &Bytes| sink.lock().push((info.seq, payload.clone()))),
        )
        .expect("subscribe");

        let writer = Endpoint::new(RoleAttributes::new("hostB", 9, "", "udp_data"));
        b.advertise(&writer).expect("advertise");
        for seq in 1..=3 {
            b.publish(&writer, &MessageInfo::new(writer.id().clone(), seq), &Bytes::from(vec![seq as u8; 8]))
                .expect("publish");
        }

        assert!(wait_for(|| seen.lock().len() == 3));
        let seen = seen.lock();
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[2].1, Bytes::from(vec![3u8; 8]));
    }

    #[test]
    fn test_local_subscriber_gets_local_writer_once() {
        let (a, _b) = pair();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        a.subscribe(
            &Endpoint::new(RoleAttributes::local("udp_local")),
            Arc::new(move |_: &MessageInfo, _: &Bytes| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("subscribe");
        let writer = Endpoint::new(RoleAttributes::local("udp_local"));
        a.advertise(&writer).expect("advertise");
        a.publish(&writer, &MessageInfo::new(writer.id().clone(), 1), &Bytes::new())
            .expect("publish");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_announce_match_and_withdraw() {
        let (a, b) = pair();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        a.watch("udp_disc", Arc::new(move |e: &MatchEvent| sink.lock().push(e.clone())))
            .expect("watch");

        let writer = Endpoint::new(RoleAttributes::new("far-host", 1234, "lidar", "udp_disc"));
        b.advertise(&writer).expect("advertise");
        assert!(wait_for(|| events.lock().len() == 1));
        assert_eq!(events.lock()[0], MatchEvent::Matched(writer.clone()));
        assert_eq!(a.remote_writers().len(), 1);

        b.withdraw(writer.id());
        assert!(wait_for(|| events.lock().len() == 2));
        assert_eq!(events.lock()[1], MatchEvent::Unmatched(writer.id().clone()));
    }

    #[test]
    fn test_lease_expiry_unmatches_silent_writer() {
        let mut config = UdpConfig::unicast(0, Vec::new());
        config.announce_period = Duration::from_millis(30);
        config.lease_multiplier = 2;
        let a = UdpTransport::new(config).expect("bind");

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        a.watch("udp_lease", Arc::new(move |e: &MatchEvent| sink.lock().push(e.clone())))
            .expect("watch");

        // A writer announced once, then silent
        let ghost = Endpoint::new(RoleAttributes::new("ghost", 1, "", "udp_lease"));
        let raw = UdpSocket::bind("127.0.0.1:0").expect("bind raw");
        let datagram = Frame::Announce(ghost.clone()).encode().expect("encode");
        raw.send_to(&datagram, localhost(a.local_port())).expect("send");

        assert!(wait_for(|| events.lock().len() == 2));
        let events = events.lock();
        assert_eq!(events[0], MatchEvent::Matched(ghost.clone()));
        assert_eq!(events[1], MatchEvent::Unmatched(ghost.id().clone()));
    }

    #[test]
    fn test_garbage_datagrams_ignored() {
        let a = UdpTransport::new(UdpConfig::unicast(0, Vec::new())).expect("bind");
        let raw = UdpSocket::bind("127.0.0.1:0").expect("bind raw");
        raw.send_to(b"definitely not a frame", localhost(a.local_port()))
            .expect("send");
        thread::sleep(Duration::from_millis(50));
        assert!(a.remote_writers().is_empty());
    }

    #[test]
    fn test_shutdown_rejects_new_work() {
        let a = UdpTransport::new(UdpConfig::unicast(0, Vec::new())).expect("bind");
        a.shutdown();
        let reader = Endpoint::new(RoleAttributes::local("c"));
        assert!(matches!(
            a.subscribe(&reader, Arc::new(|_: &MessageInfo, _: &Bytes| {})),
            Err(Error::TransportUnavailable(_))
        ));
    }
}
