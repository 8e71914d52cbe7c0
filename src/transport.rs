//! Transport layer between the handshake state machine and a datagram carrier.
//!
//! A [`Transport`] is the capability object the state machine holds: it
//! exposes send, receive, peek, introspection, and event delivery, and hides
//! the concrete carrier behind the [`Carrier`] trait. The carrier keeps a
//! reference to the transport only to enqueue received bytes via
//! [`Transport::put_recv`].

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::ring::ByteRing;
use crate::types::{AuthError, Result};

/// Minimum receive queue capacity in bytes.
pub const MIN_RING_CAPACITY: usize = 1024;

/// Lifecycle events exchanged with the carrier.
///
/// Events are best-effort and never fail the handshake on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportEvent {
    /// Placeholder event, ignored by carriers.
    #[default]
    None,
    /// The carrier link came up.
    Connect,
    /// The carrier link went down.
    Disconnect,
    /// The carrier link came back after a drop.
    Reconnect,
    /// Serial-specific: the line rate changed.
    SerialBaudChange,
}

/// Direct send path and event sink implemented by a concrete carrier.
pub trait Carrier: Send + Sync {
    /// Sends bytes toward the peer, returning the number written.
    fn send(&self, data: &[u8]) -> Result<usize>;

    /// Delivers a lifecycle event. Default is a no-op.
    fn event(&self, _event: TransportEvent) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bidirectional byte conduit with a bounded receive queue.
///
/// The receive side is single-producer (the carrier's receiver thread calling
/// [`Transport::put_recv`]) and single-consumer (the handshake worker calling
/// [`Transport::recv`]); a condition variable signals bytes becoming
/// available.
pub struct Transport {
    recv_ring: Mutex<ByteRing>,
    recv_avail: Condvar,
    send_ring: Mutex<ByteRing>,
    carrier: Mutex<Option<Arc<dyn Carrier>>>,
    max_payload: usize,
}

impl Transport {
    /// Creates a transport for a carrier with the given MTU.
    ///
    /// Queue capacity is the MTU rounded up to a power of two, with a floor
    /// of [`MIN_RING_CAPACITY`].
    pub fn new(max_payload: usize) -> Arc<Self> {
        let capacity = max_payload.max(MIN_RING_CAPACITY);
        Arc::new(Self {
            recv_ring: Mutex::new(ByteRing::with_capacity(capacity)),
            recv_avail: Condvar::new(),
            send_ring: Mutex::new(ByteRing::with_capacity(capacity)),
            carrier: Mutex::new(None),
            max_payload,
        })
    }

    /// Installs the carrier's direct send path and event sink.
    ///
    /// Until a carrier is attached, sends are buffered into the outbound
    /// queue for the carrier to drain.
    pub fn attach_carrier(&self, carrier: Arc<dyn Carrier>) {
        *lock(&self.carrier) = Some(carrier);
    }

    /// Sends a message toward the peer, returning the bytes written.
    ///
    /// Oversize payloads are rejected. A short write is possible and is
    /// treated as fatal by callers sending protocol messages.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        if data.len() > self.max_payload {
            return Err(AuthError::InvalidParam("send exceeds max payload"));
        }

        let carrier = lock(&self.carrier).clone();
        match carrier {
            Some(carrier) => carrier.send(data),
            None => Ok(lock(&self.send_ring).push(data)),
        }
    }

    /// Receives up to `buf.len()` bytes, blocking up to `timeout` for the
    /// first byte.
    ///
    /// A zero timeout polls without blocking. Returns [`AuthError::TimedOut`]
    /// if no byte became available in time.
    pub fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut ring = lock(&self.recv_ring);
        let deadline = Instant::now() + timeout;

        while ring.is_empty() {
            let now = Instant::now();
            if timeout.is_zero() || now >= deadline {
                return Err(AuthError::TimedOut);
            }
            ring = self
                .recv_avail
                .wait_timeout(ring, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        Ok(ring.pop(buf))
    }

    /// Copies up to `buf.len()` queued bytes without consuming them.
    pub fn recv_peek(&self, buf: &mut [u8]) -> usize {
        lock(&self.recv_ring).peek(buf)
    }

    /// Enqueues bytes received by the carrier, returning the number accepted.
    ///
    /// On overflow the newest bytes are dropped: the queue accepts what fits
    /// and reports the count.
    pub fn put_recv(&self, data: &[u8]) -> usize {
        let accepted = {
            let mut ring = lock(&self.recv_ring);
            ring.push(data)
        };

        if accepted < data.len() {
            warn!(
                dropped = data.len() - accepted,
                "receive queue overflow, dropping newest bytes"
            );
        }
        if accepted > 0 {
            self.recv_avail.notify_all();
        }
        accepted
    }

    /// Number of bytes waiting in the outbound queue.
    pub fn queued_send_bytes(&self) -> usize {
        lock(&self.send_ring).len()
    }

    /// Number of bytes waiting in the receive queue.
    pub fn queued_recv_bytes(&self) -> usize {
        lock(&self.recv_ring).len()
    }

    /// Like [`Transport::queued_recv_bytes`], but waits up to `timeout` for
    /// the queue to become non-empty. Returns 0 if nothing arrived.
    pub fn queued_recv_bytes_wait(&self, timeout: Duration) -> usize {
        let mut ring = lock(&self.recv_ring);
        let deadline = Instant::now() + timeout;

        while ring.is_empty() {
            let now = Instant::now();
            if timeout.is_zero() || now >= deadline {
                break;
            }
            ring = self
                .recv_avail
                .wait_timeout(ring, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        ring.len()
    }

    /// Drains queued outbound bytes into `buf`. Used by carriers without a
    /// direct send path.
    pub fn pop_queued_send(&self, buf: &mut [u8]) -> usize {
        lock(&self.send_ring).pop(buf)
    }

    /// Maximum payload the carrier delivers in one frame.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Forwards a lifecycle event to the carrier, if one is attached.
    pub fn event(&self, event: TransportEvent) {
        let carrier = lock(&self.carrier).clone();
        match carrier {
            Some(carrier) => carrier.event(event),
            None => debug!(?event, "transport event with no carrier attached"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCarrier {
        sent: AtomicUsize,
        events: AtomicUsize,
    }

    impl CountingCarrier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: AtomicUsize::new(0),
                events: AtomicUsize::new(0),
            })
        }
    }

    impl Carrier for CountingCarrier {
        fn send(&self, data: &[u8]) -> Result<usize> {
            self.sent.fetch_add(data.len(), Ordering::SeqCst);
            Ok(data.len())
        }

        fn event(&self, _event: TransportEvent) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_put_recv_then_recv() {
        let transport = Transport::new(1024);

        assert_eq!(transport.put_recv(&[1, 2, 3, 4]), 4);
        assert_eq!(transport.queued_recv_bytes(), 4);

        let mut buf = [0u8; 4];
        let n = transport.recv(&mut buf, Duration::ZERO).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(transport.queued_recv_bytes(), 0);
    }

    #[test]
    fn test_recv_zero_timeout_empty() {
        let transport = Transport::new(1024);
        let mut buf = [0u8; 8];

        let result = transport.recv(&mut buf, Duration::ZERO);
        assert!(matches!(result, Err(AuthError::TimedOut)));
    }

    #[test]
    fn test_recv_times_out() {
        let transport = Transport::new(1024);
        let mut buf = [0u8; 8];

        let start = Instant::now();
        let result = transport.recv(&mut buf, Duration::from_millis(50));
        assert!(matches!(result, Err(AuthError::TimedOut)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_recv_wakes_on_put() {
        let transport = Transport::new(1024);
        let producer = transport.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            producer.put_recv(&[7, 8, 9]);
        });

        let mut buf = [0u8; 3];
        let n = transport.recv(&mut buf, Duration::from_secs(2)).unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf, [7, 8, 9]);

        handle.join().unwrap();
    }

    #[test]
    fn test_peek_does_not_consume() {
        let transport = Transport::new(1024);
        transport.put_recv(&[5, 6, 7]);

        let mut buf = [0u8; 3];
        assert_eq!(transport.recv_peek(&mut buf), 3);
        assert_eq!(buf, [5, 6, 7]);
        assert_eq!(transport.queued_recv_bytes(), 3);
    }

    #[test]
    fn test_overflow_drop_newest() {
        let transport = Transport::new(16);
        // Capacity floor applies even for tiny MTUs.
        let capacity = MIN_RING_CAPACITY;

        let accepted = transport.put_recv(&vec![0xAA; capacity]);
        assert_eq!(accepted, capacity);

        // Queue is full; everything new is dropped.
        assert_eq!(transport.put_recv(&[0xBB; 8]), 0);
        assert_eq!(transport.queued_recv_bytes(), capacity);
    }

    #[test]
    fn test_send_oversize_rejected() {
        let transport = Transport::new(128);
        let result = transport.send(&[0u8; 129]);
        assert!(matches!(result, Err(AuthError::InvalidParam(_))));
    }

    #[test]
    fn test_send_direct_path() {
        let transport = Transport::new(1024);
        let carrier = CountingCarrier::new();
        transport.attach_carrier(carrier.clone());

        assert_eq!(transport.send(&[0u8; 100]).unwrap(), 100);
        assert_eq!(carrier.sent.load(Ordering::SeqCst), 100);
        assert_eq!(transport.queued_send_bytes(), 0);
    }

    #[test]
    fn test_send_buffers_without_carrier() {
        let transport = Transport::new(1024);

        assert_eq!(transport.send(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(transport.queued_send_bytes(), 3);

        let mut buf = [0u8; 3];
        assert_eq!(transport.pop_queued_send(&mut buf), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(transport.queued_send_bytes(), 0);
    }

    #[test]
    fn test_queued_recv_bytes_wait() {
        let transport = Transport::new(1024);

        assert_eq!(
            transport.queued_recv_bytes_wait(Duration::from_millis(20)),
            0
        );

        let producer = transport.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            producer.put_recv(&[1, 2]);
        });

        assert_eq!(transport.queued_recv_bytes_wait(Duration::from_secs(2)), 2);
        handle.join().unwrap();
    }

    #[test]
    fn test_events_reach_carrier() {
        let transport = Transport::new(1024);

        // No carrier attached: event is a no-op.
        transport.event(TransportEvent::Connect);

        let carrier = CountingCarrier::new();
        transport.attach_carrier(carrier.clone());
        transport.event(TransportEvent::Connect);
        transport.event(TransportEvent::Disconnect);
        assert_eq!(carrier.events.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_max_payload() {
        assert_eq!(Transport::new(1024).max_payload(), 1024);
    }
}
