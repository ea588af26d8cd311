// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::ops::Add;
use std::ops::Sub;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use thiserror::Error;

pub use crate::socket::Association;
pub use crate::socket::state::IllegalTransition;
pub use crate::socket::state::Phase;
pub use crate::socket::state::Transition;

/// Represents a point in time relative to the creation of the association's clock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SocketTime(Duration);

impl SocketTime {
    /// The moment the clock was created (t=0).
    pub const fn zero() -> SocketTime {
        SocketTime(Duration::ZERO)
    }

    pub const fn infinite_future() -> SocketTime {
        SocketTime(Duration::MAX)
    }
}

impl Add<Duration> for SocketTime {
    type Output = SocketTime;
    fn add(self, rhs: Duration) -> SocketTime {
        SocketTime(self.0.saturating_add(rhs))
    }
}

impl Sub<Duration> for SocketTime {
    type Output = SocketTime;
    fn sub(self, rhs: Duration) -> SocketTime {
        SocketTime(self.0.saturating_sub(rhs))
    }
}

impl Sub<SocketTime> for SocketTime {
    type Output = Duration;
    fn sub(self, rhs: SocketTime) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl From<Duration> for SocketTime {
    fn from(value: Duration) -> Self {
        SocketTime(value)
    }
}

impl From<SocketTime> for Duration {
    fn from(value: SocketTime) -> Self {
        value.0
    }
}

/// Source of the current time. All timestamps stored by the buffers and timers come from here, so
/// that retransmission logic can be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> SocketTime;
}

/// A [`Clock`] backed by the monotonic system clock, with its epoch at construction.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> SocketTime {
        SocketTime::from(self.epoch.elapsed())
    }
}

/// A [`Clock`] that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SocketTime {
        SocketTime::from(*self.now.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// The outbound seam towards the secure transport. Every serialized SCTP packet produced by the
/// association is handed to this sink, one packet per call.
pub trait WireSink: Send {
    fn put_bytes_on_wire(&mut self, bytes: &[u8]) -> anyhow::Result<()>;
}

/// Stream Identifier
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId(pub u16);

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload Protocol Identifier (PPID)
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct PpId(pub u32);

impl fmt::Debug for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
impl fmt::Display for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Send options for sending messages.
#[derive(Clone, Debug, Default)]
pub struct SendOptions {
    /// If the message should be sent with unordered message delivery.
    pub unordered: bool,

    /// If set, will abandon messages that haven't been acknowledged before the lifetime has
    /// expired, counted from their first transmission (RFC 3758).
    pub lifetime: Option<Duration>,

    /// If set, limits the number of retransmissions (RFC 3758). Zero means that the message is
    /// sent once and never retransmitted.
    pub max_retransmissions: Option<u16>,
}

/// An SCTP message is a group of bytes sent and received as a whole on a specified stream
/// identifier (`stream_id`), and with a payload protocol identifier (`ppid`).
#[derive(Debug)]
pub struct Message {
    /// The stream identifier to which the message is sent.
    pub stream_id: StreamId,

    /// The payload protocol identifier (ppid) associated with the message.
    pub ppid: PpId,

    /// The payload of the message.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a new `Message`.
    pub fn new(stream_id: StreamId, ppid: PpId, payload: Vec<u8>) -> Self {
        Message { stream_id, ppid, payload }
    }
}

/// A fully reassembled incoming message, ready to be handed to the application.
#[derive(Clone, Debug, PartialEq)]
pub struct Deliverable {
    pub payload: Vec<u8>,

    /// How many DATA chunks the message was carried in.
    pub fragment_count: usize,

    pub stream_id: StreamId,
    pub ppid: PpId,
}

/// What the handshake layer learned about the peer.
#[derive(Clone, Copy, Debug)]
pub struct PeerParameters {
    /// The tag the peer expects in the common header of every packet sent to it.
    pub verification_tag: u32,

    /// The TSN of the first DATA chunk the peer will send.
    pub initial_tsn: u32,

    /// The peer's initial advertised receiver window.
    pub a_rwnd: u32,
}

/// Represents the category of an error that has occurred.
///
/// This enum is used in [`AssociationEvent::Error`] and [`AssociationEvent::Aborted`] to provide
/// information about the nature of the error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ErrorKind {
    /// Too many retransmissions or timeouts. This typically indicates a loss of connectivity to
    /// the peer.
    TooManyRetries,

    /// A command was issued that is only possible to execute when the association can send and
    /// receive data.
    NotConnected,

    /// Parsing of an incoming SCTP packet or its chunks failed.
    ParseFailed,

    /// The peer has reported an issue by sending an `ABORT` chunk. The specific cause is
    /// included in the string provided with the event.
    PeerReported,

    /// A protocol violation, such as an illegal phase transition.
    ProtocolViolation,

    /// The association's receive buffer has been exhausted.
    ResourceExhaustion,
}

/// Why a call to [`Association::send`] was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum SendError {
    #[error("The message payload is empty")]
    MessageEmpty,

    #[error("The message is larger than the configured max_message_size")]
    MessageTooLarge,

    #[error("Can't send data in phase {0:?}")]
    NotConnected(Phase),

    #[error("The send buffer is full")]
    ResourceExhaustion,
}

/// User configurable options.
#[derive(Clone, Debug)]
pub struct Options {
    /// Source port of all outgoing packets, and expected destination port of incoming ones.
    pub local_port: u16,

    /// Destination port of all outgoing packets.
    pub remote_port: u16,

    /// Maximum size of an SCTP packet. DATA chunk payloads are sized so that a single chunk fits
    /// into one packet together with the common header.
    pub mtu: usize,

    /// Maximum size of a single message. Larger messages are rejected by `send`.
    pub max_message_size: usize,

    /// Maximum number of bytes held by the receive buffer, and the advertised receiver window.
    pub max_receiver_window_buffer_size: usize,

    /// Maximum number of DATA chunks held by the receive buffer at any time.
    pub max_receive_buffer_fragments: usize,

    /// Maximum number of bytes queued or in flight in the send buffer.
    pub max_send_buffer_size: usize,

    /// Max allowed RTT value. When the RTT is measured and it's found to be larger than this
    /// value, it will be discarded and not used for any RTO calculation.
    pub rtt_max: Duration,

    /// Initial RTO value.
    pub rto_initial: Duration,

    /// Maximum RTO value.
    pub rto_max: Duration,

    /// Minimum RTO value. This must be larger than an expected peer delayed ack timeout.
    pub rto_min: Duration,

    /// Lower bound of the RTT variance used when computing the RTO, so that a very stable RTT
    /// doesn't make the RTO converge to the RTT itself.
    pub min_rtt_variance: Duration,

    /// Interval between heartbeats. Set to zero to disable.
    pub heartbeat_interval: Duration,

    /// The maximum time when a SACK will be sent from the arrival of an unacknowledged packet.
    pub delayed_ack_max_timeout: Duration,

    /// How often the retransmission loop checks for an expired retransmission timer.
    pub retransmission_check_interval: Duration,

    /// How often buffer statistics are logged.
    pub monitor_interval: Duration,

    /// Maximum number of DATA chunks retransmitted on a single retransmission timeout.
    pub max_burst: usize,

    /// Maximum consecutive retransmission timeouts before the association is aborted. Set to
    /// None for no limit.
    pub max_retransmissions: Option<u32>,

    /// Disables SCTP packet CRC-32 verification. Must only be used by tests.
    pub disable_checksum_verification: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            local_port: 5000,
            remote_port: 5000,

            // A safe default SCTP packet size. It is derived from the minimum guaranteed
            // MTU for IPv6 (1280 bytes), which may not support fragmentation, by subtracting
            // conservative estimates for headers and overhead.
            //
            // Calculation:
            //   1280 (IPv6 MTU)
            //    -40 (IPv6 header)
            //     -8 (UDP header)
            //    -24 (GCM AEAD overhead)
            //    -13 (DTLS record header)
            //     -4 (TURN ChannelData header)
            //   = 1191 bytes
            mtu: 1191,

            max_message_size: 256 * 1024,
            max_receiver_window_buffer_size: 160_000,
            max_receive_buffer_fragments: 1000,
            max_send_buffer_size: 2_000_000,
            rtt_max: Duration::from_secs(60),
            rto_initial: Duration::from_millis(500),
            rto_max: Duration::from_secs(60),
            rto_min: Duration::from_millis(400),
            min_rtt_variance: Duration::from_millis(30),
            heartbeat_interval: Duration::from_secs(30),
            delayed_ack_max_timeout: Duration::from_millis(200),
            retransmission_check_interval: Duration::from_millis(50),
            monitor_interval: Duration::from_secs(10),
            max_burst: 4,
            max_retransmissions: Some(10),
            disable_checksum_verification: false,
        }
    }
}

/// Events generated by the association.
#[derive(Debug, PartialEq)]
pub enum AssociationEvent {
    /// The association reached the established phase.
    Established,

    /// The association was closed by a completed shutdown handshake.
    Closed,

    /// The association was aborted, either locally because of a fatal condition or by the peer
    /// sending ABORT. No other events follow.
    Aborted(ErrorKind, String),

    /// A non-fatal error, such as a received packet that could not be parsed.
    Error(ErrorKind, String),

    /// The peer opened a WebRTC data channel on this stream, and it has been acknowledged.
    DataChannelOpened(StreamId),
}

/// Snapshot of counters tracked by the association.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metrics {
    /// Number of packets sent.
    pub tx_packets_count: usize,

    /// Number of messages requested to be sent.
    pub tx_messages_count: usize,

    /// Number of DATA chunks retransmitted, by timeout or fast retransmit.
    pub rtx_chunks_count: usize,

    /// Smoothed round trip time.
    pub srtt: Duration,

    /// Number of DATA chunks that have been sent but not yet cumulatively acknowledged.
    pub unack_data_count: usize,

    /// Number of packets received.
    pub rx_packets_count: usize,

    /// Number of messages delivered to the incoming message queue.
    pub rx_messages_count: usize,

    /// The peer's last announced receiver window size.
    pub peer_rwnd_bytes: u32,

    /// Payload bytes accepted by the receive buffer.
    pub received_bytes: u64,

    /// Payload bytes delivered out of the receive buffer.
    pub delivered_bytes: u64,
}
