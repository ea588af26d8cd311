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

use crate::api::AssociationEvent;
use crate::api::Clock;
use crate::api::Deliverable;
use crate::api::ErrorKind;
use crate::api::Message;
use crate::api::Metrics;
use crate::api::Options;
use crate::api::PeerParameters;
use crate::api::PpId;
use crate::api::SendError;
use crate::api::SendOptions;
use crate::api::SocketTime;
use crate::api::StreamId;
use crate::api::WireSink;
use crate::logging::log_packet;
use crate::math::round_down_to_4;
use crate::math::round_up_to_4;
use crate::packet::AsSerializableTlv;
use crate::packet::SerializableTlv;
use crate::packet::abort_chunk::AbortChunk;
use crate::packet::chunk::Chunk;
use crate::packet::data::Data;
use crate::packet::data_chunk;
use crate::packet::data_chunk::DataChunk;
use crate::packet::error_causes::ErrorCause;
use crate::packet::forward_tsn_chunk::ForwardTsnChunk;
use crate::packet::heartbeat_ack_chunk::HeartbeatAckChunk;
use crate::packet::heartbeat_info_parameter::HeartbeatInfoParameter;
use crate::packet::heartbeat_request_chunk::HeartbeatRequestChunk;
use crate::packet::parameter::Parameter;
use crate::packet::sack_chunk::SackChunk;
use crate::packet::sctp_packet::COMMON_HEADER_SIZE;
use crate::packet::sctp_packet::SctpPacket;
use crate::packet::sctp_packet::SctpPacketBuilder;
use crate::packet::shutdown_chunks::ShutdownAckChunk;
use crate::packet::shutdown_chunks::ShutdownChunk;
use crate::packet::shutdown_chunks::ShutdownCompleteChunk;
use crate::rx::ReceiveBuffer;
use crate::rx::ReceiveBufferError;
use crate::rx::ReceivedUnit;
use crate::socket::state::IllegalTransition;
use crate::socket::state::Phase;
use crate::socket::state::Transition;
use crate::socket::supervisor::Supervisor;
use crate::tx::Reliability;
use crate::tx::SendBufferError;
use crate::tx::buffered_sent::SendData;
use crate::tx::retransmission_scheduler::RetransmissionScheduler;
use crate::tx::retransmission_timeout::RetransmissionTimeout;
use crate::tx::send_buffer::SendBuffer;
use crate::types::Ssn;
use crate::types::StreamKey;
use crate::types::Tsn;
#[cfg(not(test))]
use log::info;
#[cfg(not(test))]
use log::warn;
use rand::Rng;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as warn;
use std::time::Duration;

pub mod state;
pub(crate) mod supervisor;


const MIN_VERIFICATION_TAG: u32 = 1;
const MAX_VERIFICATION_TAG: u32 = u32::MAX;

/// A SACK is sent right away for every second packet carrying DATA, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2-5>.
const DATA_PACKETS_PER_SACK: u32 = 2;

/// Messages of the WebRTC data channel establishment protocol, see
/// <https://www.rfc-editor.org/rfc/rfc8832#section-5>.
const DCEP_PPID: PpId = PpId(50);
const DATA_CHANNEL_ACK: u8 = 0x02;
const DATA_CHANNEL_OPEN: u8 = 0x03;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Association state that belongs to neither buffer.
struct Control {
    peer_verification_tag: u32,
    next_ssn: HashMap<StreamId, Ssn>,
    rto: RetransmissionTimeout,
    heartbeat_counter: u32,

    /// Consecutive retransmission timeouts, see
    /// <https://datatracker.ietf.org/doc/html/rfc9260#section-8.1>.
    tx_error_count: u32,

    data_packets_since_sack: u32,
    sack_owed: bool,
    shutdown_resend_at: Option<SocketTime>,
    events: VecDeque<AssociationEvent>,
    messages: VecDeque<Deliverable>,
    metrics: Metrics,
}

/// Chunks produced while handling one input or timer, to be sent in as few packets as possible.
#[derive(Default)]
struct Outbound {
    chunks: Vec<Chunk>,
}

impl Outbound {
    fn push(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }

    fn push_data(&mut self, data: Vec<SendData>) {
        self.chunks
            .extend(data.into_iter().map(|d| Chunk::Data(DataChunk { tsn: d.tsn, data: d.data })));
    }

    fn has_data(&self) -> bool {
        self.chunks.iter().any(|c| matches!(c, Chunk::Data(_)))
    }

    fn into_packets(mut self, mut builder: SctpPacketBuilder) -> Vec<Vec<u8>> {
        // Control chunks go before DATA, and SACK first among them, see
        // <https://datatracker.ietf.org/doc/html/rfc9260#section-6.5>.
        self.chunks.sort_by_key(|c| match c {
            Chunk::Sack(_) => 0,
            Chunk::Data(_) => 2,
            _ => 1,
        });
        let mut packets = vec![];
        for chunk in &self.chunks {
            let size = round_up_to_4!(chunk.as_serializable().serialized_size());
            if !builder.is_empty() && size > builder.bytes_remaining() {
                packets.push(builder.build());
            }
            builder.add(chunk);
        }
        if !builder.is_empty() {
            packets.push(builder.build());
        }
        packets
    }
}

pub(crate) struct Inner {
    name: String,
    options: Options,
    clock: Arc<dyn Clock>,
    local_verification_tag: u32,
    local_initial_tsn: Tsn,
    phase: Mutex<Phase>,
    rx: Mutex<ReceiveBuffer>,
    tx: Mutex<SendBuffer>,
    control: Mutex<Control>,
    wire: Mutex<Box<dyn WireSink>>,
    scheduler: RetransmissionScheduler,
    loops_stopped: Mutex<bool>,
    loops_wakeup: Condvar,
}

impl Inner {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    fn now(&self) -> SocketTime {
        self.clock.now()
    }

    fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    fn transition(&self, transition: Transition) -> Result<Phase, IllegalTransition> {
        let mut phase = lock(&self.phase);
        let next = phase.next(transition)?;
        if next != *phase {
            info!("{}: {} -> {}", self.name, *phase, next);
        }
        *phase = next;
        Ok(next)
    }

    /// Moves to `Closed`, which is legal from any phase.
    fn abort_phase(&self) {
        let mut phase = lock(&self.phase);
        if *phase != Phase::Closed {
            info!("{}: {} -> {} (abort)", self.name, *phase, Phase::Closed);
            *phase = Phase::Closed;
        }
    }

    fn emit(&self, event: AssociationEvent) {
        info!("{}: Event {:?}", self.name, event);
        lock(&self.control).events.push_back(event);
    }

    /// Stops all timers and loops, and reports why.
    fn close(&self, event: AssociationEvent) {
        self.scheduler.stop();
        self.stop_loops();
        self.emit(event);
    }

    fn stop_loops(&self) {
        *lock(&self.loops_stopped) = true;
        self.loops_wakeup.notify_all();
    }

    /// Blocks for `timeout`, or until the loops are stopped. Returns true if they were.
    pub(crate) fn wait_for_stop(&self, timeout: Duration) -> bool {
        let stopped = lock(&self.loops_stopped);
        let (stopped, _) = self
            .loops_wakeup
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *stopped
    }

    fn new_packet(&self) -> SctpPacketBuilder {
        let tag = lock(&self.control).peer_verification_tag;
        let options = &self.options;
        SctpPacketBuilder::new(tag, options.local_port, options.remote_port, options.mtu)
    }

    /// Bytes available for chunks in one packet.
    fn max_chunks_size(&self) -> usize {
        round_down_to_4!(self.options.mtu).saturating_sub(COMMON_HEADER_SIZE)
    }

    /// DATA payloads are sized so that one DATA chunk fills at most one packet.
    fn max_fragment_size(&self) -> usize {
        self.max_chunks_size().saturating_sub(data_chunk::HEADER_SIZE).max(4)
    }

    fn write_packets(&self, packets: Vec<Vec<u8>>) {
        if packets.is_empty() {
            return;
        }
        let now = self.now();
        {
            let mut wire = lock(&self.wire);
            for packet in &packets {
                log_packet(&self.name, now.into(), true, packet);
                if let Err(e) = wire.put_bytes_on_wire(packet) {
                    warn!("{}: Failed to write packet: {:#}", self.name, e);
                }
            }
        }
        lock(&self.control).metrics.tx_packets_count += packets.len();
    }

    fn send_chunks(&self, out: Outbound) {
        if !out.chunks.is_empty() {
            let packets = out.into_packets(self.new_packet());
            self.write_packets(packets);
        }
    }

    fn has_valid_tag(&self, packet: &SctpPacket) -> bool {
        let tag = packet.common_header.verification_tag;
        // See <https://datatracker.ietf.org/doc/html/rfc9260#section-8.5.1>.
        match packet.chunks.first() {
            Some(Chunk::Abort(AbortChunk { tag_reflected: true, .. }))
            | Some(Chunk::ShutdownComplete(ShutdownCompleteChunk { tag_reflected: true })) => {
                tag == lock(&self.control).peer_verification_tag
            }
            _ => tag == self.local_verification_tag,
        }
    }

    fn handle_inbound(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let now = self.now();
        log_packet(&self.name, now.into(), false, bytes);
        lock(&self.control).metrics.rx_packets_count += 1;

        let packet = match SctpPacket::from_bytes(bytes, &self.options) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("{}: Discarding malformed packet: {:#}", self.name, e);
                self.emit(AssociationEvent::Error(ErrorKind::ParseFailed, format!("{e:#}")));
                return vec![];
            }
        };
        if self.phase() == Phase::Closed {
            log::debug!("{}: Ignoring packet received while closed", self.name);
            return vec![];
        }
        if !self.has_valid_tag(&packet) {
            warn!(
                "{}: Discarding packet with verification tag {:#010x}",
                self.name, packet.common_header.verification_tag
            );
            return vec![];
        }

        let mut out = Outbound::default();
        let mut received_data = false;
        let mut sack_now = false;
        for chunk in packet.chunks {
            log::debug!("{}: Received {}", self.name, chunk);
            match &chunk {
                Chunk::Data(_) => received_data = true,
                Chunk::ForwardTsn(_) => sack_now = true,
                _ => {}
            }
            match self.dispatch(now, chunk, &mut out) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    let kind = match e.downcast_ref::<ReceiveBufferError>() {
                        Some(_) => ErrorKind::ResourceExhaustion,
                        None => ErrorKind::ProtocolViolation,
                    };
                    self.fail(kind, &format!("{e:#}"), &mut out);
                    return out.into_packets(self.new_packet());
                }
            }
        }

        self.collect_delivered_messages(&mut out);
        if let Err(e) = self.maybe_progress_shutdown(now, &mut out) {
            self.fail(ErrorKind::ProtocolViolation, &e.to_string(), &mut out);
            return out.into_packets(self.new_packet());
        }
        self.maybe_add_sack(received_data, sack_now, &mut out);
        out.into_packets(self.new_packet())
    }

    /// Returns false if the remaining chunks of the packet must not be processed.
    fn dispatch(&self, now: SocketTime, chunk: Chunk, out: &mut Outbound) -> anyhow::Result<bool> {
        match chunk {
            Chunk::Data(DataChunk { tsn, data }) => self.handle_data(tsn, data)?,
            Chunk::Sack(sack) => self.handle_sack(now, &sack, out),
            Chunk::HeartbeatRequest(HeartbeatRequestChunk { parameters }) => {
                // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.3-9>:
                //
                //   The receiver of the HEARTBEAT chunk SHOULD immediately respond with a
                //   HEARTBEAT ACK chunk that contains the Heartbeat Information TLV, together with
                //   any other received TLVs, copied unchanged from the received HEARTBEAT chunk.
                let ack = HeartbeatAckChunk { parameters };
                let size = round_up_to_4!(ack.serialized_size());
                if size > self.max_chunks_size() {
                    warn!(
                        "{}: Not echoing a HEARTBEAT of {} bytes, exceeding the MTU",
                        self.name, size
                    );
                } else {
                    out.push(Chunk::HeartbeatAck(ack));
                }
            }
            Chunk::HeartbeatAck(c) => self.handle_heartbeat_ack(now, &c),
            Chunk::Abort(c) => {
                self.abort_phase();
                self.close(AssociationEvent::Aborted(ErrorKind::PeerReported, c.reason()));
                return Ok(false);
            }
            Chunk::Shutdown(c) => self.handle_shutdown(now, &c, out)?,
            Chunk::ShutdownAck(_) => self.handle_shutdown_ack(out)?,
            Chunk::ShutdownComplete(_) => self.handle_shutdown_complete()?,
            Chunk::ForwardTsn(c) => self.handle_forward_tsn(&c),
            Chunk::Unknown(c) => return Ok(c.continue_processing()),
        }
        Ok(true)
    }

    fn handle_data(&self, tsn: Tsn, data: Data) -> Result<(), ReceiveBufferError> {
        let phase = self.phase();
        if !phase.can_send_and_receive() {
            log::debug!("{}: Ignoring DATA with TSN {} in phase {}", self.name, tsn, phase);
            return Ok(());
        }
        let result = lock(&self.rx).store(ReceivedUnit { tsn, data });
        lock(&self.control).sack_owed = true;
        match result {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::debug!("{}: Dropping DATA with TSN {}: {}", self.name, tsn, e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn handle_sack(&self, now: SocketTime, sack: &SackChunk, out: &mut Outbound) {
        let can_send = self.phase().can_send_and_receive();
        let (outcome, new_data, inflight) = {
            let mut tx = lock(&self.tx);
            let outcome = tx.receive_sack(sack, now);
            let new_data = if can_send { tx.get_data_to_send(now) } else { vec![] };
            (outcome, new_data, tx.inflight_size())
        };

        {
            let mut control = lock(&self.control);
            if outcome.cumulative_advanced {
                control.tx_error_count = 0;
            }
            control.metrics.rtx_chunks_count += outcome.fast_retransmit.len();
        }
        if !outcome.fast_retransmit.is_empty() {
            log::debug!(
                "{}: Fast retransmitting {} chunks",
                self.name,
                outcome.fast_retransmit.len()
            );
        }
        out.push_data(outcome.fast_retransmit);
        if let Some(forward_tsn) = outcome.forward_tsn {
            out.push(Chunk::ForwardTsn(forward_tsn));
        }
        out.push_data(new_data);

        // See <https://datatracker.ietf.org/doc/html/rfc9260#section-6.3.2>, rules R2 and R3.
        if inflight == 0 {
            self.scheduler.stop();
        } else if outcome.cumulative_advanced || !self.scheduler.is_running() {
            self.scheduler.restart();
        }
    }

    fn handle_heartbeat_ack(&self, now: SocketTime, chunk: &HeartbeatAckChunk) {
        let Some((counter, sent_at_millis)) =
            chunk.info().and_then(HeartbeatInfoParameter::counter_and_time)
        else {
            self.emit(AssociationEvent::Error(
                ErrorKind::ParseFailed,
                "Failed to parse HEARTBEAT-ACK; Invalid info parameter".into(),
            ));
            return;
        };

        let rto = {
            let mut control = lock(&self.control);
            if counter != control.heartbeat_counter {
                log::debug!("{}: Ignoring HEARTBEAT-ACK for old heartbeat {}", self.name, counter);
                return;
            }
            let rtt = now - SocketTime::from(Duration::from_millis(sent_at_millis));
            control.rto.observe_rtt(rtt);
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.1>:
            //
            //   When a HEARTBEAT ACK chunk is received from the peer endpoint, the counter SHOULD
            //   also be reset.
            control.tx_error_count = 0;
            control.rto.rto()
        };
        self.scheduler.set_interval(rto);
    }

    fn handle_shutdown(
        &self,
        now: SocketTime,
        chunk: &ShutdownChunk,
        out: &mut Outbound,
    ) -> Result<(), IllegalTransition> {
        // The cumulative TSN ack acknowledges data just like a SACK without gaps would.
        let a_rwnd = lock(&self.tx).peer_rwnd();
        let sack = SackChunk {
            cumulative_tsn_ack: chunk.cumulative_tsn_ack,
            a_rwnd,
            gap_ack_blocks: vec![],
            duplicate_tsns: vec![],
        };
        self.handle_sack(now, &sack, out);

        match self.phase() {
            Phase::Established => {
                self.transition(Transition::ReceiveShutdown)?;
            }
            Phase::ShutdownSent => {
                // Both sides initiated the shutdown.
                self.transition(Transition::SendShutdownAck)?;
                out.push(Chunk::ShutdownAck(ShutdownAckChunk));
                self.arm_shutdown_resend(now);
            }
            Phase::ShutdownAckSent => out.push(Chunk::ShutdownAck(ShutdownAckChunk)),
            phase => log::debug!("{}: Ignoring SHUTDOWN in phase {}", self.name, phase),
        }
        Ok(())
    }

    fn handle_shutdown_ack(&self, out: &mut Outbound) -> Result<(), IllegalTransition> {
        match self.phase() {
            Phase::ShutdownSent | Phase::ShutdownAckSent => {
                out.push(Chunk::ShutdownComplete(ShutdownCompleteChunk { tag_reflected: false }));
                self.transition(Transition::Close)?;
                self.close(AssociationEvent::Closed);
            }
            phase => log::debug!("{}: Ignoring SHUTDOWN-ACK in phase {}", self.name, phase),
        }
        Ok(())
    }

    fn handle_shutdown_complete(&self) -> Result<(), IllegalTransition> {
        match self.phase() {
            Phase::ShutdownAckSent => {
                self.transition(Transition::Close)?;
                self.close(AssociationEvent::Closed);
            }
            phase => log::debug!("{}: Ignoring SHUTDOWN-COMPLETE in phase {}", self.name, phase),
        }
        Ok(())
    }

    fn handle_forward_tsn(&self, chunk: &ForwardTsnChunk) {
        if !self.phase().can_send_and_receive() {
            return;
        }
        let result =
            lock(&self.rx).handle_forward_tsn(chunk.new_cumulative_tsn, &chunk.skipped_streams);
        lock(&self.control).sack_owed = true;
        if let Err(e) = result {
            log::debug!("{}: Ignoring FORWARD-TSN: {}", self.name, e);
        }
    }

    /// Moves completed messages to the application's queue. Data channel control messages are
    /// answered here instead, and their space in the receive buffer is released at once.
    fn collect_delivered_messages(&self, out: &mut Outbound) {
        let messages = lock(&self.rx).get_messages_for_delivery();
        if messages.is_empty() {
            return;
        }
        let (control_messages, messages): (Vec<Deliverable>, Vec<Deliverable>) =
            messages.into_iter().partition(|m| m.ppid == DCEP_PPID);
        if !control_messages.is_empty() {
            let size = control_messages.iter().map(|m| m.payload.len()).sum();
            lock(&self.rx).release_read_bytes(size);
            for message in &control_messages {
                self.handle_data_channel_message(message, out);
            }
        }
        if !messages.is_empty() {
            let mut control = lock(&self.control);
            control.metrics.rx_messages_count += messages.len();
            control.messages.extend(messages);
        }
    }

    /// Acknowledges a DATA_CHANNEL_OPEN on the stream it arrived on, see
    /// <https://www.rfc-editor.org/rfc/rfc8832#section-6>.
    fn handle_data_channel_message(&self, message: &Deliverable, out: &mut Outbound) {
        let stream_id = message.stream_id;
        match message.payload.first() {
            Some(&DATA_CHANNEL_OPEN) => {
                log::debug!("{}: DATA_CHANNEL_OPEN on stream {}", self.name, stream_id);
                let ack = Message::new(stream_id, DCEP_PPID, vec![DATA_CHANNEL_ACK]);
                match self.queue_message(ack, &SendOptions::default()) {
                    Ok(data) => {
                        if !data.is_empty() {
                            self.scheduler.start();
                        }
                        out.push_data(data);
                        self.emit(AssociationEvent::DataChannelOpened(stream_id));
                    }
                    Err(e) => {
                        warn!(
                            "{}: Failed to acknowledge data channel {}: {}",
                            self.name, stream_id, e
                        );
                    }
                }
            }
            // The peer acknowledging a channel that was opened from this side.
            Some(&DATA_CHANNEL_ACK) => {
                log::debug!("{}: DATA_CHANNEL_ACK on stream {}", self.name, stream_id);
            }
            other => self.emit(AssociationEvent::Error(
                ErrorKind::ProtocolViolation,
                format!("Unexpected data channel message type {other:?} on stream {stream_id}"),
            )),
        }
    }

    /// Fragments and buffers a message, and returns the chunks that may be sent right away.
    fn queue_message(
        &self,
        message: Message,
        send_options: &SendOptions,
    ) -> Result<Vec<SendData>, SendError> {
        let phase = self.phase();
        if !phase.can_send_and_receive() {
            return Err(SendError::NotConnected(phase));
        }
        if message.payload.is_empty() {
            return Err(SendError::MessageEmpty);
        }
        if message.payload.len() > self.options.max_message_size {
            return Err(SendError::MessageTooLarge);
        }

        let reliability = match (send_options.max_retransmissions, send_options.lifetime) {
            (Some(max), _) => Reliability::MaxRetransmits(max),
            (None, Some(lifetime)) => Reliability::MaxLifetime(lifetime),
            (None, None) => Reliability::Reliable,
        };
        let stream_key = StreamKey::new(send_options.unordered, message.stream_id);
        let now = self.now();

        let mut control = lock(&self.control);
        let ssn = match stream_key {
            StreamKey::Ordered(id) => control.next_ssn.get(&id).copied().unwrap_or(Ssn(0)),
            StreamKey::Unordered(_) => Ssn(0),
        };
        let fragments = fragment(&message, stream_key, ssn, self.max_fragment_size());

        let mut tx = lock(&self.tx);
        tx.buffer(fragments, reliability).map_err(|e| match e {
            SendBufferError::OutOfBufferSpace => SendError::ResourceExhaustion,
            SendBufferError::NotInitialized => SendError::NotConnected(phase),
        })?;
        if stream_key.is_ordered() {
            control.next_ssn.insert(message.stream_id, ssn + 1);
        }
        control.metrics.tx_messages_count += 1;
        Ok(tx.get_data_to_send(now))
    }

    fn maybe_add_sack(&self, received_data: bool, immediately: bool, out: &mut Outbound) {
        let sack_due = {
            let mut control = lock(&self.control);
            if received_data {
                control.data_packets_since_sack += 1;
            }
            control.sack_owed
                && (immediately
                    || control.data_packets_since_sack >= DATA_PACKETS_PER_SACK
                    || out.has_data())
        };
        let has_gaps = received_data && lock(&self.rx).has_gaps_or_duplicates();
        if sack_due || has_gaps {
            self.add_sack(out);
        }
    }

    fn add_sack(&self, out: &mut Outbound) {
        let sack = lock(&self.rx).get_sack_data_to_send();
        if let Some(sack) = sack {
            out.push(Chunk::Sack(sack));
            let mut control = lock(&self.control);
            control.sack_owed = false;
            control.data_packets_since_sack = 0;
        }
    }

    fn shutdown_chunk(&self) -> Chunk {
        let cumulative_tsn_ack = lock(&self.rx).cumulative_tsn().unwrap_or(Tsn(0));
        Chunk::Shutdown(ShutdownChunk { cumulative_tsn_ack })
    }

    fn arm_shutdown_resend(&self, now: SocketTime) {
        let mut control = lock(&self.control);
        control.shutdown_resend_at = Some(now + control.rto.rto());
    }

    /// Sends SHUTDOWN or SHUTDOWN-ACK once all outstanding data has been acknowledged, see
    /// <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2>.
    fn maybe_progress_shutdown(
        &self,
        now: SocketTime,
        out: &mut Outbound,
    ) -> Result<(), IllegalTransition> {
        let phase = self.phase();
        if !matches!(phase, Phase::ShutdownPending | Phase::ShutdownReceived) {
            return Ok(());
        }
        if lock(&self.tx).has_messages_buffered() {
            return Ok(());
        }
        if phase == Phase::ShutdownPending {
            self.transition(Transition::SendShutdown)?;
            out.push(self.shutdown_chunk());
        } else {
            self.transition(Transition::SendShutdownAck)?;
            out.push(Chunk::ShutdownAck(ShutdownAckChunk));
        }
        self.arm_shutdown_resend(now);
        Ok(())
    }

    /// Resends an unanswered SHUTDOWN or SHUTDOWN-ACK (the T2-shutdown timer).
    fn maybe_resend_shutdown(&self, now: SocketTime, out: &mut Outbound) {
        let chunk = match self.phase() {
            Phase::ShutdownSent => self.shutdown_chunk(),
            Phase::ShutdownAckSent => Chunk::ShutdownAck(ShutdownAckChunk),
            _ => return,
        };
        let mut control = lock(&self.control);
        if control.shutdown_resend_at.is_some_and(|at| at <= now) {
            control.shutdown_resend_at = Some(now + control.rto.rto());
            out.push(chunk);
        }
    }

    /// Aborts the association because of a local fatal condition.
    fn fail(&self, kind: ErrorKind, reason: &str, out: &mut Outbound) {
        warn!("{}: Aborting: {}", self.name, reason);
        out.push(Chunk::Abort(AbortChunk {
            tag_reflected: false,
            error_causes: vec![ErrorCause::ProtocolViolation(reason.to_string())],
        }));
        self.abort_phase();
        self.close(AssociationEvent::Error(kind, reason.to_string()));
    }

    pub(crate) fn on_heartbeat_tick(&self) {
        if !self.phase().can_send_and_receive() {
            return;
        }
        let now = self.now();
        let counter = {
            let mut control = lock(&self.control);
            control.heartbeat_counter = control.heartbeat_counter.wrapping_add(1);
            control.heartbeat_counter
        };
        let sent_at_millis = u64::try_from(Duration::from(now).as_millis()).unwrap_or(u64::MAX);
        log::debug!("{}: Sending HEARTBEAT {}", self.name, counter);

        let mut out = Outbound::default();
        out.push(Chunk::HeartbeatRequest(HeartbeatRequestChunk {
            parameters: vec![Parameter::HeartbeatInfo(HeartbeatInfoParameter::from_counter_and_time(
                counter,
                sent_at_millis,
            ))],
        }));
        self.send_chunks(out);
    }

    pub(crate) fn on_sack_tick(&self) {
        let now = self.now();
        let mut out = Outbound::default();
        if lock(&self.control).sack_owed {
            self.add_sack(&mut out);
        }
        if let Err(e) = self.maybe_progress_shutdown(now, &mut out) {
            self.fail(ErrorKind::ProtocolViolation, &e.to_string(), &mut out);
        }
        self.maybe_resend_shutdown(now, &mut out);
        self.send_chunks(out);
    }

    pub(crate) fn on_retransmit_tick(&self) {
        if self.scheduler.check_for_timeout() {
            self.retransmit_expired();
        }
    }

    /// Resends DATA whose retransmission timeout has expired (the T3-rtx timer).
    fn retransmit_expired(&self) {
        let now = self.now();
        let rto = lock(&self.control).rto.rto();
        let (resent, forward_tsn, inflight) = {
            let mut tx = lock(&self.tx);
            let resent = tx.get_data_to_retransmit(now, rto);
            (resent, tx.forward_tsn(), tx.inflight_size())
        };
        if inflight == 0 {
            self.scheduler.stop();
        }

        if !resent.is_empty() {
            let errors = {
                let mut control = lock(&self.control);
                control.tx_error_count += 1;
                control.metrics.rtx_chunks_count += resent.len();
                control.tx_error_count
            };
            info!("{}: Retransmitting {} chunks after timeout", self.name, resent.len());
            if self.options.max_retransmissions.is_some_and(|max| errors > max) {
                warn!("{}: Too many retransmissions, aborting", self.name);
                self.abort_phase();
                self.close(AssociationEvent::Aborted(
                    ErrorKind::TooManyRetries,
                    "Too many retransmissions".into(),
                ));
                return;
            }
        }

        let mut out = Outbound::default();
        out.push_data(resent);
        if let Some(forward_tsn) = forward_tsn {
            out.push(Chunk::ForwardTsn(forward_tsn));
        }
        self.send_chunks(out);
    }

    pub(crate) fn on_monitor_tick(&self) {
        let (used, fragments, a_rwnd, duplicates) = {
            let rx = lock(&self.rx);
            (rx.used_bytes(), rx.held_fragments(), rx.a_rwnd(), rx.unreported_duplicates())
        };
        let (buffered, inflight, peer_rwnd) = {
            let tx = lock(&self.tx);
            (tx.buffered_bytes(), tx.inflight_size(), tx.peer_rwnd())
        };
        let rto = lock(&self.control).rto.rto();
        info!(
            "{}: phase={} rx[used={} fragments={} a_rwnd={} unreported_dups={}] \
             tx[buffered={} inflight={} peer_rwnd={}] rto={:?}",
            self.name,
            self.phase(),
            used,
            fragments,
            a_rwnd,
            duplicates,
            buffered,
            inflight,
            peer_rwnd,
            rto
        );
    }
}

fn fragment(message: &Message, stream_key: StreamKey, ssn: Ssn, max_size: usize) -> Vec<Data> {
    let count = message.payload.len().div_ceil(max_size);
    message
        .payload
        .chunks(max_size)
        .enumerate()
        .map(|(i, payload)| Data {
            stream_key,
            ssn,
            ppid: message.ppid,
            payload: payload.to_vec(),
            is_beginning: i == 0,
            is_end: i + 1 == count,
        })
        .collect()
}

/// One SCTP association, from the point where the handshake layer has learned the peer's
/// parameters.
///
/// Incoming packets are fed to [`Association::handle_input`], and everything the association
/// sends goes to the [`WireSink`] it was created with. Once established, background loops send
/// heartbeats and delayed SACKs, retransmit lost data and log statistics, until the association is
/// closed or dropped. All methods take `&self` and may be called from any thread.
pub struct Association {
    inner: Arc<Inner>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl Association {
    /// Creates a new association in [`Phase::Closed`].
    ///
    /// The provided `name` is only used for logging to identify this association.
    pub fn new(
        name: &str,
        options: &Options,
        clock: Arc<dyn Clock>,
        sink: Box<dyn WireSink>,
    ) -> Self {
        let mut rng = rand::rng();
        let local_verification_tag = rng.random_range(MIN_VERIFICATION_TAG..=MAX_VERIFICATION_TAG);
        let local_initial_tsn = Tsn(rng.random());

        let inner = Inner {
            name: name.into(),
            options: options.clone(),
            clock,
            local_verification_tag,
            local_initial_tsn,
            phase: Mutex::new(Phase::Closed),
            rx: Mutex::new(ReceiveBuffer::new(
                options.max_receiver_window_buffer_size,
                options.max_receive_buffer_fragments,
            )),
            tx: Mutex::new(SendBuffer::new(options.max_send_buffer_size, options.max_burst)),
            control: Mutex::new(Control {
                peer_verification_tag: 0,
                next_ssn: HashMap::new(),
                rto: RetransmissionTimeout::new(options),
                heartbeat_counter: 0,
                tx_error_count: 0,
                data_packets_since_sack: 0,
                sack_owed: false,
                shutdown_resend_at: None,
                events: VecDeque::new(),
                messages: VecDeque::new(),
                metrics: Metrics::default(),
            }),
            wire: Mutex::new(sink),
            scheduler: RetransmissionScheduler::new(options.rto_initial, options.rto_max),
            loops_stopped: Mutex::new(false),
            loops_wakeup: Condvar::new(),
        };
        Self { inner: Arc::new(inner), supervisor: Mutex::new(None) }
    }

    /// The parameters the handshake layer announces to the peer.
    pub fn local_parameters(&self) -> PeerParameters {
        PeerParameters {
            verification_tag: self.inner.local_verification_tag,
            initial_tsn: self.inner.local_initial_tsn.0,
            a_rwnd: u32::try_from(self.inner.options.max_receiver_window_buffer_size)
                .unwrap_or(u32::MAX),
        }
    }

    /// Moves to [`Phase::Established`] using what the handshake learned about the peer, and starts
    /// the background loops.
    pub fn establish(&self, peer: PeerParameters) -> Result<(), IllegalTransition> {
        let inner = &self.inner;
        let options = &inner.options;
        inner.transition(Transition::Establish)?;
        {
            // Nothing of an earlier association carries over, except unread messages.
            let mut control = lock(&inner.control);
            control.peer_verification_tag = peer.verification_tag;
            control.next_ssn.clear();
            control.rto = RetransmissionTimeout::new(options);
            control.tx_error_count = 0;
            control.data_packets_since_sack = 0;
            control.sack_owed = false;
            control.shutdown_resend_at = None;
        }
        {
            let mut rx = lock(&inner.rx);
            rx.reset();
            rx.set_initial_tsn(Tsn(peer.initial_tsn));
        }
        {
            let mut tx = lock(&inner.tx);
            *tx = SendBuffer::new(options.max_send_buffer_size, options.max_burst);
            tx.initialize_remote(peer.a_rwnd, inner.local_initial_tsn);
        }
        inner.scheduler.set_interval(options.rto_initial);
        inner.emit(AssociationEvent::Established);

        let mut supervisor = lock(&self.supervisor);
        if let Some(previous) = supervisor.take() {
            previous.join();
        }
        *lock(&inner.loops_stopped) = false;
        *supervisor = Some(Supervisor::start(inner));
        Ok(())
    }

    /// Processes one packet received from the peer and returns the packets to send in response,
    /// without writing them.
    pub fn handle_inbound(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.inner.handle_inbound(bytes)
    }

    /// Processes one packet received from the peer, and writes the response to the wire.
    pub fn handle_input(&self, bytes: &[u8]) {
        let packets = self.inner.handle_inbound(bytes);
        self.inner.write_packets(packets);
    }

    /// Sends a message, fragmented as necessary.
    ///
    /// The message is buffered until acknowledged by the peer, and whatever the peer's receiver
    /// window allows is sent right away.
    pub fn send(&self, message: Message, send_options: &SendOptions) -> Result<(), SendError> {
        let inner = &self.inner;
        let data = inner.queue_message(message, send_options)?;

        let mut out = Outbound::default();
        if !data.is_empty() {
            inner.scheduler.start();
            if lock(&inner.control).sack_owed {
                inner.add_sack(&mut out);
            }
        }
        out.push_data(data);
        inner.send_chunks(out);
        Ok(())
    }

    /// Starts a graceful shutdown. SHUTDOWN is sent once all buffered data has been acknowledged.
    pub fn shutdown(&self) -> Result<(), IllegalTransition> {
        let inner = &self.inner;
        inner.transition(Transition::RequestShutdown)?;
        let mut out = Outbound::default();
        inner.maybe_progress_shutdown(inner.now(), &mut out)?;
        inner.send_chunks(out);
        Ok(())
    }

    /// Closes the association immediately, telling the peer why.
    pub fn abort(&self, reason: &str) {
        let inner = &self.inner;
        if inner.phase() != Phase::Closed {
            let mut out = Outbound::default();
            out.push(Chunk::Abort(AbortChunk {
                tag_reflected: false,
                error_causes: vec![ErrorCause::UserInitiatedAbort(reason.into())],
            }));
            inner.send_chunks(out);
            inner.abort_phase();
            inner.close(AssociationEvent::Closed);
        }
        self.join_loops();
    }

    fn join_loops(&self) {
        self.inner.stop_loops();
        if let Some(supervisor) = lock(&self.supervisor).take() {
            supervisor.join();
        }
    }

    pub fn poll_event(&self) -> Option<AssociationEvent> {
        lock(&self.inner.control).events.pop_front()
    }

    /// Returns the next received message, in delivery order. Its space in the receive buffer is
    /// released, and the larger window is announced with the next SACK.
    pub fn get_next_message(&self) -> Option<Deliverable> {
        let message = lock(&self.inner.control).messages.pop_front()?;
        lock(&self.inner.rx).release_read_bytes(message.payload.len());
        Some(message)
    }

    pub fn messages_ready_count(&self) -> usize {
        lock(&self.inner.control).messages.len()
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase()
    }

    pub fn metrics(&self) -> Metrics {
        let inner = &self.inner;
        let mut metrics = {
            let control = lock(&inner.control);
            Metrics { srtt: control.rto.srtt(), ..control.metrics.clone() }
        };
        {
            let tx = lock(&inner.tx);
            metrics.unack_data_count = tx.unacked_count();
            metrics.peer_rwnd_bytes = tx.peer_rwnd();
        }
        {
            let rx = lock(&inner.rx);
            metrics.received_bytes = rx.received_bytes();
            metrics.delivered_bytes = rx.delivered_bytes();
        }
        metrics
    }
}

impl Drop for Association {
    fn drop(&mut self) {
        self.inner.scheduler.stop();
        self.join_loops();
    }
}
