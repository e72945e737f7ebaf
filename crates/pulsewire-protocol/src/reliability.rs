//! Per-peer reliability, RTT and congestion state.

use std::time::{Duration, Instant};

use pulsewire_core::{
    config::Config,
    constants::ACK_WINDOW_SIZE,
    error::{ErrorKind, Result},
};

use crate::{
    header::ReliabilitySegment,
    sequence::{sequence_greater_than, sequence_less_than},
};

/// Reliability state machine for a single peer.
///
/// Tracks sequencing in both directions, the 32-packet acknowledgment windows,
/// round-trip time, congestion and liveness. Owned exclusively by one
/// `Connection` and only ever touched from the I/O worker thread, so it needs
/// no internal locking.
///
/// Bit `i` of an ack field refers to the sequence number `i` steps behind the
/// window's newest one; the meaning of every bit shifts whenever the window
/// advances.
#[derive(Debug, Clone)]
pub struct ReliabilityContext {
    /// Sequence number of the next packet we send (wrapping).
    local_sequence: u16,
    /// Highest sequence number observed from the peer.
    remote_sequence: u16,
    /// Which of our last 32 sent packets the peer has acknowledged; bit 0 is
    /// `local_sequence - 1`.
    local_ack_field: u32,
    /// Which of the peer's last 32 packets we have received; bit 0 is
    /// `remote_sequence` itself.
    remote_ack_field: u32,
    /// Send time of each of the last 32 local sequence numbers, indexed by
    /// `sequence % 32`.
    send_timepoints: [Instant; ACK_WINDOW_SIZE as usize],
    average_rtt: Duration,
    rtt_smoothing_factor: f32,
    congestion_rtt_threshold: Duration,
    congestion_recovery_duration: Duration,
    is_congested: bool,
    time_not_congested: Duration,
    time_since_last_packet: Duration,
}

impl ReliabilityContext {
    /// Creates a fresh context with all counters zeroed.
    ///
    /// The ack fields start as "everything acknowledged except slot 0": the
    /// local field all-ones so no phantom losses are detected before 32 real
    /// sends, the remote field all-ones except bit 0 so the peer's first
    /// packet (sequence 0, equal to the initial `remote_sequence`) is accepted
    /// once and duplicates of it are rejected.
    pub fn new(config: &Config, now: Instant) -> Self {
        Self {
            local_sequence: 0,
            remote_sequence: 0,
            local_ack_field: u32::MAX,
            remote_ack_field: u32::MAX ^ 1,
            send_timepoints: [now; ACK_WINDOW_SIZE as usize],
            average_rtt: Duration::ZERO,
            rtt_smoothing_factor: config.rtt_smoothing_factor,
            congestion_rtt_threshold: config.congestion_rtt_threshold,
            congestion_recovery_duration: config.congestion_recovery_duration,
            is_congested: false,
            time_not_congested: Duration::ZERO,
            time_since_last_packet: Duration::ZERO,
        }
    }

    /// Produces the reliability segment for one outbound packet and advances
    /// local send state.
    ///
    /// If the packet falling out of the 32-slot window was never acknowledged
    /// it is treated as lost; its round-trip sample (send time to now) is
    /// still folded into the average, so losses inform timing instead of
    /// silently vanishing.
    pub fn write_segment(&mut self, now: Instant) -> ReliabilitySegment {
        let sequence = self.local_sequence;
        let slot = (sequence % ACK_WINDOW_SIZE) as usize;

        if self.local_ack_field & (1 << 31) == 0 {
            let sample = now.saturating_duration_since(self.send_timepoints[slot]);
            self.fold_rtt_sample(sample);
        }

        self.send_timepoints[slot] = now;
        self.local_sequence = self.local_sequence.wrapping_add(1);
        self.local_ack_field <<= 1;

        ReliabilitySegment {
            sequence,
            ack: self.remote_sequence,
            ack_bitfield: self.remote_ack_field,
        }
    }

    /// Applies one inbound reliability segment.
    ///
    /// Runs receive-window bookkeeping, then acknowledgment processing, and
    /// refreshes liveness only if both succeed. On failure no state has
    /// changed beyond what a legitimate retransmission would cause; the caller
    /// must drop the packet and must not treat it as a keep-alive refresh.
    pub fn process_segment(&mut self, segment: &ReliabilitySegment, now: Instant) -> Result<()> {
        self.process_received_sequence(segment.sequence)?;
        self.process_received_ack(segment.ack, segment.ack_bitfield, now)?;
        self.time_since_last_packet = Duration::ZERO;
        Ok(())
    }

    fn process_received_sequence(&mut self, seq: u16) -> Result<()> {
        if sequence_greater_than(seq, self.remote_sequence) {
            let distance = seq.wrapping_sub(self.remote_sequence);
            if u32::from(distance) > 31 {
                // The gap exceeds the window: every old bit would refer to a
                // sequence number outside the new window, so no history is
                // retained. Bit 0 records receipt of this packet.
                self.remote_ack_field = 1;
            } else {
                self.remote_ack_field = (self.remote_ack_field << distance) | 1;
            }
            self.remote_sequence = seq;
            Ok(())
        } else {
            let distance = self.remote_sequence.wrapping_sub(seq);
            if u32::from(distance) > 31 {
                return Err(ErrorKind::StaleOrDuplicateSequence);
            }
            let mask = 1u32 << distance;
            if self.remote_ack_field & mask != 0 {
                return Err(ErrorKind::StaleOrDuplicateSequence);
            }
            self.remote_ack_field |= mask;
            Ok(())
        }
    }

    /// Applies the peer's acknowledgment data.
    ///
    /// Returns the bitmask of sequence numbers newly revealed as acknowledged;
    /// a valid ack that reveals nothing new is a successful no-op, not a
    /// failure. Rejects acks for sequence numbers we never sent, or further
    /// than the window behind our send counter.
    fn process_received_ack(&mut self, ack: u16, ack_bits: u32, now: Instant) -> Result<u32> {
        // `local_sequence` is the next unsent number; a legitimate ack is
        // strictly older than it.
        if !sequence_less_than(ack, self.local_sequence) {
            return Err(ErrorKind::InvalidAck);
        }
        let distance = self.local_sequence.wrapping_sub(ack);
        if distance > ACK_WINDOW_SIZE {
            return Err(ErrorKind::InvalidAck);
        }

        // Incoming bit 0 refers to `ack`; our bit 0 refers to
        // `local_sequence - 1`. Shifting left by distance - 1 aligns them.
        let shifted = ack_bits << (distance - 1);
        let newly_acked = !self.local_ack_field & shifted;

        for bit in 0..u32::from(ACK_WINDOW_SIZE) {
            if newly_acked & (1 << bit) != 0 {
                let seq = self.local_sequence.wrapping_sub(1).wrapping_sub(bit as u16);
                let slot = (seq % ACK_WINDOW_SIZE) as usize;
                let sample = now.saturating_duration_since(self.send_timepoints[slot]);
                self.fold_rtt_sample(sample);
            }
        }

        self.local_ack_field |= shifted;
        Ok(newly_acked)
    }

    fn fold_rtt_sample(&mut self, sample: Duration) {
        let alpha = self.rtt_smoothing_factor;
        let smoothed =
            (1.0 - alpha) * self.average_rtt.as_secs_f32() + alpha * sample.as_secs_f32();
        self.average_rtt = Duration::from_secs_f32(smoothed);
    }

    /// Ages the connection by one tick.
    ///
    /// Accumulates idle time for timeout detection and runs the congestion
    /// hysteresis: crossing the RTT threshold raises the flag immediately,
    /// while clearing it requires the average to stay below threshold for the
    /// full recovery duration.
    pub fn advance(&mut self, dt: Duration) {
        self.time_since_last_packet += dt;

        if self.average_rtt > self.congestion_rtt_threshold {
            self.is_congested = true;
            self.time_not_congested = Duration::ZERO;
        } else if self.is_congested {
            self.time_not_congested += dt;
            if self.time_not_congested >= self.congestion_recovery_duration {
                self.is_congested = false;
            }
        }
    }

    /// Resets the idle clock; used when liveness is proven by a management
    /// packet that carries no reliability segment.
    pub fn refresh_liveness(&mut self) {
        self.time_since_last_packet = Duration::ZERO;
    }

    /// True when the peer has been silent longer than `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.time_since_last_packet > timeout
    }

    /// Current smoothed round-trip estimate.
    pub fn average_rtt(&self) -> Duration {
        self.average_rtt
    }

    /// Whether the connection is currently flagged as congested.
    pub fn is_congested(&self) -> bool {
        self.is_congested
    }

    /// Sequence number the next outbound packet will carry.
    pub fn local_sequence(&self) -> u16 {
        self.local_sequence
    }

    /// Highest sequence number observed from the peer.
    pub fn remote_sequence(&self) -> u16 {
        self.remote_sequence
    }

    /// Time since the last valid packet from the peer.
    pub fn time_since_last_packet(&self) -> Duration {
        self.time_since_last_packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(now: Instant) -> ReliabilityContext {
        ReliabilityContext::new(&Config::default(), now)
    }

    #[test]
    fn write_segment_advances_sequence_and_echoes_remote_state() {
        let now = Instant::now();
        let mut ctx = context(now);

        let first = ctx.write_segment(now);
        let second = ctx.write_segment(now);
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(ctx.local_sequence(), 2);
        assert_eq!(second.ack, ctx.remote_sequence());
        assert_eq!(second.ack_bitfield, ctx.remote_ack_field);
    }

    #[test]
    fn first_packet_from_peer_is_accepted_once() {
        let now = Instant::now();
        let mut ctx = context(now);
        // Seed our send state so the peer's ack is plausible.
        ctx.write_segment(now);

        let segment = ReliabilitySegment { sequence: 0, ack: 0, ack_bitfield: 1 };
        assert!(ctx.process_segment(&segment, now).is_ok());
        // The identical retransmission is a duplicate.
        assert!(matches!(
            ctx.process_segment(&segment, now),
            Err(ErrorKind::StaleOrDuplicateSequence)
        ));
    }

    #[test]
    fn duplicate_delivery_does_not_resample_rtt() {
        let start = Instant::now();
        let mut ctx = context(start);
        ctx.write_segment(start);

        let later = start + Duration::from_millis(80);
        let segment = ReliabilitySegment { sequence: 0, ack: 0, ack_bitfield: 1 };
        ctx.process_segment(&segment, later).unwrap();
        let rtt_after_first = ctx.average_rtt();
        assert!(rtt_after_first > Duration::ZERO);

        let much_later = later + Duration::from_millis(500);
        assert!(ctx.process_segment(&segment, much_later).is_err());
        assert_eq!(ctx.average_rtt(), rtt_after_first);
    }

    #[test]
    fn receive_window_overrun_clears_history() {
        let now = Instant::now();
        let mut ctx = context(now);
        ctx.write_segment(now);

        let near = ReliabilitySegment { sequence: 3, ack: 0, ack_bitfield: 1 };
        ctx.process_segment(&near, now).unwrap();
        assert_ne!(ctx.remote_ack_field & !1, 0);

        // A jump past the 32-slot window wipes every old receipt bit.
        let far = ReliabilitySegment { sequence: 200, ack: 0, ack_bitfield: 1 };
        ctx.process_segment(&far, now).unwrap();
        assert_eq!(ctx.remote_sequence(), 200);
        assert_eq!(ctx.remote_ack_field, 1);
    }

    #[test]
    fn in_window_gap_shifts_history() {
        let now = Instant::now();
        let mut ctx = context(now);
        ctx.write_segment(now);

        ctx.process_segment(&ReliabilitySegment { sequence: 0, ack: 0, ack_bitfield: 1 }, now)
            .unwrap();
        ctx.process_segment(&ReliabilitySegment { sequence: 5, ack: 0, ack_bitfield: 1 }, now)
            .unwrap();
        // Bit 0 for sequence 5, bit 5 for sequence 0.
        assert_eq!(ctx.remote_ack_field & 0b10_0001, 0b10_0001);

        // Late arrival of sequence 2 fills bit 3 without moving the window.
        ctx.process_segment(&ReliabilitySegment { sequence: 2, ack: 0, ack_bitfield: 1 }, now)
            .unwrap();
        assert_eq!(ctx.remote_sequence(), 5);
        assert_ne!(ctx.remote_ack_field & 0b1000, 0);
    }

    #[test]
    fn ack_of_unsent_sequence_is_rejected() {
        let now = Instant::now();
        let mut ctx = context(now);
        ctx.write_segment(now); // local_sequence becomes 1

        // Acking the next unsent sequence number is invalid.
        let err = ctx
            .process_segment(&ReliabilitySegment { sequence: 0, ack: 1, ack_bitfield: 0 }, now)
            .unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidAck));

        // So is an ack further than the window behind the send counter.
        let err = ctx
            .process_segment(
                &ReliabilitySegment { sequence: 1, ack: 65500, ack_bitfield: 0 },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidAck));
    }

    #[test]
    fn rejected_segment_does_not_refresh_liveness() {
        let now = Instant::now();
        let mut ctx = context(now);
        ctx.write_segment(now);
        ctx.advance(Duration::from_secs(4));

        let bad_ack = ReliabilitySegment { sequence: 0, ack: 30_000, ack_bitfield: 0 };
        assert!(ctx.process_segment(&bad_ack, now).is_err());
        assert_eq!(ctx.time_since_last_packet(), Duration::from_secs(4));
    }

    #[test]
    fn ack_folds_round_trip_sample() {
        let start = Instant::now();
        let mut ctx = context(start);
        ctx.write_segment(start);

        let later = start + Duration::from_millis(100);
        ctx.process_segment(&ReliabilitySegment { sequence: 0, ack: 0, ack_bitfield: 1 }, later)
            .unwrap();

        // One 100ms sample smoothed into a zero average with alpha 0.1.
        let rtt = ctx.average_rtt();
        assert!(rtt > Duration::from_millis(5) && rtt < Duration::from_millis(100));
    }

    #[test]
    fn empty_progress_ack_is_a_no_op_not_an_error() {
        let now = Instant::now();
        let mut ctx = context(now);
        ctx.write_segment(now);

        let segment = ReliabilitySegment { sequence: 0, ack: 0, ack_bitfield: 1 };
        ctx.process_segment(&segment, now).unwrap();
        let rtt = ctx.average_rtt();

        // A later packet repeating the same ack data is valid; it just
        // reveals no new acknowledgments.
        let repeat = ReliabilitySegment { sequence: 1, ack: 0, ack_bitfield: 1 };
        ctx.process_segment(&repeat, now + Duration::from_secs(1)).unwrap();
        assert_eq!(ctx.average_rtt(), rtt);
    }

    #[test]
    fn unacked_packet_evicted_from_window_counts_as_loss_sample() {
        let start = Instant::now();
        let mut ctx = context(start);

        // Fill the whole window without any acknowledgment coming back.
        for _ in 0..32 {
            ctx.write_segment(start);
        }
        assert_eq!(ctx.average_rtt(), Duration::ZERO);

        // Sending one more evicts sequence 0 unacknowledged; its age becomes
        // an RTT sample.
        let later = start + Duration::from_millis(300);
        ctx.write_segment(later);
        let rtt = ctx.average_rtt();
        assert!(rtt > Duration::from_millis(20) && rtt <= Duration::from_millis(300));
    }

    #[test]
    fn congestion_sets_immediately_and_clears_after_recovery() {
        let now = Instant::now();
        let mut ctx = context(now);

        ctx.average_rtt = Duration::from_millis(300);
        ctx.advance(Duration::from_millis(16));
        assert!(ctx.is_congested());

        // Dropping below threshold does not clear the flag right away.
        ctx.average_rtt = Duration::from_millis(100);
        ctx.advance(Duration::from_secs(9));
        assert!(ctx.is_congested());

        // After the full recovery duration below threshold it clears.
        ctx.advance(Duration::from_secs(2));
        assert!(!ctx.is_congested());
    }

    #[test]
    fn congestion_relapse_restarts_recovery() {
        let now = Instant::now();
        let mut ctx = context(now);

        ctx.average_rtt = Duration::from_millis(300);
        ctx.advance(Duration::from_millis(16));
        ctx.average_rtt = Duration::from_millis(100);
        ctx.advance(Duration::from_secs(8));

        // RTT spikes again: the not-congested clock restarts.
        ctx.average_rtt = Duration::from_millis(400);
        ctx.advance(Duration::from_millis(16));
        ctx.average_rtt = Duration::from_millis(100);
        ctx.advance(Duration::from_secs(8));
        assert!(ctx.is_congested());
        ctx.advance(Duration::from_secs(3));
        assert!(!ctx.is_congested());
    }

    #[test]
    fn idle_time_accumulates_until_timeout() {
        let now = Instant::now();
        let mut ctx = context(now);
        let timeout = Duration::from_secs(10);

        ctx.advance(Duration::from_secs(9));
        assert!(!ctx.is_timed_out(timeout));
        ctx.advance(Duration::from_secs(2));
        assert!(ctx.is_timed_out(timeout));

        ctx.refresh_liveness();
        assert!(!ctx.is_timed_out(timeout));
    }

    #[test]
    fn sequence_wraps_through_the_boundary() {
        let now = Instant::now();
        let mut ctx = context(now);
        ctx.local_sequence = 65535;

        let segment = ctx.write_segment(now);
        assert_eq!(segment.sequence, 65535);
        assert_eq!(ctx.local_sequence(), 0);

        // The peer acking 65535 after the wrap is one step behind.
        ctx.process_segment(
            &ReliabilitySegment { sequence: 0, ack: 65535, ack_bitfield: 1 },
            now,
        )
        .unwrap();
        assert_ne!(ctx.local_ack_field & 1, 0);
    }
}
