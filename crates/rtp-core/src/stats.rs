//! RFC 3550 receiver statistics
//!
//! Tracks packet counts, sequence-gap loss and the interarrival jitter
//! estimate for one channel. Loss accounting is purely gap-based: a packet
//! arriving out of order is not credited back (reordering correction happens
//! upstream in the jitter buffer).

use std::time::Instant;

use crate::RtpSequenceNumber;

/// Quality snapshot surfaced to monitoring collaborators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySnapshot {
    pub jitter_ms: f32,
    pub packet_loss_percent: f32,
    pub packets_received: u64,
}

/// Receiver-side statistics for one RTP channel
#[derive(Debug, Clone)]
pub struct RtpStats {
    clock_rate: u32,
    packets_received: u64,
    packets_lost: u64,
    /// Smoothed interarrival jitter in RTP timestamp units
    jitter_units: f64,
    last_sequence: RtpSequenceNumber,
    last_timestamp: u32,
    last_arrival: Option<Instant>,
}

impl RtpStats {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate,
            packets_received: 0,
            packets_lost: 0,
            jitter_units: 0.0,
            last_sequence: 0,
            last_timestamp: 0,
            last_arrival: None,
        }
    }

    /// Fold one received packet into the counters
    ///
    /// Jitter per RFC 3550 6.4.1: D is the timestamp delta in RTP units, the
    /// arrival delta is converted to RTP units via the clock rate, and the
    /// absolute difference is smoothed with gain 1/16.
    pub fn record_received(
        &mut self,
        sequence: RtpSequenceNumber,
        timestamp: u32,
        arrival: Instant,
    ) {
        self.packets_received += 1;

        if let Some(last_arrival) = self.last_arrival {
            // sequence gap -> lost packets; 16-bit wraparound is not credited
            if u32::from(sequence) > u32::from(self.last_sequence) + 1 {
                let lost = u32::from(sequence) - u32::from(self.last_sequence) - 1;
                self.packets_lost += u64::from(lost);
            }

            let transit_units = timestamp.wrapping_sub(self.last_timestamp) as i32 as f64;
            let arrival_units =
                arrival.duration_since(last_arrival).as_secs_f64() * f64::from(self.clock_rate);
            let variation = (arrival_units - transit_units).abs();
            self.jitter_units += (variation - self.jitter_units) / 16.0;
        }

        self.last_sequence = sequence;
        self.last_timestamp = timestamp;
        self.last_arrival = Some(arrival);
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn packets_lost(&self) -> u64 {
        self.packets_lost
    }

    /// Raw jitter estimate in RTP timestamp units
    pub fn jitter_units(&self) -> f64 {
        if self.packets_received < 2 {
            return 0.0;
        }
        self.jitter_units
    }

    /// Jitter in milliseconds; 0 until at least two packets were seen
    pub fn jitter_ms(&self) -> f32 {
        if self.packets_received < 2 || self.clock_rate == 0 {
            return 0.0;
        }
        (self.jitter_units / f64::from(self.clock_rate / 1000)) as f32
    }

    /// Loss as a percentage of expected packets; 0 until two packets were seen
    pub fn packet_loss_percent(&self) -> f32 {
        if self.packets_received < 2 {
            return 0.0;
        }
        let expected = self.packets_received + self.packets_lost;
        (self.packets_lost as f32 / expected as f32) * 100.0
    }

    pub fn quality(&self) -> QualitySnapshot {
        QualitySnapshot {
            jitter_ms: self.jitter_ms(),
            packet_loss_percent: self.packet_loss_percent(),
            packets_received: self.packets_received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn feed(stats: &mut RtpStats, packets: &[(u16, u32, u64)]) {
        let base = Instant::now();
        for (seq, ts, arrival_ms) in packets {
            stats.record_received(*seq, *ts, base + Duration::from_millis(*arrival_ms));
        }
    }

    #[test]
    fn fresh_stats_report_zero() {
        let stats = RtpStats::new(8000);
        assert_eq!(stats.jitter_ms(), 0.0);
        assert_eq!(stats.packet_loss_percent(), 0.0);
    }

    #[test]
    fn single_packet_reports_zero() {
        let mut stats = RtpStats::new(8000);
        stats.record_received(1, 160, Instant::now());
        assert_eq!(stats.jitter_ms(), 0.0);
        assert_eq!(stats.packet_loss_percent(), 0.0);
    }

    #[test]
    fn constant_spacing_keeps_jitter_at_zero() {
        // 20 ms wall clock per 160 timestamp units: zero variation throughout
        let mut stats = RtpStats::new(8000);
        let packets: Vec<(u16, u32, u64)> = (0..50)
            .map(|i| (i as u16 + 1, (i + 1) * 160, (i as u64 + 1) * 20))
            .collect();
        feed(&mut stats, &packets);
        assert!(stats.jitter_ms() < 0.01);
        assert_eq!(stats.packets_lost(), 0);
    }

    #[test]
    fn jitter_decays_after_a_disturbance() {
        let mut stats = RtpStats::new(8000);
        // one packet arrives 10 ms late, then spacing returns to constant
        feed(&mut stats, &[(1, 160, 20), (2, 320, 40), (3, 480, 70)]);
        let disturbed = stats.jitter_units();
        assert!(disturbed > 0.0);

        let packets: Vec<(u16, u32, u64)> = (4..40)
            .map(|i| (i as u16, i * 160, 30 + u64::from(i) * 20))
            .collect();
        feed(&mut stats, &packets);
        assert!(stats.jitter_units() < disturbed);
        assert!(stats.jitter_units() >= 0.0);
    }

    #[test]
    fn loss_counter_equals_injected_gaps() {
        let mut stats = RtpStats::new(8000);
        // gaps: 2 missing after seq 1, 3 missing after seq 4
        feed(
            &mut stats,
            &[(1, 160, 20), (4, 640, 80), (8, 1280, 160)],
        );
        assert_eq!(stats.packets_lost(), 2 + 3);
        assert_eq!(stats.packets_received(), 3);
    }

    #[test]
    fn reordered_packet_adds_no_loss() {
        let mut stats = RtpStats::new(8000);
        feed(&mut stats, &[(2, 320, 20), (1, 160, 40), (3, 480, 60)]);
        // 1 arrived after 2: the layer does not compensate, but 3 follows 1
        // with a gap of one, so exactly that gap is counted
        assert_eq!(stats.packets_lost(), 1);
    }

    #[test]
    fn loss_percent_matches_gap_share() {
        let mut stats = RtpStats::new(8000);
        // every other packet missing: 5 received, 4 gaps
        feed(
            &mut stats,
            &[
                (1, 160, 20),
                (3, 480, 60),
                (5, 800, 100),
                (7, 1120, 140),
                (9, 1440, 180),
            ],
        );
        assert_eq!(stats.packets_lost(), 4);
        let expected = 4.0 / 9.0 * 100.0;
        assert!((stats.packet_loss_percent() - expected).abs() < 0.01);
    }
}
