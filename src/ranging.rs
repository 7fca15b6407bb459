//! Turning a session's timestamps into distances
//!
//! At the end of every session the tag hands everything it collected to a
//! [`RangeComputation`]. Applications can plug in their own method, or use
//! [`compute_ranges`], which is also what [`RangeLog`] does.
//!
//! [`compute_ranges`] uses single-sided two-way ranging with clock drift
//! compensation. For each poll `m` an anchor heard, the tag knows when it sent
//! the poll (`T_m`) and when the anchor's final message arrived (`T_f`), and
//! the anchor reports when it received the poll (`A_m`) and when it sent its
//! final message (`A_f`). That gives a round trip measured by the tag and a
//! reply time measured by the anchor:
//!
//! ``` text
//! 2 * tof = (T_f - T_m) - (A_f - A_m) * k
//! ```
//!
//! `k` converts anchor time into tag time. Since the polls went out at known
//! times, the first and last poll the anchor heard give `k` directly:
//! `k = (T_j - T_i) / (A_j - A_i)`. Each heard poll yields one estimate, and
//! the median of those is used.

use core::convert::TryFrom;

use heapless::Vec;

use crate::{
    configs::{MAX_ANCHOR_RESPONSES, MAX_BROADCASTS},
    mac,
    store::{AnchorResponseRecord, SessionData},
    time::{Instant, TIME_MAX},
};

/// Largest clock drift between tag and anchor that is accepted, in parts per
/// million
pub const MAX_CLOCK_DRIFT_PPM: u64 = 1_000;

/// Invoked once at the end of each ranging session
///
/// Runs in the same context as the event that ended the session, so it must
/// not block.
pub trait RangeComputation {
    /// Computes ranges from the data of a completed session
    fn compute(&mut self, session: &SessionData);
}

impl<F> RangeComputation for F
where
    F: FnMut(&SessionData),
{
    fn compute(&mut self, session: &SessionData) {
        self(session)
    }
}

/// The range to one anchor
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnchorRange {
    /// The anchor's extended address
    pub anchor: mac::ExtendedAddress,
    /// The distance to the anchor in millimeters, or why there is none
    pub distance_mm: Result<u64, ComputeDistanceError>,
}

/// Returned from [`compute_distance_mm`] in case of an error
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ComputeDistanceError {
    /// The anchor heard less than two polls, so its clock can't be related to
    /// the tag's
    NotEnoughTimestamps,

    /// The clock ratio between tag and anchor is zero or implausibly far from
    /// one
    ClockRatioInvalid,

    /// No poll yielded a positive time of flight
    NegativeTimeOfFlight,

    /// The time of flight is so large, the distance calculation would overflow
    TimeOfFlightTooLarge,
}

/// Computes the range to every anchor that responded during a session
pub fn compute_ranges(session: &SessionData) -> Vec<AnchorRange, MAX_ANCHOR_RESPONSES> {
    session
        .responses
        .iter()
        .map(|record| AnchorRange {
            anchor: record.anchor,
            distance_mm: compute_distance_mm(session, record),
        })
        .collect()
}

/// Computes the distance to a single anchor
pub fn compute_distance_mm(
    session: &SessionData,
    record: &AnchorResponseRecord,
) -> Result<u64, ComputeDistanceError> {
    // Pairs of (tag send time, anchor arrival time) for every poll the anchor
    // heard and the tag has a send time for.
    let mut heard: Vec<(Instant, Instant), MAX_BROADCASTS> = Vec::new();
    for (subsequence, &toa) in record.toas.iter().enumerate() {
        if toa == 0 {
            continue;
        }
        if let Some(sent) = session.send_times.get(subsequence) {
            // Both have the same capacity, so this can't fail.
            let _ = heard.push((sent, anchor_instant(toa)));
        }
    }

    let (first, last) = match (heard.first(), heard.last()) {
        (Some(first), Some(last)) if heard.len() >= 2 => (*first, *last),
        _ => return Err(ComputeDistanceError::NotEnoughTimestamps),
    };

    let tag_span = last.0.duration_since(first.0).value() as i128;
    let anchor_span = last.1.duration_since(first.1).value() as i128;
    if anchor_span == 0 {
        return Err(ComputeDistanceError::ClockRatioInvalid);
    }
    let drift = (tag_span - anchor_span).abs() as u128;
    if drift * 1_000_000 > anchor_span as u128 * MAX_CLOCK_DRIFT_PPM as u128 {
        return Err(ComputeDistanceError::ClockRatioInvalid);
    }

    let mut double_tofs: Vec<i128, MAX_BROADCASTS> = Vec::new();
    for &(sent, received) in &heard {
        let round_trip = record.final_rx_time.duration_since(sent).value() as i128;
        let reply = record.final_tx_time.duration_since(received).value() as i128;

        let double_tof = (round_trip * anchor_span - reply * tag_span) / anchor_span;
        if double_tof >= 0 {
            let _ = double_tofs.push(double_tof);
        }
    }

    if double_tofs.is_empty() {
        return Err(ComputeDistanceError::NegativeTimeOfFlight);
    }
    double_tofs.sort_unstable();
    let time_of_flight = double_tofs[double_tofs.len() / 2] / 2;

    // Nominally, all time units are based on a 64 Ghz clock, meaning each time
    // unit is 1/64 ns.

    const SPEED_OF_LIGHT: u64 = 299_792_458; // m/s or nm/ns

    let time_of_flight =
        u64::try_from(time_of_flight).map_err(|_| ComputeDistanceError::TimeOfFlightTooLarge)?;
    let distance_nm_times_64 = SPEED_OF_LIGHT
        .checked_mul(time_of_flight)
        .ok_or(ComputeDistanceError::TimeOfFlightTooLarge)?;

    Ok((distance_nm_times_64 / 64) / 1_000_000)
}

fn anchor_instant(toa: u64) -> Instant {
    // Anchors report 40-bit timestamps. Anything above is dropped, the way the
    // hardware clock wraps.
    Instant::new(toa & TIME_MAX).unwrap_or_default()
}

/// Keeps the ranges computed at the end of the last session
#[derive(Clone, Debug, Default)]
pub struct RangeLog {
    ranges: Vec<AnchorRange, MAX_ANCHOR_RESPONSES>,
    sessions: u32,
}

impl RangeLog {
    /// Creates an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// The ranges of the last completed session
    pub fn ranges(&self) -> &[AnchorRange] {
        &self.ranges
    }

    /// Number of sessions completed so far
    pub fn sessions(&self) -> u32 {
        self.sessions
    }
}

impl RangeComputation for RangeLog {
    fn compute(&mut self, session: &SessionData) {
        self.ranges = compute_ranges(session);
        self.sessions = self.sessions.wrapping_add(1);

        for range in &self.ranges {
            match range.distance_mm {
                Ok(distance_mm) => {
                    info!("anchor {:x}: {} mm", range.anchor.0, distance_mm);
                }
                Err(error) => {
                    debug!("anchor {:x}: no range ({:?})", range.anchor.0, error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROADCASTS: usize = 4;
    const POLL_PERIOD: u64 = 100_000;
    const ANCHOR_OFFSET: u64 = 5_000_000;
    const ANCHOR_REPLY: u64 = 1_000_000;

    /// 2135 ticks of 1/64 ns are a bit more than 10 meters at the speed of
    /// light
    const TOF: u64 = 2135;

    fn session_with_polls() -> SessionData {
        let mut session = SessionData::new(BROADCASTS, 4);
        for m in 0..BROADCASTS {
            let sent = Instant::new(1_000_000 + m as u64 * POLL_PERIOD).unwrap();
            assert!(session.send_times.record(m, sent));
        }
        session
    }

    fn tag_send_time(session: &SessionData, m: usize) -> u64 {
        session.send_times.get(m).unwrap().value()
    }

    /// An anchor whose clock runs `1 + 1 / drift_divisor` times as fast as the
    /// tag's
    fn record(session: &SessionData, drift_divisor: Option<u64>, heard: &[bool]) -> AnchorResponseRecord {
        let to_anchor = |tag_time: u64| {
            let drift = drift_divisor.map(|d| tag_time / d).unwrap_or(0);
            ANCHOR_OFFSET + tag_time + drift
        };

        let mut toas = Vec::new();
        for m in 0..BROADCASTS {
            let toa = if heard[m] {
                to_anchor(tag_send_time(session, m) + TOF)
            } else {
                0
            };
            toas.push(toa).unwrap();
        }

        // The anchor replies a fixed time after the last poll, in its own
        // clock. In tag time that reply takes slightly less long.
        let last_arrival = tag_send_time(session, BROADCASTS - 1) + TOF;
        let reply_in_tag_time = match drift_divisor {
            Some(d) => ANCHOR_REPLY * d / (d + 1),
            None => ANCHOR_REPLY,
        };
        let final_tx_tag_time = last_arrival + reply_in_tag_time;
        let final_tx = to_anchor(final_tx_tag_time);

        AnchorResponseRecord {
            anchor: mac::ExtendedAddress(0xa1),
            toas,
            final_tx_time: Instant::new(final_tx).unwrap(),
            final_rx_time: Instant::new(final_tx_tag_time + TOF).unwrap(),
        }
    }

    #[test]
    fn distance_without_drift_is_exact() {
        let session = session_with_polls();
        let record = record(&session, None, &[true; BROADCASTS]);

        assert_eq!(compute_distance_mm(&session, &record), Ok(10_000));
    }

    #[test]
    fn clock_drift_is_compensated() {
        let session = session_with_polls();
        let record = record(&session, Some(100_000), &[true; BROADCASTS]);

        let distance_mm = compute_distance_mm(&session, &record).unwrap();
        assert!(distance_mm > 9_985 && distance_mm < 10_015, "{}", distance_mm);
    }

    #[test]
    fn missed_polls_are_skipped() {
        let session = session_with_polls();
        let record = record(&session, None, &[false, true, false, true]);

        assert_eq!(compute_distance_mm(&session, &record), Ok(10_000));
    }

    #[test]
    fn single_poll_is_not_enough() {
        let session = session_with_polls();
        let record = record(&session, None, &[false, false, true, false]);

        assert_eq!(
            compute_distance_mm(&session, &record),
            Err(ComputeDistanceError::NotEnoughTimestamps)
        );
    }

    #[test]
    fn implausible_clock_ratio_is_rejected() {
        let session = session_with_polls();
        let mut record = record(&session, None, &[true; BROADCASTS]);
        // Pretend the anchor saw the last poll much later than it did.
        record.toas[BROADCASTS - 1] += POLL_PERIOD;

        assert_eq!(
            compute_distance_mm(&session, &record),
            Err(ComputeDistanceError::ClockRatioInvalid)
        );
    }

    #[test]
    fn range_log_keeps_last_session() {
        let mut session = session_with_polls();
        let record = record(&session, None, &[true; BROADCASTS]);
        session.responses.push(record).unwrap();

        let mut log = RangeLog::new();
        log.compute(&session);

        assert_eq!(log.sessions(), 1);
        assert_eq!(log.ranges().len(), 1);
        assert_eq!(log.ranges()[0].anchor, mac::ExtendedAddress(0xa1));
        assert_eq!(log.ranges()[0].distance_mm, Ok(10_000));
    }
}
