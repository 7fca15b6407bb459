use embedded_hal::timer::{Cancel, CountDown, Periodic};

use crate::{
    codec::POLL_LEN,
    configs::{RadioSettings, TagConfig},
    radio::{Radio, StartTx},
    ranging::RangeComputation,
    time::Instant,
};

use super::{Error, SessionState, Tag};

impl<R, T, C> Tag<R, T, C>
where
    R: Radio,
    T: CountDown + Periodic + Cancel,
    T::Time: From<u32>,
    C: RangeComputation,
{
    /// Sends the next poll of the session
    ///
    /// A poll that fails is skipped, except the last one. Without it, the
    /// radio never confirms a transmission and listening never starts, so the
    /// session is abandoned instead.
    pub(super) fn broadcast_tick(&mut self) -> Result<(), Error<R::Error>> {
        let last = self.subsequence + 1 >= self.config.broadcast_count;

        if last {
            self.stop_timer();
        }

        let result = self.send_poll(last);

        if last {
            match result {
                Ok(()) => self.state = SessionState::AwaitingFinalBroadcastTxDone,
                Err(_) => {
                    warn!("last poll failed, abandoning session");
                    // Report the poll's error, not the cleanup's.
                    if self.abandon_session().is_err() {
                        warn!("radio not forced idle after failed poll");
                    }
                }
            }
        } else if result.is_err() {
            warn!("poll {} failed", self.subsequence);
        }

        self.subsequence += 1;
        result
    }

    fn send_poll(&mut self, last: bool) -> Result<(), Error<R::Error>> {
        let subsequence = self.subsequence;

        self.radio
            .apply_settings(RadioSettings::for_subsequence(subsequence))
            .map_err(Error::Radio)?;
        // Leave RX mode before transmitting.
        self.radio.force_idle().map_err(Error::Radio)?;

        self.poll.header.seq = self.poll.header.seq.wrapping_add(1);
        self.poll.body.subsequence = subsequence;

        let mut buf = [0; POLL_LEN];
        let len = self.poll.encode(&mut buf)?;

        // The radio ignores the lowest bit of the delayed time, so clear it
        // here too, or the recorded time would be off by 256 ticks.
        let sys_time = self.radio.sys_time().map_err(Error::Radio)?;
        let delayed = sys_time
            .truncated()
            .wrapping_add(TagConfig::packet_delay(len).truncated())
            & !1;
        self.radio.set_delayed_time(delayed).map_err(Error::Radio)?;

        self.radio.write_tx_data(&buf[..len]).map_err(Error::Radio)?;

        if last {
            self.radio
                .set_rx_after_tx_delay(self.config.rx_after_tx_delay_us)
                .map_err(Error::Radio)?;
        }
        self.radio
            .start_tx(StartTx {
                delayed: true,
                response_expected: last,
            })
            .map_err(Error::Radio)?;

        let send_time = Instant::from_truncated(delayed);
        if !self
            .session
            .send_times
            .record(subsequence as usize, send_time)
        {
            warn!("send time of poll {} not recorded", subsequence);
        }

        // The radio doesn't preserve the TX antenna delay across delayed
        // transmissions.
        self.radio
            .set_tx_antenna_delay(self.config.tx_antenna_delay)
            .map_err(Error::Radio)?;

        trace!("poll {} scheduled for {}", subsequence, send_time.value());
        Ok(())
    }
}
