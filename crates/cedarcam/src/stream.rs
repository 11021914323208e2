// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Buffer hand-off between the capture device and the application.
//!
//! Each ring slot is always in exactly one [`SlotState`]. Before streaming
//! starts every slot is queued once; afterwards the application only ever
//! hands back the slot it consumed last, and a single cursor walks the ring
//! in order. Completion is assumed to be FIFO: the device is asked for the
//! cursor slot on every dequeue. A driver that completes out of order is
//! reported with a warning but not compensated for.

use crate::{
    buffer::PhysAddr,
    device::{BufferDesc, CaptureDevice},
    Error,
};

/// Interval between address check log lines.
const CHECK_LOG_INTERVAL: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Owned by the application, not yet handed to the device
    Free,
    /// Owned by the device, waiting to be filled
    Queued,
    /// Filled by the device and handed to the application
    Filled,
}

/// A slot returned by [`StreamController::dequeue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    /// Ring index the controller moved to [`SlotState::Filled`]
    pub slot: usize,
    /// What the driver reported for the completed buffer
    pub desc: BufferDesc,
}

struct AddressCheck {
    expected: Vec<PhysAddr>,
    checks: u64,
}

/// Owns the capture device and the per-slot state of its buffer ring.
pub struct StreamController<D: CaptureDevice> {
    device: D,
    slots: Vec<SlotState>,
    cursor: usize,
    started: bool,
    streaming: bool,
    check: Option<AddressCheck>,
}

impl<D: CaptureDevice> StreamController<D> {
    /// Take over `device` whose ring holds `len` negotiated buffers.
    pub fn new(device: D, len: usize) -> Self {
        StreamController {
            device,
            slots: vec![SlotState::Free; len],
            cursor: 0,
            started: false,
            streaming: false,
            check: None,
        }
    }

    /// Re-translate every buffer after each queue and dequeue and compare it
    /// against the luma address recorded at allocation, in ring order.
    pub fn with_address_check(mut self, expected: Vec<PhysAddr>) -> Self {
        self.check = Some(AddressCheck {
            expected,
            checks: 0,
        });
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).copied()
    }

    /// Slot the next dequeue will complete and the next enqueue must return.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Hand slot `index` to the device.
    pub fn enqueue(&mut self, index: usize) -> Result<(), Error> {
        let state = self
            .state(index)
            .ok_or_else(|| Error::InvalidState(format!("buffer {} outside the ring", index)))?;

        if self.streaming {
            if index != self.cursor || state != SlotState::Filled {
                return Err(Error::InvalidState(format!(
                    "buffer {} is {:?}; only the consumed buffer {} may be re-queued",
                    index, state, self.cursor
                )));
            }
        } else if self.started {
            return Err(Error::InvalidState("stream has been stopped".to_owned()));
        } else if state != SlotState::Free {
            return Err(Error::InvalidState(format!(
                "buffer {} is {:?}, expected Free",
                index, state
            )));
        }

        let desc = self.device.queue_buffer(index as u32)?;
        self.slots[index] = SlotState::Queued;
        self.verify_address(index, &desc)?;

        if self.streaming {
            self.cursor = (self.cursor + 1) % self.slots.len();
        }
        Ok(())
    }

    /// Queue every slot of the ring, in index order.
    pub fn enqueue_all(&mut self) -> Result<(), Error> {
        for index in 0..self.slots.len() {
            self.enqueue(index)?;
        }
        Ok(())
    }

    /// Start streaming. Allowed once, with the whole ring queued.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.started {
            return Err(Error::InvalidState("stream already started".to_owned()));
        }
        if self.slots.is_empty() || self.slots.iter().any(|s| *s != SlotState::Queued) {
            return Err(Error::InvalidState(
                "every buffer must be queued before streaming".to_owned(),
            ));
        }
        self.device.stream_on()?;
        self.started = true;
        self.streaming = true;
        log::debug!("streaming started with {} buffers", self.slots.len());
        Ok(())
    }

    /// Wait for the device to fill the cursor slot.
    pub fn dequeue(&mut self) -> Result<Dequeued, Error> {
        if !self.streaming {
            return Err(Error::InvalidState("dequeue while not streaming".to_owned()));
        }
        let slot = self.cursor;
        if self.slots[slot] != SlotState::Queued {
            return Err(Error::InvalidState(format!(
                "buffer {} is {:?}, expected Queued",
                slot, self.slots[slot]
            )));
        }

        let desc = self.device.dequeue_buffer(slot as u32)?;
        if desc.index as usize != slot {
            log::warn!(
                "driver completed buffer {} while buffer {} was expected",
                desc.index,
                slot
            );
        }
        self.slots[slot] = SlotState::Filled;
        self.verify_address(slot, &desc)?;

        log::trace!(
            "dequeued buffer {} seq {} bytes {} at {:?}",
            slot,
            desc.sequence,
            desc.bytes_used,
            desc.timestamp
        );
        Ok(Dequeued { slot, desc })
    }

    /// Stop streaming and reclaim every slot. Valid in any state.
    pub fn stop(&mut self) -> Result<(), Error> {
        let result = if self.streaming {
            self.device.stream_off()
        } else {
            Ok(())
        };
        self.streaming = false;
        self.slots.fill(SlotState::Free);
        result
    }

    /// Stop if needed and close the device.
    pub fn close(mut self) -> Result<(), Error> {
        self.stop()
    }

    fn verify_address(&mut self, index: usize, desc: &BufferDesc) -> Result<(), Error> {
        let Some(check) = self.check.as_mut() else {
            return Ok(());
        };
        let actual = self.device.translate_address(desc.offset)?;
        let expected = check.expected.get(index).copied().unwrap_or_default();
        check.checks += 1;
        if check.checks % CHECK_LOG_INTERVAL == 0 {
            log::debug!(
                "address check {}: buffer {} at {} (driver {:#010x})",
                check.checks,
                index,
                expected,
                actual
            );
        }
        if actual != expected.0 {
            return Err(Error::AddressMismatch {
                index,
                expected: expected.0,
                actual,
            });
        }
        Ok(())
    }
}

impl<D: CaptureDevice> Drop for StreamController<D> {
    fn drop(&mut self) {
        if self.streaming {
            if let Err(err) = self.stop() {
                log::warn!("stopping stream on drop: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, FakeDevice};

    fn streaming(len: u32) -> StreamController<FakeDevice> {
        let mut ctl = StreamController::new(FakeDevice::new(len), len as usize);
        ctl.enqueue_all().unwrap();
        ctl.start().unwrap();
        ctl
    }

    #[test]
    fn test_ten_cycles_visit_ring_in_order() {
        for len in [1u32, 3, 4, 8] {
            let mut ctl = streaming(len);
            let mut visited = Vec::new();
            for _ in 0..10 * len {
                let frame = ctl.dequeue().unwrap();
                assert_eq!(ctl.state(frame.slot), Some(SlotState::Filled));
                visited.push(frame.slot);
                ctl.enqueue(frame.slot).unwrap();
            }
            let expected: Vec<usize> = (0..10 * len as usize).map(|i| i % len as usize).collect();
            assert_eq!(visited, expected);
            for i in 0..len as usize {
                assert_eq!(visited.iter().filter(|v| **v == i).count(), 10);
            }
            assert_eq!(ctl.cursor(), 0);
        }
    }

    #[test]
    fn test_start_requires_full_ring() {
        let mut ctl = StreamController::new(FakeDevice::new(4), 4);
        ctl.enqueue(0).unwrap();
        ctl.enqueue(1).unwrap();
        assert!(matches!(ctl.start(), Err(Error::InvalidState(_))));
        assert!(!ctl.is_streaming());
    }

    #[test]
    fn test_start_only_once() {
        let mut ctl = streaming(2);
        assert!(matches!(ctl.start(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_double_enqueue_before_start() {
        let mut ctl = StreamController::new(FakeDevice::new(2), 2);
        ctl.enqueue(1).unwrap();
        assert!(matches!(ctl.enqueue(1), Err(Error::InvalidState(_))));
        assert!(matches!(ctl.enqueue(2), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_only_cursor_slot_requeued() {
        let mut ctl = streaming(4);
        let frame = ctl.dequeue().unwrap();
        assert_eq!(frame.slot, 0);
        // Slot 1 is still queued, not consumed.
        assert!(matches!(ctl.enqueue(1), Err(Error::InvalidState(_))));
        ctl.enqueue(0).unwrap();
        assert_eq!(ctl.cursor(), 1);
        // Slot 0 is queued again; a second re-queue is rejected.
        assert!(matches!(ctl.enqueue(0), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_dequeue_requires_streaming() {
        let mut ctl = StreamController::new(FakeDevice::new(2), 2);
        assert!(matches!(ctl.dequeue(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_dequeue_twice_without_requeue() {
        let mut ctl = streaming(1);
        ctl.dequeue().unwrap();
        assert!(matches!(ctl.dequeue(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_out_of_order_completion_is_not_reordered() {
        let mut ctl = StreamController::new(FakeDevice::new(3).completing_with(2), 3);
        ctl.enqueue_all().unwrap();
        ctl.start().unwrap();
        let frame = ctl.dequeue().unwrap();
        assert_eq!(frame.slot, 0);
        assert_eq!(frame.desc.index, 2);
    }

    #[test]
    fn test_device_failure_propagates() {
        let mut ctl = StreamController::new(FakeDevice::new(2).failing_on("VIDIOC_DQBUF"), 2);
        ctl.enqueue_all().unwrap();
        ctl.start().unwrap();
        assert!(matches!(
            ctl.dequeue(),
            Err(Error::Ioctl {
                request: "VIDIOC_DQBUF",
                ..
            })
        ));
    }

    #[test]
    fn test_stop_from_any_state() {
        let mut idle = StreamController::new(FakeDevice::new(2), 2);
        idle.stop().unwrap();
        assert!(!idle.device().events().contains(&Event::StreamOff));

        let mut ctl = streaming(3);
        ctl.dequeue().unwrap();
        ctl.stop().unwrap();
        assert!(!ctl.is_streaming());
        assert!((0..3).all(|i| ctl.state(i) == Some(SlotState::Free)));
        assert!(ctl.device().events().contains(&Event::StreamOff));
        assert!(matches!(ctl.enqueue(0), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_drop_stops_stream() {
        let ctl = streaming(2);
        let log = ctl.device().log();
        drop(ctl);
        assert!(log.borrow().contains(&Event::StreamOff));
        assert_eq!(log.borrow().last(), Some(&Event::Close));
    }

    #[test]
    fn test_address_check_passes() {
        let dev = FakeDevice::new(3);
        let expected = (0..3).map(|i| PhysAddr(dev.phys_of(i))).collect();
        let mut ctl = StreamController::new(dev, 3).with_address_check(expected);
        ctl.enqueue_all().unwrap();
        ctl.start().unwrap();
        for _ in 0..40 {
            let frame = ctl.dequeue().unwrap();
            ctl.enqueue(frame.slot).unwrap();
        }
    }

    #[test]
    fn test_address_check_detects_change() {
        let dev = FakeDevice::new(2);
        let mut expected: Vec<PhysAddr> = (0..2).map(|i| PhysAddr(dev.phys_of(i))).collect();
        expected[1] = expected[1] + 0x1000;
        let mut ctl = StreamController::new(dev, 2).with_address_check(expected);
        ctl.enqueue(0).unwrap();
        match ctl.enqueue(1) {
            Err(Error::AddressMismatch { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected AddressMismatch, got {:?}", other),
        }
    }
}
