//! In-memory peripherals for unit tests.

use std::collections::VecDeque;

use embedded_can::{ErrorKind, Frame, Id};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockFrame {
    id: Id,
    data: heapless::Vec<u8, 8>,
}

impl Frame for MockFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let data = heapless::Vec::from_slice(data).ok()?;
        Some(Self {
            id: id.into(),
            data,
        })
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.data.len()
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Records transmitted frames and replays queued replies.
#[derive(Debug, Default)]
pub(crate) struct MockCan {
    pub sent: Vec<MockFrame>,
    pub inbox: VecDeque<MockFrame>,
    pub busy: bool,
    pub fault: Option<ErrorKind>,
}

impl MockCan {
    pub fn reply(&mut self, data: &[u8]) {
        if let Some(frame) = MockFrame::new(embedded_can::StandardId::ZERO, data) {
            self.inbox.push_back(frame);
        }
    }
}

impl embedded_can::nb::Can for MockCan {
    type Frame = MockFrame;
    type Error = ErrorKind;

    fn transmit(&mut self, frame: &MockFrame) -> nb::Result<Option<MockFrame>, ErrorKind> {
        if let Some(kind) = self.fault {
            return Err(nb::Error::Other(kind));
        }
        if self.busy {
            return Err(nb::Error::WouldBlock);
        }
        self.sent.push(frame.clone());
        Ok(None)
    }

    fn receive(&mut self) -> nb::Result<MockFrame, ErrorKind> {
        self.inbox.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

/// Byte link that hands out queued bytes, optionally a few at a time.
#[derive(Debug, Default)]
pub(crate) struct MockSerial {
    pub rx: VecDeque<u8>,
    /// Largest single read; `0` means unlimited.
    pub max_read: usize,
    /// Report ready even when nothing is queued.
    pub ready_when_empty: bool,
    pub fault: Option<embedded_io::ErrorKind>,
}

impl MockSerial {
    pub fn with_bytes(bytes: &[u8]) -> Self {
        Self {
            rx: bytes.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = embedded_io::ErrorKind;
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if let Some(kind) = self.fault {
            return Err(kind);
        }
        let mut n = buf.len().min(self.rx.len());
        if self.max_read > 0 {
            n = n.min(self.max_read);
        }
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl embedded_io::ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.ready_when_empty || !self.rx.is_empty())
    }
}
