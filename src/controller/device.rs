use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read};
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Size of one `struct js_event` record as delivered by the kernel.
pub const RAW_EVENT_SIZE: usize = 8;

/// Type bit for button changes.
pub const JS_EVENT_BUTTON: u8 = 0x01;
/// Type bit for axis changes.
pub const JS_EVENT_AXIS: u8 = 0x02;
/// Set on the synthetic events the driver emits right after open.
pub const JS_EVENT_INIT: u8 = 0x80;

// Character major of the Linux input subsystem (js, event, mice)
const INPUT_MAJOR: u32 = 13;

// Raw joystick record, decoded but not yet classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// Device clock in milliseconds
    pub time: u32,
    pub value: i16,
    pub kind_bits: u8,
    pub number: u8,
}

impl RawEvent {
    pub fn decode(bytes: &[u8; RAW_EVENT_SIZE]) -> Self {
        Self {
            time: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            value: i16::from_ne_bytes([bytes[4], bytes[5]]),
            kind_bits: bytes[6],
            number: bytes[7],
        }
    }

    pub fn to_bytes(&self) -> [u8; RAW_EVENT_SIZE] {
        let mut out = [0u8; RAW_EVENT_SIZE];
        out[0..4].copy_from_slice(&self.time.to_ne_bytes());
        out[4..6].copy_from_slice(&self.value.to_ne_bytes());
        out[6] = self.kind_bits;
        out[7] = self.number;
        out
    }

    pub fn is_initial(&self) -> bool {
        self.kind_bits & JS_EVENT_INIT != 0
    }
}

// Result of a single non-blocking poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Event(RawEvent),
    NoEventAvailable,
}

// Device errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Input device not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Not an input device: {}", path.display())]
    NotInputDevice { path: PathBuf },

    #[error("Failed to open input device {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read from input device: {0}")]
    Read(#[from] io::Error),
}

/// Anything the pipeline can poll for raw events.
pub trait EventSource {
    /// Returns immediately. `NoEventAvailable` when nothing is pending.
    fn try_read_event(&mut self) -> Result<ReadOutcome, DeviceError>;
}

/// Reassembles fixed-size records from a non-blocking byte stream.
///
/// Short reads are kept in an internal buffer until the record is complete,
/// so a record split across two polls is never lost or misaligned.
#[derive(Debug)]
pub struct EventReader<R> {
    inner: R,
    buf: [u8; RAW_EVENT_SIZE],
    filled: usize,
}

impl<R: Read> EventReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: [0u8; RAW_EVENT_SIZE],
            filled: 0,
        }
    }
}

impl<R: Read> EventSource for EventReader<R> {
    fn try_read_event(&mut self) -> Result<ReadOutcome, DeviceError> {
        loop {
            match self.inner.read(&mut self.buf[self.filled..]) {
                Ok(0) => return Ok(ReadOutcome::NoEventAvailable),
                Ok(n) => {
                    self.filled += n;
                    if self.filled == RAW_EVENT_SIZE {
                        self.filled = 0;
                        let event = RawEvent::decode(&self.buf);
                        trace!("Decoded raw event: {:?}", event);
                        return Ok(ReadOutcome::Event(event));
                    }
                    trace!("Partial record, {} of {} bytes", self.filled, RAW_EVENT_SIZE);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::NoEventAvailable)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(DeviceError::Read(e)),
            }
        }
    }
}

/// Joystick character device (`/dev/input/jsN`) opened non-blocking.
///
/// The file handle is closed when this value is dropped.
#[derive(Debug)]
pub struct JoystickDevice {
    reader: EventReader<File>,
}

impl JoystickDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening input device {}", path.display());

        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DeviceError::NotFound { path })
            }
            Err(source) => return Err(DeviceError::Open { path, source }),
        };

        if !metadata.file_type().is_char_device() || libc::major(metadata.rdev()) != INPUT_MAJOR {
            return Err(DeviceError::NotInputDevice { path });
        }

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| DeviceError::Open {
                path: path.clone(),
                source,
            })?;

        info!("Opened input device {}", path.display());
        Ok(Self {
            reader: EventReader::new(file),
        })
    }
}

impl EventSource for JoystickDevice {
    fn try_read_event(&mut self) -> Result<ReadOutcome, DeviceError> {
        self.reader.try_read_event()
    }
}
