//! Binary framing: fixed 32-byte header, optional auth block, payload.
//!
//! All integers are big-endian. Layout of the fixed header:
//!
//! ```text
//! magic:u32 | version:u16 | header_len:u16 | message_id:u64 |
//! message_type:u32 | flags:u32 | payload_len:u64
//! ```
//!
//! `header_len` covers the fixed header plus the auth block, so the auth
//! length is `header_len - 32`.

use std::io::{self, Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::effect::Transience;

pub const FIXED_HEADER_LEN: u16 = 32;
pub const PROTOCOL_MAGIC: u32 = 0xEDCE_1001;
pub const PROTOCOL_VERSION: u16 = 1;

pub const DEFAULT_MAX_AUTH_BYTES: u64 = 64 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 8 * 1024 * 1024;

/// Header flag bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FrameFlags(u32);

impl FrameFlags {
    pub const HAS_AUTH: FrameFlags = FrameFlags(0x01);
    pub const IS_RESPONSE: FrameFlags = FrameFlags(0x02);
    pub const IS_ERROR: FrameFlags = FrameFlags(0x04);
    pub const SUPPORTED: FrameFlags = FrameFlags(0x01 | 0x02 | 0x04);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits_retain(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: FrameFlags) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: FrameFlags) -> Self {
        Self(self.0 & !other.0)
    }

    /// Bits outside [`FrameFlags::SUPPORTED`].
    #[must_use]
    pub const fn unsupported_bits(self) -> u32 {
        self.0 & !Self::SUPPORTED.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u16,
    pub header_len: u16,
    pub message_id: u64,
    pub message_type: u32,
    pub flags: FrameFlags,
    pub payload_len: u64,
}

impl FrameHeader {
    /// A header for a new outbound frame; magic, version and lengths are
    /// filled in by [`write_frame`].
    #[must_use]
    pub fn new(message_id: u64, message_type: u32) -> Self {
        Self {
            message_id,
            message_type,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn auth_len(&self) -> u64 {
        u64::from(self.header_len.saturating_sub(FIXED_HEADER_LEN))
    }

    #[must_use]
    pub fn encode(&self) -> [u8; FIXED_HEADER_LEN as usize] {
        let mut buf = [0u8; FIXED_HEADER_LEN as usize];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..6].copy_from_slice(&self.version.to_be_bytes());
        buf[6..8].copy_from_slice(&self.header_len.to_be_bytes());
        buf[8..16].copy_from_slice(&self.message_id.to_be_bytes());
        buf[16..20].copy_from_slice(&self.message_type.to_be_bytes());
        buf[20..24].copy_from_slice(&self.flags.bits().to_be_bytes());
        buf[24..32].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Parses and checks magic, version and flags. Length checks against
    /// limits happen in [`read_frame`].
    pub fn decode(buf: &[u8; FIXED_HEADER_LEN as usize]) -> Result<Self, FrameError> {
        let header = Self {
            magic: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            version: u16::from_be_bytes([buf[4], buf[5]]),
            header_len: u16::from_be_bytes([buf[6], buf[7]]),
            message_id: u64::from_be_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]),
            message_type: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
            flags: FrameFlags::from_bits_retain(u32::from_be_bytes([
                buf[20], buf[21], buf[22], buf[23],
            ])),
            payload_len: u64::from_be_bytes([
                buf[24], buf[25], buf[26], buf[27], buf[28], buf[29], buf[30], buf[31],
            ]),
        };
        if header.magic != PROTOCOL_MAGIC {
            return Err(FrameError::UnsupportedMagic {
                magic: header.magic,
            });
        }
        if header.version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion {
                version: header.version,
            });
        }
        if header.flags.unsupported_bits() != 0 {
            return Err(FrameError::UnsupportedFlags {
                flags: header.flags.bits(),
            });
        }
        Ok(header)
    }
}

/// Size limits applied on both read and write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_auth_bytes: u64,
    pub max_payload_bytes: u64,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_auth_bytes: DEFAULT_MAX_AUTH_BYTES,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// One complete frame. Never partially populated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub auth: Bytes,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            auth: Bytes::new(),
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: impl Into<Bytes>) -> Self {
        self.auth = auth.into();
        self
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame: short fixed header")]
    ShortHeader,
    #[error("frame: header_len {header_len} smaller than fixed header")]
    HeaderLenTooSmall { header_len: u16 },
    #[error("frame: auth flag set but header_len has no auth bytes")]
    HeaderLenMismatch,
    #[error("frame: auth too large: max {max} got {got}")]
    AuthTooLarge { max: u64, got: u64 },
    #[error("frame: payload too large: max {max} got {got}")]
    PayloadTooLarge { max: u64, got: u64 },
    #[error("frame: unsupported magic 0x{magic:08X}")]
    UnsupportedMagic { magic: u32 },
    #[error("frame: unsupported version {version}")]
    UnsupportedVersion { version: u16 },
    #[error("frame: unsupported flags 0x{flags:08X}")]
    UnsupportedFlags { flags: u32 },
    #[error("frame: {section} truncated")]
    Truncated { section: &'static str },
}

impl FrameError {
    /// Malformed frames are fatal to the connection; only io may be transient.
    pub fn transience(&self) -> Transience {
        match self {
            FrameError::Io(err) => match err.kind() {
                io::ErrorKind::TimedOut
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::Interrupted
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe => Transience::Retryable,
                _ => Transience::Unknown,
            },
            FrameError::ShortHeader | FrameError::Truncated { .. } => Transience::Retryable,
            FrameError::HeaderLenTooSmall { .. }
            | FrameError::HeaderLenMismatch
            | FrameError::AuthTooLarge { .. }
            | FrameError::PayloadTooLarge { .. }
            | FrameError::UnsupportedMagic { .. }
            | FrameError::UnsupportedVersion { .. }
            | FrameError::UnsupportedFlags { .. } => Transience::Permanent,
        }
    }
}

/// Reads exactly one frame. End of stream anywhere inside the fixed header
/// is [`FrameError::ShortHeader`].
pub fn read_frame<R: Read>(reader: &mut R, limits: FrameLimits) -> Result<Frame, FrameError> {
    match read_frame_inner(reader, limits)? {
        Some(frame) => Ok(frame),
        None => Err(FrameError::ShortHeader),
    }
}

fn read_frame_inner<R: Read>(
    reader: &mut R,
    limits: FrameLimits,
) -> Result<Option<Frame>, FrameError> {
    let mut fixed = [0u8; FIXED_HEADER_LEN as usize];
    let mut read = 0usize;
    while read < fixed.len() {
        let n = match reader.read(&mut fixed[read..]) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            return Err(FrameError::ShortHeader);
        }
        read += n;
    }

    let header = FrameHeader::decode(&fixed)?;
    if header.header_len < FIXED_HEADER_LEN {
        return Err(FrameError::HeaderLenTooSmall {
            header_len: header.header_len,
        });
    }
    let auth_len = header.auth_len();
    if header.flags.contains(FrameFlags::HAS_AUTH) && auth_len == 0 {
        return Err(FrameError::HeaderLenMismatch);
    }
    if auth_len > limits.max_auth_bytes {
        return Err(FrameError::AuthTooLarge {
            max: limits.max_auth_bytes,
            got: auth_len,
        });
    }
    if header.payload_len > limits.max_payload_bytes {
        return Err(FrameError::PayloadTooLarge {
            max: limits.max_payload_bytes,
            got: header.payload_len,
        });
    }

    let auth = read_section(reader, auth_len, "auth")?;
    let payload = read_section(reader, header.payload_len, "payload")?;

    tracing::debug!(
        message_id = header.message_id,
        message_type = header.message_type,
        auth_len,
        payload_len = header.payload_len,
        "frame read"
    );
    Ok(Some(Frame {
        header,
        auth,
        payload,
    }))
}

fn read_section<R: Read>(
    reader: &mut R,
    len: u64,
    section: &'static str,
) -> Result<Bytes, FrameError> {
    if len == 0 {
        return Ok(Bytes::new());
    }
    // Bounded by the limits checked above.
    let len = usize::try_from(len).map_err(|_| FrameError::Truncated { section })?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Truncated { section }
        } else {
            FrameError::Io(err)
        }
    })?;
    Ok(Bytes::from(buf))
}

/// Writes one frame and returns the header as it went on the wire.
///
/// A zero magic or version is replaced by the protocol constants;
/// `header_len`, `payload_len` and the auth flag are always recomputed from
/// the actual auth and payload.
pub fn write_frame<W: Write>(
    writer: &mut W,
    frame: &Frame,
    limits: FrameLimits,
) -> Result<FrameHeader, FrameError> {
    let (header, bytes) = encode_frame(frame, limits)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    tracing::debug!(
        message_id = header.message_id,
        message_type = header.message_type,
        payload_len = header.payload_len,
        "frame written"
    );
    Ok(header)
}

/// Encodes a frame into one contiguous buffer.
pub fn encode_frame(frame: &Frame, limits: FrameLimits) -> Result<(FrameHeader, Bytes), FrameError> {
    let auth_len = frame.auth.len() as u64;
    let payload_len = frame.payload.len() as u64;
    if auth_len > limits.max_auth_bytes {
        return Err(FrameError::AuthTooLarge {
            max: limits.max_auth_bytes,
            got: auth_len,
        });
    }
    if payload_len > limits.max_payload_bytes {
        return Err(FrameError::PayloadTooLarge {
            max: limits.max_payload_bytes,
            got: payload_len,
        });
    }
    let header_len = u16::try_from(auth_len)
        .ok()
        .and_then(|len| len.checked_add(FIXED_HEADER_LEN))
        .ok_or(FrameError::AuthTooLarge {
            max: u64::from(u16::MAX - FIXED_HEADER_LEN),
            got: auth_len,
        })?;

    let mut header = frame.header;
    if header.magic == 0 {
        header.magic = PROTOCOL_MAGIC;
    }
    if header.version == 0 {
        header.version = PROTOCOL_VERSION;
    }
    if header.flags.unsupported_bits() != 0 {
        return Err(FrameError::UnsupportedFlags {
            flags: header.flags.bits(),
        });
    }
    header.header_len = header_len;
    header.payload_len = payload_len;
    header.flags = if auth_len > 0 {
        header.flags.union(FrameFlags::HAS_AUTH)
    } else {
        header.flags.without(FrameFlags::HAS_AUTH)
    };

    let mut buf = BytesMut::with_capacity(
        FIXED_HEADER_LEN as usize + frame.auth.len() + frame.payload.len(),
    );
    buf.put_slice(&header.encode());
    buf.put_slice(&frame.auth);
    buf.put_slice(&frame.payload);
    Ok((header, buf.freeze()))
}

/// Pushes a frame through the byte-level encoder and decoder.
///
/// Used where a message must prove it survives real serialization before it
/// is handed on.
pub fn round_trip(frame: &Frame, limits: FrameLimits) -> Result<Frame, FrameError> {
    let (_, bytes) = encode_frame(frame, limits)?;
    let mut cursor = io::Cursor::new(bytes);
    read_frame(&mut cursor, limits)
}

/// Pulls frames off a stream; a clean end of stream between frames is
/// `Ok(None)` rather than an error.
pub struct FrameReader<R> {
    reader: R,
    limits: FrameLimits,
}

impl<R: Read> FrameReader<R> {
    #[must_use]
    pub fn new(reader: R, limits: FrameLimits) -> Self {
        Self { reader, limits }
    }

    pub fn read_next(&mut self) -> Result<Option<Frame>, FrameError> {
        read_frame_inner(&mut self.reader, self.limits)
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn sample(auth: &[u8], payload: &[u8]) -> Frame {
        Frame::new(FrameHeader::new(42, 2), payload.to_vec()).with_auth(auth.to_vec())
    }

    #[test]
    fn write_fills_defaults_and_auth_flag() {
        let mut buf = Vec::new();
        let header = write_frame(&mut buf, &sample(b"tok", b"body"), FrameLimits::default())
            .unwrap();
        assert_eq!(header.magic, PROTOCOL_MAGIC);
        assert_eq!(header.version, PROTOCOL_VERSION);
        assert_eq!(header.header_len, FIXED_HEADER_LEN + 3);
        assert_eq!(header.payload_len, 4);
        assert!(header.flags.contains(FrameFlags::HAS_AUTH));
        assert_eq!(buf.len(), 32 + 3 + 4);

        let decoded = read_frame(&mut Cursor::new(buf), FrameLimits::default()).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(&decoded.auth[..], b"tok");
        assert_eq!(&decoded.payload[..], b"body");
    }

    #[test]
    fn write_clears_stale_auth_flag() {
        let frame = Frame::new(
            FrameHeader::new(1, 5).with_flags(FrameFlags::HAS_AUTH.union(FrameFlags::IS_RESPONSE)),
            b"x".to_vec(),
        );
        let mut buf = Vec::new();
        let header = write_frame(&mut buf, &frame, FrameLimits::default()).unwrap();
        assert!(!header.flags.contains(FrameFlags::HAS_AUTH));
        assert!(header.flags.contains(FrameFlags::IS_RESPONSE));
    }

    #[test]
    fn write_rejects_unknown_flags() {
        let frame = Frame::new(
            FrameHeader::new(1, 5).with_flags(FrameFlags::from_bits_retain(0x80)),
            Bytes::new(),
        );
        let err = write_frame(&mut Vec::new(), &frame, FrameLimits::default()).unwrap_err();
        assert!(matches!(err, FrameError::UnsupportedFlags { flags: 0x80 }));
    }

    #[test]
    fn short_header_is_distinct() {
        let err = read_frame(&mut Cursor::new(vec![0xED, 0xCE]), FrameLimits::default())
            .unwrap_err();
        assert!(matches!(err, FrameError::ShortHeader));

        let err = read_frame(&mut Cursor::new(Vec::new()), FrameLimits::default()).unwrap_err();
        assert!(matches!(err, FrameError::ShortHeader));
    }

    #[test]
    fn header_len_smaller_than_fixed_is_rejected() {
        let mut header = FrameHeader::new(1, 2);
        header.magic = PROTOCOL_MAGIC;
        header.version = PROTOCOL_VERSION;
        header.header_len = 16;
        let err = read_frame(
            &mut Cursor::new(header.encode().to_vec()),
            FrameLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::HeaderLenTooSmall { header_len: 16 }));
    }

    #[test]
    fn auth_flag_without_auth_bytes_is_mismatch() {
        let mut header = FrameHeader::new(1, 2).with_flags(FrameFlags::HAS_AUTH);
        header.magic = PROTOCOL_MAGIC;
        header.version = PROTOCOL_VERSION;
        header.header_len = FIXED_HEADER_LEN;
        let err = read_frame(
            &mut Cursor::new(header.encode().to_vec()),
            FrameLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::HeaderLenMismatch));
    }

    #[test]
    fn limits_apply_on_read_and_write() {
        let limits = FrameLimits {
            max_auth_bytes: 2,
            max_payload_bytes: 4,
        };
        let err = write_frame(&mut Vec::new(), &sample(b"abc", b""), limits).unwrap_err();
        assert!(matches!(err, FrameError::AuthTooLarge { max: 2, got: 3 }));
        let err = write_frame(&mut Vec::new(), &sample(b"", b"12345"), limits).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { max: 4, got: 5 }));

        let mut buf = Vec::new();
        write_frame(&mut buf, &sample(b"abc", b"12345"), FrameLimits::default()).unwrap();
        let err = read_frame(&mut Cursor::new(buf.clone()), limits).unwrap_err();
        assert!(matches!(err, FrameError::AuthTooLarge { .. }));
        let err = read_frame(
            &mut Cursor::new(buf),
            FrameLimits {
                max_auth_bytes: 64,
                max_payload_bytes: 4,
            },
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn bad_magic_and_version_are_rejected() {
        let mut header = FrameHeader::new(1, 2);
        header.magic = 0xDEAD_BEEF;
        header.version = PROTOCOL_VERSION;
        header.header_len = FIXED_HEADER_LEN;
        let err = FrameHeader::decode(&header.encode()).unwrap_err();
        assert!(matches!(err, FrameError::UnsupportedMagic { magic: 0xDEAD_BEEF }));

        header.magic = PROTOCOL_MAGIC;
        header.version = 9;
        let err = FrameHeader::decode(&header.encode()).unwrap_err();
        assert!(matches!(err, FrameError::UnsupportedVersion { version: 9 }));
    }

    #[test]
    fn truncated_payload_never_yields_partial_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &sample(b"", b"full payload"), FrameLimits::default()).unwrap();
        buf.truncate(buf.len() - 3);
        let err = read_frame(&mut Cursor::new(buf), FrameLimits::default()).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { section: "payload" }));
    }

    #[test]
    fn reader_reports_clean_eof_between_frames() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &sample(b"", b"one"), FrameLimits::default()).unwrap();
        write_frame(&mut buf, &sample(b"", b"two"), FrameLimits::default()).unwrap();
        let mut reader = FrameReader::new(Cursor::new(buf), FrameLimits::default());
        assert_eq!(&reader.read_next().unwrap().unwrap().payload[..], b"one");
        assert_eq!(&reader.read_next().unwrap().unwrap().payload[..], b"two");
        assert!(reader.read_next().unwrap().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn frame_round_trip_within_limits(
            message_id in any::<u64>(),
            message_type in 1u32..9,
            response in any::<bool>(),
            auth in proptest::collection::vec(any::<u8>(), 0..64),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let flags = if response { FrameFlags::IS_RESPONSE } else { FrameFlags::empty() };
            let frame = Frame::new(FrameHeader::new(message_id, message_type).with_flags(flags), payload.clone())
                .with_auth(auth.clone());
            let decoded = round_trip(&frame, FrameLimits::default()).unwrap();
            prop_assert_eq!(decoded.header.message_id, message_id);
            prop_assert_eq!(decoded.header.message_type, message_type);
            prop_assert_eq!(decoded.header.flags.contains(FrameFlags::IS_RESPONSE), response);
            prop_assert_eq!(decoded.header.flags.contains(FrameFlags::HAS_AUTH), !auth.is_empty());
            prop_assert_eq!(&decoded.auth[..], &auth[..]);
            prop_assert_eq!(&decoded.payload[..], &payload[..]);
        }
    }
}
