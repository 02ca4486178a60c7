//! Slot layout: `[pid: u32, native endian][text][NUL]`, 4096 bytes total.

use std::borrow::Cow;

use crate::error::BusError;

/// Size of the shared slot, header included.
pub const SLOT_SIZE: usize = 4096;
/// Size of the process-id header.
pub const PID_SIZE: usize = 4;
/// Bytes available for text plus its NUL terminator.
pub const DATA_SIZE: usize = SLOT_SIZE - PID_SIZE;
/// Longest text that fits with its terminator.
pub const MAX_TEXT_LEN: usize = DATA_SIZE - 1;

/// One message as it travels through the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub pid: u32,
    pub text: Vec<u8>,
}

impl BusMessage {
    pub fn new(pid: u32, text: impl Into<Vec<u8>>) -> Self {
        Self {
            pid,
            text: text.into(),
        }
    }

    /// Text decoded as UTF-8, invalid sequences replaced.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }
}

/// What to do with text longer than [`MAX_TEXT_LEN`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OversizePolicy {
    /// Keep the first [`MAX_TEXT_LEN`] bytes. This is what native writers do.
    #[default]
    Truncate,
    /// Fail with [`BusError::MessageTooLong`] and write nothing.
    Reject,
}

/// Why [`fit_payload`] shortened the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cut {
    /// Stopped at an embedded NUL; consumers never see bytes past it.
    InteriorNul,
    /// Cut to [`MAX_TEXT_LEN`] under [`OversizePolicy::Truncate`].
    Truncated,
}

/// The bytes of `text` that will be written, and why any were dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fitted<'a> {
    pub bytes: &'a [u8],
    pub cut: Option<Cut>,
}

/// Fit `text` into the slot according to `policy`.
pub fn fit_payload(text: &[u8], policy: OversizePolicy) -> Result<Fitted<'_>, BusError> {
    let (text, nul_cut) = match text.iter().position(|&b| b == 0) {
        Some(nul) => (&text[..nul], true),
        None => (text, false),
    };

    if text.len() <= MAX_TEXT_LEN {
        return Ok(Fitted {
            bytes: text,
            cut: nul_cut.then_some(Cut::InteriorNul),
        });
    }

    match policy {
        OversizePolicy::Truncate => Ok(Fitted {
            bytes: &text[..MAX_TEXT_LEN],
            cut: Some(Cut::Truncated),
        }),
        OversizePolicy::Reject => Err(BusError::MessageTooLong {
            len: text.len(),
            capacity: MAX_TEXT_LEN,
        }),
    }
}

/// Serialize a message into `out` (cleared first). `text` must already fit.
pub fn encode(pid: u32, text: &[u8], out: &mut Vec<u8>) {
    debug_assert!(text.len() <= MAX_TEXT_LEN);
    out.clear();
    out.extend_from_slice(&pid.to_ne_bytes());
    out.extend_from_slice(text);
    out.push(0);
}

/// Parse a slot image. Text runs to the first NUL, or to the end of the
/// data area if a writer left no terminator.
pub fn decode(slot: &[u8]) -> BusMessage {
    let mut header = [0u8; PID_SIZE];
    let header_len = slot.len().min(PID_SIZE);
    header[..header_len].copy_from_slice(&slot[..header_len]);
    let pid = u32::from_ne_bytes(header);

    let data = slot.get(PID_SIZE..).unwrap_or_default();
    let data = &data[..data.len().min(DATA_SIZE)];
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());

    BusMessage {
        pid,
        text: data[..end].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_constants() {
        assert_eq!(DATA_SIZE, 4092);
        assert_eq!(MAX_TEXT_LEN, 4091);
    }

    #[test]
    fn encode_places_pid_text_and_terminator() {
        let mut out = Vec::new();
        encode(0x0102_0304, b"hi\n", &mut out);
        assert_eq!(&out[..4], &0x0102_0304u32.to_ne_bytes());
        assert_eq!(&out[4..], b"hi\n\0");
    }

    #[test]
    fn decode_reads_up_to_nul() {
        let mut slot = vec![0xAAu8; SLOT_SIZE];
        slot[..4].copy_from_slice(&42u32.to_ne_bytes());
        slot[4..10].copy_from_slice(b"hello\0");
        let msg = decode(&slot);
        assert_eq!(msg, BusMessage::new(42, b"hello".to_vec()));
    }

    #[test]
    fn decode_without_terminator_stops_at_data_area() {
        let mut slot = vec![b'x'; SLOT_SIZE + 16];
        slot[..4].copy_from_slice(&7u32.to_ne_bytes());
        let msg = decode(&slot);
        assert_eq!(msg.pid, 7);
        assert_eq!(msg.text.len(), DATA_SIZE);
    }

    #[test]
    fn decode_short_slot_does_not_panic() {
        let msg = decode(&[1, 0]);
        assert!(msg.text.is_empty());
    }

    #[test]
    fn fit_exactly_at_capacity() {
        let text = vec![b'a'; MAX_TEXT_LEN];
        for policy in [OversizePolicy::Truncate, OversizePolicy::Reject] {
            let fitted = fit_payload(&text, policy).unwrap();
            assert_eq!(fitted.bytes.len(), MAX_TEXT_LEN);
            assert_eq!(fitted.cut, None);
        }
    }

    #[test]
    fn one_byte_over_capacity_truncates() {
        let mut text = vec![b'a'; MAX_TEXT_LEN];
        text.push(b'z');
        let fitted = fit_payload(&text, OversizePolicy::Truncate).unwrap();
        assert_eq!(fitted.bytes, &text[..MAX_TEXT_LEN]);
        assert_eq!(fitted.cut, Some(Cut::Truncated));
    }

    #[test]
    fn one_byte_over_capacity_rejects() {
        let text = vec![b'a'; MAX_TEXT_LEN + 1];
        match fit_payload(&text, OversizePolicy::Reject).unwrap_err() {
            BusError::MessageTooLong { len, capacity } => {
                assert_eq!(len, MAX_TEXT_LEN + 1);
                assert_eq!(capacity, MAX_TEXT_LEN);
            }
            other => panic!("expected MessageTooLong, got: {other:?}"),
        }
    }

    #[test]
    fn interior_nul_ends_payload() {
        let fitted = fit_payload(b"visible\0hidden", OversizePolicy::Reject).unwrap();
        assert_eq!(fitted.bytes, b"visible");
        assert_eq!(fitted.cut, Some(Cut::InteriorNul));
    }

    #[test]
    fn oversize_after_interior_nul_is_not_rejected() {
        let mut text = b"short\0".to_vec();
        text.extend(std::iter::repeat_n(b'x', SLOT_SIZE));
        let fitted = fit_payload(&text, OversizePolicy::Reject).unwrap();
        assert_eq!(fitted.bytes, b"short");
    }

    #[test]
    fn text_lossy_replaces_invalid_utf8() {
        let msg = BusMessage::new(1, vec![b'o', b'k', 0xFF]);
        assert_eq!(msg.text_lossy(), "ok\u{FFFD}");
    }
}
