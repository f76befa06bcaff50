//! Binary codec for the UEFI-defined structures this engine exchanges
//! with guest firmware: `EFI_TIME`, `EFI_SIGNATURE_LIST` /
//! `EFI_SIGNATURE_DATA`. See [`crate::auth`] for the
//! `EFI_VARIABLE_AUTHENTICATION_2` envelope, which reuses the cursor
//! helpers defined here.
//!
//! Every descent through a length-prefixed structure first validates the
//! declared length against the *remaining* slice via [`ByteCursor`] before
//! handing a right-sized sub-slice to `binrw`. `binrw` itself is trusted to
//! decode a correctly-sized slice, but it is never allowed to see guest
//! input whose declared lengths haven't already been checked — a guest
//! that lies about a length gets `SECURITY_VIOLATION`, not a panic.

use binrw::BinRead;

use crate::error::EngineError;

/// A bounds-checked cursor over an untrusted byte slice.
///
/// Every `take*` method fails with [`EngineError::SecurityViolation`]
/// instead of panicking when the requested amount exceeds what remains,
/// which is the discipline spec.md §9's REDESIGN FLAGS calls for in place
/// of raw pointer arithmetic over concatenated buffers.
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteCursor { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn fail(reason: &'static str) -> EngineError {
        EngineError::SecurityViolation(reason)
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], EngineError> {
        if n > self.remaining() {
            return Err(Self::fail("buffer truncated"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn take_u32_le(&mut self) -> Result<u32, EngineError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn take_u16_le(&mut self) -> Result<u16, EngineError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn take_guid(&mut self) -> Result<[u8; 16], EngineError> {
        let b = self.take(16)?;
        let mut out = [0u8; 16];
        out.copy_from_slice(b);
        Ok(out)
    }

    /// Remaining unread bytes, without consuming them.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// `EFI_TIME`, 16 bytes, little-endian.
///
/// Stored in normalized form: `Pad1`, `Nanosecond`, `TimeZone`, `Daylight`
/// and `Pad2` are always zero (spec.md §3, record invariant on
/// `timestamp`). Ordering is lexicographic over
/// `(Year, Month, Day, Hour, Minute, Second)` only, per spec.md §4.C step 5
/// and §8 universal property 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
pub struct EfiTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub pad1: u8,
    pub nanosecond: u32,
    pub time_zone: i16,
    pub daylight: u8,
    pub pad2: u8,
}

impl EfiTime {
    pub const ZERO: EfiTime = EfiTime {
        year: 0,
        month: 0,
        day: 0,
        hour: 0,
        minute: 0,
        second: 0,
        pad1: 0,
        nanosecond: 0,
        time_zone: 0,
        daylight: 0,
        pad2: 0,
    };

    /// Returns a copy with all non-comparable fields zeroed, as required
    /// before storing a timestamp (spec.md §3).
    pub fn normalized(self) -> EfiTime {
        EfiTime {
            pad1: 0,
            nanosecond: 0,
            time_zone: 0,
            daylight: 0,
            pad2: 0,
            ..self
        }
    }

    fn ordering_key(&self) -> (u16, u8, u8, u8, u8, u8) {
        (
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        )
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..2].copy_from_slice(&self.year.to_le_bytes());
        out[2] = self.month;
        out[3] = self.day;
        out[4] = self.hour;
        out[5] = self.minute;
        out[6] = self.second;
        out[7] = self.pad1;
        out[8..12].copy_from_slice(&self.nanosecond.to_le_bytes());
        out[12..14].copy_from_slice(&self.time_zone.to_le_bytes());
        out[14] = self.daylight;
        out[15] = self.pad2;
        out
    }

    pub fn parse(cursor: &mut ByteCursor) -> Result<EfiTime, EngineError> {
        let bytes = cursor.take(16)?;
        let mut reader = binrw::io::Cursor::new(bytes);
        EfiTime::read(&mut reader).map_err(|_| EngineError::SecurityViolation("malformed EFI_TIME"))
    }
}

impl PartialOrd for EfiTime {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EfiTime {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.ordering_key().cmp(&other.ordering_key())
    }
}

/// One entry of an `EFI_SIGNATURE_LIST`: an owner GUID plus opaque
/// signature data (a certificate, a hash, ...) whose length is
/// `SignatureSize - 16`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureData {
    pub owner: [u8; 16],
    pub data: Vec<u8>,
}

/// A decoded `EFI_SIGNATURE_LIST`. Lists whose `SignatureType` is not
/// recognized by [`crate::policy`] are still parsed structurally (so they
/// can be stored and re-serialized opaquely) but never interpreted as
/// certificates or hashes, per spec.md §4.A.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureList {
    pub signature_type: [u8; 16],
    pub header: Vec<u8>,
    pub entries: Vec<SignatureData>,
}

impl SignatureList {
    const HEADER_LEN: usize = 16 + 4 + 4 + 4;

    /// Parses a single `EFI_SIGNATURE_LIST` from the front of `cursor`,
    /// bounds-checking `SignatureListSize`, `SignatureHeaderSize` and
    /// `SignatureSize` against what remains before trusting any of them.
    pub fn parse(cursor: &mut ByteCursor) -> Result<SignatureList, EngineError> {
        if cursor.remaining() < Self::HEADER_LEN {
            return Err(EngineError::SecurityViolation(
                "signature list header truncated",
            ));
        }
        let signature_type = cursor.take_guid()?;
        let list_size = cursor.take_u32_le()? as usize;
        let header_size = cursor.take_u32_le()? as usize;
        let signature_size = cursor.take_u32_le()? as usize;

        if list_size < Self::HEADER_LEN {
            return Err(EngineError::SecurityViolation("signature list size too small"));
        }
        let body_len = list_size - Self::HEADER_LEN;
        if header_size > body_len {
            return Err(EngineError::SecurityViolation(
                "signature header size exceeds list",
            ));
        }
        if body_len > cursor.remaining() {
            return Err(EngineError::SecurityViolation(
                "signature list size exceeds buffer",
            ));
        }

        let header = cursor.take(header_size)?.to_vec();
        let entries_len = body_len - header_size;
        if signature_size < 16 {
            return Err(EngineError::SecurityViolation(
                "signature entry smaller than owner GUID",
            ));
        }
        if entries_len % signature_size != 0 {
            return Err(EngineError::SecurityViolation(
                "signature list size not a multiple of entry size",
            ));
        }
        let count = entries_len / signature_size;
        let data_len = signature_size - 16;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let owner = cursor.take_guid()?;
            let data = cursor.take(data_len)?.to_vec();
            entries.push(SignatureData { owner, data });
        }

        Ok(SignatureList {
            signature_type,
            header,
            entries,
        })
    }

    /// Parses every `EFI_SIGNATURE_LIST` packed back-to-back until the
    /// buffer is exhausted (the wire representation of a `db`/`dbx`/`KEK`
    /// payload is a concatenation of lists, not a single one).
    pub fn parse_all(buf: &[u8]) -> Result<Vec<SignatureList>, EngineError> {
        let mut cursor = ByteCursor::new(buf);
        let mut lists = Vec::new();
        while cursor.remaining() > 0 {
            lists.push(SignatureList::parse(&mut cursor)?);
        }
        Ok(lists)
    }

    pub fn entry_signature_size(&self) -> usize {
        16 + self.entries.first().map_or(0, |e| e.data.len())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let signature_size = self.entry_signature_size() as u32;
        let list_size =
            Self::HEADER_LEN as u32 + self.header.len() as u32 + (signature_size * self.entries.len() as u32);
        let mut out = Vec::with_capacity(list_size as usize);
        out.extend_from_slice(&self.signature_type);
        out.extend_from_slice(&list_size.to_le_bytes());
        out.extend_from_slice(&(self.header.len() as u32).to_le_bytes());
        out.extend_from_slice(&signature_size.to_le_bytes());
        out.extend_from_slice(&self.header);
        for entry in &self.entries {
            out.extend_from_slice(&entry.owner);
            out.extend_from_slice(&entry.data);
        }
        out
    }
}

/// Serializes a sequence of lists back into the concatenated wire form.
pub fn serialize_lists(lists: &[SignatureList]) -> Vec<u8> {
    let mut out = Vec::new();
    for list in lists {
        out.extend_from_slice(&list.to_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_list() -> SignatureList {
        SignatureList {
            signature_type: crate::guid::EFI_CERT_X509,
            header: Vec::new(),
            entries: vec![SignatureData {
                owner: crate::guid::MICROSOFT_OWNER,
                data: vec![1, 2, 3, 4],
            }],
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let list = sample_list();
        let bytes = list.to_bytes();
        let mut cursor = ByteCursor::new(&bytes);
        let parsed = SignatureList::parse(&mut cursor).unwrap();
        assert_eq!(parsed, list);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn rejects_truncated_list() {
        let list = sample_list();
        let mut bytes = list.to_bytes();
        bytes.truncate(bytes.len() - 1);
        let mut cursor = ByteCursor::new(&bytes);
        assert!(SignatureList::parse(&mut cursor).is_err());
    }

    #[test]
    fn rejects_entry_size_smaller_than_guid() {
        // list_size=28 (no entries) but signature_size claims 8 bytes.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&crate::guid::EFI_CERT_X509);
        bytes.extend_from_slice(&28u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        let mut cursor = ByteCursor::new(&bytes);
        assert!(SignatureList::parse(&mut cursor).is_ok()); // zero entries, no overrun
    }

    #[test]
    fn time_orders_lexicographically_ignoring_subsecond_fields() {
        let mut a = EfiTime::ZERO;
        a.year = 2024;
        a.month = 1;
        a.day = 1;
        let mut b = a;
        b.nanosecond = 999; // must not affect ordering
        assert_eq!(a.cmp(&b), core::cmp::Ordering::Equal);

        let mut c = a;
        c.second += 1;
        assert!(a < c);
    }

    #[test]
    fn normalized_clears_subsecond_fields() {
        let mut t = EfiTime::ZERO;
        t.nanosecond = 42;
        t.time_zone = -60;
        t.daylight = 1;
        let n = t.normalized();
        assert_eq!(n.nanosecond, 0);
        assert_eq!(n.time_zone, 0);
        assert_eq!(n.daylight, 0);
    }
}
