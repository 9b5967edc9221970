//! Decoders for ZIP extra-field records that carry Unix metadata, and the
//! merge policy applied when several records describe the same [`crate::data_node::DataNode`].

/// Where an extra-field record was read from. Central-directory and local-header
/// copies of the same record type can disagree; later-encountered records of the
/// same type override earlier ones, per [`UnixFieldMerge`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExtraFieldLocation {
    CentralDirectory,
    LocalHeader,
}

pub const ID_EXTENDED_TIMESTAMP: u16 = 0x5455;
pub const ID_PKWARE_UNIX: u16 = 0x000D;
pub const ID_INFOZIP_UNIX1: u16 = 0x5855;
pub const ID_INFOZIP_UNIX2: u16 = 0x7855;
pub const ID_INFOZIP_UNIXN: u16 = 0x7875;
pub const ID_NTFS: u16 = 0x000A;

const NTFS_TO_UNIX_OFFSET_100NS: i64 = (369 * 365 + 89) * 24 * 3600 * 10_000_000;

/// A decoded Unix timestamp, nanosecond resolution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn from_unix_secs(secs: u32) -> Self {
        Timestamp { secs: secs as i64, nanos: 0 }
    }

    /// Converts a 64-bit Windows `FILETIME` (100ns ticks since 1601-01-01) to a Unix timestamp.
    pub fn from_ntfs_filetime(ticks: u64) -> Self {
        let ticks = ticks as i64 - NTFS_TO_UNIX_OFFSET_100NS;
        let secs = ticks.div_euclid(10_000_000);
        let rem = ticks.rem_euclid(10_000_000);
        Timestamp { secs, nanos: (rem * 100) as u32 }
    }
}

/// Extended Timestamp (0x5455) record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedTimestamp {
    pub mtime: Option<Timestamp>,
    pub atime: Option<Timestamp>,
    pub ctime: Option<Timestamp>,
}

/// PKWARE Unix (0x000D) record.
#[derive(Debug, Clone, Default)]
pub struct PkWareUnixField {
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub uid: Option<u16>,
    pub gid: Option<u16>,
    pub device: Option<(u32, u32)>,
    pub link_target: Vec<u8>,
}

/// Info-ZIP Unix v1 (0x5855) record.
#[derive(Debug, Clone, Default)]
pub struct InfoZipUnix1Field {
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub uid: Option<u16>,
    pub gid: Option<u16>,
}

/// A decoded (uid, gid) pair, from either Info-ZIP Unix v2 or the "new" variant.
#[derive(Debug, Clone, Copy)]
pub struct UnixUidGid {
    pub uid: u32,
    pub gid: u32,
}

/// NTFS (0x000A) record; only the timestamps sub-record (tag 0x0001) is decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NtfsField {
    pub mtime: Option<Timestamp>,
    pub atime: Option<Timestamp>,
    pub ctime: Option<Timestamp>,
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2).map(|s| u16::from_le_bytes([s[0], s[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes.get(at..at + 4).map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    bytes.get(at..at + 8).map(|s| {
        let mut a = [0u8; 8];
        a.copy_from_slice(s);
        u64::from_le_bytes(a)
    })
}

/// Decodes an Extended Timestamp record. Lenient about location: whichever of
/// mtime/atime/ctime the flags byte marks present is read, regardless of
/// whether this copy came from the central directory or a local header.
pub fn parse_extended_timestamp(bytes: &[u8]) -> Option<ExtendedTimestamp> {
    let flags = *bytes.first()?;
    let mut offset = 1;
    let mut out = ExtendedTimestamp::default();
    if flags & 0x1 != 0 {
        out.mtime = Some(Timestamp::from_unix_secs(read_u32(bytes, offset)?));
        offset += 4;
    }
    if flags & 0x2 != 0 {
        out.atime = Some(Timestamp::from_unix_secs(read_u32(bytes, offset)?));
        offset += 4;
    }
    if flags & 0x4 != 0 {
        out.ctime = Some(Timestamp::from_unix_secs(read_u32(bytes, offset)?));
    }
    Some(out)
}

/// Decodes a PKWARE Unix (0x000D) record. `file_type_is_device` controls whether
/// the `dev` major/minor pair is expected before the (possible) symlink target.
pub fn parse_pkware_unix(bytes: &[u8], file_type_is_device: bool) -> Option<PkWareUnixField> {
    if bytes.len() < 12 {
        return None;
    }
    let atime = Timestamp::from_unix_secs(read_u32(bytes, 0)?);
    let mtime = Timestamp::from_unix_secs(read_u32(bytes, 4)?);
    let uid = read_u16(bytes, 8);
    let gid = read_u16(bytes, 10);

    if file_type_is_device {
        if bytes.len() < 20 {
            return None;
        }
        let major = read_u32(bytes, 12)?;
        let minor = read_u32(bytes, 16)?;
        return Some(PkWareUnixField { atime, mtime, uid, gid, device: Some((major, minor)), link_target: Vec::new() });
    }

    let link_target = bytes[12..].to_vec();
    Some(PkWareUnixField { atime, mtime, uid, gid, device: None, link_target })
}

/// Decodes an Info-ZIP Unix v1 (0x5855) record. uid/gid are absent if the
/// record was truncated after the two timestamps.
pub fn parse_infozip_unix1(bytes: &[u8]) -> Option<InfoZipUnix1Field> {
    if bytes.len() < 8 {
        return None;
    }
    let atime = Timestamp::from_unix_secs(read_u32(bytes, 0)?);
    let mtime = Timestamp::from_unix_secs(read_u32(bytes, 4)?);
    let uid = read_u16(bytes, 8);
    let gid = read_u16(bytes, 10);
    Some(InfoZipUnix1Field { atime, mtime, uid, gid })
}

/// Decodes an Info-ZIP Unix v2 (0x7855) record: just uid/gid, 16 bits each.
pub fn parse_infozip_unix2(bytes: &[u8]) -> Option<UnixUidGid> {
    let uid = read_u16(bytes, 0)?;
    let gid = read_u16(bytes, 2)?;
    Some(UnixUidGid { uid: uid as u32, gid: gid as u32 })
}

/// Decodes an Info-ZIP Unix "new" (0x7875) record: a version byte (must be 1)
/// followed by length-prefixed little-endian uid and gid integers.
pub fn parse_infozip_unixn(bytes: &[u8]) -> Option<UnixUidGid> {
    if bytes.first()? != &1 {
        return None;
    }
    let mut pos = 1usize;
    let uid = read_lp_uint(bytes, &mut pos)?;
    let gid = read_lp_uint(bytes, &mut pos)?;
    Some(UnixUidGid { uid, gid })
}

fn read_lp_uint(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let len = *bytes.get(*pos)? as usize;
    *pos += 1;
    let field = bytes.get(*pos..*pos + len)?;
    *pos += len;
    if field.len() > 4 && field[4..].iter().any(|&b| b != 0) {
        return None; // doesn't fit a 32-bit id
    }
    let mut buf = [0u8; 4];
    let take = field.len().min(4);
    buf[..take].copy_from_slice(&field[..take]);
    Some(u32::from_le_bytes(buf))
}

/// Decodes an NTFS (0x000A) record, skipping any sub-record other than tag 0x0001.
pub fn parse_ntfs(bytes: &[u8]) -> Option<NtfsField> {
    if bytes.len() < 4 {
        return None;
    }
    let mut pos = 4usize; // 4 reserved bytes
    let mut out = NtfsField::default();
    while pos + 4 <= bytes.len() {
        let tag = read_u16(bytes, pos)?;
        let size = read_u16(bytes, pos + 2)? as usize;
        pos += 4;
        if tag == 0x0001 && size >= 24 && pos + 24 <= bytes.len() {
            out.mtime = Some(Timestamp::from_ntfs_filetime(read_u64(bytes, pos)?));
            out.atime = Some(Timestamp::from_ntfs_filetime(read_u64(bytes, pos + 8)?));
            out.ctime = Some(Timestamp::from_ntfs_filetime(read_u64(bytes, pos + 16)?));
        }
        pos += size;
    }
    Some(out)
}

/// Tracks which extra-field records have contributed to a [`crate::data_node::DataNode`]
/// so later records can be merged against earlier ones per the precedence rules:
/// NTFS always wins for times once seen; Extended Timestamp beats PKWARE/Info-ZIP v1
/// unless NTFS already won; among uid/gid-bearing fields, the highest type id wins,
/// and a later field of the same type id overrides an earlier one of that type.
#[derive(Default)]
pub struct UnixFieldMerge {
    high_precision_time: bool,
    mtime_from_timestamp: bool,
    atime_from_timestamp: bool,
    last_processed_unix_field: Option<u16>,
}

impl UnixFieldMerge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_ntfs(&mut self, field: NtfsField, mtime: &mut Timestamp, atime: &mut Timestamp, ctime: &mut Timestamp) {
        if let Some(t) = field.mtime {
            *mtime = t;
        }
        if let Some(t) = field.atime {
            *atime = t;
        }
        if let Some(t) = field.ctime {
            *ctime = t;
        }
        if field.mtime.is_some() || field.atime.is_some() || field.ctime.is_some() {
            self.high_precision_time = true;
        }
    }

    pub fn apply_extended_timestamp(&mut self, field: ExtendedTimestamp, mtime: &mut Timestamp, atime: &mut Timestamp, ctime: &mut Timestamp) {
        if self.high_precision_time {
            return;
        }
        if let Some(t) = field.mtime {
            *mtime = t;
            self.mtime_from_timestamp = true;
        }
        if let Some(t) = field.atime {
            *atime = t;
            self.atime_from_timestamp = true;
        }
        if let Some(t) = field.ctime {
            *ctime = t;
        }
    }

    /// Applies a simple time-bearing Unix field (PKWARE or Info-ZIP v1); these
    /// never override NTFS or Extended Timestamp values already set.
    pub fn apply_simple_unix_times(&mut self, atime: Timestamp, mtime: Timestamp, out_mtime: &mut Timestamp, out_atime: &mut Timestamp) {
        if self.high_precision_time {
            return;
        }
        if !self.mtime_from_timestamp {
            *out_mtime = mtime;
        }
        if !self.atime_from_timestamp {
            *out_atime = atime;
        }
    }

    /// Applies a uid/gid-bearing field tagged `type_id`, returning `true` if it
    /// won precedence over whatever was applied before (so the caller should
    /// overwrite `uid`/`gid`).
    pub fn apply_unix_uid_gid(&mut self, type_id: u16) -> bool {
        let wins = match self.last_processed_unix_field {
            None => true,
            Some(prev) => type_id >= prev,
        };
        if wins {
            self.last_processed_unix_field = Some(type_id);
        }
        wins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ntfs_roundtrip() {
        let t = Timestamp { secs: 1560435721, nanos: 722114700 };
        let ticks = (t.secs * 10_000_000 + (t.nanos / 100) as i64) + NTFS_TO_UNIX_OFFSET_100NS;
        let back = Timestamp::from_ntfs_filetime(ticks as u64);
        assert_eq!(back, t);
    }

    #[test]
    fn extended_timestamp_mtime_only() {
        let bytes = [0x1u8, 0x01, 0x02, 0x03, 0x04];
        let ts = parse_extended_timestamp(&bytes).unwrap();
        assert!(ts.mtime.is_some());
        assert!(ts.atime.is_none());
        assert!(ts.ctime.is_none());
    }

    #[test]
    fn pkware_unix_truncated_is_none() {
        assert!(parse_pkware_unix(&[0u8; 8], false).is_none());
    }

    #[test]
    fn pkware_unix_symlink_target() {
        let mut bytes = vec![0u8; 12];
        bytes.extend_from_slice(b"target");
        let field = parse_pkware_unix(&bytes, false).unwrap();
        assert_eq!(field.link_target, b"target");
    }

    #[test]
    fn infozip_unixn_overflowing_rejected() {
        let bytes = [1u8, 5, 1, 2, 3, 4, 5, 2, 1, 2];
        assert!(parse_infozip_unixn(&bytes).is_none());
    }

    #[test]
    fn unix_field_merge_precedence_last_same_type_wins() {
        let mut m = UnixFieldMerge::new();
        assert!(m.apply_unix_uid_gid(ID_PKWARE_UNIX));
        assert!(m.apply_unix_uid_gid(ID_INFOZIP_UNIX2));
        assert!(!m.apply_unix_uid_gid(ID_PKWARE_UNIX));
        assert!(m.apply_unix_uid_gid(ID_INFOZIP_UNIX2));
    }
}
