use super::error::{Result, StoreError};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Closed time interval identifying one session occurrence for a key.
///
/// Windows are value types: equality requires both bounds to match and
/// ordering is by start, then end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionWindow {
    start: i64,
    end: i64,
}

impl SessionWindow {
    /// Create a window over `[start, end]` (epoch milliseconds)
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(StoreError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// True if this window overlaps the closed interval `[earliest, latest]`
    pub fn overlaps(&self, earliest: i64, latest: i64) -> bool {
        self.start <= latest && self.end >= earliest
    }
}

/// A key scoped to the session window it belongs to.
///
/// Two puts with the same `(key, window)` pair address the same logical
/// record; the later one overwrites.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowedKey<K> {
    pub key: K,
    pub window: SessionWindow,
}

impl<K> WindowedKey<K> {
    pub fn new(key: K, window: SessionWindow) -> Self {
        Self { key, window }
    }
}

/// Byte width of the window suffix in the binary layout (start + end)
const WINDOW_SUFFIX_LEN: usize = 16;

const SIGN_BIT: u64 = 1 << 63;

/// Order-preserving u64 image of an i64 timestamp: flipping the sign bit
/// maps i64::MIN..=i64::MAX onto 0..=u64::MAX monotonically, so negative
/// timestamps sort below positive ones in big-endian byte order.
fn ts_to_bits(ts: i64) -> u64 {
    (ts as u64) ^ SIGN_BIT
}

fn bits_to_ts(bits: u64) -> i64 {
    (bits ^ SIGN_BIT) as i64
}

/// Binary layout for a windowed key: `key bytes ++ start u64 BE ++ end u64 BE`,
/// both bounds sign-flipped via [`ts_to_bits`].
///
/// The fixed 16-byte suffix keeps decoding unambiguous for variable-length
/// keys, and the sign-flipped big-endian bounds make lexicographic byte order
/// agree with `(key, start, end)` order for same-length keys, negative
/// timestamps included.
pub(crate) fn encode_windowed(key_bytes: &[u8], window: SessionWindow) -> Bytes {
    let mut buf = BytesMut::with_capacity(key_bytes.len() + WINDOW_SUFFIX_LEN);
    buf.put_slice(key_bytes);
    buf.put_u64(ts_to_bits(window.start()));
    buf.put_u64(ts_to_bits(window.end()));
    buf.freeze()
}

/// Split an encoded windowed key back into key bytes and window
pub(crate) fn decode_windowed(encoded: &[u8]) -> (&[u8], SessionWindow) {
    debug_assert!(encoded.len() >= WINDOW_SUFFIX_LEN);
    let split = encoded.len() - WINDOW_SUFFIX_LEN;
    let (key, suffix) = encoded.split_at(split);
    let start = bits_to_ts(u64::from_be_bytes(suffix[..8].try_into().unwrap()));
    let end = bits_to_ts(u64::from_be_bytes(suffix[8..].try_into().unwrap()));
    (key, SessionWindow { start, end })
}

/// Lower/upper bounds for a prefix range scan over encoded windowed keys
/// with windows starting no later than `latest`. The range over-approximates
/// for variable-length keys, so callers filter with [`matches_query`].
pub(crate) fn scan_bounds(key_bytes: &[u8], latest: i64) -> (Bytes, Bytes) {
    let lower = encode_windowed(
        key_bytes,
        SessionWindow {
            start: i64::MIN,
            end: i64::MIN,
        },
    );
    let upper = encode_windowed(
        key_bytes,
        SessionWindow {
            start: latest.saturating_add(1),
            end: i64::MIN,
        },
    );
    (lower, upper)
}

/// If `encoded` is exactly `key_bytes` with a window overlapping
/// `[earliest, latest]`, return that window.
pub(crate) fn matches_query(
    encoded: &[u8],
    key_bytes: &[u8],
    earliest: i64,
    latest: i64,
) -> Option<SessionWindow> {
    if encoded.len() != key_bytes.len() + WINDOW_SUFFIX_LEN {
        return None;
    }
    let (key, window) = decode_windowed(encoded);
    if key == key_bytes && window.overlaps(earliest, latest) {
        Some(window)
    } else {
        None
    }
}
