//! Object identifiers.
//!
//! An [`Oid`] is a sequence of unsigned 32-bit arcs. Ordering is
//! lexicographic over arcs, which is the order agents walk the MIB in.

use std::fmt;

use smallvec::SmallVec;

use crate::error::{DecodeErrorKind, EncodeErrorKind, Error, OidErrorKind, Result};

/// Maximum number of arcs accepted on decode or parse (RFC 2578 Section 3.5).
pub const MAX_OID_LEN: usize = 128;

/// Object identifier.
///
/// Arcs are stored inline for the common case of 16 or fewer.
#[derive(Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Oid {
    arcs: SmallVec<[u32; 16]>,
}

impl Oid {
    /// The zero-length OID.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an OID from any iterator of arcs.
    pub fn new(arcs: impl IntoIterator<Item = u32>) -> Self {
        Self {
            arcs: arcs.into_iter().collect(),
        }
    }

    /// Build an OID from a slice of arcs.
    pub fn from_slice(arcs: &[u32]) -> Self {
        Self {
            arcs: SmallVec::from_slice(arcs),
        }
    }

    /// Parse dotted notation (`"1.3.6.1"`, a leading dot is allowed).
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix('.').unwrap_or(s);
        if trimmed.is_empty() {
            return Err(Error::invalid_oid_with_input(OidErrorKind::Empty, s));
        }

        let mut arcs = SmallVec::new();
        for part in trimmed.split('.') {
            let arc = part
                .parse::<u32>()
                .map_err(|_| Error::invalid_oid_with_input(OidErrorKind::InvalidArc, s))?;
            arcs.push(arc);
        }
        if arcs.len() > MAX_OID_LEN {
            return Err(Error::invalid_oid_with_input(
                OidErrorKind::TooManyArcs {
                    count: arcs.len(),
                    max: MAX_OID_LEN,
                },
                s,
            ));
        }
        Ok(Self { arcs })
    }

    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// True if `prefix` is a (non-strict) prefix of this OID.
    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.arcs.starts_with(&prefix.arcs)
    }

    /// OID with the last arc removed, or `None` for the empty OID.
    pub fn parent(&self) -> Option<Oid> {
        let (_, rest) = self.arcs.split_last()?;
        Some(Self::from_slice(rest))
    }

    /// OID with `arc` appended.
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.arcs.clone();
        arcs.push(arc);
        Self { arcs }
    }

    /// Check that the OID has a BER representation (X.690 Section 8.19).
    ///
    /// The first arc must be 0, 1 or 2, the second at most 39 below 2, and
    /// a lone arc cannot survive the first-subidentifier packing.
    pub fn validate(&self) -> Result<()> {
        match self.arcs.as_slice() {
            [] => Ok(()),
            [_] => Err(Error::invalid_oid(OidErrorKind::TooShort)),
            [first, ..] if *first > 2 => Err(Error::invalid_oid(OidErrorKind::InvalidFirstArc(*first))),
            [first, second, ..] if *first < 2 && *second >= 40 => {
                Err(Error::invalid_oid(OidErrorKind::InvalidSecondArc {
                    first: *first,
                    second: *second,
                }))
            }
            [2, second, ..] if *second > u32::MAX - 80 => {
                Err(Error::invalid_oid(OidErrorKind::InvalidSecondArc {
                    first: 2,
                    second: *second,
                }))
            }
            arcs if arcs.len() > MAX_OID_LEN => Err(Error::invalid_oid(OidErrorKind::TooManyArcs {
                count: arcs.len(),
                max: MAX_OID_LEN,
            })),
            _ => Ok(()),
        }
    }

    /// [`validate`](Self::validate) mapped to an encode error.
    pub(crate) fn check_encodable(&self) -> Result<()> {
        self.validate()
            .map_err(|_| Error::encode(EncodeErrorKind::InvalidOid))
    }

    /// BER content octets (without tag and length).
    ///
    /// Invalid first arcs are packed with wrapping arithmetic; call
    /// [`validate`](Self::validate) first when that matters.
    pub fn to_ber_smallvec(&self) -> SmallVec<[u8; 64]> {
        let mut out = SmallVec::new();
        let mut arcs = self.arcs.iter().copied();
        let first = match (arcs.next(), arcs.next()) {
            (None, _) => return out,
            (Some(a), None) => a.wrapping_mul(40),
            (Some(a), Some(b)) => a.wrapping_mul(40).wrapping_add(b),
        };
        push_subidentifier(&mut out, first);
        for arc in arcs {
            push_subidentifier(&mut out, arc);
        }
        out
    }

    pub fn to_ber(&self) -> Vec<u8> {
        self.to_ber_smallvec().to_vec()
    }

    /// Decode BER content octets.
    ///
    /// Subidentifiers with redundant leading 0x80 octets are accepted.
    pub fn from_ber(data: &[u8]) -> Result<Self> {
        let mut arcs: SmallVec<[u32; 16]> = SmallVec::new();
        let mut value: u64 = 0;
        let mut in_progress = false;

        for &byte in data {
            value = (value << 7) | u64::from(byte & 0x7F);
            in_progress = true;
            let limit = if arcs.is_empty() { u32::MAX as u64 + 80 } else { u32::MAX as u64 };
            if value > limit {
                return Err(Error::decode(0, DecodeErrorKind::InvalidOidEncoding));
            }
            if byte & 0x80 != 0 {
                continue;
            }

            if arcs.is_empty() {
                let (a, b) = match value {
                    0..40 => (0, value),
                    40..80 => (1, value - 40),
                    _ => (2, value - 80),
                };
                arcs.push(a as u32);
                arcs.push(b as u32);
            } else {
                arcs.push(value as u32);
            }
            if arcs.len() > MAX_OID_LEN {
                return Err(Error::decode(
                    0,
                    DecodeErrorKind::OidTooLong { count: arcs.len() },
                ));
            }
            value = 0;
            in_progress = false;
        }

        if in_progress {
            return Err(Error::decode(0, DecodeErrorKind::InvalidOidEncoding));
        }
        Ok(Self { arcs })
    }
}

fn push_subidentifier(out: &mut SmallVec<[u8; 64]>, value: u32) {
    let mut tmp = [0u8; 5];
    let mut i = tmp.len();
    let mut v = value;
    loop {
        i -= 1;
        tmp[i] = (v & 0x7F) as u8 | if i == tmp.len() - 1 { 0 } else { 0x80 };
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    out.extend_from_slice(&tmp[i..]);
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.arcs {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
            first = false;
        }
        Ok(())
    }
}

impl std::str::FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Self::from_slice(arcs)
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(arcs: [u32; N]) -> Self {
        Self::from_slice(&arcs)
    }
}

/// Build an [`Oid`] from literal arcs.
///
/// ```
/// use snmp_engine::oid;
/// let sys_descr = oid!(1, 3, 6, 1, 2, 1, 1, 1, 0);
/// assert_eq!(sys_descr.to_string(), "1.3.6.1.2.1.1.1.0");
/// ```
#[macro_export]
macro_rules! oid {
    ($($arc:expr),* $(,)?) => {
        $crate::oid::Oid::from_slice(&[$($arc),*])
    };
}
