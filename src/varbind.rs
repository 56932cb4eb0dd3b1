//! Variable bindings.

use crate::ber::{Decoder, EncodeBuf};
use crate::error::Result;
use crate::oid::Oid;
use crate::value::Value;

/// Variable binding: an OID paired with a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }

    /// VarBind with a NULL value, as carried by GET-class requests.
    pub fn null(oid: Oid) -> Self {
        Self {
            oid,
            value: Value::Null,
        }
    }

    /// Check that both halves have a canonical encoding.
    pub fn validate(&self) -> Result<()> {
        self.oid.check_encodable()?;
        self.value.validate()
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            self.value.encode(buf);
            buf.push_oid(&self.oid);
        });
    }

    /// Exact encoded size in bytes.
    pub fn encoded_size(&self) -> usize {
        let mut buf = EncodeBuf::with_capacity(64);
        self.encode(&mut buf);
        buf.len()
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;
        let oid = seq.read_oid()?;
        let value = Value::decode(&mut seq)?;
        seq.finish()?;
        Ok(VarBind { oid, value })
    }
}

impl std::fmt::Display for VarBind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.oid, self.value)
    }
}

/// Encode a VarBindList SEQUENCE.
pub fn encode_varbind_list(buf: &mut EncodeBuf, varbinds: &[VarBind]) {
    buf.push_sequence(|buf| {
        for vb in varbinds.iter().rev() {
            vb.encode(buf);
        }
    });
}

/// Decode a VarBindList SEQUENCE.
pub fn decode_varbind_list(decoder: &mut Decoder) -> Result<Vec<VarBind>> {
    let mut seq = decoder.read_sequence()?;
    let mut varbinds = Vec::new();
    while !seq.is_empty() {
        varbinds.push(VarBind::decode(&mut seq)?);
    }
    Ok(varbinds)
}

/// NULL-valued varbinds for a list of OIDs.
pub fn null_varbinds(oids: &[Oid]) -> Vec<VarBind> {
    oids.iter().cloned().map(VarBind::null).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EncodeErrorKind, Error};
    use crate::oid;

    fn list_round_trip(varbinds: &[VarBind]) -> Vec<VarBind> {
        let mut buf = EncodeBuf::new();
        encode_varbind_list(&mut buf, varbinds);
        decode_varbind_list(&mut Decoder::new(buf.finish())).unwrap()
    }

    #[test]
    fn list_preserves_order() {
        let varbinds = vec![
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 5, 0), Value::from("router")),
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 3, 0), Value::TimeTicks(42)),
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 1, 0), Value::EndOfMibView),
        ];
        assert_eq!(list_round_trip(&varbinds), varbinds);
        assert!(list_round_trip(&[]).is_empty());
    }

    #[test]
    fn encoded_size_matches_output() {
        let vb = VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0));
        let mut buf = EncodeBuf::new();
        vb.encode(&mut buf);
        assert_eq!(vb.encoded_size(), buf.finish().len());
        assert_eq!(vb.encoded_size(), 14);
    }

    #[test]
    fn trailing_value_rejected() {
        // SEQUENCE { OID 1.3, NULL, NULL }
        let data = [0x30, 0x07, 0x06, 0x01, 0x2B, 0x05, 0x00, 0x05, 0x00];
        assert!(VarBind::decode(&mut Decoder::from_slice(&data)).is_err());
    }

    #[test]
    fn invalid_oid_fails_validation() {
        let vb = VarBind::null(oid!(7, 1));
        assert!(matches!(
            vb.validate(),
            Err(Error::Encode {
                kind: EncodeErrorKind::InvalidOid
            })
        ));
    }

    #[test]
    fn display() {
        let vb = VarBind::new(oid!(1, 3, 6, 1), Value::Integer(3));
        assert_eq!(vb.to_string(), "1.3.6.1 = 3");
        assert_eq!(null_varbinds(&[oid!(1, 3)])[0].value, Value::Null);
    }
}
