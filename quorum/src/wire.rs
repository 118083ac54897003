//! Colon-delimited positional wire encoding.
//!
//! Every frame is `<proto>:<quorumID>:<subtype>:<fields…>` — a one-byte
//! protocol id (`'P'`/`'L'`/`'C'`), the quorum the message belongs to, a
//! one-byte subtype, then the subtype's fields in fixed order. Integers are
//! decimal ASCII; buffer-valued fields are `<len>:<raw bytes>` so values may
//! contain any byte, including the separator. Frames ride
//! [`LengthDelimitedCodec`] with a 4-byte length prefix.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{
    CatchupMessage, Envelope, LeaseMessage, NodeId, PaxosMessage, ProposalId, QuorumId,
    QuorumMessage, RunId, ShardId, WireError,
};

const PROTO_PAXOS: u8 = b'P';
const PROTO_LEASE: u8 = b'L';
const PROTO_CATCHUP: u8 = b'C';

const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Frame codec for [`Envelope`]s over a cluster transport connection.
#[derive(Debug)]
pub struct ClusterCodec {
    inner: LengthDelimitedCodec,
}

impl ClusterCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME)
                .new_codec(),
        }
    }
}

impl Default for ClusterCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ClusterCodec {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Decoder for ClusterCodec {
    type Item = Envelope;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(frame) => decode_envelope(&frame).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<Envelope> for ClusterCodec {
    type Error = WireError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = encode_envelope(&item);
        self.inner.encode(payload, dst)?;
        Ok(())
    }
}

/// Encode one envelope payload (without the length prefix).
#[must_use]
pub fn encode_envelope(env: &Envelope) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    match &env.message {
        QuorumMessage::Paxos(msg) => {
            put_header(&mut buf, PROTO_PAXOS, env.quorum_id);
            put_paxos(&mut buf, msg);
        }
        QuorumMessage::Lease(msg) => {
            put_header(&mut buf, PROTO_LEASE, env.quorum_id);
            put_lease(&mut buf, msg);
        }
        QuorumMessage::Catchup(msg) => {
            put_header(&mut buf, PROTO_CATCHUP, env.quorum_id);
            put_catchup(&mut buf, msg);
        }
    }
    buf.freeze()
}

/// Decode one envelope payload (without the length prefix).
pub fn decode_envelope(buf: &[u8]) -> Result<Envelope, WireError> {
    let mut r = Reader::new(buf);
    let proto = r.byte()?;
    let quorum_id = QuorumId(r.u64_field()?);
    r.sep()?;
    let subtype = r.byte()?;
    let message = match proto {
        PROTO_PAXOS => QuorumMessage::Paxos(read_paxos(subtype, &mut r)?),
        PROTO_LEASE => QuorumMessage::Lease(read_lease(subtype, &mut r)?),
        PROTO_CATCHUP => QuorumMessage::Catchup(read_catchup(subtype, &mut r)?),
        other => return Err(WireError::BadProtocol(other)),
    };
    r.finish()?;
    Ok(Envelope { quorum_id, message })
}

fn put_header(buf: &mut BytesMut, proto: u8, quorum_id: QuorumId) {
    buf.put_u8(proto);
    put_u64_field(buf, quorum_id.0);
}

fn put_u64_field(buf: &mut BytesMut, n: u64) {
    buf.put_u8(b':');
    let mut digits = [0u8; 20];
    let mut i = digits.len();
    let mut n = n;
    loop {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    buf.put_slice(&digits[i..]);
}

fn put_subtype(buf: &mut BytesMut, subtype: u8) {
    buf.put_u8(b':');
    buf.put_u8(subtype);
}

fn put_blob_field(buf: &mut BytesMut, blob: &[u8]) {
    put_u64_field(buf, blob.len() as u64);
    buf.put_u8(b':');
    buf.put_slice(blob);
}

fn put_paxos(buf: &mut BytesMut, msg: &PaxosMessage) {
    match msg {
        PaxosMessage::PrepareRequest {
            paxos_id,
            node_id,
            proposal_id,
        } => {
            put_subtype(buf, b'1');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
        }
        PaxosMessage::PrepareRejected {
            paxos_id,
            node_id,
            proposal_id,
            promised_proposal_id,
        } => {
            put_subtype(buf, b'2');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
            put_u64_field(buf, promised_proposal_id.0);
        }
        PaxosMessage::PreparePreviouslyAccepted {
            paxos_id,
            node_id,
            proposal_id,
            accepted_proposal_id,
            run_id,
            value,
        } => {
            put_subtype(buf, b'3');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
            put_u64_field(buf, accepted_proposal_id.0);
            put_u64_field(buf, run_id.0);
            put_blob_field(buf, value);
        }
        PaxosMessage::PrepareCurrentlyOpen {
            paxos_id,
            node_id,
            proposal_id,
        } => {
            put_subtype(buf, b'4');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
        }
        PaxosMessage::ProposeRequest {
            paxos_id,
            node_id,
            proposal_id,
            run_id,
            value,
        } => {
            put_subtype(buf, b'5');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
            put_u64_field(buf, run_id.0);
            put_blob_field(buf, value);
        }
        PaxosMessage::ProposeRejected {
            paxos_id,
            node_id,
            proposal_id,
        } => {
            put_subtype(buf, b'6');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
        }
        PaxosMessage::ProposeAccepted {
            paxos_id,
            node_id,
            proposal_id,
        } => {
            put_subtype(buf, b'7');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
        }
        PaxosMessage::LearnProposal {
            paxos_id,
            node_id,
            proposal_id,
        } => {
            put_subtype(buf, b'8');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
        }
        PaxosMessage::LearnValue {
            paxos_id,
            node_id,
            run_id,
            value,
        } => {
            put_subtype(buf, b'9');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, run_id.0);
            put_blob_field(buf, value);
        }
        PaxosMessage::RequestChosen { paxos_id, node_id } => {
            put_subtype(buf, b'0');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
        }
        PaxosMessage::StartCatchup { paxos_id, node_id } => {
            put_subtype(buf, b'c');
            put_u64_field(buf, *paxos_id);
            put_u64_field(buf, node_id.0);
        }
    }
}

fn read_paxos(subtype: u8, r: &mut Reader<'_>) -> Result<PaxosMessage, WireError> {
    let msg = match subtype {
        b'1' => PaxosMessage::PrepareRequest {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
        },
        b'2' => PaxosMessage::PrepareRejected {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
            promised_proposal_id: ProposalId(r.u64_field()?),
        },
        b'3' => PaxosMessage::PreparePreviouslyAccepted {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
            accepted_proposal_id: ProposalId(r.u64_field()?),
            run_id: RunId(r.u64_field()?),
            value: r.blob_field()?,
        },
        b'4' => PaxosMessage::PrepareCurrentlyOpen {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
        },
        b'5' => PaxosMessage::ProposeRequest {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
            run_id: RunId(r.u64_field()?),
            value: r.blob_field()?,
        },
        b'6' => PaxosMessage::ProposeRejected {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
        },
        b'7' => PaxosMessage::ProposeAccepted {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
        },
        b'8' => PaxosMessage::LearnProposal {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
        },
        b'9' => PaxosMessage::LearnValue {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
            run_id: RunId(r.u64_field()?),
            value: r.blob_field()?,
        },
        b'0' => PaxosMessage::RequestChosen {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
        },
        b'c' => PaxosMessage::StartCatchup {
            paxos_id: r.u64_field()?,
            node_id: NodeId(r.u64_field()?),
        },
        other => return Err(WireError::BadSubtype(other)),
    };
    Ok(msg)
}

fn put_lease(buf: &mut BytesMut, msg: &LeaseMessage) {
    match msg {
        LeaseMessage::PrepareRequest {
            node_id,
            proposal_id,
            paxos_id,
        } => {
            put_subtype(buf, b'1');
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
            put_u64_field(buf, *paxos_id);
        }
        LeaseMessage::PrepareRejected {
            node_id,
            proposal_id,
        } => {
            put_subtype(buf, b'2');
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
        }
        LeaseMessage::PreparePreviouslyAccepted {
            node_id,
            proposal_id,
            accepted_proposal_id,
            lease_owner,
            duration,
        } => {
            put_subtype(buf, b'3');
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
            put_u64_field(buf, accepted_proposal_id.0);
            put_u64_field(buf, lease_owner.0);
            put_u64_field(buf, *duration);
        }
        LeaseMessage::PrepareCurrentlyOpen {
            node_id,
            proposal_id,
        } => {
            put_subtype(buf, b'4');
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
        }
        LeaseMessage::ProposeRequest {
            node_id,
            proposal_id,
            lease_owner,
            duration,
        } => {
            put_subtype(buf, b'5');
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
            put_u64_field(buf, lease_owner.0);
            put_u64_field(buf, *duration);
        }
        LeaseMessage::ProposeRejected {
            node_id,
            proposal_id,
        } => {
            put_subtype(buf, b'6');
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
        }
        LeaseMessage::ProposeAccepted {
            node_id,
            proposal_id,
        } => {
            put_subtype(buf, b'7');
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, proposal_id.0);
        }
        LeaseMessage::LearnChosen {
            node_id,
            lease_owner,
            duration,
            local_expire_time,
        } => {
            put_subtype(buf, b'8');
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, lease_owner.0);
            put_u64_field(buf, *duration);
            put_u64_field(buf, *local_expire_time);
        }
    }
}

fn read_lease(subtype: u8, r: &mut Reader<'_>) -> Result<LeaseMessage, WireError> {
    let msg = match subtype {
        b'1' => LeaseMessage::PrepareRequest {
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
            paxos_id: r.u64_field()?,
        },
        b'2' => LeaseMessage::PrepareRejected {
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
        },
        b'3' => LeaseMessage::PreparePreviouslyAccepted {
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
            accepted_proposal_id: ProposalId(r.u64_field()?),
            lease_owner: NodeId(r.u64_field()?),
            duration: r.u64_field()?,
        },
        b'4' => LeaseMessage::PrepareCurrentlyOpen {
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
        },
        b'5' => LeaseMessage::ProposeRequest {
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
            lease_owner: NodeId(r.u64_field()?),
            duration: r.u64_field()?,
        },
        b'6' => LeaseMessage::ProposeRejected {
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
        },
        b'7' => LeaseMessage::ProposeAccepted {
            node_id: NodeId(r.u64_field()?),
            proposal_id: ProposalId(r.u64_field()?),
        },
        b'8' => LeaseMessage::LearnChosen {
            node_id: NodeId(r.u64_field()?),
            lease_owner: NodeId(r.u64_field()?),
            duration: r.u64_field()?,
            local_expire_time: r.u64_field()?,
        },
        other => return Err(WireError::BadSubtype(other)),
    };
    Ok(msg)
}

fn put_catchup(buf: &mut BytesMut, msg: &CatchupMessage) {
    match msg {
        CatchupMessage::Request { node_id, quorum_id } => {
            put_subtype(buf, b'1');
            put_u64_field(buf, node_id.0);
            put_u64_field(buf, quorum_id.0);
        }
        CatchupMessage::BeginShard { shard_id } => {
            put_subtype(buf, b'2');
            put_u64_field(buf, shard_id.0);
        }
        CatchupMessage::Set { key, value } => {
            put_subtype(buf, b'3');
            put_blob_field(buf, key);
            put_blob_field(buf, value);
        }
        CatchupMessage::Delete { key } => {
            put_subtype(buf, b'4');
            put_blob_field(buf, key);
        }
        CatchupMessage::Commit { paxos_id } => {
            put_subtype(buf, b'5');
            put_u64_field(buf, *paxos_id);
        }
        CatchupMessage::Abort => {
            put_subtype(buf, b'6');
        }
    }
}

fn read_catchup(subtype: u8, r: &mut Reader<'_>) -> Result<CatchupMessage, WireError> {
    let msg = match subtype {
        b'1' => CatchupMessage::Request {
            node_id: NodeId(r.u64_field()?),
            quorum_id: QuorumId(r.u64_field()?),
        },
        b'2' => CatchupMessage::BeginShard {
            shard_id: ShardId(r.u64_field()?),
        },
        b'3' => CatchupMessage::Set {
            key: r.blob_field()?,
            value: r.blob_field()?,
        },
        b'4' => CatchupMessage::Delete {
            key: r.blob_field()?,
        },
        b'5' => CatchupMessage::Commit {
            paxos_id: r.u64_field()?,
        },
        b'6' => CatchupMessage::Abort,
        other => return Err(WireError::BadSubtype(other)),
    };
    Ok(msg)
}

/// Positional reader over one frame.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, WireError> {
        let b = *self.buf.get(self.pos).ok_or(WireError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn sep(&mut self) -> Result<(), WireError> {
        match self.byte()? {
            b':' => Ok(()),
            _ => Err(WireError::MissingSeparator),
        }
    }

    /// `:` followed by a decimal integer.
    fn u64_field(&mut self) -> Result<u64, WireError> {
        self.sep()?;
        let start = self.pos;
        while self.pos < self.buf.len() && self.buf[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(WireError::BadInteger);
        }
        let mut n: u64 = 0;
        for &d in &self.buf[start..self.pos] {
            n = n
                .checked_mul(10)
                .and_then(|n| n.checked_add(u64::from(d - b'0')))
                .ok_or(WireError::BadInteger)?;
        }
        Ok(n)
    }

    /// `:<len>:<raw bytes>`; the bytes may contain separators.
    fn blob_field(&mut self) -> Result<Bytes, WireError> {
        let len = usize::try_from(self.u64_field()?).map_err(|_| WireError::BadInteger)?;
        self.sep()?;
        let end = self.pos.checked_add(len).ok_or(WireError::Truncated)?;
        if end > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let blob = Bytes::copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(blob)
    }

    fn finish(&self) -> Result<(), WireError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(WireError::MissingSeparator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: QuorumMessage) {
        let env = Envelope {
            quorum_id: QuorumId(7),
            message,
        };
        let bytes = encode_envelope(&env);
        let decoded = decode_envelope(&bytes).expect("decode");
        assert_eq!(decoded, env);
    }

    #[test]
    fn paxos_messages_roundtrip() {
        let value = Bytes::from_static(b"with:colons:and\0binary");
        roundtrip(
            PaxosMessage::PrepareRequest {
                paxos_id: 5,
                node_id: NodeId(1),
                proposal_id: ProposalId(0x1_0000_0101),
            }
            .into(),
        );
        roundtrip(
            PaxosMessage::PrepareRejected {
                paxos_id: 5,
                node_id: NodeId(2),
                proposal_id: ProposalId(3),
                promised_proposal_id: ProposalId(9),
            }
            .into(),
        );
        roundtrip(
            PaxosMessage::PreparePreviouslyAccepted {
                paxos_id: 5,
                node_id: NodeId(2),
                proposal_id: ProposalId(3),
                accepted_proposal_id: ProposalId(2),
                run_id: RunId(4),
                value: value.clone(),
            }
            .into(),
        );
        roundtrip(
            PaxosMessage::PrepareCurrentlyOpen {
                paxos_id: 5,
                node_id: NodeId(2),
                proposal_id: ProposalId(3),
            }
            .into(),
        );
        roundtrip(
            PaxosMessage::ProposeRequest {
                paxos_id: 5,
                node_id: NodeId(1),
                proposal_id: ProposalId(3),
                run_id: RunId(4),
                value: value.clone(),
            }
            .into(),
        );
        roundtrip(
            PaxosMessage::ProposeRejected {
                paxos_id: 5,
                node_id: NodeId(0),
                proposal_id: ProposalId(3),
            }
            .into(),
        );
        roundtrip(
            PaxosMessage::ProposeAccepted {
                paxos_id: 5,
                node_id: NodeId(0),
                proposal_id: ProposalId(3),
            }
            .into(),
        );
        roundtrip(
            PaxosMessage::LearnProposal {
                paxos_id: 5,
                node_id: NodeId(1),
                proposal_id: ProposalId(3),
            }
            .into(),
        );
        roundtrip(
            PaxosMessage::LearnValue {
                paxos_id: 5,
                node_id: NodeId(1),
                run_id: RunId(0),
                value,
            }
            .into(),
        );
        roundtrip(
            PaxosMessage::RequestChosen {
                paxos_id: 5,
                node_id: NodeId(2),
            }
            .into(),
        );
        roundtrip(
            PaxosMessage::StartCatchup {
                paxos_id: 5,
                node_id: NodeId(1),
            }
            .into(),
        );
    }

    #[test]
    fn lease_messages_roundtrip() {
        roundtrip(
            LeaseMessage::PrepareRequest {
                node_id: NodeId(1),
                proposal_id: ProposalId(42),
                paxos_id: 17,
            }
            .into(),
        );
        roundtrip(
            LeaseMessage::PreparePreviouslyAccepted {
                node_id: NodeId(2),
                proposal_id: ProposalId(42),
                accepted_proposal_id: ProposalId(40),
                lease_owner: NodeId(1),
                duration: 7000,
            }
            .into(),
        );
        roundtrip(
            LeaseMessage::ProposeRequest {
                node_id: NodeId(1),
                proposal_id: ProposalId(42),
                lease_owner: NodeId(1),
                duration: 7000,
            }
            .into(),
        );
        roundtrip(
            LeaseMessage::LearnChosen {
                node_id: NodeId(1),
                lease_owner: NodeId(1),
                duration: 6500,
                local_expire_time: 123_456,
            }
            .into(),
        );
    }

    #[test]
    fn catchup_messages_roundtrip() {
        roundtrip(
            CatchupMessage::Request {
                node_id: NodeId(3),
                quorum_id: QuorumId(7),
            }
            .into(),
        );
        roundtrip(
            CatchupMessage::BeginShard {
                shard_id: ShardId(12),
            }
            .into(),
        );
        roundtrip(
            CatchupMessage::Set {
                key: Bytes::from_static(b"k:1"),
                value: Bytes::from_static(b""),
            }
            .into(),
        );
        roundtrip(
            CatchupMessage::Delete {
                key: Bytes::from_static(b"gone"),
            }
            .into(),
        );
        roundtrip(CatchupMessage::Commit { paxos_id: 12345 }.into());
        roundtrip(CatchupMessage::Abort.into());
    }

    #[test]
    fn wire_layout_is_stable() {
        let env = Envelope {
            quorum_id: QuorumId(7),
            message: PaxosMessage::PrepareRequest {
                paxos_id: 5,
                node_id: NodeId(1),
                proposal_id: ProposalId(99),
            }
            .into(),
        };
        assert_eq!(&encode_envelope(&env)[..], b"P:7:1:5:1:99");
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(
            decode_envelope(b"X:7:1:5:1:99"),
            Err(WireError::BadProtocol(b'X'))
        ));
        assert!(matches!(
            decode_envelope(b"P:7:z:5"),
            Err(WireError::BadSubtype(b'z'))
        ));
        assert!(matches!(
            decode_envelope(b"P:7:1:5:1"),
            Err(WireError::MissingSeparator | WireError::Truncated)
        ));
        assert!(matches!(
            decode_envelope(b"P:7:1:5:1:xy"),
            Err(WireError::BadInteger)
        ));
        // blob length overruns the frame
        assert!(matches!(
            decode_envelope(b"C:7:4:100:ab"),
            Err(WireError::Truncated)
        ));
    }

    #[test]
    fn framed_codec_roundtrip() {
        let mut codec = ClusterCodec::new();
        let env = Envelope {
            quorum_id: QuorumId(1),
            message: CatchupMessage::Set {
                key: Bytes::from_static(b"key"),
                value: Bytes::from_static(b"value"),
            }
            .into(),
        };
        let mut framed = BytesMut::new();
        codec.encode(env.clone(), &mut framed).expect("encode");
        // partial frame decodes to None
        let mut partial = BytesMut::from(&framed[..3]);
        assert!(codec.decode(&mut partial).expect("partial").is_none());
        let decoded = codec.decode(&mut framed).expect("decode").expect("frame");
        assert_eq!(decoded, env);
        assert!(framed.is_empty());
    }
}
