//! PrivateSend/PrivateSend-adjacent wire messages (§4.1, §6).
//!
//! Every message is framed as `magic(4) || command(12) || length(4) ||
//! checksum(4) || payload`. Field order and widths below follow §6 exactly
//! for `version`, `dsq` and `spork`; the remaining PrivateSend messages
//! follow the same little-endian, compact-size-prefixed-vector conventions.

use rusty_crypto::hash::wire_checksum;
use rusty_shared_types::{OutPoint, TxInput, TxOutput};

use crate::error::{NetworkError, NetworkResult};
use crate::protocol::{Inventory, Network, NetworkAddress};
use crate::varint;

pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;
pub const MAX_USER_AGENT_LEN: usize = 256;
pub const MAX_ADDR_ENTRIES: usize = 1000;
pub const MAX_INV_ENTRIES: usize = 50_000;
pub const MAX_DSI_ENTRIES: usize = 9;
pub const SPORK_SIG_LEN: usize = 65;
pub const DSQ_SIG_LEN: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: [u8; 4],
    pub command: [u8; 12],
    pub length: u32,
    pub checksum: [u8; 4],
}

impl MessageHeader {
    pub const ENCODED_LEN: usize = 24;

    pub fn new(network: Network, command: &str, payload: &[u8]) -> NetworkResult<Self> {
        if command.len() > 12 {
            return Err(NetworkError::Protocol(format!("command name {command:?} too long")));
        }
        let mut bytes = [0u8; 12];
        bytes[..command.len()].copy_from_slice(command.as_bytes());
        Ok(Self {
            magic: network.magic(),
            command: bytes,
            length: payload.len() as u32,
            checksum: wire_checksum(payload),
        })
    }

    pub fn command_str(&self) -> NetworkResult<&str> {
        let end = self.command.iter().position(|&b| b == 0).unwrap_or(self.command.len());
        std::str::from_utf8(&self.command[..end])
            .map_err(|e| NetworkError::Protocol(format!("non-utf8 command: {e}")))
    }

    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        self.checksum == wire_checksum(payload)
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.magic);
        out[4..16].copy_from_slice(&self.command);
        out[16..20].copy_from_slice(&self.length.to_le_bytes());
        out[20..24].copy_from_slice(&self.checksum);
        out
    }

    pub fn decode(buf: &[u8; Self::ENCODED_LEN]) -> Self {
        Self {
            magic: buf[0..4].try_into().unwrap(),
            command: buf[4..16].try_into().unwrap(),
            length: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            checksum: buf[20..24].try_into().unwrap(),
        }
    }
}

fn encode_varstring(s: &str, max_len: usize, out: &mut Vec<u8>) -> NetworkResult<()> {
    if s.len() > max_len {
        return Err(NetworkError::OversizedField {
            what: "varstring",
            len: s.len(),
            max: max_len,
        });
    }
    varint::encode_bytes(s.as_bytes(), out);
    Ok(())
}

fn decode_varstring(buf: &[u8], max_len: usize) -> NetworkResult<(String, usize)> {
    let (bytes, consumed) = varint::decode_bytes(buf, max_len)?;
    let s = String::from_utf8(bytes).map_err(|e| NetworkError::Protocol(e.to_string()))?;
    Ok((s, consumed))
}

fn encode_outpoint(outpoint: &OutPoint, out: &mut Vec<u8>) {
    out.extend_from_slice(&outpoint.txid);
    out.extend_from_slice(&outpoint.vout.to_le_bytes());
}

fn decode_outpoint(buf: &[u8]) -> NetworkResult<(OutPoint, usize)> {
    let txid: [u8; 32] = buf.get(0..32).ok_or(NetworkError::UnexpectedEof)?.try_into().unwrap();
    let vout_bytes = buf.get(32..36).ok_or(NetworkError::UnexpectedEof)?;
    let vout = u32::from_le_bytes(vout_bytes.try_into().unwrap());
    Ok((OutPoint::new(txid, vout), 36))
}

fn encode_tx_input(input: &TxInput, out: &mut Vec<u8>) {
    encode_outpoint(&input.previous_output, out);
    varint::encode_bytes(&input.script_sig, out);
    out.extend_from_slice(&input.sequence.to_le_bytes());
}

fn decode_tx_input(buf: &[u8]) -> NetworkResult<(TxInput, usize)> {
    let (previous_output, mut offset) = decode_outpoint(buf)?;
    let (script_sig, consumed) = varint::decode_bytes(&buf[offset..], 10_000)?;
    offset += consumed;
    let sequence_bytes = buf.get(offset..offset + 4).ok_or(NetworkError::UnexpectedEof)?;
    let sequence = u32::from_le_bytes(sequence_bytes.try_into().unwrap());
    offset += 4;
    Ok((
        TxInput {
            previous_output,
            script_sig,
            sequence,
        },
        offset,
    ))
}

fn encode_tx_output(output: &TxOutput, out: &mut Vec<u8>) {
    out.extend_from_slice(&output.value.to_le_bytes());
    varint::encode_bytes(&output.script_pubkey, out);
}

fn decode_tx_output(buf: &[u8]) -> NetworkResult<(TxOutput, usize)> {
    let value_bytes = buf.get(0..8).ok_or(NetworkError::UnexpectedEof)?;
    let value = u64::from_le_bytes(value_bytes.try_into().unwrap());
    let (script_pubkey, consumed) = varint::decode_bytes(&buf[8..], 10_000)?;
    Ok((TxOutput { value, script_pubkey }, 8 + consumed))
}

fn encode_vec<T>(items: &[T], max: usize, what: &'static str, encode_one: impl Fn(&T, &mut Vec<u8>), out: &mut Vec<u8>) -> NetworkResult<()> {
    if items.len() > max {
        return Err(NetworkError::OversizedField { what, len: items.len(), max });
    }
    varint::encode(items.len() as u64, out);
    for item in items {
        encode_one(item, out);
    }
    Ok(())
}

fn decode_vec<T>(
    buf: &[u8],
    max: usize,
    what: &'static str,
    decode_one: impl Fn(&[u8]) -> NetworkResult<(T, usize)>,
) -> NetworkResult<(Vec<T>, usize)> {
    let (count, mut offset) = varint::decode(buf)?;
    if count as usize > max {
        return Err(NetworkError::OversizedField { what, len: count as usize, max });
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (item, consumed) = decode_one(&buf[offset..])?;
        items.push(item);
        offset += consumed;
    }
    Ok((items, offset))
}

/// PrivateSend pool state as reported by the masternode (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Queue,
    AcceptingEntries,
    Signing,
    Error,
    Success,
}

impl PoolState {
    fn to_u8(self) -> u8 {
        match self {
            PoolState::Idle => 0,
            PoolState::Queue => 1,
            PoolState::AcceptingEntries => 2,
            PoolState::Signing => 3,
            PoolState::Error => 4,
            PoolState::Success => 5,
        }
    }

    fn from_u8(value: u8) -> NetworkResult<Self> {
        Ok(match value {
            0 => PoolState::Idle,
            1 => PoolState::Queue,
            2 => PoolState::AcceptingEntries,
            3 => PoolState::Signing,
            4 => PoolState::Error,
            5 => PoolState::Success,
            other => return Err(NetworkError::Protocol(format!("unknown pool state {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionPayload {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub recv: NetworkAddress,
    pub trans: NetworkAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SporkPayload {
    pub id: i32,
    pub value: i64,
    pub time_signed: i64,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DsqPayload {
    pub denom: i32,
    pub masternode_outpoint: OutPoint,
    pub time: i64,
    pub ready: bool,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DsaPayload {
    pub denom: i32,
    pub pay_collateral_tx: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DsiPayload {
    pub inputs: Vec<TxInput>,
    pub pay_collateral_tx: Vec<u8>,
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DssuPayload {
    pub session_id: i32,
    pub state: u8,
    pub entries_count: i32,
    pub status_update: i32,
    pub message_id: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DscPayload {
    pub session_id: i32,
    pub message_id: i32,
}

pub const MSG_SUCCESS: i32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    Ping(u64),
    Pong(u64),
    Addr(Vec<NetworkAddress>),
    Inv(Vec<Inventory>),
    GetData(Vec<Inventory>),
    Spork(SporkPayload),
    GetSporks,
    SendDsq(bool),
    Dsa(DsaPayload),
    Dsi(DsiPayload),
    /// `dsf`: the finalized multi-party transaction, raw-serialized.
    Dsf { session_id: i32, final_tx: Vec<u8> },
    /// `dss`: our signed inputs.
    Dss(Vec<TxInput>),
    Dsc(DscPayload),
    Dsq(DsqPayload),
    Dssu(DssuPayload),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Addr(_) => "addr",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Spork(_) => "spork",
            Message::GetSporks => "getsporks",
            Message::SendDsq(_) => "senddsq",
            Message::Dsa(_) => "dsa",
            Message::Dsi(_) => "dsi",
            Message::Dsf { .. } => "dsf",
            Message::Dss(_) => "dss",
            Message::Dsc(_) => "dsc",
            Message::Dsq(_) => "dsq",
            Message::Dssu(_) => "dssu",
        }
    }

    pub fn encode_payload(&self) -> NetworkResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Message::Version(v) => {
                out.extend_from_slice(&v.version.to_le_bytes());
                out.extend_from_slice(&v.services.to_le_bytes());
                out.extend_from_slice(&v.timestamp.to_le_bytes());
                v.recv.encode(&mut out);
                v.trans.encode(&mut out);
                out.extend_from_slice(&v.nonce.to_le_bytes());
                encode_varstring(&v.user_agent, MAX_USER_AGENT_LEN, &mut out)?;
                out.extend_from_slice(&v.start_height.to_le_bytes());
                out.push(v.relay as u8);
            }
            Message::Verack | Message::GetSporks => {}
            Message::Ping(nonce) | Message::Pong(nonce) => out.extend_from_slice(&nonce.to_le_bytes()),
            Message::Addr(addrs) => {
                encode_vec(addrs, MAX_ADDR_ENTRIES, "addr", |a, out| a.encode(out), &mut out)?
            }
            Message::Inv(items) | Message::GetData(items) => {
                encode_vec(items, MAX_INV_ENTRIES, "inv", |i, out| i.encode(out), &mut out)?
            }
            Message::Spork(s) => {
                if s.signature.len() != SPORK_SIG_LEN {
                    return Err(NetworkError::Protocol(format!(
                        "spork signature must be {SPORK_SIG_LEN} bytes, got {}",
                        s.signature.len()
                    )));
                }
                out.extend_from_slice(&s.id.to_le_bytes());
                out.extend_from_slice(&s.value.to_le_bytes());
                out.extend_from_slice(&s.time_signed.to_le_bytes());
                varint::encode_bytes(&s.signature, &mut out);
            }
            Message::SendDsq(enable) => out.push(*enable as u8),
            Message::Dsa(d) => {
                out.extend_from_slice(&d.denom.to_le_bytes());
                varint::encode_bytes(&d.pay_collateral_tx, &mut out);
            }
            Message::Dsi(d) => {
                encode_vec(&d.inputs, MAX_DSI_ENTRIES, "dsi inputs", encode_tx_input, &mut out)?;
                varint::encode_bytes(&d.pay_collateral_tx, &mut out);
                encode_vec(&d.outputs, MAX_DSI_ENTRIES, "dsi outputs", encode_tx_output, &mut out)?;
            }
            Message::Dsf { session_id, final_tx } => {
                out.extend_from_slice(&session_id.to_le_bytes());
                varint::encode_bytes(final_tx, &mut out);
            }
            Message::Dss(inputs) => {
                encode_vec(inputs, MAX_DSI_ENTRIES, "dss inputs", encode_tx_input, &mut out)?
            }
            Message::Dsc(d) => {
                out.extend_from_slice(&d.session_id.to_le_bytes());
                out.extend_from_slice(&d.message_id.to_le_bytes());
            }
            Message::Dsq(d) => {
                if d.signature.len() != DSQ_SIG_LEN {
                    return Err(NetworkError::Protocol(format!(
                        "dsq signature must be {DSQ_SIG_LEN} bytes, got {}",
                        d.signature.len()
                    )));
                }
                out.extend_from_slice(&d.denom.to_le_bytes());
                encode_outpoint(&d.masternode_outpoint, &mut out);
                out.extend_from_slice(&d.time.to_le_bytes());
                out.push(d.ready as u8);
                varint::encode_bytes(&d.signature, &mut out);
            }
            Message::Dssu(d) => {
                out.extend_from_slice(&d.session_id.to_le_bytes());
                out.push(d.state);
                out.extend_from_slice(&d.entries_count.to_le_bytes());
                out.extend_from_slice(&d.status_update.to_le_bytes());
                out.extend_from_slice(&d.message_id.to_le_bytes());
            }
        }
        Ok(out)
    }

    pub fn decode_payload(command: &str, buf: &[u8]) -> NetworkResult<Self> {
        let message = match command {
            "version" => {
                let mut offset = 0usize;
                let version = i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
                offset += 4;
                let services = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
                offset += 8;
                let timestamp = i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
                offset += 8;
                let (recv, consumed) = NetworkAddress::decode(&buf[offset..])?;
                offset += consumed;
                let (trans, consumed) = NetworkAddress::decode(&buf[offset..])?;
                offset += consumed;
                let nonce = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
                offset += 8;
                let (user_agent, consumed) = decode_varstring(&buf[offset..], MAX_USER_AGENT_LEN)?;
                offset += consumed;
                let start_height = i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
                offset += 4;
                let relay = *buf.get(offset).ok_or(NetworkError::UnexpectedEof)? != 0;
                offset += 1;
                if offset != buf.len() {
                    return Err(NetworkError::TrailingBytes);
                }
                Message::Version(VersionPayload {
                    version,
                    services,
                    timestamp,
                    recv,
                    trans,
                    nonce,
                    user_agent,
                    start_height,
                    relay,
                })
            }
            "verack" => {
                require_empty(buf)?;
                Message::Verack
            }
            "getsporks" => {
                require_empty(buf)?;
                Message::GetSporks
            }
            "ping" => Message::Ping(decode_u64(buf)?),
            "pong" => Message::Pong(decode_u64(buf)?),
            "senddsq" => Message::SendDsq(*buf.first().ok_or(NetworkError::UnexpectedEof)? != 0),
            "addr" => {
                let (addrs, consumed) = decode_vec(buf, MAX_ADDR_ENTRIES, "addr", NetworkAddress::decode)?;
                if consumed != buf.len() {
                    return Err(NetworkError::TrailingBytes);
                }
                Message::Addr(addrs)
            }
            "inv" | "getdata" => {
                let (items, consumed) = decode_vec(buf, MAX_INV_ENTRIES, "inv", Inventory::decode)?;
                if consumed != buf.len() {
                    return Err(NetworkError::TrailingBytes);
                }
                if command == "inv" {
                    Message::Inv(items)
                } else {
                    Message::GetData(items)
                }
            }
            "spork" => {
                let mut offset = 0usize;
                let id = i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
                offset += 4;
                let value = i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
                offset += 8;
                let time_signed = i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
                offset += 8;
                let (signature, consumed) = varint::decode_bytes(&buf[offset..], SPORK_SIG_LEN)?;
                offset += consumed;
                if signature.len() != SPORK_SIG_LEN {
                    return Err(NetworkError::Protocol(format!(
                        "spork signature must be {SPORK_SIG_LEN} bytes, got {}",
                        signature.len()
                    )));
                }
                if offset != buf.len() {
                    return Err(NetworkError::TrailingBytes);
                }
                Message::Spork(SporkPayload { id, value, time_signed, signature })
            }
            "dsa" => {
                let denom = i32::from_le_bytes(buf[0..4].try_into().unwrap());
                let (pay_collateral_tx, consumed) = varint::decode_bytes(&buf[4..], MAX_MESSAGE_SIZE)?;
                if 4 + consumed != buf.len() {
                    return Err(NetworkError::TrailingBytes);
                }
                Message::Dsa(DsaPayload { denom, pay_collateral_tx })
            }
            "dsi" => {
                let (inputs, mut offset) = decode_vec(buf, MAX_DSI_ENTRIES, "dsi inputs", decode_tx_input)?;
                let (pay_collateral_tx, consumed) = varint::decode_bytes(&buf[offset..], MAX_MESSAGE_SIZE)?;
                offset += consumed;
                let (outputs, consumed) = decode_vec(&buf[offset..], MAX_DSI_ENTRIES, "dsi outputs", decode_tx_output)?;
                offset += consumed;
                if offset != buf.len() {
                    return Err(NetworkError::TrailingBytes);
                }
                Message::Dsi(DsiPayload { inputs, pay_collateral_tx, outputs })
            }
            "dsf" => {
                let session_id = i32::from_le_bytes(buf[0..4].try_into().unwrap());
                let (final_tx, consumed) = varint::decode_bytes(&buf[4..], MAX_MESSAGE_SIZE)?;
                if 4 + consumed != buf.len() {
                    return Err(NetworkError::TrailingBytes);
                }
                Message::Dsf { session_id, final_tx }
            }
            "dss" => {
                let (inputs, consumed) = decode_vec(buf, MAX_DSI_ENTRIES, "dss inputs", decode_tx_input)?;
                if consumed != buf.len() {
                    return Err(NetworkError::TrailingBytes);
                }
                Message::Dss(inputs)
            }
            "dsc" => {
                if buf.len() != 8 {
                    return Err(NetworkError::TrailingBytes);
                }
                Message::Dsc(DscPayload {
                    session_id: i32::from_le_bytes(buf[0..4].try_into().unwrap()),
                    message_id: i32::from_le_bytes(buf[4..8].try_into().unwrap()),
                })
            }
            "dsq" => {
                let denom = i32::from_le_bytes(buf[0..4].try_into().unwrap());
                let (masternode_outpoint, mut offset) = decode_outpoint(&buf[4..])?;
                offset += 4;
                let time = i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
                offset += 8;
                let ready = *buf.get(offset).ok_or(NetworkError::UnexpectedEof)? != 0;
                offset += 1;
                let (signature, consumed) = varint::decode_bytes(&buf[offset..], DSQ_SIG_LEN)?;
                offset += consumed;
                if signature.len() != DSQ_SIG_LEN {
                    return Err(NetworkError::Protocol(format!(
                        "dsq signature must be {DSQ_SIG_LEN} bytes, got {}",
                        signature.len()
                    )));
                }
                if offset != buf.len() {
                    return Err(NetworkError::TrailingBytes);
                }
                Message::Dsq(DsqPayload { denom, masternode_outpoint, time, ready, signature })
            }
            "dssu" => {
                if buf.len() != 20 {
                    return Err(NetworkError::TrailingBytes);
                }
                Message::Dssu(DssuPayload {
                    session_id: i32::from_le_bytes(buf[0..4].try_into().unwrap()),
                    state: buf[4],
                    entries_count: i32::from_le_bytes(buf[5..9].try_into().unwrap()),
                    status_update: i32::from_le_bytes(buf[9..13].try_into().unwrap()),
                    message_id: i32::from_le_bytes(buf[13..17].try_into().unwrap()),
                })
            }
            other => return Err(NetworkError::UnknownCommand(other.to_string())),
        };
        Ok(message)
    }
}

fn require_empty(buf: &[u8]) -> NetworkResult<()> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(NetworkError::TrailingBytes)
    }
}

fn decode_u64(buf: &[u8]) -> NetworkResult<u64> {
    let bytes: [u8; 8] = buf.try_into().map_err(|_| NetworkError::TrailingBytes)?;
    Ok(u64::from_le_bytes(bytes))
}

impl From<PoolState> for u8 {
    fn from(value: PoolState) -> Self {
        value.to_u8()
    }
}

impl TryFrom<u8> for PoolState {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PoolState::from_u8(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let payload = msg.encode_payload().unwrap();
        let decoded = Message::decode_payload(msg.command(), &payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn ping_pong_round_trip() {
        round_trip(Message::Ping(42));
        round_trip(Message::Pong(42));
    }

    #[test]
    fn dsq_round_trips() {
        round_trip(Message::Dsq(DsqPayload {
            denom: 100_001,
            masternode_outpoint: OutPoint::new([3u8; 32], 1),
            time: 1_700_000_000,
            ready: true,
            signature: vec![7u8; DSQ_SIG_LEN],
        }));
    }

    #[test]
    fn dsq_rejects_wrong_signature_length() {
        let msg = Message::Dsq(DsqPayload {
            denom: 100_001,
            masternode_outpoint: OutPoint::new([3u8; 32], 1),
            time: 1,
            ready: true,
            signature: vec![7u8; 10],
        });
        assert!(msg.encode_payload().is_err());
    }

    #[test]
    fn inv_over_limit_is_rejected() {
        let items = vec![
            Inventory { inv_type: crate::protocol::InventoryType::Tx, hash: [0u8; 32] };
            MAX_INV_ENTRIES + 1
        ];
        assert!(Message::Inv(items).encode_payload().is_err());
    }

    #[test]
    fn dsi_over_limit_is_rejected() {
        let inputs = vec![TxInput::unsigned(OutPoint::new([1u8; 32], 0)); MAX_DSI_ENTRIES + 1];
        let msg = Message::Dsi(DsiPayload {
            inputs,
            pay_collateral_tx: vec![],
            outputs: vec![],
        });
        assert!(msg.encode_payload().is_err());
    }

    #[test]
    fn header_round_trips() {
        let payload = b"abc";
        let header = MessageHeader::new(Network::Mainnet, "ping", payload).unwrap();
        let encoded = header.encode();
        let decoded = MessageHeader::decode(&encoded);
        assert_eq!(decoded, header);
        assert!(decoded.verify_checksum(payload));
    }

    #[test]
    fn empty_payload_uses_fixed_checksum() {
        let header = MessageHeader::new(Network::Mainnet, "verack", &[]).unwrap();
        assert_eq!(header.checksum, [0x5D, 0xF6, 0xE0, 0xE2]);
    }
}
