//! Protocol configuration options (24.008 §10.5.6.3) and the PPP-family
//! packets carried inside them (IPCP/NCP, PAP, CHAP).

use crate::codec::{NasDecodeError, Reader, Writer};

/// Container protocol identifiers.
pub mod element_id {
	pub const IPCP: u16 = 0x8021;
	pub const LCP: u16 = 0xC021;
	pub const PAP: u16 = 0xC023;
	pub const CHAP: u16 = 0xC223;
	pub const DNS_IPV6: u16 = 0x0003;
	pub const IP_ALLOC_VIA_NAS: u16 = 0x000A;
	pub const DNS_IPV4: u16 = 0x000D;
	pub const IPV4_LINK_MTU: u16 = 0x0010;
	pub const NON_IP_LINK_MTU: u16 = 0x0015;
}

/// PPP configuration protocol codes shared by NCP/PAP/CHAP containers.
pub mod ppp_code {
	pub const CONFIGURE_REQUEST: u8 = 1;
	pub const CONFIGURE_ACK: u8 = 2;
	pub const CONFIGURE_NAK: u8 = 3;
	pub const PAP_AUTHENTICATE_REQUEST: u8 = 1;
	pub const PAP_AUTHENTICATE_ACK: u8 = 2;
	pub const PAP_AUTHENTICATE_NAK: u8 = 3;
	pub const CHAP_RESPONSE: u8 = 2;
	pub const CHAP_SUCCESS: u8 = 3;
	pub const CHAP_FAILURE: u8 = 4;
}

/// NCP option types answered inside an IPCP container.
pub mod ncp_option {
	pub const IP_ADDRESS: u8 = 3;
	pub const PRIMARY_DNS: u8 = 129;
	pub const SECONDARY_DNS: u8 = 131;
}

pub const CONFIG_PROTO_PPP_IP: u8 = 0;

/// Whole PCO IE: the configuration protocol octet and an ordered list of
/// elements, answered in order by the session layer.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Pco {
	pub config_proto: u8,
	pub elements: Vec<PcoElement>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcoElement {
	pub id: u16,
	pub data: Vec<u8>,
}

impl Pco {
	pub fn encode(&self) -> Vec<u8> {
		let mut w = Writer::new();
		// extension bit always set on the header octet
		w.u8(0x80 | (self.config_proto & 0x7));
		for el in &self.elements {
			w.u16(el.id);
			w.lv(&el.data);
		}
		w.finish().to_vec()
	}

	pub fn decode(buf: &[u8]) -> Result<Self, NasDecodeError> {
		let mut r = Reader::new(buf);
		let config_proto = r.u8()? & 0x7;
		let mut elements = Vec::new();
		while !r.is_empty() {
			let id = r.u16()?;
			let data = r.lv()?.to_vec();
			elements.push(PcoElement { id, data });
		}
		Ok(Pco { config_proto, elements })
	}
}

/// IPCP packet: an NCP header plus its option list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NcpPacket {
	pub code: u8,
	pub id: u8,
	pub options: Vec<NcpOption>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NcpOption {
	pub kind: u8,
	pub data: Vec<u8>,
}

impl NcpPacket {
	pub fn encode(&self) -> Vec<u8> {
		let mut opts = Writer::new();
		for opt in &self.options {
			opts.u8(opt.kind);
			// option length covers type and length octets
			opts.u8(opt.data.len() as u8 + 2);
			opts.bytes(&opt.data);
		}
		let opts = opts.finish();
		let mut w = Writer::new();
		w.u8(self.code);
		w.u8(self.id);
		w.u16(opts.len() as u16 + 4);
		w.bytes(&opts);
		w.finish().to_vec()
	}

	pub fn decode(buf: &[u8]) -> Result<Self, NasDecodeError> {
		let mut r = Reader::new(buf);
		let code = r.u8()?;
		let id = r.u8()?;
		let len = r.u16()? as usize;
		if len < 4 || len > buf.len() {
			return Err(NasDecodeError::InvalidIe);
		}
		let mut opts = Reader::new(r.take(len - 4)?);
		let mut options = Vec::new();
		while !opts.is_empty() {
			let kind = opts.u8()?;
			let olen = opts.u8()? as usize;
			if olen < 2 {
				return Err(NasDecodeError::InvalidIe);
			}
			options.push(NcpOption { kind, data: opts.take(olen - 2)?.to_vec() });
		}
		Ok(NcpPacket { code, id, options })
	}
}

/// PAP packet. Requests carry peer-id and password; responses a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PapPacket {
	pub code: u8,
	pub id: u8,
	pub peer_id: Vec<u8>,
	pub password: Vec<u8>,
}

impl PapPacket {
	pub fn decode(buf: &[u8]) -> Result<Self, NasDecodeError> {
		let mut r = Reader::new(buf);
		let code = r.u8()?;
		let id = r.u8()?;
		let _len = r.u16()?;
		let (peer_id, password) = if code == ppp_code::PAP_AUTHENTICATE_REQUEST {
			(r.lv()?.to_vec(), r.lv()?.to_vec())
		} else {
			(Vec::new(), Vec::new())
		};
		Ok(PapPacket { code, id, peer_id, password })
	}

	/// Ack / Nak response with an optional message field.
	pub fn encode_response(code: u8, id: u8, msg: &[u8]) -> Vec<u8> {
		let mut w = Writer::new();
		w.u8(code);
		w.u8(id);
		w.u16(msg.len() as u16 + 5);
		w.lv(msg);
		w.finish().to_vec()
	}
}

/// CHAP packet, handled opaquely (challenge data is never inspected).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChapPacket {
	pub code: u8,
	pub id: u8,
	pub data: Vec<u8>,
}

impl ChapPacket {
	pub fn decode(buf: &[u8]) -> Result<Self, NasDecodeError> {
		let mut r = Reader::new(buf);
		let code = r.u8()?;
		let id = r.u8()?;
		let _len = r.u16()?;
		Ok(ChapPacket { code, id, data: r.rest().to_vec() })
	}

	pub fn encode_result(code: u8, id: u8) -> Vec<u8> {
		let mut w = Writer::new();
		w.u8(code);
		w.u8(id);
		w.u16(4);
		w.finish().to_vec()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pco_roundtrip() {
		let pco = Pco {
			config_proto: CONFIG_PROTO_PPP_IP,
			elements: vec![
				PcoElement { id: element_id::IP_ALLOC_VIA_NAS, data: vec![] },
				PcoElement { id: element_id::DNS_IPV4, data: vec![] },
				PcoElement { id: element_id::IPV4_LINK_MTU, data: vec![] },
			],
		};
		assert_eq!(Pco::decode(&pco.encode()).unwrap(), pco);
	}

	#[test]
	fn ncp_roundtrip() {
		let pkt = NcpPacket {
			code: ppp_code::CONFIGURE_REQUEST,
			id: 7,
			options: vec![
				NcpOption { kind: ncp_option::IP_ADDRESS, data: vec![0, 0, 0, 0] },
				NcpOption { kind: ncp_option::PRIMARY_DNS, data: vec![0, 0, 0, 0] },
			],
		};
		assert_eq!(NcpPacket::decode(&pkt.encode()).unwrap(), pkt);
	}

	#[test]
	fn pap_request_decode() {
		// code 1, id 3, len, peer-id "user", password "pass"
		let mut raw = vec![1, 3, 0, 14];
		raw.push(4);
		raw.extend_from_slice(b"user");
		raw.push(4);
		raw.extend_from_slice(b"pass");
		let pkt = PapPacket::decode(&raw).unwrap();
		assert_eq!(pkt.peer_id, b"user");
		assert_eq!(pkt.password, b"pass");
	}

	#[test]
	fn chap_result_is_header_only() {
		let raw = ChapPacket::encode_result(ppp_code::CHAP_SUCCESS, 9);
		let pkt = ChapPacket::decode(&raw).unwrap();
		assert_eq!(pkt.code, ppp_code::CHAP_SUCCESS);
		assert_eq!(pkt.id, 9);
		assert!(pkt.data.is_empty());
	}
}
