//! Outer NAS security-protected framing (24.301 §9.1/§9.2).
//!
//! The first octet of every EPS NAS message carries a 4-bit security header
//! and the protocol discriminator. Protected EMM messages prepend a 32-bit
//! MAC and an 8-bit sequence number to the inner message; the short Service
//! Request form packs KSI, a 5-bit sequence and a 16-bit short MAC into two
//! octets.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{NasDecodeError, Reader};

pub const PD_EMM: u8 = 7;
pub const PD_ESM: u8 = 2;

pub const SH_PLAIN: u8 = 0;
pub const SH_INTEGRITY: u8 = 1;
pub const SH_INTEGRITY_CIPHERED: u8 = 2;
pub const SH_INTEGRITY_NEW: u8 = 3;
pub const SH_INTEGRITY_CIPHERED_NEW: u8 = 4;
pub const SH_SERVICE_REQUEST: u8 = 12;

/// Outcome of parsing the outer octets of an uplink NAS buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NasFrame {
	/// SH = 0, the whole buffer is the inner message.
	Plain { pd: u8, buf: Bytes },

	/// SH ∈ {1, 2, 3, 4}: integrity protected, possibly ciphered.
	Secured(SecuredFrame),

	/// SH = 12: short Service Request form.
	ServiceRequest(ShortServiceRequest),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecuredFrame {
	pub sh: u8,
	pub mac: [u8; 4],
	pub seq: u8,
	/// Inner message, still ciphered when `sh` ∈ {2, 4}.
	pub payload: Bytes,
}

impl SecuredFrame {
	pub fn ciphered(&self) -> bool {
		matches!(self.sh, SH_INTEGRITY_CIPHERED | SH_INTEGRITY_CIPHERED_NEW)
	}

	/// Octets covered by the MAC: the sequence number followed by the
	/// payload in its on-the-wire (ciphered) form.
	pub fn mac_input(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(1 + self.payload.len());
		out.push(self.seq);
		out.extend_from_slice(&self.payload);
		out
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShortServiceRequest {
	pub ksi: u8,
	pub seq: u8,
	pub mac: u16,
}

impl ShortServiceRequest {
	/// The short MAC covers the two visible octets of the message.
	pub fn mac_input(&self) -> [u8; 2] {
		[(SH_SERVICE_REQUEST << 4) | PD_EMM, (self.ksi << 5) | (self.seq & 0x1F)]
	}

	pub fn encode(&self) -> Bytes {
		let mut b = BytesMut::with_capacity(4);
		b.put_u8((SH_SERVICE_REQUEST << 4) | PD_EMM);
		b.put_u8((self.ksi << 5) | (self.seq & 0x1F));
		b.put_u16(self.mac);
		b.freeze()
	}
}

/// Splits the outer security layer off an uplink NAS buffer.
pub fn parse_outer(buf: &[u8]) -> Result<NasFrame, NasDecodeError> {
	let mut r = Reader::new(buf);
	let first = r.u8()?;
	let (sh, pd) = (first >> 4, first & 0xF);
	match (sh, pd) {
		(SH_PLAIN, PD_EMM) | (SH_PLAIN, PD_ESM) => {
			Ok(NasFrame::Plain { pd, buf: Bytes::copy_from_slice(buf) })
		}
		(SH_PLAIN, _) => Err(NasDecodeError::UnknownProtocolDiscriminator(pd)),
		(SH_SERVICE_REQUEST, PD_EMM) => {
			let b = r.u8()?;
			let mac = r.u16()?;
			Ok(NasFrame::ServiceRequest(ShortServiceRequest {
				ksi: b >> 5,
				seq: b & 0x1F,
				mac,
			}))
		}
		(SH_INTEGRITY..=SH_INTEGRITY_CIPHERED_NEW, PD_EMM) => {
			let mac = r.array::<4>()?;
			let seq = r.u8()?;
			let payload = Bytes::copy_from_slice(r.rest());
			Ok(NasFrame::Secured(SecuredFrame { sh, mac, seq, payload }))
		}
		_ => Err(NasDecodeError::InvalidSecurityHeader(sh)),
	}
}

/// Frames a downlink inner message under the given security header. The MAC
/// is computed by the caller over `seq || payload` and patched in here.
pub fn build_secured(sh: u8, mac: [u8; 4], seq: u8, payload: &[u8]) -> Bytes {
	let mut b = BytesMut::with_capacity(6 + payload.len());
	b.put_u8((sh << 4) | PD_EMM);
	b.put_slice(&mac);
	b.put_u8(seq);
	b.put_slice(payload);
	b.freeze()
}

/// Reconstructs the full 32-bit uplink count from the stored count and the
/// received 8-bit sequence number. A reconstruction below the stored count
/// means the 8-bit sequence wrapped, so the overflow part advances by one.
pub fn reconstruct_ul(stored: u32, sqn: u8) -> u32 {
	let cand = (stored & 0xFFFF_FF00) | sqn as u32;
	if cand < stored { cand.wrapping_add(0x100) } else { cand }
}

/// Short-form variant: 5-bit sequence, 27-bit overflow.
pub fn reconstruct_ul_short(stored: u32, sqn: u8) -> u32 {
	let cand = (stored & 0xFFFF_FFE0) | (sqn & 0x1F) as u32;
	if cand < stored { cand.wrapping_add(0x20) } else { cand }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plain_frame_keeps_whole_buffer() {
		let buf = [0x07, 0x41, 0xAA];
		match parse_outer(&buf).unwrap() {
			NasFrame::Plain { pd, buf } => {
				assert_eq!(pd, PD_EMM);
				assert_eq!(&buf[..], &[0x07, 0x41, 0xAA]);
			}
			other => panic!("unexpected frame {other:?}"),
		}
	}

	#[test]
	fn secured_frame_roundtrip() {
		let framed = build_secured(SH_INTEGRITY_CIPHERED, [1, 2, 3, 4], 9, &[0xDE, 0xAD]);
		match parse_outer(&framed).unwrap() {
			NasFrame::Secured(f) => {
				assert_eq!(f.sh, SH_INTEGRITY_CIPHERED);
				assert_eq!(f.mac, [1, 2, 3, 4]);
				assert_eq!(f.seq, 9);
				assert!(f.ciphered());
				assert_eq!(&f.payload[..], &[0xDE, 0xAD]);
				assert_eq!(f.mac_input(), vec![9, 0xDE, 0xAD]);
			}
			other => panic!("unexpected frame {other:?}"),
		}
	}

	#[test]
	fn short_service_request_roundtrip() {
		let sr = ShortServiceRequest { ksi: 5, seq: 17, mac: 0xBEEF };
		match parse_outer(&sr.encode()).unwrap() {
			NasFrame::ServiceRequest(parsed) => assert_eq!(parsed, sr),
			other => panic!("unexpected frame {other:?}"),
		}
	}

	#[test]
	fn reserved_security_header_is_rejected() {
		// SH = 6 with the EMM discriminator is not a defined format
		assert_eq!(
			parse_outer(&[0x67, 0, 0, 0, 0, 0]),
			Err(NasDecodeError::InvalidSecurityHeader(6))
		);
	}

	#[test]
	fn ul_count_reconstruction_plain() {
		assert_eq!(reconstruct_ul(0x0000_0005, 5), 5);
		assert_eq!(reconstruct_ul(0x0000_0105, 5), 0x105);
		// regressing sequence implies an 8-bit wrap
		assert_eq!(reconstruct_ul(0x0000_00FF, 0x00), 0x100);
		assert_eq!(reconstruct_ul(0x0000_01FE, 0x05), 0x205);
	}

	#[test]
	fn ul_count_reconstruction_short() {
		assert_eq!(reconstruct_ul_short(0x1F, 0x00), 0x20);
		assert_eq!(reconstruct_ul_short(0x43, 0x03), 0x43);
	}
}
