//! Elementary EPS NAS information elements shared by EMM and ESM.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::codec::{NasDecodeError, Reader, Writer};

/// 24.301 EMM cause values used by the handler.
pub mod emm_cause {
	pub const IMSI_UNKNOWN_IN_HSS: u8 = 2;
	pub const ILLEGAL_UE: u8 = 3;
	pub const IMEI_NOT_ACCEPTED: u8 = 5;
	pub const EPS_AND_NON_EPS_NOT_ALLOWED: u8 = 8;
	pub const PLMN_NOT_ALLOWED: u8 = 11;
	pub const NETWORK_FAILURE: u8 = 17;
	pub const CS_DOMAIN_NOT_AVAILABLE: u8 = 18;
	pub const ESM_FAILURE: u8 = 19;
	pub const UE_SECURITY_CAPABILITY_MISMATCH: u8 = 23;
	pub const SECURITY_MODE_REJECTED: u8 = 24;
	pub const NO_EPS_BEARER_CONTEXT_ACTIVATED: u8 = 40;
	pub const SYNCH_FAILURE: u8 = 21;
	pub const INVALID_MANDATORY_INFORMATION: u8 = 96;
	pub const MSG_TYPE_NOT_COMPATIBLE_WITH_STATE: u8 = 98;
	pub const PROTOCOL_ERROR_UNSPECIFIED: u8 = 111;
}

/// 24.301 ESM cause values used by the handler.
pub mod esm_cause {
	pub const UNKNOWN_OR_MISSING_APN: u8 = 27;
	pub const UNKNOWN_PDN_TYPE: u8 = 28;
	pub const SERVICE_OPTION_NOT_SUPPORTED: u8 = 32;
	pub const PTI_MISMATCH: u8 = 47;
	pub const PDN_TYPE_IPV4_ONLY_ALLOWED: u8 = 50;
	pub const PDN_TYPE_IPV6_ONLY_ALLOWED: u8 = 51;
	pub const MAX_EPS_BEARERS_REACHED: u8 = 65;
	pub const INVALID_MANDATORY_INFORMATION: u8 = 96;
	pub const MSG_TYPE_NOT_COMPATIBLE_WITH_STATE: u8 = 98;
	pub const PROTOCOL_ERROR_UNSPECIFIED: u8 = 111;
}

/// PLMN identity, BCD-packed as on the wire (MCC + MNC, 2 or 3 digits).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Plmn(pub [u8; 3]);

impl Plmn {
	pub fn new(mcc: &str, mnc: &str) -> Option<Self> {
		if mcc.len() != 3 || !(mnc.len() == 2 || mnc.len() == 3) {
			return None;
		}
		let d = |s: &str, i: usize| s.as_bytes()[i].checked_sub(b'0').filter(|v| *v <= 9);
		let (m1, m2, m3) = (d(mcc, 0)?, d(mcc, 1)?, d(mcc, 2)?);
		let (n1, n2) = (d(mnc, 0)?, d(mnc, 1)?);
		let n3 = if mnc.len() == 3 { d(mnc, 2)? } else { 0xF };
		Some(Plmn([(m2 << 4) | m1, (n3 << 4) | m3, (n2 << 4) | n1]))
	}

	pub fn mcc(&self) -> String {
		format!("{}{}{}", self.0[0] & 0xF, self.0[0] >> 4, self.0[1] & 0xF)
	}

	pub fn mnc(&self) -> String {
		let n3 = self.0[1] >> 4;
		if n3 == 0xF {
			format!("{}{}", self.0[2] & 0xF, self.0[2] >> 4)
		} else {
			format!("{}{}{}", self.0[2] & 0xF, self.0[2] >> 4, n3)
		}
	}
}

impl fmt::Display for Plmn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.mcc(), self.mnc())
	}
}

impl fmt::Debug for Plmn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Plmn({self})")
	}
}

impl FromStr for Plmn {
	type Err = NasDecodeError;

	/// Accepts `"001.01"` or the compact `"00101"` form.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let compact: String = s.chars().filter(|c| *c != '.').collect();
		if compact.len() < 5 || compact.len() > 6 {
			return Err(NasDecodeError::InvalidIe);
		}
		Plmn::new(&compact[..3], &compact[3..]).ok_or(NasDecodeError::InvalidIe)
	}
}

/// Tracking Area Identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tai {
	pub plmn: Plmn,
	pub tac: u16,
}

impl Tai {
	pub(crate) fn write(&self, w: &mut Writer) {
		w.bytes(&self.plmn.0);
		w.u16(self.tac);
	}

	pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, NasDecodeError> {
		let plmn = Plmn(r.array::<3>()?);
		let tac = r.u16()?;
		Ok(Tai { plmn, tac })
	}
}

/// Globally Unique Temporary Identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Guti {
	pub plmn: Plmn,
	pub mme_group: u16,
	pub mme_code: u8,
	pub m_tmsi: u32,
}

/// S-TMSI (MME code + M-TMSI), the paging identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct STmsi {
	pub mme_code: u8,
	pub m_tmsi: u32,
}

impl From<Guti> for STmsi {
	fn from(g: Guti) -> Self {
		STmsi { mme_code: g.mme_code, m_tmsi: g.m_tmsi }
	}
}

/// NAS key set identifier. TSC 0 marks a native EPS context, 1 a context
/// mapped from UTRAN/GERAN. Value 7 is the no-key marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ksi {
	pub tsc: u8,
	pub value: u8,
}

impl Ksi {
	pub const NO_KEY_VALUE: u8 = 7;

	pub fn native(value: u8) -> Self {
		debug_assert!(value <= 7);
		Ksi { tsc: 0, value }
	}

	pub fn no_key() -> Self {
		Ksi { tsc: 0, value: Ksi::NO_KEY_VALUE }
	}

	pub fn is_no_key(&self) -> bool {
		self.value == Ksi::NO_KEY_VALUE
	}

	/// Security-map index: native contexts land on 0..=6, mapped on 8..=14.
	pub fn index(&self) -> u8 {
		(self.tsc << 3) | (self.value & 0x7)
	}

	pub fn from_index(idx: u8) -> Self {
		Ksi { tsc: (idx >> 3) & 1, value: idx & 0x7 }
	}

	pub fn nibble(&self) -> u8 {
		self.index() & 0xF
	}

	pub fn from_nibble(n: u8) -> Self {
		Ksi::from_index(n & 0xF)
	}
}

/// EPS mobile identity IE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MobileIdentity {
	Imsi(String),
	Imei(String),
	ImeiSv(String),
	Tmsi(u32),
	Guti(Guti),
}

const ID_TYPE_IMSI: u8 = 1;
const ID_TYPE_IMEI: u8 = 2;
const ID_TYPE_IMEISV: u8 = 3;
const ID_TYPE_TMSI: u8 = 4;
const ID_TYPE_GUTI: u8 = 6;

impl MobileIdentity {
	fn digits_bytes(type_id: u8, digits: &str) -> Vec<u8> {
		// BCD with the identity type in the low nibble of the first octet
		let ds: Vec<u8> = digits.bytes().map(|b| b - b'0').collect();
		let odd = ds.len() % 2 == 1;
		let mut out = Vec::with_capacity(1 + ds.len() / 2);
		let mut first = type_id | if odd { 0x08 } else { 0 };
		let mut iter = ds.iter();
		if let Some(d) = iter.next() {
			first |= d << 4;
		}
		out.push(first);
		loop {
			match (iter.next(), iter.next()) {
				(Some(a), Some(b)) => out.push(a | (b << 4)),
				(Some(a), None) => {
					out.push(a | 0xF0);
					break;
				}
				_ => break,
			}
		}
		out
	}

	fn digits_parse(buf: &[u8]) -> Result<String, NasDecodeError> {
		if buf.is_empty() {
			return Err(NasDecodeError::InvalidIe);
		}
		let mut s = String::new();
		s.push(char::from(b'0' + (buf[0] >> 4)));
		for b in &buf[1..] {
			s.push(char::from(b'0' + (b & 0xF)));
			// 0xF marks the filler nibble on an even digit count
			if b >> 4 != 0xF {
				s.push(char::from(b'0' + (b >> 4)));
			}
		}
		Ok(s)
	}

	pub fn encode(&self) -> Vec<u8> {
		match self {
			MobileIdentity::Imsi(d) => Self::digits_bytes(ID_TYPE_IMSI, d),
			MobileIdentity::Imei(d) => Self::digits_bytes(ID_TYPE_IMEI, d),
			MobileIdentity::ImeiSv(d) => Self::digits_bytes(ID_TYPE_IMEISV, d),
			MobileIdentity::Tmsi(t) => {
				let mut out = vec![0xF0 | ID_TYPE_TMSI];
				out.extend_from_slice(&t.to_be_bytes());
				out
			}
			MobileIdentity::Guti(g) => {
				let mut out = vec![0xF0 | ID_TYPE_GUTI];
				out.extend_from_slice(&g.plmn.0);
				out.extend_from_slice(&g.mme_group.to_be_bytes());
				out.push(g.mme_code);
				out.extend_from_slice(&g.m_tmsi.to_be_bytes());
				out
			}
		}
	}

	pub fn decode(buf: &[u8]) -> Result<Self, NasDecodeError> {
		let type_id = buf.first().ok_or(NasDecodeError::InvalidIe)? & 0x07;
		match type_id {
			ID_TYPE_IMSI => Ok(MobileIdentity::Imsi(Self::digits_parse(buf)?)),
			ID_TYPE_IMEI => Ok(MobileIdentity::Imei(Self::digits_parse(buf)?)),
			ID_TYPE_IMEISV => Ok(MobileIdentity::ImeiSv(Self::digits_parse(buf)?)),
			ID_TYPE_TMSI => {
				let mut r = Reader::new(&buf[1..]);
				Ok(MobileIdentity::Tmsi(r.u32()?))
			}
			ID_TYPE_GUTI => {
				let mut r = Reader::new(&buf[1..]);
				let plmn = Plmn(r.array::<3>()?);
				let mme_group = r.u16()?;
				let mme_code = r.u8()?;
				let m_tmsi = r.u32()?;
				Ok(MobileIdentity::Guti(Guti { plmn, mme_group, mme_code, m_tmsi }))
			}
			_ => Err(NasDecodeError::InvalidIe),
		}
	}
}

/// UE security capability bitmaps: bit `0x80 >> n` advertises algorithm `n`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct UeSecCap {
	pub eea: u8,
	pub eia: u8,
	pub uea: Option<u8>,
	pub uia: Option<u8>,
	pub gea: Option<u8>,
}

impl UeSecCap {
	pub fn supports_eea(&self, alg: u8) -> bool {
		self.eea & (0x80 >> alg) != 0
	}

	pub fn supports_eia(&self, alg: u8) -> bool {
		self.eia & (0x80 >> alg) != 0
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut out = vec![self.eea, self.eia];
		if let Some(uea) = self.uea {
			out.push(uea);
			// UIA octet has the spare high bit voided
			out.push(self.uia.unwrap_or(0) & 0x7F);
			if let Some(gea) = self.gea {
				out.push(gea & 0x7F);
			}
		}
		out
	}

	pub fn decode(buf: &[u8]) -> Result<Self, NasDecodeError> {
		if buf.len() < 2 {
			return Err(NasDecodeError::InvalidIe);
		}
		Ok(UeSecCap {
			eea: buf[0],
			eia: buf[1],
			uea: buf.get(2).copied(),
			uia: buf.get(3).copied(),
			gea: buf.get(4).copied(),
		})
	}
}

/// GPRS timer IE (unit in the top 3 bits, value in the low 5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GprsTimer {
	pub unit: u8,
	pub value: u8,
}

impl GprsTimer {
	pub const DEACTIVATED: GprsTimer = GprsTimer { unit: 7, value: 0 };

	pub fn octet(&self) -> u8 {
		(self.unit << 5) | (self.value & 0x1F)
	}

	pub fn from_octet(b: u8) -> Self {
		GprsTimer { unit: b >> 5, value: b & 0x1F }
	}
}

/// Requested / provisioned PDN type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PdnType {
	Ipv4 = 1,
	Ipv6 = 2,
	Ipv4v6 = 3,
}

impl PdnType {
	pub fn from_nibble(v: u8) -> Option<Self> {
		match v {
			1 => Some(PdnType::Ipv4),
			2 => Some(PdnType::Ipv6),
			3 => Some(PdnType::Ipv4v6),
			_ => None,
		}
	}
}

/// Assigned PDN address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PdnAddress {
	Ipv4(Ipv4Addr),
	Ipv6(Ipv6Addr),
	Ipv4v6(Ipv4Addr, Ipv6Addr),
}

impl PdnAddress {
	pub fn pdn_type(&self) -> PdnType {
		match self {
			PdnAddress::Ipv4(_) => PdnType::Ipv4,
			PdnAddress::Ipv6(_) => PdnType::Ipv6,
			PdnAddress::Ipv4v6(..) => PdnType::Ipv4v6,
		}
	}

	pub fn ipv4(&self) -> Option<Ipv4Addr> {
		match self {
			PdnAddress::Ipv4(a) | PdnAddress::Ipv4v6(a, _) => Some(*a),
			PdnAddress::Ipv6(_) => None,
		}
	}

	pub fn ipv6(&self) -> Option<Ipv6Addr> {
		match self {
			PdnAddress::Ipv6(a) | PdnAddress::Ipv4v6(_, a) => Some(*a),
			PdnAddress::Ipv4(_) => None,
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut out = vec![self.pdn_type() as u8];
		match self {
			PdnAddress::Ipv4(a) => out.extend_from_slice(&a.octets()),
			PdnAddress::Ipv6(a) => out.extend_from_slice(&a.octets()),
			PdnAddress::Ipv4v6(a4, a6) => {
				out.extend_from_slice(&a6.octets());
				out.extend_from_slice(&a4.octets());
			}
		}
		out
	}

	pub fn decode(buf: &[u8]) -> Result<Self, NasDecodeError> {
		let mut r = Reader::new(buf);
		match r.u8()? & 0x7 {
			1 => Ok(PdnAddress::Ipv4(Ipv4Addr::from(r.array::<4>()?))),
			2 => Ok(PdnAddress::Ipv6(Ipv6Addr::from(r.array::<16>()?))),
			3 => {
				let a6 = Ipv6Addr::from(r.array::<16>()?);
				let a4 = Ipv4Addr::from(r.array::<4>()?);
				Ok(PdnAddress::Ipv4v6(a4, a6))
			}
			_ => Err(NasDecodeError::InvalidIe),
		}
	}
}

/// EPS quality of service IE; only the QCI octet is meaningful to the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpsQos {
	pub qci: u8,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plmn_roundtrip_two_digit_mnc() {
		let p: Plmn = "001.01".parse().unwrap();
		assert_eq!(p.mcc(), "001");
		assert_eq!(p.mnc(), "01");
		assert_eq!(p.to_string(), "001.01");
		assert_eq!("00101".parse::<Plmn>().unwrap(), p);
	}

	#[test]
	fn plmn_roundtrip_three_digit_mnc() {
		let p: Plmn = "310.170".parse().unwrap();
		assert_eq!(p.mcc(), "310");
		assert_eq!(p.mnc(), "170");
	}

	#[test]
	fn imsi_identity_roundtrip() {
		let id = MobileIdentity::Imsi("001010000000001".into());
		let enc = id.encode();
		assert_eq!(MobileIdentity::decode(&enc).unwrap(), id);
	}

	#[test]
	fn imeisv_identity_roundtrip_even_digits() {
		let id = MobileIdentity::ImeiSv("3516590865123401".into());
		let enc = id.encode();
		assert_eq!(MobileIdentity::decode(&enc).unwrap(), id);
	}

	#[test]
	fn guti_identity_roundtrip() {
		let id = MobileIdentity::Guti(Guti {
			plmn: "00101".parse().unwrap(),
			mme_group: 0x8001,
			mme_code: 2,
			m_tmsi: 0xC0FF_EE01,
		});
		let enc = id.encode();
		assert_eq!(MobileIdentity::decode(&enc).unwrap(), id);
	}

	#[test]
	fn ksi_index_split() {
		let k = Ksi { tsc: 1, value: 5 };
		assert_eq!(k.index(), 13);
		assert_eq!(Ksi::from_index(13), k);
		assert!(Ksi::no_key().is_no_key());
	}

	#[test]
	fn sec_cap_bits() {
		let cap = UeSecCap { eea: 0b1110_0000, eia: 0b0110_0000, ..Default::default() };
		assert!(cap.supports_eea(0));
		assert!(cap.supports_eea(2));
		assert!(!cap.supports_eea(3));
		assert!(!cap.supports_eia(0));
		assert!(cap.supports_eia(1));
	}

	#[test]
	fn pdn_address_roundtrip() {
		let a = PdnAddress::Ipv4v6("10.0.0.2".parse().unwrap(), "2001:db8::2".parse().unwrap());
		assert_eq!(PdnAddress::decode(&a.encode()).unwrap(), a);
	}
}
