//! Interfaces towards the NAS cryptographic collaborators.
//!
//! The EIA/EEA cores and the Milenage/TUAK vector generation live outside
//! this workspace; the handler reaches them through the traits below. The
//! null algorithms (EIA0 / EEA0) are fixed behaviour every implementation
//! must honour: an all-zero MAC and an identity keystream.

use crate::codec::NasDecodeError;

pub const DIR_UPLINK: u8 = 0;
pub const DIR_DOWNLINK: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EeaAlg {
	Eea0 = 0,
	Eea1 = 1,
	Eea2 = 2,
	Eea3 = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EiaAlg {
	Eia0 = 0,
	Eia1 = 1,
	Eia2 = 2,
	Eia3 = 3,
}

impl TryFrom<u8> for EeaAlg {
	type Error = NasDecodeError;

	fn try_from(v: u8) -> Result<Self, NasDecodeError> {
		match v {
			0 => Ok(EeaAlg::Eea0),
			1 => Ok(EeaAlg::Eea1),
			2 => Ok(EeaAlg::Eea2),
			3 => Ok(EeaAlg::Eea3),
			_ => Err(NasDecodeError::InvalidIe),
		}
	}
}

impl TryFrom<u8> for EiaAlg {
	type Error = NasDecodeError;

	fn try_from(v: u8) -> Result<Self, NasDecodeError> {
		match v {
			0 => Ok(EiaAlg::Eia0),
			1 => Ok(EiaAlg::Eia1),
			2 => Ok(EiaAlg::Eia2),
			3 => Ok(EiaAlg::Eia3),
			_ => Err(NasDecodeError::InvalidIe),
		}
	}
}

/// NAS integrity and ciphering primitives.
pub trait NasCrypto: Send + Sync {
	/// EIA MAC over `data` (the sequence octet followed by the possibly
	/// ciphered payload, or the two visible octets of a short Service
	/// Request). Must return `[0; 4]` for EIA0.
	fn mac(&self, alg: EiaAlg, key: &[u8; 16], count: u32, dir: u8, data: &[u8]) -> [u8; 4];

	/// EEA keystream application. Must be the identity for EEA0, and its own
	/// inverse otherwise (stream cipher), so the same entry point serves
	/// encryption and decryption.
	fn apply_keystream(&self, alg: EeaAlg, key: &[u8; 16], count: u32, dir: u8, data: &mut [u8]);
}

/// Key-derivation primitives (33.401 annex A, 33.102 annex B).
pub trait NasKdf: Send + Sync {
	/// A2: Kasme from (CK, IK, serving network id, SQN xor AK).
	fn kasme(&self, ck: &[u8; 16], ik: &[u8; 16], snid: &[u8; 3], sqn_xor_ak: &[u8; 6]) -> [u8; 32];

	/// A7: 128-bit NAS key from Kasme for the given usage and algorithm id.
	fn nas_key(&self, kasme: &[u8; 32], usage: KdfUsage, alg_id: u8) -> [u8; 16];

	/// A3: KeNB from Kasme and the NAS uplink count at handover to the AS.
	fn kenb(&self, kasme: &[u8; 32], ul_count: u32) -> [u8; 32];

	/// C4: CK from a GSM Kc.
	fn ck_from_kc(&self, kc: &[u8; 8]) -> [u8; 16];

	/// C5: IK from a GSM Kc.
	fn ik_from_kc(&self, kc: &[u8; 8]) -> [u8; 16];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum KdfUsage {
	NasEnc = 1,
	NasInt = 2,
}

/// Deterministic stand-ins for the external crypto cores, for tests and
/// bring-up rigs.
pub mod mock {
	use super::*;

	/// Avalanche-free but input-sensitive mixer; enough to make a MAC that
	/// flips when any input octet flips.
	fn mix(seed: u64, data: &[u8]) -> u64 {
		let mut h = seed ^ 0xcbf2_9ce4_8422_2325;
		for b in data {
			h ^= *b as u64;
			h = h.wrapping_mul(0x1000_0000_01b3);
		}
		h
	}

	#[derive(Debug, Default)]
	pub struct MockCrypto;

	impl NasCrypto for MockCrypto {
		fn mac(&self, alg: EiaAlg, key: &[u8; 16], count: u32, dir: u8, data: &[u8]) -> [u8; 4] {
			if alg == EiaAlg::Eia0 {
				return [0; 4];
			}
			let seed = mix((alg as u64) << 40 | (dir as u64) << 32 | count as u64, key);
			let h = mix(seed, data);
			(h as u32).to_be_bytes()
		}

		fn apply_keystream(
			&self,
			alg: EeaAlg,
			key: &[u8; 16],
			count: u32,
			dir: u8,
			data: &mut [u8],
		) {
			if alg == EeaAlg::Eea0 {
				return;
			}
			let seed = mix((alg as u64) << 40 | (dir as u64) << 32 | count as u64, key);
			for (i, b) in data.iter_mut().enumerate() {
				*b ^= (seed.rotate_left((i % 8) as u32 * 8) & 0xFF) as u8;
			}
		}
	}

	#[derive(Debug, Default)]
	pub struct MockKdf;

	impl NasKdf for MockKdf {
		fn kasme(
			&self,
			ck: &[u8; 16],
			ik: &[u8; 16],
			snid: &[u8; 3],
			sqn_xor_ak: &[u8; 6],
		) -> [u8; 32] {
			let mut out = [0u8; 32];
			let a = mix(mix(1, ck), ik);
			let b = mix(mix(a, snid), sqn_xor_ak);
			out[..8].copy_from_slice(&a.to_be_bytes());
			out[8..16].copy_from_slice(&b.to_be_bytes());
			out[16..24].copy_from_slice(&mix(a, &b.to_be_bytes()).to_be_bytes());
			out[24..].copy_from_slice(&mix(b, &a.to_be_bytes()).to_be_bytes());
			out
		}

		fn nas_key(&self, kasme: &[u8; 32], usage: KdfUsage, alg_id: u8) -> [u8; 16] {
			let mut out = [0u8; 16];
			let h = mix((usage as u64) << 8 | alg_id as u64, kasme);
			out[..8].copy_from_slice(&h.to_be_bytes());
			out[8..].copy_from_slice(&mix(h, kasme).to_be_bytes());
			out
		}

		fn kenb(&self, kasme: &[u8; 32], ul_count: u32) -> [u8; 32] {
			let mut out = [0u8; 32];
			let a = mix(ul_count as u64, kasme);
			let b = mix(a, kasme);
			out[..8].copy_from_slice(&a.to_be_bytes());
			out[8..16].copy_from_slice(&b.to_be_bytes());
			out[16..24].copy_from_slice(&mix(b, &a.to_be_bytes()).to_be_bytes());
			out[24..].copy_from_slice(&mix(a, &b.to_be_bytes()).to_be_bytes());
			out
		}

		fn ck_from_kc(&self, kc: &[u8; 8]) -> [u8; 16] {
			// C4: CK = Kc || Kc
			let mut out = [0u8; 16];
			out[..8].copy_from_slice(kc);
			out[8..].copy_from_slice(kc);
			out
		}

		fn ik_from_kc(&self, kc: &[u8; 8]) -> [u8; 16] {
			// C5: IK = Kc xor Kc' folded halves
			let mut out = [0u8; 16];
			for i in 0..4 {
				out[i] = kc[i] ^ kc[i + 4];
				out[i + 12] = kc[i] ^ kc[i + 4];
			}
			out[4..12].copy_from_slice(kc);
			out
		}
	}
}

#[cfg(test)]
mod tests {
	use super::mock::*;
	use super::*;

	#[test]
	fn eia0_mac_is_zero() {
		let c = MockCrypto;
		assert_eq!(c.mac(EiaAlg::Eia0, &[1; 16], 7, DIR_UPLINK, b"abc"), [0; 4]);
	}

	#[test]
	fn mac_depends_on_count_and_direction() {
		let c = MockCrypto;
		let m1 = c.mac(EiaAlg::Eia1, &[1; 16], 7, DIR_UPLINK, b"abc");
		let m2 = c.mac(EiaAlg::Eia1, &[1; 16], 8, DIR_UPLINK, b"abc");
		let m3 = c.mac(EiaAlg::Eia1, &[1; 16], 7, DIR_DOWNLINK, b"abc");
		assert_ne!(m1, m2);
		assert_ne!(m1, m3);
	}

	#[test]
	fn keystream_is_involutive() {
		let c = MockCrypto;
		let mut data = b"some nas payload".to_vec();
		let orig = data.clone();
		c.apply_keystream(EeaAlg::Eea1, &[9; 16], 3, DIR_DOWNLINK, &mut data);
		assert_ne!(data, orig);
		c.apply_keystream(EeaAlg::Eea1, &[9; 16], 3, DIR_DOWNLINK, &mut data);
		assert_eq!(data, orig);
	}

	#[test]
	fn eea0_is_identity() {
		let c = MockCrypto;
		let mut data = b"plain".to_vec();
		c.apply_keystream(EeaAlg::Eea0, &[9; 16], 3, DIR_UPLINK, &mut data);
		assert_eq!(data, b"plain");
	}
}
