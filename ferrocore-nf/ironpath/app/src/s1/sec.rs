//! Per-UE NAS security state and the uplink security envelope.
//!
//! The security map holds one context per KSI (native 0..=6, mapped 8..=14)
//! plus the active KSI and the per-procedure re-authentication counters.
//! Inbound processing reconstructs the 32-bit uplink count from the 8-bit
//! (or 5-bit) sequence number, verifies the MAC, deciphers when needed and
//! decorates the message with `secure` / `ul_count`.

use bytes::Bytes;
use ironpath_nas::crypto::{DIR_UPLINK, EeaAlg, EiaAlg, NasCrypto};
use ironpath_nas::sec::{
	SecuredFrame, ShortServiceRequest, reconstruct_ul, reconstruct_ul_short,
};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SecurityConfig;
use crate::interfaces::AuthVector;

/// Where a security context came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtxOrigin {
	/// Null context installed for an unauthenticated emergency attach.
	EmergencyNull,
	/// Mapped from a GSM vector via C4/C5 (non-standard path).
	MappedGsm,
	/// Mapped from a UMTS vector, CK/IK retained.
	MappedUmts,
	/// Native EPS context.
	NativeEps,
}

impl CtxOrigin {
	pub fn code(&self) -> u8 {
		match self {
			CtxOrigin::EmergencyNull => 0,
			CtxOrigin::MappedGsm => 2,
			CtxOrigin::MappedUmts => 3,
			CtxOrigin::NativeEps => 4,
		}
	}
}

#[derive(Clone, Debug)]
pub struct SecurityContext {
	pub origin: CtxOrigin,
	pub kasme: [u8; 32],
	pub knasenc: [u8; 16],
	pub knasint: [u8; 16],
	pub eea: EeaAlg,
	pub eia: EiaAlg,
	/// Next expected uplink count.
	pub ul: u32,
	/// Next downlink count.
	pub dl: u32,
	/// Uplink count snapshot taken at KeNB derivation.
	pub ul_enb: u32,
	pub ck: Option<[u8; 16]>,
	pub ik: Option<[u8; 16]>,
	pub kc: Option<[u8; 8]>,
	pub vector: Option<AuthVector>,
}

impl SecurityContext {
	pub fn new(origin: CtxOrigin, kasme: [u8; 32]) -> Self {
		SecurityContext {
			origin,
			kasme,
			knasenc: [0; 16],
			knasint: [0; 16],
			eea: EeaAlg::Eea0,
			eia: EiaAlg::Eia0,
			ul: 0,
			dl: 0,
			ul_enb: 0,
			ck: None,
			ik: None,
			kc: None,
			vector: None,
		}
	}

	pub fn null() -> Self {
		SecurityContext::new(CtxOrigin::EmergencyNull, [0; 32])
	}
}

/// The per-UE security map and re-authentication policy counters.
#[derive(Debug, Default)]
pub struct SecurityState {
	ctxs: FxHashMap<u8, SecurityContext>,
	active: Option<u8>,
	pub pol_tau: u32,
	pub pol_det: u32,
	pub pol_ser: u32,
}

impl SecurityState {
	/// Drops every context, the active KSI and the policy counters.
	pub fn reset(&mut self) {
		self.ctxs.clear();
		self.active = None;
		self.pol_tau = 0;
		self.pol_det = 0;
		self.pol_ser = 0;
	}

	pub fn active_ksi(&self) -> Option<u8> {
		self.active
	}

	pub fn set_active(&mut self, ksi: Option<u8>) {
		self.active = ksi;
	}

	pub fn contains(&self, ksi: u8) -> bool {
		self.ctxs.contains_key(&ksi)
	}

	pub fn insert(&mut self, ksi: u8, ctx: SecurityContext) {
		self.ctxs.insert(ksi, ctx);
	}

	pub fn get(&self, ksi: u8) -> Option<&SecurityContext> {
		self.ctxs.get(&ksi)
	}

	pub fn get_mut(&mut self, ksi: u8) -> Option<&mut SecurityContext> {
		self.ctxs.get_mut(&ksi)
	}

	/// Active context, or `None` when the active KSI is unset or dangling.
	pub fn active_ctx(&self) -> Option<&SecurityContext> {
		self.active.and_then(|k| self.ctxs.get(&k))
	}

	pub fn active_ctx_mut(&mut self) -> Option<&mut SecurityContext> {
		match self.active {
			Some(k) => self.ctxs.get_mut(&k),
			None => None,
		}
	}

	/// Evicts every native context except `keep`.
	pub fn evict_native_except(&mut self, keep: Option<u8>) {
		for i in 0..=6 {
			if Some(i) != keep {
				self.ctxs.remove(&i);
			}
		}
	}

	pub fn ksis(&self) -> impl Iterator<Item = u8> + '_ {
		self.ctxs.keys().copied()
	}
}

/// Security verdict classes of the uplink envelope.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
	#[error("unknown or unset NAS KSI")]
	UnknownKsi,

	#[error("NAS MAC verification failed")]
	MacFailure,

	#[error("NAS uplink count mismatch")]
	UlCountMismatch,
}

impl SecurityError {
	pub fn code(&self) -> u16 {
		match self {
			SecurityError::UnknownKsi => 0x100,
			SecurityError::MacFailure => 0x200,
			SecurityError::UlCountMismatch => 0x300,
		}
	}
}

/// Decorations attached to every accepted inbound NAS message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NasMeta {
	pub secure: bool,
	pub ul_count: u32,
}

impl NasMeta {
	pub fn insecure() -> Self {
		NasMeta { secure: false, ul_count: 0 }
	}
}

/// Outcome of the uplink envelope: the plaintext inner buffer, the message
/// decorations, and the security verdict when the message was accepted
/// under a permissive policy.
#[derive(Debug)]
pub struct Unwrapped {
	pub inner: Bytes,
	pub meta: NasMeta,
	pub verdict: Option<SecurityError>,
}

/// Checks and strips the security envelope of a protected uplink message
/// (SH 1..=4). `Err` means the message must be dropped.
pub fn process_secured(
	frame: &SecuredFrame,
	state: &mut SecurityState,
	cfg: &SecurityConfig,
	crypto: &dyn NasCrypto,
) -> Result<Unwrapped, SecurityError> {
	if cfg.nas_disabled {
		return Ok(Unwrapped {
			inner: frame.payload.clone(),
			meta: NasMeta { secure: true, ul_count: 0 },
			verdict: None,
		});
	}

	let Some(ctx) = state.active_ctx_mut() else {
		if state.active_ksi().is_some() {
			// active KSI dangling (e.g. MME restart), drop the whole map
			warn!(diagnostic = "active NAS KSI has no context, resetting security state");
			state.reset();
		}
		if !frame.ciphered() && !cfg.enforce_ksi {
			// integrity-only: the inner message is still readable
			return Ok(Unwrapped {
				inner: frame.payload.clone(),
				meta: NasMeta::insecure(),
				verdict: Some(SecurityError::UnknownKsi),
			});
		}
		return Err(SecurityError::UnknownKsi);
	};

	let recon = reconstruct_ul(ctx.ul, frame.seq);
	let mac = crypto.mac(ctx.eia, &ctx.knasint, recon, DIR_UPLINK, &frame.mac_input());

	let (meta, verdict) = if mac != frame.mac {
		if cfg.enforce_mac {
			return Err(SecurityError::MacFailure);
		}
		warn!(ul_count = recon, diagnostic = "NAS MAC verification failed, accepting unprotected");
		(NasMeta { secure: false, ul_count: recon }, Some(SecurityError::MacFailure))
	} else if recon != ctx.ul {
		if cfg.enforce_ul {
			return Err(SecurityError::UlCountMismatch);
		}
		warn!(
			expected = ctx.ul,
			received = recon,
			diagnostic = "NAS UL count mismatch, resynchronising"
		);
		ctx.ul = recon.wrapping_add(1);
		(NasMeta { secure: false, ul_count: recon }, Some(SecurityError::UlCountMismatch))
	} else {
		debug!(ul_count = recon, diagnostic = "NAS MAC verified");
		ctx.ul = recon.wrapping_add(1);
		(NasMeta { secure: true, ul_count: recon }, None)
	};

	let inner = if frame.ciphered() {
		let mut payload = frame.payload.to_vec();
		crypto.apply_keystream(ctx.eea, &ctx.knasenc, recon, DIR_UPLINK, &mut payload);
		Bytes::from(payload)
	} else {
		frame.payload.clone()
	};

	Ok(Unwrapped { inner, meta, verdict })
}

/// Short Service Request verification (SH = 12). There is no inner message;
/// only the decorations come back.
pub fn process_service_request(
	sr: &ShortServiceRequest,
	state: &mut SecurityState,
	cfg: &SecurityConfig,
	crypto: &dyn NasCrypto,
) -> Result<(NasMeta, Option<SecurityError>), SecurityError> {
	if cfg.nas_disabled {
		return Ok((NasMeta { secure: true, ul_count: 0 }, None));
	}

	if !state.contains(sr.ksi) {
		warn!(ksi = sr.ksi, diagnostic = "unknown NAS KSI in Service Request");
		state.reset();
		if cfg.enforce_ksi {
			return Err(SecurityError::UnknownKsi);
		}
		// the overflow part of the count is unknown here
		return Ok((
			NasMeta { secure: false, ul_count: sr.seq as u32 },
			Some(SecurityError::UnknownKsi),
		));
	}
	state.set_active(Some(sr.ksi));
	let Some(ctx) = state.get_mut(sr.ksi) else {
		return Err(SecurityError::UnknownKsi);
	};

	let recon = reconstruct_ul_short(ctx.ul, sr.seq);
	let mac = crypto.mac(ctx.eia, &ctx.knasint, recon, DIR_UPLINK, &sr.mac_input());
	let short_mac = u16::from_be_bytes([mac[0], mac[1]]);

	if short_mac != sr.mac {
		if cfg.enforce_mac {
			return Err(SecurityError::MacFailure);
		}
		warn!(diagnostic = "short MAC verification failed in Service Request");
		return Ok((
			NasMeta { secure: false, ul_count: recon },
			Some(SecurityError::MacFailure),
		));
	}
	if recon != ctx.ul {
		if cfg.enforce_ul {
			return Err(SecurityError::UlCountMismatch);
		}
		warn!(diagnostic = "UL count mismatch in Service Request, resynchronising");
		ctx.ul = recon.wrapping_add(1);
		return Ok((
			NasMeta { secure: false, ul_count: recon },
			Some(SecurityError::UlCountMismatch),
		));
	}

	ctx.ul = recon.wrapping_add(1);
	Ok((NasMeta { secure: true, ul_count: recon }, None))
}

#[cfg(test)]
mod tests {
	use super::*;
	use ironpath_nas::crypto::DIR_UPLINK;
	use ironpath_nas::crypto::mock::MockCrypto;
	use ironpath_nas::sec;

	fn state_with_ctx(eia: EiaAlg) -> SecurityState {
		let mut st = SecurityState::default();
		let mut ctx = SecurityContext::new(CtxOrigin::NativeEps, [7; 32]);
		ctx.knasint = [3; 16];
		ctx.eia = eia;
		st.insert(0, ctx);
		st.set_active(Some(0));
		st
	}

	fn secured(seq: u8, payload: &[u8], st: &SecurityState, count: u32) -> SecuredFrame {
		let crypto = MockCrypto;
		let ctx = st.active_ctx().unwrap();
		let mut input = vec![seq];
		input.extend_from_slice(payload);
		let mac = crypto.mac(ctx.eia, &ctx.knasint, count, DIR_UPLINK, &input);
		SecuredFrame { sh: sec::SH_INTEGRITY, mac, seq, payload: Bytes::copy_from_slice(payload) }
	}

	#[test]
	fn valid_mac_advances_ul_count() {
		let cfg = SecurityConfig::default();
		let mut st = state_with_ctx(EiaAlg::Eia1);
		let frame = secured(0, b"\x07\x60\x00", &st, 0);
		let out = process_secured(&frame, &mut st, &cfg, &MockCrypto).unwrap();
		assert!(out.meta.secure);
		assert_eq!(out.meta.ul_count, 0);
		assert_eq!(st.active_ctx().unwrap().ul, 1);
	}

	#[test]
	fn mac_failure_enforced_drops() {
		let cfg = SecurityConfig { enforce_mac: true, ..Default::default() };
		let mut st = state_with_ctx(EiaAlg::Eia1);
		let mut frame = secured(0, b"\x07\x60\x00", &st, 0);
		frame.mac[0] ^= 0xFF;
		let err = process_secured(&frame, &mut st, &cfg, &MockCrypto).unwrap_err();
		assert_eq!(err.code(), 0x200);
		assert_eq!(st.active_ctx().unwrap().ul, 0, "count untouched on drop");
	}

	#[test]
	fn mac_failure_permissive_accepts_insecure() {
		let cfg = SecurityConfig::default();
		let mut st = state_with_ctx(EiaAlg::Eia1);
		let mut frame = secured(0, b"\x07\x60\x00", &st, 0);
		frame.mac[0] ^= 0xFF;
		let out = process_secured(&frame, &mut st, &cfg, &MockCrypto).unwrap();
		assert!(!out.meta.secure);
		assert_eq!(out.verdict, Some(SecurityError::MacFailure));
	}

	#[test]
	fn sequence_gap_resynchronises() {
		let cfg = SecurityConfig::default();
		let mut st = state_with_ctx(EiaAlg::Eia1);
		// stored UL expects seq 0 but the UE jumped to 4
		let frame = secured(4, b"\x07\x60\x00", &st, 4);
		let out = process_secured(&frame, &mut st, &cfg, &MockCrypto).unwrap();
		assert_eq!(out.verdict, Some(SecurityError::UlCountMismatch));
		assert_eq!(out.meta.ul_count, 4);
		assert_eq!(st.active_ctx().unwrap().ul, 5);
	}

	#[test]
	fn sqn_wrap_bumps_overflow() {
		let cfg = SecurityConfig::default();
		let mut st = state_with_ctx(EiaAlg::Eia1);
		st.active_ctx_mut().unwrap().ul = 0x0000_00FF;
		// seq 0xFF is expected; receiving it wraps the stored count to 0x100
		let frame = secured(0xFF, b"\x07\x60\x00", &st, 0xFF);
		let out = process_secured(&frame, &mut st, &cfg, &MockCrypto).unwrap();
		assert!(out.meta.secure);
		assert_eq!(st.active_ctx().unwrap().ul, 0x100);
		// and the next message at seq 0 carries the bumped overflow
		let frame = secured(0x00, b"\x07\x60\x00", &st, 0x100);
		let out = process_secured(&frame, &mut st, &cfg, &MockCrypto).unwrap();
		assert!(out.meta.secure);
		assert_eq!(out.meta.ul_count, 0x100);
	}

	#[test]
	fn unknown_ksi_on_integrity_only_is_permissive() {
		let cfg = SecurityConfig::default();
		let mut st = SecurityState::default();
		let frame = SecuredFrame {
			sh: sec::SH_INTEGRITY,
			mac: [0; 4],
			seq: 0,
			payload: Bytes::from_static(b"\x07\x60\x00"),
		};
		let out = process_secured(&frame, &mut st, &cfg, &MockCrypto).unwrap();
		assert!(!out.meta.secure);
		assert_eq!(out.verdict, Some(SecurityError::UnknownKsi));
	}

	#[test]
	fn unknown_ksi_on_ciphered_always_drops() {
		let cfg = SecurityConfig::default();
		let mut st = SecurityState::default();
		let frame = SecuredFrame {
			sh: sec::SH_INTEGRITY_CIPHERED,
			mac: [0; 4],
			seq: 0,
			payload: Bytes::from_static(b"\x07\x60\x00"),
		};
		let err = process_secured(&frame, &mut st, &cfg, &MockCrypto).unwrap_err();
		assert_eq!(err.code(), 0x100);
	}

	#[test]
	fn service_request_short_mac() {
		let cfg = SecurityConfig::default();
		let mut st = state_with_ctx(EiaAlg::Eia1);
		let crypto = MockCrypto;
		let mut sr = ShortServiceRequest { ksi: 0, seq: 0, mac: 0 };
		let ctx = st.active_ctx().unwrap();
		let mac = crypto.mac(ctx.eia, &ctx.knasint, 0, DIR_UPLINK, &sr.mac_input());
		sr.mac = u16::from_be_bytes([mac[0], mac[1]]);
		let (meta, verdict) = process_service_request(&sr, &mut st, &cfg, &crypto).unwrap();
		assert!(meta.secure);
		assert!(verdict.is_none());
		assert_eq!(st.active_ctx().unwrap().ul, 1);
	}

	#[test]
	fn reset_is_idempotent_and_clears_counters() {
		let mut st = state_with_ctx(EiaAlg::Eia1);
		st.pol_tau = 3;
		st.reset();
		assert!(st.active_ksi().is_none());
		assert_eq!(st.pol_tau, 0);
		assert_eq!(st.ksis().count(), 0);
		st.reset();
		assert!(st.active_ksi().is_none());
	}
}
