//! Authentication / SMC policy engine and security-context installation.

use ironpath_nas::crypto::{EeaAlg, EiaAlg, KdfUsage, NasKdf};
use ironpath_nas::types::{Ksi, UeSecCap};
use tracing::{info, warn};

use crate::config::MmeConfig;
use crate::context::UeContext;
use crate::interfaces::AuthVector;
use crate::s1::sec::{CtxOrigin, SecurityContext, SecurityState};

/// Procedure abbreviations keyed into the SMC bypass list and the
/// re-authentication cadence counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcAbbr {
	Att,
	Tau,
	Det,
	Ser,
}

impl ProcAbbr {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProcAbbr::Att => "ATT",
			ProcAbbr::Tau => "TAU",
			ProcAbbr::Det => "DET",
			ProcAbbr::Ser => "SER",
		}
	}
}

/// Decides whether an EMM Authentication must run for the given procedure
/// and UE-provided KSI. Side effects: the active KSI is either adopted or
/// reset, and the per-procedure cadence counter advances.
pub fn require_auth(
	cfg: &MmeConfig,
	sec: &mut SecurityState,
	abbr: ProcAbbr,
	ksi: Option<Ksi>,
) -> bool {
	if cfg.security.nas_disabled || cfg.security.auth_disabled {
		return false;
	}
	let Some(ksi) = ksi else {
		sec.set_active(None);
		return true;
	};
	if ksi.is_no_key() {
		sec.set_active(None);
		return true;
	}
	let idx = ksi.index();
	if !sec.contains(idx) {
		sec.set_active(None);
		return true;
	}
	let force = |sec: &mut SecurityState, counter: u32, cadence: u32| {
		if cadence != 0 && counter % cadence == 0 {
			sec.set_active(None);
			true
		} else {
			sec.set_active(Some(idx));
			false
		}
	};
	match abbr {
		// an Attach always re-authenticates
		ProcAbbr::Att => true,
		ProcAbbr::Tau => {
			sec.pol_tau += 1;
			let c = sec.pol_tau;
			force(sec, c, cfg.security.auth_tau)
		}
		ProcAbbr::Det => {
			// the DET counter is both incremented and tested
			sec.pol_det += 1;
			let c = sec.pol_det;
			force(sec, c, cfg.security.auth_det)
		}
		ProcAbbr::Ser => {
			sec.pol_ser += 1;
			let c = sec.pol_ser;
			force(sec, c, cfg.security.auth_ser)
		}
	}
}

/// Decides whether a Security Mode Control must run once authentication
/// settled.
pub fn require_smc(cfg: &MmeConfig, sec: &SecurityState, abbr: ProcAbbr) -> bool {
	if cfg.security.nas_disabled || cfg.security.smc_disabled {
		return false;
	}
	if cfg.security.smc_disabled_proc.iter().any(|p| p == abbr.as_str()) {
		return false;
	}
	if sec.active_ctx().is_none() {
		warn!(diagnostic = "no active KSI, unable to run an SMC");
		return false;
	}
	true
}

/// Current KSI if still valid, else the first native context, else any
/// mapped one.
pub fn get_any_ksi(sec: &mut SecurityState) -> Option<u8> {
	if let Some(cur) = sec.active_ksi() {
		if sec.contains(cur) {
			return Some(cur);
		}
		sec.set_active(None);
	}
	for i in 0..=6 {
		if sec.contains(i) {
			sec.set_active(Some(i));
			return Some(i);
		}
	}
	for i in 8..=14 {
		if sec.contains(i) {
			info!(ksi = i, diagnostic = "selecting a mapped KSI");
			sec.set_active(Some(i));
			return Some(i);
		}
	}
	None
}

/// First unused native KSI; evicts every non-current native context when
/// all six are taken.
pub fn get_new_ksi(sec: &mut SecurityState) -> u8 {
	for i in 0..=6 {
		if !sec.contains(i) {
			return i;
		}
	}
	let cur = sec.active_ksi();
	sec.evict_native_except(cur);
	if cur == Some(0) { 1 } else { 0 }
}

/// Installs the security context derived from an authentication vector at
/// the given KSI and makes it active. Counts reset to zero; NAS keys follow
/// at SMC time.
pub fn install_vector_ctx(
	cfg: &MmeConfig,
	kdf: &dyn NasKdf,
	ue: &UeContext,
	sec: &mut SecurityState,
	ksi: Ksi,
	vect: AuthVector,
) {
	let snid = cfg.security.auth_plmn.map(|p| p.0).unwrap_or_else(|| ue.snid());
	let mut ctx = match &vect {
		AuthVector::Eps { kasme, .. } => SecurityContext::new(CtxOrigin::NativeEps, *kasme),
		AuthVector::Umts { ck, ik, autn, .. } => {
			let mut sqn_xor_ak = [0u8; 6];
			let n = autn.len().min(6);
			sqn_xor_ak[..n].copy_from_slice(&autn[..n]);
			let kasme = kdf.kasme(ck, ik, &snid, &sqn_xor_ak);
			let mut c = SecurityContext::new(CtxOrigin::MappedUmts, kasme);
			c.ck = Some(*ck);
			c.ik = Some(*ik);
			c
		}
		AuthVector::Gsm { kc, .. } => {
			// undefined by 33.401; kept for feature parity with the
			// GSM-vector subscriber stores
			let ck = kdf.ck_from_kc(kc);
			let ik = kdf.ik_from_kc(kc);
			let kasme = kdf.kasme(&ck, &ik, &snid, &[0; 6]);
			let mut c = SecurityContext::new(CtxOrigin::MappedGsm, kasme);
			c.ck = Some(ck);
			c.ik = Some(ik);
			c.kc = Some(*kc);
			c
		}
	};
	ctx.vector = Some(vect);
	let idx = ksi.index();
	sec.insert(idx, ctx);
	sec.set_active(Some(idx));
}

/// Fixed null context for an unauthenticated emergency attach.
pub fn install_emergency_ctx(sec: &mut SecurityState) {
	sec.insert(0, SecurityContext::null());
	sec.set_active(Some(0));
}

/// Derives the NAS keys for the chosen algorithms at SMC time.
pub fn install_smc_keys(kdf: &dyn NasKdf, sec: &mut SecurityState, ksi: u8, eea: u8, eia: u8) {
	let Some(ctx) = sec.get_mut(ksi) else { return };
	ctx.eea = EeaAlg::try_from(eea).unwrap_or(EeaAlg::Eea0);
	ctx.eia = EiaAlg::try_from(eia).unwrap_or(EiaAlg::Eia0);
	ctx.knasenc = kdf.nas_key(&ctx.kasme, KdfUsage::NasEnc, eea);
	ctx.knasint = kdf.nas_key(&ctx.kasme, KdfUsage::NasInt, eia);
}

/// UE security capability: reported, derived from the UE network
/// capability, or synthesized as a last resort.
pub fn effective_sec_cap(cfg: &MmeConfig, ue: &mut UeContext) -> UeSecCap {
	if let Some(cap) = ue.cap.sec_cap {
		return cap;
	}
	let gea = if cfg.security.seccap_with_2g {
		// GEA bits folded from the MS network capability head octet
		ue.cap.ms_net_cap.as_ref().and_then(|b| b.first()).map(|b| b & 0x7F)
	} else {
		None
	};
	let cap = match ue.cap.ue_net_cap.as_ref() {
		Some(nc) if nc.len() >= 2 => UeSecCap {
			eea: nc[0],
			eia: nc[1],
			uea: nc.get(2).copied(),
			// void the UCS2 bit of the UIA octet
			uia: nc.get(3).map(|b| b & 0x7F),
			gea,
		},
		_ => {
			warn!(diagnostic = "no security capabilities available, using dummy ones");
			UeSecCap { eea: 0xE0, eia: 0xE0, uea: None, uia: None, gea }
		}
	};
	ue.cap.sec_cap = Some(cap);
	cap
}

/// First algorithm of the priority list the UE supports, else the default.
pub fn select_eea(cfg: &MmeConfig, cap: &UeSecCap) -> u8 {
	for &alg in &cfg.security.eea_priority {
		if alg <= 7 && cap.supports_eea(alg) {
			return alg;
		}
	}
	info!(default = cfg.security.eea_default, diagnostic = "no matching EEA identifier");
	cfg.security.eea_default
}

pub fn select_eia(cfg: &MmeConfig, cap: &UeSecCap) -> u8 {
	for &alg in &cfg.security.eia_priority {
		if alg <= 7 && cap.supports_eia(alg) {
			return alg;
		}
	}
	info!(default = cfg.security.eia_default, diagnostic = "no matching EIA identifier");
	cfg.security.eia_default
}

#[cfg(test)]
mod tests {
	use super::*;
	use ironpath_nas::crypto::mock::MockKdf;

	fn cfg() -> MmeConfig {
		MmeConfig::default()
	}

	fn sec_with_native(idx: u8) -> SecurityState {
		let mut sec = SecurityState::default();
		sec.insert(idx, SecurityContext::new(CtxOrigin::NativeEps, [1; 32]));
		sec
	}

	#[test]
	fn ksi_seven_always_forces_auth() {
		let mut sec = sec_with_native(0);
		assert!(require_auth(&cfg(), &mut sec, ProcAbbr::Tau, Some(Ksi::no_key())));
		assert!(sec.active_ksi().is_none());
	}

	#[test]
	fn unknown_ksi_forces_auth() {
		let mut sec = sec_with_native(0);
		assert!(require_auth(&cfg(), &mut sec, ProcAbbr::Tau, Some(Ksi::native(3))));
	}

	#[test]
	fn attach_always_authenticates() {
		let mut sec = sec_with_native(0);
		assert!(require_auth(&cfg(), &mut sec, ProcAbbr::Att, Some(Ksi::native(0))));
	}

	#[test]
	fn tau_cadence_every_second() {
		let mut c = cfg();
		c.security.auth_tau = 2;
		let mut sec = sec_with_native(0);
		assert!(!require_auth(&c, &mut sec, ProcAbbr::Tau, Some(Ksi::native(0))));
		assert_eq!(sec.active_ksi(), Some(0));
		assert!(require_auth(&c, &mut sec, ProcAbbr::Tau, Some(Ksi::native(0))));
		assert!(sec.active_ksi().is_none());
	}

	#[test]
	fn zero_cadence_never_forces() {
		let mut c = cfg();
		c.security.auth_ser = 0;
		let mut sec = sec_with_native(0);
		for _ in 0..10 {
			assert!(!require_auth(&c, &mut sec, ProcAbbr::Ser, Some(Ksi::native(0))));
		}
	}

	#[test]
	fn detach_cadence_uses_its_own_counter() {
		let mut c = cfg();
		c.security.auth_det = 3;
		let mut sec = sec_with_native(0);
		sec.pol_tau = 2; // would trigger if the wrong slot were tested
		assert!(!require_auth(&c, &mut sec, ProcAbbr::Det, Some(Ksi::native(0))));
		assert!(!require_auth(&c, &mut sec, ProcAbbr::Det, Some(Ksi::native(0))));
		assert!(require_auth(&c, &mut sec, ProcAbbr::Det, Some(Ksi::native(0))));
	}

	#[test]
	fn smc_requires_active_context() {
		let c = cfg();
		let sec = SecurityState::default();
		assert!(!require_smc(&c, &sec, ProcAbbr::Att));
		let mut sec = sec_with_native(0);
		sec.set_active(Some(0));
		assert!(require_smc(&c, &sec, ProcAbbr::Att));
	}

	#[test]
	fn smc_bypass_list() {
		let mut c = cfg();
		c.security.smc_disabled_proc = vec!["TAU".into()];
		let mut sec = sec_with_native(0);
		sec.set_active(Some(0));
		assert!(!require_smc(&c, &sec, ProcAbbr::Tau));
		assert!(require_smc(&c, &sec, ProcAbbr::Att));
	}

	#[test]
	fn new_ksi_allocation_and_eviction() {
		let mut sec = SecurityState::default();
		assert_eq!(get_new_ksi(&mut sec), 0);
		for i in 0..=6 {
			sec.insert(i, SecurityContext::new(CtxOrigin::NativeEps, [i; 32]));
		}
		sec.set_active(Some(0));
		assert_eq!(get_new_ksi(&mut sec), 1);
		// everything but the current context was evicted
		assert_eq!(sec.ksis().count(), 1);
		assert!(sec.contains(0));
	}

	#[test]
	fn any_ksi_prefers_native() {
		let mut sec = SecurityState::default();
		sec.insert(9, SecurityContext::new(CtxOrigin::MappedUmts, [2; 32]));
		sec.insert(4, SecurityContext::new(CtxOrigin::NativeEps, [1; 32]));
		assert_eq!(get_any_ksi(&mut sec), Some(4));
		let mut sec = SecurityState::default();
		sec.insert(9, SecurityContext::new(CtxOrigin::MappedUmts, [2; 32]));
		assert_eq!(get_any_ksi(&mut sec), Some(9));
		let mut sec = SecurityState::default();
		assert_eq!(get_any_ksi(&mut sec), None);
	}

	#[test]
	fn umts_vector_installs_mapped_context() {
		let c = cfg();
		let kdf = MockKdf;
		let ue = UeContext::new("001.01".parse().unwrap());
		let mut sec = SecurityState::default();
		let vect = AuthVector::Umts {
			rand: [1; 16],
			xres: vec![1, 2, 3, 4],
			autn: vec![9; 16],
			ck: [2; 16],
			ik: [3; 16],
		};
		install_vector_ctx(&c, &kdf, &ue, &mut sec, Ksi::native(1), vect);
		let ctx = sec.get(1).unwrap();
		assert_eq!(ctx.origin, CtxOrigin::MappedUmts);
		assert_eq!(ctx.origin.code(), 3);
		assert!(ctx.ck.is_some());
		assert_eq!((ctx.ul, ctx.dl, ctx.ul_enb), (0, 0, 0));
		assert_eq!(sec.active_ksi(), Some(1));
	}

	#[test]
	fn smc_keys_follow_the_selected_algorithms() {
		let kdf = MockKdf;
		let mut sec = sec_with_native(0);
		install_smc_keys(&kdf, &mut sec, 0, 0, 1);
		let ctx = sec.get(0).unwrap();
		assert_eq!(ctx.eea, EeaAlg::Eea0);
		assert_eq!(ctx.eia, EiaAlg::Eia1);
		assert_ne!(ctx.knasint, [0; 16]);
		assert_eq!(
			ctx.knasenc,
			kdf.nas_key(&ctx.kasme, KdfUsage::NasEnc, 0),
			"keys are consistent with Kasme and the algorithm ids"
		);
	}

	#[test]
	fn dummy_sec_cap_advertises_null_and_first_two_algs() {
		let c = cfg();
		let mut ue = UeContext::new("001.01".parse().unwrap());
		let cap = effective_sec_cap(&c, &mut ue);
		assert!(cap.supports_eea(0) && cap.supports_eea(1) && cap.supports_eea(2));
		assert!(cap.supports_eia(0) && cap.supports_eia(1) && cap.supports_eia(2));
		assert!(ue.cap.sec_cap.is_some(), "derived capability is cached");
	}

	#[test]
	fn algorithm_selection_follows_priorities() {
		let mut c = cfg();
		c.security.eia_priority = vec![2, 1];
		let cap = UeSecCap { eea: 0x80, eia: 0x40, ..Default::default() }; // EEA0, EIA1
		assert_eq!(select_eea(&c, &cap), 0);
		assert_eq!(select_eia(&c, &cap), 1);
		// nothing matches: fall back to the defaults
		let none = UeSecCap::default();
		assert_eq!(select_eea(&c, &none), c.security.eea_default);
		assert_eq!(select_eia(&c, &none), c.security.eia_default);
	}
}
