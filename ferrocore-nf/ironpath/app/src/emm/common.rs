//! Common EMM procedures, nested inside the specific ones: Authentication,
//! Security Mode Control, Identification and GUTI Reallocation.

use ironpath_nas::emm::{
	AuthenticationRequest, EmmMessage, GutiReallocationCommand, IdentityRequest,
	SecurityModeCommand,
};
use ironpath_nas::types::{Guti, Ksi, MobileIdentity, emm_cause};
use tracing::{debug, info, warn};

use crate::Env;
use crate::config::AuthRatPreference;
use crate::emm::policy;
use crate::emm::proc::{EmmStep, IDENT_IMSI, ProcNext};
use crate::interfaces::{AuthRat, AuthVector};
use crate::s1::NasTx;

/// EMM Authentication (T3460). Fetches a vector, challenges the UE,
/// verifies the RES and installs the security context at a fresh KSI.
pub struct AuthProc {
	pub success: bool,
	ksi: Ksi,
	vector: Option<AuthVector>,
	resynced: bool,
}

impl AuthProc {
	pub fn new() -> Self {
		AuthProc { success: false, ksi: Ksi::native(0), vector: None, resynced: false }
	}

	pub fn start(&mut self, env: &mut Env<'_>) -> EmmStep {
		let Some(imsi) = env.ue.imsi.clone() else {
			warn!(diagnostic = "cannot authenticate without an IMSI");
			return EmmStep::done();
		};
		self.ksi = Ksi::native(policy::get_new_ksi(&mut env.s1.sec));
		let rat = match env.cfg.security.auth_rat {
			AuthRatPreference::Eps => AuthRat::Eps,
			AuthRatPreference::Umts => AuthRat::Umts,
			AuthRatPreference::Gsm => AuthRat::Gsm,
		};
		let snid = env.ue.snid();
		let Some(vect) =
			env.deps.subscribers.vector(&imsi, &snid, env.cfg.security.auth_amf, rat)
		else {
			warn!(imsi = %imsi, diagnostic = "no authentication vector available");
			return EmmStep::done();
		};
		self.challenge(vect, env)
	}

	fn challenge(&mut self, vect: AuthVector, env: &mut Env<'_>) -> EmmStep {
		let mut autn = vect.autn();
		if let Some(ext) = &env.cfg.security.auth_autn_ext {
			autn.extend_from_slice(ext);
		}
		let msg = AuthenticationRequest { ksi: self.ksi, rand: vect.rand(), autn };
		self.vector = Some(vect);
		let procs = env.ret_dnt(NasTx::emm(EmmMessage::AuthenticationRequest(msg)));
		EmmStep::reply(procs, ProcNext::Pending)
	}

	pub fn process(&mut self, msg: EmmMessage, env: &mut Env<'_>) -> EmmStep {
		match msg {
			EmmMessage::AuthenticationResponse(m) => {
				let Some(vect) = self.vector.take() else {
					return EmmStep::done();
				};
				if m.res == vect.expected_res() {
					debug!(ksi = self.ksi.index(), diagnostic = "authentication succeeded");
					policy::install_vector_ctx(
						env.cfg,
						env.deps.kdf.as_ref(),
						env.ue,
						&mut env.s1.sec,
						self.ksi,
						vect,
					);
					self.success = true;
					EmmStep::done()
				} else {
					warn!(diagnostic = "RES does not match XRES, rejecting");
					let procs = env.ret_dnt(NasTx::emm(EmmMessage::AuthenticationReject));
					EmmStep::reply(procs, ProcNext::Done)
				}
			}
			EmmMessage::AuthenticationFailure(m) => {
				if m.emm_cause == emm_cause::SYNCH_FAILURE && !self.resynced {
					if let (Some(auts), Some(vect)) = (m.auts.as_ref(), self.vector.take()) {
						let imsi = env.ue.imsi.clone().unwrap_or_default();
						if env.deps.subscribers.resync(&imsi, &vect.rand(), auts) {
							info!(diagnostic = "SQN resynchronised, retrying authentication");
							self.resynced = true;
							let rat = match env.cfg.security.auth_rat {
								AuthRatPreference::Eps => AuthRat::Eps,
								AuthRatPreference::Umts => AuthRat::Umts,
								AuthRatPreference::Gsm => AuthRat::Gsm,
							};
							let snid = env.ue.snid();
							if let Some(fresh) = env.deps.subscribers.vector(
								&imsi,
								&snid,
								env.cfg.security.auth_amf,
								rat,
							) {
								return self.challenge(fresh, env);
							}
						}
					}
				}
				warn!(cause = m.emm_cause, diagnostic = "authentication failure from UE");
				EmmStep::done()
			}
			_ => EmmStep::pending(),
		}
	}
}

/// EMM Security Mode Control (T3460). Selects the algorithms, derives the
/// NAS keys and replays the UE security capability.
pub struct SmcProc {
	pub success: bool,
}

impl SmcProc {
	pub fn new() -> Self {
		SmcProc { success: false }
	}

	pub fn start(&mut self, env: &mut Env<'_>) -> EmmStep {
		let Some(ksi) = env.s1.sec.active_ksi() else {
			warn!(diagnostic = "SMC started without an active KSI");
			return EmmStep::done();
		};
		let cap = policy::effective_sec_cap(env.cfg, env.ue);
		let eea = policy::select_eea(env.cfg, &cap);
		let eia = policy::select_eia(env.cfg, &cap);
		policy::install_smc_keys(env.deps.kdf.as_ref(), &mut env.s1.sec, ksi, eea, eia);
		let msg = SecurityModeCommand {
			eea,
			eia,
			ksi: Ksi::from_index(ksi),
			replayed_sec_cap: cap,
			imeisv_req: env.cfg.security.imeisv_request && env.ue.cap.imeisv.is_none(),
		};
		debug!(eea, eia, ksi, diagnostic = "starting security mode control");
		let procs = env.ret_dnt(NasTx::emm(EmmMessage::SecurityModeCommand(msg)));
		EmmStep::reply(procs, ProcNext::Pending)
	}

	pub fn process(&mut self, msg: EmmMessage, env: &mut Env<'_>) -> EmmStep {
		match msg {
			EmmMessage::SecurityModeComplete(m) => {
				if let Some(MobileIdentity::ImeiSv(d)) = m.imeisv {
					env.ue.cap.imeisv = Some(d);
				}
				self.success = true;
				EmmStep::done()
			}
			EmmMessage::SecurityModeReject(m) => {
				warn!(cause = m.emm_cause, diagnostic = "security mode rejected by UE");
				EmmStep::done()
			}
			_ => EmmStep::pending(),
		}
	}
}

/// EMM Identification (T3470).
pub struct IdentProc {
	pub success: bool,
	pub id_type: u8,
}

impl IdentProc {
	pub fn new(id_type: u8) -> Self {
		IdentProc { success: false, id_type }
	}

	pub fn start(&mut self, env: &mut Env<'_>) -> EmmStep {
		let msg = IdentityRequest { id_type: self.id_type };
		let procs = env.ret_dnt(NasTx::emm(EmmMessage::IdentityRequest(msg)));
		EmmStep::reply(procs, ProcNext::Pending)
	}

	pub fn process(&mut self, msg: EmmMessage, env: &mut Env<'_>) -> EmmStep {
		let EmmMessage::IdentityResponse(m) = msg else {
			return EmmStep::pending();
		};
		match m.identity {
			MobileIdentity::Imsi(d) if self.id_type == IDENT_IMSI => {
				env.ue.imsi = Some(d);
				self.success = true;
			}
			MobileIdentity::ImeiSv(d) | MobileIdentity::Imei(d) => {
				env.ue.cap.imeisv = Some(d);
				self.success = true;
			}
			other => {
				warn!(requested = self.id_type, received = ?other, diagnostic = "identity type mismatch");
			}
		}
		EmmStep::done()
	}
}

/// Standalone GUTI Reallocation (T3450), CN-initiated; the Attach/TAU
/// embedded form is folded into their Accept messages instead.
pub struct GutiProc {
	pub success: bool,
	guti: Option<Guti>,
}

impl GutiProc {
	pub fn new() -> Self {
		GutiProc { success: false, guti: None }
	}

	pub fn start(&mut self, env: &mut Env<'_>) -> EmmStep {
		let guti = Guti {
			plmn: env.cfg.plmn,
			mme_group: env.cfg.mme_group,
			mme_code: env.cfg.mme_code,
			m_tmsi: env.deps.registry.alloc_m_tmsi(),
		};
		self.guti = Some(guti);
		let msg = GutiReallocationCommand { guti, tai_list: env.ue.tai.map(|t| vec![t]) };
		let procs = env.ret_dnt(NasTx::emm(EmmMessage::GutiReallocationCommand(msg)));
		EmmStep::reply(procs, ProcNext::Pending)
	}

	pub fn process(&mut self, msg: EmmMessage, env: &mut Env<'_>) -> EmmStep {
		if let EmmMessage::GutiReallocationComplete = msg {
			env.ue.guti = self.guti.take();
			self.success = true;
			EmmStep::done()
		} else {
			EmmStep::pending()
		}
	}
}
