//! EMM Attach: the specific procedure driving Identification,
//! Authentication and Security Mode Control before accepting the UE with an
//! embedded GUTI reallocation and the default-bearer activation.

use bytes::Bytes;
use ironpath_nas::emm::{AttachAccept, AttachReject, AttachType, EmmMessage, EmmMsgType};
use ironpath_nas::esm::EsmMessage;
use ironpath_nas::types::{Guti, Ksi, MobileIdentity, emm_cause};
use tracing::{debug, info, warn};

use crate::Env;
use crate::emm::policy::{self, ProcAbbr};
use crate::emm::proc::{
	EmmProc, EmmProcKind, EmmStep, IDENT_IMEISV, IDENT_IMSI, ProcNext, SpawnReq,
	build_initial_context_setup,
};
use crate::esm::UeEsm;
use crate::s1::NasTx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
	Init,
	WaitComplete,
}

pub struct AttachProc {
	pub success: bool,
	attach_type: AttachType,
	ksi: Ksi,
	esm_container: Bytes,
	stage: Stage,
	guti_new: Option<Guti>,
	pub ebi: Option<u8>,
	auth_done: bool,
	smc_done: bool,
	imsi_requested: bool,
	imeisv_requested: bool,
}

impl AttachProc {
	pub fn new() -> Self {
		AttachProc {
			success: false,
			attach_type: AttachType::Eps,
			ksi: Ksi::no_key(),
			esm_container: Bytes::new(),
			stage: Stage::Init,
			guti_new: None,
			ebi: None,
			auth_done: false,
			smc_done: false,
			imsi_requested: false,
			imeisv_requested: false,
		}
	}

	pub fn filter(&self) -> &'static [EmmMsgType] {
		&[EmmMsgType::AttachComplete]
	}

	pub fn awaiting_complete(&self) -> bool {
		self.stage == Stage::WaitComplete
	}

	pub fn process(&mut self, msg: EmmMessage, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		match msg {
			EmmMessage::AttachRequest(m) => {
				env.ue.cap.ue_net_cap = Some(m.ue_net_cap);
				env.ue.cap.ms_net_cap = m.ms_net_cap;
				// fresh capabilities invalidate any derived view
				env.ue.cap.sec_cap = None;
				match m.identity {
					MobileIdentity::Imsi(d) => env.ue.imsi = Some(d),
					MobileIdentity::Guti(g) => env.ue.guti = Some(g),
					other => {
						debug!(identity = ?other, diagnostic = "unusual attach identity");
					}
				}
				self.attach_type = m.attach_type;
				self.ksi = m.ksi;
				self.esm_container = m.esm_container;
				if self.attach_type == AttachType::Emergency {
					let emerg_cause = env.cfg.emm.att_emerg;
					if emerg_cause != 0 {
						return self.reject(env, emerg_cause, None);
					}
					env.ue.emergency = true;
				}
				self.continue_fsm(env, esm)
			}
			EmmMessage::AttachComplete(m) if self.stage == Stage::WaitComplete => {
				if let Some(guti) = self.guti_new.take() {
					env.ue.guti = Some(guti);
				}
				// the complete carries the default-bearer accept
				let _ = esm.process_in_emm(&m.esm_container, true, env);
				self.success = true;
				info!(ebi = self.ebi, diagnostic = "attach complete");
				let procs = if env.cfg.emm.att_s1_release {
					crate::emm::release_after_procedure(env)
				} else {
					Vec::new()
				};
				EmmStep::reply(procs, ProcNext::Done)
			}
			_ => EmmStep::pending(),
		}
	}

	pub fn postprocess(&mut self, child: EmmProc, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		if !child.succeeded() {
			match child.kind() {
				// the IMEISV is nice-to-have; everything else is fatal
				EmmProcKind::Identification if self.imeisv_requested && self.imsi_ok(env) => {
					return self.continue_fsm(env, esm);
				}
				kind => {
					warn!(child = ?kind, diagnostic = "nested procedure failed, aborting attach");
					return EmmStep::done();
				}
			}
		}
		match child.kind() {
			EmmProcKind::Authentication => self.auth_done = true,
			EmmProcKind::SecurityModeControl => self.smc_done = true,
			_ => {}
		}
		self.continue_fsm(env, esm)
	}

	fn imsi_ok(&self, env: &Env<'_>) -> bool {
		env.ue.imsi.is_some()
	}

	fn continue_fsm(&mut self, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		if env.ue.imsi.is_none() {
			if self.imsi_requested {
				return self.reject(env, emm_cause::ILLEGAL_UE, None);
			}
			self.imsi_requested = true;
			return EmmStep::spawn(SpawnReq::Identification(IDENT_IMSI));
		}
		if env.ue.emergency && !self.auth_done {
			// emergency attach proceeds on the null context, unauthenticated
			policy::install_emergency_ctx(&mut env.s1.sec);
			self.auth_done = true;
			self.smc_done = true;
		}
		if !self.auth_done
			&& policy::require_auth(env.cfg, &mut env.s1.sec, ProcAbbr::Att, Some(self.ksi))
		{
			return EmmStep::spawn(SpawnReq::Authentication);
		}
		self.auth_done = true;
		if !self.smc_done && policy::require_smc(env.cfg, &env.s1.sec, ProcAbbr::Att) {
			return EmmStep::spawn(SpawnReq::SecurityMode);
		}
		self.smc_done = true;
		if env.cfg.security.imeisv_request
			&& env.ue.cap.imeisv.is_none()
			&& !self.imeisv_requested
		{
			self.imeisv_requested = true;
			return EmmStep::spawn(SpawnReq::Identification(IDENT_IMEISV));
		}
		self.accept(env, esm)
	}

	fn accept(&mut self, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		// run the piggybacked PDN connectivity transaction
		let esm_reply = esm.process_in_emm(&self.esm_container, true, env);
		let (ebi, container) = match esm_reply {
			Some(frame)
				if matches!(frame.msg, EsmMessage::ActivateDefaultBearerRequest(_)) =>
			{
				(frame.ebi, frame.encode())
			}
			Some(frame) => {
				warn!(diagnostic = "default bearer setup failed, rejecting attach");
				return self.reject(env, emm_cause::ESM_FAILURE, Some(frame.encode()));
			}
			None => {
				warn!(diagnostic = "no usable ESM container in attach");
				return self.reject(env, emm_cause::ESM_FAILURE, None);
			}
		};
		self.ebi = Some(ebi);

		if env.cfg.emm.att_guti_realloc {
			self.guti_new = Some(Guti {
				plmn: env.cfg.plmn,
				mme_group: env.cfg.mme_group,
				mme_code: env.cfg.mme_code,
				m_tmsi: env.deps.registry.alloc_m_tmsi(),
			});
		}

		let combined_denied = self.attach_type == AttachType::Combined && env.cfg.emm.att_imsi != 0;
		let accept = AttachAccept {
			result: if self.attach_type == AttachType::Combined && !combined_denied { 2 } else { 1 },
			t3412: env.cfg.emm.t3412.into(),
			tai_list: env.ue.tai.map(|t| vec![t]).unwrap_or_default(),
			esm_container: container,
			guti: self.guti_new,
			t3402: Some(env.cfg.emm.t3402.into()),
			t3412_ext: env.cfg.emm.t3412_ext.map(Into::into),
			t3324: env.cfg.emm.t3324.map(Into::into),
			emm_cause: combined_denied.then_some(env.cfg.emm.att_imsi),
		};
		let tx = NasTx::emm(EmmMessage::AttachAccept(accept));
		let Some(nas_buf) =
			env.s1.output_nas_sec(&tx, &env.cfg.security, env.deps.crypto.as_ref())
		else {
			warn!(diagnostic = "unable to protect the attach accept");
			return EmmStep::done();
		};
		let Some(ics) = build_initial_context_setup(env, esm, &[ebi], Some(nas_buf)) else {
			return EmmStep::done();
		};
		self.stage = Stage::WaitComplete;
		EmmStep::reply(vec![ics], ProcNext::Pending)
	}

	fn reject(&mut self, env: &mut Env<'_>, cause: u8, esm_container: Option<Bytes>) -> EmmStep {
		let msg = AttachReject {
			emm_cause: cause,
			esm_container,
			t3346: Some(env.cfg.emm.t3346.into()),
		};
		let procs = env.ret_dnt(NasTx::emm(EmmMessage::AttachReject(msg)));
		EmmStep::reply(procs, ProcNext::Done)
	}
}
