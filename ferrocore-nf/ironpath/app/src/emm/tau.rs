//! EMM Tracking Area Update, with the cadence-driven re-authentication and
//! an optional GUTI reallocation folded into the Accept.

use ironpath_nas::emm::{EmmMessage, EmmMsgType, TrackingAreaUpdateAccept, TrackingAreaUpdateReject};
use ironpath_nas::types::{Guti, Ksi, emm_cause};
use tracing::{info, warn};

use crate::Env;
use crate::emm::policy::{self, ProcAbbr};
use crate::emm::proc::{EmmProc, EmmProcKind, EmmStep, ProcNext, SpawnReq};
use crate::esm::UeEsm;
use crate::s1::NasTx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
	Init,
	WaitComplete,
}

pub struct TauProc {
	pub success: bool,
	update_type: u8,
	ksi: Ksi,
	stage: Stage,
	guti_new: Option<Guti>,
	auth_done: bool,
	smc_done: bool,
}

impl TauProc {
	pub fn new() -> Self {
		TauProc {
			success: false,
			update_type: 0,
			ksi: Ksi::no_key(),
			stage: Stage::Init,
			guti_new: None,
			auth_done: false,
			smc_done: false,
		}
	}

	pub fn filter(&self) -> &'static [EmmMsgType] {
		&[EmmMsgType::TrackingAreaUpdateComplete]
	}

	pub fn awaiting_complete(&self) -> bool {
		self.stage == Stage::WaitComplete
	}

	pub fn process(&mut self, msg: EmmMessage, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		match msg {
			EmmMessage::TrackingAreaUpdateRequest(m) => {
				self.update_type = m.update_type;
				self.ksi = m.ksi;
				if let Some(cap) = m.ue_net_cap {
					env.ue.cap.ue_net_cap = Some(cap);
					env.ue.cap.sec_cap = None;
				}
				self.continue_fsm(env, esm)
			}
			EmmMessage::TrackingAreaUpdateComplete if self.stage == Stage::WaitComplete => {
				if let Some(guti) = self.guti_new.take() {
					env.ue.guti = Some(guti);
				}
				self.success = true;
				let procs = if env.cfg.emm.tau_s1_release {
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
			warn!(child = ?child.kind(), diagnostic = "nested procedure failed, aborting TAU");
			let procs = self.reject(env, emm_cause::ILLEGAL_UE);
			return EmmStep::reply(procs, ProcNext::Done);
		}
		match child.kind() {
			EmmProcKind::Authentication => self.auth_done = true,
			EmmProcKind::SecurityModeControl => self.smc_done = true,
			_ => {}
		}
		self.continue_fsm(env, esm)
	}

	fn continue_fsm(&mut self, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		if !self.auth_done
			&& policy::require_auth(env.cfg, &mut env.s1.sec, ProcAbbr::Tau, Some(self.ksi))
		{
			return EmmStep::spawn(SpawnReq::Authentication);
		}
		self.auth_done = true;
		if !self.smc_done && policy::require_smc(env.cfg, &env.s1.sec, ProcAbbr::Tau) {
			// only needed when a fresh context was just installed
			if env.s1.sec.active_ctx().is_some_and(|c| c.ul == 0 && c.dl == 0) {
				return EmmStep::spawn(SpawnReq::SecurityMode);
			}
		}
		self.smc_done = true;
		self.accept(env, esm)
	}

	fn accept(&mut self, env: &mut Env<'_>, esm: &UeEsm) -> EmmStep {
		if env.cfg.emm.tau_guti_realloc {
			self.guti_new = Some(Guti {
				plmn: env.cfg.plmn,
				mme_group: env.cfg.mme_group,
				mme_code: env.cfg.mme_code,
				m_tmsi: env.deps.registry.alloc_m_tmsi(),
			});
		}
		let accept = TrackingAreaUpdateAccept {
			// 0: TA updated, 1: combined TA/LA updated
			result: if self.update_type == 1 || self.update_type == 2 { 1 } else { 0 },
			t3412: Some(env.cfg.emm.t3412.into()),
			guti: self.guti_new,
			tai_list: env.ue.tai.map(|t| vec![t]),
			bearer_ctx_status: Some(esm.bearer_status_bitmap()),
			t3402: Some(env.cfg.emm.t3402.into()),
			t3324: env.cfg.emm.t3324.map(Into::into),
		};
		let procs = env.ret_dnt(NasTx::emm(EmmMessage::TrackingAreaUpdateAccept(accept)));
		if self.guti_new.is_some() {
			self.stage = Stage::WaitComplete;
			EmmStep::reply(procs, ProcNext::Pending)
		} else {
			self.success = true;
			info!(diagnostic = "tracking area update accepted");
			let mut procs = procs;
			if env.cfg.emm.tau_s1_release {
				procs.extend(crate::emm::release_after_procedure(env));
			}
			EmmStep::reply(procs, ProcNext::Done)
		}
	}

	fn reject(&mut self, env: &mut Env<'_>, cause: u8) -> Vec<crate::s1::S1apProc> {
		let msg =
			TrackingAreaUpdateReject { emm_cause: cause, t3346: Some(env.cfg.emm.t3346.into()) };
		env.ret_dnt(NasTx::emm(EmmMessage::TrackingAreaUpdateReject(msg)))
	}
}
