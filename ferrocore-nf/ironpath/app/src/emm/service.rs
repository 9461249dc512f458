//! EMM Service Request handling (short form, extended and CP variants):
//! cadence-driven re-authentication, then E-RAB re-establishment through
//! InitialContextSetup.

use ironpath_nas::emm::{EmmMessage, ServiceReject};
use ironpath_nas::types::{Ksi, emm_cause};
use tracing::{info, warn};

use crate::Env;
use crate::emm::policy::{self, ProcAbbr};
use crate::emm::proc::{
	EmmProc, EmmProcKind, EmmStep, ProcNext, SpawnReq, build_initial_context_setup,
};
use crate::esm::UeEsm;
use crate::s1::NasTx;

pub struct ServiceProc {
	pub success: bool,
	ksi: Ksi,
	auth_done: bool,
	smc_done: bool,
}

impl ServiceProc {
	pub fn new() -> Self {
		ServiceProc { success: false, ksi: Ksi::no_key(), auth_done: false, smc_done: false }
	}

	pub fn process(&mut self, msg: EmmMessage, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		match msg {
			EmmMessage::ServiceRequest(m) => {
				// the short form carries a bare 3-bit native KSI
				self.ksi = Ksi::native(m.ksi & 0x7);
				self.continue_fsm(env, esm)
			}
			EmmMessage::ExtServiceRequest(m) => {
				self.ksi = m.ksi;
				self.continue_fsm(env, esm)
			}
			EmmMessage::CpServiceRequest(m) => {
				self.ksi = m.ksi;
				self.continue_fsm(env, esm)
			}
			_ => EmmStep::pending(),
		}
	}

	pub fn postprocess(&mut self, child: EmmProc, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		if !child.succeeded() {
			warn!(child = ?child.kind(), diagnostic = "nested procedure failed, rejecting service request");
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
			&& policy::require_auth(env.cfg, &mut env.s1.sec, ProcAbbr::Ser, Some(self.ksi))
		{
			return EmmStep::spawn(SpawnReq::Authentication);
		}
		self.auth_done = true;
		let fresh_ctx = env.s1.sec.active_ctx().is_some_and(|c| c.ul == 0 && c.dl == 0);
		if !self.smc_done
			&& (env.cfg.emm.ser_smc_always || fresh_ctx)
			&& policy::require_smc(env.cfg, &env.s1.sec, ProcAbbr::Ser)
		{
			return EmmStep::spawn(SpawnReq::SecurityMode);
		}
		self.smc_done = true;
		self.establish(env, esm)
	}

	fn establish(&mut self, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		let ebis: Vec<u8> = esm.pdn_ebis();
		if ebis.is_empty() {
			warn!(diagnostic = "service request without any PDN context");
			let procs = self.reject(env, emm_cause::NO_EPS_BEARER_CONTEXT_ACTIVATED);
			return EmmStep::reply(procs, ProcNext::Done);
		}
		let Some(ics) = build_initial_context_setup(env, esm, &ebis, None) else {
			return EmmStep::done();
		};
		self.success = true;
		info!(bearers = ebis.len(), diagnostic = "re-establishing radio bearers");
		EmmStep::reply(vec![ics], ProcNext::Done)
	}

	fn reject(&mut self, env: &mut Env<'_>, cause: u8) -> Vec<crate::s1::S1apProc> {
		let msg = ServiceReject { emm_cause: cause, t3346: Some(env.cfg.emm.t3346.into()) };
		env.ret_dnt(NasTx::emm(EmmMessage::ServiceReject(msg)))
	}
}
