//! UE-initiated Detach. The routing layer has already aborted every other
//! EMM and ESM procedure before this one starts.

use ironpath_nas::emm::{DetachRequest, EmmMessage};
use ironpath_nas::types::Ksi;
use tracing::info;

use crate::Env;
use crate::emm::policy::{self, ProcAbbr};
use crate::emm::proc::{EmmProc, EmmProcKind, EmmStep, ProcNext, SpawnReq};
use crate::esm::UeEsm;
use crate::s1::NasTx;

pub struct DetachProc {
	pub success: bool,
	switch_off: bool,
	ksi: Ksi,
	auth_done: bool,
}

impl DetachProc {
	pub fn new() -> Self {
		DetachProc { success: false, switch_off: false, ksi: Ksi::no_key(), auth_done: false }
	}

	pub fn process(&mut self, msg: EmmMessage, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		let EmmMessage::DetachRequest(DetachRequest { switch_off, ksi, .. }) = msg else {
			return EmmStep::pending();
		};
		self.switch_off = switch_off;
		self.ksi = ksi;
		if switch_off {
			// no response expected on power-off
			return self.finish(env, esm, false);
		}
		self.continue_fsm(env, esm)
	}

	pub fn postprocess(&mut self, child: EmmProc, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		if child.kind() == EmmProcKind::Authentication {
			// even a failed re-authentication does not block the detach
			self.auth_done = true;
		}
		self.continue_fsm(env, esm)
	}

	fn continue_fsm(&mut self, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		if !self.auth_done
			&& policy::require_auth(env.cfg, &mut env.s1.sec, ProcAbbr::Det, Some(self.ksi))
		{
			return EmmStep::spawn(SpawnReq::Authentication);
		}
		self.auth_done = true;
		self.finish(env, esm, true)
	}

	fn finish(&mut self, env: &mut Env<'_>, esm: &mut UeEsm, accept: bool) -> EmmStep {
		esm.pdn_clear(None, env);
		let mut procs = Vec::new();
		if accept {
			procs.extend(env.ret_dnt(NasTx::emm(EmmMessage::DetachAccept)));
		}
		procs.extend(crate::emm::release_after_procedure(env));
		self.success = true;
		info!(switch_off = self.switch_off, diagnostic = "UE detached");
		EmmStep::reply(procs, ProcNext::Done)
	}
}
