//! The EMM procedure stack element: a tagged variant over the mobility
//! procedures, each exposing `start`, `process`, `postprocess`, `abort`, a
//! response filter and a supervision timer.

use std::time::Duration;

use bytes::Bytes;
use ironpath_nas::emm::EmmMessage;
use ironpath_nas::emm::EmmMsgType;
use ironpath_s1ap::{
	AsSecurityCapabilities, ErabToSetup, Gummei, InitialContextSetupRequest, InitiatingMessage,
	S1apPdu, TraceActivation, UeAmbr,
};
use tracing::warn;

use crate::Env;
use crate::config::MmeConfig;
use crate::emm::attach::AttachProc;
use crate::emm::common::{AuthProc, GutiProc, IdentProc, SmcProc};
use crate::emm::detach::DetachProc;
use crate::emm::policy::{self, ProcAbbr};
use crate::emm::service::ServiceProc;
use crate::emm::tau::TauProc;
use crate::esm::UeEsm;
use crate::s1::{PendingProc, S1apProc};

pub const IDENT_IMSI: u8 = 1;
pub const IDENT_IMEISV: u8 = 3;

/// What the stack engine does after a procedure step.
#[derive(Debug)]
pub enum ProcNext {
	/// Stay on the stack, awaiting a filtered response.
	Pending,
	/// Remove from the stack; the parent may resume via `postprocess`.
	Done,
	/// Push and start a nested common procedure.
	Spawn(SpawnReq),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnReq {
	Authentication,
	SecurityMode,
	Identification(u8),
}

/// One procedure step: S1AP output plus the stack action.
pub struct EmmStep {
	pub procs: Vec<S1apProc>,
	pub next: ProcNext,
}

impl EmmStep {
	pub fn pending() -> Self {
		EmmStep { procs: Vec::new(), next: ProcNext::Pending }
	}

	pub fn done() -> Self {
		EmmStep { procs: Vec::new(), next: ProcNext::Done }
	}

	pub fn spawn(req: SpawnReq) -> Self {
		EmmStep { procs: Vec::new(), next: ProcNext::Spawn(req) }
	}

	pub fn reply(procs: Vec<S1apProc>, next: ProcNext) -> Self {
		EmmStep { procs, next }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmmProcKind {
	Attach,
	TrackingAreaUpdate,
	ServiceRequest,
	Detach,
	Authentication,
	SecurityModeControl,
	Identification,
	GutiReallocation,
}

pub enum EmmProcBody {
	Attach(AttachProc),
	Tau(TauProc),
	Service(ServiceProc),
	Detach(DetachProc),
	Authentication(AuthProc),
	SecurityMode(SmcProc),
	Identification(IdentProc),
	GutiRealloc(GutiProc),
}

pub struct EmmProc {
	pub id: u64,
	/// Supervision timer already requested for the current wait.
	pub armed: bool,
	pub body: EmmProcBody,
}

impl EmmProc {
	pub fn new(id: u64, body: EmmProcBody) -> Self {
		EmmProc { id, armed: false, body }
	}

	pub fn kind(&self) -> EmmProcKind {
		match &self.body {
			EmmProcBody::Attach(_) => EmmProcKind::Attach,
			EmmProcBody::Tau(_) => EmmProcKind::TrackingAreaUpdate,
			EmmProcBody::Service(_) => EmmProcKind::ServiceRequest,
			EmmProcBody::Detach(_) => EmmProcKind::Detach,
			EmmProcBody::Authentication(_) => EmmProcKind::Authentication,
			EmmProcBody::SecurityMode(_) => EmmProcKind::SecurityModeControl,
			EmmProcBody::Identification(_) => EmmProcKind::Identification,
			EmmProcBody::GutiRealloc(_) => EmmProcKind::GutiReallocation,
		}
	}

	pub fn abbr(&self) -> Option<ProcAbbr> {
		match self.kind() {
			EmmProcKind::Attach => Some(ProcAbbr::Att),
			EmmProcKind::TrackingAreaUpdate => Some(ProcAbbr::Tau),
			EmmProcKind::ServiceRequest => Some(ProcAbbr::Ser),
			EmmProcKind::Detach => Some(ProcAbbr::Det),
			_ => None,
		}
	}

	/// NAS message kinds this procedure accepts while on top of the stack.
	pub fn filter(&self) -> &'static [EmmMsgType] {
		match &self.body {
			EmmProcBody::Attach(p) => p.filter(),
			EmmProcBody::Tau(p) => p.filter(),
			EmmProcBody::Service(_) => &[],
			EmmProcBody::Detach(_) => &[],
			EmmProcBody::Authentication(_) => {
				&[EmmMsgType::AuthenticationResponse, EmmMsgType::AuthenticationFailure]
			}
			EmmProcBody::SecurityMode(_) => {
				&[EmmMsgType::SecurityModeComplete, EmmMsgType::SecurityModeReject]
			}
			EmmProcBody::Identification(_) => &[EmmMsgType::IdentityResponse],
			EmmProcBody::GutiRealloc(_) => &[EmmMsgType::GutiReallocationComplete],
		}
	}

	/// Supervision timer for the current wait, when one applies.
	pub fn timer(&self, cfg: &MmeConfig) -> Option<Duration> {
		match &self.body {
			EmmProcBody::Attach(p) => {
				p.awaiting_complete().then(|| Duration::from_secs(cfg.emm.t3450_secs))
			}
			EmmProcBody::Tau(p) => {
				p.awaiting_complete().then(|| Duration::from_secs(cfg.emm.t3450_secs))
			}
			EmmProcBody::Service(_) | EmmProcBody::Detach(_) => None,
			EmmProcBody::Authentication(_) | EmmProcBody::SecurityMode(_) => {
				Some(Duration::from_secs(cfg.emm.t3460_secs))
			}
			EmmProcBody::Identification(_) => Some(Duration::from_secs(cfg.emm.t3470_secs)),
			EmmProcBody::GutiRealloc(_) => Some(Duration::from_secs(cfg.emm.t3450_secs)),
		}
	}

	pub fn succeeded(&self) -> bool {
		match &self.body {
			EmmProcBody::Attach(p) => p.success,
			EmmProcBody::Tau(p) => p.success,
			EmmProcBody::Service(p) => p.success,
			EmmProcBody::Detach(p) => p.success,
			EmmProcBody::Authentication(p) => p.success,
			EmmProcBody::SecurityMode(p) => p.success,
			EmmProcBody::Identification(p) => p.success,
			EmmProcBody::GutiRealloc(p) => p.success,
		}
	}

	pub fn mark_failed(&mut self) {
		match &mut self.body {
			EmmProcBody::Attach(p) => p.success = false,
			EmmProcBody::Tau(p) => p.success = false,
			EmmProcBody::Service(p) => p.success = false,
			EmmProcBody::Detach(p) => p.success = false,
			EmmProcBody::Authentication(p) => p.success = false,
			EmmProcBody::SecurityMode(p) => p.success = false,
			EmmProcBody::Identification(p) => p.success = false,
			EmmProcBody::GutiRealloc(p) => p.success = false,
		}
	}

	/// Entry point for CN-initiated or nested procedures.
	pub fn start(&mut self, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		match &mut self.body {
			EmmProcBody::Authentication(p) => p.start(env),
			EmmProcBody::SecurityMode(p) => p.start(env),
			EmmProcBody::Identification(p) => p.start(env),
			EmmProcBody::GutiRealloc(p) => p.start(env),
			_ => {
				let _ = esm;
				warn!(kind = ?self.kind(), diagnostic = "UE-initiated procedure cannot be started by the CN");
				EmmStep::done()
			}
		}
	}

	/// State advance on a filtered (or initial) NAS message.
	pub fn process(&mut self, msg: EmmMessage, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		match &mut self.body {
			EmmProcBody::Attach(p) => p.process(msg, env, esm),
			EmmProcBody::Tau(p) => p.process(msg, env, esm),
			EmmProcBody::Service(p) => p.process(msg, env, esm),
			EmmProcBody::Detach(p) => p.process(msg, env, esm),
			EmmProcBody::Authentication(p) => p.process(msg, env),
			EmmProcBody::SecurityMode(p) => p.process(msg, env),
			EmmProcBody::Identification(p) => p.process(msg, env),
			EmmProcBody::GutiRealloc(p) => p.process(msg, env),
		}
	}

	/// Resume after a nested procedure terminated with nothing to send.
	pub fn postprocess(&mut self, child: EmmProc, env: &mut Env<'_>, esm: &mut UeEsm) -> EmmStep {
		match &mut self.body {
			EmmProcBody::Attach(p) => p.postprocess(child, env, esm),
			EmmProcBody::Tau(p) => p.postprocess(child, env, esm),
			EmmProcBody::Service(p) => p.postprocess(child, env, esm),
			EmmProcBody::Detach(p) => p.postprocess(child, env, esm),
			_ => {
				// common procedures never parent other procedures
				warn!(kind = ?self.kind(), diagnostic = "unexpected nested procedure completion");
				EmmStep::pending()
			}
		}
	}

	pub fn abort(&mut self, _env: &mut Env<'_>) {
		self.mark_failed();
	}
}

/// Builds the InitialContextSetup carrying the E-RABs of the given bearers
/// and optionally a NAS PDU on the first of them. Also derives the KeNB (a
/// null AS context goes out when no real security context exists).
pub fn build_initial_context_setup(
	env: &mut Env<'_>,
	esm: &UeEsm,
	ebis: &[u8],
	nas_pdu: Option<Bytes>,
) -> Option<S1apProc> {
	let mut erabs = Vec::with_capacity(ebis.len());
	let mut ambr = UeAmbr { dl: 0, ul: 0 };
	let mut nas_pdu = nas_pdu;
	for ebi in ebis {
		let Some(pdn) = esm.pdn.get(ebi) else {
			warn!(ebi = *ebi, diagnostic = "no PDN context for E-RAB setup");
			continue;
		};
		ambr.dl = ambr.dl.max(pdn.ambr_dl);
		ambr.ul = ambr.ul.max(pdn.ambr_ul);
		erabs.push(ErabToSetup {
			ebi: *ebi,
			qci: pdn.qci,
			priority_level: pdn.priority_level,
			preempt_capability: pdn.preempt_capability,
			preempt_vulnerability: pdn.preempt_vulnerability,
			sgw_address: pdn.sgw_addr,
			sgw_teid: pdn.sgw_teid,
			nas_pdu: nas_pdu.take(),
		});
	}
	if erabs.is_empty() {
		return None;
	}

	let cap = policy::effective_sec_cap(env.cfg, env.ue);
	let (kenb, security_capabilities) = match env.s1.sec.active_ctx_mut() {
		Some(ctx) if ctx.origin != crate::s1::sec::CtxOrigin::EmergencyNull => {
			ctx.ul_enb = ctx.ul;
			let kenb = env.deps.kdf.kenb(&ctx.kasme, ctx.ul_enb);
			let caps = AsSecurityCapabilities {
				eea: (cap.eea as u16) << 8,
				eia: (cap.eia as u16) << 8,
			};
			(kenb, caps)
		}
		_ => {
			// null AS context: zero key, null algorithms only
			([0u8; 32], AsSecurityCapabilities { eea: 0x8000, eia: 0x8000 })
		}
	};

	let request = InitialContextSetupRequest {
		ids: env.s1.ids(),
		ue_ambr: ambr,
		erabs,
		security_capabilities,
		kenb,
		ue_radio_capability: env
			.cfg
			.ics
			.include_radio_cap
			.then(|| env.ue.cap.radio_cap.clone())
			.flatten(),
		gummei: env.cfg.ics.include_gummei.then(|| Gummei {
			plmn: env.cfg.plmn,
			mme_group: env.cfg.mme_group,
			mme_code: env.cfg.mme_code,
		}),
		trace_activation: env.cfg.ics.trace.as_ref().map(|t| TraceActivation {
			trace_id: t.trace_id.to_be_bytes(),
			interfaces: t.interfaces,
			depth: t.depth,
			collection_address: t.collection_address,
		}),
	};
	env.s1.start_proc(
		S1apPdu::Initiating(InitiatingMessage::InitialContextSetupRequest(request)),
		Some(PendingProc::InitialContextSetup { ebis: ebis.to_vec() }),
	)
}
