//! ESM procedure stack elements: PDN Connectivity, ESM Information
//! Request and Default EPS Bearer Context Activation.

use std::time::Duration;

use ironpath_nas::esm::{
	ActivateDefaultBearerRequest, EsmFrame, EsmMessage, EsmMsgType, PdnConnectivityReject,
};
use ironpath_nas::pco::Pco;
use ironpath_nas::types::{EpsQos, PdnAddress};
use tracing::{debug, warn};

use crate::Env;
use crate::config::MmeConfig;
use crate::esm::{EsmTransaction, PdnTable, TransKind, process_trans};
use rustc_hash::FxHashMap;

/// Mutable ESM surroundings handed to a procedure step (the stacks
/// themselves stay with the engine).
pub struct EsmCtx<'a, 'b> {
	pub trans: &'a mut FxHashMap<u8, EsmTransaction>,
	pub pdn: &'a mut PdnTable,
	pub env: &'a mut Env<'b>,
}

pub enum EsmNext {
	Pending,
	Done,
	/// Push a nested ESM Information Request on the same stack.
	SpawnInfo { pti: u8 },
	/// Pop this procedure and start a bearer activation on the target
	/// bearer's stack.
	DoneActivate { ebi: u8, seed: BearerSeed },
}

pub struct EsmStep {
	pub reply: Option<EsmFrame>,
	pub next: EsmNext,
}

impl EsmStep {
	pub fn pending() -> Self {
		EsmStep { reply: None, next: EsmNext::Pending }
	}

	pub fn done() -> Self {
		EsmStep { reply: None, next: EsmNext::Done }
	}

	pub fn reply(frame: EsmFrame, next: EsmNext) -> Self {
		EsmStep { reply: Some(frame), next }
	}
}

/// IEs seeding a Default EPS Bearer Context Activation.
#[derive(Clone, Debug)]
pub struct BearerSeed {
	pub ebi: u8,
	pub pti: u8,
	pub qci: u8,
	pub apn: String,
	pub pdn_address: Option<PdnAddress>,
	pub pco: Option<Pco>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsmProcKind {
	PdnConnectivity,
	EsmInformation,
	DefaultBearerActivation,
}

pub enum EsmProcBody {
	PdnConnectivity(PdnConnProc),
	EsmInformation(EsmInfoProc),
	DefaultBearer(DefaultBearerProc),
}

pub struct EsmProc {
	pub id: u64,
	pub armed: bool,
	pub body: EsmProcBody,
}

impl EsmProc {
	pub fn new(id: u64, body: EsmProcBody) -> Self {
		EsmProc { id, armed: false, body }
	}

	pub fn kind(&self) -> EsmProcKind {
		match &self.body {
			EsmProcBody::PdnConnectivity(_) => EsmProcKind::PdnConnectivity,
			EsmProcBody::EsmInformation(_) => EsmProcKind::EsmInformation,
			EsmProcBody::DefaultBearer(_) => EsmProcKind::DefaultBearerActivation,
		}
	}

	pub fn filter(&self) -> &'static [EsmMsgType] {
		match &self.body {
			EsmProcBody::PdnConnectivity(_) => &[],
			EsmProcBody::EsmInformation(_) => &[EsmMsgType::EsmInformationResponse],
			EsmProcBody::DefaultBearer(_) => &[
				EsmMsgType::ActivateDefaultBearerAccept,
				EsmMsgType::ActivateDefaultBearerReject,
			],
		}
	}

	pub fn timer(&self, cfg: &MmeConfig) -> Option<Duration> {
		match &self.body {
			EsmProcBody::PdnConnectivity(_) => None,
			EsmProcBody::EsmInformation(_) => Some(Duration::from_secs(cfg.esm.t3489_secs)),
			EsmProcBody::DefaultBearer(_) => Some(Duration::from_secs(cfg.esm.t3485_secs)),
		}
	}

	pub fn succeeded(&self) -> bool {
		match &self.body {
			EsmProcBody::PdnConnectivity(p) => p.success,
			EsmProcBody::EsmInformation(p) => p.success,
			EsmProcBody::DefaultBearer(p) => p.success,
		}
	}

	pub fn abort(&mut self, ctx: &mut EsmCtx<'_, '_>) {
		match &mut self.body {
			EsmProcBody::PdnConnectivity(p) => p.success = false,
			EsmProcBody::EsmInformation(p) => p.success = false,
			EsmProcBody::DefaultBearer(p) => {
				p.success = false;
				// a dangling activation leaves no half-open bearer behind
				ctx.pdn.remove(&p.seed.ebi);
			}
		}
	}

	pub fn start(&mut self, ctx: &mut EsmCtx<'_, '_>) -> EsmStep {
		match &mut self.body {
			EsmProcBody::EsmInformation(p) => p.start(ctx),
			EsmProcBody::DefaultBearer(p) => p.start(ctx),
			EsmProcBody::PdnConnectivity(_) => {
				warn!(diagnostic = "PDN connectivity is UE-initiated only");
				EsmStep::done()
			}
		}
	}

	pub fn process(&mut self, frame: EsmFrame, ctx: &mut EsmCtx<'_, '_>) -> EsmStep {
		match &mut self.body {
			EsmProcBody::PdnConnectivity(p) => p.process(frame, ctx),
			EsmProcBody::EsmInformation(p) => p.process(frame, ctx),
			EsmProcBody::DefaultBearer(p) => p.process(frame, ctx),
		}
	}

	pub fn postprocess(&mut self, child: EsmProc, ctx: &mut EsmCtx<'_, '_>) -> EsmStep {
		match &mut self.body {
			EsmProcBody::PdnConnectivity(p) => p.postprocess(child, ctx),
			_ => {
				warn!(diagnostic = "unexpected nested ESM completion");
				EsmStep::pending()
			}
		}
	}
}

/// UE-initiated PDN connectivity: records the transaction, optionally runs
/// an ESM Information Request, then turns the transaction into a default
/// bearer activation or a reject.
pub struct PdnConnProc {
	pub success: bool,
	pti: u8,
}

impl PdnConnProc {
	pub fn new() -> Self {
		PdnConnProc { success: false, pti: 0 }
	}

	pub fn process(&mut self, frame: EsmFrame, ctx: &mut EsmCtx<'_, '_>) -> EsmStep {
		let EsmMessage::PdnConnectivityRequest(m) = frame.msg else {
			return EsmStep::pending();
		};
		self.pti = frame.pti;
		let deferred = m.esm_info_transfer && m.apn.is_none();
		ctx.trans.insert(
			frame.pti,
			EsmTransaction {
				kind: TransKind::Default,
				apn: m.apn,
				pdn_type: m.pdn_type,
				pco: m.pco,
			},
		);
		if deferred {
			debug!(pti = self.pti, diagnostic = "APN deferred to ESM information transfer");
			return EsmStep { reply: None, next: EsmNext::SpawnInfo { pti: self.pti } };
		}
		self.finish(ctx)
	}

	pub fn postprocess(&mut self, child: EsmProc, ctx: &mut EsmCtx<'_, '_>) -> EsmStep {
		if !child.succeeded() {
			warn!(diagnostic = "ESM information transfer failed");
		}
		self.finish(ctx)
	}

	fn finish(&mut self, ctx: &mut EsmCtx<'_, '_>) -> EsmStep {
		match process_trans(self.pti, ctx.trans, ctx.pdn, ctx.env) {
			Ok((ebi, seed)) => {
				self.success = true;
				EsmStep { reply: None, next: EsmNext::DoneActivate { ebi, seed } }
			}
			Err(cause) => {
				warn!(cause, pti = self.pti, diagnostic = "PDN connectivity rejected");
				ctx.trans.remove(&self.pti);
				let reject = EsmFrame::new(
					0,
					self.pti,
					EsmMessage::PdnConnectivityReject(PdnConnectivityReject { esm_cause: cause }),
				);
				EsmStep::reply(reject, EsmNext::Done)
			}
		}
	}
}

/// ESM Information Request (T3489), nested under PDN connectivity.
pub struct EsmInfoProc {
	pub success: bool,
	pti: u8,
}

impl EsmInfoProc {
	pub fn new(pti: u8) -> Self {
		EsmInfoProc { success: false, pti }
	}

	pub fn start(&mut self, _ctx: &mut EsmCtx<'_, '_>) -> EsmStep {
		let frame = EsmFrame::new(0, self.pti, EsmMessage::EsmInformationRequest);
		EsmStep::reply(frame, EsmNext::Pending)
	}

	pub fn process(&mut self, frame: EsmFrame, ctx: &mut EsmCtx<'_, '_>) -> EsmStep {
		let EsmMessage::EsmInformationResponse(m) = frame.msg else {
			return EsmStep::pending();
		};
		if let Some(tr) = ctx.trans.get_mut(&self.pti) {
			if tr.apn.is_none() {
				tr.apn = m.apn;
			}
			if tr.pco.is_none() {
				tr.pco = m.pco;
			}
		}
		self.success = true;
		EsmStep::done()
	}
}

/// Default EPS Bearer Context Activation (T3485).
pub struct DefaultBearerProc {
	pub success: bool,
	pub seed: BearerSeed,
}

impl DefaultBearerProc {
	pub fn new(seed: BearerSeed) -> Self {
		DefaultBearerProc { success: false, seed }
	}

	pub fn start(&mut self, _ctx: &mut EsmCtx<'_, '_>) -> EsmStep {
		let msg = ActivateDefaultBearerRequest {
			eps_qos: EpsQos { qci: self.seed.qci },
			apn: self.seed.apn.clone(),
			pdn_address: self.seed.pdn_address,
			pco: self.seed.pco.clone(),
		};
		let frame = EsmFrame::new(
			self.seed.ebi,
			self.seed.pti,
			EsmMessage::ActivateDefaultBearerRequest(msg),
		);
		EsmStep::reply(frame, EsmNext::Pending)
	}

	pub fn process(&mut self, frame: EsmFrame, ctx: &mut EsmCtx<'_, '_>) -> EsmStep {
		match frame.msg {
			EsmMessage::ActivateDefaultBearerAccept(_) => {
				ctx.trans.remove(&self.seed.pti);
				self.success = true;
				debug!(ebi = self.seed.ebi, diagnostic = "default bearer context accepted");
				EsmStep::done()
			}
			EsmMessage::ActivateDefaultBearerReject(m) => {
				warn!(
					ebi = self.seed.ebi,
					cause = m.esm_cause,
					diagnostic = "default bearer activation rejected by UE"
				);
				ctx.trans.remove(&self.seed.pti);
				ctx.pdn.remove(&self.seed.ebi);
				EsmStep::done()
			}
			_ => EsmStep::pending(),
		}
	}
}
