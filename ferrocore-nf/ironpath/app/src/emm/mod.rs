//! EPS Mobility Management sublayer: the ordered procedure stack, the
//! routing of inbound EMM messages and the policy engine.

pub(crate) mod attach;
pub(crate) mod common;
pub(crate) mod detach;
pub mod policy;
pub(crate) mod proc;
pub(crate) mod service;
pub(crate) mod tau;

use ironpath_nas::emm::{EmmMessage, EmmMsgType, EmmStatus};
use ironpath_nas::types::{MobileIdentity, emm_cause};
use ironpath_s1ap::cause::CauseNas;
use ironpath_s1ap::{Cause, InitiatingMessage, S1apPdu, UeContextReleaseCommand};
use tracing::{info, warn};

use crate::emm::attach::AttachProc;
use crate::emm::common::{AuthProc, GutiProc, IdentProc, SmcProc};
use crate::emm::detach::DetachProc;
use crate::emm::proc::{EmmProc, EmmProcBody, EmmProcKind, EmmStep, ProcNext, SpawnReq};
use crate::emm::service::ServiceProc;
use crate::emm::tau::TauProc;
use crate::esm::UeEsm;
use crate::s1::sec::NasMeta;
use crate::s1::{NasTx, PendingProc, S1apProc};
use crate::sms::UeSms;
use crate::sync::Flag;
use crate::{Env, TimerLayer, TimerReq};

/// EMM message kinds accepted without a verified security envelope.
const SEC_EXEMPT: &[EmmMsgType] = &[
	EmmMsgType::AttachRequest,
	EmmMsgType::IdentityResponse, // IMSI only, enforced in routing
	EmmMsgType::AuthenticationResponse,
	EmmMsgType::AuthenticationFailure,
	EmmMsgType::SecurityModeReject,
	EmmMsgType::DetachRequest,
	EmmMsgType::DetachAccept,
	EmmMsgType::TrackingAreaUpdateRequest,
	EmmMsgType::ServiceRequest,
	EmmMsgType::ExtServiceRequest,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmmState {
	/// Not attached; cannot be paged.
	Inactive,
	/// Attached with an S1 connection.
	Active,
	/// Attached, no S1 connection.
	Idle,
}

pub struct UeEmm {
	pub state: EmmState,
	stack: Vec<EmmProc>,
	/// Set while no serving or common procedure is ongoing.
	pub ready: Flag,
	next_id: u64,
	/// Timer arming requests drained by the manager.
	pub armed: Vec<TimerReq>,
}

impl UeEmm {
	pub fn new() -> Self {
		UeEmm {
			state: EmmState::Inactive,
			stack: Vec::new(),
			ready: Flag::new(true),
			next_id: 1,
			armed: Vec::new(),
		}
	}

	pub fn stack_depth(&self) -> usize {
		self.stack.len()
	}

	/// Routes one inbound EMM message through the procedure stack.
	pub(crate) fn process(
		&mut self,
		msg: EmmMessage,
		meta: NasMeta,
		env: &mut Env<'_>,
		esm: &mut UeEsm,
		sms: &mut UeSms,
	) -> Vec<S1apProc> {
		let kind = msg.msg_type();

		// 1) security gate
		if !meta.secure && !SEC_EXEMPT.contains(&kind) {
			info!(kind = ?kind, diagnostic = "discarding message, failed security check");
			return Vec::new();
		}
		if kind == EmmMsgType::IdentityResponse && !meta.secure {
			let imsi_only = matches!(
				&msg,
				EmmMessage::IdentityResponse(m) if matches!(m.identity, MobileIdentity::Imsi(_))
			);
			if !imsi_only {
				info!(diagnostic = "discarding insecure non-IMSI identity response");
				return Vec::new();
			}
		}

		// 2) an MO detach preempts everything in both sublayers
		if matches!(msg, EmmMessage::DetachRequest(_)) {
			self.clear(env);
			esm.clear(None, env);
			return self.push_and_feed(EmmProcBody::Detach(DetachProc::new()), msg, env, esm);
		}

		if !self.stack.is_empty() {
			// 3) EMM Status policy
			if let EmmMessage::EmmStatus(st) = &msg {
				warn!(cause = st.emm_cause, diagnostic = "EMM status received");
				match env.cfg.emm.stat_clear {
					0 => {}
					1 => {
						if let Some(mut top) = self.stack.pop() {
							top.abort(env);
						}
					}
					_ => self.clear(env),
				}
				self.sync_ready();
				return Vec::new();
			}
			// 4) expected response for the top procedure
			if self.stack.last().map(|p| p.filter().contains(&kind)).unwrap_or(false) {
				let step = self.stack.last_mut().unwrap().process(msg, env, esm);
				return self.advance(step, env, esm);
			}
			// 5) unexpected while a procedure is ongoing
			warn!(kind = ?kind, diagnostic = "unexpected message, sending STATUS 98");
			return self.status_reply(
				emm_cause::MSG_TYPE_NOT_COMPATIBLE_WITH_STATE,
				meta.secure,
				env,
			);
		}

		// 6) UE-initiated procedures
		match kind {
			EmmMsgType::AttachRequest => {
				self.push_and_feed(EmmProcBody::Attach(AttachProc::new()), msg, env, esm)
			}
			EmmMsgType::TrackingAreaUpdateRequest => {
				self.push_and_feed(EmmProcBody::Tau(TauProc::new()), msg, env, esm)
			}
			EmmMsgType::ServiceRequest
			| EmmMsgType::ExtServiceRequest
			| EmmMsgType::CpServiceRequest => {
				self.push_and_feed(EmmProcBody::Service(ServiceProc::new()), msg, env, esm)
			}
			EmmMsgType::UplinkNasTransport => {
				let EmmMessage::UplinkNasTransport(t) = msg else { unreachable!() };
				sms.process_uplink(&t.container, env)
			}
			_ => {
				// 7) nothing to route to
				warn!(kind = ?kind, diagnostic = "unexpected message, sending STATUS 96");
				self.status_reply(emm_cause::INVALID_MANDATORY_INFORMATION, meta.secure, env)
			}
		}
	}

	/// Starts a CN-initiated GUTI reallocation.
	pub(crate) fn init_guti_realloc(&mut self, env: &mut Env<'_>, esm: &mut UeEsm) -> Vec<S1apProc> {
		self.push(EmmProcBody::GutiRealloc(GutiProc::new()));
		let step = self.stack.last_mut().unwrap().start(env, esm);
		self.advance(step, env, esm)
	}

	/// Aborts every procedure, top first.
	pub(crate) fn clear(&mut self, env: &mut Env<'_>) {
		while let Some(mut p) = self.stack.pop() {
			p.abort(env);
		}
		self.sync_ready();
	}

	/// Supervision timer expiry for the given procedure instance.
	pub(crate) fn on_timer(&mut self, proc_id: u64, env: &mut Env<'_>, esm: &mut UeEsm) -> Vec<S1apProc> {
		let Some(pos) = self.stack.iter().position(|p| p.id == proc_id) else {
			return Vec::new();
		};
		warn!(kind = ?self.stack[pos].kind(), diagnostic = "EMM procedure timer expired");
		while self.stack.len() > pos + 1 {
			if let Some(mut nested) = self.stack.pop() {
				nested.abort(env);
			}
		}
		let mut expired = self.stack.pop().expect("position checked above");
		expired.abort(env);
		let step = match self.stack.last_mut() {
			Some(parent) => parent.postprocess(expired, env, esm),
			None => EmmStep::pending(),
		};
		self.advance(step, env, esm)
	}

	fn push(&mut self, body: EmmProcBody) {
		let id = self.next_id;
		self.next_id += 1;
		self.stack.push(EmmProc::new(id, body));
		self.ready.clear();
	}

	fn push_and_feed(
		&mut self,
		body: EmmProcBody,
		msg: EmmMessage,
		env: &mut Env<'_>,
		esm: &mut UeEsm,
	) -> Vec<S1apProc> {
		self.push(body);
		let step = self.stack.last_mut().unwrap().process(msg, env, esm);
		self.advance(step, env, esm)
	}

	/// Runs the stack engine: spawns nested procedures, pops completed ones
	/// and resumes parents through `postprocess` until something has to go
	/// out or everything settled.
	fn advance(&mut self, step: EmmStep, env: &mut Env<'_>, esm: &mut UeEsm) -> Vec<S1apProc> {
		let EmmStep { mut procs, mut next } = step;
		loop {
			match next {
				ProcNext::Pending => break,
				ProcNext::Spawn(req) => {
					let kind = match req {
						SpawnReq::Authentication => EmmProcKind::Authentication,
						SpawnReq::SecurityMode => EmmProcKind::SecurityModeControl,
						SpawnReq::Identification(_) => EmmProcKind::Identification,
					};
					if self.stack.iter().any(|p| p.kind() == kind) {
						warn!(kind = ?kind, diagnostic = "common procedure already on the stack");
						break;
					}
					let body = match req {
						SpawnReq::Authentication => EmmProcBody::Authentication(AuthProc::new()),
						SpawnReq::SecurityMode => EmmProcBody::SecurityMode(SmcProc::new()),
						SpawnReq::Identification(t) => {
							EmmProcBody::Identification(IdentProc::new(t))
						}
					};
					self.push(body);
					let step = self.stack.last_mut().unwrap().start(env, esm);
					procs.extend(step.procs);
					next = step.next;
				}
				ProcNext::Done => {
					let Some(finished) = self.stack.pop() else { break };
					self.note_completion(&finished);
					if !procs.is_empty() {
						break;
					}
					match self.stack.last_mut() {
						None => break,
						Some(parent) => {
							let step = parent.postprocess(finished, env, esm);
							procs.extend(step.procs);
							next = step.next;
						}
					}
				}
			}
		}
		self.arm_top(env);
		self.sync_ready();
		procs
	}

	fn note_completion(&mut self, finished: &EmmProc) {
		if !finished.succeeded() {
			return;
		}
		match finished.kind() {
			EmmProcKind::Attach
			| EmmProcKind::TrackingAreaUpdate
			| EmmProcKind::ServiceRequest => self.state = EmmState::Active,
			EmmProcKind::Detach => self.state = EmmState::Inactive,
			_ => {}
		}
	}

	fn arm_top(&mut self, env: &Env<'_>) {
		if let Some(top) = self.stack.last_mut() {
			if !top.armed {
				if let Some(delay) = top.timer(env.cfg) {
					top.armed = true;
					self.armed.push(TimerReq {
						layer: TimerLayer::Emm,
						proc_id: top.id,
						delay,
					});
				}
			}
		}
	}

	fn sync_ready(&self) {
		if self.stack.is_empty() {
			self.ready.set();
		} else {
			self.ready.clear();
		}
	}

	fn status_reply(&self, cause: u8, secure: bool, env: &mut Env<'_>) -> Vec<S1apProc> {
		env.ret_dnt(NasTx::emm_echo(EmmMessage::EmmStatus(EmmStatus { emm_cause: cause }), secure))
	}
}

impl Default for UeEmm {
	fn default() -> Self {
		UeEmm::new()
	}
}

/// UEContextRelease command issued when a procedure is configured to drop
/// the S1 connection on completion.
pub(crate) fn release_after_procedure(env: &mut Env<'_>) -> Vec<S1apProc> {
	let pdu = S1apPdu::Initiating(InitiatingMessage::UeContextReleaseCommand(
		UeContextReleaseCommand { ids: env.s1.ids(), cause: Cause::Nas(CauseNas::NormalRelease) },
	));
	env.s1.start_proc(pdu, Some(PendingProc::UeContextRelease)).into_iter().collect()
}
