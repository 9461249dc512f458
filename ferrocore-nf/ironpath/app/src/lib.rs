//! Per-UE control-plane handler of the Ferrocore MME.
//!
//! One `UeHandler` per attached subscriber multiplexes the EMM, ESM and SMS
//! NAS sub-layers over a UE-associated S1AP context and enforces the NAS
//! security envelope. The surrounding server owns routing, transport and
//! subscriber storage, reached through the traits in [`interfaces`].

pub mod config;
pub mod context;
pub mod emm;
pub mod esm;
pub mod interfaces;
pub mod manager;
pub mod s1;
pub mod sms;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ironpath_nas::emm::{EmmMessage, EmmStatus};
use ironpath_nas::sec::{self as nas_sec, NasFrame};
use ironpath_nas::types::emm_cause;
use ironpath_s1ap::{
	Cause, ErrorIndication, InitiatingMessage, Paging, PagingIdentity, S1apPdu, SuccessfulOutcome,
	UnsuccessfulOutcome,
};
use tracing::{debug, error, info, warn};

use crate::config::MmeConfig;
use crate::context::UeContext;
use crate::emm::{EmmState, UeEmm};
use crate::esm::UeEsm;
use crate::interfaces::{Collaborators, EnbHandle};
use crate::s1::sec::NasMeta;
use crate::s1::{NasTx, S1Context, S1apProc};
use crate::sms::UeSms;

/// Which sublayer a supervision timer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerLayer {
	Emm,
	Esm,
}

/// A timer arming request, drained by the manager after every operation.
#[derive(Clone, Copy, Debug)]
pub struct TimerReq {
	pub layer: TimerLayer,
	pub proc_id: u64,
	pub delay: Duration,
}

/// The parts of the handler a procedure may touch besides its own
/// sublayer.
pub(crate) struct Env<'a> {
	pub cfg: &'a MmeConfig,
	pub deps: &'a Collaborators,
	pub ue: &'a mut UeContext,
	pub s1: &'a mut S1Context,
}

impl Env<'_> {
	pub fn ret_dnt(&mut self, tx: NasTx) -> Vec<S1apProc> {
		self.s1.ret_dnt(tx, &self.cfg.security, self.deps.crypto.as_ref())
	}
}

/// Per-UE control-plane handler.
pub struct UeHandler {
	cfg: Arc<MmeConfig>,
	deps: Collaborators,
	pub ue: UeContext,
	pub s1: S1Context,
	pub emm: UeEmm,
	pub esm: UeEsm,
	pub sms: UeSms,
}

impl UeHandler {
	pub fn new(cfg: Arc<MmeConfig>, deps: Collaborators) -> Self {
		let ue = UeContext::new(cfg.plmn);
		UeHandler {
			cfg,
			deps,
			ue,
			s1: S1Context::new(),
			emm: UeEmm::new(),
			esm: UeEsm::new(),
			sms: UeSms::new(),
		}
	}

	fn split(&mut self) -> (Env<'_>, &mut UeEmm, &mut UeEsm, &mut UeSms) {
		(
			Env {
				cfg: self.cfg.as_ref(),
				deps: &self.deps,
				ue: &mut self.ue,
				s1: &mut self.s1,
			},
			&mut self.emm,
			&mut self.esm,
			&mut self.sms,
		)
	}

	//--------------------------------------------------------------------//
	// lifecycle
	//--------------------------------------------------------------------//

	pub fn set_ran(&mut self, enb: Arc<dyn EnbHandle>) {
		self.s1.set_ran(enb);
	}

	/// Drops the S1 binding: resets the active KSI, aborts both sublayers,
	/// suspends user-plane bearers and clears the `connected` event.
	pub fn unset_ran(&mut self) {
		{
			let (mut env, emm, esm, _) = self.split();
			emm.clear(&mut env);
			esm.clear(None, &mut env);
			esm.pdn_suspend(None, &mut env);
		}
		self.s1.unset_ran();
		if self.emm.state == EmmState::Active {
			self.emm.state = EmmState::Idle;
		}
	}

	pub fn set_ran_unconnected(&mut self, enb: Arc<dyn EnbHandle>) {
		self.s1.set_ran_unconnected(enb);
	}

	pub fn unset_ran_unconnected(&mut self) {
		self.s1.unset_ran_unconnected();
	}

	pub fn set_ctx(&mut self, mme_ue_id: u32, enb_ue_id: u32, sid: Option<u16>) {
		self.s1.set_ctx(mme_ue_id, enb_ue_id, sid);
	}

	pub fn unset_ctx(&mut self) {
		self.s1.unset_ctx();
	}

	/// Idempotent: drops every security context, the active KSI, the
	/// cadence counters and the derived capability view.
	pub fn reset_sec_ctx(&mut self) {
		self.s1.sec.reset();
		self.ue.cap.sec_cap = None;
	}

	/// Timer arming requests accumulated since the last drain.
	pub fn take_timer_reqs(&mut self) -> Vec<TimerReq> {
		let mut reqs = std::mem::take(&mut self.emm.armed);
		reqs.append(&mut self.esm.armed);
		reqs
	}

	pub fn on_timer(&mut self, layer: TimerLayer, proc_id: u64) -> Vec<S1apProc> {
		let (mut env, emm, esm, _) = self.split();
		match layer {
			TimerLayer::Emm => emm.on_timer(proc_id, &mut env, esm),
			TimerLayer::Esm => esm.on_timer(proc_id, &mut env),
		}
	}

	//--------------------------------------------------------------------//
	// inbound S1AP
	//--------------------------------------------------------------------//

	/// Dispatches one UE-associated S1AP PDU and returns the PDUs to send
	/// back.
	pub fn process_s1ap_pdu(&mut self, pdu: S1apPdu) -> Vec<S1apProc> {
		match pdu {
			S1apPdu::Initiating(msg) => self.process_initiating(msg),
			S1apPdu::Successful(out) => self.process_outcome_ok(out),
			S1apPdu::Unsuccessful(out) => self.process_outcome_fail(out),
		}
	}

	fn process_initiating(&mut self, msg: InitiatingMessage) -> Vec<S1apProc> {
		match msg {
			InitiatingMessage::InitialUeMessage(m) => {
				self.ue.tai = Some(m.tai);
				self.process_nas(&m.nas_pdu)
			}
			InitiatingMessage::UplinkNasTransport(m) => {
				self.ue.tai = Some(m.tai);
				self.process_nas(&m.nas_pdu)
			}
			InitiatingMessage::UeContextReleaseRequest(m) => {
				info!(cause = ?m.cause, diagnostic = "eNB requested UE context release");
				let (mut env, ..) = self.split();
				emm::release_after_procedure(&mut env)
			}
			InitiatingMessage::UeCapabilityInfoIndication(m) => {
				self.ue.cap.radio_cap = Some(m.ue_radio_capability);
				Vec::new()
			}
			InitiatingMessage::NasNonDeliveryIndication(m) => {
				warn!(cause = ?m.cause, diagnostic = "downlink NAS was not delivered");
				Vec::new()
			}
			InitiatingMessage::ErrorIndication(m) => {
				warn!(cause = ?m.cause, diagnostic = "error indication from eNB");
				Vec::new()
			}
			other => {
				// not a UE-associated eNB-initiated procedure we serve
				error!(
					code = u8::from(other.procedure_code()),
					diagnostic = "invalid eNB-initiated S1AP PDU"
				);
				let pdu = S1apPdu::Initiating(InitiatingMessage::ErrorIndication(
					ErrorIndication {
						ids: Some(self.s1.ids()),
						cause: Cause::unknown_initiating_code(),
					},
				));
				self.s1.start_proc(pdu, None).into_iter().collect()
			}
		}
	}

	fn process_outcome_ok(&mut self, out: SuccessfulOutcome) -> Vec<S1apProc> {
		let code = out.procedure_code();
		let Some(_pending) = self.s1.take_pending(code) else {
			return self.stale_response(code as u8);
		};
		match out {
			SuccessfulOutcome::InitialContextSetupResponse(resp) => {
				for (ebi, cause) in &resp.failed_erabs {
					warn!(ebi = *ebi, cause = ?cause, diagnostic = "E-RAB setup failed");
				}
				let (mut env, _, esm, _) = self.split();
				esm.activate_erabs(&resp.erabs, &mut env);
				Vec::new()
			}
			SuccessfulOutcome::ERabSetupResponse(resp) => {
				let (mut env, _, esm, _) = self.split();
				esm.activate_erabs(&resp.erabs, &mut env);
				Vec::new()
			}
			SuccessfulOutcome::UeContextReleaseComplete(_) => {
				debug!(diagnostic = "UE context released");
				self.unset_ran();
				self.unset_ctx();
				Vec::new()
			}
		}
	}

	fn process_outcome_fail(&mut self, out: UnsuccessfulOutcome) -> Vec<S1apProc> {
		let code = out.procedure_code();
		let Some(_pending) = self.s1.take_pending(code) else {
			return self.stale_response(code as u8);
		};
		match out {
			UnsuccessfulOutcome::InitialContextSetupFailure(f) => {
				warn!(cause = ?f.cause, diagnostic = "initial context setup failed");
				Vec::new()
			}
		}
	}

	fn stale_response(&mut self, code: u8) -> Vec<S1apProc> {
		error!(code, diagnostic = "S1AP response without an outstanding procedure");
		let pdu = S1apPdu::Initiating(InitiatingMessage::ErrorIndication(ErrorIndication {
			ids: Some(self.s1.ids()),
			cause: Cause::stale_response(),
		}));
		self.s1.start_proc(pdu, None).into_iter().collect()
	}

	//--------------------------------------------------------------------//
	// inbound NAS
	//--------------------------------------------------------------------//

	/// Runs an uplink NAS buffer through the security envelope and the
	/// EMM/ESM dispatch, returning the S1AP procedures to send back.
	pub fn process_nas(&mut self, buf: &[u8]) -> Vec<S1apProc> {
		let frame = match nas_sec::parse_outer(buf) {
			Err(e) => {
				warn!(
					error = %e,
					buf = %faster_hex::hex_string(buf),
					diagnostic = "invalid NAS message"
				);
				return self.emm_status(e.cause(), false);
			}
			Ok(frame) => frame,
		};
		match frame {
			NasFrame::Plain { pd, buf } => {
				let meta = NasMeta::insecure();
				match pd {
					nas_sec::PD_EMM => self.dispatch_emm_buf(&buf, meta),
					_ => {
						let (mut env, _, esm, _) = self.split();
						esm.process_buf(&buf, meta, &mut env)
					}
				}
			}
			NasFrame::ServiceRequest(sr) => {
				match s1::sec::process_service_request(
					&sr,
					&mut self.s1.sec,
					&self.cfg.security,
					self.deps.crypto.as_ref(),
				) {
					Err(e) => {
						warn!(code = e.code(), diagnostic = "dropping Service Request");
						Vec::new()
					}
					Ok((meta, verdict)) => {
						if let Some(v) = verdict {
							warn!(code = v.code(), diagnostic = "insecure Service Request accepted");
						}
						let (mut env, emm, esm, sms) = self.split();
						emm.process(EmmMessage::ServiceRequest(sr), meta, &mut env, esm, sms)
					}
				}
			}
			NasFrame::Secured(f) => {
				let unwrapped = match s1::sec::process_secured(
					&f,
					&mut self.s1.sec,
					&self.cfg.security,
					self.deps.crypto.as_ref(),
				) {
					Err(e) => {
						warn!(code = e.code(), diagnostic = "dropping protected NAS message");
						return Vec::new();
					}
					Ok(u) => u,
				};
				if let Some(v) = unwrapped.verdict {
					warn!(code = v.code(), diagnostic = "NAS message accepted without security");
				}
				let meta = unwrapped.meta;
				match unwrapped.inner.first().map(|b| b & 0xF) {
					Some(nas_sec::PD_EMM) => self.dispatch_emm_buf(&unwrapped.inner, meta),
					Some(nas_sec::PD_ESM) => {
						let (mut env, _, esm, _) = self.split();
						esm.process_buf(&unwrapped.inner, meta, &mut env)
					}
					_ => self.emm_status(emm_cause::INVALID_MANDATORY_INFORMATION, meta.secure),
				}
			}
		}
	}

	fn dispatch_emm_buf(&mut self, buf: &[u8], meta: NasMeta) -> Vec<S1apProc> {
		match EmmMessage::decode(buf) {
			Err(e) => {
				warn!(error = %e, diagnostic = "invalid EMM message");
				self.emm_status(e.cause(), meta.secure)
			}
			Ok(msg) => {
				let (mut env, emm, esm, sms) = self.split();
				emm.process(msg, meta, &mut env, esm, sms)
			}
		}
	}

	fn emm_status(&mut self, cause: u8, secure: bool) -> Vec<S1apProc> {
		let (mut env, ..) = self.split();
		env.ret_dnt(NasTx::emm_echo(EmmMessage::EmmStatus(EmmStatus { emm_cause: cause }), secure))
	}

	//--------------------------------------------------------------------//
	// CN-initiated entry points
	//--------------------------------------------------------------------//

	/// Starts a CN-initiated UE-associated S1AP procedure (class-1
	/// duplicates are refused).
	pub fn init_s1ap_proc(
		&mut self,
		pdu: S1apPdu,
		pending: Option<s1::PendingProc>,
	) -> Option<S1apProc> {
		self.s1.start_proc(pdu, pending)
	}

	/// CN-initiated GUTI reallocation.
	pub fn init_guti_realloc(&mut self) -> Vec<S1apProc> {
		let (mut env, emm, esm, _) = self.split();
		emm.init_guti_realloc(&mut env, esm)
	}

	/// Network-initiated (MT) SMS delivery.
	pub fn send_sms(&mut self, cp_pdu: Bytes) -> Vec<S1apProc> {
		let (mut env, _, _, sms) = self.split();
		sms.deliver(cp_pdu, &mut env)
	}

	//--------------------------------------------------------------------//
	// paging
	//--------------------------------------------------------------------//

	/// Non-blocking paging towards every eNB serving the last-known TAI.
	pub fn page(&mut self, cause: Option<u8>) {
		if self.s1.connected.is_set() {
			debug!(diagnostic = "paging: UE already connected");
			return;
		}
		let Some(ies) = self.paging_ies(cause) else {
			return;
		};
		let Some(tai) = self.ue.tai else { return };
		let enbs = self.deps.registry.enbs_serving(&tai);
		if enbs.is_empty() {
			error!(tai = %tai.plmn, tac = tai.tac, diagnostic = "paging: no eNB serving the UE TAI");
			return;
		}
		for enb in &enbs {
			enb.page(ies.clone());
		}
		info!(enbs = enbs.len(), diagnostic = "paging: ongoing");
	}

	/// Paging IEs are always computed from the current cause (an empty set
	/// of optional IEs when none is supplied).
	fn paging_ies(&self, cause: Option<u8>) -> Option<Paging> {
		let tai = self.ue.tai?;
		let identity = match (self.cfg.paging.with_imsi, &self.ue.imsi, &self.ue.guti) {
			(false, _, Some(g)) => PagingIdentity::STmsi((*g).into()),
			(_, Some(imsi), _) => PagingIdentity::Imsi(imsi.clone()),
			(true, None, Some(g)) => PagingIdentity::STmsi((*g).into()),
			_ => {
				error!(diagnostic = "paging: no identity available");
				return None;
			}
		};
		let index_key = match (&self.ue.imsi, &self.ue.guti) {
			(Some(imsi), _) => imsi.parse::<u64>().unwrap_or(0),
			(None, Some(g)) => g.m_tmsi as u64,
			_ => 0,
		};
		Some(Paging {
			ue_identity_index: (index_key % 1024) as u16,
			ue_paging_identity: identity,
			tai_list: vec![tai],
			cn_domain_ps: true,
			paging_cause: cause,
		})
	}
}
