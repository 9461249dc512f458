//! UE-associated S1 context: transport anchor, S1AP procedure registry and
//! the downlink side of the NAS security envelope.

pub mod sec;

use std::sync::Arc;

use bytes::Bytes;
use ironpath_nas::crypto::{DIR_DOWNLINK, NasCrypto};
use ironpath_nas::emm::EmmMessage;
use ironpath_nas::esm::EsmFrame;
use ironpath_nas::sec as nas_sec;
use ironpath_s1ap::{
	DownlinkNasTransport, InitiatingMessage, ProcedureCode, S1apPdu, UeS1apIds,
};
use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};

use crate::config::SecurityConfig;
use crate::interfaces::EnbHandle;
use crate::sync::Flag;
use sec::SecurityState;

/// An outbound S1AP procedure handed back to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct S1apProc {
	pub code: ProcedureCode,
	pub pdu: S1apPdu,
}

/// Bookkeeping attached to an outstanding class-1 CN procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingProc {
	InitialContextSetup { ebis: Vec<u8> },
	ERabSetup { ebis: Vec<u8> },
	UeContextRelease,
}

/// A downlink NAS message about to be framed.
#[derive(Debug, Clone)]
pub struct NasTx {
	pub msg: NasTxMsg,
	/// Send in clear regardless of the active context (Status replies echo
	/// the security of the message they answer).
	pub force_plain: bool,
}

#[derive(Debug, Clone)]
pub enum NasTxMsg {
	Emm(EmmMessage),
	Esm(EsmFrame),
}

impl NasTx {
	pub fn emm(msg: EmmMessage) -> Self {
		NasTx { msg: NasTxMsg::Emm(msg), force_plain: false }
	}

	pub fn emm_echo(msg: EmmMessage, secure: bool) -> Self {
		NasTx { msg: NasTxMsg::Emm(msg), force_plain: !secure }
	}

	pub fn esm(frame: EsmFrame) -> Self {
		NasTx { msg: NasTxMsg::Esm(frame), force_plain: false }
	}

	pub fn esm_echo(frame: EsmFrame, secure: bool) -> Self {
		NasTx { msg: NasTxMsg::Esm(frame), force_plain: !secure }
	}

	fn kind_name(&self) -> String {
		match &self.msg {
			NasTxMsg::Emm(m) => format!("{:?}", m.msg_type()),
			NasTxMsg::Esm(f) => format!("{:?}", f.msg.msg_type()),
		}
	}

	fn encode_inner(&self) -> Bytes {
		match &self.msg {
			NasTxMsg::Emm(m) => m.encode(),
			NasTxMsg::Esm(f) => f.encode(),
		}
	}

	fn is_smc(&self) -> bool {
		matches!(&self.msg, NasTxMsg::Emm(EmmMessage::SecurityModeCommand(_)))
	}
}

/// Transport-level anchor of the per-UE handler.
pub struct S1Context {
	pub enb: Option<Arc<dyn EnbHandle>>,
	pub mme_ue_id: Option<u32>,
	pub enb_ue_id: Option<u32>,
	/// SCTP stream the UE signalling rides on.
	pub sid: Option<u16>,
	pub sec: SecurityState,
	pending: FxHashMap<u8, PendingProc>,
	pub connected: Flag,
}

impl S1Context {
	pub fn new() -> Self {
		S1Context {
			enb: None,
			mme_ue_id: None,
			enb_ue_id: None,
			sid: None,
			sec: SecurityState::default(),
			pending: FxHashMap::default(),
			connected: Flag::new(false),
		}
	}

	pub fn ids(&self) -> UeS1apIds {
		UeS1apIds {
			mme_ue_s1ap_id: self.mme_ue_id.unwrap_or(0),
			enb_ue_s1ap_id: self.enb_ue_id.unwrap_or(0),
		}
	}

	pub fn is_connected(&self) -> bool {
		self.connected.is_set()
	}

	/// Binds the eNB for connected signalling.
	pub fn set_ran(&mut self, enb: Arc<dyn EnbHandle>) {
		self.sec.set_active(None);
		self.enb = Some(enb);
		self.connected.set();
	}

	/// Drops the eNB binding. Sub-layer cascades run in the handler.
	pub fn unset_ran(&mut self) {
		self.enb = None;
		self.sec.set_active(None);
		self.clear_s1ap();
		self.connected.clear();
	}

	/// Paging-time binding without a connected UE context.
	pub fn set_ran_unconnected(&mut self, enb: Arc<dyn EnbHandle>) {
		self.sec.set_active(None);
		self.enb = Some(enb);
	}

	pub fn unset_ran_unconnected(&mut self) {
		self.enb = None;
		self.sec.set_active(None);
	}

	pub fn set_ctx(&mut self, mme_ue_id: u32, enb_ue_id: u32, sid: Option<u16>) {
		self.mme_ue_id = Some(mme_ue_id);
		self.enb_ue_id = Some(enb_ue_id);
		self.sid = sid;
	}

	pub fn unset_ctx(&mut self) {
		self.mme_ue_id = None;
		self.enb_ue_id = None;
		self.sid = None;
	}

	/// Aborts every outstanding class-1 CN procedure.
	pub fn clear_s1ap(&mut self) {
		self.pending.clear();
	}

	pub fn take_pending(&mut self, code: ProcedureCode) -> Option<PendingProc> {
		self.pending.remove(&(code as u8))
	}

	pub fn has_pending(&self, code: ProcedureCode) -> bool {
		self.pending.contains_key(&(code as u8))
	}

	/// Starts a CN-initiated procedure. A class-1 procedure whose code is
	/// already outstanding is refused.
	pub fn start_proc(&mut self, pdu: S1apPdu, pending: Option<PendingProc>) -> Option<S1apProc> {
		let code = pdu.procedure_code();
		if code.is_class1() {
			if self.pending.contains_key(&(code as u8)) {
				error!(code = code as u8, diagnostic = "S1AP procedure already ongoing");
				return None;
			}
			if let Some(p) = pending {
				self.pending.insert(code as u8, p);
			}
		}
		Some(S1apProc { code, pdu })
	}

	/// Applies the downlink NAS protection and returns the wire buffer, or
	/// `None` when protection was required but failed (the caller must not
	/// fall back to clear text).
	pub fn output_nas_sec(
		&mut self,
		tx: &NasTx,
		cfg: &SecurityConfig,
		crypto: &dyn NasCrypto,
	) -> Option<Bytes> {
		let plain = cfg.nas_disabled
			|| tx.force_plain
			|| cfg.dl_plain_bypass.iter().any(|n| *n == tx.kind_name());
		if plain {
			return Some(tx.encode_inner());
		}
		let Some(ksi) = self.sec.active_ksi() else {
			// security not activated yet
			return Some(tx.encode_inner());
		};
		if !self.sec.contains(ksi) {
			error!(ksi, diagnostic = "active NAS KSI has no context, cannot protect downlink");
			self.sec.reset();
			return None;
		}
		let is_smc = tx.is_smc();
		let Some(ctx) = self.sec.get_mut(ksi) else { return None };
		let sh = if is_smc {
			// first protected message under the just-installed context
			nas_sec::SH_INTEGRITY_NEW
		} else {
			nas_sec::SH_INTEGRITY_CIPHERED
		};
		let count = ctx.dl;
		let seq = (count & 0xFF) as u8;
		let mut payload = tx.encode_inner().to_vec();
		if sh == nas_sec::SH_INTEGRITY_CIPHERED {
			crypto.apply_keystream(ctx.eea, &ctx.knasenc, count, DIR_DOWNLINK, &mut payload);
		}
		let mut mac_input = Vec::with_capacity(1 + payload.len());
		mac_input.push(seq);
		mac_input.extend_from_slice(&payload);
		let mac = crypto.mac(ctx.eia, &ctx.knasint, count, DIR_DOWNLINK, &mac_input);
		ctx.dl = ctx.dl.wrapping_add(1);
		debug!(dl_count = count, sh, diagnostic = "NAS downlink protected");
		Some(nas_sec::build_secured(sh, mac, seq, &payload))
	}

	/// Frames a downlink NAS message into a DownlinkNASTransport procedure.
	/// Protection failure yields no output.
	pub fn ret_dnt(
		&mut self,
		tx: NasTx,
		cfg: &SecurityConfig,
		crypto: &dyn NasCrypto,
	) -> Vec<S1apProc> {
		let Some(buf) = self.output_nas_sec(&tx, cfg, crypto) else {
			warn!(diagnostic = "downlink NAS protection failed, dropping message");
			return Vec::new();
		};
		let pdu = S1apPdu::Initiating(InitiatingMessage::DownlinkNasTransport(
			DownlinkNasTransport { ids: self.ids(), nas_pdu: buf },
		));
		match self.start_proc(pdu, None) {
			Some(proc) => vec![proc],
			None => Vec::new(),
		}
	}
}

impl Default for S1Context {
	fn default() -> Self {
		S1Context::new()
	}
}

#[cfg(test)]
mod tests {
	use super::sec::{CtxOrigin, SecurityContext};
	use super::*;
	use ironpath_nas::crypto::mock::MockCrypto;
	use ironpath_nas::emm::EmmStatus;
	use ironpath_s1ap::{Cause, ErrorIndication};

	fn status_tx(cause: u8) -> NasTx {
		NasTx::emm(EmmMessage::EmmStatus(EmmStatus { emm_cause: cause }))
	}

	#[test]
	fn plaintext_without_active_ksi() {
		let mut s1 = S1Context::new();
		let cfg = SecurityConfig::default();
		let buf = s1.output_nas_sec(&status_tx(96), &cfg, &MockCrypto).unwrap();
		assert_eq!(buf[0] >> 4, nas_sec::SH_PLAIN);
	}

	#[test]
	fn protected_downlink_counts_are_strictly_increasing() {
		let mut s1 = S1Context::new();
		let cfg = SecurityConfig::default();
		let mut ctx = SecurityContext::new(CtxOrigin::NativeEps, [1; 32]);
		ctx.eia = ironpath_nas::crypto::EiaAlg::Eia1;
		s1.sec.insert(0, ctx);
		s1.sec.set_active(Some(0));
		for expected_seq in 0..3u8 {
			let buf = s1.output_nas_sec(&status_tx(96), &cfg, &MockCrypto).unwrap();
			assert_eq!(buf[0] >> 4, nas_sec::SH_INTEGRITY_CIPHERED);
			assert_eq!(buf[5], expected_seq);
		}
		assert_eq!(s1.sec.active_ctx().unwrap().dl, 3);
	}

	#[test]
	fn bypass_set_forces_clear() {
		let mut s1 = S1Context::new();
		let cfg = SecurityConfig {
			dl_plain_bypass: vec!["EmmStatus".into()],
			..Default::default()
		};
		s1.sec.insert(0, SecurityContext::new(CtxOrigin::NativeEps, [1; 32]));
		s1.sec.set_active(Some(0));
		let buf = s1.output_nas_sec(&status_tx(96), &cfg, &MockCrypto).unwrap();
		assert_eq!(buf[0] >> 4, nas_sec::SH_PLAIN);
		assert_eq!(s1.sec.active_ctx().unwrap().dl, 0, "bypassed send leaves DL count alone");
	}

	#[test]
	fn dangling_active_ksi_fails_protection_without_clear_fallback() {
		let mut s1 = S1Context::new();
		let cfg = SecurityConfig::default();
		s1.sec.set_active(Some(3));
		assert!(s1.output_nas_sec(&status_tx(96), &cfg, &MockCrypto).is_none());
		assert!(s1.sec.active_ksi().is_none(), "security state was reset");
	}

	#[test]
	fn duplicate_class1_procedure_is_refused() {
		let mut s1 = S1Context::new();
		let release = || {
			S1apPdu::Initiating(InitiatingMessage::UeContextReleaseCommand(
				ironpath_s1ap::UeContextReleaseCommand {
					ids: UeS1apIds::default(),
					cause: Cause::Nas(ironpath_s1ap::cause::CauseNas::Detach),
				},
			))
		};
		assert!(s1.start_proc(release(), Some(PendingProc::UeContextRelease)).is_some());
		assert!(s1.start_proc(release(), Some(PendingProc::UeContextRelease)).is_none());
		// class-2 procedures are never registered
		let err = S1apPdu::Initiating(InitiatingMessage::ErrorIndication(ErrorIndication {
			ids: None,
			cause: Cause::stale_response(),
		}));
		assert!(s1.start_proc(err.clone(), None).is_some());
		assert!(s1.start_proc(err, None).is_some());
	}
}
