//! EPS Session Management sublayer: sixteen per-bearer procedure stacks,
//! the pending transaction table and the PDN context table.

pub mod pco;
pub(crate) mod proc;

use std::net::IpAddr;

use ironpath_nas::esm::{EsmCauseOnly, EsmFrame, EsmMessage, EsmMsgType};
use ironpath_nas::pco::Pco;
use ironpath_nas::types::{PdnAddress, PdnType, esm_cause};
use ironpath_s1ap::{ErabSetupItem, ErabToSetup, ERabSetupRequest, InitiatingMessage, S1apPdu, UeAmbr};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::esm::proc::{
	BearerSeed, DefaultBearerProc, EsmCtx, EsmInfoProc, EsmNext, EsmProc, EsmProcBody, EsmStep,
	PdnConnProc,
};
use crate::s1::sec::NasMeta;
use crate::s1::{NasTx, PendingProc, S1apProc};
use crate::{Env, TimerLayer, TimerReq};

/// Lifecycle of an activated default bearer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BearerState {
	/// Created, waiting for the eNB to acknowledge the E-RAB.
	Suspended,
	/// GTP-U tunnel established.
	Active,
}

/// One activated (or activating) PDN connection, keyed by its default EBI.
#[derive(Clone, Debug)]
pub struct PdnContext {
	pub apn: String,
	pub addr: PdnAddress,
	pub qci: u8,
	pub priority_level: u8,
	pub preempt_capability: bool,
	pub preempt_vulnerability: bool,
	pub ambr_dl: u64,
	pub ambr_ul: u64,
	pub sgw_addr: IpAddr,
	pub sgw_teid: u32,
	pub enb_addr: Option<IpAddr>,
	pub enb_teid: Option<u32>,
	pub state: BearerState,
}

pub type PdnTable = FxHashMap<u8, PdnContext>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransKind {
	Default,
	Dedicated,
	Modification,
	Deactivation,
}

/// A pending UE-initiated transaction, keyed by PTI.
#[derive(Clone, Debug)]
pub struct EsmTransaction {
	pub kind: TransKind,
	pub apn: Option<String>,
	pub pdn_type: u8,
	pub pco: Option<Pco>,
}

/// ESM message kinds accepted without a verified security envelope: only
/// the very first PDN connectivity of a fresh attach.
const SEC_EXEMPT: &[EsmMsgType] = &[EsmMsgType::PdnConnectivityRequest];

pub struct UeEsm {
	stacks: Vec<Vec<EsmProc>>,
	pub pdn: PdnTable,
	trans: FxHashMap<u8, EsmTransaction>,
	next_id: u64,
	pub armed: Vec<TimerReq>,
}

impl UeEsm {
	pub fn new() -> Self {
		UeEsm {
			stacks: (0..16).map(|_| Vec::new()).collect(),
			pdn: PdnTable::default(),
			trans: FxHashMap::default(),
			next_id: 1,
			armed: Vec::new(),
		}
	}

	pub fn stack_depth(&self, ebi: u8) -> usize {
		self.stacks[(ebi & 0xF) as usize].len()
	}

	pub fn trans_is_empty(&self) -> bool {
		self.trans.is_empty()
	}

	pub fn pdn_ebis(&self) -> Vec<u8> {
		let mut ebis: Vec<u8> = self.pdn.keys().copied().collect();
		ebis.sort_unstable();
		ebis
	}

	/// EPS bearer context status bitmap (bit n set for active EBI n).
	pub fn bearer_status_bitmap(&self) -> u16 {
		self.pdn.keys().fold(0u16, |acc, ebi| acc | (1 << ebi))
	}

	/// Standalone uplink ESM buffer (plain SH=0 frame or deciphered inner).
	pub(crate) fn process_buf(&mut self, buf: &[u8], meta: NasMeta, env: &mut Env<'_>) -> Vec<S1apProc> {
		let frame = match EsmFrame::decode(buf) {
			Err(e) => {
				warn!(error = %e, diagnostic = "invalid ESM message");
				let status = EsmFrame::new(
					0,
					0,
					EsmMessage::EsmStatus(EsmCauseOnly { esm_cause: e.cause() }),
				);
				return env.ret_dnt(NasTx::esm_echo(status, meta.secure));
			}
			Ok(frame) => frame,
		};
		let secure = meta.secure;
		match self.route(frame, meta, env) {
			None => Vec::new(),
			Some(reply) if matches!(reply.msg, EsmMessage::ActivateDefaultBearerRequest(_)) => {
				self.erab_setup_for(reply, env)
			}
			Some(reply) => env.ret_dnt(NasTx::esm_echo(reply, secure)),
		}
	}

	/// ESM buffer carried inside an EMM procedure: the reply comes back as
	/// a plaintext container frame for the parent message, outer security
	/// being applied to the EMM message only.
	pub(crate) fn process_in_emm(
		&mut self,
		buf: &[u8],
		secure: bool,
		env: &mut Env<'_>,
	) -> Option<EsmFrame> {
		match EsmFrame::decode(buf) {
			Err(e) => {
				warn!(error = %e, diagnostic = "invalid embedded ESM message");
				Some(EsmFrame::new(
					0,
					0,
					EsmMessage::EsmStatus(EsmCauseOnly { esm_cause: e.cause() }),
				))
			}
			Ok(frame) => self.route(frame, NasMeta { secure, ul_count: 0 }, env),
		}
	}

	/// Core ESM routing: bearer-scoped stacks, the ESM Status policy and
	/// the UE-initiated dispatch.
	fn route(&mut self, frame: EsmFrame, meta: NasMeta, env: &mut Env<'_>) -> Option<EsmFrame> {
		let kind = frame.msg.msg_type();
		if !meta.secure && !SEC_EXEMPT.contains(&kind) {
			info!(kind = ?kind, diagnostic = "discarding ESM message, failed security check");
			return None;
		}
		let ebi = (frame.ebi & 0xF) as usize;

		if !self.stacks[ebi].is_empty() {
			if let EsmMessage::EsmStatus(st) = &frame.msg {
				warn!(cause = st.esm_cause, diagnostic = "ESM status received");
				match env.cfg.esm.stat_clear {
					0 => {}
					1 => {
						if let Some(mut top) = self.stacks[ebi].pop() {
							let mut ctx =
								EsmCtx { trans: &mut self.trans, pdn: &mut self.pdn, env: &mut *env };
							top.abort(&mut ctx);
						}
					}
					2 => self.clear(Some(frame.ebi), env),
					_ => self.clear(None, env),
				}
				return None;
			}
			if self.stacks[ebi].last().map(|p| p.filter().contains(&kind)).unwrap_or(false) {
				let step = {
					let mut ctx = EsmCtx { trans: &mut self.trans, pdn: &mut self.pdn, env: &mut *env };
					self.stacks[ebi].last_mut().unwrap().process(frame, &mut ctx)
				};
				return self.advance(ebi, step, env);
			}
			warn!(kind = ?kind, diagnostic = "unexpected ESM message, sending STATUS 98");
			return Some(status_frame(
				frame.ebi,
				frame.pti,
				esm_cause::MSG_TYPE_NOT_COMPATIBLE_WITH_STATE,
			));
		}

		match &frame.msg {
			EsmMessage::PdnConnectivityRequest(_) => {
				let id = self.alloc_id();
				self.stacks[ebi]
					.push(EsmProc::new(id, EsmProcBody::PdnConnectivity(PdnConnProc::new())));
				let step = {
					let mut ctx = EsmCtx { trans: &mut self.trans, pdn: &mut self.pdn, env: &mut *env };
					self.stacks[ebi].last_mut().unwrap().process(frame, &mut ctx)
				};
				self.advance(ebi, step, env)
			}
			EsmMessage::PdnDisconnectRequest(_) => {
				self.stub_transaction(TransKind::Deactivation, frame.ebi, frame.pti, env)
			}
			EsmMessage::BearerResourceAllocationRequest(_) => {
				self.stub_transaction(TransKind::Dedicated, frame.ebi, frame.pti, env)
			}
			EsmMessage::BearerResourceModificationRequest(_) => {
				self.stub_transaction(TransKind::Modification, frame.ebi, frame.pti, env)
			}
			_ => {
				warn!(kind = ?kind, diagnostic = "unexpected ESM message, sending STATUS 96");
				Some(status_frame(frame.ebi, frame.pti, esm_cause::INVALID_MANDATORY_INFORMATION))
			}
		}
	}

	/// Dedicated / modification / deactivation transactions share the
	/// dispatch shape of the default one but are answered as unsupported.
	fn stub_transaction(
		&mut self,
		kind: TransKind,
		ebi: u8,
		pti: u8,
		env: &mut Env<'_>,
	) -> Option<EsmFrame> {
		self.trans.insert(pti, EsmTransaction { kind, apn: None, pdn_type: 0, pco: None });
		let cause = match process_trans(pti, &mut self.trans, &mut self.pdn, env) {
			Err(c) => c,
			Ok(_) => esm_cause::PROTOCOL_ERROR_UNSPECIFIED,
		};
		self.trans.remove(&pti);
		let msg = match kind {
			TransKind::Deactivation => {
				EsmMessage::PdnDisconnectReject(EsmCauseOnly { esm_cause: cause })
			}
			TransKind::Dedicated => {
				EsmMessage::BearerResourceAllocationReject(EsmCauseOnly { esm_cause: cause })
			}
			TransKind::Modification => {
				EsmMessage::BearerResourceModificationReject(EsmCauseOnly { esm_cause: cause })
			}
			TransKind::Default => EsmMessage::EsmStatus(EsmCauseOnly { esm_cause: cause }),
		};
		Some(EsmFrame::new(ebi, pti, msg))
	}

	fn alloc_id(&mut self) -> u64 {
		let id = self.next_id;
		self.next_id += 1;
		id
	}

	/// The stack engine mirroring the EMM one, with the extra move of a
	/// finished PDN connectivity into a bearer activation on another stack.
	fn advance(&mut self, start_ebi: usize, step: EsmStep, env: &mut Env<'_>) -> Option<EsmFrame> {
		let mut ebi = start_ebi;
		let EsmStep { mut reply, mut next } = step;
		loop {
			match next {
				EsmNext::Pending => break,
				EsmNext::SpawnInfo { pti } => {
					let id = self.alloc_id();
					self.stacks[ebi]
						.push(EsmProc::new(id, EsmProcBody::EsmInformation(EsmInfoProc::new(pti))));
					let step = {
						let mut ctx = EsmCtx { trans: &mut self.trans, pdn: &mut self.pdn, env: &mut *env };
						self.stacks[ebi].last_mut().unwrap().start(&mut ctx)
					};
					reply = reply.or(step.reply);
					next = step.next;
				}
				EsmNext::Done => {
					let Some(finished) = self.stacks[ebi].pop() else { break };
					if reply.is_some() || self.stacks[ebi].is_empty() {
						break;
					}
					let step = {
						let mut ctx = EsmCtx { trans: &mut self.trans, pdn: &mut self.pdn, env: &mut *env };
						self.stacks[ebi].last_mut().unwrap().postprocess(finished, &mut ctx)
					};
					reply = reply.or(step.reply);
					next = step.next;
				}
				EsmNext::DoneActivate { ebi: new_ebi, seed } => {
					self.stacks[ebi].pop();
					ebi = (new_ebi & 0xF) as usize;
					let id = self.alloc_id();
					self.stacks[ebi].push(EsmProc::new(
						id,
						EsmProcBody::DefaultBearer(DefaultBearerProc::new(seed)),
					));
					let step = {
						let mut ctx = EsmCtx { trans: &mut self.trans, pdn: &mut self.pdn, env: &mut *env };
						self.stacks[ebi].last_mut().unwrap().start(&mut ctx)
					};
					reply = reply.or(step.reply);
					next = step.next;
				}
			}
		}
		self.arm_all(env);
		reply
	}

	fn arm_all(&mut self, env: &Env<'_>) {
		for stack in &mut self.stacks {
			if let Some(top) = stack.last_mut() {
				if !top.armed {
					if let Some(delay) = top.timer(env.cfg) {
						top.armed = true;
						self.armed.push(TimerReq {
							layer: TimerLayer::Esm,
							proc_id: top.id,
							delay,
						});
					}
				}
			}
		}
	}

	/// Supervision timer expiry for an ESM procedure instance.
	pub(crate) fn on_timer(&mut self, proc_id: u64, env: &mut Env<'_>) -> Vec<S1apProc> {
		let Some((ebi, pos)) = self.stacks.iter().enumerate().find_map(|(ebi, stack)| {
			stack.iter().position(|p| p.id == proc_id).map(|pos| (ebi, pos))
		}) else {
			return Vec::new();
		};
		warn!(kind = ?self.stacks[ebi][pos].kind(), diagnostic = "ESM procedure timer expired");
		while self.stacks[ebi].len() > pos + 1 {
			if let Some(mut nested) = self.stacks[ebi].pop() {
				let mut ctx = EsmCtx { trans: &mut self.trans, pdn: &mut self.pdn, env: &mut *env };
				nested.abort(&mut ctx);
			}
		}
		let mut expired = self.stacks[ebi].pop().expect("position checked above");
		{
			let mut ctx = EsmCtx { trans: &mut self.trans, pdn: &mut self.pdn, env: &mut *env };
			expired.abort(&mut ctx);
		}
		let step = if self.stacks[ebi].is_empty() {
			EsmStep::pending()
		} else {
			let mut ctx = EsmCtx { trans: &mut self.trans, pdn: &mut self.pdn, env: &mut *env };
			self.stacks[ebi].last_mut().unwrap().postprocess(expired, &mut ctx)
		};
		match self.advance(ebi, step, env) {
			Some(frame) => env.ret_dnt(NasTx::esm(frame)),
			None => Vec::new(),
		}
	}

	/// Aborts running procedures (for one bearer or all of them) and drops
	/// the pending transactions.
	pub(crate) fn clear(&mut self, ebi: Option<u8>, env: &mut Env<'_>) {
		self.trans.clear();
		let range: Vec<usize> = match ebi {
			Some(e) => vec![(e & 0xF) as usize],
			None => (0..16).collect(),
		};
		for i in range {
			while let Some(mut p) = self.stacks[i].pop() {
				let mut ctx = EsmCtx { trans: &mut self.trans, pdn: &mut self.pdn, env: &mut *env };
				p.abort(&mut ctx);
			}
		}
	}

	/// Tears PDN contexts down, releasing their GTP tunnels.
	pub(crate) fn pdn_clear(&mut self, ebi: Option<u8>, env: &mut Env<'_>) {
		let ebis: Vec<u8> = match ebi {
			Some(e) => vec![e],
			None => self.pdn.keys().copied().collect(),
		};
		for e in ebis {
			if let Some(pdn) = self.pdn.remove(&e) {
				env.deps.gtpu.rem_mobile(pdn.sgw_teid);
			}
		}
	}

	/// Suspends active bearers (S1 release without detach).
	pub(crate) fn pdn_suspend(&mut self, ebi: Option<u8>, env: &mut Env<'_>) {
		let ebis: Vec<u8> = match ebi {
			Some(e) => vec![e],
			None => self.pdn.keys().copied().collect(),
		};
		for e in ebis {
			if let Some(pdn) = self.pdn.get_mut(&e) {
				if pdn.state == BearerState::Active {
					env.deps.gtpu.rem_mobile(pdn.sgw_teid);
					pdn.state = BearerState::Suspended;
					pdn.enb_addr = None;
					pdn.enb_teid = None;
				}
			}
		}
	}

	/// E-RAB setup acknowledgement: records the eNB tunnel endpoint and
	/// flips the bearer to Active.
	pub(crate) fn activate_erabs(&mut self, items: &[ErabSetupItem], env: &mut Env<'_>) {
		for item in items {
			let Some(pdn) = self.pdn.get_mut(&item.ebi) else {
				warn!(ebi = item.ebi, diagnostic = "E-RAB response for an unknown bearer");
				continue;
			};
			pdn.enb_addr = Some(item.enb_address);
			pdn.enb_teid = Some(item.enb_teid);
			if pdn.state != BearerState::Active {
				pdn.state = BearerState::Active;
				let ue_addr = pdn
					.addr
					.ipv4()
					.map(IpAddr::V4)
					.or_else(|| pdn.addr.ipv6().map(IpAddr::V6))
					.expect("a PDN address always carries at least one family");
				env.deps.gtpu.add_mobile(pdn.sgw_teid, ue_addr);
				info!(ebi = item.ebi, diagnostic = "default bearer active");
			}
		}
	}

	/// Wraps a standalone bearer activation into an E-RAB Setup carrying
	/// the protected NAS message.
	fn erab_setup_for(&mut self, frame: EsmFrame, env: &mut Env<'_>) -> Vec<S1apProc> {
		let ebi = frame.ebi;
		let Some(nas) =
			env.s1.output_nas_sec(&NasTx::esm(frame), &env.cfg.security, env.deps.crypto.as_ref())
		else {
			warn!(diagnostic = "unable to protect the bearer activation");
			return Vec::new();
		};
		let Some(pdn) = self.pdn.get(&ebi) else {
			return Vec::new();
		};
		let request = ERabSetupRequest {
			ids: env.s1.ids(),
			ue_ambr: Some(UeAmbr { dl: pdn.ambr_dl, ul: pdn.ambr_ul }),
			erabs: vec![ErabToSetup {
				ebi,
				qci: pdn.qci,
				priority_level: pdn.priority_level,
				preempt_capability: pdn.preempt_capability,
				preempt_vulnerability: pdn.preempt_vulnerability,
				sgw_address: pdn.sgw_addr,
				sgw_teid: pdn.sgw_teid,
				nas_pdu: Some(nas),
			}],
		};
		env.s1
			.start_proc(
				S1apPdu::Initiating(InitiatingMessage::ERabSetupRequest(request)),
				Some(PendingProc::ERabSetup { ebis: vec![ebi] }),
			)
			.into_iter()
			.collect()
	}
}

impl Default for UeEsm {
	fn default() -> Self {
		UeEsm::new()
	}
}

fn status_frame(ebi: u8, pti: u8, cause: u8) -> EsmFrame {
	EsmFrame::new(ebi, pti, EsmMessage::EsmStatus(EsmCauseOnly { esm_cause: cause }))
}

/// Runs a pending transaction: APN resolution, PDN-type reconciliation,
/// PCO answering, EBI allocation and PDN context materialisation. Returns
/// the seed of the bearer activation, or the ESM reject cause.
pub(crate) fn process_trans(
	pti: u8,
	trans: &mut FxHashMap<u8, EsmTransaction>,
	pdn: &mut PdnTable,
	env: &mut Env<'_>,
) -> Result<(u8, BearerSeed), u8> {
	let tr = trans.get(&pti).ok_or(esm_cause::PTI_MISMATCH)?;
	if tr.kind != TransKind::Default {
		return Err(esm_cause::SERVICE_OPTION_NOT_SUPPORTED);
	}

	// 1) APN resolution, wildcard included
	let apn_name = tr.apn.clone().ok_or(esm_cause::UNKNOWN_OR_MISSING_APN)?;
	let apn = env.cfg.apn(&apn_name).ok_or(esm_cause::UNKNOWN_OR_MISSING_APN)?.clone();

	// 2) PDN type reconciliation: the narrower of request and provisioning
	let ue_type =
		PdnType::from_nibble(tr.pdn_type).ok_or(esm_cause::UNKNOWN_PDN_TYPE)?;
	let net_type = apn.provisioned_type().ok_or(esm_cause::PROTOCOL_ERROR_UNSPECIFIED)?;
	let addr = match (ue_type, net_type) {
		(PdnType::Ipv4, PdnType::Ipv4 | PdnType::Ipv4v6) => {
			PdnAddress::Ipv4(apn.ipv4.ok_or(esm_cause::PROTOCOL_ERROR_UNSPECIFIED)?)
		}
		(PdnType::Ipv4, PdnType::Ipv6) => return Err(esm_cause::PDN_TYPE_IPV6_ONLY_ALLOWED),
		(PdnType::Ipv6, PdnType::Ipv6 | PdnType::Ipv4v6) => {
			PdnAddress::Ipv6(apn.ipv6.ok_or(esm_cause::PROTOCOL_ERROR_UNSPECIFIED)?)
		}
		(PdnType::Ipv6, PdnType::Ipv4) => return Err(esm_cause::PDN_TYPE_IPV4_ONLY_ALLOWED),
		(PdnType::Ipv4v6, net) => {
			let v4 = apn.ipv4;
			let v6 = apn.ipv6;
			match net {
				PdnType::Ipv4 => {
					PdnAddress::Ipv4(v4.ok_or(esm_cause::PROTOCOL_ERROR_UNSPECIFIED)?)
				}
				PdnType::Ipv6 => {
					PdnAddress::Ipv6(v6.ok_or(esm_cause::PROTOCOL_ERROR_UNSPECIFIED)?)
				}
				PdnType::Ipv4v6 => PdnAddress::Ipv4v6(
					v4.ok_or(esm_cause::PROTOCOL_ERROR_UNSPECIFIED)?,
					v6.ok_or(esm_cause::PROTOCOL_ERROR_UNSPECIFIED)?,
				),
			}
		}
	};

	// 3) protocol configuration options
	let (pco_resp, pdnaddrreq) = match &tr.pco {
		Some(req) => match pco::process_protconfig(&apn, req, &env.cfg.esm) {
			Some((resp, keep)) => (Some(resp), keep),
			None => (None, true),
		},
		None => (None, true),
	};

	// 4) default QCI
	let qci = apn.qci.unwrap_or(0x80);

	// 5) first free user EBI
	let ebi = (5u8..=15)
		.find(|i| !pdn.contains_key(i))
		.ok_or(esm_cause::MAX_EPS_BEARERS_REACHED)?;

	// 6) PDN context, suspended until the eNB confirms the E-RAB
	debug!(ebi, apn = %apn_name, diagnostic = "materialising PDN context");
	pdn.insert(
		ebi,
		PdnContext {
			apn: apn_name.clone(),
			addr,
			qci,
			priority_level: apn.priority_level,
			preempt_capability: apn.preempt_capability,
			preempt_vulnerability: apn.preempt_vulnerability,
			ambr_dl: apn.bitrate_dl,
			ambr_ul: apn.bitrate_ul,
			sgw_addr: env.deps.registry.sgw_address(),
			sgw_teid: env.deps.registry.alloc_teid(),
			enb_addr: None,
			enb_teid: None,
			state: BearerState::Suspended,
		},
	);

	// 7) seed for the Default EPS Bearer Context Activation
	Ok((
		ebi,
		BearerSeed {
			ebi,
			pti,
			qci,
			apn: apn_name,
			pdn_address: pdnaddrreq.then_some(addr),
			pco: pco_resp,
		},
	))
}
