//! UE-associated S1AP PDUs consumed and produced by the per-UE handler.

use std::net::IpAddr;

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use ironpath_nas::types::{STmsi, Tai};

use crate::cause::Cause;
use crate::procedure_code::ProcedureCode;

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum S1apPdu {
	Initiating(InitiatingMessage),
	Successful(SuccessfulOutcome),
	Unsuccessful(UnsuccessfulOutcome),
}

impl S1apPdu {
	pub fn procedure_code(&self) -> ProcedureCode {
		match self {
			S1apPdu::Initiating(m) => m.procedure_code(),
			S1apPdu::Successful(m) => m.procedure_code(),
			S1apPdu::Unsuccessful(m) => m.procedure_code(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum InitiatingMessage {
	InitialUeMessage(InitialUeMessage),
	UplinkNasTransport(UplinkNasTransport),
	DownlinkNasTransport(DownlinkNasTransport),
	InitialContextSetupRequest(InitialContextSetupRequest),
	ERabSetupRequest(ERabSetupRequest),
	UeContextReleaseRequest(UeContextReleaseRequest),
	UeContextReleaseCommand(UeContextReleaseCommand),
	UeCapabilityInfoIndication(UeCapabilityInfoIndication),
	NasNonDeliveryIndication(NasNonDeliveryIndication),
	Paging(Paging),
	ErrorIndication(ErrorIndication),
}

impl InitiatingMessage {
	pub fn procedure_code(&self) -> ProcedureCode {
		match self {
			InitiatingMessage::InitialUeMessage(_) => ProcedureCode::InitialUeMessage,
			InitiatingMessage::UplinkNasTransport(_) => ProcedureCode::UplinkNasTransport,
			InitiatingMessage::DownlinkNasTransport(_) => ProcedureCode::DownlinkNasTransport,
			InitiatingMessage::InitialContextSetupRequest(_) => ProcedureCode::InitialContextSetup,
			InitiatingMessage::ERabSetupRequest(_) => ProcedureCode::ERabSetup,
			InitiatingMessage::UeContextReleaseRequest(_) => ProcedureCode::UeContextReleaseRequest,
			InitiatingMessage::UeContextReleaseCommand(_) => ProcedureCode::UeContextRelease,
			InitiatingMessage::UeCapabilityInfoIndication(_) => {
				ProcedureCode::UeCapabilityInfoIndication
			}
			InitiatingMessage::NasNonDeliveryIndication(_) => {
				ProcedureCode::NasNonDeliveryIndication
			}
			InitiatingMessage::Paging(_) => ProcedureCode::Paging,
			InitiatingMessage::ErrorIndication(_) => ProcedureCode::ErrorIndication,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum SuccessfulOutcome {
	InitialContextSetupResponse(InitialContextSetupResponse),
	ERabSetupResponse(ERabSetupResponse),
	UeContextReleaseComplete(UeContextReleaseComplete),
}

impl SuccessfulOutcome {
	pub fn procedure_code(&self) -> ProcedureCode {
		match self {
			SuccessfulOutcome::InitialContextSetupResponse(_) => ProcedureCode::InitialContextSetup,
			SuccessfulOutcome::ERabSetupResponse(_) => ProcedureCode::ERabSetup,
			SuccessfulOutcome::UeContextReleaseComplete(_) => ProcedureCode::UeContextRelease,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum UnsuccessfulOutcome {
	InitialContextSetupFailure(InitialContextSetupFailure),
}

impl UnsuccessfulOutcome {
	pub fn procedure_code(&self) -> ProcedureCode {
		match self {
			UnsuccessfulOutcome::InitialContextSetupFailure(_) => ProcedureCode::InitialContextSetup,
		}
	}
}

/// MME-side and eNB-side UE S1AP identifier pair carried by every
/// UE-associated PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UeS1apIds {
	pub mme_ue_s1ap_id: u32,
	pub enb_ue_s1ap_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialUeMessage {
	pub enb_ue_s1ap_id: u32,
	pub nas_pdu: Bytes,
	pub tai: Tai,
	pub rrc_establishment_cause: u8,
	pub s_tmsi: Option<STmsi>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkNasTransport {
	pub ids: UeS1apIds,
	pub nas_pdu: Bytes,
	pub tai: Tai,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkNasTransport {
	pub ids: UeS1apIds,
	pub nas_pdu: Bytes,
}

/// E-RAB to be established by InitialContextSetup, with the uplink (SGW)
/// tunnel endpoint; the eNB fills the downlink side in the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErabToSetup {
	pub ebi: u8,
	pub qci: u8,
	pub priority_level: u8,
	pub preempt_capability: bool,
	pub preempt_vulnerability: bool,
	pub sgw_address: IpAddr,
	pub sgw_teid: u32,
	pub nas_pdu: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UeAmbr {
	pub dl: u64,
	pub ul: u64,
}

/// AS-level security capability bitmaps replayed to the eNB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AsSecurityCapabilities {
	pub eea: u16,
	pub eia: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceActivation {
	pub trace_id: [u8; 8],
	pub interfaces: u8,
	pub depth: u8,
	pub collection_address: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialContextSetupRequest {
	pub ids: UeS1apIds,
	pub ue_ambr: UeAmbr,
	pub erabs: Vec<ErabToSetup>,
	pub security_capabilities: AsSecurityCapabilities,
	pub kenb: [u8; 32],
	pub ue_radio_capability: Option<Bytes>,
	pub gummei: Option<Gummei>,
	pub trace_activation: Option<TraceActivation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gummei {
	pub plmn: ironpath_nas::types::Plmn,
	pub mme_group: u16,
	pub mme_code: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ERabSetupRequest {
	pub ids: UeS1apIds,
	pub ue_ambr: Option<UeAmbr>,
	pub erabs: Vec<ErabToSetup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ERabSetupResponse {
	pub ids: UeS1apIds,
	pub erabs: Vec<ErabSetupItem>,
	pub failed_erabs: Vec<(u8, Cause)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErabSetupItem {
	pub ebi: u8,
	pub enb_address: IpAddr,
	pub enb_teid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialContextSetupResponse {
	pub ids: UeS1apIds,
	pub erabs: Vec<ErabSetupItem>,
	pub failed_erabs: Vec<(u8, Cause)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialContextSetupFailure {
	pub ids: UeS1apIds,
	pub cause: Cause,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeContextReleaseRequest {
	pub ids: UeS1apIds,
	pub cause: Cause,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeContextReleaseCommand {
	pub ids: UeS1apIds,
	pub cause: Cause,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeContextReleaseComplete {
	pub ids: UeS1apIds,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeCapabilityInfoIndication {
	pub ids: UeS1apIds,
	pub ue_radio_capability: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NasNonDeliveryIndication {
	pub ids: UeS1apIds,
	pub nas_pdu: Bytes,
	pub cause: Cause,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagingIdentity {
	STmsi(STmsi),
	Imsi(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paging {
	pub ue_identity_index: u16,
	pub ue_paging_identity: PagingIdentity,
	pub tai_list: Vec<Tai>,
	/// CN domain indicator; the EPS core always pages PS.
	pub cn_domain_ps: bool,
	pub paging_cause: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorIndication {
	pub ids: Option<UeS1apIds>,
	pub cause: Cause,
}
