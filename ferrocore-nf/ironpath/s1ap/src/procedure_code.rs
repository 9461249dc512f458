use std::convert::TryFrom;

use thiserror::Error;

/// S1AP elementary procedure codes (36.413 §9.3.7).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcedureCode {
	HandoverPreparation = 0,
	HandoverResourceAllocation = 1,
	HandoverNotification = 2,
	PathSwitchRequest = 3,
	HandoverCancel = 4,
	ERabSetup = 5,
	ERabModify = 6,
	ERabRelease = 7,
	ERabReleaseIndication = 8,
	InitialContextSetup = 9,
	Paging = 10,
	DownlinkNasTransport = 11,
	InitialUeMessage = 12,
	UplinkNasTransport = 13,
	Reset = 14,
	ErrorIndication = 15,
	NasNonDeliveryIndication = 16,
	S1Setup = 17,
	UeContextReleaseRequest = 18,
	DownlinkS1CdmaTunnelling = 19,
	UplinkS1CdmaTunnelling = 20,
	UeContextModification = 21,
	UeCapabilityInfoIndication = 22,
	UeContextRelease = 23,
	EnbStatusTransfer = 24,
	MmeStatusTransfer = 25,
	DeactivateTrace = 26,
	TraceStart = 27,
	TraceFailureIndication = 28,
	EnbConfigurationUpdate = 29,
	MmeConfigurationUpdate = 30,
	LocationReportingControl = 31,
	LocationReportingFailureIndication = 32,
	LocationReport = 33,
	OverloadStart = 34,
	OverloadStop = 35,
	WriteReplaceWarning = 36,
	EnbDirectInformationTransfer = 37,
	MmeDirectInformationTransfer = 38,
	PrivateMessage = 39,
	EnbConfigurationTransfer = 40,
	MmeConfigurationTransfer = 41,
	CellTrafficTrace = 42,
	Kill = 43,
	DownlinkUeAssociatedLppaTransport = 44,
	UplinkUeAssociatedLppaTransport = 45,
	DownlinkNonUeAssociatedLppaTransport = 46,
	UplinkNonUeAssociatedLppaTransport = 47,
	UeRadioCapabilityMatch = 48,
	PwsRestartIndication = 49,
	ERabModificationIndication = 50,
	PwsFailureIndication = 51,
	RerouteNasRequest = 52,
	UeContextModificationIndication = 53,
	ConnectionEstablishmentIndication = 54,
	UeContextSuspend = 55,
	UeContextResume = 56,
	NasDeliveryIndication = 57,
}

impl ProcedureCode {
	/// Class-1 procedures expect a response PDU; class-2 do not.
	pub fn is_class1(&self) -> bool {
		matches!(
			self,
			ProcedureCode::HandoverPreparation
				| ProcedureCode::HandoverResourceAllocation
				| ProcedureCode::PathSwitchRequest
				| ProcedureCode::HandoverCancel
				| ProcedureCode::ERabSetup
				| ProcedureCode::ERabModify
				| ProcedureCode::ERabRelease
				| ProcedureCode::InitialContextSetup
				| ProcedureCode::Reset
				| ProcedureCode::S1Setup
				| ProcedureCode::UeContextModification
				| ProcedureCode::UeContextRelease
				| ProcedureCode::EnbConfigurationUpdate
				| ProcedureCode::MmeConfigurationUpdate
				| ProcedureCode::WriteReplaceWarning
				| ProcedureCode::Kill
				| ProcedureCode::UeRadioCapabilityMatch
				| ProcedureCode::ERabModificationIndication
				| ProcedureCode::UeContextModificationIndication
				| ProcedureCode::UeContextSuspend
				| ProcedureCode::UeContextResume
		)
	}
}

impl TryFrom<u8> for ProcedureCode {
	type Error = ProcedureCodeError;

	fn try_from(value: u8) -> Result<Self, ProcedureCodeError> {
		match value {
			0 => Ok(ProcedureCode::HandoverPreparation),
			1 => Ok(ProcedureCode::HandoverResourceAllocation),
			2 => Ok(ProcedureCode::HandoverNotification),
			3 => Ok(ProcedureCode::PathSwitchRequest),
			4 => Ok(ProcedureCode::HandoverCancel),
			5 => Ok(ProcedureCode::ERabSetup),
			6 => Ok(ProcedureCode::ERabModify),
			7 => Ok(ProcedureCode::ERabRelease),
			8 => Ok(ProcedureCode::ERabReleaseIndication),
			9 => Ok(ProcedureCode::InitialContextSetup),
			10 => Ok(ProcedureCode::Paging),
			11 => Ok(ProcedureCode::DownlinkNasTransport),
			12 => Ok(ProcedureCode::InitialUeMessage),
			13 => Ok(ProcedureCode::UplinkNasTransport),
			14 => Ok(ProcedureCode::Reset),
			15 => Ok(ProcedureCode::ErrorIndication),
			16 => Ok(ProcedureCode::NasNonDeliveryIndication),
			17 => Ok(ProcedureCode::S1Setup),
			18 => Ok(ProcedureCode::UeContextReleaseRequest),
			19 => Ok(ProcedureCode::DownlinkS1CdmaTunnelling),
			20 => Ok(ProcedureCode::UplinkS1CdmaTunnelling),
			21 => Ok(ProcedureCode::UeContextModification),
			22 => Ok(ProcedureCode::UeCapabilityInfoIndication),
			23 => Ok(ProcedureCode::UeContextRelease),
			24 => Ok(ProcedureCode::EnbStatusTransfer),
			25 => Ok(ProcedureCode::MmeStatusTransfer),
			26 => Ok(ProcedureCode::DeactivateTrace),
			27 => Ok(ProcedureCode::TraceStart),
			28 => Ok(ProcedureCode::TraceFailureIndication),
			29 => Ok(ProcedureCode::EnbConfigurationUpdate),
			30 => Ok(ProcedureCode::MmeConfigurationUpdate),
			31 => Ok(ProcedureCode::LocationReportingControl),
			32 => Ok(ProcedureCode::LocationReportingFailureIndication),
			33 => Ok(ProcedureCode::LocationReport),
			34 => Ok(ProcedureCode::OverloadStart),
			35 => Ok(ProcedureCode::OverloadStop),
			36 => Ok(ProcedureCode::WriteReplaceWarning),
			37 => Ok(ProcedureCode::EnbDirectInformationTransfer),
			38 => Ok(ProcedureCode::MmeDirectInformationTransfer),
			39 => Ok(ProcedureCode::PrivateMessage),
			40 => Ok(ProcedureCode::EnbConfigurationTransfer),
			41 => Ok(ProcedureCode::MmeConfigurationTransfer),
			42 => Ok(ProcedureCode::CellTrafficTrace),
			43 => Ok(ProcedureCode::Kill),
			44 => Ok(ProcedureCode::DownlinkUeAssociatedLppaTransport),
			45 => Ok(ProcedureCode::UplinkUeAssociatedLppaTransport),
			46 => Ok(ProcedureCode::DownlinkNonUeAssociatedLppaTransport),
			47 => Ok(ProcedureCode::UplinkNonUeAssociatedLppaTransport),
			48 => Ok(ProcedureCode::UeRadioCapabilityMatch),
			49 => Ok(ProcedureCode::PwsRestartIndication),
			50 => Ok(ProcedureCode::ERabModificationIndication),
			51 => Ok(ProcedureCode::PwsFailureIndication),
			52 => Ok(ProcedureCode::RerouteNasRequest),
			53 => Ok(ProcedureCode::UeContextModificationIndication),
			54 => Ok(ProcedureCode::ConnectionEstablishmentIndication),
			55 => Ok(ProcedureCode::UeContextSuspend),
			56 => Ok(ProcedureCode::UeContextResume),
			57 => Ok(ProcedureCode::NasDeliveryIndication),
			_ => Err(ProcedureCodeError::UnknownProcedureCode(value)),
		}
	}
}

impl From<ProcedureCode> for u8 {
	fn from(value: ProcedureCode) -> u8 {
		value as u8
	}
}

#[derive(Error, Debug)]
pub enum ProcedureCodeError {
	#[error("unknown S1AP procedure code {0}")]
	UnknownProcedureCode(u8),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn code_values_roundtrip() {
		for code in [
			ProcedureCode::InitialContextSetup,
			ProcedureCode::DownlinkNasTransport,
			ProcedureCode::Paging,
			ProcedureCode::UeContextRelease,
			ProcedureCode::NasDeliveryIndication,
		] {
			assert_eq!(ProcedureCode::try_from(code as u8).unwrap(), code);
		}
		assert!(ProcedureCode::try_from(99).is_err());
	}

	#[test]
	fn class_split() {
		assert!(ProcedureCode::InitialContextSetup.is_class1());
		assert!(ProcedureCode::UeContextRelease.is_class1());
		assert!(!ProcedureCode::DownlinkNasTransport.is_class1());
		assert!(!ProcedureCode::Paging.is_class1());
		assert!(!ProcedureCode::ErrorIndication.is_class1());
	}
}
