//! EPS Session Management messages (24.301 §8.3).
//!
//! Every ESM message travels with an EPS bearer identity and a procedure
//! transaction identity in its header; `EsmFrame` carries both next to the
//! typed message.

use bytes::Bytes;
use enum_as_inner::EnumAsInner;

use crate::codec::{NasDecodeError, Reader, Writer};
use crate::pco::Pco;
use crate::sec::PD_ESM;
use crate::types::{EpsQos, PdnAddress};

const IEI_APN: u8 = 0x28;
const IEI_PCO: u8 = 0x27;
const IEI_ESM_INFO_FLAG: u8 = 0xB0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EsmMsgType {
	ActivateDefaultBearerRequest = 0xC1,
	ActivateDefaultBearerAccept = 0xC2,
	ActivateDefaultBearerReject = 0xC3,
	ActivateDedicatedBearerRequest = 0xC5,
	ActivateDedicatedBearerAccept = 0xC6,
	ActivateDedicatedBearerReject = 0xC7,
	ModifyBearerRequest = 0xC9,
	ModifyBearerAccept = 0xCA,
	ModifyBearerReject = 0xCB,
	DeactivateBearerRequest = 0xCD,
	DeactivateBearerAccept = 0xCE,
	PdnConnectivityRequest = 0xD0,
	PdnConnectivityReject = 0xD1,
	PdnDisconnectRequest = 0xD2,
	PdnDisconnectReject = 0xD3,
	BearerResourceAllocationRequest = 0xD4,
	BearerResourceAllocationReject = 0xD5,
	BearerResourceModificationRequest = 0xD6,
	BearerResourceModificationReject = 0xD7,
	EsmInformationRequest = 0xD9,
	EsmInformationResponse = 0xDA,
	EsmStatus = 0xE8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivateDefaultBearerRequest {
	pub eps_qos: EpsQos,
	pub apn: String,
	/// `None` encodes a zero-length PDN address, the form used when the PCO
	/// negotiation moved address assignment off the signalling plane.
	pub pdn_address: Option<PdnAddress>,
	pub pco: Option<Pco>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivateDefaultBearerAccept {
	pub pco: Option<Pco>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivateDefaultBearerReject {
	pub esm_cause: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdnConnectivityRequest {
	/// Requested PDN type nibble, kept raw so a malformed value can be
	/// answered with cause 28 instead of failing the decode.
	pub pdn_type: u8,
	pub request_type: u8,
	pub esm_info_transfer: bool,
	pub apn: Option<String>,
	pub pco: Option<Pco>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdnConnectivityReject {
	pub esm_cause: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdnDisconnectRequest {
	pub linked_ebi: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedBearerRequest {
	pub linked_ebi: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EsmCauseOnly {
	pub esm_cause: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EsmInformationResponse {
	pub apn: Option<String>,
	pub pco: Option<Pco>,
}

#[derive(Clone, Debug, PartialEq, Eq, EnumAsInner)]
pub enum EsmMessage {
	ActivateDefaultBearerRequest(ActivateDefaultBearerRequest),
	ActivateDefaultBearerAccept(ActivateDefaultBearerAccept),
	ActivateDefaultBearerReject(ActivateDefaultBearerReject),
	PdnConnectivityRequest(PdnConnectivityRequest),
	PdnConnectivityReject(PdnConnectivityReject),
	PdnDisconnectRequest(PdnDisconnectRequest),
	PdnDisconnectReject(EsmCauseOnly),
	BearerResourceAllocationRequest(LinkedBearerRequest),
	BearerResourceAllocationReject(EsmCauseOnly),
	BearerResourceModificationRequest(LinkedBearerRequest),
	BearerResourceModificationReject(EsmCauseOnly),
	EsmInformationRequest,
	EsmInformationResponse(EsmInformationResponse),
	EsmStatus(EsmCauseOnly),
}

impl EsmMessage {
	pub fn msg_type(&self) -> EsmMsgType {
		match self {
			EsmMessage::ActivateDefaultBearerRequest(_) => EsmMsgType::ActivateDefaultBearerRequest,
			EsmMessage::ActivateDefaultBearerAccept(_) => EsmMsgType::ActivateDefaultBearerAccept,
			EsmMessage::ActivateDefaultBearerReject(_) => EsmMsgType::ActivateDefaultBearerReject,
			EsmMessage::PdnConnectivityRequest(_) => EsmMsgType::PdnConnectivityRequest,
			EsmMessage::PdnConnectivityReject(_) => EsmMsgType::PdnConnectivityReject,
			EsmMessage::PdnDisconnectRequest(_) => EsmMsgType::PdnDisconnectRequest,
			EsmMessage::PdnDisconnectReject(_) => EsmMsgType::PdnDisconnectReject,
			EsmMessage::BearerResourceAllocationRequest(_) => {
				EsmMsgType::BearerResourceAllocationRequest
			}
			EsmMessage::BearerResourceAllocationReject(_) => {
				EsmMsgType::BearerResourceAllocationReject
			}
			EsmMessage::BearerResourceModificationRequest(_) => {
				EsmMsgType::BearerResourceModificationRequest
			}
			EsmMessage::BearerResourceModificationReject(_) => {
				EsmMsgType::BearerResourceModificationReject
			}
			EsmMessage::EsmInformationRequest => EsmMsgType::EsmInformationRequest,
			EsmMessage::EsmInformationResponse(_) => EsmMsgType::EsmInformationResponse,
			EsmMessage::EsmStatus(_) => EsmMsgType::EsmStatus,
		}
	}
}

/// ESM message together with its header fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EsmFrame {
	pub ebi: u8,
	pub pti: u8,
	pub msg: EsmMessage,
}

impl EsmFrame {
	pub fn new(ebi: u8, pti: u8, msg: EsmMessage) -> Self {
		EsmFrame { ebi, pti, msg }
	}

	pub fn encode(&self) -> Bytes {
		let mut w = Writer::new();
		w.u8((self.ebi << 4) | PD_ESM);
		w.u8(self.pti);
		w.u8(self.msg.msg_type() as u8);
		match &self.msg {
			EsmMessage::ActivateDefaultBearerRequest(m) => {
				w.lv(&[m.eps_qos.qci]);
				w.lv(m.apn.as_bytes());
				match &m.pdn_address {
					Some(addr) => w.lv(&addr.encode()),
					None => w.lv(&[]),
				}
				if let Some(pco) = &m.pco {
					w.tlv(IEI_PCO, &pco.encode());
				}
			}
			EsmMessage::ActivateDefaultBearerAccept(m) => {
				if let Some(pco) = &m.pco {
					w.tlv(IEI_PCO, &pco.encode());
				}
			}
			EsmMessage::ActivateDefaultBearerReject(m) => w.u8(m.esm_cause),
			EsmMessage::PdnConnectivityRequest(m) => {
				w.u8((m.pdn_type << 4) | (m.request_type & 0xF));
				if m.esm_info_transfer {
					w.tlv(IEI_ESM_INFO_FLAG, &[1]);
				}
				if let Some(apn) = &m.apn {
					w.tlv(IEI_APN, apn.as_bytes());
				}
				if let Some(pco) = &m.pco {
					w.tlv(IEI_PCO, &pco.encode());
				}
			}
			EsmMessage::PdnConnectivityReject(m) => w.u8(m.esm_cause),
			EsmMessage::PdnDisconnectRequest(m) => w.u8(m.linked_ebi),
			EsmMessage::BearerResourceAllocationRequest(m)
			| EsmMessage::BearerResourceModificationRequest(m) => w.u8(m.linked_ebi),
			EsmMessage::PdnDisconnectReject(m)
			| EsmMessage::BearerResourceAllocationReject(m)
			| EsmMessage::BearerResourceModificationReject(m)
			| EsmMessage::EsmStatus(m) => w.u8(m.esm_cause),
			EsmMessage::EsmInformationRequest => {}
			EsmMessage::EsmInformationResponse(m) => {
				if let Some(apn) = &m.apn {
					w.tlv(IEI_APN, apn.as_bytes());
				}
				if let Some(pco) = &m.pco {
					w.tlv(IEI_PCO, &pco.encode());
				}
			}
		}
		w.finish()
	}

	pub fn decode(buf: &[u8]) -> Result<Self, NasDecodeError> {
		let mut r = Reader::new(buf);
		let first = r.u8()?;
		if first & 0xF != PD_ESM {
			return Err(NasDecodeError::UnknownProtocolDiscriminator(first & 0xF));
		}
		let ebi = first >> 4;
		let pti = r.u8()?;
		let mt = r.u8()?;
		let msg = match mt {
			x if x == EsmMsgType::ActivateDefaultBearerRequest as u8 => {
				let qos = r.lv()?;
				let qci = *qos.first().ok_or(NasDecodeError::InvalidIe)?;
				let apn = String::from_utf8(r.lv()?.to_vec())
					.map_err(|_| NasDecodeError::InvalidIe)?;
				let addr_raw = r.lv()?;
				let pdn_address =
					if addr_raw.is_empty() { None } else { Some(PdnAddress::decode(addr_raw)?) };
				let mut m = ActivateDefaultBearerRequest {
					eps_qos: EpsQos { qci },
					apn,
					pdn_address,
					pco: None,
				};
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					if tag == IEI_PCO {
						m.pco = Some(Pco::decode(val)?);
					}
				}
				EsmMessage::ActivateDefaultBearerRequest(m)
			}
			x if x == EsmMsgType::ActivateDefaultBearerAccept as u8 => {
				let mut m = ActivateDefaultBearerAccept { pco: None };
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					if tag == IEI_PCO {
						m.pco = Some(Pco::decode(val)?);
					}
				}
				EsmMessage::ActivateDefaultBearerAccept(m)
			}
			x if x == EsmMsgType::ActivateDefaultBearerReject as u8 => {
				EsmMessage::ActivateDefaultBearerReject(ActivateDefaultBearerReject {
					esm_cause: r.u8()?,
				})
			}
			x if x == EsmMsgType::PdnConnectivityRequest as u8 => {
				let b = r.u8()?;
				let mut m = PdnConnectivityRequest {
					pdn_type: b >> 4,
					request_type: b & 0xF,
					esm_info_transfer: false,
					apn: None,
					pco: None,
				};
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					match tag {
						IEI_ESM_INFO_FLAG => m.esm_info_transfer = val.first().copied() == Some(1),
						IEI_APN => {
							m.apn = Some(
								String::from_utf8(val.to_vec())
									.map_err(|_| NasDecodeError::InvalidIe)?,
							)
						}
						IEI_PCO => m.pco = Some(Pco::decode(val)?),
						_ => {}
					}
				}
				EsmMessage::PdnConnectivityRequest(m)
			}
			x if x == EsmMsgType::PdnConnectivityReject as u8 => {
				EsmMessage::PdnConnectivityReject(PdnConnectivityReject { esm_cause: r.u8()? })
			}
			x if x == EsmMsgType::PdnDisconnectRequest as u8 => {
				EsmMessage::PdnDisconnectRequest(PdnDisconnectRequest { linked_ebi: r.u8()? })
			}
			x if x == EsmMsgType::PdnDisconnectReject as u8 => {
				EsmMessage::PdnDisconnectReject(EsmCauseOnly { esm_cause: r.u8()? })
			}
			x if x == EsmMsgType::BearerResourceAllocationRequest as u8 => {
				EsmMessage::BearerResourceAllocationRequest(LinkedBearerRequest {
					linked_ebi: r.u8()?,
				})
			}
			x if x == EsmMsgType::BearerResourceAllocationReject as u8 => {
				EsmMessage::BearerResourceAllocationReject(EsmCauseOnly { esm_cause: r.u8()? })
			}
			x if x == EsmMsgType::BearerResourceModificationRequest as u8 => {
				EsmMessage::BearerResourceModificationRequest(LinkedBearerRequest {
					linked_ebi: r.u8()?,
				})
			}
			x if x == EsmMsgType::BearerResourceModificationReject as u8 => {
				EsmMessage::BearerResourceModificationReject(EsmCauseOnly { esm_cause: r.u8()? })
			}
			x if x == EsmMsgType::EsmInformationRequest as u8 => EsmMessage::EsmInformationRequest,
			x if x == EsmMsgType::EsmInformationResponse as u8 => {
				let mut m = EsmInformationResponse { apn: None, pco: None };
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					match tag {
						IEI_APN => {
							m.apn = Some(
								String::from_utf8(val.to_vec())
									.map_err(|_| NasDecodeError::InvalidIe)?,
							)
						}
						IEI_PCO => m.pco = Some(Pco::decode(val)?),
						_ => {}
					}
				}
				EsmMessage::EsmInformationResponse(m)
			}
			x if x == EsmMsgType::EsmStatus as u8 => {
				EsmMessage::EsmStatus(EsmCauseOnly { esm_cause: r.u8()? })
			}
			other => return Err(NasDecodeError::UnknownMessageType(other)),
		};
		Ok(EsmFrame { ebi, pti, msg })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pco::{Pco, PcoElement};

	fn roundtrip(frame: EsmFrame) {
		let enc = frame.encode();
		assert_eq!(EsmFrame::decode(&enc).unwrap(), frame);
	}

	#[test]
	fn pdn_connectivity_request_roundtrip() {
		roundtrip(EsmFrame::new(
			0,
			1,
			EsmMessage::PdnConnectivityRequest(PdnConnectivityRequest {
				pdn_type: 3,
				request_type: 1,
				esm_info_transfer: true,
				apn: Some("corenet".into()),
				pco: Some(Pco {
					config_proto: 0,
					elements: vec![PcoElement { id: 0x000A, data: vec![] }],
				}),
			}),
		));
	}

	#[test]
	fn default_bearer_request_roundtrip_with_suppressed_address() {
		roundtrip(EsmFrame::new(
			5,
			1,
			EsmMessage::ActivateDefaultBearerRequest(ActivateDefaultBearerRequest {
				eps_qos: EpsQos { qci: 9 },
				apn: "corenet".into(),
				pdn_address: None,
				pco: None,
			}),
		));
	}

	#[test]
	fn default_bearer_request_roundtrip_with_address() {
		roundtrip(EsmFrame::new(
			5,
			1,
			EsmMessage::ActivateDefaultBearerRequest(ActivateDefaultBearerRequest {
				eps_qos: EpsQos { qci: 0x80 },
				apn: "*".into(),
				pdn_address: Some(PdnAddress::Ipv4("10.0.0.2".parse().unwrap())),
				pco: None,
			}),
		));
	}

	#[test]
	fn esm_status_roundtrip() {
		roundtrip(EsmFrame::new(5, 0, EsmMessage::EsmStatus(EsmCauseOnly { esm_cause: 98 })));
	}

	#[test]
	fn ebi_and_pti_travel_in_the_header() {
		let frame = EsmFrame::new(7, 3, EsmMessage::EsmInformationRequest);
		let enc = frame.encode();
		assert_eq!(enc[0], (7 << 4) | 2);
		assert_eq!(enc[1], 3);
		let dec = EsmFrame::decode(&enc).unwrap();
		assert_eq!(dec.ebi, 7);
		assert_eq!(dec.pti, 3);
	}
}
