//! EPS Mobility Management messages (24.301 §8.2).

use bytes::Bytes;
use enum_as_inner::EnumAsInner;

use crate::codec::{NasDecodeError, Reader, Writer};
use crate::sec::{PD_EMM, ShortServiceRequest};
use crate::types::{GprsTimer, Guti, Ksi, MobileIdentity, Tai, UeSecCap};

// Optional IE tags of this codec.
const IEI_MS_NET_CAP: u8 = 0x31;
const IEI_LAST_VISITED_TAI: u8 = 0x52;
const IEI_GUTI: u8 = 0x50;
const IEI_T3402: u8 = 0x17;
const IEI_T3346: u8 = 0x5F;
const IEI_T3412_EXT: u8 = 0x5E;
const IEI_T3324: u8 = 0x6A;
const IEI_EMM_CAUSE: u8 = 0x53;
const IEI_TAI_LIST: u8 = 0x54;
const IEI_UE_NET_CAP: u8 = 0x58;
const IEI_BEARER_CTX_STATUS: u8 = 0x57;
const IEI_AUTS: u8 = 0x30;
const IEI_IMEISV_REQ: u8 = 0xC1;
const IEI_IMEISV: u8 = 0x23;
const IEI_ESM_CONTAINER: u8 = 0x78;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EmmMsgType {
	AttachRequest = 0x41,
	AttachAccept = 0x42,
	AttachComplete = 0x43,
	AttachReject = 0x44,
	DetachRequest = 0x45,
	DetachAccept = 0x46,
	TrackingAreaUpdateRequest = 0x48,
	TrackingAreaUpdateAccept = 0x49,
	TrackingAreaUpdateComplete = 0x4A,
	TrackingAreaUpdateReject = 0x4B,
	ExtServiceRequest = 0x4C,
	CpServiceRequest = 0x4D,
	ServiceReject = 0x4E,
	GutiReallocationCommand = 0x50,
	GutiReallocationComplete = 0x51,
	AuthenticationRequest = 0x52,
	AuthenticationResponse = 0x53,
	AuthenticationReject = 0x54,
	IdentityRequest = 0x55,
	IdentityResponse = 0x56,
	AuthenticationFailure = 0x5C,
	SecurityModeCommand = 0x5D,
	SecurityModeComplete = 0x5E,
	SecurityModeReject = 0x5F,
	EmmStatus = 0x60,
	DownlinkNasTransport = 0x62,
	UplinkNasTransport = 0x63,
	/// Short form, never encoded as an inner message.
	ServiceRequest = 0xFF,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AttachType {
	Eps = 1,
	Combined = 2,
	Emergency = 6,
}

impl AttachType {
	fn from_nibble(v: u8) -> Result<Self, NasDecodeError> {
		match v & 0x7 {
			1 => Ok(AttachType::Eps),
			2 => Ok(AttachType::Combined),
			6 => Ok(AttachType::Emergency),
			_ => Err(NasDecodeError::InvalidIe),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachRequest {
	pub attach_type: AttachType,
	pub ksi: Ksi,
	pub identity: MobileIdentity,
	pub ue_net_cap: Bytes,
	pub esm_container: Bytes,
	pub ms_net_cap: Option<Bytes>,
	pub last_visited_tai: Option<Tai>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachAccept {
	pub result: u8,
	pub t3412: GprsTimer,
	pub tai_list: Vec<Tai>,
	pub esm_container: Bytes,
	pub guti: Option<Guti>,
	pub t3402: Option<GprsTimer>,
	pub t3412_ext: Option<GprsTimer>,
	pub t3324: Option<GprsTimer>,
	pub emm_cause: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachComplete {
	pub esm_container: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachReject {
	pub emm_cause: u8,
	pub esm_container: Option<Bytes>,
	pub t3346: Option<GprsTimer>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetachRequest {
	/// Low 3 bits of the detach type (1 = EPS, 2 = IMSI, 3 = combined).
	pub detach_type: u8,
	pub switch_off: bool,
	pub ksi: Ksi,
	pub identity: MobileIdentity,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackingAreaUpdateRequest {
	/// 0 = TA updating, 1 = combined TA/LA, 2 = combined with IMSI attach,
	/// 3 = periodic.
	pub update_type: u8,
	pub ksi: Ksi,
	pub old_guti: MobileIdentity,
	pub ue_net_cap: Option<Bytes>,
	pub last_visited_tai: Option<Tai>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackingAreaUpdateAccept {
	pub result: u8,
	pub t3412: Option<GprsTimer>,
	pub guti: Option<Guti>,
	pub tai_list: Option<Vec<Tai>>,
	pub bearer_ctx_status: Option<u16>,
	pub t3402: Option<GprsTimer>,
	pub t3324: Option<GprsTimer>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackingAreaUpdateReject {
	pub emm_cause: u8,
	pub t3346: Option<GprsTimer>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtServiceRequest {
	pub service_type: u8,
	pub ksi: Ksi,
	pub m_tmsi: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpServiceRequest {
	pub service_type: u8,
	pub ksi: Ksi,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceReject {
	pub emm_cause: u8,
	pub t3346: Option<GprsTimer>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GutiReallocationCommand {
	pub guti: Guti,
	pub tai_list: Option<Vec<Tai>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationRequest {
	pub ksi: Ksi,
	pub rand: [u8; 16],
	pub autn: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationResponse {
	pub res: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationFailure {
	pub emm_cause: u8,
	pub auts: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityRequest {
	/// 1 = IMSI, 2 = IMEI, 3 = IMEISV.
	pub id_type: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityResponse {
	pub identity: MobileIdentity,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityModeCommand {
	pub eea: u8,
	pub eia: u8,
	pub ksi: Ksi,
	pub replayed_sec_cap: UeSecCap,
	pub imeisv_req: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityModeComplete {
	pub imeisv: Option<MobileIdentity>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityModeReject {
	pub emm_cause: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmmStatus {
	pub emm_cause: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NasTransport {
	pub container: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, EnumAsInner)]
pub enum EmmMessage {
	AttachRequest(AttachRequest),
	AttachAccept(AttachAccept),
	AttachComplete(AttachComplete),
	AttachReject(AttachReject),
	DetachRequest(DetachRequest),
	DetachAccept,
	TrackingAreaUpdateRequest(TrackingAreaUpdateRequest),
	TrackingAreaUpdateAccept(TrackingAreaUpdateAccept),
	TrackingAreaUpdateComplete,
	TrackingAreaUpdateReject(TrackingAreaUpdateReject),
	ServiceRequest(ShortServiceRequest),
	ExtServiceRequest(ExtServiceRequest),
	CpServiceRequest(CpServiceRequest),
	ServiceReject(ServiceReject),
	GutiReallocationCommand(GutiReallocationCommand),
	GutiReallocationComplete,
	AuthenticationRequest(AuthenticationRequest),
	AuthenticationResponse(AuthenticationResponse),
	AuthenticationReject,
	AuthenticationFailure(AuthenticationFailure),
	IdentityRequest(IdentityRequest),
	IdentityResponse(IdentityResponse),
	SecurityModeCommand(SecurityModeCommand),
	SecurityModeComplete(SecurityModeComplete),
	SecurityModeReject(SecurityModeReject),
	EmmStatus(EmmStatus),
	DownlinkNasTransport(NasTransport),
	UplinkNasTransport(NasTransport),
}

fn write_tai_list(w: &mut Writer, list: &[Tai]) {
	let mut inner = Writer::new();
	inner.u8(list.len() as u8);
	for tai in list {
		tai.write(&mut inner);
	}
	w.lv(&inner.finish());
}

fn read_tai_list(buf: &[u8]) -> Result<Vec<Tai>, NasDecodeError> {
	let mut r = Reader::new(buf);
	let n = r.u8()? as usize;
	let mut out = Vec::with_capacity(n);
	for _ in 0..n {
		out.push(Tai::read(&mut r)?);
	}
	Ok(out)
}

fn encode_guti(g: &Guti) -> Vec<u8> {
	let mut out = Vec::with_capacity(10);
	out.extend_from_slice(&g.plmn.0);
	out.extend_from_slice(&g.mme_group.to_be_bytes());
	out.push(g.mme_code);
	out.extend_from_slice(&g.m_tmsi.to_be_bytes());
	out
}

fn decode_guti(buf: &[u8]) -> Result<Guti, NasDecodeError> {
	let mut r = Reader::new(buf);
	let plmn = crate::types::Plmn(r.array::<3>()?);
	let mme_group = r.u16()?;
	let mme_code = r.u8()?;
	let m_tmsi = r.u32()?;
	Ok(Guti { plmn, mme_group, mme_code, m_tmsi })
}

fn timer_opt(buf: &[u8]) -> Result<GprsTimer, NasDecodeError> {
	if buf.len() != 1 {
		return Err(NasDecodeError::InvalidIe);
	}
	Ok(GprsTimer::from_octet(buf[0]))
}

impl EmmMessage {
	pub fn msg_type(&self) -> EmmMsgType {
		match self {
			EmmMessage::AttachRequest(_) => EmmMsgType::AttachRequest,
			EmmMessage::AttachAccept(_) => EmmMsgType::AttachAccept,
			EmmMessage::AttachComplete(_) => EmmMsgType::AttachComplete,
			EmmMessage::AttachReject(_) => EmmMsgType::AttachReject,
			EmmMessage::DetachRequest(_) => EmmMsgType::DetachRequest,
			EmmMessage::DetachAccept => EmmMsgType::DetachAccept,
			EmmMessage::TrackingAreaUpdateRequest(_) => EmmMsgType::TrackingAreaUpdateRequest,
			EmmMessage::TrackingAreaUpdateAccept(_) => EmmMsgType::TrackingAreaUpdateAccept,
			EmmMessage::TrackingAreaUpdateComplete => EmmMsgType::TrackingAreaUpdateComplete,
			EmmMessage::TrackingAreaUpdateReject(_) => EmmMsgType::TrackingAreaUpdateReject,
			EmmMessage::ServiceRequest(_) => EmmMsgType::ServiceRequest,
			EmmMessage::ExtServiceRequest(_) => EmmMsgType::ExtServiceRequest,
			EmmMessage::CpServiceRequest(_) => EmmMsgType::CpServiceRequest,
			EmmMessage::ServiceReject(_) => EmmMsgType::ServiceReject,
			EmmMessage::GutiReallocationCommand(_) => EmmMsgType::GutiReallocationCommand,
			EmmMessage::GutiReallocationComplete => EmmMsgType::GutiReallocationComplete,
			EmmMessage::AuthenticationRequest(_) => EmmMsgType::AuthenticationRequest,
			EmmMessage::AuthenticationResponse(_) => EmmMsgType::AuthenticationResponse,
			EmmMessage::AuthenticationReject => EmmMsgType::AuthenticationReject,
			EmmMessage::AuthenticationFailure(_) => EmmMsgType::AuthenticationFailure,
			EmmMessage::IdentityRequest(_) => EmmMsgType::IdentityRequest,
			EmmMessage::IdentityResponse(_) => EmmMsgType::IdentityResponse,
			EmmMessage::SecurityModeCommand(_) => EmmMsgType::SecurityModeCommand,
			EmmMessage::SecurityModeComplete(_) => EmmMsgType::SecurityModeComplete,
			EmmMessage::SecurityModeReject(_) => EmmMsgType::SecurityModeReject,
			EmmMessage::EmmStatus(_) => EmmMsgType::EmmStatus,
			EmmMessage::DownlinkNasTransport(_) => EmmMsgType::DownlinkNasTransport,
			EmmMessage::UplinkNasTransport(_) => EmmMsgType::UplinkNasTransport,
		}
	}

	pub fn encode(&self) -> Bytes {
		let mut w = Writer::new();
		w.u8(PD_EMM);
		w.u8(self.msg_type() as u8);
		match self {
			EmmMessage::AttachRequest(m) => {
				w.u8((m.ksi.nibble() << 4) | m.attach_type as u8);
				w.lv(&m.identity.encode());
				w.lv(&m.ue_net_cap);
				w.lv16(&m.esm_container);
				if let Some(cap) = &m.ms_net_cap {
					w.tlv(IEI_MS_NET_CAP, cap);
				}
				if let Some(tai) = &m.last_visited_tai {
					let mut inner = Writer::new();
					tai.write(&mut inner);
					w.tlv(IEI_LAST_VISITED_TAI, &inner.finish());
				}
			}
			EmmMessage::AttachAccept(m) => {
				w.u8(m.result);
				w.u8(m.t3412.octet());
				write_tai_list(&mut w, &m.tai_list);
				w.lv16(&m.esm_container);
				if let Some(guti) = &m.guti {
					w.tlv(IEI_GUTI, &encode_guti(guti));
				}
				if let Some(t) = &m.t3402 {
					w.tlv(IEI_T3402, &[t.octet()]);
				}
				if let Some(t) = &m.t3412_ext {
					w.tlv(IEI_T3412_EXT, &[t.octet()]);
				}
				if let Some(t) = &m.t3324 {
					w.tlv(IEI_T3324, &[t.octet()]);
				}
				if let Some(c) = m.emm_cause {
					w.tlv(IEI_EMM_CAUSE, &[c]);
				}
			}
			EmmMessage::AttachComplete(m) => w.lv16(&m.esm_container),
			EmmMessage::AttachReject(m) => {
				w.u8(m.emm_cause);
				if let Some(esm) = &m.esm_container {
					w.u8(IEI_ESM_CONTAINER);
					w.lv16(esm);
				}
				if let Some(t) = &m.t3346 {
					w.tlv(IEI_T3346, &[t.octet()]);
				}
			}
			EmmMessage::DetachRequest(m) => {
				let dt = (m.detach_type & 0x7) | if m.switch_off { 0x8 } else { 0 };
				w.u8((m.ksi.nibble() << 4) | dt);
				w.lv(&m.identity.encode());
			}
			EmmMessage::DetachAccept
			| EmmMessage::TrackingAreaUpdateComplete
			| EmmMessage::GutiReallocationComplete
			| EmmMessage::AuthenticationReject => {}
			EmmMessage::TrackingAreaUpdateRequest(m) => {
				w.u8((m.ksi.nibble() << 4) | (m.update_type & 0xF));
				w.lv(&m.old_guti.encode());
				if let Some(cap) = &m.ue_net_cap {
					w.tlv(IEI_UE_NET_CAP, cap);
				}
				if let Some(tai) = &m.last_visited_tai {
					let mut inner = Writer::new();
					tai.write(&mut inner);
					w.tlv(IEI_LAST_VISITED_TAI, &inner.finish());
				}
			}
			EmmMessage::TrackingAreaUpdateAccept(m) => {
				w.u8(m.result);
				if let Some(t) = &m.t3412 {
					w.tlv(IEI_T3412_EXT, &[t.octet()]);
				}
				if let Some(guti) = &m.guti {
					w.tlv(IEI_GUTI, &encode_guti(guti));
				}
				if let Some(list) = &m.tai_list {
					w.u8(IEI_TAI_LIST);
					write_tai_list(&mut w, list);
				}
				if let Some(st) = m.bearer_ctx_status {
					w.tlv(IEI_BEARER_CTX_STATUS, &st.to_be_bytes());
				}
				if let Some(t) = &m.t3402 {
					w.tlv(IEI_T3402, &[t.octet()]);
				}
				if let Some(t) = &m.t3324 {
					w.tlv(IEI_T3324, &[t.octet()]);
				}
			}
			EmmMessage::TrackingAreaUpdateReject(m) => {
				w.u8(m.emm_cause);
				if let Some(t) = &m.t3346 {
					w.tlv(IEI_T3346, &[t.octet()]);
				}
			}
			EmmMessage::ServiceRequest(m) => {
				// the short form owns its whole frame, including the header
				return m.encode();
			}
			EmmMessage::ExtServiceRequest(m) => {
				w.u8((m.ksi.nibble() << 4) | (m.service_type & 0xF));
				w.lv(&MobileIdentity::Tmsi(m.m_tmsi).encode());
			}
			EmmMessage::CpServiceRequest(m) => {
				w.u8((m.ksi.nibble() << 4) | (m.service_type & 0xF));
			}
			EmmMessage::ServiceReject(m) => {
				w.u8(m.emm_cause);
				if let Some(t) = &m.t3346 {
					w.tlv(IEI_T3346, &[t.octet()]);
				}
			}
			EmmMessage::GutiReallocationCommand(m) => {
				w.lv(&encode_guti(&m.guti));
				if let Some(list) = &m.tai_list {
					w.u8(IEI_TAI_LIST);
					write_tai_list(&mut w, list);
				}
			}
			EmmMessage::AuthenticationRequest(m) => {
				w.u8(m.ksi.nibble());
				w.bytes(&m.rand);
				w.lv(&m.autn);
			}
			EmmMessage::AuthenticationResponse(m) => w.lv(&m.res),
			EmmMessage::AuthenticationFailure(m) => {
				w.u8(m.emm_cause);
				if let Some(auts) = &m.auts {
					w.tlv(IEI_AUTS, auts);
				}
			}
			EmmMessage::IdentityRequest(m) => w.u8(m.id_type),
			EmmMessage::IdentityResponse(m) => w.lv(&m.identity.encode()),
			EmmMessage::SecurityModeCommand(m) => {
				w.u8((m.eea << 4) | (m.eia & 0xF));
				w.u8(m.ksi.nibble());
				w.lv(&m.replayed_sec_cap.encode());
				if m.imeisv_req {
					w.tlv(IEI_IMEISV_REQ, &[1]);
				}
			}
			EmmMessage::SecurityModeComplete(m) => {
				if let Some(id) = &m.imeisv {
					w.tlv(IEI_IMEISV, &id.encode());
				}
			}
			EmmMessage::SecurityModeReject(m) => w.u8(m.emm_cause),
			EmmMessage::EmmStatus(m) => w.u8(m.emm_cause),
			EmmMessage::DownlinkNasTransport(m) | EmmMessage::UplinkNasTransport(m) => {
				w.lv(&m.container);
			}
		}
		w.finish()
	}

	/// Decodes a plaintext inner EMM message (security header already
	/// removed). The short Service Request never reaches this path.
	pub fn decode(buf: &[u8]) -> Result<Self, NasDecodeError> {
		let mut r = Reader::new(buf);
		let first = r.u8()?;
		if first & 0xF != PD_EMM || first >> 4 != 0 {
			return Err(NasDecodeError::UnknownProtocolDiscriminator(first & 0xF));
		}
		let mt = r.u8()?;
		let msg = match mt {
			x if x == EmmMsgType::AttachRequest as u8 => {
				let b = r.u8()?;
				let attach_type = AttachType::from_nibble(b & 0xF)?;
				let ksi = Ksi::from_nibble(b >> 4);
				let identity = MobileIdentity::decode(r.lv()?)?;
				let ue_net_cap = Bytes::copy_from_slice(r.lv()?);
				let esm_container = Bytes::copy_from_slice(r.lv16()?);
				let mut m = AttachRequest {
					attach_type,
					ksi,
					identity,
					ue_net_cap,
					esm_container,
					ms_net_cap: None,
					last_visited_tai: None,
				};
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					match tag {
						IEI_MS_NET_CAP => m.ms_net_cap = Some(Bytes::copy_from_slice(val)),
						IEI_LAST_VISITED_TAI => {
							m.last_visited_tai = Some(Tai::read(&mut Reader::new(val))?)
						}
						_ => {}
					}
				}
				EmmMessage::AttachRequest(m)
			}
			x if x == EmmMsgType::AttachAccept as u8 => {
				let result = r.u8()?;
				let t3412 = GprsTimer::from_octet(r.u8()?);
				let tai_list = read_tai_list(r.lv()?)?;
				let esm_container = Bytes::copy_from_slice(r.lv16()?);
				let mut m = AttachAccept {
					result,
					t3412,
					tai_list,
					esm_container,
					guti: None,
					t3402: None,
					t3412_ext: None,
					t3324: None,
					emm_cause: None,
				};
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					match tag {
						IEI_GUTI => m.guti = Some(decode_guti(val)?),
						IEI_T3402 => m.t3402 = Some(timer_opt(val)?),
						IEI_T3412_EXT => m.t3412_ext = Some(timer_opt(val)?),
						IEI_T3324 => m.t3324 = Some(timer_opt(val)?),
						IEI_EMM_CAUSE => {
							m.emm_cause = Some(*val.first().ok_or(NasDecodeError::InvalidIe)?)
						}
						_ => {}
					}
				}
				EmmMessage::AttachAccept(m)
			}
			x if x == EmmMsgType::AttachComplete as u8 => EmmMessage::AttachComplete(
				AttachComplete { esm_container: Bytes::copy_from_slice(r.lv16()?) },
			),
			x if x == EmmMsgType::AttachReject as u8 => {
				let emm_cause = r.u8()?;
				let mut m = AttachReject { emm_cause, esm_container: None, t3346: None };
				while !r.is_empty() {
					let tag = r.u8()?;
					match tag {
						IEI_ESM_CONTAINER => {
							m.esm_container = Some(Bytes::copy_from_slice(r.lv16()?))
						}
						IEI_T3346 => m.t3346 = Some(timer_opt(r.lv()?)?),
						_ => {
							r.lv()?;
						}
					}
				}
				EmmMessage::AttachReject(m)
			}
			x if x == EmmMsgType::DetachRequest as u8 => {
				let b = r.u8()?;
				let m = DetachRequest {
					detach_type: b & 0x7,
					switch_off: b & 0x8 != 0,
					ksi: Ksi::from_nibble(b >> 4),
					identity: MobileIdentity::decode(r.lv()?)?,
				};
				EmmMessage::DetachRequest(m)
			}
			x if x == EmmMsgType::DetachAccept as u8 => EmmMessage::DetachAccept,
			x if x == EmmMsgType::TrackingAreaUpdateRequest as u8 => {
				let b = r.u8()?;
				let mut m = TrackingAreaUpdateRequest {
					update_type: b & 0xF,
					ksi: Ksi::from_nibble(b >> 4),
					old_guti: MobileIdentity::decode(r.lv()?)?,
					ue_net_cap: None,
					last_visited_tai: None,
				};
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					match tag {
						IEI_UE_NET_CAP => m.ue_net_cap = Some(Bytes::copy_from_slice(val)),
						IEI_LAST_VISITED_TAI => {
							m.last_visited_tai = Some(Tai::read(&mut Reader::new(val))?)
						}
						_ => {}
					}
				}
				EmmMessage::TrackingAreaUpdateRequest(m)
			}
			x if x == EmmMsgType::TrackingAreaUpdateAccept as u8 => {
				let result = r.u8()?;
				let mut m = TrackingAreaUpdateAccept {
					result,
					t3412: None,
					guti: None,
					tai_list: None,
					bearer_ctx_status: None,
					t3402: None,
					t3324: None,
				};
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					match tag {
						IEI_T3412_EXT => m.t3412 = Some(timer_opt(val)?),
						IEI_GUTI => m.guti = Some(decode_guti(val)?),
						IEI_TAI_LIST => m.tai_list = Some(read_tai_list(val)?),
						IEI_BEARER_CTX_STATUS => {
							if val.len() != 2 {
								return Err(NasDecodeError::InvalidIe);
							}
							m.bearer_ctx_status = Some(u16::from_be_bytes([val[0], val[1]]));
						}
						IEI_T3402 => m.t3402 = Some(timer_opt(val)?),
						IEI_T3324 => m.t3324 = Some(timer_opt(val)?),
						_ => {}
					}
				}
				EmmMessage::TrackingAreaUpdateAccept(m)
			}
			x if x == EmmMsgType::TrackingAreaUpdateComplete as u8 => {
				EmmMessage::TrackingAreaUpdateComplete
			}
			x if x == EmmMsgType::TrackingAreaUpdateReject as u8 => {
				let emm_cause = r.u8()?;
				let mut m = TrackingAreaUpdateReject { emm_cause, t3346: None };
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					if tag == IEI_T3346 {
						m.t3346 = Some(timer_opt(val)?);
					}
				}
				EmmMessage::TrackingAreaUpdateReject(m)
			}
			x if x == EmmMsgType::ExtServiceRequest as u8 => {
				let b = r.u8()?;
				let ksi = Ksi::from_nibble(b >> 4);
				let service_type = b & 0xF;
				let m_tmsi = match MobileIdentity::decode(r.lv()?)? {
					MobileIdentity::Tmsi(t) => t,
					_ => return Err(NasDecodeError::InvalidIe),
				};
				EmmMessage::ExtServiceRequest(ExtServiceRequest { service_type, ksi, m_tmsi })
			}
			x if x == EmmMsgType::CpServiceRequest as u8 => {
				let b = r.u8()?;
				EmmMessage::CpServiceRequest(CpServiceRequest {
					service_type: b & 0xF,
					ksi: Ksi::from_nibble(b >> 4),
				})
			}
			x if x == EmmMsgType::ServiceReject as u8 => {
				let emm_cause = r.u8()?;
				let mut m = ServiceReject { emm_cause, t3346: None };
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					if tag == IEI_T3346 {
						m.t3346 = Some(timer_opt(val)?);
					}
				}
				EmmMessage::ServiceReject(m)
			}
			x if x == EmmMsgType::GutiReallocationCommand as u8 => {
				let guti = decode_guti(r.lv()?)?;
				let mut m = GutiReallocationCommand { guti, tai_list: None };
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					if tag == IEI_TAI_LIST {
						m.tai_list = Some(read_tai_list(val)?);
					}
				}
				EmmMessage::GutiReallocationCommand(m)
			}
			x if x == EmmMsgType::GutiReallocationComplete as u8 => {
				EmmMessage::GutiReallocationComplete
			}
			x if x == EmmMsgType::AuthenticationRequest as u8 => {
				let ksi = Ksi::from_nibble(r.u8()? & 0xF);
				let rand = r.array::<16>()?;
				let autn = r.lv()?.to_vec();
				EmmMessage::AuthenticationRequest(AuthenticationRequest { ksi, rand, autn })
			}
			x if x == EmmMsgType::AuthenticationResponse as u8 => {
				EmmMessage::AuthenticationResponse(AuthenticationResponse {
					res: r.lv()?.to_vec(),
				})
			}
			x if x == EmmMsgType::AuthenticationReject as u8 => EmmMessage::AuthenticationReject,
			x if x == EmmMsgType::AuthenticationFailure as u8 => {
				let emm_cause = r.u8()?;
				let mut m = AuthenticationFailure { emm_cause, auts: None };
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					if tag == IEI_AUTS {
						m.auts = Some(val.to_vec());
					}
				}
				EmmMessage::AuthenticationFailure(m)
			}
			x if x == EmmMsgType::IdentityRequest as u8 => {
				EmmMessage::IdentityRequest(IdentityRequest { id_type: r.u8()? })
			}
			x if x == EmmMsgType::IdentityResponse as u8 => {
				EmmMessage::IdentityResponse(IdentityResponse {
					identity: MobileIdentity::decode(r.lv()?)?,
				})
			}
			x if x == EmmMsgType::SecurityModeCommand as u8 => {
				let algs = r.u8()?;
				let ksi = Ksi::from_nibble(r.u8()? & 0xF);
				let replayed_sec_cap = UeSecCap::decode(r.lv()?)?;
				let mut m = SecurityModeCommand {
					eea: algs >> 4,
					eia: algs & 0xF,
					ksi,
					replayed_sec_cap,
					imeisv_req: false,
				};
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					if tag == IEI_IMEISV_REQ {
						m.imeisv_req = val.first().copied() == Some(1);
					}
				}
				EmmMessage::SecurityModeCommand(m)
			}
			x if x == EmmMsgType::SecurityModeComplete as u8 => {
				let mut m = SecurityModeComplete { imeisv: None };
				while !r.is_empty() {
					let tag = r.u8()?;
					let val = r.lv()?;
					if tag == IEI_IMEISV {
						m.imeisv = Some(MobileIdentity::decode(val)?);
					}
				}
				EmmMessage::SecurityModeComplete(m)
			}
			x if x == EmmMsgType::SecurityModeReject as u8 => {
				EmmMessage::SecurityModeReject(SecurityModeReject { emm_cause: r.u8()? })
			}
			x if x == EmmMsgType::EmmStatus as u8 => {
				EmmMessage::EmmStatus(EmmStatus { emm_cause: r.u8()? })
			}
			x if x == EmmMsgType::DownlinkNasTransport as u8 => EmmMessage::DownlinkNasTransport(
				NasTransport { container: Bytes::copy_from_slice(r.lv()?) },
			),
			x if x == EmmMsgType::UplinkNasTransport as u8 => EmmMessage::UplinkNasTransport(
				NasTransport { container: Bytes::copy_from_slice(r.lv()?) },
			),
			other => return Err(NasDecodeError::UnknownMessageType(other)),
		};
		Ok(msg)
	}
}
