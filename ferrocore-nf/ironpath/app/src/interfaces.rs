//! Seams towards the collaborators of the per-UE handler: the eNB transport,
//! the server-wide registries, the GTP-U user plane, the subscriber store and
//! the SMS relay. Everything behind these traits lives outside this crate.

use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use ironpath_nas::crypto::{NasCrypto, NasKdf};
use ironpath_nas::types::Tai;
use ironpath_s1ap::{Paging, S1apPdu};

/// Handle on one eNodeB, as exposed by the server registry.
pub trait EnbHandle: Send + Sync {
	fn global_enb_id(&self) -> u32;

	/// Fire-and-forget paging towards this eNB.
	fn page(&self, paging: Paging);

	/// Out-of-band downlink used by timer-driven sends, where no inbound
	/// callback is waiting for the produced PDUs.
	fn send_pdu(&self, pdu: S1apPdu);
}

/// Server-wide lookups and allocators.
pub trait ServerRegistry: Send + Sync {
	/// eNBs serving a tracking area, for paging.
	fn enbs_serving(&self, tai: &Tai) -> Vec<Arc<dyn EnbHandle>>;

	/// SGW user-plane transport address.
	fn sgw_address(&self) -> IpAddr;

	/// Uplink GTP TEID allocation.
	fn alloc_teid(&self) -> u32;

	/// M-TMSI allocation for GUTI reallocation.
	fn alloc_m_tmsi(&self) -> u32;
}

/// GTP-U daemon surface.
pub trait GtpUserPlane: Send + Sync {
	fn add_mobile(&self, teid: u32, addr: IpAddr);
	fn rem_mobile(&self, teid: u32);
}

/// Authentication vector, as served by the subscriber store. The UMTS and
/// GSM flavours feed the mapped security-context paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthVector {
	Eps { rand: [u8; 16], xres: Vec<u8>, autn: Vec<u8>, kasme: [u8; 32] },
	Umts { rand: [u8; 16], xres: Vec<u8>, autn: Vec<u8>, ck: [u8; 16], ik: [u8; 16] },
	Gsm { rand: [u8; 16], sres: [u8; 4], kc: [u8; 8] },
}

impl AuthVector {
	pub fn rand(&self) -> [u8; 16] {
		match self {
			AuthVector::Eps { rand, .. }
			| AuthVector::Umts { rand, .. }
			| AuthVector::Gsm { rand, .. } => *rand,
		}
	}

	pub fn autn(&self) -> Vec<u8> {
		match self {
			AuthVector::Eps { autn, .. } | AuthVector::Umts { autn, .. } => autn.clone(),
			AuthVector::Gsm { .. } => Vec::new(),
		}
	}

	pub fn expected_res(&self) -> &[u8] {
		match self {
			AuthVector::Eps { xres, .. } | AuthVector::Umts { xres, .. } => xres,
			AuthVector::Gsm { sres, .. } => sres,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthRat {
	Eps,
	Umts,
	Gsm,
}

/// Subscriber store (HSS) surface.
pub trait AuthVectorSource: Send + Sync {
	/// One fresh vector of the requested flavour, or `None` for an unknown
	/// subscriber.
	fn vector(&self, imsi: &str, snid: &[u8; 3], amf: [u8; 2], rat: AuthRat) -> Option<AuthVector>;

	/// SQN resynchronisation from an AUTS. Returns whether a retry makes
	/// sense.
	fn resync(&self, imsi: &str, rand: &[u8; 16], auts: &[u8]) -> bool;
}

/// SMS relay: uplink CP payloads are handed off opaquely; an immediate
/// downlink CP payload may come back.
pub trait SmsRelay: Send + Sync {
	fn uplink(&self, imsi: Option<&str>, cp_pdu: &[u8]) -> Option<Bytes>;
}

/// The collaborator bundle handed to every UE handler at construction.
#[derive(Clone)]
pub struct Collaborators {
	pub registry: Arc<dyn ServerRegistry>,
	pub gtpu: Arc<dyn GtpUserPlane>,
	pub subscribers: Arc<dyn AuthVectorSource>,
	pub crypto: Arc<dyn NasCrypto>,
	pub kdf: Arc<dyn NasKdf>,
	pub sms: Arc<dyn SmsRelay>,
}
