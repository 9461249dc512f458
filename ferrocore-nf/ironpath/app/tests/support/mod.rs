#![allow(dead_code)]

//! Shared rig for the handler integration tests: mock collaborators and
//! helpers building UE-side NAS traffic.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use counter::NonZeroAllocU32;
use ironpath_app::UeHandler;
use ironpath_app::config::MmeConfig;
use ironpath_app::interfaces::{
	AuthRat, AuthVector, AuthVectorSource, Collaborators, EnbHandle, GtpUserPlane, ServerRegistry,
	SmsRelay,
};
use ironpath_app::s1::S1apProc;
use ironpath_app::s1::sec::{CtxOrigin, SecurityContext};
use ironpath_app::sync::Flag;
use ironpath_nas::crypto::mock::{MockCrypto, MockKdf};
use ironpath_nas::crypto::{DIR_UPLINK, EeaAlg, EiaAlg, KdfUsage, NasCrypto, NasKdf};
use ironpath_nas::emm::{AttachRequest, AttachType, EmmMessage};
use ironpath_nas::esm::{EsmFrame, EsmMessage, PdnConnectivityRequest};
use ironpath_nas::pco::Pco;
use ironpath_nas::sec::{self as nas_sec, NasFrame};
use ironpath_nas::types::{Ksi, MobileIdentity, Plmn, Tai};
use ironpath_s1ap::{InitiatingMessage, Paging, S1apPdu};

pub const TEST_IMSI: &str = "001010000000001";
pub const TEST_RAND: [u8; 16] = [0x11; 16];
pub const TEST_XRES: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
pub const TEST_KASME: [u8; 32] = [0x42; 32];

pub fn plmn() -> Plmn {
	"001.01".parse().unwrap()
}

pub fn tai() -> Tai {
	Tai { plmn: plmn(), tac: 0x0001 }
}

#[derive(Default)]
pub struct MockEnb {
	pub pages: AtomicU32,
	pub sent: Mutex<Vec<S1apPdu>>,
	pub paged_with: Mutex<Vec<Paging>>,
	/// Set the UE's `connected` flag when this many pages have gone out.
	pub connect_on_page: AtomicU32,
	pub connect_flag: Mutex<Option<Flag>>,
}

impl EnbHandle for MockEnb {
	fn global_enb_id(&self) -> u32 {
		1
	}

	fn page(&self, paging: Paging) {
		let n = self.pages.fetch_add(1, Ordering::SeqCst) + 1;
		self.paged_with.lock().unwrap().push(paging);
		let trigger = self.connect_on_page.load(Ordering::SeqCst);
		if trigger != 0 && n == trigger {
			if let Some(flag) = self.connect_flag.lock().unwrap().as_ref() {
				flag.set();
			}
		}
	}

	fn send_pdu(&self, pdu: S1apPdu) {
		self.sent.lock().unwrap().push(pdu);
	}
}

pub struct MockRegistry {
	pub enbs: Mutex<Vec<Arc<MockEnb>>>,
	teids: NonZeroAllocU32,
	tmsis: NonZeroAllocU32,
	pub sgw: IpAddr,
}

impl MockRegistry {
	pub fn new(enbs: Vec<Arc<MockEnb>>) -> Self {
		MockRegistry {
			enbs: Mutex::new(enbs),
			teids: NonZeroAllocU32::new(),
			tmsis: NonZeroAllocU32::new(),
			sgw: "192.168.1.10".parse().unwrap(),
		}
	}
}

impl ServerRegistry for MockRegistry {
	fn enbs_serving(&self, _tai: &Tai) -> Vec<Arc<dyn EnbHandle>> {
		self.enbs.lock().unwrap().iter().map(|e| e.clone() as Arc<dyn EnbHandle>).collect()
	}

	fn sgw_address(&self) -> IpAddr {
		self.sgw
	}

	fn alloc_teid(&self) -> u32 {
		self.teids.next()
	}

	fn alloc_m_tmsi(&self) -> u32 {
		0xC000_0000 | self.tmsis.next()
	}
}

#[derive(Default)]
pub struct MockGtpu {
	pub added: Mutex<Vec<(u32, IpAddr)>>,
	pub removed: Mutex<Vec<u32>>,
}

impl GtpUserPlane for MockGtpu {
	fn add_mobile(&self, teid: u32, addr: IpAddr) {
		self.added.lock().unwrap().push((teid, addr));
	}

	fn rem_mobile(&self, teid: u32) {
		self.removed.lock().unwrap().push(teid);
	}
}

#[derive(Default)]
pub struct MockHss {
	pub resyncs: AtomicU32,
}

impl AuthVectorSource for MockHss {
	fn vector(
		&self,
		_imsi: &str,
		_snid: &[u8; 3],
		_amf: [u8; 2],
		rat: AuthRat,
	) -> Option<AuthVector> {
		Some(match rat {
			AuthRat::Eps => AuthVector::Eps {
				rand: TEST_RAND,
				xres: TEST_XRES.to_vec(),
				autn: vec![0x22; 16],
				kasme: TEST_KASME,
			},
			AuthRat::Umts => AuthVector::Umts {
				rand: TEST_RAND,
				xres: TEST_XRES.to_vec(),
				autn: vec![0x22; 16],
				ck: [0x33; 16],
				ik: [0x34; 16],
			},
			AuthRat::Gsm => {
				AuthVector::Gsm { rand: TEST_RAND, sres: [1, 2, 3, 4], kc: [0x35; 8] }
			}
		})
	}

	fn resync(&self, _imsi: &str, _rand: &[u8; 16], _auts: &[u8]) -> bool {
		self.resyncs.fetch_add(1, Ordering::SeqCst);
		true
	}
}

#[derive(Default)]
pub struct MockSms {
	pub uplinks: Mutex<Vec<Vec<u8>>>,
	pub reply: Mutex<Option<Bytes>>,
}

impl SmsRelay for MockSms {
	fn uplink(&self, _imsi: Option<&str>, cp_pdu: &[u8]) -> Option<Bytes> {
		self.uplinks.lock().unwrap().push(cp_pdu.to_vec());
		self.reply.lock().unwrap().clone()
	}
}

pub struct Bench {
	pub handler: UeHandler,
	pub enb: Arc<MockEnb>,
	pub registry: Arc<MockRegistry>,
	pub gtpu: Arc<MockGtpu>,
	pub sms: Arc<MockSms>,
}

pub fn collaborators(
	enb: Arc<MockEnb>,
) -> (Collaborators, Arc<MockRegistry>, Arc<MockGtpu>, Arc<MockSms>) {
	let registry = Arc::new(MockRegistry::new(vec![enb]));
	let gtpu = Arc::new(MockGtpu::default());
	let sms = Arc::new(MockSms::default());
	let deps = Collaborators {
		registry: registry.clone(),
		gtpu: gtpu.clone(),
		subscribers: Arc::new(MockHss::default()),
		crypto: Arc::new(MockCrypto),
		kdf: Arc::new(MockKdf),
		sms: sms.clone(),
	};
	(deps, registry, gtpu, sms)
}

pub fn bench() -> Bench {
	bench_with(MmeConfig::default())
}

pub fn bench_with(cfg: MmeConfig) -> Bench {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let enb = Arc::new(MockEnb::default());
	let (deps, registry, gtpu, sms) = collaborators(enb.clone());
	let mut handler = UeHandler::new(Arc::new(cfg), deps);
	handler.set_ran(enb.clone());
	handler.set_ctx(1, 1, Some(0));
	handler.ue.tai = Some(tai());
	Bench { handler, enb, registry, gtpu, sms }
}

/// Installs a valid native context at the given KSI, as left behind by an
/// earlier authentication + SMC (EIA1/EEA0, counts at 1).
pub fn seed_security(handler: &mut UeHandler, ksi: u8) {
	let kasme = [9u8; 32];
	let kdf = MockKdf;
	let mut ctx = SecurityContext::new(CtxOrigin::NativeEps, kasme);
	ctx.eia = EiaAlg::Eia1;
	ctx.eea = EeaAlg::Eea0;
	ctx.knasint = kdf.nas_key(&kasme, KdfUsage::NasInt, 1);
	ctx.knasenc = kdf.nas_key(&kasme, KdfUsage::NasEnc, 0);
	ctx.ul = 1;
	ctx.dl = 1;
	handler.s1.sec.insert(ksi, ctx);
	handler.s1.sec.set_active(Some(ksi));
	handler.ue.imsi = Some(TEST_IMSI.to_owned());
}

/// Frames an uplink message the way the UE would under the handler's
/// current active context (SH=2, current UL count).
pub fn secure_ul_raw(handler: &UeHandler, payload: &[u8]) -> Vec<u8> {
	let crypto = MockCrypto;
	let ctx = handler.s1.sec.active_ctx().expect("an active security context");
	let count = ctx.ul;
	let seq = (count & 0xFF) as u8;
	let mut payload = payload.to_vec();
	crypto.apply_keystream(ctx.eea, &ctx.knasenc, count, DIR_UPLINK, &mut payload);
	let mut mac_input = vec![seq];
	mac_input.extend_from_slice(&payload);
	let mac = crypto.mac(ctx.eia, &ctx.knasint, count, DIR_UPLINK, &mac_input);
	nas_sec::build_secured(nas_sec::SH_INTEGRITY_CIPHERED, mac, seq, &payload).to_vec()
}

pub fn secure_ul(handler: &UeHandler, msg: &EmmMessage) -> Vec<u8> {
	secure_ul_raw(handler, &msg.encode())
}

pub fn secure_ul_esm(handler: &UeHandler, frame: &EsmFrame) -> Vec<u8> {
	secure_ul_raw(handler, &frame.encode())
}

/// The single DownlinkNASTransport NAS payload out of a result set.
pub fn dnt_nas(procs: &[S1apProc]) -> Bytes {
	assert_eq!(procs.len(), 1, "expected exactly one S1AP procedure: {procs:?}");
	match &procs[0].pdu {
		S1apPdu::Initiating(InitiatingMessage::DownlinkNasTransport(m)) => m.nas_pdu.clone(),
		other => panic!("expected a DownlinkNASTransport, got {other:?}"),
	}
}

/// Decodes a downlink EMM message, stripping the security envelope (test
/// contexts run EEA0, so protected payloads stay readable).
pub fn decode_dl_emm(buf: &[u8]) -> (u8, EmmMessage) {
	match nas_sec::parse_outer(buf).expect("well-formed downlink NAS") {
		NasFrame::Plain { buf, .. } => (nas_sec::SH_PLAIN, EmmMessage::decode(&buf).unwrap()),
		NasFrame::Secured(f) => (f.sh, EmmMessage::decode(&f.payload).unwrap()),
		NasFrame::ServiceRequest(_) => panic!("unexpected downlink service request"),
	}
}

pub fn decode_dl_esm(buf: &[u8]) -> EsmFrame {
	match nas_sec::parse_outer(buf).expect("well-formed downlink NAS") {
		NasFrame::Plain { buf, .. } => EsmFrame::decode(&buf).unwrap(),
		NasFrame::Secured(f) => EsmFrame::decode(&f.payload).unwrap(),
		NasFrame::ServiceRequest(_) => panic!("unexpected downlink service request"),
	}
}

/// ESM container of an attach: a PDN connectivity request.
pub fn pdn_connectivity(pti: u8, apn: Option<&str>, pdn_type: u8, pco: Option<Pco>) -> Bytes {
	EsmFrame::new(
		0,
		pti,
		EsmMessage::PdnConnectivityRequest(PdnConnectivityRequest {
			pdn_type,
			request_type: 1,
			esm_info_transfer: false,
			apn: apn.map(str::to_owned),
			pco,
		}),
	)
	.encode()
}

/// A plain attach request advertising EEA0..2 and EIA1 only.
pub fn attach_request(imsi: &str, ksi: Ksi, esm_container: Bytes) -> Bytes {
	EmmMessage::AttachRequest(AttachRequest {
		attach_type: AttachType::Eps,
		ksi,
		identity: MobileIdentity::Imsi(imsi.to_owned()),
		ue_net_cap: Bytes::from_static(&[0xE0, 0x40]),
		esm_container,
		ms_net_cap: None,
		last_visited_tai: Some(tai()),
	})
	.encode()
}
