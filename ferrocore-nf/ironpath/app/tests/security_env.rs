//! Security envelope and S1AP dispatch error paths, driven through the
//! handler surface.

mod support;

use ironpath_app::config::MmeConfig;
use ironpath_nas::crypto::{DIR_UPLINK, NasCrypto};
use ironpath_nas::crypto::mock::MockCrypto;
use ironpath_nas::emm::EmmMessage;
use ironpath_nas::sec::ShortServiceRequest;
use ironpath_s1ap::{
	Cause, DownlinkNasTransport, ErabSetupItem, ERabSetupResponse, InitiatingMessage,
	ProcedureCode, S1apPdu, SuccessfulOutcome, UeS1apIds,
	cause::CauseProtocol,
};
use support::*;

fn short_service_request(b: &Bench, valid_mac: bool) -> Vec<u8> {
	let ctx = b.handler.s1.sec.active_ctx().unwrap();
	let mut sr = ShortServiceRequest { ksi: 0, seq: (ctx.ul & 0x1F) as u8, mac: 0 };
	let mac = MockCrypto.mac(ctx.eia, &ctx.knasint, ctx.ul, DIR_UPLINK, &sr.mac_input());
	sr.mac = u16::from_be_bytes([mac[0], mac[1]]);
	if !valid_mac {
		sr.mac ^= 0x00FF;
	}
	sr.encode().to_vec()
}

#[test]
fn service_request_with_wrong_short_mac_is_dropped_when_enforced() {
	let mut cfg = MmeConfig::default();
	cfg.security.enforce_mac = true;
	let mut b = bench_with(cfg);
	seed_security(&mut b.handler, 0);
	let ul_before = b.handler.s1.sec.active_ctx().unwrap().ul;

	let out = b.handler.process_nas(&short_service_request(&b, false));
	assert!(out.is_empty(), "no S1AP procedure on a failed short MAC");
	assert_eq!(
		b.handler.s1.sec.active_ctx().unwrap().ul,
		ul_before,
		"UL count untouched on drop"
	);
}

#[test]
fn service_request_with_valid_short_mac_reestablishes_bearers() {
	let mut b = bench_with(MmeConfig::default());
	seed_security(&mut b.handler, 0);
	// no PDN contexts yet: the service request is rejected over NAS
	let out = b.handler.process_nas(&short_service_request(&b, true));
	let (_, msg) = decode_dl_emm(&dnt_nas(&out));
	match msg {
		EmmMessage::ServiceReject(m) => assert_eq!(m.emm_cause, 40),
		other => panic!("expected a service reject, got {other:?}"),
	}
	let ctx = b.handler.s1.sec.active_ctx().unwrap();
	assert_eq!(ctx.ul, 2, "accepted service request advanced the UL count");
}

#[test]
fn garbage_nas_buffer_yields_an_emm_status() {
	let mut b = bench();
	// SH = 6 with the EMM discriminator is not a valid header
	let out = b.handler.process_nas(&[0x67, 0, 0, 0, 0, 0]);
	let (_, msg) = decode_dl_emm(&dnt_nas(&out));
	match msg {
		EmmMessage::EmmStatus(st) => assert_eq!(st.emm_cause, 96),
		other => panic!("expected an EMM status, got {other:?}"),
	}
}

#[test]
fn unknown_inner_message_type_yields_cause_97() {
	let mut b = bench();
	// plain EMM frame with an unassigned message type
	let out = b.handler.process_nas(&[0x07, 0x7F]);
	let (_, msg) = decode_dl_emm(&dnt_nas(&out));
	match msg {
		EmmMessage::EmmStatus(st) => assert_eq!(st.emm_cause, 97),
		other => panic!("expected an EMM status, got {other:?}"),
	}
}

#[test]
fn unserved_enb_initiated_code_triggers_error_indication() {
	let mut b = bench();
	// a DownlinkNASTransport can only originate at the MME
	let out = b.handler.process_s1ap_pdu(S1apPdu::Initiating(
		InitiatingMessage::DownlinkNasTransport(DownlinkNasTransport {
			ids: UeS1apIds::default(),
			nas_pdu: bytes::Bytes::new(),
		}),
	));
	assert_eq!(out.len(), 1);
	match &out[0].pdu {
		S1apPdu::Initiating(InitiatingMessage::ErrorIndication(e)) => {
			assert_eq!(e.cause, Cause::Protocol(CauseProtocol::AbstractSyntaxErrorReject));
		}
		other => panic!("expected an error indication, got {other:?}"),
	}
}

#[test]
fn stale_class1_response_triggers_error_indication() {
	let mut b = bench();
	// no E-RAB setup is outstanding
	let out = b.handler.process_s1ap_pdu(S1apPdu::Successful(
		SuccessfulOutcome::ERabSetupResponse(ERabSetupResponse {
			ids: UeS1apIds::default(),
			erabs: vec![ErabSetupItem {
				ebi: 5,
				enb_address: "192.168.2.20".parse().unwrap(),
				enb_teid: 1,
			}],
			failed_erabs: vec![],
		}),
	));
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].code, ProcedureCode::ErrorIndication);
	match &out[0].pdu {
		S1apPdu::Initiating(InitiatingMessage::ErrorIndication(e)) => {
			assert_eq!(
				e.cause,
				Cause::Protocol(CauseProtocol::MessageNotCompatibleWithReceiverState)
			);
		}
		other => panic!("expected an error indication, got {other:?}"),
	}
}

#[test]
fn reset_sec_ctx_is_idempotent_and_forgets_everything() {
	let mut b = bench();
	seed_security(&mut b.handler, 3);
	b.handler.s1.sec.pol_tau = 7;
	b.handler.reset_sec_ctx();
	assert!(b.handler.s1.sec.active_ksi().is_none());
	assert_eq!(b.handler.s1.sec.pol_tau, 0);
	assert!(b.handler.ue.cap.sec_cap.is_none());
	b.handler.reset_sec_ctx();
	assert!(b.handler.s1.sec.active_ksi().is_none());
}

#[test]
fn unset_ran_cascades_into_both_sublayers() {
	let mut b = bench();
	seed_security(&mut b.handler, 0);
	assert!(b.handler.s1.is_connected());
	b.handler.unset_ran();
	assert!(!b.handler.s1.is_connected());
	assert!(b.handler.s1.sec.active_ksi().is_none());
	assert_eq!(b.handler.emm.stack_depth(), 0);
	assert!(b.handler.esm.trans_is_empty());
}
