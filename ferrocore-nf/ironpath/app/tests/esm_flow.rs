//! ESM session management flows: PDN connectivity with PCO negotiation,
//! PDN-type reconciliation causes, bearer exhaustion and the stubbed
//! transaction kinds.

mod support;

use ironpath_app::config::{ApnConfig, MmeConfig};
use ironpath_app::esm::BearerState;
use ironpath_nas::esm::{EsmFrame, EsmMessage};
use ironpath_nas::pco::{
	NcpOption, NcpPacket, Pco, PcoElement, element_id, ncp_option, ppp_code,
};
use ironpath_nas::types::{PdnAddress, esm_cause};
use ironpath_s1ap::{InitiatingMessage, ProcedureCode, S1apPdu};
use support::*;

fn cfg_with_corenet() -> MmeConfig {
	let mut cfg = MmeConfig::default();
	cfg.apns.insert(
		"corenet".into(),
		ApnConfig {
			ipv4: Some("10.0.0.2".parse().unwrap()),
			ipv6: Some("2001:db8::2".parse().unwrap()),
			dns: vec!["8.8.8.8".parse().unwrap(), "8.8.4.4".parse().unwrap()],
			qci: Some(9),
			..Default::default()
		},
	);
	cfg
}

fn ipcp_dns_pco() -> Pco {
	let ncp = NcpPacket {
		code: ppp_code::CONFIGURE_REQUEST,
		id: 4,
		options: vec![
			NcpOption { kind: ncp_option::IP_ADDRESS, data: vec![0; 4] },
			NcpOption { kind: ncp_option::PRIMARY_DNS, data: vec![0; 4] },
			NcpOption { kind: ncp_option::SECONDARY_DNS, data: vec![0; 4] },
		],
	};
	Pco {
		config_proto: 0,
		elements: vec![PcoElement { id: element_id::IPCP, data: ncp.encode() }],
	}
}

#[test]
fn ipv4v6_pdn_with_ipcp_dns_negotiation() {
	let mut b = bench_with(cfg_with_corenet());
	seed_security(&mut b.handler, 0);

	let frame =
		EsmFrame::decode(&pdn_connectivity(2, Some("corenet"), 3, Some(ipcp_dns_pco()))).unwrap();
	let out = b.handler.process_nas(&secure_ul_esm(&b.handler, &frame));

	assert_eq!(out.len(), 1);
	assert_eq!(out[0].code, ProcedureCode::ERabSetup);
	let erab = match &out[0].pdu {
		S1apPdu::Initiating(InitiatingMessage::ERabSetupRequest(m)) => m,
		other => panic!("expected an E-RAB setup request, got {other:?}"),
	};
	assert_eq!(erab.erabs[0].ebi, 5);
	assert_eq!(erab.erabs[0].qci, 9);
	assert_eq!(erab.erabs[0].sgw_address, b.registry.sgw);

	let activation = decode_dl_esm(erab.erabs[0].nas_pdu.as_ref().unwrap());
	assert_eq!(activation.ebi, 5);
	assert_eq!(activation.pti, 2);
	let m = match activation.msg {
		EsmMessage::ActivateDefaultBearerRequest(m) => m,
		other => panic!("expected a bearer activation, got {other:?}"),
	};
	// the PDN address stays in the signalling
	assert_eq!(
		m.pdn_address,
		Some(PdnAddress::Ipv4v6("10.0.0.2".parse().unwrap(), "2001:db8::2".parse().unwrap()))
	);
	// and the IPCP answer carries address plus both DNS servers
	let pco = m.pco.expect("a PCO response");
	let ack = NcpPacket::decode(&pco.elements[0].data).unwrap();
	assert_eq!(ack.code, ppp_code::CONFIGURE_ACK);
	assert_eq!(ack.id, 4);
	assert_eq!(ack.options[0].data, vec![10, 0, 0, 2]);
	assert_eq!(ack.options[1].data, vec![8, 8, 8, 8]);
	assert_eq!(ack.options[2].data, vec![8, 8, 4, 4]);

	assert_eq!(b.handler.esm.pdn.get(&5).unwrap().state, BearerState::Suspended);
}

#[test]
fn ipv4_request_against_ipv6_only_apn_is_cause_51() {
	let mut cfg = MmeConfig::default();
	cfg.apns.insert(
		"v6only".into(),
		ApnConfig { ipv4: None, ipv6: Some("2001:db8::9".parse().unwrap()), ..Default::default() },
	);
	cfg.apns.remove("*");
	let mut b = bench_with(cfg);
	seed_security(&mut b.handler, 0);

	let frame = EsmFrame::decode(&pdn_connectivity(3, Some("v6only"), 1, None)).unwrap();
	let out = b.handler.process_nas(&secure_ul_esm(&b.handler, &frame));
	let reply = decode_dl_esm(&dnt_nas(&out));
	assert_eq!(reply.pti, 3);
	match reply.msg {
		EsmMessage::PdnConnectivityReject(m) => {
			assert_eq!(m.esm_cause, esm_cause::PDN_TYPE_IPV6_ONLY_ALLOWED)
		}
		other => panic!("expected a PDN connectivity reject, got {other:?}"),
	}
	assert!(b.handler.esm.pdn.is_empty());
}

#[test]
fn unknown_apn_without_wildcard_is_cause_27() {
	let mut cfg = MmeConfig::default();
	cfg.apns.remove("*");
	let mut b = bench_with(cfg);
	seed_security(&mut b.handler, 0);

	let frame = EsmFrame::decode(&pdn_connectivity(3, Some("nowhere"), 1, None)).unwrap();
	let out = b.handler.process_nas(&secure_ul_esm(&b.handler, &frame));
	let reply = decode_dl_esm(&dnt_nas(&out));
	match reply.msg {
		EsmMessage::PdnConnectivityReject(m) => {
			assert_eq!(m.esm_cause, esm_cause::UNKNOWN_OR_MISSING_APN)
		}
		other => panic!("expected a PDN connectivity reject, got {other:?}"),
	}
}

#[test]
fn eleventh_pdn_request_is_cause_65() {
	let mut b = bench();
	seed_security(&mut b.handler, 0);

	// exhaust EBIs 5..=15 with one request each, acknowledging every E-RAB
	// so only one class-1 procedure is outstanding at a time
	for pti in 1..=11u8 {
		let frame = EsmFrame::decode(&pdn_connectivity(pti, Some("any"), 1, None)).unwrap();
		let out = b.handler.process_nas(&secure_ul_esm(&b.handler, &frame));
		assert_eq!(out[0].code, ProcedureCode::ERabSetup, "request {pti} allocates a bearer");
		let out = b.handler.process_s1ap_pdu(S1apPdu::Successful(
			ironpath_s1ap::SuccessfulOutcome::ERabSetupResponse(ironpath_s1ap::ERabSetupResponse {
				ids: ironpath_s1ap::UeS1apIds { mme_ue_s1ap_id: 1, enb_ue_s1ap_id: 1 },
				erabs: vec![ironpath_s1ap::ErabSetupItem {
					ebi: 4 + pti,
					enb_address: "192.168.2.20".parse().unwrap(),
					enb_teid: 0x7000 + pti as u32,
				}],
				failed_erabs: vec![],
			}),
		));
		assert!(out.is_empty());
	}
	assert_eq!(b.handler.esm.pdn_ebis(), (5..=15).collect::<Vec<u8>>());

	let frame = EsmFrame::decode(&pdn_connectivity(12, Some("any"), 1, None)).unwrap();
	let out = b.handler.process_nas(&secure_ul_esm(&b.handler, &frame));
	let reply = decode_dl_esm(&dnt_nas(&out));
	match reply.msg {
		EsmMessage::PdnConnectivityReject(m) => {
			assert_eq!(m.esm_cause, esm_cause::MAX_EPS_BEARERS_REACHED)
		}
		other => panic!("expected a PDN connectivity reject, got {other:?}"),
	}
}

#[test]
fn pdn_disconnect_is_answered_as_unsupported() {
	let mut b = bench();
	seed_security(&mut b.handler, 0);

	let frame = EsmFrame::new(
		5,
		4,
		EsmMessage::PdnDisconnectRequest(ironpath_nas::esm::PdnDisconnectRequest {
			linked_ebi: 5,
		}),
	);
	let out = b.handler.process_nas(&secure_ul_esm(&b.handler, &frame));
	let reply = decode_dl_esm(&dnt_nas(&out));
	assert_eq!(reply.pti, 4);
	match reply.msg {
		EsmMessage::PdnDisconnectReject(m) => {
			assert_eq!(m.esm_cause, esm_cause::SERVICE_OPTION_NOT_SUPPORTED)
		}
		other => panic!("expected a PDN disconnect reject, got {other:?}"),
	}
	assert!(b.handler.esm.trans_is_empty());
}

#[test]
fn esm_status_policy_three_clears_every_stack() {
	let mut b = bench();
	seed_security(&mut b.handler, 0);

	// leave a bearer activation pending on EBI 5
	let frame = EsmFrame::decode(&pdn_connectivity(2, Some("any"), 1, None)).unwrap();
	let out = b.handler.process_nas(&secure_ul_esm(&b.handler, &frame));
	assert_eq!(out.len(), 1);
	assert_eq!(b.handler.esm.stack_depth(5), 1);

	let status = EsmFrame::new(
		5,
		0,
		EsmMessage::EsmStatus(ironpath_nas::esm::EsmCauseOnly { esm_cause: 98 }),
	);
	let out = b.handler.process_nas(&secure_ul_esm(&b.handler, &status));
	assert!(out.is_empty(), "status handling produces no reply");
	assert_eq!(b.handler.esm.stack_depth(5), 0);
	assert!(b.handler.esm.trans_is_empty());
	// the half-open bearer is gone with its procedure
	assert!(b.handler.esm.pdn.is_empty());
}

#[test]
fn unexpected_esm_message_on_busy_stack_is_status_98() {
	let mut b = bench();
	seed_security(&mut b.handler, 0);

	let frame = EsmFrame::decode(&pdn_connectivity(2, Some("any"), 1, None)).unwrap();
	let _ = b.handler.process_nas(&secure_ul_esm(&b.handler, &frame));

	// an information response is not in the activation's filter
	let stray = EsmFrame::new(
		5,
		2,
		EsmMessage::EsmInformationResponse(ironpath_nas::esm::EsmInformationResponse {
			apn: None,
			pco: None,
		}),
	);
	let out = b.handler.process_nas(&secure_ul_esm(&b.handler, &stray));
	let reply = decode_dl_esm(&dnt_nas(&out));
	match reply.msg {
		EsmMessage::EsmStatus(m) => {
			assert_eq!(m.esm_cause, esm_cause::MSG_TYPE_NOT_COMPATIBLE_WITH_STATE)
		}
		other => panic!("expected an ESM status, got {other:?}"),
	}
}
