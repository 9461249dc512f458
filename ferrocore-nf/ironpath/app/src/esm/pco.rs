//! Answering protocol configuration options: IPCP, PAP/CHAP, DNS and MTU
//! elements, processed in request order.

use std::net::IpAddr;

use ironpath_nas::pco::{
	CONFIG_PROTO_PPP_IP, ChapPacket, NcpOption, NcpPacket, PapPacket, Pco, PcoElement, element_id,
	ncp_option, ppp_code,
};
use tracing::{debug, warn};

use crate::config::{ApnConfig, EsmConfig};

/// Processes a PCO request against the APN provisioning. Returns the
/// response PCO and whether the PDN address stays in the NAS signalling,
/// or `None` when the configuration protocol is not PPP-with-IP-PDP (the
/// whole PCO is then dropped silently).
pub fn process_protconfig(
	apn: &ApnConfig,
	req: &Pco,
	cfg: &EsmConfig,
) -> Option<(Pco, bool)> {
	if req.config_proto != CONFIG_PROTO_PPP_IP {
		return None;
	}
	let mut resp = Vec::new();
	// the PDN address IE stays in the signalling; element 0x000A is the
	// UE's explicit request for exactly that
	let mut pdnaddrreq = true;
	for el in &req.elements {
		match el.id {
			element_id::IPCP => answer_ipcp(apn, el, &mut resp),
			element_id::LCP => {
				warn!(diagnostic = "protocol config element LCP unsupported");
			}
			element_id::PAP => answer_pap(apn, cfg, el, &mut resp),
			element_id::CHAP => answer_chap(cfg, el, &mut resp),
			element_id::DNS_IPV6 => {
				match first_dns(apn, false) {
					Some(addr) => resp.push(PcoElement { id: element_id::DNS_IPV6, data: addr }),
					None => warn!(diagnostic = "protocol config element DNS IPv6: no config"),
				}
			}
			element_id::IP_ALLOC_VIA_NAS => pdnaddrreq = true,
			element_id::DNS_IPV4 => {
				match first_dns(apn, true) {
					Some(addr) => resp.push(PcoElement { id: element_id::DNS_IPV4, data: addr }),
					None => warn!(diagnostic = "protocol config element DNS IPv4: no config"),
				}
			}
			element_id::IPV4_LINK_MTU => match apn.ipv4_mtu {
				Some(mtu) => resp.push(PcoElement {
					id: element_id::IPV4_LINK_MTU,
					data: mtu.to_be_bytes().to_vec(),
				}),
				None => debug!(diagnostic = "protocol config element IPv4 MTU: no config"),
			},
			element_id::NON_IP_LINK_MTU => match apn.non_ip_mtu {
				Some(mtu) => resp.push(PcoElement {
					id: element_id::NON_IP_LINK_MTU,
					data: mtu.to_be_bytes().to_vec(),
				}),
				None => debug!(diagnostic = "protocol config element non-IP MTU: no config"),
			},
			other => {
				warn!(id = other, diagnostic = "protocol config element not supported");
			}
		}
	}
	Some((Pco { config_proto: CONFIG_PROTO_PPP_IP, elements: resp }, pdnaddrreq))
}

fn first_dns(apn: &ApnConfig, v4: bool) -> Option<Vec<u8>> {
	apn.dns.iter().find_map(|d| match d {
		IpAddr::V4(a) if v4 => Some(a.octets().to_vec()),
		IpAddr::V6(a) if !v4 => Some(a.octets().to_vec()),
		_ => None,
	})
}

fn answer_ipcp(apn: &ApnConfig, el: &PcoElement, resp: &mut Vec<PcoElement>) {
	let Ok(pkt) = NcpPacket::decode(&el.data) else {
		warn!(diagnostic = "protocol config element IPCP invalid");
		return;
	};
	if pkt.code != ppp_code::CONFIGURE_REQUEST {
		warn!(code = pkt.code, diagnostic = "protocol config element IPCP not a config request");
		return;
	}
	let mut answered = Vec::new();
	// index past the DNS entry used for the primary answer
	let mut dns_index = 0usize;
	for opt in &pkt.options {
		match opt.kind {
			ncp_option::IP_ADDRESS => match apn.ipv4 {
				Some(a) => answered.push(NcpOption {
					kind: ncp_option::IP_ADDRESS,
					data: a.octets().to_vec(),
				}),
				None => {
					warn!(diagnostic = "protocol config element IPCP IPv4 address: no config")
				}
			},
			ncp_option::PRIMARY_DNS => {
				let mut found = None;
				for (i, d) in apn.dns.iter().enumerate() {
					if let IpAddr::V4(a) = d {
						found = Some(a.octets().to_vec());
						dns_index = i + 1;
						break;
					}
				}
				match found {
					Some(data) => answered.push(NcpOption { kind: ncp_option::PRIMARY_DNS, data }),
					None => {
						warn!(diagnostic = "protocol config element IPCP 1st DNS IPv4: no config")
					}
				}
			}
			ncp_option::SECONDARY_DNS => {
				let found = apn.dns.iter().skip(dns_index).find_map(|d| match d {
					IpAddr::V4(a) => Some(a.octets().to_vec()),
					_ => None,
				});
				match found {
					Some(data) => {
						answered.push(NcpOption { kind: ncp_option::SECONDARY_DNS, data })
					}
					None => {
						warn!(diagnostic = "protocol config element IPCP 2nd DNS IPv4: no config")
					}
				}
			}
			other => {
				warn!(option = other, diagnostic = "protocol config element IPCP unsupported option");
			}
		}
	}
	let ack = NcpPacket { code: ppp_code::CONFIGURE_ACK, id: pkt.id, options: answered };
	resp.push(PcoElement { id: element_id::IPCP, data: ack.encode() });
}

fn answer_pap(apn: &ApnConfig, cfg: &EsmConfig, el: &PcoElement, resp: &mut Vec<PcoElement>) {
	let Ok(pkt) = PapPacket::decode(&el.data) else {
		warn!(diagnostic = "protocol config element PAP invalid");
		return;
	};
	if pkt.code != ppp_code::PAP_AUTHENTICATE_REQUEST {
		warn!(code = pkt.code, diagnostic = "protocol config element PAP not a request");
		return;
	}
	let granted = cfg.pap_bypass || {
		let peer = String::from_utf8_lossy(&pkt.peer_id).into_owned();
		let pass = String::from_utf8_lossy(&pkt.password);
		if apn.pap.is_empty() {
			warn!(diagnostic = "protocol config element PAP: no config available");
		}
		apn.pap.get(&peer).is_some_and(|p| *p == pass)
	};
	let (code, msg): (u8, &[u8]) = if granted {
		(ppp_code::PAP_AUTHENTICATE_ACK, b"")
	} else {
		(ppp_code::PAP_AUTHENTICATE_NAK, b"you loose")
	};
	resp.push(PcoElement {
		id: element_id::PAP,
		data: PapPacket::encode_response(code, pkt.id, msg),
	});
}

fn answer_chap(cfg: &EsmConfig, el: &PcoElement, resp: &mut Vec<PcoElement>) {
	let Ok(pkt) = ChapPacket::decode(&el.data) else {
		warn!(diagnostic = "protocol config element CHAP invalid");
		return;
	};
	let code = if cfg.chap_bypass {
		ppp_code::CHAP_SUCCESS
	} else {
		// challenge verification is not provisioned here
		warn!(diagnostic = "protocol config element CHAP unsupported without bypass");
		ppp_code::CHAP_FAILURE
	};
	resp.push(PcoElement { id: element_id::CHAP, data: ChapPacket::encode_result(code, pkt.id) });
}

#[cfg(test)]
mod tests {
	use super::*;
	use ironpath_nas::pco::ppp_code::*;

	fn apn() -> ApnConfig {
		ApnConfig {
			ipv4: Some("10.0.0.2".parse().unwrap()),
			ipv6: Some("2001:db8::2".parse().unwrap()),
			dns: vec!["8.8.8.8".parse().unwrap(), "8.8.4.4".parse().unwrap()],
			ipv4_mtu: Some(1400),
			..Default::default()
		}
	}

	fn esm_cfg() -> EsmConfig {
		EsmConfig::default()
	}

	#[test]
	fn wrong_config_proto_drops_whole_pco() {
		let req = Pco { config_proto: 1, elements: vec![] };
		assert!(process_protconfig(&apn(), &req, &esm_cfg()).is_none());
	}

	#[test]
	fn ipcp_request_gets_address_and_both_dns() {
		let ncp = NcpPacket {
			code: CONFIGURE_REQUEST,
			id: 7,
			options: vec![
				NcpOption { kind: ncp_option::IP_ADDRESS, data: vec![0; 4] },
				NcpOption { kind: ncp_option::PRIMARY_DNS, data: vec![0; 4] },
				NcpOption { kind: ncp_option::SECONDARY_DNS, data: vec![0; 4] },
			],
		};
		let req = Pco {
			config_proto: 0,
			elements: vec![PcoElement { id: element_id::IPCP, data: ncp.encode() }],
		};
		let (resp, pdnaddr) = process_protconfig(&apn(), &req, &esm_cfg()).unwrap();
		assert!(pdnaddr);
		let ack = NcpPacket::decode(&resp.elements[0].data).unwrap();
		assert_eq!(ack.code, CONFIGURE_ACK);
		assert_eq!(ack.id, 7);
		assert_eq!(ack.options[0].data, vec![10, 0, 0, 2]);
		assert_eq!(ack.options[1].data, vec![8, 8, 8, 8]);
		assert_eq!(ack.options[2].data, vec![8, 8, 4, 4]);
	}

	#[test]
	fn secondary_dns_advances_past_the_primary() {
		let mut apn = apn();
		apn.dns = vec!["8.8.8.8".parse().unwrap()];
		let ncp = NcpPacket {
			code: CONFIGURE_REQUEST,
			id: 1,
			options: vec![
				NcpOption { kind: ncp_option::PRIMARY_DNS, data: vec![0; 4] },
				NcpOption { kind: ncp_option::SECONDARY_DNS, data: vec![0; 4] },
			],
		};
		let req = Pco {
			config_proto: 0,
			elements: vec![PcoElement { id: element_id::IPCP, data: ncp.encode() }],
		};
		let (resp, _) = process_protconfig(&apn, &req, &esm_cfg()).unwrap();
		let ack = NcpPacket::decode(&resp.elements[0].data).unwrap();
		// only the primary could be answered
		assert_eq!(ack.options.len(), 1);
		assert_eq!(ack.options[0].kind, ncp_option::PRIMARY_DNS);
	}

	#[test]
	fn pap_bypass_acks_anything() {
		let mut raw = vec![PAP_AUTHENTICATE_REQUEST, 9, 0, 12];
		raw.push(2);
		raw.extend_from_slice(b"ab");
		raw.push(2);
		raw.extend_from_slice(b"cd");
		let req = Pco {
			config_proto: 0,
			elements: vec![PcoElement { id: element_id::PAP, data: raw }],
		};
		let (resp, _) = process_protconfig(&apn(), &req, &esm_cfg()).unwrap();
		let pap = PapPacket::decode(&resp.elements[0].data).unwrap();
		assert_eq!(pap.code, PAP_AUTHENTICATE_ACK);
		assert_eq!(pap.id, 9);
	}

	#[test]
	fn pap_without_bypass_checks_credentials() {
		let mut cfg = esm_cfg();
		cfg.pap_bypass = false;
		let mut apncfg = apn();
		apncfg.pap.insert("user".into(), "pass".into());
		let mut raw = vec![PAP_AUTHENTICATE_REQUEST, 3, 0, 14];
		raw.push(4);
		raw.extend_from_slice(b"user");
		raw.push(4);
		raw.extend_from_slice(b"hack");
		let req = Pco {
			config_proto: 0,
			elements: vec![PcoElement { id: element_id::PAP, data: raw }],
		};
		let (resp, _) = process_protconfig(&apncfg, &req, &cfg).unwrap();
		let pap = PapPacket::decode(&resp.elements[0].data).unwrap();
		assert_eq!(pap.code, PAP_AUTHENTICATE_NAK);
	}

	#[test]
	fn chap_without_bypass_fails() {
		let mut cfg = esm_cfg();
		cfg.chap_bypass = false;
		let req = Pco {
			config_proto: 0,
			elements: vec![PcoElement {
				id: element_id::CHAP,
				data: ChapPacket::encode_result(CHAP_RESPONSE, 5),
			}],
		};
		let (resp, _) = process_protconfig(&apn(), &req, &cfg).unwrap();
		let chap = ChapPacket::decode(&resp.elements[0].data).unwrap();
		assert_eq!(chap.code, CHAP_FAILURE);
	}

	#[test]
	fn mtu_and_standalone_dns_elements() {
		let req = Pco {
			config_proto: 0,
			elements: vec![
				PcoElement { id: element_id::IPV4_LINK_MTU, data: vec![] },
				PcoElement { id: element_id::NON_IP_LINK_MTU, data: vec![] },
				PcoElement { id: element_id::DNS_IPV6, data: vec![] },
				PcoElement { id: element_id::DNS_IPV4, data: vec![] },
			],
		};
		let (resp, _) = process_protconfig(&apn(), &req, &esm_cfg()).unwrap();
		// no IPv6 DNS and no non-IP MTU provisioned: both skipped
		assert_eq!(resp.elements.len(), 2);
		assert_eq!(resp.elements[0].id, element_id::IPV4_LINK_MTU);
		assert_eq!(resp.elements[0].data, vec![0x05, 0x78]);
		assert_eq!(resp.elements[1].id, element_id::DNS_IPV4);
		assert_eq!(resp.elements[1].data, vec![8, 8, 8, 8]);
	}
}
