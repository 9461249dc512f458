//! Tuning surface of the per-UE handler. One validated tree, passed at
//! handler construction; nothing here mutates at runtime.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use ironpath_nas::types::{GprsTimer, PdnType, Plmn};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use serde_with::{DisplayFromStr, serde_as};
use smart_default::SmartDefault;

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, SmartDefault, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct MmeConfig {
	/// Serving PLMN, also the default serving-network id for Kasme.
	#[serde_as(as = "DisplayFromStr")]
	#[default(_code = "\"001.01\".parse().unwrap()")]
	pub plmn: Plmn,
	#[default = 0x8000]
	pub mme_group: u16,
	#[default = 1]
	pub mme_code: u8,
	#[validate]
	pub security: SecurityConfig,
	#[validate]
	pub emm: EmmConfig,
	#[validate]
	pub esm: EsmConfig,
	pub paging: PagingConfig,
	pub ics: IcsConfig,
	/// PDN provisioning per APN; `*` is the wildcard entry.
	#[default(_code = "default_apns()")]
	pub apns: HashMap<String, ApnConfig>,
}

impl MmeConfig {
	pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
		let cfg: MmeConfig = serde_yaml::from_str(raw)?;
		cfg.validate()?;
		Ok(cfg)
	}

	/// APN lookup with wildcard fallback.
	pub fn apn(&self, name: &str) -> Option<&ApnConfig> {
		self.apns.get(name).or_else(|| self.apns.get("*"))
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("malformed configuration")]
	Parse(#[from] serde_yaml::Error),

	#[error("invalid configuration")]
	Invalid(#[from] serde_valid::validation::Errors),
}

fn default_apns() -> HashMap<String, ApnConfig> {
	HashMap::from([("*".to_owned(), ApnConfig::default())])
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, SmartDefault, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
	/// Bypasses every auth/SMC procedure, uplink MAC/count verification and
	/// downlink protection.
	pub nas_disabled: bool,
	/// Drop uplink NAS on MAC failure instead of accepting it unprotected.
	pub enforce_mac: bool,
	/// Drop uplink NAS on UL-count mismatch instead of resynchronising.
	pub enforce_ul: bool,
	/// Drop uplink NAS referencing an unknown KSI even when it could still
	/// be parsed (integrity-only headers).
	pub enforce_ksi: bool,
	/// Downlink message kinds (`Debug` names of the message type) always
	/// sent in clear.
	pub dl_plain_bypass: Vec<String>,

	pub smc_disabled: bool,
	/// Procedure abbreviations (`ATT`, `TAU`, `SER`, `DET`) that skip the
	/// Security Mode Command.
	pub smc_disabled_proc: Vec<String>,
	#[default(_code = "vec![0]")]
	#[validate(min_items = 1)]
	pub eea_priority: Vec<u8>,
	#[default(_code = "vec![2, 1]")]
	#[validate(min_items = 1)]
	pub eia_priority: Vec<u8>,
	#[default = 0]
	pub eea_default: u8,
	#[default = 1]
	pub eia_default: u8,
	/// Fold GPRS (GEA) bits into a synthesized security capability.
	#[default = true]
	pub seccap_with_2g: bool,
	/// Ask for the IMEISV when it is still unknown.
	#[default = true]
	pub imeisv_request: bool,

	pub auth_disabled: bool,
	#[default([0x80, 0x00])]
	pub auth_amf: [u8; 2],
	/// Arbitrary extension appended to the AUTN.
	pub auth_autn_ext: Option<Vec<u8>>,
	/// Serving-network id override for Kasme derivation.
	#[serde_as(as = "Option<DisplayFromStr>")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub auth_plmn: Option<Plmn>,
	/// Authentication vector flavour requested from the subscriber store.
	pub auth_rat: AuthRatPreference,
	/// Re-authentication cadence: force a full authentication every N-th
	/// procedure of the kind, 0 meaning never force. Attach always
	/// authenticates.
	#[default = 1]
	pub auth_tau: u32,
	#[default = 1]
	pub auth_det: u32,
	#[default = 5]
	pub auth_ser: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AuthRatPreference {
	#[default]
	Eps,
	Umts,
	Gsm,
}

/// GPRS timer value as configured; converted to the IE on use.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerIe {
	pub unit: u8,
	pub value: u8,
}

impl From<TimerIe> for GprsTimer {
	fn from(t: TimerIe) -> GprsTimer {
		GprsTimer { unit: t.unit, value: t.value }
	}
}

#[derive(Serialize, Deserialize, Debug, Clone, SmartDefault, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct EmmConfig {
	/// Periodic TAU timer.
	#[default(TimerIe { unit: 1, value: 1 })]
	pub t3412: TimerIe,
	/// Reattach-after-failure timer.
	#[default(TimerIe { unit: 1, value: 2 })]
	pub t3402: TimerIe,
	pub t3412_ext: Option<TimerIe>,
	pub t3324: Option<TimerIe>,
	/// Backoff timer handed out in rejects.
	#[default(TimerIe { unit: 0, value: 2 })]
	pub t3346: TimerIe,
	/// GUTI Reallocation supervision (seconds).
	#[default = 4]
	pub t3450_secs: u64,
	/// Authentication and SMC supervision (seconds).
	#[default = 4]
	pub t3460_secs: u64,
	/// Identification supervision (seconds).
	#[default = 2]
	pub t3470_secs: u64,
	/// EMM Status handling: 0 ignore, 1 abort top, 2 abort the whole stack.
	#[default = 2]
	#[validate(maximum = 2)]
	pub stat_clear: u8,
	/// 0 permits IMSI attach, otherwise the reject cause to use.
	pub att_imsi: u8,
	/// 0 permits emergency attach, otherwise the reject cause to use.
	pub att_emerg: u8,
	#[default = true]
	pub att_guti_realloc: bool,
	#[default = true]
	pub tau_guti_realloc: bool,
	/// Release the S1 context once the procedure ends.
	pub att_s1_release: bool,
	pub tau_s1_release: bool,
	/// Run an SMC after every Service Request even without a fresh auth.
	pub ser_smc_always: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, SmartDefault, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct EsmConfig {
	/// Default bearer activation supervision (seconds).
	#[default = 2]
	pub t3485_secs: u64,
	#[default = 2]
	pub t3486_secs: u64,
	/// ESM Information Request supervision (seconds).
	#[default = 2]
	pub t3489_secs: u64,
	#[default = 2]
	pub t3495_secs: u64,
	/// ESM Status handling: 0 ignore, 1 abort top of the bearer stack,
	/// 2 abort that bearer stack, 3 abort every stack.
	#[default = 3]
	#[validate(maximum = 3)]
	pub stat_clear: u8,
	/// Accept any PAP/CHAP credentials instead of checking provisioning.
	#[default = true]
	pub pap_bypass: bool,
	#[default = true]
	pub chap_bypass: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, SmartDefault)]
#[serde(rename_all = "camelCase", default)]
pub struct PagingConfig {
	/// Retries after the first unanswered paging round.
	#[default = 2]
	pub retries: u32,
	/// Wait between rounds (seconds).
	#[default = 2]
	pub wait_secs: u64,
	/// Page with the IMSI instead of the S-TMSI.
	pub with_imsi: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, SmartDefault)]
#[serde(rename_all = "camelCase", default)]
pub struct IcsConfig {
	#[default = true]
	pub include_radio_cap: bool,
	#[default = true]
	pub include_gummei: bool,
	pub trace: Option<TraceConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TraceConfig {
	pub trace_id: u64,
	pub interfaces: u8,
	pub depth: u8,
	pub collection_address: std::net::IpAddr,
}

#[derive(Serialize, Deserialize, Debug, Clone, SmartDefault, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct ApnConfig {
	#[default(Some(Ipv4Addr::new(10, 0, 0, 2)))]
	pub ipv4: Option<Ipv4Addr>,
	pub ipv6: Option<Ipv6Addr>,
	/// Ordered DNS servers, both families.
	#[default(_code = "vec![\"8.8.8.8\".parse().unwrap(), \"8.8.4.4\".parse().unwrap()]")]
	pub dns: Vec<std::net::IpAddr>,
	pub ipv4_mtu: Option<u16>,
	pub non_ip_mtu: Option<u16>,
	/// Default bearer QCI; 0x80 when absent.
	pub qci: Option<u8>,
	#[default = 15]
	pub priority_level: u8,
	pub preempt_capability: bool,
	pub preempt_vulnerability: bool,
	#[default = 100_000_000]
	pub bitrate_dl: u64,
	#[default = 50_000_000]
	pub bitrate_ul: u64,
	/// PAP credentials (peer-id to password).
	pub pap: HashMap<String, String>,
}

impl ApnConfig {
	/// Provisioned PDN type, `None` when no address family is configured.
	pub fn provisioned_type(&self) -> Option<PdnType> {
		match (self.ipv4, self.ipv6) {
			(Some(_), Some(_)) => Some(PdnType::Ipv4v6),
			(Some(_), None) => Some(PdnType::Ipv4),
			(None, Some(_)) => Some(PdnType::Ipv6),
			(None, None) => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_mirror_the_reference_policy() {
		let cfg = MmeConfig::default();
		assert!(!cfg.security.nas_disabled);
		assert_eq!(cfg.security.eea_priority, vec![0]);
		assert_eq!(cfg.security.eia_priority, vec![2, 1]);
		assert_eq!(cfg.security.auth_tau, 1);
		assert_eq!(cfg.security.auth_ser, 5);
		assert_eq!(cfg.emm.stat_clear, 2);
		assert_eq!(cfg.esm.stat_clear, 3);
		assert_eq!(cfg.paging.retries, 2);
		assert!(cfg.apns.contains_key("*"));
	}

	#[test]
	fn yaml_roundtrip_with_overrides() {
		let cfg = MmeConfig::from_yaml(
			r#"
plmn: "001.01"
security:
  enforceMac: true
  authTau: 2
emm:
  statClear: 1
apns:
  corenet:
    ipv4: 10.0.0.2
    ipv6: "2001:db8::2"
    qci: 9
"#,
		)
		.unwrap();
		assert!(cfg.security.enforce_mac);
		assert_eq!(cfg.security.auth_tau, 2);
		assert_eq!(cfg.emm.stat_clear, 1);
		let apn = cfg.apn("corenet").unwrap();
		assert_eq!(apn.provisioned_type(), Some(PdnType::Ipv4v6));
		// unknown APN falls back to the wildcard
		assert!(cfg.apn("elsewhere").is_some());
	}

	#[test]
	fn out_of_range_status_policy_is_rejected() {
		assert!(MmeConfig::from_yaml("emm:\n  statClear: 7\n").is_err());
	}
}
