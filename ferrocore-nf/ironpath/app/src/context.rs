//! Cached per-UE identity and capability state.

use bytes::Bytes;
use ironpath_nas::types::{Guti, Plmn, Tai, UeSecCap};

/// Capabilities reported by (or derived for) the UE, consumed by the SMC
/// algorithm selection and InitialContextSetup.
#[derive(Debug, Clone, Default)]
pub struct UeCapabilities {
	pub ue_net_cap: Option<Bytes>,
	pub ms_net_cap: Option<Bytes>,
	/// Derived from `ue_net_cap` (or synthesized) when absent.
	pub sec_cap: Option<UeSecCap>,
	pub radio_cap: Option<Bytes>,
	pub imeisv: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UeContext {
	pub imsi: Option<String>,
	pub guti: Option<Guti>,
	pub plmn: Plmn,
	/// Last-known tracking area, the paging key.
	pub tai: Option<Tai>,
	pub cap: UeCapabilities,
	/// Attached without authentication on an emergency request.
	pub emergency: bool,
}

impl UeContext {
	pub fn new(plmn: Plmn) -> Self {
		UeContext {
			imsi: None,
			guti: None,
			plmn,
			tai: None,
			cap: UeCapabilities::default(),
			emergency: false,
		}
	}

	/// Serving-network id bytes used by the Kasme derivation.
	pub fn snid(&self) -> [u8; 3] {
		self.plmn.0
	}
}
