//! SMS sublayer: an opaque CP/RP relay. Uplink containers are handed to
//! the relay collaborator; any immediate downlink payload rides back in a
//! Downlink NAS Transport.

use bytes::Bytes;
use ironpath_nas::emm::{EmmMessage, NasTransport};
use tracing::debug;

use crate::Env;
use crate::s1::{NasTx, S1apProc};

#[derive(Debug, Default)]
pub struct UeSms {
	/// CP payloads relayed uplink so far.
	pub relayed: u64,
}

impl UeSms {
	pub fn new() -> Self {
		UeSms::default()
	}

	pub(crate) fn process_uplink(&mut self, container: &Bytes, env: &mut Env<'_>) -> Vec<S1apProc> {
		self.relayed += 1;
		let downlink = env.deps.sms.uplink(env.ue.imsi.as_deref(), container);
		debug!(
			bytes = container.len(),
			immediate_reply = downlink.is_some(),
			diagnostic = "relayed uplink CP payload"
		);
		match downlink {
			Some(rp) => env.ret_dnt(NasTx::emm(EmmMessage::DownlinkNasTransport(NasTransport {
				container: rp,
			}))),
			None => Vec::new(),
		}
	}

	/// Network-initiated (MT) delivery.
	pub(crate) fn deliver(&mut self, cp_pdu: Bytes, env: &mut Env<'_>) -> Vec<S1apProc> {
		env.ret_dnt(NasTx::emm(EmmMessage::DownlinkNasTransport(NasTransport {
			container: cp_pdu,
		})))
	}
}
