//! Per-UE serialization and the foreground (network-initiated) side of the
//! handler: one queue slot per UE, supervision-timer driving, blocking
//! paging.
//!
//! At any instant either a receiver callback or exactly one foreground
//! operation holds a UE's lock; operations across different UEs proceed
//! independently. The `connected` and `ready` events live outside the lock
//! so foreground waits never block the receiver path.

use std::sync::Arc;
use std::time::Duration;

use counter::CounterU32;
use ironpath_s1ap::{InitialUeMessage, InitiatingMessage, S1apPdu};
use rustc_hash::FxBuildHasher;
use scc::hash_map::HashMap as SccHashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::MmeConfig;
use crate::interfaces::{Collaborators, EnbHandle};
use crate::s1::S1apProc;
use crate::sync::Flag;
use crate::{TimerReq, UeHandler};

/// Additional settle time before foreground signalling, letting concurrent
/// serving procedures finish first.
const NET_INIT_GRACE: Duration = Duration::from_millis(5);

/// Bounded wait for the EMM stack to drain during foreground set-up.
const NET_INIT_READY_WAIT: Duration = Duration::from_secs(10);

pub struct UeSlot {
	pub id: u32,
	handler: Mutex<UeHandler>,
	/// Shared view of the handler's S1 `connected` event.
	pub connected: Flag,
	/// Shared view of the handler's EMM `ready` event.
	pub ready: Flag,
}

pub struct UeManager {
	cfg: Arc<MmeConfig>,
	deps: Collaborators,
	ues: SccHashMap<u32, Arc<UeSlot>, FxBuildHasher>,
	id_alloc: CounterU32,
}

impl UeManager {
	pub fn new(cfg: Arc<MmeConfig>, deps: Collaborators) -> Arc<Self> {
		Arc::new(UeManager {
			cfg,
			deps,
			ues: SccHashMap::with_hasher(FxBuildHasher::default()),
			id_alloc: CounterU32::new(),
		})
	}

	/// Creates the per-UE handler for a fresh S1 connection and allocates
	/// its MME UE S1AP id.
	pub async fn create_ue(
		&self,
		enb: Arc<dyn EnbHandle>,
		enb_ue_id: u32,
		sid: Option<u16>,
	) -> Arc<UeSlot> {
		let id = self.id_alloc.next();
		let mut handler = UeHandler::new(self.cfg.clone(), self.deps.clone());
		handler.set_ran(enb);
		handler.set_ctx(id, enb_ue_id, sid);
		let connected = handler.s1.connected.clone();
		let ready = handler.emm.ready.clone();
		let slot = Arc::new(UeSlot { id, handler: Mutex::new(handler), connected, ready });
		let _ = self.ues.insert_async(id, slot.clone()).await;
		slot
	}

	pub async fn get(&self, id: u32) -> Option<Arc<UeSlot>> {
		self.ues.read_async(&id, |_, slot| slot.clone()).await
	}

	pub async fn remove(&self, id: u32) {
		let _ = self.ues.remove_async(&id).await;
	}

	/// Runs one operation under the UE lock, then arms any supervision
	/// timers the operation requested.
	pub async fn with_slot<F, R>(self: &Arc<Self>, slot: &Arc<UeSlot>, f: F) -> R
	where
		F: FnOnce(&mut UeHandler) -> R,
	{
		let mut handler = slot.handler.lock().await;
		let out = f(&mut handler);
		let reqs = handler.take_timer_reqs();
		drop(handler);
		for req in reqs {
			self.arm(slot.clone(), req);
		}
		out
	}

	pub async fn with_ue<F, R>(self: &Arc<Self>, id: u32, f: F) -> Option<R>
	where
		F: FnOnce(&mut UeHandler) -> R,
	{
		let slot = self.get(id).await?;
		Some(self.with_slot(&slot, f).await)
	}

	/// Entry point for an InitialUEMessage: binds the eNB, allocates the
	/// MME UE id and runs the piggybacked NAS.
	pub async fn handle_initial_ue_message(
		self: &Arc<Self>,
		enb: Arc<dyn EnbHandle>,
		msg: InitialUeMessage,
		sid: Option<u16>,
	) -> (u32, Vec<S1apProc>) {
		let slot = self.create_ue(enb, msg.enb_ue_s1ap_id, sid).await;
		let procs = self
			.with_slot(&slot, move |h| {
				h.process_s1ap_pdu(S1apPdu::Initiating(InitiatingMessage::InitialUeMessage(msg)))
			})
			.await;
		(slot.id, procs)
	}

	fn arm(self: &Arc<Self>, slot: Arc<UeSlot>, req: TimerReq) {
		let manager = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(req.delay).await;
			let mut handler = slot.handler.lock().await;
			let procs = handler.on_timer(req.layer, req.proc_id);
			let reqs = handler.take_timer_reqs();
			let enb = handler.s1.enb.clone();
			drop(handler);
			if let Some(enb) = enb {
				for proc in procs {
					enb.send_pdu(proc.pdu);
				}
			}
			for req in reqs {
				manager.arm(slot.clone(), req);
			}
		});
	}

	/// Pages the UE and waits for it to connect, retrying as configured.
	/// Returns whether the UE connected.
	pub async fn page_block(self: &Arc<Self>, slot: &Arc<UeSlot>, cause: Option<u8>) -> bool {
		if slot.connected.is_set() {
			return true;
		}
		let wait = Duration::from_secs(self.cfg.paging.wait_secs);
		for _ in 0..=self.cfg.paging.retries {
			self.with_slot(slot, |h| h.page(cause)).await;
			if slot.connected.wait_for(wait).await {
				info!(ue = slot.id, diagnostic = "paging: UE connected");
				return true;
			}
		}
		warn!(ue = slot.id, diagnostic = "paging: timeout, UE not connected");
		false
	}

	/// Foreground connection establishment for network-initiated
	/// signalling: page, let serving procedures settle, wait for the EMM
	/// stack to drain.
	pub async fn net_init_con(self: &Arc<Self>, slot: &Arc<UeSlot>) -> bool {
		if !self.page_block(slot, None).await {
			return false;
		}
		tokio::time::sleep(NET_INIT_GRACE).await;
		if !slot.ready.wait_for(NET_INIT_READY_WAIT).await {
			return false;
		}
		slot.connected.is_set()
	}
}
