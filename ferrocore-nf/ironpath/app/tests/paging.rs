//! Paging and foreground (network-initiated) connection establishment
//! through the UE manager.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use ironpath_app::config::MmeConfig;
use ironpath_app::manager::UeManager;
use ironpath_s1ap::PagingIdentity;
use support::*;

async fn idle_ue(
	cfg: MmeConfig,
) -> (Arc<UeManager>, Arc<ironpath_app::manager::UeSlot>, Arc<MockEnb>) {
	let enb = Arc::new(MockEnb::default());
	let (deps, _registry, _gtpu, _sms) = collaborators(enb.clone());
	let manager = UeManager::new(Arc::new(cfg), deps);
	let slot = manager.create_ue(enb.clone(), 1, Some(0)).await;
	manager
		.with_slot(&slot, |h| {
			h.ue.tai = Some(tai());
			h.ue.imsi = Some(TEST_IMSI.to_owned());
			// drop the S1 binding: the UE goes idle
			h.unset_ran();
		})
		.await;
	(manager, slot, enb)
}

#[tokio::test(start_paused = true)]
async fn page_block_resolves_when_the_ue_connects_on_the_second_round() {
	let mut cfg = MmeConfig::default();
	cfg.paging.retries = 2;
	cfg.paging.wait_secs = 2;
	let (manager, slot, enb) = idle_ue(cfg).await;

	// the UE answers the second paging round
	enb.connect_on_page.store(2, Ordering::SeqCst);
	*enb.connect_flag.lock().unwrap() = Some(slot.connected.clone());

	assert!(manager.page_block(&slot, Some(1)).await);
	assert_eq!(enb.pages.load(Ordering::SeqCst), 2, "two paging rounds went out");
	let paged = enb.paged_with.lock().unwrap();
	assert!(matches!(paged[0].ue_paging_identity, PagingIdentity::Imsi(_)));
	assert_eq!(paged[0].paging_cause, Some(1));
	assert_eq!(paged[0].tai_list, vec![tai()]);
}

#[tokio::test(start_paused = true)]
async fn page_block_gives_up_after_the_configured_retries() {
	let mut cfg = MmeConfig::default();
	cfg.paging.retries = 2;
	cfg.paging.wait_secs = 2;
	let (manager, slot, enb) = idle_ue(cfg).await;

	assert!(!manager.page_block(&slot, None).await);
	// initial round plus two retries
	assert_eq!(enb.pages.load(Ordering::SeqCst), 3);
	assert!(!slot.connected.is_set());
}

#[tokio::test(start_paused = true)]
async fn paging_uses_the_s_tmsi_when_a_guti_is_assigned() {
	let (manager, slot, enb) = idle_ue(MmeConfig::default()).await;
	manager
		.with_slot(&slot, |h| {
			h.ue.guti = Some(ironpath_nas::types::Guti {
				plmn: plmn(),
				mme_group: 0x8000,
				mme_code: 1,
				m_tmsi: 0xC000_0007,
			});
			h.page(None);
		})
		.await;
	let paged = enb.paged_with.lock().unwrap();
	match &paged[0].ue_paging_identity {
		PagingIdentity::STmsi(s) => assert_eq!(s.m_tmsi, 0xC000_0007),
		other => panic!("expected an S-TMSI paging identity, got {other:?}"),
	}
}

#[tokio::test(start_paused = true)]
async fn paging_is_skipped_while_connected() {
	let enb = Arc::new(MockEnb::default());
	let (deps, ..) = collaborators(enb.clone());
	let manager = UeManager::new(Arc::new(MmeConfig::default()), deps);
	let slot = manager.create_ue(enb.clone(), 1, Some(0)).await;
	manager.with_slot(&slot, |h| h.ue.tai = Some(tai())).await;

	assert!(manager.page_block(&slot, None).await, "already connected resolves immediately");
	assert_eq!(enb.pages.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn net_init_con_waits_for_ready_and_connected() {
	let mut cfg = MmeConfig::default();
	cfg.paging.retries = 1;
	cfg.paging.wait_secs = 1;
	let (manager, slot, enb) = idle_ue(cfg).await;
	enb.connect_on_page.store(1, Ordering::SeqCst);
	*enb.connect_flag.lock().unwrap() = Some(slot.connected.clone());

	assert!(manager.net_init_con(&slot).await);
}
