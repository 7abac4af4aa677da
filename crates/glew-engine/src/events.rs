use crate::launcher::LauncherInner;
use crate::observer::{FundsMovement, WalletObserver};
use crate::services::{
    Node, NodeDelegate, SyncEvent, TallyEvent, Vault, WalletEvent, WalletEventSink,
};
use crate::EngineError;
use async_trait::async_trait;
use glew_schema::Transaction;
use std::sync::{Arc, Weak};
use tracing::{error, info, trace, warn};

impl TallyEvent {
    /// Relative funds change, or `None` when totals must be re-read.
    pub fn movement(self) -> Option<FundsMovement> {
        match self {
            TallyEvent::ReceiveUnconfirmed(v) => Some(FundsMovement::ReceiveUnconfirmed(v)),
            TallyEvent::ReceivePromoted(v) => Some(FundsMovement::ReceivePromoted(v)),
            TallyEvent::ReceiveConfirmed(v) => Some(FundsMovement::ReceiveConfirmed(v)),
            TallyEvent::SpentUnconfirmed(v) => Some(FundsMovement::SpentUnconfirmed(v)),
            TallyEvent::SpentConfirmed(v) => Some(FundsMovement::SpentConfirmed(v)),
            TallyEvent::SpentPromoted => Some(FundsMovement::SpentPromoted),
            TallyEvent::Rollback => None,
        }
    }
}

/// Apply a wallet event to the published model, registering new script
/// pub keys with the node.
pub async fn handle_wallet_event(
    observer: &dyn WalletObserver,
    node: &dyn Node,
    vault: &dyn Vault,
    event: WalletEvent,
) -> Result<(), EngineError> {
    match event {
        WalletEvent::ScriptPubKey(key) => {
            trace!("added new pubkey {key:?}");
            node.add_script_pub_keys(vec![key]).await
        }
        WalletEvent::Tally(tally) => {
            if let Some(movement) = tally.movement() {
                observer.funds_moved(movement);
                return Ok(());
            }
            match vault.available_coins().await {
                Ok(coins) => {
                    let available = coins.available_total();
                    let pending_receive = coins.pending_receive_total();
                    observer.funds_changed(available, pending_receive);
                    info!(
                        "rollback reset tally available[{available}] pendingReceive[{pending_receive}] \
                         pendingSpend[{}]",
                        coins.pending_spend_total()
                    );
                }
                Err(e) => {
                    error!("update of wallet funds failed with error {e}");
                    observer.funds_changed(0, 0);
                }
            }
            Ok(())
        }
    }
}

/// Node delegate and vault event sink of one launcher.
///
/// Holds the launcher weakly: services outliving their launcher see
/// `ServiceUnavailable`.
pub(crate) struct LauncherEvents {
    inner: Weak<LauncherInner>,
}

impl LauncherEvents {
    pub(crate) fn new(inner: &Arc<LauncherInner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
        }
    }

    fn inner(&self) -> Result<Arc<LauncherInner>, EngineError> {
        self.inner.upgrade().ok_or(EngineError::ServiceUnavailable)
    }

    fn update(&self, update: impl FnOnce(&dyn WalletObserver)) -> Result<(), EngineError> {
        self.inner()?.update_model(update)
    }
}

#[async_trait]
impl NodeDelegate for LauncherEvents {
    fn new_tip(&self, height: i64) -> Result<(), EngineError> {
        info!("new tip received {height}");
        self.update(|o| o.tip_changed(height)).inspect_err(|e| {
            error!("cannot update model due to error {e}");
        })
    }

    async fn rollback(&self, height: u32) {
        info!("rollback {height}");
        let vault = self.inner().ok().and_then(|inner| inner.vault());
        match vault {
            Some((vault, _)) => {
                if let Err(e) = vault.rollback(height).await {
                    error!("vault rollback to {height} failed: {e}");
                }
            }
            None => warn!("rollback to {height} without a vault"),
        }
    }

    fn estimated_height(&self, height: i64) {
        info!("estimated height {height}");
        let _ = self.update(|o| o.estimated_height_changed(height));
    }

    fn sync_event(&self, event: SyncEvent) {
        let synched = match event {
            SyncEvent::Synched => {
                trace!("synched");
                true
            }
            SyncEvent::Tracking => {
                trace!("tracking");
                false
            }
        };
        let _ = self.update(|o| o.sync_state_changed(synched));
    }

    fn filter_event(&self, height: u32) {
        trace!("filter event at {height}");
    }
}

#[async_trait]
impl WalletEventSink for LauncherEvents {
    async fn transaction(&self, tx: Transaction) -> Result<(), EngineError> {
        let Some(live) = self.inner()?.live() else {
            warn!("dropping transaction {}, node not running", tx.tx_id);
            return Err(EngineError::ServiceUnavailable);
        };
        let tx_id = live.node.send_transaction(tx).await?;
        trace!("sending transaction with id ({tx_id})");
        Ok(())
    }

    async fn event(&self, event: WalletEvent) -> Result<(), EngineError> {
        let Some(live) = self.inner()?.live() else {
            warn!("dropping wallet event {event:?}, node not running");
            return Err(EngineError::ServiceUnavailable);
        };
        handle_wallet_event(
            live.observer.as_ref(),
            live.node.as_ref(),
            live.vault.as_ref(),
            event,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::EngineDependencies;
    use crate::observer::WalletModel;
    use crate::simulated::{ServiceCall, SimulatedServices};
    use glew_schema::ScriptPubKey;
    use std::time::Duration;

    #[test]
    fn tally_events_map_to_movements() {
        assert_eq!(
            TallyEvent::ReceivePromoted(5).movement(),
            Some(FundsMovement::ReceivePromoted(5))
        );
        assert_eq!(TallyEvent::Rollback.movement(), None);
    }

    #[test]
    fn rollback_rereads_tally() {
        let services = SimulatedServices::new();
        services.deposit(7_000, 10).unwrap();
        let deps = EngineDependencies::new(1).unwrap();
        let handles = deps.handles();
        let (node, vault) = services.standalone_pair(&handles);
        let model = WalletModel::new();
        model.funds_changed(1, 1);

        handles
            .event_loop
            .block_on(handle_wallet_event(
                &model,
                node.as_ref(),
                vault.as_ref(),
                WalletEvent::Tally(TallyEvent::Rollback),
            ))
            .unwrap();
        let snapshot = model.snapshot();
        assert_eq!((snapshot.active, snapshot.pending), (7_000, 0));
        let _ = deps.shutdown_gracefully(Duration::from_millis(200));
    }

    #[test]
    fn new_script_pub_key_is_registered_with_node() {
        let services = SimulatedServices::new();
        let deps = EngineDependencies::new(1).unwrap();
        let handles = deps.handles();
        let (node, vault) = services.standalone_pair(&handles);
        let model = WalletModel::new();

        handles
            .event_loop
            .block_on(handle_wallet_event(
                &model,
                node.as_ref(),
                vault.as_ref(),
                WalletEvent::ScriptPubKey(ScriptPubKey(vec![0, 20])),
            ))
            .unwrap();
        assert!(services.journal().contains(&ServiceCall::AddScriptPubKeys(1)));
        let _ = deps.shutdown_gracefully(Duration::from_millis(200));
    }
}
