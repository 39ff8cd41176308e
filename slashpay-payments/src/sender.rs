//! Drives an outgoing payment through its rails.
//!
//! The sender owns the payment behind an async mutex. The lock is never held
//! while a plugin runs, so a plugin may report back (and trigger the next
//! rail) from inside its own `pay` call.

use crate::notification::{NotificationCallback, PaymentNotification};
use crate::payment::Payment;
use crate::state::ProcessOutcome;
use crate::{PaymentError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use slashpay_lib::plugins::{PluginManager, PluginStateUpdate, PluginUpdateState, StateUpdateCallback};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct PaymentSender {
    payment_id: String,
    payment: Mutex<Payment>,
    plugins: Arc<PluginManager>,
    notify: NotificationCallback,
}

impl PaymentSender {
    pub fn new(payment: Payment, plugins: Arc<PluginManager>, notify: NotificationCallback) -> Arc<Self> {
        Arc::new(Self {
            payment_id: payment.id().to_string(),
            payment: Mutex::new(payment),
            plugins,
            notify,
        })
    }

    pub fn payment_id(&self) -> &str {
        &self.payment_id
    }

    /// Copy of the payment as the sender currently sees it.
    pub async fn payment(&self) -> Payment {
        self.payment.lock().await.clone()
    }

    pub async fn is_final(&self) -> bool {
        self.payment.lock().await.is_final()
    }

    /// Advance the payment and hand it to the rail now in flight.
    ///
    /// Invokes at most one plugin. Does nothing while a rail is still in
    /// flight. Once every rail has failed the host is notified with
    /// [`PaymentNotification::PaymentFailed`] and
    /// [`PaymentError::NoPluginsAvailable`] is returned.
    pub fn submit(self: Arc<Self>) -> BoxFuture<'static, Result<()>> {
        async move {
            let (plugin_name, serialized, span) = {
                let mut payment = self.payment.lock().await;
                match payment.process().await? {
                    ProcessOutcome::Started(name) => {
                        (name, payment.serialize()?, payment.span().clone())
                    }
                    ProcessOutcome::AlreadyInFlight(name) => {
                        debug!(parent: payment.span(), plugin = %name, "rail still in flight");
                        return Ok(());
                    }
                    ProcessOutcome::Failed => {
                        warn!(parent: payment.span(), "no rails left");
                        (self.notify)(PaymentNotification::PaymentFailed(payment.record().clone()));
                        return Err(PaymentError::NoPluginsAvailable);
                    }
                }
            };

            let plugin = match self.plugins.get_plugin(&plugin_name) {
                Ok(plugin) => plugin,
                Err(err) => {
                    warn!(parent: &span, plugin = %plugin_name, "rail unavailable: {err}");
                    return self.rail_failed(&plugin_name, err.to_string()).await;
                }
            };

            info!(parent: &span, plugin = %plugin_name, "submitting payment");
            let callback = self.clone().state_update_callback();
            if let Err(err) = plugin.pay(serialized, callback).await {
                warn!(parent: &span, plugin = %plugin_name, "pay failed: {err}");
                return self.rail_failed(&plugin_name, err.to_string()).await;
            }
            Ok(())
        }
        .boxed()
    }

    /// React to a rail report: persist it, tell the host, then complete the
    /// payment or fall back to the next rail.
    ///
    /// Reports from a rail that is not in flight are ignored.
    pub async fn handle_state_update(self: Arc<Self>, update: PluginStateUpdate) -> Result<()> {
        let mut payment = self.payment.lock().await;
        if update.payment_id != payment.id() {
            return Err(PaymentError::validation(
                "paymentId",
                format!("{} does not match {}", update.payment_id, payment.id()),
            ));
        }
        let in_flight = payment.current_plugin().map(|c| c.name() == update.plugin_name);
        if in_flight != Some(true) {
            warn!(parent: payment.span(), plugin = %update.plugin_name, "ignoring report from a rail not in flight");
            return Ok(());
        }

        payment.record_plugin_update(update.clone()).await?;
        (self.notify)(PaymentNotification::PluginUpdate(update.clone()));

        match update.state {
            PluginUpdateState::Pending => Ok(()),
            PluginUpdateState::Success => {
                payment.complete().await?;
                (self.notify)(PaymentNotification::PaymentCompleted(payment.record().clone()));
                Ok(())
            }
            PluginUpdateState::Failed => {
                payment.fail_current_plugin().await?;
                drop(payment);
                match self.submit().await {
                    // Already surfaced as PaymentFailed
                    Err(PaymentError::NoPluginsAvailable) => Ok(()),
                    other => other,
                }
            }
        }
    }

    async fn rail_failed(self: Arc<Self>, plugin_name: &str, reason: String) -> Result<()> {
        let update =
            PluginStateUpdate::new(self.payment_id.clone(), plugin_name, PluginUpdateState::Failed)
                .with_data(json!({ "error": reason }));
        self.handle_state_update(update).await
    }

    fn state_update_callback(self: Arc<Self>) -> StateUpdateCallback {
        Arc::new(move |update: PluginStateUpdate| {
            let sender = self.clone();
            async move {
                let payment_id = update.payment_id.clone();
                if let Err(err) = sender.clone().handle_state_update(update).await {
                    (sender.notify)(PaymentNotification::Error {
                        payment_id: Some(payment_id),
                        message: err.to_string(),
                    });
                }
            }
            .boxed()
        })
    }
}
