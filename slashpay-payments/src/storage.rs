use crate::order::OrderRecord;
use crate::payment::{PaymentDirection, PaymentRecord};
use crate::{PaymentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Filter for listing payments
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub order_id: Option<String>,
    pub direction: Option<PaymentDirection>,
    pub include_removed: bool,
}

impl PaymentFilter {
    pub fn for_order(order_id: impl Into<String>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            ..Default::default()
        }
    }

    fn matches(&self, payment: &PaymentRecord, removed: bool) -> bool {
        (self.include_removed || !removed)
            && self.order_id.as_ref().map_or(true, |id| *id == payment.order_id)
            && self.direction.map_or(true, |d| d == payment.direction)
    }
}

/// Storage trait for payments and orders
///
/// Payments are soft-deleted: a removed record stays stored and is only
/// returned when explicitly asked for. Saving fails with
/// [`PaymentError::AlreadyExists`] while an active record with the same id
/// exists; updating fails with [`PaymentError::NotFound`] for unknown or
/// removed records.
#[async_trait]
pub trait PaymentStorage: Send + Sync {
    /// Whether the backend accepts reads and writes.
    fn is_ready(&self) -> bool {
        true
    }

    // Payments
    async fn save_payment(&self, payment: &PaymentRecord) -> Result<()>;
    async fn get_payment(&self, id: &str, include_removed: bool) -> Result<Option<PaymentRecord>>;
    async fn update_payment(&self, payment: &PaymentRecord) -> Result<()>;
    /// Matching payments ordered by `execute_at`, then `created_at`, then id.
    async fn get_payments(&self, filter: PaymentFilter) -> Result<Vec<PaymentRecord>>;
    async fn delete_payment(&self, id: &str) -> Result<()>;
    /// Save several payments; nothing is written if any id is taken.
    async fn save_payments(&self, payments: &[PaymentRecord]) -> Result<()>;

    // Orders
    /// Save an order together with its payments; nothing is written if any
    /// id is taken.
    async fn save_order(&self, order: &OrderRecord, payments: &[PaymentRecord]) -> Result<()>;
    async fn get_order(&self, id: &str) -> Result<Option<OrderRecord>>;
    async fn update_order(&self, order: &OrderRecord) -> Result<()>;
}

/// Stored payment plus its removed flag
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPayment {
    #[serde(default)]
    removed: bool,
    payment: PaymentRecord,
}

fn sort_payments(payments: &mut [PaymentRecord]) {
    payments.sort_by(|a, b| {
        a.execute_at
            .cmp(&b.execute_at)
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn check_unique(payments: &[PaymentRecord]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for payment in payments {
        if !seen.insert(payment.id.as_str()) {
            return Err(PaymentError::AlreadyExists(payment.id.clone()));
        }
    }
    Ok(())
}

/// In-memory storage
#[derive(Default)]
pub struct MemoryPaymentStorage {
    payments: Mutex<HashMap<String, StoredPayment>>,
    orders: Mutex<HashMap<String, OrderRecord>>,
    unavailable: AtomicBool,
}

impl MemoryPaymentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle readiness, e.g. to simulate a backend that is still starting.
    pub fn set_ready(&self, ready: bool) {
        self.unavailable.store(!ready, Ordering::SeqCst);
    }

    fn insert_payments(
        stored: &mut HashMap<String, StoredPayment>,
        payments: &[PaymentRecord],
    ) -> Result<()> {
        check_unique(payments)?;
        if let Some(taken) = payments
            .iter()
            .find(|p| stored.get(&p.id).is_some_and(|s| !s.removed))
        {
            return Err(PaymentError::AlreadyExists(taken.id.clone()));
        }
        for payment in payments {
            stored.insert(
                payment.id.clone(),
                StoredPayment {
                    removed: false,
                    payment: payment.clone(),
                },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStorage for MemoryPaymentStorage {
    fn is_ready(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn save_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        Self::insert_payments(&mut payments, std::slice::from_ref(payment))
    }

    async fn get_payment(&self, id: &str, include_removed: bool) -> Result<Option<PaymentRecord>> {
        let payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        Ok(payments
            .get(id)
            .filter(|s| include_removed || !s.removed)
            .map(|s| s.payment.clone()))
    }

    async fn update_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        match payments.get_mut(&payment.id) {
            Some(stored) if !stored.removed => {
                stored.payment = payment.clone();
                Ok(())
            }
            _ => Err(PaymentError::not_found("payment", &payment.id)),
        }
    }

    async fn get_payments(&self, filter: PaymentFilter) -> Result<Vec<PaymentRecord>> {
        let payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<PaymentRecord> = payments
            .values()
            .filter(|s| filter.matches(&s.payment, s.removed))
            .map(|s| s.payment.clone())
            .collect();
        sort_payments(&mut matching);
        Ok(matching)
    }

    async fn delete_payment(&self, id: &str) -> Result<()> {
        let mut payments = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        match payments.get_mut(id) {
            Some(stored) if !stored.removed => {
                stored.removed = true;
                Ok(())
            }
            _ => Err(PaymentError::not_found("payment", id)),
        }
    }

    async fn save_payments(&self, payments: &[PaymentRecord]) -> Result<()> {
        let mut stored = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        Self::insert_payments(&mut stored, payments)
    }

    async fn save_order(&self, order: &OrderRecord, payments: &[PaymentRecord]) -> Result<()> {
        let mut orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
        let mut stored = self.payments.lock().unwrap_or_else(|e| e.into_inner());
        if orders.contains_key(&order.id) {
            return Err(PaymentError::AlreadyExists(order.id.clone()));
        }
        Self::insert_payments(&mut stored, payments)?;
        orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Option<OrderRecord>> {
        let orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
        Ok(orders.get(id).cloned())
    }

    async fn update_order(&self, order: &OrderRecord) -> Result<()> {
        let mut orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
        match orders.get_mut(&order.id) {
            Some(stored) => {
                *stored = order.clone();
                Ok(())
            }
            None => Err(PaymentError::not_found("order", &order.id)),
        }
    }
}

/// File-based storage implementation
///
/// One JSON file per record under `payments/` and `orders/`. A mutex
/// serializes writers within the process; other processes must not share the
/// directory.
pub struct FilePaymentStorage {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePaymentStorage {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(base_path.join("payments"))?;
        std::fs::create_dir_all(base_path.join("orders"))?;
        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, kind: &str, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(PaymentError::validation("id", format!("unusable as file name: {id}")));
        }
        Ok(self.base_path.join(kind).join(format!("{}.json", id)))
    }

    fn read_payment(&self, id: &str) -> Result<Option<StoredPayment>> {
        let path = self.record_path("payments", id)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn write_payment(&self, stored: &StoredPayment) -> Result<()> {
        let path = self.record_path("payments", &stored.payment.id)?;
        let json = serde_json::to_string_pretty(stored)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn write_order(&self, order: &OrderRecord) -> Result<()> {
        let path = self.record_path("orders", &order.id)?;
        let json = serde_json::to_string_pretty(order)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn insert_payments(&self, payments: &[PaymentRecord]) -> Result<()> {
        check_unique(payments)?;
        for payment in payments {
            if self.read_payment(&payment.id)?.is_some_and(|s| !s.removed) {
                return Err(PaymentError::AlreadyExists(payment.id.clone()));
            }
        }
        for payment in payments {
            self.write_payment(&StoredPayment {
                removed: false,
                payment: payment.clone(),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStorage for FilePaymentStorage {
    fn is_ready(&self) -> bool {
        self.base_path.join("payments").is_dir() && self.base_path.join("orders").is_dir()
    }

    async fn save_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.insert_payments(std::slice::from_ref(payment))
    }

    async fn get_payment(&self, id: &str, include_removed: bool) -> Result<Option<PaymentRecord>> {
        Ok(self
            .read_payment(id)?
            .filter(|s| include_removed || !s.removed)
            .map(|s| s.payment))
    }

    async fn update_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        match self.read_payment(&payment.id)? {
            Some(stored) if !stored.removed => self.write_payment(&StoredPayment {
                removed: false,
                payment: payment.clone(),
            }),
            _ => Err(PaymentError::not_found("payment", &payment.id)),
        }
    }

    async fn get_payments(&self, filter: PaymentFilter) -> Result<Vec<PaymentRecord>> {
        let mut matching = Vec::new();
        for entry in std::fs::read_dir(self.base_path.join("payments"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = std::fs::read_to_string(&path)?;
            let stored: StoredPayment = serde_json::from_str(&json)?;
            if filter.matches(&stored.payment, stored.removed) {
                matching.push(stored.payment);
            }
        }
        sort_payments(&mut matching);
        Ok(matching)
    }

    async fn delete_payment(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        match self.read_payment(id)? {
            Some(mut stored) if !stored.removed => {
                stored.removed = true;
                self.write_payment(&stored)
            }
            _ => Err(PaymentError::not_found("payment", id)),
        }
    }

    async fn save_payments(&self, payments: &[PaymentRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.insert_payments(payments)
    }

    async fn save_order(&self, order: &OrderRecord, payments: &[PaymentRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.record_path("orders", &order.id)?.exists() {
            return Err(PaymentError::AlreadyExists(order.id.clone()));
        }
        self.insert_payments(payments)?;
        self.write_order(order)
    }

    async fn get_order(&self, id: &str) -> Result<Option<OrderRecord>> {
        let path = self.record_path("orders", id)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    async fn update_order(&self, order: &OrderRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.record_path("orders", &order.id)?.exists() {
            return Err(PaymentError::not_found("order", &order.id));
        }
        self.write_order(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::AmountParams;
    use crate::payment::{Payment, PaymentParams};
    use slashpay_lib::MemoryNetwork;
    use std::sync::Arc;

    fn record(order_id: &str, id: &str) -> PaymentRecord {
        let storage: Arc<dyn PaymentStorage> = Arc::new(MemoryPaymentStorage::new());
        let transport = Arc::new(MemoryNetwork::new().transport());
        let mut params =
            PaymentParams::outgoing(order_id, "client", "slash:bob", AmountParams::new("500"));
        params.id = Some(id.to_string());
        Payment::new(params, storage, transport)
            .unwrap()
            .record()
            .clone()
    }

    async fn exercise(storage: &dyn PaymentStorage) {
        let a = record("order-1", "a");
        let b = record("order-1", "b");
        let c = record("order-2", "c");

        storage.save_payment(&a).await.unwrap();
        assert!(matches!(
            storage.save_payment(&a).await,
            Err(PaymentError::AlreadyExists(_))
        ));
        storage.save_payments(&[b.clone(), c.clone()]).await.unwrap();

        let order_1 = storage
            .get_payments(PaymentFilter::for_order("order-1"))
            .await
            .unwrap();
        assert_eq!(order_1.len(), 2);

        let mut changed = a.clone();
        changed.memo = "rent".into();
        storage.update_payment(&changed).await.unwrap();
        assert_eq!(
            storage.get_payment("a", false).await.unwrap().unwrap().memo,
            "rent"
        );

        storage.delete_payment("a").await.unwrap();
        assert!(storage.get_payment("a", false).await.unwrap().is_none());
        assert!(storage.get_payment("a", true).await.unwrap().is_some());
        assert!(storage.update_payment(&changed).await.is_err());
        assert!(storage.delete_payment("a").await.is_err());

        let active = storage
            .get_payments(PaymentFilter::for_order("order-1"))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        let all = storage
            .get_payments(PaymentFilter {
                include_removed: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        // A batch with one taken id writes nothing
        let d = record("order-3", "d");
        assert!(storage.save_payments(&[d.clone(), b.clone()]).await.is_err());
        assert!(storage.get_payment("d", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryPaymentStorage::new();
        exercise(&storage).await;

        storage.set_ready(false);
        assert!(!storage.is_ready());
    }

    #[tokio::test]
    async fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilePaymentStorage::new(dir.path().to_path_buf()).unwrap();
        assert!(storage.is_ready());
        exercise(&storage).await;

        // Survives a reopen
        let reopened = FilePaymentStorage::new(dir.path().to_path_buf()).unwrap();
        assert!(reopened.get_payment("b", false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_storage_rejects_path_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilePaymentStorage::new(dir.path().to_path_buf()).unwrap();
        let bad = record("order-1", "../escape");
        assert!(matches!(
            storage.save_payment(&bad).await,
            Err(PaymentError::Validation { .. })
        ));
    }
}
