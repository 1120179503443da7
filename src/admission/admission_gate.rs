use std::sync::Arc;

use tracing::debug;
use tracing::info;
use tracing::instrument;

use crate::constants::FIELD_ORDER_ID;
use crate::constants::FIELD_USER_ID;
use crate::constants::FIELD_VOUCHER_ID;
use crate::metrics::ADMISSION_OUTCOMES;
use crate::AdmissionCode;
use crate::AdmissionConfig;
use crate::AdmissionRequest;
use crate::BackingStore;
use crate::Error;
use crate::IdGenerator;
use crate::Result;
use crate::SeckillVoucher;
use crate::SharedStore;
use crate::UserContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    OutOfStock,
    AlreadyPurchased,
}

/// Outcome of a purchase attempt. Rejections are expected results, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Stock reserved and the order queued for fulfillment
    Admitted { order_id: i64 },
    Rejected(RejectReason),
}

impl Admission {
    pub fn order_id(&self) -> Option<i64> {
        match self {
            Admission::Admitted { order_id } => Some(*order_id),
            Admission::Rejected(_) => None,
        }
    }
}

pub struct AdmissionGate {
    store: Arc<dyn SharedStore>,
    backing: Arc<dyn BackingStore>,
    ids: Arc<IdGenerator>,
    config: AdmissionConfig,
    stream: String,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("config", &self.config)
            .field("stream", &self.stream)
            .finish()
    }
}

impl AdmissionGate {
    /// `stream` receives one entry per admitted order.
    pub fn new(
        store: Arc<dyn SharedStore>,
        backing: Arc<dyn BackingStore>,
        ids: Arc<IdGenerator>,
        config: AdmissionConfig,
        stream: String,
    ) -> Self {
        Self {
            store,
            backing,
            ids,
            config,
            stream,
        }
    }

    fn stock_key(
        &self,
        voucher_id: u64,
    ) -> String {
        format!("{}{}", self.config.stock_key_prefix, voucher_id)
    }

    fn order_key(
        &self,
        voucher_id: u64,
    ) -> String {
        format!("{}{}", self.config.order_key_prefix, voucher_id)
    }

    /// Opens a flash sale: stores the voucher and seeds its stock counter.
    pub async fn publish(
        &self,
        voucher: &SeckillVoucher,
    ) -> Result<()> {
        if voucher.stock < 0 {
            return Err(Error::InvalidArgument(format!(
                "voucher {} cannot start with negative stock",
                voucher.voucher_id
            )));
        }
        if voucher.end_time <= voucher.begin_time {
            return Err(Error::InvalidArgument(format!(
                "voucher {} ends before it begins",
                voucher.voucher_id
            )));
        }

        self.backing.save_voucher(voucher).await?;
        self.store
            .set(
                &self.stock_key(voucher.voucher_id),
                &voucher.stock.to_string(),
                None,
            )
            .await?;
        info!(
            "published voucher {} with {} units",
            voucher.voucher_id, voucher.stock
        );
        Ok(())
    }

    /// Attempts one purchase of `voucher_id` by `user_id`.
    ///
    /// The order id is minted before the atomic step, so a rejected attempt
    /// burns an id but never stock.
    #[instrument(skip(self))]
    pub async fn admit(
        &self,
        voucher_id: u64,
        user_id: u64,
    ) -> Result<Admission> {
        let order_id = self.ids.next_id(&self.config.order_sequence).await?;

        let request = AdmissionRequest {
            stock_key: self.stock_key(voucher_id),
            order_key: self.order_key(voucher_id),
            member: user_id.to_string(),
            stream: self.stream.clone(),
            fields: vec![
                (FIELD_VOUCHER_ID.to_string(), voucher_id.to_string()),
                (FIELD_USER_ID.to_string(), user_id.to_string()),
                (FIELD_ORDER_ID.to_string(), order_id.to_string()),
            ],
        };

        let (admission, label) = match self.store.admit(request).await? {
            AdmissionCode::Admitted => (Admission::Admitted { order_id }, "admitted"),
            AdmissionCode::OutOfStock => (
                Admission::Rejected(RejectReason::OutOfStock),
                "out_of_stock",
            ),
            AdmissionCode::AlreadyPurchased => (
                Admission::Rejected(RejectReason::AlreadyPurchased),
                "already_purchased",
            ),
        };
        ADMISSION_OUTCOMES.with_label_values(&[label]).inc();
        debug!("admission of user {user_id} for voucher {voucher_id}: {label}");
        Ok(admission)
    }

    /// [`admit`](Self::admit) on behalf of the resolved caller.
    pub async fn admit_for(
        &self,
        user: &UserContext,
        voucher_id: u64,
    ) -> Result<Admission> {
        self.admit(voucher_id, user.id).await
    }
}
