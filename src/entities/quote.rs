use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::EnumString;
use uuid::Uuid;

/// Lifecycle of a client quote.
///
/// ```text
/// PENDING_ITEMS -> PENDING_PRICING -> IN_PRICING -> AWAITING_CLIENT_APPROVAL
///                        ^                |                |          |
///                        +----------------+            APPROVED   REJECTED
///                       (release / expiry)                 |
///                                                 CONVERTED_TO_ORDER
/// ```
///
/// REJECTED and CONVERTED_TO_ORDER are terminal. An APPROVED quote whose
/// `valid_until` has passed is terminal as well; the daily sweep materializes
/// that by flipping it to REJECTED.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    #[sea_orm(string_value = "PENDING_ITEMS")]
    PendingItems,

    #[sea_orm(string_value = "PENDING_PRICING")]
    PendingPricing,

    #[sea_orm(string_value = "IN_PRICING")]
    InPricing,

    #[sea_orm(string_value = "AWAITING_CLIENT_APPROVAL")]
    AwaitingClientApproval,

    #[sea_orm(string_value = "APPROVED")]
    Approved,

    #[sea_orm(string_value = "REJECTED")]
    Rejected,

    #[sea_orm(string_value = "CONVERTED_TO_ORDER")]
    ConvertedToOrder,
}

impl QuoteStatus {
    /// Items may only be replaced while the client is still assembling them.
    pub fn allows_item_mutation(self) -> bool {
        self == QuoteStatus::PendingItems
    }

    /// Statuses a pricing lock may be taken in. PENDING_PRICING is the normal
    /// entry; IN_PRICING covers holder refresh and expired-lock takeover.
    pub fn allows_locking(self) -> bool {
        matches!(self, QuoteStatus::PendingPricing | QuoteStatus::InPricing)
    }

    /// A quote can be deleted only while unlocked and before approval.
    pub fn allows_deletion(self) -> bool {
        matches!(
            self,
            QuoteStatus::PendingItems
                | QuoteStatus::PendingPricing
                | QuoteStatus::AwaitingClientApproval
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QuoteStatus::Rejected | QuoteStatus::ConvertedToOrder)
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteStatus::PendingItems => write!(f, "PENDING_ITEMS"),
            QuoteStatus::PendingPricing => write!(f, "PENDING_PRICING"),
            QuoteStatus::InPricing => write!(f, "IN_PRICING"),
            QuoteStatus::AwaitingClientApproval => write!(f, "AWAITING_CLIENT_APPROVAL"),
            QuoteStatus::Approved => write!(f, "APPROVED"),
            QuoteStatus::Rejected => write!(f, "REJECTED"),
            QuoteStatus::ConvertedToOrder => write!(f, "CONVERTED_TO_ORDER"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "quotes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning client; immutable for the life of the quote.
    pub client_id: Uuid,

    /// Manager who priced the quote, set when pricing lands.
    pub manager_id: Option<Uuid>,

    pub status: QuoteStatus,

    /// Derived: always the sum of item subtotals.
    pub total_amount: Decimal,

    pub sourcing_notes: Option<String>,

    /// Pricing-lock fields. All three are set together on acquisition and
    /// cleared together on release, pricing, or reap.
    pub locked_by: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,

    /// Offer validity: 7 days from pricing, extended to 30 days on approval.
    pub valid_until: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// A lock is live while a holder is recorded and the expiry is ahead of
    /// `now`. Lock fields with a past expiry count as free for takeover.
    pub fn lock_is_live(&self, now: DateTime<Utc>) -> bool {
        self.locked_by.is_some() && self.lock_expires_at.map_or(false, |exp| exp > now)
    }

    pub fn lock_is_expired(&self, now: DateTime<Utc>) -> bool {
        self.locked_by.is_some() && self.lock_expires_at.map_or(false, |exp| exp <= now)
    }

    pub fn is_held_by(&self, manager_id: Uuid) -> bool {
        self.locked_by == Some(manager_id)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::quote_item::Entity")]
    QuoteItems,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::ClientId",
        to = "super::user::Column::Id"
    )]
    Client,
}

impl Related<super::quote_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QuoteItems.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Client.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn item_mutation_only_while_pending_items() {
        assert!(QuoteStatus::PendingItems.allows_item_mutation());
        for status in [
            QuoteStatus::PendingPricing,
            QuoteStatus::InPricing,
            QuoteStatus::AwaitingClientApproval,
            QuoteStatus::Approved,
            QuoteStatus::Rejected,
            QuoteStatus::ConvertedToOrder,
        ] {
            assert!(!status.allows_item_mutation(), "{status} must reject item edits");
        }
    }

    #[test]
    fn locking_limited_to_pricing_stages() {
        assert!(QuoteStatus::PendingPricing.allows_locking());
        assert!(QuoteStatus::InPricing.allows_locking());
        assert!(!QuoteStatus::PendingItems.allows_locking());
        assert!(!QuoteStatus::Approved.allows_locking());
        assert!(!QuoteStatus::ConvertedToOrder.allows_locking());
    }

    #[test]
    fn deletion_only_unlocked_pre_approval() {
        assert!(QuoteStatus::PendingItems.allows_deletion());
        assert!(QuoteStatus::PendingPricing.allows_deletion());
        assert!(QuoteStatus::AwaitingClientApproval.allows_deletion());
        assert!(!QuoteStatus::InPricing.allows_deletion());
        assert!(!QuoteStatus::Approved.allows_deletion());
        assert!(!QuoteStatus::Rejected.allows_deletion());
    }

    #[test]
    fn lock_liveness_tracks_expiry() {
        let now = Utc::now();
        let mut quote = Model {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            manager_id: None,
            status: QuoteStatus::InPricing,
            total_amount: Decimal::ZERO,
            sourcing_notes: None,
            locked_by: Some(Uuid::new_v4()),
            locked_at: Some(now),
            lock_expires_at: Some(now + Duration::minutes(30)),
            valid_until: None,
            created_at: now,
            updated_at: now,
        };

        assert!(quote.lock_is_live(now));
        assert!(!quote.lock_is_expired(now));

        quote.lock_expires_at = Some(now - Duration::minutes(1));
        assert!(!quote.lock_is_live(now));
        assert!(quote.lock_is_expired(now));

        quote.locked_by = None;
        assert!(!quote.lock_is_live(now));
        assert!(!quote.lock_is_expired(now));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            QuoteStatus::PendingItems,
            QuoteStatus::AwaitingClientApproval,
            QuoteStatus::ConvertedToOrder,
        ] {
            let parsed: QuoteStatus = status.to_string().parse().expect("parse status");
            assert_eq!(parsed, status);
        }
    }
}
