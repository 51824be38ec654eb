use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::EnumString;
use uuid::Uuid;

/// Delivery progress from assignment to the closed three-way handshake.
///
/// ```text
/// ASSIGNED -> PICKED_UP -> IN_TRANSIT -> DELIVERED
///                                            |
///                                     CLIENT_VERIFIED -> MANAGER_CONFIRMED
/// ```
///
/// The first three moves are agent-driven; the last two belong to the client
/// verification and manager confirmation operations respectively and are not
/// reachable through the agent status update.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    #[sea_orm(string_value = "ASSIGNED")]
    Assigned,

    #[sea_orm(string_value = "PICKED_UP")]
    PickedUp,

    #[sea_orm(string_value = "IN_TRANSIT")]
    InTransit,

    #[sea_orm(string_value = "DELIVERED")]
    Delivered,

    #[sea_orm(string_value = "CLIENT_VERIFIED")]
    ClientVerified,

    #[sea_orm(string_value = "MANAGER_CONFIRMED")]
    ManagerConfirmed,
}

impl DeliveryStatus {
    /// Legal agent-driven moves. Each step is reachable only from its
    /// immediate predecessor; verification steps are excluded on purpose.
    pub fn agent_can_advance_to(self, next: DeliveryStatus) -> bool {
        matches!(
            (self, next),
            (DeliveryStatus::Assigned, DeliveryStatus::PickedUp)
                | (DeliveryStatus::PickedUp, DeliveryStatus::InTransit)
                | (DeliveryStatus::InTransit, DeliveryStatus::Delivered)
        )
    }

    /// Statuses an agent is allowed to request at all.
    pub fn is_agent_target(self) -> bool {
        matches!(
            self,
            DeliveryStatus::PickedUp | DeliveryStatus::InTransit | DeliveryStatus::Delivered
        )
    }

    pub fn is_terminal(self) -> bool {
        self == DeliveryStatus::ManagerConfirmed
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Assigned => write!(f, "ASSIGNED"),
            DeliveryStatus::PickedUp => write!(f, "PICKED_UP"),
            DeliveryStatus::InTransit => write!(f, "IN_TRANSIT"),
            DeliveryStatus::Delivered => write!(f, "DELIVERED"),
            DeliveryStatus::ClientVerified => write!(f, "CLIENT_VERIFIED"),
            DeliveryStatus::ManagerConfirmed => write!(f, "MANAGER_CONFIRMED"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deliveries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning order; at most one delivery per order.
    #[sea_orm(unique)]
    pub order_id: Uuid,

    pub agent_id: Uuid,

    pub status: DeliveryStatus,

    /// Sealed verification token (AES-256-GCM over the code payload). The
    /// plaintext never touches the database.
    #[serde(skip_serializing)]
    pub delivery_code: String,

    pub code_generated_at: DateTime<Utc>,

    /// Latest agent-reported position.
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,

    pub notes: Option<String>,

    pub client_verified_at: Option<DateTime<Utc>>,
    pub client_verified_by: Option<Uuid>,

    pub manager_confirmed_at: Option<DateTime<Utc>>,
    pub manager_confirmed_by: Option<Uuid>,

    /// Stamped when the agent reports DELIVERED.
    pub actual_delivery: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_progression_is_strictly_sequential() {
        use DeliveryStatus::*;

        assert!(Assigned.agent_can_advance_to(PickedUp));
        assert!(PickedUp.agent_can_advance_to(InTransit));
        assert!(InTransit.agent_can_advance_to(Delivered));

        // No skipping, no going back.
        assert!(!Assigned.agent_can_advance_to(InTransit));
        assert!(!Assigned.agent_can_advance_to(Delivered));
        assert!(!InTransit.agent_can_advance_to(PickedUp));
        assert!(!Delivered.agent_can_advance_to(Delivered));
    }

    #[test]
    fn verification_steps_are_not_agent_targets() {
        assert!(!DeliveryStatus::ClientVerified.is_agent_target());
        assert!(!DeliveryStatus::ManagerConfirmed.is_agent_target());
        assert!(!DeliveryStatus::Assigned.is_agent_target());
        assert!(DeliveryStatus::PickedUp.is_agent_target());
    }
}
