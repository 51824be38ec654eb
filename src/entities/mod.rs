//! Database entities for the supply ordering domain.
//!
//! Status enums live next to the entities they describe; transition legality
//! is centralized on the enums rather than scattered across call sites.

pub mod delivery;
pub mod order;
pub mod order_item;
pub mod product;
pub mod quote;
pub mod quote_item;
pub mod user;
