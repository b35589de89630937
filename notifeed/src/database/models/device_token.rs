//! Device token model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The single live push token registered for a user.
///
/// A missing row means the user is currently unreachable by push; that is a
/// normal state, not a fault.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeviceTokenDbModel {
    pub user_id: String,
    pub token: String,
    /// Unix epoch milliseconds of the registration that set this token.
    pub registered_at: i64,
}
