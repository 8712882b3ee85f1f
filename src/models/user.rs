use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Identity the external login collaborator hands the core: `(address, chainId)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub address: String,
    pub chain_id: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(address: impl Into<String>, chain_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            chain_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub address: String,
    pub chain_id: i64,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            address: user.address,
            chain_id: user.chain_id,
            created_at: user.created_at,
        }
    }
}
