//! Shared domain enumerations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource class assigned to every intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Static,
    Data,
    Image,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 3] = [
        ResourceClass::Static,
        ResourceClass::Data,
        ResourceClass::Image,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::Static => "static",
            ResourceClass::Data => "data",
            ResourceClass::Image => "image",
        }
    }

    /// Fetch protocol used for requests of this class.
    pub fn strategy(self) -> Strategy {
        match self {
            ResourceClass::Static | ResourceClass::Image => Strategy::CacheFirst,
            ResourceClass::Data => Strategy::NetworkFirst,
        }
    }

    /// Store that runtime fetches of this class are written to.
    pub fn runtime_store(self) -> StoreClass {
        match self {
            ResourceClass::Static => StoreClass::Dynamic,
            ResourceClass::Data => StoreClass::Data,
            ResourceClass::Image => StoreClass::Image,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical cache store kinds. Each version owns exactly one store per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreClass {
    Static,
    Data,
    Image,
    Dynamic,
}

impl StoreClass {
    pub const ALL: [StoreClass; 4] = [
        StoreClass::Static,
        StoreClass::Data,
        StoreClass::Image,
        StoreClass::Dynamic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StoreClass::Static => "static",
            StoreClass::Data => "data",
            StoreClass::Image => "image",
            StoreClass::Dynamic => "dynamic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
}

/// Phase of the interception process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Installing,
    Waiting,
    Activating,
    Active,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Delivered,
    /// Retry budget exhausted. The item is kept until an operator resubmits it.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::InFlight => "in_flight",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_follow_class() {
        assert_eq!(ResourceClass::Static.strategy(), Strategy::CacheFirst);
        assert_eq!(ResourceClass::Image.strategy(), Strategy::CacheFirst);
        assert_eq!(ResourceClass::Data.strategy(), Strategy::NetworkFirst);
    }

    #[test]
    fn static_runtime_fetches_land_in_dynamic_store() {
        assert_eq!(ResourceClass::Static.runtime_store(), StoreClass::Dynamic);
        assert_eq!(ResourceClass::Data.runtime_store(), StoreClass::Data);
        assert_eq!(ResourceClass::Image.runtime_store(), StoreClass::Image);
    }

    #[test]
    fn serde_names_are_stable() {
        assert_eq!(
            serde_json::to_string(&OutboxStatus::InFlight).unwrap(),
            "\"in_flight\""
        );
        assert_eq!(
            serde_json::to_string(&Strategy::NetworkFirst).unwrap(),
            "\"NETWORK_FIRST\""
        );
        assert_eq!(
            serde_json::to_string(&LifecycleState::Active).unwrap(),
            "\"active\""
        );
    }
}
