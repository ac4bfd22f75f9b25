//! Plugin and legacy access-strategy bindings

use crate::{GatewayId, PluginBindingId, ResourceId, StageId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a binding is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum PluginScope {
    Stage(StageId),
    Resource(ResourceId),
}

/// A plugin type and its configuration bound to a scope.
/// Scope and plugin type are unique together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginBinding {
    pub id: PluginBindingId,
    pub gateway_id: GatewayId,
    pub scope: PluginScope,
    pub plugin_type: String,

    #[serde(default)]
    pub config: Value,
}

/// Legacy access-strategy binding, superseded by plugin bindings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessStrategyBinding {
    pub id: PluginBindingId,
    pub gateway_id: GatewayId,
    pub scope: PluginScope,
    pub strategy_type: AccessStrategyType,

    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStrategyType {
    IpAccessControl,
    RateLimit,
    Cors,
    ErrorStatusCode200,
    CircuitBreaker,
}

impl AccessStrategyType {
    /// Plugin type providing the same capability, if the runtime has one
    pub fn equivalent_plugin(&self) -> Option<&'static str> {
        match self {
            AccessStrategyType::IpAccessControl => Some("ip-restriction"),
            AccessStrategyType::RateLimit => Some("rate-limit"),
            AccessStrategyType::Cors => Some("cors"),
            AccessStrategyType::ErrorStatusCode200 => Some("status-rewrite"),
            AccessStrategyType::CircuitBreaker => None,
        }
    }
}

impl AccessStrategyBinding {
    /// Express the strategy as the equivalent plugin configuration
    pub fn to_plugin_config(&self) -> Option<PluginConfig> {
        let name = self.strategy_type.equivalent_plugin()?;
        let config = match self.strategy_type {
            AccessStrategyType::IpAccessControl => {
                let ips = self
                    .config
                    .get("ips")
                    .cloned()
                    .unwrap_or_else(|| Value::Array(Vec::new()));
                let key = match self.config.get("type").and_then(Value::as_str) {
                    Some("deny") => "blacklist",
                    _ => "whitelist",
                };
                let mut map = serde_json::Map::new();
                map.insert(key.to_string(), ips);
                Value::Object(map)
            }
            AccessStrategyType::ErrorStatusCode200 => serde_json::json!({ "status_code": 200 }),
            _ => self.config.clone(),
        };

        Some(PluginConfig {
            name: name.to_string(),
            config,
        })
    }
}

/// A resolved plugin ready to be attached to a declarative resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    pub config: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(strategy_type: AccessStrategyType, config: Value) -> AccessStrategyBinding {
        AccessStrategyBinding {
            id: PluginBindingId::new(1),
            gateway_id: GatewayId::new(1),
            scope: PluginScope::Stage(StageId::new(1)),
            strategy_type,
            config,
        }
    }

    #[test]
    fn test_ip_access_control_maps_to_ip_restriction() {
        let binding = strategy(
            AccessStrategyType::IpAccessControl,
            serde_json::json!({"type": "deny", "ips": ["1.1.1.1"]}),
        );
        let plugin = binding.to_plugin_config().unwrap();
        assert_eq!(plugin.name, "ip-restriction");
        assert_eq!(plugin.config, serde_json::json!({"blacklist": ["1.1.1.1"]}));
    }

    #[test]
    fn test_circuit_breaker_has_no_equivalent() {
        let binding = strategy(AccessStrategyType::CircuitBreaker, Value::Null);
        assert!(binding.to_plugin_config().is_none());
    }

    #[test]
    fn test_scope_serialization() {
        let scope = PluginScope::Resource(ResourceId::new(9));
        let json = serde_json::to_value(scope).unwrap();
        assert_eq!(json, serde_json::json!({"type": "resource", "id": 9}));
    }
}
