use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryType {
    Executor,
    Admin,
}

/// 执行器注册信息：分组类型 + 应用名 + 地址
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub group_type: RegistryType,
    /// 应用名称
    pub group_key: String,
    pub address: String,
}

impl RegistryEntry {
    pub fn executor(app_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            group_type: RegistryType::Executor,
            group_key: app_name.into(),
            address: address.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.group_key.trim().is_empty() || self.address.trim().is_empty() {
            return Err("Illegal Argument.".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_type_wire_format() {
        let entry = RegistryEntry::executor("demo-app", "http://10.0.0.1:9999/");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["group_type"], "EXECUTOR");
        assert_eq!(json["group_key"], "demo-app");
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert!(RegistryEntry::executor(" ", "addr").validate().is_err());
        assert!(RegistryEntry::executor("app", "").validate().is_err());
        assert!(RegistryEntry::executor("app", "addr").validate().is_ok());
    }
}
