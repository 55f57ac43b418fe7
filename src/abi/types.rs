use serde::Deserialize;

use crate::errors::DecodeError;

/// An ABI document as served by chain APIs and `setabi` payloads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AbiDef {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub variants: Vec<VariantDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructDef {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariantDef {
    pub name: String,
    pub types: Vec<String>,
}

impl AbiDef {
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(text).map_err(|e| DecodeError::BadAbi(e.to_string()))
    }

    /// Follow typedefs until a concrete type name is reached.
    ///
    /// Bounded by the number of typedefs so a cyclic ABI cannot hang us.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        for _ in 0..=self.types.len() {
            match self.types.iter().find(|t| t.new_type_name == current) {
                Some(t) => current = &t.type_name,
                None => return current,
            }
        }
        current
    }

    pub fn structure(&self, name: &str) -> Option<&StructDef> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn variant(&self, name: &str) -> Option<&VariantDef> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// Type name backing the given action.
    pub fn action_type(&self, action: &str) -> Option<&str> {
        self.actions
            .iter()
            .find(|a| a.name == action)
            .map(|a| a.type_name.as_str())
    }

    /// Type name backing the given table's rows.
    pub fn table_type(&self, table: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.type_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_follows_typedefs() {
        let abi = AbiDef {
            types: vec![
                TypeDef {
                    new_type_name: "account_name".to_owned(),
                    type_name: "name".to_owned(),
                },
                TypeDef {
                    new_type_name: "owner_name".to_owned(),
                    type_name: "account_name".to_owned(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(abi.resolve("owner_name"), "name");
        assert_eq!(abi.resolve("name"), "name");
    }

    #[test]
    fn test_resolve_survives_cycles() {
        let abi = AbiDef {
            types: vec![
                TypeDef {
                    new_type_name: "a".to_owned(),
                    type_name: "b".to_owned(),
                },
                TypeDef {
                    new_type_name: "b".to_owned(),
                    type_name: "a".to_owned(),
                },
            ],
            ..Default::default()
        };
        // Must terminate; the resulting name is one of the cycle members.
        let resolved = abi.resolve("a");
        assert!(resolved == "a" || resolved == "b");
    }
}
