use crate::errors::ConfigError;
use std::collections::BTreeMap;

pub mod tpcds;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn has_column(&self, column: &str) -> bool {
        let column = column.to_ascii_lowercase();
        self.columns.iter().any(|c| *c == column)
    }
}

/// Table and column names known to the target database. Names are stored
/// lowercased; lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    tables: BTreeMap<String, TableSchema>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn tpcds() -> Self {
        let mut cat = Self::empty();
        for (name, cols) in tpcds::TABLES {
            cat.add_table(name, cols.iter().map(|c| c.to_string()).collect());
        }
        cat
    }

    /// Builds a catalog from a builtin name (`tpcds` or `none`) plus extra
    /// tables. Extra tables replace builtin tables of the same name.
    pub fn from_parts(
        builtin: Option<&str>,
        tables: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, ConfigError> {
        let mut cat = match builtin.map(|b| b.trim().to_ascii_lowercase()).as_deref() {
            None | Some("tpcds") | Some("tpc-ds") => Self::tpcds(),
            Some("none") | Some("") => Self::empty(),
            Some(other) => {
                return Err(ConfigError(format!(
                    "unknown builtin catalog '{}' (expected tpcds or none)",
                    other
                )))
            }
        };
        for (name, cols) in tables {
            if cols.is_empty() {
                return Err(ConfigError(format!(
                    "catalog table '{}' declares no columns",
                    name
                )));
            }
            cat.add_table(name, cols.clone());
        }
        Ok(cat)
    }

    pub fn add_table(&mut self, name: &str, columns: Vec<String>) {
        let name = name.to_ascii_lowercase();
        let columns = columns.into_iter().map(|c| c.to_ascii_lowercase()).collect();
        self.tables.insert(
            name.clone(),
            TableSchema {
                name,
                columns,
            },
        );
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn merge(&mut self, other: &Catalog) {
        for (k, v) in &other.tables {
            self.tables.insert(k.clone(), v.clone());
        }
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tpcds_has_all_tables() {
        let cat = Catalog::tpcds();
        assert_eq!(cat.len(), 24);
        assert!(cat.table("STORE_SALES").is_some());
        assert!(cat.table("customer_address").is_some_and(|t| t.has_column("CA_STATE")));
    }

    #[test]
    fn extra_tables_override_builtin() {
        let mut extra = BTreeMap::new();
        extra.insert("Item".to_string(), vec!["I_ITEM_SK".to_string()]);
        let cat = Catalog::from_parts(None, &extra).unwrap();
        assert_eq!(cat.table("item").map(|t| t.columns.len()), Some(1));
    }

    #[test]
    fn unknown_builtin_is_config_error() {
        let err = Catalog::from_parts(Some("tpch"), &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("tpch"));
    }
}
