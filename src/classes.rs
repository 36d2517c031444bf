//! Class-name table shared by the annotator, stub clients and config.

use anyhow::{anyhow, Result};

/// Ordered list of known class labels, fixed at startup.
///
/// A label's index selects its overlay colour, so the same class always gets the
/// same colour across frames.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassTable {
    names: Vec<String>,
}

impl ClassTable {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Vec::new();
        for name in names {
            let name: String = name.into();
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(anyhow!("class names must not be empty"));
            }
            if table.contains(&name) {
                return Err(anyhow!("duplicate class name '{}'", name));
            }
            table.push(name);
        }
        Ok(Self { names: table })
    }

    /// Position of a label in the table, if known.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.names.iter().position(|name| name == label)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_lookup_follows_configured_order() -> Result<()> {
        let table = ClassTable::new(["broken_teeth", "dent", "scratch"])?;
        assert_eq!(table.index_of("dent"), Some(1));
        assert_eq!(table.index_of("rust"), None);
        assert_eq!(table.get(2), Some("scratch"));
        Ok(())
    }

    #[test]
    fn rejects_duplicates_and_blanks() {
        assert!(ClassTable::new(["dent", "dent"]).is_err());
        assert!(ClassTable::new(["dent", "  "]).is_err());
    }
}
