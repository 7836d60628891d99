use std::fmt;
use std::str::FromStr;

use super::error::SnmpError;

/// Владеющий OID в точечной нотации.
///
/// Порядок сравнения лексикографический по дугам, т.е. совпадает с порядком
/// обхода GETNEXT.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentifier(Vec<u64>);

impl ObjectIdentifier {
    pub fn from_arcs(arcs: Vec<u64>) -> Self {
        Self(arcs)
    }

    pub fn arcs(&self) -> &[u64] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &ObjectIdentifier) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Дуги после `prefix`, если OID лежит в его поддереве
    pub fn suffix_after(&self, prefix: &ObjectIdentifier) -> Option<&[u64]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }

    pub fn extend(&self, arcs: &[u64]) -> Self {
        let mut extended = self.0.clone();
        extended.extend_from_slice(arcs);
        Self(extended)
    }
}

/// Парсит строку OID (`1.3.6.1...` или `.1.3.6.1...`)
pub fn parse_oid(s: &str) -> Result<ObjectIdentifier, SnmpError> {
    let parts: Result<Vec<u64>, _> = s
        .trim()
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u64>())
        .collect();

    let parts = parts.map_err(|e| SnmpError::InvalidOid(format!("{}: {}", s, e)))?;
    if parts.len() < 2 {
        return Err(SnmpError::InvalidOid(format!("{}: слишком короткий OID", s)));
    }
    Ok(ObjectIdentifier(parts))
}

impl FromStr for ObjectIdentifier {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_oid(s)
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arc) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
        }
        Ok(())
    }
}
