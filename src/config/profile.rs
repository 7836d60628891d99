use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::snmp::{ObjectIdentifier, SnmpError, parse_oid};

const IF_INDEX_PLACEHOLDER: &str = "{if_index}";
const ONU_PLACEHOLDER: &str = "{onu}";

/// Шаблон OID одного атрибута ONU, например
/// `1.3.6.1.4.1.3902.1012.3.28.1.1.5.{if_index}.{onu}`.
///
/// `{if_index}` и `{onu}` обязаны идти подряд: всё до `{onu}` является
/// корнем колонки, который обходится при поиске ONU на порту.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OidTemplate(String);

impl OidTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn render(&self, if_index: u64, onu: u16) -> Result<ObjectIdentifier, SnmpError> {
        let rendered = self
            .0
            .replace(IF_INDEX_PLACEHOLDER, &if_index.to_string())
            .replace(ONU_PLACEHOLDER, &onu.to_string());
        parse_oid(&rendered)
    }

    /// Корень колонки порта: шаблон до `.{onu}`
    pub fn column_root(&self, if_index: u64) -> Result<ObjectIdentifier, SnmpError> {
        let marker = format!("{}.{}", IF_INDEX_PLACEHOLDER, ONU_PLACEHOLDER);
        let prefix_end = self
            .0
            .find(&marker)
            .ok_or_else(|| SnmpError::InvalidOid(format!("{}: нет {}", self.0, marker)))?;
        let root = format!("{}{}", &self.0[..prefix_end], if_index);
        parse_oid(&root)
    }

    fn validate(&self, attribute: &str) -> Result<()> {
        if self.0.matches(IF_INDEX_PLACEHOLDER).count() != 1 || self.0.matches(ONU_PLACEHOLDER).count() != 1 {
            anyhow::bail!("шаблон OID '{}' для {} должен содержать по одному {} и {}", self.0, attribute, IF_INDEX_PLACEHOLDER, ONU_PLACEHOLDER);
        }
        self.column_root(0)
            .and_then(|_| self.render(0, 0))
            .with_context(|| format!("невалидный шаблон OID для {}", attribute))?;
        Ok(())
    }
}

/// OID атрибутов ONU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnuOids {
    pub status: OidTemplate,
    pub rx_power: OidTemplate,
    pub tx_power: OidTemplate,
    pub serial_number: OidTemplate,
    pub description: OidTemplate,
    pub name: OidTemplate,
    pub model: OidTemplate,
}

impl Default for OnuOids {
    /// ZTE C320 (ZXA10 GPON, ветка 1.3.6.1.4.1.3902.1012)
    fn default() -> Self {
        Self {
            model: OidTemplate::new("1.3.6.1.4.1.3902.1012.3.28.1.1.1.{if_index}.{onu}"),
            name: OidTemplate::new("1.3.6.1.4.1.3902.1012.3.28.1.1.2.{if_index}.{onu}"),
            description: OidTemplate::new("1.3.6.1.4.1.3902.1012.3.28.1.1.3.{if_index}.{onu}"),
            serial_number: OidTemplate::new("1.3.6.1.4.1.3902.1012.3.28.1.1.5.{if_index}.{onu}"),
            status: OidTemplate::new("1.3.6.1.4.1.3902.1012.3.28.2.1.4.{if_index}.{onu}"),
            rx_power: OidTemplate::new("1.3.6.1.4.1.3902.1012.3.50.12.1.1.10.{if_index}.{onu}.1"),
            tx_power: OidTemplate::new("1.3.6.1.4.1.3902.1012.3.50.12.1.1.14.{if_index}.{onu}.1"),
        }
    }
}

/// Раскладка MIB конкретного OLT: шаблоны OID, кодирование ifIndex порта и
/// масштаб оптической мощности
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OltProfile {
    /// Название профиля, например "zte-c320"
    pub name: String,
    /// ifIndex PON порта = base | board << board_shift | port << port_shift
    pub if_index_base: u64,
    pub board_shift: u32,
    pub port_shift: u32,
    /// Максимальный индекс ONU на PON порту
    pub max_onu_index: u16,
    /// Сырое значение мощности / power_divisor = dBm
    pub power_divisor: i64,
    pub oids: OnuOids,
}

impl Default for OltProfile {
    fn default() -> Self {
        Self {
            name: "zte-c320".to_string(),
            if_index_base: 0x1000_0000,
            board_shift: 16,
            port_shift: 8,
            max_onu_index: 128,
            power_divisor: 100,
            oids: OnuOids::default(),
        }
    }
}

impl OltProfile {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Не удалось прочитать файл профиля: {}", path))?;

        let profile: OltProfile =
            serde_yml::from_str(&content).context("Не удалось распарсить YAML профиля")?;
        profile.validate()?;

        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        if self.power_divisor <= 0 {
            anyhow::bail!("Профиль '{}': power_divisor должен быть положительным", self.name);
        }
        if self.max_onu_index == 0 {
            anyhow::bail!("Профиль '{}': max_onu_index равен нулю", self.name);
        }
        if self.board_shift >= 64 || self.port_shift >= 64 {
            anyhow::bail!("Профиль '{}': сдвиг ifIndex вне диапазона", self.name);
        }

        let oids = &self.oids;
        for (attribute, template) in [
            ("status", &oids.status),
            ("rx_power", &oids.rx_power),
            ("tx_power", &oids.tx_power),
            ("serial_number", &oids.serial_number),
            ("description", &oids.description),
            ("name", &oids.name),
            ("model", &oids.model),
        ] {
            template.validate(attribute)?;
        }
        Ok(())
    }

    pub fn if_index(&self, board: u8, port: u8) -> u64 {
        self.if_index_base | (u64::from(board) << self.board_shift) | (u64::from(port) << self.port_shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn c320_if_index_layout() {
        let profile = OltProfile::default();
        assert_eq!(profile.if_index(1, 1), 268_501_248);
        assert_eq!(profile.if_index(1, 2), 268_501_504);
        assert_eq!(profile.if_index(2, 1), 268_566_784);
    }

    #[test]
    fn default_profile_is_valid() {
        OltProfile::default().validate().unwrap();
    }

    #[test]
    fn template_renders_and_exposes_column_root() {
        let template = OidTemplate::new("1.3.6.1.4.1.3902.1012.3.50.12.1.1.10.{if_index}.{onu}.1");
        let oid = template.render(268_501_248, 5).unwrap();
        assert_eq!(oid.to_string(), "1.3.6.1.4.1.3902.1012.3.50.12.1.1.10.268501248.5.1");

        let root = template.column_root(268_501_248).unwrap();
        assert_eq!(root.to_string(), "1.3.6.1.4.1.3902.1012.3.50.12.1.1.10.268501248");
        assert!(oid.starts_with(&root));
    }

    #[test]
    fn template_without_adjacent_placeholders_is_rejected() {
        let mut profile = OltProfile::default();
        profile.oids.status = OidTemplate::new("1.3.6.1.4.1.3902.{onu}.7.{if_index}");
        assert!(profile.validate().is_err());

        profile.oids.status = OidTemplate::new("1.3.6.1.4.1.3902.7.{if_index}");
        assert!(profile.validate().is_err());
    }

    #[test]
    fn partial_yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "name: lab-olt\npower_divisor: 1000\noids:\n  status: \"1.3.6.1.4.1.99.1.{{if_index}}.{{onu}}\"\n"
        )
        .unwrap();

        let profile = OltProfile::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(profile.name, "lab-olt");
        assert_eq!(profile.power_divisor, 1000);
        assert_eq!(profile.oids.status.as_str(), "1.3.6.1.4.1.99.1.{if_index}.{onu}");
        assert_eq!(profile.oids.serial_number, OnuOids::default().serial_number);
        assert_eq!(profile.max_onu_index, 128);
    }

    #[test]
    fn shipped_profile_matches_builtin_defaults() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/profiles/zte-c320.yaml");
        assert_eq!(OltProfile::load(path).unwrap(), OltProfile::default());
    }

    #[test]
    fn non_positive_divisor_is_rejected() {
        let profile = OltProfile {
            power_divisor: 0,
            ..OltProfile::default()
        };
        assert!(profile.validate().is_err());
    }
}
