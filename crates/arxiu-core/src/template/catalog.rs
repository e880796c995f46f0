//! Per-record-type catalogs of admissible template targets.
//!
//! A baptism template may write to `person.batejat` but not to
//! `person.nuvi`; a census template may write `attr.adreca` but not
//! `attr.causa_defuncio`. The generic catalog admits any role and key.

use std::fmt;
use std::str::FromStr;

use crate::models::RecordType;

/// Record type a template declares in its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Baptism,
    Marriage,
    Death,
    Census,
    Recruitment,
    Generic,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogKind::Baptism => "baptism",
            CatalogKind::Marriage => "marriage",
            CatalogKind::Death => "death",
            CatalogKind::Census => "census",
            CatalogKind::Recruitment => "recruitment",
            CatalogKind::Generic => "generic",
        }
    }

    /// Record type given to created records (generic templates may override
    /// it per row through `base.tipus_acte`).
    pub fn record_type(&self) -> RecordType {
        match self {
            CatalogKind::Baptism => RecordType::Baptism,
            CatalogKind::Marriage => RecordType::Marriage,
            CatalogKind::Death => RecordType::Death,
            CatalogKind::Census => RecordType::Census,
            CatalogKind::Recruitment => RecordType::Recruitment,
            CatalogKind::Generic => RecordType::Other,
        }
    }

    /// Admissible person roles, or `None` when any role is allowed.
    pub fn roles(&self) -> Option<&'static [&'static str]> {
        match self {
            CatalogKind::Baptism => Some(&[
                "batejat",
                "pare",
                "mare",
                "avi_patern",
                "avia_paterna",
                "avi_matern",
                "avia_materna",
                "padri",
                "padrina",
                "testimoni",
                "capella",
            ]),
            CatalogKind::Marriage => Some(&[
                "nuvi",
                "novia",
                "pare_nuvi",
                "mare_nuvi",
                "pare_novia",
                "mare_novia",
                "conjuge_anterior_nuvi",
                "conjuge_anterior_novia",
                "testimoni",
                "capella",
            ]),
            CatalogKind::Death => Some(&[
                "difunt", "pare", "mare", "conjuge", "fill", "testimoni", "capella",
            ]),
            CatalogKind::Census => Some(&[
                "cap_familia",
                "conjuge",
                "fill",
                "filla",
                "pare",
                "mare",
                "familiar",
                "altres",
            ]),
            CatalogKind::Recruitment => Some(&["recluta", "pare", "mare"]),
            CatalogKind::Generic => None,
        }
    }

    /// Admissible attribute keys, or `None` when any key is allowed.
    pub fn attribute_keys(&self) -> Option<&'static [&'static str]> {
        match self {
            CatalogKind::Baptism => Some(&[
                "data_naixement",
                "hora_naixement",
                "lloc_naixement",
                "legitimitat",
                "ordre_fill",
                "observacions",
            ]),
            CatalogKind::Marriage => Some(&[
                "data_proclames",
                "ordre_matrimoni",
                "dispensa",
                "parroquia_nuvi",
                "parroquia_novia",
                "observacions",
            ]),
            CatalogKind::Death => Some(&[
                "data_defuncio",
                "data_enterrament",
                "causa_defuncio",
                "lloc_enterrament",
                "sagraments",
                "testament",
                "observacions",
            ]),
            CatalogKind::Census => Some(&[
                "adreca",
                "carrer",
                "numero_casa",
                "districte",
                "sap_llegir",
                "sap_escriure",
                "observacions",
            ]),
            CatalogKind::Recruitment => Some(&[
                "lleva",
                "quinta",
                "talla",
                "resultat",
                "observacions",
            ]),
            CatalogKind::Generic => None,
        }
    }

    pub fn allows_role(&self, role: &str) -> bool {
        self.roles().map(|r| r.contains(&role)).unwrap_or(true)
    }

    pub fn allows_attribute(&self, key: &str) -> bool {
        self.attribute_keys()
            .map(|k| k.contains(&key))
            .unwrap_or(true)
    }

    /// `base.tipus_acte` is only meaningful for generic templates.
    pub fn allows_record_type_override(&self) -> bool {
        matches!(self, CatalogKind::Generic)
    }
}

impl FromStr for CatalogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "baptism" | "baptisme" | "baptismes" => Ok(CatalogKind::Baptism),
            "marriage" | "matrimoni" | "matrimonis" => Ok(CatalogKind::Marriage),
            "death" | "obit" | "obits" | "defuncio" => Ok(CatalogKind::Death),
            "census" | "padro" | "padrons" => Ok(CatalogKind::Census),
            "recruitment" | "lleva" | "lleves" => Ok(CatalogKind::Recruitment),
            "generic" | "generica" | "other" => Ok(CatalogKind::Generic),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
