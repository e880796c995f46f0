//! Bulk export and import of the territory hierarchy.
//!
//! The exchange format keys countries by ISO-3166 alpha-2 code and gives
//! levels and municipalities *local* ids: 1-based positions in a
//! deterministic order (levels by depth then id, municipalities by id).
//! Import remaps local ids to fresh store ids in two passes, first the
//! entities, then their parent links.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{AdminLevel, Country, Municipality, LEVEL_SLOTS};
use crate::store::Store;

/// Current exchange format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerritoryExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub countries: Vec<CountryEntry>,
    pub levels: Vec<LevelEntry>,
    pub municipalities: Vec<MunicipalityEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryEntry {
    pub iso2: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelEntry {
    pub id: i64,
    pub country: String,
    pub depth: i32,
    pub name: String,
    pub parent: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MunicipalityEntry {
    pub id: i64,
    pub name: String,
    pub country: Option<String>,
    pub levels: Vec<Option<i64>>,
    pub parent: Option<i64>,
}

/// Serialize the whole hierarchy.
pub async fn export(store: &dyn Store) -> Result<TerritoryExport> {
    let mut countries = store.list_countries().await?;
    countries.sort_by(|a, b| a.iso2.cmp(&b.iso2));
    let iso_by_id: HashMap<i64, String> =
        countries.iter().map(|c| (c.id, c.iso2.clone())).collect();

    let mut levels = store.list_levels().await?;
    levels.sort_by_key(|l| (l.depth, l.id));
    let level_local: HashMap<i64, i64> = levels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.id, i as i64 + 1))
        .collect();

    let mut municipalities = store.list_municipalities().await?;
    municipalities.sort_by_key(|m| m.id);
    let mun_local: HashMap<i64, i64> = municipalities
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id, i as i64 + 1))
        .collect();

    let level_entries = levels
        .iter()
        .map(|l| LevelEntry {
            id: level_local[&l.id],
            country: iso_by_id.get(&l.country_id).cloned().unwrap_or_default(),
            depth: l.depth,
            name: l.name.clone(),
            parent: l.parent_id.and_then(|p| level_local.get(&p).copied()),
        })
        .collect();
    let mun_entries = municipalities
        .iter()
        .map(|m| MunicipalityEntry {
            id: mun_local[&m.id],
            name: m.name.clone(),
            country: m.country_id.and_then(|c| iso_by_id.get(&c).cloned()),
            levels: m
                .levels
                .iter()
                .map(|slot| slot.and_then(|l| level_local.get(&l).copied()))
                .collect(),
            parent: m.parent_id.and_then(|p| mun_local.get(&p).copied()),
        })
        .collect();

    Ok(TerritoryExport {
        version: FORMAT_VERSION,
        exported_at: Utc::now(),
        countries: countries
            .into_iter()
            .map(|c| CountryEntry {
                iso2: c.iso2,
                name: c.name,
            })
            .collect(),
        levels: level_entries,
        municipalities: mun_entries,
    })
}

/// Counts of entities created by [`import`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub countries: usize,
    pub levels: usize,
    pub municipalities: usize,
}

/// Load an export. Countries already present (same ISO code) are reused.
pub async fn import(store: &dyn Store, data: &TerritoryExport) -> Result<ImportReport> {
    if data.version != FORMAT_VERSION {
        bail!("unsupported territory format version {}", data.version);
    }
    let mut report = ImportReport::default();

    let mut country_ids: HashMap<String, i64> = store
        .list_countries()
        .await?
        .into_iter()
        .map(|c| (c.iso2.to_uppercase(), c.id))
        .collect();
    for c in &data.countries {
        let iso = c.iso2.trim().to_uppercase();
        if iso.len() != 2 {
            bail!("invalid ISO-3166 alpha-2 code '{}'", c.iso2);
        }
        if country_ids.contains_key(&iso) {
            continue;
        }
        let id = store
            .insert_country(&Country {
                id: 0,
                iso2: iso.clone(),
                name: c.name.clone(),
            })
            .await?;
        country_ids.insert(iso, id);
        report.countries += 1;
    }
    let country = |iso: &str| -> Result<i64> {
        country_ids
            .get(&iso.trim().to_uppercase())
            .copied()
            .with_context(|| format!("unknown country '{iso}'"))
    };

    // Pass one: entities without parent links.
    let mut level_ids: HashMap<i64, i64> = HashMap::new();
    for l in &data.levels {
        let id = store
            .insert_level(&AdminLevel {
                id: 0,
                country_id: country(&l.country)?,
                depth: l.depth,
                name: l.name.clone(),
                parent_id: None,
            })
            .await?;
        if level_ids.insert(l.id, id).is_some() {
            bail!("duplicate local level id {}", l.id);
        }
        report.levels += 1;
    }
    let level = |local: i64| -> Result<i64> {
        level_ids
            .get(&local)
            .copied()
            .with_context(|| format!("unknown local level id {local}"))
    };

    let mut mun_ids: HashMap<i64, i64> = HashMap::new();
    for m in &data.municipalities {
        if m.levels.len() > LEVEL_SLOTS {
            bail!("municipality '{}' has more than {LEVEL_SLOTS} levels", m.name);
        }
        let mut levels = [None; LEVEL_SLOTS];
        for (slot, local) in m.levels.iter().enumerate() {
            levels[slot] = local.map(level).transpose()?;
        }
        let id = store
            .insert_municipality(&Municipality {
                id: 0,
                name: m.name.clone(),
                country_id: m.country.as_deref().map(country).transpose()?,
                levels,
                parent_id: None,
            })
            .await?;
        if mun_ids.insert(m.id, id).is_some() {
            bail!("duplicate local municipality id {}", m.id);
        }
        report.municipalities += 1;
    }

    // Pass two: parent links.
    for l in &data.levels {
        if let Some(parent) = l.parent {
            store
                .set_level_parent(level(l.id)?, Some(level(parent)?))
                .await?;
        }
    }
    for m in &data.municipalities {
        if let Some(parent) = m.parent {
            let parent_id = mun_ids
                .get(&parent)
                .copied()
                .with_context(|| format!("unknown local municipality id {parent}"))?;
            store.set_municipality_parent(mun_ids[&m.id], Some(parent_id)).await?;
        }
    }

    info!(
        countries = report.countries,
        levels = report.levels,
        municipalities = report.municipalities,
        "territory imported"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    async fn seed(store: &InMemoryStore) {
        let es = store
            .insert_country(&Country {
                id: 0,
                iso2: "ES".into(),
                name: "Espanya".into(),
            })
            .await
            .unwrap();
        let cat = store
            .insert_level(&AdminLevel {
                id: 0,
                country_id: es,
                depth: 1,
                name: "Catalunya".into(),
                parent_id: None,
            })
            .await
            .unwrap();
        let tgn = store
            .insert_level(&AdminLevel {
                id: 0,
                country_id: es,
                depth: 2,
                name: "Tarragona".into(),
                parent_id: Some(cat),
            })
            .await
            .unwrap();
        let mut levels = [None; LEVEL_SLOTS];
        levels[0] = Some(cat);
        levels[1] = Some(tgn);
        let valls = store
            .insert_municipality(&Municipality {
                id: 0,
                name: "Valls".into(),
                country_id: Some(es),
                levels,
                parent_id: None,
            })
            .await
            .unwrap();
        store
            .insert_municipality(&Municipality {
                id: 0,
                name: "Picamoixons".into(),
                country_id: Some(es),
                levels,
                parent_id: Some(valls),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_is_stable() {
        let source = InMemoryStore::new();
        seed(&source).await;
        let first = export(&source).await.unwrap();
        assert_eq!(first.levels[1].parent, Some(1));
        assert_eq!(first.municipalities[1].parent, Some(1));

        let json = serde_json::to_string(&first).unwrap();
        let parsed: TerritoryExport = serde_json::from_str(&json).unwrap();
        let target = InMemoryStore::new();
        let report = import(&target, &parsed).await.unwrap();
        assert_eq!(
            report,
            ImportReport {
                countries: 1,
                levels: 2,
                municipalities: 2
            }
        );

        let mut second = export(&target).await.unwrap();
        second.exported_at = first.exported_at;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_local_reference_fails() {
        let data = TerritoryExport {
            version: FORMAT_VERSION,
            exported_at: Utc::now(),
            countries: vec![],
            levels: vec![],
            municipalities: vec![MunicipalityEntry {
                id: 1,
                name: "Enlloc".into(),
                country: None,
                levels: vec![Some(9)],
                parent: None,
            }],
        };
        let err = import(&InMemoryStore::new(), &data).await.unwrap_err();
        assert!(err.to_string().contains("unknown local level id 9"));
    }
}
