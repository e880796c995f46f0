//! Similarity between import templates.
//!
//! A template is reduced to a [`TemplateFeatures`] signature: book
//! resolution mode plus four sets (targets, person roles, attribute keys,
//! transform names). Two signatures score the mean of the four Jaccard
//! coefficients and, when requested, a 0/1 book-mode match.

use std::collections::BTreeSet;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::models::ImportTemplate;
use crate::store::Store;
use crate::template::program::Target;
use crate::template::registry::{can_clone, can_edit, list_visible};
use crate::template::TemplateProgram;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateFeatures {
    pub book_mode: String,
    pub targets: BTreeSet<String>,
    pub roles: BTreeSet<String>,
    pub attribute_keys: BTreeSet<String>,
    pub transforms: BTreeSet<String>,
}

impl TemplateFeatures {
    pub fn extract(program: &TemplateProgram) -> Self {
        let mut f = TemplateFeatures {
            book_mode: program.book.mode.as_str().to_string(),
            targets: BTreeSet::new(),
            roles: BTreeSet::new(),
            attribute_keys: BTreeSet::new(),
            transforms: BTreeSet::new(),
        };
        for (_, entry) in program.entries() {
            f.targets.insert(entry.target.to_string());
            match &entry.target {
                Target::Person { role, .. } => {
                    f.roles.insert(role.clone());
                }
                Target::Attr { key, .. } => {
                    f.attribute_keys.insert(key.clone());
                }
                Target::Base(_) => {}
            }
            for t in &entry.transforms {
                f.transforms.insert(t.name().to_string());
            }
        }
        f
    }
}

/// `|a ∩ b| / |a ∪ b|`, with two empty sets counting as identical.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Score two signatures in `[0, 1]`.
pub fn score(a: &TemplateFeatures, b: &TemplateFeatures, compare_book_mode: bool) -> f64 {
    let mut parts = vec![
        jaccard(&a.targets, &b.targets),
        jaccard(&a.roles, &b.roles),
        jaccard(&a.attribute_keys, &b.attribute_keys),
        jaccard(&a.transforms, &b.transforms),
    ];
    if compare_book_mode {
        parts.push(if a.book_mode == b.book_mode { 1.0 } else { 0.0 });
    }
    parts.iter().sum::<f64>() / parts.len() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarTemplate {
    pub template_id: i64,
    pub name: String,
    pub score: f64,
    pub can_edit: bool,
    pub can_clone: bool,
}

/// Rank the templates `viewer` can see by similarity to `program`.
///
/// Stored templates whose model no longer compiles are skipped.
pub async fn rank_similar(
    store: &dyn Store,
    program: &TemplateProgram,
    viewer: Option<i64>,
    exclude_id: Option<i64>,
    limit: usize,
) -> Result<Vec<SimilarTemplate>> {
    let wanted = TemplateFeatures::extract(program);
    let candidates: Vec<ImportTemplate> = list_visible(store, viewer)
        .await?
        .into_iter()
        .filter(|t| Some(t.id) != exclude_id)
        .collect();
    let mut out = Vec::new();
    for t in candidates {
        let other = match TemplateProgram::from_json(&t.model) {
            Ok(p) => p,
            Err(e) => {
                debug!(template = t.id, error = %e, "skipping uncompilable template");
                continue;
            }
        };
        let s = score(&wanted, &TemplateFeatures::extract(&other), true);
        out.push(SimilarTemplate {
            template_id: t.id,
            name: t.name.clone(),
            score: s,
            can_edit: can_edit(&t, viewer),
            can_clone: can_clone(&t, viewer),
        });
    }
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.template_id.cmp(&b.template_id))
    });
    out.truncate(limit);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Visibility;
    use crate::store::memory::InMemoryStore;
    use crate::template::registry::{create_template, TemplateDraft};
    use serde_json::{json, Value};

    fn model(mode: &str, extra_attr: bool) -> Value {
        let mut columns = vec![json!({"header": "batejat", "map_to": [
            {"target": "person.batejat", "transforms": ["trim", "parse_person_from_cognoms"]}
        ]})];
        if extra_attr {
            columns.push(json!({"header": "naixement", "map_to": [
                {"target": "attr.data_naixement.date", "transforms": ["parse_ddmmyyyy_to_iso"]}
            ]}));
        }
        json!({
            "metadata": {"record_type": "baptism"},
            "book_resolution": {"mode": mode, "column": "llibre"},
            "mapping": {"columns": columns}
        })
    }

    fn program(v: &Value) -> TemplateProgram {
        TemplateProgram::from_json(v).unwrap()
    }

    #[test]
    fn test_identical_templates_score_one() {
        let a = TemplateFeatures::extract(&program(&model("by_id", true)));
        assert_eq!(score(&a, &a, true), 1.0);
        assert_eq!(score(&a, &a, false), 1.0);
    }

    #[test]
    fn test_partial_overlap() {
        let a = TemplateFeatures::extract(&program(&model("by_id", false)));
        let b = TemplateFeatures::extract(&program(&model("by_chronology_label", true)));
        // targets 1/2, roles 1, attrs 0/1, transforms 2/3, mode 0
        let expected = (0.5 + 1.0 + 0.0 + 2.0 / 3.0 + 0.0) / 5.0;
        assert!((score(&a, &b, true) - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rank_similar_flags_permissions() {
        let store = InMemoryStore::new();
        for (owner, vis, m) in [
            (1, Visibility::Public, model("by_id", true)),
            (2, Visibility::Public, model("by_chronology_label", false)),
            (2, Visibility::Private, model("by_id", true)),
        ] {
            create_template(
                &store,
                Some(owner),
                TemplateDraft {
                    name: format!("t{owner}"),
                    description: String::new(),
                    visibility: vis,
                    default_separator: ";".into(),
                    model: m,
                },
            )
            .await
            .unwrap();
        }
        let ranked = rank_similar(&store, &program(&model("by_id", true)), Some(1), None, 10)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].score, 1.0);
        assert!(ranked[0].can_edit);
        assert!(!ranked[1].can_edit);
        assert!(ranked[1].can_clone);
    }
}
