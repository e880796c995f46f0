//! Template persistence with validation, signatures and visibility rules.

use anyhow::{bail, Result};
use serde_json::Value;
use tracing::info;

use crate::ingest::parse_separator;
use crate::models::{ImportTemplate, Visibility};
use crate::store::Store;

use super::{signature, TemplateProgram};

/// Fields supplied when creating or replacing a template.
#[derive(Debug, Clone)]
pub struct TemplateDraft {
    pub name: String,
    pub description: String,
    pub visibility: Visibility,
    pub default_separator: String,
    pub model: Value,
}

/// Whether `viewer` may modify `template`.
pub fn can_edit(template: &ImportTemplate, viewer: Option<i64>) -> bool {
    viewer.is_some() && template.owner_id == viewer
}

/// Whether `viewer` may copy `template` into a template of their own.
pub fn can_clone(template: &ImportTemplate, viewer: Option<i64>) -> bool {
    can_edit(template, viewer) || template.visibility == Visibility::Public
}

fn check_draft(draft: &TemplateDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        bail!("template name must not be empty");
    }
    if parse_separator(&draft.default_separator).is_none() {
        bail!(
            "invalid separator '{}' (expected one of , ; | \\t)",
            draft.default_separator
        );
    }
    TemplateProgram::from_json(&draft.model)?;
    Ok(())
}

/// Validate and store a new template owned by `owner_id`.
pub async fn create_template(
    store: &dyn Store,
    owner_id: Option<i64>,
    draft: TemplateDraft,
) -> Result<ImportTemplate> {
    check_draft(&draft)?;
    let now = chrono::Utc::now().timestamp();
    let mut template = ImportTemplate {
        id: 0,
        owner_id,
        name: draft.name.trim().to_string(),
        description: draft.description,
        visibility: draft.visibility,
        default_separator: draft.default_separator,
        signature: signature(&draft.model),
        model: draft.model,
        created_at: now,
        updated_at: now,
    };
    template.id = store.insert_template(&template).await?;
    info!(id = template.id, name = %template.name, "template created");
    Ok(template)
}

/// Replace a template's fields. Only the owner may do so.
pub async fn update_template(
    store: &dyn Store,
    id: i64,
    actor: Option<i64>,
    draft: TemplateDraft,
) -> Result<ImportTemplate> {
    let Some(mut template) = store.get_template(id).await? else {
        bail!("template {} not found", id);
    };
    if !can_edit(&template, actor) {
        bail!("template {} can only be edited by its owner", id);
    }
    check_draft(&draft)?;
    template.name = draft.name.trim().to_string();
    template.description = draft.description;
    template.visibility = draft.visibility;
    template.default_separator = draft.default_separator;
    template.signature = signature(&draft.model);
    template.model = draft.model;
    template.updated_at = chrono::Utc::now().timestamp();
    store.update_template(&template).await?;
    Ok(template)
}

/// Copy a visible template into a new private template owned by `viewer`.
pub async fn clone_template(store: &dyn Store, id: i64, viewer: i64) -> Result<ImportTemplate> {
    let Some(source) = store.get_template(id).await? else {
        bail!("template {} not found", id);
    };
    if !can_clone(&source, Some(viewer)) {
        bail!("template {} is not visible", id);
    }
    let draft = TemplateDraft {
        name: format!("{} (còpia)", source.name),
        description: source.description.clone(),
        visibility: Visibility::Private,
        default_separator: source.default_separator.clone(),
        model: source.model.clone(),
    };
    create_template(store, Some(viewer), draft).await
}

/// Templates `viewer` may see: their own and every public one.
pub async fn list_visible(store: &dyn Store, viewer: Option<i64>) -> Result<Vec<ImportTemplate>> {
    Ok(store
        .list_templates()
        .await?
        .into_iter()
        .filter(|t| t.visible_to(viewer))
        .collect())
}

/// Fetch a template if `viewer` may see it.
pub async fn get_visible(
    store: &dyn Store,
    id: i64,
    viewer: Option<i64>,
) -> Result<Option<ImportTemplate>> {
    Ok(store
        .get_template(id)
        .await?
        .filter(|t| t.visible_to(viewer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::template::TemplateError;
    use serde_json::json;

    fn model() -> Value {
        json!({
            "metadata": {"record_type": "death"},
            "book_resolution": {"mode": "by_id", "column": "llibre"},
            "mapping": {"columns": [
                {"header": "difunt", "map_to": [
                    {"target": "person.difunt", "transforms": ["parse_person_from_nom"]}
                ]}
            ]}
        })
    }

    fn draft(visibility: Visibility) -> TemplateDraft {
        TemplateDraft {
            name: "Òbits".into(),
            description: String::new(),
            visibility,
            default_separator: ";".into(),
            model: model(),
        }
    }

    #[tokio::test]
    async fn test_create_sets_signature_and_rejects_invalid() {
        let store = InMemoryStore::new();
        let t = create_template(&store, Some(1), draft(Visibility::Private))
            .await
            .unwrap();
        assert_eq!(t.signature, signature(&model()));

        let mut bad = draft(Visibility::Private);
        bad.model["mapping"]["columns"][0]["map_to"][0]["transforms"] = json!(["shout"]);
        let err = create_template(&store, Some(1), bad).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TemplateError>(),
            Some(TemplateError::UnknownTransform { .. })
        ));

        let mut bad = draft(Visibility::Private);
        bad.default_separator = "#".into();
        assert!(create_template(&store, Some(1), bad).await.is_err());
    }

    #[tokio::test]
    async fn test_visibility_and_permissions() {
        let store = InMemoryStore::new();
        let private = create_template(&store, Some(1), draft(Visibility::Private))
            .await
            .unwrap();
        let public = create_template(&store, Some(1), draft(Visibility::Public))
            .await
            .unwrap();

        assert_eq!(list_visible(&store, Some(1)).await.unwrap().len(), 2);
        let others = list_visible(&store, Some(2)).await.unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, public.id);
        assert!(get_visible(&store, private.id, None).await.unwrap().is_none());

        assert!(can_edit(&private, Some(1)));
        assert!(!can_edit(&public, Some(2)));
        assert!(can_clone(&public, Some(2)));
        assert!(!can_clone(&private, Some(2)));

        assert!(update_template(&store, public.id, Some(2), draft(Visibility::Public))
            .await
            .is_err());
        let copy = clone_template(&store, public.id, 2).await.unwrap();
        assert_eq!(copy.owner_id, Some(2));
        assert_eq!(copy.visibility, Visibility::Private);
        assert_eq!(copy.signature, public.signature);
    }
}
