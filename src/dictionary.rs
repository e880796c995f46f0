//! Surname dictionary: canonical forms and their spelling variants.
//!
//! Published variants expand search queries and resolve surname
//! frequencies to their canonical entry.

use anyhow::{bail, Result};

use arxiu_core::normalize::canonical_surname_key;
use arxiu_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_surname_add(
    config: &Config,
    form: &str,
    variants: &[String],
    unpublished: bool,
) -> Result<()> {
    let key = canonical_surname_key(form);
    if key.is_empty() {
        bail!("surname '{}' has no letters", form);
    }
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let canonical = match store.find_cognom_by_key(&key).await? {
        Some(c) if c.key == key => c,
        Some(c) => {
            pool.close().await;
            bail!("'{}' is already a variant of '{}'", form, c.form);
        }
        None => store.create_cognom(form.trim(), &key).await?,
    };
    println!("surname {}: {}", canonical.id, canonical.form);

    let known: Vec<String> = store
        .list_cognom_variants(canonical.id)
        .await?
        .into_iter()
        .map(|v| v.key)
        .collect();
    for v in variants {
        let vkey = canonical_surname_key(v);
        if vkey.is_empty() || vkey == canonical.key || known.contains(&vkey) {
            println!("  skipped: {}", v);
            continue;
        }
        store
            .add_cognom_variant(canonical.id, v.trim(), &vkey, !unpublished)
            .await?;
        println!("  variant: {}", v.trim());
    }

    pool.close().await;
    Ok(())
}

pub async fn run_surname_show(config: &Config, form: &str) -> Result<()> {
    let key = canonical_surname_key(form);
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let Some(canonical) = store.find_cognom_by_key(&key).await? else {
        pool.close().await;
        println!("No surname matches '{}'.", form);
        return Ok(());
    };
    let variants = store.list_cognom_variants(canonical.id).await?;
    pool.close().await;

    println!("surname {}: {} (key {})", canonical.id, canonical.form, canonical.key);
    for v in &variants {
        println!(
            "  {}{}",
            v.form,
            if v.published { "" } else { "  (unpublished)" }
        );
    }
    Ok(())
}
