//! # Arxiu CLI (`arxiu`)
//!
//! The `arxiu` binary drives bulk ingestion of transcribed registers:
//! database initialization, books, import templates, CSV imports,
//! moderation, rebuilds of derived data, search and export.
//!
//! ## Usage
//!
//! ```bash
//! arxiu --config ./config/arxiu.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `arxiu init` | Create the SQLite database and schema |
//! | `arxiu book add/list` | Register and list books |
//! | `arxiu template ...` | Manage, validate, compare and sample import templates |
//! | `arxiu import <csv>` | Ingest a CSV through a template |
//! | `arxiu record status/edit/show` | Moderate and inspect records |
//! | `arxiu rebuild <target>` | Rebuild counters, search index or progress |
//! | `arxiu search "<name>"` | Weighted name search |
//! | `arxiu export` | Export records as CSV |
//! | `arxiu territory export/import` | Move the territory hierarchy as JSON |
//! | `arxiu achievement ...` | Define achievements and inspect awards |
//! | `arxiu surname add/show` | Maintain the surname dictionary |
//! | `arxiu stats` | Database overview |
//!
//! ## Examples
//!
//! ```bash
//! arxiu init
//! arxiu book add --title "Baptismes" --chronology 1801-1820 --municipality 3 --type baptisme
//! arxiu template add model.json --name "Baptismes Sant Pere" --owner 7
//! arxiu import baptismes.csv --template 1 --user 7 --municipality 3
//! arxiu record status 12 13 --to published
//! arxiu search "Puig Ferrer"
//! ```

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use arxiu::config::{self, Config};
use arxiu::import::{ImportOptions, TemplateSource};
use arxiu::rebuild::RebuildTarget;
use arxiu::templates::{DraftOptions, SampleFormat};
use arxiu::{
    achievements, books, dictionary, export, import, migrate, rebuild, records, search, stats,
    templates, territory,
};
use arxiu_core::models::{Book, BookFilter};

/// Arxiu: bulk ingestion, roll-ups and search for transcribed parish and
/// civil registers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/arxiu.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "arxiu",
    about = "Arxiu: bulk ingestion, roll-ups and search for transcribed registers",
    version,
    long_about = "Arxiu ingests CSV transcriptions of parish and civil registers through \
    user-defined import templates, keeps demography and name-frequency counters per territory, \
    maintains a weighted name-search index, and tracks indexing progress per book."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/arxiu.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Register and list books.
    Book {
        #[command(subcommand)]
        action: BookAction,
    },

    /// Manage import templates.
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Ingest a CSV file through a template.
    ///
    /// Exactly one of `--template` (stored id) or `--model` (JSON file)
    /// is required. Rejected rows are written to an error CSV.
    Import {
        /// CSV file to ingest.
        csv: PathBuf,

        /// Stored template id.
        #[arg(long, conflicts_with = "model", required_unless_present = "model")]
        template: Option<i64>,

        /// Template model JSON file.
        #[arg(long)]
        model: Option<PathBuf>,

        /// Field separator: `,` `;` `|` or `\t`. Defaults to the template's.
        #[arg(long)]
        separator: Option<String>,

        /// Acting user id, recorded as creator and credited with activities.
        #[arg(long)]
        user: Option<i64>,

        /// Only resolve books of this municipality.
        #[arg(long)]
        municipality: Option<i64>,

        /// Only resolve books of this archive.
        #[arg(long)]
        archive: Option<i64>,

        /// Send every row to this book.
        #[arg(long)]
        book: Option<i64>,

        /// Status of created records when the template sets none.
        #[arg(long)]
        status: Option<String>,

        /// Where to write rejected rows (default `<csv>.errors.csv`).
        #[arg(long)]
        errors: Option<PathBuf>,
    },

    /// Moderate and inspect records.
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Rebuild derived data from published records.
    Rebuild {
        /// What to rebuild.
        #[arg(value_enum, default_value = "all")]
        target: RebuildTarget,

        /// Counter scope: `all`, `municipality:<id>` or `level:<id>`.
        #[arg(long, default_value = "all")]
        scope: String,
    },

    /// Search published records by name.
    Search {
        /// Names to look for.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Export records as CSV (to stdout unless `--output` is given).
    Export {
        #[arg(long)]
        book: Option<i64>,

        #[arg(long)]
        municipality: Option<i64>,

        /// Only records with this status.
        #[arg(long)]
        status: Option<String>,

        /// Append the literal transcription column.
        #[arg(long)]
        literal: bool,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Export or import the territory hierarchy.
    Territory {
        #[command(subcommand)]
        action: TerritoryAction,
    },

    /// Manage achievements.
    Achievement {
        #[command(subcommand)]
        action: AchievementAction,
    },

    /// Maintain the surname dictionary.
    Surname {
        #[command(subcommand)]
        action: SurnameAction,
    },

    /// Show database statistics.
    Stats,

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum BookAction {
    /// Create a book, or update it when `--id` is given.
    Add {
        #[arg(long)]
        id: Option<i64>,
        #[arg(long, default_value = "")]
        title: String,
        /// Chronology label, e.g. `1801-1820`.
        #[arg(long, default_value = "")]
        chronology: String,
        #[arg(long)]
        municipality: Option<i64>,
        #[arg(long)]
        archive: Option<i64>,
        #[arg(long)]
        entity: Option<i64>,
        /// Book type, e.g. `baptisme`, `matrimoni`, `obit`, `padro`.
        #[arg(long = "type", default_value = "")]
        book_type: String,
        #[arg(long)]
        fully_indexed: bool,
    },
    /// List books with their indexing percentage.
    List {
        #[arg(long)]
        municipality: Option<i64>,
        #[arg(long)]
        archive: Option<i64>,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Store a new template from a model JSON file.
    Add {
        model: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "private")]
        visibility: String,
        #[arg(long)]
        separator: Option<String>,
        #[arg(long)]
        owner: Option<i64>,
    },
    /// Replace a template's model and metadata (owner only).
    Update {
        id: i64,
        model: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "private")]
        visibility: String,
        #[arg(long)]
        separator: Option<String>,
        #[arg(long)]
        user: Option<i64>,
    },
    /// List templates visible to a user.
    List {
        #[arg(long)]
        user: Option<i64>,
    },
    /// Show one template.
    Show {
        id: i64,
        #[arg(long)]
        user: Option<i64>,
    },
    /// Compile a model file and report errors.
    Validate { model: PathBuf },
    /// Rank visible templates by similarity to a stored template or model.
    Similar {
        #[arg(long, conflicts_with = "model", required_unless_present = "model")]
        template: Option<i64>,
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        user: Option<i64>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Copy a visible template into a private one.
    Clone {
        id: i64,
        #[arg(long)]
        user: i64,
    },
    /// Generate a sample sheet the template accepts.
    Sample {
        #[arg(long, conflicts_with = "model", required_unless_present = "model")]
        template: Option<i64>,
        #[arg(long)]
        model: Option<PathBuf>,
        /// Book whose id or chronology fills the book column.
        #[arg(long)]
        book: Option<i64>,
        #[arg(long, value_enum, default_value = "csv")]
        format: SampleFormat,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum RecordAction {
    /// Change the moderation status of records.
    Status {
        #[arg(required = true)]
        ids: Vec<i64>,
        /// `pending`, `published` or `rejected`.
        #[arg(long)]
        to: String,
    },
    /// Mark a record as edited, sending it back to pending.
    Edit { id: i64 },
    /// Print a record with its persons and attributes as JSON.
    Show { id: i64 },
}

#[derive(Subcommand)]
enum TerritoryAction {
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    Import { input: PathBuf },
}

#[derive(Subcommand)]
enum AchievementAction {
    /// Define an achievement from a rule JSON file.
    Add {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        rule: PathBuf,
        #[arg(long)]
        repeatable: bool,
        #[arg(long)]
        disabled: bool,
        /// Event window start (YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,
        /// Event window end, inclusive (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,
    },
    List,
    /// Activity totals and awards of one user.
    User { id: i64 },
    /// Evaluate candidates for an activity code without awarding.
    Evaluate {
        user: i64,
        #[arg(long)]
        rule_code: String,
    },
}

#[derive(Subcommand)]
enum SurnameAction {
    /// Add a canonical surname and its variants.
    Add {
        form: String,
        #[arg(long = "variant")]
        variants: Vec<String>,
        /// Store variants unpublished (not used for matching).
        #[arg(long)]
        unpublished: bool,
    },
    Show { form: String },
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn template_source(id: Option<i64>, model: Option<PathBuf>) -> Result<TemplateSource> {
    match (id, model) {
        (Some(id), _) => Ok(TemplateSource::Stored(id)),
        (None, Some(path)) => Ok(TemplateSource::File(path)),
        (None, None) => anyhow::bail!("either --template or --model is required"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "arxiu", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Template {
            action: TemplateAction::Validate { model },
        } => {
            init_tracing("warn");
            return templates::run_validate(model);
        }
        _ => {}
    }

    let cfg: Config = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging.filter);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Book { action } => match action {
            BookAction::Add {
                id,
                title,
                chronology,
                municipality,
                archive,
                entity,
                book_type,
                fully_indexed,
            } => {
                let book = Book {
                    id: id.unwrap_or(0),
                    title,
                    chronology,
                    municipality_id: municipality,
                    archive_id: archive,
                    ecclesiastic_entity_id: entity,
                    fully_indexed,
                    book_type,
                };
                books::run_book_add(&cfg, book).await?;
            }
            BookAction::List {
                municipality,
                archive,
            } => {
                let filter = BookFilter {
                    municipality_id: municipality,
                    archive_id: archive,
                };
                books::run_book_list(&cfg, filter).await?;
            }
        },
        Commands::Template { action } => match action {
            TemplateAction::Add {
                model,
                name,
                description,
                visibility,
                separator,
                owner,
            } => {
                let opts = DraftOptions {
                    model,
                    name,
                    description,
                    visibility,
                    separator,
                };
                templates::run_add(&cfg, owner, opts).await?;
            }
            TemplateAction::Update {
                id,
                model,
                name,
                description,
                visibility,
                separator,
                user,
            } => {
                let opts = DraftOptions {
                    model,
                    name,
                    description,
                    visibility,
                    separator,
                };
                templates::run_update(&cfg, id, user, opts).await?;
            }
            TemplateAction::List { user } => {
                templates::run_list(&cfg, user).await?;
            }
            TemplateAction::Show { id, user } => {
                templates::run_show(&cfg, id, user).await?;
            }
            TemplateAction::Validate { .. } => {
                // Handled above (before config loading)
                unreachable!()
            }
            TemplateAction::Similar {
                template,
                model,
                user,
                limit,
            } => {
                templates::run_similar(&cfg, template_source(template, model)?, user, limit).await?;
            }
            TemplateAction::Clone { id, user } => {
                templates::run_clone(&cfg, id, user).await?;
            }
            TemplateAction::Sample {
                template,
                model,
                book,
                format,
                output,
            } => {
                templates::run_sample(
                    &cfg,
                    template_source(template, model)?,
                    book,
                    format,
                    output.as_deref(),
                )
                .await?;
            }
        },
        Commands::Import {
            csv,
            template,
            model,
            separator,
            user,
            municipality,
            archive,
            book,
            status,
            errors,
        } => {
            let opts = ImportOptions {
                template: template_source(template, model)?,
                csv,
                separator,
                user_id: user,
                municipality_id: municipality,
                archive_id: archive,
                book_id: book,
                status,
                errors_out: errors,
            };
            import::run_import(&cfg, opts).await?;
        }
        Commands::Record { action } => match action {
            RecordAction::Status { ids, to } => {
                records::run_set_status(&cfg, &ids, &to).await?;
            }
            RecordAction::Edit { id } => {
                records::run_mark_edited(&cfg, id).await?;
            }
            RecordAction::Show { id } => {
                records::run_show(&cfg, id).await?;
            }
        },
        Commands::Rebuild { target, scope } => {
            let scope = rebuild::parse_scope(&scope)?;
            rebuild::run_rebuild(&cfg, target, scope).await?;
        }
        Commands::Search { query, limit, json } => {
            search::run_search(&cfg, &query, limit, json).await?;
        }
        Commands::Export {
            book,
            municipality,
            status,
            literal,
            output,
        } => {
            export::run_export(
                &cfg,
                book,
                municipality,
                status.as_deref(),
                literal,
                output.as_deref(),
            )
            .await?;
        }
        Commands::Territory { action } => match action {
            TerritoryAction::Export { output } => {
                territory::run_territory_export(&cfg, output.as_deref()).await?;
            }
            TerritoryAction::Import { input } => {
                territory::run_territory_import(&cfg, &input).await?;
            }
        },
        Commands::Achievement { action } => match action {
            AchievementAction::Add {
                code,
                name,
                rule,
                repeatable,
                disabled,
                from,
                until,
            } => {
                let opts = achievements::AchievementOptions {
                    code,
                    name,
                    rule,
                    repeatable,
                    disabled,
                    from,
                    until,
                };
                achievements::run_add(&cfg, opts).await?;
            }
            AchievementAction::List => {
                achievements::run_list(&cfg).await?;
            }
            AchievementAction::User { id } => {
                achievements::run_user(&cfg, id).await?;
            }
            AchievementAction::Evaluate { user, rule_code } => {
                achievements::run_evaluate(&cfg, user, &rule_code).await?;
            }
        },
        Commands::Surname { action } => match action {
            SurnameAction::Add {
                form,
                variants,
                unpublished,
            } => {
                dictionary::run_surname_add(&cfg, &form, &variants, unpublished).await?;
            }
            SurnameAction::Show { form } => {
                dictionary::run_surname_show(&cfg, &form).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
