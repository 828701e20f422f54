use std::path::Path;

use clap::Parser;
use globset::Glob;
use hopnotes::{
    ConfigDb,
    DataDir,
    ExtractiveAnswerer,
    HopnotesConfig,
    Indexer,
    LocalEmbedder,
    NoteStore,
    Orchestrator,
    TermFrequencyExtractor,
    config::{MODEL_SETTING, SETTING_KEYS, needs_rebuild},
    error::{self, Error},
    ids::split_note_id,
    ingestion,
    model_manager::resolve_model_id,
    provider::embed_validated,
    search::{self, SearchParams},
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, CollectionAction, Command, NotesAction, SettingsAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("HOPNOTES_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn runtime() -> error::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("failed to start tokio runtime: {e}")))
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let model_id = resolve_model_id(
        cli.model.as_deref(),
        config_db.get_setting(MODEL_SETTING)?,
    );

    match cli.command {
        Command::Collection { action } => match action {
            CollectionAction::Add { path, name } => {
                collection_add(&config_db, &path, &name)?;
            }
            CollectionAction::Remove { name } => {
                collection_remove(&config_db, &data_dir, &name)?;
            }
            CollectionAction::List { json } => {
                collection_list(&config_db, json)?;
            }
        },
        Command::Sync(args) => {
            cmd_sync(&config_db, &data_dir, &model_id, args.collection, false, cli.quiet)?;
        }
        Command::Rebuild(args) => {
            cmd_sync(&config_db, &data_dir, &model_id, args.collection, true, cli.quiet)?;
        }
        Command::Search(args) => {
            cmd_search(&config_db, &data_dir, &model_id, &args)?;
        }
        Command::Ask(args) => {
            cmd_ask(&config_db, &data_dir, &model_id, &args)?;
        }
        Command::Get(args) => {
            cmd_get(&data_dir, &args)?;
        }
        Command::Notes { action } => match action {
            NotesAction::List(args) => cmd_notes_list(&data_dir, &args)?,
        },
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, &model_id, args.json)?;
        }
        Command::Settings { action } => cmd_settings(&config_db, action)?,
        Command::Mcp => {
            hopnotes::mcp::run_mcp(data_dir, config_db, model_id)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn collection_add(
    config_db: &ConfigDb,
    path: &Path,
    name: &str,
) -> error::Result<()> {
    if !path.is_dir() {
        return Err(Error::Config(format!(
            "not a directory: {}",
            path.display()
        )));
    }
    if name.is_empty() || name.contains(':') {
        return Err(Error::Config(format!(
            "invalid collection name '{name}': must be non-empty without ':'"
        )));
    }

    let abs_path = path.canonicalize().map_err(|e| {
        Error::Config(format!("cannot resolve path {}: {e}", path.display()))
    })?;

    if config_db.get_collection(name)?.is_some() {
        return Err(Error::Config(format!("collection '{name}' already exists")));
    }

    config_db.set_collection(name, &abs_path.to_string_lossy())?;

    println!("Added collection '{name}' -> {}", abs_path.display());
    println!("Run `hopnotes sync -c {name}` to index it.");
    Ok(())
}

fn collection_remove(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    name: &str,
) -> error::Result<()> {
    if config_db.get_collection(name)?.is_none() {
        return Err(Error::NotFound {
            kind: "collection",
            name: name.to_string(),
        });
    }

    let store = NoteStore::open(&data_dir.notes_db())?;
    let removed = ingestion::purge_collection(&store, name)?;
    config_db.remove_collection(name)?;

    println!("Removed collection '{name}' ({removed} notes)");
    Ok(())
}

fn collection_list(config_db: &ConfigDb, json: bool) -> error::Result<()> {
    let collections = config_db.list_collections()?;

    if json {
        let items: Vec<_> = collections
            .iter()
            .map(|(name, path)| serde_json::json!({ "name": name, "path": path }))
            .collect();
        println!("{}", serde_json::to_string(&items)?);
    } else if collections.is_empty() {
        println!("No collections registered.");
    } else {
        for (name, path) in &collections {
            println!("{name}\t{path}");
        }
    }
    Ok(())
}

fn selected_collections(
    config_db: &ConfigDb,
    only: Option<String>,
) -> error::Result<Vec<(String, String)>> {
    match only {
        Some(name) => {
            let path = config_db.get_collection(&name)?.ok_or_else(|| {
                Error::NotFound {
                    kind: "collection",
                    name: name.clone(),
                }
            })?;
            Ok(vec![(name, path)])
        }
        None => config_db.list_collections(),
    }
}

fn cmd_sync(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model_id: &str,
    only: Option<String>,
    rebuild: bool,
    quiet: bool,
) -> error::Result<()> {
    let collections = selected_collections(config_db, only)?;
    if collections.is_empty() {
        eprintln!("No collections to sync. Add one with `hopnotes collection add`.");
        return Ok(());
    }

    let config = HopnotesConfig::load(config_db)?;
    let store = NoteStore::open(&data_dir.notes_db())?;
    let embedder = LocalEmbedder::new(model_id.to_string());
    let indexer = Indexer::new(
        &store,
        &embedder,
        config.indexing,
        config.provider_timeout,
    );

    // Purge everything up front: vectors of the old width left in another
    // collection would block re-embedding with a new model.
    if rebuild {
        for (name, _) in &collections {
            let dropped = ingestion::purge_collection(&store, name)?;
            eprintln!("Dropped {dropped} notes from '{name}'");
        }
    }

    let rt = runtime()?;
    for (name, path) in &collections {
        let root = Path::new(path);
        if !root.is_dir() {
            tracing::warn!(collection = %name, path = %path, "collection directory is missing");
            continue;
        }

        let report = rt.block_on(ingestion::sync_collection(
            &indexer, name, root, !quiet,
        ))?;
        eprintln!(
            "'{name}': {} scanned, {} changed, {} unchanged, {} removed, {} chunks embedded, {} failed",
            report.scanned,
            report.changed,
            report.unchanged,
            report.removed,
            report.embedded,
            report.failed
        );
    }
    Ok(())
}

fn cmd_search(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model_id: &str,
    args: &cli::SearchArgs,
) -> error::Result<()> {
    let config = HopnotesConfig::load(config_db)?;
    let defaults = config.retrieval.single_hop;
    let params = SearchParams {
        k: args.count.unwrap_or(defaults.k),
        min_score: args.min_score.unwrap_or(defaults.min_score),
        max_per_document: args.per_note.unwrap_or(defaults.max_per_document),
    };

    let store = NoteStore::open(&data_dir.notes_db())?;
    let embedder = LocalEmbedder::new(model_id.to_string());

    let query = runtime()?
        .block_on(embed_validated(
            &embedder,
            std::slice::from_ref(&args.query),
            config.provider_timeout,
        ))?
        .pop()
        .ok_or_else(|| Error::provider("embedding", "no query vector"))?;
    let results = search::search_top_k(&store, &query, &params)?;

    if args.json {
        search::format_json(&results, &args.query)?;
    } else if args.files {
        search::format_files(&results);
    } else {
        search::format_human(&results);
    }
    Ok(())
}

fn cmd_ask(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model_id: &str,
    args: &cli::AskArgs,
) -> error::Result<()> {
    let config = HopnotesConfig::load(config_db)?;
    let store = NoteStore::open(&data_dir.notes_db())?;
    let embedder = LocalEmbedder::new(model_id.to_string());
    let extractor = TermFrequencyExtractor::new(config.retrieval.max_concepts);
    let answerer = ExtractiveAnswerer::default();
    let orchestrator = Orchestrator::new(
        &store,
        &embedder,
        &extractor,
        &answerer,
        config.retrieval,
        config.provider_timeout,
    );

    let rt = runtime()?;
    let answer = if args.single_hop {
        rt.block_on(orchestrator.ask_single_hop(&args.question, &[]))?
    } else {
        rt.block_on(orchestrator.ask(&args.question, &[]))?
    };

    if args.json {
        println!("{}", serde_json::to_string(&answer)?);
        return Ok(());
    }

    println!("{}", answer.answer);
    if !answer.citations.is_empty() {
        println!();
        for (i, c) in answer.citations.iter().enumerate() {
            println!("[{}] {}", i + 1, c.note_id);
            println!("    \"{}\"", c.quote);
        }
    }
    if answer.expanded {
        eprintln!("\nexpanded with: {}", answer.concepts.join(", "));
    }
    Ok(())
}

fn cmd_get(data_dir: &DataDir, args: &cli::GetArgs) -> error::Result<()> {
    let store = NoteStore::open(&data_dir.notes_db())?;
    let chunks = store.get_chunks_by_document(&args.note_id)?;
    let document = store.get_document(&args.note_id)?;

    if chunks.is_empty() && document.is_none() {
        return Err(Error::NotFound {
            kind: "note",
            name: args.note_id.clone(),
        });
    }

    if args.json {
        let value = serde_json::json!({
            "note_id": args.note_id,
            "document": document,
            "chunks": chunks,
        });
        println!("{}", serde_json::to_string(&value)?);
        return Ok(());
    }

    if let Some(doc) = &document {
        println!("# {}", doc.title);
        println!("{} chunks, indexed at {}", chunks.len(), doc.last_indexed_at);
    } else {
        println!("{} (indexing incomplete)", args.note_id);
    }
    for chunk in &chunks {
        println!("\n--- {} [{}]", chunk.chunk_id, chunk.ordinal);
        println!("{}", chunk.text);
    }
    Ok(())
}

fn cmd_notes_list(
    data_dir: &DataDir,
    args: &cli::NotesListArgs,
) -> error::Result<()> {
    let matcher = args
        .pattern
        .as_deref()
        .map(|p| {
            Glob::new(p)
                .map(|g| g.compile_matcher())
                .map_err(|e| Error::InvalidInput(format!("invalid glob pattern: {e}")))
        })
        .transpose()?;

    let store = NoteStore::open(&data_dir.notes_db())?;
    let documents: Vec<_> = store
        .list_documents()?
        .into_iter()
        .filter(|doc| {
            let Some((collection, path)) = split_note_id(&doc.note_id) else {
                return false;
            };
            args.collection.as_deref().is_none_or(|c| c == collection)
                && matcher.as_ref().is_none_or(|m| m.is_match(path))
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string(&documents)?);
    } else if documents.is_empty() {
        println!("No notes found.");
    } else {
        for doc in &documents {
            println!("{}\t{}", doc.note_id, doc.title);
        }
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model_id: &str,
    json: bool,
) -> error::Result<()> {
    let collections = config_db.list_collections()?;
    let stats = NoteStore::open(&data_dir.notes_db())?.stats()?;
    let config = HopnotesConfig::load(config_db)?;

    if json {
        let value = serde_json::json!({
            "data_dir": data_dir.root(),
            "model": model_id,
            "collections": collections.len(),
            "documents": stats.documents,
            "chunks": stats.chunks,
            "vectors": stats.vectors,
            "config": config,
        });
        println!("{}", serde_json::to_string(&value)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Model: {model_id}");
        println!("Collections: {}", collections.len());
        for (name, path) in &collections {
            println!("  {name}: {path}");
        }
        println!("Notes: {}", stats.documents);
        println!("Chunks: {} ({} embedded)", stats.chunks, stats.vectors);
    }
    Ok(())
}

fn cmd_settings(
    config_db: &ConfigDb,
    action: SettingsAction,
) -> error::Result<()> {
    match action {
        SettingsAction::Set { key, value } => {
            // Reject unknown keys and unparsable values before persisting.
            HopnotesConfig::default().apply(&key, &value)?;
            config_db.set_setting(&key, &value)?;
            println!("{key} = {value}");
            if needs_rebuild(&key) {
                eprintln!(
                    "Existing notes keep their old index; run `hopnotes rebuild` to apply {key} to them."
                );
            }
        }
        SettingsAction::Get { key } => match config_db.get_setting(&key)? {
            Some(value) => println!("{value}"),
            None => {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
        },
        SettingsAction::List { all, json } => {
            let stored = config_db.list_settings()?;
            if json {
                let map: serde_json::Map<_, _> = stored
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                println!("{}", serde_json::to_string(&map)?);
            } else if all {
                for (key, description) in SETTING_KEYS {
                    let value = stored
                        .iter()
                        .find(|(k, _)| k == key)
                        .map_or("(default)", |(_, v)| v.as_str());
                    println!("{key:<28} {value:<12} {description}");
                }
            } else if stored.is_empty() {
                println!("No settings stored.");
            } else {
                for (key, value) in &stored {
                    println!("{key} = {value}");
                }
            }
        }
        SettingsAction::Clear { key } => {
            if !config_db.remove_setting(&key)? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
            println!("Cleared {key}");
        }
    }
    Ok(())
}
