use std::io::{self, Read, Write};

use anyhow::{bail, Context};
use assoc_db::{QueryResult, SqlValue};
use assoc_env::{CheckReport, Environment, RecoveryReport, StoreConfig};
use clap::CommandFactory;
use colored::Colorize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cli::*;

/// What an action prints once its session has committed.
enum Output {
    Empty,
    Bytes(Vec<u8>),
    Report { text: String, json: Value },
}

impl Output {
    fn report(text: impl Into<String>, json: Value) -> Self {
        Output::Report {
            text: text.into(),
            json,
        }
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    execute(&cli, &mut stdin.lock(), &mut stdout.lock())
}

pub fn execute(cli: &Cli, input: &mut dyn Read, out: &mut dyn Write) -> anyhow::Result<()> {
    if let Command::ListActions = cli.command {
        return emit(out, cli.format, cmd_list_actions());
    }

    let config = store_config(cli)?;
    let level = cli
        .isolation
        .clone()
        .unwrap_or_else(|| config.default_isolation.clone());
    let mut env = Environment::open(&config)
        .with_context(|| format!("opening store at {}", config.root.display()))?;

    let output = match &cli.command {
        Command::Create => in_session(&mut env, &level, cmd_create)?,
        Command::Store(args) => in_session(&mut env, &level, |env| cmd_store(env, args, input))?,
        Command::Cat(args) => in_session(&mut env, &level, |env| cmd_cat(env, args))?,
        Command::Ls(args) => in_session(&mut env, &level, |env| cmd_ls(env, args))?,
        Command::Rm(args) => in_session(&mut env, &level, |env| cmd_rm(env, args))?,
        Command::Metadata(args) => {
            in_session(&mut env, &level, |env| cmd_metadata(env, &args.action))?
        }
        Command::MetaPrefix(args) => cmd_meta_prefix(&env, args)?,
        Command::MetaType(args) => cmd_meta_type(&env, args)?,
        Command::QueryDb(args) => cmd_query_db(&env, &args.sql)?,
        Command::Recover => recovery_output(&env.recover()?)?,
        Command::Check => {
            let report = env.check()?;
            emit(out, cli.format, check_output(&report)?)?;
            if !report.is_clean() {
                bail!("store at {} is not consistent", config.root.display());
            }
            Output::Empty
        }
        Command::ListActions => cmd_list_actions(),
    };
    emit(out, cli.format, output)
}

/// The configuration file, if any, with command-line flags applied on top.
fn store_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(ds) = &cli.data_source {
        config.data_source = Some(ds.clone());
    }
    if cli.clear_locks {
        config.clear_locks = true;
    }
    Ok(config)
}

/// Run `action` in a fresh session and commit it under `level`.
///
/// The session is rolled back if the action fails or the commit is refused.
fn in_session<F>(env: &mut Environment, level: &str, action: F) -> anyhow::Result<Output>
where
    F: FnOnce(&mut Environment) -> anyhow::Result<Output>,
{
    let session = env.start_session()?;
    let result = action(env).and_then(|output| {
        env.commit_session(level)?;
        Ok(output)
    });
    if result.is_err() && env.session().is_some() {
        if let Err(e) = env.rollback_session() {
            warn!(%session, error = %e, "rollback after failed action");
        }
    }
    result
}

fn emit(out: &mut dyn Write, format: OutputFormat, output: Output) -> anyhow::Result<()> {
    match output {
        Output::Empty => {}
        Output::Bytes(bytes) => out.write_all(&bytes)?,
        Output::Report { text, json } => match format {
            OutputFormat::Text => writeln!(out, "{text}")?,
            OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?,
        },
    }
    out.flush()?;
    Ok(())
}

fn cmd_create(env: &mut Environment) -> anyhow::Result<Output> {
    let file = env.create_file()?;
    let uuid = env.file_uuid(file)?.to_string();
    Ok(Output::report(
        format!("{} Created file {}", "✓".green().bold(), uuid.yellow()),
        json!({ "uuid": uuid }),
    ))
}

fn cmd_store(env: &mut Environment, args: &StoreArgs, input: &mut dyn Read) -> anyhow::Result<Output> {
    let mut content = Vec::new();
    input.read_to_end(&mut content).context("reading standard input")?;

    let file = env.get_file(&args.blob.uuid)?;
    let blob = if env.has_blob(file, &args.blob.blob_name)? {
        env.get_blob(file, &args.blob.blob_name)?
    } else {
        env.add_blob(file, &args.blob.blob_name, &args.content_type)?
    };
    env.write_blob(blob, &content)?;
    debug!(uuid = %args.blob.uuid, blob = %args.blob.blob_name, bytes = content.len(), "stored");

    Ok(Output::report(
        format!(
            "{} Stored {} bytes in {}:{}",
            "✓".green().bold(),
            content.len(),
            args.blob.uuid.yellow(),
            args.blob.blob_name.cyan()
        ),
        json!({
            "uuid": args.blob.uuid,
            "blob_name": args.blob.blob_name,
            "bytes": content.len(),
        }),
    ))
}

fn cmd_cat(env: &mut Environment, args: &BlobArgs) -> anyhow::Result<Output> {
    let file = env.get_file(&args.uuid)?;
    let blob = env.get_blob(file, &args.blob_name)?;
    Ok(Output::Bytes(env.read_blob(blob)?))
}

fn cmd_ls(env: &mut Environment, args: &FileArgs) -> anyhow::Result<Output> {
    let file = env.get_file(&args.uuid)?;
    let names = env.blob_names(file)?;
    Ok(Output::report(
        names.join("\n"),
        json!({ "uuid": args.uuid, "blobs": names }),
    ))
}

fn cmd_rm(env: &mut Environment, args: &RmArgs) -> anyhow::Result<Output> {
    let file = env.get_file(&args.uuid)?;
    if args.blob_name.is_empty() {
        env.remove_file(file)?;
        return Ok(Output::report(
            format!("{} Removed file {}", "✓".green().bold(), args.uuid.yellow()),
            json!({ "uuid": args.uuid, "removed": "file" }),
        ));
    }
    for name in &args.blob_name {
        let blob = env.get_blob(file, name)?;
        env.remove_blob(blob)?;
    }
    Ok(Output::report(
        format!(
            "{} Removed {} from {}",
            "✓".green().bold(),
            args.blob_name.join(", ").cyan(),
            args.uuid.yellow()
        ),
        json!({ "uuid": args.uuid, "removed": args.blob_name }),
    ))
}

fn cmd_metadata(env: &mut Environment, action: &MetadataAction) -> anyhow::Result<Output> {
    match action {
        MetadataAction::List { blob, uris } => {
            let file = env.get_file(&blob.uuid)?;
            let subject = env.get_blob(file, &blob.blob_name)?;
            let triples = env.triples(subject)?;
            let text = triples
                .iter()
                .map(|t| {
                    let shown = if *uris { t.display_verbose() } else { t.display_simple() };
                    format!("{} {}", format!("[{}]", t.id).dimmed(), shown)
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(Output::report(text, serde_json::to_value(&triples)?))
        }
        MetadataAction::Add(args) => {
            let file = env.get_file(&args.blob.uuid)?;
            let subject = env.get_blob(file, &args.blob.blob_name)?;
            let prefix = env.prefix(&args.predicate_prefix, None)?;
            let triple = match (&args.object_uuid, &args.object_blob_name, &args.object) {
                (Some(uuid), Some(name), None) => {
                    let object_file = env.get_file(uuid)?;
                    let object = env.get_blob(object_file, name)?;
                    env.add_blob_triple(subject, &prefix, &args.predicate, object)?
                }
                (None, None, Some(literal)) => {
                    let (Some(type_prefix), Some(type_name)) = (&args.object_prefix, &args.object_type)
                    else {
                        bail!("a literal object needs --object-prefix and --object-type");
                    };
                    let type_prefix = env.prefix(type_prefix, None)?;
                    let object_type = env.object_type(type_name, &type_prefix)?;
                    env.add_triple(subject, &prefix, &args.predicate, &object_type, literal)?
                }
                _ => bail!("give either --object or --object-uuid with --object-blob-name"),
            };
            Ok(Output::report(
                format!("{} Added [{}] {}", "✓".green().bold(), triple.id, triple),
                serde_json::to_value(&triple)?,
            ))
        }
        MetadataAction::Remove { blob, id } => {
            let file = env.get_file(&blob.uuid)?;
            let subject = env.get_blob(file, &blob.blob_name)?;
            env.remove_triple(subject, *id)?;
            Ok(Output::report(
                format!("{} Removed triple [{}]", "✓".green().bold(), id),
                json!({ "removed": id }),
            ))
        }
    }
}

fn cmd_meta_prefix(env: &Environment, args: &MetaPrefixArgs) -> anyhow::Result<Output> {
    let prefix = env.prefix(&args.name, args.uri.as_deref())?;
    Ok(Output::report(
        format!("{} <{}>", prefix.name.bold(), prefix.uri),
        serde_json::to_value(&prefix)?,
    ))
}

fn cmd_meta_type(env: &Environment, args: &MetaTypeArgs) -> anyhow::Result<Output> {
    let prefix = env.prefix(&args.prefix, None)?;
    let object_type = env.object_type(&args.name, &prefix)?;
    Ok(Output::report(
        format!(
            "{}:{} <{}{}>",
            prefix.name.bold(),
            object_type.name,
            prefix.uri,
            object_type.name
        ),
        serde_json::to_value(&object_type)?,
    ))
}

fn cmd_query_db(env: &Environment, sql: &str) -> anyhow::Result<Output> {
    let result = env.query(sql)?;
    Ok(Output::report(query_text(&result), query_json(&result)))
}

fn query_text(result: &QueryResult) -> String {
    let mut lines = vec![result.columns.join("\t").bold().to_string()];
    for row in result {
        let cells: Vec<String> = row.values().iter().map(ToString::to_string).collect();
        lines.push(cells.join("\t"));
    }
    lines.join("\n")
}

fn query_json(result: &QueryResult) -> Value {
    let rows = result
        .iter()
        .map(|row| {
            let object = result
                .columns
                .iter()
                .zip(row.values())
                .map(|(column, value)| {
                    let value = match value {
                        SqlValue::Null => Value::Null,
                        SqlValue::Integer(v) => json!(v),
                        SqlValue::Real(v) => json!(v),
                        SqlValue::Text(v) => json!(v),
                    };
                    (column.clone(), value)
                })
                .collect::<serde_json::Map<_, _>>();
            Value::Object(object)
        })
        .collect();
    Value::Array(rows)
}

fn join_ids<T: ToString>(ids: &[T]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn recovery_output(report: &RecoveryReport) -> anyhow::Result<Output> {
    let text = if report.is_empty() {
        format!("{} Nothing to recover.", "✓".green().bold())
    } else {
        format!(
            "{} Recovery complete\n  rolled forward: {}\n  rolled back: {}\n  still live: {}\n  orphan handles: {}\n  discarded files: {}",
            "✓".green().bold(),
            join_ids(&report.rolled_forward),
            join_ids(&report.rolled_back),
            join_ids(&report.skipped_live),
            report.orphan_handles,
            report.discarded_files
        )
    };
    Ok(Output::report(text, serde_json::to_value(report)?))
}

fn check_output(report: &CheckReport) -> anyhow::Result<Output> {
    let mut lines = vec![if report.is_clean() {
        format!("{} No issues.", "✓".green().bold())
    } else {
        format!("{} Inconsistencies found.", "✗".red().bold())
    }];
    let sections = [
        ("orphan content", &report.orphan_content),
        ("missing content", &report.missing_content),
        ("stray temp files", &report.stray_temps),
    ];
    for (label, entries) in sections {
        for entry in entries {
            lines.push(format!("  {} {}", format!("{label}:").yellow(), entry));
        }
    }
    Ok(Output::report(lines.join("\n"), serde_json::to_value(report)?))
}

fn cmd_list_actions() -> Output {
    let command = Cli::command();
    let actions: Vec<(String, String)> = command
        .get_subcommands()
        .map(|sub| {
            let about = sub.get_about().map(ToString::to_string).unwrap_or_default();
            (sub.get_name().to_string(), about)
        })
        .collect();
    let text = actions
        .iter()
        .map(|(name, about)| format!("  {:<14} {}", name.bold(), about))
        .collect::<Vec<_>>()
        .join("\n");
    let json = actions
        .iter()
        .map(|(name, about)| json!({ "name": name, "about": about }))
        .collect();
    Output::report(text, Value::Array(json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;

    fn run(root: &Path, args: &[&str], stdin: &[u8]) -> anyhow::Result<Vec<u8>> {
        colored::control::set_override(false);
        let mut argv = vec!["assoc", "--root", root.to_str().unwrap()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        let mut input = stdin;
        let mut out = Vec::new();
        execute(&cli, &mut input, &mut out)?;
        Ok(out)
    }

    fn run_json(root: &Path, args: &[&str]) -> Value {
        let mut argv = vec!["--format", "json"];
        argv.extend_from_slice(args);
        let out = run(root, &argv, b"").unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    fn create(root: &Path) -> String {
        run_json(root, &["create"])["uuid"].as_str().unwrap().to_string()
    }

    #[test]
    fn store_then_cat_and_ls() {
        let dir = tempfile::tempdir().unwrap();
        let uuid = create(dir.path());

        let out = run(
            dir.path(),
            &["store", "--uuid", &uuid, "--blob-name", "default"],
            b"hello world",
        )
        .unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Stored 11 bytes"));

        let out = run(dir.path(), &["cat", "--uuid", &uuid, "--blob-name", "default"], b"").unwrap();
        assert_eq!(out, b"hello world");

        run(
            dir.path(),
            &["store", "--uuid", &uuid, "--blob-name", "notes", "--content-type", "text/markdown"],
            b"# notes",
        )
        .unwrap();
        let listing = run_json(dir.path(), &["ls", "--uuid", &uuid]);
        assert_eq!(listing["blobs"], json!(["default", "notes"]));
    }

    #[test]
    fn store_overwrites_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let uuid = create(dir.path());
        let blob = ["--uuid", uuid.as_str(), "--blob-name", "default"];

        run(dir.path(), &[&["store"][..], &blob[..]].concat(), b"first").unwrap();
        run(dir.path(), &[&["store"][..], &blob[..]].concat(), b"second").unwrap();
        let out = run(dir.path(), &[&["cat"][..], &blob[..]].concat(), b"").unwrap();
        assert_eq!(out, b"second");
    }

    #[test]
    fn metadata_add_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let uuid = create(root);
        run(root, &["store", "--uuid", &uuid, "--blob-name", "default"], b"x").unwrap();
        run(root, &["meta-prefix", "--name", "dc", "--uri", "http://purl.org/dc/terms/"], b"")
            .unwrap();
        run(root, &["meta-type", "--prefix", "dc", "--name", "string"], b"").unwrap();

        let added = run_json(
            root,
            &[
                "metadata", "add", "--uuid", &uuid, "--blob-name", "default",
                "--predicate-prefix", "dc", "--predicate", "title",
                "--object-prefix", "dc", "--object-type", "string", "--object", "Report",
            ],
        );
        let id = added["id"].as_u64().unwrap();

        let text = run(root, &["metadata", "list", "--uuid", &uuid, "--blob-name", "default"], b"")
            .unwrap();
        assert_eq!(
            String::from_utf8(text).unwrap().trim(),
            format!("[{id}] ({uuid}:default,dc:title,Report)")
        );
        let verbose = run(
            root,
            &["metadata", "list", "--uuid", &uuid, "--blob-name", "default", "--uris"],
            b"",
        )
        .unwrap();
        assert!(String::from_utf8(verbose)
            .unwrap()
            .contains("<http://purl.org/dc/terms/title>"));

        run(
            root,
            &["metadata", "remove", "--uuid", &uuid, "--blob-name", "default", "--id", &id.to_string()],
            b"",
        )
        .unwrap();
        let listed = run_json(root, &["metadata", "list", "--uuid", &uuid, "--blob-name", "default"]);
        assert_eq!(listed, json!([]));
    }

    #[test]
    fn blob_triples_reference_other_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let uuid = create(root);
        run(root, &["store", "--uuid", &uuid, "--blob-name", "default"], b"x").unwrap();
        run(root, &["store", "--uuid", &uuid, "--blob-name", "notes"], b"y").unwrap();
        run(root, &["meta-prefix", "--name", "dc", "--uri", "http://purl.org/dc/terms/"], b"")
            .unwrap();

        let added = run_json(
            root,
            &[
                "metadata", "add", "--uuid", &uuid, "--blob-name", "notes",
                "--predicate-prefix", "dc", "--predicate", "references",
                "--object-uuid", &uuid, "--object-blob-name", "default",
            ],
        );
        assert_eq!(added["object_type"]["name"], "blob");
    }

    #[test]
    fn unknown_prefix_fails_and_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let uuid = create(root);
        run(root, &["store", "--uuid", &uuid, "--blob-name", "default"], b"x").unwrap();

        let err = run(
            root,
            &[
                "metadata", "add", "--uuid", &uuid, "--blob-name", "default",
                "--predicate-prefix", "nope", "--predicate", "title",
                "--object-prefix", "nope", "--object-type", "string", "--object", "x",
            ],
            b"",
        )
        .unwrap_err();
        assert!(err.to_string().contains("prefix nope not found"));

        let sessions = run_json(root, &["query-db", "select count(*) as n from session"]);
        assert_eq!(sessions, json!([{ "n": 0 }]));
    }

    #[test]
    fn rm_removes_blobs_or_whole_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let uuid = create(root);
        for name in ["a", "b"] {
            run(root, &["store", "--uuid", &uuid, "--blob-name", name], b"x").unwrap();
        }

        run(root, &["rm", "--uuid", &uuid, "--blob-name", "a"], b"").unwrap();
        let listing = run_json(root, &["ls", "--uuid", &uuid]);
        assert_eq!(listing["blobs"], json!(["b"]));

        run(root, &["rm", "--uuid", &uuid], b"").unwrap();
        assert!(run(root, &["ls", "--uuid", &uuid], b"").is_err());
    }

    #[test]
    fn query_db_renders_rows() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let uuid = create(root);

        let rows = run_json(root, &["query-db", "select uuid, visible from file"]);
        assert_eq!(rows, json!([{ "uuid": uuid, "visible": 1 }]));

        let text = run(root, &["query-db", "select uuid from file"], b"").unwrap();
        assert_eq!(String::from_utf8(text).unwrap(), format!("uuid\n{uuid}\n"));
    }

    #[test]
    fn check_and_recover_on_a_clean_store() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        create(root);

        let report = run_json(root, &["check"]);
        assert_eq!(report["orphan_content"], json!([]));
        let out = run(root, &["recover"], b"").unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Nothing to recover"));

        std::fs::write(root.join("temp").join("junk"), b"?").unwrap();
        let err = run(root, &["check"], b"").unwrap_err();
        assert!(err.to_string().contains("not consistent"));
    }

    #[test]
    fn refused_isolation_level_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path(), &["--isolation", "serializable", "create"], b"").unwrap_err();
        assert!(format!("{err:#}").contains("serializable"));
        let files = run_json(dir.path(), &["query-db", "select count(*) as n from file"]);
        assert_eq!(files, json!([{ "n": 0 }]));
    }

    #[test]
    fn list_actions_names_every_subcommand() {
        let dir = tempfile::tempdir().unwrap();
        let actions = run_json(dir.path(), &["list-actions"]);
        let names: Vec<&str> = actions
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["name"].as_str().unwrap())
            .collect();
        for expected in ["create", "store", "cat", "ls", "rm", "metadata", "query-db", "check"] {
            assert!(names.contains(&expected), "{expected}");
        }
    }

    #[test]
    fn log_level_follows_verbosity() {
        let cli = Cli::try_parse_from(["assoc", "-vv", "check"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::DEBUG);
        let cli = Cli::try_parse_from(["assoc", "check"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::WARN);
    }
}
