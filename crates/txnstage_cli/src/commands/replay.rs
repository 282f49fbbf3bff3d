//! Replay command implementation.
//!
//! Runs a line-oriented session script against an in-memory store and
//! reports what every step did. One command per line; `#` starts a comment.
//!
//! ```text
//! begin                      # request a timestamp and start the transaction
//! prepare                    # request a timestamp only (pending)
//! set <key> <value>          # buffer a write in the current statement
//! delete <key>               # buffer a deletion
//! get <key>                  # read through the overlay
//! scan [<lower> [<upper>]]   # merged forward scan
//! rscan [<upper>]            # merged reverse scan
//! assume <key> exists|absent # key assumption, checked at commit
//! mutate <table> insert|update|delete-id|delete-pk|delete-row <payload>
//! row add|delete <table> <handle>
//! truncate <table>
//! stmt commit|rollback
//! commit | rollback
//! status
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Runtime;
use txnstage_core::{
    CoreError, CoreResult, DirtyTableOp, FaultInjection, Handle, Session, TableId, TxnConfig,
};
use txnstage_kv::{Assumption, Bytes, Key, MemoryStorage, Storage};

/// A script that could not be parsed.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// A line is malformed.
    #[error("line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What is wrong with it.
        message: String,
    },

    /// A `--seed` argument is malformed.
    #[error("invalid seed {0:?}, expected KEY=VALUE")]
    Seed(String),
}

/// Kind of a mutation recorded by a `mutate` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Inserted row.
    Insert,
    /// Updated row.
    Update,
    /// Row deleted by handle.
    DeleteId,
    /// Row deleted by primary key.
    DeletePk,
    /// Deleted row image.
    DeleteRow,
}

/// One script command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Prepare and activate a transaction.
    Begin,
    /// Prepare a transaction without activating it.
    Prepare,
    /// Buffer a write.
    Set(Key, Bytes),
    /// Buffer a deletion.
    Delete(Key),
    /// Point read.
    Get(Key),
    /// Forward scan.
    Scan(Key, Option<Key>),
    /// Reverse scan.
    ReverseScan(Option<Key>),
    /// Key assumption.
    Assume(Key, Assumption),
    /// Record a binlog mutation.
    Mutate(TableId, MutationKind, Bytes),
    /// Stage a dirty-table operation.
    Dirty(DirtyTableOp),
    /// Commit the statement.
    StmtCommit,
    /// Roll back the statement.
    StmtRollback,
    /// Commit the transaction.
    Commit,
    /// Roll back the transaction.
    Rollback,
    /// Report the transaction state.
    Status,
}

/// A parsed script line.
#[derive(Debug, Clone)]
pub struct Step {
    /// 1-based line number.
    pub line: usize,
    /// The line as written, without comment.
    pub text: String,
    /// The command.
    pub command: Command,
}

/// Outcome of one step.
#[derive(Debug, Serialize)]
pub struct StepResult {
    /// 1-based line number.
    pub line: usize,
    /// The line as written.
    pub command: String,
    /// Whether the step succeeded.
    pub ok: bool,
    /// What the step produced, if anything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Error message of a failed step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Replay result.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Script path.
    pub script: String,
    /// Per-step outcomes.
    pub steps: Vec<StepResult>,
    /// Transaction state after the last step.
    pub final_state: String,
    /// Committed store contents after the last step.
    pub committed: BTreeMap<String, String>,
    /// Tables in the binlog payload of the last transaction.
    pub binlog_tables: usize,
    /// Tables in the dirty-row cache of the last transaction.
    pub dirty_tables: usize,
    /// Transactions begun on the store.
    pub begins: u64,
    /// Transactions committed on the store.
    pub commits: u64,
    /// Transactions rolled back on the store.
    pub rollbacks: u64,
}

/// Replay options.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Output format (`text` or `json`).
    pub format: String,
    /// Fail every timestamp resolution.
    pub fail_timestamp: bool,
    /// Fail statement flushes after this many entries.
    pub fail_flush_after: Option<usize>,
    /// `KEY=VALUE` pairs committed before the script runs.
    pub seeds: Vec<String>,
}

/// Runs the replay command.
pub fn run(script: &Path, options: &ReplayOptions) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(script)
        .map_err(|e| format!("Cannot read script {:?}: {}", script, e))?;
    let report = replay(&text, &script.display().to_string(), options)?;

    match options.format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Parses and executes a script, returning the report.
pub fn replay(
    text: &str,
    name: &str,
    options: &ReplayOptions,
) -> Result<ReplayReport, Box<dyn std::error::Error>> {
    let steps = parse_script(text)?;
    let store = MemoryStorage::new();
    store.load(parse_seeds(&options.seeds)?);

    let mut faults = FaultInjection::none().fail_timestamp(options.fail_timestamp);
    if let Some(count) = options.fail_flush_after {
        faults = faults.fail_flush_after(count);
    }
    let mut session = Session::new(1, Arc::new(store.clone()), TxnConfig::new().faults(faults));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let results: Vec<StepResult> = steps
        .iter()
        .map(|step| {
            let outcome = execute(&runtime, &mut session, &step.command);
            tracing::debug!(line = step.line, ok = outcome.is_ok(), "step executed");
            match outcome {
                Ok(output) => StepResult {
                    line: step.line,
                    command: step.text.clone(),
                    ok: true,
                    output,
                    error: None,
                },
                Err(err) => StepResult {
                    line: step.line,
                    command: step.text.clone(),
                    ok: false,
                    output: None,
                    error: Some(err.to_string()),
                },
            }
        })
        .collect();

    // Read the counters before the contents scan adds its own transaction.
    let (begins, commits, rollbacks) = {
        let stats = store.stats();
        (stats.begins(), stats.commits(), stats.rollbacks())
    };

    Ok(ReplayReport {
        script: name.to_string(),
        steps: results,
        final_state: session.txn().diagnostic(),
        committed: committed_contents(&store)?,
        binlog_tables: session.binlog().mutations.len(),
        dirty_tables: session.dirty_db().len(),
        begins,
        commits,
        rollbacks,
    })
}

fn execute(runtime: &Runtime, session: &mut Session, command: &Command) -> CoreResult<Option<String>> {
    match command {
        Command::Begin => {
            let txn = runtime.block_on(session.activate())?;
            Ok(txn.start_ts().map(|ts| ts.to_string()))
        }
        Command::Prepare => {
            session.prepare_txn();
            Ok(None)
        }
        Command::Set(key, value) => {
            session.txn_mut().set(key.clone(), value.clone())?;
            Ok(None)
        }
        Command::Delete(key) => {
            session.txn_mut().delete(key.clone())?;
            Ok(None)
        }
        Command::Get(key) => {
            let value = session.txn().get(key)?;
            Ok(Some(render(&value)))
        }
        Command::Scan(lower, upper) => {
            let rows = session
                .txn()
                .iter(lower, upper.as_ref())?
                .collect::<CoreResult<Vec<_>>>()?;
            Ok(Some(render_rows(&rows)))
        }
        Command::ReverseScan(upper) => {
            let rows = session
                .txn()
                .iter_reverse(upper.as_ref())?
                .collect::<CoreResult<Vec<_>>>()?;
            Ok(Some(render_rows(&rows)))
        }
        Command::Assume(key, assumption) => {
            session.txn_mut().set_key_assumption(key.clone(), *assumption);
            Ok(None)
        }
        Command::Mutate(table, kind, payload) => {
            let mutation = session.stmt_get_mutation(*table);
            match kind {
                MutationKind::Insert => mutation.record_insert(payload.clone()),
                MutationKind::Update => mutation.record_update(payload.clone()),
                MutationKind::DeleteId => {
                    let id = std::str::from_utf8(payload)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| CoreError::invalid_operation("delete-id needs an integer"))?;
                    mutation.record_delete_id(id);
                }
                MutationKind::DeletePk => mutation.record_delete_pk(payload.clone()),
                MutationKind::DeleteRow => mutation.record_delete_row(payload.clone()),
            }
            Ok(None)
        }
        Command::Dirty(op) => {
            session.stmt_add_dirty_table_op(op.clone());
            Ok(None)
        }
        Command::StmtCommit => {
            session.stmt_commit()?;
            Ok(None)
        }
        Command::StmtRollback => {
            session.stmt_rollback();
            Ok(None)
        }
        Command::Commit => {
            if session.txn().has_statement_work() {
                return Err(CoreError::invalid_operation(
                    "statement work is still staged, run `stmt commit` or `stmt rollback` first",
                ));
            }
            session.commit_txn()?;
            Ok(None)
        }
        Command::Rollback => {
            session.rollback_txn()?;
            Ok(None)
        }
        Command::Status => Ok(Some(session.txn().diagnostic())),
    }
}

fn render(value: &Bytes) -> String {
    value.escape_ascii().to_string()
}

fn render_rows(rows: &[(Key, Bytes)]) -> String {
    let rendered: Vec<String> = rows
        .iter()
        .map(|(key, value)| format!("{}={}", key, render(value)))
        .collect();
    format!("[{}]", rendered.join(", "))
}

fn committed_contents(
    store: &MemoryStorage,
) -> Result<BTreeMap<String, String>, Box<dyn std::error::Error>> {
    let mut txn = store.begin()?;
    let contents: BTreeMap<String, String> = txn
        .iter(&Key::default(), None)?
        .map(|row| row.map(|(key, value)| (key.to_string(), render(&value))))
        .collect::<Result<_, _>>()?;
    txn.rollback()?;
    Ok(contents)
}

fn parse_seeds(seeds: &[String]) -> Result<Vec<(Key, Bytes)>, ScriptError> {
    seeds
        .iter()
        .map(|seed| match seed.split_once('=') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok((
                Key::from(key.to_string()),
                Bytes::from(value.to_string()),
            )),
            _ => Err(ScriptError::Seed(seed.clone())),
        })
        .collect()
}

/// Parses a script into steps.
pub fn parse_script(text: &str) -> Result<Vec<Step>, ScriptError> {
    let mut steps = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let text = raw.split('#').next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        let command = parse_line(text).map_err(|message| ScriptError::Parse { line, message })?;
        steps.push(Step {
            line,
            text: text.to_string(),
            command,
        });
    }
    Ok(steps)
}

fn parse_line(text: &str) -> Result<Command, String> {
    let words: Vec<&str> = text.split_whitespace().collect();

    let command = match words.as_slice() {
        ["begin"] => Command::Begin,
        ["prepare"] => Command::Prepare,
        ["set", k, v] => Command::Set(key(k), value(v)),
        ["delete", k] => Command::Delete(key(k)),
        ["get", k] => Command::Get(key(k)),
        ["scan"] => Command::Scan(Key::default(), None),
        ["scan", lower] => Command::Scan(key(lower), None),
        ["scan", lower, upper] => Command::Scan(key(lower), Some(key(upper))),
        ["rscan"] => Command::ReverseScan(None),
        ["rscan", upper] => Command::ReverseScan(Some(key(upper))),
        ["assume", k, "exists"] => Command::Assume(key(k), Assumption::PresumeExists),
        ["assume", k, "absent"] => Command::Assume(key(k), Assumption::PresumeNotExists),
        ["mutate", table, kind, payload] => {
            let kind = match *kind {
                "insert" => MutationKind::Insert,
                "update" => MutationKind::Update,
                "delete-id" => MutationKind::DeleteId,
                "delete-pk" => MutationKind::DeletePk,
                "delete-row" => MutationKind::DeleteRow,
                other => return Err(format!("unknown mutation kind {other:?}")),
            };
            Command::Mutate(parse_table(table)?, kind, value(payload))
        }
        ["row", "add", table, handle] => Command::Dirty(DirtyTableOp::AddRow {
            table: parse_table(table)?,
            handle: parse_handle(handle)?,
            row: Vec::new(),
        }),
        ["row", "delete", table, handle] => Command::Dirty(DirtyTableOp::DeleteRow {
            table: parse_table(table)?,
            handle: parse_handle(handle)?,
        }),
        ["truncate", table] => Command::Dirty(DirtyTableOp::Truncate {
            table: parse_table(table)?,
        }),
        ["stmt", "commit"] => Command::StmtCommit,
        ["stmt", "rollback"] => Command::StmtRollback,
        ["commit"] => Command::Commit,
        ["rollback"] => Command::Rollback,
        ["status"] => Command::Status,
        _ => return Err(format!("unrecognized command {text:?}")),
    };
    Ok(command)
}

fn key(s: &str) -> Key {
    Key::from(s.to_string())
}

fn value(s: &str) -> Bytes {
    Bytes::from(s.to_string())
}

fn parse_table(s: &str) -> Result<TableId, String> {
    s.parse()
        .map(TableId::new)
        .map_err(|_| format!("invalid table id {s:?}"))
}

fn parse_handle(s: &str) -> Result<Handle, String> {
    s.parse()
        .map(Handle::new)
        .map_err(|_| format!("invalid handle {s:?}"))
}

fn print_text_output(report: &ReplayReport) {
    println!("Replay: {}", report.script);
    println!();
    for step in &report.steps {
        let status = if step.ok { "ok " } else { "ERR" };
        match (&step.output, &step.error) {
            (Some(output), _) => println!("{:>4} {} {} -> {}", step.line, status, step.command, output),
            (_, Some(error)) => println!("{:>4} {} {}: {}", step.line, status, step.command, error),
            _ => println!("{:>4} {} {}", step.line, status, step.command),
        }
    }

    println!();
    println!("Final state:   {}", report.final_state);
    println!("Binlog tables: {}", report.binlog_tables);
    println!("Dirty tables:  {}", report.dirty_tables);
    println!(
        "Store:         {} begun, {} committed, {} rolled back",
        report.begins, report.commits, report.rollbacks
    );
    println!();
    println!("Committed data:");
    if report.committed.is_empty() {
        println!("  (empty)");
    }
    for (key, value) in &report.committed {
        println!("  {} = {}", key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn replay_str(script: &str) -> ReplayReport {
        replay(script, "test", &ReplayOptions::default()).unwrap()
    }

    fn outputs(report: &ReplayReport) -> Vec<Option<String>> {
        report.steps.iter().map(|s| s.output.clone()).collect()
    }

    #[test]
    fn parses_comments_and_blank_lines() {
        let steps = parse_script("# header\n\nbegin   # start\nset a 1\n").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].line, 3);
        assert_eq!(steps[0].command, Command::Begin);
        assert_eq!(steps[1].text, "set a 1");
    }

    #[test]
    fn parse_error_names_line() {
        let err = parse_script("begin\nfrobnicate\n").unwrap_err();
        assert!(matches!(err, ScriptError::Parse { line: 2, .. }));
    }

    #[test]
    fn statement_rollback_discards_buffered_write() {
        let report = replay_str(
            "begin\nset x 1\nstmt commit\nset x 2\nget x\nstmt rollback\nget x\ncommit\n",
        );
        let got = outputs(&report);
        assert_eq!(got[4], Some("2".to_string()));
        assert_eq!(got[6], Some("1".to_string()));
        assert_eq!(report.committed.get("x"), Some(&"1".to_string()));
        assert_eq!(report.final_state, "Txn{state=invalid}");
    }

    #[test]
    fn flush_fault_rolls_back_the_transaction() {
        let options = ReplayOptions {
            fail_flush_after: Some(0),
            ..ReplayOptions::default()
        };
        let report = replay(
            "begin\nset x 1\nstmt commit\ncommit\n",
            "faulty",
            &options,
        )
        .unwrap();

        assert!(!report.steps[2].ok);
        assert!(!report.steps[3].ok);
        assert!(report.committed.is_empty());
        assert_eq!(report.commits, 0);
        assert_eq!(report.rollbacks, 1);
    }

    #[test]
    fn commit_with_staged_statement_is_rejected() {
        let report = replay_str("begin\nset a 1\ncommit\nstatus\nstmt commit\ncommit\n");

        assert!(!report.steps[2].ok);
        assert!(report.steps[2]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("stmt commit")));
        assert!(report.steps[3]
            .output
            .as_deref()
            .is_some_and(|s| s.starts_with("Txn{state=valid")));
        assert!(report.steps[5].ok);
        assert_eq!(report.committed.get("a"), Some(&"1".to_string()));
        assert_eq!(report.commits, 1);
    }

    #[test]
    fn timestamp_fault_fails_begin() {
        let options = ReplayOptions {
            fail_timestamp: true,
            ..ReplayOptions::default()
        };
        let report = replay("prepare\nstatus\nbegin\nstatus\n", "ts", &options).unwrap();
        assert_eq!(report.steps[1].output.as_deref(), Some("Txn{state=pending}"));
        assert!(!report.steps[2].ok);
        assert_eq!(report.steps[3].output.as_deref(), Some("Txn{state=invalid}"));
    }

    #[test]
    fn seeds_and_scans() {
        let options = ReplayOptions {
            seeds: vec!["a=1".into(), "c=3".into()],
            ..ReplayOptions::default()
        };
        let report = replay(
            "begin\nset b 2\ndelete c\nscan\nrscan\nrollback\n",
            "scan",
            &options,
        )
        .unwrap();
        assert_eq!(report.steps[3].output.as_deref(), Some("[a=1, b=2]"));
        assert_eq!(report.steps[4].output.as_deref(), Some("[b=2, a=1]"));
        assert_eq!(report.committed.len(), 2);
    }

    #[test]
    fn binlog_and_dirty_ops_follow_statements() {
        let report = replay_str(
            "begin\nmutate 1 insert r1\nrow add 1 10\nstmt commit\nmutate 2 delete-id 5\nstmt rollback\ncommit\n",
        );
        assert!(report.steps.iter().all(|s| s.ok));
        assert_eq!(report.binlog_tables, 1);
        assert_eq!(report.dirty_tables, 1);
    }

    #[test]
    fn bad_seed_is_rejected() {
        let options = ReplayOptions {
            seeds: vec!["novalue".into()],
            ..ReplayOptions::default()
        };
        assert!(replay("begin\n", "seed", &options).is_err());
    }

    #[test]
    fn run_reads_script_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "begin\nset k v\nstmt commit\ncommit").unwrap();

        let options = ReplayOptions {
            format: "json".into(),
            ..ReplayOptions::default()
        };
        run(file.path(), &options).unwrap();
    }
}
