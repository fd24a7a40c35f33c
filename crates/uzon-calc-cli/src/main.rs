use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde_json::{Map, Value as Json};
use tokio::{runtime::Runtime, task::JoinSet};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use uzon_calc::{Executor, Request, RunError, RunOptions, doc};

mod config_file;

/// Turns calculation scripts into hand-calculation sheets
#[derive(Parser, Debug)]
#[command(version, about = "Turns calculation scripts into hand-calculation sheets", long_about = None)]
struct Args {
    /// Reads settings from a TOML file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs a script without stopping at UI windows and saves the sheet
    Run {
        /// The calculation script
        #[arg(value_name = "FILE")]
        script: PathBuf,

        /// JSON file with UI values, shaped `{"window title": {"field": value}}`
        #[arg(short, long, value_name = "FILE")]
        defaults: Option<PathBuf>,

        /// Where to save the sheet; "-" prints the sheet body instead
        #[arg(short, long, value_name = "FILE")]
        output: Option<String>,
    },
    /// Answers JSON requests from stdin, one per line, with one JSON line each on stdout
    Serve,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("UZONCALC_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();
    let config = match args.config {
        Some(ref path) => match config_file::load_config_file(path) {
            Ok(config) => config.uzon_calc,
            Err(e) => {
                eprintln!("Error loading config file {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => uzon_calc::Config::default(),
    };

    match args.command {
        Command::Run {
            script,
            defaults,
            output,
        } => run(&script, defaults.as_deref(), output.as_deref(), &config),
        Command::Serve => serve(config),
    }
}

fn run(script: &Path, defaults: Option<&Path>, output: Option<&str>, config: &uzon_calc::Config) {
    let options = RunOptions {
        defaults: defaults.map(read_defaults).unwrap_or_default(),
        is_silent: true,
        ..RunOptions::default()
    };
    let ctx = uzon_calc::run_script(script, config, options)
        .unwrap_or_else(|e| exit_run_error(e, script));
    match output {
        Some("-") => println!("{}", ctx.html_content()),
        filename => match doc::save(&ctx, filename) {
            Ok(path) => println!("{}", path.display()),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
    }
}

fn read_defaults(path: &Path) -> Map<String, Json> {
    let content = fs::read_to_string(path).unwrap_or_else(|e| exit_io_error(e));
    serde_json::from_str(&content).unwrap_or_else(|e| {
        eprintln!("Invalid defaults in {}: {}", path.display(), e);
        process::exit(1);
    })
}

/// Serves the executor protocol over stdin and stdout.
///
/// Every input line is one [`Request`] and produces exactly one output line: the
/// serialized response, or `{"error": message}` if the request failed. Requests run
/// concurrently, so replies may come out of order; an `"id"` member of a request is
/// copied into its reply.
fn serve(config: uzon_calc::Config) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .unwrap_or_else(|e| exit_io_error(e));
    let executor = Executor::new(config);
    info!("serving requests on stdin");
    let stdout = Arc::new(Mutex::new(io::stdout()));
    serve_lines(&runtime, &executor, io::stdin().lock(), &stdout)
        .unwrap_or_else(|e| exit_io_error(e));
}

fn serve_lines<W>(
    runtime: &Runtime,
    executor: &Executor,
    input: impl BufRead,
    output: &Arc<Mutex<W>>,
) -> io::Result<()>
where
    W: Write + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let executor = executor.clone();
        let output = Arc::clone(output);
        tasks.spawn_on(
            async move {
                let reply = answer(&executor, &line).await;
                let mut output = output.lock();
                writeln!(output, "{reply}").and_then(|()| output.flush())
            },
            runtime.handle(),
        );
        while let Some(done) = tasks.try_join_next() {
            done.map_err(io::Error::other)??;
        }
    }
    runtime.block_on(async {
        while let Some(done) = tasks.join_next().await {
            done.map_err(io::Error::other)??;
        }
        Ok::<_, io::Error>(())
    })
}

/// The reply to one request line.
async fn answer(executor: &Executor, line: &str) -> Json {
    let message: Json = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => return error_reply(&format!("invalid request: {e}")),
    };
    let id = message.get("id").cloned();
    let reply = match serde_json::from_value::<Request>(message) {
        Ok(request) => {
            debug!(?request, "request");
            match executor.handle(request).await {
                Ok(response) => serde_json::to_value(response)
                    .unwrap_or_else(|e| error_reply(&e.to_string())),
                Err(e) => error_reply(&e.to_string()),
            }
        }
        Err(e) => error_reply(&format!("invalid request: {e}")),
    };
    match (id, reply) {
        (Some(id), Json::Object(mut fields)) => {
            fields.insert("id".to_string(), id);
            Json::Object(fields)
        }
        (_, reply) => reply,
    }
}

fn error_reply(message: &str) -> Json {
    serde_json::json!({ "error": message })
}

fn exit_run_error(e: RunError, script: &Path) -> ! {
    if let RunError::Parse { ref source, .. } = e
        && let Ok(text) = fs::read_to_string(script)
    {
        let name = script.display().to_string();
        let report = source.to_report(&name, true);
        if report
            .eprint((name.as_str(), ariadne::Source::from(text.as_str())))
            .is_ok()
        {
            process::exit(2);
        }
    }
    eprintln!("Error: {}", e);
    process::exit(2);
}

fn exit_io_error(e: io::Error) -> ! {
    eprintln!("IO error: {}", e);
    process::exit(1);
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    fn replies(output: &Arc<Mutex<Vec<u8>>>) -> Vec<Json> {
        let output = output.lock();
        std::str::from_utf8(&output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn replies_carry_request_ids() {
        let runtime = Runtime::new().unwrap();
        let executor = Executor::new(uzon_calc::Config::default());
        let input = "{\"type\": \"terminate\", \"executionId\": \"nope\", \"id\": 7}\n\nnot json\n";
        let output = Arc::new(Mutex::new(Vec::new()));
        serve_lines(&runtime, &executor, Cursor::new(input), &output).unwrap();

        let mut replies = replies(&output);
        replies.sort_by_key(|reply| reply.get("id").is_none());
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], json!({"terminated": false, "id": 7}));
        assert!(replies[1]["error"].as_str().unwrap().starts_with("invalid request"));
    }

    #[test]
    fn slow_requests_do_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("endless.py");
        fs::write(
            &script,
            "from uzoncalc import *\n\n@uzon_calc()\nasync def sheet(ctx):\n    while True:\n        pass\n",
        )
        .unwrap();
        let runtime = Runtime::new().unwrap();
        let executor = Executor::new(uzon_calc::Config {
            execution_timeout_secs: 1,
            ..uzon_calc::Config::default()
        });
        let execute = json!({"type": "execute", "scriptPath": script, "isSilent": true, "id": 1});
        let invalidate = json!({"type": "invalidate", "scriptPath": script, "id": 2});
        let input = format!("{execute}\n{invalidate}\n");
        let output = Arc::new(Mutex::new(Vec::new()));
        serve_lines(&runtime, &executor, Cursor::new(input), &output).unwrap();

        let replies = replies(&output);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], json!(2));
        assert_eq!(replies[1]["id"], json!(1));
        assert!(replies[1]["error"].as_str().unwrap().contains("timed out"));
    }
}
