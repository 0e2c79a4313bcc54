#[macro_use]
extern crate clap;

use std::sync::Arc;

use anyhow::Context;
use anyhow::bail;
use clap::App;
use clap::Arg;
use clap::ArgMatches;
use tracing_subscriber::EnvFilter;

use evalrun::DecodeMode;
use evalrun::EvalConfig;
use evalrun::ExportAbi;
use evalrun::Runtime;
use evalrun::StubTable;
use evalrun::source::FileSource;

/// One script to evaluate, in command-line order.
#[derive(Debug, PartialEq)]
enum Script {
    Inline(String),
    File(String),
}

struct Config {
    module: String,
    scripts: Vec<Script>,
    eval: EvalConfig,
}

impl Config {
    fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let module = matches
            .value_of("module")
            .context("missing module path")?
            .to_string();

        let abi = match matches.value_of("abi").unwrap_or("rust") {
            "rust" => ExportAbi::rust_guest(),
            "c" => ExportAbi::c_guest(),
            other => bail!("unknown guest ABI '{}'", other),
        };

        let mut eval = EvalConfig::default().abi(abi);
        if let Some(name) = matches.value_of("memory-export") {
            eval = eval.memory_export(name);
        }
        if let Some(max) = matches.value_of("max-result") {
            let max = max
                .parse::<usize>()
                .with_context(|| format!("invalid --max-result '{}'", max))?;
            eval = eval.max_result_len(max);
        }
        if matches.is_present("lossy") {
            eval = eval.decode(DecodeMode::Lossy);
        }

        Ok(Self {
            module,
            scripts: ordered_scripts(matches),
            eval,
        })
    }
}

/// Interleaves `-e` and `-f` occurrences in the order they were given.
fn ordered_scripts(matches: &ArgMatches) -> Vec<Script> {
    let collect = |name: &str, wrap: fn(String) -> Script| -> Vec<(usize, Script)> {
        match (matches.indices_of(name), matches.values_of(name)) {
            (Some(indices), Some(values)) => indices
                .zip(values)
                .map(|(i, v)| (i, wrap(v.to_string())))
                .collect(),
            _ => Vec::new(),
        }
    };

    let mut scripts = collect("eval", Script::Inline);
    scripts.extend(collect("file", Script::File));
    scripts.sort_by_key(|(i, _)| *i);
    scripts.into_iter().map(|(_, s)| s).collect()
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn app() -> App<'static, 'static> {
    app_from_crate!()
        .arg(
            Arg::with_name("module")
                .required(true)
                .help("Path to the guest interpreter module (.wasm)"),
        )
        .arg(
            Arg::with_name("eval")
                .short("e")
                .long("eval")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Script source to evaluate"),
        )
        .arg(
            Arg::with_name("file")
                .short("f")
                .long("file")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("File containing a script to evaluate"),
        )
        .arg(
            Arg::with_name("abi")
                .long("abi")
                .takes_value(true)
                .possible_values(&["rust", "c"])
                .default_value("rust")
                .help("Export convention of the guest"),
        )
        .arg(
            Arg::with_name("memory-export")
                .long("memory-export")
                .takes_value(true)
                .help("Name of the guest's exported linear memory"),
        )
        .arg(
            Arg::with_name("max-result")
                .long("max-result")
                .takes_value(true)
                .help("Longest accepted result string, in bytes, excluding the terminator"),
        )
        .arg(
            Arg::with_name("lossy")
                .long("lossy")
                .help("Replace invalid UTF-8 in results instead of failing"),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = app().get_matches();

    init_logging();
    let config = Config::from_matches(&matches)?;
    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let runtime = Arc::new(Runtime::new()?);
    let module = runtime
        .register_source(&FileSource::new(&config.module))
        .await
        .with_context(|| format!("failed to load {}", config.module))?;

    let guest = runtime
        .instantiate(module)?
        .stubs(StubTable::wasi_preview1())
        .config(config.eval)
        .build()
        .await
        .with_context(|| format!("failed to instantiate {}", config.module))?;
    tracing::info!(instance = %guest.id(), scripts = config.scripts.len(), "guest ready");

    for script in config.scripts {
        let source = match script {
            Script::Inline(source) => source,
            Script::File(path) => tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read script {}", path))?,
        };
        let result = guest.evaluate(&source).await?;
        println!("{}", result);
    }

    Ok(())
}
