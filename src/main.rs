//! evhost - Event-driven I/O host
//!
//! Command line front end that drives the host functions through the
//! built-in native engine.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use evhost::{HostCategory, HostConfig, HostObject, HostRegistry, NativeEngine, Runtime, Value};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Parser)]
#[command(name = "evhost")]
#[command(version)]
#[command(about = "Event-driven I/O host for script engines", long_about = None)]
struct Cli {
    /// Configuration file (default: search for evhost.toml upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a file through fs.readFile
    Cat {
        /// File to read
        path: PathBuf,
    },

    /// Perform an HTTP request and print the response as JSON
    Fetch {
        /// Request URL (http only)
        url: String,

        /// Request method: get, post, put or delete
        #[arg(short, long)]
        method: Option<String>,

        /// Request body; without --method this makes the request a POST
        #[arg(short, long)]
        data: Option<String>,
    },

    /// List the host functions available to scripts
    Functions,

    /// Run an HTTP server answering every request with a fixed body
    Serve {
        /// Port to listen on (0 picks a free port)
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Response body (default: http.response_body from the config)
        #[arg(short, long)]
        body: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging.level);

    let code = match cli.command {
        Commands::Cat { path } => cmd_cat(config, &path)?,
        Commands::Fetch { url, method, data } => cmd_fetch(config, &url, method.as_deref(), data)?,
        Commands::Functions => cmd_functions(),
        Commands::Serve { port, body } => cmd_serve(config, port, body)?,
    };
    std::process::exit(code);
}

fn load_config(path: Option<&Path>) -> Result<HostConfig> {
    match path {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => HostConfig::load_from_cwd().context("Failed to load evhost.toml"),
    }
}

fn init_logging(verbose: u8, configured: &str) {
    let level = match verbose {
        0 => configured,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

/// Engine, runtime and registry wired together
fn host(config: HostConfig) -> Result<(Rc<NativeEngine>, Runtime, HostRegistry)> {
    let engine = Rc::new(NativeEngine::new());
    let rt = Runtime::with_config(engine.clone(), config).context("Failed to create event loop")?;
    Ok((engine, rt, HostRegistry::new()))
}

type Outcome = Rc<RefCell<Option<std::result::Result<Value, Value>>>>;

/// Error-first callback that records its result
fn capture(engine: &NativeEngine, outcome: &Outcome) -> Value {
    let outcome = outcome.clone();
    engine.function(move |args| {
        let err = args.first().cloned().unwrap_or(Value::Undefined);
        let result = if err.is_nullish() {
            Ok(args.get(1).cloned().unwrap_or(Value::Undefined))
        } else {
            Err(err)
        };
        *outcome.borrow_mut() = Some(result);
    })
}

fn finish(rt: &Runtime, outcome: &Outcome) -> Result<Value> {
    let code = rt.run().context("Event loop failed")?;
    if code != 0 {
        bail!("exited with code {}", code);
    }
    let taken = outcome.borrow_mut().take();
    match taken {
        Some(Ok(value)) => Ok(value),
        Some(Err(err)) => Err(anyhow!("{}", err.as_str().unwrap_or(err.type_name()))),
        None => bail!("callback was never invoked"),
    }
}

fn cmd_cat(config: HostConfig, path: &Path) -> Result<i32> {
    let (engine, rt, registry) = host(config)?;
    let outcome: Outcome = Rc::default();
    let cb = capture(&engine, &outcome);
    let path_arg = Value::from(path.to_string_lossy().as_ref());
    registry.call(&rt, "fs.readFile", &[path_arg, cb])?;

    let contents = finish(&rt, &outcome)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    print!("{}", contents.as_str().unwrap_or_default());
    Ok(0)
}

fn cmd_fetch(config: HostConfig, url: &str, method: Option<&str>, data: Option<String>) -> Result<i32> {
    let name = match method.map(str::to_ascii_lowercase).as_deref() {
        None | Some("get") => "http.get",
        Some("post") => "http.post",
        Some("put") => "http.put",
        Some("delete") => "http.delete",
        Some(other) => bail!("Unsupported method: {}", other),
    };

    let (engine, rt, registry) = host(config)?;
    let outcome: Outcome = Rc::default();
    let mut args = vec![Value::from(url)];
    if let Some(data) = data {
        args.push(Value::String(data));
    }
    args.push(capture(&engine, &outcome));
    registry
        .call(&rt, name, &args)
        .with_context(|| format!("Invalid request to {}", url))?;

    let response = finish(&rt, &outcome).with_context(|| format!("Request to {} failed", url))?;
    let json = serde_json::to_string_pretty(&response.to_json())?;
    println!("{}", json);
    Ok(0)
}

fn cmd_functions() -> i32 {
    let registry = HostRegistry::new();
    let categories = [
        HostCategory::Timers,
        HostCategory::FileSystem,
        HostCategory::Http,
        HostCategory::Net,
        HostCategory::Process,
    ];
    for category in categories {
        println!("{}:", category);
        for func in registry.list_by_category(category) {
            println!("  {:<20} {}", func.name, func.description);
        }
    }
    0
}

fn cmd_serve(config: HostConfig, port: u16, body: Option<String>) -> Result<i32> {
    let (engine, rt, registry) = host(config)?;

    let handler = engine.function(move |args| {
        if let Some(HostObject::Response(res)) = args.get(1).and_then(Value::as_host) {
            res.end(body.as_deref());
        }
    });
    let server = registry.call(&rt, "http.createServer", &[handler])?;
    let bound = registry.call(&rt, "Server.listen", &[server, Value::from(port)])?;
    let Some(bound) = bound.as_f64() else {
        bail!("Failed to listen on port {}", port);
    };
    println!("Listening on {}:{}", rt.config().net.bind_host, bound);

    Ok(rt.run().context("Event loop failed")?)
}
